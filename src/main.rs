// Copyright 2025 Chris Custine
//
// Licensed under the Apache License, Version 2.0 (the "License");
// you may not use this file except in compliance with the License.
// You may obtain a copy of the License at
//
//     http://www.apache.org/licenses/LICENSE-2.0
//
// Unless required by applicable law or agreed to in writing, software
// distributed under the License is distributed on an "AS IS" BASIS,
// WITHOUT WARRANTIES OR CONDITIONS OF ANY KIND, either express or implied.
// See the License for the specific language governing permissions and
// limitations under the License.

mod app;
mod backend;
mod config;
mod headless;
mod status;
mod status_pane;

use clap::Parser;
use flowbase_client::NodeMonitor;
use log::{info, warn};

use app::FlowbaseApp;
use config::AppConfig;

#[global_allocator]
static GLOBAL: mimalloc::MiMalloc = mimalloc::MiMalloc;

/// Flowbase Desktop: follow node activation over STOMP
#[derive(Parser, Debug)]
#[command(version, about, long_about = None)]
struct Cli {
    /// STOMP-over-WebSocket endpoint (overrides the config file)
    #[arg(long)]
    broker_url: Option<String>,

    /// Topic carrying node state messages
    #[arg(long)]
    topic: Option<String>,

    /// Base URL of the backend trigger endpoints
    #[arg(long)]
    backend_url: Option<String>,

    /// Run without a window and log node changes until Ctrl-C
    #[arg(long)]
    headless: bool,

    /// Do not connect to the broker on startup
    #[arg(long)]
    no_connect: bool,
}

impl Cli {
    /// Merge command line overrides into the loaded config
    fn apply(&self, config: &mut AppConfig) {
        if let Some(url) = &self.broker_url {
            config.broker_url.clone_from(url);
        }
        if let Some(topic) = &self.topic {
            config.topic.clone_from(topic);
        }
        if let Some(url) = &self.backend_url {
            config.backend_url.clone_from(url);
        }
        if self.no_connect {
            config.auto_connect = false;
        }
    }
}

fn load_config() -> AppConfig {
    match AppConfig::load() {
        Ok(config) => {
            if let Ok(path) = AppConfig::get_config_path() {
                info!("Loaded configuration from {}", path.display());
            }
            config
        }
        Err(e) => {
            warn!("Failed to load configuration, using defaults: {}", e);
            AppConfig::default()
        }
    }
}

fn main() -> Result<(), Box<dyn std::error::Error>> {
    env_logger::Builder::from_env(env_logger::Env::default().default_filter_or("info")).init();

    let cli = Cli::parse();
    let mut config = load_config();
    cli.apply(&mut config);

    info!("Starting Flowbase Desktop (broker {})", config.broker_url);

    let runtime = tokio::runtime::Runtime::new()?;
    let _guard = runtime.enter();
    let monitor = NodeMonitor::new(config.to_monitor_config());

    if cli.headless {
        runtime.block_on(headless::run(monitor, config.auto_connect));
        return Ok(());
    }

    let options = eframe::NativeOptions {
        viewport: egui::ViewportBuilder::default()
            .with_inner_size([900.0, 600.0])
            .with_title("Flowbase Desktop"),
        ..Default::default()
    };

    let handle = runtime.handle().clone();
    eframe::run_native(
        "Flowbase Desktop",
        options,
        Box::new(move |_cc| {
            Ok(Box::new(FlowbaseApp::new(
                monitor,
                handle,
                &config.backend_url,
                config.auto_connect,
            )))
        }),
    )?;

    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_cli_overrides_config() {
        let cli = Cli::try_parse_from([
            "flowbase-desktop",
            "--broker-url",
            "ws://broker:9000/stomp",
            "--topic",
            "/topic/custom",
            "--no-connect",
        ])
        .unwrap();

        let mut config = AppConfig::default();
        cli.apply(&mut config);

        assert_eq!(config.broker_url, "ws://broker:9000/stomp");
        assert_eq!(config.topic, "/topic/custom");
        assert_eq!(config.backend_url, config::DEFAULT_BACKEND_URL);
        assert!(!config.auto_connect);
        assert!(!cli.headless);
    }

    #[test]
    fn test_no_flags_keep_config() {
        let cli = Cli::try_parse_from(["flowbase-desktop", "--headless"]).unwrap();
        let mut config = AppConfig::default();
        cli.apply(&mut config);

        assert_eq!(config, AppConfig::default());
        assert!(cli.headless);
    }
}
