use std::error::Error;
use std::time::Duration;
use std::{env, fs};

use serde::{Deserialize, Serialize};
use widgetsync_client::settings::{self as client, CONFIG_ENV};

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Mock {
    pub dashboard_id: String,
    pub device_id: String,
    pub telemetry_interval_ms: u64,
    pub schedule_tick_ms: u64,
    pub demo_interval_ms: u64,
}

impl Mock {
    pub fn telemetry_interval(&self) -> Duration {
        Duration::from_millis(self.telemetry_interval_ms.max(1))
    }

    pub fn schedule_tick(&self) -> Duration {
        Duration::from_millis(self.schedule_tick_ms.max(1))
    }

    pub fn demo_interval(&self) -> Duration {
        Duration::from_millis(self.demo_interval_ms.max(1))
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Settings {
    #[serde(flatten)]
    pub client: client::Settings,
    pub mock: Mock,
}

impl Settings {
    pub fn new() -> Result<Self, Box<dyn Error>> {
        let text = match env::var_os(CONFIG_ENV) {
            Some(path) => fs::read_to_string(path)?,
            None => client::Settings::default_toml().to_string(),
        };

        Ok(toml::from_str(&text)?)
    }
}
