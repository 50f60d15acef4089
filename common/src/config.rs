use serde::{Deserialize, Serialize};

pub const DEFAULT_STATUS_URL: &str = "https://status.example.com/api/status";
pub const DEFAULT_PUBLISH_URL: &str = "https://api.thingspeak.com/update?api_key=CHANGE_ME";

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct MonitorConfig {
    pub status_url: String,
    pub publish_url: String,
    pub tick_interval_ms: u64,
    pub time_sync_interval_ms: u64,
    pub utc_offset_secs: i32,
    pub http_port: u16,
    pub web_root: String,
    #[serde(default)]
    pub ca_bundle_path: Option<String>,
    pub loop_interval_ms: u64,
}

impl Default for MonitorConfig {
    fn default() -> Self {
        Self {
            status_url: option_env!("MONITOR_STATUS_URL")
                .unwrap_or(DEFAULT_STATUS_URL)
                .to_string(),
            publish_url: option_env!("MONITOR_PUBLISH_URL")
                .unwrap_or(DEFAULT_PUBLISH_URL)
                .to_string(),
            tick_interval_ms: 15_000,
            time_sync_interval_ms: 60_000,
            utc_offset_secs: -18_000,
            http_port: 80,
            web_root: "./data".to_string(),
            ca_bundle_path: None,
            loop_interval_ms: 200,
        }
    }
}

impl MonitorConfig {
    pub fn sanitize(&mut self) {
        self.tick_interval_ms = self.tick_interval_ms.max(1_000);
        self.time_sync_interval_ms = self.time_sync_interval_ms.max(1_000);
        self.loop_interval_ms = self.loop_interval_ms.clamp(10, 1_000);
        self.utc_offset_secs = self.utc_offset_secs.clamp(-14 * 3600, 14 * 3600);

        if self.http_port == 0 {
            self.http_port = 80;
        }

        if self
            .ca_bundle_path
            .as_deref()
            .is_some_and(|path| path.trim().is_empty())
        {
            self.ca_bundle_path = None;
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct NetworkConfig {
    pub wifi_ssid: String,
    pub wifi_pass: String,
}

impl Default for NetworkConfig {
    fn default() -> Self {
        Self {
            wifi_ssid: option_env!("WIFI_SSID").unwrap_or_default().to_string(),
            wifi_pass: option_env!("WIFI_PASS").unwrap_or_default().to_string(),
        }
    }
}

impl NetworkConfig {
    pub fn has_station_credentials(&self) -> bool {
        let ssid = self.wifi_ssid.trim();
        !ssid.is_empty() && ssid != "CHANGE_ME"
    }
}

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct RuntimeConfig {
    pub monitor: MonitorConfig,
    #[serde(default)]
    pub network: NetworkConfig,
}
