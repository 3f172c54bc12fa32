use serde::{Deserialize, Serialize};

use crate::hitachi::HITACHI_AC1_CARRIER_KHZ;

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct NetworkConfig {
    pub wifi_ssid: String,
    pub wifi_pass: String,
    pub hostname: String,
    pub mqtt_host: String,
    pub mqtt_port: u16,
    pub mqtt_user: String,
    pub mqtt_pass: String,
}

impl Default for NetworkConfig {
    fn default() -> Self {
        Self {
            wifi_ssid: String::new(),
            wifi_pass: String::new(),
            hostname: "esp32ac".to_string(),
            mqtt_host: "192.168.1.100".to_string(),
            mqtt_port: 1883,
            mqtt_user: String::new(),
            mqtt_pass: String::new(),
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
pub struct HttpConfig {
    pub port: u16,
}

impl Default for HttpConfig {
    fn default() -> Self {
        Self { port: 80 }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
pub struct IrHardwareConfig {
    pub tx_pin: i32,
    pub rmt_channel: u8,
    pub carrier_khz: u32,
}

impl Default for IrHardwareConfig {
    fn default() -> Self {
        Self {
            tx_pin: 4,
            rmt_channel: 0,
            carrier_khz: HITACHI_AC1_CARRIER_KHZ,
        }
    }
}

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct RuntimeConfig {
    #[serde(default)]
    pub network: NetworkConfig,
    #[serde(default)]
    pub http: HttpConfig,
    #[serde(default)]
    pub ir: IrHardwareConfig,
}

impl RuntimeConfig {
    pub fn sanitize(&mut self) {
        self.ir.sanitize();
        if self.http.port == 0 {
            self.http = HttpConfig::default();
        }
        if self.network.hostname.trim().is_empty() {
            self.network.hostname = NetworkConfig::default().hostname;
        }
    }
}

impl IrHardwareConfig {
    pub fn sanitize(&mut self) {
        if self.tx_pin < 0 {
            self.tx_pin = 4;
        }

        if self.rmt_channel > 7 {
            self.rmt_channel = 0;
        }

        self.carrier_khz = self.carrier_khz.clamp(10, 100);
    }
}
