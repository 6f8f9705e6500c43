//! Bridge configuration
//!
//! Every knob of the bridge lives in [`BridgeConfig`]. The binary loads it
//! from a YAML file (all sections optional, missing fields take their
//! defaults), overlays command-line values and calls
//! [`BridgeConfig::validate`] before any peripheral is opened.
//!
//! ```rust
//! use voltage_rtu_bridge::BridgeConfig;
//!
//! let config = BridgeConfig::from_yaml_str("serial:\n  port: /dev/ttyS0\n  baud_rate: 9600\n").unwrap();
//! assert_eq!(config.serial.baud_rate, 9600);
//! assert_eq!(config.radio.frequency_mhz, 868.0);
//! config.validate().unwrap();
//! ```

use std::path::Path;
use serde::{Deserialize, Serialize};

use crate::checksum::CrcByteOrder;
use crate::error::{BridgeError, BridgeResult};
use crate::framing::TimingProfile;
use crate::indicator::PCF8574_DEFAULT_ADDRESS;
use crate::transport::parse_key;

/// Serial line parity
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Parity {
    None,
    Odd,
    Even,
}

impl From<Parity> for tokio_serial::Parity {
    fn from(parity: Parity) -> Self {
        match parity {
            Parity::None => tokio_serial::Parity::None,
            Parity::Odd => tokio_serial::Parity::Odd,
            Parity::Even => tokio_serial::Parity::Even,
        }
    }
}

/// Serial side of the bridge
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct SerialConfig {
    pub port: String,
    pub baud_rate: u32,
    pub data_bits: u8,
    pub parity: Parity,
    pub stop_bits: u8,
    pub crc_byte_order: CrcByteOrder,
}

impl Default for SerialConfig {
    fn default() -> Self {
        Self {
            port: String::new(),
            baud_rate: crate::DEFAULT_BAUD_RATE,
            data_bits: 8,
            parity: Parity::Even,
            stop_bits: 1,
            crc_byte_order: CrcByteOrder::default(),
        }
    }
}

/// Optional silence-interval overrides in microseconds
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct TimingConfig {
    pub char_interval_us: Option<u64>,
    pub frame_interval_us: Option<u64>,
}

/// LoRa modem settings
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct RadioConfig {
    pub spi_device: String,
    pub spi_speed_hz: u32,
    pub frequency_mhz: f32,
    pub tx_power_dbm: i8,
    pub spreading_factor: u8,
    pub bandwidth_hz: u32,
    /// Denominator of the 4/x coding rate
    pub coding_rate: u8,
    pub address: u8,
    pub promiscuous: bool,
}

impl Default for RadioConfig {
    fn default() -> Self {
        Self {
            spi_device: "/dev/spidev0.0".to_string(),
            spi_speed_hz: 1_000_000,
            frequency_mhz: 868.0,
            tx_power_dbm: 13,
            spreading_factor: 7,
            bandwidth_hz: 125_000,
            coding_rate: 5,
            address: 0xFF,
            promiscuous: true,
        }
    }
}

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct EncryptionConfig {
    /// 16 ASCII characters, or `hex:` followed by 32 hex digits
    pub key: Option<String>,
}

/// Tx/Rx activity LEDs
///
/// Without `wire_bus` the pins are BCM GPIO numbers; with it they are
/// PCF8574 pins on `/dev/i2c-<wire_bus>`.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct IndicatorConfig {
    pub tx_pin: Option<u8>,
    pub rx_pin: Option<u8>,
    pub wire_bus: Option<u8>,
    pub expander_address: u16,
    pub active_high: bool,
}

impl Default for IndicatorConfig {
    fn default() -> Self {
        Self {
            tx_pin: None,
            rx_pin: None,
            wire_bus: None,
            expander_address: PCF8574_DEFAULT_ADDRESS,
            active_high: false,
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct LoggingConfig {
    pub level: String,
    pub verbose: bool,
}

impl Default for LoggingConfig {
    fn default() -> Self {
        Self {
            level: "info".to_string(),
            verbose: false,
        }
    }
}

/// Complete bridge configuration
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct BridgeConfig {
    pub serial: SerialConfig,
    pub timing: TimingConfig,
    pub radio: RadioConfig,
    pub encryption: EncryptionConfig,
    pub indicators: IndicatorConfig,
    pub logging: LoggingConfig,
}

impl BridgeConfig {
    /// Parse a YAML document
    pub fn from_yaml_str(yaml: &str) -> BridgeResult<Self> {
        Ok(serde_yaml::from_str(yaml)?)
    }

    /// Load a YAML file
    pub fn from_file<P: AsRef<Path>>(path: P) -> BridgeResult<Self> {
        let path = path.as_ref();
        let content = std::fs::read_to_string(path).map_err(|e| {
            BridgeError::configuration(format!("Unable to read {}: {}", path.display(), e))
        })?;
        Self::from_yaml_str(&content)
    }

    pub fn to_yaml_string(&self) -> BridgeResult<String> {
        Ok(serde_yaml::to_string(self)?)
    }

    /// Check every range before any device is touched
    pub fn validate(&self) -> BridgeResult<()> {
        let serial = &self.serial;
        if serial.port.is_empty() {
            return Err(BridgeError::configuration("A serial port must be specified!"));
        }
        if serial.baud_rate == 0 {
            return Err(BridgeError::configuration("baud rate must be positive"));
        }
        if !(5..=8).contains(&serial.data_bits) {
            return Err(BridgeError::configuration(format!(
                "data bits {} outside 5..=8", serial.data_bits
            )));
        }
        if !(1..=2).contains(&serial.stop_bits) {
            return Err(BridgeError::configuration(format!(
                "stop bits {} must be 1 or 2", serial.stop_bits
            )));
        }

        self.timing_profile()?;

        let radio = &self.radio;
        if !(137.0..=1020.0).contains(&radio.frequency_mhz) {
            return Err(BridgeError::configuration(format!(
                "frequency {} MHz outside 137..=1020 MHz", radio.frequency_mhz
            )));
        }
        if !(2..=20).contains(&radio.tx_power_dbm) {
            return Err(BridgeError::configuration(format!(
                "TX power {} dBm outside 2..=20 dBm", radio.tx_power_dbm
            )));
        }
        if !(6..=12).contains(&radio.spreading_factor) {
            return Err(BridgeError::configuration(format!(
                "spreading factor {} outside 6..=12", radio.spreading_factor
            )));
        }
        if !(5..=8).contains(&radio.coding_rate) {
            return Err(BridgeError::configuration(format!(
                "coding rate 4/{} outside 4/5..=4/8", radio.coding_rate
            )));
        }
        const BANDWIDTHS: [u32; 10] = [
            7_800, 10_400, 15_600, 20_800, 31_250, 41_700, 62_500, 125_000, 250_000, 500_000,
        ];
        if !BANDWIDTHS.contains(&radio.bandwidth_hz) {
            return Err(BridgeError::configuration(format!(
                "bandwidth {} Hz is not an SX127x step", radio.bandwidth_hz
            )));
        }

        if let Some(key) = &self.encryption.key {
            parse_key(key)?;
        }

        let indicators = &self.indicators;
        if indicators.wire_bus.is_some() {
            for pin in [indicators.tx_pin, indicators.rx_pin].into_iter().flatten() {
                if pin > 7 {
                    return Err(BridgeError::configuration(format!(
                        "expander pin {} outside 0..=7", pin
                    )));
                }
            }
        }

        Ok(())
    }

    /// Silence intervals for the configured line, with overrides applied
    pub fn timing_profile(&self) -> BridgeResult<TimingProfile> {
        let derived = TimingProfile::from_baud_rate(self.serial.baud_rate)?;
        match (self.timing.char_interval_us, self.timing.frame_interval_us) {
            (None, None) => Ok(derived),
            (char_us, frame_us) => TimingProfile::from_micros(
                char_us.unwrap_or(derived.char_interval().as_micros() as u64),
                frame_us.unwrap_or(derived.frame_interval().as_micros() as u64),
            ),
        }
    }

    /// Effective tracing directive
    pub fn log_level(&self) -> &str {
        if self.logging.verbose {
            "debug"
        } else {
            &self.logging.level
        }
    }
}
