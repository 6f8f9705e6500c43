//! # Voltage RTU Bridge - Modbus RTU over LoRa
//!
//! **Author:** Evan Liu <evan.liu@voltageenergy.com>
//! **Version:** 0.1.0
//! **License:** MIT
//!
//! A byte-transparent bridge between a wired Modbus RTU line and an RF95
//! (SX127x) LoRa radio, so a Modbus master can reach a remote slave over a
//! radio hop instead of a wire.
//!
//! ## Features
//!
//! - **Silence-timed framing**: RTU frames rebuilt from the raw serial stream
//!   with 1.5T / 3.5T timing derived from the baud rate
//! - **CRC16 validation**: corrupt requests never reach the radio
//! - **Optional AES-128**: RadioHead-compatible encrypted link
//! - **Activity LEDs**: Tx/Rx indicators on GPIO or a PCF8574 expander
//! - **Round-trip timing**: every relayed reply reports its latency
//!
//! The bridge never interprets function codes, addresses or payloads.
//!
//! ## Quick Start
//!
//! ```rust,no_run
//! use voltage_rtu_bridge::{BridgeConfig, BridgeSession, CrcValidator};
//! use voltage_rtu_bridge::radio::{RadioModem, Rf95Modem, RegisterBus};
//! use voltage_rtu_bridge::serial::open_serial;
//! use voltage_rtu_bridge::transport::{LinkTransport, PlainTransport};
//!
//! # async fn example<B: RegisterBus + 'static>(bus: B) -> Result<(), Box<dyn std::error::Error>> {
//! let mut config = BridgeConfig::default();
//! config.serial.port = "/dev/ttyUSB0".to_string();
//! config.validate()?;
//!
//! let mut modem = Rf95Modem::new(bus);
//! modem.init().await?;
//! modem.configure(&config.radio)?;
//!
//! let link = LinkTransport::new(PlainTransport::new(modem), None)?;
//! let serial = open_serial(&config.serial)?;
//! let mut session = BridgeSession::new(
//!     serial,
//!     link,
//!     config.timing_profile()?,
//!     CrcValidator::new(config.serial.crc_byte_order),
//! );
//!
//! session.run_until(async { let _ = tokio::signal::ctrl_c().await; }).await;
//! # Ok(())
//! # }
//! ```
//!
//! ## Architecture
//!
//! ```text
//! ┌──────────────┐   bytes   ┌────────────────┐  frame  ┌──────────────┐
//! │ Serial line  │──────────►│ FrameAssembler │────────►│ CrcValidator │
//! └──────────────┘           └────────────────┘         └──────────────┘
//!        ▲                                                     │ valid
//!        │ reply                                               ▼
//! ┌──────────────┐                                     ┌───────────────┐
//! │ BridgeSession│◄────────────────────────────────────│ RadioTransport│
//! └──────────────┘                                     │ (plain / AES) │
//!                                                      └───────────────┘
//!                                                              │
//!                                                      ┌───────────────┐
//!                                                      │  RF95 modem   │
//!                                                      └───────────────┘
//! ```

/// Core error types and result handling
pub mod error;

/// Modbus RTU CRC16 computation and validation
pub mod checksum;

/// Silence-timed RTU frame reconstruction
pub mod framing;

/// Tx/Rx activity indicators on GPIO or PCF8574
pub mod indicator;

/// RF95 / SX127x LoRa modem driver
pub mod radio;

/// Radio transport layer with optional AES-128 decorator
pub mod transport;

/// Serial line abstraction
pub mod serial;

/// Bridge loop orchestration
pub mod bridge;

/// Configuration model and YAML loading
pub mod config;

/// Frame diagnostics and tracing set-up
pub mod logging;

/// Latency metrics, cooperative delay and formatting
pub mod utils;

// Re-export main types for convenience
pub use error::{BridgeError, BridgeResult};
pub use checksum::{crc16, CrcByteOrder, CrcValidator};
pub use framing::{AssemblerState, FrameAssembler, TimingProfile};
pub use indicator::{ActivityIndicator, ExpanderIndicator, GpioIndicator, Indicator, Pcf8574};
pub use radio::{RadioModem, Rf95Modem, RegisterBus};
pub use transport::{EncryptingTransport, LinkTransport, PlainTransport, RadioTransport, TransportStats};
pub use serial::SerialLink;
pub use bridge::{BridgeSession, BridgeStats, CycleReport, ReplyOutcome, RequestOutcome};
pub use config::BridgeConfig;
pub use logging::{format_frame, Direction};
pub use utils::LatencyMetrics;

/// Shortest RTU frame: address, function code and two CRC bytes
pub const MIN_FRAME_LEN: usize = 4;

/// Default serial baud rate
pub const DEFAULT_BAUD_RATE: u32 = 38400;

/// Library version
pub const VERSION: &str = env!("CARGO_PKG_VERSION");

/// Get library information
pub fn info() -> String {
    format!("Voltage RTU Bridge v{} - Modbus RTU to LoRa radio bridge by Evan Liu", VERSION)
}
