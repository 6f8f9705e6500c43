//! # Bridge Error Handling
//!
//! Every fallible operation in the bridge returns [`BridgeResult<T>`]. The
//! error variants follow the life of a frame through the bridge:
//!
//! ### Per-frame errors (reported, loop continues)
//! - **Frame Errors**: candidate frame shorter than the 4-byte RTU minimum
//! - **CRC Errors**: trailing CRC does not match the recomputed one
//! - **Transport Errors**: the radio refused a frame or a received packet did not parse
//! - **Device Errors**: an activity indicator or expander write failed
//!
//! ### Startup errors (fatal)
//! - **Configuration Errors**: bad key length, out-of-range radio settings,
//!   missing hardware backend
//! - **Connection Errors**: serial port, SPI or I2C device could not be opened
//!
//! ```rust
//! use voltage_rtu_bridge::BridgeError;
//!
//! let err = BridgeError::crc_mismatch(0xC5CD, 0x0000);
//! assert!(!err.is_fatal());
//!
//! let err = BridgeError::configuration("key must be 16 bytes");
//! assert!(err.is_fatal());
//! ```

use thiserror::Error;

/// Result type alias for bridge operations
pub type BridgeResult<T> = Result<T, BridgeError>;

/// Bridge error types
///
/// Variants carry owned strings so errors can be cloned into statistics and
/// diagnostic reports without borrowing from the failing device.
#[derive(Error, Debug, Clone, PartialEq)]
pub enum BridgeError {
    /// I/O related errors (serial port, SPI, I2C)
    #[error("I/O error: {message}")]
    Io { message: String },

    /// A device could not be opened or stopped answering
    ///
    /// # Examples
    /// - Serial port path does not exist
    /// - `/dev/spidev0.0` permission denied
    #[error("Connection error: {message}")]
    Connection { message: String },

    /// Operation exceeded its time budget
    #[error("Timeout after {timeout_ms}ms: {operation}")]
    Timeout { operation: String, timeout_ms: u64 },

    /// Candidate frame rejected before CRC validation
    #[error("Frame error: {message}")]
    Frame { message: String },

    /// CRC validation failure
    ///
    /// `expected` is the value recomputed over address and PDU, `actual` the
    /// value packed from the two trailing bytes.
    #[error("CRC validation failed: expected={expected:04X}, actual={actual:04X}")]
    CrcMismatch { expected: u16, actual: u16 },

    /// Radio transport refused a frame or delivered one that did not parse
    #[error("Transport error: {message}")]
    Transport { message: String },

    /// Peripheral (indicator pin, expander, modem register) failure
    #[error("Device error: {message}")]
    Device { message: String },

    /// Configuration errors
    ///
    /// Always fatal: they are raised while the bridge is being wired and
    /// abort startup before the steady-state loop is entered.
    #[error("Configuration error: {message}")]
    Configuration { message: String },

    /// Internal errors (should not occur in normal operation)
    #[error("Internal error: {message}")]
    Internal { message: String },
}

impl BridgeError {
    /// Create a new I/O error
    pub fn io<S: Into<String>>(message: S) -> Self {
        Self::Io { message: message.into() }
    }

    /// Create a new connection error
    pub fn connection<S: Into<String>>(message: S) -> Self {
        Self::Connection { message: message.into() }
    }

    /// Create a new timeout error
    ///
    /// # Arguments
    ///
    /// * `operation` - Description of the operation that timed out
    /// * `timeout_ms` - Timeout duration in milliseconds
    pub fn timeout<S: Into<String>>(operation: S, timeout_ms: u64) -> Self {
        Self::Timeout {
            operation: operation.into(),
            timeout_ms
        }
    }

    /// Create a frame error
    pub fn frame<S: Into<String>>(message: S) -> Self {
        Self::Frame { message: message.into() }
    }

    /// Create a CRC mismatch error
    pub fn crc_mismatch(expected: u16, actual: u16) -> Self {
        Self::CrcMismatch { expected, actual }
    }

    /// Create a transport error
    pub fn transport<S: Into<String>>(message: S) -> Self {
        Self::Transport { message: message.into() }
    }

    /// Create a device error
    pub fn device<S: Into<String>>(message: S) -> Self {
        Self::Device { message: message.into() }
    }

    /// Create a configuration error
    pub fn configuration<S: Into<String>>(message: S) -> Self {
        Self::Configuration { message: message.into() }
    }

    /// Create an internal error
    pub fn internal<S: Into<String>>(message: S) -> Self {
        Self::Internal { message: message.into() }
    }

    /// Check if the error must abort startup
    ///
    /// Configuration and connection errors are only produced while wiring
    /// peripherals; everything else is a per-frame condition the loop
    /// reports and survives.
    pub fn is_fatal(&self) -> bool {
        matches!(self, Self::Configuration { .. } | Self::Connection { .. })
    }

    /// Check if the next frame may succeed where this one failed
    pub fn is_recoverable(&self) -> bool {
        match self {
            Self::Io { .. } => true,
            Self::Timeout { .. } => true,
            Self::Frame { .. } => true,
            Self::CrcMismatch { .. } => true,
            Self::Transport { .. } => true,
            Self::Device { .. } => true,
            _ => false,
        }
    }

    /// Check if the error belongs to the radio/serial transport path
    pub fn is_transport_error(&self) -> bool {
        matches!(self,
            Self::Io { .. } |
            Self::Connection { .. } |
            Self::Timeout { .. } |
            Self::Transport { .. }
        )
    }

    /// Check if the error is a framing or integrity issue on the serial side
    pub fn is_frame_error(&self) -> bool {
        matches!(self, Self::Frame { .. } | Self::CrcMismatch { .. })
    }
}

/// Convert from std::io::Error
impl From<std::io::Error> for BridgeError {
    fn from(err: std::io::Error) -> Self {
        Self::io(err.to_string())
    }
}

/// Serial port open/configure failures surface as connection errors
impl From<tokio_serial::Error> for BridgeError {
    fn from(err: tokio_serial::Error) -> Self {
        Self::connection(err.to_string())
    }
}

/// Convert from serde YAML errors
impl From<serde_yaml::Error> for BridgeError {
    fn from(err: serde_yaml::Error) -> Self {
        Self::configuration(format!("YAML error: {}", err))
    }
}
