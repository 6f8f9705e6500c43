//! Frame diagnostics and tracing set-up
//!
//! Frames crossing the bridge are rendered one byte per bracket pair, with
//! the bracket style telling the direction at a glance:
//!
//! ```text
//! serial -> radio   [01][03][00][00][00][0A][C5][CD]
//! radio  -> serial  <01><03><02><00><2A><39><9B>
//! ```

use std::fmt::Write as _;
use tracing::info;
use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt, EnvFilter};

use crate::error::{BridgeError, BridgeResult};

/// Which way a frame crossed the bridge
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Direction {
    /// Serial request forwarded to the radio
    Outbound,
    /// Radio reply relayed to the serial line
    Inbound,
}

impl Direction {
    fn brackets(&self) -> (char, char) {
        match self {
            Direction::Outbound => ('[', ']'),
            Direction::Inbound => ('<', '>'),
        }
    }
}

/// Render `frame` as bracketed upper-case hex bytes
pub fn format_frame(direction: Direction, frame: &[u8]) -> String {
    let (open, close) = direction.brackets();
    let mut out = String::with_capacity(frame.len() * 4);
    for byte in frame {
        let _ = write!(out, "{}{:02X}{}", open, byte, close);
    }
    out
}

/// Emit the diagnostic line for one frame
pub fn log_frame(direction: Direction, frame: &[u8]) {
    info!("{}", format_frame(direction, frame));
}

/// Install the global tracing subscriber
///
/// `RUST_LOG` wins over `level` when set.
pub fn init_tracing(level: &str) -> BridgeResult<()> {
    let env_filter = EnvFilter::try_from_default_env()
        .or_else(|_| EnvFilter::try_new(level))
        .map_err(|e| BridgeError::configuration(format!("Invalid log level '{}': {}", level, e)))?;

    tracing_subscriber::registry()
        .with(env_filter)
        .with(tracing_subscriber::fmt::layer().with_target(false))
        .try_init()
        .map_err(|e| BridgeError::configuration(format!("Failed to initialize logging: {}", e)))
}
