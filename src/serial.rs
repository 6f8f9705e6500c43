/// Serial side of the bridge
///
/// The loop only needs four primitives from the wired Modbus line: how many
/// bytes are waiting, read them, write a reply, flush it. [`SerialLink`]
/// captures exactly that so the loop runs against `tokio_serial` in
/// production and against an in-memory line in tests.

use async_trait::async_trait;
use tokio::io::{AsyncReadExt, AsyncWriteExt};
use tokio_serial::SerialPort;

use crate::config::SerialConfig;
use crate::error::{BridgeError, BridgeResult};

/// Serial duplex consumed by the bridge loop
#[async_trait]
pub trait SerialLink: Send {
    /// Bytes ready to be read without waiting
    fn available(&mut self) -> BridgeResult<usize>;

    /// Read up to `buf.len()` bytes; only called after [`available`](Self::available) reported data
    async fn read(&mut self, buf: &mut [u8]) -> BridgeResult<usize>;

    /// Write the whole buffer
    async fn write(&mut self, data: &[u8]) -> BridgeResult<()>;

    /// Wait until written bytes left the driver
    async fn flush(&mut self) -> BridgeResult<()>;
}

#[async_trait]
impl SerialLink for tokio_serial::SerialStream {
    fn available(&mut self) -> BridgeResult<usize> {
        let pending = self
            .bytes_to_read()
            .map_err(|e| BridgeError::io(format!("Serial status error: {}", e)))?;
        Ok(pending as usize)
    }

    async fn read(&mut self, buf: &mut [u8]) -> BridgeResult<usize> {
        AsyncReadExt::read(self, buf)
            .await
            .map_err(|e| BridgeError::io(format!("Serial read error: {}", e)))
    }

    async fn write(&mut self, data: &[u8]) -> BridgeResult<()> {
        self.write_all(data)
            .await
            .map_err(|e| BridgeError::io(format!("Serial write error: {}", e)))
    }

    async fn flush(&mut self) -> BridgeResult<()> {
        AsyncWriteExt::flush(self)
            .await
            .map_err(|e| BridgeError::io(format!("Serial flush error: {}", e)))
    }
}

fn data_bits(bits: u8) -> BridgeResult<tokio_serial::DataBits> {
    match bits {
        5 => Ok(tokio_serial::DataBits::Five),
        6 => Ok(tokio_serial::DataBits::Six),
        7 => Ok(tokio_serial::DataBits::Seven),
        8 => Ok(tokio_serial::DataBits::Eight),
        other => Err(BridgeError::configuration(format!("unsupported data bits: {}", other))),
    }
}

fn stop_bits(bits: u8) -> BridgeResult<tokio_serial::StopBits> {
    match bits {
        1 => Ok(tokio_serial::StopBits::One),
        2 => Ok(tokio_serial::StopBits::Two),
        other => Err(BridgeError::configuration(format!("unsupported stop bits: {}", other))),
    }
}

/// Open the serial port described by `config`
pub fn open_serial(config: &SerialConfig) -> BridgeResult<tokio_serial::SerialStream> {
    let builder = tokio_serial::new(&config.port, config.baud_rate)
        .data_bits(data_bits(config.data_bits)?)
        .stop_bits(stop_bits(config.stop_bits)?)
        .parity(config.parity.into());

    tokio_serial::SerialStream::open(&builder).map_err(|e| {
        BridgeError::connection(format!("Failed to open serial port {}: {}", config.port, e))
    })
}
