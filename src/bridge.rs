//! # Bridge Loop
//!
//! [`BridgeSession`] owns the serial line, the radio transport and the frame
//! assembler, and moves frames between them in one cooperative loop:
//!
//! 1. Bytes waiting on the serial line are read and fed to the assembler.
//! 2. Once the line has been silent for the frame interval the frame is
//!    taken. Short frames are flushed, frames failing CRC are dropped, valid
//!    frames are forwarded to the radio and the request time is recorded.
//! 3. A pending radio frame is received; replies of at least four bytes are
//!    written verbatim to the serial line, flushed, and the round-trip time
//!    since the last forwarded request is reported.
//!
//! Nothing is retried and at most one request timestamp is held. Errors at
//! every step are logged and counted; the loop keeps running.
//!
//! ```rust,no_run
//! use voltage_rtu_bridge::{BridgeSession, CrcValidator, TimingProfile};
//! use voltage_rtu_bridge::serial::SerialLink;
//! use voltage_rtu_bridge::transport::RadioTransport;
//!
//! # async fn example<S: SerialLink, T: RadioTransport>(serial: S, radio: T) -> Result<(), Box<dyn std::error::Error>> {
//! let timing = TimingProfile::from_baud_rate(38400)?;
//! let mut session = BridgeSession::new(serial, radio, timing, CrcValidator::default());
//!
//! let stats = session.run_until(async {
//!     let _ = tokio::signal::ctrl_c().await;
//! }).await;
//! println!("Frames forwarded: {}", stats.frames_forwarded);
//! # Ok(())
//! # }
//! ```

use std::future::Future;
use std::time::Duration;
use tokio::time::Instant;
use tracing::{debug, error, info, warn};

use crate::checksum::CrcValidator;
use crate::error::BridgeError;
use crate::framing::{AssemblerState, FrameAssembler, TimingProfile};
use crate::logging::{format_frame, log_frame, Direction};
use crate::serial::SerialLink;
use crate::transport::RadioTransport;
use crate::utils::{cooperative_delay, LatencyMetrics};
use crate::MIN_FRAME_LEN;

/// What happened to a frame taken from the serial line
#[derive(Debug, Clone, PartialEq)]
pub enum RequestOutcome {
    /// Valid frame handed to the radio
    Forwarded { len: usize },
    /// Fewer than four bytes, discarded
    Flushed { len: usize },
    /// Trailing CRC did not match, discarded
    CrcError { expected: u16, actual: u16 },
    /// Valid frame the radio refused
    SendFailed { len: usize },
}

/// What happened to a frame received from the radio
#[derive(Debug, Clone, PartialEq)]
pub enum ReplyOutcome {
    /// Written to the serial line
    Relayed { len: usize, latency: Duration },
    /// Fewer than four bytes, dropped
    Ignored { len: usize },
    /// The radio frame did not parse
    ReceiveFailed,
    /// The serial line refused the reply
    WriteFailed { len: usize },
}

/// Result of one [`BridgeSession::poll_once`] iteration
#[derive(Debug, Clone, Default, PartialEq)]
pub struct CycleReport {
    /// Bytes read from the serial line this iteration
    pub bytes_read: usize,
    pub request: Option<RequestOutcome>,
    pub reply: Option<ReplyOutcome>,
}

impl CycleReport {
    /// Nothing moved in either direction
    pub fn is_idle(&self) -> bool {
        self.bytes_read == 0 && self.request.is_none() && self.reply.is_none()
    }
}

/// Bridge statistics
#[derive(Debug, Clone, Default, PartialEq)]
pub struct BridgeStats {
    pub frames_forwarded: u64,
    pub frames_flushed: u64,
    pub crc_errors: u64,
    pub send_failures: u64,
    pub replies_relayed: u64,
    pub replies_ignored: u64,
    pub receive_errors: u64,
    pub serial_errors: u64,
    pub latency: LatencyMetrics,
}

/// One serial line bridged to one radio transport for the life of the process
pub struct BridgeSession<S: SerialLink, T: RadioTransport> {
    serial: S,
    transport: T,
    assembler: FrameAssembler,
    validator: CrcValidator,
    read_buf: Vec<u8>,
    frame_buf: Vec<u8>,
    reply_buf: Vec<u8>,
    request_at: Option<Instant>,
    started_at: Instant,
    stats: BridgeStats,
}

impl<S: SerialLink, T: RadioTransport> BridgeSession<S, T> {
    /// Build a session; buffers are sized to the transport's maximum frame
    pub fn new(serial: S, transport: T, timing: TimingProfile, validator: CrcValidator) -> Self {
        let capacity = transport.max_message_len();
        info!(
            "Bridge session: char interval {}us, frame interval {}us, max frame {} bytes",
            timing.char_interval().as_micros(),
            timing.frame_interval().as_micros(),
            capacity
        );

        Self {
            serial,
            transport,
            assembler: FrameAssembler::new(timing, capacity),
            validator,
            read_buf: vec![0; capacity],
            frame_buf: Vec::with_capacity(capacity),
            reply_buf: vec![0; capacity],
            request_at: None,
            started_at: Instant::now(),
            stats: BridgeStats::default(),
        }
    }

    pub fn stats(&self) -> &BridgeStats {
        &self.stats
    }

    pub fn serial(&self) -> &S {
        &self.serial
    }

    pub fn transport(&self) -> &T {
        &self.transport
    }

    pub fn assembler(&self) -> &FrameAssembler {
        &self.assembler
    }

    /// Give the peripherals back
    pub fn into_parts(self) -> (S, T) {
        (self.serial, self.transport)
    }

    /// Run one loop iteration
    pub async fn poll_once(&mut self) -> CycleReport {
        let mut report = CycleReport::default();

        // A frame whose silence already elapsed is taken before new bytes
        // are appended, or the next request would merge into it
        if self.assembler.state(Instant::now()) != AssemblerState::Ready {
            report.bytes_read = self.pump_serial().await;
        }

        if let Some(len) = self.assembler.poll(Instant::now(), &mut self.frame_buf) {
            debug!("Candidate frame of {} bytes", len);
            report.request = Some(self.handle_request().await);
            if report.bytes_read == 0 {
                report.bytes_read = self.pump_serial().await;
            }
        }

        report.reply = self.pump_radio().await;
        report
    }

    /// Loop until `shutdown` completes and return the final statistics
    pub async fn run_until<F: Future<Output = ()>>(&mut self, shutdown: F) -> BridgeStats {
        tokio::pin!(shutdown);

        loop {
            self.poll_once().await;

            let delay = self.assembler.poll_delay(Instant::now());
            tokio::select! {
                biased;
                _ = &mut shutdown => break,
                _ = cooperative_delay(delay) => {}
            }
        }

        info!("Bridge loop stopped after {:?}", self.started_at.elapsed());
        self.stats.clone()
    }

    /// Move whatever the serial line holds into the assembler
    async fn pump_serial(&mut self) -> usize {
        let pending = match self.serial.available() {
            Ok(pending) => pending,
            Err(e) => {
                self.stats.serial_errors += 1;
                error!("Serial status failed: {}", e);
                return 0;
            }
        };
        if pending == 0 {
            return 0;
        }

        let wanted = pending.min(self.read_buf.len());
        match self.serial.read(&mut self.read_buf[..wanted]).await {
            Ok(read) => {
                self.assembler.push(&self.read_buf[..read], Instant::now());
                read
            }
            Err(e) => {
                self.stats.serial_errors += 1;
                error!("Serial read failed: {}", e);
                0
            }
        }
    }

    async fn handle_request(&mut self) -> RequestOutcome {
        let len = self.frame_buf.len();

        if len < MIN_FRAME_LEN {
            self.stats.frames_flushed += 1;
            warn!("Message flushed > {}", format_frame(Direction::Outbound, &self.frame_buf));
            return RequestOutcome::Flushed { len };
        }

        if let Err(err) = self.validator.check(&self.frame_buf) {
            self.stats.crc_errors += 1;
            warn!("CRC error > {}", format_frame(Direction::Outbound, &self.frame_buf));
            return match err {
                BridgeError::CrcMismatch { expected, actual } => {
                    debug!("{}", err);
                    RequestOutcome::CrcError { expected, actual }
                }
                other => {
                    debug!("Frame rejected: {}", other);
                    RequestOutcome::Flushed { len }
                }
            };
        }

        self.request_at = Some(Instant::now());
        log_frame(Direction::Outbound, &self.frame_buf);

        match self.transport.send(&self.frame_buf).await {
            Ok(()) => {
                self.stats.frames_forwarded += 1;
                RequestOutcome::Forwarded { len }
            }
            Err(e) => {
                self.stats.send_failures += 1;
                error!("Send failed: {}", e);
                RequestOutcome::SendFailed { len }
            }
        }
    }

    /// Relay one pending radio frame to the serial line
    async fn pump_radio(&mut self) -> Option<ReplyOutcome> {
        match self.transport.available() {
            Ok(true) => {}
            Ok(false) => return None,
            Err(e) => {
                self.stats.receive_errors += 1;
                error!("Radio status failed: {}", e);
                return Some(ReplyOutcome::ReceiveFailed);
            }
        }

        let len = match self.transport.recv(&mut self.reply_buf) {
            Ok(Some(len)) => len,
            Ok(None) => return None,
            Err(e) => {
                self.stats.receive_errors += 1;
                error!("Receive failed: {}", e);
                return Some(ReplyOutcome::ReceiveFailed);
            }
        };

        let reply = &self.reply_buf[..len];
        if len < MIN_FRAME_LEN {
            self.stats.replies_ignored += 1;
            debug!("Ignored {} byte radio frame {}", len, format_frame(Direction::Inbound, reply));
            return Some(ReplyOutcome::Ignored { len });
        }

        let written = match self.serial.write(reply).await {
            Ok(()) => self.serial.flush().await,
            Err(e) => Err(e),
        };
        if let Err(e) = written {
            self.stats.serial_errors += 1;
            error!("Serial write failed: {}", e);
            return Some(ReplyOutcome::WriteFailed { len });
        }

        let latency = self.request_at.unwrap_or(self.started_at).elapsed();
        self.stats.replies_relayed += 1;
        self.stats.latency.record(latency);

        log_frame(Direction::Inbound, reply);
        info!("Reply time: {}ms", latency.as_millis());

        Some(ReplyOutcome::Relayed { len, latency })
    }
}
