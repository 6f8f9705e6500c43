/// Modbus RTU frame reconstruction from a raw serial byte stream
///
/// RTU frames carry no delimiters: a frame ends when the line has been silent
/// for at least 3.5 character times. [`TimingProfile`] derives the intervals
/// from the baud rate and [`FrameAssembler`] applies them to timestamped
/// byte bursts.

use std::time::Duration;
use tokio::time::Instant;
use tracing::{debug, trace, warn};

use crate::error::{BridgeError, BridgeResult};

/// Above this baud rate the inter-character and inter-frame intervals are fixed
pub const FIXED_TIMING_BAUD_THRESHOLD: u32 = 19_200;

/// Fixed 1.5 character interval for fast links (µs)
pub const FIXED_CHAR_INTERVAL_US: u64 = 750;

/// Fixed 3.5 character interval for fast links (µs)
pub const FIXED_FRAME_INTERVAL_US: u64 = 1_750;

/// Silence intervals for one serial configuration
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct TimingProfile {
    char_interval: Duration,
    frame_interval: Duration,
}

impl TimingProfile {
    /// Derive intervals from the baud rate
    ///
    /// One character is 11 bits (start, 8 data, parity, stop), so 1.5T is
    /// `16_500_000 / baud` µs and 3.5T is `38_500_000 / baud` µs. Above
    /// 19200 Bd the Modbus serial line guide fixes them at 750 µs and 1750 µs.
    pub fn from_baud_rate(baud_rate: u32) -> BridgeResult<Self> {
        if baud_rate == 0 {
            return Err(BridgeError::configuration("baud rate must be greater than zero"));
        }

        if baud_rate > FIXED_TIMING_BAUD_THRESHOLD {
            return Self::from_micros(FIXED_CHAR_INTERVAL_US, FIXED_FRAME_INTERVAL_US);
        }

        let baud = baud_rate as u64;
        Self::from_micros(16_500_000 / baud, 38_500_000 / baud)
    }

    /// Build a profile from explicit intervals in microseconds
    pub fn from_micros(char_interval_us: u64, frame_interval_us: u64) -> BridgeResult<Self> {
        if char_interval_us == 0 || char_interval_us >= frame_interval_us {
            return Err(BridgeError::configuration(format!(
                "character interval ({}us) must be non-zero and shorter than frame interval ({}us)",
                char_interval_us, frame_interval_us
            )));
        }

        Ok(Self {
            char_interval: Duration::from_micros(char_interval_us),
            frame_interval: Duration::from_micros(frame_interval_us),
        })
    }

    /// Maximum gap between two bytes of the same frame
    pub fn char_interval(&self) -> Duration {
        self.char_interval
    }

    /// Minimum silence that terminates a frame
    pub fn frame_interval(&self) -> Duration {
        self.frame_interval
    }
}

/// Observable state of the assembler
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum AssemblerState {
    /// Nothing buffered
    Idle,
    /// Bytes buffered, silence clock running
    Accumulating,
    /// Silence reached the frame interval, frame can be taken
    Ready,
}

/// Silence-timed frame accumulator
///
/// The buffer is allocated once with the transport's maximum payload length
/// and reused for every frame.
#[derive(Debug)]
pub struct FrameAssembler {
    timing: TimingProfile,
    buffer: Vec<u8>,
    capacity: usize,
    last_byte_at: Option<Instant>,
    overflowed: usize,
}

impl FrameAssembler {
    /// Create an assembler holding at most `capacity` bytes per frame
    pub fn new(timing: TimingProfile, capacity: usize) -> Self {
        Self {
            timing,
            buffer: Vec::with_capacity(capacity),
            capacity,
            last_byte_at: None,
            overflowed: 0,
        }
    }

    /// Timing profile in use
    pub fn timing(&self) -> TimingProfile {
        self.timing
    }

    /// Maximum frame length
    pub fn capacity(&self) -> usize {
        self.capacity
    }

    /// Bytes currently buffered
    pub fn len(&self) -> usize {
        self.buffer.len()
    }

    /// Whether nothing is buffered
    pub fn is_empty(&self) -> bool {
        self.buffer.is_empty()
    }

    /// Bytes dropped from the current frame because it exceeded capacity
    pub fn overflowed(&self) -> usize {
        self.overflowed
    }

    /// Append a burst received at `now`; restarts the silence clock
    pub fn push(&mut self, bytes: &[u8], now: Instant) {
        if bytes.is_empty() {
            return;
        }

        let room = self.capacity - self.buffer.len();
        let taken = bytes.len().min(room);
        self.buffer.extend_from_slice(&bytes[..taken]);

        if taken < bytes.len() {
            self.overflowed += bytes.len() - taken;
            warn!(
                "Frame exceeds {} bytes, dropped {} byte(s)",
                self.capacity, bytes.len() - taken
            );
        }

        if let Some(previous) = self.last_byte_at {
            let gap = now.saturating_duration_since(previous);
            if gap > self.timing.char_interval {
                trace!("Inter-character gap {:?} above 1.5T inside frame", gap);
            }
        }

        self.last_byte_at = Some(now);
    }

    /// State of the assembler at `now`
    pub fn state(&self, now: Instant) -> AssemblerState {
        match self.last_byte_at {
            _ if self.buffer.is_empty() => AssemblerState::Idle,
            Some(last) if now.saturating_duration_since(last) >= self.timing.frame_interval => {
                AssemblerState::Ready
            }
            _ => AssemblerState::Accumulating,
        }
    }

    /// Move the buffered frame into `out` once silence reached the frame interval
    ///
    /// Returns the frame length. Taking a frame resets the assembler to Idle
    /// whatever the frame's length or CRC turn out to be.
    pub fn poll(&mut self, now: Instant, out: &mut Vec<u8>) -> Option<usize> {
        if self.state(now) != AssemblerState::Ready {
            return None;
        }

        debug!("Frame boundary after {} byte(s)", self.buffer.len());
        out.clear();
        out.extend_from_slice(&self.buffer);
        self.buffer.clear();
        self.last_byte_at = None;
        self.overflowed = 0;
        Some(out.len())
    }

    /// Delay before the loop should look at the serial side again
    ///
    /// Never longer than the character interval, never past the point where
    /// the pending frame becomes Ready.
    pub fn poll_delay(&self, now: Instant) -> Duration {
        match self.last_byte_at {
            Some(last) if !self.buffer.is_empty() => {
                let silence = now.saturating_duration_since(last);
                let remaining = self.timing.frame_interval.saturating_sub(silence);
                remaining.min(self.timing.char_interval)
            }
            _ => self.timing.char_interval,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    const REQUEST: [u8; 8] = [0x01, 0x03, 0x00, 0x00, 0x00, 0x0A, 0xC5, 0xCD];

    fn us(micros: u64) -> Duration {
        Duration::from_micros(micros)
    }

    #[test]
    fn test_timing_profile_slow_links() {
        let timing = TimingProfile::from_baud_rate(9600).unwrap();
        assert_eq!(timing.char_interval(), us(1718));
        assert_eq!(timing.frame_interval(), us(4010));

        let timing = TimingProfile::from_baud_rate(19200).unwrap();
        assert_eq!(timing.char_interval(), us(859));
        assert_eq!(timing.frame_interval(), us(2005));
    }

    #[test]
    fn test_timing_profile_fast_links() {
        for baud in [38400, 57600, 115200] {
            let timing = TimingProfile::from_baud_rate(baud).unwrap();
            assert_eq!(timing.char_interval(), us(FIXED_CHAR_INTERVAL_US));
            assert_eq!(timing.frame_interval(), us(FIXED_FRAME_INTERVAL_US));
        }
    }

    #[test]
    fn test_char_interval_always_shorter() {
        for baud in [300, 1200, 2400, 4800, 9600, 14400, 19200, 38400, 921600] {
            let timing = TimingProfile::from_baud_rate(baud).unwrap();
            assert!(timing.char_interval() < timing.frame_interval(), "baud {}", baud);
        }
    }

    #[test]
    fn test_invalid_profiles() {
        assert!(TimingProfile::from_baud_rate(0).is_err());
        assert!(TimingProfile::from_micros(2000, 1000).is_err());
        assert!(TimingProfile::from_micros(1000, 1000).is_err());
        assert!(TimingProfile::from_micros(0, 1000).is_err());
        assert!(TimingProfile::from_micros(500, 1000).is_ok());
    }

    #[test]
    fn test_never_ready_before_frame_interval() {
        let timing = TimingProfile::from_baud_rate(38400).unwrap();
        let mut assembler = FrameAssembler::new(timing, 256);
        let mut frame = Vec::new();
        let t0 = Instant::now();

        assert_eq!(assembler.state(t0), AssemblerState::Idle);
        assembler.push(&REQUEST, t0);
        assert_eq!(assembler.state(t0), AssemblerState::Accumulating);

        for offset in [0, 500, 1000, 1749] {
            assert_eq!(assembler.poll(t0 + us(offset), &mut frame), None);
        }

        assert_eq!(assembler.state(t0 + us(1750)), AssemblerState::Ready);
        assert_eq!(assembler.poll(t0 + us(1750), &mut frame), Some(8));
        assert_eq!(frame, REQUEST);
        assert_eq!(assembler.state(t0 + us(1750)), AssemblerState::Idle);
        assert!(assembler.is_empty());
    }

    #[test]
    fn test_bursts_within_char_interval_form_one_frame() {
        let timing = TimingProfile::from_baud_rate(9600).unwrap();
        let mut assembler = FrameAssembler::new(timing, 256);
        let mut frame = Vec::new();
        let t0 = Instant::now();

        assembler.push(&REQUEST[..3], t0);
        assembler.push(&REQUEST[3..5], t0 + us(1000));
        assembler.push(&REQUEST[5..], t0 + us(2000));

        // Silence is measured from the last burst
        assert_eq!(assembler.poll(t0 + us(4500), &mut frame), None);
        assert_eq!(assembler.poll(t0 + us(6010), &mut frame), Some(8));
        assert_eq!(frame, REQUEST);
    }

    #[test]
    fn test_gap_beyond_frame_interval_starts_new_frame() {
        let timing = TimingProfile::from_baud_rate(38400).unwrap();
        let mut assembler = FrameAssembler::new(timing, 256);
        let mut frame = Vec::new();
        let t0 = Instant::now();

        assembler.push(&[0x01, 0x02], t0);
        assert_eq!(assembler.poll(t0 + us(2000), &mut frame), Some(2));
        assert_eq!(frame, vec![0x01, 0x02]);

        assembler.push(&[0x03, 0x04, 0x05, 0x06], t0 + us(2100));
        assert_eq!(assembler.poll(t0 + us(3900), &mut frame), Some(4));
        assert_eq!(frame, vec![0x03, 0x04, 0x05, 0x06]);
    }

    #[test]
    fn test_short_run_still_emitted() {
        let timing = TimingProfile::from_baud_rate(38400).unwrap();
        let mut assembler = FrameAssembler::new(timing, 256);
        let mut frame = Vec::new();
        let t0 = Instant::now();

        assembler.push(&[0xAA], t0);
        assert_eq!(assembler.poll(t0 + us(1750), &mut frame), Some(1));
        assert_eq!(frame, vec![0xAA]);
    }

    #[test]
    fn test_overflow_is_truncated_and_counted() {
        let timing = TimingProfile::from_baud_rate(38400).unwrap();
        let mut assembler = FrameAssembler::new(timing, 4);
        let mut frame = Vec::new();
        let t0 = Instant::now();

        assembler.push(&[1, 2, 3], t0);
        assembler.push(&[4, 5, 6], t0 + us(100));
        assert_eq!(assembler.len(), 4);
        assert_eq!(assembler.overflowed(), 2);

        assert_eq!(assembler.poll(t0 + us(1850), &mut frame), Some(4));
        assert_eq!(frame, vec![1, 2, 3, 4]);
        assert_eq!(assembler.overflowed(), 0);
    }

    #[test]
    fn test_poll_delay_is_bounded() {
        let timing = TimingProfile::from_baud_rate(38400).unwrap();
        let mut assembler = FrameAssembler::new(timing, 256);
        let t0 = Instant::now();

        assert_eq!(assembler.poll_delay(t0), timing.char_interval());

        assembler.push(&[0x01], t0);
        assert_eq!(assembler.poll_delay(t0), timing.char_interval());
        assert_eq!(assembler.poll_delay(t0 + us(1500)), us(250));
        assert_eq!(assembler.poll_delay(t0 + us(5000)), Duration::ZERO);
    }
}
