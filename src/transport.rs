//! # Radio Transport Layer
//!
//! The bridge forwards validated RTU frames through a [`RadioTransport`] and
//! never looks below it. Two implementations compose:
//!
//! ### Plain (`PlainTransport`)
//! - Delegates packet send/receive to a [`RadioModem`]
//! - Lights the optional Tx/Rx [`Indicator`]s around each modem call
//! - Indicator failures are logged and never fail the data path
//!
//! ### Encrypted (`EncryptingTransport`)
//! - Decorates any transport with AES-128
//! - Wire format compatible with RadioHead's `RHEncryptedDriver` in strict
//!   length mode: `[len] ++ payload`, zero padded to 16-byte blocks, each
//!   block encrypted independently
//!
//! [`LinkTransport`] is the closed set the binary picks from at startup.
//!
//! ## Usage
//!
//! ```rust,no_run
//! use voltage_rtu_bridge::radio::{Rf95Modem, RadioModem, RegisterBus};
//! use voltage_rtu_bridge::transport::{LinkTransport, PlainTransport, RadioTransport, parse_key};
//!
//! # async fn example<B: RegisterBus + 'static>(bus: B) -> Result<(), Box<dyn std::error::Error>> {
//! let mut modem = Rf95Modem::new(bus);
//! modem.init().await?;
//!
//! let key = parse_key("hex:000102030405060708090a0b0c0d0e0f")?;
//! let mut link = LinkTransport::new(PlainTransport::new(modem), Some(&key))?;
//!
//! link.send(&[0x01, 0x03, 0x00, 0x00, 0x00, 0x0A, 0xC5, 0xCD]).await?;
//!
//! let stats = link.get_stats();
//! println!("Frames sent: {}", stats.frames_sent);
//! # Ok(())
//! # }
//! ```

use aes::Aes128;
use aes::cipher::{BlockDecrypt, BlockEncrypt, KeyInit};
use aes::cipher::generic_array::GenericArray;
use async_trait::async_trait;
use tracing::{debug, error, warn};

use crate::error::{BridgeError, BridgeResult};
use crate::indicator::{ActivityIndicator, Indicator};
use crate::radio::RadioModem;

/// AES block and key size in bytes
pub const AES_BLOCK_LEN: usize = 16;

/// Prefix selecting a hexadecimal key
const HEX_KEY_PREFIX: &str = "hex:";

/// Byte-oriented link to the remote bridge
#[async_trait]
pub trait RadioTransport: Send {
    /// Transmit one frame
    ///
    /// Failures are reported to the caller and never retried here.
    async fn send(&mut self, frame: &[u8]) -> BridgeResult<()>;

    /// Non-blocking check for a pending inbound frame
    fn available(&mut self) -> BridgeResult<bool>;

    /// Non-blocking receive into `buf`
    ///
    /// `Ok(None)` when nothing is ready. A peer frame that does not parse at
    /// this layer is an `Err`.
    fn recv(&mut self, buf: &mut [u8]) -> BridgeResult<Option<usize>>;

    /// Largest frame accepted by [`send`](Self::send)
    fn max_message_len(&self) -> usize;

    /// Traffic counters
    fn get_stats(&self) -> TransportStats;
}

/// Transport layer statistics
#[derive(Debug, Clone, Default, PartialEq)]
pub struct TransportStats {
    pub frames_sent: u64,
    pub frames_received: u64,
    pub send_failures: u64,
    pub receive_errors: u64,
    pub bytes_sent: u64,
    pub bytes_received: u64,
}

/// Switch an optional indicator; hardware errors are only logged
fn indicate(indicator: &mut Option<Indicator>, on: bool, role: &str) {
    if let Some(led) = indicator {
        if let Err(e) = led.set_state(on) {
            warn!("{} indicator: {}", role, e);
        }
    }
}

/// Transport that hands frames straight to the radio modem
pub struct PlainTransport<M: RadioModem> {
    modem: M,
    tx_indicator: Option<Indicator>,
    rx_indicator: Option<Indicator>,
    stats: TransportStats,
}

impl<M: RadioModem> PlainTransport<M> {
    pub fn new(modem: M) -> Self {
        Self {
            modem,
            tx_indicator: None,
            rx_indicator: None,
            stats: TransportStats::default(),
        }
    }

    /// Attach activity indicators; each one is initialised (output, off)
    pub fn with_indicators(
        mut self,
        tx_indicator: Option<Indicator>,
        rx_indicator: Option<Indicator>,
    ) -> BridgeResult<Self> {
        for led in [&tx_indicator, &rx_indicator].into_iter().flatten() {
            debug!("Activity indicator attached (active {})", if led.polarity() { "high" } else { "low" });
        }

        self.tx_indicator = tx_indicator;
        self.rx_indicator = rx_indicator;
        if let Some(led) = self.tx_indicator.as_mut() {
            led.begin()?;
        }
        if let Some(led) = self.rx_indicator.as_mut() {
            led.begin()?;
        }
        Ok(self)
    }

    pub fn modem(&self) -> &M {
        &self.modem
    }

    pub fn modem_mut(&mut self) -> &mut M {
        &mut self.modem
    }

    pub fn tx_indicator(&self) -> Option<&Indicator> {
        self.tx_indicator.as_ref()
    }

    pub fn rx_indicator(&self) -> Option<&Indicator> {
        self.rx_indicator.as_ref()
    }
}

#[async_trait]
impl<M: RadioModem> RadioTransport for PlainTransport<M> {
    async fn send(&mut self, frame: &[u8]) -> BridgeResult<()> {
        indicate(&mut self.tx_indicator, true, "Tx");
        let result = self.modem.send(frame).await;
        indicate(&mut self.tx_indicator, false, "Tx");

        match result {
            Ok(()) => {
                self.stats.frames_sent += 1;
                self.stats.bytes_sent += frame.len() as u64;
                Ok(())
            }
            Err(e) => {
                self.stats.send_failures += 1;
                error!("Radio send failed: {}", e);
                Err(e)
            }
        }
    }

    fn available(&mut self) -> BridgeResult<bool> {
        self.modem.available()
    }

    fn recv(&mut self, buf: &mut [u8]) -> BridgeResult<Option<usize>> {
        indicate(&mut self.rx_indicator, true, "Rx");
        let result = self.modem.recv(buf);
        indicate(&mut self.rx_indicator, false, "Rx");

        match result {
            Ok(Some(len)) => {
                self.stats.frames_received += 1;
                self.stats.bytes_received += len as u64;
                Ok(Some(len))
            }
            Ok(None) => Ok(None),
            Err(e) => {
                self.stats.receive_errors += 1;
                error!("Radio receive failed: {}", e);
                Err(e)
            }
        }
    }

    fn max_message_len(&self) -> usize {
        self.modem.max_message_len()
    }

    fn get_stats(&self) -> TransportStats {
        self.stats.clone()
    }
}

/// Parse a key given as 16 ASCII characters or as `hex:` plus 32 hex digits
pub fn parse_key(text: &str) -> BridgeResult<[u8; AES_BLOCK_LEN]> {
    let bytes = match text.strip_prefix(HEX_KEY_PREFIX) {
        Some(digits) => hex::decode(digits).map_err(|e| {
            BridgeError::configuration(format!("Unable to set secret key: {}", e))
        })?,
        None => text.as_bytes().to_vec(),
    };

    bytes.as_slice().try_into().map_err(|_| {
        BridgeError::configuration(format!(
            "Unable to set secret key: expected {} bytes, got {}",
            AES_BLOCK_LEN,
            bytes.len()
        ))
    })
}

/// AES-128 decorator over another transport
pub struct EncryptingTransport<T: RadioTransport> {
    inner: T,
    cipher: Aes128,
    scratch: Vec<u8>,
    stats: TransportStats,
}

impl<T: RadioTransport> EncryptingTransport<T> {
    /// Wrap `inner`; the key must be exactly 16 bytes
    pub fn new(inner: T, key: &[u8]) -> BridgeResult<Self> {
        if key.len() != AES_BLOCK_LEN {
            return Err(BridgeError::configuration(format!(
                "Unable to set secret key: expected {} bytes, got {}",
                AES_BLOCK_LEN,
                key.len()
            )));
        }

        let cipher = Aes128::new_from_slice(key)
            .map_err(|e| BridgeError::configuration(format!("Unable to set secret key: {}", e)))?;
        let scratch = Vec::with_capacity(inner.max_message_len());

        Ok(Self {
            inner,
            cipher,
            scratch,
            stats: TransportStats::default(),
        })
    }

    pub fn inner(&self) -> &T {
        &self.inner
    }

    pub fn inner_mut(&mut self) -> &mut T {
        &mut self.inner
    }

    /// Build the padded ciphertext for `payload` in `scratch`
    fn seal(&mut self, payload: &[u8]) {
        let padded = (payload.len() + 1).div_ceil(AES_BLOCK_LEN) * AES_BLOCK_LEN;
        self.scratch.clear();
        self.scratch.push(payload.len() as u8);
        self.scratch.extend_from_slice(payload);
        self.scratch.resize(padded, 0);

        for block in self.scratch.chunks_exact_mut(AES_BLOCK_LEN) {
            self.cipher.encrypt_block(GenericArray::from_mut_slice(block));
        }
    }

    /// Decrypt `scratch[..len]` in place and return the payload length
    fn open(&mut self, len: usize) -> BridgeResult<usize> {
        if len == 0 || len % AES_BLOCK_LEN != 0 {
            return Err(BridgeError::transport(format!(
                "encrypted frame of {} bytes is not a whole number of blocks", len
            )));
        }

        for block in self.scratch[..len].chunks_exact_mut(AES_BLOCK_LEN) {
            self.cipher.decrypt_block(GenericArray::from_mut_slice(block));
        }

        let payload_len = self.scratch[0] as usize;
        if payload_len + 1 > len {
            return Err(BridgeError::transport(format!(
                "decrypted length {} does not fit {} byte frame", payload_len, len
            )));
        }
        Ok(payload_len)
    }
}

#[async_trait]
impl<T: RadioTransport> RadioTransport for EncryptingTransport<T> {
    async fn send(&mut self, frame: &[u8]) -> BridgeResult<()> {
        if frame.len() > self.max_message_len() {
            self.stats.send_failures += 1;
            return Err(BridgeError::transport(format!(
                "frame of {} bytes exceeds encrypted maximum of {}",
                frame.len(),
                self.max_message_len()
            )));
        }

        self.seal(frame);
        match self.inner.send(&self.scratch).await {
            Ok(()) => {
                self.stats.frames_sent += 1;
                self.stats.bytes_sent += frame.len() as u64;
                Ok(())
            }
            Err(e) => {
                self.stats.send_failures += 1;
                Err(e)
            }
        }
    }

    fn available(&mut self) -> BridgeResult<bool> {
        self.inner.available()
    }

    fn recv(&mut self, buf: &mut [u8]) -> BridgeResult<Option<usize>> {
        let capacity = self.inner.max_message_len();
        self.scratch.resize(capacity, 0);

        let len = match self.inner.recv(&mut self.scratch) {
            Ok(Some(len)) => len,
            Ok(None) => return Ok(None),
            Err(e) => {
                self.stats.receive_errors += 1;
                return Err(e);
            }
        };

        let payload_len = match self.open(len) {
            Ok(payload_len) => payload_len,
            Err(e) => {
                self.stats.receive_errors += 1;
                warn!("Dropped radio frame: {}", e);
                return Err(e);
            }
        };

        let copied = payload_len.min(buf.len());
        buf[..copied].copy_from_slice(&self.scratch[1..1 + copied]);
        self.stats.frames_received += 1;
        self.stats.bytes_received += copied as u64;
        Ok(Some(copied))
    }

    fn max_message_len(&self) -> usize {
        // The length prefix is a single byte
        (self.inner.max_message_len() / AES_BLOCK_LEN * AES_BLOCK_LEN)
            .saturating_sub(1)
            .min(u8::MAX as usize)
    }

    fn get_stats(&self) -> TransportStats {
        self.stats.clone()
    }
}

/// Transport chosen at startup: plain, or encrypted when a key is configured
pub enum LinkTransport<M: RadioModem> {
    Plain(PlainTransport<M>),
    Encrypted(EncryptingTransport<PlainTransport<M>>),
}

impl<M: RadioModem> LinkTransport<M> {
    pub fn new(plain: PlainTransport<M>, key: Option<&[u8]>) -> BridgeResult<Self> {
        match key {
            Some(key) => Ok(Self::Encrypted(EncryptingTransport::new(plain, key)?)),
            None => Ok(Self::Plain(plain)),
        }
    }

    pub fn is_encrypted(&self) -> bool {
        matches!(self, Self::Encrypted(_))
    }

    /// The radio-facing transport underneath any decorator
    pub fn plain(&self) -> &PlainTransport<M> {
        match self {
            Self::Plain(plain) => plain,
            Self::Encrypted(encrypted) => encrypted.inner(),
        }
    }
}

#[async_trait]
impl<M: RadioModem> RadioTransport for LinkTransport<M> {
    async fn send(&mut self, frame: &[u8]) -> BridgeResult<()> {
        match self {
            Self::Plain(link) => link.send(frame).await,
            Self::Encrypted(link) => link.send(frame).await,
        }
    }

    fn available(&mut self) -> BridgeResult<bool> {
        match self {
            Self::Plain(link) => link.available(),
            Self::Encrypted(link) => link.available(),
        }
    }

    fn recv(&mut self, buf: &mut [u8]) -> BridgeResult<Option<usize>> {
        match self {
            Self::Plain(link) => link.recv(buf),
            Self::Encrypted(link) => link.recv(buf),
        }
    }

    fn max_message_len(&self) -> usize {
        match self {
            Self::Plain(link) => link.max_message_len(),
            Self::Encrypted(link) => link.max_message_len(),
        }
    }

    fn get_stats(&self) -> TransportStats {
        match self {
            Self::Plain(link) => link.get_stats(),
            Self::Encrypted(link) => link.get_stats(),
        }
    }
}

#[cfg(test)]
pub(crate) mod tests {
    use super::*;
    use std::collections::VecDeque;
    use std::sync::{Arc, Mutex};
    use rand::{Rng, SeedableRng};
    use rand::rngs::StdRng;
    use tracing_test::traced_test;

    use crate::indicator::{DigitalPin, GpioIndicator};
    use crate::radio::RF95_MAX_MESSAGE_LEN;

    /// Modem double: sent packets are recorded, inbound packets are queued
    #[derive(Clone, Default)]
    pub(crate) struct QueueModem {
        pub sent: Arc<Mutex<Vec<Vec<u8>>>>,
        pub inbound: Arc<Mutex<VecDeque<Vec<u8>>>>,
        pub fail_send: bool,
        pub max_len: Option<usize>,
    }

    impl QueueModem {
        pub fn push_inbound(&self, packet: &[u8]) {
            self.inbound.lock().unwrap().push_back(packet.to_vec());
        }

        pub fn sent(&self) -> Vec<Vec<u8>> {
            self.sent.lock().unwrap().clone()
        }
    }

    #[async_trait]
    impl RadioModem for QueueModem {
        async fn init(&mut self) -> BridgeResult<()> {
            Ok(())
        }

        fn set_frequency(&mut self, _mhz: f32) -> BridgeResult<()> {
            Ok(())
        }

        fn set_tx_power(&mut self, _dbm: i8) -> BridgeResult<()> {
            Ok(())
        }

        fn set_spreading_factor(&mut self, _sf: u8) -> BridgeResult<()> {
            Ok(())
        }

        fn set_signal_bandwidth(&mut self, _hz: u32) -> BridgeResult<()> {
            Ok(())
        }

        fn set_coding_rate4(&mut self, _denominator: u8) -> BridgeResult<()> {
            Ok(())
        }

        async fn send(&mut self, payload: &[u8]) -> BridgeResult<()> {
            if self.fail_send {
                return Err(BridgeError::transport("modem busy"));
            }
            self.sent.lock().unwrap().push(payload.to_vec());
            Ok(())
        }

        fn available(&mut self) -> BridgeResult<bool> {
            Ok(!self.inbound.lock().unwrap().is_empty())
        }

        fn recv(&mut self, buf: &mut [u8]) -> BridgeResult<Option<usize>> {
            match self.inbound.lock().unwrap().pop_front() {
                Some(packet) => {
                    let len = packet.len().min(buf.len());
                    buf[..len].copy_from_slice(&packet[..len]);
                    Ok(Some(len))
                }
                None => Ok(None),
            }
        }

        fn max_message_len(&self) -> usize {
            self.max_len.unwrap_or(RF95_MAX_MESSAGE_LEN)
        }
    }

    /// Pin recording every level written to it
    #[derive(Clone, Default)]
    struct HistoryPin {
        levels: Arc<Mutex<Vec<bool>>>,
        broken: bool,
    }

    impl DigitalPin for HistoryPin {
        fn set_output(&mut self) -> BridgeResult<()> {
            Ok(())
        }

        fn write(&mut self, high: bool) -> BridgeResult<()> {
            if self.broken {
                return Err(BridgeError::device("pin driver gone"));
            }
            self.levels.lock().unwrap().push(high);
            Ok(())
        }

        fn read(&self) -> BridgeResult<bool> {
            Ok(self.levels.lock().unwrap().last().copied().unwrap_or(false))
        }
    }

    fn gpio_indicator(pin: &HistoryPin) -> Indicator {
        Indicator::Gpio(GpioIndicator::new(Box::new(pin.clone()) as Box<dyn DigitalPin>, true))
    }

    const KEY: &[u8; 16] = b"0123456789ABCDEF";

    #[tokio::test]
    async fn test_plain_send_blinks_tx_indicator() {
        let modem = QueueModem::default();
        let tx_pin = HistoryPin::default();
        let rx_pin = HistoryPin::default();
        let mut link = PlainTransport::new(modem.clone())
            .with_indicators(Some(gpio_indicator(&tx_pin)), Some(gpio_indicator(&rx_pin)))
            .unwrap();

        let frame = [0x01, 0x03, 0x00, 0x00, 0x00, 0x0A, 0xC5, 0xCD];
        link.send(&frame).await.unwrap();

        assert_eq!(modem.sent(), vec![frame.to_vec()]);
        // begin() forces off, then on/off around the send
        assert_eq!(*tx_pin.levels.lock().unwrap(), vec![false, true, false]);
        assert_eq!(*rx_pin.levels.lock().unwrap(), vec![false]);

        let stats = link.get_stats();
        assert_eq!(stats.frames_sent, 1);
        assert_eq!(stats.bytes_sent, 8);
    }

    #[test]
    fn test_plain_recv_blinks_rx_indicator() {
        let modem = QueueModem::default();
        let rx_pin = HistoryPin::default();
        let mut link = PlainTransport::new(modem.clone())
            .with_indicators(None, Some(gpio_indicator(&rx_pin)))
            .unwrap();

        assert!(!link.available().unwrap());
        modem.push_inbound(&[0x01, 0x06, 0x00, 0x01]);
        assert!(link.available().unwrap());

        let mut buf = [0u8; 32];
        assert_eq!(link.recv(&mut buf).unwrap(), Some(4));
        assert_eq!(&buf[..4], &[0x01, 0x06, 0x00, 0x01]);
        assert_eq!(*rx_pin.levels.lock().unwrap(), vec![false, true, false]);
        assert_eq!(link.get_stats().frames_received, 1);
    }

    #[tokio::test]
    #[traced_test]
    async fn test_indicator_failure_does_not_fail_send() {
        let modem = QueueModem::default();
        let mut link = PlainTransport::new(modem.clone());
        link.tx_indicator = Some(gpio_indicator(&HistoryPin { broken: true, ..HistoryPin::default() }));

        link.send(&[0x01, 0x02, 0x03, 0x04]).await.unwrap();
        assert_eq!(modem.sent().len(), 1);
        assert!(logs_contain("Tx indicator"));
    }

    #[tokio::test]
    async fn test_plain_send_failure_is_counted() {
        let modem = QueueModem { fail_send: true, ..QueueModem::default() };
        let mut link = PlainTransport::new(modem);

        assert!(link.send(&[0x01, 0x02, 0x03, 0x04]).await.is_err());
        assert_eq!(link.get_stats().send_failures, 1);
    }

    #[test]
    fn test_parse_key_forms() {
        assert_eq!(&parse_key("0123456789ABCDEF").unwrap(), KEY);
        assert_eq!(
            parse_key("hex:000102030405060708090a0b0c0d0e0f").unwrap(),
            [0, 1, 2, 3, 4, 5, 6, 7, 8, 9, 10, 11, 12, 13, 14, 15]
        );
        assert!(parse_key("too short").unwrap_err().is_fatal());
        assert!(parse_key("hex:0001").is_err());
        assert!(parse_key("hex:zz0102030405060708090a0b0c0d0e0f").is_err());
    }

    #[test]
    fn test_bad_key_length_is_configuration_error() {
        for len in [0usize, 15, 17, 32] {
            let key = vec![0x42u8; len];
            let err = EncryptingTransport::new(PlainTransport::new(QueueModem::default()), &key)
                .err()
                .unwrap();
            assert!(matches!(err, BridgeError::Configuration { .. }));
        }
    }

    #[test]
    fn test_encrypted_max_message_len() {
        let link = EncryptingTransport::new(PlainTransport::new(QueueModem::default()), KEY).unwrap();
        // 251 rounds down to 240 bytes of blocks, one byte goes to the length
        assert_eq!(link.max_message_len(), 239);
    }

    #[tokio::test]
    async fn test_encrypted_max_len_fits_length_prefix() {
        let modem = QueueModem { max_len: Some(512), ..QueueModem::default() };
        let mut link = EncryptingTransport::new(PlainTransport::new(modem.clone()), KEY).unwrap();
        assert_eq!(link.max_message_len(), 255);

        let payload: Vec<u8> = (0..255u32).map(|i| i as u8).collect();
        link.send(&payload).await.unwrap();
        let packet = modem.sent.lock().unwrap().pop().unwrap();
        assert_eq!(packet.len(), 256);

        modem.push_inbound(&packet);
        let mut buf = vec![0u8; 512];
        assert_eq!(link.recv(&mut buf).unwrap(), Some(255));
        assert_eq!(&buf[..255], &payload[..]);

        assert!(link.send(&[0x55; 300]).await.is_err());
        assert_eq!(link.get_stats().send_failures, 1);
        assert!(modem.sent().is_empty());
    }

    #[tokio::test]
    async fn test_ciphertext_layout() {
        let modem = QueueModem::default();
        let mut link = EncryptingTransport::new(PlainTransport::new(modem.clone()), KEY).unwrap();

        link.send(&[0xAA; 15]).await.unwrap();
        link.send(&[0xAA; 16]).await.unwrap();

        let sent = modem.sent();
        assert_eq!(sent[0].len(), 16);
        assert_eq!(sent[1].len(), 32);
        assert_ne!(&sent[0][1..], &[0xAA; 15][..]);
    }

    #[tokio::test]
    async fn test_encrypt_decrypt_identity_for_all_lengths() {
        let mut rng = StdRng::seed_from_u64(0x5EED);
        let sender_modem = QueueModem::default();
        let receiver_modem = QueueModem::default();
        let mut sender = EncryptingTransport::new(PlainTransport::new(sender_modem.clone()), KEY).unwrap();
        let mut receiver = EncryptingTransport::new(PlainTransport::new(receiver_modem.clone()), KEY).unwrap();

        let mut buf = vec![0u8; 256];
        for len in 0..=sender.max_message_len() {
            let payload: Vec<u8> = (0..len).map(|_| rng.gen()).collect();
            sender.send(&payload).await.unwrap();

            let packet = sender_modem.sent.lock().unwrap().pop().unwrap();
            receiver_modem.push_inbound(&packet);

            assert_eq!(receiver.recv(&mut buf).unwrap(), Some(len));
            assert_eq!(&buf[..len], &payload[..]);
        }
    }

    #[tokio::test]
    async fn test_oversized_frame_rejected() {
        let mut link = EncryptingTransport::new(PlainTransport::new(QueueModem::default()), KEY).unwrap();
        let frame = vec![0u8; 240];
        assert!(link.send(&frame).await.is_err());
        assert_eq!(link.get_stats().send_failures, 1);
    }

    #[test]
    fn test_malformed_ciphertext_is_transport_error() {
        let modem = QueueModem::default();
        let mut link = EncryptingTransport::new(PlainTransport::new(modem.clone()), KEY).unwrap();
        let mut buf = [0u8; 64];

        modem.push_inbound(&[0x11; 10]);
        let err = link.recv(&mut buf).unwrap_err();
        assert!(err.is_transport_error());

        // Decrypts to a length byte that overruns the frame
        let mut block = [0xF0u8; 16];
        Aes128::new_from_slice(KEY)
            .unwrap()
            .encrypt_block(GenericArray::from_mut_slice(&mut block));
        modem.push_inbound(&block);
        assert!(link.recv(&mut buf).is_err());

        assert_eq!(link.get_stats().receive_errors, 2);
        assert_eq!(link.recv(&mut buf).unwrap(), None);
    }

    #[tokio::test]
    async fn test_link_transport_selection() {
        let modem = QueueModem::default();
        let mut plain = LinkTransport::new(PlainTransport::new(modem.clone()), None).unwrap();
        assert!(!plain.is_encrypted());
        assert_eq!(plain.max_message_len(), RF95_MAX_MESSAGE_LEN);
        plain.send(&[1, 2, 3, 4]).await.unwrap();
        assert_eq!(modem.sent()[0], vec![1, 2, 3, 4]);

        let mut encrypted = LinkTransport::new(PlainTransport::new(modem.clone()), Some(KEY)).unwrap();
        assert!(encrypted.is_encrypted());
        encrypted.send(&[1, 2, 3, 4]).await.unwrap();
        assert_eq!(modem.sent()[1].len(), 16);
        assert_eq!(encrypted.plain().get_stats().frames_sent, 1);
    }
}
