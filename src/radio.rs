/// RF95 / SX127x LoRa modem driver
///
/// Packet-mode driver compatible with RadioHead's `RH_RF95`: every packet
/// carries the 4-byte `[to, from, id, flags]` header ahead of the payload,
/// the modem runs in LoRa mode with explicit header and payload CRC, and
/// the IRQ flags register is polled instead of wiring DIO0.
///
/// Register access goes through [`RegisterBus`] so the driver runs on
/// `spidev` in production and on an in-memory register file in tests.

use std::time::Duration;
use async_trait::async_trait;
use tokio::time::{sleep, Instant};
use tracing::{debug, trace, warn};

use crate::config::RadioConfig;
use crate::error::{BridgeError, BridgeResult};

// SX1276 LoRa-mode registers
const REG_FIFO: u8 = 0x00;
const REG_OP_MODE: u8 = 0x01;
const REG_FRF_MSB: u8 = 0x06;
const REG_FRF_MID: u8 = 0x07;
const REG_FRF_LSB: u8 = 0x08;
const REG_PA_CONFIG: u8 = 0x09;
const REG_FIFO_ADDR_PTR: u8 = 0x0D;
const REG_FIFO_TX_BASE_ADDR: u8 = 0x0E;
const REG_FIFO_RX_BASE_ADDR: u8 = 0x0F;
const REG_FIFO_RX_CURRENT_ADDR: u8 = 0x10;
const REG_IRQ_FLAGS: u8 = 0x12;
const REG_RX_NB_BYTES: u8 = 0x13;
const REG_PKT_RSSI_VALUE: u8 = 0x1A;
const REG_MODEM_CONFIG1: u8 = 0x1D;
const REG_MODEM_CONFIG2: u8 = 0x1E;
const REG_PREAMBLE_MSB: u8 = 0x20;
const REG_PREAMBLE_LSB: u8 = 0x21;
const REG_PAYLOAD_LENGTH: u8 = 0x22;
const REG_MODEM_CONFIG3: u8 = 0x26;
const REG_DIO_MAPPING1: u8 = 0x40;
const REG_VERSION: u8 = 0x42;
const REG_PA_DAC: u8 = 0x4D;

// REG_OP_MODE
const LONG_RANGE_MODE: u8 = 0x80;
const MODE_SLEEP: u8 = 0x00;
const MODE_STDBY: u8 = 0x01;
const MODE_TX: u8 = 0x03;
const MODE_RXCONTINUOUS: u8 = 0x05;

// REG_IRQ_FLAGS
const IRQ_RX_DONE: u8 = 0x40;
const IRQ_PAYLOAD_CRC_ERROR: u8 = 0x20;
const IRQ_TX_DONE: u8 = 0x08;
const IRQ_CLEAR_ALL: u8 = 0xFF;

// REG_MODEM_CONFIG2 / 3
const RX_PAYLOAD_CRC_ON: u8 = 0x04;
const LOW_DATA_RATE_OPTIMIZE: u8 = 0x08;
const AGC_AUTO_ON: u8 = 0x04;

// REG_PA_CONFIG / REG_PA_DAC
const PA_SELECT: u8 = 0x80;
const PA_DAC_ENABLE: u8 = 0x07;
const PA_DAC_DISABLE: u8 = 0x04;

/// Crystal frequency divided by 2^19
const FSTEP_HZ: f64 = 32_000_000.0 / 524_288.0;

/// Size of the modem FIFO
pub const RF95_FIFO_SIZE: usize = 255;

/// RadioHead header length
pub const RF95_HEADER_LEN: usize = 4;

/// Largest payload that fits in one packet after the header
pub const RF95_MAX_MESSAGE_LEN: usize = RF95_FIFO_SIZE - RF95_HEADER_LEN;

/// Header address that every node accepts
pub const RH_BROADCAST_ADDRESS: u8 = 0xFF;

/// Signal bandwidth steps and their REG_MODEM_CONFIG1 bits
const BANDWIDTHS: [(u32, u8); 10] = [
    (7_800, 0x00),
    (10_400, 0x10),
    (15_600, 0x20),
    (20_800, 0x30),
    (31_250, 0x40),
    (41_700, 0x50),
    (62_500, 0x60),
    (125_000, 0x70),
    (250_000, 0x80),
    (500_000, 0x90),
];

/// Register-level access to the modem
pub trait RegisterBus: Send {
    fn read_register(&mut self, reg: u8) -> BridgeResult<u8>;

    fn write_register(&mut self, reg: u8, value: u8) -> BridgeResult<()>;

    /// Read consecutive bytes from `reg` (FIFO reads do not auto-increment the address)
    fn read_burst(&mut self, reg: u8, buf: &mut [u8]) -> BridgeResult<()>;

    fn write_burst(&mut self, reg: u8, data: &[u8]) -> BridgeResult<()>;
}

impl RegisterBus for Box<dyn RegisterBus> {
    fn read_register(&mut self, reg: u8) -> BridgeResult<u8> {
        (**self).read_register(reg)
    }

    fn write_register(&mut self, reg: u8, value: u8) -> BridgeResult<()> {
        (**self).write_register(reg, value)
    }

    fn read_burst(&mut self, reg: u8, buf: &mut [u8]) -> BridgeResult<()> {
        (**self).read_burst(reg, buf)
    }

    fn write_burst(&mut self, reg: u8, data: &[u8]) -> BridgeResult<()> {
        (**self).write_burst(reg, data)
    }
}

/// Radio modem collaborator used by [`PlainTransport`](crate::transport::PlainTransport)
///
/// Besides packet send/receive the modem exposes the LoRa channel settings so
/// the bridge can apply them from configuration after [`init`](Self::init).
#[async_trait]
pub trait RadioModem: Send {
    /// Detect and reset the modem to its power-on LoRa defaults
    async fn init(&mut self) -> BridgeResult<()>;

    fn set_frequency(&mut self, mhz: f32) -> BridgeResult<()>;

    fn set_tx_power(&mut self, dbm: i8) -> BridgeResult<()>;

    fn set_spreading_factor(&mut self, sf: u8) -> BridgeResult<()>;

    fn set_signal_bandwidth(&mut self, hz: u32) -> BridgeResult<()>;

    /// Coding rate 4/`denominator`
    fn set_coding_rate4(&mut self, denominator: u8) -> BridgeResult<()>;

    /// Transmit one packet and wait until it left the antenna
    async fn send(&mut self, payload: &[u8]) -> BridgeResult<()>;

    /// Non-blocking check for a received packet
    fn available(&mut self) -> BridgeResult<bool>;

    /// Non-blocking receive into `buf`
    fn recv(&mut self, buf: &mut [u8]) -> BridgeResult<Option<usize>>;

    /// Largest payload accepted by [`send`](Self::send)
    fn max_message_len(&self) -> usize;

    /// Apply every channel setting from configuration
    fn configure(&mut self, config: &RadioConfig) -> BridgeResult<()> {
        self.set_frequency(config.frequency_mhz)?;
        self.set_tx_power(config.tx_power_dbm)?;
        self.set_signal_bandwidth(config.bandwidth_hz)?;
        self.set_coding_rate4(config.coding_rate)?;
        self.set_spreading_factor(config.spreading_factor)?;
        Ok(())
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum Mode {
    Sleep,
    Idle,
    Tx,
    Rx,
}

/// RF95 driver in LoRa packet mode
pub struct Rf95Modem<B: RegisterBus> {
    bus: B,
    mode: Mode,
    this_address: u8,
    header_to: u8,
    promiscuous: bool,
    frequency_mhz: f32,
    spreading_factor: u8,
    bandwidth_hz: u32,
    tx_timeout: Duration,
    rx_buf: [u8; RF95_FIFO_SIZE],
    rx_len: usize,
    rx_valid: bool,
    rx_bad: u64,
    last_rssi: i16,
}

impl<B: RegisterBus> Rf95Modem<B> {
    pub fn new(bus: B) -> Self {
        Self {
            bus,
            mode: Mode::Sleep,
            this_address: RH_BROADCAST_ADDRESS,
            header_to: RH_BROADCAST_ADDRESS,
            promiscuous: true,
            frequency_mhz: 434.0,
            spreading_factor: 7,
            bandwidth_hz: 125_000,
            tx_timeout: Duration::from_secs(5),
            rx_buf: [0; RF95_FIFO_SIZE],
            rx_len: 0,
            rx_valid: false,
            rx_bad: 0,
            last_rssi: 0,
        }
    }

    /// Node address used as `from` and for receive filtering
    pub fn set_this_address(&mut self, address: u8) {
        self.this_address = address;
    }

    /// Accept packets addressed to other nodes
    pub fn set_promiscuous(&mut self, promiscuous: bool) {
        self.promiscuous = promiscuous;
    }

    /// Upper bound on waiting for TX_DONE
    pub fn set_tx_timeout(&mut self, timeout: Duration) {
        self.tx_timeout = timeout;
    }

    /// RSSI of the last accepted packet in dBm
    pub fn last_rssi(&self) -> i16 {
        self.last_rssi
    }

    /// Packets dropped for CRC errors, short length or foreign address
    pub fn rx_bad(&self) -> u64 {
        self.rx_bad
    }

    fn set_mode_idle(&mut self) -> BridgeResult<()> {
        if self.mode != Mode::Idle {
            self.bus.write_register(REG_OP_MODE, LONG_RANGE_MODE | MODE_STDBY)?;
            self.mode = Mode::Idle;
        }
        Ok(())
    }

    fn set_mode_rx(&mut self) -> BridgeResult<()> {
        if self.mode != Mode::Rx {
            self.bus.write_register(REG_OP_MODE, LONG_RANGE_MODE | MODE_RXCONTINUOUS)?;
            // DIO0 -> RxDone
            self.bus.write_register(REG_DIO_MAPPING1, 0x00)?;
            self.mode = Mode::Rx;
        }
        Ok(())
    }

    fn set_mode_tx(&mut self) -> BridgeResult<()> {
        if self.mode != Mode::Tx {
            self.bus.write_register(REG_OP_MODE, LONG_RANGE_MODE | MODE_TX)?;
            // DIO0 -> TxDone
            self.bus.write_register(REG_DIO_MAPPING1, 0x40)?;
            self.mode = Mode::Tx;
        }
        Ok(())
    }

    fn set_preamble_length(&mut self, symbols: u16) -> BridgeResult<()> {
        let [msb, lsb] = symbols.to_be_bytes();
        self.bus.write_register(REG_PREAMBLE_MSB, msb)?;
        self.bus.write_register(REG_PREAMBLE_LSB, lsb)
    }

    /// Symbols longer than 16 ms require the low data rate optimisation bit
    fn update_low_data_rate_optimize(&mut self) -> BridgeResult<()> {
        let symbol_ms = (1u64 << self.spreading_factor) as f64 * 1000.0 / self.bandwidth_hz as f64;
        let config3 = self.bus.read_register(REG_MODEM_CONFIG3)?;
        let config3 = if symbol_ms > 16.0 {
            config3 | LOW_DATA_RATE_OPTIMIZE
        } else {
            config3 & !LOW_DATA_RATE_OPTIMIZE
        };
        self.bus.write_register(REG_MODEM_CONFIG3, config3)
    }

    /// Pull a finished packet out of the FIFO when RX_DONE is raised
    fn service_rx(&mut self) -> BridgeResult<()> {
        let flags = self.bus.read_register(REG_IRQ_FLAGS)?;
        if flags & IRQ_RX_DONE == 0 {
            return Ok(());
        }

        if flags & IRQ_PAYLOAD_CRC_ERROR != 0 {
            self.rx_bad += 1;
            self.bus.write_register(REG_IRQ_FLAGS, IRQ_CLEAR_ALL)?;
            debug!("RF95 dropped packet with payload CRC error");
            return Ok(());
        }

        let len = self.bus.read_register(REG_RX_NB_BYTES)? as usize;
        let start = self.bus.read_register(REG_FIFO_RX_CURRENT_ADDR)?;
        self.bus.write_register(REG_FIFO_ADDR_PTR, start)?;
        self.bus.read_burst(REG_FIFO, &mut self.rx_buf[..len])?;
        let raw_rssi = self.bus.read_register(REG_PKT_RSSI_VALUE)? as i16;
        self.bus.write_register(REG_IRQ_FLAGS, IRQ_CLEAR_ALL)?;

        // High-frequency port above 779 MHz
        self.last_rssi = if self.frequency_mhz >= 779.0 { raw_rssi - 157 } else { raw_rssi - 164 };
        self.rx_len = len;

        if len < RF95_HEADER_LEN {
            self.rx_bad += 1;
            debug!("RF95 dropped {} byte packet without header", len);
            return Ok(());
        }

        let to = self.rx_buf[0];
        if self.promiscuous || to == self.this_address || to == RH_BROADCAST_ADDRESS {
            trace!("RF95 received {} byte packet from 0x{:02X}, RSSI {} dBm", len, self.rx_buf[1], self.last_rssi);
            self.rx_valid = true;
        } else {
            self.rx_bad += 1;
            trace!("RF95 ignored packet addressed to 0x{:02X}", to);
        }
        Ok(())
    }
}

#[async_trait]
impl<B: RegisterBus> RadioModem for Rf95Modem<B> {
    async fn init(&mut self) -> BridgeResult<()> {
        let version = self.bus.read_register(REG_VERSION)?;
        if version == 0x00 || version == 0xFF {
            return Err(BridgeError::configuration(format!(
                "RF95 init failed: no modem answered (version register 0x{:02X})", version
            )));
        }

        // LoRa mode can only be selected while asleep
        self.bus.write_register(REG_OP_MODE, LONG_RANGE_MODE | MODE_SLEEP)?;
        sleep(Duration::from_millis(10)).await;
        let op_mode = self.bus.read_register(REG_OP_MODE)?;
        if op_mode != LONG_RANGE_MODE | MODE_SLEEP {
            return Err(BridgeError::configuration(format!(
                "RF95 init failed: LoRa sleep mode not accepted (op mode 0x{:02X})", op_mode
            )));
        }
        self.mode = Mode::Sleep;

        // The whole FIFO is used for both directions
        self.bus.write_register(REG_FIFO_TX_BASE_ADDR, 0)?;
        self.bus.write_register(REG_FIFO_RX_BASE_ADDR, 0)?;
        self.set_mode_idle()?;

        // Bw125 Cr4/5 Sf128, CRC on, AGC auto
        self.bus.write_register(REG_MODEM_CONFIG1, 0x72)?;
        self.bus.write_register(REG_MODEM_CONFIG2, 0x70 | RX_PAYLOAD_CRC_ON)?;
        self.bus.write_register(REG_MODEM_CONFIG3, AGC_AUTO_ON)?;
        self.spreading_factor = 7;
        self.bandwidth_hz = 125_000;

        self.set_preamble_length(8)?;
        self.set_frequency(434.0)?;
        self.set_tx_power(13)?;

        debug!("RF95 silicon version 0x{:02X} initialised", version);
        Ok(())
    }

    fn set_frequency(&mut self, mhz: f32) -> BridgeResult<()> {
        if !(137.0..=1020.0).contains(&mhz) {
            return Err(BridgeError::configuration(format!(
                "frequency {} MHz outside SX127x range 137..=1020 MHz", mhz
            )));
        }

        let frf = ((mhz as f64 * 1_000_000.0) / FSTEP_HZ) as u32;
        self.bus.write_register(REG_FRF_MSB, (frf >> 16) as u8)?;
        self.bus.write_register(REG_FRF_MID, (frf >> 8) as u8)?;
        self.bus.write_register(REG_FRF_LSB, frf as u8)?;
        self.frequency_mhz = mhz;
        Ok(())
    }

    fn set_tx_power(&mut self, dbm: i8) -> BridgeResult<()> {
        if !(2..=20).contains(&dbm) {
            return Err(BridgeError::configuration(format!(
                "TX power {} dBm outside PA_BOOST range 2..=20 dBm", dbm
            )));
        }

        let mut power = dbm;
        if power > 17 {
            // +20 dBm mode adds 3 dB on top of the PA setting
            self.bus.write_register(REG_PA_DAC, PA_DAC_ENABLE)?;
            power -= 3;
        } else {
            self.bus.write_register(REG_PA_DAC, PA_DAC_DISABLE)?;
        }
        self.bus.write_register(REG_PA_CONFIG, PA_SELECT | (power - 2) as u8)
    }

    fn set_spreading_factor(&mut self, sf: u8) -> BridgeResult<()> {
        if !(6..=12).contains(&sf) {
            return Err(BridgeError::configuration(format!(
                "spreading factor {} outside 6..=12", sf
            )));
        }

        let config2 = self.bus.read_register(REG_MODEM_CONFIG2)?;
        self.bus.write_register(REG_MODEM_CONFIG2, (config2 & 0x0F) | (sf << 4))?;
        self.spreading_factor = sf;
        self.update_low_data_rate_optimize()
    }

    fn set_signal_bandwidth(&mut self, hz: u32) -> BridgeResult<()> {
        let bits = BANDWIDTHS
            .iter()
            .find(|(step, _)| *step == hz)
            .map(|(_, bits)| *bits)
            .ok_or_else(|| BridgeError::configuration(format!(
                "bandwidth {} Hz is not an SX127x step", hz
            )))?;

        let config1 = self.bus.read_register(REG_MODEM_CONFIG1)?;
        self.bus.write_register(REG_MODEM_CONFIG1, (config1 & 0x0F) | bits)?;
        self.bandwidth_hz = hz;
        self.update_low_data_rate_optimize()
    }

    fn set_coding_rate4(&mut self, denominator: u8) -> BridgeResult<()> {
        if !(5..=8).contains(&denominator) {
            return Err(BridgeError::configuration(format!(
                "coding rate 4/{} outside 4/5..=4/8", denominator
            )));
        }

        let config1 = self.bus.read_register(REG_MODEM_CONFIG1)?;
        let bits = (denominator - 4) << 1;
        self.bus.write_register(REG_MODEM_CONFIG1, (config1 & 0xF1) | bits)
    }

    async fn send(&mut self, payload: &[u8]) -> BridgeResult<()> {
        if payload.len() > RF95_MAX_MESSAGE_LEN {
            return Err(BridgeError::transport(format!(
                "payload of {} bytes exceeds RF95 maximum of {}",
                payload.len(), RF95_MAX_MESSAGE_LEN
            )));
        }

        self.set_mode_idle()?;

        let mut packet = [0u8; RF95_FIFO_SIZE];
        packet[..RF95_HEADER_LEN].copy_from_slice(&[self.header_to, self.this_address, 0, 0]);
        packet[RF95_HEADER_LEN..RF95_HEADER_LEN + payload.len()].copy_from_slice(payload);
        let len = RF95_HEADER_LEN + payload.len();

        self.bus.write_register(REG_FIFO_ADDR_PTR, 0)?;
        self.bus.write_burst(REG_FIFO, &packet[..len])?;
        self.bus.write_register(REG_PAYLOAD_LENGTH, len as u8)?;
        self.set_mode_tx()?;

        let started = Instant::now();
        loop {
            let flags = self.bus.read_register(REG_IRQ_FLAGS)?;
            if flags & IRQ_TX_DONE != 0 {
                self.bus.write_register(REG_IRQ_FLAGS, IRQ_CLEAR_ALL)?;
                self.set_mode_idle()?;
                trace!("RF95 sent {} byte packet in {:?}", len, started.elapsed());
                return Ok(());
            }

            if started.elapsed() >= self.tx_timeout {
                warn!("RF95 TX_DONE not raised within {:?}", self.tx_timeout);
                self.set_mode_idle()?;
                return Err(BridgeError::timeout("RF95 transmit", self.tx_timeout.as_millis() as u64));
            }

            sleep(Duration::from_millis(1)).await;
        }
    }

    fn available(&mut self) -> BridgeResult<bool> {
        if self.mode == Mode::Tx {
            return Ok(false);
        }
        if self.rx_valid {
            return Ok(true);
        }

        self.set_mode_rx()?;
        self.service_rx()?;
        Ok(self.rx_valid)
    }

    fn recv(&mut self, buf: &mut [u8]) -> BridgeResult<Option<usize>> {
        if !self.available()? {
            return Ok(None);
        }

        let payload = &self.rx_buf[RF95_HEADER_LEN..self.rx_len];
        let len = payload.len().min(buf.len());
        buf[..len].copy_from_slice(&payload[..len]);
        self.rx_valid = false;
        Ok(Some(len))
    }

    fn max_message_len(&self) -> usize {
        RF95_MAX_MESSAGE_LEN
    }
}

/// RF95 on a Linux `spidev` device, mode 0, chip select driven by the kernel
#[cfg(feature = "industrial-io")]
pub struct SpidevBus {
    spi: spidev::Spidev,
}

#[cfg(feature = "industrial-io")]
impl SpidevBus {
    pub fn open(path: &str, speed_hz: u32) -> BridgeResult<Self> {
        use spidev::{SpiModeFlags, Spidev, SpidevOptions};

        let mut spi = Spidev::open(path)
            .map_err(|e| BridgeError::connection(format!("Unable to open {}: {}", path, e)))?;
        let options = SpidevOptions::new()
            .bits_per_word(8)
            .max_speed_hz(speed_hz)
            .mode(SpiModeFlags::SPI_MODE_0)
            .build();
        spi.configure(&options)
            .map_err(|e| BridgeError::connection(format!("Unable to configure {}: {}", path, e)))?;
        Ok(Self { spi })
    }

    fn transfer(&mut self, tx: &[u8], rx: &mut [u8]) -> BridgeResult<()> {
        let mut transfer = spidev::SpidevTransfer::read_write(tx, rx);
        self.spi
            .transfer(&mut transfer)
            .map_err(|e| BridgeError::device(format!("SPI transfer failed: {}", e)))
    }
}

#[cfg(feature = "industrial-io")]
impl RegisterBus for SpidevBus {
    fn read_register(&mut self, reg: u8) -> BridgeResult<u8> {
        let mut rx = [0u8; 2];
        self.transfer(&[reg & 0x7F, 0], &mut rx)?;
        Ok(rx[1])
    }

    fn write_register(&mut self, reg: u8, value: u8) -> BridgeResult<()> {
        let mut rx = [0u8; 2];
        self.transfer(&[reg | 0x80, value], &mut rx)
    }

    fn read_burst(&mut self, reg: u8, buf: &mut [u8]) -> BridgeResult<()> {
        let len = buf.len();
        let mut tx = [0u8; RF95_FIFO_SIZE + 1];
        let mut rx = [0u8; RF95_FIFO_SIZE + 1];
        tx[0] = reg & 0x7F;
        self.transfer(&tx[..len + 1], &mut rx[..len + 1])?;
        buf.copy_from_slice(&rx[1..len + 1]);
        Ok(())
    }

    fn write_burst(&mut self, reg: u8, data: &[u8]) -> BridgeResult<()> {
        let len = data.len();
        let mut tx = [0u8; RF95_FIFO_SIZE + 1];
        let mut rx = [0u8; RF95_FIFO_SIZE + 1];
        tx[0] = reg | 0x80;
        tx[1..len + 1].copy_from_slice(data);
        self.transfer(&tx[..len + 1], &mut rx[..len + 1])
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::{Arc, Mutex};

    /// In-memory SX1276 register file
    ///
    /// Entering TX raises TX_DONE immediately; IRQ flags are write-1-to-clear.
    #[derive(Default)]
    struct RegisterFile {
        regs: Vec<u8>,
        fifo: Vec<u8>,
        fifo_ptr: usize,
    }

    #[derive(Clone)]
    struct FakeBus(Arc<Mutex<RegisterFile>>);

    impl FakeBus {
        fn new(version: u8) -> Self {
            let mut file = RegisterFile {
                regs: vec![0; 0x80],
                fifo: vec![0; 256],
                fifo_ptr: 0,
            };
            file.regs[REG_VERSION as usize] = version;
            Self(Arc::new(Mutex::new(file)))
        }

        fn reg(&self, reg: u8) -> u8 {
            self.0.lock().unwrap().regs[reg as usize]
        }

        fn inject_packet(&self, packet: &[u8], crc_error: bool) {
            let mut file = self.0.lock().unwrap();
            file.fifo[..packet.len()].copy_from_slice(packet);
            file.regs[REG_RX_NB_BYTES as usize] = packet.len() as u8;
            file.regs[REG_FIFO_RX_CURRENT_ADDR as usize] = 0;
            file.regs[REG_PKT_RSSI_VALUE as usize] = 100;
            let mut flags = IRQ_RX_DONE;
            if crc_error {
                flags |= IRQ_PAYLOAD_CRC_ERROR;
            }
            file.regs[REG_IRQ_FLAGS as usize] |= flags;
        }

        fn fifo(&self, len: usize) -> Vec<u8> {
            self.0.lock().unwrap().fifo[..len].to_vec()
        }
    }

    impl RegisterBus for FakeBus {
        fn read_register(&mut self, reg: u8) -> BridgeResult<u8> {
            Ok(self.0.lock().unwrap().regs[reg as usize])
        }

        fn write_register(&mut self, reg: u8, value: u8) -> BridgeResult<()> {
            let mut file = self.0.lock().unwrap();
            match reg {
                REG_IRQ_FLAGS => file.regs[reg as usize] &= !value,
                REG_FIFO_ADDR_PTR => {
                    file.fifo_ptr = value as usize;
                    file.regs[reg as usize] = value;
                }
                REG_OP_MODE => {
                    file.regs[reg as usize] = value;
                    if value & 0x07 == MODE_TX {
                        file.regs[REG_IRQ_FLAGS as usize] |= IRQ_TX_DONE;
                    }
                }
                _ => file.regs[reg as usize] = value,
            }
            Ok(())
        }

        fn read_burst(&mut self, _reg: u8, buf: &mut [u8]) -> BridgeResult<()> {
            let file = self.0.lock().unwrap();
            let start = file.fifo_ptr;
            buf.copy_from_slice(&file.fifo[start..start + buf.len()]);
            Ok(())
        }

        fn write_burst(&mut self, _reg: u8, data: &[u8]) -> BridgeResult<()> {
            let mut file = self.0.lock().unwrap();
            let start = file.fifo_ptr;
            file.fifo[start..start + data.len()].copy_from_slice(data);
            Ok(())
        }
    }

    async fn ready_modem() -> (Rf95Modem<FakeBus>, FakeBus) {
        let bus = FakeBus::new(0x12);
        let mut modem = Rf95Modem::new(bus.clone());
        modem.init().await.unwrap();
        (modem, bus)
    }

    #[tokio::test]
    async fn test_init_selects_lora_defaults() {
        let (_modem, bus) = ready_modem().await;

        assert_eq!(bus.reg(REG_OP_MODE), LONG_RANGE_MODE | MODE_STDBY);
        assert_eq!(bus.reg(REG_MODEM_CONFIG1), 0x72);
        assert_eq!(bus.reg(REG_MODEM_CONFIG2), 0x74);
        assert_eq!(bus.reg(REG_PREAMBLE_LSB), 8);
        assert_eq!(bus.reg(REG_PA_CONFIG), 0x8B);
    }

    #[tokio::test]
    async fn test_init_without_modem_fails() {
        let mut modem = Rf95Modem::new(FakeBus::new(0x00));
        let err = modem.init().await.unwrap_err();
        assert!(err.is_fatal());
    }

    #[tokio::test]
    async fn test_channel_configuration() {
        let (mut modem, bus) = ready_modem().await;
        let config = RadioConfig {
            frequency_mhz: 868.0,
            tx_power_dbm: 20,
            spreading_factor: 12,
            bandwidth_hz: 125_000,
            coding_rate: 8,
            ..RadioConfig::default()
        };
        modem.configure(&config).unwrap();

        // 868 MHz / 61.035 Hz = 0xD90000
        assert_eq!(
            [bus.reg(REG_FRF_MSB), bus.reg(REG_FRF_MID), bus.reg(REG_FRF_LSB)],
            [0xD9, 0x00, 0x00]
        );
        assert_eq!(bus.reg(REG_PA_DAC), PA_DAC_ENABLE);
        assert_eq!(bus.reg(REG_PA_CONFIG), PA_SELECT | 15);
        assert_eq!(bus.reg(REG_MODEM_CONFIG1), 0x70 | 0x08);
        assert_eq!(bus.reg(REG_MODEM_CONFIG2) >> 4, 12);
        // SF12 at 125 kHz is a 32 ms symbol
        assert_ne!(bus.reg(REG_MODEM_CONFIG3) & LOW_DATA_RATE_OPTIMIZE, 0);
    }

    #[tokio::test]
    async fn test_invalid_channel_settings() {
        let (mut modem, _bus) = ready_modem().await;

        assert!(modem.set_frequency(2400.0).is_err());
        assert!(modem.set_tx_power(23).is_err());
        assert!(modem.set_spreading_factor(13).is_err());
        assert!(modem.set_signal_bandwidth(100_000).is_err());
        assert!(modem.set_coding_rate4(4).is_err());
    }

    #[tokio::test]
    async fn test_send_writes_header_and_payload() {
        let (mut modem, bus) = ready_modem().await;
        let payload = [0x01, 0x03, 0x00, 0x00, 0x00, 0x0A, 0xC5, 0xCD];

        modem.send(&payload).await.unwrap();

        assert_eq!(bus.reg(REG_PAYLOAD_LENGTH), 12);
        let fifo = bus.fifo(12);
        assert_eq!(&fifo[..4], &[0xFF, 0xFF, 0x00, 0x00]);
        assert_eq!(&fifo[4..], &payload);
        assert_eq!(bus.reg(REG_IRQ_FLAGS) & IRQ_TX_DONE, 0);
    }

    #[tokio::test]
    async fn test_send_rejects_oversized_payload() {
        let (mut modem, _bus) = ready_modem().await;
        let payload = [0u8; RF95_MAX_MESSAGE_LEN + 1];
        assert!(modem.send(&payload).await.is_err());
    }

    #[tokio::test]
    async fn test_receive_strips_header() {
        let (mut modem, bus) = ready_modem().await;
        let mut buf = [0u8; 64];

        assert!(!modem.available().unwrap());
        assert_eq!(bus.reg(REG_OP_MODE), LONG_RANGE_MODE | MODE_RXCONTINUOUS);

        bus.inject_packet(&[0xFF, 0x01, 0x00, 0x00, 0x01, 0x03, 0x02, 0x00, 0x2A, 0x39, 0x9B], false);
        assert!(modem.available().unwrap());
        assert_eq!(modem.recv(&mut buf).unwrap(), Some(7));
        assert_eq!(&buf[..7], &[0x01, 0x03, 0x02, 0x00, 0x2A, 0x39, 0x9B]);
        // 434 MHz after init is on the low-frequency port
        assert_eq!(modem.last_rssi(), 100 - 164);

        assert_eq!(modem.recv(&mut buf).unwrap(), None);
    }

    #[tokio::test]
    async fn test_receive_drops_bad_packets() {
        let (mut modem, bus) = ready_modem().await;
        let mut buf = [0u8; 64];
        modem.set_promiscuous(false);
        modem.set_this_address(0x02);

        bus.inject_packet(&[0x02, 0x01, 0x00, 0x00, 0xAA], true);
        assert_eq!(modem.recv(&mut buf).unwrap(), None);

        bus.inject_packet(&[0x07, 0x01, 0x00, 0x00, 0xAA], false);
        assert_eq!(modem.recv(&mut buf).unwrap(), None);

        bus.inject_packet(&[0x02, 0x01], false);
        assert_eq!(modem.recv(&mut buf).unwrap(), None);
        assert_eq!(modem.rx_bad(), 3);

        bus.inject_packet(&[0x02, 0x01, 0x00, 0x00, 0xAA], false);
        assert_eq!(modem.recv(&mut buf).unwrap(), Some(1));
    }
}
