/// Modbus RTU to LoRa radio bridge
///
/// Wires the serial line, the RF95 modem, the optional activity LEDs and the
/// optional AES-128 key from a YAML file and the command line, then runs the
/// bridge loop until Ctrl-C.
///
/// Usage:
///   rtu_bridge /dev/ttyUSB0 -b 38400 -t 0 -r 1 -w 1 -k 0123456789ABCDEF
///   rtu_bridge -c /etc/rtu_bridge.yaml -v

use std::path::PathBuf;
use anyhow::Context;
use chrono::{DateTime, Local};
use clap::Parser;
use tracing::{error, info, warn};

use voltage_rtu_bridge::{
    bridge::{BridgeSession, BridgeStats},
    checksum::CrcValidator,
    config::{BridgeConfig, IndicatorConfig, RadioConfig},
    error::{BridgeError, BridgeResult},
    indicator::{
        DigitalPin, ExpanderBus, ExpanderIndicator, GpioIndicator, Indicator, Pcf8574,
        SharedExpander,
    },
    logging::init_tracing,
    radio::{RadioModem, RegisterBus, Rf95Modem},
    serial::open_serial,
    transport::{parse_key, LinkTransport, PlainTransport, RadioTransport, TransportStats},
    utils::format::{format_duration, format_latency},
};

/// Command-line options; every value overrides the configuration file
#[derive(Debug, Parser)]
#[command(author, version, about = "Modbus RTU serial to LoRa radio bridge")]
struct Args {
    /// Serial port connected to the Modbus line; required unless the config file sets it
    serial_port: Option<String>,

    /// Serial baud rate [default: 38400]
    #[arg(short = 'b', long)]
    baudrate: Option<u32>,

    /// Tx LED pin (BCM GPIO, or expander pin with --wirebus)
    #[arg(short = 't', long)]
    txled: Option<u8>,

    /// Rx LED pin (BCM GPIO, or expander pin with --wirebus)
    #[arg(short = 'r', long)]
    rxled: Option<u8>,

    /// I2C bus of a PCF8574 driving the LEDs
    #[arg(short = 'w', long)]
    wirebus: Option<u8>,

    /// AES-128 key: 16 characters, or hex: followed by 32 hex digits
    #[arg(short = 'k', long, env = "RTU_BRIDGE_KEY", hide_env_values = true)]
    key: Option<String>,

    /// Debug output
    #[arg(short = 'v', long)]
    verbose: bool,

    /// YAML configuration file
    #[arg(short = 'c', long)]
    config: Option<PathBuf>,

    /// Radio frequency in MHz
    #[arg(short = 'f', long)]
    frequency: Option<f32>,
}

impl Args {
    fn apply(self, config: &mut BridgeConfig) {
        if let Some(port) = self.serial_port {
            config.serial.port = port;
        }
        if let Some(baud_rate) = self.baudrate {
            config.serial.baud_rate = baud_rate;
        }
        if let Some(pin) = self.txled {
            config.indicators.tx_pin = Some(pin);
        }
        if let Some(pin) = self.rxled {
            config.indicators.rx_pin = Some(pin);
        }
        if let Some(bus) = self.wirebus {
            config.indicators.wire_bus = Some(bus);
        }
        if let Some(key) = self.key {
            config.encryption.key = Some(key);
        }
        if let Some(frequency) = self.frequency {
            config.radio.frequency_mhz = frequency;
        }
        if self.verbose {
            config.logging.verbose = true;
        }
    }
}

#[cfg(feature = "industrial-io")]
fn open_register_bus(config: &RadioConfig) -> BridgeResult<Box<dyn RegisterBus>> {
    let bus = voltage_rtu_bridge::radio::SpidevBus::open(&config.spi_device, config.spi_speed_hz)?;
    Ok(Box::new(bus))
}

#[cfg(not(feature = "industrial-io"))]
fn open_register_bus(config: &RadioConfig) -> BridgeResult<Box<dyn RegisterBus>> {
    Err(BridgeError::configuration(format!(
        "cannot open RF95 on {}: built without the industrial-io feature",
        config.spi_device
    )))
}

#[cfg(all(feature = "gpio", target_os = "linux"))]
fn open_pin(bcm: u8) -> BridgeResult<Box<dyn DigitalPin>> {
    Ok(Box::new(voltage_rtu_bridge::indicator::RppalPin::open(bcm)?))
}

#[cfg(not(all(feature = "gpio", target_os = "linux")))]
fn open_pin(bcm: u8) -> BridgeResult<Box<dyn DigitalPin>> {
    Err(BridgeError::configuration(format!(
        "cannot drive GPIO {}: built without the gpio feature",
        bcm
    )))
}

#[cfg(feature = "industrial-io")]
fn open_expander_bus(bus: u8, address: u16) -> BridgeResult<Box<dyn ExpanderBus>> {
    Ok(Box::new(voltage_rtu_bridge::indicator::LinuxI2cBus::open(bus, address)?))
}

#[cfg(not(feature = "industrial-io"))]
fn open_expander_bus(bus: u8, _address: u16) -> BridgeResult<Box<dyn ExpanderBus>> {
    Err(BridgeError::configuration(format!(
        "cannot open /dev/i2c-{}: built without the industrial-io feature",
        bus
    )))
}

/// Bring up the modem and apply the channel settings
async fn open_modem(config: &RadioConfig) -> BridgeResult<Rf95Modem<Box<dyn RegisterBus>>> {
    let mut modem = Rf95Modem::new(open_register_bus(config)?);
    modem.init().await?;
    modem.configure(config)?;
    modem.set_this_address(config.address);
    modem.set_promiscuous(config.promiscuous);

    info!(
        "RF95 ready: {} MHz, {} dBm, SF{}, {} Hz, CR 4/{}",
        config.frequency_mhz,
        config.tx_power_dbm,
        config.spreading_factor,
        config.bandwidth_hz,
        config.coding_rate
    );
    Ok(modem)
}

/// Build the Tx/Rx indicators; expander pins share one PCF8574
fn open_indicators(config: &IndicatorConfig) -> BridgeResult<(Option<Indicator>, Option<Indicator>)> {
    if config.tx_pin.is_none() && config.rx_pin.is_none() {
        return Ok((None, None));
    }

    let polarity = config.active_high;
    match config.wire_bus {
        Some(bus) => {
            let mut expander = Pcf8574::new(open_expander_bus(bus, config.expander_address)?);
            expander.begin()?;
            let expander: SharedExpander<Box<dyn ExpanderBus>> = expander.shared();
            info!("PCF8574 at 0x{:02X} on /dev/i2c-{}", config.expander_address, bus);

            let make = |pin: Option<u8>| -> BridgeResult<Option<Indicator>> {
                pin.map(|pin| {
                    ExpanderIndicator::new(expander.clone(), pin, polarity).map(Indicator::Expander)
                })
                .transpose()
            };
            Ok((make(config.tx_pin)?, make(config.rx_pin)?))
        }
        None => {
            let make = |pin: Option<u8>| -> BridgeResult<Option<Indicator>> {
                pin.map(|pin| {
                    open_pin(pin).map(|pin| Indicator::Gpio(GpioIndicator::new(pin, polarity)))
                })
                .transpose()
            };
            Ok((make(config.tx_pin)?, make(config.rx_pin)?))
        }
    }
}

fn print_summary(stats: &BridgeStats, link: &TransportStats, started: DateTime<Local>) {
    let uptime = (Local::now() - started).to_std().unwrap_or_default();

    info!("Bridge statistics (up since {}, {}):", started.format("%Y-%m-%d %H:%M:%S"), format_duration(uptime));
    info!("  Frames forwarded: {}", stats.frames_forwarded);
    info!("  Frames flushed: {}", stats.frames_flushed);
    info!("  CRC errors: {}", stats.crc_errors);
    info!("  Send failures: {}", stats.send_failures);
    info!("  Replies relayed: {}", stats.replies_relayed);
    info!("  Replies ignored: {}", stats.replies_ignored);
    info!("  Receive errors: {}", stats.receive_errors);
    info!("  Serial errors: {}", stats.serial_errors);
    info!("  Radio bytes sent/received: {}/{}", link.bytes_sent, link.bytes_received);
    for line in format_latency(&stats.latency).lines() {
        info!("  {}", line);
    }
}

async fn run(args: Args) -> anyhow::Result<()> {
    let mut config = match &args.config {
        Some(path) => BridgeConfig::from_file(path)
            .with_context(|| format!("loading {}", path.display()))?,
        None => BridgeConfig::default(),
    };
    args.apply(&mut config);

    init_tracing(config.log_level())?;
    config.validate().context("invalid configuration")?;
    info!("{}", voltage_rtu_bridge::info());

    let timing = config.timing_profile()?;
    let key = config
        .encryption
        .key
        .as_deref()
        .map(parse_key)
        .transpose()
        .context("Unable to set secret key !")?;

    let modem = open_modem(&config.radio).await.context("RF95 init failed !")?;
    let (tx_led, rx_led) = open_indicators(&config.indicators).context("activity indicators")?;
    let plain = PlainTransport::new(modem).with_indicators(tx_led, rx_led)?;

    let link = LinkTransport::new(plain, key.as_ref().map(|key| &key[..]))?;
    if link.is_encrypted() {
        info!("Encryption enabled");
    }

    let serial = open_serial(&config.serial)?;
    info!(
        "Bridging {} at {} Bd, max frame {} bytes",
        config.serial.port,
        config.serial.baud_rate,
        link.max_message_len()
    );

    let started = Local::now();
    let mut session = BridgeSession::new(
        serial,
        link,
        timing,
        CrcValidator::new(config.serial.crc_byte_order),
    );

    let stats = session
        .run_until(async {
            if let Err(e) = tokio::signal::ctrl_c().await {
                warn!("Ctrl-C handler unavailable: {}", e);
                std::future::pending::<()>().await;
            }
        })
        .await;

    print_summary(&stats, &session.transport().get_stats(), started);
    Ok(())
}

#[tokio::main(flavor = "current_thread")]
async fn main() {
    let args = Args::parse();

    if let Err(e) = run(args).await {
        error!("{:#}", e);
        eprintln!("rtu_bridge: {:#}", e);
        std::process::exit(1);
    }
}
