//! # Activity Indicators
//!
//! Tx/Rx LEDs blinked by the transport around radio traffic. Callers always
//! reason in logical terms (`true` = lit); the polarity bit decides which
//! electrical level lights the LED:
//!
//! ```text
//! physical = on XOR !polarity        state = (physical == polarity)
//! ```
//!
//! Two backings share the [`ActivityIndicator`] contract:
//!
//! - [`GpioIndicator`] drives a SoC GPIO line through a [`DigitalPin`]
//! - [`ExpanderIndicator`] drives one pin of a [`Pcf8574`] I2C expander
//!
//! Both guarantee read-after-write: after `set_state(on)`, `state()` returns `on`.

use std::sync::{Arc, Mutex};

use crate::error::{BridgeError, BridgeResult};

/// Logical on/off signal with polarity correction
pub trait ActivityIndicator: Send {
    /// Configure the underlying pin as an output and switch the indicator off
    fn begin(&mut self) -> BridgeResult<()>;

    /// Logical state, `true` when lit
    fn state(&self) -> BridgeResult<bool>;

    /// Write the logical state
    fn set_state(&mut self, on: bool) -> BridgeResult<()>;

    /// `true` when a high level lights the indicator
    fn polarity(&self) -> bool;

    /// Invert the logical state
    fn toggle_state(&mut self) -> BridgeResult<()> {
        let current = self.state()?;
        self.set_state(!current)
    }
}

/// Electrical level to write for a logical state
fn physical_level(on: bool, polarity: bool) -> bool {
    on ^ !polarity
}

/// A single GPIO line
pub trait DigitalPin: Send {
    /// Switch the line to output mode
    fn set_output(&mut self) -> BridgeResult<()>;

    /// Drive the line high (`true`) or low
    fn write(&mut self, high: bool) -> BridgeResult<()>;

    /// Current output level
    fn read(&self) -> BridgeResult<bool>;
}

impl DigitalPin for Box<dyn DigitalPin> {
    fn set_output(&mut self) -> BridgeResult<()> {
        (**self).set_output()
    }

    fn write(&mut self, high: bool) -> BridgeResult<()> {
        (**self).write(high)
    }

    fn read(&self) -> BridgeResult<bool> {
        (**self).read()
    }
}

/// Indicator wired directly to a GPIO line
pub struct GpioIndicator<P: DigitalPin> {
    pin: P,
    polarity: bool,
}

impl<P: DigitalPin> GpioIndicator<P> {
    pub fn new(pin: P, polarity: bool) -> Self {
        Self { pin, polarity }
    }
}

impl<P: DigitalPin> ActivityIndicator for GpioIndicator<P> {
    fn begin(&mut self) -> BridgeResult<()> {
        self.pin.set_output()?;
        self.set_state(false)
    }

    fn state(&self) -> BridgeResult<bool> {
        Ok(self.pin.read()? == self.polarity)
    }

    fn set_state(&mut self, on: bool) -> BridgeResult<()> {
        self.pin.write(physical_level(on, self.polarity))
    }

    fn polarity(&self) -> bool {
        self.polarity
    }
}

/// Raw port access to an 8-bit I2C GPIO expander
pub trait ExpanderBus: Send {
    /// Write all eight port bits
    fn write_port(&mut self, value: u8) -> BridgeResult<()>;

    /// Read all eight port bits
    fn read_port(&mut self) -> BridgeResult<u8>;
}

impl ExpanderBus for Box<dyn ExpanderBus> {
    fn write_port(&mut self, value: u8) -> BridgeResult<()> {
        (**self).write_port(value)
    }

    fn read_port(&mut self) -> BridgeResult<u8> {
        (**self).read_port()
    }
}

/// Number of pins on a PCF8574
pub const PCF8574_PINS: u8 = 8;

/// Default 7-bit address of a PCF8574 with A2..A0 tied low
pub const PCF8574_DEFAULT_ADDRESS: u16 = 0x20;

/// PCF8574 quasi-bidirectional port expander
///
/// The chip has no direction register: every write sets all eight pins. The
/// output latch is kept here so single-pin writes preserve the other pins,
/// and output pins read back from the latch.
pub struct Pcf8574<B: ExpanderBus> {
    bus: B,
    latch: u8,
    outputs: u8,
}

/// Expander shared by several indicators
pub type SharedExpander<B> = Arc<Mutex<Pcf8574<B>>>;

impl<B: ExpanderBus> Pcf8574<B> {
    /// Wrap a bus; all pins start as inputs (latch high, as after power-on)
    pub fn new(bus: B) -> Self {
        Self {
            bus,
            latch: 0xFF,
            outputs: 0,
        }
    }

    /// Wrap into a handle that several indicators can hold
    pub fn shared(self) -> SharedExpander<B> {
        Arc::new(Mutex::new(self))
    }

    /// Probe the chip by reading its port
    pub fn begin(&mut self) -> BridgeResult<()> {
        self.bus.read_port().map(|_| ()).map_err(|e| {
            BridgeError::configuration(format!(
                "Unable to connect to PCF8574, check wiring, slave address and bus id: {}", e
            ))
        })
    }

    /// Mark `pin` as an output so reads come from the latch
    pub fn set_output(&mut self, pin: u8) -> BridgeResult<()> {
        let mask = Self::mask(pin)?;
        self.outputs |= mask;
        Ok(())
    }

    /// Set one pin and push the whole latch to the chip
    pub fn digital_write(&mut self, pin: u8, high: bool) -> BridgeResult<()> {
        let mask = Self::mask(pin)?;
        let latch = if high { self.latch | mask } else { self.latch & !mask };
        self.bus.write_port(latch)?;
        self.latch = latch;
        Ok(())
    }

    /// Level of one pin
    pub fn digital_read(&mut self, pin: u8) -> BridgeResult<bool> {
        let mask = Self::mask(pin)?;
        let port = if self.outputs & mask != 0 {
            self.latch
        } else {
            self.bus.read_port()?
        };
        Ok(port & mask != 0)
    }

    /// Last value written to the port
    pub fn latch(&self) -> u8 {
        self.latch
    }

    fn mask(pin: u8) -> BridgeResult<u8> {
        if pin >= PCF8574_PINS {
            return Err(BridgeError::configuration(format!(
                "PCF8574 pin {} out of range 0..={}", pin, PCF8574_PINS - 1
            )));
        }
        Ok(1 << pin)
    }
}

/// Indicator on one pin of a shared PCF8574
pub struct ExpanderIndicator<B: ExpanderBus> {
    expander: SharedExpander<B>,
    pin: u8,
    polarity: bool,
}

impl<B: ExpanderBus> ExpanderIndicator<B> {
    /// Fails when `pin` does not exist on the expander
    pub fn new(expander: SharedExpander<B>, pin: u8, polarity: bool) -> BridgeResult<Self> {
        if pin >= PCF8574_PINS {
            return Err(BridgeError::configuration(format!(
                "PCF8574 pin {} out of range 0..={}", pin, PCF8574_PINS - 1
            )));
        }
        Ok(Self { expander, pin, polarity })
    }

    pub fn pin(&self) -> u8 {
        self.pin
    }

    fn with_expander<T>(&self, op: impl FnOnce(&mut Pcf8574<B>) -> BridgeResult<T>) -> BridgeResult<T> {
        let mut expander = self.expander
            .lock()
            .map_err(|_| BridgeError::internal("PCF8574 lock poisoned"))?;
        op(&mut expander)
    }
}

impl<B: ExpanderBus> ActivityIndicator for ExpanderIndicator<B> {
    fn begin(&mut self) -> BridgeResult<()> {
        let pin = self.pin;
        self.with_expander(|expander| expander.set_output(pin))?;
        self.set_state(false)
    }

    fn state(&self) -> BridgeResult<bool> {
        let pin = self.pin;
        let level = self.with_expander(|expander| expander.digital_read(pin))?;
        Ok(level == self.polarity)
    }

    fn set_state(&mut self, on: bool) -> BridgeResult<()> {
        let (pin, level) = (self.pin, physical_level(on, self.polarity));
        self.with_expander(|expander| expander.digital_write(pin, level))
    }

    fn polarity(&self) -> bool {
        self.polarity
    }
}

/// The closed set of indicator backings, chosen once at startup
pub enum Indicator {
    Gpio(GpioIndicator<Box<dyn DigitalPin>>),
    Expander(ExpanderIndicator<Box<dyn ExpanderBus>>),
}

impl ActivityIndicator for Indicator {
    fn begin(&mut self) -> BridgeResult<()> {
        match self {
            Indicator::Gpio(led) => led.begin(),
            Indicator::Expander(led) => led.begin(),
        }
    }

    fn state(&self) -> BridgeResult<bool> {
        match self {
            Indicator::Gpio(led) => led.state(),
            Indicator::Expander(led) => led.state(),
        }
    }

    fn set_state(&mut self, on: bool) -> BridgeResult<()> {
        match self {
            Indicator::Gpio(led) => led.set_state(on),
            Indicator::Expander(led) => led.set_state(on),
        }
    }

    fn polarity(&self) -> bool {
        match self {
            Indicator::Gpio(led) => led.polarity(),
            Indicator::Expander(led) => led.polarity(),
        }
    }
}

/// Raspberry Pi GPIO line (BCM numbering)
#[cfg(all(feature = "gpio", target_os = "linux"))]
pub struct RppalPin {
    pin: rppal::gpio::OutputPin,
}

#[cfg(all(feature = "gpio", target_os = "linux"))]
impl RppalPin {
    pub fn open(bcm: u8) -> BridgeResult<Self> {
        let gpio = rppal::gpio::Gpio::new()
            .map_err(|e| BridgeError::connection(format!("Unable to open GPIO: {}", e)))?;
        let mut pin = gpio
            .get(bcm)
            .map_err(|e| BridgeError::connection(format!("Unable to claim GPIO {}: {}", bcm, e)))?
            .into_output();
        pin.set_reset_on_drop(false);
        Ok(Self { pin })
    }
}

#[cfg(all(feature = "gpio", target_os = "linux"))]
impl DigitalPin for RppalPin {
    fn set_output(&mut self) -> BridgeResult<()> {
        // into_output() already switched the line
        Ok(())
    }

    fn write(&mut self, high: bool) -> BridgeResult<()> {
        if high {
            self.pin.set_high();
        } else {
            self.pin.set_low();
        }
        Ok(())
    }

    fn read(&self) -> BridgeResult<bool> {
        Ok(self.pin.is_set_high())
    }
}

/// PCF8574 reached through `/dev/i2c-<bus>`
#[cfg(feature = "industrial-io")]
pub struct LinuxI2cBus {
    device: i2cdev::linux::LinuxI2CDevice,
}

#[cfg(feature = "industrial-io")]
impl LinuxI2cBus {
    pub fn open(bus: u8, address: u16) -> BridgeResult<Self> {
        let path = format!("/dev/i2c-{}", bus);
        let device = i2cdev::linux::LinuxI2CDevice::new(&path, address)
            .map_err(|e| BridgeError::connection(format!("Unable to open {}: {}", path, e)))?;
        Ok(Self { device })
    }
}

#[cfg(feature = "industrial-io")]
impl ExpanderBus for LinuxI2cBus {
    fn write_port(&mut self, value: u8) -> BridgeResult<()> {
        use i2cdev::core::I2CDevice;
        self.device
            .smbus_write_byte(value)
            .map_err(|e| BridgeError::device(format!("PCF8574 write failed: {}", e)))
    }

    fn read_port(&mut self) -> BridgeResult<u8> {
        use i2cdev::core::I2CDevice;
        self.device
            .smbus_read_byte()
            .map_err(|e| BridgeError::device(format!("PCF8574 read failed: {}", e)))
    }
}

#[cfg(test)]
pub(crate) mod tests {
    use super::*;

    /// GPIO line backed by a shared flag so tests can observe the level
    #[derive(Clone, Default)]
    pub(crate) struct MemoryPin {
        pub level: Arc<Mutex<Option<bool>>>,
        pub output: Arc<Mutex<bool>>,
    }

    impl DigitalPin for MemoryPin {
        fn set_output(&mut self) -> BridgeResult<()> {
            *self.output.lock().unwrap() = true;
            Ok(())
        }

        fn write(&mut self, high: bool) -> BridgeResult<()> {
            *self.level.lock().unwrap() = Some(high);
            Ok(())
        }

        fn read(&self) -> BridgeResult<bool> {
            Ok(self.level.lock().unwrap().unwrap_or(false))
        }
    }

    /// Expander port that records writes; inputs read back as `input_port`
    #[derive(Clone)]
    pub(crate) struct MemoryBus {
        pub writes: Arc<Mutex<Vec<u8>>>,
        pub input_port: u8,
        pub present: bool,
    }

    impl MemoryBus {
        pub fn new() -> Self {
            Self {
                writes: Arc::new(Mutex::new(Vec::new())),
                input_port: 0xFF,
                present: true,
            }
        }
    }

    impl ExpanderBus for MemoryBus {
        fn write_port(&mut self, value: u8) -> BridgeResult<()> {
            self.writes.lock().unwrap().push(value);
            Ok(())
        }

        fn read_port(&mut self) -> BridgeResult<u8> {
            if !self.present {
                return Err(BridgeError::device("no ACK from 0x20"));
            }
            Ok(self.input_port)
        }
    }

    #[test]
    fn test_gpio_read_after_write_both_polarities() {
        for polarity in [true, false] {
            let pin = MemoryPin::default();
            let mut led = GpioIndicator::new(pin.clone(), polarity);
            led.begin().unwrap();

            assert!(*pin.output.lock().unwrap());
            assert!(!led.state().unwrap());

            led.set_state(true).unwrap();
            assert!(led.state().unwrap());
            assert_eq!(*pin.level.lock().unwrap(), Some(polarity));

            led.set_state(false).unwrap();
            assert!(!led.state().unwrap());
            assert_eq!(*pin.level.lock().unwrap(), Some(!polarity));
        }
    }

    #[test]
    fn test_gpio_toggle() {
        let mut led = GpioIndicator::new(MemoryPin::default(), false);
        led.begin().unwrap();

        led.toggle_state().unwrap();
        assert!(led.state().unwrap());
        led.toggle_state().unwrap();
        assert!(!led.state().unwrap());
    }

    #[test]
    fn test_expander_read_after_write_both_polarities() {
        for polarity in [true, false] {
            let bus = MemoryBus::new();
            let expander = Pcf8574::new(bus.clone()).shared();
            let mut led = ExpanderIndicator::new(expander, 3, polarity).unwrap();
            led.begin().unwrap();
            assert!(!led.state().unwrap());

            led.set_state(true).unwrap();
            assert!(led.state().unwrap());

            let last = *bus.writes.lock().unwrap().last().unwrap();
            assert_eq!(last & 0x08 != 0, polarity);
        }
    }

    #[test]
    fn test_expander_pins_share_latch() {
        let bus = MemoryBus::new();
        let expander = Pcf8574::new(bus.clone()).shared();
        let mut tx = ExpanderIndicator::new(expander.clone(), 0, true).unwrap();
        let mut rx = ExpanderIndicator::new(expander.clone(), 1, true).unwrap();
        tx.begin().unwrap();
        rx.begin().unwrap();

        tx.set_state(true).unwrap();
        rx.set_state(true).unwrap();
        tx.set_state(false).unwrap();

        assert!(!tx.state().unwrap());
        assert!(rx.state().unwrap());
        assert_eq!(expander.lock().unwrap().latch(), 0b1111_1110);
    }

    #[test]
    fn test_expander_probe_and_pin_range() {
        let mut bus = MemoryBus::new();
        bus.present = false;
        let err = Pcf8574::new(bus).begin().unwrap_err();
        assert!(err.is_fatal());

        let expander = Pcf8574::new(MemoryBus::new()).shared();
        assert!(ExpanderIndicator::new(expander, 8, false).is_err());
    }

    #[test]
    fn test_expander_input_pins_read_bus() {
        let mut bus = MemoryBus::new();
        bus.input_port = 0b0000_0100;
        let mut expander = Pcf8574::new(bus);

        assert!(expander.digital_read(2).unwrap());
        assert!(!expander.digital_read(5).unwrap());
    }

    #[test]
    fn test_indicator_enum_dispatch() {
        let mut gpio = Indicator::Gpio(GpioIndicator::new(Box::new(MemoryPin::default()), true));
        let expander = Pcf8574::new(Box::new(MemoryBus::new()) as Box<dyn ExpanderBus>).shared();
        let mut expanded = Indicator::Expander(ExpanderIndicator::new(expander, 6, false).unwrap());

        for led in [&mut gpio, &mut expanded] {
            led.begin().unwrap();
            led.set_state(true).unwrap();
            assert!(led.state().unwrap());
        }
        assert!(gpio.polarity());
        assert!(!expanded.polarity());
    }
}
