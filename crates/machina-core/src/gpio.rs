//! GPIO line helpers
//!
//! Interrupt plumbing proper is a collaborator; the core only allocates
//! input line arrays bound to a device's handler and wires output lines
//! to externally supplied sinks.

use std::fmt;
use std::sync::Arc;

use crate::machine::{DeviceId, Machine};

/// Fan-out target of a GPIO line: `(line index, level)`
pub type GpioFanout = Arc<dyn Fn(usize, i32) + Send + Sync>;

/// A cloneable handle on one line
#[derive(Clone)]
pub struct Irq {
    line: usize,
    fanout: GpioFanout,
}

impl Irq {
    pub fn new(line: usize, fanout: GpioFanout) -> Self {
        Self { line, fanout }
    }

    pub fn line(&self) -> usize {
        self.line
    }

    pub fn set(&self, level: i32) {
        (self.fanout)(self.line, level);
    }

    pub fn raise(&self) {
        self.set(1);
    }

    pub fn lower(&self) {
        self.set(0);
    }
}

impl fmt::Debug for Irq {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Irq").field("line", &self.line).finish()
    }
}

/// Allocate `n` lines sharing one fan-out
pub fn allocate_irqs(fanout: GpioFanout, n: usize) -> Vec<Irq> {
    (0..n).map(|line| Irq::new(line, fanout.clone())).collect()
}

impl Machine {
    /// Allocate the device's input lines, bound to `handler`; must be
    /// called at most once per device
    pub fn init_input_gpios(
        &mut self,
        dev: DeviceId,
        handler: impl Fn(usize, i32) + Send + Sync + 'static,
        n: usize,
    ) {
        let device = self.device_mut(dev);
        assert!(
            device.gpio_in.is_empty(),
            "input GPIO lines already allocated"
        );
        device.gpio_in = allocate_irqs(Arc::new(handler), n);
    }

    /// Size the device's output line array; must be called at most once
    /// per device
    pub fn init_output_gpios(&mut self, dev: DeviceId, n: usize) {
        let device = self.device_mut(dev);
        assert!(
            device.gpio_out.is_empty(),
            "output GPIO lines already allocated"
        );
        device.gpio_out = vec![None; n];
    }

    /// Handle on input line `n`
    pub fn input_gpio(&self, dev: DeviceId, n: usize) -> Irq {
        self.device(dev).gpio_in[n].clone()
    }

    /// Wire output line `n` to an external sink; may be rewired freely
    pub fn connect_output_gpio(&mut self, dev: DeviceId, n: usize, irq: Irq) {
        self.device_mut(dev).gpio_out[n] = Some(irq);
    }

    /// The sink wired to output line `n`, if any
    pub fn output_gpio(&self, dev: DeviceId, n: usize) -> Option<Irq> {
        self.device(dev).gpio_out[n].clone()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::kind::DeviceKind;
    use std::sync::atomic::{AtomicI32, Ordering};

    #[test]
    fn test_input_lines_fan_out() {
        let mut m = Machine::new();
        m.register_kind(DeviceKind::new("led", "System", 8, |_, _| Ok(())));
        let dev = m.try_create_device(None, "led").unwrap();

        let seen = Arc::new(AtomicI32::new(-1));
        let sink = seen.clone();
        m.init_input_gpios(dev, move |line, level| {
            sink.store((line as i32) * 10 + level, Ordering::SeqCst);
        }, 4);
        assert_eq!(m.device(dev).num_gpio_in(), 4);

        m.input_gpio(dev, 2).raise();
        assert_eq!(seen.load(Ordering::SeqCst), 21);
        m.input_gpio(dev, 3).lower();
        assert_eq!(seen.load(Ordering::SeqCst), 30);
    }

    #[test]
    fn test_output_lines_rewire() {
        let mut m = Machine::new();
        m.register_kind(DeviceKind::new("led", "System", 8, |_, _| Ok(())));
        let dev = m.try_create_device(None, "led").unwrap();
        m.init_output_gpios(dev, 2);
        assert!(m.output_gpio(dev, 0).is_none());

        let hits = Arc::new(AtomicI32::new(0));
        let sink = hits.clone();
        let irq = Irq::new(0, Arc::new(move |_, level| {
            sink.fetch_add(level, Ordering::SeqCst);
        }));
        m.connect_output_gpio(dev, 1, irq.clone());
        m.output_gpio(dev, 1).unwrap().raise();
        assert_eq!(hits.load(Ordering::SeqCst), 1);

        // rewiring is allowed
        m.connect_output_gpio(dev, 1, irq);
        assert_eq!(m.device(dev).num_gpio_out(), 2);
    }

    #[test]
    #[should_panic(expected = "input GPIO lines already allocated")]
    fn test_input_lines_allocate_once() {
        let mut m = Machine::new();
        m.register_kind(DeviceKind::new("led", "System", 8, |_, _| Ok(())));
        let dev = m.try_create_device(None, "led").unwrap();
        m.init_input_gpios(dev, |_, _| {}, 1);
        m.init_input_gpios(dev, |_, _| {}, 1);
    }
}
