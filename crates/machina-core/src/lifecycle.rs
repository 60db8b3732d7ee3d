//! Device lifecycle: init, teardown, hot-unplug, reset
//!
//! allocate → Created → init → Initialized → (unplug) → teardown. A failed
//! init frees the half-built device before the error propagates, so the
//! tree never holds partially constructed nodes.

use std::sync::Arc;

use tracing::{debug, error, warn};

use crate::error::{DevError, Result};
use crate::kind::UnplugHook;
use crate::machine::{BusId, DeviceId, DeviceLifecycle, Machine};

impl Machine {
    /// Run the kind's init and register the state descriptor, if any,
    /// with the migration registry. On failure the device is freed and
    /// the hook's error propagated.
    pub fn init_device(&mut self, dev: DeviceId) -> anyhow::Result<()> {
        let device = self.device(dev);
        assert_eq!(
            device.lifecycle,
            DeviceLifecycle::Created,
            "init on an already initialized device"
        );
        let kind = device.kind.clone();
        if let Err(e) = (kind.init)(self, dev) {
            warn!("init of device '{}' failed: {e:#}", kind.name);
            self.free_device(dev);
            return Err(e);
        }
        if let Some(descriptor) = kind.state.clone() {
            let alias = self.device(dev).instance_id_alias;
            self.vmstate.register(dev, descriptor, alias);
        }
        self.device_mut(dev).lifecycle = DeviceLifecycle::Initialized;
        debug!("initialized device '{}'", kind.name);
        Ok(())
    }

    /// Like [`Machine::init_device`] but a failure terminates the
    /// process; only acceptable while the machine is still being built
    pub fn init_or_abort(&mut self, dev: DeviceId) {
        let kind_name = self.device(dev).kind.name.clone();
        if let Err(e) = self.init_device(dev) {
            error!("initialization of device {kind_name} failed: {e:#}");
            std::process::exit(1);
        }
    }

    /// Unlink a device and release it. Initialized devices first lose
    /// their child buses depth-first, their migration-state entry, and
    /// their retained option bag, and get their exit callback run.
    /// Every property's `free` runs exactly once.
    pub fn free_device(&mut self, dev: DeviceId) {
        let device = self.device(dev);
        let kind = device.kind.clone();
        let parent = device.parent_bus;

        if device.lifecycle == DeviceLifecycle::Initialized {
            while let Some(&bus) = self.device(dev).child_buses().first() {
                self.free_bus(bus);
            }
            self.vmstate.unregister(dev);
            if let Some(exit) = kind.exit.clone() {
                exit(self, dev);
            }
            self.device_mut(dev).opts = None;
        }

        self.bus_mut(parent).children.retain(|&d| d != dev);
        let bus_kind = self.bus(parent).kind.clone();
        let mut device = self
            .take_device(dev)
            .unwrap_or_else(|| panic!("stale device handle {dev}"));
        for prop in kind.properties.iter().chain(bus_kind.properties.iter()) {
            prop.free(&mut device.storage);
        }
        debug!("freed device '{}'", kind.name);
    }

    /// Release a bus and, recursively, every device it hosts. The root
    /// bus is never freed; parentless buses additionally leave the
    /// reset-handler registry.
    pub fn free_bus(&mut self, bus: BusId) {
        assert!(
            self.try_root() != Some(bus),
            "the root bus is never freed"
        );
        while let Some(&dev) = self.bus(bus).children().first() {
            self.free_device(dev);
        }
        let name = self.bus(bus).name().to_string();
        match self.bus(bus).parent() {
            Some(parent) => self.device_mut(parent).child_buses.retain(|&b| b != bus),
            None => self.reset_entries.retain(|&b| b != bus),
        }
        self.take_bus(bus);
        debug!("freed bus '{name}'");
    }

    /// Request removal of a device through its kind's unplug callback.
    /// The parent bus must permit hot-plug; the callback is mandatory on
    /// any kind reachable here and decides when the device actually goes
    /// away.
    pub fn unplug_device(&mut self, dev: DeviceId) -> Result<()> {
        let device = self.device(dev);
        let bus = self.bus(device.parent_bus);
        if !bus.allow_hotplug() {
            return Err(DevError::bus_no_hotplug(bus.name()));
        }
        let kind = device.kind.clone();
        let unplug = kind.unplug.clone().unwrap_or_else(|| {
            panic!("device kind '{}' has no unplug callback", kind.name)
        });
        self.note_hot_removed();
        unplug(self, dev).map_err(DevError::from)
    }

    /// Pre-order reset of a device subtree; the first non-zero callback
    /// return halts the walk with that code
    pub fn reset_device(&mut self, dev: DeviceId) -> i32 {
        self.walk_device(dev, &mut reset_one_device, &mut reset_one_bus)
    }

    /// Pre-order reset of a bus subtree
    pub fn reset_bus(&mut self, bus: BusId) -> i32 {
        self.walk_bus(bus, &mut reset_one_device, &mut reset_one_bus)
    }

    /// Run the registered top-level reset targets in registration order
    pub fn invoke_reset_handlers(&mut self) -> i32 {
        for bus in self.reset_entries.clone() {
            let rc = self.reset_bus(bus);
            if rc != 0 {
                return rc;
            }
        }
        0
    }
}

fn reset_one_device(m: &mut Machine, dev: DeviceId) -> i32 {
    match m.device(dev).kind().reset.clone() {
        Some(reset) => reset(m, dev),
        None => 0,
    }
}

fn reset_one_bus(m: &mut Machine, bus: BusId) -> i32 {
    match m.bus(bus).kind().reset.clone() {
        Some(reset) => reset(m, bus),
        None => 0,
    }
}

/// Stock unplug callback for kinds with no asynchronous teardown: the
/// device is freed on the spot
pub fn simple_unplug_hook() -> UnplugHook {
    Arc::new(|m, dev| {
        m.free_device(dev);
        Ok(())
    })
}
