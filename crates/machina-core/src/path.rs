//! Path resolution over the bus/device tree
//!
//! A path is a `/`-separated sequence of alternating bus and device
//! segments. A leading `/` anchors at the root; otherwise the first
//! segment names a bus found by recursive search. Device segments accept
//! a `name.n` instance qualifier, matched against kind names first and
//! aliases second. A trailing device segment resolves to its sole child
//! bus.

use crate::error::{DevError, Result};
use crate::machine::{BusId, DeviceId, Machine};
use crate::monitor::Monitor;

/// Split an optional `.n` instance qualifier off a device segment
fn split_instance_qualifier(segment: &str) -> (&str, usize) {
    if let Some((base, qualifier)) = segment.split_once('.') {
        if let Ok(n) = qualifier.parse::<usize>() {
            return (base, n);
        }
    }
    (segment, 0)
}

impl Machine {
    /// Resolve a path to a bus. Every segment the resolver cannot advance
    /// past reports `BusNotFound`; a path ending on a device resolves to
    /// that device's sole child bus, or fails with `DeviceNoBus` /
    /// `DeviceMultipleBuses`.
    pub fn resolve_bus_path(&mut self, path: &str, mon: &mut dyn Monitor) -> Result<BusId> {
        let mut segments = path.split('/').filter(|s| !s.is_empty());
        let mut bus = if path.starts_with('/') {
            self.root_bus()
        } else {
            let first = segments.next().unwrap_or("");
            let root = self.root_bus();
            self.find_bus_recursive(root, Some(first), None)
                .ok_or_else(|| DevError::bus_not_found(first))?
        };

        loop {
            let Some(segment) = segments.next() else {
                return Ok(bus);
            };
            let dev = match self.find_device_in_bus(bus, segment) {
                Some(dev) => dev,
                None => {
                    if mon.is_interactive() {
                        self.list_bus_devices(bus, mon);
                    }
                    return Err(DevError::bus_not_found(segment));
                }
            };

            let Some(bus_segment) = segments.next() else {
                // path ends on a device; accept it when the child bus is
                // unambiguous
                let buses = self.device(dev).child_buses();
                return match buses.len() {
                    0 => Err(DevError::DeviceNoBus {
                        device: segment.to_string(),
                    }),
                    1 => Ok(buses[0]),
                    _ => {
                        if mon.is_interactive() {
                            self.list_device_buses(dev, mon);
                        }
                        Err(DevError::DeviceMultipleBuses {
                            device: segment.to_string(),
                        })
                    }
                };
            };
            bus = match self.child_bus(dev, bus_segment) {
                Some(bus) => bus,
                None => {
                    if mon.is_interactive() {
                        self.list_device_buses(dev, mon);
                    }
                    return Err(DevError::bus_not_found(bus_segment));
                }
            };
        }
    }

    /// Resolve a device reference: an absolute path down to a device
    /// segment, or a bare id searched recursively over the whole tree
    pub fn resolve_device_path(&mut self, path: &str, mon: &mut dyn Monitor) -> Result<DeviceId> {
        if !path.starts_with('/') {
            return self
                .find_device_by_id(path)
                .ok_or_else(|| DevError::device_not_found(path));
        }
        let (bus_path, dev_segment) = path.rsplit_once('/').expect("absolute path");
        let bus_path = if bus_path.is_empty() { "/" } else { bus_path };
        let bus = self.resolve_bus_path(bus_path, mon)?;
        match self.find_device_in_bus(bus, dev_segment) {
            Some(dev) => Ok(dev),
            None => {
                if mon.is_interactive() {
                    self.list_bus_devices(bus, mon);
                }
                Err(DevError::device_not_found(dev_segment))
            }
        }
    }

    /// Match a device segment among a bus's children: the n-th child of
    /// the named kind, then the n-th child carrying the name as alias
    pub fn find_device_in_bus(&self, bus: BusId, segment: &str) -> Option<DeviceId> {
        let (name, instance) = split_instance_qualifier(segment);
        let children = self.bus(bus).children();

        let mut n = 0;
        for &dev in children {
            if self.device(dev).kind().name == name {
                if n == instance {
                    return Some(dev);
                }
                n += 1;
            }
        }
        let mut n = 0;
        for &dev in children {
            if self.device(dev).kind().alias.as_deref() == Some(name) {
                if n == instance {
                    return Some(dev);
                }
                n += 1;
            }
        }
        None
    }

    fn list_bus_devices(&self, bus: BusId, mon: &mut dyn Monitor) {
        let b = self.bus(bus);
        mon.print(&format!("devices at \"{}\":", b.name()));
        let mut sep = " ";
        for &dev in b.children() {
            let device = self.device(dev);
            mon.print(&format!("{sep}\"{}\"", device.kind().name));
            if let Some(id) = device.user_id() {
                mon.print(&format!("/\"{id}\""));
            }
            sep = ", ";
        }
        mon.print("\n");
    }

    fn list_device_buses(&self, dev: DeviceId, mon: &mut dyn Monitor) {
        let device = self.device(dev);
        let label = device.user_id().unwrap_or(&device.kind().name);
        mon.print(&format!("child buses at \"{label}\":"));
        let mut sep = " ";
        for &bus in device.child_buses() {
            mon.print(&format!("{sep}\"{}\"", self.bus(bus).name()));
            sep = ", ";
        }
        mon.print("\n");
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::kind::{BusKind, DeviceKind};
    use crate::monitor::StringMonitor;
    use std::sync::Arc;

    fn hub_init(kind: Arc<BusKind>) -> impl Fn(&mut Machine, DeviceId) -> anyhow::Result<()> {
        move |m, dev| {
            m.create_bus(&kind, Some(dev), None);
            Ok(())
        }
    }

    /// root ── hub(id=hub0) ── hub0.0 ── led ×2
    fn bridge_tree() -> (Machine, DeviceId, BusId) {
        let mut m = Machine::new();
        let hub_kind = Arc::new(BusKind::new("Hub"));
        m.register_kind(DeviceKind::new("hub", "System", 8, hub_init(hub_kind)));
        m.register_kind(DeviceKind::new("led", "Hub", 8, |_, _| Ok(())).with_alias("lamp"));
        let hub = m.try_create_device(None, "hub").unwrap();
        m.device_mut(hub).user_id = Some("hub0".to_string());
        m.init_device(hub).unwrap();
        let hub_bus = m.device(hub).child_buses()[0];
        for _ in 0..2 {
            let led = m.try_create_device(Some(hub_bus), "led").unwrap();
            m.init_device(led).unwrap();
        }
        (m, hub, hub_bus)
    }

    #[test]
    fn test_root_paths() {
        let mut m = Machine::new();
        let mut mon = StringMonitor::new();
        let root = m.resolve_bus_path("/", &mut mon).unwrap();
        assert_eq!(m.try_root(), Some(root));

        let err = m.resolve_bus_path("/bogus", &mut mon).unwrap_err();
        assert_eq!(err.to_string(), "Bus 'bogus' not found");
    }

    #[test]
    fn test_absolute_and_relative_bus_paths() {
        let (mut m, _, hub_bus) = bridge_tree();
        let mut mon = StringMonitor::new();
        assert_eq!(m.resolve_bus_path("/hub/hub0.0", &mut mon).unwrap(), hub_bus);
        assert_eq!(m.resolve_bus_path("hub0.0", &mut mon).unwrap(), hub_bus);
        assert_eq!(m.resolve_bus_path("main-system-bus", &mut mon).unwrap(), m.root_bus());
    }

    #[test]
    fn test_trailing_device_resolves_sole_bus() {
        let (mut m, _, hub_bus) = bridge_tree();
        let mut mon = StringMonitor::new();
        assert_eq!(m.resolve_bus_path("/hub", &mut mon).unwrap(), hub_bus);

        let err = m.resolve_bus_path("/hub/hub0.0/led", &mut mon).unwrap_err();
        assert_eq!(err.to_string(), "Device 'led' has no child bus");
    }

    #[test]
    fn test_multiple_child_buses_listed_when_interactive() {
        let (mut m, hub, _) = bridge_tree();
        let side = Arc::new(BusKind::new("Hub"));
        m.create_bus(&side, Some(hub), Some("extra"));

        let mut mon = StringMonitor::interactive();
        let err = m.resolve_bus_path("/hub", &mut mon).unwrap_err();
        assert_eq!(err.to_string(), "Device 'hub' has multiple child buses");
        assert_eq!(mon.contents(), "child buses at \"hub0\": \"extra\", \"hub0.0\"\n");

        // quiet on a non-interactive sink
        let mut quiet = StringMonitor::new();
        m.resolve_bus_path("/hub", &mut quiet).unwrap_err();
        assert_eq!(quiet.contents(), "");
    }

    #[test]
    fn test_instance_qualifiers_and_alias() {
        let (mut m, _, hub_bus) = bridge_tree();
        let newest = m.bus(hub_bus).children()[0];
        let oldest = m.bus(hub_bus).children()[1];
        let mut mon = StringMonitor::new();

        assert_eq!(m.resolve_device_path("/hub/hub0.0/led", &mut mon).unwrap(), newest);
        assert_eq!(m.resolve_device_path("/hub/hub0.0/led.1", &mut mon).unwrap(), oldest);
        assert_eq!(m.resolve_device_path("/hub/hub0.0/lamp.1", &mut mon).unwrap(), oldest);

        let err = m.resolve_device_path("/hub/hub0.0/led.2", &mut mon).unwrap_err();
        assert_eq!(err.to_string(), "Device 'led.2' has not been found");
    }

    #[test]
    fn test_device_by_bare_id() {
        let (mut m, hub, _) = bridge_tree();
        let mut mon = StringMonitor::new();
        assert_eq!(m.resolve_device_path("hub0", &mut mon).unwrap(), hub);
        let err = m.resolve_device_path("nope", &mut mon).unwrap_err();
        assert_eq!(err.to_string(), "Device 'nope' has not been found");
    }

    #[test]
    fn test_qualifier_splitting() {
        assert_eq!(split_instance_qualifier("led.3"), ("led", 3));
        assert_eq!(split_instance_qualifier("led"), ("led", 0));
        assert_eq!(split_instance_qualifier("led."), ("led.", 0));
        assert_eq!(split_instance_qualifier("a.b.2"), ("a.b.2", 0));
    }
}
