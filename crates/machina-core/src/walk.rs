//! Tree traversal and recursive searches
//!
//! One pre-order walk underlies everything here: the reset walkers, the
//! id search, and device iteration all derive from it. Callbacks must not
//! create or destroy siblings of the node being visited; children are
//! snapshotted before descent.

use crate::machine::{BusId, DeviceId, Machine};

impl Machine {
    /// Pre-order walk from a bus: the bus first, then each hosted device
    /// subtree. The first non-zero callback return halts the walk with
    /// that code.
    pub fn walk_bus<D, B>(&mut self, bus: BusId, devfn: &mut D, busfn: &mut B) -> i32
    where
        D: FnMut(&mut Machine, DeviceId) -> i32,
        B: FnMut(&mut Machine, BusId) -> i32,
    {
        let rc = busfn(self, bus);
        if rc != 0 {
            return rc;
        }
        let children = self.bus(bus).children().to_vec();
        for dev in children {
            let rc = self.walk_device(dev, devfn, busfn);
            if rc != 0 {
                return rc;
            }
        }
        0
    }

    /// Pre-order walk from a device: the device first, then each child
    /// bus subtree
    pub fn walk_device<D, B>(&mut self, dev: DeviceId, devfn: &mut D, busfn: &mut B) -> i32
    where
        D: FnMut(&mut Machine, DeviceId) -> i32,
        B: FnMut(&mut Machine, BusId) -> i32,
    {
        let rc = devfn(self, dev);
        if rc != 0 {
            return rc;
        }
        let buses = self.device(dev).child_buses().to_vec();
        for bus in buses {
            let rc = self.walk_bus(bus, devfn, busfn);
            if rc != 0 {
                return rc;
            }
        }
        0
    }

    /// Pre-order device visitor below `bus`; stops at the first `Some`
    pub fn visit_devices<R>(
        &self,
        bus: BusId,
        f: &mut dyn FnMut(&Machine, DeviceId) -> Option<R>,
    ) -> Option<R> {
        for &dev in self.bus(bus).children() {
            if let Some(found) = f(self, dev) {
                return Some(found);
            }
            for &child in self.device(dev).child_buses() {
                if let Some(found) = self.visit_devices(child, f) {
                    return Some(found);
                }
            }
        }
        None
    }

    /// All devices below `bus` in pre-order
    pub fn devices_preorder(&self, bus: BusId) -> Vec<DeviceId> {
        let mut out = Vec::new();
        self.visit_devices::<()>(bus, &mut |_, dev| {
            out.push(dev);
            None
        });
        out
    }

    /// First device in the whole tree whose user id matches
    pub fn find_device_by_id(&self, id: &str) -> Option<DeviceId> {
        let root = self.try_root()?;
        self.visit_devices(root, &mut |m, dev| {
            (m.device(dev).user_id() == Some(id)).then_some(dev)
        })
    }

    /// First bus below (and including) `from` matching the given name
    /// and/or kind filters
    pub fn find_bus_recursive(
        &self,
        from: BusId,
        name: Option<&str>,
        kind_name: Option<&str>,
    ) -> Option<BusId> {
        let bus = self.bus(from);
        let name_ok = name.map_or(true, |n| bus.name() == n);
        let kind_ok = kind_name.map_or(true, |k| bus.kind().name == k);
        if name_ok && kind_ok {
            return Some(from);
        }
        for &dev in bus.children() {
            for &child in self.device(dev).child_buses() {
                if let Some(found) = self.find_bus_recursive(child, name, kind_name) {
                    return Some(found);
                }
            }
        }
        None
    }
}
