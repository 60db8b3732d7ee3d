//! The machine value: kind registry, node arenas, root bus, creation
//!
//! All formerly process-wide state (registry, root bus, hot-plug gate,
//! modified latch) lives behind one `Machine` created at startup. Devices
//! and buses are arena entries addressed by opaque handles; parent and
//! child links are handles, so back-references carry no ownership.

use std::collections::HashMap;
use std::fmt;
use std::sync::Arc;

use tracing::{debug, info};

use crate::gpio::Irq;
use crate::kind::{BusKind, DeviceKind, KindRegistry};
use crate::options::OptionBag;
use crate::property::{self, GlobalProperty, Property};
use crate::storage::DeviceStorage;
use crate::vmstate::VmStateRegistry;

/// Handle of a device arena entry
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct DeviceId(u32);

impl fmt::Display for DeviceId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "dev{}", self.0)
    }
}

/// Handle of a bus arena entry
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct BusId(u32);

impl fmt::Display for BusId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "bus{}", self.0)
    }
}

/// Device lifecycle state
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum DeviceLifecycle {
    Created,
    Initialized,
}

/// Migration instance alias carried until init registers the state
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct InstanceAlias {
    pub alias_id: i32,
    pub required_version: u32,
}

/// A device instance attached to exactly one bus
pub struct Device {
    pub(crate) kind: Arc<DeviceKind>,
    pub(crate) parent_bus: BusId,
    pub(crate) user_id: Option<String>,
    pub(crate) child_buses: Vec<BusId>,
    pub(crate) lifecycle: DeviceLifecycle,
    pub(crate) hotplugged: bool,
    pub(crate) storage: DeviceStorage,
    pub(crate) gpio_in: Vec<Irq>,
    pub(crate) gpio_out: Vec<Option<Irq>>,
    pub(crate) instance_id_alias: Option<InstanceAlias>,
    pub(crate) opts: Option<OptionBag>,
}

impl Device {
    pub fn kind(&self) -> &Arc<DeviceKind> {
        &self.kind
    }

    pub fn parent_bus(&self) -> BusId {
        self.parent_bus
    }

    pub fn user_id(&self) -> Option<&str> {
        self.user_id.as_deref()
    }

    /// Child buses, newest first
    pub fn child_buses(&self) -> &[BusId] {
        &self.child_buses
    }

    pub fn lifecycle(&self) -> DeviceLifecycle {
        self.lifecycle
    }

    pub fn hotplugged(&self) -> bool {
        self.hotplugged
    }

    pub fn storage(&self) -> &DeviceStorage {
        &self.storage
    }

    pub fn storage_mut(&mut self) -> &mut DeviceStorage {
        &mut self.storage
    }

    pub fn num_gpio_in(&self) -> usize {
        self.gpio_in.len()
    }

    pub fn num_gpio_out(&self) -> usize {
        self.gpio_out.len()
    }

    /// The option bag the device was created from, if retained
    pub fn opts(&self) -> Option<&OptionBag> {
        self.opts.as_ref()
    }
}

impl fmt::Debug for Device {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Device")
            .field("kind", &self.kind.name)
            .field("id", &self.user_id)
            .field("lifecycle", &self.lifecycle)
            .field("hotplugged", &self.hotplugged)
            .finish()
    }
}

/// A bus hosting devices of one kind
pub struct Bus {
    pub(crate) kind: Arc<BusKind>,
    pub(crate) parent: Option<DeviceId>,
    pub(crate) name: String,
    pub(crate) children: Vec<DeviceId>,
    pub(crate) allow_hotplug: bool,
}

impl Bus {
    pub fn kind(&self) -> &Arc<BusKind> {
        &self.kind
    }

    /// The owning device; `None` only for the root and stand-alone
    /// reset targets
    pub fn parent(&self) -> Option<DeviceId> {
        self.parent
    }

    pub fn name(&self) -> &str {
        &self.name
    }

    /// Hosted devices, newest first
    pub fn children(&self) -> &[DeviceId] {
        &self.children
    }

    pub fn allow_hotplug(&self) -> bool {
        self.allow_hotplug
    }

    pub fn set_allow_hotplug(&mut self, allow: bool) {
        self.allow_hotplug = allow;
    }
}

impl fmt::Debug for Bus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Bus")
            .field("name", &self.name)
            .field("kind", &self.kind.name)
            .field("children", &self.children.len())
            .finish()
    }
}

/// Root of the composition core
pub struct Machine {
    registry: KindRegistry,
    devices: HashMap<DeviceId, Device>,
    buses: HashMap<BusId, Bus>,
    next_device: u32,
    next_bus: u32,
    root: Option<BusId>,
    system_bus_kind: Arc<BusKind>,
    creation_done: bool,
    hot_added: bool,
    hot_removed: bool,
    globals: Vec<GlobalProperty>,
    pub(crate) vmstate: VmStateRegistry,
    pub(crate) reset_entries: Vec<BusId>,
}

impl Default for Machine {
    fn default() -> Self {
        Self::new()
    }
}

impl Machine {
    pub fn new() -> Self {
        Self {
            registry: KindRegistry::new(),
            devices: HashMap::new(),
            buses: HashMap::new(),
            next_device: 0,
            next_bus: 0,
            root: None,
            system_bus_kind: Arc::new(BusKind::new("System")),
            creation_done: false,
            hot_added: false,
            hot_removed: false,
            globals: Vec::new(),
            vmstate: VmStateRegistry::default(),
            reset_entries: Vec::new(),
        }
    }

    /// The bus kind backing the root bus
    pub fn system_bus_kind(&self) -> &Arc<BusKind> {
        &self.system_bus_kind
    }

    pub fn registry(&self) -> &KindRegistry {
        &self.registry
    }

    /// Register a device kind
    pub fn register_kind(&mut self, kind: DeviceKind) -> Arc<DeviceKind> {
        self.registry.register(kind)
    }

    /// Register a process-wide property override
    pub fn register_global(&mut self, global: GlobalProperty) {
        self.globals.push(global);
    }

    /// Declare initial machine setup finished; from here on every new
    /// device must pass the hot-plug gate
    pub fn machine_creation_done(&mut self) {
        info!("machine creation done, hot-plug gate armed");
        self.creation_done = true;
    }

    pub fn creation_done(&self) -> bool {
        self.creation_done
    }

    /// Whether any device was hot-added or hot-removed
    pub fn machine_modified(&self) -> bool {
        self.hot_added || self.hot_removed
    }

    pub(crate) fn note_hot_removed(&mut self) {
        self.hot_removed = true;
    }

    /// Migration-state registrations, for introspection by collaborators
    pub fn vmstate(&self) -> &VmStateRegistry {
        &self.vmstate
    }

    // --- arena access ---

    pub fn device(&self, id: DeviceId) -> &Device {
        self.devices
            .get(&id)
            .unwrap_or_else(|| panic!("stale device handle {id}"))
    }

    pub fn device_mut(&mut self, id: DeviceId) -> &mut Device {
        self.devices
            .get_mut(&id)
            .unwrap_or_else(|| panic!("stale device handle {id}"))
    }

    pub fn get_device(&self, id: DeviceId) -> Option<&Device> {
        self.devices.get(&id)
    }

    pub fn bus(&self, id: BusId) -> &Bus {
        self.buses
            .get(&id)
            .unwrap_or_else(|| panic!("stale bus handle {id}"))
    }

    pub fn bus_mut(&mut self, id: BusId) -> &mut Bus {
        self.buses
            .get_mut(&id)
            .unwrap_or_else(|| panic!("stale bus handle {id}"))
    }

    pub fn get_bus(&self, id: BusId) -> Option<&Bus> {
        self.buses.get(&id)
    }

    pub(crate) fn take_device(&mut self, id: DeviceId) -> Option<Device> {
        self.devices.remove(&id)
    }

    pub(crate) fn take_bus(&mut self, id: BusId) -> Option<Bus> {
        self.buses.remove(&id)
    }

    /// Number of live devices
    pub fn device_count(&self) -> usize {
        self.devices.len()
    }

    // --- tree construction ---

    /// The root bus, created on first access
    pub fn root_bus(&mut self) -> BusId {
        if let Some(root) = self.root {
            return root;
        }
        let kind = self.system_bus_kind.clone();
        let root = self.alloc_bus(&kind, None, "main-system-bus".to_string());
        self.root = Some(root);
        debug!("created root bus");
        root
    }

    /// The root bus, if any device has forced it into existence
    pub fn try_root(&self) -> Option<BusId> {
        self.root
    }

    fn alloc_bus(&mut self, kind: &Arc<BusKind>, parent: Option<DeviceId>, name: String) -> BusId {
        self.next_bus += 1;
        let id = BusId(self.next_bus);
        self.buses.insert(
            id,
            Bus {
                kind: kind.clone(),
                parent,
                name,
                children: Vec::new(),
                allow_hotplug: false,
            },
        );
        id
    }

    /// Create a bus. Without a name, the bus is called
    /// `<parent-id>.<n>` when the parent device has a user id, otherwise
    /// `<kind-name>.<n>` lower-cased, with `n` the parent's current
    /// child-bus count. A parentless bus becomes a top-level reset target.
    pub fn create_bus(
        &mut self,
        kind: &Arc<BusKind>,
        parent: Option<DeviceId>,
        name: Option<&str>,
    ) -> BusId {
        let name = match name {
            Some(name) => name.to_string(),
            None => {
                let n = parent.map_or(0, |p| self.device(p).child_buses.len());
                match parent.and_then(|p| self.device(p).user_id.clone()) {
                    Some(id) => format!("{id}.{n}"),
                    None => format!("{}.{n}", kind.name).to_lowercase(),
                }
            }
        };
        let id = self.alloc_bus(kind, parent, name);
        match parent {
            Some(p) => self.device_mut(p).child_buses.insert(0, id),
            None => self.reset_entries.push(id),
        }
        debug!("created bus '{}' ({})", self.bus(id).name, kind.name);
        id
    }

    /// Create a device of a registered kind on `bus` (the root when
    /// `None`); `None` when the kind cannot be resolved for that bus.
    /// The instance is left in `Created` state with defaults applied.
    pub fn try_create_device(&mut self, bus: Option<BusId>, name: &str) -> Option<DeviceId> {
        let bus = bus.unwrap_or_else(|| self.root_bus());
        let bus_kind_name = self.bus(bus).kind.name.clone();
        let kind = self.registry.find(Some(&bus_kind_name), name)?;
        Some(self.create_device_from_kind(bus, &kind))
    }

    /// Like [`Machine::try_create_device`] but an unresolvable kind is a
    /// fatal wiring error
    pub fn create_device(&mut self, bus: Option<BusId>, name: &str) -> DeviceId {
        let bus_name = bus.map(|b| self.bus(b).name.clone());
        self.try_create_device(bus, name).unwrap_or_else(|| {
            panic!(
                "unknown device '{name}' for bus '{}'",
                bus_name.as_deref().unwrap_or("main-system-bus")
            )
        })
    }

    /// Allocate and attach an instance of `kind`. Defaults are applied in
    /// order: kind schema, host bus-kind schema, then globals. Past
    /// machine creation the bus must allow hot-plug.
    pub fn create_device_from_kind(&mut self, bus: BusId, kind: &Arc<DeviceKind>) -> DeviceId {
        let (bus_kind, bus_name, bus_allows_hotplug) = {
            let b = self.bus(bus);
            (b.kind.clone(), b.name.clone(), b.allow_hotplug)
        };
        assert_eq!(
            bus_kind.name, kind.bus_kind,
            "device kind '{}' cannot attach to a '{}' bus",
            kind.name, bus_kind.name
        );

        let mut storage = DeviceStorage::new(kind.instance_size);
        property::apply_defaults(&kind.properties, &mut storage);
        property::apply_defaults(&bus_kind.properties, &mut storage);
        let all_props: Vec<Property> = kind
            .properties
            .iter()
            .chain(bus_kind.properties.iter())
            .cloned()
            .collect();
        property::apply_globals(&self.globals, &kind.name, &all_props, &mut storage);

        let mut hotplugged = false;
        if self.creation_done {
            assert!(
                bus_allows_hotplug,
                "bus '{bus_name}' does not accept devices after machine creation"
            );
            hotplugged = true;
            self.hot_added = true;
        }

        self.next_device += 1;
        let id = DeviceId(self.next_device);
        self.devices.insert(
            id,
            Device {
                kind: kind.clone(),
                parent_bus: bus,
                user_id: None,
                child_buses: Vec::new(),
                lifecycle: DeviceLifecycle::Created,
                hotplugged,
                storage,
                gpio_in: Vec::new(),
                gpio_out: Vec::new(),
                instance_id_alias: None,
                opts: None,
            },
        );
        self.bus_mut(bus).children.insert(0, id);
        debug!("created device '{}' on bus '{}'", kind.name, bus_name);
        id
    }

    // --- lookups along the tree ---

    /// Look up a child bus of `dev` by name
    pub fn child_bus(&self, dev: DeviceId, name: &str) -> Option<BusId> {
        self.device(dev)
            .child_buses
            .iter()
            .copied()
            .find(|&b| self.bus(b).name == name)
    }

    /// Find a property of the device's kind or of its host bus kind
    pub fn device_property(&self, dev: DeviceId, name: &str) -> Option<Property> {
        let device = self.device(dev);
        let bus_kind = &self.bus(device.parent_bus).kind;
        device
            .kind
            .properties
            .iter()
            .chain(bus_kind.properties.iter())
            .find(|p| p.name == name)
            .cloned()
    }

    /// Zero-based rank of `dev` among its bus's devices of the same kind
    pub fn instance_no(&self, dev: DeviceId) -> usize {
        let device = self.device(dev);
        let mut instance = 0;
        for &sibling in &self.bus(device.parent_bus).children {
            if sibling == dev {
                break;
            }
            if Arc::ptr_eq(&self.device(sibling).kind, &device.kind) {
                instance += 1;
            }
        }
        instance
    }

    /// Record a migration instance alias; only possible before init
    pub fn set_instance_id_alias(&mut self, dev: DeviceId, alias_id: i32, required_version: u32) {
        let device = self.device_mut(dev);
        assert_eq!(
            device.lifecycle,
            DeviceLifecycle::Created,
            "instance alias must be set before init"
        );
        device.instance_id_alias = Some(InstanceAlias {
            alias_id,
            required_version,
        });
    }

    /// Root-to-leaf firmware path for a device; each ancestor bus kind
    /// contributes a segment, falling back to the device kind name
    pub fn firmware_path(&self, dev: DeviceId) -> String {
        let mut path = String::new();
        self.firmware_path_segment(Some(dev), &mut path);
        path.pop();
        path
    }

    fn firmware_path_segment(&self, dev: Option<DeviceId>, path: &mut String) {
        if let Some(d) = dev {
            let device = self.device(d);
            let bus = self.bus(device.parent_bus);
            let hook = bus.kind.get_firmware_path.clone();
            let kind_name = device.kind.name.clone();
            let parent = bus.parent;
            self.firmware_path_segment(parent, path);
            match hook {
                Some(f) => path.push_str(&f(self, d)),
                None => path.push_str(&kind_name),
            }
        }
        path.push('/');
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::kind::DeviceKind;
    use crate::property::{Property, PropertyKind, PropertyValue};

    fn machine_with_blinker() -> (Machine, Arc<DeviceKind>) {
        let mut m = Machine::new();
        let kind = m.register_kind(
            DeviceKind::new("blinker", "System", 16, |_, _| Ok(())).with_props(vec![
                Property::new("rate", PropertyKind::UInt32, 0)
                    .with_default(PropertyValue::UInt32(1000)),
            ]),
        );
        (m, kind)
    }

    #[test]
    fn test_root_bus_is_lazy_and_stable() {
        let mut m = Machine::new();
        assert!(m.try_root().is_none());
        let root = m.root_bus();
        assert_eq!(m.root_bus(), root);
        assert_eq!(m.bus(root).name(), "main-system-bus");
        assert!(m.bus(root).parent().is_none());
    }

    #[test]
    fn test_create_device_applies_defaults() {
        let (mut m, _) = machine_with_blinker();
        let dev = m.try_create_device(None, "blinker").unwrap();
        assert_eq!(m.device(dev).storage().read_u32(0), 1000);
        assert_eq!(m.device(dev).lifecycle(), DeviceLifecycle::Created);
        assert!(!m.device(dev).hotplugged());
    }

    #[test]
    fn test_globals_override_defaults() {
        let (mut m, _) = machine_with_blinker();
        m.register_global(GlobalProperty::new("blinker", "rate", "250"));
        let dev = m.try_create_device(None, "blinker").unwrap();
        assert_eq!(m.device(dev).storage().read_u32(0), 250);
    }

    #[test]
    fn test_children_are_head_inserted() {
        let (mut m, _) = machine_with_blinker();
        let first = m.try_create_device(None, "blinker").unwrap();
        let second = m.try_create_device(None, "blinker").unwrap();
        let root = m.root_bus();
        assert_eq!(m.bus(root).children(), &[second, first]);
        assert_eq!(m.instance_no(second), 0);
        assert_eq!(m.instance_no(first), 1);
    }

    #[test]
    fn test_bus_naming_rules() {
        let (mut m, _) = machine_with_blinker();
        let dev = m.try_create_device(None, "blinker").unwrap();
        let sub = Arc::new(BusKind::new("Blink"));

        let anon = m.create_bus(&sub, Some(dev), None);
        assert_eq!(m.bus(anon).name(), "blink.0");

        m.device_mut(dev).user_id = Some("led0".to_string());
        let named = m.create_bus(&sub, Some(dev), None);
        assert_eq!(m.bus(named).name(), "led0.1");

        let explicit = m.create_bus(&sub, Some(dev), Some("lane"));
        assert_eq!(m.bus(explicit).name(), "lane");

        // newest first on the parent device
        assert_eq!(m.device(dev).child_buses(), &[explicit, named, anon]);
    }

    #[test]
    fn test_create_device_wires_fixed_topology() {
        // a hub whose init attaches a built-in port; the port kind is
        // registered up front, so resolution failing would be a wiring bug
        let mut m = Machine::new();
        let hub_kind = Arc::new(BusKind::new("Hub"));
        let init_kind = hub_kind.clone();
        m.register_kind(DeviceKind::new("port", "Hub", 8, |_, _| Ok(())));
        m.register_kind(DeviceKind::new("hub", "System", 8, move |m, dev| {
            let bus = m.create_bus(&init_kind, Some(dev), None);
            let port = m.create_device(Some(bus), "port");
            m.init_device(port)
        }));

        let hub = m.try_create_device(None, "hub").unwrap();
        m.init_device(hub).unwrap();
        let bus = m.device(hub).child_buses()[0];
        assert_eq!(m.bus(bus).children().len(), 1);
        let port = m.bus(bus).children()[0];
        assert_eq!(m.device(port).kind().name, "port");
        assert_eq!(m.device(port).lifecycle(), DeviceLifecycle::Initialized);
    }

    #[test]
    #[should_panic(expected = "unknown device 'toaster' for bus 'main-system-bus'")]
    fn test_create_device_panics_on_unknown_kind() {
        let mut m = Machine::new();
        m.create_device(None, "toaster");
    }

    #[test]
    fn test_parentless_bus_is_reset_target() {
        let mut m = Machine::new();
        let root = m.root_bus();
        assert!(m.reset_entries.is_empty());
        let kind = Arc::new(BusKind::new("Side"));
        let side = m.create_bus(&kind, None, Some("side.0"));
        assert_eq!(m.reset_entries, vec![side]);
        assert_ne!(side, root);
    }

    #[test]
    #[should_panic(expected = "does not accept devices after machine creation")]
    fn test_hotplug_gate_asserts() {
        let (mut m, _) = machine_with_blinker();
        m.root_bus();
        m.machine_creation_done();
        m.try_create_device(None, "blinker");
    }

    #[test]
    fn test_hotplug_marks_device_and_machine() {
        let (mut m, _) = machine_with_blinker();
        let root = m.root_bus();
        m.bus_mut(root).set_allow_hotplug(true);
        m.machine_creation_done();
        assert!(!m.machine_modified());
        let dev = m.try_create_device(None, "blinker").unwrap();
        assert!(m.device(dev).hotplugged());
        assert!(m.machine_modified());
    }

    #[test]
    fn test_firmware_path_fallback_and_hook() {
        let (mut m, _) = machine_with_blinker();
        let dev = m.try_create_device(None, "blinker").unwrap();
        assert_eq!(m.firmware_path(dev), "/blinker");

        let slotted = Arc::new(BusKind::new("Slotted").with_firmware_path(|m, d| {
            format!("slot@{}", m.instance_no(d))
        }));
        let bus = m.create_bus(&slotted, Some(dev), Some("slots"));
        let child = m.register_kind(DeviceKind::new("card", "Slotted", 8, |_, _| Ok(())));
        let card = m.create_device_from_kind(bus, &child);
        assert_eq!(m.firmware_path(card), "/blinker/slot@0");
    }
}
