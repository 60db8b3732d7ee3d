//! Device and bus kind descriptors
//!
//! A kind is an immutable descriptor carrying the property schema, the
//! lifecycle callbacks, and an optional state descriptor. Kinds are
//! registered once at startup and never destroyed; instances reference
//! them through `Arc`.

use std::fmt;
use std::sync::Arc;

use tracing::debug;

use crate::machine::{BusId, DeviceId, Machine};
use crate::monitor::Monitor;
use crate::property::Property;
use crate::vmstate::StateDescriptor;

/// Device init callback; a failure aborts construction
pub type InitHook = Arc<dyn Fn(&mut Machine, DeviceId) -> anyhow::Result<()> + Send + Sync>;
/// Device teardown callback, run while the instance is still linked
pub type ExitHook = Arc<dyn Fn(&mut Machine, DeviceId) + Send + Sync>;
/// Device reset callback; a non-zero return halts the surrounding walk
pub type DeviceResetHook = Arc<dyn Fn(&mut Machine, DeviceId) -> i32 + Send + Sync>;
/// Hot-unplug callback; mandatory on kinds hosted by hotpluggable buses
pub type UnplugHook = Arc<dyn Fn(&mut Machine, DeviceId) -> anyhow::Result<()> + Send + Sync>;
/// Bus reset callback; a non-zero return halts the surrounding walk
pub type BusResetHook = Arc<dyn Fn(&mut Machine, BusId) -> i32 + Send + Sync>;
/// Bus-kind extension lines in the tree dump
pub type PrintDevHook = Arc<dyn Fn(&Machine, DeviceId, &mut dyn Monitor, usize) + Send + Sync>;
/// Per-bus-kind firmware path segment for a hosted device
pub type FirmwarePathHook = Arc<dyn Fn(&Machine, DeviceId) -> String + Send + Sync>;

/// Immutable descriptor of a device kind
#[derive(Clone)]
pub struct DeviceKind {
    pub name: String,
    pub alias: Option<String>,
    pub description: Option<String>,
    pub user_creatable: bool,
    /// Name of the bus kind that may host instances
    pub bus_kind: String,
    /// Bytes of per-instance backing storage
    pub instance_size: usize,
    pub properties: Vec<Property>,
    pub init: InitHook,
    pub exit: Option<ExitHook>,
    pub reset: Option<DeviceResetHook>,
    pub unplug: Option<UnplugHook>,
    pub state: Option<Arc<StateDescriptor>>,
}

impl DeviceKind {
    pub fn new(
        name: impl Into<String>,
        bus_kind: impl Into<String>,
        instance_size: usize,
        init: impl Fn(&mut Machine, DeviceId) -> anyhow::Result<()> + Send + Sync + 'static,
    ) -> Self {
        Self {
            name: name.into(),
            alias: None,
            description: None,
            user_creatable: true,
            bus_kind: bus_kind.into(),
            instance_size,
            properties: Vec::new(),
            init: Arc::new(init),
            exit: None,
            reset: None,
            unplug: None,
            state: None,
        }
    }

    pub fn with_alias(mut self, alias: impl Into<String>) -> Self {
        self.alias = Some(alias.into());
        self
    }

    pub fn with_description(mut self, description: impl Into<String>) -> Self {
        self.description = Some(description.into());
        self
    }

    pub fn with_props(mut self, properties: Vec<Property>) -> Self {
        self.properties = properties;
        self
    }

    pub fn with_exit(
        mut self,
        exit: impl Fn(&mut Machine, DeviceId) + Send + Sync + 'static,
    ) -> Self {
        self.exit = Some(Arc::new(exit));
        self
    }

    pub fn with_reset(
        mut self,
        reset: impl Fn(&mut Machine, DeviceId) -> i32 + Send + Sync + 'static,
    ) -> Self {
        self.reset = Some(Arc::new(reset));
        self
    }

    pub fn with_unplug(
        mut self,
        unplug: impl Fn(&mut Machine, DeviceId) -> anyhow::Result<()> + Send + Sync + 'static,
    ) -> Self {
        self.unplug = Some(Arc::new(unplug));
        self
    }

    pub fn with_unplug_hook(mut self, unplug: UnplugHook) -> Self {
        self.unplug = Some(unplug);
        self
    }

    pub fn with_state(mut self, state: Arc<StateDescriptor>) -> Self {
        self.state = Some(state);
        self
    }

    /// Hide the kind from user-driven creation
    pub fn no_user(mut self) -> Self {
        self.user_creatable = false;
        self
    }

    /// One-line summary used by kind listings and `driver=?` help
    pub fn summary_line(&self) -> String {
        let mut line = format!("name \"{}\", bus {}", self.name, self.bus_kind);
        if let Some(alias) = &self.alias {
            line.push_str(&format!(", alias \"{alias}\""));
        }
        if let Some(desc) = &self.description {
            line.push_str(&format!(", desc \"{desc}\""));
        }
        if !self.user_creatable {
            line.push_str(", no-user");
        }
        line
    }
}

impl fmt::Debug for DeviceKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("DeviceKind")
            .field("name", &self.name)
            .field("alias", &self.alias)
            .field("bus_kind", &self.bus_kind)
            .field("instance_size", &self.instance_size)
            .field("user_creatable", &self.user_creatable)
            .field("properties", &self.properties.len())
            .finish()
    }
}

/// Immutable descriptor of a bus kind
#[derive(Clone, Default)]
pub struct BusKind {
    pub name: String,
    /// Properties imposed on every hosted device
    pub properties: Vec<Property>,
    pub reset: Option<BusResetHook>,
    pub print_dev: Option<PrintDevHook>,
    pub get_firmware_path: Option<FirmwarePathHook>,
}

impl BusKind {
    pub fn new(name: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            ..Default::default()
        }
    }

    pub fn with_props(mut self, properties: Vec<Property>) -> Self {
        self.properties = properties;
        self
    }

    pub fn with_reset(
        mut self,
        reset: impl Fn(&mut Machine, BusId) -> i32 + Send + Sync + 'static,
    ) -> Self {
        self.reset = Some(Arc::new(reset));
        self
    }

    pub fn with_print_dev(
        mut self,
        print_dev: impl Fn(&Machine, DeviceId, &mut dyn Monitor, usize) + Send + Sync + 'static,
    ) -> Self {
        self.print_dev = Some(Arc::new(print_dev));
        self
    }

    pub fn with_firmware_path(
        mut self,
        get: impl Fn(&Machine, DeviceId) -> String + Send + Sync + 'static,
    ) -> Self {
        self.get_firmware_path = Some(Arc::new(get));
        self
    }
}

impl fmt::Debug for BusKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("BusKind")
            .field("name", &self.name)
            .field("properties", &self.properties.len())
            .finish()
    }
}

/// Registered device kinds, newest first
#[derive(Debug, Default)]
pub struct KindRegistry {
    kinds: Vec<Arc<DeviceKind>>,
}

impl KindRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    /// Register a kind; panics when a property slot falls outside
    /// `instance_size`. Registration prepends, so the newest kind wins
    /// name lookups.
    pub fn register(&mut self, kind: DeviceKind) -> Arc<DeviceKind> {
        for prop in &kind.properties {
            assert!(
                prop.offset + prop.kind.width() <= kind.instance_size,
                "property '{}.{}' slot exceeds instance size",
                kind.name,
                prop.name
            );
        }
        debug!("registered device kind '{}'", kind.name);
        let kind = Arc::new(kind);
        self.kinds.insert(0, kind.clone());
        kind
    }

    /// Find a kind by name, then by alias, optionally filtered by the
    /// hosting bus kind
    pub fn find(&self, bus_kind: Option<&str>, name: &str) -> Option<Arc<DeviceKind>> {
        let fits = |kind: &&Arc<DeviceKind>| match bus_kind {
            Some(bk) => kind.bus_kind == bk,
            None => true,
        };
        if let Some(kind) = self.kinds.iter().filter(fits).find(|k| k.name == name) {
            return Some(kind.clone());
        }
        self.kinds
            .iter()
            .filter(fits)
            .find(|k| k.alias.as_deref() == Some(name))
            .cloned()
    }

    pub fn iter(&self) -> impl Iterator<Item = &Arc<DeviceKind>> {
        self.kinds.iter()
    }

    pub fn len(&self) -> usize {
        self.kinds.len()
    }

    pub fn is_empty(&self) -> bool {
        self.kinds.is_empty()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::property::{PropertyKind, PropertyValue};

    fn nop_kind(name: &str, bus: &str) -> DeviceKind {
        DeviceKind::new(name, bus, 16, |_, _| Ok(()))
    }

    #[test]
    fn test_find_by_name_then_alias() {
        let mut reg = KindRegistry::new();
        reg.register(nop_kind("virt-serial", "System").with_alias("serial"));
        reg.register(nop_kind("i2c-temp", "I2C"));

        assert_eq!(reg.find(None, "virt-serial").unwrap().name, "virt-serial");
        assert_eq!(reg.find(None, "serial").unwrap().name, "virt-serial");
        assert!(reg.find(Some("I2C"), "serial").is_none());
        assert_eq!(reg.find(Some("I2C"), "i2c-temp").unwrap().name, "i2c-temp");
        assert!(reg.find(None, "missing").is_none());
    }

    #[test]
    fn test_name_beats_alias_across_kinds() {
        let mut reg = KindRegistry::new();
        reg.register(nop_kind("led", "System"));
        reg.register(nop_kind("panel", "System").with_alias("led"));
        // the name pass over the whole list runs before the alias pass
        assert_eq!(reg.find(None, "led").unwrap().name, "led");
    }

    #[test]
    fn test_newest_registration_wins() {
        let mut reg = KindRegistry::new();
        reg.register(nop_kind("led", "System").with_description("old"));
        reg.register(nop_kind("led", "System").with_description("new"));
        assert_eq!(
            reg.find(None, "led").unwrap().description.as_deref(),
            Some("new")
        );
    }

    #[test]
    #[should_panic(expected = "slot exceeds instance size")]
    fn test_register_rejects_oversized_slot() {
        let mut reg = KindRegistry::new();
        let kind = DeviceKind::new("tiny", "System", 4, |_, _| Ok(())).with_props(vec![
            Property::new("wide", PropertyKind::UInt64, 0)
                .with_default(PropertyValue::UInt64(0)),
        ]);
        reg.register(kind);
    }

    #[test]
    fn test_summary_line() {
        let kind = nop_kind("virt-serial", "System")
            .with_alias("serial")
            .with_description("16550A UART")
            .no_user();
        assert_eq!(
            kind.summary_line(),
            "name \"virt-serial\", bus System, alias \"serial\", desc \"16550A UART\", no-user"
        );
        assert_eq!(
            nop_kind("led", "System").summary_line(),
            "name \"led\", bus System"
        );
    }
}
