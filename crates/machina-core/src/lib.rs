//! machina-core: device composition core
//!
//! Assembles a virtual machine out of heterogeneous device models without
//! board-specific wiring code. Provides:
//! - Typed property system (declarative schema, per-kind parse/print)
//! - Device-kind registry and the bus/device tree
//! - Path resolution over the tree
//! - Lifecycle management with hot-plug gating and reset walks
//! - Option binder turning option bags into initialized devices
//! - Declarative state introspection for the monitor
//!
//! Everything runs under the host's single serialising guard; the core
//! itself never blocks or spawns.

pub mod error;
pub mod factory;
pub mod gpio;
pub mod kind;
pub mod lifecycle;
pub mod machine;
pub mod monitor;
pub mod options;
pub mod path;
pub mod property;
pub mod storage;
pub mod vmstate;
pub mod walk;

pub use error::{DevError, Result};
pub use gpio::{allocate_irqs, GpioFanout, Irq};
pub use kind::{BusKind, DeviceKind, KindRegistry};
pub use lifecycle::simple_unplug_hook;
pub use machine::{Bus, BusId, Device, DeviceId, DeviceLifecycle, InstanceAlias, Machine};
pub use monitor::{Monitor, StdoutMonitor, StringMonitor};
pub use options::OptionBag;
pub use property::{GlobalProperty, Property, PropertyKind, PropertyValue};
pub use storage::{DeviceStorage, HeapRef};
pub use vmstate::{
    dump_fields, CountPolicy, FieldFlags, StateDescriptor, StateField, VmStateRegistry,
};

/// Prelude for convenient imports
pub mod prelude {
    pub use super::error::{DevError, Result};
    pub use super::kind::{BusKind, DeviceKind};
    pub use super::machine::{BusId, DeviceId, DeviceLifecycle, Machine};
    pub use super::monitor::{Monitor, StringMonitor};
    pub use super::options::OptionBag;
    pub use super::property::{GlobalProperty, Property, PropertyKind, PropertyValue};
    pub use super::vmstate::{StateDescriptor, StateField};
}
