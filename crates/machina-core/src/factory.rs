//! The option binder: device construction from an option bag
//!
//! Order of business: resolve the kind, pick a host bus, pass the
//! hot-plug gate, create, assign the id, apply user properties, init.
//! Any failure after creation rolls the half-built device back before the
//! error propagates. Help requests (`driver=?`, `?`) are a distinct
//! operation that describes instead of constructing.

use tracing::info;

use crate::error::{DevError, Result};
use crate::machine::{DeviceId, Machine};
use crate::monitor::Monitor;
use crate::options::OptionBag;

impl Machine {
    /// Construct and initialize a device from an option bag
    pub fn device_add(&mut self, opts: &OptionBag, mon: &mut dyn Monitor) -> Result<DeviceId> {
        let driver = opts
            .get("driver")
            .ok_or_else(|| DevError::missing_parameter("driver"))?;

        let kind = match self.registry().find(None, driver) {
            Some(kind) if kind.user_creatable => kind,
            _ => {
                if mon.is_interactive() {
                    mon.print("Try with argument '?' for a list.\n");
                }
                return Err(DevError::invalid_parameter_value("driver", "a driver name"));
            }
        };

        let bus = match opts.get("bus") {
            Some(path) => {
                let bus = self.resolve_bus_path(path, mon)?;
                let bus_kind = self.bus(bus).kind().name.clone();
                if bus_kind != kind.bus_kind {
                    return Err(DevError::bad_bus_for_device(driver, bus_kind));
                }
                bus
            }
            None => {
                let root = self.root_bus();
                self.find_bus_recursive(root, None, Some(&kind.bus_kind))
                    .ok_or_else(|| {
                        DevError::no_bus_for_device(kind.name.as_str(), kind.bus_kind.as_str())
                    })?
            }
        };
        if self.creation_done() && !self.bus(bus).allow_hotplug() {
            return Err(DevError::bus_no_hotplug(self.bus(bus).name()));
        }

        if let Some(id) = opts.id() {
            if self.find_device_by_id(id).is_some() {
                return Err(DevError::invalid_parameter_value("id", "a unique device id"));
            }
        }

        let dev = self.create_device_from_kind(bus, &kind);
        if let Some(id) = opts.id() {
            self.device_mut(dev).user_id = Some(id.to_string());
        }

        for (name, value) in opts.iter() {
            // these name the kind and the location, not a field
            if name == "driver" || name == "bus" {
                continue;
            }
            let Some(prop) = self.device_property(dev, name) else {
                self.free_device(dev);
                return Err(DevError::property_not_found(kind.name.as_str(), name));
            };
            let parsed = prop.parse_into(self.device_mut(dev).storage_mut(), value);
            if let Err(e) = parsed {
                self.free_device(dev);
                return Err(e);
            }
        }

        if self.init_device(dev).is_err() {
            // init already freed the device
            return Err(DevError::DeviceInitFailed {
                kind: driver.to_string(),
            });
        }
        self.device_mut(dev).opts = Some(opts.clone());
        info!("added device '{driver}'");
        Ok(dev)
    }

    /// Serve a help request instead of constructing: `driver=?` lists the
    /// user-creatable kinds, a bare `?` lists the referenced kind's
    /// settable properties. Returns whether help was served.
    pub fn device_help(&self, opts: &OptionBag, mon: &mut dyn Monitor) -> bool {
        if opts.get("driver") == Some("?") {
            for kind in self.registry().iter().filter(|k| k.user_creatable) {
                mon.print(&format!("{}\n", kind.summary_line()));
            }
            return true;
        }
        if opts.get("?").is_none() {
            return false;
        }
        let Some(driver) = opts.get("driver") else {
            return false;
        };
        let Some(kind) = self.registry().find(None, driver) else {
            return false;
        };
        for prop in kind.properties.iter().filter(|p| p.kind.has_parser()) {
            mon.print(&format!(
                "{}.{}={}\n",
                kind.name,
                prop.name,
                prop.kind.type_name()
            ));
        }
        true
    }
}
