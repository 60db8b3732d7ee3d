//! Monitor command boundary
//!
//! Thin handlers over the core: each returns 0 on success (or served
//! help) and -1 on failure, reporting the error on the monitor. The
//! structured `device_show` payload is also available directly for
//! protocol clients.

use machina_core::error::{DevError, Result};
use machina_core::machine::Machine;
use machina_core::monitor::Monitor;
use machina_core::options::OptionBag;
use serde_json::Value;
use tracing::warn;

use crate::render;

fn report(mon: &mut dyn Monitor, err: &DevError) {
    warn!("command failed: {err}");
    mon.print(&format!("{err}\n"));
}

/// Add a device described by an option bag. For an interactive sink,
/// `driver=?` and `?` serve help instead of constructing.
pub fn device_add(m: &mut Machine, opts: &OptionBag, mon: &mut dyn Monitor) -> i32 {
    if mon.is_interactive() && m.device_help(opts, mon) {
        return 0;
    }
    match m.device_add(opts, mon) {
        Ok(_) => 0,
        Err(e) => {
            report(mon, &e);
            -1
        }
    }
}

/// Request removal of the device carrying `id`; actual teardown is up to
/// the kind's unplug callback
pub fn device_del(m: &mut Machine, id: &str, mon: &mut dyn Monitor) -> i32 {
    let Some(dev) = m.find_device_by_id(id) else {
        report(mon, &DevError::device_not_found(id));
        return -1;
    };
    match m.unplug_device(dev) {
        Ok(()) => 0,
        Err(e) => {
            report(mon, &e);
            -1
        }
    }
}

/// Resolve a device (absolute path or bare id) and produce its state
/// envelope `{device, id, version, fields}`
pub fn device_show(
    m: &mut Machine,
    path: &str,
    full: bool,
    mon: &mut dyn Monitor,
) -> Result<Value> {
    let dev = m.resolve_device_path(path, mon)?;
    m.introspect_device(dev, full)
}

/// Command wrapper around [`device_show`]: renders for interactive
/// readers, reports failures, returns the exit status
pub fn exec_device_show(m: &mut Machine, path: &str, mon: &mut dyn Monitor) -> i32 {
    match device_show(m, path, false, mon) {
        Ok(data) => {
            if mon.is_interactive() {
                render::render_device_state(mon, &data);
            }
            0
        }
        Err(e) => {
            report(mon, &e);
            if matches!(e, DevError::DeviceNoState { .. }) && mon.is_interactive() {
                mon.print("Note: device may simply lack state reporting support\n");
            }
            -1
        }
    }
}

/// Pretty-print the bus/device tree from the root down
pub fn info_tree(m: &Machine, mon: &mut dyn Monitor) {
    render::print_tree(m, mon);
}

/// List every registered device kind, one summary line each
pub fn info_device_kinds(m: &Machine, mon: &mut dyn Monitor) {
    render::print_kind_list(m, mon);
}
