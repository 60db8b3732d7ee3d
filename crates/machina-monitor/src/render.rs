//! Human-readable renderers for the info commands
//!
//! The tree dump lists every bus and device from the root down with
//! printable properties and GPIO counts; the state dump renders the
//! introspection field tree with a fixed name column, width-scaled hex
//! scalars and 16-bytes-per-row buffer dumps.

use machina_core::machine::{BusId, DeviceId, Machine};
use machina_core::monitor::Monitor;
use serde_json::Value;

const NAME_COLUMN_WIDTH: usize = 23;

fn indented(mon: &mut dyn Monitor, indent: usize, text: &str) {
    mon.print(&format!("{:indent$}{text}\n", ""));
}

/// Pretty-print the whole tree from the root bus down
pub fn print_tree(m: &Machine, mon: &mut dyn Monitor) {
    if let Some(root) = m.try_root() {
        print_bus(m, root, mon, 0);
    }
}

fn print_bus(m: &Machine, bus: BusId, mon: &mut dyn Monitor, indent: usize) {
    let b = m.bus(bus);
    indented(mon, indent, &format!("bus: {}", b.name()));
    let indent = indent + 2;
    indented(mon, indent, &format!("type {}", b.kind().name));
    for &dev in b.children() {
        print_device(m, dev, mon, indent);
    }
}

fn print_device(m: &Machine, dev: DeviceId, mon: &mut dyn Monitor, indent: usize) {
    let device = m.device(dev);
    indented(
        mon,
        indent,
        &format!(
            "dev: {}, id \"{}\"",
            device.kind().name,
            device.user_id().unwrap_or("")
        ),
    );
    let indent = indent + 2;
    if device.num_gpio_in() > 0 {
        indented(mon, indent, &format!("gpio-in {}", device.num_gpio_in()));
    }
    if device.num_gpio_out() > 0 {
        indented(mon, indent, &format!("gpio-out {}", device.num_gpio_out()));
    }
    let bus_kind = m.bus(device.parent_bus()).kind().clone();
    print_props(m, dev, &device.kind().properties, "dev", mon, indent);
    print_props(m, dev, &bus_kind.properties, "bus", mon, indent);
    if let Some(print_dev) = bus_kind.print_dev.clone() {
        print_dev(m, dev, mon, indent);
    }
    for &child in device.child_buses() {
        print_bus(m, child, mon, indent);
    }
}

fn print_props(
    m: &Machine,
    dev: DeviceId,
    props: &[machina_core::property::Property],
    prefix: &str,
    mon: &mut dyn Monitor,
    indent: usize,
) {
    let storage = m.device(dev).storage();
    for prop in props {
        if let Some(value) = prop.print(storage) {
            indented(mon, indent, &format!("{prefix}-prop: {} = {value}", prop.name));
        }
    }
}

/// One line per registered kind
pub fn print_kind_list(m: &Machine, mon: &mut dyn Monitor) {
    for kind in m.registry().iter() {
        mon.print(&format!("{}\n", kind.summary_line()));
    }
}

/// Render a `device_show` envelope for an interactive reader
pub fn render_device_state(mon: &mut dyn Monitor, data: &Value) {
    mon.print(&format!(
        "dev: {}, id \"{}\", version {}\n",
        data["device"].as_str().unwrap_or(""),
        data["id"].as_str().unwrap_or(""),
        data["version"]
    ));
    if let Some(fields) = data["fields"].as_array() {
        for field in fields {
            print_field(mon, field, 2);
        }
    }
}

fn print_field(mon: &mut dyn Monitor, field: &Value, indent: usize) {
    let name = field["name"].as_str().unwrap_or("");
    let size = field["size"].as_u64().unwrap_or(0) as usize;
    let empty = Vec::new();
    let elems = field["elems"].as_array().unwrap_or(&empty);

    for (elem_no, elem) in elems.iter().enumerate() {
        let mut column_pos = (indent + name.len()) as isize;
        if let Value::Array(sub_elems) = elem {
            mon.print(&format!("{:indent$}{name}", ""));
            for sub_elem in sub_elems {
                print_elem(mon, sub_elem, size, column_pos, indent + 2);
                column_pos = -1;
            }
        } else {
            if elem_no == 0 {
                mon.print(&format!("{:indent$}{name}", ""));
            } else {
                column_pos = -1;
            }
            print_elem(mon, elem, size, column_pos, indent);
        }
    }
}

fn print_elem(mon: &mut dyn Monitor, elem: &Value, size: usize, column_pos: isize, indent: usize) {
    if elem.is_object() {
        // a nested structure starts its own block
        if column_pos >= 0 {
            mon.print(".\n");
        }
        print_field(mon, elem, indent + 2);
        return;
    }

    mon.print(":");
    let column_pos = column_pos + 1;
    if (column_pos as usize) < NAME_COLUMN_WIDTH {
        mon.print(&" ".repeat(NAME_COLUMN_WIDTH - column_pos as usize));
    }

    match elem {
        Value::Number(n) => {
            let value = n.as_u64().unwrap_or(0);
            mon.print(&format!("{value:0width$x}\n", width = size * 2));
        }
        Value::String(hex) => print_buffer(mon, hex, size),
        _ => unreachable!("unexpected element type in state dump"),
    }
}

fn print_buffer(mon: &mut dyn Monitor, hex: &str, size: usize) {
    let bytes: Vec<u8> = (0..hex.len() / 2)
        .map(|i| u8::from_str_radix(&hex[2 * i..2 * i + 2], 16).unwrap_or(0))
        .collect();
    let mut n = 0;
    while n < bytes.len() {
        mon.print(&format!(" {:02x}", bytes[n]));
        n += 1;
        if n < size {
            if n % 16 == 0 {
                mon.print(&format!("\n{:width$}", "", width = NAME_COLUMN_WIDTH));
            } else if n % 8 == 0 {
                mon.print(" -");
            }
        }
    }
    if bytes.len() < size {
        mon.print(" ...");
    }
    mon.print("\n");
}

#[cfg(test)]
mod tests {
    use super::*;
    use machina_core::monitor::StringMonitor;
    use serde_json::json;

    #[test]
    fn test_render_scalar_field() {
        let mut mon = StringMonitor::new();
        render_device_state(
            &mut mon,
            &json!({
                "device": "blinker.0",
                "id": "led0",
                "version": 3,
                "fields": [{ "name": "ticks", "elems": [0xdeadbeefu32], "size": 4 }],
            }),
        );
        // name column is padded out to a fixed width before the value
        let expected = format!(
            "dev: blinker.0, id \"led0\", version 3\n  ticks:{}deadbeef\n",
            " ".repeat(15)
        );
        assert_eq!(mon.contents(), expected);
    }

    #[test]
    fn test_render_array_field() {
        let mut mon = StringMonitor::new();
        render_device_state(
            &mut mon,
            &json!({
                "device": "quad.0",
                "id": "",
                "version": 1,
                "fields": [{ "name": "lanes", "elems": [[7], [8]], "size": 2 }],
            }),
        );
        let lines = mon.lines().join("|");
        // first element aligned after the name, continuation restarts at ':'
        assert!(lines.contains("lanes:"), "{lines}");
        assert!(lines.contains("0007"), "{lines}");
        assert!(lines.contains("0008"), "{lines}");
    }

    #[test]
    fn test_render_truncated_buffer() {
        let hex: String = (0u8..16).map(|b| format!("{b:02x}")).collect();
        let mut mon = StringMonitor::new();
        render_device_state(
            &mut mon,
            &json!({
                "device": "nic.0",
                "id": "",
                "version": 1,
                "fields": [{ "name": "fifo", "elems": [hex], "size": 24 }],
            }),
        );
        let out = mon.contents();
        assert!(out.contains(" 00 01 02 03 04 05 06 07 - 08 09"), "{out}");
        assert!(out.trim_end().ends_with("..."), "{out}");
    }
}
