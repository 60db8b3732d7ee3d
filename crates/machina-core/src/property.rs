//! Typed device properties
//!
//! Property kinds are a data-only sum type with per-variant parse and print;
//! the schema row ties a kind to a named slot at a fixed offset in the
//! device's storage. Defaults are applied in schema order at creation time,
//! kind defaults first, then host bus-kind defaults, then process-wide
//! global overrides.

use serde::{Deserialize, Serialize};
use tracing::warn;

use crate::error::{DevError, Result};
use crate::storage::DeviceStorage;

/// Value type of a property slot
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum PropertyKind {
    /// on/off switch stored as one byte
    Bit,
    UInt8,
    UInt16,
    UInt32,
    Int32,
    UInt64,
    /// 32-bit value parsed and printed in hex
    Hex32,
    /// 64-bit value parsed and printed in hex
    Hex64,
    /// Heap-cell-backed string; the slot holds the cell reference
    Str,
    /// Six-byte hardware address, `aa:bb:cc:dd:ee:ff`
    MacAddr,
    /// Legacy opaque slot: no parser, no printer, never shown to users
    Opaque { size: usize },
}

impl PropertyKind {
    /// Name shown in property help lines
    pub fn type_name(&self) -> &'static str {
        match self {
            PropertyKind::Bit => "on/off",
            PropertyKind::UInt8 => "uint8",
            PropertyKind::UInt16 => "uint16",
            PropertyKind::UInt32 => "uint32",
            PropertyKind::Int32 => "int32",
            PropertyKind::UInt64 => "uint64",
            PropertyKind::Hex32 => "hex32",
            PropertyKind::Hex64 => "hex64",
            PropertyKind::Str => "string",
            PropertyKind::MacAddr => "macaddr",
            PropertyKind::Opaque { .. } => "opaque",
        }
    }

    /// Bytes the slot occupies in device storage
    pub fn width(&self) -> usize {
        match self {
            PropertyKind::Bit | PropertyKind::UInt8 => 1,
            PropertyKind::UInt16 => 2,
            PropertyKind::UInt32 | PropertyKind::Int32 | PropertyKind::Hex32 => 4,
            PropertyKind::UInt64 | PropertyKind::Hex64 | PropertyKind::Str => 8,
            PropertyKind::MacAddr => 6,
            PropertyKind::Opaque { size } => *size,
        }
    }

    /// Whether textual assignment is possible
    pub fn has_parser(&self) -> bool {
        !matches!(self, PropertyKind::Opaque { .. })
    }

    /// Whether the slot can be rendered for users
    pub fn has_printer(&self) -> bool {
        !matches!(self, PropertyKind::Opaque { .. })
    }

    /// Parse a textual value; `None` when malformed or out of range
    pub fn parse(&self, text: &str) -> Option<PropertyValue> {
        match self {
            PropertyKind::Bit => match text {
                "on" => Some(PropertyValue::Bit(true)),
                "off" => Some(PropertyValue::Bit(false)),
                _ => None,
            },
            PropertyKind::UInt8 => text.parse().ok().map(PropertyValue::UInt8),
            PropertyKind::UInt16 => text.parse().ok().map(PropertyValue::UInt16),
            PropertyKind::UInt32 => text.parse().ok().map(PropertyValue::UInt32),
            PropertyKind::Int32 => text.parse().ok().map(PropertyValue::Int32),
            PropertyKind::UInt64 => text.parse().ok().map(PropertyValue::UInt64),
            PropertyKind::Hex32 => parse_hex(text)
                .and_then(|v| u32::try_from(v).ok())
                .map(PropertyValue::Hex32),
            PropertyKind::Hex64 => parse_hex(text).map(PropertyValue::Hex64),
            PropertyKind::Str => Some(PropertyValue::Str(text.to_string())),
            PropertyKind::MacAddr => parse_macaddr(text).map(PropertyValue::MacAddr),
            PropertyKind::Opaque { .. } => None,
        }
    }
}

fn parse_hex(text: &str) -> Option<u64> {
    let digits = text.strip_prefix("0x").unwrap_or(text);
    if digits.is_empty() {
        return None;
    }
    u64::from_str_radix(digits, 16).ok()
}

fn parse_macaddr(text: &str) -> Option<[u8; 6]> {
    let mut mac = [0u8; 6];
    let mut parts = text.split(':');
    for slot in mac.iter_mut() {
        let part = parts.next()?;
        if part.len() != 2 {
            return None;
        }
        *slot = u8::from_str_radix(part, 16).ok()?;
    }
    if parts.next().is_some() {
        return None;
    }
    Some(mac)
}

/// A parsed property value
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum PropertyValue {
    Bit(bool),
    UInt8(u8),
    UInt16(u16),
    UInt32(u32),
    Int32(i32),
    UInt64(u64),
    Hex32(u32),
    Hex64(u64),
    Str(String),
    MacAddr([u8; 6]),
}

impl PropertyValue {
    /// Whether this value belongs to the given kind
    pub fn matches(&self, kind: &PropertyKind) -> bool {
        matches!(
            (self, kind),
            (PropertyValue::Bit(_), PropertyKind::Bit)
                | (PropertyValue::UInt8(_), PropertyKind::UInt8)
                | (PropertyValue::UInt16(_), PropertyKind::UInt16)
                | (PropertyValue::UInt32(_), PropertyKind::UInt32)
                | (PropertyValue::Int32(_), PropertyKind::Int32)
                | (PropertyValue::UInt64(_), PropertyKind::UInt64)
                | (PropertyValue::Hex32(_), PropertyKind::Hex32)
                | (PropertyValue::Hex64(_), PropertyKind::Hex64)
                | (PropertyValue::Str(_), PropertyKind::Str)
                | (PropertyValue::MacAddr(_), PropertyKind::MacAddr)
        )
    }
}

impl std::fmt::Display for PropertyValue {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            PropertyValue::Bit(true) => write!(f, "on"),
            PropertyValue::Bit(false) => write!(f, "off"),
            PropertyValue::UInt8(v) => write!(f, "{v}"),
            PropertyValue::UInt16(v) => write!(f, "{v}"),
            PropertyValue::UInt32(v) => write!(f, "{v}"),
            PropertyValue::Int32(v) => write!(f, "{v}"),
            PropertyValue::UInt64(v) => write!(f, "{v}"),
            PropertyValue::Hex32(v) => write!(f, "0x{v:x}"),
            PropertyValue::Hex64(v) => write!(f, "0x{v:x}"),
            PropertyValue::Str(v) => write!(f, "{v}"),
            PropertyValue::MacAddr(m) => write!(
                f,
                "{:02x}:{:02x}:{:02x}:{:02x}:{:02x}:{:02x}",
                m[0], m[1], m[2], m[3], m[4], m[5]
            ),
        }
    }
}

/// One row of a kind's property schema
#[derive(Debug, Clone)]
pub struct Property {
    pub name: String,
    pub kind: PropertyKind,
    pub offset: usize,
    pub default: Option<PropertyValue>,
}

impl Property {
    pub fn new(name: impl Into<String>, kind: PropertyKind, offset: usize) -> Self {
        Self {
            name: name.into(),
            kind,
            offset,
            default: None,
        }
    }

    /// Attach a default; the value must match the kind
    pub fn with_default(mut self, value: PropertyValue) -> Self {
        assert!(
            value.matches(&self.kind),
            "default for property '{}' does not match its kind",
            self.name
        );
        self.default = Some(value);
        self
    }

    /// Parse `text` and store the result in this property's slot
    pub fn parse_into(&self, storage: &mut DeviceStorage, text: &str) -> Result<()> {
        let value = self
            .kind
            .parse(text)
            .ok_or_else(|| DevError::property_rejected(&self.name, text))?;
        self.store(storage, &value);
        Ok(())
    }

    /// Write a value into this property's slot
    pub fn store(&self, storage: &mut DeviceStorage, value: &PropertyValue) {
        debug_assert!(value.matches(&self.kind));
        match value {
            PropertyValue::Bit(v) => storage.write_u8(self.offset, *v as u8),
            PropertyValue::UInt8(v) => storage.write_u8(self.offset, *v),
            PropertyValue::UInt16(v) => storage.write_u16(self.offset, *v),
            PropertyValue::UInt32(v) | PropertyValue::Hex32(v) => {
                storage.write_u32(self.offset, *v)
            }
            PropertyValue::Int32(v) => storage.write_i32(self.offset, *v),
            PropertyValue::UInt64(v) | PropertyValue::Hex64(v) => {
                storage.write_u64(self.offset, *v)
            }
            PropertyValue::Str(v) => {
                let old = storage.read_ref(self.offset);
                if old != 0 {
                    storage.free_cell(old);
                }
                let r = storage.alloc_cell(v.clone().into_bytes());
                storage.write_ref(self.offset, r);
            }
            PropertyValue::MacAddr(m) => storage.write_bytes(self.offset, m),
        }
    }

    /// Read this property's slot back as a value; `None` for opaque slots
    pub fn load(&self, storage: &DeviceStorage) -> Option<PropertyValue> {
        Some(match self.kind {
            PropertyKind::Bit => PropertyValue::Bit(storage.read_u8(self.offset) != 0),
            PropertyKind::UInt8 => PropertyValue::UInt8(storage.read_u8(self.offset)),
            PropertyKind::UInt16 => PropertyValue::UInt16(storage.read_u16(self.offset)),
            PropertyKind::UInt32 => PropertyValue::UInt32(storage.read_u32(self.offset)),
            PropertyKind::Int32 => PropertyValue::Int32(storage.read_i32(self.offset)),
            PropertyKind::UInt64 => PropertyValue::UInt64(storage.read_u64(self.offset)),
            PropertyKind::Hex32 => PropertyValue::Hex32(storage.read_u32(self.offset)),
            PropertyKind::Hex64 => PropertyValue::Hex64(storage.read_u64(self.offset)),
            PropertyKind::Str => {
                let r = storage.read_ref(self.offset);
                let text = storage
                    .cell(r)
                    .map(|b| String::from_utf8_lossy(b).into_owned())
                    .unwrap_or_default();
                PropertyValue::Str(text)
            }
            PropertyKind::MacAddr => {
                let mut m = [0u8; 6];
                m.copy_from_slice(storage.read_bytes(self.offset, 6));
                PropertyValue::MacAddr(m)
            }
            PropertyKind::Opaque { .. } => return None,
        })
    }

    /// Render the slot for users; `None` for opaque slots
    pub fn print(&self, storage: &DeviceStorage) -> Option<String> {
        if !self.kind.has_printer() {
            return None;
        }
        self.load(storage).map(|v| v.to_string())
    }

    /// Release any indirect data owned by this slot
    pub fn free(&self, storage: &mut DeviceStorage) {
        if self.kind == PropertyKind::Str {
            let r = storage.read_ref(self.offset);
            if r != 0 {
                storage.free_cell(r);
                storage.write_ref(self.offset, 0);
            }
        }
    }
}

/// Process-wide property override keyed by kind and property name
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct GlobalProperty {
    pub driver: String,
    pub property: String,
    pub value: String,
}

impl GlobalProperty {
    pub fn new(
        driver: impl Into<String>,
        property: impl Into<String>,
        value: impl Into<String>,
    ) -> Self {
        Self {
            driver: driver.into(),
            property: property.into(),
            value: value.into(),
        }
    }
}

/// Set every slot with a declared default, in schema order
pub fn apply_defaults(props: &[Property], storage: &mut DeviceStorage) {
    for prop in props {
        if let Some(default) = &prop.default {
            prop.store(storage, default);
        }
    }
}

/// Apply matching global overrides on top of the defaults
pub fn apply_globals(
    globals: &[GlobalProperty],
    driver: &str,
    props: &[Property],
    storage: &mut DeviceStorage,
) {
    for global in globals.iter().filter(|g| g.driver == driver) {
        match props.iter().find(|p| p.name == global.property) {
            Some(prop) => {
                if prop.parse_into(storage, &global.value).is_err() {
                    warn!(
                        "global default {}.{}={} rejected, skipping",
                        global.driver, global.property, global.value
                    );
                }
            }
            None => warn!(
                "global default names unknown property {}.{}",
                global.driver, global.property
            ),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_parse_and_print_scalars() {
        assert_eq!(
            PropertyKind::UInt32.parse("500"),
            Some(PropertyValue::UInt32(500))
        );
        assert_eq!(PropertyKind::UInt8.parse("256"), None);
        assert_eq!(
            PropertyKind::Int32.parse("-7"),
            Some(PropertyValue::Int32(-7))
        );
        assert_eq!(
            PropertyKind::Hex32.parse("0xdeadbeef"),
            Some(PropertyValue::Hex32(0xdead_beef))
        );
        assert_eq!(
            PropertyKind::Hex64.parse("ff"),
            Some(PropertyValue::Hex64(0xff))
        );
        assert_eq!(PropertyValue::Hex32(0xbeef).to_string(), "0xbeef");
        assert_eq!(PropertyKind::Bit.parse("on"), Some(PropertyValue::Bit(true)));
        assert_eq!(PropertyKind::Bit.parse("1"), None);
    }

    #[test]
    fn test_parse_macaddr() {
        assert_eq!(
            PropertyKind::MacAddr.parse("52:54:00:12:34:56"),
            Some(PropertyValue::MacAddr([0x52, 0x54, 0x00, 0x12, 0x34, 0x56]))
        );
        assert_eq!(PropertyKind::MacAddr.parse("52:54:00:12:34"), None);
        assert_eq!(PropertyKind::MacAddr.parse("52:54:00:12:34:5g"), None);
        assert_eq!(
            PropertyValue::MacAddr([0x52, 0x54, 0, 0x12, 0x34, 0x56]).to_string(),
            "52:54:00:12:34:56"
        );
    }

    #[test]
    fn test_store_load_round_trip() {
        let mut st = DeviceStorage::new(32);
        let rate = Property::new("rate", PropertyKind::UInt32, 0);
        rate.parse_into(&mut st, "1000").unwrap();
        assert_eq!(rate.load(&st), Some(PropertyValue::UInt32(1000)));
        assert_eq!(rate.print(&st), Some("1000".to_string()));

        let label = Property::new("label", PropertyKind::Str, 8);
        label.parse_into(&mut st, "front-led").unwrap();
        assert_eq!(label.print(&st), Some("front-led".to_string()));
        assert_eq!(st.cell_count(), 1);

        // re-assignment replaces the old cell
        label.parse_into(&mut st, "rear-led").unwrap();
        assert_eq!(st.cell_count(), 1);
        assert_eq!(label.print(&st), Some("rear-led".to_string()));

        label.free(&mut st);
        assert_eq!(st.cell_count(), 0);
        label.free(&mut st);
        assert_eq!(st.cell_count(), 0);
    }

    #[test]
    fn test_parse_rejection() {
        let mut st = DeviceStorage::new(8);
        let rate = Property::new("rate", PropertyKind::UInt32, 0);
        let err = rate.parse_into(&mut st, "fast").unwrap_err();
        assert_eq!(
            err.to_string(),
            "Property 'rate' doesn't take value 'fast'"
        );
    }

    #[test]
    fn test_opaque_is_hidden() {
        let st = DeviceStorage::new(8);
        let legacy = Property::new("shadow", PropertyKind::Opaque { size: 4 }, 0);
        assert!(!legacy.kind.has_parser());
        assert_eq!(legacy.print(&st), None);
        assert!(legacy.kind.parse("anything").is_none());
    }

    #[test]
    fn test_defaults_then_globals() {
        let props = vec![
            Property::new("rate", PropertyKind::UInt32, 0)
                .with_default(PropertyValue::UInt32(1000)),
            Property::new("enabled", PropertyKind::Bit, 4).with_default(PropertyValue::Bit(true)),
        ];
        let mut st = DeviceStorage::new(8);
        apply_defaults(&props, &mut st);
        assert_eq!(st.read_u32(0), 1000);
        assert_eq!(st.read_u8(4), 1);

        let globals = vec![
            GlobalProperty::new("blinker", "rate", "250"),
            GlobalProperty::new("other", "rate", "9"),
            GlobalProperty::new("blinker", "bogus", "1"),
        ];
        apply_globals(&globals, "blinker", &props, &mut st);
        assert_eq!(st.read_u32(0), 250);
        assert_eq!(st.read_u8(4), 1);
    }
}
