//! Declarative state descriptors and the introspection walker
//!
//! A kind's persistent state is described as a versioned list of fields
//! over its storage. The walker interprets the descriptor against a live
//! instance and produces a JSON field tree for the monitor: one object per
//! field with `name`, `elems`, `size`, and an optional `start` caption.
//! The same registration doubles as the migration subsystem's view of the
//! device.

use std::collections::HashMap;
use std::sync::Arc;

use bitflags::bitflags;
use serde_json::{json, Value};

use crate::error::{DevError, Result};
use crate::machine::{DeviceId, InstanceAlias, Machine};
use crate::storage::{DeviceStorage, HeapRef};

bitflags! {
    /// Interpretation flags of one state field
    #[derive(Debug, Clone, Copy, PartialEq, Eq)]
    pub struct FieldFlags: u32 {
        /// The slot holds a cell reference; dereference once
        const POINTER = 1 << 0;
        /// Every element slot holds a cell reference
        const ARRAY_OF_POINTER = 1 << 1;
        /// Recurse into the nested descriptor per element
        const STRUCT = 1 << 2;
        /// Raw bytes of fixed size
        const BUFFER = 1 << 3;
        /// Raw bytes; the size is read from another slot
        const VBUFFER = 1 << 4;
        /// Multiply the variable buffer size by the element size
        const MULTIPLY = 1 << 5;
        /// Delegate element rendering to the kind's queue printer
        const QUEUE = 1 << 6;
        /// Mask the integer down to one bit and rename the field
        const BITFIELD = 1 << 7;
    }
}

/// How many elements a field spans
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum CountPolicy {
    Scalar,
    Fixed(usize),
    /// Element count read as `i32` from another slot
    VarInt32 { offset: usize },
    /// Element count read as `u16` from another slot
    VarUint16 { offset: usize },
}

/// Hook run once before the walker reads the fields
pub type PreSaveHook = Arc<dyn Fn(&mut DeviceStorage) + Send + Sync>;
/// Version-dependent field presence predicate
pub type ExistsFn = Arc<dyn Fn(&DeviceStorage, u32) -> bool + Send + Sync>;
/// Renderer for one queue element
pub type QueuePrintFn = Arc<dyn Fn(&[u8]) -> Value + Send + Sync>;

/// One field of a state descriptor
#[derive(Clone)]
pub struct StateField {
    pub name: String,
    pub offset: usize,
    /// Element size in bytes
    pub size: usize,
    pub count: CountPolicy,
    pub flags: FieldFlags,
    pub exists: Option<ExistsFn>,
    pub nested: Option<Arc<StateDescriptor>>,
    pub queue_print: Option<QueuePrintFn>,
    /// Shift into the dereferenced cell for pointer fields
    pub start: usize,
    /// Caption marker passed through to the output tree
    pub start_caption: Option<String>,
    /// Replacement on-screen name for bitfields
    pub bit_name: Option<String>,
    pub bit_mask: u64,
    /// Slot the variable buffer size is read from
    pub size_offset: usize,
}

impl StateField {
    fn base(name: impl Into<String>, offset: usize, size: usize) -> Self {
        Self {
            name: name.into(),
            offset,
            size,
            count: CountPolicy::Scalar,
            flags: FieldFlags::empty(),
            exists: None,
            nested: None,
            queue_print: None,
            start: 0,
            start_caption: None,
            bit_name: None,
            bit_mask: 0,
            size_offset: 0,
        }
    }

    /// Unsigned integer field of 1, 2, 4 or 8 bytes
    pub fn scalar(name: impl Into<String>, offset: usize, size: usize) -> Self {
        assert!(
            matches!(size, 1 | 2 | 4 | 8),
            "scalar state fields must be 1, 2, 4 or 8 bytes"
        );
        Self::base(name, offset, size)
    }

    pub fn uint8(name: impl Into<String>, offset: usize) -> Self {
        Self::scalar(name, offset, 1)
    }

    pub fn uint16(name: impl Into<String>, offset: usize) -> Self {
        Self::scalar(name, offset, 2)
    }

    pub fn uint32(name: impl Into<String>, offset: usize) -> Self {
        Self::scalar(name, offset, 4)
    }

    pub fn uint64(name: impl Into<String>, offset: usize) -> Self {
        Self::scalar(name, offset, 8)
    }

    /// Single bit of an integer slot, shown as 0 or 1 under `bit_name`
    pub fn bitfield(
        name: impl Into<String>,
        offset: usize,
        size: usize,
        bit_name: impl Into<String>,
        bit_mask: u64,
    ) -> Self {
        let mut field = Self::scalar(name, offset, size);
        field.flags |= FieldFlags::BITFIELD;
        field.bit_name = Some(bit_name.into());
        field.bit_mask = bit_mask;
        field
    }

    /// Raw byte region of fixed length
    pub fn buffer(name: impl Into<String>, offset: usize, len: usize) -> Self {
        let mut field = Self::base(name, offset, len);
        field.flags |= FieldFlags::BUFFER;
        field
    }

    /// Raw byte region whose length lives in another slot
    pub fn var_buffer(name: impl Into<String>, offset: usize, size_offset: usize) -> Self {
        let mut field = Self::base(name, offset, 0);
        field.flags |= FieldFlags::VBUFFER;
        field.size_offset = size_offset;
        field
    }

    /// Scale a variable buffer size by a per-element size
    pub fn multiplied(mut self, elem_size: usize) -> Self {
        self.flags |= FieldFlags::MULTIPLY;
        self.size = elem_size;
        self
    }

    /// Sub-structure field interpreted through its own descriptor
    pub fn nested(
        name: impl Into<String>,
        offset: usize,
        elem_size: usize,
        descriptor: Arc<StateDescriptor>,
    ) -> Self {
        let mut field = Self::base(name, offset, elem_size);
        field.flags |= FieldFlags::STRUCT;
        field.nested = Some(descriptor);
        field
    }

    /// Field rendered element-by-element by the kind's queue printer
    pub fn queue(
        name: impl Into<String>,
        offset: usize,
        elem_size: usize,
        printer: impl Fn(&[u8]) -> Value + Send + Sync + 'static,
    ) -> Self {
        let mut field = Self::base(name, offset, elem_size);
        field.flags |= FieldFlags::QUEUE;
        field.queue_print = Some(Arc::new(printer));
        field
    }

    pub fn array(mut self, n: usize) -> Self {
        self.count = CountPolicy::Fixed(n);
        self
    }

    pub fn varray_int32(mut self, count_offset: usize) -> Self {
        self.count = CountPolicy::VarInt32 {
            offset: count_offset,
        };
        self
    }

    pub fn varray_uint16(mut self, count_offset: usize) -> Self {
        self.count = CountPolicy::VarUint16 {
            offset: count_offset,
        };
        self
    }

    pub fn pointer(self) -> Self {
        self.pointer_at(0)
    }

    /// Dereference the slot once, then shift by `start`
    pub fn pointer_at(mut self, start: usize) -> Self {
        self.flags |= FieldFlags::POINTER;
        self.start = start;
        self
    }

    pub fn array_of_pointers(mut self) -> Self {
        self.flags |= FieldFlags::ARRAY_OF_POINTER;
        self
    }

    pub fn exists_if(
        mut self,
        predicate: impl Fn(&DeviceStorage, u32) -> bool + Send + Sync + 'static,
    ) -> Self {
        self.exists = Some(Arc::new(predicate));
        self
    }

    pub fn with_start_caption(mut self, caption: impl Into<String>) -> Self {
        self.start_caption = Some(caption.into());
        self
    }
}

/// Versioned description of a kind's persistent state
#[derive(Clone)]
pub struct StateDescriptor {
    pub name: String,
    pub version_id: u32,
    pub pre_save: Option<PreSaveHook>,
    pub fields: Vec<StateField>,
}

impl StateDescriptor {
    pub fn new(name: impl Into<String>, version_id: u32) -> Self {
        Self {
            name: name.into(),
            version_id,
            pre_save: None,
            fields: Vec::new(),
        }
    }

    pub fn with_pre_save(
        mut self,
        pre_save: impl Fn(&mut DeviceStorage) + Send + Sync + 'static,
    ) -> Self {
        self.pre_save = Some(Arc::new(pre_save));
        self
    }

    pub fn with_fields(mut self, fields: Vec<StateField>) -> Self {
        self.fields = fields;
        self
    }
}

/// An address inside a device: direct storage or a heap cell
#[derive(Debug, Clone, Copy)]
enum Loc {
    Direct(usize),
    Cell(HeapRef, usize),
}

impl Loc {
    fn shifted(self, delta: usize) -> Self {
        match self {
            Loc::Direct(off) => Loc::Direct(off + delta),
            Loc::Cell(r, off) => Loc::Cell(r, off + delta),
        }
    }
}

fn bytes_at(st: &DeviceStorage, loc: Loc, len: usize) -> &[u8] {
    match loc {
        Loc::Direct(off) => st.read_bytes(off, len),
        Loc::Cell(r, off) => {
            let cell = st
                .cell(r)
                .expect("state field dereferenced a null or freed cell");
            &cell[off..off + len]
        }
    }
}

fn read_uint_at(st: &DeviceStorage, loc: Loc, size: usize) -> u64 {
    let bytes = bytes_at(st, loc, size);
    match size {
        1 => bytes[0] as u64,
        2 => u16::from_le_bytes(bytes.try_into().unwrap()) as u64,
        4 => u32::from_le_bytes(bytes.try_into().unwrap()) as u64,
        8 => u64::from_le_bytes(bytes.try_into().unwrap()),
        _ => panic!("state field has invalid element size {size}"),
    }
}

fn read_i32_at(st: &DeviceStorage, loc: Loc) -> i32 {
    i32::from_le_bytes(bytes_at(st, loc, 4).try_into().unwrap())
}

fn read_u16_at(st: &DeviceStorage, loc: Loc) -> u16 {
    u16::from_le_bytes(bytes_at(st, loc, 2).try_into().unwrap())
}

fn read_ref_at(st: &DeviceStorage, loc: Loc) -> HeapRef {
    u64::from_le_bytes(bytes_at(st, loc, 8).try_into().unwrap())
}

fn hex_string(bytes: &[u8]) -> String {
    bytes.iter().map(|b| format!("{b:02x}")).collect()
}

/// Walk a descriptor over a device's storage. Returns the field objects
/// and the overall byte size covered. When `full` is false, buffers
/// larger than 16 bytes are truncated to their first 16.
pub fn dump_fields(
    descriptor: &StateDescriptor,
    st: &DeviceStorage,
    full: bool,
) -> (Vec<Value>, usize) {
    let mut fields = Vec::new();
    let size = dump_fields_at(descriptor, st, Loc::Direct(0), &mut fields, full);
    (fields, size)
}

fn dump_fields_at(
    descriptor: &StateDescriptor,
    st: &DeviceStorage,
    base: Loc,
    out: &mut Vec<Value>,
    full: bool,
) -> usize {
    let mut overall_size = 0;

    for field in &descriptor.fields {
        if let Some(exists) = &field.exists {
            if !exists(st, descriptor.version_id) {
                continue;
            }
        }

        let mut size = field.size;
        if field.flags.contains(FieldFlags::VBUFFER) {
            size = read_i32_at(st, base.shifted(field.size_offset)) as usize;
            if field.flags.contains(FieldFlags::MULTIPLY) {
                size *= field.size;
            }
        }

        let (n_elems, is_array) = match field.count {
            CountPolicy::Scalar => (1, false),
            CountPolicy::Fixed(n) => (n, true),
            CountPolicy::VarInt32 { offset } => {
                (read_i32_at(st, base.shifted(offset)) as usize, true)
            }
            CountPolicy::VarUint16 { offset } => {
                (read_u16_at(st, base.shifted(offset)) as usize, true)
            }
        };

        let mut elem_base = base.shifted(field.offset);
        if field.flags.contains(FieldFlags::POINTER) {
            let r = read_ref_at(st, elem_base);
            elem_base = Loc::Cell(r, field.start);
        }

        let display_name = match (&field.bit_name, field.flags.contains(FieldFlags::BITFIELD)) {
            (Some(bit_name), true) => bit_name.clone(),
            _ => field.name.clone(),
        };
        let mut qfield = json!({ "name": display_name });
        if let Some(caption) = &field.start_caption {
            qfield["start"] = json!(caption);
        }

        let mut elems = Vec::new();
        let mut real_size = 0;
        for i in 0..n_elems {
            let mut loc = elem_base.shifted(size * i);
            let mut sub_elems = Vec::new();
            if field.flags.contains(FieldFlags::ARRAY_OF_POINTER) {
                let r = read_ref_at(st, loc);
                loc = Loc::Cell(r, 0);
            }
            if field.flags.contains(FieldFlags::STRUCT) {
                let nested = field.nested.as_ref().expect("struct field needs a descriptor");
                real_size = dump_fields_at(nested, st, loc, &mut sub_elems, full);
            } else {
                real_size = size;
                if field
                    .flags
                    .intersects(FieldFlags::BUFFER | FieldFlags::VBUFFER)
                {
                    let dump_size = if full || size <= 16 { size } else { 16 };
                    sub_elems.push(json!(hex_string(bytes_at(st, loc, dump_size))));
                } else if field.flags.contains(FieldFlags::QUEUE) {
                    let printer = field
                        .queue_print
                        .as_ref()
                        .expect("queue field needs a printer");
                    sub_elems.push(printer(bytes_at(st, loc, size)));
                } else {
                    let mut val = read_uint_at(st, loc, size);
                    if field.flags.contains(FieldFlags::BITFIELD) {
                        val = u64::from(val & field.bit_mask != 0);
                    }
                    sub_elems.push(json!(val));
                }
            }
            if is_array {
                elems.push(Value::Array(sub_elems));
            } else {
                elems.append(&mut sub_elems);
            }
            overall_size += real_size;
        }

        qfield["elems"] = Value::Array(elems);
        qfield["size"] = json!(real_size);
        out.push(qfield);
    }

    overall_size
}

/// Migration-state registrations, one per initialized device
#[derive(Default)]
pub struct VmStateRegistry {
    entries: HashMap<DeviceId, VmStateEntry>,
}

/// One registered descriptor with its migration instance id
pub struct VmStateEntry {
    pub descriptor: Arc<StateDescriptor>,
    pub instance_id: i32,
    pub required_version: u32,
}

impl VmStateRegistry {
    pub(crate) fn register(
        &mut self,
        dev: DeviceId,
        descriptor: Arc<StateDescriptor>,
        alias: Option<InstanceAlias>,
    ) {
        let entry = VmStateEntry {
            descriptor,
            instance_id: alias.map_or(-1, |a| a.alias_id),
            required_version: alias.map_or(0, |a| a.required_version),
        };
        let previous = self.entries.insert(dev, entry);
        debug_assert!(previous.is_none(), "state descriptor registered twice");
    }

    pub(crate) fn unregister(&mut self, dev: DeviceId) -> bool {
        self.entries.remove(&dev).is_some()
    }

    pub fn contains(&self, dev: DeviceId) -> bool {
        self.entries.contains_key(&dev)
    }

    pub fn entry(&self, dev: DeviceId) -> Option<&VmStateEntry> {
        self.entries.get(&dev)
    }

    pub fn len(&self) -> usize {
        self.entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }
}

impl Machine {
    /// Interpret a device's state descriptor and wrap the field tree in
    /// the monitor envelope. The pre-save hook, if any, runs exactly once
    /// beforehand.
    pub fn introspect_device(&mut self, dev: DeviceId, full: bool) -> Result<Value> {
        let kind = self.device(dev).kind().clone();
        let Some(descriptor) = kind.state.clone() else {
            return Err(DevError::DeviceNoState {
                kind: kind.name.clone(),
            });
        };
        if let Some(pre_save) = descriptor.pre_save.clone() {
            pre_save(self.device_mut(dev).storage_mut());
        }
        let instance = self.instance_no(dev);
        let device = self.device(dev);
        let (fields, _) = dump_fields(&descriptor, device.storage(), full);
        Ok(json!({
            "device": format!("{}.{instance}", kind.name),
            "id": device.user_id().unwrap_or(""),
            "version": descriptor.version_id,
            "fields": fields,
        }))
    }
}
