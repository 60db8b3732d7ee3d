//! machina-monitor: monitor command surface over machina-core
//!
//! Provides:
//! - device-add / device-del / device-show command handlers
//! - info tree and kind-listing renderers
//! - the human-readable state dump printer

pub mod commands;
pub mod render;

pub use commands::{
    device_add, device_del, device_show, exec_device_show, info_device_kinds, info_tree,
};
pub use render::{print_kind_list, print_tree, render_device_state};
