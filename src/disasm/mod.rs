//! Decoder adapters and the plugin registry.
//!
//! - iced-x86 for x86/x64 (built-in plugin `x86`)
//! - a table decoder for op streams decoded elsewhere

pub mod iced;
pub mod registry;
pub mod table;

pub use iced::IcedDecoder;
pub use registry::{builtin_plugins, find_plugin, X86Plugin};
pub use table::{TableDecoder, TablePlugin};
