//! Analysis: the CFG walker, the stores it feeds and the engine that owns
//! them.
//!
//! - `cfg`: worklist walker and function finalization
//! - `xrefs`, `meta`, `hints`, `noreturn`: stores kept across walks
//! - `engine`: configuration, decoder selection, function store
//! - `project`: snapshot boundary for external persistence

pub mod cfg;
pub mod config;
pub mod engine;
pub mod hints;
pub mod jumptable;
pub mod memory;
pub mod meta;
pub mod noreturn;
pub mod project;
pub mod signatures;
pub mod vars;
pub mod xrefs;
