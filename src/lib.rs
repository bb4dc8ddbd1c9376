//! reanal: function discovery, CFG recovery and IR translation for
//! reverse engineering.
//!
//! The crate consumes decoded instruction descriptors from a pluggable
//! decoder and builds functions and basic blocks from them, keeps a
//! bidirectional cross-reference index and a namespaced range-metadata
//! store, and lowers each instruction's postfix semantic expression into a
//! three-address IR.
//!
//! ```no_run
//! use reanal::{Engine, EngineConfig, SliceMemory};
//!
//! let mut engine = Engine::new(EngineConfig::default())?;
//! engine.set_memory(SliceMemory::with_bytes(0x1000, vec![0x55, 0x89, 0xe5, 0x5d, 0xc3]));
//! let report = engine.analyze_function_at(0x1000);
//! assert!(report.is_committed());
//! # Ok::<(), reanal::ReanalError>(())
//! ```

/// Core data types module
pub mod core;

pub mod analysis;
pub mod disasm;
pub mod error;
pub mod ir;
pub mod logging;

pub use analysis::cfg::{WalkOutcome, WalkStatus};
pub use analysis::config::{AnalysisOptions, EngineConfig, JumpPolicy};
pub use analysis::engine::{AnalysisReport, Engine};
pub use analysis::memory::{MemoryProbe, SliceMemory};
pub use analysis::meta::{MetaItem, MetaKind, MetaStore, NamespaceId};
pub use analysis::project::ProjectSnapshot;
pub use analysis::xrefs::XrefStore;
pub use core::{
    BasicBlock, Decoder, DecoderPlugin, Function, FunctionKind, Op, OpKind, RegisterProfile,
    RegisterResolver, SymbolLookup, SymbolTable, Xref, XrefKind,
};
pub use error::{ReanalError, Result};
pub use ir::{FailurePolicy, IrInstruction, IrOpcode, TranslatorSession};
