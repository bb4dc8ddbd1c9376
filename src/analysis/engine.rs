//! Analysis engine: configuration, decoder selection and the stores.
//!
//! One [`Engine`] serves one analysis thread. It owns the committed
//! functions, the cross-reference, metadata and hint stores, the no-return
//! list and the decoder selected from the plugin registry, and drives the
//! CFG builder over them.

use std::collections::BTreeMap;
use std::ops::Bound;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;

use tracing::{debug, info, warn};

use crate::analysis::cfg::{finalize, CfgBuilder, PathReport, WalkContext, WalkStatus};
use crate::analysis::config::{valid_bits, AnalysisOptions, EngineConfig};
use crate::analysis::hints::HintStore;
use crate::analysis::memory::{MemoryProbe, SliceMemory};
use crate::analysis::meta::MetaStore;
use crate::analysis::noreturn::NoReturnList;
use crate::analysis::project::ProjectSnapshot;
use crate::analysis::signatures::{SignatureDb, SignatureSource};
use crate::analysis::xrefs::XrefStore;
use crate::core::address_range::AddressRange;
use crate::core::basic_block::{BasicBlock, BlockKind};
use crate::core::disassembler::{ArchInfo, Architecture, Decoder, DecoderPlugin};
use crate::core::function::{CallingConvention, Function, FunctionKind};
use crate::core::op::Op;
use crate::core::reference::XrefKind;
use crate::core::register::{RegisterProfile, RegisterResolver};
use crate::core::symbol::{SymbolLookup, SymbolTable};
use crate::disasm::registry::{builtin_plugins, find_plugin};
use crate::error::{ReanalError, Result};
use crate::ir::{IrInstruction, TranslatorSession};

/// Outcome of [`Engine::analyze_function_at`].
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct AnalysisReport {
    /// Requested address
    pub addr: u64,
    pub status: WalkStatus,
    /// Entry of the committed function, if one was committed
    pub function: Option<u64>,
    /// Why the analysis stopped short
    pub error: Option<ReanalError>,
    pub paths: Vec<PathReport>,
}

impl AnalysisReport {
    fn failed(addr: u64, error: ReanalError) -> Self {
        Self {
            addr,
            status: error.status(),
            function: None,
            error: Some(error),
            paths: Vec::new(),
        }
    }

    pub fn is_committed(&self) -> bool {
        self.function.is_some()
    }
}

fn default_registers(bits: u8) -> RegisterProfile {
    if bits == 64 {
        RegisterProfile::x86_64()
    } else {
        RegisterProfile::x86()
    }
}

/// Reverse-engineering analysis engine.
pub struct Engine {
    config: EngineConfig,
    plugins: Vec<Box<dyn DecoderPlugin>>,
    decoder: Box<dyn Decoder>,
    /// Decoder was handed in directly rather than built from a plugin
    custom_decoder: bool,
    memory: Box<dyn MemoryProbe>,
    registers: Box<dyn RegisterResolver>,
    custom_registers: bool,
    symbols: Box<dyn SymbolLookup>,
    functions: BTreeMap<u64, Function>,
    xrefs: XrefStore,
    meta: MetaStore,
    hints: HintStore,
    noreturn: NoReturnList,
    signature_source: Option<Box<dyn SignatureSource>>,
    signatures: SignatureDb,
    cancel: Arc<AtomicBool>,
}

impl Engine {
    /// Build an engine whose decoder comes from the built-in plugin named
    /// by `config.arch`.
    pub fn new(config: EngineConfig) -> Result<Self> {
        let plugins = builtin_plugins();
        let decoder = instantiate(&plugins, &config.arch, config.bits, config.big_endian)?;
        Ok(Self::assemble(config, plugins, decoder, false))
    }

    /// Build an engine around a decoder supplied by the host.
    pub fn with_decoder(config: EngineConfig, decoder: Box<dyn Decoder>) -> Self {
        Self::assemble(config, builtin_plugins(), decoder, true)
    }

    fn assemble(
        config: EngineConfig,
        plugins: Vec<Box<dyn DecoderPlugin>>,
        decoder: Box<dyn Decoder>,
        custom_decoder: bool,
    ) -> Self {
        let registers = default_registers(config.bits);
        Self {
            config,
            plugins,
            decoder,
            custom_decoder,
            memory: Box::new(SliceMemory::new()),
            registers: Box::new(registers),
            custom_registers: false,
            symbols: Box::new(SymbolTable::new()),
            functions: BTreeMap::new(),
            xrefs: XrefStore::new(),
            meta: MetaStore::new(),
            hints: HintStore::new(),
            noreturn: NoReturnList::new(),
            signature_source: None,
            signatures: SignatureDb::new(),
            cancel: Arc::new(AtomicBool::new(false)),
        }
    }

    // ----- configuration -----

    pub fn config(&self) -> &EngineConfig {
        &self.config
    }

    /// Walker switches, for tuning between walks.
    pub fn options_mut(&mut self) -> &mut AnalysisOptions {
        &mut self.config.options
    }

    pub fn set_memory(&mut self, memory: impl MemoryProbe + 'static) {
        self.memory = Box::new(memory);
    }

    pub fn set_symbols(&mut self, symbols: impl SymbolLookup + 'static) {
        self.symbols = Box::new(symbols);
    }

    /// Use a host register resolver instead of the built-in profile.
    pub fn set_registers(&mut self, registers: impl RegisterResolver + 'static) {
        self.registers = Box::new(registers);
        self.custom_registers = true;
    }

    /// Use a host decoder. Architecture and bits stay as configured.
    pub fn set_decoder(&mut self, decoder: Box<dyn Decoder>) {
        self.decoder = decoder;
        self.custom_decoder = true;
    }

    /// Add a decoder plugin. A later plugin with the same name wins.
    pub fn register_plugin(&mut self, plugin: Box<dyn DecoderPlugin>) {
        self.plugins.push(plugin);
    }

    /// Select the decoder plugin `name` for the current bit width.
    pub fn set_architecture(&mut self, name: &str) -> Result<()> {
        let decoder = instantiate(&self.plugins, name, self.config.bits, self.config.big_endian)?;
        self.decoder = decoder;
        self.custom_decoder = false;
        self.config.arch = name.to_string();
        debug!(arch = name, bits = self.config.bits, "architecture selected");
        self.reload_signatures();
        Ok(())
    }

    /// Change the bit width, re-instantiating the plugin decoder.
    pub fn set_bits(&mut self, bits: u8) -> Result<()> {
        if !valid_bits(bits) {
            return Err(ReanalError::InvalidInput(format!("unsupported bit width {}", bits)));
        }
        if !self.custom_decoder {
            let decoder = instantiate(&self.plugins, &self.config.arch, bits, self.config.big_endian)?;
            self.decoder = decoder;
        }
        self.config.bits = bits;
        if !self.custom_registers {
            self.registers = Box::new(default_registers(bits));
        }
        self.reload_signatures();
        Ok(())
    }

    pub fn set_os(&mut self, os: &str) {
        self.config.os = os.to_string();
        self.reload_signatures();
    }

    /// Set os, architecture and bits together. Nothing changes on failure.
    pub fn set_triplet(&mut self, os: &str, arch: &str, bits: u8) -> Result<()> {
        if !valid_bits(bits) {
            return Err(ReanalError::InvalidInput(format!("unsupported bit width {}", bits)));
        }
        let decoder = instantiate(&self.plugins, arch, bits, self.config.big_endian)?;
        self.decoder = decoder;
        self.custom_decoder = false;
        self.config.os = os.to_string();
        self.config.arch = arch.to_string();
        self.config.bits = bits;
        if !self.custom_registers {
            self.registers = Box::new(default_registers(bits));
        }
        self.reload_signatures();
        Ok(())
    }

    pub fn set_cpu(&mut self, cpu: Option<&str>) {
        self.config.cpu = cpu.map(str::to_string);
    }

    /// Switch byte order, re-instantiating the plugin decoder.
    pub fn set_big_endian(&mut self, big_endian: bool) -> Result<()> {
        if !self.custom_decoder {
            let decoder = instantiate(&self.plugins, &self.config.arch, self.config.bits, big_endian)?;
            self.decoder = decoder;
        }
        self.config.big_endian = big_endian;
        Ok(())
    }

    /// Bound all further traversal to `[from, to)`.
    pub fn set_limits(&mut self, from: u64, to: u64) -> Result<()> {
        self.config.limit = Some(AddressRange::new(from, to)?);
        Ok(())
    }

    pub fn unset_limits(&mut self) {
        self.config.limit = None;
    }

    pub fn set_depth(&mut self, depth: u32) {
        self.config.depth = depth;
    }

    pub fn set_signature_source(&mut self, source: Box<dyn SignatureSource>) {
        self.signature_source = Some(source);
        self.reload_signatures();
    }

    fn reload_signatures(&mut self) {
        self.signatures = self
            .signature_source
            .as_ref()
            .and_then(|s| s.load(&self.config.os, &self.config.arch, self.config.bits))
            .unwrap_or_default();
        debug!(
            os = %self.config.os,
            arch = %self.config.arch,
            bits = self.config.bits,
            count = self.signatures.len(),
            "signatures loaded"
        );
    }

    /// Prototype of `symbol` for the current triple
    pub fn signature(&self, symbol: &str) -> Option<&str> {
        self.signatures.get(symbol)
    }

    pub fn architecture(&self) -> Architecture {
        match self.decoder.architecture() {
            Architecture::Unknown => Architecture::from_name(&self.config.arch, self.config.bits),
            arch => arch,
        }
    }

    pub fn arch_info(&self) -> ArchInfo {
        self.decoder.arch_info()
    }

    pub fn decoder_name(&self) -> &str {
        self.decoder.name()
    }

    /// Shared flag that interrupts a running walk when set.
    pub fn cancel_token(&self) -> Arc<AtomicBool> {
        Arc::clone(&self.cancel)
    }

    /// Clear a previous cancellation request.
    pub fn reset_cancel(&self) {
        self.cancel.store(false, Ordering::Relaxed);
    }

    // ----- stores -----

    pub fn xrefs(&self) -> &XrefStore {
        &self.xrefs
    }

    pub fn xrefs_mut(&mut self) -> &mut XrefStore {
        &mut self.xrefs
    }

    pub fn meta(&self) -> &MetaStore {
        &self.meta
    }

    pub fn meta_mut(&mut self) -> &mut MetaStore {
        &mut self.meta
    }

    pub fn hints(&self) -> &HintStore {
        &self.hints
    }

    pub fn hints_mut(&mut self) -> &mut HintStore {
        &mut self.hints
    }

    /// Drop every function and clear the xref, meta and hint stores.
    pub fn purge(&mut self) {
        self.functions.clear();
        self.xrefs.clear();
        self.meta.clear();
        self.hints.clear();
        info!("analysis state purged");
    }

    /// Export the stores that outlive a walk.
    pub fn project_snapshot(&self) -> ProjectSnapshot {
        ProjectSnapshot {
            xrefs: self.xrefs.clone(),
            meta: self.meta.clone(),
            noreturn: self.noreturn.clone(),
            hints: self.hints.clone(),
            ..ProjectSnapshot::default()
        }
    }

    /// Replace the stores with a snapshot's content.
    pub fn restore_project(&mut self, snapshot: ProjectSnapshot) {
        self.xrefs = snapshot.xrefs;
        self.meta = snapshot.meta;
        self.noreturn = snapshot.noreturn;
        self.hints = snapshot.hints;
    }

    // ----- no-return list -----

    pub fn add_noreturn(&mut self, expr: &str) -> bool {
        self.noreturn.add(expr)
    }

    pub fn drop_noreturn(&mut self, expr: &str) -> Result<usize> {
        self.noreturn.drop_matching(expr)
    }

    pub fn is_noreturn(&self, addr: u64) -> bool {
        self.noreturn
            .is_noreturn_at(addr, &self.functions, self.symbols.as_ref())
    }

    pub fn noreturn(&self) -> &NoReturnList {
        &self.noreturn
    }

    // ----- functions -----

    pub fn functions(&self) -> impl Iterator<Item = &Function> {
        self.functions.values()
    }

    pub fn function_count(&self) -> usize {
        self.functions.len()
    }

    /// Function rooted at `addr`
    pub fn function_at(&self, addr: u64) -> Option<&Function> {
        self.functions.get(&addr)
    }

    /// Function whose span or blocks contain `addr`
    pub fn function_in(&self, addr: u64) -> Option<&Function> {
        if let Some((_, f)) = self.functions.range(..=addr).next_back() {
            if f.contains(addr) {
                return Some(f);
            }
        }
        self.functions.values().find(|f| f.contains(addr))
    }

    /// First function carrying `name`
    pub fn function_by_name(&self, name: &str) -> Option<&Function> {
        self.functions.values().find(|f| f.name == name)
    }

    /// First function rooted after `addr`
    pub fn next_function(&self, addr: u64) -> Option<&Function> {
        self.functions
            .range((Bound::Excluded(addr), Bound::Unbounded))
            .next()
            .map(|(_, f)| f)
    }

    /// Declare a function by hand as one block of `size` bytes.
    pub fn add_function(
        &mut self,
        addr: u64,
        size: u64,
        name: Option<&str>,
        kind: FunctionKind,
    ) -> Result<&Function> {
        if size == 0 {
            return Err(ReanalError::InvalidInput("function size must be non-zero".into()));
        }
        let end = addr.saturating_add(size);
        // locations may sit inside another function, never on or across a root
        let inside_other = kind != FunctionKind::Location && self.function_in(addr).is_some();
        let overlaps = inside_other || self.functions.range(addr..end).next().is_some();
        if overlaps {
            return Err(ReanalError::AlreadyAnalyzed(addr));
        }
        let name = name
            .map(str::to_string)
            .unwrap_or_else(|| Function::default_name(kind, addr));
        let mut fcn = Function::new(addr, name, kind);
        fcn.bits = self.config.bits;
        fcn.calling_convention = CallingConvention::default_for(self.architecture(), &self.config.os);
        let mut bb = BasicBlock::new(addr);
        bb.size = size;
        bb.kind = BlockKind::HEAD | BlockKind::LAST;
        fcn.blocks.push(bb);
        fcn.set_size(size);
        info!(addr, size, name = %fcn.name, "function added");
        Ok(self.functions.entry(addr).or_insert(fcn))
    }

    pub fn delete_function(&mut self, addr: u64) -> Option<Function> {
        let removed = self.functions.remove(&addr);
        if removed.is_some() {
            debug!(addr, "function deleted");
        }
        removed
    }

    /// Drop `Location` functions rooted inside the function at `addr`.
    pub fn delete_locations(&mut self, addr: u64) -> usize {
        let Some(fcn) = self.functions.get(&addr) else {
            return 0;
        };
        let doomed: Vec<u64> = self
            .functions
            .iter()
            .filter(|(&a, f)| a != addr && f.kind == FunctionKind::Location && fcn.contains(a))
            .map(|(&a, _)| a)
            .collect();
        for a in &doomed {
            self.functions.remove(a);
        }
        doomed.len()
    }

    /// Set the size of the function at `addr`. Growing into a sibling
    /// function is refused.
    pub fn resize_function(&mut self, addr: u64, size: u64) -> Result<()> {
        let end = addr.saturating_add(size);
        if self
            .functions
            .range((Bound::Excluded(addr), Bound::Excluded(end)))
            .next()
            .is_some()
        {
            return Err(ReanalError::InvalidInput(format!(
                "resizing {:#x} to {:#x} overlaps another function",
                addr, size
            )));
        }
        let fcn = self
            .functions
            .get_mut(&addr)
            .ok_or(ReanalError::InvalidAddress(addr))?;
        if !fcn.resize(size) {
            return Err(ReanalError::InvalidInput("function size must be non-zero".into()));
        }
        Ok(())
    }

    /// Mark the block covering `addr` as traced.
    pub fn trace_block(&mut self, addr: u64) -> bool {
        for fcn in self.functions.values_mut() {
            if let Some(idx) = fcn.block_containing(addr) {
                fcn.blocks[idx].traced = true;
                return true;
            }
        }
        false
    }

    /// Discover the function starting at `addr` and commit it.
    pub fn analyze_function_at(&mut self, addr: u64) -> AnalysisReport {
        self.analyze_function_as(addr, XrefKind::Call)
    }

    /// Like [`Engine::analyze_function_at`], for an entry reached through a
    /// reference of kind `reftype`.
    ///
    /// A `Code` reference yields a [`FunctionKind::Location`], which may be
    /// rooted inside an existing function. Any other kind yields a normal
    /// function and requires `addr` to be uncovered.
    pub fn analyze_function_as(&mut self, addr: u64, reftype: XrefKind) -> AnalysisReport {
        let kind = if reftype == XrefKind::Code {
            FunctionKind::Location
        } else {
            FunctionKind::Normal
        };
        let covered = match kind {
            FunctionKind::Location => self.functions.contains_key(&addr),
            _ => self.function_in(addr).is_some(),
        };
        if covered {
            debug!(addr, "already covered");
            return AnalysisReport::failed(addr, ReanalError::AlreadyAnalyzed(addr));
        }
        if let Some(limit) = self.config.limit {
            if !limit.contains(addr) {
                return AnalysisReport::failed(addr, ReanalError::InvalidAddress(addr));
            }
        }

        let symbol = self.symbols.symbol_at(addr);
        let named = symbol.is_some();
        let mut fcn = Function::new(
            addr,
            symbol.unwrap_or_else(|| Function::default_name(kind, addr)),
            kind,
        );
        fcn.bits = self.config.bits;
        fcn.calling_convention = CallingConvention::default_for(self.architecture(), &self.config.os);

        let ctx = WalkContext {
            decoder: self.decoder.as_ref(),
            memory: self.memory.as_ref(),
            registers: self.registers.as_ref(),
            symbols: self.symbols.as_ref(),
            functions: &self.functions,
            noreturn: &self.noreturn,
            hints: &self.hints,
            options: &self.config.options,
            limit: self.config.limit,
            big_endian: self.config.big_endian,
            sleep_us: self.config.sleep_us,
            cancel: &self.cancel,
        };
        let outcome = CfgBuilder::new(ctx, &mut self.xrefs).walk(&mut fcn, self.config.depth);

        let mut report = AnalysisReport {
            addr,
            status: outcome.status,
            function: None,
            error: outcome.error,
            paths: outcome.paths,
        };
        if outcome.status != WalkStatus::End {
            if let Some(e) = &report.error {
                warn!(addr, error = %e, "function not committed");
            }
            return report;
        }

        finalize(&mut fcn, &self.functions, &self.config.options);
        if fcn.size() == 0 {
            report.status = WalkStatus::Error;
            report.error = Some(ReanalError::InvalidAddress(addr));
            return report;
        }
        if self.functions.contains_key(&fcn.addr) {
            report.status = WalkStatus::Dup;
            report.error = Some(ReanalError::AlreadyAnalyzed(fcn.addr));
            return report;
        }
        if fcn.addr != addr && !named {
            fcn.name = Function::default_name(kind, fcn.addr);
        }
        info!(
            addr = fcn.addr,
            size = fcn.size(),
            blocks = fcn.blocks.len(),
            name = %fcn.name,
            "function committed"
        );
        report.function = Some(fcn.addr);
        self.functions.insert(fcn.addr, fcn);
        report
    }

    // ----- decoding and translation -----

    /// Decode the instruction at `addr`, with hints applied.
    pub fn decode_at(&self, addr: u64) -> Result<Op> {
        let mut buf = vec![0u8; self.decoder.arch_info().max_op_size.max(1)];
        let avail = self.memory.read_at(addr, &mut buf);
        if avail == 0 {
            return Err(ReanalError::InvalidAddress(addr));
        }
        buf.truncate(avail);
        let mut op = self
            .decoder
            .decode(addr, &buf)
            .map_err(|e| ReanalError::decode(addr, e))?;
        self.hints.apply(&mut op);
        Ok(op)
    }

    /// Decode a hex-encoded instruction as if it sat at `addr`.
    pub fn op_from_hex(&self, addr: u64, hex_str: &str) -> Result<Op> {
        let bytes = hex::decode(hex_str.trim())
            .map_err(|e| ReanalError::InvalidInput(format!("bad hex: {}", e)))?;
        self.decoder
            .decode(addr, &bytes)
            .map_err(|e| ReanalError::decode(addr, e))
    }

    /// Fresh translator bound to the engine's registers and bit width.
    pub fn translator(&self) -> TranslatorSession<'_> {
        TranslatorSession::new(self.registers.as_ref(), self.config.bits)
    }

    /// Translate one op's semantics in a fresh session.
    pub fn translate_instruction(&self, op: &Op) -> Result<Vec<IrInstruction>> {
        self.translator().translate(op)
    }
}

fn instantiate(
    plugins: &[Box<dyn DecoderPlugin>],
    name: &str,
    bits: u8,
    big_endian: bool,
) -> Result<Box<dyn Decoder>> {
    let plugin =
        find_plugin(plugins, name).ok_or_else(|| ReanalError::UnsupportedArchitecture(name.to_string()))?;
    if !plugin.supports_bits(bits) {
        return Err(ReanalError::InvalidInput(format!(
            "{} does not support {} bits",
            name, bits
        )));
    }
    plugin
        .instantiate(bits, big_endian)
        .map_err(|e| ReanalError::UnsupportedArchitecture(format!("{}: {}", name, e)))
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::analysis::signatures::StaticSignatures;
    use crate::core::op::OpKind;
    use crate::core::reference::XrefKind;
    use crate::disasm::table::{TableDecoder, TablePlugin};

    fn table_engine(ops: Vec<Op>) -> Engine {
        let decoder: TableDecoder = ops.into_iter().collect();
        let mut engine = Engine::with_decoder(EngineConfig::default(), Box::new(decoder));
        engine.set_memory(SliceMemory::with_bytes(0x1000, vec![0x90; 0x100]));
        engine
    }

    fn straight_line() -> Vec<Op> {
        vec![
            Op::new(0x1000, 2, OpKind::Mov),
            Op::new(0x1002, 5, OpKind::Call).with_jump(0x1080),
            Op::new(0x1007, 1, OpKind::Ret),
        ]
    }

    #[test]
    fn test_new_uses_builtin_x86() {
        let engine = Engine::new(EngineConfig::default()).unwrap();
        assert_eq!(engine.decoder_name(), "iced-x86");
        assert_eq!(engine.architecture(), Architecture::X86);

        let cfg = EngineConfig {
            arch: "sparc".into(),
            ..EngineConfig::default()
        };
        assert!(matches!(
            Engine::new(cfg),
            Err(ReanalError::UnsupportedArchitecture(_))
        ));
    }

    #[test]
    fn test_invalid_settings_have_no_effect() {
        let mut engine = Engine::new(EngineConfig::default()).unwrap();
        assert!(engine.set_bits(12).is_err());
        assert!(engine.set_bits(8).is_err());
        assert!(engine.set_architecture("z80").is_err());
        assert!(engine.set_triplet("linux", "x86", 7).is_err());
        assert_eq!(engine.config().bits, 32);
        assert_eq!(engine.config().arch, "x86");

        engine.set_bits(64).unwrap();
        assert_eq!(engine.architecture(), Architecture::X86_64);
        assert_eq!(engine.translator().pc_register(), "rip");
    }

    #[test]
    fn test_signatures_follow_triplet() {
        let mut engine = Engine::new(EngineConfig::default()).unwrap();
        let mut db = SignatureDb::new();
        db.insert("exit", "void exit(int status)");
        let mut src = StaticSignatures::new();
        src.insert("linux", "x86", 64, db);
        engine.set_signature_source(Box::new(src));
        assert!(engine.signature("exit").is_none());
        engine.set_bits(64).unwrap();
        assert_eq!(engine.signature("exit"), Some("void exit(int status)"));
        engine.set_os("windows");
        assert!(engine.signature("exit").is_none());
    }

    #[test]
    fn test_registered_plugin() {
        let table: TableDecoder = straight_line().into_iter().collect();
        let mut engine = Engine::new(EngineConfig::default()).unwrap();
        engine.register_plugin(Box::new(TablePlugin::new("toy", &[32], table)));
        engine.set_architecture("toy").unwrap();
        assert_eq!(engine.decoder_name(), "table");
        assert!(engine.set_bits(64).is_err());
        assert_eq!(engine.config().bits, 32);
    }

    #[test]
    fn test_analyze_and_reanalyze() {
        let mut engine = table_engine(straight_line());
        let report = engine.analyze_function_at(0x1000);
        assert_eq!(report.status, WalkStatus::End);
        assert_eq!(report.function, Some(0x1000));
        let fcn = engine.function_at(0x1000).unwrap();
        assert_eq!(fcn.size(), 8);
        assert_eq!(fcn.calling_convention, CallingConvention::Cdecl);
        assert!(engine.xrefs().contains(0x1002, 0x1080, XrefKind::Call));

        let blocks_before = engine.function_at(0x1000).unwrap().blocks.clone();
        let again = engine.analyze_function_at(0x1002);
        assert_eq!(again.status, WalkStatus::Dup);
        assert!(!again.is_committed());
        assert_eq!(engine.function_at(0x1000).unwrap().blocks, blocks_before);
    }

    #[test]
    fn test_limits_reject_outside() {
        let mut engine = table_engine(straight_line());
        engine.set_limits(0x2000, 0x3000).unwrap();
        let report = engine.analyze_function_at(0x1000);
        assert_eq!(report.status, WalkStatus::Error);
        assert_eq!(report.error, Some(ReanalError::InvalidAddress(0x1000)));
        engine.unset_limits();
        assert!(engine.analyze_function_at(0x1000).is_committed());
        assert!(engine.set_limits(0x20, 0x10).is_err());
    }

    #[test]
    fn test_function_store_operations() {
        let mut engine = table_engine(straight_line());
        engine
            .add_function(0x1000, 0x20, Some("main"), FunctionKind::Normal)
            .unwrap();
        engine
            .add_function(0x1040, 0x10, None, FunctionKind::Normal)
            .unwrap();
        assert!(engine
            .add_function(0x1010, 4, None, FunctionKind::Normal)
            .is_err());
        assert!(engine
            .add_function(0x0ff0, 0x20, None, FunctionKind::Normal)
            .is_err());

        assert_eq!(engine.function_in(0x1010).unwrap().name, "main");
        assert_eq!(engine.next_function(0x1000).unwrap().addr, 0x1040);
        assert_eq!(engine.function_at(0x1040).unwrap().name, "fcn.00001040");

        assert!(engine.resize_function(0x1000, 0x50).is_err());
        engine.resize_function(0x1000, 0x10).unwrap();
        assert!(engine.function_in(0x1018).is_none());

        assert!(engine.trace_block(0x1004));
        assert!(engine.function_at(0x1000).unwrap().blocks[0].traced);
        assert!(!engine.trace_block(0x1030));

        assert!(engine.delete_function(0x1040).is_some());
        assert_eq!(engine.function_count(), 1);
    }

    #[test]
    fn test_code_reference_makes_location() {
        let mut engine = table_engine(vec![
            Op::new(0x1000, 4, OpKind::Mov),
            Op::new(0x1004, 4, OpKind::Mov),
            Op::new(0x1008, 1, OpKind::Ret),
        ]);
        assert!(engine.analyze_function_at(0x1000).is_committed());
        assert_eq!(
            engine.analyze_function_at(0x1004).status,
            WalkStatus::Dup
        );

        let report = engine.analyze_function_as(0x1004, XrefKind::Code);
        assert_eq!(report.function, Some(0x1004));
        let loc = engine.function_by_name("loc.00001004").unwrap();
        assert_eq!(loc.kind, FunctionKind::Location);
        assert_eq!(loc.size(), 5);
        // the parent keeps its blocks and still covers the shared bytes
        assert_eq!(engine.function_at(0x1000).unwrap().size(), 9);
        assert_eq!(
            engine.analyze_function_as(0x1004, XrefKind::Code).status,
            WalkStatus::Dup
        );
        assert!(engine.function_by_name("fcn.00001000").is_some());
        assert!(engine.function_by_name("missing").is_none());
    }

    #[test]
    fn test_delete_locations() {
        let mut engine = table_engine(Vec::new());
        engine
            .add_function(0x1000, 0x40, None, FunctionKind::Normal)
            .unwrap();
        engine
            .add_function(0x1010, 4, None, FunctionKind::Location)
            .unwrap();
        engine
            .add_function(0x1080, 4, None, FunctionKind::Location)
            .unwrap();
        // a location never sits on an existing root
        assert!(engine
            .add_function(0x1000, 4, None, FunctionKind::Location)
            .is_err());
        assert_eq!(engine.delete_locations(0x1000), 1);
        assert!(engine.function_at(0x1010).is_none());
        assert!(engine.function_at(0x1080).is_some());
        assert_eq!(engine.delete_locations(0x5000), 0);
    }

    #[test]
    fn test_noreturn_and_purge() {
        let mut engine = table_engine(straight_line());
        assert!(engine.add_noreturn("0x1080"));
        assert!(engine.is_noreturn(0x1080));
        assert_eq!(engine.drop_noreturn("*").unwrap(), 1);
        assert!(!engine.is_noreturn(0x1080));

        engine.analyze_function_at(0x1000);
        engine.hints_mut().set_size(0x1000, 2);
        engine
            .meta_mut()
            .add(crate::analysis::meta::MetaKind::Comment, 0x1000, 0x1000, "entry")
            .unwrap();
        engine.purge();
        assert_eq!(engine.function_count(), 0);
        assert!(engine.xrefs().is_empty());
        assert!(engine.meta().is_empty());
        assert!(engine.hints().is_empty());
    }

    #[test]
    fn test_snapshot_round_trip() {
        let mut engine = table_engine(straight_line());
        engine.analyze_function_at(0x1000);
        engine.add_noreturn("abort");
        let snap = engine.project_snapshot();

        let mut other = table_engine(Vec::new());
        other.restore_project(ProjectSnapshot::from_bincode(&snap.to_bincode().unwrap()).unwrap());
        assert!(other.xrefs().contains(0x1002, 0x1080, XrefKind::Call));
        assert_eq!(other.noreturn().len(), 1);
    }

    #[test]
    fn test_decode_and_translate() {
        let mut engine = Engine::new(EngineConfig::default()).unwrap();
        // mov eax, 1 ; ret
        engine.set_memory(SliceMemory::with_bytes(0x2000, vec![0xb8, 1, 0, 0, 0, 0xc3]));
        let op = engine.decode_at(0x2000).unwrap();
        assert_eq!(op.size, 5);
        assert_eq!(op.kind, OpKind::Mov);
        let ir = engine.translate_instruction(&op).unwrap();
        assert_eq!(ir.last().unwrap().dst().name, "eax");

        assert!(engine.decode_at(0x9000).is_err());
        let ret = engine.op_from_hex(0x10, "c3").unwrap();
        assert_eq!(ret.kind, OpKind::Ret);
        assert!(matches!(
            engine.op_from_hex(0x10, "zz"),
            Err(ReanalError::InvalidInput(_))
        ));
    }

    #[test]
    fn test_cancel_token_is_shared() {
        let mut engine = table_engine(straight_line());
        engine.cancel_token().store(true, Ordering::Relaxed);
        let report = engine.analyze_function_at(0x1000);
        assert_eq!(report.error, Some(ReanalError::Interrupted(0x1000)));
        engine.reset_cancel();
        assert!(engine.analyze_function_at(0x1000).is_committed());
    }
}
