//! Worklist-driven function discovery and CFG construction.
//!
//! A walk starts at a function entry and decodes straight-line code into
//! basic blocks until a block ends. Branch targets found along a path are
//! queued as new paths with one less unit of depth budget. Paths are taken
//! from an explicit stack so discovery order stays depth-first without
//! native recursion.
//!
//! Per-path failures only end that path and are reported back; exceeding
//! the function size cap or being cancelled aborts the whole walk.

use std::collections::BTreeMap;
use std::fmt;
use std::sync::atomic::{AtomicBool, Ordering};
use std::time::Duration;

use serde::{Deserialize, Serialize};
use tracing::{debug, debug_span, trace, warn};

use crate::analysis::config::{AnalysisOptions, JumpPolicy};
use crate::analysis::hints::HintStore;
use crate::analysis::jumptable::{find_last_write, JumpTableReader};
use crate::analysis::memory::MemoryProbe;
use crate::analysis::noreturn::NoReturnList;
use crate::analysis::vars::extract_frame_vars;
use crate::analysis::xrefs::XrefStore;
use crate::core::address_range::AddressRange;
use crate::core::basic_block::BlockKind;
use crate::core::disassembler::Decoder;
use crate::core::function::Function;
use crate::core::op::{Op, OpKind, StackEffect};
use crate::core::reference::{Xref, XrefKind};
use crate::core::register::RegisterResolver;
use crate::core::symbol::SymbolLookup;
use crate::error::ReanalError;

/// Result of walking one path or a whole function.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum WalkStatus {
    /// Path ended normally
    End,
    /// Path failed
    Error,
    /// Address already analyzed
    Dup,
    /// Address not covered yet
    New,
}

impl fmt::Display for WalkStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let s = match self {
            WalkStatus::End => "end",
            WalkStatus::Error => "error",
            WalkStatus::Dup => "dup",
            WalkStatus::New => "new",
        };
        f.write_str(s)
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
struct WorkItem {
    addr: u64,
    depth: u32,
}

/// What happened to one walked path.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct PathReport {
    pub addr: u64,
    pub depth: u32,
    pub status: WalkStatus,
    pub error: Option<ReanalError>,
}

/// Result of a whole walk.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct WalkOutcome {
    /// Status of the root path, or `Error` when the walk was aborted
    pub status: WalkStatus,
    /// Why the root path stopped, or why the walk was aborted
    pub error: Option<ReanalError>,
    /// Every path in the order it was walked
    pub paths: Vec<PathReport>,
}

/// Read-only collaborators and settings of a walk.
#[derive(Clone, Copy)]
pub struct WalkContext<'a> {
    pub decoder: &'a dyn Decoder,
    pub memory: &'a dyn MemoryProbe,
    pub registers: &'a dyn RegisterResolver,
    pub symbols: &'a dyn SymbolLookup,
    /// Functions committed so far
    pub functions: &'a BTreeMap<u64, Function>,
    pub noreturn: &'a NoReturnList,
    pub hints: &'a HintStore,
    pub options: &'a AnalysisOptions,
    pub limit: Option<AddressRange>,
    pub big_endian: bool,
    pub sleep_us: u64,
    pub cancel: &'a AtomicBool,
}

#[derive(Debug, Default)]
struct DelaySlots {
    /// Slots still to decode
    count: u32,
    /// Offset of the delayed branch
    idx: usize,
    /// Offset right after the last slot
    after: usize,
    pending: bool,
    /// Undo the second accounting of the branch on revisit
    adjust: bool,
}

/// Builds the CFG of one function at a time.
pub struct CfgBuilder<'a> {
    ctx: WalkContext<'a>,
    xrefs: &'a mut XrefStore,
}

impl<'a> CfgBuilder<'a> {
    pub fn new(ctx: WalkContext<'a>, xrefs: &'a mut XrefStore) -> Self {
        Self { ctx, xrefs }
    }

    /// Walk `fcn` from its entry with `depth` units of recursion budget.
    pub fn walk(&mut self, fcn: &mut Function, depth: u32) -> WalkOutcome {
        let span = debug_span!("analyze_function", addr = fcn.addr);
        let _guard = span.enter();

        let mut worklist = vec![WorkItem {
            addr: fcn.addr,
            depth,
        }];
        let mut paths = Vec::new();
        let mut root = None;

        while let Some(item) = worklist.pop() {
            let mut children = Vec::new();
            let (status, error) = match self.walk_path(fcn, item, &mut children) {
                Ok(status) => (status, None),
                Err(e) => (e.status(), Some(e)),
            };
            debug!(addr = item.addr, depth = item.depth, status = %status, "path finished");

            let abort = matches!(
                error,
                Some(ReanalError::SizeLimitExceeded { .. }) | Some(ReanalError::Interrupted(_))
            );
            paths.push(PathReport {
                addr: item.addr,
                depth: item.depth,
                status,
                error: error.clone(),
            });
            if root.is_none() {
                root = Some((status, error.clone()));
            }
            if abort {
                if let Some(e) = &error {
                    warn!(addr = fcn.addr, error = %e, "walk aborted");
                }
                return WalkOutcome {
                    status: WalkStatus::Error,
                    error,
                    paths,
                };
            }
            // first discovered target is walked first
            worklist.extend(children.into_iter().rev());
        }

        let (status, error) = root.unwrap_or((WalkStatus::Error, None));
        WalkOutcome {
            status,
            error,
            paths,
        }
    }

    fn is_noreturn(&self, addr: u64) -> bool {
        self.ctx
            .noreturn
            .is_noreturn_at(addr, self.ctx.functions, self.ctx.symbols)
    }

    fn add_ref(&mut self, fcn: &mut Function, from: u64, to: u64, kind: XrefKind) {
        fcn.refs.push(Xref::new(from, to, kind));
        self.xrefs.set(from, to, kind);
    }

    fn walk_path(
        &mut self,
        fcn: &mut Function,
        item: WorkItem,
        children: &mut Vec<WorkItem>,
    ) -> Result<WalkStatus, ReanalError> {
        let WorkItem { addr, depth } = item;
        if self.ctx.sleep_us > 0 {
            std::thread::sleep(Duration::from_micros(self.ctx.sleep_us));
        }
        if depth < 1 {
            return Err(ReanalError::RecursionExhausted(addr));
        }
        if !self.ctx.memory.is_valid(addr) {
            return Err(ReanalError::InvalidAddress(addr));
        }
        if self.ctx.functions.contains_key(&addr) {
            return Err(ReanalError::AlreadyAnalyzed(addr));
        }
        if fcn.block_containing(addr).is_some() {
            fcn.split_block(addr);
            return if self.ctx.options.recont {
                Ok(WalkStatus::End)
            } else {
                Err(ReanalError::AlreadyAnalyzed(addr))
            };
        }

        let bb = fcn.append_block(addr);
        let mut buf = vec![0u8; self.ctx.options.max_block_size];
        let avail = self.ctx.memory.read_at(addr, &mut buf);
        buf.truncate(avail);

        let result = self.decode_block(fcn, bb, addr, &buf, depth, children);
        if fcn.blocks[bb].ninstr() == 0 {
            fcn.blocks.remove(bb);
        }
        result
    }

    fn decode_block(
        &mut self,
        fcn: &mut Function,
        bb: usize,
        start: u64,
        buf: &[u8],
        depth: u32,
        children: &mut Vec<WorkItem>,
    ) -> Result<WalkStatus, ReanalError> {
        let opts = self.ctx.options;
        let max_size = opts.max_function_size;
        let child = depth - 1;
        let mut idx = 0usize;
        let mut delay = DelaySlots::default();
        let mut last_push: Option<u64> = None;

        while idx < buf.len() {
            let cur = start + idx as u64;
            if self.ctx.limit.is_some_and(|l| !l.contains(cur)) {
                break;
            }
            if self.ctx.cancel.load(Ordering::Relaxed) {
                return Err(ReanalError::Interrupted(cur));
            }
            if buf[idx..].starts_with(&[0xff; 4]) {
                fcn.fit_block(bb, max_size)?;
                return Err(ReanalError::DecodeFailure {
                    addr: cur,
                    reason: "ran into unmapped memory".to_string(),
                });
            }

            let mut op = match self.ctx.decoder.decode(cur, &buf[idx..]) {
                Ok(op) => op,
                Err(e) if idx == 0 => return Err(ReanalError::decode(cur, e)),
                Err(_) => break,
            };
            self.ctx.hints.apply(&mut op);
            if op.size == 0 {
                if idx == 0 {
                    return Err(ReanalError::DecodeFailure {
                        addr: cur,
                        reason: "zero-length instruction".to_string(),
                    });
                }
                break;
            }
            let len = op.size as u64;
            let op_idx = idx;
            trace!(addr = cur, kind = %op.kind, size = op.size, "decoded");

            // never let two blocks of one function overlap
            let own = fcn.blocks[bb].addr;
            let other = fcn
                .block_at(cur)
                .map(|b| b.addr)
                .filter(|&a| a != own)
                .or_else(|| fcn.block_start_within(cur, cur.saturating_add(len)));
            if let Some(at) = other {
                debug!(addr = cur, block = at, "reached existing block");
                fcn.blocks[bb].jump = Some(at);
                fcn.fit_block(bb, max_size)?;
                return Ok(WalkStatus::End);
            }

            fcn.blocks[bb].push_op(cur, len);
            fcn.ninstr += 1;
            idx += op.size;

            if op.delay > 0 && !delay.pending {
                delay = DelaySlots {
                    count: op.delay,
                    idx: op_idx,
                    after: 0,
                    pending: true,
                    adjust: true,
                };
                continue;
            }
            if delay.count > 0 {
                delay.count -= 1;
                if delay.count == 0 {
                    delay.after = idx;
                    idx = delay.idx;
                }
            } else if op.delay > 0 && delay.pending {
                if delay.adjust {
                    fcn.blocks[bb].pop_op(len);
                    fcn.ninstr = fcn.ninstr.saturating_sub(1);
                    fcn.fit_block(bb, max_size)?;
                }
                idx = delay.after;
                delay = DelaySlots::default();
            }

            self.track_stack(fcn, &op);
            if let Some(ptr) = op.ptr {
                if self.ctx.memory.is_valid(ptr) {
                    self.add_ref(fcn, op.address, ptr, XrefKind::Data);
                }
            }

            match op.kind {
                OpKind::Illegal | OpKind::Trap | OpKind::Nop => {
                    let pad = match op.kind {
                        OpKind::Illegal => buf[op_idx..].starts_with(&[0; 4]),
                        OpKind::Trap => buf[op_idx] == 0xcc,
                        _ => !self.ctx.symbols.has_symbol_at(fcn.addr),
                    };
                    if opts.nopskip && pad && op.address == fcn.addr {
                        // drop leading padding from the entry
                        let block = &mut fcn.blocks[bb];
                        block.pop_op(len);
                        block.addr += len;
                        fcn.addr += len;
                        fcn.ninstr = fcn.ninstr.saturating_sub(1);
                        continue;
                    }
                    match op.kind {
                        OpKind::Nop => {}
                        OpKind::Illegal if opts.nopskip && pad => {
                            fcn.blocks[bb].pop_op(len);
                            fcn.ninstr = fcn.ninstr.saturating_sub(1);
                            fcn.fit_block(bb, max_size)?;
                            return Ok(WalkStatus::End);
                        }
                        _ => {
                            fcn.fit_block(bb, max_size)?;
                            return Ok(WalkStatus::End);
                        }
                    }
                }
                OpKind::Jmp => {
                    let Some(target) = op.jump else {
                        fcn.fit_block(bb, max_size)?;
                        return Ok(WalkStatus::End);
                    };
                    if opts.jmpref {
                        self.add_ref(fcn, op.address, target, XrefKind::Code);
                    }
                    if self.is_noreturn(target) || (target < fcn.addr && !opts.jmpabove) {
                        fcn.fit_block(bb, max_size)?;
                        return Ok(WalkStatus::End);
                    }
                    if opts.jump_policy == JumpPolicy::EndOfBlock
                        || self.leaves_section(op.address, target)
                    {
                        fcn.blocks[bb].jump = Some(target);
                        fcn.fit_block(bb, max_size)?;
                        return Ok(WalkStatus::End);
                    }
                    children.push(WorkItem {
                        addr: target,
                        depth: child,
                    });
                    if opts.jump_policy == JumpPolicy::Split {
                        let block = &mut fcn.blocks[bb];
                        block.jump = Some(target);
                        block.fail = None;
                        fcn.fit_block(bb, max_size)?;
                        return Ok(WalkStatus::End);
                    }
                }
                OpKind::Cjmp => {
                    let fail = op.fail.unwrap_or_else(|| op.next());
                    if let Some(target) = op.jump {
                        if opts.cjmpref {
                            self.add_ref(fcn, op.address, target, XrefKind::Code);
                        }
                        if self.follows(fcn, op.address, target) {
                            children.push(WorkItem {
                                addr: target,
                                depth: child,
                            });
                        }
                    }
                    children.push(WorkItem {
                        addr: fail,
                        depth: child,
                    });
                    let block = &mut fcn.blocks[bb];
                    block.jump = op.jump;
                    block.fail = Some(fail);
                    block.conditional = true;
                    fcn.fit_block(bb, max_size)?;
                    return Ok(WalkStatus::End);
                }
                OpKind::Call | OpKind::Ccall => {
                    if let Some(target) = op.jump {
                        self.add_ref(fcn, op.address, target, XrefKind::Call);
                        if op.kind == OpKind::Call && self.is_noreturn(target) {
                            debug!(addr = op.address, target, "call to no-return function");
                            fcn.fit_block(bb, max_size)?;
                            return Ok(WalkStatus::End);
                        }
                    }
                }
                OpKind::Ujmp => {
                    if opts.jmptbl {
                        self.walk_jump_table(fcn, &op, buf, start, op_idx, child, children)?;
                    }
                    let section = self.ctx.memory.section_name(op.address);
                    if !self
                        .ctx
                        .decoder
                        .ujmp_continues(op.address, section.as_deref())
                    {
                        fcn.fit_block(bb, max_size)?;
                        return Ok(WalkStatus::End);
                    }
                }
                OpKind::Push => last_push = op.val,
                OpKind::Ret => {
                    if let (true, Some(target)) = (opts.pushret, last_push) {
                        fcn.blocks[bb].jump = Some(target);
                        children.push(WorkItem {
                            addr: target,
                            depth: child,
                        });
                        fcn.fit_block(bb, max_size)?;
                        return Ok(WalkStatus::End);
                    }
                    if !op.conditional {
                        fcn.blocks[bb].kind |= BlockKind::LAST;
                        fcn.fit_block(bb, max_size)?;
                        return Ok(WalkStatus::End);
                    }
                }
                _ => {}
            }
            if op.kind != OpKind::Push {
                last_push = None;
            }
        }

        fcn.fit_block(bb, max_size)?;
        Ok(WalkStatus::End)
    }

    /// Whether a conditional branch target is walked as part of this function.
    fn follows(&self, fcn: &Function, from: u64, target: u64) -> bool {
        !self.is_noreturn(target)
            && (target >= fcn.addr || self.ctx.options.jmpabove)
            && self.ctx.options.jump_policy != JumpPolicy::EndOfBlock
            && !self.leaves_section(from, target)
    }

    fn leaves_section(&self, from: u64, to: u64) -> bool {
        self.ctx.options.cross_section_eob
            && self.ctx.memory.section_name(from) != self.ctx.memory.section_name(to)
    }

    fn track_stack(&mut self, fcn: &mut Function, op: &Op) {
        match op.stack {
            StackEffect::Increment(n) => fcn.stack = fcn.stack.saturating_add(n),
            StackEffect::Set(delta) => fcn.record_stack_access(delta, true, op.address),
            StackEffect::Get(delta) => fcn.record_stack_access(delta, false, op.address),
            StackEffect::None => {}
        }
        if self.ctx.options.frame_vars_from_semantics {
            let regs = self.ctx.registers;
            extract_frame_vars(fcn, op, regs.frame_pointer(), regs.stack_pointer());
        }
    }

    #[allow(clippy::too_many_arguments)]
    fn walk_jump_table(
        &mut self,
        fcn: &mut Function,
        op: &Op,
        buf: &[u8],
        start: u64,
        op_idx: usize,
        depth: u32,
        children: &mut Vec<WorkItem>,
    ) -> Result<(), ReanalError> {
        // the table base stays in the store but is not a reference of the function
        if fcn
            .refs
            .last()
            .is_some_and(|r| r.from == op.address && r.kind == XrefKind::Data)
        {
            fcn.refs.pop();
        }
        let table = op.ptr.or_else(|| {
            let reg = op.src.first()?.register.as_deref()?;
            find_last_write(self.ctx.decoder, buf, start, op_idx, reg)
        });
        let Some(table) = table else {
            return Ok(());
        };
        let word = usize::from(fcn.bits / 8).max(1);
        let reader = JumpTableReader::new(self.ctx.memory, word, self.ctx.big_endian, self.ctx.limit)
            .with_cancel(self.ctx.cancel);
        let targets = reader.targets(op.address, table);
        if self.ctx.cancel.load(Ordering::Relaxed) {
            return Err(ReanalError::Interrupted(op.address));
        }
        for target in targets {
            children.push(WorkItem {
                addr: target,
                depth,
            });
        }
        Ok(())
    }
}

/// Settle a completed walk: sort blocks, cut the size to contiguous
/// coverage and to the next sibling entry, and drop code references that
/// now stay inside the function.
pub fn finalize(fcn: &mut Function, functions: &BTreeMap<u64, Function>, options: &AnalysisOptions) {
    fcn.sort_blocks();
    let end = fcn.contiguous_end(options.bbs_alignment);
    if !fcn.resize(end.saturating_sub(fcn.addr)) {
        fcn.set_size(0);
        return;
    }
    if let Some((&sibling, _)) = functions
        .range(fcn.addr.saturating_add(1)..fcn.end())
        .next()
    {
        debug!(addr = fcn.addr, sibling, "truncated at sibling function");
        fcn.resize(sibling - fcn.addr);
    }
    let (lo, hi) = (fcn.addr, fcn.end());
    fcn.refs
        .retain(|r| !(r.kind == XrefKind::Code && r.to >= lo && r.to < hi));
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::analysis::memory::SliceMemory;
    use crate::core::function::FunctionKind;
    use crate::core::op::OpOperand;
    use crate::core::register::RegisterProfile;
    use crate::core::symbol::SymbolTable;
    use crate::disasm::table::TableDecoder;

    struct Fixture {
        decoder: TableDecoder,
        memory: SliceMemory,
        registers: RegisterProfile,
        symbols: SymbolTable,
        functions: BTreeMap<u64, Function>,
        noreturn: NoReturnList,
        hints: HintStore,
        options: AnalysisOptions,
        cancel: AtomicBool,
        xrefs: XrefStore,
    }

    impl Fixture {
        fn new(ops: Vec<Op>) -> Self {
            Self {
                decoder: ops.into_iter().collect(),
                memory: SliceMemory::with_bytes(0x1000, vec![0x90; 0x100]),
                registers: RegisterProfile::x86(),
                symbols: SymbolTable::new(),
                functions: BTreeMap::new(),
                noreturn: NoReturnList::new(),
                hints: HintStore::new(),
                options: AnalysisOptions::default(),
                cancel: AtomicBool::new(false),
                xrefs: XrefStore::new(),
            }
        }

        fn walk(&mut self, depth: u32) -> (Function, WalkOutcome) {
            let ctx = WalkContext {
                decoder: &self.decoder,
                memory: &self.memory,
                registers: &self.registers,
                symbols: &self.symbols,
                functions: &self.functions,
                noreturn: &self.noreturn,
                hints: &self.hints,
                options: &self.options,
                limit: None,
                big_endian: false,
                sleep_us: 0,
                cancel: &self.cancel,
            };
            let mut fcn = Function::new(0x1000, "f", FunctionKind::Normal);
            fcn.bits = 32;
            let outcome = CfgBuilder::new(ctx, &mut self.xrefs).walk(&mut fcn, depth);
            if outcome.status == WalkStatus::End {
                finalize(&mut fcn, &self.functions, &self.options);
            }
            (fcn, outcome)
        }
    }

    fn diamond() -> Vec<Op> {
        vec![
            Op::new(0x1000, 2, OpKind::Cmp),
            Op::new(0x1002, 2, OpKind::Cjmp)
                .with_jump(0x1008)
                .with_fail(0x1004),
            Op::new(0x1004, 2, OpKind::Mov),
            Op::new(0x1006, 2, OpKind::Jmp).with_jump(0x100a),
            Op::new(0x1008, 2, OpKind::Mov),
            Op::new(0x100a, 1, OpKind::Ret),
        ]
    }

    #[test]
    fn diamond_blocks_are_disjoint() {
        let mut fx = Fixture::new(diamond());
        let (fcn, outcome) = fx.walk(16);

        assert_eq!(outcome.status, WalkStatus::End);
        let starts: Vec<u64> = fcn.blocks.iter().map(|b| b.addr).collect();
        assert_eq!(starts, vec![0x1000, 0x1004, 0x1008, 0x100a]);
        for pair in fcn.blocks.windows(2) {
            assert!(pair[0].end() <= pair[1].addr);
        }
        assert_eq!(fcn.size(), 0x0b);
        assert!(fcn.blocks[0].conditional);
        assert_eq!(fcn.blocks[2].jump, Some(0x100a));
        assert!(fcn.blocks[3].kind.contains(BlockKind::LAST));
        // the join point was reached twice
        assert!(outcome.paths.iter().any(|p| p.status == WalkStatus::Dup));
        // intra-function code refs are trimmed from the function only
        assert!(fcn.refs.iter().all(|r| r.kind != XrefKind::Code));
        assert!(fx.xrefs.contains(0x1002, 0x1008, XrefKind::Code));
    }

    #[test]
    fn recont_turns_rejoin_into_end() {
        let mut fx = Fixture::new(diamond());
        fx.options.recont = true;
        let (_, outcome) = fx.walk(16);
        assert!(outcome.paths.iter().all(|p| p.status == WalkStatus::End));
    }

    #[test]
    fn leading_nops_are_skipped() {
        let mut fx = Fixture::new(vec![
            Op::new(0x1000, 1, OpKind::Nop),
            Op::new(0x1001, 1, OpKind::Nop),
            Op::new(0x1002, 1, OpKind::Ret),
        ]);
        let (fcn, outcome) = fx.walk(4);
        assert_eq!(outcome.status, WalkStatus::End);
        assert_eq!(fcn.addr, 0x1002);
        assert_eq!(fcn.size(), 1);
        assert_eq!(fcn.ninstr, 1);
    }

    #[test]
    fn nops_at_symbol_are_kept() {
        let mut fx = Fixture::new(vec![
            Op::new(0x1000, 1, OpKind::Nop),
            Op::new(0x1001, 1, OpKind::Ret),
        ]);
        fx.symbols.insert(0x1000, "sym.entry");
        let (fcn, _) = fx.walk(4);
        assert_eq!(fcn.addr, 0x1000);
        assert_eq!(fcn.size(), 2);
    }

    #[test]
    fn delay_slot_is_counted_once() {
        let mut fx = Fixture::new(vec![
            Op::new(0x1000, 4, OpKind::Jmp)
                .with_jump(0x1010)
                .with_delay(1),
            Op::new(0x1004, 4, OpKind::Mov),
            Op::new(0x1010, 4, OpKind::Ret),
        ]);
        fx.options.bbs_alignment = 16;
        let (fcn, outcome) = fx.walk(4);
        assert_eq!(outcome.status, WalkStatus::End);
        let head = &fcn.blocks[0];
        assert_eq!(head.size, 8);
        assert_eq!(head.op_offsets, vec![0, 4]);
        assert_eq!(head.jump, Some(0x1010));
        assert_eq!(fcn.ninstr, 3);
    }

    #[test]
    fn noreturn_call_ends_block() {
        let mut fx = Fixture::new(vec![
            Op::new(0x1000, 5, OpKind::Call).with_jump(0x1080),
            Op::new(0x1005, 1, OpKind::Ret),
        ]);
        fx.noreturn.add("0x1080");
        let (fcn, outcome) = fx.walk(4);
        assert_eq!(outcome.status, WalkStatus::End);
        assert_eq!(fcn.size(), 5);
        assert!(fx.xrefs.contains(0x1000, 0x1080, XrefKind::Call));
    }

    #[test]
    fn pushret_becomes_jump() {
        let ops = vec![
            Op::new(0x1000, 5, OpKind::Push).with_val(0x1010),
            Op::new(0x1005, 1, OpKind::Ret),
            Op::new(0x1010, 1, OpKind::Ret),
        ];
        let mut fx = Fixture::new(ops.clone());
        let (fcn, _) = fx.walk(4);
        assert_eq!(fcn.blocks.len(), 1);

        let mut fx = Fixture::new(ops);
        fx.options.pushret = true;
        let (fcn, _) = fx.walk(4);
        assert_eq!(fcn.blocks[0].jump, Some(0x1010));
        assert!(fcn.block_at(0x1010).is_some());
    }

    #[test]
    fn size_limit_aborts_walk() {
        let mut fx = Fixture::new(vec![
            Op::new(0x1000, 8, OpKind::Mov),
            Op::new(0x1008, 8, OpKind::Mov),
            Op::new(0x1010, 1, OpKind::Ret),
        ]);
        fx.options.max_function_size = 0x0c;
        let (fcn, outcome) = fx.walk(4);
        assert_eq!(outcome.status, WalkStatus::Error);
        assert!(matches!(
            outcome.error,
            Some(ReanalError::SizeLimitExceeded { .. })
        ));
        assert_eq!(fcn.size(), 0);
    }

    #[test]
    fn cancellation_interrupts() {
        let mut fx = Fixture::new(diamond());
        fx.cancel.store(true, Ordering::Relaxed);
        let (_, outcome) = fx.walk(4);
        assert_eq!(outcome.status, WalkStatus::Error);
        assert_eq!(outcome.error, Some(ReanalError::Interrupted(0x1000)));
    }

    #[test]
    fn depth_and_memory_failures() {
        let mut fx = Fixture::new(diamond());
        let (_, outcome) = fx.walk(0);
        assert_eq!(outcome.error, Some(ReanalError::RecursionExhausted(0x1000)));

        let mut fx = Fixture::new(diamond());
        fx.memory = SliceMemory::with_bytes(0x1000, vec![0xff; 0x10]);
        let (fcn, outcome) = fx.walk(4);
        assert!(matches!(
            outcome.error,
            Some(ReanalError::DecodeFailure { addr: 0x1000, .. })
        ));
        assert!(fcn.blocks.is_empty());

        let mut fx = Fixture::new(diamond());
        fx.memory = SliceMemory::with_bytes(0x5000, vec![0x90; 0x10]);
        let (_, outcome) = fx.walk(4);
        assert_eq!(outcome.error, Some(ReanalError::InvalidAddress(0x1000)));
    }

    #[test]
    fn branch_into_existing_function_is_dup() {
        let mut fx = Fixture::new(vec![
            Op::new(0x1000, 2, OpKind::Cjmp)
                .with_jump(0x1040)
                .with_fail(0x1002),
            Op::new(0x1002, 1, OpKind::Ret),
        ]);
        fx.functions
            .insert(0x1040, Function::new(0x1040, "g", FunctionKind::Normal));
        let (_, outcome) = fx.walk(4);
        assert_eq!(outcome.status, WalkStatus::End);
        assert_eq!(outcome.paths[1].addr, 0x1040);
        assert_eq!(outcome.paths[1].status, WalkStatus::Dup);
    }

    fn memory_with(base: u64, patch: &[(usize, &[u8])]) -> SliceMemory {
        let mut bytes = vec![0x90; 0x100];
        for (at, data) in patch {
            bytes[*at..*at + data.len()].copy_from_slice(data);
        }
        SliceMemory::with_bytes(base, bytes)
    }

    fn table_at_0x1080() -> Vec<u8> {
        [0x1010u32, 0x1020].iter().flat_map(|e| e.to_le_bytes()).collect()
    }

    #[test]
    fn jump_table_base_found_by_back_scan() {
        let mut load = Op::new(0x1000, 5, OpKind::Mov);
        load.dst = Some(OpOperand::register("eax"));
        load.src = vec![OpOperand::immediate(0x1080)];
        let mut jump = Op::new(0x1005, 2, OpKind::Ujmp);
        jump.src = vec![OpOperand::register("eax")];
        let mut fx = Fixture::new(vec![
            load,
            jump,
            Op::new(0x1010, 1, OpKind::Ret),
            Op::new(0x1020, 1, OpKind::Ret),
        ]);
        fx.memory = memory_with(0x1000, &[(0x80, &table_at_0x1080())]);
        let (fcn, outcome) = fx.walk(4);
        assert_eq!(outcome.status, WalkStatus::End);
        let starts: Vec<u64> = fcn.blocks.iter().map(|b| b.addr).collect();
        assert_eq!(starts, vec![0x1000, 0x1010, 0x1020]);
    }

    #[test]
    fn jump_table_base_is_not_a_function_ref() {
        let mut fx = Fixture::new(vec![
            Op::new(0x1000, 2, OpKind::Ujmp).with_ptr(0x1080),
            Op::new(0x1010, 1, OpKind::Ret),
            Op::new(0x1020, 1, OpKind::Ret),
        ]);
        fx.memory = memory_with(0x1000, &[(0x80, &table_at_0x1080())]);
        let (fcn, _) = fx.walk(4);
        assert_eq!(fcn.blocks.len(), 3);
        assert!(fcn.refs.iter().all(|r| r.kind != XrefKind::Unknown));
        assert!(!fcn.refs.iter().any(|r| r.from == 0x1000 && r.to == 0x1080));
        assert!(fx.xrefs.contains(0x1000, 0x1080, XrefKind::Data));
    }

    #[test]
    fn indirect_jump_in_plt_continues() {
        let ops = vec![
            Op::new(0x1000, 6, OpKind::Ujmp),
            Op::new(0x1006, 1, OpKind::Ret),
        ];
        let mut plt = SliceMemory::new();
        plt.map(0x1000, vec![0x90; 0x100], Some(".plt"));

        let mut fx = Fixture::new(ops.clone());
        fx.memory = plt.clone();
        let (fcn, _) = fx.walk(4);
        assert_eq!(fcn.size(), 6);

        let mut fx = Fixture::new(ops);
        fx.memory = plt;
        fx.decoder = fx.decoder.clone().with_continue_section(".plt");
        let (fcn, outcome) = fx.walk(4);
        assert_eq!(outcome.status, WalkStatus::End);
        assert_eq!(fcn.blocks.len(), 1);
        assert_eq!(fcn.size(), 7);
    }

    #[test]
    fn leading_trap_and_illegal_pads_are_skipped() {
        let mut fx = Fixture::new(vec![
            Op::new(0x1000, 1, OpKind::Trap),
            Op::new(0x1001, 1, OpKind::Trap),
            Op::new(0x1002, 1, OpKind::Ret),
        ]);
        fx.memory = memory_with(0x1000, &[(0, &[0xcc, 0xcc])]);
        let (fcn, outcome) = fx.walk(4);
        assert_eq!(outcome.status, WalkStatus::End);
        assert_eq!(fcn.addr, 0x1002);
        assert_eq!(fcn.size(), 1);

        let mut fx = Fixture::new(vec![
            Op::new(0x1000, 4, OpKind::Illegal),
            Op::new(0x1004, 1, OpKind::Ret),
        ]);
        fx.memory = memory_with(0x1000, &[(0, &[0; 4])]);
        let (fcn, _) = fx.walk(4);
        assert_eq!(fcn.addr, 0x1004);
        assert_eq!(fcn.ninstr, 1);
    }

    #[test]
    fn pads_after_code_end_the_path() {
        let mut fx = Fixture::new(vec![
            Op::new(0x1000, 2, OpKind::Mov),
            Op::new(0x1002, 1, OpKind::Trap),
            Op::new(0x1003, 1, OpKind::Ret),
        ]);
        fx.memory = memory_with(0x1000, &[(2, &[0xcc])]);
        let (fcn, _) = fx.walk(4);
        assert_eq!(fcn.addr, 0x1000);
        assert_eq!(fcn.size(), 3);

        // zero padding is not counted as code
        let mut fx = Fixture::new(vec![
            Op::new(0x1000, 2, OpKind::Mov),
            Op::new(0x1002, 2, OpKind::Illegal),
        ]);
        fx.memory = memory_with(0x1000, &[(2, &[0; 4])]);
        let (fcn, _) = fx.walk(4);
        assert_eq!(fcn.size(), 2);
        assert_eq!(fcn.ninstr, 1);
    }

    #[test]
    fn continue_after_jump_keeps_decoding() {
        let ops = vec![
            Op::new(0x1000, 2, OpKind::Jmp).with_jump(0x1010),
            Op::new(0x1002, 1, OpKind::Ret),
            Op::new(0x1010, 1, OpKind::Ret),
        ];
        let mut fx = Fixture::new(ops.clone());
        fx.options.jump_policy = JumpPolicy::ContinueAfter;
        let (fcn, outcome) = fx.walk(4);
        assert_eq!(outcome.status, WalkStatus::End);
        assert_eq!(fcn.blocks[0].size, 3);
        assert_eq!(fcn.blocks[0].ninstr(), 2);
        assert!(fcn.block_at(0x1010).is_some());

        let mut fx = Fixture::new(ops);
        let (fcn, _) = fx.walk(4);
        assert_eq!(fcn.blocks[0].size, 2);
        assert_eq!(fcn.blocks[0].jump, Some(0x1010));
        assert!(fcn.block_at(0x1010).is_some());
    }

    #[test]
    fn conditional_return_does_not_end_path() {
        let mut cond = Op::new(0x1000, 1, OpKind::Ret);
        cond.conditional = true;
        let mut fx = Fixture::new(vec![
            cond,
            Op::new(0x1001, 2, OpKind::Mov),
            Op::new(0x1003, 1, OpKind::Ret),
        ]);
        let (fcn, _) = fx.walk(4);
        assert_eq!(fcn.blocks.len(), 1);
        assert_eq!(fcn.size(), 4);
        assert!(fcn.blocks[0].kind.contains(BlockKind::LAST));
    }

    #[test]
    fn straddling_op_stops_at_existing_block() {
        let mut fx = Fixture::new(vec![
            Op::new(0x1000, 2, OpKind::Cjmp)
                .with_jump(0x1004)
                .with_fail(0x1002),
            Op::new(0x1002, 1, OpKind::Mov),
            // would cover the start of the block at 0x1004
            Op::new(0x1003, 2, OpKind::Mov),
            Op::new(0x1004, 1, OpKind::Ret),
        ]);
        let (fcn, outcome) = fx.walk(4);
        assert_eq!(outcome.status, WalkStatus::End);
        let spans: Vec<(u64, u64)> = fcn.blocks.iter().map(|b| (b.addr, b.size)).collect();
        assert_eq!(spans, vec![(0x1000, 2), (0x1002, 1), (0x1004, 1)]);
        assert_eq!(fcn.block_at(0x1002).unwrap().jump, Some(0x1004));
        assert_eq!(fcn.ninstr, 3);
    }

    #[test]
    fn tagged_stack_effects_become_variables() {
        let mut fx = Fixture::new(vec![
            Op::new(0x1000, 1, OpKind::Push).with_stack(StackEffect::Increment(4)),
            Op::new(0x1001, 3, OpKind::Mov).with_stack(StackEffect::Set(-8)),
            Op::new(0x1004, 3, OpKind::Mov).with_stack(StackEffect::Get(8)),
            Op::new(0x1007, 3, OpKind::Mov).with_stack(StackEffect::Get(-8)),
            Op::new(0x100a, 1, OpKind::Ret),
        ]);
        let (fcn, _) = fx.walk(4);
        assert_eq!(fcn.stack, 4);
        assert_eq!(fcn.vars.len(), 2);
        let local = fcn.var_by_name("local_8h").unwrap();
        assert_eq!(local.accesses.len(), 2);
        assert!(local.accesses[0].write);
        assert_eq!(local.accesses[1].addr, 0x1007);
        let arg = fcn.var_by_name("arg_8h").unwrap();
        assert!(!arg.accesses[0].write);
    }
}
