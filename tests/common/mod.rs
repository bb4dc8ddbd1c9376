//! Shared fixtures for the integration tests.
#![allow(dead_code)]

use reanal::core::op::{Op, OpKind};
use reanal::disasm::table::TableDecoder;
use reanal::{Engine, EngineConfig, SliceMemory, SymbolTable};

/// Base of the x86 code fixtures
pub const CODE_BASE: u64 = 0x400000;
/// Where `printf` lives in [`push_call_ret`]
pub const PRINTF: u64 = 0x400100;

/// Engine driven by a fixed op table over `len` bytes of nops at `base`.
pub fn table_engine(ops: Vec<Op>, base: u64, len: usize) -> Engine {
    let decoder: TableDecoder = ops.into_iter().collect();
    let mut engine = Engine::with_decoder(EngineConfig::default(), Box::new(decoder));
    engine.set_memory(SliceMemory::with_bytes(base, vec![0x90; len]));
    engine
}

/// Engine using the built-in x86 decoder over `code` mapped at `base`.
pub fn x86_engine(base: u64, code: &[u8]) -> Engine {
    let mut engine = Engine::new(EngineConfig::default()).expect("x86 decoder");
    let mut mem = SliceMemory::new();
    mem.map(base, code.to_vec(), Some(".text"));
    engine.set_memory(mem);
    engine
}

/// `push 0x1000; call printf; ret` at [`CODE_BASE`], padded with int3.
pub fn push_call_ret() -> Vec<u8> {
    let mut code = vec![0x68, 0x00, 0x10, 0x00, 0x00];
    let rel = (PRINTF - (CODE_BASE + 10)) as u32;
    code.push(0xe8);
    code.extend_from_slice(&rel.to_le_bytes());
    code.push(0xc3);
    code.resize((PRINTF - CODE_BASE) as usize, 0xcc);
    // printf: ret
    code.push(0xc3);
    code
}

/// The [`push_call_ret`] engine with `printf` named.
pub fn printf_engine() -> Engine {
    let mut engine = x86_engine(CODE_BASE, &push_call_ret());
    let symbols: SymbolTable = [(PRINTF, "printf")].into_iter().collect();
    engine.set_symbols(symbols);
    engine
}

pub fn op(addr: u64, size: usize, kind: OpKind) -> Op {
    Op::new(addr, size, kind)
}

pub fn jmp(addr: u64, size: usize, target: u64) -> Op {
    Op::new(addr, size, OpKind::Jmp).with_jump(target)
}

pub fn cjmp(addr: u64, size: usize, target: u64) -> Op {
    Op::new(addr, size, OpKind::Cjmp)
        .with_jump(target)
        .with_fail(addr + size as u64)
}

pub fn call(addr: u64, size: usize, target: u64) -> Op {
    Op::new(addr, size, OpKind::Call).with_jump(target)
}

pub fn ret(addr: u64) -> Op {
    Op::new(addr, 1, OpKind::Ret)
}
