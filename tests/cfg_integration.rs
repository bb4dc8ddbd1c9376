//! Walker behaviour through the public engine API, driven by op tables.

mod common;

use std::thread;

use common::{call, cjmp, jmp, op, ret, table_engine};
use reanal::core::op::OpKind;
use reanal::disasm::table::TableDecoder;
use reanal::{Engine, EngineConfig, FunctionKind, ReanalError, SliceMemory, WalkStatus, XrefKind};

fn starts(engine: &Engine, addr: u64) -> Vec<u64> {
    engine
        .function_at(addr)
        .map(|f| f.blocks.iter().map(|b| b.addr).collect())
        .unwrap_or_default()
}

fn jump_table_engine(jmptbl: bool) -> Engine {
    let mut engine = table_engine(
        vec![
            op(0x1000, 2, OpKind::Mov),
            op(0x1002, 2, OpKind::Ujmp).with_ptr(0x2000),
            ret(0x1010),
            ret(0x1020),
        ],
        0x1000,
        0x100,
    );
    let table: Vec<u8> = [0x1010u32, 0x1020, 0xdead_beef]
        .iter()
        .flat_map(|e| e.to_le_bytes())
        .collect();
    let mut mem = SliceMemory::new();
    mem.map(0x1000, vec![0x90; 0x100], Some(".text"));
    mem.map(0x2000, table, Some(".rodata"));
    engine.set_memory(mem);
    engine.options_mut().jmptbl = jmptbl;
    engine
}

#[test]
fn jump_table_entries_become_blocks() {
    let mut engine = jump_table_engine(true);
    let report = engine.analyze_function_at(0x1000);
    assert_eq!(report.status, WalkStatus::End);
    assert_eq!(report.paths.len(), 3);
    assert_eq!(starts(&engine, 0x1000), vec![0x1000, 0x1010, 0x1020]);
    // both gaps end on aligned blocks
    assert_eq!(engine.function_at(0x1000).unwrap().size(), 0x21);
    // the table base itself is still indexed
    assert_eq!(engine.xrefs().get_from(0x1002).len(), 1);
    assert_eq!(engine.xrefs().get_from(0x1002)[0].to, 0x2000);
}

#[test]
fn jump_table_resolution_can_be_disabled() {
    let mut engine = jump_table_engine(false);
    engine.analyze_function_at(0x1000);
    assert_eq!(starts(&engine, 0x1000), vec![0x1000]);
    assert_eq!(engine.function_at(0x1000).unwrap().size(), 4);
}

#[test]
fn unaligned_gap_cuts_the_function() {
    let mut engine = table_engine(
        vec![cjmp(0x1000, 2, 0x1033), ret(0x1002), ret(0x1033)],
        0x1000,
        0x100,
    );
    let report = engine.analyze_function_at(0x1000);
    assert_eq!(report.paths.len(), 3);
    let fcn = engine.function_at(0x1000).unwrap();
    assert_eq!(fcn.size(), 3);
    assert_eq!(starts(&engine, 0x1000), vec![0x1000, 0x1002]);
    // the store keeps the edge even though the block was dropped
    assert!(engine.xrefs().contains(0x1000, 0x1033, XrefKind::Code));
}

#[test]
fn sibling_entry_truncates_size() {
    let mut engine = table_engine(
        vec![
            op(0x1000, 4, OpKind::Mov),
            op(0x1004, 4, OpKind::Mov),
            ret(0x1008),
        ],
        0x1000,
        0x100,
    );
    engine
        .add_function(0x1008, 8, Some("next"), FunctionKind::Normal)
        .unwrap();
    assert!(engine.analyze_function_at(0x1000).is_committed());
    assert_eq!(engine.function_at(0x1000).unwrap().size(), 8);
    assert_eq!(engine.function_at(0x1008).unwrap().name, "next");
}

#[test]
fn backward_branch_needs_jmpabove() {
    let ops = vec![ret(0x1000), cjmp(0x1010, 2, 0x1000), ret(0x1012)];

    let mut engine = table_engine(ops.clone(), 0x1000, 0x100);
    engine.options_mut().jmpabove = false;
    engine.analyze_function_at(0x1010);
    assert_eq!(starts(&engine, 0x1010), vec![0x1010, 0x1012]);
    let head = &engine.function_at(0x1010).unwrap().blocks[0];
    assert_eq!(head.jump, Some(0x1000));
    assert_eq!(head.fail, Some(0x1012));
    assert!(head.conditional);

    let mut engine = table_engine(ops, 0x1000, 0x100);
    engine.analyze_function_at(0x1010);
    assert_eq!(starts(&engine, 0x1010), vec![0x1000, 0x1010, 0x1012]);
}

#[test]
fn cross_section_jump_is_not_followed() {
    let decoder: TableDecoder = vec![
        jmp(0x1000, 2, 0x2000),
        op(0x2000, 2, OpKind::Ujmp),
        ret(0x2002),
    ]
    .into_iter()
    .collect();
    let mut mem = SliceMemory::new();
    mem.map(0x1000, vec![0x90; 0x10], Some(".text"));
    mem.map(0x2000, vec![0x90; 0x10], Some(".plt"));

    let mut engine = Engine::with_decoder(
        EngineConfig::default(),
        Box::new(decoder.clone().with_continue_section(".plt")),
    );
    engine.set_memory(mem.clone());
    engine.analyze_function_at(0x1000);
    let fcn = engine.function_at(0x1000).unwrap();
    assert_eq!(fcn.blocks.len(), 1);
    assert_eq!(fcn.size(), 2);
    assert!(engine.xrefs().contains(0x1000, 0x2000, XrefKind::Code));

    // an indirect jump inside a stub section keeps going
    engine.analyze_function_at(0x2000);
    assert_eq!(engine.function_at(0x2000).unwrap().size(), 3);

    let mut plain = Engine::with_decoder(EngineConfig::default(), Box::new(decoder));
    plain.set_memory(mem);
    plain.analyze_function_at(0x2000);
    assert_eq!(plain.function_at(0x2000).unwrap().size(), 2);
}

#[test]
fn limits_bound_the_walk() {
    let mut engine = table_engine(
        vec![
            op(0x1000, 2, OpKind::Mov),
            op(0x1002, 2, OpKind::Mov),
            op(0x1004, 2, OpKind::Mov),
            ret(0x1006),
        ],
        0x1000,
        0x100,
    );
    engine.set_limits(0x1000, 0x1006).unwrap();
    engine.analyze_function_at(0x1000);
    let fcn = engine.function_at(0x1000).unwrap();
    assert_eq!(fcn.size(), 6);
    assert_eq!(fcn.ninstr, 3);
}

#[test]
fn shallow_depth_keeps_root_only() {
    let mut engine = table_engine(
        vec![
            op(0x1000, 2, OpKind::Cmp),
            cjmp(0x1002, 2, 0x1008),
            ret(0x1004),
            ret(0x1008),
        ],
        0x1000,
        0x100,
    );
    engine.set_depth(1);
    let report = engine.analyze_function_at(0x1000);
    assert!(report.is_committed());
    assert!(report
        .paths
        .iter()
        .any(|p| p.error == Some(ReanalError::RecursionExhausted(0x1004))));
    assert_eq!(starts(&engine, 0x1000), vec![0x1000]);
}

#[test]
fn calls_are_recorded_not_walked() {
    let mut engine = table_engine(
        vec![call(0x1000, 5, 0x1080), ret(0x1005), ret(0x1080)],
        0x1000,
        0x100,
    );
    engine.analyze_function_at(0x1000);
    assert_eq!(engine.function_at(0x1000).unwrap().size(), 6);
    assert!(engine.function_at(0x1080).is_none());
    assert_eq!(engine.xrefs().get_kind(0x1080, XrefKind::Call).len(), 1);
}

#[test]
fn cancellation_from_another_thread() {
    let mut engine = table_engine(vec![op(0x1000, 1, OpKind::Mov), ret(0x1001)], 0x1000, 0x10);
    let token = engine.cancel_token();
    thread::spawn(move || token.store(true, std::sync::atomic::Ordering::SeqCst))
        .join()
        .unwrap();
    let report = engine.analyze_function_at(0x1000);
    assert_eq!(report.status, WalkStatus::Error);
    assert_eq!(report.error, Some(ReanalError::Interrupted(0x1000)));
    assert_eq!(engine.function_count(), 0);

    // the flag stays raised until reset
    assert!(!engine.analyze_function_at(0x1000).is_committed());
    engine.reset_cancel();
    assert!(engine.analyze_function_at(0x1000).is_committed());
}

#[test]
fn code_targets_become_locations_until_deleted() {
    let mut engine = table_engine(
        vec![cjmp(0x1000, 2, 0x1006), op(0x1002, 4, OpKind::Mov), ret(0x1006)],
        0x1000,
        0x100,
    );
    assert!(engine.analyze_function_at(0x1000).is_committed());

    let targets: Vec<u64> = engine
        .xrefs()
        .get_from(0x1000)
        .iter()
        .filter(|x| x.kind == XrefKind::Code)
        .map(|x| x.to)
        .collect();
    assert_eq!(targets, vec![0x1006]);
    for to in targets {
        let report = engine.analyze_function_as(to, XrefKind::Code);
        assert_eq!(report.status, WalkStatus::End);
    }

    let loc = engine.function_by_name("loc.00001006").unwrap();
    assert_eq!(loc.kind, FunctionKind::Location);
    assert_eq!(loc.size(), 1);
    assert_eq!(engine.function_count(), 2);
    assert_eq!(engine.function_in(0x1003).unwrap().addr, 0x1000);

    assert_eq!(engine.delete_locations(0x1000), 1);
    assert!(engine.function_by_name("loc.00001006").is_none());
    assert_eq!(engine.function_at(0x1000).unwrap().size(), 7);
}
