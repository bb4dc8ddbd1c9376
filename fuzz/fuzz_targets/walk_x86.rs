#![no_main]
use libfuzzer_sys::fuzz_target;

fuzz_target!(|data: &[u8]| {
    let Ok(mut engine) = reanal::Engine::new(reanal::EngineConfig::default()) else {
        return;
    };
    engine.set_memory(reanal::SliceMemory::with_bytes(0x1000, data.to_vec()));
    engine.set_depth(64);
    let report = engine.analyze_function_at(0x1000);
    if let Some(addr) = report.function {
        let fcn = engine.function_at(addr).expect("committed function");
        assert!(fcn.size() > 0);
    }
});
