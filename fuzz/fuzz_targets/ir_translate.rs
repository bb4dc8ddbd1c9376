#![no_main]
use libfuzzer_sys::fuzz_target;

fuzz_target!(|data: &[u8]| {
    if let Ok(expr) = std::str::from_utf8(data) {
        let regs = reanal::RegisterProfile::x86();
        let mut session = reanal::TranslatorSession::new(&regs, 32);
        let before = session.temps_used();
        if session.translate_expr(0x1000, expr).is_err() {
            assert_eq!(session.temps_used(), before);
        }
    }
});
