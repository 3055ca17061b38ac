//! A non-single-shoot software breakpoint at a looping instruction stays
//! armed across repeated hits; its registered callback is one-shot even
//! though the breakpoint itself isn't.

mod common;

use std::sync::atomic::{AtomicU32, Ordering};
use std::sync::Arc;

use common::Hit;
use x86_debugger::breakpoint::BreakpointKind;

#[test]
fn loop_breakpoint_rearms_but_callback_fires_once() {
    let entry = 0x0040_1000;
    let loop_addr = 0x0040_3000;
    let mut debugger = common::launch(entry);

    assert!(debugger.step().unwrap(), "CreateProcess");
    common::push_breakpoint_exception(&mut debugger, 0x7FFD_E000);
    assert!(debugger.step().unwrap(), "system breakpoint");

    debugger.kernel_mut().seed_memory(common::PROCESS_ID, loop_addr, &[0x90]);
    debugger.set_software_breakpoint(loop_addr, false).expect("arm loop breakpoint");

    let callback_hits = Arc::new(AtomicU32::new(0));
    let callback_hits_clone = callback_hits.clone();
    debugger
        .set_breakpoint_callback(
            (BreakpointKind::Software, loop_addr),
            Box::new(move |_record| {
                callback_hits_clone.fetch_add(1, Ordering::SeqCst);
            }),
        )
        .expect("register callback");

    for _ in 0..5 {
        common::push_breakpoint_exception(&mut debugger, loop_addr);
        assert!(debugger.step().unwrap(), "breakpoint hit");
        common::push_single_step_exception(&mut debugger, loop_addr);
        assert!(debugger.step().unwrap(), "internal step rearm");
    }

    assert_eq!(debugger.hooks().count(&Hit::Breakpoint(loop_addr)), 5);
    assert_eq!(callback_hits.load(Ordering::SeqCst), 1, "callback is one-shot");

    let byte = debugger.read_memory_unsafe(loop_addr, 1).unwrap();
    assert_eq!(byte, vec![x86_debugger::breakpoint::INT3], "breakpoint still armed after the loop");
}
