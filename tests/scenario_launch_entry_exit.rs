//! Launching a process arms a single-shoot breakpoint at its entry point;
//! the first `STATUS_BREAKPOINT` is the loader's system breakpoint, the
//! second is the entry point itself.

mod common;

use common::{push_breakpoint_exception, push_exit_process, Hit};

#[test]
fn entry_breakpoint_fires_once_between_create_and_exit() {
    let entry = 0x0040_1000;
    let mut debugger = common::launch(entry);

    // `ExceptionAddress` is the breakpoint's own address: the system
    // breakpoint fires at any address (nothing is armed yet on the first
    // hit), the entry breakpoint fires at `entry` itself.
    push_breakpoint_exception(&mut debugger, 0x7FFD_E000);
    push_breakpoint_exception(&mut debugger, entry);
    push_exit_process(&mut debugger);

    debugger.start().expect("dispatch loop");

    let log = &debugger.hooks().log;
    assert_eq!(
        log,
        &[
            Hit::CreateProcess,
            Hit::SystemBreakpoint,
            Hit::Breakpoint(entry),
            Hit::EntryBreakpoint,
            Hit::ExitProcess,
        ]
    );
    assert_eq!(debugger.hooks().count(&Hit::EntryBreakpoint), 1);
}
