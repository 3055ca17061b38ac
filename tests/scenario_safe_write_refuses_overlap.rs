//! A safe write that would overlap a software breakpoint refuses outright,
//! leaving memory and the breakpoint untouched — there's no buffer byte to
//! restore the `INT3` to after a partial write.

mod common;

#[test]
fn safe_write_refuses_a_range_overlapping_a_breakpoint() {
    let entry = 0x0040_1000;
    let base = 0x0040_5000;
    let mut debugger = common::launch(entry);
    assert!(debugger.step().unwrap(), "CreateProcess");

    debugger.kernel_mut().seed_memory(common::PROCESS_ID, base, &[0x90, 0x90, 0x90]);
    debugger.set_software_breakpoint(base + 1, false).expect("arm breakpoint");

    let result = debugger.write_memory(base, &[0x11, 0x22, 0x33]);
    assert!(result.is_err(), "write overlapping the breakpoint must be refused");

    let bytes = debugger.read_memory_unsafe(base, 3).unwrap();
    assert_eq!(bytes, vec![0x90, x86_debugger::breakpoint::INT3, 0x90], "memory left untouched");

    // The breakpoint is still armed: deleting it must still find it.
    debugger.delete_software_breakpoint(base + 1).expect("breakpoint survived the refused write");
}
