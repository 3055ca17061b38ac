//! Reading through the safe path substitutes a software breakpoint's
//! original byte back in; reading unsafe shows the planted `INT3`.

mod common;

#[test]
fn safe_read_hides_the_int3_unsafe_read_shows_it() {
    let entry = 0x0040_1000;
    let address = 0x0040_4000;
    let mut debugger = common::launch(entry);
    assert!(debugger.step().unwrap(), "CreateProcess");

    debugger.kernel_mut().seed_memory(common::PROCESS_ID, address, &[0x90]);
    debugger.set_software_breakpoint(address, false).expect("arm breakpoint");

    let unsafe_bytes = debugger.read_memory_unsafe(address, 1).unwrap();
    assert_eq!(unsafe_bytes, vec![x86_debugger::breakpoint::INT3]);

    let safe_bytes = debugger.read_memory(address, 1).unwrap();
    assert_eq!(safe_bytes, vec![0x90]);
}
