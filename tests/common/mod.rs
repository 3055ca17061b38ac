//! Shared scaffolding for the end-to-end scenarios in this directory,
//! driving the public [`x86_debugger::Debugger`] API against
//! [`x86_debugger::kernel::fake::FakeKernel`].

use x86_debugger::hooks::DebugEventHooks;
use x86_debugger::kernel::fake::FakeKernel;
use x86_debugger::kernel::{CreateProcessInfo, ExitProcessInfo};
use x86_debugger::kernel::{Handle, ProcessId};
use x86_debugger::process::Process;
use x86_debugger::thread::Thread;
use x86_debugger::{Debugger, DebuggerConfig};

/// `FakeKernel::new()` starts its process-id and handle counters at 1, so
/// the first `create_process()` a test drives always hands back these
/// values — see `kernel::fake::FakeKernel::new`.
pub const PROCESS_ID: ProcessId = 1;
pub const PROCESS_HANDLE: Handle = Handle(1);
pub const THREAD_HANDLE: Handle = Handle(2);
pub const THREAD_ID: u32 = 7;

/// One hook invocation, in the order the loop made it, enough detail to
/// assert the event orderings SPEC_FULL.md's scenarios describe.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Hit {
    CreateProcess,
    AttachProcess,
    ExitProcess,
    SystemBreakpoint,
    Breakpoint(u32),
    EntryBreakpoint,
    Step,
    Unhandled(u32),
}

#[derive(Default)]
pub struct RecordingHooks {
    pub log: Vec<Hit>,
}

impl RecordingHooks {
    pub fn count(&self, hit: &Hit) -> usize {
        self.log.iter().filter(|h| *h == hit).count()
    }
}

impl DebugEventHooks for RecordingHooks {
    fn on_create_process(&mut self, _process: &Process, _info: &CreateProcessInfo) {
        self.log.push(Hit::CreateProcess);
    }

    fn on_attach_process(&mut self, _process: &Process) {
        self.log.push(Hit::AttachProcess);
    }

    fn on_exit_process(&mut self, _process: &Process, _info: &ExitProcessInfo) {
        self.log.push(Hit::ExitProcess);
    }

    fn on_system_breakpoint(&mut self, _process: &Process, _thread: &Thread) {
        self.log.push(Hit::SystemBreakpoint);
    }

    fn on_breakpoint(&mut self, _process: &Process, _thread: &Thread, address: u32) {
        self.log.push(Hit::Breakpoint(address));
    }

    fn on_entry_breakpoint(&mut self, _process: &Process, _thread: &Thread) {
        self.log.push(Hit::EntryBreakpoint);
    }

    fn on_step(&mut self, _process: &Process, _thread: &Thread) {
        self.log.push(Hit::Step);
    }

    fn on_unhandled_exception(&mut self, _process: &Process, _thread: &Thread, exception_code: u32) {
        self.log.push(Hit::Unhandled(exception_code));
    }
}

/// A launched (not attached) `Debugger<FakeKernel, RecordingHooks>`, with
/// the synthetic `CreateProcess` debug event already queued behind
/// `create()`'s own `create_process()` call. `entry` becomes the fake
/// thread's start address, so a software breakpoint set there is "the
/// entry breakpoint" as far as the dispatcher is concerned.
pub fn launch(entry: u32) -> Debugger<FakeKernel, RecordingHooks> {
    let kernel = FakeKernel::new();
    let mut debugger = Debugger::new(kernel, RecordingHooks::default(), DebuggerConfig::default());

    let process_id = debugger
        .create(x86_debugger::kernel::ProcessCreationRequest {
            file_path: "C:\\target.exe",
            command_line: "target.exe",
            current_directory: None,
            start_suspended: false,
            extra_flags: 0,
        })
        .expect("create_process");
    assert_eq!(process_id, PROCESS_ID, "test relies on FakeKernel's deterministic ids");

    push_create_process_event(&mut debugger, entry);
    debugger
}

/// Queue a `CreateProcess` debug event and seed the fake register file for
/// `THREAD_HANDLE`, so the next `start()` iteration builds the `Process`
/// record the rest of a scenario operates on.
pub fn push_create_process_event(debugger: &mut Debugger<FakeKernel, RecordingHooks>, entry: u32) {
    kernel_of(debugger).seed_context(PROCESS_ID, THREAD_HANDLE, x86_debugger::kernel::CpuContext::default());
    kernel_of(debugger).push_event(x86_debugger::kernel::DebugEvent {
        process_id: PROCESS_ID,
        thread_id: THREAD_ID,
        kind: x86_debugger::kernel::DebugEventKind::CreateProcess(CreateProcessInfo {
            process_handle: PROCESS_HANDLE,
            thread_handle: THREAD_HANDLE,
            file_handle: None,
            base_of_image: 0x0040_0000,
            start_address: entry,
            thread_local_base: 0,
        }),
    });
}

pub fn push_breakpoint_exception(debugger: &mut Debugger<FakeKernel, RecordingHooks>, address: u32) {
    kernel_of(debugger).push_event(x86_debugger::kernel::DebugEvent {
        process_id: PROCESS_ID,
        thread_id: THREAD_ID,
        kind: x86_debugger::kernel::DebugEventKind::Exception(x86_debugger::kernel::ExceptionInfo {
            code: x86_debugger::kernel::ExceptionCode::Breakpoint,
            address,
            first_chance: true,
        }),
    });
}

pub fn push_single_step_exception(debugger: &mut Debugger<FakeKernel, RecordingHooks>, address: u32) {
    kernel_of(debugger).push_event(x86_debugger::kernel::DebugEvent {
        process_id: PROCESS_ID,
        thread_id: THREAD_ID,
        kind: x86_debugger::kernel::DebugEventKind::Exception(x86_debugger::kernel::ExceptionInfo {
            code: x86_debugger::kernel::ExceptionCode::SingleStep,
            address,
            first_chance: true,
        }),
    });
}

pub fn push_exit_process(debugger: &mut Debugger<FakeKernel, RecordingHooks>) {
    kernel_of(debugger).push_event(x86_debugger::kernel::DebugEvent {
        process_id: PROCESS_ID,
        thread_id: THREAD_ID,
        kind: x86_debugger::kernel::DebugEventKind::ExitProcess(ExitProcessInfo { exit_code: 0 }),
    });
}

/// Short alias for `Debugger::kernel_mut`, the escape hatch this crate
/// exposes for exactly this: seeding and queuing state on the fake kernel
/// directly.
fn kernel_of(debugger: &mut Debugger<FakeKernel, RecordingHooks>) -> &mut FakeKernel {
    debugger.kernel_mut()
}
