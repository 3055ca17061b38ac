//! The hook surface an embedder implements to observe and react to debug
//! events.
//!
//! Every method has a default empty-body implementation, so an embedder
//! only overrides the handful it cares about — composition over a fixed
//! inheritance hierarchy of event handlers.

use crate::error::Error;
use crate::kernel::{
    CreateProcessInfo, CreateThreadInfo, DebugEvent, ExitProcessInfo, ExitThreadInfo, LoadDllInfo,
    OutputDebugStringInfo, RipInfo, UnloadDllInfo,
};
use crate::process::Process;
use crate::thread::Thread;

/// Callbacks the event loop invokes around and during debug-event
/// dispatch. All methods take `&mut self` so an implementer can accumulate
/// state (a hit counter, a log) across calls.
#[allow(unused_variables)]
pub trait DebugEventHooks {
    /// Runs before the event is dispatched to any of the handlers below.
    fn on_pre_debug_event(&mut self, event: &DebugEvent) {}

    /// Runs after dispatch, before the loop clears `DR6` and continues the
    /// target.
    fn on_post_debug_event(&mut self, event: &DebugEvent) {}

    fn on_create_process(&mut self, process: &Process, info: &CreateProcessInfo) {}

    /// Runs instead of `on_create_process` when the process was attached to
    /// rather than launched by this debugger.
    fn on_attach_process(&mut self, process: &Process) {}

    fn on_exit_process(&mut self, process: &Process, info: &ExitProcessInfo) {}

    fn on_create_thread(&mut self, thread: &Thread, info: &CreateThreadInfo) {}

    fn on_exit_thread(&mut self, thread_id: u32, info: &ExitThreadInfo) {}

    fn on_load_dll(&mut self, process: &Process, info: &LoadDllInfo) {}

    fn on_unload_dll(&mut self, process: &Process, info: &UnloadDllInfo) {}

    fn on_output_debug_string(&mut self, process: &Process, info: &OutputDebugStringInfo) {}

    fn on_rip(&mut self, process: &Process, info: &RipInfo) {}

    fn on_unknown_event(&mut self, code: u32) {}

    /// Runs before the exception taxonomy below has been classified, for
    /// every exception debug event.
    fn on_pre_exception(&mut self, process: &Process, first_chance: bool) {}

    /// An exception this crate doesn't classify specially
    /// (`STATUS_ACCESS_VIOLATION` and anything outside the taxonomy it
    /// dispatches on).
    fn on_unhandled_exception(&mut self, process: &Process, thread: &Thread, exception_code: u32) {}

    /// The very first `STATUS_BREAKPOINT`, raised by the loader once the
    /// process image is mapped, before the entry point has run.
    fn on_system_breakpoint(&mut self, process: &Process, thread: &Thread) {}

    /// A user-registered software or hardware breakpoint fired.
    fn on_breakpoint(&mut self, process: &Process, thread: &Thread, address: u32) {}

    /// The process's own entry point was reached via its `STATUS_BREAKPOINT`.
    fn on_entry_breakpoint(&mut self, process: &Process, thread: &Thread) {}

    /// A user single-step (`step_into`) completed.
    fn on_step(&mut self, process: &Process, thread: &Thread) {}

    /// An error surfaced from inside the event loop itself (not from
    /// `WaitForDebugEvent`/`ContinueDebugEvent`, which instead stop the
    /// loop). The loop keeps running after this returns.
    fn on_internal_loop_error(&mut self, error: &Error) {}
}
