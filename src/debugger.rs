//! The debug-event dispatch loop: [`Debugger`] owns the kernel, the table
//! of debugged processes, and drives `WaitForDebugEvent` /
//! `ContinueDebugEvent` against the hooks an embedder supplies.

use std::collections::HashMap;

use tracing::{debug, info_span, warn};

use crate::breakpoint::{BreakpointKind, BreakpointRecord};
use crate::config::DebuggerConfig;
use crate::error::{Error, Result};
use crate::hooks::DebugEventHooks;
use crate::kernel::{
    ContextFlags, ContinueStatus, DebugEvent, DebugEventKind, DebugKernel, ExceptionCode,
    ProcessCreationRequest, ProcessId, ThreadId,
};
use crate::process::Process;
use crate::registers::{DebugStatusFlag, RegisterIndex, Registers};
use crate::thread::Thread;

/// A user-mode debugger for 32-bit x86 Windows processes.
///
/// Generic over the kernel boundary ([`DebugKernel`]) so it runs against a
/// real target through [`crate::kernel::windows::WindowsKernel`] or, in
/// tests, against [`crate::kernel::fake::FakeKernel`]; and over the hook
/// set ([`DebugEventHooks`]) so an embedder supplies exactly the
/// callbacks it needs.
pub struct Debugger<K: DebugKernel, H: DebugEventHooks> {
    kernel: K,
    hooks: H,
    config: DebuggerConfig,
    processes: HashMap<ProcessId, Process>,
    main_process_id: Option<ProcessId>,
    attached: bool,
    debugging: bool,
    detached: bool,
    main_process_exited: bool,
    continue_status: ContinueStatus,
    current: Option<(ProcessId, ThreadId)>,
}

impl<K: DebugKernel, H: DebugEventHooks> Debugger<K, H> {
    pub fn new(kernel: K, hooks: H, config: DebuggerConfig) -> Self {
        Self {
            kernel,
            hooks,
            config,
            processes: HashMap::new(),
            main_process_id: None,
            attached: false,
            debugging: false,
            detached: false,
            main_process_exited: false,
            continue_status: ContinueStatus::Continue,
        current: None,
        }
    }

    pub fn hooks(&self) -> &H {
        &self.hooks
    }

    pub fn hooks_mut(&mut self) -> &mut H {
        &mut self.hooks
    }

    /// Escape hatch to the kernel boundary itself, for an embedder that
    /// needs a primitive this type doesn't wrap (or a test harness seeding
    /// a [`crate::kernel::fake::FakeKernel`] directly).
    pub fn kernel_mut(&mut self) -> &mut K {
        &mut self.kernel
    }

    pub fn debugged_process(&self) -> Option<&Process> {
        self.current.and_then(|(process_id, _)| self.processes.get(&process_id))
    }

    pub fn debugged_thread(&self) -> Option<&Thread> {
        self.current
            .and_then(|(process_id, thread_id)| self.processes.get(&process_id)?.find_thread(thread_id))
    }

    /// Launch `request` as a new process under debug.
    pub fn create(&mut self, mut request: ProcessCreationRequest<'_>) -> Result<ProcessId> {
        request.extra_flags |= self.config.create_flags_extra;
        let created = self.kernel.create_process(request)?;
        self.main_process_id = Some(created.process_id);
        self.attached = false;
        self.debugging = true;
        self.detached = false;
        self.main_process_exited = false;
        Ok(created.process_id)
    }

    /// Attach to an already-running process. The attach itself generates
    /// no process record yet — Windows reports a synthetic
    /// `CREATE_PROCESS_DEBUG_EVENT` for the attached process on the next
    /// `WaitForDebugEvent`, and that is where the `Process` is built.
    pub fn attach(&mut self, process_id: ProcessId) -> Result<()> {
        self.kernel.debug_active_process(process_id)?;
        self.main_process_id = Some(process_id);
        self.attached = true;
        self.debugging = true;
        self.detached = false;
        self.main_process_exited = false;
        Ok(())
    }

    /// Run the dispatch loop until the target's main process exits or
    /// `detach`/`stop` is called.
    ///
    /// Just [`step`](Self::step) in a loop, for the common case of an
    /// embedder that wants to block until the session ends rather than
    /// interleave its own work between events.
    pub fn start(&mut self) -> Result<()> {
        while self.debugging && !self.detached && !self.main_process_exited {
            if !self.step()? {
                continue;
            }
            if self.detached {
                break;
            }
        }
        Ok(())
    }

    /// Wait for, dispatch, and continue past exactly one debug event.
    /// Returns `Ok(false)` if `poll_timeout` elapsed with nothing to
    /// report (the caller should simply call `step` again).
    ///
    /// Mirrors the original loop body exactly: wait, reset the outbound
    /// continue status, run `on_pre_debug_event`, dispatch, run
    /// `on_post_debug_event`, clear the debugged thread's `DR6`, then
    /// continue the target. A failure from the wait or continue calls
    /// themselves ends the session (`debugging` is cleared); any other
    /// error is routed to `on_internal_loop_error` and the session keeps
    /// running.
    ///
    /// Exposed so an embedder can pump the loop one event at a time —
    /// arming a breakpoint in response to one event before the next is
    /// dispatched, for instance — rather than only ever running
    /// `start`'s blocking loop to completion.
    pub fn step(&mut self) -> Result<bool> {
        let event = match self.kernel.wait_for_debug_event(self.config.poll_timeout) {
            Ok(Some(event)) => event,
            Ok(None) => return Ok(false),
            Err(error) => {
                self.debugging = false;
                return Err(error);
            }
        };

        let span = info_span!(
            "debug_event",
            process_id = event.process_id,
            thread_id = event.thread_id,
        );
        let _entered = span.enter();

        self.continue_status = ContinueStatus::Continue;
        self.current = Some((event.process_id, event.thread_id));

        self.hooks.on_pre_debug_event(&event);
        if let Err(error) = self.dispatch(&event) {
            warn!(%error, "error handling debug event");
            self.hooks.on_internal_loop_error(&error);
        }
        self.hooks.on_post_debug_event(&event);

        if let Some((process_id, thread_id)) = self.current {
            if let Some(process) = self.processes.get(&process_id) {
                if let Some(thread) = process.find_thread(thread_id) {
                    if let Ok(mut registers) =
                        Registers::new(&mut self.kernel, thread.handle, ContextFlags::DEBUG_REGISTERS)
                    {
                        registers.reset_debug_status();
                    }
                }
            }
        }

        if let Err(error) =
            self.kernel.continue_debug_event(event.process_id, event.thread_id, self.continue_status)
        {
            self.debugging = false;
            return Err(error);
        }

        if self.detached {
            self.unsafe_detach();
        }

        Ok(true)
    }

    /// Request the loop stop after the current iteration and detach from
    /// every debugged process, leaving them running.
    pub fn detach(&mut self) -> Result<()> {
        self.detached = true;
        Ok(())
    }

    /// Detach immediately, without waiting for the loop to notice. Does not
    /// touch `debugging`/`main_process_exited` bookkeeping — callers inside
    /// the loop use `detach` instead.
    fn unsafe_detach(&mut self) {
        for process_id in self.processes.keys().copied().collect::<Vec<_>>() {
            if let Err(error) = self.kernel.debug_active_process_stop(process_id) {
                warn!(process_id, %error, "failed to detach from process");
            }
        }
        self.clear_cache();
    }

    /// Terminate every debugged process and stop the loop.
    pub fn stop(&mut self) -> Result<()> {
        for process in self.processes.values() {
            self.kernel.terminate_process(process.handle, 1)?;
            if self.config.close_handles_on_exit {
                self.kernel.close_handle(process.handle)?;
                for thread in process.threads() {
                    self.kernel.close_handle(thread.handle)?;
                }
            }
        }
        self.debugging = false;
        self.clear_cache();
        Ok(())
    }

    /// The process id this debugger is currently tracking as "the" debugged
    /// process — the one passed to `create`/`attach`.
    pub fn main_process_id(&self) -> Option<ProcessId> {
        self.main_process_id
    }

    fn main_process_id_or_err(&self) -> Result<ProcessId> {
        self.main_process_id.ok_or_else(|| Error::domain("no process under debug"))
    }

    /// Arm a software breakpoint at `address` in the main debugged process.
    pub fn set_software_breakpoint(&mut self, address: u32, single_shoot: bool) -> Result<()> {
        let process_id = self.main_process_id_or_err()?;
        let process = self
            .processes
            .get_mut(&process_id)
            .ok_or_else(|| Error::domain("main process not yet tracked"))?;
        process.set_software_breakpoint(&mut self.kernel, address, single_shoot)
    }

    /// Remove the software breakpoint at `address`.
    pub fn delete_software_breakpoint(&mut self, address: u32) -> Result<()> {
        let process_id = self.main_process_id_or_err()?;
        let process = self
            .processes
            .get_mut(&process_id)
            .ok_or_else(|| Error::domain("main process not yet tracked"))?;
        process.delete_software_breakpoint(&mut self.kernel, address)
    }

    /// Arm a hardware breakpoint at `address` in the main debugged process,
    /// programmed onto every thread currently known to it.
    pub fn set_hardware_breakpoint(
        &mut self,
        address: u32,
        access: crate::breakpoint::HardwareBreakpointType,
        size: crate::breakpoint::HardwareBreakpointSize,
        single_shoot: bool,
    ) -> Result<crate::breakpoint::HardwareBreakpointSlot> {
        let process_id = self.main_process_id_or_err()?;
        let process = self
            .processes
            .get_mut(&process_id)
            .ok_or_else(|| Error::domain("main process not yet tracked"))?;
        process.set_hardware_breakpoint(&mut self.kernel, address, access, size, single_shoot)
    }

    /// Remove the hardware breakpoint at `address`.
    pub fn delete_hardware_breakpoint(&mut self, address: u32) -> Result<()> {
        let process_id = self.main_process_id_or_err()?;
        let process = self
            .processes
            .get_mut(&process_id)
            .ok_or_else(|| Error::domain("main process not yet tracked"))?;
        process.delete_hardware_breakpoint(&mut self.kernel, address)
    }

    /// Register a one-shot callback to run the next time the breakpoint
    /// identified by `key` fires.
    pub fn set_breakpoint_callback(
        &mut self,
        key: crate::breakpoint::BreakpointKey,
        callback: crate::breakpoint::BreakpointCallback,
    ) -> Result<()> {
        let process_id = self.main_process_id_or_err()?;
        let process = self
            .processes
            .get_mut(&process_id)
            .ok_or_else(|| Error::domain("main process not yet tracked"))?;
        process.set_breakpoint_callback(key, callback);
        Ok(())
    }

    /// Read `len` bytes from `address` in the main debugged process,
    /// through the safe path (software breakpoint bytes substituted back).
    pub fn read_memory(&mut self, address: u32, len: usize) -> Result<Vec<u8>> {
        let process_id = self.main_process_id_or_err()?;
        let process = self
            .processes
            .get(&process_id)
            .ok_or_else(|| Error::domain("main process not yet tracked"))?;
        process.read_memory(&mut self.kernel, address, len)
    }

    /// Write `data` to `address` in the main debugged process, through the
    /// safe path (refuses if a software breakpoint sits in the range).
    pub fn write_memory(&mut self, address: u32, data: &[u8]) -> Result<()> {
        let process_id = self.main_process_id_or_err()?;
        let process = self
            .processes
            .get_mut(&process_id)
            .ok_or_else(|| Error::domain("main process not yet tracked"))?;
        process.write_memory(&mut self.kernel, address, data)
    }

    /// Read `len` raw bytes from `address`, with no breakpoint-byte
    /// substitution — for callers that specifically need to see whatever
    /// is actually resident in the target, `INT3` included.
    pub fn read_memory_unsafe(&mut self, address: u32, len: usize) -> Result<Vec<u8>> {
        let process_id = self.main_process_id_or_err()?;
        let process = self
            .processes
            .get(&process_id)
            .ok_or_else(|| Error::domain("main process not yet tracked"))?;
        process.read_memory_unsafe(&mut self.kernel, address, len)
    }

    fn clear_cache(&mut self) {
        self.processes.clear();
        self.current = None;
        self.main_process_id = None;
    }

    fn dispatch(&mut self, event: &DebugEvent) -> Result<()> {
        match &event.kind {
            DebugEventKind::CreateProcess(info) => {
                let mut process = Process::new(info.process_handle, event.process_id, event.thread_id, *info);
                process.new_thread(Thread::new(info.thread_handle, event.thread_id, info.start_address, info.thread_local_base));
                self.processes.insert(event.process_id, process);
                let process = self.processes.get(&event.process_id).expect("just inserted");
                self.hooks.on_create_process(process, info);

                if self.attached {
                    let process = self.processes.get(&event.process_id).expect("present");
                    self.hooks.on_attach_process(process);
                } else {
                    let process = self
                        .processes
                        .get_mut(&event.process_id)
                        .expect("present");
                    process.set_software_breakpoint(&mut self.kernel, info.start_address, true)?;
                }
                Ok(())
            }
            DebugEventKind::ExitProcess(info) => {
                if let Some(process) = self.processes.get(&event.process_id) {
                    self.hooks.on_exit_process(process, info);
                }
                self.processes.remove(&event.process_id);
                if self.main_process_id == Some(event.process_id) {
                    self.main_process_exited = true;
                }
                Ok(())
            }
            DebugEventKind::CreateThread(info) => {
                let replay = self.config.replay_hardware_breakpoints_on_new_thread;
                let process = self
                    .processes
                    .get_mut(&event.process_id)
                    .ok_or_else(|| Error::domain("CreateThread for unknown process"))?;
                process.new_thread(Thread::new(info.thread_handle, event.thread_id, info.start_address, info.thread_local_base));
                if replay {
                    let thread = process.find_thread_mut(event.thread_id).expect("just inserted");
                    process.replay_hardware_breakpoints(&mut self.kernel, thread)?;
                }
                let process = self.processes.get(&event.process_id).expect("present");
                let thread = process.find_thread(event.thread_id).expect("just inserted");
                self.hooks.on_create_thread(thread, info);
                Ok(())
            }
            DebugEventKind::ExitThread(info) => {
                if let Some(process) = self.processes.get_mut(&event.process_id) {
                    process.remove_thread(event.thread_id);
                }
                self.hooks.on_exit_thread(event.thread_id, info);
                Ok(())
            }
            DebugEventKind::LoadDll(info) => {
                if let Some(process) = self.processes.get(&event.process_id) {
                    self.hooks.on_load_dll(process, info);
                }
                Ok(())
            }
            DebugEventKind::UnloadDll(info) => {
                if let Some(process) = self.processes.get(&event.process_id) {
                    self.hooks.on_unload_dll(process, info);
                }
                Ok(())
            }
            DebugEventKind::OutputDebugString(info) => {
                if let Some(process) = self.processes.get(&event.process_id) {
                    self.hooks.on_output_debug_string(process, info);
                }
                Ok(())
            }
            DebugEventKind::Rip(info) => {
                if let Some(process) = self.processes.get(&event.process_id) {
                    self.hooks.on_rip(process, info);
                }
                Ok(())
            }
            DebugEventKind::Unknown(code) => {
                self.hooks.on_unknown_event(*code);
                Ok(())
            }
            DebugEventKind::Exception(info) => self.dispatch_exception(event, info),
        }
    }

    fn dispatch_exception(&mut self, event: &DebugEvent, info: &crate::kernel::ExceptionInfo) -> Result<()> {
        if let Some(process) = self.processes.get(&event.process_id) {
            self.hooks.on_pre_exception(process, info.first_chance);
        }

        match info.code {
            ExceptionCode::Breakpoint => self.on_breakpoint_exception(event, info.address),
            ExceptionCode::SingleStep => self.on_single_step_exception(event),
            ExceptionCode::AccessViolation => {
                self.continue_status = ContinueStatus::ExceptionNotHandled;
                self.report_unhandled(event, 0x8000_0001);
                Ok(())
            }
            ExceptionCode::Other(code) => {
                self.continue_status = ContinueStatus::ExceptionNotHandled;
                self.report_unhandled(event, code);
                Ok(())
            }
        }
    }

    fn on_breakpoint_exception(&mut self, event: &DebugEvent, exception_address: u32) -> Result<()> {
        let process = self
            .processes
            .get_mut(&event.process_id)
            .ok_or_else(|| Error::domain("breakpoint exception for unknown process"))?;

        if !process.hit_system_breakpoint {
            process.hit_system_breakpoint = true;
            debug!("system breakpoint");
            self.continue_status = ContinueStatus::Continue;
            let process = self.processes.get(&event.process_id).expect("present");
            if let Some(thread) = process.find_thread(event.thread_id) {
                self.hooks.on_system_breakpoint(process, thread);
            }
            return Ok(());
        }

        // `ExceptionAddress` is the breakpoint's own address, unchanged;
        // `Eip` is the one past it where the `INT3` left execution.
        let Some(bp) = process.find_software_breakpoint(exception_address).copied() else {
            self.continue_status = ContinueStatus::ExceptionNotHandled;
            self.report_unhandled(event, 0x8000_0003);
            return Ok(());
        };
        let is_entry = bp.address == process.create_info.start_address;

        {
            let thread_handle = process
                .find_thread(event.thread_id)
                .ok_or_else(|| Error::domain("breakpoint on unknown thread"))?
                .handle;
            let mut registers = Registers::new(&mut self.kernel, thread_handle, ContextFlags::CONTROL)?;
            registers.set(RegisterIndex::Eip, bp.address);
        }

        process.delete_int3(&mut self.kernel, bp.address)?;

        if bp.single_shoot {
            process.delete_software_breakpoint(&mut self.kernel, bp.address)?;
        } else {
            let thread = process
                .find_thread_mut(event.thread_id)
                .ok_or_else(|| Error::domain("breakpoint on unknown thread"))?;
            thread.internal_step(
                &mut self.kernel,
                Box::new(move |thread| {
                    let _ = thread;
                }),
            )?;
        }

        let record = BreakpointRecord::Software(bp);
        process.execute_breakpoint_callback((BreakpointKind::Software, bp.address), &record);

        let process = self.processes.get(&event.process_id).expect("present");
        let thread = process.find_thread(event.thread_id).expect("present");
        self.hooks.on_breakpoint(process, thread, bp.address);
        if is_entry {
            self.hooks.on_entry_breakpoint(process, thread);
        }
        self.continue_status = ContinueStatus::Continue;
        Ok(())
    }

    fn on_single_step_exception(&mut self, event: &DebugEvent) -> Result<()> {
        let process = self
            .processes
            .get_mut(&event.process_id)
            .ok_or_else(|| Error::domain("single-step exception for unknown process"))?;
        let thread = process
            .find_thread_mut(event.thread_id)
            .ok_or_else(|| Error::domain("single-step on unknown thread"))?;

        // A thread may have both an internal step (re-arming a breakpoint)
        // and a user single step pending at once; run the internal branch
        // first, then fall through to the user branch in the same event.
        let was_internal_stepping = thread.is_internal_stepping();
        if was_internal_stepping {
            // Re-arm whatever this step carried us past: a software
            // breakpoint's `INT3`, or a hardware breakpoint's debug
            // register, or both.
            let ran = thread.execute_internal_step_callback();
            debug_assert!(ran, "internal step flag set with no callback queued");
            self.rearm_pending_software_breakpoints(event.process_id)?;
            self.rearm_pending_hardware_breakpoints(event.process_id, event.thread_id)?;
            self.continue_status = ContinueStatus::Continue;
        }

        let process = self.processes.get_mut(&event.process_id).expect("present");
        let thread = process
            .find_thread_mut(event.thread_id)
            .ok_or_else(|| Error::domain("single-step on unknown thread"))?;

        if thread.is_single_stepping() {
            thread.execute_single_step_callbacks();
            let process = self.processes.get(&event.process_id).expect("present");
            let thread = process.find_thread(event.thread_id).expect("present");
            self.hooks.on_step(process, thread);
            self.continue_status = ContinueStatus::Continue;
            return Ok(());
        }

        if was_internal_stepping {
            return Ok(());
        }

        // Otherwise this must be a hardware breakpoint reporting through
        // DR6's B0..B3 hit bits.
        let thread_handle = thread.handle;
        let hit_slot = {
            let registers = Registers::new(&mut self.kernel, thread_handle, ContextFlags::DEBUG_REGISTERS)?;
            [DebugStatusFlag::B0, DebugStatusFlag::B1, DebugStatusFlag::B2, DebugStatusFlag::B3]
                .into_iter()
                .position(|flag| registers.debug_status(flag))
        };

        let Some(slot_index) = hit_slot else {
            self.continue_status = ContinueStatus::ExceptionNotHandled;
            self.report_unhandled(event, 0x8000_0004);
            return Ok(());
        };

        let process = self.processes.get_mut(&event.process_id).expect("present");
        let bp = process.find_hardware_breakpoint_by_slot(slot_index as u8).copied();

        if let Some(bp) = bp {
            self.continue_status = ContinueStatus::Continue;

            let process = self.processes.get(&event.process_id).expect("present");
            let thread = process.find_thread(event.thread_id).expect("present");
            self.hooks.on_breakpoint(process, thread, bp.address);

            let process = self.processes.get_mut(&event.process_id).expect("present");
            let thread = process
                .find_thread_mut(event.thread_id)
                .ok_or_else(|| Error::domain("hardware breakpoint on unknown thread"))?;
            // Disable on this thread first, so the single step we're about
            // to take doesn't immediately re-trip it.
            thread.delete_hardware_breakpoint(&mut self.kernel, bp.slot)?;

            if bp.single_shoot {
                process.delete_hardware_breakpoint(&mut self.kernel, bp.address)?;
            } else {
                let thread = process
                    .find_thread_mut(event.thread_id)
                    .ok_or_else(|| Error::domain("hardware breakpoint on unknown thread"))?;
                thread.internal_step(&mut self.kernel, Box::new(move |thread| { let _ = thread; }))?;
            }

            let record = BreakpointRecord::Hardware(bp);
            process.execute_breakpoint_callback((BreakpointKind::Hardware, bp.address), &record);
        } else {
            self.continue_status = ContinueStatus::ExceptionNotHandled;
            self.report_unhandled(event, 0x8000_0004);
        }
        Ok(())
    }

    /// Reprogram every currently-armed hardware breakpoint onto the thread
    /// that just completed an internal step, undoing the disable
    /// `on_single_step_exception` applied before stepping over one.
    fn rearm_pending_hardware_breakpoints(&mut self, process_id: ProcessId, thread_id: ThreadId) -> Result<()> {
        let Some(process) = self.processes.get_mut(&process_id) else { return Ok(()) };
        let Some(mut thread) = process.remove_thread(thread_id) else { return Ok(()) };
        let result = process.replay_hardware_breakpoints(&mut self.kernel, &mut thread);
        process.new_thread(thread);
        result
    }

    /// Re-overwrite every software breakpoint's `INT3` after an internal
    /// step carried the thread past one. The breakpoint table holds at most
    /// one address per internal step, but the table itself tracks which
    /// bytes should currently read `INT3`, so this just re-syncs memory to
    /// match it for the address the step just passed.
    fn rearm_pending_software_breakpoints(&mut self, process_id: ProcessId) -> Result<()> {
        let Some(process) = self.processes.get(&process_id) else { return Ok(()) };
        let addresses: Vec<u32> = process.software_breakpoint_addresses().collect();
        let process = self.processes.get_mut(&process_id).expect("present");
        for address in addresses {
            if process
                .read_memory_unsafe(&mut self.kernel, address, 1)
                .map(|bytes| bytes[0] != crate::breakpoint::INT3)
                .unwrap_or(false)
            {
                process.set_int3_public(&mut self.kernel, address)?;
            }
        }
        Ok(())
    }

    fn report_unhandled(&mut self, event: &DebugEvent, code: u32) {
        if let Some(process) = self.processes.get(&event.process_id) {
            if let Some(thread) = process.find_thread(event.thread_id) {
                self.hooks.on_unhandled_exception(process, thread, code);
                return;
            }
        }
        warn!(code, "unhandled exception for an untracked process/thread");
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::breakpoint::{HardwareBreakpointSize, HardwareBreakpointType};
    use crate::kernel::fake::FakeKernel;
    use crate::kernel::{
        CreateProcessInfo, CreateThreadInfo, CpuContext, DebugEvent, DebugEventKind, ExceptionCode,
        ExceptionInfo, ExitProcessInfo, Handle, ProcessCreationRequest,
    };

    #[derive(Default)]
    struct RecordingHooks {
        entry_hits: u32,
        breakpoint_hits: Vec<u32>,
        steps: u32,
    }

    impl DebugEventHooks for RecordingHooks {
        fn on_entry_breakpoint(&mut self, _process: &Process, _thread: &Thread) {
            self.entry_hits += 1;
        }
        fn on_breakpoint(&mut self, _process: &Process, _thread: &Thread, address: u32) {
            self.breakpoint_hits.push(address);
        }
        fn on_step(&mut self, _process: &Process, _thread: &Thread) {
            self.steps += 1;
        }
    }

    fn spawn() -> (Debugger<FakeKernel, RecordingHooks>, u32, u32, u32) {
        let kernel = FakeKernel::new();
        let mut debugger = Debugger::new(kernel, RecordingHooks::default(), DebuggerConfig::default());
        let process_id = debugger
            .create(ProcessCreationRequest {
                file_path: "C:\\target.exe",
                command_line: "target.exe",
                current_directory: None,
                start_suspended: false,
                extra_flags: 0,
            })
            .unwrap();

        let thread_handle = Handle(2);
        debugger.kernel.seed_context(process_id, thread_handle, CpuContext::default());
        let process_handle = Handle(1);
        let entry = 0x0040_1000;

        debugger.kernel.push_event(DebugEvent {
            process_id,
            thread_id: 7,
            kind: DebugEventKind::CreateProcess(CreateProcessInfo {
                process_handle,
                thread_handle,
                file_handle: None,
                base_of_image: 0x0040_0000,
                start_address: entry,
                thread_local_base: 0,
            }),
        });

        (debugger, process_id, 7, entry)
    }

    #[test]
    fn first_breakpoint_is_system_not_entry() {
        let (mut debugger, process_id, thread_id, entry) = spawn();
        debugger.kernel.push_event(DebugEvent {
            process_id,
            thread_id,
            kind: DebugEventKind::Exception(ExceptionInfo {
                code: ExceptionCode::Breakpoint,
                address: entry,
                first_chance: true,
            }),
        });
        debugger.kernel.push_event(DebugEvent {
            process_id,
            thread_id,
            kind: DebugEventKind::ExitProcess(ExitProcessInfo { exit_code: 0 }),
        });
        debugger.start().unwrap();
        assert_eq!(debugger.hooks().entry_hits, 0);
    }
}
