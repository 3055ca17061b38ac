//! An in-memory [`DebugKernel`] for tests.
//!
//! Mirrors the teacher's `FakeProbe`: a scriptable double that lets the
//! rest of the crate (and downstream embedders, via the `test` feature) be
//! exercised without a live Windows target. A [`FakeKernel`] owns one fake
//! address space per process id and a FIFO queue of events to hand back
//! from [`wait_for_debug_event`](DebugKernel::wait_for_debug_event).

use std::collections::{HashMap, VecDeque};
use std::time::Duration;

use crate::error::{Error, Result};
use crate::kernel::{
    Address, ContextFlags, ContinueStatus, CpuContext, CreatedProcess, DebugEvent, DebugKernel,
    Handle, ProcessCreationRequest, ProcessId, ThreadId,
};

/// One fake process's address space and per-thread register file.
#[derive(Debug, Default)]
struct FakeProcess {
    memory: HashMap<Address, u8>,
    contexts: HashMap<isize, CpuContext>,
}

/// One call recorded for assertions in tests.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Call {
    GetThreadContext(Handle),
    SetThreadContext(Handle),
    ContinueDebugEvent(ProcessId, ThreadId, bool),
}

/// The in-memory stand-in for a live Windows debug target.
#[derive(Debug, Default)]
pub struct FakeKernel {
    next_handle: isize,
    processes: HashMap<ProcessId, FakeProcess>,
    events: VecDeque<DebugEvent>,
    pub calls: Vec<Call>,
    next_process_id: ProcessId,
    next_thread_id: ThreadId,
}

impl FakeKernel {
    pub fn new() -> Self {
        Self { next_handle: 1, next_process_id: 1, next_thread_id: 1, ..Default::default() }
    }

    fn fresh_handle(&mut self) -> Handle {
        let handle = Handle(self.next_handle);
        self.next_handle += 1;
        handle
    }

    /// Register a fake process with the given id, so that later calls
    /// addressing it by id (e.g. `debug_active_process`) succeed.
    pub fn add_process(&mut self, process_id: ProcessId) {
        self.processes.entry(process_id).or_default();
    }

    /// Seed `process_id`'s address space at `address` with `data`.
    pub fn seed_memory(&mut self, process_id: ProcessId, address: Address, data: &[u8]) {
        let process = self.processes.entry(process_id).or_default();
        for (offset, byte) in data.iter().enumerate() {
            process.memory.insert(address + offset as Address, *byte);
        }
    }

    /// Seed `thread`'s register file, keyed by the opaque handle value.
    pub fn seed_context(&mut self, process_id: ProcessId, thread: Handle, context: CpuContext) {
        let process = self.processes.entry(process_id).or_default();
        process.contexts.insert(thread.0, context);
    }

    /// Push an event onto the queue `wait_for_debug_event` drains from.
    pub fn push_event(&mut self, event: DebugEvent) {
        self.events.push_back(event);
    }

    fn process_mut(&mut self, process_id: ProcessId) -> Result<&mut FakeProcess> {
        self.processes
            .get_mut(&process_id)
            .ok_or_else(|| Error::domain(format!("fake kernel has no process {process_id}")))
    }

    fn context_of(&self, thread: Handle) -> Option<&CpuContext> {
        self.processes.values().find_map(|process| process.contexts.get(&thread.0))
    }

    fn context_of_mut(&mut self, thread: Handle) -> Option<&mut CpuContext> {
        self.processes.values_mut().find_map(|process| process.contexts.get_mut(&thread.0))
    }
}

impl DebugKernel for FakeKernel {
    fn create_process(&mut self, _request: ProcessCreationRequest<'_>) -> Result<CreatedProcess> {
        let process_id = self.next_process_id;
        self.next_process_id += 1;
        let thread_id = self.next_thread_id;
        self.next_thread_id += 1;
        let process_handle = self.fresh_handle();
        let thread_handle = self.fresh_handle();
        self.processes.entry(process_id).or_default();
        self.process_mut(process_id)?
            .contexts
            .insert(thread_handle.0, CpuContext::default());
        Ok(CreatedProcess { process_id, thread_id, process_handle, thread_handle })
    }

    fn debug_active_process(&mut self, process_id: ProcessId) -> Result<()> {
        self.process_mut(process_id).map(|_| ())
    }

    fn debug_active_process_stop(&mut self, process_id: ProcessId) -> Result<()> {
        self.process_mut(process_id).map(|_| ())
    }

    fn wait_for_debug_event(&mut self, _timeout: Option<Duration>) -> Result<Option<DebugEvent>> {
        Ok(self.events.pop_front())
    }

    fn continue_debug_event(
        &mut self,
        process_id: ProcessId,
        thread_id: ThreadId,
        status: ContinueStatus,
    ) -> Result<()> {
        self.calls.push(Call::ContinueDebugEvent(
            process_id,
            thread_id,
            matches!(status, ContinueStatus::Continue),
        ));
        Ok(())
    }

    fn get_thread_context(&mut self, thread: Handle, _flags: ContextFlags) -> Result<CpuContext> {
        self.calls.push(Call::GetThreadContext(thread));
        self.context_of(thread)
            .copied()
            .ok_or_else(|| Error::domain(format!("fake kernel has no context for {thread:?}")))
    }

    fn set_thread_context(&mut self, thread: Handle, context: &CpuContext) -> Result<()> {
        self.calls.push(Call::SetThreadContext(thread));
        let slot = self
            .context_of_mut(thread)
            .ok_or_else(|| Error::domain(format!("fake kernel has no context for {thread:?}")))?;
        *slot = *context;
        Ok(())
    }

    fn read_process_memory(
        &mut self,
        process: Handle,
        address: Address,
        len: usize,
    ) -> Result<Vec<u8>> {
        let process_id = self.process_id_of(process)?;
        let process = self.process_mut(process_id)?;
        Ok((0..len as Address)
            .map(|offset| *process.memory.get(&(address + offset)).unwrap_or(&0))
            .collect())
    }

    fn write_process_memory(
        &mut self,
        process: Handle,
        address: Address,
        data: &[u8],
    ) -> Result<()> {
        let process_id = self.process_id_of(process)?;
        let process = self.process_mut(process_id)?;
        for (offset, byte) in data.iter().enumerate() {
            process.memory.insert(address + offset as Address, *byte);
        }
        Ok(())
    }

    fn suspend_thread(&mut self, _thread: Handle) -> Result<()> {
        Ok(())
    }

    fn resume_thread(&mut self, _thread: Handle) -> Result<()> {
        Ok(())
    }

    fn terminate_process(&mut self, _process: Handle, _exit_code: u32) -> Result<()> {
        Ok(())
    }

    fn close_handle(&mut self, _handle: Handle) -> Result<()> {
        Ok(())
    }
}

impl FakeKernel {
    /// Every fake process handle currently maps 1:1 with a process id in
    /// registration order; real Win32 handles carry no such guarantee; this
    /// helper exists purely to let `read_process_memory`/`write_process_memory`
    /// (which only receive a process *handle*) find the right address space.
    fn process_id_of(&self, _process: Handle) -> Result<ProcessId> {
        // The fake only ever tracks one process per test in practice; when
        // more are registered, memory ops target the first one found.
        self.processes
            .keys()
            .next()
            .copied()
            .ok_or_else(|| Error::domain("fake kernel has no processes registered"))
    }
}
