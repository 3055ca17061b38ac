//! A debugged thread: its handle, single-step bookkeeping, and the
//! per-thread hardware breakpoint registers.

use std::collections::VecDeque;

use crate::breakpoint::{HardwareBreakpointSize, HardwareBreakpointSlot, HardwareBreakpointType};
use crate::error::Result;
use crate::kernel::{Address, ContextFlags, DebugKernel, Handle, ThreadId};
use crate::registers::{Flag, RegisterIndex, Registers};

/// A callback run once a requested single-step completes.
pub type StepCallback = Box<dyn FnOnce(&mut Thread) + Send>;

/// One thread inside a debugged process.
///
/// Single-stepping is split into two independent notions, matching the
/// original design: a *user* step (`step_into`), queued FIFO and run in
/// the order requested, and an *internal* step, the re-arming mechanism a
/// software breakpoint uses to restore its `INT3` one instruction after
/// it's lifted. Both produce the same `STATUS_SINGLE_STEP` exception; the
/// dispatcher tells them apart by checking `internal_stepping` first.
pub struct Thread {
    pub handle: Handle,
    pub id: ThreadId,
    pub start_address: Address,
    pub thread_local_base: Address,
    single_stepping: bool,
    internal_stepping: bool,
    single_step_callbacks: VecDeque<StepCallback>,
    internal_step_callback: Option<StepCallback>,
}

impl Thread {
    pub fn new(handle: Handle, id: ThreadId, start_address: Address, thread_local_base: Address) -> Self {
        Self {
            handle,
            id,
            start_address,
            thread_local_base,
            single_stepping: false,
            internal_stepping: false,
            single_step_callbacks: VecDeque::new(),
            internal_step_callback: None,
        }
    }

    pub fn is_single_stepping(&self) -> bool {
        self.single_stepping
    }

    pub fn is_internal_stepping(&self) -> bool {
        self.internal_stepping
    }

    pub fn suspend<K: DebugKernel>(&self, kernel: &mut K) -> Result<()> {
        kernel.suspend_thread(self.handle)
    }

    pub fn resume<K: DebugKernel>(&self, kernel: &mut K) -> Result<()> {
        kernel.resume_thread(self.handle)
    }

    /// Arm the trap flag so the next instruction raises `STATUS_SINGLE_STEP`,
    /// with no callback.
    pub fn step_into<K: DebugKernel>(&mut self, kernel: &mut K) -> Result<()> {
        self.arm_trap_flag(kernel)?;
        self.single_stepping = true;
        Ok(())
    }

    /// Arm the trap flag and queue `callback`, run in FIFO order against
    /// every `step_into_with` call once each single step lands.
    pub fn step_into_with<K: DebugKernel>(&mut self, kernel: &mut K, callback: StepCallback) -> Result<()> {
        self.arm_trap_flag(kernel)?;
        self.single_stepping = true;
        self.single_step_callbacks.push_back(callback);
        Ok(())
    }

    /// Arm the trap flag for an internal re-arm step (lifting a software
    /// breakpoint's `INT3`, stepping over it, then restoring it).
    pub fn internal_step<K: DebugKernel>(&mut self, kernel: &mut K, callback: StepCallback) -> Result<()> {
        self.arm_trap_flag(kernel)?;
        self.internal_stepping = true;
        self.internal_step_callback = Some(callback);
        Ok(())
    }

    fn arm_trap_flag<K: DebugKernel>(&mut self, kernel: &mut K) -> Result<()> {
        let mut registers = Registers::new(kernel, self.handle, ContextFlags::CONTROL)?;
        registers.set_flag(Flag::Trap, true);
        Ok(())
    }

    /// Run and clear the internal-step callback, if one is pending.
    /// Returns whether one was run, so the dispatcher can tell an internal
    /// re-arm step apart from a user step.
    pub fn execute_internal_step_callback(&mut self) -> bool {
        self.internal_stepping = false;
        match self.internal_step_callback.take() {
            Some(callback) => {
                callback(self);
                true
            }
            None => false,
        }
    }

    /// Run and clear every queued user single-step callback, oldest first.
    pub fn execute_single_step_callbacks(&mut self) {
        self.single_stepping = false;
        while let Some(callback) = self.single_step_callbacks.pop_front() {
            callback(self);
        }
    }

    /// Program hardware breakpoint slot `slot` to watch `address` for
    /// `access` accesses of `size`.
    pub fn set_hardware_breakpoint<K: DebugKernel>(
        &mut self,
        kernel: &mut K,
        slot: HardwareBreakpointSlot,
        address: Address,
        access: HardwareBreakpointType,
        size: HardwareBreakpointSize,
    ) -> Result<()> {
        let mut registers = Registers::new(kernel, self.handle, ContextFlags::DEBUG_REGISTERS)?;
        let index = slot.index();
        registers.set(register_for_slot(slot), address);
        registers.set_hardware_slot_rw(index, access as u8);
        registers.set_hardware_slot_len(index, size as u8);
        registers.set_hardware_slot_enabled(index, true);
        Ok(())
    }

    /// Clear hardware breakpoint slot `slot`.
    pub fn delete_hardware_breakpoint<K: DebugKernel>(
        &mut self,
        kernel: &mut K,
        slot: HardwareBreakpointSlot,
    ) -> Result<()> {
        let mut registers = Registers::new(kernel, self.handle, ContextFlags::DEBUG_REGISTERS)?;
        let index = slot.index();
        registers.set_hardware_slot_enabled(index, false);
        registers.set(register_for_slot(slot), 0);
        Ok(())
    }
}

fn register_for_slot(slot: HardwareBreakpointSlot) -> RegisterIndex {
    match slot {
        HardwareBreakpointSlot::Dr0 => RegisterIndex::Dr0,
        HardwareBreakpointSlot::Dr1 => RegisterIndex::Dr1,
        HardwareBreakpointSlot::Dr2 => RegisterIndex::Dr2,
        HardwareBreakpointSlot::Dr3 => RegisterIndex::Dr3,
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::kernel::fake::FakeKernel;
    use crate::kernel::{CpuContext, DebugKernel};

    fn thread_with_fake() -> (FakeKernel, Thread) {
        let mut kernel = FakeKernel::new();
        kernel.add_process(1);
        let handle = Handle(7);
        kernel.seed_context(1, handle, CpuContext::default());
        (kernel, Thread::new(handle, 7, 0x1000, 0x2000))
    }

    #[test]
    fn step_into_sets_trap_flag() {
        let (mut kernel, mut thread) = thread_with_fake();
        thread.step_into(&mut kernel).unwrap();
        assert!(thread.is_single_stepping());
        let context = kernel.get_thread_context(thread.handle, ContextFlags::CONTROL).unwrap();
        assert_ne!(context.eflags & (1 << 8), 0);
    }

    #[test]
    fn single_step_callbacks_run_fifo() {
        let (mut kernel, mut thread) = thread_with_fake();
        let order = std::sync::Arc::new(std::sync::Mutex::new(Vec::new()));
        for n in 0..3 {
            let order = order.clone();
            thread
                .step_into_with(&mut kernel, Box::new(move |_| order.lock().unwrap().push(n)))
                .unwrap();
        }
        thread.execute_single_step_callbacks();
        assert_eq!(*order.lock().unwrap(), vec![0, 1, 2]);
        assert!(!thread.is_single_stepping());
    }

    #[test]
    fn internal_step_is_distinct_from_user_step() {
        let (mut kernel, mut thread) = thread_with_fake();
        thread.internal_step(&mut kernel, Box::new(|_| {})).unwrap();
        assert!(thread.is_internal_stepping());
        assert!(!thread.is_single_stepping());
        assert!(thread.execute_internal_step_callback());
        assert!(!thread.is_internal_stepping());
    }

    #[test]
    fn hardware_breakpoint_round_trips() {
        let (mut kernel, mut thread) = thread_with_fake();
        thread
            .set_hardware_breakpoint(
                &mut kernel,
                HardwareBreakpointSlot::Dr1,
                0x4000,
                HardwareBreakpointType::Write,
                HardwareBreakpointSize::Dword,
            )
            .unwrap();
        let context = kernel.get_thread_context(thread.handle, ContextFlags::DEBUG_REGISTERS).unwrap();
        assert_eq!(context.dr1, 0x4000);
        assert_ne!(context.dr7 & (1 << 2), 0);

        thread.delete_hardware_breakpoint(&mut kernel, HardwareBreakpointSlot::Dr1).unwrap();
        let context = kernel.get_thread_context(thread.handle, ContextFlags::DEBUG_REGISTERS).unwrap();
        assert_eq!(context.dr7 & (1 << 2), 0);
        assert_eq!(context.dr1, 0);
    }
}
