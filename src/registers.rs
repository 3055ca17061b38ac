//! Scoped register access: [`Registers`] snapshots a thread's `CONTEXT` on
//! construction and writes it back on drop, but only if something actually
//! changed.

use tracing::warn;

use crate::kernel::{Address, ContextFlags, CpuContext, DebugKernel, Handle};

/// A general-purpose or control register addressable through [`Registers`].
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum RegisterIndex {
    Eax,
    Ebx,
    Ecx,
    Edx,
    Esp,
    Ebp,
    Esi,
    Edi,
    Eip,
    EFlags,
    Dr0,
    Dr1,
    Dr2,
    Dr3,
    Dr6,
    Dr7,
}

/// One flag bit within `EFLAGS`.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Flag {
    Carry = 0,
    Parity = 2,
    Auxiliary = 4,
    Zero = 6,
    Sign = 7,
    Trap = 8,
    Interrupt = 9,
    Direction = 10,
    Overflow = 11,
}

/// One hit-status bit within `DR6`.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum DebugStatusFlag {
    B0 = 0,
    B1 = 1,
    B2 = 2,
    B3 = 3,
    /// Set when a debug register access conflicted with `GD` in `DR7`.
    BreakpointDetect = 13,
    /// Set on single-step.
    SingleStep = 14,
    /// Set on a task switch.
    TaskSwitch = 15,
}

/// A scoped, read-modify-write view over one thread's `CONTEXT`.
///
/// Construction fetches the subset of the context selected by
/// `context_flags` via [`DebugKernel::get_thread_context`]. Every accessor
/// mutates an in-memory copy; [`Registers`] never calls
/// `set_thread_context` itself — callers flush explicitly via
/// [`Registers::flush`] (typically once per scope, mirroring the original's
/// destructor-time `memcmp`-gated write-back, since Rust has no fallible
/// destructor to report a flush failure through).
pub struct Registers<'a, K: DebugKernel> {
    kernel: &'a mut K,
    thread: Handle,
    context: CpuContext,
    original: CpuContext,
}

impl<'a, K: DebugKernel> Registers<'a, K> {
    /// Fetch `thread`'s context, selecting the groups in `flags`.
    pub fn new(kernel: &'a mut K, thread: Handle, flags: ContextFlags) -> crate::error::Result<Self> {
        let context = kernel.get_thread_context(thread, flags)?;
        Ok(Self { kernel, thread, context, original: context })
    }

    pub fn get(&self, index: RegisterIndex) -> u32 {
        match index {
            RegisterIndex::Eax => self.context.eax,
            RegisterIndex::Ebx => self.context.ebx,
            RegisterIndex::Ecx => self.context.ecx,
            RegisterIndex::Edx => self.context.edx,
            RegisterIndex::Esp => self.context.esp,
            RegisterIndex::Ebp => self.context.ebp,
            RegisterIndex::Esi => self.context.esi,
            RegisterIndex::Edi => self.context.edi,
            RegisterIndex::Eip => self.context.eip,
            RegisterIndex::EFlags => self.context.eflags,
            RegisterIndex::Dr0 => self.context.dr0,
            RegisterIndex::Dr1 => self.context.dr1,
            RegisterIndex::Dr2 => self.context.dr2,
            RegisterIndex::Dr3 => self.context.dr3,
            RegisterIndex::Dr6 => self.context.dr6,
            RegisterIndex::Dr7 => self.context.dr7,
        }
    }

    pub fn set(&mut self, index: RegisterIndex, value: u32) {
        let field = match index {
            RegisterIndex::Eax => &mut self.context.eax,
            RegisterIndex::Ebx => &mut self.context.ebx,
            RegisterIndex::Ecx => &mut self.context.ecx,
            RegisterIndex::Edx => &mut self.context.edx,
            RegisterIndex::Esp => &mut self.context.esp,
            RegisterIndex::Ebp => &mut self.context.ebp,
            RegisterIndex::Esi => &mut self.context.esi,
            RegisterIndex::Edi => &mut self.context.edi,
            RegisterIndex::Eip => &mut self.context.eip,
            RegisterIndex::EFlags => &mut self.context.eflags,
            RegisterIndex::Dr0 => &mut self.context.dr0,
            RegisterIndex::Dr1 => &mut self.context.dr1,
            RegisterIndex::Dr2 => &mut self.context.dr2,
            RegisterIndex::Dr3 => &mut self.context.dr3,
            RegisterIndex::Dr6 => &mut self.context.dr6,
            RegisterIndex::Dr7 => &mut self.context.dr7,
        };
        *field = value;
    }

    pub fn flag(&self, flag: Flag) -> bool {
        self.context.eflags & (1 << flag as u32) != 0
    }

    pub fn set_flag(&mut self, flag: Flag, value: bool) {
        let bit = 1u32 << flag as u32;
        if value {
            self.context.eflags |= bit;
        } else {
            self.context.eflags &= !bit;
        }
    }

    pub fn debug_status(&self, flag: DebugStatusFlag) -> bool {
        self.context.dr6 & (1 << flag as u32) != 0
    }

    pub fn set_debug_status(&mut self, flag: DebugStatusFlag, value: bool) {
        let bit = 1u32 << flag as u32;
        if value {
            self.context.dr6 |= bit;
        } else {
            self.context.dr6 &= !bit;
        }
    }

    /// Clear every hit-status bit in `DR6`, preserving the unexposed
    /// `BD`/`BS`/`BT` bits as zero too — this runs once per debug-event
    /// iteration, after the callbacks for that event have run.
    pub fn reset_debug_status(&mut self) {
        self.context.dr6 = 0;
    }

    /// Whether local breakpoint slot `slot` (0..=3) is enabled in `DR7`.
    pub fn hardware_slot_enabled(&self, slot: u8) -> bool {
        debug_assert!(slot < 4);
        self.context.dr7 & (1 << (slot * 2)) != 0
    }

    pub fn set_hardware_slot_enabled(&mut self, slot: u8, enabled: bool) {
        debug_assert!(slot < 4);
        let bit = 1u32 << (slot * 2);
        if enabled {
            self.context.dr7 |= bit;
        } else {
            self.context.dr7 &= !bit;
        }
    }

    /// The 2-bit `RWn` access-type field for `slot` (0..=3).
    pub fn hardware_slot_rw(&self, slot: u8) -> u8 {
        debug_assert!(slot < 4);
        let shift = 16 + slot * 4;
        ((self.context.dr7 >> shift) & 0b11) as u8
    }

    /// Set the 2-bit `RWn` access-type field for `slot`. `value` must fit
    /// in 2 bits.
    pub fn set_hardware_slot_rw(&mut self, slot: u8, value: u8) {
        debug_assert!(slot < 4);
        debug_assert!(value <= 0b11);
        let shift = 16 + slot * 4;
        self.context.dr7 &= !(0b11 << shift);
        self.context.dr7 |= (value as u32 & 0b11) << shift;
    }

    /// The 2-bit `LENn` size field for `slot` (0..=3).
    pub fn hardware_slot_len(&self, slot: u8) -> u8 {
        debug_assert!(slot < 4);
        let shift = 18 + slot * 4;
        ((self.context.dr7 >> shift) & 0b11) as u8
    }

    /// Set the 2-bit `LENn` size field for `slot`. `value` must fit in 2
    /// bits.
    pub fn set_hardware_slot_len(&mut self, slot: u8, value: u8) {
        debug_assert!(slot < 4);
        debug_assert!(value <= 0b11);
        let shift = 18 + slot * 4;
        self.context.dr7 &= !(0b11 << shift);
        self.context.dr7 |= (value as u32 & 0b11) << shift;
    }

    /// The address register for hardware breakpoint `slot`.
    pub fn hardware_address(&self, slot: u8) -> Address {
        match slot {
            0 => self.context.dr0,
            1 => self.context.dr1,
            2 => self.context.dr2,
            3 => self.context.dr3,
            _ => unreachable!("hardware breakpoint slot out of range: {slot}"),
        }
    }

    pub fn set_hardware_address(&mut self, slot: u8, address: Address) {
        match slot {
            0 => self.context.dr0 = address,
            1 => self.context.dr1 = address,
            2 => self.context.dr2 = address,
            3 => self.context.dr3 = address,
            _ => unreachable!("hardware breakpoint slot out of range: {slot}"),
        }
    }

    /// Write the context back to the thread if and only if it differs from
    /// the snapshot taken at construction. A write failure is logged and
    /// swallowed rather than propagated, so that a register flush at the
    /// tail of the event loop can never itself fault the loop.
    pub fn flush(&mut self) {
        if self.context == self.original {
            return;
        }
        if let Err(error) = self.kernel.set_thread_context(self.thread, &self.context) {
            warn!(thread = ?self.thread, %error, "failed to write back thread context");
            return;
        }
        self.original = self.context;
    }
}

impl<K: DebugKernel> Drop for Registers<'_, K> {
    fn drop(&mut self) {
        self.flush();
    }
}
