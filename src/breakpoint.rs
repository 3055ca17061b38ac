//! Breakpoint data types shared by [`crate::process::Process`] and
//! [`crate::thread::Thread`].

use crate::kernel::Address;

/// `INT3`, the x86 one-byte breakpoint opcode a software breakpoint
/// overwrites its target byte with.
pub const INT3: u8 = 0xCC;

/// How many hardware breakpoint slots (`DR0..DR3`) a thread has.
pub const HARDWARE_SLOT_COUNT: usize = 4;

/// Which mechanism a breakpoint uses.
///
/// Carried as part of [`BreakpointKey`] so the pending-callback table can
/// be shared across all three kinds even though `Memory` has no working
/// implementation yet (see [`crate::process::Process::execute_breakpoint_callback`]).
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum BreakpointKind {
    Software,
    Hardware,
    /// Reserved for a future memory-watch breakpoint. Carried through the
    /// type system so call sites are forced to acknowledge it, but nothing
    /// currently arms or fires one.
    Memory,
}

/// Which hardware breakpoint register (`DR0..DR3`) a [`HardwareBreakpoint`]
/// occupies.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum HardwareBreakpointSlot {
    Dr0 = 0,
    Dr1 = 1,
    Dr2 = 2,
    Dr3 = 3,
}

impl HardwareBreakpointSlot {
    pub const ALL: [HardwareBreakpointSlot; HARDWARE_SLOT_COUNT] = [
        HardwareBreakpointSlot::Dr0,
        HardwareBreakpointSlot::Dr1,
        HardwareBreakpointSlot::Dr2,
        HardwareBreakpointSlot::Dr3,
    ];

    pub fn index(self) -> u8 {
        self as u8
    }
}

/// The `RWn` access type a hardware breakpoint traps on.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum HardwareBreakpointType {
    Execute = 0b00,
    Write = 0b01,
    ReadWrite = 0b11,
}

/// The `LENn` operand size a hardware breakpoint watches.
///
/// An execute breakpoint must use `Byte` — the CPU's debug hardware
/// requires it, since an instruction's length is not known up front.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum HardwareBreakpointSize {
    Byte = 0b00,
    Word = 0b01,
    Dword = 0b11,
}

/// A software breakpoint: the original byte at `address`, saved so the
/// `INT3` can be lifted and the instruction stepped over.
#[derive(Debug, Clone, Copy)]
pub struct SoftwareBreakpoint {
    pub address: Address,
    pub original_byte: u8,
    /// Deleted after its first hit rather than re-armed.
    pub single_shoot: bool,
}

/// A hardware breakpoint programmed into one of a thread's four debug
/// address registers.
#[derive(Debug, Clone, Copy)]
pub struct HardwareBreakpoint {
    pub address: Address,
    pub slot: HardwareBreakpointSlot,
    pub access: HardwareBreakpointType,
    pub size: HardwareBreakpointSize,
    pub single_shoot: bool,
}

/// A key into the pending-callback table: one callback may be registered
/// per `(kind, address)` pair, fired at most once per arming.
pub type BreakpointKey = (BreakpointKind, Address);

/// A snapshot of the breakpoint record that fired, handed to its pending
/// callback so the caller can see which one it was.
#[derive(Debug, Clone, Copy)]
pub enum BreakpointRecord {
    Software(SoftwareBreakpoint),
    Hardware(HardwareBreakpoint),
}

/// A callback run when its breakpoint fires. Boxed so that
/// [`crate::process::Process`] can hold a heterogeneous table of them.
pub type BreakpointCallback = Box<dyn FnMut(&BreakpointRecord) + Send>;
