//! The boundary to the host kernel debug API.
//!
//! Everything in this module is plain data plus one trait,
//! [`DebugKernel`]. The rest of the crate never calls a Win32 function
//! directly; it goes through a `DebugKernel` so that the event loop,
//! breakpoint engine, and register controller can run against
//! [`fake::FakeKernel`] in tests and against [`windows::WindowsKernel`] on a
//! real target.

use std::time::Duration;

use bitflags::bitflags;

use crate::error::Result;

pub mod fake;
#[cfg(target_os = "windows")]
pub mod windows;

/// A 32-bit address in the target's address space.
pub type Address = u32;

/// The OS process id assigned by the kernel.
pub type ProcessId = u32;

/// The OS thread id assigned by the kernel.
pub type ThreadId = u32;

/// An opaque kernel object handle (process, thread, or file).
///
/// Wraps the raw bit pattern of a Win32 `HANDLE` so that handles can be
/// stored, compared, and logged without linking the non-Windows build
/// against `windows`.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct Handle(pub isize);

impl Handle {
    /// The null handle, equivalent to `HANDLE(0)` / `INVALID_HANDLE_VALUE`
    /// is deliberately *not* this — callers that need to distinguish the
    /// two continue to do so explicitly.
    pub const NULL: Handle = Handle(0);

    /// Whether this handle is the null handle.
    pub fn is_null(self) -> bool {
        self.0 == 0
    }
}

bitflags! {
    /// Which parts of a thread's CPU context to fetch or store.
    ///
    /// Mirrors the `CONTEXT_*` flag groups from the Windows debug API; kept
    /// as a bitflags type rather than a raw `u32` so that a [`Registers`]
    /// snapshot's caller-chosen mask is self-documenting.
    ///
    /// [`Registers`]: crate::registers::Registers
    #[derive(Debug, Clone, Copy, PartialEq, Eq)]
    pub struct ContextFlags: u32 {
        /// `EIP`, `ESP`, `EBP`, `EFLAGS`, and the segment selectors.
        const CONTROL = 0b0000_0001;
        /// `EAX`, `EBX`, `ECX`, `EDX`, `ESI`, `EDI`.
        const INTEGER = 0b0000_0010;
        /// Segment registers (`CS`, `DS`, `ES`, `FS`, `GS`, `SS`).
        const SEGMENTS = 0b0000_0100;
        /// The floating-point / x87 state.
        const FLOATING_POINT = 0b0000_1000;
        /// `DR0..DR3`, `DR6`, `DR7`.
        const DEBUG_REGISTERS = 0b0001_0000;
        /// CPU-specific extended registers.
        const EXTENDED_REGISTERS = 0b0010_0000;
        /// Every group above.
        const ALL = Self::CONTROL.bits()
            | Self::INTEGER.bits()
            | Self::SEGMENTS.bits()
            | Self::FLOATING_POINT.bits()
            | Self::DEBUG_REGISTERS.bits()
            | Self::EXTENDED_REGISTERS.bits();
    }
}

/// A 32-bit x86 CPU context, the fields this crate cares about.
///
/// This is the crate's own representation, not `windows::CONTEXT` —
/// [`kernel::windows::WindowsKernel`](windows::WindowsKernel) converts to
/// and from the real struct at the boundary. Kept field-for-field so the
/// conversion is a straight copy.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub struct CpuContext {
    pub context_flags: u32,
    pub eax: u32,
    pub ebx: u32,
    pub ecx: u32,
    pub edx: u32,
    pub esp: u32,
    pub ebp: u32,
    pub esi: u32,
    pub edi: u32,
    pub eip: u32,
    pub eflags: u32,
    pub dr0: u32,
    pub dr1: u32,
    pub dr2: u32,
    pub dr3: u32,
    pub dr6: u32,
    pub dr7: u32,
}

/// The outbound disposition of a debug event, passed to
/// `ContinueDebugEvent`.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ContinueStatus {
    /// `DBG_CONTINUE` — the exception was handled.
    Continue,
    /// `DBG_EXCEPTION_NOT_HANDLED` — let the target's own handler see it.
    ExceptionNotHandled,
}

/// A classified exception code, narrowed to the subset the core dispatches
/// on (`STATUS_BREAKPOINT`, `STATUS_SINGLE_STEP`, `STATUS_ACCESS_VIOLATION`);
/// anything else is preserved verbatim for the unhandled-exception hook.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ExceptionCode {
    Breakpoint,
    SingleStep,
    AccessViolation,
    Other(u32),
}

#[derive(Debug, Clone, Copy)]
pub struct ExceptionInfo {
    pub code: ExceptionCode,
    pub address: Address,
    pub first_chance: bool,
}

#[derive(Debug, Clone, Copy)]
pub struct CreateProcessInfo {
    pub process_handle: Handle,
    pub thread_handle: Handle,
    pub file_handle: Option<Handle>,
    pub base_of_image: Address,
    pub start_address: Address,
    pub thread_local_base: Address,
}

#[derive(Debug, Clone, Copy)]
pub struct ExitProcessInfo {
    pub exit_code: u32,
}

#[derive(Debug, Clone, Copy)]
pub struct CreateThreadInfo {
    pub thread_handle: Handle,
    pub start_address: Address,
    pub thread_local_base: Address,
}

#[derive(Debug, Clone, Copy)]
pub struct ExitThreadInfo {
    pub exit_code: u32,
}

#[derive(Debug, Clone, Copy)]
pub struct LoadDllInfo {
    pub file_handle: Option<Handle>,
    pub base_of_dll: Address,
}

#[derive(Debug, Clone, Copy)]
pub struct UnloadDllInfo {
    pub base_of_dll: Address,
}

#[derive(Debug, Clone, Copy)]
pub struct OutputDebugStringInfo {
    pub address: Address,
    pub length: u16,
    pub unicode: bool,
}

#[derive(Debug, Clone, Copy)]
pub struct RipInfo {
    pub error: u32,
    pub kind: u32,
}

/// The typed payload of one debug event, demultiplexed from
/// `DEBUG_EVENT.dwDebugEventCode`.
#[derive(Debug, Clone, Copy)]
pub enum DebugEventKind {
    CreateProcess(CreateProcessInfo),
    ExitProcess(ExitProcessInfo),
    CreateThread(CreateThreadInfo),
    ExitThread(ExitThreadInfo),
    LoadDll(LoadDllInfo),
    UnloadDll(UnloadDllInfo),
    Exception(ExceptionInfo),
    OutputDebugString(OutputDebugStringInfo),
    Rip(RipInfo),
    Unknown(u32),
}

/// One `DEBUG_EVENT`, with its process/thread ids alongside the typed
/// payload.
#[derive(Debug, Clone, Copy)]
pub struct DebugEvent {
    pub process_id: ProcessId,
    pub thread_id: ThreadId,
    pub kind: DebugEventKind,
}

/// Everything `create()` hands the kernel's process-creation primitive.
#[derive(Debug, Clone, Default)]
pub struct ProcessCreationRequest<'a> {
    pub file_path: &'a str,
    pub command_line: &'a str,
    pub current_directory: Option<&'a str>,
    pub start_suspended: bool,
    /// Extra creation flags the embedder wants OR'd in, on top of
    /// `DEBUG_ONLY_THIS_PROCESS | CREATE_NEW_CONSOLE`.
    pub extra_flags: u32,
}

/// What `create()` gets back: the new process's id, its main thread's id,
/// and both handles.
#[derive(Debug, Clone, Copy)]
pub struct CreatedProcess {
    pub process_id: ProcessId,
    pub thread_id: ThreadId,
    pub process_handle: Handle,
    pub thread_handle: Handle,
}

/// The host kernel debug API, narrowed to exactly the primitives the core
/// requires (see the specification's External Interfaces section).
///
/// A `DebugKernel` implementation owns no debugger-level state (no
/// breakpoint tables, no thread bookkeeping) — it is strictly a thin,
/// fallible wrapper over the OS debug API, so that [`crate::Debugger`] can
/// be exercised against [`fake::FakeKernel`] without a real Windows target.
pub trait DebugKernel {
    /// Launch a new process under `DEBUG_ONLY_THIS_PROCESS`.
    fn create_process(&mut self, request: ProcessCreationRequest<'_>) -> Result<CreatedProcess>;

    /// Attach to a running process as its debugger.
    fn debug_active_process(&mut self, process_id: ProcessId) -> Result<()>;

    /// Detach from a process previously attached or created.
    fn debug_active_process_stop(&mut self, process_id: ProcessId) -> Result<()>;

    /// Block for the next debug event, or return `Ok(None)` if `timeout`
    /// elapses first. `None` means "wait forever".
    fn wait_for_debug_event(&mut self, timeout: Option<Duration>) -> Result<Option<DebugEvent>>;

    /// Resume the target after a debug event.
    fn continue_debug_event(
        &mut self,
        process_id: ProcessId,
        thread_id: ThreadId,
        status: ContinueStatus,
    ) -> Result<()>;

    /// Fetch the subset of `thread`'s CPU context selected by `flags`.
    fn get_thread_context(&mut self, thread: Handle, flags: ContextFlags) -> Result<CpuContext>;

    /// Write `context` back to `thread`.
    fn set_thread_context(&mut self, thread: Handle, context: &CpuContext) -> Result<()>;

    /// Read `len` bytes from `process` starting at `address`.
    fn read_process_memory(&mut self, process: Handle, address: Address, len: usize)
        -> Result<Vec<u8>>;

    /// Write `data` into `process` starting at `address`.
    fn write_process_memory(&mut self, process: Handle, address: Address, data: &[u8])
        -> Result<()>;

    fn suspend_thread(&mut self, thread: Handle) -> Result<()>;

    fn resume_thread(&mut self, thread: Handle) -> Result<()>;

    fn terminate_process(&mut self, process: Handle, exit_code: u32) -> Result<()>;

    fn close_handle(&mut self, handle: Handle) -> Result<()>;
}
