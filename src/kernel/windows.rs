//! [`DebugKernel`] backed by the real Win32 debug API.
//!
//! Only builds on `cfg(target_os = "windows")`, and only makes sense on an
//! `i686` target: the `CONTEXT` layout this module reads is the x86 one.

use std::collections::HashMap;
use std::time::Duration;

use ::windows::Win32::Foundation::{CloseHandle, GetLastError, HANDLE};
use ::windows::Win32::System::Diagnostics::Debug::{
    ContinueDebugEvent, DebugActiveProcess, DebugActiveProcessStop, GetThreadContext,
    SetThreadContext, WaitForDebugEventEx, CONTEXT, CONTEXT_FLAGS, CREATE_PROCESS_DEBUG_EVENT,
    CREATE_THREAD_DEBUG_EVENT, DBG_CONTINUE, DBG_EXCEPTION_NOT_HANDLED, DEBUG_EVENT,
    EXCEPTION_DEBUG_EVENT, EXIT_PROCESS_DEBUG_EVENT, EXIT_THREAD_DEBUG_EVENT,
    LOAD_DLL_DEBUG_EVENT, OUTPUT_DEBUG_STRING_EVENT, RIP_EVENT, UNLOAD_DLL_DEBUG_EVENT,
};
use ::windows::Win32::System::Memory::{ReadProcessMemory, WriteProcessMemory};
use ::windows::Win32::System::Threading::{
    CreateProcessW, ResumeThread, SuspendThread, TerminateProcess, CREATE_NEW_CONSOLE,
    CREATE_SUSPENDED, DEBUG_ONLY_THIS_PROCESS, PROCESS_CREATION_FLAGS, PROCESS_INFORMATION,
    STARTUPINFOW,
};
use ::windows::core::PWSTR;

use crate::error::{Error, Result};
use crate::kernel::{
    Address, ContextFlags, ContinueStatus, CpuContext, CreateProcessInfo, CreatedProcess,
    DebugEvent, DebugEventKind, DebugKernel, ExceptionCode, ExceptionInfo, ExitProcessInfo,
    ExitThreadInfo, Handle, LoadDllInfo, OutputDebugStringInfo, ProcessCreationRequest, ProcessId,
    RipInfo, ThreadId, UnloadDllInfo,
};

fn last_error(call: &'static str) -> Error {
    Error::system(call, std::io::Error::from_raw_os_error(unsafe { GetLastError().0 as i32 }))
}

fn to_win_handle(handle: Handle) -> HANDLE {
    HANDLE(handle.0)
}

fn from_win_handle(handle: HANDLE) -> Handle {
    Handle(handle.0)
}

fn to_win_context_flags(flags: ContextFlags) -> CONTEXT_FLAGS {
    // The CONTEXT_* constants share their low nibble with our own grouping,
    // but we do not rely on binary compatibility: translate explicitly.
    use ::windows::Win32::System::Diagnostics::Debug::{
        CONTEXT_i386_CONTROL, CONTEXT_i386_DEBUG_REGISTERS, CONTEXT_i386_EXTENDED_REGISTERS,
        CONTEXT_i386_FLOATING_POINT, CONTEXT_i386_INTEGER, CONTEXT_i386_SEGMENTS,
    };

    let mut win_flags = CONTEXT_FLAGS(0);
    if flags.contains(ContextFlags::CONTROL) {
        win_flags |= CONTEXT_i386_CONTROL;
    }
    if flags.contains(ContextFlags::INTEGER) {
        win_flags |= CONTEXT_i386_INTEGER;
    }
    if flags.contains(ContextFlags::SEGMENTS) {
        win_flags |= CONTEXT_i386_SEGMENTS;
    }
    if flags.contains(ContextFlags::FLOATING_POINT) {
        win_flags |= CONTEXT_i386_FLOATING_POINT;
    }
    if flags.contains(ContextFlags::DEBUG_REGISTERS) {
        win_flags |= CONTEXT_i386_DEBUG_REGISTERS;
    }
    if flags.contains(ContextFlags::EXTENDED_REGISTERS) {
        win_flags |= CONTEXT_i386_EXTENDED_REGISTERS;
    }
    win_flags
}

fn from_win_context(context: &CONTEXT) -> CpuContext {
    CpuContext {
        context_flags: context.ContextFlags.0,
        eax: context.Eax,
        ebx: context.Ebx,
        ecx: context.Ecx,
        edx: context.Edx,
        esp: context.Esp,
        ebp: context.Ebp,
        esi: context.Esi,
        edi: context.Edi,
        eip: context.Eip,
        eflags: context.EFlags,
        dr0: context.Dr0,
        dr1: context.Dr1,
        dr2: context.Dr2,
        dr3: context.Dr3,
        dr6: context.Dr6,
        dr7: context.Dr7,
    }
}

fn apply_to_win_context(context: &CpuContext, win_context: &mut CONTEXT) {
    win_context.ContextFlags = CONTEXT_FLAGS(context.context_flags);
    win_context.Eax = context.eax;
    win_context.Ebx = context.ebx;
    win_context.Ecx = context.ecx;
    win_context.Edx = context.edx;
    win_context.Esp = context.esp;
    win_context.Ebp = context.ebp;
    win_context.Esi = context.esi;
    win_context.Edi = context.edi;
    win_context.Eip = context.eip;
    win_context.EFlags = context.eflags;
    win_context.Dr0 = context.dr0;
    win_context.Dr1 = context.dr1;
    win_context.Dr2 = context.dr2;
    win_context.Dr3 = context.dr3;
    win_context.Dr6 = context.dr6;
    win_context.Dr7 = context.dr7;
}

fn exception_code_of(code: u32) -> ExceptionCode {
    use ::windows::Win32::Foundation::{
        STATUS_ACCESS_VIOLATION, STATUS_BREAKPOINT, STATUS_SINGLE_STEP,
    };
    if code == STATUS_BREAKPOINT.0 as u32 {
        ExceptionCode::Breakpoint
    } else if code == STATUS_SINGLE_STEP.0 as u32 {
        ExceptionCode::SingleStep
    } else if code == STATUS_ACCESS_VIOLATION.0 as u32 {
        ExceptionCode::AccessViolation
    } else {
        ExceptionCode::Other(code)
    }
}

fn decode_event(event: &DEBUG_EVENT) -> DebugEventKind {
    // SAFETY: the active union field is determined by dwDebugEventCode,
    // which we switch on before reading it.
    unsafe {
        match event.dwDebugEventCode {
            CREATE_PROCESS_DEBUG_EVENT => {
                let info = &event.u.CreateProcessInfo;
                DebugEventKind::CreateProcess(CreateProcessInfo {
                    process_handle: from_win_handle(info.hProcess),
                    thread_handle: from_win_handle(info.hThread),
                    file_handle: (!info.hFile.is_invalid()).then(|| from_win_handle(info.hFile)),
                    base_of_image: info.lpBaseOfImage as Address,
                    start_address: info.lpStartAddress.map_or(0, |f| f as usize) as Address,
                    thread_local_base: info.lpThreadLocalBase as Address,
                })
            }
            EXIT_PROCESS_DEBUG_EVENT => {
                let info = &event.u.ExitProcess;
                DebugEventKind::ExitProcess(ExitProcessInfo { exit_code: info.dwExitCode })
            }
            CREATE_THREAD_DEBUG_EVENT => {
                let info = &event.u.CreateThread;
                DebugEventKind::CreateThread(crate::kernel::CreateThreadInfo {
                    thread_handle: from_win_handle(info.hThread),
                    start_address: info.lpStartAddress.map_or(0, |f| f as usize) as Address,
                    thread_local_base: info.lpThreadLocalBase as Address,
                })
            }
            EXIT_THREAD_DEBUG_EVENT => {
                let info = &event.u.ExitThread;
                DebugEventKind::ExitThread(ExitThreadInfo { exit_code: info.dwExitCode })
            }
            LOAD_DLL_DEBUG_EVENT => {
                let info = &event.u.LoadDll;
                DebugEventKind::LoadDll(LoadDllInfo {
                    file_handle: (!info.hFile.is_invalid()).then(|| from_win_handle(info.hFile)),
                    base_of_dll: info.lpBaseOfDll as Address,
                })
            }
            UNLOAD_DLL_DEBUG_EVENT => {
                let info = &event.u.UnloadDll;
                DebugEventKind::UnloadDll(UnloadDllInfo { base_of_dll: info.lpBaseOfDll as Address })
            }
            EXCEPTION_DEBUG_EVENT => {
                let info = &event.u.Exception;
                let record = &info.ExceptionRecord;
                DebugEventKind::Exception(ExceptionInfo {
                    code: exception_code_of(record.ExceptionCode.0 as u32),
                    address: record.ExceptionAddress as Address,
                    first_chance: info.dwFirstChance == 1,
                })
            }
            OUTPUT_DEBUG_STRING_EVENT => {
                let info = &event.u.DebugString;
                DebugEventKind::OutputDebugString(OutputDebugStringInfo {
                    address: info.lpDebugStringData.0 as Address,
                    length: info.nDebugStringLength,
                    unicode: info.fUnicode != 0,
                })
            }
            RIP_EVENT => {
                let info = &event.u.RipInfo;
                DebugEventKind::Rip(RipInfo { error: info.dwError, kind: info.dwType })
            }
            other => DebugEventKind::Unknown(other.0),
        }
    }
}

/// A [`DebugKernel`] backed by live Win32 debug calls.
///
/// Holds no state of its own beyond a scratch buffer reused across
/// `WaitForDebugEventEx` calls; all process/thread bookkeeping lives in
/// [`crate::process::Process`] / [`crate::thread::Thread`].
#[derive(Default)]
pub struct WindowsKernel {
    // Cache of handles closed via `close_handle`, purely to make repeated
    // close calls on an already-closed handle a safe no-op rather than a
    // Win32 error.
    closed: HashMap<isize, ()>,
}

impl WindowsKernel {
    pub fn new() -> Self {
        Self::default()
    }
}

impl DebugKernel for WindowsKernel {
    fn create_process(&mut self, request: ProcessCreationRequest<'_>) -> Result<CreatedProcess> {
        let mut file_path: Vec<u16> =
            request.file_path.encode_utf16().chain(std::iter::once(0)).collect();
        let mut command_line: Vec<u16> =
            request.command_line.encode_utf16().chain(std::iter::once(0)).collect();
        let current_directory: Option<Vec<u16>> = request
            .current_directory
            .map(|dir| dir.encode_utf16().chain(std::iter::once(0)).collect());

        let flags = PROCESS_CREATION_FLAGS(
            DEBUG_ONLY_THIS_PROCESS.0
                | CREATE_NEW_CONSOLE.0
                | if request.start_suspended { CREATE_SUSPENDED.0 } else { 0 }
                | request.extra_flags,
        );

        let mut startup_info = STARTUPINFOW { cb: std::mem::size_of::<STARTUPINFOW>() as u32, ..Default::default() };
        let mut process_information = PROCESS_INFORMATION::default();

        let ok = unsafe {
            CreateProcessW(
                ::windows::core::PCWSTR(file_path.as_mut_ptr()),
                PWSTR(command_line.as_mut_ptr()),
                None,
                None,
                false,
                flags,
                None,
                current_directory
                    .as_ref()
                    .map(|dir| ::windows::core::PCWSTR(dir.as_ptr()))
                    .unwrap_or(::windows::core::PCWSTR::null()),
                &startup_info,
                &mut process_information,
            )
        };
        if ok.is_err() {
            return Err(last_error("CreateProcessW"));
        }
        let _ = &mut startup_info;

        Ok(CreatedProcess {
            process_id: process_information.dwProcessId,
            thread_id: process_information.dwThreadId,
            process_handle: from_win_handle(process_information.hProcess),
            thread_handle: from_win_handle(process_information.hThread),
        })
    }

    fn debug_active_process(&mut self, process_id: ProcessId) -> Result<()> {
        unsafe { DebugActiveProcess(process_id) }.map_err(|_| last_error("DebugActiveProcess"))
    }

    fn debug_active_process_stop(&mut self, process_id: ProcessId) -> Result<()> {
        unsafe { DebugActiveProcessStop(process_id) }
            .map_err(|_| last_error("DebugActiveProcessStop"))
    }

    fn wait_for_debug_event(&mut self, timeout: Option<Duration>) -> Result<Option<DebugEvent>> {
        let mut raw = DEBUG_EVENT::default();
        let timeout_ms = timeout.map_or(u32::MAX, |duration| {
            duration.as_millis().min(u128::from(u32::MAX - 1)) as u32
        });

        let ok = unsafe { WaitForDebugEventEx(&mut raw, timeout_ms) };
        if !ok.as_bool() {
            let error = unsafe { GetLastError() };
            // WAIT_TIMEOUT is not failure, it is "no event yet".
            if error.0 == 258 {
                return Ok(None);
            }
            return Err(last_error("WaitForDebugEventEx"));
        }

        Ok(Some(DebugEvent {
            process_id: raw.dwProcessId,
            thread_id: raw.dwThreadId,
            kind: decode_event(&raw),
        }))
    }

    fn continue_debug_event(
        &mut self,
        process_id: ProcessId,
        thread_id: ThreadId,
        status: ContinueStatus,
    ) -> Result<()> {
        let code = match status {
            ContinueStatus::Continue => DBG_CONTINUE,
            ContinueStatus::ExceptionNotHandled => DBG_EXCEPTION_NOT_HANDLED,
        };
        unsafe { ContinueDebugEvent(process_id, thread_id, code) }
            .map_err(|_| last_error("ContinueDebugEvent"))
    }

    fn get_thread_context(&mut self, thread: Handle, flags: ContextFlags) -> Result<CpuContext> {
        let mut context = CONTEXT { ContextFlags: to_win_context_flags(flags), ..Default::default() };
        unsafe { GetThreadContext(to_win_handle(thread), &mut context) }
            .map_err(|_| last_error("GetThreadContext"))?;
        Ok(from_win_context(&context))
    }

    fn set_thread_context(&mut self, thread: Handle, context: &CpuContext) -> Result<()> {
        let mut win_context = CONTEXT::default();
        apply_to_win_context(context, &mut win_context);
        unsafe { SetThreadContext(to_win_handle(thread), &win_context) }
            .map_err(|_| last_error("SetThreadContext"))
    }

    fn read_process_memory(
        &mut self,
        process: Handle,
        address: Address,
        len: usize,
    ) -> Result<Vec<u8>> {
        let mut buffer = vec![0u8; len];
        let mut read = 0usize;
        let ok = unsafe {
            ReadProcessMemory(
                to_win_handle(process),
                address as *const core::ffi::c_void,
                buffer.as_mut_ptr() as *mut core::ffi::c_void,
                len,
                Some(&mut read),
            )
        };
        if ok.is_err() {
            return Err(last_error("ReadProcessMemory"));
        }
        buffer.truncate(read);
        Ok(buffer)
    }

    fn write_process_memory(
        &mut self,
        process: Handle,
        address: Address,
        data: &[u8],
    ) -> Result<()> {
        let mut written = 0usize;
        let ok = unsafe {
            WriteProcessMemory(
                to_win_handle(process),
                address as *const core::ffi::c_void,
                data.as_ptr() as *const core::ffi::c_void,
                data.len(),
                Some(&mut written),
            )
        };
        if ok.is_err() || written != data.len() {
            return Err(last_error("WriteProcessMemory"));
        }
        Ok(())
    }

    fn suspend_thread(&mut self, thread: Handle) -> Result<()> {
        if unsafe { SuspendThread(to_win_handle(thread)) } == u32::MAX {
            return Err(last_error("SuspendThread"));
        }
        Ok(())
    }

    fn resume_thread(&mut self, thread: Handle) -> Result<()> {
        if unsafe { ResumeThread(to_win_handle(thread)) } == u32::MAX {
            return Err(last_error("ResumeThread"));
        }
        Ok(())
    }

    fn terminate_process(&mut self, process: Handle, exit_code: u32) -> Result<()> {
        unsafe { TerminateProcess(to_win_handle(process), exit_code) }
            .map_err(|_| last_error("TerminateProcess"))
    }

    fn close_handle(&mut self, handle: Handle) -> Result<()> {
        if self.closed.contains_key(&handle.0) {
            return Ok(());
        }
        unsafe { CloseHandle(to_win_handle(handle)) }.map_err(|_| last_error("CloseHandle"))?;
        self.closed.insert(handle.0, ());
        Ok(())
    }
}
