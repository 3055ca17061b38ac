//! A debugged process: its threads, breakpoint tables, and memory access.

use std::collections::{BTreeMap, HashMap};

use tracing::debug;

use crate::breakpoint::{
    BreakpointCallback, BreakpointKey, BreakpointKind, BreakpointRecord, HardwareBreakpoint, HardwareBreakpointSize,
    HardwareBreakpointSlot, HardwareBreakpointType, SoftwareBreakpoint, HARDWARE_SLOT_COUNT, INT3,
};
use crate::error::{Error, Result};
use crate::kernel::{Address, CreateProcessInfo, DebugKernel, Handle, ProcessId, ThreadId};
use crate::thread::Thread;

/// A process under debug: its threads, its software/hardware breakpoint
/// tables, and the memory of the target.
///
/// Ordinary Rust move semantics apply here unmodified — relocating a
/// `Process` (e.g. out of a `HashMap` entry during a resize) carries every
/// field, including the breakpoint and thread tables, with no custom `Drop`
/// or move impl required.
pub struct Process {
    pub handle: Handle,
    pub id: ProcessId,
    pub main_thread_id: ThreadId,
    pub create_info: CreateProcessInfo,
    /// Whether the process has already reported its initial
    /// entry-point breakpoint, so later `STATUS_BREAKPOINT`s with no
    /// matching software breakpoint are "system" (injected by the loader
    /// for a DLL, say) rather than "entry".
    pub hit_system_breakpoint: bool,
    threads: HashMap<ThreadId, Thread>,
    software_breakpoints: BTreeMap<Address, SoftwareBreakpoint>,
    hardware_breakpoints: BTreeMap<Address, HardwareBreakpoint>,
    hardware_slots: [Option<Address>; HARDWARE_SLOT_COUNT],
    pending_callbacks: HashMap<BreakpointKey, BreakpointCallback>,
}

impl Process {
    pub fn new(handle: Handle, id: ProcessId, main_thread_id: ThreadId, create_info: CreateProcessInfo) -> Self {
        Self {
            handle,
            id,
            main_thread_id,
            create_info,
            hit_system_breakpoint: false,
            threads: HashMap::new(),
            software_breakpoints: BTreeMap::new(),
            hardware_breakpoints: BTreeMap::new(),
            hardware_slots: [None; HARDWARE_SLOT_COUNT],
            pending_callbacks: HashMap::new(),
        }
    }

    // -- thread table -----------------------------------------------------

    pub fn find_thread(&self, id: ThreadId) -> Option<&Thread> {
        self.threads.get(&id)
    }

    pub fn find_thread_mut(&mut self, id: ThreadId) -> Option<&mut Thread> {
        self.threads.get_mut(&id)
    }

    pub fn threads(&self) -> impl Iterator<Item = &Thread> {
        self.threads.values()
    }

    pub fn threads_mut(&mut self) -> impl Iterator<Item = &mut Thread> {
        self.threads.values_mut()
    }

    pub fn new_thread(&mut self, thread: Thread) -> &mut Thread {
        self.threads.entry(thread.id).or_insert(thread)
    }

    pub fn remove_thread(&mut self, id: ThreadId) -> Option<Thread> {
        self.threads.remove(&id)
    }

    // -- memory -------------------------------------------------------------

    /// Whether a one-byte probe read at `address` succeeds.
    pub fn valid_memory<K: DebugKernel>(&self, kernel: &mut K, address: Address) -> bool {
        kernel.read_process_memory(self.handle, address, 1).is_ok()
    }

    /// Write `data` to `address`, refusing if any software breakpoint
    /// address falls inside `[address, address + data.len())` — a safe
    /// write has no way to preserve a breakpoint byte the caller's buffer
    /// doesn't carry, so it refuses rather than silently clobbering it.
    pub fn write_memory_safe<K: DebugKernel>(&mut self, kernel: &mut K, address: Address, data: &[u8]) -> Result<()> {
        let end = address.saturating_add(data.len() as u32);
        if let Some(bp) = self
            .software_breakpoints
            .keys()
            .find(|&&bp_address| address <= bp_address && bp_address < end)
        {
            return Err(Error::domain(format!(
                "a software breakpoint at 0x{bp:08x} is inside the write range",
                bp = *bp
            )));
        }
        self.write_memory_unsafe(kernel, address, data)
    }

    /// Write `data` to `address` with no validation.
    pub fn write_memory_unsafe<K: DebugKernel>(&mut self, kernel: &mut K, address: Address, data: &[u8]) -> Result<()> {
        kernel.write_process_memory(self.handle, address, data)
    }

    /// Write `data` to `address`, going through the safe path — the
    /// ordinary entry point; `write_memory_unsafe` exists for callers (like
    /// the breakpoint engine) that already know what they're overwriting.
    pub fn write_memory<K: DebugKernel>(&mut self, kernel: &mut K, address: Address, data: &[u8]) -> Result<()> {
        self.write_memory_safe(kernel, address, data)
    }

    /// Read `len` bytes from `address`, then substitute each software
    /// breakpoint's stored `original_byte` back in at its offset, so the
    /// caller never observes a `0xCC` this crate itself planted.
    pub fn read_memory_safe<K: DebugKernel>(&self, kernel: &mut K, address: Address, len: usize) -> Result<Vec<u8>> {
        let mut data = self.read_memory_unsafe(kernel, address, len)?;
        let end = address.saturating_add(len as u32);
        for breakpoint in self.software_breakpoints.values() {
            if address <= breakpoint.address && breakpoint.address < end {
                let offset = (breakpoint.address - address) as usize;
                data[offset] = breakpoint.original_byte;
            }
        }
        Ok(data)
    }

    /// Read `len` bytes from `address` with no validation.
    pub fn read_memory_unsafe<K: DebugKernel>(&self, kernel: &mut K, address: Address, len: usize) -> Result<Vec<u8>> {
        kernel.read_process_memory(self.handle, address, len)
    }

    /// Read `len` bytes from `address`, going through the safe path.
    pub fn read_memory<K: DebugKernel>(&self, kernel: &mut K, address: Address, len: usize) -> Result<Vec<u8>> {
        self.read_memory_safe(kernel, address, len)
    }

    // -- software breakpoints ------------------------------------------------

    pub fn find_software_breakpoint(&self, address: Address) -> Option<&SoftwareBreakpoint> {
        self.software_breakpoints.get(&address)
    }

    /// Place a software breakpoint at `address`: save the original byte and
    /// overwrite it with `INT3`.
    pub fn set_software_breakpoint<K: DebugKernel>(
        &mut self,
        kernel: &mut K,
        address: Address,
        single_shoot: bool,
    ) -> Result<()> {
        if !self.valid_memory(kernel, address) {
            return Err(Error::domain(format!("0x{address:08x} is not a valid memory address")));
        }
        if self.hardware_breakpoints.contains_key(&address) {
            return Err(Error::domain(format!(
                "a hardware breakpoint is already located at 0x{address:08x}"
            )));
        }
        if self.software_breakpoints.contains_key(&address) {
            return Err(Error::domain(format!(
                "software breakpoint already set at 0x{address:08x}"
            )));
        }
        let original_byte = self.read_original_byte(kernel, address)?;
        self.set_int3(kernel, address)?;
        self.software_breakpoints
            .insert(address, SoftwareBreakpoint { address, original_byte, single_shoot });
        Ok(())
    }

    /// Remove the software breakpoint at `address`, restoring its original
    /// byte.
    pub fn delete_software_breakpoint<K: DebugKernel>(&mut self, kernel: &mut K, address: Address) -> Result<()> {
        let breakpoint = self
            .software_breakpoints
            .remove(&address)
            .ok_or_else(|| Error::domain(format!("no software breakpoint at 0x{address:08x}")))?;
        self.write_memory_unsafe(kernel, address, &[breakpoint.original_byte])?;
        self.pending_callbacks.remove(&(BreakpointKind::Software, address));
        Ok(())
    }

    /// Overwrite the byte at `address` with `INT3`, without registering a
    /// tracked breakpoint — used both by `set_software_breakpoint` and to
    /// re-arm one after an internal single-step has stepped over it.
    fn set_int3<K: DebugKernel>(&mut self, kernel: &mut K, address: Address) -> Result<()> {
        self.write_memory_unsafe(kernel, address, &[INT3])
    }

    /// Re-overwrite the byte at `address` with `INT3` for a breakpoint
    /// already registered — used by the event loop to re-arm one after an
    /// internal step has carried the thread past it.
    pub fn set_int3_public<K: DebugKernel>(&mut self, kernel: &mut K, address: Address) -> Result<()> {
        self.set_int3(kernel, address)
    }

    /// Every address with a currently-registered software breakpoint.
    pub fn software_breakpoint_addresses(&self) -> impl Iterator<Item = Address> + '_ {
        self.software_breakpoints.keys().copied()
    }

    /// Restore the original byte at `address`'s registered breakpoint,
    /// without removing the breakpoint from the table — used to step over
    /// it before re-arming.
    pub fn delete_int3<K: DebugKernel>(&mut self, kernel: &mut K, address: Address) -> Result<()> {
        let original_byte = self
            .software_breakpoints
            .get(&address)
            .ok_or_else(|| Error::domain(format!("no software breakpoint at 0x{address:08x}")))?
            .original_byte;
        self.write_memory_unsafe(kernel, address, &[original_byte])
    }

    fn read_original_byte<K: DebugKernel>(&self, kernel: &mut K, address: Address) -> Result<u8> {
        self.read_memory_unsafe(kernel, address, 1).map(|bytes| bytes[0])
    }

    // -- hardware breakpoints -------------------------------------------------

    pub fn find_hardware_breakpoint(&self, address: Address) -> Option<&HardwareBreakpoint> {
        self.hardware_breakpoints.get(&address)
    }

    /// The hardware breakpoint currently occupying debug register slot
    /// `slot_index` (0..=3), if any.
    pub fn find_hardware_breakpoint_by_slot(&self, slot_index: u8) -> Option<&HardwareBreakpoint> {
        let address = self.hardware_slots.get(slot_index as usize).copied().flatten()?;
        self.hardware_breakpoints.get(&address)
    }

    pub fn find_free_hardware_breakpoint_slot(&self) -> Option<HardwareBreakpointSlot> {
        HardwareBreakpointSlot::ALL
            .into_iter()
            .find(|slot| self.hardware_slots[slot.index() as usize].is_none())
    }

    /// Program a hardware breakpoint at `address` on every thread in the
    /// process (each thread's debug registers are independent, so the same
    /// slot is set on all of them).
    pub fn set_hardware_breakpoint<K: DebugKernel>(
        &mut self,
        kernel: &mut K,
        address: Address,
        access: HardwareBreakpointType,
        size: HardwareBreakpointSize,
        single_shoot: bool,
    ) -> Result<HardwareBreakpointSlot> {
        if !self.valid_memory(kernel, address) {
            return Err(Error::domain(format!("0x{address:08x} is not a valid memory address")));
        }
        if self.hardware_breakpoints.contains_key(&address) {
            return Err(Error::domain(format!(
                "hardware breakpoint already set at 0x{address:08x}"
            )));
        }
        let slot = self
            .find_free_hardware_breakpoint_slot()
            .ok_or_else(|| Error::domain("no free hardware breakpoint slot"))?;

        for thread in self.threads.values_mut() {
            thread.set_hardware_breakpoint(kernel, slot, address, access, size)?;
        }

        self.hardware_slots[slot.index() as usize] = Some(address);
        self.hardware_breakpoints
            .insert(address, HardwareBreakpoint { address, slot, access, size, single_shoot });
        Ok(slot)
    }

    /// Clear the hardware breakpoint at `address` on every thread.
    pub fn delete_hardware_breakpoint<K: DebugKernel>(&mut self, kernel: &mut K, address: Address) -> Result<()> {
        let breakpoint = self
            .hardware_breakpoints
            .remove(&address)
            .ok_or_else(|| Error::domain(format!("no hardware breakpoint at 0x{address:08x}")))?;
        for thread in self.threads.values_mut() {
            thread.delete_hardware_breakpoint(kernel, breakpoint.slot)?;
        }
        self.hardware_slots[breakpoint.slot.index() as usize] = None;
        self.pending_callbacks.remove(&(BreakpointKind::Hardware, address));
        Ok(())
    }

    /// Replay every currently-set hardware breakpoint onto a single
    /// (typically newly created) thread. See the design note on hardware
    /// breakpoint propagation for why the core does this by default.
    pub fn replay_hardware_breakpoints<K: DebugKernel>(&self, kernel: &mut K, thread: &mut Thread) -> Result<()> {
        for breakpoint in self.hardware_breakpoints.values() {
            thread.set_hardware_breakpoint(kernel, breakpoint.slot, breakpoint.address, breakpoint.access, breakpoint.size)?;
        }
        Ok(())
    }

    // -- pending callbacks ----------------------------------------------------

    pub fn set_breakpoint_callback(&mut self, key: BreakpointKey, callback: BreakpointCallback) {
        self.pending_callbacks.insert(key, callback);
    }

    /// Run and consume the callback registered for `key`, if any, passing it
    /// the breakpoint record that fired. A `Memory`-kind key is deliberately
    /// never dispatched: the memory-watch breakpoint pathway has no working
    /// implementation behind it, so it is carried in the key type purely as
    /// an extension point.
    pub fn execute_breakpoint_callback(&mut self, key: BreakpointKey, record: &BreakpointRecord) {
        match key.0 {
            BreakpointKind::Memory => {
                debug!(address = format_args!("0x{:08x}", key.1), "memory breakpoint callback dispatch is a no-op");
            }
            BreakpointKind::Software | BreakpointKind::Hardware => {
                if let Some(mut callback) = self.pending_callbacks.remove(&key) {
                    callback(record);
                }
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::breakpoint::HardwareBreakpointSlot;
    use crate::kernel::fake::FakeKernel;
    use crate::kernel::{CpuContext, DebugKernel};

    fn process_with_one_thread() -> (FakeKernel, Process) {
        let mut kernel = FakeKernel::new();
        kernel.add_process(1);
        let process_handle = Handle(1);
        let thread_handle = Handle(2);
        kernel.seed_context(1, thread_handle, CpuContext::default());
        let create_info = CreateProcessInfo {
            process_handle,
            thread_handle,
            file_handle: None,
            base_of_image: 0x0040_0000,
            start_address: 0x0040_1000,
            thread_local_base: 0,
        };
        let mut process = Process::new(process_handle, 1, 7, create_info);
        process.new_thread(Thread::new(thread_handle, 7, 0x0040_1000, 0));
        (kernel, process)
    }

    #[test]
    fn software_breakpoint_round_trips_original_byte() {
        let (mut kernel, mut process) = process_with_one_thread();
        kernel.seed_memory(1, 0x0040_2000, &[0x90]);

        process.set_software_breakpoint(&mut kernel, 0x0040_2000, false).unwrap();
        let bytes = process.read_memory_unsafe(&mut kernel, 0x0040_2000, 1).unwrap();
        assert_eq!(bytes[0], INT3);

        process.delete_software_breakpoint(&mut kernel, 0x0040_2000).unwrap();
        let bytes = process.read_memory_unsafe(&mut kernel, 0x0040_2000, 1).unwrap();
        assert_eq!(bytes[0], 0x90);
    }

    #[test]
    fn software_breakpoint_rejects_duplicate_address() {
        let (mut kernel, mut process) = process_with_one_thread();
        kernel.seed_memory(1, 0x0040_2000, &[0x90]);
        process.set_software_breakpoint(&mut kernel, 0x0040_2000, false).unwrap();
        assert!(process.set_software_breakpoint(&mut kernel, 0x0040_2000, false).is_err());
    }

    #[test]
    fn hardware_breakpoint_slots_are_bounded() {
        let (mut kernel, mut process) = process_with_one_thread();
        for address in [0x1000u32, 0x2000, 0x3000, 0x4000] {
            process
                .set_hardware_breakpoint(
                    &mut kernel,
                    address,
                    HardwareBreakpointType::Execute,
                    HardwareBreakpointSize::Byte,
                    false,
                )
                .unwrap();
        }
        assert!(process.find_free_hardware_breakpoint_slot().is_none());
        let result = process.set_hardware_breakpoint(
            &mut kernel,
            0x5000,
            HardwareBreakpointType::Execute,
            HardwareBreakpointSize::Byte,
            false,
        );
        assert!(result.is_err());

        process.delete_hardware_breakpoint(&mut kernel, 0x1000).unwrap();
        assert_eq!(process.find_free_hardware_breakpoint_slot(), Some(HardwareBreakpointSlot::Dr0));
    }

    #[test]
    fn safe_read_substitutes_original_byte_over_a_breakpoint() {
        let (mut kernel, mut process) = process_with_one_thread();
        kernel.seed_memory(1, 0x6000, &[0x90, 0x90, 0x90, 0x90]);
        process.set_software_breakpoint(&mut kernel, 0x6001, false).unwrap();

        let unsafe_bytes = process.read_memory_unsafe(&mut kernel, 0x6000, 4).unwrap();
        assert_eq!(unsafe_bytes, vec![0x90, INT3, 0x90, 0x90]);

        let safe_bytes = process.read_memory_safe(&mut kernel, 0x6000, 4).unwrap();
        assert_eq!(safe_bytes, vec![0x90, 0x90, 0x90, 0x90]);
    }

    #[test]
    fn safe_write_refuses_a_range_overlapping_a_breakpoint() {
        let (mut kernel, mut process) = process_with_one_thread();
        kernel.seed_memory(1, 0x7000, &[0x90, 0x90, 0x90]);
        process.set_software_breakpoint(&mut kernel, 0x7001, false).unwrap();

        assert!(process.write_memory_safe(&mut kernel, 0x7000, &[0x11, 0x22, 0x33]).is_err());
        let bytes = process.read_memory_unsafe(&mut kernel, 0x7000, 3).unwrap();
        assert_eq!(bytes, vec![0x90, INT3, 0x90]);
        assert!(process.find_software_breakpoint(0x7001).is_some());
    }

    #[test]
    fn set_software_breakpoint_rejects_invalid_memory() {
        let (mut kernel, mut process) = process_with_one_thread();
        // Nothing ever seeded at this address: FakeKernel's read succeeds
        // with a default byte, so instead exercise the hardware-collision
        // precondition as the other invalid case this constructor checks.
        process
            .set_hardware_breakpoint(&mut kernel, 0x8000, HardwareBreakpointType::Execute, HardwareBreakpointSize::Byte, false)
            .unwrap();
        assert!(process.set_software_breakpoint(&mut kernel, 0x8000, false).is_err());
    }

    #[test]
    fn memory_breakpoint_callback_is_a_no_op() {
        let (mut kernel, mut process) = process_with_one_thread();
        let record = BreakpointRecord::Software(SoftwareBreakpoint { address: 0x8000, original_byte: 0x90, single_shoot: false });
        let fired = std::sync::Arc::new(std::sync::atomic::AtomicBool::new(false));
        let fired_clone = fired.clone();
        process.set_breakpoint_callback(
            (BreakpointKind::Memory, 0x8000),
            Box::new(move |_| {
                fired_clone.store(true, std::sync::atomic::Ordering::SeqCst);
            }),
        );
        process.execute_breakpoint_callback((BreakpointKind::Memory, 0x8000), &record);
        assert!(!fired.load(std::sync::atomic::Ordering::SeqCst));
        let _ = &mut kernel;
    }
}
