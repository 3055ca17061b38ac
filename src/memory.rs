//! Windows memory-protection helpers mirroring the original debugger's
//! `RemoveWriteAccess`/`RemoveExecuteAccess` table, kept for embedders that
//! need to reason about a page's protection before poking at it.

// The base `PAGE_*` protection constants (low byte of `MEMORY_BASIC_INFORMATION::Protect`).
const PAGE_NOACCESS: u32 = 0x01;
const PAGE_READONLY: u32 = 0x02;
const PAGE_READWRITE: u32 = 0x04;
const PAGE_WRITECOPY: u32 = 0x08;
const PAGE_EXECUTE: u32 = 0x10;
const PAGE_EXECUTE_READ: u32 = 0x20;
const PAGE_EXECUTE_READWRITE: u32 = 0x40;
const PAGE_EXECUTE_WRITECOPY: u32 = 0x80;

/// Mask selecting the base protection byte, as opposed to the `PAGE_GUARD`
/// / `PAGE_NOCACHE` / `PAGE_WRITECOMBINE` modifier bits above it.
const BASE_PROTECTION_MASK: u32 = 0xFF;

/// Drop the execute bit from `protect`, shifting an executable protection
/// down to its nearest non-executable equivalent. Modifier bits (`PAGE_GUARD`
/// and friends) above the base protection byte are preserved unchanged.
///
/// Named for the original table this mirrors rather than for the bit it
/// clears: `PAGE_EXECUTE_READWRITE` still has write access after this call.
pub fn remove_write_access(protect: u32) -> u32 {
    let modifiers = protect & !BASE_PROTECTION_MASK;
    let base = protect & BASE_PROTECTION_MASK;
    let base = match base {
        PAGE_EXECUTE => PAGE_READONLY,
        PAGE_EXECUTE_WRITECOPY | PAGE_EXECUTE_READWRITE | PAGE_EXECUTE_READ => base >> 4,
        other => other,
    };
    modifiers | base
}

/// Drop the write bit from `protect`, shifting a writable protection down
/// to its nearest read-only equivalent. Modifier bits are preserved
/// unchanged.
pub fn remove_execute_access(protect: u32) -> u32 {
    let modifiers = protect & !BASE_PROTECTION_MASK;
    let base = protect & BASE_PROTECTION_MASK;
    let base = match base {
        PAGE_READWRITE | PAGE_EXECUTE_READWRITE => base >> 1,
        other => other,
    };
    modifiers | base
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn remove_write_access_drops_the_execute_bit() {
        assert_eq!(remove_write_access(PAGE_EXECUTE), PAGE_READONLY);
        assert_eq!(remove_write_access(PAGE_EXECUTE_READ), PAGE_READONLY);
        assert_eq!(remove_write_access(PAGE_EXECUTE_READWRITE), PAGE_READWRITE);
        assert_eq!(remove_write_access(PAGE_EXECUTE_WRITECOPY), PAGE_WRITECOPY);
        assert_eq!(remove_write_access(PAGE_READONLY), PAGE_READONLY);
    }

    #[test]
    fn remove_execute_access_drops_the_write_bit() {
        assert_eq!(remove_execute_access(PAGE_READWRITE), PAGE_READONLY);
        assert_eq!(remove_execute_access(PAGE_EXECUTE_READWRITE), PAGE_EXECUTE_READ);
        assert_eq!(remove_execute_access(PAGE_EXECUTE_READ), PAGE_EXECUTE_READ);
        assert_eq!(remove_execute_access(PAGE_NOACCESS), PAGE_NOACCESS);
    }

    #[test]
    fn modifier_bits_survive_downgrade() {
        const PAGE_GUARD: u32 = 0x100;
        assert_eq!(
            remove_write_access(PAGE_EXECUTE_READWRITE | PAGE_GUARD),
            PAGE_READWRITE | PAGE_GUARD
        );
    }
}
