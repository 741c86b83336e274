// This module owns the raw memory behind the JIT: a code segment the stitcher fills and
// then executes, and a storage segment holding the named variable slots the generated
// code reads and writes. Both are page-aligned anonymous mmap regions. The code segment
// is a typestate machine: CodeBlock is the writable state, and finalize() consumes it,
// flips the pages to read-execute with mprotect, and returns ExecutableCode, the only
// type that can invoke the routine. Write-after-finalize and invoke-before-finalize are
// therefore unrepresentable, and code pages are never writable and executable at once.
// The storage segment stays read-write and is never executable. Capacity is fixed at
// allocation; exceeding it is a hard SegmentExhausted error with no dynamic growth, and
// a failed allocation or protection flip is fatal before any invocation. Slot accesses
// use volatile loads and stores because the cells are mutated by generated machine code
// the compiler cannot see.

//! Executable memory manager: mmap-backed code and storage segments.

use crate::error::{StitchError, StitchResult};
use std::ptr::NonNull;
use thiserror::Error;

/// Error type for memory operations.
#[derive(Error, Debug)]
pub enum MemoryError {
    #[error("memory allocation failed")]
    AllocationFailed,
    #[error("memory protection change failed")]
    ProtectionFailed,
    #[error("invalid memory size")]
    InvalidSize,
}

/// Number of named storage slots, one per identifier `'a'..='z'`.
pub const SLOT_COUNT: usize = 26;

/// A page-aligned anonymous mapping, unmapped on drop.
struct Mapping {
    ptr: NonNull<u8>,
    len: usize,
}

impl Mapping {
    /// Map `size` bytes (rounded up to a whole number of pages), read-write.
    fn new(size: usize) -> Result<Mapping, MemoryError> {
        if size == 0 {
            return Err(MemoryError::InvalidSize);
        }
        let page = unsafe { libc::sysconf(libc::_SC_PAGESIZE) } as usize;
        let len = (size + page - 1) & !(page - 1);

        let ptr = unsafe {
            libc::mmap(
                std::ptr::null_mut(),
                len,
                libc::PROT_READ | libc::PROT_WRITE,
                libc::MAP_PRIVATE | libc::MAP_ANONYMOUS,
                -1,
                0,
            )
        };
        if ptr == libc::MAP_FAILED {
            return Err(MemoryError::AllocationFailed);
        }
        let ptr = NonNull::new(ptr as *mut u8).ok_or(MemoryError::AllocationFailed)?;
        Ok(Mapping { ptr, len })
    }

    fn protect(&self, prot: libc::c_int) -> Result<(), MemoryError> {
        let rc = unsafe { libc::mprotect(self.ptr.as_ptr() as *mut libc::c_void, self.len, prot) };
        if rc != 0 {
            return Err(MemoryError::ProtectionFailed);
        }
        Ok(())
    }

    fn addr(&self) -> u64 {
        self.ptr.as_ptr() as u64
    }
}

impl Drop for Mapping {
    fn drop(&mut self) {
        unsafe {
            libc::munmap(self.ptr.as_ptr() as *mut libc::c_void, self.len);
        }
    }
}

// The mapping owns its region exclusively; nothing aliases it from other
// threads unless a caller arranges that themselves.
unsafe impl Send for Mapping {}

/// The writable state of the code segment. The stitcher appends snippet
/// bytes here; nothing can be executed until [`CodeBlock::finalize`].
pub struct CodeBlock {
    map: Mapping,
    len: usize,
}

impl CodeBlock {
    /// Allocate a writable code segment of at least `capacity` bytes.
    pub fn new(capacity: usize) -> Result<CodeBlock, MemoryError> {
        Ok(CodeBlock {
            map: Mapping::new(capacity)?,
            len: 0,
        })
    }

    /// Bytes written so far.
    pub fn len(&self) -> usize {
        self.len
    }

    pub fn is_empty(&self) -> bool {
        self.len == 0
    }

    /// Total fixed capacity. There is no growth path.
    pub fn capacity(&self) -> usize {
        self.map.len
    }

    /// The code emitted so far. Readable while still writable; useful for
    /// determinism checks and disassembly dumps.
    pub fn as_slice(&self) -> &[u8] {
        unsafe { std::slice::from_raw_parts(self.map.ptr.as_ptr(), self.len) }
    }

    /// Append raw bytes at the write cursor, returning their start offset.
    pub fn append(&mut self, bytes: &[u8]) -> StitchResult<usize> {
        let needed = self.len + bytes.len();
        if needed > self.capacity() {
            return Err(StitchError::SegmentExhausted {
                segment: "code",
                needed,
                capacity: self.capacity(),
            });
        }
        let offset = self.len;
        unsafe {
            std::ptr::copy_nonoverlapping(
                bytes.as_ptr(),
                self.map.ptr.as_ptr().add(offset),
                bytes.len(),
            );
        }
        self.len = needed;
        Ok(offset)
    }

    /// Flip the segment to read-execute and return the invocable state.
    /// A failed protection transition is fatal: the block is dropped and
    /// can never be invoked.
    pub fn finalize(self) -> Result<ExecutableCode, MemoryError> {
        self.map.protect(libc::PROT_READ | libc::PROT_EXEC)?;
        Ok(ExecutableCode {
            map: self.map,
            len: self.len,
        })
    }
}

/// The executable state of the code segment: read-execute pages holding a
/// complete stitched routine. No write access exists in this state.
pub struct ExecutableCode {
    map: Mapping,
    len: usize,
}

impl ExecutableCode {
    pub fn len(&self) -> usize {
        self.len
    }

    pub fn is_empty(&self) -> bool {
        self.len == 0
    }

    /// Base address, for protection queries in tests.
    pub fn base_addr(&self) -> u64 {
        self.map.addr()
    }

    /// Call the stitched routine as a zero-argument function.
    ///
    /// # Safety
    ///
    /// The caller must guarantee the segment holds a complete routine for
    /// the host architecture that ends in a return, and that every patched
    /// slot address points into a still-live storage block.
    pub unsafe fn invoke(&self) {
        let f: extern "C" fn() = unsafe { std::mem::transmute(self.map.ptr.as_ptr()) };
        f();
    }
}

/// The storage segment: one `i32` cell per identifier `'a'..='z'`, indexed
/// directly by character value. Read-write for the whole run, never
/// executable. Seeded by the caller before invocation, mutated by the
/// generated code, read back afterward.
pub struct StorageBlock {
    map: Mapping,
}

impl StorageBlock {
    pub fn new() -> Result<StorageBlock, MemoryError> {
        let map = Mapping::new(SLOT_COUNT * std::mem::size_of::<i32>())?;
        Ok(StorageBlock { map })
    }

    fn slot_index(name: char) -> StitchResult<usize> {
        if name.is_ascii_lowercase() {
            Ok(name as usize - 'a' as usize)
        } else {
            Err(StitchError::InvalidSlot { name })
        }
    }

    fn slot_ptr(&self, name: char) -> StitchResult<*mut i32> {
        let index = Self::slot_index(name)?;
        Ok(unsafe { (self.map.ptr.as_ptr() as *mut i32).add(index) })
    }

    /// Seed a slot before invocation.
    pub fn set(&mut self, name: char, value: i32) -> StitchResult<()> {
        let p = self.slot_ptr(name)?;
        unsafe { std::ptr::write_volatile(p, value) };
        Ok(())
    }

    /// Read a slot back. Volatile: the generated code mutates these cells
    /// behind the compiler's back.
    pub fn get(&self, name: char) -> StitchResult<i32> {
        let p = self.slot_ptr(name)?;
        Ok(unsafe { std::ptr::read_volatile(p) })
    }

    /// Absolute address of a slot, for patching into load/store snippets.
    pub fn slot_addr(&self, name: char) -> StitchResult<u64> {
        Ok(self.slot_ptr(name)? as u64)
    }

    /// Base address, for protection queries in tests.
    pub fn base_addr(&self) -> u64 {
        self.map.addr()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn allocate_and_append() {
        let mut code = CodeBlock::new(4096).unwrap();
        assert!(code.capacity() >= 4096);
        let off = code.append(&[0x90, 0x90]).unwrap();
        assert_eq!(off, 0);
        assert_eq!(code.as_slice(), &[0x90, 0x90]);
    }

    #[test]
    fn append_beyond_capacity_is_exhaustion() {
        let mut code = CodeBlock::new(1).unwrap();
        let cap = code.capacity();
        let big = vec![0x90u8; cap + 1];
        let err = code.append(&big).unwrap_err();
        assert!(matches!(err, StitchError::SegmentExhausted { .. }));
    }

    #[test]
    fn zero_size_mapping_is_rejected() {
        assert!(matches!(
            CodeBlock::new(0),
            Err(MemoryError::InvalidSize)
        ));
    }

    #[test]
    fn storage_slots_read_back() {
        let mut storage = StorageBlock::new().unwrap();
        storage.set('a', 41).unwrap();
        storage.set('z', -7).unwrap();
        assert_eq!(storage.get('a').unwrap(), 41);
        assert_eq!(storage.get('z').unwrap(), -7);
    }

    #[test]
    fn non_lowercase_slot_name_is_rejected() {
        let storage = StorageBlock::new().unwrap();
        assert!(matches!(
            storage.get('A'),
            Err(StitchError::InvalidSlot { name: 'A' })
        ));
        assert!(storage.slot_addr('0').is_err());
    }

    #[test]
    fn slot_addresses_are_consecutive_cells() {
        let storage = StorageBlock::new().unwrap();
        let a = storage.slot_addr('a').unwrap();
        let b = storage.slot_addr('b').unwrap();
        assert_eq!(b - a, std::mem::size_of::<i32>() as u64);
        assert_eq!(a, storage.base_addr());
    }

    #[cfg(target_arch = "x86_64")]
    #[test]
    fn finalize_then_invoke_a_bare_return() {
        let mut code = CodeBlock::new(4096).unwrap();
        code.append(&[0xc3]).unwrap(); // ret
        let exec = code.finalize().unwrap();
        unsafe { exec.invoke() };
    }
}
