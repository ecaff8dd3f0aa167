//! A flat, shared-memory-backed guest address space.
//!
//! This is the demo MMU used by `elfloader` and by this crate's own tests;
//! it is not part of the externally-facing memory contract, which
//! `external::MemoryCallbacks` defines as a set of host callbacks instead
//! (so an embedder can back guest memory with anything it likes). `MemRegion`
//! exists so the demo and the tests have somewhere concrete to point a
//! `MemoryCallbacks` impl at.

use std::convert::TryInto;
use std::ffi::CString;

use libc::{
    c_char, c_void, ftruncate, mmap, shm_open, shm_unlink, MAP_FAILED, MAP_FIXED, MAP_SHARED,
    O_CREAT, O_EXCL, O_RDWR, PROT_EXEC, PROT_READ, PROT_WRITE,
};

use crate::error::MemoryError;
use crate::external::MemoryCallbacks;

/// Base address this crate's regions are mapped at, chosen well clear of
/// typical host heap/stack/library ranges so a stray host pointer can never
/// alias guest memory by accident.
pub const ARENA_BASE: usize = 0x0000_1337_0000_0000;

#[allow(dead_code)]
pub struct MemRegion {
    /// Pointer to this memory region's backing pages.
    pub ptr: &'static mut [u8],
    /// Guest physical address associated with this memory region.
    pub addr: u32,
    /// Length of the memory region.
    pub len: usize,
    fd: i32,
}

impl MemRegion {
    /// Create a new memory region.
    pub fn new(name: &str, addr: u32, len: usize) -> Self {
        let address = ARENA_BASE + addr as usize;
        let name = CString::new(name).unwrap();
        let fd = unsafe { MemRegion::create_shm(name.as_ptr(), len) };
        let ptr = unsafe { MemRegion::mmap(fd, address, len) };
        MemRegion { ptr, addr, len, fd }
    }

    unsafe fn create_shm(name: *const c_char, len: usize) -> i32 {
        let fd = shm_open(name, O_RDWR | O_CREAT | O_EXCL, 0o600);
        if fd == -1 {
            panic!("shm_open for object {name:?} failed");
        } else {
            shm_unlink(name);
        }
        if ftruncate(fd, len.try_into().unwrap()) < 0 {
            panic!("ftruncate() for {name:?} ({len:#x} bytes) failed");
        } else {
            fd
        }
    }

    unsafe fn mmap(shm_fd: i32, vaddr: usize, len: usize) -> &'static mut [u8] {
        let addr = vaddr as *mut c_void;
        let res = mmap(
            addr,
            len,
            PROT_READ | PROT_WRITE | PROT_EXEC,
            MAP_FIXED | MAP_SHARED,
            shm_fd,
            0,
        );
        if res == MAP_FAILED {
            panic!("mmap() failed at {addr:?}");
        }
        std::slice::from_raw_parts_mut(res as *mut u8, len)
    }

    fn bounds_check(&self, off: usize, width: usize) -> Result<(), MemoryError> {
        if off.checked_add(width).map_or(true, |end| end > self.len) {
            return Err(MemoryError::OutOfBounds { addr: self.addr as u64 + off as u64, len: width });
        }
        Ok(())
    }

    pub fn write_buf(&mut self, off: u32, buf: &[u8]) {
        let off = off as usize;
        self.ptr[off..off + buf.len()].copy_from_slice(buf);
    }

    pub fn read8(&self, off: usize) -> Result<u8, MemoryError> {
        self.bounds_check(off, 1)?;
        Ok(self.ptr[off])
    }
    pub fn read16(&self, off: usize) -> Result<u16, MemoryError> {
        self.bounds_check(off, 2)?;
        Ok(u16::from_le_bytes(self.ptr[off..off + 2].try_into().unwrap()))
    }
    pub fn read32(&self, off: usize) -> Result<u32, MemoryError> {
        self.bounds_check(off, 4)?;
        Ok(u32::from_le_bytes(self.ptr[off..off + 4].try_into().unwrap()))
    }
    pub fn read64(&self, off: usize) -> Result<u64, MemoryError> {
        self.bounds_check(off, 8)?;
        Ok(u64::from_le_bytes(self.ptr[off..off + 8].try_into().unwrap()))
    }
    pub fn read128(&self, off: usize) -> Result<u128, MemoryError> {
        self.bounds_check(off, 16)?;
        Ok(u128::from_le_bytes(self.ptr[off..off + 16].try_into().unwrap()))
    }

    pub fn write8(&mut self, off: usize, v: u8) -> Result<(), MemoryError> {
        self.bounds_check(off, 1)?;
        self.ptr[off] = v;
        Ok(())
    }
    pub fn write16(&mut self, off: usize, v: u16) -> Result<(), MemoryError> {
        self.bounds_check(off, 2)?;
        self.ptr[off..off + 2].copy_from_slice(&v.to_le_bytes());
        Ok(())
    }
    pub fn write32(&mut self, off: usize, v: u32) -> Result<(), MemoryError> {
        self.bounds_check(off, 4)?;
        self.ptr[off..off + 4].copy_from_slice(&v.to_le_bytes());
        Ok(())
    }
    pub fn write64(&mut self, off: usize, v: u64) -> Result<(), MemoryError> {
        self.bounds_check(off, 8)?;
        self.ptr[off..off + 8].copy_from_slice(&v.to_le_bytes());
        Ok(())
    }
    pub fn write128(&mut self, off: usize, v: u128) -> Result<(), MemoryError> {
        self.bounds_check(off, 16)?;
        self.ptr[off..off + 16].copy_from_slice(&v.to_le_bytes());
        Ok(())
    }

    /// Translates a guest virtual address into this region's byte offset,
    /// rejecting addresses below the region's base the same way an
    /// out-of-range offset is rejected.
    fn vaddr_off(&self, vaddr: u64) -> Result<usize, MemoryError> {
        vaddr
            .checked_sub(self.addr as u64)
            .and_then(|off| usize::try_from(off).ok())
            .ok_or(MemoryError::OutOfBounds { addr: vaddr, len: 0 })
    }
}

/// Backs the front-end's code fetch and the backend's slow-path memory
/// handlers directly off this region, translating guest virtual addresses
/// through [`MemRegion::vaddr_off`].
impl MemoryCallbacks for MemRegion {
    fn read8(&self, vaddr: u64) -> Result<u8, MemoryError> {
        self.read8(self.vaddr_off(vaddr)?)
    }
    fn read16(&self, vaddr: u64) -> Result<u16, MemoryError> {
        self.read16(self.vaddr_off(vaddr)?)
    }
    fn read32(&self, vaddr: u64) -> Result<u32, MemoryError> {
        self.read32(self.vaddr_off(vaddr)?)
    }
    fn read64(&self, vaddr: u64) -> Result<u64, MemoryError> {
        self.read64(self.vaddr_off(vaddr)?)
    }
    fn read128(&self, vaddr: u64) -> Result<u128, MemoryError> {
        self.read128(self.vaddr_off(vaddr)?)
    }

    fn write8(&mut self, vaddr: u64, value: u8) -> Result<(), MemoryError> {
        let off = self.vaddr_off(vaddr)?;
        self.write8(off, value)
    }
    fn write16(&mut self, vaddr: u64, value: u16) -> Result<(), MemoryError> {
        let off = self.vaddr_off(vaddr)?;
        self.write16(off, value)
    }
    fn write32(&mut self, vaddr: u64, value: u32) -> Result<(), MemoryError> {
        let off = self.vaddr_off(vaddr)?;
        self.write32(off, value)
    }
    fn write64(&mut self, vaddr: u64, value: u64) -> Result<(), MemoryError> {
        let off = self.vaddr_off(vaddr)?;
        self.write64(off, value)
    }
    fn write128(&mut self, vaddr: u64, value: u128) -> Result<(), MemoryError> {
        let off = self.vaddr_off(vaddr)?;
        self.write128(off, value)
    }

    fn fetch_instruction(&self, vaddr: u64) -> Result<u32, MemoryError> {
        self.read32(self.vaddr_off(vaddr)?)
    }
}
