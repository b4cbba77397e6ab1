//! File-backed, growable, offset-addressed memory region (spec §3.1, §4.1).
//!
//! The defining decision is fixed-address mapping: the file is mapped at the
//! same virtual address on every open, so a stored offset can be
//! dereferenced as an ordinary pointer at a constant displacement. No safe
//! mmap crate exposes "re-map an existing fixed address after `ftruncate`",
//! so this is hand-written `libc` FFI, in the same spirit as a raw mmap
//! wrapper built directly on `libc::{mmap, munmap, ftruncate}`.

use std::fs::{File, OpenOptions};
use std::os::fd::AsRawFd;
use std::path::{Path, PathBuf};
use std::ptr;

use crate::error::{Error, Result};
use crate::header::{ArenaHeader, HEADER_SIZE, page_round};
use crate::offset::Offset;

bitflags::bitflags! {
    #[derive(Debug, Clone, Copy, PartialEq, Eq)]
    pub struct OpenFlags: u32 {
        const CREATE = 1 << 0;
        const FIXED = 1 << 1;
        const LOCK = 1 << 2;
        const STRICT = 1 << 3;
        const READONLY = 1 << 4;
    }
}

pub struct Arena {
    file: File,
    path: PathBuf,
    base: *mut u8,
    mapped_len: usize,
    ceiling: Option<usize>,
    lock_count: u32,
    readonly: bool,
}

// The arena hands out raw offsets, not pointers, across threads; the type
// itself is not `Send`/`Sync` by default because of the raw pointer. Callers
// needing cross-thread access wrap it behind their own synchronization (the
// mixer core keeps one Arena per single-threaded EventLoop).
impl Arena {
    /// Opens or creates the arena file at `path`, mapping it at `base_addr`.
    ///
    /// If `flags.CREATE` and the file does not exist, writes a fresh header
    /// with `dm_top` set just past the header and `dm_size = init_bytes`
    /// (page-rounded). If the file exists, validates endianness/magic/
    /// version and refuses on mismatch.
    pub fn open(
        path: impl AsRef<Path>,
        base_addr: usize,
        init_bytes: usize,
        ceiling: Option<usize>,
        flags: OpenFlags,
    ) -> Result<Self> {
        let path = path.as_ref().to_path_buf();
        let exists = path.exists();
        let create = flags.contains(OpenFlags::CREATE) && !exists;

        let file = OpenOptions::new()
            .read(true)
            .write(!flags.contains(OpenFlags::READONLY))
            .create(create)
            .open(&path)
            .map_err(Error::OpenFailed)?;

        if flags.contains(OpenFlags::LOCK) {
            lock_fd(&file)?;
        }

        let map_len = if create {
            page_round(HEADER_SIZE + init_bytes)
        } else {
            file.metadata().map_err(Error::OpenFailed)?.len() as usize
        };

        if let Some(c) = ceiling {
            if map_len > c {
                return Err(Error::SizeLimit);
            }
        }

        if create {
            file.set_len(map_len as u64).map_err(Error::OpenFailed)?;
        }

        let base = map_fixed(&file, base_addr, map_len, flags.contains(OpenFlags::FIXED))?;

        let mut arena = Arena {
            file,
            path,
            base,
            mapped_len: map_len,
            ceiling,
            lock_count: if flags.contains(OpenFlags::LOCK) { 1 } else { 0 },
            readonly: flags.contains(OpenFlags::READONLY),
        };

        if create {
            let header = ArenaHeader::new(page_round(HEADER_SIZE) as u32, map_len as u32);
            unsafe { header.write_at(arena.base) };
        } else {
            let header = unsafe { ArenaHeader::read_at(arena.base) };
            header.validate(flags.contains(OpenFlags::STRICT))?;
            if (header.dm_size as usize) > arena.mapped_len {
                arena.grow_mapping(header.dm_size as usize)?;
            }
        }

        Ok(arena)
    }

    fn header(&self) -> &ArenaHeader {
        unsafe { &*(self.base as *const ArenaHeader) }
    }

    fn header_mut(&mut self) -> &mut ArenaHeader {
        unsafe { &mut *(self.base as *mut ArenaHeader) }
    }

    pub fn dm_top(&self) -> u32 {
        self.header().dm_top
    }

    pub fn dm_size(&self) -> u32 {
        self.header().dm_size
    }

    pub fn allocator_root(&self) -> Offset {
        Offset::new(self.header().allocator_root)
    }

    pub fn set_allocator_root(&mut self, root: Offset) {
        self.header_mut().allocator_root = root.get();
    }

    /// Translates a file-relative offset to a pointer into the mapping.
    /// Total and bijective with [`Arena::offset`]; `Offset::NULL` maps to
    /// a null pointer.
    pub fn pointer<T>(&self, offset: Offset) -> *mut T {
        if offset.is_null() {
            return ptr::null_mut();
        }
        unsafe { self.base.add(offset.get() as usize) as *mut T }
    }

    /// Translates a pointer previously returned by [`Arena::pointer`] back
    /// to its offset.
    pub fn offset<T>(&self, ptr: *const T) -> Offset {
        if ptr.is_null() {
            return Offset::NULL;
        }
        let addr = ptr as usize;
        let base = self.base as usize;
        debug_assert!(addr >= base && addr < base + self.mapped_len);
        Offset::new((addr - base) as u32)
    }

    /// Page-rounds `nbytes`, growing the mapping via `ftruncate` + re-map
    /// if needed, and returns the previous `dm_top` (the newly allocated
    /// block's offset). `allocate(arena, 0)` is well-defined: it still
    /// advances nothing and returns the current `dm_top`.
    pub fn allocate(&mut self, nbytes: usize) -> Result<Offset> {
        let rounded = if nbytes == 0 { 0 } else { page_round(nbytes) };
        let top = self.dm_top() as usize;
        let new_top = top + rounded;

        if let Some(ceiling) = self.ceiling {
            if new_top > ceiling {
                return Err(Error::SizeLimit);
            }
        }

        if new_top > self.dm_size() as usize {
            self.grow_mapping(new_top)?;
        }

        self.header_mut().dm_top = new_top as u32;
        Ok(Offset::new(top as u32))
    }

    /// Returns a previously allocated block to the arena's free list,
    /// threading the link through the block's own first bytes.
    pub fn free(&mut self, ptr_offset: Offset, nbytes: usize) {
        if ptr_offset.is_null() || nbytes < 8 {
            return;
        }
        let head = self.allocator_root();
        unsafe {
            let block = self.pointer::<u8>(ptr_offset);
            std::ptr::write_unaligned(block as *mut u32, head.get());
            std::ptr::write_unaligned(block.add(4) as *mut u32, nbytes as u32);
        }
        self.set_allocator_root(ptr_offset);
    }

    fn grow_mapping(&mut self, min_len: usize) -> Result<()> {
        let new_len = page_round(min_len);
        if let Some(ceiling) = self.ceiling {
            if new_len > ceiling {
                return Err(Error::SizeLimit);
            }
        }
        self.file
            .set_len(new_len as u64)
            .map_err(Error::OpenFailed)?;

        unsafe {
            if libc::munmap(self.base as *mut libc::c_void, self.mapped_len) != 0 {
                return Err(Error::MapFailed(std::io::Error::last_os_error()));
            }
        }
        let new_base = map_fixed(&self.file, self.base as usize, new_len, true)?;
        if new_base != self.base {
            return Err(Error::MapMismatch);
        }
        self.mapped_len = new_len;
        self.header_mut().dm_size = new_len as u32;
        Ok(())
    }

    /// Re-entrant `flock`; the first acquisition takes the OS lock and
    /// reconciles the mapping size with any growth performed by another
    /// writer since the previous lock, subsequent acquisitions just bump a
    /// counter.
    pub fn lock(&mut self) -> Result<()> {
        if self.lock_count == 0 {
            lock_fd(&self.file)?;
            let on_disk_len = self.file.metadata().map_err(Error::OpenFailed)?.len() as usize;
            if on_disk_len > self.mapped_len {
                self.grow_mapping(on_disk_len)?;
            }
        }
        self.lock_count += 1;
        Ok(())
    }

    pub fn unlock(&mut self) -> Result<()> {
        if self.lock_count > 0 {
            self.lock_count -= 1;
            if self.lock_count == 0 {
                unsafe {
                    if libc::flock(self.file.as_raw_fd(), libc::LOCK_UN) != 0 {
                        return Err(Error::LockFailed(std::io::Error::last_os_error()));
                    }
                }
            }
        }
        Ok(())
    }

    /// Requests asynchronous flush of dirty pages; a no-op on read-only
    /// arenas.
    pub fn sync(&self) -> Result<()> {
        if self.readonly {
            return Ok(());
        }
        unsafe {
            if libc::msync(
                self.base as *mut libc::c_void,
                self.mapped_len,
                libc::MS_ASYNC,
            ) != 0
            {
                return Err(Error::MapFailed(std::io::Error::last_os_error()));
            }
        }
        Ok(())
    }

    pub fn path(&self) -> &Path {
        &self.path
    }

    /// Unmaps and releases the lock. When `reserve` is set, the address
    /// range is immediately re-claimed with an anonymous, no-access mapping
    /// so the kernel can't hand it to an unrelated allocation before a
    /// sibling arena reopens at the same nominal base.
    pub fn close(mut self, reserve: bool) -> Result<()> {
        self.teardown(reserve)
    }

    fn teardown(&mut self, reserve: bool) -> Result<()> {
        if self.base.is_null() {
            return Ok(());
        }
        unsafe {
            if libc::munmap(self.base as *mut libc::c_void, self.mapped_len) != 0 {
                return Err(Error::MapFailed(std::io::Error::last_os_error()));
            }
            if reserve {
                libc::mmap(
                    self.base as *mut libc::c_void,
                    self.mapped_len,
                    libc::PROT_NONE,
                    libc::MAP_PRIVATE | libc::MAP_ANONYMOUS | libc::MAP_FIXED,
                    -1,
                    0,
                );
            }
        }
        while self.lock_count > 0 {
            self.unlock()?;
        }
        self.base = ptr::null_mut();
        Ok(())
    }
}

impl Drop for Arena {
    fn drop(&mut self) {
        let _ = self.teardown(false);
    }
}

fn lock_fd(file: &File) -> Result<()> {
    unsafe {
        if libc::flock(file.as_raw_fd(), libc::LOCK_EX) != 0 {
            return Err(Error::LockFailed(std::io::Error::last_os_error()));
        }
    }
    Ok(())
}

fn map_fixed(file: &File, base_addr: usize, len: usize, fixed: bool) -> Result<*mut u8> {
    let flags = if fixed && base_addr != 0 {
        libc::MAP_SHARED | libc::MAP_FIXED
    } else {
        libc::MAP_SHARED
    };
    let addr = unsafe {
        libc::mmap(
            base_addr as *mut libc::c_void,
            len,
            libc::PROT_READ | libc::PROT_WRITE,
            flags,
            file.as_raw_fd(),
            0,
        )
    };
    if addr == libc::MAP_FAILED {
        return Err(Error::MapFailed(std::io::Error::last_os_error()));
    }
    if fixed && base_addr != 0 && addr as usize != base_addr {
        unsafe {
            libc::munmap(addr, len);
        }
        return Err(Error::MapMismatch);
    }
    Ok(addr as *mut u8)
}
