//! Host memory buffers and dirty-page tracking.
//!
//! This module provides the backing storage for ram-kind ranges. On Unix
//! systems buffers use `mmap`, which gives lazy allocation for large RAM
//! sizes and stable host pointers for the TLB fast paths; shared flash
//! drives map their backing file with `MAP_SHARED` so stores write through.
//! A per-range bitmap tracks which 4 KiB pages have been written since the
//! Merkle tree last hashed them.

use std::path::Path;
use std::slice;

use crate::common::constants::PAGE_SHIFT;
use crate::common::error::MachineError;

/// A host memory buffer with a stable base pointer.
///
/// On Unix systems this uses `mmap` (anonymous, or file-backed for shared
/// mappings); elsewhere it falls back to a leaked `Vec`. The base pointer
/// never moves for the lifetime of the buffer, which the TLB relies on.
pub struct HostBuffer {
    ptr: *mut u8,
    size: usize,
    kind: BufferKind,
}

#[derive(Clone, Copy, PartialEq, Eq)]
enum BufferKind {
    #[cfg(unix)]
    Mmap,
    #[cfg_attr(unix, allow(dead_code))]
    Vec,
}

// SAFETY: the buffer is plain memory owned by exactly one machine; the
// machine itself is single-threaded and moves between threads whole.
unsafe impl Send for HostBuffer {}
// SAFETY: as above; shared references only hand out reads.
unsafe impl Sync for HostBuffer {}

impl std::fmt::Debug for HostBuffer {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("HostBuffer").field("size", &self.size).finish()
    }
}

impl HostBuffer {
    /// Allocates a zero-filled buffer of the given size.
    ///
    /// # Errors
    ///
    /// Returns an I/O error if the host allocation fails.
    pub fn new(size: usize) -> Result<Self, MachineError> {
        #[cfg(unix)]
        {
            use std::ptr;
            // SAFETY: anonymous mapping with no file descriptor; the result
            // is checked against MAP_FAILED before use.
            let ptr = unsafe {
                libc::mmap(
                    ptr::null_mut(),
                    size,
                    libc::PROT_READ | libc::PROT_WRITE,
                    libc::MAP_PRIVATE | libc::MAP_ANONYMOUS,
                    -1,
                    0,
                )
            };
            if ptr == libc::MAP_FAILED {
                return Err(MachineError::Io(std::io::Error::last_os_error()));
            }
            Ok(Self {
                ptr: ptr.cast::<u8>(),
                size,
                kind: BufferKind::Mmap,
            })
        }

        #[cfg(not(unix))]
        {
            let mut vec = vec![0u8; size];
            let ptr = vec.as_mut_ptr();
            std::mem::forget(vec);
            Ok(Self {
                ptr,
                size,
                kind: BufferKind::Vec,
            })
        }
    }

    /// Maps a backing file shared, so writes reach the file.
    ///
    /// The file is grown to `size` bytes if shorter. Only available on Unix
    /// hosts; other platforms reject shared mappings at configuration time.
    ///
    /// # Errors
    ///
    /// Returns an I/O error if the file cannot be opened, grown, or mapped.
    #[cfg(unix)]
    pub fn map_shared(path: &Path, size: usize) -> Result<Self, MachineError> {
        use std::fs::OpenOptions;
        use std::os::unix::io::AsRawFd;

        let file = OpenOptions::new().read(true).write(true).open(path)?;
        if file.metadata()?.len() < size as u64 {
            file.set_len(size as u64)?;
        }
        // SAFETY: fd is valid for the duration of the call; mmap keeps its
        // own reference to the underlying file. Checked against MAP_FAILED.
        let ptr = unsafe {
            libc::mmap(
                std::ptr::null_mut(),
                size,
                libc::PROT_READ | libc::PROT_WRITE,
                libc::MAP_SHARED,
                file.as_raw_fd(),
                0,
            )
        };
        if ptr == libc::MAP_FAILED {
            return Err(MachineError::Io(std::io::Error::last_os_error()));
        }
        Ok(Self {
            ptr: ptr.cast::<u8>(),
            size,
            kind: BufferKind::Mmap,
        })
    }

    /// Rejects shared mappings on hosts without `mmap`.
    #[cfg(not(unix))]
    pub fn map_shared(_path: &Path, _size: usize) -> Result<Self, MachineError> {
        Err(MachineError::InvalidConfig(
            "shared flash drives require a Unix host".to_owned(),
        ))
    }

    /// Returns the size of the buffer in bytes.
    pub fn len(&self) -> usize {
        self.size
    }

    /// Returns whether the buffer is empty.
    pub fn is_empty(&self) -> bool {
        self.size == 0
    }

    /// Returns the stable base pointer.
    pub fn as_ptr(&self) -> *const u8 {
        self.ptr
    }

    /// Returns the stable mutable base pointer.
    pub fn as_mut_ptr(&self) -> *mut u8 {
        self.ptr
    }

    /// Borrows a slice of the buffer.
    ///
    /// # Panics
    ///
    /// Panics if the requested window exceeds the buffer.
    pub fn slice(&self, offset: usize, len: usize) -> &[u8] {
        assert!(offset.checked_add(len).is_some_and(|end| end <= self.size));
        // SAFETY: bounds asserted above; the mapping is valid for self.size.
        unsafe { slice::from_raw_parts(self.ptr.add(offset), len) }
    }

    /// Borrows a mutable slice of the buffer.
    ///
    /// # Panics
    ///
    /// Panics if the requested window exceeds the buffer.
    pub fn slice_mut(&mut self, offset: usize, len: usize) -> &mut [u8] {
        assert!(offset.checked_add(len).is_some_and(|end| end <= self.size));
        // SAFETY: bounds asserted above; &mut self guarantees exclusivity.
        unsafe { slice::from_raw_parts_mut(self.ptr.add(offset), len) }
    }

    /// Copies `data` into the buffer at `offset`.
    ///
    /// # Panics
    ///
    /// Panics if the copy would exceed the buffer.
    pub fn write_slice(&mut self, offset: usize, data: &[u8]) {
        self.slice_mut(offset, data.len()).copy_from_slice(data);
    }
}

impl Drop for HostBuffer {
    fn drop(&mut self) {
        match self.kind {
            #[cfg(unix)]
            BufferKind::Mmap => {
                // SAFETY: ptr/size came from a successful mmap of this size.
                unsafe {
                    let _ = libc::munmap(self.ptr.cast(), self.size);
                }
            }
            BufferKind::Vec => {
                // SAFETY: ptr/size came from a Vec forgotten at allocation.
                unsafe {
                    drop(Vec::from_raw_parts(self.ptr, self.size, self.size));
                }
            }
        }
    }
}

/// Tracks which 4 KiB pages of a ram range have been written since the
/// Merkle tree last hashed them.
///
/// All pages start dirty so the first tree update hashes the initial
/// contents.
#[derive(Clone, Debug)]
pub struct DirtyPageMap {
    words: Vec<u64>,
    page_count: u64,
}

impl DirtyPageMap {
    /// Creates a map for a range of `length` bytes, with every page dirty.
    pub fn new(length: u64) -> Self {
        let page_count = length >> PAGE_SHIFT;
        let words = vec![u64::MAX; (page_count as usize).div_ceil(64)];
        Self { words, page_count }
    }

    /// Marks the page containing the range-relative `offset` dirty.
    #[inline]
    pub fn mark(&mut self, offset: u64) {
        let page = offset >> PAGE_SHIFT;
        self.words[(page / 64) as usize] |= 1 << (page % 64);
    }

    /// Returns whether the given page index is dirty.
    pub fn is_dirty(&self, page: u64) -> bool {
        (self.words[(page / 64) as usize] >> (page % 64)) & 1 != 0
    }

    /// Marks every page clean.
    pub fn clear(&mut self) {
        self.words.fill(0);
    }

    /// Marks every page dirty.
    pub fn mark_all(&mut self) {
        self.words.fill(u64::MAX);
    }

    /// Returns the number of pages covered by the map.
    pub fn page_count(&self) -> u64 {
        self.page_count
    }

    /// Iterates over the indices of dirty pages.
    pub fn dirty_pages(&self) -> impl Iterator<Item = u64> + '_ {
        (0..self.page_count).filter(|&p| self.is_dirty(p))
    }
}
