//! Linux-specific shared memory operations

use crate::descriptor::RingFlags;
use memmap2::{MmapMut, MmapOptions};
use nix::unistd::getpid;
use std::fs::OpenOptions;
use std::io;
use std::os::unix::fs::OpenOptionsExt;
use std::path::Path;
use std::time::{SystemTime, UNIX_EPOCH};
use tracing::warn;

/// Per-process mapping options derived from the ring's backing flags
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct MappingOptions {
    /// Prefault the mapping and lock it into RAM
    pub locked: bool,
    /// Advise transparent huge pages for the mapping
    pub huge_pages: bool,
}

impl MappingOptions {
    /// Options requested by `flags`
    pub fn from_flags(flags: RingFlags) -> Self {
        Self {
            locked: flags.contains(RingFlags::LOCKED_PAGES),
            huge_pages: flags.contains(RingFlags::HUGE_PAGES),
        }
    }
}

/// Create a new segment file of `size` bytes and map it shared
///
/// Fails `AlreadyExists` if `path` is taken.
pub fn create_segment_mmap(
    path: &Path,
    size: usize,
    options: &MappingOptions,
) -> io::Result<MmapMut> {
    let file = OpenOptions::new()
        .create_new(true)
        .read(true)
        .write(true)
        .mode(0o600) // Owner read/write only
        .open(path)?;

    file.set_len(size as u64)?;

    map_file(&file, options)
}

/// Map an existing segment file shared
///
/// Backing options are applied separately with [`apply_backing`] once the
/// header has been validated and the ring's flags are known.
pub fn attach_segment_mmap(path: &Path) -> io::Result<MmapMut> {
    let file = OpenOptions::new().read(true).write(true).open(path)?;
    map_file(&file, &MappingOptions::default())
}

fn map_file(file: &std::fs::File, options: &MappingOptions) -> io::Result<MmapMut> {
    let mut mmap_options = MmapOptions::new();
    if options.locked {
        mmap_options.populate();
    }

    // SAFETY: the segment file is only resized by its creator before it is
    // linked into the registry, so the mapping never outlives its backing.
    let mmap = unsafe { mmap_options.map_mut(file)? };
    apply_backing(&mmap, options);

    Ok(mmap)
}

/// Apply huge-page advice and page locking. Failures are logged, not fatal.
pub fn apply_backing(mmap: &MmapMut, options: &MappingOptions) {
    if options.huge_pages {
        if let Err(e) = enable_huge_pages(mmap) {
            warn!("madvise(MADV_HUGEPAGE) failed: {}", e);
        }
    }
    if options.locked {
        if let Err(e) = lock_pages(mmap) {
            warn!("mlock failed, pages may be swapped: {}", e);
        }
    }
}

/// Advise the kernel to back the mapping with huge pages
pub fn enable_huge_pages(mmap: &MmapMut) -> io::Result<()> {
    // SAFETY: address and length describe a live mapping owned by `mmap`.
    let result = unsafe {
        libc::madvise(
            mmap.as_ptr() as *mut libc::c_void,
            mmap.len(),
            libc::MADV_HUGEPAGE,
        )
    };

    if result == 0 {
        Ok(())
    } else {
        Err(io::Error::last_os_error())
    }
}

/// Lock the mapping into RAM
pub fn lock_pages(mmap: &MmapMut) -> io::Result<()> {
    // SAFETY: address and length describe a live mapping owned by `mmap`.
    let result = unsafe { libc::mlock(mmap.as_ptr() as *const libc::c_void, mmap.len()) };

    if result == 0 {
        Ok(())
    } else {
        Err(io::Error::last_os_error())
    }
}

/// Check if process is alive using kill(pid, 0)
pub fn is_process_alive(pid: u32) -> bool {
    use nix::sys::signal::kill;
    use nix::unistd::Pid;

    let Ok(raw) = i32::try_from(pid) else {
        return false;
    };
    if raw <= 0 {
        return false;
    }

    match kill(Pid::from_raw(raw), None) {
        Ok(_) => true,
        Err(nix::Error::ESRCH) => false, // No such process
        Err(nix::Error::EPERM) => true,  // Process exists but no permission to signal
        Err(_) => false,
    }
}

/// Get current process ID
pub fn get_current_pid() -> u32 {
    getpid().as_raw() as u32
}

/// Wall-clock time in nanoseconds since the Unix epoch
pub fn now_ns() -> u64 {
    SystemTime::now()
        .duration_since(UNIX_EPOCH)
        .map(|d| d.as_nanos() as u64)
        .unwrap_or(0)
}
