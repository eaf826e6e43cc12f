//! POSIX shared-memory regions
//!
//! A [`SharedRegion`] owns one mapping. Dropping it unmaps; removing the
//! name from the namespace is a separate, explicit [`SharedRegion::unlink`]
//! so the master decides exactly when that happens.

use std::ffi::c_void;
use std::fs::File;
use std::num::NonZeroUsize;
use std::ptr::NonNull;

use nix::errno::Errno;
use nix::fcntl::OFlag;
use nix::sys::mman::{MapFlags, ProtFlags, mmap, mmap_anonymous, munmap, shm_open, shm_unlink};
use nix::sys::stat::Mode;
use nix::unistd::ftruncate;
use tracing::{debug, warn};

use crate::error::{StoreError, StoreResult};

/// How a process maps a region
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Access {
    ReadOnly,
    ReadWrite,
}

impl Access {
    fn prot(self) -> ProtFlags {
        match self {
            Access::ReadOnly => ProtFlags::PROT_READ,
            Access::ReadWrite => ProtFlags::PROT_READ | ProtFlags::PROT_WRITE,
        }
    }

    fn oflag(self) -> OFlag {
        match self {
            Access::ReadOnly => OFlag::O_RDONLY,
            Access::ReadWrite => OFlag::O_RDWR,
        }
    }
}

/// One mapped shared-memory region
#[derive(Debug)]
pub struct SharedRegion {
    /// Object name, or `<anonymous>` for in-process mappings
    label: String,
    ptr: NonNull<c_void>,
    len: usize,
    access: Access,
}

// The region is plain memory; every access to its contents goes through the
// semaphore protocol in `gate` and `sync`.
unsafe impl Send for SharedRegion {}
unsafe impl Sync for SharedRegion {}

impl SharedRegion {
    /// Create a new named object, size it to `len` and map it read-write
    ///
    /// Fails with [`StoreError::AlreadyExists`] if the name is taken; an
    /// existing object is never resized or touched. The mapping is
    /// zero-filled. If any step after `shm_open` fails, the name is unlinked
    /// again before the error is returned.
    pub fn create(name: &str, len: usize) -> StoreResult<Self> {
        debug!(name, len, "SharedRegion::create: called");
        let size = non_zero(len)?;

        let flags = OFlag::O_CREAT | OFlag::O_EXCL | OFlag::O_RDWR;
        let fd = shm_open(name, flags, Mode::from_bits_truncate(0o666)).map_err(|source| match source {
            Errno::EEXIST => StoreError::AlreadyExists { name: name.to_string() },
            source => StoreError::Create {
                name: name.to_string(),
                source,
            },
        })?;
        let file = File::from(fd);

        let mapped = ftruncate(&file, len as libc::off_t)
            .map_err(|source| StoreError::Resize {
                name: name.to_string(),
                len,
                source,
            })
            .and_then(|_| {
                // SAFETY: fresh mapping of an object we just sized; no other reference exists yet
                unsafe { mmap(None, size, Access::ReadWrite.prot(), MapFlags::MAP_SHARED, &file, 0) }.map_err(
                    |source| StoreError::Map {
                        name: name.to_string(),
                        source,
                    },
                )
            });

        let ptr = match mapped {
            Ok(ptr) => ptr,
            Err(e) => {
                if let Err(unlink_err) = shm_unlink(name) {
                    warn!(name, error = %unlink_err, "Failed to unlink half-created region");
                }
                return Err(e);
            }
        };

        // SAFETY: ptr covers exactly len writable bytes
        unsafe { std::ptr::write_bytes(ptr.as_ptr().cast::<u8>(), 0, len) };

        debug!(name, len, "SharedRegion::create: mapped");
        Ok(Self {
            label: name.to_string(),
            ptr,
            len,
            access: Access::ReadWrite,
        })
    }

    /// Map an existing named object
    ///
    /// Fails with [`StoreError::NotCreated`] if the object does not exist,
    /// and with [`StoreError::InvalidLayout`] if it is smaller than `len`.
    pub fn open(name: &str, len: usize, access: Access) -> StoreResult<Self> {
        debug!(name, len, ?access, "SharedRegion::open: called");
        let size = non_zero(len)?;

        let fd = shm_open(name, access.oflag(), Mode::empty()).map_err(|source| match source {
            Errno::ENOENT => StoreError::NotCreated { name: name.to_string() },
            source => StoreError::Open {
                name: name.to_string(),
                source,
            },
        })?;
        let file = File::from(fd);

        let actual = file
            .metadata()
            .map(|m| m.len() as usize)
            .map_err(|e| StoreError::Open {
                name: name.to_string(),
                source: e.raw_os_error().map(Errno::from_raw).unwrap_or(Errno::EIO),
            })?;
        if actual < len {
            return Err(StoreError::InvalidLayout(format!(
                "{} is {} bytes, expected at least {}",
                name, actual, len
            )));
        }

        // SAFETY: the object holds at least len bytes
        let ptr = unsafe { mmap(None, size, access.prot(), MapFlags::MAP_SHARED, &file, 0) }.map_err(|source| {
            StoreError::Map {
                name: name.to_string(),
                source,
            }
        })?;

        debug!(name, len, "SharedRegion::open: mapped");
        Ok(Self {
            label: name.to_string(),
            ptr,
            len,
            access,
        })
    }

    /// Map zero-filled anonymous shared memory
    ///
    /// The mapping is inherited across `fork` and visible to every thread,
    /// which makes it the in-process stand-in for a named region.
    pub fn anonymous(len: usize) -> StoreResult<Self> {
        debug!(len, "SharedRegion::anonymous: called");
        let size = non_zero(len)?;
        // SAFETY: fresh anonymous mapping, zero-filled by the kernel
        let ptr = unsafe { mmap_anonymous(None, size, Access::ReadWrite.prot(), MapFlags::MAP_SHARED) }.map_err(
            |source| StoreError::Map {
                name: "<anonymous>".to_string(),
                source,
            },
        )?;

        Ok(Self {
            label: "<anonymous>".to_string(),
            ptr,
            len,
            access: Access::ReadWrite,
        })
    }

    /// Remove a name from the shared-memory namespace
    ///
    /// Existing mappings stay valid. A name that is already gone is not an error.
    pub fn unlink(name: &str) -> StoreResult<()> {
        debug!(name, "SharedRegion::unlink: called");
        match shm_unlink(name) {
            Ok(()) => Ok(()),
            Err(Errno::ENOENT) => {
                debug!(name, "SharedRegion::unlink: already gone");
                Ok(())
            }
            Err(source) => Err(StoreError::Unlink {
                name: name.to_string(),
                source,
            }),
        }
    }

    /// Start of the mapping
    pub fn as_ptr(&self) -> *mut u8 {
        self.ptr.as_ptr().cast()
    }

    /// Mapped length in bytes
    pub fn len(&self) -> usize {
        self.len
    }

    pub fn is_empty(&self) -> bool {
        self.len == 0
    }

    pub fn access(&self) -> Access {
        self.access
    }

    /// Object name this region was opened from
    pub fn label(&self) -> &str {
        &self.label
    }
}

impl Drop for SharedRegion {
    fn drop(&mut self) {
        debug!(label = %self.label, len = self.len, "SharedRegion::drop: unmapping");
        // SAFETY: ptr/len describe the mapping created in the constructor
        if let Err(e) = unsafe { munmap(self.ptr, self.len) } {
            warn!(label = %self.label, error = %e, "Failed to unmap shared region");
        }
    }
}

fn non_zero(len: usize) -> StoreResult<NonZeroUsize> {
    NonZeroUsize::new(len).ok_or_else(|| StoreError::InvalidLayout("zero-length region".to_string()))
}

#[cfg(test)]
mod tests {
    use super::*;
    use serial_test::serial;

    fn unique_name(tag: &str) -> String {
        format!("/gs-test-{}-{}", tag, uuid::Uuid::now_v7().simple())
    }

    #[test]
    fn test_anonymous_region_is_zeroed() {
        let region = SharedRegion::anonymous(64).unwrap();
        let bytes = unsafe { std::slice::from_raw_parts(region.as_ptr(), region.len()) };
        assert!(bytes.iter().all(|&b| b == 0));
        assert_eq!(region.access(), Access::ReadWrite);
    }

    #[test]
    fn test_zero_length_rejected() {
        assert!(matches!(SharedRegion::anonymous(0), Err(StoreError::InvalidLayout(_))));
    }

    #[test]
    #[serial]
    fn test_open_before_create_is_not_created() {
        let name = unique_name("missing");
        let err = SharedRegion::open(&name, 64, Access::ReadOnly).unwrap_err();
        assert!(err.is_not_created());
    }

    #[test]
    #[serial]
    fn test_create_open_and_unlink() {
        let name = unique_name("roundtrip");
        let owner = SharedRegion::create(&name, 128).unwrap();
        unsafe { *owner.as_ptr().add(7) = 42 };

        let reader = SharedRegion::open(&name, 128, Access::ReadOnly).unwrap();
        assert_eq!(unsafe { *reader.as_ptr().add(7) }, 42);
        assert_eq!(reader.label(), name);

        SharedRegion::unlink(&name).unwrap();
        // Mapping survives the unlink
        assert_eq!(unsafe { *reader.as_ptr().add(7) }, 42);
        assert!(SharedRegion::open(&name, 128, Access::ReadOnly).unwrap_err().is_not_created());

        // Second unlink is a no-op
        SharedRegion::unlink(&name).unwrap();
    }

    #[test]
    #[serial]
    fn test_create_refuses_existing_name() {
        let name = unique_name("taken");
        let owner = SharedRegion::create(&name, 4096).unwrap();
        unsafe { *owner.as_ptr().add(100) = 9 };

        let err = SharedRegion::create(&name, 64).unwrap_err();
        assert!(err.is_already_exists(), "{}", err);
        assert!(err.to_string().contains(&name));

        // Neither wiped, resized nor unlinked by the failed create
        assert_eq!(unsafe { *owner.as_ptr().add(100) }, 9);
        let reader = SharedRegion::open(&name, 4096, Access::ReadOnly).unwrap();
        assert_eq!(unsafe { *reader.as_ptr().add(100) }, 9);

        SharedRegion::unlink(&name).unwrap();
    }

    #[test]
    #[serial]
    fn test_open_rejects_short_object() {
        let name = unique_name("short");
        let _owner = SharedRegion::create(&name, 64).unwrap();
        let err = SharedRegion::open(&name, 4096, Access::ReadOnly).unwrap_err();
        assert!(matches!(err, StoreError::InvalidLayout(_)));
        SharedRegion::unlink(&name).unwrap();
    }
}
