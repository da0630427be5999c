//! POSIX attribute resolution.
//!
//! The engine room of enrichment: given an event's opaque id, obtain a
//! file descriptor for the live object under the mountpoint, then pull
//! whatever the request asked for off that descriptor. Ids are opened
//! through the kernel's file-handle interface, which needs nothing but
//! the mountpoint descriptor and works for objects whose path we do not
//! know (or which have been renamed since the event was recorded).

use std::fs::OpenOptions;
use std::io;
use std::os::fd::AsFd;
use std::os::fd::AsRawFd;
use std::os::fd::BorrowedFd;
use std::os::fd::FromRawFd;
use std::os::fd::OwnedFd;
use std::os::fd::RawFd;
use std::os::unix::fs::OpenOptionsExt;
use std::path::Path;
use std::path::PathBuf;

use nix::fcntl::OFlag;

use super::EnrichRequest;
use super::Resolved;
use crate::fsevent::FsEvent;
use crate::fsevent::Id;
use crate::statx::StatxAttrs;
use crate::statx::StatxFields;

/// Largest handle `open_by_handle_at(2)` accepts.
const MAX_HANDLE_SIZE: usize = 128;

/// File-handle type for Lustre FIDs (`linux/fid.h`).
const FILEID_LUSTRE: libc::c_int = 0x97;

/// A mounted filesystem the enricher resolves objects against.
///
/// Holds the mountpoint directory open for the enricher's lifetime;
/// every by-id open is anchored at this descriptor.
#[derive(Debug)]
pub struct Mountpoint {
    path: PathBuf,
    fd: OwnedFd,
}

impl Mountpoint {
    /// Opens the mountpoint directory.
    pub fn open(path: impl AsRef<Path>) -> io::Result<Self> {
        let path = path.as_ref();
        let file = OpenOptions::new()
            .read(true)
            .custom_flags(libc::O_DIRECTORY)
            .open(path)?;
        Ok(Mountpoint {
            path: path.to_owned(),
            fd: file.into(),
        })
    }

    /// The path this mountpoint was opened from.
    pub fn path(&self) -> &Path {
        &self.path
    }

    /// True when the mounted filesystem is a Lustre client.
    pub fn is_lustre(&self) -> io::Result<bool> {
        // Magic `statfs(2)` reports for Lustre superblocks.
        const LUSTRE_SUPER_MAGIC: i64 = 0x0BD0_0BD0;

        let mut stat = std::mem::MaybeUninit::<libc::statfs>::zeroed();
        let rc = unsafe { libc::fstatfs(self.fd.as_raw_fd(), stat.as_mut_ptr()) };
        if rc == -1 {
            return Err(io::Error::last_os_error());
        }
        let stat = unsafe { stat.assume_init() };
        Ok(stat.f_type as i64 == LUSTRE_SUPER_MAGIC)
    }

    pub(crate) fn fd(&self) -> BorrowedFd<'_> {
        self.fd.as_fd()
    }
}

#[repr(C)]
struct RawFileHandle {
    handle_bytes: libc::c_uint,
    handle_type: libc::c_int,
    data: [u8; MAX_HANDLE_SIZE],
}

/// Opens the object an id refers to, anchored at the mount descriptor.
pub(super) fn open_by_id(mount_fd: BorrowedFd<'_>, id: &Id, flags: OFlag) -> io::Result<OwnedFd> {
    let bytes = id.as_bytes();
    if bytes.is_empty() || bytes.len() > MAX_HANDLE_SIZE {
        return Err(io::Error::new(
            io::ErrorKind::InvalidInput,
            format!("id {id} cannot form a file handle"),
        ));
    }
    let mut handle = RawFileHandle {
        handle_bytes: bytes.len() as libc::c_uint,
        handle_type: FILEID_LUSTRE,
        data: [0; MAX_HANDLE_SIZE],
    };
    handle.data[..bytes.len()].copy_from_slice(bytes);

    let fd = unsafe {
        libc::syscall(
            libc::SYS_open_by_handle_at,
            mount_fd.as_raw_fd(),
            &mut handle as *mut RawFileHandle,
            flags.bits(),
        )
    };
    if fd < 0 {
        return Err(io::Error::last_os_error());
    }
    Ok(unsafe { OwnedFd::from_raw_fd(fd as RawFd) })
}

/// Read-only open of an object by id, falling back to a path-only
/// descriptor when the object turns out to be a symlink.
pub(super) fn open_object(mount: &Mountpoint, id: &Id) -> io::Result<OwnedFd> {
    const BASE: OFlag = OFlag::O_RDONLY
        .union(OFlag::O_CLOEXEC)
        .union(OFlag::O_NOFOLLOW);
    match open_by_id(mount.fd(), id, BASE) {
        Err(err) if err.raw_os_error() == Some(libc::ELOOP) => {
            open_by_id(mount.fd(), id, BASE.union(OFlag::O_PATH))
        }
        other => other,
    }
}

/// Synchronous statx on an open descriptor.
pub(super) fn statx_fd(fd: BorrowedFd<'_>, fields: StatxFields) -> io::Result<StatxAttrs> {
    const FLAGS: libc::c_int = libc::AT_STATX_FORCE_SYNC
        | libc::AT_EMPTY_PATH
        | libc::AT_NO_AUTOMOUNT
        | libc::AT_SYMLINK_NOFOLLOW;

    let mut raw = std::mem::MaybeUninit::<libc::statx>::zeroed();
    let rc = unsafe {
        libc::statx(
            fd.as_raw_fd(),
            c"".as_ptr(),
            FLAGS,
            fields.kernel_mask(),
            raw.as_mut_ptr(),
        )
    };
    if rc == -1 {
        return Err(io::Error::last_os_error());
    }
    let raw = unsafe { raw.assume_init() };
    Ok(StatxAttrs::from_raw(&raw))
}

/// Reads the target of the symlink an O_PATH descriptor refers to.
pub(super) fn readlink_fd(fd: BorrowedFd<'_>) -> io::Result<String> {
    let mut buf = vec![0u8; libc::PATH_MAX as usize];
    let len = unsafe {
        libc::readlinkat(
            fd.as_raw_fd(),
            c"".as_ptr(),
            buf.as_mut_ptr().cast(),
            buf.len(),
        )
    };
    if len < 0 {
        return Err(io::Error::last_os_error());
    }
    String::from_utf8(buf[..len as usize].to_vec()).map_err(|_| {
        io::Error::new(
            io::ErrorKind::InvalidData,
            "symlink target is not valid UTF-8",
        )
    })
}

/// Resolves the POSIX half of a request: statx fields and the symlink
/// target.
pub(super) fn resolve(
    mount: &Mountpoint,
    event: &FsEvent,
    request: &EnrichRequest,
    resolved: &mut Resolved,
) -> io::Result<()> {
    if request.statx.is_none() && !request.symlink {
        return Ok(());
    }
    let fd = open_object(mount, event.id())?;
    if let Some(fields) = request.statx {
        resolved.statx = Some(statx_fd(fd.as_fd(), fields)?);
    }
    if request.symlink {
        resolved.symlink = Some(readlink_fd(fd.as_fd())?);
    }
    Ok(())
}
