//! Lustre attribute resolution.
//!
//! Adds what POSIX interfaces cannot answer: where an inode lives in
//! the namespace (FID-to-path, served by the MDT through an ioctl on
//! the mount descriptor) and how a file is striped across OSTs (the
//! layout, read back from the `lustre.lov` virtual xattr).

use std::io;
use std::os::fd::AsFd;
use std::os::fd::AsRawFd;
use std::os::fd::BorrowedFd;

use memchr::memchr;
use smallvec::SmallVec;
use zerocopy::FromBytes;
use zerocopy::Immutable;
use zerocopy::IntoBytes;
use zerocopy::KnownLayout;

use super::EnrichRequest;
use super::Resolved;
use super::posix;
use super::posix::Mountpoint;
use crate::fid::Fid;
use crate::fsevent::FsEvent;
use crate::statx::StatxFields;
use crate::value::Value;

/// Resolves a request with the Lustre extensions, delegating the
/// common parts to the POSIX engine.
pub(super) fn resolve(
    mount: &Mountpoint,
    event: &FsEvent,
    request: &EnrichRequest,
    resolved: &mut Resolved,
) -> io::Result<()> {
    posix::resolve(mount, event, request, resolved)?;

    if request.path {
        // Hardlinks share the target id, so the path is derived from
        // the parent directory's FID plus the entry name.
        let parent_id = event.parent_id().ok_or_else(|| {
            io::Error::new(
                io::ErrorKind::InvalidData,
                format!("path enrichment on an event without a parent (id {})", event.id()),
            )
        })?;
        let name = event.name().ok_or_else(|| {
            io::Error::new(
                io::ErrorKind::InvalidData,
                format!("path enrichment on an event without a name (id {})", event.id()),
            )
        })?;
        let parent_path = fid2path(mount, &Fid::from_id(parent_id)?)?;
        let path = join_parent_path(&parent_path, name)?;
        resolved.pairs.push(("path".to_owned(), Value::String(path)));
    }

    if request.lustre {
        let fd = posix::open_object(mount, event.id())?;
        let attrs = posix::statx_fd(fd.as_fd(), StatxFields::TYPE | StatxFields::MODE)?;
        layout_attrs(fd.as_fd(), attrs.mode, &mut resolved.pairs)?;
    }

    Ok(())
}

/// Glues a resolved parent path and an entry name into an absolute
/// path. A bare `/` parent means the entry lives in the filesystem
/// root.
fn join_parent_path(parent: &str, name: &str) -> io::Result<String> {
    let trimmed = parent.trim_start_matches('/');
    let path = if trimmed.is_empty() {
        format!("/{name}")
    } else {
        format!("/{trimmed}/{name}")
    };
    if path.len() >= libc::PATH_MAX as usize {
        return Err(io::Error::from_raw_os_error(libc::ENAMETOOLONG));
    }
    Ok(path)
}

/// `struct getinfo_fid2path` header; the path buffer follows it.
#[cfg(feature = "lustre")]
#[repr(C)]
#[derive(Debug, Clone, Copy, IntoBytes, Immutable)]
struct GetinfoFid2Path {
    gf_fid: Fid,
    gf_recno: u64,
    gf_linkno: u32,
    gf_pathlen: u32,
}

/// `OBD_IOC_FID2PATH`: `_IOWR('f', 150, long)`.
#[cfg(feature = "lustre")]
const OBD_IOC_FID2PATH: libc::c_ulong =
    (3 << 30) | ((std::mem::size_of::<libc::c_long>() as libc::c_ulong) << 16) | (b'f' as libc::c_ulong) << 8 | 150;

/// Asks the MDT for the path of a FID, relative to the filesystem root.
#[cfg(feature = "lustre")]
fn fid2path(mount: &Mountpoint, fid: &Fid) -> io::Result<String> {
    let header_len = std::mem::size_of::<GetinfoFid2Path>();
    let path_len = libc::PATH_MAX as usize;
    let header = GetinfoFid2Path {
        gf_fid: *fid,
        // Any link number, newest record.
        gf_recno: u64::MAX,
        gf_linkno: 0,
        gf_pathlen: path_len as u32,
    };
    let mut buf = vec![0u8; header_len + path_len];
    buf[..header_len].copy_from_slice(header.as_bytes());

    let rc = unsafe { libc::ioctl(mount.fd().as_raw_fd(), OBD_IOC_FID2PATH, buf.as_mut_ptr()) };
    if rc < 0 {
        return Err(io::Error::last_os_error());
    }

    let path_bytes = &buf[header_len..];
    let end = memchr(0, path_bytes).unwrap_or(path_bytes.len());
    let path = std::str::from_utf8(&path_bytes[..end]).map_err(|_| {
        io::Error::new(
            io::ErrorKind::InvalidData,
            format!("fid2path result for {fid} is not valid UTF-8"),
        )
    })?;
    // The root FID resolves to nothing on some servers.
    if path.is_empty() {
        Ok("/".to_owned())
    } else {
        Ok(path.to_owned())
    }
}

#[cfg(not(feature = "lustre"))]
fn fid2path(_mount: &Mountpoint, fid: &Fid) -> io::Result<String> {
    Err(io::Error::new(
        io::ErrorKind::Unsupported,
        format!("cannot resolve {fid}: this build lacks Lustre support"),
    ))
}

const LOV_USER_MAGIC_V1: u32 = 0x0BD1_0BD0;
const LOV_USER_MAGIC_V3: u32 = 0x0BD3_0BD0;

/// `struct lov_user_md_v1`; v3 appends the pool name.
#[repr(C)]
#[derive(Debug, Clone, Copy, FromBytes, IntoBytes, KnownLayout, Immutable)]
struct LovUserMd {
    lmm_magic: u32,
    lmm_pattern: u32,
    lmm_object_id: u64,
    lmm_object_seq: u64,
    lmm_stripe_size: u32,
    lmm_stripe_count: u16,
    lmm_stripe_offset: u16,
}

#[repr(C)]
#[derive(Debug, Clone, Copy, FromBytes, KnownLayout, Immutable)]
struct PoolName {
    name: [u8; 16],
}

/// Decodes the layout of an open object into attribute pairs.
///
/// Only files and directories carry a layout; other object kinds, and
/// objects on filesystems that do not know the xattr, yield nothing.
fn layout_attrs(
    fd: BorrowedFd<'_>,
    mode: u16,
    pairs: &mut SmallVec<[(String, Value); 4]>,
) -> io::Result<()> {
    let file_type = u32::from(mode) & libc::S_IFMT;
    if file_type != libc::S_IFREG && file_type != libc::S_IFDIR {
        return Ok(());
    }

    let mut buf = vec![0u8; 4096];
    let len = unsafe {
        libc::fgetxattr(
            fd.as_raw_fd(),
            c"lustre.lov".as_ptr(),
            buf.as_mut_ptr().cast(),
            buf.len(),
        )
    };
    if len < 0 {
        let err = io::Error::last_os_error();
        return match err.raw_os_error() {
            // No layout, or not a Lustre object: nothing to report.
            Some(libc::ENODATA) | Some(libc::EOPNOTSUPP) => Ok(()),
            _ => Err(err),
        };
    }
    decode_layout(&buf[..len as usize], pairs)
}

/// Decodes a raw `lov_user_md` blob into attribute pairs.
fn decode_layout(raw: &[u8], pairs: &mut SmallVec<[(String, Value); 4]>) -> io::Result<()> {
    let (md, rest) = match LovUserMd::read_from_prefix(raw) {
        Ok(parsed) => parsed,
        Err(_) => {
            return Err(io::Error::new(
                io::ErrorKind::InvalidData,
                "short lustre.lov xattr",
            ));
        }
    };

    match md.lmm_magic {
        LOV_USER_MAGIC_V1 | LOV_USER_MAGIC_V3 => {
            pairs.push((
                "stripe_count".to_owned(),
                Value::UInt32(u32::from(md.lmm_stripe_count)),
            ));
            pairs.push(("stripe_size".to_owned(), Value::UInt32(md.lmm_stripe_size)));
            pairs.push(("pattern".to_owned(), Value::UInt32(md.lmm_pattern)));
            if md.lmm_magic == LOV_USER_MAGIC_V3 {
                if let Ok((pool, _)) = PoolName::read_from_prefix(rest) {
                    let end = memchr(0, &pool.name).unwrap_or(pool.name.len());
                    if end > 0 {
                        if let Ok(name) = std::str::from_utf8(&pool.name[..end]) {
                            pairs.push(("pool".to_owned(), Value::from(name)));
                        }
                    }
                }
            }
        }
        // Composite and foreign layouts are passed along undecoded.
        _ => pairs.push(("lov".to_owned(), Value::Binary(raw.to_vec()))),
    }
    Ok(())
}

#[cfg(test)]
mod test {
    use super::*;
    use smallvec::smallvec;

    #[test]
    fn join_handles_the_root_parent() {
        assert_eq!(join_parent_path("/", "f").unwrap(), "/f");
    }

    #[test]
    fn join_handles_a_nested_parent() {
        assert_eq!(join_parent_path("/a/b", "f").unwrap(), "/a/b/f");
        // fid2path output without a leading slash means the same thing.
        assert_eq!(join_parent_path("a/b", "f").unwrap(), "/a/b/f");
    }

    #[test]
    fn join_bounds_the_result() {
        let long = "x".repeat(libc::PATH_MAX as usize);
        assert_eq!(
            join_parent_path("/", &long).unwrap_err().raw_os_error(),
            Some(libc::ENAMETOOLONG)
        );
    }

    fn v1_layout(stripe_count: u16, stripe_size: u32) -> LovUserMd {
        LovUserMd {
            lmm_magic: LOV_USER_MAGIC_V1,
            lmm_pattern: 1,
            lmm_object_id: 0,
            lmm_object_seq: 0,
            lmm_stripe_size: stripe_size,
            lmm_stripe_count: stripe_count,
            lmm_stripe_offset: 0,
        }
    }

    #[test]
    fn layout_decoding_recognizes_v1() {
        let md = v1_layout(4, 1 << 20);
        let mut pairs: SmallVec<[(String, Value); 4]> = smallvec![];
        decode_layout(md.as_bytes(), &mut pairs).unwrap();
        assert_eq!(
            pairs.as_slice(),
            [
                ("stripe_count".to_owned(), Value::UInt32(4)),
                ("stripe_size".to_owned(), Value::UInt32(1 << 20)),
                ("pattern".to_owned(), Value::UInt32(1)),
            ]
        );
    }

    #[test]
    fn layout_decoding_recognizes_a_v3_pool() {
        let mut md = v1_layout(1, 4 << 20);
        md.lmm_magic = LOV_USER_MAGIC_V3;
        let mut raw = md.as_bytes().to_vec();
        let mut pool = [0u8; 16];
        pool[..4].copy_from_slice(b"fast");
        raw.extend_from_slice(&pool);

        let mut pairs: SmallVec<[(String, Value); 4]> = smallvec![];
        decode_layout(&raw, &mut pairs).unwrap();
        assert_eq!(
            pairs.last(),
            Some(&("pool".to_owned(), Value::from("fast")))
        );
    }

    #[test]
    fn unknown_layout_magic_is_passed_raw() {
        let mut md = v1_layout(1, 1);
        md.lmm_magic = 0x0BD6_0BD0; // composite
        let mut pairs: SmallVec<[(String, Value); 4]> = smallvec![];
        decode_layout(md.as_bytes(), &mut pairs).unwrap();
        assert_eq!(
            pairs.as_slice(),
            [("lov".to_owned(), Value::Binary(md.as_bytes().to_vec()))]
        );
    }

    #[test]
    fn short_layout_is_invalid() {
        let mut pairs: SmallVec<[(String, Value); 4]> = smallvec![];
        assert_eq!(
            decode_layout(&[0u8; 4], &mut pairs).unwrap_err().kind(),
            io::ErrorKind::InvalidData
        );
    }
}
