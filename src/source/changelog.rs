//! Lustre changelog record ABI.
//!
//! Changelog records cross the client interface as a fixed header
//! followed by optional extension blocks (gated by the flag words) and
//! a NUL-padded entry name. The layout is the kernel's `lustre_user.h`
//! contract; this module declares it in-crate and parses records out of
//! raw buffers.

#![allow(missing_docs)]

use std::io;

use bitflags::bitflags;
use memchr::memchr;
use num_enum::IntoPrimitive;
use num_enum::TryFromPrimitive;
use zerocopy::FromBytes;
use zerocopy::Immutable;
use zerocopy::IntoBytes;
use zerocopy::KnownLayout;

use crate::fid::Fid;

/// Changelog record types.
///
/// The numbering is the kernel's; unknown values are possible when the
/// server is newer than this crate and must be skipped, not refused.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, TryFromPrimitive, IntoPrimitive)]
#[repr(u32)]
pub enum ChangelogType {
    Mark = 0,
    Create = 1,
    Mkdir = 2,
    Hardlink = 3,
    Softlink = 4,
    Mknod = 5,
    Unlink = 6,
    Rmdir = 7,
    Rename = 8,
    Ext = 9,
    Open = 10,
    Close = 11,
    Layout = 12,
    Trunc = 13,
    Setattr = 14,
    Setxattr = 15,
    Hsm = 16,
    Mtime = 17,
    Atime = 18,
    Ctime = 19,
    Migrate = 20,
    Flrw = 21,
    Resync = 22,
    Getxattr = 23,
    DnOpen = 24,
}

bitflags! {
    /// High bits of `cr_flags`; each one gates an extension block.
    #[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
    pub struct RecordFlags: u16 {
        const VERSION = 0x1000;
        const RENAME = 0x2000;
        const JOBID = 0x4000;
        const EXTRA_FLAGS = 0x8000;
    }
}

bitflags! {
    /// Contents of the extra-flags extension; each bit gates a further
    /// extension block.
    #[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
    pub struct ExtraFlags: u64 {
        const UIDGID = 0x01;
        const NID = 0x02;
        const OMODE = 0x04;
        const XATTR = 0x08;
    }
}

/// Low bits of `cr_flags` carry per-type details, not extensions.
const FLAG_MASK: u16 = 0x0fff;

#[repr(C)]
#[derive(Debug, Clone, Copy, FromBytes, IntoBytes, KnownLayout, Immutable)]
struct RecHeader {
    namelen: u16,
    flags: u16,
    rec_type: u32,
    index: u64,
    prev: u64,
    time: u64,
    tfid: Fid,
    pfid: Fid,
}

#[repr(C)]
#[derive(Debug, Clone, Copy, FromBytes, IntoBytes, KnownLayout, Immutable)]
struct RenameExt {
    sfid: Fid,
    spfid: Fid,
}

#[repr(C)]
#[derive(Debug, Clone, Copy, FromBytes, IntoBytes, KnownLayout, Immutable)]
struct JobidExt {
    jobid: [u8; 32],
}

#[repr(C)]
#[derive(Debug, Clone, Copy, FromBytes, IntoBytes, KnownLayout, Immutable)]
struct ExtraFlagsExt {
    extra_flags: u64,
}

#[repr(C)]
#[derive(Debug, Clone, Copy, FromBytes, IntoBytes, KnownLayout, Immutable)]
struct UidGidExt {
    uid: u64,
    gid: u64,
}

#[repr(C)]
#[derive(Debug, Clone, Copy, FromBytes, IntoBytes, KnownLayout, Immutable)]
struct NidExt {
    nid: u64,
}

#[repr(C)]
#[derive(Debug, Clone, Copy, FromBytes, IntoBytes, KnownLayout, Immutable)]
struct OpenModeExt {
    open_flags: u32,
}

#[repr(C)]
#[derive(Debug, Clone, Copy, FromBytes, IntoBytes, KnownLayout, Immutable)]
struct XattrExt {
    xattr: [u8; 64],
}

/// A parsed changelog record.
#[derive(Debug, Clone, PartialEq, Default)]
pub struct ChangelogRecord {
    /// Raw record type; see [`ChangelogRecord::kind`].
    pub rec_type: u32,
    /// Position in the changelog, for acknowledgement.
    pub index: u64,
    /// Extension-gating flags (low per-type bits stripped).
    pub flags: RecordFlags,
    /// Record time in the MDT's packed encoding.
    pub time: u64,
    /// Target inode.
    pub tfid: Fid,
    /// Parent directory of the affected entry.
    pub pfid: Fid,
    /// Entry name; empty for records without a namespace component.
    pub name: String,
    /// Source fid and source parent fid of a rename.
    pub rename: Option<(Fid, Fid)>,
    /// Job identifier, NUL-trimmed.
    pub jobid: Option<String>,
    /// Credentials of the initiating process.
    pub uidgid: Option<(u64, u64)>,
    /// Client network id.
    pub nid: Option<u64>,
    /// Open mode flags for open and close records.
    pub open_mode: Option<u32>,
    /// Extended-attribute name for setxattr records.
    pub xattr_name: Option<String>,
}

fn invalid_record(what: &str) -> io::Error {
    io::Error::new(
        io::ErrorKind::InvalidData,
        format!("truncated changelog record: {what}"),
    )
}

fn read_ext<T: FromBytes + KnownLayout + Immutable + Copy>(
    buf: &[u8],
    what: &str,
) -> io::Result<(T, usize)> {
    let (ext, _) = T::read_from_prefix(buf).map_err(|_| invalid_record(what))?;
    Ok((ext, std::mem::size_of::<T>()))
}

fn trimmed_string(bytes: &[u8], what: &str) -> io::Result<String> {
    let end = memchr(0, bytes).unwrap_or(bytes.len());
    std::str::from_utf8(&bytes[..end])
        .map(str::to_owned)
        .map_err(|_| {
            io::Error::new(
                io::ErrorKind::InvalidData,
                format!("changelog {what} is not valid UTF-8"),
            )
        })
}

impl ChangelogRecord {
    /// Decodes one record from the front of `buf`.
    ///
    /// Returns the record and the number of bytes it occupied, so a
    /// buffer holding several records can be walked.
    pub fn parse(buf: &[u8]) -> io::Result<(ChangelogRecord, usize)> {
        let (header, _) =
            RecHeader::read_from_prefix(buf).map_err(|_| invalid_record("header"))?;
        let mut offset = std::mem::size_of::<RecHeader>();
        let flags = RecordFlags::from_bits_truncate(header.flags & !FLAG_MASK);

        let mut record = ChangelogRecord {
            rec_type: header.rec_type,
            index: header.index,
            flags,
            time: header.time,
            tfid: header.tfid,
            pfid: header.pfid,
            ..Default::default()
        };

        if flags.contains(RecordFlags::RENAME) {
            let (ext, len) = read_ext::<RenameExt>(&buf[offset..], "rename extension")?;
            record.rename = Some((ext.sfid, ext.spfid));
            offset += len;
        }
        if flags.contains(RecordFlags::JOBID) {
            let (ext, len) = read_ext::<JobidExt>(&buf[offset..], "jobid extension")?;
            let jobid = trimmed_string(&ext.jobid, "jobid")?;
            if !jobid.is_empty() {
                record.jobid = Some(jobid);
            }
            offset += len;
        }
        if flags.contains(RecordFlags::EXTRA_FLAGS) {
            let (ext, len) = read_ext::<ExtraFlagsExt>(&buf[offset..], "extra-flags extension")?;
            let extra = ExtraFlags::from_bits_truncate(ext.extra_flags);
            offset += len;

            if extra.contains(ExtraFlags::UIDGID) {
                let (ext, len) = read_ext::<UidGidExt>(&buf[offset..], "uidgid extension")?;
                record.uidgid = Some((ext.uid, ext.gid));
                offset += len;
            }
            if extra.contains(ExtraFlags::NID) {
                let (ext, len) = read_ext::<NidExt>(&buf[offset..], "nid extension")?;
                record.nid = Some(ext.nid);
                offset += len;
            }
            if extra.contains(ExtraFlags::OMODE) {
                let (ext, len) = read_ext::<OpenModeExt>(&buf[offset..], "open-mode extension")?;
                record.open_mode = Some(ext.open_flags);
                offset += len;
            }
            if extra.contains(ExtraFlags::XATTR) {
                let (ext, len) = read_ext::<XattrExt>(&buf[offset..], "xattr extension")?;
                let name = trimmed_string(&ext.xattr, "xattr name")?;
                if !name.is_empty() {
                    record.xattr_name = Some(name);
                }
                offset += len;
            }
        }

        let namelen = usize::from(header.namelen);
        let name_bytes = buf
            .get(offset..offset + namelen)
            .ok_or_else(|| invalid_record("name"))?;
        record.name = trimmed_string(name_bytes, "name")?;
        offset += namelen;

        Ok((record, offset))
    }

    /// The record type, when this crate knows it.
    pub fn kind(&self) -> Option<ChangelogType> {
        ChangelogType::try_from(self.rec_type).ok()
    }

    /// Record time in whole seconds since the epoch.
    ///
    /// The MDT packs a coarse timestamp into the top bits of `cr_time`.
    pub fn time_secs(&self) -> i64 {
        (self.time >> 30) as i64
    }
}

#[cfg(test)]
mod test {
    use super::*;

    fn encode(header: RecHeader, extras: &[&[u8]], name: &[u8]) -> Vec<u8> {
        let mut buf = header.as_bytes().to_vec();
        for extra in extras {
            buf.extend_from_slice(extra);
        }
        buf.extend_from_slice(name);
        buf
    }

    #[test]
    fn parses_a_bare_record() {
        let header = RecHeader {
            namelen: 4,
            flags: 0,
            rec_type: ChangelogType::Create.into(),
            index: 7,
            prev: 6,
            time: 1 << 31,
            tfid: Fid::new(0x200000007, 2, 0),
            pfid: Fid::new(0x200000007, 1, 0),
        };
        let buf = encode(header, &[], b"f\0\0\0");

        let (record, consumed) = ChangelogRecord::parse(&buf).unwrap();
        assert_eq!(consumed, buf.len());
        assert_eq!(record.kind(), Some(ChangelogType::Create));
        assert_eq!(record.index, 7);
        assert_eq!(record.name, "f");
        assert_eq!(record.tfid, Fid::new(0x200000007, 2, 0));
        assert_eq!(record.time_secs(), 2);
        assert_eq!(record.uidgid, None);
    }

    #[test]
    fn parses_uidgid_through_extra_flags() {
        let header = RecHeader {
            namelen: 2,
            flags: (RecordFlags::JOBID | RecordFlags::EXTRA_FLAGS).bits(),
            rec_type: ChangelogType::Create.into(),
            index: 1,
            prev: 0,
            time: 0,
            tfid: Fid::new(1, 2, 0),
            pfid: Fid::new(1, 1, 0),
        };
        let mut jobid = JobidExt { jobid: [0; 32] };
        jobid.jobid[..3].copy_from_slice(b"tar");
        let extra = ExtraFlagsExt {
            extra_flags: ExtraFlags::UIDGID.bits(),
        };
        let uidgid = UidGidExt { uid: 1000, gid: 1000 };
        let buf = encode(
            header,
            &[jobid.as_bytes(), extra.as_bytes(), uidgid.as_bytes()],
            b"f\0",
        );

        let (record, consumed) = ChangelogRecord::parse(&buf).unwrap();
        assert_eq!(consumed, buf.len());
        assert_eq!(record.jobid.as_deref(), Some("tar"));
        assert_eq!(record.uidgid, Some((1000, 1000)));
        assert_eq!(record.name, "f");
    }

    #[test]
    fn two_records_in_one_buffer() {
        let header = RecHeader {
            namelen: 0,
            flags: 0,
            rec_type: ChangelogType::Close.into(),
            index: 3,
            prev: 2,
            time: 0,
            tfid: Fid::new(1, 3, 0),
            pfid: Fid::default(),
        };
        let mut buf = encode(header, &[], b"");
        let second = RecHeader { index: 4, ..header };
        buf.extend_from_slice(&encode(second, &[], b""));

        let (first, used) = ChangelogRecord::parse(&buf).unwrap();
        let (next, _) = ChangelogRecord::parse(&buf[used..]).unwrap();
        assert_eq!(first.index, 3);
        assert_eq!(next.index, 4);
    }

    #[test]
    fn truncated_record_is_invalid_data() {
        let err = ChangelogRecord::parse(&[0u8; 10]).unwrap_err();
        assert_eq!(err.kind(), io::ErrorKind::InvalidData);
    }

    #[test]
    fn unknown_type_is_preserved_raw() {
        let header = RecHeader {
            namelen: 0,
            flags: 0,
            rec_type: 999,
            index: 0,
            prev: 0,
            time: 0,
            tfid: Fid::default(),
            pfid: Fid::default(),
        };
        let (record, _) = ChangelogRecord::parse(&encode(header, &[], b"")).unwrap();
        assert_eq!(record.kind(), None);
        assert_eq!(record.rec_type, 999);
    }
}
