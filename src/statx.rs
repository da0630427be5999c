//! Inode attribute records.
//!
//! [`StatxAttrs`] mirrors the kernel's extended stat record, with one
//! difference inherited from the event model: second and nanosecond
//! halves of each timestamp, and major and minor halves of each device
//! number, are masked individually. Consumers must only read fields
//! whose bit is set in [`StatxAttrs::mask`].

#![allow(missing_docs)]

use bitflags::bitflags;
use serde::Deserialize;
use serde::Serialize;

bitflags! {
    /// Validity bits for [`StatxAttrs`] fields.
    ///
    /// The low word matches the kernel `STATX_*` layout bit for bit; the
    /// high word splits out the subfields the kernel masks as a unit.
    #[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default)]
    pub struct StatxFields: u32 {
        const TYPE = 1 << 0;
        const MODE = 1 << 1;
        const NLINK = 1 << 2;
        const UID = 1 << 3;
        const GID = 1 << 4;
        const ATIME_SEC = 1 << 5;
        const MTIME_SEC = 1 << 6;
        const CTIME_SEC = 1 << 7;
        const INO = 1 << 8;
        const SIZE = 1 << 9;
        const BLOCKS = 1 << 10;
        const BTIME_SEC = 1 << 11;
        const MNT_ID = 1 << 12;

        const ATIME_NSEC = 1 << 16;
        const BTIME_NSEC = 1 << 17;
        const CTIME_NSEC = 1 << 18;
        const MTIME_NSEC = 1 << 19;
        const BLKSIZE = 1 << 20;
        const ATTRIBUTES = 1 << 21;
        const RDEV_MAJOR = 1 << 22;
        const RDEV_MINOR = 1 << 23;
        const DEV_MAJOR = 1 << 24;
        const DEV_MINOR = 1 << 25;

        const ATIME = Self::ATIME_SEC.bits() | Self::ATIME_NSEC.bits();
        const BTIME = Self::BTIME_SEC.bits() | Self::BTIME_NSEC.bits();
        const CTIME = Self::CTIME_SEC.bits() | Self::CTIME_NSEC.bits();
        const MTIME = Self::MTIME_SEC.bits() | Self::MTIME_NSEC.bits();
        const RDEV = Self::RDEV_MAJOR.bits() | Self::RDEV_MINOR.bits();
        const DEV = Self::DEV_MAJOR.bits() | Self::DEV_MINOR.bits();
    }
}

impl StatxFields {
    /// Converts to the mask the `statx(2)` syscall understands.
    ///
    /// Subfield bits are widened to the kernel's per-field granularity;
    /// `dev`, `blksize` and `attributes` are always reported by the
    /// kernel and have no request bit.
    pub fn kernel_mask(self) -> u32 {
        let mut mask = self.bits() & 0x1fff;
        if self.intersects(StatxFields::ATIME) {
            mask |= libc::STATX_ATIME;
        }
        if self.intersects(StatxFields::BTIME) {
            mask |= libc::STATX_BTIME;
        }
        if self.intersects(StatxFields::CTIME) {
            mask |= libc::STATX_CTIME;
        }
        if self.intersects(StatxFields::MTIME) {
            mask |= libc::STATX_MTIME;
        }
        mask
    }

    /// Converts a mask reported by `statx(2)` back, widening each
    /// kernel bit to both of its subfield bits.
    pub fn from_kernel_mask(mask: u32) -> Self {
        let mut fields = StatxFields::from_bits_truncate(mask & 0x1fff);
        if mask & libc::STATX_ATIME != 0 {
            fields |= StatxFields::ATIME;
        }
        if mask & libc::STATX_BTIME != 0 {
            fields |= StatxFields::BTIME;
        }
        if mask & libc::STATX_CTIME != 0 {
            fields |= StatxFields::CTIME;
        }
        if mask & libc::STATX_MTIME != 0 {
            fields |= StatxFields::MTIME;
        }
        fields
    }
}

mod mask_serde {
    use serde::Deserialize;
    use serde::Deserializer;
    use serde::Serializer;

    use super::StatxFields;

    pub(super) fn serialize<S: Serializer>(
        mask: &StatxFields,
        serializer: S,
    ) -> Result<S::Ok, S::Error> {
        serializer.serialize_u32(mask.bits())
    }

    pub(super) fn deserialize<'de, D: Deserializer<'de>>(
        deserializer: D,
    ) -> Result<StatxFields, D::Error> {
        u32::deserialize(deserializer).map(StatxFields::from_bits_retain)
    }
}

/// A timestamp with separately masked halves.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
pub struct StatxTimestamp {
    pub sec: i64,
    pub nsec: u32,
}

/// Inode attributes, populated per [`StatxAttrs::mask`].
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
pub struct StatxAttrs {
    #[serde(with = "mask_serde")]
    pub mask: StatxFields,
    #[serde(default)]
    pub mode: u16,
    #[serde(default)]
    pub nlink: u32,
    #[serde(default)]
    pub uid: u32,
    #[serde(default)]
    pub gid: u32,
    #[serde(default)]
    pub ino: u64,
    #[serde(default)]
    pub size: u64,
    #[serde(default)]
    pub blocks: u64,
    #[serde(default)]
    pub blksize: u32,
    #[serde(default)]
    pub attributes: u64,
    #[serde(default)]
    pub atime: StatxTimestamp,
    #[serde(default)]
    pub btime: StatxTimestamp,
    #[serde(default)]
    pub ctime: StatxTimestamp,
    #[serde(default)]
    pub mtime: StatxTimestamp,
    #[serde(default)]
    pub rdev_major: u32,
    #[serde(default)]
    pub rdev_minor: u32,
    #[serde(default)]
    pub dev_major: u32,
    #[serde(default)]
    pub dev_minor: u32,
    #[serde(default)]
    pub mnt_id: u64,
}

impl StatxAttrs {
    /// Builds an attribute record from a raw `statx(2)` result.
    #[cfg(target_os = "linux")]
    pub fn from_raw(raw: &libc::statx) -> Self {
        let mut mask = StatxFields::from_kernel_mask(raw.stx_mask);
        // The kernel fills these unconditionally.
        mask |= StatxFields::BLKSIZE | StatxFields::ATTRIBUTES | StatxFields::DEV;
        if raw.stx_mask & libc::STATX_MNT_ID != 0 {
            mask |= StatxFields::MNT_ID;
        }
        StatxAttrs {
            mask,
            mode: raw.stx_mode,
            nlink: raw.stx_nlink,
            uid: raw.stx_uid,
            gid: raw.stx_gid,
            ino: raw.stx_ino,
            size: raw.stx_size,
            blocks: raw.stx_blocks,
            blksize: raw.stx_blksize,
            attributes: raw.stx_attributes,
            atime: StatxTimestamp {
                sec: raw.stx_atime.tv_sec,
                nsec: raw.stx_atime.tv_nsec,
            },
            btime: StatxTimestamp {
                sec: raw.stx_btime.tv_sec,
                nsec: raw.stx_btime.tv_nsec,
            },
            ctime: StatxTimestamp {
                sec: raw.stx_ctime.tv_sec,
                nsec: raw.stx_ctime.tv_nsec,
            },
            mtime: StatxTimestamp {
                sec: raw.stx_mtime.tv_sec,
                nsec: raw.stx_mtime.tv_nsec,
            },
            rdev_major: raw.stx_rdev_major,
            rdev_minor: raw.stx_rdev_minor,
            dev_major: raw.stx_dev_major,
            dev_minor: raw.stx_dev_minor,
            mnt_id: raw.stx_mnt_id,
        }
    }

    /// Folds `other`'s masked fields into `self`.
    ///
    /// Fields already valid in `self` are overwritten when `other` also
    /// carries them; the merged mask is the union.
    pub fn merge(&mut self, other: &StatxAttrs) {
        let fields = other.mask;
        if fields.contains(StatxFields::MODE) || fields.contains(StatxFields::TYPE) {
            self.mode = other.mode;
        }
        if fields.contains(StatxFields::NLINK) {
            self.nlink = other.nlink;
        }
        if fields.contains(StatxFields::UID) {
            self.uid = other.uid;
        }
        if fields.contains(StatxFields::GID) {
            self.gid = other.gid;
        }
        if fields.contains(StatxFields::INO) {
            self.ino = other.ino;
        }
        if fields.contains(StatxFields::SIZE) {
            self.size = other.size;
        }
        if fields.contains(StatxFields::BLOCKS) {
            self.blocks = other.blocks;
        }
        if fields.contains(StatxFields::BLKSIZE) {
            self.blksize = other.blksize;
        }
        if fields.contains(StatxFields::ATTRIBUTES) {
            self.attributes = other.attributes;
        }
        if fields.contains(StatxFields::ATIME_SEC) {
            self.atime.sec = other.atime.sec;
        }
        if fields.contains(StatxFields::ATIME_NSEC) {
            self.atime.nsec = other.atime.nsec;
        }
        if fields.contains(StatxFields::BTIME_SEC) {
            self.btime.sec = other.btime.sec;
        }
        if fields.contains(StatxFields::BTIME_NSEC) {
            self.btime.nsec = other.btime.nsec;
        }
        if fields.contains(StatxFields::CTIME_SEC) {
            self.ctime.sec = other.ctime.sec;
        }
        if fields.contains(StatxFields::CTIME_NSEC) {
            self.ctime.nsec = other.ctime.nsec;
        }
        if fields.contains(StatxFields::MTIME_SEC) {
            self.mtime.sec = other.mtime.sec;
        }
        if fields.contains(StatxFields::MTIME_NSEC) {
            self.mtime.nsec = other.mtime.nsec;
        }
        if fields.contains(StatxFields::RDEV_MAJOR) {
            self.rdev_major = other.rdev_major;
        }
        if fields.contains(StatxFields::RDEV_MINOR) {
            self.rdev_minor = other.rdev_minor;
        }
        if fields.contains(StatxFields::DEV_MAJOR) {
            self.dev_major = other.dev_major;
        }
        if fields.contains(StatxFields::DEV_MINOR) {
            self.dev_minor = other.dev_minor;
        }
        if fields.contains(StatxFields::MNT_ID) {
            self.mnt_id = other.mnt_id;
        }
        self.mask |= fields;
    }
}

#[cfg(test)]
mod test {
    use super::*;

    #[test]
    fn kernel_mask_widens_subfields() {
        let fields = StatxFields::UID | StatxFields::ATIME_NSEC;
        let mask = fields.kernel_mask();
        assert_eq!(mask & libc::STATX_UID, libc::STATX_UID);
        assert_eq!(mask & libc::STATX_ATIME, libc::STATX_ATIME);
    }

    #[test]
    fn kernel_mask_round_trip() {
        let fields = StatxFields::from_kernel_mask(libc::STATX_UID | libc::STATX_MTIME);
        assert!(fields.contains(StatxFields::UID));
        assert!(fields.contains(StatxFields::MTIME_SEC));
        assert!(fields.contains(StatxFields::MTIME_NSEC));
        assert!(!fields.contains(StatxFields::GID));
    }

    #[test]
    fn merge_respects_masks() {
        let mut base = StatxAttrs {
            mask: StatxFields::UID | StatxFields::GID,
            uid: 1000,
            gid: 1000,
            ..Default::default()
        };
        let update = StatxAttrs {
            mask: StatxFields::UID | StatxFields::SIZE,
            uid: 0,
            size: 42,
            // Unmasked, must not leak into the merge.
            gid: 99,
            ..Default::default()
        };
        base.merge(&update);
        assert_eq!(base.uid, 0);
        assert_eq!(base.gid, 1000);
        assert_eq!(base.size, 42);
        assert!(base.mask.contains(StatxFields::UID | StatxFields::GID | StatxFields::SIZE));
    }

    #[test]
    fn yaml_round_trip() {
        let attrs = StatxAttrs {
            mask: StatxFields::ATIME,
            atime: StatxTimestamp { sec: 12, nsec: 34 },
            ..Default::default()
        };
        let text = serde_yaml::to_string(&attrs).unwrap();
        let back: StatxAttrs = serde_yaml::from_str(&text).unwrap();
        assert_eq!(back, attrs);
    }
}
