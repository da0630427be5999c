//! Lustre file identifiers.
//!
//! A FID names an inode cluster-wide: a 128-bit `{seq, oid, ver}`
//! triple. The changelog reports FIDs, the enricher resolves them back
//! to paths, and the pipeline's opaque [`Id`]s are their raw bytes, so
//! the mapping must be bijective.

use std::fmt;
use std::io;

use zerocopy::FromBytes;
use zerocopy::Immutable;
use zerocopy::IntoBytes;
use zerocopy::KnownLayout;

use crate::fsevent::Id;

/// A Lustre FID, laid out as the kernel's `lu_fid`.
#[repr(C)]
#[derive(
    Debug, Clone, Copy, PartialEq, Eq, Hash, Default, FromBytes, IntoBytes, KnownLayout, Immutable,
)]
pub struct Fid {
    /// Sequence number, allocated per client or per MDT.
    pub seq: u64,
    /// Object id within the sequence.
    pub oid: u32,
    /// Version; 0 for all extant objects.
    pub ver: u32,
}

/// Byte length of an encoded FID.
pub const FID_SIZE: usize = std::mem::size_of::<Fid>();

impl Fid {
    /// Builds a FID from its raw triple.
    pub fn new(seq: u64, oid: u32, ver: u32) -> Self {
        Fid { seq, oid, ver }
    }

    /// Encodes the FID as an opaque event id.
    pub fn to_id(&self) -> Id {
        Id::from_bytes(self.as_bytes().to_vec())
    }

    /// Decodes an event id produced by [`Fid::to_id`].
    pub fn from_id(id: &Id) -> io::Result<Fid> {
        Fid::read_from_bytes(id.as_bytes()).map_err(|_| {
            io::Error::new(
                io::ErrorKind::InvalidData,
                format!("id {id} is not an encoded FID"),
            )
        })
    }
}

impl fmt::Display for Fid {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        // Lustre's DFID format.
        write!(f, "[{:#x}:{:#x}:{:#x}]", self.seq, self.oid, self.ver)
    }
}
