//! The abstract filesystem-event model.
//!
//! Sources normalize their native change records into [`FsEvent`]s, the
//! one currency every later stage trades in. An event names an inode by
//! an opaque [`Id`] and describes either an attribute change (`Upsert`,
//! `Xattr`), a namespace change (`Link`, `Unlink`, `NsXattr`) or the
//! inode's destruction (`Delete`).

use std::fmt;
use std::io;

use serde::Deserialize;
use serde::Serialize;

use crate::statx::StatxAttrs;
use crate::value::Value;
use crate::value::ValueMap;

/// Reserved xattr key carrying enrichment requests.
///
/// An event holding this key is "partial": a source recorded what it
/// knew and asked an enricher to fill in the rest. The key never
/// survives a successful enrichment pass.
pub const ENRICH_XATTR: &str = "rbh-fsevents";

/// Opaque, byte-comparable inode identifier.
///
/// Lustre sources encode a FID here (see [`crate::fid::Fid::to_id`]);
/// other producers may use any non-empty byte string. Serializes as
/// lowercase hex.
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
pub struct Id(#[serde(with = "crate::hex")] Vec<u8>);

impl Id {
    /// Wraps raw id bytes. Emptiness is checked by
    /// [`FsEvent::validate`], not here.
    pub fn from_bytes(bytes: Vec<u8>) -> Self {
        Id(bytes)
    }

    /// The raw bytes.
    pub fn as_bytes(&self) -> &[u8] {
        &self.0
    }

    /// True for the (invalid) empty id.
    pub fn is_empty(&self) -> bool {
        self.0.is_empty()
    }
}

impl fmt::Display for Id {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&crate::hex::encode(&self.0))
    }
}

/// A normalized filesystem change record.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "lowercase")]
pub enum FsEvent {
    /// Create or refresh an inode's attributes.
    Upsert {
        id: Id,
        #[serde(default, skip_serializing_if = "ValueMap::is_empty")]
        xattrs: ValueMap,
        #[serde(default, skip_serializing_if = "Option::is_none")]
        statx: Option<StatxAttrs>,
        #[serde(default, skip_serializing_if = "Option::is_none")]
        symlink: Option<String>,
    },
    /// Add a directory entry.
    Link {
        id: Id,
        #[serde(default, skip_serializing_if = "ValueMap::is_empty")]
        xattrs: ValueMap,
        parent_id: Id,
        name: String,
        /// Attributes the source record already carried for the new
        /// entry's inode (a changelog CREATE reports uid and gid).
        #[serde(default, skip_serializing_if = "Option::is_none")]
        statx: Option<StatxAttrs>,
    },
    /// Remove a directory entry.
    Unlink {
        id: Id,
        #[serde(default, skip_serializing_if = "ValueMap::is_empty")]
        xattrs: ValueMap,
        parent_id: Id,
        name: String,
    },
    /// Destroy an inode whose last reference is gone.
    Delete {
        id: Id,
        #[serde(default, skip_serializing_if = "ValueMap::is_empty")]
        xattrs: ValueMap,
    },
    /// Set or refresh extended attributes on an inode.
    Xattr {
        id: Id,
        #[serde(default, skip_serializing_if = "ValueMap::is_empty")]
        xattrs: ValueMap,
    },
    /// Set extended attributes on a specific name entry.
    NsXattr {
        id: Id,
        #[serde(default, skip_serializing_if = "ValueMap::is_empty")]
        xattrs: ValueMap,
        parent_id: Id,
        name: String,
    },
}

impl FsEvent {
    /// The inode this event is about.
    pub fn id(&self) -> &Id {
        match self {
            FsEvent::Upsert { id, .. }
            | FsEvent::Link { id, .. }
            | FsEvent::Unlink { id, .. }
            | FsEvent::Delete { id, .. }
            | FsEvent::Xattr { id, .. }
            | FsEvent::NsXattr { id, .. } => id,
        }
    }

    /// The event's extended-attribute mapping.
    pub fn xattrs(&self) -> &ValueMap {
        match self {
            FsEvent::Upsert { xattrs, .. }
            | FsEvent::Link { xattrs, .. }
            | FsEvent::Unlink { xattrs, .. }
            | FsEvent::Delete { xattrs, .. }
            | FsEvent::Xattr { xattrs, .. }
            | FsEvent::NsXattr { xattrs, .. } => xattrs,
        }
    }

    /// Mutable access to the extended-attribute mapping.
    pub fn xattrs_mut(&mut self) -> &mut ValueMap {
        match self {
            FsEvent::Upsert { xattrs, .. }
            | FsEvent::Link { xattrs, .. }
            | FsEvent::Unlink { xattrs, .. }
            | FsEvent::Delete { xattrs, .. }
            | FsEvent::Xattr { xattrs, .. }
            | FsEvent::NsXattr { xattrs, .. } => xattrs,
        }
    }

    /// The parent directory, for namespace events.
    pub fn parent_id(&self) -> Option<&Id> {
        match self {
            FsEvent::Link { parent_id, .. }
            | FsEvent::Unlink { parent_id, .. }
            | FsEvent::NsXattr { parent_id, .. } => Some(parent_id),
            _ => None,
        }
    }

    /// The entry name, for namespace events.
    pub fn name(&self) -> Option<&str> {
        match self {
            FsEvent::Link { name, .. }
            | FsEvent::Unlink { name, .. }
            | FsEvent::NsXattr { name, .. } => Some(name),
            _ => None,
        }
    }

    /// The enrichment request attached to this event, if any.
    pub fn enrich_request(&self) -> Option<&Value> {
        self.xattrs().get(ENRICH_XATTR)
    }

    /// True if this event still carries an enrichment request.
    pub fn is_partial(&self) -> bool {
        self.xattrs().contains_key(ENRICH_XATTR)
    }

    /// Checks the structural invariants every emitted event must hold:
    /// a non-empty id, and a non-empty name on namespace events.
    pub fn validate(&self) -> io::Result<()> {
        if self.id().is_empty() {
            return Err(io::Error::new(
                io::ErrorKind::InvalidData,
                "fsevent with an empty id",
            ));
        }
        if self.name().is_some_and(str::is_empty) {
            return Err(io::Error::new(
                io::ErrorKind::InvalidData,
                format!("namespace fsevent for id {} with an empty name", self.id()),
            ));
        }
        Ok(())
    }
}
