//! Filesystem-event bridge.
//!
//! This crate consumes a stream of change records from a filesystem (a
//! serialized record file, standard input, or a Lustre MDT changelog),
//! normalizes each record into an abstract [`FsEvent`], optionally
//! enriches events by querying the live filesystem for attributes the
//! record did not carry, regroups them into bounded batches, and hands
//! the batches to a sink (structured text on standard output, or an
//! external metadata-index backend).
//!
//! The pipeline is a single-threaded pull chain, leaves first:
//!
//! ```text
//! source -> deduplicator -> [enricher -> partial filter] -> sink
//! ```
//!
//! Each stage is lazy; nothing happens until the driver asks the
//! deduplicator for a batch and feeds it forward. Destruction is
//! bottom-up and deterministic: dropping a partially consumed batch
//! frees its remaining events.

#![warn(
    missing_docs,
    missing_debug_implementations,
    rust_2018_idioms,
    unreachable_pub
)]

pub use crate::deduplicator::Batch;
pub use crate::deduplicator::Deduplicator;
pub use crate::enrich::Enricher;
pub use crate::enrich::EnricherKind;
pub use crate::enrich::Mountpoint;
pub use crate::enrich::NoPartial;
pub use crate::fid::FID_SIZE;
pub use crate::fid::Fid;
pub use crate::fsevent::ENRICH_XATTR;
pub use crate::fsevent::FsEvent;
pub use crate::fsevent::Id;
pub use crate::ring::EventRing;
pub use crate::sink::Backend;
pub use crate::sink::BackendSink;
pub use crate::sink::FileSink;
pub use crate::sink::RbhUri;
pub use crate::sink::Sink;
pub use crate::sink::is_uri;
#[cfg(feature = "lustre")]
pub use crate::source::ChangelogDevice;
pub use crate::source::ChangelogReader;
pub use crate::source::ChangelogRecord;
pub use crate::source::ChangelogType;
pub use crate::source::ExtraFlags;
pub use crate::source::FileSource;
pub use crate::source::LustreSource;
pub use crate::source::RecordFlags;
pub use crate::source::Source;
pub use crate::statx::StatxAttrs;
pub use crate::statx::StatxFields;
pub use crate::statx::StatxTimestamp;
pub use crate::value::Value;
pub use crate::value::ValueMap;

mod deduplicator;
mod enrich;
mod fid;
mod fsevent;
mod hex;
mod ring;
mod sink;
mod source;
mod statx;
mod value;
