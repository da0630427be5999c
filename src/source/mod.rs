//! Event sources.
//!
//! A source is a lazy, finite, non-restartable stream of fsevents. The
//! concrete producers are a structured-record file (or standard input)
//! and a Lustre MDT changelog; both normalize into the same
//! [`FsEvent`](crate::fsevent::FsEvent) currency.

use std::io;

use crate::fsevent::FsEvent;

mod changelog;
mod file;
mod lustre;

pub use changelog::ChangelogRecord;
pub use changelog::ChangelogType;
pub use changelog::ExtraFlags;
pub use changelog::RecordFlags;
pub use file::FileSource;
#[cfg(feature = "lustre")]
pub use lustre::ChangelogDevice;
pub use lustre::ChangelogReader;
pub use lustre::LustreSource;

/// A finite stream of fsevents.
pub trait Source {
    /// Pulls the next event. `Ok(None)` means the source is exhausted;
    /// errors carry the upstream errno.
    fn next_event(&mut self) -> io::Result<Option<FsEvent>>;

    /// Confirms consumption of every event up to and including the
    /// `index`-th one, for sources whose upstream demands it.
    ///
    /// The default implementation reports `Unsupported`; that is not a
    /// fatal condition for the pipeline.
    fn acknowledge(&mut self, index: u64) -> io::Result<()> {
        let _ = index;
        Err(io::Error::new(
            io::ErrorKind::Unsupported,
            format!("source {:?} cannot acknowledge", self.name()),
        ))
    }

    /// Short name for diagnostics.
    fn name(&self) -> &str;
}

impl<S: Source + ?Sized> Source for Box<S> {
    fn next_event(&mut self) -> io::Result<Option<FsEvent>> {
        (**self).next_event()
    }

    fn acknowledge(&mut self, index: u64) -> io::Result<()> {
        (**self).acknowledge(index)
    }

    fn name(&self) -> &str {
        (**self).name()
    }
}
