//! Event sinks.
//!
//! A sink consumes one batch of events at a time, to completion. The
//! structured-text sink renders YAML documents (one per event) for
//! standard output or any writer; the backend sink forwards events to
//! an opaque metadata-index client named by a `rbh:` URI.

use std::io;
use std::io::Write;

use crate::fsevent::FsEvent;

/// Consumer end of the pipeline.
pub trait Sink {
    /// Drains `events`, writing or transmitting each one in order.
    ///
    /// Empty batches are legal and must be no-ops.
    fn process(
        &mut self,
        events: &mut dyn Iterator<Item = io::Result<FsEvent>>,
    ) -> io::Result<()>;
}

fn serialize_error(err: serde_yaml::Error) -> io::Error {
    io::Error::new(io::ErrorKind::InvalidData, err)
}

/// Renders events as a YAML document stream.
#[derive(Debug)]
pub struct FileSink<W> {
    out: W,
}

impl<W: Write> FileSink<W> {
    /// Renders into any writer.
    pub fn new(out: W) -> Self {
        FileSink { out }
    }

    /// The wrapped writer, for callers that buffer.
    pub fn into_inner(self) -> W {
        self.out
    }
}

impl FileSink<io::Stdout> {
    /// Renders to standard output.
    pub fn stdout() -> Self {
        FileSink::new(io::stdout())
    }
}

impl<W: Write> Sink for FileSink<W> {
    fn process(
        &mut self,
        events: &mut dyn Iterator<Item = io::Result<FsEvent>>,
    ) -> io::Result<()> {
        for event in events {
            let event = event?;
            self.out.write_all(b"---\n")?;
            serde_yaml::to_writer(&mut self.out, &event).map_err(serialize_error)?;
        }
        self.out.flush()
    }
}

/// An opaque metadata-index client.
///
/// Concrete clients live outside this crate; the pipeline only needs
/// somewhere to put each event and a point to flush at.
pub trait Backend {
    /// Accepts one event.
    fn submit(&mut self, event: &FsEvent) -> io::Result<()>;

    /// Completes the batch; called once per [`Sink::process`].
    fn flush(&mut self) -> io::Result<()> {
        Ok(())
    }
}

/// Forwards events to a metadata-index client.
#[derive(Debug)]
pub struct BackendSink<B> {
    backend: B,
}

impl<B: Backend> BackendSink<B> {
    /// Wraps a client.
    pub fn new(backend: B) -> Self {
        BackendSink { backend }
    }
}

impl<B: Backend> Sink for BackendSink<B> {
    fn process(
        &mut self,
        events: &mut dyn Iterator<Item = io::Result<FsEvent>>,
    ) -> io::Result<()> {
        for event in events {
            self.backend.submit(&event?)?;
        }
        self.backend.flush()
    }
}

/// A parsed `rbh:<backend>:<name>` URI.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RbhUri {
    /// Backend kind, e.g. `mongo`.
    pub backend: String,
    /// Instance name within the backend.
    pub name: String,
}

impl RbhUri {
    /// Parses an `rbh:` URI; any other shape is `InvalidInput`.
    pub fn parse(uri: &str) -> io::Result<Self> {
        let invalid = || {
            io::Error::new(
                io::ErrorKind::InvalidInput,
                format!("{uri}: not a rbh:<backend>:<name> uri"),
            )
        };
        let rest = uri.strip_prefix("rbh:").ok_or_else(invalid)?;
        let (backend, name) = rest.split_once(':').ok_or_else(invalid)?;
        if backend.is_empty() || name.is_empty() {
            return Err(invalid());
        }
        Ok(RbhUri {
            backend: backend.to_owned(),
            name: name.to_owned(),
        })
    }
}

/// True if `text` is shaped like a URI at all (scheme followed by a
/// colon), as opposed to a plain path.
pub fn is_uri(text: &str) -> bool {
    match text.split_once(':') {
        Some((scheme, _)) => {
            !scheme.is_empty()
                && scheme
                    .chars()
                    .all(|c| c.is_ascii_alphanumeric() || c == '+' || c == '-' || c == '.')
        }
        None => false,
    }
}
