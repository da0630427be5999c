//! Structured-record file source.
//!
//! Reads a stream of YAML documents, one fsevent per document, from a
//! record file or standard input. This is both a replay path for
//! captured event streams and the stdin half of a shell pipeline.

use std::fs::File;
use std::io;
use std::io::Read;
use std::path::Path;

use serde::Deserialize;

use crate::fsevent::FsEvent;
use crate::source::Source;

/// Source yielding events deserialized from a YAML document stream.
pub struct FileSource {
    name: &'static str,
    documents: serde_yaml::Deserializer<'static>,
}

impl FileSource {
    /// Wraps any reader producing a YAML document stream.
    pub fn from_reader(reader: impl Read + 'static, name: &'static str) -> Self {
        FileSource {
            name,
            documents: serde_yaml::Deserializer::from_reader(reader),
        }
    }

    /// Opens a record file.
    pub fn open(path: impl AsRef<Path>) -> io::Result<Self> {
        let file = File::open(path)?;
        Ok(Self::from_reader(file, "file"))
    }

    /// Reads records from standard input.
    pub fn stdin() -> Self {
        Self::from_reader(io::stdin(), "stdin")
    }
}

impl std::fmt::Debug for FileSource {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("FileSource")
            .field("name", &self.name)
            .finish_non_exhaustive()
    }
}

impl Source for FileSource {
    fn next_event(&mut self) -> io::Result<Option<FsEvent>> {
        loop {
            let document = match self.documents.next() {
                Some(document) => document,
                None => return Ok(None),
            };
            // Deserialize in two steps so empty documents (an empty
            // file, a trailing `---`) read as end padding, not errors.
            let value = serde_yaml::Value::deserialize(document)
                .map_err(|err| io::Error::new(io::ErrorKind::InvalidData, err))?;
            if value.is_null() {
                continue;
            }
            let event: FsEvent = serde_yaml::from_value(value)
                .map_err(|err| io::Error::new(io::ErrorKind::InvalidData, err))?;
            event.validate()?;
            return Ok(Some(event));
        }
    }

    fn name(&self) -> &str {
        self.name
    }
}
