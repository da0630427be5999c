//! Event batching.
//!
//! The deduplicator sits between a source and the rest of the pipeline,
//! cloning borrowed upstream events into owned heap storage and cutting
//! them into [`Batch`]es sized by its [`EventRing`]. This version
//! batches only; coalescing redundant consecutive events for the same
//! inode is reserved for a later one, so order is preserved and nothing
//! is ever dropped.

use std::io;

use crate::fsevent::FsEvent;
use crate::ring::EventRing;
use crate::source::Source;

/// Pulls events from a source and regroups them into batches.
#[derive(Debug)]
pub struct Deduplicator<S> {
    source: S,
    ring: EventRing,
    /// Event that triggered the last batch cut; leads the next batch.
    pending: Option<Box<FsEvent>>,
    exhausted: bool,
}

impl<S: Source> Deduplicator<S> {
    /// Batches `source` with a ring sized for at least `count` events.
    pub fn new(source: S, count: usize) -> Self {
        Self::with_ring(source, EventRing::new(count))
    }

    /// Batches `source` with a caller-provided ring.
    pub fn with_ring(source: S, ring: EventRing) -> Self {
        Deduplicator {
            source,
            ring,
            pending: None,
            exhausted: false,
        }
    }

    /// Cuts and returns the next batch, or `Ok(None)` once the source
    /// is exhausted and every event has been handed out.
    pub fn next_batch(&mut self) -> io::Result<Option<Batch>> {
        if let Some(event) = self.pending.take() {
            self.ring
                .push(event)
                .unwrap_or_else(|_| unreachable!("freshly drained ring rejected a push"));
        }

        while !self.exhausted {
            match self.source.next_event()? {
                None => self.exhausted = true,
                Some(event) => {
                    if let Err(rejected) = self.ring.push(Box::new(event)) {
                        // Ring full: the rejected event opens the next
                        // batch rather than closing this one.
                        self.pending = Some(rejected);
                        return Ok(Some(Batch::new(self.ring.drain())));
                    }
                }
            }
        }

        if self.ring.is_empty() {
            Ok(None)
        } else {
            Ok(Some(Batch::new(self.ring.drain())))
        }
    }

    /// Forwards an acknowledgement to the underlying source.
    pub fn acknowledge(&mut self, index: u64) -> io::Result<()> {
        self.source.acknowledge(index)
    }

    /// The wrapped source.
    pub fn source(&self) -> &S {
        &self.source
    }
}

/// One cut of events, yielded oldest first.
///
/// The batch owns its events; dropping it mid-iteration frees the
/// remainder.
#[derive(Debug)]
pub struct Batch {
    events: std::vec::IntoIter<Box<FsEvent>>,
}

impl Batch {
    fn new(events: Vec<Box<FsEvent>>) -> Self {
        Batch {
            events: events.into_iter(),
        }
    }
}

impl Iterator for Batch {
    type Item = FsEvent;

    fn next(&mut self) -> Option<FsEvent> {
        self.events.next().map(|boxed| *boxed)
    }

    fn size_hint(&self) -> (usize, Option<usize>) {
        self.events.size_hint()
    }
}

impl ExactSizeIterator for Batch {}
