//! Event enrichment.
//!
//! A source records what its upstream tells it and no more; anything
//! else it wants filled in, it asks for under the reserved
//! [`ENRICH_XATTR`] key. An [`Enricher`] walks a batch, opens the
//! referenced objects on the live filesystem and replaces each request
//! with the resolved attributes. [`NoPartial`] then guarantees nothing
//! that still carries a request reaches a sink.

use std::io;

use log::debug;
use smallvec::SmallVec;

use crate::fsevent::ENRICH_XATTR;
use crate::fsevent::FsEvent;
use crate::statx::StatxAttrs;
use crate::statx::StatxFields;
use crate::value::Value;

mod lustre;
mod posix;

pub use posix::Mountpoint;

/// The closed set of enricher implementations.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum EnricherKind {
    /// Generic attribute resolution through POSIX interfaces.
    Posix,
    /// POSIX resolution plus FID-to-path and layout extraction.
    Lustre,
}

impl EnricherKind {
    /// Selects an enricher by name; anything but `posix` or `lustre` is
    /// a usage error, and `lustre` requires a build with Lustre support.
    pub fn from_name(name: &str) -> io::Result<Self> {
        match name {
            "posix" => Ok(EnricherKind::Posix),
            "lustre" if cfg!(feature = "lustre") => Ok(EnricherKind::Lustre),
            "lustre" => Err(io::Error::new(
                io::ErrorKind::InvalidInput,
                "this build lacks Lustre support",
            )),
            _ => Err(io::Error::new(
                io::ErrorKind::InvalidInput,
                format!("enricher type not allowed: {name}"),
            )),
        }
    }
}

/// A parsed enrichment request.
#[derive(Debug, Default, PartialEq, Eq)]
pub(crate) struct EnrichRequest {
    /// Attribute fields to stat for.
    pub(crate) statx: Option<StatxFields>,
    /// Resolve the symlink target.
    pub(crate) symlink: bool,
    /// Resolve the absolute path of the affected entry.
    pub(crate) path: bool,
    /// Extract Lustre layout attributes.
    pub(crate) lustre: bool,
    /// Request keys this enricher does not understand. A request with
    /// unknown keys is left untouched so the partial filter reports it.
    pub(crate) unknown: Vec<String>,
}

fn invalid_data(message: String) -> io::Error {
    io::Error::new(io::ErrorKind::InvalidData, message)
}

impl EnrichRequest {
    /// Parses the value stored under [`ENRICH_XATTR`].
    ///
    /// Shape errors are `InvalidData`; unrecognized keys are collected,
    /// not refused.
    pub(crate) fn parse(value: &Value) -> io::Result<Self> {
        let map = value
            .as_map()
            .ok_or_else(|| invalid_data("enrichment request is not a mapping".to_owned()))?;

        let mut request = EnrichRequest::default();
        for (key, value) in map {
            match key.as_str() {
                "statx" => {
                    let bits = value.as_u64().ok_or_else(|| {
                        invalid_data("statx enrichment mask is not an integer".to_owned())
                    })?;
                    let bits = u32::try_from(bits).map_err(|_| {
                        invalid_data("statx enrichment mask does not fit 32 bits".to_owned())
                    })?;
                    request.statx = Some(StatxFields::from_bits_retain(bits));
                }
                "symlink" => request.symlink = true,
                "path" => request.path = true,
                "lustre" => request.lustre = true,
                "xattrs" => match value {
                    Value::Sequence(kinds) => {
                        for kind in kinds {
                            match kind.as_str() {
                                Some("lustre") => request.lustre = true,
                                Some(other) => request.unknown.push(format!("xattrs:{other}")),
                                None => {
                                    return Err(invalid_data(
                                        "xattrs enrichment kinds must be strings".to_owned(),
                                    ));
                                }
                            }
                        }
                    }
                    _ => {
                        return Err(invalid_data(
                            "xattrs enrichment request is not a sequence".to_owned(),
                        ));
                    }
                },
                other => request.unknown.push(other.to_owned()),
            }
        }
        Ok(request)
    }
}

/// Attributes gathered while resolving one request.
#[derive(Debug, Default)]
pub(crate) struct Resolved {
    pub(crate) statx: Option<StatxAttrs>,
    pub(crate) symlink: Option<String>,
    pub(crate) pairs: SmallVec<[(String, Value); 4]>,
}

/// Consumes the request key and folds `resolved` into the event.
///
/// The output's xattr count is the input's, minus the consumed request,
/// plus one per resolved pair.
fn apply_resolved(mut event: FsEvent, resolved: Resolved) -> io::Result<FsEvent> {
    event.xattrs_mut().remove(ENRICH_XATTR);

    if let Some(update) = resolved.statx {
        match &mut event {
            FsEvent::Upsert { statx, .. } | FsEvent::Link { statx, .. } => match statx {
                Some(existing) => existing.merge(&update),
                None => *statx = Some(update),
            },
            other => {
                return Err(invalid_data(format!(
                    "statx enrichment requested on an event without attributes (id {})",
                    other.id()
                )));
            }
        }
    }

    if let Some(target) = resolved.symlink {
        match &mut event {
            FsEvent::Upsert { symlink, .. } => *symlink = Some(target),
            other => {
                return Err(invalid_data(format!(
                    "symlink enrichment requested on a non-upsert event (id {})",
                    other.id()
                )));
            }
        }
    }

    for (key, value) in resolved.pairs {
        event.xattrs_mut().insert(key, value);
    }
    Ok(event)
}

/// Wraps an event stream and resolves enrichment requests against a
/// mounted filesystem.
///
/// Output has the same length and order as input. Events without a
/// request, and events whose request this enricher cannot honor, pass
/// through untouched; the latter are the partial filter's business.
#[derive(Debug)]
pub struct Enricher<'m, I> {
    events: I,
    mount: &'m Mountpoint,
    kind: EnricherKind,
}

impl<'m, I: Iterator<Item = FsEvent>> Enricher<'m, I> {
    /// Wraps `events`, resolving requests of `kind` against `mount`.
    pub fn new(kind: EnricherKind, mount: &'m Mountpoint, events: I) -> Self {
        Enricher {
            events,
            mount,
            kind,
        }
    }

    fn enrich(&mut self, event: FsEvent) -> io::Result<FsEvent> {
        let request = match event.enrich_request() {
            None => return Ok(event),
            Some(value) => EnrichRequest::parse(value)?,
        };
        if !request.unknown.is_empty() {
            debug!(
                "not resolving request with unknown keys {:?} for id {}",
                request.unknown,
                event.id()
            );
            return Ok(event);
        }
        if self.kind == EnricherKind::Posix && (request.path || request.lustre) {
            // Lustre-only resolutions; leave the request in place.
            return Ok(event);
        }

        let mut resolved = Resolved::default();
        match self.kind {
            EnricherKind::Posix => posix::resolve(self.mount, &event, &request, &mut resolved)?,
            EnricherKind::Lustre => lustre::resolve(self.mount, &event, &request, &mut resolved)?,
        }
        apply_resolved(event, resolved)
    }
}

impl<'m, I: Iterator<Item = FsEvent>> Iterator for Enricher<'m, I> {
    type Item = io::Result<FsEvent>;

    fn next(&mut self) -> Option<io::Result<FsEvent>> {
        let event = self.events.next()?;
        Some(self.enrich(event))
    }
}

/// Refuses events that still carry an enrichment request.
#[derive(Debug)]
pub struct NoPartial<I> {
    events: I,
}

impl<I: Iterator<Item = io::Result<FsEvent>>> NoPartial<I> {
    /// Wraps `events`.
    pub fn new(events: I) -> Self {
        NoPartial { events }
    }
}

impl<I: Iterator<Item = io::Result<FsEvent>>> Iterator for NoPartial<I> {
    type Item = io::Result<FsEvent>;

    fn next(&mut self) -> Option<io::Result<FsEvent>> {
        match self.events.next()? {
            Ok(event) if event.is_partial() => Some(Err(invalid_data(format!(
                "unresolved enrichment request on event for id {}",
                event.id()
            )))),
            other => Some(other),
        }
    }
}

#[cfg(test)]
mod test {
    use super::*;
    use crate::fsevent::Id;
    use crate::value::ValueMap;
    use smallvec::smallvec;

    fn request_value(entries: Vec<(&str, Value)>) -> Value {
        let mut map = ValueMap::new();
        for (key, value) in entries {
            map.insert(key.to_owned(), value);
        }
        Value::Map(map)
    }

    fn upsert_with_request(entries: Vec<(&str, Value)>) -> FsEvent {
        let mut xattrs = ValueMap::new();
        xattrs.insert(ENRICH_XATTR.to_owned(), request_value(entries));
        FsEvent::Upsert {
            id: Id::from_bytes(vec![1]),
            xattrs,
            statx: None,
            symlink: None,
        }
    }

    #[test]
    fn from_name_accepts_the_closed_set() {
        assert_eq!(EnricherKind::from_name("posix").unwrap(), EnricherKind::Posix);
        assert_eq!(
            EnricherKind::from_name("mongo").unwrap_err().kind(),
            io::ErrorKind::InvalidInput
        );
        #[cfg(feature = "lustre")]
        assert_eq!(
            EnricherKind::from_name("lustre").unwrap(),
            EnricherKind::Lustre
        );
    }

    #[test]
    fn parse_statx_mask() {
        let value = request_value(vec![("statx", Value::UInt32(0x18))]);
        let request = EnrichRequest::parse(&value).unwrap();
        assert_eq!(request.statx, Some(StatxFields::from_bits_retain(0x18)));
        assert!(!request.path);
    }

    #[test]
    fn parse_rejects_bad_statx_shape() {
        let value = request_value(vec![("statx", Value::from("everything"))]);
        assert_eq!(
            EnrichRequest::parse(&value).unwrap_err().kind(),
            io::ErrorKind::InvalidData
        );
    }

    #[test]
    fn parse_lustre_via_xattr_kinds() {
        let value = request_value(vec![(
            "xattrs",
            Value::Sequence(vec![Value::from("lustre")]),
        )]);
        let request = EnrichRequest::parse(&value).unwrap();
        assert!(request.lustre);
        assert!(request.unknown.is_empty());
    }

    #[test]
    fn parse_collects_unknown_keys() {
        let value = request_value(vec![("hsm", Value::UInt32(0))]);
        let request = EnrichRequest::parse(&value).unwrap();
        assert_eq!(request.unknown, ["hsm"]);
    }

    #[test]
    fn parse_rejects_non_map() {
        assert_eq!(
            EnrichRequest::parse(&Value::UInt32(0)).unwrap_err().kind(),
            io::ErrorKind::InvalidData
        );
    }

    #[test]
    fn apply_preserves_the_xattr_count_rule() {
        let mut event = upsert_with_request(vec![("path", Value::UInt32(0))]);
        event
            .xattrs_mut()
            .insert("fid".to_owned(), Value::Binary(vec![1; 16]));
        assert_eq!(event.xattrs().len(), 2);

        let resolved = Resolved {
            pairs: smallvec![("path".to_owned(), Value::from("/a/f"))],
            ..Default::default()
        };
        let enriched = apply_resolved(event, resolved).unwrap();
        // 2 originals - 1 consumed request + 1 resolved pair.
        assert_eq!(enriched.xattrs().len(), 2);
        assert!(!enriched.is_partial());
        assert_eq!(
            enriched.xattrs().get("path"),
            Some(&Value::from("/a/f"))
        );
    }

    #[test]
    fn apply_merges_statx_into_existing_attrs() {
        let event = FsEvent::Link {
            id: Id::from_bytes(vec![1]),
            xattrs: ValueMap::new(),
            parent_id: Id::from_bytes(vec![2]),
            name: "f".to_owned(),
            statx: Some(StatxAttrs {
                mask: StatxFields::UID,
                uid: 1000,
                ..Default::default()
            }),
        };
        let resolved = Resolved {
            statx: Some(StatxAttrs {
                mask: StatxFields::SIZE,
                size: 7,
                ..Default::default()
            }),
            ..Default::default()
        };
        match apply_resolved(event, resolved).unwrap() {
            FsEvent::Link { statx: Some(statx), .. } => {
                assert_eq!(statx.uid, 1000);
                assert_eq!(statx.size, 7);
                assert!(statx.mask.contains(StatxFields::UID | StatxFields::SIZE));
            }
            other => panic!("expected a link event, got {other:?}"),
        }
    }

    #[test]
    fn apply_refuses_symlink_on_non_upsert() {
        let event = FsEvent::Delete {
            id: Id::from_bytes(vec![1]),
            xattrs: ValueMap::new(),
        };
        let resolved = Resolved {
            symlink: Some("b".to_owned()),
            ..Default::default()
        };
        assert_eq!(
            apply_resolved(event, resolved).unwrap_err().kind(),
            io::ErrorKind::InvalidData
        );
    }

    #[test]
    fn posix_enricher_passes_lustre_requests_through() {
        let dir = tempfile::tempdir().unwrap();
        let mount = Mountpoint::open(dir.path()).unwrap();
        let event = upsert_with_request(vec![("path", Value::UInt32(0))]);

        let mut enricher =
            Enricher::new(EnricherKind::Posix, &mount, std::iter::once(event.clone()));
        let out = enricher.next().unwrap().unwrap();
        assert_eq!(out, event);
        assert!(out.is_partial());
    }

    #[test]
    fn unknown_request_keys_pass_through_and_fail_the_filter() {
        let dir = tempfile::tempdir().unwrap();
        let mount = Mountpoint::open(dir.path()).unwrap();
        let event = upsert_with_request(vec![("hsm", Value::UInt32(0))]);

        let enricher = Enricher::new(EnricherKind::Posix, &mount, std::iter::once(event));
        let mut filtered = NoPartial::new(enricher);
        assert_eq!(
            filtered.next().unwrap().unwrap_err().kind(),
            io::ErrorKind::InvalidData
        );
    }

    #[test]
    fn events_without_requests_are_untouched() {
        let dir = tempfile::tempdir().unwrap();
        let mount = Mountpoint::open(dir.path()).unwrap();
        let event = FsEvent::Delete {
            id: Id::from_bytes(vec![9]),
            xattrs: ValueMap::new(),
        };

        let mut enricher =
            Enricher::new(EnricherKind::Posix, &mount, std::iter::once(event.clone()));
        assert_eq!(enricher.next().unwrap().unwrap(), event);
    }

    #[test]
    fn no_partial_passes_clean_events() {
        let clean = FsEvent::Delete {
            id: Id::from_bytes(vec![1]),
            xattrs: ValueMap::new(),
        };
        let mut filtered = NoPartial::new(std::iter::once(Ok(clean.clone())));
        assert_eq!(filtered.next().unwrap().unwrap(), clean);
        assert!(filtered.next().is_none());
    }
}
