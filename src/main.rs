//! Command-line driver for the event pipeline.

use std::io;
use std::process::ExitCode;

use clap::Arg;
use clap::ArgAction;
use clap::ArgMatches;
use clap::Command;
use clap::crate_version;
use log::debug;
use log::warn;

use rbh_fsevents::Deduplicator;
use rbh_fsevents::Enricher;
use rbh_fsevents::EnricherKind;
use rbh_fsevents::FileSink;
use rbh_fsevents::FileSource;
#[cfg(feature = "lustre")]
use rbh_fsevents::{ChangelogDevice, LustreSource};
use rbh_fsevents::Mountpoint;
use rbh_fsevents::NoPartial;
use rbh_fsevents::RbhUri;
use rbh_fsevents::Sink;
use rbh_fsevents::Source;
use rbh_fsevents::is_uri;

/// Exit code for command-line misuse, per sysexits.h.
const EX_USAGE: u8 = 64;

/// Events staged per batch; the ring rounds this up to whole pages.
const BATCH_SIZE: usize = 512;

/// Registered changelog consumer the Lustre source clears records for.
#[cfg(feature = "lustre")]
const CHANGELOG_USER: &str = "cl1";

fn usage_error(message: String) -> io::Error {
    io::Error::new(io::ErrorKind::InvalidInput, message)
}

/// `<fsname>-MDT<hex index>`, e.g. `lustre-MDT0000`.
fn is_mdt_name(arg: &str) -> bool {
    arg.rsplit_once("-MDT").is_some_and(|(fsname, index)| {
        !fsname.is_empty() && index.len() == 4 && index.chars().all(|c| c.is_ascii_hexdigit())
    })
}

/// Builds the source named on the command line. The boolean reports
/// whether it is a Lustre changelog, which decides the enricher kind.
fn source_new(arg: &str) -> io::Result<(Box<dyn Source>, bool)> {
    if arg == "-" {
        return Ok((Box::new(FileSource::stdin()), false));
    }
    if is_mdt_name(arg) {
        #[cfg(feature = "lustre")]
        {
            let device = ChangelogDevice::open(arg, CHANGELOG_USER)
                .map_err(|err| io::Error::new(err.kind(), format!("{arg}: {err}")))?;
            return Ok((Box::new(LustreSource::new(device)), true));
        }
        #[cfg(not(feature = "lustre"))]
        {
            return Err(usage_error(format!(
                "{arg}: this build lacks Lustre support"
            )));
        }
    }
    let source = FileSource::open(arg)
        .map_err(|err| io::Error::new(err.kind(), format!("{arg}: {err}")))?;
    Ok((Box::new(source), false))
}

fn sink_new(arg: &str) -> io::Result<Box<dyn Sink>> {
    if arg == "-" {
        return Ok(Box::new(FileSink::stdout()));
    }
    if is_uri(arg) {
        let uri = RbhUri::parse(arg)?;
        // Backend clients are external; none are compiled in.
        return Err(io::Error::new(
            io::ErrorKind::Unsupported,
            format!(
                "{arg}: no metadata-index client for backend '{}' in this build",
                uri.backend
            ),
        ));
    }
    Err(usage_error(format!("{arg}: unsupported destination")))
}

/// The driver loop: one batch at a time, enrich and filter when asked,
/// acknowledge what the sink took.
fn feed(
    sink: &mut dyn Sink,
    deduplicator: &mut Deduplicator<Box<dyn Source>>,
    enrichment: Option<(EnricherKind, &Mountpoint)>,
) -> io::Result<()> {
    let mut consumed: u64 = 0;

    while let Some(batch) = deduplicator.next_batch()? {
        let len = batch.len() as u64;
        match enrichment {
            Some((kind, mount)) => {
                let enricher = Enricher::new(kind, mount, batch);
                let mut events = NoPartial::new(enricher);
                sink.process(&mut events)?;
            }
            None => {
                let mut events = batch.map(Ok);
                sink.process(&mut events)?;
            }
        }
        consumed += len;
        match deduplicator.acknowledge(consumed) {
            Ok(()) => {}
            Err(err) if err.kind() == io::ErrorKind::Unsupported => debug!("{err}"),
            Err(err) => warn!("failed to acknowledge {consumed} events: {err}"),
        }
    }
    Ok(())
}

fn run(matches: &ArgMatches) -> io::Result<()> {
    // getopt semantics: of -r and -e, the one given last wins.
    let mountpoint = match (matches.index_of("raw"), matches.index_of("enrich")) {
        (Some(raw), Some(enrich)) if raw > enrich => None,
        (_, Some(_)) => matches.get_one::<String>("enrich").cloned(),
        _ => None,
    };
    let source_arg = matches.get_one::<String>("SOURCE").expect("required arg");
    let destination_arg = matches
        .get_one::<String>("DESTINATION")
        .expect("required arg");

    let (source, lustre_source) = source_new(source_arg)?;
    let mut sink = sink_new(destination_arg)?;

    let enrichment = match &mountpoint {
        Some(path) => {
            let mount = Mountpoint::open(path)
                .map_err(|err| io::Error::new(err.kind(), format!("{path}: {err}")))?;
            let kind = if lustre_source || mount.is_lustre()? {
                EnricherKind::from_name("lustre")?
            } else {
                EnricherKind::Posix
            };
            Some((kind, mount))
        }
        None => None,
    };

    let mut deduplicator = Deduplicator::new(source, BATCH_SIZE);
    feed(
        sink.as_mut(),
        &mut deduplicator,
        enrichment.as_ref().map(|(kind, mount)| (*kind, mount)),
    )
}

fn main() -> ExitCode {
    env_logger::init();

    let command = Command::new("rbh-fsevents")
        .version(crate_version!())
        .about(
            "Collect changelog records from SOURCE, optionally enrich them with data \
             collected from MOUNTPOINT, and send them to DESTINATION.",
        )
        .after_help(
            "Note that uploading raw records to a metadata-index backend will fail, \
             they have to be enriched first.",
        )
        .arg(
            Arg::new("raw")
                .short('r')
                .long("raw")
                .action(ArgAction::SetTrue)
                .help("do not enrich changelog records (default)"),
        )
        .arg(
            Arg::new("enrich")
                .short('e')
                .long("enrich")
                .value_name("MOUNTPOINT")
                .help("enrich changelog records by querying MOUNTPOINT as needed"),
        )
        .arg(Arg::new("SOURCE").required(true).help(
            "'-' for stdin, a path to a record file, or an MDT name (eg. lustre-MDT0000)",
        ))
        .arg(
            Arg::new("DESTINATION")
                .required(true)
                .help("'-' for stdout, or a URI (eg. rbh:mongo:test)"),
        );

    let matches = match command.try_get_matches() {
        Ok(matches) => matches,
        Err(err)
            if matches!(
                err.kind(),
                clap::error::ErrorKind::DisplayHelp | clap::error::ErrorKind::DisplayVersion
            ) =>
        {
            let _ = err.print();
            return ExitCode::SUCCESS;
        }
        Err(err) => {
            let _ = err.print();
            return ExitCode::from(EX_USAGE);
        }
    };

    match run(&matches) {
        Ok(()) => ExitCode::SUCCESS,
        Err(err) if err.kind() == io::ErrorKind::InvalidInput => {
            eprintln!("rbh-fsevents: {err}");
            ExitCode::from(EX_USAGE)
        }
        Err(err) => {
            eprintln!("rbh-fsevents: {err}");
            ExitCode::FAILURE
        }
    }
}

#[cfg(test)]
mod test {
    use super::*;

    #[test]
    fn mdt_name_detection() {
        assert!(is_mdt_name("lustre-MDT0000"));
        assert!(is_mdt_name("fs2-MDT00a3"));
        assert!(!is_mdt_name("-MDT0000"));
        assert!(!is_mdt_name("lustre-MDT00"));
        assert!(!is_mdt_name("lustre-MDTzzzz"));
        assert!(!is_mdt_name("records.yaml"));
    }
}
