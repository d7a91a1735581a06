//! Structured logging.
//!
//! # Responsibilities
//! - Initialize the global tracing subscriber once per process
//! - Pick the record format from the run mode
//! - Route records to stdout, stderr or an append-only file
//!
//! # Design Decisions
//! - Uses tracing crate for structured logging
//! - JSON format for production, pretty format (with file/line) for debug mode
//! - `RUST_LOG` overrides the configured level
//! - The writer sits behind one `Mutex`, so a record is never interleaved
//!   with another

use std::fs::OpenOptions;
use std::io::{self, Write};
use std::sync::Mutex;

use tracing_subscriber::layer::SubscriberExt;
use tracing_subscriber::util::SubscriberInitExt;
use tracing_subscriber::{fmt, EnvFilter, Layer};

use crate::config::LoggingConfig;

/// Destination shared by every log call.
pub type LogWriter = Mutex<Box<dyn Write + Send>>;

/// Install the global subscriber.
///
/// Fails if the output file cannot be opened. A subscriber installed earlier
/// (by tests or an embedding application) is kept.
pub fn init_logging(config: &LoggingConfig, debug_mode: bool) -> io::Result<()> {
    let filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new(&config.level));
    let writer = open_writer(&config.output)?;

    let layer = if debug_mode {
        fmt::layer()
            .pretty()
            .with_file(true)
            .with_line_number(true)
            .with_writer(writer)
            .boxed()
    } else {
        fmt::layer()
            .json()
            .with_current_span(false)
            .with_writer(writer)
            .boxed()
    };

    if tracing_subscriber::registry().with(layer).with(filter).try_init().is_err() {
        tracing::debug!("Global subscriber already installed");
    }
    Ok(())
}

/// Open the configured destination.
pub fn open_writer(output: &str) -> io::Result<LogWriter> {
    let sink: Box<dyn Write + Send> = match output {
        "stdout" | "" => Box::new(io::stdout()),
        "stderr" => Box::new(io::stderr()),
        path => Box::new(OpenOptions::new().create(true).append(true).open(path)?),
    };
    Ok(Mutex::new(sink))
}
