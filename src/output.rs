//! Output formatting and persistence for feeds and run statistics.
//!
//! Supports binary and human-readable feed files, feed decoding for
//! inspection, and CSV append of run statistics.

use anyhow::{Context, Result};
use prost::Message;
use tracing::{debug, info, warn};

use crate::gtfs_rt::FeedMessage;
use crate::stats::{FeedSummary, RunStats};
use csv::WriterBuilder;
use std::fs::OpenOptions;
use std::path::Path;

/// Writes `feed` to `path`, encoded as protobuf or as pretty debug text.
///
/// The file is replaced through a rename so readers never see a partial feed.
pub fn write_feed(path: &str, feed: &FeedMessage, readable: bool) -> Result<()> {
    let bytes = if readable {
        format!("{feed:#?}\n").into_bytes()
    } else {
        feed.encode_to_vec()
    };

    let tmp = format!("{path}.tmp");
    std::fs::write(&tmp, &bytes).with_context(|| format!("writing {tmp}"))?;
    std::fs::rename(&tmp, path).with_context(|| format!("replacing {path}"))?;

    info!(
        path,
        bytes = bytes.len(),
        entities = feed.entity.len(),
        readable,
        "Feed written"
    );
    Ok(())
}

/// Decodes a protobuf-encoded GTFS-RT [`FeedMessage`] from raw bytes.
///
/// # Errors
///
/// Returns an error if the bytes are not valid protobuf for a `FeedMessage`.
pub fn parse_feed(bytes: &[u8]) -> Result<FeedMessage> {
    Ok(FeedMessage::decode(bytes)?)
}

/// Reads and decodes a binary feed file.
pub fn read_feed(path: &str) -> Result<FeedMessage> {
    let bytes = std::fs::read(path).with_context(|| format!("reading {path}"))?;
    parse_feed(&bytes).with_context(|| format!("decoding {path}"))
}

/// Logs a feed summary as pretty-printed JSON.
pub fn print_summary(summary: &FeedSummary) -> Result<()> {
    info!("{}", serde_json::to_string_pretty(summary)?);
    Ok(())
}

/// Appends a [`RunStats`] record as a row to a CSV file.
///
/// Creates the file with headers if it does not already exist.
pub fn append_record(path: &str, stats: &RunStats) -> Result<()> {
    let file_exists = Path::new(path).exists();
    debug!(path, file_exists, "Appending CSV record");

    let file = OpenOptions::new().append(true).create(true).open(path)?;

    let mut writer = WriterBuilder::new()
        .has_headers(!file_exists) // IMPORTANT when appending
        .from_writer(file);

    writer.serialize(stats)?;
    writer.flush()?;

    Ok(())
}

/// Appends an error row for a run that failed. A failed write is only logged.
pub fn record_failure(path: &str, error_type: &str, message: &str) {
    if let Err(e) = append_record(path, &RunStats::from_error(error_type, message)) {
        warn!(path, error = ?e, "Failed to record run failure in stats file");
    }
}
