//! Line-by-line ingestion of an access log stream

use chrono::Local;
use std::io::{self, BufRead};
use tracing::{info, warn};

use crate::aggregate::TrafficAggregator;
use crate::parser::parse_line;
use crate::resolver::Resolver;

/// Line counts for one ingestion run
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct RunSummary {
    pub lines: u64,
    pub parsed: u64,
    pub skipped: u64,
}

/// Parse and fold every line of `reader`.
///
/// Lines that cannot be tokenized are logged with their number and content
/// and skipped. Only a read error ends the run early.
///
/// # Arguments
/// * `reader` - Newline-delimited log lines; invalid UTF-8 is replaced, not rejected
/// * `aggregator` - Receives every parsed record
/// * `progress_interval` - Emit a progress event every this many lines (0 disables)
pub fn ingest<B: BufRead, R: Resolver>(
    reader: B,
    aggregator: &mut TrafficAggregator<R>,
    progress_interval: u64,
) -> io::Result<RunSummary> {
    let mut summary = RunSummary::default();

    for raw in reader.split(b'\n') {
        let raw = raw?;
        let line = String::from_utf8_lossy(&raw);
        let line = line.trim_end_matches('\r');

        summary.lines += 1;
        let line_number = summary.lines;

        match parse_line(line_number, line) {
            Ok(record) => {
                aggregator.record(&record);
                summary.parsed += 1;
            }
            Err(e) => {
                warn!(line_number, line, error = %e, "Skipping unparseable line");
                summary.skipped += 1;
            }
        }

        if progress_interval > 0 && line_number % progress_interval == 0 {
            info!(
                processed = line_number,
                at = %Local::now().format("%Y%m%d%H%M%S"),
                "Progress"
            );
        }
    }

    info!(
        lines = summary.lines,
        parsed = summary.parsed,
        skipped = summary.skipped,
        "Finished reading input"
    );
    Ok(summary)
}
