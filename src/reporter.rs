use std::fs::File;
use std::io::Write;
use std::path::Path;

use chrono::{DateTime, FixedOffset, Utc};
use serde::Serialize;

use crate::error::{ArgusError, Result};

pub const RESULT_HEADER: [&str; 5] = ["Sample Index", "Time", "Label", "Attack Type", "Attack Tool"];
pub const TIME_FORMAT: &str = "%H:%M:%S-%d/%m/%Y";
const UNKNOWN: &str = "Unknown";

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct ResultRow {
    #[serde(rename = "Sample Index")]
    pub index: usize,
    #[serde(rename = "Time")]
    pub timestamp: String,
    #[serde(rename = "Label")]
    pub label: String,
    #[serde(rename = "Attack Type")]
    pub attack_type: String,
    #[serde(rename = "Attack Tool")]
    pub attack_tool: String,
}

/// Splits `<label>_<attackType>_<attackTool>`; anything else is reported as-is
/// with unknown type and tool.
pub fn decompose(composite: &str) -> (String, String, String) {
    let parts: Vec<&str> = composite.split('_').collect();
    match parts.as_slice() {
        [label, attack_type, tool] => (label.to_string(), attack_type.to_string(), tool.to_string()),
        _ => (composite.to_string(), UNKNOWN.to_string(), UNKNOWN.to_string()),
    }
}

pub fn utc_offset(hours: i32) -> Result<FixedOffset> {
    FixedOffset::east_opt(hours * 3600)
        .ok_or_else(|| ArgusError::Config(format!("invalid UTC offset: {} hours", hours)))
}

/// Writes result rows to a CSV sink and echoes them to the console.
pub struct ResultReporter<W: Write> {
    writer: csv::Writer<W>,
    zone: FixedOffset,
}

impl ResultReporter<File> {
    /// Truncates `path`; every run starts a fresh results file.
    pub fn create(path: &Path, zone: FixedOffset) -> Result<Self> {
        Self::new(File::create(path)?, zone)
    }
}

impl<W: Write> ResultReporter<W> {
    pub fn new(sink: W, zone: FixedOffset) -> Result<Self> {
        let mut writer = csv::WriterBuilder::new().has_headers(false).from_writer(sink);
        writer.write_record(RESULT_HEADER)?;
        writer.flush()?;
        println!("\nPresenting Results:");
        Ok(ResultReporter { writer, zone })
    }

    pub fn report(&mut self, index: usize, composite: &str) -> Result<ResultRow> {
        let now = Utc::now().with_timezone(&self.zone);
        self.report_at(index, composite, now)
    }

    pub fn report_at(&mut self, index: usize, composite: &str, at: DateTime<FixedOffset>) -> Result<ResultRow> {
        let (label, attack_type, attack_tool) = decompose(composite);
        let row = ResultRow {
            index,
            timestamp: at.format(TIME_FORMAT).to_string(),
            label,
            attack_type,
            attack_tool,
        };

        self.writer.serialize(&row)?;
        self.writer.flush()?;

        println!("{}", "=".repeat(50));
        println!("Sample {} [{}]:", row.index, row.timestamp);
        println!("  - Label        : {}", row.label);
        println!("  - Attack Type  : {}", row.attack_type);
        println!("  - Attack Tool  : {}\n", row.attack_tool);

        Ok(row)
    }

    pub fn into_inner(self) -> Result<W> {
        self.writer
            .into_inner()
            .map_err(|e| ArgusError::Io(e.error().to_string()))
    }
}
