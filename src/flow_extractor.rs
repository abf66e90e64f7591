use std::io::{self, ErrorKind, Write};
use std::path::PathBuf;
use std::process::{Command, Stdio};
use std::sync::Arc;

use log::{debug, warn};

use crate::error::{ArgusError, Result};

/// Columns requested from `ra -s`, in order.
pub const RA_FIELDS: [&str; 19] = [
    "proto", "ackdat", "shops", "seq", "state", "tcprtt", "dmeansz", "offset", "sttl",
    "flgs", "mean", "cause", "stcpb", "smeansz", "dloss", "loss", "dttl", "sbytes", "bytes",
];

/// One flow as printed by `ra`. Cells are kept verbatim; empty cells are `None`.
#[derive(Debug, Clone, PartialEq)]
pub struct FlowRecord {
    header: Arc<[String]>,
    values: Vec<Option<String>>,
}

impl FlowRecord {
    fn position(&self, column: &str) -> Option<usize> {
        self.header.iter().position(|h| h == column)
    }

    pub fn text(&self, column: &str) -> Option<&str> {
        let idx = self.position(column)?;
        self.values.get(idx)?.as_deref()
    }

    /// Numeric view of a cell; `None` when absent, empty or not a number.
    pub fn number(&self, column: &str) -> Option<f64> {
        self.text(column)?
            .trim()
            .parse::<f64>()
            .ok()
            .filter(|v| !v.is_nan())
    }

    pub fn values(&self) -> &[Option<String>] {
        &self.values
    }
}

/// The header and rows of one capture window, in emission order.
#[derive(Debug, Clone, PartialEq)]
pub struct FlowBatch {
    header: Arc<[String]>,
    records: Vec<FlowRecord>,
}

impl FlowBatch {
    pub fn empty() -> Self {
        Self {
            header: Arc::from(Vec::new()),
            records: Vec::new(),
        }
    }

    /// Builds a batch from already split rows. Every row must match the header width.
    pub fn from_rows<H, R>(header: H, rows: R) -> Result<Self>
    where
        H: IntoIterator,
        H::Item: Into<String>,
        R: IntoIterator<Item = Vec<Option<String>>>,
    {
        let header: Arc<[String]> = header.into_iter().map(Into::into).collect();
        let mut records = Vec::new();
        for (line, values) in rows.into_iter().enumerate() {
            if values.len() != header.len() {
                return Err(ArgusError::CaptureParse(format!(
                    "record {} has {} fields, header has {}",
                    line + 1,
                    values.len(),
                    header.len()
                )));
            }
            records.push(FlowRecord {
                header: Arc::clone(&header),
                values,
            });
        }
        Ok(Self { header, records })
    }

    /// Builds a batch whose row width is fixed by the type, so no row can be ragged.
    pub fn from_fixed_rows<const N: usize, R>(header: [&str; N], rows: R) -> Self
    where
        R: IntoIterator<Item = [String; N]>,
    {
        let header: Arc<[String]> = header.iter().map(|h| h.to_string()).collect();
        let records = rows
            .into_iter()
            .map(|row| FlowRecord {
                header: Arc::clone(&header),
                values: row.into_iter().map(Some).collect(),
            })
            .collect();
        Self { header, records }
    }

    pub fn header(&self) -> &[String] {
        &self.header
    }

    pub fn has_column(&self, column: &str) -> bool {
        self.header.iter().any(|h| h == column)
    }

    pub fn records(&self) -> &[FlowRecord] {
        &self.records
    }

    pub fn len(&self) -> usize {
        self.records.len()
    }

    pub fn is_empty(&self) -> bool {
        self.records.is_empty()
    }

    /// Right-aligned text table with a row number column; missing cells print as `NaN`.
    pub fn write_table<W: Write>(&self, out: &mut W) -> io::Result<()> {
        let cells: Vec<Vec<&str>> = self
            .records
            .iter()
            .map(|r| r.values.iter().map(|v| v.as_deref().unwrap_or("NaN")).collect())
            .collect();

        let mut widths: Vec<usize> = self.header.iter().map(|h| h.len()).collect();
        for row in &cells {
            for (width, cell) in widths.iter_mut().zip(row) {
                *width = (*width).max(cell.len());
            }
        }
        let index_width = self.records.len().saturating_sub(1).to_string().len();

        write!(out, "{:index_width$}", "")?;
        for (name, width) in self.header.iter().zip(&widths) {
            write!(out, "  {:>width$}", name, width = *width)?;
        }
        writeln!(out)?;

        for (idx, row) in cells.iter().enumerate() {
            write!(out, "{:>index_width$}", idx)?;
            for (cell, width) in row.iter().zip(&widths) {
                write!(out, "  {:>width$}", cell, width = *width)?;
            }
            writeln!(out)?;
        }
        writeln!(out, "\n[{} rows x {} columns]", self.records.len(), self.header.len())
    }
}

/// Parses the comma separated output of `ra -c ','`.
pub fn parse_flow_csv(data: &str) -> Result<FlowBatch> {
    if data.trim().is_empty() {
        return Ok(FlowBatch::empty());
    }

    let mut reader = csv::ReaderBuilder::new()
        .delimiter(b',')
        .has_headers(true)
        .flexible(false)
        .from_reader(data.as_bytes());

    let header: Vec<String> = reader
        .headers()
        .map_err(|e| ArgusError::CaptureParse(e.to_string()))?
        .iter()
        .map(|h| h.trim().to_string())
        .collect();

    let mut rows: Vec<Vec<Option<String>>> = Vec::new();
    for result in reader.records() {
        let record = result.map_err(|e| ArgusError::CaptureParse(e.to_string()))?;
        rows.push(
            record
                .iter()
                .map(|cell| if cell.is_empty() { None } else { Some(cell.to_string()) })
                .collect(),
        );
    }

    FlowBatch::from_rows(header, rows)
}

/// Pulls a bounded window of flows from a running argus through `ra`.
pub struct FlowExtractor {
    ra_path: PathBuf,
    host: String,
    port: u16,
}

impl FlowExtractor {
    pub fn new(ra_path: impl Into<PathBuf>, host: impl Into<String>, port: u16) -> Self {
        Self {
            ra_path: ra_path.into(),
            host: host.into(),
            port,
        }
    }

    fn command(&self, duration_secs: u64) -> Command {
        let mut cmd = Command::new(&self.ra_path);
        cmd.arg("-S")
            .arg(format!("{}:{}", self.host, self.port))
            .arg("-T")
            .arg(duration_secs.to_string())
            .args(["-c", ","])
            .arg("-s")
            .args(RA_FIELDS)
            .stdin(Stdio::null())
            .stdout(Stdio::piped())
            .stderr(Stdio::piped());
        cmd
    }

    /// Runs `ra` for `duration_secs` and parses whatever it printed.
    ///
    /// `ra` stops on its own once the window is over; its exit marks the end
    /// of the batch. Nothing is retried.
    pub fn capture(&self, duration_secs: u64) -> Result<FlowBatch> {
        debug!("Running {:?}", self.command(duration_secs));

        let output = self.command(duration_secs).output().map_err(|e| match e.kind() {
            ErrorKind::NotFound => ArgusError::CaptureInvocation(format!(
                "{} not found",
                self.ra_path.display()
            )),
            ErrorKind::PermissionDenied => ArgusError::CaptureInvocation(format!(
                "{} is not executable",
                self.ra_path.display()
            )),
            _ => ArgusError::UnexpectedCapture(e.to_string()),
        })?;

        if !output.status.success() {
            let stderr = String::from_utf8_lossy(&output.stderr);
            return Err(match output.status.code() {
                Some(code) => ArgusError::CaptureInvocation(format!(
                    "{} returned non-zero exit status {}: {}",
                    self.ra_path.display(),
                    code,
                    stderr.trim()
                )),
                None => ArgusError::UnexpectedCapture(format!(
                    "{} terminated by signal ({})",
                    self.ra_path.display(),
                    output.status
                )),
            });
        }

        let stdout = String::from_utf8(output.stdout)
            .map_err(|e| ArgusError::CaptureParse(format!("output is not UTF-8: {}", e)))?;
        let batch = parse_flow_csv(&stdout)?;
        if batch.header().is_empty() {
            warn!("ra printed nothing; no flows were seen in this window");
        }
        Ok(batch)
    }
}
