use std::path::{Path, PathBuf};
use std::time::Duration;

use chrono::{DateTime, TimeZone};
use log::info;

use crate::error::Result;
use crate::flow_extractor::FlowBatch;

pub const CAPTURE_FILE_FORMAT: &str = "argus_capture_%d%m%Y-%H:%M:%S.csv";

#[derive(Debug, Clone, PartialEq)]
pub struct CaptureSummary {
    pub total_flows: usize,
    pub total_bytes: f64,
    pub lost_packets: f64,
    pub duration: Duration,
}

impl CaptureSummary {
    pub fn from_batch(batch: &FlowBatch, duration: Duration) -> Self {
        let sum = |column: &str| -> f64 {
            batch
                .records()
                .iter()
                .filter_map(|r| r.number(column))
                .sum()
        };
        CaptureSummary {
            total_flows: batch.len(),
            total_bytes: sum("TotBytes"),
            lost_packets: sum("Loss"),
            duration,
        }
    }

    pub fn log(&self) {
        info!("[+] Packet Capture Statistics [+]");
        info!("<> Total flows captured: {}", self.total_flows);
        info!("<> Total bytes captured: {}", self.total_bytes);
        info!("<> Lost packets: {}", self.lost_packets);
        info!("<> Duration: {:.2}", self.duration.as_secs_f64());
    }
}

pub fn capture_file_name<Tz: TimeZone>(at: &DateTime<Tz>) -> String
where
    Tz::Offset: std::fmt::Display,
{
    at.format(CAPTURE_FILE_FORMAT).to_string()
}

/// Writes the raw capture, header included, under `dir` and returns the file path.
pub fn archive_capture<Tz: TimeZone>(dir: &Path, batch: &FlowBatch, at: &DateTime<Tz>) -> Result<PathBuf>
where
    Tz::Offset: std::fmt::Display,
{
    let path = dir.join(capture_file_name(at));
    let mut writer = csv::Writer::from_path(&path)?;
    writer.write_record(batch.header())?;
    for record in batch.records() {
        writer.write_record(record.values().iter().map(|v| v.as_deref().unwrap_or("")))?;
    }
    writer.flush()?;
    info!("[+] Network traffic saved to {}.", path.display());
    Ok(path)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::flow_extractor::parse_flow_csv;
    use chrono::{Local, Utc};

    const DATA: &str = "Proto,Flgs,Loss,TotBytes\ntcp, e        ,2,100\nudp,,,50\nicmp,,1,\n";

    #[test]
    fn test_summary_sums_with_missing_as_zero() {
        let batch = parse_flow_csv(DATA).unwrap();
        let summary = CaptureSummary::from_batch(&batch, Duration::from_millis(1500));
        assert_eq!(summary.total_flows, 3);
        assert_eq!(summary.total_bytes, 150.0);
        assert_eq!(summary.lost_packets, 3.0);
    }

    #[test]
    fn test_summary_without_columns() {
        let batch = parse_flow_csv("Proto\ntcp\n").unwrap();
        let summary = CaptureSummary::from_batch(&batch, Duration::ZERO);
        assert_eq!(summary.total_flows, 1);
        assert_eq!(summary.total_bytes, 0.0);
        assert_eq!(summary.lost_packets, 0.0);
    }

    #[test]
    fn test_capture_file_name() {
        let at = Utc.with_ymd_and_hms(2025, 6, 1, 9, 8, 7).unwrap();
        assert_eq!(capture_file_name(&at), "argus_capture_01062025-09:08:07.csv");
    }

    #[test]
    fn test_archive_round_trips_raw_cells() {
        let dir = std::env::temp_dir().join(format!("argus_ids_archive_{}", std::process::id()));
        std::fs::create_dir_all(&dir).unwrap();

        let batch = parse_flow_csv(DATA).unwrap();
        let path = archive_capture(&dir, &batch, &Local::now()).unwrap();
        let written = std::fs::read_to_string(&path).unwrap();
        assert_eq!(parse_flow_csv(&written).unwrap(), batch);

        let _ = std::fs::remove_dir_all(&dir);
    }
}
