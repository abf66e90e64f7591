//! Maps captured flows onto the fixed, ordered feature layout the model was
//! trained on.
//!
//! The steps are: one-hot expand the categorical columns, force-include the
//! indicator columns the model expects, derive `Status` from `Cause`, then
//! select the schema columns in order, filling anything missing with 0.

use ndarray::Array2;

use crate::flow_extractor::FlowBatch;

pub const FLAG_LITERAL_A: &str = " e        ";
pub const FLAG_LITERAL_B: &str = " e d      ";

pub const FEATURE_COUNT: usize = 25;

/// Model input columns. Order is significant.
pub const FEATURE_SCHEMA: [&str; FEATURE_COUNT] = [
    "tcp", "AckDat", "sHops", "Seq", "RST", "TcpRtt", "REQ", "dMeanPktSz",
    "Offset", "CON", "FIN", "sTtl", FLAG_LITERAL_A, "INT", "Mean", "Status",
    "icmp", "SrcTCPBase", FLAG_LITERAL_B, "sMeanPktSz", "DstLoss", "Loss",
    "dTtl", "SrcBytes", "TotBytes",
];

/// Columns expanded into one indicator column per distinct value.
pub const CATEGORICAL_COLUMNS: [&str; 3] = ["Proto", "State", "Flgs"];

/// Indicator columns that must exist even when the value never shows up.
pub const REQUIRED_INDICATORS: [&str; 9] = [
    "tcp", "icmp", "RST", "REQ", "CON", "FIN", "INT", FLAG_LITERAL_A, FLAG_LITERAL_B,
];

const CAUSE_COLUMN: &str = "Cause";
const STATUS_COLUMN: &str = "Status";
const STATUS_CAUSE: &str = "Status";

#[derive(Debug, Clone, Copy, PartialEq)]
pub struct FeatureVector([f64; FEATURE_COUNT]);

impl FeatureVector {
    pub fn get(&self, name: &str) -> Option<f64> {
        let idx = FEATURE_SCHEMA.iter().position(|c| *c == name)?;
        Some(self.0[idx])
    }

    pub fn values(&self) -> &[f64; FEATURE_COUNT] {
        &self.0
    }
}

#[derive(Debug, Clone, PartialEq, Default)]
pub struct FeatureBatch {
    rows: Vec<FeatureVector>,
}

impl FeatureBatch {
    pub fn columns(&self) -> &'static [&'static str] {
        &FEATURE_SCHEMA
    }

    pub fn rows(&self) -> &[FeatureVector] {
        &self.rows
    }

    pub fn len(&self) -> usize {
        self.rows.len()
    }

    pub fn is_empty(&self) -> bool {
        self.rows.is_empty()
    }

    /// Row-major `len() x FEATURE_COUNT` matrix.
    pub fn to_array(&self) -> Array2<f64> {
        let mut matrix = Array2::zeros((self.rows.len(), FEATURE_COUNT));
        for (mut row, vector) in matrix.rows_mut().into_iter().zip(&self.rows) {
            for (cell, value) in row.iter_mut().zip(vector.0.iter()) {
                *cell = *value;
            }
        }
        matrix
    }

    /// Views the batch as a capture again, with the schema as header.
    pub fn to_flow_batch(&self) -> FlowBatch {
        FlowBatch::from_fixed_rows(FEATURE_SCHEMA, self.rows.iter().map(|v| v.0.map(|x| x.to_string())))
    }
}

/// Intermediate table: named columns over numeric cells, `None` = missing.
struct Frame {
    columns: Vec<String>,
    rows: Vec<Vec<Option<f64>>>,
}

impl Frame {
    fn column_index(&self, name: &str) -> Option<usize> {
        self.columns.iter().position(|c| c == name)
    }

    /// Adds a zero-filled column unless one already exists; returns its index.
    fn ensure_column(&mut self, name: &str) -> usize {
        if let Some(idx) = self.column_index(name) {
            return idx;
        }
        self.columns.push(name.to_string());
        for row in &mut self.rows {
            row.push(Some(0.0));
        }
        self.columns.len() - 1
    }
}

/// Step 1: non-categorical columns carried over as numbers, categorical ones
/// replaced by indicator columns in first-observed order.
fn expand_categoricals(batch: &FlowBatch) -> Frame {
    let carried: Vec<&String> = batch
        .header()
        .iter()
        .filter(|h| !CATEGORICAL_COLUMNS.contains(&h.as_str()))
        .collect();

    let mut frame = Frame {
        columns: carried.iter().map(|h| h.to_string()).collect(),
        rows: batch
            .records()
            .iter()
            .map(|r| carried.iter().map(|h| r.number(h)).collect())
            .collect(),
    };

    for column in CATEGORICAL_COLUMNS {
        if !batch.has_column(column) {
            continue;
        }
        for (row, record) in batch.records().iter().enumerate() {
            let Some(value) = record.text(column) else {
                continue;
            };
            let idx = frame.ensure_column(value);
            frame.rows[row][idx] = Some(1.0);
        }
    }

    frame
}

/// Converts a capture into model-ready feature vectors.
///
/// An empty capture gives an empty batch. Re-normalizing the flow view of a
/// normalized batch returns the same batch.
pub fn normalize(batch: &FlowBatch) -> FeatureBatch {
    if batch.is_empty() {
        return FeatureBatch::default();
    }

    let mut frame = expand_categoricals(batch);

    for column in REQUIRED_INDICATORS {
        frame.ensure_column(column);
    }

    if batch.has_column(CAUSE_COLUMN) {
        let idx = frame.ensure_column(STATUS_COLUMN);
        for (row, record) in batch.records().iter().enumerate() {
            let flag = record.text(CAUSE_COLUMN) == Some(STATUS_CAUSE);
            frame.rows[row][idx] = Some(if flag { 1.0 } else { 0.0 });
        }
    }

    let positions: Vec<Option<usize>> = FEATURE_SCHEMA
        .iter()
        .map(|name| frame.column_index(name))
        .collect();

    let rows = frame
        .rows
        .iter()
        .map(|row| {
            let mut values = [0.0; FEATURE_COUNT];
            for (slot, pos) in values.iter_mut().zip(&positions) {
                *slot = pos.and_then(|p| row[p]).unwrap_or(0.0);
            }
            FeatureVector(values)
        })
        .collect();

    FeatureBatch { rows }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::flow_extractor::parse_flow_csv;

    const HEADER: &str = "Proto,AckDat,sHops,Seq,State,TcpRtt,dMeanPktSz,Offset,sTtl,Flgs,Mean,Cause,SrcTCPBase,sMeanPktSz,DstLoss,Loss,dTtl,SrcBytes,TotBytes";

    fn batch(rows: &[&str]) -> FlowBatch {
        let mut data = String::from(HEADER);
        for row in rows {
            data.push('\n');
            data.push_str(row);
        }
        parse_flow_csv(&data).unwrap()
    }

    #[test]
    fn test_schema_shape() {
        assert_eq!(FEATURE_SCHEMA.len(), 25);
        assert_eq!(FLAG_LITERAL_A.len(), 10);
        assert_eq!(FLAG_LITERAL_B.len(), 10);
        for indicator in REQUIRED_INDICATORS {
            assert!(FEATURE_SCHEMA.contains(&indicator), "{:?} missing from schema", indicator);
        }
    }

    #[test]
    fn test_one_hot_and_numeric_fields() {
        let features = normalize(&batch(&[
            "tcp,0.1,1,7,CON,0.2,60,128,64, e        ,0.5,Start,999,74,0,2,63,148,268",
        ]));
        let row = features.rows()[0];

        assert_eq!(row.get("tcp"), Some(1.0));
        assert_eq!(row.get("icmp"), Some(0.0));
        assert_eq!(row.get("CON"), Some(1.0));
        assert_eq!(row.get("RST"), Some(0.0));
        assert_eq!(row.get(FLAG_LITERAL_A), Some(1.0));
        assert_eq!(row.get(FLAG_LITERAL_B), Some(0.0));
        assert_eq!(row.get("AckDat"), Some(0.1));
        assert_eq!(row.get("Seq"), Some(7.0));
        assert_eq!(row.get("SrcTCPBase"), Some(999.0));
        assert_eq!(row.get("Loss"), Some(2.0));
        assert_eq!(row.get("TotBytes"), Some(268.0));
    }

    #[test]
    fn test_udp_only_batch_still_has_tcp_and_icmp() {
        let features = normalize(&batch(&[
            "udp,,,1,INT,,,0,64, e        ,0,Start,,60,0,0,,60,60",
            "udp,,,2,INT,,,0,64, e        ,0,Start,,60,0,0,,60,60",
        ]));
        assert_eq!(features.len(), 2);
        for row in features.rows() {
            assert_eq!(row.get("tcp"), Some(0.0));
            assert_eq!(row.get("icmp"), Some(0.0));
            assert_eq!(row.get("INT"), Some(1.0));
        }
    }

    #[test]
    fn test_status_derived_from_cause() {
        let features = normalize(&batch(&[
            "tcp,,,1,CON,,,0,64,,0,Status,,0,0,0,,0,0",
            "tcp,,,2,CON,,,0,64,,0,Start,,0,0,0,,0,0",
            "tcp,,,3,CON,,,0,64,,0,status,,0,0,0,,0,0",
            "tcp,,,4,CON,,,0,64,,0,,,0,0,0,,0,0",
        ]));
        let status: Vec<f64> = features
            .rows()
            .iter()
            .map(|r| r.get("Status").unwrap())
            .collect();
        assert_eq!(status, vec![1.0, 0.0, 0.0, 0.0]);
    }

    #[test]
    fn test_missing_numbers_become_zero() {
        let features = normalize(&batch(&["icmp,,,1,ECO,,,,,,,Start,,,,,,,"]));
        let row = features.rows()[0];
        assert_eq!(row.get("icmp"), Some(1.0));
        assert_eq!(row.get("sHops"), Some(0.0));
        assert_eq!(row.get("dTtl"), Some(0.0));
        assert!(row.values().iter().all(|v| v.is_finite()));
    }

    #[test]
    fn test_non_numeric_text_becomes_zero() {
        let features = normalize(&batch(&["tcp,abc,,1,CON,,,0,64,,0,Start,0x1f,0,0,0,,0,0"]));
        let row = features.rows()[0];
        assert_eq!(row.get("AckDat"), Some(0.0));
        assert_eq!(row.get("SrcTCPBase"), Some(0.0));
    }

    #[test]
    fn test_schema_is_stable_across_batches() {
        let a = normalize(&batch(&["tcp,,,1,RST,,,0,64, e d      ,0,Start,,0,0,0,,0,0"]));
        let b = normalize(&batch(&["arp,,,1,URP,,,0,64,weird,0,Status,,0,0,0,,0,0"]));
        assert_eq!(a.columns(), b.columns());
        assert_eq!(a.rows()[0].values().len(), b.rows()[0].values().len());
    }

    #[test]
    fn test_unknown_columns_are_dropped_and_absent_ones_zeroed() {
        let data = "Proto,Extra\nudp,42\n";
        let features = normalize(&parse_flow_csv(data).unwrap());
        let row = features.rows()[0];
        assert!(row.values().iter().all(|v| *v == 0.0));
    }

    #[test]
    fn test_normalize_is_idempotent() {
        let first = normalize(&batch(&[
            "tcp,0.25,3,1,FIN,0.01,60,128,64, e        ,0.5,Status,1000,74,1,2,63,148,268",
            "icmp,,,2,REQ,,,0,64, e d      ,0,Start,,60,0,0,,60,60",
        ]));
        let second = normalize(&first.to_flow_batch());
        assert_eq!(first, second);
    }

    #[test]
    fn test_empty_batch_normalizes_to_empty() {
        assert!(normalize(&batch(&[])).is_empty());
        assert!(normalize(&FlowBatch::empty()).is_empty());
    }

    #[test]
    fn test_to_array_layout() {
        let features = normalize(&batch(&[
            "tcp,,,1,CON,,,0,64,,0,Start,,0,0,0,,0,10",
            "udp,,,2,INT,,,0,64,,0,Start,,0,0,0,,0,20",
        ]));
        let matrix = features.to_array();
        assert_eq!(matrix.shape(), &[2, FEATURE_COUNT]);
        assert_eq!(matrix[[0, 0]], 1.0);
        assert_eq!(matrix[[1, 0]], 0.0);
        assert_eq!(matrix[[1, FEATURE_COUNT - 1]], 20.0);
    }
}
