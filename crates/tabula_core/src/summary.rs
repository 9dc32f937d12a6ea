use crate::error::AgentError;
use serde::{Deserialize, Serialize};
use std::path::Path;

/// Descriptive statistics for one numeric column. Field names follow the
/// keys pandas' `describe()` emits, which is what the generated notebooks
/// print alongside these numbers.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct ColumnStats {
    pub name: String,
    pub count: usize,
    pub mean: f64,
    /// Sample standard deviation (ddof = 1); absent for a single observation.
    pub std: Option<f64>,
    pub min: f64,
    #[serde(rename = "25%")]
    pub q25: f64,
    #[serde(rename = "50%")]
    pub median: f64,
    #[serde(rename = "75%")]
    pub q75: f64,
    pub max: f64,
}

/// Immutable per-run summary of one CSV file, consumed by the reasoning loop.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct DatasetSummary {
    pub file: String,
    pub row_count: usize,
    pub columns: Vec<String>,
    pub numeric: Vec<ColumnStats>,
}

/// Read a CSV file and compute per-column descriptive statistics.
///
/// A column counts as numeric when every non-empty field parses as a float;
/// empty fields are treated as missing and excluded from the counts. Columns
/// with any non-numeric field are listed in `columns` but get no stats.
pub fn summarize_csv(path: &Path) -> Result<DatasetSummary, AgentError> {
    let mut reader = csv::Reader::from_path(path).map_err(|e| csv_error(path, e))?;
    let headers: Vec<String> = reader
        .headers()
        .map_err(|e| csv_error(path, e))?
        .iter()
        .map(str::to_string)
        .collect();
    if headers.is_empty() {
        return Err(AgentError::Format(format!("{}: no header row", path.display())));
    }

    let mut accums: Vec<ColumnAccum> = headers.iter().map(|h| ColumnAccum::new(h)).collect();
    let mut row_count = 0usize;
    for record in reader.records() {
        let record = record.map_err(|e| csv_error(path, e))?;
        row_count += 1;
        for (i, field) in record.iter().enumerate() {
            accums[i].observe(field);
        }
    }

    Ok(DatasetSummary {
        file: path.display().to_string(),
        row_count,
        columns: headers,
        numeric: accums.into_iter().filter_map(ColumnAccum::finish).collect(),
    })
}

fn csv_error(path: &Path, e: csv::Error) -> AgentError {
    if e.is_io_error() {
        AgentError::DataAccess(format!("{}: {}", path.display(), e))
    } else {
        AgentError::Format(format!("{}: {}", path.display(), e))
    }
}

struct ColumnAccum {
    name: String,
    values: Vec<f64>,
    all_numeric: bool,
}

impl ColumnAccum {
    fn new(name: &str) -> Self {
        Self { name: name.to_string(), values: Vec::new(), all_numeric: true }
    }

    fn observe(&mut self, field: &str) {
        let field = field.trim();
        if field.is_empty() {
            return;
        }
        match field.parse::<f64>() {
            Ok(v) => self.values.push(v),
            Err(_) => self.all_numeric = false,
        }
    }

    fn finish(mut self) -> Option<ColumnStats> {
        if !self.all_numeric || self.values.is_empty() {
            return None;
        }
        self.values.sort_by(|a, b| a.partial_cmp(b).unwrap_or(std::cmp::Ordering::Equal));
        let n = self.values.len();
        let mean = self.values.iter().sum::<f64>() / n as f64;
        let std = if n > 1 {
            let ss = self.values.iter().map(|v| (v - mean).powi(2)).sum::<f64>();
            Some((ss / (n - 1) as f64).sqrt())
        } else {
            None
        };
        Some(ColumnStats {
            name: self.name,
            count: n,
            mean,
            std,
            min: self.values[0],
            q25: percentile(&self.values, 0.25),
            median: percentile(&self.values, 0.5),
            q75: percentile(&self.values, 0.75),
            max: self.values[n - 1],
        })
    }
}

// Linear interpolation between closest ranks, matching numpy's default.
// `sorted` must be non-empty and ascending.
fn percentile(sorted: &[f64], p: f64) -> f64 {
    let h = (sorted.len() - 1) as f64 * p;
    let lo = h.floor() as usize;
    let hi = h.ceil() as usize;
    sorted[lo] + (h - lo as f64) * (sorted[hi] - sorted[lo])
}
