//! Offline inspection of a recorded session.

use anyhow::Result;
use std::fmt;

use crate::dataset::{read_manifest, ManifestRow, SessionConfig};

/// Min, max and mean of one numeric column.
#[derive(Clone, Copy, Debug, PartialEq)]
pub struct ColumnStats {
    pub min: f64,
    pub max: f64,
    pub mean: f64,
    pub count: usize,
}

impl ColumnStats {
    pub fn from_values(values: impl IntoIterator<Item = f64>) -> Option<Self> {
        let mut count = 0usize;
        let mut sum = 0.0;
        let mut min = f64::INFINITY;
        let mut max = f64::NEG_INFINITY;
        for value in values {
            count += 1;
            sum += value;
            min = min.min(value);
            max = max.max(value);
        }
        (count > 0).then(|| Self {
            min,
            max,
            mean: sum / count as f64,
            count,
        })
    }
}

#[derive(Clone, Debug, PartialEq)]
pub struct DatasetSummary {
    pub session_id: String,
    pub rows: usize,
    /// First and last timestamp.
    pub time_span: Option<(f64, f64)>,
    pub throttle: Option<ColumnStats>,
    pub steer: Option<ColumnStats>,
    pub brake: Option<ColumnStats>,
    pub speed: Option<ColumnStats>,
    pub unfilled_speed: usize,
    /// Manifest image paths that do not exist under the session directory.
    pub missing_images: Vec<String>,
    /// Rows whose timestamp does not exceed the previous row's.
    pub out_of_order: usize,
}

impl DatasetSummary {
    pub fn is_consistent(&self) -> bool {
        self.missing_images.is_empty() && self.out_of_order == 0
    }
}

pub fn summarize(session: &SessionConfig) -> Result<DatasetSummary> {
    let rows = read_manifest(&session.manifest_path())?;
    let missing_images = rows
        .iter()
        .flat_map(|row| [&row.rgb_path, &row.mask_path])
        .filter(|rel| !session.dir.join(rel.as_str()).is_file())
        .cloned()
        .collect();
    Ok(summarize_rows(&session.session_id, &rows, missing_images))
}

fn summarize_rows(session_id: &str, rows: &[ManifestRow], missing_images: Vec<String>) -> DatasetSummary {
    let time_span = rows
        .first()
        .zip(rows.last())
        .map(|(first, last)| (first.timestamp, last.timestamp));
    let out_of_order = rows
        .windows(2)
        .filter(|pair| pair[1].timestamp <= pair[0].timestamp)
        .count();

    DatasetSummary {
        session_id: session_id.to_string(),
        rows: rows.len(),
        time_span,
        throttle: ColumnStats::from_values(rows.iter().map(|r| r.throttle)),
        steer: ColumnStats::from_values(rows.iter().map(|r| r.steer)),
        brake: ColumnStats::from_values(rows.iter().map(|r| r.brake)),
        speed: ColumnStats::from_values(rows.iter().filter_map(|r| r.speed)),
        unfilled_speed: rows.iter().filter(|r| r.speed.is_none()).count(),
        missing_images,
        out_of_order,
    }
}

impl fmt::Display for DatasetSummary {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        writeln!(f, "session:   {}", self.session_id)?;
        writeln!(f, "rows:      {}", self.rows)?;
        match self.time_span {
            Some((start, end)) => writeln!(
                f,
                "time span: {:.3} .. {:.3} s ({:.3} s)",
                start,
                end,
                end - start
            )?,
            None => writeln!(f, "time span: -")?,
        }
        for (name, stats) in [
            ("throttle", &self.throttle),
            ("steer", &self.steer),
            ("brake", &self.brake),
            ("speed", &self.speed),
        ] {
            match stats {
                Some(s) => writeln!(
                    f,
                    "{:<10} min={:.3} max={:.3} mean={:.3} n={}",
                    name, s.min, s.max, s.mean, s.count
                )?,
                None => writeln!(f, "{:<10} -", name)?,
            }
        }
        writeln!(f, "unfilled speed rows: {}", self.unfilled_speed)?;
        writeln!(f, "out-of-order rows:   {}", self.out_of_order)?;
        write!(f, "missing images:      {}", self.missing_images.len())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn row(timestamp: f64, throttle: f64, speed: Option<f64>) -> ManifestRow {
        ManifestRow {
            rgb_path: format!("rgb/{timestamp}.png"),
            mask_path: format!("masks/{timestamp}.png"),
            timestamp,
            throttle,
            steer: -0.1,
            brake: 0.0,
            speed,
        }
    }

    #[test]
    fn column_stats() {
        let stats = ColumnStats::from_values([1.0, 3.0, 2.0]).unwrap();
        assert_eq!((stats.min, stats.max, stats.count), (1.0, 3.0, 3));
        assert!((stats.mean - 2.0).abs() < 1e-12);
        assert!(ColumnStats::from_values(std::iter::empty()).is_none());
    }

    #[test]
    fn summary_counts_unfilled_and_out_of_order_rows() {
        let rows = vec![
            row(0.0, 0.2, None),
            row(0.05, 0.4, Some(3.0)),
            row(0.05, 0.6, Some(5.0)),
        ];
        let summary = summarize_rows("s", &rows, Vec::new());
        assert_eq!(summary.rows, 3);
        assert_eq!(summary.time_span, Some((0.0, 0.05)));
        assert_eq!(summary.unfilled_speed, 1);
        assert_eq!(summary.out_of_order, 1);
        assert_eq!(summary.speed.map(|s| s.mean), Some(4.0));
        assert!(!summary.is_consistent());
    }

    #[test]
    fn empty_manifest_summary() {
        let summary = summarize_rows("s", &[], Vec::new());
        assert_eq!(summary.rows, 0);
        assert_eq!(summary.time_span, None);
        assert!(summary.throttle.is_none());
        assert!(summary.is_consistent());
        assert!(summary.to_string().contains("rows:      0"));
    }
}
