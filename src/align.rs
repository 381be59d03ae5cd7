//! Post-replay speed alignment.
//!
//! Speed is not known while frames are captured, so the manifest is written
//! with an empty speed column and a separately recorded speed log is spliced
//! in afterwards:
//!
//! 1. Speed log records whose time or speed is not numeric are dropped.
//! 2. The first valid record's time is the anchor time.
//! 3. The anchor row is the manifest row whose timestamp is closest to the
//!    anchor time (lowest index on ties).
//! 4. Record `i` fills row `anchor + i` until either side runs out.
//!
//! The splice is positional after the anchor. Rows past the end of the speed
//! log keep their empty speed. The manifest is rewritten in place; images and
//! every other column are left alone.

use anyhow::{Context, Result};
use std::fmt;
use std::fs;
use std::path::Path;

use crate::dataset::{read_manifest, write_manifest, ManifestRow, SessionConfig};

/// One valid speed log record.
#[derive(Clone, Copy, Debug, PartialEq)]
pub struct SpeedSample {
    pub time: f64,
    pub speed: f64,
}

/// Parsed speed log plus how many records were thrown away.
#[derive(Clone, Debug, Default, PartialEq)]
pub struct SpeedLog {
    pub samples: Vec<SpeedSample>,
    pub discarded: usize,
}

impl SpeedLog {
    pub fn total_records(&self) -> usize {
        self.samples.len() + self.discarded
    }
}

/// Why the merger left the manifest untouched.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum SkipReason {
    EmptyManifest,
    EmptySpeedLog,
    NoValidSpeedRecords,
}

impl fmt::Display for SkipReason {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let text = match self {
            SkipReason::EmptyManifest => "manifest has no rows",
            SkipReason::EmptySpeedLog => "speed log has no records",
            SkipReason::NoValidSpeedRecords => "speed log has no numeric records",
        };
        f.write_str(text)
    }
}

#[derive(Clone, Debug, PartialEq)]
pub enum AlignOutcome {
    Merged {
        anchor_row: usize,
        anchor_time: f64,
        filled: usize,
        unfilled: usize,
    },
    Skipped(SkipReason),
    /// Merge could not run (missing or malformed input). Manifest untouched.
    Failed(String),
}

/// Read a `time,speed` log. A header line, if present, is dropped as a
/// non-numeric record.
pub fn read_speed_log(path: &Path) -> Result<SpeedLog> {
    let mut reader = csv::ReaderBuilder::new()
        .has_headers(false)
        .flexible(true)
        .trim(csv::Trim::All)
        .from_path(path)
        .with_context(|| format!("open speed log {}", path.display()))?;

    let mut log = SpeedLog::default();
    for record in reader.byte_records() {
        let record = record.with_context(|| format!("read speed log {}", path.display()))?;
        if record.iter().all(|field| field.is_empty()) {
            continue;
        }
        match parse_sample(&record) {
            Some(sample) => log.samples.push(sample),
            None => log.discarded += 1,
        }
    }
    Ok(log)
}

fn parse_sample(record: &csv::ByteRecord) -> Option<SpeedSample> {
    let field = |idx: usize| std::str::from_utf8(record.get(idx)?).ok();
    let time: f64 = field(0)?.parse().ok()?;
    let speed: f64 = field(1)?.parse().ok()?;
    if time.is_finite() && speed.is_finite() {
        Some(SpeedSample { time, speed })
    } else {
        None
    }
}

/// Index of the timestamp closest to `anchor_time`; ties go to the lowest index.
pub fn find_anchor(timestamps: &[f64], anchor_time: f64) -> Option<usize> {
    let mut best: Option<(usize, f64)> = None;
    for (idx, &ts) in timestamps.iter().enumerate() {
        let diff = (ts - anchor_time).abs();
        match best {
            Some((_, best_diff)) if diff >= best_diff => {}
            _ => best = Some((idx, diff)),
        }
    }
    best.map(|(idx, _)| idx)
}

/// Copy speeds into `rows[anchor..]` in order. Returns the number filled.
pub fn splice_speeds(rows: &mut [ManifestRow], anchor: usize, samples: &[SpeedSample]) -> usize {
    let Some(tail) = rows.get_mut(anchor..) else {
        return 0;
    };
    let mut filled = 0;
    for (row, sample) in tail.iter_mut().zip(samples) {
        row.speed = Some(sample.speed);
        filled += 1;
    }
    filled
}

/// Align in memory. Returns the anchor row, anchor time and rows filled.
pub fn align_rows(
    rows: &mut [ManifestRow],
    samples: &[SpeedSample],
) -> std::result::Result<(usize, f64, usize), SkipReason> {
    if rows.is_empty() {
        return Err(SkipReason::EmptyManifest);
    }
    let first = samples.first().ok_or(SkipReason::NoValidSpeedRecords)?;
    let timestamps: Vec<f64> = rows.iter().map(|r| r.timestamp).collect();
    let anchor = find_anchor(&timestamps, first.time).ok_or(SkipReason::EmptyManifest)?;
    let filled = splice_speeds(rows, anchor, samples);
    Ok((anchor, first.time, filled))
}

/// Merge `speed_log` into the session's manifest and rewrite it in place.
pub fn merge_speed_log(session: &SessionConfig, speed_log: &Path) -> Result<AlignOutcome> {
    let manifest_path = session.manifest_path();
    let mut rows = read_manifest(&manifest_path)?;
    if rows.is_empty() {
        log::warn!(
            "speed merge skipped for {}: {}",
            session.session_id,
            SkipReason::EmptyManifest
        );
        return Ok(AlignOutcome::Skipped(SkipReason::EmptyManifest));
    }

    let log = read_speed_log(speed_log)?;
    if log.total_records() == 0 {
        log::warn!(
            "speed merge skipped for {}: {} ({})",
            session.session_id,
            SkipReason::EmptySpeedLog,
            speed_log.display()
        );
        return Ok(AlignOutcome::Skipped(SkipReason::EmptySpeedLog));
    }
    if log.discarded > 0 {
        log::debug!(
            "speed log {}: discarded {} non-numeric records",
            speed_log.display(),
            log.discarded
        );
    }

    let (anchor_row, anchor_time, filled) = match align_rows(&mut rows, &log.samples) {
        Ok(result) => result,
        Err(reason) => {
            log::warn!("speed merge skipped for {}: {}", session.session_id, reason);
            return Ok(AlignOutcome::Skipped(reason));
        }
    };

    let tmp_path = manifest_path.with_extension("csv.tmp");
    write_manifest(&tmp_path, &rows)?;
    fs::rename(&tmp_path, &manifest_path)
        .with_context(|| format!("replace manifest {}", manifest_path.display()))?;

    let unfilled = rows.len() - filled;
    log::info!(
        "speed merged into {}: anchor row {} (t={:.6}) for log time {:.6}, {} filled, {} unfilled",
        session.session_id,
        anchor_row,
        rows[anchor_row].timestamp,
        anchor_time,
        filled,
        unfilled
    );
    Ok(AlignOutcome::Merged {
        anchor_row,
        anchor_time,
        filled,
        unfilled,
    })
}

#[cfg(test)]
mod tests {
    use super::*;

    fn rows(timestamps: &[f64]) -> Vec<ManifestRow> {
        timestamps
            .iter()
            .map(|&t| ManifestRow {
                rgb_path: format!("rgb/{t}.png"),
                mask_path: format!("masks/{t}.png"),
                timestamp: t,
                throttle: 0.5,
                steer: 0.0,
                brake: 0.0,
                speed: None,
            })
            .collect()
    }

    fn samples(pairs: &[(f64, f64)]) -> Vec<SpeedSample> {
        pairs
            .iter()
            .map(|&(time, speed)| SpeedSample { time, speed })
            .collect()
    }

    #[test]
    fn anchor_is_closest_timestamp() {
        assert_eq!(find_anchor(&[0.0, 1.0, 2.0, 3.0], 2.2), Some(2));
        assert_eq!(find_anchor(&[0.0, 1.0, 2.0, 3.0], 100.0), Some(3));
        assert_eq!(find_anchor(&[0.0, 1.0, 2.0, 3.0], -4.0), Some(0));
        assert_eq!(find_anchor(&[], 1.0), None);
    }

    #[test]
    fn anchor_ties_go_to_lowest_index() {
        assert_eq!(find_anchor(&[0.0, 1.0, 2.0], 0.5), Some(0));
        assert_eq!(find_anchor(&[1.0, 1.0, 1.0], 1.0), Some(0));
    }

    #[test]
    fn splice_from_anchor_leaves_earlier_rows_unfilled() {
        let mut rows = rows(&[0.0, 1.0, 2.0, 3.0, 4.0]);
        let filled = splice_speeds(
            &mut rows,
            2,
            &samples(&[(100.0, 5.0), (101.0, 6.0), (102.0, 7.0)]),
        );
        assert_eq!(filled, 3);
        let speeds: Vec<Option<f64>> = rows.iter().map(|r| r.speed).collect();
        assert_eq!(speeds, vec![None, None, Some(5.0), Some(6.0), Some(7.0)]);
    }

    #[test]
    fn splice_stops_at_manifest_end() {
        let mut rows = rows(&[0.0, 1.0, 2.0]);
        let filled = splice_speeds(&mut rows, 1, &samples(&[(1.0, 1.0), (2.0, 2.0), (3.0, 3.0)]));
        assert_eq!(filled, 2);
        assert_eq!(rows[2].speed, Some(2.0));
        assert_eq!(splice_speeds(&mut rows, 9, &samples(&[(0.0, 1.0)])), 0);
    }

    #[test]
    fn align_rows_reports_skips() {
        let mut empty: Vec<ManifestRow> = Vec::new();
        assert_eq!(
            align_rows(&mut empty, &samples(&[(0.0, 1.0)])),
            Err(SkipReason::EmptyManifest)
        );
        let mut some = rows(&[0.0]);
        assert_eq!(
            align_rows(&mut some, &[]),
            Err(SkipReason::NoValidSpeedRecords)
        );
        assert_eq!(some[0].speed, None);
    }

    #[test]
    fn speed_log_drops_non_numeric_records() -> Result<()> {
        let dir = tempfile::tempdir()?;
        let path = dir.path().join("speed.csv");
        fs::write(
            &path,
            "time,speed\n10.0,1.5\nabc,2.0\n11.0,\n12.0,NaN\n\n13.0, 3.5\n",
        )?;
        let log = read_speed_log(&path)?;
        assert_eq!(log.samples, samples(&[(10.0, 1.5), (13.0, 3.5)]));
        assert_eq!(log.discarded, 4);
        Ok(())
    }

    #[test]
    fn speed_log_drops_records_that_are_not_utf8() -> Result<()> {
        let dir = tempfile::tempdir()?;
        let path = dir.path().join("speed.csv");
        fs::write(&path, b"0.0,1.5\n\xff\xfe,2.0\n0.5,\xc3\n")?;
        let log = read_speed_log(&path)?;
        assert_eq!(log.samples, samples(&[(0.0, 1.5)]));
        assert_eq!(log.discarded, 2);
        Ok(())
    }
}
