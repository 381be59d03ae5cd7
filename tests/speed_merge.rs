use anyhow::Result;
use std::fs;

use replay_dataset::dataset::{read_manifest, write_manifest, ManifestRow, SessionConfig};
use replay_dataset::{merge_speed_log, AlignOutcome, SkipReason};

fn session_with_rows(root: &std::path::Path, timestamps: &[f64]) -> Result<SessionConfig> {
    let session = SessionConfig::with_id(root, "merge");
    fs::create_dir_all(&session.dir)?;
    let rows: Vec<ManifestRow> = timestamps
        .iter()
        .enumerate()
        .map(|(i, &timestamp)| ManifestRow {
            rgb_path: format!("rgb/merge_{timestamp:.6}.png"),
            mask_path: format!("masks/merge_{timestamp:.6}.png"),
            timestamp,
            throttle: 0.1 * i as f64,
            steer: -0.05,
            brake: 0.0,
            speed: None,
        })
        .collect();
    write_manifest(&session.manifest_path(), &rows)?;
    Ok(session)
}

#[test]
fn merge_fills_from_closest_row_and_keeps_other_columns() -> Result<()> {
    let dir = tempfile::tempdir()?;
    let session = session_with_rows(dir.path(), &[0.0, 1.0, 2.0, 3.0, 4.0])?;
    let before = read_manifest(&session.manifest_path())?;
    let log = dir.path().join("speed.csv");
    fs::write(&log, "time,speed\n2.1,5\n3.1,6\n4.1,7\n5.1,8\n")?;

    let outcome = merge_speed_log(&session, &log)?;
    assert_eq!(
        outcome,
        AlignOutcome::Merged {
            anchor_row: 2,
            anchor_time: 2.1,
            filled: 3,
            unfilled: 2,
        }
    );

    let after = read_manifest(&session.manifest_path())?;
    let speeds: Vec<Option<f64>> = after.iter().map(|r| r.speed).collect();
    assert_eq!(speeds, vec![None, None, Some(5.0), Some(6.0), Some(7.0)]);
    for (old, new) in before.iter().zip(&after) {
        assert_eq!(old.rgb_path, new.rgb_path);
        assert_eq!(old.mask_path, new.mask_path);
        assert_eq!(old.timestamp, new.timestamp);
        assert_eq!(old.throttle, new.throttle);
    }
    assert!(!session.manifest_path().with_extension("csv.tmp").exists());
    Ok(())
}

#[test]
fn rerunning_merge_is_idempotent() -> Result<()> {
    let dir = tempfile::tempdir()?;
    let session = session_with_rows(dir.path(), &[0.0, 0.5, 1.0])?;
    let log = dir.path().join("speed.csv");
    fs::write(&log, "0.4,1.5\n0.9,2.5\n")?;

    merge_speed_log(&session, &log)?;
    let first = fs::read_to_string(session.manifest_path())?;
    merge_speed_log(&session, &log)?;
    let second = fs::read_to_string(session.manifest_path())?;
    assert_eq!(first, second);
    Ok(())
}

#[test]
fn empty_inputs_leave_the_manifest_untouched() -> Result<()> {
    let dir = tempfile::tempdir()?;

    let empty_session = session_with_rows(&dir.path().join("a"), &[])?;
    let log = dir.path().join("speed.csv");
    fs::write(&log, "0.0,1.0\n")?;
    assert_eq!(
        merge_speed_log(&empty_session, &log)?,
        AlignOutcome::Skipped(SkipReason::EmptyManifest)
    );

    let session = session_with_rows(&dir.path().join("b"), &[0.0, 1.0])?;
    let original = fs::read_to_string(session.manifest_path())?;

    let empty_log = dir.path().join("empty.csv");
    fs::write(&empty_log, "")?;
    assert_eq!(
        merge_speed_log(&session, &empty_log)?,
        AlignOutcome::Skipped(SkipReason::EmptySpeedLog)
    );

    let header_only = dir.path().join("header.csv");
    fs::write(&header_only, "time,speed\n")?;
    assert_eq!(
        merge_speed_log(&session, &header_only)?,
        AlignOutcome::Skipped(SkipReason::NoValidSpeedRecords)
    );

    assert_eq!(fs::read_to_string(session.manifest_path())?, original);
    Ok(())
}

#[test]
fn missing_speed_log_is_an_error() -> Result<()> {
    let dir = tempfile::tempdir()?;
    let session = session_with_rows(dir.path(), &[0.0])?;
    let original = fs::read_to_string(session.manifest_path())?;
    assert!(merge_speed_log(&session, &dir.path().join("absent.csv")).is_err());
    assert_eq!(fs::read_to_string(session.manifest_path())?, original);
    Ok(())
}
