//! Writing a whole attack outcome to an output directory

use crate::record::{write_record, AttackRecord};
use crate::vertex_list::write_vertex_list;
use geoattack_algorithms::transfer_normals;
use geoattack_attack::{AttackOutcome, Confirmation};
use geoattack_core::{Error, Point3f, Result, Vector3f};
use log::info;
use std::fs::{self, OpenOptions};
use std::io::Write;
use std::path::{Path, PathBuf};

/// Run summary appended to by every export
pub const SUMMARY_FILE: &str = "attack_result.txt";

/// Dense clouds with normals, one per attacked sample
///
/// When given, each saved adversarial point takes the normal of its nearest
/// point in the matching dense cloud.
#[derive(Debug, Clone, Copy)]
pub struct DenseReference<'a> {
    pub points: &'a [Vec<Point3f>],
    pub normals: &'a [Vec<Vector3f>],
}

#[derive(Debug, Clone, PartialEq)]
pub struct ExportOptions {
    /// Also write a `.obj` vertex list next to every record
    pub vertex_list: bool,
    /// Dataset index of the first sample in the batch
    pub first_index: usize,
}

impl Default for ExportOptions {
    fn default() -> Self {
        Self {
            vertex_list: true,
            first_index: 0,
        }
    }
}

/// Save every confirmed adversarial sample and return the record paths
///
/// Each record carries the label the classifier predicts for the saved cloud.
pub fn export_outcome<P: AsRef<Path>>(
    dir: P,
    outcome: &AttackOutcome,
    ground_truth: &[usize],
    confirmation: &Confirmation,
    options: &ExportOptions,
    reference: Option<&DenseReference<'_>>,
) -> Result<Vec<PathBuf>> {
    let count = outcome.success.len();
    let lengths = [
        ground_truth.len(),
        confirmation.predicted.len(),
        confirmation.confirmed.len(),
    ];
    for len in lengths {
        if len != count {
            return Err(Error::ShapeMismatch {
                expected: vec![count],
                found: vec![len],
            });
        }
    }
    if let Some(reference) = reference {
        if reference.points.len() != count || reference.normals.len() != count {
            return Err(Error::ShapeMismatch {
                expected: vec![count],
                found: vec![reference.points.len(), reference.normals.len()],
            });
        }
    }

    let dir = dir.as_ref();
    fs::create_dir_all(dir)?;

    let mut written = Vec::new();
    for k in (0..count).filter(|&k| confirmation.confirmed[k]) {
        let points = outcome.adversarial.points(k);
        let mut record = AttackRecord::new(
            options.first_index + k,
            ground_truth[k],
            confirmation.predicted[k],
            outcome.found_at[k],
            &points,
        );
        if let Some(reference) = reference {
            let normals = transfer_normals(&points, &reference.points[k], &reference.normals[k])?;
            record = record.with_normals(&normals);
        }

        let path = write_record(dir, &record)?;
        if options.vertex_list {
            write_vertex_list(dir.join(format!("{}.obj", record.name())), &points)?;
        }
        written.push(path);
    }

    info!("saved {} of {} adversarial samples to {}", written.len(), count, dir.display());
    Ok(written)
}

/// Append `attack success: <percent>` to the run summary in `dir`
pub fn append_summary<P: AsRef<Path>>(dir: P, success_rate: f32) -> Result<()> {
    let mut file = OpenOptions::new()
        .create(true)
        .append(true)
        .open(dir.as_ref().join(SUMMARY_FILE))?;
    writeln!(file, "attack success: {:.2}", success_rate * 100.0)?;
    Ok(())
}
