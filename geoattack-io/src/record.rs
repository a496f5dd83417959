//! Per-sample JSON records of adversarial clouds

use geoattack_attack::FoundAt;
use geoattack_core::{Error, Point3f, Result, Vector3f};
use serde::{Deserialize, Serialize};
use std::fs::File;
use std::io::{BufReader, BufWriter};
use std::path::{Path, PathBuf};

/// One adversarial sample with the labels it was produced for
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct AttackRecord {
    /// Position of the sample in the attacked dataset
    pub index: usize,
    pub ground_truth: usize,
    pub attack_label: usize,
    pub found_at: Option<FoundAt>,
    pub points: Vec<[f32; 3]>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub normals: Option<Vec<[f32; 3]>>,
}

impl AttackRecord {
    pub fn new(
        index: usize,
        ground_truth: usize,
        attack_label: usize,
        found_at: Option<FoundAt>,
        points: &[Point3f],
    ) -> Self {
        Self {
            index,
            ground_truth,
            attack_label,
            found_at,
            points: points.iter().map(|p| [p.x, p.y, p.z]).collect(),
            normals: None,
        }
    }

    pub fn with_normals(mut self, normals: &[Vector3f]) -> Self {
        self.normals = Some(normals.iter().map(|n| [n.x, n.y, n.z]).collect());
        self
    }

    /// File stem under which this record is stored
    pub fn name(&self) -> String {
        record_name(self.index, self.ground_truth, self.attack_label)
    }

    pub fn positions(&self) -> Vec<Point3f> {
        self.points.iter().map(|&[x, y, z]| Point3f::new(x, y, z)).collect()
    }
}

/// `adv_{index}_gt{ground_truth}_attack{attack_label}`
pub fn record_name(index: usize, ground_truth: usize, attack_label: usize) -> String {
    format!("adv_{}_gt{}_attack{}", index, ground_truth, attack_label)
}

/// Write `record` as `<dir>/<name>.json` and return the path
pub fn write_record<P: AsRef<Path>>(dir: P, record: &AttackRecord) -> Result<PathBuf> {
    let path = dir.as_ref().join(format!("{}.json", record.name()));
    let writer = BufWriter::new(File::create(&path)?);
    serde_json::to_writer_pretty(writer, record).map_err(|e| Error::Serialization(e.to_string()))?;
    Ok(path)
}

pub fn read_record<P: AsRef<Path>>(path: P) -> Result<AttackRecord> {
    let reader = BufReader::new(File::open(path)?);
    serde_json::from_reader(reader).map_err(|e| Error::Serialization(e.to_string()))
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::fs;

    #[test]
    fn test_record_name() {
        assert_eq!(record_name(12, 3, 7), "adv_12_gt3_attack7");
    }

    #[test]
    fn test_record_file_roundtrip() {
        let dir = std::env::temp_dir().join("geoattack_io_record_test");
        fs::create_dir_all(&dir).unwrap();

        let record = AttackRecord::new(
            4,
            1,
            2,
            Some(FoundAt { outer_step: 3, inner_step: 120 }),
            &[Point3f::new(0.5, -0.25, 1.0), Point3f::new(0.0, 0.0, 0.0)],
        )
        .with_normals(&[Vector3f::z(), Vector3f::x()]);

        let path = write_record(&dir, &record).unwrap();
        assert!(path.ends_with("adv_4_gt1_attack2.json"));

        let restored = read_record(&path).unwrap();
        assert_eq!(restored, record);
        assert_eq!(restored.positions()[0], Point3f::new(0.5, -0.25, 1.0));

        fs::remove_dir_all(&dir).unwrap();
    }

    #[test]
    fn test_read_record_rejects_garbage() {
        let dir = std::env::temp_dir().join("geoattack_io_garbage_test");
        fs::create_dir_all(&dir).unwrap();
        let path = dir.join("bad.json");
        fs::write(&path, "{ \"index\": ").unwrap();

        assert!(matches!(read_record(&path), Err(Error::Serialization(_))));
        fs::remove_dir_all(&dir).unwrap();
    }
}
