//! Plain-text vertex lists
//!
//! One `v x y z r g b` line per point, with the color left at zero. Mesh
//! viewers read this as a face-less OBJ file.

use geoattack_core::{Error, Point3f, Result};
use std::fs::File;
use std::io::{BufRead, BufReader, BufWriter, Write};
use std::path::Path;

pub fn write_vertex_list<P: AsRef<Path>>(path: P, points: &[Point3f]) -> Result<()> {
    let mut writer = BufWriter::new(File::create(path)?);
    for p in points {
        writeln!(writer, "v {:.6} {:.6} {:.6} 0 0 0", p.x, p.y, p.z)?;
    }
    writer.flush()?;
    Ok(())
}

/// Read the `v` lines of a vertex list, ignoring every other line
pub fn read_vertex_list<P: AsRef<Path>>(path: P) -> Result<Vec<Point3f>> {
    let reader = BufReader::new(File::open(path)?);
    let mut points = Vec::new();

    for (line_number, line) in reader.lines().enumerate() {
        let line = line?;
        let mut fields = line.split_whitespace();
        if fields.next() != Some("v") {
            continue;
        }

        let coords: Vec<f32> = fields
            .take(3)
            .map(|f| f.parse::<f32>())
            .collect::<std::result::Result<_, _>>()
            .map_err(|e| Error::InvalidData(format!("line {}: {}", line_number + 1, e)))?;
        if coords.len() != 3 {
            return Err(Error::InvalidData(format!(
                "line {}: expected 3 coordinates, found {}",
                line_number + 1,
                coords.len()
            )));
        }
        points.push(Point3f::new(coords[0], coords[1], coords[2]));
    }

    Ok(points)
}
