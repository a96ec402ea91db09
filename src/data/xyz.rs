//! Plain-text point cloud files: one `x y z` triple per line.

use std::fs::File;
use std::io::{BufRead, BufReader, BufWriter, Write};
use std::path::Path;

use crate::error::{Error, Result};

/// Read a whole cloud. Blank lines are skipped, extra columns (normals,
/// colors) are ignored; anything else is a parse error with its line number.
pub fn read_xyz(path: &Path) -> Result<Vec<[f32; 3]>> {
    let reader = BufReader::new(File::open(path)?);
    let mut points = Vec::new();
    for (index, line) in reader.lines().enumerate() {
        let line = line?;
        let trimmed = line.trim();
        if trimmed.is_empty() {
            continue;
        }
        let mut fields = trimmed.split_whitespace();
        let mut coord = [0.0f32; 3];
        for value in coord.iter_mut() {
            let field = fields.next().ok_or_else(|| Error::XyzParse {
                path: path.into(),
                line: index + 1,
                message: "expected three coordinates".into(),
            })?;
            *value = field.parse().map_err(|e| Error::XyzParse {
                path: path.into(),
                line: index + 1,
                message: format!("{e} in {field:?}"),
            })?;
        }
        points.push(coord);
    }
    if points.is_empty() {
        return Err(Error::EmptyPointSet(path.display().to_string()));
    }
    Ok(points)
}

pub fn write_xyz(path: &Path, points: &[[f32; 3]]) -> Result<()> {
    let mut w = BufWriter::new(File::create(path)?);
    for &[x, y, z] in points {
        writeln!(w, "{x} {y} {z}")?;
    }
    w.flush()?;
    Ok(())
}
