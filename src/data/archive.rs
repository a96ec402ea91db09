//! Binary training archive: every shape stored at each cascade resolution.
//!
//! The archive is the training-time counterpart of the plain-text inference
//! input: a bincode container holding, per shape, one cloud per resolution
//! level (`base`, `base·r1`, `base·r1·r2`, ...), so each cascade stage can
//! be supervised at its own output density.

use std::fs::File;
use std::io::{BufReader, BufWriter};
use std::path::Path;

use bincode::{Decode, Encode};

use crate::config::CascadeConfig;
use crate::error::{Error, Result};

#[derive(Encode, Decode, Debug, Clone, PartialEq)]
pub struct ShapeRecord {
    pub name: String,
    /// One flattened `x y z` buffer per resolution level, coarsest first.
    pub levels: Vec<Vec<f32>>,
}

#[derive(Encode, Decode, Debug, Clone, PartialEq)]
pub struct TrainingArchive {
    /// Points per shape at each level, coarsest first.
    pub level_counts: Vec<u32>,
    pub shapes: Vec<ShapeRecord>,
}

impl TrainingArchive {
    pub fn save(&self, path: &Path) -> Result<()> {
        let mut writer = BufWriter::new(File::create(path)?);
        bincode::encode_into_std_write(self, &mut writer, bincode::config::standard()).map_err(
            |e| Error::Archive {
                path: path.into(),
                message: e.to_string(),
            },
        )?;
        Ok(())
    }

    /// Decode and check internal consistency; a truncated or corrupt file is
    /// rejected here rather than surfacing mid-epoch.
    pub fn load(path: &Path) -> Result<Self> {
        let file = File::open(path).map_err(|e| Error::Archive {
            path: path.into(),
            message: e.to_string(),
        })?;
        let mut reader = BufReader::new(file);
        let archive: Self =
            bincode::decode_from_std_read(&mut reader, bincode::config::standard()).map_err(
                |e| Error::Archive {
                    path: path.into(),
                    message: e.to_string(),
                },
            )?;
        archive.check_consistent(path)?;
        Ok(archive)
    }

    fn check_consistent(&self, path: &Path) -> Result<()> {
        if self.level_counts.is_empty() || self.shapes.is_empty() {
            return Err(Error::Archive {
                path: path.into(),
                message: "archive holds no levels or no shapes".into(),
            });
        }
        for shape in &self.shapes {
            if shape.levels.len() != self.level_counts.len() {
                return Err(Error::Archive {
                    path: path.into(),
                    message: format!(
                        "shape {:?} has {} levels, archive declares {}",
                        shape.name,
                        shape.levels.len(),
                        self.level_counts.len()
                    ),
                });
            }
            for (level, (&count, buffer)) in
                self.level_counts.iter().zip(&shape.levels).enumerate()
            {
                if buffer.len() != count as usize * 3 {
                    return Err(Error::Archive {
                        path: path.into(),
                        message: format!(
                            "shape {:?} level {level} holds {} floats, expected {}",
                            shape.name,
                            buffer.len(),
                            count as usize * 3
                        ),
                    });
                }
            }
        }
        Ok(())
    }

    /// Check the archive's resolution ladder against the configured cascade:
    /// one level per stage output plus the base, consecutive levels related
    /// by the stage ratios, and a base dense enough to cut patches from.
    pub fn validate_against(&self, cascade: &CascadeConfig, path: &Path) -> Result<()> {
        if self.level_counts.len() != cascade.num_stages() + 1 {
            return Err(Error::Archive {
                path: path.into(),
                message: format!(
                    "archive has {} resolution levels, cascade needs {}",
                    self.level_counts.len(),
                    cascade.num_stages() + 1
                ),
            });
        }
        for (i, &ratio) in cascade.stage_ratios.iter().enumerate() {
            let expected = self.level_counts[i] as usize * ratio;
            if self.level_counts[i + 1] as usize != expected {
                return Err(Error::Archive {
                    path: path.into(),
                    message: format!(
                        "level {} holds {} points, expected {} (ratio {ratio})",
                        i + 1,
                        self.level_counts[i + 1],
                        expected
                    ),
                });
            }
        }
        if (self.level_counts[0] as usize) < cascade.num_point {
            return Err(Error::Archive {
                path: path.into(),
                message: format!(
                    "base level has {} points, patches need {}",
                    self.level_counts[0], cascade.num_point
                ),
            });
        }
        Ok(())
    }

    /// A shape's clouds as coordinate triples, one vec per level.
    pub fn shape_levels(&self, index: usize) -> Vec<Vec<[f32; 3]>> {
        self.shapes[index]
            .levels
            .iter()
            .map(|buffer| {
                buffer
                    .chunks_exact(3)
                    .map(|c| [c[0], c[1], c[2]])
                    .collect()
            })
            .collect()
    }
}
