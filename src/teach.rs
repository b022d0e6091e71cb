//! Taught poses and their CSV storage.

use crate::error::{UrError, UrResult};
use crate::types::Pose;
use serde::Deserialize;
use std::io::{Read, Write};
use std::path::Path;

const CSV_HEADER: [&str; 7] = ["name", "x", "y", "z", "rx", "ry", "rz"];

#[derive(Debug, Clone, PartialEq)]
pub struct TeachPoint {
    pub name: String,
    pub pose: Pose,
}

impl TeachPoint {
    /// `P1: X=300.0mm Y=-100.0mm Z=200.0mm | Rx=0.0° Ry=179.9° Rz=0.0°`
    pub fn display_line(&self) -> String {
        let [x, y, z, rx, ry, rz] = self.pose.to_display();
        format!(
            "{}: X={:.1}mm Y={:.1}mm Z={:.1}mm | Rx={:.1}° Ry={:.1}° Rz={:.1}°",
            self.name, x, y, z, rx, ry, rz
        )
    }
}

#[derive(Debug, Deserialize)]
struct TeachRow {
    name: String,
    x: f64,
    y: f64,
    z: f64,
    rx: f64,
    ry: f64,
    rz: f64,
}

#[derive(Debug, Clone, Default, PartialEq)]
pub struct TeachPoints {
    points: Vec<TeachPoint>,
}

impl TeachPoints {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn len(&self) -> usize {
        self.points.len()
    }

    pub fn is_empty(&self) -> bool {
        self.points.is_empty()
    }

    pub fn iter(&self) -> impl Iterator<Item = &TeachPoint> {
        self.points.iter()
    }

    /// Appends `pose`. A blank name becomes `P<n>` with n the new list length.
    pub fn teach(&mut self, name: &str, pose: Pose) -> &TeachPoint {
        let name = match name.trim() {
            "" => format!("P{}", self.points.len() + 1),
            name => name.to_string(),
        };
        self.points.push(TeachPoint { name, pose });
        &self.points[self.points.len() - 1]
    }

    pub fn get(&self, index: usize) -> Option<&TeachPoint> {
        self.points.get(index)
    }

    pub fn remove(&mut self, index: usize) -> UrResult<TeachPoint> {
        if index >= self.points.len() {
            return Err(UrError::InvalidArgument(format!(
                "No teach point {} in a list of {}",
                index,
                self.points.len()
            )));
        }
        Ok(self.points.remove(index))
    }

    pub fn display_lines(&self) -> Vec<String> {
        self.points.iter().map(TeachPoint::display_line).collect()
    }

    pub fn write_csv<W: Write>(&self, writer: W) -> UrResult<()> {
        let mut writer = csv::Writer::from_writer(writer);
        writer.write_record(CSV_HEADER)?;
        for point in &self.points {
            let mut record = vec![point.name.clone()];
            record.extend(point.pose.to_array().iter().map(|v| format!("{:.9}", v)));
            writer.write_record(&record)?;
        }
        writer.flush()?;
        Ok(())
    }

    /// Reads a list written by `write_csv`. Columns are matched by header name.
    pub fn read_csv<R: Read>(reader: R) -> UrResult<Self> {
        let mut reader = csv::Reader::from_reader(reader);
        let points = reader
            .deserialize::<TeachRow>()
            .map(|row| {
                let row = row?;
                Ok(TeachPoint {
                    name: row.name,
                    pose: Pose::new(row.x, row.y, row.z, row.rx, row.ry, row.rz),
                })
            })
            .collect::<UrResult<Vec<_>>>()?;
        Ok(Self { points })
    }

    pub fn save(&self, path: impl AsRef<Path>) -> UrResult<()> {
        self.write_csv(std::fs::File::create(path)?)
    }

    /// Replaces the current list with the file's content. On error the list is unchanged.
    pub fn load(&mut self, path: impl AsRef<Path>) -> UrResult<()> {
        *self = Self::read_csv(std::fs::File::open(path)?)?;
        Ok(())
    }
}
