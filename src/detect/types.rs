use anyhow::{anyhow, Result};
use serde::{Deserialize, Serialize};

/// Detected feature location in pixel coordinates.
#[derive(Clone, Copy, Debug, PartialEq)]
pub struct Keypoint {
    pub x: f32,
    pub y: f32,
    /// Detector-specific strength; larger is stronger.
    pub response: f32,
}

impl Keypoint {
    pub fn new(x: f32, y: f32, response: f32) -> Self {
        Self { x, y, response }
    }
}

/// Descriptor matrix: one row of `dim` values per keypoint.
#[derive(Clone, Debug, Default, PartialEq)]
pub struct Descriptors {
    dim: usize,
    data: Vec<f32>,
}

impl Descriptors {
    pub fn new(dim: usize) -> Self {
        Self {
            dim,
            data: Vec::new(),
        }
    }

    pub fn from_rows(dim: usize, rows: &[Vec<f32>]) -> Result<Self> {
        let mut descriptors = Self::new(dim);
        for row in rows {
            descriptors.push_row(row)?;
        }
        Ok(descriptors)
    }

    pub fn push_row(&mut self, row: &[f32]) -> Result<()> {
        if row.len() != self.dim {
            return Err(anyhow!(
                "descriptor row has {} values, expected {}",
                row.len(),
                self.dim
            ));
        }
        self.data.extend_from_slice(row);
        Ok(())
    }

    pub fn dim(&self) -> usize {
        self.dim
    }

    pub fn rows(&self) -> usize {
        if self.dim == 0 {
            0
        } else {
            self.data.len() / self.dim
        }
    }

    pub fn is_empty(&self) -> bool {
        self.rows() == 0
    }

    pub fn row(&self, i: usize) -> &[f32] {
        &self.data[i * self.dim..(i + 1) * self.dim]
    }

    pub fn iter_rows(&self) -> impl Iterator<Item = &[f32]> + '_ {
        (0..self.rows()).map(move |i| self.row(i))
    }
}

/// Correspondence between row `query` of the first descriptor set and row `train` of the second.
#[derive(Clone, Copy, Debug, PartialEq)]
pub struct Correspondence {
    pub query: usize,
    pub train: usize,
    pub distance: f32,
}

impl Correspondence {
    pub fn new(query: usize, train: usize, distance: f32) -> Self {
        Self {
            query,
            train,
            distance,
        }
    }
}

/// Correspondences for one adjacent pair. Never persisted.
#[derive(Clone, Debug, Default)]
pub struct MatchSet {
    pub matches: Vec<Correspondence>,
    pub valid: bool,
}

impl MatchSet {
    /// Match set from matcher output; valid only when non-empty.
    pub fn new(matches: Vec<Correspondence>) -> Self {
        let valid = !matches.is_empty();
        Self { matches, valid }
    }

    pub fn invalid() -> Self {
        Self::default()
    }
}

/// 2-D displacement in pixels.
#[derive(Clone, Copy, Debug, Default, PartialEq, Serialize, Deserialize)]
pub struct Displacement {
    pub x: f32,
    pub y: f32,
}

impl Displacement {
    pub const ZERO: Displacement = Displacement { x: 0.0, y: 0.0 };

    pub fn new(x: f32, y: f32) -> Self {
        Self { x, y }
    }
}
