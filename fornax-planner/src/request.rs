use std::{fmt::Display, ops::Range};

use serde::{Deserialize, Serialize};

use fornax_index::{ArrayLayout, CoordinateAxis};

use crate::error::PlanError;

/// Tolerance, in pixels, for world coordinates that land on a pixel center
/// or extent edge up to floating point error.
const PIXEL_EPSILON: f64 = 1e-9;

/// What to keep along one axis.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum AxisSelection {
    /// The whole axis.
    All,
    /// Half-open range of pixel indices.
    Pixels(Range<u64>),
    /// Closed world-coordinate interval. Keeps every pixel whose center lies
    /// inside it.
    World { low: f64, high: f64 },
    /// `size` pixels centred on a position, clipped at the array edge. The
    /// position must lie inside the array.
    Centered { at: Position, size: u64 },
}

/// A position along one axis.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Position {
    /// Fractional pixel coordinate; pixel `i` has its center at `i`.
    Pixel(f64),
    /// World coordinate, mapped through the axis' coordinate mapping.
    World(f64),
}

impl Display for Position {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Position::Pixel(p) => write!(f, "pixel {p}"),
            Position::World(w) => write!(f, "world {w}"),
        }
    }
}

impl Display for AxisSelection {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            AxisSelection::All => write!(f, "all"),
            AxisSelection::Pixels(range) => write!(f, "pixels {}..{}", range.start, range.end),
            AxisSelection::World { low, high } => write!(f, "world [{low}, {high}]"),
            AxisSelection::Centered { at, size } => write!(f, "{size} pixels around {at}"),
        }
    }
}

/// A rectangular region of one named array, one selection per axis
/// (slowest varying axis first).
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct SubsetRequest {
    pub array: String,
    pub selections: Vec<AxisSelection>,
}

impl SubsetRequest {
    pub fn new(array: impl Into<String>) -> Self {
        Self {
            array: array.into(),
            selections: Vec::new(),
        }
    }

    pub fn all(mut self) -> Self {
        self.selections.push(AxisSelection::All);
        self
    }

    pub fn pixels(mut self, range: Range<u64>) -> Self {
        self.selections.push(AxisSelection::Pixels(range));
        self
    }

    pub fn world(mut self, low: f64, high: f64) -> Self {
        self.selections.push(AxisSelection::World { low, high });
        self
    }

    pub fn centered(mut self, at: Position, size: u64) -> Self {
        self.selections.push(AxisSelection::Centered { at, size });
        self
    }

    /// Resolve every selection against `layout` into a box of pixel ranges.
    pub fn pixel_box(&self, layout: &ArrayLayout) -> Result<Vec<Range<u64>>, PlanError> {
        if self.selections.len() != layout.ndim() {
            return Err(PlanError::DimensionMismatch {
                array: self.array.clone(),
                expected: layout.ndim(),
                actual: self.selections.len(),
            });
        }

        self.selections
            .iter()
            .zip(&layout.shape)
            .enumerate()
            .map(|(axis, (selection, extent))| {
                self.resolve_axis(axis, selection, *extent, layout.axis(axis))
            })
            .collect()
    }

    fn resolve_axis(
        &self,
        axis: usize,
        selection: &AxisSelection,
        extent: u64,
        mapping: Option<&CoordinateAxis>,
    ) -> Result<Range<u64>, PlanError> {
        let out_of_bounds = |extent: String| PlanError::RequestOutOfBounds {
            array: self.array.clone(),
            axis,
            requested: selection.to_string(),
            extent,
        };
        let empty = || PlanError::EmptySelection {
            array: self.array.clone(),
            axis,
        };
        let no_mapping = || PlanError::NoCoordinateMapping {
            array: self.array.clone(),
            axis,
        };

        match selection {
            AxisSelection::All => Ok(0..extent),
            AxisSelection::Pixels(range) => {
                if range.end > extent {
                    Err(out_of_bounds(format!("pixels 0..{extent}")))
                } else if range.start >= range.end {
                    Err(empty())
                } else {
                    Ok(range.clone())
                }
            }
            AxisSelection::World { low, high } => {
                let mapping = mapping.ok_or_else(no_mapping)?;
                if !low.is_finite() || !high.is_finite() {
                    return Err(out_of_bounds(world_extent(mapping, extent)));
                }
                if low > high {
                    return Err(empty());
                }

                let (a, b) = (mapping.pixel(*low), mapping.pixel(*high));
                let (first, last) = (a.min(b), a.max(b));
                if first < -0.5 - PIXEL_EPSILON || last > extent as f64 - 0.5 + PIXEL_EPSILON {
                    return Err(out_of_bounds(world_extent(mapping, extent)));
                }

                let start = (first - PIXEL_EPSILON).ceil().max(0.0) as u64;
                let end = ((last + PIXEL_EPSILON).floor() as i64 + 1).clamp(0, extent as i64) as u64;
                if start >= end {
                    return Err(empty());
                }
                Ok(start..end)
            }
            AxisSelection::Centered { at, size } => {
                let (center, describe_extent) = match at {
                    Position::Pixel(p) => (*p, format!("pixels 0..{extent}")),
                    Position::World(w) => {
                        let mapping = mapping.ok_or_else(no_mapping)?;
                        (mapping.pixel(*w), world_extent(mapping, extent))
                    }
                };
                if !center.is_finite()
                    || center < -0.5 - PIXEL_EPSILON
                    || center > extent as f64 - 0.5 + PIXEL_EPSILON
                {
                    return Err(out_of_bounds(describe_extent));
                }
                if *size == 0 {
                    return Err(empty());
                }

                // First pixel of the box whose middle is nearest to `center`.
                let first = (center - (*size as f64 - 1.0) / 2.0).round();
                let start = first.clamp(0.0, extent as f64) as u64;
                let end = (first + *size as f64).clamp(0.0, extent as f64) as u64;
                if start >= end {
                    return Err(empty());
                }
                Ok(start..end)
            }
        }
    }
}

/// Edges of the array in world coordinates, for error messages.
fn world_extent(mapping: &CoordinateAxis, extent: u64) -> String {
    let a = mapping.world(-0.5);
    let b = mapping.world(extent as f64 - 0.5);
    format!("{} [{}, {}]", mapping.name, a.min(b), a.max(b))
}
