//! On-disk layout of a single array inside a remote object.
//!
//! A layout says where the array's bytes live (one contiguous row-major
//! block, or a regular grid of uncompressed chunks), how to decode its
//! elements, and how pixel indices map onto world coordinates.

use std::collections::HashSet;

use serde::{Deserialize, Serialize};

use crate::error::LayoutError;

/// Element type of an array.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum DataType {
    U8,
    I16,
    I32,
    I64,
    U16,
    U32,
    U64,
    F32,
    F64,
}

impl DataType {
    /// Size of one element in bytes.
    pub fn size(&self) -> u64 {
        match self {
            DataType::U8 => 1,
            DataType::I16 | DataType::U16 => 2,
            DataType::I32 | DataType::U32 | DataType::F32 => 4,
            DataType::I64 | DataType::U64 | DataType::F64 => 8,
        }
    }

    /// Element type for a FITS `BITPIX` value.
    pub fn from_bitpix(bitpix: i64) -> Option<Self> {
        match bitpix {
            8 => Some(DataType::U8),
            16 => Some(DataType::I16),
            32 => Some(DataType::I32),
            64 => Some(DataType::I64),
            -32 => Some(DataType::F32),
            -64 => Some(DataType::F64),
            _ => None,
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum ByteOrder {
    #[default]
    Big,
    Little,
}

/// Linear pixel to world mapping for one axis: `world = start + step * pixel`.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct CoordinateAxis {
    pub name: String,
    pub start: f64,
    pub step: f64,
}

impl CoordinateAxis {
    pub fn world(&self, pixel: f64) -> f64 {
        self.start + self.step * pixel
    }

    pub fn pixel(&self, world: f64) -> f64 {
        (world - self.start) / self.step
    }
}

/// Physical value scaling, `physical = zero + scale * stored`.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct Scaling {
    pub scale: f64,
    pub zero: f64,
}

/// Byte location of one chunk in a chunked layout.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ChunkLocation {
    /// Position of the chunk in the chunk grid, slowest axis first.
    pub index: Vec<u64>,
    pub offset: u64,
    pub length: u64,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "kind", rename_all = "snake_case")]
pub enum Storage {
    /// The whole array is stored row-major starting at `offset`.
    Contiguous { offset: u64 },
    /// The array is split on a regular grid. Every chunk is stored row-major
    /// at full `chunk_shape`, edge chunks included.
    Chunked {
        chunk_shape: Vec<u64>,
        chunks: Vec<ChunkLocation>,
    },
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ArrayLayout {
    pub data_type: DataType,
    #[serde(default)]
    pub byte_order: ByteOrder,
    /// Extent of every axis, slowest varying first.
    pub shape: Vec<u64>,
    pub storage: Storage,
    /// Either empty or one entry per axis.
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub axes: Vec<Option<CoordinateAxis>>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub scaling: Option<Scaling>,
}

impl ArrayLayout {
    pub fn contiguous(data_type: DataType, shape: Vec<u64>, offset: u64) -> Self {
        Self {
            data_type,
            byte_order: ByteOrder::Big,
            shape,
            storage: Storage::Contiguous { offset },
            axes: Vec::new(),
            scaling: None,
        }
    }

    pub fn chunked(
        data_type: DataType,
        shape: Vec<u64>,
        chunk_shape: Vec<u64>,
        chunks: Vec<ChunkLocation>,
    ) -> Self {
        Self {
            data_type,
            byte_order: ByteOrder::Big,
            shape,
            storage: Storage::Chunked {
                chunk_shape,
                chunks,
            },
            axes: Vec::new(),
            scaling: None,
        }
    }

    pub fn with_byte_order(mut self, byte_order: ByteOrder) -> Self {
        self.byte_order = byte_order;
        self
    }

    pub fn with_axes(mut self, axes: Vec<Option<CoordinateAxis>>) -> Self {
        self.axes = axes;
        self
    }

    pub fn with_scaling(mut self, scaling: Scaling) -> Self {
        self.scaling = Some(scaling);
        self
    }

    pub fn ndim(&self) -> usize {
        self.shape.len()
    }

    pub fn num_elements(&self) -> u64 {
        self.shape.iter().product()
    }

    /// Coordinate mapping of `axis`, if the layout declares one.
    pub fn axis(&self, axis: usize) -> Option<&CoordinateAxis> {
        self.axes.get(axis).and_then(Option::as_ref)
    }

    /// Number of chunks along every axis, `None` for contiguous storage.
    pub fn chunk_grid(&self) -> Option<Vec<u64>> {
        match &self.storage {
            Storage::Contiguous { .. } => None,
            Storage::Chunked { chunk_shape, .. } => Some(
                self.shape
                    .iter()
                    .zip(chunk_shape)
                    .map(|(extent, chunk)| extent.div_ceil(*chunk))
                    .collect(),
            ),
        }
    }

    /// Check the layout is self consistent and fits inside an object of
    /// `object_size` bytes.
    pub fn validate(&self, name: &str, object_size: u64) -> Result<(), LayoutError> {
        let err = |reason: String| LayoutError::Invalid {
            array: name.to_string(),
            reason,
        };

        if self.shape.is_empty() {
            return Err(err("array has no axes".to_string()));
        }
        if self.shape.contains(&0) {
            return Err(err(format!("array shape {:?} has an empty axis", self.shape)));
        }
        if !self.axes.is_empty() && self.axes.len() != self.shape.len() {
            return Err(err(format!(
                "{} coordinate axes declared for {} dimensions",
                self.axes.len(),
                self.shape.len()
            )));
        }
        for axis in self.axes.iter().flatten() {
            if !axis.start.is_finite() || !axis.step.is_finite() || axis.step == 0.0 {
                return Err(err(format!(
                    "coordinate axis {} has an unusable mapping (start {}, step {})",
                    axis.name, axis.start, axis.step
                )));
            }
        }

        let element_size = self.data_type.size();
        match &self.storage {
            Storage::Contiguous { offset } => {
                let len = checked_byte_len(&self.shape, element_size)
                    .ok_or_else(|| err("array byte length overflows".to_string()))?;
                check_within(name, *offset, len, object_size)
            }
            Storage::Chunked {
                chunk_shape,
                chunks,
            } => {
                if chunk_shape.len() != self.shape.len() {
                    return Err(err(format!(
                        "chunk shape {:?} does not match array shape {:?}",
                        chunk_shape, self.shape
                    )));
                }
                if chunk_shape.contains(&0) {
                    return Err(err(format!("chunk shape {chunk_shape:?} has an empty axis")));
                }
                let chunk_len = checked_byte_len(chunk_shape, element_size)
                    .ok_or_else(|| err("chunk byte length overflows".to_string()))?;
                let grid = self.chunk_grid().unwrap_or_default();

                let mut seen = HashSet::with_capacity(chunks.len());
                for chunk in chunks {
                    if chunk.index.len() != grid.len()
                        || chunk.index.iter().zip(&grid).any(|(i, n)| i >= n)
                    {
                        return Err(err(format!(
                            "chunk index {:?} outside chunk grid {:?}",
                            chunk.index, grid
                        )));
                    }
                    if !seen.insert(chunk.index.as_slice()) {
                        return Err(err(format!("chunk {:?} declared twice", chunk.index)));
                    }
                    if chunk.length != chunk_len {
                        return Err(err(format!(
                            "chunk {:?} is {} bytes, expected {}",
                            chunk.index, chunk.length, chunk_len
                        )));
                    }
                    check_within(name, chunk.offset, chunk.length, object_size)?;
                }

                let mut spans: Vec<(u64, u64)> =
                    chunks.iter().map(|c| (c.offset, c.offset + c.length)).collect();
                spans.sort_unstable();
                if let Some(pair) = spans.windows(2).find(|pair| pair[1].0 < pair[0].1) {
                    return Err(err(format!(
                        "chunk byte ranges {}..{} and {}..{} overlap",
                        pair[0].0, pair[0].1, pair[1].0, pair[1].1
                    )));
                }
                Ok(())
            }
        }
    }
}

fn checked_byte_len(shape: &[u64], element_size: u64) -> Option<u64> {
    shape
        .iter()
        .try_fold(element_size, |acc, extent| acc.checked_mul(*extent))
}

fn check_within(name: &str, offset: u64, length: u64, object_size: u64) -> Result<(), LayoutError> {
    match offset.checked_add(length) {
        Some(end) if end <= object_size => Ok(()),
        _ => Err(LayoutError::ExceedsObject {
            array: name.to_string(),
            offset,
            length,
            object_size,
        }),
    }
}
