use std::{ops::Range, sync::Arc};

use arrow::array::{
    ArrayRef, Float32Array, Float64Array, Int16Array, Int32Array, Int64Array, UInt8Array,
    UInt16Array, UInt32Array, UInt64Array,
};
use serde::Serialize;

use fornax_fetcher::FetchStats;
use fornax_index::{ByteOrder, DataType, Scaling};
use fornax_object_storage::RemoteObjectRef;

/// Where a subset came from and what it cost to get it.
#[derive(Debug, Clone, Default, Serialize)]
pub struct Provenance {
    /// Set once the subset has been fetched from a remote object.
    #[serde(skip)]
    pub object: Option<RemoteObjectRef>,
    pub pixel_box: Vec<Range<u64>>,
    /// Byte ranges read, in offset order.
    pub ranges: Vec<Range<u64>>,
    pub fetch: Option<FetchStats>,
}

/// A materialized cutout: the selected elements in row-major order, in the
/// byte order they were stored in.
#[derive(Debug, Clone)]
pub struct Subset {
    pub array: String,
    pub shape: Vec<u64>,
    pub data_type: DataType,
    pub byte_order: ByteOrder,
    pub scaling: Option<Scaling>,
    pub raw: Vec<u8>,
    pub provenance: Provenance,
}

macro_rules! decode {
    ($raw:expr, $order:expr, $ty:ty) => {{
        const WIDTH: usize = std::mem::size_of::<$ty>();
        $raw.chunks_exact(WIDTH)
            .map(|chunk| {
                let mut bytes = [0u8; WIDTH];
                bytes.copy_from_slice(chunk);
                match $order {
                    ByteOrder::Big => <$ty>::from_be_bytes(bytes),
                    ByteOrder::Little => <$ty>::from_le_bytes(bytes),
                }
            })
            .collect::<Vec<$ty>>()
    }};
}

impl Subset {
    pub fn len(&self) -> usize {
        self.shape.iter().product::<u64>() as usize
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    /// Stored values as an Arrow array of the matching primitive type,
    /// without scaling.
    pub fn values(&self) -> ArrayRef {
        let raw = self.raw.as_slice();
        let order = self.byte_order;
        match self.data_type {
            DataType::U8 => Arc::new(UInt8Array::from(raw.to_vec())),
            DataType::I16 => Arc::new(Int16Array::from(decode!(raw, order, i16))),
            DataType::I32 => Arc::new(Int32Array::from(decode!(raw, order, i32))),
            DataType::I64 => Arc::new(Int64Array::from(decode!(raw, order, i64))),
            DataType::U16 => Arc::new(UInt16Array::from(decode!(raw, order, u16))),
            DataType::U32 => Arc::new(UInt32Array::from(decode!(raw, order, u32))),
            DataType::U64 => Arc::new(UInt64Array::from(decode!(raw, order, u64))),
            DataType::F32 => Arc::new(Float32Array::from(decode!(raw, order, f32))),
            DataType::F64 => Arc::new(Float64Array::from(decode!(raw, order, f64))),
        }
    }

    /// Physical values, `zero + scale * stored`, as `f64`.
    pub fn scaled_values(&self) -> Float64Array {
        let Scaling { scale, zero } = self.scaling.unwrap_or(Scaling {
            scale: 1.0,
            zero: 0.0,
        });
        Float64Array::from_iter_values(self.stored_f64().into_iter().map(|v| zero + scale * v))
    }

    /// Physical value at `index` (one coordinate per output axis).
    pub fn value_at(&self, index: &[u64]) -> Option<f64> {
        if index.len() != self.shape.len() || index.iter().zip(&self.shape).any(|(i, n)| i >= n) {
            return None;
        }
        let flat = index
            .iter()
            .zip(fornax_planner::plan::strides(&self.shape))
            .map(|(i, stride)| i * stride)
            .sum::<u64>() as usize;
        let width = self.data_type.size() as usize;
        let element = self.raw.get(flat * width..(flat + 1) * width)?;
        let stored = decode_f64(self.data_type, self.byte_order, element).pop()?;
        Some(match self.scaling {
            Some(Scaling { scale, zero }) => zero + scale * stored,
            None => stored,
        })
    }

    fn stored_f64(&self) -> Vec<f64> {
        decode_f64(self.data_type, self.byte_order, &self.raw)
    }
}

fn decode_f64(data_type: DataType, order: ByteOrder, raw: &[u8]) -> Vec<f64> {
    match data_type {
        DataType::U8 => raw.iter().map(|v| *v as f64).collect(),
        DataType::I16 => decode!(raw, order, i16).into_iter().map(f64::from).collect(),
        DataType::I32 => decode!(raw, order, i32).into_iter().map(f64::from).collect(),
        DataType::I64 => decode!(raw, order, i64).into_iter().map(|v| v as f64).collect(),
        DataType::U16 => decode!(raw, order, u16).into_iter().map(f64::from).collect(),
        DataType::U32 => decode!(raw, order, u32).into_iter().map(f64::from).collect(),
        DataType::U64 => decode!(raw, order, u64).into_iter().map(|v| v as f64).collect(),
        DataType::F32 => decode!(raw, order, f32).into_iter().map(f64::from).collect(),
        DataType::F64 => decode!(raw, order, f64),
    }
}
