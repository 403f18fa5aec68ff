use std::{collections::HashMap, ops::Range};

use serde::{Deserialize, Serialize};

use fornax_index::{ArrayLayout, ChunkLocation, DataType, Index, Storage};

use crate::{error::PlanError, request::SubsetRequest};

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct PlannerOptions {
    /// Neighbouring byte ranges separated by at most this many bytes are
    /// merged into one read. The gap bytes are fetched and discarded.
    pub min_gap_bytes: u64,
}

impl Default for PlannerOptions {
    fn default() -> Self {
        Self {
            min_gap_bytes: 32 * 1024,
        }
    }
}

impl PlannerOptions {
    pub fn from_config() -> Self {
        Self {
            min_gap_bytes: fornax_config::CONFIG.range_min_gap_bytes,
        }
    }
}

/// Where the bytes of a segment go in the output.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum SegmentTarget {
    /// A contiguous run of output elements starting at `output_element`.
    Run { output_element: u64 },
    /// A whole chunk; its intersection with the pixel box is copied out.
    Chunk { index: Vec<u64> },
}

/// A span of object bytes that satisfies one part of the request.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Segment {
    /// Absolute byte offset in the object.
    pub offset: u64,
    pub length: u64,
    pub target: SegmentTarget,
}

/// One byte-range read, covering one or more segments.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct PlannedRange {
    pub offset: u64,
    pub length: u64,
    pub segments: Vec<Segment>,
}

impl PlannedRange {
    pub fn end(&self) -> u64 {
        self.offset + self.length
    }

    pub fn range(&self) -> Range<u64> {
        self.offset..self.end()
    }
}

/// The byte ranges to read for one subset request, sorted by offset and
/// pairwise disjoint.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct RangePlan {
    pub array: String,
    pub data_type: DataType,
    /// Selected pixels per axis, slowest varying first.
    pub pixel_box: Vec<Range<u64>>,
    pub output_shape: Vec<u64>,
    pub entries: Vec<PlannedRange>,
}

impl RangePlan {
    /// Bytes that will be read, merge gaps and unused chunk bytes included.
    pub fn total_bytes(&self) -> u64 {
        self.entries.iter().map(|e| e.length).sum()
    }

    /// Bytes covered by segments.
    pub fn segment_bytes(&self) -> u64 {
        self.entries
            .iter()
            .flat_map(|e| &e.segments)
            .map(|s| s.length)
            .sum()
    }

    pub fn output_elements(&self) -> u64 {
        self.output_shape.iter().product()
    }

    pub fn output_bytes(&self) -> u64 {
        self.output_elements() * self.data_type.size()
    }

    /// Bytes read that do not end up in the output.
    pub fn overfetch_bytes(&self) -> u64 {
        self.total_bytes().saturating_sub(self.output_bytes())
    }
}

/// Map `request` onto the byte ranges of `index` that hold it.
///
/// Pure and deterministic: the same index and request always give the same
/// plan.
pub fn plan(
    index: &Index,
    request: &SubsetRequest,
    options: &PlannerOptions,
) -> Result<RangePlan, PlanError> {
    let layout = index
        .array(&request.array)
        .ok_or_else(|| PlanError::UnknownArray {
            array: request.array.clone(),
            available: index.names().map(str::to_string).collect(),
        })?;

    let pixel_box = request.pixel_box(layout)?;
    let output_shape: Vec<u64> = pixel_box.iter().map(|r| r.end - r.start).collect();

    let segments = match &layout.storage {
        Storage::Contiguous { offset } => contiguous_segments(layout, *offset, &pixel_box),
        Storage::Chunked {
            chunk_shape,
            chunks,
        } => chunk_segments(&request.array, chunk_shape, chunks, &pixel_box)?,
    };
    let entries = merge(segments, options.min_gap_bytes);

    let plan = RangePlan {
        array: request.array.clone(),
        data_type: layout.data_type,
        pixel_box,
        output_shape,
        entries,
    };
    tracing::debug!(
        array = %plan.array,
        pixel_box = ?plan.pixel_box,
        ranges = plan.entries.len(),
        total_bytes = plan.total_bytes(),
        overfetch_bytes = plan.overfetch_bytes(),
        "planned subset"
    );
    Ok(plan)
}

/// Row-major strides in elements.
pub fn strides(shape: &[u64]) -> Vec<u64> {
    let mut strides = vec![1u64; shape.len()];
    for axis in (0..shape.len().saturating_sub(1)).rev() {
        strides[axis] = strides[axis + 1] * shape[axis + 1];
    }
    strides
}

/// Visit every index in `ranges` in row-major order.
pub fn for_each_index(ranges: &[Range<u64>], mut visit: impl FnMut(&[u64])) {
    if ranges.iter().any(|r| r.start >= r.end) {
        return;
    }
    let mut current: Vec<u64> = ranges.iter().map(|r| r.start).collect();
    loop {
        visit(&current);
        let mut axis = ranges.len();
        loop {
            if axis == 0 {
                return;
            }
            axis -= 1;
            current[axis] += 1;
            if current[axis] < ranges[axis].end {
                break;
            }
            current[axis] = ranges[axis].start;
        }
    }
}

fn contiguous_segments(layout: &ArrayLayout, base: u64, pixel_box: &[Range<u64>]) -> Vec<Segment> {
    let shape = &layout.shape;
    let element_size = layout.data_type.size();
    let strides = strides(shape);

    // Innermost axes selected in full fold into the run together with the
    // first partially selected axis above them.
    let full_from = pixel_box
        .iter()
        .zip(shape)
        .rposition(|(range, extent)| range.start != 0 || range.end != *extent)
        .map_or(0, |partial| partial + 1);
    let run_axis = full_from.saturating_sub(1);
    let run_elements: u64 = pixel_box[run_axis..]
        .iter()
        .map(|r| r.end - r.start)
        .product();

    let mut segments = Vec::new();
    let mut output_element = 0;
    for_each_index(&pixel_box[..run_axis], |outer| {
        let first_element: u64 = outer
            .iter()
            .zip(&strides)
            .map(|(i, stride)| i * stride)
            .sum::<u64>()
            + pixel_box[run_axis].start * strides[run_axis];
        segments.push(Segment {
            offset: base + first_element * element_size,
            length: run_elements * element_size,
            target: SegmentTarget::Run { output_element },
        });
        output_element += run_elements;
    });
    segments
}

fn chunk_segments(
    array: &str,
    chunk_shape: &[u64],
    chunks: &[ChunkLocation],
    pixel_box: &[Range<u64>],
) -> Result<Vec<Segment>, PlanError> {
    let by_index: HashMap<&[u64], &ChunkLocation> =
        chunks.iter().map(|c| (c.index.as_slice(), c)).collect();
    let chunk_box: Vec<Range<u64>> = pixel_box
        .iter()
        .zip(chunk_shape)
        .map(|(range, chunk)| range.start / chunk..(range.end - 1) / chunk + 1)
        .collect();

    let mut segments = Vec::new();
    let mut missing = None;
    for_each_index(&chunk_box, |index| {
        if missing.is_some() {
            return;
        }
        match by_index.get(index) {
            Some(chunk) => segments.push(Segment {
                offset: chunk.offset,
                length: chunk.length,
                target: SegmentTarget::Chunk {
                    index: index.to_vec(),
                },
            }),
            None => missing = Some(index.to_vec()),
        }
    });
    if let Some(index) = missing {
        return Err(PlanError::ChunkNotIndexed {
            array: array.to_string(),
            index,
        });
    }

    // Chunks may be stored in any order.
    segments.sort_by_key(|s| s.offset);
    Ok(segments)
}

/// Coalesce sorted, disjoint segments into reads, joining neighbours whose
/// gap is at most `min_gap_bytes`.
fn merge(segments: Vec<Segment>, min_gap_bytes: u64) -> Vec<PlannedRange> {
    let mut entries: Vec<PlannedRange> = Vec::new();
    for segment in segments {
        match entries.last_mut() {
            Some(entry) if segment.offset.saturating_sub(entry.end()) <= min_gap_bytes => {
                entry.length = segment.offset + segment.length - entry.offset;
                entry.segments.push(segment);
            }
            _ => entries.push(PlannedRange {
                offset: segment.offset,
                length: segment.length,
                segments: vec![segment],
            }),
        }
    }
    entries
}

#[cfg(test)]
mod tests {
    use fornax_index::CoordinateAxis;

    use super::*;

    fn image_index() -> Index {
        Index::new().with_array(
            "SCI",
            ArrayLayout::contiguous(DataType::I32, vec![10, 10], 100),
        )
    }

    fn no_merge() -> PlannerOptions {
        PlannerOptions { min_gap_bytes: 0 }
    }

    #[test]
    fn full_rows_fold_into_one_range() {
        let request = SubsetRequest::new("SCI").pixels(2..4).all();
        let plan = plan(&image_index(), &request, &no_merge()).unwrap();
        assert_eq!(plan.output_shape, vec![2, 10]);
        assert_eq!(plan.entries.len(), 1);
        assert_eq!(plan.entries[0].range(), 180..260);
        assert_eq!(
            plan.entries[0].segments[0].target,
            SegmentTarget::Run { output_element: 0 }
        );
        assert_eq!(plan.overfetch_bytes(), 0);
    }

    #[test]
    fn column_block_yields_one_run_per_row() {
        let request = SubsetRequest::new("SCI").pixels(1..4).pixels(3..5);
        let plan = plan(&image_index(), &request, &no_merge()).unwrap();
        let ranges: Vec<_> = plan.entries.iter().map(PlannedRange::range).collect();
        assert_eq!(ranges, vec![152..160, 192..200, 232..240]);
        let targets: Vec<_> = plan
            .entries
            .iter()
            .map(|e| e.segments[0].target.clone())
            .collect();
        assert_eq!(
            targets,
            vec![
                SegmentTarget::Run { output_element: 0 },
                SegmentTarget::Run { output_element: 2 },
                SegmentTarget::Run { output_element: 4 },
            ]
        );
    }

    #[test]
    fn small_gaps_are_merged() {
        let request = SubsetRequest::new("SCI").pixels(1..4).pixels(3..5);
        let plan = plan(&image_index(), &request, &PlannerOptions { min_gap_bytes: 32 }).unwrap();
        assert_eq!(plan.entries.len(), 1);
        assert_eq!(plan.entries[0].range(), 152..240);
        assert_eq!(plan.entries[0].segments.len(), 3);
        assert_eq!(plan.segment_bytes(), 24);
        assert_eq!(plan.overfetch_bytes(), 88 - 24);

        let plan = super::plan(&image_index(), &request, &PlannerOptions { min_gap_bytes: 31 })
            .unwrap();
        assert_eq!(plan.entries.len(), 3);
    }

    #[test]
    fn out_of_range_row_is_rejected() {
        let request = SubsetRequest::new("SCI").pixels(15..16).all();
        assert!(matches!(
            plan(&image_index(), &request, &no_merge()),
            Err(PlanError::RequestOutOfBounds { axis: 0, .. })
        ));
        assert!(matches!(
            plan(&image_index(), &SubsetRequest::new("ERR").all().all(), &no_merge()),
            Err(PlanError::UnknownArray { .. })
        ));
    }

    #[test]
    fn chunked_plan_reads_intersecting_chunks_in_offset_order() {
        // 5x6 array in 2x4 chunks: grid 3x2, stored in reverse order.
        let mut chunks = Vec::new();
        for (n, (row, col)) in [(0, 0), (0, 1), (1, 0), (1, 1), (2, 0), (2, 1)]
            .into_iter()
            .enumerate()
        {
            chunks.push(ChunkLocation {
                index: vec![row, col],
                offset: 1000 - (n as u64 + 1) * 16,
                length: 16,
            });
        }
        let index = Index::new().with_array(
            "flux",
            ArrayLayout::chunked(DataType::I16, vec![5, 6], vec![2, 4], chunks),
        );

        let request = SubsetRequest::new("flux").pixels(1..3).pixels(3..5);
        let plan = plan(&index, &request, &no_merge()).unwrap();
        let chunk_indexes: Vec<_> = plan
            .entries
            .iter()
            .flat_map(|e| &e.segments)
            .map(|s| s.target.clone())
            .collect();
        assert_eq!(
            chunk_indexes,
            vec![
                SegmentTarget::Chunk { index: vec![1, 1] },
                SegmentTarget::Chunk { index: vec![1, 0] },
                SegmentTarget::Chunk { index: vec![0, 1] },
                SegmentTarget::Chunk { index: vec![0, 0] },
            ]
        );
        assert!(plan.entries.windows(2).all(|w| w[0].end() <= w[1].offset));
    }

    #[test]
    fn missing_chunk_is_reported() {
        let index = Index::new().with_array(
            "flux",
            ArrayLayout::chunked(
                DataType::U8,
                vec![4],
                vec![2],
                vec![ChunkLocation {
                    index: vec![0],
                    offset: 0,
                    length: 2,
                }],
            ),
        );
        let err = plan(&index, &SubsetRequest::new("flux").all(), &no_merge()).unwrap_err();
        assert_eq!(
            err,
            PlanError::ChunkNotIndexed {
                array: "flux".to_string(),
                index: vec![1]
            }
        );
    }

    #[test]
    fn world_selection_is_planned_through_the_axis() {
        let index = Index::new().with_array(
            "SCI",
            ArrayLayout::contiguous(DataType::F32, vec![4, 100], 0).with_axes(vec![
                None,
                Some(CoordinateAxis {
                    name: "WAVE".to_string(),
                    start: 4000.0,
                    step: 2.5,
                }),
            ]),
        );
        let request = SubsetRequest::new("SCI").pixels(0..1).world(4010.0, 4020.0);
        let plan = plan(&index, &request, &no_merge()).unwrap();
        assert_eq!(plan.pixel_box, vec![0..1, 4..9]);
        assert_eq!(plan.entries[0].range(), 16..36);
    }

    #[test]
    fn row_major_iteration() {
        let mut seen = Vec::new();
        for_each_index(&[1..3, 0..2], |i| seen.push(i.to_vec()));
        assert_eq!(seen, vec![vec![1, 0], vec![1, 1], vec![2, 0], vec![2, 1]]);

        let mut calls = 0;
        for_each_index(&[], |_| calls += 1);
        assert_eq!(calls, 1);
        assert_eq!(strides(&[3, 4, 5]), vec![20, 5, 1]);
    }
}
