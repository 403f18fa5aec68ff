use std::{collections::HashMap, ops::Range};

use fornax_fetcher::FetchedRange;
use fornax_index::{Index, Storage};
use fornax_planner::{
    RangePlan, SegmentTarget,
    plan::{for_each_index, strides},
};

use crate::subset::{Provenance, Subset};

/// The fetched bytes do not match the plan they were fetched for.
#[derive(Debug, Clone, PartialEq, thiserror::Error)]
pub enum AssembleError {
    #[error("Incomplete fetch for {array}: {reason}")]
    IncompleteFetch { array: String, reason: String },
    #[error("Plan for {array} does not match its index: {reason}")]
    PlanMismatch { array: String, reason: String },
}

/// Copy every planned segment out of `ranges` into a row-major subset.
///
/// Ranges are matched to plan entries by offset, so the order they arrive in
/// does not matter. Every planned range must be present exactly once, nothing
/// else may be, and together the segments must write every output byte
/// exactly once.
pub fn assemble(
    index: &Index,
    plan: &RangePlan,
    ranges: Vec<FetchedRange>,
) -> Result<Subset, AssembleError> {
    let incomplete = |reason: String| AssembleError::IncompleteFetch {
        array: plan.array.clone(),
        reason,
    };
    let mismatch = |reason: String| AssembleError::PlanMismatch {
        array: plan.array.clone(),
        reason,
    };

    let layout = index
        .array(&plan.array)
        .ok_or_else(|| mismatch("array is not in the index".to_string()))?;
    if layout.data_type != plan.data_type || layout.ndim() != plan.pixel_box.len() {
        return Err(mismatch(format!(
            "plan is for {:?} with {} axes, index has {:?} with {} axes",
            plan.data_type,
            plan.pixel_box.len(),
            layout.data_type,
            layout.ndim()
        )));
    }

    let mut by_offset: HashMap<u64, FetchedRange> = HashMap::with_capacity(ranges.len());
    for range in ranges {
        if range.bytes.len() as u64 != range.length {
            return Err(incomplete(format!(
                "range {:?} carries {} bytes",
                range.range(),
                range.bytes.len()
            )));
        }
        if let Some(previous) = by_offset.insert(range.offset, range) {
            return Err(incomplete(format!(
                "range at offset {} delivered twice",
                previous.offset
            )));
        }
    }

    let element_size = plan.data_type.size();
    let output_len = plan.output_bytes() as usize;
    let mut raw = vec![0u8; output_len];
    // Output byte ranges written so far.
    let mut covered: Vec<Range<usize>> = Vec::new();

    for entry in &plan.entries {
        let fetched = by_offset
            .remove(&entry.offset)
            .ok_or_else(|| incomplete(format!("planned range {:?} is missing", entry.range())))?;
        if fetched.length != entry.length {
            return Err(incomplete(format!(
                "planned range {:?} was fetched as {:?}",
                entry.range(),
                fetched.range()
            )));
        }

        for segment in &entry.segments {
            let start = (segment.offset - entry.offset) as usize;
            let bytes = fetched
                .bytes
                .get(start..start + segment.length as usize)
                .ok_or_else(|| mismatch(format!("segment at {} exceeds its range", segment.offset)))?;

            match &segment.target {
                SegmentTarget::Run { output_element } => {
                    let out = (*output_element * element_size) as usize;
                    raw.get_mut(out..out + bytes.len())
                        .ok_or_else(|| mismatch(format!("run at element {output_element} exceeds the output")))?
                        .copy_from_slice(bytes);
                    covered.push(out..out + bytes.len());
                }
                SegmentTarget::Chunk { index: chunk_index } => {
                    let Storage::Chunked { chunk_shape, .. } = &layout.storage else {
                        return Err(mismatch("chunk segment for contiguous storage".to_string()));
                    };
                    copy_chunk(
                        bytes,
                        chunk_index,
                        chunk_shape,
                        &plan.pixel_box,
                        element_size as usize,
                        &mut raw,
                        &mut covered,
                    )
                    .map_err(mismatch)?;
                }
            }
        }
    }

    if !by_offset.is_empty() {
        let mut unplanned: Vec<_> = by_offset.values().map(FetchedRange::range).collect();
        unplanned.sort_by_key(|r| r.start);
        return Err(incomplete(format!("unplanned ranges {unplanned:?}")));
    }
    check_coverage(covered, output_len).map_err(mismatch)?;

    Ok(Subset {
        array: plan.array.clone(),
        shape: plan.output_shape.clone(),
        data_type: plan.data_type,
        byte_order: layout.byte_order,
        scaling: layout.scaling,
        raw,
        provenance: Provenance {
            object: None,
            pixel_box: plan.pixel_box.clone(),
            ranges: plan.entries.iter().map(|e| e.range()).collect(),
            fetch: None,
        },
    })
}

/// The written ranges must tile `0..output_len` with no overlap and no hole.
fn check_coverage(mut covered: Vec<Range<usize>>, output_len: usize) -> Result<(), String> {
    covered.sort_unstable_by_key(|range| range.start);
    let mut next = 0;
    for range in covered {
        if range.start < next {
            return Err(format!("output bytes {}..{} written twice", range.start, next.min(range.end)));
        }
        if range.start > next {
            return Err(format!("output bytes {next}..{} not covered", range.start));
        }
        next = range.end;
    }
    if next != output_len {
        return Err(format!("output bytes {next}..{output_len} not covered"));
    }
    Ok(())
}

/// Copy the part of one chunk that lies inside `pixel_box`, recording the
/// output ranges written.
fn copy_chunk(
    chunk: &[u8],
    chunk_index: &[u64],
    chunk_shape: &[u64],
    pixel_box: &[Range<u64>],
    element_size: usize,
    out: &mut [u8],
    covered: &mut Vec<Range<usize>>,
) -> Result<(), String> {
    let ndim = pixel_box.len();
    if chunk_index.len() != ndim || chunk_shape.len() != ndim {
        return Err(format!("chunk {chunk_index:?} does not match the plan dimensions"));
    }

    let overlap: Vec<Range<u64>> = (0..ndim)
        .map(|axis| {
            let origin = chunk_index[axis] * chunk_shape[axis];
            let start = origin.max(pixel_box[axis].start);
            let end = (origin + chunk_shape[axis]).min(pixel_box[axis].end);
            start..end.max(start)
        })
        .collect();
    if overlap.iter().any(|r| r.is_empty()) {
        return Err(format!("chunk {chunk_index:?} does not intersect the pixel box"));
    }

    let output_shape: Vec<u64> = pixel_box.iter().map(|r| r.end - r.start).collect();
    let chunk_strides = strides(chunk_shape);
    let output_strides = strides(&output_shape);
    let last = ndim - 1;
    let run = (overlap[last].end - overlap[last].start) as usize * element_size;

    let mut failure = None;
    for_each_index(&overlap[..last], |outer| {
        if failure.is_some() {
            return;
        }
        let mut in_chunk = (overlap[last].start - chunk_index[last] * chunk_shape[last]) * chunk_strides[last];
        let mut in_output = (overlap[last].start - pixel_box[last].start) * output_strides[last];
        for (axis, position) in outer.iter().enumerate() {
            in_chunk += (position - chunk_index[axis] * chunk_shape[axis]) * chunk_strides[axis];
            in_output += (position - pixel_box[axis].start) * output_strides[axis];
        }
        let src = in_chunk as usize * element_size;
        let dst_start = in_output as usize * element_size;
        match (chunk.get(src..src + run), out.get_mut(dst_start..dst_start + run)) {
            (Some(src), Some(dst)) => {
                dst.copy_from_slice(src);
                covered.push(dst_start..dst_start + run);
            }
            _ => failure = Some(format!("chunk {chunk_index:?} copy out of bounds")),
        }
    });

    match failure {
        Some(reason) => Err(reason),
        None => Ok(()),
    }
}
