/// Why a subset request cannot be planned against an index.
///
/// Every variant is a caller error: retrying the same request against the
/// same index fails the same way.
#[derive(Debug, Clone, PartialEq, thiserror::Error)]
pub enum PlanError {
    #[error("Unknown array {array}, available arrays: {available:?}")]
    UnknownArray {
        array: String,
        available: Vec<String>,
    },
    #[error("Array {array} has {expected} axes but {actual} selections were given")]
    DimensionMismatch {
        array: String,
        expected: usize,
        actual: usize,
    },
    #[error("Selection {requested} on axis {axis} of {array} is outside the extent {extent}")]
    RequestOutOfBounds {
        array: String,
        axis: usize,
        requested: String,
        extent: String,
    },
    #[error("Selection on axis {axis} of {array} selects no pixels")]
    EmptySelection { array: String, axis: usize },
    #[error("Axis {axis} of {array} has no coordinate mapping")]
    NoCoordinateMapping { array: String, axis: usize },
    #[error("Chunk {index:?} of {array} is not present in the index")]
    ChunkNotIndexed { array: String, index: Vec<u64> },
}
