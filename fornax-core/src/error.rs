use std::fmt::Display;

use fornax_fetcher::FetchError;
use fornax_index::IndexError;
use fornax_object_storage::StorageError;
use fornax_planner::PlanError;

use crate::assembler::AssembleError;

pub type SubsetResult<T> = std::result::Result<T, SubsetError>;

/// Pipeline stage a failure happened in.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Stage {
    Resolve,
    Index,
    Plan,
    Fetch,
    Assemble,
}

impl Display for Stage {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let name = match self {
            Stage::Resolve => "resolve",
            Stage::Index => "index",
            Stage::Plan => "plan",
            Stage::Fetch => "fetch",
            Stage::Assemble => "assemble",
        };
        f.write_str(name)
    }
}

/// Coarse classification of a failure for callers.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ErrorKind {
    /// The request itself is wrong; repeating it will not help.
    InvalidRequest,
    /// Storage or the network failed.
    Service,
    /// The pipeline broke one of its own invariants.
    Internal,
    /// The caller cancelled the request.
    Cancelled,
}

#[derive(Debug, thiserror::Error)]
pub enum SubsetError {
    #[error(transparent)]
    Resolve(#[from] StorageError),
    #[error(transparent)]
    Index(#[from] IndexError),
    #[error(transparent)]
    Plan(#[from] PlanError),
    #[error(transparent)]
    Fetch(#[from] FetchError),
    #[error(transparent)]
    Assemble(#[from] AssembleError),
}

impl SubsetError {
    pub fn stage(&self) -> Stage {
        match self {
            SubsetError::Resolve(_) => Stage::Resolve,
            SubsetError::Index(_) => Stage::Index,
            SubsetError::Plan(_) => Stage::Plan,
            SubsetError::Fetch(_) => Stage::Fetch,
            SubsetError::Assemble(_) => Stage::Assemble,
        }
    }

    pub fn kind(&self) -> ErrorKind {
        match self {
            SubsetError::Resolve(StorageError::InvalidUrl { .. })
            | SubsetError::Resolve(StorageError::ObjectStoreError(object_store::Error::NotFound { .. }))
            | SubsetError::Plan(_) => ErrorKind::InvalidRequest,
            SubsetError::Resolve(_) | SubsetError::Index(_) => ErrorKind::Service,
            SubsetError::Fetch(FetchError::Cancelled) => ErrorKind::Cancelled,
            SubsetError::Fetch(FetchError::RangeOutsideObject { .. }) => ErrorKind::Internal,
            SubsetError::Fetch(_) => ErrorKind::Service,
            SubsetError::Assemble(_) => ErrorKind::Internal,
        }
    }
}
