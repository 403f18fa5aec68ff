//! Subset Assembler and the cutout pipeline.
//!
//! [`SubsetService`] resolves an object, loads its index, plans the byte
//! ranges a request needs, fetches them and assembles the [`Subset`].

pub mod assembler;
pub mod error;
pub mod service;
pub mod subset;

pub use assembler::{AssembleError, assemble};
pub use error::{ErrorKind, Stage, SubsetError, SubsetResult};
pub use service::SubsetService;
pub use subset::{Provenance, Subset};

pub use fornax_fetcher::{CancellationToken, FetchOptions, FetchStats};
pub use fornax_index::{FitsHeaderSource, Index, IndexStore, SidecarHeaderSource};
pub use fornax_planner::{AxisSelection, PlannerOptions, Position, SubsetRequest};

/// Install the tracing subscriber for a process embedding the pipeline.
pub use fornax_logger::init as init_logging;
