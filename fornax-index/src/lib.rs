//! Index Store: per-object descriptions of where array bytes live.
//!
//! An [`Index`] is built once per [`RemoteObjectRef`](fornax_object_storage::RemoteObjectRef)
//! from a bounded read of header bytes and cached in an [`IndexStore`].

pub mod error;
pub mod fits;
pub mod index;
pub mod layout;
pub mod source;
pub mod store;

pub use error::{HeaderError, IndexError, IndexResult, LayoutError};
pub use index::Index;
pub use layout::{ArrayLayout, ByteOrder, ChunkLocation, CoordinateAxis, DataType, Scaling, Storage};
pub use source::{
    FitsHeaderSource, HeaderSource, SidecarHeaderSource, header_source_from_config,
    sidecar::{SidecarDocument, publish_sidecar},
};
pub use store::{IndexStore, global_index_store};
