//! Where header bytes come from and how they become an [`Index`].

use std::{fmt::Debug, sync::Arc};

use fornax_object_storage::{RangeReader, RemoteObjectRef};

use crate::{error::HeaderError, index::Index};

pub mod fits;
pub mod sidecar;

pub use fits::FitsHeaderSource;
pub use sidecar::SidecarHeaderSource;

/// Builds an [`Index`] for a remote object from a bounded amount of header
/// bytes.
#[async_trait::async_trait]
pub trait HeaderSource: Debug + Send + Sync {
    fn name(&self) -> &'static str;

    async fn build_index(
        &self,
        reader: &dyn RangeReader,
        object: &RemoteObjectRef,
    ) -> Result<Index, HeaderError>;
}

/// The header source selected by configuration.
pub fn header_source_from_config() -> Arc<dyn HeaderSource> {
    if fornax_config::CONFIG.use_sidecar_index {
        Arc::new(SidecarHeaderSource::from_config())
    } else {
        Arc::new(FitsHeaderSource::from_config())
    }
}
