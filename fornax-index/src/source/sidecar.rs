use object_store::{ObjectStore, PutPayload, path::Path};
use serde::{Deserialize, Serialize};

use fornax_object_storage::{RangeReader, RemoteObjectRef, StorageError};

use crate::{error::HeaderError, index::Index, source::HeaderSource};

/// JSON document stored next to a data object.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct SidecarDocument {
    /// Size of the data object the index was generated for. When present, a
    /// sidecar describing a different size is rejected as stale.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub object_size: Option<u64>,
    #[serde(flatten)]
    pub index: Index,
}

/// Reads a precomputed index from `<object key><suffix>`.
#[derive(Debug, Clone)]
pub struct SidecarHeaderSource {
    suffix: String,
    max_bytes: u64,
}

impl Default for SidecarHeaderSource {
    fn default() -> Self {
        Self::new(".index.json", 16 * 1024 * 1024)
    }
}

impl SidecarHeaderSource {
    pub fn new(suffix: impl Into<String>, max_bytes: u64) -> Self {
        Self {
            suffix: suffix.into(),
            max_bytes,
        }
    }

    pub fn from_config() -> Self {
        let config = &*fornax_config::CONFIG;
        Self::new(config.sidecar_suffix.clone(), config.sidecar_max_bytes)
    }

    pub fn sidecar_location(&self, object: &Path) -> Path {
        sidecar_location(object, &self.suffix)
    }
}

fn sidecar_location(object: &Path, suffix: &str) -> Path {
    Path::from(format!("{object}{suffix}"))
}

#[async_trait::async_trait]
impl HeaderSource for SidecarHeaderSource {
    fn name(&self) -> &'static str {
        "sidecar"
    }

    async fn build_index(
        &self,
        reader: &dyn RangeReader,
        object: &RemoteObjectRef,
    ) -> Result<Index, HeaderError> {
        let location = self.sidecar_location(object.location());
        let read_error = |source: StorageError| HeaderError::Read {
            location: location.to_string(),
            source,
        };

        let sidecar = reader.head(&location).await.map_err(read_error)?;
        if sidecar.size() > self.max_bytes {
            return Err(HeaderError::SidecarTooLarge {
                location: location.to_string(),
                size: sidecar.size(),
                limit: self.max_bytes,
            });
        }

        let bytes = reader
            .read_range(&location, 0..sidecar.size())
            .await
            .map_err(read_error)?;
        let document: SidecarDocument =
            serde_json::from_slice(&bytes).map_err(|source| HeaderError::SidecarDecode {
                location: location.to_string(),
                source,
            })?;

        if let Some(expected) = document.object_size {
            if expected != object.size() {
                return Err(HeaderError::StaleSidecar {
                    location: location.to_string(),
                    expected,
                    actual: object.size(),
                });
            }
        }
        if document.index.is_empty() {
            return Err(HeaderError::NoArrays {
                location: location.to_string(),
            });
        }
        document.index.validate(object.size())?;
        tracing::debug!(%location, arrays = document.index.arrays.len(), "loaded sidecar index");
        Ok(document.index)
    }
}

/// Write `index` as the sidecar of `object`, stamped with the object size.
pub async fn publish_sidecar(
    store: &dyn ObjectStore,
    object: &RemoteObjectRef,
    index: &Index,
    suffix: &str,
) -> Result<Path, HeaderError> {
    let location = sidecar_location(object.location(), suffix);
    index.validate(object.size())?;

    let document = SidecarDocument {
        object_size: Some(object.size()),
        index: index.clone(),
    };
    let json = serde_json::to_vec_pretty(&document).map_err(|source| HeaderError::SidecarEncode {
        location: location.to_string(),
        source,
    })?;
    store
        .put(&location, PutPayload::from(json))
        .await
        .map_err(|e| HeaderError::SidecarWrite {
            location: location.to_string(),
            source: StorageError::from(e),
        })?;
    tracing::info!(%location, "published sidecar index");
    Ok(location)
}

#[cfg(test)]
mod tests {
    use fornax_object_storage::testing::CountingReader;

    use super::*;
    use crate::layout::{ArrayLayout, ChunkLocation, DataType};

    fn chunked_index() -> Index {
        Index::new().with_array(
            "flux",
            ArrayLayout::chunked(
                DataType::F64,
                vec![4, 4],
                vec![2, 4],
                vec![
                    ChunkLocation { index: vec![0, 0], offset: 0, length: 64 },
                    ChunkLocation { index: vec![1, 0], offset: 64, length: 64 },
                ],
            ),
        )
    }

    #[tokio::test]
    async fn reads_published_sidecar() {
        let reader = CountingReader::new();
        let object = reader.put("cubes/flux.bin", vec![0; 128]).await;
        let source = SidecarHeaderSource::default();

        let json = serde_json::to_vec(&SidecarDocument {
            object_size: Some(128),
            index: chunked_index(),
        })
        .unwrap();
        reader.put("cubes/flux.bin.index.json", json).await;

        let index = source.build_index(&reader, &object).await.unwrap();
        assert_eq!(index, chunked_index());
        // One head and one read of the sidecar, nothing from the data object.
        assert_eq!(reader.head_count(), 1);
        assert_eq!(reader.reads().len(), 1);
    }

    #[tokio::test]
    async fn rejects_stale_missing_and_oversized_sidecars() {
        let reader = CountingReader::new();
        let object = reader.put("cubes/flux.bin", vec![0; 256]).await;

        let source = SidecarHeaderSource::default();
        assert!(matches!(
            source.build_index(&reader, &object).await,
            Err(HeaderError::Read { .. })
        ));

        let json = serde_json::to_vec(&SidecarDocument {
            object_size: Some(128),
            index: chunked_index(),
        })
        .unwrap();
        let sidecar_len = json.len() as u64;
        reader.put("cubes/flux.bin.index.json", json).await;
        assert!(matches!(
            source.build_index(&reader, &object).await,
            Err(HeaderError::StaleSidecar { expected: 128, actual: 256, .. })
        ));

        let small = SidecarHeaderSource::new(".index.json", sidecar_len - 1);
        assert!(matches!(
            small.build_index(&reader, &object).await,
            Err(HeaderError::SidecarTooLarge { .. })
        ));
    }

    #[tokio::test]
    async fn publish_stamps_object_size() {
        let store = object_store::memory::InMemory::new();
        let object = RemoteObjectRef::new(Path::from("cubes/flux.bin"), 128, None);
        let location = publish_sidecar(&store, &object, &chunked_index(), ".idx")
            .await
            .unwrap();
        assert_eq!(location.as_ref(), "cubes/flux.bin.idx");

        let bytes = store.get(&location).await.unwrap().bytes().await.unwrap();
        let document: SidecarDocument = serde_json::from_slice(&bytes).unwrap();
        assert_eq!(document.object_size, Some(128));
        assert_eq!(document.index, chunked_index());

        let too_small = RemoteObjectRef::new(Path::from("cubes/flux.bin"), 100, None);
        assert!(publish_sidecar(&store, &too_small, &chunked_index(), ".idx").await.is_err());
    }

    #[tokio::test]
    async fn failed_publish_is_a_write_error() {
        // A store rooted at a regular file cannot create anything below it.
        let root = std::env::temp_dir().join(format!("fornax-sidecar-root-{}", std::process::id()));
        std::fs::write(&root, b"not a directory").unwrap();
        let store = object_store::local::LocalFileSystem::new_with_prefix(&root).unwrap();
        let object = RemoteObjectRef::new(Path::from("cubes/flux.bin"), 128, None);

        let result = publish_sidecar(&store, &object, &chunked_index(), ".idx").await;
        std::fs::remove_file(&root).unwrap();

        let err = result.unwrap_err();
        assert!(matches!(err, HeaderError::SidecarWrite { .. }), "{err}");
        assert!(err.to_string().starts_with("Failed to write sidecar index cubes/flux.bin.idx"), "{err}");
    }
}
