use std::sync::Arc;

use async_trait::async_trait;
use bytes::Bytes;
use tokio_util::sync::CancellationToken;

use chunkwise_core::registry::{ChunkStore, ReadinessCheck};
use chunkwise_core::{ChunkKey, RetryProfiles};
use chunkwise_objectstore::{Key, ObjectStore};

use super::errors::Error;

/// [`ChunkStore`] writing each chunk as one object under its [`ChunkKey`].
#[derive(Clone)]
pub struct ObjectChunkStore {
    objects: Arc<dyn ObjectStore>,
    retry: RetryProfiles,
}

impl ObjectChunkStore {
    pub fn new(objects: Arc<dyn ObjectStore>, retry: RetryProfiles) -> Self {
        Self { objects, retry }
    }
}

#[async_trait]
impl ReadinessCheck for ObjectChunkStore {
    fn name(&self) -> &'static str {
        "s3"
    }

    async fn probe(&self, cancel: &CancellationToken) -> chunkwise_core::Result<()> {
        let objects = &self.objects;
        self.retry
            .probe
            .run(
                cancel,
                move || async move { objects.probe().await.map_err(Error::from) },
                Error::is_transient,
            )
            .await
            .map_err(Error::from)?;
        Ok(())
    }
}

#[async_trait]
impl ChunkStore for ObjectChunkStore {
    async fn put_chunk(
        &self,
        key: &ChunkKey,
        bytes: Bytes,
        cancel: &CancellationToken,
    ) -> chunkwise_core::Result<()> {
        let object_key = Key::try_from(key.as_str()).map_err(Error::from)?;
        let object_key = &object_key;
        let objects = &self.objects;
        self.retry
            .data
            .run(
                cancel,
                move || {
                    let bytes = bytes.clone();
                    async move { objects.put(object_key, bytes).await.map_err(Error::from) }
                },
                Error::is_transient,
            )
            .await
            .map_err(Error::from)?;
        tracing::debug!(key = %object_key, "stored chunk");
        Ok(())
    }
}

#[cfg(test)]
mod test {
    use std::sync::atomic::{AtomicUsize, Ordering};
    use std::sync::Mutex;

    use chunkwise_core::{RetryPolicy, UploadId};

    use super::*;

    #[derive(Default)]
    struct RecordingObjects {
        puts: Mutex<Vec<(String, Bytes)>>,
        probes: AtomicUsize,
    }

    #[async_trait]
    impl ObjectStore for RecordingObjects {
        async fn put(&self, key: &Key, body: Bytes) -> chunkwise_objectstore::Result<()> {
            self.puts.lock().unwrap().push((String::from(key), body));
            Ok(())
        }

        async fn probe(&self) -> chunkwise_objectstore::Result<()> {
            self.probes.fetch_add(1, Ordering::SeqCst);
            Ok(())
        }
    }

    fn store(objects: Arc<RecordingObjects>) -> ObjectChunkStore {
        ObjectChunkStore::new(
            objects,
            RetryProfiles {
                data: RetryPolicy::new(3, 1),
                probe: RetryPolicy::new(1, 1),
            },
        )
    }

    #[tokio::test]
    async fn chunk_is_written_under_its_key() {
        let objects = Arc::new(RecordingObjects::default());
        let chunks = store(objects.clone());
        let upload_id = UploadId::try_from("abc").unwrap();

        chunks
            .put_chunk(
                &ChunkKey::new(&upload_id, 3),
                Bytes::from_static(b"data"),
                &CancellationToken::new(),
            )
            .await
            .unwrap();

        let puts = objects.puts.lock().unwrap();
        assert_eq!(
            *puts,
            vec![(
                String::from("uploads/abc/chunk_3"),
                Bytes::from_static(b"data")
            )]
        );
    }

    #[tokio::test]
    async fn cancelled_write_never_reaches_the_store() {
        let objects = Arc::new(RecordingObjects::default());
        let chunks = store(objects.clone());
        let cancel = CancellationToken::new();
        cancel.cancel();

        let err = chunks
            .put_chunk(
                &ChunkKey::new(&UploadId::try_from("abc").unwrap(), 0),
                Bytes::from_static(b"data"),
                &cancel,
            )
            .await
            .unwrap_err();

        assert!(matches!(err, chunkwise_core::Error::Cancelled));
        assert!(objects.puts.lock().unwrap().is_empty());
    }

    #[tokio::test]
    async fn probe_reaches_the_store() {
        let objects = Arc::new(RecordingObjects::default());
        let chunks = store(objects.clone());

        chunks.probe(&CancellationToken::new()).await.unwrap();

        assert_eq!(objects.probes.load(Ordering::SeqCst), 1);
    }
}
