use std::path::PathBuf;
use std::sync::Arc;

use log::{debug, error, info};

use crate::cache::KeyLocks;
use crate::images::{ImageError, ImageLocation, TransformSpec, Transformer};
use crate::storage;

/// A derivative ready to serve.
#[derive(Debug, Clone)]
pub struct Derivative {
    pub bytes: Vec<u8>,
    pub path: PathBuf,
    pub from_cache: bool,
}

/// On-disk cache of transformed images.
///
/// A derivative is either missing, being generated, or present. Present
/// entries are never invalidated here; only the lifecycle manager removes
/// them. Generation for a given derivative path is serialized through
/// [`KeyLocks`], and the result is written with a temp-file rename so
/// readers never observe a partial file.
#[derive(Clone)]
pub struct DerivativeCache {
    codec: Arc<dyn Transformer>,
    locks: KeyLocks,
}

impl DerivativeCache {
    pub fn new(codec: Arc<dyn Transformer>) -> Self {
        Self {
            codec,
            locks: KeyLocks::new(),
        }
    }

    pub fn in_flight(&self) -> usize {
        self.locks.in_flight()
    }

    pub async fn get(
        &self,
        location: &ImageLocation,
        spec: &TransformSpec,
    ) -> Result<Derivative, ImageError> {
        if let Some(bytes) = storage::read_if_exists(&location.derivative).await? {
            debug!("Derivative cache hit: {}", location.cache_key);
            return Ok(Derivative {
                bytes,
                path: location.derivative.clone(),
                from_cache: true,
            });
        }

        let key = location.derivative.to_string_lossy().into_owned();
        let guard = self.locks.acquire(&key).await;

        let codec = self.codec.clone();
        let location = location.clone();
        let spec = match location.target_format.as_deref() {
            Some(format) => spec.with_format(format),
            None => spec.clone(),
        };

        // Owned by its own task so an aborted request still finishes (or
        // rolls back) the write and releases the key.
        let generation = tokio::spawn(async move {
            let _guard = guard;
            generate(codec, &location, &spec).await
        });

        generation
            .await
            .map_err(|e| ImageError::TransformFailed(format!("generation task failed: {}", e)))?
    }
}

async fn generate(
    codec: Arc<dyn Transformer>,
    location: &ImageLocation,
    spec: &TransformSpec,
) -> Result<Derivative, ImageError> {
    // Another request may have produced it while we waited for the key
    if let Some(bytes) = storage::read_if_exists(&location.derivative).await? {
        debug!("Derivative produced while waiting: {}", location.cache_key);
        return Ok(Derivative {
            bytes,
            path: location.derivative.clone(),
            from_cache: true,
        });
    }

    let source = storage::read_if_exists(&location.original)
        .await?
        .ok_or(ImageError::OriginalNotFound)?;

    info!(
        "Generating derivative {} for user={} project={} file={} spec={:?}",
        location.cache_key, location.user_id, location.project_name, location.file_name, spec
    );

    let transform_spec = spec.clone();
    let encoded = tokio::task::spawn_blocking(move || codec.transform(&source, &transform_spec))
        .await
        .map_err(|e| ImageError::TransformFailed(format!("codec task failed: {}", e)))?;

    let bytes = encoded.map_err(|e| {
        error!(
            "Transform failed for user={} project={} file={} spec={:?}: {}",
            location.user_id, location.project_name, location.file_name, spec, e
        );
        match e {
            ImageError::DecodeError(msg) => ImageError::TransformFailed(msg),
            other => other,
        }
    })?;

    storage::write_atomic(location.derivative.clone(), bytes.clone())
        .await
        .map_err(|e| {
            error!(
                "Failed to persist derivative for user={} project={} file={} spec={:?}: {}",
                location.user_id, location.project_name, location.file_name, spec, e
            );
            ImageError::StorageIo(e)
        })?;

    Ok(Derivative {
        bytes,
        path: location.derivative.clone(),
        from_cache: false,
    })
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::images::codec::tests::sample_png;
    use crate::images::{ImageCodec, PathResolver};
    use std::sync::atomic::{AtomicBool, AtomicUsize, Ordering};
    use std::time::Duration;

    /// Real codec with a call counter, an optional delay and a failure switch.
    #[derive(Default)]
    struct CountingCodec {
        calls: AtomicUsize,
        delay: Duration,
        fail: AtomicBool,
    }

    impl Transformer for CountingCodec {
        fn transform(&self, source: &[u8], spec: &TransformSpec) -> Result<Vec<u8>, ImageError> {
            self.calls.fetch_add(1, Ordering::SeqCst);
            std::thread::sleep(self.delay);
            if self.fail.load(Ordering::SeqCst) {
                return Err(ImageError::TransformFailed("forced failure".into()));
            }
            ImageCodec::default().transform(source, spec)
        }
    }

    struct Fixture {
        _dir: tempfile::TempDir,
        location: ImageLocation,
        spec: TransformSpec,
    }

    fn fixture(with_original: bool) -> Fixture {
        let dir = tempfile::tempdir().unwrap();
        let resolver = PathResolver::new(dir.path());
        let spec = TransformSpec {
            width: Some(8),
            format: Some("jpeg".into()),
            quality: Some(80),
            ..Default::default()
        };
        let location = resolver.resolve("u1", "proj", "photo.png", &spec).unwrap();
        if with_original {
            std::fs::create_dir_all(location.original.parent().unwrap()).unwrap();
            std::fs::write(&location.original, sample_png(32, 16)).unwrap();
        }
        Fixture { _dir: dir, location, spec }
    }

    fn transformed_entries(location: &ImageLocation) -> usize {
        std::fs::read_dir(location.derivative.parent().unwrap())
            .map(|entries| entries.count())
            .unwrap_or(0)
    }

    #[tokio::test]
    async fn second_get_is_a_hit_without_recoding() {
        let fx = fixture(true);
        let codec = Arc::new(CountingCodec::default());
        let cache = DerivativeCache::new(codec.clone());

        let first = cache.get(&fx.location, &fx.spec).await.unwrap();
        let second = cache.get(&fx.location, &fx.spec).await.unwrap();
        let third = cache.get(&fx.location, &fx.spec).await.unwrap();

        assert!(!first.from_cache);
        assert!(second.from_cache && third.from_cache);
        assert_eq!(first.bytes, second.bytes);
        assert_eq!(second.bytes, third.bytes);
        assert_eq!(codec.calls.load(Ordering::SeqCst), 1);
        assert!(fx.location.derivative.ends_with("photo_8xauto_jpeg_q80.jpeg"));
        assert_eq!(image::guess_format(&first.bytes).unwrap(), image::ImageFormat::Jpeg);
    }

    #[tokio::test]
    async fn concurrent_requests_generate_once() {
        let fx = fixture(true);
        let codec = Arc::new(CountingCodec {
            delay: Duration::from_millis(50),
            ..Default::default()
        });
        let cache = DerivativeCache::new(codec.clone());

        let results =
            futures::future::join_all((0..16).map(|_| cache.get(&fx.location, &fx.spec))).await;

        let first = results[0].as_ref().unwrap().bytes.clone();
        for result in &results {
            assert_eq!(result.as_ref().unwrap().bytes, first);
        }
        assert_eq!(codec.calls.load(Ordering::SeqCst), 1);
        assert_eq!(cache.in_flight(), 0);
    }

    #[tokio::test]
    async fn missing_original_is_reported() {
        let fx = fixture(false);
        let cache = DerivativeCache::new(Arc::new(CountingCodec::default()));

        let err = cache.get(&fx.location, &fx.spec).await.unwrap_err();
        assert!(matches!(err, ImageError::OriginalNotFound));
        assert!(!fx.location.derivative.exists());
        assert_eq!(cache.in_flight(), 0);
    }

    #[tokio::test]
    async fn failed_generation_leaves_nothing_and_can_be_retried() {
        let fx = fixture(true);
        let codec = Arc::new(CountingCodec::default());
        codec.fail.store(true, Ordering::SeqCst);
        let cache = DerivativeCache::new(codec.clone());

        let err = cache.get(&fx.location, &fx.spec).await.unwrap_err();
        assert!(matches!(err, ImageError::TransformFailed(_)));
        assert!(!fx.location.derivative.exists());
        assert_eq!(transformed_entries(&fx.location), 0);
        assert_eq!(cache.in_flight(), 0);

        codec.fail.store(false, Ordering::SeqCst);
        let derivative = cache.get(&fx.location, &fx.spec).await.unwrap();
        assert!(!derivative.from_cache);
        assert!(fx.location.derivative.exists());
        assert_eq!(codec.calls.load(Ordering::SeqCst), 2);
    }

    #[tokio::test]
    async fn aborted_request_still_completes_generation() {
        let fx = fixture(true);
        let codec = Arc::new(CountingCodec {
            delay: Duration::from_millis(100),
            ..Default::default()
        });
        let cache = DerivativeCache::new(codec.clone());

        let request = {
            let cache = cache.clone();
            let location = fx.location.clone();
            let spec = fx.spec.clone();
            tokio::spawn(async move { cache.get(&location, &spec).await })
        };
        tokio::time::sleep(Duration::from_millis(20)).await;
        request.abort();

        tokio::time::sleep(Duration::from_millis(500)).await;
        assert!(fx.location.derivative.exists());
        assert_eq!(transformed_entries(&fx.location), 1);
        assert_eq!(cache.in_flight(), 0);

        let derivative = cache.get(&fx.location, &fx.spec).await.unwrap();
        assert!(derivative.from_cache);
        assert_eq!(codec.calls.load(Ordering::SeqCst), 1);
    }

    /// Lets the source through but squats on the derivative path before the
    /// result is persisted.
    struct SquattingCodec {
        derivative: PathBuf,
    }

    impl Transformer for SquattingCodec {
        fn transform(&self, source: &[u8], spec: &TransformSpec) -> Result<Vec<u8>, ImageError> {
            std::fs::create_dir_all(self.derivative.join("blocker")).unwrap();
            ImageCodec::default().transform(source, spec)
        }
    }

    #[tokio::test]
    async fn failed_persist_leaves_no_partial_derivative() {
        let fx = fixture(true);
        let cache = DerivativeCache::new(Arc::new(SquattingCodec {
            derivative: fx.location.derivative.clone(),
        }));

        let err = cache.get(&fx.location, &fx.spec).await.unwrap_err();
        assert!(matches!(err, ImageError::StorageIo(_)));
        assert!(!fx.location.derivative.is_file());
        // Only the squatting directory, no stray temp file
        assert_eq!(transformed_entries(&fx.location), 1);
        assert_eq!(cache.in_flight(), 0);

        std::fs::remove_dir_all(&fx.location.derivative).unwrap();
        let cache = DerivativeCache::new(Arc::new(CountingCodec::default()));
        let derivative = cache.get(&fx.location, &fx.spec).await.unwrap();
        assert!(!derivative.from_cache);
        assert!(fx.location.derivative.is_file());
    }
}
