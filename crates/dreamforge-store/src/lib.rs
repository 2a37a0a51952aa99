//! Object storage (§4.2 C2): upload bytes under a key, presign time-limited
//! GET URLs, with an internal endpoint for writes distinct from an optional
//! public endpoint used only for signing (§6, grounded in
//! `modules/storage/s3.py::upload_bytes`/`presign_get`).

use async_trait::async_trait;
use dreamforge_core::config::S3Config;
use dreamforge_core::error::{DfError, DfResult};
use dreamforge_core::ports::ObjectStore;
use s3::bucket::Bucket;
use s3::creds::Credentials;
use s3::region::Region;
use sha2::{Digest, Sha256};

fn region_for(endpoint: &str, config: &S3Config) -> Region {
    Region::Custom {
        region: config.region.clone(),
        endpoint: endpoint.to_owned(),
    }
}

fn credentials(config: &S3Config) -> DfResult<Credentials> {
    Credentials::new(Some(&config.access_key), Some(&config.secret_key), None, None, None)
        .map_err(|e| DfError::infra_unavailable(format!("invalid object store credentials: {e}")))
}

/// An S3/MinIO-compatible [`ObjectStore`]. Writes always go to the internal
/// endpoint; presigned URLs are signed against the public endpoint when one
/// is configured, so external clients can actually reach them.
pub struct S3Store {
    write_bucket: Box<Bucket>,
    presign_bucket: Box<Bucket>,
}

impl S3Store {
    pub fn new(config: &S3Config) -> DfResult<Self> {
        let creds = credentials(config)?;
        let write_bucket = Bucket::new(&config.bucket, region_for(&config.endpoint, config), creds.clone())
            .map_err(|e| DfError::infra_unavailable(format!("invalid object store config: {e}")))?
            .with_path_style();

        let presign_endpoint = config.public_endpoint.as_deref().unwrap_or(&config.endpoint);
        let presign_bucket = Bucket::new(&config.bucket, region_for(presign_endpoint, config), creds)
            .map_err(|e| DfError::infra_unavailable(format!("invalid object store config: {e}")))?
            .with_path_style();

        Ok(Self {
            write_bucket,
            presign_bucket,
        })
    }
}

#[async_trait]
impl ObjectStore for S3Store {
    async fn put(&self, key: &str, bytes: Vec<u8>, content_type: &str) -> DfResult<String> {
        let checksum = hex::encode(Sha256::digest(&bytes));
        self.write_bucket
            .put_object_with_content_type(key, &bytes, content_type)
            .await
            .map_err(|e| DfError::internal(format!("object store put failed: {e}")))?;
        Ok(checksum)
    }

    async fn get(&self, key: &str) -> DfResult<Vec<u8>> {
        let response = self
            .write_bucket
            .get_object(key)
            .await
            .map_err(|e| DfError::internal(format!("object store get failed: {e}")))?;
        Ok(response.bytes().to_vec())
    }

    async fn presign_get(&self, key: &str, ttl_secs: u64) -> DfResult<String> {
        let ttl = u32::try_from(ttl_secs.clamp(300, 86400))
            .map_err(|_| DfError::invalid_input("ttl_secs out of range"))?;
        self.presign_bucket
            .presign_get(key, ttl, None)
            .await
            .map_err(|e| DfError::internal(format!("presign failed: {e}")))
    }

    async fn ping(&self) -> DfResult<()> {
        self.write_bucket
            .location()
            .await
            .map(|_| ())
            .map_err(|e| DfError::infra_unavailable(format!("object store unreachable: {e}")))
    }
}

/// A filesystem-backed [`ObjectStore`] fake for tests (§1 "Test tooling"):
/// same checksum and presign-URL contract, minus an actual network hop.
pub struct LocalDiskStore {
    root: std::path::PathBuf,
    base_url: String,
}

impl LocalDiskStore {
    pub fn new(root: impl Into<std::path::PathBuf>, base_url: impl Into<String>) -> Self {
        Self {
            root: root.into(),
            base_url: base_url.into(),
        }
    }
}

#[async_trait]
impl ObjectStore for LocalDiskStore {
    async fn put(&self, key: &str, bytes: Vec<u8>, _content_type: &str) -> DfResult<String> {
        let path = self.root.join(key);
        if let Some(parent) = path.parent() {
            tokio::fs::create_dir_all(parent)
                .await
                .map_err(|e| DfError::internal(format!("local store mkdir failed: {e}")))?;
        }
        let checksum = hex::encode(Sha256::digest(&bytes));
        tokio::fs::write(&path, bytes)
            .await
            .map_err(|e| DfError::internal(format!("local store write failed: {e}")))?;
        Ok(checksum)
    }

    async fn get(&self, key: &str) -> DfResult<Vec<u8>> {
        tokio::fs::read(self.root.join(key))
            .await
            .map_err(|e| DfError::not_found(format!("local store object {key:?} missing: {e}")))
    }

    async fn presign_get(&self, key: &str, ttl_secs: u64) -> DfResult<String> {
        let ttl = ttl_secs.clamp(300, 86400);
        Ok(format!("{}/{}?ttl={}", self.base_url.trim_end_matches('/'), key, ttl))
    }

    async fn ping(&self) -> DfResult<()> {
        tokio::fs::metadata(&self.root)
            .await
            .map(|_| ())
            .map_err(|e| DfError::infra_unavailable(format!("local store root missing: {e}")))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn local_disk_store_round_trips_bytes() {
        let dir = tempfile::tempdir().unwrap();
        let store = LocalDiskStore::new(dir.path(), "http://localhost/objects");

        let checksum = store
            .put("jobs/a/generate/0.png", b"hello".to_vec(), "image/png")
            .await
            .unwrap();
        assert_eq!(checksum, hex::encode(Sha256::digest(b"hello")));

        let on_disk = tokio::fs::read(dir.path().join("jobs/a/generate/0.png"))
            .await
            .unwrap();
        assert_eq!(on_disk, b"hello");

        let fetched = store.get("jobs/a/generate/0.png").await.unwrap();
        assert_eq!(fetched, b"hello");
    }

    #[tokio::test]
    async fn presign_clamps_ttl() {
        let dir = tempfile::tempdir().unwrap();
        let store = LocalDiskStore::new(dir.path(), "http://localhost/objects");
        let url = store.presign_get("k", 10).await.unwrap();
        assert!(url.ends_with("ttl=300"));
    }
}
