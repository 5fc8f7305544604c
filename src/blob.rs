//! Blob storage for uploaded documents.
//!
//! [`AzureBlobStore`] talks to the Azure Blob REST API directly and returns
//! URLs carrying a 365-day read-only service SAS. [`LocalBlobStore`] writes
//! under a directory and returns `file://` URLs.

use std::path::{Component, Path, PathBuf};

use async_trait::async_trait;
use base64::Engine;
use base64::engine::general_purpose::STANDARD;
use chrono::{DateTime, Duration, Utc};
use hmac::{Hmac, Mac};
use sha2::Sha256;

use crate::errors::BlobError;

/// Lifetime of the read SAS on returned URLs.
pub const READ_SAS_DAYS: i64 = 365;

const SAS_VERSION: &str = "2022-11-02";
const WRITE_SAS_MINUTES: i64 = 15;

#[async_trait]
pub trait BlobStore: Send + Sync {
    /// Store `data` as `blob_name` in `container` and return a URL that
    /// reads it back.
    async fn upload(&self, container: &str, blob_name: &str, data: Vec<u8>) -> Result<String, BlobError>;
}

/// Content type for a blob, from its extension.
pub fn content_type(blob_name: &str) -> String {
    mime_guess::from_path(blob_name)
        .first_or_octet_stream()
        .essence_str()
        .to_string()
}

/// Fields of an Azure storage connection string.
#[derive(Debug, Clone, PartialEq)]
pub struct ConnectionString {
    pub account_name: String,
    account_key: Vec<u8>,
    pub blob_endpoint: String,
}

impl ConnectionString {
    pub fn parse(s: &str) -> Result<Self, BlobError> {
        let mut name = None;
        let mut key = None;
        let mut endpoint = None;
        let mut protocol = "https".to_string();
        let mut suffix = "core.windows.net".to_string();

        for part in s.split(';').map(str::trim).filter(|p| !p.is_empty()) {
            let Some((k, v)) = part.split_once('=') else {
                return Err(BlobError::InvalidConnectionString(format!(
                    "segment '{}' is not key=value",
                    part
                )));
            };
            match k {
                "AccountName" => name = Some(v.to_string()),
                "AccountKey" => key = Some(v.to_string()),
                "BlobEndpoint" => endpoint = Some(v.trim_end_matches('/').to_string()),
                "DefaultEndpointsProtocol" => protocol = v.to_string(),
                "EndpointSuffix" => suffix = v.to_string(),
                _ => {}
            }
        }

        let account_name = name
            .ok_or_else(|| BlobError::InvalidConnectionString("missing AccountName".into()))?;
        let key = key.ok_or_else(|| BlobError::InvalidConnectionString("missing AccountKey".into()))?;
        let account_key = STANDARD.decode(key.as_bytes()).map_err(|e| {
            BlobError::InvalidConnectionString(format!("AccountKey is not base64: {}", e))
        })?;
        let blob_endpoint = endpoint
            .unwrap_or_else(|| format!("{}://{}.blob.{}", protocol, account_name, suffix));

        Ok(Self {
            account_name,
            account_key,
            blob_endpoint,
        })
    }
}

/// Azure Blob Storage over REST.
#[derive(Clone)]
pub struct AzureBlobStore {
    http: reqwest::Client,
    conn: ConnectionString,
}

impl AzureBlobStore {
    pub fn new(connection_string: &str) -> Result<Self, BlobError> {
        Ok(Self {
            http: reqwest::Client::new(),
            conn: ConnectionString::parse(connection_string)?,
        })
    }

    fn blob_url(&self, container: &str, blob_name: &str) -> Result<reqwest::Url, BlobError> {
        let raw = format!("{}/{}/{}", self.conn.blob_endpoint, container, blob_name);
        reqwest::Url::parse(&raw)
            .map_err(|e| BlobError::InvalidConnectionString(format!("bad blob URL {}: {}", raw, e)))
    }

    /// Service SAS query parameters for one blob.
    fn sas_query(
        &self,
        container: &str,
        blob_name: &str,
        permissions: &str,
        expiry: DateTime<Utc>,
    ) -> Result<Vec<(&'static str, String)>, BlobError> {
        let expiry = expiry.format("%Y-%m-%dT%H:%M:%SZ").to_string();
        let resource = format!("/blob/{}/{}/{}", self.conn.account_name, container, blob_name);
        // Field order is fixed by the service; empty fields stay as blank lines.
        let string_to_sign = [
            permissions,
            "",
            expiry.as_str(),
            resource.as_str(),
            "",
            "",
            "https",
            SAS_VERSION,
            "b",
            "",
            "",
            "",
            "",
            "",
            "",
            "",
        ]
        .join("\n");

        let mut mac = Hmac::<Sha256>::new_from_slice(&self.conn.account_key)
            .map_err(|e| BlobError::InvalidConnectionString(format!("unusable AccountKey: {}", e)))?;
        mac.update(string_to_sign.as_bytes());
        let sig = STANDARD.encode(mac.finalize().into_bytes());

        Ok(vec![
            ("sp", permissions.to_string()),
            ("se", expiry),
            ("spr", "https".to_string()),
            ("sv", SAS_VERSION.to_string()),
            ("sr", "b".to_string()),
            ("sig", sig),
        ])
    }

    fn signed_url(
        &self,
        container: &str,
        blob_name: &str,
        permissions: &str,
        expiry: DateTime<Utc>,
    ) -> Result<reqwest::Url, BlobError> {
        let mut url = self.blob_url(container, blob_name)?;
        url.query_pairs_mut()
            .extend_pairs(self.sas_query(container, blob_name, permissions, expiry)?);
        Ok(url)
    }
}

#[async_trait]
impl BlobStore for AzureBlobStore {
    async fn upload(&self, container: &str, blob_name: &str, data: Vec<u8>) -> Result<String, BlobError> {
        if !is_contained(blob_name) {
            return Err(BlobError::InvalidBlobName(blob_name.to_string()));
        }
        let now = Utc::now();
        let put_url = self.signed_url(
            container,
            blob_name,
            "cw",
            now + Duration::minutes(WRITE_SAS_MINUTES),
        )?;
        let size = data.len();

        let resp = self
            .http
            .put(put_url)
            .header("x-ms-blob-type", "BlockBlob")
            .header("x-ms-version", SAS_VERSION)
            .header("Content-Type", content_type(blob_name))
            .body(data)
            .send()
            .await?;
        if !resp.status().is_success() {
            return Err(BlobError::Status {
                status: resp.status().as_u16(),
                blob: format!("{}/{}", container, blob_name),
            });
        }
        tracing::info!(container, blob = blob_name, bytes = size, "uploaded blob");

        let read_url = self.signed_url(container, blob_name, "r", now + Duration::days(READ_SAS_DAYS))?;
        Ok(read_url.to_string())
    }
}

/// Blobs as files under a root directory.
#[derive(Debug, Clone)]
pub struct LocalBlobStore {
    root: PathBuf,
}

impl LocalBlobStore {
    pub fn new(root: impl Into<PathBuf>) -> Self {
        Self { root: root.into() }
    }

    pub fn root(&self) -> &Path {
        &self.root
    }
}

/// True when `name` is a non-empty relative path of plain segments.
fn is_contained(name: &str) -> bool {
    let path = Path::new(name);
    path.components().next().is_some()
        && path.components().all(|c| matches!(c, Component::Normal(_)))
        && !name.contains('\\')
}

#[async_trait]
impl BlobStore for LocalBlobStore {
    async fn upload(&self, container: &str, blob_name: &str, data: Vec<u8>) -> Result<String, BlobError> {
        for name in [container, blob_name] {
            if !is_contained(name) {
                return Err(BlobError::InvalidBlobName(name.to_string()));
            }
        }
        let path = self.root.join(container).join(blob_name);
        let io = |source| BlobError::Io {
            path: path.clone(),
            source,
        };
        if let Some(parent) = path.parent() {
            tokio::fs::create_dir_all(parent).await.map_err(io)?;
        }
        tokio::fs::write(&path, &data).await.map_err(io)?;
        let abs = tokio::fs::canonicalize(&path).await.map_err(io)?;
        tracing::info!(path = %abs.display(), bytes = data.len(), "stored blob locally");
        Ok(format!("file://{}", abs.display()))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::TimeZone;

    const CONN: &str = "DefaultEndpointsProtocol=https;AccountName=orderdocs;\
                        AccountKey=c2VjcmV0LWtleS1mb3ItdGVzdHM=;EndpointSuffix=core.windows.net";

    #[test]
    fn test_parse_connection_string() {
        let conn = ConnectionString::parse(CONN).unwrap();
        assert_eq!(conn.account_name, "orderdocs");
        assert_eq!(conn.blob_endpoint, "https://orderdocs.blob.core.windows.net");
        assert_eq!(conn.account_key, b"secret-key-for-tests");
    }

    #[test]
    fn test_explicit_blob_endpoint_wins() {
        let conn = ConnectionString::parse(
            "AccountName=dev;AccountKey=a2V5;BlobEndpoint=http://127.0.0.1:10000/dev/",
        )
        .unwrap();
        assert_eq!(conn.blob_endpoint, "http://127.0.0.1:10000/dev");
    }

    #[test]
    fn test_bad_connection_strings() {
        for bad in ["AccountName=x", "AccountKey=a2V5", "AccountName=x;AccountKey=!!", "junk"] {
            assert!(
                matches!(ConnectionString::parse(bad), Err(BlobError::InvalidConnectionString(_))),
                "accepted {}",
                bad
            );
        }
    }

    #[test]
    fn test_read_sas_is_deterministic_and_read_only() {
        let store = AzureBlobStore::new(CONN).unwrap();
        let expiry = Utc.with_ymd_and_hms(2027, 1, 2, 3, 4, 5).unwrap();
        let a = store
            .signed_url("docs", "data/orders/T1/T1_Invoice.pdf", "r", expiry)
            .unwrap();
        let b = store
            .signed_url("docs", "data/orders/T1/T1_Invoice.pdf", "r", expiry)
            .unwrap();
        assert_eq!(a, b);
        assert_eq!(a.path(), "/docs/data/orders/T1/T1_Invoice.pdf");

        let pairs: Vec<(String, String)> = a.query_pairs().into_owned().collect();
        let get = |k: &str| pairs.iter().find(|(n, _)| n == k).map(|(_, v)| v.clone());
        assert_eq!(get("sp").as_deref(), Some("r"));
        assert_eq!(get("sr").as_deref(), Some("b"));
        assert_eq!(get("se").as_deref(), Some("2027-01-02T03:04:05Z"));
        let sig = STANDARD.decode(get("sig").unwrap()).unwrap();
        assert_eq!(sig.len(), 32);
    }

    #[test]
    fn test_signature_depends_on_permissions_and_blob() {
        let store = AzureBlobStore::new(CONN).unwrap();
        let expiry = Utc.with_ymd_and_hms(2027, 1, 1, 0, 0, 0).unwrap();
        let sig = |perm: &str, blob: &str| {
            store
                .sas_query("docs", blob, perm, expiry)
                .unwrap()
                .into_iter()
                .find(|(k, _)| *k == "sig")
                .unwrap()
                .1
        };
        assert_ne!(sig("r", "a.pdf"), sig("cw", "a.pdf"));
        assert_ne!(sig("r", "a.pdf"), sig("r", "b.pdf"));
    }

    #[test]
    fn test_content_type_from_extension() {
        assert_eq!(content_type("x/T1_Invoice.pdf"), "application/pdf");
        assert_eq!(content_type("scan.png"), "image/png");
        assert_eq!(content_type("noext"), "application/octet-stream");
    }

    #[tokio::test]
    async fn test_local_store_writes_file() {
        let dir = tempfile::tempdir().unwrap();
        let store = LocalBlobStore::new(dir.path());
        let url = store
            .upload("docs", "data/orders/T1/T1_Invoice.pdf", b"%PDF-1.4".to_vec())
            .await
            .unwrap();
        assert!(url.starts_with("file://"));
        assert!(url.ends_with("data/orders/T1/T1_Invoice.pdf"));
        let written = std::fs::read(dir.path().join("docs/data/orders/T1/T1_Invoice.pdf")).unwrap();
        assert_eq!(written, b"%PDF-1.4");
    }

    #[tokio::test]
    async fn test_local_store_refuses_paths_outside_root() {
        let dir = tempfile::tempdir().unwrap();
        let root = dir.path().join("blobs");
        let store = LocalBlobStore::new(&root);
        let escaping = crate::upload::blob_path("../../../escaped", "Invoice", "pdf");
        for name in [escaping.as_str(), "/etc/passwd", "a/../../b", "", "a\\..\\b"] {
            let err = store.upload("docs", name, b"x".to_vec()).await.unwrap_err();
            assert!(matches!(err, BlobError::InvalidBlobName(_)), "{name}");
        }
        let err = store.upload("..", "x.pdf", b"x".to_vec()).await.unwrap_err();
        assert!(matches!(err, BlobError::InvalidBlobName(_)));
        assert!(!dir.path().join("escaped_Invoice.pdf").exists());
        assert!(std::fs::read_dir(dir.path()).unwrap().next().is_none());
    }
}
