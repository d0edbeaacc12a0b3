//! CA credential resolution
//!
//! The CA certificate and key live as one JSON object (`caCertPem`,
//! `caKeyPem`) in an external object store. The object is addressed by a
//! tagged locator `<scheme>:::<container>/<objectKey>` and is fetched fresh for
//! every issuance; nothing here caches it.

use std::fmt;
use std::path::{Component, Path, PathBuf};
use std::str::FromStr;
use std::sync::Arc;

use async_trait::async_trait;
use openssl::pkey::{PKey, Private};
use openssl::x509::X509;
use reqwest::{Client, StatusCode};
use tracing::{debug, info};

use crate::config::{EndpointConfig, ObjectStoreConfig, ObjectStoreKind};
use crate::models::CaCredentialDocument;
use crate::services::http;
use crate::utils::error::{LifecycleError, LifecycleResult};

/// CA certificate and private key, parsed
pub struct CaCredential {
    certificate: X509,
    private_key: PKey<Private>,
}

impl CaCredential {
    pub fn new(certificate: X509, private_key: PKey<Private>) -> Self {
        Self {
            certificate,
            private_key,
        }
    }

    /// Parse the stored JSON document
    pub fn from_document(document: &CaCredentialDocument) -> LifecycleResult<Self> {
        let certificate = X509::from_pem(document.ca_cert_pem.as_bytes()).map_err(|e| {
            LifecycleError::CredentialCorrupt(format!("caCertPem does not parse: {}", e))
        })?;
        let private_key = PKey::private_key_from_pem(document.ca_key_pem.as_bytes())
            .map_err(|e| {
                LifecycleError::CredentialCorrupt(format!("caKeyPem does not parse: {}", e))
            })?;

        let certificate_key = certificate.public_key().map_err(|e| {
            LifecycleError::CredentialCorrupt(format!("CA certificate has no public key: {}", e))
        })?;
        if !certificate_key.public_eq(&private_key) {
            return Err(LifecycleError::CredentialCorrupt(
                "caKeyPem does not match caCertPem".to_string(),
            ));
        }

        Ok(Self::new(certificate, private_key))
    }

    pub fn certificate(&self) -> &X509 {
        &self.certificate
    }

    pub fn private_key(&self) -> &PKey<Private> {
        &self.private_key
    }
}

impl fmt::Debug for CaCredential {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("CaCredential")
            .field(
                "subject",
                &crate::services::csr::format_name(self.certificate.subject_name()),
            )
            .field("private_key", &"<redacted>")
            .finish()
    }
}

/// Parsed `<scheme>:::<container>/<objectKey>` locator
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct CredentialReference {
    pub scheme: String,
    pub container: String,
    pub key: String,
}

impl FromStr for CredentialReference {
    type Err = LifecycleError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        let malformed = || {
            LifecycleError::Configuration(format!(
                "CA credential reference must look like <scheme>:::<container>/<key>, got {:?}",
                s
            ))
        };

        let (scheme, path) = s.trim().split_once(":::").ok_or_else(malformed)?;
        let (container, key) = path.split_once('/').ok_or_else(malformed)?;
        if container.is_empty() || key.is_empty() {
            return Err(malformed());
        }

        Ok(Self {
            scheme: scheme.to_string(),
            container: container.to_string(),
            key: key.to_string(),
        })
    }
}

impl fmt::Display for CredentialReference {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}:::{}/{}", self.scheme, self.container, self.key)
    }
}

/// Read-only access to a blob store
#[async_trait]
pub trait ObjectStore: Send + Sync {
    /// Fetch an object body; `Ok(None)` when the object does not exist
    async fn get_object(&self, container: &str, key: &str) -> LifecycleResult<Option<Vec<u8>>>;
}

/// Resolves a reference to a usable CA credential
#[async_trait]
pub trait CredentialProvider: Send + Sync {
    async fn fetch(&self, reference: &CredentialReference) -> LifecycleResult<CaCredential>;
}

/// Resolve the configured reference and fetch the credential
///
/// Fails with [`LifecycleError::Configuration`] before any I/O when no
/// reference is configured or it is malformed.
pub async fn fetch_ca_credential(
    provider: &dyn CredentialProvider,
    reference: Option<&str>,
) -> LifecycleResult<CaCredential> {
    let reference: CredentialReference = reference
        .filter(|r| !r.trim().is_empty())
        .ok_or_else(|| {
            LifecycleError::Configuration("No CA credential reference configured".to_string())
        })?
        .parse()?;

    provider.fetch(&reference).await
}

/// Credential provider backed by an [`ObjectStore`]
#[derive(Clone)]
pub struct StoreCredentialProvider {
    store: Arc<dyn ObjectStore>,
}

impl StoreCredentialProvider {
    pub fn new(store: Arc<dyn ObjectStore>) -> Self {
        Self { store }
    }
}

#[async_trait]
impl CredentialProvider for StoreCredentialProvider {
    async fn fetch(&self, reference: &CredentialReference) -> LifecycleResult<CaCredential> {
        debug!(container = %reference.container, key = %reference.key, "Fetching CA credential");

        let body = self
            .store
            .get_object(&reference.container, &reference.key)
            .await?
            .ok_or_else(|| {
                LifecycleError::CredentialNotFound(format!(
                    "{}/{}",
                    reference.container, reference.key
                ))
            })?;

        let document: CaCredentialDocument = serde_json::from_slice(&body).map_err(|e| {
            LifecycleError::CredentialCorrupt(format!("credential body is not valid JSON: {}", e))
        })?;

        CaCredential::from_document(&document)
    }
}

/// Object store reached over HTTP: `GET {url}/{container}/{key}`
#[derive(Clone)]
pub struct HttpObjectStore {
    client: Client,
    base_url: String,
    api_token: Option<String>,
}

impl HttpObjectStore {
    pub fn new(config: &EndpointConfig) -> LifecycleResult<Self> {
        Ok(Self {
            client: http::build_client(config)?,
            base_url: http::base_url(config),
            api_token: config.api_token.clone(),
        })
    }

    fn object_url(&self, container: &str, key: &str) -> String {
        let key = key
            .split('/')
            .map(|segment| urlencoding::encode(segment).into_owned())
            .collect::<Vec<_>>()
            .join("/");
        format!(
            "{}/{}/{}",
            self.base_url,
            urlencoding::encode(container),
            key
        )
    }
}

#[async_trait]
impl ObjectStore for HttpObjectStore {
    async fn get_object(&self, container: &str, key: &str) -> LifecycleResult<Option<Vec<u8>>> {
        let url = self.object_url(container, key);

        let response = http::with_auth(self.client.get(&url), self.api_token.as_deref())
            .send()
            .await
            .map_err(|e| LifecycleError::CredentialStore(format!("Object store error: {}", e)))?;

        match response.status() {
            StatusCode::OK => {
                let body = response.bytes().await.map_err(|e| {
                    LifecycleError::CredentialStore(format!("Failed to read object body: {}", e))
                })?;
                Ok(Some(body.to_vec()))
            }
            StatusCode::NOT_FOUND => Ok(None),
            status => Err(LifecycleError::CredentialStore(format!(
                "Object store returned status: {}",
                status
            ))),
        }
    }
}

/// Object store on the local filesystem: `{root}/{container}/{key}`
#[derive(Debug, Clone)]
pub struct FileObjectStore {
    root: PathBuf,
}

impl FileObjectStore {
    pub fn new(root: impl Into<PathBuf>) -> Self {
        Self { root: root.into() }
    }

    fn object_path(&self, container: &str, key: &str) -> LifecycleResult<PathBuf> {
        let relative = Path::new(container).join(key);
        if relative
            .components()
            .any(|c| !matches!(c, Component::Normal(_)))
        {
            return Err(LifecycleError::Configuration(format!(
                "Object path escapes the store root: {:?}",
                relative
            )));
        }
        Ok(self.root.join(relative))
    }
}

#[async_trait]
impl ObjectStore for FileObjectStore {
    async fn get_object(&self, container: &str, key: &str) -> LifecycleResult<Option<Vec<u8>>> {
        let path = self.object_path(container, key)?;
        match tokio::fs::read(&path).await {
            Ok(body) => Ok(Some(body)),
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => Ok(None),
            Err(e) => Err(LifecycleError::CredentialStore(format!(
                "Failed to read {:?}: {}",
                path, e
            ))),
        }
    }
}

/// Build the object store selected in configuration
pub fn object_store_from_config(config: &ObjectStoreConfig) -> LifecycleResult<Arc<dyn ObjectStore>> {
    match config.kind {
        ObjectStoreKind::Http => {
            info!("Using HTTP object store: {}", config.endpoint.url);
            Ok(Arc::new(HttpObjectStore::new(&config.endpoint)?))
        }
        ObjectStoreKind::File => {
            let root = config.root.clone().ok_or_else(|| {
                LifecycleError::Configuration("object_store.root is required for kind=file".into())
            })?;
            info!("Using filesystem object store: {:?}", root);
            Ok(Arc::new(FileObjectStore::new(root)))
        }
    }
}
