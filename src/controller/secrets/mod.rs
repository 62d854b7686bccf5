//! # Secrets
//!
//! Resolution of Secret and ConfigMap keys referenced by monitoring resources.
//!
//! Referenced bytes are never inlined into generated configuration. Each
//! reference is mirrored into a controller-owned Secret under a stable
//! [`SecretPathKey`] and the configuration points at the mounted file.

pub mod watch;

use crate::constants::SECRETS_MOUNT_DIR;
use crate::crd::{SecretKeySelector, SecretOrConfigMap};
use async_trait::async_trait;
use k8s_openapi::api::core::v1::{ConfigMap, Secret};
use k8s_openapi::ByteString;
use kube::{Api, Client};
use std::collections::{BTreeMap, BTreeSet};
use std::fmt;
use std::sync::Arc;
use thiserror::Error;
use tracing::debug;

pub use watch::{SecretHandle, SecretWatchProvider};

#[derive(Debug, Error)]
pub enum ResolveError {
    #[error("{kind} {namespace}/{name} not found")]
    ObjectNotFound {
        kind: SourceKind,
        namespace: String,
        name: String,
    },

    #[error("key '{key}' not found in {kind} {namespace}/{name}")]
    KeyNotFound {
        kind: SourceKind,
        namespace: String,
        name: String,
        key: String,
    },

    #[error("invalid reference: {0}")]
    InvalidReference(String),

    #[error("Kubernetes API error: {0}")]
    Kube(#[from] kube::Error),
}

/// Kind of object a reference points into
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash)]
pub enum SourceKind {
    Secret,
    ConfigMap,
}

impl SourceKind {
    #[must_use]
    pub fn as_str(&self) -> &'static str {
        match self {
            SourceKind::Secret => "secret",
            SourceKind::ConfigMap => "configmap",
        }
    }
}

impl fmt::Display for SourceKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// A single key of a Secret or ConfigMap in a given namespace
#[derive(Debug, Clone, PartialEq, Eq, PartialOrd, Ord, Hash)]
pub struct SecretSource {
    pub kind: SourceKind,
    pub namespace: String,
    pub name: String,
    pub key: String,
}

impl SecretSource {
    #[must_use]
    pub fn secret(namespace: &str, selector: &SecretKeySelector) -> Self {
        Self {
            kind: SourceKind::Secret,
            namespace: namespace.to_string(),
            name: selector.name.clone(),
            key: selector.key.clone(),
        }
    }

    /// Build a source from a selector that must name exactly one of secret or config map
    ///
    /// # Errors
    ///
    /// Returns [`ResolveError::InvalidReference`] when none or both are set.
    pub fn from_secret_or_config_map(
        namespace: &str,
        selector: &SecretOrConfigMap,
    ) -> Result<Self, ResolveError> {
        match (&selector.secret, &selector.config_map) {
            (Some(secret), None) => Ok(Self::secret(namespace, secret)),
            (None, Some(cm)) => Ok(Self {
                kind: SourceKind::ConfigMap,
                namespace: namespace.to_string(),
                name: cm.name.clone(),
                key: cm.key.clone(),
            }),
            (Some(_), Some(_)) => Err(ResolveError::InvalidReference(
                "only one of secret or configMap may be set".to_string(),
            )),
            (None, None) => Err(ResolveError::InvalidReference(
                "one of secret or configMap must be set".to_string(),
            )),
        }
    }

    #[must_use]
    pub fn path_key(&self) -> SecretPathKey {
        SecretPathKey::new(self)
    }

    /// Absolute path the referenced bytes are mounted at
    #[must_use]
    pub fn mount_path(&self) -> String {
        format!("{}/{}", SECRETS_MOUNT_DIR, self.path_key())
    }
}

impl fmt::Display for SecretSource {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{} {}/{}[{}]", self.kind, self.namespace, self.name, self.key)
    }
}

/// Stable file name for a referenced key: `{kind}_{namespace}_{name}_{key}`.
///
/// `.` and `_` inside the namespace and name are escaped as `..` and `._`, so
/// the separators stay unambiguous and two distinct references never map to
/// the same key. The result only uses characters valid in Secret data keys.
#[derive(Debug, Clone, PartialEq, Eq, PartialOrd, Ord, Hash)]
pub struct SecretPathKey(String);

impl SecretPathKey {
    #[must_use]
    pub fn new(source: &SecretSource) -> Self {
        Self(format!(
            "{}_{}_{}_{}",
            source.kind.as_str(),
            escape_segment(&source.namespace),
            escape_segment(&source.name),
            source.key
        ))
    }

    #[must_use]
    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl fmt::Display for SecretPathKey {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

fn escape_segment(segment: &str) -> String {
    let mut out = String::with_capacity(segment.len());
    for c in segment.chars() {
        match c {
            '.' => out.push_str(".."),
            '_' => out.push_str("._"),
            c if c.is_ascii_alphanumeric() || c == '-' => out.push(c),
            c => {
                let mut buf = [0u8; 4];
                for byte in c.encode_utf8(&mut buf).bytes() {
                    out.push_str(&format!(".x{byte:02x}"));
                }
            }
        }
    }
    out
}

/// Read access to Secret and ConfigMap payloads
#[async_trait]
pub trait ObjectReader: Send + Sync {
    /// Data of a Secret, `None` if it does not exist
    async fn secret_data(
        &self,
        namespace: &str,
        name: &str,
    ) -> Result<Option<BTreeMap<String, Vec<u8>>>, ResolveError>;

    /// Data of a ConfigMap, `None` if it does not exist
    async fn config_map_data(
        &self,
        namespace: &str,
        name: &str,
    ) -> Result<Option<BTreeMap<String, Vec<u8>>>, ResolveError>;
}

/// [`ObjectReader`] backed by the Kubernetes API
#[derive(Clone)]
pub struct KubeObjectReader {
    client: Client,
}

impl fmt::Debug for KubeObjectReader {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("KubeObjectReader").finish_non_exhaustive()
    }
}

impl KubeObjectReader {
    #[must_use]
    pub fn new(client: Client) -> Self {
        Self { client }
    }
}

#[async_trait]
impl ObjectReader for KubeObjectReader {
    async fn secret_data(
        &self,
        namespace: &str,
        name: &str,
    ) -> Result<Option<BTreeMap<String, Vec<u8>>>, ResolveError> {
        let api: Api<Secret> = Api::namespaced(self.client.clone(), namespace);
        Ok(api.get_opt(name).await?.map(|s| secret_payload(&s)))
    }

    async fn config_map_data(
        &self,
        namespace: &str,
        name: &str,
    ) -> Result<Option<BTreeMap<String, Vec<u8>>>, ResolveError> {
        let api: Api<ConfigMap> = Api::namespaced(self.client.clone(), namespace);
        Ok(api.get_opt(name).await?.map(|cm| {
            let mut data: BTreeMap<String, Vec<u8>> = cm
                .data
                .unwrap_or_default()
                .into_iter()
                .map(|(k, v)| (k, v.into_bytes()))
                .collect();
            for (k, v) in cm.binary_data.unwrap_or_default() {
                data.insert(k, v.0);
            }
            data
        }))
    }
}

/// Decoded payload of a Secret, `stringData` taking precedence like the API server does
#[must_use]
pub fn secret_payload(secret: &Secret) -> BTreeMap<String, Vec<u8>> {
    let mut data: BTreeMap<String, Vec<u8>> = secret
        .data
        .clone()
        .unwrap_or_default()
        .into_iter()
        .map(|(k, v)| (k, v.0))
        .collect();
    if let Some(string_data) = &secret.string_data {
        for (k, v) in string_data {
            data.insert(k.clone(), v.clone().into_bytes());
        }
    }
    data
}

/// Resolves references for one reconcile pass and collects the bytes to mirror.
///
/// Secret reads prefer the live value of a shared watch and fall back to a
/// direct read while the watch has not synced yet.
pub struct SecretResolver {
    reader: Arc<dyn ObjectReader>,
    watches: Option<Arc<SecretWatchProvider>>,
    collected: BTreeMap<SecretPathKey, Vec<u8>>,
    referenced: BTreeSet<SecretSource>,
}

impl fmt::Debug for SecretResolver {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("SecretResolver")
            .field("referenced", &self.referenced)
            .finish_non_exhaustive()
    }
}

impl SecretResolver {
    #[must_use]
    pub fn new(reader: Arc<dyn ObjectReader>, watches: Option<Arc<SecretWatchProvider>>) -> Self {
        Self {
            reader,
            watches,
            collected: BTreeMap::new(),
            referenced: BTreeSet::new(),
        }
    }

    /// Resolve one reference, remember its bytes and return its mount path
    ///
    /// # Errors
    ///
    /// Fails when the object or the key does not exist or the read fails.
    pub async fn resolve(&mut self, source: &SecretSource) -> Result<String, ResolveError> {
        let bytes = self.read(source).await?;
        self.collected.insert(source.path_key(), bytes);
        self.referenced.insert(source.clone());
        Ok(source.mount_path())
    }

    /// Resolve a group of references atomically: either all are collected or none
    ///
    /// # Errors
    ///
    /// Returns the first failure, leaving previously collected bytes untouched.
    pub async fn resolve_all(&mut self, sources: &[SecretSource]) -> Result<(), ResolveError> {
        let mut staged = Vec::with_capacity(sources.len());
        for source in sources {
            staged.push((source.clone(), self.read(source).await?));
        }
        for (source, bytes) in staged {
            self.collected.insert(source.path_key(), bytes);
            self.referenced.insert(source);
        }
        Ok(())
    }

    async fn read(&self, source: &SecretSource) -> Result<Vec<u8>, ResolveError> {
        if source.kind == SourceKind::Secret {
            if let Some(watches) = &self.watches {
                if let Some(bytes) = watches.cached_value(source) {
                    debug!("Resolved {} from secret watch", source);
                    return Ok(bytes);
                }
            }
        }

        let data = match source.kind {
            SourceKind::Secret => self.reader.secret_data(&source.namespace, &source.name).await?,
            SourceKind::ConfigMap => {
                self.reader
                    .config_map_data(&source.namespace, &source.name)
                    .await?
            }
        };
        let data = data.ok_or_else(|| ResolveError::ObjectNotFound {
            kind: source.kind,
            namespace: source.namespace.clone(),
            name: source.name.clone(),
        })?;
        data.get(&source.key)
            .cloned()
            .ok_or_else(|| ResolveError::KeyNotFound {
                kind: source.kind,
                namespace: source.namespace.clone(),
                name: source.name.clone(),
                key: source.key.clone(),
            })
    }

    /// Secret references resolved so far
    #[must_use]
    pub fn referenced(&self) -> &BTreeSet<SecretSource> {
        &self.referenced
    }

    /// Payload of the mirrored Secret: only the bytes actually referenced
    #[must_use]
    pub fn into_secret_data(self) -> BTreeMap<String, ByteString> {
        self.collected
            .into_iter()
            .map(|(k, v)| (k.0, ByteString(v)))
            .collect()
    }
}

#[cfg(test)]
pub(crate) mod testing {
    use super::*;
    use std::sync::Mutex;

    /// In-memory [`ObjectReader`] keyed by (namespace, name)
    #[derive(Default)]
    pub(crate) struct MemoryReader {
        pub secrets: Mutex<BTreeMap<(String, String), BTreeMap<String, Vec<u8>>>>,
        pub config_maps: Mutex<BTreeMap<(String, String), BTreeMap<String, Vec<u8>>>>,
    }

    impl MemoryReader {
        pub(crate) fn with_secret(self, ns: &str, name: &str, key: &str, value: &str) -> Self {
            self.secrets
                .lock()
                .unwrap()
                .entry((ns.to_string(), name.to_string()))
                .or_default()
                .insert(key.to_string(), value.as_bytes().to_vec());
            self
        }

        pub(crate) fn with_config_map(self, ns: &str, name: &str, key: &str, value: &str) -> Self {
            self.config_maps
                .lock()
                .unwrap()
                .entry((ns.to_string(), name.to_string()))
                .or_default()
                .insert(key.to_string(), value.as_bytes().to_vec());
            self
        }
    }

    #[async_trait]
    impl ObjectReader for MemoryReader {
        async fn secret_data(
            &self,
            namespace: &str,
            name: &str,
        ) -> Result<Option<BTreeMap<String, Vec<u8>>>, ResolveError> {
            Ok(self
                .secrets
                .lock()
                .unwrap()
                .get(&(namespace.to_string(), name.to_string()))
                .cloned())
        }

        async fn config_map_data(
            &self,
            namespace: &str,
            name: &str,
        ) -> Result<Option<BTreeMap<String, Vec<u8>>>, ResolveError> {
            Ok(self
                .config_maps
                .lock()
                .unwrap()
                .get(&(namespace.to_string(), name.to_string()))
                .cloned())
        }
    }
}

#[cfg(test)]
mod tests {
    use super::testing::MemoryReader;
    use super::*;

    fn source(ns: &str, name: &str, key: &str) -> SecretSource {
        SecretSource {
            kind: SourceKind::Secret,
            namespace: ns.to_string(),
            name: name.to_string(),
            key: key.to_string(),
        }
    }

    #[test]
    fn test_path_key_format() {
        assert_eq!(
            source("monitoring", "am-tls", "ca.crt").path_key().as_str(),
            "secret_monitoring_am-tls_ca.crt"
        );
        assert_eq!(
            source("ns", "a.b", "k").mount_path(),
            "/etc/secrets/secret_ns_a..b_k"
        );
    }

    #[test]
    fn test_path_key_is_collision_free() {
        let segments = ["a", "b", "a_b", "a.b", "a..b", "a._b", "_", ".", "a-b", "ä"];
        let mut seen = std::collections::HashMap::new();
        for ns in segments {
            for name in segments {
                for key in ["k", "k_1", "k.1", "_k"] {
                    for kind in [SourceKind::Secret, SourceKind::ConfigMap] {
                        let src = SecretSource {
                            kind,
                            namespace: ns.to_string(),
                            name: name.to_string(),
                            key: key.to_string(),
                        };
                        let path = src.path_key();
                        assert_eq!(path, src.path_key());
                        if let Some(previous) = seen.insert(path.clone(), src.clone()) {
                            panic!("{previous} and {src} both map to {path}");
                        }
                    }
                }
            }
        }
    }

    #[test]
    fn test_secret_or_config_map_requires_exactly_one() {
        let both = SecretOrConfigMap {
            secret: Some(SecretKeySelector::default()),
            config_map: Some(crate::crd::ConfigMapKeySelector::default()),
        };
        assert!(SecretSource::from_secret_or_config_map("ns", &both).is_err());
        assert!(SecretSource::from_secret_or_config_map("ns", &SecretOrConfigMap::default()).is_err());
    }

    #[tokio::test]
    async fn test_resolver_collects_only_referenced_keys() {
        let reader = MemoryReader::default()
            .with_secret("ns", "creds", "token", "s3cr3t")
            .with_secret("ns", "creds", "unused", "nope")
            .with_config_map("ns", "ca", "ca.crt", "PEM");
        let mut resolver = SecretResolver::new(Arc::new(reader), None);

        let path = resolver.resolve(&source("ns", "creds", "token")).await.unwrap();
        assert_eq!(path, "/etc/secrets/secret_ns_creds_token");
        let cm = SecretSource {
            kind: SourceKind::ConfigMap,
            namespace: "ns".to_string(),
            name: "ca".to_string(),
            key: "ca.crt".to_string(),
        };
        resolver.resolve(&cm).await.unwrap();

        let data = resolver.into_secret_data();
        assert_eq!(data.len(), 2);
        assert_eq!(data["secret_ns_creds_token"].0, b"s3cr3t".to_vec());
        assert_eq!(data["configmap_ns_ca_ca.crt"].0, b"PEM".to_vec());
    }

    #[tokio::test]
    async fn test_resolve_all_is_all_or_nothing() {
        let reader = MemoryReader::default().with_secret("ns", "creds", "token", "x");
        let mut resolver = SecretResolver::new(Arc::new(reader), None);
        let result = resolver
            .resolve_all(&[source("ns", "creds", "token"), source("ns", "creds", "missing")])
            .await;
        assert!(matches!(result, Err(ResolveError::KeyNotFound { .. })));
        assert!(resolver.referenced().is_empty());
        assert!(resolver.into_secret_data().is_empty());
    }

    #[tokio::test]
    async fn test_missing_object_reported() {
        let mut resolver = SecretResolver::new(Arc::new(MemoryReader::default()), None);
        let err = resolver.resolve(&source("ns", "gone", "k")).await.unwrap_err();
        assert!(matches!(err, ResolveError::ObjectNotFound { .. }));
    }
}
