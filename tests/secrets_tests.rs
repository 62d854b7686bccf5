//! # Secret Resolution Integration Tests
//!
//! Exercises [`SecretResolver`] against an in-memory object store and checks
//! that mirrored path keys never collide.

use async_trait::async_trait;
use monitoring_operator::controller::secrets::{
    ObjectReader, ResolveError, SecretResolver, SecretSource, SourceKind,
};
use std::collections::{BTreeMap, HashSet};
use std::sync::Arc;

#[derive(Default)]
struct StaticReader {
    secrets: BTreeMap<(String, String), BTreeMap<String, Vec<u8>>>,
    config_maps: BTreeMap<(String, String), BTreeMap<String, Vec<u8>>>,
}

impl StaticReader {
    fn with_secret(mut self, namespace: &str, name: &str, data: &[(&str, &str)]) -> Self {
        self.secrets.insert(
            (namespace.to_string(), name.to_string()),
            data.iter()
                .map(|(k, v)| (k.to_string(), v.as_bytes().to_vec()))
                .collect(),
        );
        self
    }

    fn with_config_map(mut self, namespace: &str, name: &str, data: &[(&str, &str)]) -> Self {
        self.config_maps.insert(
            (namespace.to_string(), name.to_string()),
            data.iter()
                .map(|(k, v)| (k.to_string(), v.as_bytes().to_vec()))
                .collect(),
        );
        self
    }
}

#[async_trait]
impl ObjectReader for StaticReader {
    async fn secret_data(
        &self,
        namespace: &str,
        name: &str,
    ) -> Result<Option<BTreeMap<String, Vec<u8>>>, ResolveError> {
        Ok(self
            .secrets
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
            .get(&(namespace.to_string(), name.to_string()))
            .cloned())
    }
}

fn source(kind: SourceKind, namespace: &str, name: &str, key: &str) -> SecretSource {
    SecretSource {
        kind,
        namespace: namespace.to_string(),
        name: name.to_string(),
        key: key.to_string(),
    }
}

#[tokio::test]
async fn test_only_referenced_keys_are_mirrored() {
    let reader = StaticReader::default()
        .with_secret("public", "creds", &[("token", "s3cr3t"), ("unused", "x")])
        .with_config_map("public", "ca", &[("ca.crt", "PEM")]);
    let mut resolver = SecretResolver::new(Arc::new(reader), None);

    let token = source(SourceKind::Secret, "public", "creds", "token");
    let ca = source(SourceKind::ConfigMap, "public", "ca", "ca.crt");
    let token_path = resolver.resolve(&token).await.unwrap();
    resolver.resolve(&ca).await.unwrap();

    assert!(token_path.ends_with(token.path_key().as_str()));
    assert_eq!(resolver.referenced().len(), 2);

    let data = resolver.into_secret_data();
    assert_eq!(data.len(), 2);
    assert_eq!(data[token.path_key().as_str()].0, b"s3cr3t");
    assert_eq!(data[ca.path_key().as_str()].0, b"PEM");
}

#[tokio::test]
async fn test_missing_object_and_key_are_distinguished() {
    let reader = StaticReader::default().with_secret("public", "creds", &[("token", "t")]);
    let mut resolver = SecretResolver::new(Arc::new(reader), None);

    let missing_object = source(SourceKind::Secret, "public", "nope", "token");
    assert!(matches!(
        resolver.resolve(&missing_object).await,
        Err(ResolveError::ObjectNotFound { .. })
    ));

    let missing_key = source(SourceKind::Secret, "public", "creds", "password");
    assert!(matches!(
        resolver.resolve(&missing_key).await,
        Err(ResolveError::KeyNotFound { .. })
    ));
}

#[tokio::test]
async fn test_group_resolution_is_all_or_nothing() {
    let reader = StaticReader::default().with_secret(
        "public",
        "am",
        &[("username", "admin"), ("password", "pw")],
    );
    let mut resolver = SecretResolver::new(Arc::new(reader), None);

    let group = vec![
        source(SourceKind::Secret, "public", "am", "username"),
        source(SourceKind::Secret, "public", "am", "missing"),
    ];
    assert!(resolver.resolve_all(&group).await.is_err());
    assert!(resolver.referenced().is_empty());

    let group = vec![
        source(SourceKind::Secret, "public", "am", "username"),
        source(SourceKind::Secret, "public", "am", "password"),
    ];
    resolver.resolve_all(&group).await.unwrap();
    assert_eq!(resolver.into_secret_data().len(), 2);
}

#[test]
fn test_path_keys_never_collide() {
    let segments = ["a", "a_b", "a.b", "a__b", "a..b", "a._b", "a-b", "_", ".", "b"];
    let mut seen = HashSet::new();
    let mut count = 0;
    for kind in [SourceKind::Secret, SourceKind::ConfigMap] {
        for namespace in segments {
            for name in segments {
                for key in ["k", "k_1", "k.crt"] {
                    let path_key = source(kind, namespace, name, key).path_key();
                    assert!(
                        seen.insert(path_key.clone()),
                        "collision on {path_key} for {namespace}/{name}/{key}"
                    );
                    count += 1;
                }
            }
        }
    }
    assert_eq!(seen.len(), count);
}

#[test]
fn test_path_keys_are_valid_data_keys() {
    let valid = regex::Regex::new(r"^[-._a-zA-Z0-9]+$").unwrap();
    for (namespace, name) in [("ns", "plain"), ("ns_1", "a.b"), ("ns", "ünïcode")] {
        let path_key = source(SourceKind::Secret, namespace, name, "key").path_key();
        assert!(valid.is_match(path_key.as_str()), "invalid key {path_key}");
    }
}
