use std::collections::BTreeMap;

use k8s_openapi::api::core::v1::{ConfigMap, Secret};
use k8s_openapi::apimachinery::pkg::apis::meta::v1::{ObjectMeta, OwnerReference};
use k8s_openapi::ByteString;
use sha2::{Digest, Sha256};
use tracing::{debug, info};

use super::{TLS_CA_CERT_NAME, TLS_SECRET_CERT_NAME, TLS_SECRET_KEY_NAME};
use crate::store::{ObjectStore, StoreError};
use crate::util::errors::{Result, StdError};

/// Key under which the concatenated certificate and key are stored.
///
/// Derived from the digests of both halves so that moving bytes between the
/// certificate and the key still changes the name.
pub fn operator_secret_file_name(cert: &[u8], key: &[u8]) -> String {
    let mut hasher = Sha256::new();
    hasher.update(Sha256::digest(cert));
    hasher.update(Sha256::digest(key));
    format!("{}.pem", hex::encode(hasher.finalize()))
}

fn missing(what: String) -> StdError {
    StdError::SourceMaterialMissing(what)
}

fn secret_field(secret: &Secret, field: &str) -> Option<Vec<u8>> {
    secret
        .data
        .as_ref()
        .and_then(|data| data.get(field))
        .map(|v| v.0.clone())
        .or_else(|| {
            secret
                .string_data
                .as_ref()
                .and_then(|data| data.get(field))
                .map(|v| v.clone().into_bytes())
        })
}

/// Reads `tls.crt` and `tls.key` from the user supplied secret.
pub async fn read_certificate_key<S: ObjectStore>(
    store: &S,
    namespace: &str,
    secret_name: &str,
) -> Result<(Vec<u8>, Vec<u8>)> {
    if secret_name.is_empty() {
        return Err(missing("no certificate key secret configured".to_string()).into());
    }

    let secret: Secret = store
        .get(namespace, secret_name)
        .await
        .map_err(StdError::StoreReadFailed)?
        .ok_or_else(|| missing(format!("secret {namespace}/{secret_name} not found")))?;

    let cert = secret_field(&secret, TLS_SECRET_CERT_NAME)
        .ok_or_else(|| missing(format!("{TLS_SECRET_CERT_NAME} not found in secret {secret_name}")))?;
    let key = secret_field(&secret, TLS_SECRET_KEY_NAME)
        .ok_or_else(|| missing(format!("{TLS_SECRET_KEY_NAME} not found in secret {secret_name}")))?;

    Ok((cert, key))
}

/// Checks that the CA configmap exists and carries `ca.crt`.
pub async fn read_ca_certificate<S: ObjectStore>(
    store: &S,
    namespace: &str,
    config_map_name: &str,
) -> Result<String> {
    if config_map_name.is_empty() {
        return Err(missing("no CA configmap configured".to_string()).into());
    }

    let config_map: ConfigMap = store
        .get(namespace, config_map_name)
        .await
        .map_err(StdError::StoreReadFailed)?
        .ok_or_else(|| missing(format!("configmap {namespace}/{config_map_name} not found")))?;

    config_map
        .data
        .as_ref()
        .and_then(|data| data.get(TLS_CA_CERT_NAME))
        .cloned()
        .ok_or_else(|| missing(format!("{TLS_CA_CERT_NAME} not found in configmap {config_map_name}")).into())
}

/// Upserts the operator-owned secret holding `cert ++ key` and returns the key it is stored under.
///
/// The write always happens and never carries a `resourceVersion`, so a
/// concurrent synthesis for the same cluster cannot make it fail.
pub async fn synthesize<S: ObjectStore>(
    store: &S,
    namespace: &str,
    secret_name: &str,
    owner: Option<&OwnerReference>,
    cert: &[u8],
    key: &[u8],
) -> Result<String> {
    let file_name = operator_secret_file_name(cert, key);

    let mut pem = Vec::with_capacity(cert.len() + key.len());
    pem.extend_from_slice(cert);
    pem.extend_from_slice(key);
    let data = BTreeMap::from([(file_name.clone(), ByteString(pem))]);

    let existing: Option<Secret> = store
        .get(namespace, secret_name)
        .await
        .map_err(StdError::StoreReadFailed)?;

    match existing {
        None => {
            let secret = Secret {
                metadata: ObjectMeta {
                    name: Some(secret_name.to_string()),
                    namespace: Some(namespace.to_string()),
                    owner_references: owner.map(|o| vec![o.clone()]),
                    labels: Some(BTreeMap::from([
                        ("app.kubernetes.io/name".to_string(), "mongodb-operator".to_string()),
                        ("app.kubernetes.io/component".to_string(), "tls-material".to_string()),
                    ])),
                    ..Default::default()
                },
                type_: Some("Opaque".to_string()),
                data: Some(data),
                ..Default::default()
            };
            match store.create(&secret).await {
                Ok(_) => info!("Created TLS operator secret '{}/{}'", namespace, secret_name),
                // another writer created it after our read
                Err(StoreError::AlreadyExists { .. }) => {
                    store.update(&secret).await.map_err(StdError::StoreWriteFailed)?;
                    debug!("Replaced concurrently created TLS operator secret '{}/{}'", namespace, secret_name);
                }
                Err(e) => return Err(StdError::StoreWriteFailed(e).into()),
            }
        }
        Some(mut secret) => {
            secret.data = Some(data);
            secret.string_data = None;
            // unconditional replace: last writer wins
            secret.metadata.resource_version = None;
            store.update(&secret).await.map_err(StdError::StoreWriteFailed)?;
            debug!("Updated TLS operator secret '{}/{}'", namespace, secret_name);
        }
    }

    Ok(file_name)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::store::memory::InMemoryStore;
    use crate::store::StoreObject;
    use async_trait::async_trait;

    /// Serves a fixed snapshot on `get`, as if another writer changed the
    /// object between our read and our write.
    struct RacingStore {
        inner: InMemoryStore,
        snapshot: Option<serde_json::Value>,
    }

    #[async_trait]
    impl ObjectStore for RacingStore {
        async fn get<K: StoreObject>(&self, _namespace: &str, _name: &str) -> Result<Option<K>, StoreError> {
            Ok(self
                .snapshot
                .clone()
                .map(|v| serde_json::from_value(v).unwrap()))
        }

        async fn create<K: StoreObject>(&self, obj: &K) -> Result<K, StoreError> {
            self.inner.create(obj).await
        }

        async fn update<K: StoreObject>(&self, obj: &K) -> Result<K, StoreError> {
            self.inner.update(obj).await
        }
    }

    async fn stored_value(store: &InMemoryStore, file_name: &str) -> Vec<u8> {
        let secret: Secret = store.get("ns", "op").await.unwrap().unwrap();
        secret.data.unwrap().get(file_name).unwrap().0.clone()
    }

    #[test]
    fn file_name_is_content_addressed() {
        assert_eq!(
            operator_secret_file_name(b"CERT", b"KEY"),
            operator_secret_file_name(b"CERT", b"KEY")
        );
        assert_ne!(
            operator_secret_file_name(b"CERT", b"KEY"),
            operator_secret_file_name(b"CERT", b"KEY2")
        );
        // same concatenation, different split
        assert_ne!(
            operator_secret_file_name(b"CERT", b"KEY"),
            operator_secret_file_name(b"CER", b"TKEY")
        );

        let name = operator_secret_file_name(b"CERT", b"KEY");
        assert!(name.ends_with(".pem"));
        assert_eq!(name.len(), 64 + ".pem".len());
    }

    #[tokio::test]
    async fn creates_secret_with_raw_concatenation() {
        let store = InMemoryStore::new();

        let file_name = synthesize(&store, "ns", "op", None, b"CERT", b"KEY").await.unwrap();

        assert_eq!(file_name, operator_secret_file_name(b"CERT", b"KEY"));
        assert_eq!(stored_value(&store, &file_name).await, b"CERTKEY".to_vec());
        assert_eq!(store.writes(), 1);
    }

    #[tokio::test]
    async fn overwrites_stale_secret() {
        let store = InMemoryStore::new();
        synthesize(&store, "ns", "op", None, b"", b"").await.unwrap();

        let file_name = synthesize(&store, "ns", "op", None, b"CERT", b"KEY").await.unwrap();

        let secret: Secret = store.get("ns", "op").await.unwrap().unwrap();
        let data = secret.data.unwrap();
        assert_eq!(data.len(), 1);
        assert_eq!(data.get(&file_name).unwrap().0, b"CERTKEY".to_vec());
    }

    #[tokio::test]
    async fn repeated_synthesis_converges() {
        let store = InMemoryStore::new();

        let first = synthesize(&store, "ns", "op", None, b"CERT", b"KEY").await.unwrap();
        let second = synthesize(&store, "ns", "op", None, b"CERT", b"KEY").await.unwrap();

        assert_eq!(first, second);
        assert_eq!(stored_value(&store, &second).await, b"CERTKEY".to_vec());
    }

    #[tokio::test]
    async fn write_failures_surface_as_store_write_failed() {
        let store = InMemoryStore::new();
        store.fail_writes();

        let err = synthesize(&store, "ns", "op", None, b"CERT", b"KEY").await.unwrap_err();
        assert!(matches!(err.std_error(), StdError::StoreWriteFailed(_)));
    }

    #[tokio::test]
    async fn missing_source_secret_is_reported() {
        let store = InMemoryStore::new();

        let err = read_certificate_key(&store, "ns", "user-cert").await.unwrap_err();
        assert!(matches!(err.std_error(), StdError::SourceMaterialMissing(_)));

        let err = read_certificate_key(&store, "ns", "").await.unwrap_err();
        assert!(matches!(err.std_error(), StdError::SourceMaterialMissing(_)));
    }

    #[tokio::test]
    async fn source_secret_without_key_is_reported() {
        let store = InMemoryStore::new();
        let secret = Secret {
            metadata: ObjectMeta {
                name: Some("user-cert".to_string()),
                namespace: Some("ns".to_string()),
                ..Default::default()
            },
            data: Some(BTreeMap::from([(
                TLS_SECRET_CERT_NAME.to_string(),
                ByteString(b"CERT".to_vec()),
            )])),
            ..Default::default()
        };
        store.create(&secret).await.unwrap();

        let err = read_certificate_key(&store, "ns", "user-cert").await.unwrap_err();
        assert!(matches!(err.std_error(), StdError::SourceMaterialMissing(_)));
    }

    #[tokio::test]
    async fn ca_configmap_requires_ca_crt() {
        let store = InMemoryStore::new();
        let mut config_map = ConfigMap {
            metadata: ObjectMeta {
                name: Some("ca".to_string()),
                namespace: Some("ns".to_string()),
                ..Default::default()
            },
            data: Some(BTreeMap::from([("other".to_string(), "x".to_string())])),
            ..Default::default()
        };
        store.create(&config_map).await.unwrap();

        let err = read_ca_certificate(&store, "ns", "ca").await.unwrap_err();
        assert!(matches!(err.std_error(), StdError::SourceMaterialMissing(_)));

        config_map = store.get("ns", "ca").await.unwrap().unwrap();
        config_map.data = Some(BTreeMap::from([(TLS_CA_CERT_NAME.to_string(), "CA".to_string())]));
        store.update(&config_map).await.unwrap();

        assert_eq!(read_ca_certificate(&store, "ns", "ca").await.unwrap(), "CA");
    }

    #[tokio::test]
    async fn secret_created_after_our_read_is_overwritten() {
        let inner = InMemoryStore::new();
        synthesize(&inner, "ns", "op", None, b"OLD", b"PAIR").await.unwrap();
        let racing = RacingStore {
            inner: inner.clone(),
            snapshot: None,
        };

        let file_name = synthesize(&racing, "ns", "op", None, b"CERT", b"KEY").await.unwrap();

        let secret: Secret = inner.get("ns", "op").await.unwrap().unwrap();
        let data = secret.data.unwrap();
        assert_eq!(data.len(), 1);
        assert_eq!(data.get(&file_name).unwrap().0, b"CERTKEY".to_vec());
    }

    #[tokio::test]
    async fn stale_read_does_not_cause_a_conflict() {
        let inner = InMemoryStore::new();
        synthesize(&inner, "ns", "op", None, b"OLD", b"PAIR").await.unwrap();
        let stale: Secret = inner.get("ns", "op").await.unwrap().unwrap();
        // a concurrent synthesis moves the resourceVersion on
        synthesize(&inner, "ns", "op", None, b"OTHER", b"PAIR").await.unwrap();

        let racing = RacingStore {
            inner: inner.clone(),
            snapshot: Some(serde_json::to_value(&stale).unwrap()),
        };
        let file_name = synthesize(&racing, "ns", "op", None, b"CERT", b"KEY").await.unwrap();

        assert_eq!(stored_value(&inner, &file_name).await, b"CERTKEY".to_vec());
    }
}
