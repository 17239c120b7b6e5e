//! Narrow object store accessor used by the TLS material synthesizer and the
//! automation config persistence.
//!
//! The operator talks to the API server through [`KubeStore`]; tests use the
//! in-memory implementation in [`memory`].

use std::fmt::Debug;

use async_trait::async_trait;
use k8s_openapi::NamespaceResourceScope;
use kube::{
    api::{Api, PostParams},
    Client, Resource, ResourceExt,
};
use serde::{de::DeserializeOwned, Serialize};
use thiserror::Error;

#[derive(Error, Debug)]
pub enum StoreError {
    #[error("{kind} {namespace}/{name} already exists")]
    AlreadyExists {
        kind: String,
        namespace: String,
        name: String,
    },

    #[error("{kind} {namespace}/{name} was modified concurrently")]
    Conflict {
        kind: String,
        namespace: String,
        name: String,
    },

    #[error("{kind} {namespace}/{name} not found")]
    NotFound {
        kind: String,
        namespace: String,
        name: String,
    },

    #[error("object is missing {0}")]
    InvalidObject(String),

    #[error("Kube Error: {0}")]
    Kube(#[source] kube::Error),
}

/// Objects the store can hold: namespaced, serde-capable Kubernetes resources.
pub trait StoreObject:
    Resource<DynamicType = (), Scope = NamespaceResourceScope>
    + Clone
    + Debug
    + Serialize
    + DeserializeOwned
    + Send
    + Sync
    + 'static
{
}

impl<K> StoreObject for K where
    K: Resource<DynamicType = (), Scope = NamespaceResourceScope>
        + Clone
        + Debug
        + Serialize
        + DeserializeOwned
        + Send
        + Sync
        + 'static
{
}

#[async_trait]
pub trait ObjectStore: Send + Sync {
    /// Returns `Ok(None)` when the object does not exist.
    async fn get<K: StoreObject>(&self, namespace: &str, name: &str) -> Result<Option<K>, StoreError>;

    async fn create<K: StoreObject>(&self, obj: &K) -> Result<K, StoreError>;

    async fn update<K: StoreObject>(&self, obj: &K) -> Result<K, StoreError>;
}

fn object_key<K: StoreObject>(obj: &K) -> Result<(String, String), StoreError> {
    let namespace = obj
        .namespace()
        .ok_or_else(|| StoreError::InvalidObject("metadata.namespace".to_string()))?;
    let name = obj
        .meta()
        .name
        .clone()
        .ok_or_else(|| StoreError::InvalidObject("metadata.name".to_string()))?;
    Ok((namespace, name))
}

/// [`ObjectStore`] backed by the Kubernetes API server.
#[derive(Clone)]
pub struct KubeStore {
    client: Client,
}

impl KubeStore {
    pub fn new(client: Client) -> Self {
        Self { client }
    }
}

#[async_trait]
impl ObjectStore for KubeStore {
    async fn get<K: StoreObject>(&self, namespace: &str, name: &str) -> Result<Option<K>, StoreError> {
        let api: Api<K> = Api::namespaced(self.client.clone(), namespace);
        api.get_opt(name).await.map_err(StoreError::Kube)
    }

    async fn create<K: StoreObject>(&self, obj: &K) -> Result<K, StoreError> {
        let (namespace, name) = object_key(obj)?;
        let api: Api<K> = Api::namespaced(self.client.clone(), &namespace);
        api.create(&PostParams::default(), obj).await.map_err(|e| match e {
            kube::Error::Api(err) if err.code == 409 => StoreError::AlreadyExists {
                kind: K::kind(&()).to_string(),
                namespace,
                name,
            },
            e => StoreError::Kube(e),
        })
    }

    async fn update<K: StoreObject>(&self, obj: &K) -> Result<K, StoreError> {
        let (namespace, name) = object_key(obj)?;
        let api: Api<K> = Api::namespaced(self.client.clone(), &namespace);
        api.replace(&name, &PostParams::default(), obj)
            .await
            .map_err(|e| match e {
                kube::Error::Api(err) if err.code == 409 => StoreError::Conflict {
                    kind: K::kind(&()).to_string(),
                    namespace,
                    name,
                },
                kube::Error::Api(err) if err.code == 404 => StoreError::NotFound {
                    kind: K::kind(&()).to_string(),
                    namespace,
                    name,
                },
                e => StoreError::Kube(e),
            })
    }
}

#[cfg(test)]
pub mod memory {
    use super::*;
    use std::collections::BTreeMap;
    use std::sync::atomic::{AtomicBool, AtomicUsize, Ordering};
    use std::sync::{Arc, Mutex};

    type Key = (String, String, String);

    /// In-memory store with API-server-like create/update semantics.
    ///
    /// `resourceVersion` is bumped on every write and checked on update when
    /// the caller supplies one.
    #[derive(Clone, Default)]
    pub struct InMemoryStore {
        objects: Arc<Mutex<BTreeMap<Key, serde_json::Value>>>,
        writes: Arc<AtomicUsize>,
        fail_writes: Arc<AtomicBool>,
    }

    impl InMemoryStore {
        pub fn new() -> Self {
            Self::default()
        }

        /// Number of successful create/update calls so far.
        pub fn writes(&self) -> usize {
            self.writes.load(Ordering::SeqCst)
        }

        /// Makes every following create/update fail.
        pub fn fail_writes(&self) {
            self.fail_writes.store(true, Ordering::SeqCst);
        }

        fn key<K: StoreObject>(namespace: &str, name: &str) -> Key {
            (K::kind(&()).to_string(), namespace.to_string(), name.to_string())
        }

        fn check_writable<K: StoreObject>(&self, namespace: &str, name: &str) -> Result<(), StoreError> {
            if self.fail_writes.load(Ordering::SeqCst) {
                return Err(StoreError::Conflict {
                    kind: K::kind(&()).to_string(),
                    namespace: namespace.to_string(),
                    name: name.to_string(),
                });
            }
            Ok(())
        }

        fn store<K: StoreObject>(&self, key: Key, mut obj: K, version: u64) -> K {
            obj.meta_mut().resource_version = Some(version.to_string());
            let value = serde_json::to_value(&obj).expect("store objects serialize");
            self.objects.lock().unwrap().insert(key, value);
            self.writes.fetch_add(1, Ordering::SeqCst);
            obj
        }

        fn stored_version(value: &serde_json::Value) -> u64 {
            value["metadata"]["resourceVersion"]
                .as_str()
                .and_then(|v| v.parse().ok())
                .unwrap_or(0)
        }
    }

    #[async_trait]
    impl ObjectStore for InMemoryStore {
        async fn get<K: StoreObject>(&self, namespace: &str, name: &str) -> Result<Option<K>, StoreError> {
            let objects = self.objects.lock().unwrap();
            Ok(objects
                .get(&Self::key::<K>(namespace, name))
                .map(|v| serde_json::from_value(v.clone()).expect("store objects deserialize")))
        }

        async fn create<K: StoreObject>(&self, obj: &K) -> Result<K, StoreError> {
            let (namespace, name) = object_key(obj)?;
            self.check_writable::<K>(&namespace, &name)?;
            let key = Self::key::<K>(&namespace, &name);
            if self.objects.lock().unwrap().contains_key(&key) {
                return Err(StoreError::AlreadyExists {
                    kind: K::kind(&()).to_string(),
                    namespace,
                    name,
                });
            }
            Ok(self.store(key, obj.clone(), 1))
        }

        async fn update<K: StoreObject>(&self, obj: &K) -> Result<K, StoreError> {
            let (namespace, name) = object_key(obj)?;
            self.check_writable::<K>(&namespace, &name)?;
            let key = Self::key::<K>(&namespace, &name);
            let current = match self.objects.lock().unwrap().get(&key) {
                Some(value) => Self::stored_version(value),
                None => {
                    return Err(StoreError::NotFound {
                        kind: K::kind(&()).to_string(),
                        namespace,
                        name,
                    })
                }
            };
            if let Some(supplied) = obj.meta().resource_version.as_deref() {
                if supplied != current.to_string() {
                    return Err(StoreError::Conflict {
                        kind: K::kind(&()).to_string(),
                        namespace,
                        name,
                    });
                }
            }
            Ok(self.store(key, obj.clone(), current + 1))
        }
    }
}

#[cfg(test)]
mod tests {
    use super::memory::InMemoryStore;
    use super::*;
    use k8s_openapi::api::core::v1::{ConfigMap, Secret};
    use kube::api::ObjectMeta;

    fn secret(name: &str) -> Secret {
        Secret {
            metadata: ObjectMeta {
                name: Some(name.to_string()),
                namespace: Some("default".to_string()),
                ..Default::default()
            },
            ..Default::default()
        }
    }

    #[tokio::test]
    async fn create_rejects_existing_objects() {
        let store = InMemoryStore::new();
        store.create(&secret("a")).await.unwrap();

        let err = store.create(&secret("a")).await.unwrap_err();
        assert!(matches!(err, StoreError::AlreadyExists { .. }));
    }

    #[tokio::test]
    async fn kinds_do_not_share_names() {
        let store = InMemoryStore::new();
        store.create(&secret("a")).await.unwrap();

        let cm: Option<ConfigMap> = store.get("default", "a").await.unwrap();
        assert!(cm.is_none());
    }

    #[tokio::test]
    async fn update_detects_stale_resource_version() {
        let store = InMemoryStore::new();
        let created = store.create(&secret("a")).await.unwrap();
        store.update(&created).await.unwrap();

        let err = store.update(&created).await.unwrap_err();
        assert!(matches!(err, StoreError::Conflict { .. }));
        assert_eq!(store.writes(), 2);
    }

    #[tokio::test]
    async fn update_of_missing_object_fails() {
        let store = InMemoryStore::new();
        let err = store.update(&secret("missing")).await.unwrap_err();
        assert!(matches!(err, StoreError::NotFound { .. }));
    }
}
