//! Controller wiring: the store abstraction over the Kubernetes API and
//! the shared reconciliation context.
//!
//! All API access from the reconciler goes through [`StackStore`], so the
//! reconciliation logic is tested against a mock without a cluster.

use std::fmt::Debug;
use std::sync::Arc;

use async_trait::async_trait;
use k8s_openapi::api::apps::v1::{Deployment, StatefulSet};
use k8s_openapi::api::core::v1::{ConfigMap, Secret, Service};
use k8s_openapi::api::networking::v1::Ingress;
use k8s_openapi::NamespaceResourceScope;
use kube::api::{DeleteParams, ListParams, Patch, PatchParams, PostParams};
use kube::{Api, Client, Resource, ResourceExt};
#[cfg(test)]
use mockall::automock;
use serde::de::DeserializeOwned;
use serde::Serialize;

use deploystack_common::crd::{DeployStack, DeployStackStatus};
use deploystack_common::events::{EventPublisher, KubeEventPublisher};
use deploystack_common::{Error, Result};
use deploystack_synth::{ManagedKind, ManagedObject};

pub mod stack;

pub use stack::{error_policy, reconcile};

/// Controller name reported on Events and server-side apply field manager
pub const CONTROLLER_NAME: &str = "deploystack-controller";

/// Kubernetes API access for the stack reconciler
#[cfg_attr(test, automock)]
#[async_trait]
pub trait StackStore: Send + Sync {
    /// Fetch a managed object by kind and name, `None` when absent
    async fn fetch(
        &self,
        kind: ManagedKind,
        namespace: &str,
        name: &str,
    ) -> Result<Option<ManagedObject>>;

    /// Create a managed object
    async fn create(&self, namespace: &str, object: &ManagedObject) -> Result<()>;

    /// Replace a managed object; the object must carry the live
    /// resourceVersion
    async fn update(&self, namespace: &str, object: &ManagedObject) -> Result<()>;

    /// Delete a managed object; deleting an absent object is not an error
    async fn delete(&self, kind: ManagedKind, namespace: &str, name: &str) -> Result<()>;

    /// Names of all objects of a kind carrying the ownership label
    async fn list_owned(&self, kind: ManagedKind, namespace: &str) -> Result<Vec<String>>;

    /// Patch the status subresource of a DeployStack
    async fn patch_status(&self, stack: &DeployStack, status: &DeployStackStatus) -> Result<()>;
}

/// Production store backed by a kube [`Client`]
pub struct KubeStackStore {
    client: Client,
}

impl KubeStackStore {
    /// Create a store for the given client
    pub fn new(client: Client) -> Self {
        Self { client }
    }

    async fn get_opt<K>(&self, namespace: &str, name: &str) -> Result<Option<K>>
    where
        K: Resource<Scope = NamespaceResourceScope> + Clone + DeserializeOwned + Debug,
        K::DynamicType: Default,
    {
        let api: Api<K> = Api::namespaced(self.client.clone(), namespace);
        match api.get(name).await {
            Ok(obj) => Ok(Some(obj)),
            Err(kube::Error::Api(ae)) if ae.code == 404 => Ok(None),
            Err(e) => Err(e.into()),
        }
    }

    async fn create_obj<K>(&self, namespace: &str, obj: &K) -> Result<()>
    where
        K: Resource<Scope = NamespaceResourceScope>
            + Clone
            + Serialize
            + DeserializeOwned
            + Debug,
        K::DynamicType: Default,
    {
        let api: Api<K> = Api::namespaced(self.client.clone(), namespace);
        api.create(&PostParams::default(), obj).await?;
        Ok(())
    }

    async fn replace_obj<K>(&self, namespace: &str, name: &str, obj: &K) -> Result<()>
    where
        K: Resource<Scope = NamespaceResourceScope>
            + Clone
            + Serialize
            + DeserializeOwned
            + Debug,
        K::DynamicType: Default,
    {
        let api: Api<K> = Api::namespaced(self.client.clone(), namespace);
        api.replace(name, &PostParams::default(), obj).await?;
        Ok(())
    }

    async fn delete_obj<K>(&self, namespace: &str, name: &str) -> Result<()>
    where
        K: Resource<Scope = NamespaceResourceScope> + Clone + DeserializeOwned + Debug,
        K::DynamicType: Default,
    {
        let api: Api<K> = Api::namespaced(self.client.clone(), namespace);
        match api.delete(name, &DeleteParams::default()).await {
            Ok(_) => Ok(()),
            Err(kube::Error::Api(ae)) if ae.code == 404 => Ok(()),
            Err(e) => Err(e.into()),
        }
    }

    async fn list_names<K>(&self, namespace: &str) -> Result<Vec<String>>
    where
        K: Resource<Scope = NamespaceResourceScope> + Clone + DeserializeOwned + Debug,
        K::DynamicType: Default,
    {
        let api: Api<K> = Api::namespaced(self.client.clone(), namespace);
        let params = ListParams::default().labels(deploystack_common::MANAGED_BY_SELECTOR);
        let list = api.list(&params).await?;
        Ok(list
            .items
            .iter()
            .filter_map(|o| o.meta().name.clone())
            .collect())
    }
}

#[async_trait]
impl StackStore for KubeStackStore {
    async fn fetch(
        &self,
        kind: ManagedKind,
        namespace: &str,
        name: &str,
    ) -> Result<Option<ManagedObject>> {
        Ok(match kind {
            ManagedKind::Deployment => self
                .get_opt::<Deployment>(namespace, name)
                .await?
                .map(ManagedObject::Deployment),
            ManagedKind::StatefulSet => self
                .get_opt::<StatefulSet>(namespace, name)
                .await?
                .map(ManagedObject::StatefulSet),
            ManagedKind::Service => self
                .get_opt::<Service>(namespace, name)
                .await?
                .map(ManagedObject::Service),
            ManagedKind::Ingress => self
                .get_opt::<Ingress>(namespace, name)
                .await?
                .map(ManagedObject::Ingress),
            ManagedKind::ConfigMap => self
                .get_opt::<ConfigMap>(namespace, name)
                .await?
                .map(ManagedObject::ConfigMap),
            ManagedKind::Secret => self
                .get_opt::<Secret>(namespace, name)
                .await?
                .map(ManagedObject::Secret),
        })
    }

    async fn create(&self, namespace: &str, object: &ManagedObject) -> Result<()> {
        match object {
            ManagedObject::Deployment(o) => self.create_obj(namespace, o).await,
            ManagedObject::StatefulSet(o) => self.create_obj(namespace, o).await,
            ManagedObject::Service(o) => self.create_obj(namespace, o).await,
            ManagedObject::Ingress(o) => self.create_obj(namespace, o).await,
            ManagedObject::ConfigMap(o) => self.create_obj(namespace, o).await,
            ManagedObject::Secret(o) => self.create_obj(namespace, o).await,
        }
    }

    async fn update(&self, namespace: &str, object: &ManagedObject) -> Result<()> {
        let name = object.name();
        match object {
            ManagedObject::Deployment(o) => self.replace_obj(namespace, &name, o).await,
            ManagedObject::StatefulSet(o) => self.replace_obj(namespace, &name, o).await,
            ManagedObject::Service(o) => self.replace_obj(namespace, &name, o).await,
            ManagedObject::Ingress(o) => self.replace_obj(namespace, &name, o).await,
            ManagedObject::ConfigMap(o) => self.replace_obj(namespace, &name, o).await,
            ManagedObject::Secret(o) => self.replace_obj(namespace, &name, o).await,
        }
    }

    async fn delete(&self, kind: ManagedKind, namespace: &str, name: &str) -> Result<()> {
        match kind {
            ManagedKind::Deployment => self.delete_obj::<Deployment>(namespace, name).await,
            ManagedKind::StatefulSet => self.delete_obj::<StatefulSet>(namespace, name).await,
            ManagedKind::Service => self.delete_obj::<Service>(namespace, name).await,
            ManagedKind::Ingress => self.delete_obj::<Ingress>(namespace, name).await,
            ManagedKind::ConfigMap => self.delete_obj::<ConfigMap>(namespace, name).await,
            ManagedKind::Secret => self.delete_obj::<Secret>(namespace, name).await,
        }
    }

    async fn list_owned(&self, kind: ManagedKind, namespace: &str) -> Result<Vec<String>> {
        match kind {
            ManagedKind::Deployment => self.list_names::<Deployment>(namespace).await,
            ManagedKind::StatefulSet => self.list_names::<StatefulSet>(namespace).await,
            ManagedKind::Service => self.list_names::<Service>(namespace).await,
            ManagedKind::Ingress => self.list_names::<Ingress>(namespace).await,
            ManagedKind::ConfigMap => self.list_names::<ConfigMap>(namespace).await,
            ManagedKind::Secret => self.list_names::<Secret>(namespace).await,
        }
    }

    async fn patch_status(&self, stack: &DeployStack, status: &DeployStackStatus) -> Result<()> {
        let namespace = stack.namespace().ok_or_else(|| {
            Error::internal_with_context("status", "stack resource has no namespace")
        })?;
        let api: Api<DeployStack> = Api::namespaced(self.client.clone(), &namespace);
        let status = serde_json::to_value(status)
            .map_err(|e| Error::serialization_for_kind("DeployStack", e.to_string()))?;
        let patch = serde_json::json!({ "status": status });
        api.patch_status(
            &stack.name_any(),
            &PatchParams::default(),
            &Patch::Merge(&patch),
        )
        .await?;
        Ok(())
    }
}

/// Shared state handed to every reconcile call
pub struct Context {
    /// Kubernetes API access
    pub store: Arc<dyn StackStore>,
    /// Event publishing, fire-and-forget
    pub events: Arc<dyn EventPublisher>,
}

impl Context {
    /// Build the production context from a client
    pub fn new(client: Client) -> Self {
        Self {
            store: Arc::new(KubeStackStore::new(client.clone())),
            events: Arc::new(KubeEventPublisher::new(client, CONTROLLER_NAME)),
        }
    }

    /// Build a context over injected fakes
    #[cfg(test)]
    pub fn for_testing(store: Arc<dyn StackStore>, events: Arc<dyn EventPublisher>) -> Self {
        Self { store, events }
    }
}
