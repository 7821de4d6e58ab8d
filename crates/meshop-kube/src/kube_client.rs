//! [`ClusterClient`] backed by a live API server
//!
//! Objects are handled as `DynamicObject`s resolved through discovery, so any
//! kind the cluster serves (including freshly installed CRDs) can be applied.
//! Apply is Server-Side Apply with forced field ownership.

use std::path::Path;

use async_trait::async_trait;
use k8s_openapi::api::core::v1::Pod;
use kube::{
    Client, Config,
    api::{Api, AttachParams, DeleteParams, DynamicObject, ListParams, Patch, PatchParams, PostParams},
    config::{KubeConfigOptions, Kubeconfig},
    core::GroupVersionKind,
    discovery::{ApiCapabilities, ApiResource, Discovery, Scope},
};
use tokio::io::{AsyncRead, AsyncReadExt};
use tokio::sync::RwLock;
use tracing::{debug, info};

use meshop_core::{Gvk, K8sObject};

use crate::client::{ApplyAction, ClusterClient, ExecOutput};
use crate::error::{KubeError, Result};

/// Field manager name for Server-Side Apply
pub const FIELD_MANAGER: &str = "meshop";

pub struct KubeClusterClient {
    client: Client,
    discovery: RwLock<Discovery>,
}

impl KubeClusterClient {
    /// Connect using an explicit kubeconfig and context, or the inferred
    /// configuration (in-cluster, `KUBECONFIG`, `~/.kube/config`) otherwise
    pub async fn connect(kubeconfig: Option<&Path>, context: Option<&str>) -> Result<Self> {
        let config = match kubeconfig {
            Some(path) => {
                let kc = Kubeconfig::read_from(path)
                    .map_err(|e| KubeError::InvalidConfig(format!("{}: {}", path.display(), e)))?;
                let options = KubeConfigOptions {
                    context: context.map(str::to_string),
                    ..Default::default()
                };
                Config::from_custom_kubeconfig(kc, &options)
                    .await
                    .map_err(|e| KubeError::InvalidConfig(e.to_string()))?
            }
            None if context.is_some() => {
                let options = KubeConfigOptions {
                    context: context.map(str::to_string),
                    ..Default::default()
                };
                Config::from_kubeconfig(&options)
                    .await
                    .map_err(|e| KubeError::InvalidConfig(e.to_string()))?
            }
            None => Config::infer()
                .await
                .map_err(|e| KubeError::InvalidConfig(e.to_string()))?,
        };
        let client = Client::try_from(config)?;
        Self::new(client).await
    }

    pub async fn new(client: Client) -> Result<Self> {
        let discovery = Discovery::new(client.clone()).run().await?;
        Ok(Self {
            client,
            discovery: RwLock::new(discovery),
        })
    }

    /// Resolve a kind through discovery, refreshing once if it is unknown
    /// (the CRD may have been applied since the last refresh)
    async fn resolve(&self, gvk: &Gvk) -> Result<(ApiResource, ApiCapabilities)> {
        let kgvk = GroupVersionKind::gvk(&gvk.group, &gvk.version, &gvk.kind);
        if let Some(found) = self.discovery.read().await.resolve_gvk(&kgvk) {
            return Ok(found);
        }

        debug!(api_version = %gvk.api_version(), kind = %gvk.kind, "refreshing discovery");
        let fresh = Discovery::new(self.client.clone()).run().await?;
        let found = fresh.resolve_gvk(&kgvk);
        *self.discovery.write().await = fresh;
        found.ok_or_else(|| KubeError::UnknownResource {
            api_version: gvk.api_version(),
            kind: gvk.kind.clone(),
        })
    }

    fn api(&self, ar: &ApiResource, caps: &ApiCapabilities, namespace: Option<&str>) -> Api<DynamicObject> {
        match (caps.scope == Scope::Namespaced, namespace) {
            (true, Some(ns)) => Api::namespaced_with(self.client.clone(), ns, ar),
            _ => Api::all_with(self.client.clone(), ar),
        }
    }
}

fn to_dynamic(obj: &K8sObject) -> Result<DynamicObject> {
    Ok(serde_json::from_value(obj.body.clone())?)
}

fn from_dynamic(obj: DynamicObject, gvk: &Gvk) -> Result<K8sObject> {
    let mut value = serde_json::to_value(&obj)?;
    // List items come back without type metadata
    if let Some(map) = value.as_object_mut() {
        map.entry("apiVersion").or_insert_with(|| gvk.api_version().into());
        map.entry("kind").or_insert_with(|| gvk.kind.clone().into());
    }
    Ok(K8sObject::from_value(value)?)
}

async fn read_all(reader: Option<impl AsyncRead + Unpin>) -> std::io::Result<String> {
    let mut out = String::new();
    if let Some(mut reader) = reader {
        reader.read_to_string(&mut out).await?;
    }
    Ok(out)
}

fn conflict_or_api(err: kube::Error, obj: &K8sObject) -> KubeError {
    match err {
        kube::Error::Api(resp) if resp.code == 409 => KubeError::Conflict {
            kind: obj.kind().to_string(),
            name: obj.name.clone(),
            message: resp.message,
        },
        other => KubeError::Api(other),
    }
}

#[async_trait]
impl ClusterClient for KubeClusterClient {
    async fn apply(&self, namespace: &str, object: &K8sObject, dry_run: bool) -> Result<ApplyAction> {
        if dry_run {
            info!(object = %object.hash(), namespace, "dry run mode: would be applying");
            return Ok(ApplyAction::Created);
        }
        let (ar, caps) = self.resolve(&object.gvk).await?;
        let mut obj = object.clone();
        if caps.scope == Scope::Namespaced && obj.namespace.is_none() {
            obj.default_namespace(namespace);
        }
        let api = self.api(&ar, &caps, obj.namespace.as_deref());

        let exists = api.get_opt(&obj.name).await?.is_some();

        let mut params = PatchParams::apply(FIELD_MANAGER);
        params.force = true;

        api.patch(&obj.name, &params, &Patch::Apply(&to_dynamic(&obj)?))
            .await
            .map_err(|e| KubeError::ApplyFailed {
                object: obj.hash(),
                message: e.to_string(),
            })?;

        Ok(if exists {
            ApplyAction::Configured
        } else {
            ApplyAction::Created
        })
    }

    async fn get(&self, gvk: &Gvk, namespace: Option<&str>, name: &str) -> Result<Option<K8sObject>> {
        let (ar, caps) = self.resolve(gvk).await?;
        match self.api(&ar, &caps, namespace).get_opt(name).await? {
            Some(obj) => Ok(Some(from_dynamic(obj, gvk)?)),
            None => Ok(None),
        }
    }

    async fn update(&self, object: &K8sObject) -> Result<K8sObject> {
        let (ar, caps) = self.resolve(&object.gvk).await?;
        let api = self.api(&ar, &caps, object.namespace.as_deref());
        let updated = api
            .replace(&object.name, &PostParams::default(), &to_dynamic(object)?)
            .await
            .map_err(|e| conflict_or_api(e, object))?;
        from_dynamic(updated, &object.gvk)
    }

    async fn update_status(&self, object: &K8sObject) -> Result<K8sObject> {
        let (ar, caps) = self.resolve(&object.gvk).await?;
        let api = self.api(&ar, &caps, object.namespace.as_deref());
        let body = serde_json::to_vec(&object.body)?;
        let updated = api
            .replace_status(&object.name, &PostParams::default(), body)
            .await
            .map_err(|e| conflict_or_api(e, object))?;
        from_dynamic(updated, &object.gvk)
    }

    async fn delete(&self, gvk: &Gvk, namespace: Option<&str>, name: &str) -> Result<()> {
        let (ar, caps) = self.resolve(gvk).await?;
        let params = DeleteParams {
            propagation_policy: Some(kube::api::PropagationPolicy::Background),
            ..Default::default()
        };
        match self.api(&ar, &caps, namespace).delete(name, &params).await {
            Ok(_) => Ok(()),
            Err(kube::Error::Api(resp)) if resp.code == 404 => Ok(()),
            Err(e) => Err(KubeError::Api(e)),
        }
    }

    async fn list_by_selector(&self, gvk: &Gvk, namespace: Option<&str>, selector: &str) -> Result<Vec<K8sObject>> {
        let (ar, caps) = self.resolve(gvk).await?;
        let params = ListParams::default().labels(selector);
        self.api(&ar, &caps, namespace)
            .list(&params)
            .await?
            .items
            .into_iter()
            .map(|obj| from_dynamic(obj, gvk))
            .collect()
    }

    async fn exec_in_pod(&self, pod: &str, namespace: &str, container: &str, command: &[String]) -> Result<ExecOutput> {
        let exec_err = |message: String| KubeError::Exec {
            pod: pod.to_string(),
            message,
        };
        let pods: Api<Pod> = Api::namespaced(self.client.clone(), namespace);
        let params = AttachParams::default().container(container).stdout(true).stderr(true);
        let mut attached = pods
            .exec(pod, command.to_vec(), &params)
            .await
            .map_err(|e| exec_err(e.to_string()))?;

        let (stdout, stderr) = tokio::join!(read_all(attached.stdout()), read_all(attached.stderr()));
        let output = ExecOutput {
            stdout: stdout?,
            stderr: stderr?,
        };
        attached.join().await.map_err(|e| exec_err(e.to_string()))?;
        Ok(output)
    }
}
