// Copyright 2025 JiangLong.
//
// Licensed under the Apache License, Version 2.0 (the "License");
// you may not use this file except in compliance with the License.
// You may obtain a copy of the License at
//
//     http://www.apache.org/licenses/LICENSE-2.0
//
// Unless required by applicable law or agreed to in writing, software
// distributed under the License is distributed on an "AS IS" BASIS,
// WITHOUT WARRANTIES OR CONDITIONS OF ANY KIND, either express or implied.
// See the License for the specific language governing permissions and
// limitations under the License.

//! Narrow adapter over the cluster API. The planner depends on this trait
//! only; tests substitute an in-memory fake.

use crate::domain::config::{KubeAccessConfig, LcmConfig};
use crate::shared::error::LcmError;
use k8s_openapi::api::apps::v1::{Deployment, StatefulSet};
use k8s_openapi::api::core::v1::{PersistentVolumeClaim, Pod, Secret, Service};
use k8s_openapi::api::networking::v1::NetworkPolicy;
use kube::{Api, Client};

#[async_trait::async_trait]
pub trait LcmKubeClient: Send + Sync {
    async fn list_pods(&self, label_selector: &str) -> Result<Vec<Pod>, LcmError>;

    async fn create_secret(&self, secret: &Secret) -> Result<(), LcmError>;

    async fn create_network_policy(&self, policy: &NetworkPolicy) -> Result<(), LcmError>;

    async fn create_service(&self, service: &Service) -> Result<(), LcmError>;

    async fn create_volume_claim(&self, claim: &PersistentVolumeClaim) -> Result<(), LcmError>;

    async fn create_stateful_set(&self, statefulset: &StatefulSet) -> Result<(), LcmError>;

    async fn create_deployment(&self, deployment: &Deployment) -> Result<(), LcmError>;

    /// Sweep every object kind created for a training id. Deletion is
    /// label-driven so partially created jobs can be reclaimed too.
    async fn delete_training(&self, training_id: &str) -> Result<(), LcmError>;
}

pub struct LcmKubeClientImpl {
    client: Client,
    namespace: String,
}

impl LcmKubeClientImpl {
    pub async fn new(namespace: String) -> Result<Self, LcmError> {
        let client = Client::try_default().await.map_err(|e| {
            LcmError::KubeError(format!("Failed to create Kubernetes client: {}", e))
        })?;

        Ok(Self { client, namespace })
    }

    /// Build a client from the LCM configuration. An empty cluster URL means
    /// the default resolution (in-cluster, or local kubeconfig); otherwise
    /// the URL plus CA and token/cert material name the cluster explicitly.
    pub async fn from_lcm_config(config: &LcmConfig) -> Result<Self, LcmError> {
        if config.kube.url.is_empty() {
            return Self::new(config.learner_namespace.clone()).await;
        }
        let kube_config = custom_cluster_config(&config.kube).await?;
        let client = Client::try_from(kube_config).map_err(|e| {
            LcmError::KubeError(format!("Failed to create Kubernetes client: {}", e))
        })?;
        Ok(Self {
            client,
            namespace: config.learner_namespace.clone(),
        })
    }

    pub fn get_client(&self) -> Client {
        self.client.clone()
    }
}

async fn custom_cluster_config(access: &KubeAccessConfig) -> Result<kube::Config, LcmError> {
    use kube::config::{
        AuthInfo, Cluster, Context, KubeConfigOptions, Kubeconfig, NamedAuthInfo, NamedCluster,
        NamedContext,
    };

    let mut auth_info = AuthInfo::default();
    if !access.token.is_empty() {
        auth_info.token = Some(access.token.clone().into());
    } else if !access.token_file.is_empty() {
        auth_info.token_file = Some(access.token_file.clone());
    } else {
        auth_info.client_certificate = Some(access.cert_file.clone());
        auth_info.client_key = Some(access.key_file.clone());
    }

    let kubeconfig = Kubeconfig {
        clusters: vec![NamedCluster {
            name: "learner-cluster".to_string(),
            cluster: Some(Cluster {
                server: Some(access.url.clone()),
                certificate_authority: if access.ca_file.is_empty() {
                    None
                } else {
                    Some(access.ca_file.clone())
                },
                ..Default::default()
            }),
        }],
        auth_infos: vec![NamedAuthInfo {
            name: "lcm".to_string(),
            auth_info: Some(auth_info),
        }],
        contexts: vec![NamedContext {
            name: "lcm".to_string(),
            context: Some(Context {
                cluster: "learner-cluster".to_string(),
                user: "lcm".to_string(),
                ..Default::default()
            }),
        }],
        current_context: Some("lcm".to_string()),
        ..Default::default()
    };

    kube::Config::from_custom_kubeconfig(kubeconfig, &KubeConfigOptions::default())
        .await
        .map_err(|e| LcmError::KubeError(format!("Failed to create Kubernetes config: {}", e)))
}

#[async_trait::async_trait]
impl LcmKubeClient for LcmKubeClientImpl {
    async fn list_pods(&self, label_selector: &str) -> Result<Vec<Pod>, LcmError> {
        let api: Api<Pod> = Api::namespaced(self.client.clone(), &self.namespace);
        let lp = kube::api::ListParams::default().labels(label_selector);

        let pods = api.list(&lp).await?;
        Ok(pods.items)
    }

    async fn create_secret(&self, secret: &Secret) -> Result<(), LcmError> {
        let api: Api<Secret> = Api::namespaced(self.client.clone(), &self.namespace);
        let pp = kube::api::PostParams::default();

        api.create(&pp, secret).await?;
        Ok(())
    }

    async fn create_network_policy(&self, policy: &NetworkPolicy) -> Result<(), LcmError> {
        let api: Api<NetworkPolicy> = Api::namespaced(self.client.clone(), &self.namespace);
        let pp = kube::api::PostParams::default();

        api.create(&pp, policy).await?;
        Ok(())
    }

    async fn create_service(&self, service: &Service) -> Result<(), LcmError> {
        let api: Api<Service> = Api::namespaced(self.client.clone(), &self.namespace);
        let pp = kube::api::PostParams::default();

        api.create(&pp, service).await?;
        Ok(())
    }

    async fn create_volume_claim(&self, claim: &PersistentVolumeClaim) -> Result<(), LcmError> {
        let api: Api<PersistentVolumeClaim> =
            Api::namespaced(self.client.clone(), &self.namespace);
        let pp = kube::api::PostParams::default();

        api.create(&pp, claim).await?;
        Ok(())
    }

    async fn create_stateful_set(&self, statefulset: &StatefulSet) -> Result<(), LcmError> {
        let api: Api<StatefulSet> = Api::namespaced(self.client.clone(), &self.namespace);
        let pp = kube::api::PostParams::default();

        api.create(&pp, statefulset).await?;
        Ok(())
    }

    async fn create_deployment(&self, deployment: &Deployment) -> Result<(), LcmError> {
        let api: Api<Deployment> = Api::namespaced(self.client.clone(), &self.namespace);
        let pp = kube::api::PostParams::default();

        api.create(&pp, deployment).await?;
        Ok(())
    }

    async fn delete_training(&self, training_id: &str) -> Result<(), LcmError> {
        let selector = format!("training_id={}", training_id);
        let lp = kube::api::ListParams::default().labels(&selector);
        let dp = kube::api::DeleteParams::default();

        macro_rules! delete_all {
            ($kind:ty) => {{
                let api: Api<$kind> = Api::namespaced(self.client.clone(), &self.namespace);
                let items = api.list(&lp).await?;
                for item in items.items {
                    if let Some(name) = item.metadata.name.as_ref() {
                        let _ = api.delete(name, &dp).await;
                    }
                }
            }};
        }

        delete_all!(StatefulSet);
        delete_all!(Deployment);
        delete_all!(Service);
        delete_all!(NetworkPolicy);
        delete_all!(Secret);
        delete_all!(PersistentVolumeClaim);
        Ok(())
    }
}
