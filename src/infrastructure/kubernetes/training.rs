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

//! Topology selection and bill-of-materials assembly. A training is planned
//! as either split (helpers and learners in separate workloads sharing a
//! volume) or non-split (everything in one stateful-set pod); both variants
//! share the planning steps and differ only in BOM shape.

use crate::domain::config::LcmConfig;
use crate::domain::request::JobDeploymentRequest;
use crate::infrastructure::constants::*;
use crate::infrastructure::kubernetes::client::LcmKubeClient;
use crate::infrastructure::kubernetes::resources::containers::*;
use crate::infrastructure::kubernetes::resources::learner;
use crate::infrastructure::kubernetes::resources::network_policy::define_network_policy_for_training_id;
use crate::infrastructure::kubernetes::resources::secrets;
use crate::infrastructure::kubernetes::resources::volumes::{self, HelperVolumes, LearnerVolumes};
use crate::shared::error::Result;
use backon::{ExponentialBuilder, Retryable};
use k8s_openapi::api::apps::v1::{Deployment, StatefulSet};
use k8s_openapi::api::core::v1::{
    Container, EnvVar, LocalObjectReference, PersistentVolumeClaim, Secret, Service, Volume,
};
use k8s_openapi::api::networking::v1::NetworkPolicy;
use k8s_openapi::apimachinery::pkg::apis::meta::v1::ObjectMeta;
use std::collections::BTreeMap;
use tracing::{debug, error, info};

/// Everything that must exist in the cluster for one training job, in
/// creation order. Partial creations are reclaimed by the training-id label.
pub struct BillOfMaterials {
    pub secrets: Vec<Secret>,
    pub network_policy: Option<NetworkPolicy>,
    pub service: Option<Service>,
    pub shared_volume_claim: Option<PersistentVolumeClaim>,
    /// Helper deployment; split mode only.
    pub helper: Option<Deployment>,
    pub learner_set: StatefulSet,
    pub num_learners: i32,
}

#[derive(Debug)]
struct LearnerDefinition {
    name: String,
    num_learners: i32,
    mount_training_data: bool,
    mount_results: bool,
    result_bucket_absent: bool,
    env_vars: Vec<EnvVar>,
    volumes: LearnerVolumes,
    secrets_plan: secrets::SecretsPlan,
}

#[derive(Debug)]
pub struct TrainingContext {
    req: JobDeploymentRequest,
    config: LcmConfig,
    tds_tag: Option<String>,
    learner: LearnerDefinition,
    helper_name: String,
    helper_volumes: HelperVolumes,
    shared_env_vars: Vec<EnvVar>,
    pull_secret_references: Vec<LocalObjectReference>,
    custom_pull_secret: Option<Secret>,
}

/// The two topologies as one sum type sharing a planning context.
#[derive(Debug)]
pub enum Training {
    Split(TrainingContext),
    NonSplit(TrainingContext),
}

impl Training {
    /// Validate the request and bind the planning inputs. Fails fast on an
    /// invalid request, before any cluster object exists. `tds_tag` is the
    /// image tag discovered on the training-data service, when reachable.
    pub fn new(
        req: JobDeploymentRequest,
        config: LcmConfig,
        tds_tag: Option<String>,
    ) -> Result<Training> {
        let learner_name = format!("learner-{}", req.name);
        let helper_name = format!("lhelper-{}", req.name);
        let num_learners = req.num_learners();

        let mount_training_data = req.env_value("DATA_STORE_TYPE") == COS_MOUNT_TYPE;
        let result_bucket_absent = req.env_value("RESULT_STORE_OBJECTID") == NO_RESULT_BUCKET_TAG;
        let mount_results =
            req.env_value("RESULT_STORE_TYPE") == COS_MOUNT_TYPE && !result_bucket_absent;

        // A custom image without a token is rejected here, with no side
        // effects.
        let (pull_secret_references, custom_pull_secret) =
            secrets::image_pull_secrets(&req, &config)?;

        // Shared across all containers of the training, in stable order so
        // re-planning the same request yields the same BOM.
        let shared_env_vars = extract_env_vars_from_request(&req);
        let learner_env_vars = learner::populate_learner_env_vars(
            &shared_env_vars,
            &req.training_id,
            num_learners,
            &learner_name,
            mount_training_data,
            mount_results,
        );

        let learner_volumes = volumes::volumes_for_learner(
            &req,
            &learner_env_vars,
            mount_training_data,
            mount_results,
            &config,
        );
        let secrets_plan =
            secrets::secrets_for_deploying_learner(&req, mount_training_data, mount_results);

        let learner_defn = LearnerDefinition {
            name: learner_name,
            num_learners,
            mount_training_data,
            mount_results,
            result_bucket_absent,
            env_vars: learner_env_vars,
            volumes: learner_volumes,
            secrets_plan,
        };

        let helper_volumes = HelperVolumes::plan(&req, &config);
        let split = helper_volumes.is_split();

        let ctx = TrainingContext {
            req,
            config,
            tds_tag,
            learner: learner_defn,
            helper_name,
            helper_volumes,
            shared_env_vars,
            pull_secret_references,
            custom_pull_secret,
        };

        if split {
            info!(training_id = %ctx.req.training_id, "deploying learner infra in split mode");
            Ok(Training::Split(ctx))
        } else {
            info!(training_id = %ctx.req.training_id, "deploying learner infra in non split mode");
            Ok(Training::NonSplit(ctx))
        }
    }

    fn context(&self) -> &TrainingContext {
        match self {
            Training::Split(ctx) | Training::NonSplit(ctx) => ctx,
        }
    }

    /// Pure transformation of the bound request into the BOM. Apart from the
    /// freshly generated ssh key material, planning the same request twice
    /// yields an identical BOM.
    pub fn plan(&self) -> Result<BillOfMaterials> {
        let ctx = self.context();
        let labels = learner::job_labels(&ctx.req);

        let mut bom = match self {
            Training::NonSplit(ctx) => ctx.plan_non_split()?,
            Training::Split(ctx) => ctx.plan_split()?,
        };

        // Every produced object carries the job labels so a cleanup sweep
        // can reclaim partial creations.
        for secret in &mut bom.secrets {
            merge_labels(&mut secret.metadata, &labels);
        }
        if let Some(ref mut policy) = bom.network_policy {
            merge_labels(&mut policy.metadata, &labels);
        }
        if let Some(ref mut service) = bom.service {
            merge_labels(&mut service.metadata, &labels);
        }
        if let Some(ref mut claim) = bom.shared_volume_claim {
            merge_labels(&mut claim.metadata, &labels);
        }
        if let Some(ref mut helper) = bom.helper {
            merge_labels(&mut helper.metadata, &labels);
        }
        merge_labels(&mut bom.learner_set.metadata, &labels);
        Ok(bom)
    }

    /// Plan and create, in BOM order.
    pub async fn start(&self, client: &dyn LcmKubeClient) -> Result<()> {
        let bom = self.plan()?;
        create_from_bom(client, &bom).await
    }
}

impl TrainingContext {
    fn plan_non_split(&self) -> Result<BillOfMaterials> {
        let learner_defn = &self.learner;

        let mut containers = self.construct_auxillary_containers();

        let shared_volume_mount = self.helper_volumes.shared_volume_mount();
        let learner_container = learner::construct_learner_container(
            &self.req,
            learner_defn.env_vars.clone(),
            &learner_defn.volumes.create_volume_mounts(),
            &shared_volume_mount,
            learner_defn.mount_training_data,
            learner_defn.mount_results,
            self.tds_tag.is_some(),
            &self.config,
        );
        containers.push(learner_container);

        let mut pod_volumes = learner_defn.volumes.create_volumes();
        pod_volumes.extend(self.helper_pod_volumes());

        let pod_template = self.learner_pod_template(containers, pod_volumes);

        let service = self.service_spec();
        let learner_set = learner::create_stateful_set_spec(
            &learner_defn.name,
            &learner_defn.name,
            learner_defn.num_learners,
            pod_template,
            &self.config.learner_namespace,
        );

        Ok(BillOfMaterials {
            secrets: self.all_secrets()?,
            network_policy: self.network_policy_spec(),
            service,
            shared_volume_claim: None,
            helper: None,
            learner_set,
            num_learners: learner_defn.num_learners,
        })
    }

    fn plan_split(&self) -> Result<BillOfMaterials> {
        let learner_defn = &self.learner;
        let shared_volume_mount = self.helper_volumes.shared_volume_mount();

        // Helper deployment: controller, brokers and log collector around
        // the shared volume.
        let helper_containers = self.construct_auxillary_containers();
        let helper_template = learner::create_pod_spec(
            helper_containers,
            self.helper_pod_volumes(),
            learner::job_labels(&self.req),
            BTreeMap::new(),
            self.pull_secret_references.clone(),
            self.req.label_value("deploy_zone"),
            learner::get_tolerations("CPU", DEFAULT_TOLERATION_SECONDS),
            0,
        );
        let helper = learner::create_helper_deployment_spec(
            &self.helper_name,
            helper_template,
            &self.config.learner_namespace,
        );

        // Learner stateful set: the training container plus the shared
        // volume it rendezvouses through.
        let learner_container = learner::construct_learner_container(
            &self.req,
            learner_defn.env_vars.clone(),
            &learner_defn.volumes.create_volume_mounts(),
            &shared_volume_mount,
            learner_defn.mount_training_data,
            learner_defn.mount_results,
            self.tds_tag.is_some(),
            &self.config,
        );
        let mut pod_volumes = learner_defn.volumes.create_volumes();
        pod_volumes.push(self.helper_volumes.shared_volume());

        let pod_template = self.learner_pod_template(vec![learner_container], pod_volumes);

        let service = self.service_spec();
        let learner_set = learner::create_stateful_set_spec(
            &learner_defn.name,
            &learner_defn.name,
            learner_defn.num_learners,
            pod_template,
            &self.config.learner_namespace,
        );

        Ok(BillOfMaterials {
            secrets: self.all_secrets()?,
            network_policy: self.network_policy_spec(),
            service,
            shared_volume_claim: self.helper_volumes.dynamic_claim().cloned(),
            helper: Some(helper),
            learner_set,
            num_learners: learner_defn.num_learners,
        })
    }

    /// The sidecar containers shared by both topologies.
    fn construct_auxillary_containers(&self) -> Vec<Container> {
        let learner_defn = &self.learner;
        let shared_volume_mount = self.helper_volumes.shared_volume_mount();
        let skip_store_results = learner_defn.mount_results || learner_defn.result_bucket_absent;

        let mut helper_containers = vec![construct_controller_container(
            &self.req.training_id,
            &self.helper_volumes.etcd_cert_volume_mount(),
            &shared_volume_mount,
            learner_defn.mount_training_data,
            skip_store_results,
            &self.config,
        )];

        if let Some(ref tds_tag) = self.tds_tag {
            helper_containers.push(construct_log_collector(
                Some(&self.helper_volumes.ssl_cert_volume_mount()),
                &shared_volume_mount,
                tds_tag,
                &self.req,
                &self.shared_env_vars,
                &self.config,
            ));
        }

        if !learner_defn.mount_training_data {
            helper_containers.push(construct_load_training_data_container(
                &shared_volume_mount,
                &self.shared_env_vars,
                &self.config,
            ));
        }
        if !learner_defn.mount_results && !learner_defn.result_bucket_absent {
            helper_containers.push(construct_load_model_container(
                &shared_volume_mount,
                &self.shared_env_vars,
                &self.config,
            ));
            helper_containers.push(construct_store_results_container(
                &shared_volume_mount,
                &self.shared_env_vars,
                &self.config,
            ));
            helper_containers.push(construct_store_logs_container(
                &shared_volume_mount,
                &self.shared_env_vars,
                &self.config,
            ));
        }
        helper_containers
    }

    /// Volumes the helper containers bind: the shared scratch, the etcd TLS
    /// certs, and the TDS TLS certs when a log collector rides along.
    fn helper_pod_volumes(&self) -> Vec<Volume> {
        let mut pod_volumes = vec![
            self.helper_volumes.etcd_cert_volume(),
            self.helper_volumes.shared_volume(),
        ];
        if self.tds_tag.is_some() {
            pod_volumes.push(self.helper_volumes.ssl_cert_volume());
        }
        pod_volumes
    }

    fn learner_pod_template(
        &self,
        containers: Vec<Container>,
        pod_volumes: Vec<Volume>,
    ) -> k8s_openapi::api::core::v1::PodTemplateSpec {
        let mut labels = learner::job_labels(&self.req);
        labels.insert(
            LABEL_SERVICE.to_string(),
            LEARNER_SERVICE_LABEL_VALUE.to_string(),
        );

        let mut node_selector = BTreeMap::new();
        if self.req.resources.gpus > 0 {
            node_selector.insert(
                GPU_TYPE_NODE_SELECTOR_KEY.to_string(),
                self.req.resources.gpu_type.clone(),
            );
        }
        if self.req.is_cpu_only() {
            node_selector.insert("gpu/nvidia".to_string(), "NA".to_string());
        }

        learner::create_pod_spec(
            containers,
            pod_volumes,
            labels,
            node_selector,
            self.pull_secret_references.clone(),
            self.req.label_value("deploy_zone"),
            learner::get_tolerations(&self.req.resources.gpu_type, DEFAULT_TOLERATION_SECONDS),
            0,
        )
    }

    fn all_secrets(&self) -> Result<Vec<Secret>> {
        let mut all = secrets::create_volume_secrets_spec(
            &self.learner.secrets_plan,
            &self.req,
            &self.config.learner_namespace,
        )?;
        if let Some(ref custom) = self.custom_pull_secret {
            all.push(custom.clone());
        }
        Ok(all)
    }

    /// Network policies only apply to distributed learners.
    fn network_policy_spec(&self) -> Option<NetworkPolicy> {
        if self.learner.num_learners > 1 {
            Some(define_network_policy_for_training_id(
                &self.req.name,
                &self.req.training_id,
                &self.config.learner_namespace,
            ))
        } else {
            None
        }
    }

    /// Peer discovery service; only distributed learners need it.
    fn service_spec(&self) -> Option<Service> {
        if self.learner.num_learners > 1 {
            Some(learner::create_service_spec(
                &self.learner.name,
                &self.req.training_id,
                &self.config.learner_namespace,
            ))
        } else {
            None
        }
    }
}

/// Create the BOM's objects in order. The first error is returned as-is;
/// garbage collection of partial creations happens by training-id label.
pub async fn create_from_bom(client: &dyn LcmKubeClient, bom: &BillOfMaterials) -> Result<()> {
    if let Some(ref policy) = bom.network_policy {
        info!("applying network policy for training");
        if let Err(err) = client.create_network_policy(policy).await {
            error!(%err, policy = ?policy.metadata.name, "failed creating network policy");
            return Err(err);
        }
    }

    for secret in &bom.secrets {
        if let Err(err) = client.create_secret(secret).await {
            error!(%err, secret = ?secret.metadata.name, "failed creating secret");
            return Err(err);
        }
    }

    if bom.num_learners > 1 {
        if let Some(ref service) = bom.service {
            if let Err(err) = client.create_service(service).await {
                error!(%err, service = ?service.metadata.name, "failed creating service");
                return Err(err);
            }
        }
    }

    if let Some(ref claim) = bom.shared_volume_claim {
        if let Err(err) = client.create_volume_claim(claim).await {
            error!(%err, claim = ?claim.metadata.name, "failed creating volume claim");
            return Err(err);
        }
    }

    if let Some(ref helper) = bom.helper {
        if let Err(err) = client.create_deployment(helper).await {
            error!(%err, helper = ?helper.metadata.name, "failed creating helper deployment");
            return Err(err);
        }
    }

    if let Err(err) = client.create_stateful_set(&bom.learner_set).await {
        error!(%err, statefulset = ?bom.learner_set.metadata.name, "failed creating stateful set");
        return Err(err);
    }

    Ok(())
}

/// Discover the training-data service and the tag of its running image; the
/// tag doubles as the default log-collector tag. Listing retries briefly
/// because the TDS may still be rolling when a deployment arrives.
pub async fn find_training_data_service_tag(
    client: &dyn LcmKubeClient,
    config: &LcmConfig,
) -> Option<String> {
    let selector = format!("service=={}", config.tds_service_name);
    let pods = (|| async { client.list_pods(&selector).await })
        .retry(&ExponentialBuilder::default().with_max_times(3))
        .await;

    let pods = match pods {
        Ok(pods) => pods,
        Err(err) => {
            debug!(%err, service = %config.tds_service_name, "could not list TDS pods");
            return None;
        }
    };

    for pod in pods.iter().rev() {
        let statuses = pod
            .status
            .as_ref()
            .and_then(|s| s.container_statuses.as_ref());
        if let Some(statuses) = statuses {
            for status in statuses {
                if let Some((_, tag)) = status.image.rsplit_once(':') {
                    if !tag.is_empty() {
                        return Some(tag.to_string());
                    }
                }
            }
        }
    }
    debug!(service = %config.tds_service_name, "no tagged TDS pod found");
    None
}

/// Full deployment path: discover the TDS, bind the request, create the BOM.
pub async fn deploy(
    req: JobDeploymentRequest,
    config: LcmConfig,
    client: &dyn LcmKubeClient,
) -> Result<()> {
    let tds_tag = find_training_data_service_tag(client, &config).await;
    let training = Training::new(req, config, tds_tag)?;
    training.start(client).await
}

/// All request env vars as k8s EnvVars, in stable name order.
fn extract_env_vars_from_request(req: &JobDeploymentRequest) -> Vec<EnvVar> {
    let sorted: BTreeMap<_, _> = req.env_vars.iter().collect();
    sorted
        .into_iter()
        .map(|(name, value)| EnvVar {
            name: name.clone(),
            value: Some(value.clone()),
            ..Default::default()
        })
        .collect()
}

fn merge_labels(metadata: &mut ObjectMeta, labels: &BTreeMap<String, String>) {
    let target = metadata.labels.get_or_insert_with(Default::default);
    for (key, value) in labels {
        target.entry(key.clone()).or_insert_with(|| value.clone());
    }
}
