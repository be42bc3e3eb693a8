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

//! Volume planning: object-store FUSE mounts, shared memory, ssh certs for
//! the learner; the scratch, etcd and TLS volumes for the helpers.

use crate::domain::config::LcmConfig;
use crate::domain::request::JobDeploymentRequest;
use crate::infrastructure::constants::*;
use crate::infrastructure::kubernetes::resources::sshcerts;
use k8s_openapi::api::core::v1::{
    EmptyDirVolumeSource, EnvVar, FlexVolumeSource, LocalObjectReference, PersistentVolumeClaim,
    PersistentVolumeClaimSpec, PersistentVolumeClaimVolumeSource, SecretVolumeSource, Volume,
    VolumeMount, VolumeResourceRequirements,
};
use k8s_openapi::apimachinery::pkg::api::resource::Quantity;
use k8s_openapi::apimachinery::pkg::apis::meta::v1::ObjectMeta;
use std::collections::BTreeMap;
use tracing::{debug, info};

#[derive(Debug, Clone, Default)]
pub struct VolumeMountSpec {
    pub mount_path: String,
    pub sub_path: String,
}

/// One object-store bucket mounted through the FUSE flex driver.
#[derive(Debug, Clone)]
pub struct CosVolume {
    pub id: String,
    pub region: String,
    pub bucket: String,
    pub endpoint: String,
    pub secret_ref: String,
    pub cache_size_gb: String,
    pub disk_free_mb: String,
    pub mount_spec: VolumeMountSpec,
}

#[derive(Debug, Clone)]
pub struct ShmVolume {
    pub id: String,
    pub size_bytes: i64,
    pub mount_spec: VolumeMountSpec,
}

#[derive(Debug, Clone)]
pub struct SshVolume {
    pub id: String,
    pub secret_name: String,
    pub mount_spec: VolumeMountSpec,
}

/// The volumes mounted into the learner container.
#[derive(Debug, Clone, Default)]
pub struct LearnerVolumes {
    pub ssh: Option<SshVolume>,
    pub shm: Option<ShmVolume>,
    pub training_data: Vec<CosVolume>,
    pub results_dir: Option<CosVolume>,
}

impl LearnerVolumes {
    pub fn create_volumes(&self) -> Vec<Volume> {
        let mut specs = Vec::new();
        if let Some(ref shm) = self.shm {
            specs.push(generate_shm_volume(shm));
        }
        if let Some(ref ssh) = self.ssh {
            specs.push(Volume {
                name: ssh.id.clone(),
                secret: Some(SecretVolumeSource {
                    secret_name: Some(ssh.secret_name.clone()),
                    ..Default::default()
                }),
                ..Default::default()
            });
        }
        for cos in &self.training_data {
            specs.push(generate_cos_volume(cos, TRAINING_DATA_TUNING));
        }
        if let Some(ref results) = self.results_dir {
            specs.push(generate_cos_volume(results, RESULTS_TUNING));
        }
        specs
    }

    pub fn create_volume_mounts(&self) -> Vec<VolumeMount> {
        let mut mounts = Vec::new();
        if let Some(ref shm) = self.shm {
            mounts.push(generate_volume_mount(&shm.id, &shm.mount_spec));
        }
        if let Some(ref ssh) = self.ssh {
            mounts.push(generate_volume_mount(&ssh.id, &ssh.mount_spec));
        }
        for cos in &self.training_data {
            mounts.push(generate_volume_mount(&cos.id, &cos.mount_spec));
        }
        if let Some(ref results) = self.results_dir {
            mounts.push(generate_volume_mount(&results.id, &results.mount_spec));
        }
        mounts
    }
}

/// Tuning profile for a FUSE mount; values beyond the per-volume cache and
/// disk-free knobs are fixed by benchmarking.
struct CosTuning {
    chunk_size_mb: &'static str,
    parallel_count: &'static str,
    kernel_cache: &'static str,
}

const TRAINING_DATA_TUNING: CosTuning = CosTuning {
    chunk_size_mb: "52",
    parallel_count: "20", // at least expected file size / chunk size
    kernel_cache: "true",
};

const RESULTS_TUNING: CosTuning = CosTuning {
    chunk_size_mb: "52",
    parallel_count: "5", // suitable for writing checkpoints and logs
    kernel_cache: "false",
};

/// Plan the learner volumes from the request flags. The mount paths for the
/// bucket volumes come out of the already-populated learner env vars.
pub fn volumes_for_learner(
    req: &JobDeploymentRequest,
    learner_env_vars: &[EnvVar],
    mount_training_data: bool,
    mount_results: bool,
    config: &LcmConfig,
) -> LearnerVolumes {
    let mut volumes = LearnerVolumes::default();

    if sshcerts::needs_mounted_ssh_certs(&req.framework, &req.version) {
        volumes.ssh = Some(SshVolume {
            id: format!("sshcertmount-{}", req.name),
            secret_name: format!("jobsshcert-{}", req.name),
            mount_spec: VolumeMountSpec {
                mount_path: SSH_CERTS_MOUNT_PATH.to_string(),
                sub_path: String::new(),
            },
        });
    }

    let shm_size = shm_volume_size(&req.framework);
    if shm_size > 0 {
        volumes.shm = Some(ShmVolume {
            id: format!("shmvolume-{}", req.name),
            size_bytes: shm_size,
            mount_spec: VolumeMountSpec {
                mount_path: SHM_MOUNT_PATH.to_string(),
                sub_path: String::new(),
            },
        });
    }

    if mount_training_data {
        volumes.training_data = training_data_volumes(req, learner_env_vars, config);
    }

    if mount_results {
        let mut region = req.env_value("RESULT_STORE_REGION").to_string();
        if region.is_empty() {
            region = COS_DEFAULT_REGION.to_string();
        }
        let result_bucket_dir = env_value(learner_env_vars, "RESULT_BUCKET_DIR");
        // Drop the mount prefix of the path, keeping only the bucket name.
        let bucket = result_bucket_dir
            .rsplit('/')
            .next()
            .unwrap_or_default()
            .to_string();
        volumes.results_dir = Some(CosVolume {
            id: format!("cosoutputmount-{}", req.name),
            region,
            bucket,
            endpoint: req.env_value("RESULT_STORE_AUTHURL").to_string(),
            secret_ref: format!("cossecretresults-{}", req.name),
            cache_size_gb: "0".to_string(),
            disk_free_mb: "2048".to_string(),
            mount_spec: VolumeMountSpec {
                mount_path: result_bucket_dir,
                sub_path: String::new(),
            },
        });
    }

    volumes
}

fn training_data_volumes(
    req: &JobDeploymentRequest,
    learner_env_vars: &[EnvVar],
    config: &LcmConfig,
) -> Vec<CosVolume> {
    let mut region = req.env_value("DATA_STORE_REGION").to_string();
    if region.is_empty() {
        region = COS_DEFAULT_REGION.to_string();
    }

    let buckets = datastore_buckets(req);
    if buckets.is_empty() {
        return Vec::new();
    }

    let cache_size = config.cache_gb_per_gpu() * req.resources.gpus;
    // Reserve a third of the cache for prefetching, up to a limit
    // (disk free is in MB, cache in GB).
    let disk_free = ((cache_size * 1024) / 3).min(10_000);
    let cache_per_bucket = cache_size / buckets.len() as i64;

    let mut volumes = Vec::new();
    for (key, bucket) in buckets {
        let (id, data_dir_key) = if key == "DATA_STORE_OBJECTID" {
            (format!("cosinputmount-{}", req.name), "DATA_DIR".to_string())
        } else {
            let identifier = key.trim_start_matches("DATA_STORE_OBJECTID_");
            (
                format!("cosinputmount-{}-{}", identifier.to_lowercase(), req.name),
                format!("DATA_DIR_{}", identifier),
            )
        };
        volumes.push(CosVolume {
            id,
            region: region.clone(),
            bucket,
            endpoint: req.env_value("DATA_STORE_AUTHURL").to_string(),
            secret_ref: format!("cossecretdata-{}", req.name),
            cache_size_gb: cache_per_bucket.to_string(),
            disk_free_mb: disk_free.to_string(),
            mount_spec: VolumeMountSpec {
                mount_path: env_value(learner_env_vars, &data_dir_key),
                sub_path: String::new(),
            },
        });
    }
    volumes
}

/// Every env key naming a training-data bucket, in deterministic order.
pub fn datastore_buckets(req: &JobDeploymentRequest) -> Vec<(String, String)> {
    let mut buckets: BTreeMap<String, String> = BTreeMap::new();
    for (key, value) in &req.env_vars {
        if key == "DATA_STORE_OBJECTID" || key.starts_with("DATA_STORE_OBJECTID_") {
            buckets.insert(key.clone(), value.clone());
        }
    }
    buckets.into_iter().collect()
}

/// Shared memory for frameworks that use it heavily; 0 keeps the runtime
/// default.
pub fn shm_volume_size(framework: &str) -> i64 {
    if framework.eq_ignore_ascii_case("pytorch") {
        SHM_VOLUME_SIZE_BYTES
    } else {
        0
    }
}

fn generate_shm_volume(shm: &ShmVolume) -> Volume {
    Volume {
        name: shm.id.clone(),
        empty_dir: Some(EmptyDirVolumeSource {
            medium: Some("Memory".to_string()),
            size_limit: Some(Quantity(shm.size_bytes.to_string())),
        }),
        ..Default::default()
    }
}

fn generate_cos_volume(cos: &CosVolume, tuning: CosTuning) -> Volume {
    let mut options = BTreeMap::new();
    options.insert("bucket".to_string(), cos.bucket.clone());
    options.insert("endpoint".to_string(), cos.endpoint.clone());
    options.insert("region".to_string(), cos.region.clone());
    // Amount of host memory to use for cache
    options.insert("cache-size-gb".to_string(), cos.cache_size_gb.clone());
    options.insert("chunk-size-mb".to_string(), tuning.chunk_size_mb.to_string());
    options.insert(
        "parallel-count".to_string(),
        tuning.parallel_count.to_string(),
    );
    // Don't completely fill the cache, leave buffer for parallel thread pulls
    options.insert("ensure-disk-free".to_string(), cos.disk_free_mb.clone());
    options.insert("tls-cipher-suite".to_string(), "DEFAULT".to_string());
    options.insert("multireq-max".to_string(), "20".to_string());
    options.insert("stat-cache-size".to_string(), "100000".to_string());
    options.insert("kernel-cache".to_string(), tuning.kernel_cache.to_string());
    options.insert("debug-level".to_string(), "warn".to_string());
    options.insert("curl-debug".to_string(), "false".to_string());
    // 4 second delay between retries * 30 = 2min
    options.insert("s3fs-fuse-retry-count".to_string(), "30".to_string());

    Volume {
        name: cos.id.clone(),
        flex_volume: Some(FlexVolumeSource {
            driver: COS_MOUNT_DRIVER_NAME.to_string(),
            fs_type: None,
            secret_ref: Some(LocalObjectReference {
                name: cos.secret_ref.clone(),
            }),
            read_only: Some(false),
            options: Some(options),
        }),
        ..Default::default()
    }
}

fn generate_volume_mount(id: &str, spec: &VolumeMountSpec) -> VolumeMount {
    VolumeMount {
        name: id.to_string(),
        mount_path: spec.mount_path.clone(),
        sub_path: if spec.sub_path.is_empty() {
            None
        } else {
            Some(spec.sub_path.clone())
        },
        ..Default::default()
    }
}

/// The shared scratch volume binding helpers and learners together.
#[derive(Debug, Clone)]
pub enum SharedVolume {
    /// In-pod scratch; helpers and learner share one pod.
    NonSplit,
    /// Statically provisioned NFS claim configured for the deploy zone.
    SplitStatic { claim_name: String },
    /// Dynamically provisioned claim created as part of the BOM.
    SplitDynamic { claim: PersistentVolumeClaim },
}

/// Volumes mounted by the helper containers.
#[derive(Debug, Clone)]
pub struct HelperVolumes {
    pub shared: SharedVolume,
    training_id: String,
}

impl HelperVolumes {
    /// Topology selection: any shared-storage demand or a zone-static volume
    /// selects split mode, unless fluentd emetrics forces everything into
    /// one pod.
    pub fn plan(req: &JobDeploymentRequest, config: &LcmConfig) -> Self {
        let volume_size_mb = req.resources.storage_mb;
        debug!(volume_size_mb, "requested shared storage for job");
        let use_dynamic = volume_size_mb > 0;

        let static_volume = config.static_volume_for_zone(req.label_value("deploy_zone"));
        let use_static = !static_volume.is_empty();

        let use_split = (use_dynamic || use_static) && !config.fluentd_emetrics_enable;

        let shared = if !use_split {
            info!(training_id = %req.training_id, "deploying with non split topology");
            SharedVolume::NonSplit
        } else if use_static {
            info!(training_id = %req.training_id, volume = %static_volume,
                "using static external volume");
            SharedVolume::SplitStatic {
                claim_name: static_volume,
            }
        } else {
            info!(training_id = %req.training_id, claim = %req.name,
                "using dynamic external volume");
            SharedVolume::SplitDynamic {
                claim: construct_volume_claim(
                    &req.name,
                    &config.learner_namespace,
                    volume_size_mb,
                    &req.training_id,
                ),
            }
        };
        Self {
            shared,
            training_id: req.training_id.clone(),
        }
    }

    pub fn is_split(&self) -> bool {
        !matches!(self.shared, SharedVolume::NonSplit)
    }

    /// The PVC to create, when the plan provisions one dynamically.
    pub fn dynamic_claim(&self) -> Option<&PersistentVolumeClaim> {
        match self.shared {
            SharedVolume::SplitDynamic { ref claim } => Some(claim),
            _ => None,
        }
    }

    pub fn shared_volume(&self) -> Volume {
        match self.shared {
            SharedVolume::NonSplit => Volume {
                name: SHARED_VOLUME_NAME.to_string(),
                empty_dir: Some(EmptyDirVolumeSource::default()),
                ..Default::default()
            },
            SharedVolume::SplitStatic { ref claim_name } => {
                pvc_volume(claim_name)
            }
            SharedVolume::SplitDynamic { ref claim } => {
                pvc_volume(claim.metadata.name.as_deref().unwrap_or_default())
            }
        }
    }

    /// Every container of the job mounts the scratch dir at the same path,
    /// namespaced by training id inside the backing volume.
    pub fn shared_volume_mount(&self) -> VolumeMount {
        VolumeMount {
            name: SHARED_VOLUME_NAME.to_string(),
            mount_path: POD_LEVEL_JOB_DIR.to_string(),
            sub_path: Some(self.training_id.clone()),
            ..Default::default()
        }
    }

    pub fn etcd_cert_volume(&self) -> Volume {
        secret_volume(ETCD_CERT_VOLUME_NAME, ETCD_CERT_SECRET_NAME)
    }

    pub fn etcd_cert_volume_mount(&self) -> VolumeMount {
        VolumeMount {
            name: ETCD_CERT_VOLUME_NAME.to_string(),
            mount_path: ETCD_CERT_MOUNT_PATH.to_string(),
            read_only: Some(true),
            ..Default::default()
        }
    }

    pub fn ssl_cert_volume(&self) -> Volume {
        secret_volume(SSL_CERT_VOLUME_NAME, SSL_CERT_SECRET_NAME)
    }

    pub fn ssl_cert_volume_mount(&self) -> VolumeMount {
        VolumeMount {
            name: SSL_CERT_VOLUME_NAME.to_string(),
            mount_path: SSL_CERT_MOUNT_PATH.to_string(),
            read_only: Some(true),
            ..Default::default()
        }
    }
}

fn pvc_volume(claim_name: &str) -> Volume {
    Volume {
        name: SHARED_VOLUME_NAME.to_string(),
        persistent_volume_claim: Some(PersistentVolumeClaimVolumeSource {
            claim_name: claim_name.to_string(),
            ..Default::default()
        }),
        ..Default::default()
    }
}

fn secret_volume(volume_name: &str, secret_name: &str) -> Volume {
    Volume {
        name: volume_name.to_string(),
        secret: Some(SecretVolumeSource {
            secret_name: Some(secret_name.to_string()),
            ..Default::default()
        }),
        ..Default::default()
    }
}

fn construct_volume_claim(
    name: &str,
    namespace: &str,
    volume_size_mb: i64,
    training_id: &str,
) -> PersistentVolumeClaim {
    let mut labels = BTreeMap::new();
    labels.insert("training_id".to_string(), training_id.to_string());

    let mut requests = BTreeMap::new();
    requests.insert("storage".to_string(), Quantity(format!("{}Mi", volume_size_mb)));

    PersistentVolumeClaim {
        metadata: ObjectMeta {
            name: Some(name.to_string()),
            namespace: Some(namespace.to_string()),
            labels: Some(labels),
            ..Default::default()
        },
        spec: Some(PersistentVolumeClaimSpec {
            access_modes: Some(vec!["ReadWriteMany".to_string()]),
            resources: Some(VolumeResourceRequirements {
                requests: Some(requests),
                ..Default::default()
            }),
            ..Default::default()
        }),
        ..Default::default()
    }
}

/// Return the value of the named environment variable.
pub fn env_value(env_vars: &[EnvVar], name: &str) -> String {
    env_vars
        .iter()
        .find(|ev| ev.name == name)
        .and_then(|ev| ev.value.clone())
        .unwrap_or_default()
}

#[cfg(test)]
mod tests {
    use super::*;

    fn mounted_cos_request() -> JobDeploymentRequest {
        let mut req = JobDeploymentRequest::default();
        req.name = "job2".to_string();
        req.training_id = "training-abc".to_string();
        req.framework = "pytorch".to_string();
        req.version = "1.0".to_string();
        req.resources.gpus = 2;
        req.resources.learners = 4;
        for (k, v) in [
            ("DATA_STORE_TYPE", "mount_cos"),
            ("DATA_STORE_OBJECTID", "b1"),
            ("DATA_STORE_OBJECTID_AUX", "b2"),
            ("DATA_STORE_AUTHURL", "s3.example.com"),
            ("RESULT_STORE_TYPE", "mount_cos"),
            ("RESULT_STORE_OBJECTID", "results"),
            ("RESULT_STORE_AUTHURL", "s3.example.com"),
        ] {
            req.env_vars.insert(k.to_string(), v.to_string());
        }
        req
    }

    fn learner_env() -> Vec<EnvVar> {
        [
            ("DATA_DIR", "/cos/data"),
            ("DATA_DIR_AUX", "/cos/data-aux"),
            ("RESULT_BUCKET_DIR", "/mnt/results/resultbucket"),
        ]
        .iter()
        .map(|(name, value)| EnvVar {
            name: name.to_string(),
            value: Some(value.to_string()),
            ..Default::default()
        })
        .collect()
    }

    fn cache_config() -> LcmConfig {
        let mut config = LcmConfig::default();
        config.mountcos_gb_cache_per_gpu = "6".to_string();
        config
    }

    #[test]
    fn one_volume_per_bucket_key() {
        let req = mounted_cos_request();
        let volumes = volumes_for_learner(&req, &learner_env(), true, true, &cache_config());
        assert_eq!(volumes.training_data.len(), 2);
        assert!(volumes.results_dir.is_some());
        assert!(volumes.shm.is_some());
        assert!(volumes.ssh.is_some());

        // shm + ssh + two buckets + results
        assert_eq!(volumes.create_volumes().len(), 5);
        assert_eq!(volumes.create_volume_mounts().len(), 5);
    }

    #[test]
    fn cache_sizing_per_bucket() {
        let req = mounted_cos_request();
        let volumes = volumes_for_learner(&req, &learner_env(), true, true, &cache_config());
        // 6 GB/GPU * 2 GPUs over 2 buckets
        for cos in &volumes.training_data {
            assert_eq!(cos.cache_size_gb, "6");
            assert_eq!(cos.disk_free_mb, "4096");
        }
        let results = volumes.results_dir.unwrap();
        assert_eq!(results.cache_size_gb, "0");
        assert_eq!(results.disk_free_mb, "2048");
        assert_eq!(results.bucket, "resultbucket");
        assert_eq!(results.mount_spec.mount_path, "/mnt/results/resultbucket");
    }

    #[test]
    fn disk_free_is_capped() {
        let mut req = mounted_cos_request();
        req.resources.gpus = 16;
        let volumes = volumes_for_learner(&req, &learner_env(), true, false, &cache_config());
        // 6*16*1024/3 = 32768, capped at 10000
        assert_eq!(volumes.training_data[0].disk_free_mb, "10000");
    }

    #[test]
    fn flexvolume_tuning_profiles() {
        let req = mounted_cos_request();
        let volumes = volumes_for_learner(&req, &learner_env(), true, true, &cache_config());
        let specs = volumes.create_volumes();

        let data = specs
            .iter()
            .find(|v| v.name == "cosinputmount-job2")
            .unwrap();
        let options = data.flex_volume.as_ref().unwrap().options.as_ref().unwrap();
        assert_eq!(options["parallel-count"], "20");
        assert_eq!(options["kernel-cache"], "true");
        assert_eq!(options["chunk-size-mb"], "52");
        assert_eq!(options["s3fs-fuse-retry-count"], "30");
        assert_eq!(options["region"], "us-standard");
        assert_eq!(data.flex_volume.as_ref().unwrap().driver, "ibm/ibmc-s3fs");

        let results = specs
            .iter()
            .find(|v| v.name == "cosoutputmount-job2")
            .unwrap();
        let options = results.flex_volume.as_ref().unwrap().options.as_ref().unwrap();
        assert_eq!(options["parallel-count"], "5");
        assert_eq!(options["kernel-cache"], "false");
        assert_eq!(options["cache-size-gb"], "0");
        assert_eq!(options["ensure-disk-free"], "2048");
    }

    #[test]
    fn no_volumes_without_mount_flags() {
        let mut req = mounted_cos_request();
        req.framework = "tensorflow".to_string();
        req.version = "1.5".to_string();
        let volumes = volumes_for_learner(&req, &learner_env(), false, false, &cache_config());
        assert!(volumes.training_data.is_empty());
        assert!(volumes.results_dir.is_none());
        assert!(volumes.shm.is_none());
        assert!(volumes.ssh.is_none());
        assert!(volumes.create_volumes().is_empty());
    }

    #[test]
    fn topology_selection() {
        let mut req = mounted_cos_request();
        let mut config = cache_config();

        let helper = HelperVolumes::plan(&req, &config);
        assert!(!helper.is_split());

        req.resources.storage_mb = 10_240;
        let helper = HelperVolumes::plan(&req, &config);
        assert!(helper.is_split());
        let claim = helper.dynamic_claim().unwrap();
        assert_eq!(claim.metadata.name.as_deref(), Some("job2"));
        assert_eq!(
            claim.spec.as_ref().unwrap().access_modes.as_ref().unwrap()[0],
            "ReadWriteMany"
        );

        // A zone-static volume also selects split, without a dynamic claim.
        req.resources.storage_mb = 0;
        req.labels
            .insert("deploy_zone".to_string(), "dal13".to_string());
        config
            .static_volumes
            .insert("dal13".to_string(), "dlaas-jobs-nfs".to_string());
        let helper = HelperVolumes::plan(&req, &config);
        assert!(helper.is_split());
        assert!(helper.dynamic_claim().is_none());

        // Fluentd emetrics forces non-split.
        config.fluentd_emetrics_enable = true;
        let helper = HelperVolumes::plan(&req, &config);
        assert!(!helper.is_split());
    }

    #[test]
    fn shared_mount_is_namespaced_by_training_id() {
        let req = mounted_cos_request();
        let helper = HelperVolumes::plan(&req, &cache_config());
        let mount = helper.shared_volume_mount();
        assert_eq!(mount.mount_path, "/job");
        assert_eq!(mount.sub_path.as_deref(), Some("training-abc"));
    }
}
