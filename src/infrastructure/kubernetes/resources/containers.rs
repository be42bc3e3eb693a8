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

//! Builders for the helper containers of a learner pod: the controller
//! sidecar, the log collector, and the databrokers that stage data between
//! the external stores and the shared scratch directory.

use crate::domain::config::LcmConfig;
use crate::domain::request::JobDeploymentRequest;
use crate::infrastructure::constants::*;
use crate::infrastructure::kubernetes::resources::command::{skip_stage_prefix, wrap_command};
use crate::infrastructure::kubernetes::resources::image::{controller_image, databroker_image};
use k8s_openapi::api::core::v1::{
    Container, EnvVar, EnvVarSource, ObjectFieldSelector, ResourceRequirements, SecretKeySelector,
    VolumeMount,
};
use k8s_openapi::apimachinery::pkg::api::resource::Quantity;
use std::collections::BTreeMap;
use tracing::{debug, error};

/// Key-value store path under which one learner's state is tracked.
/// Learner IDs start at 1; the job monitor watches these paths.
pub fn learner_node_base_path(training_id: &str, learner_id: i32) -> String {
    format!("{}/learners/learner-{}", training_id, learner_id)
}

pub fn learner_node_status_path(training_id: &str, learner_id: i32) -> String {
    format!("{}/learners/learner-{}/status", training_id, learner_id)
}

pub fn job_base_path(training_id: &str) -> String {
    format!("{}/", training_id)
}

fn env_var(name: &str, value: impl Into<String>) -> EnvVar {
    EnvVar {
        name: name.to_string(),
        value: Some(value.into()),
        ..Default::default()
    }
}

fn downward_api_env_var(name: &str, field_path: &str) -> EnvVar {
    EnvVar {
        name: name.to_string(),
        value_from: Some(EnvVarSource {
            field_ref: Some(ObjectFieldSelector {
                field_path: field_path.to_string(),
                ..Default::default()
            }),
            ..Default::default()
        }),
        ..Default::default()
    }
}

fn env_var_from_lcm_secret(lookup_key: &str, secret_name: &str) -> EnvVar {
    EnvVar {
        name: lookup_key.to_string(),
        value_from: Some(EnvVarSource {
            secret_key_ref: Some(SecretKeySelector {
                key: lookup_key.to_string(),
                name: secret_name.to_string(),
                ..Default::default()
            }),
            ..Default::default()
        }),
        ..Default::default()
    }
}

/// Fixed request-equals-limit sizing for the sidecars.
fn sidecar_resources(milli_cpu: i64, mem_mb: i64) -> ResourceRequirements {
    let mut list = BTreeMap::new();
    list.insert("cpu".to_string(), Quantity(format!("{}m", milli_cpu)));
    list.insert("memory".to_string(), Quantity(format!("{}Mi", mem_mb)));
    ResourceRequirements {
        requests: Some(list.clone()),
        limits: Some(list),
        ..Default::default()
    }
}

/// Rebase a directory value under a mount point, Go path.Join style.
fn rebase_under(mount_path: &str, value: &str) -> String {
    format!(
        "{}/{}",
        mount_path.trim_end_matches('/'),
        value.trim_start_matches('/')
    )
}

/// The controller sidecar drives the rendezvous protocol: it writes the
/// `.start` files into the scratch directory once dependencies are
/// satisfied, and records learner status in the key-value store.
pub fn construct_controller_container(
    training_id: &str,
    etcd_volume_mount: &VolumeMount,
    shared_volume_mount: &VolumeMount,
    skip_store_data: bool,
    skip_store_results: bool,
    config: &LcmConfig,
) -> Container {
    let mut cmd = "controller.sh".to_string();

    // Short-circuit the load and store databrokers when object storage is
    // mounted directly into the learner.
    if skip_store_results {
        cmd = format!(
            "{}{}",
            skip_stage_prefix(STORE_RESULTS_CONTAINER_NAME, &shared_volume_mount.mount_path),
            cmd
        );
    }
    if skip_store_data {
        cmd = format!(
            "{}{}",
            skip_stage_prefix(LOAD_DATA_CONTAINER_NAME, &shared_volume_mount.mount_path),
            cmd
        );
    }

    Container {
        name: CONTROLLER_CONTAINER_NAME.to_string(),
        image: Some(controller_image(config)),
        command: Some(vec!["sh".to_string(), "-c".to_string(), cmd]),
        env: Some(vec![
            env_var("JOB_STATE_DIR", shared_volume_mount.mount_path.clone()),
            env_var(
                "JOB_LEARNER_ZNODE_PATH",
                learner_node_base_path(training_id, MASTER_LEARNER_ID),
            ),
            env_var("JOB_BASE_PATH", job_base_path(training_id)),
            env_var(
                "JOB_LEARNER_ZNODE_STATUS_PATH",
                learner_node_status_path(training_id, MASTER_LEARNER_ID),
            ),
            downward_api_env_var("DOWNWARD_API_POD_NAME", "metadata.name"),
            downward_api_env_var("DOWNWARD_API_POD_NAMESPACE", "metadata.namespace"),
            env_var_from_lcm_secret("DLAAS_ETCD_ADDRESS", &config.lcm_secret),
            env_var_from_lcm_secret("DLAAS_ETCD_USERNAME", &config.lcm_secret),
            env_var_from_lcm_secret("DLAAS_ETCD_PASSWORD", &config.lcm_secret),
            env_var_from_lcm_secret("DLAAS_ETCD_PREFIX", &config.lcm_secret),
        ]),
        resources: Some(sidecar_resources(CONTROLLER_MILLI_CPU, CONTROLLER_MEM_MB)),
        volume_mounts: Some(vec![
            etcd_volume_mount.clone(),
            shared_volume_mount.clone(),
        ]),
        image_pull_policy: Some(config.image_pull_policy()),
        ..Default::default()
    }
}

/// Resolve the log-collector image short name and tag from the request's
/// evaluation metrics spec. An unparseable spec is logged and downgraded to
/// the plain log collector; it never fails the deployment.
pub fn fetch_image_name_from_evaluation_metrics(
    eval_metrics_spec: &str,
    default_tag: &str,
) -> (String, String) {
    let mut short_name = SIMPLE_LOG_COLLECTOR_NAME.to_string();
    let mut tag = default_tag.to_string();

    if eval_metrics_spec.is_empty() {
        debug!("no evaluation metrics specified");
        return (short_name, tag);
    }

    let parsed: serde_yaml::Value = match serde_yaml::from_str(eval_metrics_spec) {
        Ok(v) => v,
        Err(err) => {
            // Assuming pre-validation, this is mostly a programmer assertion.
            error!(%err, "evaluation_metrics was specified in manifest, but can't be parsed");
            return (short_name, tag);
        }
    };

    let metrics = match parsed.get("evaluation_metrics") {
        Some(m) => m,
        None => {
            debug!("no evaluation metrics specified");
            return (short_name, tag);
        }
    };

    let requested_tag = metrics
        .get("image_tag")
        .or_else(|| metrics.get("imagetag"))
        .and_then(|v| v.as_str())
        .unwrap_or("");
    if !requested_tag.is_empty() {
        tag = requested_tag.to_string();
    }

    let image_type = metrics.get("type").and_then(|v| v.as_str()).unwrap_or("");
    match image_type {
        "" => error!("evaluation_metrics type is empty"),
        "optivist" | "emetrics_file" | "file" => {
            short_name = "emetrics_file_extractor".to_string();
        }
        "tensorboard" | "tensorboard_extractor" => {
            short_name = "tensorboard_extract".to_string();
        }
        "null" | "nil" | "logger" | "none" => {
            short_name = SIMPLE_LOG_COLLECTOR_NAME.to_string();
        }
        other => short_name = other.to_string(),
    }

    (short_name, tag)
}

/// The optional sidecar streaming training metrics to the training-data
/// service. Only built when a TDS pod was found; its running image tag is
/// the default log-collector tag.
pub fn construct_log_collector(
    ssl_cert_volume_mount: Option<&VolumeMount>,
    shared_volume_mount: &VolumeMount,
    tds_tag: &str,
    req: &JobDeploymentRequest,
    env_vars: &[EnvVar],
    config: &LcmConfig,
) -> Container {
    let (short_name, tag) =
        fetch_image_name_from_evaluation_metrics(&req.evaluation_metrics_spec, tds_tag);
    let image = format!("{}/{}:{}", config.learner_registry, short_name, tag);

    // Adjust the *_DIR paths to live under the mount point.
    let mut vars: Vec<EnvVar> = env_vars
        .iter()
        .map(|ev| {
            if ev.name.ends_with("_DIR") {
                env_var(
                    &ev.name,
                    rebase_under(
                        &shared_volume_mount.mount_path,
                        ev.value.as_deref().unwrap_or(""),
                    ),
                )
            } else {
                ev.clone()
            }
        })
        .collect();

    vars.push(env_var("JOB_STATE_DIR", shared_volume_mount.mount_path.clone()));
    vars.push(env_var("TRAINING_DATA_NAMESPACE", config.pod_namespace.clone()));
    vars.push(env_var(
        "TRAINING_DATA_SERVICE_NAME",
        config.tds_service_name.clone(),
    ));
    if !req.evaluation_metrics_spec.is_empty() {
        vars.push(env_var("EM_DESCRIPTION", req.evaluation_metrics_spec.clone()));
    }

    let mut volume_mounts = vec![shared_volume_mount.clone()];
    if let Some(ssl_mount) = ssl_cert_volume_mount {
        volume_mounts.push(ssl_mount.clone());
    }

    Container {
        name: LOG_COLLECTOR_CONTAINER_NAME.to_string(),
        image: Some(image),
        command: Some(vec![
            "bash".to_string(),
            "-c".to_string(),
            "/scripts/run.sh".to_string(),
        ]),
        env: Some(vars),
        resources: Some(sidecar_resources(
            LOG_COLLECTOR_MILLI_CPU,
            LOG_COLLECTOR_MEM_MB,
        )),
        volume_mounts: Some(volume_mounts),
        image_pull_policy: Some(config.image_pull_policy()),
        ..Default::default()
    }
}

/// Databroker staging the training data into the scratch directory.
/// Carries every DATA_STORE_* variable, with the api key renamed to the
/// broker's password variable and the bucket ids folded into
/// DATA_STORE_BUCKET; DATA_DIR* values are rebased under scratch.
pub fn construct_load_training_data_container(
    shared_volume_mount: &VolumeMount,
    job_env_vars: &[EnvVar],
    config: &LcmConfig,
) -> Container {
    let mut vars = Vec::with_capacity(job_env_vars.len());
    for ev in job_env_vars {
        let value = ev.value.clone().unwrap_or_default();
        if ev.name.starts_with("DATA_STORE_") {
            if ev.name == "DATA_STORE_APIKEY" {
                vars.push(env_var("DATA_STORE_PASSWORD", value));
            } else if ev.name.starts_with("DATA_STORE_OBJECTID") {
                vars.push(env_var("DATA_STORE_BUCKET", value));
            } else {
                vars.push(ev.clone());
            }
        } else if ev.name.starts_with("DATA_DIR") {
            vars.push(env_var(
                &ev.name,
                rebase_under(&shared_volume_mount.mount_path, &value),
            ));
        }
    }

    let command = format!("load.sh |tee -a {}/load-data.log", POD_LEVEL_LOG_DIR);
    let cmd = wrap_command(
        &command,
        LOAD_DATA_CONTAINER_NAME,
        &shared_volume_mount.mount_path,
        false,
    );

    databroker_container(
        LOAD_DATA_CONTAINER_NAME,
        cmd,
        vars,
        shared_volume_mount,
        sidecar_resources(LOAD_DATA_MILLI_CPU, LOAD_DATA_MEM_MB),
        config,
    )
}

/// Databroker staging the submitted model. MODEL_STORE_* variables are
/// renamed into the broker's DATA_STORE_* contract; MODEL_DIR becomes its
/// DATA_DIR, rebased under scratch.
pub fn construct_load_model_container(
    shared_volume_mount: &VolumeMount,
    job_env_vars: &[EnvVar],
    config: &LcmConfig,
) -> Container {
    let mut vars = vec![
        downward_api_env_var("DOWNWARD_API_POD_NAME", "metadata.name"),
        downward_api_env_var("DOWNWARD_API_POD_NAMESPACE", "metadata.namespace"),
    ];
    for ev in job_env_vars {
        let value = ev.value.clone().unwrap_or_default();
        if ev.name.starts_with("MODEL_STORE_") {
            let name = ev.name.replacen("MODEL_STORE_", "DATA_STORE_", 1);
            if name == "DATA_STORE_APIKEY" {
                vars.push(env_var("DATA_STORE_PASSWORD", value));
            } else if name == "DATA_STORE_OBJECTID" {
                vars.push(env_var("DATA_STORE_OBJECT", value));
            } else {
                vars.push(env_var(&name, value));
            }
        } else if ev.name == "MODEL_DIR" {
            vars.push(env_var(
                "DATA_DIR",
                rebase_under(&shared_volume_mount.mount_path, &value),
            ));
        }
    }

    let cmd = wrap_command(
        "loadmodel.sh",
        LOAD_MODEL_CONTAINER_NAME,
        &shared_volume_mount.mount_path,
        false,
    );

    databroker_container(
        LOAD_MODEL_CONTAINER_NAME,
        cmd,
        vars,
        shared_volume_mount,
        sidecar_resources(LOAD_MODEL_MILLI_CPU, LOAD_MODEL_MEM_MB),
        config,
    )
}

pub fn construct_store_results_container(
    shared_volume_mount: &VolumeMount,
    job_env_vars: &[EnvVar],
    config: &LcmConfig,
) -> Container {
    construct_store_container(
        STORE_RESULTS_CONTAINER_NAME,
        "store.sh",
        shared_volume_mount,
        job_env_vars,
        config,
    )
}

/// Like store-results, but writes into the master learner's directory in
/// the bucket and reads the pod-level log dir.
pub fn construct_store_logs_container(
    shared_volume_mount: &VolumeMount,
    job_env_vars: &[EnvVar],
    config: &LcmConfig,
) -> Container {
    let mut container = construct_store_container(
        STORE_LOGS_CONTAINER_NAME,
        "store.sh",
        shared_volume_mount,
        job_env_vars,
        config,
    );

    if let Some(env) = container.env.as_mut() {
        for ev in env.iter_mut() {
            if ev.name == "DATA_STORE_BUCKET" {
                let bucket = ev.value.clone().unwrap_or_default();
                ev.value = Some(format!("{}/learner-{}", bucket, MASTER_LEARNER_ID));
            } else if ev.name == "DATA_DIR" {
                ev.value = Some(format!("{}/logs", shared_volume_mount.mount_path));
            }
        }
    }
    container
}

fn construct_store_container(
    container_name: &str,
    command: &str,
    shared_volume_mount: &VolumeMount,
    job_env_vars: &[EnvVar],
    config: &LcmConfig,
) -> Container {
    let mut vars = vec![
        downward_api_env_var("DOWNWARD_API_POD_NAME", "metadata.name"),
        downward_api_env_var("DOWNWARD_API_POD_NAMESPACE", "metadata.namespace"),
    ];
    for ev in job_env_vars {
        let value = ev.value.clone().unwrap_or_default();
        if ev.name.starts_with("RESULT_STORE_") {
            let name = ev.name.replacen("RESULT_STORE_", "DATA_STORE_", 1);
            if name == "DATA_STORE_APIKEY" {
                vars.push(env_var("DATA_STORE_PASSWORD", value));
            } else if name == "DATA_STORE_OBJECTID" {
                vars.push(env_var("DATA_STORE_BUCKET", value));
            } else {
                vars.push(env_var(&name, value));
            }
        } else if ev.name == "RESULT_DIR" {
            vars.push(env_var(
                "DATA_DIR",
                rebase_under(&shared_volume_mount.mount_path, &value),
            ));
        }
    }

    let cmd = wrap_command(
        command,
        container_name,
        &shared_volume_mount.mount_path,
        false,
    );

    databroker_container(
        container_name,
        cmd,
        vars,
        shared_volume_mount,
        sidecar_resources(STORE_RESULTS_MILLI_CPU, STORE_RESULTS_MEM_MB),
        config,
    )
}

fn databroker_container(
    name: &str,
    cmd: String,
    vars: Vec<EnvVar>,
    shared_volume_mount: &VolumeMount,
    resources: ResourceRequirements,
    config: &LcmConfig,
) -> Container {
    Container {
        name: name.to_string(),
        image: Some(databroker_image_name(&vars, config)),
        command: Some(vec!["sh".to_string(), "-c".to_string(), cmd]),
        resources: Some(resources),
        volume_mounts: Some(vec![shared_volume_mount.clone()]),
        env: Some(vars),
        image_pull_policy: Some(config.image_pull_policy()),
        ..Default::default()
    }
}

/// The databroker image for this set of variables, keyed by the store type.
/// Types arrive either as short names or with a `_datastore` suffix.
pub fn databroker_image_name(vars: &[EnvVar], config: &LcmConfig) -> String {
    let mut databroker_type = DEFAULT_DATABROKER_TYPE;
    if let Some(store_type) = vars
        .iter()
        .find(|ev| ev.name == "DATA_STORE_TYPE")
        .and_then(|ev| ev.value.as_deref())
    {
        let stripped = store_type.strip_suffix("_datastore").unwrap_or(store_type);
        if VALID_DATABROKER_TYPES.contains(&stripped) {
            databroker_type = stripped;
        }
    }
    databroker_image(databroker_type, config)
}
