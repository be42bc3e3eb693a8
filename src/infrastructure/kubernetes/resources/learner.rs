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

//! The learner container and the workload objects wrapping it: pod template,
//! headless service, stateful set and the split-mode helper deployment.

use crate::domain::config::LcmConfig;
use crate::domain::request::JobDeploymentRequest;
use crate::infrastructure::constants::*;
use crate::infrastructure::kubernetes::resources::command::{
    wrap_command, wrap_commands, ContainerCommand,
};
use crate::infrastructure::kubernetes::resources::image::{resolve_learner_image, LearnerImage};
use k8s_openapi::api::apps::v1::{
    Deployment, DeploymentSpec, StatefulSet, StatefulSetSpec,
};
use k8s_openapi::api::core::v1::{
    Affinity, Capabilities, Container, ContainerPort, EnvVar, EnvVarSource, LocalObjectReference,
    NodeAffinity, NodeSelector, NodeSelectorRequirement, NodeSelectorTerm, ObjectFieldSelector,
    PodSpec, PodTemplateSpec, ResourceRequirements, SecurityContext, Service, ServicePort,
    ServiceSpec, Toleration, Volume, VolumeMount,
};
use k8s_openapi::apimachinery::pkg::api::resource::Quantity;
use k8s_openapi::apimachinery::pkg::apis::meta::v1::{LabelSelector, ObjectMeta};
use k8s_openapi::apimachinery::pkg::util::intstr::IntOrString;
use std::collections::BTreeMap;
use tracing::debug;

const UNSET_PLATFORM_ENV: &str = "for i in ${!ALERTMANAGER*} ${!DLAAS*} ${!ETCD*} ${!GRAFANA*} ${!HOSTNAME*} ${!KUBERNETES*} ${!MONGO*} ${!PUSHGATEWAY*}; do unset $i; done;";

/// Env vars seen by the learner container: the request vars with directory
/// paths adjusted for the data plane, plus the job identity variables and
/// the downward-API pod name the wrapper derives LEARNER_ID from.
pub fn populate_learner_env_vars(
    base: &[EnvVar],
    training_id: &str,
    num_learners: i32,
    statefulset_name: &str,
    mount_training_data: bool,
    mount_results: bool,
) -> Vec<EnvVar> {
    let mut vars: Vec<EnvVar> = base
        .iter()
        .map(|ev| {
            let value = ev.value.clone().unwrap_or_default();
            // Staged directories live under the scratch mount; mounted
            // buckets keep their own paths.
            if (ev.name.starts_with("DATA_DIR") && !mount_training_data)
                || (ev.name == "RESULT_DIR" && !mount_results)
            {
                EnvVar {
                    name: ev.name.clone(),
                    value: Some(format!(
                        "{}/{}",
                        POD_LEVEL_JOB_DIR,
                        value.trim_start_matches('/')
                    )),
                    ..Default::default()
                }
            } else {
                ev.clone()
            }
        })
        .collect();

    let mut push_if_absent = |name: &str, value: String| {
        if !vars.iter().any(|ev| ev.name == name) {
            vars.push(EnvVar {
                name: name.to_string(),
                value: Some(value),
                ..Default::default()
            });
        }
    };
    push_if_absent("TRAINING_ID", training_id.to_string());
    push_if_absent("NUM_LEARNERS", num_learners.to_string());
    push_if_absent("JOB_NAME", statefulset_name.to_string());
    push_if_absent("JOB_STATE_DIR", POD_LEVEL_JOB_DIR.to_string());
    push_if_absent("LOG_DIR", POD_LEVEL_LOG_DIR.to_string());
    push_if_absent("CHECKPOINT_DIR", format!("{}/checkpoints", POD_LEVEL_JOB_DIR));

    vars.push(EnvVar {
        name: "DOWNWARD_API_POD_NAME".to_string(),
        value_from: Some(EnvVarSource {
            field_ref: Some(ObjectFieldSelector {
                field_path: "metadata.name".to_string(),
                ..Default::default()
            }),
            ..Default::default()
        }),
        ..Default::default()
    });
    vars
}

/// Assemble the learner container. The command shape depends on the data
/// plane: with mounted stores the single container plays the load-model,
/// learner and store-logs roles in sequence; otherwise the databroker
/// sidecars do the staging and the learner only trains.
#[allow(clippy::too_many_arguments)]
pub fn construct_learner_container(
    req: &JobDeploymentRequest,
    env_vars: Vec<EnvVar>,
    learner_volume_mounts: &[VolumeMount],
    shared_volume_mount: &VolumeMount,
    mount_training_data: bool,
    mount_results: bool,
    use_log_collector: bool,
    config: &LcmConfig,
) -> Container {
    let scratch = &shared_volume_mount.mount_path;

    let mut image = LearnerImage {
        framework: req.framework.clone(),
        version: req.version.clone(),
        tag: req.image_tag.clone(),
        ..Default::default()
    };

    // The stock entrypoint; custom images evaluate the user's command in
    // the model directory instead.
    let mut learner_bash_command =
        "bash -c 'train.sh >> $JOB_STATE_DIR/latest-log 2>&1 ; exit ${PIPESTATUS[0]}'".to_string();
    if let Some(ref location) = req.image_location {
        image.registry = location.registry.clone();
        image.namespace = location.namespace.clone();
        learner_bash_command = r#"
cd "$MODEL_DIR" ;
export PYTHONPATH=$PWD ;
echo "$(date): Starting training job" > $JOB_STATE_DIR/latest-log ;
eval "$TRAINING_COMMAND 2>&1" >> $JOB_STATE_DIR/latest-log 2>&1 ;
cmd_exit=$? ;
echo "$(date): Training exit with exit code ${cmd_exit}." >> $JOB_STATE_DIR/latest-log 2>&1 ;
bash -c 'exit ${cmd_exit}'"#
            .to_string();
    }

    let cmd = if mount_training_data {
        let mut load_model_command = "echo \"Starting Training $TRAINING_ID\"".to_string();
        let mut learner_command = UNSET_PLATFORM_ENV.to_string();
        let mut store_logs_command = "bash -c 'exit 0'".to_string();

        if mount_results {
            load_model_command.push_str(
                "\nmkdir -p \"$MODEL_DIR\"\n\
                 unzip -nq \"$RESULT_DIR/_submitted_code/model.zip\" -d \"$MODEL_DIR\"",
            );
            // Learner IDs are the stateful-set ordinal plus one. Logs sync
            // to the result bucket in the background while training runs.
            learner_command.push_str(
                r#"
export LEARNER_ID=$((${DOWNWARD_API_POD_NAME##*-} + 1)) ;
mkdir -p $RESULT_DIR/learner-$LEARNER_ID ;
mkdir -p $CHECKPOINT_DIR ;
RESULT_STORE_PUBLIC_AUTHURL=$(echo $RESULT_STORE_AUTHURL | sed -e 's/service.networklayer.com/softlayer.net/g' | sed -e 's/.private//g')
echo Starting log sync
syncLogs(){
    while true; do
    AWS_ACCESS_KEY_ID=$RESULT_STORE_USERNAME AWS_SECRET_ACCESS_KEY=$RESULT_STORE_APIKEY \
timeout -s 3 20 aws --endpoint-url=$RESULT_STORE_PUBLIC_AUTHURL s3 sync $LOG_DIR s3://$RESULT_STORE_OBJECTID/learner-$LEARNER_ID
    sleep 40
done
}
syncLogs & "#,
            );
            store_logs_command = r#"
mv -nf $LOG_DIR/* $RESULT_DIR/learner-$LEARNER_ID ;
ERROR_CODE=$? ;
echo $ERROR_CODE > $RESULT_DIR/learner-$LEARNER_ID/.log-copy-complete ;
bash -c 'exit $ERROR_CODE'"#
                .to_string();
        }
        if !use_log_collector {
            learner_command.push_str("echo 0 > $JOB_STATE_DIR/lc.exit ;");
        }
        learner_command.push_str(&learner_bash_command);

        wrap_commands(
            &[
                ContainerCommand {
                    container: LOAD_MODEL_CONTAINER_NAME,
                    cmd: load_model_command,
                },
                ContainerCommand {
                    container: LEARNER_CONTAINER_NAME,
                    cmd: learner_command,
                },
                ContainerCommand {
                    container: STORE_LOGS_CONTAINER_NAME,
                    cmd: store_logs_command,
                },
            ],
            scratch,
        )
    } else {
        let command = format!(
            "{} mkdir -p $RESULT_DIR ; {}",
            UNSET_PLATFORM_ENV, learner_bash_command
        );
        wrap_command(&command, LEARNER_CONTAINER_NAME, scratch, false)
    };

    let mut mounts = learner_volume_mounts.to_vec();
    mounts.push(shared_volume_mount.clone());

    let mut container = create_container_spec(
        &image,
        req.resources.cpus,
        req.resources.memory_mb,
        req.resources.gpus,
        mounts,
        env_vars,
        &cmd,
        req.label_value("kube_major"),
        req.label_value("kube_minor"),
        config,
    );
    if config.ffdl_extended_enabled {
        extend_learner_container(&mut container, req);
    }
    container
}

/// Extension hook for platform builds carrying extra learner plumbing.
fn extend_learner_container(container: &mut Container, req: &JobDeploymentRequest) {
    debug!(
        training_id = %req.training_id,
        container = %container.name,
        "extended learner hook enabled, no extensions registered"
    );
}

#[allow(clippy::too_many_arguments)]
fn create_container_spec(
    image: &LearnerImage,
    cpus: f64,
    memory_mb: i64,
    gpus: i64,
    mounts: Vec<VolumeMount>,
    env_vars: Vec<EnvVar>,
    cmd: &str,
    kube_major: &str,
    kube_minor: &str,
    config: &LcmConfig,
) -> Container {
    let image_ref = resolve_learner_image(image, config);
    let cpu_count = Quantity(format!("{}m", (cpus * 1000.0) as i64));
    let mem_count = Quantity(format!("{}Mi", memory_mb));
    let gpu_count = Quantity(gpus.to_string());
    let resources =
        generate_resource_requirements(cpu_count, mem_count, gpu_count, kube_major, kube_minor);

    Container {
        name: LEARNER_CONTAINER_NAME.to_string(),
        image: Some(image_ref),
        image_pull_policy: Some(config.image_pull_policy()),
        command: Some(vec![
            "bash".to_string(),
            "-c".to_string(),
            cmd.to_string(),
        ]),
        env: Some(env_vars),
        ports: Some(vec![
            ContainerPort {
                container_port: SSH_PORT,
                protocol: Some("TCP".to_string()),
                ..Default::default()
            },
            ContainerPort {
                container_port: WORKER_PORT,
                protocol: Some("TCP".to_string()),
                ..Default::default()
            },
        ]),
        resources: Some(resources),
        volume_mounts: Some(mounts),
        security_context: Some(SecurityContext {
            capabilities: Some(Capabilities {
                drop: Some(
                    LEARNER_DROPPED_CAPABILITIES
                        .iter()
                        .map(|c| c.to_string())
                        .collect(),
                ),
                ..Default::default()
            }),
            ..Default::default()
        }),
        ..Default::default()
    }
}

/// The GPU resource key moved off the alpha name in kube 1.11.
pub fn gpu_resource_key(kube_major: &str, kube_minor: &str) -> &'static str {
    let major: i32 = kube_major.trim().parse().unwrap_or(0);
    let minor: i32 = kube_minor.trim().trim_end_matches('+').parse().unwrap_or(0);
    if major == 1 && minor <= 10 {
        GPU_RESOURCE_KEY_ALPHA
    } else {
        GPU_RESOURCE_KEY
    }
}

fn generate_resource_requirements(
    cpus: Quantity,
    memory: Quantity,
    gpus: Quantity,
    kube_major: &str,
    kube_minor: &str,
) -> ResourceRequirements {
    let mut list = BTreeMap::new();
    list.insert("cpu".to_string(), cpus);
    list.insert("memory".to_string(), memory);
    list.insert(gpu_resource_key(kube_major, kube_minor).to_string(), gpus);
    ResourceRequirements {
        requests: Some(list.clone()),
        limits: Some(list),
        ..Default::default()
    }
}

/// Labels applied to every object produced for a job.
pub fn job_labels(req: &JobDeploymentRequest) -> BTreeMap<String, String> {
    let mut labels = BTreeMap::new();
    labels.insert(LABEL_TRAINING_ID.to_string(), req.training_id.clone());
    labels.insert(LABEL_USER_ID.to_string(), req.user_id.clone());
    labels.insert(
        "deploy_zone".to_string(),
        req.label_value("deploy_zone").to_string(),
    );
    labels.insert(
        "framework".to_string(),
        format!("{}{}", req.framework, req.version),
    );
    labels.insert("gpu_type".to_string(), req.resources.gpu_type.clone());
    labels.insert(
        "kube_major".to_string(),
        req.label_value("kube_major").to_string(),
    );
    labels.insert(
        "kube_minor".to_string(),
        req.label_value("kube_minor").to_string(),
    );
    labels.insert(
        "cluster_env".to_string(),
        req.label_value("cluster_env").to_string(),
    );
    labels
}

/// Hard zone affinity; always emitted, even with an empty zone value.
pub fn get_node_affinity(deploy_zone: &str) -> Affinity {
    Affinity {
        node_affinity: Some(NodeAffinity {
            required_during_scheduling_ignored_during_execution: Some(NodeSelector {
                node_selector_terms: vec![NodeSelectorTerm {
                    match_expressions: Some(vec![NodeSelectorRequirement {
                        key: ZONE_AFFINITY_KEY.to_string(),
                        operator: "In".to_string(),
                        values: Some(vec![deploy_zone.to_string()]),
                    }]),
                    ..Default::default()
                }],
            }),
            ..Default::default()
        }),
        ..Default::default()
    }
}

/// Pods ride out brief node outages; GPU jobs additionally tolerate the
/// dedicated gpu-task taint.
pub fn get_tolerations(gpu_type: &str, toleration_seconds: i64) -> Vec<Toleration> {
    let mut tolerations = vec![
        Toleration {
            key: Some("node.kubernetes.io/not-ready".to_string()),
            operator: Some("Exists".to_string()),
            effect: Some("NoExecute".to_string()),
            toleration_seconds: Some(toleration_seconds),
            ..Default::default()
        },
        Toleration {
            key: Some("node.kubernetes.io/unreachable".to_string()),
            operator: Some("Exists".to_string()),
            effect: Some("NoExecute".to_string()),
            toleration_seconds: Some(toleration_seconds),
            ..Default::default()
        },
    ];
    if gpu_type != "CPU" {
        tolerations.push(Toleration {
            key: Some("dedicated".to_string()),
            operator: Some("Equal".to_string()),
            value: Some("gpu-task".to_string()),
            effect: Some("NoSchedule".to_string()),
            ..Default::default()
        });
    }
    tolerations
}

/// Pod template shared by both topologies. A termination grace of zero lets
/// the stateful set spin up a replacement learner when a node goes AWOL.
#[allow(clippy::too_many_arguments)]
pub fn create_pod_spec(
    containers: Vec<Container>,
    volumes: Vec<Volume>,
    labels: BTreeMap<String, String>,
    node_selector: BTreeMap<String, String>,
    image_pull_secrets: Vec<LocalObjectReference>,
    deploy_zone: &str,
    tolerations: Vec<Toleration>,
    termination_grace_period_seconds: i64,
) -> PodTemplateSpec {
    PodTemplateSpec {
        metadata: Some(ObjectMeta {
            labels: Some(labels),
            ..Default::default()
        }),
        spec: Some(PodSpec {
            containers,
            volumes: if volumes.is_empty() {
                None
            } else {
                Some(volumes)
            },
            node_selector: if node_selector.is_empty() {
                None
            } else {
                Some(node_selector)
            },
            image_pull_secrets: Some(image_pull_secrets),
            affinity: Some(get_node_affinity(deploy_zone)),
            tolerations: Some(tolerations),
            termination_grace_period_seconds: Some(termination_grace_period_seconds),
            restart_policy: Some(RESTART_POLICY_ALWAYS.to_string()),
            ..Default::default()
        }),
    }
}

/// Headless service giving distributed learners stable peer DNS names.
pub fn create_service_spec(name: &str, training_id: &str, namespace: &str) -> Service {
    let mut selector = BTreeMap::new();
    selector.insert(LABEL_TRAINING_ID.to_string(), training_id.to_string());

    let mut labels = selector.clone();
    labels.insert(
        LABEL_SERVICE.to_string(),
        LEARNER_SERVICE_LABEL_VALUE.to_string(),
    );

    let make_port = |name: &str, port: i32| ServicePort {
        name: Some(name.to_string()),
        port,
        target_port: Some(IntOrString::Int(port)),
        protocol: Some("TCP".to_string()),
        ..Default::default()
    };

    Service {
        metadata: ObjectMeta {
            name: Some(name.to_string()),
            namespace: Some(namespace.to_string()),
            labels: Some(labels),
            ..Default::default()
        },
        spec: Some(ServiceSpec {
            cluster_ip: Some("None".to_string()),
            ports: Some(vec![make_port("ssh", SSH_PORT), make_port("grpc", WORKER_PORT)]),
            selector: Some(selector),
            ..Default::default()
        }),
        ..Default::default()
    }
}

/// Stateful set running the learner replicas.
pub fn create_stateful_set_spec(
    name: &str,
    service_name: &str,
    replicas: i32,
    pod_template: PodTemplateSpec,
    namespace: &str,
) -> StatefulSet {
    let labels = pod_template
        .metadata
        .as_ref()
        .and_then(|m| m.labels.clone())
        .unwrap_or_default();

    let mut selector_labels = BTreeMap::new();
    if let Some(id) = labels.get(LABEL_TRAINING_ID) {
        selector_labels.insert(LABEL_TRAINING_ID.to_string(), id.clone());
    }

    StatefulSet {
        metadata: ObjectMeta {
            name: Some(name.to_string()),
            namespace: Some(namespace.to_string()),
            labels: Some(labels),
            ..Default::default()
        },
        spec: Some(StatefulSetSpec {
            replicas: Some(replicas),
            service_name: service_name.to_string(),
            selector: LabelSelector {
                match_labels: Some(selector_labels),
                ..Default::default()
            },
            template: pod_template,
            pod_management_policy: Some(POD_MANAGEMENT_POLICY_PARALLEL.to_string()),
            ..Default::default()
        }),
        ..Default::default()
    }
}

/// Split-mode helper deployment holding the controller and databrokers.
pub fn create_helper_deployment_spec(
    name: &str,
    pod_template: PodTemplateSpec,
    namespace: &str,
) -> Deployment {
    let labels = pod_template
        .metadata
        .as_ref()
        .and_then(|m| m.labels.clone())
        .unwrap_or_default();

    let mut selector_labels = BTreeMap::new();
    if let Some(id) = labels.get(LABEL_TRAINING_ID) {
        selector_labels.insert(LABEL_TRAINING_ID.to_string(), id.clone());
    }
    selector_labels.insert("app".to_string(), name.to_string());

    let mut template = pod_template;
    if let Some(metadata) = template.metadata.as_mut() {
        metadata
            .labels
            .get_or_insert_with(Default::default)
            .insert("app".to_string(), name.to_string());
    }

    let mut top_labels = labels;
    top_labels.insert("app".to_string(), name.to_string());

    Deployment {
        metadata: ObjectMeta {
            name: Some(name.to_string()),
            namespace: Some(namespace.to_string()),
            labels: Some(top_labels),
            ..Default::default()
        },
        spec: Some(DeploymentSpec {
            replicas: Some(1),
            selector: LabelSelector {
                match_labels: Some(selector_labels),
                ..Default::default()
            },
            template,
            ..Default::default()
        }),
        ..Default::default()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn gpu_key_follows_cluster_version() {
        assert_eq!(gpu_resource_key("1", "10"), "alpha.kubernetes.io/nvidia-gpu");
        assert_eq!(gpu_resource_key("1", "8+"), "alpha.kubernetes.io/nvidia-gpu");
        assert_eq!(gpu_resource_key("1", "11"), "nvidia.com/gpu");
        assert_eq!(gpu_resource_key("2", "0"), "nvidia.com/gpu");
    }

    #[test]
    fn resource_requirements_kube_minor_10() {
        let requirements = generate_resource_requirements(
            Quantity("1000m".to_string()),
            Quantity("1024Mi".to_string()),
            Quantity("1".to_string()),
            "1",
            "10",
        );
        let requests = requirements.requests.unwrap();
        assert_eq!(
            requests["alpha.kubernetes.io/nvidia-gpu"],
            Quantity("1".to_string())
        );
        assert_eq!(requests["cpu"], Quantity("1000m".to_string()));
        assert_eq!(requirements.limits.unwrap()["memory"], Quantity("1024Mi".to_string()));
    }

    #[test]
    fn resource_requirements_kube_minor_11() {
        let requirements = generate_resource_requirements(
            Quantity("1000m".to_string()),
            Quantity("1024Mi".to_string()),
            Quantity("1".to_string()),
            "1",
            "11",
        );
        let requests = requirements.requests.unwrap();
        assert!(requests.contains_key("nvidia.com/gpu"));
        assert!(!requests.contains_key("alpha.kubernetes.io/nvidia-gpu"));
    }

    #[test]
    fn learner_container_drops_capabilities_and_exposes_ports() {
        let mut req = JobDeploymentRequest::default();
        req.framework = "tensorflow".to_string();
        req.version = "1.5".to_string();
        req.image_tag = "latest".to_string();
        req.resources.cpus = 1.0;
        req.resources.memory_mb = 1024;
        req.labels
            .insert("kube_major".to_string(), "1".to_string());
        req.labels
            .insert("kube_minor".to_string(), "11".to_string());

        let shared = VolumeMount {
            name: "jobdata".to_string(),
            mount_path: "/job".to_string(),
            ..Default::default()
        };
        let container = construct_learner_container(
            &req,
            Vec::new(),
            &[],
            &shared,
            false,
            false,
            true,
            &LcmConfig::default(),
        );

        let caps = container
            .security_context
            .unwrap()
            .capabilities
            .unwrap()
            .drop
            .unwrap();
        assert!(caps.contains(&"NET_RAW".to_string()));
        assert_eq!(caps.len(), 9);

        let ports: Vec<i32> = container
            .ports
            .unwrap()
            .iter()
            .map(|p| p.container_port)
            .collect();
        assert_eq!(ports, vec![22, 2222]);

        // Single learner wrapper with the unconditional exit write.
        let command = container.command.unwrap();
        let cmd = &command[2];
        assert!(cmd.contains("train.sh"));
        assert!(cmd.contains("mkdir -p $RESULT_DIR"));
        assert!(cmd.contains("echo $? > /job/learner.exit"));
    }

    #[test]
    fn mounted_learner_runs_staged_sequence() {
        let mut req = JobDeploymentRequest::default();
        req.framework = "pytorch".to_string();
        req.version = "1.0".to_string();
        req.resources.cpus = 1.0;
        req.resources.memory_mb = 1024;

        let shared = VolumeMount {
            name: "jobdata".to_string(),
            mount_path: "/job".to_string(),
            ..Default::default()
        };
        let container = construct_learner_container(
            &req,
            Vec::new(),
            &[],
            &shared,
            true,
            true,
            false,
            &LcmConfig::default(),
        );
        let command = container.command.unwrap();
        let cmd = &command[2];
        assert!(cmd.contains("unzip -nq \"$RESULT_DIR/_submitted_code/model.zip\""));
        assert!(cmd.contains("syncLogs & "));
        assert!(cmd.contains("echo 0 > $JOB_STATE_DIR/lc.exit ;"));
        assert!(cmd.contains("echo $? > /job/load-model.exit"));
        assert!(cmd.contains("echo $? > /job/learner.exit"));
        assert!(cmd.contains("echo $? > /job/store-logs.exit"));
        assert!(cmd.contains(".log-copy-complete"));
        // One train.sh invocation, not two.
        assert_eq!(cmd.matches("train.sh").count(), 1);
    }

    #[test]
    fn custom_image_evaluates_training_command() {
        let mut req = JobDeploymentRequest::default();
        req.framework = "tensorflow".to_string();
        req.version = "1.5".to_string();
        req.resources.cpus = 1.0;
        req.resources.memory_mb = 1024;
        req.image_location = Some(crate::domain::request::ImageLocation {
            registry: "registry.example.com".to_string(),
            namespace: "userspace".to_string(),
            access_token: "tok".to_string(),
            email: String::new(),
        });

        let shared = VolumeMount {
            name: "jobdata".to_string(),
            mount_path: "/job".to_string(),
            ..Default::default()
        };
        let container = construct_learner_container(
            &req,
            Vec::new(),
            &[],
            &shared,
            false,
            false,
            true,
            &LcmConfig::default(),
        );
        assert_eq!(
            container.image.as_deref(),
            Some("registry.example.com/userspace/tensorflow:1.5")
        );
        let command = container.command.unwrap();
        let cmd = &command[2];
        assert!(cmd.contains("eval \"$TRAINING_COMMAND 2>&1\""));
        assert!(cmd.contains("export PYTHONPATH=$PWD"));
        assert!(!cmd.contains("train.sh"));
    }

    #[test]
    fn node_affinity_always_pins_the_zone_key() {
        let affinity = get_node_affinity("");
        let encoded = serde_json::to_string(&affinity.node_affinity).unwrap();
        assert_eq!(
            encoded,
            "{\"requiredDuringSchedulingIgnoredDuringExecution\":{\"nodeSelectorTerms\":[{\"matchExpressions\":[{\"key\":\"failure-domain.beta.kubernetes.io/zone\",\"operator\":\"In\",\"values\":[\"\"]}]}]}}"
        );
    }

    #[test]
    fn tolerations_for_gpu_and_cpu_jobs() {
        let cpu = get_tolerations("CPU", 30);
        assert_eq!(cpu.len(), 2);
        assert!(cpu
            .iter()
            .all(|t| t.effect.as_deref() == Some("NoExecute")
                && t.toleration_seconds == Some(30)));

        let gpu = get_tolerations("nvidia-TeslaV100", 30);
        assert_eq!(gpu.len(), 3);
        let dedicated = &gpu[2];
        assert_eq!(dedicated.key.as_deref(), Some("dedicated"));
        assert_eq!(dedicated.value.as_deref(), Some("gpu-task"));
        assert_eq!(dedicated.effect.as_deref(), Some("NoSchedule"));
    }

    #[test]
    fn learner_env_rebases_staged_directories_only() {
        let base = vec![
            EnvVar {
                name: "DATA_DIR".to_string(),
                value: Some("/mnt/data".to_string()),
                ..Default::default()
            },
            EnvVar {
                name: "RESULT_DIR".to_string(),
                value: Some("/mnt/results".to_string()),
                ..Default::default()
            },
        ];
        let staged = populate_learner_env_vars(&base, "t1", 2, "learner-j", false, false);
        let value = |vars: &[EnvVar], n: &str| {
            vars.iter()
                .find(|ev| ev.name == n)
                .unwrap()
                .value
                .clone()
                .unwrap()
        };
        assert_eq!(value(&staged, "DATA_DIR"), "/job/mnt/data");
        assert_eq!(value(&staged, "RESULT_DIR"), "/job/mnt/results");
        assert_eq!(value(&staged, "TRAINING_ID"), "t1");
        assert_eq!(value(&staged, "NUM_LEARNERS"), "2");

        let mounted = populate_learner_env_vars(&base, "t1", 2, "learner-j", true, true);
        assert_eq!(value(&mounted, "DATA_DIR"), "/mnt/data");
        assert_eq!(value(&mounted, "RESULT_DIR"), "/mnt/results");
    }
}
