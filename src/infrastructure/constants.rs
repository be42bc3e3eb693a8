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

/// Pod-level job state directory. Holds the rendezvous control files shared
/// by all containers of a learner pod.
pub const POD_LEVEL_JOB_DIR: &str = "/job";
pub const POD_LEVEL_LOG_DIR: &str = "/job/logs";

/// Container names
pub const CONTROLLER_CONTAINER_NAME: &str = "controller";
pub const LOG_COLLECTOR_CONTAINER_NAME: &str = "log-collector";
pub const LOAD_DATA_CONTAINER_NAME: &str = "load-data";
pub const LOAD_MODEL_CONTAINER_NAME: &str = "load-model";
pub const LEARNER_CONTAINER_NAME: &str = "learner";
pub const STORE_RESULTS_CONTAINER_NAME: &str = "store-results";
pub const STORE_LOGS_CONTAINER_NAME: &str = "store-logs";

/// Learner ports
pub const SSH_PORT: i32 = 22;
pub const WORKER_PORT: i32 = 2222;

/// Learner IDs start at 1, not 0; the job monitor tracks paths beginning with
/// learner 1. The master learner owns the per-job log directory in the store.
pub const MASTER_LEARNER_ID: i32 = 1;

/// Fixed sidecar sizing (request == limit)
pub const CONTROLLER_MILLI_CPU: i64 = 20;
pub const CONTROLLER_MEM_MB: i64 = 64;
pub const LOG_COLLECTOR_MILLI_CPU: i64 = 60;
pub const LOG_COLLECTOR_MEM_MB: i64 = 300;
pub const LOAD_DATA_MILLI_CPU: i64 = 20;
pub const LOAD_DATA_MEM_MB: i64 = 100;
pub const LOAD_MODEL_MILLI_CPU: i64 = 20;
pub const LOAD_MODEL_MEM_MB: i64 = 100;
pub const STORE_RESULTS_MILLI_CPU: i64 = 20;
pub const STORE_RESULTS_MEM_MB: i64 = 100;

/// Object-store FUSE mount driver
pub const COS_MOUNT_DRIVER_NAME: &str = "ibm/ibmc-s3fs";
pub const COS_MOUNT_TYPE: &str = "mount_cos";
pub const COS_DEFAULT_REGION: &str = "us-standard";

/// Tag used in the request when no result bucket is wanted
pub const NO_RESULT_BUCKET_TAG: &str = "none";

/// Databroker image short names
pub const VALID_DATABROKER_TYPES: &[&str] = &["objectstorage", "s3"];
pub const DEFAULT_DATABROKER_TYPE: &str = "objectstorage";

/// Log-collector image short names
pub const SIMPLE_LOG_COLLECTOR_NAME: &str = "log_collector";
pub const LOG_COLLECTOR_BAD_TAG_NO_TDS_FOUND: &str = "dummy-tag-no-tds-found";

/// Shared-memory volume size for frameworks that need it, in bytes
pub const SHM_VOLUME_SIZE_BYTES: i64 = 4_194_304;

/// Learner pod mount points
pub const SSH_CERTS_MOUNT_PATH: &str = "/etc/ssh-certs";
pub const SHM_MOUNT_PATH: &str = "/dev/shm";

/// Helper pod TLS cert volumes
pub const ETCD_CERT_VOLUME_NAME: &str = "etcd-ssl-cert";
pub const ETCD_CERT_SECRET_NAME: &str = "lcm-etcd-cert";
pub const ETCD_CERT_MOUNT_PATH: &str = "/etc/certs";
pub const SSL_CERT_VOLUME_NAME: &str = "service-ssl-cert";
pub const SSL_CERT_SECRET_NAME: &str = "service-ssl-certs";
pub const SSL_CERT_MOUNT_PATH: &str = "/etc/ssl/dlaas";

/// Shared scratch volume binding helpers and learners
pub const SHARED_VOLUME_NAME: &str = "jobdata";

/// Labels
pub const LABEL_TRAINING_ID: &str = "training_id";
pub const LABEL_USER_ID: &str = "user_id";
pub const LABEL_SERVICE: &str = "service";
pub const LEARNER_SERVICE_LABEL_VALUE: &str = "dlaas-learner";

/// Node affinity / tolerations
pub const ZONE_AFFINITY_KEY: &str = "failure-domain.beta.kubernetes.io/zone";
pub const GPU_TYPE_NODE_SELECTOR_KEY: &str = "ibm-cloud.kubernetes.io/gpu-type";
pub const DEFAULT_TOLERATION_SECONDS: i64 = 30;

/// GPU resource keys; the alpha key applies up to kube 1.10
pub const GPU_RESOURCE_KEY: &str = "nvidia.com/gpu";
pub const GPU_RESOURCE_KEY_ALPHA: &str = "alpha.kubernetes.io/nvidia-gpu";

/// Restart policy
pub const RESTART_POLICY_ALWAYS: &str = "Always";

/// StatefulSet pod management policy
pub const POD_MANAGEMENT_POLICY_PARALLEL: &str = "Parallel";

/// Linux capabilities dropped from the learner container. The remaining
/// capabilities (SETGID, SETUID, NET_BIND_SERVICE, SYS_CHROOT, AUDIT_WRITE)
/// are necessary; dropping them breaks ssh inside the containers.
pub const LEARNER_DROPPED_CAPABILITIES: &[&str] = &[
    "CHOWN",
    "DAC_OVERRIDE",
    "FOWNER",
    "FSETID",
    "KILL",
    "SETPCAP",
    "NET_RAW",
    "MKNOD",
    "SETFCAP",
];
