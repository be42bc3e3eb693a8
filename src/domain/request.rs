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

//! The declarative Job Deployment Request accepted by the lifecycle manager.

use serde::{Deserialize, Serialize};
use std::collections::HashMap;

/// A declarative description of one training workload. Immutable once
/// accepted; everything the planner produces fans out from this record.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct JobDeploymentRequest {
    /// Short name, used as a suffix in generated object names.
    pub name: String,
    pub training_id: String,
    pub user_id: String,

    /// Framework name, e.g. tensorflow, pytorch, mxnet, caffe.
    pub framework: String,
    pub version: String,
    #[serde(default)]
    pub image_tag: String,

    /// Present only when the job runs a user-supplied image.
    #[serde(default)]
    pub image_location: Option<ImageLocation>,

    pub resources: ResourceRequest,

    /// Carries store credentials and directory paths, keyed by
    /// DATA_STORE_*, MODEL_STORE_*, RESULT_STORE_* and the *_DIR variables.
    #[serde(default)]
    pub env_vars: HashMap<String, String>,

    /// Carries deploy_zone, kube_major, kube_minor, cluster_env.
    #[serde(default)]
    pub labels: HashMap<String, String>,

    /// YAML snippet selecting the log-collector flavor.
    #[serde(default)]
    pub evaluation_metrics_spec: String,
}

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct ImageLocation {
    pub registry: String,
    pub namespace: String,
    #[serde(default)]
    pub access_token: String,
    #[serde(default)]
    pub email: String,
}

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct ResourceRequest {
    pub cpus: f64,
    #[serde(default)]
    pub gpus: i64,
    pub memory_mb: i64,
    /// Requested shared storage; a value > 0 selects the split topology.
    #[serde(default)]
    pub storage_mb: i64,
    #[serde(default = "default_learners")]
    pub learners: i32,
    /// "CPU" means a CPU-only job.
    #[serde(default)]
    pub gpu_type: String,
}

fn default_learners() -> i32 {
    1
}

impl JobDeploymentRequest {
    /// Number of learner replicas, never below one.
    pub fn num_learners(&self) -> i32 {
        self.resources.learners.max(1)
    }

    pub fn env_value(&self, name: &str) -> &str {
        self.env_vars.get(name).map(String::as_str).unwrap_or("")
    }

    pub fn label_value(&self, name: &str) -> &str {
        self.labels.get(name).map(String::as_str).unwrap_or("")
    }

    pub fn is_cpu_only(&self) -> bool {
        let normalized: String = self
            .resources
            .gpu_type
            .chars()
            .map(|c| match c {
                '-' | '.' => '_',
                _ => c.to_ascii_uppercase(),
            })
            .collect();
        normalized == "CPU"
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn num_learners_is_at_least_one() {
        let mut req = JobDeploymentRequest::default();
        req.resources.learners = 0;
        assert_eq!(req.num_learners(), 1);
        req.resources.learners = 4;
        assert_eq!(req.num_learners(), 4);
    }

    #[test]
    fn cpu_only_detection_normalizes_separators() {
        let mut req = JobDeploymentRequest::default();
        req.resources.gpu_type = "CPU".to_string();
        assert!(req.is_cpu_only());
        req.resources.gpu_type = "cpu".to_string();
        assert!(req.is_cpu_only());
        req.resources.gpu_type = "nvidia-TeslaV100".to_string();
        assert!(!req.is_cpu_only());
    }
}
