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

use prometheus_client::metrics::counter::Counter;
use prometheus_client::registry::Registry;

/// Classes of failures observed while reconciling a training job. Each class
/// maps to exactly one counter.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum FailureClass {
    EtcdConnectivity,
    EtcdWatch,
    ImagePull,
    K8sConnectivity,
    TrainerConnectivity,
    InsufficientResources,
}

/// Failure counters for one job monitor. Counters are atomic and cheap to
/// clone; increments may come concurrently from any reconcile path.
#[derive(Debug, Clone, Default)]
pub struct MonitorMetrics {
    pub failed_etcd_connectivity: Counter,
    pub failed_etcd_watch: Counter,
    pub failed_image_pull: Counter,
    pub failed_k8s_connectivity: Counter,
    pub failed_trainer_connectivity: Counter,
    pub insufficient_resources: Counter,
}

impl MonitorMetrics {
    /// Register all counters under the `jobmonitor` prefix.
    pub fn register(registry: &mut Registry) -> Self {
        let metrics = MonitorMetrics::default();
        let sub = registry.sub_registry_with_prefix("jobmonitor");
        sub.register(
            "failed_etcd_connectivity",
            "Failures connecting to the key-value store",
            metrics.failed_etcd_connectivity.clone(),
        );
        sub.register(
            "failed_etcd_watch",
            "Failures establishing or holding a key-value store watch",
            metrics.failed_etcd_watch.clone(),
        );
        sub.register(
            "failed_image_pull",
            "Learner image pull failures reported by the cluster",
            metrics.failed_image_pull.clone(),
        );
        sub.register(
            "failed_k8s_connectivity",
            "Failures reaching the cluster API",
            metrics.failed_k8s_connectivity.clone(),
        );
        sub.register(
            "failed_trainer_connectivity",
            "Failures reaching the trainer service",
            metrics.failed_trainer_connectivity.clone(),
        );
        sub.register(
            "insufficient_resources",
            "Jobs unschedulable for lack of cluster resources",
            metrics.insufficient_resources.clone(),
        );
        metrics
    }

    pub fn record(&self, class: FailureClass) {
        match class {
            FailureClass::EtcdConnectivity => self.failed_etcd_connectivity.inc(),
            FailureClass::EtcdWatch => self.failed_etcd_watch.inc(),
            FailureClass::ImagePull => self.failed_image_pull.inc(),
            FailureClass::K8sConnectivity => self.failed_k8s_connectivity.inc(),
            FailureClass::TrainerConnectivity => self.failed_trainer_connectivity.inc(),
            FailureClass::InsufficientResources => self.insufficient_resources.inc(),
        };
    }
}
