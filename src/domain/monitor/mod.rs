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

//! Per-job monitor: a finite state machine over the learner's progress plus
//! counters for the failure classes seen while reconciling.

pub mod metrics;

pub use metrics::{FailureClass, MonitorMetrics};

use crate::shared::error::{LcmError, Result};
use prometheus_client::registry::Registry;
use std::collections::HashMap;
use std::fmt;
use std::str::FromStr;

/// Learner job phases. COMPLETED, FAILED and HALTED are terminal.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum JobState {
    Pending,
    Downloading,
    Processing,
    Storing,
    Completed,
    Failed,
    Halted,
}

impl JobState {
    pub fn is_terminal(&self) -> bool {
        matches!(self, JobState::Completed | JobState::Failed | JobState::Halted)
    }

    pub fn as_str(&self) -> &'static str {
        match self {
            JobState::Pending => "PENDING",
            JobState::Downloading => "DOWNLOADING",
            JobState::Processing => "PROCESSING",
            JobState::Storing => "STORING",
            JobState::Completed => "COMPLETED",
            JobState::Failed => "FAILED",
            JobState::Halted => "HALTED",
        }
    }
}

impl fmt::Display for JobState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for JobState {
    type Err = LcmError;

    fn from_str(s: &str) -> Result<Self> {
        match s {
            "PENDING" => Ok(JobState::Pending),
            "DOWNLOADING" => Ok(JobState::Downloading),
            "PROCESSING" => Ok(JobState::Processing),
            "STORING" => Ok(JobState::Storing),
            "COMPLETED" => Ok(JobState::Completed),
            "FAILED" => Ok(JobState::Failed),
            "HALTED" => Ok(JobState::Halted),
            other => Err(LcmError::config_error(format!(
                "Unknown job state: {}",
                other
            ))),
        }
    }
}

/// The allowed state edges. Terminal states have no entry.
fn init_transition_map() -> HashMap<JobState, Vec<JobState>> {
    use JobState::*;
    let mut transitions = HashMap::new();
    transitions.insert(Pending, vec![Downloading]);
    transitions.insert(
        Downloading,
        vec![Processing, Storing, Completed, Failed, Halted],
    );
    transitions.insert(Processing, vec![Processing, Storing, Completed, Failed]);
    transitions.insert(Storing, vec![Completed, Failed, Halted]);
    transitions
}

/// Tracks one training job from acceptance until a terminal state is seen or
/// the job is removed.
pub struct JobMonitor {
    pub training_id: String,
    pub user_id: String,
    pub job_name: String,
    pub num_learners: i32,
    current_state: JobState,
    transitions: HashMap<JobState, Vec<JobState>>,
    metrics: MonitorMetrics,
}

impl JobMonitor {
    pub fn new(
        training_id: impl Into<String>,
        user_id: impl Into<String>,
        job_name: impl Into<String>,
        num_learners: i32,
        registry: &mut Registry,
    ) -> Self {
        Self {
            training_id: training_id.into(),
            user_id: user_id.into(),
            job_name: job_name.into(),
            num_learners,
            current_state: JobState::Pending,
            transitions: init_transition_map(),
            metrics: MonitorMetrics::register(registry),
        }
    }

    pub fn current_state(&self) -> JobState {
        self.current_state
    }

    pub fn metrics(&self) -> &MonitorMetrics {
        &self.metrics
    }

    /// Whether the edge from -> to is in the transition map.
    pub fn is_transition_allowed(&self, from: JobState, to: JobState) -> bool {
        self.transitions
            .get(&from)
            .map(|targets| targets.contains(&to))
            .unwrap_or(false)
    }

    /// Advance the tracked state. A rejected transition leaves the state
    /// unchanged and records no metric.
    pub fn observe(&mut self, next: JobState) -> Result<()> {
        if !self.is_transition_allowed(self.current_state, next) {
            return Err(LcmError::StateTransitionRejected {
                from: self.current_state.to_string(),
                to: next.to_string(),
            });
        }
        tracing::info!(
            training_id = %self.training_id,
            from = %self.current_state,
            to = %next,
            "job state transition"
        );
        self.current_state = next;
        Ok(())
    }

    /// Bucket an observed failure into its counter.
    pub fn record_failure(&self, class: FailureClass) {
        self.metrics.record(class);
    }
}

/// Classify a cluster-reported error message into a failure class. Messages
/// that fit no bucket return None; the caller decides whether to retry.
pub fn classify_cluster_failure(message: &str) -> Option<FailureClass> {
    let lower = message.to_ascii_lowercase();
    if lower.contains("errimagepull") || lower.contains("imagepullbackoff") {
        return Some(FailureClass::ImagePull);
    }
    if lower.contains("insufficient cpu")
        || lower.contains("insufficient memory")
        || lower.contains("insufficient nvidia.com/gpu")
        || lower.contains("insufficient alpha.kubernetes.io/nvidia-gpu")
    {
        return Some(FailureClass::InsufficientResources);
    }
    if lower.contains("etcd") && lower.contains("watch") {
        return Some(FailureClass::EtcdWatch);
    }
    if lower.contains("etcd") {
        return Some(FailureClass::EtcdConnectivity);
    }
    if lower.contains("trainer") {
        return Some(FailureClass::TrainerConnectivity);
    }
    if lower.contains("connection refused") || lower.contains("connection reset") {
        return Some(FailureClass::K8sConnectivity);
    }
    None
}

#[cfg(test)]
mod tests {
    use super::*;

    fn init_job_monitor() -> JobMonitor {
        let mut registry = Registry::default();
        JobMonitor::new(
            "unit-test-trainingId",
            "unit-test-userId",
            "unit-test-jobName",
            1,
            &mut registry,
        )
    }

    #[test]
    fn transitions() {
        use JobState::*;
        let jm = init_job_monitor();

        assert!(jm.is_transition_allowed(Pending, Downloading));
        assert!(jm.is_transition_allowed(Downloading, Processing));
        assert!(jm.is_transition_allowed(Downloading, Storing));
        assert!(jm.is_transition_allowed(Downloading, Completed));
        assert!(jm.is_transition_allowed(Processing, Storing));
        assert!(jm.is_transition_allowed(Storing, Completed));
        assert!(jm.is_transition_allowed(Processing, Completed));
        assert!(jm.is_transition_allowed(Downloading, Failed));
        assert!(jm.is_transition_allowed(Downloading, Halted));
        assert!(jm.is_transition_allowed(Processing, Failed));
        assert!(jm.is_transition_allowed(Processing, Processing));
        assert!(jm.is_transition_allowed(Storing, Failed));
        assert!(jm.is_transition_allowed(Storing, Halted));

        assert!(!jm.is_transition_allowed(Storing, Downloading));
        assert!(!jm.is_transition_allowed(Completed, Processing));
        assert!(!jm.is_transition_allowed(Failed, Completed));
    }

    #[test]
    fn terminal_states_have_no_outgoing_edges() {
        use JobState::*;
        let jm = init_job_monitor();
        for terminal in [Completed, Failed, Halted] {
            for target in [
                Pending,
                Downloading,
                Processing,
                Storing,
                Completed,
                Failed,
                Halted,
            ] {
                assert!(!jm.is_transition_allowed(terminal, target));
            }
        }
    }

    #[test]
    fn observe_walks_the_full_lifecycle_and_rejects_after_terminal() {
        use JobState::*;
        let mut jm = init_job_monitor();
        for next in [Downloading, Processing, Processing, Storing, Completed] {
            jm.observe(next).unwrap();
        }
        assert_eq!(jm.current_state(), Completed);

        let rejected = jm.observe(Processing);
        assert!(matches!(
            rejected,
            Err(LcmError::StateTransitionRejected { .. })
        ));
        assert_eq!(jm.current_state(), Completed);
    }

    #[test]
    fn metrics_increment() {
        let jm = init_job_monitor();
        jm.record_failure(FailureClass::EtcdConnectivity);
        jm.record_failure(FailureClass::EtcdWatch);
        jm.record_failure(FailureClass::ImagePull);
        jm.record_failure(FailureClass::K8sConnectivity);
        jm.record_failure(FailureClass::TrainerConnectivity);
        jm.record_failure(FailureClass::InsufficientResources);

        let metrics = jm.metrics();
        assert_eq!(metrics.failed_etcd_connectivity.get(), 1);
        assert_eq!(metrics.failed_etcd_watch.get(), 1);
        assert_eq!(metrics.failed_image_pull.get(), 1);
        assert_eq!(metrics.failed_k8s_connectivity.get(), 1);
        assert_eq!(metrics.failed_trainer_connectivity.get(), 1);
        assert_eq!(metrics.insufficient_resources.get(), 1);
    }

    #[test]
    fn failure_classification() {
        assert_eq!(
            classify_cluster_failure("Back-off pulling image: ErrImagePull"),
            Some(FailureClass::ImagePull)
        );
        assert_eq!(
            classify_cluster_failure("0/12 nodes available: Insufficient nvidia.com/gpu"),
            Some(FailureClass::InsufficientResources)
        );
        assert_eq!(
            classify_cluster_failure("etcd watch channel closed"),
            Some(FailureClass::EtcdWatch)
        );
        assert_eq!(
            classify_cluster_failure("dial tcp: connection refused"),
            Some(FailureClass::K8sConnectivity)
        );
        assert_eq!(classify_cluster_failure("pod evicted"), None);
    }
}
