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

//! Network isolation for distributed learners: peers of one training job may
//! only talk to each other.

use crate::infrastructure::constants::{
    LABEL_SERVICE, LABEL_TRAINING_ID, LEARNER_SERVICE_LABEL_VALUE,
};
use k8s_openapi::api::networking::v1::{
    NetworkPolicy, NetworkPolicyEgressRule, NetworkPolicyIngressRule, NetworkPolicyPeer,
    NetworkPolicySpec,
};
use k8s_openapi::apimachinery::pkg::apis::meta::v1::{LabelSelector, ObjectMeta};
use std::collections::BTreeMap;

/// Restrict ingress and egress to learner pods carrying the same training id.
pub fn define_network_policy_for_training_id(
    name: &str,
    training_id: &str,
    namespace: &str,
) -> NetworkPolicy {
    let mut peer_labels = BTreeMap::new();
    peer_labels.insert(LABEL_TRAINING_ID.to_string(), training_id.to_string());
    peer_labels.insert(
        LABEL_SERVICE.to_string(),
        LEARNER_SERVICE_LABEL_VALUE.to_string(),
    );
    let peer_selector = LabelSelector {
        match_labels: Some(peer_labels.clone()),
        ..Default::default()
    };

    let mut labels = BTreeMap::new();
    labels.insert(LABEL_TRAINING_ID.to_string(), training_id.to_string());

    NetworkPolicy {
        metadata: ObjectMeta {
            name: Some(name.to_string()),
            namespace: Some(namespace.to_string()),
            labels: Some(labels),
            ..Default::default()
        },
        spec: Some(NetworkPolicySpec {
            pod_selector: peer_selector.clone(),
            policy_types: Some(vec!["Ingress".to_string(), "Egress".to_string()]),
            ingress: Some(vec![NetworkPolicyIngressRule {
                from: Some(vec![NetworkPolicyPeer {
                    pod_selector: Some(peer_selector.clone()),
                    ..Default::default()
                }]),
                ..Default::default()
            }]),
            egress: Some(vec![NetworkPolicyEgressRule {
                to: Some(vec![NetworkPolicyPeer {
                    pod_selector: Some(peer_selector),
                    ..Default::default()
                }]),
                ..Default::default()
            }]),
            ..Default::default()
        }),
        ..Default::default()
    }
}
