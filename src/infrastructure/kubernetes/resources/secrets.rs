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

//! Secrets backing the learner pods: object-store credentials for the FUSE
//! mounts, the per-job ssh certs, and the image pull secrets.

use crate::domain::config::LcmConfig;
use crate::domain::request::JobDeploymentRequest;
use crate::infrastructure::kubernetes::resources::sshcerts;
use crate::shared::error::{LcmError, Result};
use base64::engine::general_purpose::STANDARD as BASE64;
use base64::Engine as _;
use k8s_openapi::api::core::v1::{LocalObjectReference, Secret};
use k8s_openapi::apimachinery::pkg::apis::meta::v1::ObjectMeta;
use k8s_openapi::ByteString;
use serde::Serialize;
use std::collections::BTreeMap;

/// Credentials for one object-store volume mount.
#[derive(Debug, Clone)]
pub struct CosVolumeSecret {
    pub id: String,
    pub training_id: String,
    pub username: String,
    pub api_key: String,
}

/// The secrets a learner deployment needs, irrespective of topology.
#[derive(Debug, Clone, Default)]
pub struct SecretsPlan {
    pub training_data: Option<CosVolumeSecret>,
    pub results_dir: Option<CosVolumeSecret>,
    pub ssh_certs: bool,
}

/// Decide which secrets the job needs from the request flags.
pub fn secrets_for_deploying_learner(
    req: &JobDeploymentRequest,
    mount_training_data: bool,
    mount_results: bool,
) -> SecretsPlan {
    let mut plan = SecretsPlan::default();

    if mount_training_data {
        plan.training_data = Some(CosVolumeSecret {
            id: format!("cossecretdata-{}", req.name),
            training_id: req.training_id.clone(),
            username: req.env_value("DATA_STORE_USERNAME").to_string(),
            api_key: req.env_value("DATA_STORE_APIKEY").to_string(),
        });
    }
    if mount_results {
        plan.results_dir = Some(CosVolumeSecret {
            id: format!("cossecretresults-{}", req.name),
            training_id: req.training_id.clone(),
            username: req.env_value("RESULT_STORE_USERNAME").to_string(),
            api_key: req.env_value("RESULT_STORE_APIKEY").to_string(),
        });
    }
    plan.ssh_certs = sshcerts::needs_mounted_ssh_certs(&req.framework, &req.version);
    plan
}

/// Materialize the plan into secret objects. The ssh key material is
/// generated fresh here, once per call.
pub fn create_volume_secrets_spec(
    plan: &SecretsPlan,
    req: &JobDeploymentRequest,
    namespace: &str,
) -> Result<Vec<Secret>> {
    let mut secrets = Vec::new();

    if let Some(ref cos) = plan.training_data {
        secrets.push(cos_secret_spec(cos, namespace));
    }
    if let Some(ref cos) = plan.results_dir {
        secrets.push(cos_secret_spec(cos, namespace));
    }
    if plan.ssh_certs {
        let ssh_secret_name = format!("jobsshcert-{}", req.name);
        if let Some(secret) = sshcerts::generate_ssh_cert_secret(
            &ssh_secret_name,
            &req.training_id,
            &req.framework,
            &req.version,
            namespace,
        )? {
            secrets.push(secret);
        }
    }
    Ok(secrets)
}

fn cos_secret_spec(cos: &CosVolumeSecret, namespace: &str) -> Secret {
    let mut data = BTreeMap::new();
    data.insert(
        "access-key".to_string(),
        ByteString(cos.username.clone().into_bytes()),
    );
    data.insert(
        "secret-key".to_string(),
        ByteString(cos.api_key.clone().into_bytes()),
    );

    let mut labels = BTreeMap::new();
    labels.insert("training_id".to_string(), cos.training_id.clone());

    Secret {
        metadata: ObjectMeta {
            name: Some(cos.id.clone()),
            namespace: Some(namespace.to_string()),
            labels: Some(labels),
            ..Default::default()
        },
        type_: Some("ibm/ibmc-s3fs".to_string()),
        data: Some(data),
        ..Default::default()
    }
}

#[derive(Serialize)]
struct DockerConfigEntry {
    username: String,
    password: String,
    email: String,
    auth: String,
}

/// Pull-secret references for the learner pod: always the platform-wide
/// secret, plus a per-job dockercfg secret when the request names a custom
/// image. A custom image without an access token is an invalid request.
pub fn image_pull_secrets(
    req: &JobDeploymentRequest,
    config: &LcmConfig,
) -> Result<(Vec<LocalObjectReference>, Option<Secret>)> {
    let default_reference = LocalObjectReference {
        name: config.learner_image_pull_secret.clone(),
    };

    let location = match req.image_location {
        Some(ref location) => location,
        None => return Ok((vec![default_reference], None)),
    };
    if location.access_token.is_empty() {
        return Err(LcmError::invalid_request(
            "Custom image access token is missing",
        ));
    }

    let custom_name = format!("customimage-{}", req.name);
    let mut entries = BTreeMap::new();
    entries.insert(
        location.registry.clone(),
        DockerConfigEntry {
            username: "token".to_string(),
            password: location.access_token.clone(),
            email: location.email.clone(),
            auth: BASE64.encode(format!("token:{}", location.access_token)),
        },
    );
    let dockercfg = serde_json::to_vec(&entries)?;

    let mut labels = BTreeMap::new();
    labels.insert("training_id".to_string(), req.training_id.clone());

    let mut data = BTreeMap::new();
    data.insert(".dockercfg".to_string(), ByteString(dockercfg));

    let secret = Secret {
        metadata: ObjectMeta {
            name: Some(custom_name.clone()),
            namespace: Some(config.learner_namespace.clone()),
            labels: Some(labels),
            ..Default::default()
        },
        type_: Some("kubernetes.io/dockercfg".to_string()),
        data: Some(data),
        ..Default::default()
    };

    Ok((
        vec![
            default_reference,
            LocalObjectReference {
                name: custom_name,
            },
        ],
        Some(secret),
    ))
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::domain::request::ImageLocation;

    fn cos_request() -> JobDeploymentRequest {
        let mut req = JobDeploymentRequest::default();
        req.name = "job1".to_string();
        req.training_id = "training-xyz".to_string();
        req.env_vars
            .insert("DATA_STORE_USERNAME".to_string(), "user".to_string());
        req.env_vars
            .insert("DATA_STORE_APIKEY".to_string(), "key".to_string());
        req.env_vars
            .insert("RESULT_STORE_USERNAME".to_string(), "ruser".to_string());
        req.env_vars
            .insert("RESULT_STORE_APIKEY".to_string(), "rkey".to_string());
        req
    }

    #[test]
    fn secrets_follow_mount_flags() {
        let req = cos_request();
        let plan = secrets_for_deploying_learner(&req, true, false);
        assert!(plan.training_data.is_some());
        assert!(plan.results_dir.is_none());
        assert_eq!(plan.training_data.as_ref().unwrap().id, "cossecretdata-job1");

        let secrets = create_volume_secrets_spec(&plan, &req, "default").unwrap();
        assert_eq!(secrets.len(), 1);
        let data = secrets[0].data.as_ref().unwrap();
        assert_eq!(data["access-key"].0, b"user");
        assert_eq!(data["secret-key"].0, b"key");
    }

    #[test]
    fn pull_secret_for_custom_image() {
        let mut req = cos_request();
        req.image_location = Some(ImageLocation {
            registry: "registry.example.com".to_string(),
            namespace: "userspace".to_string(),
            access_token: "tok123".to_string(),
            email: "u@example.com".to_string(),
        });
        let config = LcmConfig::default();
        let (references, secret) = image_pull_secrets(&req, &config).unwrap();
        assert_eq!(references.len(), 2);
        assert_eq!(
            references[1].name.as_deref(),
            Some("customimage-job1")
        );

        let secret = secret.unwrap();
        assert_eq!(secret.type_.as_deref(), Some("kubernetes.io/dockercfg"));
        let cfg = String::from_utf8(secret.data.unwrap()[".dockercfg"].0.clone()).unwrap();
        assert!(cfg.contains("registry.example.com"));
        assert!(cfg.contains(&BASE64.encode("token:tok123")));
    }

    #[test]
    fn custom_image_without_token_is_invalid() {
        let mut req = cos_request();
        req.image_location = Some(ImageLocation {
            registry: "r".to_string(),
            namespace: "n".to_string(),
            access_token: String::new(),
            email: String::new(),
        });
        let err = image_pull_secrets(&req, &LcmConfig::default()).unwrap_err();
        assert!(matches!(err, LcmError::InvalidRequest(_)));
    }

    #[test]
    fn default_pull_secret_without_custom_image() {
        let req = cos_request();
        let (references, secret) = image_pull_secrets(&req, &LcmConfig::default()).unwrap();
        assert_eq!(references.len(), 1);
        assert!(secret.is_none());
    }
}
