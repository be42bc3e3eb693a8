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

//! Lifecycle-manager configuration. Loaded once from an optional TOML file,
//! then overridden by environment variables whose names are the external
//! contract; the resulting record is passed explicitly to the planner.

use crate::shared::error::{LcmError, Result};
use serde::Deserialize;
use std::collections::HashMap;
use std::path::Path;
use tracing::warn;

const DEFAULT_LEARNER_CONFIG_PATH: &str = "/etc/learner-config-json/learner-config.json";
const DEFAULT_CACHE_GB_PER_GPU: i64 = 6;

#[derive(Debug, Clone, Deserialize)]
#[serde(default)]
pub struct LcmConfig {
    /// Platform image registry host (LEARNER_REGISTRY).
    pub learner_registry: String,
    /// Platform-wide image pull secret name (LEARNER_IMAGE_PULL_SECRET).
    pub learner_image_pull_secret: String,
    /// Default learner image tag (LEARNER_TAG).
    pub learner_tag: String,
    /// Tag of the platform service images, e.g. the controller (SERVICES_TAG).
    pub services_tag: String,
    /// Tag of the databroker images (DATABROKER_TAG).
    pub databroker_tag: String,
    /// Secret holding the key-value store credentials (LCM_SECRET).
    pub lcm_secret: String,
    /// One of Always | IfNotPresent | Never (IMAGE_PULL_POLICY).
    pub image_pull_policy: String,
    /// Namespace learner objects are created in (LEARNER_NAMESPACE).
    pub learner_namespace: String,
    /// Namespace this process runs in (POD_NAMESPACE).
    pub pod_namespace: String,
    /// Training-data-service name used for log-collector discovery
    /// (TDS_SERVICE_NAME).
    pub tds_service_name: String,
    /// GB of mount cache per GPU, kept raw; see cache_gb_per_gpu()
    /// (MOUNTCOS_GB_CACHE_PER_GPU).
    pub mountcos_gb_cache_per_gpu: String,
    /// Forces the non-split topology when set (LCM_FLUENTD_EMETRICS_ENABLE).
    pub fluentd_emetrics_enable: bool,
    /// Extension hook for learner container and volumes (FFDL_EXTENDED_ENABLED).
    pub ffdl_extended_enabled: bool,
    /// JSON mapping (framework, version) -> build tag.
    pub learner_config_path: String,
    /// Statically provisioned shared NFS volumes, keyed by deploy zone.
    pub static_volumes: HashMap<String, String>,
    pub kube: KubeAccessConfig,
}

/// Cluster access settings; empty url means in-cluster configuration.
#[derive(Debug, Clone, Default, Deserialize)]
#[serde(default)]
pub struct KubeAccessConfig {
    pub url: String,
    pub ca_file: String,
    pub token: String,
    pub token_file: String,
    pub cert_file: String,
    pub key_file: String,
}

impl Default for LcmConfig {
    fn default() -> Self {
        Self {
            learner_registry: "registry.ng.bluemix.net/dlaas_dev".to_string(),
            learner_image_pull_secret: "regcred-dlaas".to_string(),
            learner_tag: "latest".to_string(),
            services_tag: "latest".to_string(),
            databroker_tag: "latest".to_string(),
            lcm_secret: "lcm-secret".to_string(),
            image_pull_policy: "Always".to_string(),
            learner_namespace: "default".to_string(),
            pod_namespace: "default".to_string(),
            tds_service_name: "ffdl-trainingdata".to_string(),
            mountcos_gb_cache_per_gpu: String::new(),
            fluentd_emetrics_enable: false,
            ffdl_extended_enabled: false,
            learner_config_path: DEFAULT_LEARNER_CONFIG_PATH.to_string(),
            static_volumes: HashMap::new(),
            kube: KubeAccessConfig::default(),
        }
    }
}

impl LcmConfig {
    /// Load from a TOML file, then apply environment overrides.
    pub fn load(path: Option<&str>) -> Result<Self> {
        let mut config = match path {
            Some(p) if Path::new(p).exists() => {
                let contents = std::fs::read_to_string(p)?;
                toml::from_str(&contents)?
            }
            Some(p) => {
                return Err(LcmError::config_error(format!(
                    "Configuration file not found: {}",
                    p
                )))
            }
            None => LcmConfig::default(),
        };
        config.apply_env_overrides();
        Ok(config)
    }

    fn apply_env_overrides(&mut self) {
        let mut set = |key: &str, target: &mut String| {
            if let Ok(v) = std::env::var(key) {
                *target = v;
            }
        };
        set("LEARNER_REGISTRY", &mut self.learner_registry);
        set(
            "LEARNER_IMAGE_PULL_SECRET",
            &mut self.learner_image_pull_secret,
        );
        set("LEARNER_TAG", &mut self.learner_tag);
        set("SERVICES_TAG", &mut self.services_tag);
        set("DATABROKER_TAG", &mut self.databroker_tag);
        set("LCM_SECRET", &mut self.lcm_secret);
        set("IMAGE_PULL_POLICY", &mut self.image_pull_policy);
        set("LEARNER_NAMESPACE", &mut self.learner_namespace);
        set("POD_NAMESPACE", &mut self.pod_namespace);
        set("TDS_SERVICE_NAME", &mut self.tds_service_name);
        set(
            "MOUNTCOS_GB_CACHE_PER_GPU",
            &mut self.mountcos_gb_cache_per_gpu,
        );
        set("LEARNER_KUBE_URL", &mut self.kube.url);
        set("LEARNER_KUBE_CAFILE", &mut self.kube.ca_file);
        set("LEARNER_KUBE_TOKEN", &mut self.kube.token);
        set("LEARNER_KUBE_TOKENFILE", &mut self.kube.token_file);
        set("LEARNER_KUBE_CERTFILE", &mut self.kube.cert_file);
        set("LEARNER_KUBE_KEYFILE", &mut self.kube.key_file);

        if let Ok(v) = std::env::var("LCM_FLUENTD_EMETRICS_ENABLE") {
            self.fluentd_emetrics_enable = parse_bool(&v);
        }
        if let Ok(v) = std::env::var("FFDL_EXTENDED_ENABLED") {
            self.ffdl_extended_enabled = parse_bool(&v);
        }
    }

    /// Image pull policy if valid, else Always.
    pub fn image_pull_policy(&self) -> String {
        match self.image_pull_policy.as_str() {
            "Always" | "IfNotPresent" | "Never" => self.image_pull_policy.clone(),
            other => {
                if !other.is_empty() {
                    warn!(policy = other, "invalid image pull policy, using Always");
                }
                "Always".to_string()
            }
        }
    }

    /// GB of object-store cache per GPU; non-integer values degrade to the
    /// default rather than failing the deployment.
    pub fn cache_gb_per_gpu(&self) -> i64 {
        match self.mountcos_gb_cache_per_gpu.parse::<i64>() {
            Ok(v) => v,
            Err(_) => {
                warn!(
                    value = %self.mountcos_gb_cache_per_gpu,
                    "MOUNTCOS_GB_CACHE_PER_GPU is not an integer, defaulting to {}GB/GPU",
                    DEFAULT_CACHE_GB_PER_GPU
                );
                DEFAULT_CACHE_GB_PER_GPU
            }
        }
    }

    /// Name of the statically provisioned shared volume for a deploy zone,
    /// empty when the zone has none.
    pub fn static_volume_for_zone(&self, zone: &str) -> String {
        self.static_volumes.get(zone).cloned().unwrap_or_default()
    }
}

fn parse_bool(value: &str) -> bool {
    matches!(value.to_ascii_lowercase().as_str(), "true" | "1" | "yes")
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn invalid_pull_policy_degrades_to_always() {
        let mut config = LcmConfig::default();
        config.image_pull_policy = "SometimesMaybe".to_string();
        assert_eq!(config.image_pull_policy(), "Always");

        config.image_pull_policy = "IfNotPresent".to_string();
        assert_eq!(config.image_pull_policy(), "IfNotPresent");
    }

    #[test]
    fn cache_size_defaults_when_not_an_integer() {
        let mut config = LcmConfig::default();
        config.mountcos_gb_cache_per_gpu = "lots".to_string();
        assert_eq!(config.cache_gb_per_gpu(), 6);

        config.mountcos_gb_cache_per_gpu = "12".to_string();
        assert_eq!(config.cache_gb_per_gpu(), 12);
    }

    #[test]
    fn load_parses_toml_with_static_volumes() {
        use std::io::Write;
        let mut file = tempfile::NamedTempFile::new().unwrap();
        writeln!(
            file,
            "learner_registry = \"registry.local/dlaas\"\n\
             [static_volumes]\ndal13 = \"dlaas-jobs-nfs\"\n"
        )
        .unwrap();
        let config = LcmConfig::load(file.path().to_str()).unwrap();
        assert_eq!(config.learner_registry, "registry.local/dlaas");
        assert_eq!(config.static_volume_for_zone("dal13"), "dlaas-jobs-nfs");
        assert_eq!(config.static_volume_for_zone("dal09"), "");
    }
}
