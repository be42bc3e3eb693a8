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

//! Image reference resolution for learner, controller and databroker
//! containers.

use crate::domain::config::LcmConfig;
use std::collections::HashMap;
use std::path::Path;
use tracing::debug;

/// Identifies the learner image to run. Registry and namespace are set only
/// for user-supplied custom images.
#[derive(Debug, Clone, Default)]
pub struct LearnerImage {
    pub framework: String,
    pub version: String,
    pub tag: String,
    pub registry: String,
    pub namespace: String,
}

/// Full route of the learner image.
///
/// Custom images resolve to `{registry}/{namespace}/{framework}:{version}`.
/// Platform images resolve to `{registry}/{framework}_gpu_{version}:{tag}`
/// where the tag comes from the request, then the learner-config file, then
/// the platform default.
pub fn resolve_learner_image(image: &LearnerImage, config: &LcmConfig) -> String {
    if !image.registry.is_empty() && !image.namespace.is_empty() {
        return format!(
            "{}/{}/{}:{}",
            image.registry, image.namespace, image.framework, image.version
        );
    }
    let tag = resolve_learner_tag(image, config);
    format!(
        "{}/{}_gpu_{}:{}",
        config.learner_registry, image.framework, image.version, tag
    )
}

fn resolve_learner_tag(image: &LearnerImage, config: &LcmConfig) -> String {
    if !image.tag.is_empty() {
        return image.tag.clone();
    }
    let build_tag = image_build_tag_for_framework(
        &image.framework,
        &image.version,
        &config.learner_config_path,
    );
    if !build_tag.is_empty() {
        return build_tag;
    }
    config.learner_tag.clone()
}

/// Look up the build tag for (framework, version) in the learner-config
/// file, a JSON mapping of framework to version to tag. Missing file or
/// entry yields an empty string.
fn image_build_tag_for_framework(framework: &str, version: &str, config_path: &str) -> String {
    if !Path::new(config_path).exists() {
        return String::new();
    }
    let contents = match std::fs::read_to_string(config_path) {
        Ok(c) => c,
        Err(err) => {
            debug!(path = config_path, %err, "could not read learner config");
            return String::new();
        }
    };
    let mapping: HashMap<String, HashMap<String, String>> = match serde_json::from_str(&contents) {
        Ok(m) => m,
        Err(err) => {
            debug!(path = config_path, %err, "could not parse learner config");
            return String::new();
        }
    };
    mapping
        .get(framework)
        .and_then(|versions| versions.get(version))
        .cloned()
        .unwrap_or_default()
}

/// Image of the controller sidecar.
pub fn controller_image(config: &LcmConfig) -> String {
    format!("{}/controller:{}", config.learner_registry, config.services_tag)
}

/// Image of the databroker for a given store type short name.
pub fn databroker_image(databroker_type: &str, config: &LcmConfig) -> String {
    format!(
        "{}/databroker_{}:{}",
        config.learner_registry, databroker_type, config.databroker_tag
    )
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::io::Write;

    fn test_config() -> LcmConfig {
        let mut config = LcmConfig::default();
        config.learner_registry = "registry.ng.bluemix.net/dlaas_dev".to_string();
        config.learner_tag = "latest".to_string();
        config.learner_config_path = "/nonexistent/learner-config.json".to_string();
        config
    }

    #[test]
    fn image_name_with_custom_registry() {
        let image = LearnerImage {
            framework: "tensorflow".to_string(),
            version: "1.5".to_string(),
            tag: "latest".to_string(),
            registry: "registry.ng.bluemix.net".to_string(),
            namespace: "custom_reg".to_string(),
        };
        assert_eq!(
            resolve_learner_image(&image, &test_config()),
            "registry.ng.bluemix.net/custom_reg/tensorflow:1.5"
        );
    }

    #[test]
    fn image_name_with_request_tag() {
        let image = LearnerImage {
            framework: "tensorflow".to_string(),
            version: "1.5".to_string(),
            tag: "latest".to_string(),
            ..Default::default()
        };
        assert_eq!(
            resolve_learner_image(&image, &test_config()),
            "registry.ng.bluemix.net/dlaas_dev/tensorflow_gpu_1.5:latest"
        );
    }

    #[test]
    fn image_name_falls_back_to_learner_config_then_default() {
        let mut file = tempfile::NamedTempFile::new().unwrap();
        write!(file, "{{\"caffe\": {{\"2.2\": \"master-2\"}}}}").unwrap();

        let mut config = test_config();
        config.learner_config_path = file.path().to_str().unwrap().to_string();

        let image = LearnerImage {
            framework: "caffe".to_string(),
            version: "2.2".to_string(),
            ..Default::default()
        };
        assert_eq!(
            resolve_learner_image(&image, &config),
            "registry.ng.bluemix.net/dlaas_dev/caffe_gpu_2.2:master-2"
        );

        let unknown = LearnerImage {
            framework: "caffe".to_string(),
            version: "9.9".to_string(),
            ..Default::default()
        };
        assert_eq!(
            resolve_learner_image(&unknown, &config),
            "registry.ng.bluemix.net/dlaas_dev/caffe_gpu_9.9:latest"
        );
    }

    #[test]
    fn platform_service_images() {
        let config = test_config();
        assert_eq!(
            controller_image(&config),
            "registry.ng.bluemix.net/dlaas_dev/controller:latest"
        );
        assert_eq!(
            databroker_image("s3", &config),
            "registry.ng.bluemix.net/dlaas_dev/databroker_s3:latest"
        );
    }
}
