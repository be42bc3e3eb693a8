//! Training job commands

use crate::cli::display::{render_learner_pods, LearnerPodInfo};
use crate::domain::config::LcmConfig;
use crate::domain::request::JobDeploymentRequest;
use crate::infrastructure::kubernetes::client::{LcmKubeClient, LcmKubeClientImpl};
use crate::infrastructure::kubernetes::training;
use clap::Parser;
use colored::Colorize;

#[derive(Parser, Debug, Clone)]
pub struct DeployCommand {
    /// Path to the Job Deployment Request manifest (YAML)
    #[arg(long, short = 'f', value_name = "PATH")]
    pub manifest: String,

    /// Path to the LCM configuration file (TOML)
    /// Environment variables override values from the file
    #[arg(long, value_name = "PATH")]
    pub config_file: Option<String>,

    /// Plan only; print the object names without creating anything
    #[arg(long)]
    pub dry_run: bool,
}

#[derive(Parser, Debug)]
pub struct StatusCommand {
    /// Training ID
    #[arg(required = true)]
    pub training_id: String,

    /// Path to the LCM configuration file (TOML)
    #[arg(long, value_name = "PATH")]
    pub config_file: Option<String>,
}

#[derive(Parser, Debug)]
pub struct TeardownCommand {
    /// Training ID
    #[arg(required = true)]
    pub training_id: String,

    /// Path to the LCM configuration file (TOML)
    #[arg(long, value_name = "PATH")]
    pub config_file: Option<String>,
}

impl DeployCommand {
    pub async fn execute(&self) -> anyhow::Result<()> {
        let config = LcmConfig::load(self.config_file.as_deref())?;
        let manifest = std::fs::read_to_string(&self.manifest)?;
        let req: JobDeploymentRequest = serde_yaml::from_str(&manifest)?;
        let training_id = req.training_id.clone();

        if self.dry_run {
            let training = training::Training::new(req, config, None)?;
            let bom = training.plan()?;
            println!("{}", "Planned objects:".bold());
            if let Some(policy) = bom.network_policy {
                println!("  networkpolicy/{}", policy.metadata.name.unwrap_or_default());
            }
            for secret in &bom.secrets {
                println!(
                    "  secret/{}",
                    secret.metadata.name.clone().unwrap_or_default()
                );
            }
            if let Some(service) = bom.service {
                println!("  service/{}", service.metadata.name.unwrap_or_default());
            }
            if let Some(claim) = bom.shared_volume_claim {
                println!("  pvc/{}", claim.metadata.name.unwrap_or_default());
            }
            if let Some(helper) = bom.helper {
                println!("  deployment/{}", helper.metadata.name.unwrap_or_default());
            }
            println!(
                "  statefulset/{}",
                bom.learner_set.metadata.name.clone().unwrap_or_default()
            );
            return Ok(());
        }

        let client = LcmKubeClientImpl::from_lcm_config(&config).await?;
        training::deploy(req, config, &client).await?;
        println!(
            "{} training {} deployed",
            "✓".green().bold(),
            training_id.bold()
        );
        Ok(())
    }
}

impl StatusCommand {
    pub async fn execute(&self) -> anyhow::Result<()> {
        let config = LcmConfig::load(self.config_file.as_deref())?;
        let client = LcmKubeClientImpl::from_lcm_config(&config).await?;

        let selector = format!("training_id={}", self.training_id);
        let pods = client.list_pods(&selector).await?;

        let infos: Vec<LearnerPodInfo> = pods
            .iter()
            .map(|pod| {
                let phase = pod
                    .status
                    .as_ref()
                    .and_then(|s| s.phase.clone())
                    .unwrap_or_else(|| "Unknown".to_string());
                let ready = pod
                    .status
                    .as_ref()
                    .and_then(|s| s.container_statuses.as_ref())
                    .map(|cs| (cs.iter().filter(|c| c.ready).count(), cs.len()))
                    .unwrap_or((0, 0));
                let started = pod
                    .metadata
                    .creation_timestamp
                    .as_ref()
                    .map(|t| t.0)
                    .unwrap_or_else(chrono::Utc::now);
                LearnerPodInfo {
                    name: pod.metadata.name.clone().unwrap_or_default(),
                    phase,
                    ready: ready.0,
                    containers: ready.1,
                    age: chrono::Utc::now() - started,
                }
            })
            .collect();

        println!("{}", render_learner_pods(&self.training_id, &infos));
        Ok(())
    }
}

impl TeardownCommand {
    pub async fn execute(&self) -> anyhow::Result<()> {
        let config = LcmConfig::load(self.config_file.as_deref())?;
        let client = LcmKubeClientImpl::from_lcm_config(&config).await?;
        client.delete_training(&self.training_id).await?;
        println!(
            "{} training {} removed",
            "✓".green().bold(),
            self.training_id.bold()
        );
        Ok(())
    }
}
