// CLI command definitions

use super::jobs::{DeployCommand, StatusCommand, TeardownCommand};
use clap::Parser;

#[derive(Parser, Debug)]
#[command(
    name = "dlaas-lcm",
    version,
    about = "Lifecycle manager for deep-learning training jobs on Kubernetes",
    long_about = "Plans a Job Deployment Request into cluster objects, deploys them, and tears trainings down by id"
)]
pub struct CliArgs {
    #[command(subcommand)]
    pub command: Commands,
}

#[derive(clap::Subcommand, Debug)]
pub enum Commands {
    /// Deploy a training job from a manifest (creates all resources)
    Deploy(DeployCommand),

    /// Show learner pod status for a training
    Status(StatusCommand),

    /// Delete every object of a training by its id
    Teardown(TeardownCommand),
}
