//! Deployment topology and delivery pipeline.
//!
//! The topology is configuration data for the container platform; the
//! pipeline turns a source push into a built, pushed and deployed image.
//!
//! Key re-exports:
//! - [`DeploymentTopology`] - every resource the service runs on
//! - [`Pipeline`] - the `Source → Build → Deploy` sequencer
//! - [`ShellExecutor`] - runs pipeline commands through `sh -c`

mod buildspec;
mod executor;
mod image;
mod pipeline;
mod topology;

pub use buildspec::{BuildPhase, BuildSpec};
pub use executor::{shell_quote, CommandExecutor, CommandOutput, ExecError, ShellExecutor};
pub use image::{
    short_commit, DescriptorError, ImageDefinition, ImageDefinitions, ImageError, ImageReference,
    LATEST_TAG, SHORT_HASH_LEN,
};
pub use pipeline::{
    Action, BuildImage, BuiltImage, DeployImage, FailureReason, FetchSource, Pipeline,
    PipelineError, RunReport, SourceEvent, Stage, StageKind, StageReport,
};
pub use topology::{
    BuildStageSpec, DeployStageSpec, DeploymentTopology, HealthCheckSpec,
    LoadBalancerSpec, LogGroupSpec, NetworkSpec, PipelineSpec, RemovalPolicy, RepositorySpec,
    Resource, ResourceKind, RoleSpec, ServiceSpec, SourceSpec, SourceTrigger, TaskSpec,
    TopologyError,
};
