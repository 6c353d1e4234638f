//! Deployment topology as configuration data.
//!
//! One [`DeploymentTopology`] describes everything the service runs on: a
//! private network, a container cluster, the task execution role, the image
//! repository, the log group, the task and service with their health check
//! and autoscaling bounds, the public load balancer, and the delivery
//! pipeline. Every resource name derives from `stack_name`, so a second
//! environment is another `[deployment]` table rather than another copy.
//!
//! Nothing here talks to a cloud API. Rollout, load-balancer registration and
//! autoscaling are the hosting platform's job; this module only declares and
//! validates what to ask for.

use std::collections::BTreeMap;
use std::time::Duration;

use serde::{Deserialize, Serialize};
use serde_json::json;

use crate::config::{DEVELOPMENT_PORT, STATUS_PATH};

use super::image::ImageReference;

/// Default stack name; every resource name is prefixed with it
pub const DEFAULT_STACK_NAME: &str = "StarterKitApi";

/// Principal allowed to assume the task execution role
pub const ECS_TASKS_PRINCIPAL: &str = "ecs-tasks.amazonaws.com";

/// Managed policy that lets tasks pull images and ship logs
pub const TASK_EXECUTION_POLICY: &str = "service-role/AmazonECSTaskExecutionRolePolicy";

/// Default descriptor file passed from the build stage to the deploy stage
pub const DEFAULT_DESCRIPTOR_FILE: &str = "imagedefinitions.json";

/// Deploy stage timeout
pub const DEFAULT_DEPLOY_TIMEOUT_MINUTES: u64 = 20;

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct DeploymentTopology {
    /// Prefix for every resource name
    pub stack_name: String,
    /// Cloud account that owns the registry
    pub account_id: String,
    pub region: String,
    pub network: NetworkSpec,
    pub execution_role: RoleSpec,
    pub repository: RepositorySpec,
    pub log_group: LogGroupSpec,
    pub task: TaskSpec,
    pub service: ServiceSpec,
    pub load_balancer: LoadBalancerSpec,
    pub pipeline: PipelineSpec,
}

impl Default for DeploymentTopology {
    fn default() -> Self {
        Self {
            stack_name: DEFAULT_STACK_NAME.to_string(),
            account_id: "000000000000".to_string(),
            region: "us-east-1".to_string(),
            network: NetworkSpec::default(),
            execution_role: RoleSpec::default(),
            repository: RepositorySpec::default(),
            log_group: LogGroupSpec::default(),
            task: TaskSpec::default(),
            service: ServiceSpec::default(),
            load_balancer: LoadBalancerSpec::default(),
            pipeline: PipelineSpec::default(),
        }
    }
}

/// Private network the cluster runs in
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct NetworkSpec {
    pub max_azs: u8,
}

impl Default for NetworkSpec {
    fn default() -> Self {
        Self { max_azs: 2 }
    }
}

/// Role assumed by the task to pull images and publish logs
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct RoleSpec {
    pub assumed_by: String,
    pub managed_policies: Vec<String>,
    pub description: String,
}

impl Default for RoleSpec {
    fn default() -> Self {
        Self {
            assumed_by: ECS_TASKS_PRINCIPAL.to_string(),
            managed_policies: vec![TASK_EXECUTION_POLICY.to_string()],
            description: "ECS task to pull container images and publish container logs".to_string(),
        }
    }
}

/// What happens to a resource when the stack is deleted
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum RemovalPolicy {
    Destroy,
    Retain,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct RepositorySpec {
    pub name: String,
    pub removal_policy: RemovalPolicy,
}

impl Default for RepositorySpec {
    fn default() -> Self {
        Self {
            name: "starter-kit-api".to_string(),
            removal_policy: RemovalPolicy::Destroy,
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct LogGroupSpec {
    pub name: String,
    pub stream_prefix: String,
    pub removal_policy: RemovalPolicy,
}

impl Default for LogGroupSpec {
    fn default() -> Self {
        Self {
            name: "/starter-kit-api/tasks".to_string(),
            stream_prefix: "starter-kit-api".to_string(),
            removal_policy: RemovalPolicy::Destroy,
        }
    }
}

/// Container task definition
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct TaskSpec {
    /// Image the task starts from until a pipeline run replaces it; the
    /// repository's `latest` tag when unset
    pub image: Option<String>,
    /// CPU units (1024 = one vCPU)
    pub cpu: u32,
    pub memory_mib: u32,
    pub container_port: u16,
    pub environment: BTreeMap<String, String>,
    pub health_check: HealthCheckSpec,
}

impl Default for TaskSpec {
    fn default() -> Self {
        Self {
            image: None,
            cpu: 512,
            memory_mib: 1024,
            container_port: DEVELOPMENT_PORT,
            environment: BTreeMap::new(),
            health_check: HealthCheckSpec::default(),
        }
    }
}

/// Container-level health check
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct HealthCheckSpec {
    pub path: String,
    pub interval_seconds: u64,
    pub timeout_seconds: u64,
    pub retries: u32,
    /// Grace period before failures count
    pub start_period_seconds: u64,
}

impl Default for HealthCheckSpec {
    fn default() -> Self {
        Self {
            path: STATUS_PATH.to_string(),
            interval_seconds: 30,
            timeout_seconds: 30,
            retries: 5,
            start_period_seconds: 30,
        }
    }
}

impl HealthCheckSpec {
    /// Probe command run inside the container.
    pub fn command(&self, port: u16) -> Vec<String> {
        vec![
            "CMD-SHELL".to_string(),
            format!("curl -f http://localhost:{}{} || exit 1", port, self.path),
        ]
    }

    pub fn interval(&self) -> Duration {
        Duration::from_secs(self.interval_seconds)
    }

    pub fn timeout(&self) -> Duration {
        Duration::from_secs(self.timeout_seconds)
    }

    pub fn start_period(&self) -> Duration {
        Duration::from_secs(self.start_period_seconds)
    }
}

/// Running service and its CPU-based autoscaling
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct ServiceSpec {
    pub desired_count: u32,
    pub min_replicas: u32,
    pub max_replicas: u32,
    pub cpu_target_percent: u8,
    pub scale_in_cooldown_seconds: u64,
    pub scale_out_cooldown_seconds: u64,
}

impl Default for ServiceSpec {
    fn default() -> Self {
        Self {
            desired_count: 1,
            min_replicas: 1,
            max_replicas: 2,
            cpu_target_percent: 50,
            scale_in_cooldown_seconds: 60,
            scale_out_cooldown_seconds: 60,
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct LoadBalancerSpec {
    pub internet_facing: bool,
    pub listener_port: u16,
    /// Target-group health check path
    pub health_check_path: String,
}

impl Default for LoadBalancerSpec {
    fn default() -> Self {
        Self {
            internet_facing: true,
            listener_port: 80,
            health_check_path: STATUS_PATH.to_string(),
        }
    }
}

/// How the source stage is triggered
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum SourceTrigger {
    Webhook,
    Poll,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct SourceSpec {
    pub owner: String,
    pub repo: String,
    pub branch: String,
    pub trigger: SourceTrigger,
    /// Secrets-manager id of the source host token; fetches are
    /// unauthenticated when unset
    pub token_secret: Option<String>,
    pub remote: String,
}

impl Default for SourceSpec {
    fn default() -> Self {
        Self {
            owner: "starter-kit".to_string(),
            repo: "starter-kit-api".to_string(),
            branch: "main".to_string(),
            trigger: SourceTrigger::Webhook,
            token_secret: None,
            remote: "origin".to_string(),
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct BuildStageSpec {
    pub build_file: String,
    pub context: String,
    pub descriptor_file: String,
}

impl Default for BuildStageSpec {
    fn default() -> Self {
        Self {
            build_file: "Dockerfile".to_string(),
            context: ".".to_string(),
            descriptor_file: DEFAULT_DESCRIPTOR_FILE.to_string(),
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct DeployStageSpec {
    pub timeout_minutes: u64,
}

impl Default for DeployStageSpec {
    fn default() -> Self {
        Self {
            timeout_minutes: DEFAULT_DEPLOY_TIMEOUT_MINUTES,
        }
    }
}

impl DeployStageSpec {
    pub fn timeout(&self) -> Duration {
        Duration::from_secs(self.timeout_minutes.saturating_mul(60))
    }
}

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct PipelineSpec {
    pub source: SourceSpec,
    pub build: BuildStageSpec,
    pub deploy: DeployStageSpec,
}

/// Kind of a declared resource
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
pub enum ResourceKind {
    Vpc,
    Cluster,
    Role,
    Repository,
    LogGroup,
    TaskDefinition,
    SecurityGroup,
    Service,
    LoadBalancer,
    Pipeline,
}

/// One declared resource and its physical name
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct Resource {
    pub kind: ResourceKind,
    pub name: String,
}

impl DeploymentTopology {
    /// `{stack_name}-{suffix}`
    pub fn resource_name(&self, suffix: &str) -> String {
        format!("{}-{}", self.stack_name, suffix)
    }

    pub fn cluster_name(&self) -> String {
        self.resource_name("Cluster")
    }

    pub fn service_name(&self) -> String {
        self.resource_name("Service")
    }

    pub fn container_name(&self) -> String {
        self.resource_name("Container")
    }

    pub fn pipeline_name(&self) -> String {
        self.resource_name("Pipeline")
    }

    pub fn task_family(&self) -> String {
        self.resource_name("Cluster-TaskDefinition")
    }

    pub fn execution_role_arn(&self) -> String {
        format!(
            "arn:aws:iam::{}:role/{}",
            self.account_id,
            self.resource_name("Role")
        )
    }

    /// Registry host, e.g. `000000000000.dkr.ecr.us-east-1.amazonaws.com`
    pub fn registry(&self) -> String {
        format!("{}.dkr.ecr.{}.amazonaws.com", self.account_id, self.region)
    }

    /// Fully qualified repository URI without a tag
    pub fn repository_uri(&self) -> String {
        format!("{}/{}", self.registry(), self.repository.name)
    }

    /// Image the task definition names when no build has run yet.
    pub fn task_image(&self) -> String {
        self.task
            .image
            .clone()
            .unwrap_or_else(|| ImageReference::latest(self.repository_uri()).uri())
    }

    pub fn container_health_command(&self) -> Vec<String> {
        self.task.health_check.command(self.task.container_port)
    }

    /// Fargate task definition running `image_uri` in the service container,
    /// in the JSON shape `aws ecs register-task-definition` accepts.
    pub fn task_definition(&self, image_uri: &str) -> serde_json::Value {
        let task = &self.task;
        let health = &task.health_check;
        let environment: Vec<_> = task
            .environment
            .iter()
            .map(|(name, value)| json!({ "name": name, "value": value }))
            .collect();

        json!({
            "family": self.task_family(),
            "networkMode": "awsvpc",
            "requiresCompatibilities": ["FARGATE"],
            "cpu": task.cpu.to_string(),
            "memory": task.memory_mib.to_string(),
            "executionRoleArn": self.execution_role_arn(),
            "containerDefinitions": [{
                "name": self.container_name(),
                "image": image_uri,
                "essential": true,
                "portMappings": [{ "containerPort": task.container_port, "protocol": "tcp" }],
                "environment": environment,
                "healthCheck": {
                    "command": self.container_health_command(),
                    "interval": health.interval_seconds,
                    "timeout": health.timeout_seconds,
                    "retries": health.retries,
                    "startPeriod": health.start_period_seconds,
                },
                "logConfiguration": {
                    "logDriver": "awslogs",
                    "options": {
                        "awslogs-group": self.log_group.name,
                        "awslogs-region": self.region,
                        "awslogs-stream-prefix": self.log_group.stream_prefix,
                    },
                },
            }],
        })
    }

    /// Every declared resource, in creation order.
    pub fn resources(&self) -> Vec<Resource> {
        let resource = |kind, name: String| Resource { kind, name };
        vec![
            resource(ResourceKind::Vpc, self.resource_name("VPC")),
            resource(ResourceKind::Cluster, self.cluster_name()),
            resource(ResourceKind::Role, self.resource_name("Role")),
            resource(ResourceKind::TaskDefinition, self.task_family()),
            resource(ResourceKind::Repository, self.repository.name.clone()),
            resource(ResourceKind::LogGroup, self.log_group.name.clone()),
            resource(
                ResourceKind::SecurityGroup,
                self.resource_name("ServiceSecurityGroup"),
            ),
            resource(ResourceKind::Service, self.service_name()),
            resource(
                ResourceKind::SecurityGroup,
                self.resource_name("LoadBalancerSecurityGroup"),
            ),
            resource(ResourceKind::LoadBalancer, self.resource_name("AppLoadBalancer")),
            resource(ResourceKind::Pipeline, self.pipeline_name()),
        ]
    }

    /// Check the invariants the hosting platform would otherwise reject late.
    pub fn validate(&self) -> Result<(), TopologyError> {
        if self.stack_name.trim().is_empty() {
            return Err(TopologyError::Empty("stack_name"));
        }
        if self.repository.name.trim().is_empty() {
            return Err(TopologyError::Empty("repository.name"));
        }
        if self.pipeline.source.branch.trim().is_empty() {
            return Err(TopologyError::Empty("pipeline.source.branch"));
        }

        let service = &self.service;
        if service.min_replicas > service.max_replicas {
            return Err(TopologyError::ReplicaBounds {
                min: service.min_replicas,
                max: service.max_replicas,
            });
        }
        if !(service.min_replicas..=service.max_replicas).contains(&service.desired_count) {
            return Err(TopologyError::DesiredCount {
                desired: service.desired_count,
                min: service.min_replicas,
                max: service.max_replicas,
            });
        }
        if service.cpu_target_percent == 0 || service.cpu_target_percent > 100 {
            return Err(TopologyError::CpuTarget(service.cpu_target_percent));
        }

        let health = &self.task.health_check;
        if health.interval_seconds == 0 {
            return Err(TopologyError::Zero("task.health_check.interval_seconds"));
        }
        if health.timeout_seconds == 0 {
            return Err(TopologyError::Zero("task.health_check.timeout_seconds"));
        }
        if health.retries == 0 {
            return Err(TopologyError::Zero("task.health_check.retries"));
        }
        for path in [&health.path, &self.load_balancer.health_check_path] {
            if !path.starts_with('/') {
                return Err(TopologyError::HealthPath(path.clone()));
            }
        }

        if self.pipeline.deploy.timeout_minutes == 0 {
            return Err(TopologyError::Zero("pipeline.deploy.timeout_minutes"));
        }

        Ok(())
    }
}

#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum TopologyError {
    #[error("{0} must not be empty")]
    Empty(&'static str),
    #[error("min_replicas ({min}) exceeds max_replicas ({max})")]
    ReplicaBounds { min: u32, max: u32 },
    #[error("desired_count {desired} is outside [{min}, {max}]")]
    DesiredCount { desired: u32, min: u32, max: u32 },
    #[error("cpu_target_percent must be in 1..=100, got {0}")]
    CpuTarget(u8),
    #[error("{0} must be greater than zero")]
    Zero(&'static str),
    #[error("health check path '{0}' must start with '/'")]
    HealthPath(String),
}
