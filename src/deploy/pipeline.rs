//! Delivery pipeline sequencer.
//!
//! A pipeline is exactly three stages, `Source → Build → Deploy`, run strictly
//! in order for each triggering push. A stage's actions run in order and a
//! stage only starts once every action of the previous stage succeeded. The
//! first failure halts the run; there is no rollback, the next successful
//! run is the recovery path. Overlapping runs are not coordinated here.
//!
//! Artifacts flow between stages through a per-run context: the source stage
//! resolves the commit, the build stage records the image it pushed and
//! writes the descriptor file, and the deploy stage reads that file back,
//! refuses anything other than what the build produced, and registers a task
//! definition revision running the descriptor's image before pointing the
//! service at it.

use std::fmt;
use std::path::{Path, PathBuf};
use std::time::Duration;

use chrono::{DateTime, Utc};
use serde::Serialize;

use super::buildspec::BuildSpec;
use super::executor::{shell_quote, CommandExecutor, CommandOutput, ExecError};
use super::image::{short_commit, DescriptorError, ImageDefinitions, ImageError, ImageReference};
use super::topology::DeploymentTopology;

/// Pipeline stages, in execution order.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize)]
pub enum StageKind {
    Source,
    Build,
    Deploy,
}

impl StageKind {
    pub const ORDER: [StageKind; 3] = [StageKind::Source, StageKind::Build, StageKind::Deploy];
}

impl fmt::Display for StageKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            StageKind::Source => f.write_str("Source"),
            StageKind::Build => f.write_str("Build"),
            StageKind::Deploy => f.write_str("Deploy"),
        }
    }
}

/// Push notification that triggers a run.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SourceEvent {
    pub branch: String,
    /// Commit to check out; the branch head when absent. Must be hex.
    pub commit: Option<String>,
}

/// Image pushed by the build stage under both tags.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct BuiltImage {
    pub latest: ImageReference,
    pub pinned: ImageReference,
}

/// Artifacts handed from one stage to the next within a single run.
#[derive(Debug, Default)]
struct RunContext {
    commit: Option<String>,
    image: Option<BuiltImage>,
    task_definition: Option<String>,
}

/// Check out the pushed commit.
#[derive(Debug, Clone)]
pub struct FetchSource {
    pub remote: String,
    pub branch: String,
    pub region: String,
    /// Secret holding the source host token, resolved inside the shell so
    /// the token never appears in a logged command
    pub token_secret: Option<String>,
}

/// Build, tag and push the image, then write the descriptor.
#[derive(Debug, Clone)]
pub struct BuildImage {
    pub topology: DeploymentTopology,
    pub descriptor_path: PathBuf,
}

/// Point the running service at the image named in the descriptor.
#[derive(Debug, Clone)]
pub struct DeployImage {
    pub topology: DeploymentTopology,
    pub descriptor_path: PathBuf,
    pub timeout: Duration,
}

#[derive(Debug, Clone)]
pub enum Action {
    FetchSource(FetchSource),
    BuildImage(BuildImage),
    DeployImage(DeployImage),
}

impl Action {
    pub fn name(&self) -> &'static str {
        match self {
            Action::FetchSource(_) => "fetch_source",
            Action::BuildImage(_) => "build_image",
            Action::DeployImage(_) => "deploy_image",
        }
    }

    /// Stage this action belongs in.
    pub fn stage(&self) -> StageKind {
        match self {
            Action::FetchSource(_) => StageKind::Source,
            Action::BuildImage(_) => StageKind::Build,
            Action::DeployImage(_) => StageKind::Deploy,
        }
    }

    async fn execute(
        &self,
        event: &SourceEvent,
        ctx: &mut RunContext,
        executor: &dyn CommandExecutor,
    ) -> Result<(), FailureReason> {
        match self {
            Action::FetchSource(action) => action.execute(event, ctx, executor).await,
            Action::BuildImage(action) => action.execute(ctx, executor).await,
            Action::DeployImage(action) => action.execute(ctx, executor).await,
        }
    }
}

impl FetchSource {
    pub fn fetch_command(&self) -> String {
        let fetch = format!(
            "fetch {} {}",
            shell_quote(&self.remote),
            shell_quote(&self.branch)
        );
        match &self.token_secret {
            Some(secret) => format!(
                "git -c \"http.extraHeader=Authorization: Bearer $(aws secretsmanager get-secret-value --region {} --secret-id {} --query SecretString --output text)\" {}",
                shell_quote(&self.region),
                shell_quote(secret),
                fetch
            ),
            None => format!("git {}", fetch),
        }
    }

    async fn execute(
        &self,
        event: &SourceEvent,
        ctx: &mut RunContext,
        executor: &dyn CommandExecutor,
    ) -> Result<(), FailureReason> {
        let target = event.commit.as_deref().unwrap_or("FETCH_HEAD");
        run_checked(executor, &self.fetch_command()).await?;
        run_checked(executor, &format!("git checkout --force {}", shell_quote(target))).await?;
        let head = run_checked(executor, "git rev-parse HEAD").await?;

        let commit = head.stdout.trim().to_string();
        tracing::info!(%commit, "Source fetched");
        ctx.commit = Some(commit);
        Ok(())
    }
}

impl BuildImage {
    async fn execute(
        &self,
        ctx: &mut RunContext,
        executor: &dyn CommandExecutor,
    ) -> Result<(), FailureReason> {
        let commit = ctx
            .commit
            .as_deref()
            .ok_or(FailureReason::MissingArtifact("source commit"))?;
        let tag = short_commit(commit)?;
        let spec = BuildSpec::render(&self.topology, &tag, self.descriptor_path.clone());

        for phase in &spec.phases {
            tracing::info!(phase = phase.name, "Build phase started");
            for command in &phase.commands {
                run_checked(executor, command).await?;
            }
        }

        spec.descriptor.write(&spec.descriptor_path)?;
        tracing::info!(
            latest = %spec.latest,
            pinned = %spec.pinned,
            descriptor = %spec.descriptor_path.display(),
            "Image pushed"
        );

        ctx.image = Some(BuiltImage {
            latest: spec.latest,
            pinned: spec.pinned,
        });
        Ok(())
    }
}

impl DeployImage {
    /// Registers a task definition revision running `image_uri` and prints
    /// its ARN.
    pub fn register_command(&self, image_uri: &str) -> String {
        let definition = self.topology.task_definition(image_uri).to_string();
        format!(
            "aws ecs register-task-definition --region {} --query taskDefinition.taskDefinitionArn --output text --cli-input-json {}",
            shell_quote(&self.topology.region),
            shell_quote(&definition)
        )
    }

    pub fn update_command(&self, task_definition: &str) -> String {
        format!(
            "aws ecs update-service --region {} --cluster {} --service {} --task-definition {} --force-new-deployment",
            shell_quote(&self.topology.region),
            shell_quote(&self.topology.cluster_name()),
            shell_quote(&self.topology.service_name()),
            shell_quote(task_definition)
        )
    }

    pub fn wait_command(&self) -> String {
        format!(
            "aws ecs wait services-stable --region {} --cluster {} --services {}",
            shell_quote(&self.topology.region),
            shell_quote(&self.topology.cluster_name()),
            shell_quote(&self.topology.service_name())
        )
    }

    async fn execute(
        &self,
        ctx: &mut RunContext,
        executor: &dyn CommandExecutor,
    ) -> Result<(), FailureReason> {
        match tokio::time::timeout(self.timeout, self.deploy(ctx, executor)).await {
            Ok(result) => result,
            Err(_) => Err(FailureReason::TimedOut {
                after: self.timeout,
            }),
        }
    }

    async fn deploy(
        &self,
        ctx: &mut RunContext,
        executor: &dyn CommandExecutor,
    ) -> Result<(), FailureReason> {
        let built = ctx
            .image
            .as_ref()
            .ok_or(FailureReason::MissingArtifact("built image"))?;

        let container = self.topology.container_name();
        let definitions = ImageDefinitions::read(&self.descriptor_path)?;
        let entry = definitions
            .find(&container)
            .ok_or_else(|| FailureReason::ContainerNotListed(container.clone()))?;

        let expected = built.latest.uri();
        if entry.image_uri != expected {
            return Err(FailureReason::ImageMismatch {
                expected,
                found: entry.image_uri.clone(),
            });
        }

        let registered = run_checked(executor, &self.register_command(&entry.image_uri)).await?;
        let task_definition = registered.stdout.trim().to_string();
        if task_definition.is_empty() {
            return Err(FailureReason::MissingArtifact("task definition revision"));
        }
        tracing::info!(%task_definition, image = %entry.image_uri, "Task definition registered");

        run_checked(executor, &self.update_command(&task_definition)).await?;
        run_checked(executor, &self.wait_command()).await?;

        tracing::info!(
            service = %self.topology.service_name(),
            image = %entry.image_uri,
            "Service updated"
        );
        ctx.task_definition = Some(task_definition);
        Ok(())
    }
}

/// Run a command, treating a non-zero exit as failure.
async fn run_checked(
    executor: &dyn CommandExecutor,
    command: &str,
) -> Result<CommandOutput, FailureReason> {
    let output = executor.run(command).await?;
    if !output.success() {
        return Err(FailureReason::NonZeroExit {
            command: command.to_string(),
            status: match output.code {
                Some(code) => format!("exit code {}", code),
                None => "a signal".to_string(),
            },
            stderr: output.stderr.trim().to_string(),
        });
    }
    Ok(output)
}

/// Named, ordered group of actions.
#[derive(Debug, Clone)]
pub struct Stage {
    pub kind: StageKind,
    pub actions: Vec<Action>,
}

/// Outcome of one completed stage.
#[derive(Debug, Clone, Serialize)]
pub struct StageReport {
    pub stage: StageKind,
    pub actions: Vec<&'static str>,
    pub started_at: DateTime<Utc>,
    pub finished_at: DateTime<Utc>,
}

/// Outcome of a successful run.
#[derive(Debug, Clone, Serialize)]
pub struct RunReport {
    pub pipeline: String,
    pub commit: Option<String>,
    pub image: Option<BuiltImage>,
    /// Task definition revision the service was moved to
    pub task_definition: Option<String>,
    pub stages: Vec<StageReport>,
    pub started_at: DateTime<Utc>,
    pub finished_at: DateTime<Utc>,
}

#[derive(Debug)]
pub struct Pipeline {
    name: String,
    branch: String,
    stages: Vec<Stage>,
}

impl Pipeline {
    /// Build a pipeline, enforcing `Source → Build → Deploy` with at least
    /// one action per stage and every action in its own stage.
    pub fn new(
        name: impl Into<String>,
        branch: impl Into<String>,
        stages: Vec<Stage>,
    ) -> Result<Self, PipelineError> {
        let kinds: Vec<StageKind> = stages.iter().map(|s| s.kind).collect();
        if kinds != StageKind::ORDER {
            return Err(PipelineError::InvalidStages(kinds));
        }

        for stage in &stages {
            if stage.actions.is_empty() {
                return Err(PipelineError::EmptyStage(stage.kind));
            }
            if let Some(action) = stage.actions.iter().find(|a| a.stage() != stage.kind) {
                return Err(PipelineError::MisplacedAction {
                    action: action.name(),
                    stage: stage.kind,
                });
            }
        }

        Ok(Self {
            name: name.into(),
            branch: branch.into(),
            stages,
        })
    }

    /// The standard pipeline for a topology. The descriptor file lives in
    /// `workdir`, where the commands also run.
    pub fn from_topology(topology: &DeploymentTopology, workdir: &Path) -> Result<Self, PipelineError> {
        let spec = &topology.pipeline;
        let descriptor_path = workdir.join(&spec.build.descriptor_file);

        let stages = vec![
            Stage {
                kind: StageKind::Source,
                actions: vec![Action::FetchSource(FetchSource {
                    remote: spec.source.remote.clone(),
                    branch: spec.source.branch.clone(),
                    region: topology.region.clone(),
                    token_secret: spec.source.token_secret.clone(),
                })],
            },
            Stage {
                kind: StageKind::Build,
                actions: vec![Action::BuildImage(BuildImage {
                    topology: topology.clone(),
                    descriptor_path: descriptor_path.clone(),
                })],
            },
            Stage {
                kind: StageKind::Deploy,
                actions: vec![Action::DeployImage(DeployImage {
                    topology: topology.clone(),
                    descriptor_path,
                    timeout: spec.deploy.timeout(),
                })],
            },
        ];

        Self::new(topology.pipeline_name(), spec.source.branch.clone(), stages)
    }

    pub fn name(&self) -> &str {
        &self.name
    }

    pub fn branch(&self) -> &str {
        &self.branch
    }

    pub fn stages(&self) -> &[Stage] {
        &self.stages
    }

    /// Whether a push event should trigger this pipeline.
    pub fn accepts(&self, event: &SourceEvent) -> bool {
        event.branch == self.branch
    }

    /// Run every stage for `event`, halting at the first failure.
    ///
    /// A push for another branch or with a non-hex commit is refused before
    /// any command runs.
    pub async fn run(
        &self,
        event: &SourceEvent,
        executor: &dyn CommandExecutor,
    ) -> Result<RunReport, PipelineError> {
        if !self.accepts(event) {
            return Err(PipelineError::BranchMismatch {
                expected: self.branch.clone(),
                got: event.branch.clone(),
            });
        }
        if let Some(commit) = &event.commit {
            short_commit(commit)?;
        }

        let started_at = Utc::now();
        let mut ctx = RunContext::default();
        let mut reports = Vec::with_capacity(self.stages.len());

        tracing::info!(
            pipeline = %self.name,
            branch = %event.branch,
            commit = ?event.commit,
            "Pipeline triggered"
        );

        for stage in &self.stages {
            let stage_started = Utc::now();
            tracing::info!(stage = %stage.kind, "Stage started");

            for action in &stage.actions {
                if let Err(reason) = action.execute(event, &mut ctx, executor).await {
                    tracing::error!(
                        pipeline = %self.name,
                        stage = %stage.kind,
                        action = action.name(),
                        error = %reason,
                        "Stage failed, halting pipeline"
                    );
                    return Err(PipelineError::StageFailure {
                        stage: stage.kind,
                        action: action.name(),
                        reason,
                    });
                }
            }

            reports.push(StageReport {
                stage: stage.kind,
                actions: stage.actions.iter().map(Action::name).collect(),
                started_at: stage_started,
                finished_at: Utc::now(),
            });
            tracing::info!(stage = %stage.kind, "Stage succeeded");
        }

        tracing::info!(pipeline = %self.name, "Pipeline succeeded");

        Ok(RunReport {
            pipeline: self.name.clone(),
            commit: ctx.commit,
            image: ctx.image,
            task_definition: ctx.task_definition,
            stages: reports,
            started_at,
            finished_at: Utc::now(),
        })
    }
}

/// Why an action failed.
#[derive(Debug, thiserror::Error)]
pub enum FailureReason {
    #[error("`{command}` exited with {status}: {stderr}")]
    NonZeroExit {
        command: String,
        status: String,
        stderr: String,
    },
    #[error(transparent)]
    Exec(#[from] ExecError),
    #[error("Timed out after {after:?}")]
    TimedOut { after: Duration },
    #[error(transparent)]
    Descriptor(#[from] DescriptorError),
    #[error(transparent)]
    Image(#[from] ImageError),
    #[error("No {0} from an earlier stage")]
    MissingArtifact(&'static str),
    #[error("Descriptor does not list container '{0}'")]
    ContainerNotListed(String),
    #[error("Descriptor names {found}, but the build produced {expected}")]
    ImageMismatch { expected: String, found: String },
}

#[derive(Debug, thiserror::Error)]
pub enum PipelineError {
    #[error("Pipeline watches branch '{expected}', push was to '{got}'")]
    BranchMismatch { expected: String, got: String },
    #[error("Push event refused: {0}")]
    InvalidCommit(#[from] ImageError),
    #[error("Stages must be Source, Build, Deploy; got {0:?}")]
    InvalidStages(Vec<StageKind>),
    #[error("{0} stage has no actions")]
    EmptyStage(StageKind),
    #[error("Action {action} does not belong in the {stage} stage")]
    MisplacedAction { action: &'static str, stage: StageKind },
    #[error("{stage} stage failed in {action}: {reason}")]
    StageFailure {
        stage: StageKind,
        action: &'static str,
        #[source]
        reason: FailureReason,
    },
}

#[cfg(test)]
mod tests {
    use super::*;
    use async_trait::async_trait;
    use std::sync::Mutex;

    const COMMIT: &str = "9f2c1e0d4b5a69788796a5b4c3d2e1f001122334";
    const TASK_DEFINITION: &str =
        "arn:aws:ecs:us-east-1:000000000000:task-definition/StarterKitApi-Cluster-TaskDefinition:7";

    /// Records commands; fails or hangs on commands containing a pattern.
    #[derive(Default)]
    struct ScriptedExecutor {
        commands: Mutex<Vec<String>>,
        fail_on: Option<&'static str>,
        hang_on: Option<&'static str>,
    }

    impl ScriptedExecutor {
        fn failing_on(pattern: &'static str) -> Self {
            Self {
                fail_on: Some(pattern),
                ..Default::default()
            }
        }

        fn hanging_on(pattern: &'static str) -> Self {
            Self {
                hang_on: Some(pattern),
                ..Default::default()
            }
        }

        fn commands(&self) -> Vec<String> {
            self.commands.lock().unwrap().clone()
        }

        fn ran(&self, pattern: &str) -> bool {
            self.commands().iter().any(|c| c.contains(pattern))
        }
    }

    #[async_trait]
    impl CommandExecutor for ScriptedExecutor {
        async fn run(&self, command: &str) -> Result<CommandOutput, ExecError> {
            self.commands.lock().unwrap().push(command.to_string());

            if self.hang_on.is_some_and(|p| command.contains(p)) {
                tokio::time::sleep(Duration::from_secs(24 * 3600)).await;
            }
            if self.fail_on.is_some_and(|p| command.contains(p)) {
                return Ok(CommandOutput {
                    code: Some(1),
                    stdout: String::new(),
                    stderr: "boom\n".to_string(),
                });
            }

            let stdout = if command == "git rev-parse HEAD" {
                format!("{}\n", COMMIT)
            } else if command.contains("register-task-definition") {
                format!("{}\n", TASK_DEFINITION)
            } else {
                String::new()
            };
            Ok(CommandOutput {
                code: Some(0),
                stdout,
                stderr: String::new(),
            })
        }
    }

    fn push(branch: &str) -> SourceEvent {
        SourceEvent {
            branch: branch.to_string(),
            commit: Some(COMMIT.to_string()),
        }
    }

    fn pipeline(workdir: &Path) -> Pipeline {
        Pipeline::from_topology(&DeploymentTopology::default(), workdir).unwrap()
    }

    #[test]
    fn test_from_topology_stage_order() {
        let dir = tempfile::tempdir().unwrap();
        let pipeline = pipeline(dir.path());
        let kinds: Vec<_> = pipeline.stages().iter().map(|s| s.kind).collect();
        assert_eq!(kinds, StageKind::ORDER);
        assert_eq!(pipeline.name(), "StarterKitApi-Pipeline");
        assert_eq!(pipeline.branch(), "main");
    }

    #[test]
    fn test_new_rejects_out_of_order_stages() {
        let dir = tempfile::tempdir().unwrap();
        let mut stages = pipeline(dir.path()).stages;
        stages.swap(1, 2);
        let err = Pipeline::new("p", "main", stages).unwrap_err();
        assert!(matches!(err, PipelineError::InvalidStages(_)));
    }

    #[test]
    fn test_new_rejects_empty_and_misplaced() {
        let dir = tempfile::tempdir().unwrap();

        let mut stages = pipeline(dir.path()).stages;
        stages[1].actions.clear();
        assert!(matches!(
            Pipeline::new("p", "main", stages).unwrap_err(),
            PipelineError::EmptyStage(StageKind::Build)
        ));

        let mut stages = pipeline(dir.path()).stages;
        let deploy = stages[2].actions[0].clone();
        stages[0].actions.push(deploy);
        assert!(matches!(
            Pipeline::new("p", "main", stages).unwrap_err(),
            PipelineError::MisplacedAction {
                action: "deploy_image",
                stage: StageKind::Source
            }
        ));
    }

    #[tokio::test]
    async fn test_successful_run_executes_stages_in_order() {
        let dir = tempfile::tempdir().unwrap();
        let executor = ScriptedExecutor::default();

        let report = pipeline(dir.path()).run(&push("main"), &executor).await.unwrap();

        let commands = executor.commands();
        let position = |pattern: &str| commands.iter().position(|c| c.contains(pattern)).unwrap();
        assert!(position("git fetch") < position("git rev-parse"));
        assert!(position("git rev-parse") < position("docker login"));
        assert!(position("docker login") < position("docker build"));
        assert!(position("docker build") < position("docker tag"));
        assert!(position("docker tag") < position("docker push"));
        assert!(position("docker push") < position("register-task-definition"));
        assert!(position("register-task-definition") < position("update-service"));
        assert!(position("update-service") < position("services-stable"));
        assert!(commands[1].ends_with(COMMIT));

        let stages: Vec<_> = report.stages.iter().map(|s| s.stage).collect();
        assert_eq!(stages, StageKind::ORDER);
        assert_eq!(report.commit.as_deref(), Some(COMMIT));
        assert_eq!(report.task_definition.as_deref(), Some(TASK_DEFINITION));

        let image = report.image.unwrap();
        assert_eq!(image.pinned.tag, "9f2c1e0");
        assert_eq!(image.latest.tag, "latest");

        let descriptor = ImageDefinitions::read(dir.path().join("imagedefinitions.json")).unwrap();
        assert_eq!(
            descriptor.find("StarterKitApi-Container").unwrap().image_uri,
            image.latest.uri()
        );
    }

    #[tokio::test]
    async fn test_branch_mismatch_runs_nothing() {
        let dir = tempfile::tempdir().unwrap();
        let executor = ScriptedExecutor::default();

        let err = pipeline(dir.path())
            .run(&push("feature"), &executor)
            .await
            .unwrap_err();

        assert!(matches!(err, PipelineError::BranchMismatch { .. }));
        assert!(executor.commands().is_empty());
    }

    #[tokio::test]
    async fn test_source_failure_halts_before_build() {
        let dir = tempfile::tempdir().unwrap();
        let executor = ScriptedExecutor::failing_on("git checkout");

        let err = pipeline(dir.path()).run(&push("main"), &executor).await.unwrap_err();

        match err {
            PipelineError::StageFailure { stage, action, reason } => {
                assert_eq!(stage, StageKind::Source);
                assert_eq!(action, "fetch_source");
                assert!(reason.to_string().contains("exit code 1"));
            }
            other => panic!("unexpected error: {other}"),
        }
        assert!(!executor.ran("docker"));
    }

    #[tokio::test]
    async fn test_build_failure_halts_before_deploy() {
        let dir = tempfile::tempdir().unwrap();
        let executor = ScriptedExecutor::failing_on("docker push");

        let err = pipeline(dir.path()).run(&push("main"), &executor).await.unwrap_err();

        assert!(matches!(
            err,
            PipelineError::StageFailure {
                stage: StageKind::Build,
                ..
            }
        ));
        assert!(!executor.ran("aws ecs"));
        // Only the first push ran
        assert_eq!(
            executor.commands().iter().filter(|c| c.contains("docker push")).count(),
            1
        );
        assert!(!dir.path().join("imagedefinitions.json").exists());
    }

    #[tokio::test(start_paused = true)]
    async fn test_deploy_times_out_after_twenty_minutes() {
        let dir = tempfile::tempdir().unwrap();
        let executor = ScriptedExecutor::hanging_on("services-stable");

        let err = pipeline(dir.path()).run(&push("main"), &executor).await.unwrap_err();

        match err {
            PipelineError::StageFailure {
                stage: StageKind::Deploy,
                reason: FailureReason::TimedOut { after },
                ..
            } => assert_eq!(after, Duration::from_secs(20 * 60)),
            other => panic!("unexpected error: {other}"),
        }
    }

    #[tokio::test]
    async fn test_deploy_rejects_descriptor_for_other_image() {
        let dir = tempfile::tempdir().unwrap();
        let topology = DeploymentTopology::default();
        let pipeline = Pipeline::from_topology(&topology, dir.path()).unwrap();
        let Action::DeployImage(deploy) = &pipeline.stages()[2].actions[0] else {
            panic!("deploy stage should hold a deploy action");
        };

        let built = ImageReference::latest(topology.repository_uri());
        let stale = ImageReference::latest("registry.example/somewhere-else");
        ImageDefinitions::single(topology.container_name(), &stale)
            .write(&deploy.descriptor_path)
            .unwrap();

        let mut ctx = RunContext {
            commit: Some(COMMIT.to_string()),
            image: Some(BuiltImage {
                pinned: built.with_tag("9f2c1e0"),
                latest: built,
            }),
            task_definition: None,
        };
        let executor = ScriptedExecutor::default();
        let err = deploy.execute(&mut ctx, &executor).await.unwrap_err();

        assert!(matches!(err, FailureReason::ImageMismatch { .. }));
        assert!(executor.commands().is_empty());
    }

    #[tokio::test]
    async fn test_deploy_without_build_artifact() {
        let dir = tempfile::tempdir().unwrap();
        let pipeline = pipeline(dir.path());
        let Action::DeployImage(deploy) = &pipeline.stages()[2].actions[0] else {
            panic!("deploy stage should hold a deploy action");
        };

        let err = deploy
            .execute(&mut RunContext::default(), &ScriptedExecutor::default())
            .await
            .unwrap_err();
        assert!(matches!(err, FailureReason::MissingArtifact("built image")));
    }

    #[tokio::test]
    async fn test_deploy_moves_service_to_descriptor_image() {
        let dir = tempfile::tempdir().unwrap();
        let topology = DeploymentTopology::default();
        let executor = ScriptedExecutor::default();

        Pipeline::from_topology(&topology, dir.path())
            .unwrap()
            .run(&push("main"), &executor)
            .await
            .unwrap();

        let commands = executor.commands();
        let built = ImageReference::latest(topology.repository_uri()).uri();
        let register = commands
            .iter()
            .find(|c| c.contains("register-task-definition"))
            .unwrap();
        assert!(register.contains(&format!("\"image\":\"{}\"", built)), "{register}");
        assert!(register.contains("StarterKitApi-Container"));

        let update = commands.iter().find(|c| c.contains("update-service")).unwrap();
        assert!(
            update.contains(&format!("--task-definition {}", TASK_DEFINITION)),
            "{update}"
        );
    }

    #[tokio::test]
    async fn test_deploy_fails_without_registered_revision() {
        struct SilentRegister(ScriptedExecutor);

        #[async_trait]
        impl CommandExecutor for SilentRegister {
            async fn run(&self, command: &str) -> Result<CommandOutput, ExecError> {
                let mut output = self.0.run(command).await?;
                if command.contains("register-task-definition") {
                    output.stdout.clear();
                }
                Ok(output)
            }
        }

        let dir = tempfile::tempdir().unwrap();
        let executor = SilentRegister(ScriptedExecutor::default());
        let err = pipeline(dir.path()).run(&push("main"), &executor).await.unwrap_err();

        assert!(matches!(
            err,
            PipelineError::StageFailure {
                stage: StageKind::Deploy,
                reason: FailureReason::MissingArtifact("task definition revision"),
                ..
            }
        ));
        assert!(!executor.0.ran("update-service"));
    }

    #[tokio::test]
    async fn test_non_hex_commit_runs_nothing() {
        let dir = tempfile::tempdir().unwrap();
        let executor = ScriptedExecutor::default();
        let event = SourceEvent {
            branch: "main".to_string(),
            commit: Some("9f2c1e0; touch pwned".to_string()),
        };

        let err = pipeline(dir.path()).run(&event, &executor).await.unwrap_err();

        assert!(matches!(
            err,
            PipelineError::InvalidCommit(ImageError::InvalidCommit(_))
        ));
        assert!(executor.commands().is_empty());
    }

    #[test]
    fn test_fetch_command_quotes_values() {
        let fetch = FetchSource {
            remote: "origin".to_string(),
            branch: "release; rm -rf /".to_string(),
            region: "us-east-1".to_string(),
            token_secret: None,
        };
        assert_eq!(fetch.fetch_command(), "git fetch origin 'release; rm -rf /'");
    }

    #[tokio::test]
    async fn test_token_secret_resolved_inside_fetch() {
        let dir = tempfile::tempdir().unwrap();
        let mut topology = DeploymentTopology::default();
        topology.pipeline.source.token_secret = Some("starter-kit/github/token".to_string());
        let executor = ScriptedExecutor::default();

        Pipeline::from_topology(&topology, dir.path())
            .unwrap()
            .run(&push("main"), &executor)
            .await
            .unwrap();

        let fetch = &executor.commands()[0];
        assert!(fetch.starts_with("git -c \"http.extraHeader=Authorization: Bearer $("));
        assert!(fetch.contains("--secret-id starter-kit/github/token"));
        assert!(fetch.ends_with("fetch origin main"));
    }
}
