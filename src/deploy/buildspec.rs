//! Build stage commands.
//!
//! Renders the ordered shell commands that log in to the registry, build the
//! image, tag it `latest` and with the short commit hash, and push both tags.
//! The commands are plain strings; the pipeline runs them in order and stops
//! at the first non-zero exit.

use std::fmt::Write as _;
use std::path::PathBuf;

use super::executor::shell_quote;
use super::image::{ImageDefinitions, ImageReference};
use super::topology::DeploymentTopology;

/// Named group of commands, run in order.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct BuildPhase {
    pub name: &'static str,
    pub commands: Vec<String>,
}

/// Everything the build stage does for one commit.
#[derive(Debug, Clone)]
pub struct BuildSpec {
    pub phases: Vec<BuildPhase>,
    /// Image tagged `latest`; this is what the descriptor names
    pub latest: ImageReference,
    /// Same image tagged with the short commit hash
    pub pinned: ImageReference,
    pub descriptor_path: PathBuf,
    pub descriptor: ImageDefinitions,
}

impl BuildSpec {
    /// Render the build for `tag` (normally the short commit hash).
    pub fn render(topology: &DeploymentTopology, tag: &str, descriptor_path: PathBuf) -> Self {
        let build = &topology.pipeline.build;
        let latest = ImageReference::latest(topology.repository_uri());
        let pinned = latest.with_tag(tag);
        let (latest_uri, pinned_uri) = (latest.uri(), pinned.uri());
        let (latest_arg, pinned_arg) = (shell_quote(&latest_uri), shell_quote(&pinned_uri));

        let phases = vec![
            BuildPhase {
                name: "pre_build",
                commands: vec![format!(
                    "aws ecr get-login-password --region {} | docker login --username AWS --password-stdin {}",
                    shell_quote(&topology.region),
                    shell_quote(&topology.registry())
                )],
            },
            BuildPhase {
                name: "build",
                commands: vec![
                    format!(
                        "docker build -t {} -f {} {}",
                        latest_arg,
                        shell_quote(&build.build_file),
                        shell_quote(&build.context)
                    ),
                    format!("docker tag {} {}", latest_arg, pinned_arg),
                ],
            },
            BuildPhase {
                name: "post_build",
                commands: vec![
                    format!("docker push {}", latest_arg),
                    format!("docker push {}", pinned_arg),
                ],
            },
        ];

        let descriptor = ImageDefinitions::single(topology.container_name(), &latest);

        Self {
            phases,
            latest,
            pinned,
            descriptor_path,
            descriptor,
        }
    }

    /// All commands in execution order.
    pub fn commands(&self) -> impl Iterator<Item = &str> {
        self.phases
            .iter()
            .flat_map(|phase| phase.commands.iter().map(String::as_str))
    }

    /// Standalone shell script, including the descriptor write.
    pub fn to_script(&self) -> String {
        let mut script = String::from("#!/bin/sh\nset -e\n");
        for phase in &self.phases {
            let _ = writeln!(script, "\n# {}", phase.name);
            for command in &phase.commands {
                let _ = writeln!(script, "{}", command);
            }
        }
        // Serializing a Vec of string pairs cannot fail
        let json = self.descriptor.to_json().unwrap_or_default();
        let _ = writeln!(
            script,
            "cat > {} <<'EOF'\n{}\nEOF",
            shell_quote(&self.descriptor_path.to_string_lossy()),
            json
        );
        script
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn spec() -> BuildSpec {
        let topology = DeploymentTopology {
            account_id: "123456789012".to_string(),
            ..Default::default()
        };
        BuildSpec::render(&topology, "abc1234", PathBuf::from("imagedefinitions.json"))
    }

    #[test]
    fn test_phase_order() {
        let names: Vec<_> = spec().phases.iter().map(|p| p.name).collect();
        assert_eq!(names, vec!["pre_build", "build", "post_build"]);
    }

    #[test]
    fn test_login_precedes_build_and_push() {
        let commands: Vec<_> = spec().commands().map(str::to_string).collect();
        assert_eq!(commands.len(), 5);
        assert!(commands[0].contains("docker login"));
        assert!(commands[0].contains("123456789012.dkr.ecr.us-east-1.amazonaws.com"));
        assert!(commands[1].starts_with("docker build"));
        assert!(commands[2].starts_with("docker tag"));
        assert!(commands[3].starts_with("docker push"));
        assert!(commands[4].starts_with("docker push"));
    }

    #[test]
    fn test_both_tags_pushed() {
        let spec = spec();
        let repo = "123456789012.dkr.ecr.us-east-1.amazonaws.com/starter-kit-api";
        assert_eq!(spec.latest.uri(), format!("{}:latest", repo));
        assert_eq!(spec.pinned.uri(), format!("{}:abc1234", repo));

        let pushes: Vec<_> = spec
            .commands()
            .filter(|c| c.starts_with("docker push"))
            .collect();
        assert_eq!(
            pushes,
            vec![
                format!("docker push {}:latest", repo),
                format!("docker push {}:abc1234", repo)
            ]
        );
    }

    #[test]
    fn test_descriptor_names_container_and_latest() {
        let spec = spec();
        let entry = spec.descriptor.find("StarterKitApi-Container").unwrap();
        assert_eq!(entry.image_uri, spec.latest.uri());
    }

    #[test]
    fn test_script_ends_with_descriptor() {
        let script = spec().to_script();
        assert!(script.starts_with("#!/bin/sh\nset -e\n"));
        assert!(script.contains("# post_build"));
        assert!(script.trim_end().ends_with("EOF"));
        assert!(script.contains("cat > imagedefinitions.json <<'EOF'"));
    }

    #[test]
    fn test_paths_with_spaces_stay_single_words() {
        let mut topology = DeploymentTopology::default();
        topology.pipeline.build.build_file = "docker/App Dockerfile".to_string();
        topology.pipeline.build.context = "my context".to_string();
        let spec = BuildSpec::render(&topology, "abc1234", PathBuf::from("out dir/imagedefinitions.json"));

        let build = spec.commands().nth(1).unwrap();
        assert!(build.ends_with("-f 'docker/App Dockerfile' 'my context'"), "{build}");
        assert!(spec
            .to_script()
            .contains("cat > 'out dir/imagedefinitions.json' <<'EOF'"));
    }

    #[test]
    fn test_hostile_region_is_quoted() {
        let topology = DeploymentTopology {
            region: "us-east-1; touch pwned".to_string(),
            ..Default::default()
        };
        let spec = BuildSpec::render(&topology, "abc1234", PathBuf::from("imagedefinitions.json"));
        let login = spec.commands().next().unwrap();
        assert!(login.contains("--region 'us-east-1; touch pwned' |"), "{login}");
    }
}
