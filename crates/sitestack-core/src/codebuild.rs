//! Build project descriptor and its build specification.

use serde::{Deserialize, Serialize};
use serde_json::{Map, Value, json};
use std::collections::BTreeMap;

use crate::graph::{Construct, ConstructKind};
use crate::iam::{PolicyStatement, Role};
use crate::{CfnResource, ConstructPath, Error, LogicalId, Pseudo, Result, Token};

pub const BUILD_SPEC_VERSION: &str = "0.2";

/// Phases the build runner executes, in this order.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum PhaseKind {
    Install,
    PreBuild,
    Build,
    PostBuild,
}

impl PhaseKind {
    pub fn as_str(&self) -> &'static str {
        match self {
            PhaseKind::Install => "install",
            PhaseKind::PreBuild => "pre_build",
            PhaseKind::Build => "build",
            PhaseKind::PostBuild => "post_build",
        }
    }
}

impl std::str::FromStr for PhaseKind {
    type Err = Error;

    fn from_str(s: &str) -> std::result::Result<Self, Self::Err> {
        match s {
            "install" => Ok(PhaseKind::Install),
            "pre_build" | "pre-build" => Ok(PhaseKind::PreBuild),
            "build" => Ok(PhaseKind::Build),
            "post_build" | "post-build" => Ok(PhaseKind::PostBuild),
            other => Err(Error::InvalidInput(format!("unknown build phase: {other}"))),
        }
    }
}

/// Commands (and for `install`, runtime versions) of one phase.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct BuildPhase {
    pub runtime_versions: BTreeMap<String, String>,
    pub commands: Vec<String>,
}

/// Files the build produces.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct BuildArtifacts {
    pub files: Vec<String>,
    pub base_directory: Option<String>,
}

/// A multi-phase build specification.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct BuildSpec {
    pub phases: BTreeMap<PhaseKind, BuildPhase>,
    pub artifacts: Option<BuildArtifacts>,
}

impl BuildSpec {
    pub fn new() -> Self {
        Self::default()
    }

    /// Append commands to a phase.
    pub fn with_commands<I, S>(mut self, phase: PhaseKind, commands: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        self.phases
            .entry(phase)
            .or_default()
            .commands
            .extend(commands.into_iter().map(Into::into));
        self
    }

    pub fn with_runtime(mut self, runtime: impl Into<String>, version: impl Into<String>) -> Self {
        self.phases
            .entry(PhaseKind::Install)
            .or_default()
            .runtime_versions
            .insert(runtime.into(), version.into());
        self
    }

    pub fn with_artifacts(mut self, artifacts: BuildArtifacts) -> Self {
        self.artifacts = Some(artifacts);
        self
    }

    /// Commands in execution order across all phases.
    pub fn all_commands(&self) -> impl Iterator<Item = (PhaseKind, &str)> {
        self.phases
            .iter()
            .flat_map(|(kind, phase)| phase.commands.iter().map(move |c| (*kind, c.as_str())))
    }

    pub fn to_value(&self) -> Value {
        let mut phases = Map::new();
        for (kind, phase) in &self.phases {
            let mut entry = Map::new();
            if !phase.runtime_versions.is_empty() {
                entry.insert("runtime-versions".to_string(), json!(phase.runtime_versions));
            }
            entry.insert("commands".to_string(), json!(phase.commands));
            phases.insert(kind.as_str().to_string(), Value::Object(entry));
        }

        let mut spec = json!({
            "version": BUILD_SPEC_VERSION,
            "phases": phases,
        });
        if let Some(artifacts) = &self.artifacts {
            let mut entry = json!({ "files": artifacts.files });
            if let Some(base) = &artifacts.base_directory {
                entry["base-directory"] = json!(base);
            }
            spec["artifacts"] = entry;
        }
        spec
    }

    /// The build spec as the build runner reads it.
    pub fn to_json_string(&self) -> Result<String> {
        Ok(serde_json::to_string_pretty(&self.to_value())?)
    }
}

/// Container the build runs in.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct BuildEnvironment {
    pub image: String,
    pub compute_type: String,
}

impl Default for BuildEnvironment {
    fn default() -> Self {
        Self {
            image: "aws/codebuild/standard:7.0".to_string(),
            compute_type: "BUILD_GENERAL1_SMALL".to_string(),
        }
    }
}

/// A build project driven by a pipeline.
#[derive(Debug, Clone, PartialEq)]
pub struct Project {
    pub path: ConstructPath,
    pub build_spec: BuildSpec,
    pub environment: BuildEnvironment,
    role: Option<LogicalId>,
}

impl Project {
    pub fn new(id: &str, build_spec: BuildSpec) -> Self {
        Self {
            path: ConstructPath::root(id),
            build_spec,
            environment: BuildEnvironment::default(),
            role: None,
        }
    }

    pub fn with_environment(mut self, environment: BuildEnvironment) -> Self {
        self.environment = environment;
        self
    }

    /// Service role the build assumes.
    ///
    /// The role's default policy names this project in its log statements,
    /// so the project must not depend on that policy.
    pub fn with_role(mut self, role: &Role) -> Self {
        self.role = Some(role.logical_id());
        self
    }

    pub fn logical_id(&self) -> LogicalId {
        self.path.resource().logical_id()
    }

    pub fn project_name(&self) -> Token {
        Token::Ref(self.logical_id())
    }

    pub fn project_arn(&self) -> Token {
        Token::get_att(&self.logical_id(), "Arn")
    }

    /// Statements the service role needs to write build logs.
    pub fn log_statements(&self) -> Vec<PolicyStatement> {
        let log_group = |suffix: &str| {
            Token::concat(vec![
                Token::literal("arn:"),
                Token::Pseudo(Pseudo::Partition),
                Token::literal(":logs:"),
                Token::Pseudo(Pseudo::Region),
                Token::literal(":"),
                Token::Pseudo(Pseudo::AccountId),
                Token::literal(":log-group:/aws/codebuild/"),
                self.project_name(),
                Token::literal(suffix),
            ])
        };
        vec![
            PolicyStatement::allow()
                .actions(["logs:CreateLogGroup", "logs:CreateLogStream", "logs:PutLogEvents"])
                .resource(log_group(""))
                .resource(log_group(":*")),
        ]
    }

    fn render_resources(&self) -> Result<Vec<CfnResource>> {
        let role_id = self.role.clone().ok_or_else(|| {
            Error::InvalidInput(format!("build project '{}' has no service role", self.path))
        })?;

        let project = CfnResource::new(
            self.path.resource(),
            "AWS::CodeBuild::Project",
            json!({
                "Artifacts": {"Type": "CODEPIPELINE"},
                "Cache": {"Type": "NO_CACHE"},
                "EncryptionKey": "alias/aws/s3",
                "Environment": {
                    "ComputeType": self.environment.compute_type,
                    "Image": self.environment.image,
                    "ImagePullCredentialsType": "CODEBUILD",
                    "PrivilegedMode": false,
                    "Type": "LINUX_CONTAINER",
                },
                "ServiceRole": Token::get_att(&role_id, "Arn"),
                "Source": {
                    "BuildSpec": self.build_spec.to_json_string()?,
                    "Type": "CODEPIPELINE",
                },
            }),
        );
        Ok(vec![project])
    }
}

impl Construct for Project {
    fn kind(&self) -> ConstructKind {
        ConstructKind::BuildProject
    }

    fn path(&self) -> &ConstructPath {
        &self.path
    }

    fn render(&self) -> Result<Vec<CfnResource>> {
        self.render_resources()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::iam::Principal;

    fn spec() -> BuildSpec {
        BuildSpec::new()
            .with_runtime("nodejs", "10")
            .with_commands(PhaseKind::PostBuild, ["aws s3 cp ./build s3://example.dev/ --recursive"])
            .with_commands(PhaseKind::Install, ["npm ci"])
            .with_commands(PhaseKind::Build, ["npm run build"])
            .with_artifacts(BuildArtifacts {
                files: vec!["**/*".to_string()],
                base_directory: Some("build".to_string()),
            })
    }

    #[test]
    fn test_build_spec_shape() {
        let value = spec().to_value();
        assert_eq!(value["version"], json!("0.2"));
        assert_eq!(value["phases"]["install"]["runtime-versions"]["nodejs"], json!("10"));
        assert_eq!(value["phases"]["install"]["commands"], json!(["npm ci"]));
        assert!(value["phases"]["build"].get("runtime-versions").is_none());
        assert_eq!(value["artifacts"]["base-directory"], json!("build"));
    }

    #[test]
    fn test_commands_run_in_phase_order() {
        let phases: Vec<PhaseKind> = spec().all_commands().map(|(k, _)| k).collect();
        assert_eq!(phases, vec![PhaseKind::Install, PhaseKind::Build, PhaseKind::PostBuild]);
    }

    #[test]
    fn test_project_requires_role() {
        let project = Project::new("codeBuild", spec());
        assert!(matches!(project.render(), Err(Error::InvalidInput(_))));

        let role = Role::new(ConstructPath::root("pipelineRole"), Principal::service("codebuild.amazonaws.com"))
            .with_statements(project.log_statements());
        let project = project.with_role(&role);
        let resources = project.render().unwrap();
        let r = &resources[0];
        assert_eq!(r.property("/Source/Type"), Some(&json!("CODEPIPELINE")));
        assert!(r.depends_on.is_empty());
        assert!(r.references().contains(role.logical_id().as_str()));

        let embedded: Value =
            serde_json::from_str(r.property("/Source/BuildSpec").unwrap().as_str().unwrap()).unwrap();
        assert_eq!(embedded, spec().to_value());
    }

    #[test]
    fn test_phase_parse() {
        assert_eq!("post_build".parse::<PhaseKind>().unwrap(), PhaseKind::PostBuild);
        assert_eq!("pre-build".parse::<PhaseKind>().unwrap(), PhaseKind::PreBuild);
        assert!("deploy".parse::<PhaseKind>().is_err());
    }
}
