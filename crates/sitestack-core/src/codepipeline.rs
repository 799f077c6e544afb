//! Continuous-delivery pipeline descriptor.

use serde::{Deserialize, Serialize};
use serde_json::{Value, json};
use std::collections::HashSet;

use crate::graph::{Construct, ConstructKind};
use crate::iam::{PolicyStatement, Principal, Role};
use crate::s3::Bucket;
use crate::{CfnResource, ConstructPath, Error, LogicalId, RemovalPolicy, Result, Token};

const BUCKET_READ_ACTIONS: [&str; 3] = ["s3:GetObject*", "s3:GetBucket*", "s3:List*"];
const BUCKET_WRITE_ACTIONS: [&str; 3] = ["s3:DeleteObject*", "s3:PutObject", "s3:Abort*"];
const BUILD_ACTIONS: [&str; 3] = ["codebuild:BatchGetBuilds", "codebuild:StartBuild", "codebuild:StopBuild"];

/// A named artifact passed between actions.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct Artifact(String);

impl Artifact {
    pub fn new(name: impl Into<String>) -> Self {
        Self(name.into())
    }

    /// Conventional name for the output of `action` in `stage`.
    pub fn for_action(stage: &str, action: &str) -> Self {
        Self(format!("Artifact_{stage}_{action}"))
    }

    pub fn name(&self) -> &str {
        &self.0
    }
}

/// How the pipeline learns about new commits.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum GitHubTrigger {
    /// The pipeline polls the repository.
    Poll,
    /// A webhook registered with the repository starts the pipeline.
    Webhook,
    /// Runs only when started manually.
    None,
}

impl std::str::FromStr for GitHubTrigger {
    type Err = Error;

    fn from_str(s: &str) -> std::result::Result<Self, Self::Err> {
        match s {
            "poll" => Ok(GitHubTrigger::Poll),
            "webhook" => Ok(GitHubTrigger::Webhook),
            "none" => Ok(GitHubTrigger::None),
            other => Err(Error::InvalidInput(format!("unknown trigger: {other}"))),
        }
    }
}

/// A pipeline action.
#[derive(Debug, Clone, PartialEq)]
pub enum Action {
    /// Fetch a branch from a GitHub repository.
    GitHubSource {
        name: String,
        owner: String,
        repo: String,
        branch: String,
        oauth_token: Token,
        output: Artifact,
        trigger: GitHubTrigger,
    },
    /// Run a build project over an input artifact.
    CodeBuild {
        name: String,
        project: LogicalId,
        input: Artifact,
        outputs: Vec<Artifact>,
    },
}

impl Action {
    pub fn name(&self) -> &str {
        match self {
            Action::GitHubSource { name, .. } | Action::CodeBuild { name, .. } => name,
        }
    }

    pub fn is_source(&self) -> bool {
        matches!(self, Action::GitHubSource { .. })
    }

    pub fn inputs(&self) -> Vec<&Artifact> {
        match self {
            Action::GitHubSource { .. } => Vec::new(),
            Action::CodeBuild { input, .. } => vec![input],
        }
    }

    pub fn outputs(&self) -> Vec<&Artifact> {
        match self {
            Action::GitHubSource { output, .. } => vec![output],
            Action::CodeBuild { outputs, .. } => outputs.iter().collect(),
        }
    }

    fn to_value(&self) -> Value {
        let artifacts = |list: Vec<&Artifact>| -> Value {
            json!(list.iter().map(|a| json!({"Name": a.name()})).collect::<Vec<_>>())
        };

        let mut value = match self {
            Action::GitHubSource {
                owner,
                repo,
                branch,
                oauth_token,
                trigger,
                ..
            } => json!({
                "ActionTypeId": {"Category": "Source", "Owner": "ThirdParty", "Provider": "GitHub", "Version": "1"},
                "Configuration": {
                    "Owner": owner,
                    "Repo": repo,
                    "Branch": branch,
                    "OAuthToken": oauth_token,
                    "PollForSourceChanges": *trigger == GitHubTrigger::Poll,
                },
            }),
            Action::CodeBuild { project, .. } => json!({
                "ActionTypeId": {"Category": "Build", "Owner": "AWS", "Provider": "CodeBuild", "Version": "1"},
                "Configuration": {"ProjectName": Token::Ref(project.clone())},
            }),
        };

        value["Name"] = json!(self.name());
        value["RunOrder"] = json!(1);
        if !self.inputs().is_empty() {
            value["InputArtifacts"] = artifacts(self.inputs());
        }
        if !self.outputs().is_empty() {
            value["OutputArtifacts"] = artifacts(self.outputs());
        }
        value
    }
}

#[derive(Debug, Clone, PartialEq)]
pub struct Stage {
    pub name: String,
    pub actions: Vec<Action>,
}

impl Stage {
    pub fn new(name: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            actions: Vec::new(),
        }
    }

    pub fn with_action(mut self, action: Action) -> Self {
        self.actions.push(action);
        self
    }
}

/// Where a stage goes relative to the existing ones.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Placement {
    Last,
    JustAfter(String),
    RightBefore(String),
    AtIndex(usize),
}

#[derive(Debug, Clone, PartialEq)]
pub struct Pipeline {
    pub path: ConstructPath,
    pub pipeline_name: Option<String>,
    pub stages: Vec<Stage>,
}

impl Pipeline {
    pub fn new(id: &str) -> Self {
        Self {
            path: ConstructPath::root(id),
            pipeline_name: None,
            stages: Vec::new(),
        }
    }

    pub fn with_name(mut self, name: impl Into<String>) -> Self {
        self.pipeline_name = Some(name.into());
        self
    }

    /// Insert a stage at `placement`.
    pub fn add_stage(mut self, stage: Stage, placement: Placement) -> Result<Self> {
        if self.stages.iter().any(|s| s.name == stage.name) {
            return Err(Error::InvalidPipeline(format!(
                "stage '{}' already exists",
                stage.name
            )));
        }

        let position_of = |target: &str| {
            self.stages
                .iter()
                .position(|s| s.name == target)
                .ok_or_else(|| {
                    Error::InvalidPipeline(format!(
                        "stage '{}' placed relative to unknown stage '{}'",
                        stage.name, target
                    ))
                })
        };
        let index = match &placement {
            Placement::Last => self.stages.len(),
            Placement::JustAfter(target) => position_of(target)? + 1,
            Placement::RightBefore(target) => position_of(target)?,
            Placement::AtIndex(i) if *i <= self.stages.len() => *i,
            Placement::AtIndex(i) => {
                return Err(Error::InvalidPipeline(format!(
                    "stage '{}' index {} out of range (0..={})",
                    stage.name,
                    i,
                    self.stages.len()
                )));
            }
        };

        self.stages.insert(index, stage);
        Ok(self)
    }

    pub fn stage_names(&self) -> Vec<&str> {
        self.stages.iter().map(|s| s.name.as_str()).collect()
    }

    pub fn logical_id(&self) -> LogicalId {
        self.path.resource().logical_id()
    }

    /// Bucket holding artifacts passed between stages.
    pub fn artifact_bucket(&self) -> Bucket {
        Bucket::at(self.path.child("ArtifactsBucket"))
            .with_encryption()
            .with_removal_policy(RemovalPolicy::Retain)
    }

    /// Statement granting read/write on the artifact bucket, for roles of build actions.
    pub fn artifact_access_statement(&self) -> PolicyStatement {
        let bucket = self.artifact_bucket();
        PolicyStatement::allow()
            .actions(BUCKET_READ_ACTIONS)
            .actions(BUCKET_WRITE_ACTIONS)
            .resource(bucket.bucket_arn())
            .resource(bucket.arn_for_objects("*"))
    }

    /// Role the pipeline itself assumes.
    pub fn role(&self) -> Role {
        let mut role = Role::new(
            self.path.child("Role"),
            Principal::service("codepipeline.amazonaws.com"),
        )
        .with_statement(self.artifact_access_statement());

        for action in self.stages.iter().flat_map(|s| &s.actions) {
            if let Action::CodeBuild { project, .. } = action {
                role = role.with_statement(
                    PolicyStatement::allow()
                        .actions(BUILD_ACTIONS)
                        .resource(Token::get_att(project, "Arn")),
                );
            }
        }
        role
    }

    /// Check stage structure and artifact flow.
    pub fn validate(&self) -> Result<()> {
        if self.stages.len() < 2 {
            return Err(Error::InvalidPipeline(
                "a pipeline needs at least two stages".to_string(),
            ));
        }

        let mut produced: HashSet<&Artifact> = HashSet::new();
        for (index, stage) in self.stages.iter().enumerate() {
            if stage.actions.is_empty() {
                return Err(Error::InvalidPipeline(format!(
                    "stage '{}' has no actions",
                    stage.name
                )));
            }

            let mut action_names = HashSet::new();
            for action in &stage.actions {
                if !action_names.insert(action.name()) {
                    return Err(Error::InvalidPipeline(format!(
                        "duplicate action '{}' in stage '{}'",
                        action.name(),
                        stage.name
                    )));
                }
                if index == 0 && !action.is_source() {
                    return Err(Error::InvalidPipeline(format!(
                        "first stage '{}' may only contain source actions",
                        stage.name
                    )));
                }
                if index > 0 && action.is_source() {
                    return Err(Error::InvalidPipeline(format!(
                        "source action '{}' must be in the first stage",
                        action.name()
                    )));
                }
                for input in action.inputs() {
                    if !produced.contains(input) {
                        return Err(Error::InvalidPipeline(format!(
                            "action '{}' consumes artifact '{}' that no earlier stage produces",
                            action.name(),
                            input.name()
                        )));
                    }
                }
            }

            for output in stage.actions.iter().flat_map(|a| a.outputs()) {
                if !produced.insert(output) {
                    return Err(Error::InvalidPipeline(format!(
                        "artifact '{}' is produced twice",
                        output.name()
                    )));
                }
            }
        }
        Ok(())
    }

    fn render_resources(&self) -> Result<Vec<CfnResource>> {
        self.validate()?;

        let bucket = self.artifact_bucket();
        let role = self.role();
        let mut resources = Construct::render(&bucket)?;
        resources.extend(role.render_resources());

        let stages: Vec<Value> = self
            .stages
            .iter()
            .map(|s| {
                json!({
                    "Actions": s.actions.iter().map(Action::to_value).collect::<Vec<_>>(),
                    "Name": s.name,
                })
            })
            .collect();

        let mut properties = json!({
            "ArtifactStore": {"Location": bucket.bucket_ref(), "Type": "S3"},
            "RestartExecutionOnUpdate": false,
            "RoleArn": role.arn(),
            "Stages": stages,
        });
        if let Some(name) = &self.pipeline_name {
            properties["Name"] = json!(name);
        }

        let mut pipeline = CfnResource::new(
            self.path.resource(),
            "AWS::CodePipeline::Pipeline",
            properties,
        );
        if let Some(policy_id) = role.default_policy_id() {
            pipeline = pipeline.depends_on(policy_id);
        }
        resources.push(pipeline.depends_on(role.logical_id()));

        for stage in &self.stages {
            for action in &stage.actions {
                if let Action::GitHubSource {
                    name,
                    branch,
                    oauth_token,
                    trigger: GitHubTrigger::Webhook,
                    ..
                } = action
                {
                    resources.push(CfnResource::new(
                        self.path
                            .child(stage.name.clone())
                            .child(name.clone())
                            .child("WebhookResource"),
                        "AWS::CodePipeline::Webhook",
                        json!({
                            "Authentication": "GITHUB_HMAC",
                            "AuthenticationConfiguration": {"SecretToken": oauth_token},
                            "Filters": [{"JsonPath": "$.ref", "MatchEquals": "refs/heads/{Branch}"}],
                            "RegisterWithThirdParty": true,
                            "TargetAction": name,
                            "TargetPipeline": Token::Ref(self.logical_id()),
                            "TargetPipelineVersion": 1,
                        }),
                    ));
                    tracing::debug!(%branch, action = %name, "Registering source webhook");
                }
            }
        }

        Ok(resources)
    }
}

impl Construct for Pipeline {
    fn kind(&self) -> ConstructKind {
        ConstructKind::Pipeline
    }

    fn path(&self) -> &ConstructPath {
        &self.path
    }

    fn render(&self) -> Result<Vec<CfnResource>> {
        self.render_resources()
    }
}
