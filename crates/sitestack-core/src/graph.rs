//! The resource graph: every rendered resource of a stack plus its outputs and assets.

use serde::{Deserialize, Serialize};
use std::collections::{BTreeMap, BTreeSet, HashSet};
use tracing::debug;

use crate::asset::FileAsset;
use crate::template::Template;
use crate::{CfnResource, ConstructPath, Error, LogicalId, Result, Token};

/// Kind of a top-level descriptor added to the graph.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ConstructKind {
    Table,
    Function,
    RestApi,
    Bucket,
    BucketDeployment,
    Role,
    BuildProject,
    Pipeline,
}

impl std::fmt::Display for ConstructKind {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            ConstructKind::Table => write!(f, "table"),
            ConstructKind::Function => write!(f, "function"),
            ConstructKind::RestApi => write!(f, "rest_api"),
            ConstructKind::Bucket => write!(f, "bucket"),
            ConstructKind::BucketDeployment => write!(f, "bucket_deployment"),
            ConstructKind::Role => write!(f, "role"),
            ConstructKind::BuildProject => write!(f, "build_project"),
            ConstructKind::Pipeline => write!(f, "pipeline"),
        }
    }
}

/// A descriptor that renders into template resources.
pub trait Construct {
    fn kind(&self) -> ConstructKind;

    /// Path of the construct relative to the stack.
    fn path(&self) -> &ConstructPath;

    /// Resources this descriptor stands for.
    fn render(&self) -> Result<Vec<CfnResource>>;

    /// Local files that must be published before deployment.
    fn assets(&self) -> Vec<FileAsset> {
        Vec::new()
    }

    /// Stack outputs contributed by this descriptor.
    fn outputs(&self) -> Vec<Output> {
        Vec::new()
    }
}

/// Deployment target of a stack.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct StackEnv {
    pub stack_name: String,
    /// Empty or absent means "whatever account the credentials resolve to".
    pub account: Option<String>,
    pub region: String,
}

impl StackEnv {
    /// `aws://<account>/<region>` with `unknown-account` for an unset account.
    pub fn environment_uri(&self) -> String {
        let account = self
            .account
            .as_deref()
            .filter(|a| !a.is_empty())
            .unwrap_or("unknown-account");
        format!("aws://{}/{}", account, self.region)
    }
}

/// A stack output.
#[derive(Debug, Clone, PartialEq)]
pub struct Output {
    pub logical_id: LogicalId,
    pub value: Token,
    pub description: Option<String>,
}

/// A top-level descriptor that was added to the graph.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ConstructEntry {
    pub kind: ConstructKind,
    pub path: ConstructPath,
}

/// All resources of one stack, in insertion order.
#[derive(Debug, Clone)]
pub struct ResourceGraph {
    env: StackEnv,
    constructs: Vec<ConstructEntry>,
    resources: Vec<CfnResource>,
    outputs: Vec<Output>,
    assets: Vec<FileAsset>,
}

impl ResourceGraph {
    pub fn new(env: StackEnv) -> Self {
        Self {
            env,
            constructs: Vec::new(),
            resources: Vec::new(),
            outputs: Vec::new(),
            assets: Vec::new(),
        }
    }

    pub fn env(&self) -> &StackEnv {
        &self.env
    }

    /// Render a descriptor and add its resources, outputs and assets.
    pub fn add<C: Construct + ?Sized>(&mut self, construct: &C) -> Result<()> {
        let path = construct.path();
        if self.constructs.iter().any(|c| &c.path == path) {
            return Err(Error::DuplicateId(path.to_string()));
        }

        let rendered = construct.render()?;
        for resource in &rendered {
            if self.get(&resource.logical_id).is_some()
                || rendered
                    .iter()
                    .filter(|r| r.logical_id == resource.logical_id)
                    .count()
                    > 1
            {
                return Err(Error::DuplicateId(resource.logical_id.to_string()));
            }
        }

        let outputs = construct.outputs();
        for output in &outputs {
            if self.outputs.iter().any(|o| o.logical_id == output.logical_id) {
                return Err(Error::DuplicateId(output.logical_id.to_string()));
            }
        }

        debug!(
            kind = %construct.kind(),
            path = %path,
            resources = rendered.len(),
            "Added construct"
        );

        self.constructs.push(ConstructEntry {
            kind: construct.kind(),
            path: path.clone(),
        });
        self.resources.extend(rendered);
        self.outputs.extend(outputs);
        for asset in construct.assets() {
            if !self.assets.iter().any(|a| a.hash == asset.hash) {
                self.assets.push(asset);
            }
        }
        Ok(())
    }

    pub fn constructs(&self) -> &[ConstructEntry] {
        &self.constructs
    }

    /// Number of top-level descriptors of a kind.
    pub fn count(&self, kind: ConstructKind) -> usize {
        self.constructs.iter().filter(|c| c.kind == kind).count()
    }

    pub fn resources(&self) -> &[CfnResource] {
        &self.resources
    }

    pub fn resources_of_type<'a>(
        &'a self,
        resource_type: &'a str,
    ) -> impl Iterator<Item = &'a CfnResource> + 'a {
        self.resources
            .iter()
            .filter(move |r| r.resource_type == resource_type)
    }

    pub fn get(&self, id: &LogicalId) -> Option<&CfnResource> {
        self.resources.iter().find(|r| &r.logical_id == id)
    }

    /// Find a resource by its `/`-joined construct path.
    pub fn find_by_path(&self, path: &str) -> Option<&CfnResource> {
        self.resources.iter().find(|r| r.path.to_string() == path)
    }

    pub fn outputs(&self) -> &[Output] {
        &self.outputs
    }

    pub fn assets(&self) -> &[FileAsset] {
        &self.assets
    }

    /// Check that every `Ref`, `Fn::GetAtt` and `DependsOn` target exists
    /// and that no resource transitively depends on itself.
    pub fn validate(&self) -> Result<()> {
        let known: BTreeSet<&str> = self.resources.iter().map(|r| r.logical_id.as_str()).collect();

        for resource in &self.resources {
            let dangling = resource
                .references()
                .into_iter()
                .find(|target| !known.contains(target.as_str()))
                .or_else(|| {
                    resource
                        .depends_on
                        .iter()
                        .find(|d| !known.contains(d.as_str()))
                        .map(|d| d.to_string())
                });
            if let Some(target) = dangling {
                return Err(Error::UnresolvedReference {
                    from: resource.logical_id.to_string(),
                    target,
                });
            }
        }

        for output in &self.outputs {
            if let Some(target) = output
                .value
                .references()
                .into_iter()
                .find(|target| !known.contains(target.as_str()))
            {
                return Err(Error::UnresolvedReference {
                    from: output.logical_id.to_string(),
                    target: target.to_string(),
                });
            }
        }

        let edges: BTreeMap<String, Vec<String>> = self
            .resources
            .iter()
            .map(|r| {
                let mut deps: Vec<String> = r.references().into_iter().collect();
                deps.extend(r.depends_on.iter().map(|d| d.to_string()));
                (r.logical_id.to_string(), deps)
            })
            .collect();
        if let Some(cycle) = detect_cycle(&edges) {
            return Err(Error::CycleDetected(cycle));
        }

        Ok(())
    }

    /// Resource counts keyed by resource type.
    pub fn type_counts(&self) -> BTreeMap<&str, usize> {
        let mut counts = BTreeMap::new();
        for resource in &self.resources {
            *counts.entry(resource.resource_type.as_str()).or_insert(0) += 1;
        }
        counts
    }

    /// Template form of the graph.
    pub fn template(&self) -> Template {
        Template::from_graph(self)
    }
}

/// Detect cycles in the resource dependency graph using DFS.
fn detect_cycle(edges: &BTreeMap<String, Vec<String>>) -> Option<String> {
    let mut visited = HashSet::new();
    let mut rec_stack = HashSet::new();

    for node in edges.keys() {
        if !visited.contains(node.as_str()) {
            if let Some(cycle) = dfs_detect_cycle(node, edges, &mut visited, &mut rec_stack) {
                return Some(cycle);
            }
        }
    }
    None
}

fn dfs_detect_cycle<'a>(
    node: &'a str,
    edges: &'a BTreeMap<String, Vec<String>>,
    visited: &mut HashSet<&'a str>,
    rec_stack: &mut HashSet<&'a str>,
) -> Option<String> {
    visited.insert(node);
    rec_stack.insert(node);

    if let Some(deps) = edges.get(node) {
        for dep in deps {
            let dep: &'a str = dep.as_str();
            if !visited.contains(dep) {
                if let Some(cycle) = dfs_detect_cycle(dep, edges, visited, rec_stack) {
                    return Some(cycle);
                }
            } else if rec_stack.contains(dep) {
                return Some(format!("{node} -> {dep}"));
            }
        }
    }

    rec_stack.remove(node);
    None
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    struct Topic {
        path: ConstructPath,
        subscriber: Option<LogicalId>,
    }

    impl Construct for Topic {
        fn kind(&self) -> ConstructKind {
            ConstructKind::Role
        }

        fn path(&self) -> &ConstructPath {
            &self.path
        }

        fn render(&self) -> Result<Vec<CfnResource>> {
            let mut properties = json!({});
            if let Some(target) = &self.subscriber {
                properties["Target"] = json!(Token::Ref(target.clone()));
            }
            Ok(vec![CfnResource::new(self.path.resource(), "AWS::SNS::Topic", properties)])
        }
    }

    fn env() -> StackEnv {
        StackEnv {
            stack_name: "Test".to_string(),
            account: None,
            region: "eu-central-1".to_string(),
        }
    }

    fn topic(id: &str, subscriber: Option<LogicalId>) -> Topic {
        Topic {
            path: ConstructPath::root(id),
            subscriber,
        }
    }

    #[test]
    fn test_duplicate_construct_rejected() {
        let mut graph = ResourceGraph::new(env());
        graph.add(&topic("a", None)).unwrap();
        let result = graph.add(&topic("a", None));
        assert!(matches!(result, Err(Error::DuplicateId(_))));
        assert_eq!(graph.resources().len(), 1);
    }

    #[test]
    fn test_validate_detects_dangling_reference() {
        let mut graph = ResourceGraph::new(env());
        graph
            .add(&topic("a", Some(LogicalId::new("Missing"))))
            .unwrap();
        let result = graph.validate();
        assert!(matches!(
            result,
            Err(Error::UnresolvedReference { ref target, .. }) if target == "Missing"
        ));
    }

    #[test]
    fn test_validate_accepts_resolved_reference() {
        let mut graph = ResourceGraph::new(env());
        let a = topic("a", None);
        let a_id = a.path.resource().logical_id();
        graph.add(&a).unwrap();
        graph.add(&topic("b", Some(a_id))).unwrap();
        graph.validate().unwrap();
        assert_eq!(graph.count(ConstructKind::Role), 2);
        assert_eq!(graph.type_counts().get("AWS::SNS::Topic"), Some(&2));
    }

    #[test]
    fn test_validate_detects_cycle() {
        let mut graph = ResourceGraph::new(env());
        let a_id = ConstructPath::root("a").resource().logical_id();
        let b_id = ConstructPath::root("b").resource().logical_id();
        graph.add(&topic("a", Some(b_id))).unwrap();
        graph.add(&topic("b", Some(a_id))).unwrap();
        assert!(matches!(graph.validate(), Err(Error::CycleDetected(_))));
    }

    #[test]
    fn test_environment_uri() {
        assert_eq!(env().environment_uri(), "aws://unknown-account/eu-central-1");
        let with_account = StackEnv {
            account: Some("123456789012".to_string()),
            ..env()
        };
        assert_eq!(with_account.environment_uri(), "aws://123456789012/eu-central-1");
    }
}
