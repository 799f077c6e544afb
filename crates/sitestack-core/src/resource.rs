//! A single template resource.

use serde::{Deserialize, Serialize};
use serde_json::Value;
use std::collections::BTreeSet;

use crate::{ConstructPath, Error, LogicalId};

/// What happens to a resource when it leaves the stack.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum RemovalPolicy {
    Destroy,
    Retain,
    Snapshot,
}

impl RemovalPolicy {
    /// Value of `DeletionPolicy`/`UpdateReplacePolicy`.
    pub fn as_cfn(&self) -> &'static str {
        match self {
            RemovalPolicy::Destroy => "Delete",
            RemovalPolicy::Retain => "Retain",
            RemovalPolicy::Snapshot => "Snapshot",
        }
    }
}

impl std::fmt::Display for RemovalPolicy {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            RemovalPolicy::Destroy => write!(f, "destroy"),
            RemovalPolicy::Retain => write!(f, "retain"),
            RemovalPolicy::Snapshot => write!(f, "snapshot"),
        }
    }
}

impl std::str::FromStr for RemovalPolicy {
    type Err = Error;

    fn from_str(s: &str) -> std::result::Result<Self, Self::Err> {
        match s {
            "destroy" => Ok(RemovalPolicy::Destroy),
            "retain" => Ok(RemovalPolicy::Retain),
            "snapshot" => Ok(RemovalPolicy::Snapshot),
            other => Err(Error::InvalidInput(format!("unknown removal policy: {other}"))),
        }
    }
}

/// A resource as it appears in the template.
#[derive(Debug, Clone, PartialEq)]
pub struct CfnResource {
    pub logical_id: LogicalId,
    pub path: ConstructPath,
    pub resource_type: String,
    pub properties: Value,
    pub depends_on: Vec<LogicalId>,
    pub removal_policy: Option<RemovalPolicy>,
}

impl CfnResource {
    /// Create a resource whose logical id is derived from its path.
    pub fn new(path: ConstructPath, resource_type: &str, properties: Value) -> Self {
        Self {
            logical_id: path.logical_id(),
            path,
            resource_type: resource_type.to_string(),
            properties,
            depends_on: Vec::new(),
            removal_policy: None,
        }
    }

    pub fn with_logical_id(mut self, id: LogicalId) -> Self {
        self.logical_id = id;
        self
    }

    pub fn depends_on(mut self, id: LogicalId) -> Self {
        if !self.depends_on.contains(&id) {
            self.depends_on.push(id);
        }
        self
    }

    pub fn with_removal_policy(mut self, policy: Option<RemovalPolicy>) -> Self {
        self.removal_policy = policy;
        self
    }

    /// Look up a property by JSON pointer, e.g. `/Environment/Variables`.
    pub fn property(&self, pointer: &str) -> Option<&Value> {
        self.properties.pointer(pointer)
    }

    /// Logical ids referenced from the properties via `Ref` or `Fn::GetAtt`.
    pub fn references(&self) -> BTreeSet<String> {
        let mut out = BTreeSet::new();
        collect_references(&self.properties, &mut out);
        out
    }
}

fn collect_references(value: &Value, out: &mut BTreeSet<String>) {
    match value {
        Value::Object(map) => {
            if map.len() == 1 {
                if let Some(Value::String(target)) = map.get("Ref") {
                    if !target.starts_with("AWS::") {
                        out.insert(target.clone());
                    }
                    return;
                }
                if let Some(Value::Array(args)) = map.get("Fn::GetAtt") {
                    if let Some(Value::String(target)) = args.first() {
                        out.insert(target.clone());
                    }
                    return;
                }
            }
            for v in map.values() {
                collect_references(v, out);
            }
        }
        Value::Array(items) => {
            for v in items {
                collect_references(v, out);
            }
        }
        _ => {}
    }
}
