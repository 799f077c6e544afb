//! CloudFormation template form of a resource graph.

use serde::Serialize;
use serde_json::{Map, Value, json};
use std::collections::BTreeMap;

use crate::ResourceGraph;
use crate::asset::BOOTSTRAP_QUALIFIER;

/// Bootstrap stack versions that are too old for the asset layout used here.
const UNSUPPORTED_BOOTSTRAP_VERSIONS: [&str; 5] = ["1", "2", "3", "4", "5"];

/// A synthesized template. Maps are ordered so serialization is deterministic.
#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(rename_all = "PascalCase")]
pub struct Template {
    pub resources: BTreeMap<String, Value>,
    #[serde(skip_serializing_if = "BTreeMap::is_empty")]
    pub outputs: BTreeMap<String, Value>,
    pub parameters: BTreeMap<String, Value>,
    pub rules: BTreeMap<String, Value>,
}

impl Template {
    pub fn from_graph(graph: &ResourceGraph) -> Self {
        let stack_name = &graph.env().stack_name;

        let resources = graph
            .resources()
            .iter()
            .map(|r| {
                let mut entry = Map::new();
                entry.insert("Type".to_string(), json!(r.resource_type));
                if r.properties.as_object().is_some_and(|p| !p.is_empty()) {
                    entry.insert("Properties".to_string(), r.properties.clone());
                }
                if !r.depends_on.is_empty() {
                    let mut depends_on: Vec<&str> = r.depends_on.iter().map(|d| d.as_str()).collect();
                    depends_on.sort_unstable();
                    entry.insert("DependsOn".to_string(), json!(depends_on));
                }
                if let Some(policy) = r.removal_policy {
                    entry.insert("UpdateReplacePolicy".to_string(), json!(policy.as_cfn()));
                    entry.insert("DeletionPolicy".to_string(), json!(policy.as_cfn()));
                }
                entry.insert(
                    "Metadata".to_string(),
                    json!({"aws:cdk:path": format!("{}/{}", stack_name, r.path)}),
                );
                (r.logical_id.to_string(), Value::Object(entry))
            })
            .collect();

        let outputs = graph
            .outputs()
            .iter()
            .map(|o| {
                let mut entry = json!({"Value": o.value});
                if let Some(description) = &o.description {
                    entry["Description"] = json!(description);
                }
                (o.logical_id.to_string(), entry)
            })
            .collect();

        let mut parameters = BTreeMap::new();
        parameters.insert(
            "BootstrapVersion".to_string(),
            json!({
                "Type": "AWS::SSM::Parameter::Value<String>",
                "Default": format!("/cdk-bootstrap/{BOOTSTRAP_QUALIFIER}/version"),
                "Description": "Version of the CDK Bootstrap resources in this environment, automatically retrieved from SSM Parameter Store. [cdk:skip]",
            }),
        );

        let mut rules = BTreeMap::new();
        rules.insert(
            "CheckBootstrapVersion".to_string(),
            json!({
                "Assertions": [{
                    "Assert": {"Fn::Not": [{"Fn::Contains": [UNSUPPORTED_BOOTSTRAP_VERSIONS, {"Ref": "BootstrapVersion"}]}]},
                    "AssertDescription": "CDK bootstrap stack version 6 required. Please run 'cdk bootstrap' with a recent version of the CDK CLI.",
                }]
            }),
        );

        Self {
            resources,
            outputs,
            parameters,
            rules,
        }
    }

    /// Pretty JSON with a trailing newline.
    pub fn to_json_pretty(&self) -> crate::Result<String> {
        let mut out = serde_json::to_string_pretty(self)?;
        out.push('\n');
        Ok(out)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::graph::{Construct, ConstructKind, Output};
    use crate::{CfnResource, ConstructPath, LogicalId, RemovalPolicy, StackEnv, Token};

    struct Queue(ConstructPath);

    impl Construct for Queue {
        fn kind(&self) -> ConstructKind {
            ConstructKind::Table
        }

        fn path(&self) -> &ConstructPath {
            &self.0
        }

        fn render(&self) -> crate::Result<Vec<CfnResource>> {
            Ok(vec![
                CfnResource::new(self.0.resource(), "AWS::SQS::Queue", json!({"DelaySeconds": 5}))
                    .with_removal_policy(Some(RemovalPolicy::Destroy))
                    .depends_on(LogicalId::new("Zeta"))
                    .depends_on(LogicalId::new("Alpha")),
            ])
        }

        fn outputs(&self) -> Vec<Output> {
            vec![Output {
                logical_id: LogicalId::new("QueueUrl"),
                value: Token::Ref(self.0.resource().logical_id()),
                description: None,
            }]
        }
    }

    #[test]
    fn test_template_entry_layout() {
        let mut graph = ResourceGraph::new(StackEnv {
            stack_name: "Demo".to_string(),
            account: None,
            region: "eu-central-1".to_string(),
        });
        let queue = Queue(ConstructPath::root("jobs"));
        graph.add(&queue).unwrap();

        let template = graph.template();
        let id = queue.0.resource().logical_id().to_string();
        let entry = &template.resources[&id];
        assert_eq!(entry["Type"], "AWS::SQS::Queue");
        assert_eq!(entry["DeletionPolicy"], "Delete");
        assert_eq!(entry["UpdateReplacePolicy"], "Delete");
        assert_eq!(entry["DependsOn"], json!(["Alpha", "Zeta"]));
        assert_eq!(entry["Metadata"]["aws:cdk:path"], "Demo/jobs/Resource");
        assert_eq!(template.outputs["QueueUrl"]["Value"], json!({"Ref": id}));
        assert!(template.parameters.contains_key("BootstrapVersion"));

        let text = template.to_json_pretty().unwrap();
        assert!(text.starts_with("{\n  \"Resources\""));
    }
}
