//! Key-value table descriptor.

use serde::{Deserialize, Serialize};
use serde_json::json;

use crate::graph::{Construct, ConstructKind};
use crate::iam::PolicyStatement;
use crate::{CfnResource, ConstructPath, Error, LogicalId, RemovalPolicy, Result, Token};

/// Actions granted by [`Table::grant_write_data`].
pub const WRITE_DATA_ACTIONS: [&str; 5] = [
    "dynamodb:BatchWriteItem",
    "dynamodb:PutItem",
    "dynamodb:UpdateItem",
    "dynamodb:DeleteItem",
    "dynamodb:DescribeTable",
];

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum AttributeType {
    String,
    Number,
    Binary,
}

impl AttributeType {
    fn as_cfn(&self) -> &'static str {
        match self {
            AttributeType::String => "S",
            AttributeType::Number => "N",
            AttributeType::Binary => "B",
        }
    }
}

impl std::str::FromStr for AttributeType {
    type Err = Error;

    fn from_str(s: &str) -> std::result::Result<Self, Self::Err> {
        match s {
            "string" => Ok(AttributeType::String),
            "number" => Ok(AttributeType::Number),
            "binary" => Ok(AttributeType::Binary),
            other => Err(Error::InvalidInput(format!("unknown attribute type: {other}"))),
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Attribute {
    pub name: String,
    pub attribute_type: AttributeType,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum BillingMode {
    Provisioned { read: u32, write: u32 },
    PayPerRequest,
}

impl Default for BillingMode {
    fn default() -> Self {
        Self::Provisioned { read: 5, write: 5 }
    }
}

/// A DynamoDB table.
#[derive(Debug, Clone, PartialEq)]
pub struct Table {
    pub path: ConstructPath,
    pub partition_key: Attribute,
    pub sort_key: Option<Attribute>,
    pub billing: BillingMode,
    pub removal_policy: RemovalPolicy,
}

impl Table {
    pub fn new(id: &str, partition_key: Attribute) -> Self {
        Self {
            path: ConstructPath::root(id),
            partition_key,
            sort_key: None,
            billing: BillingMode::default(),
            removal_policy: RemovalPolicy::Retain,
        }
    }

    pub fn with_sort_key(mut self, key: Attribute) -> Self {
        self.sort_key = Some(key);
        self
    }

    pub fn with_billing(mut self, billing: BillingMode) -> Self {
        self.billing = billing;
        self
    }

    pub fn with_removal_policy(mut self, policy: RemovalPolicy) -> Self {
        self.removal_policy = policy;
        self
    }

    pub fn logical_id(&self) -> LogicalId {
        self.path.resource().logical_id()
    }

    /// The generated table name.
    pub fn table_name(&self) -> Token {
        Token::Ref(self.logical_id())
    }

    pub fn table_arn(&self) -> Token {
        Token::get_att(&self.logical_id(), "Arn")
    }

    /// Statement allowing writes to this table and nothing else.
    pub fn grant_write_data(&self) -> PolicyStatement {
        PolicyStatement::allow()
            .actions(WRITE_DATA_ACTIONS)
            .resource(self.table_arn())
    }
}

impl Construct for Table {
    fn kind(&self) -> ConstructKind {
        ConstructKind::Table
    }

    fn path(&self) -> &ConstructPath {
        &self.path
    }

    fn render(&self) -> Result<Vec<CfnResource>> {
        let keys: Vec<(&Attribute, &str)> = std::iter::once((&self.partition_key, "HASH"))
            .chain(self.sort_key.iter().map(|k| (k, "RANGE")))
            .collect();

        let mut properties = json!({
            "AttributeDefinitions": keys
                .iter()
                .map(|(a, _)| json!({"AttributeName": a.name, "AttributeType": a.attribute_type.as_cfn()}))
                .collect::<Vec<_>>(),
            "KeySchema": keys
                .iter()
                .map(|(a, key_type)| json!({"AttributeName": a.name, "KeyType": key_type}))
                .collect::<Vec<_>>(),
        });
        match self.billing {
            BillingMode::Provisioned { read, write } => {
                properties["ProvisionedThroughput"] =
                    json!({"ReadCapacityUnits": read, "WriteCapacityUnits": write});
            }
            BillingMode::PayPerRequest => {
                properties["BillingMode"] = json!("PAY_PER_REQUEST");
            }
        }

        Ok(vec![
            CfnResource::new(self.path.resource(), "AWS::DynamoDB::Table", properties)
                .with_removal_policy(Some(self.removal_policy)),
        ])
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn table() -> Table {
        Table::new(
            "siteUserData",
            Attribute {
                name: "id".to_string(),
                attribute_type: AttributeType::Number,
            },
        )
        .with_removal_policy(RemovalPolicy::Destroy)
    }

    #[test]
    fn test_render_table() {
        let resources = table().render().unwrap();
        assert_eq!(resources.len(), 1);
        let r = &resources[0];
        assert_eq!(r.logical_id.as_str(), "siteUserDataA43F3D2B");
        assert_eq!(r.property("/KeySchema/0/KeyType"), Some(&json!("HASH")));
        assert_eq!(r.property("/AttributeDefinitions/0/AttributeType"), Some(&json!("N")));
        assert_eq!(r.property("/ProvisionedThroughput/ReadCapacityUnits"), Some(&json!(5)));
        assert_eq!(r.removal_policy, Some(RemovalPolicy::Destroy));
    }

    #[test]
    fn test_sort_key_and_on_demand_billing() {
        let t = table()
            .with_sort_key(Attribute {
                name: "ts".to_string(),
                attribute_type: AttributeType::String,
            })
            .with_billing(BillingMode::PayPerRequest);
        let r = &t.render().unwrap()[0];
        assert_eq!(r.property("/KeySchema/1/KeyType"), Some(&json!("RANGE")));
        assert_eq!(r.property("/BillingMode"), Some(&json!("PAY_PER_REQUEST")));
        assert!(r.property("/ProvisionedThroughput").is_none());
    }

    #[test]
    fn test_grant_write_targets_only_this_table() {
        let t = table();
        let statement = t.grant_write_data();
        assert_eq!(statement.resources, vec![t.table_arn()]);
        assert!(statement.actions.iter().any(|a| a == "dynamodb:PutItem"));
        assert!(!statement.actions.iter().any(|a| a == "dynamodb:GetItem"));
    }
}
