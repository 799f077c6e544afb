//! Tokens: values that the provisioning engine resolves at deploy time.

use serde::ser::{SerializeMap, SerializeSeq};
use serde::{Serialize, Serializer};

use crate::LogicalId;

/// Pseudo parameters provided by the engine.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Pseudo {
    AccountId,
    Region,
    Partition,
    UrlSuffix,
    StackName,
}

impl Pseudo {
    pub fn as_str(&self) -> &'static str {
        match self {
            Pseudo::AccountId => "AWS::AccountId",
            Pseudo::Region => "AWS::Region",
            Pseudo::Partition => "AWS::Partition",
            Pseudo::UrlSuffix => "AWS::URLSuffix",
            Pseudo::StackName => "AWS::StackName",
        }
    }
}

/// A value in a resource's properties.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Token {
    /// Plain string.
    Literal(String),
    /// `{"Ref": id}` to another resource.
    Ref(LogicalId),
    /// `{"Ref": "AWS::..."}`.
    Pseudo(Pseudo),
    /// `{"Fn::GetAtt": [id, attribute]}`.
    GetAtt(LogicalId, String),
    /// `{"Fn::Join": [separator, parts]}`.
    Join(String, Vec<Token>),
    /// `{"Fn::Sub": template}`.
    Sub(String),
    /// Secrets Manager dynamic reference; the value never enters the template.
    SecretsManager { secret_id: String },
}

impl Token {
    pub fn literal(s: impl Into<String>) -> Self {
        Token::Literal(s.into())
    }

    pub fn get_att(id: &LogicalId, attribute: &str) -> Self {
        Token::GetAtt(id.clone(), attribute.to_string())
    }

    /// Concatenate parts with an empty separator, merging adjacent literals.
    pub fn concat(parts: Vec<Token>) -> Self {
        let mut merged: Vec<Token> = Vec::with_capacity(parts.len());
        for part in parts {
            if let (Some(Token::Literal(prev)), Token::Literal(next)) = (merged.last_mut(), &part)
            {
                prev.push_str(next);
                continue;
            }
            merged.push(part);
        }
        if merged.len() == 1 && matches!(merged[0], Token::Literal(_)) {
            return merged.remove(0);
        }
        Token::Join(String::new(), merged)
    }

    /// `arn:${Partition}:<service>:<region>:<account>:<resource>`. When
    /// `regional` is false the region is left empty and `resource` starts at
    /// the account field.
    pub fn arn(service: &str, resource: Vec<Token>, regional: bool) -> Self {
        let mut parts = vec![
            Token::literal("arn:"),
            Token::Pseudo(Pseudo::Partition),
            Token::Literal(format!(":{service}:")),
        ];
        if regional {
            parts.push(Token::Pseudo(Pseudo::Region));
            parts.push(Token::literal(":"));
            parts.push(Token::Pseudo(Pseudo::AccountId));
            parts.push(Token::literal(":"));
        } else {
            parts.push(Token::literal(":"));
        }
        parts.extend(resource);
        Token::concat(parts)
    }

    /// Logical ids this token points at. Pseudo parameters are not included.
    pub fn references(&self) -> Vec<&LogicalId> {
        match self {
            Token::Ref(id) | Token::GetAtt(id, _) => vec![id],
            Token::Join(_, parts) => parts.iter().flat_map(Token::references).collect(),
            _ => Vec::new(),
        }
    }

    /// Literal value, if this token is one.
    pub fn as_literal(&self) -> Option<&str> {
        match self {
            Token::Literal(s) => Some(s),
            _ => None,
        }
    }
}

impl From<&str> for Token {
    fn from(s: &str) -> Self {
        Token::Literal(s.to_string())
    }
}

impl From<String> for Token {
    fn from(s: String) -> Self {
        Token::Literal(s)
    }
}

impl Serialize for Token {
    fn serialize<S: Serializer>(&self, serializer: S) -> Result<S::Ok, S::Error> {
        match self {
            Token::Literal(s) => serializer.serialize_str(s),
            Token::Ref(id) => {
                let mut map = serializer.serialize_map(Some(1))?;
                map.serialize_entry("Ref", id.as_str())?;
                map.end()
            }
            Token::Pseudo(p) => {
                let mut map = serializer.serialize_map(Some(1))?;
                map.serialize_entry("Ref", p.as_str())?;
                map.end()
            }
            Token::GetAtt(id, attribute) => {
                let mut map = serializer.serialize_map(Some(1))?;
                map.serialize_entry("Fn::GetAtt", &[id.as_str(), attribute.as_str()])?;
                map.end()
            }
            Token::Join(separator, parts) => {
                let mut map = serializer.serialize_map(Some(1))?;
                map.serialize_entry("Fn::Join", &JoinArgs { separator, parts })?;
                map.end()
            }
            Token::Sub(template) => {
                let mut map = serializer.serialize_map(Some(1))?;
                map.serialize_entry("Fn::Sub", template)?;
                map.end()
            }
            Token::SecretsManager { secret_id } => serializer.serialize_str(&format!(
                "{{{{resolve:secretsmanager:{secret_id}:SecretString:::}}}}"
            )),
        }
    }
}

struct JoinArgs<'a> {
    separator: &'a str,
    parts: &'a [Token],
}

impl Serialize for JoinArgs<'_> {
    fn serialize<S: Serializer>(&self, serializer: S) -> Result<S::Ok, S::Error> {
        let mut seq = serializer.serialize_seq(Some(2))?;
        seq.serialize_element(self.separator)?;
        seq.serialize_element(self.parts)?;
        seq.end()
    }
}
