//! Construct paths and CloudFormation logical identifiers.

use derive_more::Display;
use serde::{Deserialize, Serialize};

/// Components dropped from a path entirely.
const HIDDEN_ID: &str = "Default";
/// Components kept in the hash but hidden from the readable prefix.
const HIDDEN_FROM_HUMAN_ID: &str = "Resource";
const PATH_SEP: &str = "/";
const HASH_LEN: usize = 8;
const MAX_HUMAN_LEN: usize = 240;
const MAX_ID_LEN: usize = 255;

/// A logical identifier of a resource inside a template.
#[derive(
    Debug, Clone, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize, Display,
)]
#[display("{_0}")]
pub struct LogicalId(String);

impl LogicalId {
    /// Wrap an already-computed logical id.
    pub fn new(id: impl Into<String>) -> Self {
        Self(id.into())
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }
}

/// Path of a construct relative to its stack, e.g. `updateTable/ServiceRole/Resource`.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct ConstructPath(Vec<String>);

impl ConstructPath {
    pub fn root(id: impl Into<String>) -> Self {
        Self(vec![id.into()])
    }

    /// Return a new path with `id` appended.
    pub fn child(&self, id: impl Into<String>) -> Self {
        let mut components = self.0.clone();
        components.push(id.into());
        Self(components)
    }

    pub fn components(&self) -> &[String] {
        &self.0
    }

    /// Path of the `Resource` child, the conventional home of a construct's primary resource.
    pub fn resource(&self) -> Self {
        self.child(HIDDEN_FROM_HUMAN_ID)
    }

    /// Logical id derived from this path.
    pub fn logical_id(&self) -> LogicalId {
        make_unique_id(&self.0)
    }
}

impl std::fmt::Display for ConstructPath {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.0.join(PATH_SEP))
    }
}

/// Compute a logical id that is unique for the given path.
///
/// A lone component is used as-is (minus non-alphanumerics). Anything deeper
/// gets a readable prefix followed by an 8 character MD5 suffix of the full path.
pub fn make_unique_id(components: &[String]) -> LogicalId {
    let components: Vec<&str> = components
        .iter()
        .map(String::as_str)
        .filter(|c| *c != HIDDEN_ID)
        .collect();

    if components.len() == 1 {
        let candidate = remove_non_alphanumeric(components[0]);
        if candidate.len() <= MAX_ID_LEN {
            return LogicalId(candidate);
        }
    }

    let hash = path_hash(&components);
    let mut human: String = remove_dupes(&components)
        .into_iter()
        .filter(|c| *c != HIDDEN_FROM_HUMAN_ID)
        .map(remove_non_alphanumeric)
        .collect();
    human.truncate(MAX_HUMAN_LEN);

    LogicalId(format!("{human}{hash}"))
}

fn path_hash(components: &[&str]) -> String {
    let digest = md5::compute(components.join(PATH_SEP));
    format!("{:x}", digest)[..HASH_LEN].to_uppercase()
}

fn remove_non_alphanumeric(s: &str) -> String {
    s.chars().filter(|c| c.is_ascii_alphanumeric()).collect()
}

fn remove_dupes<'a>(components: &[&'a str]) -> Vec<&'a str> {
    let mut out: Vec<&str> = Vec::with_capacity(components.len());
    for c in components {
        if out.last() != Some(c) {
            out.push(c);
        }
    }
    out
}

#[cfg(test)]
mod tests {
    use super::*;

    fn path(s: &str) -> Vec<String> {
        s.split('/').map(String::from).collect()
    }

    #[test]
    fn test_single_component_has_no_hash() {
        assert_eq!(make_unique_id(&path("pipelineRole")).as_str(), "pipelineRole");
        assert_eq!(make_unique_id(&path("my-bucket")).as_str(), "mybucket");
    }

    #[test]
    fn test_nested_path_gets_hash_suffix() {
        let id = make_unique_id(&path("siteUserData/Resource"));
        assert_eq!(id.as_str(), "siteUserDataA43F3D2B");

        let id = make_unique_id(&path("updateTable/ServiceRole/Resource"));
        assert_eq!(id.as_str(), "updateTableServiceRole8D19113A");
    }

    #[test]
    fn test_default_is_dropped() {
        assert_eq!(
            make_unique_id(&path("siteUserData/Default/Resource")),
            make_unique_id(&path("siteUserData/Resource"))
        );
    }

    #[test]
    fn test_consecutive_duplicates_collapse_in_prefix() {
        let id = make_unique_id(&path("api/api/Resource"));
        assert!(id.as_str().starts_with("api"));
        assert!(!id.as_str().starts_with("apiapi"));
        assert_eq!(id.as_str().len(), 3 + HASH_LEN);
    }

    #[test]
    fn test_construct_path_helpers() {
        let p = ConstructPath::root("updateTable").child("ServiceRole").resource();
        assert_eq!(p.to_string(), "updateTable/ServiceRole/Resource");
        assert_eq!(p.logical_id().as_str(), "updateTableServiceRole8D19113A");
    }
}
