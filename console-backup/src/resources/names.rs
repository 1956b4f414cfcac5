use std::cmp::Ordering;
use std::fmt;
use std::hash::{Hash, Hasher};

use serde::{Deserialize, Serialize};

use super::ResourceKind;

#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum NameError {
    #[error("resource name is empty")]
    Empty,
    #[error("resource name '{0}' has an odd number of segments")]
    OddSegments(String),
    #[error("resource name '{0}' contains an empty segment")]
    EmptySegment(String),
}

/// A parsed, slash-delimited hierarchical resource name such as
/// `projects/p/locations/global/collections/c/engines/e`.
///
/// Stored as `(collection, id)` pairs so parents and ancestors can be derived
/// without knowing the concrete kind up front.
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct ResourceName {
    segments: Vec<(String, String)>,
}

impl ResourceName {
    pub fn parse(path: &str) -> Result<Self, NameError> {
        let path = path.trim_matches('/');
        if path.is_empty() {
            return Err(NameError::Empty);
        }
        let parts: Vec<&str> = path.split('/').collect();
        if parts.len() % 2 != 0 {
            return Err(NameError::OddSegments(path.to_string()));
        }
        if parts.iter().any(|p| p.is_empty()) {
            return Err(NameError::EmptySegment(path.to_string()));
        }
        let segments = parts
            .chunks(2)
            .map(|pair| (pair[0].to_string(), pair[1].to_string()))
            .collect();
        Ok(Self { segments })
    }

    /// Kind of the resource this name points at (last collection segment).
    pub fn kind(&self) -> Option<ResourceKind> {
        self.segments
            .last()
            .and_then(|(collection, _)| ResourceKind::from_collection_segment(collection))
    }

    pub fn id(&self) -> &str {
        self.segments.last().map(|(_, id)| id.as_str()).unwrap_or("")
    }

    pub fn project(&self) -> Option<&str> {
        self.value_of("projects")
    }

    pub fn location(&self) -> Option<&str> {
        self.value_of("locations")
    }

    fn value_of(&self, collection: &str) -> Option<&str> {
        self.segments
            .iter()
            .find(|(c, _)| c == collection)
            .map(|(_, v)| v.as_str())
    }

    /// Everything before the final `collection/id` pair.
    pub fn parent_path(&self) -> String {
        join(&self.segments[..self.segments.len().saturating_sub(1)])
    }

    /// Name of the nearest ancestor of the given kind, if the chain has one.
    pub fn ancestor(&self, kind: ResourceKind) -> Option<ResourceName> {
        let segment = kind.collection_segment();
        let end = self.segments[..self.segments.len().saturating_sub(1)]
            .iter()
            .rposition(|(c, _)| c == segment)?;
        Some(Self {
            segments: self.segments[..=end].to_vec(),
        })
    }

    /// Same name with its `projects/*` and `locations/*` values replaced.
    pub fn retarget(&self, project: &str, location: &str) -> ResourceName {
        let segments = self
            .segments
            .iter()
            .map(|(c, v)| match c.as_str() {
                "projects" => (c.clone(), project.to_string()),
                "locations" => (c.clone(), location.to_string()),
                _ => (c.clone(), v.clone()),
            })
            .collect();
        Self { segments }
    }

    /// Same parent, different trailing id.
    pub fn with_id(&self, id: &str) -> ResourceName {
        let mut segments = self.segments.clone();
        if let Some(last) = segments.last_mut() {
            last.1 = id.to_string();
        }
        Self { segments }
    }
}

fn join(segments: &[(String, String)]) -> String {
    segments
        .iter()
        .map(|(c, v)| format!("{}/{}", c, v))
        .collect::<Vec<_>>()
        .join("/")
}

impl fmt::Display for ResourceName {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&join(&self.segments))
    }
}

/// A resource's full path plus a human display name.
///
/// Identity is the path alone: two refs with the same path and different
/// display names are the same resource.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ResourceRef {
    pub name: String,
    #[serde(default)]
    pub display_name: String,
}

impl ResourceRef {
    pub fn new(name: impl Into<String>, display_name: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            display_name: display_name.into(),
        }
    }

    /// Trailing id segment of the path.
    pub fn id(&self) -> &str {
        self.name.rsplit('/').next().unwrap_or("")
    }

    /// Display name, falling back to the id when the API returned none.
    pub fn label(&self) -> &str {
        if self.display_name.is_empty() {
            self.id()
        } else {
            &self.display_name
        }
    }
}

impl PartialEq for ResourceRef {
    fn eq(&self, other: &Self) -> bool {
        self.name == other.name
    }
}

impl Eq for ResourceRef {}

impl Hash for ResourceRef {
    fn hash<H: Hasher>(&self, state: &mut H) {
        self.name.hash(state);
    }
}

impl PartialOrd for ResourceRef {
    fn partial_cmp(&self, other: &Self) -> Option<Ordering> {
        Some(self.cmp(other))
    }
}

impl Ord for ResourceRef {
    fn cmp(&self, other: &Self) -> Ordering {
        self.name.cmp(&other.name)
    }
}

impl fmt::Display for ResourceRef {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{} ({})", self.label(), self.name)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    const AGENT: &str =
        "projects/p1/locations/global/collections/col1/engines/eng1/assistants/asst1/agents/agentA";

    #[test]
    fn test_parse_agent_name() {
        let name = ResourceName::parse(AGENT).unwrap();
        assert_eq!(name.kind(), Some(ResourceKind::Agent));
        assert_eq!(name.id(), "agentA");
        assert_eq!(name.project(), Some("p1"));
        assert_eq!(name.location(), Some("global"));
        assert_eq!(
            name.parent_path(),
            "projects/p1/locations/global/collections/col1/engines/eng1/assistants/asst1"
        );
        assert_eq!(name.to_string(), AGENT);
    }

    #[test]
    fn test_ancestors() {
        let name = ResourceName::parse(AGENT).unwrap();
        assert_eq!(
            name.ancestor(ResourceKind::Engine).unwrap().to_string(),
            "projects/p1/locations/global/collections/col1/engines/eng1"
        );
        assert_eq!(
            name.ancestor(ResourceKind::Collection).unwrap().to_string(),
            "projects/p1/locations/global/collections/col1"
        );
        assert!(name.ancestor(ResourceKind::Agent).is_none());
        assert!(name.ancestor(ResourceKind::Authorization).is_none());
    }

    #[test]
    fn test_parse_rejects_malformed() {
        assert_eq!(ResourceName::parse(""), Err(NameError::Empty));
        assert!(matches!(
            ResourceName::parse("projects/p/locations"),
            Err(NameError::OddSegments(_))
        ));
        assert!(matches!(
            ResourceName::parse("projects//locations/x"),
            Err(NameError::EmptySegment(_))
        ));
    }

    #[test]
    fn test_retarget_and_with_id() {
        let name = ResourceName::parse("projects/src/locations/global/authorizations/auth1").unwrap();
        let moved = name.retarget("dst", "eu");
        assert_eq!(moved.to_string(), "projects/dst/locations/eu/authorizations/auth1");
        assert_eq!(
            moved.with_id("auth1-2").to_string(),
            "projects/dst/locations/eu/authorizations/auth1-2"
        );
    }

    #[test]
    fn test_ref_identity_is_path_only() {
        let a = ResourceRef::new(AGENT, "Agent A");
        let b = ResourceRef::new(AGENT, "Renamed");
        assert_eq!(a, b);
        assert_eq!(a.id(), "agentA");
        assert_eq!(ResourceRef::new(AGENT, "").label(), "agentA");
    }
}
