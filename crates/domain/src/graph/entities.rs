//! Graph, node and edge entities.

use chrono::{DateTime, Utc};
use common::EntityId;
use serde::{Deserialize, Serialize};
use store::{Item, Version, WriteItem};

use crate::entity::Entity;
use crate::error::DomainError;

use super::value_objects::{UserId, normalize_keywords, validate_content};

/// Name given to a user's automatically created first graph.
pub const DEFAULT_GRAPH_NAME: &str = "default";

/// A user's knowledge graph.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Graph {
    pub id: EntityId,
    pub owner: UserId,
    pub name: String,
    pub node_count: u64,
    pub edge_count: u64,
    #[serde(default)]
    pub version: Version,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
}

impl Graph {
    /// Creates a new, empty graph.
    pub fn new(owner: UserId, name: impl Into<String>) -> Self {
        let now = Utc::now();
        Self {
            id: EntityId::new(),
            owner,
            name: name.into(),
            node_count: 0,
            edge_count: 0,
            version: Version::initial(),
            created_at: now,
            updated_at: now,
        }
    }

    /// Records nodes and edges added to the graph.
    pub fn record_additions(&mut self, nodes: u64, edges: u64) {
        self.node_count += nodes;
        self.edge_count += edges;
        self.updated_at = Utc::now();
    }
}

impl Entity for Graph {
    fn entity_type() -> &'static str {
        "graph"
    }

    fn id(&self) -> EntityId {
        self.id
    }

    fn version(&self) -> Version {
        self.version
    }

    fn set_version(&mut self, version: Version) {
        self.version = version;
    }
}

/// A piece of knowledge inside a graph.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Node {
    pub id: EntityId,
    pub graph_id: EntityId,
    pub owner: UserId,
    pub content: String,
    pub keywords: Vec<String>,
    #[serde(default)]
    pub version: Version,
    pub created_at: DateTime<Utc>,
}

impl Node {
    /// Builds a validated node.
    ///
    /// Content is trimmed and must be non-empty; keywords are normalized.
    pub fn new<K: AsRef<str>>(
        graph_id: EntityId,
        owner: UserId,
        content: &str,
        keywords: impl IntoIterator<Item = K>,
    ) -> Result<Self, DomainError> {
        Ok(Self {
            id: EntityId::new(),
            graph_id,
            owner,
            content: validate_content(content)?,
            keywords: normalize_keywords(keywords)?,
            version: Version::initial(),
            created_at: Utc::now(),
        })
    }
}

impl Entity for Node {
    fn entity_type() -> &'static str {
        "node"
    }

    fn id(&self) -> EntityId {
        self.id
    }

    fn version(&self) -> Version {
        self.version
    }

    fn set_version(&mut self, version: Version) {
        self.version = version;
    }
}

/// A weighted, directed relation between two nodes of one graph.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Edge {
    pub id: EntityId,
    pub graph_id: EntityId,
    pub source: EntityId,
    pub target: EntityId,
    pub weight: f64,
    #[serde(default)]
    pub version: Version,
    pub created_at: DateTime<Utc>,
}

impl Edge {
    /// Creates an edge. Self-loops and weights outside `(0, 1]` are rejected.
    pub fn new(
        graph_id: EntityId,
        source: EntityId,
        target: EntityId,
        weight: f64,
    ) -> Result<Self, DomainError> {
        if source == target {
            return Err(DomainError::Validation(
                "edge source and target must differ".to_string(),
            ));
        }
        if !(weight > 0.0 && weight <= 1.0) {
            return Err(DomainError::Validation(format!(
                "edge weight {weight} is outside (0, 1]"
            )));
        }
        Ok(Self {
            id: EntityId::new(),
            graph_id,
            source,
            target,
            weight,
            version: Version::initial(),
            created_at: Utc::now(),
        })
    }
}

impl Entity for Edge {
    fn entity_type() -> &'static str {
        "edge"
    }

    fn id(&self) -> EntityId {
        self.id
    }

    fn version(&self) -> Version {
        self.version
    }

    fn set_version(&mut self, version: Version) {
        self.version = version;
    }
}

/// Maps a user to their default graph.
///
/// Stored under `user-graph#<user>` and only ever created conditionally, so
/// two workers racing to create a user's first graph cannot both succeed.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct UserGraphPointer {
    pub user_id: UserId,
    pub graph_id: EntityId,
    pub created_at: DateTime<Utc>,
}

impl UserGraphPointer {
    pub const PREFIX: &'static str = "user-graph#";

    pub fn new(user_id: UserId, graph_id: EntityId) -> Self {
        Self {
            user_id,
            graph_id,
            created_at: Utc::now(),
        }
    }

    /// Returns the store key for a user's pointer.
    pub fn key_for(user_id: &UserId) -> String {
        format!("{}{}", Self::PREFIX, user_id)
    }

    pub fn key(&self) -> String {
        Self::key_for(&self.user_id)
    }

    /// The write that creates this pointer if the user has none yet.
    pub fn to_create_write(&self) -> Result<WriteItem, serde_json::Error> {
        Ok(WriteItem::put_if_absent(Item::from_serializable(
            self.key(),
            self,
        )?))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use store::Condition;

    fn alice() -> UserId {
        UserId::new("alice").unwrap()
    }

    #[test]
    fn new_graph_is_empty_and_unsaved() {
        let graph = Graph::new(alice(), DEFAULT_GRAPH_NAME);
        assert_eq!(graph.node_count, 0);
        assert!(graph.is_new());
        assert!(graph.key().starts_with("graph#"));
    }

    #[test]
    fn record_additions_updates_counters() {
        let mut graph = Graph::new(alice(), DEFAULT_GRAPH_NAME);
        graph.record_additions(1, 3);
        graph.record_additions(1, 0);
        assert_eq!(graph.node_count, 2);
        assert_eq!(graph.edge_count, 3);
    }

    #[test]
    fn node_validates_fields() {
        let graph_id = EntityId::new();
        let node = Node::new(graph_id, alice(), "  Lifetimes  ", ["Rust", "rust"]).unwrap();
        assert_eq!(node.content, "Lifetimes");
        assert_eq!(node.keywords, vec!["rust"]);

        let empty = Node::new(graph_id, alice(), "", Vec::<String>::new());
        assert!(matches!(empty, Err(DomainError::Validation(_))));
    }

    #[test]
    fn edge_rejects_self_loops_and_bad_weights() {
        let graph_id = EntityId::new();
        let a = EntityId::new();
        let b = EntityId::new();

        assert!(Edge::new(graph_id, a, a, 0.5).is_err());
        assert!(Edge::new(graph_id, a, b, 0.0).is_err());
        assert!(Edge::new(graph_id, a, b, 1.5).is_err());
        assert!(Edge::new(graph_id, a, b, 1.0).is_ok());
    }

    #[test]
    fn pointer_create_is_conditional() {
        let pointer = UserGraphPointer::new(alice(), EntityId::new());
        let write = pointer.to_create_write().unwrap();
        assert_eq!(write.key(), "user-graph#alice");
        assert_eq!(write.condition(), &Condition::NotExists);
    }
}
