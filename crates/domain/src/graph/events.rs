//! Knowledge-graph domain events.

use chrono::{DateTime, Utc};
use common::EntityId;
use serde::{Deserialize, Serialize};

use crate::entity::DomainEvent;

use super::{Edge, Graph, Node, UserId};

/// Events recorded in the outbox when the graph changes.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "type", content = "data")]
pub enum GraphEvent {
    /// A graph was created.
    GraphCreated(GraphCreatedData),

    /// A node was added to a graph.
    NodeCreated(NodeCreatedData),

    /// Two nodes were linked.
    EdgeCreated(EdgeCreatedData),

    /// A node was removed from a graph.
    NodeDeleted(NodeDeletedData),

    /// A link was removed.
    EdgeDeleted(EdgeDeletedData),
}

impl GraphEvent {
    pub fn graph_created(graph: &Graph) -> Self {
        GraphEvent::GraphCreated(GraphCreatedData {
            graph_id: graph.id,
            owner: graph.owner.clone(),
            name: graph.name.clone(),
            created_at: graph.created_at,
        })
    }

    pub fn node_created(node: &Node) -> Self {
        GraphEvent::NodeCreated(NodeCreatedData {
            node_id: node.id,
            graph_id: node.graph_id,
            owner: node.owner.clone(),
            content: node.content.clone(),
            keywords: node.keywords.clone(),
            created_at: node.created_at,
        })
    }

    pub fn edge_created(edge: &Edge) -> Self {
        GraphEvent::EdgeCreated(EdgeCreatedData {
            edge_id: edge.id,
            graph_id: edge.graph_id,
            source: edge.source,
            target: edge.target,
            weight: edge.weight,
        })
    }

    pub fn node_deleted(node: &Node) -> Self {
        GraphEvent::NodeDeleted(NodeDeletedData {
            node_id: node.id,
            graph_id: node.graph_id,
            deleted_at: Utc::now(),
        })
    }

    pub fn edge_deleted(edge: &Edge) -> Self {
        GraphEvent::EdgeDeleted(EdgeDeletedData {
            edge_id: edge.id,
            graph_id: edge.graph_id,
            source: edge.source,
            target: edge.target,
            deleted_at: Utc::now(),
        })
    }
}

impl DomainEvent for GraphEvent {
    fn event_type(&self) -> &'static str {
        match self {
            GraphEvent::GraphCreated(_) => "GraphCreated",
            GraphEvent::NodeCreated(_) => "NodeCreated",
            GraphEvent::EdgeCreated(_) => "EdgeCreated",
            GraphEvent::NodeDeleted(_) => "NodeDeleted",
            GraphEvent::EdgeDeleted(_) => "EdgeDeleted",
        }
    }

    fn aggregate_id(&self) -> EntityId {
        match self {
            GraphEvent::GraphCreated(data) => data.graph_id,
            GraphEvent::NodeCreated(data) => data.node_id,
            GraphEvent::EdgeCreated(data) => data.edge_id,
            GraphEvent::NodeDeleted(data) => data.node_id,
            GraphEvent::EdgeDeleted(data) => data.edge_id,
        }
    }

    fn aggregate_type(&self) -> &'static str {
        match self {
            GraphEvent::GraphCreated(_) => "Graph",
            GraphEvent::NodeCreated(_) | GraphEvent::NodeDeleted(_) => "Node",
            GraphEvent::EdgeCreated(_) | GraphEvent::EdgeDeleted(_) => "Edge",
        }
    }
}

/// Data for GraphCreated event.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct GraphCreatedData {
    pub graph_id: EntityId,
    pub owner: UserId,
    pub name: String,
    pub created_at: DateTime<Utc>,
}

/// Data for NodeCreated event.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct NodeCreatedData {
    pub node_id: EntityId,
    pub graph_id: EntityId,
    pub owner: UserId,
    pub content: String,
    pub keywords: Vec<String>,
    pub created_at: DateTime<Utc>,
}

/// Data for EdgeCreated event.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct EdgeCreatedData {
    pub edge_id: EntityId,
    pub graph_id: EntityId,
    pub source: EntityId,
    pub target: EntityId,
    pub weight: f64,
}

/// Data for NodeDeleted event.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct NodeDeletedData {
    pub node_id: EntityId,
    pub graph_id: EntityId,
    pub deleted_at: DateTime<Utc>,
}

/// Data for EdgeDeleted event.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct EdgeDeletedData {
    pub edge_id: EntityId,
    pub graph_id: EntityId,
    pub source: EntityId,
    pub target: EntityId,
    pub deleted_at: DateTime<Utc>,
}
