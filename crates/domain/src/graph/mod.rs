//! Knowledge-graph domain: graphs, nodes, edges and their events.

mod entities;
mod events;
mod value_objects;

pub use entities::{DEFAULT_GRAPH_NAME, Edge, Graph, Node, UserGraphPointer};
pub use events::{
    EdgeCreatedData, EdgeDeletedData, GraphCreatedData, GraphEvent, NodeCreatedData,
    NodeDeletedData,
};
pub use value_objects::{
    MAX_CONTENT_CHARS, MAX_KEYWORDS, UserId, extract_keywords, normalize_keywords,
    validate_content,
};
