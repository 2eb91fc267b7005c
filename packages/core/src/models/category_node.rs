//! Type-Safe Category Node
//!
//! Categories form a catalogue: a category is a container when it holds other
//! categories or items, and an item otherwise. The container flag is persisted
//! ([`ContainerFlag::Stored`]) so that container/item listings are a single
//! indexed filter.
//!
//! # Examples
//!
//! ```rust
//! use pathtree_core::models::{Category, HierarchicalNode, NodeId};
//!
//! let parent_id = NodeId::from("fruit-id");
//! let apple = Category::new("Apple")
//!     .with_parent(parent_id.clone())
//!     .with_description("Crunchy");
//!
//! assert_eq!(apple.parent(), Some(&parent_id));
//! assert_eq!(apple.description(), Some("Crunchy"));
//! ```

use crate::models::{ContainerFlag, HierarchicalNode, NodeId, NodeRecord};
use serde_json::json;

/// Catalogue category with a stored container flag
#[derive(Debug, Clone, PartialEq)]
pub struct Category {
    id: Option<NodeId>,
    title: String,
    path: String,
    parent: Option<NodeId>,
    is_container: bool,
    description: Option<String>,
}

impl Category {
    /// Create a new, not yet persisted root category
    pub fn new(title: impl Into<String>) -> Self {
        Self {
            id: None,
            title: title.into(),
            path: String::new(),
            parent: None,
            is_container: false,
            description: None,
        }
    }

    /// Place the category under `parent`
    pub fn with_parent(mut self, parent: NodeId) -> Self {
        self.parent = Some(parent);
        self
    }

    /// Attach a free-form description
    pub fn with_description(mut self, description: impl Into<String>) -> Self {
        self.description = Some(description.into());
        self
    }

    pub fn description(&self) -> Option<&str> {
        self.description.as_deref()
    }

    pub fn set_description(&mut self, description: Option<String>) {
        self.description = description;
    }
}

impl HierarchicalNode for Category {
    const TABLE: &'static str = "categories";
    const CONTAINER_FLAG: ContainerFlag = ContainerFlag::Stored;

    fn id(&self) -> Option<&NodeId> {
        self.id.as_ref()
    }

    fn set_id(&mut self, id: NodeId) {
        self.id = Some(id);
    }

    fn title(&self) -> &str {
        &self.title
    }

    fn set_title(&mut self, title: String) {
        self.title = title;
    }

    fn path(&self) -> &str {
        &self.path
    }

    fn set_path(&mut self, path: String) {
        self.path = path;
    }

    fn parent(&self) -> Option<&NodeId> {
        self.parent.as_ref()
    }

    fn set_parent(&mut self, parent: Option<NodeId>) {
        self.parent = parent;
    }

    fn is_container(&self) -> bool {
        self.is_container
    }

    fn set_is_container(&mut self, is_container: bool) {
        self.is_container = is_container;
    }

    fn properties(&self) -> serde_json::Value {
        match &self.description {
            Some(description) => json!({ "description": description }),
            None => json!({}),
        }
    }

    fn from_record(record: NodeRecord) -> Self {
        let description = record
            .properties
            .get("description")
            .and_then(|value| value.as_str())
            .map(str::to_string);

        Self {
            id: Some(record.id),
            title: record.title,
            path: record.path,
            parent: record.parent_id,
            is_container: record.is_container,
            description,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::Utc;

    #[test]
    fn test_new_category_is_unsaved_root() {
        let category = Category::new("Fruit");
        assert!(!category.is_persisted());
        assert!(category.parent().is_none());
        assert!(!category.is_container());
        assert_eq!(category.properties(), json!({}));
    }

    #[test]
    fn test_from_record_reads_description() {
        let record = NodeRecord {
            id: NodeId::from("c-1"),
            title: "Apple".to_string(),
            path: "Fruit/Apple".to_string(),
            parent_id: Some(NodeId::from("c-0")),
            is_container: false,
            properties: json!({ "description": "Crunchy" }),
            created_at: Utc::now(),
            modified_at: Utc::now(),
            has_children: false,
        };

        let category = Category::from_record(record);
        assert_eq!(category.id(), Some(&NodeId::from("c-1")));
        assert_eq!(category.path(), "Fruit/Apple");
        assert_eq!(category.description(), Some("Crunchy"));
        assert_eq!(category.properties(), json!({ "description": "Crunchy" }));
    }
}
