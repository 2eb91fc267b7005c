//! Topic Node
//!
//! Topics are a lightweight hierarchy without a persisted container flag: a
//! topic is a container exactly when it has children at read time
//! ([`ContainerFlag::Derived`]).

use crate::models::{ContainerFlag, HierarchicalNode, NodeId, NodeRecord};

/// Topic with a container flag derived from child presence
#[derive(Debug, Clone, PartialEq)]
pub struct Topic {
    id: Option<NodeId>,
    title: String,
    path: String,
    parent: Option<NodeId>,
    is_container: bool,
}

impl Topic {
    pub fn new(title: impl Into<String>) -> Self {
        Self {
            id: None,
            title: title.into(),
            path: String::new(),
            parent: None,
            is_container: false,
        }
    }

    pub fn with_parent(mut self, parent: NodeId) -> Self {
        self.parent = Some(parent);
        self
    }
}

impl HierarchicalNode for Topic {
    const TABLE: &'static str = "topics";
    const CONTAINER_FLAG: ContainerFlag = ContainerFlag::Derived;

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

    fn from_record(record: NodeRecord) -> Self {
        Self {
            id: Some(record.id),
            title: record.title,
            path: record.path,
            parent: record.parent_id,
            is_container: record.has_children,
        }
    }
}
