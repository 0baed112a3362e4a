//! Node type records and the catalog of built-in behaviors.

use crate::behavior::Behavior;
use std::collections::BTreeMap;
use std::fmt;

/// Namespace reserved for project-owned, editable node types.
pub const PROJECT_NAMESPACE: &str = "project.";

/// Where a node type's behavior comes from.
#[derive(Clone, Debug, Eq, PartialEq)]
pub enum TypeSource {
    /// Resolved through the library's compiled behavior factories. The
    /// string names the library entry, so a project fork of a built-in
    /// still instantiates the original factory.
    Builtin(String),
    /// Steel source interpreted by the script adapter.
    Script(String),
}

/// A named template nodes are instantiated from.
#[derive(Clone, Debug, Eq, PartialEq)]
pub struct NodeType {
    /// Display name, also the default label of new nodes.
    pub name: String,
    /// Namespaced identifier, e.g. `math.add` or `project.wobble`.
    pub type_id: String,
    pub source: TypeSource,
    pub description: String,
}

impl NodeType {
    /// Whether this type lives in the editable project namespace.
    pub fn is_project(&self) -> bool {
        self.type_id.starts_with(PROJECT_NAMESPACE)
    }
}

/// Constructs a fresh behavior instance for a node.
pub type BehaviorFactory = Box<dyn Fn() -> Box<dyn Behavior>>;

struct Entry {
    ty: NodeType,
    new: BehaviorFactory,
}

/// The fixed catalog of built-in node types, keyed by type identifier.
///
/// Read-only at runtime: project-level types shadow and fork these but the
/// catalog itself never changes after construction.
#[derive(Default)]
pub struct Library {
    entries: BTreeMap<String, Entry>,
}

impl Library {
    pub fn new() -> Self {
        Self::default()
    }

    /// Register a built-in type under `type_id`.
    pub fn register<F, B>(&mut self, type_id: &str, name: &str, description: &str, new: F)
    where
        F: Fn() -> B + 'static,
        B: Behavior + 'static,
    {
        let ty = NodeType {
            name: name.to_string(),
            type_id: type_id.to_string(),
            source: TypeSource::Builtin(type_id.to_string()),
            description: description.to_string(),
        };
        let entry = Entry {
            ty,
            new: Box::new(move || Box::new(new())),
        };
        self.entries.insert(type_id.to_string(), entry);
    }

    pub fn contains(&self, type_id: &str) -> bool {
        self.entries.contains_key(type_id)
    }

    pub fn node_type(&self, type_id: &str) -> Option<&NodeType> {
        self.entries.get(type_id).map(|e| &e.ty)
    }

    /// Construct a fresh behavior for the named entry.
    pub fn instantiate(&self, type_id: &str) -> Option<Box<dyn Behavior>> {
        self.entries.get(type_id).map(|e| (e.new)())
    }

    /// All registered types in identifier order.
    pub fn types(&self) -> impl Iterator<Item = &NodeType> {
        self.entries.values().map(|e| &e.ty)
    }

    pub fn len(&self) -> usize {
        self.entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }
}

impl fmt::Debug for Library {
    fn fmt(&self, f: &mut fmt::Formatter) -> fmt::Result {
        f.debug_list().entries(self.entries.keys()).finish()
    }
}
