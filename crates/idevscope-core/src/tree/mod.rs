//! Directory hierarchy reconstruction
//!
//! The manifest lists entries as flat `(path, name)` pairs and may list a
//! file before any record for its parent directory. The builder keeps an
//! arena of nodes plus a map from normalized directory path to node, walks
//! up from each entry's path until a known ancestor is found, and
//! synthesizes the missing directories between that ancestor and the entry.

use serde::{Deserialize, Serialize};
use std::collections::{HashMap, VecDeque};

use crate::error::{CatalogError, Result};
use crate::index::{CatalogIndex, EntryType, IndexEntry};

/// Position of a node in a [`DomainTree`] arena
pub type NodeId = usize;

/// Deepest tree [`DomainTree::to_json`] will render
pub const MAX_JSON_DEPTH: usize = 512;

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct TreeNode {
    pub name: String,
    pub kind: EntryType,
    pub size: Option<u64>,
    /// Catalog entry backing this node; `None` for synthesized directories
    pub entry_id: Option<u64>,
    /// Non-owning back reference into the arena
    pub parent: Option<NodeId>,
    children: Vec<NodeId>,
    /// A name may be shared by children of different kinds
    #[serde(skip)]
    child_index: HashMap<(EntryType, String), NodeId>,
}

impl TreeNode {
    fn new(name: &str, kind: EntryType, parent: Option<NodeId>) -> Self {
        Self {
            name: name.to_string(),
            kind,
            size: None,
            entry_id: None,
            parent,
            children: Vec::new(),
            child_index: HashMap::new(),
        }
    }

    /// Child ids in insertion order
    pub fn children(&self) -> &[NodeId] {
        &self.children
    }

    pub fn is_synthesized(&self) -> bool {
        self.entry_id.is_none()
    }
}

/// Immutable tree of one domain (or one domain type)
#[derive(Debug, Clone)]
pub struct DomainTree {
    nodes: Vec<TreeNode>,
    root: NodeId,
}

impl DomainTree {
    fn with_root(name: &str) -> Self {
        Self {
            nodes: vec![TreeNode::new(name, EntryType::Directory, None)],
            root: 0,
        }
    }

    pub fn root(&self) -> NodeId {
        self.root
    }

    pub fn node(&self, id: NodeId) -> &TreeNode {
        &self.nodes[id]
    }

    pub fn len(&self) -> usize {
        self.nodes.len()
    }

    pub fn is_empty(&self) -> bool {
        self.nodes.len() <= 1
    }

    /// Directories below the root that no catalog entry describes
    pub fn synthesized_count(&self) -> usize {
        self.nodes
            .iter()
            .skip(1)
            .filter(|n| n.kind == EntryType::Directory && n.is_synthesized())
            .count()
    }

    pub fn children(&self, id: NodeId) -> impl Iterator<Item = &TreeNode> {
        self.nodes[id].children.iter().map(move |&c| &self.nodes[c])
    }

    /// Child by name, preferring a directory when several kinds share it
    pub fn child(&self, id: NodeId, name: &str) -> Option<NodeId> {
        [EntryType::Directory, EntryType::File, EntryType::Symlink]
            .into_iter()
            .find_map(|kind| self.child_of_kind(id, name, kind))
    }

    pub fn child_of_kind(&self, id: NodeId, name: &str, kind: EntryType) -> Option<NodeId> {
        self.nodes[id]
            .child_index
            .get(&(kind, name.to_string()))
            .copied()
    }

    /// Node at a `/`-separated path below the root.
    ///
    /// Every component but the last must name a directory.
    pub fn find(&self, path: &str) -> Option<NodeId> {
        let mut parts = path.split('/').filter(|s| !s.is_empty()).peekable();
        let mut node = self.root;
        while let Some(name) = parts.next() {
            node = if parts.peek().is_some() {
                self.child_of_kind(node, name, EntryType::Directory)?
            } else {
                self.child(node, name)?
            };
        }
        Some(node)
    }

    /// Depth of the deepest node, the root being 0
    pub fn depth(&self) -> usize {
        self.walk().into_iter().map(|(_, d)| d).max().unwrap_or(0)
    }

    /// Path of a node relative to the root
    pub fn path_of(&self, id: NodeId) -> String {
        let mut parts = Vec::new();
        let mut current = id;
        while let Some(parent) = self.nodes[current].parent {
            parts.push(self.nodes[current].name.as_str());
            current = parent;
        }
        parts.reverse();
        parts.join("/")
    }

    /// Depth-first pre-order walk yielding (node id, depth)
    pub fn walk(&self) -> Vec<(NodeId, usize)> {
        let mut out = Vec::with_capacity(self.nodes.len());
        let mut stack = vec![(self.root, 0usize)];
        while let Some((id, depth)) = stack.pop() {
            out.push((id, depth));
            for &child in self.nodes[id].children.iter().rev() {
                stack.push((child, depth + 1));
            }
        }
        out
    }

    /// Nested JSON rendering for consumers that want a plain document.
    ///
    /// Rendering and serializing the document both recurse per level, so
    /// trees deeper than [`MAX_JSON_DEPTH`] are refused.
    pub fn to_json(&self) -> Result<serde_json::Value> {
        let depth = self.depth();
        if depth > MAX_JSON_DEPTH {
            return Err(CatalogError::TreeTooDeep {
                depth,
                limit: MAX_JSON_DEPTH,
            });
        }
        Ok(self.node_json(self.root))
    }

    fn node_json(&self, id: NodeId) -> serde_json::Value {
        let node = &self.nodes[id];
        let children: Vec<serde_json::Value> =
            node.children.iter().map(|&c| self.node_json(c)).collect();
        serde_json::json!({
            "name": node.name,
            "type": node.kind.as_char().to_string(),
            "size": node.size,
            "entry_id": node.entry_id,
            "children": children,
        })
    }
}

/// Builds a [`DomainTree`] from catalog entries ordered by (path, name)
pub struct HierarchyBuilder {
    tree: DomainTree,
}

impl HierarchyBuilder {
    pub fn new(root_name: &str) -> Self {
        Self {
            tree: DomainTree::with_root(root_name),
        }
    }

    pub fn root(&self) -> NodeId {
        self.tree.root()
    }

    /// Attach one domain's entries below `parent`
    pub fn add_domain<'e>(
        &mut self,
        parent: NodeId,
        entries: impl IntoIterator<Item = &'e IndexEntry>,
    ) {
        let mut path_to_node: HashMap<String, NodeId> = HashMap::new();
        path_to_node.insert(String::new(), parent);

        for entry in entries {
            let dir = self.resolve_directory(&mut path_to_node, &entry.file_path);
            match entry.entry_type {
                EntryType::Directory => {
                    let node = &mut self.tree.nodes[dir];
                    if node.entry_id.is_some() {
                        tracing::warn!(
                            "Directory {} listed twice, keeping entry {:?}",
                            entry.file_path,
                            node.entry_id
                        );
                    } else {
                        node.entry_id = Some(entry.id);
                    }
                }
                EntryType::File | EntryType::Symlink => {
                    let leaf = self.attach_child(dir, &entry.file_name, entry.entry_type);
                    let node = &mut self.tree.nodes[leaf];
                    if node.entry_id.is_none() {
                        node.entry_id = Some(entry.id);
                        node.size = Some(entry.filelen);
                    } else {
                        tracing::warn!(
                            "Entry {} duplicates {}/{}, keeping entry {:?}",
                            entry.id,
                            entry.file_path,
                            entry.file_name,
                            node.entry_id
                        );
                    }
                }
            }
        }
    }

    pub fn finish(self) -> DomainTree {
        self.tree
    }

    /// Node for a directory path, synthesizing any missing ancestors
    fn resolve_directory(
        &mut self,
        path_to_node: &mut HashMap<String, NodeId>,
        path: &str,
    ) -> NodeId {
        let normalized = normalize_path(path);
        let mut lookup = normalized.as_str();
        let mut missing: VecDeque<&str> = VecDeque::new();

        let mut dir = loop {
            if let Some(&node) = path_to_node.get(lookup) {
                break node;
            }
            let (head, component) = lookup.rsplit_once('/').unwrap_or(("", lookup));
            missing.push_front(component);
            lookup = head;
        };

        let mut current = lookup.to_string();
        for component in missing {
            dir = self.attach_child(dir, component, EntryType::Directory);
            if !current.is_empty() {
                current.push('/');
            }
            current.push_str(component);
            path_to_node.insert(current.clone(), dir);
        }

        dir
    }

    /// Existing child of the same name and kind, or a new one.
    ///
    /// A name clash across kinds yields sibling nodes, so a directory is
    /// never resolved to a file or symlink.
    fn attach_child(&mut self, parent: NodeId, name: &str, kind: EntryType) -> NodeId {
        if let Some(existing) = self.tree.child_of_kind(parent, name, kind) {
            return existing;
        }
        if let Some(other) = self.tree.child(parent, name) {
            tracing::warn!(
                "{} is both a {} and a {}, keeping both",
                self.tree.path_of(other),
                self.tree.nodes[other].kind,
                kind
            );
        }

        let id = self.tree.nodes.len();
        self.tree.nodes.push(TreeNode::new(name, kind, Some(parent)));
        let parent_node = &mut self.tree.nodes[parent];
        parent_node.children.push(id);
        parent_node.child_index.insert((kind, name.to_string()), id);
        id
    }
}

/// Drop empty segments so `a//b/` and `a/b` address the same directory
fn normalize_path(path: &str) -> String {
    path.split('/')
        .filter(|s| !s.is_empty())
        .collect::<Vec<_>>()
        .join("/")
}

/// Tree of a single domain, rooted at a node named after the domain
pub fn build_tree(index: &CatalogIndex, domain_type: &str, domain: &str) -> DomainTree {
    let root_name = if domain.is_empty() { domain_type } else { domain };
    let mut builder = HierarchyBuilder::new(root_name);
    let root = builder.root();
    builder.add_domain(root, index.entries(domain_type, domain));
    let tree = builder.finish();
    tracing::debug!(
        "Built tree for {}-{}: {} nodes, {} synthesized directories",
        domain_type,
        domain,
        tree.len(),
        tree.synthesized_count()
    );
    tree
}

/// Tree of every domain of a domain type.
///
/// With several domains each one becomes a child of the domain type root;
/// a single domain is attached directly to the root.
pub fn build_domain_type_tree(index: &CatalogIndex, domain_type: &str) -> DomainTree {
    let domains = index.domains(domain_type);
    let mut builder = HierarchyBuilder::new(domain_type);
    let root = builder.root();

    if domains.len() > 1 {
        for domain in domains {
            let domain_node = builder.attach_child(root, domain, EntryType::Directory);
            builder.add_domain(domain_node, index.entries(domain_type, domain));
        }
    } else if let Some(domain) = domains.first() {
        builder.add_domain(root, index.entries(domain_type, domain));
    }

    builder.finish()
}
