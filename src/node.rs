//! Arena-backed node graph.
//!
//! Nodes live in one `Vec` and refer to each other by [`NodeId`]. Parent
//! links are plain indices, so the graph has no ownership cycles: dropping the
//! arena releases every node at once.

use crate::error::BuildError;
use crate::opaque::Placeholder;
use crate::token::{Attribute, NamespaceDecl, QualifiedName};
use std::fmt;

/// Compact node identifier (index into the arena).
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct NodeId(u32);

impl NodeId {
    pub fn index(self) -> usize {
        self.0 as usize
    }
}

impl fmt::Display for NodeId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "#{}", self.0)
    }
}

/// What a SOAP-aware builder recognized an element as.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ElementRole {
    Envelope,
    Header,
    HeaderBlock,
    Body,
    Fault,
    FaultCode,
    FaultSubcode,
    FaultValue,
    FaultReason,
    FaultText,
    FaultNode,
    FaultRole,
    FaultDetail,
    /// Any descendant of a fault detail
    DetailEntry,
    /// Ordinary element with no SOAP meaning
    Plain,
}

impl ElementRole {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Envelope => "envelope",
            Self::Header => "header",
            Self::HeaderBlock => "header-block",
            Self::Body => "body",
            Self::Fault => "fault",
            Self::FaultCode => "fault-code",
            Self::FaultSubcode => "fault-subcode",
            Self::FaultValue => "fault-value",
            Self::FaultReason => "fault-reason",
            Self::FaultText => "fault-text",
            Self::FaultNode => "fault-node",
            Self::FaultRole => "fault-role",
            Self::FaultDetail => "fault-detail",
            Self::DetailEntry => "detail-entry",
            Self::Plain => "element",
        }
    }
}

#[derive(Debug, Clone)]
pub struct ElementData {
    pub name: QualifiedName,
    /// Bindings declared on this element, in document order
    pub namespaces: Vec<NamespaceDecl>,
    pub attributes: Vec<Attribute>,
    pub role: ElementRole,
}

impl ElementData {
    pub fn attribute(&self, namespace: Option<&str>, local_name: &str) -> Option<&str> {
        self.attributes
            .iter()
            .find(|a| a.name.is(namespace, local_name))
            .map(|a| a.value.as_str())
    }
}

#[derive(Debug, Clone)]
pub enum NodeKind {
    Document,
    Element(ElementData),
    Text { value: String, cdata: bool },
    Comment(String),
    ProcessingInstruction { target: String, data: String },
    DocType(String),
    /// Stand-in for a subtree an opaque builder kept out of the graph
    Opaque(Placeholder),
}

#[derive(Debug, Clone)]
pub struct Node {
    pub kind: NodeKind,
    pub parent: Option<NodeId>,
    pub first_child: Option<NodeId>,
    pub last_child: Option<NodeId>,
    pub previous_sibling: Option<NodeId>,
    pub next_sibling: Option<NodeId>,
    /// End event seen (containers) or fully read (leaves)
    pub complete: bool,
}

impl Node {
    fn new(kind: NodeKind, complete: bool) -> Self {
        Self {
            kind,
            parent: None,
            first_child: None,
            last_child: None,
            previous_sibling: None,
            next_sibling: None,
            complete,
        }
    }

    pub fn element(&self) -> Option<&ElementData> {
        match &self.kind {
            NodeKind::Element(data) => Some(data),
            _ => None,
        }
    }

    pub fn is_element(&self) -> bool {
        matches!(self.kind, NodeKind::Element(_))
    }
}

/// Owner of every node of one document.
#[derive(Debug, Clone, Default)]
pub struct Arena {
    nodes: Vec<Node>,
}

impl Arena {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn len(&self) -> usize {
        self.nodes.len()
    }

    pub fn is_empty(&self) -> bool {
        self.nodes.is_empty()
    }

    /// Allocate an unlinked node.
    pub fn alloc(&mut self, kind: NodeKind, complete: bool) -> NodeId {
        let id = NodeId(self.nodes.len() as u32);
        self.nodes.push(Node::new(kind, complete));
        id
    }

    pub fn get(&self, id: NodeId) -> &Node {
        &self.nodes[id.index()]
    }

    pub fn get_mut(&mut self, id: NodeId) -> &mut Node {
        &mut self.nodes[id.index()]
    }

    pub fn element(&self, id: NodeId) -> Option<&ElementData> {
        self.get(id).element()
    }

    pub fn role(&self, id: NodeId) -> Option<ElementRole> {
        self.element(id).map(|e| e.role)
    }

    /// Link `child` as the last child of `parent`.
    pub fn append_child(&mut self, parent: NodeId, child: NodeId) {
        let previous = self.get(parent).last_child;
        {
            let node = self.get_mut(child);
            node.parent = Some(parent);
            node.previous_sibling = previous;
            node.next_sibling = None;
        }
        match previous {
            Some(prev) => self.get_mut(prev).next_sibling = Some(child),
            None => self.get_mut(parent).first_child = Some(child),
        }
        self.get_mut(parent).last_child = Some(child);
    }

    /// Unlink a complete node from its parent and siblings.
    pub fn detach(&mut self, id: NodeId) -> Result<(), BuildError> {
        if !self.get(id).complete {
            return Err(BuildError::structural(format!(
                "node {id} cannot be detached before it is complete"
            )));
        }
        let (parent, previous, next) = {
            let node = self.get(id);
            (node.parent, node.previous_sibling, node.next_sibling)
        };
        match previous {
            Some(prev) => self.get_mut(prev).next_sibling = next,
            None => {
                if let Some(parent) = parent {
                    self.get_mut(parent).first_child = next;
                }
            }
        }
        match next {
            Some(next) => self.get_mut(next).previous_sibling = previous,
            None => {
                if let Some(parent) = parent {
                    self.get_mut(parent).last_child = previous;
                }
            }
        }
        let node = self.get_mut(id);
        node.parent = None;
        node.previous_sibling = None;
        node.next_sibling = None;
        Ok(())
    }

    /// Children already linked under `id`; never triggers building.
    pub fn children(&self, id: NodeId) -> Children<'_> {
        Children {
            arena: self,
            next: self.get(id).first_child,
        }
    }

    /// Resolve `prefix` (None = default namespace) from `id` upwards.
    pub fn lookup_namespace(&self, id: NodeId, prefix: Option<&str>) -> Option<&str> {
        let mut current = Some(id);
        while let Some(node_id) = current {
            let node = self.get(node_id);
            if let Some(element) = node.element() {
                if let Some(decl) = element
                    .namespaces
                    .iter()
                    .find(|d| d.prefix.as_deref() == prefix)
                {
                    return if decl.uri.is_empty() { None } else { Some(&decl.uri) };
                }
            }
            current = node.parent;
        }
        None
    }

    /// Concatenated text of the already-built descendants of `id`.
    pub fn text_content(&self, id: NodeId) -> String {
        let mut out = String::new();
        self.collect_text(id, &mut out);
        out
    }

    fn collect_text(&self, id: NodeId, out: &mut String) {
        match &self.get(id).kind {
            NodeKind::Text { value, .. } => out.push_str(value),
            NodeKind::Document | NodeKind::Element(_) => {
                for child in self.children(id) {
                    self.collect_text(child, out);
                }
            }
            _ => {}
        }
    }
}

/// Iterator over linked children.
pub struct Children<'a> {
    arena: &'a Arena,
    next: Option<NodeId>,
}

impl Iterator for Children<'_> {
    type Item = NodeId;

    fn next(&mut self) -> Option<NodeId> {
        let id = self.next?;
        self.next = self.arena.get(id).next_sibling;
        Some(id)
    }
}
