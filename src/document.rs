//! Lazily materialized document.
//!
//! Navigation pulls from the token source only as far as needed to answer the
//! question asked. Anything already built is answered from the arena without
//! touching the source again, so repeated reads are free and idempotent.

use crate::builder::{Builder, Mode};
use crate::config::{BuilderConfig, ElementKey, SoapVersion};
use crate::envelope::{EnvelopeState, HeaderBlockInfo};
use crate::error::BuildError;
use crate::node::{Arena, ElementData, ElementRole, Node, NodeId, NodeKind};
use crate::opaque::OpaqueSubtreeBuilder;
use crate::parser::XmlTokenSource;
use crate::token::{Attribute, TokenSource};

/// A document built on demand from a [`TokenSource`].
pub struct Document<S: TokenSource> {
    builder: Builder<S>,
}

impl<'a> Document<XmlTokenSource<&'a [u8]>> {
    /// Plain XML document over an in-memory string.
    pub fn parse(xml: &'a str) -> Self {
        Self::new(XmlTokenSource::from_text(xml))
    }

    /// SOAP envelope over an in-memory string, version detected from the
    /// envelope namespace.
    pub fn parse_soap(xml: &'a str) -> Self {
        Self::soap_with_version(XmlTokenSource::from_text(xml), None, &BuilderConfig::default())
    }
}

impl<S: TokenSource> Document<S> {
    /// Generic builder over any well-formed XML.
    pub fn new(source: S) -> Self {
        Self::with_config(source, &BuilderConfig::default())
    }

    pub fn with_config(source: S, config: &BuilderConfig) -> Self {
        Self {
            builder: Builder::new(source, Mode::Plain, config),
        }
    }

    /// Envelope builder. `expected_version` ("1.1", "1.2", an envelope
    /// namespace or a content type) pins the version the envelope must carry.
    pub fn soap(source: S, expected_version: Option<&str>) -> Result<Self, BuildError> {
        Self::soap_with_config(source, expected_version, &BuilderConfig::default())
    }

    /// Envelope builder; an explicit pin overrides `envelope.expected_version`.
    pub fn soap_with_config(
        source: S,
        expected_version: Option<&str>,
        config: &BuilderConfig,
    ) -> Result<Self, BuildError> {
        let pinned = match expected_version {
            Some(version) => Some(version.parse::<SoapVersion>()?),
            None => config.envelope.expected_version,
        };
        Ok(Self::soap_with_version(source, pinned, config))
    }

    pub fn soap_with_version(source: S, pinned: Option<SoapVersion>, config: &BuilderConfig) -> Self {
        Self {
            builder: Builder::new(source, Mode::Envelope(EnvelopeState::new(pinned)), config),
        }
    }

    /// Register a hook for elements named `key` at depth `max_depth` or above.
    pub fn register_opaque(
        &mut self,
        key: ElementKey,
        max_depth: u32,
        builder: Box<dyn OpaqueSubtreeBuilder>,
    ) -> Option<Box<dyn OpaqueSubtreeBuilder>> {
        self.builder.opaque.register(key, max_depth, builder)
    }

    /// Register the hook offered the payload element: the Body's first
    /// element, or the document element of a plain document.
    pub fn register_payload(
        &mut self,
        builder: Box<dyn OpaqueSubtreeBuilder>,
    ) -> Option<Box<dyn OpaqueSubtreeBuilder>> {
        self.builder.opaque.register_payload(builder)
    }

    fn state(&self) -> Option<&EnvelopeState> {
        match &self.builder.mode {
            Mode::Envelope(state) => Some(state),
            Mode::Plain => None,
        }
    }

    // ------------------------------------------------------------------
    // Lazy navigation
    // ------------------------------------------------------------------

    /// The root of the node graph, above the document element.
    pub fn document_node(&self) -> NodeId {
        self.builder.document
    }

    pub fn document_element(&mut self) -> Result<NodeId, BuildError> {
        self.builder.ensure(|b| b.root.is_some())?;
        self.builder
            .root
            .ok_or_else(|| BuildError::structural("document has no root element"))
    }

    pub fn first_child(&mut self, id: NodeId) -> Result<Option<NodeId>, BuildError> {
        self.builder.ensure(|b| {
            let node = b.arena.get(id);
            node.first_child.is_some() || node.complete
        })?;
        Ok(self.builder.arena.get(id).first_child)
    }

    pub fn next_sibling(&mut self, id: NodeId) -> Result<Option<NodeId>, BuildError> {
        self.builder.ensure(|b| {
            let node = b.arena.get(id);
            match node.parent {
                Some(parent) => node.next_sibling.is_some() || b.arena.get(parent).complete,
                None => true,
            }
        })?;
        Ok(self.builder.arena.get(id).next_sibling)
    }

    /// Never pulls: a node's earlier siblings exist before it does.
    pub fn previous_sibling(&self, id: NodeId) -> Option<NodeId> {
        self.builder.arena.get(id).previous_sibling
    }

    pub fn parent(&self, id: NodeId) -> Option<NodeId> {
        self.builder.arena.get(id).parent
    }

    /// Attributes of an element or placeholder. Complete as soon as the node exists.
    pub fn attributes(&self, id: NodeId) -> &[Attribute] {
        match &self.builder.arena.get(id).kind {
            NodeKind::Element(element) => &element.attributes,
            NodeKind::Opaque(placeholder) => &placeholder.attributes,
            _ => &[],
        }
    }

    pub fn is_complete(&self, id: NodeId) -> bool {
        self.builder.arena.get(id).complete
    }

    /// Pull until `id` is complete.
    pub fn build(&mut self, id: NodeId) -> Result<(), BuildError> {
        self.builder.ensure(|b| b.arena.get(id).complete)
    }

    /// Pull the rest of the stream.
    pub fn build_all(&mut self) -> Result<(), BuildError> {
        self.builder.ensure(|_| false)
    }

    /// All children of `id`, pulling as needed.
    pub fn children(&mut self, id: NodeId) -> Result<Vec<NodeId>, BuildError> {
        let mut out = Vec::new();
        let mut next = self.first_child(id)?;
        while let Some(child) = next {
            out.push(child);
            next = self.next_sibling(child)?;
        }
        Ok(out)
    }

    /// First element child of `id`, pulling as needed.
    pub fn first_element(&mut self, id: NodeId) -> Result<Option<NodeId>, BuildError> {
        let mut next = self.first_child(id)?;
        while let Some(child) = next {
            if self.builder.arena.get(child).is_element() {
                return Ok(Some(child));
            }
            next = self.next_sibling(child)?;
        }
        Ok(None)
    }

    /// Text content of `id` once fully built.
    pub fn text(&mut self, id: NodeId) -> Result<String, BuildError> {
        self.build(id)?;
        Ok(self.builder.arena.text_content(id))
    }

    // ------------------------------------------------------------------
    // Non-pulling access
    // ------------------------------------------------------------------

    pub fn node(&self, id: NodeId) -> &Node {
        self.builder.arena.get(id)
    }

    pub fn element(&self, id: NodeId) -> Option<&ElementData> {
        self.builder.arena.element(id)
    }

    pub fn arena(&self) -> &Arena {
        &self.builder.arena
    }

    /// Events consumed from the source so far.
    pub fn source_position(&self) -> u64 {
        self.builder.position()
    }

    /// Current element nesting depth of the builder.
    pub fn depth(&self) -> u32 {
        self.builder.depth()
    }

    /// True once the whole stream has been consumed (or the source closed).
    pub fn is_done(&self) -> bool {
        self.builder.is_done()
    }

    /// True after a fatal error; the built prefix stays readable.
    pub fn is_failed(&self) -> bool {
        self.builder.is_poisoned()
    }

    /// Release the source without building the rest.
    pub fn close(&mut self) {
        self.builder.close();
    }

    /// Unlink a complete node from the tree.
    pub fn detach(&mut self, id: NodeId) -> Result<(), BuildError> {
        self.builder.detach(id)
    }

    // ------------------------------------------------------------------
    // Envelope access
    // ------------------------------------------------------------------

    /// The Envelope element; `None` for a plain document.
    pub fn envelope(&mut self) -> Result<Option<NodeId>, BuildError> {
        self.document_element()?;
        Ok(self.state().and_then(|s| s.envelope))
    }

    pub fn soap_version(&mut self) -> Result<Option<SoapVersion>, BuildError> {
        self.document_element()?;
        Ok(self.state().and_then(|s| s.version))
    }

    /// The Header, if the envelope has one. Pulls until Header or Body is seen.
    pub fn header(&mut self) -> Result<Option<NodeId>, BuildError> {
        let Some(envelope) = self.envelope()? else {
            return Ok(None);
        };
        self.builder.ensure(|b| match &b.mode {
            Mode::Envelope(s) => {
                s.header.is_some() || s.body.is_some() || b.arena.get(envelope).complete
            }
            Mode::Plain => true,
        })?;
        Ok(self.state().and_then(|s| s.header))
    }

    pub fn body(&mut self) -> Result<Option<NodeId>, BuildError> {
        let Some(envelope) = self.envelope()? else {
            return Ok(None);
        };
        self.builder.ensure(|b| match &b.mode {
            Mode::Envelope(s) => s.body.is_some() || b.arena.get(envelope).complete,
            Mode::Plain => true,
        })?;
        Ok(self.state().and_then(|s| s.body))
    }

    /// The Fault, when it is the Body's first element. A Fault further down
    /// the Body is still checked against the fault grammar while it is built.
    pub fn fault(&mut self) -> Result<Option<NodeId>, BuildError> {
        let Some(body) = self.body()? else {
            return Ok(None);
        };
        let first = self.first_element(body)?;
        let fault = self.state().and_then(|s| s.fault);
        Ok(first.filter(|&id| Some(id) == fault))
    }

    /// Header blocks, pulling the whole Header. Blocks claimed by an opaque
    /// hook are returned as their placeholders.
    pub fn header_blocks(&mut self) -> Result<Vec<NodeId>, BuildError> {
        let Some(header) = self.header()? else {
            return Ok(Vec::new());
        };
        let children = self.children(header)?;
        Ok(children
            .into_iter()
            .filter(|&id| self.is_header_block(id))
            .collect())
    }

    fn is_header_block(&self, id: NodeId) -> bool {
        let node = self.builder.arena.get(id);
        match &node.kind {
            NodeKind::Element(element) => element.role == ElementRole::HeaderBlock,
            NodeKind::Opaque(_) => {
                node.parent.is_some() && node.parent == self.state().and_then(|s| s.header)
            }
            _ => false,
        }
    }

    /// Processing attributes of a header block; `None` for any other node.
    pub fn header_block(&self, id: NodeId) -> Option<HeaderBlockInfo> {
        let version = self.state()?.version?;
        if !self.is_header_block(id) {
            return None;
        }
        Some(HeaderBlockInfo::from_attributes(self.attributes(id), version))
    }
}
