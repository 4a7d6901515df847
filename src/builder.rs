//! Pull-driven tree builder.
//!
//! Each call to [`Builder::advance`] consumes exactly one event from the token
//! source and applies it to the arena. The cursor is the last node touched:
//! while it is an open element new nodes become its children, once it is
//! complete new nodes become its following siblings.

use crate::config::{BuilderConfig, SettingsConfig};
use crate::envelope::EnvelopeState;
use crate::error::BuildError;
use crate::node::{Arena, ElementData, ElementRole, NodeId, NodeKind};
use crate::opaque::{OpaqueContext, OpaqueRegistry, Placeholder};
use crate::token::{Attribute, EventKind, NamespaceDecl, QualifiedName, TokenSource};
use tracing::{debug, trace, warn};

pub(crate) const XML_NS: &str = "http://www.w3.org/XML/1998/namespace";

/// Which grammar the builder enforces. Chosen once, at construction.
#[derive(Debug)]
pub(crate) enum Mode {
    /// Any well-formed XML
    Plain,
    /// SOAP envelope, with fault sub-grammar
    Envelope(EnvelopeState),
}

pub(crate) struct Builder<S> {
    source: Option<S>,
    pub(crate) arena: Arena,
    pub(crate) document: NodeId,
    pub(crate) root: Option<NodeId>,
    cursor: Option<NodeId>,
    depth: u32,
    done: bool,
    poisoned: bool,
    last_position: u64,
    pub(crate) mode: Mode,
    pub(crate) opaque: OpaqueRegistry,
    settings: SettingsConfig,
}

impl<S: TokenSource> Builder<S> {
    pub(crate) fn new(source: S, mode: Mode, config: &BuilderConfig) -> Self {
        let mut arena = Arena::new();
        let document = arena.alloc(NodeKind::Document, false);
        Self {
            last_position: source.position(),
            source: Some(source),
            arena,
            document,
            root: None,
            cursor: None,
            depth: 0,
            done: false,
            poisoned: false,
            mode,
            opaque: OpaqueRegistry::from_config(&config.opaque),
            settings: config.settings.clone(),
        }
    }

    pub(crate) fn depth(&self) -> u32 {
        self.depth
    }

    pub(crate) fn is_done(&self) -> bool {
        self.done
    }

    pub(crate) fn is_poisoned(&self) -> bool {
        self.poisoned
    }

    pub(crate) fn position(&self) -> u64 {
        self.source
            .as_ref()
            .map(|s| s.position())
            .unwrap_or(self.last_position)
    }

    /// Release the token source. Whatever is not built yet stays unbuilt.
    pub(crate) fn close(&mut self) {
        self.release();
        self.done = true;
    }

    fn release(&mut self) {
        if let Some(source) = self.source.take() {
            self.last_position = source.position();
        }
    }

    /// Unlink a complete node, moving the cursor off it if needed.
    pub(crate) fn detach(&mut self, id: NodeId) -> Result<(), BuildError> {
        let node = self.arena.get(id);
        let fallback = node.previous_sibling.or(node.parent);
        self.arena.detach(id)?;
        if self.cursor == Some(id) {
            self.cursor = fallback;
        }
        if let Mode::Envelope(state) = &mut self.mode {
            state.forget(id);
        }
        Ok(())
    }

    /// Pull and apply one event.
    pub(crate) fn advance(&mut self) -> Result<EventKind, BuildError> {
        if self.poisoned {
            return Err(BuildError::Aborted);
        }
        if self.done {
            return Ok(EventKind::EndOfStream);
        }
        match self.step() {
            Ok(kind) => Ok(kind),
            Err(e) => {
                warn!(error = %e, depth = self.depth, "Document build failed");
                self.poisoned = true;
                self.release();
                Err(e)
            }
        }
    }

    /// Advance until `satisfied` holds or the stream is exhausted.
    pub(crate) fn ensure(&mut self, satisfied: impl Fn(&Self) -> bool) -> Result<(), BuildError> {
        while !satisfied(self) {
            if self.done {
                return Ok(());
            }
            self.advance()?;
        }
        Ok(())
    }

    fn source(&self) -> Result<&S, BuildError> {
        self.source.as_ref().ok_or(BuildError::Aborted)
    }

    fn step(&mut self) -> Result<EventKind, BuildError> {
        let kind = self
            .source
            .as_mut()
            .ok_or(BuildError::Aborted)?
            .advance()?;
        match kind {
            EventKind::Start => self.start_element()?,
            EventKind::End => self.end_element()?,
            EventKind::Text => self.text(false)?,
            EventKind::CData => self.text(true)?,
            EventKind::Comment => self.comment()?,
            EventKind::ProcessingInstruction => self.processing_instruction()?,
            EventKind::DocType => self.doctype()?,
            EventKind::EndOfStream => self.end_of_stream()?,
            EventKind::StartOfStream => {}
        }
        Ok(kind)
    }

    /// Container the next node is linked under.
    fn attach_parent(&self) -> NodeId {
        match self.cursor {
            None => self.document,
            Some(cursor) => {
                let node = self.arena.get(cursor);
                if node.complete {
                    node.parent.unwrap_or(self.document)
                } else {
                    cursor
                }
            }
        }
    }

    fn link(&mut self, parent: NodeId, id: NodeId) {
        self.arena.append_child(parent, id);
        self.cursor = Some(id);
    }

    fn start_element(&mut self) -> Result<(), BuildError> {
        self.depth += 1;
        if self.settings.max_depth != 0 && self.depth > self.settings.max_depth {
            return Err(BuildError::structural(format!(
                "element nesting depth {} exceeds maximum {}",
                self.depth, self.settings.max_depth
            )));
        }
        let parent = self.attach_parent();
        let (name, namespaces, attributes) = self.resolved_start(parent)?;

        if let Some(mut placeholder) = self.try_opaque(parent, &name)? {
            // The placeholder carries the name the hook was matched under.
            placeholder.name = name;
            placeholder.attributes = attributes;
            let id = self.arena.alloc(NodeKind::Opaque(placeholder), true);
            if parent == self.document {
                self.check_single_root()?;
                self.root = Some(id);
            }
            if let Mode::Envelope(state) = &mut self.mode {
                state.on_linked(parent);
            }
            self.link(parent, id);
            // The hook consumed the element's End event as well.
            self.depth -= 1;
            return Ok(());
        }

        if parent == self.document {
            self.check_single_root()?;
        }
        let role = match &mut self.mode {
            Mode::Plain => ElementRole::Plain,
            Mode::Envelope(state) => state.on_start(parent, self.depth, &name, &attributes)?,
        };

        trace!(element = %name, depth = self.depth, role = role.as_str(), "Building element");
        let id = self.arena.alloc(
            NodeKind::Element(ElementData {
                name,
                namespaces,
                attributes,
                role,
            }),
            false,
        );
        if parent == self.document {
            self.root = Some(id);
        }
        if let Mode::Envelope(state) = &mut self.mode {
            state.record(id, role);
            state.on_linked(parent);
        }
        self.link(parent, id);
        Ok(())
    }

    fn check_single_root(&self) -> Result<(), BuildError> {
        match self.root {
            Some(_) => Err(BuildError::structural(
                "document has more than one root element",
            )),
            None => Ok(()),
        }
    }

    /// Copy the start event off the source, filling in namespaces the source
    /// left unresolved from the bindings in scope.
    fn resolved_start(
        &self,
        parent: NodeId,
    ) -> Result<(QualifiedName, Vec<NamespaceDecl>, Vec<Attribute>), BuildError> {
        let token = self.source()?.current();
        let namespaces = token.namespaces.clone();
        let lookup = |prefix: Option<&str>| -> Option<String> {
            if prefix == Some("xml") {
                return Some(XML_NS.to_string());
            }
            match namespaces.iter().find(|d| d.prefix.as_deref() == prefix) {
                Some(decl) if decl.uri.is_empty() => None,
                Some(decl) => Some(decl.uri.clone()),
                None => self.arena.lookup_namespace(parent, prefix).map(str::to_string),
            }
        };

        let mut name = token.name.clone();
        if name.namespace.is_none() {
            name.namespace = lookup(name.prefix.as_deref());
            if name.namespace.is_none() && name.prefix.is_some() {
                return Err(BuildError::stream(format!(
                    "unbound namespace prefix in element {name}"
                )));
            }
        }

        let mut attributes = token.attributes.clone();
        for attr in &mut attributes {
            // Unprefixed attributes never take the default namespace.
            if attr.name.namespace.is_none() && attr.name.prefix.is_some() {
                attr.name.namespace = lookup(attr.name.prefix.as_deref());
                if attr.name.namespace.is_none() {
                    return Err(BuildError::stream(format!(
                        "unbound namespace prefix in attribute {} of {name}",
                        attr.name
                    )));
                }
            }
        }
        Ok((name, namespaces, attributes))
    }

    fn try_opaque(
        &mut self,
        parent: NodeId,
        name: &QualifiedName,
    ) -> Result<Option<Placeholder>, BuildError> {
        if self.opaque.is_empty() {
            return Ok(None);
        }
        let depth = self.depth;
        let (payload_position, named_allowed) = match &self.mode {
            Mode::Plain => (depth == 1, true),
            Mode::Envelope(state) => (
                state.is_payload_position(parent, depth),
                state.accepts_opaque(depth),
            ),
        };
        let context = OpaqueContext { parent, depth };
        let source: &mut dyn TokenSource = self.source.as_mut().ok_or(BuildError::Aborted)?;

        if payload_position {
            if let Some(hook) = self.opaque.payload() {
                if let Some(placeholder) = hook.build(source, context)? {
                    debug!(element = %name, depth, "Payload captured by opaque builder");
                    return Ok(Some(placeholder));
                }
            }
        }
        if named_allowed {
            if let Some(hook) = self
                .opaque
                .lookup(name.namespace.as_deref(), &name.local_name, depth)
            {
                if let Some(placeholder) = hook.build(source, context)? {
                    debug!(element = %name, depth, "Element captured by opaque builder");
                    return Ok(Some(placeholder));
                }
            }
        }
        Ok(None)
    }

    fn end_element(&mut self) -> Result<(), BuildError> {
        let token_name = self.source()?.local_name().to_string();
        if self.depth == 0 {
            return Err(BuildError::stream(format!(
                "end tag </{token_name}> has no matching start tag"
            )));
        }
        let closing = match self.cursor {
            Some(cursor) if self.arena.get(cursor).complete => self.arena.get(cursor).parent,
            other => other,
        };
        let closing = match closing {
            Some(id) if id != self.document => id,
            _ => {
                return Err(BuildError::stream(format!(
                    "end tag </{token_name}> has no open element"
                )))
            }
        };
        if let Some(element) = self.arena.element(closing) {
            if element.name.local_name != token_name {
                return Err(BuildError::stream(format!(
                    "end tag </{}> does not match start tag <{}>",
                    token_name, element.name
                )));
            }
        }

        if let Mode::Envelope(state) = &mut self.mode {
            state.on_end(&self.arena, closing, self.depth)?;
        }
        self.arena.get_mut(closing).complete = true;
        self.cursor = Some(closing);
        self.depth -= 1;
        Ok(())
    }

    fn text(&mut self, cdata: bool) -> Result<(), BuildError> {
        let value = self.source()?.text_value().to_string();
        let parent = self.attach_parent();
        let blank = value.trim().is_empty();
        if parent == self.document {
            // Whitespace between prolog items carries nothing.
            if blank {
                return Ok(());
            }
            return Err(BuildError::stream("text content outside the document element"));
        }
        if blank && !cdata && !self.settings.preserve_whitespace {
            return Ok(());
        }
        let id = self.arena.alloc(NodeKind::Text { value, cdata }, true);
        self.link(parent, id);
        Ok(())
    }

    fn comment(&mut self) -> Result<(), BuildError> {
        let value = self.source()?.text_value().to_string();
        let parent = self.attach_parent();
        let id = self.arena.alloc(NodeKind::Comment(value), true);
        self.link(parent, id);
        Ok(())
    }

    fn processing_instruction(&mut self) -> Result<(), BuildError> {
        if let Mode::Envelope(_) = self.mode {
            return Err(BuildError::structural(
                "SOAP message MUST NOT contain Processing Instructions",
            ));
        }
        let source = self.source()?;
        let target = source.local_name().to_string();
        let data = source.text_value().to_string();
        let parent = self.attach_parent();
        let id = self
            .arena
            .alloc(NodeKind::ProcessingInstruction { target, data }, true);
        self.link(parent, id);
        Ok(())
    }

    fn doctype(&mut self) -> Result<(), BuildError> {
        if let Mode::Envelope(_) = self.mode {
            return Err(BuildError::structural(
                "SOAP message MUST NOT contain a Document Type Declaration",
            ));
        }
        let parent = self.attach_parent();
        if parent != self.document || self.root.is_some() {
            return Err(BuildError::stream("DOCTYPE must precede the document element"));
        }
        let value = self.source()?.text_value().to_string();
        let id = self.arena.alloc(NodeKind::DocType(value), true);
        self.link(parent, id);
        Ok(())
    }

    fn end_of_stream(&mut self) -> Result<(), BuildError> {
        if self.depth != 0 {
            return Err(BuildError::stream(format!(
                "stream ended with {} element(s) still open",
                self.depth
            )));
        }
        if self.root.is_none() {
            return Err(BuildError::structural("document has no root element"));
        }
        self.arena.get_mut(self.document).complete = true;
        self.done = true;
        debug!(nodes = self.arena.len(), "Document fully built");
        Ok(())
    }
}
