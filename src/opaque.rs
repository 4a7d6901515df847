//! Opaque subtree hooks.
//!
//! A hook sees the token source positioned on a Start event and may consume
//! the whole element, returning a [`Placeholder`] that stands in for it in the
//! node graph. Hooks that decline must return `Ok(None)` without advancing.

use crate::config::{ElementKey, OpaqueConfig};
use crate::error::BuildError;
use crate::node::NodeId;
use crate::token::{Attribute, EventKind, QualifiedName, ReplaySource, Token, TokenSource};
use std::fmt;
use tracing::debug;

/// Where an opaque hook is being offered an element.
#[derive(Debug, Clone, Copy)]
pub struct OpaqueContext {
    /// Node the placeholder will be attached under
    pub parent: NodeId,
    /// Depth of the offered element (document element = 1)
    pub depth: u32,
}

/// Content held by a placeholder.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum OpaquePayload {
    /// The element's own token stream, start to end inclusive
    Captured(Vec<Token>),
    /// Raw bytes produced by the hook
    Raw(Vec<u8>),
    /// Key into some external store or decoder
    External(String),
}

/// Single complete node standing in for a whole subtree.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Placeholder {
    pub name: QualifiedName,
    pub attributes: Vec<Attribute>,
    pub payload: OpaquePayload,
}

impl Placeholder {
    /// Re-expose a captured fragment as a fresh token source.
    pub fn replay(&self) -> Option<ReplaySource> {
        match &self.payload {
            OpaquePayload::Captured(tokens) => Some(ReplaySource::new(tokens.iter().cloned())),
            _ => None,
        }
    }
}

pub trait OpaqueSubtreeBuilder {
    /// Consume the element `source` is positioned on, leaving the source on
    /// its matching End event, or decline with `Ok(None)`.
    fn build(
        &self,
        source: &mut dyn TokenSource,
        context: OpaqueContext,
    ) -> Result<Option<Placeholder>, BuildError>;
}

impl<F> OpaqueSubtreeBuilder for F
where
    F: Fn(&mut dyn TokenSource, OpaqueContext) -> Result<Option<Placeholder>, BuildError>,
{
    fn build(
        &self,
        source: &mut dyn TokenSource,
        context: OpaqueContext,
    ) -> Result<Option<Placeholder>, BuildError> {
        self(source, context)
    }
}

/// Records the element's tokens verbatim.
#[derive(Debug, Clone, Copy, Default)]
pub struct CaptureBuilder;

impl OpaqueSubtreeBuilder for CaptureBuilder {
    fn build(
        &self,
        source: &mut dyn TokenSource,
        _context: OpaqueContext,
    ) -> Result<Option<Placeholder>, BuildError> {
        let start = source.current().clone();
        let mut tokens = vec![start.clone()];
        let mut open = 1u32;
        while open > 0 {
            match source.advance()? {
                EventKind::Start => open += 1,
                EventKind::End => open -= 1,
                EventKind::EndOfStream => {
                    return Err(BuildError::stream(format!(
                        "stream ended inside opaque element {}",
                        start.name
                    )))
                }
                _ => {}
            }
            tokens.push(source.current().clone());
        }
        Ok(Some(Placeholder {
            name: start.name,
            attributes: start.attributes,
            payload: OpaquePayload::Captured(tokens),
        }))
    }
}

/// Registered hooks: one payload slot plus name-keyed entries.
#[derive(Default)]
pub struct OpaqueRegistry {
    payload: Option<Box<dyn OpaqueSubtreeBuilder>>,
    by_name: Vec<(ElementKey, Box<dyn OpaqueSubtreeBuilder>)>,
    max_depth: u32,
}

impl OpaqueRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    /// Register capture hooks as described by configuration.
    pub fn from_config(config: &OpaqueConfig) -> Self {
        let mut registry = Self::new();
        if config.capture_payload {
            registry.register_payload(Box::new(CaptureBuilder));
        }
        for key in &config.capture {
            registry.register(key.clone(), config.max_depth, Box::new(CaptureBuilder));
        }
        registry
    }

    /// Register a hook for one element name, usable down to `max_depth`
    /// (document element = 1). Returns the hook it replaced.
    pub fn register(
        &mut self,
        key: ElementKey,
        max_depth: u32,
        builder: Box<dyn OpaqueSubtreeBuilder>,
    ) -> Option<Box<dyn OpaqueSubtreeBuilder>> {
        self.max_depth = self.max_depth.max(max_depth);
        debug!(element = %key.local_name, max_depth, "Registering opaque subtree builder");
        if let Some(entry) = self.by_name.iter_mut().find(|(k, _)| *k == key) {
            return Some(std::mem::replace(&mut entry.1, builder));
        }
        self.by_name.push((key, builder));
        None
    }

    /// Register the hook offered the payload element. Returns the one it replaced.
    pub fn register_payload(
        &mut self,
        builder: Box<dyn OpaqueSubtreeBuilder>,
    ) -> Option<Box<dyn OpaqueSubtreeBuilder>> {
        self.payload.replace(builder)
    }

    pub fn payload(&self) -> Option<&dyn OpaqueSubtreeBuilder> {
        self.payload.as_deref()
    }

    pub fn lookup(
        &self,
        namespace: Option<&str>,
        local_name: &str,
        depth: u32,
    ) -> Option<&dyn OpaqueSubtreeBuilder> {
        if depth > self.max_depth {
            return None;
        }
        self.by_name
            .iter()
            .find(|(key, _)| key.matches(namespace, local_name))
            .map(|(_, builder)| builder.as_ref())
    }

    pub fn max_depth(&self) -> u32 {
        self.max_depth
    }

    pub fn is_empty(&self) -> bool {
        self.payload.is_none() && self.by_name.is_empty()
    }
}

impl fmt::Debug for OpaqueRegistry {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("OpaqueRegistry")
            .field("payload", &self.payload.is_some())
            .field("names", &self.by_name.iter().map(|(k, _)| k).collect::<Vec<_>>())
            .field("max_depth", &self.max_depth)
            .finish()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn q(name: &str) -> QualifiedName {
        QualifiedName::new(name)
    }

    fn context() -> OpaqueContext {
        OpaqueContext {
            parent: crate::node::Arena::new().alloc(crate::node::NodeKind::Document, false),
            depth: 1,
        }
    }

    #[test]
    fn test_capture_stops_at_matching_end() {
        let mut source = ReplaySource::new(vec![
            Token::start(q("blob")),
            Token::start(q("blob")),
            Token::text("x"),
            Token::end(q("blob")),
            Token::end(q("blob")),
            Token::start(q("after")),
        ]);
        source.advance().unwrap();

        let placeholder = CaptureBuilder.build(&mut source, context()).unwrap().unwrap();
        assert_eq!(placeholder.name.local_name, "blob");
        assert_eq!(source.event_kind(), EventKind::End);
        assert_eq!(source.position(), 5);
        assert_eq!(source.remaining(), 1);

        let mut replay = placeholder.replay().unwrap();
        assert_eq!(replay.advance().unwrap(), EventKind::Start);
        match placeholder.payload {
            OpaquePayload::Captured(tokens) => assert_eq!(tokens.len(), 5),
            other => panic!("unexpected payload {other:?}"),
        }
    }

    #[test]
    fn test_capture_rejects_truncated_stream() {
        let mut source = ReplaySource::new(vec![Token::start(q("blob")), Token::text("x")]);
        source.advance().unwrap();
        let result = CaptureBuilder.build(&mut source, context());
        assert!(matches!(result, Err(BuildError::Stream(_))));
    }

    #[test]
    fn test_registry_lookup_and_depth() {
        let mut registry = OpaqueRegistry::new();
        assert!(registry.is_empty());
        let previous = registry.register(
            ElementKey::new(Some("urn:x"), "Data"),
            3,
            Box::new(CaptureBuilder),
        );
        assert!(previous.is_none());
        let previous = registry.register(
            ElementKey::new(Some("urn:x"), "Data"),
            2,
            Box::new(CaptureBuilder),
        );
        assert!(previous.is_some());
        assert_eq!(registry.max_depth(), 3);

        assert!(registry.lookup(Some("urn:x"), "Data", 3).is_some());
        assert!(registry.lookup(Some("urn:x"), "Data", 4).is_none());
        assert!(registry.lookup(None, "Data", 1).is_none());
        assert!(registry.payload().is_none());
    }

    #[test]
    fn test_registry_from_config() {
        let config = OpaqueConfig {
            max_depth: 5,
            capture_payload: true,
            capture: vec![ElementKey::new(None, "Blob")],
        };
        let registry = OpaqueRegistry::from_config(&config);
        assert!(registry.payload().is_some());
        assert!(registry.lookup(None, "Blob", 5).is_some());
    }
}
