//! The forward-only token stream the builder consumes.
//!
//! A [`TokenSource`] is positioned on exactly one event at a time and only
//! ever moves forward. The builder owns its source exclusively.

use crate::error::BuildError;
use std::collections::VecDeque;
use std::fmt;

/// Kind of the event a source is positioned on.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum EventKind {
    /// Before the first `advance`
    StartOfStream,
    Start,
    End,
    Text,
    CData,
    Comment,
    ProcessingInstruction,
    DocType,
    EndOfStream,
}

/// Element or attribute name.
#[derive(Debug, Clone, Default, PartialEq, Eq, Hash)]
pub struct QualifiedName {
    pub local_name: String,
    pub namespace: Option<String>,
    pub prefix: Option<String>,
}

impl QualifiedName {
    pub fn new(local_name: impl Into<String>) -> Self {
        Self {
            local_name: local_name.into(),
            namespace: None,
            prefix: None,
        }
    }

    pub fn with_namespace(mut self, namespace: impl Into<String>) -> Self {
        self.namespace = Some(namespace.into());
        self
    }

    pub fn with_prefix(mut self, prefix: impl Into<String>) -> Self {
        self.prefix = Some(prefix.into());
        self
    }

    pub fn is(&self, namespace: Option<&str>, local_name: &str) -> bool {
        self.local_name == local_name && self.namespace.as_deref() == namespace
    }
}

impl fmt::Display for QualifiedName {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match &self.prefix {
            Some(prefix) if !prefix.is_empty() => write!(f, "{}:{}", prefix, self.local_name),
            _ => f.write_str(&self.local_name),
        }
    }
}

/// An attribute as reported by the source (namespace declarations excluded).
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Attribute {
    pub name: QualifiedName,
    pub value: String,
}

impl Attribute {
    pub fn new(name: QualifiedName, value: impl Into<String>) -> Self {
        Self {
            name,
            value: value.into(),
        }
    }
}

/// A namespace binding declared on an element. `prefix: None` is the default namespace.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct NamespaceDecl {
    pub prefix: Option<String>,
    pub uri: String,
}

/// Owned snapshot of one event.
///
/// `name` is set for `Start`/`End`, and holds the target of a processing
/// instruction. `text` holds character data, comment text, PI data or the
/// doctype body.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Token {
    pub kind: EventKind,
    pub name: QualifiedName,
    pub attributes: Vec<Attribute>,
    pub namespaces: Vec<NamespaceDecl>,
    pub text: String,
}

impl Token {
    fn of(kind: EventKind) -> Self {
        Self {
            kind,
            name: QualifiedName::default(),
            attributes: Vec::new(),
            namespaces: Vec::new(),
            text: String::new(),
        }
    }

    pub fn start_of_stream() -> Self {
        Self::of(EventKind::StartOfStream)
    }

    pub fn end_of_stream() -> Self {
        Self::of(EventKind::EndOfStream)
    }

    pub fn start(name: QualifiedName) -> Self {
        Self {
            name,
            ..Self::of(EventKind::Start)
        }
    }

    pub fn end(name: QualifiedName) -> Self {
        Self {
            name,
            ..Self::of(EventKind::End)
        }
    }

    pub fn text(text: impl Into<String>) -> Self {
        Self {
            text: text.into(),
            ..Self::of(EventKind::Text)
        }
    }

    pub fn cdata(text: impl Into<String>) -> Self {
        Self {
            text: text.into(),
            ..Self::of(EventKind::CData)
        }
    }

    pub fn comment(text: impl Into<String>) -> Self {
        Self {
            text: text.into(),
            ..Self::of(EventKind::Comment)
        }
    }

    pub fn processing_instruction(target: impl Into<String>, data: impl Into<String>) -> Self {
        Self {
            name: QualifiedName::new(target),
            text: data.into(),
            ..Self::of(EventKind::ProcessingInstruction)
        }
    }

    pub fn doctype(text: impl Into<String>) -> Self {
        Self {
            text: text.into(),
            ..Self::of(EventKind::DocType)
        }
    }

    pub fn with_attribute(mut self, name: QualifiedName, value: impl Into<String>) -> Self {
        self.attributes.push(Attribute::new(name, value));
        self
    }

    pub fn declare(mut self, prefix: Option<&str>, uri: impl Into<String>) -> Self {
        self.namespaces.push(NamespaceDecl {
            prefix: prefix.map(str::to_string),
            uri: uri.into(),
        });
        self
    }
}

/// Forward-only pull source of XML events.
///
/// Implementations never rewind. `position` counts the events consumed so far
/// and is what callers compare to prove that a read did not touch the stream.
pub trait TokenSource {
    /// The event the source is currently positioned on.
    fn current(&self) -> &Token;

    /// Move to the next event.
    fn advance(&mut self) -> Result<EventKind, BuildError>;

    /// Number of events consumed.
    fn position(&self) -> u64;

    fn event_kind(&self) -> EventKind {
        self.current().kind
    }

    fn local_name(&self) -> &str {
        &self.current().name.local_name
    }

    fn namespace_uri(&self) -> Option<&str> {
        self.current().name.namespace.as_deref()
    }

    fn prefix(&self) -> Option<&str> {
        self.current().name.prefix.as_deref()
    }

    fn attributes(&self) -> &[Attribute] {
        &self.current().attributes
    }

    fn declared_namespaces(&self) -> &[NamespaceDecl] {
        &self.current().namespaces
    }

    fn text_value(&self) -> &str {
        &self.current().text
    }
}

/// Replays a recorded sequence of tokens.
#[derive(Debug, Clone)]
pub struct ReplaySource {
    pending: VecDeque<Token>,
    current: Token,
    position: u64,
}

impl ReplaySource {
    pub fn new(tokens: impl IntoIterator<Item = Token>) -> Self {
        Self {
            pending: tokens.into_iter().collect(),
            current: Token::start_of_stream(),
            position: 0,
        }
    }

    /// Tokens not consumed yet.
    pub fn remaining(&self) -> usize {
        self.pending.len()
    }
}

impl TokenSource for ReplaySource {
    fn current(&self) -> &Token {
        &self.current
    }

    fn advance(&mut self) -> Result<EventKind, BuildError> {
        if self.current.kind == EventKind::EndOfStream {
            return Ok(EventKind::EndOfStream);
        }
        self.current = self.pending.pop_front().unwrap_or_else(Token::end_of_stream);
        self.position += 1;
        Ok(self.current.kind)
    }

    fn position(&self) -> u64 {
        self.position
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_replay_source_moves_forward() {
        let mut source = ReplaySource::new(vec![
            Token::start(QualifiedName::new("a")).declare(None, "urn:a"),
            Token::text("hi"),
            Token::end(QualifiedName::new("a")),
        ]);
        assert_eq!(source.event_kind(), EventKind::StartOfStream);
        assert_eq!(source.advance().unwrap(), EventKind::Start);
        assert_eq!(source.local_name(), "a");
        assert_eq!(source.declared_namespaces()[0].uri, "urn:a");
        assert_eq!(source.advance().unwrap(), EventKind::Text);
        assert_eq!(source.text_value(), "hi");
        assert_eq!(source.advance().unwrap(), EventKind::End);
        assert_eq!(source.advance().unwrap(), EventKind::EndOfStream);
        assert_eq!(source.position(), 4);

        // Stays at the end without counting further.
        assert_eq!(source.advance().unwrap(), EventKind::EndOfStream);
        assert_eq!(source.position(), 4);
        assert_eq!(source.remaining(), 0);
    }

    #[test]
    fn test_qualified_name_display() {
        let name = QualifiedName::new("Envelope")
            .with_prefix("soap")
            .with_namespace("urn:x");
        assert_eq!(name.to_string(), "soap:Envelope");
        assert!(name.is(Some("urn:x"), "Envelope"));
        assert_eq!(QualifiedName::new("Body").to_string(), "Body");
    }
}
