//! quick-xml backed token source.
//!
//! quick-xml never expands external entities, so a hostile DOCTYPE cannot
//! pull content from outside the message.

use crate::error::BuildError;
use crate::token::{Attribute, EventKind, NamespaceDecl, QualifiedName, Token, TokenSource};
use quick_xml::events::{BytesStart, Event};
use quick_xml::name::{Namespace, PrefixDeclaration, ResolveResult};
use quick_xml::NsReader;
use std::io::BufRead;

/// Pull parser over any buffered byte stream.
///
/// Self-closing elements are reported as a Start followed by an End, and the
/// XML declaration is skipped.
pub struct XmlTokenSource<R> {
    reader: NsReader<R>,
    buf: Vec<u8>,
    current: Token,
    /// End event owed for a self-closing element
    pending_end: Option<Token>,
    position: u64,
}

impl<'a> XmlTokenSource<&'a [u8]> {
    pub fn from_text(xml: &'a str) -> Self {
        Self::from_reader(xml.as_bytes())
    }

    pub fn from_bytes(xml: &'a [u8]) -> Self {
        Self::from_reader(xml)
    }
}

impl<R: BufRead> XmlTokenSource<R> {
    pub fn from_reader(reader: R) -> Self {
        Self {
            reader: NsReader::from_reader(reader),
            buf: Vec::new(),
            current: Token::start_of_stream(),
            pending_end: None,
            position: 0,
        }
    }

    fn read_token(&mut self) -> Result<Token, BuildError> {
        if let Some(end) = self.pending_end.take() {
            return Ok(end);
        }
        loop {
            self.buf.clear();
            let offset = self.reader.buffer_position() as u64;
            let (resolved, event) = self.reader.read_resolved_event_into(&mut self.buf)?;
            let namespace = resolve(resolved, offset)?;

            let token = match event {
                Event::Start(e) => start_token(&self.reader, &e, namespace, offset)?,
                Event::Empty(e) => {
                    let start = start_token(&self.reader, &e, namespace, offset)?;
                    self.pending_end = Some(Token::end(start.name.clone()));
                    start
                }
                Event::End(e) => Token::end(QualifiedName {
                    local_name: decode(e.local_name().as_ref()),
                    namespace,
                    prefix: e.name().prefix().map(|p| decode(p.as_ref())),
                }),
                Event::Text(e) => Token::text(e.unescape()?.into_owned()),
                Event::CData(e) => Token::cdata(decode(&e)),
                Event::Comment(e) => Token::comment(decode(&e)),
                Event::PI(e) => Token::processing_instruction(
                    decode(e.target()),
                    decode(e.content()).trim().to_string(),
                ),
                Event::DocType(e) => Token::doctype(decode(&e).trim().to_string()),
                Event::Decl(_) => continue,
                Event::Eof => Token::end_of_stream(),
            };
            return Ok(token);
        }
    }
}

impl<R: BufRead> TokenSource for XmlTokenSource<R> {
    fn current(&self) -> &Token {
        &self.current
    }

    fn advance(&mut self) -> Result<EventKind, BuildError> {
        if self.current.kind == EventKind::EndOfStream {
            return Ok(EventKind::EndOfStream);
        }
        self.current = self.read_token()?;
        self.position += 1;
        Ok(self.current.kind)
    }

    fn position(&self) -> u64 {
        self.position
    }
}

fn decode(bytes: &[u8]) -> String {
    String::from_utf8_lossy(bytes).into_owned()
}

fn resolve(resolved: ResolveResult<'_>, offset: u64) -> Result<Option<String>, BuildError> {
    match resolved {
        ResolveResult::Bound(Namespace(uri)) => Ok(Some(decode(uri))),
        ResolveResult::Unbound => Ok(None),
        ResolveResult::Unknown(prefix) => Err(BuildError::stream(format!(
            "unbound namespace prefix '{}' near byte {}",
            decode(&prefix),
            offset
        ))),
    }
}

fn start_token<R>(
    reader: &NsReader<R>,
    e: &BytesStart<'_>,
    namespace: Option<String>,
    offset: u64,
) -> Result<Token, BuildError> {
    let mut token = Token::start(QualifiedName {
        local_name: decode(e.local_name().as_ref()),
        namespace,
        prefix: e.name().prefix().map(|p| decode(p.as_ref())),
    });

    for attr in e.attributes() {
        let attr = attr
            .map_err(|err| BuildError::stream(format!("malformed attribute near byte {offset}: {err}")))?;
        let value = attr.unescape_value()?.into_owned();

        if let Some(binding) = attr.key.as_namespace_binding() {
            let prefix = match binding {
                PrefixDeclaration::Default => None,
                PrefixDeclaration::Named(prefix) => Some(decode(prefix)),
            };
            token.namespaces.push(NamespaceDecl { prefix, uri: value });
            continue;
        }

        let (resolved, local) = reader.resolve_attribute(attr.key);
        let name = QualifiedName {
            local_name: decode(local.as_ref()),
            namespace: resolve(resolved, offset)?,
            prefix: attr.key.prefix().map(|p| decode(p.as_ref())),
        };
        token.attributes.push(Attribute::new(name, value));
    }

    Ok(token)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::SOAP_11_NS;

    fn drain(xml: &str) -> Vec<Token> {
        let mut source = XmlTokenSource::from_text(xml);
        let mut tokens = Vec::new();
        while source.advance().unwrap() != EventKind::EndOfStream {
            tokens.push(source.current().clone());
        }
        tokens
    }

    #[test]
    fn test_resolves_element_namespaces() {
        let tokens = drain(
            r#"<?xml version="1.0"?><soap:Envelope xmlns:soap="http://schemas.xmlsoap.org/soap/envelope/"><soap:Body/></soap:Envelope>"#,
        );
        assert_eq!(tokens.len(), 4);
        assert_eq!(tokens[0].kind, EventKind::Start);
        assert_eq!(tokens[0].name.local_name, "Envelope");
        assert_eq!(tokens[0].name.prefix.as_deref(), Some("soap"));
        assert_eq!(tokens[0].name.namespace.as_deref(), Some(SOAP_11_NS));
        assert_eq!(tokens[0].namespaces.len(), 1);
        assert!(tokens[0].attributes.is_empty());

        // Self-closing Body becomes Start + End.
        assert_eq!(tokens[1].kind, EventKind::Start);
        assert_eq!(tokens[2].kind, EventKind::End);
        assert_eq!(tokens[2].name.local_name, "Body");
        assert_eq!(tokens[3].kind, EventKind::End);
    }

    #[test]
    fn test_attributes_and_default_namespace() {
        let tokens = drain(r#"<a xmlns="urn:a" xmlns:p="urn:p" p:x="1" y="&amp;2"><b/></a>"#);
        let a = &tokens[0];
        assert_eq!(a.name.namespace.as_deref(), Some("urn:a"));
        assert_eq!(a.namespaces.len(), 2);
        assert_eq!(a.attributes.len(), 2);
        assert_eq!(a.attributes[0].name.namespace.as_deref(), Some("urn:p"));
        assert_eq!(a.attributes[0].value, "1");
        // Unprefixed attributes are never in the default namespace.
        assert_eq!(a.attributes[1].name.namespace, None);
        assert_eq!(a.attributes[1].value, "&2");
        assert_eq!(tokens[1].name.namespace.as_deref(), Some("urn:a"));
    }

    #[test]
    fn test_text_comment_pi_cdata() {
        let tokens = drain("<!--c--><?target some data?><r>x &lt; y<![CDATA[<raw>]]></r>");
        assert_eq!(tokens[0].kind, EventKind::Comment);
        assert_eq!(tokens[0].text, "c");
        assert_eq!(tokens[1].kind, EventKind::ProcessingInstruction);
        assert_eq!(tokens[1].name.local_name, "target");
        assert_eq!(tokens[1].text, "some data");
        assert_eq!(tokens[3].kind, EventKind::Text);
        assert_eq!(tokens[3].text, "x < y");
        assert_eq!(tokens[4].kind, EventKind::CData);
        assert_eq!(tokens[4].text, "<raw>");
    }

    #[test]
    fn test_doctype_reported() {
        let tokens = drain("<!DOCTYPE r><r/>");
        assert_eq!(tokens[0].kind, EventKind::DocType);
        assert_eq!(tokens[0].text, "r");
    }

    #[test]
    fn test_malformed_stream() {
        let mut source = XmlTokenSource::from_text("<a><b></a>");
        let mut result = Ok(EventKind::StartOfStream);
        for _ in 0..4 {
            result = source.advance();
            if result.is_err() {
                break;
            }
        }
        assert!(matches!(result, Err(BuildError::Stream(_))));
    }

    #[test]
    fn test_unbound_prefix() {
        let mut source = XmlTokenSource::from_text("<x:a/>");
        assert!(matches!(source.advance(), Err(BuildError::Stream(_))));
    }
}
