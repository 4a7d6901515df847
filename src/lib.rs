//! Lazy SOAP object model builder for Zentinel
//!
//! Turns a forward-only stream of XML events into an in-memory tree, building
//! only as much of the tree as callers actually navigate.
//!
//! # Features
//!
//! - Pull-driven building: navigation consumes events on demand
//! - SOAP 1.1 and 1.2 envelope grammar with version detection and pinning
//! - Per-version Fault grammar (flat 1.1, nested 1.2)
//! - Opaque subtree hooks that keep payloads out of the tree
//! - Partial trees stay readable after a fatal error
//!
//! # Example
//!
//! ```
//! use zentinel_soap_model::Document;
//!
//! let xml = r#"<s:Envelope xmlns:s="http://www.w3.org/2003/05/soap-envelope">
//!   <s:Body><m:Ping xmlns:m="urn:example"/></s:Body>
//! </s:Envelope>"#;
//!
//! let mut doc = Document::parse_soap(xml);
//! let body = doc.body()?.expect("envelope has a body");
//! let payload = doc.first_element(body)?.expect("body has a payload");
//! assert_eq!(doc.element(payload).unwrap().name.local_name, "Ping");
//! # Ok::<(), zentinel_soap_model::BuildError>(())
//! ```

mod builder;
pub mod config;
pub mod document;
pub mod envelope;
pub mod error;
mod fault;
pub mod node;
pub mod opaque;
pub mod parser;
pub mod token;

pub use config::{BuilderConfig, ElementKey, SoapVersion, SOAP_11_NS, SOAP_12_NS};
pub use document::Document;
pub use envelope::{HeaderBlockInfo, SOAP11_POST_BODY_NAMESPACE_TOLERANCE};
pub use error::{BuildError, FaultCode};
pub use node::{ElementRole, NodeId, NodeKind};
pub use opaque::{CaptureBuilder, OpaqueContext, OpaquePayload, OpaqueRegistry, OpaqueSubtreeBuilder, Placeholder};
pub use parser::XmlTokenSource;
pub use token::{EventKind, QualifiedName, ReplaySource, Token, TokenSource};
