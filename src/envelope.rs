//! SOAP envelope grammar.
//!
//! Layered over the generic builder: the builder still creates every node,
//! this state machine decides what each element is and rejects the ones the
//! envelope grammar does not allow. The version is detected from the
//! namespace of the document element and checked against an optional pin.

use crate::config::SoapVersion;
use crate::error::BuildError;
use crate::fault::FaultBuilder;
use crate::node::{Arena, ElementData, ElementRole, NodeId};
use crate::token::{Attribute, QualifiedName};
use tracing::debug;

/// SOAP 1.1 receivers historically accept non-envelope-namespace elements as
/// Envelope children once Body has been seen. The Header/Body name checks
/// still run for such elements.
pub const SOAP11_POST_BODY_NAMESPACE_TOLERANCE: bool = true;

/// Processing attributes of a header block.
#[derive(Debug, Clone, PartialEq, Eq, Default)]
pub struct HeaderBlockInfo {
    pub must_understand: bool,
    /// `actor` (1.1) or `role` (1.2)
    pub role: Option<String>,
    /// SOAP 1.2 only
    pub relay: bool,
}

impl HeaderBlockInfo {
    /// Read the envelope-namespace processing attributes of `element`.
    pub fn from_element(element: &ElementData, version: SoapVersion) -> Self {
        Self::from_attributes(&element.attributes, version)
    }

    /// Same as [`HeaderBlockInfo::from_element`], for a block that only kept
    /// its attributes (an opaque placeholder).
    pub fn from_attributes(attributes: &[Attribute], version: SoapVersion) -> Self {
        let ns = Some(version.namespace());
        let value = |name: &str| {
            attributes
                .iter()
                .find(|a| a.name.is(ns, name))
                .map(|a| a.value.trim())
        };
        let flag = |name: &str| value(name).map_or(false, |v| matches!(v, "1" | "true"));
        let role_attribute = match version {
            SoapVersion::Soap11 => "actor",
            SoapVersion::Soap12 => "role",
        };
        Self {
            must_understand: flag("mustUnderstand"),
            role: value(role_attribute).map(str::to_string),
            relay: version == SoapVersion::Soap12 && flag("relay"),
        }
    }
}

#[derive(Debug, Default)]
pub(crate) struct EnvelopeState {
    pinned: Option<SoapVersion>,
    pub(crate) version: Option<SoapVersion>,
    pub(crate) envelope: Option<NodeId>,
    pub(crate) header: Option<NodeId>,
    pub(crate) body: Option<NodeId>,
    pub(crate) fault: Option<NodeId>,
    header_present: bool,
    body_present: bool,
    /// Set once an element or placeholder has been linked under Body
    body_has_element: bool,
    /// Set while a Fault element is open
    fault_builder: Option<FaultBuilder>,
}

impl EnvelopeState {
    pub(crate) fn new(pinned: Option<SoapVersion>) -> Self {
        Self {
            pinned,
            ..Self::default()
        }
    }

    /// True when `depth`/`parent` is where the Body's first element goes.
    pub(crate) fn is_payload_position(&self, parent: NodeId, depth: u32) -> bool {
        depth == 3 && Some(parent) == self.body && !self.body_has_element
    }

    /// Note an element or placeholder linked under `parent`.
    pub(crate) fn on_linked(&mut self, parent: NodeId) {
        if Some(parent) == self.body {
            self.body_has_element = true;
        }
    }

    /// Drop any recorded role pointing at a node that left the tree.
    pub(crate) fn forget(&mut self, id: NodeId) {
        for slot in [&mut self.envelope, &mut self.header, &mut self.body, &mut self.fault] {
            if *slot == Some(id) {
                *slot = None;
            }
        }
    }

    /// Name-keyed opaque hooks never see envelope structure or fault fields.
    pub(crate) fn accepts_opaque(&self, depth: u32) -> bool {
        depth >= 3
            && self
                .fault_builder
                .as_ref()
                .map_or(true, |fault| fault.in_detail())
    }

    /// Classify an element about to be built at `depth` under `parent`.
    pub(crate) fn on_start(
        &mut self,
        parent: NodeId,
        depth: u32,
        name: &QualifiedName,
        attributes: &[Attribute],
    ) -> Result<ElementRole, BuildError> {
        if let Some(fault) = self.fault_builder.as_mut() {
            return fault.on_start(name, attributes);
        }
        match depth {
            1 => self.start_envelope(name),
            2 => self.start_envelope_child(name),
            3 if Some(parent) == self.header => Ok(ElementRole::HeaderBlock),
            // Any Body child named Fault, whatever its namespace or position.
            3 if Some(parent) == self.body && name.local_name == "Fault" => {
                let version = self.version_or_err()?;
                self.fault_builder = Some(FaultBuilder::new(version, name, depth));
                Ok(ElementRole::Fault)
            }
            _ => Ok(ElementRole::Plain),
        }
    }

    /// Remember the node created for a recognized role.
    pub(crate) fn record(&mut self, id: NodeId, role: ElementRole) {
        match role {
            ElementRole::Envelope => self.envelope = Some(id),
            ElementRole::Header => self.header = Some(id),
            ElementRole::Body => self.body = Some(id),
            ElementRole::Fault => self.fault = Some(id),
            _ => {}
        }
    }

    /// Check the element `closing` before it is marked complete.
    pub(crate) fn on_end(
        &mut self,
        arena: &Arena,
        closing: NodeId,
        depth: u32,
    ) -> Result<(), BuildError> {
        if let Some(fault) = self.fault_builder.as_mut() {
            if fault.on_end(depth)? {
                self.fault_builder = None;
            }
            return Ok(());
        }
        if arena.role(closing) == Some(ElementRole::Envelope) && !self.body_present {
            return Err(BuildError::structural("SOAP Envelope must contain a Body element"));
        }
        Ok(())
    }

    fn version_or_err(&self) -> Result<SoapVersion, BuildError> {
        self.version
            .ok_or_else(|| BuildError::stream("SOAP version not detected before Envelope content"))
    }

    fn start_envelope(&mut self, name: &QualifiedName) -> Result<ElementRole, BuildError> {
        if name.local_name != "Envelope" {
            return Err(BuildError::structural(format!(
                "First Element must contain the local name, Envelope, but found {name}"
            )));
        }
        let namespace = name.namespace.as_deref().unwrap_or("");
        let detected = SoapVersion::from_namespace(namespace);
        let version = match (self.pinned, detected) {
            (None, Some(found)) => found,
            (Some(pinned), Some(found)) if pinned == found => found,
            (Some(pinned), _) => {
                return Err(BuildError::VersionMismatch {
                    expected: pinned.to_string(),
                    found: namespace.to_string(),
                })
            }
            (None, None) => {
                return Err(BuildError::UnsupportedVersion(if namespace.is_empty() {
                    "(none)".to_string()
                } else {
                    namespace.to_string()
                }))
            }
        };
        debug!(version = %version, pinned = self.pinned.is_some(), "Detected SOAP version");
        self.version = Some(version);
        Ok(ElementRole::Envelope)
    }

    fn start_envelope_child(&mut self, name: &QualifiedName) -> Result<ElementRole, BuildError> {
        let version = self.version_or_err()?;
        if name.namespace.as_deref() != Some(version.namespace()) {
            let tolerated = SOAP11_POST_BODY_NAMESPACE_TOLERANCE
                && self.body_present
                && version == SoapVersion::Soap11;
            if !tolerated {
                return Err(BuildError::structural(format!(
                    "Disallowed element found inside Envelope : {{{}}}{}",
                    name.namespace.as_deref().unwrap_or(""),
                    name.local_name
                )));
            }
        }
        match name.local_name.as_str() {
            "Header" => {
                if self.header_present {
                    return Err(BuildError::structural("Multiple headers encountered!"));
                }
                if self.body_present {
                    return Err(BuildError::structural("Header Body wrong order!"));
                }
                self.header_present = true;
                Ok(ElementRole::Header)
            }
            "Body" => {
                if self.body_present {
                    return Err(BuildError::structural("Multiple body elements encountered"));
                }
                self.body_present = true;
                Ok(ElementRole::Body)
            }
            other => Err(BuildError::structural(format!(
                "{other} is not supported here. Envelope can not have elements other than Header and Body."
            ))),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::{SOAP_11_NS, SOAP_12_NS};
    use crate::error::FaultCode;
    use crate::node::NodeKind;

    fn name(ns: &str, local: &str) -> QualifiedName {
        QualifiedName::new(local).with_namespace(ns)
    }

    fn document_node() -> NodeId {
        Arena::new().alloc(NodeKind::Document, false)
    }

    #[test]
    fn test_detects_version() {
        let doc = document_node();
        let mut state = EnvelopeState::new(None);
        let role = state.on_start(doc, 1, &name(SOAP_12_NS, "Envelope"), &[]).unwrap();
        assert_eq!(role, ElementRole::Envelope);
        assert_eq!(state.version, Some(SoapVersion::Soap12));
    }

    #[test]
    fn test_pin_mismatch() {
        let doc = document_node();
        let mut state = EnvelopeState::new(Some(SoapVersion::Soap11));
        let err = state
            .on_start(doc, 1, &name(SOAP_12_NS, "Envelope"), &[])
            .unwrap_err();
        assert!(matches!(err, BuildError::VersionMismatch { .. }));
        assert_eq!(err.fault_code(), FaultCode::VersionMismatch);

        let mut state = EnvelopeState::new(Some(SoapVersion::Soap11));
        let err = state
            .on_start(doc, 1, &name("urn:other", "Envelope"), &[])
            .unwrap_err();
        assert!(matches!(err, BuildError::VersionMismatch { .. }));
    }

    #[test]
    fn test_unknown_namespace_unpinned() {
        let doc = document_node();
        let mut state = EnvelopeState::new(None);
        let err = state
            .on_start(doc, 1, &name("urn:other", "Envelope"), &[])
            .unwrap_err();
        assert!(matches!(err, BuildError::UnsupportedVersion(ref ns) if ns == "urn:other"));
    }

    #[test]
    fn test_first_element_must_be_envelope() {
        let doc = document_node();
        let mut state = EnvelopeState::new(None);
        let err = state.on_start(doc, 1, &name(SOAP_11_NS, "Body"), &[]).unwrap_err();
        assert!(err.to_string().contains("Envelope"));
    }

    #[test]
    fn test_header_body_rules() {
        let doc = document_node();
        let mut state = EnvelopeState::new(None);
        state.on_start(doc, 1, &name(SOAP_11_NS, "Envelope"), &[]).unwrap();
        assert_eq!(
            state.on_start(doc, 2, &name(SOAP_11_NS, "Header"), &[]).unwrap(),
            ElementRole::Header
        );
        let err = state.on_start(doc, 2, &name(SOAP_11_NS, "Header"), &[]).unwrap_err();
        assert!(err.to_string().contains("Multiple headers encountered!"));

        assert_eq!(
            state.on_start(doc, 2, &name(SOAP_11_NS, "Body"), &[]).unwrap(),
            ElementRole::Body
        );
        let err = state.on_start(doc, 2, &name(SOAP_11_NS, "Body"), &[]).unwrap_err();
        assert!(err.to_string().contains("Multiple body elements encountered"));
    }

    #[test]
    fn test_header_after_body() {
        let doc = document_node();
        let mut state = EnvelopeState::new(None);
        state.on_start(doc, 1, &name(SOAP_12_NS, "Envelope"), &[]).unwrap();
        state.on_start(doc, 2, &name(SOAP_12_NS, "Body"), &[]).unwrap();
        let err = state.on_start(doc, 2, &name(SOAP_12_NS, "Header"), &[]).unwrap_err();
        assert!(err.to_string().contains("Header Body wrong order!"));
    }

    #[test]
    fn test_foreign_namespace_after_body() {
        let doc = document_node();

        // SOAP 1.1 tolerates the namespace but not the name.
        let mut state = EnvelopeState::new(None);
        state.on_start(doc, 1, &name(SOAP_11_NS, "Envelope"), &[]).unwrap();
        state.on_start(doc, 2, &name(SOAP_11_NS, "Body"), &[]).unwrap();
        let err = state.on_start(doc, 2, &name("urn:x", "Trailer"), &[]).unwrap_err();
        assert!(err.to_string().contains("Trailer is not supported here"));

        // SOAP 1.2 rejects the namespace itself.
        let mut state = EnvelopeState::new(None);
        state.on_start(doc, 1, &name(SOAP_12_NS, "Envelope"), &[]).unwrap();
        state.on_start(doc, 2, &name(SOAP_12_NS, "Body"), &[]).unwrap();
        let err = state.on_start(doc, 2, &name("urn:x", "Trailer"), &[]).unwrap_err();
        assert!(err.to_string().contains("Disallowed element"));
    }

    #[test]
    fn test_foreign_namespace_before_body() {
        let doc = document_node();
        let mut state = EnvelopeState::new(None);
        state.on_start(doc, 1, &name(SOAP_11_NS, "Envelope"), &[]).unwrap();
        let err = state.on_start(doc, 2, &name("urn:x", "Header"), &[]).unwrap_err();
        assert!(err.to_string().contains("Disallowed element"));
    }

    #[test]
    fn test_fault_recognized_by_local_name() {
        let mut arena = Arena::new();
        let doc = arena.alloc(NodeKind::Document, false);
        let mut state = EnvelopeState::new(None);
        state.on_start(doc, 1, &name(SOAP_11_NS, "Envelope"), &[]).unwrap();
        state.on_start(doc, 2, &name(SOAP_11_NS, "Body"), &[]).unwrap();
        let body = arena.alloc(NodeKind::Document, false);
        state.record(body, ElementRole::Body);
        assert!(state.is_payload_position(body, 3));

        // Not the first Body child and not in the envelope namespace.
        state.on_linked(body);
        assert!(!state.is_payload_position(body, 3));
        let role = state.on_start(body, 3, &QualifiedName::new("Fault"), &[]).unwrap();
        assert_eq!(role, ElementRole::Fault);
        let err = state.on_start(body, 4, &QualifiedName::new("bogus"), &[]).unwrap_err();
        assert!(err.to_string().contains("bogus"));
    }

    #[test]
    fn test_forget_detached_body() {
        let body = document_node();
        let mut state = EnvelopeState::new(None);
        state.record(body, ElementRole::Body);
        state.forget(body);
        assert_eq!(state.body, None);
    }

    #[test]
    fn test_header_block_info() {
        let element = ElementData {
            name: name("urn:app", "Security"),
            namespaces: Vec::new(),
            attributes: vec![
                Attribute::new(QualifiedName::new("mustUnderstand").with_namespace(SOAP_12_NS), "true"),
                Attribute::new(QualifiedName::new("role").with_namespace(SOAP_12_NS), " urn:r "),
                Attribute::new(QualifiedName::new("relay").with_namespace(SOAP_12_NS), "1"),
            ],
            role: ElementRole::HeaderBlock,
        };
        let info = HeaderBlockInfo::from_element(&element, SoapVersion::Soap12);
        assert!(info.must_understand);
        assert_eq!(info.role.as_deref(), Some("urn:r"));
        assert!(info.relay);

        // Attributes outside the envelope namespace carry no meaning.
        let info = HeaderBlockInfo::from_element(&element, SoapVersion::Soap11);
        assert_eq!(info, HeaderBlockInfo::default());
    }
}
