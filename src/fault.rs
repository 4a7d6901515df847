//! SOAP Fault sub-grammar.
//!
//! While a Fault element is open, every child element is checked against a
//! per-version table of allowed children. SOAP 1.1 faults are flat
//! (`faultcode`, `faultstring`, `faultactor`, `detail`); SOAP 1.2 faults nest
//! `Code/Value`, `Code/Subcode/Value` and `Reason/Text`. Anything below a
//! detail element is free-form.

use crate::builder::XML_NS;
use crate::config::SoapVersion;
use crate::error::BuildError;
use crate::node::ElementRole;
use crate::token::{Attribute, QualifiedName};
use tracing::debug;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum Field {
    Fault,
    Code,
    Subcode,
    Value,
    Reason,
    Text,
    Node,
    Role,
    Detail,
    DetailEntry,
}

impl Field {
    fn role(self) -> ElementRole {
        match self {
            Self::Fault => ElementRole::Fault,
            Self::Code => ElementRole::FaultCode,
            Self::Subcode => ElementRole::FaultSubcode,
            Self::Value => ElementRole::FaultValue,
            Self::Reason => ElementRole::FaultReason,
            Self::Text => ElementRole::FaultText,
            Self::Node => ElementRole::FaultNode,
            Self::Role => ElementRole::FaultRole,
            Self::Detail => ElementRole::FaultDetail,
            Self::DetailEntry => ElementRole::DetailEntry,
        }
    }
}

/// One allowed child position.
struct Slot {
    name: &'static str,
    field: Field,
    required: bool,
    repeatable: bool,
}

const fn slot(name: &'static str, field: Field, required: bool) -> Slot {
    Slot {
        name,
        field,
        required,
        repeatable: false,
    }
}

const SOAP11_FAULT: &[Slot] = &[
    slot("faultcode", Field::Code, true),
    slot("faultstring", Field::Reason, true),
    slot("faultactor", Field::Role, false),
    slot("detail", Field::Detail, false),
];

const SOAP12_FAULT: &[Slot] = &[
    slot("Code", Field::Code, true),
    slot("Reason", Field::Reason, true),
    slot("Node", Field::Node, false),
    slot("Role", Field::Role, false),
    slot("Detail", Field::Detail, false),
];

const SOAP12_CODE: &[Slot] = &[
    slot("Value", Field::Value, true),
    slot("Subcode", Field::Subcode, false),
];

const SOAP12_REASON: &[Slot] = &[Slot {
    name: "Text",
    field: Field::Text,
    required: true,
    repeatable: true,
}];

/// Text-only field.
const TEXT_ONLY: &[Slot] = &[];

/// Fault grammar, fixed by the envelope version.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub(crate) enum FaultGrammar {
    Soap11,
    Soap12,
}

impl FaultGrammar {
    pub(crate) fn for_version(version: SoapVersion) -> Self {
        match version {
            SoapVersion::Soap11 => Self::Soap11,
            SoapVersion::Soap12 => Self::Soap12,
        }
    }

    /// Allowed children of `field`. `None` means unconstrained.
    fn slots(self, field: Field) -> Option<&'static [Slot]> {
        match (self, field) {
            (_, Field::Detail | Field::DetailEntry) => None,
            (Self::Soap11, Field::Fault) => Some(SOAP11_FAULT),
            (Self::Soap11, _) => Some(TEXT_ONLY),
            (Self::Soap12, Field::Fault) => Some(SOAP12_FAULT),
            (Self::Soap12, Field::Code | Field::Subcode) => Some(SOAP12_CODE),
            (Self::Soap12, Field::Reason) => Some(SOAP12_REASON),
            (Self::Soap12, _) => Some(TEXT_ONLY),
        }
    }
}

#[derive(Debug)]
struct Frame {
    field: Field,
    name: String,
    /// Index of the first slot still available
    cursor: usize,
    /// Bit per slot index, set once that slot has been seen
    seen: u32,
}

impl Frame {
    fn new(field: Field, name: &str) -> Self {
        Self {
            field,
            name: name.to_string(),
            cursor: 0,
            seen: 0,
        }
    }
}

/// Tracks the open elements of one Fault.
#[derive(Debug)]
pub(crate) struct FaultBuilder {
    grammar: FaultGrammar,
    entry_depth: u32,
    frames: Vec<Frame>,
}

impl FaultBuilder {
    /// Enter fault mode for the Fault element at `depth`.
    pub(crate) fn new(version: SoapVersion, name: &QualifiedName, depth: u32) -> Self {
        let grammar = FaultGrammar::for_version(version);
        debug!(version = %version, depth, "Entering fault sub-builder");
        Self {
            grammar,
            entry_depth: depth,
            frames: vec![Frame::new(Field::Fault, &name.local_name)],
        }
    }

    /// True while the innermost open element is a detail or below it.
    pub(crate) fn in_detail(&self) -> bool {
        matches!(
            self.frames.last().map(|f| f.field),
            Some(Field::Detail | Field::DetailEntry)
        )
    }

    /// Classify a child element opened inside the fault.
    pub(crate) fn on_start(
        &mut self,
        name: &QualifiedName,
        attributes: &[Attribute],
    ) -> Result<ElementRole, BuildError> {
        let grammar = self.grammar;
        let top = self
            .frames
            .last_mut()
            .ok_or_else(|| BuildError::stream("fault sub-builder has no open element"))?;

        let Some(slots) = grammar.slots(top.field) else {
            self.frames.push(Frame::new(Field::DetailEntry, &name.local_name));
            return Ok(ElementRole::DetailEntry);
        };

        let found = slots[top.cursor..]
            .iter()
            .position(|s| s.name == name.local_name)
            .map(|i| i + top.cursor);
        let Some(index) = found else {
            return Err(BuildError::structural(format!(
                "Unexpected element {} in {}",
                name, top.name
            )));
        };
        let skipped = (top.cursor..index).find(|&i| slots[i].required && top.seen & (1 << i) == 0);
        if let Some(missing) = skipped {
            return Err(BuildError::structural(format!(
                "Unexpected element {} in {}: expected {}",
                name, top.name, slots[missing].name
            )));
        }

        let slot = &slots[index];
        let needs_lang = grammar == FaultGrammar::Soap12 && slot.field == Field::Text;
        if needs_lang && !has_xml_lang(attributes) {
            return Err(BuildError::structural(format!(
                "{name} in {} is missing mandatory attribute xml:lang",
                top.name
            )));
        }
        top.seen |= 1 << index;
        top.cursor = if slot.repeatable { index } else { index + 1 };
        self.frames.push(Frame::new(slot.field, &name.local_name));
        Ok(slot.field.role())
    }

    /// Close the innermost open element. Returns true once the Fault itself
    /// has closed.
    pub(crate) fn on_end(&mut self, depth: u32) -> Result<bool, BuildError> {
        let frame = self
            .frames
            .pop()
            .ok_or_else(|| BuildError::stream("fault sub-builder has no open element"))?;

        if let Some(slots) = self.grammar.slots(frame.field) {
            let missing = slots
                .iter()
                .enumerate()
                .find(|(i, s)| s.required && frame.seen & (1 << i) == 0);
            if let Some((_, slot)) = missing {
                return Err(BuildError::structural(format!(
                    "{} is missing mandatory element {}",
                    frame.name, slot.name
                )));
            }
        }

        if !self.frames.is_empty() {
            return Ok(false);
        }
        if depth != self.entry_depth {
            return Err(BuildError::stream(format!(
                "Fault closed at depth {depth}, opened at depth {}",
                self.entry_depth
            )));
        }
        debug!(depth, "Leaving fault sub-builder");
        Ok(true)
    }
}

fn has_xml_lang(attributes: &[Attribute]) -> bool {
    attributes.iter().any(|a| {
        a.name.local_name == "lang"
            && (a.name.namespace.as_deref() == Some(XML_NS) || a.name.prefix.as_deref() == Some("xml"))
    })
}
