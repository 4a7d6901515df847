//! Error types for the SOAP object model builder.

use serde::{Deserialize, Serialize};
use thiserror::Error;

/// Errors raised while materializing a document.
///
/// Every variant except `Config` is fatal to the document being
/// built: the builder refuses further work and reports `Aborted` from then on.
#[derive(Error, Debug)]
pub enum BuildError {
    #[error("XML stream error: {0}")]
    Stream(String),

    #[error("Invalid SOAP structure: {message}")]
    Structural { message: String, code: FaultCode },

    #[error("Transport level SOAP version {expected} does not match envelope namespace {found}")]
    VersionMismatch { expected: String, found: String },

    #[error("Unsupported SOAP version, envelope namespace: {0}")]
    UnsupportedVersion(String),

    #[error("Builder aborted by an earlier error")]
    Aborted,

    #[error("Configuration error: {0}")]
    Config(String),
}

impl BuildError {
    /// Structural error answered with a `Sender` fault.
    pub fn structural(message: impl Into<String>) -> Self {
        Self::Structural {
            message: message.into(),
            code: FaultCode::Sender,
        }
    }

    pub fn stream(message: impl Into<String>) -> Self {
        Self::Stream(message.into())
    }

    /// The SOAP fault code a server would answer with for this error.
    pub fn fault_code(&self) -> FaultCode {
        match self {
            Self::Stream(_) => FaultCode::Sender,
            Self::Structural { code, .. } => *code,
            Self::VersionMismatch { .. } | Self::UnsupportedVersion(_) => FaultCode::VersionMismatch,
            Self::Aborted | Self::Config(_) => FaultCode::Receiver,
        }
    }

    /// True for errors that poison the builder.
    pub fn is_fatal(&self) -> bool {
        !matches!(self, Self::Config(_))
    }
}

impl From<quick_xml::Error> for BuildError {
    fn from(e: quick_xml::Error) -> Self {
        Self::Stream(e.to_string())
    }
}

/// SOAP fault codes, named after their SOAP 1.2 spelling.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum FaultCode {
    /// The message was malformed or otherwise the sender's fault
    Sender,
    /// The receiver could not process an otherwise valid message
    Receiver,
    /// Envelope namespace not supported or not the one announced
    VersionMismatch,
}

impl FaultCode {
    /// Get the SOAP 1.2 local name of this fault code.
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Sender => "Sender",
            Self::Receiver => "Receiver",
            Self::VersionMismatch => "VersionMismatch",
        }
    }

    /// Get the SOAP 1.1 local name of this fault code.
    pub fn as_soap11_str(&self) -> &'static str {
        match self {
            Self::Sender => "Client",
            Self::Receiver => "Server",
            Self::VersionMismatch => "VersionMismatch",
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_fault_code_as_str() {
        assert_eq!(FaultCode::Sender.as_str(), "Sender");
        assert_eq!(FaultCode::Sender.as_soap11_str(), "Client");
        assert_eq!(FaultCode::Receiver.as_soap11_str(), "Server");
    }

    #[test]
    fn test_error_classification() {
        let err = BuildError::structural("Multiple headers encountered");
        assert_eq!(err.fault_code(), FaultCode::Sender);
        assert!(err.is_fatal());
        assert!(err.to_string().contains("Multiple headers"));

        let err = BuildError::VersionMismatch {
            expected: "1.1".to_string(),
            found: "http://www.w3.org/2003/05/soap-envelope".to_string(),
        };
        assert_eq!(err.fault_code(), FaultCode::VersionMismatch);

        let err = BuildError::Config("bad".to_string());
        assert!(!err.is_fatal());
    }
}
