//! Configuration types for the SOAP object model builder.

use crate::error::BuildError;
use serde::{Deserialize, Serialize};
use std::fmt;
use std::str::FromStr;

/// SOAP namespace URIs.
pub const SOAP_11_NS: &str = "http://schemas.xmlsoap.org/soap/envelope/";
pub const SOAP_12_NS: &str = "http://www.w3.org/2003/05/soap-envelope";

/// Main configuration for the builder.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct BuilderConfig {
    /// Config version
    pub version: String,

    /// General settings
    pub settings: SettingsConfig,

    /// Envelope handling
    pub envelope: EnvelopeConfig,

    /// Opaque subtree capture
    pub opaque: OpaqueConfig,
}

impl Default for BuilderConfig {
    fn default() -> Self {
        Self {
            version: "1".to_string(),
            settings: SettingsConfig::default(),
            envelope: EnvelopeConfig::default(),
            opaque: OpaqueConfig::default(),
        }
    }
}

impl BuilderConfig {
    /// Parse a YAML configuration document.
    pub fn from_yaml(yaml: &str) -> Result<Self, BuildError> {
        serde_yaml::from_str(yaml).map_err(|e| BuildError::Config(e.to_string()))
    }
}

/// General settings.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct SettingsConfig {
    /// Materialize whitespace-only text nodes
    pub preserve_whitespace: bool,

    /// Maximum element nesting depth (0 = unlimited)
    pub max_depth: u32,
}

impl Default for SettingsConfig {
    fn default() -> Self {
        Self {
            preserve_whitespace: true,
            max_depth: 0,
        }
    }
}

/// Envelope handling configuration.
#[derive(Debug, Clone, Serialize, Deserialize, Default)]
#[serde(default)]
pub struct EnvelopeConfig {
    /// Version pin applied when the caller does not pass one
    pub expected_version: Option<SoapVersion>,
}

/// Opaque subtree configuration, consumed by the CLI to register capture hooks.
#[derive(Debug, Clone, Serialize, Deserialize, Default)]
#[serde(default)]
pub struct OpaqueConfig {
    /// Deepest element level (root = 1) at which name-keyed hooks apply
    pub max_depth: u32,

    /// Capture the first child of Body (or the plain document element)
    pub capture_payload: bool,

    /// Elements captured wherever they appear above `max_depth`
    pub capture: Vec<ElementKey>,
}

/// Namespace + local name pair identifying an element.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct ElementKey {
    #[serde(default)]
    pub namespace: Option<String>,
    pub local_name: String,
}

impl ElementKey {
    pub fn new(namespace: Option<&str>, local_name: &str) -> Self {
        Self {
            namespace: namespace.map(str::to_string),
            local_name: local_name.to_string(),
        }
    }

    pub fn matches(&self, namespace: Option<&str>, local_name: &str) -> bool {
        self.local_name == local_name && self.namespace.as_deref() == namespace
    }
}

/// SOAP versions.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum SoapVersion {
    /// SOAP 1.1 (namespace: http://schemas.xmlsoap.org/soap/envelope/)
    #[serde(rename = "1.1")]
    Soap11,
    /// SOAP 1.2 (namespace: http://www.w3.org/2003/05/soap-envelope)
    #[serde(rename = "1.2")]
    Soap12,
}

impl SoapVersion {
    /// Envelope namespace URI of this version.
    pub fn namespace(&self) -> &'static str {
        match self {
            Self::Soap11 => SOAP_11_NS,
            Self::Soap12 => SOAP_12_NS,
        }
    }

    pub fn from_namespace(uri: &str) -> Option<Self> {
        match uri {
            SOAP_11_NS => Some(Self::Soap11),
            SOAP_12_NS => Some(Self::Soap12),
            _ => None,
        }
    }

    /// Guess the version from a transport Content-Type header.
    pub fn from_content_type(content_type: &str) -> Option<Self> {
        let mime = content_type
            .split(';')
            .next()
            .unwrap_or("")
            .trim()
            .to_ascii_lowercase();
        match mime.as_str() {
            "application/soap+xml" => Some(Self::Soap12),
            "text/xml" => Some(Self::Soap11),
            _ => None,
        }
    }

    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Soap11 => "1.1",
            Self::Soap12 => "1.2",
        }
    }
}

impl fmt::Display for SoapVersion {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for SoapVersion {
    type Err = BuildError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        let s = s.trim();
        match s {
            "1.1" => Ok(Self::Soap11),
            "1.2" => Ok(Self::Soap12),
            _ => Self::from_namespace(s)
                .or_else(|| Self::from_content_type(s))
                .ok_or_else(|| BuildError::Config(format!("unknown SOAP version: {s}"))),
        }
    }
}
