use simplesoap_xml::XmlError;
use std::fmt;
use thiserror::Error;

use crate::{transport::TransportError, value::Value};

/// Application level failure reported by the remote side. Distinct from
/// transport and local errors: the exchange itself succeeded.
#[derive(Debug, Clone, PartialEq)]
pub struct SoapFault {
    pub code: String,
    pub message: String,
    pub detail: Option<Value>,
}

impl SoapFault {
    pub fn new(code: impl Into<String>, message: impl Into<String>) -> Self {
        Self {
            code: code.into(),
            message: message.into(),
            detail: None,
        }
    }

    pub fn with_detail(mut self, detail: impl Into<Value>) -> Self {
        self.detail = Some(detail.into());
        self
    }
}

impl fmt::Display for SoapFault {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}: {}", self.code, self.message)
    }
}

impl std::error::Error for SoapFault {}

#[derive(Debug, Error)]
pub enum Error {
    #[error(transparent)]
    Xml(#[from] XmlError),

    #[error("Unable to load service description: {0}")]
    Wsdl(#[from] simplesoap_wsdl::Error),

    #[error("Transport error: {0}")]
    Transport(#[from] TransportError),

    #[error("SOAP fault {0}")]
    Fault(SoapFault),

    #[error("No type information for tag `{tag}`")]
    TypeNotFound { tag: String },

    #[error("Cannot convert `{value}` in tag `{tag}` to {expected}")]
    ValueConversion {
        tag: String,
        value: String,
        expected: &'static str,
    },

    #[error("Unknown method `{0}`")]
    UnknownMethod(String),

    #[error("Invalid arguments for `{method}`: {arguments:?}")]
    InvalidArguments {
        method: String,
        arguments: Vec<String>,
    },

    #[error("No location to send `{0}` to")]
    MissingLocation(String),

    #[error("Malformed SOAP message: {0}")]
    MalformedMessage(String),
}

impl From<SoapFault> for Error {
    fn from(fault: SoapFault) -> Self {
        Self::Fault(fault)
    }
}
