//! Owned, namespace-aware XML element tree used to build SOAP envelopes and
//! walk WSDL documents.

mod element;
mod error;
mod reader;
mod writer;

pub use element::{split_namespaced_name, Descendants, Element, Node};
pub use error::XmlError;
