use thiserror::Error;

#[derive(Debug, Error)]
pub enum Error {
    #[error("Unable to parse provided URL")]
    UrlParseError(#[from] url::ParseError),

    #[error("Unable to convert provided path")]
    PathConversionError(Option<std::io::Error>),

    #[error("Unable to open file")]
    FileOpenError(#[from] std::io::Error),

    #[error("Unable to get file from server")]
    ReqwestError(#[from] reqwest::Error),

    #[error("Unsupported URL scheme {0}")]
    UnsupportedScheme(String),

    #[error("Error parsing XML input")]
    XmlParseError(#[from] simplesoap_xml::XmlError),

    #[error("Document at {0} is not a WSDL definitions document")]
    NotWsdl(String),

    #[error("Unknown schema definition kind {0}")]
    UnknownElementKind(String),

    #[error("Type {name} in namespace {namespace:?} is referenced but never defined")]
    UnresolvedType { name: String, namespace: String },

    #[error("Type {0} is defined in terms of itself")]
    CyclicDefinition(String),

    #[error("Element <{element}> is missing the {attribute} attribute")]
    MissingAttribute {
        element: String,
        attribute: &'static str,
    },

    #[error("Unknown server dialect {0}")]
    UnknownDialect(String),

    #[error("Unable to read or write cache entry")]
    CacheError(#[from] serde_json::Error),
}
