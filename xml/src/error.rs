use thiserror::Error;

#[derive(Debug, Error)]
pub enum XmlError {
    #[error("Error parsing XML input")]
    Parse(#[from] quick_xml::Error),

    #[error("Generated XML is not valid UTF-8")]
    Utf8(#[from] std::string::FromUtf8Error),

    #[error("Document has no root element")]
    EmptyDocument,

    #[error("Unbalanced tags in XML input")]
    UnbalancedTags,

    #[error("Tag not found: {tag}")]
    TagNotFound { tag: String },

    #[error("Unable to convert {value:?} in <{tag}> to {expected}")]
    Conversion {
        tag: String,
        value: String,
        expected: &'static str,
    },
}
