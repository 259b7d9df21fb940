use serde::{Deserialize, Serialize};
use std::str::FromStr;

use crate::error::Error;

/// Where `maxOccurs="unbounded"` puts the array marker.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ArrayMarking {
    /// The enclosing type becomes the array (.NET "ArrayOfX" wrappers).
    Container,
    /// Only the repeated field becomes an array.
    Field,
    /// Container when the enclosing type has a single field, field otherwise.
    Auto,
}

/// Behaviour switches for the SOAP stacks that disagree on the wire format.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct ServerDialect {
    pub name: String,
    pub array_marking: ArrayMarking,
    /// Array items with more fields than this get their own wrapper element.
    pub array_wrap_threshold: usize,
    /// Every array item gets its own wrapper element whatever its width.
    pub group_arrays: bool,
    /// Method parameters never inherit the method namespace prefix.
    pub unqualified_params: bool,
    /// The request wrapper is named after the operation instead of the input element.
    pub method_from_operation: bool,
    /// Calls without parameters send an empty body.
    pub omit_empty_method: bool,
    /// The envelope carries no `xsi`/`xsd` declarations.
    pub omit_xsd_declarations: bool,
}

impl Default for ServerDialect {
    fn default() -> Self {
        Self {
            name: "default".to_owned(),
            array_marking: ArrayMarking::Auto,
            array_wrap_threshold: 1,
            group_arrays: false,
            unqualified_params: false,
            method_from_operation: false,
            omit_empty_method: false,
            omit_xsd_declarations: false,
        }
    }
}

impl ServerDialect {
    pub fn named(name: &str) -> Option<Self> {
        let base = Self {
            name: name.to_owned(),
            ..Self::default()
        };

        Some(match name {
            "" | "default" => Self::default(),
            "dotnet" => Self {
                array_marking: ArrayMarking::Container,
                ..base
            },
            "jetty" => Self {
                group_arrays: true,
                unqualified_params: true,
                ..base
            },
            "axis" => Self {
                method_from_operation: true,
                ..base
            },
            "jbossas6" => Self {
                omit_empty_method: true,
                ..base
            },
            "oracle" => Self {
                omit_xsd_declarations: true,
                ..base
            },
            _ => return None,
        })
    }

    /// True when an array whose items have `width` fields repeats its
    /// wrapper element per item.
    pub fn wraps_each_item(&self, width: usize) -> bool {
        self.group_arrays || width > self.array_wrap_threshold
    }
}

impl FromStr for ServerDialect {
    type Err = Error;

    fn from_str(name: &str) -> Result<Self, Self::Err> {
        Self::named(name).ok_or_else(|| Error::UnknownDialect(name.to_owned()))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn presets() {
        let jetty: ServerDialect = "jetty".parse().unwrap();
        assert!(jetty.group_arrays && jetty.unqualified_params);
        assert!(jetty.wraps_each_item(1));

        let dotnet = ServerDialect::named("dotnet").unwrap();
        assert_eq!(dotnet.array_marking, ArrayMarking::Container);
        assert!(!dotnet.wraps_each_item(1));
        assert!(dotnet.wraps_each_item(2));

        assert!(ServerDialect::named("websphere").is_none());
        assert!(matches!(
            "websphere".parse::<ServerDialect>(),
            Err(Error::UnknownDialect(_))
        ));
    }

    #[test]
    fn deserializes_partial_config() {
        let dialect: ServerDialect =
            serde_json::from_str(r#"{"name": "custom", "array_wrap_threshold": 3}"#).unwrap();
        assert_eq!(dialect.array_wrap_threshold, 3);
        assert_eq!(dialect.array_marking, ArrayMarking::Auto);
        assert!(!dialect.group_arrays);
    }
}
