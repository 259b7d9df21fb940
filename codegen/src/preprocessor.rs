use super::types;
use proc_macro2::{Ident, Span};
use simplesoap_util::soap::signature;
use simplesoap_wsdl::types::{self as wsdl, Services, SoapVersion, ANY_FIELD};
use std::collections::HashSet;
use tracing::{debug, warn};

const KEYWORDS: &[&str] = &[
    "abstract", "as", "async", "await", "become", "box", "break", "const", "continue", "crate",
    "do", "dyn", "else", "enum", "extern", "false", "final", "fn", "for", "if", "impl", "in",
    "let", "loop", "macro", "match", "mod", "move", "mut", "override", "priv", "pub", "ref",
    "return", "self", "Self", "static", "struct", "super", "trait", "true", "try", "type",
    "typeof", "union", "unsafe", "unsized", "use", "virtual", "where", "while", "yield",
];

/// Splits a name on punctuation and on case changes: `getHTTPStatus_v2`
/// gives `get`, `HTTP`, `Status`, `v2`.
fn words(name: &str) -> Vec<String> {
    let chars: Vec<char> = name.chars().collect();
    let mut words = Vec::new();
    let mut current = String::new();

    for (index, &c) in chars.iter().enumerate() {
        if !c.is_ascii_alphanumeric() {
            if !current.is_empty() {
                words.push(std::mem::take(&mut current));
            }
            continue;
        }

        if c.is_ascii_uppercase() && !current.is_empty() {
            let previous = chars[index - 1];
            let next_is_lower = chars.get(index + 1).map_or(false, char::is_ascii_lowercase);
            if previous.is_ascii_lowercase()
                || previous.is_ascii_digit()
                || (previous.is_ascii_uppercase() && next_is_lower)
            {
                words.push(std::mem::take(&mut current));
            }
        }
        current.push(c);
    }

    if !current.is_empty() {
        words.push(current);
    }
    words
}

fn valid_identifier(mut ident: String, fallback: &str) -> String {
    if ident.is_empty() {
        ident = fallback.to_owned();
    }
    if ident.starts_with(|c: char| c.is_ascii_digit()) {
        ident.insert(0, '_');
    }
    if KEYWORDS.contains(&ident.as_str()) {
        ident.push('_');
    }
    ident
}

pub fn snake_case(name: &str) -> String {
    let words: Vec<String> = words(name).iter().map(|word| word.to_ascii_lowercase()).collect();
    valid_identifier(words.join("_"), "value")
}

pub fn camel_case(name: &str) -> String {
    let words: String = words(name)
        .iter()
        .map(|word| {
            let mut chars = word.chars();
            match chars.next() {
                Some(first) => {
                    first.to_ascii_uppercase().to_string() + &chars.as_str().to_ascii_lowercase()
                }
                None => String::new(),
            }
        })
        .collect();
    valid_identifier(words, "Port")
}

/// Hands out identifiers that are unique within one scope.
#[derive(Default)]
struct Scope(HashSet<String>);

impl Scope {
    fn reserve(names: &[&str]) -> Self {
        Self(names.iter().map(|name| (*name).to_owned()).collect())
    }

    fn ident(&mut self, candidate: String) -> Ident {
        let mut ident = candidate.clone();
        let mut suffix = 2;
        while !self.0.insert(ident.clone()) {
            ident = format!("{}_{}", candidate, suffix);
            suffix += 1;
        }
        if ident != candidate {
            debug!(%candidate, %ident, "renamed clashing identifier");
        }
        Ident::new(&ident, Span::call_site())
    }
}

fn preprocess_operation(
    services: &Services,
    operation: &wsdl::Operation,
    scope: &mut Scope,
) -> types::Operation {
    let mut arguments_scope = Scope::default();
    let mut arguments = Vec::new();
    let mut inputs = Vec::new();

    for field in services.input_fields(operation) {
        inputs.push(format!(
            "{}: {}",
            field.name,
            signature(&services.types, &field.descriptor)
        ));
        if field.name == ANY_FIELD {
            warn!(operation = %operation.name, "wildcard input cannot become an argument");
            continue;
        }

        arguments.push(types::Argument {
            ident: arguments_scope.ident(snake_case(&field.name)),
            name: field.name.clone(),
        });
    }

    let mut summary = format!("{}({})", operation.name, inputs.join(", "));
    if let Some(output) = &operation.output {
        summary.push_str(" -> ");
        summary.push_str(&signature(&services.types, &output.descriptor));
    }

    types::Operation {
        ident: scope.ident(snake_case(&operation.name)),
        name: operation.name.clone(),
        summary,
        documentation: operation.documentation.clone(),
        arguments,
    }
}

fn preprocess_port(services: &Services, port: &wsdl::Port, scope: &mut Scope) -> types::Port {
    // Methods share the impl block with the constructors.
    let mut operations_scope = Scope::reserve(&[
        "new",
        "with_options",
        "with_client",
        "client",
        "client_mut",
    ]);
    let operations = port
        .operations
        .values()
        .map(|operation| preprocess_operation(services, operation, &mut operations_scope))
        .collect();

    types::Port {
        ident: scope.ident(camel_case(&port.name)),
        name: port.name.clone(),
        location: port.location.clone(),
        soap_ns: port.soap_version.map(|version| match version {
            SoapVersion::Soap11 => "soap",
            SoapVersion::Soap12 => "soap12",
        }),
        operations,
    }
}

/// Flattens `services` into identifiers and signatures, ready for
/// [`Codegen`](super::codegen::Codegen).
pub fn preprocess(services: &Services, wsdl: &str) -> types::Definition {
    let mut services_scope = Scope::default();

    let services = services
        .services
        .values()
        .map(|service| {
            let mut ports_scope = Scope::default();
            types::Service {
                ident: services_scope.ident(snake_case(&service.name)),
                name: service.name.clone(),
                documentation: service.documentation.clone(),
                ports: service
                    .ports
                    .values()
                    .map(|port| preprocess_port(services, port, &mut ports_scope))
                    .collect(),
            }
        })
        .collect();

    types::Definition {
        wsdl: wsdl.to_owned(),
        services,
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn names_become_identifiers() {
        assert_eq!(snake_case("GetHTTPStatus"), "get_http_status");
        assert_eq!(snake_case("order-id"), "order_id");
        assert_eq!(snake_case("type"), "type_");
        assert_eq!(snake_case("2ndValue"), "_2nd_value");
        assert_eq!(snake_case("..."), "value");
        assert_eq!(camel_case("CalculatorSoap12"), "CalculatorSoap12");
        assert_eq!(camel_case("echo_port"), "EchoPort");
        assert_eq!(camel_case("Self"), "Self_");
    }

    #[test]
    fn clashing_names_are_numbered() {
        let mut scope = Scope::reserve(&["new"]);
        assert_eq!(scope.ident(snake_case("New")), "new_2");
        assert_eq!(scope.ident(snake_case("getValue")), "get_value");
        assert_eq!(scope.ident(snake_case("GetValue")), "get_value_2");
        assert_eq!(scope.ident(snake_case("get_value")), "get_value_3");
    }
}
