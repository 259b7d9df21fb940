use indexmap::IndexMap;
use simplesoap_xml::{split_namespaced_name, Element};
use std::collections::{HashMap, HashSet};
use tracing::{debug, info, warn};
use url::Url;

use crate::{
    dialect::ServerDialect,
    error::Error,
    fetch::{self, Fetcher},
    schema::{self, required_attribute, SchemaResolver},
    types::{
        Descriptor, Field, Operation, Part, Port, Service, Services, SoapVersion, Style,
        TypeKind, TypeTable, WSDL_NS, WSDL_SOAP11_NS, WSDL_SOAP12_NS, XSD_NAMESPACES,
    },
};

const XML_BASE: &str = "xml:base";

fn get_attributes<'e, const N: usize>(
    node: &'e Element,
    names: [&'static str; N],
) -> [Option<&'e str>; N] {
    names.map(|name| node.attribute(name))
}

fn local_ref(qname: &str) -> &str {
    split_namespaced_name(qname).1
}

fn children_named<'e>(node: &'e Element, local: &'e str) -> impl Iterator<Item = &'e Element> {
    node.children().filter(move |child| child.local_name() == local)
}

fn documentation(node: &Element) -> Option<String> {
    node.child("documentation")
        .map(|documentation| documentation.text().trim().to_owned())
        .filter(|documentation| !documentation.is_empty())
}

fn is_soap(node: &Element) -> bool {
    matches!(node.namespace(), Some(WSDL_SOAP11_NS) | Some(WSDL_SOAP12_NS))
}

fn soap_child<'e>(node: &'e Element, local: &str) -> Option<&'e Element> {
    node.children()
        .find(|child| child.local_name() == local && is_soap(child))
}

fn body_parts(body: Option<&Element>) -> Option<Vec<String>> {
    body.and_then(|body| body.attribute("parts"))
        .map(|parts| parts.split_whitespace().map(str::to_owned).collect())
}

struct MessagePart {
    name: String,
    element: Option<(String, String)>,
    ty: Option<Descriptor>,
}

struct Message {
    namespace: String,
    parts: Vec<MessagePart>,
}

struct PortTypeOperation {
    documentation: Option<String>,
    parameter_order: Option<Vec<String>>,
    input: Option<String>,
    output: Option<String>,
    faults: Vec<String>,
}

struct Binding {
    soap_version: Option<SoapVersion>,
    transport: Option<String>,
    operations: IndexMap<String, Operation>,
}

struct Parser<'a> {
    dialect: &'a ServerDialect,
    types: TypeTable,
    messages: HashMap<String, Message>,
    port_types: HashMap<String, IndexMap<String, PortTypeOperation>>,
    bindings: IndexMap<String, Binding>,
}

pub(crate) fn parse(
    url: Url,
    fetcher: &dyn Fetcher,
    dialect: &ServerDialect,
) -> Result<Services, Error> {
    let mut root = fetch::fetch_document(fetcher, &url)?;
    if root.local_name() != "definitions" {
        return Err(Error::NotWsdl(url.to_string()));
    }

    let mut visited = HashSet::from([url.clone()]);
    merge_imports(&mut root, &url, fetcher, &mut visited)?;

    let mut schemas = Vec::new();
    collect_schemas(&root, &url, &mut schemas)?;
    let mut resolver = SchemaResolver::new(dialect, fetcher);
    for (schema, base) in schemas {
        resolver.process_schema(schema, &base)?;
    }

    let mut parser = Parser {
        dialect,
        types: resolver.finish()?,
        messages: HashMap::new(),
        port_types: HashMap::new(),
        bindings: IndexMap::new(),
    };

    let mut definitions = vec![&root];
    definitions.extend(root.find("definitions", &[WSDL_NS]));

    for definition in &definitions {
        parser.collect_messages(definition)?;
    }
    for definition in &definitions {
        parser.collect_port_types(definition);
    }
    for definition in &definitions {
        parser.collect_bindings(definition)?;
    }

    let mut services = IndexMap::new();
    for definition in &definitions {
        parser.collect_services(definition, &mut services);
    }
    if services.is_empty() {
        debug!("no service declared, synthesizing a default one");
        services.insert(String::new(), parser.default_service());
    }

    info!(%url, services = services.len(), types = parser.types.len(), "parsed wsdl");
    Ok(Services {
        services,
        types: parser.types,
    })
}

/// Finds every schema below `node` along with the URL its relative
/// locations resolve against: the nearest `xml:base` left by
/// [`merge_imports`], else the document's own URL.
fn collect_schemas<'e>(
    node: &'e Element,
    base: &Url,
    schemas: &mut Vec<(&'e Element, Url)>,
) -> Result<(), Error> {
    let base = match node.attribute(XML_BASE) {
        Some(location) => Url::parse(location)?,
        None => base.clone(),
    };

    if node.local_name() == "schema"
        && node.namespace().map_or(false, |uri| XSD_NAMESPACES.contains(&uri))
    {
        schemas.push((node, base));
        return Ok(());
    }

    for child in node.children() {
        collect_schemas(child, &base, schemas)?;
    }
    Ok(())
}

/// Appends every imported document into the root `definitions` node, each
/// marked with the URL it came from.
fn merge_imports(
    definitions: &mut Element,
    base: &Url,
    fetcher: &dyn Fetcher,
    visited: &mut HashSet<Url>,
) -> Result<(), Error> {
    let locations: Vec<String> = children_named(definitions, "import")
        .filter_map(|import| import.attribute("location"))
        .map(str::to_owned)
        .collect();

    for location in locations {
        let url = fetch::resolve_location(base, &location)?;
        if !visited.insert(url.clone()) {
            debug!(%url, "wsdl already imported");
            continue;
        }

        let mut imported = fetch::fetch_document(fetcher, &url)?;
        let root = imported.local_name().to_owned();
        match root.as_str() {
            "definitions" => {
                merge_imports(&mut imported, &url, fetcher, visited)?;
                imported.set_attribute(XML_BASE, url.as_str());
                definitions.import(&imported);
            }
            "schema" => {
                imported.set_attribute(XML_BASE, url.as_str());
                definitions.add_child("types").import(&imported);
            }
            _ => {
                warn!(%url, root = %root, "ignoring imported document");
                continue;
            }
        }
        info!(%url, "merged imported document");
    }

    Ok(())
}

impl<'a> Parser<'a> {
    fn part_type(&self, node: &Element, qname: &str, target: &str) -> Result<Descriptor, Error> {
        if let Some(descriptor) = schema::builtin(node, qname) {
            return Ok(descriptor);
        }

        let (uri, local) = node.resolve_qname(qname);
        let uri = uri.unwrap_or(target);
        self.types
            .lookup(local, TypeKind::Complex, uri)
            .or_else(|| self.types.find_by_name(local, TypeKind::Complex))
            .map(Descriptor::Ref)
            .ok_or_else(|| Error::UnresolvedType {
                name: local.to_owned(),
                namespace: uri.to_owned(),
            })
    }

    fn collect_messages(&mut self, definition: &Element) -> Result<(), Error> {
        let target = definition.attribute("targetNamespace").unwrap_or_default();

        for message in children_named(definition, "message") {
            let name = required_attribute(message, "name")?;
            let mut parts = Vec::new();

            for part in children_named(message, "part") {
                let [part_name, element, ty] = get_attributes(part, ["name", "element", "type"]);
                let element = element.map(|element| {
                    let (uri, local) = part.resolve_qname(element);
                    (local.to_owned(), uri.unwrap_or(target).to_owned())
                });
                let ty = match ty {
                    Some(ty) => Some(self.part_type(part, ty, target)?),
                    None => None,
                };

                parts.push(MessagePart {
                    name: part_name.unwrap_or_default().to_owned(),
                    element,
                    ty,
                });
            }

            self.messages.insert(
                name.to_owned(),
                Message {
                    namespace: target.to_owned(),
                    parts,
                },
            );
        }

        Ok(())
    }

    fn collect_port_types(&mut self, definition: &Element) {
        for port_type in children_named(definition, "portType") {
            let Some(name) = port_type.attribute("name") else {
                warn!("portType without a name");
                continue;
            };

            let mut operations = IndexMap::new();
            for operation in children_named(port_type, "operation") {
                let Some(operation_name) = operation.attribute("name") else {
                    continue;
                };
                let message_of = |tag: &str| {
                    operation
                        .child(tag)
                        .and_then(|node| node.attribute("message"))
                        .map(|message| local_ref(message).to_owned())
                };

                operations.insert(
                    operation_name.to_owned(),
                    PortTypeOperation {
                        documentation: documentation(operation),
                        parameter_order: operation
                            .attribute("parameterOrder")
                            .map(|order| order.split_whitespace().map(str::to_owned).collect()),
                        input: message_of("input"),
                        output: message_of("output"),
                        faults: children_named(operation, "fault")
                            .filter_map(|fault| fault.attribute("message"))
                            .map(|message| local_ref(message).to_owned())
                            .collect(),
                    },
                );
            }

            self.port_types.insert(name.to_owned(), operations);
        }
    }

    /// Builds the wire part for a message. Element parts point at schema
    /// elements; `type` parts are gathered into a wrapper named after the
    /// message.
    fn message_part(
        &self,
        message_name: &str,
        selected: Option<&[String]>,
        order: Option<&[String]>,
    ) -> Result<Option<(Part, bool)>, Error> {
        let Some(message) = self.messages.get(message_name) else {
            warn!(message = message_name, "unknown message");
            return Ok(None);
        };

        let mut parts: Vec<&MessagePart> = message
            .parts
            .iter()
            .filter(|part| selected.map_or(true, |names| names.contains(&part.name)))
            .collect();

        if let Some(first) = parts.first() {
            if let Some((local, namespace)) = &first.element {
                let element = self
                    .types
                    .lookup(local, TypeKind::Element, namespace)
                    .or_else(|| self.types.find_by_name(local, TypeKind::Element));
                if let Some(id) = element {
                    let part = Part {
                        name: local.clone(),
                        namespace: Some(namespace.clone()),
                        descriptor: Descriptor::Ref(id),
                    };
                    return Ok(Some((part, self.types.def(id).qualified)));
                }

                // Axis points element parts at complex types.
                let id = self
                    .types
                    .lookup(local, TypeKind::Complex, namespace)
                    .or_else(|| self.types.find_by_name(local, TypeKind::Complex))
                    .ok_or_else(|| Error::UnresolvedType {
                        name: local.clone(),
                        namespace: namespace.clone(),
                    })?;
                let part = Part {
                    name: message_name.to_owned(),
                    namespace: Some(message.namespace.clone()),
                    descriptor: Descriptor::sequence([(first.name.clone(), Descriptor::Ref(id))]),
                };
                return Ok(Some((part, false)));
            }
        }

        if let Some(order) = order {
            parts.sort_by_key(|part| {
                order
                    .iter()
                    .position(|name| *name == part.name)
                    .unwrap_or(usize::MAX)
            });
        }

        let descriptor = Descriptor::sequence(parts.iter().map(|part| {
            (
                part.name.clone(),
                part.ty.clone().unwrap_or(Descriptor::AnyType),
            )
        }));
        let part = Part {
            name: message_name.to_owned(),
            namespace: Some(message.namespace.clone()),
            descriptor,
        };
        Ok(Some((part, false)))
    }

    fn collect_bindings(&mut self, definition: &Element) -> Result<(), Error> {
        let target = definition.attribute("targetNamespace").unwrap_or_default();

        for binding in children_named(definition, "binding") {
            let [name, ty] = get_attributes(binding, ["name", "type"]);
            let (Some(name), Some(ty)) = (name, ty) else {
                warn!("binding without a name or type");
                continue;
            };

            let port_type_name = local_ref(ty);
            let Some(port_type) = self.port_types.get(port_type_name) else {
                warn!(
                    binding = name,
                    port_type = port_type_name,
                    "binding refers to an unknown port type, skipping"
                );
                continue;
            };

            let soap_binding = soap_child(binding, "binding");
            let soap_version = soap_binding
                .and_then(Element::namespace)
                .and_then(SoapVersion::from_binding_namespace);
            let binding_style = soap_binding
                .and_then(|soap| soap.attribute("style"))
                .map(Style::from_attribute);

            let mut operations = IndexMap::new();
            for operation in children_named(binding, "operation") {
                let Some(operation_name) = operation.attribute("name") else {
                    continue;
                };
                let Some(declared) = port_type.get(operation_name) else {
                    warn!(
                        binding = name,
                        operation = operation_name,
                        "operation missing from port type, skipping"
                    );
                    continue;
                };

                let mut built =
                    self.build_operation(operation_name, operation, declared, binding_style, target)?;
                built.soap_version = soap_version;
                operations.insert(operation_name.to_owned(), built);
            }

            debug!(binding = name, operations = operations.len(), "parsed binding");
            self.bindings.insert(
                name.to_owned(),
                Binding {
                    soap_version,
                    transport: soap_binding
                        .and_then(|soap| soap.attribute("transport"))
                        .map(str::to_owned),
                    operations,
                },
            );
        }

        Ok(())
    }

    fn build_operation(
        &self,
        name: &str,
        operation: &Element,
        declared: &PortTypeOperation,
        binding_style: Option<Style>,
        target: &str,
    ) -> Result<Operation, Error> {
        let soap_operation = soap_child(operation, "operation");
        let style = soap_operation
            .and_then(|soap| soap.attribute("style"))
            .map(Style::from_attribute)
            .or(binding_style)
            .unwrap_or_default();

        let input_node = operation.child("input");
        let input_body = input_node.and_then(|input| soap_child(input, "body"));
        let input = match &declared.input {
            Some(message) => self.message_part(
                message,
                body_parts(input_body).as_deref(),
                declared.parameter_order.as_deref(),
            )?,
            None => None,
        };

        // Each header names its own message, which need not be the input one.
        let mut header_fields = Vec::new();
        for header in input_node
            .into_iter()
            .flat_map(|input| input.children())
            .filter(|child| child.local_name() == "header" && is_soap(child))
        {
            let message = header
                .attribute("message")
                .map(local_ref)
                .or(declared.input.as_deref());
            let selected = header.attribute("part").map(|part| vec![part.to_owned()]);

            if let Some(message) = message {
                if let Some((part, _)) = self.message_part(message, selected.as_deref(), None)? {
                    header_fields.push(Field {
                        name: part.name,
                        descriptor: part.descriptor,
                    });
                }
            }
        }

        let output_body = operation
            .child("output")
            .and_then(|output| soap_child(output, "body"));
        let output = match &declared.output {
            Some(message) => self
                .message_part(message, body_parts(output_body).as_deref(), None)?
                .map(|(part, _)| part),
            None => None,
        };

        let mut faults = IndexMap::new();
        for message in &declared.faults {
            if let Some((part, _)) = self.message_part(message, None, None)? {
                faults.insert(part.name, part.descriptor);
            }
        }

        let (input, qualified) = match input {
            Some((part, qualified)) => (Some(part), qualified),
            None => (None, false),
        };

        let namespace = input_body
            .and_then(|body| body.attribute("namespace"))
            .map(str::to_owned)
            .or_else(|| input.as_ref().and_then(|part| part.namespace.clone()))
            .or_else(|| (!target.is_empty()).then(|| target.to_owned()));

        let method = if style == Style::Rpc || self.dialect.method_from_operation {
            name.to_owned()
        } else {
            input
                .as_ref()
                .map_or_else(|| name.to_owned(), |part| part.name.clone())
        };

        Ok(Operation {
            name: name.to_owned(),
            method,
            input,
            output,
            header: (!header_fields.is_empty()).then(|| Descriptor::Sequence(header_fields)),
            faults,
            action: soap_operation
                .and_then(|soap| soap.attribute("soapAction"))
                .map(str::to_owned),
            documentation: declared.documentation.clone(),
            style,
            soap_version: None,
            namespace,
            qualified,
        })
    }

    fn collect_services(&self, definition: &Element, services: &mut IndexMap<String, Service>) {
        for service in children_named(definition, "service") {
            let name = service.attribute("name").unwrap_or_default();
            let mut ports = IndexMap::new();

            for port in children_named(service, "port") {
                let [port_name, binding_name] = get_attributes(port, ["name", "binding"]);
                let port_name = port_name.unwrap_or_default();
                let Some(binding_name) = binding_name.map(local_ref) else {
                    warn!(port = port_name, "port without a binding, skipping");
                    continue;
                };
                let Some(binding) = self.bindings.get(binding_name) else {
                    warn!(
                        port = port_name,
                        binding = binding_name,
                        "port refers to an unknown binding, skipping"
                    );
                    continue;
                };

                let address = port.child("address");
                let soap_uri = address.and_then(Element::namespace);
                let soap_version = match address {
                    Some(_) => soap_uri.and_then(SoapVersion::from_binding_namespace),
                    None => binding.soap_version,
                };

                ports.insert(
                    port_name.to_owned(),
                    Port {
                        name: port_name.to_owned(),
                        binding: binding_name.to_owned(),
                        location: address
                            .and_then(|address| address.attribute("location"))
                            .map(str::to_owned),
                        soap_version,
                        soap_uri: soap_uri.map(str::to_owned),
                        transport: binding.transport.clone(),
                        operations: binding.operations.clone(),
                    },
                );
            }

            services.insert(
                name.to_owned(),
                Service {
                    name: name.to_owned(),
                    documentation: documentation(service),
                    ports,
                },
            );
        }
    }

    /// Stands in for a missing `service` element: one unnamed port without
    /// a location, carrying the first binding's operations.
    fn default_service(&self) -> Service {
        let mut ports = IndexMap::new();
        if let Some((binding_name, binding)) = self.bindings.first() {
            ports.insert(
                String::new(),
                Port {
                    name: String::new(),
                    binding: binding_name.clone(),
                    location: None,
                    soap_version: binding.soap_version,
                    soap_uri: None,
                    transport: binding.transport.clone(),
                    operations: binding.operations.clone(),
                },
            );
        }

        Service {
            name: String::new(),
            documentation: None,
            ports,
        }
    }
}
