use simplesoap_wsdl::{
    dialect::ServerDialect,
    fetch::DefaultFetcher,
    types::{
        Descriptor, Field, Operation, Port, SoapVersion, TypeId, TypeTable, SOAP11_ENV_NS, SOAP12_ENV_NS,
        XSD_NS, XSI_NS,
    },
    FileCache, Services,
};
use simplesoap_xml::Element;
use std::{path::PathBuf, time::Duration};
use tracing::{debug, info, trace};
use typed_builder::TypedBuilder;

use crate::{
    error::{Error, SoapFault},
    marshal::Marshaller,
    transport::{HttpSettings, HttpTransport, Transport, TransportError},
    unmarshal::Unmarshaller,
    value::{Map, Value},
};

/// Envelope root declaring `prefix` for `version`, plus the `xsi`/`xsd`
/// prefixes unless told otherwise.
pub(crate) fn envelope(prefix: &str, version: SoapVersion, declare_xsd: bool) -> Element {
    let mut envelope = Element::new(format!("{}:Envelope", prefix));
    envelope.set_attribute(format!("xmlns:{}", prefix), version.envelope_namespace());
    if declare_xsd {
        envelope.set_attribute("xmlns:xsi", XSI_NS);
        envelope.set_attribute("xmlns:xsd", XSD_NS);
    }
    envelope
}

pub(crate) fn body_of(document: &Element) -> Result<&Element, Error> {
    document
        .find_first("Body", &[SOAP11_ENV_NS, SOAP12_ENV_NS])
        .ok_or_else(|| Error::MalformedMessage("message has no Body".to_owned()))
}

fn fault_of(body: &Element) -> Option<&Element> {
    body.children().find(|child| child.local_name() == "Fault")
}

/// Renders a descriptor as a short signature, e.g. `{a: int, b: [string]}`.
pub fn signature(types: &TypeTable, descriptor: &Descriptor) -> String {
    fn render(types: &TypeTable, descriptor: &Descriptor, seen: &mut Vec<TypeId>) -> String {
        match descriptor {
            Descriptor::Primitive(primitive) => primitive.xsd_name().to_owned(),
            Descriptor::Sequence(fields) => {
                let fields: Vec<String> = fields
                    .iter()
                    .map(|field| format!("{}: {}", field.name, render(types, &field.descriptor, seen)))
                    .collect();
                format!("{{{}}}", fields.join(", "))
            }
            Descriptor::Array(item) => format!("[{}]", render(types, item, seen)),
            Descriptor::Tuple(items) => {
                let items: Vec<String> = items.iter().map(|item| render(types, item, seen)).collect();
                format!("({})", items.join(", "))
            }
            Descriptor::AnyType => "anyType".to_owned(),
            Descriptor::Ref(id) if seen.contains(id) => types.name(*id).to_owned(),
            Descriptor::Ref(id) => match types.body(*id) {
                Some(body) => {
                    seen.push(*id);
                    let rendered = render(types, body, seen);
                    seen.pop();
                    rendered
                }
                None => "anyType".to_owned(),
            },
        }
    }

    render(types, descriptor, &mut Vec::new())
}

#[derive(Debug, Clone, TypedBuilder)]
pub struct ClientOptions {
    /// Endpoint; overrides the port address of a service description.
    #[builder(default, setter(into, strip_option))]
    pub location: Option<String>,
    /// Base `SOAPAction`, completed with the method name when there is no
    /// service description.
    #[builder(default, setter(into, strip_option))]
    pub action: Option<String>,
    #[builder(default, setter(into))]
    pub namespace: String,
    /// Envelope prefix: `soap`, `soapenv` and `soap11` select SOAP 1.1,
    /// `soap12` selects SOAP 1.2.
    #[builder(default, setter(into, strip_option))]
    pub soap_ns: Option<String>,
    /// Prefix bound to the method namespace. Without one the method element
    /// declares it as its default namespace.
    #[builder(default, setter(into, strip_option))]
    pub ns: Option<String>,
    #[builder(default)]
    pub dialect: ServerDialect,
    #[builder(default)]
    pub http_headers: Vec<(String, String)>,
    #[builder(default = true)]
    pub strict: bool,
    /// Logs every exchanged message at info level.
    #[builder(default)]
    pub trace: bool,
    /// Keeps parsed service descriptions between runs.
    #[builder(default, setter(into, strip_option))]
    pub cache_dir: Option<PathBuf>,
    #[builder(default, setter(strip_option))]
    pub timeout: Option<Duration>,
    #[builder(default, setter(strip_option))]
    pub credentials: Option<(String, String)>,
}

impl Default for ClientOptions {
    fn default() -> Self {
        Self::builder().build()
    }
}

struct Request {
    location: String,
    headers: Vec<(String, String)>,
    envelope: Element,
}

/// SOAP client, driven by a service description when one is given.
pub struct Client {
    options: ClientOptions,
    services: Services,
    transport: Box<dyn Transport>,
    version: Option<SoapVersion>,
    headers: Vec<(String, Value)>,
    raw_headers: Vec<Element>,
    last_request: Option<String>,
    last_response: Option<String>,
}

impl Client {
    /// A client without a service description: arguments go out as given
    /// and responses are read leniently.
    pub fn new(options: ClientOptions) -> Result<Self, Error> {
        Self::from_services(Services::default(), options)
    }

    /// Parses the WSDL at `url`, which may be a URL or a local path.
    pub fn from_wsdl(url: &str, options: ClientOptions) -> Result<Self, Error> {
        let fetcher = DefaultFetcher::default();
        let services = match &options.cache_dir {
            Some(directory) => simplesoap_wsdl::parse_cached(
                url,
                &fetcher,
                &options.dialect,
                &FileCache::new(directory),
            )?,
            None => simplesoap_wsdl::parse_with(url, &fetcher, &options.dialect)?,
        };
        Self::from_services(services, options)
    }

    pub fn from_services(services: Services, options: ClientOptions) -> Result<Self, Error> {
        let settings = HttpSettings {
            timeout: options.timeout,
            headers: Vec::new(),
            credentials: options.credentials.clone(),
        };
        let transport = HttpTransport::new(settings)?;

        Ok(Self {
            version: options.soap_ns.as_deref().and_then(SoapVersion::from_prefix),
            options,
            services,
            transport: Box::new(transport),
            headers: Vec::new(),
            raw_headers: Vec::new(),
            last_request: None,
            last_response: None,
        })
    }

    /// Replaces the HTTP transport.
    pub fn with_transport(mut self, transport: impl Transport + 'static) -> Self {
        self.transport = Box::new(transport);
        self
    }

    pub fn options(&self) -> &ClientOptions {
        &self.options
    }

    pub fn services(&self) -> &Services {
        &self.services
    }

    /// Sets a header sent with every request, replacing one of the same name.
    pub fn set_header(&mut self, name: impl Into<String>, value: impl Into<Value>) {
        let name = name.into();
        let value = value.into();
        match self.headers.iter_mut().find(|(key, _)| *key == name) {
            Some((_, existing)) => *existing = value,
            None => self.headers.push((name, value)),
        }
    }

    /// Adds an already built header element, copied as is into every request.
    pub fn set_raw_header(&mut self, header: Element) {
        self.raw_headers.push(header);
    }

    pub fn last_request(&self) -> Option<&str> {
        self.last_request.as_deref()
    }

    pub fn last_response(&self) -> Option<&str> {
        self.last_response.as_deref()
    }

    pub fn call(&mut self, method: &str, args: Map) -> Result<Value, Error> {
        self.call_with_headers(method, args, &[])
    }

    /// Names positional arguments after the declared input fields.
    pub fn call_positional(&mut self, method: &str, args: Vec<Value>) -> Result<Value, Error> {
        let names: Vec<String> = match self.lookup(method)? {
            Some((_, operation)) => self
                .services
                .input_fields(operation)
                .iter()
                .map(|field| field.name.clone())
                .collect(),
            None => Vec::new(),
        };

        if args.len() > names.len() {
            return Err(Error::InvalidArguments {
                method: method.to_owned(),
                arguments: (names.len()..args.len()).map(|index| format!("#{}", index)).collect(),
            });
        }

        self.call(method, names.into_iter().zip(args).collect())
    }

    /// Like [`Client::call`], with extra header elements for this call only.
    pub fn call_with_headers(
        &mut self,
        method: &str,
        args: Map,
        headers: &[Element],
    ) -> Result<Value, Error> {
        let Some(document) = self.exchange(method, &args, headers)? else {
            return Ok(Value::Null);
        };
        let Some(response) = body_of(&document)?.children().next() else {
            return Ok(Value::Null);
        };

        let output = match self.lookup(method)? {
            Some((_, operation)) => match &operation.output {
                Some(part) => part.descriptor.clone(),
                None => return Ok(Value::Null),
            },
            None => Descriptor::Sequence(Vec::new()),
        };
        let strict = self.options.strict && !self.services.services.is_empty();

        let unmarshaller =
            Unmarshaller::new(&self.services.types, &self.options.dialect, strict).with_root(&document);
        Ok(Value::Map(unmarshaller.unmarshal(response, &output)?))
    }

    /// Returns the first element of the response body without conversion.
    pub fn call_xml(&mut self, method: &str, args: Map) -> Result<Element, Error> {
        let document = self
            .exchange(method, &args, &[])?
            .ok_or_else(|| Error::MalformedMessage("empty response".to_owned()))?;

        let first = body_of(&document)?.children().next().cloned();
        first.ok_or_else(|| Error::MalformedMessage("response body is empty".to_owned()))
    }

    /// Signature, documentation and headers of an operation.
    pub fn help(&self, method: &str) -> Result<String, Error> {
        let (_, operation) = self
            .lookup(method)?
            .ok_or_else(|| Error::UnknownMethod(method.to_owned()))?;
        let types = &self.services.types;
        let describe = |descriptor: Option<&Descriptor>| {
            descriptor.map_or_else(String::new, |descriptor| signature(types, descriptor))
        };

        Ok(format!(
            "{}({})\n -> {}\n\n{}\nHeaders: {}",
            operation.name,
            describe(operation.input.as_ref().map(|part| &part.descriptor)),
            describe(operation.output.as_ref().map(|part| &part.descriptor)),
            operation.documentation.as_deref().unwrap_or_default(),
            describe(operation.header.as_ref()),
        ))
    }

    /// The operation and its port, `None` without a service description.
    fn lookup(&self, method: &str) -> Result<Option<(&Port, &Operation)>, Error> {
        if self.services.services.is_empty() {
            return Ok(None);
        }

        let version = self.version.unwrap_or(SoapVersion::Soap11);
        self.services
            .operation(method, Some(version))
            .or_else(|| self.services.operation(method, None))
            .map(Some)
            .ok_or_else(|| Error::UnknownMethod(method.to_owned()))
    }

    fn build_request(&self, method: &str, args: &Map, extra: &[Element]) -> Result<Request, Error> {
        let found = self.lookup(method)?;
        let port = found.map(|(port, _)| port);
        let operation = found.map(|(_, operation)| operation);
        let dialect = &self.options.dialect;
        let marshaller = Marshaller::new(&self.services.types, dialect);

        let location = self
            .options
            .location
            .clone()
            .or_else(|| port.and_then(|port| port.location.clone()))
            .ok_or_else(|| Error::MissingLocation(method.to_owned()))?;

        let version = self
            .version
            .or_else(|| port.and_then(|port| port.soap_version))
            .unwrap_or(SoapVersion::Soap11);
        let prefix = match (&self.options.soap_ns, version) {
            (Some(prefix), _) => prefix.as_str(),
            (None, SoapVersion::Soap12) => "soap12",
            (None, SoapVersion::Soap11) if self.options.ns.is_some() => "soapenv",
            (None, SoapVersion::Soap11) => "soap",
        };
        let namespace = operation
            .and_then(|operation| operation.namespace.as_deref())
            .unwrap_or(&self.options.namespace);
        let ns = self.options.ns.as_deref();

        let mut envelope = envelope(prefix, version, !dialect.omit_xsd_declarations);
        if let Some(ns) = ns {
            envelope.set_attribute(format!("xmlns:{}", ns), namespace);
        }

        let header = envelope.add_child(format!("{}:Header", prefix));
        let persistent = Value::Pairs(self.headers.clone());
        match operation.and_then(|operation| operation.header.as_ref()) {
            Some(declared) => {
                let sorted = marshaller.sort_by_descriptor(&persistent, declared);
                marshaller.marshal_entries(header, &sorted, Some(declared), ns);
            }
            None => marshaller.marshal_entries(header, &persistent, None, ns),
        }
        for raw in self.raw_headers.iter().chain(extra) {
            header.import(raw);
        }

        let body = envelope.add_child(format!("{}:Body", prefix));
        if !(args.is_empty() && dialect.omit_empty_method) {
            let name = operation.map_or(method, |operation| operation.method.as_str());
            let element = match ns {
                Some(ns) => body.add_child(format!("{}:{}", ns, name)),
                None => {
                    let element = body.add_child(name);
                    if !namespace.is_empty() {
                        element.set_attribute("xmlns", namespace);
                    }
                    element
                }
            };

            let qualified = operation.map_or(true, |operation| operation.qualified);
            let params_prefix = ns.filter(|_| qualified && !dialect.unqualified_params);

            let input = operation.and_then(|operation| operation.input.as_ref());
            match input {
                Some(part) => {
                    let fields = self.services.types.entries(&part.descriptor);
                    let unknown: Vec<String> = args
                        .keys()
                        .filter(|key| fields.field(key).is_none())
                        .cloned()
                        .collect();
                    if !unknown.is_empty() {
                        return Err(Error::InvalidArguments {
                            method: method.to_owned(),
                            arguments: unknown,
                        });
                    }

                    let sorted = marshaller.sort_by_descriptor(&Value::Map(args.clone()), &part.descriptor);
                    marshaller.marshal_entries(element, &sorted, Some(&part.descriptor), params_prefix);
                }
                None if operation.is_some() && !args.is_empty() => {
                    return Err(Error::InvalidArguments {
                        method: method.to_owned(),
                        arguments: args.keys().cloned().collect(),
                    });
                }
                None => marshaller.marshal_entries(element, &Value::Map(args.clone()), None, params_prefix),
            }
        }

        let action = match operation {
            Some(operation) => operation.action.clone().or_else(|| self.options.action.clone()),
            None => self.options.action.as_ref().map(|action| format!("{}{}", action, method)),
        };
        let content_type = match version {
            SoapVersion::Soap11 => "text/xml; charset=\"UTF-8\"",
            SoapVersion::Soap12 => "application/soap+xml; charset=\"UTF-8\"",
        };

        let mut headers = vec![("Content-Type".to_owned(), content_type.to_owned())];
        if let Some(action) = action {
            headers.push(("SOAPAction".to_owned(), action));
        }
        headers.extend(self.options.http_headers.iter().cloned());

        Ok(Request {
            location,
            headers,
            envelope,
        })
    }

    /// Sends one request. Faults take precedence over the HTTP status; an
    /// empty successful response yields `None`.
    fn exchange(&mut self, method: &str, args: &Map, extra: &[Element]) -> Result<Option<Element>, Error> {
        let request = self.build_request(method, args, extra)?;
        let xml = request.envelope.to_xml()?;
        if self.options.trace {
            info!(%method, location = %request.location, request = %xml, "sending");
        } else {
            info!(%method, location = %request.location, "sending");
            trace!(request = %xml);
        }
        self.last_request = Some(xml.clone());

        let response = self
            .transport
            .request(&request.location, "POST", xml.into_bytes(), &request.headers)?;
        let text = String::from_utf8_lossy(&response.body).into_owned();
        if self.options.trace {
            info!(status = response.status, response = %text, "received");
        } else {
            trace!(status = response.status, response = %text);
        }
        self.last_response = Some(text.clone());

        if text.trim().is_empty() && response.is_success() {
            return Ok(None);
        }

        let document = match Element::parse(&text) {
            Ok(document) => document,
            Err(error) if response.is_success() => return Err(error.into()),
            Err(_) => {
                return Err(TransportError::Status {
                    status: response.status,
                    body: text,
                }
                .into())
            }
        };

        if let Some(fault) = body_of(&document).ok().and_then(fault_of) {
            let fault = self.read_fault(method, fault, &document)?;
            debug!(%method, code = %fault.code, "received fault");
            return Err(Error::Fault(fault));
        }

        if !response.is_success() {
            return Err(TransportError::Status {
                status: response.status,
                body: text,
            }
            .into());
        }

        Ok(Some(document))
    }

    /// Reads SOAP 1.1 `faultcode`/`faultstring`/`detail` or SOAP 1.2
    /// `Code/Value`/`Reason/Text`/`Detail`. The detail is typed through the
    /// faults the operation declares.
    fn read_fault(&self, method: &str, fault: &Element, document: &Element) -> Result<SoapFault, Error> {
        let code = fault
            .child("faultcode")
            .or_else(|| fault.child("Code").and_then(|code| code.child("Value")))
            .map(|code| code.text().trim().to_owned())
            .unwrap_or_default();
        let message = fault
            .child("faultstring")
            .or_else(|| fault.child("Reason").and_then(|reason| reason.child("Text")))
            .map(|message| message.text().trim().to_owned())
            .unwrap_or_default();

        let mut soap_fault = SoapFault::new(code, message);
        let Some(detail) = fault.child("detail").or_else(|| fault.child("Detail")) else {
            return Ok(soap_fault);
        };

        if detail.has_children() {
            let declared = match self.lookup(method).ok().flatten() {
                Some((_, operation)) => Descriptor::Sequence(
                    operation
                        .faults
                        .iter()
                        .map(|(name, descriptor)| Field {
                            name: name.clone(),
                            descriptor: descriptor.clone(),
                        })
                        .collect(),
                ),
                None => Descriptor::Sequence(Vec::new()),
            };
            let unmarshaller =
                Unmarshaller::new(&self.services.types, &self.options.dialect, false).with_root(document);
            soap_fault.detail = Some(Value::Map(unmarshaller.unmarshal(detail, &declared)?));
        } else if !detail.text().trim().is_empty() {
            soap_fault.detail = Some(Value::String(detail.text().trim().to_owned()));
        }

        Ok(soap_fault)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use simplesoap_wsdl::types::{Primitive, TypeKind};

    #[test]
    fn envelopes_declare_their_prefixes() {
        let envelope = envelope("soap12", SoapVersion::Soap12, false);
        assert_eq!(envelope.namespace(), Some(SOAP12_ENV_NS));
        assert!(envelope.attribute("xmlns:xsi").is_none());

        let envelope = super::envelope("soap", SoapVersion::Soap11, true);
        assert_eq!(envelope.attribute("xmlns:xsd"), Some(XSD_NS));
    }

    #[test]
    fn signatures_stop_at_cycles() {
        let mut types = TypeTable::default();
        let node = types.intern("Node", TypeKind::Complex, "urn:t");
        types.define(
            "Node",
            TypeKind::Complex,
            "urn:t",
            Descriptor::sequence([
                ("value", Descriptor::Primitive(Primitive::Int)),
                ("children", Descriptor::array(Descriptor::Ref(node))),
            ]),
        );

        assert_eq!(
            signature(&types, &Descriptor::Ref(node)),
            "{value: int, children: [Node]}"
        );
    }

    #[test]
    fn options_default_to_strict() {
        let options = ClientOptions::default();
        assert!(options.strict);
        assert!(options.location.is_none());

        let options = ClientOptions::builder()
            .location("http://localhost/soap")
            .soap_ns("soap12")
            .strict(false)
            .build();
        assert_eq!(options.location.as_deref(), Some("http://localhost/soap"));
        assert!(!options.strict);
    }
}
