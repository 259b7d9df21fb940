use indexmap::IndexMap;
use simplesoap_wsdl::{
    dialect::ServerDialect,
    types::{Descriptor, SoapVersion, TypeId, TypeTable},
};
use simplesoap_xml::Element;
use tracing::{debug, info, warn};

use crate::{
    error::{Error, SoapFault},
    marshal::Marshaller,
    soap::{body_of, envelope},
    unmarshal::Unmarshaller,
    value::{Map, Value},
};

pub type Handler = Box<dyn Fn(Map) -> Result<Value, SoapFault> + Send + Sync>;

struct Method {
    handler: Handler,
    returns: Descriptor,
    args: Descriptor,
    documentation: Option<String>,
}

/// Placeholder value for `descriptor`: primitives become type markers,
/// which marshal as comments.
fn sample(types: &TypeTable, descriptor: &Descriptor, seen: &mut Vec<TypeId>) -> Value {
    match descriptor {
        Descriptor::Primitive(primitive) => Value::Type(*primitive),
        Descriptor::Sequence(fields) => Value::Map(
            fields
                .iter()
                .map(|field| (field.name.clone(), sample(types, &field.descriptor, seen)))
                .collect(),
        ),
        Descriptor::Array(item) => Value::List(vec![sample(types, item, seen)]),
        Descriptor::Tuple(items) => Value::List(items.iter().map(|item| sample(types, item, seen)).collect()),
        Descriptor::AnyType => Value::Null,
        Descriptor::Ref(id) if seen.contains(id) => Value::Null,
        Descriptor::Ref(id) => match types.body(*id) {
            Some(body) => {
                seen.push(*id);
                let value = sample(types, body, seen);
                seen.pop();
                value
            }
            None => Value::Null,
        },
    }
}

/// Routes SOAP requests to registered handlers by the name of the first
/// element in the body.
pub struct SoapDispatcher {
    namespace: String,
    prefix: Option<String>,
    soap_ns: String,
    version: SoapVersion,
    types: TypeTable,
    dialect: ServerDialect,
    methods: IndexMap<String, Method>,
}

impl SoapDispatcher {
    pub fn new(namespace: impl Into<String>) -> Self {
        Self {
            namespace: namespace.into(),
            prefix: None,
            soap_ns: "soap".to_owned(),
            version: SoapVersion::Soap11,
            types: TypeTable::default(),
            dialect: ServerDialect::default(),
            methods: IndexMap::new(),
        }
    }

    /// Envelope prefix of responses; `soap12` answers with SOAP 1.2.
    pub fn with_soap_ns(mut self, soap_ns: impl Into<String>) -> Self {
        self.soap_ns = soap_ns.into();
        self.version = SoapVersion::from_prefix(&self.soap_ns).unwrap_or(SoapVersion::Soap11);
        self
    }

    /// Prefix bound to the service namespace in responses.
    pub fn with_prefix(mut self, prefix: impl Into<String>) -> Self {
        self.prefix = Some(prefix.into());
        self
    }

    /// Named types that registered descriptors refer to.
    pub fn with_types(mut self, types: TypeTable) -> Self {
        self.types = types;
        self
    }

    pub fn with_dialect(mut self, dialect: ServerDialect) -> Self {
        self.dialect = dialect;
        self
    }

    pub fn register<F>(&mut self, name: impl Into<String>, handler: F, returns: Descriptor, args: Descriptor)
    where
        F: Fn(Map) -> Result<Value, SoapFault> + Send + Sync + 'static,
    {
        let name = name.into();
        debug!(method = %name, "registering method");
        self.methods.insert(
            name,
            Method {
                handler: Box::new(handler),
                returns,
                args,
                documentation: None,
            },
        );
    }

    pub fn set_documentation(&mut self, name: &str, documentation: impl Into<String>) {
        if let Some(method) = self.methods.get_mut(name) {
            method.documentation = Some(documentation.into());
        }
    }

    /// Registered methods and their documentation.
    pub fn list_methods(&self) -> Vec<(&str, Option<&str>)> {
        self.methods
            .iter()
            .map(|(name, method)| (name.as_str(), method.documentation.as_deref()))
            .collect()
    }

    /// Answers one request. Handler faults and malformed requests come back
    /// as fault responses; only a failure to write the response is an error.
    pub fn dispatch(&self, xml: &str) -> Result<String, Error> {
        let response = match self.answer(xml) {
            Ok(response) => response,
            Err(fault) => {
                warn!(code = %fault.code, message = %fault.message, "answering with a fault");
                self.fault_envelope(&fault)
            }
        };
        Ok(response.to_xml()?)
    }

    fn answer(&self, xml: &str) -> Result<Element, SoapFault> {
        let client_fault = |error: Error| SoapFault::new("Client", error.to_string());

        let request = Element::parse(xml).map_err(|error| client_fault(error.into()))?;
        let body = body_of(&request).map_err(client_fault)?;
        let call = body
            .children()
            .next()
            .ok_or_else(|| SoapFault::new("Client", "request body is empty"))?;
        let name = call.local_name();
        let method = self
            .methods
            .get(name)
            .ok_or_else(|| SoapFault::new("Client", format!("unknown method {}", name)))?;

        let args = Unmarshaller::new(&self.types, &self.dialect, false)
            .with_root(&request)
            .unmarshal(call, &method.args)
            .map_err(client_fault)?;

        info!(method = name, "dispatching");
        let returned = (method.handler)(args).map_err(|fault| SoapFault {
            code: format!("Server.{}", fault.code),
            ..fault
        })?;

        let mut envelope = self.envelope();
        let response = self.method_element(&mut envelope, &format!("{}Response", name));
        self.write_returned(response, &returned, &method.returns);
        Ok(envelope)
    }

    /// Mappings fill the response element directly; other values go under
    /// the first declared return field.
    fn write_returned(&self, response: &mut Element, returned: &Value, returns: &Descriptor) {
        let marshaller = Marshaller::new(&self.types, &self.dialect);
        let prefix = self.prefix.as_deref();

        if returned.is_mapping() {
            let sorted = marshaller.sort_by_descriptor(returned, returns);
            marshaller.marshal_entries(response, &sorted, Some(returns), prefix);
            return;
        }

        match self.types.entries(returns).fields().first() {
            Some(field) => {
                marshaller.marshal(response, &field.name, returned, Some(&field.descriptor), prefix)
            }
            None => marshaller.marshal(response, "return", returned, None, prefix),
        }
    }

    fn envelope(&self) -> Element {
        let mut envelope = envelope(&self.soap_ns, self.version, true);
        if let Some(prefix) = &self.prefix {
            envelope.set_attribute(format!("xmlns:{}", prefix), self.namespace.as_str());
        }
        envelope
    }

    fn method_element<'e>(&self, envelope: &'e mut Element, name: &str) -> &'e mut Element {
        let body = envelope.add_child(format!("{}:Body", self.soap_ns));
        match &self.prefix {
            Some(prefix) => body.add_child(format!("{}:{}", prefix, name)),
            None => {
                let element = body.add_child(name);
                if !self.namespace.is_empty() {
                    element.set_attribute("xmlns", self.namespace.as_str());
                }
                element
            }
        }
    }

    fn fault_envelope(&self, fault: &SoapFault) -> Element {
        let mut envelope = self.envelope();
        let body = envelope.add_child(format!("{}:Body", self.soap_ns));
        let element = body.add_child(format!("{}:Fault", self.soap_ns));

        let detail = match self.version {
            SoapVersion::Soap11 => {
                element.add_child_text("faultcode", fault.code.as_str());
                element.add_child_text("faultstring", fault.message.as_str());
                "detail".to_owned()
            }
            SoapVersion::Soap12 => {
                element
                    .add_child(format!("{}:Code", self.soap_ns))
                    .add_child_text(format!("{}:Value", self.soap_ns), fault.code.as_str());
                element
                    .add_child(format!("{}:Reason", self.soap_ns))
                    .add_child_text(format!("{}:Text", self.soap_ns), fault.message.as_str());
                format!("{}:Detail", self.soap_ns)
            }
        };

        if let Some(value) = &fault.detail {
            let marshaller = Marshaller::new(&self.types, &self.dialect);
            let detail = element.add_child(detail);
            match value.to_text() {
                Some(text) => detail.add_text(text),
                None => marshaller.marshal_entries(detail, value, None, None),
            }
        }

        envelope
    }

    /// Sample request and response for a method, with the expected types
    /// in comments, and its documentation.
    pub fn help(&self, name: &str) -> Result<(String, String, Option<String>), Error> {
        let method = self
            .methods
            .get(name)
            .ok_or_else(|| Error::UnknownMethod(name.to_owned()))?;
        let marshaller = Marshaller::new(&self.types, &self.dialect);

        let mut request = self.envelope();
        let call = self.method_element(&mut request, name);
        let args = sample(&self.types, &method.args, &mut Vec::new());
        marshaller.marshal_entries(call, &args, Some(&method.args), None);

        let mut response = self.envelope();
        let element = self.method_element(&mut response, &format!("{}Response", name));
        let returns = sample(&self.types, &method.returns, &mut Vec::new());
        marshaller.marshal_entries(element, &returns, Some(&method.returns), None);

        Ok((
            request.to_pretty_xml()?,
            response.to_pretty_xml()?,
            method.documentation.clone(),
        ))
    }
}
