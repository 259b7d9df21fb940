use simplesoap_wsdl::{
    error::Error,
    fetch::{self, DefaultFetcher, Fetcher},
    types::{Descriptor, Primitive, Services, SoapVersion, Style},
    ServerDialect,
};
use std::{cell::RefCell, collections::HashMap};
use tracing_test::traced_test;
use url::Url;

fn data(name: &str) -> String {
    format!("{}/tests/data/{}", env!("CARGO_MANIFEST_DIR"), name)
}

fn field_names(fields: &[simplesoap_wsdl::types::Field]) -> Vec<&str> {
    fields.iter().map(|field| field.name.as_str()).collect()
}

#[derive(Default)]
struct RecordingFetcher {
    inner: DefaultFetcher,
    fetched: RefCell<Vec<Url>>,
}

impl Fetcher for RecordingFetcher {
    fn fetch(&self, url: &Url) -> Result<Vec<u8>, Error> {
        self.fetched.borrow_mut().push(url.clone());
        self.inner.fetch(url)
    }
}

/// Serves documents from memory, keyed by URL.
#[derive(Default)]
struct MemoryFetcher {
    documents: HashMap<String, &'static str>,
    fetched: RefCell<Vec<String>>,
}

impl MemoryFetcher {
    fn with(mut self, url: &str, document: &'static str) -> Self {
        self.documents.insert(url.to_owned(), document);
        self
    }
}

impl Fetcher for MemoryFetcher {
    fn fetch(&self, url: &Url) -> Result<Vec<u8>, Error> {
        self.fetched.borrow_mut().push(url.to_string());
        self.documents
            .get(url.as_str())
            .map(|document| document.as_bytes().to_vec())
            .ok_or_else(|| std::io::Error::new(std::io::ErrorKind::NotFound, url.to_string()).into())
    }
}

#[test]
fn document_literal_service() {
    let services = simplesoap_wsdl::parse(data("calculator.wsdl")).unwrap();

    let service = &services.services["Calculator"];
    assert_eq!(service.documentation.as_deref(), Some("Calculator service"));
    assert_eq!(service.ports.len(), 2);

    let port = &service.ports["CalculatorSoap"];
    assert_eq!(port.location.as_deref(), Some("http://example.com/calc.asmx"));
    assert_eq!(port.soap_version, Some(SoapVersion::Soap11));
    assert_eq!(
        port.transport.as_deref(),
        Some("http://schemas.xmlsoap.org/soap/http")
    );

    let add = &port.operations["Add"];
    assert_eq!(add.method, "Add");
    assert_eq!(add.style, Style::Document);
    assert_eq!(add.namespace.as_deref(), Some("http://example.com/calc"));
    assert!(add.qualified);
    assert_eq!(add.action.as_deref(), Some("http://example.com/calc/Add"));
    assert_eq!(add.documentation.as_deref(), Some("Adds two integers"));
    assert_eq!(field_names(services.input_fields(add)), ["a", "b"]);
    assert_eq!(field_names(services.output_fields(add)), ["AddResult"]);
    assert_eq!(
        services.input_fields(add)[0].descriptor,
        Descriptor::Primitive(Primitive::Int)
    );
}

#[test]
fn forward_references_and_aliases_resolve() {
    let services = simplesoap_wsdl::parse(data("calculator.wsdl")).unwrap();
    let (_, sum) = services.operation("Sum", None).unwrap();

    assert_eq!(field_names(services.output_fields(sum)), ["total", "count"]);

    let values = &services.input_fields(sum)[0];
    assert_eq!(values.name, "values");
    assert!(matches!(values.descriptor, Descriptor::Ref(_)));
    match services.resolve(&values.descriptor) {
        Descriptor::Array(item) => {
            assert_eq!(field_names(item.fields()), ["int"]);
        }
        other => panic!("expected an array container, got {:?}", other),
    }
}

#[test]
fn headers_and_faults_come_from_their_own_messages() {
    let services = simplesoap_wsdl::parse(data("calculator.wsdl")).unwrap();
    let (_, add) = services.operation("Add", Some(SoapVersion::Soap11)).unwrap();

    let header = add.header.as_ref().unwrap();
    assert_eq!(field_names(header.fields()), ["Credentials"]);
    assert_eq!(
        field_names(services.resolve(&header.fields()[0].descriptor).fields()),
        ["user", "token"]
    );

    let fault = &add.faults["CalcFault"];
    assert_eq!(field_names(services.resolve(fault).fields()), ["reason"]);
}

#[test]
fn operation_lookup_prefers_the_requested_version() {
    let services = simplesoap_wsdl::parse(data("calculator.wsdl")).unwrap();

    let (port, add) = services.operation("Add", Some(SoapVersion::Soap12)).unwrap();
    assert_eq!(port.name, "CalculatorSoap12");
    assert_eq!(port.soap_version, Some(SoapVersion::Soap12));
    assert_eq!(add.action.as_deref(), Some("http://example.com/calc/Add12"));
    assert_eq!(add.soap_version, Some(SoapVersion::Soap12));
    assert!(add.header.is_none());

    let (_, add) = services.operation("Add", Some(SoapVersion::Soap11)).unwrap();
    assert_eq!(add.soap_version, Some(SoapVersion::Soap11));

    assert!(services.operation("Sum", Some(SoapVersion::Soap12)).is_none());
    assert!(services.operation("Divide", None).is_none());
}

#[test]
fn rpc_parts_follow_parameter_order() {
    let services = simplesoap_wsdl::parse(data("echo_rpc.wsdl")).unwrap();
    let (port, echo) = services.operation("echo", None).unwrap();

    assert_eq!(port.location.as_deref(), Some("http://localhost:8008/"));
    assert_eq!(echo.style, Style::Rpc);
    assert_eq!(echo.method, "echo");
    assert_eq!(echo.namespace.as_deref(), Some("urn:echo:rpc"));
    assert!(!echo.qualified);
    assert_eq!(echo.action.as_deref(), Some("urn:echo#echo"));

    assert_eq!(echo.input.as_ref().unwrap().name, "EchoRequest");
    assert_eq!(field_names(services.input_fields(echo)), ["times", "text"]);
    assert_eq!(field_names(services.output_fields(echo)), ["result"]);
}

#[test]
fn imports_are_merged_once() {
    let fetcher = RecordingFetcher::default();
    let services = simplesoap_wsdl::parse_with(
        data("orders.wsdl"),
        &fetcher,
        &ServerDialect::default(),
    )
    .unwrap();

    let fetched: Vec<String> = fetcher
        .fetched
        .borrow()
        .iter()
        .map(|url| url.path().rsplit('/').next().unwrap_or_default().to_owned())
        .collect();
    assert_eq!(fetched, ["orders.wsdl", "orders_types.wsdl", "common.xsd"]);

    let (_, place) = services.operation("PlaceOrder", None).unwrap();
    assert_eq!(place.method, "PlaceOrder");
    assert_eq!(place.namespace.as_deref(), Some("urn:orders"));
    assert_eq!(
        field_names(services.input_fields(place)),
        ["id", "created", "item", "note"]
    );
    assert_eq!(field_names(services.output_fields(place)), ["confirmation"]);
}

const NESTED_ROOT: &str = r#"<definitions xmlns="http://schemas.xmlsoap.org/wsdl/"
    xmlns:soap="http://schemas.xmlsoap.org/wsdl/soap/"
    xmlns:xsd="http://www.w3.org/2001/XMLSchema"
    xmlns:tns="urn:nested" targetNamespace="urn:nested">
  <import namespace="urn:nested" location="sub/types.wsdl"/>
  <message name="LookupRequest"><part name="key" type="xsd:string"/></message>
  <message name="LookupResponse"><part name="entry" type="tns:Entry"/></message>
  <portType name="LookupPortType">
    <operation name="lookup">
      <input message="tns:LookupRequest"/>
      <output message="tns:LookupResponse"/>
    </operation>
  </portType>
  <binding name="LookupBinding" type="tns:LookupPortType">
    <soap:binding style="rpc" transport="http://schemas.xmlsoap.org/soap/http"/>
    <operation name="lookup">
      <soap:operation soapAction="urn:nested#lookup"/>
      <input><soap:body use="literal" namespace="urn:nested"/></input>
      <output><soap:body use="literal" namespace="urn:nested"/></output>
    </operation>
  </binding>
  <service name="Lookup">
    <port name="LookupPort" binding="tns:LookupBinding">
      <soap:address location="http://x/lookup"/>
    </port>
  </service>
</definitions>"#;

const NESTED_TYPES: &str = r#"<definitions xmlns="http://schemas.xmlsoap.org/wsdl/"
    xmlns:xsd="http://www.w3.org/2001/XMLSchema" targetNamespace="urn:nested">
  <types>
    <xsd:schema targetNamespace="urn:nested">
      <xsd:include schemaLocation="common.xsd"/>
    </xsd:schema>
  </types>
</definitions>"#;

const NESTED_COMMON: &str = r#"<xsd:schema xmlns:xsd="http://www.w3.org/2001/XMLSchema" targetNamespace="urn:nested">
  <xsd:complexType name="Entry">
    <xsd:sequence>
      <xsd:element name="key" type="xsd:string"/>
      <xsd:element name="value" type="xsd:string"/>
    </xsd:sequence>
  </xsd:complexType>
</xsd:schema>"#;

#[test]
fn imported_schemas_resolve_against_their_own_location() {
    let fetcher = MemoryFetcher::default()
        .with("http://x/root.wsdl", NESTED_ROOT)
        .with("http://x/sub/types.wsdl", NESTED_TYPES)
        .with("http://x/sub/common.xsd", NESTED_COMMON);
    let services =
        simplesoap_wsdl::parse_with("http://x/root.wsdl", &fetcher, &ServerDialect::default())
            .unwrap();

    assert_eq!(
        *fetcher.fetched.borrow(),
        ["http://x/root.wsdl", "http://x/sub/types.wsdl", "http://x/sub/common.xsd"]
    );

    let (_, lookup) = services.operation("lookup", None).unwrap();
    let entry = &services.output_fields(lookup)[0];
    assert_eq!(entry.name, "entry");
    assert_eq!(field_names(services.resolve(&entry.descriptor).fields()), ["key", "value"]);
}

#[test]
fn single_repeated_inputs_are_the_arguments() {
    let services = simplesoap_wsdl::parse(data("names.wsdl")).unwrap();
    let (port, get_names) = services.operation("GetNames", None).unwrap();

    assert_eq!(port.location.as_deref(), Some("http://example.com/names.asmx"));
    assert_eq!(get_names.soap_version, Some(SoapVersion::Soap11));
    assert_eq!(field_names(services.input_fields(get_names)), ["id"]);
    assert_eq!(field_names(services.output_fields(get_names)), ["name"]);
}

#[test]
fn repeated_fields_of_wide_types_stay_field_level() {
    let services = simplesoap_wsdl::parse(data("orders.wsdl")).unwrap();
    let (_, place) = services.operation("PlaceOrder", None).unwrap();

    let item = &services.input_fields(place)[2];
    let Descriptor::Array(inner) = &item.descriptor else {
        panic!("expected a field-level array, got {:?}", item.descriptor);
    };
    let item_fields = services.resolve(inner).fields();
    assert_eq!(field_names(item_fields), ["sku", "quantity", "children"]);

    // Recursion stays a reference back to the same type.
    match &item_fields[2].descriptor {
        Descriptor::Array(child) => assert_eq!(child.as_ref(), inner.as_ref()),
        other => panic!("expected an array of items, got {:?}", other),
    }
}

#[traced_test]
#[test]
fn missing_service_is_synthesized() {
    let services = simplesoap_wsdl::parse(data("ping.wsdl")).unwrap();

    assert!(logs_contain("unknown port type"));
    let service = &services.services[""];
    let port = &service.ports[""];
    assert_eq!(port.binding, "PingBinding");
    assert!(port.location.is_none());
    assert_eq!(port.soap_version, Some(SoapVersion::Soap12));

    let ping = &port.operations["Ping"];
    assert_eq!(ping.style, Style::Rpc);
    assert_eq!(ping.namespace.as_deref(), Some("urn:ping"));
    assert_eq!(field_names(services.input_fields(ping)), ["payload"]);
}

#[test]
fn unresolved_types_are_reported() {
    match simplesoap_wsdl::parse(data("broken.wsdl")) {
        Err(Error::UnresolvedType { name, namespace }) => {
            assert_eq!(name, "Nowhere");
            assert_eq!(namespace, "urn:broken");
        }
        other => panic!("expected an unresolved type, got {:?}", other.map(|_| ())),
    }
}

#[test]
fn schemas_are_not_wsdl() {
    let result = simplesoap_wsdl::parse(data("common.xsd"));
    assert!(matches!(result, Err(Error::NotWsdl(_))));
}

#[test]
fn missing_files_fail_to_resolve() {
    let url = fetch::parse_location(&data("missing.wsdl"));
    assert!(matches!(url, Err(Error::PathConversionError(Some(_)))));
}

#[test]
fn services_round_trip_through_json() {
    let services = simplesoap_wsdl::parse(data("calculator.wsdl")).unwrap();
    let json = serde_json::to_string(&services).unwrap();

    let mut restored: Services = serde_json::from_str(&json).unwrap();
    restored.types.rebuild_index();

    let (_, add) = restored.operation("Add", None).unwrap();
    assert_eq!(field_names(restored.input_fields(add)), ["a", "b"]);
}
