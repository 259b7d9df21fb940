use indexmap::IndexMap;
use serde::{Deserialize, Serialize};
use std::collections::HashMap;

pub const WSDL_NS: &str = "http://schemas.xmlsoap.org/wsdl/";
pub const WSDL_SOAP11_NS: &str = "http://schemas.xmlsoap.org/wsdl/soap/";
pub const WSDL_SOAP12_NS: &str = "http://schemas.xmlsoap.org/wsdl/soap12/";
pub const SOAP11_ENV_NS: &str = "http://schemas.xmlsoap.org/soap/envelope/";
pub const SOAP12_ENV_NS: &str = "http://www.w3.org/2003/05/soap-env";
pub const SOAP_ENC_NS: &str = "http://schemas.xmlsoap.org/soap/encoding/";
pub const XSD_NS: &str = "http://www.w3.org/2001/XMLSchema";
pub const XSI_NS: &str = "http://www.w3.org/2001/XMLSchema-instance";

/// Older schema namespaces still found in the wild.
pub const XSD_NAMESPACES: [&str; 3] = [
    XSD_NS,
    "http://www.w3.org/2000/10/XMLSchema",
    "http://www.w3.org/1999/XMLSchema",
];

/// Field name standing for an `xs:any` wildcard in a sequence.
pub const ANY_FIELD: &str = "*";

#[derive(Default, Debug, Clone, Serialize, Deserialize)]
pub struct Namespaces(Vec<String>);

#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct NamespacedName {
    namespace_idx: usize,
    pub name: String,
}

impl Namespaces {
    pub fn namespaces(&self) -> &[String] {
        &self.0
    }

    pub fn add_or_get(&mut self, namespace: &str) -> usize {
        if let Some(index) = self.index_of(namespace) {
            index
        } else {
            let index = self.0.len();
            self.0.push(namespace.to_owned());
            index
        }
    }

    pub fn index_of(&self, namespace: &str) -> Option<usize> {
        self.0.iter().position(|value| value == namespace)
    }

    pub fn get(&self, index: usize) -> Option<&str> {
        self.0.get(index).map(String::as_str)
    }
}

impl NamespacedName {
    pub fn new(namespaces: &mut Namespaces, namespace: &str, name: String) -> Self {
        Self {
            namespace_idx: namespaces.add_or_get(namespace),
            name,
        }
    }

    pub fn index(&self) -> usize {
        self.namespace_idx
    }

    pub fn namespace<'a>(&self, namespaces: &'a Namespaces) -> &'a str {
        namespaces.get(self.namespace_idx).unwrap_or_default()
    }
}

/// `simpleType` and `complexType` definitions share one bucket, elements
/// have their own.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum TypeKind {
    Element,
    Complex,
}

#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct TypeKey {
    pub name: NamespacedName,
    pub kind: TypeKind,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct TypeId(pub usize);

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum Primitive {
    String,
    Int,
    Long,
    Integer,
    Short,
    Byte,
    Float,
    Double,
    Boolean,
    Decimal,
    Date,
    Time,
    DateTime,
    Base64Binary,
}

impl Primitive {
    /// Maps an XSD built-in type to the primitive that carries its values.
    /// `anyType` is not a primitive and yields `None`.
    pub fn from_xsd(local: &str) -> Option<Self> {
        Some(match local {
            "string" | "normalizedString" | "token" | "anyURI" | "QName" | "NOTATION"
            | "language" | "Name" | "NCName" | "NMTOKEN" | "NMTOKENS" | "ID" | "IDREF"
            | "IDREFS" | "ENTITY" | "ENTITIES" | "duration" | "gYear" | "gYearMonth"
            | "gMonth" | "gMonthDay" | "gDay" | "hexBinary" | "anySimpleType" => Self::String,
            "int" | "unsignedShort" => Self::Int,
            "long" | "unsignedInt" | "unsignedLong" => Self::Long,
            "integer" | "positiveInteger" | "negativeInteger" | "nonPositiveInteger"
            | "nonNegativeInteger" => Self::Integer,
            "short" | "unsignedByte" => Self::Short,
            "byte" => Self::Byte,
            "float" => Self::Float,
            "double" => Self::Double,
            "boolean" => Self::Boolean,
            "decimal" => Self::Decimal,
            "date" => Self::Date,
            "time" => Self::Time,
            "dateTime" => Self::DateTime,
            "base64Binary" | "base64" => Self::Base64Binary,
            _ => return None,
        })
    }

    pub fn xsd_name(&self) -> &'static str {
        match self {
            Self::String => "string",
            Self::Int => "int",
            Self::Long => "long",
            Self::Integer => "integer",
            Self::Short => "short",
            Self::Byte => "byte",
            Self::Float => "float",
            Self::Double => "double",
            Self::Boolean => "boolean",
            Self::Decimal => "decimal",
            Self::Date => "date",
            Self::Time => "time",
            Self::DateTime => "dateTime",
            Self::Base64Binary => "base64Binary",
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Field {
    pub name: String,
    pub descriptor: Descriptor,
}

/// Shape of a value as declared by the schema.
///
/// A field declared with `maxOccurs="unbounded"` is an `Array` around the
/// field's own descriptor; a .NET style "ArrayOf" container is a type whose
/// body is an `Array`, reached through a `Ref`. Marshalling tells the two
/// apart to pick the wire shape.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub enum Descriptor {
    Primitive(Primitive),
    Sequence(Vec<Field>),
    Array(Box<Descriptor>),
    /// Positional items, or mappings merged into one. Built by hand, for
    /// example for dispatcher registrations; the schema resolver never
    /// produces it.
    Tuple(Vec<Descriptor>),
    AnyType,
    Ref(TypeId),
}

static ANY_TYPE: Descriptor = Descriptor::AnyType;

impl Descriptor {
    pub fn sequence<I, S>(fields: I) -> Self
    where
        I: IntoIterator<Item = (S, Descriptor)>,
        S: Into<String>,
    {
        Self::Sequence(
            fields
                .into_iter()
                .map(|(name, descriptor)| Field {
                    name: name.into(),
                    descriptor,
                })
                .collect(),
        )
    }

    pub fn array(item: Descriptor) -> Self {
        Self::Array(Box::new(item))
    }

    pub fn fields(&self) -> &[Field] {
        match self {
            Self::Sequence(fields) => fields,
            _ => &[],
        }
    }

    /// Looks a child up by name, falling back to an `xs:any` wildcard.
    pub fn field(&self, name: &str) -> Option<&Descriptor> {
        let fields = self.fields();
        fields
            .iter()
            .find(|field| field.name == name)
            .or_else(|| fields.iter().find(|field| field.name == ANY_FIELD))
            .map(|field| &field.descriptor)
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct TypeDef {
    pub key: TypeKey,
    /// `None` while the definition is only referenced.
    pub body: Option<Descriptor>,
    pub qualified: bool,
}

/// Arena of named schema definitions. Descriptors point into it with
/// `Descriptor::Ref`, which lets self-referential types stay finite.
#[derive(Default, Debug, Clone, Serialize, Deserialize)]
pub struct TypeTable {
    namespaces: Namespaces,
    defs: Vec<TypeDef>,
    #[serde(skip)]
    index: HashMap<TypeKey, TypeId>,
}

impl TypeTable {
    pub fn namespaces(&self) -> &Namespaces {
        &self.namespaces
    }

    pub fn len(&self) -> usize {
        self.defs.len()
    }

    pub fn is_empty(&self) -> bool {
        self.defs.is_empty()
    }

    /// Returns the id for a key, registering an undefined placeholder the
    /// first time the key is seen.
    pub fn intern(&mut self, name: &str, kind: TypeKind, namespace: &str) -> TypeId {
        let key = TypeKey {
            name: NamespacedName::new(&mut self.namespaces, namespace, name.to_owned()),
            kind,
        };

        if let Some(id) = self.index.get(&key) {
            return *id;
        }

        let id = TypeId(self.defs.len());
        self.defs.push(TypeDef {
            key: key.clone(),
            body: None,
            qualified: false,
        });
        self.index.insert(key, id);
        id
    }

    /// Interns a key and gives it a body, for tables built without a schema.
    pub fn define(
        &mut self,
        name: &str,
        kind: TypeKind,
        namespace: &str,
        body: Descriptor,
    ) -> TypeId {
        let id = self.intern(name, kind, namespace);
        self.defs[id.0].body = Some(body);
        id
    }

    pub fn lookup(&self, name: &str, kind: TypeKind, namespace: &str) -> Option<TypeId> {
        let key = TypeKey {
            name: NamespacedName {
                namespace_idx: self.namespaces.index_of(namespace)?,
                name: name.to_owned(),
            },
            kind,
        };
        self.index.get(&key).copied()
    }

    /// First defined entry with the given local name, in any namespace.
    pub fn find_by_name(&self, name: &str, kind: TypeKind) -> Option<TypeId> {
        self.defs
            .iter()
            .position(|def| def.key.kind == kind && def.key.name.name == name && def.body.is_some())
            .map(TypeId)
    }

    pub fn def(&self, id: TypeId) -> &TypeDef {
        &self.defs[id.0]
    }

    pub(crate) fn def_mut(&mut self, id: TypeId) -> &mut TypeDef {
        &mut self.defs[id.0]
    }

    pub fn name(&self, id: TypeId) -> &str {
        &self.def(id).key.name.name
    }

    pub fn namespace(&self, id: TypeId) -> &str {
        self.def(id).key.name.namespace(&self.namespaces)
    }

    pub fn body(&self, id: TypeId) -> Option<&Descriptor> {
        self.defs.get(id.0).and_then(|def| def.body.as_ref())
    }

    pub fn ids(&self) -> impl Iterator<Item = TypeId> {
        (0..self.defs.len()).map(TypeId)
    }

    /// Follows references until a structural descriptor is reached.
    /// Undefined or looping references read as `AnyType`.
    pub fn resolve<'a>(&'a self, descriptor: &'a Descriptor) -> &'a Descriptor {
        let mut current = descriptor;
        for _ in 0..=self.defs.len() {
            match current {
                Descriptor::Ref(id) => match self.body(*id) {
                    Some(body) => current = body,
                    None => return &ANY_TYPE,
                },
                other => return other,
            }
        }
        &ANY_TYPE
    }

    /// The sequence whose fields are the entries of a mapping shaped by
    /// `descriptor`. Containers are looked through to their item.
    pub fn entries<'a>(&'a self, descriptor: &'a Descriptor) -> &'a Descriptor {
        match self.resolve(descriptor) {
            Descriptor::Array(item) => self.resolve(item),
            other => other,
        }
    }

    /// Restores the key index after deserialization.
    pub fn rebuild_index(&mut self) {
        self.index = self
            .defs
            .iter()
            .enumerate()
            .map(|(index, def)| (def.key.clone(), TypeId(index)))
            .collect();
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum SoapVersion {
    Soap11,
    Soap12,
}

impl SoapVersion {
    pub fn envelope_namespace(&self) -> &'static str {
        match self {
            Self::Soap11 => SOAP11_ENV_NS,
            Self::Soap12 => SOAP12_ENV_NS,
        }
    }

    pub fn from_binding_namespace(uri: &str) -> Option<Self> {
        match uri {
            WSDL_SOAP11_NS => Some(Self::Soap11),
            WSDL_SOAP12_NS => Some(Self::Soap12),
            _ => None,
        }
    }

    pub fn from_envelope_namespace(uri: &str) -> Option<Self> {
        match uri {
            SOAP11_ENV_NS => Some(Self::Soap11),
            SOAP12_ENV_NS => Some(Self::Soap12),
            _ => None,
        }
    }

    /// Maps the envelope prefixes accepted by the client.
    pub fn from_prefix(prefix: &str) -> Option<Self> {
        match prefix {
            "soap" | "soapenv" | "soap11" => Some(Self::Soap11),
            "soap12" => Some(Self::Soap12),
            _ => None,
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
pub enum Style {
    #[default]
    Document,
    Rpc,
}

impl Style {
    pub fn from_attribute(value: &str) -> Self {
        if value.eq_ignore_ascii_case("rpc") {
            Self::Rpc
        } else {
            Self::Document
        }
    }
}

/// Body or header payload of a message: the wire element name and its shape.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Part {
    pub name: String,
    pub namespace: Option<String>,
    pub descriptor: Descriptor,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Operation {
    pub name: String,
    /// Element name of the request wrapper inside the SOAP body.
    pub method: String,
    pub input: Option<Part>,
    pub output: Option<Part>,
    pub header: Option<Descriptor>,
    pub faults: IndexMap<String, Descriptor>,
    pub action: Option<String>,
    pub documentation: Option<String>,
    pub style: Style,
    /// Version of the binding the operation was declared in.
    pub soap_version: Option<SoapVersion>,
    pub namespace: Option<String>,
    pub qualified: bool,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Port {
    pub name: String,
    pub binding: String,
    pub location: Option<String>,
    pub soap_version: Option<SoapVersion>,
    pub soap_uri: Option<String>,
    pub transport: Option<String>,
    pub operations: IndexMap<String, Operation>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Service {
    pub name: String,
    pub documentation: Option<String>,
    pub ports: IndexMap<String, Port>,
}

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct Services {
    pub services: IndexMap<String, Service>,
    pub types: TypeTable,
}

impl Services {
    pub fn ports(&self) -> impl Iterator<Item = (&Service, &Port)> {
        self.services
            .values()
            .flat_map(|service| service.ports.values().map(move |port| (service, port)))
    }

    /// Finds an operation on the first port speaking `version`, or on any
    /// port when no version is given.
    pub fn operation(
        &self,
        name: &str,
        version: Option<SoapVersion>,
    ) -> Option<(&Port, &Operation)> {
        self.ports()
            .filter(|(_, port)| {
                version.is_none() || port.soap_version.is_none() || port.soap_version == version
            })
            .find_map(|(_, port)| port.operations.get(name).map(|operation| (port, operation)))
    }

    pub fn resolve<'a>(&'a self, descriptor: &'a Descriptor) -> &'a Descriptor {
        self.types.resolve(descriptor)
    }

    /// Input fields of an operation in declared order.
    pub fn input_fields<'a>(&'a self, operation: &'a Operation) -> &'a [Field] {
        operation
            .input
            .as_ref()
            .map(|part| self.types.entries(&part.descriptor).fields())
            .unwrap_or_default()
    }

    pub fn output_fields<'a>(&'a self, operation: &'a Operation) -> &'a [Field] {
        operation
            .output
            .as_ref()
            .map(|part| self.types.entries(&part.descriptor).fields())
            .unwrap_or_default()
    }
}
