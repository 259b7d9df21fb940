use proc_macro2::Ident;

/// A service description reduced to what the generated bindings need, with
/// every name already turned into a unique Rust identifier.
#[derive(Debug, Clone)]
pub struct Definition {
    /// Where the generated ports load the description from at runtime.
    pub wsdl: String,
    pub services: Vec<Service>,
}

#[derive(Debug, Clone)]
pub struct Service {
    pub ident: Ident,
    pub name: String,
    pub documentation: Option<String>,
    pub ports: Vec<Port>,
}

#[derive(Debug, Clone)]
pub struct Port {
    pub ident: Ident,
    pub name: String,
    pub location: Option<String>,
    /// Envelope prefix selecting the port's SOAP version.
    pub soap_ns: Option<&'static str>,
    pub operations: Vec<Operation>,
}

#[derive(Debug, Clone)]
pub struct Operation {
    pub ident: Ident,
    pub name: String,
    /// `Name(arg: type, ..) -> output`
    pub summary: String,
    pub documentation: Option<String>,
    pub arguments: Vec<Argument>,
}

#[derive(Debug, Clone)]
pub struct Argument {
    pub ident: Ident,
    pub name: String,
}
