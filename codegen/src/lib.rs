use proc_macro2::TokenStream;
use simplesoap_wsdl::{self as wsdl, fetch, Services};

mod codegen;
mod preprocessor;
mod types;

pub use preprocessor::{camel_case, snake_case};

/// Generates bindings for the WSDL at `url`, a URL or a local path. Local
/// paths are made absolute so the generated code finds the description
/// from any working directory.
pub fn from_url<S: AsRef<str>>(url: S) -> Result<TokenStream, wsdl::Error> {
    let location = fetch::parse_location(url.as_ref())?;
    let services = wsdl::parse(location.as_str())?;
    Ok(from_services(&services, location.as_str()))
}

/// Generates bindings for already parsed `services`; the generated ports
/// load the description from `wsdl` at runtime.
pub fn from_services(services: &Services, wsdl: &str) -> TokenStream {
    let definition = preprocessor::preprocess(services, wsdl);
    codegen::codegen(&definition)
}
