use proc_macro::TokenStream;
use syn::{parse_macro_input, LitStr};

/// Expands to one module per service of the WSDL named by the string
/// literal, each holding a client struct per port.
///
/// ```ignore
/// simplesoap_macro::simplesoap!("https://example.com/calc.asmx?WSDL");
///
/// let mut port = calculator::CalculatorSoap::new()?;
/// let sum = port.add(1, 2)?;
/// ```
#[proc_macro]
pub fn simplesoap(input: TokenStream) -> TokenStream {
    let url = parse_macro_input!(input as LitStr);

    match simplesoap_codegen::from_url(url.value()) {
        Ok(tokens) => tokens.into(),
        Err(error) => syn::Error::new(url.span(), format!("cannot load {}: {}", url.value(), error))
            .to_compile_error()
            .into(),
    }
}
