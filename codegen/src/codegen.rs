use super::types;
use proc_macro2::TokenStream;
use quote::quote;
use tracing::debug;

pub trait Codegen {
    fn codegen(&self, wsdl: &str) -> TokenStream;
}

fn codegen_all(all: &[impl Codegen], wsdl: &str) -> Vec<TokenStream> {
    all.iter().map(|item| item.codegen(wsdl)).collect()
}

fn doc_attributes(lines: &[&str]) -> Vec<TokenStream> {
    lines
        .iter()
        .flat_map(|text| {
            if text.is_empty() {
                vec![""]
            } else {
                text.lines().collect()
            }
        })
        .map(|line| {
            let line = format!(" {}", line.trim());
            quote! { #[doc = #line] }
        })
        .collect()
}

pub fn codegen(definition: &types::Definition) -> TokenStream {
    let services = codegen_all(&definition.services, &definition.wsdl);

    quote! {
        #(#services)*
    }
}

impl Codegen for types::Service {
    fn codegen(&self, wsdl: &str) -> TokenStream {
        let name = &self.ident;
        let docs = doc_attributes(&[self.documentation.as_deref().unwrap_or(self.name.as_str())]);
        let ports = codegen_all(&self.ports, wsdl);

        quote! {
            #(#docs)*
            pub mod #name {
                #(#ports)*
            }
        }
    }
}

impl Codegen for types::Port {
    fn codegen(&self, wsdl: &str) -> TokenStream {
        debug!(port = %self.name, operations = self.operations.len(), "generating port");

        let name = &self.ident;
        let header = format!("Port `{}`.", self.name);
        let docs = doc_attributes(&[&header]);
        let operations = codegen_all(&self.operations, wsdl);

        let location = self.location.as_ref().map(|location| {
            quote! {
                if options.location.is_none() {
                    options.location = Some(#location.to_owned());
                }
            }
        });
        let soap_ns = self.soap_ns.map(|soap_ns| {
            quote! {
                if options.soap_ns.is_none() {
                    options.soap_ns = Some(#soap_ns.to_owned());
                }
            }
        });

        quote! {
            #(#docs)*
            pub struct #name {
                client: ::simplesoap_util::Client,
            }

            impl #name {
                pub const WSDL: &'static str = #wsdl;

                /// Loads the service description and talks to this port.
                pub fn new() -> Result<Self, ::simplesoap_util::Error> {
                    Self::with_options(::simplesoap_util::ClientOptions::default())
                }

                /// Like `new`, keeping any location or SOAP version set in `options`.
                #[allow(unused_mut)]
                pub fn with_options(
                    mut options: ::simplesoap_util::ClientOptions,
                ) -> Result<Self, ::simplesoap_util::Error> {
                    #location
                    #soap_ns
                    let client = ::simplesoap_util::Client::from_wsdl(Self::WSDL, options)?;
                    Ok(Self::with_client(client))
                }

                pub fn with_client(client: ::simplesoap_util::Client) -> Self {
                    Self { client }
                }

                pub fn client(&self) -> &::simplesoap_util::Client {
                    &self.client
                }

                pub fn client_mut(&mut self) -> &mut ::simplesoap_util::Client {
                    &mut self.client
                }

                #(#operations)*
            }
        }
    }
}

impl Codegen for types::Operation {
    fn codegen(&self, _: &str) -> TokenStream {
        let name = &self.ident;
        let operation = &self.name;
        let summary = format!("`{}`", self.summary);
        let mut docs = vec![summary.as_str()];
        if let Some(documentation) = &self.documentation {
            docs.push("");
            docs.push(documentation.as_str());
        }
        let docs = doc_attributes(&docs);

        let parameters = self.arguments.iter().map(|argument| {
            let ident = &argument.ident;
            quote! { #ident: impl Into<::simplesoap_util::Value> }
        });

        let args = if self.arguments.is_empty() {
            quote! { ::simplesoap_util::Map::new() }
        } else {
            let entries = self.arguments.iter().map(|argument| {
                let ident = &argument.ident;
                let key = &argument.name;
                quote! {
                    (#key.to_owned(), Into::<::simplesoap_util::Value>::into(#ident))
                }
            });
            quote! {
                ::std::iter::IntoIterator::into_iter([#(#entries),*])
                    .collect::<::simplesoap_util::Map>()
            }
        };

        quote! {
            #(#docs)*
            pub fn #name(
                &mut self,
                #(#parameters),*
            ) -> Result<::simplesoap_util::Value, ::simplesoap_util::Error> {
                self.client.call(#operation, #args)
            }
        }
    }
}
