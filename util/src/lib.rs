pub mod error;
pub mod marshal;
pub mod server;
pub mod soap;
pub mod transport;
pub mod unmarshal;
pub mod value;

pub use error::{Error, SoapFault};
pub use marshal::Marshaller;
pub use server::SoapDispatcher;
pub use soap::{Client, ClientOptions};
pub use transport::{HttpSettings, HttpTransport, Response, Transport, TransportError};
pub use unmarshal::Unmarshaller;
pub use value::{Map, Value};

pub use simplesoap_wsdl as wsdl;
pub use simplesoap_xml as xml;
