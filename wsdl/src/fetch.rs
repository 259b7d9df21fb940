use reqwest::blocking::Client;
use simplesoap_xml::Element;
use std::path::Path;
use tracing::info;
use url::Url;

use crate::error::Error;

/// Retrieves the documents a WSDL refers to.
pub trait Fetcher {
    fn fetch(&self, url: &Url) -> Result<Vec<u8>, Error>;
}

/// Reads `file` URLs from disk and downloads `http`/`https` ones.
#[derive(Debug, Clone)]
pub struct DefaultFetcher {
    client: Client,
}

impl DefaultFetcher {
    pub fn new(client: Client) -> Self {
        Self { client }
    }
}

impl Default for DefaultFetcher {
    fn default() -> Self {
        Self::new(Client::new())
    }
}

impl Fetcher for DefaultFetcher {
    fn fetch(&self, url: &Url) -> Result<Vec<u8>, Error> {
        info!(%url, "fetching");

        match url.scheme() {
            "file" => {
                let path = url
                    .to_file_path()
                    .map_err(|_| Error::PathConversionError(None))?;
                Ok(std::fs::read(path)?)
            }
            "http" | "https" => Ok(self
                .client
                .get(url.clone())
                .send()?
                .error_for_status()?
                .bytes()?
                .to_vec()),
            scheme => Err(Error::UnsupportedScheme(scheme.to_owned())),
        }
    }
}

/// Accepts a URL or a local path.
pub fn parse_location(location: &str) -> Result<Url, Error> {
    match Url::parse(location) {
        Ok(url) => Ok(url),
        Err(url::ParseError::RelativeUrlWithoutBase) => {
            let path = Path::new(location)
                .canonicalize()
                .map_err(|err| Error::PathConversionError(Some(err)))?;
            Url::from_file_path(&path).map_err(|_| Error::PathConversionError(None))
        }
        Err(err) => Err(err.into()),
    }
}

/// Resolves an import location against the document that mentions it.
pub fn resolve_location(base: &Url, location: &str) -> Result<Url, Error> {
    match Url::parse(location) {
        Ok(url) => Ok(url),
        Err(url::ParseError::RelativeUrlWithoutBase) => Ok(base.join(location)?),
        Err(err) => Err(err.into()),
    }
}

pub fn fetch_document(fetcher: &dyn Fetcher, url: &Url) -> Result<Element, Error> {
    let bytes = fetcher.fetch(url)?;
    let text = String::from_utf8_lossy(&bytes);
    Ok(Element::parse(text.trim_start_matches('\u{feff}'))?)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn relative_locations_follow_the_base() {
        let base = Url::parse("http://example.com/services/calc.wsdl").unwrap();
        assert_eq!(
            resolve_location(&base, "types.xsd").unwrap().as_str(),
            "http://example.com/services/types.xsd"
        );
        assert_eq!(
            resolve_location(&base, "../common/faults.xsd").unwrap().as_str(),
            "http://example.com/common/faults.xsd"
        );
        assert_eq!(
            resolve_location(&base, "https://other.org/x.wsdl").unwrap().as_str(),
            "https://other.org/x.wsdl"
        );
    }

    #[test]
    fn unsupported_schemes_are_rejected() {
        let url = Url::parse("ftp://example.com/calc.wsdl").unwrap();
        assert!(matches!(
            DefaultFetcher::default().fetch(&url),
            Err(Error::UnsupportedScheme(scheme)) if scheme == "ftp"
        ));
    }

    #[test]
    fn files_are_read_from_disk() {
        let path = std::env::temp_dir().join("simplesoap-fetch-test.xsd");
        std::fs::write(&path, "\u{feff}<schema/>").unwrap();
        let url = Url::from_file_path(&path).unwrap();
        let root = fetch_document(&DefaultFetcher::default(), &url).unwrap();
        assert_eq!(root.name(), "schema");
        std::fs::remove_file(path).unwrap();
    }
}
