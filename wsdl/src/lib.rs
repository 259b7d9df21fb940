use tracing::debug;

mod parser;
mod schema;

pub mod cache;
pub mod dialect;
pub mod error;
pub mod fetch;
pub mod types;

pub use cache::{Cache, FileCache};
pub use dialect::{ArrayMarking, ServerDialect};
pub use error::Error;
pub use fetch::{DefaultFetcher, Fetcher};
pub use types::Services;

/// Parses the WSDL at `url`, which may be a URL or a local path.
pub fn parse<S: AsRef<str>>(url: S) -> Result<Services, Error> {
    parse_with(url, &DefaultFetcher::default(), &ServerDialect::default())
}

pub fn parse_with<S: AsRef<str>>(
    url: S,
    fetcher: &dyn Fetcher,
    dialect: &ServerDialect,
) -> Result<Services, Error> {
    let url = fetch::parse_location(url.as_ref())?;
    parser::parse(url, fetcher, dialect)
}

/// Like [`parse_with`], consulting `cache` first and filling it on a miss.
pub fn parse_cached<S: AsRef<str>>(
    url: S,
    fetcher: &dyn Fetcher,
    dialect: &ServerDialect,
    cache: &dyn Cache,
) -> Result<Services, Error> {
    let key = format!("{} {}", dialect.name, url.as_ref());
    if let Some(services) = cache.load(&key) {
        debug!(%key, "using cached service description");
        return Ok(services);
    }

    let services = parse_with(url, fetcher, dialect)?;
    cache.store(&key, &services);
    Ok(services)
}
