use serde::{Deserialize, Serialize};
use sha2::{Digest, Sha256};
use std::{
    fs::{self, File},
    io::{BufReader, BufWriter},
    path::PathBuf,
};
use tracing::{debug, warn};

use crate::{error::Error, types::Services};

/// Bumped whenever the serialized model changes shape.
pub const CACHE_VERSION: &str = concat!("simplesoap-", env!("CARGO_PKG_VERSION"), "-2");

/// Stores parsed service descriptions between runs. Entries written by
/// another version are treated as missing.
pub trait Cache {
    fn load(&self, key: &str) -> Option<Services>;
    fn store(&self, key: &str, services: &Services);
}

#[derive(Serialize)]
struct EntryRef<'a> {
    version: &'a str,
    key: &'a str,
    services: &'a Services,
}

#[derive(Deserialize)]
struct Entry {
    version: String,
    key: String,
    services: Services,
}

/// One JSON file per entry, named after the SHA-256 of the key.
#[derive(Debug, Clone)]
pub struct FileCache {
    directory: PathBuf,
}

impl FileCache {
    pub fn new(directory: impl Into<PathBuf>) -> Self {
        Self {
            directory: directory.into(),
        }
    }

    pub fn path(&self, key: &str) -> PathBuf {
        let digest = Sha256::digest(format!("{}{}", CACHE_VERSION, key).as_bytes());
        self.directory.join(format!("{}.json", hex::encode(digest)))
    }

    fn try_load(&self, key: &str) -> Result<Option<Services>, Error> {
        let path = self.path(key);
        if !path.exists() {
            return Ok(None);
        }

        let entry: Entry = serde_json::from_reader(BufReader::new(File::open(&path)?))?;
        if entry.version != CACHE_VERSION || entry.key != key {
            debug!(?path, version = %entry.version, "stale cache entry");
            return Ok(None);
        }

        let mut services = entry.services;
        services.types.rebuild_index();
        Ok(Some(services))
    }

    fn try_store(&self, key: &str, services: &Services) -> Result<(), Error> {
        fs::create_dir_all(&self.directory)?;
        let writer = BufWriter::new(File::create(self.path(key))?);
        serde_json::to_writer(
            writer,
            &EntryRef {
                version: CACHE_VERSION,
                key,
                services,
            },
        )?;
        Ok(())
    }
}

impl Cache for FileCache {
    fn load(&self, key: &str) -> Option<Services> {
        match self.try_load(key) {
            Ok(services) => services,
            Err(err) => {
                debug!(key, %err, "unreadable cache entry");
                None
            }
        }
    }

    fn store(&self, key: &str, services: &Services) {
        if let Err(err) = self.try_store(key, services) {
            warn!(key, %err, "unable to write cache entry");
        }
    }
}
