/// Backing stores for region reference tables.
///
/// Object layout, per region:
///
/// ```text
/// local:  {dir}/{region}_stats.json
/// remote: {base_url}/{prefix}/state={region}/data.json
/// ```
///
/// Every store reports a missing table as `Ok(None)` so the cache can tell
/// "this region has no baseline" apart from "the store is unreachable".

use std::io::ErrorKind;
use std::path::{Path, PathBuf};
use std::time::Duration;

use reqwest::StatusCode;
use tracing::{debug, warn};

use super::{ReferenceError, ReferenceTable};

/// Source of region reference tables.
pub trait ReferenceStore: Send + Sync {
    /// Loads the table for `region`, or `Ok(None)` if the store has none.
    fn load(&self, region: &str) -> Result<Option<ReferenceTable>, ReferenceError>;

    /// Short human-readable description for log lines.
    fn describe(&self) -> String;
}

// ---------------------------------------------------------------------------
// Local directory
// ---------------------------------------------------------------------------

/// Reads `{dir}/{region}_stats.json` from local disk.
#[derive(Debug, Clone)]
pub struct LocalDirStore {
    dir: PathBuf,
}

impl LocalDirStore {
    pub fn new(dir: impl Into<PathBuf>) -> Self {
        Self { dir: dir.into() }
    }

    pub fn path_for(&self, region: &str) -> PathBuf {
        self.dir.join(format!("{}_stats.json", region))
    }

    pub fn dir(&self) -> &Path {
        &self.dir
    }
}

impl ReferenceStore for LocalDirStore {
    fn load(&self, region: &str) -> Result<Option<ReferenceTable>, ReferenceError> {
        let path = self.path_for(region);
        let contents = match std::fs::read_to_string(&path) {
            Ok(contents) => contents,
            Err(e) if e.kind() == ErrorKind::NotFound => {
                debug!(region, path = %path.display(), "No local reference file");
                return Ok(None);
            }
            Err(e) => {
                return Err(ReferenceError::Io {
                    region: region.to_string(),
                    path: path.display().to_string(),
                    source: e,
                });
            }
        };

        ReferenceTable::from_json(region, &contents).map(Some)
    }

    fn describe(&self) -> String {
        format!("local dir {}", self.dir.display())
    }
}

// ---------------------------------------------------------------------------
// HTTP object storage
// ---------------------------------------------------------------------------

pub const DEFAULT_PREFIX: &str = "reference_stats";
pub const DEFAULT_TIMEOUT_SECS: u64 = 30;

/// Fetches tables from an HTTP(S) object-storage endpoint.
///
/// Works against any bucket that serves objects by plain GET (public S3,
/// a CDN in front of it, or a static file server laid out the same way).
pub struct HttpStore {
    client: reqwest::blocking::Client,
    base_url: String,
    prefix: String,
}

impl HttpStore {
    pub fn new(base_url: &str, prefix: &str, timeout: Duration) -> Result<Self, reqwest::Error> {
        let client = reqwest::blocking::Client::builder()
            .timeout(timeout)
            .build()?;
        Ok(Self {
            client,
            base_url: base_url.trim_end_matches('/').to_string(),
            prefix: prefix.trim_matches('/').to_string(),
        })
    }

    /// Object URL for `region`. The region is percent-encoded.
    pub fn url_for(&self, region: &str) -> String {
        object_url(&self.base_url, &self.prefix, region)
    }
}

fn object_url(base_url: &str, prefix: &str, region: &str) -> String {
    let region = urlencoding::encode(region);
    if prefix.is_empty() {
        format!("{}/state={}/data.json", base_url, region)
    } else {
        format!("{}/{}/state={}/data.json", base_url, prefix, region)
    }
}

impl ReferenceStore for HttpStore {
    fn load(&self, region: &str) -> Result<Option<ReferenceTable>, ReferenceError> {
        let url = self.url_for(region);
        debug!(region, url = %url, "Fetching reference table");

        let transport = |source| ReferenceError::Transport {
            region: region.to_string(),
            source,
        };

        let response = self.client.get(&url).send().map_err(transport)?;

        let status = response.status();
        if status == StatusCode::NOT_FOUND {
            debug!(region, "Reference table not present in remote store");
            return Ok(None);
        }
        if !status.is_success() {
            return Err(ReferenceError::Http {
                region: region.to_string(),
                status: status.as_u16(),
            });
        }

        let body = response.text().map_err(transport)?;
        ReferenceTable::from_json(region, &body).map(Some)
    }

    fn describe(&self) -> String {
        format!("remote {}/{}", self.base_url, self.prefix)
    }
}

// ---------------------------------------------------------------------------
// Layered lookup
// ---------------------------------------------------------------------------

/// Tries each store in order; the first table found wins.
///
/// A failing layer does not stop the search. If no layer has the table and
/// any layer failed, the first failure is returned, so an outage is never
/// mistaken for "no baseline exists".
pub struct LayeredStore {
    layers: Vec<Box<dyn ReferenceStore>>,
}

impl LayeredStore {
    pub fn new(layers: Vec<Box<dyn ReferenceStore>>) -> Self {
        Self { layers }
    }

    pub fn len(&self) -> usize {
        self.layers.len()
    }

    pub fn is_empty(&self) -> bool {
        self.layers.is_empty()
    }
}

impl ReferenceStore for LayeredStore {
    fn load(&self, region: &str) -> Result<Option<ReferenceTable>, ReferenceError> {
        let mut first_error = None;

        for layer in &self.layers {
            match layer.load(region) {
                Ok(Some(table)) => {
                    debug!(region, store = %layer.describe(), "Reference table found");
                    return Ok(Some(table));
                }
                Ok(None) => continue,
                Err(e) => {
                    warn!(region, store = %layer.describe(), "Reference store failed: {}", e);
                    first_error.get_or_insert(e);
                }
            }
        }

        match first_error {
            Some(e) => Err(e),
            None => Ok(None),
        }
    }

    fn describe(&self) -> String {
        let names: Vec<String> = self.layers.iter().map(|l| l.describe()).collect();
        format!("layered [{}]", names.join(", "))
    }
}

// ---------------------------------------------------------------------------
// Tests
// ---------------------------------------------------------------------------
