//! Blocking client for the Entrez epost/efetch endpoints.
//!
//! The scan stage posts all accessions once, then fetches the records one
//! at a time through the history server using the query key / WebEnv pair
//! returned by epost.

use crate::settings::{EntrezIdentity, ScanSettings};
use anyhow::{anyhow, Result};
use reqwest::blocking::Client;
use serde::Deserialize;
use std::thread;
use std::time::Duration;

pub const EUTILS_BASE_URL: &str = "https://eutils.ncbi.nlm.nih.gov/entrez/eutils";
const TOOL_NAME: &str = "glf-screen";

const FETCH_ATTEMPTS: u32 = 3;
const FETCH_RETRY_PAUSE: Duration = Duration::from_secs(2);

/// Opaque pair addressing one posted accession set on the history server.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct EpostHandle {
    pub query_key: String,
    pub web_env: String,
}

#[derive(Debug, Deserialize)]
#[serde(rename = "ePostResult")]
struct EpostResultXml {
    #[serde(rename = "QueryKey")]
    query_key: Option<String>,
    #[serde(rename = "WebEnv")]
    web_env: Option<String>,
    #[serde(rename = "ERROR")]
    error: Option<String>,
}

pub(crate) fn parse_epost_response(xml: &str) -> Result<EpostHandle> {
    let parsed: EpostResultXml = quick_xml::de::from_str(xml)
        .map_err(|e| anyhow!("Malformed epost acknowledgment: {e}"))?;
    if let Some(error) = parsed.error {
        return Err(anyhow!("Entrez epost reported an error: {error}"));
    }
    match (parsed.query_key, parsed.web_env) {
        (Some(query_key), Some(web_env)) => Ok(EpostHandle { query_key, web_env }),
        _ => Err(anyhow!(
            "Entrez epost acknowledgment is missing QueryKey/WebEnv"
        )),
    }
}

/// Seam for posting one accession set to the history server, so the scan
/// stage can run against an injected fake in tests.
pub trait BatchSubmitter {
    fn post_accessions(&self, accessions: &[String]) -> Result<EpostHandle>;
}

/// Seam for fetching one record text by position within a posted set.
pub trait RecordFetcher {
    fn fetch_record(&self, handle: &EpostHandle, index: usize) -> Result<String>;
}

/// One efetch attempt: either a usable body or a server-side failure that
/// the retry policy may absorb.
enum FetchAttempt {
    Body(String),
    ServerError(String),
}

/// Runs the per-record retry policy over an attempt-producing closure:
/// server-side failures are retried up to [`FETCH_ATTEMPTS`] times with
/// `pause` between attempts, and the body of whichever attempt succeeds is
/// the one returned. Any other error from the closure fails the item
/// immediately; exhausting the attempts fails the item too.
fn fetch_with_retry<F>(index: usize, pause: Duration, mut attempt: F) -> Result<String>
where
    F: FnMut(u32) -> Result<FetchAttempt>,
{
    let mut last_server_error = None;
    for attempt_no in 1..=FETCH_ATTEMPTS {
        match attempt(attempt_no)? {
            FetchAttempt::Body(text) => return Ok(text),
            FetchAttempt::ServerError(status) => {
                eprintln!(
                    "Entrez returned {status} for record {index} (attempt {attempt_no} of {FETCH_ATTEMPTS}), pausing"
                );
                last_server_error = Some(status);
                if attempt_no < FETCH_ATTEMPTS {
                    thread::sleep(pause);
                }
            }
        }
    }
    let last = last_server_error.unwrap_or_else(|| "a server error".to_string());
    Err(anyhow!(
        "Entrez kept returning {last} for record {index} in all {FETCH_ATTEMPTS} attempts"
    ))
}

pub struct EntrezClient {
    client: Client,
    base_url: String,
    database: String,
    rettype: String,
    batch_size: usize,
    identity: EntrezIdentity,
}

impl EntrezClient {
    pub fn new(settings: &ScanSettings, identity: &EntrezIdentity) -> Result<Self> {
        Self::with_base_url(EUTILS_BASE_URL, settings, identity)
    }

    pub fn with_base_url(
        base_url: &str,
        settings: &ScanSettings,
        identity: &EntrezIdentity,
    ) -> Result<Self> {
        let client = Client::builder()
            .build()
            .map_err(|e| anyhow!("Could not build HTTP client: {e}"))?;
        Ok(Self {
            client,
            base_url: base_url.trim_end_matches('/').to_string(),
            database: settings.database.clone(),
            rettype: settings.rettype.clone(),
            batch_size: settings.batch_size.max(1),
            identity: identity.clone(),
        })
    }

    fn identity_params(&self) -> Vec<(&'static str, String)> {
        let mut params = vec![
            ("tool", TOOL_NAME.to_string()),
            ("email", self.identity.email.clone()),
        ];
        if let Some(api_key) = &self.identity.api_key {
            params.push(("api_key", api_key.clone()));
        }
        params
    }
}

impl BatchSubmitter for EntrezClient {
    /// Posts the whole accession list in one request and returns the
    /// query key / WebEnv pair addressing it.
    fn post_accessions(&self, accessions: &[String]) -> Result<EpostHandle> {
        if accessions.is_empty() {
            return Err(anyhow!("No accessions to post"));
        }
        let mut params = vec![
            ("db", self.database.clone()),
            ("id", accessions.join(",")),
        ];
        params.extend(self.identity_params());
        let url = format!("{}/epost.fcgi", self.base_url);
        let body = self
            .client
            .post(&url)
            .form(&params)
            .send()
            .map_err(|e| anyhow!("Could not post accessions to Entrez: {e}"))?
            .error_for_status()
            .map_err(|e| anyhow!("Entrez epost request failed: {e}"))?
            .text()
            .map_err(|e| anyhow!("Could not read epost acknowledgment: {e}"))?;
        parse_epost_response(&body)
    }
}

impl RecordFetcher for EntrezClient {
    /// Fetches the record at `index` within the posted set as flat text.
    ///
    /// Server-side (5xx) failures are retried up to 3 times with a 2 s
    /// pause; the body of whichever attempt succeeds is returned, and the
    /// item fails once the attempts are exhausted. Any other transport
    /// error fails the item immediately.
    fn fetch_record(&self, handle: &EpostHandle, index: usize) -> Result<String> {
        let url = format!("{}/efetch.fcgi", self.base_url);
        let mut params = vec![
            ("db", self.database.clone()),
            ("rettype", self.rettype.clone()),
            ("retmode", "text".to_string()),
            ("retstart", index.to_string()),
            ("retmax", self.batch_size.to_string()),
            ("WebEnv", handle.web_env.clone()),
            ("query_key", handle.query_key.clone()),
            ("idtype", "acc".to_string()),
        ];
        params.extend(self.identity_params());

        fetch_with_retry(index, FETCH_RETRY_PAUSE, |_| {
            let response = self
                .client
                .get(&url)
                .query(&params)
                .send()
                .map_err(|e| anyhow!("Could not fetch record {index}: {e}"))?;
            let status = response.status();
            if status.is_server_error() {
                return Ok(FetchAttempt::ServerError(status.to_string()));
            }
            let response = response
                .error_for_status()
                .map_err(|e| anyhow!("Could not fetch record {index}: {e}"))?;
            let body = response
                .text()
                .map_err(|e| anyhow!("Could not read record {index}: {e}"))?;
            Ok(FetchAttempt::Body(body))
        })
    }
}
