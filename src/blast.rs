//! Blocking client for the NCBI BLAST URL API: submit a query, poll until
//! the search finishes, retrieve the XML report verbatim.

use crate::settings::BlastSettings;
use anyhow::{anyhow, Result};
use reqwest::blocking::Client;
use std::thread;
use std::time::Duration;

pub const BLAST_URL: &str = "https://blast.ncbi.nlm.nih.gov/Blast.cgi";

// Server etiquette: wait before the first status check, then poll slowly.
const INITIAL_POLL_DELAY_SECS: u64 = 20;
const POLL_INTERVAL_SECS: u64 = 60;

#[derive(Clone, Copy, Debug, PartialEq, Eq)]
enum SearchStatus {
    Waiting,
    Ready,
    Failed,
    Unknown,
}

pub struct BlastClient {
    client: Client,
    base_url: String,
}

impl BlastClient {
    pub fn new() -> Result<Self> {
        Self::with_base_url(BLAST_URL)
    }

    pub fn with_base_url(base_url: &str) -> Result<Self> {
        let client = Client::builder()
            .build()
            .map_err(|e| anyhow!("Could not build HTTP client: {e}"))?;
        Ok(Self {
            client,
            base_url: base_url.to_string(),
        })
    }

    /// Submits the query, waits for the search to complete and returns the
    /// raw XML report body. Any transport error propagates; there is no
    /// retry at this stage.
    pub fn search(&self, query: &str, settings: &BlastSettings) -> Result<String> {
        let rid = self.submit(query, settings)?;
        println!("BLAST request {rid} submitted, waiting for the search to finish");
        self.wait_until_ready(&rid)?;
        self.retrieve_xml(&rid)
    }

    /// Submits the query and returns the request id (RID) assigned by the
    /// server.
    pub fn submit(&self, query: &str, settings: &BlastSettings) -> Result<String> {
        let expect = format!("{:e}", settings.expect);
        let hitlist_size = settings.hitlist_size.to_string();
        let params = [
            ("CMD", "Put"),
            ("PROGRAM", settings.program.as_str()),
            ("DATABASE", settings.database.as_str()),
            ("QUERY", query),
            ("EXPECT", expect.as_str()),
            ("HITLIST_SIZE", hitlist_size.as_str()),
        ];
        let body = self
            .client
            .post(&self.base_url)
            .form(&params)
            .send()
            .map_err(|e| anyhow!("Could not submit BLAST query: {e}"))?
            .error_for_status()
            .map_err(|e| anyhow!("BLAST submission failed: {e}"))?
            .text()
            .map_err(|e| anyhow!("Could not read BLAST submission response: {e}"))?;
        parse_rid(&body)
    }

    fn wait_until_ready(&self, rid: &str) -> Result<()> {
        thread::sleep(Duration::from_secs(INITIAL_POLL_DELAY_SECS));
        loop {
            let params = [("CMD", "Get"), ("FORMAT_OBJECT", "SearchInfo"), ("RID", rid)];
            let body = self
                .client
                .get(&self.base_url)
                .query(&params)
                .send()
                .map_err(|e| anyhow!("Could not poll BLAST search {rid}: {e}"))?
                .error_for_status()
                .map_err(|e| anyhow!("BLAST status poll for {rid} failed: {e}"))?
                .text()
                .map_err(|e| anyhow!("Could not read BLAST status for {rid}: {e}"))?;
            match parse_search_status(&body) {
                SearchStatus::Ready => return Ok(()),
                SearchStatus::Waiting => {
                    println!("Search {rid} still running, checking again in {POLL_INTERVAL_SECS} s");
                    thread::sleep(Duration::from_secs(POLL_INTERVAL_SECS));
                }
                SearchStatus::Failed => {
                    return Err(anyhow!("BLAST search {rid} failed on the server side"))
                }
                SearchStatus::Unknown => {
                    return Err(anyhow!("BLAST search {rid} expired or is unknown to the server"))
                }
            }
        }
    }

    fn retrieve_xml(&self, rid: &str) -> Result<String> {
        let params = [("CMD", "Get"), ("FORMAT_TYPE", "XML"), ("RID", rid)];
        self.client
            .get(&self.base_url)
            .query(&params)
            .send()
            .map_err(|e| anyhow!("Could not retrieve BLAST report {rid}: {e}"))?
            .error_for_status()
            .map_err(|e| anyhow!("BLAST report retrieval for {rid} failed: {e}"))?
            .text()
            .map_err(|e| anyhow!("Could not read BLAST report {rid}: {e}"))
    }
}

// The RID is reported inside the QBlastInfo comment block of the
// submission response, one "RID = XXX" line.
fn parse_rid(body: &str) -> Result<String> {
    body.lines()
        .filter_map(|line| line.trim().strip_prefix("RID = "))
        .map(|rid| rid.trim().to_string())
        .find(|rid| !rid.is_empty())
        .ok_or_else(|| anyhow!("BLAST submission response did not contain a request id"))
}

fn parse_search_status(body: &str) -> SearchStatus {
    for line in body.lines() {
        if let Some(value) = line.trim().strip_prefix("Status=") {
            return match value.trim() {
                "READY" => SearchStatus::Ready,
                "WAITING" => SearchStatus::Waiting,
                "FAILED" => SearchStatus::Failed,
                _ => SearchStatus::Unknown,
            };
        }
    }
    SearchStatus::Unknown
}
