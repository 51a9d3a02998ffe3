//! Per-stage configuration, passed explicitly into each stage.
//!
//! Every knob lives on an immutable settings object with working defaults;
//! a JSON file can override any subset of fields. Nothing here is ambient
//! global state, so stages stay independently testable.

use anyhow::{anyhow, Result};
use serde::{Deserialize, Serialize};
use std::collections::HashSet;
use std::fs;

/// Parameters for one remote similarity search (stage 1).
#[derive(Clone, Debug, Serialize, Deserialize)]
#[serde(default)]
pub struct BlastSettings {
    /// BLAST program variant, e.g. `tblastn` for protein-vs-translated-nucleotide.
    pub program: String,
    /// Target database name on the server side.
    pub database: String,
    /// Expect-value significance threshold.
    pub expect: f64,
    /// Maximum number of hits the server should return.
    pub hitlist_size: u32,
}

impl Default for BlastSettings {
    fn default() -> Self {
        Self {
            program: "tblastn".to_string(),
            database: "nr".to_string(),
            expect: 1e-14,
            hitlist_size: 10000,
        }
    }
}

impl BlastSettings {
    pub fn from_json_file(path: &str) -> Result<Self> {
        let text = fs::read_to_string(path)
            .map_err(|e| anyhow!("Could not read settings file '{path}': {e}"))?;
        serde_json::from_str(&text)
            .map_err(|e| anyhow!("Could not parse settings file '{path}': {e}"))
    }
}

/// Parameters for the record-scan stage (stage 3).
#[derive(Clone, Debug, Serialize, Deserialize)]
#[serde(default)]
pub struct ScanSettings {
    /// Entrez database holding the posted accessions.
    pub database: String,
    /// Record format requested from efetch.
    pub rettype: String,
    /// Records per fetch. Kept at 1 so each record is processed and
    /// released before the next download starts.
    pub batch_size: usize,
    /// Gene symbols / product descriptions identifying the marker gene.
    pub search_words: Vec<String>,
    /// Half-width of the open interval around the target ORF start that is
    /// searched for the marker gene, in nucleotides.
    pub neighbor_window: i64,
    /// Offset added to each HSP start before locating the covering ORF.
    /// Some HSP starts land slightly before the true coding-region start
    /// due to alignment imprecision.
    pub hsp_start_fudge: i64,
}

impl Default for ScanSettings {
    fn default() -> Self {
        Self {
            database: "nuccore".to_string(),
            rettype: "gb".to_string(),
            batch_size: 1,
            search_words: vec![
                "udp-galactopyranose mutase".to_string(),
                "glf".to_string(),
            ],
            neighbor_window: 7000,
            hsp_start_fudge: 15,
        }
    }
}

impl ScanSettings {
    pub fn from_json_file(path: &str) -> Result<Self> {
        let text = fs::read_to_string(path)
            .map_err(|e| anyhow!("Could not read settings file '{path}': {e}"))?;
        serde_json::from_str(&text)
            .map_err(|e| anyhow!("Could not parse settings file '{path}': {e}"))
    }

    /// Lowercased search words, ready for set-intersection against
    /// lowercased gene/product qualifier values.
    pub fn keyword_set(&self) -> HashSet<String> {
        self.search_words
            .iter()
            .map(|word| word.to_ascii_lowercase())
            .collect()
    }
}

/// Identity parameters Entrez expects with every request.
#[derive(Clone, Debug)]
pub struct EntrezIdentity {
    pub email: String,
    pub api_key: Option<String>,
}
