//! `BlastOutput` XML report parsing and hit extraction.
//!
//! Only the legacy pipe-delimited `Hit_id` convention (`gi|id|db|accession|`)
//! is supported for accession derivation; titles that do not follow it are
//! rejected with explicit diagnostics rather than guessed at.

use crate::hits::Hit;
use anyhow::{anyhow, Result};
use serde::Deserialize;
use std::fs;

#[derive(Debug, Deserialize)]
#[serde(rename = "BlastOutput")]
struct BlastOutputXml {
    #[serde(rename = "BlastOutput_iterations")]
    iterations: Option<BlastIterationsXml>,
}

#[derive(Debug, Deserialize)]
struct BlastIterationsXml {
    #[serde(rename = "Iteration", default)]
    iterations: Vec<IterationXml>,
}

#[derive(Debug, Deserialize)]
struct IterationXml {
    #[serde(rename = "Iteration_hits")]
    hits: Option<IterationHitsXml>,
}

#[derive(Debug, Deserialize)]
struct IterationHitsXml {
    #[serde(rename = "Hit", default)]
    hits: Vec<HitXml>,
}

#[derive(Debug, Deserialize)]
struct HitXml {
    #[serde(rename = "Hit_id")]
    id: Option<String>,
    #[serde(rename = "Hit_hsps")]
    hsps: Option<HitHspsXml>,
}

#[derive(Debug, Deserialize)]
struct HitHspsXml {
    #[serde(rename = "Hsp", default)]
    hsps: Vec<HspXml>,
}

#[derive(Debug, Deserialize)]
struct HspXml {
    #[serde(rename = "Hsp_hit-from")]
    hit_from: Option<i64>,
}

pub fn extract_hits_from_file(path: &str) -> Result<Vec<Hit>> {
    let text = fs::read_to_string(path)
        .map_err(|e| anyhow!("Could not read BLAST report '{path}': {e}"))?;
    extract_hits(&text).map_err(|e| anyhow!("Could not parse BLAST report '{path}': {e}"))
}

/// Extracts one `(accession, hsp_start)` pair per HSP, in report order.
///
/// The report must hold exactly one query iteration; multi-query batch
/// reports are rejected.
pub fn extract_hits(xml: &str) -> Result<Vec<Hit>> {
    let parsed: BlastOutputXml =
        quick_xml::de::from_str(xml).map_err(|e| anyhow!("Malformed BLAST XML: {e}"))?;
    let mut iterations = parsed
        .iterations
        .map(|wrapper| wrapper.iterations)
        .unwrap_or_default();
    if iterations.len() != 1 {
        return Err(anyhow!(
            "Expected a single-query BLAST report, found {} iterations",
            iterations.len()
        ));
    }
    let iteration = iterations.remove(0);

    let mut pairs = Vec::new();
    let alignments = iteration
        .hits
        .map(|wrapper| wrapper.hits)
        .unwrap_or_default();
    for (hit_idx, alignment) in alignments.into_iter().enumerate() {
        let title = alignment.id.unwrap_or_default();
        let accession = accession_from_title(&title)
            .map_err(|e| anyhow!("Hit #{}: {e}", hit_idx + 1))?;
        let hsps = alignment
            .hsps
            .map(|wrapper| wrapper.hsps)
            .unwrap_or_default();
        for hsp in hsps {
            let hsp_start = hsp.hit_from.ok_or_else(|| {
                anyhow!(
                    "Hit #{} ('{}') has an HSP without Hsp_hit-from",
                    hit_idx + 1,
                    accession
                )
            })?;
            pairs.push(Hit {
                accession: accession.clone(),
                hsp_start,
            });
        }
    }
    Ok(pairs)
}

// The accession is the 4th pipe-delimited field of the legacy title format,
// e.g. "gi|446057344|gb|CP000036.1|".
fn accession_from_title(title: &str) -> Result<String> {
    title
        .split('|')
        .nth(3)
        .map(str::trim)
        .filter(|field| !field.is_empty())
        .map(str::to_string)
        .ok_or_else(|| {
            anyhow!("Hit title '{title}' does not follow the pipe-delimited 'gi|id|db|accession|' convention")
        })
}
