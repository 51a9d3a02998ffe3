//! Tab-separated match report: fixed 7-column header, truncate on open,
//! one row appended per matched accession.

use anyhow::{anyhow, Result};
use serde::Serialize;
use std::fs::File;
use std::io::Write;

pub const REPORT_HEADER: [&str; 7] = [
    "organism",
    "strain",
    "serotype",
    "protein_id",
    "nucl_accession",
    "prot_length",
    "translation",
];

/// One matched accession. Field order matches the report header.
#[derive(Clone, Debug, PartialEq, Serialize)]
pub struct ReportRow {
    pub organism: String,
    pub strain: String,
    pub serotype: String,
    pub protein_id: String,
    pub nucl_accession: String,
    /// Amino-acid length of the target ORF, unrounded.
    pub prot_length: f64,
    pub translation: String,
}

pub struct ReportWriter<W: Write> {
    writer: csv::Writer<W>,
}

impl ReportWriter<File> {
    /// Opens the report at `path`, truncating any prior content, and writes
    /// the header line. The header is present even if no rows follow.
    pub fn create(path: &str) -> Result<Self> {
        let file = File::create(path)
            .map_err(|e| anyhow!("Could not create report file '{path}': {e}"))?;
        Self::from_writer(file)
    }
}

impl<W: Write> ReportWriter<W> {
    pub fn from_writer(inner: W) -> Result<Self> {
        let mut writer = csv::WriterBuilder::new()
            .delimiter(b'\t')
            .has_headers(false)
            .from_writer(inner);
        writer
            .write_record(REPORT_HEADER)
            .map_err(|e| anyhow!("Could not write report header: {e}"))?;
        writer
            .flush()
            .map_err(|e| anyhow!("Could not flush report header: {e}"))?;
        Ok(Self { writer })
    }

    /// Writes one row and flushes it; nothing is buffered past one row.
    pub fn append_row(&mut self, row: &ReportRow) -> Result<()> {
        self.writer
            .serialize(row)
            .map_err(|e| anyhow!("Could not write report row for '{}': {e}", row.nucl_accession))?;
        self.writer
            .flush()
            .map_err(|e| anyhow!("Could not flush report row for '{}': {e}", row.nucl_accession))
    }

    pub fn finish(mut self) -> Result<()> {
        self.writer
            .flush()
            .map_err(|e| anyhow!("Could not flush report: {e}"))
    }

    #[cfg(test)]
    pub fn into_inner(self) -> Result<W> {
        self.writer
            .into_inner()
            .map_err(|e| anyhow!("Could not finalize report: {e}"))
    }
}
