//! The `(accession, hsp_start)` hit record exchanged between the
//! hit-extraction and record-scan stages, one comma-separated pair per line
//! with no header.

use anyhow::{anyhow, Result};
use serde::{Deserialize, Serialize};

/// One high-scoring segment pair from a similarity search: the subject
/// sequence it landed on and the alignment start position on that subject.
///
/// Duplicate accessions with different start positions are legal and are
/// processed independently.
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct Hit {
    pub accession: String,
    pub hsp_start: i64,
}

pub fn read_hits_file(path: &str) -> Result<Vec<Hit>> {
    let mut reader = csv::ReaderBuilder::new()
        .has_headers(false)
        .trim(csv::Trim::All)
        .from_path(path)
        .map_err(|e| anyhow!("Could not open hits file '{path}': {e}"))?;
    let mut hits = Vec::new();
    for (line_no, result) in reader.deserialize::<Hit>().enumerate() {
        let hit =
            result.map_err(|e| anyhow!("Invalid hit at line {} in '{path}': {e}", line_no + 1))?;
        if hit.accession.is_empty() {
            return Err(anyhow!("Empty accession at line {} in '{path}'", line_no + 1));
        }
        hits.push(hit);
    }
    Ok(hits)
}

pub fn write_hits_file(path: &str, hits: &[Hit]) -> Result<()> {
    let mut writer = csv::WriterBuilder::new()
        .has_headers(false)
        .from_path(path)
        .map_err(|e| anyhow!("Could not create hits file '{path}': {e}"))?;
    for hit in hits {
        writer
            .serialize(hit)
            .map_err(|e| anyhow!("Could not write hit '{}': {e}", hit.accession))?;
    }
    writer
        .flush()
        .map_err(|e| anyhow!("Could not flush hits file '{path}': {e}"))
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::fs;
    use tempfile::tempdir;

    #[test]
    fn test_read_hits_in_input_order() {
        let td = tempdir().unwrap();
        let path = td.path().join("hits.csv");
        fs::write(&path, "CP000036.1,2012345\nAE005674.2,888\nCP000036.1,17\n").unwrap();
        let hits = read_hits_file(&path.to_string_lossy()).unwrap();
        assert_eq!(
            hits,
            vec![
                Hit { accession: "CP000036.1".to_string(), hsp_start: 2012345 },
                Hit { accession: "AE005674.2".to_string(), hsp_start: 888 },
                Hit { accession: "CP000036.1".to_string(), hsp_start: 17 },
            ]
        );
    }

    #[test]
    fn test_offsets_parse_as_signed_integers() {
        let td = tempdir().unwrap();
        let path = td.path().join("hits.csv");
        fs::write(&path, "ACC1,-5\nACC2,+12\n").unwrap();
        let hits = read_hits_file(&path.to_string_lossy()).unwrap();
        assert_eq!(hits[0].hsp_start, -5);
        assert_eq!(hits[1].hsp_start, 12);
    }

    #[test]
    fn test_non_numeric_offset_is_an_error() {
        let td = tempdir().unwrap();
        let path = td.path().join("hits.csv");
        fs::write(&path, "ACC1,notanumber\n").unwrap();
        let err = read_hits_file(&path.to_string_lossy()).unwrap_err();
        assert!(err.to_string().contains("line 1"), "got: {err}");
    }

    #[test]
    fn test_write_then_read_round_trip() {
        let td = tempdir().unwrap();
        let path = td.path().join("hits.csv");
        let hits = vec![
            Hit { accession: "CP000036.1".to_string(), hsp_start: 100 },
            Hit { accession: "AE005674.2".to_string(), hsp_start: 0 },
        ];
        write_hits_file(&path.to_string_lossy(), &hits).unwrap();
        let text = fs::read_to_string(&path).unwrap();
        assert_eq!(text, "CP000036.1,100\nAE005674.2,0\n");
        assert_eq!(read_hits_file(&path.to_string_lossy()).unwrap(), hits);
    }
}
