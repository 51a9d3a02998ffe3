//! Record-scan core: locate the coding feature covering each HSP start and
//! check the surrounding window for the marker gene keywords.
//!
//! Coordinates follow gb-io's convention: 0-based, half-open `[start, end)`.

use crate::entrez::{BatchSubmitter, EpostHandle, RecordFetcher};
use crate::hits::Hit;
use crate::report::{ReportRow, ReportWriter};
use crate::settings::ScanSettings;
use anyhow::{anyhow, Result};
use gb_io::seq::{Feature, FeatureKind, Location, Seq};
use std::collections::HashSet;
use std::io::Write;

/// Organism metadata from the record's `source` feature.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct SourceInfo {
    pub organism: String,
    pub strain: String,
    pub serotype: String,
}

/// The coding feature selected as the target ORF for one hit.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct TargetCds {
    pub start: i64,
    pub end: i64,
    pub protein_id: String,
    pub translation: String,
}

impl TargetCds {
    /// Amino-acid length of the ORF, unrounded.
    pub fn length_aa(&self) -> f64 {
        (self.end - self.start).abs() as f64 / 3.0
    }
}

/// Outcome of scanning one fetched record against one hit.
#[derive(Clone, Debug, PartialEq)]
pub enum ScanOutcome {
    /// The marker gene was found near the target ORF; one report row.
    Matched(ReportRow),
    /// A target ORF was found but nothing in its window matched.
    NoNeighborMatch,
    /// No coding feature covers the adjusted HSP start; the record is
    /// skipped without a neighbor scan.
    NoTargetCds,
}

#[derive(Clone, Copy, Debug, Default, PartialEq, Eq)]
pub struct ScanSummary {
    pub processed: usize,
    pub matched: usize,
    pub skipped: usize,
}

pub fn first_qualifier<'a>(feature: &'a Feature, name: &str) -> Option<&'a str> {
    feature.qualifier_values(name.into()).next()
}

fn qualifier_or_default(feature: &Feature, name: &str) -> String {
    first_qualifier(feature, name).unwrap_or_default().to_string()
}

/// A location is compound when a join/order appears anywhere in its tree;
/// such features are never target candidates.
pub fn location_is_compound(location: &Location) -> bool {
    match location {
        Location::Join(_) | Location::Order(_) => true,
        Location::Complement(inner) => location_is_compound(inner),
        _ => false,
    }
}

pub fn location_bounds(location: &Location) -> Option<(i64, i64)> {
    let (from, to) = location.find_bounds().ok()?;
    if to < from {
        Some((to, from))
    } else {
        Some((from, to))
    }
}

/// Parses one efetch body as a single GenBank flat-file record.
pub fn parse_genbank_record(text: &str) -> Result<Seq> {
    let mut records = gb_io::reader::parse_slice(text.as_bytes())
        .map_err(|e| anyhow!("Could not parse GenBank record: {e}"))?;
    match records.len() {
        1 => Ok(records.remove(0)),
        0 => Err(anyhow!("Fetched text did not contain a GenBank record")),
        n => Err(anyhow!("Expected one GenBank record per fetch, found {n}")),
    }
}

/// Reads organism metadata from the first `source` feature. `organism` is
/// required; `strain` and `serotype` fall back to the empty string.
pub fn extract_source_info(seq: &Seq) -> Result<SourceInfo> {
    let source_kind = FeatureKind::from("source");
    let source = seq
        .features
        .iter()
        .find(|feature| feature.kind == source_kind)
        .ok_or_else(|| anyhow!("Record has no source feature"))?;
    let organism = first_qualifier(source, "organism")
        .ok_or_else(|| anyhow!("Record source feature is missing the required 'organism' qualifier"))?
        .to_string();
    Ok(SourceInfo {
        organism,
        strain: qualifier_or_default(source, "strain"),
        serotype: qualifier_or_default(source, "serotype"),
    })
}

/// Finds the target ORF for a hit: the last non-compound CDS, in feature
/// order, whose `[start, end)` bounds contain `hsp_start + fudge`.
pub fn locate_target_cds(seq: &Seq, hsp_start: i64, fudge: i64) -> Option<TargetCds> {
    let probe = hsp_start + fudge;
    let cds_kind = FeatureKind::from("CDS");
    let mut target = None;
    for feature in &seq.features {
        if feature.kind != cds_kind || location_is_compound(&feature.location) {
            continue;
        }
        let Some((start, end)) = location_bounds(&feature.location) else {
            continue;
        };
        if start <= probe && probe < end {
            // no break: the last containing feature wins
            target = Some(TargetCds {
                start,
                end,
                protein_id: qualifier_or_default(feature, "protein_id"),
                translation: qualifier_or_default(feature, "translation"),
            });
        }
    }
    target
}

/// Scans all CDS features whose start lies strictly inside
/// `(target_start - window, target_start + window)` for a gene or product
/// name in the keyword set. The first match wins.
pub fn neighbor_keyword_match(
    seq: &Seq,
    target_start: i64,
    window: i64,
    keywords: &HashSet<String>,
) -> bool {
    let cds_kind = FeatureKind::from("CDS");
    for feature in seq.features.iter().filter(|f| f.kind == cds_kind) {
        let Some((start, _)) = location_bounds(&feature.location) else {
            continue;
        };
        if start <= target_start - window || start >= target_start + window {
            continue;
        }
        let mut names = HashSet::new();
        if let Some(gene) = first_qualifier(feature, "gene") {
            names.insert(gene.to_ascii_lowercase());
        }
        if let Some(product) = first_qualifier(feature, "product") {
            names.insert(product.to_ascii_lowercase());
        }
        if names.iter().any(|name| keywords.contains(name)) {
            return true;
        }
    }
    false
}

fn record_accession(seq: &Seq, hit: &Hit) -> String {
    seq.version
        .clone()
        .or_else(|| seq.accession.clone())
        .unwrap_or_else(|| hit.accession.clone())
}

/// Scans one parsed record against one hit.
pub fn scan_record(seq: &Seq, hit: &Hit, settings: &ScanSettings) -> Result<ScanOutcome> {
    let source = extract_source_info(seq)?;
    let Some(target) = locate_target_cds(seq, hit.hsp_start, settings.hsp_start_fudge) else {
        return Ok(ScanOutcome::NoTargetCds);
    };
    let keywords = settings.keyword_set();
    if !neighbor_keyword_match(seq, target.start, settings.neighbor_window, &keywords) {
        return Ok(ScanOutcome::NoNeighborMatch);
    }
    Ok(ScanOutcome::Matched(ReportRow {
        organism: source.organism,
        strain: source.strain,
        serotype: source.serotype,
        protein_id: target.protein_id.clone(),
        nucl_accession: record_accession(seq, hit),
        prot_length: target.length_aa(),
        translation: target.translation,
    }))
}

fn fetch_and_scan(
    fetcher: &dyn RecordFetcher,
    handle: &EpostHandle,
    index: usize,
    hit: &Hit,
    settings: &ScanSettings,
) -> Result<ScanOutcome> {
    let text = fetcher.fetch_record(handle, index)?;
    let seq = parse_genbank_record(&text)?;
    scan_record(&seq, hit, settings)
}

/// Drives the per-record loop: fetch, parse, and scan each hit in strict
/// input order, appending a report row per match. A failing record is
/// logged and skipped; the loop continues with the next hit.
pub fn run_scan<W: Write>(
    fetcher: &dyn RecordFetcher,
    handle: &EpostHandle,
    hits: &[Hit],
    settings: &ScanSettings,
    writer: &mut ReportWriter<W>,
) -> Result<ScanSummary> {
    let mut summary = ScanSummary::default();
    for (index, hit) in hits.iter().enumerate() {
        println!("Downloading record {} of {}", index + 1, hits.len());
        match fetch_and_scan(fetcher, handle, index, hit, settings) {
            Ok(ScanOutcome::Matched(row)) => {
                writer.append_row(&row)?;
                summary.matched += 1;
                println!("{}: marker gene found near the target ORF", hit.accession);
            }
            Ok(ScanOutcome::NoNeighborMatch) => {
                println!(
                    "{}: no marker gene within {} nt of the target ORF",
                    hit.accession, settings.neighbor_window
                );
            }
            Ok(ScanOutcome::NoTargetCds) => {
                println!(
                    "{}: no CDS covers HSP start {}, skipping",
                    hit.accession, hit.hsp_start
                );
            }
            Err(e) => {
                eprintln!("Skipping {}: {e:#}", hit.accession);
                summary.skipped += 1;
            }
        }
        summary.processed += 1;
    }
    Ok(summary)
}

/// Posts the hit accessions to Entrez, then creates the report and scans
/// every hit. The report file is only created once the epost handshake has
/// succeeded, so a failed submission leaves any existing report untouched.
pub fn post_and_scan<C>(
    client: &C,
    hits: &[Hit],
    settings: &ScanSettings,
    report_path: &str,
) -> Result<ScanSummary>
where
    C: BatchSubmitter + RecordFetcher,
{
    let accessions: Vec<String> = hits.iter().map(|hit| hit.accession.clone()).collect();
    let handle = client.post_accessions(&accessions)?;
    println!(
        "Posted {} accessions (QueryKey = {}, WebEnv = {})",
        accessions.len(),
        handle.query_key,
        handle.web_env
    );
    let mut writer = ReportWriter::create(report_path)?;
    let summary = run_scan(client, &handle, hits, settings, &mut writer)?;
    writer.finish()?;
    Ok(summary)
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::fs;

    fn record(features: Vec<Feature>) -> Seq {
        let mut seq = Seq::empty();
        seq.name = Some("TEST01".to_string());
        seq.accession = Some("TEST01".to_string());
        seq.version = Some("TEST01.1".to_string());
        seq.seq = vec![b'a'; 9000];
        seq.len = Some(9000);
        seq.features = features;
        seq
    }

    fn feature(kind: &str, location: Location, qualifiers: &[(&str, &str)]) -> Feature {
        Feature {
            kind: FeatureKind::from(kind),
            location,
            qualifiers: qualifiers
                .iter()
                .map(|(key, value)| ((*key).into(), Some((*value).to_string())))
                .collect(),
        }
    }

    fn cds(start: i64, end: i64, qualifiers: &[(&str, &str)]) -> Feature {
        feature("CDS", Location::simple_range(start, end), qualifiers)
    }

    fn source_feature(qualifiers: &[(&str, &str)]) -> Feature {
        feature("source", Location::simple_range(0, 9000), qualifiers)
    }

    fn test_hit(hsp_start: i64) -> Hit {
        Hit {
            accession: "TEST01.1".to_string(),
            hsp_start,
        }
    }

    #[test]
    fn test_source_info_with_defaults() {
        let seq = record(vec![source_feature(&[
            ("organism", "Escherichia coli"),
            ("strain", "K-12"),
        ])]);
        let info = extract_source_info(&seq).unwrap();
        assert_eq!(info.organism, "Escherichia coli");
        assert_eq!(info.strain, "K-12");
        assert_eq!(info.serotype, "");
    }

    #[test]
    fn test_missing_organism_is_an_error() {
        let seq = record(vec![source_feature(&[("strain", "K-12")])]);
        let err = extract_source_info(&seq).unwrap_err();
        assert!(err.to_string().contains("organism"), "got: {err}");
    }

    #[test]
    fn test_target_located_with_fudged_offset() {
        // HSP start 90 probes position 105, inside [100, 400)
        let seq = record(vec![cds(
            100,
            400,
            &[("protein_id", "AAA00001.1"), ("translation", "MKV")],
        )]);
        let target = locate_target_cds(&seq, 90, 15).unwrap();
        assert_eq!(target.start, 100);
        assert_eq!(target.end, 400);
        assert_eq!(target.protein_id, "AAA00001.1");
        assert_eq!(target.translation, "MKV");
        assert_eq!(target.length_aa(), 100.0);
    }

    #[test]
    fn test_probe_outside_all_cds_yields_no_target() {
        let seq = record(vec![cds(100, 400, &[])]);
        assert!(locate_target_cds(&seq, 500, 15).is_none());
        // half-open end boundary: probe 400 is outside [100, 400)
        assert!(locate_target_cds(&seq, 385, 15).is_none());
    }

    #[test]
    fn test_last_containing_cds_wins() {
        let seq = record(vec![
            cds(100, 400, &[("protein_id", "first")]),
            cds(90, 399, &[("protein_id", "second")]),
        ]);
        let target = locate_target_cds(&seq, 90, 15).unwrap();
        assert_eq!(target.protein_id, "second");
        assert_eq!(target.start, 90);
    }

    #[test]
    fn test_join_locations_are_not_target_candidates() {
        let joined = Feature {
            kind: FeatureKind::from("CDS"),
            location: Location::Join(vec![
                Location::simple_range(100, 200),
                Location::simple_range(300, 400),
            ]),
            qualifiers: vec![("protein_id".into(), Some("joined".to_string()))],
        };
        let seq = record(vec![joined, cds(100, 400, &[("protein_id", "simple")])]);
        let target = locate_target_cds(&seq, 90, 15).unwrap();
        assert_eq!(target.protein_id, "simple");

        let complemented_join = Feature {
            kind: FeatureKind::from("CDS"),
            location: Location::Complement(Box::new(Location::Join(vec![
                Location::simple_range(100, 200),
                Location::simple_range(300, 400),
            ]))),
            qualifiers: vec![],
        };
        assert!(location_is_compound(&complemented_join.location));
    }

    #[test]
    fn test_complemented_simple_range_is_a_candidate() {
        let reverse = Feature {
            kind: FeatureKind::from("CDS"),
            location: Location::Complement(Box::new(Location::simple_range(100, 400))),
            qualifiers: vec![("protein_id".into(), Some("reverse".to_string()))],
        };
        let seq = record(vec![reverse]);
        let target = locate_target_cds(&seq, 90, 15).unwrap();
        assert_eq!(target.protein_id, "reverse");
        assert_eq!(target.start, 100);
    }

    #[test]
    fn test_neighbor_product_match_is_case_insensitive() {
        let keywords = ScanSettings::default().keyword_set();
        let seq = record(vec![
            cds(100, 400, &[]),
            cds(7099, 7500, &[("product", "UDP-Galactopyranose Mutase")]),
        ]);
        assert!(neighbor_keyword_match(&seq, 100, 7000, &keywords));
    }

    #[test]
    fn test_neighbor_window_boundary_is_strict() {
        let keywords = ScanSettings::default().keyword_set();
        // start exactly at target_start + 7000 is excluded
        let seq = record(vec![cds(100, 400, &[]), cds(7100, 7500, &[("gene", "glf")])]);
        assert!(!neighbor_keyword_match(&seq, 100, 7000, &keywords));
        // one base inside the boundary matches
        let seq = record(vec![cds(100, 400, &[]), cds(7099, 7500, &[("gene", "glf")])]);
        assert!(neighbor_keyword_match(&seq, 100, 7000, &keywords));
    }

    #[test]
    fn test_gene_qualifier_match_is_case_insensitive() {
        let keywords = ScanSettings::default().keyword_set();
        let seq = record(vec![cds(100, 400, &[]), cds(1500, 2400, &[("gene", "Glf")])]);
        assert!(neighbor_keyword_match(&seq, 100, 7000, &keywords));
    }

    #[test]
    fn test_scan_record_builds_report_row() {
        let settings = ScanSettings::default();
        let seq = record(vec![
            source_feature(&[
                ("organism", "Escherichia coli"),
                ("strain", "K-12"),
                ("serotype", "O86"),
            ]),
            cds(
                100,
                400,
                &[("gene", "wbbM"), ("protein_id", "AAA00001.1"), ("translation", "MKV")],
            ),
            cds(1500, 2400, &[("gene", "glf")]),
        ]);
        let outcome = scan_record(&seq, &test_hit(90), &settings).unwrap();
        let ScanOutcome::Matched(row) = outcome else {
            panic!("expected a match, got {outcome:?}");
        };
        assert_eq!(row.organism, "Escherichia coli");
        assert_eq!(row.strain, "K-12");
        assert_eq!(row.serotype, "O86");
        assert_eq!(row.protein_id, "AAA00001.1");
        assert_eq!(row.nucl_accession, "TEST01.1");
        assert_eq!(row.prot_length, 100.0);
        assert_eq!(row.translation, "MKV");
    }

    #[test]
    fn test_scan_record_without_neighbor_produces_no_row() {
        let settings = ScanSettings::default();
        let seq = record(vec![
            source_feature(&[("organism", "Escherichia coli")]),
            cds(100, 400, &[("gene", "wbbM")]),
            cds(1500, 2400, &[("gene", "wzx"), ("product", "flippase")]),
        ]);
        let outcome = scan_record(&seq, &test_hit(90), &settings).unwrap();
        assert_eq!(outcome, ScanOutcome::NoNeighborMatch);
    }

    #[test]
    fn test_scan_record_without_target_is_skipped() {
        let settings = ScanSettings::default();
        // glf sits near position 0; with no target the record must be
        // skipped instead of scanning a window around a default start.
        let seq = record(vec![
            source_feature(&[("organism", "Escherichia coli")]),
            cds(10, 900, &[("gene", "glf")]),
        ]);
        let outcome = scan_record(&seq, &test_hit(5000), &settings).unwrap();
        assert_eq!(outcome, ScanOutcome::NoTargetCds);
    }

    struct FakeFetcher {
        records: Vec<Result<String>>,
    }

    impl RecordFetcher for FakeFetcher {
        fn fetch_record(&self, _handle: &EpostHandle, index: usize) -> Result<String> {
            match self.records.get(index) {
                Some(Ok(text)) => Ok(text.clone()),
                Some(Err(e)) => Err(anyhow!("{e}")),
                None => Err(anyhow!("No record at index {index}")),
            }
        }
    }

    impl BatchSubmitter for FakeFetcher {
        fn post_accessions(&self, accessions: &[String]) -> Result<EpostHandle> {
            assert!(!accessions.is_empty());
            Ok(EpostHandle {
                query_key: "1".to_string(),
                web_env: "NCID_TEST".to_string(),
            })
        }
    }

    struct RefusingHistoryServer;

    impl BatchSubmitter for RefusingHistoryServer {
        fn post_accessions(&self, _accessions: &[String]) -> Result<EpostHandle> {
            Err(anyhow!("Entrez epost reported an error: Wrong DB name"))
        }
    }

    impl RecordFetcher for RefusingHistoryServer {
        fn fetch_record(&self, _handle: &EpostHandle, index: usize) -> Result<String> {
            Err(anyhow!("No record at index {index}"))
        }
    }

    fn genbank_text(accession: &str, features: Vec<Feature>) -> String {
        let mut seq = record(features);
        seq.name = Some(accession.to_string());
        seq.accession = Some(accession.to_string());
        seq.version = Some(format!("{accession}.1"));
        let mut buffer = Vec::new();
        gb_io::writer::write(&mut buffer, &seq).unwrap();
        String::from_utf8(buffer).unwrap()
    }

    #[test]
    fn test_parse_genbank_record_round_trip() {
        let text = genbank_text(
            "TESTA",
            vec![source_feature(&[("organism", "Escherichia coli")])],
        );
        let seq = parse_genbank_record(&text).unwrap();
        assert_eq!(seq.version.as_deref(), Some("TESTA.1"));
        let info = extract_source_info(&seq).unwrap();
        assert_eq!(info.organism, "Escherichia coli");
    }

    #[test]
    fn test_run_scan_end_to_end_with_fake_fetcher() {
        let matching = genbank_text(
            "TESTA",
            vec![
                source_feature(&[("organism", "Escherichia coli"), ("strain", "K-12")]),
                cds(
                    100,
                    400,
                    &[("gene", "wbbM"), ("protein_id", "AAA00001.1"), ("translation", "MKV")],
                ),
                cds(1500, 2400, &[("gene", "glf")]),
            ],
        );
        let non_matching = genbank_text(
            "TESTB",
            vec![
                source_feature(&[("organism", "Shigella flexneri")]),
                cds(100, 400, &[("gene", "wbbM")]),
                cds(1500, 2400, &[("gene", "wzx")]),
            ],
        );
        let fetcher = FakeFetcher {
            records: vec![
                Ok(matching),
                Ok(non_matching),
                Err(anyhow!("simulated server failure")),
            ],
        };
        let handle = EpostHandle {
            query_key: "1".to_string(),
            web_env: "NCID_TEST".to_string(),
        };
        let hits = vec![
            Hit { accession: "TESTA.1".to_string(), hsp_start: 90 },
            Hit { accession: "TESTB.1".to_string(), hsp_start: 90 },
            Hit { accession: "TESTC.1".to_string(), hsp_start: 90 },
        ];
        let settings = ScanSettings::default();
        let mut writer = ReportWriter::from_writer(Vec::new()).unwrap();
        let summary = run_scan(&fetcher, &handle, &hits, &settings, &mut writer).unwrap();
        assert_eq!(summary.processed, 3);
        assert_eq!(summary.matched, 1);
        assert_eq!(summary.skipped, 1);

        let text = String::from_utf8(writer.into_inner().unwrap()).unwrap();
        let lines: Vec<&str> = text.lines().collect();
        assert_eq!(lines.len(), 2, "header plus one matched row: {text}");
        assert!(lines[1].starts_with("Escherichia coli\tK-12\t"), "got: {}", lines[1]);
        assert!(lines[1].contains("TESTA.1"), "got: {}", lines[1]);
        assert!(!text.contains("TESTB.1"), "non-match must not appear: {text}");
    }

    #[test]
    fn test_post_and_scan_writes_the_report() {
        let matching = genbank_text(
            "TESTA",
            vec![
                source_feature(&[("organism", "Escherichia coli")]),
                cds(
                    100,
                    400,
                    &[("gene", "wbbM"), ("protein_id", "AAA00001.1"), ("translation", "MKV")],
                ),
                cds(1500, 2400, &[("gene", "glf")]),
            ],
        );
        let client = FakeFetcher {
            records: vec![Ok(matching)],
        };
        let hits = vec![test_hit(90)];
        let dir = tempfile::tempdir().unwrap();
        let report_path = dir.path().join("report.tsv");
        let report_path = report_path.to_str().unwrap();

        let summary = post_and_scan(&client, &hits, &ScanSettings::default(), report_path).unwrap();
        assert_eq!(summary.processed, 1);
        assert_eq!(summary.matched, 1);

        let text = fs::read_to_string(report_path).unwrap();
        let lines: Vec<&str> = text.lines().collect();
        assert_eq!(lines.len(), 2, "header plus one row: {text}");
        assert!(lines[0].starts_with("organism\tstrain\t"), "got: {}", lines[0]);
        assert!(lines[1].contains("AAA00001.1"), "got: {}", lines[1]);
    }

    #[test]
    fn test_failed_epost_leaves_existing_report_untouched() {
        let dir = tempfile::tempdir().unwrap();
        let report_path = dir.path().join("report.tsv");
        let previous = "organism\tstrain\tserotype\tprotein_id\tnucl_accession\tprot_length\ttranslation\nEscherichia coli\tK-12\t\tAAA00001.1\tTESTA.1\t100.0\tMKV\n";
        fs::write(&report_path, previous).unwrap();

        let hits = vec![test_hit(90)];
        let err = post_and_scan(
            &RefusingHistoryServer,
            &hits,
            &ScanSettings::default(),
            report_path.to_str().unwrap(),
        )
        .unwrap_err();
        assert!(err.to_string().contains("Wrong DB name"), "got: {err}");
        assert_eq!(fs::read_to_string(&report_path).unwrap(), previous);
    }
}
