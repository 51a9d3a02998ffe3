use anyhow::{anyhow, Result};
use glf_screen::entrez::EntrezClient;
use glf_screen::settings::{EntrezIdentity, ScanSettings};
use glf_screen::{hits, scan};
use std::{env, process};

fn usage() {
    eprintln!(
        "Usage:\n  \
  genome_scan [--settings SETTINGS.json] [--email ADDRESS] [--api-key KEY] HITS.csv REPORT.tsv\n\n  \
  Posts the accessions from HITS.csv to Entrez, fetches each GenBank\n  \
  record in input order, locates the CDS covering the HSP start, and\n  \
  appends a row to REPORT.tsv for every record with a marker gene\n  \
  within the neighbor window.\n\n  \
  The Entrez contact address is required (--email or NCBI_EMAIL); an\n  \
  API key (--api-key or NCBI_API_KEY) raises the request rate limit."
    );
}

fn main() {
    if let Err(e) = run() {
        eprintln!("{e:#}");
        process::exit(1);
    }
}

fn run() -> Result<()> {
    let args: Vec<String> = env::args().collect();
    let mut settings_path: Option<String> = None;
    let mut email_arg: Option<String> = None;
    let mut api_key_arg: Option<String> = None;
    let mut positional: Vec<String> = Vec::new();
    let mut i = 1;
    while i < args.len() {
        match args[i].as_str() {
            "--settings" => {
                i += 1;
                settings_path = Some(
                    args.get(i)
                        .cloned()
                        .ok_or_else(|| anyhow!("--settings requires a path"))?,
                );
            }
            "--email" => {
                i += 1;
                email_arg = Some(
                    args.get(i)
                        .cloned()
                        .ok_or_else(|| anyhow!("--email requires an address"))?,
                );
            }
            "--api-key" => {
                i += 1;
                api_key_arg = Some(
                    args.get(i)
                        .cloned()
                        .ok_or_else(|| anyhow!("--api-key requires a key"))?,
                );
            }
            "--help" | "-h" => {
                usage();
                return Ok(());
            }
            other => positional.push(other.to_string()),
        }
        i += 1;
    }
    if positional.len() != 2 {
        usage();
        return Err(anyhow!("Expected HITS.csv and REPORT.tsv arguments"));
    }
    let hits_path = &positional[0];
    let report_path = &positional[1];

    let settings = match settings_path {
        Some(path) => ScanSettings::from_json_file(&path)?,
        None => ScanSettings::default(),
    };
    let email = email_arg
        .or_else(|| env::var("NCBI_EMAIL").ok())
        .ok_or_else(|| anyhow!("Missing Entrez contact address (--email or NCBI_EMAIL)"))?;
    let api_key = api_key_arg.or_else(|| env::var("NCBI_API_KEY").ok());
    let identity = EntrezIdentity { email, api_key };

    let all_hits = hits::read_hits_file(hits_path)?;
    if all_hits.is_empty() {
        return Err(anyhow!("Hits file '{hits_path}' contains no records"));
    }

    let client = EntrezClient::new(&settings, &identity)?;
    let summary = scan::post_and_scan(&client, &all_hits, &settings, report_path)?;
    println!(
        "Processed {} records: {} matched, {} skipped on errors",
        summary.processed, summary.matched, summary.skipped
    );
    Ok(())
}
