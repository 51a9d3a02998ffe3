use anyhow::{anyhow, Result};
use bio::io::fasta;
use glf_screen::blast::BlastClient;
use glf_screen::settings::BlastSettings;
use std::{env, fs, process};

fn usage() {
    eprintln!(
        "Usage:\n  \
  blast_query [--settings SETTINGS.json] QUERY.fasta OUTPUT.xml\n\n  \
  Submits the query to the NCBI BLAST service and writes the raw XML\n  \
  report verbatim. Defaults: tblastn against nr, expect 1e-14, up to\n  \
  10000 hits; override any subset via the JSON settings file."
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
        return Err(anyhow!("Expected QUERY.fasta and OUTPUT.xml arguments"));
    }
    let settings = match settings_path {
        Some(path) => BlastSettings::from_json_file(&path)?,
        None => BlastSettings::default(),
    };
    let query_path = &positional[0];
    let output_path = &positional[1];

    let query_text = fs::read_to_string(query_path)
        .map_err(|e| anyhow!("Could not read query file '{query_path}': {e}"))?;
    validate_fasta(query_path, &query_text)?;

    println!(
        "Submitting {} query against '{}' (expect {:e}, up to {} hits)",
        settings.program, settings.database, settings.expect, settings.hitlist_size
    );
    let client = BlastClient::new()?;
    let report = client.search(&query_text, &settings)?;
    fs::write(output_path, &report)
        .map_err(|e| anyhow!("Could not write BLAST report '{output_path}': {e}"))?;
    println!("Wrote BLAST report to '{output_path}'");
    Ok(())
}

fn validate_fasta(path: &str, text: &str) -> Result<()> {
    let records: Vec<_> = fasta::Reader::new(text.as_bytes())
        .records()
        .collect::<Result<_, _>>()
        .map_err(|e| anyhow!("Query file '{path}' is not valid FASTA: {e}"))?;
    if records.is_empty() {
        return Err(anyhow!("Query file '{path}' contains no FASTA records"));
    }
    Ok(())
}
