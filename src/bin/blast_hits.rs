use anyhow::{anyhow, Result};
use glf_screen::{blast_xml, hits};
use std::{env, process};

fn usage() {
    eprintln!(
        "Usage:\n  \
  blast_hits INPUT.xml OUTPUT.csv\n\n  \
  Parses a single-query BLAST XML report and writes one\n  \
  'accession,hsp_start' line per high-scoring segment pair, in report\n  \
  order, with no header."
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
    if args.iter().any(|a| a == "--help" || a == "-h") {
        usage();
        return Ok(());
    }
    if args.len() != 3 {
        usage();
        return Err(anyhow!("Expected INPUT.xml and OUTPUT.csv arguments"));
    }
    let input_path = &args[1];
    let output_path = &args[2];

    let pairs = blast_xml::extract_hits_from_file(input_path)?;
    hits::write_hits_file(output_path, &pairs)?;
    println!(
        "Extracted {} accession/HSP-start pairs to '{output_path}'",
        pairs.len()
    );
    Ok(())
}
