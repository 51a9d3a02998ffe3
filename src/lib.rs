pub mod blast;
pub mod blast_xml;
pub mod entrez;
pub mod hits;
pub mod report;
pub mod scan;
pub mod settings;
