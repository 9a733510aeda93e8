//! Variable dump: one record per leaf symbol, written as `VariableDump.csv` and `VariableDump.xml`.
//!
//! Constraints:
//! - records follow the flat symbol order; symbol/value count mismatch aborts the dump
//! - CSV: no header, `;` delimited, columns path;type;group;offset;size;value
//! - XML: `<Symbols><Symbol>` with Path, Type, IndexGroup, IndexOffset, Size, CurrentValue;
//!   characters not allowed in XML 1.0 are dropped, markup characters are escaped
//!   (`&` is kept as `&amp;`; earlier dumps removed it from the text)

use std::path::{Path, PathBuf};

use anyhow::{Context, Result};
use serde::{Deserialize, Serialize};

use crate::symbols::adapters::driver::RawReadResult;
use crate::symbols::adapters::storage::write_text_atomic;
use crate::symbols::core::codec::{decode_display, CodecOptions};
use crate::symbols::core::model::LeafSymbol;
use crate::symbols::usecase::engine::{check_integrity, IntegrityError};

pub const DUMP_CSV_FILE_NAME: &str = "VariableDump.csv";
pub const DUMP_XML_FILE_NAME: &str = "VariableDump.xml";

const CSV_DELIMITER: char = ';';

#[derive(Clone, Debug, Serialize, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "camelCase")]
pub struct DumpRecord {
    pub path: String,
    pub type_tag: String,
    pub address_group: u64,
    pub address_offset: u64,
    pub size: u32,
    pub value: String,
}

#[derive(Clone, Debug, PartialEq, Eq)]
pub struct DumpFiles {
    pub csv_path: PathBuf,
    pub xml_path: PathBuf,
}

pub fn build_dump_records(
    symbols: &[LeafSymbol],
    values: &[RawReadResult],
    codec_options: &CodecOptions,
) -> Result<Vec<DumpRecord>, IntegrityError> {
    check_integrity(symbols.len(), values.len(), None)?;

    Ok(symbols
        .iter()
        .zip(values)
        .map(|(symbol, raw)| DumpRecord {
            path: symbol.path.clone(),
            type_tag: symbol.type_tag.clone(),
            address_group: symbol.address_group,
            address_offset: symbol.address_offset,
            size: symbol.size,
            value: decode_display(&symbol.type_tag, symbol.size, codec_options, |_| raw.clone()),
        })
        .collect())
}

pub fn render_csv(records: &[DumpRecord]) -> String {
    let mut out = String::new();
    for r in records {
        let d = CSV_DELIMITER;
        out.push_str(&format!(
            "{}{d}{}{d}{}{d}{}{d}{}{d}{}\n",
            r.path, r.type_tag, r.address_group, r.address_offset, r.size, r.value
        ));
    }
    out
}

pub fn render_xml(records: &[DumpRecord]) -> String {
    let mut out = String::from("<?xml version=\"1.0\" encoding=\"utf-8\"?>\n<Symbols>\n");
    for r in records {
        out.push_str("  <Symbol>\n");
        push_element(&mut out, "Path", &r.path);
        push_element(&mut out, "Type", &r.type_tag);
        push_element(&mut out, "IndexGroup", &r.address_group.to_string());
        push_element(&mut out, "IndexOffset", &r.address_offset.to_string());
        push_element(&mut out, "Size", &r.size.to_string());
        push_element(&mut out, "CurrentValue", &r.value);
        out.push_str("  </Symbol>\n");
    }
    out.push_str("</Symbols>\n");
    out
}

fn push_element(out: &mut String, name: &str, text: &str) {
    let text = xml_text(text);
    if text.is_empty() {
        out.push_str(&format!("    <{name} />\n"));
    } else {
        out.push_str(&format!("    <{name}>{text}</{name}>\n"));
    }
}

fn is_xml_char(c: char) -> bool {
    matches!(c,
        '\u{9}' | '\u{A}' | '\u{D}'
        | '\u{20}'..='\u{D7FF}'
        | '\u{E000}'..='\u{FFFD}'
        | '\u{10000}'..='\u{10FFFF}')
}

fn xml_text(raw: &str) -> String {
    let mut out = String::with_capacity(raw.len());
    for c in raw.chars().filter(|c| is_xml_char(*c)) {
        match c {
            '&' => out.push_str("&amp;"),
            '<' => out.push_str("&lt;"),
            '>' => out.push_str("&gt;"),
            _ => out.push(c),
        }
    }
    out
}

/// Writes both dump files into `dir` (created if missing), XML first.
pub fn write_dump(dir: &Path, records: &[DumpRecord]) -> Result<DumpFiles> {
    let xml_path = dir.join(DUMP_XML_FILE_NAME);
    write_text_atomic(&xml_path, &render_xml(records))
        .with_context(|| format!("Failed to write dump file: {}", xml_path.display()))?;

    let csv_path = dir.join(DUMP_CSV_FILE_NAME);
    write_text_atomic(&csv_path, &render_csv(records))
        .with_context(|| format!("Failed to write dump file: {}", csv_path.display()))?;

    log::info!("dump written: records={} dir={}", records.len(), dir.display());
    Ok(DumpFiles { csv_path, xml_path })
}
