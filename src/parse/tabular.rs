// src/parse/tabular.rs — Tabular uploads (.xlsx or delimited text)
//
// .xlsx files are ZIP archives containing XML; we read the first worksheet
// (xl/worksheets/sheet1.xml) and resolve cells through xl/sharedStrings.xml.
// Anything that is not a ZIP is read as delimited text through the csv crate;
// the separator (tab, semicolon or comma) is picked from the header row.

use std::io::{Cursor, Read};

use super::ParseError;
use crate::compute::Dataset;
use crate::session::TabularUse;

/// Header names accepted as the label column for expert knowledge bases.
pub const LABEL_COLUMN_NAMES: &[&str] = &["respuesta", "answer", "decision", "label"];

const ZIP_MAGIC: &[u8] = b"PK\x03\x04";

pub fn parse_dataset(bytes: &[u8], use_case: TabularUse) -> Result<Dataset, ParseError> {
    let table = read_table(bytes)?;
    build_dataset(table, use_case)
}

/// Read the raw cell grid, header row first.
pub fn read_table(bytes: &[u8]) -> Result<Vec<Vec<String>>, ParseError> {
    if bytes.is_empty() {
        return Err(ParseError::EmptyUpload);
    }
    if bytes.starts_with(ZIP_MAGIC) {
        read_xlsx(bytes)
    } else {
        let text = std::str::from_utf8(bytes).map_err(|_| ParseError::NotUtf8)?;
        read_delimited(text)
    }
}

fn build_dataset(table: Vec<Vec<String>>, use_case: TabularUse) -> Result<Dataset, ParseError> {
    let mut rows = table.into_iter();
    let header: Vec<String> = rows
        .next()
        .ok_or(ParseError::EmptyTable)?
        .into_iter()
        .map(|h| h.trim().to_string())
        .collect();
    if header.len() < 2 {
        return Err(ParseError::TooFewColumns);
    }

    let label_idx = match use_case {
        TabularUse::Classifier => header.len() - 1,
        TabularUse::Expert => header
            .iter()
            .position(|h| {
                LABEL_COLUMN_NAMES
                    .iter()
                    .any(|name| h.eq_ignore_ascii_case(name))
            })
            .ok_or_else(|| ParseError::MissingLabelColumn {
                expected: LABEL_COLUMN_NAMES.join(", "),
            })?,
    };

    let features: Vec<String> = header
        .iter()
        .enumerate()
        .filter(|(i, _)| *i != label_idx)
        .map(|(_, h)| h.clone())
        .collect();

    let mut data = Vec::new();
    let mut labels = Vec::new();
    for (offset, row) in rows.enumerate() {
        if row.iter().all(|c| c.trim().is_empty()) {
            continue;
        }
        // Line numbers as a spreadsheet user sees them: header is row 1.
        let line = offset + 2;
        let cell = |i: usize| row.get(i).map(|c| c.trim()).unwrap_or("");

        let mut values = Vec::with_capacity(features.len());
        for (i, column) in header.iter().enumerate() {
            if i == label_idx {
                continue;
            }
            let raw = cell(i);
            let value = raw.parse::<f64>().ok().filter(|v| v.is_finite()).ok_or_else(|| {
                ParseError::NonNumeric {
                    row: line,
                    column: column.clone(),
                    value: raw.to_string(),
                }
            })?;
            values.push(value);
        }

        let label = cell(label_idx);
        if label.is_empty() {
            return Err(ParseError::MissingLabel { row: line });
        }
        data.push(values);
        labels.push(label.to_string());
    }

    if data.is_empty() {
        return Err(ParseError::EmptyTable);
    }

    Ok(Dataset {
        features,
        label_column: header[label_idx].clone(),
        rows: data,
        labels,
    })
}

// ---------------------------------------------------------------------------
// Delimited text
// ---------------------------------------------------------------------------

fn read_delimited(text: &str) -> Result<Vec<Vec<String>>, ParseError> {
    let text = text.trim_start_matches('\u{feff}');
    let header = text.lines().find(|l| !l.trim().is_empty()).unwrap_or("");

    let mut reader = csv::ReaderBuilder::new()
        .has_headers(false)
        .flexible(true)
        .trim(csv::Trim::All)
        .delimiter(detect_delimiter(header))
        .from_reader(text.as_bytes());

    let mut table = Vec::new();
    for record in reader.records() {
        let record = record?;
        if record.iter().all(str::is_empty) {
            continue;
        }
        table.push(record.iter().map(str::to_string).collect());
    }
    Ok(table)
}

/// Tab, then semicolon, then comma, counting only separators outside quotes.
fn detect_delimiter(header: &str) -> u8 {
    let mut quoted = false;
    let (mut tabs, mut semis, mut commas) = (0, 0, 0);
    for ch in header.chars() {
        match ch {
            '"' => quoted = !quoted,
            '\t' if !quoted => tabs += 1,
            ';' if !quoted => semis += 1,
            ',' if !quoted => commas += 1,
            _ => {}
        }
    }
    if tabs > 0 {
        b'\t'
    } else if semis > 0 && commas == 0 {
        b';'
    } else {
        b','
    }
}

// ---------------------------------------------------------------------------
// XLSX (minimal XML scanning)
// ---------------------------------------------------------------------------

fn read_xlsx(bytes: &[u8]) -> Result<Vec<Vec<String>>, ParseError> {
    let mut archive = zip::ZipArchive::new(Cursor::new(bytes))?;

    let shared_strings = if let Ok(mut entry) = archive.by_name("xl/sharedStrings.xml") {
        let mut xml = String::new();
        entry.read_to_string(&mut xml)?;
        parse_shared_strings(&xml)
    } else {
        Vec::new()
    };

    let mut sheet_xml = String::new();
    {
        let mut entry = archive.by_name("xl/worksheets/sheet1.xml")?;
        entry.read_to_string(&mut sheet_xml)?;
    }

    Ok(parse_sheet(&sheet_xml, &shared_strings))
}

/// Iterate over `(tag, text_before_tag)` pairs of an XML document.
fn scan_tags(xml: &str) -> impl Iterator<Item = (String, String)> + '_ {
    let mut chars = xml.chars();
    std::iter::from_fn(move || {
        let mut text = String::new();
        for ch in chars.by_ref() {
            if ch == '<' {
                let mut tag = String::new();
                for c in chars.by_ref() {
                    if c == '>' {
                        break;
                    }
                    tag.push(c);
                }
                return Some((tag.trim().to_string(), text));
            }
            text.push(ch);
        }
        None
    })
}

fn is_open(tag: &str, name: &str) -> bool {
    tag == name || (tag.starts_with(name) && tag[name.len()..].starts_with(' '))
}

/// Shared strings: one entry per `<si>`, concatenating rich-text runs.
fn parse_shared_strings(xml: &str) -> Vec<String> {
    let mut strings = Vec::new();
    let mut current = String::new();
    let mut in_t = false;

    for (tag, text) in scan_tags(xml) {
        if in_t {
            current.push_str(&text);
        }
        if is_open(&tag, "si") {
            current.clear();
        } else if tag == "/si" {
            strings.push(unescape_xml(&current));
        } else if is_open(&tag, "t") && !tag.ends_with('/') {
            in_t = true;
        } else if tag == "/t" {
            in_t = false;
        }
    }

    strings
}

#[derive(Clone, Copy, PartialEq)]
enum CellType {
    Plain,
    Shared,
    Inline,
}

fn parse_sheet(sheet_xml: &str, shared_strings: &[String]) -> Vec<Vec<String>> {
    let mut rows: Vec<Vec<String>> = Vec::new();
    let mut current_row: Vec<String> = Vec::new();
    let mut next_col = 0usize;
    let mut cell_col = 0usize;
    let mut cell_type = CellType::Plain;
    let mut in_value = false;
    let mut value = String::new();

    for (tag, text) in scan_tags(sheet_xml) {
        if in_value {
            value.push_str(&text);
        }

        if is_open(&tag, "row") {
            current_row = Vec::new();
            next_col = 0;
        } else if tag == "/row" {
            if current_row.iter().any(|c| !c.is_empty()) {
                rows.push(std::mem::take(&mut current_row));
            }
        } else if is_open(&tag, "c") {
            cell_col = attr(&tag, "r").and_then(column_index).unwrap_or(next_col);
            next_col = cell_col + 1;
            cell_type = match attr(&tag, "t") {
                Some("s") => CellType::Shared,
                Some("inlineStr") => CellType::Inline,
                _ => CellType::Plain,
            };
        } else if tag == "v" || (is_open(&tag, "t") && cell_type == CellType::Inline) {
            in_value = !tag.ends_with('/');
            value.clear();
        } else if tag == "/v" || tag == "/t" {
            if !in_value {
                continue;
            }
            in_value = false;
            let resolved = if cell_type == CellType::Shared {
                value
                    .trim()
                    .parse::<usize>()
                    .ok()
                    .and_then(|i| shared_strings.get(i).cloned())
                    .unwrap_or_default()
            } else {
                unescape_xml(&value)
            };
            if current_row.len() <= cell_col {
                current_row.resize(cell_col + 1, String::new());
            }
            current_row[cell_col] = resolved;
        }
    }

    rows
}

/// Value of `name="..."` inside a start tag.
fn attr<'a>(tag: &'a str, name: &str) -> Option<&'a str> {
    let needle = format!(" {name}=\"");
    let start = tag.find(&needle)? + needle.len();
    let len = tag[start..].find('"')?;
    Some(&tag[start..start + len])
}

/// "C7" -> 2 (zero-based column index).
fn column_index(reference: &str) -> Option<usize> {
    let letters: String = reference
        .chars()
        .take_while(|c| c.is_ascii_alphabetic())
        .collect();
    if letters.is_empty() {
        return None;
    }
    let n = letters.chars().fold(0usize, |acc, c| {
        acc * 26 + (c.to_ascii_uppercase() as usize - 'A' as usize + 1)
    });
    Some(n - 1)
}

fn unescape_xml(s: &str) -> String {
    s.replace("&lt;", "<")
        .replace("&gt;", ">")
        .replace("&quot;", "\"")
        .replace("&apos;", "'")
        .replace("&amp;", "&")
}
