//! Question sheets (CSV, Excel) → draft questions.
//!
//! The first row holds column names matching the question-bank fields
//! (`question_text_en`, `option_a_en`, `correct_option`, ...). A few common
//! spellings such as `Question`, `A`, `Answer` are accepted too.

use anyhow::{Context, Result};
use calamine::{open_workbook_from_rs, Data, Reader, Xlsb, Xlsx};
use std::io::{Cursor, Read, Seek};
use tracing::{info, warn};

use crate::error::ExtractError;
use crate::parser::fields::normalize_difficulty;
use crate::parser::DraftQuestion;
use crate::schema::OptionLetter;

/// Raw sheet data: first row as headers.
#[derive(Debug, Clone)]
pub struct RawSheet {
    pub name: String,
    pub headers: Vec<String>,
    pub rows: Vec<Vec<String>>,
}

/// Dispatch file parsing by extension.
pub fn parse_file(filename: &str, data: &[u8]) -> Result<Vec<RawSheet>> {
    let ext = filename.rsplit('.').next().unwrap_or("").to_lowercase();

    match ext.as_str() {
        "csv" => parse_csv(filename, data),
        "xlsx" | "xlsm" => {
            let workbook: Xlsx<_> = open_workbook_from_rs(Cursor::new(data))
                .context("Failed to open Excel workbook")?;
            read_workbook(workbook)
        }
        "xlsb" => {
            let workbook: Xlsb<_> = open_workbook_from_rs(Cursor::new(data))
                .context("Failed to open Excel workbook")?;
            read_workbook(workbook)
        }
        _ => anyhow::bail!(
            "Unsupported file type: .{}. Supported: .csv, .xlsx, .xlsm, .xlsb",
            ext
        ),
    }
}

fn parse_csv(filename: &str, data: &[u8]) -> Result<Vec<RawSheet>> {
    let mut reader = csv::ReaderBuilder::new()
        .flexible(true)
        .has_headers(true)
        .from_reader(data);

    let headers: Vec<String> = reader
        .headers()
        .context("Failed to read CSV headers")?
        .iter()
        .map(|h| h.to_string())
        .collect();

    if headers.is_empty() {
        anyhow::bail!("CSV file has no headers");
    }

    let mut rows = Vec::new();
    for result in reader.records() {
        let record = result.context("Failed to read CSV record")?;
        rows.push(record.iter().map(|f| f.to_string()).collect());
    }

    let name = filename
        .rsplit(['/', '\\'])
        .next()
        .unwrap_or(filename)
        .trim_end_matches(".csv")
        .to_string();

    Ok(vec![RawSheet {
        name,
        headers,
        rows,
    }])
}

/// Every worksheet with a header row and at least one data row.
fn read_workbook<RS, R>(mut workbook: R) -> Result<Vec<RawSheet>>
where
    RS: Read + Seek,
    R: Reader<RS>,
{
    let mut sheets = Vec::new();

    for name in workbook.sheet_names() {
        let range = match workbook.worksheet_range(&name) {
            Ok(r) => r,
            Err(e) => {
                warn!("Skipping sheet '{}': {:?}", name, e);
                continue;
            }
        };

        if let Some(sheet) = range_to_raw_sheet(&name, &range) {
            sheets.push(sheet);
        }
    }

    if sheets.is_empty() {
        anyhow::bail!("No sheets with data found in workbook");
    }

    Ok(sheets)
}

fn range_to_raw_sheet(name: &str, range: &calamine::Range<Data>) -> Option<RawSheet> {
    let mut row_iter = range.rows();

    let headers: Vec<String> = row_iter.next()?.iter().map(cell_to_string).collect();
    if headers.iter().all(|h| h.is_empty()) {
        return None;
    }

    let rows: Vec<Vec<String>> = row_iter
        .map(|row| row.iter().map(cell_to_string).collect::<Vec<_>>())
        .filter(|values| values.iter().any(|v| !v.is_empty()))
        .collect();

    if rows.is_empty() {
        return None;
    }

    Some(RawSheet {
        name: name.to_string(),
        headers,
        rows,
    })
}

fn cell_to_string(cell: &Data) -> String {
    match cell {
        Data::Empty => String::new(),
        Data::String(s) => s.trim().to_string(),
        Data::Int(i) => i.to_string(),
        Data::Float(f) => {
            // Avoid trailing ".0" for whole numbers
            if f.fract() == 0.0 && f.abs() < i64::MAX as f64 {
                format!("{}", *f as i64)
            } else {
                format!("{}", f)
            }
        }
        Data::Bool(b) => b.to_string(),
        Data::DateTime(dt) => dt.as_f64().to_string(),
        Data::DateTimeIso(s) => s.clone(),
        Data::DurationIso(s) => s.clone(),
        Data::Error(e) => format!("#ERR:{:?}", e),
    }
}

// ============================================================================
// Column mapping
// ============================================================================

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum Column {
    Number,
    TextEn,
    TextHi,
    OptionEn(usize),
    OptionHi(usize),
    Answer,
    ExplanationEn,
    ExplanationHi,
    Source,
    Difficulty,
}

fn column_for(header: &str) -> Option<Column> {
    let key = header.trim().to_lowercase().replace([' ', '-'], "_");
    let column = match key.as_str() {
        "question_number" | "number" | "no" | "q_no" | "sr_no" => Column::Number,
        "question_text_en" | "question" | "question_en" | "question_text" => Column::TextEn,
        "question_text_hi" | "question_hi" => Column::TextHi,
        "correct_option" | "answer" | "correct" | "ans" => Column::Answer,
        "explanation_en" | "explanation" => Column::ExplanationEn,
        "explanation_hi" => Column::ExplanationHi,
        "source" => Column::Source,
        "difficulty" => Column::Difficulty,
        other => {
            let (stem, lang_hi) = match other.strip_suffix("_hi") {
                Some(stem) => (stem, true),
                None => (other.strip_suffix("_en").unwrap_or(other), false),
            };
            let letter = stem.strip_prefix("option_").unwrap_or(stem);
            let index = OptionLetter::parse(letter)?.index();
            if lang_hi {
                Column::OptionHi(index)
            } else {
                Column::OptionEn(index)
            }
        }
    };
    Some(column)
}

/// Convert sheet rows into drafts. Rows without question text are skipped.
pub fn sheets_to_drafts(sheets: &[RawSheet]) -> Result<Vec<DraftQuestion>, ExtractError> {
    let mut drafts = Vec::new();

    for sheet in sheets {
        let columns: Vec<Option<Column>> = sheet.headers.iter().map(|h| column_for(h)).collect();
        if !columns.contains(&Some(Column::TextEn)) {
            warn!("Sheet '{}' has no question text column, skipping", sheet.name);
            continue;
        }

        for row in &sheet.rows {
            let mut draft = DraftQuestion::default();
            for (column, value) in columns.iter().zip(row) {
                let value = value.trim();
                let Some(column) = column else { continue };
                match *column {
                    Column::Number => draft.number = value.parse().unwrap_or(0),
                    Column::TextEn => draft.text_en = value.to_string(),
                    Column::TextHi => draft.text_hi = value.to_string(),
                    Column::OptionEn(i) => draft.options_en[i] = value.to_string(),
                    Column::OptionHi(i) => draft.options_hi[i] = value.to_string(),
                    Column::Answer => draft.answer = OptionLetter::parse(value),
                    Column::ExplanationEn => draft.explanation_en = value.to_string(),
                    Column::ExplanationHi => draft.explanation_hi = value.to_string(),
                    Column::Source => {
                        draft.source = (!value.is_empty()).then(|| value.to_string())
                    }
                    Column::Difficulty => {
                        draft.difficulty =
                            (!value.is_empty()).then(|| normalize_difficulty(value))
                    }
                }
            }
            if draft.is_valid() {
                drafts.push(draft);
            }
        }
    }

    if drafts.is_empty() {
        return Err(ExtractError::Empty);
    }

    info!("Read {} questions from {} sheet(s)", drafts.len(), sheets.len());
    Ok(drafts)
}
