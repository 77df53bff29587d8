//! Spreadsheet parser
//!
//! Turns an uploaded file buffer into `RawRow`s. Workbooks (xlsx, xls, ods)
//! are read with calamine, first sheet only. Anything that sniffs as plain
//! UTF-8 text is read as CSV. A file with no sheets, or whose first sheet has
//! a header but no data rows, is a `ParseError` rather than an empty success.

use crate::error::ParseError;
use crate::models::{CellValue, RawRow};
use calamine::{open_workbook_auto_from_rs, Data, Reader};
use std::io::Cursor;

/// Source format after content sniffing
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SourceFormat {
    Workbook,
    Csv,
}

/// Sniff the buffer. Zip and OLE containers go to calamine, which makes the
/// final call on the workbook flavor. CSV must be UTF-8; other text encodings
/// are rejected with the offset of the first invalid byte.
pub fn detect_format(buffer: &[u8]) -> Result<SourceFormat, ParseError> {
    match infer::get(buffer).map(|kind| kind.extension()) {
        Some("xlsx" | "xls" | "ods" | "zip" | "doc" | "docx" | "ppt" | "pptx" | "msi") => {
            Ok(SourceFormat::Workbook)
        }
        Some(_) => Err(ParseError::UnsupportedFormat),
        None => match std::str::from_utf8(buffer) {
            Ok(_) => Ok(SourceFormat::Csv),
            Err(e) => Err(ParseError::NotUtf8 {
                offset: e.valid_up_to(),
            }),
        },
    }
}

/// Parse an uploaded transcript into raw rows
pub fn parse_transcript(buffer: &[u8]) -> Result<Vec<RawRow>, ParseError> {
    if buffer.is_empty() {
        return Err(ParseError::EmptySheet);
    }

    let rows = match detect_format(buffer)? {
        SourceFormat::Workbook => parse_workbook(buffer)?,
        SourceFormat::Csv => parse_csv(buffer)?,
    };

    tracing::info!(rows = rows.len(), "Parsed transcript rows");
    Ok(rows)
}

fn parse_workbook(buffer: &[u8]) -> Result<Vec<RawRow>, ParseError> {
    let mut workbook = open_workbook_auto_from_rs(Cursor::new(buffer.to_vec()))
        .map_err(|e| ParseError::Workbook(e.to_string()))?;

    let sheet_name = workbook
        .sheet_names()
        .first()
        .cloned()
        .ok_or(ParseError::NoSheets)?;

    let range = workbook
        .worksheet_range(&sheet_name)
        .map_err(|e| ParseError::Workbook(e.to_string()))?;

    tracing::debug!(sheet = %sheet_name, "Reading first worksheet");

    let mut grid = range
        .rows()
        .map(|row| row.iter().map(cell_from_data).collect::<Vec<_>>());

    let header = grid.next().ok_or(ParseError::EmptySheet)?;
    rows_from_grid(header, grid)
}

fn cell_from_data(cell: &Data) -> CellValue {
    match cell {
        Data::Empty => CellValue::Empty,
        Data::String(s) if s.is_empty() => CellValue::Empty,
        Data::String(s) => CellValue::Text(s.clone()),
        Data::Float(f) => CellValue::Number(*f),
        Data::Int(i) => CellValue::Number(*i as f64),
        Data::Bool(b) => CellValue::Text(if *b { "TRUE" } else { "FALSE" }.to_string()),
        other => CellValue::Text(other.to_string()),
    }
}

fn parse_csv(buffer: &[u8]) -> Result<Vec<RawRow>, ParseError> {
    let text = std::str::from_utf8(buffer).map_err(|e| ParseError::NotUtf8 {
        offset: e.valid_up_to(),
    })?;
    let text = text.strip_prefix('\u{feff}').unwrap_or(text);

    let mut reader = csv::ReaderBuilder::new()
        .has_headers(false)
        .flexible(true)
        .delimiter(sniff_delimiter(text))
        .from_reader(text.as_bytes());

    let mut grid = Vec::new();
    for record in reader.records() {
        let record = record.map_err(|e| ParseError::Csv(e.to_string()))?;
        grid.push(
            record
                .iter()
                .map(|field| {
                    if field.is_empty() {
                        CellValue::Empty
                    } else {
                        CellValue::Text(field.to_string())
                    }
                })
                .collect::<Vec<_>>(),
        );
    }

    let mut grid = grid.into_iter();
    let header = grid.next().ok_or(ParseError::EmptySheet)?;
    rows_from_grid(header, grid)
}

/// Spreadsheet exports with a comma decimal separator use ';'
fn sniff_delimiter(text: &str) -> u8 {
    let first_line = text.lines().next().unwrap_or("");
    [b',', b';', b'\t']
        .into_iter()
        .max_by_key(|d| first_line.bytes().filter(|b| b == d).count())
        .filter(|d| first_line.bytes().any(|b| b == *d))
        .unwrap_or(b',')
}

/// Zip the header row with each data row
///
/// Columns with a blank header are dropped. Fully blank rows are skipped.
fn rows_from_grid(
    header: Vec<CellValue>,
    data: impl Iterator<Item = Vec<CellValue>>,
) -> Result<Vec<RawRow>, ParseError> {
    let columns: Vec<(usize, String)> = header
        .iter()
        .enumerate()
        .filter(|(_, cell)| !cell.is_blank())
        .map(|(idx, cell)| (idx, cell.as_text()))
        .collect();

    let mut rows = Vec::new();
    for cells in data {
        let row: RawRow = columns
            .iter()
            .map(|(idx, name)| {
                let value = cells.get(*idx).cloned().unwrap_or(CellValue::Empty);
                (name.clone(), value)
            })
            .collect();

        if row.iter().all(|(_, value)| value.is_blank()) {
            continue;
        }
        rows.push(row);
    }

    if rows.is_empty() {
        return Err(ParseError::EmptySheet);
    }
    Ok(rows)
}
