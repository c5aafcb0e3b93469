//! Spreadsheet parsing
//!
//! Turns the first worksheet of an .xlsx/.xls/.ods workbook, or a .csv file,
//! into [`AcademicRecord`]s. The first non-blank row is the header; header
//! names are matched trimmed and case-insensitively, unknown columns are
//! ignored. Rows that lack required values or columns are reported, not
//! fatal.

use calamine::{open_workbook_auto_from_rs, Data, Reader};
use std::io::Cursor;
use std::path::Path;
use thiserror::Error;

use super::types::{AcademicRecord, RECORD_COLUMNS};

/// Extensions accepted for upload and ingestion
pub const SUPPORTED_EXTENSIONS: [&str; 4] = ["xlsx", "xls", "ods", "csv"];

/// Header labels as they appear in grade exports, in [`RECORD_COLUMNS`] order
const HEADER_LABELS: [&str; 17] = [
    "SNH",
    "Semester_Offered",
    "Current_Major",
    "Course_ID",
    "Course_Name",
    "Grade",
    "Grade_Remark",
    "Course_Type",
    "Course_Attribute",
    "Hours",
    "Credit",
    "Offering_Unit",
    "Tags",
    "Description",
    "Exam_Type",
    "Assessment_Method",
    "year",
];

const SNH: usize = 0;
const COURSE_ID: usize = 3;
const COURSE_NAME: usize = 4;

/// Row errors quoted in the file's error message
const QUOTED_ROW_ERRORS: usize = 5;

#[derive(Debug, Error)]
pub enum ParseError {
    #[error("Unsupported file type: {0}")]
    UnsupportedFormat(String),

    #[error("Unreadable workbook: {0}")]
    Workbook(String),

    #[error("Workbook has no worksheets")]
    NoWorksheet,

    #[error("Malformed CSV: {0}")]
    Csv(#[from] csv::Error),

    #[error("CSV file is not valid UTF-8")]
    NotUtf8,

    #[error("Sheet has no header row")]
    MissingHeader,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SheetFormat {
    Csv,
    Workbook,
}

impl SheetFormat {
    pub fn from_file_name(name: &str) -> Option<Self> {
        let extension = Path::new(name).extension()?.to_str()?.to_ascii_lowercase();
        match extension.as_str() {
            "csv" => Some(SheetFormat::Csv),
            "xlsx" | "xls" | "ods" => Some(SheetFormat::Workbook),
            _ => None,
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RowError {
    /// 1-based row number as shown by a spreadsheet program
    pub row: usize,
    pub message: String,
}

#[derive(Debug, Default)]
pub struct ParsedSheet {
    pub records: Vec<AcademicRecord>,
    /// Non-blank data rows read, valid or not
    pub total_rows: usize,
    pub row_errors: Vec<RowError>,
}

impl ParsedSheet {
    /// Short description of skipped rows, or `None` when every row was valid
    pub fn error_summary(&self) -> Option<String> {
        if self.row_errors.is_empty() {
            return None;
        }
        let quoted: Vec<String> = self
            .row_errors
            .iter()
            .take(QUOTED_ROW_ERRORS)
            .map(|e| format!("row {}: {}", e.row, e.message))
            .collect();
        let more = self.row_errors.len().saturating_sub(QUOTED_ROW_ERRORS);
        let tail = if more > 0 {
            format!("; and {more} more")
        } else {
            String::new()
        };
        Some(format!(
            "{} rows skipped ({}{})",
            self.row_errors.len(),
            quoted.join("; "),
            tail
        ))
    }
}

/// Parse `bytes` according to the extension of `file_name`. CPU-bound; call
/// from a blocking context.
pub fn parse_spreadsheet(file_name: &str, bytes: Vec<u8>) -> Result<ParsedSheet, ParseError> {
    let rows = match SheetFormat::from_file_name(file_name) {
        Some(SheetFormat::Csv) => read_csv(&bytes)?,
        Some(SheetFormat::Workbook) => read_workbook(bytes)?,
        None => return Err(ParseError::UnsupportedFormat(file_name.to_string())),
    };
    build_sheet(rows)
}

type Row = Vec<Option<String>>;

fn read_workbook(bytes: Vec<u8>) -> Result<Vec<(usize, Row)>, ParseError> {
    let mut workbook = open_workbook_auto_from_rs(Cursor::new(bytes))
        .map_err(|e| ParseError::Workbook(e.to_string()))?;
    let range = workbook
        .worksheet_range_at(0)
        .ok_or(ParseError::NoWorksheet)?
        .map_err(|e| ParseError::Workbook(e.to_string()))?;

    // rows() starts at the first used cell, not at A1
    let first_row = range.start().map_or(0, |(row, _)| row as usize);
    let leading_cols = range.start().map_or(0, |(_, col)| col as usize);

    Ok(range
        .rows()
        .enumerate()
        .map(|(i, cells)| {
            let mut row: Row = vec![None; leading_cols];
            row.extend(cells.iter().map(cell_text));
            (first_row + i + 1, row)
        })
        .collect())
}

fn read_csv(bytes: &[u8]) -> Result<Vec<(usize, Row)>, ParseError> {
    let text = std::str::from_utf8(bytes).map_err(|_| ParseError::NotUtf8)?;
    let text = text.strip_prefix('\u{feff}').unwrap_or(text);

    let mut reader = csv::ReaderBuilder::new()
        .has_headers(false)
        .flexible(true)
        .from_reader(text.as_bytes());

    let mut rows = Vec::new();
    for (i, result) in reader.records().enumerate() {
        let record = result?;
        let line = record.position().map_or(i + 1, |p| p.line() as usize);
        rows.push((line, record.iter().map(non_blank).collect()));
    }
    Ok(rows)
}

fn non_blank(value: &str) -> Option<String> {
    let trimmed = value.trim();
    (!trimmed.is_empty()).then(|| trimmed.to_string())
}

fn cell_text(cell: &Data) -> Option<String> {
    match cell {
        Data::Empty | Data::Error(_) => None,
        Data::String(s) => non_blank(s),
        Data::Int(i) => Some(i.to_string()),
        // spreadsheets store 2023 as 2023.0
        Data::Float(f) if f.fract() == 0.0 && f.abs() < 1e15 => Some(format!("{}", *f as i64)),
        Data::Float(f) => Some(f.to_string()),
        Data::Bool(b) => Some(b.to_string()),
        other => non_blank(&other.to_string()),
    }
}

/// Sheet column index for each of [`RECORD_COLUMNS`]
struct ColumnMap([Option<usize>; 17]);

impl ColumnMap {
    /// Required columns absent from the header are not an error here; every
    /// data row then fails on the missing value.
    fn from_header(header: &Row) -> Self {
        let normalized: Vec<Option<String>> = header
            .iter()
            .map(|h| h.as_ref().map(|h| h.trim().to_lowercase().replace(' ', "_")))
            .collect();

        ColumnMap(std::array::from_fn(|field| {
            normalized
                .iter()
                .position(|h| h.as_deref() == Some(RECORD_COLUMNS[field]))
        }))
    }

    fn has(&self, field: usize) -> bool {
        self.0[field].is_some()
    }

    fn record(&self, row: &Row) -> Result<AcademicRecord, String> {
        let values: [Option<String>; 17] =
            std::array::from_fn(|field| self.0[field].and_then(|i| row.get(i).cloned().flatten()));
        let [snh, semester_offered, current_major, course_id, course_name, grade, grade_remark, course_type, course_attribute, hours, credit, offering_unit, tags, description, exam_type, assessment_method, year] =
            values;

        let snh = match snh {
            Some(snh) => snh,
            None if !self.has(SNH) => return Err(format!("missing {} column", HEADER_LABELS[SNH])),
            None => return Err(format!("missing {}", HEADER_LABELS[SNH])),
        };
        if course_id.is_none() && course_name.is_none() {
            let suffix = if self.has(COURSE_ID) || self.has(COURSE_NAME) {
                ""
            } else {
                " columns"
            };
            return Err(format!(
                "missing {} and {}{suffix}",
                HEADER_LABELS[COURSE_ID], HEADER_LABELS[COURSE_NAME]
            ));
        }
        let year = year.as_deref().map(parse_year).transpose()?;

        Ok(AcademicRecord {
            snh,
            semester_offered,
            current_major,
            course_id,
            course_name,
            grade,
            grade_remark,
            course_type,
            course_attribute,
            hours,
            credit,
            offering_unit,
            tags,
            description,
            exam_type,
            assessment_method,
            year,
        })
    }
}

fn parse_year(value: &str) -> Result<i32, String> {
    if let Ok(year) = value.parse::<i32>() {
        return Ok(year);
    }
    match value.parse::<f64>() {
        Ok(f) if f.fract() == 0.0 && f >= i32::MIN as f64 && f <= i32::MAX as f64 => Ok(f as i32),
        _ => Err(format!("invalid year '{value}'")),
    }
}

fn build_sheet(rows: Vec<(usize, Row)>) -> Result<ParsedSheet, ParseError> {
    let mut rows = rows
        .into_iter()
        .filter(|(_, row)| row.iter().any(Option::is_some));

    let (_, header) = rows.next().ok_or(ParseError::MissingHeader)?;
    let columns = ColumnMap::from_header(&header);

    let mut sheet = ParsedSheet::default();
    for (line, row) in rows {
        sheet.total_rows += 1;
        match columns.record(&row) {
            Ok(record) => sheet.records.push(record),
            Err(message) => sheet.row_errors.push(RowError { row: line, message }),
        }
    }
    Ok(sheet)
}
