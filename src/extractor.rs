//! Turns a candidate spreadsheet into a [`CandidateRecord`].
//!
//! The first worksheet is read as rows. Row 0 names the columns and row 1 holds
//! the candidate's data; every other row is ignored. Three columns are
//! recognised by their exact (trimmed) header text.

use crate::candidate::CandidateRecord;
use crate::error::CandidateSheetError;
use crate::spreadsheet::read_rows;
use crate::spreadsheet::Row;
use thiserror::Error;
use tracing::debug;

pub const SENIORITY_HEADER: &str = "Seniority";
pub const YEARS_HEADER: &str = "Years of experience";
pub const AVAILABILITY_HEADER: &str = "Availability";

/// Lower-cased cell texts that mean the candidate is available.
const AVAILABLE_TOKENS: [&str; 3] = ["true", "sí", "si"];

/// Text an absent availability cell is compared as.
const ABSENT_CELL: &str = "undefined";

/// Header row plus the first data row.
const ROWS_NEEDED: usize = 2;

#[derive(Error, Debug)]
pub enum ExtractionError {
    #[error("Error processing Excel file: {0}")]
    Parse(#[source] CandidateSheetError),

    #[error("Error processing Excel file: Excel file must contain at least one row of data.")]
    EmptyData,

    #[error("Error processing Excel file: Missing required data in Excel: Seniority, Years of experience, or Availability.")]
    MissingField,
}

/// The fields read from the data row, each unset until its column is seen.
#[derive(Clone, Debug, Default, PartialEq, Eq)]
pub struct ExtractedFields {
    pub seniority: Option<String>,
    pub years: Option<i64>,
    pub availability: Option<bool>,
}

impl ExtractedFields {
    /// Reads the recognised columns of `data` by the position of their header.
    /// A header seen twice takes the value of its later column.
    pub fn from_rows(header: &[Option<String>], data: &[Option<String>]) -> Self {
        let mut fields = ExtractedFields::default();
        for (index, title) in header.iter().enumerate() {
            let Some(title) = title else {
                continue;
            };
            let cell = data.get(index).and_then(|cell| cell.as_deref());
            match title.trim() {
                SENIORITY_HEADER => fields.seniority = cell.map(str::to_owned),
                YEARS_HEADER => fields.years = cell.and_then(parse_int),
                AVAILABILITY_HEADER => fields.availability = Some(is_available(cell.unwrap_or(ABSENT_CELL))),
                _ => (),
            }
        }
        fields
    }

    /// Collapses the fields into a record once every one of them is set.
    pub fn into_record(self, name: &str, surname: &str) -> Result<CandidateRecord, ExtractionError> {
        match (self.seniority, self.years, self.availability) {
            (Some(seniority), Some(years), Some(availability)) if !seniority.is_empty() => Ok(CandidateRecord {
                name: name.to_owned(),
                surname: surname.to_owned(),
                seniority,
                years,
                availability,
            }),
            _ => Err(ExtractionError::MissingField),
        }
    }
}

/// Source of candidate records, the seam between the upload boundary and the spreadsheet reader.
pub trait Extractor {
    fn extract(&self, name: &str, surname: &str, sheet_bytes: Vec<u8>) -> Result<CandidateRecord, ExtractionError>;
}

/// Reads candidates from `.xlsx`, `.xlsb`, `.xls` and `.ods` workbooks.
#[derive(Clone, Copy, Debug, Default)]
pub struct SheetExtractor;

impl Extractor for SheetExtractor {
    fn extract(&self, name: &str, surname: &str, sheet_bytes: Vec<u8>) -> Result<CandidateRecord, ExtractionError> {
        extract(name, surname, sheet_bytes)
    }
}

/// Parses `sheet_bytes` and builds the candidate record from its first worksheet.
pub fn extract(name: &str, surname: &str, sheet_bytes: Vec<u8>) -> Result<CandidateRecord, ExtractionError> {
    let rows = read_rows(sheet_bytes, Some(ROWS_NEEDED))
        .inspect_err(|error| debug!(%error, "spreadsheet could not be read"))
        .map_err(ExtractionError::Parse)?;
    extract_rows(name, surname, &rows)
}

/// Builds the candidate record from an already read rows view.
pub fn extract_rows(name: &str, surname: &str, rows: &[Row]) -> Result<CandidateRecord, ExtractionError> {
    let [header, data, ..] = rows else {
        debug!(rows = rows.len(), "spreadsheet has no data row");
        return Err(ExtractionError::EmptyData);
    };

    let fields = ExtractedFields::from_rows(header, data);
    fields.clone()
        .into_record(name, surname)
        .inspect_err(|_| debug!(?fields, "spreadsheet is missing a required field"))
}

/// Case-insensitive match against the availability tokens.
pub fn is_available(value: &str) -> bool {
    let value = value.to_lowercase();
    AVAILABLE_TOKENS.contains(&value.as_str())
}

/// Reads a base-10 integer prefix: leading whitespace, an optional sign, then the
/// longest run of ASCII digits. Anything after the digits is ignored.
/// Returns `None` without digits or when the value does not fit an `i64`.
pub fn parse_int(value: &str) -> Option<i64> {
    let value = value.trim_start();
    let (negative, rest) = match value.as_bytes().first() {
        Some(b'-') => (true, &value[1..]),
        Some(b'+') => (false, &value[1..]),
        _ => (false, value),
    };
    let end = rest.find(|c: char| !c.is_ascii_digit()).unwrap_or(rest.len());
    let digits = &rest[..end];
    if digits.is_empty() {
        return None;
    }
    let number = digits.parse::<i64>().ok()?;
    Some(if negative { -number } else { number })
}
