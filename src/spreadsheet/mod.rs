//! Workbook readers for `.xlsx`, `.xlsb`, `.xls` and `.ods` files held in memory.
//!
//! The format is detected from the content, never from a file name. Every reader
//! produces [`sheet::Sheet`]s of typed cells which [`read_rows`] turns into the
//! rows view: a dense grid of display texts, one `Vec<Option<String>>` per row.

pub(crate) mod cell;
pub(crate) mod criteria;
pub(crate) mod excel;
pub(crate) mod ods;
pub(crate) mod reference;
pub(crate) mod sheet;
pub(crate) mod xls;
pub(crate) mod xlsb;
pub(crate) mod xlsx;

use crate::error::CandidateSheetError;
use crate::error::ResultMessage;
use crate::helpers::cfb;
use crate::helpers::cfb::Cfb;
use crate::helpers::zip::ZipHelper;
use crate::spreadsheet::criteria::Criteria;
use crate::spreadsheet::ods::OdsSpreadsheet;
use crate::spreadsheet::sheet::Sheet;
use crate::spreadsheet::xls::XlsSpreadsheet;
use crate::spreadsheet::xlsb::XlsbSpreadsheet;
use crate::spreadsheet::xlsx::XlsxSpreadsheet;
use std::collections::HashMap;
use std::collections::HashSet;
use std::io::Cursor;
use thiserror::Error;
use tracing::debug;
use zip::ZipArchive;

const ZIP_SIGNATURE: &[u8] = b"PK\x03\x04";

/// One row of cell display texts; `None` marks an empty cell.
pub type Row = Vec<Option<String>>;

pub(crate) type WorkbookArchive = ZipArchive<Cursor<Vec<u8>>>;

#[derive(Error, Debug)]
pub enum SpreadsheetError {
    #[error("Unsupported spreadsheet format")]
    UnsupportedFormatError,

    #[error("Spreadsheet is password protected")]
    PasswordProtectedError,

    #[error("Spreadsheet contains no worksheets")]
    NoWorksheetError,

    #[error("Spreadsheet part '{0}' is missing")]
    FileError(String),

    #[error("Invalid cell value '{0}'")]
    CellValueError(String),

    #[error("Shared string '{1}' referenced at {0} does not exist")]
    SharedStringError(String, String),
}

/// Container formats recognised by [`open`].
#[derive(Copy, Clone, Debug, PartialEq, Eq)]
pub enum WorkbookKind {
    Xlsx,
    Xlsb,
    Xls,
    Ods,
}

impl WorkbookKind {
    pub const fn as_str(&self) -> &'static str {
        match self {
            WorkbookKind::Xlsx => "xlsx",
            WorkbookKind::Xlsb => "xlsb",
            WorkbookKind::Xls => "xls",
            WorkbookKind::Ods => "ods",
        }
    }
}

pub(crate) trait Spreadsheet {
    fn kind(&self) -> WorkbookKind;

    /// Loads shared strings. With `Some(indexes)` only those entries are loaded and the
    /// returned map translates each table index to its position in the returned vector.
    fn load_shared_strings(&mut self, indexes: Option<HashSet<usize>>) -> Result<(Vec<String>, HashMap<usize, usize>), CandidateSheetError>;

    /// Reads sheets in workbook order.
    fn read_sheets(&mut self, criteria: &Criteria) -> Result<Vec<Sheet>, CandidateSheetError>;
}

/// Detects the workbook format of `bytes` and opens the matching reader.
pub(crate) fn open(bytes: Vec<u8>) -> Result<Box<dyn Spreadsheet>, CandidateSheetError> {
    if bytes.starts_with(&cfb::SIGNATURE) {
        let cfb = Cfb::new(bytes)?;
        // OOXML packages encrypted with a password are wrapped in a compound file.
        if cfb.exists("EncryptedPackage") {
            Err(SpreadsheetError::PasswordProtectedError)?
        }
        return Ok(Box::new(XlsSpreadsheet::open(&cfb)?));
    }

    if bytes.starts_with(ZIP_SIGNATURE) {
        let zip = ZipArchive::new(Cursor::new(bytes))?;
        return if zip.contains("xl/workbook.bin") {
            Ok(Box::new(XlsbSpreadsheet::open(zip)?))
        } else if zip.contains("xl/workbook.xml") {
            Ok(Box::new(XlsxSpreadsheet::open(zip)?))
        } else if zip.contains("content.xml") {
            Ok(Box::new(OdsSpreadsheet::open(zip)?))
        } else {
            Err(SpreadsheetError::UnsupportedFormatError)?
        };
    }

    Err(SpreadsheetError::UnsupportedFormatError)?
}

/// Converts the first worksheet of a workbook into its rows view.
///
/// With `rows_limit`, reading stops at the first cell past that many rows
/// (counted from the first used row).
pub fn read_rows(bytes: Vec<u8>, rows_limit: Option<usize>) -> Result<Vec<Row>, CandidateSheetError> {
    let mut spreadsheet = open(bytes)?;
    debug!(format = spreadsheet.kind().as_str(), "workbook format detected");

    let criteria = Criteria { sheet_limit: Some(1), rows_limit };
    let mut sheet = spreadsheet
        .read_sheets(&criteria)
        .with_prefix("Failed to read worksheet")?
        .into_iter()
        .next()
        .ok_or(SpreadsheetError::NoWorksheetError)?;

    let indexes = sheet.shared_string_indexes();
    if !indexes.is_empty() {
        let (shared_strings, mappings) = spreadsheet
            .load_shared_strings(Some(indexes))
            .with_prefix("Failed to load shared strings")?;
        sheet.resolve_shared_strings(&shared_strings, &mappings)?;
    }

    let rows = sheet.rows();
    debug!(sheet = %sheet.name, rows = rows.len(), "worksheet converted to rows");
    Ok(rows)
}

#[cfg(test)]
pub(crate) mod tests {
    use super::*;
    use std::io::Write;
    use zip::write::SimpleFileOptions;
    use zip::ZipWriter;

    /// Packs `(path, content)` entries into an in-memory zip archive.
    pub(crate) fn zip_bytes(entries: &[(&str, &[u8])]) -> Vec<u8> {
        let mut writer = ZipWriter::new(Cursor::new(Vec::new()));
        for (path, content) in entries {
            writer.start_file(*path, SimpleFileOptions::default()).unwrap();
            writer.write_all(content).unwrap();
        }
        writer.finish().unwrap().into_inner()
    }

    fn text(value: &str) -> Option<String> {
        Some(value.to_owned())
    }

    #[test]
    fn rejects_unknown_bytes() {
        let error = read_rows(b"name,surname\nAda,Lovelace".to_vec(), None).unwrap_err();
        assert!(matches!(error, CandidateSheetError::SpreadsheetError(SpreadsheetError::UnsupportedFormatError)));
        assert!(read_rows(Vec::new(), None).is_err());
    }

    #[test]
    fn rejects_truncated_zip() {
        let bytes = zip_bytes(&[("xl/workbook.xml", b"<workbook/>")]);
        let error = read_rows(bytes[..bytes.len() / 2].to_vec(), None).unwrap_err();
        assert!(matches!(error, CandidateSheetError::ZipError(_)));
    }

    #[test]
    fn rejects_zip_without_workbook() {
        let bytes = zip_bytes(&[("readme.txt", b"hello")]);
        let error = read_rows(bytes, None).unwrap_err();
        assert_eq!(error.to_string(), "Unsupported spreadsheet format");
    }

    #[test]
    fn rejects_password_protected_package() {
        let bytes = cfb::tests::compound_file(&[("EncryptedPackage", vec![1; 64])]);
        let error = read_rows(bytes, None).unwrap_err();
        assert!(matches!(error, CandidateSheetError::SpreadsheetError(SpreadsheetError::PasswordProtectedError)));
    }

    #[test]
    fn reads_first_sheet_with_shared_strings() {
        let bytes = xlsx::tests::workbook(&[
            r#"<row r="1"><c r="A1" t="s"><v>0</v></c><c r="B1" t="s"><v>1</v></c></row>"#,
            r#"<row r="2"><c r="A2" t="s"><v>2</v></c><c r="B2"><v>3</v></c></row>"#,
        ], Some(&["Seniority", "Years of experience", "Senior"][..]));
        let rows = read_rows(bytes, Some(2)).unwrap();
        assert_eq!(rows, vec![
            vec![text("Seniority"), text("Years of experience")],
            vec![text("Senior"), text("3")],
        ]);
    }

    #[test]
    fn kind_names() {
        assert_eq!(WorkbookKind::Xlsx.as_str(), "xlsx");
        assert_eq!(WorkbookKind::Ods.as_str(), "ods");
    }
}
