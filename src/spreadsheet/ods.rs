use crate::error::CandidateSheetError;
use crate::helpers::xml::XmlNodeHelper;
use crate::helpers::xml::XmlTextContextHelper;
use crate::helpers::zip::ZipHelper;
use crate::match_xml_events;
use crate::spreadsheet::cell::Cell;
use crate::spreadsheet::cell::CellType;
use crate::spreadsheet::criteria::Criteria;
use crate::spreadsheet::sheet::Sheet;
use crate::spreadsheet::sheet::MAX_COLS;
use crate::spreadsheet::sheet::MAX_ROWS;
use crate::spreadsheet::Spreadsheet;
use crate::spreadsheet::SpreadsheetError;
use crate::spreadsheet::WorkbookArchive;
use crate::spreadsheet::WorkbookKind;
use quick_xml::events::Event;
use quick_xml::name::QName;
use std::collections::HashMap;
use std::collections::HashSet;
use std::io::Read;
use thiserror::Error;

const MIME_TYPE: &[u8] = b"application/vnd.oasis.opendocument.spreadsheet";
const CONTENT: &str = "content.xml";
const MANIFEST: &str = "META-INF/manifest.xml";
/// Longest text a cell can hold.
const MAX_CELL_TEXT: usize = 32_767;

const SPREADSHEET: QName = QName(b"office:spreadsheet");
const TABLE: QName = QName(b"table:table");
const TABLE_ROW: QName = QName(b"table:table-row");
const TABLE_CELL: QName = QName(b"table:table-cell");
const TABLE_COVERED_CELL: QName = QName(b"table:covered-table-cell");
const ANNOTATION: QName = QName(b"office:annotation");
const PARAGRAPH: QName = QName(b"text:p");
const SPACE: QName = QName(b"text:s");
const FILE_ENTRY: QName = QName(b"manifest:file-entry");
const ENCRYPTION_DATA: QName = QName(b"manifest:encryption-data");

#[derive(Error, Debug)]
pub enum OdsError {
    #[error("Invalid ODS MIME type")]
    MimeTypeError,
}

/// OpenDocument spreadsheet (`.ods`). Strings are stored inline, there is no shared string table.
pub(crate) struct OdsSpreadsheet {
    zip: WorkbookArchive,
}

impl OdsSpreadsheet {
    pub(crate) fn open(mut zip: WorkbookArchive) -> Result<Self, CandidateSheetError> {
        check_mime(&mut zip)?;
        if is_password_protected(&mut zip)? {
            Err(SpreadsheetError::PasswordProtectedError)?;
        }
        Ok(OdsSpreadsheet { zip })
    }
}

impl Spreadsheet for OdsSpreadsheet {
    fn kind(&self) -> WorkbookKind {
        WorkbookKind::Ods
    }

    fn load_shared_strings(&mut self, _indexes: Option<HashSet<usize>>) -> Result<(Vec<String>, HashMap<usize, usize>), CandidateSheetError> {
        Ok((Vec::new(), HashMap::new()))
    }

    /// Walks `content.xml` table by table.
    ///
    /// Rows and cells may carry a repeat count; a repeated cell with content is
    /// expanded into every position it covers, up to the row limit and the grid size.
    fn read_sheets(&mut self, criteria: &Criteria) -> Result<Vec<Sheet>, CandidateSheetError> {
        let mut sheets = Vec::<Sheet>::new();
        let mut reader = self.zip
            .xml_reader(CONTENT)?
            .ok_or_else(|| SpreadsheetError::FileError(CONTENT.to_owned()))?;
        loop {
            if criteria.is_sheet_limit_reached(sheets.len()) {
                break;
            }

            let mut sheet_name: Option<String> = None;
            match_xml_events!(reader => {
                Event::End(event) if event.name() == SPREADSHEET => break,
                Event::Start(event) if event.name() == TABLE => {
                    let table_name = event.get_attribute_value("table:name")?.unwrap_or_default();
                    sheet_name = Some(table_name.into_owned());
                    break;
                }
            });
            let Some(sheet_name) = sheet_name else {
                break;
            };
            let mut sheet = Sheet::new(&sheet_name, criteria.rows_limit);

            let mut row = 0usize;
            let mut col = 0usize;
            let mut row_count = 1usize;
            let mut col_count = 1usize;
            let mut kind = CellType::default();
            let mut value = String::new();
            // Text content is collected only for string cells, and never from comments.
            let mut element_context = false;
            let mut comment_context = false;
            match_xml_events!(reader => {
                Event::End(event) if event.name() == TABLE => break,
                Event::Start(event) if event.name() == TABLE_ROW => {
                    if sheet.reaches_limit(row) {
                        break;
                    }
                    row_count = event.parse_attribute_value::<usize>("table:number-rows-repeated")?.unwrap_or(1).min(MAX_ROWS);
                    col = 0;
                }
                Event::End(event) if event.name() == TABLE_ROW => {
                    row = (row + row_count).min(MAX_ROWS);
                }
                Event::Start(event) if event.name() == TABLE_CELL || event.name() == TABLE_COVERED_CELL => {
                    value.clear();
                    col_count = event.parse_attribute_value::<usize>("table:number-columns-repeated")?.unwrap_or(1).min(MAX_COLS);
                    kind = CellType::Empty;
                    if let Some(value_type) = event.get_attribute_value("office:value-type")? {
                        match value_type.as_ref() {
                            "string" => {
                                let is_error = event.get_attribute_value("calcext:value-type")?
                                    .map(|calc_type| calc_type == "error")
                                    .unwrap_or(false);
                                kind = if is_error { CellType::Error } else { CellType::InlineString };
                                element_context = true;
                            }
                            "boolean" => {
                                kind = CellType::Boolean;
                                let is_true = event.get_attribute_value("office:boolean-value")?
                                    .map(|boolean| boolean != "false" && boolean != "0")
                                    .unwrap_or(false);
                                value.push(if is_true { '1' } else { '0' });
                            }
                            "date" => {
                                kind = CellType::IsoDateTime;
                                if let Some(date) = event.get_attribute_value("office:date-value")? {
                                    value.push_str(&date);
                                }
                            }
                            "time" => {
                                kind = CellType::IsoDuration;
                                if let Some(time) = event.get_attribute_value("office:time-value")? {
                                    value.push_str(&time);
                                }
                            }
                            _ => {
                                kind = CellType::Number;
                                if let Some(number) = event.get_attribute_value("office:value")? {
                                    value.push_str(&number);
                                }
                            }
                        }
                    }
                }
                Event::End(event) if event.name() == TABLE_CELL || event.name() == TABLE_COVERED_CELL => {
                    if kind != CellType::Empty && !value.is_empty() {
                        for row_number in row..(row + row_count).min(MAX_ROWS) {
                            if sheet.reaches_limit(row_number) {
                                break;
                            }
                            for col_number in col..(col + col_count).min(MAX_COLS) {
                                sheet.push(Cell {
                                    row: row_number,
                                    col: col_number,
                                    kind,
                                    value: value.to_owned(),
                                });
                            }
                        }
                    }
                    col = (col + col_count).min(MAX_COLS);
                    element_context = false;
                    comment_context = false;
                }
                Event::Start(event) if element_context && event.name() == ANNOTATION => comment_context = true,
                Event::End(event) if element_context && comment_context && event.name() == ANNOTATION => comment_context = false,
                Event::Start(event) if element_context && !comment_context && event.name() == PARAGRAPH => {
                    if !value.is_empty() {
                        value.push('\n');
                    }
                }
                Event::Start(event) if element_context && !comment_context && event.name() == SPACE => {
                    let count = event.parse_attribute_value::<usize>("text:c")?
                        .unwrap_or(1)
                        .min(MAX_CELL_TEXT.saturating_sub(value.len()));
                    value.push_str(&" ".repeat(count));
                }
                Event::Text(event) if element_context && !comment_context => value.push_bytes_text(&event)?,
                Event::GeneralRef(event) if element_context && !comment_context => value.push_bytes_ref(&event)?,
            });
            sheets.push(sheet);
        }

        Ok(sheets)
    }
}

/// Rejects a package whose `mimetype` entry names another OpenDocument type.
fn check_mime(zip: &mut WorkbookArchive) -> Result<(), CandidateSheetError> {
    if let Some(file) = &mut zip.file("mimetype")? {
        let mut buffer = Vec::new();
        file.read_to_end(&mut buffer)?;
        if buffer.trim_ascii() != MIME_TYPE {
            Err(OdsError::MimeTypeError)?;
        }
    }
    Ok(())
}

/// An encrypted document lists `encryption-data` under its manifest file entries.
fn is_password_protected(zip: &mut WorkbookArchive) -> Result<bool, CandidateSheetError> {
    let mut reader = match zip.xml_reader(MANIFEST)? {
        Some(reader) => reader,
        None => return Ok(false),
    };
    let mut in_file_entry = false;
    match_xml_events!(reader => {
        Event::Start(event) if event.name() == FILE_ENTRY => in_file_entry = true,
        Event::End(event) if event.name() == FILE_ENTRY => in_file_entry = false,
        Event::Start(event) if in_file_entry && event.name() == ENCRYPTION_DATA => {
            return Ok(true);
        }
    });
    Ok(false)
}
