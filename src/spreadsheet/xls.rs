use crate::error::CandidateSheetError;
use crate::error::ResultOptionChain;
use crate::helpers::biff8::Biff8Reader;
use crate::helpers::cfb::Cfb;
use crate::match_biff8_record;
use crate::spreadsheet::cell::to_error_value;
use crate::spreadsheet::cell::Cell;
use crate::spreadsheet::cell::CellType;
use crate::spreadsheet::criteria::Criteria;
use crate::spreadsheet::excel;
use crate::spreadsheet::sheet::Sheet;
use crate::spreadsheet::Spreadsheet;
use crate::spreadsheet::SpreadsheetError;
use crate::spreadsheet::WorkbookKind;
use either::Either;
use std::collections::HashMap;
use std::collections::HashSet;
use thiserror::Error;

// BIFF8 record types
const FORMULA: u16 = 6;
const EOF: u16 = 10;
const DATE1904: u16 = 34;
const FILE_PASS: u16 = 47;
const CODE_PAGE: u16 = 66;
const BOUND_SHEET8: u16 = 133;
const MUL_RK: u16 = 189;
const XF: u16 = 224;
const SST: u16 = 252;
const LABEL_SST: u16 = 253;
const NUMBER: u16 = 515;
const LABEL: u16 = 516;
const BOOL_ERR: u16 = 517;
const STRING: u16 = 519;
const RK: u16 = 638;
const FORMAT: u16 = 1054;
const BOF: u16 = 2057;

/// Code page identifier of UTF-16, the default of BIFF8 workbooks.
const UTF_16_CODE_PAGE: u16 = 1200;

#[derive(Error, Debug)]
pub enum XlsError {
    #[error("Invalid Code page '{0}'")]
    CodePageError(u16),

    #[error("Invalid Formula value '{0}'")]
    FormulaValueError(u64),
}

/// Excel 97-2003 workbook: a BIFF8 `Workbook` stream inside an OLE compound file.
pub(crate) struct XlsSpreadsheet {
    reader: Biff8Reader,
    shared_strings: Vec<String>,
    number_formats: Vec<CellType>,
    /// Sheet names with the stream offset of their `BOF` record
    sheets: Vec<(String, usize)>,
}

impl XlsSpreadsheet {
    /// Reads the workbook globals: encryption, date system, formats, shared strings and sheet list.
    pub(crate) fn open(cfb: &Cfb) -> Result<XlsSpreadsheet, CandidateSheetError> {
        let mut reader = cfb.read("Workbook")
            .ok_none_else(|| cfb.read("Book"))?
            .map(Biff8Reader::new)
            .ok_or(SpreadsheetError::NoWorksheetError)?;
        let mut is_1904 = false;
        let mut shared_strings = Vec::new();
        let mut custom_formats: HashMap<String, CellType> = HashMap::new();
        let mut format_indexes: Vec<String> = Vec::new();
        let mut sheets: Vec<(String, usize)> = Vec::new();
        match_biff8_record!(reader => {
            EOF => break,
            FILE_PASS => Err(SpreadsheetError::PasswordProtectedError)?,
            DATE1904 if reader.read_u16()? == 1 => is_1904 = true,
            CODE_PAGE => {
                let code_page = reader.read_u16()?;
                if code_page != UTF_16_CODE_PAGE {
                    let encoding = codepage::to_encoding(code_page).ok_or(XlsError::CodePageError(code_page))?;
                    reader.encoding = Some(encoding);
                }
            }
            FORMAT => {
                let id = reader.read_u16()?;
                let format = reader.read_xl_unicode_string()?;
                custom_formats.insert(
                    id.to_string(),
                    CellType::parse_custom_number_format(format.as_ref(), is_1904),
                );
            }
            XF => {
                reader.skip(2)?;
                let id = reader.read_u16()?;
                format_indexes.push(id.to_string());
            }
            SST => shared_strings = load_shared_strings(&mut reader)?,
            BOUND_SHEET8 => {
                let pointer = reader.read_usize()?;
                reader.skip(2)?;
                let sheet_name = reader.read_short_xl_unicode_string()?;
                sheets.push((sheet_name, pointer));
            }
        });
        if sheets.is_empty() {
            Err(SpreadsheetError::NoWorksheetError)?
        }

        let number_formats = excel::load_number_formats(format_indexes, custom_formats, is_1904);

        Ok(XlsSpreadsheet {
            reader,
            shared_strings,
            number_formats,
            sheets,
        })
    }

    fn push_cell(&self, sheet: &mut Sheet, row: usize, col: usize, either: Either<CellType, usize>, value: String) {
        let kind = match either {
            Either::Left(kind) => kind,
            Either::Right(index) => excel::number_format(&self.number_formats, index),
        };
        if !value.is_empty() {
            sheet.push(Cell {
                row,
                col,
                kind,
                value,
            });
        }
    }
}

impl Spreadsheet for XlsSpreadsheet {
    fn kind(&self) -> WorkbookKind {
        WorkbookKind::Xls
    }

    /// The whole `SST` record was decoded while opening, so every index maps to itself.
    fn load_shared_strings(&mut self, indexes: Option<HashSet<usize>>) -> Result<(Vec<String>, HashMap<usize, usize>), CandidateSheetError> {
        let shared_strings = self.shared_strings.to_owned();
        let mappings = match indexes {
            Some(keys) => keys.into_iter().map(|key| (key, key)).collect(),
            None => (0..shared_strings.len()).map(|key| (key, key)).collect(),
        };
        Ok((shared_strings, mappings))
    }

    fn read_sheets(&mut self, criteria: &Criteria) -> Result<Vec<Sheet>, CandidateSheetError> {
        let mut sheets = Vec::<Sheet>::new();
        let sheet_entries = self.sheets.to_owned();
        for (sheet_name, pointer) in &sheet_entries {
            if criteria.is_sheet_limit_reached(sheets.len()) {
                break;
            }

            self.reader.goto(*pointer);
            self.reader.next()?;
            let mut sheet = Sheet::new(sheet_name, criteria.rows_limit);
            while let Some(tag) = self.reader.next()? {
                match tag {
                    BOF | EOF => break,
                    MUL_RK => {
                        let row = self.reader.read_u16()? as usize;
                        if sheet.reaches_limit(row) {
                            break;
                        }
                        let col_lower_bound = self.reader.read_u16()? as usize;
                        let col_upper_bound = self.reader.get_u16_back(2)? as usize;
                        for col in col_lower_bound..=col_upper_bound {
                            let index = self.reader.read_u16()? as usize;
                            let value = self.reader.read_rk_number()?;
                            self.push_cell(&mut sheet, row, col, Either::Right(index), value);
                        }
                    }
                    BOOL_ERR | NUMBER | RK | LABEL_SST | LABEL | FORMULA => {
                        let row = self.reader.read_u16()? as usize;
                        let col = self.reader.read_u16()? as usize;
                        if sheet.reaches_limit(row) {
                            break;
                        }
                        let (either, value) = match tag {
                            BOOL_ERR => read_bool_or_error_cell(&mut self.reader)?,
                            NUMBER => read_number_cell(&mut self.reader)?,
                            RK => read_rk_cell(&mut self.reader)?,
                            LABEL_SST => read_label_sst_cell(&mut self.reader)?,
                            LABEL => read_label_cell(&mut self.reader)?,
                            _ => read_formula_cell(&mut self.reader)?,
                        };
                        self.push_cell(&mut sheet, row, col, either, value);
                    }
                    _ => (),
                }
            }
            sheets.push(sheet);
        }

        Ok(sheets)
    }
}

fn load_shared_strings(reader: &mut Biff8Reader) -> Result<Vec<String>, CandidateSheetError> {
    let mut shared_strings: Vec<String> = Vec::new();
    // cstTotal
    reader.skip(4)?;
    let count = reader.read_usize()?;
    for _ in 0..count {
        let string = reader.read_xl_unicode_rich_extended_string()?;
        shared_strings.push(string);
    }
    Ok(shared_strings)
}

// Cell records start with row and column; the readers below continue from the style index.

type CellValue = (Either<CellType, usize>, String);

fn read_bool_or_error_cell(reader: &mut Biff8Reader) -> Result<CellValue, CandidateSheetError> {
    reader.skip(2)?;
    let value = reader.read_u8()?;
    let is_error = reader.read_u8()? != 0;
    if is_error {
        Ok((Either::Left(CellType::Error), to_error_value(value).to_owned()))
    } else {
        Ok((Either::Left(CellType::Boolean), value.to_string()))
    }
}

fn read_number_cell(reader: &mut Biff8Reader) -> Result<CellValue, CandidateSheetError> {
    let index = reader.read_u16()? as usize;
    let value = reader.read_f64()?;
    Ok((Either::Right(index), value.to_string()))
}

fn read_rk_cell(reader: &mut Biff8Reader) -> Result<CellValue, CandidateSheetError> {
    let index = reader.read_u16()? as usize;
    let value = reader.read_rk_number()?;
    Ok((Either::Right(index), value))
}

fn read_label_sst_cell(reader: &mut Biff8Reader) -> Result<CellValue, CandidateSheetError> {
    reader.skip(2)?;
    let value = reader.read_usize()?;
    Ok((Either::Left(CellType::SharedString), value.to_string()))
}

fn read_label_cell(reader: &mut Biff8Reader) -> Result<CellValue, CandidateSheetError> {
    reader.skip(2)?;
    let value = reader.read_xl_unicode_string()?;
    Ok((Either::Left(CellType::InlineString), value))
}

/// Decodes the cached result of a formula.
///
/// A result whose top two bytes are not `0xFFFF` is a plain double. Otherwise the low
/// byte tells the kind: 0 a string held by the following `STRING` record, 1 a boolean,
/// 2 an error code, 3 an empty string.
fn read_formula_cell(reader: &mut Biff8Reader) -> Result<CellValue, CandidateSheetError> {
    let index = reader.read_u16()? as usize;
    let formula = reader.read_u64()?;
    let is_number = (formula & 0xFFFF000000000000) != 0xFFFF000000000000;
    let flag = formula & 0xFF;
    if is_number {
        Ok((Either::Right(index), f64::from_bits(formula).to_string()))
    } else if flag == 0 {
        match reader.next()? {
            Some(STRING) => {
                let value = reader.read_xl_unicode_string()?;
                Ok((Either::Left(CellType::InlineString), value))
            }
            _ => Err(XlsError::FormulaValueError(formula))?,
        }
    } else if flag == 1 {
        let value = if (formula & 0xFF0000) > 0 { "1" } else { "0" };
        Ok((Either::Left(CellType::Boolean), value.to_owned()))
    } else if flag == 2 {
        let code = ((formula >> 16) & 0xFF) as u8;
        Ok((Either::Left(CellType::Error), to_error_value(code).to_owned()))
    } else if flag == 3 {
        Ok((Either::Left(CellType::InlineString), "".to_owned()))
    } else {
        Err(XlsError::FormulaValueError(formula))?
    }
}
