use crate::error::CandidateSheetError;
use crate::helpers::biff12::Biff12Reader;
use crate::helpers::biff8::rk_to_string;
use crate::helpers::zip::ZipHelper;
use crate::match_biff12_record;
use crate::spreadsheet::cell::to_error_value;
use crate::spreadsheet::cell::Cell;
use crate::spreadsheet::cell::CellType;
use crate::spreadsheet::criteria::Criteria;
use crate::spreadsheet::excel;
use crate::spreadsheet::excel::load_relationships;
use crate::spreadsheet::sheet::Sheet;
use crate::spreadsheet::Spreadsheet;
use crate::spreadsheet::SpreadsheetError;
use crate::spreadsheet::WorkbookArchive;
use crate::spreadsheet::WorkbookKind;
use either::Either;
use std::collections::HashMap;
use std::collections::HashSet;
use std::io::BufRead;

// BIFF12 record types

/// Row header record
const BRT_ROW_HDR: u16 = 0;
/// Cell containing RK number (compressed floating point)
const BRT_CELL_RK: u16 = 2;
/// Cell containing error value
const BRT_CELL_ERROR: u16 = 3;
/// Cell containing boolean value
const BRT_CELL_BOOL: u16 = 4;
/// Cell containing real number (double precision)
const BRT_CELL_REAL: u16 = 5;
/// Cell containing inline string
const BRT_CELL_ST: u16 = 6;
/// Cell containing shared string reference
const BRT_CELL_ISST: u16 = 7;
/// Formula containing string result
const BRT_FMLA_STRING: u16 = 8;
/// Formula containing numeric result
const BRT_FMLA_NUM: u16 = 9;
/// Formula containing boolean result
const BRT_FMLA_BOOL: u16 = 10;
/// Formula containing error result
const BRT_FMLA_ERROR: u16 = 11;
/// Shared string table item
const BRT_SST_ITEM: u16 = 19;
/// Future record table begin marker
const BRT_FRT_BEGIN: u16 = 35;
/// Future record table end marker
const BRT_FRT_END: u16 = 36;
/// Number format definition
const BRT_FMT: u16 = 44;
/// Cell formatting (extended format)
const BRT_XF: u16 = 47;
/// Cell containing rich text string
const BRT_CELL_R_STRING: u16 = 62;
/// End of worksheet bundle
const BRT_END_BUNDLE_SHS: u16 = 144;
/// Begin sheet data section
const BRT_BEGIN_SHEET_DATA: u16 = 145;
/// End sheet data section
const BRT_END_SHEET_DATA: u16 = 146;
/// Workbook properties
const BRT_WB_PROP: u16 = 153;
/// Worksheet bundle
const BRT_BUNDLE_SH: u16 = 156;
/// Begin shared string table
const BRT_BEGIN_SST: u16 = 159;
/// Begin number formats section
const BRT_BEGIN_FMTS: u16 = 615;
/// Begin cell formatting section
const BRT_BEGIN_CELL_XFS: u16 = 617;

/// Excel binary workbook (`.xlsb`): the OOXML package layout with BIFF12 parts.
pub(crate) struct XlsbSpreadsheet {
    zip: WorkbookArchive,
    number_formats: Vec<CellType>,
    sheets: Vec<(String, String)>,
}

impl XlsbSpreadsheet {
    pub(crate) fn open(mut zip: WorkbookArchive) -> Result<XlsbSpreadsheet, CandidateSheetError> {
        let (number_formats, sheets) = excel::open(&mut zip, load_workbook, load_number_formats)?;
        Ok(XlsbSpreadsheet {
            zip,
            number_formats,
            sheets,
        })
    }
}

impl Spreadsheet for XlsbSpreadsheet {
    fn kind(&self) -> WorkbookKind {
        WorkbookKind::Xlsb
    }

    /// Loads shared strings from `xl/sharedStrings.bin`
    ///
    /// # Arguments
    /// * `indexes` - Optional set of specific string indexes to load
    ///
    /// # Returns
    /// * `Result<(Vec<String>, HashMap<usize, usize>)>` - Tuple containing:
    ///   - Vector of loaded strings
    ///   - Mapping from original indexes to new positions
    fn load_shared_strings(&mut self, mut indexes: Option<HashSet<usize>>) -> Result<(Vec<String>, HashMap<usize, usize>), CandidateSheetError> {
        let mut shared_strings = Vec::<String>::new();
        let mut mappings = HashMap::<usize, usize>::new();
        let mut reader = match self.zip.biff_reader("xl/sharedStrings.bin")? {
            Some(reader) => reader,
            None => return Ok((shared_strings, mappings)),
        };

        reader.find(BRT_BEGIN_SST)?;
        for id in 0..reader.get_usize(4)? {
            reader.find_with(BRT_SST_ITEM, &[(BRT_FRT_BEGIN, BRT_FRT_END)])?;
            if let Some(keys) = &mut indexes {
                if keys.remove(&id) {
                    mappings.insert(id, shared_strings.len());
                    shared_strings.push(reader.get_str(1)?.to_string());
                }
                if keys.is_empty() {
                    break;
                }
            } else {
                mappings.insert(id, shared_strings.len());
                shared_strings.push(reader.get_str(1)?.to_string());
            }
        }

        Ok((shared_strings, mappings))
    }

    /// Reads worksheet data, stopping at the end of sheet data or past the row limit
    ///
    /// # Arguments
    /// * `criteria` - Sheet and row limits
    ///
    /// # Returns
    /// * `Result<Vec<Sheet>>` - Sheets in workbook order
    fn read_sheets(&mut self, criteria: &Criteria) -> Result<Vec<Sheet>, CandidateSheetError> {
        let mut sheets = Vec::<Sheet>::new();
        for (sheet_name, zip_path) in &self.sheets {
            if criteria.is_sheet_limit_reached(sheets.len()) {
                break;
            }

            let mut sheet = Sheet::new(sheet_name, criteria.rows_limit);
            let mut row = 0usize;
            let mut reader = self.zip.biff_reader(zip_path)?
                .ok_or_else(|| SpreadsheetError::FileError(zip_path.to_owned()))?;
            reader.find(BRT_BEGIN_SHEET_DATA)?;
            while let Some(tag) = reader.next()? {
                match tag {
                    BRT_END_SHEET_DATA => break,
                    BRT_ROW_HDR => {
                        row = reader.get_usize(0)?;
                        if sheet.reaches_limit(row) {
                            break;
                        }
                    }
                    BRT_CELL_RK
                    | BRT_CELL_BOOL | BRT_FMLA_BOOL
                    | BRT_CELL_REAL | BRT_FMLA_NUM
                    | BRT_CELL_ST | BRT_FMLA_STRING
                    | BRT_CELL_R_STRING
                    | BRT_CELL_ISST
                    | BRT_CELL_ERROR | BRT_FMLA_ERROR => {
                        let col = reader.get_usize(0)?;
                        let (either, value) = match tag {
                            BRT_CELL_BOOL | BRT_FMLA_BOOL => read_bool_cell(&reader)?,
                            BRT_CELL_REAL | BRT_FMLA_NUM => read_real_cell(&reader)?,
                            BRT_CELL_ST | BRT_FMLA_STRING => read_st_cell(&reader)?,
                            BRT_CELL_R_STRING => read_rich_string_cell(&reader)?,
                            BRT_CELL_ISST => read_shared_string_cell(&reader)?,
                            BRT_CELL_ERROR | BRT_FMLA_ERROR => read_error_cell(&reader)?,
                            _ => read_rk_cell(&reader)?,
                        };
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
                    _ => (),
                }
            }
            sheets.push(sheet);
        }

        Ok(sheets)
    }
}

/// Reads the sheet list from `xl/workbook.bin` and the 1904 date system flag.
fn load_workbook(zip: &mut WorkbookArchive) -> Result<(Vec<(String, String)>, bool), CandidateSheetError> {
    let relationships = load_relationships(zip, "xl/_rels/workbook.bin.rels")?;
    let mut reader = zip.biff_reader("xl/workbook.bin")?
        .ok_or_else(|| SpreadsheetError::FileError("xl/workbook.bin".to_string()))?;
    let mut sheets: Vec<(String, String)> = Vec::new();
    let mut is_1904 = false;
    match_biff12_record!(reader => {
        BRT_END_BUNDLE_SHS => break,
        BRT_BUNDLE_SH => {
            let (id, index) = reader.get_str_and_bound(8)?;
            if let Some(zip_path) = relationships.get(id.as_ref()) {
                let sheet_name = reader.get_str(index)?;
                sheets.push((sheet_name.to_string(), zip_path.to_owned()));
            }
        }
        BRT_WB_PROP => {
            is_1904 = (reader.get_u8(0)? & 0x1) != 0;
        }
    });
    Ok((sheets, is_1904))
}

/// Resolves the cell formats of `xl/styles.bin` to cell types.
fn load_number_formats(zip: &mut WorkbookArchive, is_1904: bool) -> Result<Vec<CellType>, CandidateSheetError> {
    let mut reader = match zip.biff_reader("xl/styles.bin")? {
        Some(reader) => reader,
        None => return Ok(Vec::new()),
    };

    let mut custom_formats: HashMap<String, CellType> = HashMap::new();
    let mut format_indexes: Vec<String> = Vec::new();
    match_biff12_record!(reader => {
        BRT_BEGIN_FMTS => {
            for _ in 0..reader.get_usize(0)? {
                reader.find(BRT_FMT)?;
                let id = reader.get_u16(0)?;
                let format = reader.get_str(2)?;
                custom_formats.insert(
                    id.to_string(),
                    CellType::parse_custom_number_format(format.as_ref(), is_1904),
                );
            }
        }
        BRT_BEGIN_CELL_XFS => {
            for _ in 0..reader.get_usize(0)? {
                reader.find(BRT_XF)?;
                let id = reader.get_u16(2)?;
                format_indexes.push(id.to_string());
            }
            break;
        }
    });

    Ok(excel::load_number_formats(format_indexes, custom_formats, is_1904))
}

// Cell records share a common prefix: column (4 bytes), style index (3 bytes), flags (1 byte).
// The value follows at offset 8.

type CellValue = (Either<CellType, usize>, String);

fn read_bool_cell<R: BufRead>(reader: &Biff12Reader<R>) -> Result<CellValue, CandidateSheetError> {
    let value = if reader.get_u8(8)? != 0 { "1" } else { "0" };
    Ok((Either::Left(CellType::Boolean), value.to_owned()))
}

fn read_real_cell<R: BufRead>(reader: &Biff12Reader<R>) -> Result<CellValue, CandidateSheetError> {
    let index = reader.get_style(4)?;
    let value = reader.get_f64(8)?.to_string();
    Ok((Either::Right(index), value))
}

fn read_st_cell<R: BufRead>(reader: &Biff12Reader<R>) -> Result<CellValue, CandidateSheetError> {
    let value = reader.get_str(8)?.to_string();
    Ok((Either::Left(CellType::InlineString), value))
}

/// Rich strings carry a flag byte before the text.
fn read_rich_string_cell<R: BufRead>(reader: &Biff12Reader<R>) -> Result<CellValue, CandidateSheetError> {
    let value = reader.get_str(8 + 1)?.to_string();
    Ok((Either::Left(CellType::InlineString), value))
}

fn read_shared_string_cell<R: BufRead>(reader: &Biff12Reader<R>) -> Result<CellValue, CandidateSheetError> {
    let value = reader.get_usize(8)?.to_string();
    Ok((Either::Left(CellType::SharedString), value))
}

fn read_error_cell<R: BufRead>(reader: &Biff12Reader<R>) -> Result<CellValue, CandidateSheetError> {
    let value = to_error_value(reader.get_u8(8)?).to_owned();
    Ok((Either::Left(CellType::Error), value))
}

/// RK values use the same 30-bit encoding as BIFF8.
fn read_rk_cell<R: BufRead>(reader: &Biff12Reader<R>) -> Result<CellValue, CandidateSheetError> {
    let index = reader.get_style(4)?;
    let value = rk_to_string(reader.get_u32(8)?);
    Ok((Either::Right(index), value))
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::helpers::biff12::tests::record;
    use crate::helpers::biff12::tests::wide_string;
    use crate::spreadsheet::read_rows;
    use crate::spreadsheet::tests::zip_bytes;

    fn text(value: &str) -> Option<String> {
        Some(value.to_owned())
    }

    fn cell(col: u32, style: u8, value: &[u8]) -> Vec<u8> {
        let mut body = col.to_le_bytes().to_vec();
        body.extend([style, 0, 0, 0]);
        body.extend(value);
        body
    }

    fn package(sheet_data: Vec<u8>, shared_strings: Option<&[&str]>) -> Vec<u8> {
        let mut bundle = vec![0u8; 8];
        bundle.extend(wide_string("rId1"));
        bundle.extend(wide_string("Candidates"));
        let mut workbook = record(BRT_WB_PROP, &[0, 0, 0, 0]);
        workbook.extend(record(BRT_BUNDLE_SH, &bundle));
        workbook.extend(record(BRT_END_BUNDLE_SHS, &[]));

        let mut sheet = record(BRT_BEGIN_SHEET_DATA, &[]);
        sheet.extend(sheet_data);
        sheet.extend(record(BRT_END_SHEET_DATA, &[]));

        let relationships = r#"<Relationships xmlns="http://schemas.openxmlformats.org/package/2006/relationships"><Relationship Id="rId1" Type="http://schemas.openxmlformats.org/officeDocument/2006/relationships/worksheet" Target="worksheets/sheet1.bin"/></Relationships>"#;

        let mut strings = Vec::new();
        if let Some(items) = shared_strings {
            let mut header = (items.len() as u32).to_le_bytes().to_vec();
            header.extend((items.len() as u32).to_le_bytes());
            strings.extend(record(BRT_BEGIN_SST, &header));
            for item in items {
                let mut body = vec![0u8];
                body.extend(wide_string(item));
                strings.extend(record(BRT_SST_ITEM, &body));
            }
        }

        let mut entries: Vec<(&str, &[u8])> = vec![
            ("xl/workbook.bin", workbook.as_slice()),
            ("xl/_rels/workbook.bin.rels", relationships.as_bytes()),
            ("xl/worksheets/sheet1.bin", sheet.as_slice()),
        ];
        if shared_strings.is_some() {
            entries.push(("xl/sharedStrings.bin", strings.as_slice()));
        }
        zip_bytes(&entries)
    }

    #[test]
    fn reads_every_cell_record_kind() {
        let mut data = record(BRT_ROW_HDR, &0u32.to_le_bytes());
        data.extend(record(BRT_CELL_ST, &cell(0, 0, &wide_string("Seniority"))));
        data.extend(record(BRT_CELL_ISST, &cell(1, 0, &0u32.to_le_bytes())));
        data.extend(record(BRT_ROW_HDR, &1u32.to_le_bytes()));
        data.extend(record(BRT_CELL_REAL, &cell(0, 0, &2.5f64.to_le_bytes())));
        data.extend(record(BRT_CELL_RK, &cell(1, 0, &((7u32 << 2) | 0x02).to_le_bytes())));
        data.extend(record(BRT_CELL_BOOL, &cell(2, 0, &[1])));
        data.extend(record(BRT_CELL_ERROR, &cell(3, 0, &[0x07])));

        let rows = read_rows(package(data, Some(&["Years of experience"][..])), None).unwrap();
        assert_eq!(rows, vec![
            vec![text("Seniority"), text("Years of experience"), None, None],
            vec![text("2.5"), text("7"), text("TRUE"), text("#DIV/0!")],
        ]);
    }

    #[test]
    fn stops_at_row_past_the_limit() {
        let mut data = record(BRT_ROW_HDR, &0u32.to_le_bytes());
        data.extend(record(BRT_CELL_ST, &cell(0, 0, &wide_string("h"))));
        data.extend(record(BRT_ROW_HDR, &3u32.to_le_bytes()));
        data.extend(record(BRT_CELL_ST, &cell(0, 0, &wide_string("late"))));
        let rows = read_rows(package(data, None), Some(2)).unwrap();
        assert_eq!(rows, vec![vec![text("h")], vec![None]]);
    }

    #[test]
    fn truncated_cell_record_is_an_error() {
        let mut data = record(BRT_ROW_HDR, &0u32.to_le_bytes());
        data.extend(record(BRT_CELL_REAL, &cell(0, 0, &[1, 2])));
        assert!(read_rows(package(data, None), None).is_err());
    }

    #[test]
    fn extracts_candidate_from_workbook() {
        let mut data = record(BRT_ROW_HDR, &0u32.to_le_bytes());
        data.extend(record(BRT_CELL_ISST, &cell(0, 0, &0u32.to_le_bytes())));
        data.extend(record(BRT_CELL_ISST, &cell(1, 0, &1u32.to_le_bytes())));
        data.extend(record(BRT_CELL_ISST, &cell(2, 0, &2u32.to_le_bytes())));
        data.extend(record(BRT_ROW_HDR, &1u32.to_le_bytes()));
        data.extend(record(BRT_CELL_ST, &cell(0, 0, &wide_string("mid"))));
        data.extend(record(BRT_CELL_RK, &cell(1, 0, &((4u32 << 2) | 0x02).to_le_bytes())));
        data.extend(record(BRT_CELL_BOOL, &cell(2, 0, &[0])));

        let strings = ["Seniority", "Years of experience", "Availability"];
        let record = crate::extractor::extract("John", "Doe", package(data, Some(&strings[..]))).unwrap();
        assert_eq!((record.seniority.as_str(), record.years, record.availability), ("mid", 4, false));
    }
}
