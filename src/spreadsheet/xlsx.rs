use crate::error::CandidateSheetError;
use crate::helpers::xml::XmlAttributeHelper;
use crate::helpers::xml::XmlNodeHelper;
use crate::helpers::xml::XmlReader;
use crate::helpers::xml::XmlTextContextHelper;
use crate::helpers::zip::ZipHelper;
use crate::match_xml_events;
use crate::spreadsheet::cell::Cell;
use crate::spreadsheet::cell::CellType;
use crate::spreadsheet::criteria::Criteria;
use crate::spreadsheet::excel;
use crate::spreadsheet::excel::load_relationships;
use crate::spreadsheet::reference::reference_to_index;
use crate::spreadsheet::sheet::Sheet;
use crate::spreadsheet::Spreadsheet;
use crate::spreadsheet::SpreadsheetError;
use crate::spreadsheet::WorkbookArchive;
use crate::spreadsheet::WorkbookKind;
use quick_xml::events::Event;
use quick_xml::name::QName;
use std::borrow::Cow;
use std::collections::HashMap;
use std::collections::HashSet;
use std::io::BufReader;
use std::io::Cursor;
use zip::read::ZipFile;

const TAG_CUSTOM_FORMATS: QName = QName(b"numFmts");
const TAG_CUSTOM_FORMAT: QName = QName(b"numFmt");
const TAG_FORMAT_INDEXES: QName = QName(b"cellXfs");
const TAG_FORMAT_INDEX: QName = QName(b"xf");
const TAG_SHARED_STRING_ITEM: QName = QName(b"si");
const TAG_PHONETIC_TEXT: QName = QName(b"rPh");       // Phonetic text for Asian languages
const TAG_TEXT: QName = QName(b"t");
const TAG_WORKBOOK_PROPERTIES: QName = QName(b"workbookPr");
const TAG_SHEET: QName = QName(b"sheet");
const TAG_ROW: QName = QName(b"row");
const TAG_CELL: QName = QName(b"c");
const TAG_INLINE_STRING: QName = QName(b"is");
const TAG_VALUE: QName = QName(b"v");

/// Office Open XML workbook (`.xlsx`, `.xlsm`).
pub(crate) struct XlsxSpreadsheet {
    zip: WorkbookArchive,
    /// Cell type of every cell format, indexed by the `s` attribute
    number_formats: Vec<CellType>,
    /// (sheet name, part path) in workbook order
    sheets: Vec<(String, String)>,
}

impl XlsxSpreadsheet {
    pub(crate) fn open(mut zip: WorkbookArchive) -> Result<XlsxSpreadsheet, CandidateSheetError> {
        let (number_formats, sheets) = excel::open(&mut zip, load_workbook, load_number_formats)?;
        Ok(XlsxSpreadsheet {
            zip,
            number_formats,
            sheets,
        })
    }
}

impl Spreadsheet for XlsxSpreadsheet {
    fn kind(&self) -> WorkbookKind {
        WorkbookKind::Xlsx
    }

    fn load_shared_strings(&mut self, mut indexes: Option<HashSet<usize>>) -> Result<(Vec<String>, HashMap<usize, usize>), CandidateSheetError> {
        let mut shared_strings = Vec::<String>::new();
        let mut mappings = HashMap::<usize, usize>::new();
        let mut reader = match self.zip.xml_reader("xl/sharedStrings.xml")? {
            Some(reader) => reader,
            None => return Ok((shared_strings, mappings)),
        };

        let mut id = 0usize;
        match_xml_events!(reader => {
            Event::Start(event) if event.name() == TAG_SHARED_STRING_ITEM => {
                if let Some(keys) = &mut indexes {
                    if keys.remove(&id) {
                        let string = read_string_value(&mut reader, TAG_SHARED_STRING_ITEM, false)?;
                        mappings.insert(id, shared_strings.len());
                        shared_strings.push(string);
                    }
                    if keys.is_empty() {
                        break;
                    }
                } else {
                    let string = read_string_value(&mut reader, TAG_SHARED_STRING_ITEM, false)?;
                    mappings.insert(id, shared_strings.len());
                    shared_strings.push(string);
                }
                id += 1;
            }
        });
        Ok((shared_strings, mappings))
    }

    fn read_sheets(&mut self, criteria: &Criteria) -> Result<Vec<Sheet>, CandidateSheetError> {
        let mut sheets = Vec::<Sheet>::new();
        for (sheet_name, zip_path) in &self.sheets {
            if criteria.is_sheet_limit_reached(sheets.len()) {
                break;
            }

            let mut sheet = Sheet::new(sheet_name, criteria.rows_limit);
            let mut row_count = 0usize;
            let mut col_count = 0usize;
            let mut row = 0usize;
            let mut col = 0usize;
            let mut kind = CellType::default();
            let mut value = String::new();
            let mut reader = self.zip.xml_reader(zip_path)?
                .ok_or_else(|| SpreadsheetError::FileError(zip_path.to_owned()))?;
            match_xml_events!(reader => {
                Event::Start(event) if event.name() == TAG_ROW => {
                    if let Some(number) = event.parse_attribute_value::<usize>("r")? {
                        row_count = number.saturating_sub(1);
                    }
                    col_count = 0;
                }
                Event::End(event) if event.name() == TAG_ROW => {
                    row_count += 1;
                    col_count = 0;
                }
                Event::Start(event) if event.name() == TAG_CELL => {
                    (row, col) = event.get_attribute_value("r")?
                        .and_then(|reference| reference_to_index(&reference))
                        .unwrap_or((row_count, col_count));
                    col_count = col + 1;
                    value.clear();
                    if sheet.reaches_limit(row) {
                        break;
                    }
                    kind = event.get_attribute_value("t")?.map(|t| {
                        match t.as_ref() {
                            "inlineStr" | "str" => CellType::InlineString,
                            "s" => CellType::SharedString,
                            "d" => CellType::IsoDateTime,
                            "b" => CellType::Boolean,
                            "e" => CellType::Error,
                            _ => CellType::Number,
                        }
                    }).unwrap_or(CellType::Number);
                    if let Some(format_id) = event.get_attribute_value("s")? {
                        if kind == CellType::Number && !format_id.is_empty() {
                            let index = format_id.parse::<usize>()?;
                            kind = excel::number_format(&self.number_formats, index);
                        }
                    }
                }
                Event::Start(event) if kind != CellType::Empty && event.name() == TAG_INLINE_STRING => {
                    value = read_string_value(&mut reader, TAG_INLINE_STRING, false)?;
                }
                Event::Start(event) if kind != CellType::Empty && event.name() == TAG_VALUE => {
                    value = read_string_value(&mut reader, TAG_VALUE, true)?;
                }
                Event::End(event) if event.name() == TAG_CELL => {
                    if kind != CellType::Empty && !value.is_empty() {
                        sheet.push(Cell {
                            row,
                            col,
                            kind,
                            value: std::mem::take(&mut value),
                        });
                    }
                    kind = CellType::Empty;
                },
            });
            sheets.push(sheet);
        }

        Ok(sheets)
    }
}

/// Reads the sheet list from `xl/workbook.xml` and the date system flag from `workbookPr`.
fn load_workbook(zip: &mut WorkbookArchive) -> Result<(Vec<(String, String)>, bool), CandidateSheetError> {
    let relationships = load_relationships(zip, "xl/_rels/workbook.xml.rels")?;
    let mut reader = zip.xml_reader("xl/workbook.xml")?
        .ok_or_else(|| SpreadsheetError::FileError("xl/workbook.xml".to_string()))?;
    let mut sheets: Vec<(String, String)> = Vec::new();
    let mut is_1904 = false;
    match_xml_events!(reader => {
        Event::Start(event) if event.name() == TAG_SHEET => {
            let mut name = None::<Cow<str>>;
            let mut id = None::<Cow<str>>;
            for result in event.attributes() {
                let attribute = result?;
                let key = attribute.key.local_name();
                if key.as_ref() == b"name" {
                    name = Some(attribute.get_value()?);
                } else if key.as_ref() == b"id" {
                    id = Some(attribute.get_value()?);
                }
            }
            if let Some((name, id)) = name.zip(id) {
                if let Some(path) = relationships.get(id.as_ref()) {
                    sheets.push((name.to_string(), path.to_owned()));
                }
            }
        }
        Event::Start(event) if event.name() == TAG_WORKBOOK_PROPERTIES => {
            is_1904 = event.get_attribute_value("date1904")?
                .map(|value| value == "1" || value == "true")
                .unwrap_or(false);
        }
    });
    Ok((sheets, is_1904))
}

/// Resolves the cell formats of `xl/styles.xml` to cell types.
fn load_number_formats(zip: &mut WorkbookArchive, is_1904: bool) -> Result<Vec<CellType>, CandidateSheetError> {
    let mut reader = match zip.xml_reader("xl/styles.xml")? {
        Some(reader) => reader,
        None => return Ok(Vec::new()),
    };

    let mut has_custom_formats = false;
    let mut custom_formats_context = false;
    let mut custom_formats = HashMap::<String, CellType>::new();

    let mut has_format_indexes = false;
    let mut format_indexes_context = false;
    let mut format_indexes = Vec::<String>::new();

    match_xml_events!(reader => {
        Event::Start(event) if !custom_formats_context && event.name() == TAG_CUSTOM_FORMATS => {
            has_custom_formats = true;
            custom_formats_context = true;
        }
        Event::End(event) if custom_formats_context && event.name() == TAG_CUSTOM_FORMATS => {
            custom_formats_context = false;
            if has_custom_formats && has_format_indexes {
                break;
            }
        }
        Event::Start(event) if custom_formats_context && event.name() == TAG_CUSTOM_FORMAT => {
            let id = event.get_attribute_value("numFmtId")?;
            let format = event.get_attribute_value("formatCode")?;
            if let Some((id, format)) = id.zip(format) {
                let style = CellType::parse_custom_number_format(&format, is_1904);
                custom_formats.insert(id.to_string(), style);
            }
        }

        Event::Start(event) if !format_indexes_context && event.name() == TAG_FORMAT_INDEXES => {
            has_format_indexes = true;
            format_indexes_context = true;
        }
        Event::End(event) if format_indexes_context && event.name() == TAG_FORMAT_INDEXES => {
            format_indexes_context = false;
            if has_custom_formats && has_format_indexes {
                break;
            }
        }
        Event::Start(event) if format_indexes_context && event.name() == TAG_FORMAT_INDEX => {
            let id = event.get_attribute_value("numFmtId")?;
            format_indexes.push(id.map(|id| id.to_string()).unwrap_or_else(|| "0".to_owned()));
        }
    });

    Ok(excel::load_number_formats(format_indexes, custom_formats, is_1904))
}

/// Collects the text of a string item up to `end_tag`, skipping phonetic runs.
/// `is_text_content` is set for `<v>`, whose text is the value itself rather than nested `<t>` runs.
fn read_string_value(
    reader: &mut XmlReader<BufReader<ZipFile<'_, Cursor<Vec<u8>>>>>,
    end_tag: QName,
    is_text_content: bool,
) -> Result<String, CandidateSheetError> {
    let mut is_phonetic_text = false;
    let mut is_text = is_text_content;
    let mut text = String::new();
    match_xml_events!(reader => {
        Event::End(event) if event.name() == end_tag => break,
        Event::Start(event) if event.name() == TAG_PHONETIC_TEXT => is_phonetic_text = true,
        Event::End(event) if event.name() == TAG_PHONETIC_TEXT => is_phonetic_text = false,
        Event::Start(event) if !is_phonetic_text && event.name() == TAG_TEXT => is_text = true,
        Event::End(event) if is_text && event.name() == TAG_TEXT => is_text = false,
        Event::Text(event) if is_text => text.push_bytes_text(&event)?,
        Event::CData(event) if is_text => text.push_str(&event.xml_content()?),
        Event::GeneralRef(event) if is_text => text.push_bytes_ref(&event)?,
    });
    Ok(text)
}

#[cfg(test)]
pub(crate) mod tests {
    use super::*;
    use crate::spreadsheet::read_rows;
    use crate::spreadsheet::tests::zip_bytes;

    fn text(value: &str) -> Option<String> {
        Some(value.to_owned())
    }

    /// Builds an `.xlsx` package holding one worksheet per `(name, rows)` pair.
    /// Each row is the inner XML of `<sheetData>`.
    pub(crate) fn package(sheets: &[(&str, &[&str])], shared_strings: Option<&[&str]>, styles: Option<&str>) -> Vec<u8> {
        let mut workbook = String::from(r#"<?xml version="1.0" encoding="UTF-8"?><workbook xmlns="http://schemas.openxmlformats.org/spreadsheetml/2006/main" xmlns:r="http://schemas.openxmlformats.org/officeDocument/2006/relationships"><sheets>"#);
        let mut relationships = String::from(r#"<?xml version="1.0" encoding="UTF-8"?><Relationships xmlns="http://schemas.openxmlformats.org/package/2006/relationships">"#);
        let mut parts: Vec<(String, String)> = Vec::new();
        for (index, (name, rows)) in sheets.iter().enumerate() {
            let number = index + 1;
            workbook.push_str(&format!(r#"<sheet name="{name}" sheetId="{number}" r:id="rId{number}"/>"#));
            relationships.push_str(&format!(
                r#"<Relationship Id="rId{number}" Type="http://schemas.openxmlformats.org/officeDocument/2006/relationships/worksheet" Target="worksheets/sheet{number}.xml"/>"#
            ));
            parts.push((
                format!("xl/worksheets/sheet{number}.xml"),
                format!(r#"<?xml version="1.0" encoding="UTF-8"?><worksheet xmlns="http://schemas.openxmlformats.org/spreadsheetml/2006/main"><sheetData>{}</sheetData></worksheet>"#, rows.concat()),
            ));
        }
        workbook.push_str("</sheets></workbook>");
        relationships.push_str(r#"<Relationship Id="rId99" Type="http://schemas.openxmlformats.org/officeDocument/2006/relationships/styles" Target="styles.xml"/></Relationships>"#);
        parts.push(("xl/workbook.xml".to_owned(), workbook));
        parts.push(("xl/_rels/workbook.xml.rels".to_owned(), relationships));
        if let Some(strings) = shared_strings {
            let items: String = strings.iter().map(|string| format!("<si><t>{string}</t></si>")).collect();
            parts.push((
                "xl/sharedStrings.xml".to_owned(),
                format!(r#"<?xml version="1.0" encoding="UTF-8"?><sst xmlns="http://schemas.openxmlformats.org/spreadsheetml/2006/main">{items}</sst>"#),
            ));
        }
        if let Some(styles) = styles {
            parts.push(("xl/styles.xml".to_owned(), styles.to_owned()));
        }

        let entries: Vec<(&str, &[u8])> = parts.iter().map(|(path, content)| (path.as_str(), content.as_bytes())).collect();
        zip_bytes(&entries)
    }

    pub(crate) fn workbook(rows: &[&str], shared_strings: Option<&[&str]>) -> Vec<u8> {
        package(&[("Sheet1", rows)], shared_strings, None)
    }

    #[test]
    fn reads_inline_strings_and_numbers() {
        let bytes = workbook(&[
            r#"<row r="1"><c r="A1" t="inlineStr"><is><t>Seniority</t></is></c><c r="B1" t="inlineStr"><is><t>Availability</t></is></c></row>"#,
            r#"<row r="2"><c r="A2" t="inlineStr"><is><t>Senior</t></is></c><c r="B2" t="b"><v>1</v></c></row>"#,
        ], None);
        let rows = read_rows(bytes, None).unwrap();
        assert_eq!(rows, vec![
            vec![text("Seniority"), text("Availability")],
            vec![text("Senior"), text("TRUE")],
        ]);
    }

    #[test]
    fn reads_only_the_first_sheet() {
        let bytes = package(&[
            ("First", &[r#"<row r="1"><c r="A1" t="str"><v>one</v></c></row>"#]),
            ("Second", &[r#"<row r="1"><c r="A1" t="str"><v>two</v></c></row>"#]),
        ], None, None);
        assert_eq!(read_rows(bytes, None).unwrap(), vec![vec![text("one")]]);
    }

    #[test]
    fn cells_without_reference_follow_document_order() {
        let bytes = workbook(&[
            r#"<row><c t="str"><v>a</v></c><c t="str"><v>b</v></c></row>"#,
            r#"<row><c/><c t="str"><v>c</v></c></row>"#,
        ], None);
        assert_eq!(read_rows(bytes, None).unwrap(), vec![
            vec![text("a"), text("b")],
            vec![None, text("c")],
        ]);
    }

    #[test]
    fn applies_date_styles() {
        let styles = r#"<styleSheet><numFmts count="1"><numFmt numFmtId="164" formatCode="yyyy\-mm\-dd"/></numFmts><cellXfs count="3"><xf numFmtId="0"/><xf numFmtId="164"/><xf numFmtId="20"/></cellXfs></styleSheet>"#;
        let bytes = package(&[("Sheet1", &[
            r#"<row r="1"><c r="A1" s="0"><v>7</v></c><c r="B1" s="1"><v>45292</v></c><c r="C1" s="2"><v>0.5</v></c><c r="D1" t="e"><v>#N/A</v></c></row>"#,
        ])], None, Some(styles));
        assert_eq!(read_rows(bytes, None).unwrap(), vec![
            vec![text("7"), text("2024-01-01"), text("12:00:00"), text("#N/A")],
        ]);
    }

    #[test]
    fn stops_reading_past_the_row_limit() {
        let bytes = workbook(&[
            r#"<row r="1"><c r="A1" t="str"><v>h</v></c></row>"#,
            r#"<row r="5"><c r="A5" t="str"><v>late</v></c></row>"#,
        ], None);
        assert_eq!(read_rows(bytes, Some(2)).unwrap(), vec![vec![text("h")], vec![None]]);
    }

    #[test]
    fn rows_stored_out_of_order_stay_within_the_limit() {
        let bytes = workbook(&[
            r#"<row r="3000000"><c r="A3000000" t="str"><v>far</v></c></row>"#,
            r#"<row r="1"><c r="A1" t="str"><v>h</v></c></row>"#,
        ], None);
        assert_eq!(read_rows(bytes, Some(2)).unwrap(), vec![vec![text("h")], vec![None]]);
    }

    #[test]
    fn workbook_without_sheets_is_rejected() {
        let bytes = package(&[], None, None);
        let error = read_rows(bytes, None).err().unwrap();
        assert_eq!(error.to_string(), "Spreadsheet contains no worksheets");
    }

    #[test]
    fn loads_requested_shared_strings_only() {
        let bytes = workbook(&[r#"<row r="1"><c r="A1"><v>1</v></c></row>"#], Some(&["zero", "one", "two"][..]));
        let zip = zip::ZipArchive::new(Cursor::new(bytes)).unwrap();
        let mut spreadsheet = XlsxSpreadsheet::open(zip).unwrap();
        let (strings, mappings) = spreadsheet.load_shared_strings(Some(HashSet::from([2]))).unwrap();
        assert_eq!(strings, vec!["two".to_owned()]);
        assert_eq!(mappings, HashMap::from([(2, 0)]));
    }
}
