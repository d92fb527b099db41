//! Parts shared by the two Office Open XML packages, `.xlsx` and `.xlsb`.
use crate::error::CandidateSheetError;
use crate::helpers::xml::XmlNodeHelper;
use crate::helpers::zip::ZipHelper;
use crate::match_xml_events;
use crate::spreadsheet::cell::CellType;
use crate::spreadsheet::SpreadsheetError;
use crate::spreadsheet::WorkbookArchive;
use quick_xml::events::Event;
use std::borrow::Cow;
use std::collections::HashMap;

const TAG_RELATIONSHIP: &[u8] = b"Relationship";

/// Loads the worksheet list and the number formats of a package.
///
/// `load_workbook` returns `(sheet name, part path)` pairs in workbook order and
/// whether the workbook uses the 1904 date system.
pub(super) fn open<W, F>(zip: &mut WorkbookArchive, load_workbook: W, load_number_formats: F) -> Result<(
    Vec<CellType>,
    Vec<(String, String)>
), CandidateSheetError>
where
    W: Fn(&mut WorkbookArchive) -> Result<(Vec<(String, String)>, bool), CandidateSheetError>,
    F: Fn(&mut WorkbookArchive, bool) -> Result<Vec<CellType>, CandidateSheetError>,
{
    let (sheets, is_1904) = load_workbook(zip)?;
    if sheets.is_empty() {
        Err(SpreadsheetError::NoWorksheetError)?
    }

    let number_formats = load_number_formats(zip, is_1904)?;
    Ok((number_formats, sheets))
}

/// Maps worksheet relationship ids to part paths.
pub(super) fn load_relationships(zip: &mut WorkbookArchive, path: &str) -> Result<HashMap<String, String>, CandidateSheetError> {
    let mut reader = zip.xml_reader(path)?
        .ok_or_else(|| SpreadsheetError::FileError(path.to_string()))?;
    let mut relationships: HashMap<String, String> = HashMap::new();
    match_xml_events!(reader => {
        Event::Start(event) if event.local_name().as_ref() == TAG_RELATIONSHIP => {
            let id = event.get_attribute_value("Id")?;
            let kind = event.get_attribute_value("Type")?;
            let target = event.get_attribute_value("Target")?;
            if kind.map(|it| it.ends_with("/worksheet")).unwrap_or(true) {
                if let Some((id, target)) = id.zip(target) {
                    relationships.insert(id.to_string(), to_zip_path(target));
                }
            }
        }
    });
    Ok(relationships)
}

/// Resolves each cell format to a cell type, custom formats first, then built-in ids.
pub(super) fn load_number_formats(format_indexes: Vec<String>, custom_formats: HashMap<String, CellType>, is_1904: bool) -> Vec<CellType> {
    format_indexes
        .iter()
        .map(|id| {
            custom_formats
                .get(id)
                .copied()
                .or_else(|| CellType::parse_builtin_number_format_id(id, is_1904))
                .unwrap_or(CellType::Number)
        })
        .collect()
}

/// Looks up the cell type of a style index; unknown styles are plain numbers.
pub(super) fn number_format(number_formats: &[CellType], index: usize) -> CellType {
    number_formats.get(index).copied().unwrap_or(CellType::Number)
}

pub(crate) fn to_zip_path(path: Cow<'_, str>) -> String {
    if let Some(path) = path.strip_prefix('/') {
        path.to_string()
    } else if path.starts_with("xl/") {
        path.to_string()
    } else {
        format!("xl/{path}")
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn normalizes_part_paths() {
        assert_eq!(to_zip_path(Cow::Borrowed("worksheets/sheet1.xml")), "xl/worksheets/sheet1.xml");
        assert_eq!(to_zip_path(Cow::Borrowed("/xl/worksheets/sheet1.xml")), "xl/worksheets/sheet1.xml");
        assert_eq!(to_zip_path(Cow::Borrowed("xl/worksheets/sheet2.bin")), "xl/worksheets/sheet2.bin");
    }

    #[test]
    fn number_formats_prefer_custom_definitions() {
        let custom = HashMap::from([("164".to_owned(), CellType::NumberTime1900)]);
        let formats = load_number_formats(
            vec!["0".to_owned(), "14".to_owned(), "164".to_owned()],
            custom,
            false,
        );
        assert_eq!(formats, vec![CellType::Number, CellType::NumberDate1900, CellType::NumberTime1900]);
        assert_eq!(number_format(&formats, 1), CellType::NumberDate1900);
        assert_eq!(number_format(&formats, 99), CellType::Number);
    }
}
