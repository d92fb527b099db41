use crate::error::CandidateSheetError;
use crate::spreadsheet::cell::Cell;
use crate::spreadsheet::cell::CellType;
use crate::spreadsheet::Row;
use crate::spreadsheet::SpreadsheetError;
use std::collections::HashMap;
use std::collections::HashSet;

/// Worksheet grid size of the OOXML and OpenDocument formats.
pub(crate) const MAX_ROWS: usize = 1_048_576;
pub(crate) const MAX_COLS: usize = 16_384;

/// Cells of one worksheet in reading order, plus the rows they cover.
pub(crate) struct Sheet {
    pub(crate) name: String,
    pub(crate) cells: Vec<Cell>,
    /// Maximum number of rows to keep, counted from the first used row
    limit: Option<usize>,
    /// Set once a cell beyond the row limit was seen
    truncated: bool,
    pub(crate) row_lower_bound: Option<usize>,
    pub(crate) row_upper_bound: Option<usize>,
}

impl Sheet {
    pub(super) fn new(name: &str, limit: Option<usize>) -> Self {
        Self {
            name: name.to_owned(),
            cells: Vec::new(),
            limit,
            truncated: false,
            row_lower_bound: None,
            row_upper_bound: None,
        }
    }

    /// Checks whether `row` lies past the row limit, remembering that the sheet was cut short.
    /// Readers stop scanning the sheet as soon as this returns true.
    pub(super) fn reaches_limit(&mut self, row: usize) -> bool {
        let is_more_than_limit = self.row_lower_bound.zip(self.limit)
            .map(|(row_lower_bound, limit)| row_lower_bound + limit <= row)
            .unwrap_or(false);
        if is_more_than_limit {
            self.truncated = true;
        }
        is_more_than_limit
    }

    pub(super) fn push(&mut self, cell: Cell) {
        if self.row_lower_bound.map(|row_lower_bound| cell.row < row_lower_bound).unwrap_or(true) {
            self.row_lower_bound = Some(cell.row);
        }
        if self.row_upper_bound.map(|row_upper_bound| row_upper_bound < cell.row).unwrap_or(true) {
            self.row_upper_bound = Some(cell.row);
        }
        self.cells.push(cell);
    }

    /// Indexes into the workbook shared string table referenced by this sheet.
    pub(crate) fn shared_string_indexes(&self) -> HashSet<usize> {
        self.cells
            .iter()
            .filter(|cell| cell.kind == CellType::SharedString)
            .filter_map(|cell| cell.value.parse::<usize>().ok())
            .collect()
    }

    /// Replaces shared string references by their text.
    /// `mappings` translates a table index to a position in `shared_strings`.
    pub(crate) fn resolve_shared_strings(
        &mut self,
        shared_strings: &[String],
        mappings: &HashMap<usize, usize>,
    ) -> Result<(), CandidateSheetError> {
        for cell in self.cells.iter_mut().filter(|cell| cell.kind == CellType::SharedString) {
            let string = cell.value
                .parse::<usize>()
                .ok()
                .and_then(|index| mappings.get(&index))
                .and_then(|position| shared_strings.get(*position))
                .ok_or_else(|| SpreadsheetError::SharedStringError(cell.reference(), cell.value.to_owned()))?;
            cell.value = string.to_owned();
            cell.kind = CellType::InlineString;
        }
        Ok(())
    }

    /// Lays the cells out as a dense grid spanning the used range.
    /// Row 0 is the first used row, column 0 the left-most used column, and holes are `None`.
    /// With a row limit only rows within the limit of the first used row are kept, so cells
    /// read before an earlier row showed up are dropped. A truncated sheet always spans
    /// exactly the row limit, blank trailing rows included.
    pub(crate) fn rows(&self) -> Vec<Row> {
        let (Some(row_lower), Some(row_upper)) = (self.row_lower_bound, self.row_upper_bound) else {
            return Vec::new();
        };
        let row_upper = match self.limit {
            Some(0) => return Vec::new(),
            Some(limit) => {
                let last_row = row_lower + limit - 1;
                if self.truncated || last_row < row_upper { last_row } else { row_upper }
            }
            None => row_upper,
        };

        let kept = || self.cells.iter().filter(move |cell| cell.row <= row_upper);
        let (Some(col_lower), Some(col_upper)) = (kept().map(|cell| cell.col).min(), kept().map(|cell| cell.col).max()) else {
            return Vec::new();
        };

        let width = col_upper - col_lower + 1;
        let mut table: Vec<Row> = vec![vec![None; width]; row_upper - row_lower + 1];
        for cell in kept() {
            if let Some(slot) = table
                .get_mut(cell.row - row_lower)
                .and_then(|record| record.get_mut(cell.col - col_lower))
            {
                *slot = Some(cell.to_string());
            }
        }
        table
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn push(sheet: &mut Sheet, row: usize, col: usize, value: &str) {
        sheet.push(Cell {
            row,
            col,
            kind: CellType::InlineString,
            value: value.to_owned(),
        });
    }

    fn text(value: &str) -> Option<String> {
        Some(value.to_owned())
    }

    #[test]
    fn sheet_initial() {
        let sheet = Sheet::new("Sheet1", None);

        assert!(sheet.cells.is_empty());
        assert_eq!(sheet.row_lower_bound, None);
        assert!(sheet.rows().is_empty());
    }

    #[test]
    fn sheet_update() {
        let mut sheet = Sheet::new("Sheet1", None);
        push(&mut sheet, 1, 1, "a");
        push(&mut sheet, 1, 3, "b");
        push(&mut sheet, 3, 1, "c");
        push(&mut sheet, 3, 3, "d");

        assert_eq!(sheet.cells.len(), 4);
        assert_eq!(sheet.row_lower_bound, Some(1));
        assert_eq!(sheet.row_upper_bound, Some(3));

        assert_eq!(sheet.rows(), vec![
            vec![text("a"), None, text("b")],
            vec![None, None, None],
            vec![text("c"), None, text("d")],
        ]);
    }

    #[test]
    fn limit_counts_from_first_used_row() {
        let mut sheet = Sheet::new("Sheet1", Some(2));
        assert!(!sheet.reaches_limit(5));
        push(&mut sheet, 5, 0, "header");
        assert!(!sheet.reaches_limit(6));
        push(&mut sheet, 6, 0, "value");
        assert!(sheet.reaches_limit(7));
        assert_eq!(sheet.rows().len(), 2);
    }

    #[test]
    fn truncated_sheet_pads_blank_rows() {
        let mut sheet = Sheet::new("Sheet1", Some(2));
        push(&mut sheet, 0, 0, "header");
        assert!(sheet.reaches_limit(4));
        assert_eq!(sheet.rows(), vec![vec![text("header")], vec![None]]);
    }

    #[test]
    fn untruncated_sheet_keeps_its_own_height() {
        let mut sheet = Sheet::new("Sheet1", Some(2));
        push(&mut sheet, 0, 0, "header");
        assert_eq!(sheet.rows().len(), 1);
    }

    #[test]
    fn rows_read_before_the_first_used_row_are_dropped() {
        let mut sheet = Sheet::new("Sheet1", Some(2));
        push(&mut sheet, 3_000_000, 9_000, "far");
        assert!(!sheet.reaches_limit(0));
        push(&mut sheet, 0, 0, "header");
        push(&mut sheet, 1, 1, "value");
        assert_eq!(sheet.rows(), vec![
            vec![text("header"), None],
            vec![None, text("value")],
        ]);
    }

    #[test]
    fn zero_row_limit_keeps_nothing() {
        let mut sheet = Sheet::new("Sheet1", Some(0));
        push(&mut sheet, 0, 0, "header");
        assert!(sheet.rows().is_empty());
    }

    #[test]
    fn resolves_shared_strings() {
        let mut sheet = Sheet::new("Sheet1", None);
        sheet.push(Cell { row: 0, col: 0, kind: CellType::SharedString, value: "4".to_owned() });
        sheet.push(Cell { row: 0, col: 1, kind: CellType::Number, value: "4".to_owned() });
        assert_eq!(sheet.shared_string_indexes(), HashSet::from([4]));

        let mappings = HashMap::from([(4, 0)]);
        sheet.resolve_shared_strings(&["Seniority".to_owned()], &mappings).unwrap();
        assert_eq!(sheet.rows(), vec![vec![text("Seniority"), text("4")]]);
    }

    #[test]
    fn dangling_shared_string_is_an_error() {
        let mut sheet = Sheet::new("Sheet1", None);
        sheet.push(Cell { row: 0, col: 0, kind: CellType::SharedString, value: "9".to_owned() });
        let error = sheet.resolve_shared_strings(&[], &HashMap::new()).unwrap_err();
        assert_eq!(error.to_string(), "Shared string '9' referenced at A1 does not exist");
    }
}
