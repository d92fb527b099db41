/// Criteria for selecting data from spreadsheets.
#[derive(Clone, Copy, Debug, Default)]
pub(crate) struct Criteria {
    /// Maximum number of sheets to read, in workbook order.
    pub(crate) sheet_limit: Option<usize>,

    /// Maximum number of rows to read per sheet, counted from the first used row.
    pub(crate) rows_limit: Option<usize>,
}

impl Criteria {
    /// Checks whether `count` sheets already exhaust the sheet limit.
    pub(crate) fn is_sheet_limit_reached(&self, count: usize) -> bool {
        self.sheet_limit.map(|limit| count >= limit).unwrap_or(false)
    }
}
