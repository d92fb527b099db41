use crate::error::CandidateSheetError;
use crate::spreadsheet::reference::index_to_reference;
use crate::spreadsheet::SpreadsheetError;
use chrono::NaiveDate;
use chrono::TimeDelta;
use iso8601_duration::Duration as IsoDuration;
use std::fmt::Display;
use tracing::warn;

/// Types of cell data in spreadsheet files.
#[derive(Copy, Clone, Debug, Default, PartialEq)]
pub(crate) enum CellType {
    /// Placeholder for a cell that will not be kept
    #[default]
    Empty,
    /// Boolean values stored as `1`/`0`
    Boolean,
    /// Numeric values
    Number,
    /// Date/time values stored as numbers from 1900 epoch
    NumberDateTime1900,
    /// Date values stored as numbers from 1900 epoch
    NumberDate1900,
    /// Time values stored as numbers from 1900 epoch
    NumberTime1900,
    /// Date/time values stored as numbers from 1904 epoch
    NumberDateTime1904,
    /// Date values stored as numbers from 1904 epoch
    NumberDate1904,
    /// Time values stored as numbers from 1904 epoch
    NumberTime1904,
    /// ISO 8601 date/time strings
    IsoDateTime,
    /// ISO 8601 duration strings
    IsoDuration,
    /// Inline string values
    InlineString,
    /// Shared string table references
    SharedString,
    /// Error literals such as `#DIV/0!`
    Error,
}

impl CellType {
    /// Parses built-in Excel number format IDs to determine cell type.
    pub(crate) fn parse_builtin_number_format_id(id: &str, is_1904: bool) -> Option<Self> {
        match id {
            "22" => Some(if is_1904 { Self::NumberDateTime1904 } else { Self::NumberDateTime1900 }),
            "14" | "15" | "16" | "17" => Some(if is_1904 { Self::NumberDate1904 } else { Self::NumberDate1900 }),
            "18" | "19" | "20" | "21" | "45" | "46" | "47" => Some(if is_1904 { Self::NumberTime1904 } else { Self::NumberTime1900 }),
            _ => None,
        }
    }

    /// Parses custom number format strings to determine cell type.
    /// Quoted literals, escaped characters and bracketed sections (colors, conditions) are ignored.
    pub(crate) fn parse_custom_number_format(format: &str, is_1904: bool) -> Self {
        let mut is_escaped = false;
        let mut is_literal = false;
        let mut is_date = false;
        let mut is_time = false;
        let mut is_color = false;
        for character in format.chars() {
            match character {
                _ if is_escaped => is_escaped = false,
                '_' | '\\' => is_escaped = true,

                '"' if is_literal => is_literal = false,
                '"' if !is_color => is_literal = true,

                ']' if is_color => is_color = false,
                '[' if !is_literal => is_color = true,
                _ if is_literal || is_color => (),

                'Y' | 'y' | 'D' | 'd' => is_date = true,
                'H' | 'h' | 'S' | 's' => is_time = true,
                _ => (),
            }
        }

        match (is_date, is_time, is_1904) {
            (true, true, false) => Self::NumberDateTime1900,
            (true, true, true) => Self::NumberDateTime1904,
            (true, false, false) => Self::NumberDate1900,
            (true, false, true) => Self::NumberDate1904,
            (false, true, false) => Self::NumberTime1900,
            (false, true, true) => Self::NumberTime1904,
            (false, false, _) => Self::Number,
        }
    }
}

/// Converts Excel error codes to their literal text.
pub(crate) fn to_error_value(value: u8) -> &'static str {
    match value {
        0x00 => "#NULL!",
        0x07 => "#DIV/0!",
        0x0F => "#VALUE!",
        0x17 => "#REF!",
        0x1D => "#NAME?",
        0x24 => "#NUM!",
        0x2A => "#N/A",
        0x2B => "#GETTING_DATA",
        _ => "#ERROR!",
    }
}

/// A single stored cell: zero-based position, storage type and raw value.
#[derive(Clone, Debug)]
pub(crate) struct Cell {
    pub(crate) row: usize,
    pub(crate) col: usize,
    pub(crate) kind: CellType,
    pub(crate) value: String,
}

impl Cell {
    /// Returns the Excel-style cell reference (e.g., "A1", "B2").
    pub(crate) fn reference(&self) -> String {
        index_to_reference(self.row, self.col)
    }

    fn format(&self) -> Result<String, CandidateSheetError> {
        Ok(match self.kind {
            CellType::Boolean => if self.value == "1" { "TRUE" } else { "FALSE" }.to_owned(),
            CellType::NumberDateTime1900 => to_datetime_string(&self.value, false)?,
            CellType::NumberDate1900 => to_date_string(&self.value, false)?,
            CellType::NumberDateTime1904 => to_datetime_string(&self.value, true)?,
            CellType::NumberDate1904 => to_date_string(&self.value, true)?,
            CellType::NumberTime1900 | CellType::NumberTime1904 => to_time_string(&self.value)?,
            CellType::IsoDateTime => self.value.replace('T', " "),
            CellType::IsoDuration => to_duration_string(&self.value)?,
            _ => self.value.to_owned(),
        })
    }
}

/// Renders the cell the way a spreadsheet shows it.
/// A date formatted cell whose value cannot be converted falls back to the raw value.
impl Display for Cell {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self.format() {
            Ok(value) => write!(f, "{}", value),
            Err(error) => {
                warn!(reference = %self.reference(), value = %self.value, %error, "cell value kept unformatted");
                write!(f, "{}", self.value)
            }
        }
    }
}

/// Converts Excel numeric date to ISO date string.
/// The 1900 system counts the nonexistent 1900-02-29, so serials before 60 are shifted by one day.
fn to_date_string(value: &str, is_1904: bool) -> Result<String, CandidateSheetError> {
    let days = value.parse::<f64>()?.trunc() as i64;
    let offset = if is_1904 {
        1462
    } else if days < 60 {
        1
    } else {
        0
    };
    NaiveDate::from_ymd_opt(1899, 12, 30)
        .zip(TimeDelta::try_days(days + offset))
        .and_then(|(epoch, duration)| epoch.checked_add_signed(duration))
        .map(|date| date.format("%Y-%m-%d").to_string())
        .ok_or_else(|| SpreadsheetError::CellValueError(value.to_owned()).into())
}

/// Converts the fractional part of an Excel serial to `HH:MM:SS[.mmm]`.
fn to_time_string(value: &str) -> Result<String, CandidateSheetError> {
    let factor = value.parse::<f64>()?.fract().abs();
    let mut hours = (factor * 86_400_000f64).round() as i64;
    let milliseconds = hours % 1_000; hours /= 1_000;
    let seconds = hours % 60; hours /= 60;
    let minutes = hours % 60; hours /= 60;
    let timestamp = if milliseconds > 0 {
        format!("{hours:02}:{minutes:02}:{seconds:02}.{milliseconds:03}")
    } else {
        format!("{hours:02}:{minutes:02}:{seconds:02}")
    };
    Ok(timestamp)
}

fn to_datetime_string(value: &str, is_1904: bool) -> Result<String, CandidateSheetError> {
    let date = to_date_string(value, is_1904)?;
    let time = to_time_string(value)?;
    Ok(format!("{date} {time}"))
}

/// Converts an ISO 8601 duration such as `PT13H30M00S` to `13:30:00`. Days fold into hours.
fn to_duration_string(value: &str) -> Result<String, CandidateSheetError> {
    let duration = value
        .parse::<IsoDuration>()
        .map_err(|_| SpreadsheetError::CellValueError(value.to_owned()))?;
    let hours = (duration.day * 24.0 + duration.hour) as u64;
    let minutes = duration.minute as u64;
    let seconds = duration.second.trunc() as u64;
    Ok(format!("{hours:02}:{minutes:02}:{seconds:02}"))
}
