//! Column inference and summary statistics for uploaded spreadsheets.
//!
//! Nothing about the sheet layout is trusted: the time and temperature
//! columns are picked by scoring every column against a sample of leading
//! rows, and every cell is coerced loosely. Statistics always run over the
//! full row set; the sample bounds only the scoring work.

use crate::services::exposure::TempPoint;
use crate::utils::{format_utc, loose_f64};
use calamine::{open_workbook_auto_from_rs, Data, DataType, Range, Reader};
use chrono::{DateTime, NaiveDate, NaiveDateTime, Utc};
use core::fmt;
use std::error::Error;
use std::fmt::{Display, Formatter};
use std::io::Cursor;

/// How many leading data rows feed column scoring.
const SCORE_SAMPLE_ROWS: usize = 200;
/// Score granted when a header name hints at the column's role.
const HEADER_HINT_SCORE: f64 = 2.0;
/// Weight of the numeric-cell fraction in the temperature score.
const NUMERIC_RATIO_WEIGHT: f64 = 5.0;
/// A header containing any of these marks a time-like column. Substring
/// match on the lowercased header, so "timestamp" and "datetime" hit too.
const TIME_HEADER_HINTS: [&str; 2] = ["time", "date"];
const TEMP_HEADER_HINTS: [&str; 3] = ["temp", "degc", "celsius"];

/// Excel serial-day window (exclusive bounds) counted from the 1899-12-30
/// epoch, covering roughly 1954 through 2064.
const SERIAL_DATE_MIN: f64 = 20_000.0;
const SERIAL_DATE_MAX: f64 = 60_000.0;
/// Bare numbers above this read as Unix epoch seconds.
const EPOCH_SECONDS_MIN: f64 = 1_000_000_000.0;
/// Digit strings at least this long read as epoch milliseconds.
const EPOCH_MILLIS_DIGITS: usize = 13;
const DAY_SECONDS: f64 = 86_400.0;

const DATETIME_FORMATS: [&str; 5] = [
    "%Y-%m-%dT%H:%M:%S%.f",
    "%Y-%m-%d %H:%M:%S%.f",
    "%Y-%m-%dT%H:%M",
    "%Y-%m-%d %H:%M",
    "%m/%d/%Y %H:%M:%S",
];
const DATE_FORMATS: [&str; 2] = ["%Y-%m-%d", "%m/%d/%Y"];

#[derive(Debug)]
pub enum WorkbookError {
    /// The bytes do not open as a known spreadsheet container.
    Unreadable(String),
    /// The container opened but holds no worksheet.
    NoWorksheet,
}

impl Display for WorkbookError {
    fn fmt(&self, f: &mut Formatter<'_>) -> fmt::Result {
        match self {
            WorkbookError::Unreadable(s) => write!(
                f,
                "could not read the spreadsheet ({}); re-save the file as a standard .xlsx workbook and upload it again",
                s
            ),
            WorkbookError::NoWorksheet => write!(
                f,
                "the workbook contains no worksheets; re-save the file as a standard .xlsx workbook and upload it again"
            ),
        }
    }
}

impl Error for WorkbookError {}

/// What the engine remembers about an uploaded sheet. Statistics are `None`
/// whenever no cell supported them; they are never zero-filled.
#[derive(Debug, Clone, PartialEq)]
pub struct SheetSummary {
    pub row_count: usize,
    pub headers: Vec<String>,
    /// Header of the inferred time column; empty when the sheet has none.
    pub time_column: String,
    pub temp_column: String,
    pub time_start: Option<DateTime<Utc>>,
    pub time_end: Option<DateTime<Utc>>,
    pub temp_min: Option<f64>,
    pub temp_max: Option<f64>,
    pub temp_avg: Option<f64>,
    /// Temperature in the earliest-timestamped row, if that cell was numeric.
    pub temp_at_start: Option<f64>,
    pub temp_at_end: Option<f64>,
    /// Number of numeric temperature cells across the full row set.
    pub sample_count: usize,
}

impl SheetSummary {
    pub fn column_list(&self) -> String {
        let named: Vec<&str> =
            self.headers.iter().filter(|h| !h.is_empty()).map(String::as_str).collect();
        named.join(", ")
    }

    pub fn range_sentence(&self) -> String {
        match (self.time_start, self.time_end) {
            (Some(start), Some(end)) => {
                format!("spanning {} to {}", format_utc(start), format_utc(end))
            }
            _ => String::from("with no resolvable time range"),
        }
    }

    pub fn stats_sentence(&self) -> String {
        match (self.temp_min, self.temp_avg, self.temp_max) {
            (Some(min), Some(avg), Some(max)) => format!(
                "min {:.2} C, avg {:.2} C, max {:.2} C across {} numeric sample(s)",
                min, avg, max, self.sample_count
            ),
            _ => String::from("no numeric temperature samples"),
        }
    }

    pub fn endpoints_sentence(&self) -> String {
        match (self.temp_at_start, self.temp_at_end) {
            (Some(start), Some(end)) => {
                format!("{:.2} C at the start and {:.2} C at the end", start, end)
            }
            _ => String::from("start and end readings unresolved"),
        }
    }
}

/// Summary plus the resolved (timestamp, temperature) series for rows where
/// both cells resolved, ready for exposure analysis.
#[derive(Debug, Clone, PartialEq)]
pub struct SheetAnalysis {
    pub summary: SheetSummary,
    pub series: Vec<TempPoint>,
}

/// Read the first worksheet of an uploaded file and analyze it.
pub fn analyze(bytes: &[u8]) -> Result<SheetAnalysis, WorkbookError> {
    let mut sheets = open_workbook_auto_from_rs(Cursor::new(bytes))
        .map_err(|e| WorkbookError::Unreadable(e.to_string()))?;
    let range = sheets
        .worksheet_range_at(0)
        .ok_or(WorkbookError::NoWorksheet)?
        .map_err(|e| WorkbookError::Unreadable(e.to_string()))?;
    Ok(analyze_range(&range))
}

fn analyze_range(range: &Range<Data>) -> SheetAnalysis {
    let mut rows = range.rows();
    let headers: Vec<String> = match rows.next() {
        Some(row) => row.iter().map(header_text).collect(),
        None => Vec::new(),
    };
    let data_rows: Vec<&[Data]> = rows.collect();

    let sample: Vec<&[Data]> = data_rows.iter().take(SCORE_SAMPLE_ROWS).copied().collect();
    let time_idx = best_column(&headers, &sample, time_column_score);
    let temp_idx = best_column(&headers, &sample, temp_column_score);

    let mut sum = 0.0;
    let mut sample_count = 0usize;
    let mut temp_min = f64::INFINITY;
    let mut temp_max = f64::NEG_INFINITY;
    // earliest/latest resolved timestamp with that row's temperature; only a
    // strictly earlier/later timestamp replaces, so ties keep the first row
    let mut start: Option<(DateTime<Utc>, Option<f64>)> = None;
    let mut end: Option<(DateTime<Utc>, Option<f64>)> = None;
    let mut series = Vec::new();

    for row in &data_rows {
        let ts = time_idx.and_then(|i| row.get(i)).and_then(cell_timestamp);
        let temp = temp_idx.and_then(|i| row.get(i)).and_then(cell_number);

        if let Some(value) = temp {
            sum += value;
            sample_count += 1;
            temp_min = temp_min.min(value);
            temp_max = temp_max.max(value);
        }
        if let Some(at) = ts {
            match start {
                Some((existing, _)) if at >= existing => {}
                _ => start = Some((at, temp)),
            }
            match end {
                Some((existing, _)) if at <= existing => {}
                _ => end = Some((at, temp)),
            }
            if let Some(value) = temp {
                series.push(TempPoint { at, temp_c: value });
            }
        }
    }

    let summary = SheetSummary {
        row_count: data_rows.len(),
        time_column: time_idx.map(|i| headers[i].clone()).unwrap_or_default(),
        temp_column: temp_idx.map(|i| headers[i].clone()).unwrap_or_default(),
        headers,
        time_start: start.map(|(at, _)| at),
        time_end: end.map(|(at, _)| at),
        temp_min: (sample_count > 0).then_some(temp_min),
        temp_max: (sample_count > 0).then_some(temp_max),
        temp_avg: (sample_count > 0).then(|| sum / sample_count as f64),
        temp_at_start: start.and_then(|(_, temp)| temp),
        temp_at_end: end.and_then(|(_, temp)| temp),
        sample_count,
    };
    SheetAnalysis { summary, series }
}

/// Argmax over columns with strict improvement only, so an earlier column
/// wins any tie.
fn best_column(
    headers: &[String],
    sample: &[&[Data]],
    score: impl Fn(&str, &[&Data]) -> f64,
) -> Option<usize> {
    let mut best: Option<(usize, f64)> = None;
    for (idx, header) in headers.iter().enumerate() {
        let cells: Vec<&Data> = sample.iter().filter_map(|row| row.get(idx)).collect();
        let s = score(header, &cells);
        match best {
            Some((_, current)) if s <= current => {}
            _ => best = Some((idx, s)),
        }
    }
    best.map(|(idx, _)| idx)
}

fn header_matches(header: &str, hints: &[&str]) -> bool {
    let lower = header.to_lowercase();
    hints.iter().any(|hint| lower.contains(hint))
}

fn time_column_score(header: &str, cells: &[&Data]) -> f64 {
    let mut score =
        if header_matches(header, &TIME_HEADER_HINTS) { HEADER_HINT_SCORE } else { 0.0 };
    score += cells.iter().filter(|cell| cell_timestamp(cell).is_some()).count() as f64;
    score
}

fn temp_column_score(header: &str, cells: &[&Data]) -> f64 {
    let mut score =
        if header_matches(header, &TEMP_HEADER_HINTS) { HEADER_HINT_SCORE } else { 0.0 };
    if !cells.is_empty() {
        let numeric = cells.iter().filter(|cell| cell_number(cell).is_some()).count();
        score += numeric as f64 / cells.len() as f64 * NUMERIC_RATIO_WEIGHT;
    }
    score
}

fn header_text(cell: &Data) -> String {
    cell.to_string().trim().to_string()
}

/// Loose numeric coercion: native numbers pass through, strings parse after
/// trimming, everything else (bools, dates, errors, blanks) is non-numeric.
fn cell_number(cell: &Data) -> Option<f64> {
    let value = match cell {
        Data::Int(i) => Some(*i as f64),
        Data::Float(f) => Some(*f),
        Data::String(s) => loose_f64(s),
        _ => None,
    };
    value.filter(|v| v.is_finite())
}

/// Coerce a cell into a UTC timestamp, trying in order: native spreadsheet
/// datetimes, numeric epoch/serial heuristics, then calendar-text formats.
fn cell_timestamp(cell: &Data) -> Option<DateTime<Utc>> {
    match cell {
        Data::DateTime(_) | Data::DateTimeIso(_) => {
            cell.as_datetime().map(|naive| naive.and_utc())
        }
        Data::Int(i) => numeric_timestamp(*i as f64),
        Data::Float(f) => numeric_timestamp(*f),
        Data::String(s) => string_timestamp(s),
        _ => None,
    }
}

fn numeric_timestamp(value: f64) -> Option<DateTime<Utc>> {
    if !value.is_finite() {
        return None;
    }
    if value > EPOCH_SECONDS_MIN {
        return DateTime::from_timestamp(value.trunc() as i64, 0);
    }
    if value > SERIAL_DATE_MIN && value < SERIAL_DATE_MAX {
        return serial_timestamp(value);
    }
    None
}

fn serial_timestamp(serial: f64) -> Option<DateTime<Utc>> {
    let epoch = NaiveDate::from_ymd_opt(1899, 12, 30)?.and_hms_opt(0, 0, 0)?.and_utc();
    let seconds = (serial * DAY_SECONDS).round() as i64;
    epoch.checked_add_signed(chrono::Duration::seconds(seconds))
}

fn string_timestamp(text: &str) -> Option<DateTime<Utc>> {
    let s = text.trim();
    if s.is_empty() {
        return None;
    }
    if s.chars().all(|c| c.is_ascii_digit()) {
        let n = loose_f64(s)?;
        if s.len() >= EPOCH_MILLIS_DIGITS {
            return DateTime::from_timestamp_millis(n as i64);
        }
        return numeric_timestamp(n);
    }
    if let Ok(dt) = DateTime::parse_from_rfc3339(s) {
        return Some(dt.with_timezone(&Utc));
    }
    for fmt in DATETIME_FORMATS {
        if let Ok(naive) = NaiveDateTime::parse_from_str(s, fmt) {
            return Some(naive.and_utc());
        }
    }
    for fmt in DATE_FORMATS {
        if let Ok(date) = NaiveDate::parse_from_str(s, fmt) {
            return date.and_hms_opt(0, 0, 0).map(|naive| naive.and_utc());
        }
    }
    None
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::TimeZone;

    fn s(text: &str) -> Data {
        Data::String(text.to_string())
    }

    fn grid(rows: Vec<Vec<Data>>) -> Range<Data> {
        let height = rows.len() as u32;
        let width = rows.iter().map(Vec::len).max().unwrap_or(0) as u32;
        let mut range = Range::new((0, 0), (height.saturating_sub(1), width.saturating_sub(1)));
        for (r, row) in rows.into_iter().enumerate() {
            for (c, cell) in row.into_iter().enumerate() {
                range.set_value((r as u32, c as u32), cell);
            }
        }
        range
    }

    #[test]
    fn iso_string_sheet_summarises() {
        let range = grid(vec![
            vec![s("Time"), s("Temp(C)")],
            vec![s("2024-01-01T00:00:00"), Data::Float(2.0)],
            vec![s("2024-01-01T06:00:00"), Data::Float(8.0)],
        ]);
        let analysis = analyze_range(&range);
        let summary = &analysis.summary;

        assert_eq!(summary.row_count, 2);
        assert_eq!(summary.time_column, "Time");
        assert_eq!(summary.temp_column, "Temp(C)");
        assert_eq!(summary.temp_min, Some(2.0));
        assert_eq!(summary.temp_max, Some(8.0));
        assert_eq!(summary.temp_avg, Some(5.0));
        assert_eq!(summary.temp_at_start, Some(2.0));
        assert_eq!(summary.temp_at_end, Some(8.0));
        assert_eq!(summary.sample_count, 2);
        assert_eq!(
            summary.time_start,
            Some(Utc.with_ymd_and_hms(2024, 1, 1, 0, 0, 0).unwrap())
        );
        assert_eq!(analysis.series.len(), 2);
    }

    #[test]
    fn numeric_timestamp_heuristics() {
        // 45000 days from 1899-12-30 lands in 2023
        let serial = numeric_timestamp(45_000.25).unwrap();
        assert_eq!(serial.format("%Y-%m-%d %H:%M").to_string(), "2023-03-15 06:00");
        let epoch = numeric_timestamp(1_700_000_000.0).unwrap();
        assert_eq!(epoch.timestamp(), 1_700_000_000);
        // outside both windows: plain numbers, not dates
        assert!(numeric_timestamp(19_000.0).is_none());
        assert!(numeric_timestamp(60_001.0).is_none());
        assert!(numeric_timestamp(20_000.0).is_none());
    }

    #[test]
    fn string_timestamps_cover_common_notations() {
        assert!(string_timestamp("2024-01-01T10:30:00Z").is_some());
        assert!(string_timestamp("2024-01-01 10:30:00").is_some());
        assert!(string_timestamp("2024-01-01 10:30").is_some());
        assert!(string_timestamp("2024-01-01").is_some());
        assert_eq!(string_timestamp("1700000000").unwrap().timestamp(), 1_700_000_000);
        assert_eq!(string_timestamp("1700000000000").unwrap().timestamp(), 1_700_000_000);
        assert!(string_timestamp("not a date").is_none());
        assert!(string_timestamp("").is_none());
    }

    #[test]
    fn header_hint_beats_unparseable_cells() {
        let range = grid(vec![
            vec![s("timestamp"), s("reading")],
            vec![s("??"), Data::Float(4.0)],
            vec![s("??"), Data::Float(5.0)],
        ]);
        let summary = analyze_range(&range).summary;
        assert_eq!(summary.time_column, "timestamp");
        assert_eq!(summary.temp_column, "reading");
        assert_eq!(summary.time_start, None);
        assert_eq!(summary.sample_count, 2);
    }

    #[test]
    fn tied_columns_resolve_leftmost() {
        let range = grid(vec![
            vec![s("a"), s("b")],
            vec![Data::Float(1.0), Data::Float(1.0)],
        ]);
        let summary = analyze_range(&range).summary;
        assert_eq!(summary.temp_column, "a");
        assert_eq!(summary.time_column, "a");
    }

    #[test]
    fn stats_run_past_the_scoring_sample() {
        let mut rows = vec![vec![s("when"), s("temp")]];
        for i in 0..250 {
            let temp = if i == 249 { 40.0 } else { 5.0 };
            rows.push(vec![s(&format!("2024-01-01 {:02}:{:02}", i / 60, i % 60)), Data::Float(temp)]);
        }
        let summary = analyze_range(&grid(rows)).summary;
        assert_eq!(summary.row_count, 250);
        assert_eq!(summary.sample_count, 250);
        // the hot reading sits beyond the 200-row sample but still counts
        assert_eq!(summary.temp_max, Some(40.0));
    }

    #[test]
    fn zero_data_rows_is_not_an_error() {
        let range = grid(vec![vec![s("Time"), s("Temp")]]);
        let analysis = analyze_range(&range);
        let summary = &analysis.summary;
        assert_eq!(summary.row_count, 0);
        assert_eq!(summary.headers, vec!["Time", "Temp"]);
        assert_eq!(summary.temp_min, None);
        assert_eq!(summary.temp_avg, None);
        assert_eq!(summary.time_start, None);
        assert_eq!(summary.sample_count, 0);
        assert!(analysis.series.is_empty());
    }

    #[test]
    fn textual_temperature_column_leaves_stats_unset() {
        let range = grid(vec![
            vec![s("date"), s("temp")],
            vec![s("2024-01-01"), s("warm")],
            vec![s("2024-01-02"), s("cold")],
        ]);
        let summary = analyze_range(&range).summary;
        assert_eq!(summary.sample_count, 0);
        assert_eq!(summary.temp_min, None);
        assert_eq!(summary.temp_avg, None);
        assert_eq!(summary.temp_max, None);
        assert_eq!(summary.stats_sentence(), "no numeric temperature samples");
        // timestamps still resolved independently of temperatures
        assert!(summary.time_start.is_some());
        assert_eq!(summary.temp_at_start, None);
    }

    #[test]
    fn timestamp_ties_keep_first_row() {
        let range = grid(vec![
            vec![s("time"), s("temp")],
            vec![s("2024-01-01 00:00"), Data::Float(1.0)],
            vec![s("2024-01-01 00:00"), Data::Float(2.0)],
        ]);
        let summary = analyze_range(&range).summary;
        assert_eq!(summary.temp_at_start, Some(1.0));
        assert_eq!(summary.temp_at_end, Some(1.0));
    }

    #[test]
    fn blank_headers_become_empty_strings() {
        let range = grid(vec![
            vec![s("time"), Data::Empty, s("temp")],
            vec![s("2024-01-01"), s("x"), Data::Float(3.0)],
        ]);
        let summary = analyze_range(&range).summary;
        assert_eq!(summary.headers, vec!["time", "", "temp"]);
        assert_eq!(summary.column_list(), "time, temp");
    }

    #[test]
    fn garbage_bytes_report_remediation() {
        let err = analyze(b"definitely not a workbook").unwrap_err();
        let message = err.to_string();
        assert!(message.contains("re-save"), "got: {}", message);
    }

    #[test]
    fn xlsx_fixture_round_trip() {
        let bytes = std::fs::read("tests/data/cold-chain-readings.xlsx")
            .expect("fixture tests/data/cold-chain-readings.xlsx");
        let analysis = analyze(&bytes).expect("fixture should parse");
        let summary = &analysis.summary;
        assert_eq!(summary.row_count, 6);
        assert_eq!(summary.time_column, "Timestamp");
        assert_eq!(summary.temp_column, "Temperature C");
        assert_eq!(summary.sample_count, 6);
        assert_eq!(summary.temp_min, Some(2.5));
        assert_eq!(summary.temp_max, Some(9.8));
        assert!(summary.time_start.is_some());
        assert!(summary.time_end.is_some());
        assert_eq!(analysis.series.len(), 6);
    }
}
