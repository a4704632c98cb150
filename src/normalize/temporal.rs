// src/normalize/temporal.rs

use chrono::{DateTime, Duration, NaiveDate, NaiveDateTime, NaiveTime, Timelike};
use once_cell::sync::Lazy;
use regex::{Captures, Regex};
use tracing::debug;

use super::{FieldParser, NormalizedValue, ParseOutcome, RawCell, WarningKind};

/// Serials strictly inside this range are read as spreadsheet dates
/// (1900-01-01 through 9999-12-31).
const SERIAL_LOWER: f64 = 1.0;
const SERIAL_UPPER: f64 = 2_958_466.0;
const MILLIS_PER_DAY: f64 = 86_400_000.0;

const CANONICAL_DATE: &str = "%Y-%m-%d";
const CANONICAL_DATETIME: &str = "%Y-%m-%d %H:%M:%S";

static NAMED_MONTH: Lazy<Regex> = Lazy::new(|| {
    Regex::new(r"(?i)^(\d{1,2})\s+(\w+)\s+(\d{4})(?:\s+(\d{1,2}):(\d{1,2})(?::(\d{1,2}))?)?$")
        .unwrap()
});
static TIME_ONLY: Lazy<Regex> =
    Lazy::new(|| Regex::new(r"^(\d{1,2}):(\d{1,2})(?::(\d{1,2}))?$").unwrap());
static TIME_PART: Lazy<Regex> =
    Lazy::new(|| Regex::new(r"(\d{1,2}):(\d{1,2})(?::(\d{1,2}))?").unwrap());
static DATE_PARTS: Lazy<Regex> =
    Lazy::new(|| Regex::new(r"^(\d{1,4})[/.\-](\d{1,2})[/.\-](\d{1,4})").unwrap());
static DATETIME_PATTERNS: Lazy<Vec<Regex>> = Lazy::new(|| numeric_patterns(true));
static DATE_PATTERNS: Lazy<Vec<Regex>> = Lazy::new(|| numeric_patterns(false));

/// Year-first and year-last layouts for each separator. Datetime patterns only
/// anchor the start, so trailing fractions or zone suffixes still classify.
fn numeric_patterns(with_time: bool) -> Vec<Regex> {
    let tail = if with_time {
        r"\s+\d{1,2}:\d{1,2}(?::\d{1,2})?"
    } else {
        "$"
    };
    let mut patterns = Vec::with_capacity(9);
    for sep in [r"/", r"-", r"\."] {
        patterns.push(format!(r"^\d{{4}}{sep}\d{{1,2}}{sep}\d{{1,2}}{tail}"));
        patterns.push(format!(r"^\d{{1,2}}{sep}\d{{1,2}}{sep}\d{{4}}{tail}"));
        patterns.push(format!(r"^\d{{1,2}}{sep}\d{{1,2}}{sep}\d{{2}}{tail}"));
    }
    patterns.iter().map(|p| Regex::new(p).unwrap()).collect()
}

/// Last-resort layouts tried when the structured rules reject a value.
const GENERIC_DATETIME_FORMATS: &[&str] = &[
    "%Y-%m-%dT%H:%M:%S%.f",
    "%Y-%m-%d %H:%M:%S%.f",
    "%Y/%m/%d %H:%M:%S",
    "%d %B %Y %H:%M:%S",
    "%B %d, %Y %H:%M:%S",
];
const GENERIC_DATE_FORMATS: &[&str] = &[
    "%Y-%m-%d", "%Y/%m/%d", "%d %B %Y", "%d %b %Y", "%B %d, %Y", "%b %d, %Y", "%b %d %Y",
];

/// How much of a calendar value a cell carries.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Granularity {
    Date,
    Time,
    DateTime,
}

/// Tie-break for `a/b/year` values where both `a` and `b` could be a month.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum DayMonthOrder {
    #[default]
    MonthFirst,
    DayFirst,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct TemporalOptions {
    /// Year used to place two-digit years into a century.
    pub reference_year: i32,
    pub order: DayMonthOrder,
    /// Read plain numbers in the serial range as spreadsheet dates.
    pub numeric_serials: bool,
}

impl TemporalOptions {
    pub fn new(reference_year: i32) -> Self {
        Self {
            reference_year,
            order: DayMonthOrder::default(),
            numeric_serials: true,
        }
    }

    pub fn with_order(mut self, order: DayMonthOrder) -> Self {
        self.order = order;
        self
    }

    pub fn with_numeric_serials(mut self, enabled: bool) -> Self {
        self.numeric_serials = enabled;
        self
    }
}

/// Month names accepted in `01 Agu 2025` style values.
pub fn month_number(name: &str) -> Option<u32> {
    let month = match name.to_lowercase().as_str() {
        "jan" | "januari" => 1,
        "feb" | "februari" => 2,
        "mar" | "maret" => 3,
        "apr" | "april" => 4,
        "mei" | "may" => 5,
        "jun" | "juni" => 6,
        "jul" | "juli" => 7,
        "agu" | "agustus" => 8,
        "sep" | "september" => 9,
        "okt" | "oktober" => 10,
        "nov" | "november" => 11,
        "des" | "desember" | "dec" => 12,
        _ => return None,
    };
    Some(month)
}

pub fn is_serial(value: f64) -> bool {
    value > SERIAL_LOWER && value < SERIAL_UPPER
}

/// Spreadsheet serial → wall-clock instant, counted from 1899-12-30.
pub fn serial_to_datetime(serial: f64) -> Option<NaiveDateTime> {
    if !serial.is_finite() {
        return None;
    }
    let epoch = NaiveDate::from_ymd_opt(1899, 12, 30)?.and_hms_opt(0, 0, 0)?;
    let millis = (serial * MILLIS_PER_DAY).round() as i64;
    epoch.checked_add_signed(Duration::milliseconds(millis))
}

/// Place a two-digit year in the reference year's century, or the one before
/// when it would land in the future.
pub fn expand_two_digit_year(two_digit: i32, reference_year: i32) -> i32 {
    let century = reference_year.div_euclid(100) * 100;
    let within_century = reference_year.rem_euclid(100);
    if two_digit <= within_century {
        century + two_digit
    } else {
        century - 100 + two_digit
    }
}

/// Classify text without parsing it.
pub fn classify_text(raw: &str) -> Option<Granularity> {
    let text = raw.trim();
    if let Some(caps) = NAMED_MONTH.captures(text) {
        return Some(if caps.get(4).is_some() {
            Granularity::DateTime
        } else {
            Granularity::Date
        });
    }
    if TIME_ONLY.is_match(text) {
        return Some(Granularity::Time);
    }
    if DATETIME_PATTERNS.iter().any(|re| re.is_match(text)) {
        return Some(Granularity::DateTime);
    }
    if DATE_PATTERNS.iter().any(|re| re.is_match(text)) {
        return Some(Granularity::Date);
    }
    None
}

pub fn format_temporal(value: NaiveDateTime, granularity: Granularity) -> String {
    match granularity {
        Granularity::Time => value.format("%H:%M:%S").to_string(),
        Granularity::Date if value.time() == NaiveTime::MIN => {
            value.format(CANONICAL_DATE).to_string()
        }
        Granularity::Date | Granularity::DateTime => value.format(CANONICAL_DATETIME).to_string(),
    }
}

/// Detects date, time and datetime values and rewrites them canonically.
#[derive(Debug, Clone, Copy)]
pub struct TemporalParser {
    options: TemporalOptions,
}

impl TemporalParser {
    pub fn new(options: TemporalOptions) -> Self {
        Self { options }
    }

    pub fn options(&self) -> &TemporalOptions {
        &self.options
    }

    pub fn classify(&self, cell: &RawCell) -> Option<Granularity> {
        match cell {
            RawCell::Number(v) if self.options.numeric_serials && is_serial(*v) => {
                Some(Granularity::DateTime)
            }
            RawCell::Instant(_) => Some(Granularity::DateTime),
            RawCell::String(s) => classify_text(s),
            _ => None,
        }
    }

    pub fn parse_cell(&self, cell: &RawCell) -> ParseOutcome<String> {
        match cell {
            RawCell::Number(v) if self.options.numeric_serials && is_serial(*v) => {
                match serial_to_datetime(*v) {
                    Some(dt) => ParseOutcome::Parsed(format_temporal(dt, Granularity::DateTime)),
                    None => ParseOutcome::Malformed(format!("serial {} is out of range", v)),
                }
            }
            RawCell::Instant(dt) => ParseOutcome::Parsed(format_temporal(*dt, Granularity::DateTime)),
            RawCell::String(s) => self.parse_text(s),
            _ => ParseOutcome::NotApplicable,
        }
    }

    pub fn parse_text(&self, raw: &str) -> ParseOutcome<String> {
        let text = raw.trim();
        let Some(granularity) = classify_text(text) else {
            return ParseOutcome::NotApplicable;
        };

        if granularity == Granularity::Time {
            return match TIME_ONLY.captures(text) {
                Some(caps) => ParseOutcome::Parsed(format_clock(&caps)),
                None => ParseOutcome::Malformed("time components missing".into()),
            };
        }

        let structured = match NAMED_MONTH.captures(text) {
            Some(caps) => parse_named_month(&caps),
            None => self.parse_numeric(text),
        };

        match structured {
            Ok(dt) => {
                let out = format_temporal(dt, granularity);
                debug!(input = %text, output = %out, ?granularity, "temporal");
                ParseOutcome::Parsed(out)
            }
            // An unknown month name is final: the value is left as it was.
            Err(StructuredError::UnknownMonth(name)) => {
                ParseOutcome::Malformed(format!("unknown month name {:?}", name))
            }
            Err(StructuredError::Invalid(reason)) => match parse_generic(text) {
                Some(dt) => ParseOutcome::Parsed(format_temporal(dt, granularity)),
                None => ParseOutcome::Malformed(reason),
            },
        }
    }

    /// `a<sep>b<sep>c` with an optional trailing clock.
    fn parse_numeric(&self, text: &str) -> Result<NaiveDateTime, StructuredError> {
        let caps = DATE_PARTS
            .captures(text)
            .ok_or_else(|| StructuredError::Invalid("no numeric date components".into()))?;
        let (first, second, third) = (&caps[1], &caps[2], &caps[3]);

        let (year, month, day) = if first.len() == 4 {
            let year = parse_component(first)? as i32;
            let (a, b) = (parse_component(second)?, parse_component(third)?);
            if a > 12 && b <= 12 {
                (year, b, a)
            } else {
                (year, a, b)
            }
        } else {
            let mut year = parse_component(third)? as i32;
            if year < 100 {
                year = expand_two_digit_year(year, self.options.reference_year);
            }
            let (a, b) = (parse_component(first)?, parse_component(second)?);
            let (month, day) = if a > 12 {
                (b, a)
            } else if b > 12 {
                (a, b)
            } else {
                match self.options.order {
                    DayMonthOrder::MonthFirst => (a, b),
                    DayMonthOrder::DayFirst => (b, a),
                }
            };
            (year, month, day)
        };

        let date = NaiveDate::from_ymd_opt(year, month, day).ok_or_else(|| {
            StructuredError::Invalid(format!(
                "{:04}-{:02}-{:02} is not a calendar date",
                year, month, day
            ))
        })?;

        let rest = &text[caps.get(0).map_or(0, |m| m.end())..];
        let time = match TIME_PART.captures(rest) {
            Some(t) => clock(&t, 1)?,
            None => NaiveTime::MIN,
        };
        Ok(date.and_time(time))
    }
}

impl FieldParser for TemporalParser {
    fn kind(&self) -> WarningKind {
        WarningKind::Temporal
    }

    fn parse(&self, cell: &RawCell) -> ParseOutcome<NormalizedValue> {
        self.parse_cell(cell).map(NormalizedValue::Temporal)
    }
}

#[derive(Debug)]
enum StructuredError {
    UnknownMonth(String),
    Invalid(String),
}

fn parse_component(s: &str) -> Result<u32, StructuredError> {
    s.parse::<u32>()
        .map_err(|e| StructuredError::Invalid(format!("component {:?}: {}", s, e)))
}

fn parse_named_month(caps: &Captures) -> Result<NaiveDateTime, StructuredError> {
    let name = &caps[2];
    let month = month_number(name).ok_or_else(|| StructuredError::UnknownMonth(name.into()))?;
    let day = parse_component(&caps[1])?;
    let year = parse_component(&caps[3])? as i32;
    let date = NaiveDate::from_ymd_opt(year, month, day).ok_or_else(|| {
        StructuredError::Invalid(format!("day {} does not exist in {} {}", day, name, year))
    })?;
    let time = if caps.get(4).is_some() {
        clock(caps, 4)?
    } else {
        NaiveTime::MIN
    };
    Ok(date.and_time(time))
}

/// Hour, minute and optional second starting at capture group `first`.
fn clock(caps: &Captures, first: usize) -> Result<NaiveTime, StructuredError> {
    let hour = parse_component(&caps[first])?;
    let minute = parse_component(&caps[first + 1])?;
    let second = match caps.get(first + 2) {
        Some(m) => parse_component(m.as_str())?,
        None => 0,
    };
    NaiveTime::from_hms_opt(hour, minute, second).ok_or_else(|| {
        StructuredError::Invalid(format!(
            "{:02}:{:02}:{:02} is not a time of day",
            hour, minute, second
        ))
    })
}

/// Bare clock values are padded but not range-checked.
fn format_clock(caps: &Captures) -> String {
    let part = |i: usize| caps.get(i).map_or(0, |m| m.as_str().parse::<u32>().unwrap_or(0));
    format!("{:02}:{:02}:{:02}", part(1), part(2), part(3))
}

fn parse_generic(text: &str) -> Option<NaiveDateTime> {
    if let Ok(dt) = DateTime::parse_from_rfc3339(text) {
        return Some(dt.naive_local().with_nanosecond(0)?);
    }
    if let Ok(dt) = DateTime::parse_from_rfc2822(text) {
        return Some(dt.naive_local());
    }
    GENERIC_DATETIME_FORMATS
        .iter()
        .find_map(|fmt| NaiveDateTime::parse_from_str(text, fmt).ok())
        .or_else(|| {
            GENERIC_DATE_FORMATS
                .iter()
                .find_map(|fmt| NaiveDate::parse_from_str(text, fmt).ok())
                .map(|d| d.and_time(NaiveTime::MIN))
        })
}

#[cfg(test)]
mod tests {
    use super::*;

    fn parser(reference_year: i32) -> TemporalParser {
        TemporalParser::new(TemporalOptions::new(reference_year))
    }

    fn text(p: &TemporalParser, input: &str) -> String {
        match p.parse_text(input) {
            ParseOutcome::Parsed(s) => s,
            other => panic!("{:?} was not parsed: {:?}", input, other),
        }
    }

    #[test]
    fn test_classification_order() {
        assert_eq!(classify_text("01 Agu 2025 23:51"), Some(Granularity::DateTime));
        assert_eq!(classify_text("01 Agu 2025"), Some(Granularity::Date));
        assert_eq!(classify_text("23:51"), Some(Granularity::Time));
        assert_eq!(classify_text("23:51:30"), Some(Granularity::Time));
        assert_eq!(classify_text("2025-01-15 14:30"), Some(Granularity::DateTime));
        assert_eq!(classify_text("01/15/25 9:05"), Some(Granularity::DateTime));
        assert_eq!(classify_text("15.01.2025"), Some(Granularity::Date));
        assert_eq!(classify_text("2025/01/15"), Some(Granularity::Date));
        assert_eq!(classify_text("01-15-25"), Some(Granularity::Date));
        assert_eq!(classify_text("2025-01-15T14:30:00"), None);
        assert_eq!(classify_text("Invoice 42"), None);
        assert_eq!(classify_text("1/2/345"), None);
    }

    #[test]
    fn test_two_digit_years_follow_reference_year() {
        let p = parser(2025);
        assert_eq!(text(&p, "01/15/25"), "2025-01-15");
        assert_eq!(text(&p, "15/01/25"), "2025-01-15");
        assert_eq!(text(&p, "01/15/95"), "1995-01-15");
        assert_eq!(text(&p, "01-15-25"), "2025-01-15");
        assert_eq!(text(&p, "15.01.25"), "2025-01-15");
        assert_eq!(text(&p, "01/15/26"), "1926-01-15");
        assert_eq!(text(&p, "01/15/00"), "2000-01-15");
        // padded four-digit years below 100 expand too
        assert_eq!(text(&p, "01/15/0025"), "2025-01-15");
        assert_eq!(text(&p, "15.01.0095"), "1995-01-15");
    }

    #[test]
    fn test_expand_two_digit_year_boundaries() {
        assert_eq!(expand_two_digit_year(25, 2025), 2025);
        assert_eq!(expand_two_digit_year(24, 2025), 2024);
        assert_eq!(expand_two_digit_year(26, 2025), 1926);
        assert_eq!(expand_two_digit_year(0, 2025), 2000);
        assert_eq!(expand_two_digit_year(99, 2100), 2099);
        assert_eq!(expand_two_digit_year(0, 2100), 2100);
    }

    #[test]
    fn test_ambiguous_dates_use_configured_order() {
        let month_first = parser(2025);
        assert_eq!(text(&month_first, "01/02/2025"), "2025-01-02");

        let day_first =
            TemporalParser::new(TemporalOptions::new(2025).with_order(DayMonthOrder::DayFirst));
        assert_eq!(text(&day_first, "01/02/2025"), "2025-02-01");
        // unambiguous values ignore the strategy
        assert_eq!(text(&day_first, "01/15/2025"), "2025-01-15");
        assert_eq!(text(&day_first, "15/01/2025"), "2025-01-15");
    }

    #[test]
    fn test_datetime_output_is_zero_padded() {
        let p = parser(2025);
        assert_eq!(text(&p, "1/5/2025 7:04"), "2025-01-05 07:04:00");
        assert_eq!(text(&p, "2025-01-15 14:30:05"), "2025-01-15 14:30:05");
        assert_eq!(text(&p, "01 Agu 2025 23:51"), "2025-08-01 23:51:00");
        assert_eq!(text(&p, "17 Desember 2024"), "2024-12-17");
        assert_eq!(text(&p, "3 may 2025 1:2:3"), "2025-05-03 01:02:03");
        assert_eq!(text(&p, "9:5"), "09:05:00");
    }

    #[test]
    fn test_canonical_values_are_unchanged() {
        let p = parser(2025);
        for canonical in ["2025-01-15", "2025-01-15 14:30:00", "23:51:00", "1999-12-31 00:00:00"] {
            assert_eq!(text(&p, canonical), canonical);
        }
    }

    #[test]
    fn test_invalid_calendar_values_are_malformed() {
        let p = parser(2025);
        assert!(matches!(p.parse_text("13/14/2025"), ParseOutcome::Malformed(_)));
        assert!(matches!(p.parse_text("2025-02-30"), ParseOutcome::Malformed(_)));
        assert!(matches!(p.parse_text("01/15/2025 25:00"), ParseOutcome::Malformed(_)));
        assert!(matches!(p.parse_text("01 Foo 2025"), ParseOutcome::Malformed(_)));
        assert_eq!(p.parse_text("not a date"), ParseOutcome::NotApplicable);
    }

    #[test]
    fn test_serials_convert_to_datetimes() {
        let p = parser(2025);
        assert_eq!(
            p.parse_cell(&RawCell::Number(45672.0)),
            ParseOutcome::Parsed("2025-01-15 00:00:00".into())
        );
        assert_eq!(
            p.parse_cell(&RawCell::Number(45672.5)),
            ParseOutcome::Parsed("2025-01-15 12:00:00".into())
        );
        assert_eq!(p.parse_cell(&RawCell::Number(1.0)), ParseOutcome::NotApplicable);
        assert_eq!(p.parse_cell(&RawCell::Number(2_958_466.0)), ParseOutcome::NotApplicable);

        let off = TemporalParser::new(TemporalOptions::new(2025).with_numeric_serials(false));
        assert_eq!(off.parse_cell(&RawCell::Number(45672.0)), ParseOutcome::NotApplicable);
    }

    #[test]
    fn test_serial_round_trip_through_canonical_text() {
        let p = parser(2025);
        for serial in [2.0, 60.0, 61.0, 25569.0, 36526.0, 45672.0, 2_958_465.0] {
            let ParseOutcome::Parsed(out) = p.parse_cell(&RawCell::Number(serial)) else {
                panic!("serial {} not parsed", serial);
            };
            let reparsed = NaiveDateTime::parse_from_str(&out, CANONICAL_DATETIME).unwrap();
            let expected = serial_to_datetime(serial).unwrap();
            assert_eq!(reparsed.date(), expected.date(), "serial {}", serial);
        }
    }

    #[test]
    fn test_classify_cells() {
        let p = parser(2025);
        assert_eq!(p.classify(&RawCell::Number(45672.0)), Some(Granularity::DateTime));
        assert_eq!(p.classify(&RawCell::Number(0.5)), None);
        assert_eq!(p.classify(&RawCell::Bool(true)), None);
        assert_eq!(p.classify(&RawCell::String("12:30".into())), Some(Granularity::Time));
        assert_eq!(p.options().reference_year, 2025);
    }

    #[test]
    fn test_instants_format_as_datetime() {
        let p = parser(2025);
        let dt = NaiveDate::from_ymd_opt(2024, 2, 29)
            .unwrap()
            .and_hms_opt(0, 0, 0)
            .unwrap();
        assert_eq!(
            p.parse_cell(&RawCell::Instant(dt)),
            ParseOutcome::Parsed("2024-02-29 00:00:00".into())
        );
    }

    #[test]
    fn test_format_date_keeps_nonzero_time() {
        let dt = NaiveDate::from_ymd_opt(2025, 1, 15)
            .unwrap()
            .and_hms_opt(8, 0, 0)
            .unwrap();
        assert_eq!(format_temporal(dt, Granularity::Date), "2025-01-15 08:00:00");
        assert_eq!(
            format_temporal(dt.date().and_time(NaiveTime::MIN), Granularity::Date),
            "2025-01-15"
        );
    }
}
