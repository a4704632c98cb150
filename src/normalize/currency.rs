// src/normalize/currency.rs

use once_cell::sync::Lazy;
use regex::Regex;
use tracing::debug;

use super::{FieldParser, NormalizedValue, ParseOutcome, RawCell, WarningKind};

/// Currency marker: an uppercase ISO-style code, one of the symbol glyphs, or
/// the `Rp`/`Rp.`/`RM`/`S$` tokens (any case).
const MARKER: &str = r"(?:[A-Z]{3}|(?i:Rp\.?|RM|S\$)|[$€£¥₹₽₩฿])";

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum Sign {
    /// Accounting parentheses: the amount is negative no matter what.
    Negative,
    /// Negative when a minus sits right before or right after the marker.
    FromMinus,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum Separators {
    /// `1,234.56`
    CommaThousands,
    /// `1.234,56`
    DotThousands,
}

struct MoneyForm {
    label: &'static str,
    regex: Regex,
    sign: Sign,
    separators: Separators,
}

impl MoneyForm {
    fn new(label: &'static str, pattern: String, sign: Sign, separators: Separators) -> Self {
        Self {
            label,
            regex: Regex::new(&pattern).unwrap(),
            sign,
            separators,
        }
    }
}

/// Forms in the order they are tried; the first one that yields a number wins.
static FORMS: Lazy<Vec<MoneyForm>> = Lazy::new(|| {
    let comma_amount = r"(?P<amount>[\d,]+(?:\.\d+)?)";
    let dot_amount = r"(?P<amount>[\d.]+,\d{2})";
    vec![
        MoneyForm::new(
            "accounting",
            format!(r"^\({MARKER}?\s?{comma_amount}\)$"),
            Sign::Negative,
            Separators::CommaThousands,
        ),
        MoneyForm::new(
            "marker",
            format!(r"^(?P<pre>-)?{MARKER}\s?(?P<post>-)?{comma_amount}$"),
            Sign::FromMinus,
            Separators::CommaThousands,
        ),
        MoneyForm::new(
            "eu-accounting",
            format!(r"^\({MARKER}?\s?{dot_amount}\)$"),
            Sign::Negative,
            Separators::DotThousands,
        ),
        MoneyForm::new(
            "eu",
            format!(r"^(?P<pre>-)?{MARKER}?\s?(?P<post>-)?{dot_amount}$"),
            Sign::FromMinus,
            Separators::DotThousands,
        ),
        MoneyForm::new(
            "bare",
            r"^(?P<pre>-)?(?P<amount>[\d,]+\.\d{2})$".to_string(),
            Sign::FromMinus,
            Separators::CommaThousands,
        ),
    ]
});

/// Recognises monetary text and turns it into a signed amount rounded to cents.
#[derive(Debug, Clone, Copy, Default)]
pub struct CurrencyParser;

impl CurrencyParser {
    pub fn new() -> Self {
        Self
    }

    pub fn parse_text(&self, raw: &str) -> ParseOutcome<f64> {
        let text = raw.trim();
        let mut malformed: Option<String> = None;

        for form in FORMS.iter() {
            let Some(caps) = form.regex.captures(text) else {
                continue;
            };
            let amount = &caps["amount"];
            let normalized = match form.separators {
                Separators::CommaThousands => amount.replace(',', ""),
                Separators::DotThousands => amount.replace('.', "").replacen(',', ".", 1),
            };

            let magnitude = match normalized.parse::<f64>() {
                Ok(v) if v.is_finite() => v,
                Ok(_) => {
                    malformed.get_or_insert_with(|| {
                        format!("{} amount {:?} is out of range", form.label, amount)
                    });
                    continue;
                }
                Err(e) => {
                    malformed.get_or_insert_with(|| {
                        format!("{} amount {:?} unreadable: {}", form.label, amount, e)
                    });
                    continue;
                }
            };

            let negative = match form.sign {
                Sign::Negative => true,
                Sign::FromMinus => caps.name("pre").is_some() || caps.name("post").is_some(),
            };
            let value = apply_sign(round_cents(magnitude), negative);
            debug!(form = form.label, input = %text, value, "currency");
            return ParseOutcome::Parsed(value);
        }

        match malformed {
            Some(reason) => ParseOutcome::Malformed(reason),
            None => ParseOutcome::NotApplicable,
        }
    }
}

impl FieldParser for CurrencyParser {
    fn kind(&self) -> WarningKind {
        WarningKind::Currency
    }

    fn parse(&self, cell: &RawCell) -> ParseOutcome<NormalizedValue> {
        match cell {
            RawCell::String(s) => self.parse_text(s).map(NormalizedValue::Currency),
            _ => ParseOutcome::NotApplicable,
        }
    }
}

fn round_cents(magnitude: f64) -> f64 {
    (magnitude.abs() * 100.0).round() / 100.0
}

fn apply_sign(magnitude: f64, negative: bool) -> f64 {
    if negative && magnitude != 0.0 {
        -magnitude
    } else {
        magnitude
    }
}
