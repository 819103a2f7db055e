//! Quarter version labels.
//!
//! Releases are identified by the latest quarter they cover. Labels show up in
//! three spellings: `2024 1st quarter` in spreadsheet headers and page text,
//! `2024Q1` in our own output, and `202401` in older exports. All of them parse
//! into [`Quarter`], which orders by year and then quarter number.

use regex::Regex;
use serde::{Deserialize, Deserializer, Serialize, Serializer};
use std::fmt;
use std::str::FromStr;
use std::sync::LazyLock;

use crate::error::QuarterParseError;

static RE_ANNOTATION: LazyLock<Regex> =
    LazyLock::new(|| Regex::new(r"\[[^\]]*\]").expect("valid regex"));

static RE_ORDINAL_EXACT: LazyLock<Regex> = LazyLock::new(|| {
    Regex::new(r"(?i)^(\d{4})\s+(\d{1,2})(?:st|nd|rd|th)\s+quarter$").expect("valid regex")
});
static RE_COMPACT_EXACT: LazyLock<Regex> =
    LazyLock::new(|| Regex::new(r"(?i)^(\d{4})\s*Q(\d)$").expect("valid regex"));
static RE_NUMERIC_EXACT: LazyLock<Regex> =
    LazyLock::new(|| Regex::new(r"^(\d{4})(\d{2})$").expect("valid regex"));

static RE_ORDINAL_SCAN: LazyLock<Regex> = LazyLock::new(|| {
    Regex::new(r"(?i)\b(\d{4})\s+(\d{1,2})(?:st|nd|rd|th)\s+quarter\b").expect("valid regex")
});
static RE_COMPACT_SCAN: LazyLock<Regex> =
    LazyLock::new(|| Regex::new(r"(?i)\b(\d{4})\s*Q(\d)\b").expect("valid regex"));
static RE_NUMERIC_SCAN: LazyLock<Regex> =
    LazyLock::new(|| Regex::new(r"\b(\d{4})(0[1-4])\b").expect("valid regex"));

/// How a version label is spelled.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum LabelFormat {
    /// `2024 1st quarter`
    #[default]
    Ordinal,
    /// `2024Q1`
    Compact,
    /// `202401`
    Numeric,
}

impl LabelFormat {
    fn exact(self) -> &'static Regex {
        match self {
            LabelFormat::Ordinal => &RE_ORDINAL_EXACT,
            LabelFormat::Compact => &RE_COMPACT_EXACT,
            LabelFormat::Numeric => &RE_NUMERIC_EXACT,
        }
    }

    fn scan(self) -> &'static Regex {
        match self {
            LabelFormat::Ordinal => &RE_ORDINAL_SCAN,
            LabelFormat::Compact => &RE_COMPACT_SCAN,
            LabelFormat::Numeric => &RE_NUMERIC_SCAN,
        }
    }
}

/// A calendar quarter. Ordering is chronological: year, then quarter number.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash)]
pub struct Quarter {
    year: u16,
    number: u8,
}

impl Quarter {
    /// Build a quarter; `number` must be 1 to 4.
    pub fn new(year: u16, number: u8) -> Result<Self, QuarterParseError> {
        if !(1..=4).contains(&number) || !(1000..=9999).contains(&year) {
            return Err(QuarterParseError {
                input: format!("{year} Q{number}"),
            });
        }
        Ok(Self { year, number })
    }

    pub fn year(&self) -> u16 {
        self.year
    }

    pub fn number(&self) -> u8 {
        self.number
    }

    /// Parse a label written in one specific format.
    pub fn parse(text: &str, format: LabelFormat) -> Result<Self, QuarterParseError> {
        let cleaned = clean_label(text);
        Self::from_captures(format.exact(), &cleaned).ok_or_else(|| QuarterParseError {
            input: text.to_string(),
        })
    }

    /// Parse a label in any known format.
    ///
    /// Bracketed annotations (`[note 1]`, `[provisional]`), line breaks and
    /// underscores are ignored.
    pub fn parse_any(text: &str) -> Result<Self, QuarterParseError> {
        let cleaned = clean_label(text);
        [LabelFormat::Ordinal, LabelFormat::Compact, LabelFormat::Numeric]
            .into_iter()
            .find_map(|format| Self::from_captures(format.exact(), &cleaned))
            .ok_or_else(|| QuarterParseError {
                input: text.to_string(),
            })
    }

    /// Every valid label of `format` that appears in free text, in order.
    pub fn find_all(text: &str, format: LabelFormat) -> Vec<Self> {
        let flattened = collapse_whitespace(text);
        format
            .scan()
            .captures_iter(&flattened)
            .filter_map(|caps| {
                let year = caps.get(1)?.as_str().parse().ok()?;
                let number = caps.get(2)?.as_str().parse().ok()?;
                Quarter::new(year, number).ok()
            })
            .collect()
    }

    /// Render in the given format.
    pub fn render(&self, format: LabelFormat) -> String {
        match format {
            LabelFormat::Ordinal => {
                let suffix = match self.number {
                    1 => "st",
                    2 => "nd",
                    3 => "rd",
                    _ => "th",
                };
                format!("{} {}{} quarter", self.year, self.number, suffix)
            }
            LabelFormat::Compact => format!("{}Q{}", self.year, self.number),
            LabelFormat::Numeric => format!("{}{:02}", self.year, self.number),
        }
    }

    fn from_captures(re: &Regex, text: &str) -> Option<Self> {
        let caps = re.captures(text)?;
        let year = caps.get(1)?.as_str().parse().ok()?;
        let number = caps.get(2)?.as_str().parse().ok()?;
        Quarter::new(year, number).ok()
    }
}

impl fmt::Display for Quarter {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.render(LabelFormat::Compact))
    }
}

impl FromStr for Quarter {
    type Err = QuarterParseError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        Quarter::parse_any(s)
    }
}

impl Serialize for Quarter {
    fn serialize<S: Serializer>(&self, serializer: S) -> Result<S::Ok, S::Error> {
        serializer.serialize_str(&self.to_string())
    }
}

impl<'de> Deserialize<'de> for Quarter {
    fn deserialize<D: Deserializer<'de>>(deserializer: D) -> Result<Self, D::Error> {
        let raw = String::deserialize(deserializer)?;
        Quarter::parse_any(&raw).map_err(serde::de::Error::custom)
    }
}

/// Strip annotations and normalise whitespace in a header or row label.
pub(crate) fn clean_label(text: &str) -> String {
    let without_notes = RE_ANNOTATION.replace_all(text, " ");
    collapse_whitespace(&without_notes.replace('_', " "))
}

fn collapse_whitespace(text: &str) -> String {
    text.split_whitespace().collect::<Vec<_>>().join(" ")
}
