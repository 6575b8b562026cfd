use std::ops::Range;
use std::sync::LazyLock;

use regex::{Match, Regex};
use thiserror::Error;

use crate::failure::FailureKind;

static NUMBER_RE: LazyLock<Regex> =
    LazyLock::new(|| Regex::new(r"[-+]?[0-9]*\.?[0-9]+").expect("valid number regex"));
static FLAG_RE: LazyLock<Regex> =
    LazyLock::new(|| Regex::new(r"(?i)^\W*([NY])").expect("valid flag regex"));

/// Fields extracted from one assistant reply.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ParsedReply {
    pub is_safe: bool,
    pub safety_confidence: u64,
    pub safety_reason: String,
    /// Token text as the assistant wrote it; validated as a whole number.
    pub audience_category: String,
    pub audience_confidence: u64,
    pub audience_reason: String,
}

/// Reasons a reply could not be turned into a record.
///
/// Every variant keeps the reply exactly as received so the row can be
/// reviewed by hand.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum ParseError {
    #[error("expected 3 or 4 numeric fields in reply, found {found}")]
    WrongFieldCount { found: usize, raw: String },
    #[error("no Y/N flag found at start of reply")]
    MissingFlag { raw: String },
    #[error("numeric field {position} ({token:?}) is not a non-negative whole number")]
    NonIntegerOrNegativeValue {
        position: usize,
        token: String,
        raw: String,
    },
}

impl ParseError {
    pub fn raw(&self) -> &str {
        match self {
            Self::WrongFieldCount { raw, .. }
            | Self::MissingFlag { raw }
            | Self::NonIntegerOrNegativeValue { raw, .. } => raw,
        }
    }
}

impl FailureKind for ParseError {
    fn kind(&self) -> &'static str {
        match self {
            Self::WrongFieldCount { .. } => "WrongFieldCount",
            Self::MissingFlag { .. } => "MissingFlag",
            Self::NonIntegerOrNegativeValue { .. } => "NonIntegerOrNegativeValue",
        }
    }
}

/// Parse a free-text moderation reply.
///
/// The reply is read positionally: a leading `Y`/`N` flag, then the safety
/// confidence, the audience category and the audience confidence as the
/// first three numbers. Text between the first two numbers is the safety
/// reason; text after the third number is the audience reason. One extra
/// trailing number is tolerated and left inside the audience reason.
pub fn parse_reply(text: &str) -> Result<ParsedReply, ParseError> {
    let normalized = text.replace(['\n', '\r'], " ");
    let numbers: Vec<Match<'_>> = NUMBER_RE.find_iter(&normalized).collect();
    if !(3..=4).contains(&numbers.len()) {
        return Err(ParseError::WrongFieldCount {
            found: numbers.len(),
            raw: text.to_string(),
        });
    }

    let Some(flag) = FLAG_RE
        .captures(&normalized)
        .and_then(|caps| caps.get(1))
        .map(|found| found.as_str())
    else {
        return Err(ParseError::MissingFlag {
            raw: text.to_string(),
        });
    };

    let mut values = [0u64; 3];
    for (idx, number) in numbers.iter().take(3).enumerate() {
        values[idx] =
            whole_number(number.as_str()).ok_or_else(|| ParseError::NonIntegerOrNegativeValue {
                position: idx + 1,
                token: number.as_str().to_string(),
                raw: text.to_string(),
            })?;
    }

    Ok(ParsedReply {
        is_safe: flag.eq_ignore_ascii_case("y"),
        safety_confidence: values[0],
        safety_reason: reason(&normalized, numbers[0].end()..numbers[1].start()),
        audience_category: numbers[1].as_str().to_string(),
        audience_confidence: values[2],
        audience_reason: reason(&normalized, numbers[2].end()..normalized.len()),
    })
}

/// `-0` is accepted as zero; anything with a fractional part, a minus sign
/// on a non-zero value, or too many digits is rejected.
fn whole_number(token: &str) -> Option<u64> {
    let value: i64 = token.parse().ok()?;
    u64::try_from(value).ok()
}

fn reason(text: &str, span: Range<usize>) -> String {
    text[span]
        .trim_matches(|ch: char| !ch.is_ascii_alphabetic())
        .to_string()
}
