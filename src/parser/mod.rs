//! Raw message → `ParsedMessage`.
//!
//! Headers and MIME structure are decoded with `mail-parser`; the body is
//! then searched for amounts (see [`extract`]).

pub mod extract;

use std::sync::LazyLock;

use chrono::{DateTime, Datelike, FixedOffset, NaiveDate, TimeZone};
use mail_parser::PartType;
use regex::Regex;
use serde::Serialize;

use crate::config::ExtractionRules;
use crate::error::ParseError;

pub use extract::extract_fields;

/// English month names, matched case-insensitively.
const MONTHS: [&str; 12] = [
    "january",
    "february",
    "march",
    "april",
    "may",
    "june",
    "july",
    "august",
    "september",
    "october",
    "november",
    "december",
];

static SUBJECT_DATE: LazyLock<Regex> =
    LazyLock::new(|| Regex::new(r"on ([A-Za-z]+) (\d+)").unwrap());

/// Amounts pulled out of a message body. Either may be missing.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize)]
pub struct ExtractedFields {
    pub total: Option<String>,
    pub tax: Option<String>,
}

impl ExtractedFields {
    pub const TOTAL: &'static str = "total";
    pub const TAX: &'static str = "tax";

    /// Look a field up by name.
    pub fn get(&self, name: &str) -> Option<&str> {
        match name {
            Self::TOTAL => self.total.as_deref(),
            Self::TAX => self.tax.as_deref(),
            _ => None,
        }
    }
}

/// A decoded message.
#[derive(Debug, Clone, PartialEq)]
pub struct ParsedMessage {
    pub subject: String,
    pub sender: String,
    /// Date header, in the sender's own offset.
    pub timestamp: DateTime<FixedOffset>,
    /// Selected body part, HTML or plain text, undecorated.
    pub body: String,
    pub fields: ExtractedFields,
}

impl ParsedMessage {
    /// Compact `YYYYMMDD` date used for naming. See [`naming_date`].
    pub fn naming_date(&self) -> String {
        naming_date(&self.subject, &self.timestamp)
    }
}

/// Decodes raw RFC 822 messages.
#[derive(Debug, Clone, Default)]
pub struct EmailParser {
    rules: ExtractionRules,
}

impl EmailParser {
    pub fn new(rules: ExtractionRules) -> Self {
        Self { rules }
    }

    pub fn parse(&self, raw: &[u8]) -> Result<ParsedMessage, ParseError> {
        let message = mail_parser::MessageParser::default()
            .parse(raw)
            .ok_or(ParseError::Undecodable)?;

        let subject = message
            .subject()
            .ok_or(ParseError::MissingHeader("Subject"))?
            .to_string();
        let sender = format_sender(&message).ok_or(ParseError::MissingHeader("From"))?;
        let timestamp = convert_date(message.date().ok_or(ParseError::MissingHeader("Date"))?)?;
        let body = select_body(&message).ok_or(ParseError::NoBody)?;
        let fields = extract_fields(&body, &self.rules);

        Ok(ParsedMessage {
            subject,
            sender,
            timestamp,
            body,
            fields,
        })
    }
}

/// `YYYYMMDD` from an "on <Month> <Day>" subject fragment, combined with the
/// message year; falls back to the message's own date. Never fails.
pub fn naming_date(subject: &str, timestamp: &DateTime<FixedOffset>) -> String {
    subject_date(subject, timestamp.year())
        .unwrap_or_else(|| timestamp.date_naive())
        .format("%Y%m%d")
        .to_string()
}

fn subject_date(subject: &str, year: i32) -> Option<NaiveDate> {
    let caps = SUBJECT_DATE.captures(subject)?;
    let month_name = caps.get(1)?.as_str();
    let month = MONTHS
        .iter()
        .position(|m| m.eq_ignore_ascii_case(month_name))?;
    let day: u32 = caps.get(2)?.as_str().parse().ok()?;
    NaiveDate::from_ymd_opt(year, month as u32 + 1, day)
}

/// First HTML part, else first plain-text part.
fn select_body(message: &mail_parser::Message) -> Option<String> {
    let html = message.parts.iter().find_map(|part| match &part.body {
        PartType::Html(html) => Some(html.to_string()),
        _ => None,
    });
    html.or_else(|| {
        message.parts.iter().find_map(|part| match &part.body {
            PartType::Text(text) => Some(text.to_string()),
            _ => None,
        })
    })
}

/// `Name <address>`, or whichever half is present.
fn format_sender(message: &mail_parser::Message) -> Option<String> {
    let addr = message.from()?.first()?;
    match (addr.name(), addr.address()) {
        (Some(name), Some(address)) if !name.is_empty() => Some(format!("{name} <{address}>")),
        (_, Some(address)) => Some(address.to_string()),
        (Some(name), None) => Some(name.to_string()),
        (None, None) => None,
    }
}

fn convert_date(date: &mail_parser::DateTime) -> Result<DateTime<FixedOffset>, ParseError> {
    let invalid = || ParseError::InvalidDate(date.to_rfc3339());

    let sign = if date.tz_before_gmt { -1 } else { 1 };
    let offset_secs = sign * (i32::from(date.tz_hour) * 3600 + i32::from(date.tz_minute) * 60);
    let offset = FixedOffset::east_opt(offset_secs).ok_or_else(invalid)?;

    let naive = NaiveDate::from_ymd_opt(
        i32::from(date.year),
        u32::from(date.month),
        u32::from(date.day),
    )
    .and_then(|d| {
        d.and_hms_opt(
            u32::from(date.hour),
            u32::from(date.minute),
            u32::from(date.second),
        )
    })
    .ok_or_else(invalid)?;

    offset.from_local_datetime(&naive).single().ok_or_else(invalid)
}
