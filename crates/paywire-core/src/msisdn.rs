//! MSISDN extraction from carrier-enriched HTTP headers, and normalisation.
//!
//! Carriers that practise header enrichment inject the subscriber's number
//! into outbound requests under one of a handful of well-known header names.
//! The value formats differ by carrier: a bare number, a `MSISDN=` key/value
//! pair embedded in a longer header, or a `tel:` URI.

use once_cell::sync::Lazy;
use regex::Regex;

/// Header names inspected, in priority order. Lower-case.
pub const MSISDN_HEADERS: [&str; 12] = [
  "x-msisdn",
  "x-nokia-msisdn",
  "x-up-calling-line-id",
  "x-wap-msisdn",
  "x-h3g-msisdn",
  "x-mobile-number",
  "msisdn",
  "x-network-info",
  "x-hts-clid",
  "x-up-subno",
  "x-msp-msisdn",
  "x-orange-msisdn",
];

/// Shortest and longest digit run accepted as a subscriber number (E.164).
pub const MIN_DIGITS: usize = 8;
pub const MAX_DIGITS: usize = 15;

static BARE: Lazy<Regex> =
  Lazy::new(|| Regex::new(r"^\+?(\d+)$").expect("invalid bare msisdn regex"));

static KEYED: Lazy<Regex> = Lazy::new(|| {
  Regex::new(r"(?i)\bmsisdn=\+?(\d+)").expect("invalid keyed msisdn regex")
});

static TEL_URI: Lazy<Regex> = Lazy::new(|| {
  Regex::new(r"(?i)^tel:\+?(\d+)").expect("invalid tel uri regex")
});

/// A subscriber number found in a request header.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct HeaderMatch {
  pub header: &'static str,
  pub msisdn: String,
}

/// Scan the known headers in order and return the first valid number.
///
/// `lookup` receives a lower-case header name and returns its value, if any.
pub fn extract_msisdn<'a, F>(lookup: F) -> Option<HeaderMatch>
where
  F: Fn(&str) -> Option<&'a str>,
{
  MSISDN_HEADERS.iter().find_map(|&header| {
    let value = lookup(header)?;
    parse_header_value(value).map(|msisdn| HeaderMatch { header, msisdn })
  })
}

/// Apply the three value patterns to a single header value.
pub fn parse_header_value(value: &str) -> Option<String> {
  let value = value.trim();
  [&*BARE, &*KEYED, &*TEL_URI].iter().find_map(|pattern| {
    let digits = pattern.captures(value)?.get(1)?.as_str();
    normalize_msisdn(digits)
  })
}

/// Reduce a phone number to its bare international digits.
///
/// Separators (space, `-`, `.`, parentheses) are dropped, as is a leading `+`
/// or `00` international prefix. Returns `None` unless 8–15 digits remain.
pub fn normalize_msisdn(raw: &str) -> Option<String> {
  let trimmed = raw.trim();
  let trimmed = trimmed.strip_prefix('+').unwrap_or(trimmed);

  let mut digits = String::with_capacity(trimmed.len());
  for c in trimmed.chars() {
    match c {
      '0'..='9' => digits.push(c),
      ' ' | '-' | '.' | '(' | ')' => {}
      _ => return None,
    }
  }

  let digits = match digits.strip_prefix("00") {
    Some(rest) => rest.to_string(),
    None => digits,
  };

  (MIN_DIGITS..=MAX_DIGITS)
    .contains(&digits.len())
    .then_some(digits)
}

/// Mask all but the last three digits for log output.
pub fn redact(msisdn: &str) -> String {
  let keep = msisdn.len().min(3);
  let (head, tail) = msisdn.split_at(msisdn.len() - keep);
  format!("{}{tail}", "*".repeat(head.len()))
}
