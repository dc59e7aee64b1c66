//! Amount parsing. All amounts are held as integer minor units (cents).

/// Parse a decimal amount string such as `"0.99"`, `"2,50"` or `"3"` into
/// minor units. At most two significant fraction digits are accepted; further
/// digits must be zero. Negative or malformed input yields `None`.
pub fn parse_amount_cents(raw: &str) -> Option<i64> {
  let normalized = raw.trim().replace(',', ".");
  if normalized.is_empty() {
    return None;
  }

  let (whole, fraction) = match normalized.split_once('.') {
    Some((w, f)) => (w, f),
    None => (normalized.as_str(), ""),
  };
  if whole.is_empty() && fraction.is_empty() {
    return None;
  }
  if !whole.chars().all(|c| c.is_ascii_digit())
    || !fraction.chars().all(|c| c.is_ascii_digit())
  {
    return None;
  }
  if fraction.len() > 2 && fraction[2..].chars().any(|c| c != '0') {
    return None;
  }

  let whole: i64 = if whole.is_empty() { 0 } else { whole.parse().ok()? };
  let mut cents_str: String = fraction.chars().take(2).collect();
  while cents_str.len() < 2 {
    cents_str.push('0');
  }
  let cents: i64 = cents_str.parse().ok()?;

  whole.checked_mul(100)?.checked_add(cents)
}

/// Render minor units as a decimal string with two fraction digits.
pub fn format_cents(cents: i64) -> String {
  let sign = if cents < 0 { "-" } else { "" };
  let abs = cents.unsigned_abs();
  format!("{sign}{}.{:02}", abs / 100, abs % 100)
}
