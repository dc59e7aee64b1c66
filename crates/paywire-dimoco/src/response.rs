//! Parsing of DIMOCO XML answers.
//!
//! Every action answers with the same envelope:
//!
//! ```xml
//! <result>
//!   <action>start</action>
//!   <request_id>…</request_id>
//!   <reference>…</reference>
//!   <action_result>
//!     <status>3</status>
//!     <code>…</code>
//!     <detail>…</detail>
//!     <redirect><url>https://…</url></redirect>
//!     <transaction>…</transaction>
//!   </action_result>
//!   <customer><msisdn>…</msisdn><operator>…</operator><country>…</country></customer>
//! </result>
//! ```
//!
//! Unknown elements are skipped so new fields on the provider side do not
//! break us.

use quick_xml::events::Event;

use crate::{Error, Result};

/// Action succeeded.
pub const STATUS_OK: i32 = 0;
/// Action accepted; the customer must be sent to `redirect_url`.
pub const STATUS_REDIRECT: i32 = 3;

#[derive(Debug, Default, Clone, PartialEq, Eq)]
pub struct ActionResult {
  pub action:         Option<String>,
  pub request_id:     Option<String>,
  pub reference:      Option<String>,
  pub status:         i32,
  pub code:           Option<String>,
  pub detail:         Option<String>,
  pub redirect_url:   Option<String>,
  pub transaction_id: Option<String>,
  pub msisdn:         Option<String>,
  pub operator:       Option<String>,
  pub country:        Option<String>,
}

impl ActionResult {
  pub fn is_ok(&self) -> bool { self.status == STATUS_OK }

  pub fn is_ok_or_redirect(&self) -> bool {
    matches!(self.status, STATUS_OK | STATUS_REDIRECT)
  }

  /// Turn a refused answer into an error for `action`.
  pub fn rejected(self, action: &'static str) -> Error {
    Error::Rejected {
      action,
      status: self.status,
      code: self.code,
      detail: self.detail,
    }
  }
}

pub fn parse(xml: &[u8]) -> Result<ActionResult> {
  let mut reader = quick_xml::Reader::from_reader(xml);
  reader.config_mut().trim_text(true);

  let mut out = ActionResult::default();
  let mut status: Option<i32> = None;
  let mut path: Vec<Vec<u8>> = Vec::new();
  let mut buf = Vec::new();

  loop {
    match reader.read_event_into(&mut buf) {
      Ok(Event::Start(ref e)) => {
        path.push(local_name(e.name().as_ref()).to_vec());
      }
      Ok(Event::End(_)) => {
        path.pop();
      }
      Ok(Event::Text(ref t)) => {
        let text = t.unescape().map_err(|e| Error::Xml(e.to_string()))?;
        assign(&path, text.into_owned(), &mut out, &mut status)?;
      }
      Ok(Event::CData(ref c)) => {
        let text = String::from_utf8_lossy(&c[..]).into_owned();
        assign(&path, text, &mut out, &mut status)?;
      }
      Ok(Event::Eof) => break,
      Err(e) => return Err(Error::Xml(e.to_string())),
      _ => {}
    }
    buf.clear();
  }

  out.status = status.ok_or(Error::Missing("status"))?;
  Ok(out)
}

/// Store `text` in the field named by the innermost two elements of `path`.
fn assign(
  path: &[Vec<u8>],
  text: String,
  out: &mut ActionResult,
  status: &mut Option<i32>,
) -> Result<()> {
  let [.., parent, leaf] = path else {
    return Ok(());
  };
  let slot = match (parent.as_slice(), leaf.as_slice()) {
    (b"action_result", b"status") => {
      let parsed = text
        .trim()
        .parse()
        .map_err(|_| Error::Xml(format!("non-numeric status {text:?}")))?;
      *status = Some(parsed);
      return Ok(());
    }
    (b"result", b"action") => &mut out.action,
    (b"result", b"request_id") => &mut out.request_id,
    (b"result", b"reference") => &mut out.reference,
    (b"action_result", b"code") => &mut out.code,
    (b"action_result", b"detail") => &mut out.detail,
    (b"action_result", b"transaction") => &mut out.transaction_id,
    (b"redirect", b"url") => &mut out.redirect_url,
    (b"customer", b"msisdn") => &mut out.msisdn,
    (b"customer", b"operator") => &mut out.operator,
    (b"customer", b"country") => &mut out.country,
    _ => return Ok(()),
  };
  *slot = Some(text);
  Ok(())
}

fn local_name(name: &[u8]) -> &[u8] {
  match name.iter().rposition(|&b| b == b':') {
    Some(pos) => &name[pos + 1..],
    None => name,
  }
}

#[cfg(test)]
mod tests {
  use super::*;

  #[test]
  fn parses_redirect_answer() {
    let xml = br#"<?xml version="1.0" encoding="UTF-8"?>
      <result>
        <action>start</action>
        <request_id>req-1</request_id>
        <reference>order-1</reference>
        <action_result>
          <status>3</status>
          <redirect><url>https://pay.example/?a=1&amp;b=2</url></redirect>
          <transaction>tx-42</transaction>
        </action_result>
      </result>"#;
    let r = parse(xml).unwrap();
    assert_eq!(r.status, STATUS_REDIRECT);
    assert!(r.is_ok_or_redirect());
    assert!(!r.is_ok());
    assert_eq!(r.action.as_deref(), Some("start"));
    assert_eq!(r.redirect_url.as_deref(), Some("https://pay.example/?a=1&b=2"));
    assert_eq!(r.transaction_id.as_deref(), Some("tx-42"));
    assert_eq!(r.reference.as_deref(), Some("order-1"));
  }

  #[test]
  fn parses_identified_customer() {
    let xml = br#"<result>
        <action>identify</action>
        <action_result><status>0</status></action_result>
        <customer>
          <msisdn>436601234567</msisdn>
          <operator>AT_A1</operator>
          <country><![CDATA[AT]]></country>
        </customer>
      </result>"#;
    let r = parse(xml).unwrap();
    assert!(r.is_ok());
    assert_eq!(r.msisdn.as_deref(), Some("436601234567"));
    assert_eq!(r.operator.as_deref(), Some("AT_A1"));
    assert_eq!(r.country.as_deref(), Some("AT"));
  }

  #[test]
  fn failure_carries_code_and_detail() {
    let xml = br#"<result><action_result>
        <status>5</status><code>301</code><detail>blocked</detail>
      </action_result></result>"#;
    let err = parse(xml).unwrap().rejected("refund");
    match err {
      Error::Rejected { action, status, code, detail } => {
        assert_eq!(action, "refund");
        assert_eq!(status, 5);
        assert_eq!(code.as_deref(), Some("301"));
        assert_eq!(detail.as_deref(), Some("blocked"));
      }
      other => panic!("unexpected {other:?}"),
    }
  }

  #[test]
  fn missing_or_bad_status_is_an_error() {
    assert!(matches!(
      parse(b"<result><action>x</action></result>"),
      Err(Error::Missing("status"))
    ));
    assert!(matches!(
      parse(b"<result><action_result><status>ok</status></action_result></result>"),
      Err(Error::Xml(_))
    ));
  }

  #[test]
  fn unknown_elements_and_prefixes_are_tolerated() {
    let xml = br#"<d:result xmlns:d="urn:dimoco">
        <d:extra><d:status>9</d:status></d:extra>
        <d:action_result><d:status>0</d:status></d:action_result>
      </d:result>"#;
    assert_eq!(parse(xml).unwrap().status, STATUS_OK);
  }
}
