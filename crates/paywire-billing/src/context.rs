//! Per-request visitor context.
//!
//! Built once at the HTTP edge and handed to every service, so services never
//! reach into framework request state.

use std::collections::HashMap;

use paywire_core::{
  device::DeviceInfo,
  msisdn::normalize_msisdn,
  session::{SessionTouch, Utm},
};

#[derive(Debug, Clone, Default)]
pub struct RequestContext {
  /// The client address after proxy headers are considered.
  pub ip:            Option<String>,
  pub user_agent:    Option<String>,
  /// Request headers keyed by lower-case name.
  pub headers:       HashMap<String, String>,
  /// Raw `user_msisdn` cookie.
  pub msisdn_cookie: Option<String>,
  /// The `news_session` cookie, or a freshly issued id.
  pub session_id:    String,
  /// `session_id` was issued for this request and must be set as a cookie.
  pub new_session:   bool,
  pub landing_page:  Option<String>,
  pub referrer:      Option<String>,
  pub utm:           Utm,
}

impl RequestContext {
  pub fn header(&self, name: &str) -> Option<&str> {
    self.headers.get(name).map(String::as_str)
  }

  /// The cookie MSISDN, if it normalises to a valid number.
  pub fn cookie_msisdn(&self) -> Option<String> {
    self.msisdn_cookie.as_deref().and_then(normalize_msisdn)
  }

  pub fn device(&self) -> DeviceInfo {
    self
      .user_agent
      .as_deref()
      .map(DeviceInfo::from_user_agent)
      .unwrap_or_default()
  }

  pub fn session_touch(&self, page_view: bool, event: bool) -> SessionTouch {
    SessionTouch {
      session_id: self.session_id.clone(),
      ip: self.ip.clone(),
      user_agent: self.user_agent.clone(),
      device: self.device(),
      utm: self.utm.clone(),
      landing_page: self.landing_page.clone(),
      referrer: self.referrer.clone(),
      page_view,
      event,
    }
  }
}
