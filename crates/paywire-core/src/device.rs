//! Coarse device detection from the `User-Agent` header.

use serde::{Deserialize, Serialize};

#[derive(
  Debug,
  Clone,
  Copy,
  PartialEq,
  Eq,
  Default,
  Serialize,
  Deserialize,
  strum::Display,
  strum::EnumString,
  strum::AsRefStr,
)]
#[serde(rename_all = "lowercase")]
#[strum(serialize_all = "lowercase")]
pub enum DeviceKind {
  Mobile,
  Tablet,
  #[default]
  Desktop,
  Bot,
}

#[derive(Debug, Clone, PartialEq, Eq, Default, Serialize, Deserialize)]
pub struct DeviceInfo {
  pub kind: DeviceKind,
  pub os:   Option<String>,
}

impl DeviceInfo {
  pub fn from_user_agent(user_agent: &str) -> Self {
    let ua = user_agent.to_ascii_lowercase();

    let kind = if ["bot", "crawler", "spider", "curl/", "wget/"]
      .iter()
      .any(|m| ua.contains(m))
    {
      DeviceKind::Bot
    } else if ua.contains("ipad") || (ua.contains("android") && !ua.contains("mobile")) {
      DeviceKind::Tablet
    } else if ["iphone", "ipod", "android", "mobile", "opera mini"]
      .iter()
      .any(|m| ua.contains(m))
    {
      DeviceKind::Mobile
    } else {
      DeviceKind::Desktop
    };

    // Order matters: iOS and Android UAs also mention "mac os x" / "linux".
    let os = [
      ("iphone", "ios"),
      ("ipad", "ios"),
      ("android", "android"),
      ("windows", "windows"),
      ("mac os x", "macos"),
      ("linux", "linux"),
    ]
    .iter()
    .find(|(needle, _)| ua.contains(needle))
    .map(|(_, os)| (*os).to_string());

    Self { kind, os }
  }
}
