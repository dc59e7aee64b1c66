//! Carrier IP classification.
//!
//! Maps a client IPv4 address to the mobile carrier whose gateway range it
//! falls in. Ranges are plain CIDR blocks compared with mask arithmetic; the
//! first matching entry wins. IPv6 is not classified.

use std::net::Ipv4Addr;

use once_cell::sync::Lazy;
use serde::{Deserialize, Serialize};

use crate::{Error, Result};

// ─── Network type ────────────────────────────────────────────────────────────

/// The kind of network a visitor is connecting from.
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
pub enum NetworkType {
  /// Inside a known carrier gateway range.
  Mobile,
  /// A public address outside every carrier range (fixed line, Wi-Fi).
  Wifi,
  /// Private, loopback, IPv6 or unparsable input.
  #[default]
  Unknown,
}

/// The result of classifying one client address.
#[derive(Debug, Clone, PartialEq, Eq, Default, Serialize, Deserialize)]
pub struct NetworkInfo {
  pub is_mobile_network: bool,
  pub carrier:           Option<String>,
  pub country:           Option<String>,
  pub network_type:      NetworkType,
}

impl NetworkInfo {
  fn unknown() -> Self { Self::default() }

  fn wifi() -> Self {
    Self { network_type: NetworkType::Wifi, ..Self::default() }
  }
}

// ─── Ranges ──────────────────────────────────────────────────────────────────

/// Built-in carrier gateway ranges: `(carrier, country, base, prefix)`.
const BUILTIN_RANGES: &[(&str, &str, [u8; 4], u8)] = &[
  ("A1 Telekom Austria", "AT", [62, 46, 0, 0], 16),
  ("A1 Telekom Austria", "AT", [213, 162, 64, 0], 18),
  ("Magenta Telekom", "AT", [77, 116, 0, 0], 14),
  ("Drei Austria", "AT", [178, 165, 128, 0], 17),
  ("Drei Austria", "AT", [176, 66, 0, 0], 17),
  ("Telekom Deutschland", "DE", [80, 187, 0, 0], 16),
  ("Vodafone Deutschland", "DE", [109, 40, 0, 0], 13),
  ("Telefonica Germany", "DE", [176, 0, 0, 0], 13),
  ("Swisscom", "CH", [178, 197, 192, 0], 18),
];

/// One carrier gateway block.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct CarrierRange {
  pub carrier: String,
  pub country: String,
  pub base:    Ipv4Addr,
  pub prefix:  u8,
}

impl CarrierRange {
  /// Parse a range from `a.b.c.d/n` notation. The base is masked down to the
  /// network address so `10.1.2.3/8` and `10.0.0.0/8` are the same block.
  pub fn parse(carrier: &str, country: &str, cidr: &str) -> Result<Self> {
    let invalid = || Error::InvalidCidr(cidr.to_string());
    let (addr, prefix) = cidr.trim().split_once('/').ok_or_else(invalid)?;
    let base: Ipv4Addr = addr.parse().map_err(|_| invalid())?;
    let prefix: u8 = prefix.parse().map_err(|_| invalid())?;
    if prefix > 32 {
      return Err(invalid());
    }
    let masked = u32::from(base) & mask(prefix);
    Ok(Self {
      carrier: carrier.to_string(),
      country: country.to_string(),
      base: Ipv4Addr::from(masked),
      prefix,
    })
  }

  pub fn contains(&self, ip: u32) -> bool {
    let m = mask(self.prefix);
    ip & m == u32::from(self.base) & m
  }

  /// First address of the block.
  pub fn first(&self) -> u32 { u32::from(self.base) & mask(self.prefix) }

  /// Last address of the block.
  pub fn last(&self) -> u32 { self.first() | !mask(self.prefix) }
}

fn mask(prefix: u8) -> u32 {
  if prefix == 0 { 0 } else { u32::MAX << (32 - u32::from(prefix)) }
}

// ─── Classifier ──────────────────────────────────────────────────────────────

/// An ordered list of carrier ranges.
#[derive(Debug, Clone)]
pub struct Classifier {
  ranges: Vec<CarrierRange>,
}

static BUILTIN: Lazy<Classifier> = Lazy::new(Classifier::builtin);

impl Default for Classifier {
  fn default() -> Self { Self::builtin() }
}

impl Classifier {
  /// The built-in carrier table.
  pub fn builtin() -> Self {
    let ranges = BUILTIN_RANGES
      .iter()
      .map(|(carrier, country, base, prefix)| CarrierRange {
        carrier: (*carrier).to_string(),
        country: (*country).to_string(),
        base:    Ipv4Addr::from(*base),
        prefix:  *prefix,
      })
      .collect();
    Self { ranges }
  }

  /// The built-in table followed by `extra`; built-in entries keep priority.
  pub fn with_extra(extra: impl IntoIterator<Item = CarrierRange>) -> Self {
    let mut classifier = Self::builtin();
    classifier.ranges.extend(extra);
    classifier
  }

  pub fn ranges(&self) -> &[CarrierRange] { &self.ranges }

  pub fn classify(&self, ip: &str) -> NetworkInfo {
    let Ok(addr) = ip.trim().parse::<Ipv4Addr>() else {
      return NetworkInfo::unknown();
    };
    if is_non_routable(addr) {
      return NetworkInfo::unknown();
    }

    let value = u32::from(addr);
    match self.ranges.iter().find(|r| r.contains(value)) {
      Some(range) => NetworkInfo {
        is_mobile_network: true,
        carrier:           Some(range.carrier.clone()),
        country:           Some(range.country.clone()),
        network_type:      NetworkType::Mobile,
      },
      None => NetworkInfo::wifi(),
    }
  }
}

fn is_non_routable(addr: Ipv4Addr) -> bool {
  addr.is_private()
    || addr.is_loopback()
    || addr.is_link_local()
    || addr.is_unspecified()
    || addr.is_broadcast()
}

/// Classify `ip` against the built-in carrier table.
pub fn classify_ip(ip: &str) -> NetworkInfo { BUILTIN.classify(ip) }
