//! Request digests.
//!
//! DIMOCO authenticates a request by an HMAC-SHA256 over the values of every
//! form parameter, concatenated in ascending order of parameter name.

use std::collections::BTreeMap;

use hmac::{Hmac, Mac};
use sha2::Sha256;

type HmacSha256 = Hmac<Sha256>;

pub fn digest(secret: &str, params: &BTreeMap<&'static str, String>) -> String {
  let mut mac = HmacSha256::new_from_slice(secret.as_bytes())
    .expect("HMAC can take key of any size");
  for (key, value) in params {
    if *key != "digest" {
      mac.update(value.as_bytes());
    }
  }
  hex::encode(mac.finalize().into_bytes())
}

/// Consume `params` into form pairs with the digest appended.
pub fn signed_form(
  secret: &str,
  mut params: BTreeMap<&'static str, String>,
) -> Vec<(&'static str, String)> {
  let d = digest(secret, &params);
  params.insert("digest", d);
  params.into_iter().collect()
}
