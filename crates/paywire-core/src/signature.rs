//! HMAC-SHA256 signatures for payment callbacks.

use hmac::{Hmac, Mac};
use sha2::Sha256;

type HmacSha256 = Hmac<Sha256>;

/// The canonical string a callback signature covers:
/// `transactionId|status|msisdn|amount|currency`, absent fields empty.
pub fn callback_signing_string(
  transaction_id: &str,
  status: &str,
  msisdn: Option<&str>,
  amount: Option<&str>,
  currency: Option<&str>,
) -> String {
  [
    transaction_id,
    status,
    msisdn.unwrap_or_default(),
    amount.unwrap_or_default(),
    currency.unwrap_or_default(),
  ]
  .join("|")
}

/// Lower-case hex HMAC-SHA256 of `message` under `secret`.
pub fn sign(secret: &str, message: &str) -> String {
  hex::encode(mac(secret, message).finalize().into_bytes())
}

/// Constant-time check of a hex signature. Case-insensitive on the hex digits.
pub fn verify(secret: &str, message: &str, signature_hex: &str) -> bool {
  let Ok(expected) = hex::decode(signature_hex.trim().to_ascii_lowercase()) else {
    return false;
  };
  mac(secret, message).verify_slice(&expected).is_ok()
}

fn mac(secret: &str, message: &str) -> HmacSha256 {
  let mut mac = HmacSha256::new_from_slice(secret.as_bytes())
    .expect("HMAC can take key of any size");
  mac.update(message.as_bytes());
  mac
}
