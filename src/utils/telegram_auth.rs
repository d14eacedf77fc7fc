//! Telegram WebApp `initData` verification.
//!
//! The Mini App client attaches a query-string payload signed by Telegram.
//! The signature is `hex(HMAC_SHA256(secret, data_check_string))` where
//! `secret = HMAC_SHA256("WebAppData", bot_token)` and `data_check_string`
//! is every field except `hash`, sorted by key, rendered as `key=value` and
//! joined with `\n`.

use hmac::{Hmac, Mac};
use sha2::Sha256;
use subtle::ConstantTimeEq;

type HmacSha256 = Hmac<Sha256>;

const WEB_APP_DATA: &[u8] = b"WebAppData";
const HASH_FIELD: &str = "hash";
const USER_FIELD: &str = "user";

pub const NO_USERNAME: &str = "no-username";
pub const NO_FIRST_NAME: &str = "no-first-name";
pub const NO_LAST_NAME: &str = "no-last-name";

/// Identity of the Telegram user embedded in a verified payload.
///
/// Fields the client did not send carry the `NO_*` sentinels so that the
/// row store always receives text in every column.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Identity {
    pub id: String,
    pub username: String,
    pub first_name: String,
    pub last_name: String,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, thiserror::Error)]
pub enum Rejection {
    #[error("missing credential")]
    MissingCredential,
    #[error("missing signature")]
    MissingSignature,
    #[error("signature mismatch")]
    SignatureMismatch,
    #[error("malformed payload")]
    MalformedPayload,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Verification {
    Invalid(Rejection),
    /// Signature matched. `None` when there is no usable `user` field.
    Valid(Option<Identity>),
}

impl Verification {
    pub fn is_valid(&self) -> bool {
        matches!(self, Verification::Valid(_))
    }

    pub fn identity(&self) -> Option<&Identity> {
        match self {
            Verification::Valid(identity) => identity.as_ref(),
            Verification::Invalid(_) => None,
        }
    }
}

/// Verifies `raw` init data against `bot_token`.
///
/// Never fails: malformed or hostile input maps to `Verification::Invalid`.
pub fn verify(raw: &str, bot_token: Option<&str>) -> Verification {
    let Some(bot_token) = bot_token.filter(|t| !t.is_empty()) else {
        return Verification::Invalid(Rejection::MissingCredential);
    };

    let mut fields = match parse_fields(raw) {
        Ok(fields) => fields,
        Err(rejection) => return Verification::Invalid(rejection),
    };

    let Some(position) = fields.iter().position(|(k, _)| k == HASH_FIELD) else {
        return Verification::Invalid(Rejection::MissingSignature);
    };
    let (_, received) = fields.remove(position);

    let expected = sign(&fields, bot_token);
    if !bool::from(expected.as_bytes().ct_eq(received.as_bytes())) {
        return Verification::Invalid(Rejection::SignatureMismatch);
    }

    let identity = fields
        .iter()
        .find(|(k, _)| k == USER_FIELD)
        .and_then(|(_, v)| parse_identity(v));
    Verification::Valid(identity)
}

/// Computes the lowercase hex signature Telegram would attach to `fields`.
///
/// `fields` must not contain `hash`. Order does not matter.
pub fn sign(fields: &[(String, String)], bot_token: &str) -> String {
    let secret_key = hmac_sha256(WEB_APP_DATA, bot_token.as_bytes());
    let check_string = data_check_string(fields);
    hex::encode(hmac_sha256(&secret_key, check_string.as_bytes()))
}

pub fn data_check_string(fields: &[(String, String)]) -> String {
    let mut sorted: Vec<&(String, String)> = fields.iter().collect();
    sorted.sort_by(|a, b| a.0.as_bytes().cmp(b.0.as_bytes()));
    sorted
        .iter()
        .map(|(k, v)| format!("{}={}", k, v))
        .collect::<Vec<_>>()
        .join("\n")
}

fn hmac_sha256(key: &[u8], message: &[u8]) -> Vec<u8> {
    let mut mac =
        <HmacSha256 as Mac>::new_from_slice(key).expect("HMAC accepts keys of any length");
    mac.update(message);
    mac.finalize().into_bytes().to_vec()
}

/// Splits the payload into decoded pairs. The first occurrence of a key wins.
fn parse_fields(raw: &str) -> Result<Vec<(String, String)>, Rejection> {
    let mut fields: Vec<(String, String)> = Vec::new();
    for segment in raw.split('&').filter(|s| !s.is_empty()) {
        let (key, value) = segment
            .split_once('=')
            .ok_or(Rejection::MalformedPayload)?;
        let key = decode_component(key)?;
        if key.is_empty() {
            return Err(Rejection::MalformedPayload);
        }
        let value = decode_component(value)?;
        if fields.iter().any(|(k, _)| *k == key) {
            continue;
        }
        fields.push((key, value));
    }
    Ok(fields)
}

fn decode_component(component: &str) -> Result<String, Rejection> {
    let spaced = component.replace('+', " ");
    urlencoding::decode(&spaced)
        .map(|decoded| decoded.into_owned())
        .map_err(|_| Rejection::MalformedPayload)
}

fn parse_identity(user: &str) -> Option<Identity> {
    let value: serde_json::Value = serde_json::from_str(user).ok()?;
    let object = value.as_object()?;
    let id = match object.get("id")? {
        serde_json::Value::Number(n) => n.to_string(),
        serde_json::Value::String(s) if !s.is_empty() => s.clone(),
        _ => return None,
    };
    let text = |field: &str, fallback: &str| {
        object
            .get(field)
            .and_then(|v| v.as_str())
            .filter(|s| !s.is_empty())
            .unwrap_or(fallback)
            .to_string()
    };
    Some(Identity {
        id,
        username: text("username", NO_USERNAME),
        first_name: text("first_name", NO_FIRST_NAME),
        last_name: text("last_name", NO_LAST_NAME),
    })
}
