use base64::engine::general_purpose::URL_SAFE_NO_PAD;
use base64::Engine;
use chrono::{DateTime, Duration, Utc};
use reqwest::header::{self, HeaderMap, HeaderName, HeaderValue};
use serde::de::{self, Deserializer};
use serde::Deserialize;
use serde_json::Value;
use thiserror::Error;

use crate::codec::{CodecError, PayloadCodec};

/// Per-request identity header carried by every call
pub const LOCAL_NAME_HEADER: HeaderName = HeaderName::from_static("localname");

#[derive(Error, Debug)]
pub enum SessionError {
    #[error("Malformed login response: {0}")]
    MalformedResponse(#[from] serde_json::Error),

    #[error("Login response lists no institutes")]
    NoInstitute,

    #[error("Malformed token: {0}")]
    MalformedToken(String),
}

#[derive(Debug, Deserialize)]
struct LoginResponse {
    regdata: RegData,
}

#[derive(Debug, Deserialize)]
struct RegData {
    institutelist: Vec<InstituteEntry>,
    token: String,
    #[serde(default, deserialize_with = "lenient_string")]
    memberid: String,
    #[serde(default, deserialize_with = "lenient_string")]
    userid: String,
    #[serde(default, deserialize_with = "lenient_string")]
    clientid: String,
    #[serde(default, deserialize_with = "lenient_string")]
    membertype: String,
    #[serde(default, deserialize_with = "lenient_string")]
    name: String,
    #[serde(default, deserialize_with = "lenient_optional_string")]
    enrollmentno: Option<String>,
}

#[derive(Debug, Deserialize)]
struct InstituteEntry {
    #[serde(default, deserialize_with = "lenient_string")]
    label: String,
    #[serde(default, deserialize_with = "lenient_string")]
    value: String,
}

#[derive(Debug, Deserialize)]
struct TokenClaims {
    /// NumericDate seconds; may carry a fraction.
    exp: f64,
}

/// Accept a string, number or boolean as text; `null` reads as empty.
fn lenient_string<'de, D>(deserializer: D) -> Result<String, D::Error>
where
    D: Deserializer<'de>,
{
    Ok(lenient_optional_string(deserializer)?.unwrap_or_default())
}

fn lenient_optional_string<'de, D>(deserializer: D) -> Result<Option<String>, D::Error>
where
    D: Deserializer<'de>,
{
    match Value::deserialize(deserializer)? {
        Value::Null => Ok(None),
        Value::String(s) => Ok(Some(s)),
        Value::Number(n) => Ok(Some(n.to_string())),
        Value::Bool(b) => Ok(Some(b.to_string())),
        other => Err(de::Error::custom(format!(
            "expected a string or number, found {}",
            other
        ))),
    }
}

/// An authenticated identity on the portal.
///
/// Built once from the token-issuance response and never mutated afterwards;
/// a re-login produces a new `Session`.
#[derive(Debug, Clone)]
pub struct Session {
    raw_response: Value,
    institute: String,
    institute_id: String,
    member_id: String,
    user_id: String,
    client_id: String,
    member_type: String,
    name: String,
    enrollment_no: Option<String>,
    token: String,
    expiry: DateTime<Utc>,
}

impl Session {
    /// Build a session from the `response` field of the token-issuance call.
    pub fn from_login_response(response: Value) -> Result<Self, SessionError> {
        let parsed = LoginResponse::deserialize(&response)?;
        let regdata = parsed.regdata;

        let institute = regdata
            .institutelist
            .into_iter()
            .next()
            .ok_or(SessionError::NoInstitute)?;
        let expiry = token_expiry(&regdata.token)?;

        Ok(Self {
            raw_response: response,
            institute: institute.label,
            institute_id: institute.value,
            member_id: regdata.memberid,
            user_id: regdata.userid,
            client_id: regdata.clientid,
            member_type: regdata.membertype,
            name: regdata.name,
            enrollment_no: regdata.enrollmentno,
            token: regdata.token,
            expiry,
        })
    }

    /// Headers for an authenticated call. The `LocalName` value is minted
    /// fresh on every call.
    pub async fn auth_headers(&self, codec: &dyn PayloadCodec) -> Result<HeaderMap, CodecError> {
        let local_name = codec.generate_identity_token().await?;

        let mut headers = HeaderMap::new();
        headers.insert(
            header::AUTHORIZATION,
            HeaderValue::from_str(&format!("Bearer {}", self.token))
                .map_err(|e| CodecError::IdentityToken(format!("invalid bearer token: {}", e)))?,
        );
        headers.insert(LOCAL_NAME_HEADER, identity_header_value(&local_name)?);
        Ok(headers)
    }

    pub fn raw_response(&self) -> &Value {
        &self.raw_response
    }

    pub fn institute(&self) -> &str {
        &self.institute
    }

    pub fn institute_id(&self) -> &str {
        &self.institute_id
    }

    pub fn member_id(&self) -> &str {
        &self.member_id
    }

    pub fn user_id(&self) -> &str {
        &self.user_id
    }

    pub fn client_id(&self) -> &str {
        &self.client_id
    }

    pub fn member_type(&self) -> &str {
        &self.member_type
    }

    pub fn name(&self) -> &str {
        &self.name
    }

    pub fn enrollment_no(&self) -> Option<&str> {
        self.enrollment_no.as_deref()
    }

    pub fn token(&self) -> &str {
        &self.token
    }

    pub fn expiry(&self) -> DateTime<Utc> {
        self.expiry
    }

    /// Whether the token's own expiry has passed. Informational only; the
    /// portal's 401 is what actually ends a session.
    pub fn is_expired(&self) -> bool {
        Utc::now() > self.expiry
    }

    pub fn time_until_expiry(&self) -> Duration {
        self.expiry - Utc::now()
    }

    /// Get minutes remaining until expiry (for display)
    pub fn minutes_until_expiry(&self) -> i64 {
        self.time_until_expiry().num_minutes().max(0)
    }
}

pub(crate) fn identity_header_value(local_name: &str) -> Result<HeaderValue, CodecError> {
    HeaderValue::from_str(local_name)
        .map_err(|e| CodecError::IdentityToken(format!("invalid LocalName value: {}", e)))
}

/// Decode the `exp` claim from the middle segment of a three-part token.
fn token_expiry(token: &str) -> Result<DateTime<Utc>, SessionError> {
    let segments: Vec<&str> = token.split('.').collect();
    if segments.len() != 3 {
        return Err(SessionError::MalformedToken(format!(
            "expected 3 segments, found {}",
            segments.len()
        )));
    }

    // Accept both the url-safe alphabet and the standard one, padded or not.
    let claims_segment: String = segments[1]
        .trim_end_matches('=')
        .chars()
        .map(|c| match c {
            '+' => '-',
            '/' => '_',
            other => other,
        })
        .collect();
    let decoded = URL_SAFE_NO_PAD
        .decode(claims_segment.as_bytes())
        .map_err(|e| SessionError::MalformedToken(format!("claims are not base64: {}", e)))?;
    let claims: TokenClaims = serde_json::from_slice(&decoded)
        .map_err(|e| SessionError::MalformedToken(format!("claims are not valid JSON: {}", e)))?;

    exp_to_instant(claims.exp)
        .ok_or_else(|| SessionError::MalformedToken(format!("exp out of range: {}", claims.exp)))
}

/// Seconds since the epoch to an instant, truncated to whole milliseconds.
fn exp_to_instant(exp: f64) -> Option<DateTime<Utc>> {
    let millis = (exp * 1000.0).trunc();
    if !millis.is_finite() || millis < i64::MIN as f64 || millis >= i64::MAX as f64 {
        return None;
    }
    DateTime::<Utc>::from_timestamp_millis(millis as i64)
}
