//! Two-step login handshake.
//!
//! 1. `pretoken-check` with the username and captcha.
//! 2. `generate-token1` with the pre-check response, the module name and the
//!    password.
//!
//! The second response carries the registration data a [`Session`] is built
//! from.

use serde::{Deserialize, Serialize};
use serde_json::{json, Value};
use tracing::{debug, info};

use crate::api::dispatcher::{Dispatcher, RequestDescriptor};
use crate::api::{ApiError, ErrorKind, FailureReason, Result};

use super::Session;

const PRETOKEN_ENDPOINT: &str = "/token/pretoken-check";
const TOKEN_ENDPOINT: &str = "/token/generate-token1";

/// Portal user type for students
const USER_TYPE_STUDENT: &str = "S";
const MODULE_NAME: &str = "STUDENTMODULE";

/// Field the portal reads the password from in the token request
const PASSWORD_FIELD: &str = "passwordotpvalue";

/// Validation echo returned by the pre-check; must not be sent back.
const REJECTED_DATA_FIELD: &str = "rejectedData";

/// Captcha answer sent with the pre-check.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Captcha {
    pub captcha: String,
    pub hidden: String,
}

impl Default for Captcha {
    /// A captcha pair the portal accepts without a fresh challenge.
    fn default() -> Self {
        Self {
            captcha: "phw5n".to_string(),
            hidden: "gmBctEffdSg=".to_string(),
        }
    }
}

pub struct LoginFlow<'a> {
    dispatcher: &'a Dispatcher,
    api_base: &'a str,
}

impl<'a> LoginFlow<'a> {
    pub fn new(dispatcher: &'a Dispatcher, api_base: &'a str) -> Self {
        Self {
            dispatcher,
            api_base,
        }
    }

    /// Run the handshake and build a session. Nothing is kept on failure.
    pub async fn login(&self, username: &str, password: &str, captcha: &Captcha) -> Result<Session> {
        debug!(username, "Starting pre-token check");
        let precheck = json!({
            "username": username,
            "usertype": USER_TYPE_STUDENT,
            "captcha": captcha,
        });
        let precheck_response = self.post_encoded(PRETOKEN_ENDPOINT, &precheck).await?;

        let token_payload = token_request_payload(precheck_response, password)?;
        debug!(username, "Requesting token");
        let token_response = self.post_encoded(TOKEN_ENDPOINT, &token_payload).await?;

        let session = Session::from_login_response(token_response)?;
        info!(
            username,
            institute = session.institute(),
            expiry = %session.expiry(),
            "Login successful"
        );
        Ok(session)
    }

    /// Encode `payload` with the codec, post it anonymously, and return the
    /// `response` field.
    async fn post_encoded(&self, endpoint: &str, payload: &Value) -> Result<Value> {
        let body = self
            .dispatcher
            .codec()
            .encode(payload)
            .await
            .map_err(|e| ApiError::from_codec(ErrorKind::Login, e))?;

        let descriptor = RequestDescriptor::post(format!("{}{}", self.api_base, endpoint))
            .raw(body)
            .error_kind(ErrorKind::Login);
        let mut body = self.dispatcher.dispatch(descriptor, None).await?;

        match body.get_mut("response").map(Value::take) {
            Some(response) if !response.is_null() => Ok(response),
            _ => Err(ApiError::failed(
                ErrorKind::Login,
                FailureReason::InvalidResponse(format!("{} returned no response field", endpoint)),
            )),
        }
    }
}

/// Turn the pre-check `response` into the token request payload.
fn token_request_payload(precheck_response: Value, password: &str) -> Result<Value> {
    let Value::Object(mut payload) = precheck_response else {
        return Err(ApiError::failed(
            ErrorKind::Login,
            FailureReason::InvalidResponse("pre-token check response is not an object".to_string()),
        ));
    };

    payload.remove(REJECTED_DATA_FIELD);
    payload.insert("Modulename".to_string(), Value::from(MODULE_NAME));
    payload.insert(PASSWORD_FIELD.to_string(), Value::from(password));
    Ok(Value::Object(payload))
}
