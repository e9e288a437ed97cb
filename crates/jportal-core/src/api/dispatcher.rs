//! Request dispatch: header derivation, body encoding, and interpretation of
//! the portal's response envelope.
//!
//! Every call on the portal, authenticated or not, passes through
//! [`Dispatcher::dispatch`].

use std::sync::Arc;

use reqwest::header::{self, HeaderMap, HeaderValue};
use reqwest::Method;
use serde_json::Value;
use tracing::{debug, warn};

use crate::auth::session::{identity_header_value, LOCAL_NAME_HEADER};
use crate::auth::Session;
use crate::codec::PayloadCodec;

use super::error::{ApiError, ErrorKind, FailureReason, Result};
use super::transport::{HttpRequest, Transport};

/// Portal-specific status meaning "temporarily unavailable"
const STATUS_PORTAL_UNAVAILABLE: u16 = 513;

const STATUS_UNAUTHORIZED: u16 = 401;

/// The only `status.responseStatus` value treated as success
const RESPONSE_STATUS_SUCCESS: &str = "Success";

#[derive(Debug, Clone, Default)]
pub enum RequestBody {
    #[default]
    Empty,
    /// Structured body, serialized as JSON on the wire.
    Json(Value),
    /// Body already passed through the payload codec; sent unchanged.
    Raw(String),
}

/// One outgoing call. Built fresh per request.
#[derive(Debug, Clone)]
pub struct RequestDescriptor {
    pub method: Method,
    pub url: String,
    pub body: RequestBody,
    pub headers: HeaderMap,
    pub authenticated: bool,
    pub error_kind: ErrorKind,
}

impl RequestDescriptor {
    pub fn new(method: Method, url: impl Into<String>) -> Self {
        Self {
            method,
            url: url.into(),
            body: RequestBody::Empty,
            headers: HeaderMap::new(),
            authenticated: false,
            error_kind: ErrorKind::Api,
        }
    }

    pub fn post(url: impl Into<String>) -> Self {
        Self::new(Method::POST, url)
    }

    pub fn get(url: impl Into<String>) -> Self {
        Self::new(Method::GET, url)
    }

    pub fn json(mut self, body: Value) -> Self {
        self.body = RequestBody::Json(body);
        self
    }

    pub fn raw(mut self, body: String) -> Self {
        self.body = RequestBody::Raw(body);
        self
    }

    pub fn header(mut self, name: header::HeaderName, value: HeaderValue) -> Self {
        self.headers.insert(name, value);
        self
    }

    pub fn authenticated(mut self) -> Self {
        self.authenticated = true;
        self
    }

    pub fn error_kind(mut self, kind: ErrorKind) -> Self {
        self.error_kind = kind;
        self
    }
}

/// Stateless request dispatcher.
/// Clone is cheap - the transport and codec are shared.
#[derive(Clone)]
pub struct Dispatcher {
    transport: Arc<dyn Transport>,
    codec: Arc<dyn PayloadCodec>,
}

impl Dispatcher {
    pub fn new(transport: Arc<dyn Transport>, codec: Arc<dyn PayloadCodec>) -> Self {
        Self { transport, codec }
    }

    pub fn codec(&self) -> &dyn PayloadCodec {
        self.codec.as_ref()
    }

    /// Send a request and return the decoded body of a `Success` envelope.
    ///
    /// `session` is only consulted when the descriptor is authenticated; the
    /// caller is expected to have checked it with the auth guard first.
    pub async fn dispatch(
        &self,
        descriptor: RequestDescriptor,
        session: Option<&Session>,
    ) -> Result<Value> {
        let kind = descriptor.error_kind;
        let derived = self.derive_headers(descriptor.authenticated, session, kind).await?;

        let mut headers = HeaderMap::new();
        headers.insert(header::CONTENT_TYPE, HeaderValue::from_static("application/json"));
        // Caller headers first so the derived identity headers always win.
        headers.extend(descriptor.headers);
        headers.extend(derived);

        let body = match descriptor.body {
            RequestBody::Empty => None,
            RequestBody::Json(value) => Some(value.to_string()),
            RequestBody::Raw(raw) => Some(raw),
        };

        let request = HttpRequest {
            method: descriptor.method,
            url: descriptor.url,
            headers,
            body,
        };
        let url = request.url.clone();

        let response = self.transport.send(request).await.map_err(|e| {
            warn!(url = %url, error = %e, "Transport failure");
            ApiError::failed(kind, FailureReason::Transport(e.to_string()))
        })?;

        if response.status == STATUS_PORTAL_UNAVAILABLE {
            warn!(url = %url, "Portal temporarily unavailable");
            return Err(ApiError::failed(kind, FailureReason::PortalUnavailable));
        }
        if response.status == STATUS_UNAUTHORIZED {
            if descriptor.authenticated {
                debug!(url = %url, "Session rejected by portal");
                return Err(ApiError::SessionExpired);
            }
            return Err(ApiError::failed(kind, FailureReason::Unauthorized));
        }

        let body: Value = serde_json::from_str(&response.body).map_err(|e| {
            ApiError::failed(
                kind,
                FailureReason::InvalidResponse(format!(
                    "HTTP {}: {}: {}",
                    response.status,
                    e,
                    ApiError::truncate_body(&response.body)
                )),
            )
        })?;

        check_envelope(&body, kind)?;
        debug!(url = %url, "Request succeeded");
        Ok(body)
    }

    async fn derive_headers(
        &self,
        authenticated: bool,
        session: Option<&Session>,
        kind: ErrorKind,
    ) -> Result<HeaderMap> {
        if authenticated {
            let session = session.ok_or(ApiError::NotLoggedIn)?;
            return session
                .auth_headers(self.codec.as_ref())
                .await
                .map_err(|e| ApiError::from_codec(kind, e));
        }

        let local_name = self
            .codec
            .generate_identity_token()
            .await
            .map_err(|e| ApiError::from_codec(kind, e))?;
        let mut headers = HeaderMap::new();
        headers.insert(
            LOCAL_NAME_HEADER,
            identity_header_value(&local_name).map_err(|e| ApiError::from_codec(kind, e))?,
        );
        Ok(headers)
    }
}

/// Fail unless `status.responseStatus` is exactly `"Success"`.
fn check_envelope(body: &Value, kind: ErrorKind) -> Result<()> {
    let status = body.get("status");
    let response_status = status
        .and_then(|s| s.get("responseStatus"))
        .and_then(Value::as_str);

    if response_status == Some(RESPONSE_STATUS_SUCCESS) {
        return Ok(());
    }

    let envelope = match status {
        Some(status) => serde_json::to_string_pretty(status).unwrap_or_else(|_| status.to_string()),
        None => body.to_string(),
    };
    warn!(?response_status, "Portal rejected request");
    Err(ApiError::failed(
        kind,
        FailureReason::Status(ApiError::truncate_body(&envelope)),
    ))
}
