//! Portal client holding the active session.
//!
//! `PortalClient` starts anonymous. A successful [`PortalClient::login`]
//! installs a [`Session`]; a later login replaces it wholesale. Endpoint
//! methods go through the auth guard and then the dispatcher.

use std::sync::Arc;
use std::time::Duration;

use serde_json::{json, Value};
use tokio::sync::RwLock;
use tracing::debug;

use crate::auth::guard::guarded;
use crate::auth::login::{Captcha, LoginFlow};
use crate::auth::Session;
use crate::codec::PayloadCodec;
use crate::config::Config;

use super::dispatcher::{Dispatcher, RequestDescriptor};
use super::error::{ApiError, ErrorKind, FailureReason, Result};
use super::transport::{HttpTransport, Transport};

// ============================================================================
// Constants
// ============================================================================

/// Base URL of the student portal API
pub const API_BASE_URL: &str = "https://webportal.jiit.ac.in:6011/StudentPortalAPI";

const PERSONAL_INFO_ENDPOINT: &str = "/studentpersinfo/getstudent-personalinformation";
const HOSTEL_DETAILS_ENDPOINT: &str = "/myhostelallocationdetail/gethostelallocationdetail";
const ATTENDANCE_META_ENDPOINT: &str =
    "/StudentClassAttendance/getstudentInforegistrationforattendence";
const CHANGE_PASSWORD_ENDPOINT: &str = "/clxuser/changepassword";

/// Client id the personal-information endpoint expects
const PERSONAL_INFO_CLIENT_ID: &str = "SOAU";

pub struct PortalClient {
    dispatcher: Dispatcher,
    api_base: String,
    session: RwLock<Option<Arc<Session>>>,
}

impl PortalClient {
    /// Create a client talking to `config.api_base` over HTTP.
    pub fn new(config: &Config, codec: Arc<dyn PayloadCodec>) -> Result<Self> {
        let transport = HttpTransport::new(Duration::from_secs(config.request_timeout_secs))
            .map_err(|e| ApiError::failed(ErrorKind::Api, FailureReason::Transport(e.to_string())))?;
        Ok(Self::with_transport(
            Arc::new(transport),
            codec,
            config.api_base.clone(),
        ))
    }

    pub fn with_transport(
        transport: Arc<dyn Transport>,
        codec: Arc<dyn PayloadCodec>,
        api_base: impl Into<String>,
    ) -> Self {
        Self {
            dispatcher: Dispatcher::new(transport, codec),
            api_base: api_base.into().trim_end_matches('/').to_string(),
            session: RwLock::new(None),
        }
    }

    pub fn api_base(&self) -> &str {
        &self.api_base
    }

    /// The current session, if logged in.
    pub async fn session(&self) -> Option<Arc<Session>> {
        self.session.read().await.clone()
    }

    pub async fn is_logged_in(&self) -> bool {
        self.session.read().await.is_some()
    }

    /// Log in as a student and install the new session.
    ///
    /// On failure the previous session, if any, is left in place.
    pub async fn login(&self, username: &str, password: &str) -> Result<Arc<Session>> {
        self.login_with_captcha(username, password, &Captcha::default())
            .await
    }

    pub async fn login_with_captcha(
        &self,
        username: &str,
        password: &str,
        captcha: &Captcha,
    ) -> Result<Arc<Session>> {
        let session = LoginFlow::new(&self.dispatcher, &self.api_base)
            .login(username, password, captcha)
            .await?;
        let session = Arc::new(session);
        *self.session.write().await = Some(session.clone());
        Ok(session)
    }

    /// Run `op` with the current session, failing with `NotLoggedIn` first
    /// if there is none.
    pub async fn authenticated<T, F, Fut>(&self, op: F) -> Result<T>
    where
        F: FnOnce(Arc<Session>) -> Fut,
        Fut: std::future::Future<Output = Result<T>>,
    {
        guarded(self.session().await, op).await
    }

    /// POST `payload` as `session` to `endpoint` and return the `response` field.
    pub async fn post_as(
        &self,
        session: &Session,
        endpoint: &str,
        payload: Value,
        kind: ErrorKind,
    ) -> Result<Value> {
        let descriptor = RequestDescriptor::post(self.url(endpoint))
            .json(payload)
            .authenticated()
            .error_kind(kind);
        let mut body = self.dispatcher.dispatch(descriptor, Some(session)).await?;
        Ok(body.get_mut("response").map(Value::take).unwrap_or(Value::Null))
    }

    /// Authenticated POST to any endpoint, returning the `response` field.
    pub async fn call(&self, endpoint: &str, payload: Value, kind: ErrorKind) -> Result<Value> {
        self.authenticated(|session| async move {
            self.post_as(&session, endpoint, payload, kind).await
        })
        .await
    }

    /// Unauthenticated POST, returning the `response` field.
    pub async fn call_anonymous(
        &self,
        endpoint: &str,
        payload: Value,
        kind: ErrorKind,
    ) -> Result<Value> {
        let descriptor = RequestDescriptor::post(self.url(endpoint))
            .json(payload)
            .error_kind(kind);
        let mut body = self.dispatcher.dispatch(descriptor, None).await?;
        Ok(body.get_mut("response").map(Value::take).unwrap_or(Value::Null))
    }

    // ===== Endpoint Methods =====

    pub async fn get_personal_info(&self) -> Result<Value> {
        self.authenticated(|session| async move {
            let payload = json!({
                "clinetid": PERSONAL_INFO_CLIENT_ID,
                "instituteid": session.institute_id(),
            });
            self.post_as(&session, PERSONAL_INFO_ENDPOINT, payload, ErrorKind::Api)
                .await
        })
        .await
    }

    pub async fn get_hostel_details(&self) -> Result<Value> {
        self.authenticated(|session| async move {
            let payload = json!({
                "clientid": session.client_id(),
                "instituteid": session.institute_id(),
                "studentid": session.member_id(),
            });
            let response = self
                .post_as(&session, HOSTEL_DETAILS_ENDPOINT, payload, ErrorKind::Api)
                .await?;
            if is_missing_response(&response) {
                return Err(ApiError::failed(
                    ErrorKind::Api,
                    FailureReason::Rejected("Hostel details not found".to_string()),
                ));
            }
            Ok(response)
        })
        .await
    }

    pub async fn get_attendance_meta(&self) -> Result<Value> {
        self.authenticated(|session| async move {
            let payload = json!({
                "clientid": session.client_id(),
                "instituteid": session.institute_id(),
                "membertype": session.member_type(),
            });
            self.post_as(&session, ATTENDANCE_META_ENDPOINT, payload, ErrorKind::Api)
                .await
        })
        .await
    }

    /// Change the account password. Failures are reported as account errors.
    pub async fn change_password(&self, old_password: &str, new_password: &str) -> Result<Value> {
        self.authenticated(|session| async move {
            debug!(member = session.member_id(), "Changing password");
            let payload = json!({
                "membertype": session.member_type(),
                "oldpassword": old_password,
                "newpassword": new_password,
                "confirmpassword": new_password,
            });
            self.post_as(&session, CHANGE_PASSWORD_ENDPOINT, payload, ErrorKind::Account)
                .await
        })
        .await
    }

    fn url(&self, endpoint: &str) -> String {
        format!("{}{}", self.api_base, endpoint)
    }
}

/// A `response` the portal uses to mean "nothing here": null, false, zero
/// or an empty string. Empty objects and arrays are real answers.
fn is_missing_response(response: &Value) -> bool {
    match response {
        Value::Null => true,
        Value::Bool(b) => !b,
        Value::Number(n) => n.as_f64() == Some(0.0),
        Value::String(s) => s.is_empty(),
        Value::Object(_) | Value::Array(_) => false,
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::auth::session::tests::{login_response, make_token};
    use crate::test_support::{ScriptedTransport, SequentialCodec};

    const BASE: &str = "https://portal.test/StudentPortalAPI";

    fn client(transport: Arc<ScriptedTransport>) -> PortalClient {
        PortalClient::with_transport(transport, Arc::new(SequentialCodec::default()), BASE)
    }

    fn queue_login(transport: &ScriptedTransport, token: &str) {
        transport.push_success(json!({"username": "21103001", "rejectedData": {}}));
        transport.push_success(login_response(token));
    }

    fn token(exp: i64) -> String {
        make_token(&json!({"exp": exp}))
    }

    #[tokio::test]
    async fn test_starts_anonymous() {
        let transport = Arc::new(ScriptedTransport::new());
        let client = client(transport);
        assert!(!client.is_logged_in().await);
        assert!(client.session().await.is_none());
    }

    #[tokio::test]
    async fn test_endpoints_before_login_make_no_network_calls() {
        let transport = Arc::new(ScriptedTransport::new());
        let client = client(transport.clone());

        assert!(matches!(client.get_personal_info().await, Err(ApiError::NotLoggedIn)));
        assert!(matches!(client.get_hostel_details().await, Err(ApiError::NotLoggedIn)));
        assert!(matches!(client.get_attendance_meta().await, Err(ApiError::NotLoggedIn)));
        assert!(matches!(
            client.change_password("old", "new").await,
            Err(ApiError::NotLoggedIn)
        ));
        assert!(matches!(
            client.call("/any/endpoint", json!({}), ErrorKind::Api).await,
            Err(ApiError::NotLoggedIn)
        ));

        assert_eq!(transport.calls(), 0);
    }

    #[tokio::test]
    async fn test_login_installs_session() {
        let transport = Arc::new(ScriptedTransport::new());
        let client = client(transport.clone());
        queue_login(&transport, &token(1_900_000_000));

        let session = client.login("21103001", "hunter2").await.unwrap();

        assert!(client.is_logged_in().await);
        assert!(Arc::ptr_eq(&session, &client.session().await.unwrap()));
    }

    #[tokio::test]
    async fn test_failed_login_leaves_client_anonymous() {
        let transport = Arc::new(ScriptedTransport::new());
        let client = client(transport.clone());
        transport.push(200, json!({"status": {"responseStatus": "Failure"}}));

        let err = client.login("21103001", "wrong").await.unwrap_err();

        assert_eq!(err.kind(), Some(ErrorKind::Login));
        assert!(!client.is_logged_in().await);
    }

    #[tokio::test]
    async fn test_authenticated_endpoint_payload_and_headers() {
        let transport = Arc::new(ScriptedTransport::new());
        let client = client(transport.clone());
        let token = token(1_900_000_000);
        queue_login(&transport, &token);
        client.login("21103001", "hunter2").await.unwrap();

        transport.push_success(json!({"studentname": "Asha Verma"}));
        let info = client.get_personal_info().await.unwrap();
        assert_eq!(info["studentname"], "Asha Verma");

        let request = transport.requests().pop().unwrap();
        assert_eq!(
            request.url,
            format!("{}/studentpersinfo/getstudent-personalinformation", BASE)
        );
        assert_eq!(
            request.headers.get("Authorization").unwrap(),
            format!("Bearer {}", token).as_str()
        );
        let body: Value = serde_json::from_str(request.body.as_deref().unwrap()).unwrap();
        assert_eq!(
            body,
            json!({"clinetid": "SOAU", "instituteid": "11IN1902J000001"})
        );
    }

    #[tokio::test]
    async fn test_attendance_meta_payload() {
        let transport = Arc::new(ScriptedTransport::new());
        let client = client(transport.clone());
        queue_login(&transport, &token(1_900_000_000));
        client.login("21103001", "hunter2").await.unwrap();

        transport.push_success(json!({"semlist": []}));
        client.get_attendance_meta().await.unwrap();

        let request = transport.requests().pop().unwrap();
        let body: Value = serde_json::from_str(request.body.as_deref().unwrap()).unwrap();
        assert_eq!(
            body,
            json!({"clientid": "JAYPEE", "instituteid": "11IN1902J000001", "membertype": "S"})
        );
    }

    #[tokio::test]
    async fn test_hostel_details_empty_is_error() {
        let transport = Arc::new(ScriptedTransport::new());
        let client = client(transport.clone());
        queue_login(&transport, &token(1_900_000_000));
        client.login("21103001", "hunter2").await.unwrap();

        transport.push_success(Value::Null);
        let err = client.get_hostel_details().await.unwrap_err();
        assert!(matches!(
            err,
            ApiError::Failed {
                kind: ErrorKind::Api,
                reason: FailureReason::Rejected(_)
            }
        ));

        transport.push_success(json!({"hostelname": "H4"}));
        let hostel = client.get_hostel_details().await.unwrap();
        assert_eq!(hostel["hostelname"], "H4");

        let request = transport.requests().pop().unwrap();
        let body: Value = serde_json::from_str(request.body.as_deref().unwrap()).unwrap();
        assert_eq!(body["studentid"], "JIIT2100001");
    }

    #[tokio::test]
    async fn test_change_password_failure_is_account_error() {
        let transport = Arc::new(ScriptedTransport::new());
        let client = client(transport.clone());
        queue_login(&transport, &token(1_900_000_000));
        client.login("21103001", "hunter2").await.unwrap();

        transport.push(200, json!({"status": {"responseStatus": "Failure"}}));
        let err = client.change_password("hunter2", "hunter3").await.unwrap_err();
        assert_eq!(err.kind(), Some(ErrorKind::Account));

        let request = transport.requests().pop().unwrap();
        let body: Value = serde_json::from_str(request.body.as_deref().unwrap()).unwrap();
        assert_eq!(body["newpassword"], "hunter3");
        assert_eq!(body["confirmpassword"], "hunter3");
    }

    #[tokio::test]
    async fn test_401_does_not_reset_session() {
        let transport = Arc::new(ScriptedTransport::new());
        let client = client(transport.clone());
        queue_login(&transport, &token(1_900_000_000));
        client.login("21103001", "hunter2").await.unwrap();

        transport.push_raw(401, "");
        let err = client.get_personal_info().await.unwrap_err();

        assert!(matches!(err, ApiError::SessionExpired));
        assert!(client.is_logged_in().await);
    }

    #[tokio::test]
    async fn test_expired_token_is_still_sent() {
        let transport = Arc::new(ScriptedTransport::new());
        let client = client(transport.clone());
        queue_login(&transport, &token(1_000_000_000));
        let session = client.login("21103001", "hunter2").await.unwrap();
        assert!(session.is_expired());

        transport.push_success(json!({}));
        client.get_personal_info().await.unwrap();
        assert_eq!(transport.calls(), 3);
    }

    #[tokio::test]
    async fn test_relogin_replaces_session_but_not_captured_one() {
        let transport = Arc::new(ScriptedTransport::new());
        let client = client(transport.clone());
        let first_token = token(1_900_000_000);
        let second_token = token(1_900_003_600);

        queue_login(&transport, &first_token);
        let first = client.login("21103001", "hunter2").await.unwrap();

        queue_login(&transport, &second_token);
        let second = client.login("21103001", "hunter2").await.unwrap();

        assert!(!Arc::ptr_eq(&first, &second));
        assert_eq!(first.token(), first_token);
        assert_eq!(client.session().await.unwrap().token(), second_token);

        // A call that captured the first session keeps using its token
        transport.push_success(json!({}));
        client
            .post_as(&first, "/any/endpoint", json!({}), ErrorKind::Api)
            .await
            .unwrap();
        let request = transport.requests().pop().unwrap();
        assert_eq!(
            request.headers.get("Authorization").unwrap(),
            format!("Bearer {}", first_token).as_str()
        );
    }

    #[tokio::test]
    async fn test_concurrent_calls_share_session() {
        let transport = Arc::new(ScriptedTransport::new());
        let client = client(transport.clone());
        queue_login(&transport, &token(1_900_000_000));
        client.login("21103001", "hunter2").await.unwrap();
        transport.push_success(json!({"a": 1}));
        transport.push_success(json!({"b": 2}));

        let (a, b) = futures::join!(
            client.call("/one", json!({}), ErrorKind::Api),
            client.call("/two", json!({}), ErrorKind::Api),
        );
        assert!(a.is_ok());
        assert!(b.is_ok());

        let local_names: Vec<String> = transport
            .requests()
            .iter()
            .skip(2)
            .map(|r| r.headers.get("LocalName").unwrap().to_str().unwrap().to_string())
            .collect();
        assert_eq!(local_names.len(), 2);
        assert_ne!(local_names[0], local_names[1]);
    }

    #[tokio::test]
    async fn test_call_anonymous_has_no_authorization() {
        let transport = Arc::new(ScriptedTransport::new());
        let client = client(transport.clone());

        transport.push_success(json!({"open": true}));
        let response = client
            .call_anonymous("/public/info", json!({}), ErrorKind::Api)
            .await
            .unwrap();

        assert_eq!(response["open"], true);
        assert!(transport.requests()[0].headers.get("Authorization").is_none());
    }

    #[test]
    fn test_is_missing_response() {
        assert!(is_missing_response(&Value::Null));
        assert!(is_missing_response(&json!(false)));
        assert!(is_missing_response(&json!(0)));
        assert!(is_missing_response(&json!(0.0)));
        assert!(is_missing_response(&json!("")));
        assert!(!is_missing_response(&json!({})));
        assert!(!is_missing_response(&json!([])));
        assert!(!is_missing_response(&json!({"a": 1})));
        assert!(!is_missing_response(&json!(true)));
        assert!(!is_missing_response(&json!(3)));
        assert!(!is_missing_response(&json!("H4")));
    }

    #[tokio::test]
    async fn test_hostel_details_accepts_empty_object() {
        let transport = Arc::new(ScriptedTransport::new());
        let client = client(transport.clone());
        queue_login(&transport, &token(1_900_000_000));
        client.login("21103001", "hunter2").await.unwrap();

        transport.push_success(json!({}));
        assert_eq!(client.get_hostel_details().await.unwrap(), json!({}));

        transport.push_success(json!(false));
        assert!(matches!(
            client.get_hostel_details().await,
            Err(ApiError::Failed {
                reason: FailureReason::Rejected(_),
                ..
            })
        ));
    }

    #[test]
    fn test_api_base_trailing_slash_trimmed() {
        let client = PortalClient::with_transport(
            Arc::new(ScriptedTransport::new()),
            Arc::new(SequentialCodec::default()),
            "https://portal.test/api/",
        );
        assert_eq!(client.api_base(), "https://portal.test/api");
        assert_eq!(client.url("/x"), "https://portal.test/api/x");
    }
}
