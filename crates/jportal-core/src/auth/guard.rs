//! Precondition check for operations that need a logged-in session.

use std::future::Future;
use std::sync::Arc;

use tracing::debug;

use crate::api::{ApiError, Result};

use super::Session;

/// Return the session, or `NotLoggedIn` if there is none.
pub fn require_session(session: Option<Arc<Session>>) -> Result<Arc<Session>> {
    session.ok_or_else(|| {
        debug!("Rejected call without an established session");
        ApiError::NotLoggedIn
    })
}

/// Run `op` with the session, or fail with `NotLoggedIn` without running it.
///
/// Only presence is checked. An expired token is reported by the portal
/// itself with a 401 once the wrapped call reaches it.
pub async fn guarded<T, F, Fut>(session: Option<Arc<Session>>, op: F) -> Result<T>
where
    F: FnOnce(Arc<Session>) -> Fut,
    Fut: Future<Output = Result<T>>,
{
    let session = require_session(session)?;
    op(session).await
}
