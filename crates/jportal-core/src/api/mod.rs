//! Request pipeline for the student portal API.
//!
//! This module provides the `PortalClient` that owns the active session,
//! the stateless `Dispatcher` every call passes through, and the typed
//! errors calls fail with.
//!
//! The portal wraps every response in a status envelope; only a
//! `responseStatus` of `"Success"` counts as success, whatever the HTTP
//! status says.

pub mod client;
pub mod dispatcher;
pub mod error;
pub mod transport;

pub use client::{PortalClient, API_BASE_URL};
pub use dispatcher::{Dispatcher, RequestBody, RequestDescriptor};
pub use error::{ApiError, ErrorKind, FailureReason, Result};
pub use transport::{HttpRequest, HttpResponse, HttpTransport, Transport, TransportError};
