//! Client library for the JIIT student web portal.
//!
//! Logging in runs a two-step handshake that yields a bearer-token
//! [`Session`]; every later call carries that token plus a fresh per-request
//! identity header minted by a [`PayloadCodec`].
//!
//! ```no_run
//! # async fn run() -> jportal_core::api::Result<()> {
//! use std::sync::Arc;
//! use jportal_core::{Config, PassthroughCodec, PortalClient};
//!
//! let client = PortalClient::new(&Config::default(), Arc::new(PassthroughCodec))?;
//! client.login("21103001", "password").await?;
//! let info = client.get_personal_info().await?;
//! # Ok(())
//! # }
//! ```

pub mod api;
pub mod auth;
pub mod codec;
pub mod config;

#[cfg(test)]
mod test_support;

pub use api::{ApiError, ErrorKind, PortalClient};
pub use auth::{Captcha, CredentialStore, Session};
pub use codec::{PassthroughCodec, PayloadCodec};
pub use config::Config;
