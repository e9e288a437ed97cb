//! Authentication module for the login handshake and session state.
//!
//! This module provides:
//! - `LoginFlow`: the two-step pre-check / token-issuance handshake
//! - `Session`: the immutable identity built from the token response
//! - `guard`: the not-logged-in precondition for privileged calls
//! - `CredentialStore`: OS-level password storage via keyring
//!
//! Token expiry comes from the token's own `exp` claim.

pub mod credentials;
pub mod guard;
pub mod login;
pub mod session;

pub use credentials::CredentialStore;
pub use guard::{guarded, require_session};
pub use login::{Captcha, LoginFlow};
pub use session::{Session, SessionError};
