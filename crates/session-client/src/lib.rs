//! Session client for one region's browser application.
//!
//! Holds the user's token against the home realm and moves the session
//! between `Uninitialized`, `Checking`, `Authenticated` and `Anonymous`:
//!
//! - [`SessionController::init`] checks for a provider session without UI
//!   and, when the entry URL came from a peer region's brokered link, turns
//!   an anonymous result into a brokered login redirect
//! - [`SessionController::get_valid_token`] refreshes ahead of expiry, one
//!   refresh at a time
//! - [`BrokerLink`] builds the links an authenticated application hands to
//!   peer regions
//!
//! # Example
//!
//! ```rust,ignore
//! use session_client::{InitOutcome, SessionConfig, SessionController};
//!
//! let config = SessionConfig::from_env()?;
//! let controller = Arc::new(SessionController::new(&config)?);
//! let _refresher = controller.spawn_refresh_task(Duration::from_secs(15));
//!
//! match controller.init(&entry_url).await? {
//!     InitOutcome::Redirect(url) => navigate(url),
//!     InitOutcome::Authenticated => show_app(controller.get_valid_token().await?),
//!     InitOutcome::Anonymous => show_sign_in(),
//! }
//! ```

pub mod broker_link;
pub mod config;
pub mod controller;
pub mod error;
pub mod pkce;
pub mod provider;
pub mod token;

pub use broker_link::{BrokerHint, BrokerLink, BrokerPolicy};
pub use config::SessionConfig;
pub use controller::{InitOutcome, SessionController, SessionStatus};
pub use error::SessionError;
pub use provider::{
    AuthorizationRequest, CallbackParams, IdentityProvider, OidcProvider, SilentAuthOutcome,
};
pub use token::TokenSet;
