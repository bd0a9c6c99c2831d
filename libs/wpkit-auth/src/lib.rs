#![cfg_attr(coverage_nightly, feature(coverage_attribute))]
#![warn(warnings)]

//! Authenticators for the `wpkit` WordPress client
//!
//! - [`TokenAdapter`] - bearer token for WordPress.com and application passwords
//! - [`CookieNonceAuthenticator`] - session cookie plus REST nonce for
//!   self-hosted sites, obtained by logging in when a request is rejected
//!
//! Both convert into a [`wpkit_http::Authenticator`]:
//!
//! ```ignore
//! use wpkit_auth::TokenAdapter;
//! use wpkit_http::HttpClient;
//!
//! let client = HttpClient::builder()
//!     .authenticator(TokenAdapter::new(token).into())
//!     .build()?;
//! ```

mod cookie_nonce;
mod credentials;
mod error;
mod nonce;
mod token;

pub use cookie_nonce::{CookieNonceAuthenticator, NONCE_HEADER};
pub use credentials::Credentials;
pub use error::HandshakeError;
pub use nonce::NonceRetrieval;
pub use token::TokenAdapter;
