//! OAuth Token Cache
//!
//! Token *generation* happens offline (operator scripts); this crate only
//! keeps the resulting tokens fresh. The cache reads `{accessToken,
//! refreshToken, expiry}` from a configured token file, refreshes through
//! the provider's token endpoint when expiry is near, and persists the
//! rotated tokens atomically back to the same path.
//!
//! ## Security
//!
//! Token values are never logged. Log lines carry booleans and expiry
//! timestamps only.

pub mod error;
pub mod token_cache;
pub mod types;

pub use error::{AuthError, Result};
pub use token_cache::{TokenCache, TokenCacheConfig};
pub use types::{ClientCredentials, OAuthTokens};
