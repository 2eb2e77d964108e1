//! Authentication and credential handling.
//!
//! Two credential kinds gate the account methods:
//!
//! - **Personal access tokens**: opaque tokens passed in the `Authorization`
//!   header (with or without a `Bearer ` prefix) and resolved against the
//!   accounts store. See [`personal_access`].
//! - **Trusted applications**: password-reset methods carry no token, so the
//!   caller must instead present an app identifier whose `appId@origin` pair
//!   matches a configured pattern. See [`trusted_apps`].
//!
//! [`password`] holds the Argon2 hashing and reset-token primitives shared by
//! the pipeline steps and the reset-request store.
//!
//! # Usage in Handlers
//!
//! ```ignore
//! use pdvault::auth::personal_access::PersonalAccess;
//!
//! async fn get_account(PersonalAccess(account): PersonalAccess) -> Result<Json<AccountDetails>> {
//!     Ok(Json(account.into()))
//! }
//! ```

pub mod password;
pub mod personal_access;
pub mod trusted_apps;

pub use personal_access::PersonalAccess;
pub use trusted_apps::TrustedApps;
