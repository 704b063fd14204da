//! Ready-made policies for common endpoint classes
//!
//! | Preset                            | Window     | Requests | Key               |
//! |-----------------------------------|------------|----------|-------------------|
//! | [`auth`]                          | 15 minutes | 5        | client IP         |
//! | [`create_account`]                | 1 hour     | 3        | client IP         |
//! | [`password_reset`]                | 1 hour     | 3        | email, client IP  |
//! | [`upload`]                        | 1 hour     | 50       | user, client IP   |
//! | [`api`]                           | 15 minutes | 100      | client IP         |
//!
//! Every preset is a plain [`Policy`] and can be adjusted further:
//!
//! ```no_run
//! use tollgate::{by, presets};
//!
//! let login = presets::auth()
//!     .with_key(by::ip().trust_proxy())
//!     .with_skip(|ctx| ctx.identity() == Some("health-check"));
//! ```

use std::fmt::{Display, Formatter};
use std::str::FromStr;
use std::time::Duration;
use serde::Deserialize;
use crate::{by, error::Error, Policy};

const MINUTE: u64 = 60;
const HOUR: u64 = 60 * MINUTE;

/// A named preset, selectable from external configuration.
///
/// Parses from and deserializes as `"auth"`, `"create-account"`,
/// `"password-reset"`, `"upload"` or `"api"`.
///
/// # Example
/// ```no_run
/// use tollgate::presets::Preset;
///
/// let preset: Preset = "password-reset".parse().unwrap();
/// assert_eq!(preset.policy().max_requests(), 3);
/// ```
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Deserialize)]
#[serde(rename_all = "kebab-case")]
pub enum Preset {
    /// Login and logout, see [`auth`]
    Auth,

    /// Registration, see [`create_account`]
    #[serde(alias = "createAccount")]
    CreateAccount,

    /// Password reset requests, see [`password_reset`]
    #[serde(alias = "passwordReset")]
    PasswordReset,

    /// File uploads, see [`upload`]
    Upload,

    /// Generic endpoints, see [`api`]
    Api,
}

impl Preset {
    /// All presets
    pub const ALL: [Preset; 5] = [
        Preset::Auth,
        Preset::CreateAccount,
        Preset::PasswordReset,
        Preset::Upload,
        Preset::Api,
    ];

    /// Returns the name the preset's policy is registered under
    #[inline]
    pub fn name(self) -> &'static str {
        match self {
            Preset::Auth => "auth",
            Preset::CreateAccount => "create-account",
            Preset::PasswordReset => "password-reset",
            Preset::Upload => "upload",
            Preset::Api => "api",
        }
    }

    /// Builds the preset's policy
    #[inline]
    pub fn policy(self) -> Policy {
        match self {
            Preset::Auth => auth(),
            Preset::CreateAccount => create_account(),
            Preset::PasswordReset => password_reset(),
            Preset::Upload => upload(),
            Preset::Api => api(),
        }
    }
}

impl Display for Preset {
    #[inline]
    fn fmt(&self, f: &mut Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.name())
    }
}

impl FromStr for Preset {
    type Err = Error;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "auth" => Ok(Preset::Auth),
            "create-account" | "createAccount" => Ok(Preset::CreateAccount),
            "password-reset" | "passwordReset" => Ok(Preset::PasswordReset),
            "upload" => Ok(Preset::Upload),
            "api" => Ok(Preset::Api),
            _ => Err(Error::invalid_configuration(format!("unknown preset: {s}"))),
        }
    }
}

/// Login and logout: 5 requests per 15 minutes per client IP.
#[inline]
pub fn auth() -> Policy {
    Policy::new(5, Duration::from_secs(15 * MINUTE))
        .with_name(Preset::Auth.name())
        .with_message("Too many authentication attempts, please try again later")
}

/// Registration: 3 requests per hour per client IP.
#[inline]
pub fn create_account() -> Policy {
    Policy::new(3, Duration::from_secs(HOUR))
        .with_name(Preset::CreateAccount.name())
        .with_message("Too many accounts created from this address, please try again later")
}

/// Password reset: 3 requests per hour per email, or per client IP
/// if the request body carries no email.
#[inline]
pub fn password_reset() -> Policy {
    Policy::new(3, Duration::from_secs(HOUR))
        .with_name(Preset::PasswordReset.name())
        .with_key(by::body_field("email").or(by::ip()))
        .with_message("Too many password reset requests, please try again later")
}

/// File uploads: 50 requests per hour per user, or per client IP
/// for anonymous requests.
#[inline]
pub fn upload() -> Policy {
    Policy::new(50, Duration::from_secs(HOUR))
        .with_name(Preset::Upload.name())
        .with_key(by::user().or(by::ip()))
        .with_message("Too many uploads, please try again later")
}

/// Generic endpoints: 100 requests per 15 minutes per client IP.
#[inline]
pub fn api() -> Policy {
    Policy::new(100, Duration::from_secs(15 * MINUTE))
        .with_name(Preset::Api.name())
}
