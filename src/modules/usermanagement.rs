//! User management module: randomizes a local user's password without
//! tripping Secure Token creation.
//!
//! From Big Sur onward the first password change of a user sets the Secure
//! Token, and a token-holding user cannot have their password changed again
//! without knowing the old one. Randomizing to an unknown value would brick
//! later changes, so the flow is:
//!
//! 1. Refuse if the Secure Token is already set.
//! 2. Append the directory property that suppresses token creation.
//! 3. Change the password to a random string.
//! 4. Remove the property so the *next* change sets the token normally.
//!
//! Step 4 runs even when step 3 fails.

use async_trait::async_trait;
use base64::Engine;
use rand::TryRngCore;
use serde::Deserialize;

use crate::error::ModuleError;
use crate::modules::{ModuleAction, ModuleContext};
use crate::util::{run_command, user_exists};

const PASSWORD_LENGTH: usize = 25;
const DSCL_PATH: &str = "/usr/bin/dscl";
const SYSADMINCTL_PATH: &str = "/usr/sbin/sysadminctl";
const DEFAULT_USER: &str = "ec2-user";

/// Directory property that suppresses Secure Token creation on the next
/// password change.
const TOKEN_SUPPRESS_TAG: &str = ";DisabledTags;SecureToken";

/// Configuration of a user management module.
#[derive(Debug, Clone, Default, PartialEq, Eq, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct UserManagementModule {
    /// Whether the user's password should be randomized at all.
    #[serde(rename = "RandomizePassword", default)]
    pub randomize_password: bool,
    /// Target user; empty defaults to `ec2-user`.
    #[serde(rename = "User", default)]
    pub user: String,
}

impl UserManagementModule {
    fn user(&self) -> &str {
        if self.user.is_empty() {
            DEFAULT_USER
        } else {
            &self.user
        }
    }
}

#[async_trait]
impl ModuleAction for UserManagementModule {
    async fn run(&self, _ctx: &ModuleContext) -> Result<String, ModuleError> {
        if !self.randomize_password {
            return Ok("randomizing password disabled, skipping".into());
        }
        self.randomize_user_password().await
    }
}

impl UserManagementModule {
    async fn randomize_user_password(&self) -> Result<String, ModuleError> {
        let user = self.user();
        if !user_exists(user).await? {
            return Err(ModuleError::UnknownUser { name: user.into() });
        }

        // A user already holding the token cannot be randomized safely.
        if secure_token_set(user).await? {
            return Err(ModuleError::Invalid {
                reason: format!("unable to change password, Secure Token set for {user}"),
            });
        }

        suppress_token_creation(user).await?;
        let changed = change_to_random_password(user).await;
        let restored = restore_token_creation(user).await;

        match (changed, restored) {
            (Ok(()), Ok(())) => Ok(format!("successfully set secure password for {user}")),
            (Ok(()), Err(e)) | (Err(e), Ok(())) => Err(e),
            (Err(change_err), Err(restore_err)) => Err(ModuleError::Invalid {
                reason: format!(
                    "unable to set password ({change_err}) and unable to re-enable Secure Token generation ({restore_err})"
                ),
            }),
        }
    }
}

/// Queries `sysadminctl -secureTokenStatus`, which reports ENABLED or
/// DISABLED in its diagnostic output.
async fn secure_token_set(user: &str) -> Result<bool, ModuleError> {
    let argv: Vec<String> = vec![
        SYSADMINCTL_PATH.into(),
        "-secureTokenStatus".into(),
        user.into(),
    ];
    let out = run_command(&argv, None, &[]).await?;
    // sysadminctl logs through stderr on some releases.
    Ok(out.stdout.contains("Secure token is ENABLED")
        || out.stderr.contains("Secure token is ENABLED"))
}

async fn suppress_token_creation(user: &str) -> Result<(), ModuleError> {
    let argv: Vec<String> = vec![
        DSCL_PATH.into(),
        ".".into(),
        "append".into(),
        format!("/Users/{user}"),
        "AuthenticationAuthority".into(),
        TOKEN_SUPPRESS_TAG.into(),
    ];
    run_command(&argv, None, &[]).await.map(|_| ())
}

async fn restore_token_creation(user: &str) -> Result<(), ModuleError> {
    let argv: Vec<String> = vec![
        DSCL_PATH.into(),
        ".".into(),
        "delete".into(),
        format!("/Users/{user}"),
        "AuthenticationAuthority".into(),
        TOKEN_SUPPRESS_TAG.into(),
    ];
    run_command(&argv, None, &[]).await.map(|_| ())
}

async fn change_to_random_password(user: &str) -> Result<(), ModuleError> {
    let password = generate_secure_password(PASSWORD_LENGTH)?;
    let argv: Vec<String> = vec![
        DSCL_PATH.into(),
        ".".into(),
        "-passwd".into(),
        format!("/Users/{user}"),
        password,
    ];
    run_command(&argv, None, &[]).await.map(|_| ())
}

/// Generates a password from OS CSPRNG bytes, base64-url encoded for a
/// shell-safe alphabet, truncated to the requested length.
fn generate_secure_password(length: usize) -> Result<String, ModuleError> {
    let mut bytes = vec![0u8; length];
    rand::rngs::OsRng
        .try_fill_bytes(&mut bytes)
        .map_err(|e| ModuleError::Invalid {
            reason: format!("unable to read random bytes from OS: {e}"),
        })?;
    let encoded = base64::engine::general_purpose::URL_SAFE.encode(&bytes);
    Ok(encoded[..length].to_string())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn password_has_requested_length_and_safe_alphabet() {
        let password = generate_secure_password(PASSWORD_LENGTH).unwrap();
        assert_eq!(password.len(), PASSWORD_LENGTH);
        assert!(password
            .chars()
            .all(|c| c.is_ascii_alphanumeric() || c == '-' || c == '_' || c == '='));
    }

    #[test]
    fn passwords_are_not_repeated() {
        let a = generate_secure_password(PASSWORD_LENGTH).unwrap();
        let b = generate_secure_password(PASSWORD_LENGTH).unwrap();
        assert_ne!(a, b);
    }

    #[test]
    fn default_user_applies_when_unset() {
        assert_eq!(UserManagementModule::default().user(), "ec2-user");
    }

    #[tokio::test]
    async fn disabled_randomization_skips() {
        use crate::imds::{Imds, ImdsError};
        use std::sync::Arc;

        struct NoImds;
        #[async_trait]
        impl Imds for NoImds {
            async fn get_property(&self, e: &str) -> Result<(String, u16), ImdsError> {
                Err(ImdsError::Transport {
                    endpoint: e.into(),
                    reason: "unavailable".into(),
                })
            }
        }

        let ctx = ModuleContext::new(Arc::new(NoImds), std::env::temp_dir());
        let message = UserManagementModule::default().run(&ctx).await.unwrap();
        assert_eq!(message, "randomizing password disabled, skipping");
    }
}
