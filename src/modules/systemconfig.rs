//! System configuration module: sysctl values, plist defaults, and SSHD
//! hardening, applied concurrently.

use std::path::Path;
use std::time::Duration;

use async_trait::async_trait;
use serde::Deserialize;
use tokio::task::JoinSet;

use crate::error::ModuleError;
use crate::modules::{ModuleAction, ModuleContext};
use crate::util::{retry, run_command};

const DEFAULTS_CMD: &str = "/usr/bin/defaults";
const SSHD_CONFIG_FILE: &str = "/etc/ssh/sshd_config";

const SYSCTL_ATTEMPTS: usize = 5;
const SYSCTL_RETRY_DELAY: Duration = Duration::from_millis(100);

/// Header warning stamped at the top of the managed SSHD config.
const MANAGED_WARNING: &str = "### This file is managed by initvisor, changes will be applied on every boot. To disable set secureSSHDConfig = false in init.toml ###";

/// Warning line written above each rewritten SSHD setting.
const INLINE_WARNING: &str = "# Managed setting: recommended value applied on boot. Set secureSSHDConfig = false in init.toml to disable.";

/// One sysctl assignment of the form `param=value`.
#[derive(Debug, Clone, Default, PartialEq, Eq, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct ModifySysctl {
    #[serde(rename = "value", default)]
    pub value: String,
}

/// One plist parameter change applied through `defaults`.
#[derive(Debug, Clone, Default, PartialEq, Eq, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct ModifyDefaults {
    #[serde(rename = "plist", default)]
    pub plist: String,
    #[serde(rename = "parameter", default)]
    pub parameter: String,
    /// Parameter type; only `bool`/`boolean` is implemented.
    #[serde(rename = "type", default)]
    pub value_type: String,
    #[serde(rename = "value", default)]
    pub value: String,
}

/// Configuration of a system configuration module.
#[derive(Debug, Clone, Default, PartialEq, Eq, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct SystemConfigModule {
    /// Harden the SSHD configuration file and reload SSHD if running.
    #[serde(rename = "secureSSHDConfig", default)]
    pub secure_sshd_config: bool,
    /// Sysctl assignments.
    #[serde(rename = "Sysctl", default)]
    pub modify_sysctl: Vec<ModifySysctl>,
    /// Plist defaults changes.
    #[serde(rename = "Defaults", default)]
    pub modify_defaults: Vec<ModifyDefaults>,
}

/// Outcome of one sub-operation. Failures are logged where they happen.
enum Change {
    Applied,
    Unchanged,
    Failed,
}

#[async_trait]
impl ModuleAction for SystemConfigModule {
    async fn run(&self, _ctx: &ModuleContext) -> Result<String, ModuleError> {
        let mut set: JoinSet<Change> = JoinSet::new();

        if self.secure_sshd_config {
            set.spawn(async {
                match configure_sshd(Path::new(SSHD_CONFIG_FILE)).await {
                    Ok(true) => Change::Applied,
                    Ok(false) => Change::Unchanged,
                    Err(e) => {
                        tracing::error!(error = %e, "error while correcting SSHD configuration");
                        Change::Failed
                    }
                }
            });
        }

        for m in &self.modify_sysctl {
            let value = m.value.clone();
            set.spawn(async move {
                let outcome = retry(SYSCTL_ATTEMPTS, SYSCTL_RETRY_DELAY, || {
                    modify_sysctl(&value)
                })
                .await;
                match outcome {
                    Ok(true) => {
                        tracing::info!(value = %value, "modified sysctl property");
                        Change::Applied
                    }
                    Ok(false) => {
                        tracing::info!(value = %value, "did not modify sysctl property");
                        Change::Unchanged
                    }
                    Err(e) => {
                        tracing::error!(value = %value, error = %e, "error modifying sysctl property");
                        Change::Failed
                    }
                }
            });
        }

        for m in &self.modify_defaults {
            let m = m.clone();
            set.spawn(async move {
                match modify_defaults(&m).await {
                    Ok(true) => {
                        tracing::info!(parameter = %m.parameter, "modified default");
                        Change::Applied
                    }
                    Ok(false) => {
                        tracing::info!(parameter = %m.parameter, "did not modify default");
                        Change::Unchanged
                    }
                    Err(e) => {
                        tracing::error!(parameter = %m.parameter, error = %e, "error modifying default");
                        Change::Failed
                    }
                }
            });
        }

        let mut changed = 0usize;
        let mut unchanged = 0usize;
        let mut errors = 0usize;
        while let Some(joined) = set.join_next().await {
            match joined {
                Ok(Change::Applied) => changed += 1,
                Ok(Change::Unchanged) => unchanged += 1,
                Ok(Change::Failed) | Err(_) => errors += 1,
            }
        }

        let message = format!(
            "system configuration completed with [{changed} changed / {unchanged} unchanged / {errors} error(s)] out of {} requested changes",
            changed + unchanged
        );

        if errors > 0 {
            return Err(ModuleError::Partial { reason: message });
        }
        Ok(message)
    }
}

/// Applies one sysctl assignment, if the live value differs.
async fn modify_sysctl(value: &str) -> Result<bool, ModuleError> {
    let (param, _) = value.split_once('=').ok_or_else(|| ModuleError::Invalid {
        reason: format!("unable to split input sysctl value: {value}"),
    })?;

    let read = |p: &str| {
        let argv: Vec<String> = vec!["sysctl".into(), "-e".into(), p.into()];
        async move { run_command(&argv, None, &[]).await }
    };

    let current = read(param).await?;
    if current.stdout.trim() == value {
        return Ok(false);
    }

    let set_argv: Vec<String> = vec!["sysctl".into(), value.into()];
    run_command(&set_argv, None, &[]).await?;

    let updated = read(param).await?;
    if updated.stdout.trim() != value {
        return Err(ModuleError::Invalid {
            reason: format!("sysctl value did not take: {}", updated.stdout.trim()),
        });
    }
    Ok(true)
}

/// Applies one `defaults` change, if the live value differs.
async fn modify_defaults(change: &ModifyDefaults) -> Result<bool, ModuleError> {
    check_defaults_type(change).await?;
    check_value_matches_type(change)?;

    // Exit early if the value is already set correctly.
    if defaults_value_matches(change).await? {
        return Ok(false);
    }

    let write: Vec<String> = vec![
        DEFAULTS_CMD.into(),
        "write".into(),
        change.plist.clone(),
        change.parameter.clone(),
        format!("-{}", change.value_type),
        change.value.clone(),
    ];
    run_command(&write, None, &[]).await?;

    if !defaults_value_matches(change).await? {
        return Err(ModuleError::Invalid {
            reason: format!(
                "verification failed updating plist {}, parameter {}",
                change.plist, change.parameter
            ),
        });
    }
    Ok(true)
}

/// Checks the live type of the parameter against the requested one.
async fn check_defaults_type(change: &ModifyDefaults) -> Result<(), ModuleError> {
    let read_type: Vec<String> = vec![
        DEFAULTS_CMD.into(),
        "read-type".into(),
        change.plist.clone(),
        change.parameter.clone(),
    ];
    let out = run_command(&read_type, None, &[]).await?;
    let current = out.stdout.replace("Type is", "");
    let current = current.trim();

    match change.value_type.as_str() {
        // Only bool[ean] is implemented; more types later.
        "bool" | "boolean" => {
            if current != "boolean" {
                return Err(ModuleError::Invalid {
                    reason: format!(
                        "parameter types did not match - expected: (bool, boolean), actual: {current}"
                    ),
                });
            }
            Ok(())
        }
        _ => Ok(()),
    }
}

/// Checks the requested value parses as the requested type.
fn check_value_matches_type(change: &ModifyDefaults) -> Result<(), ModuleError> {
    match change.value_type.as_str() {
        "bool" | "boolean" => {
            parse_bool(&change.value).ok_or_else(|| ModuleError::Invalid {
                reason: format!(
                    "value {} did not match type {} for plist {}, parameter {}",
                    change.value, change.value_type, change.plist, change.parameter
                ),
            })?;
            Ok(())
        }
        _ => Ok(()),
    }
}

/// Reads the live value and compares it to the requested one.
async fn defaults_value_matches(change: &ModifyDefaults) -> Result<bool, ModuleError> {
    let read: Vec<String> = vec![
        DEFAULTS_CMD.into(),
        "read".into(),
        change.plist.clone(),
        change.parameter.clone(),
    ];
    let out = match run_command(&read, None, &[]).await {
        Ok(out) => out,
        // An unreadable parameter means "does not match yet".
        Err(_) => return Ok(false),
    };
    let actual = out.stdout.trim();

    match change.value_type.as_str() {
        "bool" | "boolean" => {
            Ok(parse_bool(&change.value) == parse_bool(actual) && parse_bool(actual).is_some())
        }
        _ => Ok(actual == change.value),
    }
}

/// Accepts the spellings `defaults` itself uses for booleans.
fn parse_bool(s: &str) -> Option<bool> {
    match s.trim() {
        "1" | "t" | "T" | "true" | "TRUE" | "True" => Some(true),
        "0" | "f" | "F" | "false" | "FALSE" | "False" => Some(false),
        _ => None,
    }
}

/// Scans the SSHD config and rewrites risky settings; returns whether the
/// file content changed.
///
/// Password, PAM, and challenge-response authentication all enable
/// brute-force surface over SSHD, so they are forced off with an inline
/// warning above each rewritten line and a managed-file header at the top.
fn harden_sshd_config(contents: &str) -> (String, bool) {
    let mut out = String::with_capacity(contents.len() + 256);
    let mut changed = false;
    let mut last_line = String::new();

    let push_warning = |out: &mut String, last: &str| {
        if !last.contains("Managed setting") {
            out.push_str(INLINE_WARNING);
            out.push('\n');
        }
    };

    for (idx, line) in contents.lines().enumerate() {
        if idx == 0 && line != MANAGED_WARNING {
            out.push_str(MANAGED_WARNING);
            out.push('\n');
            changed = true;
            last_line = MANAGED_WARNING.to_string();
        }

        if line.contains("PasswordAuthentication yes") {
            push_warning(&mut out, &last_line);
            out.push_str("PasswordAuthentication no\n");
            changed = true;
        } else if line.trim() == "UsePAM yes" {
            push_warning(&mut out, &last_line);
            out.push_str("UsePAM no\n");
            changed = true;
        } else if line.contains("ChallengeResponseAuthentication yes") {
            push_warning(&mut out, &last_line);
            out.push_str("ChallengeResponseAuthentication no\n");
            changed = true;
        } else {
            out.push_str(line);
            out.push('\n');
        }
        last_line = line.to_string();
    }

    (out, changed)
}

/// Rewrites the SSHD config if needed and reloads SSHD when it was running.
async fn configure_sshd(config_file: &Path) -> Result<bool, ModuleError> {
    let contents =
        tokio::fs::read_to_string(config_file)
            .await
            .map_err(|source| ModuleError::Io {
                path: config_file.to_path_buf(),
                source,
            })?;

    let (updated, changed) = harden_sshd_config(&contents);
    if !changed {
        tracing::info!("did not modify SSHD configuration");
        return Ok(false);
    }

    // Reload only applies when SSHD is up; query before replacing the file.
    let sshd_running = sshd_running().await.unwrap_or_else(|e| {
        tracing::error!(error = %e, "unable to get SSHD status");
        false
    });

    let dir = config_file.parent().ok_or_else(|| ModuleError::Invalid {
        reason: format!("config file {} has no parent", config_file.display()),
    })?;
    let tmp = tempfile::NamedTempFile::new_in(dir).map_err(|source| ModuleError::Io {
        path: dir.to_path_buf(),
        source,
    })?;
    std::fs::write(tmp.path(), updated).map_err(|source| ModuleError::Io {
        path: tmp.path().to_path_buf(),
        source,
    })?;
    tmp.persist(config_file).map_err(|e| ModuleError::Io {
        path: config_file.to_path_buf(),
        source: e.error,
    })?;
    use std::os::unix::fs::PermissionsExt;
    let perms = std::fs::Permissions::from_mode(0o644);
    std::fs::set_permissions(config_file, perms).map_err(|source| ModuleError::Io {
        path: config_file.to_path_buf(),
        source,
    })?;

    if sshd_running {
        let unload: Vec<String> = shell("launchctl unload /System/Library/LaunchDaemons/ssh.plist");
        run_command(&unload, None, &[]).await?;
        let load: Vec<String> = shell("launchctl load -w /System/Library/LaunchDaemons/ssh.plist");
        run_command(&load, None, &[]).await?;
        tracing::info!("modified SSHD configuration and restarted SSHD");
    } else {
        tracing::info!("modified SSHD configuration, did not restart SSHD since it was not running");
    }

    Ok(true)
}

/// Finds SSHD in the launchd job list and reports whether its last exit
/// status marks it as running.
async fn sshd_running() -> Result<bool, ModuleError> {
    let argv = shell("/bin/launchctl list | /usr/bin/grep sshd.");
    let out = run_command(&argv, None, &[]).await?;
    let line = out.stdout.replace('\n', "");
    let fields: Vec<&str> = line.split('\t').collect();
    if fields.len() < 2 {
        return Err(ModuleError::Invalid {
            reason: format!("failed to parse launchctl list [{} fields]", fields.len()),
        });
    }
    let status: i32 = fields[1].trim().parse().map_err(|_| ModuleError::Invalid {
        reason: format!("failed to parse sshd status: {}", fields[1]),
    })?;
    Ok(status == 0)
}

fn shell(cmdline: &str) -> Vec<String> {
    vec!["/bin/zsh".into(), "-c".into(), cmdline.into()]
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn hardening_rewrites_password_authentication() {
        let (out, changed) = harden_sshd_config("PasswordAuthentication yes\n");
        assert!(changed);
        assert!(out.starts_with(MANAGED_WARNING));
        assert!(out.contains("PasswordAuthentication no\n"));
        assert!(!out.contains("PasswordAuthentication yes"));
        assert!(out.contains(INLINE_WARNING));
    }

    #[test]
    fn hardening_rewrites_pam_and_challenge_response() {
        let input = "UsePAM yes\nChallengeResponseAuthentication yes\n";
        let (out, changed) = harden_sshd_config(input);
        assert!(changed);
        assert!(out.contains("UsePAM no\n"));
        assert!(out.contains("ChallengeResponseAuthentication no\n"));
    }

    #[test]
    fn hardening_leaves_safe_config_alone_except_header() {
        let input = "PasswordAuthentication no\nUsePAM no\n";
        let (out, changed) = harden_sshd_config(input);
        assert!(changed, "missing header still counts as a change");
        assert!(out.starts_with(MANAGED_WARNING));
        assert!(out.contains("PasswordAuthentication no\n"));
    }

    #[test]
    fn hardening_is_idempotent() {
        let (first, changed) = harden_sshd_config("PasswordAuthentication yes\nUsePAM yes\n");
        assert!(changed);
        let (second, changed_again) = harden_sshd_config(&first);
        assert!(!changed_again);
        assert_eq!(first, second);
    }

    #[test]
    fn bool_spellings_parse() {
        assert_eq!(parse_bool("1"), Some(true));
        assert_eq!(parse_bool("false"), Some(false));
        assert_eq!(parse_bool(" TRUE "), Some(true));
        assert_eq!(parse_bool("yes"), None);
    }

    #[test]
    fn value_type_mismatch_is_rejected() {
        let change = ModifyDefaults {
            plist: "/Library/Preferences/x.plist".into(),
            parameter: "Enabled".into(),
            value_type: "bool".into(),
            value: "maybe".into(),
        };
        assert!(check_value_matches_type(&change).is_err());
        let change = ModifyDefaults {
            value: "true".into(),
            ..change
        };
        assert!(check_value_matches_type(&change).is_ok());
    }
}
