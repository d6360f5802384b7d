//! Process and account helpers shared by the module actions.
//!
//! Command execution goes through [`run_command`], which captures stdout and
//! stderr, optionally drops privileges to another local user, and appends
//! extra environment variables. User lookups prefer the native account
//! database and fall back to `dscacheutil`, which resolves freshly created
//! users more reliably during early boot.

use std::path::Path;
use std::time::Duration;

use base64::Engine;
use tokio::process::Command;

use crate::error::ModuleError;

/// Captured output of a finished command.
#[derive(Debug, Default, Clone)]
pub struct CommandOutput {
    pub stdout: String,
    pub stderr: String,
}

/// Executes a command and returns stdout and stderr as strings.
///
/// - `argv[0]` is the program; the rest are its arguments.
/// - `run_as_user`, when set, resolves the user and runs the child under
///   their uid/gid. Unset means the current (root) user.
/// - `env` entries of the form `KEY=value` are appended to the inherited
///   environment.
///
/// A non-zero exit status is an error carrying the trimmed stderr.
pub async fn run_command(
    argv: &[String],
    run_as_user: Option<&str>,
    env: &[String],
) -> Result<CommandOutput, ModuleError> {
    let (program, args) = match argv.split_first() {
        Some((program, args)) if !program.is_empty() => (program, args),
        _ => {
            return Err(ModuleError::Invalid {
                reason: "must provide a command".into(),
            });
        }
    };

    let mut cmd = Command::new(program);
    cmd.args(args);

    if let Some(user) = run_as_user {
        let (uid, gid) = Box::pin(lookup_uid_gid(user)).await?;
        cmd.uid(uid).gid(gid);
    }

    for entry in env {
        if let Some((key, value)) = entry.split_once('=') {
            cmd.env(key, value);
        }
    }

    let rendered = argv.join(" ");
    let output = cmd.output().await.map_err(|e| ModuleError::Command {
        command: rendered.clone(),
        reason: e.to_string(),
    })?;

    let stdout = String::from_utf8_lossy(&output.stdout).into_owned();
    let stderr = String::from_utf8_lossy(&output.stderr).into_owned();

    if !output.status.success() {
        return Err(ModuleError::Command {
            command: rendered,
            reason: format!(
                "exited with {}: {}",
                output.status,
                stderr.trim_end_matches('\n')
            ),
        });
    }

    Ok(CommandOutput { stdout, stderr })
}

/// Resolves a username to its uid and gid.
///
/// The native account database does not always know a brand-new user on
/// first boot, so a failed lookup retries through `dscacheutil`, which has a
/// higher hit rate. Both failing is an [`ModuleError::UnknownUser`].
pub async fn lookup_uid_gid(username: &str) -> Result<(u32, u32), ModuleError> {
    if let Ok(Some(user)) = nix::unistd::User::from_name(username) {
        return Ok((user.uid.as_raw(), user.gid.as_raw()));
    }

    let query = dscacheutil_query(username);
    let out = run_command(&query, None, &[]).await?;

    let mut uid: Option<u32> = None;
    let mut gid: Option<u32> = None;
    // dscacheutil output is `tag: value` per line; uid and gid are decimal.
    for line in out.stdout.lines() {
        if let Some(value) = line.strip_prefix("uid:") {
            uid = value.trim().parse().ok();
        } else if let Some(value) = line.strip_prefix("gid:") {
            gid = value.trim().parse().ok();
        }
    }

    match (uid, gid) {
        (Some(uid), Some(gid)) => Ok((uid, gid)),
        _ => Err(ModuleError::UnknownUser {
            name: username.to_string(),
        }),
    }
}

/// Returns whether a local user exists.
pub async fn user_exists(username: &str) -> Result<bool, ModuleError> {
    if let Ok(Some(_)) = nix::unistd::User::from_name(username) {
        return Ok(true);
    }
    let out = run_command(&dscacheutil_query(username), None, &[]).await?;
    Ok(out.stdout.contains(username))
}

fn dscacheutil_query(username: &str) -> Vec<String> {
    ["dscacheutil", "-q", "user", "-a", "name", username]
        .into_iter()
        .map(String::from)
        .collect()
}

/// Retries an async operation a fixed number of times, sleeping between
/// attempts. Returns the first success or the last error.
pub async fn retry<T, E, F, Fut>(attempts: usize, sleep: Duration, mut f: F) -> Result<T, E>
where
    F: FnMut() -> Fut,
    Fut: std::future::Future<Output = Result<T, E>>,
{
    let mut last = None;
    for attempt in 0..attempts.max(1) {
        match f().await {
            Ok(v) => return Ok(v),
            Err(e) => last = Some(e),
        }
        if attempt + 1 < attempts {
            tokio::time::sleep(sleep).await;
        }
    }
    Err(last.expect("retry ran at least once"))
}

/// Retrieves the OS product version number from the kernel (`sysctl -n
/// kern.osproductversion`).
pub async fn os_product_version() -> Result<String, ModuleError> {
    let argv: Vec<String> = ["sysctl", "-n", "kern.osproductversion"]
        .into_iter()
        .map(String::from)
        .collect();
    let out = run_command(&argv, None, &[]).await?;
    Ok(out.stdout.trim().to_string())
}

/// Decodes standard base64 into UTF-8 text, if the input is valid base64.
///
/// User data may arrive either plain or base64-wrapped (some provisioning
/// tools double-encode), so callers fall back to the raw text on `None`.
pub fn decode_base64(text: &str) -> Option<String> {
    let bytes = base64::engine::general_purpose::STANDARD
        .decode(text.trim())
        .ok()?;
    String::from_utf8(bytes).ok()
}

/// Writes an executable (0755) file at the provided path.
pub fn write_executable(path: &Path, contents: &[u8]) -> Result<(), ModuleError> {
    use std::io::Write;
    use std::os::unix::fs::OpenOptionsExt;

    let mut f = std::fs::OpenOptions::new()
        .create(true)
        .write(true)
        .truncate(true)
        .mode(0o755)
        .open(path)
        .map_err(|source| ModuleError::Io {
            path: path.to_path_buf(),
            source,
        })?;
    f.write_all(contents).map_err(|source| ModuleError::Io {
        path: path.to_path_buf(),
        source,
    })
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn run_command_captures_stdout() {
        let argv: Vec<String> = ["echo", "hello"].into_iter().map(String::from).collect();
        let out = run_command(&argv, None, &[]).await.unwrap();
        assert_eq!(out.stdout.trim(), "hello");
    }

    #[tokio::test]
    async fn run_command_rejects_empty_argv() {
        assert!(matches!(
            run_command(&[], None, &[]).await,
            Err(ModuleError::Invalid { .. })
        ));
        assert!(matches!(
            run_command(&[String::new()], None, &[]).await,
            Err(ModuleError::Invalid { .. })
        ));
    }

    #[tokio::test]
    async fn run_command_reports_nonzero_exit() {
        let argv: Vec<String> = vec!["false".into()];
        assert!(matches!(
            run_command(&argv, None, &[]).await,
            Err(ModuleError::Command { .. })
        ));
    }

    #[tokio::test]
    async fn run_command_passes_environment() {
        let argv: Vec<String> = ["sh", "-c", "printf %s \"$INITVISOR_TEST\""]
            .into_iter()
            .map(String::from)
            .collect();
        let out = run_command(&argv, None, &["INITVISOR_TEST=ok".into()])
            .await
            .unwrap();
        assert_eq!(out.stdout, "ok");
    }

    #[tokio::test]
    async fn retry_returns_first_success() {
        let mut calls = 0;
        let res: Result<u32, &str> = retry(5, Duration::from_millis(1), || {
            calls += 1;
            let attempt = calls;
            async move {
                if attempt < 3 {
                    Err("not yet")
                } else {
                    Ok(attempt)
                }
            }
        })
        .await;
        assert_eq!(res, Ok(3));
    }

    #[tokio::test]
    async fn retry_surfaces_last_error() {
        let res: Result<(), String> =
            retry(3, Duration::from_millis(1), || async { Err("nope".to_string()) }).await;
        assert_eq!(res.unwrap_err(), "nope");
    }

    #[test]
    fn base64_detection_falls_back() {
        assert_eq!(decode_base64("aGVsbG8="), Some("hello".to_string()));
        assert_eq!(decode_base64("#!/bin/sh\necho hi"), None);
    }
}
