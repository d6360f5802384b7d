//! User-data module: fetches, persists, and optionally executes the
//! instance's user-supplied boot script.

use async_trait::async_trait;
use serde::Deserialize;

use crate::error::ModuleError;
use crate::imds::ImdsError;
use crate::modules::{ModuleAction, ModuleContext};
use crate::util::{decode_base64, run_command, write_executable};

const USERDATA_ENDPOINT: &str = "user-data";
const SCRIPT_FILE_NAME: &str = "userdata";

/// Configuration of a user-data module.
#[derive(Debug, Clone, Default, PartialEq, Eq, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct UserDataModule {
    /// Must be true for the persisted script to be executed.
    #[serde(rename = "ExecuteUserData", default)]
    pub execute_user_data: bool,
}

#[async_trait]
impl ModuleAction for UserDataModule {
    async fn run(&self, ctx: &ModuleContext) -> Result<String, ModuleError> {
        let (body, status) = ctx.imds.get_property(USERDATA_ENDPOINT).await?;
        match status {
            200 => {}
            // 404 means the launch supplied no user data; exit nicely.
            404 => return Ok("no user data provided through IMDS".into()),
            status => {
                return Err(ModuleError::Imds(ImdsError::UnexpectedStatus {
                    endpoint: USERDATA_ENDPOINT.into(),
                    status,
                }));
            }
        }

        // Some provisioning tools base64-wrap the payload before the API
        // wraps it again, so a decodable body is treated as encoded.
        let script = decode_base64(&body).unwrap_or(body);

        let script_path = ctx.instance_history_path().join(SCRIPT_FILE_NAME);
        write_executable(&script_path, script.as_bytes())?;

        if !self.execute_user_data {
            return Ok("successfully handled user data with no execution request".into());
        }

        let argv = vec![script_path.to_string_lossy().into_owned()];
        match run_command(&argv, None, &[]).await {
            Ok(out) => Ok(format!(
                "successfully ran user data with stdout: [{}] and stderr: [{}]",
                out.stdout.trim_end_matches('\n'),
                out.stderr.trim_end_matches('\n'),
            )),
            Err(ModuleError::Command { reason, .. })
                if reason.to_ascii_lowercase().contains("exec format error") =>
            {
                // Not executable content (e.g. cloud-config YAML); that is
                // the operator's prerogative, not a module failure.
                Ok("provided user data is not executable".into())
            }
            Err(e) => Err(e),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::imds::Imds;
    use std::sync::Arc;
    use tempfile::tempdir;

    struct StaticImds {
        body: String,
        status: u16,
    }

    #[async_trait]
    impl Imds for StaticImds {
        async fn get_property(&self, _: &str) -> Result<(String, u16), ImdsError> {
            Ok((self.body.clone(), self.status))
        }
    }

    fn ctx(imds: StaticImds, dir: &std::path::Path) -> ModuleContext {
        ModuleContext::new(Arc::new(imds), dir)
    }

    #[tokio::test]
    async fn absent_user_data_exits_nicely() {
        let tmp = tempdir().unwrap();
        let module = UserDataModule {
            execute_user_data: true,
        };
        let message = module
            .run(&ctx(
                StaticImds {
                    body: String::new(),
                    status: 404,
                },
                tmp.path(),
            ))
            .await
            .unwrap();
        assert_eq!(message, "no user data provided through IMDS");
        assert!(!tmp.path().join("userdata").exists());
    }

    #[tokio::test]
    async fn unexpected_status_is_an_error() {
        let tmp = tempdir().unwrap();
        let module = UserDataModule::default();
        let err = module
            .run(&ctx(
                StaticImds {
                    body: String::new(),
                    status: 500,
                },
                tmp.path(),
            ))
            .await
            .unwrap_err();
        assert!(matches!(
            err,
            ModuleError::Imds(ImdsError::UnexpectedStatus { status: 500, .. })
        ));
    }

    #[tokio::test]
    async fn persists_without_executing_when_not_requested() {
        let tmp = tempdir().unwrap();
        let module = UserDataModule {
            execute_user_data: false,
        };
        let message = module
            .run(&ctx(
                StaticImds {
                    body: "#!/bin/sh\necho hi\n".into(),
                    status: 200,
                },
                tmp.path(),
            ))
            .await
            .unwrap();
        assert!(message.contains("no execution request"));
        let saved = std::fs::read_to_string(tmp.path().join("userdata")).unwrap();
        assert!(saved.starts_with("#!/bin/sh"));
    }

    #[tokio::test]
    async fn base64_payload_is_decoded_before_persisting() {
        let tmp = tempdir().unwrap();
        let module = UserDataModule {
            execute_user_data: false,
        };
        // "#!/bin/sh\necho hi\n" base64-encoded.
        module
            .run(&ctx(
                StaticImds {
                    body: "IyEvYmluL3NoCmVjaG8gaGkK".into(),
                    status: 200,
                },
                tmp.path(),
            ))
            .await
            .unwrap();
        let saved = std::fs::read_to_string(tmp.path().join("userdata")).unwrap();
        assert_eq!(saved, "#!/bin/sh\necho hi\n");
    }

    #[tokio::test]
    async fn executes_script_and_reports_output() {
        let tmp = tempdir().unwrap();
        let module = UserDataModule {
            execute_user_data: true,
        };
        let message = module
            .run(&ctx(
                StaticImds {
                    body: "#!/bin/sh\necho from-userdata\n".into(),
                    status: 200,
                },
                tmp.path(),
            ))
            .await
            .unwrap();
        assert!(message.contains("from-userdata"), "got: {message}");
    }
}
