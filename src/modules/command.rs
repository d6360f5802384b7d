//! Command module: runs an arbitrary configured command.

use async_trait::async_trait;
use serde::Deserialize;

use crate::error::ModuleError;
use crate::modules::{ModuleAction, ModuleContext};
use crate::util::run_command;

/// Configuration of a command module.
#[derive(Debug, Clone, Default, PartialEq, Eq, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct CommandModule {
    /// Program and arguments.
    #[serde(rename = "Cmd", default)]
    pub cmd: Vec<String>,
    /// Run as this local user instead of root. Empty means root.
    #[serde(rename = "RunAsUser", default)]
    pub run_as_user: String,
    /// Extra `KEY=value` entries appended to the environment.
    #[serde(rename = "EnvironmentVars", default)]
    pub environment_vars: Vec<String>,
}

#[async_trait]
impl ModuleAction for CommandModule {
    async fn run(&self, _ctx: &ModuleContext) -> Result<String, ModuleError> {
        let run_as = match self.run_as_user.as_str() {
            "" => None,
            user => Some(user),
        };
        let out = run_command(&self.cmd, run_as, &self.environment_vars).await?;
        Ok(format!(
            "successfully ran command [{}] with stdout [{}] and stderr [{}]",
            self.cmd.join(" "),
            out.stdout.trim_end_matches('\n'),
            out.stderr.trim_end_matches('\n'),
        ))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::imds::{Imds, ImdsError};
    use std::sync::Arc;

    struct NoImds;
    #[async_trait]
    impl Imds for NoImds {
        async fn get_property(&self, endpoint: &str) -> Result<(String, u16), ImdsError> {
            Err(ImdsError::Transport {
                endpoint: endpoint.into(),
                reason: "unavailable in tests".into(),
            })
        }
    }

    fn ctx() -> ModuleContext {
        ModuleContext::new(Arc::new(NoImds), std::env::temp_dir())
    }

    #[tokio::test]
    async fn runs_configured_command() {
        let module = CommandModule {
            cmd: vec!["echo".into(), "boot".into()],
            ..CommandModule::default()
        };
        let message = module.run(&ctx()).await.unwrap();
        assert!(message.contains("stdout [boot]"), "got: {message}");
    }

    #[tokio::test]
    async fn failing_command_is_an_error() {
        let module = CommandModule {
            cmd: vec!["false".into()],
            ..CommandModule::default()
        };
        assert!(matches!(
            module.run(&ctx()).await,
            Err(ModuleError::Command { .. })
        ));
    }

    #[tokio::test]
    async fn empty_command_is_invalid() {
        let module = CommandModule::default();
        assert!(matches!(
            module.run(&ctx()).await,
            Err(ModuleError::Invalid { .. })
        ));
    }
}
