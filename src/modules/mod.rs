//! Module model and the seven built-in actions.
//!
//! A module is declared in the boot plan, validated into a [`Module`]
//! carrying a [`RunType`] and a [`ModuleKind`], gated against history, and
//! finally dispatched: [`ModuleKind::run`] matches the tagged variant and
//! invokes the matching action with the shared [`ModuleContext`].
//!
//! ## Files & responsibilities
//! - **module.rs**: validated [`Module`], history keys, the run-type gate.
//! - **context.rs**: per-run facilities handed to every action.
//! - **command.rs / motd.rs / sshkeys.rs / userdata.rs / networkcheck.rs /
//!   systemconfig.rs / usermanagement.rs**: the per-type configurations and
//!   their [`ModuleAction`] implementations.
//!
//! The set of type tags is closed: an unknown sub-table in the plan is a
//! decode error long before dispatch, so [`ModuleKind::run`] is total.

mod command;
mod context;
mod module;
mod motd;
mod networkcheck;
mod sshkeys;
mod systemconfig;
mod userdata;
mod usermanagement;

use async_trait::async_trait;

use crate::error::ModuleError;

pub use command::CommandModule;
pub use context::ModuleContext;
pub use module::{Module, RunType};
pub use motd::MotdModule;
pub use networkcheck::NetworkCheckModule;
pub use sshkeys::SshKeysModule;
pub use systemconfig::{ModifyDefaults, ModifySysctl, SystemConfigModule};
pub use userdata::UserDataModule;
pub use usermanagement::UserManagementModule;

/// # One executable action.
///
/// Implemented by every per-type configuration. The returned `String` is a
/// human-readable result message; it is logged alongside any error, and
/// only the error affects the module's success flag.
#[async_trait]
pub trait ModuleAction: Send + Sync {
    /// Executes the action with the shared per-run context.
    async fn run(&self, ctx: &ModuleContext) -> Result<String, ModuleError>;
}

/// Typed module configuration, chosen at validation time by examining which
/// sub-table the declaration carries.
#[derive(Debug, Clone, PartialEq)]
pub enum ModuleKind {
    /// Arbitrary command execution.
    Command(CommandModule),
    /// `/etc/motd` version stamping.
    Motd(MotdModule),
    /// `authorized_keys` installation.
    SshKeys(SshKeysModule),
    /// User-data fetch/persist/execute.
    UserData(UserDataModule),
    /// Default-gateway reachability check.
    NetworkCheck(NetworkCheckModule),
    /// sysctl / defaults / SSHD hardening.
    SystemConfig(SystemConfigModule),
    /// Password randomization.
    UserManagement(UserManagementModule),
}

impl ModuleKind {
    /// Canonical type tag, used in history keys and logs.
    pub fn tag(&self) -> &'static str {
        match self {
            ModuleKind::Command(_) => "command",
            ModuleKind::Motd(_) => "motd",
            ModuleKind::SshKeys(_) => "sshkeys",
            ModuleKind::UserData(_) => "userdata",
            ModuleKind::NetworkCheck(_) => "networkcheck",
            ModuleKind::SystemConfig(_) => "systemconfig",
            ModuleKind::UserManagement(_) => "usermanagement",
        }
    }

    /// Dispatches to the action behind this tag.
    pub async fn run(&self, ctx: &ModuleContext) -> Result<String, ModuleError> {
        match self {
            ModuleKind::Command(m) => m.run(ctx).await,
            ModuleKind::Motd(m) => m.run(ctx).await,
            ModuleKind::SshKeys(m) => m.run(ctx).await,
            ModuleKind::UserData(m) => m.run(ctx).await,
            ModuleKind::NetworkCheck(m) => m.run(ctx).await,
            ModuleKind::SystemConfig(m) => m.run(ctx).await,
            ModuleKind::UserManagement(m) => m.run(ctx).await,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn tags_cover_the_closed_set() {
        let kinds = [
            ModuleKind::Command(CommandModule::default()),
            ModuleKind::Motd(MotdModule::default()),
            ModuleKind::SshKeys(SshKeysModule::default()),
            ModuleKind::UserData(UserDataModule::default()),
            ModuleKind::NetworkCheck(NetworkCheckModule::default()),
            ModuleKind::SystemConfig(SystemConfigModule::default()),
            ModuleKind::UserManagement(UserManagementModule::default()),
        ];
        let tags: Vec<&str> = kinds.iter().map(|k| k.tag()).collect();
        assert_eq!(
            tags,
            vec![
                "command",
                "motd",
                "sshkeys",
                "userdata",
                "networkcheck",
                "systemconfig",
                "usermanagement"
            ]
        );
    }
}
