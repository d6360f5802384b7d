//! # Boot plan configuration: decoding, validation, and bucketing.
//!
//! The plan is a TOML file of `[[Module]]` entries. Decoding is strict
//! (unknown fields and sub-tables are errors); validation then turns each
//! declaration into a [`Module`]:
//!
//! 1. **Type identification** — exactly one per-type sub-table must be
//!    present; its tag becomes the module's [`ModuleKind`].
//! 2. **Structural validation** — exactly one run-type flag, priority ≥ 1.
//! 3. **Uniqueness** — module names are unique across the plan.
//!
//! Any violation aborts the run before any module executes.
//!
//! [`RunPlan`] then groups validated modules into priority buckets: a
//! module with priority *p* lands in bucket *p−1*, the sequence grows to
//! the maximum priority observed, and intermediate buckets may be empty
//! (they are still visited but contain no work).

use std::collections::HashSet;
use std::path::Path;

use serde::Deserialize;

use crate::error::InitError;
use crate::history::ModuleRecord;
use crate::modules::{
    CommandModule, Module, ModuleKind, MotdModule, NetworkCheckModule, RunType, SshKeysModule,
    SystemConfigModule, UserDataModule, UserManagementModule,
};

/// Top-level shape of `init.toml`.
#[derive(Debug, Default, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct InitToml {
    /// Module declarations, in file order.
    #[serde(rename = "Module", default)]
    pub modules: Vec<ModuleDecl>,
}

/// One raw `[[Module]]` declaration, before validation.
#[derive(Debug, Default, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct ModuleDecl {
    #[serde(rename = "Name", default)]
    pub name: String,
    #[serde(rename = "PriorityGroup", default)]
    pub priority_group: u32,
    #[serde(rename = "FatalOnError", default)]
    pub fatal_on_error: bool,
    #[serde(rename = "RunOnce", default)]
    pub run_once: bool,
    #[serde(rename = "RunPerBoot", default)]
    pub run_per_boot: bool,
    #[serde(rename = "RunPerInstance", default)]
    pub run_per_instance: bool,
    #[serde(rename = "Command")]
    pub command: Option<CommandModule>,
    #[serde(rename = "MOTD")]
    pub motd: Option<MotdModule>,
    #[serde(rename = "SSHKeys")]
    pub ssh_keys: Option<SshKeysModule>,
    #[serde(rename = "UserData")]
    pub user_data: Option<UserDataModule>,
    #[serde(rename = "NetworkCheck")]
    pub network_check: Option<NetworkCheckModule>,
    #[serde(rename = "SystemConfig")]
    pub system_config: Option<SystemConfigModule>,
    #[serde(rename = "UserManagement")]
    pub user_management: Option<UserManagementModule>,
}

impl ModuleDecl {
    /// Derives the run type from the three flags; any count other than one
    /// is a configuration error.
    fn run_type(&self) -> Result<RunType, InitError> {
        let mut set = Vec::with_capacity(1);
        if self.run_once {
            set.push(RunType::Once);
        }
        if self.run_per_boot {
            set.push(RunType::PerBoot);
        }
        if self.run_per_instance {
            set.push(RunType::PerInstance);
        }
        match set.as_slice() {
            [one] => Ok(*one),
            _ => Err(InitError::Config {
                reason: format!(
                    "module '{}': incorrect number of run types ({})",
                    self.name,
                    set.len()
                ),
            }),
        }
    }

    /// Identifies the module type from the sub-table present; zero or
    /// several present sub-tables is a configuration error.
    fn kind(self) -> Result<ModuleKind, InitError> {
        let name = self.name;
        let mut kinds = Vec::with_capacity(1);
        if let Some(m) = self.command {
            kinds.push(ModuleKind::Command(m));
        }
        if let Some(m) = self.motd {
            kinds.push(ModuleKind::Motd(m));
        }
        if let Some(m) = self.ssh_keys {
            kinds.push(ModuleKind::SshKeys(m));
        }
        if let Some(m) = self.user_data {
            kinds.push(ModuleKind::UserData(m));
        }
        if let Some(m) = self.network_check {
            kinds.push(ModuleKind::NetworkCheck(m));
        }
        if let Some(m) = self.system_config {
            kinds.push(ModuleKind::SystemConfig(m));
        }
        if let Some(m) = self.user_management {
            kinds.push(ModuleKind::UserManagement(m));
        }
        match kinds.len() {
            1 => Ok(kinds.pop().expect("len checked")),
            n => Err(InitError::Config {
                reason: format!("module '{name}': unable to identify module type ({n} sub-tables)"),
            }),
        }
    }

    /// Validates the declaration into a [`Module`].
    pub fn validate(self) -> Result<Module, InitError> {
        let run_type = self.run_type()?;

        if self.priority_group < 1 {
            return Err(InitError::Config {
                reason: format!(
                    "module '{}': priority group is unset or less than 1",
                    self.name
                ),
            });
        }

        let name = self.name.clone();
        let priority = self.priority_group;
        let fatal_on_error = self.fatal_on_error;
        let kind = self.kind()?;

        Ok(Module {
            name,
            priority,
            fatal_on_error,
            run_type,
            kind,
            success: false,
        })
    }
}

/// Validates every declaration and enforces plan-wide name uniqueness.
pub fn validate_all(decls: Vec<ModuleDecl>) -> Result<Vec<Module>, InitError> {
    let mut seen: HashSet<String> = HashSet::with_capacity(decls.len());
    let mut modules = Vec::with_capacity(decls.len());
    for decl in decls {
        let module = decl.validate()?;
        if !seen.insert(module.name.clone()) {
            return Err(InitError::Config {
                reason: format!("duplicate name found in config: {}", module.name),
            });
        }
        modules.push(module);
    }
    Ok(modules)
}

/// Reads, decodes, and validates the plan at `path`.
pub fn load_config(path: &Path) -> Result<Vec<Module>, InitError> {
    let raw = std::fs::read_to_string(path).map_err(|source| InitError::ConfigRead {
        path: path.to_path_buf(),
        source,
    })?;
    let decoded: InitToml = toml::from_str(&raw).map_err(|e| InitError::Config {
        reason: format!("error decoding config: {e}"),
    })?;
    validate_all(decoded.modules)
}

/// Modules grouped by priority, in execution order.
///
/// Bucket `i` holds every module of priority `i+1`. The scheduler visits
/// buckets in index order and joins each before the next.
#[derive(Debug, Default)]
pub struct RunPlan {
    buckets: Vec<Vec<Module>>,
}

impl RunPlan {
    /// Groups validated modules into priority buckets.
    pub fn from_modules(modules: Vec<Module>) -> Self {
        let mut buckets: Vec<Vec<Module>> = Vec::new();
        for module in modules {
            let index = (module.priority - 1) as usize;
            if buckets.len() <= index {
                buckets.resize_with(index + 1, Vec::new);
            }
            buckets[index].push(module);
        }
        Self { buckets }
    }

    /// Borrows the bucket sequence.
    pub fn buckets(&self) -> &[Vec<Module>] {
        &self.buckets
    }

    /// Mutably borrows the bucket sequence (scheduler use).
    pub(crate) fn buckets_mut(&mut self) -> &mut Vec<Vec<Module>> {
        &mut self.buckets
    }

    /// Number of buckets, including empty placeholders.
    pub fn bucket_count(&self) -> usize {
        self.buckets.len()
    }

    /// Total number of modules across all buckets.
    pub fn module_count(&self) -> usize {
        self.buckets.iter().map(Vec::len).sum()
    }

    /// Derives history records for every module in the plan, in plan order,
    /// whether it ran, was skipped, or was never reached.
    pub fn records(&self) -> Vec<ModuleRecord> {
        self.buckets
            .iter()
            .flat_map(|bucket| bucket.iter().map(Module::record))
            .collect()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn decl(name: &str, priority: u32) -> ModuleDecl {
        ModuleDecl {
            name: name.into(),
            priority_group: priority,
            run_per_boot: true,
            command: Some(CommandModule {
                cmd: vec!["true".into()],
                ..CommandModule::default()
            }),
            ..ModuleDecl::default()
        }
    }

    #[test]
    fn zero_run_types_is_rejected() {
        let mut d = decl("A", 1);
        d.run_per_boot = false;
        assert!(matches!(d.validate(), Err(InitError::Config { .. })));
    }

    #[test]
    fn three_run_types_is_rejected() {
        let mut d = decl("A", 1);
        d.run_once = true;
        d.run_per_instance = true;
        assert!(matches!(d.validate(), Err(InitError::Config { .. })));
    }

    #[test]
    fn unset_priority_is_rejected() {
        let d = decl("A", 0);
        assert!(matches!(d.validate(), Err(InitError::Config { .. })));
    }

    #[test]
    fn zero_sub_tables_is_rejected() {
        let mut d = decl("A", 1);
        d.command = None;
        assert!(matches!(d.validate(), Err(InitError::Config { .. })));
    }

    #[test]
    fn two_sub_tables_is_rejected() {
        let mut d = decl("A", 1);
        d.motd = Some(MotdModule { update_name: true });
        assert!(matches!(d.validate(), Err(InitError::Config { .. })));
    }

    #[test]
    fn valid_declaration_identifies_type() {
        let module = decl("A", 2).validate().unwrap();
        assert_eq!(module.kind.tag(), "command");
        assert_eq!(module.run_type, RunType::PerBoot);
        assert_eq!(module.priority, 2);
        assert!(!module.success);
    }

    #[test]
    fn duplicate_names_are_rejected() {
        let err = validate_all(vec![decl("A", 1), decl("A", 2)]).unwrap_err();
        match err {
            InitError::Config { reason } => assert!(reason.contains("duplicate"), "{reason}"),
            other => panic!("unexpected error: {other}"),
        }
    }

    #[test]
    fn unique_names_are_accepted() {
        let modules = validate_all(vec![decl("A", 1), decl("B", 1), decl("C", 3)]).unwrap();
        assert_eq!(modules.len(), 3);
    }

    #[test]
    fn toml_decoding_maps_fields() {
        let raw = r#"
            [[Module]]
            Name = "install-keys"
            PriorityGroup = 2
            FatalOnError = true
            RunPerInstance = true
            [Module.SSHKeys]
            GetIMDSOpenSSHKey = true
            User = "ec2-user"
        "#;
        let decoded: InitToml = toml::from_str(raw).unwrap();
        let module = validate_all(decoded.modules).unwrap().remove(0);
        assert_eq!(module.name, "install-keys");
        assert_eq!(module.priority, 2);
        assert!(module.fatal_on_error);
        assert_eq!(module.run_type, RunType::PerInstance);
        assert_eq!(module.history_key(), "2_RunPerInstance_sshkeys_install-keys");
    }

    #[test]
    fn unknown_sub_table_is_a_decode_error() {
        let raw = r#"
            [[Module]]
            Name = "weird"
            PriorityGroup = 1
            RunPerBoot = true
            [Module.Mystery]
            x = 1
        "#;
        assert!(toml::from_str::<InitToml>(raw).is_err());
    }

    #[test]
    fn unknown_field_inside_sub_table_is_a_decode_error() {
        let raw = r#"
            [[Module]]
            Name = "weird"
            PriorityGroup = 1
            RunPerBoot = true
            [Module.Command]
            Cmd = ["true"]
            Bogus = 1
        "#;
        assert!(toml::from_str::<InitToml>(raw).is_err());
    }

    #[test]
    fn bucketing_places_priority_p_at_index_p_minus_1() {
        let plan = RunPlan::from_modules(validate_all(vec![decl("A", 1), decl("B", 3)]).unwrap());
        assert_eq!(plan.bucket_count(), 3);
        assert_eq!(plan.buckets()[0].len(), 1);
        assert!(plan.buckets()[1].is_empty());
        assert_eq!(plan.buckets()[2].len(), 1);
        assert_eq!(plan.module_count(), 2);
    }

    #[test]
    fn records_cover_every_module_in_plan_order() {
        let plan = RunPlan::from_modules(
            validate_all(vec![decl("A", 2), decl("B", 1), decl("C", 2)]).unwrap(),
        );
        let keys: Vec<String> = plan.records().into_iter().map(|r| r.key).collect();
        assert_eq!(
            keys,
            vec![
                "1_RunPerBoot_command_B",
                "2_RunPerBoot_command_A",
                "2_RunPerBoot_command_C"
            ]
        );
        assert!(plan.records().iter().all(|r| !r.success));
    }
}
