//! # Validated module and its run-type gate.
//!
//! A [`Module`] is one fully validated entry of the boot plan: a unique
//! name, a priority group, a [`RunType`], the typed action configuration
//! ([`ModuleKind`]), and the transient success flag the scheduler fills in.
//!
//! The gate ([`Module::should_run`]) decides per boot whether the module
//! executes, by matching the module's deterministic history key against the
//! recorded past:
//!
//! | Run type | Runs when |
//! |---|---|
//! | `PerBoot` | always |
//! | `PerInstance` | the *current* instance has no successful record of the key |
//! | `Once` | *no* instance has a successful record of the key |
//!
//! Successful records from prior instances do not suppress `PerInstance`;
//! they do suppress `Once`. Absent history always means "run".

use crate::history::{InstanceHistory, ModuleRecord};
use crate::modules::ModuleKind;

/// When a module executes relative to the instance lifecycle.
///
/// Exactly one run type is set per module; a declaration with zero or
/// several of the run-type flags is rejected at validation, so a
/// misconfigured module can never reach the gate.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum RunType {
    /// Run once, ever, across all instances that share the history store.
    Once,
    /// Run on every boot, unconditionally.
    PerBoot,
    /// Run once per instance.
    PerInstance,
}

impl RunType {
    /// Stable spelling used inside history keys.
    ///
    /// These strings are a persistence format; changing them re-executes
    /// every non-PerBoot module on upgraded hosts.
    pub fn as_key_part(&self) -> &'static str {
        match self {
            RunType::Once => "RunOnce",
            RunType::PerBoot => "RunPerBoot",
            RunType::PerInstance => "RunPerInstance",
        }
    }
}

/// One validated module of the run plan.
#[derive(Debug, Clone)]
pub struct Module {
    /// Unique name within the plan.
    pub name: String,
    /// Priority group, 1-based. Lower runs earlier.
    pub priority: u32,
    /// Whether a failure of this module terminates the run after its bucket.
    pub fatal_on_error: bool,
    /// Execution policy against instance history.
    pub run_type: RunType,
    /// Typed action configuration.
    pub kind: ModuleKind,
    /// Set by the scheduler: true after a successful run or a skip.
    pub success: bool,
}

impl Module {
    /// Generates the key identifying this module invocation across boots.
    ///
    /// Format: `<priority>_<runType>_<typeTag>_<name>`. Any rename, priority
    /// change, type change, or run-type change produces a new key and thus
    /// re-executes the module.
    pub fn history_key(&self) -> String {
        format!(
            "{}_{}_{}_{}",
            self.priority,
            self.run_type.as_key_part(),
            self.kind.tag(),
            self.name
        )
    }

    /// Derives the history record for this module's outcome.
    pub fn record(&self) -> ModuleRecord {
        ModuleRecord {
            key: self.history_key(),
            success: self.success,
        }
    }

    /// Decides whether the module must execute this boot.
    ///
    /// Deterministic in its inputs; see the module-level table for the
    /// per-run-type rules.
    pub fn should_run(&self, instance_id: &str, history: &[InstanceHistory]) -> bool {
        match self.run_type {
            RunType::PerBoot => true,
            RunType::PerInstance => {
                let key = self.history_key();
                for instance in history {
                    if instance.instance_id == instance_id {
                        // A matching instance decides: run unless this key
                        // already succeeded here.
                        return !instance.succeeded(&key);
                    }
                }
                true
            }
            RunType::Once => {
                let key = self.history_key();
                !history.iter().any(|h| h.succeeded(&key))
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::modules::CommandModule;

    fn module(name: &str, priority: u32, run_type: RunType) -> Module {
        Module {
            name: name.into(),
            priority,
            fatal_on_error: false,
            run_type,
            kind: ModuleKind::Command(CommandModule {
                cmd: vec!["true".into()],
                ..CommandModule::default()
            }),
            success: false,
        }
    }

    fn history(instance_id: &str, key: &str, success: bool) -> InstanceHistory {
        InstanceHistory::now(
            instance_id,
            vec![ModuleRecord {
                key: key.into(),
                success,
            }],
        )
    }

    #[test]
    fn history_key_format_is_stable() {
        let m = module("A", 1, RunType::PerInstance);
        assert_eq!(m.history_key(), "1_RunPerInstance_command_A");
        let m = module("A", 1, RunType::Once);
        assert_eq!(m.history_key(), "1_RunOnce_command_A");
        let m = module("A", 1, RunType::PerBoot);
        assert_eq!(m.history_key(), "1_RunPerBoot_command_A");
    }

    #[test]
    fn history_key_is_injective_over_fields() {
        let mut keys = std::collections::HashSet::new();
        for (name, priority, run_type) in [
            ("A", 1, RunType::Once),
            ("A", 1, RunType::PerBoot),
            ("A", 1, RunType::PerInstance),
            ("A", 2, RunType::Once),
            ("B", 1, RunType::Once),
        ] {
            assert!(keys.insert(module(name, priority, run_type).history_key()));
        }
    }

    #[test]
    fn per_boot_always_runs() {
        let m = module("A", 1, RunType::PerBoot);
        let key = m.history_key();
        let h = vec![history("i-A", &key, true)];
        assert!(m.should_run("i-A", &h));
        assert!(m.should_run("i-A", &[]));
    }

    #[test]
    fn run_once_suppressed_by_any_instance() {
        // A successful record under a *different* instance still suppresses.
        let m = module("A", 1, RunType::Once);
        let h = vec![history("i-OTHER", &m.history_key(), true)];
        assert!(!m.should_run("i-A", &h));
    }

    #[test]
    fn run_once_unsuccessful_record_does_not_suppress() {
        let m = module("A", 1, RunType::Once);
        let h = vec![history("i-A", &m.history_key(), false)];
        assert!(m.should_run("i-A", &h));
    }

    #[test]
    fn per_instance_scoped_to_current_instance() {
        // Success under i-A does not suppress the module on i-B.
        let m = module("K", 2, RunType::PerInstance);
        assert_eq!(m.history_key(), "2_RunPerInstance_command_K");
        let h = vec![history("i-A", &m.history_key(), true)];
        assert!(m.should_run("i-B", &h));
        assert!(!m.should_run("i-A", &h));
    }

    #[test]
    fn per_instance_matching_instance_without_key_runs() {
        let m = module("K", 2, RunType::PerInstance);
        let h = vec![history("i-A", "some_other_key", true)];
        assert!(m.should_run("i-A", &h));
    }

    #[test]
    fn absent_history_means_run() {
        assert!(module("A", 1, RunType::Once).should_run("i-A", &[]));
        assert!(module("A", 1, RunType::PerInstance).should_run("i-A", &[]));
    }

    #[test]
    fn gate_is_deterministic() {
        let m = module("A", 1, RunType::PerInstance);
        let h = vec![history("i-A", &m.history_key(), true)];
        let first = m.should_run("i-A", &h);
        for _ in 0..10 {
            assert_eq!(m.should_run("i-A", &h), first);
        }
    }
}
