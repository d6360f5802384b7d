//! # Scheduler: drives the run plan bucket by bucket.
//!
//! The [`Scheduler`] owns the run pipeline (event bus, subscribers) and
//! executes a [`RunPlan`] under the ordering and failure rules of the boot
//! contract:
//!
//! - Buckets are visited in ascending priority; within a bucket, one
//!   concurrent task per module with a join barrier before the next bucket.
//! - A module failure never interrupts its siblings; with `fatal_on_error`
//!   it sets the aggregate-fatal sentinel, checked only after the join.
//! - Once the sentinel is set, no further bucket starts.
//!
//! The scheduler itself performs no I/O beyond event publication; reading
//! prior history and writing the end-of-run record belong to the caller,
//! which must persist history on *every* exit path where the scheduler ran.
//!
//! ```rust,no_run
//! use std::sync::Arc;
//! use initvisor::{
//!     HistoryStore, InstanceHistory, LogWriter, ModuleContext, RunPlan, Scheduler, Subscribe,
//! };
//! # use initvisor::HttpImds;
//!
//! # #[tokio::main(flavor = "current_thread")]
//! # async fn main() {
//! # let modules = Vec::new();
//! # let store = HistoryStore::new("/tmp/instances", "history.json");
//! let ctx = ModuleContext::new(Arc::new(HttpImds::new()), "/tmp/instances/i-01");
//! let scheduler = Scheduler::new(ctx, vec![Arc::new(LogWriter) as Arc<dyn Subscribe>]);
//!
//! let outcome = scheduler
//!     .run(RunPlan::from_modules(modules), "i-01", Vec::new())
//!     .await;
//!
//! let history = InstanceHistory::now("i-01", outcome.plan.records());
//! store.write(&history).unwrap();
//! # }
//! ```

use std::sync::{Arc, Mutex};

use tokio::task::JoinSet;

use crate::config::RunPlan;
use crate::core::runner::run_module;
use crate::events::{Bus, Event, EventKind};
use crate::history::InstanceHistory;
use crate::modules::{Module, ModuleContext};
use crate::subscribers::{Subscribe, SubscriberSet};

const BUS_CAPACITY: usize = 1024;

/// What a finished run reports back to the caller.
pub struct RunOutcome {
    /// The plan with every module's success flag settled. Buckets after an
    /// aggregate fatal were never started; their modules stay unsuccessful.
    pub plan: RunPlan,
    /// Name of the module that triggered the aggregate fatal, if any. When
    /// several siblings in one bucket fail fatally, the last writer wins.
    pub fatal_module: Option<String>,
}

/// Priority-group scheduler over one boot's run plan.
pub struct Scheduler {
    bus: Bus,
    subs: Arc<SubscriberSet>,
    ctx: Arc<ModuleContext>,
}

impl Scheduler {
    /// Creates a scheduler with the given per-run context and subscribers
    /// (maybe empty).
    pub fn new(ctx: ModuleContext, subscribers: Vec<Arc<dyn Subscribe>>) -> Self {
        Self {
            bus: Bus::new(BUS_CAPACITY),
            subs: Arc::new(SubscriberSet::new(subscribers)),
            ctx: Arc::new(ctx),
        }
    }

    /// Executes the plan to completion (or aggregate fatal) and returns the
    /// settled plan.
    ///
    /// Consumes the scheduler: a run plan is executed once per boot, and
    /// the event pipeline is closed and drained before returning so no
    /// lifecycle event is lost.
    pub async fn run(
        self,
        mut plan: RunPlan,
        instance_id: &str,
        history: Vec<InstanceHistory>,
    ) -> RunOutcome {
        // Spawn the listener before any publish to avoid missing early events.
        let listener = self.spawn_subscriber_listener();

        let instance_id: Arc<str> = Arc::from(instance_id);
        let history = Arc::new(history);
        let fatal: Arc<Mutex<Option<String>>> = Arc::new(Mutex::new(None));

        for index in 0..plan.bucket_count() {
            let group = (index + 1) as u32;
            let bucket = &mut plan.buckets_mut()[index];
            self.bus.publish(
                Event::now(EventKind::BucketStarted)
                    .with_group(group)
                    .with_message(format!("{} modules", bucket.len())),
            );

            let mut set: JoinSet<Module> = JoinSet::new();
            for module in bucket.drain(..) {
                set.spawn(run_module(
                    module,
                    Arc::clone(&self.ctx),
                    Arc::clone(&instance_id),
                    Arc::clone(&history),
                    self.bus.clone(),
                    Arc::clone(&fatal),
                ));
            }

            // Join barrier: nothing of bucket i+1 starts before every task
            // of bucket i has finished.
            let mut finished = Vec::with_capacity(set.len());
            while let Some(joined) = set.join_next().await {
                match joined {
                    Ok(module) => finished.push(module),
                    // run_module shields against action panics, so a join
                    // error here would be a runtime defect; it is logged
                    // and the module's record is lost for this run.
                    Err(e) => tracing::error!(error = %e, "module task failed to join"),
                }
            }
            *bucket = finished;

            self.bus
                .publish(Event::now(EventKind::BucketCompleted).with_group(group));

            if fatal.lock().expect("fatal sentinel lock").is_some() {
                break;
            }
        }

        let fatal_module = fatal.lock().expect("fatal sentinel lock").take();

        // Close the pipeline: dropping the last bus sender ends the
        // listener once it has drained, and shutting the set down flushes
        // every per-subscriber queue.
        let Scheduler { bus, subs, ctx: _ } = self;
        drop(bus);
        let _ = listener.await;
        if let Ok(set) = Arc::try_unwrap(subs) {
            set.shutdown().await;
        }

        RunOutcome { plan, fatal_module }
    }

    /// Spawns the background task that receives bus events and fans them
    /// out to subscribers. Ends when the bus closes.
    fn spawn_subscriber_listener(&self) -> tokio::task::JoinHandle<()> {
        let mut rx = self.bus.subscribe();
        let set = Arc::clone(&self.subs);

        tokio::spawn(async move {
            loop {
                match rx.recv().await {
                    Ok(ev) => set.emit_arc(Arc::new(ev)),
                    Err(tokio::sync::broadcast::error::RecvError::Closed) => break,
                    Err(tokio::sync::broadcast::error::RecvError::Lagged(_)) => continue,
                }
            }
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::validate_all;
    use crate::config::ModuleDecl;
    use crate::history::ModuleRecord;
    use crate::imds::{Imds, ImdsError};
    use crate::modules::CommandModule;
    use async_trait::async_trait;

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

    fn command_decl(name: &str, priority: u32, argv: &[&str]) -> ModuleDecl {
        ModuleDecl {
            name: name.into(),
            priority_group: priority,
            run_per_boot: true,
            command: Some(CommandModule {
                cmd: argv.iter().map(|s| s.to_string()).collect(),
                ..CommandModule::default()
            }),
            ..ModuleDecl::default()
        }
    }

    fn plan(decls: Vec<ModuleDecl>) -> RunPlan {
        RunPlan::from_modules(validate_all(decls).unwrap())
    }

    #[tokio::test]
    async fn first_boot_single_module_succeeds_and_records() {
        let mut decl = command_decl("A", 1, &["true"]);
        decl.run_per_boot = false;
        decl.run_per_instance = true;

        let outcome = Scheduler::new(ctx(), Vec::new())
            .run(plan(vec![decl]), "i-000000000000001", Vec::new())
            .await;

        assert!(outcome.fatal_module.is_none());
        let records = outcome.plan.records();
        assert_eq!(
            records,
            vec![ModuleRecord {
                key: "1_RunPerInstance_command_A".into(),
                success: true,
            }]
        );
    }

    #[tokio::test]
    async fn run_once_suppression_propagates_success() {
        let mut decl = command_decl("A", 1, &["false"]);
        decl.run_per_boot = false;
        decl.run_once = true;

        // A successful record under any instance suppresses RunOnce; the
        // command would fail if it actually ran.
        let prior = InstanceHistory::now(
            "i-SOMEONE-ELSE",
            vec![ModuleRecord {
                key: "1_RunOnce_command_A".into(),
                success: true,
            }],
        );

        let outcome = Scheduler::new(ctx(), Vec::new())
            .run(plan(vec![decl]), "i-CURRENT", vec![prior])
            .await;

        assert!(outcome.fatal_module.is_none());
        assert_eq!(
            outcome.plan.records(),
            vec![ModuleRecord {
                key: "1_RunOnce_command_A".into(),
                success: true,
            }]
        );
    }

    #[tokio::test]
    async fn per_instance_record_of_other_instance_does_not_suppress() {
        let mut decl = command_decl("K", 2, &["true"]);
        decl.run_per_boot = false;
        decl.run_per_instance = true;

        let prior = InstanceHistory::now(
            "i-A",
            vec![ModuleRecord {
                key: "2_RunPerInstance_command_K".into(),
                success: true,
            }],
        );

        let events = record_events(plan(vec![decl]), "i-B", vec![prior]).await;
        assert!(
            events.contains(&EventKind::ModuleStarting),
            "module must run on a new instance: {events:?}"
        );
    }

    /// Runs a plan with a recording subscriber and returns the event kinds.
    async fn record_events(
        plan: RunPlan,
        instance_id: &str,
        history: Vec<InstanceHistory>,
    ) -> Vec<EventKind> {
        let seen = Arc::new(Mutex::new(Vec::new()));

        struct Recorder {
            seen: Arc<Mutex<Vec<EventKind>>>,
        }
        #[async_trait]
        impl Subscribe for Recorder {
            async fn on_event(&self, event: &Event) {
                self.seen.lock().unwrap().push(event.kind);
            }
            fn name(&self) -> &'static str {
                "recorder"
            }
        }

        let scheduler = Scheduler::new(
            ctx(),
            vec![Arc::new(Recorder { seen: seen.clone() }) as Arc<dyn Subscribe>],
        );
        scheduler.run(plan, instance_id, history).await;
        let events = seen.lock().unwrap().clone();
        events
    }

    #[tokio::test]
    async fn second_boot_skips_per_instance_module() {
        use crate::history::HistoryStore;

        let tmp = tempfile::tempdir().unwrap();
        let store = HistoryStore::new(tmp.path().join("instances"), "history.json");
        let marker = tmp.path().join("ran.log");
        let marker_str = marker.to_string_lossy().into_owned();

        let decl = || {
            let mut d = command_decl(
                "once-per-instance",
                1,
                &["sh", "-c", &format!("echo ran >> {marker_str}")],
            );
            d.run_per_boot = false;
            d.run_per_instance = true;
            d
        };

        // First boot: the module runs and its success is persisted.
        let history = store.read_all().unwrap();
        let outcome = Scheduler::new(ctx(), Vec::new())
            .run(plan(vec![decl()]), "i-0001", history)
            .await;
        store
            .write(&InstanceHistory::now("i-0001", outcome.plan.records()))
            .unwrap();
        assert_eq!(std::fs::read_to_string(&marker).unwrap(), "ran\n");

        // Second boot of the same instance: the gate suppresses the module
        // but its success still propagates into the new history.
        let history = store.read_all().unwrap();
        let outcome = Scheduler::new(ctx(), Vec::new())
            .run(plan(vec![decl()]), "i-0001", history)
            .await;
        store
            .write(&InstanceHistory::now("i-0001", outcome.plan.records()))
            .unwrap();
        assert_eq!(std::fs::read_to_string(&marker).unwrap(), "ran\n");
        assert!(store.read_all().unwrap()[0].module_history[0].success);

        // A different instance runs it again.
        let history = store.read_all().unwrap();
        Scheduler::new(ctx(), Vec::new())
            .run(plan(vec![decl()]), "i-0002", history)
            .await;
        assert_eq!(std::fs::read_to_string(&marker).unwrap(), "ran\nran\n");
    }

    #[tokio::test]
    async fn fatal_sibling_completes_bucket_but_stops_later_buckets() {
        // Bucket 1: A fails non-fatally, B fails fatally. Bucket 2: C.
        let mut a = command_decl("A", 1, &["false"]);
        a.fatal_on_error = false;
        let mut b = command_decl("B", 1, &["false"]);
        b.fatal_on_error = true;
        let c = command_decl("C", 2, &["true"]);

        let outcome = Scheduler::new(ctx(), Vec::new())
            .run(plan(vec![a, b, c]), "i-X", Vec::new())
            .await;

        assert_eq!(outcome.fatal_module.as_deref(), Some("B"));

        // History still covers every module; C never ran.
        let mut records = outcome.plan.records();
        records.sort_by(|x, y| x.key.cmp(&y.key));
        assert_eq!(records.len(), 3);
        assert!(records.iter().all(|r| !r.success));
    }

    #[tokio::test]
    async fn priority_gap_visits_empty_bucket() {
        let plan = plan(vec![
            command_decl("A", 1, &["true"]),
            command_decl("B", 3, &["true"]),
        ]);
        assert_eq!(plan.bucket_count(), 3);

        let outcome = Scheduler::new(ctx(), Vec::new())
            .run(plan, "i-X", Vec::new())
            .await;

        assert!(outcome.fatal_module.is_none());
        assert_eq!(outcome.plan.bucket_count(), 3);
        assert!(outcome.plan.buckets()[1].is_empty());
        assert!(outcome.plan.records().iter().all(|r| r.success));
    }

    #[tokio::test]
    async fn buckets_run_in_strict_priority_order() {
        // Each module appends its name to a shared log file; priority 1 is
        // slow, so out-of-order scheduling would surface as "2" before "1".
        let tmp = tempfile::tempdir().unwrap();
        let log = tmp.path().join("order.log");
        let log_str = log.to_string_lossy().into_owned();

        let slow_first = command_decl(
            "slow-first",
            1,
            &[
                "sh",
                "-c",
                &format!("sleep 0.2 && echo 1 >> {log_str}"),
            ],
        );
        let fast_second = command_decl("fast-second", 2, &["sh", "-c", &format!("echo 2 >> {log_str}")]);

        let outcome = Scheduler::new(ctx(), Vec::new())
            .run(plan(vec![fast_second, slow_first]), "i-X", Vec::new())
            .await;
        assert!(outcome.fatal_module.is_none());

        let order = std::fs::read_to_string(&log).unwrap();
        assert_eq!(order, "1\n2\n");
    }

    #[tokio::test]
    async fn siblings_in_a_bucket_all_run_despite_failures() {
        let tmp = tempfile::tempdir().unwrap();
        let log = tmp.path().join("siblings.log");
        let log_str = log.to_string_lossy().into_owned();

        let failing = command_decl("failing", 1, &["false"]);
        let surviving = command_decl(
            "surviving",
            1,
            &["sh", "-c", &format!("sleep 0.1 && echo ran >> {log_str}")],
        );

        let outcome = Scheduler::new(ctx(), Vec::new())
            .run(plan(vec![failing, surviving]), "i-X", Vec::new())
            .await;

        assert!(outcome.fatal_module.is_none());
        assert_eq!(std::fs::read_to_string(&log).unwrap(), "ran\n");
        let successes: Vec<bool> = {
            let mut records = outcome.plan.records();
            records.sort_by(|x, y| x.key.cmp(&y.key));
            records.into_iter().map(|r| r.success).collect()
        };
        // "failing" sorts before "surviving".
        assert_eq!(successes, vec![false, true]);
    }
}
