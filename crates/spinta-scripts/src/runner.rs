//! Ordering and executing scripts
//!
//! Requested scripts (or every script of a type) are sorted by their
//! `required` edges, then checked and run one by one. A script whose
//! predecessor has not passed is skipped. Predecessors outside the
//! requested set are checked but never run.

use std::collections::{BTreeMap, BTreeSet, HashMap, HashSet};
use std::sync::Arc;

use spinta_core::{Context, Reportable};
use tracing::{debug, error, info, warn};

use crate::error::ScriptError;
use crate::registry::ScriptRegistry;
use crate::script::{Script, ScriptArgs, ScriptKey, ScriptStatus, ScriptType};

#[derive(Debug, Clone, Default)]
pub struct RunOptions {
    /// Run even when `check` finds nothing to do
    pub force: bool,
    pub destructive: bool,
    /// Report statuses without running anything
    pub check_only: bool,
    pub args: ScriptArgs,
}

/// Statuses kept across runs; only `PASSED` outlives the run that set it
#[derive(Debug, Clone, Default)]
pub struct StatusCache {
    statuses: HashMap<ScriptKey, ScriptStatus>,
}

impl StatusCache {
    pub fn get(&self, key: &ScriptKey) -> Option<ScriptStatus> {
        self.statuses.get(key).copied()
    }

    fn set(&mut self, key: ScriptKey, status: ScriptStatus) {
        if status == ScriptStatus::Skipped {
            self.statuses.remove(&key);
        } else {
            self.statuses.insert(key, status);
        }
    }

    /// Forget everything but `PASSED`
    fn settle(&mut self) {
        self.statuses.retain(|_, status| *status == ScriptStatus::Passed);
    }
}

#[derive(Debug, Clone, PartialEq)]
pub struct ScriptReport {
    pub key: ScriptKey,
    pub status: ScriptStatus,
    /// Set when `run` failed
    pub error: Option<String>,
}

impl ScriptReport {
    pub fn failed(&self) -> bool {
        self.error.is_some()
    }
}

/// One `<name>: <STATUS>` line per script
pub fn format_report(reports: &[ScriptReport]) -> String {
    reports
        .iter()
        .map(|report| match &report.error {
            Some(error) => format!("{}: {} ({})", report.key.name, report.status, error),
            None => format!("{}: {}", report.key.name, report.status),
        })
        .collect::<Vec<_>>()
        .join("\n")
}

/// Scripts in execution order; unknown predecessors are dropped, cycles
/// appended as they are
pub fn sort_scripts(registry: &ScriptRegistry, scripts: &[Arc<dyn Script>]) -> Vec<Arc<dyn Script>> {
    let nodes: BTreeMap<ScriptKey, Arc<dyn Script>> = scripts
        .iter()
        .map(|script| (script.key(), Arc::clone(script)))
        .collect();

    let mut in_degree: BTreeMap<&ScriptKey, usize> = nodes.keys().map(|key| (key, 0)).collect();
    let mut dependents: BTreeMap<&ScriptKey, Vec<&ScriptKey>> = BTreeMap::new();
    for (key, script) in &nodes {
        for requirement in script.required() {
            let predecessor = requirement.resolve(key.script_type);
            if registry.get(&predecessor).is_none() {
                warn!(script = %key, required = %predecessor, "unknown required script, ignoring");
                continue;
            }
            // Predecessors outside the set only gate, they do not order
            let Some((predecessor, _)) = nodes.get_key_value(&predecessor) else {
                continue;
            };
            dependents.entry(predecessor).or_default().push(key);
            if let Some(degree) = in_degree.get_mut(key) {
                *degree += 1;
            }
        }
    }

    let mut ready: BTreeSet<&ScriptKey> = in_degree
        .iter()
        .filter(|(_, degree)| **degree == 0)
        .map(|(key, _)| *key)
        .collect();
    let mut order: Vec<&ScriptKey> = Vec::with_capacity(nodes.len());
    while let Some(key) = ready.pop_first() {
        order.push(key);
        for dependent in dependents.get(key).into_iter().flatten() {
            if let Some(degree) = in_degree.get_mut(dependent) {
                *degree -= 1;
                if *degree == 0 {
                    ready.insert(*dependent);
                }
            }
        }
    }

    if order.len() < nodes.len() {
        let placed: HashSet<&ScriptKey> = order.iter().copied().collect();
        let rest: Vec<&ScriptKey> = nodes.keys().filter(|key| !placed.contains(key)).collect();
        warn!(scripts = ?rest.iter().map(|k| k.to_string()).collect::<Vec<_>>(), "dependency cycle in scripts");
        order.extend(rest);
    }

    order
        .into_iter()
        .filter_map(|key| nodes.get(key).cloned())
        .collect()
}

struct Runner<'a> {
    ctx: &'a Context,
    registry: &'a ScriptRegistry,
    options: &'a RunOptions,
    cache: &'a mut StatusCache,
    resolving: HashSet<ScriptKey>,
}

impl Runner<'_> {
    /// Status of a script that is not run here, checking it if needed
    fn status(&mut self, key: &ScriptKey) -> Result<ScriptStatus, ScriptError> {
        if let Some(status) = self.cache.get(key) {
            return Ok(status);
        }
        let Some(script) = self.registry.get(key).cloned() else {
            return Ok(ScriptStatus::Passed);
        };
        if !self.resolving.insert(key.clone()) {
            return Ok(ScriptStatus::Skipped);
        }
        let status = if self.blocked(script.as_ref())? {
            ScriptStatus::Skipped
        } else {
            match script.check(self.ctx, &self.options.args) {
                Ok(true) => ScriptStatus::Required,
                Ok(false) => ScriptStatus::Passed,
                Err(e) => {
                    warn!(script = %key, error = %e, "check failed");
                    ScriptStatus::Required
                }
            }
        };
        self.resolving.remove(key);
        self.cache.set(key.clone(), status);
        Ok(status)
    }

    fn blocked(&mut self, script: &dyn Script) -> Result<bool, ScriptError> {
        for requirement in script.required() {
            let predecessor = requirement.resolve(script.script_type());
            if self.registry.get(&predecessor).is_none() {
                continue;
            }
            match self.status(&predecessor)? {
                ScriptStatus::Required | ScriptStatus::Skipped => return Ok(true),
                ScriptStatus::Passed | ScriptStatus::Forced => {}
            }
        }
        Ok(false)
    }

    fn execute(&mut self, script: &dyn Script) -> Result<ScriptReport, ScriptError> {
        let key = script.key();
        let checked = if self.blocked(script)? {
            Ok(ScriptStatus::Skipped)
        } else {
            script.check(self.ctx, &self.options.args).map(|pending| {
                debug!(script = %key, pending, "script checked");
                if self.options.force {
                    ScriptStatus::Forced
                } else if pending {
                    ScriptStatus::Required
                } else {
                    ScriptStatus::Passed
                }
            })
        };
        let mut status = match checked {
            Ok(status) => status,
            Err(e) => {
                error!(script = %key, code = e.code().as_str(), error = %e, "check failed");
                self.cache.set(key.clone(), ScriptStatus::Required);
                return Ok(ScriptReport {
                    key,
                    status: ScriptStatus::Required,
                    error: Some(e.to_string()),
                });
            }
        };

        let mut failure = None;
        let runnable = matches!(status, ScriptStatus::Required | ScriptStatus::Forced);
        if runnable && !self.options.check_only {
            info!(script = %key, status = %status, "running script");
            match script.run(self.ctx, &self.options.args, self.options.destructive) {
                Ok(()) => {
                    self.cache.set(key.clone(), ScriptStatus::Passed);
                    info!(script = %key, "script finished");
                    return Ok(ScriptReport {
                        key,
                        status,
                        error: None,
                    });
                }
                Err(e) => {
                    error!(script = %key, code = e.code().as_str(), error = %e, "script failed");
                    failure = Some(e.to_string());
                    status = ScriptStatus::Required;
                }
            }
        }

        self.cache.set(key.clone(), status);
        Ok(ScriptReport {
            key,
            status,
            error: failure,
        })
    }
}

/// Run `names` of `script_type`, or every script of that type when
/// `names` is empty
pub fn run_scripts(
    ctx: &Context,
    registry: &ScriptRegistry,
    script_type: ScriptType,
    names: &[String],
    options: &RunOptions,
    cache: &mut StatusCache,
) -> Result<Vec<ScriptReport>, ScriptError> {
    let scripts: Vec<Arc<dyn Script>> = if names.is_empty() {
        registry.of_type(script_type).cloned().collect()
    } else {
        names
            .iter()
            .map(|name| registry.find(script_type, name).cloned())
            .collect::<Result<_, _>>()?
    };

    let ordered = sort_scripts(registry, &scripts);
    let mut runner = Runner {
        ctx,
        registry,
        options,
        cache,
        resolving: HashSet::new(),
    };
    let mut reports = Vec::with_capacity(ordered.len());
    for script in &ordered {
        reports.push(runner.execute(script.as_ref())?);
    }
    runner.cache.settle();
    Ok(reports)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::script::Requirement;
    use spinta_core::Config;
    use std::sync::atomic::{AtomicBool, AtomicUsize, Ordering};

    struct Fake {
        name: &'static str,
        required: Vec<Requirement>,
        pending: AtomicBool,
        runs: AtomicUsize,
        checks: AtomicUsize,
        fail: bool,
        broken_check: bool,
    }

    impl Fake {
        fn new(name: &'static str, required: Vec<Requirement>, pending: bool) -> Arc<Self> {
            Arc::new(Self {
                name,
                required,
                pending: AtomicBool::new(pending),
                runs: AtomicUsize::new(0),
                checks: AtomicUsize::new(0),
                fail: false,
                broken_check: false,
            })
        }
    }

    impl Script for Fake {
        fn name(&self) -> &'static str {
            self.name
        }

        fn script_type(&self) -> ScriptType {
            ScriptType::Upgrade
        }

        fn required(&self) -> Vec<Requirement> {
            self.required.clone()
        }

        fn check(&self, _ctx: &Context, _args: &ScriptArgs) -> Result<bool, ScriptError> {
            self.checks.fetch_add(1, Ordering::SeqCst);
            if self.broken_check {
                return Err(ScriptError::ClientNotFound(self.name.to_string()));
            }
            Ok(self.pending.load(Ordering::SeqCst))
        }

        fn run(&self, _ctx: &Context, _args: &ScriptArgs, _destructive: bool) -> Result<(), ScriptError> {
            self.runs.fetch_add(1, Ordering::SeqCst);
            if self.fail {
                return Err(ScriptError::ClientNotFound(self.name.to_string()));
            }
            self.pending.store(false, Ordering::SeqCst);
            Ok(())
        }
    }

    fn registry(scripts: &[Arc<Fake>]) -> ScriptRegistry {
        let mut registry = ScriptRegistry::new();
        for script in scripts {
            registry.register(Arc::clone(script) as Arc<dyn Script>).unwrap();
        }
        registry
    }

    fn names(reports: &[ScriptReport]) -> Vec<(&str, ScriptStatus)> {
        reports.iter().map(|r| (r.key.name.as_str(), r.status)).collect()
    }

    #[test]
    fn test_topological_order_is_deterministic() {
        let c = Fake::new("c", vec![Requirement::Name("a")], false);
        let a = Fake::new("a", vec![Requirement::Name("b")], false);
        let b = Fake::new("b", vec![], false);
        let registry = registry(&[c, a, b]);
        let all: Vec<Arc<dyn Script>> = registry.of_type(ScriptType::Upgrade).cloned().collect();
        let order: Vec<&str> = sort_scripts(&registry, &all).iter().map(|s| s.name()).collect();
        assert_eq!(order, vec!["b", "a", "c"]);
    }

    #[test]
    fn test_unknown_predecessor_and_cycle() {
        let a = Fake::new("a", vec![Requirement::Name("missing"), Requirement::Name("b")], false);
        let b = Fake::new("b", vec![Requirement::Name("a")], false);
        let d = Fake::new("d", vec![], false);
        let registry = registry(&[a, b, d]);
        let all: Vec<Arc<dyn Script>> = registry.of_type(ScriptType::Upgrade).cloned().collect();
        let order: Vec<&str> = sort_scripts(&registry, &all).iter().map(|s| s.name()).collect();
        assert_eq!(order, vec!["d", "a", "b"]);
    }

    #[test]
    fn test_required_runs_then_passes() {
        let ctx = Context::new(Config::default());
        let a = Fake::new("a", vec![], true);
        let b = Fake::new("b", vec![Requirement::Name("a")], true);
        let registry = registry(&[Arc::clone(&a), Arc::clone(&b)]);
        let mut cache = StatusCache::default();

        let reports = run_scripts(&ctx, &registry, ScriptType::Upgrade, &[], &RunOptions::default(), &mut cache).unwrap();
        assert_eq!(names(&reports), vec![("a", ScriptStatus::Required), ("b", ScriptStatus::Required)]);
        assert_eq!(a.runs.load(Ordering::SeqCst), 1);
        assert_eq!(b.runs.load(Ordering::SeqCst), 1);

        let mut fresh = StatusCache::default();
        let reports = run_scripts(&ctx, &registry, ScriptType::Upgrade, &[], &RunOptions::default(), &mut fresh).unwrap();
        assert_eq!(names(&reports), vec![("a", ScriptStatus::Passed), ("b", ScriptStatus::Passed)]);
        assert_eq!(format_report(&reports), "a: PASSED\nb: PASSED");
    }

    #[test]
    fn test_check_only_skips_dependents() {
        let ctx = Context::new(Config::default());
        let a = Fake::new("a", vec![], true);
        let b = Fake::new("b", vec![Requirement::Name("a")], true);
        let registry = registry(&[Arc::clone(&a), Arc::clone(&b)]);
        let options = RunOptions {
            check_only: true,
            ..RunOptions::default()
        };
        let reports = run_scripts(&ctx, &registry, ScriptType::Upgrade, &[], &options, &mut StatusCache::default()).unwrap();
        assert_eq!(names(&reports), vec![("a", ScriptStatus::Required), ("b", ScriptStatus::Skipped)]);
        assert_eq!(a.runs.load(Ordering::SeqCst), 0);
        assert_eq!(b.runs.load(Ordering::SeqCst), 0);
        // check stays stable without a run
        assert!(a.check(&ctx, &ScriptArgs::default()).unwrap());
        assert!(a.check(&ctx, &ScriptArgs::default()).unwrap());
    }

    #[test]
    fn test_failure_suppresses_dependents() {
        let ctx = Context::new(Config::default());
        let a = Arc::new(Fake {
            fail: true,
            ..Arc::into_inner(Fake::new("a", vec![], true)).unwrap()
        });
        let b = Fake::new("b", vec![Requirement::Name("a")], true);
        let registry = registry(&[Arc::clone(&a), Arc::clone(&b)]);
        let reports = run_scripts(&ctx, &registry, ScriptType::Upgrade, &[], &RunOptions::default(), &mut StatusCache::default()).unwrap();
        assert!(reports[0].failed());
        assert_eq!(reports[1].status, ScriptStatus::Skipped);
        assert_eq!(b.runs.load(Ordering::SeqCst), 0);
    }

    #[test]
    fn test_force_and_requested_subset() {
        let ctx = Context::new(Config::default());
        let a = Fake::new("a", vec![], false);
        let b = Fake::new("b", vec![Requirement::Name("a")], false);
        let registry = registry(&[Arc::clone(&a), Arc::clone(&b)]);
        let options = RunOptions {
            force: true,
            ..RunOptions::default()
        };
        let reports = run_scripts(&ctx, &registry, ScriptType::Upgrade, &["b".to_string()], &options, &mut StatusCache::default()).unwrap();
        assert_eq!(names(&reports), vec![("b", ScriptStatus::Forced)]);
        assert_eq!(a.runs.load(Ordering::SeqCst), 0);
        assert_eq!(b.runs.load(Ordering::SeqCst), 1);
        assert_eq!(b.checks.load(Ordering::SeqCst), 1);

        let err = run_scripts(&ctx, &registry, ScriptType::Upgrade, &["nope".to_string()], &options, &mut StatusCache::default()).unwrap_err();
        assert!(matches!(err, ScriptError::ScriptNotFound { .. }));
    }

    #[test]
    fn test_force_still_reports_check_errors() {
        let ctx = Context::new(Config::default());
        let a = Arc::new(Fake {
            broken_check: true,
            ..Arc::into_inner(Fake::new("a", vec![], false)).unwrap()
        });
        let registry = registry(&[Arc::clone(&a)]);
        let options = RunOptions {
            force: true,
            ..RunOptions::default()
        };
        let reports = run_scripts(&ctx, &registry, ScriptType::Upgrade, &[], &options, &mut StatusCache::default()).unwrap();
        assert_eq!(names(&reports), vec![("a", ScriptStatus::Required)]);
        assert!(reports[0].failed());
        assert_eq!(a.checks.load(Ordering::SeqCst), 1);
        assert_eq!(a.runs.load(Ordering::SeqCst), 0);
    }
}
