use crate::quality::aggregate::{aggregate, BadSpillSet};
use crate::quality::error::Result;
use crate::quality::rules::{Rule, SpillId};
use crate::quality::store::SpillStore;
use crate::quality::thresholds::{Resolution, ThresholdProfile};
use serde::{Deserialize, Serialize};
use std::collections::BTreeSet;
use std::sync::atomic::{AtomicBool, AtomicUsize, Ordering};
use std::thread;
use std::time::Instant;

/// What to do when a rule's query fails.
///
/// `FailFast` aborts the evaluation and returns the error; no set is
/// produced. `Partial` keeps evaluating the other rules and reports the
/// failures; the resulting set is then incomplete and must not be cached.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum FailurePolicy {
    #[default]
    FailFast,
    Partial,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct RuleOutcome {
    pub rule: Rule,
    pub violators: usize,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct RuleFailure {
    pub rule: Rule,
    pub error: String,
}

/// Result of one evaluation pass over a dataset.
#[derive(Debug, Clone, Serialize)]
pub struct EvaluationReport {
    pub server: String,
    pub schema: String,
    pub roadset: String,
    pub evaluated_at: String,
    pub complete: bool,
    pub outcomes: Vec<RuleOutcome>,
    pub failed_rules: Vec<RuleFailure>,
    pub bad_spills: BadSpillSet,
}

impl EvaluationReport {
    pub fn is_complete(&self) -> bool {
        self.complete
    }

    pub fn failed_rule_ids(&self) -> Vec<&'static str> {
        self.failed_rules.iter().map(|f| f.rule.id()).collect()
    }
}

type RuleResult = (Rule, Result<BTreeSet<SpillId>>);

/// Runs a set of rules against a dataset and unions their violators.
#[derive(Debug, Clone)]
pub struct Evaluator {
    roadset: String,
    profile: ThresholdProfile,
    rules: Vec<Rule>,
    policy: FailurePolicy,
    workers: usize,
}

impl Evaluator {
    pub fn new(roadset: impl Into<String>, profile: ThresholdProfile) -> Self {
        Self {
            roadset: roadset.into(),
            profile,
            rules: Rule::ALL.to_vec(),
            policy: FailurePolicy::default(),
            workers: 1,
        }
    }

    pub fn from_resolution(resolution: Resolution) -> Self {
        Self::new(resolution.roadset, resolution.profile)
    }

    /// Restrict (or reorder) the rules. Repeated rules run once.
    pub fn with_rules(mut self, rules: impl IntoIterator<Item = Rule>) -> Self {
        let mut seen = BTreeSet::new();
        self.rules = rules.into_iter().filter(|r| seen.insert(*r)).collect();
        self
    }

    pub fn with_policy(mut self, policy: FailurePolicy) -> Self {
        self.policy = policy;
        self
    }

    /// Upper bound on concurrently running rules. Only file-backed stores
    /// are evaluated in parallel; each worker opens its own read-only
    /// connection.
    pub fn with_workers(mut self, workers: usize) -> Self {
        self.workers = workers.max(1);
        self
    }

    pub fn profile(&self) -> &ThresholdProfile {
        &self.profile
    }

    pub fn rules(&self) -> &[Rule] {
        &self.rules
    }

    pub fn evaluate(&self, store: &SpillStore) -> Result<EvaluationReport> {
        let source = store.source();
        tracing::info!(
            server = %source.server,
            schema = %source.schema,
            roadset = %self.roadset,
            rules = self.rules.len(),
            "classifying spills"
        );

        let results = if self.workers > 1 && self.rules.len() > 1 && store.path().is_some() {
            self.run_parallel(store)?
        } else {
            self.run_sequential(store)
        };

        let mut outcomes = Vec::new();
        let mut failed_rules = Vec::new();
        let mut sets = Vec::new();
        for (rule, result) in results {
            match result {
                Ok(ids) => {
                    outcomes.push(RuleOutcome {
                        rule,
                        violators: ids.len(),
                    });
                    sets.push(ids);
                }
                Err(err) => {
                    tracing::error!(rule = %rule, "{err}");
                    match self.policy {
                        FailurePolicy::FailFast => return Err(err),
                        FailurePolicy::Partial => failed_rules.push(RuleFailure {
                            rule,
                            error: err.to_string(),
                        }),
                    }
                }
            }
        }

        let bad_spills = aggregate(sets);
        let complete = failed_rules.is_empty();
        if complete {
            tracing::info!(bad_spills = bad_spills.len(), "evaluation complete");
        } else {
            tracing::warn!(
                bad_spills = bad_spills.len(),
                failed = failed_rules.len(),
                "evaluation incomplete; bad spill set is partial"
            );
        }

        Ok(EvaluationReport {
            server: source.server.clone(),
            schema: source.schema.clone(),
            roadset: self.roadset.clone(),
            evaluated_at: chrono::Utc::now().to_rfc3339(),
            complete,
            outcomes,
            failed_rules,
            bad_spills,
        })
    }

    fn run_rule(&self, rule: Rule, store: &SpillStore) -> Result<BTreeSet<SpillId>> {
        let started = Instant::now();
        let ids = rule.evaluate(store, &self.profile)?;
        tracing::info!(
            rule = %rule,
            violators = ids.len(),
            elapsed_ms = started.elapsed().as_millis() as u64,
            "{} spills where {}",
            ids.len(),
            rule.describe(&self.profile)
        );
        Ok(ids)
    }

    fn run_sequential(&self, store: &SpillStore) -> Vec<RuleResult> {
        let mut results = Vec::with_capacity(self.rules.len());
        for &rule in &self.rules {
            let result = self.run_rule(rule, store);
            let failed = result.is_err();
            results.push((rule, result));
            if failed && self.policy == FailurePolicy::FailFast {
                break;
            }
        }
        results
    }

    /// Bounded pool of scoped workers pulling rules off a shared cursor.
    /// Results come back in rule order regardless of completion order. A
    /// worker that cannot open its connection fails the whole evaluation
    /// under either policy.
    fn run_parallel(&self, store: &SpillStore) -> Result<Vec<RuleResult>> {
        let workers = self.workers.min(self.rules.len());
        let cursor = AtomicUsize::new(0);
        let stop = AtomicBool::new(false);
        let (cursor, stop, source) = (&cursor, &stop, store.source());

        let per_worker: Vec<Result<Vec<(usize, RuleResult)>>> = thread::scope(|scope| {
            let handles: Vec<_> = (0..workers)
                .map(|_| {
                    scope.spawn(move || -> Result<Vec<(usize, RuleResult)>> {
                        let conn = SpillStore::open_read_only(source)?;
                        let mut done = Vec::new();
                        while !stop.load(Ordering::Relaxed) {
                            let index = cursor.fetch_add(1, Ordering::Relaxed);
                            let Some(&rule) = self.rules.get(index) else {
                                break;
                            };
                            let result = self.run_rule(rule, &conn);
                            if result.is_err() && self.policy == FailurePolicy::FailFast {
                                stop.store(true, Ordering::Relaxed);
                            }
                            done.push((index, (rule, result)));
                        }
                        Ok(done)
                    })
                })
                .collect();
            handles
                .into_iter()
                .map(|h| h.join().unwrap_or_else(|panic| std::panic::resume_unwind(panic)))
                .collect()
        });

        let mut indexed = Vec::with_capacity(self.rules.len());
        for worker in per_worker {
            indexed.extend(worker?);
        }
        indexed.sort_by_key(|(index, _)| *index);
        Ok(indexed.into_iter().map(|(_, result)| result).collect())
    }
}

/// Evaluate every rule with the fail-fast policy and return only the set.
pub fn bad_spills(store: &SpillStore, resolution: Resolution) -> Result<BadSpillSet> {
    Evaluator::from_resolution(resolution)
        .evaluate(store)
        .map(|report| report.bad_spills)
}
