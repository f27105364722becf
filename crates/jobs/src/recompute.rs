use crate::error::JobError;
use analytics::{
    concentration_index, feasibility_for, normalize_log, opportunity_score, rolling_current,
    select_baseline, BaselineWindow,
};
use async_trait::async_trait;
use configuration::ScoringConfig;
use core_types::{MonthlyTotal, ProgressSnapshot, YearMonth};
use database::{DbError, DbRepository};
use serde::Serialize;
use std::collections::HashMap;
use std::sync::Mutex as StateMutex;
use tokio::sync::Mutex;
use tracing::{info, warn};

/// The reads and writes the recompute pass needs. Implemented by
/// `DbRepository` for production and by in-memory stores in tests.
#[async_trait]
pub trait RecomputeStore: Send + Sync {
    async fn list_codes_with_sectors(&self) -> Result<Vec<(String, Vec<String>)>, DbError>;
    async fn monthly_totals(&self, code: &str) -> Result<Vec<MonthlyTotal>, DbError>;
    async fn partner_values(
        &self,
        code: &str,
        start: YearMonth,
        end: YearMonth,
    ) -> Result<Vec<f64>, DbError>;
    async fn save_recompute(&self, snapshots: &[ProgressSnapshot]) -> Result<(), DbError>;
}

#[async_trait]
impl RecomputeStore for DbRepository {
    async fn list_codes_with_sectors(&self) -> Result<Vec<(String, Vec<String>)>, DbError> {
        DbRepository::list_codes_with_sectors(self).await
    }

    async fn monthly_totals(&self, code: &str) -> Result<Vec<MonthlyTotal>, DbError> {
        DbRepository::monthly_totals(self, code).await
    }

    async fn partner_values(
        &self,
        code: &str,
        start: YearMonth,
        end: YearMonth,
    ) -> Result<Vec<f64>, DbError> {
        DbRepository::partner_values(self, code, start, end).await
    }

    async fn save_recompute(&self, snapshots: &[ProgressSnapshot]) -> Result<(), DbError> {
        DbRepository::save_recompute(self, snapshots).await
    }
}

/// Observable phase of the recompute job. Failed is sticky until the next
/// successful run resets it.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "lowercase")]
pub enum RunState {
    Idle,
    Collecting,
    Scoring,
    Persisting,
    Failed,
}

/// Outcome of one recompute run.
#[derive(Debug, Clone, Copy, Default, Serialize)]
pub struct RecomputeSummary {
    /// Commodities that produced a full metric set.
    pub processed: usize,
    /// Commodities persisted with null metrics (insufficient history).
    pub skipped: usize,
    /// Commodities dropped from the run after a read error.
    pub failed: usize,
}

/// Everything the pure scoring stage needs for one commodity, read up front
/// so the math itself touches no I/O.
#[derive(Debug, Clone)]
pub struct ScoringInput {
    pub code: String,
    pub sectors: Vec<String>,
    pub baseline: Option<BaselineWindow>,
    /// Rolling 12-month current total, when the series supports one.
    pub current: Option<f64>,
    pub baseline_partners: Vec<f64>,
    pub current_partners: Vec<f64>,
}

/// Recomputes every commodity's progress metrics from the raw monthly data.
///
/// The run is a full pass in three phases: collect the per-commodity series
/// and partner breakdowns, score the whole universe in memory, then persist
/// the snapshots in one transaction. At most one run is active at a time;
/// concurrent triggers are rejected, never queued.
pub struct RecomputeJob<'a> {
    store: &'a dyn RecomputeStore,
    policy_multiplier: f64,
    running: Mutex<()>,
    state: StateMutex<RunState>,
}

impl<'a> RecomputeJob<'a> {
    pub fn new(store: &'a dyn RecomputeStore, scoring: &ScoringConfig) -> Self {
        Self {
            store,
            policy_multiplier: scoring.policy_multiplier,
            running: Mutex::new(()),
            state: StateMutex::new(RunState::Idle),
        }
    }

    /// The current phase, for status reporting.
    pub fn state(&self) -> RunState {
        match self.state.lock() {
            Ok(state) => *state,
            Err(poisoned) => *poisoned.into_inner(),
        }
    }

    fn set_state(&self, next: RunState) {
        match self.state.lock() {
            Ok(mut state) => *state = next,
            Err(poisoned) => *poisoned.into_inner() = next,
        }
    }

    /// Runs one full recompute pass. Fails fast with `AlreadyRunning` when a
    /// pass is in flight.
    pub async fn run(&self) -> Result<RecomputeSummary, JobError> {
        let _guard = self
            .running
            .try_lock()
            .map_err(|_| JobError::AlreadyRunning)?;

        match self.run_locked().await {
            Ok(summary) => {
                self.set_state(RunState::Idle);
                Ok(summary)
            }
            Err(err) => {
                self.set_state(RunState::Failed);
                Err(err)
            }
        }
    }

    async fn run_locked(&self) -> Result<RecomputeSummary, JobError> {
        self.set_state(RunState::Collecting);
        let (inputs, failed) = self.collect().await?;

        self.set_state(RunState::Scoring);
        let snapshots = score_universe(&inputs, self.policy_multiplier);
        let processed = inputs.iter().filter(|i| i.current.is_some()).count();
        let skipped = inputs.len() - processed;

        self.set_state(RunState::Persisting);
        self.store.save_recompute(&snapshots).await?;

        let summary = RecomputeSummary { processed, skipped, failed };
        info!(
            processed = summary.processed,
            skipped = summary.skipped,
            failed = summary.failed,
            "recompute complete"
        );
        Ok(summary)
    }

    /// Reads the series and partner breakdowns for every known commodity.
    /// A read failure drops that commodity from the run and is counted; the
    /// initial code listing failing is fatal.
    async fn collect(&self) -> Result<(Vec<ScoringInput>, usize), JobError> {
        let codes = self.store.list_codes_with_sectors().await?;
        let mut inputs = Vec::with_capacity(codes.len());
        let mut failed = 0usize;

        for (code, sectors) in codes {
            match self.collect_one(&code, sectors).await {
                Ok(input) => inputs.push(input),
                Err(err) => {
                    warn!(code = %code, error = %err, "dropping commodity from recompute");
                    failed += 1;
                }
            }
        }

        Ok((inputs, failed))
    }

    async fn collect_one(
        &self,
        code: &str,
        sectors: Vec<String>,
    ) -> Result<ScoringInput, JobError> {
        let series = self.store.monthly_totals(code).await?;
        let baseline = select_baseline(&series);
        let current = rolling_current(&series);

        let baseline_partners = match &baseline {
            Some(window) => {
                self.store
                    .partner_values(code, window.start, window.end)
                    .await?
            }
            None => Vec::new(),
        };
        let current_partners = match &current {
            Some((_, start, end)) => self.store.partner_values(code, *start, *end).await?,
            None => Vec::new(),
        };

        Ok(ScoringInput {
            code: code.to_string(),
            sectors,
            baseline,
            current: current.map(|(total, _, _)| total),
            baseline_partners,
            current_partners,
        })
    }
}

/// The pure scoring stage: turns pre-fetched inputs into snapshot rows.
///
/// Normalization is relative to the whole universe, so the snapshots are
/// only meaningful as a set; scoring one commodity in isolation would pin
/// its normalized value to zero. Deterministic for a given input set.
pub fn score_universe(inputs: &[ScoringInput], policy_multiplier: f64) -> Vec<ProgressSnapshot> {
    let current_totals: HashMap<String, f64> = inputs
        .iter()
        .filter_map(|input| input.current.map(|total| (input.code.clone(), total)))
        .collect();
    let normalized = normalize_log(&current_totals);

    inputs
        .iter()
        .map(|input| {
            let baseline_value = input.baseline.as_ref().map(|window| window.value);
            let baseline_period = input.baseline.as_ref().map(|window| window.label.clone());

            let hhi_baseline = input
                .baseline
                .as_ref()
                .map(|_| concentration_index(&input.baseline_partners));
            let hhi_current = input
                .current
                .map(|_| concentration_index(&input.current_partners));

            let reduction_abs = match (baseline_value, input.current) {
                (Some(baseline), Some(current)) => Some(baseline - current),
                _ => None,
            };
            let reduction_pct = match (baseline_value, reduction_abs) {
                (Some(baseline), Some(abs)) if baseline > 0.0 => Some(abs / baseline),
                _ => None,
            };
            let concentration_shift = match (hhi_baseline, hhi_current) {
                (None, None) => None,
                (b, c) => Some(b.unwrap_or(0.0) - c.unwrap_or(0.0)),
            };

            let opportunity = input.current.map(|_| {
                opportunity_score(
                    normalized.get(&input.code).copied(),
                    hhi_current.unwrap_or(0.0),
                    feasibility_for(&input.sectors),
                    policy_multiplier,
                )
            });

            ProgressSnapshot {
                code: input.code.clone(),
                baseline_value,
                baseline_period,
                current_value: input.current,
                reduction_abs,
                reduction_pct,
                hhi_baseline,
                hhi_current,
                concentration_shift,
                opportunity_score: opportunity,
                last_updated: None,
            }
        })
        .collect()
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::collections::HashMap as Map;
    use std::sync::Mutex as SyncMutex;
    use std::time::Duration;

    fn window(value: f64, label: &str) -> BaselineWindow {
        BaselineWindow {
            value,
            label: label.to_string(),
            start: YearMonth { year: 2022, month: 1 },
            end: YearMonth { year: 2022, month: 12 },
        }
    }

    fn input(code: &str, baseline: Option<f64>, current: Option<f64>) -> ScoringInput {
        ScoringInput {
            code: code.to_string(),
            sectors: vec!["electronics".to_string()],
            baseline: baseline.map(|value| window(value, "2022")),
            current,
            baseline_partners: vec![100.0, 20.0],
            current_partners: vec![80.0, 40.0],
        }
    }

    fn series(from: (i32, u32), count: usize, value: f64) -> Vec<MonthlyTotal> {
        let mut out = Vec::with_capacity(count);
        let (mut year, mut month) = from;
        for _ in 0..count {
            out.push(MonthlyTotal { year, month, total: Some(value) });
            month += 1;
            if month > 12 {
                month = 1;
                year += 1;
            }
        }
        out
    }

    /// In-memory store: fixed series per code, records persisted snapshots.
    /// Optional knobs slow the listing down or fail the persist.
    #[derive(Default)]
    struct MemoryStore {
        codes: Vec<(String, Vec<String>)>,
        series: Map<String, Vec<MonthlyTotal>>,
        saved: SyncMutex<Vec<ProgressSnapshot>>,
        list_delay: Option<Duration>,
        fail_persist: bool,
    }

    impl MemoryStore {
        fn with_commodity(code: &str, series: Vec<MonthlyTotal>) -> Self {
            Self {
                codes: vec![(code.to_string(), vec!["electronics".to_string()])],
                series: Map::from([(code.to_string(), series)]),
                ..Self::default()
            }
        }
    }

    #[async_trait]
    impl RecomputeStore for MemoryStore {
        async fn list_codes_with_sectors(&self) -> Result<Vec<(String, Vec<String>)>, DbError> {
            if let Some(delay) = self.list_delay {
                tokio::time::sleep(delay).await;
            }
            Ok(self.codes.clone())
        }

        async fn monthly_totals(&self, code: &str) -> Result<Vec<MonthlyTotal>, DbError> {
            Ok(self.series.get(code).cloned().unwrap_or_default())
        }

        async fn partner_values(
            &self,
            _code: &str,
            _start: YearMonth,
            _end: YearMonth,
        ) -> Result<Vec<f64>, DbError> {
            Ok(vec![100.0, 20.0])
        }

        async fn save_recompute(&self, snapshots: &[ProgressSnapshot]) -> Result<(), DbError> {
            if self.fail_persist {
                return Err(DbError::NotFound);
            }
            self.saved.lock().unwrap().extend_from_slice(snapshots);
            Ok(())
        }
    }

    #[tokio::test]
    async fn full_run_persists_and_returns_to_idle() {
        let store = MemoryStore::with_commodity("850440", series((2023, 1), 14, 100.0));
        let job = RecomputeJob::new(&store, &ScoringConfig::default());

        let summary = job.run().await.unwrap();

        assert_eq!(summary.processed, 1);
        assert_eq!(summary.skipped, 0);
        assert_eq!(summary.failed, 0);
        assert_eq!(job.state(), RunState::Idle);
        let saved = store.saved.lock().unwrap();
        assert_eq!(saved.len(), 1);
        assert_eq!(saved[0].baseline_period.as_deref(), Some("2023-01_to_2023-12"));
        assert!(saved[0].opportunity_score.is_some());
    }

    #[tokio::test]
    async fn concurrent_trigger_is_rejected_not_queued() {
        let mut store = MemoryStore::with_commodity("850440", series((2023, 1), 14, 100.0));
        store.list_delay = Some(Duration::from_millis(20));
        let job = RecomputeJob::new(&store, &ScoringConfig::default());

        // The first future takes the guard on its first poll and then parks
        // on the slow listing; the second must bounce immediately.
        let (first, second) = tokio::join!(job.run(), job.run());

        assert!(first.is_ok());
        assert!(matches!(second, Err(JobError::AlreadyRunning)));
        assert_eq!(store.saved.lock().unwrap().len(), 1);

        // The guard is released once the run finishes.
        assert!(job.run().await.is_ok());
    }

    #[tokio::test]
    async fn failed_persist_leaves_the_job_failed_and_writes_nothing() {
        let mut store = MemoryStore::with_commodity("850440", series((2023, 1), 14, 100.0));
        store.fail_persist = true;
        let job = RecomputeJob::new(&store, &ScoringConfig::default());

        let result = job.run().await;

        assert!(matches!(result, Err(JobError::Db(_))));
        assert_eq!(job.state(), RunState::Failed);
        assert!(store.saved.lock().unwrap().is_empty());
    }

    #[test]
    fn reduction_metrics_follow_the_windows() {
        let snapshots = score_universe(&[input("850440", Some(1_200.0), Some(900.0))], 1.0);
        let snap = &snapshots[0];
        assert_eq!(snap.baseline_value, Some(1_200.0));
        assert_eq!(snap.baseline_period.as_deref(), Some("2022"));
        assert_eq!(snap.current_value, Some(900.0));
        assert_eq!(snap.reduction_abs, Some(300.0));
        assert_eq!(snap.reduction_pct, Some(0.25));
        // Baseline shares 100/20 vs current 80/40: concentration fell.
        assert!(snap.concentration_shift.unwrap() > 0.0);
    }

    #[test]
    fn insufficient_history_yields_a_null_metric_row() {
        let snapshots = score_universe(&[input("999999", None, None)], 1.0);
        let snap = &snapshots[0];
        assert_eq!(snap.code, "999999");
        assert_eq!(snap.baseline_value, None);
        assert_eq!(snap.current_value, None);
        assert_eq!(snap.reduction_abs, None);
        assert_eq!(snap.reduction_pct, None);
        assert_eq!(snap.hhi_baseline, None);
        assert_eq!(snap.hhi_current, None);
        assert_eq!(snap.concentration_shift, None);
        assert_eq!(snap.opportunity_score, None);
    }

    #[test]
    fn baseline_without_current_still_reports_the_baseline() {
        let snapshots = score_universe(&[input("850440", Some(500.0), None)], 1.0);
        let snap = &snapshots[0];
        assert_eq!(snap.baseline_value, Some(500.0));
        assert!(snap.hhi_baseline.is_some());
        assert_eq!(snap.current_value, None);
        assert_eq!(snap.reduction_pct, None);
        assert_eq!(snap.opportunity_score, None);
    }

    #[test]
    fn normalization_is_relative_to_the_universe() {
        let inputs = vec![
            input("111111", Some(1_000.0), Some(1_000_000.0)),
            input("222222", Some(1_000.0), Some(1_000.0)),
        ];
        let snapshots = score_universe(&inputs, 1.0);
        let big = snapshots[0].opportunity_score.unwrap();
        let small = snapshots[1].opportunity_score.unwrap();
        assert!(big > small);
        // The smallest current total normalizes to zero, so its score is zero.
        assert_eq!(small, 0.0);

        // The largest normalizes to one: score = (1 - hhi) * feasibility.
        let hhi = concentration_index(&[80.0, 40.0]);
        let expected = (1.0 - hhi) * 0.7;
        assert!((big - expected).abs() < 1e-9);
    }

    #[test]
    fn scoring_is_deterministic() {
        let inputs = vec![
            input("111111", Some(1_200.0), Some(900.0)),
            input("222222", None, Some(400.0)),
        ];
        let first = score_universe(&inputs, 1.0);
        let second = score_universe(&inputs, 1.0);
        assert_eq!(first, second);
    }

    #[test]
    fn policy_multiplier_scales_the_score() {
        let inputs = vec![
            input("111111", Some(1_000.0), Some(10_000.0)),
            input("222222", Some(1_000.0), Some(1_000.0)),
        ];
        let base = score_universe(&inputs, 1.0)[0].opportunity_score.unwrap();
        let boosted = score_universe(&inputs, 2.0)[0].opportunity_score.unwrap();
        assert!((boosted - base * 2.0).abs() < 1e-9);
    }
}
