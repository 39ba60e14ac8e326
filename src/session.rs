//! One student scored at a time against a randomized sample of RACs.

use std::collections::{BTreeMap, BTreeSet, HashMap};
use std::sync::{Arc, Mutex, MutexGuard, PoisonError};

use crate::api::ScoringApi;
use crate::error::SessionError;
use crate::models::{
    BulkItemResult, DraftInput, ItemOutcome, ItemSample, Puntaje, RacId, SavedScore, Score,
    ScoreEntry, Statistics, Student, StudentId,
};

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SessionState {
    Idle,
    Loading,
    Ready,
    Submitting,
    ReadyWithError,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum LoadOutcome {
    Applied,
    /// A newer request replaced this one; its response was discarded.
    Superseded,
}

#[derive(Debug, Clone, PartialEq)]
pub struct SessionSnapshot {
    pub state: SessionState,
    pub roster: Vec<Student>,
    pub student: Option<Student>,
    pub sample: ItemSample,
    pub drafts: BTreeMap<RacId, Option<Puntaje>>,
    pub last_error: Option<String>,
    pub statistics: Option<Statistics>,
}

impl SessionSnapshot {
    pub fn draft(&self, rac_id: RacId) -> Option<Puntaje> {
        self.drafts.get(&rac_id).copied().flatten()
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RejectedItem {
    pub rac_id: RacId,
    pub reason: String,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SubmitReport {
    pub saved: Vec<SavedScore>,
    pub rejected: Vec<RejectedItem>,
    /// Whether the authoritative scores were re-fetched into the drafts.
    pub refreshed: bool,
}

impl SubmitReport {
    pub fn is_complete(&self) -> bool {
        self.rejected.is_empty()
    }

    pub fn summary(&self) -> String {
        let total = self.saved.len() + self.rejected.len();
        let mut summary = format!("saved {} of {total} evaluations", self.saved.len());
        for item in &self.rejected {
            summary.push_str(&format!("; RAC {}: {}", item.rac_id, item.reason));
        }
        summary
    }
}

#[derive(Default)]
struct Inner {
    roster: Vec<Student>,
    selected: Option<StudentId>,
    sample: ItemSample,
    drafts: BTreeMap<RacId, Option<Puntaje>>,
    statistics: Option<Statistics>,
    last_error: Option<String>,
    failed: bool,
    roster_loading: bool,
    sample_loading: bool,
    student_loading: bool,
    submitting: Option<StudentId>,
    sample_generation: u64,
    selection_generation: u64,
}

impl Inner {
    fn state(&self) -> SessionState {
        if self.submitting.is_some() {
            SessionState::Submitting
        } else if self.roster_loading || self.sample_loading || self.student_loading {
            SessionState::Loading
        } else if self.selected.is_none() {
            SessionState::Idle
        } else if self.failed {
            SessionState::ReadyWithError
        } else {
            SessionState::Ready
        }
    }

    fn clear_drafts(&mut self) {
        self.drafts = self.sample.rac_ids().map(|rac_id| (rac_id, None)).collect();
    }

    fn next_selection(&mut self) -> u64 {
        self.selection_generation += 1;
        self.selection_generation
    }

    fn record_error(&mut self, message: String) {
        tracing::warn!(error = %message, "evaluation session error");
        self.last_error = Some(message);
    }
}

pub struct EvaluationSession {
    api: Arc<dyn ScoringApi>,
    inner: Mutex<Inner>,
}

impl EvaluationSession {
    pub fn new(api: Arc<dyn ScoringApi>) -> Self {
        Self {
            api,
            inner: Mutex::new(Inner::default()),
        }
    }

    fn inner(&self) -> MutexGuard<'_, Inner> {
        self.inner.lock().unwrap_or_else(PoisonError::into_inner)
    }

    pub fn state(&self) -> SessionState {
        self.inner().state()
    }

    pub fn snapshot(&self) -> SessionSnapshot {
        let inner = self.inner();
        SessionSnapshot {
            state: inner.state(),
            roster: inner.roster.clone(),
            student: inner
                .selected
                .and_then(|id| inner.roster.iter().find(|s| s.id == id).cloned()),
            sample: inner.sample.clone(),
            drafts: inner.drafts.clone(),
            last_error: inner.last_error.clone(),
            statistics: inner.statistics.clone(),
        }
    }

    /// Loads the roster and a first item sample concurrently.
    pub async fn initialize(&self) -> Result<(), SessionError> {
        let (roster, sample) = tokio::join!(self.load_roster(), self.generate_item_sample());
        roster?;
        sample?;
        Ok(())
    }

    /// Fetches the roster. On failure the roster is left empty and the error
    /// is recorded; the session stays usable.
    pub async fn load_roster(&self) -> Result<usize, SessionError> {
        self.inner().roster_loading = true;
        let result = self.api.roster().await;

        let mut inner = self.inner();
        inner.roster_loading = false;
        match result {
            Ok(roster) => {
                let count = roster.len();
                tracing::info!(count, "roster loaded");
                inner.roster = roster;
                Ok(count)
            }
            Err(e) => {
                inner.roster.clear();
                inner.record_error(format!("failed to load students: {e}"));
                Err(e.into())
            }
        }
    }

    /// Requests a fresh sample. Applying it discards every unsaved draft,
    /// including drafts of a student load still in flight.
    pub async fn generate_item_sample(&self) -> Result<LoadOutcome, SessionError> {
        let generation = {
            let mut inner = self.inner();
            inner.sample_generation += 1;
            inner.sample_loading = true;
            inner.sample_generation
        };

        let result = self.api.item_sample().await;

        let mut inner = self.inner();
        if inner.sample_generation != generation {
            tracing::debug!(generation, "discarding superseded item sample");
            return Ok(LoadOutcome::Superseded);
        }
        inner.sample_loading = false;
        match result {
            Ok(sample) => {
                tracing::info!(
                    gacs = sample.groups().len(),
                    items = sample.len(),
                    "item sample generated"
                );
                inner.sample = sample;
                inner.clear_drafts();
                inner.next_selection();
                inner.student_loading = false;
                inner.failed = false;
                Ok(LoadOutcome::Applied)
            }
            Err(e) => {
                inner.record_error(format!("failed to generate item sample: {e}"));
                Err(e.into())
            }
        }
    }

    /// Selects a student and pre-fills drafts from their saved scores, or
    /// returns to idle when `student_id` is `None`.
    pub async fn select_student(
        &self,
        student_id: Option<StudentId>,
    ) -> Result<LoadOutcome, SessionError> {
        let (student_id, generation) = {
            let mut inner = self.inner();
            let generation = inner.next_selection();
            inner.failed = false;
            inner.last_error = None;
            inner.clear_drafts();
            let Some(student_id) = student_id else {
                inner.selected = None;
                inner.student_loading = false;
                return Ok(LoadOutcome::Applied);
            };
            if !inner.roster.iter().any(|student| student.id == student_id) {
                inner.selected = None;
                inner.student_loading = false;
                return Err(SessionError::UnknownStudent(student_id));
            }
            inner.selected = Some(student_id);
            inner.student_loading = true;
            (student_id, generation)
        };

        let result = self.api.student_scores(student_id).await;

        let mut inner = self.inner();
        if inner.selection_generation != generation {
            tracing::debug!(student_id, generation, "discarding stale student scores");
            return Ok(LoadOutcome::Superseded);
        }
        inner.student_loading = false;
        match result {
            Ok(scores) => {
                let filled = apply_scores(&mut inner, &scores, &BTreeSet::new());
                tracing::info!(student_id, filled, "student scores loaded");
                Ok(LoadOutcome::Applied)
            }
            Err(e) => {
                inner.failed = true;
                inner.record_error(format!(
                    "failed to load scores for student {student_id}: {e}"
                ));
                Err(e.into())
            }
        }
    }

    /// Sets the draft for `rac_id` from raw input. Blank clears the draft;
    /// anything but an integer in 1..=5 is ignored and leaves the draft as is.
    pub fn set_item_value(&self, rac_id: RacId, raw: &str) -> bool {
        let mut inner = self.inner();
        if inner.submitting.is_some() || !inner.sample.contains(rac_id) {
            return false;
        }
        match DraftInput::parse(raw) {
            DraftInput::Clear => {
                inner.drafts.insert(rac_id, None);
                true
            }
            DraftInput::Set(puntaje) => {
                inner.drafts.insert(rac_id, Some(puntaje));
                true
            }
            DraftInput::Invalid => {
                tracing::debug!(rac_id, raw, "ignoring invalid score input");
                false
            }
        }
    }

    /// Submits every draft of the current sample in one bulk call.
    ///
    /// Rejected up front, without any request, if a draft is blank. Items the
    /// backend rejects keep their drafts; the rest are re-read from the
    /// backend.
    pub async fn submit_all(&self) -> Result<SubmitReport, SessionError> {
        let (student_id, generation, entries) = {
            let mut inner = self.inner();
            let student_id = inner.selected.ok_or(SessionError::NoStudentSelected)?;
            if let Some(in_flight) = inner.submitting {
                return Err(SessionError::SubmitInFlight(in_flight));
            }
            if inner.sample.is_empty() {
                return Err(SessionError::EmptySample);
            }
            let entries: Vec<ScoreEntry> = inner
                .sample
                .rac_ids()
                .filter_map(|rac_id| {
                    inner
                        .drafts
                        .get(&rac_id)
                        .copied()
                        .flatten()
                        .map(|puntaje| ScoreEntry { rac_id, puntaje })
                })
                .collect();
            let missing = inner.sample.len() - entries.len();
            if missing > 0 {
                return Err(SessionError::MissingScores { missing });
            }
            inner.submitting = Some(student_id);
            inner.last_error = None;
            (student_id, inner.selection_generation, entries)
        };

        tracing::info!(student_id, items = entries.len(), "submitting evaluations");
        let result = self.api.upsert_scores(student_id, &entries).await;

        let (saved, rejected) = {
            let mut inner = self.inner();
            inner.submitting = None;
            let results = match result {
                Ok(results) => results,
                Err(e) => {
                    if inner.selection_generation == generation {
                        inner.failed = true;
                        inner.record_error(format!("failed to save evaluations: {e}"));
                    }
                    return Err(e.into());
                }
            };
            partition_results(&entries, results)
        };

        let mut refreshed = false;
        if !saved.is_empty() {
            let fetched = self.api.student_scores(student_id).await;
            let mut inner = self.inner();
            if inner.selection_generation == generation {
                match fetched {
                    Ok(scores) => {
                        let keep: BTreeSet<RacId> =
                            rejected.iter().map(|item| item.rac_id).collect();
                        apply_scores(&mut inner, &scores, &keep);
                        refreshed = true;
                    }
                    Err(e) => {
                        tracing::warn!(student_id, error = %e, "could not re-read saved scores");
                    }
                }
            }
        }

        let report = SubmitReport {
            saved,
            rejected,
            refreshed,
        };
        {
            let mut inner = self.inner();
            if inner.selection_generation == generation {
                inner.failed = !report.is_complete();
                if !report.is_complete() {
                    inner.record_error(report.summary());
                }
            }
        }
        tracing::info!(
            student_id,
            saved = report.saved.len(),
            rejected = report.rejected.len(),
            "evaluations submitted"
        );

        if !report.saved.is_empty() {
            self.refresh_statistics_quietly().await;
        }
        Ok(report)
    }

    /// Saves a single draft, for incremental progress.
    pub async fn submit_one(&self, rac_id: RacId) -> Result<SavedScore, SessionError> {
        let (student_id, generation, puntaje) = {
            let mut inner = self.inner();
            let student_id = inner.selected.ok_or(SessionError::NoStudentSelected)?;
            if let Some(in_flight) = inner.submitting {
                return Err(SessionError::SubmitInFlight(in_flight));
            }
            if !inner.sample.contains(rac_id) {
                return Err(SessionError::UnknownItem(rac_id));
            }
            let puntaje = inner
                .drafts
                .get(&rac_id)
                .copied()
                .flatten()
                .ok_or(SessionError::MissingScore(rac_id))?;
            inner.submitting = Some(student_id);
            inner.last_error = None;
            (student_id, inner.selection_generation, puntaje)
        };

        let result = self.api.upsert_score(student_id, rac_id, puntaje).await;

        {
            let mut inner = self.inner();
            inner.submitting = None;
            let current = inner.selection_generation == generation;
            match &result {
                Ok(_) if current => inner.failed = false,
                Err(e) if current => {
                    inner.failed = true;
                    inner.record_error(format!("failed to save RAC {rac_id}: {e}"));
                }
                _ => {}
            }
        }

        let saved = result?;
        tracing::info!(student_id, rac_id, created = saved.created, "evaluation saved");
        self.refresh_statistics_quietly().await;
        Ok(saved)
    }

    /// Fetches general and per-GAC statistics concurrently.
    pub async fn refresh_statistics(&self) -> Result<Statistics, SessionError> {
        let (general, per_gac) =
            tokio::join!(self.api.general_statistics(), self.api.gac_statistics());
        let statistics = Statistics {
            general: general?,
            per_gac: per_gac?,
        };
        self.inner().statistics = Some(statistics.clone());
        Ok(statistics)
    }

    async fn refresh_statistics_quietly(&self) {
        if let Err(e) = self.refresh_statistics().await {
            tracing::warn!(error = %e, "statistics refresh failed");
        }
    }
}

/// Writes fetched scores into the drafts of the current sample, skipping
/// items in `keep`. Returns how many drafts were filled.
fn apply_scores(inner: &mut Inner, scores: &[Score], keep: &BTreeSet<RacId>) -> usize {
    let by_rac: HashMap<RacId, Puntaje> = scores
        .iter()
        .map(|score| (score.rac_id, score.puntaje))
        .collect();
    let mut filled = 0;
    let rac_ids: Vec<RacId> = inner.sample.rac_ids().collect();
    for rac_id in rac_ids {
        if keep.contains(&rac_id) {
            continue;
        }
        let value = by_rac.get(&rac_id).copied();
        if value.is_some() {
            filled += 1;
        }
        inner.drafts.insert(rac_id, value);
    }
    filled
}

fn partition_results(
    entries: &[ScoreEntry],
    results: Vec<BulkItemResult>,
) -> (Vec<SavedScore>, Vec<RejectedItem>) {
    let mut saved = Vec::new();
    let mut rejected = Vec::new();
    let mut reported = BTreeSet::new();

    for result in results {
        reported.insert(result.rac_id);
        match result.outcome {
            ItemOutcome::Saved(score) => saved.push(score),
            ItemOutcome::Rejected(reason) => rejected.push(RejectedItem {
                rac_id: result.rac_id,
                reason,
            }),
        }
    }
    for entry in entries {
        if !reported.contains(&entry.rac_id) {
            rejected.push(RejectedItem {
                rac_id: entry.rac_id,
                reason: "no result reported by the backend".to_string(),
            });
        }
    }
    (saved, rejected)
}
