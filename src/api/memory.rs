//! In-process scoring backend.
//!
//! Applies the same business rules as the Postgres backend. Besides tests it
//! can back the session when no service is reachable.

use std::collections::BTreeMap;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::{Mutex, MutexGuard, PoisonError};

use async_trait::async_trait;
use chrono::Utc;

use crate::aggregate::{self, ScoredRow};
use crate::api::ScoringApi;
use crate::error::ApiError;
use crate::models::{
    BulkItemResult, EnrollmentStatus, Gac, GacNumber, GacStatistics, GeneralStatistics,
    ItemOutcome, ItemSample, Puntaje, Rac, RacId, SavedScore, Score, ScoreEntry, Student,
    StudentId, StudentResults,
};

#[derive(Default)]
struct Store {
    students: BTreeMap<StudentId, Student>,
    gacs: BTreeMap<GacNumber, Gac>,
    racs: BTreeMap<RacId, Rac>,
    scores: BTreeMap<(StudentId, RacId), Score>,
    offline: bool,
    rejected_racs: BTreeMap<RacId, String>,
}

#[derive(Default)]
pub struct InMemoryScoringApi {
    store: Mutex<Store>,
    requests: AtomicUsize,
}

impl InMemoryScoringApi {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with_gac(self, number: GacNumber, description: &str) -> Self {
        self.store().gacs.insert(
            number,
            Gac {
                number,
                description: description.to_string(),
            },
        );
        self
    }

    pub fn with_rac(self, id: RacId, number: i32, gac_number: GacNumber, description: &str) -> Self {
        self.store().racs.insert(
            id,
            Rac {
                id,
                number,
                description: description.to_string(),
                gac_number,
            },
        );
        self
    }

    pub fn with_student(self, student: Student) -> Self {
        self.store().students.insert(student.id, student);
        self
    }

    /// Every subsequent request fails as if the service were unreachable.
    pub fn set_offline(&self, offline: bool) {
        self.store().offline = offline;
    }

    /// Writes for this RAC are refused with `reason`.
    pub fn reject_rac(&self, rac_id: RacId, reason: &str) {
        self.store().rejected_racs.insert(rac_id, reason.to_string());
    }

    /// Number of requests received, including failed ones.
    pub fn request_count(&self) -> usize {
        self.requests.load(Ordering::SeqCst)
    }

    pub fn stored_scores(&self, student_id: StudentId) -> Vec<Score> {
        self.store()
            .scores
            .iter()
            .filter(|((owner, _), _)| *owner == student_id)
            .map(|(_, score)| score.clone())
            .collect()
    }

    fn store(&self) -> MutexGuard<'_, Store> {
        self.store.lock().unwrap_or_else(PoisonError::into_inner)
    }

    fn begin(&self) -> Result<MutexGuard<'_, Store>, ApiError> {
        self.requests.fetch_add(1, Ordering::SeqCst);
        let store = self.store();
        if store.offline {
            return Err(ApiError::rejected(503, "scoring service unavailable"));
        }
        Ok(store)
    }
}

impl Store {
    fn enrolled(&self, student_id: StudentId) -> Result<&Student, ApiError> {
        self.students
            .get(&student_id)
            .filter(|student| student.status == EnrollmentStatus::Enrolled)
            .ok_or_else(|| ApiError::not_found("student not found or not enrolled"))
    }

    fn upsert(&mut self, student_id: StudentId, rac_id: RacId, puntaje: Puntaje) -> Result<SavedScore, String> {
        if let Some(reason) = self.rejected_racs.get(&rac_id) {
            return Err(reason.clone());
        }
        if !self.racs.contains_key(&rac_id) {
            return Err("RAC not found".to_string());
        }
        let previous = self.scores.insert(
            (student_id, rac_id),
            Score {
                rac_id,
                puntaje,
                evaluated_at: Some(Utc::now()),
            },
        );
        Ok(SavedScore {
            rac_id,
            puntaje,
            created: previous.is_none(),
        })
    }

    fn rows(&self) -> Vec<ScoredRow> {
        self.scores
            .iter()
            .filter_map(|((student_id, rac_id), score)| {
                let rac = self.racs.get(rac_id)?;
                let gac = self.gacs.get(&rac.gac_number)?;
                Some(ScoredRow {
                    student_id: *student_id,
                    rac_id: *rac_id,
                    rac_number: rac.number,
                    rac_description: rac.description.clone(),
                    gac_number: gac.number,
                    gac_description: gac.description.clone(),
                    puntaje: score.puntaje,
                    evaluated_at: score.evaluated_at,
                })
            })
            .collect()
    }
}

#[async_trait]
impl ScoringApi for InMemoryScoringApi {
    async fn roster(&self) -> Result<Vec<Student>, ApiError> {
        let store = self.begin()?;
        let mut roster: Vec<Student> = store
            .students
            .values()
            .filter(|student| student.status == EnrollmentStatus::Enrolled)
            .cloned()
            .collect();
        roster.sort_by(|a, b| a.group.cmp(&b.group).then_with(|| a.name.cmp(&b.name)));
        Ok(roster)
    }

    async fn item_sample(&self) -> Result<ItemSample, ApiError> {
        let store = self.begin()?;
        Ok(ItemSample::draw(store.racs.values().cloned()))
    }

    async fn student_scores(&self, student_id: StudentId) -> Result<Vec<Score>, ApiError> {
        let store = self.begin()?;
        Ok(store
            .scores
            .iter()
            .filter(|((owner, _), _)| *owner == student_id)
            .map(|(_, score)| score.clone())
            .collect())
    }

    async fn upsert_score(
        &self,
        student_id: StudentId,
        rac_id: RacId,
        puntaje: Puntaje,
    ) -> Result<SavedScore, ApiError> {
        let mut store = self.begin()?;
        store.enrolled(student_id)?;
        store
            .upsert(student_id, rac_id, puntaje)
            .map_err(ApiError::bad_request)
    }

    async fn upsert_scores(
        &self,
        student_id: StudentId,
        entries: &[ScoreEntry],
    ) -> Result<Vec<BulkItemResult>, ApiError> {
        let mut store = self.begin()?;
        if entries.is_empty() {
            return Err(ApiError::bad_request("student and evaluations are required"));
        }
        store.enrolled(student_id)?;
        Ok(entries
            .iter()
            .map(|entry| BulkItemResult {
                rac_id: entry.rac_id,
                outcome: match store.upsert(student_id, entry.rac_id, entry.puntaje) {
                    Ok(saved) => ItemOutcome::Saved(saved),
                    Err(reason) => ItemOutcome::Rejected(reason),
                },
            })
            .collect())
    }

    async fn general_statistics(&self) -> Result<GeneralStatistics, ApiError> {
        let store = self.begin()?;
        let enrolled = store
            .students
            .values()
            .filter(|student| student.status == EnrollmentStatus::Enrolled)
            .count() as i64;
        Ok(aggregate::general_statistics(
            &store.rows(),
            enrolled,
            store.racs.len() as i64,
        ))
    }

    async fn gac_statistics(&self) -> Result<Vec<GacStatistics>, ApiError> {
        let store = self.begin()?;
        let gacs: Vec<Gac> = store.gacs.values().cloned().collect();
        Ok(aggregate::gac_statistics(&store.rows(), &gacs))
    }

    async fn student_results(&self, student_id: StudentId) -> Result<StudentResults, ApiError> {
        let store = self.begin()?;
        let student = store
            .students
            .get(&student_id)
            .cloned()
            .ok_or_else(|| ApiError::not_found("student not found"))?;
        Ok(aggregate::student_results(student, &store.rows()))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn enrolled(id: StudentId, status: EnrollmentStatus) -> Student {
        Student {
            id,
            document: format!("52000{id}"),
            name: format!("Estudiante {id}"),
            email: None,
            group: "A1".to_string(),
            status,
        }
    }

    fn api() -> InMemoryScoringApi {
        InMemoryScoringApi::new()
            .with_gac(1, "Fundamentos")
            .with_rac(11, 1, 1, "Comprender conceptos")
            .with_rac(12, 2, 1, "Aplicar metodologías")
            .with_student(enrolled(1, EnrollmentStatus::Enrolled))
            .with_student(enrolled(2, EnrollmentStatus::PreEnrolled))
    }

    fn score(value: i64) -> Puntaje {
        Puntaje::new(value).unwrap()
    }

    #[tokio::test]
    async fn roster_excludes_pre_enrolled() {
        let roster = api().roster().await.unwrap();
        assert_eq!(roster.iter().map(|s| s.id).collect::<Vec<_>>(), vec![1]);
    }

    #[tokio::test]
    async fn upsert_creates_then_updates() {
        let api = api();
        let first = api.upsert_score(1, 11, score(3)).await.unwrap();
        let second = api.upsert_score(1, 11, score(5)).await.unwrap();

        assert!(first.created);
        assert!(!second.created);
        let stored = api.stored_scores(1);
        assert_eq!(stored.len(), 1);
        assert_eq!(stored[0].puntaje, score(5));
    }

    #[tokio::test]
    async fn writes_for_pre_enrolled_students_are_refused() {
        let err = api().upsert_score(2, 11, score(4)).await.unwrap_err();
        assert!(matches!(err, ApiError::Rejected { status: 404, .. }));
    }

    #[tokio::test]
    async fn bulk_reports_unknown_racs_per_item() {
        let api = api();
        let entries = [
            ScoreEntry { rac_id: 11, puntaje: score(4) },
            ScoreEntry { rac_id: 99, puntaje: score(4) },
        ];
        let results = api.upsert_scores(1, &entries).await.unwrap();

        assert!(matches!(results[0].outcome, ItemOutcome::Saved(_)));
        assert_eq!(
            results[1].outcome,
            ItemOutcome::Rejected("RAC not found".to_string())
        );
    }

    #[tokio::test]
    async fn offline_backend_counts_requests() {
        let api = api();
        api.set_offline(true);
        assert!(api.roster().await.is_err());
        assert_eq!(api.request_count(), 1);
    }
}
