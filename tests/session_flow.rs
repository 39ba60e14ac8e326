use std::sync::Arc;

use async_trait::async_trait;
use pretty_assertions::assert_eq;
use tokio::sync::Notify;

use competency_evaluation::api::memory::InMemoryScoringApi;
use competency_evaluation::api::ScoringApi;
use competency_evaluation::error::{ApiError, SessionError};
use competency_evaluation::grade::{GradeSummary, Qualitative, Tier};
use competency_evaluation::models::{
    BulkItemResult, EnrollmentStatus, GacStatistics, GeneralStatistics, ItemSample, Puntaje,
    RacId, SavedScore, Score, ScoreEntry, Student, StudentId, StudentResults,
};
use competency_evaluation::session::{EvaluationSession, LoadOutcome, SessionState};

fn student(id: StudentId, name: &str) -> Student {
    Student {
        id,
        document: format!("10203040{id}"),
        name: name.to_string(),
        email: None,
        group: "A1".to_string(),
        status: EnrollmentStatus::Enrolled,
    }
}

fn backend() -> InMemoryScoringApi {
    InMemoryScoringApi::new()
        .with_gac(1, "Fundamentos de la gestión de proyectos")
        .with_gac(2, "Planificación y ejecución de proyectos")
        .with_rac(11, 1, 1, "Comprender los conceptos fundamentales")
        .with_rac(12, 2, 1, "Identificar actores y roles")
        .with_rac(13, 3, 1, "Reconocer ciclos de vida")
        .with_rac(21, 4, 2, "Desarrollar cronogramas y presupuestos")
        .with_rac(22, 5, 2, "Gestionar la comunicación del equipo")
        .with_rac(23, 6, 2, "Estimar recursos y riesgos")
        .with_student(student(1, "Laura Gómez"))
        .with_student(student(2, "Mateo Ruiz"))
}

fn score(value: i64) -> Puntaje {
    Puntaje::new(value).unwrap()
}

/// Holds `student_scores` for one student, or bulk writes, until the test
/// releases the gate.
struct GatedApi {
    inner: InMemoryScoringApi,
    gated: Option<StudentId>,
    gate_bulk: bool,
    gate: Notify,
}

impl GatedApi {
    fn scores_of(inner: InMemoryScoringApi, student_id: StudentId) -> Arc<Self> {
        Arc::new(Self {
            inner,
            gated: Some(student_id),
            gate_bulk: false,
            gate: Notify::new(),
        })
    }

    fn bulk_writes(inner: InMemoryScoringApi) -> Arc<Self> {
        Arc::new(Self {
            inner,
            gated: None,
            gate_bulk: true,
            gate: Notify::new(),
        })
    }
}

#[async_trait]
impl ScoringApi for GatedApi {
    async fn roster(&self) -> Result<Vec<Student>, ApiError> {
        self.inner.roster().await
    }

    async fn item_sample(&self) -> Result<ItemSample, ApiError> {
        self.inner.item_sample().await
    }

    async fn student_scores(&self, student_id: StudentId) -> Result<Vec<Score>, ApiError> {
        if self.gated == Some(student_id) {
            self.gate.notified().await;
        }
        self.inner.student_scores(student_id).await
    }

    async fn upsert_score(
        &self,
        student_id: StudentId,
        rac_id: RacId,
        puntaje: Puntaje,
    ) -> Result<SavedScore, ApiError> {
        self.inner.upsert_score(student_id, rac_id, puntaje).await
    }

    async fn upsert_scores(
        &self,
        student_id: StudentId,
        entries: &[ScoreEntry],
    ) -> Result<Vec<BulkItemResult>, ApiError> {
        if self.gate_bulk {
            self.gate.notified().await;
        }
        self.inner.upsert_scores(student_id, entries).await
    }

    async fn general_statistics(&self) -> Result<GeneralStatistics, ApiError> {
        self.inner.general_statistics().await
    }

    async fn gac_statistics(&self) -> Result<Vec<GacStatistics>, ApiError> {
        self.inner.gac_statistics().await
    }

    async fn student_results(&self, student_id: StudentId) -> Result<StudentResults, ApiError> {
        self.inner.student_results(student_id).await
    }
}

#[tokio::test]
async fn scoring_every_item_four_is_remarkable_and_green() {
    let api = Arc::new(backend());
    let session = EvaluationSession::new(api.clone());
    session.initialize().await.unwrap();

    let outcome = session.select_student(Some(1)).await.unwrap();
    assert_eq!(outcome, LoadOutcome::Applied);
    assert_eq!(session.snapshot().sample.len(), 6);

    for rac_id in [11, 12, 13, 21, 22, 23] {
        assert!(session.set_item_value(rac_id, "4"));
    }

    let report = session.submit_all().await.unwrap();
    assert!(report.is_complete());
    assert!(report.refreshed);
    assert_eq!(report.saved.len(), 6);
    assert_eq!(api.stored_scores(1).len(), 6);

    let snapshot = session.snapshot();
    assert_eq!(snapshot.state, SessionState::Ready);
    assert!(snapshot.drafts.values().all(|draft| *draft == Some(score(4))));

    let summary = GradeSummary::from_scores(snapshot.drafts.values().flatten().copied());
    assert_eq!(summary.count, 6);
    assert_eq!(summary.average, Some(4.0));
    assert_eq!(summary.classification.formatted(), "4.00 - Remarkable");
    assert_eq!(summary.classification.qualitative, Qualitative::Remarkable);
    assert_eq!(summary.classification.tier, Tier::Green);

    let statistics = snapshot.statistics.expect("statistics refreshed after submit");
    assert_eq!(statistics.general.total_scores, 6);
    assert_eq!(statistics.per_gac.len(), 2);
}

#[tokio::test]
async fn later_selection_wins_over_slow_earlier_one() {
    let inner = backend();
    inner.upsert_score(1, 11, score(2)).await.unwrap();
    inner.upsert_score(2, 11, score(5)).await.unwrap();
    inner.upsert_score(2, 22, score(3)).await.unwrap();

    let api = GatedApi::scores_of(inner, 1);
    let session = EvaluationSession::new(api.clone());
    session.initialize().await.unwrap();

    let first = session.select_student(Some(1));
    let second = async {
        let outcome = session.select_student(Some(2)).await;
        api.gate.notify_one();
        outcome
    };
    let (first, second) = tokio::join!(first, second);

    assert_eq!(first.unwrap(), LoadOutcome::Superseded);
    assert_eq!(second.unwrap(), LoadOutcome::Applied);

    let snapshot = session.snapshot();
    assert_eq!(snapshot.student.as_ref().map(|s| s.id), Some(2));
    assert_eq!(snapshot.draft(11), Some(score(5)));
    assert_eq!(snapshot.draft(22), Some(score(3)));
    assert_eq!(snapshot.draft(12), None);
    assert_eq!(snapshot.state, SessionState::Ready);
}

#[tokio::test]
async fn second_submit_while_one_is_running_is_refused() {
    let api = GatedApi::bulk_writes(backend());
    let session = EvaluationSession::new(api.clone());
    session.initialize().await.unwrap();
    session.select_student(Some(1)).await.unwrap();
    for rac_id in [11, 12, 13, 21, 22, 23] {
        assert!(session.set_item_value(rac_id, "4"));
    }

    let first = session.submit_all();
    let second = async {
        let state = session.state();
        let accepted = session.set_item_value(11, "2");
        let single = session.submit_one(11).await;
        let bulk = session.submit_all().await;
        api.gate.notify_one();
        (state, accepted, single, bulk)
    };
    let (first, (state, accepted, single, bulk)) = tokio::join!(first, second);

    assert_eq!(state, SessionState::Submitting);
    assert!(!accepted);
    assert!(matches!(single, Err(SessionError::SubmitInFlight(1))));
    assert!(matches!(bulk, Err(SessionError::SubmitInFlight(1))));

    let report = first.unwrap();
    assert!(report.is_complete());
    assert_eq!(report.saved.len(), 6);
    assert_eq!(api.inner.stored_scores(1).len(), 6);

    let snapshot = session.snapshot();
    assert_eq!(snapshot.state, SessionState::Ready);
    assert_eq!(snapshot.draft(11), Some(score(4)));
}

#[tokio::test]
async fn regenerating_during_a_student_load_discards_the_load() {
    let inner = backend();
    inner.upsert_score(1, 11, score(2)).await.unwrap();
    inner.upsert_score(1, 21, score(5)).await.unwrap();

    let api = GatedApi::scores_of(inner, 1);
    let session = EvaluationSession::new(api.clone());
    session.initialize().await.unwrap();

    let load = session.select_student(Some(1));
    let regenerate = async {
        let outcome = session.generate_item_sample().await;
        api.gate.notify_one();
        outcome
    };
    let (load, regenerate) = tokio::join!(load, regenerate);

    assert_eq!(load.unwrap(), LoadOutcome::Superseded);
    assert_eq!(regenerate.unwrap(), LoadOutcome::Applied);

    let snapshot = session.snapshot();
    assert_eq!(snapshot.state, SessionState::Ready);
    assert_eq!(snapshot.drafts.len(), 6);
    assert!(snapshot.drafts.values().all(Option::is_none));
}

#[tokio::test]
async fn regenerating_the_sample_discards_drafts() {
    let session = EvaluationSession::new(Arc::new(backend()));
    session.initialize().await.unwrap();
    session.select_student(Some(2)).await.unwrap();

    assert!(session.set_item_value(11, "5"));
    assert!(session.set_item_value(21, "1"));

    let outcome = session.generate_item_sample().await.unwrap();
    assert_eq!(outcome, LoadOutcome::Applied);

    let snapshot = session.snapshot();
    assert_eq!(snapshot.drafts.len(), 6);
    assert!(snapshot.drafts.values().all(Option::is_none));
    assert_eq!(snapshot.student.map(|s| s.id), Some(2));
}

#[tokio::test]
async fn blank_item_blocks_bulk_submit_without_requests() {
    let api = Arc::new(backend());
    let session = EvaluationSession::new(api.clone());
    session.initialize().await.unwrap();
    session.select_student(Some(1)).await.unwrap();

    for rac_id in [11, 12, 13, 21] {
        session.set_item_value(rac_id, "3");
    }
    let before = api.request_count();

    let err = session.submit_all().await.unwrap_err();
    assert_eq!(err.to_string(), "2 evaluations are still missing");
    assert!(err.is_validation());
    assert_eq!(api.request_count(), before);
    assert!(api.stored_scores(1).is_empty());
}
