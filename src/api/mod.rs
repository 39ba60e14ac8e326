//! Boundary to the service that owns students, RACs and scores.

pub mod http;
pub mod memory;
pub mod wire;

use async_trait::async_trait;

use crate::error::ApiError;
use crate::models::{
    BulkItemResult, GacStatistics, GeneralStatistics, ItemSample, Puntaje, RacId, SavedScore,
    Score, ScoreEntry, Student, StudentId, StudentResults,
};

#[async_trait]
pub trait ScoringApi: Send + Sync {
    /// Enrolled students available for evaluation.
    async fn roster(&self) -> Result<Vec<Student>, ApiError>;

    /// A fresh random sample of RACs per GAC. Every call may differ.
    async fn item_sample(&self) -> Result<ItemSample, ApiError>;

    async fn student_scores(&self, student_id: StudentId) -> Result<Vec<Score>, ApiError>;

    /// Create-or-update one score; idempotent per `(student, rac)`.
    async fn upsert_score(
        &self,
        student_id: StudentId,
        rac_id: RacId,
        puntaje: Puntaje,
    ) -> Result<SavedScore, ApiError>;

    /// Create-or-update many scores, reporting an outcome per item.
    async fn upsert_scores(
        &self,
        student_id: StudentId,
        entries: &[ScoreEntry],
    ) -> Result<Vec<BulkItemResult>, ApiError>;

    async fn general_statistics(&self) -> Result<GeneralStatistics, ApiError>;

    async fn gac_statistics(&self) -> Result<Vec<GacStatistics>, ApiError>;

    async fn student_results(&self, student_id: StudentId) -> Result<StudentResults, ApiError>;
}
