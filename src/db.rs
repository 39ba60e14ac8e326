use anyhow::Context;
use async_trait::async_trait;
use chrono::{DateTime, Utc};
use sqlx::postgres::{PgPoolOptions, PgRow};
use sqlx::{PgPool, Row};

use crate::aggregate::{self, ScoredRow};
use crate::api::ScoringApi;
use crate::error::ApiError;
use crate::models::{
    BulkItemResult, EnrollmentStatus, Gac, GacStatistics, GeneralStatistics, ItemOutcome,
    ItemSample, Puntaje, Rac, RacId, SavedScore, Score, ScoreEntry, Student, StudentId,
    StudentResults,
};

pub async fn connect(database_url: &str) -> anyhow::Result<PgPool> {
    PgPoolOptions::new()
        .max_connections(5)
        .connect(database_url)
        .await
        .context("failed to connect to Postgres")
}

pub async fn init_db(pool: &PgPool) -> anyhow::Result<()> {
    sqlx::migrate!("./migrations").run(pool).await?;
    Ok(())
}

pub async fn seed(pool: &PgPool) -> anyhow::Result<()> {
    let gacs = vec![
        (1, "Fundamentos de la gestión de proyectos"),
        (2, "Planificación y ejecución de proyectos"),
        (3, "Control y cierre de proyectos"),
    ];

    for (number, description) in gacs {
        sqlx::query(
            r#"
            INSERT INTO competencias.gacs (number, description)
            VALUES ($1, $2)
            ON CONFLICT (number) DO UPDATE SET description = EXCLUDED.description
            "#,
        )
        .bind(number)
        .bind(description)
        .execute(pool)
        .await?;
    }

    let racs = vec![
        (1, 1, "Comprender los conceptos fundamentales de la gestión de proyectos y su aplicación en diferentes contextos organizacionales"),
        (2, 1, "Identificar los actores, roles y responsabilidades de un proyecto"),
        (3, 1, "Reconocer los ciclos de vida y metodologías de proyecto"),
        (4, 1, "Relacionar los objetivos del proyecto con la estrategia organizacional"),
        (5, 2, "Aplicar metodologías y herramientas de planificación para desarrollar cronogramas y presupuestos"),
        (6, 2, "Gestionar la comunicación y el trabajo en equipo para asegurar la colaboración efectiva"),
        (7, 2, "Estimar recursos, costos y riesgos del proyecto"),
        (8, 3, "Implementar estrategias de control y seguimiento del desempeño del proyecto"),
        (9, 3, "Evaluar y cerrar proyectos documentando lecciones aprendidas"),
        (10, 3, "Gestionar cambios de alcance con criterios de control integrado"),
    ];

    for (number, gac_number, description) in racs {
        sqlx::query(
            r#"
            INSERT INTO competencias.racs (number, description, gac_number)
            VALUES ($1, $2, $3)
            ON CONFLICT (number) DO UPDATE
            SET description = EXCLUDED.description, gac_number = EXCLUDED.gac_number
            "#,
        )
        .bind(number)
        .bind(description)
        .bind(gac_number)
        .execute(pool)
        .await?;
    }

    let students = vec![
        ("1020304050", "Laura Gómez", "laura.gomez@unbosque.edu.co", "A1", EnrollmentStatus::Enrolled),
        ("1020304051", "Mateo Ruiz", "mateo.ruiz@unbosque.edu.co", "A1", EnrollmentStatus::Enrolled),
        ("1020304052", "Valentina Castro", "valentina.castro@unbosque.edu.co", "B2", EnrollmentStatus::Enrolled),
        ("1020304053", "Santiago Rojas", "santiago.rojas@unbosque.edu.co", "B2", EnrollmentStatus::PreEnrolled),
    ];

    for (document, name, email, group, status) in students {
        sqlx::query(
            r#"
            INSERT INTO competencias.students (document, full_name, email, group_code, status)
            VALUES ($1, $2, $3, $4, $5)
            ON CONFLICT (document) DO UPDATE
            SET full_name = EXCLUDED.full_name,
                email = EXCLUDED.email,
                group_code = EXCLUDED.group_code,
                status = EXCLUDED.status
            "#,
        )
        .bind(document)
        .bind(name)
        .bind(email)
        .bind(group)
        .bind(status.as_str())
        .execute(pool)
        .await?;
    }

    Ok(())
}

/// Postgres-backed system of record.
pub struct PgScoringApi {
    pool: PgPool,
}

impl PgScoringApi {
    pub fn new(pool: PgPool) -> Self {
        Self { pool }
    }

    async fn ensure_enrolled(&self, student_id: StudentId) -> Result<(), ApiError> {
        let status: Option<String> =
            sqlx::query_scalar("SELECT status FROM competencias.students WHERE id = $1")
                .bind(student_id)
                .fetch_optional(&self.pool)
                .await?;

        match status.as_deref().and_then(EnrollmentStatus::parse) {
            Some(EnrollmentStatus::Enrolled) => Ok(()),
            _ => Err(ApiError::not_found("student not found or not enrolled")),
        }
    }

    async fn upsert(
        &self,
        student_id: StudentId,
        rac_id: RacId,
        puntaje: Puntaje,
    ) -> Result<Result<SavedScore, String>, ApiError> {
        let exists: bool =
            sqlx::query_scalar("SELECT EXISTS (SELECT 1 FROM competencias.racs WHERE id = $1)")
                .bind(rac_id)
                .fetch_one(&self.pool)
                .await?;
        if !exists {
            return Ok(Err("RAC not found".to_string()));
        }

        let created: bool = sqlx::query_scalar(
            r#"
            INSERT INTO competencias.scores (student_id, rac_id, score)
            VALUES ($1, $2, $3)
            ON CONFLICT (student_id, rac_id) DO UPDATE
            SET score = EXCLUDED.score, evaluated_at = now()
            RETURNING (xmax = 0)
            "#,
        )
        .bind(student_id)
        .bind(rac_id)
        .bind(i16::from(puntaje.value()))
        .fetch_one(&self.pool)
        .await?;

        Ok(Ok(SavedScore {
            rac_id,
            puntaje,
            created,
        }))
    }

    async fn scored_rows(&self, student_id: Option<StudentId>) -> Result<Vec<ScoredRow>, ApiError> {
        let mut query = String::from(
            "SELECT s.student_id, s.rac_id, r.number AS rac_number, \
             r.description AS rac_description, g.number AS gac_number, \
             g.description AS gac_description, s.score, s.evaluated_at \
             FROM competencias.scores s \
             JOIN competencias.racs r ON r.id = s.rac_id \
             JOIN competencias.gacs g ON g.number = r.gac_number",
        );

        if student_id.is_some() {
            query.push_str(" WHERE s.student_id = $1");
        }

        let mut rows = sqlx::query(&query);
        if let Some(value) = student_id {
            rows = rows.bind(value);
        }

        let records = rows.fetch_all(&self.pool).await?;
        Ok(records.iter().filter_map(scored_row).collect())
    }

    async fn gacs(&self) -> Result<Vec<Gac>, ApiError> {
        let records = sqlx::query("SELECT number, description FROM competencias.gacs ORDER BY number")
            .fetch_all(&self.pool)
            .await?;
        Ok(records
            .iter()
            .map(|row| Gac {
                number: row.get("number"),
                description: row.get("description"),
            })
            .collect())
    }
}

fn puntaje(value: i16, rac_id: RacId) -> Option<Puntaje> {
    let puntaje = Puntaje::new(i64::from(value));
    if puntaje.is_none() {
        tracing::warn!(rac_id, value, "skipping out-of-range score row");
    }
    puntaje
}

fn scored_row(row: &PgRow) -> Option<ScoredRow> {
    let rac_id: RacId = row.get("rac_id");
    Some(ScoredRow {
        student_id: row.get("student_id"),
        rac_id,
        rac_number: row.get("rac_number"),
        rac_description: row.get("rac_description"),
        gac_number: row.get("gac_number"),
        gac_description: row.get("gac_description"),
        puntaje: puntaje(row.get("score"), rac_id)?,
        evaluated_at: Some(row.get::<DateTime<Utc>, _>("evaluated_at")),
    })
}

fn student(row: &PgRow) -> Option<Student> {
    let id: StudentId = row.get("id");
    let raw_status: String = row.get("status");
    let Some(status) = EnrollmentStatus::parse(&raw_status) else {
        tracing::warn!(student_id = id, status = %raw_status, "skipping student with unknown status");
        return None;
    };
    Some(Student {
        id,
        document: row.get("document"),
        name: row.get("full_name"),
        email: row.get("email"),
        group: row.get("group_code"),
        status,
    })
}

#[async_trait]
impl ScoringApi for PgScoringApi {
    async fn roster(&self) -> Result<Vec<Student>, ApiError> {
        let records = sqlx::query(
            "SELECT id, document, full_name, email, group_code, status \
             FROM competencias.students WHERE status = $1 \
             ORDER BY group_code, full_name",
        )
        .bind(EnrollmentStatus::Enrolled.as_str())
        .fetch_all(&self.pool)
        .await?;

        Ok(records.iter().filter_map(student).collect())
    }

    async fn item_sample(&self) -> Result<ItemSample, ApiError> {
        let records = sqlx::query(
            "SELECT id, number, description, gac_number FROM competencias.racs \
             ORDER BY gac_number, number",
        )
        .fetch_all(&self.pool)
        .await?;

        let racs: Vec<Rac> = records
            .iter()
            .map(|row| Rac {
                id: row.get("id"),
                number: row.get("number"),
                description: row.get("description"),
                gac_number: row.get("gac_number"),
            })
            .collect();
        Ok(ItemSample::draw(racs))
    }

    async fn student_scores(&self, student_id: StudentId) -> Result<Vec<Score>, ApiError> {
        let records = sqlx::query(
            "SELECT rac_id, score, evaluated_at FROM competencias.scores WHERE student_id = $1",
        )
        .bind(student_id)
        .fetch_all(&self.pool)
        .await?;

        Ok(records
            .iter()
            .filter_map(|row| {
                let rac_id: RacId = row.get("rac_id");
                Some(Score {
                    rac_id,
                    puntaje: puntaje(row.get("score"), rac_id)?,
                    evaluated_at: Some(row.get("evaluated_at")),
                })
            })
            .collect())
    }

    async fn upsert_score(
        &self,
        student_id: StudentId,
        rac_id: RacId,
        puntaje: Puntaje,
    ) -> Result<SavedScore, ApiError> {
        self.ensure_enrolled(student_id).await?;
        self.upsert(student_id, rac_id, puntaje)
            .await?
            .map_err(ApiError::bad_request)
    }

    async fn upsert_scores(
        &self,
        student_id: StudentId,
        entries: &[ScoreEntry],
    ) -> Result<Vec<BulkItemResult>, ApiError> {
        if entries.is_empty() {
            return Err(ApiError::bad_request("student and evaluations are required"));
        }
        self.ensure_enrolled(student_id).await?;

        let mut results = Vec::with_capacity(entries.len());
        for entry in entries {
            let outcome = match self.upsert(student_id, entry.rac_id, entry.puntaje).await? {
                Ok(saved) => ItemOutcome::Saved(saved),
                Err(reason) => ItemOutcome::Rejected(reason),
            };
            results.push(BulkItemResult {
                rac_id: entry.rac_id,
                outcome,
            });
        }
        Ok(results)
    }

    async fn general_statistics(&self) -> Result<GeneralStatistics, ApiError> {
        let total_students: i64 =
            sqlx::query_scalar("SELECT COUNT(*) FROM competencias.students WHERE status = $1")
                .bind(EnrollmentStatus::Enrolled.as_str())
                .fetch_one(&self.pool)
                .await?;
        let total_racs: i64 = sqlx::query_scalar("SELECT COUNT(*) FROM competencias.racs")
            .fetch_one(&self.pool)
            .await?;
        let rows = self.scored_rows(None).await?;
        Ok(aggregate::general_statistics(&rows, total_students, total_racs))
    }

    async fn gac_statistics(&self) -> Result<Vec<GacStatistics>, ApiError> {
        let gacs = self.gacs().await?;
        let rows = self.scored_rows(None).await?;
        Ok(aggregate::gac_statistics(&rows, &gacs))
    }

    async fn student_results(&self, student_id: StudentId) -> Result<StudentResults, ApiError> {
        let record = sqlx::query(
            "SELECT id, document, full_name, email, group_code, status \
             FROM competencias.students WHERE id = $1",
        )
        .bind(student_id)
        .fetch_optional(&self.pool)
        .await?;

        let owner = record
            .as_ref()
            .and_then(student)
            .ok_or_else(|| ApiError::not_found("student not found"))?;
        let rows = self.scored_rows(Some(student_id)).await?;
        Ok(aggregate::student_results(owner, &rows))
    }
}
