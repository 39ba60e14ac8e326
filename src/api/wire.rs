//! JSON schemas of the REST backend and their validation into domain types.
//!
//! Records are validated one by one. A record that does not match its schema
//! is quarantined: dropped with a `warn` log instead of failing the whole
//! response or leaking half-filled values into the session.

use std::collections::BTreeMap;

use chrono::{DateTime, Utc};
use serde::de::DeserializeOwned;
use serde::{Deserialize, Serialize};
use serde_json::Value;

use crate::models::{
    BulkItemResult, EnrollmentStatus, GacNumber, GacResult, GacStatistics, GeneralStatistics,
    ItemOutcome, ItemSample, Puntaje, Rac, RacAverage, RacId, RacResult, SavedScore, Score,
    ScoreEntry, Student, StudentId, StudentResults,
};

/// The backend serializes decimals either as JSON numbers or as strings.
#[derive(Debug, Clone, Deserialize)]
#[serde(untagged)]
pub enum LooseNumber {
    Number(f64),
    Text(String),
}

impl LooseNumber {
    pub fn as_f64(&self) -> Option<f64> {
        match self {
            LooseNumber::Number(value) => Some(*value),
            LooseNumber::Text(text) => text.trim().parse().ok(),
        }
    }

    fn as_puntaje(&self) -> Option<Puntaje> {
        self.as_f64().and_then(Puntaje::from_f64)
    }
}

#[derive(Debug, Deserialize)]
pub struct StudentRecord {
    pub id: StudentId,
    pub nombre: String,
    pub grupo: String,
    pub documento: String,
    #[serde(default)]
    pub correo: Option<String>,
    #[serde(default)]
    pub estado: Option<String>,
}

#[derive(Debug, Deserialize)]
pub struct RacRecord {
    pub id: RacId,
    pub numero: i32,
    pub descripcion: String,
}

#[derive(Debug, Deserialize)]
pub struct SampleResponse {
    pub racs_por_gac: BTreeMap<String, Vec<Value>>,
}

#[derive(Debug, Deserialize)]
pub struct ScoreRecord {
    pub rac_id: RacId,
    pub puntaje: LooseNumber,
    #[serde(default)]
    pub fecha: Option<DateTime<Utc>>,
}

#[derive(Debug, Serialize)]
pub struct UpsertRequest {
    pub estudiante_id: StudentId,
    pub rac_id: RacId,
    pub puntaje: u8,
}

#[derive(Debug, Deserialize)]
pub struct UpsertResponse {
    #[serde(default)]
    pub puntaje: Option<LooseNumber>,
    #[serde(default)]
    pub created: Option<bool>,
}

#[derive(Debug, Serialize)]
pub struct BulkEntry {
    pub rac_id: RacId,
    pub puntaje: u8,
}

#[derive(Debug, Serialize)]
pub struct BulkRequest {
    pub estudiante_id: StudentId,
    pub evaluaciones: Vec<BulkEntry>,
}

impl BulkRequest {
    pub fn new(student_id: StudentId, entries: &[ScoreEntry]) -> Self {
        Self {
            estudiante_id: student_id,
            evaluaciones: entries
                .iter()
                .map(|entry| BulkEntry {
                    rac_id: entry.rac_id,
                    puntaje: entry.puntaje.value(),
                })
                .collect(),
        }
    }
}

#[derive(Debug, Deserialize)]
pub struct BulkResponse {
    #[serde(default)]
    pub resultados: Vec<Value>,
}

#[derive(Debug, Deserialize)]
pub struct BulkResultRecord {
    pub rac_id: RacId,
    #[serde(default)]
    pub puntaje: Option<LooseNumber>,
    #[serde(default)]
    pub created: bool,
    #[serde(default)]
    pub success: bool,
    #[serde(default)]
    pub error: Option<String>,
}

#[derive(Debug, Deserialize)]
pub struct ErrorBody {
    pub error: String,
}

#[derive(Debug, Deserialize)]
pub struct GeneralSummaryRecord {
    pub total_evaluaciones: i64,
    pub total_estudiantes: i64,
    pub total_racs: i64,
    pub promedio_general: LooseNumber,
    pub aprobadas: i64,
    pub reprobadas: i64,
    pub porcentaje_aprobacion: LooseNumber,
}

#[derive(Debug, Deserialize)]
pub struct TopRacRecord {
    pub numero: i32,
    pub descripcion: String,
    pub promedio: LooseNumber,
    pub total_evaluaciones: i64,
}

#[derive(Debug, Deserialize)]
pub struct GeneralStatisticsResponse {
    pub resumen_general: GeneralSummaryRecord,
    #[serde(default)]
    pub top_racs: Vec<Value>,
}

#[derive(Debug, Deserialize)]
pub struct GacStatisticsRecord {
    pub gac_numero: GacNumber,
    pub gac_descripcion: String,
    pub promedio: LooseNumber,
    pub total_evaluaciones: i64,
    pub aprobadas: i64,
    pub reprobadas: i64,
    pub porcentaje_aprobacion: LooseNumber,
}

#[derive(Debug, Deserialize)]
pub struct GacStatisticsResponse {
    #[serde(default)]
    pub estadisticas_por_gac: Vec<Value>,
}

#[derive(Debug, Deserialize)]
pub struct RacResultRecord {
    pub rac_numero: i32,
    pub rac_descripcion: String,
    pub puntaje: LooseNumber,
    #[serde(default)]
    pub fecha: Option<DateTime<Utc>>,
}

#[derive(Debug, Deserialize)]
pub struct GacResultRecord {
    pub gac_numero: GacNumber,
    pub gac_descripcion: String,
    #[serde(default)]
    pub racs: Vec<Value>,
    pub promedio_gac: LooseNumber,
}

#[derive(Debug, Deserialize)]
pub struct ResultsSummaryRecord {
    pub total_evaluaciones: i64,
    pub promedio_general: LooseNumber,
}

#[derive(Debug, Deserialize)]
pub struct StudentResultsResponse {
    pub estudiante: StudentRecord,
    #[serde(default)]
    pub resultados_por_gac: Vec<Value>,
    pub resumen_general: ResultsSummaryRecord,
}

fn quarantine<T, U, F>(records: Vec<Value>, kind: &'static str, convert: F) -> Vec<U>
where
    T: DeserializeOwned,
    F: Fn(T) -> Result<U, String>,
{
    records
        .into_iter()
        .filter_map(|value| {
            let parsed = serde_json::from_value::<T>(value).map_err(|e| e.to_string());
            match parsed.and_then(&convert) {
                Ok(record) => Some(record),
                Err(reason) => {
                    tracing::warn!(kind, %reason, "quarantined malformed record");
                    None
                }
            }
        })
        .collect()
}

fn number(value: &LooseNumber, field: &str) -> Result<f64, String> {
    value
        .as_f64()
        .filter(|v| v.is_finite())
        .ok_or_else(|| format!("{field} is not a number"))
}

fn puntaje(value: &LooseNumber) -> Result<Puntaje, String> {
    value
        .as_puntaje()
        .ok_or_else(|| format!("puntaje {value:?} is not an integer between 1 and 5"))
}

pub fn student(record: StudentRecord) -> Result<Student, String> {
    if record.id <= 0 {
        return Err(format!("invalid student id {}", record.id));
    }
    if record.nombre.trim().is_empty() {
        return Err(format!("student {} has no name", record.id));
    }
    let status = match record.estado.as_deref() {
        None => EnrollmentStatus::Enrolled,
        Some(value) => EnrollmentStatus::parse(value)
            .ok_or_else(|| format!("unknown enrollment status {value:?}"))?,
    };
    Ok(Student {
        id: record.id,
        document: record.documento,
        name: record.nombre,
        email: record.correo.filter(|email| !email.trim().is_empty()),
        group: record.grupo,
        status,
    })
}

pub fn students(records: Vec<Value>) -> Vec<Student> {
    quarantine(records, "student", student)
}

pub fn item_sample(response: SampleResponse) -> ItemSample {
    let mut groups = BTreeMap::new();
    for (key, records) in response.racs_por_gac {
        let Ok(gac_number) = key.trim().parse::<GacNumber>() else {
            tracing::warn!(key = %key, "quarantined sample group with non-numeric GAC");
            continue;
        };
        let racs = quarantine(records, "rac", |record: RacRecord| {
            if record.id <= 0 {
                return Err(format!("invalid RAC id {}", record.id));
            }
            Ok(Rac {
                id: record.id,
                number: record.numero,
                description: record.descripcion,
                gac_number,
            })
        });
        groups.insert(gac_number, racs);
    }
    ItemSample::new(groups)
}

pub fn scores(records: Vec<Value>) -> Vec<Score> {
    quarantine(records, "score", |record: ScoreRecord| {
        Ok(Score {
            rac_id: record.rac_id,
            puntaje: puntaje(&record.puntaje)?,
            evaluated_at: record.fecha,
        })
    })
}

pub fn saved_score(rac_id: RacId, sent: Puntaje, response: UpsertResponse) -> SavedScore {
    let stored = response.puntaje.as_ref().and_then(LooseNumber::as_puntaje);
    if stored.is_some_and(|stored| stored != sent) {
        tracing::warn!(rac_id, %sent, ?stored, "backend stored a different score than sent");
    }
    SavedScore {
        rac_id,
        puntaje: stored.unwrap_or(sent),
        created: response.created.unwrap_or(false),
    }
}

pub fn bulk_results(response: BulkResponse) -> Vec<BulkItemResult> {
    quarantine(response.resultados, "bulk result", |record: BulkResultRecord| {
        let outcome = if record.success {
            let stored = record
                .puntaje
                .as_ref()
                .ok_or_else(|| "successful item without puntaje".to_string())
                .and_then(puntaje)?;
            ItemOutcome::Saved(SavedScore {
                rac_id: record.rac_id,
                puntaje: stored,
                created: record.created,
            })
        } else {
            ItemOutcome::Rejected(
                record
                    .error
                    .unwrap_or_else(|| "no reason given".to_string()),
            )
        };
        Ok(BulkItemResult {
            rac_id: record.rac_id,
            outcome,
        })
    })
}

pub fn general_statistics(response: GeneralStatisticsResponse) -> Result<GeneralStatistics, String> {
    let summary = response.resumen_general;
    let top_racs = quarantine(response.top_racs, "top rac", |record: TopRacRecord| {
        Ok(RacAverage {
            number: record.numero,
            description: record.descripcion,
            average: number(&record.promedio, "promedio")?,
            total_scores: record.total_evaluaciones,
        })
    });
    Ok(GeneralStatistics {
        total_scores: summary.total_evaluaciones,
        total_students: summary.total_estudiantes,
        total_racs: summary.total_racs,
        average: number(&summary.promedio_general, "promedio_general")?,
        approved: summary.aprobadas,
        failed: summary.reprobadas,
        approval_percentage: number(&summary.porcentaje_aprobacion, "porcentaje_aprobacion")?,
        top_racs,
    })
}

pub fn gac_statistics(response: GacStatisticsResponse) -> Vec<GacStatistics> {
    quarantine(
        response.estadisticas_por_gac,
        "gac statistics",
        |record: GacStatisticsRecord| {
            Ok(GacStatistics {
                gac_number: record.gac_numero,
                description: record.gac_descripcion,
                average: number(&record.promedio, "promedio")?,
                total_scores: record.total_evaluaciones,
                approved: record.aprobadas,
                failed: record.reprobadas,
                approval_percentage: number(&record.porcentaje_aprobacion, "porcentaje_aprobacion")?,
            })
        },
    )
}

pub fn student_results(response: StudentResultsResponse) -> Result<StudentResults, String> {
    let student = student(response.estudiante)?;
    let by_gac = quarantine(
        response.resultados_por_gac,
        "gac result",
        |record: GacResultRecord| {
            let racs = quarantine(record.racs, "rac result", |rac: RacResultRecord| {
                Ok(RacResult {
                    rac_number: rac.rac_numero,
                    description: rac.rac_descripcion,
                    puntaje: puntaje(&rac.puntaje)?,
                    evaluated_at: rac.fecha,
                })
            });
            Ok(GacResult {
                gac_number: record.gac_numero,
                description: record.gac_descripcion,
                racs,
                average: number(&record.promedio_gac, "promedio_gac")?,
            })
        },
    );
    Ok(StudentResults {
        student,
        by_gac,
        total_scores: response.resumen_general.total_evaluaciones,
        average: number(&response.resumen_general.promedio_general, "promedio_general")?,
    })
}
