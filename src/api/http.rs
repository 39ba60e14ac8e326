//! REST client for the scoring service.

use std::time::Duration;

use async_trait::async_trait;
use serde::de::DeserializeOwned;
use serde_json::Value;

use crate::api::{wire, ScoringApi};
use crate::config::ApiSettings;
use crate::error::ApiError;
use crate::models::{
    BulkItemResult, GacStatistics, GeneralStatistics, ItemSample, Puntaje, RacId, SavedScore,
    Score, ScoreEntry, Student, StudentId, StudentResults,
};

pub struct HttpScoringApi {
    http: reqwest::Client,
    base_url: String,
    token: Option<String>,
}

impl HttpScoringApi {
    pub fn new(settings: &ApiSettings) -> Result<Self, ApiError> {
        let http = reqwest::Client::builder()
            .user_agent(concat!("competency-evaluation/", env!("CARGO_PKG_VERSION")))
            .timeout(Duration::from_secs(settings.timeout_secs))
            .build()?;
        Ok(Self {
            http,
            base_url: settings.base_url.trim_end_matches('/').to_string(),
            token: settings.token.clone(),
        })
    }

    fn url(&self, path: &str) -> String {
        format!("{}/{}", self.base_url, path.trim_start_matches('/'))
    }

    fn authorize(&self, request: reqwest::RequestBuilder) -> reqwest::RequestBuilder {
        match &self.token {
            Some(token) => request.bearer_auth(token),
            None => request,
        }
    }

    async fn get<T: DeserializeOwned>(&self, path: &str) -> Result<T, ApiError> {
        let url = self.url(path);
        tracing::debug!(%url, "GET");
        let response = self.authorize(self.http.get(&url)).send().await?;
        decode(check_response(response).await?).await
    }

    async fn post<B, T>(&self, path: &str, body: &B) -> Result<T, ApiError>
    where
        B: serde::Serialize + ?Sized,
        T: DeserializeOwned,
    {
        let url = self.url(path);
        tracing::debug!(%url, "POST");
        let response = self.authorize(self.http.post(&url)).json(body).send().await?;
        decode(check_response(response).await?).await
    }
}

/// Turns non-success responses into [`ApiError::Rejected`], preferring the
/// backend's `{"error": ..}` message over the raw body.
pub async fn check_response(response: reqwest::Response) -> Result<reqwest::Response, ApiError> {
    let status = response.status();
    if status.is_success() {
        return Ok(response);
    }
    let body = response.text().await.unwrap_or_default();
    let message = serde_json::from_str::<wire::ErrorBody>(&body)
        .map(|parsed| parsed.error)
        .unwrap_or_else(|_| {
            if body.trim().is_empty() {
                status
                    .canonical_reason()
                    .unwrap_or("request failed")
                    .to_string()
            } else {
                body
            }
        });
    Err(ApiError::rejected(status.as_u16(), message))
}

/// Reads the body and parses it as `T`. A body that arrives but does not
/// match the schema is [`ApiError::Malformed`], not a transport failure.
pub async fn decode<T: DeserializeOwned>(response: reqwest::Response) -> Result<T, ApiError> {
    let body = response.text().await?;
    serde_json::from_str(&body).map_err(|e| ApiError::Malformed(e.to_string()))
}

#[async_trait]
impl ScoringApi for HttpScoringApi {
    async fn roster(&self) -> Result<Vec<Student>, ApiError> {
        let records: Vec<Value> = self.get("api/estudiantes/").await?;
        Ok(wire::students(records))
    }

    async fn item_sample(&self) -> Result<ItemSample, ApiError> {
        let response: wire::SampleResponse = self.get("api/racs/aleatorios-por-gac/").await?;
        Ok(wire::item_sample(response))
    }

    async fn student_scores(&self, student_id: StudentId) -> Result<Vec<Score>, ApiError> {
        let records: Vec<Value> = self
            .get(&format!("api/evaluaciones/estudiante/{student_id}/"))
            .await?;
        Ok(wire::scores(records))
    }

    async fn upsert_score(
        &self,
        student_id: StudentId,
        rac_id: RacId,
        puntaje: Puntaje,
    ) -> Result<SavedScore, ApiError> {
        let request = wire::UpsertRequest {
            estudiante_id: student_id,
            rac_id,
            puntaje: puntaje.value(),
        };
        let response: wire::UpsertResponse = self.post("api/evaluaciones/crear/", &request).await?;
        Ok(wire::saved_score(rac_id, puntaje, response))
    }

    async fn upsert_scores(
        &self,
        student_id: StudentId,
        entries: &[ScoreEntry],
    ) -> Result<Vec<BulkItemResult>, ApiError> {
        let request = wire::BulkRequest::new(student_id, entries);
        let response: wire::BulkResponse = self.post("api/evaluaciones/masivas/", &request).await?;
        Ok(wire::bulk_results(response))
    }

    async fn general_statistics(&self) -> Result<GeneralStatistics, ApiError> {
        let response: wire::GeneralStatisticsResponse =
            self.get("api/evaluaciones/estadisticas/").await?;
        wire::general_statistics(response).map_err(ApiError::Malformed)
    }

    async fn gac_statistics(&self) -> Result<Vec<GacStatistics>, ApiError> {
        let response: wire::GacStatisticsResponse =
            self.get("api/evaluaciones/estadisticas-por-gac/").await?;
        Ok(wire::gac_statistics(response))
    }

    async fn student_results(&self, student_id: StudentId) -> Result<StudentResults, ApiError> {
        let response: wire::StudentResultsResponse = self
            .get(&format!("api/evaluaciones/resultados-estudiante/{student_id}/"))
            .await?;
        wire::student_results(response).map_err(ApiError::Malformed)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn mock_response(status: u16, body: &'static str) -> reqwest::Response {
        reqwest::Response::from(
            ::http::Response::builder()
                .status(status)
                .body(body)
                .unwrap(),
        )
    }

    fn settings(base_url: &str) -> ApiSettings {
        ApiSettings {
            base_url: base_url.to_string(),
            token: None,
            timeout_secs: 5,
        }
    }

    #[test]
    fn urls_join_without_double_slashes() {
        let api = HttpScoringApi::new(&settings("http://localhost:8000/competencias/")).unwrap();
        assert_eq!(
            api.url("/api/estudiantes/"),
            "http://localhost:8000/competencias/api/estudiantes/"
        );
        assert_eq!(
            api.url("api/evaluaciones/crear/"),
            "http://localhost:8000/competencias/api/evaluaciones/crear/"
        );
    }

    #[tokio::test]
    async fn decode_reports_schema_mismatch_as_malformed() {
        let err = decode::<Vec<Value>>(mock_response(200, r#"{"oops": 1}"#))
            .await
            .unwrap_err();
        assert!(matches!(err, ApiError::Malformed(_)), "got {err:?}");

        let err = decode::<wire::SampleResponse>(mock_response(200, r#"{"total_gacs": 2}"#))
            .await
            .unwrap_err();
        assert!(matches!(err, ApiError::Malformed(ref message) if message.contains("racs_por_gac")));

        let err = decode::<Vec<Value>>(mock_response(200, "<html>gateway</html>"))
            .await
            .unwrap_err();
        assert!(matches!(err, ApiError::Malformed(_)));
    }

    #[tokio::test]
    async fn decode_parses_matching_body() {
        let records = decode::<Vec<Value>>(mock_response(200, r#"[{"id": 1}]"#))
            .await
            .unwrap();
        assert_eq!(records.len(), 1);
    }

    #[tokio::test]
    async fn check_response_success() {
        assert!(check_response(mock_response(200, "[]")).await.is_ok());
    }

    #[tokio::test]
    async fn check_response_uses_backend_error_message() {
        let response = mock_response(404, r#"{"error": "Estudiante no encontrado o no matriculado"}"#);
        let err = check_response(response).await.unwrap_err();
        assert!(matches!(
            err,
            ApiError::Rejected { status: 404, ref message }
                if message == "Estudiante no encontrado o no matriculado"
        ));
    }

    #[tokio::test]
    async fn check_response_falls_back_to_raw_body() {
        let err = check_response(mock_response(502, "upstream down"))
            .await
            .unwrap_err();
        assert!(matches!(err, ApiError::Rejected { status: 502, ref message } if message == "upstream down"));

        let err = check_response(mock_response(500, "")).await.unwrap_err();
        assert!(matches!(
            err,
            ApiError::Rejected { status: 500, ref message } if message == "Internal Server Error"
        ));
    }
}
