//! HTTP client for the patrol API

use reqwest::StatusCode;
use reqwest::multipart::{Form, Part};
use std::time::Duration;
use url::Url;

use crate::error::{Error, Result};
use crate::models::{
    CannotPatrolReport, ErrorResponse, HierarchyResponse, LoginData, LoginRequest, LoginResponse,
    Plant, SubmitResponse,
};

const LOGIN_PATH: &str = "login";
const LOGOUT_PATH: &str = "logout";
const HIERARCHY_PATH: &str = "hirarki-data";
const CANNOT_PATROL_PATH: &str = "cant-patrol";

/// Operations the session and report queue need from the remote service.
///
/// [`ApiClient`] is the real implementation; tests drive the session with fakes.
pub trait RemoteApi: Send + Sync {
    /// Exchange credentials for a bearer token and the user profile
    fn login(&self, email: &str, password: &str) -> impl Future<Output = Result<LoginData>> + Send;

    fn logout(&self, token: &str) -> impl Future<Output = Result<()>> + Send;

    /// Fetch the full hierarchy in one round trip. No retries.
    fn fetch_hierarchy(
        &self,
        token: Option<&str>,
    ) -> impl Future<Output = Result<Vec<Plant>>> + Send;

    /// Upload one report; returns the server's message
    fn submit_report(
        &self,
        token: &str,
        report: &CannotPatrolReport,
    ) -> impl Future<Output = Result<String>> + Send;
}

/// reqwest-backed client for the patrol API
#[derive(Debug, Clone)]
pub struct ApiClient {
    http: reqwest::Client,
    base_url: Url,
}

impl ApiClient {
    /// `base_url` must end with `/` so endpoint paths resolve beneath it.
    pub fn new(base_url: Url, timeout: Duration) -> Result<Self> {
        let http = reqwest::Client::builder()
            .timeout(timeout)
            .build()
            .map_err(|e| Error::Network(format!("failed to build HTTP client: {e}")))?;

        Ok(Self { http, base_url })
    }

    pub fn base_url(&self) -> &Url {
        &self.base_url
    }

    fn endpoint(&self, path: &str) -> Result<Url> {
        self.base_url
            .join(path)
            .map_err(|e| Error::ValidationError(format!("invalid endpoint {path}: {e}")))
    }
}

impl RemoteApi for ApiClient {
    async fn login(&self, email: &str, password: &str) -> Result<LoginData> {
        let url = self.endpoint(LOGIN_PATH)?;
        tracing::debug!(%url, "Sending login request");

        let response = self
            .http
            .post(url)
            .json(&LoginRequest {
                email: email.to_string(),
                password: password.to_string(),
            })
            .send()
            .await?;

        let status = response.status();
        let body = response.bytes().await?;

        if status == StatusCode::OK {
            let decoded: LoginResponse = serde_json::from_slice(&body)?;
            Ok(decoded.data)
        } else {
            tracing::warn!(status = status.as_u16(), "Login rejected");
            Err(login_failure(&body))
        }
    }

    async fn logout(&self, token: &str) -> Result<()> {
        let response = self
            .http
            .post(self.endpoint(LOGOUT_PATH)?)
            .bearer_auth(token)
            .send()
            .await?;

        match response.status() {
            StatusCode::OK => Ok(()),
            StatusCode::UNAUTHORIZED => Err(Error::Unauthenticated),
            status => Err(Error::ServerError(status.as_u16())),
        }
    }

    async fn fetch_hierarchy(&self, token: Option<&str>) -> Result<Vec<Plant>> {
        let token = token.ok_or(Error::Unauthenticated)?;
        let url = self.endpoint(HIERARCHY_PATH)?;
        tracing::debug!(%url, "Fetching hierarchy");

        let response = self.http.get(url).bearer_auth(token).send().await?;

        match response.status() {
            StatusCode::OK => {}
            StatusCode::UNAUTHORIZED => return Err(Error::Unauthenticated),
            status => {
                tracing::error!(status = status.as_u16(), "Hierarchy request failed");
                return Err(Error::ServerError(status.as_u16()));
            }
        }

        let body = response.bytes().await?;
        decode_hierarchy(&body)
    }

    async fn submit_report(&self, token: &str, report: &CannotPatrolReport) -> Result<String> {
        let form = report_form(report)?;

        let response = self
            .http
            .post(self.endpoint(CANNOT_PATROL_PATH)?)
            .bearer_auth(token)
            .multipart(form)
            .send()
            .await?;

        let status = response.status();
        let body = response.bytes().await?;

        match status.as_u16() {
            200..=299 => {
                let decoded: SubmitResponse = serde_json::from_slice(&body)?;
                tracing::info!(report_id = %report.id, message = %decoded.message, "Report accepted");
                Ok(decoded.message)
            }
            401 => Err(Error::Unauthenticated),
            422 => Err(Error::ValidationError(
                error_message(&body).unwrap_or_else(|| "Validation failed".to_string()),
            )),
            code => Err(Error::ServerError(code)),
        }
    }
}

/// Decode a `GET /hirarki-data` body and link every child to its parent.
pub fn decode_hierarchy(body: &[u8]) -> Result<Vec<Plant>> {
    let decoded: HierarchyResponse = serde_json::from_slice(body).map_err(|e| {
        tracing::error!(error = %e, "Hierarchy response did not match the expected shape");
        Error::DecodingError(e.to_string())
    })?;

    let mut plants = decoded.data;
    for plant in &mut plants {
        plant.link_parents();
    }
    Ok(plants)
}

/// Multipart body of `POST /cant-patrol`
fn report_form(report: &CannotPatrolReport) -> Result<Form> {
    let photo = Part::bytes(report.photo.clone())
        .file_name(report.photo_name.clone())
        .mime_str("image/jpeg")
        .map_err(|e| Error::ValidationError(format!("invalid photo part: {e}")))?;

    Ok(Form::new()
        .text("user[name]", report.name.clone())
        .text("user[username]", report.username.clone())
        .text("user[department]", report.department.clone())
        .text("user[role]", report.role.clone())
        .text("user[date]", report.submitted_at.clone())
        .part("photo[image_name]", photo)
        .text("photo[size]", report.photo_size().to_string())
        .text("reason_transactions[status]", report.status.as_str())
        .text("reason_transactions[reason]", report.reason.clone())
        .text("reason_transactions[location]", report.location.clone())
        .text("reason_transactions[lon]", report.longitude.to_string())
        .text("reason_transactions[lat]", report.latitude.to_string())
        .text("reason_transactions[date]", report.reason_date.clone()))
}

fn error_message(body: &[u8]) -> Option<String> {
    serde_json::from_slice::<ErrorResponse>(body)
        .ok()
        .map(|e| e.message)
}

fn login_failure(body: &[u8]) -> Error {
    Error::Unauthorized(error_message(body).unwrap_or_else(|| "Unknown error occurred.".to_string()))
}
