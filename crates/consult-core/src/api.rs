use reqwest::StatusCode;
use serde::Deserialize;
use url::Url;

use crate::errors::ConsultError;

/// Room credential issued for one consultation.
///
/// The token is single-use and scoped to `room_name` and `identity`.
#[derive(Debug, Clone, PartialEq, Eq, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct VideoGrant {
    pub token: String,
    pub room_name: String,
    pub identity: String,
}

/// Client for the consultation video endpoints.
#[derive(Debug, Clone)]
pub struct ConsultationApi {
    base_url: Url,
    client: reqwest::Client,
    bearer: Option<String>,
}

impl ConsultationApi {
    /// `base_url` is the API root, e.g. `https://clinic.example.com/api/v1`.
    pub fn new(base_url: &str) -> Result<Self, ConsultError> {
        let mut base_url = Url::parse(base_url.trim())
            .map_err(|e| ConsultError::InvalidUrl(format!("'{base_url}': {e}")))?;
        if base_url.cannot_be_a_base() {
            return Err(ConsultError::InvalidUrl(format!("'{base_url}' cannot be a base URL")));
        }
        if !base_url.path().ends_with('/') {
            let path = format!("{}/", base_url.path());
            base_url.set_path(&path);
        }

        Ok(Self {
            base_url,
            client: reqwest::Client::new(),
            bearer: None,
        })
    }

    /// Authenticate requests as the signed-in patient or provider.
    pub fn with_bearer(mut self, token: impl Into<String>) -> Self {
        self.bearer = Some(token.into());
        self
    }

    fn endpoint(&self, consultation_id: &str, action: &str) -> Result<Url, ConsultError> {
        let id = consultation_id.trim();
        if id.is_empty() {
            return Err(ConsultError::InvalidUrl("empty consultation id".into()));
        }
        let path = format!("consultations/{}/video/{action}", urlencoding::encode(id));
        self.base_url
            .join(&path)
            .map_err(|e| ConsultError::InvalidUrl(e.to_string()))
    }

    fn post(&self, url: Url) -> reqwest::RequestBuilder {
        let request = self.client.post(url);
        match &self.bearer {
            Some(token) => request.bearer_auth(token),
            None => request,
        }
    }

    /// Fetch a fresh room credential.
    ///
    /// Expired appointments and authorization failures surface as
    /// [`ConsultError::Credential`] before any transport is touched.
    pub async fn request_token(&self, consultation_id: &str) -> Result<VideoGrant, ConsultError> {
        let url = self.endpoint(consultation_id, "token")?;
        tracing::info!("requesting video token: {url}");

        let resp = self
            .post(url)
            .send()
            .await
            .map_err(|e| ConsultError::Http(e.to_string()))?;

        let status = resp.status();
        match status {
            s if s.is_success() => {}
            StatusCode::UNAUTHORIZED | StatusCode::FORBIDDEN | StatusCode::NOT_FOUND | StatusCode::GONE => {
                return Err(ConsultError::Credential(format!(
                    "consultation API refused token ({status})"
                )));
            }
            _ => {
                let message = resp.text().await.unwrap_or_default();
                return Err(ConsultError::Api { status: status.as_u16(), message });
            }
        }

        let grant: VideoGrant = resp
            .json()
            .await
            .map_err(|e| ConsultError::Api {
                status: status.as_u16(),
                message: format!("invalid token response: {e}"),
            })?;

        if grant.token.is_empty() || grant.room_name.is_empty() {
            return Err(ConsultError::Credential("token response without token or room".into()));
        }
        Ok(grant)
    }

    /// Server-side bookkeeping for a finished call. Best-effort.
    pub async fn end_session(&self, consultation_id: &str) -> Result<(), ConsultError> {
        let url = self.endpoint(consultation_id, "end")?;
        tracing::info!("notifying session end: {url}");

        let resp = self
            .post(url)
            .send()
            .await
            .map_err(|e| ConsultError::Http(e.to_string()))?;

        if !resp.status().is_success() {
            return Err(ConsultError::Api {
                status: resp.status().as_u16(),
                message: resp.text().await.unwrap_or_default(),
            });
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;
    use wiremock::matchers::{header, method, path};
    use wiremock::{Mock, MockServer, ResponseTemplate};

    #[test]
    fn endpoint_keeps_base_path() {
        let api = ConsultationApi::new("https://clinic.example.com/api/v1").unwrap();
        let url = api.endpoint("c-1", "token").unwrap();
        assert_eq!(url.as_str(), "https://clinic.example.com/api/v1/consultations/c-1/video/token");
    }

    #[test]
    fn endpoint_encodes_consultation_id() {
        let api = ConsultationApi::new("https://clinic.example.com/").unwrap();
        let url = api.endpoint("a/b c", "end").unwrap();
        assert_eq!(url.as_str(), "https://clinic.example.com/consultations/a%2Fb%20c/video/end");
    }

    #[test]
    fn invalid_inputs_are_rejected() {
        assert!(ConsultationApi::new("not a url").is_err());
        assert!(ConsultationApi::new("mailto:ops@example.com").is_err());
        let api = ConsultationApi::new("https://clinic.example.com").unwrap();
        assert!(matches!(api.endpoint("  ", "token"), Err(ConsultError::InvalidUrl(_))));
    }

    #[tokio::test]
    async fn request_token_parses_grant() {
        let server = MockServer::start().await;
        Mock::given(method("POST"))
            .and(path("/consultations/c-1/video/token"))
            .and(header("authorization", "Bearer session-jwt"))
            .respond_with(ResponseTemplate::new(200).set_body_json(json!({
                "token": "tok-123",
                "roomName": "consult-c-1",
                "identity": "patient-7"
            })))
            .expect(1)
            .mount(&server)
            .await;

        let api = ConsultationApi::new(&server.uri()).unwrap().with_bearer("session-jwt");
        let grant = api.request_token("c-1").await.unwrap();

        assert_eq!(
            grant,
            VideoGrant {
                token: "tok-123".into(),
                room_name: "consult-c-1".into(),
                identity: "patient-7".into(),
            }
        );
    }

    #[tokio::test]
    async fn expired_appointment_is_credential_error() {
        let server = MockServer::start().await;
        Mock::given(method("POST"))
            .and(path("/consultations/c-1/video/token"))
            .respond_with(ResponseTemplate::new(410))
            .mount(&server)
            .await;

        let api = ConsultationApi::new(&server.uri()).unwrap();
        let err = api.request_token("c-1").await.unwrap_err();
        assert!(matches!(err, ConsultError::Credential(_)));
        assert!(!err.is_retryable());
    }

    #[tokio::test]
    async fn server_error_is_api_error() {
        let server = MockServer::start().await;
        Mock::given(method("POST"))
            .and(path("/consultations/c-1/video/token"))
            .respond_with(ResponseTemplate::new(503).set_body_string("maintenance"))
            .mount(&server)
            .await;

        let api = ConsultationApi::new(&server.uri()).unwrap();
        match api.request_token("c-1").await.unwrap_err() {
            ConsultError::Api { status, message } => {
                assert_eq!(status, 503);
                assert_eq!(message, "maintenance");
            }
            other => panic!("unexpected error: {other}"),
        }
    }

    #[tokio::test]
    async fn end_session_reports_failure() {
        let server = MockServer::start().await;
        Mock::given(method("POST"))
            .and(path("/consultations/c-1/video/end"))
            .respond_with(ResponseTemplate::new(500))
            .mount(&server)
            .await;

        let api = ConsultationApi::new(&server.uri()).unwrap();
        assert!(api.end_session("c-1").await.is_err());
    }
}
