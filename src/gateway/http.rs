use reqwest::blocking::{Client, RequestBuilder};
use reqwest::header::CONTENT_TYPE;
use serde::de::DeserializeOwned;
use serde::Serialize;
use std::time::Duration;
use tracing::{debug, instrument, warn};

use super::wire::{
    CheckResponse, QuestionsResponse, SubmissionsResponse, WriteResponse,
};
use super::{
    AdminGateway, Gateway, GatewayError, QuestionsPayload, Settings, Submission, SubmissionRecord,
};
use crate::schedule::Schedule;

/// Talks to the deployed backend script over HTTPS.
#[derive(Debug, Clone)]
pub struct HttpGateway {
    endpoint: reqwest::Url,
    client: Client,
}

impl HttpGateway {
    pub fn new(endpoint: &str, timeout: Duration) -> Result<Self, GatewayError> {
        let endpoint = reqwest::Url::parse(endpoint.trim())
            .map_err(|e| GatewayError::Transport(format!("invalid endpoint url: {e}")))?;
        if !matches!(endpoint.scheme(), "http" | "https") {
            return Err(GatewayError::Transport(format!(
                "unsupported endpoint scheme: {}",
                endpoint.scheme()
            )));
        }
        let client = Client::builder().timeout(timeout).build()?;
        Ok(Self { endpoint, client })
    }

    pub fn endpoint(&self) -> &str {
        self.endpoint.as_str()
    }

    fn get<T: DeserializeOwned>(&self, action: &str, params: &[(&str, String)]) -> Result<T, GatewayError> {
        let mut query: Vec<(&str, String)> = vec![("action", action.to_string())];
        query.extend(params.iter().cloned());
        self.send(action, self.client.get(self.endpoint.clone()).query(&query))
    }

    /// The script only reads plain-text bodies, so JSON goes out as `text/plain`.
    fn post<B: Serialize, T: DeserializeOwned>(&self, action: Option<&str>, body: &B) -> Result<T, GatewayError> {
        let mut req = self.client.post(self.endpoint.clone());
        if let Some(action) = action {
            req = req.query(&[("action", action)]);
        }
        let body = serde_json::to_string(body)?;
        req = req.header(CONTENT_TYPE, "text/plain").body(body);
        self.send(action.unwrap_or("submit"), req)
    }

    fn send<T: DeserializeOwned>(&self, action: &str, req: RequestBuilder) -> Result<T, GatewayError> {
        let resp = req.send().map_err(|e| {
            warn!(action, error = %e, "gateway request failed");
            GatewayError::from(e)
        })?;
        let status = resp.status();
        let text = resp.text()?;
        debug!(action, %status, bytes = text.len(), "gateway response");
        if !status.is_success() {
            return Err(GatewayError::Transport(format!("server returned {status}")));
        }
        Ok(serde_json::from_str(&text)?)
    }
}

impl Gateway for HttpGateway {
    #[instrument(skip(self))]
    fn schedule(&self) -> Result<Schedule, GatewayError> {
        self.get("getSchedule", &[])
    }

    #[instrument(skip(self))]
    fn questions(&self, day: u8) -> Result<QuestionsPayload, GatewayError> {
        self.get::<QuestionsResponse>("getQuestions", &[("day", day.to_string())])?
            .into_result()
    }

    #[instrument(skip(self))]
    fn submission_exists(&self, email: &str, day: u8) -> Result<bool, GatewayError> {
        let resp: CheckResponse = self.get(
            "checkSubmission",
            &[("email", email.to_string()), ("day", day.to_string())],
        )?;
        Ok(resp.exists)
    }

    #[instrument(skip_all, fields(day = submission.day))]
    fn submit(&self, submission: &Submission) -> Result<(), GatewayError> {
        self.post::<_, WriteResponse>(None, submission)?.into_result()
    }
}

#[derive(Serialize)]
struct DayQuestions<'a> {
    day: String,
    #[serde(flatten)]
    questions: &'a QuestionsPayload,
}

impl AdminGateway for HttpGateway {
    fn settings(&self) -> Result<Settings, GatewayError> {
        self.get("getSettings", &[])
    }

    fn save_settings(&self, settings: &Settings) -> Result<(), GatewayError> {
        self.post::<_, WriteResponse>(Some("saveSettings"), settings)?
            .into_result()
    }

    fn save_questions(&self, day: u8, questions: &QuestionsPayload) -> Result<(), GatewayError> {
        let body = DayQuestions {
            day: day.to_string(),
            questions,
        };
        self.post::<_, WriteResponse>(Some("saveQuestions"), &body)?
            .into_result()
    }

    fn save_schedule(&self, schedule: &Schedule) -> Result<(), GatewayError> {
        self.post::<_, WriteResponse>(Some("saveSchedule"), schedule)?
            .into_result()
    }

    fn submissions(&self) -> Result<Vec<SubmissionRecord>, GatewayError> {
        self.get::<SubmissionsResponse>("getSubmissions", &[])?
            .into_result()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn rejects_garbage_endpoint() {
        let err = HttpGateway::new("not a url", Duration::from_secs(1)).unwrap_err();
        assert!(matches!(err, GatewayError::Transport(_)));
    }

    #[test]
    fn rejects_non_http_scheme() {
        let err = HttpGateway::new("ftp://example.com/exec", Duration::from_secs(1)).unwrap_err();
        assert!(err.to_string().contains("ftp"));
    }

    #[test]
    fn unreachable_host_is_a_transport_error() {
        // port 9 (discard) on localhost is closed on any sane test host
        let gw = HttpGateway::new("http://127.0.0.1:9/exec", Duration::from_millis(500)).unwrap();
        let err = gw.schedule().unwrap_err();
        assert!(matches!(err, GatewayError::Transport(_) | GatewayError::Timeout));
    }

    #[test]
    fn day_questions_body_carries_day() {
        let q = QuestionsPayload {
            q1_text: "a".into(),
            ..Default::default()
        };
        let json = serde_json::to_value(DayQuestions {
            day: "4".into(),
            questions: &q,
        })
        .unwrap();
        assert_eq!(json["day"], "4");
        assert_eq!(json["q1_text"], "a");
    }
}
