//! Authenticated proxy to the external survey system's API.
//!
//! Every call is a token-authenticated, form-URL-encoded POST against the
//! configured API endpoint. [`SurveyEndpoint`] carries the transport;
//! [`SurveySetup`] turns a setup answer into a personal survey link;
//! [`AcknowledgementsProject`] pushes disclaimer-acknowledgement records
//! through the record-import call.

use std::collections::BTreeMap;
use std::time::Duration;

use chrono::NaiveDateTime;
use reqwest::blocking::Client;
use serde_json::{json, Value};
use thiserror::Error;
use tracing::debug;
use url::Url;

/// Errors from survey API calls.
#[derive(Debug, Error)]
#[non_exhaustive]
pub enum SurveyApiError {
    /// The endpoint or survey URL cannot be parsed.
    #[error("invalid survey URL: {message}")]
    InvalidUrl {
        /// Parse detail.
        message: String,
    },

    /// Transport-level failure before an HTTP status was available.
    #[error("survey API transport error: {message}")]
    Transport {
        /// Error detail.
        message: String,
    },

    /// The API answered with a non-success HTTP status.
    #[error("survey API returned HTTP {status}: {message}")]
    Http {
        /// The HTTP status code.
        status: u16,
        /// The response body.
        message: String,
    },

    /// The API answered with a body that is not JSON.
    #[error("survey API returned a non-JSON response: {message}")]
    InvalidJson {
        /// Decode detail.
        message: String,
    },

    /// The API flagged the request as an error.
    #[error("survey API error: {message}")]
    ErrorResponse {
        /// The error message from the API.
        message: String,
    },

    /// A JSON answer lacks a field the caller requires.
    #[error("survey API response missing field {field}")]
    MissingField {
        /// The missing field.
        field: &'static str,
    },
}

/// Token-authenticated endpoint of the survey system's API.
pub struct SurveyEndpoint {
    api_url: Url,
    token: String,
    client: Client,
}

impl SurveyEndpoint {
    /// Creates an endpoint for the given API address and token.
    ///
    /// # Errors
    ///
    /// Returns an error when the address cannot be parsed or the HTTP
    /// client cannot be initialized.
    pub fn new(api_url: &str, token: impl Into<String>) -> Result<Self, SurveyApiError> {
        let api_url = Url::parse(api_url).map_err(|error| SurveyApiError::InvalidUrl {
            message: error.to_string(),
        })?;
        let client = Client::builder()
            .connect_timeout(Duration::from_secs(15))
            .timeout(Duration::from_secs(60))
            .build()
            .map_err(|error| SurveyApiError::Transport {
                message: error.to_string(),
            })?;
        Ok(Self {
            api_url,
            token: token.into(),
            client,
        })
    }

    fn request(
        &self,
        content: &str,
        params: &[(&str, String)],
    ) -> Result<String, SurveyApiError> {
        let mut form: Vec<(&str, String)> = vec![
            ("token", self.token.clone()),
            ("content", content.to_string()),
            ("format", "json".to_string()),
        ];
        form.extend(params.iter().map(|(key, value)| (*key, value.clone())));

        let response = self
            .client
            .post(self.api_url.clone())
            .form(&form)
            .send()
            .map_err(|error| SurveyApiError::Transport {
                message: error.to_string(),
            })?;
        let status = response.status();
        let body = response
            .text()
            .map_err(|error| SurveyApiError::Transport {
                message: error.to_string(),
            })?;
        if !status.is_success() {
            return Err(SurveyApiError::Http {
                status: status.as_u16(),
                message: body,
            });
        }
        Ok(body)
    }

    /// Posts a request and decodes the JSON answer.
    ///
    /// # Errors
    ///
    /// Returns an error on transport failure, a non-success status, a
    /// non-JSON body, or an error-flagged answer.
    pub fn accept_json(
        &self,
        content: &str,
        params: &[(&str, String)],
    ) -> Result<Value, SurveyApiError> {
        let body = self.request(content, params)?;
        let answer: Value =
            serde_json::from_str(&body).map_err(|error| SurveyApiError::InvalidJson {
                message: error.to_string(),
            })?;
        debug!(content, "survey API answer");
        if let Some(message) = answer.get("error").and_then(Value::as_str) {
            return Err(SurveyApiError::ErrorResponse {
                message: message.to_string(),
            });
        }
        Ok(answer)
    }

    /// Posts a request whose `data` parameter is a JSON-encoded list of
    /// field maps, returning the raw response body.
    ///
    /// # Errors
    ///
    /// Returns an error on transport failure or a non-success status.
    pub fn post_json(
        &self,
        content: &str,
        data: &[Value],
        params: &[(&str, String)],
    ) -> Result<String, SurveyApiError> {
        let payload =
            serde_json::to_string(data).map_err(|error| SurveyApiError::InvalidJson {
                message: error.to_string(),
            })?;
        let mut all = params.to_vec();
        all.push(("data", payload));
        self.request(content, &all)
    }

    /// Imports records into the survey project.
    ///
    /// # Errors
    ///
    /// Returns an error on transport failure or a non-success status.
    pub fn record_import(&self, data: &[Value]) -> Result<String, SurveyApiError> {
        debug!(rows = data.len(), "importing survey records");
        self.post_json("record", data, &[("action", "import".to_string())])
    }
}

/// Builds personal survey links from setup answers.
pub struct SurveySetup {
    endpoint: SurveyEndpoint,
    survey_url: Url,
    domain: String,
}

impl SurveySetup {
    /// Creates a setup client for the given survey base URL and mail
    /// domain.
    ///
    /// # Errors
    ///
    /// Returns an error when the survey URL cannot be parsed.
    pub fn new(
        endpoint: SurveyEndpoint,
        survey_url: &str,
        domain: impl Into<String>,
    ) -> Result<Self, SurveyApiError> {
        let survey_url = Url::parse(survey_url).map_err(|error| SurveyApiError::InvalidUrl {
            message: error.to_string(),
        })?;
        Ok(Self {
            endpoint,
            survey_url,
            domain: domain.into(),
        })
    }

    /// Sets up a survey invitation for `user_id` and returns the personal
    /// link carrying the survey code plus the given parameters.
    ///
    /// # Errors
    ///
    /// Returns an error when the setup call fails or its answer carries
    /// no survey code.
    pub fn invitation_url(
        &self,
        user_id: &str,
        params: &BTreeMap<String, String>,
        multi: bool,
    ) -> Result<Url, SurveyApiError> {
        let answer = self.endpoint.accept_json(
            "survey",
            &[
                ("action", "setup".to_string()),
                ("multi", if multi { "yes" } else { "no" }.to_string()),
                ("email", format!("{user_id}@{}", self.domain)),
            ],
        )?;
        let code = answer
            .get("hash")
            .and_then(Value::as_str)
            .ok_or(SurveyApiError::MissingField { field: "hash" })?;
        Ok(survey_link(&self.survey_url, code, params))
    }
}

/// Joins a survey code and sorted parameters onto the survey base URL,
/// replacing whatever query the base carried.
#[must_use]
pub fn survey_link(base: &Url, code: &str, params: &BTreeMap<String, String>) -> Url {
    let mut link = base.clone();
    link.query_pairs_mut()
        .clear()
        .append_pair("s", code)
        .extend_pairs(params.iter())
        .finish();
    link
}

/// Write path for disclaimer acknowledgements: builds acknowledgement
/// records and pushes them through the survey system's import API.
pub struct AcknowledgementsProject {
    endpoint: SurveyEndpoint,
}

impl AcknowledgementsProject {
    /// Creates the write path over the given endpoint.
    #[must_use]
    pub fn new(endpoint: SurveyEndpoint) -> Self {
        Self { endpoint }
    }

    /// Records that each `(user, time)` pair acknowledged the disclaimer
    /// at `disclaimer_address`, returning the imported records.
    ///
    /// # Errors
    ///
    /// Returns an error when the import call fails.
    pub fn add_records(
        &self,
        disclaimer_address: &str,
        who_when: &[(String, NaiveDateTime)],
    ) -> Result<Vec<Value>, SurveyApiError> {
        let records = acknowledgement_records(disclaimer_address, who_when);
        self.endpoint.record_import(&records)?;
        Ok(records)
    }

    /// Records a single acknowledgement.
    ///
    /// # Errors
    ///
    /// Returns an error when the import call fails.
    pub fn add_record(
        &self,
        user_id: &str,
        disclaimer_address: &str,
        acknowledged_at: NaiveDateTime,
    ) -> Result<Value, SurveyApiError> {
        let mut records =
            self.add_records(disclaimer_address, &[(user_id.to_string(), acknowledged_at)])?;
        Ok(records.remove(0))
    }
}

/// Builds acknowledgement import records.
///
/// Record ids combine the date, the user and the last segment of the
/// disclaimer address; last segments are distinct across releases, so ids
/// stay unique per user and day without a sequence.
#[must_use]
pub fn acknowledgement_records(
    disclaimer_address: &str,
    who_when: &[(String, NaiveDateTime)],
) -> Vec<Value> {
    who_when
        .iter()
        .map(|(user_id, acknowledged_at)| {
            json!({
                "ack": format!(
                    "{} {} {}",
                    acknowledged_at.format("%Y-%m-%d"),
                    user_id,
                    last_segment(disclaimer_address),
                ),
                "timestamp": acknowledged_at.format("%Y-%m-%d %H:%M:%S").to_string(),
                "user_id": user_id,
                "disclaimer_address": disclaimer_address,
                "acknowledgement_complete": "2",
            })
        })
        .collect()
}

/// The last `/`-segment of an address, slash included.
fn last_segment(address: &str) -> &str {
    match address.rfind('/') {
        Some(index) => &address[index..],
        None => address,
    }
}
