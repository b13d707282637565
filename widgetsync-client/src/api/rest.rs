use async_trait::async_trait;
use reqwest::{Client, RequestBuilder, StatusCode, Url};
use serde::de::DeserializeOwned;
use serde_json::{Value, json};
use widgetsync_api::{CreateScheduleRequest, CreateWidgetRequest, ScheduleEntry, WidgetRecord};

use super::CommandApi;
use crate::error::CommandError;
use crate::settings::ApiConfig;

/// [`CommandApi`] over the platform's HTTP API.
pub struct RestCommandApi {
    client: Client,
    base_url: Url,
    token: Option<String>,
}

impl RestCommandApi {
    pub fn new(config: &ApiConfig) -> Result<Self, CommandError> {
        let base_url = Url::parse(&config.base_url)
            .map_err(|e| CommandError::Network(format!("Invalid base URL: {}", e)))?;
        if base_url.cannot_be_a_base() {
            return Err(CommandError::Network(format!(
                "Invalid base URL: {}",
                config.base_url
            )));
        }

        let client = Client::builder()
            .timeout(config.request_timeout())
            .connect_timeout(config.connect_timeout())
            .build()
            .map_err(|e| CommandError::Network(format!("Failed to build HTTP client: {}", e)))?;

        Ok(Self {
            client,
            base_url,
            token: config.token.clone(),
        })
    }

    pub fn with_token(mut self, token: impl Into<String>) -> Self {
        self.token = Some(token.into());
        self
    }

    fn url(&self, segments: &[&str]) -> Url {
        let mut url = self.base_url.clone();
        if let Ok(mut path) = url.path_segments_mut() {
            path.pop_if_empty().extend(segments);
        }
        url
    }

    fn authorize(&self, request: RequestBuilder) -> RequestBuilder {
        match &self.token {
            Some(token) => request.bearer_auth(token),
            None => request,
        }
    }

    async fn execute(&self, request: RequestBuilder) -> Result<reqwest::Response, CommandError> {
        let response = self
            .authorize(request)
            .send()
            .await
            .map_err(map_transport_error)?;

        let status = response.status();
        if status == StatusCode::UNAUTHORIZED {
            return Err(CommandError::Unauthorized);
        }
        if !status.is_success() {
            let body = response.text().await.unwrap_or_default();
            return Err(CommandError::failure(
                Some(status.as_u16()),
                extract_message(status, &body),
            ));
        }

        Ok(response)
    }

    async fn fetch<T: DeserializeOwned>(&self, request: RequestBuilder) -> Result<T, CommandError> {
        self.execute(request)
            .await?
            .json::<T>()
            .await
            .map_err(map_transport_error)
    }
}

fn map_transport_error(error: reqwest::Error) -> CommandError {
    if error.is_timeout() {
        CommandError::Timeout
    } else if error.is_decode() {
        CommandError::Decode(error.to_string())
    } else if error.status() == Some(StatusCode::UNAUTHORIZED) {
        CommandError::Unauthorized
    } else {
        CommandError::Network(error.to_string())
    }
}

/// Human-readable message from an error body, falling back to the status.
fn extract_message(status: StatusCode, body: &str) -> String {
    let from_json = serde_json::from_str::<Value>(body).ok().and_then(|value| {
        value
            .pointer("/error/message")
            .or_else(|| value.get("message"))
            .or_else(|| value.get("error").filter(|error| error.is_string()))
            .and_then(Value::as_str)
            .map(str::to_string)
    });

    match from_json {
        Some(message) if !message.is_empty() => message,
        _ if !body.trim().is_empty() && body.len() <= 200 => body.trim().to_string(),
        _ => status
            .canonical_reason()
            .map(str::to_string)
            .unwrap_or_else(|| format!("HTTP {}", status.as_u16())),
    }
}

#[async_trait]
impl CommandApi for RestCommandApi {
    async fn set_actuator_state(
        &self,
        widget_id: &str,
        desired_state: bool,
    ) -> Result<WidgetRecord, CommandError> {
        let url = self.url(&["widgets", widget_id, "state"]);
        self.fetch(self.client.post(url).json(&json!({ "state": desired_state })))
            .await
    }

    async fn create_schedule(
        &self,
        widget_id: &str,
        request: &CreateScheduleRequest,
    ) -> Result<(), CommandError> {
        let url = self.url(&["widgets", widget_id, "schedules"]);
        self.execute(self.client.post(url).json(request)).await?;
        Ok(())
    }

    async fn cancel_schedule(&self, widget_id: &str, entry_id: &str) -> Result<(), CommandError> {
        let url = self.url(&["widgets", widget_id, "schedules", entry_id]);
        self.execute(self.client.delete(url)).await?;
        Ok(())
    }

    async fn list_schedules(&self, widget_id: &str) -> Result<Vec<ScheduleEntry>, CommandError> {
        let url = self.url(&["widgets", widget_id, "schedules"]);
        self.fetch(self.client.get(url)).await
    }

    async fn fetch_widgets(&self, dashboard_id: &str) -> Result<Vec<WidgetRecord>, CommandError> {
        let url = self.url(&["dashboards", dashboard_id, "widgets"]);
        self.fetch(self.client.get(url)).await
    }

    async fn create_widget(
        &self,
        dashboard_id: &str,
        request: &CreateWidgetRequest,
    ) -> Result<WidgetRecord, CommandError> {
        let url = self.url(&["dashboards", dashboard_id, "widgets"]);
        self.fetch(self.client.post(url).json(request)).await
    }

    async fn delete_widget(&self, dashboard_id: &str, widget_id: &str) -> Result<(), CommandError> {
        let url = self.url(&["dashboards", dashboard_id, "widgets", widget_id]);
        self.execute(self.client.delete(url)).await?;
        Ok(())
    }
}
