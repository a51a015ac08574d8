use crate::config::ApiConfig;
use crate::error::Result;
use crate::types::{ChatMessage, EventId, LiveEvent, Question};
use async_trait::async_trait;
use serde::de::DeserializeOwned;
use std::time::Duration;
use tracing::debug;
use url::Url;

/// Request/response access to the server's event resources, used for
/// the initial loads that realtime deltas are then applied on top of.
#[async_trait]
pub trait EventSource: Send + Sync {
    async fn get_events(&self) -> Result<Vec<LiveEvent>>;

    async fn get_event(&self, slug: &str) -> Result<LiveEvent>;

    async fn get_questions(&self, event_id: EventId) -> Result<Vec<Question>>;

    async fn get_messages(&self, event_id: EventId) -> Result<Vec<ChatMessage>>;
}

/// `EventSource` over the JSON HTTP API
///
/// - `GET {api}/events`
/// - `GET {api}/events/{slug}`
/// - `GET {api}/events/{id}/questions`
/// - `GET {api}/events/{id}/messages`
pub struct HttpEventSource {
    client: reqwest::Client,
    api_url: Url,
}

impl HttpEventSource {
    pub fn new(config: &ApiConfig) -> Result<Self> {
        let client = reqwest::Client::builder()
            .timeout(Duration::from_millis(config.request_timeout_ms))
            .build()?;
        Ok(Self {
            client,
            api_url: Url::parse(&config.api_url)?,
        })
    }

    fn endpoint(&self, segments: &[&str]) -> Url {
        let mut url = self.api_url.clone();
        if let Ok(mut path) = url.path_segments_mut() {
            path.pop_if_empty().extend(segments);
        }
        url
    }

    async fn get_json<T: DeserializeOwned>(&self, url: Url) -> Result<T> {
        debug!("GET {}", url);
        let response = self.client.get(url).send().await?.error_for_status()?;
        Ok(response.json().await?)
    }
}

#[async_trait]
impl EventSource for HttpEventSource {
    async fn get_events(&self) -> Result<Vec<LiveEvent>> {
        self.get_json(self.endpoint(&["events"])).await
    }

    async fn get_event(&self, slug: &str) -> Result<LiveEvent> {
        self.get_json(self.endpoint(&["events", slug])).await
    }

    async fn get_questions(&self, event_id: EventId) -> Result<Vec<Question>> {
        let id = event_id.to_string();
        self.get_json(self.endpoint(&["events", id.as_str(), "questions"]))
            .await
    }

    async fn get_messages(&self, event_id: EventId) -> Result<Vec<ChatMessage>> {
        let id = event_id.to_string();
        self.get_json(self.endpoint(&["events", id.as_str(), "messages"]))
            .await
    }
}
