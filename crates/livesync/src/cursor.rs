use crate::envelope::Envelope;
use crate::error::Result;
use url::Url;

/// Connection target plus the `(clientId, lastMessageId)` resumption pair.
///
/// The server owns session identity and stream position: every inbound
/// envelope overwrites both fields, and every (re)connect sends them back
/// so the stream resumes after the last frame actually seen.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ResumeCursor {
    base_url: Url,
    channel: String,
    client_id: String,
    last_message_id: String,
}

impl ResumeCursor {
    pub fn new(
        base_url: &str,
        channel: impl Into<String>,
        client_id: impl Into<String>,
        last_message_id: impl Into<String>,
    ) -> Result<Self> {
        Ok(Self {
            base_url: Url::parse(base_url)?,
            channel: channel.into(),
            client_id: client_id.into(),
            last_message_id: last_message_id.into(),
        })
    }

    pub fn channel(&self) -> &str {
        &self.channel
    }

    pub fn client_id(&self) -> &str {
        &self.client_id
    }

    pub fn last_message_id(&self) -> &str {
        &self.last_message_id
    }

    /// Take identity and position from an inbound envelope.
    pub fn advance(&mut self, envelope: &Envelope) {
        self.client_id.clone_from(&envelope.client_id);
        self.last_message_id.clone_from(&envelope.id);
    }

    /// `base_url` with `channel`, `clientId` and `lastMessageId` appended,
    /// skipping empty values.
    pub fn connection_url(&self) -> Url {
        let mut url = self.base_url.clone();
        let params = [
            ("channel", self.channel.as_str()),
            ("clientId", self.client_id.as_str()),
            ("lastMessageId", self.last_message_id.as_str()),
        ];

        if params.iter().any(|(_, v)| !v.is_empty()) {
            let mut query = url.query_pairs_mut();
            for (key, value) in params.iter().filter(|(_, v)| !v.is_empty()) {
                query.append_pair(key, value);
            }
        }
        url
    }
}
