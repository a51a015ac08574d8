use crate::dispatcher::EnvelopeHandler;
use crate::envelope::{Delta, Envelope};
use crate::error::Result;
use crate::reconciler::EventStore;
use crate::source::EventSource;
use crate::types::{
    ChatMessage, ChildRef, EventId, LiveEvent, Question, UserId, rank_questions,
};
use async_trait::async_trait;
use std::sync::Arc;
use tokio::sync::{RwLock, RwLockReadGuard};
use tracing::{debug, info, warn};

/// Single writer over the synchronised document
///
/// This is the glue layer that:
/// - Owns the `EventStore` and the viewer identity
/// - Runs the loading actions against an `EventSource`
/// - Turns inbound envelopes into reducer calls
///
/// Readers get a read guard or a snapshot; every write goes through the
/// methods here. Cloning shares the same document.
#[derive(Clone, Default)]
pub struct SyncStore {
    state: Arc<RwLock<EventStore>>,
    user: Arc<RwLock<Option<UserId>>>,
}

impl SyncStore {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with_user(user: Option<UserId>) -> Self {
        Self {
            state: Arc::default(),
            user: Arc::new(RwLock::new(user)),
        }
    }

    pub async fn set_user(&self, user: Option<UserId>) {
        *self.user.write().await = user;
    }

    pub async fn user(&self) -> Option<UserId> {
        self.user.read().await.clone()
    }

    pub async fn read(&self) -> RwLockReadGuard<'_, EventStore> {
        self.state.read().await
    }

    pub async fn snapshot(&self) -> EventStore {
        self.state.read().await.clone()
    }

    /*
        Loading
    */

    pub async fn load_events(&self, source: &dyn EventSource) -> Result<Vec<LiveEvent>> {
        let events = source.get_events().await?;
        info!("Loaded {} events", events.len());
        self.state.write().await.set_events(events.clone());
        Ok(events)
    }

    /// Fetch an event by slug and make it the loaded event.
    pub async fn load_event(&self, source: &dyn EventSource, slug: &str) -> Result<LiveEvent> {
        let mut event = source.get_event(slug).await?;
        info!("Loaded event {} ({})", event.id, event.slug);
        rank_questions(&mut event.questions);
        self.state.write().await.set_event(Some(event.clone()));
        Ok(event)
    }

    /// Fetch questions for the loaded event. With nothing loaded the
    /// collection is simply empty.
    pub async fn load_questions(&self, source: &dyn EventSource) -> Result<Vec<Question>> {
        let Some(event_id) = self.loaded_event_id().await else {
            return Ok(Vec::new());
        };
        let questions = source.get_questions(event_id).await?;
        let mut state = self.state.write().await;
        state.set_questions(questions);
        Ok(state.questions().to_vec())
    }

    pub async fn load_messages(&self, source: &dyn EventSource) -> Result<Vec<ChatMessage>> {
        let Some(event_id) = self.loaded_event_id().await else {
            return Ok(Vec::new());
        };
        let messages = source.get_messages(event_id).await?;
        let mut state = self.state.write().await;
        state.set_messages(messages);
        Ok(state.messages().to_vec())
    }

    async fn loaded_event_id(&self) -> Option<EventId> {
        self.state.read().await.event().map(|e| e.id)
    }

    /*
        Mutations
    */

    pub async fn add_event(&self, event: LiveEvent) -> bool {
        self.state.write().await.add_event(event)
    }

    pub async fn update_event(&self, event: LiveEvent) -> bool {
        self.state.write().await.update_event(event)
    }

    pub async fn delete_event(&self, id: EventId) -> bool {
        self.state.write().await.delete_event(id)
    }

    /// A new question carries no vote of ours: with a known viewer it is
    /// stamped as theirs with a neutral vote before it is committed.
    pub async fn add_question(&self, mut question: Question) -> bool {
        if let Some(user) = self.user().await {
            question.stats.vote_requester = Some(user);
            question.stats.user_vote = 0;
        }
        self.state.write().await.add_question(question)
    }

    pub async fn update_question(&self, question: Question) -> bool {
        let user = self.user().await;
        self.state
            .write()
            .await
            .update_question(question, user.as_ref())
    }

    pub async fn delete_question(&self, target: ChildRef) -> bool {
        self.state.write().await.delete_question(target)
    }

    pub async fn add_message(&self, message: ChatMessage) -> bool {
        self.state.write().await.add_message(message)
    }

    pub async fn update_message(&self, message: ChatMessage) -> bool {
        self.state.write().await.update_message(message)
    }

    pub async fn delete_message(&self, target: ChildRef) -> bool {
        self.state.write().await.delete_message(target)
    }

    /// Route a decoded delta to its reducer. Returns whether anything
    /// changed.
    pub async fn apply(&self, delta: Delta) -> bool {
        match delta {
            Delta::EventCreated(event) => {
                info!("Event created: {} ({})", event.id, event.title);
                self.add_event(event).await
            }
            Delta::EventUpdated(event) => {
                info!("Event updated: {} ({})", event.id, event.title);
                self.update_event(event).await
            }
            Delta::EventDeleted(target) => {
                info!("Event deleted: {}", target.id);
                self.delete_event(target.id).await
            }
            Delta::QuestionCreated(question) => {
                debug!("Question created: {}", question.id);
                self.add_question(question).await
            }
            Delta::QuestionUpdated(question) => {
                debug!("Question updated: {}", question.id);
                self.update_question(question).await
            }
            Delta::QuestionDeleted(target) => {
                debug!("Question deleted: {}", target.id);
                self.delete_question(target).await
            }
            Delta::MessageCreated(message) => {
                debug!("Message created: {}", message.id);
                self.add_message(message).await
            }
            Delta::MessageUpdated(message) => {
                debug!("Message updated: {}", message.id);
                self.update_message(message).await
            }
            Delta::MessageDeleted(target) => {
                debug!("Message deleted: {}", target.id);
                self.delete_message(target).await
            }
            Delta::Unknown(message_type) => {
                warn!("Unknown message received: {}", message_type);
                false
            }
        }
    }
}

#[async_trait]
impl EnvelopeHandler for SyncStore {
    fn name(&self) -> &str {
        "store"
    }

    async fn handle(&self, envelope: &Envelope) -> Result<()> {
        let delta = envelope.delta()?;
        self.apply(delta).await;
        Ok(())
    }
}
