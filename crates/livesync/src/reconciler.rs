use crate::types::{
    ChatMessage, ChildRef, EventId, LiveEvent, Question, UserId, rank_questions,
};
use crate::vote::reconcile_vote;
use std::collections::HashSet;
use tracing::{debug, trace};

/// In-memory document of everything the client has synchronised
///
/// Holds the unscoped list of events plus at most one loaded event, whose
/// question and message collections receive scoped mutations. All methods
/// are pure reducers: no IO, no clock, applied in arrival order. The
/// `bool` they return says whether the document changed.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct EventStore {
    events: Vec<LiveEvent>,
    current: Option<LiveEvent>,
}

impl EventStore {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn events(&self) -> &[LiveEvent] {
        &self.events
    }

    /// The currently loaded event, if any.
    pub fn event(&self) -> Option<&LiveEvent> {
        self.current.as_ref()
    }

    pub fn questions(&self) -> &[Question] {
        self.current
            .as_ref()
            .map(|e| e.questions.as_slice())
            .unwrap_or_default()
    }

    pub fn messages(&self) -> &[ChatMessage] {
        self.current
            .as_ref()
            .map(|e| e.messages.as_slice())
            .unwrap_or_default()
    }

    pub fn is_loaded(&self, event_id: EventId) -> bool {
        self.current.as_ref().is_some_and(|e| e.id == event_id)
    }

    /*
        Events
    */

    pub fn set_events(&mut self, events: Vec<LiveEvent>) {
        self.events = dedup_by_id(events, |e| e.id);
    }

    pub fn add_event(&mut self, event: LiveEvent) -> bool {
        if self.events.iter().any(|e| e.id == event.id) {
            debug!("Ignoring replayed create for event {}", event.id);
            return false;
        }
        self.events.push(event);
        true
    }

    /// Load `event` as the current event, ranking its questions.
    pub fn set_event(&mut self, event: Option<LiveEvent>) {
        self.current = event.map(|mut event| {
            event.questions = dedup_by_id(std::mem::take(&mut event.questions), |q| q.id);
            event.messages = dedup_by_id(std::mem::take(&mut event.messages), |m| m.id);
            rank_questions(&mut event.questions);
            event
        });
    }

    /// Replace an event by id.
    ///
    /// When it is the loaded event the replacement inherits the loaded
    /// questions and messages; event metadata echoes never carry them.
    pub fn update_event(&mut self, mut event: LiveEvent) -> bool {
        let mut changed = false;

        if let Some(current) = self.current.as_mut() {
            if current.id == event.id {
                event.questions = std::mem::take(&mut current.questions);
                event.messages = std::mem::take(&mut current.messages);
                *current = event.clone();
                changed = true;
            }
        }

        if let Some(slot) = self.events.iter_mut().find(|e| e.id == event.id) {
            *slot = event;
            changed = true;
        }

        changed
    }

    /// Remove an event from the list. A loaded event stays loaded.
    pub fn delete_event(&mut self, id: EventId) -> bool {
        match self.events.iter().position(|e| e.id == id) {
            Some(idx) => {
                self.events.remove(idx);
                true
            }
            None => false,
        }
    }

    /*
        Questions
    */

    pub fn set_questions(&mut self, questions: Vec<Question>) {
        if let Some(current) = self.current.as_mut() {
            let event_id = current.id;
            let mut questions: Vec<_> = dedup_by_id(questions, |q| q.id)
                .into_iter()
                .filter(|q| q.event_id == event_id)
                .collect();
            rank_questions(&mut questions);
            current.questions = questions;
        }
    }

    pub fn add_question(&mut self, question: Question) -> bool {
        let Some(event) = self.loaded_mut(question.event_id) else {
            return false;
        };
        if event.questions.iter().any(|q| q.id == question.id) {
            debug!("Ignoring replayed create for question {}", question.id);
            return false;
        }

        event.questions.push(question);
        rank_questions(&mut event.questions);
        true
    }

    /// Replace a question by id, protecting the viewer's vote first.
    ///
    /// The vote policy only runs when `current_user` is known.
    pub fn update_question(&mut self, mut question: Question, current_user: Option<&UserId>) -> bool {
        let Some(event) = self.loaded_mut(question.event_id) else {
            return false;
        };
        let Some(idx) = event.questions.iter().position(|q| q.id == question.id) else {
            return false;
        };

        if let Some(user) = current_user {
            let outcome = reconcile_vote(&event.questions[idx].stats, &mut question.stats, user);
            trace!("Vote policy for question {}: {:?}", question.id, outcome);
        }

        event.questions[idx] = question;
        rank_questions(&mut event.questions);
        true
    }

    pub fn delete_question(&mut self, target: ChildRef) -> bool {
        let Some(event) = self.loaded_mut(target.event_id) else {
            return false;
        };
        match event.questions.iter().position(|q| q.id == target.id) {
            Some(idx) => {
                event.questions.remove(idx);
                true
            }
            None => false,
        }
    }

    /*
        Messages
    */

    pub fn set_messages(&mut self, messages: Vec<ChatMessage>) {
        if let Some(current) = self.current.as_mut() {
            let event_id = current.id;
            current.messages = dedup_by_id(messages, |m| m.id)
                .into_iter()
                .filter(|m| m.event_id == event_id)
                .collect();
        }
    }

    pub fn add_message(&mut self, message: ChatMessage) -> bool {
        let Some(event) = self.loaded_mut(message.event_id) else {
            return false;
        };
        if event.messages.iter().any(|m| m.id == message.id) {
            debug!("Ignoring replayed create for message {}", message.id);
            return false;
        }
        event.messages.push(message);
        true
    }

    pub fn update_message(&mut self, message: ChatMessage) -> bool {
        let Some(event) = self.loaded_mut(message.event_id) else {
            return false;
        };
        match event.messages.iter_mut().find(|m| m.id == message.id) {
            Some(slot) => {
                *slot = message;
                true
            }
            None => false,
        }
    }

    pub fn delete_message(&mut self, target: ChildRef) -> bool {
        let Some(event) = self.loaded_mut(target.event_id) else {
            return false;
        };
        match event.messages.iter().position(|m| m.id == target.id) {
            Some(idx) => {
                event.messages.remove(idx);
                true
            }
            None => false,
        }
    }

    /// The loaded event, but only if it is `event_id`.
    fn loaded_mut(&mut self, event_id: EventId) -> Option<&mut LiveEvent> {
        match self.current.as_mut() {
            Some(event) if event.id == event_id => Some(event),
            _ => {
                trace!("Skipping mutation for event {} (not loaded)", event_id);
                None
            }
        }
    }
}

/// Keep the first occurrence of every id, preserving order.
fn dedup_by_id<T>(items: Vec<T>, id: impl Fn(&T) -> u64) -> Vec<T> {
    let mut seen = HashSet::with_capacity(items.len());
    items.into_iter().filter(|item| seen.insert(id(item))).collect()
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::types::{QuestionStats, is_ranked};

    fn loaded_store() -> EventStore {
        let mut store = EventStore::new();
        store.set_events(vec![
            LiveEvent::new(1, "keynote", "Keynote"),
            LiveEvent::new(2, "panel", "Panel"),
        ]);
        let mut event = LiveEvent::new(1, "keynote", "Keynote");
        event.questions = vec![
            Question::new(10, 1, "first", 1),
            Question::new(11, 1, "second", 5),
        ];
        event.messages = vec![ChatMessage::new(100, 1, "ann", "hi")];
        store.set_event(Some(event));
        store
    }

    fn ids(store: &EventStore) -> Vec<u64> {
        store.questions().iter().map(|q| q.id).collect()
    }

    #[test]
    fn test_set_event_ranks_questions() {
        let store = loaded_store();
        assert_eq!(ids(&store), vec![11, 10]);
    }

    #[test]
    fn test_mutations_for_other_events_are_ignored() {
        let mut store = loaded_store();
        let before = store.clone();

        assert!(!store.add_question(Question::new(12, 2, "elsewhere", 3)));
        assert!(!store.update_question(Question::new(10, 2, "elsewhere", 9), None));
        assert!(!store.delete_question(ChildRef { id: 10, event_id: 2 }));
        assert!(!store.add_message(ChatMessage::new(101, 2, "bob", "yo")));
        assert!(!store.update_message(ChatMessage::new(100, 2, "bob", "yo")));
        assert!(!store.delete_message(ChildRef { id: 100, event_id: 2 }));

        assert_eq!(store, before);
    }

    #[test]
    fn test_nothing_loaded_ignores_scoped_mutations() {
        let mut store = EventStore::new();
        assert!(!store.add_question(Question::new(1, 1, "q", 0)));
        store.set_questions(vec![Question::new(1, 1, "q", 0)]);
        assert!(store.questions().is_empty());
        assert_eq!(store, EventStore::new());
    }

    #[test]
    fn test_add_question_reranks() {
        let mut store = loaded_store();
        assert!(store.add_question(Question::new(12, 1, "third", 3)));
        assert_eq!(ids(&store), vec![11, 12, 10]);
    }

    #[test]
    fn test_replayed_create_is_ignored() {
        let mut store = loaded_store();
        assert!(!store.add_question(Question::new(10, 1, "again", 50)));
        assert!(!store.add_event(LiveEvent::new(2, "panel", "Panel again")));
        assert!(!store.add_message(ChatMessage::new(100, 1, "ann", "hi again")));
        assert_eq!(store.questions().len(), 2);
        assert_eq!(store.events().len(), 2);
        assert_eq!(store.messages()[0].text, "hi");
    }

    #[test]
    fn test_update_question_reranks() {
        let mut store = loaded_store();
        assert!(store.update_question(Question::new(10, 1, "first", 9), None));
        assert_eq!(ids(&store), vec![10, 11]);
        assert!(is_ranked(store.questions()));
    }

    #[test]
    fn test_update_unknown_question_is_noop() {
        let mut store = loaded_store();
        let before = store.clone();
        assert!(!store.update_question(Question::new(99, 1, "ghost", 9), None));
        assert_eq!(store, before);
    }

    #[test]
    fn test_update_question_preserves_vote() {
        let mut store = loaded_store();
        let user = UserId::from("A");
        let mut mine = Question::new(10, 1, "first", 2);
        mine.stats.vote_requester = Some(user.clone());
        mine.stats.user_vote = 1;
        assert!(store.update_question(mine, None));

        let mut broadcast = Question::new(10, 1, "first", 9);
        broadcast.stats.vote_requester = Some(UserId::from("B"));
        assert!(store.update_question(broadcast, Some(&user)));

        let q = store.questions().iter().find(|q| q.id == 10).unwrap();
        assert_eq!(
            q.stats,
            QuestionStats {
                score: 9,
                vote_requester: Some(user),
                user_vote: 1,
            }
        );
    }

    #[test]
    fn test_update_without_user_replaces_stats() {
        let mut store = loaded_store();
        let mut q = Question::new(10, 1, "first", 2);
        q.stats.user_vote = 1;
        q.stats.vote_requester = Some(UserId::from("A"));
        store.update_question(q.clone(), None);

        let mut broadcast = Question::new(10, 1, "first", 3);
        broadcast.stats.vote_requester = Some(UserId::from("B"));
        store.update_question(broadcast.clone(), None);

        let stored = store.questions().iter().find(|q| q.id == 10).unwrap();
        assert_eq!(stored, &broadcast);
    }

    #[test]
    fn test_update_event_inherits_collections() {
        let mut store = loaded_store();
        let echo = LiveEvent::new(1, "keynote", "Keynote (moved)");

        assert!(store.update_event(echo));

        let current = store.event().unwrap();
        assert_eq!(current.title, "Keynote (moved)");
        assert_eq!(current.questions.len(), 2);
        assert_eq!(current.messages.len(), 1);
        assert_eq!(store.events()[0].title, "Keynote (moved)");
        assert_eq!(store.events()[0].questions.len(), 2);
    }

    #[test]
    fn test_update_other_event_leaves_current_alone() {
        let mut store = loaded_store();
        assert!(store.update_event(LiveEvent::new(2, "panel", "Panel (full)")));
        assert_eq!(store.event().unwrap().title, "Keynote");
        assert_eq!(store.events()[1].title, "Panel (full)");
        assert!(!store.update_event(LiveEvent::new(7, "x", "x")));
    }

    #[test]
    fn test_delete_event_keeps_current_loaded() {
        let mut store = loaded_store();
        assert!(store.delete_event(1));
        assert!(!store.delete_event(1));
        assert_eq!(store.events().len(), 1);
        assert!(store.is_loaded(1));
    }

    #[test]
    fn test_delete_question_and_message() {
        let mut store = loaded_store();
        assert!(store.delete_question(ChildRef { id: 10, event_id: 1 }));
        assert!(!store.delete_question(ChildRef { id: 10, event_id: 1 }));
        assert!(store.delete_message(ChildRef { id: 100, event_id: 1 }));
        assert!(store.messages().is_empty());
        assert_eq!(ids(&store), vec![11]);
    }

    #[test]
    fn test_messages_keep_arrival_order() {
        let mut store = loaded_store();
        store.add_message(ChatMessage::new(90, 1, "cy", "late but low id"));
        store.add_message(ChatMessage::new(120, 1, "di", "last"));
        let order: Vec<_> = store.messages().iter().map(|m| m.id).collect();
        assert_eq!(order, vec![100, 90, 120]);

        assert!(store.update_message(ChatMessage::new(90, 1, "cy", "edited")));
        assert_eq!(store.messages()[1].text, "edited");
    }

    #[test]
    fn test_bulk_loads_dedup_by_id() {
        let mut store = loaded_store();
        store.set_questions(vec![
            Question::new(1, 1, "a", 0),
            Question::new(2, 1, "b", 4),
            Question::new(1, 1, "dup", 9),
        ]);
        assert_eq!(ids(&store), vec![2, 1]);
        assert_eq!(store.questions()[1].text, "a");

        store.set_events(vec![LiveEvent::new(3, "a", "a"), LiveEvent::new(3, "b", "b")]);
        assert_eq!(store.events().len(), 1);
    }
}
