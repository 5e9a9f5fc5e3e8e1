//! Conversation State Machine.
//!
//! Owns the ordered message list and reassembles streamed assistant
//! fragments into exactly one open message per turn. Every mutation is
//! reported back as [`Effects`] so a renderer can react to explicit
//! append/update notifications instead of diffing the whole list.

use tracing::{debug, info, warn};

use crate::config::ClientConfig;
use crate::errors::ChatError;
use crate::models::{Message, MessageId, MessageRole, MessageStatus};
use crate::protocol::{ChatEvent, ClientFrame};

const LABEL_SEPARATOR: &str = ":";
const MAX_LABEL_CHARS: usize = 32;
const SENTENCE_TERMINATORS: [&str; 3] = [". ", ".\n", "\n"];

/// Phase of the current assistant turn.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub enum TurnPhase {
    #[default]
    Idle,
    AwaitingFirstFragment,
    Streaming,
    Completed,
    Failed,
}

/// Scroll metrics of the message list, used for the near-bottom check.
#[derive(Debug, Clone, Copy, Default, PartialEq)]
pub struct Viewport {
    pub scroll_top: f64,
    pub scroll_height: f64,
    pub client_height: f64,
}

impl Viewport {
    pub fn distance_from_bottom(&self) -> f64 {
        (self.scroll_height - self.scroll_top - self.client_height).max(0.0)
    }

    pub fn is_near_bottom(&self, threshold_px: f64) -> bool {
        self.distance_from_bottom() < threshold_px
    }
}

/// Notification about one mutation of the message list.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Change {
    Appended(MessageId),
    Updated(MessageId),
    Cleared,
}

/// UI side effects produced by one state transition.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct Effects {
    pub changes: Vec<Change>,
    pub scroll_to_bottom: bool,
}

impl Effects {
    fn none() -> Self {
        Self::default()
    }

    fn changed(change: Change, scroll_to_bottom: bool) -> Self {
        Self { changes: vec![change], scroll_to_bottom }
    }

    pub fn is_empty(&self) -> bool {
        self.changes.is_empty() && !self.scroll_to_bottom
    }
}

/// Result of accepting a user submission.
#[derive(Debug, Clone, PartialEq)]
pub struct Submitted {
    pub frame: ClientFrame,
    pub effects: Effects,
}

/// Ordered, append-only list of messages. Identifiers keep increasing
/// across [`clear`](Conversation::clear) so they never repeat in a session.
#[derive(Debug, Clone, Default)]
pub struct Conversation {
    messages: Vec<Message>,
    next_id: u64,
}

impl Conversation {
    pub fn messages(&self) -> &[Message] {
        &self.messages
    }

    pub fn len(&self) -> usize {
        self.messages.len()
    }

    pub fn is_empty(&self) -> bool {
        self.messages.is_empty()
    }

    pub fn get(&self, id: MessageId) -> Option<&Message> {
        self.messages.iter().rev().find(|m| m.id == id)
    }

    fn get_mut(&mut self, id: MessageId) -> Option<&mut Message> {
        self.messages.iter_mut().rev().find(|m| m.id == id)
    }

    fn push(&mut self, role: MessageRole, content: String, status: MessageStatus) -> MessageId {
        self.next_id += 1;
        let id = MessageId(self.next_id);
        self.messages.push(Message::new(id, role, content, status));
        id
    }

    fn clear(&mut self) {
        self.messages.clear();
    }
}

/// Knobs for turn reassembly, usually derived from [`ClientConfig`].
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct TurnSettings {
    pub turn_end_heuristic: bool,
    pub scroll_threshold_px: f64,
}

impl Default for TurnSettings {
    fn default() -> Self {
        Self { turn_end_heuristic: true, scroll_threshold_px: 100.0 }
    }
}

impl From<&ClientConfig> for TurnSettings {
    fn from(config: &ClientConfig) -> Self {
        Self {
            turn_end_heuristic: config.turn_end_heuristic,
            scroll_threshold_px: config.scroll_threshold_px,
        }
    }
}

#[derive(Debug, Clone, Default)]
pub struct ConversationMachine {
    conversation: Conversation,
    phase: TurnPhase,
    open: Option<MessageId>,
    /// Possible speaker label held back while awaiting the first fragment.
    pending_label: Option<String>,
    label_resolved: bool,
    /// Whether the service named the speaker of the open reply.
    announced: bool,
    /// Fallback speaker for new replies, from the service's character list.
    assistant_name: Option<String>,
    /// Set when the punctuation heuristic closed a turn before the service's
    /// empty chunk; everything up to that terminator belongs to the old reply.
    draining: bool,
    notice: Option<String>,
    settings: TurnSettings,
}

impl ConversationMachine {
    pub fn new(settings: TurnSettings) -> Self {
        Self { settings, ..Self::default() }
    }

    pub fn phase(&self) -> TurnPhase {
        self.phase
    }

    /// `true` while a turn is waiting for or receiving fragments.
    pub fn is_loading(&self) -> bool {
        matches!(self.phase(), TurnPhase::AwaitingFirstFragment | TurnPhase::Streaming)
    }

    pub fn messages(&self) -> &[Message] {
        self.conversation.messages()
    }

    pub fn conversation(&self) -> &Conversation {
        &self.conversation
    }

    pub fn open_message(&self) -> Option<&Message> {
        self.open.and_then(|id| self.conversation.get(id))
    }

    /// Latest control notice from the service (greeting, toggle ack).
    pub fn notice(&self) -> Option<&str> {
        self.notice.as_deref()
    }

    pub fn settings(&self) -> TurnSettings {
        self.settings
    }

    pub fn assistant_name(&self) -> Option<&str> {
        self.assistant_name.as_deref()
    }

    /// Names the assistant on replies that never announce a speaker.
    pub fn set_assistant_name(&mut self, name: impl Into<String>) {
        self.assistant_name = Some(name.into());
    }

    /// `true` while the tail of an early-finished reply is still arriving.
    pub fn draining_previous_reply(&self) -> bool {
        self.draining
    }

    /// Starts a turn for `text`. Rejected without touching the conversation
    /// while a turn is in flight or when the text is blank.
    pub fn submit(&mut self, text: &str) -> Result<Submitted, ChatError> {
        if self.is_loading() {
            return Err(ChatError::TurnInProgress);
        }
        let text = text.trim();
        if text.is_empty() {
            return Err(ChatError::EmptyMessage);
        }

        let user = self.conversation.push(MessageRole::User, text.to_string(), MessageStatus::Complete);
        let assistant = self.conversation.push(MessageRole::Assistant, String::new(), MessageStatus::Open);
        if let Some(message) = self.conversation.get_mut(assistant) {
            message.speaker = self.assistant_name.clone();
        }
        self.open = Some(assistant);
        self.pending_label = None;
        self.label_resolved = false;
        self.announced = false;
        self.set_phase(TurnPhase::AwaitingFirstFragment);

        Ok(Submitted {
            frame: ClientFrame::message(text),
            effects: Effects {
                changes: vec![Change::Appended(user), Change::Appended(assistant)],
                scroll_to_bottom: true,
            },
        })
    }

    /// Applies one inbound event.
    pub fn apply(&mut self, event: ChatEvent, viewport: &Viewport) -> Effects {
        match event {
            ChatEvent::Chunk { text, .. } if self.draining => {
                if text.is_empty() {
                    debug!("Previous reply reached its terminator");
                    self.draining = false;
                } else {
                    debug!("Dropping trailing fragment of a finished reply: {text:?}");
                }
                Effects::none()
            }
            ChatEvent::Chunk { text, character } => self.on_chunk(&text, character, viewport),
            ChatEvent::Error { message } if self.draining => {
                warn!("Service failed after the reply was shown: {message}");
                self.draining = false;
                Effects::none()
            }
            ChatEvent::Error { message } => {
                let follow = viewport.is_near_bottom(self.settings.scroll_threshold_px);
                self.fail(format!("Error: {message}"), follow)
            }
            ChatEvent::Control { notice } => {
                if let Some(notice) = notice {
                    info!("Service notice: {notice}");
                    self.notice = Some(notice);
                }
                Effects::none()
            }
            ChatEvent::Connected => {
                self.draining = false;
                Effects::none()
            }
            ChatEvent::Disconnected { reason, .. } => {
                self.draining = false;
                if !self.is_loading() {
                    return Effects::none();
                }
                let follow = viewport.is_near_bottom(self.settings.scroll_threshold_px);
                self.fail(format!("Connection lost: {reason}"), follow)
            }
        }
    }

    /// Fails the in-flight turn because its request never left the client.
    pub fn abort_turn(&mut self, reason: &ChatError) -> Effects {
        if !self.is_loading() {
            return Effects::none();
        }
        self.fail(format!("Error: {reason}"), true)
    }

    /// Empties the conversation after the service confirmed a context clear.
    pub fn clear(&mut self) -> Effects {
        self.conversation.clear();
        self.open = None;
        self.pending_label = None;
        self.label_resolved = false;
        self.set_phase(TurnPhase::Idle);
        Effects::changed(Change::Cleared, false)
    }

    fn on_chunk(&mut self, text: &str, character: Option<String>, viewport: &Viewport) -> Effects {
        let Some(id) = self.open.filter(|_| self.is_loading()) else {
            if !text.is_empty() {
                debug!("Dropping fragment for a closed turn: {text:?}");
            }
            return Effects::none();
        };
        let follow = viewport.is_near_bottom(self.settings.scroll_threshold_px);

        let mut effects = Effects::none();
        if let Some(name) = character.filter(|_| !self.announced) {
            self.announced = true;
            if let Some(message) = self.conversation.get_mut(id) {
                if message.speaker.as_deref() != Some(name.as_str()) {
                    message.speaker = Some(name);
                    effects.changes.push(Change::Updated(id));
                }
            }
        }

        if text.is_empty() {
            return self.complete(follow);
        }

        let content = if self.phase() == TurnPhase::AwaitingFirstFragment {
            match self.absorb_label(text) {
                Some(content) => content,
                None => return effects,
            }
        } else {
            text.to_string()
        };

        let Some(message) = self.conversation.get_mut(id) else {
            return effects;
        };
        if message.content.is_empty() && content.trim().is_empty() {
            return effects;
        }
        push_normalized(&mut message.content, &content);
        self.set_phase(TurnPhase::Streaming);

        if self.settings.turn_end_heuristic && ends_sentence(text) {
            self.draining = true;
            return self.complete(follow);
        }

        if !effects.changes.contains(&Change::Updated(id)) {
            effects.changes.push(Change::Updated(id));
        }
        effects.scroll_to_bottom = follow;
        effects
    }

    /// Label capture while awaiting the first fragment. Returns the text to
    /// append, or `None` when the fragment was absorbed.
    fn absorb_label(&mut self, text: &str) -> Option<String> {
        match self.pending_label.take() {
            Some(label) if is_separator(text) => {
                self.label_resolved = true;
                self.set_speaker(label);
                None
            }
            Some(label) => {
                self.label_resolved = true;
                Some(format!("{label}{text}"))
            }
            None if self.label_resolved => Some(text.to_string()),
            None => {
                if let Some(label) = fused_label(text) {
                    self.label_resolved = true;
                    self.set_speaker(label.to_string());
                    return None;
                }
                if is_label_candidate(text) {
                    self.pending_label = Some(text.to_string());
                    return None;
                }
                self.label_resolved = true;
                Some(text.to_string())
            }
        }
    }

    fn set_speaker(&mut self, label: String) {
        if self.announced {
            return;
        }
        self.announced = true;
        if let Some(message) = self.open.and_then(|id| self.conversation.get_mut(id)) {
            message.speaker = Some(label);
        }
    }

    fn complete(&mut self, follow: bool) -> Effects {
        let Some(id) = self.open.take() else {
            return Effects::none();
        };
        let leftover = self.pending_label.take();
        if let Some(message) = self.conversation.get_mut(id) {
            if let Some(label) = leftover {
                push_normalized(&mut message.content, &label);
            }
            message.content = message.content.trim().to_string();
            message.status = MessageStatus::Complete;
        }
        self.set_phase(TurnPhase::Completed);
        debug!(%id, "Turn completed");
        Effects::changed(Change::Updated(id), follow)
    }

    fn fail(&mut self, notice: String, follow: bool) -> Effects {
        let mut effects = Effects { changes: Vec::new(), scroll_to_bottom: follow };
        let leftover = self.pending_label.take();

        let reused = match self.open.take().and_then(|id| self.conversation.get_mut(id)) {
            Some(message) => {
                if let Some(label) = leftover {
                    push_normalized(&mut message.content, &label);
                }
                message.content = message.content.trim().to_string();
                message.status = MessageStatus::Failed;
                effects.changes.push(Change::Updated(message.id));
                if message.content.is_empty() {
                    message.content = notice.clone();
                    true
                } else {
                    false
                }
            }
            None => false,
        };

        if !reused {
            let id = self.conversation.push(MessageRole::Assistant, notice, MessageStatus::Failed);
            effects.changes.push(Change::Appended(id));
        }
        self.set_phase(TurnPhase::Failed);
        effects
    }

    fn set_phase(&mut self, phase: TurnPhase) {
        if self.phase != phase {
            debug!(from = ?self.phase, to = ?phase, "Turn phase changed");
            self.phase = phase;
        }
    }
}

/// Collapses runs of `*` or `_` into a single marker.
pub fn normalize_emphasis(text: &str) -> String {
    let mut out = String::with_capacity(text.len());
    push_normalized(&mut out, text);
    out
}

/// Appends `fragment` to `buffer`, collapsing emphasis runs across the
/// boundary and dropping leading whitespace of an empty buffer.
fn push_normalized(buffer: &mut String, fragment: &str) {
    let fragment = if buffer.is_empty() { fragment.trim_start() } else { fragment };
    for c in fragment.chars() {
        if matches!(c, '*' | '_') && buffer.ends_with(c) {
            continue;
        }
        buffer.push(c);
    }
}

fn ends_sentence(fragment: &str) -> bool {
    SENTENCE_TERMINATORS.iter().any(|t| fragment.ends_with(t))
}

fn is_separator(fragment: &str) -> bool {
    fragment.trim() == LABEL_SEPARATOR
}

fn is_label_candidate(fragment: &str) -> bool {
    !fragment.is_empty()
        && fragment.chars().count() <= MAX_LABEL_CHARS
        && fragment.chars().all(|c| c.is_alphanumeric() || c == '_' || c == '-')
}

/// `"Rhea:"` (optionally followed by whitespace) is a label and separator in
/// one fragment.
fn fused_label(fragment: &str) -> Option<&str> {
    let head = fragment.trim_end().strip_suffix(LABEL_SEPARATOR)?;
    is_label_candidate(head).then_some(head)
}

#[cfg(test)]
mod tests {
    use super::*;

    fn at_bottom() -> Viewport {
        Viewport { scroll_top: 900.0, scroll_height: 1000.0, client_height: 100.0 }
    }

    fn scrolled_up() -> Viewport {
        Viewport { scroll_top: 0.0, scroll_height: 1000.0, client_height: 100.0 }
    }

    fn feed(machine: &mut ConversationMachine, chunks: &[&str]) -> Vec<Effects> {
        chunks.iter().map(|c| machine.apply(ChatEvent::chunk(*c), &at_bottom())).collect()
    }

    fn contents(machine: &ConversationMachine) -> Vec<(MessageRole, &str)> {
        machine.messages().iter().map(|m| (m.role, m.content.as_str())).collect()
    }

    #[test]
    fn submit_opens_a_turn() {
        let mut machine = ConversationMachine::default();
        let submitted = machine.submit("  hi ").unwrap();

        assert_eq!(submitted.frame, ClientFrame::message("hi"));
        assert!(submitted.effects.scroll_to_bottom);
        assert_eq!(submitted.effects.changes.len(), 2);
        assert_eq!(machine.phase(), TurnPhase::AwaitingFirstFragment);
        assert!(machine.is_loading());
        assert_eq!(contents(&machine), vec![(MessageRole::User, "hi"), (MessageRole::Assistant, "")]);
        assert!(machine.open_message().unwrap().is_open());
    }

    #[test]
    fn labelled_stream_completes_on_sentence_end() {
        let mut machine = ConversationMachine::default();
        machine.submit("hi").unwrap();
        feed(&mut machine, &["Assistant", ":", "Hello", " there.\n"]);

        assert_eq!(
            contents(&machine),
            vec![(MessageRole::User, "hi"), (MessageRole::Assistant, "Hello there.")]
        );
        assert!(!machine.is_loading());
        assert_eq!(machine.phase(), TurnPhase::Completed);
        let reply = &machine.messages()[1];
        assert_eq!(reply.status, MessageStatus::Complete);
        assert_eq!(reply.speaker.as_deref(), Some("Assistant"));
    }

    #[test]
    fn label_and_separator_are_absorbed_without_changes() {
        let mut machine = ConversationMachine::default();
        machine.submit("hi").unwrap();
        let effects = feed(&mut machine, &["Assistant", ":"]);
        assert!(effects.iter().all(Effects::is_empty));
        assert_eq!(machine.phase(), TurnPhase::AwaitingFirstFragment);

        feed(&mut machine, &["Hello"]);
        assert_eq!(machine.phase(), TurnPhase::Streaming);
        assert_eq!(machine.open_message().unwrap().content, "Hello");
    }

    #[test]
    fn unlabelled_first_fragment_is_never_lost() {
        let mut machine = ConversationMachine::default();
        machine.submit("hi").unwrap();
        feed(&mut machine, &["Hello", " world", ""]);
        assert_eq!(machine.messages()[1].content, "Hello world");
        assert_eq!(machine.messages()[1].speaker, None);
    }

    #[test]
    fn lone_label_candidate_is_flushed_on_end() {
        let mut machine = ConversationMachine::default();
        machine.submit("hi").unwrap();
        feed(&mut machine, &["Okay", ""]);
        assert_eq!(machine.messages()[1].content, "Okay");
        assert_eq!(machine.phase(), TurnPhase::Completed);
    }

    #[test]
    fn fused_label_is_dropped() {
        let mut machine = ConversationMachine::default();
        machine.submit("hi").unwrap();
        feed(&mut machine, &["Rhea:\n", "Good", " evening", ""]);
        assert_eq!(machine.messages()[1].content, "Good evening");
        assert_eq!(machine.messages()[1].display_name(), "Rhea");
    }

    #[test]
    fn label_logic_stops_after_streaming_starts() {
        let mut machine = ConversationMachine::default();
        machine.submit("hi").unwrap();
        feed(&mut machine, &["Well", ",", " Assistant", ":", " yes", ""]);
        assert_eq!(machine.messages()[1].content, "Well, Assistant: yes");
    }

    #[test]
    fn whitespace_before_content_does_not_end_the_turn() {
        let mut machine = ConversationMachine::default();
        machine.submit("hi").unwrap();
        feed(&mut machine, &["Rhea", ":", "\n", "Hi", "!", ""]);
        assert_eq!(machine.messages()[1].content, "Hi!");
    }

    #[test]
    fn character_field_sets_speaker() {
        let mut machine = ConversationMachine::default();
        machine.submit("hi").unwrap();
        let event = ChatEvent::Chunk { text: "Hello there friend".into(), character: Some("Rhea".into()) };
        machine.apply(event, &at_bottom());
        assert_eq!(machine.open_message().unwrap().speaker.as_deref(), Some("Rhea"));
    }

    #[test]
    fn known_assistant_name_is_a_fallback_speaker() {
        let mut machine = ConversationMachine::default();
        machine.set_assistant_name("Rhea");
        machine.submit("hi").unwrap();
        assert_eq!(machine.open_message().unwrap().display_name(), "Rhea");
        feed(&mut machine, &["Plain", " text", ""]);
        assert_eq!(machine.messages()[1].display_name(), "Rhea");

        machine.submit("again").unwrap();
        feed(&mut machine, &["Nyx", ":", "Hello", ""]);
        assert_eq!(machine.messages()[3].display_name(), "Nyx");
        assert_eq!(machine.messages()[3].content, "Hello");
    }

    #[test]
    fn fragments_concatenate_in_order_after_normalisation() {
        let sequences: Vec<Vec<&str>> = vec![
            vec!["The ", "quick ", "brown ", "fox"],
            vec!["A **bold", "** claim", " and __under", "__ line"],
            vec!["split *", "*", "* markers"],
            vec!["unicode é ", "ü ", "漢字 ", "🙂"],
            vec!["x y", "", "never appended"],
        ];
        for fragments in sequences {
            let mut machine = ConversationMachine::new(TurnSettings {
                turn_end_heuristic: false,
                ..TurnSettings::default()
            });
            machine.submit("go").unwrap();
            feed(&mut machine, &fragments);
            feed(&mut machine, &[""]);

            let before_end: String = fragments.iter().take_while(|f| !f.is_empty()).copied().collect();
            let expected = normalize_emphasis(&before_end).trim().to_string();
            assert_eq!(machine.messages()[1].content, expected, "fragments: {fragments:?}");
        }
    }

    #[test]
    fn emphasis_runs_collapse() {
        assert_eq!(normalize_emphasis("**bold** and __em__"), "*bold* and _em_");
        assert_eq!(normalize_emphasis("***x***"), "*x*");
        assert_eq!(normalize_emphasis("a_b"), "a_b");
    }

    #[test]
    fn heuristic_can_be_disabled() {
        let mut machine = ConversationMachine::new(TurnSettings {
            turn_end_heuristic: false,
            ..TurnSettings::default()
        });
        machine.submit("hi").unwrap();
        feed(&mut machine, &["First line.\n", "Second line.\n"]);
        assert!(machine.is_loading());
        feed(&mut machine, &[""]);
        assert_eq!(machine.messages()[1].content, "First line.\nSecond line.");
    }

    #[test]
    fn error_after_submit_replaces_empty_reply() {
        let mut machine = ConversationMachine::default();
        machine.submit("hi").unwrap();
        machine.apply(ChatEvent::error("rate limited"), &at_bottom());

        assert_eq!(machine.messages().len(), 2);
        let reply = &machine.messages()[1];
        assert!(reply.content.contains("rate limited"));
        assert_eq!(reply.status, MessageStatus::Failed);
        assert!(!machine.is_loading());
        assert_eq!(machine.phase(), TurnPhase::Failed);
    }

    #[test]
    fn error_while_streaming_keeps_partial_and_blocks_late_fragments() {
        let mut machine = ConversationMachine::default();
        machine.submit("hi").unwrap();
        feed(&mut machine, &["Partial answer"]);
        let effects = machine.apply(ChatEvent::error("model crashed"), &at_bottom());
        assert_eq!(effects.changes.len(), 2);

        let late = feed(&mut machine, &[" that arrives late"]);
        assert!(late[0].is_empty());
        assert_eq!(machine.messages().len(), 3);
        assert_eq!(machine.messages()[1].content, "Partial answer");
        assert_eq!(machine.messages()[1].status, MessageStatus::Failed);
        assert!(machine.messages()[2].content.contains("model crashed"));
        assert!(!machine.is_loading());
    }

    #[test]
    fn disconnect_fails_in_flight_turn_only() {
        let mut machine = ConversationMachine::default();
        let idle = machine.apply(
            ChatEvent::Disconnected { reason: "reset".into(), will_retry: true },
            &at_bottom(),
        );
        assert!(idle.is_empty());
        assert!(machine.messages().is_empty());

        machine.submit("hi").unwrap();
        machine.apply(ChatEvent::Disconnected { reason: "reset".into(), will_retry: true }, &at_bottom());
        assert_eq!(machine.phase(), TurnPhase::Failed);
        assert!(machine.messages()[1].content.contains("Connection lost"));
    }

    #[test]
    fn submit_while_loading_is_rejected_without_changes() {
        let mut machine = ConversationMachine::default();
        machine.submit("first").unwrap();
        let before = machine.messages().to_vec();

        let err = machine.submit("second").unwrap_err();
        assert!(matches!(err, ChatError::TurnInProgress));
        assert_eq!(machine.messages(), before.as_slice());

        feed(&mut machine, &["Done here", ""]);
        assert!(machine.submit("second").is_ok());
        assert_eq!(machine.messages().len(), 4);
    }

    #[test]
    fn blank_submit_is_rejected() {
        let mut machine = ConversationMachine::default();
        assert!(matches!(machine.submit("   ").unwrap_err(), ChatError::EmptyMessage));
        assert_eq!(machine.phase(), TurnPhase::Idle);
    }

    #[test]
    fn abort_turn_marks_failure() {
        let mut machine = ConversationMachine::default();
        machine.submit("hi").unwrap();
        let effects = machine.abort_turn(&ChatError::NotConnected);
        assert!(effects.scroll_to_bottom);
        assert_eq!(machine.messages()[1].content, "Error: Not connected to the assistant");
        assert!(machine.abort_turn(&ChatError::NotConnected).is_empty());
    }

    #[test]
    fn scroll_only_follows_when_near_bottom() {
        let mut machine = ConversationMachine::default();
        machine.submit("hi").unwrap();
        let followed = machine.apply(ChatEvent::chunk("Hello there"), &at_bottom());
        assert!(followed.scroll_to_bottom);
        let kept = machine.apply(ChatEvent::chunk(" friend"), &scrolled_up());
        assert!(!kept.scroll_to_bottom);
        assert_eq!(kept.changes, vec![Change::Updated(machine.messages()[1].id)]);
    }

    #[test]
    fn viewport_distance() {
        assert!(Viewport::default().is_near_bottom(100.0));
        assert_eq!(scrolled_up().distance_from_bottom(), 900.0);
        assert!(!scrolled_up().is_near_bottom(100.0));
    }

    #[test]
    fn control_notice_is_recorded_but_not_a_message() {
        let mut machine = ConversationMachine::default();
        machine.apply(ChatEvent::Control { notice: Some("Fast mode enabled".into()) }, &at_bottom());
        assert_eq!(machine.notice(), Some("Fast mode enabled"));
        assert!(machine.messages().is_empty());
    }

    #[test]
    fn clear_empties_and_ids_keep_increasing() {
        let mut machine = ConversationMachine::default();
        machine.submit("hi").unwrap();
        feed(&mut machine, &["Hello there.\n"]);
        let last_id = machine.messages()[1].id;

        let effects = machine.clear();
        assert_eq!(effects.changes, vec![Change::Cleared]);
        assert!(machine.messages().is_empty());
        assert_eq!(machine.phase(), TurnPhase::Idle);

        machine.submit("again").unwrap();
        assert!(machine.messages()[0].id > last_id);
    }

    #[test]
    fn terminator_of_an_early_finished_reply_does_not_close_the_next_turn() {
        let mut machine = ConversationMachine::default();
        machine.submit("first").unwrap();
        feed(&mut machine, &["Hello there.\n"]);
        assert!(!machine.is_loading());
        assert!(machine.draining_previous_reply());

        machine.submit("second").unwrap();
        let stale = feed(&mut machine, &[""]);
        assert!(stale[0].is_empty());
        assert_eq!(machine.phase(), TurnPhase::AwaitingFirstFragment);
        assert!(!machine.draining_previous_reply());

        feed(&mut machine, &["Second", " reply", ""]);
        assert_eq!(
            contents(&machine),
            vec![
                (MessageRole::User, "first"),
                (MessageRole::Assistant, "Hello there."),
                (MessageRole::User, "second"),
                (MessageRole::Assistant, "Second reply"),
            ]
        );
        assert_eq!(machine.messages()[3].status, MessageStatus::Complete);
    }

    #[test]
    fn trailing_text_of_an_early_finished_reply_stays_out_of_the_next_turn() {
        let mut machine = ConversationMachine::default();
        machine.submit("first").unwrap();
        feed(&mut machine, &["Line one\n"]);
        machine.submit("second").unwrap();
        feed(&mut machine, &["Line two of first", ""]);
        assert_eq!(machine.open_message().unwrap().content, "");
        assert!(machine.is_loading());

        feed(&mut machine, &["Answer", " two", ""]);
        assert_eq!(machine.messages()[1].content, "Line one");
        assert_eq!(machine.messages()[3].content, "Answer two");
    }

    #[test]
    fn error_ending_a_drained_reply_leaves_the_next_turn_alone() {
        let mut machine = ConversationMachine::default();
        machine.submit("first").unwrap();
        feed(&mut machine, &["Done.\n"]);
        machine.submit("second").unwrap();

        let effects = machine.apply(ChatEvent::error("stream broke"), &at_bottom());
        assert!(effects.is_empty());
        assert_eq!(machine.phase(), TurnPhase::AwaitingFirstFragment);

        feed(&mut machine, &["Fine", " now", ""]);
        assert_eq!(machine.messages()[3].content, "Fine now");
    }

    #[test]
    fn reconnect_forgets_an_unfinished_drain() {
        let mut machine = ConversationMachine::default();
        machine.submit("first").unwrap();
        feed(&mut machine, &["Done.\n"]);
        machine.apply(ChatEvent::Disconnected { reason: "reset".into(), will_retry: true }, &at_bottom());
        machine.apply(ChatEvent::Connected, &at_bottom());
        assert!(!machine.draining_previous_reply());

        machine.submit("second").unwrap();
        feed(&mut machine, &["Fresh", " start", ""]);
        assert_eq!(machine.messages()[3].content, "Fresh start");
    }

    #[test]
    fn late_fragments_after_completion_are_dropped() {
        let mut machine = ConversationMachine::default();
        machine.submit("hi").unwrap();
        feed(&mut machine, &["All done.\n", "extra", ""]);
        assert_eq!(machine.messages()[1].content, "All done.");
        assert_eq!(machine.phase(), TurnPhase::Completed);
    }
}
