use switchboard_core::config::ConsentConfig;
use switchboard_core::domain::conversation::{ConversationState, Role};

use crate::text::contains_phrase;

/// Decides whether the user has allowed access to their live system.
///
/// Consent is only recognized as a reply to a permission request issued
/// earlier in the same conversation, and only from the most recent
/// `lookback_messages` messages. The newest user reply that either refuses
/// or agrees decides; a reply carrying a refusal marker never counts as
/// agreement, so "no, don't do it" is a refusal even though it contains
/// "do it".
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct ConsentGate {
    phrases: Vec<String>,
    refusal_markers: Vec<String>,
    lookback_messages: usize,
}

#[derive(Clone, Copy, Debug, PartialEq, Eq)]
enum Reply {
    Agrees,
    Refuses,
    Neutral,
}

impl Default for ConsentGate {
    fn default() -> Self {
        Self::from_config(&ConsentConfig::default())
    }
}

impl ConsentGate {
    pub fn from_config(config: &ConsentConfig) -> Self {
        Self::new(
            config.phrases.clone(),
            config.refusal_markers.clone(),
            config.lookback_messages,
        )
    }

    pub fn new(
        phrases: Vec<String>,
        refusal_markers: Vec<String>,
        lookback_messages: usize,
    ) -> Self {
        Self {
            phrases: normalize(phrases),
            refusal_markers: normalize(refusal_markers),
            lookback_messages: lookback_messages.max(1),
        }
    }

    pub fn is_affirmative(&self, text: &str) -> bool {
        self.classify(text) == Reply::Agrees
    }

    pub fn is_refusal(&self, text: &str) -> bool {
        self.classify(text) == Reply::Refuses
    }

    fn classify(&self, text: &str) -> Reply {
        let text = text.replace('\u{2019}', "'");
        if self.refusal_markers.iter().any(|marker| contains_phrase(&text, marker)) {
            Reply::Refuses
        } else if self.phrases.iter().any(|phrase| contains_phrase(&text, phrase)) {
            Reply::Agrees
        } else {
            Reply::Neutral
        }
    }

    pub fn check(&self, state: &ConversationState) -> bool {
        if state.consent_granted() {
            return true;
        }
        if !state.consent_requested() {
            return false;
        }
        let messages = state.messages();
        let start = messages.len().saturating_sub(self.lookback_messages);
        messages[start..]
            .iter()
            .rev()
            .filter(|message| message.role == Role::User)
            .map(|message| self.classify(&message.content))
            .find(|reply| *reply != Reply::Neutral)
            == Some(Reply::Agrees)
    }

    pub fn grant(&self, state: &mut ConversationState) {
        if !state.consent_granted() {
            tracing::info!(
                event_name = "agent.consent.granted",
                conversation_id = %state.conversation_id.0,
                "user granted live instance access"
            );
        }
        state.grant_consent();
    }

    pub fn permission_request(&self) -> String {
        "I need your permission to connect to your live instance to check the actual \
         configuration, logs, or data. Would you like me to proceed? Please reply with 'yes' \
         or 'please check' to confirm."
            .to_string()
    }
}

fn normalize(phrases: Vec<String>) -> Vec<String> {
    phrases
        .into_iter()
        .map(|phrase| phrase.trim().to_lowercase())
        .filter(|phrase| !phrase.is_empty())
        .collect()
}
