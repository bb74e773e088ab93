//! Conversation context tracking.
//!
//! Keeps the references and subject of the last successful turn per
//! conversation so elliptic follow-ups and bare numbers can be resolved.
//! State is bounded: entries expire after a TTL and the least recently
//! updated conversation is evicted once the capacity is reached.

use chrono::{DateTime, Duration, Utc};
use dashmap::DashMap;
use serde::{Deserialize, Serialize};

use crate::config::ContextConfig;
use crate::types::{split_canonical_id, DocumentType};

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ConversationState {
    /// Canonical ids resolved in the last successful turn.
    pub last_doc_refs: Vec<String>,
    pub last_subject: Option<DocumentType>,
    pub updated_at: DateTime<Utc>,
}

impl ConversationState {
    pub fn is_empty(&self) -> bool {
        self.last_doc_refs.is_empty() && self.last_subject.is_none()
    }

    /// Family prefixes of the previously referenced documents.
    pub fn referenced_prefixes(&self) -> Vec<String> {
        let mut prefixes: Vec<String> = Vec::new();
        for id in &self.last_doc_refs {
            if let Some((prefix, _)) = split_canonical_id(id) {
                if !prefixes.iter().any(|p| p == prefix) {
                    prefixes.push(prefix.to_string());
                }
            }
        }
        prefixes
    }
}

/// Ten years; keeps the TTL inside chrono's representable range.
const MAX_TTL_SECS: u64 = 315_360_000;

pub struct ContextTracker {
    states: DashMap<String, ConversationState>,
    max_conversations: usize,
    ttl: Duration,
}

impl ContextTracker {
    pub fn new(config: &ContextConfig) -> Self {
        Self {
            states: DashMap::new(),
            max_conversations: config.max_conversations.max(1),
            ttl: Duration::seconds(config.ttl_secs.min(MAX_TTL_SECS) as i64),
        }
    }

    /// Current state, or `None` when absent or expired. Expired entries are
    /// dropped on read; the expiry is checked again under the entry lock so a
    /// concurrent `record` is never lost.
    pub fn get(&self, conversation_id: &str) -> Option<ConversationState> {
        let state = self.states.get(conversation_id)?.clone();
        if !self.is_expired(&state) {
            return Some(state);
        }
        if self
            .states
            .remove_if(conversation_id, |_, current| self.is_expired(current))
            .is_some()
        {
            tracing::debug!(conversation_id, "Conversation state expired");
        }
        None
    }

    fn is_expired(&self, state: &ConversationState) -> bool {
        Utc::now() - state.updated_at > self.ttl
    }

    /// Record what a successful turn observed. A turn that observed neither
    /// references nor a subject leaves the previous state in place.
    pub fn record(&self, conversation_id: &str, doc_refs: Vec<String>, subject: Option<DocumentType>) {
        if doc_refs.is_empty() && subject.is_none() {
            return;
        }

        let is_new = !self.states.contains_key(conversation_id);
        self.states.insert(
            conversation_id.to_string(),
            ConversationState {
                last_doc_refs: doc_refs,
                last_subject: subject,
                updated_at: Utc::now(),
            },
        );

        if is_new && self.states.len() > self.max_conversations {
            self.evict_oldest(conversation_id);
        }
    }

    pub fn clear(&self, conversation_id: &str) {
        self.states.remove(conversation_id);
    }

    pub fn len(&self) -> usize {
        self.states.len()
    }

    pub fn is_empty(&self) -> bool {
        self.states.is_empty()
    }

    fn evict_oldest(&self, keep: &str) {
        let oldest = self
            .states
            .iter()
            .filter(|entry| entry.key() != keep)
            .min_by_key(|entry| entry.value().updated_at)
            .map(|entry| (entry.key().clone(), entry.value().updated_at));

        // Skip the eviction if that conversation was updated meanwhile.
        if let Some((id, seen)) = oldest {
            if self.states.remove_if(&id, |_, s| s.updated_at == seen).is_some() {
                tracing::debug!(conversation_id = id.as_str(), "Evicted oldest conversation state");
            }
        }
    }
}
