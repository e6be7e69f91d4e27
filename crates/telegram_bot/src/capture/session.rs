//! Live capture conversations and their auto-finalize timers.

use std::{
    collections::HashMap,
    future::Future,
    sync::{Arc, Weak},
    time::Duration,
};

use engine::PaymentMethod;
use teloxide::types::{ChatId, MessageId};
use tokio::{sync::Mutex, task::JoinHandle};

use crate::extractor::Candidate;

use super::{
    guard::{Claim, FinalizeGuard},
    machine::{Abort, Button, Draft, Effect, Event},
};

/// What a button press on a conversation amounts to.
#[derive(Debug, PartialEq, Eq)]
pub enum Press {
    /// The button sits on a message that is not the current menu.
    Stale,
    /// Finalize already claimed the draft.
    Saved,
    Effects(Vec<Effect>),
}

#[derive(Debug)]
struct ConversationState {
    draft: Draft,
    guard: FinalizeGuard,
    /// Message holding the current menu or summary, edited in place.
    surface: Option<MessageId>,
}

/// One capture in progress. Timers only hold a [`Weak`] reference, so a
/// finished or replaced conversation can never be finalized by a late timer.
#[derive(Debug)]
pub struct Conversation {
    pub chat_id: ChatId,
    pub external_id: i64,
    state: Mutex<ConversationState>,
}

impl Conversation {
    pub fn new(chat_id: ChatId, external_id: i64, draft: Draft) -> Arc<Self> {
        Arc::new(Self {
            chat_id,
            external_id,
            state: Mutex::new(ConversationState {
                draft,
                guard: FinalizeGuard::default(),
                surface: None,
            }),
        })
    }

    /// Feed an event to the draft. `None` once finalize has been claimed.
    pub async fn dispatch(
        &self,
        event: Event<'_>,
        catalog: &[PaymentMethod],
    ) -> Option<Vec<Effect>> {
        let mut state = self.state.lock().await;
        if !state.guard.is_open() {
            return None;
        }
        let effects = state.draft.handle(event, catalog);
        if effects
            .iter()
            .any(|e| matches!(e, Effect::ShowEditMenu | Effect::Cancelled))
        {
            state.guard.disarm();
        }
        Some(effects)
    }

    /// Feed a button pressed on `message_id`. Only the current surface
    /// accepts presses.
    pub async fn press(
        &self,
        message_id: MessageId,
        button: Button,
        catalog: &[PaymentMethod],
    ) -> Press {
        if self.state.lock().await.surface != Some(message_id) {
            return Press::Stale;
        }
        match self.dispatch(Event::Button(button), catalog).await {
            Some(effects) => Press::Effects(effects),
            None => Press::Saved,
        }
    }

    pub async fn reparse(
        &self,
        candidates: Vec<Candidate>,
        catalog: &[PaymentMethod],
    ) -> Option<Result<Vec<Effect>, Abort>> {
        let mut state = self.state.lock().await;
        if !state.guard.is_open() {
            return None;
        }
        Some(state.draft.reparse(candidates, catalog))
    }

    pub async fn arm(&self) -> Option<u64> {
        self.state.lock().await.guard.arm()
    }

    pub async fn disarm(&self) {
        self.state.lock().await.guard.disarm();
    }

    /// Win the right to finalize; returns the draft to write.
    pub async fn claim(&self, claim: Claim) -> Option<Draft> {
        let mut state = self.state.lock().await;
        state
            .guard
            .try_claim(claim)
            .then(|| state.draft.clone())
    }

    pub async fn finish(&self) {
        self.state.lock().await.guard.finish();
    }

    pub async fn draft(&self) -> Draft {
        self.state.lock().await.draft.clone()
    }

    pub async fn surface(&self) -> Option<MessageId> {
        self.state.lock().await.surface
    }

    pub async fn set_surface(&self, message_id: Option<MessageId>) {
        self.state.lock().await.surface = message_id;
    }
}

/// Active conversation per chat.
#[derive(Clone, Debug, Default)]
pub struct Conversations {
    inner: Arc<Mutex<HashMap<ChatId, Arc<Conversation>>>>,
}

impl Conversations {
    pub async fn get(&self, chat_id: ChatId) -> Option<Arc<Conversation>> {
        self.inner.lock().await.get(&chat_id).cloned()
    }

    /// Start a conversation, replacing (and thereby abandoning) any other one
    /// of the chat.
    pub async fn insert(&self, conversation: Arc<Conversation>) -> Option<Arc<Conversation>> {
        self.inner
            .lock()
            .await
            .insert(conversation.chat_id, conversation)
    }

    pub async fn remove(&self, chat_id: ChatId) -> Option<Arc<Conversation>> {
        self.inner.lock().await.remove(&chat_id)
    }

    /// Drop `conversation` unless a newer one already took its chat.
    pub async fn remove_if_same(&self, conversation: &Arc<Conversation>) {
        let mut map = self.inner.lock().await;
        if map
            .get(&conversation.chat_id)
            .is_some_and(|current| Arc::ptr_eq(current, conversation))
        {
            map.remove(&conversation.chat_id);
        }
    }
}

/// Arm an auto-finalize timer for `generation`.
///
/// After `delay` the timer claims the guard; `on_fire` runs only if the
/// claim succeeds, i.e. no user action or re-arm happened in between.
pub fn schedule_auto_finalize<F, Fut>(
    conversation: &Arc<Conversation>,
    generation: u64,
    delay: Duration,
    on_fire: F,
) -> JoinHandle<()>
where
    F: FnOnce(Arc<Conversation>, Draft) -> Fut + Send + 'static,
    Fut: Future<Output = ()> + Send + 'static,
{
    let weak: Weak<Conversation> = Arc::downgrade(conversation);
    tokio::spawn(async move {
        tokio::time::sleep(delay).await;
        let Some(conversation) = weak.upgrade() else {
            return;
        };
        let Some(draft) = conversation.claim(Claim::Timer(generation)).await else {
            tracing::debug!(chat_id = %conversation.chat_id, generation, "stale auto-finalize timer");
            return;
        };
        tracing::info!(chat_id = %conversation.chat_id, "auto-finalizing capture");
        on_fire(conversation, draft).await;
    })
}
