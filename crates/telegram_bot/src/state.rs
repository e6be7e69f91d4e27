use std::{collections::HashMap, sync::Arc, time::Duration};

use engine::Money;
use teloxide::types::ChatId;
use tokio::{sync::Mutex, time::Instant};

const THROTTLE_PRUNE_THRESHOLD: usize = 1024;

/// Step of a command flow waiting for the next message or button.
#[derive(Clone, Debug, PartialEq, Eq)]
pub(crate) enum PendingAction {
    TransferSource,
    TransferDestination {
        source: String,
    },
    TransferAmount {
        source: String,
        destination: String,
    },
    TransferFee {
        source: String,
        destination: String,
        amount: Money,
    },
    DebtCreditor,
    DebtItem {
        creditor: String,
    },
    DebtMerchant {
        creditor: String,
        description: String,
        amount: Money,
    },
    PayDebtPick,
    PayDebtMethod {
        debt_id: i64,
    },
    SetBalanceMethod,
    SetBalanceAmount {
        method: String,
    },
    AddMethodName,
    AddMethodCategory {
        name: String,
    },
    ResetConfirm,
}

#[derive(Clone, Debug, Default)]
pub(crate) struct Session {
    pub pending: Option<PendingAction>,
}

#[derive(Clone, Default)]
pub(crate) struct SessionStore {
    inner: Arc<Mutex<HashMap<ChatId, Session>>>,
}

impl SessionStore {
    pub(crate) async fn update<F>(&self, chat_id: ChatId, f: F) -> Session
    where
        F: FnOnce(&mut Session),
    {
        let mut guard = self.inner.lock().await;
        let session = guard.entry(chat_id).or_insert_with(Session::default);
        f(session);
        session.clone()
    }

    pub(crate) async fn set_pending(&self, chat_id: ChatId, pending: Option<PendingAction>) {
        self.update(chat_id, |s| s.pending = pending).await;
    }

    /// Take the pending action out, leaving the chat idle.
    pub(crate) async fn take_pending(&self, chat_id: ChatId) -> Option<PendingAction> {
        let mut guard = self.inner.lock().await;
        guard.get_mut(&chat_id).and_then(|s| s.pending.take())
    }
}

#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub(crate) enum Admission {
    Allowed,
    /// Over the limit. `warn` is set for the first refusal of a window only.
    Limited { warn: bool },
}

#[derive(Clone, Copy, Debug)]
struct Window {
    started: Instant,
    warned: bool,
}

/// One update per user per window. A refused update does not extend the
/// window.
#[derive(Clone)]
pub(crate) struct Throttle {
    window: Duration,
    inner: Arc<Mutex<HashMap<i64, Window>>>,
}

impl Throttle {
    pub(crate) fn new(window: Duration) -> Self {
        Self {
            window,
            inner: Arc::default(),
        }
    }

    pub(crate) async fn admit(&self, user: i64) -> Admission {
        let now = Instant::now();
        let mut windows = self.inner.lock().await;
        if windows.len() >= THROTTLE_PRUNE_THRESHOLD {
            windows.retain(|_, w| now.duration_since(w.started) < self.window);
        }
        match windows.get_mut(&user) {
            Some(current) if now.duration_since(current.started) < self.window => {
                let warn = !current.warned;
                current.warned = true;
                Admission::Limited { warn }
            }
            _ => {
                windows.insert(
                    user,
                    Window {
                        started: now,
                        warned: false,
                    },
                );
                Admission::Allowed
            }
        }
    }
}
