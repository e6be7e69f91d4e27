//! Expense and income capture: turning one message into confirmed journal
//! entries.

pub mod finalize;
pub mod guard;
pub mod machine;
pub mod session;

pub use finalize::{FinalizeDeps, Receipt, finalize};
pub use guard::{Claim, FinalizeGuard};
pub use machine::{
    Abort, Button, CaptureKind, Draft, Effect, Event, LineItem, MenuLevel, Notice, Step,
};
pub use session::{Conversation, Conversations, Press, schedule_auto_finalize};
