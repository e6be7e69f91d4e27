//! Ledger engine.
//!
//! Persistent per-user balances keyed by payment method, the transaction
//! journal, the debt register and the inbound mirror reconciliation, all
//! behind one [`Engine`] backed by sea-orm.

pub use balances::{BalanceChange, BalanceSheet, MethodBalance};
pub use catalog::{
    CASH, PaymentCategory, PaymentMethod, builtin_methods, catalog, method_key, methods_in,
    resolve_method,
};
pub use categories::{ItemCategory, auto_category, title_case};
pub use debts::{DEBT_PAYMENT_PREFIX, Debt, DebtStatus, NewDebt};
pub use error::EngineError;
pub use money::Money;
pub use ops::{
    DebtPayment, Engine, EngineBuilder, ExpenseReport, MirrorUpdate, PendingMirror,
    ReconcileOutcome, ReportLine, SkipReason, TransferReceipt, TransferRequest,
};
pub use transactions::{NewTransaction, Transaction, TransactionKind};
pub use users::{MirrorLink, User};

mod balances;
mod catalog;
mod categories;
mod debts;
mod error;
mod locks;
mod money;
mod ops;
mod payment_methods;
mod transactions;
mod users;

type ResultEngine<T> = Result<T, EngineError>;
