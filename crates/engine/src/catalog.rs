//! Payment catalog: fixed built-in methods merged with the user's custom ones.
//!
//! The catalog is computed, never stored: `catalog(custom)` is a pure function
//! with a deterministic display order.

use std::cmp::Ordering;

use serde::{Deserialize, Serialize};
use unicode_normalization::{UnicodeNormalization, char::is_combining_mark};

use crate::{EngineError, ResultEngine};

pub const MAX_METHOD_NAME_LEN: usize = 32;

#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
pub enum PaymentCategory {
    Cash,
    Bank,
    #[serde(rename = "E-Wallet")]
    EWallet,
    Other,
}

impl PaymentCategory {
    pub fn as_str(self) -> &'static str {
        match self {
            Self::Cash => "Cash",
            Self::Bank => "Bank",
            Self::EWallet => "E-Wallet",
            Self::Other => "Other",
        }
    }

    /// Categories a user may pick for a custom method.
    pub fn custom_choices() -> [PaymentCategory; 3] {
        [Self::Bank, Self::EWallet, Self::Other]
    }
}

impl TryFrom<&str> for PaymentCategory {
    type Error = EngineError;

    fn try_from(value: &str) -> Result<Self, Self::Error> {
        match value {
            "Cash" => Ok(Self::Cash),
            "Bank" => Ok(Self::Bank),
            "E-Wallet" => Ok(Self::EWallet),
            "Other" => Ok(Self::Other),
            other => Err(EngineError::InvalidInput(format!(
                "invalid payment category: {other}"
            ))),
        }
    }
}

#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct PaymentMethod {
    pub name: String,
    pub category: PaymentCategory,
    pub builtin: bool,
}

impl PaymentMethod {
    fn builtin(name: &str, category: PaymentCategory) -> Self {
        Self {
            name: name.to_string(),
            category,
            builtin: true,
        }
    }

    pub fn custom(name: &str, category: PaymentCategory) -> Self {
        Self {
            name: name.to_string(),
            category,
            builtin: false,
        }
    }
}

pub const CASH: &str = "Cash";

const BUILTIN: &[(&str, PaymentCategory)] = &[
    (CASH, PaymentCategory::Cash),
    ("BCA", PaymentCategory::Bank),
    ("BNI", PaymentCategory::Bank),
    ("BRI", PaymentCategory::Bank),
    ("Blu", PaymentCategory::Bank),
    ("GoPay", PaymentCategory::EWallet),
    ("OVO", PaymentCategory::EWallet),
    ("DANA", PaymentCategory::EWallet),
    ("ShopeePay", PaymentCategory::EWallet),
];

const BANK_PRIORITY: &[&str] = &["BCA", "BNI", "BRI", "Blu"];
const WALLET_PRIORITY: &[&str] = &["ShopeePay", "DANA", "OVO", "GoPay"];

/// The fixed set of methods every user has.
pub fn builtin_methods() -> Vec<PaymentMethod> {
    BUILTIN
        .iter()
        .map(|(name, category)| PaymentMethod::builtin(name, *category))
        .collect()
}

fn priority(method: &PaymentMethod) -> usize {
    let list = match method.category {
        PaymentCategory::Bank => BANK_PRIORITY,
        PaymentCategory::EWallet => WALLET_PRIORITY,
        PaymentCategory::Cash | PaymentCategory::Other => &[],
    };
    list.iter()
        .position(|name| *name == method.name)
        .unwrap_or(list.len())
}

fn display_order(a: &PaymentMethod, b: &PaymentMethod) -> Ordering {
    a.category
        .cmp(&b.category)
        .then_with(|| priority(a).cmp(&priority(b)))
        .then_with(|| a.name.to_lowercase().cmp(&b.name.to_lowercase()))
        .then_with(|| a.name.cmp(&b.name))
}

/// Merge built-ins with `custom` and sort for display.
///
/// Custom entries colliding with a built-in (same normalized name) are
/// dropped; built-ins always win.
pub fn catalog(custom: impl IntoIterator<Item = PaymentMethod>) -> Vec<PaymentMethod> {
    let mut methods = builtin_methods();
    for method in custom {
        let key = method_key(&method.name);
        if key.is_empty() || methods.iter().any(|m| method_key(&m.name) == key) {
            continue;
        }
        methods.push(method);
    }
    methods.sort_by(display_order);
    methods
}

/// Methods of one category, in display order.
pub fn methods_in(catalog: &[PaymentMethod], category: PaymentCategory) -> Vec<&PaymentMethod> {
    catalog.iter().filter(|m| m.category == category).collect()
}

/// Case-insensitive lookup returning the canonical catalog entry.
pub fn resolve_method<'a>(catalog: &'a [PaymentMethod], input: &str) -> Option<&'a PaymentMethod> {
    let key = method_key(input);
    if key.is_empty() {
        return None;
    }
    catalog.iter().find(|m| method_key(&m.name) == key)
}

/// Comparison key: NFKD folded, accents stripped, lowercase, single spaces.
pub fn method_key(input: &str) -> String {
    let mut out = String::new();
    let mut prev_space = false;
    for ch in input.trim().nfkd() {
        if is_combining_mark(ch) {
            continue;
        }
        if ch.is_whitespace() {
            if !out.is_empty() && !prev_space {
                out.push(' ');
                prev_space = true;
            }
            continue;
        }
        for lower in ch.to_lowercase() {
            out.push(lower);
        }
        prev_space = false;
    }
    out.trim_end().to_string()
}

/// Clean up a user supplied method name for storage and display.
pub(crate) fn normalize_method_name(input: &str) -> ResultEngine<String> {
    let display = input.split_whitespace().collect::<Vec<_>>().join(" ");
    if display.is_empty() {
        return Err(EngineError::InvalidInput(
            "payment method name must not be empty".to_string(),
        ));
    }
    if display.chars().count() > MAX_METHOD_NAME_LEN {
        return Err(EngineError::InvalidInput(format!(
            "payment method name must be at most {MAX_METHOD_NAME_LEN} characters"
        )));
    }
    Ok(display)
}
