//! Pure transition function of the capture conversation.
//!
//! The machine never talks to Telegram or to the database. It consumes
//! [`Event`]s and answers with [`Effect`]s that the handler renders; the
//! extractor call and the finalize routine stay outside.

use chrono::NaiveDate;
use engine::{CASH, Money, PaymentCategory, PaymentMethod, resolve_method};

use crate::extractor::Candidate;

/// Rejections of one field before a default is substituted.
pub const MAX_RETRIES: u8 = 2;
pub const UNKNOWN_MERCHANT: &str = "Unknown";
pub const INCOME_MERCHANT: &str = "Income";

#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum CaptureKind {
    Expense,
    Income,
}

#[derive(Clone, Debug, PartialEq, Eq)]
pub struct LineItem {
    pub description: String,
    pub amount: Money,
    pub merchant: Option<String>,
    pub method: Option<String>,
    /// Purchase day when the user mentioned one.
    pub occurred_on: Option<NaiveDate>,
}

#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum Step {
    AskMerchant,
    AskPayment,
    Confirm,
    /// Confirm was rejected; the edit menu is showing.
    Edit,
    /// Waiting for replacement item text.
    AwaitItems,
}

#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum MenuLevel {
    Main,
    Category(PaymentCategory),
}

#[derive(Clone, Debug, PartialEq, Eq)]
pub enum Button {
    Menu(MenuLevel),
    Method(String),
    Yes,
    No,
    Cancel,
    EditMerchant,
    EditMethod,
    EditItems,
    EditBack,
}

impl Button {
    /// Callback payload; at most 64 bytes with the method name length cap.
    pub fn data(&self) -> String {
        match self {
            Self::Menu(MenuLevel::Main) => "cap:menu".to_string(),
            Self::Menu(MenuLevel::Category(category)) => format!("cap:menu:{}", category.as_str()),
            Self::Method(name) => format!("cap:pay:{name}"),
            Self::Yes => "cap:yes".to_string(),
            Self::No => "cap:no".to_string(),
            Self::Cancel => "cap:cancel".to_string(),
            Self::EditMerchant => "cap:edit:merchant".to_string(),
            Self::EditMethod => "cap:edit:method".to_string(),
            Self::EditItems => "cap:edit:items".to_string(),
            Self::EditBack => "cap:edit:back".to_string(),
        }
    }

    pub fn parse(data: &str) -> Option<Self> {
        let rest = data.strip_prefix("cap:")?;
        Some(match rest {
            "menu" => Self::Menu(MenuLevel::Main),
            "yes" => Self::Yes,
            "no" => Self::No,
            "cancel" => Self::Cancel,
            "edit:merchant" => Self::EditMerchant,
            "edit:method" => Self::EditMethod,
            "edit:items" => Self::EditItems,
            "edit:back" => Self::EditBack,
            other => {
                if let Some(category) = other.strip_prefix("menu:") {
                    Self::Menu(MenuLevel::Category(
                        PaymentCategory::try_from(category).ok()?,
                    ))
                } else if let Some(name) = other.strip_prefix("pay:") {
                    Self::Method(name.to_string())
                } else {
                    return None;
                }
            }
        })
    }
}

#[derive(Clone, Debug, PartialEq, Eq)]
pub enum Event<'a> {
    Text(&'a str),
    Button(Button),
}

#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum Notice {
    MerchantNumeric,
    MerchantDefaulted,
    MethodUnknown,
    MethodDefaulted,
    UseButtons,
}

#[derive(Clone, Debug, PartialEq, Eq)]
pub enum Effect {
    Notice(Notice),
    AskMerchant,
    ShowPaymentMenu(MenuLevel),
    /// Render the summary and arm the auto-finalize timer.
    ShowConfirm,
    /// Render the edit menu; the timer is disarmed.
    ShowEditMenu,
    AskItems,
    /// New item text to run through the extractor, then [`Draft::reparse`].
    Reparse(String),
    Finalize,
    Cancelled,
}

/// Why a capture cannot start.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum Abort {
    NothingFound,
    /// A candidate lacks its description or its amount.
    Incomplete,
}

#[derive(Clone, Debug, PartialEq, Eq)]
pub struct Draft {
    pub kind: CaptureKind,
    pub items: Vec<LineItem>,
    pub step: Step,
    pub merchant_retries: u8,
    pub payment_retries: u8,
    pub menu: MenuLevel,
    /// Photo captures always ask for the method.
    pub force_method_prompt: bool,
}

impl Draft {
    /// Parse step: turn extractor output into a draft and the first prompt.
    pub fn begin(
        kind: CaptureKind,
        candidates: Vec<Candidate>,
        catalog: &[PaymentMethod],
        force_method_prompt: bool,
    ) -> Result<(Draft, Vec<Effect>), Abort> {
        let items = line_items(kind, candidates, catalog)?;
        let mut draft = Draft {
            kind,
            items,
            step: Step::AskMerchant,
            merchant_retries: 0,
            payment_retries: 0,
            menu: MenuLevel::Main,
            force_method_prompt,
        };
        let effects = draft.advance();
        Ok((draft, effects))
    }

    /// Replace the items after "change items". Merchant and method picked
    /// earlier fill the gaps of the new candidates. On abort the draft is
    /// left untouched.
    pub fn reparse(
        &mut self,
        candidates: Vec<Candidate>,
        catalog: &[PaymentMethod],
    ) -> Result<Vec<Effect>, Abort> {
        let mut items = line_items(self.kind, candidates, catalog)?;
        let merchant = self.items.first().and_then(|i| i.merchant.clone());
        let method = self.items.first().and_then(|i| i.method.clone());
        for item in &mut items {
            if item.merchant.is_none() {
                item.merchant = merchant.clone();
            }
            if item.method.is_none() {
                item.method = method.clone();
            }
        }
        self.items = items;
        self.merchant_retries = 0;
        self.payment_retries = 0;
        Ok(self.advance())
    }

    pub fn handle(&mut self, event: Event<'_>, catalog: &[PaymentMethod]) -> Vec<Effect> {
        if matches!(event, Event::Button(Button::Cancel)) {
            return vec![Effect::Cancelled];
        }
        match self.step {
            Step::AskMerchant => match event {
                Event::Text(text) => self.on_merchant(text),
                Event::Button(_) => Vec::new(),
            },
            Step::AskPayment => self.on_payment(event, catalog),
            Step::Confirm => match event {
                Event::Button(Button::Yes) => vec![Effect::Finalize],
                Event::Button(Button::No) => {
                    self.step = Step::Edit;
                    vec![Effect::ShowEditMenu]
                }
                Event::Text(_) => vec![Effect::Notice(Notice::UseButtons)],
                Event::Button(_) => Vec::new(),
            },
            Step::Edit => self.on_edit(event),
            Step::AwaitItems => match event {
                Event::Text(text) if !text.trim().is_empty() => {
                    vec![Effect::Reparse(text.trim().to_string())]
                }
                Event::Text(_) => vec![Effect::AskItems],
                Event::Button(_) => Vec::new(),
            },
        }
    }

    fn on_merchant(&mut self, text: &str) -> Vec<Effect> {
        let merchant = text.split_whitespace().collect::<Vec<_>>().join(" ");
        if merchant.is_empty() || is_numeric(&merchant) {
            self.merchant_retries += 1;
            if self.merchant_retries < MAX_RETRIES {
                return vec![Effect::Notice(Notice::MerchantNumeric), Effect::AskMerchant];
            }
            self.set_merchant(UNKNOWN_MERCHANT);
            let mut effects = vec![Effect::Notice(Notice::MerchantDefaulted)];
            effects.extend(self.advance());
            return effects;
        }
        self.set_merchant(&merchant);
        self.advance()
    }

    fn on_payment(&mut self, event: Event<'_>, catalog: &[PaymentMethod]) -> Vec<Effect> {
        let typed = match event {
            Event::Button(Button::Menu(level)) => {
                self.menu = level;
                return vec![Effect::ShowPaymentMenu(level)];
            }
            Event::Button(Button::Method(name)) => {
                return match resolve_method(catalog, &name) {
                    Some(method) => self.apply_method(&method.name),
                    None => {
                        self.menu = MenuLevel::Main;
                        vec![
                            Effect::Notice(Notice::MethodUnknown),
                            Effect::ShowPaymentMenu(MenuLevel::Main),
                        ]
                    }
                };
            }
            Event::Button(_) => return Vec::new(),
            Event::Text(text) => text,
        };

        if let Some(method) = resolve_method(catalog, typed) {
            return self.apply_method(&method.name);
        }
        self.payment_retries += 1;
        if self.payment_retries < MAX_RETRIES {
            self.menu = MenuLevel::Main;
            return vec![
                Effect::Notice(Notice::MethodUnknown),
                Effect::ShowPaymentMenu(MenuLevel::Main),
            ];
        }
        let mut effects = vec![Effect::Notice(Notice::MethodDefaulted)];
        effects.extend(self.apply_method(CASH));
        effects
    }

    fn on_edit(&mut self, event: Event<'_>) -> Vec<Effect> {
        match event {
            Event::Button(Button::EditMerchant) => {
                self.step = Step::AskMerchant;
                self.merchant_retries = 0;
                vec![Effect::AskMerchant]
            }
            Event::Button(Button::EditMethod) => {
                self.step = Step::AskPayment;
                self.payment_retries = 0;
                self.menu = MenuLevel::Main;
                vec![Effect::ShowPaymentMenu(MenuLevel::Main)]
            }
            Event::Button(Button::EditItems) => {
                self.step = Step::AwaitItems;
                vec![Effect::AskItems]
            }
            Event::Button(Button::EditBack) => {
                self.step = Step::Confirm;
                vec![Effect::ShowConfirm]
            }
            Event::Text(_) => vec![Effect::Notice(Notice::UseButtons)],
            Event::Button(_) => Vec::new(),
        }
    }

    fn set_merchant(&mut self, merchant: &str) {
        for item in &mut self.items {
            item.merchant = Some(merchant.to_string());
        }
        self.merchant_retries = 0;
    }

    fn apply_method(&mut self, method: &str) -> Vec<Effect> {
        for item in &mut self.items {
            item.method = Some(method.to_string());
        }
        self.payment_retries = 0;
        self.force_method_prompt = false;
        self.step = Step::Confirm;
        vec![Effect::ShowConfirm]
    }

    /// Next missing field, or the summary when nothing is missing.
    fn advance(&mut self) -> Vec<Effect> {
        if self.items.iter().any(|i| i.merchant.is_none()) {
            self.step = Step::AskMerchant;
            vec![Effect::AskMerchant]
        } else if self.force_method_prompt || self.items.iter().any(|i| i.method.is_none()) {
            self.step = Step::AskPayment;
            self.menu = MenuLevel::Main;
            vec![Effect::ShowPaymentMenu(MenuLevel::Main)]
        } else {
            self.step = Step::Confirm;
            vec![Effect::ShowConfirm]
        }
    }

    pub fn total(&self) -> Money {
        Money::saturating_sum(self.items.iter().map(|i| i.amount))
    }

    pub fn merchant(&self) -> &str {
        self.items
            .first()
            .and_then(|i| i.merchant.as_deref())
            .unwrap_or("-")
    }

    /// Method of the first item; its balance is shown after saving.
    pub fn primary_method(&self) -> &str {
        self.items
            .first()
            .and_then(|i| i.method.as_deref())
            .unwrap_or(CASH)
    }

    /// Distinct methods in item order.
    pub fn methods(&self) -> Vec<&str> {
        let mut methods: Vec<&str> = Vec::new();
        for method in self.items.iter().filter_map(|i| i.method.as_deref()) {
            if !methods.contains(&method) {
                methods.push(method);
            }
        }
        methods
    }
}

fn line_items(
    kind: CaptureKind,
    candidates: Vec<Candidate>,
    catalog: &[PaymentMethod],
) -> Result<Vec<LineItem>, Abort> {
    if candidates.is_empty() {
        return Err(Abort::NothingFound);
    }
    let mut items = Vec::with_capacity(candidates.len());
    for candidate in candidates {
        let description = candidate
            .description
            .map(|d| d.trim().to_string())
            .filter(|d| !d.is_empty());
        let amount = candidate.amount.filter(|a| a.is_positive());
        let (Some(description), Some(amount)) = (description, amount) else {
            return Err(Abort::Incomplete);
        };

        let merchant = match kind {
            CaptureKind::Income => Some(INCOME_MERCHANT.to_string()),
            CaptureKind::Expense => candidate
                .merchant
                .map(|m| m.trim().to_string())
                .filter(|m| !m.is_empty()),
        };
        // Only catalog methods count; anything else is asked again.
        let method = candidate
            .method
            .as_deref()
            .and_then(|m| resolve_method(catalog, m))
            .map(|m| m.name.clone());

        items.push(LineItem {
            description,
            amount,
            merchant,
            method,
            occurred_on: candidate.date.as_deref().and_then(parse_day),
        });
    }
    Ok(items)
}

fn parse_day(value: &str) -> Option<NaiveDate> {
    let value = value.trim();
    let head = value.get(..10).unwrap_or(value);
    ["%Y-%m-%d", "%d/%m/%Y", "%d-%m-%Y"]
        .iter()
        .find_map(|format| NaiveDate::parse_from_str(head, format).ok())
}

fn is_numeric(text: &str) -> bool {
    text.chars()
        .all(|c| c.is_ascii_digit() || matches!(c, '.' | ',' | ' ' | '-' | '+'))
}
