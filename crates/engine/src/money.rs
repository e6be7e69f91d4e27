use std::{
    fmt,
    iter::Sum,
    ops::{Add, AddAssign, Neg, Sub, SubAssign},
    str::FromStr,
};

use serde::{Deserialize, Serialize};

use crate::EngineError;

/// Signed money amount represented as **whole currency units** (Rupiah).
///
/// The ledger never deals with fractional units: every balance, transaction
/// and debt amount is an integer number of units.
///
/// # Examples
///
/// ```rust
/// use engine::Money;
///
/// let amount = Money::new(15_000);
/// assert_eq!(amount.units(), 15_000);
/// assert_eq!(amount.to_string(), "Rp 15.000");
/// ```
///
/// Parsing from user input accepts thousands separators and the usual
/// shorthand suffixes:
///
/// ```rust
/// use engine::Money;
///
/// assert_eq!("15.000".parse::<Money>().unwrap().units(), 15_000);
/// assert_eq!("15k".parse::<Money>().unwrap().units(), 15_000);
/// assert_eq!("1,5jt".parse::<Money>().unwrap().units(), 1_500_000);
/// assert!("1.2345k".parse::<Money>().is_err());
/// ```
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(transparent)]
#[repr(transparent)]
pub struct Money(i64);

impl Money {
    pub const ZERO: Money = Money(0);

    /// Creates a new amount from whole units.
    #[must_use]
    pub const fn new(units: i64) -> Self {
        Self(units)
    }

    /// Returns the raw value in whole units.
    #[must_use]
    pub const fn units(self) -> i64 {
        self.0
    }

    #[must_use]
    pub const fn is_zero(self) -> bool {
        self.0 == 0
    }

    #[must_use]
    pub const fn is_positive(self) -> bool {
        self.0 > 0
    }

    #[must_use]
    pub const fn is_negative(self) -> bool {
        self.0 < 0
    }

    /// Checked addition (returns `None` on overflow).
    #[must_use]
    pub fn checked_add(self, rhs: Money) -> Option<Money> {
        self.0.checked_add(rhs.0).map(Money)
    }

    /// Checked subtraction (returns `None` on overflow).
    #[must_use]
    pub fn checked_sub(self, rhs: Money) -> Option<Money> {
        self.0.checked_sub(rhs.0).map(Money)
    }

    #[must_use]
    pub fn saturating_add(self, rhs: Money) -> Money {
        Money(self.0.saturating_add(rhs.0))
    }

    /// Sum of `amounts`, `None` if any partial sum overflows.
    pub fn checked_sum<I: IntoIterator<Item = Money>>(amounts: I) -> Option<Money> {
        amounts.into_iter().try_fold(Money::ZERO, Money::checked_add)
    }

    /// Sum of `amounts`, clamped at the bounds. Only for display totals.
    pub fn saturating_sum<I: IntoIterator<Item = Money>>(amounts: I) -> Money {
        amounts.into_iter().fold(Money::ZERO, Money::saturating_add)
    }
}

impl fmt::Display for Money {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let sign = if self.0 < 0 { "-" } else { "" };
        let digits = self.0.unsigned_abs().to_string();

        let mut grouped = String::with_capacity(digits.len() + digits.len() / 3);
        for (idx, ch) in digits.chars().enumerate() {
            if idx > 0 && (digits.len() - idx) % 3 == 0 {
                grouped.push('.');
            }
            grouped.push(ch);
        }
        write!(f, "{sign}Rp {grouped}")
    }
}

impl From<i64> for Money {
    fn from(value: i64) -> Self {
        Self(value)
    }
}

impl From<Money> for i64 {
    fn from(value: Money) -> Self {
        value.0
    }
}

impl Add for Money {
    type Output = Money;

    fn add(self, rhs: Money) -> Self::Output {
        Money(self.0 + rhs.0)
    }
}

impl AddAssign for Money {
    fn add_assign(&mut self, rhs: Money) {
        self.0 += rhs.0;
    }
}

impl Sub for Money {
    type Output = Money;

    fn sub(self, rhs: Money) -> Self::Output {
        Money(self.0 - rhs.0)
    }
}

impl SubAssign for Money {
    fn sub_assign(&mut self, rhs: Money) {
        self.0 -= rhs.0;
    }
}

impl Neg for Money {
    type Output = Money;

    fn neg(self) -> Self::Output {
        Money(-self.0)
    }
}

impl Sum for Money {
    fn sum<I: Iterator<Item = Money>>(iter: I) -> Self {
        iter.fold(Money::ZERO, Add::add)
    }
}

/// A decimal literal read from user input, kept as `mantissa / 10^scale`.
struct Decimal {
    mantissa: i128,
    scale: u32,
}

impl Decimal {
    fn times(&self, multiplier: i128) -> Option<i128> {
        let scaled = self.mantissa.checked_mul(multiplier)?;
        let divisor = 10i128.checked_pow(self.scale)?;
        (scaled % divisor == 0).then_some(scaled / divisor)
    }
}

fn parse_decimal(raw: &str) -> Option<Decimal> {
    let normalized = raw.replace(',', ".");
    let mut parts = normalized.split('.');
    let whole = parts.next()?;
    let frac = parts.next().unwrap_or("");
    if parts.next().is_some() || whole.is_empty() {
        return None;
    }
    if !whole.chars().all(|c| c.is_ascii_digit()) || !frac.chars().all(|c| c.is_ascii_digit()) {
        return None;
    }
    let digits = format!("{whole}{frac}");
    Some(Decimal {
        mantissa: digits.parse().ok()?,
        scale: u32::try_from(frac.len()).ok()?,
    })
}

fn suffix_multiplier(suffix: &str) -> Option<(i128, bool)> {
    // (multiplier, flushes the running buffer)
    match suffix {
        "" => Some((1, false)),
        "ratus" | "rat" => Some((100, false)),
        "k" | "kb" | "rb" | "ribu" => Some((1_000, true)),
        "jt" | "juta" | "m" | "mn" => Some((1_000_000, true)),
        _ => None,
    }
}

impl FromStr for Money {
    type Err = EngineError;

    /// Parses a non-negative amount typed by a user.
    ///
    /// Without a suffix, `.` is a thousands separator (`15.000`) and a `,`
    /// fraction is only accepted when it is zero. With suffixes the literal may
    /// carry decimals (`1,5jt`) and chunks add up (`2jt 500rb`), but the result
    /// must still be a whole number of units.
    fn from_str(s: &str) -> Result<Self, Self::Err> {
        let invalid = || EngineError::InvalidAmount(format!("invalid amount: {}", s.trim()));
        let overflow = || EngineError::InvalidAmount("amount too large".to_string());

        let lowered = s.trim().to_lowercase();
        let cleaned = lowered
            .strip_prefix("rp")
            .map(|rest| rest.trim_start_matches('.'))
            .unwrap_or(&lowered)
            .trim();
        if cleaned.is_empty() {
            return Err(EngineError::InvalidAmount("empty amount".to_string()));
        }

        let has_suffix = cleaned.chars().any(|c| c.is_ascii_alphabetic());
        if !has_suffix {
            let mut parts = cleaned.split(',');
            let whole = parts.next().unwrap_or("").replace('.', "");
            let frac = parts.next().unwrap_or("");
            if parts.next().is_some()
                || whole.is_empty()
                || !whole.chars().all(|c| c.is_ascii_digit())
                || !frac.chars().all(|c| c == '0')
            {
                return Err(invalid());
            }
            return whole.parse::<i64>().map(Money).map_err(|_| overflow());
        }

        let mut total: i128 = 0;
        let mut buffer: i128 = 0;
        let mut chars = cleaned.chars().peekable();
        while chars.peek().is_some() {
            while chars.next_if(|c| c.is_whitespace()).is_some() {}
            let mut number = String::new();
            while let Some(c) = chars.next_if(|c| c.is_ascii_digit() || *c == '.' || *c == ',') {
                number.push(c);
            }
            while chars.next_if(|c| c.is_whitespace()).is_some() {}
            let mut suffix = String::new();
            while let Some(c) = chars.next_if(|c| c.is_ascii_alphabetic()) {
                suffix.push(c);
            }
            if number.is_empty() {
                if suffix.is_empty() && chars.peek().is_none() {
                    break;
                }
                return Err(invalid());
            }

            let value = parse_decimal(&number).ok_or_else(invalid)?;
            let (multiplier, flush) = suffix_multiplier(&suffix).ok_or_else(invalid)?;
            let units = value.times(multiplier).ok_or_else(invalid)?;
            if flush {
                let carried = buffer.checked_mul(multiplier).ok_or_else(overflow)?;
                total = total
                    .checked_add(carried)
                    .and_then(|t| t.checked_add(units))
                    .ok_or_else(overflow)?;
                buffer = 0;
            } else {
                buffer = buffer.checked_add(units).ok_or_else(overflow)?;
            }
        }
        total = total.checked_add(buffer).ok_or_else(overflow)?;

        i64::try_from(total).map(Money).map_err(|_| overflow())
    }
}
