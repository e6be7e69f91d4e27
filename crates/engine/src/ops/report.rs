use std::collections::BTreeMap;

use chrono::{DateTime, Utc};
use sea_orm::{QueryFilter, QueryOrder, prelude::*};
use serde::Serialize;

use crate::{
    DEBT_PAYMENT_PREFIX, Debt, DebtStatus, ItemCategory, Money, ResultEngine, TransactionKind,
    categories::auto_category, debts, transactions,
};

use super::Engine;

#[derive(Clone, Debug, PartialEq, Eq, Serialize)]
pub struct ReportLine<K> {
    pub key: K,
    pub total: Money,
    pub count: usize,
}

/// Expenses in a time window, grouped by derived category and by method,
/// plus the debts recorded in the same window.
///
/// Debt payments are left out of the expense totals; the debt they settle is
/// listed under `debts` instead.
#[derive(Clone, Debug, PartialEq, Eq, Serialize)]
pub struct ExpenseReport {
    pub from: DateTime<Utc>,
    pub to: DateTime<Utc>,
    pub total: Money,
    pub count: usize,
    pub by_category: Vec<ReportLine<ItemCategory>>,
    pub by_method: Vec<ReportLine<String>>,
    pub debts: Vec<Debt>,
    pub unpaid_debt: Money,
    pub paid_debt: Money,
}

fn push_line<K: Ord>(map: &mut BTreeMap<K, (Money, usize)>, key: K, amount: Money) {
    let slot = map.entry(key).or_insert((Money::ZERO, 0));
    slot.0 = slot.0.saturating_add(amount);
    slot.1 += 1;
}

fn into_lines<K>(map: BTreeMap<K, (Money, usize)>) -> Vec<ReportLine<K>> {
    let mut lines: Vec<ReportLine<K>> = map
        .into_iter()
        .map(|(key, (total, count))| ReportLine { key, total, count })
        .collect();
    // Biggest spend first; ties keep key order.
    lines.sort_by(|a, b| b.total.cmp(&a.total));
    lines
}

impl Engine {
    /// Expense summary for `[from, to)`.
    pub async fn expense_report(
        &self,
        external_id: i64,
        from: DateTime<Utc>,
        to: DateTime<Utc>,
    ) -> ResultEngine<ExpenseReport> {
        let mut report = ExpenseReport {
            from,
            to,
            total: Money::ZERO,
            count: 0,
            by_category: Vec::new(),
            by_method: Vec::new(),
            debts: Vec::new(),
            unpaid_debt: Money::ZERO,
            paid_debt: Money::ZERO,
        };
        let Some(user) = self.user_model(&self.database, external_id).await? else {
            return Ok(report);
        };

        let rows = transactions::Entity::find()
            .filter(transactions::Column::UserId.eq(user.id))
            .filter(transactions::Column::Kind.eq(TransactionKind::Expense.as_str()))
            .filter(transactions::Column::OccurredAt.gte(from))
            .filter(transactions::Column::OccurredAt.lt(to))
            .order_by_asc(transactions::Column::OccurredAt)
            .all(&self.database)
            .await?;

        let mut by_category = BTreeMap::new();
        let mut by_method = BTreeMap::new();
        for row in rows {
            if row.description.starts_with(DEBT_PAYMENT_PREFIX) {
                continue;
            }
            let amount = Money::new(row.amount);
            report.total = report.total.saturating_add(amount);
            report.count += 1;
            push_line(&mut by_category, auto_category(&row.description), amount);
            push_line(&mut by_method, row.method, amount);
        }
        report.by_category = into_lines(by_category);
        report.by_method = into_lines(by_method);

        let debt_rows = debts::Entity::find()
            .filter(debts::Column::UserId.eq(user.id))
            .filter(debts::Column::CreatedAt.gte(from))
            .filter(debts::Column::CreatedAt.lt(to))
            .order_by_asc(debts::Column::CreatedAt)
            .order_by_asc(debts::Column::Id)
            .all(&self.database)
            .await?;
        for row in debt_rows {
            let debt = Debt::try_from(row)?;
            match debt.status {
                DebtStatus::Unpaid => {
                    report.unpaid_debt = report.unpaid_debt.saturating_add(debt.amount)
                }
                DebtStatus::Paid => report.paid_debt = report.paid_debt.saturating_add(debt.amount),
            }
            report.debts.push(debt);
        }
        Ok(report)
    }
}
