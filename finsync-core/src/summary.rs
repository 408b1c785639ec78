use serde::Serialize;

use crate::model::{Budget, Expense, Record, SavingsGoal, Transaction, TransactionKind};

/// Aggregated totals over the cached collections.
///
/// Records that fail validation are skipped, so every total is a sum of
/// finite values bounded by `MAX_AMOUNT`.
#[derive(Debug, Clone, Default, PartialEq, Serialize)]
pub struct FinanceSummary {
    pub total_budgeted: f64,
    pub total_spent: f64,
    pub remaining: f64,
    pub savings_saved: f64,
    pub savings_target: f64,
    pub savings_progress: f64,
    pub income: f64,
    pub outgoing: f64,
    pub net_flow: f64,
    pub skipped_records: usize,
}

impl FinanceSummary {
    pub fn compute(
        budgets: &[Budget],
        expenses: &[Expense],
        goals: &[SavingsGoal],
        transactions: &[Transaction],
    ) -> Self {
        let mut summary = FinanceSummary::default();

        for budget in valid(budgets, &mut summary.skipped_records) {
            summary.total_budgeted += budget.amount;
        }
        for expense in valid(expenses, &mut summary.skipped_records) {
            summary.total_spent += expense.amount;
        }
        for goal in valid(goals, &mut summary.skipped_records) {
            summary.savings_saved += goal.current_amount;
            summary.savings_target += goal.target_amount;
        }
        for tx in valid(transactions, &mut summary.skipped_records) {
            match tx.kind {
                TransactionKind::Income => summary.income += tx.amount,
                TransactionKind::Expense => summary.outgoing += tx.amount,
            }
        }

        summary.remaining = summary.total_budgeted - summary.total_spent;
        summary.net_flow = summary.income - summary.outgoing;
        summary.savings_progress = if summary.savings_target > 0.0 {
            (summary.savings_saved / summary.savings_target).clamp(0.0, 1.0)
        } else {
            0.0
        };
        summary
    }
}

fn valid<'a, T: Record>(records: &'a [T], skipped: &mut usize) -> Vec<&'a T> {
    let mut out = Vec::with_capacity(records.len());
    for record in records {
        if record.validate().is_ok() {
            out.push(record);
        } else {
            *skipped += 1;
        }
    }
    out
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::model::BudgetPeriod;

    fn budget(id: &str, amount: f64) -> Budget {
        Budget {
            id: id.into(),
            user_id: None,
            category: "Food".into(),
            amount,
            spent: 0.0,
            period: BudgetPeriod::Monthly,
            start_date: "2024-01-01".into(),
            created_at: None,
        }
    }

    fn expense(id: &str, amount: f64) -> Expense {
        Expense {
            id: id.into(),
            user_id: None,
            category: "Food".into(),
            amount,
            description: None,
            date: "2024-01-05".into(),
            budget_id: None,
            created_at: None,
        }
    }

    fn goal(id: &str, current: f64, target: f64) -> SavingsGoal {
        SavingsGoal {
            id: id.into(),
            user_id: None,
            title: "Trip".into(),
            target_amount: target,
            current_amount: current,
            deadline: None,
            created_at: None,
        }
    }

    #[test]
    fn totals_and_progress() {
        let tx = Transaction {
            id: "t".into(),
            user_id: None,
            kind: TransactionKind::Income,
            category: "Salary".into(),
            amount: 1000.0,
            description: None,
            date: "2024-01-31".into(),
            created_at: None,
        };
        let summary = FinanceSummary::compute(
            &[budget("a", 300.0), budget("b", 200.0)],
            &[expense("e", 120.0)],
            &[goal("g", 250.0, 1000.0)],
            &[tx],
        );
        assert_eq!(summary.total_budgeted, 500.0);
        assert_eq!(summary.remaining, 380.0);
        assert_eq!(summary.savings_progress, 0.25);
        assert_eq!(summary.net_flow, 1000.0);
        assert_eq!(summary.skipped_records, 0);
    }

    #[test]
    fn corrupted_savings_are_skipped_not_summed() {
        let summary = FinanceSummary::compute(
            &[],
            &[],
            &[goal("ok", 100.0, 200.0), goal("bad", 3.0e12, 200.0)],
            &[],
        );
        assert_eq!(summary.savings_saved, 100.0);
        assert_eq!(summary.savings_target, 200.0);
        assert_eq!(summary.skipped_records, 1);
    }

    #[test]
    fn progress_is_zero_without_targets() {
        let summary = FinanceSummary::compute(&[], &[], &[], &[]);
        assert_eq!(summary.savings_progress, 0.0);
    }
}
