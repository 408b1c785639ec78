use finsync_core::{
    Budget, BudgetPeriod, EntityKind, Expense, SavingsGoal, Transaction, TransactionKind,
};
use rand::Rng;
use rand::seq::SliceRandom;
use time::{Duration, OffsetDateTime, format_description::well_known::Rfc3339};
use tracing::info;
use uuid::Uuid;

use crate::sync::engine::{EngineError, SyncEngine};
use crate::sync::network::ConnectivityProbe;
use crate::sync::remote::RemoteDataService;
use crate::sync::status::{SyncStatus, SyncStatusUpdate};

const CATEGORIES: &[&str] = &[
    "Groceries",
    "Rent",
    "Transport",
    "Dining",
    "Utilities",
    "Entertainment",
    "Health",
];
const GOALS: &[&str] = &["Emergency fund", "Vacation", "New laptop", "Car", "Wedding"];
const INCOME: &[&str] = &["Salary", "Freelance", "Refund"];

#[derive(Debug, Default, Clone, PartialEq, Eq)]
pub struct SeedReport {
    pub budgets: usize,
    pub expenses: usize,
    pub savings: usize,
    pub transactions: usize,
}

impl SeedReport {
    pub fn total(&self) -> usize {
        self.budgets + self.expenses + self.savings + self.transactions
    }
}

/// Writes `count` random records through the engine, round-robin over the
/// entity kinds, so each lands in the cache and in the pending queue.
pub async fn seed_test_data<R, P, G>(
    engine: &SyncEngine<R, P>,
    count: usize,
    rng: &mut G,
) -> Result<SeedReport, EngineError>
where
    R: RemoteDataService,
    P: ConnectivityProbe,
    G: Rng + Send,
{
    let today = OffsetDateTime::now_utc();
    let mut report = SeedReport::default();
    for index in 0..count {
        match EntityKind::ALL[index % EntityKind::ALL.len()] {
            EntityKind::Budget => {
                engine.save_record(random_budget(rng, today)).await?;
                report.budgets += 1;
            }
            EntityKind::Expense => {
                engine.save_record(random_expense(rng, today)).await?;
                report.expenses += 1;
            }
            EntityKind::Savings => {
                engine.save_record(random_goal(rng, today)).await?;
                report.savings += 1;
            }
            EntityKind::Transaction => {
                engine.save_record(random_transaction(rng, today)).await?;
                report.transactions += 1;
            }
        }
    }
    info!(
        budgets = report.budgets,
        expenses = report.expenses,
        savings = report.savings,
        transactions = report.transactions,
        "seeded test data"
    );
    Ok(report)
}

/// Records a failure in the status without touching the queue.
pub async fn simulate_sync_failure<R, P>(
    engine: &SyncEngine<R, P>,
    message: &str,
) -> Result<SyncStatus, EngineError>
where
    R: RemoteDataService,
    P: ConnectivityProbe,
{
    let failed = engine.status().snapshot().failed_count;
    engine
        .update_sync_status(SyncStatusUpdate {
            is_syncing: Some(false),
            failed_count: Some(failed + 1),
            error: Some(Some(message.to_string())),
            ..Default::default()
        })
        .await
}

fn random_budget<G: Rng>(rng: &mut G, today: OffsetDateTime) -> Budget {
    let amount = money(rng, 100.0, 2_000.0);
    Budget {
        id: Uuid::new_v4().to_string(),
        user_id: None,
        category: pick(rng, CATEGORIES),
        amount,
        spent: money(rng, 0.0, amount),
        period: *[BudgetPeriod::Weekly, BudgetPeriod::Monthly, BudgetPeriod::Yearly]
            .choose(rng)
            .unwrap_or(&BudgetPeriod::Monthly),
        start_date: days_ago(rng, today, 30).date().to_string(),
        created_at: None,
    }
}

fn random_expense<G: Rng>(rng: &mut G, today: OffsetDateTime) -> Expense {
    let category = pick(rng, CATEGORIES);
    Expense {
        id: Uuid::new_v4().to_string(),
        user_id: None,
        description: Some(format!("Test {} expense", category.to_lowercase())),
        category,
        amount: money(rng, 1.0, 250.0),
        date: rfc3339(days_ago(rng, today, 30)),
        budget_id: None,
        created_at: None,
    }
}

fn random_goal<G: Rng>(rng: &mut G, today: OffsetDateTime) -> SavingsGoal {
    let target_amount = money(rng, 500.0, 20_000.0);
    let deadline = today + Duration::days(rng.gen_range(30..=730));
    SavingsGoal {
        id: Uuid::new_v4().to_string(),
        user_id: None,
        title: pick(rng, GOALS),
        target_amount,
        current_amount: money(rng, 0.0, target_amount),
        deadline: Some(deadline.date().to_string()),
        created_at: None,
    }
}

fn random_transaction<G: Rng>(rng: &mut G, today: OffsetDateTime) -> Transaction {
    let (kind, category) = if rng.gen_bool(0.3) {
        (TransactionKind::Income, pick(rng, INCOME))
    } else {
        (TransactionKind::Expense, pick(rng, CATEGORIES))
    };
    Transaction {
        id: Uuid::new_v4().to_string(),
        user_id: None,
        kind,
        category,
        amount: money(rng, 5.0, 3_000.0),
        description: None,
        date: rfc3339(days_ago(rng, today, 60)),
        created_at: None,
    }
}

fn pick<G: Rng>(rng: &mut G, values: &[&str]) -> String {
    values.choose(rng).copied().unwrap_or("Other").to_string()
}

/// Whole cents in `[low, high]`.
fn money<G: Rng>(rng: &mut G, low: f64, high: f64) -> f64 {
    if high <= low {
        return low;
    }
    (rng.gen_range(low..=high) * 100.0).round() / 100.0
}

fn days_ago<G: Rng>(rng: &mut G, today: OffsetDateTime, max: i64) -> OffsetDateTime {
    today - Duration::days(rng.gen_range(0..=max)) - Duration::minutes(rng.gen_range(0..1_440))
}

fn rfc3339(at: OffsetDateTime) -> String {
    at.format(&Rfc3339).unwrap_or_else(|_| at.date().to_string())
}
