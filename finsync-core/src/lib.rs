mod client;
pub mod model;
mod summary;

pub use client::{ApiError, ApiErrorClass, FinsyncClient};
pub use model::{
    Budget, BudgetPeriod, EntityKind, Expense, MAX_AMOUNT, Record, SavingsGoal, Transaction,
    TransactionKind, ValidationError,
};
pub use summary::FinanceSummary;
