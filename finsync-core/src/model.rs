use serde::de::DeserializeOwned;
use serde::{Deserialize, Serialize};
use thiserror::Error;
use time::format_description::well_known::Rfc3339;
use time::macros::format_description;
use time::{Date, OffsetDateTime};

/// Upper bound for any single monetary amount.
pub const MAX_AMOUNT: f64 = 1_000_000_000.0;

#[derive(Debug, Error, Clone, PartialEq)]
pub enum ValidationError {
    #[error("record id is empty")]
    EmptyId,
    #[error("{field} must not be empty")]
    EmptyField { field: &'static str },
    #[error("{field} must be a finite number, got {value}")]
    NotFinite { field: &'static str, value: f64 },
    #[error("{field} must not be negative, got {value}")]
    Negative { field: &'static str, value: f64 },
    #[error("{field} exceeds the maximum of {max}, got {value}", max = MAX_AMOUNT)]
    TooLarge { field: &'static str, value: f64 },
    #[error("{field} is not an ISO-8601 date: {value}")]
    InvalidDate { field: &'static str, value: String },
    #[error("unknown entity kind: {0}")]
    UnknownEntity(String),
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum EntityKind {
    Budget,
    Expense,
    Savings,
    Transaction,
}

impl EntityKind {
    pub const ALL: [EntityKind; 4] = [
        EntityKind::Budget,
        EntityKind::Expense,
        EntityKind::Savings,
        EntityKind::Transaction,
    ];

    pub fn as_str(&self) -> &'static str {
        match self {
            EntityKind::Budget => "budget",
            EntityKind::Expense => "expense",
            EntityKind::Savings => "savings",
            EntityKind::Transaction => "transaction",
        }
    }

    pub fn parse(value: &str) -> Result<Self, ValidationError> {
        match value {
            "budget" => Ok(EntityKind::Budget),
            "expense" => Ok(EntityKind::Expense),
            "savings" => Ok(EntityKind::Savings),
            "transaction" => Ok(EntityKind::Transaction),
            other => Err(ValidationError::UnknownEntity(other.to_string())),
        }
    }

    /// Remote table backing this entity.
    pub fn table(&self) -> &'static str {
        match self {
            EntityKind::Budget => "budgets",
            EntityKind::Expense => "expenses",
            EntityKind::Savings => "savings_goals",
            EntityKind::Transaction => "transactions",
        }
    }

    /// Local store key holding the cached collection.
    pub fn collection_key(&self) -> &'static str {
        match self {
            EntityKind::Budget => "offline_budgets",
            EntityKind::Expense => "offline_expenses",
            EntityKind::Savings => "offline_savings_goals",
            EntityKind::Transaction => "offline_transactions",
        }
    }
}

/// A cached financial record with a stable id and a validation boundary.
pub trait Record: Serialize + DeserializeOwned + Clone + Send + Sync + 'static {
    const KIND: EntityKind;

    fn id(&self) -> &str;

    fn validate(&self) -> Result<(), ValidationError>;
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, Default)]
#[serde(rename_all = "lowercase")]
pub enum BudgetPeriod {
    Weekly,
    #[default]
    Monthly,
    Yearly,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Budget {
    pub id: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub user_id: Option<String>,
    pub category: String,
    pub amount: f64,
    #[serde(default)]
    pub spent: f64,
    #[serde(default)]
    pub period: BudgetPeriod,
    pub start_date: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub created_at: Option<String>,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Expense {
    pub id: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub user_id: Option<String>,
    pub category: String,
    pub amount: f64,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub description: Option<String>,
    pub date: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub budget_id: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub created_at: Option<String>,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct SavingsGoal {
    pub id: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub user_id: Option<String>,
    pub title: String,
    pub target_amount: f64,
    #[serde(default)]
    pub current_amount: f64,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub deadline: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub created_at: Option<String>,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum TransactionKind {
    Income,
    Expense,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Transaction {
    pub id: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub user_id: Option<String>,
    #[serde(rename = "type")]
    pub kind: TransactionKind,
    pub category: String,
    pub amount: f64,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub description: Option<String>,
    pub date: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub created_at: Option<String>,
}

impl Record for Budget {
    const KIND: EntityKind = EntityKind::Budget;

    fn id(&self) -> &str {
        &self.id
    }

    fn validate(&self) -> Result<(), ValidationError> {
        check_id(&self.id)?;
        check_text("category", &self.category)?;
        check_amount("amount", self.amount)?;
        check_amount("spent", self.spent)?;
        check_date("start_date", &self.start_date)?;
        check_optional_date("created_at", self.created_at.as_deref())
    }
}

impl Record for Expense {
    const KIND: EntityKind = EntityKind::Expense;

    fn id(&self) -> &str {
        &self.id
    }

    fn validate(&self) -> Result<(), ValidationError> {
        check_id(&self.id)?;
        check_text("category", &self.category)?;
        check_amount("amount", self.amount)?;
        check_date("date", &self.date)?;
        check_optional_date("created_at", self.created_at.as_deref())
    }
}

impl Record for SavingsGoal {
    const KIND: EntityKind = EntityKind::Savings;

    fn id(&self) -> &str {
        &self.id
    }

    fn validate(&self) -> Result<(), ValidationError> {
        check_id(&self.id)?;
        check_text("title", &self.title)?;
        check_amount("target_amount", self.target_amount)?;
        check_amount("current_amount", self.current_amount)?;
        check_optional_date("deadline", self.deadline.as_deref())?;
        check_optional_date("created_at", self.created_at.as_deref())
    }
}

impl Record for Transaction {
    const KIND: EntityKind = EntityKind::Transaction;

    fn id(&self) -> &str {
        &self.id
    }

    fn validate(&self) -> Result<(), ValidationError> {
        check_id(&self.id)?;
        check_text("category", &self.category)?;
        check_amount("amount", self.amount)?;
        check_date("date", &self.date)?;
        check_optional_date("created_at", self.created_at.as_deref())
    }
}

fn check_id(id: &str) -> Result<(), ValidationError> {
    if id.trim().is_empty() {
        return Err(ValidationError::EmptyId);
    }
    Ok(())
}

fn check_text(field: &'static str, value: &str) -> Result<(), ValidationError> {
    if value.trim().is_empty() {
        return Err(ValidationError::EmptyField { field });
    }
    Ok(())
}

pub fn check_amount(field: &'static str, value: f64) -> Result<(), ValidationError> {
    if !value.is_finite() {
        return Err(ValidationError::NotFinite { field, value });
    }
    if value < 0.0 {
        return Err(ValidationError::Negative { field, value });
    }
    if value > MAX_AMOUNT {
        return Err(ValidationError::TooLarge { field, value });
    }
    Ok(())
}

/// Accepts RFC 3339 date-times and plain `YYYY-MM-DD` dates.
pub fn check_date(field: &'static str, value: &str) -> Result<(), ValidationError> {
    if OffsetDateTime::parse(value, &Rfc3339).is_ok()
        || Date::parse(value, format_description!("[year]-[month]-[day]")).is_ok()
    {
        return Ok(());
    }
    Err(ValidationError::InvalidDate {
        field,
        value: value.to_string(),
    })
}

fn check_optional_date(field: &'static str, value: Option<&str>) -> Result<(), ValidationError> {
    match value {
        Some(value) => check_date(field, value),
        None => Ok(()),
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn budget() -> Budget {
        Budget {
            id: "b-1".into(),
            user_id: None,
            category: "Groceries".into(),
            amount: 400.0,
            spent: 120.5,
            period: BudgetPeriod::Monthly,
            start_date: "2024-03-01".into(),
            created_at: Some("2024-03-01T08:00:00Z".into()),
        }
    }

    #[test]
    fn valid_budget_passes() {
        assert_eq!(budget().validate(), Ok(()));
    }

    #[test]
    fn rejects_oversized_and_non_finite_amounts() {
        let mut record = budget();
        record.amount = 2.0e9;
        assert!(matches!(
            record.validate(),
            Err(ValidationError::TooLarge { field: "amount", .. })
        ));
        record.amount = f64::INFINITY;
        assert!(matches!(
            record.validate(),
            Err(ValidationError::NotFinite { field: "amount", .. })
        ));
        record.amount = -1.0;
        assert!(matches!(
            record.validate(),
            Err(ValidationError::Negative { field: "amount", .. })
        ));
    }

    #[test]
    fn rejects_bad_dates_and_empty_ids() {
        let mut record = budget();
        record.start_date = "03/01/2024".into();
        assert!(matches!(
            record.validate(),
            Err(ValidationError::InvalidDate { field: "start_date", .. })
        ));

        let mut record = budget();
        record.id = "  ".into();
        assert_eq!(record.validate(), Err(ValidationError::EmptyId));
    }

    #[test]
    fn savings_goal_checks_both_amounts() {
        let goal = SavingsGoal {
            id: "s-1".into(),
            user_id: None,
            title: "Emergency fund".into(),
            target_amount: 5_000.0,
            current_amount: 1.5e10,
            deadline: None,
            created_at: None,
        };
        assert!(matches!(
            goal.validate(),
            Err(ValidationError::TooLarge {
                field: "current_amount",
                ..
            })
        ));
    }

    #[test]
    fn transaction_kind_uses_type_field() {
        let json = serde_json::json!({
            "id": "t-1",
            "type": "income",
            "category": "Salary",
            "amount": 3000.0,
            "date": "2024-03-25"
        });
        let tx: Transaction = serde_json::from_value(json).unwrap();
        assert_eq!(tx.kind, TransactionKind::Income);
        assert!(tx.validate().is_ok());
    }

    #[test]
    fn entity_kind_round_trips_through_str() {
        for kind in EntityKind::ALL {
            assert_eq!(EntityKind::parse(kind.as_str()), Ok(kind));
        }
        assert!(EntityKind::parse("invoice").is_err());
        assert_eq!(EntityKind::Savings.table(), "savings_goals");
    }
}
