//! Aggregations over a user's transactions.
//!
//! Every aggregate is a pure function of the current transaction set,
//! recomputed per request and never persisted. Empty input yields zero-valued
//! results, not errors.

use std::collections::HashMap;

use axum::{
    Extension, Json,
    extract::{Query, State},
    response::{IntoResponse, Response},
};
use serde::{Deserialize, Serialize};
use time::{Date, Duration, OffsetDateTime};

use crate::{
    app_state::TransactionState,
    auth::AuthenticatedUser,
    transaction::{Category, Transaction, TransactionFilter, TransactionType, list_transactions},
};

/// The trend window used when the client does not ask for one.
const DEFAULT_TREND_WINDOW_DAYS: i64 = 30;
/// The largest trend window a client may request.
const MAX_TREND_WINDOW_DAYS: i64 = 365;

// ============================================================================
// AGGREGATES
// ============================================================================

/// Income, expenses and savings over a set of transactions.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct FinancialSummary {
    /// The sum of all income amounts.
    pub total_income: f64,
    /// The sum of all expense amounts.
    pub total_expenses: f64,
    /// Income minus expenses. May be negative.
    pub savings: f64,
    /// How many transactions went into the summary.
    pub transaction_count: usize,
}

/// Sum the income and expense amounts of `transactions`.
pub fn financial_summary(transactions: &[Transaction]) -> FinancialSummary {
    let mut total_income = 0.0;
    let mut total_expenses = 0.0;

    for transaction in transactions {
        match transaction.transaction_type {
            TransactionType::Income => total_income += transaction.amount,
            TransactionType::Expense => total_expenses += transaction.amount,
        }
    }

    FinancialSummary {
        total_income,
        total_expenses,
        savings: total_income - total_expenses,
        transaction_count: transactions.len(),
    }
}

/// The spending within one category, relative to all expenses.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct CategorySummary {
    /// The category being summarized.
    pub category: Category,
    /// The sum of expense amounts in this category.
    pub amount: f64,
    /// How many expense transactions fall in this category.
    pub count: usize,
    /// This category's share of all expenses, 0..100. Zero when there are no
    /// expenses at all.
    pub percentage: f64,
}

/// Group the expenses in `transactions` by category.
///
/// Income transactions are ignored. The result is ordered by amount
/// descending, with the category label as a tie breaker so the order is
/// stable.
pub fn category_summary(transactions: &[Transaction]) -> Vec<CategorySummary> {
    let mut totals: HashMap<Category, (f64, usize)> = HashMap::new();

    for transaction in transactions
        .iter()
        .filter(|t| t.transaction_type == TransactionType::Expense)
    {
        let entry = totals.entry(transaction.category).or_insert((0.0, 0));
        entry.0 += transaction.amount;
        entry.1 += 1;
    }

    let total_expenses: f64 = totals.values().map(|(amount, _)| amount).sum();

    let mut summaries: Vec<CategorySummary> = totals
        .into_iter()
        .map(|(category, (amount, count))| CategorySummary {
            category,
            amount,
            count,
            percentage: if total_expenses > 0.0 {
                amount / total_expenses * 100.0
            } else {
                0.0
            },
        })
        .collect();

    summaries.sort_by(|a, b| {
        b.amount
            .partial_cmp(&a.amount)
            .unwrap_or(std::cmp::Ordering::Equal)
            .then_with(|| a.category.as_str().cmp(b.category.as_str()))
    });

    summaries
}

/// The money flow on one calendar day.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct TrendData {
    /// The day being summarized.
    pub date: Date,
    /// The sum of income amounts on this day.
    pub income: f64,
    /// The sum of expense amounts on this day.
    pub expenses: f64,
    /// Income minus expenses for this day.
    pub net: f64,
}

/// Sum income and expenses for each of the last `window_days` calendar days
/// ending `today` inclusive.
///
/// The result always has exactly `window_days` entries in ascending date
/// order, zero-filled for days without transactions.
pub fn trend_series(transactions: &[Transaction], window_days: i64, today: Date) -> Vec<TrendData> {
    let mut totals_by_day: HashMap<Date, (f64, f64)> = HashMap::new();

    for transaction in transactions {
        let entry = totals_by_day.entry(transaction.date).or_insert((0.0, 0.0));
        match transaction.transaction_type {
            TransactionType::Income => entry.0 += transaction.amount,
            TransactionType::Expense => entry.1 += transaction.amount,
        }
    }

    (0..window_days)
        .rev()
        .map(|days_ago| {
            let date = today - Duration::days(days_ago);
            let (income, expenses) = totals_by_day.get(&date).copied().unwrap_or((0.0, 0.0));

            TrendData {
                date,
                income,
                expenses,
                net: income - expenses,
            }
        })
        .collect()
}

// ============================================================================
// ROUTE HANDLERS
// ============================================================================

/// A route handler for the requesting user's financial summary.
///
/// # Panics
///
/// Panics if the lock for the database connection is already held by the same thread.
pub async fn get_summary_endpoint(
    State(state): State<TransactionState>,
    Extension(user): Extension<AuthenticatedUser>,
) -> Response {
    let connection = state.db_connection.lock().unwrap();

    match list_transactions(&user.id, &TransactionFilter::default(), &connection) {
        Ok(transactions) => Json(financial_summary(&transactions)).into_response(),
        Err(error) => error.into_response(),
    }
}

/// A route handler for the requesting user's per-category expense breakdown.
///
/// # Panics
///
/// Panics if the lock for the database connection is already held by the same thread.
pub async fn get_category_summary_endpoint(
    State(state): State<TransactionState>,
    Extension(user): Extension<AuthenticatedUser>,
) -> Response {
    let connection = state.db_connection.lock().unwrap();

    match list_transactions(&user.id, &TransactionFilter::default(), &connection) {
        Ok(transactions) => Json(category_summary(&transactions)).into_response(),
        Err(error) => error.into_response(),
    }
}

/// The query parameters accepted by the trends endpoint.
#[derive(Debug, Default, Deserialize)]
pub struct TrendQuery {
    /// How many days the series should cover, ending today. Defaults to 30.
    pub days: Option<i64>,
}

/// A route handler for the requesting user's daily trend series.
///
/// The window is clamped to 1..=365 days.
///
/// # Panics
///
/// Panics if the lock for the database connection is already held by the same thread.
pub async fn get_trends_endpoint(
    State(state): State<TransactionState>,
    Extension(user): Extension<AuthenticatedUser>,
    Query(query): Query<TrendQuery>,
) -> Response {
    let window_days = query
        .days
        .unwrap_or(DEFAULT_TREND_WINDOW_DAYS)
        .clamp(1, MAX_TREND_WINDOW_DAYS);
    let today = OffsetDateTime::now_utc().date();

    let connection = state.db_connection.lock().unwrap();

    match list_transactions(&user.id, &TransactionFilter::default(), &connection) {
        Ok(transactions) => Json(trend_series(&transactions, window_days, today)).into_response(),
        Err(error) => error.into_response(),
    }
}

// ============================================================================
// TESTS
// ============================================================================
