//! Transaction management for the finance tracker.
//!
//! This module contains everything related to transactions:
//! - The `Category` and `TransactionType` vocabularies
//! - The `Transaction` model and `TransactionBuilder` for creating transactions
//! - Database functions for storing, querying, and managing transactions
//! - The JSON route handlers for the transaction endpoints

use std::{
    fmt::{self, Display},
    str::FromStr,
};

use axum::{
    Extension, Json,
    extract::{Path, Query, State},
    http::StatusCode,
    response::{IntoResponse, Response},
};
use rusqlite::{
    Connection, Row, params_from_iter,
    types::{FromSql, FromSqlError, FromSqlResult, ToSql, ToSqlOutput, ValueRef},
};
use serde::{Deserialize, Serialize};
use time::{Date, OffsetDateTime};

use crate::{Error, app_state::TransactionState, auth::AuthenticatedUser};

/// The ID of a row in the transaction table.
pub type TransactionId = i64;

// ============================================================================
// VOCABULARIES
// ============================================================================

/// The closed set of labels used to bucket transactions for reporting.
///
/// Unknown labels are rejected at the API boundary rather than stored.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum Category {
    /// Restaurants, cafes, groceries eaten soon after purchase.
    #[serde(rename = "Food & Dining")]
    FoodAndDining,
    /// Retail purchases.
    #[serde(rename = "Shopping")]
    Shopping,
    /// Fuel, ride shares, public transport.
    #[serde(rename = "Transportation")]
    Transportation,
    /// Streaming, cinema, events.
    #[serde(rename = "Entertainment")]
    Entertainment,
    /// Recurring household bills.
    #[serde(rename = "Bills & Utilities")]
    BillsAndUtilities,
    /// Medical and pharmacy spending.
    #[serde(rename = "Healthcare")]
    Healthcare,
    /// Tuition, courses, books.
    #[serde(rename = "Education")]
    Education,
    /// Flights, hotels, holidays.
    #[serde(rename = "Travel")]
    Travel,
    /// Money coming in: salary, bonuses, refunds.
    #[serde(rename = "Income")]
    Income,
    /// Anything that does not fit the other buckets.
    #[serde(rename = "Other")]
    Other,
}

impl Category {
    /// Every category, in display order.
    pub const ALL: [Category; 10] = [
        Category::FoodAndDining,
        Category::Shopping,
        Category::Transportation,
        Category::Entertainment,
        Category::BillsAndUtilities,
        Category::Healthcare,
        Category::Education,
        Category::Travel,
        Category::Income,
        Category::Other,
    ];

    /// The display label for the category, as stored in the database and sent
    /// over the wire.
    pub fn as_str(&self) -> &'static str {
        match self {
            Category::FoodAndDining => "Food & Dining",
            Category::Shopping => "Shopping",
            Category::Transportation => "Transportation",
            Category::Entertainment => "Entertainment",
            Category::BillsAndUtilities => "Bills & Utilities",
            Category::Healthcare => "Healthcare",
            Category::Education => "Education",
            Category::Travel => "Travel",
            Category::Income => "Income",
            Category::Other => "Other",
        }
    }
}

impl Display for Category {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.as_str())
    }
}

impl FromStr for Category {
    type Err = Error;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        Category::ALL
            .into_iter()
            .find(|category| category.as_str() == s)
            .ok_or_else(|| Error::InvalidCategory(s.to_owned()))
    }
}

impl ToSql for Category {
    fn to_sql(&self) -> rusqlite::Result<ToSqlOutput<'_>> {
        Ok(self.as_str().into())
    }
}

impl FromSql for Category {
    fn column_result(value: ValueRef<'_>) -> FromSqlResult<Self> {
        let text = value.as_str()?;

        Category::from_str(text).map_err(|error| FromSqlError::Other(Box::new(error)))
    }
}

/// Whether a transaction records money earned or money spent.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum TransactionType {
    /// Money flowing in.
    Income,
    /// Money flowing out.
    Expense,
}

impl TransactionType {
    /// The wire/database label for the type.
    pub fn as_str(&self) -> &'static str {
        match self {
            TransactionType::Income => "income",
            TransactionType::Expense => "expense",
        }
    }
}

impl ToSql for TransactionType {
    fn to_sql(&self) -> rusqlite::Result<ToSqlOutput<'_>> {
        Ok(self.as_str().into())
    }
}

impl FromSql for TransactionType {
    fn column_result(value: ValueRef<'_>) -> FromSqlResult<Self> {
        match value.as_str()? {
            "income" => Ok(TransactionType::Income),
            "expense" => Ok(TransactionType::Expense),
            other => Err(FromSqlError::Other(
                format!("invalid transaction type \"{other}\"").into(),
            )),
        }
    }
}

// ============================================================================
// MODELS
// ============================================================================

/// An expense or income, i.e. an event where money was either spent or earned.
///
/// The amount is a non-negative magnitude; the direction of the money flow is
/// carried by `transaction_type`. To create a new `Transaction`, use
/// [Transaction::build].
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Transaction {
    /// The server-assigned ID of the transaction.
    pub id: TransactionId,
    /// The ID of the user who owns this transaction.
    pub user_id: String,
    /// The magnitude of money spent or earned in this transaction.
    pub amount: f64,
    /// A text description of what the transaction was for.
    pub description: String,
    /// The category the transaction belongs to.
    pub category: Category,
    /// Whether the transaction is income or an expense.
    #[serde(rename = "type")]
    pub transaction_type: TransactionType,
    /// When the transaction happened.
    pub date: Date,
    /// When the transaction was recorded.
    pub created_at: OffsetDateTime,
    /// The parser's confidence in the extracted fields, present only for
    /// AI/heuristic-derived records. Display only, never used for decisions.
    pub confidence: Option<f64>,
    /// The provisional client-generated ID, if the record was created from a
    /// parse candidate. Used only to dedupe retried confirmations.
    pub client_id: Option<String>,
}

impl Transaction {
    /// Create a new transaction.
    ///
    /// Shortcut for [TransactionBuilder] for discoverability.
    pub fn build(user_id: &str, amount: f64, description: &str) -> TransactionBuilder {
        TransactionBuilder {
            user_id: user_id.to_owned(),
            amount,
            description: description.to_owned(),
            category: Category::Other,
            transaction_type: TransactionType::Expense,
            date: OffsetDateTime::now_utc().date(),
            confidence: None,
            client_id: None,
        }
    }
}

/// A builder for creating [Transaction] instances.
///
/// Defaults: today's date, [Category::Other], [TransactionType::Expense], no
/// confidence, no client ID. Pass the finished builder to
/// [create_transaction] to validate and store it.
#[derive(Debug, PartialEq, Clone)]
pub struct TransactionBuilder {
    /// The ID of the user who will own the transaction.
    pub user_id: String,
    /// The non-negative magnitude of the transaction.
    pub amount: f64,
    /// A human-readable description of the transaction. Must not be empty.
    pub description: String,
    /// The category the transaction belongs to.
    pub category: Category,
    /// Whether the transaction is income or an expense.
    pub transaction_type: TransactionType,
    /// The date when the transaction occurred. Must not be in the future.
    pub date: Date,
    /// The parser's confidence, for records confirmed from a parse candidate.
    pub confidence: Option<f64>,
    /// The provisional client-generated ID.
    ///
    /// The database enforces uniqueness on this field, so a client that
    /// retries a confirmation after a dropped response cannot store the same
    /// transaction twice. The server never uses it as the record identity.
    pub client_id: Option<String>,
}

impl TransactionBuilder {
    /// Set the category for the transaction.
    pub fn category(mut self, category: Category) -> Self {
        self.category = category;
        self
    }

    /// Set the transaction type.
    pub fn transaction_type(mut self, transaction_type: TransactionType) -> Self {
        self.transaction_type = transaction_type;
        self
    }

    /// Set the date when the transaction occurred.
    pub fn date(mut self, date: Date) -> Self {
        self.date = date;
        self
    }

    /// Set the parser confidence for the transaction.
    pub fn confidence(mut self, confidence: Option<f64>) -> Self {
        self.confidence = confidence;
        self
    }

    /// Set the provisional client ID for the transaction.
    pub fn client_id(mut self, client_id: Option<String>) -> Self {
        self.client_id = client_id;
        self
    }
}

/// Optional restrictions applied when listing transactions.
///
/// The owner restriction is not part of the filter: queries are always scoped
/// to the requesting user.
#[derive(Debug, Default, Clone, PartialEq)]
pub struct TransactionFilter {
    /// Keep only transactions with this category.
    pub category: Option<Category>,
    /// Keep only transactions on or after this date.
    pub start_date: Option<Date>,
    /// Keep only transactions on or before this date.
    pub end_date: Option<Date>,
}

// ============================================================================
// DATABASE FUNCTIONS
// ============================================================================

/// Create the transaction table in the database.
///
/// # Errors
/// Returns an error if the table cannot be created or if there is an SQL error.
pub fn create_transaction_table(connection: &Connection) -> Result<(), rusqlite::Error> {
    connection.execute(
        "CREATE TABLE IF NOT EXISTS \"transaction\" (
                id INTEGER PRIMARY KEY AUTOINCREMENT,
                user_id TEXT NOT NULL,
                amount REAL NOT NULL,
                description TEXT NOT NULL,
                category TEXT NOT NULL,
                type TEXT NOT NULL,
                date TEXT NOT NULL,
                created_at TEXT NOT NULL,
                confidence REAL,
                client_id TEXT UNIQUE
                )",
        (),
    )?;

    // Ensure the sequence starts at 1
    connection.execute(
        "INSERT OR IGNORE INTO sqlite_sequence (name, seq) VALUES ('transaction', 0)",
        (),
    )?;

    // Composite index used by the list and analytics queries.
    connection.execute(
        "CREATE INDEX IF NOT EXISTS idx_transaction_user_date ON \"transaction\"(user_id, date);",
        (),
    )?;

    Ok(())
}

/// Check the invariants that every stored transaction must satisfy.
fn validate_transaction_fields(amount: f64, description: &str, date: Date) -> Result<(), Error> {
    if amount < 0.0 {
        return Err(Error::NegativeAmount(amount));
    }

    if description.trim().is_empty() {
        return Err(Error::EmptyDescription);
    }

    if date > OffsetDateTime::now_utc().date() {
        return Err(Error::FutureDate(date));
    }

    Ok(())
}

/// Create a new transaction in the database from a builder.
///
/// Dates must be no later than today, amounts must be non-negative, and the
/// description must not be empty.
///
/// # Errors
/// This function will return a:
/// - [Error::NegativeAmount], [Error::EmptyDescription] or [Error::FutureDate]
///   if the builder fails validation,
/// - or [Error::DuplicateClientId] if a transaction with the specified client
///   ID already exists,
/// - or [Error::SqlError] if there is some other SQL error.
pub fn create_transaction(
    builder: TransactionBuilder,
    connection: &Connection,
) -> Result<Transaction, Error> {
    validate_transaction_fields(builder.amount, &builder.description, builder.date)?;

    let transaction = connection
        .prepare(
            "INSERT INTO \"transaction\"
             (user_id, amount, description, category, type, date, created_at, confidence, client_id)
             VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7, ?8, ?9)
             RETURNING id, user_id, amount, description, category, type, date, created_at, confidence, client_id",
        )?
        .query_row(
            (
                &builder.user_id,
                builder.amount,
                &builder.description,
                builder.category,
                builder.transaction_type,
                builder.date,
                OffsetDateTime::now_utc(),
                builder.confidence,
                &builder.client_id,
            ),
            map_transaction_row,
        )
        .map_err(|error| match error {
            rusqlite::Error::SqliteFailure(
                rusqlite::ffi::Error {
                    code: _,
                    extended_code: rusqlite::ffi::SQLITE_CONSTRAINT_UNIQUE,
                },
                _,
            ) => Error::DuplicateClientId,
            error => error.into(),
        })?;

    Ok(transaction)
}

/// Retrieve a transaction from the database by its `id`.
///
/// # Errors
/// This function will return a:
/// - [Error::NotFound] if `id` does not refer to a valid transaction,
/// - or [Error::SqlError] there is some other SQL error.
pub fn get_transaction(id: TransactionId, connection: &Connection) -> Result<Transaction, Error> {
    let transaction = connection
        .prepare(
            "SELECT id, user_id, amount, description, category, type, date, created_at, confidence, client_id
             FROM \"transaction\" WHERE id = :id",
        )?
        .query_one(&[(":id", &id)], map_transaction_row)?;

    Ok(transaction)
}

/// List the transactions owned by `user_id`, newest date first.
///
/// `filter` narrows the result by category and/or date range. Transactions
/// belonging to other users are never returned, regardless of the filter.
///
/// # Errors
/// This function will return a [Error::SqlError] if there is an SQL error.
pub fn list_transactions(
    user_id: &str,
    filter: &TransactionFilter,
    connection: &Connection,
) -> Result<Vec<Transaction>, Error> {
    let mut sql = String::from(
        "SELECT id, user_id, amount, description, category, type, date, created_at, confidence, client_id
         FROM \"transaction\" WHERE user_id = ?1",
    );
    let mut params: Vec<Box<dyn ToSql>> = vec![Box::new(user_id.to_owned())];

    if let Some(category) = filter.category {
        params.push(Box::new(category));
        sql.push_str(&format!(" AND category = ?{}", params.len()));
    }

    if let Some(start_date) = filter.start_date {
        params.push(Box::new(start_date));
        sql.push_str(&format!(" AND date >= ?{}", params.len()));
    }

    if let Some(end_date) = filter.end_date {
        params.push(Box::new(end_date));
        sql.push_str(&format!(" AND date <= ?{}", params.len()));
    }

    sql.push_str(" ORDER BY date DESC, id DESC");

    let transactions = connection
        .prepare(&sql)?
        .query_map(
            params_from_iter(params.iter().map(|param| param.as_ref())),
            map_transaction_row,
        )?
        .collect::<Result<Vec<_>, _>>()?;

    Ok(transactions)
}

/// The fields of a transaction that a client may change after creation.
#[derive(Debug, Default, Clone, Deserialize)]
pub struct UpdateTransaction {
    /// Replace the amount.
    pub amount: Option<f64>,
    /// Replace the description.
    pub description: Option<String>,
    /// Replace the category.
    pub category: Option<Category>,
    /// Replace the transaction type.
    #[serde(rename = "type")]
    pub transaction_type: Option<TransactionType>,
    /// Replace the date.
    pub date: Option<Date>,
}

/// Update the fields of the transaction `id` owned by `user_id`.
///
/// Fields left as `None` keep their stored values. The updated row is
/// re-validated with the same rules as creation.
///
/// # Errors
/// This function will return a:
/// - [Error::UpdateMissingTransaction] if `id` does not refer to a transaction,
/// - or [Error::AuthorizationDenied] if the transaction belongs to another
///   user (the record is left unchanged),
/// - or a validation error if the merged fields are invalid,
/// - or [Error::SqlError] if there is some other SQL error.
pub fn update_transaction(
    id: TransactionId,
    user_id: &str,
    update: UpdateTransaction,
    connection: &Connection,
) -> Result<Transaction, Error> {
    let existing = match get_transaction(id, connection) {
        Ok(transaction) => transaction,
        Err(Error::NotFound) => return Err(Error::UpdateMissingTransaction),
        Err(error) => return Err(error),
    };

    if existing.user_id != user_id {
        return Err(Error::AuthorizationDenied);
    }

    let amount = update.amount.unwrap_or(existing.amount);
    let description = update.description.unwrap_or(existing.description);
    let category = update.category.unwrap_or(existing.category);
    let transaction_type = update.transaction_type.unwrap_or(existing.transaction_type);
    let date = update.date.unwrap_or(existing.date);

    validate_transaction_fields(amount, &description, date)?;

    connection.execute(
        "UPDATE \"transaction\"
         SET amount = ?1, description = ?2, category = ?3, type = ?4, date = ?5
         WHERE id = ?6",
        (amount, &description, category, transaction_type, date, id),
    )?;

    get_transaction(id, connection)
}

/// Delete the transaction `id` owned by `user_id`.
///
/// # Errors
/// This function will return a:
/// - [Error::DeleteMissingTransaction] if `id` does not refer to a transaction,
/// - or [Error::AuthorizationDenied] if the transaction belongs to another
///   user (the record is left unchanged),
/// - or [Error::SqlError] if there is some other SQL error.
pub fn delete_transaction(
    id: TransactionId,
    user_id: &str,
    connection: &Connection,
) -> Result<(), Error> {
    let existing = match get_transaction(id, connection) {
        Ok(transaction) => transaction,
        Err(Error::NotFound) => return Err(Error::DeleteMissingTransaction),
        Err(error) => return Err(error),
    };

    if existing.user_id != user_id {
        return Err(Error::AuthorizationDenied);
    }

    connection.execute("DELETE FROM \"transaction\" WHERE id = ?1", (id,))?;

    Ok(())
}

/// Map a database row to a Transaction.
pub fn map_transaction_row(row: &Row) -> Result<Transaction, rusqlite::Error> {
    Ok(Transaction {
        id: row.get(0)?,
        user_id: row.get(1)?,
        amount: row.get(2)?,
        description: row.get(3)?,
        category: row.get(4)?,
        transaction_type: row.get(5)?,
        date: row.get(6)?,
        created_at: row.get(7)?,
        confidence: row.get(8)?,
        client_id: row.get(9)?,
    })
}

// ============================================================================
// ROUTE HANDLERS
// ============================================================================

/// The request body for creating a transaction.
#[derive(Debug, Deserialize)]
pub struct CreateTransactionRequest {
    /// The non-negative magnitude of the transaction.
    pub amount: f64,
    /// Text detailing the transaction.
    pub description: String,
    /// The category label. Must be one of the fixed category set.
    pub category: String,
    /// Whether the transaction is income or an expense.
    #[serde(rename = "type")]
    pub transaction_type: TransactionType,
    /// The date when the transaction occurred. Defaults to today.
    pub date: Option<Date>,
    /// The parser's confidence, when confirming a parse candidate.
    pub confidence: Option<f64>,
    /// The provisional ID generated client side, used to dedupe retries.
    pub client_id: Option<String>,
}

/// A route handler for creating a new transaction, returns the stored record
/// with its server-assigned ID and status 201 on success.
///
/// # Panics
///
/// Panics if the lock for the database connection is already held by the same thread.
pub async fn create_transaction_endpoint(
    State(state): State<TransactionState>,
    Extension(user): Extension<AuthenticatedUser>,
    Json(data): Json<CreateTransactionRequest>,
) -> Response {
    let category = match Category::from_str(&data.category) {
        Ok(category) => category,
        Err(error) => return error.into_response(),
    };

    let mut builder = Transaction::build(&user.id, data.amount, &data.description)
        .category(category)
        .transaction_type(data.transaction_type)
        .confidence(data.confidence)
        .client_id(data.client_id);

    if let Some(date) = data.date {
        builder = builder.date(date);
    }

    let connection = state.db_connection.lock().unwrap();

    match create_transaction(builder, &connection) {
        Ok(transaction) => (StatusCode::CREATED, Json(transaction)).into_response(),
        Err(error) => error.into_response(),
    }
}

/// The query parameters accepted when listing transactions.
#[derive(Debug, Default, Deserialize)]
pub struct TransactionQuery {
    /// Keep only transactions with this category label.
    pub category: Option<String>,
    /// Keep only transactions on or after this date.
    pub start_date: Option<Date>,
    /// Keep only transactions on or before this date.
    pub end_date: Option<Date>,
}

/// A route handler for listing the requesting user's transactions, newest
/// date first.
///
/// # Panics
///
/// Panics if the lock for the database connection is already held by the same thread.
pub async fn list_transactions_endpoint(
    State(state): State<TransactionState>,
    Extension(user): Extension<AuthenticatedUser>,
    Query(query): Query<TransactionQuery>,
) -> Response {
    let category = match query.category.as_deref().map(Category::from_str) {
        None => None,
        Some(Ok(category)) => Some(category),
        Some(Err(error)) => return error.into_response(),
    };

    let filter = TransactionFilter {
        category,
        start_date: query.start_date,
        end_date: query.end_date,
    };

    let connection = state.db_connection.lock().unwrap();

    match list_transactions(&user.id, &filter, &connection) {
        Ok(transactions) => Json(transactions).into_response(),
        Err(error) => error.into_response(),
    }
}

/// A route handler for updating the fields of an existing transaction.
///
/// Returns 404 when the transaction does not exist and 403 when it belongs to
/// another user.
///
/// # Panics
///
/// Panics if the lock for the database connection is already held by the same thread.
pub async fn update_transaction_endpoint(
    State(state): State<TransactionState>,
    Extension(user): Extension<AuthenticatedUser>,
    Path(transaction_id): Path<TransactionId>,
    Json(update): Json<UpdateTransaction>,
) -> Response {
    let connection = state.db_connection.lock().unwrap();

    match update_transaction(transaction_id, &user.id, update, &connection) {
        Ok(transaction) => Json(transaction).into_response(),
        Err(error) => error.into_response(),
    }
}

/// The response body for a successful delete.
#[derive(Debug, Serialize, Deserialize)]
pub struct DeleteResponse {
    /// The ID of the deleted transaction.
    pub deleted: TransactionId,
}

/// A route handler for deleting an existing transaction.
///
/// Returns 404 when the transaction does not exist and 403 when it belongs to
/// another user.
///
/// # Panics
///
/// Panics if the lock for the database connection is already held by the same thread.
pub async fn delete_transaction_endpoint(
    State(state): State<TransactionState>,
    Extension(user): Extension<AuthenticatedUser>,
    Path(transaction_id): Path<TransactionId>,
) -> Response {
    let connection = state.db_connection.lock().unwrap();

    match delete_transaction(transaction_id, &user.id, &connection) {
        Ok(()) => Json(DeleteResponse {
            deleted: transaction_id,
        })
        .into_response(),
        Err(error) => error.into_response(),
    }
}

// ============================================================================
// TESTS
// ============================================================================
