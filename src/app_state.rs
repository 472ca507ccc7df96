//! Implements a struct that holds the state of the REST server.

use std::sync::{Arc, Mutex};

use axum::extract::FromRef;
use rusqlite::Connection;

use crate::{Error, auth::IdentityProvider, db::initialize, parser::TransactionParser};

/// The state of the REST server.
#[derive(Clone)]
pub struct AppState {
    /// The database connection.
    pub db_connection: Arc<Mutex<Connection>>,

    /// The collaborator that exchanges bearer credentials for user identities.
    pub identity_provider: Arc<dyn IdentityProvider>,

    /// The parser that turns free text into transaction candidates.
    pub parser: Arc<dyn TransactionParser>,
}

impl AppState {
    /// Create a new [AppState] with a SQLite database connection.
    ///
    /// This function will initialize the database by adding the tables for the
    /// domain models.
    ///
    /// # Errors
    /// Returns an error if the database cannot be initialized.
    pub fn new(
        db_connection: Connection,
        identity_provider: Arc<dyn IdentityProvider>,
        parser: Arc<dyn TransactionParser>,
    ) -> Result<Self, Error> {
        initialize(&db_connection)?;

        Ok(Self {
            db_connection: Arc::new(Mutex::new(db_connection)),
            identity_provider,
            parser,
        })
    }
}

/// The state needed to store, query, or aggregate transactions.
#[derive(Clone)]
pub struct TransactionState {
    /// The database connection.
    pub db_connection: Arc<Mutex<Connection>>,
}

impl FromRef<AppState> for TransactionState {
    fn from_ref(state: &AppState) -> Self {
        Self {
            db_connection: state.db_connection.clone(),
        }
    }
}

/// The state needed for the parse endpoint.
#[derive(Clone)]
pub struct ParseState {
    /// The parser that turns free text into transaction candidates.
    pub parser: Arc<dyn TransactionParser>,
}

impl FromRef<AppState> for ParseState {
    fn from_ref(state: &AppState) -> Self {
        Self {
            parser: state.parser.clone(),
        }
    }
}
