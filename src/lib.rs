//! Finsight is a personal finance tracker backend.
//!
//! Users authenticate with a bearer credential issued by an external identity
//! provider, submit free-text transaction descriptions that are parsed into
//! structured candidates, and confirm them into a per-user transaction store.
//! The library provides a JSON REST API plus the aggregations (financial
//! summary, category breakdown, daily trends) that the dashboard client
//! renders.

#![warn(missing_docs)]

use std::{net::SocketAddr, time::Duration};

use axum::{
    Json,
    http::StatusCode,
    response::{IntoResponse, Response},
};
use axum_server::Handle;
use serde::Serialize;
use time::Date;
use tokio::signal;

pub mod analytics;
mod app_state;
pub mod auth;
pub mod client_id;
mod db;
pub mod endpoints;
pub mod format;
mod logging;
pub mod parser;
mod routing;
pub mod transaction;

pub use app_state::{AppState, ParseState, TransactionState};
pub use db::initialize as initialize_db;
pub use logging::{LOG_BODY_LENGTH_LIMIT, logging_middleware};
pub use routing::build_router;

/// An async task that waits for either the ctrl+c or terminate signal, whichever comes first, and
/// then signals the server to shut down gracefully.
///
/// `handle` is a handle to an Axum `Server`.
pub async fn graceful_shutdown(handle: Handle<SocketAddr>) {
    let ctrl_c = async {
        signal::ctrl_c()
            .await
            .expect("failed to install Ctrl+C handler");
    };

    #[cfg(unix)]
    let terminate = async {
        signal::unix::signal(signal::unix::SignalKind::terminate())
            .expect("failed to install signal handler")
            .recv()
            .await;
    };

    #[cfg(not(unix))]
    let terminate = std::future::pending::<()>();

    tokio::select! {
        _ = ctrl_c => {
            tracing::debug!("Received ctrl+c signal.");
            handle.graceful_shutdown(Some(Duration::from_secs(1)));
        },
        _ = terminate => {
            tracing::debug!("Received terminate signal.");
            handle.graceful_shutdown(Some(Duration::from_secs(1)));
        },
    }
}

/// The errors that may occur in the application.
#[derive(Debug, thiserror::Error, PartialEq)]
pub enum Error {
    /// The request carried no `Authorization` header.
    ///
    /// Rejected before any collaborator is contacted.
    #[error("no credential was presented")]
    AuthenticationMissing,

    /// The identity provider rejected the presented credential, or the
    /// credential did not use the bearer scheme.
    #[error("the credential is invalid or expired")]
    AuthenticationInvalid,

    /// The credential is valid but the requesting user does not own the
    /// resource.
    ///
    /// Kept distinct from [Error::NotFound] so a valid user cannot probe for
    /// the existence of other users' records, and vice versa.
    #[error("the requesting user does not own this resource")]
    AuthorizationDenied,

    /// The requested resource was not found.
    ///
    /// For HTTP request handlers, the client should check that the parameters
    /// (e.g., ID) are correct and that the resource has been created.
    ///
    /// Internally, this error may occur when a query returns no rows.
    #[error("the requested resource could not be found")]
    NotFound,

    /// The parse endpoint was called with empty or missing text.
    #[error("text input is required")]
    MissingParseText,

    /// An empty string was used for a transaction description.
    #[error("transaction description cannot be empty")]
    EmptyDescription,

    /// A negative amount was used to create or update a transaction.
    ///
    /// Amounts are stored as non-negative magnitudes; the direction of the
    /// money flow is carried by the transaction type.
    #[error("{0} is negative, amounts must be non-negative magnitudes")]
    NegativeAmount(f64),

    /// A category label outside the fixed category set was supplied.
    #[error("\"{0}\" is not a recognised category")]
    InvalidCategory(String),

    /// A date in the future was used to create a transaction.
    ///
    /// Transactions record events that have already happened, therefore future
    /// dates are not allowed.
    #[error("{0} is a date in the future, which is not allowed")]
    FutureDate(Date),

    /// The specified client ID already exists in the database.
    ///
    /// Clients attach a provisional ID to locally-created records so that a
    /// retried confirmation does not store the same transaction twice.
    #[error("the client ID already exists in the database")]
    DuplicateClientId,

    /// The parser produced output that could not be decoded.
    ///
    /// Carries the raw model output for diagnosis; never silently defaulted.
    #[error("could not decode parser output: {0}")]
    ParseFailure(String),

    /// The upstream model provider rate-limited the request and retries were
    /// exhausted.
    #[error("the model provider rate-limited the request")]
    RateLimited,

    /// The upstream model provider reported quota exhaustion.
    ///
    /// Not retried; the operator needs to check billing, not wait.
    #[error("the model provider quota is exhausted")]
    QuotaExhausted,

    /// The model provider failed in some other way.
    ///
    /// The detail string should only be logged for debugging on the server,
    /// not shown to the client.
    #[error("model provider call failed: {0}")]
    LlmError(String),

    /// The identity provider could not be reached or returned an unexpected
    /// response.
    #[error("identity provider call failed: {0}")]
    IdentityProviderError(String),

    /// Tried to update a transaction that does not exist
    #[error("tried to update a transaction that is not in the database")]
    UpdateMissingTransaction,

    /// Tried to delete a transaction that does not exist
    #[error("tried to delete a transaction that is not in the database")]
    DeleteMissingTransaction,

    /// An unhandled/unexpected SQL error.
    #[error("an unexpected SQL error occurred: {0}")]
    SqlError(rusqlite::Error),
}

impl From<rusqlite::Error> for Error {
    fn from(value: rusqlite::Error) -> Self {
        match value {
            // Code 2067 occurs when a UNIQUE constraint failed.
            rusqlite::Error::SqliteFailure(sql_error, Some(ref desc))
                if sql_error.extended_code == 2067 && desc.ends_with("transaction.client_id") =>
            {
                Error::DuplicateClientId
            }
            rusqlite::Error::QueryReturnedNoRows => Error::NotFound,
            error => {
                tracing::error!("an unhandled SQL error occurred: {}", error);
                Error::SqlError(error)
            }
        }
    }
}

/// The JSON body sent to clients when a request fails.
#[derive(Debug, Serialize)]
struct ErrorBody {
    /// A short description of what went wrong.
    error: String,
    /// Extra diagnostic content, e.g. the raw model output on a parse failure.
    #[serde(skip_serializing_if = "Option::is_none")]
    details: Option<String>,
}

impl ErrorBody {
    fn new(error: &str) -> Self {
        Self {
            error: error.to_owned(),
            details: None,
        }
    }
}

impl IntoResponse for Error {
    fn into_response(self) -> Response {
        let (status, body) = match self {
            Error::AuthenticationMissing => {
                (StatusCode::UNAUTHORIZED, ErrorBody::new(&self.to_string()))
            }
            Error::AuthenticationInvalid | Error::AuthorizationDenied => {
                (StatusCode::FORBIDDEN, ErrorBody::new(&self.to_string()))
            }
            Error::NotFound | Error::UpdateMissingTransaction | Error::DeleteMissingTransaction => {
                (
                    StatusCode::NOT_FOUND,
                    ErrorBody::new("the requested resource could not be found"),
                )
            }
            Error::MissingParseText
            | Error::EmptyDescription
            | Error::NegativeAmount(_)
            | Error::InvalidCategory(_)
            | Error::FutureDate(_) => (StatusCode::BAD_REQUEST, ErrorBody::new(&self.to_string())),
            Error::DuplicateClientId => (StatusCode::CONFLICT, ErrorBody::new(&self.to_string())),
            Error::RateLimited | Error::QuotaExhausted => {
                (StatusCode::TOO_MANY_REQUESTS, ErrorBody::new(&self.to_string()))
            }
            Error::ParseFailure(raw_output) => (
                StatusCode::INTERNAL_SERVER_ERROR,
                ErrorBody {
                    error: "failed to decode parser output".to_owned(),
                    details: Some(raw_output),
                },
            ),
            // Any errors that are not handled above are not intended to be
            // shown to the client.
            error => {
                tracing::error!("An unexpected error occurred: {}", error);
                (
                    StatusCode::INTERNAL_SERVER_ERROR,
                    ErrorBody::new("internal server error"),
                )
            }
        };

        (status, Json(body)).into_response()
    }
}

#[cfg(test)]
mod error_response_tests {
    use axum::{http::StatusCode, response::IntoResponse};
    use time::macros::date;

    use crate::Error;

    fn status_of(error: Error) -> StatusCode {
        error.into_response().status()
    }

    #[test]
    fn authentication_errors_are_distinct_statuses() {
        assert_eq!(status_of(Error::AuthenticationMissing), StatusCode::UNAUTHORIZED);
        assert_eq!(status_of(Error::AuthenticationInvalid), StatusCode::FORBIDDEN);
        assert_eq!(status_of(Error::AuthorizationDenied), StatusCode::FORBIDDEN);
    }

    #[test]
    fn missing_rows_map_to_not_found() {
        assert_eq!(status_of(Error::NotFound), StatusCode::NOT_FOUND);
        assert_eq!(status_of(Error::UpdateMissingTransaction), StatusCode::NOT_FOUND);
        assert_eq!(status_of(Error::DeleteMissingTransaction), StatusCode::NOT_FOUND);
    }

    #[test]
    fn validation_errors_are_bad_requests() {
        assert_eq!(status_of(Error::MissingParseText), StatusCode::BAD_REQUEST);
        assert_eq!(status_of(Error::EmptyDescription), StatusCode::BAD_REQUEST);
        assert_eq!(status_of(Error::NegativeAmount(-1.0)), StatusCode::BAD_REQUEST);
        assert_eq!(
            status_of(Error::InvalidCategory("Snacks".to_owned())),
            StatusCode::BAD_REQUEST
        );
        assert_eq!(
            status_of(Error::FutureDate(date!(2999 - 01 - 01))),
            StatusCode::BAD_REQUEST
        );
    }

    #[test]
    fn upstream_limits_map_to_too_many_requests() {
        assert_eq!(status_of(Error::RateLimited), StatusCode::TOO_MANY_REQUESTS);
        assert_eq!(status_of(Error::QuotaExhausted), StatusCode::TOO_MANY_REQUESTS);
    }

    #[test]
    fn internal_errors_do_not_leak_detail() {
        let response = Error::LlmError("api key leaked?".to_owned()).into_response();
        assert_eq!(response.status(), StatusCode::INTERNAL_SERVER_ERROR);
    }
}
