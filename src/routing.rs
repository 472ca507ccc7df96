//! Application router configuration with protected and unprotected route definitions.

use axum::{
    Router,
    http::StatusCode,
    middleware,
    response::{IntoResponse, Response},
    routing::{get, post, put},
};

use crate::{
    AppState, Error,
    analytics::{get_category_summary_endpoint, get_summary_endpoint, get_trends_endpoint},
    auth::auth_guard,
    endpoints,
    parser::parse_transaction_endpoint,
    transaction::{
        create_transaction_endpoint, delete_transaction_endpoint, list_transactions_endpoint,
        update_transaction_endpoint,
    },
};

/// Return a router with all the app's routes.
///
/// Every `/api` route except the teapot requires a bearer credential; the
/// unknown-route fallback answers with a JSON 404 body.
pub fn build_router(state: AppState) -> Router {
    let unprotected_routes = Router::new().route(endpoints::COFFEE, get(get_coffee));

    let protected_routes = Router::new()
        .route(endpoints::PARSE, post(parse_transaction_endpoint))
        .route(
            endpoints::TRANSACTIONS,
            post(create_transaction_endpoint).get(list_transactions_endpoint),
        )
        .route(
            endpoints::TRANSACTION,
            put(update_transaction_endpoint).delete(delete_transaction_endpoint),
        )
        .route(endpoints::SUMMARY, get(get_summary_endpoint))
        .route(endpoints::CATEGORIES, get(get_category_summary_endpoint))
        .route(endpoints::TRENDS, get(get_trends_endpoint))
        .layer(middleware::from_fn_with_state(state.clone(), auth_guard));

    protected_routes
        .merge(unprotected_routes)
        .fallback(get_unknown_route)
        .with_state(state)
}

/// Attempt to get a cup of coffee from the server.
async fn get_coffee() -> Response {
    (StatusCode::IM_A_TEAPOT, "I'm a teapot").into_response()
}

/// Answer requests for routes that do not exist with a JSON body.
async fn get_unknown_route() -> Response {
    Error::NotFound.into_response()
}

#[cfg(test)]
mod router_tests {
    use std::sync::Arc;

    use axum_test::TestServer;
    use rusqlite::Connection;
    use serde_json::json;

    use crate::{
        AppState,
        analytics::{FinancialSummary, TrendData},
        auth::StubIdentityProvider,
        endpoints,
        parser::{HeuristicParser, ParseResponse},
        routing::build_router,
        transaction::{DeleteResponse, Transaction},
    };

    fn get_test_server() -> TestServer {
        let conn = Connection::open_in_memory().expect("Could not open database.");
        let state = AppState::new(
            conn,
            Arc::new(StubIdentityProvider::new(&[
                ("alice-token", "alice"),
                ("bob-token", "bob"),
            ])),
            Arc::new(HeuristicParser),
        )
        .expect("Could not create app state.");

        TestServer::new(build_router(state))
    }

    #[tokio::test]
    async fn coffee_is_a_teapot_without_credentials() {
        let server = get_test_server();

        let response = server.get(endpoints::COFFEE).await;

        assert_eq!(response.status_code(), 418);
    }

    #[tokio::test]
    async fn protected_routes_require_a_credential() {
        let server = get_test_server();

        let response = server.get(endpoints::TRANSACTIONS).await;

        response.assert_status_unauthorized();
    }

    #[tokio::test]
    async fn unknown_route_answers_with_json_not_found() {
        let server = get_test_server();

        let response = server.get("/api/does-not-exist").await;

        response.assert_status_not_found();
        let body: serde_json::Value = response.json();
        assert!(body.get("error").is_some());
    }

    #[tokio::test]
    async fn parse_confirm_list_round_trip() {
        let server = get_test_server();

        let parse_response = server
            .post(endpoints::PARSE)
            .add_header("Authorization", "Bearer alice-token")
            .json(&json!({"text": "Coffee at Starbucks $6.50"}))
            .await;
        parse_response.assert_status_ok();
        let candidate: ParseResponse = parse_response.json();

        let create_response = server
            .post(endpoints::TRANSACTIONS)
            .add_header("Authorization", "Bearer alice-token")
            .json(&json!({
                "amount": candidate.parsed.amount,
                "description": candidate.parsed.description,
                "category": candidate.parsed.category,
                "type": candidate.parsed.transaction_type,
                "confidence": candidate.parsed.confidence,
                "client_id": candidate.provisional_id,
            }))
            .await;
        create_response.assert_status(axum::http::StatusCode::CREATED);
        let created: Transaction = create_response.json();
        assert_eq!(created.user_id, "alice");
        assert_eq!(created.amount, 6.50);

        let list_response = server
            .get(endpoints::TRANSACTIONS)
            .add_header("Authorization", "Bearer alice-token")
            .await;
        list_response.assert_status_ok();
        let transactions: Vec<Transaction> = list_response.json();
        assert_eq!(transactions.len(), 1);
        assert_eq!(transactions[0].id, created.id);
    }

    #[tokio::test]
    async fn retried_confirmation_with_same_client_id_conflicts() {
        let server = get_test_server();
        let body = json!({
            "amount": 6.50,
            "description": "Coffee at starbucks",
            "category": "Food & Dining",
            "type": "expense",
            "client_id": "m1abc123xyz",
        });

        let first = server
            .post(endpoints::TRANSACTIONS)
            .add_header("Authorization", "Bearer alice-token")
            .json(&body)
            .await;
        first.assert_status(axum::http::StatusCode::CREATED);

        let retry = server
            .post(endpoints::TRANSACTIONS)
            .add_header("Authorization", "Bearer alice-token")
            .json(&body)
            .await;
        retry.assert_status(axum::http::StatusCode::CONFLICT);
    }

    #[tokio::test]
    async fn unknown_category_label_is_a_bad_request() {
        let server = get_test_server();

        let response = server
            .post(endpoints::TRANSACTIONS)
            .add_header("Authorization", "Bearer alice-token")
            .json(&json!({
                "amount": 5.0,
                "description": "Chips",
                "category": "Snacks",
                "type": "expense",
            }))
            .await;

        response.assert_status_bad_request();
    }

    #[tokio::test]
    async fn update_changes_stored_transaction() {
        let server = get_test_server();
        let created: Transaction = server
            .post(endpoints::TRANSACTIONS)
            .add_header("Authorization", "Bearer alice-token")
            .json(&json!({
                "amount": 10.0,
                "description": "Lunch",
                "category": "Food & Dining",
                "type": "expense",
            }))
            .await
            .json();

        let response = server
            .put(&endpoints::format_endpoint(endpoints::TRANSACTION, created.id))
            .add_header("Authorization", "Bearer alice-token")
            .json(&json!({"amount": 12.5}))
            .await;

        response.assert_status_ok();
        let updated: Transaction = response.json();
        assert_eq!(updated.amount, 12.5);
        assert_eq!(updated.description, "Lunch");
    }

    #[tokio::test]
    async fn deleting_another_users_transaction_is_forbidden_and_unchanged() {
        let server = get_test_server();
        let created: Transaction = server
            .post(endpoints::TRANSACTIONS)
            .add_header("Authorization", "Bearer alice-token")
            .json(&json!({
                "amount": 10.0,
                "description": "Lunch",
                "category": "Food & Dining",
                "type": "expense",
            }))
            .await
            .json();

        let delete_response = server
            .delete(&endpoints::format_endpoint(endpoints::TRANSACTION, created.id))
            .add_header("Authorization", "Bearer bob-token")
            .await;
        delete_response.assert_status_forbidden();

        let transactions: Vec<Transaction> = server
            .get(endpoints::TRANSACTIONS)
            .add_header("Authorization", "Bearer alice-token")
            .await
            .json();
        assert_eq!(transactions.len(), 1);
    }

    #[tokio::test]
    async fn owner_can_delete_their_transaction() {
        let server = get_test_server();
        let created: Transaction = server
            .post(endpoints::TRANSACTIONS)
            .add_header("Authorization", "Bearer alice-token")
            .json(&json!({
                "amount": 10.0,
                "description": "Lunch",
                "category": "Food & Dining",
                "type": "expense",
            }))
            .await
            .json();

        let response = server
            .delete(&endpoints::format_endpoint(endpoints::TRANSACTION, created.id))
            .add_header("Authorization", "Bearer alice-token")
            .await;

        response.assert_status_ok();
        let body: DeleteResponse = response.json();
        assert_eq!(body.deleted, created.id);
    }

    #[tokio::test]
    async fn analytics_round_trip() {
        let server = get_test_server();
        for (amount, category, transaction_type) in [
            (100.0, "Income", "income"),
            (40.0, "Food & Dining", "expense"),
        ] {
            server
                .post(endpoints::TRANSACTIONS)
                .add_header("Authorization", "Bearer alice-token")
                .json(&json!({
                    "amount": amount,
                    "description": "Seed",
                    "category": category,
                    "type": transaction_type,
                }))
                .await
                .assert_status(axum::http::StatusCode::CREATED);
        }

        let summary: FinancialSummary = server
            .get(endpoints::SUMMARY)
            .add_header("Authorization", "Bearer alice-token")
            .await
            .json();
        assert_eq!(summary.total_income, 100.0);
        assert_eq!(summary.total_expenses, 40.0);
        assert_eq!(summary.savings, 60.0);
        assert_eq!(summary.transaction_count, 2);

        let categories: Vec<crate::analytics::CategorySummary> = server
            .get(endpoints::CATEGORIES)
            .add_header("Authorization", "Bearer alice-token")
            .await
            .json();
        assert_eq!(categories.len(), 1);
        assert_eq!(categories[0].percentage, 100.0);

        let trends: Vec<TrendData> = server
            .get(&format!("{}?days=7", endpoints::TRENDS))
            .add_header("Authorization", "Bearer alice-token")
            .await
            .json();
        assert_eq!(trends.len(), 7);
        assert_eq!(trends.last().unwrap().expenses, 40.0);
    }

    #[tokio::test]
    async fn analytics_are_scoped_to_the_requesting_user() {
        let server = get_test_server();
        server
            .post(endpoints::TRANSACTIONS)
            .add_header("Authorization", "Bearer alice-token")
            .json(&json!({
                "amount": 100.0,
                "description": "Salary",
                "category": "Income",
                "type": "income",
            }))
            .await
            .assert_status(axum::http::StatusCode::CREATED);

        let summary: FinancialSummary = server
            .get(endpoints::SUMMARY)
            .add_header("Authorization", "Bearer bob-token")
            .await
            .json();

        assert_eq!(summary.transaction_count, 0);
    }
}
