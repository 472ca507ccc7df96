//! Turning free-text descriptions into structured transaction candidates.
//!
//! The default parser is a pure keyword heuristic: reproducible, offline, and
//! incapable of failing. A hosted-LLM parser (see [llm]) sits behind the same
//! [TransactionParser] trait for deployments that want it. Either way the
//! output is a candidate the user confirms or discards, never a committed
//! record.

use std::sync::OnceLock;

use async_trait::async_trait;
use axum::{Json, extract::State, response::{IntoResponse, Response}};
use regex::Regex;
use serde::{Deserialize, Serialize};

use crate::{
    Error,
    app_state::ParseState,
    client_id,
    transaction::{Category, TransactionType},
};

pub mod llm;

/// The structured guess extracted from one free-text description.
///
/// Ephemeral: shown to the user for confirmation and then discarded. Only a
/// confirmed candidate becomes a stored transaction.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ParsedTransaction {
    /// The non-negative magnitude found in the text, 0 when absent.
    pub amount: f64,
    /// The input with the amount token and dashes stripped, cleaned up for
    /// display.
    pub description: String,
    /// The best-guess category.
    pub category: Category,
    /// Income if the text contains an income keyword, expense otherwise.
    #[serde(rename = "type")]
    pub transaction_type: TransactionType,
    /// How sure the parser is, 0..1. Display only.
    pub confidence: f64,
}

/// A collaborator that turns one free-text description into a candidate
/// transaction.
#[async_trait]
pub trait TransactionParser: Send + Sync {
    /// Parse `text` into a candidate.
    ///
    /// # Errors
    /// The heuristic implementation never errors; remote implementations may
    /// surface [Error::RateLimited], [Error::QuotaExhausted],
    /// [Error::ParseFailure] or [Error::LlmError].
    async fn parse(&self, text: &str) -> Result<ParsedTransaction, Error>;
}

// ============================================================================
// HEURISTIC PARSER
// ============================================================================

/// Words that mark a description as income rather than an expense.
///
/// The income check deliberately wins over the category table below: a text
/// containing both "paid" and "amazon" is income, not shopping.
const INCOME_KEYWORDS: [&str; 5] = ["salary", "paid", "income", "bonus", "refund"];

/// The ordered keyword table used to guess a category.
///
/// Matching is case-insensitive substring search; the first hit wins, so the
/// order of this table is part of the contract.
const CATEGORY_KEYWORDS: [(&str, Category); 24] = [
    ("coffee", Category::FoodAndDining),
    ("starbucks", Category::FoodAndDining),
    ("restaurant", Category::FoodAndDining),
    ("food", Category::FoodAndDining),
    ("lunch", Category::FoodAndDining),
    ("dinner", Category::FoodAndDining),
    ("panda express", Category::FoodAndDining),
    ("gas", Category::Transportation),
    ("uber", Category::Transportation),
    ("lyft", Category::Transportation),
    ("amazon", Category::Shopping),
    ("target", Category::Shopping),
    ("walmart", Category::Shopping),
    ("grocery", Category::Shopping),
    ("whole foods", Category::Shopping),
    ("netflix", Category::Entertainment),
    ("spotify", Category::Entertainment),
    ("movie", Category::Entertainment),
    ("samsung", Category::Shopping),
    ("electronics", Category::Shopping),
    ("watch", Category::Shopping),
    ("salary", Category::Income),
    ("paid", Category::Income),
    ("paycheck", Category::Income),
];

/// Matches a dollar amount such as `$6.50`, `6.50` or `4500`.
fn amount_regex() -> &'static Regex {
    static AMOUNT_RE: OnceLock<Regex> = OnceLock::new();

    AMOUNT_RE.get_or_init(|| Regex::new(r"\$?(\d+(?:\.\d{2})?)").unwrap())
}

/// Parse `input` into a candidate transaction with the keyword heuristic.
///
/// This function never fails: absent information degrades to defaults (amount
/// 0, [Category::Other], expense, lower confidence) instead of erroring, and
/// the same input always yields the same output. Correctness review is pushed
/// to the human confirmation step.
pub fn parse_text(input: &str) -> ParsedTransaction {
    let text = input.trim().to_lowercase();

    let amount = amount_regex()
        .captures(&text)
        .and_then(|captures| captures.get(1))
        .and_then(|token| token.as_str().parse::<f64>().ok())
        .unwrap_or(0.0);

    let is_income = INCOME_KEYWORDS.iter().any(|keyword| text.contains(keyword));

    let mut category = Category::Other;
    let mut confidence = 0.6;

    for (keyword, keyword_category) in CATEGORY_KEYWORDS {
        if text.contains(keyword) {
            category = keyword_category;
            confidence = 0.9;
            break;
        }
    }

    // The income check wins over the keyword table.
    if is_income {
        category = Category::Income;
        confidence = 0.95;
    }

    ParsedTransaction {
        amount,
        description: clean_description(input),
        category,
        transaction_type: if is_income {
            TransactionType::Income
        } else {
            TransactionType::Expense
        },
        confidence,
    }
}

/// Strip amount tokens and dashes from `input`, collapse whitespace, and
/// capitalize the first letter. Falls back to "Transaction" when nothing is
/// left.
fn clean_description(input: &str) -> String {
    let without_amounts = amount_regex().replace_all(input, "");

    let cleaned = without_amounts
        .chars()
        .filter(|c| !matches!(c, '-' | '–' | '—'))
        .collect::<String>()
        .split_whitespace()
        .collect::<Vec<_>>()
        .join(" ")
        .to_lowercase();

    if cleaned.is_empty() {
        return "Transaction".to_owned();
    }

    let mut chars = cleaned.chars();
    match chars.next() {
        Some(first) => first.to_uppercase().collect::<String>() + chars.as_str(),
        None => "Transaction".to_owned(),
    }
}

/// The default [TransactionParser]: the pure keyword heuristic.
#[derive(Debug, Clone, Default)]
pub struct HeuristicParser;

#[async_trait]
impl TransactionParser for HeuristicParser {
    async fn parse(&self, text: &str) -> Result<ParsedTransaction, Error> {
        Ok(parse_text(text))
    }
}

// ============================================================================
// ROUTE HANDLER
// ============================================================================

/// The request body for the parse endpoint.
#[derive(Debug, Deserialize)]
pub struct ParseRequest {
    /// The free-text transaction description to parse.
    #[serde(default)]
    pub text: String,
}

/// The response body for the parse endpoint: the candidate plus a provisional
/// ID the client echoes back on confirmation so retries can be deduplicated.
#[derive(Debug, Serialize, Deserialize)]
pub struct ParseResponse {
    /// The parsed candidate.
    #[serde(flatten)]
    pub parsed: ParsedTransaction,
    /// A provisional ID for the candidate. Not the record identity.
    pub provisional_id: String,
}

/// A route handler that parses free text into a transaction candidate.
///
/// Returns 400 when the text is empty or missing.
pub async fn parse_transaction_endpoint(
    State(state): State<ParseState>,
    Json(request): Json<ParseRequest>,
) -> Response {
    if request.text.trim().is_empty() {
        return Error::MissingParseText.into_response();
    }

    match state.parser.parse(&request.text).await {
        Ok(parsed) => Json(ParseResponse {
            parsed,
            provisional_id: client_id::generate(),
        })
        .into_response(),
        Err(error) => error.into_response(),
    }
}

// ============================================================================
// TESTS
// ============================================================================

#[cfg(test)]
mod heuristic_tests {
    use crate::{
        parser::parse_text,
        transaction::{Category, TransactionType},
    };

    #[test]
    fn parses_expense_with_category_keyword() {
        let parsed = parse_text("Coffee at Starbucks $6.50");

        assert_eq!(parsed.amount, 6.50);
        assert_eq!(parsed.category, Category::FoodAndDining);
        assert_eq!(parsed.transaction_type, TransactionType::Expense);
        assert_eq!(parsed.confidence, 0.9);
        assert_eq!(parsed.description, "Coffee at starbucks");
    }

    #[test]
    fn parses_income_with_higher_confidence() {
        let parsed = parse_text("Monthly salary $4500");

        assert_eq!(parsed.amount, 4500.0);
        assert_eq!(parsed.category, Category::Income);
        assert_eq!(parsed.transaction_type, TransactionType::Income);
        assert_eq!(parsed.confidence, 0.95);
        assert_eq!(parsed.description, "Monthly salary");
    }

    #[test]
    fn income_keyword_wins_over_category_keyword() {
        let parsed = parse_text("Paid back by a friend for the amazon order $20.00");

        assert_eq!(parsed.category, Category::Income);
        assert_eq!(parsed.transaction_type, TransactionType::Income);
        assert_eq!(parsed.confidence, 0.95);
    }

    #[test]
    fn first_matching_keyword_in_table_order_wins() {
        // "coffee" precedes "movie" in the table.
        let parsed = parse_text("coffee before the movie $12.00");

        assert_eq!(parsed.category, Category::FoodAndDining);
    }

    #[test]
    fn absent_information_degrades_to_defaults() {
        let parsed = parse_text("mystery purchase");

        assert_eq!(parsed.amount, 0.0);
        assert_eq!(parsed.category, Category::Other);
        assert_eq!(parsed.transaction_type, TransactionType::Expense);
        assert_eq!(parsed.confidence, 0.6);
        assert_eq!(parsed.description, "Mystery purchase");
    }

    #[test]
    fn amount_without_currency_symbol_is_extracted() {
        let parsed = parse_text("uber home 23.50");

        assert_eq!(parsed.amount, 23.50);
        assert_eq!(parsed.category, Category::Transportation);
    }

    #[test]
    fn dashes_and_amount_tokens_are_stripped_from_description() {
        let parsed = parse_text("Netflix — monthly - $15.49");

        assert_eq!(parsed.description, "Netflix monthly");
        assert_eq!(parsed.category, Category::Entertainment);
    }

    #[test]
    fn empty_description_falls_back_to_placeholder() {
        let parsed = parse_text("$42.00");

        assert_eq!(parsed.amount, 42.0);
        assert_eq!(parsed.description, "Transaction");
    }

    #[test]
    fn parsing_is_idempotent() {
        let input = "Whole Foods grocery run $87.12";

        assert_eq!(parse_text(input), parse_text(input));
    }
}

#[cfg(test)]
mod endpoint_tests {
    use std::sync::Arc;

    use axum::{Router, routing::post};
    use axum_test::TestServer;
    use serde_json::json;

    use crate::{
        app_state::ParseState,
        endpoints,
        parser::{HeuristicParser, ParseResponse, parse_transaction_endpoint},
    };

    fn get_test_server() -> TestServer {
        let state = ParseState {
            parser: Arc::new(HeuristicParser),
        };

        let app = Router::new()
            .route(endpoints::PARSE, post(parse_transaction_endpoint))
            .with_state(state);

        TestServer::new(app)
    }

    #[tokio::test]
    async fn parse_endpoint_returns_candidate_with_provisional_id() {
        let server = get_test_server();

        let response = server
            .post(endpoints::PARSE)
            .json(&json!({"text": "Coffee at Starbucks $6.50"}))
            .await;

        response.assert_status_ok();
        let body: ParseResponse = response.json();
        assert_eq!(body.parsed.amount, 6.50);
        assert!(!body.provisional_id.is_empty());
    }

    #[tokio::test]
    async fn parse_endpoint_rejects_empty_text() {
        let server = get_test_server();

        let response = server.post(endpoints::PARSE).json(&json!({"text": "  "})).await;

        response.assert_status_bad_request();
    }

    #[tokio::test]
    async fn parse_endpoint_rejects_missing_text_field() {
        let server = get_test_server();

        let response = server.post(endpoints::PARSE).json(&json!({})).await;

        response.assert_status_bad_request();
    }
}
