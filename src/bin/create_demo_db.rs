use std::error::Error;
use std::path::Path;
use std::process::exit;

use clap::Parser;
use rusqlite::Connection;
use time::{Duration, OffsetDateTime};

use finsight::{
    format, initialize_db,
    transaction::{Category, Transaction, TransactionType, create_transaction},
};

/// A utility for creating a demo database for the finsight REST API server.
#[derive(Parser, Debug)]
#[command(version, about, long_about = None)]
struct Args {
    /// File path to save the SQLite database to.
    #[arg(long, short)]
    output_path: String,

    /// The user ID that will own the demo transactions.
    #[arg(long, default_value = "demo-user")]
    user_id: String,
}

/// Create and populate a database for manual testing.
fn main() -> Result<(), Box<dyn Error>> {
    let args = Args::parse();

    let output_path = Path::new(&args.output_path);

    match output_path.extension() {
        None => {
            eprintln!("Output path must include a file extension (e.g., 'my_database.db').");
            exit(1);
        }
        Some(extension) if extension.is_empty() => {
            eprintln!("Output path must include a file extension (e.g., 'my_database.db').");
            exit(1);
        }
        _ => {}
    }

    if output_path.is_file() {
        eprintln!("File already exists at {output_path:#?}!");
        exit(1);
    }

    println!("Creating database at {output_path:#?}");
    let conn = Connection::open(output_path)?;

    initialize_db(&conn)?;

    println!("Creating demo transactions for user {:?}...", args.user_id);

    let today = OffsetDateTime::now_utc().date();
    let seed_data = [
        (
            30,
            4500.0,
            "Monthly salary",
            Category::Income,
            TransactionType::Income,
        ),
        (
            28,
            87.12,
            "Whole foods grocery run",
            Category::Shopping,
            TransactionType::Expense,
        ),
        (
            21,
            15.49,
            "Netflix monthly",
            Category::Entertainment,
            TransactionType::Expense,
        ),
        (
            14,
            52.30,
            "Gas fill up",
            Category::Transportation,
            TransactionType::Expense,
        ),
        (
            10,
            120.00,
            "Electricity bill",
            Category::BillsAndUtilities,
            TransactionType::Expense,
        ),
        (
            7,
            23.50,
            "Uber home",
            Category::Transportation,
            TransactionType::Expense,
        ),
        (
            3,
            6.50,
            "Coffee at starbucks",
            Category::FoodAndDining,
            TransactionType::Expense,
        ),
        (
            1,
            20.00,
            "Refund from amazon",
            Category::Income,
            TransactionType::Income,
        ),
    ];

    let mut net = 0.0;

    for (days_ago, amount, description, category, transaction_type) in seed_data {
        let date = today - Duration::days(days_ago);

        let transaction = create_transaction(
            Transaction::build(&args.user_id, amount, description)
                .category(category)
                .transaction_type(transaction_type)
                .date(date),
            &conn,
        )?;

        net += match transaction.transaction_type {
            TransactionType::Income => transaction.amount,
            TransactionType::Expense => -transaction.amount,
        };

        println!(
            "  {} {} {} ({})",
            format::short_date(transaction.date),
            format::currency(transaction.amount),
            transaction.description,
            transaction.category,
        );
    }

    println!("Net over the period: {}", format::currency(net));
    println!("Success!");

    Ok(())
}
