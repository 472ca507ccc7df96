//! Presentation helpers for money and dates.

use std::sync::OnceLock;

use numfmt::{Formatter, Precision};
use time::{Date, macros::format_description};

/// Format `number` as a dollar amount with two decimal places, e.g. `-$12.30`.
pub fn currency(number: f64) -> String {
    static POSITIVE_FMT: OnceLock<Formatter> = OnceLock::new();

    let positive_fmt = POSITIVE_FMT.get_or_init(|| {
        Formatter::currency("$")
            .unwrap()
            .precision(Precision::Decimals(2))
    });

    static NEGATIVE_FMT: OnceLock<Formatter> = OnceLock::new();

    let negative_fmt = NEGATIVE_FMT.get_or_init(|| {
        Formatter::currency("-$")
            .unwrap()
            .precision(Precision::Decimals(2))
    });

    let mut formatted_string = if number < 0.0 {
        negative_fmt.fmt_string(number.abs())
    } else if number > 0.0 {
        positive_fmt.fmt_string(number)
    } else {
        // Zero is hardcoded as "0", so we must specify the formatted string for zero
        "$0.00".to_owned()
    };

    // numfmt omits the last trailing zero, so we must add it ourselves
    // For example, "12.30" is rendered as "12.3" so we append "0".
    if formatted_string.as_bytes()[formatted_string.len() - 3] != b'.' {
        formatted_string = format!("{formatted_string}0");
    }

    formatted_string
}

/// Format `date` as a short calendar string, e.g. `Oct 5, 2025`.
pub fn short_date(date: Date) -> String {
    let description = format_description!("[month repr:short] [day padding:none], [year]");

    // The description only uses fields a Date always has, so formatting cannot
    // fail.
    date.format(&description)
        .unwrap_or_else(|_| date.to_string())
}

#[cfg(test)]
mod currency_tests {
    use crate::format::currency;

    #[test]
    fn formats_positive_amounts() {
        assert_eq!(currency(6.5), "$6.50");
        assert_eq!(currency(1234.56), "$1,234.56");
    }

    #[test]
    fn formats_negative_amounts() {
        assert_eq!(currency(-12.3), "-$12.30");
    }

    #[test]
    fn formats_zero() {
        assert_eq!(currency(0.0), "$0.00");
    }

    #[test]
    fn pads_missing_trailing_zero() {
        assert_eq!(currency(99.9), "$99.90");
    }
}
