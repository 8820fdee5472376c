//! Document number allocation.
//!
//! Numbers are drawn from `document_counters`, one atomic counter per
//! prefix and year, incremented with a single upsert inside the creating
//! transaction. Concurrent allocations serialize on the counter row, so
//! numbers are unique without scanning the last issued record.

use chrono::Datelike;
use sqlx::PgConnection;

pub const INVOICE_PREFIX: &str = "INV";
pub const PAYMENT_PREFIX: &str = "PAY";
pub const REFUND_PREFIX: &str = "REF";

/// Allocate the next number for `prefix` in the given year, e.g.
/// `INV-2026-000042`.
pub async fn next_document_number(
    conn: &mut PgConnection,
    prefix: &str,
    date: chrono::NaiveDate,
) -> Result<String, sqlx::Error> {
    let year = date.year();
    let period = year.to_string();

    let value: i64 = sqlx::query_scalar(
        r#"
        INSERT INTO document_counters (prefix, period, value)
        VALUES ($1, $2, 1)
        ON CONFLICT (prefix, period)
        DO UPDATE SET value = document_counters.value + 1
        RETURNING value
        "#,
    )
    .bind(prefix)
    .bind(&period)
    .fetch_one(conn)
    .await?;

    Ok(format_document_number(prefix, year, value))
}

fn format_document_number(prefix: &str, year: i32, value: i64) -> String {
    format!("{prefix}-{year}-{value:06}")
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn formats_with_zero_padding() {
        assert_eq!(format_document_number("INV", 2026, 1), "INV-2026-000001");
        assert_eq!(format_document_number("PAY", 2026, 42), "PAY-2026-000042");
        assert_eq!(format_document_number("REF", 2025, 123456), "REF-2025-123456");
    }

    #[test]
    fn wide_counters_keep_growing_past_padding() {
        assert_eq!(
            format_document_number("INV", 2026, 1_234_567),
            "INV-2026-1234567"
        );
    }
}
