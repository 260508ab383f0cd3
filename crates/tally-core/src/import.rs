//! CSV parsing for ledger sync exports
//!
//! Columns are located by header name, so exports may order them freely and
//! carry extra columns. Required: date, description, amount. Optional:
//! merchant name and an external (ledger) id used for deduplication.

use chrono::NaiveDate;
use csv::{ReaderBuilder, StringRecord};
use std::io::Read;
use tracing::debug;

use crate::error::{Error, Result};
use crate::models::NewTransaction;

const DATE_HEADERS: &[&str] = &["date", "transaction date", "posted date", "post date"];
const DESCRIPTION_HEADERS: &[&str] = &["description", "memo", "payee", "name"];
const AMOUNT_HEADERS: &[&str] = &["amount", "value"];
const MERCHANT_HEADERS: &[&str] = &["merchant", "merchant name", "merchant_name"];
const EXTERNAL_ID_HEADERS: &[&str] = &[
    "id",
    "external id",
    "external_id",
    "transaction id",
    "reference",
];

/// Column positions resolved from a header row
#[derive(Debug, Clone, Copy)]
struct Columns {
    date: usize,
    description: usize,
    amount: usize,
    merchant: Option<usize>,
    external_id: Option<usize>,
}

impl Columns {
    fn from_headers(headers: &StringRecord) -> Result<Self> {
        let find = |names: &[&str]| {
            headers
                .iter()
                .position(|h| names.contains(&h.trim().to_lowercase().as_str()))
        };
        let required = |names: &[&str], what: &str| {
            find(names).ok_or_else(|| Error::InvalidData(format!("CSV has no {} column", what)))
        };

        Ok(Self {
            date: required(DATE_HEADERS, "date")?,
            description: required(DESCRIPTION_HEADERS, "description")?,
            amount: required(AMOUNT_HEADERS, "amount")?,
            merchant: find(MERCHANT_HEADERS),
            external_id: find(EXTERNAL_ID_HEADERS),
        })
    }
}

/// Parse a ledger sync CSV into transaction records
pub fn parse_csv<R: Read>(reader: R) -> Result<Vec<NewTransaction>> {
    let mut rdr = ReaderBuilder::new()
        .has_headers(true)
        .flexible(true)
        .trim(csv::Trim::All)
        .from_reader(reader);

    let columns = Columns::from_headers(rdr.headers()?)?;
    let mut transactions = Vec::new();

    for (i, result) in rdr.records().enumerate() {
        let record = result?;
        // Header is line 1
        let line = i + 2;

        if record.iter().all(|field| field.is_empty()) {
            continue;
        }

        let field = |idx: usize, what: &str| {
            record
                .get(idx)
                .filter(|s| !s.is_empty())
                .ok_or_else(|| Error::InvalidData(format!("line {}: missing {}", line, what)))
        };
        let optional = |idx: Option<usize>| {
            idx.and_then(|i| record.get(i))
                .filter(|s| !s.is_empty())
                .map(|s| s.to_string())
        };

        let date = parse_date(field(columns.date, "date")?)
            .map_err(|e| Error::InvalidData(format!("line {}: {}", line, e)))?;
        let amount = parse_amount(field(columns.amount, "amount")?)
            .map_err(|e| Error::InvalidData(format!("line {}: {}", line, e)))?;
        // An empty description is legal; it normalizes to the unknown token
        let description = record.get(columns.description).unwrap_or("").to_string();

        transactions.push(NewTransaction {
            date,
            description,
            amount,
            merchant_name: optional(columns.merchant),
            external_id: optional(columns.external_id),
        });
    }

    debug!("Parsed {} transactions from CSV", transactions.len());
    Ok(transactions)
}

/// Parse a date in one of the formats banks commonly export
pub fn parse_date(s: &str) -> Result<NaiveDate> {
    let s = s.trim();

    let formats = [
        "%Y-%m-%d", // 2024-01-15
        "%m/%d/%Y", // 01/15/2024
        "%m/%d/%y", // 01/15/24
        "%m-%d-%Y", // 01-15-2024
    ];

    for fmt in formats {
        if let Ok(date) = NaiveDate::parse_from_str(s, fmt) {
            return Ok(date);
        }
    }

    Err(Error::InvalidData(format!("Unable to parse date: {}", s)))
}

/// Parse an amount string, handling currency symbols, commas and
/// accounting-style parentheses
pub fn parse_amount(s: &str) -> Result<f64> {
    let cleaned: String = s
        .trim()
        .replace(['$', ',', ' '], "")
        .replace('(', "-")
        .replace(')', "");

    cleaned
        .parse::<f64>()
        .ok()
        .filter(|a| a.is_finite())
        .ok_or_else(|| Error::InvalidData(format!("Unable to parse amount: {}", s)))
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_parse_date() {
        assert_eq!(
            parse_date("01/15/2024").unwrap(),
            NaiveDate::from_ymd_opt(2024, 1, 15).unwrap()
        );
        assert_eq!(
            parse_date("2024-01-15").unwrap(),
            NaiveDate::from_ymd_opt(2024, 1, 15).unwrap()
        );
        assert!(parse_date("yesterday").is_err());
    }

    #[test]
    fn test_parse_amount() {
        assert_eq!(parse_amount("$1,234.56").unwrap(), 1234.56);
        assert_eq!(parse_amount("-123.45").unwrap(), -123.45);
        assert_eq!(parse_amount("(100.00)").unwrap(), -100.00);
        assert!(parse_amount("NaN").is_err());
    }

    #[test]
    fn test_parse_csv_by_header_name() {
        let csv = "Amount,Description,Date,Merchant,ID\n\
                   -5.75,STARBUCKS #4821 SEATTLE WA,2024-03-14,Starbucks,tx-1\n\
                   2500.00,STRIPE TRANSFER,03/15/2024,,\n";

        let txs = parse_csv(csv.as_bytes()).unwrap();
        assert_eq!(txs.len(), 2);
        assert_eq!(txs[0].description, "STARBUCKS #4821 SEATTLE WA");
        assert_eq!(txs[0].amount, -5.75);
        assert_eq!(txs[0].merchant_name.as_deref(), Some("Starbucks"));
        assert_eq!(txs[0].external_id.as_deref(), Some("tx-1"));
        assert_eq!(txs[1].date, NaiveDate::from_ymd_opt(2024, 3, 15).unwrap());
        assert!(txs[1].merchant_name.is_none());
        assert!(txs[1].external_id.is_none());
    }

    #[test]
    fn test_parse_csv_reports_line() {
        let csv = "date,description,amount\n2024-03-14,ACME,abc\n";
        let err = parse_csv(csv.as_bytes()).unwrap_err().to_string();
        assert!(err.contains("line 2"), "{}", err);
    }

    #[test]
    fn test_parse_csv_requires_columns() {
        let csv = "when,what\n2024-03-14,ACME\n";
        assert!(matches!(
            parse_csv(csv.as_bytes()),
            Err(Error::InvalidData(_))
        ));
    }
}
