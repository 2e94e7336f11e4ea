//! Raw customer records

use crate::features::columns::{normalize_headers, Column};
use crate::input::RawTable;
use chrono::{NaiveDate, NaiveDateTime};
use serde::{Deserialize, Serialize};
use tracing::warn;

/// One raw input row, parsed and normalized. Immutable once built.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct CustomerRecord {
    /// Position of the row in its input table
    pub row_index: usize,
    /// Primary customer id (`cliente`)
    pub customer_id: Option<String>,
    /// Unique identifier (`identificador_unico`)
    pub unique_id: Option<String>,
    /// Age in years
    pub age: Option<i32>,
    /// Occupation, upper-cased
    pub occupation: Option<String>,
    /// Employer name, upper-cased
    pub employer: Option<String>,
    /// Job title, upper-cased
    pub job_title: Option<String>,
    /// City, upper-cased
    pub city: Option<String>,
    /// Employment start date
    pub employment_start: Option<NaiveDate>,
    /// Account opening date
    pub account_start: Option<NaiveDate>,
    /// Loan maturity date
    pub loan_maturity: Option<NaiveDate>,
    /// Account balance
    pub balance: Option<f64>,
    /// Monthly loan payment
    pub monthly_payment: Option<f64>,
    /// Loan principal
    pub loan_amount: Option<f64>,
}

/// A single field that failed to parse. The row continues with the field unset.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct FieldWarning {
    pub row_index: usize,
    pub field: &'static str,
    pub value: String,
}

/// Records parsed from one input table plus the field-level warnings.
#[derive(Debug, Clone, Default)]
pub struct ParsedBatch {
    pub records: Vec<CustomerRecord>,
    pub warnings: Vec<FieldWarning>,
}

impl CustomerRecord {
    /// Create a record with identifiers only
    pub fn new(row_index: usize, customer_id: impl Into<String>) -> Self {
        Self {
            row_index,
            customer_id: Some(customer_id.into()),
            ..Default::default()
        }
    }

    /// Identifier used for storage: unique id, then customer id.
    pub fn identifier(&self) -> Option<&str> {
        self.unique_id.as_deref().or(self.customer_id.as_deref())
    }

    /// Parse every row of a raw table.
    pub fn parse_table(table: &RawTable) -> ParsedBatch {
        let headers = normalize_headers(&table.headers);
        let mut batch = ParsedBatch::default();

        for (offset, row) in table.rows.iter().enumerate() {
            let row_index = table.first_row + offset;
            let mut record = CustomerRecord {
                row_index,
                ..Default::default()
            };

            for (header, cell) in headers.iter().zip(row.iter()) {
                let Some(column) = header.column else {
                    continue;
                };
                if let Err(value) = record.set_field(column, cell) {
                    warn!(
                        row = row_index,
                        field = column.as_str(),
                        value = %value,
                        "Field failed to parse, using default"
                    );
                    batch.warnings.push(FieldWarning {
                        row_index,
                        field: column.as_str(),
                        value,
                    });
                }
            }
            batch.records.push(record);
        }

        batch
    }

    /// Assign one raw cell. Blank cells leave the field unset; an unparsable
    /// cell leaves it unset and returns the offending text.
    fn set_field(&mut self, column: Column, raw: &str) -> Result<(), String> {
        let cell = raw.trim();
        if is_blank(cell) {
            return Ok(());
        }
        let fail = || cell.to_string();

        match column {
            Column::CustomerId => self.customer_id = Some(cell.to_string()),
            Column::UniqueId => self.unique_id = Some(cell.to_string()),
            Column::Age => self.age = Some(parse_age(cell).ok_or_else(fail)?),
            Column::Occupation => self.occupation = Some(normalize_category(cell)),
            Column::Employer => self.employer = Some(normalize_category(cell)),
            Column::JobTitle => self.job_title = Some(normalize_category(cell)),
            Column::City => self.city = Some(normalize_category(cell)),
            Column::EmploymentStart => {
                self.employment_start = Some(parse_date(cell).ok_or_else(fail)?)
            }
            Column::AccountStart => self.account_start = Some(parse_date(cell).ok_or_else(fail)?),
            Column::LoanMaturity => self.loan_maturity = Some(parse_date(cell).ok_or_else(fail)?),
            Column::Balance => self.balance = Some(parse_amount(cell).ok_or_else(fail)?),
            Column::MonthlyPayment => {
                self.monthly_payment = Some(parse_amount(cell).ok_or_else(fail)?)
            }
            Column::LoanAmount => self.loan_amount = Some(parse_amount(cell).ok_or_else(fail)?),
        }
        Ok(())
    }
}

fn is_blank(cell: &str) -> bool {
    cell.is_empty()
        || cell.eq_ignore_ascii_case("nan")
        || cell.eq_ignore_ascii_case("null")
        || cell.eq_ignore_ascii_case("none")
}

/// Strip surrounding whitespace and upper-case.
pub fn normalize_category(value: &str) -> String {
    value.trim().to_uppercase()
}

/// Parse a date as `DD/MM/YYYY`, then ISO `YYYY-MM-DD`, then an ISO timestamp.
pub fn parse_date(value: &str) -> Option<NaiveDate> {
    let value = value.trim();
    NaiveDate::parse_from_str(value, "%d/%m/%Y")
        .or_else(|_| NaiveDate::parse_from_str(value, "%Y-%m-%d"))
        .ok()
        .or_else(|| {
            NaiveDateTime::parse_from_str(value, "%Y-%m-%d %H:%M:%S")
                .or_else(|_| NaiveDateTime::parse_from_str(value, "%Y-%m-%dT%H:%M:%S"))
                .ok()
                .map(|dt| dt.date())
        })
}

fn parse_amount(value: &str) -> Option<f64> {
    value.parse::<f64>().ok().filter(|v| v.is_finite())
}

fn parse_age(value: &str) -> Option<i32> {
    value.parse::<i32>().ok().or_else(|| {
        parse_amount(value)
            .filter(|v| v.fract() == 0.0 && v.abs() < i32::MAX as f64)
            .map(|v| v as i32)
    })
}
