//! Raw header normalization.
//!
//! Production extracts arrive with inconsistent headers (`Cliente`,
//! `FechaIngresoEmpleo`, `\u{feff}Edad`, English API field names). Every header
//! is cleaned to lower snake case and matched against a table of known variants.

/// Canonical raw input columns understood by the transformer.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum Column {
    CustomerId,
    UniqueId,
    Age,
    Occupation,
    Employer,
    JobTitle,
    City,
    EmploymentStart,
    AccountStart,
    LoanMaturity,
    Balance,
    MonthlyPayment,
    LoanAmount,
}

const VARIANTS: &[(&str, Column)] = &[
    ("cliente", Column::CustomerId),
    ("customer_id", Column::CustomerId),
    ("customer", Column::CustomerId),
    ("identificador_unico", Column::UniqueId),
    ("unique_id", Column::UniqueId),
    ("identifier", Column::UniqueId),
    ("edad", Column::Age),
    ("age", Column::Age),
    ("ocupacion", Column::Occupation),
    ("occupation", Column::Occupation),
    ("nombreempleadorcliente", Column::Employer),
    ("employer", Column::Employer),
    ("employer_name", Column::Employer),
    ("cargoempleocliente", Column::JobTitle),
    ("job_title", Column::JobTitle),
    ("position", Column::JobTitle),
    ("ciudad", Column::City),
    ("city", Column::City),
    ("fechaingresoempleo", Column::EmploymentStart),
    ("employment_start", Column::EmploymentStart),
    ("fecha_inicio", Column::AccountStart),
    ("account_start", Column::AccountStart),
    ("fecha_vencimiento", Column::LoanMaturity),
    ("loan_maturity", Column::LoanMaturity),
    ("saldo", Column::Balance),
    ("balance", Column::Balance),
    ("monto_letra", Column::MonthlyPayment),
    ("monthly_payment", Column::MonthlyPayment),
    ("payment", Column::MonthlyPayment),
    ("monto_prestamo", Column::LoanAmount),
    ("loan_amount", Column::LoanAmount),
];

impl Column {
    /// Canonical lower-snake-case name
    pub fn as_str(&self) -> &'static str {
        match self {
            Column::CustomerId => "customer_id",
            Column::UniqueId => "unique_id",
            Column::Age => "age",
            Column::Occupation => "occupation",
            Column::Employer => "employer",
            Column::JobTitle => "job_title",
            Column::City => "city",
            Column::EmploymentStart => "employment_start",
            Column::AccountStart => "account_start",
            Column::LoanMaturity => "loan_maturity",
            Column::Balance => "balance",
            Column::MonthlyPayment => "monthly_payment",
            Column::LoanAmount => "loan_amount",
        }
    }

    /// Resolve an already cleaned header
    pub fn from_clean_header(header: &str) -> Option<Column> {
        VARIANTS
            .iter()
            .find(|(variant, _)| *variant == header)
            .map(|(_, column)| *column)
    }
}

/// Clean a raw header: drop BOM, lower-case, spaces to `_`, strip anything
/// outside `[a-z0-9_]`.
pub fn clean_header(raw: &str) -> String {
    raw.trim()
        .trim_start_matches('\u{feff}')
        .trim_start_matches("ï»¿")
        .to_lowercase()
        .replace(' ', "_")
        .chars()
        .filter(|c| c.is_ascii_lowercase() || c.is_ascii_digit() || *c == '_')
        .collect()
}

/// Normalized header: the cleaned name plus the canonical column, if known.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct NormalizedHeader {
    pub name: String,
    pub column: Option<Column>,
}

/// Normalize a full header row.
pub fn normalize_headers<S: AsRef<str>>(headers: &[S]) -> Vec<NormalizedHeader> {
    headers
        .iter()
        .map(|raw| {
            let name = clean_header(raw.as_ref());
            let column = Column::from_clean_header(&name);
            match column {
                Some(column) => NormalizedHeader {
                    name: column.as_str().to_string(),
                    column: Some(column),
                },
                None => NormalizedHeader { name, column: None },
            }
        })
        .collect()
}
