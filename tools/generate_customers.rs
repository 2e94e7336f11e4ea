//! Synthetic Customer Generator
//!
//! Writes a raw customer CSV in the column layout the batch runner accepts,
//! for smoke-testing the pipeline end to end.
//!
//! Usage: `generate_customers [output.csv] [count] [missing_rate] [seed]`

use anyhow::{Context, Result};
use chrono::{Duration, NaiveDate, Utc};
use rand::rngs::StdRng;
use rand::{Rng, SeedableRng};
use tracing::info;

const HEADERS: [&str; 13] = [
    "identificador_unico",
    "cliente",
    "edad",
    "ocupacion",
    "nombreempleadorcliente",
    "cargoempleocliente",
    "ciudad",
    "fechaingresoempleo",
    "fecha_inicio",
    "fecha_vencimiento",
    "saldo",
    "monto_letra",
    "monto_prestamo",
];

const OCCUPATIONS: [&str; 9] = [
    "INGENIERO",
    "CONTADOR",
    "ADMINISTRADOR",
    "VENDEDOR",
    "SECRETARIA",
    "OPERARIO",
    "SUPERVISOR",
    "TECNICO",
    "PILOTO",
];

const EMPLOYERS: [&str; 9] = [
    "GOBIERNO DE COSTA RICA",
    "BANCO NACIONAL",
    "ICE",
    "CCSS",
    "MUNICIPALIDAD",
    "TECH COMPANY SA",
    "COMERCIAL LTDA",
    "SERVICIOS SA",
    "INDEPENDIENTE",
];

const JOB_TITLES: [&str; 6] = ["ANALISTA", "GERENTE", "ASISTENTE", "JEFE", "OPERADOR", "CAJERO"];

const CITIES: [&str; 5] = ["SAN JOSE", "HEREDIA", "ALAJUELA", "CARTAGO", "LIMON"];

/// Random raw customer rows
struct CustomerGenerator {
    rng: StdRng,
    today: NaiveDate,
    counter: u64,
    missing_rate: f64,
}

impl CustomerGenerator {
    fn new(seed: Option<u64>, missing_rate: f64) -> Self {
        let rng = match seed {
            Some(seed) => StdRng::seed_from_u64(seed),
            None => StdRng::from_entropy(),
        };
        Self {
            rng,
            today: Utc::now().date_naive(),
            counter: 0,
            missing_rate,
        }
    }

    fn generate(&mut self) -> Vec<String> {
        self.counter += 1;

        let age: i64 = self.rng.gen_range(19..70);
        let tenure_days = self.rng.gen_range(30..((age - 18) * 365).max(31));
        let account_days = self.rng.gen_range(30..4000);
        let maturity_days = self.rng.gen_range(-200..3000);
        let payment: f64 = self.rng.gen_range(50.0..900.0);
        let balance = payment * self.rng.gen_range(0.5..60.0);
        let loan = balance * self.rng.gen_range(1.0..1.8);

        let row = vec![
            format!("ID{:08}", self.counter),
            format!("CLI{:06}", self.counter),
            age.to_string(),
            self.random_choice(&OCCUPATIONS).to_string(),
            self.random_choice(&EMPLOYERS).to_string(),
            self.random_choice(&JOB_TITLES).to_string(),
            self.random_choice(&CITIES).to_string(),
            self.date(-tenure_days),
            self.date(-account_days),
            self.date(maturity_days),
            format!("{:.2}", balance),
            format!("{:.2}", payment),
            format!("{:.2}", loan),
        ];

        // Blank out some non-identifier cells
        row.into_iter()
            .enumerate()
            .map(|(i, cell)| {
                if i >= 2 && self.rng.gen_bool(self.missing_rate) {
                    String::new()
                } else {
                    cell
                }
            })
            .collect()
    }

    fn date(&self, offset_days: i64) -> String {
        (self.today + Duration::days(offset_days))
            .format("%d/%m/%Y")
            .to_string()
    }

    fn random_choice<'a>(&mut self, choices: &[&'a str]) -> &'a str {
        choices[self.rng.gen_range(0..choices.len())]
    }
}

fn main() -> Result<()> {
    // Initialize logging
    tracing_subscriber::fmt()
        .with_env_filter(
            tracing_subscriber::EnvFilter::from_default_env()
                .add_directive("generate_customers=info".parse()?),
        )
        .init();

    // Parse arguments
    let args: Vec<String> = std::env::args().collect();
    let output = args.get(1).map(|s| s.as_str()).unwrap_or("customers.csv");
    let count: u64 = args.get(2).and_then(|s| s.parse().ok()).unwrap_or(100);
    let missing_rate: f64 = args
        .get(3)
        .and_then(|s| s.parse().ok())
        .unwrap_or(0.05_f64)
        .clamp(0.0, 1.0);
    let seed: Option<u64> = args.get(4).and_then(|s| s.parse().ok());

    info!(
        output = %output,
        count,
        missing_rate,
        seed = ?seed,
        "Generating synthetic customers"
    );

    let mut writer =
        csv::Writer::from_path(output).with_context(|| format!("Failed to create {output}"))?;
    writer.write_record(HEADERS)?;

    let mut generator = CustomerGenerator::new(seed, missing_rate);
    for _ in 0..count {
        writer.write_record(generator.generate())?;
    }
    writer.flush()?;

    info!(output = %output, rows = count, "Customer file written");
    Ok(())
}
