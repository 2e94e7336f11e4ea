//! End-to-end scenarios against the shipped model artifact and mappings

use chrono::{DateTime, Duration, NaiveDate, TimeZone, Utc};
use income_estimator::config::AppConfig;
use income_estimator::error::{ModelArtifactError, PipelineError};
use income_estimator::features::encoder::{Category, FrequencyEncoder, FrequencyMappings};
use income_estimator::features::transformer::{
    FeatureTransformer, ACCOUNT_DAYS, BALANCE_TO_PAYMENT_RATIO, EMPLOYMENT_DAYS, EMPLOYMENT_YEARS,
    OCCUPATION_FREQ, REQUIRED_FEATURES,
};
use income_estimator::features::validator::FeatureSetValidator;
use income_estimator::input::RawTable;
use income_estimator::store::{read_archive, PredictionStore};
use income_estimator::types::prediction::PredictionRecord;
use income_estimator::{CustomerRecord, IncomeService};
use std::io::Write;
use std::path::PathBuf;
use std::sync::Arc;

fn manifest_path(rel: &str) -> PathBuf {
    PathBuf::from(env!("CARGO_MANIFEST_DIR")).join(rel)
}

fn config(data_dir: &std::path::Path) -> AppConfig {
    let mut config = AppConfig::default();
    config.models.artifact_path = manifest_path("models/income_model.json");
    config.models.frequency_mappings_path = manifest_path("models/frequency_mappings.json");
    config.features.reference_date = NaiveDate::from_ymd_opt(2025, 1, 1);
    config.store.data_dir = data_dir.to_path_buf();
    config
}

fn reference() -> NaiveDate {
    NaiveDate::from_ymd_opt(2025, 1, 1).unwrap()
}

fn now() -> DateTime<Utc> {
    Utc.with_ymd_and_hms(2025, 3, 1, 9, 0, 0).unwrap()
}

fn transformer() -> FeatureTransformer {
    let mappings = FrequencyMappings::load(manifest_path("models/frequency_mappings.json")).unwrap();
    FeatureTransformer::new(Arc::new(FrequencyEncoder::new(mappings)))
}

fn engineer() -> CustomerRecord {
    CustomerRecord {
        age: Some(35),
        occupation: Some("INGENIERO".to_string()),
        employer: Some("TECH COMPANY SA".to_string()),
        balance: Some(5000.0),
        monthly_payment: Some(250.0),
        employment_start: NaiveDate::from_ymd_opt(2020, 1, 15),
        account_start: NaiveDate::from_ymd_opt(2019, 6, 1),
        ..CustomerRecord::new(0, "C1")
    }
}

fn raw_table(rows: &[&[&str]]) -> RawTable {
    RawTable::new(
        [
            "Cliente",
            "Identificador_Unico",
            "Edad",
            "Ocupacion",
            "NombreEmpleadorCliente",
            "saldo",
            "monto_letra",
            "FechaIngresoEmpleo",
            "fecha_inicio",
        ]
        .iter()
        .map(|s| s.to_string())
        .collect(),
        rows.iter()
            .map(|r| r.iter().map(|c| c.to_string()).collect())
            .collect(),
    )
}

fn assert_ci_ordering(records: &[PredictionRecord]) {
    for r in records {
        assert!(r.income_lower_90 >= 0.0, "{r:?}");
        assert!(r.income_lower_90 <= r.predicted_income, "{r:?}");
        assert!(r.predicted_income <= r.income_upper_90, "{r:?}");
    }
}

#[test]
fn scenario_engineer_feature_vector() {
    let frame = transformer().transform(&[engineer()], reference());
    let validated = FeatureSetValidator::default().validate(&frame).unwrap();

    let expected: Vec<String> = REQUIRED_FEATURES.iter().map(|s| s.to_string()).collect();
    assert_eq!(validated.names, expected);

    let ratio_pos = REQUIRED_FEATURES.iter().position(|n| *n == BALANCE_TO_PAYMENT_RATIO).unwrap();
    assert_eq!(validated.rows[0][ratio_pos], 20.0);

    let days = (reference() - NaiveDate::from_ymd_opt(2020, 1, 15).unwrap()).num_days() as f64;
    let years = frame.value(0, EMPLOYMENT_YEARS).unwrap() as f64;
    assert!((years - days / 365.25).abs() < 1e-4);
}

#[test]
fn scenario_zero_payment_ratio() {
    let mut record = engineer();
    record.monthly_payment = Some(0.0);
    let frame = transformer().transform(&[record], reference());
    assert_eq!(frame.value(0, BALANCE_TO_PAYMENT_RATIO), Some(0.0));
}

#[test]
fn scenario_unseen_occupation_scores_mapping_minimum() {
    let mut mappings = FrequencyMappings::default();
    mappings.occupation = [("INGENIERO", 150.0), ("CONTADOR", 120.0), ("TECNICO", 45.0)]
        .iter()
        .map(|(k, v)| (k.to_string(), *v))
        .collect();
    let encoder = Arc::new(FrequencyEncoder::new(mappings));
    assert_eq!(encoder.encode(Category::Occupation, Some("ASTRONAUTA")), 45.0);

    let mut record = engineer();
    record.occupation = Some("ASTRONAUTA".to_string());
    let frame = FeatureTransformer::new(encoder).transform(&[record], reference());
    assert_eq!(frame.value(0, OCCUPATION_FREQ), Some(45.0));
}

#[test]
fn scenario_same_day_resubmission_archives_first() {
    let dir = tempfile::tempdir().unwrap();
    let service = IncomeService::from_config(config(dir.path())).unwrap();
    let mut store = PredictionStore::open(dir.path(), 30).unwrap();

    let first = raw_table(&[&["C1", "U1", "35", "INGENIERO", "ICE", "5000", "250", "15/01/2020", "01/06/2019"]]);
    let second = raw_table(&[&["C1", "U1", "35", "INGENIERO", "ICE", "30000", "250", "15/01/2020", "01/06/2019"]]);

    service.run_batch_at(&mut store, &first, "batch_a", now()).unwrap();
    let summary = service
        .run_batch_at(&mut store, &second, "batch_b", now() + Duration::hours(3))
        .unwrap();

    assert_eq!(summary.replaced, 1);
    assert_eq!(store.len(), 1);
    assert_eq!(store.records()[0].batch_id, "batch_b");

    let files = store.archive_files().unwrap();
    assert_eq!(files.len(), 1);
    let archived = read_archive(&files[0]).unwrap();
    assert_eq!(archived[0].reason, "duplicate_replacement");
    assert_eq!(archived[0].record.batch_id, "batch_a");
}

#[test]
fn scenario_missing_dates_still_predict() {
    let dir = tempfile::tempdir().unwrap();
    let service = IncomeService::from_config(config(dir.path())).unwrap();
    let table = raw_table(&[&["C9", "U9", "41", "CONTADOR", "CCSS", "1200", "300", "", ""]]);

    let record = CustomerRecord::parse_table(&table).records.remove(0);
    let frame = transformer().transform(&[record], reference());
    assert_eq!(frame.value(0, EMPLOYMENT_DAYS), Some(1000.0));
    assert_eq!(frame.value(0, ACCOUNT_DAYS), Some(1000.0));

    let scored = service.score_table(&table, now()).unwrap();
    assert_eq!(scored.predictions.len(), 1);
    assert_ci_ordering(&scored.predictions);
}

#[test]
fn scenario_low_prediction_floors_lower_bound() {
    let dir = tempfile::tempdir().unwrap();
    let service = IncomeService::from_config(config(dir.path())).unwrap();
    let (lower_offset, _) = service.engine().offsets();
    assert_eq!(lower_offset, -510.93);

    let estimate = service.engine().interval(100.0);
    assert_eq!(estimate.predicted_income, 100.0);
    assert_eq!(estimate.lower, 0.0);
    assert_eq!(estimate.upper, 855.02);
}

#[test]
fn dedup_is_idempotent_across_batch_ids() {
    let dir = tempfile::tempdir().unwrap();
    let service = IncomeService::from_config(config(dir.path())).unwrap();
    let mut store = PredictionStore::open(dir.path(), 30).unwrap();
    let table = raw_table(&[
        &["C1", "U1", "35", "INGENIERO", "ICE", "5000", "250", "15/01/2020", "01/06/2019"],
        &["C2", "U2", "52", "VENDEDOR", "CCSS", "20000", "800", "01/02/2005", "01/06/2010"],
        &["C3", "U3", "24", "PILOTO", "", "300", "0", "", ""],
    ]);

    service.run_batch_at(&mut store, &table, "id1", now()).unwrap();
    service.run_batch_at(&mut store, &table, "id2", now()).unwrap();

    assert_eq!(store.len(), 3);
    assert!(store.records().iter().all(|r| r.batch_id == "id2"));
    assert_ci_ordering(store.records());
}

#[test]
fn retention_sweep_archives_everything_older_than_window() {
    let dir = tempfile::tempdir().unwrap();
    let service = IncomeService::from_config(config(dir.path())).unwrap();
    let mut store = PredictionStore::open(dir.path(), 30).unwrap();
    let table = raw_table(&[&["C1", "U1", "35", "INGENIERO", "ICE", "5000", "250", "15/01/2020", "01/06/2019"]]);

    let old = now() - Duration::days(120);
    service.run_batch_at(&mut store, &table, "old", old).unwrap();
    let other = raw_table(&[&["C2", "U2", "44", "CONTADOR", "ICE", "9000", "450", "15/01/2015", "01/06/2012"]]);
    let summary = service.run_batch_at(&mut store, &other, "new", now()).unwrap();

    assert_eq!(summary.expired, 1);
    let cutoff = now().naive_utc() - Duration::days(90);
    assert!(store.records().iter().all(|r| r.prediction_date >= cutoff));

    let archived: Vec<_> = store
        .archive_files()
        .unwrap()
        .iter()
        .flat_map(|p| read_archive(p).unwrap())
        .collect();
    assert_eq!(archived.len(), 1);
    assert_eq!(archived[0].reason, "cleanup_90days");
    assert_eq!(archived[0].record.identifier(), "U1");
}

#[test]
fn validator_names_exactly_the_missing_features() {
    let mut frame = transformer().transform(&[engineer()], reference());
    frame.remove(EMPLOYMENT_YEARS);
    frame.remove(OCCUPATION_FREQ);

    let err = FeatureSetValidator::default().validate(&frame).unwrap_err();
    assert_eq!(err.missing, vec![OCCUPATION_FREQ.to_string(), EMPLOYMENT_YEARS.to_string()]);
}

#[test]
fn csv_file_end_to_end() {
    let dir = tempfile::tempdir().unwrap();
    let input = dir.path().join("customers.csv");
    let mut file = std::fs::File::create(&input).unwrap();
    writeln!(file, "\u{feff}Cliente,Edad,Ocupacion,saldo,monto_letra,FechaIngresoEmpleo").unwrap();
    writeln!(file, "C1,35,ingeniero,5000,250,15/01/2020").unwrap();
    writeln!(file, "C2,not-a-number,,12000,0,2018-03-01").unwrap();
    drop(file);

    let data_dir = dir.path().join("store");
    let service = IncomeService::from_config(config(&data_dir)).unwrap();
    let scored = service.score_file(&input, now()).unwrap();

    assert_eq!(scored.submitted, 2);
    assert_eq!(scored.predictions.len(), 2);
    assert_eq!(scored.warnings.len(), 1);
    assert_eq!(scored.warnings[0].field, "age");
    assert_ci_ordering(&scored.predictions);
}

#[test]
fn missing_input_file_is_input_error() {
    let dir = tempfile::tempdir().unwrap();
    let service = IncomeService::from_config(config(dir.path())).unwrap();
    let err = service.score_file(dir.path().join("absent.csv"), now()).unwrap_err();
    assert!(matches!(err, PipelineError::Input(_)));
}

#[test]
fn artifact_without_matching_features_fails_whole_batch() {
    let dir = tempfile::tempdir().unwrap();
    let artifact = dir.path().join("model.json");
    std::fs::write(
        &artifact,
        r#"{"model": {"trees": [{"nodeid": 0, "leaf": 900.0}]}, "feature_names": ["edad", "saldo"]}"#,
    )
    .unwrap();
    let mut cfg = config(dir.path());
    cfg.models.artifact_path = artifact;

    let service = IncomeService::from_config(cfg).unwrap();
    let table = raw_table(&[&["C1", "U1", "35", "INGENIERO", "ICE", "5000", "250", "15/01/2020", "01/06/2019"]]);
    let err = service.score_table(&table, now()).unwrap_err();
    assert!(matches!(
        err,
        PipelineError::Artifact(ModelArtifactError::FeatureMismatch { .. })
    ));
}
