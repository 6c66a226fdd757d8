// Unit and scenario tests for the pipeline stages.
// S3, the secret store and Postgres are replaced by the in-memory fakes in tests/fakes.rs;
// the dataset download is served by wiremock. The Postgres test only runs when a test
// database URL is provided.


use crate::aggregate::{aggregate, AggregationColumns, CategoryTotals};
use crate::config::{Config, Stage};
use crate::error::{CsvParseError, LocatorError, PipelineError, WriteError};
use crate::event::AggregateTrigger;
use crate::locator;
use crate::pipeline::{handle_aggregate, handle_download, AggregationDeps, DownloadDeps};
use crate::{schema, source, writer};
use fakes::{FakeDatabase, FakeObjectStore, FakeSecretStore};
use serde_json::json;
use sqlx::{Connection, PgConnection};
use std::path::PathBuf;
use std::sync::atomic::Ordering;
use wiremock::matchers::{method, path};
use wiremock::{Mock, MockServer, ResponseTemplate};

const BUCKET: &str = "desafio-embarca-20240101";

// Each test stages its CSV in its own file so tests can run in parallel.
fn scratch_path(name: &str) -> PathBuf {
    std::env::temp_dir().join(format!("accident-stats-{}-{}", std::process::id(), name))
}

fn test_config(name: &str) -> Config {
    let mut config = Config::new();
    config.bucket_prefix = "desafio-embarca".to_string();
    config.csv_file = scratch_path(&format!("{name}.csv")).display().to_string();
    config.road_column = "trecho".to_string();
    config.deaths_column = "mortos".to_string();
    config.vehicle_categories = vec!["automovel".to_string()];
    config
}

fn track(config: &mut Config, categories: &str) {
    config.vehicle_categories = crate::config::parse_categories(categories);
}

fn scenario_columns() -> AggregationColumns {
    AggregationColumns {
        road: "trecho".to_string(),
        deaths: "mortos".to_string(),
        categories: vec!["automovel".to_string()],
    }
}

#[test]
fn test_config_validation_valid() {
    // Test that a valid configuration passes validation.
    let config = test_config("valid");
    assert!(config.validate().is_ok());
}

#[test]
fn test_config_validation_empty_prefix() {
    // Test that an empty bucket prefix fails validation with appropriate error.
    let mut config = test_config("empty-prefix");
    config.bucket_prefix = "".to_string();
    let error_msg = config.validate().unwrap_err().to_string();
    assert!(error_msg.contains("S3 bucket prefix must not be empty"));
}

#[test]
fn test_config_validation_duplicate_category() {
    // Tracking a category twice would double-count it.
    let mut config = test_config("duplicate-category");
    config.vehicle_categories = vec!["moto".to_string(), "moto".to_string()];
    let error_msg = config.validate().unwrap_err().to_string();
    assert!(error_msg.contains("listed twice"));
}

#[test]
fn test_config_stage_parsing() {
    let mut config = test_config("stage");
    config.stage = "Download".to_string();
    assert_eq!(config.stage().unwrap(), Stage::Download);
    config.stage = "transform".to_string();
    assert!(config.validate().is_err());
}

#[test]
fn test_default_categories_require_every_column() {
    let mut config = test_config("defaults");
    track(&mut config, crate::config::DEFAULT_VEHICLE_CATEGORIES);
    let columns = AggregationColumns::from_config(&config);
    let csv = "trecho,automovel,mortos\nRJ-101,1,3\n";
    let err = aggregate(csv.as_bytes(), &columns).unwrap_err();
    assert!(matches!(err, CsvParseError::MissingColumn(ref c) if c == "bicicleta"));
}

#[tokio::test]
async fn test_locator_returns_first_prefix_match_in_listing_order() {
    let store =
        FakeObjectStore::with_containers(&["logs", "desafio-embarca-b", "desafio-embarca-a"]);
    let first = locator::resolve(&store, "desafio-embarca").await.unwrap();
    let second = locator::resolve(&store, "desafio-embarca").await.unwrap();
    assert_eq!(first.resolved_container, "desafio-embarca-b");
    assert_eq!(first, second);
}

#[tokio::test]
async fn test_locator_no_matching_container() {
    // Both an empty listing and a listing without a match are NoMatchingContainer.
    for containers in [vec![], vec!["other-bucket"]] {
        let store = FakeObjectStore::with_containers(&containers);
        let err = locator::resolve(&store, "desafio-embarca").await.unwrap_err();
        assert!(matches!(err, LocatorError::NoMatchingContainer { .. }));
    }
}

#[tokio::test]
async fn test_locator_listing_failure_is_unavailable() {
    let store = FakeObjectStore {
        listing_error: Some("ExpiredToken".to_string()),
        ..FakeObjectStore::default()
    };
    let err = locator::resolve(&store, "desafio-embarca").await.unwrap_err();
    assert!(matches!(err, LocatorError::Unavailable(ref m) if m == "ExpiredToken"));
}

#[test]
fn test_scenario_a_single_row_totals() {
    let csv = "trecho,automovel,mortos\nRJ-101,1,3\n";
    let totals = aggregate(csv.as_bytes(), &scenario_columns()).unwrap();
    let mut expected = CategoryTotals::new();
    expected.add("automovel", "RJ-101", 3);
    assert_eq!(totals, expected);
}

#[test]
fn test_scenario_b_zero_category_contributes_nothing() {
    let csv = "trecho,automovel,mortos\nRJ-101,0,5\n";
    let totals = aggregate(csv.as_bytes(), &scenario_columns()).unwrap();
    assert!(totals.is_empty());
}

#[test]
fn test_non_numeric_deaths_is_a_parse_error() {
    let csv = "trecho,automovel,mortos\nRJ-101,1,três\n";
    let err = aggregate(csv.as_bytes(), &scenario_columns()).unwrap_err();
    match err {
        CsvParseError::InvalidInteger { line, column, value } => {
            assert_eq!(line, 2);
            assert_eq!(column, "mortos");
            assert_eq!(value, "três");
        }
        other => panic!("unexpected error: {other}"),
    }
}

#[test]
fn test_aggregate_trigger_requires_file_key() {
    let err = AggregateTrigger::from_payload(&json!({ "bucket_name": BUCKET })).unwrap_err();
    assert_eq!(err.to_string(), "missing required information: 'file_key'");
    assert!(AggregateTrigger::from_payload(&json!({ "file_key": 42 })).is_err());
    let trigger = AggregateTrigger::from_payload(&json!({ "file_key": "acidentes.csv" })).unwrap();
    assert_eq!(trigger.bucket_name, None);
}

#[test]
fn test_status_codes_by_error_kind() {
    let input: PipelineError = crate::error::InputError::MissingField("file_key").into();
    let parse: PipelineError = CsvParseError::MissingHeader.into();
    assert_eq!(input.status_code(), 400);
    assert_eq!(parse.status_code(), 500);
}

#[test]
fn test_file_name_from_link() {
    assert_eq!(
        source::file_name_from_link("https://dados.example.gov.br/acidentes/demostrativo.csv")
            .unwrap(),
        "demostrativo.csv"
    );
    assert!(source::file_name_from_link("https://dados.example.gov.br/acidentes/").is_err());
}

#[test]
fn test_link_file_without_link_key_is_input_error() {
    let file = scratch_path("nolink.yml");
    std::fs::write(&file, "url: https://example.com/a.csv\n").unwrap();
    let err = source::read_link_file(&file.display().to_string()).unwrap_err();
    assert_eq!(err.status_code(), 400);

    std::fs::write(&file, "link: [unterminated\n").unwrap();
    let err = source::read_link_file(&file.display().to_string()).unwrap_err();
    assert!(matches!(err, PipelineError::LinkFile(_)));
    let _ = std::fs::remove_file(file);
}

#[tokio::test]
async fn test_scenario_a_end_to_end_inserts_one_record() {
    let config = test_config("scenario-a");
    let store = FakeObjectStore::with_containers(&[BUCKET]);
    store.insert(BUCKET, "acidentes.csv", "trecho,automovel,mortos\nRJ-101,1,3\n");
    let secrets = FakeSecretStore::default();
    let database = FakeDatabase::default();
    let deps = AggregationDeps {
        store: &store,
        secrets: &secrets,
        database: &database,
    };

    let response = handle_aggregate(&config, &deps, &json!({ "file_key": "acidentes.csv" })).await;

    assert_eq!(response.status_code, 200);
    assert_eq!(response.body["records_written"], 1);
    assert_eq!(response.body["bucket_name"], BUCKET);
    assert_eq!(database.rows(), vec![("RJ-101".to_string(), "automovel".to_string(), 3)]);
    assert_eq!(database.closes(), 1);
}

#[tokio::test]
async fn test_scenario_c_missing_file_key_fails_before_any_io() {
    let config = test_config("scenario-c");
    let store = FakeObjectStore::with_containers(&[BUCKET]);
    let secrets = FakeSecretStore::default();
    let database = FakeDatabase::default();
    let deps = AggregationDeps {
        store: &store,
        secrets: &secrets,
        database: &database,
    };

    let response = handle_aggregate(&config, &deps, &json!({})).await;

    assert_eq!(response.status_code, 400);
    assert_eq!(
        response.body,
        json!("Invalid input: missing required information: 'file_key'")
    );
    assert_eq!(store.calls(), 0);
    assert_eq!(secrets.calls.load(Ordering::SeqCst), 0);
    assert_eq!(database.connects(), 0);
}

#[tokio::test]
async fn test_scenario_d_bad_deaths_value_returns_500_without_inserts() {
    let config = test_config("scenario-d");
    let store = FakeObjectStore::with_containers(&[BUCKET]);
    store.insert(BUCKET, "acidentes.csv", "trecho,automovel,mortos\nRJ-101,1,3\nRJ-102,1,n/a\n");
    let secrets = FakeSecretStore::default();
    let database = FakeDatabase::default();
    let deps = AggregationDeps {
        store: &store,
        secrets: &secrets,
        database: &database,
    };

    let response = handle_aggregate(&config, &deps, &json!({ "file_key": "acidentes.csv" })).await;

    assert_eq!(response.status_code, 500);
    let body = response.body.as_str().unwrap();
    assert!(body.starts_with("Error processing CSV file"));
    assert!(body.contains("n/a"));
    assert_eq!(database.connects(), 0);
    assert!(database.rows().is_empty());
}

#[tokio::test]
async fn test_explicit_bucket_name_skips_locator() {
    let mut config = test_config("explicit-bucket");
    track(&mut config, "automovel,moto");
    // No container matches the prefix, so the run only succeeds if listing is skipped.
    let store = FakeObjectStore {
        listing_error: Some("should not be listed".to_string()),
        ..FakeObjectStore::with_containers(&["manual-upload"])
    };
    store.insert("manual-upload", "a.csv", "trecho,automovel,moto,mortos\nBR-040,1,1,2\n");
    let secrets = FakeSecretStore::default();
    let database = FakeDatabase::default();
    let deps = AggregationDeps {
        store: &store,
        secrets: &secrets,
        database: &database,
    };

    let payload = json!({ "bucket_name": "manual-upload", "file_key": "a.csv" });
    let response = handle_aggregate(&config, &deps, &payload).await;

    assert_eq!(response.status_code, 200, "{:?}", response.body);
    assert_eq!(database.rows().len(), 2);
}

#[tokio::test]
async fn test_missing_bucket_returns_500() {
    let config = test_config("no-bucket");
    let store = FakeObjectStore::with_containers(&["unrelated"]);
    let secrets = FakeSecretStore::default();
    let database = FakeDatabase::default();
    let deps = AggregationDeps {
        store: &store,
        secrets: &secrets,
        database: &database,
    };

    let response = handle_aggregate(&config, &deps, &json!({ "file_key": "acidentes.csv" })).await;

    assert_eq!(response.status_code, 500);
    assert!(response.body.as_str().unwrap().starts_with("Error getting bucket"));
    assert_eq!(database.connects(), 0);
}

#[tokio::test]
async fn test_secret_failure_stops_before_storage() {
    let config = test_config("secret-failure");
    let store = FakeObjectStore::with_containers(&[BUCKET]);
    let secrets = FakeSecretStore {
        fail: true,
        ..FakeSecretStore::default()
    };
    let database = FakeDatabase::default();
    let deps = AggregationDeps {
        store: &store,
        secrets: &secrets,
        database: &database,
    };

    let response = handle_aggregate(&config, &deps, &json!({ "file_key": "acidentes.csv" })).await;

    assert_eq!(response.status_code, 500);
    assert_eq!(store.calls(), 0);
}

#[tokio::test]
async fn test_connect_failure_returns_500_without_schema_or_rows() {
    let config = test_config("connect-failure");
    let store = FakeObjectStore::with_containers(&[BUCKET]);
    store.insert(BUCKET, "acidentes.csv", "trecho,automovel,mortos\nRJ-101,1,3\n");
    let secrets = FakeSecretStore::default();
    let database = FakeDatabase {
        fail_connect: true,
        ..FakeDatabase::default()
    };
    let deps = AggregationDeps {
        store: &store,
        secrets: &secrets,
        database: &database,
    };

    let response = handle_aggregate(&config, &deps, &json!({ "file_key": "acidentes.csv" })).await;

    assert_eq!(response.status_code, 500);
    assert!(response
        .body
        .as_str()
        .unwrap()
        .starts_with("Error connecting to database"));
    assert_eq!(database.connects(), 1);
    assert_eq!(database.schema_calls.load(Ordering::SeqCst), 0);
    assert!(database.rows().is_empty());
    // No session was opened, so there is nothing to close.
    assert_eq!(database.closes(), 0);
}

#[tokio::test]
async fn test_missing_object_returns_500_before_connecting() {
    let config = test_config("missing-object");
    let store = FakeObjectStore::with_containers(&[BUCKET]);
    store.insert(BUCKET, "other.csv", "trecho,automovel,mortos\nRJ-101,1,3\n");
    let secrets = FakeSecretStore::default();
    let database = FakeDatabase::default();
    let deps = AggregationDeps {
        store: &store,
        secrets: &secrets,
        database: &database,
    };

    let response = handle_aggregate(&config, &deps, &json!({ "file_key": "acidentes.csv" })).await;

    assert_eq!(response.status_code, 500);
    let body = response.body.as_str().unwrap();
    assert!(body.starts_with("Error downloading file from S3"));
    assert!(body.contains("NoSuchKey"));
    assert_eq!(database.connects(), 0);
    assert!(database.rows().is_empty());
}

#[tokio::test]
async fn test_schema_failure_skips_write_and_closes_session() {
    let config = test_config("schema-failure");
    let store = FakeObjectStore::with_containers(&[BUCKET]);
    store.insert(BUCKET, "acidentes.csv", "trecho,automovel,mortos\nRJ-101,1,3\n");
    let secrets = FakeSecretStore::default();
    let database = FakeDatabase {
        fail_schema: true,
        ..FakeDatabase::default()
    };
    let deps = AggregationDeps {
        store: &store,
        secrets: &secrets,
        database: &database,
    };

    let response = handle_aggregate(&config, &deps, &json!({ "file_key": "acidentes.csv" })).await;

    assert_eq!(response.status_code, 500);
    assert!(response.body.as_str().unwrap().starts_with("Error creating table"));
    assert!(database.rows().is_empty());
    assert_eq!(database.closes(), 1);
}

#[tokio::test]
async fn test_failed_insert_leaves_no_rows_and_closes_session() {
    let mut config = test_config("insert-failure");
    track(&mut config, "automovel,moto");
    let store = FakeObjectStore::with_containers(&[BUCKET]);
    store.insert(BUCKET, "acidentes.csv", "trecho,automovel,moto,mortos\nBR-116,1,1,4\n");
    let secrets = FakeSecretStore::default();
    let database = FakeDatabase {
        fail_insert_at: Some(1),
        ..FakeDatabase::default()
    };
    let deps = AggregationDeps {
        store: &store,
        secrets: &secrets,
        database: &database,
    };

    let response = handle_aggregate(&config, &deps, &json!({ "file_key": "acidentes.csv" })).await;

    assert_eq!(response.status_code, 500);
    assert!(response.body.as_str().unwrap().starts_with("Error inserting data into database"));
    assert!(database.rows().is_empty());
    assert_eq!(database.schema_calls.load(Ordering::SeqCst), 1);
    assert_eq!(database.closes(), 1);
}

#[tokio::test]
async fn test_rerun_duplicates_rows() {
    // No upsert: a second run over the same file stores the pairs again.
    let config = test_config("rerun");
    let store = FakeObjectStore::with_containers(&[BUCKET]);
    store.insert(BUCKET, "acidentes.csv", "trecho,automovel,mortos\nRJ-101,1,3\n");
    let secrets = FakeSecretStore::default();
    let database = FakeDatabase::default();
    let deps = AggregationDeps {
        store: &store,
        secrets: &secrets,
        database: &database,
    };
    let payload = json!({ "file_key": "acidentes.csv" });

    assert_eq!(handle_aggregate(&config, &deps, &payload).await.status_code, 200);
    assert_eq!(handle_aggregate(&config, &deps, &payload).await.status_code, 200);
    assert_eq!(database.rows().len(), 2);
}

#[tokio::test]
async fn test_download_stage_uploads_under_last_path_segment() {
    let server = MockServer::start().await;
    Mock::given(method("GET"))
        .and(path("/dados/acidentes2024.csv"))
        .respond_with(ResponseTemplate::new(200).set_body_string("trecho,automovel,mortos\n"))
        .mount(&server)
        .await;

    let config = test_config("download");
    let store = FakeObjectStore::with_containers(&["logs", BUCKET]);
    let http = reqwest::Client::new();
    let deps = DownloadDeps { store: &store, http: &http };
    let link = format!("{}/dados/acidentes2024.csv", server.uri());

    let response = handle_download(&config, &deps, &json!({ "link": link })).await;

    assert_eq!(response.status_code, 200, "{:?}", response.body);
    assert_eq!(response.body, json!({ "file_name": "acidentes2024.csv", "bucket_name": BUCKET }));
    assert_eq!(
        store.object(BUCKET, "acidentes2024.csv").unwrap(),
        "trecho,automovel,mortos\n"
    );
}

#[tokio::test]
async fn test_download_stage_reads_link_file_and_reports_http_errors() {
    let server = MockServer::start().await;
    Mock::given(method("GET"))
        .and(path("/missing.csv"))
        .respond_with(ResponseTemplate::new(404))
        .mount(&server)
        .await;

    let link_file = scratch_path("link.yml");
    std::fs::write(&link_file, format!("link: {}/missing.csv\n", server.uri())).unwrap();
    let mut config = test_config("download-404");
    config.link_file = link_file.display().to_string();
    let store = FakeObjectStore::with_containers(&[BUCKET]);
    let http = reqwest::Client::new();
    let deps = DownloadDeps { store: &store, http: &http };

    let response = handle_download(&config, &deps, &json!({})).await;

    assert_eq!(response.status_code, 500);
    assert!(response.body.as_str().unwrap().starts_with("Error downloading source file"));
    // The bucket is only looked up after a successful fetch.
    assert_eq!(store.calls(), 0);
    let _ = std::fs::remove_file(link_file);
}

#[tokio::test]
async fn test_postgres_schema_is_idempotent_and_writes_are_atomic() -> anyhow::Result<()> {
    let database_url = match std::env::var("ACCIDENT_STATS_TEST_DATABASE_URL") {
        Ok(url) => url,
        Err(_) => {
            eprintln!("Skipping Postgres test because ACCIDENT_STATS_TEST_DATABASE_URL is not set");
            return Ok(());
        }
    };
    let mut conn = PgConnection::connect(&database_url).await?;

    schema::ensure_schema(&mut conn).await?;
    schema::ensure_schema(&mut conn).await?;
    sqlx::query("TRUNCATE TABLE accident_stats").execute(&mut conn).await?;

    let mut totals = CategoryTotals::new();
    totals.add("automovel", "RJ-101", 3);
    totals.add("moto", "RJ-101", 1);
    assert_eq!(writer::write_totals(&mut conn, &totals).await?, 2);

    // Rows are ordered by road within a category, so the oversized name is the second insert.
    let mut failing = CategoryTotals::new();
    failing.add("automovel", "BR-001", 1);
    failing.add("automovel", &"x".repeat(300), 1);
    let err = writer::write_totals(&mut conn, &failing).await.unwrap_err();
    assert!(matches!(err, WriteError::Insert { .. }));

    let count: i64 = sqlx::query_scalar("SELECT COUNT(*) FROM accident_stats")
        .fetch_one(&mut conn)
        .await?;
    assert_eq!(count, 2);

    let session: Box<dyn crate::db::StatsSession> = Box::new(crate::db::PgSession::new(conn));
    session.close().await;
    Ok(())
}
