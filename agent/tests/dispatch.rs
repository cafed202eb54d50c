use std::path::{Path, PathBuf};

use agent::{ToolDispatcher, ToolResult};
use ai::ToolCallInfo;
use db::loader::load_csv_dir;
use db::sqlite::SqliteDatabase;
use db::QueryPolicy;
use serde_json::{Value, json};
use tempfile::TempDir;

async fn fixture() -> (TempDir, PathBuf) {
    let dir = tempfile::tempdir().unwrap();
    let csvs = dir.path().join("csvs");
    std::fs::create_dir(&csvs).unwrap();

    std::fs::write(
        csvs.join("patients.csv"),
        "Id,BIRTHDATE,FIRST,LAST,GENDER\n\
         P123,1961-04-12,Maria,Lopez,F\n\
         P456,1990-11-03,John,Smith,M\n",
    )
    .unwrap();
    std::fs::write(
        csvs.join("medications.csv"),
        "START,STOP,PATIENT,CODE,DESCRIPTION\n\
         2019-03-01T08:00:00Z,,P123,314076,lisinopril 10 MG Oral Tablet\n\
         2021-06-15T09:30:00Z,2021-07-15T09:30:00Z,P456,308182,amoxicillin 250 MG Oral Capsule\n\
         2020-09-20T10:00:00Z,,P123,860975,metformin 500 MG Oral Tablet\n",
    )
    .unwrap();
    std::fs::write(
        csvs.join("observations.csv"),
        "DATE,PATIENT,CODE,DESCRIPTION,VALUE,UNITS\n\
         2019-03-01T08:00:00Z,P123,4548-4,Hemoglobin A1c,7.1,%\n\
         2020-09-20T10:00:00Z,P123,4548-4,Hemoglobin A1c,6.8,%\n",
    )
    .unwrap();
    std::fs::write(
        csvs.join("allergies.csv"),
        "START,STOP,PATIENT,CODE,DESCRIPTION\n\
         2005-01-01,,P456,300916003,Latex allergy\n",
    )
    .unwrap();

    let db_path = dir.path().join("synthea_data.db");
    load_csv_dir(&csvs, &db_path).await.unwrap();
    (dir, db_path)
}

async fn dispatcher(path: &Path) -> ToolDispatcher<SqliteDatabase> {
    ToolDispatcher::new(
        SqliteDatabase::open(path, QueryPolicy::default())
            .await
            .unwrap(),
    )
}

async fn call(dispatcher: &mut ToolDispatcher<SqliteDatabase>, name: &str, arguments: Value) -> Value {
    let result = dispatcher
        .dispatch(&ToolCallInfo {
            id: format!("call_{name}"),
            name: name.to_string(),
            arguments: arguments.to_string(),
        })
        .await;
    transcript_payload(&result)
}

/// What the model reads back, parsed from the transcript text
fn transcript_payload(result: &ToolResult) -> Value {
    let payload: Value = serde_json::from_str(&result.to_content()).unwrap();
    assert_eq!(payload, result.payload());
    payload
}

#[tokio::test]
async fn patient_medications_come_back_in_record_order() {
    let (_dir, path) = fixture().await;
    let mut dispatcher = dispatcher(&path).await;

    let payload = call(
        &mut dispatcher,
        "get_patient_data",
        json!({"patient_id": "P123", "category": "medications"}),
    )
    .await;

    assert_eq!(payload["success"], json!(true));
    let rows = payload["result"]["rows"].as_array().unwrap();
    let descriptions: Vec<_> = rows.iter().map(|row| row["DESCRIPTION"].clone()).collect();
    assert_eq!(
        descriptions,
        [
            json!("lisinopril 10 MG Oral Tablet"),
            json!("metformin 500 MG Oral Tablet")
        ]
    );
    assert_eq!(payload["result"]["truncated"], json!(false));

    let keys: Vec<_> = rows[0].as_object().unwrap().keys().cloned().collect();
    assert_eq!(keys, ["START", "STOP", "PATIENT", "CODE", "DESCRIPTION"]);
}

#[tokio::test]
async fn patient_records_are_not_cut_by_the_row_cap() {
    let (_dir, path) = fixture().await;
    let policy = QueryPolicy {
        row_cap: 1,
        ..QueryPolicy::default()
    };
    let mut dispatcher = ToolDispatcher::new(SqliteDatabase::open(&path, policy).await.unwrap());

    let payload = call(
        &mut dispatcher,
        "get_patient_data",
        json!({"patient_id": "P123", "category": "medications"}),
    )
    .await;
    let descriptions: Vec<_> = payload["result"]["rows"]
        .as_array()
        .unwrap()
        .iter()
        .map(|row| row["DESCRIPTION"].clone())
        .collect();
    assert_eq!(
        descriptions,
        [
            json!("lisinopril 10 MG Oral Tablet"),
            json!("metformin 500 MG Oral Tablet")
        ]
    );
    assert_eq!(payload["result"]["truncated"], json!(false));

    let free_form = call(
        &mut dispatcher,
        "query_db",
        json!({"sql": "SELECT DESCRIPTION FROM medications WHERE PATIENT = 'P123'"}),
    )
    .await;
    assert_eq!(free_form["result"]["rows"].as_array().unwrap().len(), 1);
    assert_eq!(free_form["result"]["truncated"], json!(true));
}

#[tokio::test]
async fn date_ranges_narrow_patient_records() {
    let (_dir, path) = fixture().await;
    let mut dispatcher = dispatcher(&path).await;

    let payload = call(
        &mut dispatcher,
        "get_patient_data",
        json!({
            "patient_id": "P123",
            "category": "labs",
            "start_date": "2020-01-01",
            "end_date": "2020-12-31"
        }),
    )
    .await;

    let rows = payload["result"]["rows"].as_array().unwrap();
    assert_eq!(rows.len(), 1);
    assert_eq!(rows[0]["VALUE"], json!("6.8"));
}

#[tokio::test]
async fn write_statements_are_rejected_and_change_nothing() {
    let (_dir, path) = fixture().await;
    let mut dispatcher = dispatcher(&path).await;

    let payload = call(
        &mut dispatcher,
        "query_db",
        json!({"sql": "DELETE FROM patients"}),
    )
    .await;
    assert_eq!(payload["success"], json!(false));
    assert_eq!(payload["error"]["kind"], json!("validation_error"));

    let stacked = call(
        &mut dispatcher,
        "query_db",
        json!({"sql": "SELECT 1; DROP TABLE patients"}),
    )
    .await;
    assert_eq!(stacked["error"]["kind"], json!("validation_error"));

    let count = call(
        &mut dispatcher,
        "query_db",
        json!({"sql": "SELECT COUNT(*) AS n FROM patients"}),
    )
    .await;
    assert_eq!(count["result"]["rows"], json!([{"n": 2}]));
}

#[tokio::test]
async fn engine_errors_are_syntax_errors() {
    let (_dir, path) = fixture().await;
    let mut dispatcher = dispatcher(&path).await;

    let payload = call(
        &mut dispatcher,
        "query_db",
        json!({"sql": "SELECT * FROM no_such_table"}),
    )
    .await;
    assert_eq!(payload["error"]["kind"], json!("syntax_error"));
    assert!(
        payload["error"]["message"]
            .as_str()
            .unwrap()
            .contains("no_such_table")
    );
}

#[tokio::test]
async fn unknown_tools_and_bad_arguments_are_reported() {
    let (_dir, path) = fixture().await;
    let mut dispatcher = dispatcher(&path).await;

    let unknown = call(&mut dispatcher, "frobnicate", json!({})).await;
    assert_eq!(unknown["error"]["kind"], json!("dispatch_error"));

    let missing = call(&mut dispatcher, "query_db", json!({})).await;
    assert_eq!(missing["error"]["kind"], json!("argument_error"));
    assert!(missing["error"]["message"].as_str().unwrap().contains("sql"));

    let numeric_id = call(
        &mut dispatcher,
        "get_patient_data",
        json!({"patient_id": 123, "category": "medications"}),
    )
    .await;
    assert_eq!(numeric_id["error"]["kind"], json!("argument_error"));
    assert!(
        numeric_id["error"]["message"]
            .as_str()
            .unwrap()
            .contains("patient_id")
    );

    let category = call(
        &mut dispatcher,
        "get_patient_data",
        json!({"patient_id": "P123", "category": "vitals"}),
    )
    .await;
    assert_eq!(category["error"]["kind"], json!("validation_error"));
}

#[tokio::test]
async fn unknown_patient_looks_like_a_patient_without_records() {
    let (_dir, path) = fixture().await;
    let mut dispatcher = dispatcher(&path).await;

    let unknown = call(
        &mut dispatcher,
        "get_patient_data",
        json!({"patient_id": "P999", "category": "allergies"}),
    )
    .await;
    let no_records = call(
        &mut dispatcher,
        "get_patient_data",
        json!({"patient_id": "P123", "category": "allergies"}),
    )
    .await;

    assert_eq!(unknown["success"], json!(true));
    assert_eq!(unknown["result"]["rows"], json!([]));
    assert_eq!(unknown, no_records);
}

#[tokio::test]
async fn schema_is_stable_across_calls() {
    let (_dir, path) = fixture().await;
    let mut dispatcher = dispatcher(&path).await;

    let first = call(&mut dispatcher, "get_db_schema", json!({})).await;
    let second = call(&mut dispatcher, "get_db_schema", json!({})).await;
    assert_eq!(first, second);

    let tables: Vec<_> = first["result"].as_object().unwrap().keys().cloned().collect();
    assert_eq!(tables, ["allergies", "medications", "observations", "patients"]);
    assert_eq!(
        first["result"]["patients"][0],
        json!({"name": "Id", "type": "TEXT"})
    );
}

#[tokio::test]
async fn unreachable_store_is_a_connectivity_error() {
    let dir = tempfile::tempdir().unwrap();
    let missing = dir.path().join("synthea_data.db");
    let mut dispatcher = ToolDispatcher::new(SqliteDatabase::new(&missing, QueryPolicy::default()));

    let payload = call(
        &mut dispatcher,
        "query_db",
        json!({"sql": "SELECT * FROM patients"}),
    )
    .await;
    assert_eq!(payload["error"]["kind"], json!("connectivity_error"));

    let schema = call(&mut dispatcher, "get_db_schema", json!({})).await;
    assert_eq!(schema["error"]["kind"], json!("connectivity_error"));
    assert_eq!(dispatcher.database().path(), missing);
    assert!(!missing.exists());
}
