//! Integration tests for the import endpoints.
//!
//! Uploads CSV and XLSX files through the full router and checks the
//! report, the stored products and the import run log.

mod common;

use axum::http::StatusCode;
use common::{body_json, get, upload};
use rowbridge_api::handlers::import::run_import;
use rowbridge_core::batch::{BatchStatus, ImportOptions};
use rowbridge_core::catalog::{product_schema, PRODUCTS};
use rowbridge_core::error::ImportError;
use rowbridge_db::models::import_run::CreateImportRun;
use rowbridge_db::repositories::ImportRunRepo;
use rust_xlsxwriter::Workbook;
use sqlx::PgPool;
use tokio_util::sync::CancellationToken;

const PRODUCTS_CSV: &str = "\
Name,Price,Category,Tags,Warehouse Bin
Widget,9.99,Tools,\"red, blue\",A1
Gadget,abc,Tools,red,A2
Gizmo,5,Toys,,A3
";

fn products_xlsx() -> Vec<u8> {
    let mut workbook = Workbook::new();
    let sheet = workbook.add_worksheet();
    for (col, header) in ["Product Name", "name", "PRICE", " Category ", "tags"]
        .iter()
        .enumerate()
    {
        sheet.write_string(0, col as u16, *header).unwrap();
    }
    sheet.write_string(1, 1, "Widget").unwrap();
    sheet.write_number(1, 2, 12.5).unwrap();
    sheet.write_string(1, 3, "Tools").unwrap();
    sheet.write_string(1, 4, "red,red").unwrap();
    workbook.save_to_buffer().unwrap()
}

// ---------------------------------------------------------------------------
// Uploads
// ---------------------------------------------------------------------------

#[sqlx::test(migrations = "../../db/migrations")]
async fn csv_upload_reports_failed_rows(pool: PgPool) {
    let app = common::build_test_app(pool.clone());
    let response = upload(
        app.clone(),
        "/api/v1/import/products",
        "products.csv",
        PRODUCTS_CSV.as_bytes(),
    )
    .await;

    assert_eq!(response.status(), StatusCode::OK);
    let json = body_json(response).await;
    let report = &json["data"]["report"];
    assert_eq!(report["total_rows"], 3);
    assert_eq!(report["succeeded"], 2);
    assert_eq!(report["status"], "partial");
    assert_eq!(report["committed"], true);
    assert_eq!(report["success"], false);
    assert_eq!(report["failed"][0]["row_index"], 2);

    let products = body_json(get(app, "/api/v1/products").await).await;
    let names: Vec<&str> = products["data"]
        .as_array()
        .unwrap()
        .iter()
        .map(|p| p["name"].as_str().unwrap())
        .collect();
    assert_eq!(names, ["Widget", "Gizmo"]);
    assert_eq!(products["data"][0]["tags"], serde_json::json!(["blue", "red"]));
    assert_eq!(products["data"][1]["price"], "5.00");
}

#[sqlx::test(migrations = "../../db/migrations")]
async fn xlsx_upload_normalizes_headers(pool: PgPool) {
    let app = common::build_test_app(pool);
    let response = upload(
        app.clone(),
        "/api/v1/import/products",
        "products.xlsx",
        &products_xlsx(),
    )
    .await;

    assert_eq!(response.status(), StatusCode::OK);
    let json = body_json(response).await;
    assert_eq!(json["data"]["report"]["succeeded"], 1);

    let products = body_json(get(app, "/api/v1/products").await).await;
    assert_eq!(products["data"][0]["name"], "Widget");
    assert_eq!(products["data"][0]["price"], "12.50");
    assert_eq!(products["data"][0]["category"], "Tools");
    assert_eq!(products["data"][0]["tags"], serde_json::json!(["red"]));
}

#[sqlx::test(migrations = "../../db/migrations")]
async fn dry_run_does_not_persist(pool: PgPool) {
    let app = common::build_test_app(pool.clone());
    let response = upload(
        app,
        "/api/v1/import/products?dry_run=true",
        "products.csv",
        PRODUCTS_CSV.as_bytes(),
    )
    .await;

    assert_eq!(response.status(), StatusCode::OK);
    let json = body_json(response).await;
    assert_eq!(json["data"]["report"]["committed"], false);
    assert_eq!(json["data"]["report"]["succeeded"], 2);

    let count: (i64,) = sqlx::query_as("SELECT COUNT(*) FROM products")
        .fetch_one(&pool)
        .await
        .unwrap();
    assert_eq!(count.0, 0);
}

#[sqlx::test(migrations = "../../db/migrations")]
async fn savepoint_isolation_can_be_requested(pool: PgPool) {
    let app = common::build_test_app(pool.clone());
    let csv = "name,price,category\nA,oops,Orphan\nB,1,Kept\n";
    let response = upload(
        app,
        "/api/v1/import/products?isolation=savepoint",
        "p.csv",
        csv.as_bytes(),
    )
    .await;

    assert_eq!(response.status(), StatusCode::OK);
    let orphan: Option<(i64,)> = sqlx::query_as("SELECT id FROM categories WHERE name = 'Orphan'")
        .fetch_optional(&pool)
        .await
        .unwrap();
    assert!(orphan.is_none());
}

// ---------------------------------------------------------------------------
// Rejections
// ---------------------------------------------------------------------------

#[sqlx::test(migrations = "../../db/migrations")]
async fn unknown_entity_type_returns_404(pool: PgPool) {
    let app = common::build_test_app(pool);
    let response = upload(app, "/api/v1/import/widgets", "w.csv", b"name\nx\n").await;

    assert_eq!(response.status(), StatusCode::NOT_FOUND);
    let json = body_json(response).await;
    assert_eq!(json["code"], "NOT_FOUND");
}

#[sqlx::test(migrations = "../../db/migrations")]
async fn unsupported_file_returns_400(pool: PgPool) {
    let app = common::build_test_app(pool);
    let response = upload(app, "/api/v1/import/products", "notes.txt", b"hello").await;

    assert_eq!(response.status(), StatusCode::BAD_REQUEST);
    let json = body_json(response).await;
    assert_eq!(json["code"], "INVALID_FILE");
}

#[sqlx::test(migrations = "../../db/migrations")]
async fn unknown_isolation_returns_400(pool: PgPool) {
    let app = common::build_test_app(pool);
    let response = upload(
        app,
        "/api/v1/import/products?isolation=per_row",
        "p.csv",
        b"name\nx\n",
    )
    .await;

    assert_eq!(response.status(), StatusCode::BAD_REQUEST);
}

// ---------------------------------------------------------------------------
// Run log
// ---------------------------------------------------------------------------

#[sqlx::test(migrations = "../../db/migrations")]
async fn imports_are_recorded_as_runs(pool: PgPool) {
    let app = common::build_test_app(pool);
    let response = upload(
        app.clone(),
        "/api/v1/import/products",
        "products.csv",
        PRODUCTS_CSV.as_bytes(),
    )
    .await;
    let run_id = body_json(response).await["data"]["run_id"].as_i64().unwrap();

    let runs = body_json(get(app.clone(), "/api/v1/import/runs").await).await;
    assert_eq!(runs["data"][0]["id"], run_id);
    assert_eq!(runs["data"][0]["file_name"], "products.csv");

    let run = body_json(get(app.clone(), &format!("/api/v1/import/runs/{run_id}")).await).await;
    assert_eq!(run["data"]["status"], "partial");
    assert_eq!(run["data"]["failed"], 1);
    assert_eq!(run["data"]["committed"], true);
    assert_eq!(run["data"]["report"]["failed"][0]["row_index"], 2);

    let missing = get(app, "/api/v1/import/runs/999999").await;
    assert_eq!(missing.status(), StatusCode::NOT_FOUND);
}

#[sqlx::test(migrations = "../../db/migrations")]
async fn aborted_import_returns_409_and_records_the_run(pool: PgPool) {
    let app = common::build_test_app(pool.clone());
    // Postgres rejects NUL bytes in text, which aborts the shared transaction.
    let csv = "name,price,category\nWidget,1,Tools\nBad\0Name,2,Tools\nGizmo,3,Toys\n";
    let response = upload(
        app.clone(),
        "/api/v1/import/products",
        "products.csv",
        csv.as_bytes(),
    )
    .await;

    assert_eq!(response.status(), StatusCode::CONFLICT);
    let json = body_json(response).await;
    assert_eq!(json["code"], "IMPORT_ABORTED");
    assert_eq!(json["row"], 2);
    assert_eq!(json["report"]["status"], "rolled_back");
    assert_eq!(json["report"]["committed"], false);
    assert_eq!(json["report"]["succeeded"], 1);
    let run_id = json["run_id"].as_i64().unwrap();

    let run = body_json(get(app.clone(), &format!("/api/v1/import/runs/{run_id}")).await).await;
    assert_eq!(run["data"]["status"], "rolled_back");
    assert_eq!(run["data"]["committed"], false);
    assert!(run["data"]["error"].is_string());
    assert!(run["data"]["completed_at"].is_string());

    let products = body_json(get(app, "/api/v1/products").await).await;
    assert_eq!(products["data"], serde_json::json!([]));
}

#[sqlx::test(migrations = "../../db/migrations")]
async fn cancelled_import_still_finishes_its_run(pool: PgPool) {
    let state = common::test_state(pool.clone());
    let run = ImportRunRepo::create(
        &pool,
        &CreateImportRun {
            entity_type: PRODUCTS.to_string(),
            file_name: Some("products.csv".to_string()),
            row_isolation: "shared".to_string(),
            dry_run: false,
        },
    )
    .await
    .unwrap();
    let cancel = CancellationToken::new();
    cancel.cancel();
    let rows = rowbridge_api::sheet::decode_csv(PRODUCTS_CSV.as_bytes()).unwrap();

    let aborted = run_import(
        state,
        product_schema().unwrap(),
        run.id,
        rows,
        ImportOptions {
            cancel: Some(cancel),
            ..Default::default()
        },
    )
    .await
    .unwrap_err();

    assert!(matches!(aborted.source, ImportError::Cancelled));
    assert_eq!(aborted.report.status, BatchStatus::RolledBack);
    let recorded = ImportRunRepo::find_by_id(&pool, run.id).await.unwrap().unwrap();
    assert_eq!(recorded.status, "rolled_back");
    assert!(recorded.completed_at.is_some());
    assert_eq!(recorded.error.as_deref(), Some("Import rolled back: Import cancelled"));
}

// ---------------------------------------------------------------------------
// Related entities
// ---------------------------------------------------------------------------

#[sqlx::test(migrations = "../../db/migrations")]
async fn categories_and_tags_are_listed(pool: PgPool) {
    let app = common::build_test_app(pool);
    upload(
        app.clone(),
        "/api/v1/import/products",
        "products.csv",
        PRODUCTS_CSV.as_bytes(),
    )
    .await;

    let categories = body_json(get(app.clone(), "/api/v1/categories").await).await;
    assert_eq!(categories["data"][0]["name"], "Tools");
    assert_eq!(categories["data"][1]["name"], "Toys");

    let tags = body_json(get(app.clone(), "/api/v1/tags").await).await;
    assert_eq!(tags["data"].as_array().unwrap().len(), 2);

    let products = body_json(get(app.clone(), "/api/v1/products?category=Tools").await).await;
    let widget_id = products["data"][0]["id"].as_i64().unwrap();
    let widget_tags =
        body_json(get(app.clone(), &format!("/api/v1/products/{widget_id}/tags")).await).await;
    assert_eq!(widget_tags["data"][0]["name"], "blue");
    assert_eq!(widget_tags["data"][1]["name"], "red");

    let missing = get(app, "/api/v1/products?category=Nope").await;
    assert_eq!(missing.status(), StatusCode::NOT_FOUND);
}
