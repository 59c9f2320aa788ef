mod common;

use anyhow::Result;
use axum::http::StatusCode;
use serde_json::json;

use common::{count, seed_and_login, send, spawn_app, ADMIN_ROLE_ID, FOTOGRAFO_ROLE_ID, SUPERVISOR_ROLE_ID};

#[tokio::test]
async fn vehicle_create_then_read_returns_submitted_fields() -> Result<()> {
    let test = spawn_app().await?;
    let (_, cookie) = seed_and_login(&test, "super@cvo.example", Some(SUPERVISOR_ROLE_ID)).await?;

    let (status, created) = send(
        &test.app,
        "POST",
        "/api/vehicles",
        Some(&cookie),
        Some(json!({
            "license_plate": "9853 mkl",
            "brand": "BMW",
            "model": "Serie 3 320d",
            "vehicle_type": "Coche",
            "price": 28900.0,
            "entry_date": "2025-02-01"
        })),
    )
    .await?;
    assert_eq!(status, StatusCode::CREATED);
    let id = created["data"]["id"].as_str().unwrap_or_default().to_string();

    let (status, read) = send(&test.app, "GET", &format!("/api/vehicles/{id}"), Some(&cookie), None).await?;
    assert_eq!(status, StatusCode::OK);
    let vehicle = &read["data"];
    assert_eq!(vehicle["license_plate"], "9853MKL");
    assert_eq!(vehicle["brand"], "BMW");
    assert_eq!(vehicle["model"], "Serie 3 320d");
    assert_eq!(vehicle["price"], 28900.0);
    assert_eq!(vehicle["entry_date"], "2025-02-01");
    assert_eq!(vehicle["status"], "disponible");
    assert_eq!(vehicle["photos_completed"], false);

    Ok(())
}

#[tokio::test]
async fn duplicate_plate_is_409() -> Result<()> {
    let test = spawn_app().await?;
    let (_, cookie) = seed_and_login(&test, "admin@cvo.example", Some(ADMIN_ROLE_ID)).await?;
    let body = json!({ "license_plate": "1111AAA", "model": "Ibiza" });

    let (status, _) = send(&test.app, "POST", "/api/vehicles", Some(&cookie), Some(body.clone())).await?;
    assert_eq!(status, StatusCode::CREATED);
    let (status, _) = send(&test.app, "POST", "/api/vehicles", Some(&cookie), Some(json!({ "license_plate": "1111 aaa", "model": "Ibiza" }))).await?;
    assert_eq!(status, StatusCode::CONFLICT);
    assert_eq!(count(&test.pool, "vehicles").await?, 1);

    Ok(())
}

#[tokio::test]
async fn invalid_vehicle_fields_are_all_reported() -> Result<()> {
    let test = spawn_app().await?;
    let (_, cookie) = seed_and_login(&test, "admin@cvo.example", Some(ADMIN_ROLE_ID)).await?;

    let (status, body) = send(
        &test.app,
        "POST",
        "/api/vehicles",
        Some(&cookie),
        Some(json!({ "license_plate": "", "model": "", "status": "robado", "price": -1.0 })),
    )
    .await?;
    assert_eq!(status, StatusCode::BAD_REQUEST);
    let fields: Vec<String> = body["fields"]
        .as_array()
        .map(|list| list.iter().filter_map(|f| f["field"].as_str().map(str::to_string)).collect())
        .unwrap_or_default();
    assert_eq!(fields, vec!["license_plate", "model", "status", "price"]);

    let (status, body) = send(
        &test.app,
        "POST",
        "/api/vehicles",
        Some(&cookie),
        Some(json!({ "license_plate": "2222BBB", "model": "Ibiza", "price": "cara" })),
    )
    .await?;
    assert_eq!(status, StatusCode::BAD_REQUEST);
    assert_eq!(body["fields"][0]["field"], "price");

    Ok(())
}

#[tokio::test]
async fn photographer_marks_photos_but_cannot_edit_stock() -> Result<()> {
    let test = spawn_app().await?;
    let (_, admin) = seed_and_login(&test, "admin@cvo.example", Some(ADMIN_ROLE_ID)).await?;
    let (_, foto) = seed_and_login(&test, "foto@cvo.example", Some(FOTOGRAFO_ROLE_ID)).await?;

    let (_, created) = send(
        &test.app,
        "POST",
        "/api/vehicles",
        Some(&admin),
        Some(json!({ "license_plate": "3333CCC", "model": "Arona" })),
    )
    .await?;
    let id = created["data"]["id"].as_str().unwrap_or_default().to_string();

    let (status, _) = send(
        &test.app,
        "PUT",
        &format!("/api/vehicles/{id}"),
        Some(&foto),
        Some(json!({ "price": 1.0 })),
    )
    .await?;
    assert_eq!(status, StatusCode::FORBIDDEN);

    let (status, body) = send(
        &test.app,
        "PUT",
        &format!("/api/vehicles/{id}/photos"),
        Some(&foto),
        Some(json!({ "completed": true })),
    )
    .await?;
    assert_eq!(status, StatusCode::OK);
    assert_eq!(body["data"]["photos_completed"], true);

    let (_, pending) = send(&test.app, "GET", "/api/vehicles?pending_photos=true", Some(&foto), None).await?;
    assert_eq!(pending["data"].as_array().map(Vec::len), Some(0));

    Ok(())
}

#[tokio::test]
async fn sale_of_stocked_vehicle_marks_it_sold() -> Result<()> {
    let test = spawn_app().await?;
    let (_, cookie) = seed_and_login(&test, "super@cvo.example", Some(SUPERVISOR_ROLE_ID)).await?;

    let (_, vehicle) = send(
        &test.app,
        "POST",
        "/api/vehicles",
        Some(&cookie),
        Some(json!({ "license_plate": "4444DDD", "model": "Tarraco", "vehicle_type": "Coche" })),
    )
    .await?;
    let vehicle_id = vehicle["data"]["id"].clone();

    let (status, sale) = send(
        &test.app,
        "POST",
        "/api/sales",
        Some(&cookie),
        Some(json!({
            "vehicle_id": vehicle_id,
            "license_plate": "4444DDD",
            "model": "Tarraco",
            "vehicle_type": "Coche",
            "client_name": "Ana Gil",
            "sale_date": "2025-04-01",
            "price": 35000.0,
            "discount": -500.0,
            "cyp_status": "pendiente"
        })),
    )
    .await?;
    assert_eq!(status, StatusCode::CREATED);
    assert_eq!(sale["data"]["vehicle_id"], vehicle_id);

    let (_, read) = send(
        &test.app,
        "GET",
        &format!("/api/vehicles/{}", vehicle_id.as_str().unwrap_or_default()),
        Some(&cookie),
        None,
    )
    .await?;
    assert_eq!(read["data"]["status"], "vendido");

    let (status, stats) = send(&test.app, "GET", "/api/sales/stats", Some(&cookie), None).await?;
    assert_eq!(status, StatusCode::OK);
    assert_eq!(stats["totalVentas"], 1);
    assert_eq!(stats["promedioPrecio"], 35000);
    assert_eq!(stats["promedioDescuentos"], 500);
    assert_eq!(stats["enCola"], 1);

    Ok(())
}

#[tokio::test]
async fn sale_for_missing_vehicle_rolls_back() -> Result<()> {
    let test = spawn_app().await?;
    let (_, cookie) = seed_and_login(&test, "super@cvo.example", Some(SUPERVISOR_ROLE_ID)).await?;

    let (status, _) = send(
        &test.app,
        "POST",
        "/api/sales",
        Some(&cookie),
        Some(json!({
            "vehicle_id": uuid::Uuid::new_v4(),
            "license_plate": "5555EEE",
            "model": "Ateca",
            "client_name": "Ana Gil",
            "sale_date": "2025-04-01"
        })),
    )
    .await?;
    assert_eq!(status, StatusCode::NOT_FOUND);
    assert_eq!(count(&test.pool, "sales").await?, 0);

    Ok(())
}

#[tokio::test]
async fn completing_a_process_stamps_its_date() -> Result<()> {
    let test = spawn_app().await?;
    let (_, cookie) = seed_and_login(&test, "super@cvo.example", Some(SUPERVISOR_ROLE_ID)).await?;

    let (_, sale) = send(
        &test.app,
        "POST",
        "/api/sales",
        Some(&cookie),
        Some(json!({
            "license_plate": "6666FFF",
            "model": "Ibiza",
            "client_name": "Luis Pardo",
            "sale_date": "2025-04-01",
            "cyp_status": "pendiente"
        })),
    )
    .await?;
    let id = sale["data"]["id"].as_str().unwrap_or_default().to_string();

    let (status, updated) = send(
        &test.app,
        "PUT",
        &format!("/api/sales/{id}"),
        Some(&cookie),
        Some(json!({ "cyp_status": "completado" })),
    )
    .await?;
    assert_eq!(status, StatusCode::OK);
    assert_eq!(updated["data"]["cyp_status"], "completado");
    assert!(updated["data"]["cyp_date"].is_string());
    assert!(updated["data"]["photo_360_date"].is_null());

    Ok(())
}

#[tokio::test]
async fn delivery_for_a_sale_takes_its_plate() -> Result<()> {
    let test = spawn_app().await?;
    let (_, cookie) = seed_and_login(&test, "super@cvo.example", Some(SUPERVISOR_ROLE_ID)).await?;

    let (_, sale) = send(
        &test.app,
        "POST",
        "/api/sales",
        Some(&cookie),
        Some(json!({
            "license_plate": "7777ggg",
            "model": "Leon",
            "client_name": "Eva Sanz",
            "advisor_name": "Pablo",
            "sale_date": "2025-05-02"
        })),
    )
    .await?;

    let (status, delivery) = send(
        &test.app,
        "POST",
        "/api/entregas",
        Some(&cookie),
        Some(json!({ "sale_id": sale["data"]["id"], "delivery_date": "2025-05-10" })),
    )
    .await?;
    assert_eq!(status, StatusCode::CREATED);
    assert_eq!(delivery["data"]["license_plate"], "7777GGG");
    assert_eq!(delivery["data"]["advisor_name"], "Pablo");
    assert_eq!(delivery["data"]["status"], "pendiente");

    let (status, _) = send(
        &test.app,
        "POST",
        "/api/entregas",
        Some(&cookie),
        Some(json!({ "sale_id": uuid::Uuid::new_v4() })),
    )
    .await?;
    assert_eq!(status, StatusCode::NOT_FOUND);
    assert_eq!(count(&test.pool, "deliveries").await?, 1);

    Ok(())
}

#[tokio::test]
async fn ids_are_stored_as_canonical_text() -> Result<()> {
    let test = spawn_app().await?;
    let (_, cookie) = seed_and_login(&test, "admin@cvo.example", Some(ADMIN_ROLE_ID)).await?;

    let (_, created) = send(
        &test.app,
        "POST",
        "/api/vehicles",
        Some(&cookie),
        Some(json!({ "license_plate": "8888HHH", "model": "Born" })),
    )
    .await?;
    let id = created["data"]["id"].as_str().unwrap_or_default().to_string();

    let (kind, stored): (String, String) = sqlx::query_as("SELECT typeof(id), id FROM vehicles")
        .fetch_one(&test.pool)
        .await?;
    assert_eq!(kind, "text");
    assert_eq!(stored, id);
    assert_eq!(uuid::Uuid::parse_str(&stored)?.to_string(), stored);

    Ok(())
}
