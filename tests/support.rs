mod common;

use anyhow::Result;
use axum::http::StatusCode;
use axum::Router;
use serde_json::{json, Value};

use common::{count, seed_and_login, send, spawn_app, ADMIN_ROLE_ID, ASESOR_ROLE_ID};

async fn record_sale(app: &Router, cookie: &str) -> Result<()> {
    let (status, body) = send(
        app,
        "POST",
        "/api/sales",
        Some(cookie),
        Some(json!({
            "license_plate": "4321 kkk",
            "model": "Formentor",
            "client_name": "Sara Gil",
            "client_dni": "12345678z",
            "client_email": "sara@cliente.example",
            "sale_date": "2025-01-15"
        })),
    )
    .await?;
    assert_eq!(status, StatusCode::CREATED, "{body}");
    Ok(())
}

async fn open_ticket(app: &Router) -> Result<(StatusCode, Value)> {
    send(
        app,
        "POST",
        "/api/support/tickets",
        None,
        Some(json!({
            "license_plate": "4321KKK",
            "client_dni": " 12345678Z ",
            "client_phone": "600111222",
            "incidents": [
                { "kind": "Documentación", "description": "Falta el permiso de circulación" },
                { "kind": "Mecánica", "description": "Ruido en la dirección" }
            ]
        })),
    )
    .await
}

#[tokio::test]
async fn client_opens_a_ticket_with_plate_and_dni() -> Result<()> {
    let test = spawn_app().await?;
    let (_, admin) = seed_and_login(&test, "admin@cvo.example", Some(ADMIN_ROLE_ID)).await?;
    record_sale(&test.app, &admin).await?;

    let (status, body) = open_ticket(&test.app).await?;
    assert_eq!(status, StatusCode::CREATED, "{body}");
    assert_eq!(body["success"], true);
    let ticket = &body["ticket"];
    assert!(ticket["ticket_number"].as_str().unwrap_or_default().starts_with("TKT-"));
    assert!(ticket["ticket_number"].as_str().unwrap_or_default().ends_with("-0001"));
    assert_eq!(ticket["status"], "abierto");
    assert_eq!(ticket["license_plate"], "4321KKK");
    assert_eq!(ticket["client_email"], "sara@cliente.example");
    assert_eq!(ticket["sale_date"], "2025-01-15");
    let incidents = ticket["incidents"].as_array().cloned().unwrap_or_default();
    assert_eq!(incidents.len(), 2);
    assert!(incidents.iter().all(|incident| incident["status"] == "pendiente"));

    let (_, second) = open_ticket(&test.app).await?;
    assert!(second["ticket"]["ticket_number"].as_str().unwrap_or_default().ends_with("-0002"));

    Ok(())
}

#[tokio::test]
async fn unknown_sale_or_empty_ticket_is_rejected() -> Result<()> {
    let test = spawn_app().await?;
    let (_, admin) = seed_and_login(&test, "admin@cvo.example", Some(ADMIN_ROLE_ID)).await?;
    record_sale(&test.app, &admin).await?;

    let (status, body) = send(
        &test.app,
        "POST",
        "/api/support/tickets",
        None,
        Some(json!({
            "license_plate": "4321KKK",
            "client_dni": "87654321X",
            "incidents": [{ "kind": "Mecánica" }]
        })),
    )
    .await?;
    assert_eq!(status, StatusCode::NOT_FOUND);
    assert_eq!(body["error"], "not_found");

    let (status, body) = send(
        &test.app,
        "POST",
        "/api/support/tickets",
        None,
        Some(json!({ "license_plate": "4321KKK", "client_dni": "12345678Z", "incidents": [] })),
    )
    .await?;
    assert_eq!(status, StatusCode::BAD_REQUEST);
    assert_eq!(body["error"], "validation");
    assert_eq!(count(&test.pool, "support_tickets").await?, 0);

    Ok(())
}

#[tokio::test]
async fn inbox_merges_tickets_and_delivery_incidents() -> Result<()> {
    let test = spawn_app().await?;
    let (_, admin) = seed_and_login(&test, "admin@cvo.example", Some(ADMIN_ROLE_ID)).await?;
    record_sale(&test.app, &admin).await?;
    open_ticket(&test.app).await?;

    let (status, _) = send(
        &test.app,
        "POST",
        "/api/entregas",
        Some(&admin),
        Some(json!({ "license_plate": "9999zzz", "incidents": ["Arañazo en puerta"] })),
    )
    .await?;
    assert_eq!(status, StatusCode::CREATED);
    let (status, _) = send(
        &test.app,
        "POST",
        "/api/entregas",
        Some(&admin),
        Some(json!({ "license_plate": "8888YYY" })),
    )
    .await?;
    assert_eq!(status, StatusCode::CREATED);

    let (status, body) = send(&test.app, "GET", "/api/admin/support/tickets", Some(&admin), None).await?;
    assert_eq!(status, StatusCode::OK);
    assert_eq!(body["stats"], json!({ "soporte": 1, "entregas": 1, "total": 2 }));
    let tickets = body["tickets"].as_array().cloned().unwrap_or_default();
    let delivery = tickets.iter().find(|t| t["source"] == "entregas").cloned().unwrap_or_default();
    assert_eq!(delivery["ticket_number"], "ENT-9999ZZZ");
    assert_eq!(delivery["incidents"][0]["kind"], "Arañazo en puerta");

    Ok(())
}

#[tokio::test]
async fn resolving_every_incident_closes_the_ticket() -> Result<()> {
    let test = spawn_app().await?;
    let (_, admin) = seed_and_login(&test, "admin@cvo.example", Some(ADMIN_ROLE_ID)).await?;
    record_sale(&test.app, &admin).await?;
    let (_, first) = open_ticket(&test.app).await?;
    let (_, other) = open_ticket(&test.app).await?;

    let ticket_id = first["ticket"]["id"].as_str().unwrap_or_default().to_string();
    let incident_ids: Vec<String> = first["ticket"]["incidents"]
        .as_array()
        .cloned()
        .unwrap_or_default()
        .iter()
        .map(|incident| incident["id"].as_str().unwrap_or_default().to_string())
        .collect();
    let respond = format!("/api/admin/support/tickets/{ticket_id}/respond");

    let (status, body) = send(
        &test.app,
        "POST",
        &respond,
        Some(&admin),
        Some(json!({ "incident_id": incident_ids[0], "response": "Enviado por correo", "status": "resuelto" })),
    )
    .await?;
    assert_eq!(status, StatusCode::OK, "{body}");
    assert_eq!(body["message"], "Respuesta enviada correctamente");
    assert_eq!(body["ticket"]["status"], "en_tramite");

    let (_, body) = send(
        &test.app,
        "POST",
        &respond,
        Some(&admin),
        Some(json!({ "incident_id": incident_ids[1], "response": "Revisado en taller", "status": "resuelto" })),
    )
    .await?;
    assert_eq!(body["ticket"]["status"], "cerrado");
    assert_eq!(body["ticket"]["incidents"][1]["admin_response"], "Revisado en taller");

    // An incident from a different ticket is not reachable through this one.
    let foreign = other["ticket"]["incidents"][0]["id"].as_str().unwrap_or_default().to_string();
    let (status, _) = send(
        &test.app,
        "POST",
        &respond,
        Some(&admin),
        Some(json!({ "incident_id": foreign, "response": "No aplica" })),
    )
    .await?;
    assert_eq!(status, StatusCode::NOT_FOUND);

    let (_, asesor) = seed_and_login(&test, "asesor@cvo.example", Some(ASESOR_ROLE_ID)).await?;
    let (status, _) = send(
        &test.app,
        "POST",
        &respond,
        Some(&asesor),
        Some(json!({ "incident_id": incident_ids[0], "response": "Hola" })),
    )
    .await?;
    assert_eq!(status, StatusCode::FORBIDDEN);
    let (status, _) = send(&test.app, "GET", "/api/admin/support/tickets", Some(&asesor), None).await?;
    assert_eq!(status, StatusCode::FORBIDDEN);

    Ok(())
}
