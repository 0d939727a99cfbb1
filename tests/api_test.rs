use anyhow::Result;
use axum::http::{Request, StatusCode};
use axum::Router;
use hyper::Body;
use serde_json::{json, Value};
use std::sync::Arc;
use tower::ServiceExt;

use waste_collection::app::accounts::RegisterInput;
use waste_collection::domain::Role;
use waste_collection::infra::LogNotificationSink;
use waste_collection::server::create_server;
use waste_collection::storage::InMemoryStorage;
use waste_collection::{AppState, Config};

const PASSWORD: &str = "collect-the-bins";

struct TestApp {
    state: AppState,
    router: Router,
}

impl TestApp {
    fn new() -> Self {
        let mut config = Config::default();
        // Keep hashing cheap; the rounds only matter against offline attacks.
        config.auth.password_rounds = 10;
        let state = AppState::new(config, InMemoryStorage::new(), Arc::new(LogNotificationSink));
        let router = create_server(state.clone());
        Self { state, router }
    }

    /// Create an account with `role` and return its id and an access token.
    async fn user(&self, username: &str, role: Role) -> Result<(String, String)> {
        let user = self.state.accounts().create_user(
            RegisterInput {
                username: username.to_string(),
                email: format!("{username}@example.org"),
                password: PASSWORD.to_string(),
                first_name: String::new(),
                last_name: String::new(),
            },
            role,
        )?;
        let (status, tokens) = self
            .call("POST", "/api/v1/auth/token", None, Some(json!({"username": username, "password": PASSWORD})))
            .await?;
        assert_eq!(status, StatusCode::OK);
        let access = tokens["access"].as_str().unwrap_or_default().to_string();
        Ok((user.id.to_string(), access))
    }

    async fn call(&self, method: &str, uri: &str, token: Option<&str>, body: Option<Value>) -> Result<(StatusCode, Value)> {
        let bytes = body.map(|b| serde_json::to_vec(&b)).transpose()?;
        self.send(method, uri, token, bytes).await
    }

    /// Like `call`, but with the body bytes exactly as given.
    async fn send(&self, method: &str, uri: &str, token: Option<&str>, body: Option<Vec<u8>>) -> Result<(StatusCode, Value)> {
        let mut builder = Request::builder().method(method).uri(uri);
        if let Some(token) = token {
            builder = builder.header("authorization", format!("Bearer {token}"));
        }
        let request = match body {
            Some(body) => builder.header("content-type", "application/json").body(Body::from(body))?,
            None => builder.body(Body::empty())?,
        };

        let response = self.router.clone().oneshot(request).await?;
        let status = response.status();
        let bytes = hyper::body::to_bytes(response.into_body()).await?;
        let value = if bytes.is_empty() {
            Value::Null
        } else {
            serde_json::from_slice(&bytes)?
        };
        Ok((status, value))
    }

    async fn vehicle(&self, dispatcher: &str, plate: &str, status: &str) -> Result<Value> {
        let (code, vehicle) = self
            .call(
                "POST",
                "/api/v1/vehicles",
                Some(dispatcher),
                Some(json!({"plate_number": plate, "capacity_kg": 1000, "status": status})),
            )
            .await?;
        assert_eq!(code, StatusCode::CREATED, "{vehicle}");
        Ok(vehicle)
    }

    /// A `DRIVER` account with its profile; returns the profile and an access token.
    async fn driver(&self, dispatcher: &str, username: &str, vehicle: Option<&Value>) -> Result<(Value, String)> {
        let (user_id, token) = self.user(username, Role::Driver).await?;
        let mut body = json!({"user_id": user_id, "license_number": format!("D-{username}")});
        if let Some(vehicle) = vehicle {
            body["assigned_vehicle"] = vehicle["id"].clone();
        }
        let (status, profile) = self.call("POST", "/api/v1/drivers", Some(dispatcher), Some(body)).await?;
        assert_eq!(status, StatusCode::CREATED, "{profile}");
        Ok((profile, token))
    }

    async fn submit_pickup(&self, token: &str, when: &str, lat: f64, lng: f64) -> Result<Value> {
        let (status, pickup) = self
            .call(
                "POST",
                "/api/v1/pickups",
                Some(token),
                Some(json!({
                    "address": {"line1": format!("{lat} Harbour Street"), "city": "Leith", "lat": lat, "lng": lng},
                    "scheduled_time": when,
                    "estimated_weight_kg": 40.0
                })),
            )
            .await?;
        assert_eq!(status, StatusCode::CREATED, "{pickup}");
        Ok(pickup)
    }
}

#[tokio::test]
async fn health_and_authentication_are_enforced() -> Result<()> {
    let app = TestApp::new();

    let (status, body) = app.call("GET", "/health", None, None).await?;
    assert_eq!(status, StatusCode::OK);
    assert_eq!(body["status"], "healthy");

    let (status, body) = app.call("GET", "/api/v1/pickups", None, None).await?;
    assert_eq!(status, StatusCode::UNAUTHORIZED);
    assert!(body["detail"].is_string());

    let (status, _) = app.call("GET", "/api/v1/pickups", Some("not-a-token"), None).await?;
    assert_eq!(status, StatusCode::UNAUTHORIZED);
    Ok(())
}

#[tokio::test]
async fn registration_always_yields_a_citizen() -> Result<()> {
    let app = TestApp::new();

    let (status, user) = app
        .call(
            "POST",
            "/api/v1/auth/register",
            None,
            Some(json!({"username": "morag", "email": "morag@example.org", "password": PASSWORD, "role": "ADMIN"})),
        )
        .await?;
    assert_eq!(status, StatusCode::CREATED);
    assert_eq!(user["role"], "CITIZEN");
    assert!(user.get("password_hash").is_none());

    // Same username again is a conflict, not a second account
    let (status, _) = app
        .call(
            "POST",
            "/api/v1/auth/register",
            None,
            Some(json!({"username": "morag", "email": "other@example.org", "password": PASSWORD})),
        )
        .await?;
    assert_eq!(status, StatusCode::CONFLICT);
    Ok(())
}

#[tokio::test]
async fn refresh_tokens_rotate() -> Result<()> {
    let app = TestApp::new();
    app.user("eilidh", Role::Citizen).await?;

    let (_, tokens) = app
        .call("POST", "/api/v1/auth/token", None, Some(json!({"username": "eilidh", "password": PASSWORD})))
        .await?;
    let refresh = tokens["refresh"].as_str().unwrap_or_default().to_string();

    let (status, rotated) = app
        .call("POST", "/api/v1/auth/token/refresh", None, Some(json!({"refresh": refresh})))
        .await?;
    assert_eq!(status, StatusCode::OK);
    assert!(rotated["access"].is_string());
    assert_ne!(rotated["refresh"], tokens["refresh"]);

    // The old refresh token was consumed by the rotation
    let (status, _) = app
        .call("POST", "/api/v1/auth/token/refresh", None, Some(json!({"refresh": refresh})))
        .await?;
    assert_eq!(status, StatusCode::UNAUTHORIZED);

    let (status, _) = app
        .call("POST", "/api/v1/auth/token", None, Some(json!({"username": "eilidh", "password": "wrong-password"})))
        .await?;
    assert_eq!(status, StatusCode::UNAUTHORIZED);
    Ok(())
}

#[tokio::test]
async fn requester_is_the_caller_and_records_are_owner_scoped() -> Result<()> {
    let app = TestApp::new();
    let (alice_id, alice) = app.user("alice", Role::Citizen).await?;
    let (_, bob) = app.user("bob", Role::Citizen).await?;
    let (_, dispatcher) = app.user("dispatch", Role::Dispatcher).await?;

    let (status, pickup) = app
        .call(
            "POST",
            "/api/v1/pickups",
            Some(&alice),
            Some(json!({
                "requester": uuid::Uuid::new_v4(),
                "address": {"line1": "1 Canal Row", "city": "Leith"},
                "scheduled_time": "2031-03-04T09:00:00Z"
            })),
        )
        .await?;
    assert_eq!(status, StatusCode::CREATED);
    assert_eq!(pickup["requester"], alice_id.as_str());
    assert_eq!(pickup["status"], "requested");
    let uri = format!("/api/v1/pickups/{}", pickup["id"].as_str().unwrap_or_default());

    // Resubmitting the same inline address reuses the stored one
    let (_, second) = app
        .call(
            "POST",
            "/api/v1/pickups",
            Some(&alice),
            Some(json!({
                "address": {"line1": "1 Canal Row", "city": "Leith"},
                "scheduled_time": "2031-03-05T09:00:00Z"
            })),
        )
        .await?;
    assert_eq!(second["address"], pickup["address"]);

    // Another citizen sees nothing
    let (status, _) = app.call("GET", &uri, Some(&bob), None).await?;
    assert_eq!(status, StatusCode::NOT_FOUND);
    let (_, list) = app.call("GET", "/api/v1/pickups", Some(&bob), None).await?;
    assert_eq!(list["count"], 0);

    let (_, list) = app.call("GET", "/api/v1/pickups", Some(&alice), None).await?;
    assert_eq!(list["count"], 2);
    let (_, list) = app.call("GET", "/api/v1/pickups", Some(&dispatcher), None).await?;
    assert_eq!(list["count"], 2);

    let (status, _) = app.call("GET", "/api/v1/addresses", Some(&bob), None).await?;
    assert_eq!(status, StatusCode::OK);
    let (_, addresses) = app.call("GET", "/api/v1/addresses", Some(&alice), None).await?;
    assert_eq!(addresses["count"], 1);
    Ok(())
}

#[tokio::test]
async fn status_changes_follow_the_lifecycle() -> Result<()> {
    let app = TestApp::new();
    let (_, citizen) = app.user("catriona", Role::Citizen).await?;
    let (_, dispatcher) = app.user("dispatch", Role::Dispatcher).await?;

    let pickup = app.submit_pickup(&citizen, "2031-03-04T09:00:00Z", 55.97, -3.17).await?;
    let base = format!("/api/v1/pickups/{}", pickup["id"].as_str().unwrap_or_default());
    let change = format!("{base}/change-status");

    let (status, body) = app
        .call("POST", &change, Some(&dispatcher), Some(json!({"status": "teleported"})))
        .await?;
    assert_eq!(status, StatusCode::BAD_REQUEST);
    assert!(body["detail"].as_str().unwrap_or_default().contains("in_progress"));

    let (status, _) = app
        .call("POST", &change, Some(&dispatcher), Some(json!({"status": "completed"})))
        .await?;
    assert_eq!(status, StatusCode::BAD_REQUEST);

    let (_, current) = app.call("GET", &base, Some(&citizen), None).await?;
    assert_eq!(current["status"], "requested");

    // Citizens cannot drive the lifecycle
    let (status, _) = app
        .call("POST", &change, Some(&citizen), Some(json!({"status": "scheduled"})))
        .await?;
    assert_eq!(status, StatusCode::FORBIDDEN);

    // Work cannot start without a driver
    let (status, _) = app
        .call("POST", &change, Some(&dispatcher), Some(json!({"status": "scheduled"})))
        .await?;
    assert_eq!(status, StatusCode::OK);
    let (status, body) = app
        .call("POST", &change, Some(&dispatcher), Some(json!({"status": "in_progress"})))
        .await?;
    assert_eq!(status, StatusCode::BAD_REQUEST);
    assert!(body["detail"].as_str().unwrap_or_default().contains("driver"));

    let (driver, _) = app.driver(&dispatcher, "dougal", None).await?;
    let (status, _) = app
        .call("POST", &format!("{base}/assign"), Some(&dispatcher), Some(json!({"driver_id": driver["id"]})))
        .await?;
    assert_eq!(status, StatusCode::OK);

    for next in ["in_progress", "completed"] {
        let (status, body) = app
            .call("POST", &change, Some(&dispatcher), Some(json!({"status": next})))
            .await?;
        assert_eq!(status, StatusCode::OK, "{body}");
        assert_eq!(body["status"], next);
    }

    // Completed is terminal
    let (status, _) = app
        .call("POST", &change, Some(&dispatcher), Some(json!({"status": "in_progress"})))
        .await?;
    assert_eq!(status, StatusCode::BAD_REQUEST);

    // The requester heard about each change the dispatcher made
    let (_, unread) = app.call("GET", "/api/v1/notifications/unread-count", Some(&citizen), None).await?;
    assert_eq!(unread["unread_count"], 3);
    let (_, marked) = app
        .call("POST", "/api/v1/notifications/mark-all-read", Some(&citizen), None)
        .await?;
    assert_eq!(marked["marked"], 3);
    let (_, unread) = app.call("GET", "/api/v1/notifications/unread-count", Some(&citizen), None).await?;
    assert_eq!(unread["unread_count"], 0);
    Ok(())
}

#[tokio::test]
async fn citizens_cancel_only_while_open() -> Result<()> {
    let app = TestApp::new();
    let (_, citizen) = app.user("fiona", Role::Citizen).await?;
    let (_, dispatcher) = app.user("dispatch", Role::Dispatcher).await?;

    let pickup = app.submit_pickup(&citizen, "2031-03-04T09:00:00Z", 55.97, -3.17).await?;
    let base = format!("/api/v1/pickups/{}", pickup["id"].as_str().unwrap_or_default());

    let (status, cancelled) = app
        .call("POST", &format!("{base}/cancel"), Some(&citizen), Some(json!({"reason": "moved house"})))
        .await?;
    assert_eq!(status, StatusCode::OK);
    assert_eq!(cancelled["status"], "cancelled");
    assert_eq!(cancelled["cancelled_reason"], "moved house");

    let (status, _) = app
        .call("POST", &format!("{base}/cancel"), Some(&dispatcher), None)
        .await?;
    assert_eq!(status, StatusCode::BAD_REQUEST);

    // A cancelled request can no longer be edited by its owner
    let (status, _) = app
        .call("PATCH", &base, Some(&citizen), Some(json!({"description": "two sofas"})))
        .await?;
    assert_eq!(status, StatusCode::BAD_REQUEST);
    Ok(())
}

#[tokio::test]
async fn assignment_rejects_conflicts() -> Result<()> {
    let app = TestApp::new();
    let (_, citizen) = app.user("isla", Role::Citizen).await?;
    let (_, dispatcher) = app.user("dispatch", Role::Dispatcher).await?;
    let (driver, driver_token) = app.driver(&dispatcher, "dougie", None).await?;

    let vehicle = app.vehicle(&dispatcher, "sk21 bin", "AVAILABLE").await?;
    assert_eq!(vehicle["plate_number"], "SK21BIN");
    let parked = app.vehicle(&dispatcher, "SK21 FIX", "MAINTENANCE").await?;

    let first = app.submit_pickup(&citizen, "2031-03-04T09:00:00Z", 55.97, -3.17).await?;
    let second = app.submit_pickup(&citizen, "2031-03-04T09:00:00Z", 55.98, -3.18).await?;
    let assign = |p: &Value| format!("/api/v1/pickups/{}/assign", p["id"].as_str().unwrap_or_default());

    let (status, _) = app.call("POST", &assign(&first), Some(&citizen), Some(json!({"driver_id": driver["id"]}))).await?;
    assert_eq!(status, StatusCode::FORBIDDEN);

    let (status, assigned) = app
        .call(
            "POST",
            &assign(&first),
            Some(&dispatcher),
            Some(json!({"driver_id": driver["id"], "vehicle_id": vehicle["id"]})),
        )
        .await?;
    assert_eq!(status, StatusCode::OK, "{assigned}");
    assert_eq!(assigned["assigned_driver"], driver["id"]);
    assert_eq!(assigned["status"], "requested");

    let (status, _) = app
        .call("POST", &assign(&second), Some(&dispatcher), Some(json!({"driver_id": driver["id"]})))
        .await?;
    assert_eq!(status, StatusCode::CONFLICT);

    let (status, _) = app
        .call("POST", &assign(&second), Some(&dispatcher), Some(json!({"vehicle_id": parked["id"]})))
        .await?;
    assert_eq!(status, StatusCode::BAD_REQUEST);

    let (status, _) = app.call("POST", &assign(&second), Some(&dispatcher), Some(json!({}))).await?;
    assert_eq!(status, StatusCode::BAD_REQUEST);

    // The assigned driver sees the request and may move it along
    let change = format!("/api/v1/pickups/{}/change-status", first["id"].as_str().unwrap_or_default());
    let (status, _) = app
        .call("POST", &change, Some(&dispatcher), Some(json!({"status": "scheduled"})))
        .await?;
    assert_eq!(status, StatusCode::OK);
    let (status, body) = app
        .call("POST", &change, Some(&driver_token), Some(json!({"status": "in_progress"})))
        .await?;
    assert_eq!(status, StatusCode::OK, "{body}");
    let (status, _) = app
        .call("POST", &change, Some(&driver_token), Some(json!({"status": "cancelled"})))
        .await?;
    assert_eq!(status, StatusCode::FORBIDDEN);

    // ...but not someone else's
    let other = format!("/api/v1/pickups/{}", second["id"].as_str().unwrap_or_default());
    let (status, _) = app.call("GET", &other, Some(&driver_token), None).await?;
    assert_eq!(status, StatusCode::NOT_FOUND);
    Ok(())
}

#[tokio::test]
async fn rescheduling_keeps_assignments_free_of_conflicts() -> Result<()> {
    let app = TestApp::new();
    let (_, citizen) = app.user("seonaid", Role::Citizen).await?;
    let (_, dispatcher) = app.user("dispatch", Role::Dispatcher).await?;
    let (driver, _) = app.driver(&dispatcher, "gregor", None).await?;

    let early = app.submit_pickup(&citizen, "2031-03-04T09:00:00Z", 55.97, -3.17).await?;
    let late = app.submit_pickup(&citizen, "2031-03-04T10:00:00Z", 55.98, -3.18).await?;
    for pickup in [&early, &late] {
        let (status, body) = app
            .call(
                "POST",
                &format!("/api/v1/pickups/{}/assign", pickup["id"].as_str().unwrap_or_default()),
                Some(&dispatcher),
                Some(json!({"driver_id": driver["id"]})),
            )
            .await?;
        assert_eq!(status, StatusCode::OK, "{body}");
    }

    // Moving the later request onto the driver's booked slot is refused
    let uri = format!("/api/v1/pickups/{}", late["id"].as_str().unwrap_or_default());
    let (status, _) = app
        .call("PATCH", &uri, Some(&citizen), Some(json!({"scheduled_time": "2031-03-04T09:00:00Z"})))
        .await?;
    assert_eq!(status, StatusCode::CONFLICT);
    let (_, unchanged) = app.call("GET", &uri, Some(&citizen), None).await?;
    assert_eq!(unchanged["scheduled_time"], late["scheduled_time"]);

    let (status, moved) = app
        .call("PATCH", &uri, Some(&citizen), Some(json!({"scheduled_time": "2031-03-04T11:00:00Z"})))
        .await?;
    assert_eq!(status, StatusCode::OK, "{moved}");
    assert_eq!(moved["assigned_driver"], driver["id"]);
    Ok(())
}

#[tokio::test]
async fn declared_weights_are_bounded() -> Result<()> {
    let app = TestApp::new();
    let (_, citizen) = app.user("calum", Role::Citizen).await?;

    for weight in [1e17, -1.0] {
        let (status, body) = app
            .call(
                "POST",
                "/api/v1/pickups",
                Some(&citizen),
                Some(json!({
                    "address": {"line1": "2 Shore", "city": "Leith"},
                    "scheduled_time": "2031-03-04T09:00:00Z",
                    "estimated_weight_kg": weight
                })),
            )
            .await?;
        assert_eq!(status, StatusCode::BAD_REQUEST);
        assert!(body["detail"].as_str().unwrap_or_default().contains("estimated_weight_kg"));
    }

    let (status, body) = app
        .call(
            "POST",
            "/api/v1/pickups",
            Some(&citizen),
            Some(json!({
                "address": {"line1": "2 Shore", "city": "Leith", "lat": 123.0, "lng": 0.0},
                "scheduled_time": "2031-03-04T09:00:00Z"
            })),
        )
        .await?;
    assert_eq!(status, StatusCode::BAD_REQUEST);
    assert!(body["detail"].as_str().unwrap_or_default().contains("address.lat"));
    Ok(())
}

#[tokio::test]
async fn routes_are_built_from_valid_requests_only() -> Result<()> {
    let app = TestApp::new();
    let (_, citizen) = app.user("kirsty", Role::Citizen).await?;
    let (_, dispatcher) = app.user("dispatch", Role::Dispatcher).await?;

    let a = app.submit_pickup(&citizen, "2031-03-04T09:00:00Z", 55.90, -3.10).await?;
    let b = app.submit_pickup(&citizen, "2031-03-04T10:00:00Z", 55.99, -3.30).await?;
    let c = app.submit_pickup(&citizen, "2031-03-04T11:00:00Z", 55.91, -3.11).await?;
    let gone = app.submit_pickup(&citizen, "2031-03-04T12:00:00Z", 55.92, -3.12).await?;
    let (status, _) = app
        .call(
            "POST",
            &format!("/api/v1/pickups/{}/cancel", gone["id"].as_str().unwrap_or_default()),
            Some(&citizen),
            None,
        )
        .await?;
    assert_eq!(status, StatusCode::OK);

    let (status, route) = app
        .call(
            "POST",
            "/api/v1/routes/create-from-requests",
            Some(&dispatcher),
            Some(json!({
                "name": "North loop",
                "service_date": "2031-03-04",
                "request_ids": [a["id"], b["id"], uuid::Uuid::new_v4(), gone["id"], a["id"], c["id"]]
            })),
        )
        .await?;
    assert_eq!(status, StatusCode::CREATED, "{route}");
    let stops = route["stops"].as_array().cloned().unwrap_or_default();
    let sequences: Vec<u64> = stops.iter().filter_map(|s| s["sequence"].as_u64()).collect();
    assert_eq!(sequences, vec![1, 2, 3]);
    assert_eq!(stops[0]["pickup"], a["id"]);
    assert_eq!(stops[1]["pickup"], b["id"]);
    assert_eq!(stops[2]["pickup"], c["id"]);
    assert_eq!(route["status"], "PLANNED");

    let (_, scheduled) = app
        .call("GET", &format!("/api/v1/pickups/{}", a["id"].as_str().unwrap_or_default()), Some(&citizen), None)
        .await?;
    assert_eq!(scheduled["status"], "scheduled");

    // Optimizing visits the two nearby requests back to back
    let route_id = route["id"].as_str().unwrap_or_default().to_string();
    let (status, optimized) = app
        .call("POST", &format!("/api/v1/routes/{route_id}/optimize"), Some(&dispatcher), None)
        .await?;
    assert_eq!(status, StatusCode::OK, "{optimized}");
    assert_eq!(optimized["detail"], "Route optimization completed");
    assert!(optimized["route"]["total_distance_km"].as_f64().unwrap_or_default() > 0.0);

    let (_, stops) = app
        .call("GET", &format!("/api/v1/routes/{route_id}/stops"), Some(&dispatcher), None)
        .await?;
    let order: Vec<Value> = stops
        .as_array()
        .cloned()
        .unwrap_or_default()
        .iter()
        .map(|s| s["pickup"].clone())
        .collect();
    assert_eq!(order, vec![a["id"].clone(), c["id"].clone(), b["id"].clone()]);

    // Citizens have no view of routes
    let (status, _) = app.call("GET", "/api/v1/routes", Some(&citizen), None).await?;
    assert_eq!(status, StatusCode::FORBIDDEN);

    let (status, _) = app
        .call(
            "POST",
            "/api/v1/routes/create-from-requests",
            Some(&dispatcher),
            Some(json!({"request_ids": []})),
        )
        .await?;
    assert_eq!(status, StatusCode::BAD_REQUEST);
    Ok(())
}

#[tokio::test]
async fn completing_a_stop_completes_the_request() -> Result<()> {
    let app = TestApp::new();
    let (_, citizen) = app.user("ailsa", Role::Citizen).await?;
    let (_, dispatcher) = app.user("dispatch", Role::Dispatcher).await?;
    let (driver, _) = app.driver(&dispatcher, "ruaridh", None).await?;

    let pickup = app.submit_pickup(&citizen, "2031-03-04T09:00:00Z", 55.90, -3.10).await?;
    let (status, route) = app
        .call(
            "POST",
            "/api/v1/routes/create-from-requests",
            Some(&dispatcher),
            Some(json!({"request_ids": [pickup["id"]], "driver_id": driver["id"]})),
        )
        .await?;
    assert_eq!(status, StatusCode::CREATED, "{route}");
    let stop_id = route["stops"][0]["id"].as_str().unwrap_or_default().to_string();

    let (status, stop) = app
        .call("POST", &format!("/api/v1/route-stops/{stop_id}/mark-completed"), Some(&dispatcher), None)
        .await?;
    assert_eq!(status, StatusCode::OK, "{stop}");
    assert_eq!(stop["status"], "SERVED");
    assert!(stop["arrival_time"].is_string());

    let (_, done) = app
        .call("GET", &format!("/api/v1/pickups/{}", pickup["id"].as_str().unwrap_or_default()), Some(&citizen), None)
        .await?;
    assert_eq!(done["status"], "completed");
    assert_eq!(done["assigned_driver"], driver["id"]);

    let (status, _) = app
        .call("POST", &format!("/api/v1/route-stops/{stop_id}/mark-completed"), Some(&dispatcher), None)
        .await?;
    assert_eq!(status, StatusCode::BAD_REQUEST);
    Ok(())
}

#[tokio::test]
async fn routes_never_double_book_a_driver() -> Result<()> {
    let app = TestApp::new();
    let (_, citizen) = app.user("eilish", Role::Citizen).await?;
    let (_, dispatcher) = app.user("dispatch", Role::Dispatcher).await?;
    let (driver, _) = app.driver(&dispatcher, "angus", None).await?;
    let parked = app.vehicle(&dispatcher, "SK21 FIX", "MAINTENANCE").await?;

    let a = app.submit_pickup(&citizen, "2031-03-04T09:00:00Z", 55.90, -3.10).await?;
    let b = app.submit_pickup(&citizen, "2031-03-04T09:00:00Z", 55.91, -3.11).await?;
    let build = "/api/v1/routes/create-from-requests";

    // Two requests at the same time cannot both go to one driver
    let (status, _) = app
        .call("POST", build, Some(&dispatcher), Some(json!({"request_ids": [a["id"], b["id"]], "driver_id": driver["id"]})))
        .await?;
    assert_eq!(status, StatusCode::CONFLICT);

    // Nothing from the rejected attempt survives
    let (_, untouched) = app
        .call("GET", &format!("/api/v1/pickups/{}", a["id"].as_str().unwrap_or_default()), Some(&citizen), None)
        .await?;
    assert_eq!(untouched["status"], "requested");
    assert!(untouched["assigned_driver"].is_null());
    let (_, routes) = app.call("GET", "/api/v1/routes", Some(&dispatcher), None).await?;
    assert_eq!(routes["count"], 0);

    // A vehicle off the road cannot be handed out through a route either
    let (status, _) = app
        .call("POST", build, Some(&dispatcher), Some(json!({"request_ids": [a["id"]], "vehicle_id": parked["id"]})))
        .await?;
    assert_eq!(status, StatusCode::BAD_REQUEST);

    let (status, route) = app
        .call("POST", build, Some(&dispatcher), Some(json!({"request_ids": [a["id"]], "driver_id": driver["id"]})))
        .await?;
    assert_eq!(status, StatusCode::CREATED, "{route}");
    let (status, _) = app
        .call("POST", build, Some(&dispatcher), Some(json!({"request_ids": [b["id"]], "driver_id": driver["id"]})))
        .await?;
    assert_eq!(status, StatusCode::CONFLICT);
    Ok(())
}

#[tokio::test]
async fn stops_on_a_closed_route_cannot_be_worked() -> Result<()> {
    let app = TestApp::new();
    let (_, citizen) = app.user("lorna", Role::Citizen).await?;
    let (_, dispatcher) = app.user("dispatch", Role::Dispatcher).await?;
    let (driver, _) = app.driver(&dispatcher, "finlay", None).await?;

    let first = app.submit_pickup(&citizen, "2031-03-04T09:00:00Z", 55.90, -3.10).await?;
    let second = app.submit_pickup(&citizen, "2031-03-04T10:00:00Z", 55.91, -3.11).await?;
    let (status, route) = app
        .call(
            "POST",
            "/api/v1/routes/create-from-requests",
            Some(&dispatcher),
            Some(json!({"request_ids": [first["id"], second["id"]], "driver_id": driver["id"]})),
        )
        .await?;
    assert_eq!(status, StatusCode::CREATED, "{route}");
    let route_id = route["id"].as_str().unwrap_or_default().to_string();

    let (status, cancelled) = app
        .call(
            "POST",
            &format!("/api/v1/routes/{route_id}/change-status"),
            Some(&dispatcher),
            Some(json!({"status": "CANCELLED"})),
        )
        .await?;
    assert_eq!(status, StatusCode::OK, "{cancelled}");

    for (index, action) in [(0, "mark-completed"), (1, "mark-skipped")] {
        let stop_id = route["stops"][index]["id"].as_str().unwrap_or_default();
        let (status, _) = app
            .call("POST", &format!("/api/v1/route-stops/{stop_id}/{action}"), Some(&dispatcher), None)
            .await?;
        assert_eq!(status, StatusCode::BAD_REQUEST);
    }

    let (_, pickup) = app
        .call("GET", &format!("/api/v1/pickups/{}", first["id"].as_str().unwrap_or_default()), Some(&citizen), None)
        .await?;
    assert_eq!(pickup["status"], "scheduled");
    Ok(())
}

#[tokio::test]
async fn invoices_are_paid_exactly_once() -> Result<()> {
    let app = TestApp::new();
    let (customer_id, customer) = app.user("hamish", Role::Citizen).await?;
    let (_, stranger) = app.user("rory", Role::Citizen).await?;
    let (_, dispatcher) = app.user("dispatch", Role::Dispatcher).await?;

    let (status, _) = app
        .call("POST", "/api/v1/invoices", Some(&customer), Some(json!({"customer_id": customer_id, "total_amount": "25.00"})))
        .await?;
    assert_eq!(status, StatusCode::FORBIDDEN);

    let (status, invoice) = app
        .call(
            "POST",
            "/api/v1/invoices",
            Some(&dispatcher),
            Some(json!({"customer_id": customer_id, "total_amount": "25.00", "description": "Bulky waste"})),
        )
        .await?;
    assert_eq!(status, StatusCode::CREATED, "{invoice}");
    assert_eq!(invoice["status"], "PENDING");
    let invoice_uri = format!("/api/v1/invoices/{}", invoice["id"].as_str().unwrap_or_default());
    let pay = format!("{invoice_uri}/mark-paid");

    // Customers cannot settle their own invoice
    for who in [&customer, &stranger] {
        let (status, _) = app.call("POST", &pay, Some(who), None).await?;
        assert_eq!(status, StatusCode::FORBIDDEN);
    }

    // A body that is present must be valid; it is never swapped for the default
    let (status, _) = app
        .call("POST", &pay, Some(&dispatcher), Some(json!({"payment_method": "BITCOIN"})))
        .await?;
    assert_eq!(status, StatusCode::BAD_REQUEST);
    let (status, _) = app.send("POST", &pay, Some(&dispatcher), Some(b"{not json".to_vec())).await?;
    assert_eq!(status, StatusCode::BAD_REQUEST);
    let (_, still_open) = app.call("GET", &invoice_uri, Some(&customer), None).await?;
    assert_eq!(still_open["status"], "PENDING");

    let (status, paid) = app
        .call("POST", &pay, Some(&dispatcher), Some(json!({"payment_method": "CARD", "payment_reference": "ch_123"})))
        .await?;
    assert_eq!(status, StatusCode::OK, "{paid}");
    assert_eq!(paid["detail"], "Invoice marked as paid");
    assert_eq!(paid["invoice"]["status"], "PAID");
    assert!(paid["invoice"]["paid_date"].is_string());
    assert_eq!(paid["payment"]["amount"], "25.00");
    assert_eq!(paid["payment"]["payment_method"], "CARD");

    let (status, _) = app.call("POST", &pay, Some(&dispatcher), None).await?;
    assert_eq!(status, StatusCode::BAD_REQUEST);

    let (_, payments) = app.call("GET", "/api/v1/payments", Some(&customer), None).await?;
    assert_eq!(payments["count"], 1);
    let (_, payments) = app.call("GET", "/api/v1/payments", Some(&stranger), None).await?;
    assert_eq!(payments["count"], 0);
    Ok(())
}

#[tokio::test]
async fn empty_bodies_fall_back_to_defaults() -> Result<()> {
    let app = TestApp::new();
    let (customer_id, citizen) = app.user("shona", Role::Citizen).await?;
    let (_, dispatcher) = app.user("dispatch", Role::Dispatcher).await?;

    let (_, invoice) = app
        .call(
            "POST",
            "/api/v1/invoices",
            Some(&dispatcher),
            Some(json!({"customer_id": customer_id, "total_amount": "12.345"})),
        )
        .await?;
    assert_eq!(invoice["total_amount"], "12.35");
    let pay = format!("/api/v1/invoices/{}/mark-paid", invoice["id"].as_str().unwrap_or_default());
    let (status, paid) = app.send("POST", &pay, Some(&dispatcher), Some(b"  ".to_vec())).await?;
    assert_eq!(status, StatusCode::OK, "{paid}");
    assert_eq!(paid["payment"]["payment_method"], "CASH");

    let pickup = app.submit_pickup(&citizen, "2031-03-04T09:00:00Z", 55.97, -3.17).await?;
    let cancel = format!("/api/v1/pickups/{}/cancel", pickup["id"].as_str().unwrap_or_default());
    let (status, _) = app.call("POST", &cancel, Some(&citizen), Some(json!({"reason": 5}))).await?;
    assert_eq!(status, StatusCode::BAD_REQUEST);
    let (status, cancelled) = app.call("POST", &cancel, Some(&citizen), None).await?;
    assert_eq!(status, StatusCode::OK, "{cancelled}");
    assert_eq!(cancelled["cancelled_reason"], "");
    Ok(())
}

#[tokio::test]
async fn addresses_filter_by_zone() -> Result<()> {
    let app = TestApp::new();
    let (_, citizen) = app.user("morven", Role::Citizen).await?;
    let (_, dispatcher) = app.user("dispatch", Role::Dispatcher).await?;

    let polygon = json!({
        "type": "Polygon",
        "coordinates": [[[-3.3, 55.9], [-3.1, 55.9], [-3.1, 56.0], [-3.3, 56.0], [-3.3, 55.9]]]
    });
    let (status, zone) = app
        .call(
            "POST",
            "/api/v1/zones",
            Some(&dispatcher),
            Some(json!({"name": "Leith", "polygon_geojson": polygon.to_string()})),
        )
        .await?;
    assert_eq!(status, StatusCode::CREATED, "{zone}");

    for (line1, lat, lng) in [("Inside Lane", 55.95, -3.2), ("Outside Road", 55.5, -4.0)] {
        let (status, _) = app
            .call(
                "POST",
                "/api/v1/addresses",
                Some(&citizen),
                Some(json!({"line1": line1, "city": "Leith", "lat": lat, "lng": lng})),
            )
            .await?;
        assert_eq!(status, StatusCode::CREATED);
    }

    let (status, body) = app.call("GET", "/api/v1/addresses/by-zone", Some(&citizen), None).await?;
    assert_eq!(status, StatusCode::BAD_REQUEST);
    assert_eq!(body["detail"], "zone_id parameter required");

    let uri = format!("/api/v1/addresses/by-zone?zone_id={}", zone["id"].as_str().unwrap_or_default());
    let (status, inside) = app.call("GET", &uri, Some(&citizen), None).await?;
    assert_eq!(status, StatusCode::OK);
    let lines: Vec<&str> = inside["results"]
        .as_array()
        .map(|a| a.iter().filter_map(|v| v["line1"].as_str()).collect())
        .unwrap_or_default();
    assert_eq!(lines, vec!["Inside Lane"]);

    let (status, _) = app
        .call("POST", "/api/v1/zones", Some(&dispatcher), Some(json!({"name": "Bad", "polygon_geojson": "{not json"})))
        .await?;
    assert_eq!(status, StatusCode::BAD_REQUEST);
    Ok(())
}

#[tokio::test]
async fn drivers_report_positions_for_their_own_vehicle() -> Result<()> {
    let app = TestApp::new();
    let (_, dispatcher) = app.user("dispatch", Role::Dispatcher).await?;
    let own = app.vehicle(&dispatcher, "SK21 ONE", "AVAILABLE").await?;
    let other = app.vehicle(&dispatcher, "SK21 TWO", "AVAILABLE").await?;
    let (driver, token) = app.driver(&dispatcher, "murdo", Some(&own)).await?;
    let (_, no_profile) = app.user("spare", Role::Driver).await?;
    let location = |vehicle: &Value| format!("/api/v1/tracking/vehicles/{}/location", vehicle["id"].as_str().unwrap_or_default());

    let (status, log) = app
        .call("POST", &location(&own), Some(&token), Some(json!({"lat": 55.95, "lng": -3.19, "speed": 22.5})))
        .await?;
    assert_eq!(status, StatusCode::CREATED, "{log}");
    assert_eq!(log["vehicle"], own["id"]);
    assert_eq!(log["driver"], driver["id"]);
    assert_eq!(log["latitude"], 55.95);

    let (_, fleet) = app.call("GET", "/api/v1/tracking/vehicle-status", Some(&dispatcher), None).await?;
    let reported = fleet
        .as_array()
        .and_then(|v| v.iter().find(|p| p["vehicle_id"] == own["id"]).cloned())
        .unwrap_or_default();
    assert_eq!(reported["last_location"]["lat"], 55.95);

    // Someone else's vehicle, bad readings and callers without a profile
    let (status, _) = app
        .call("POST", &location(&other), Some(&token), Some(json!({"lat": 55.95, "lng": -3.19})))
        .await?;
    assert_eq!(status, StatusCode::FORBIDDEN);
    for reading in [json!({"lat": 95.0, "lng": -3.19}), json!({"lat": 55.95, "lng": -3.19, "speed": -4.0})] {
        let (status, _) = app.call("POST", &location(&own), Some(&token), Some(reading)).await?;
        assert_eq!(status, StatusCode::BAD_REQUEST);
    }
    let (status, _) = app
        .call("POST", &location(&own), Some(&dispatcher), Some(json!({"lat": 55.95, "lng": -3.19})))
        .await?;
    assert_eq!(status, StatusCode::FORBIDDEN);

    let (status, dashboard) = app.call("GET", "/api/v1/tracking/driver-dashboard", Some(&token), None).await?;
    assert_eq!(status, StatusCode::OK, "{dashboard}");
    assert_eq!(dashboard["driver"]["id"], driver["id"]);
    assert_eq!(dashboard["vehicle"]["id"], own["id"]);
    let (status, body) = app
        .call("GET", "/api/v1/tracking/driver-dashboard", Some(&no_profile), None)
        .await?;
    assert_eq!(status, StatusCode::NOT_FOUND);
    assert_eq!(body["detail"], "Driver profile not found");
    Ok(())
}

#[tokio::test]
async fn fleet_status_and_vehicle_handover() -> Result<()> {
    let app = TestApp::new();
    let (_, citizen) = app.user("kenna", Role::Citizen).await?;
    let (_, dispatcher) = app.user("dispatch", Role::Dispatcher).await?;
    let truck = app.vehicle(&dispatcher, "SK21 TRK", "AVAILABLE").await?;
    let (driver, _) = app.driver(&dispatcher, "ewan", None).await?;
    let (resting, _) = app.driver(&dispatcher, "innes", None).await?;
    let truck_uri = format!("/api/v1/vehicles/{}", truck["id"].as_str().unwrap_or_default());
    let handover = format!("/api/v1/drivers/{}/assign-vehicle", driver["id"].as_str().unwrap_or_default());

    let (status, _) = app
        .call("POST", &format!("{truck_uri}/change-status"), Some(&citizen), Some(json!({"status": "MAINTENANCE"})))
        .await?;
    assert_eq!(status, StatusCode::FORBIDDEN);
    let (status, _) = app
        .call("POST", &format!("{truck_uri}/change-status"), Some(&dispatcher), Some(json!({"status": "SCRAPPED"})))
        .await?;
    assert_eq!(status, StatusCode::BAD_REQUEST);
    let (status, parked) = app
        .call("POST", &format!("{truck_uri}/change-status"), Some(&dispatcher), Some(json!({"status": "MAINTENANCE"})))
        .await?;
    assert_eq!(status, StatusCode::OK);
    assert_eq!(parked["status"], "MAINTENANCE");

    // Only available vehicles are handed to drivers
    let (status, _) = app
        .call("POST", &handover, Some(&dispatcher), Some(json!({"vehicle_id": truck["id"]})))
        .await?;
    assert_eq!(status, StatusCode::BAD_REQUEST);
    app.call("POST", &format!("{truck_uri}/change-status"), Some(&dispatcher), Some(json!({"status": "AVAILABLE"})))
        .await?;
    let (status, assigned) = app
        .call("POST", &handover, Some(&dispatcher), Some(json!({"vehicle_id": truck["id"]})))
        .await?;
    assert_eq!(status, StatusCode::OK, "{assigned}");
    assert_eq!(assigned["assigned_vehicle"], truck["id"]);
    let (_, cleared) = app
        .call("POST", &handover, Some(&dispatcher), Some(json!({"vehicle_id": null})))
        .await?;
    assert!(cleared["assigned_vehicle"].is_null());

    let (status, _) = app
        .call(
            "PATCH",
            &format!("/api/v1/drivers/{}", resting["id"].as_str().unwrap_or_default()),
            Some(&dispatcher),
            Some(json!({"active": false})),
        )
        .await?;
    assert_eq!(status, StatusCode::OK);
    let (_, active) = app.call("GET", "/api/v1/drivers/active", Some(&dispatcher), None).await?;
    assert_eq!(active["count"], 1);
    assert_eq!(active["results"][0]["id"], driver["id"]);
    Ok(())
}

#[tokio::test]
async fn staff_send_notifications_and_owners_read_them() -> Result<()> {
    let app = TestApp::new();
    let (citizen_id, citizen) = app.user("una", Role::Citizen).await?;
    let (_, neighbour) = app.user("ishbel", Role::Citizen).await?;
    let (_, dispatcher) = app.user("dispatch", Role::Dispatcher).await?;
    let send = "/api/v1/notifications/send-notification";

    let message = json!({"user_id": citizen_id, "title": "Bin day moved", "message": "Collections move to Friday."});
    let (status, _) = app.call("POST", send, Some(&citizen), Some(message.clone())).await?;
    assert_eq!(status, StatusCode::FORBIDDEN);
    let (status, _) = app
        .call("POST", send, Some(&dispatcher), Some(json!({"user_id": citizen_id, "title": "  ", "message": "x"})))
        .await?;
    assert_eq!(status, StatusCode::BAD_REQUEST);
    let (status, _) = app
        .call(
            "POST",
            send,
            Some(&dispatcher),
            Some(json!({"user_id": uuid::Uuid::new_v4(), "title": "Hello", "message": "x"})),
        )
        .await?;
    assert_eq!(status, StatusCode::NOT_FOUND);

    let (status, sent) = app.call("POST", send, Some(&dispatcher), Some(message)).await?;
    assert_eq!(status, StatusCode::CREATED, "{sent}");
    assert_eq!(sent["is_read"], false);
    let read = format!("/api/v1/notifications/{}/mark-read", sent["id"].as_str().unwrap_or_default());

    let (status, _) = app.call("POST", &read, Some(&neighbour), None).await?;
    assert_eq!(status, StatusCode::NOT_FOUND);
    let (status, marked) = app.call("POST", &read, Some(&citizen), None).await?;
    assert_eq!(status, StatusCode::OK);
    assert_eq!(marked["is_read"], true);
    assert!(marked["read_at"].is_string());
    let (_, unread) = app.call("GET", "/api/v1/notifications/unread-count", Some(&citizen), None).await?;
    assert_eq!(unread["unread_count"], 0);
    Ok(())
}

#[tokio::test]
async fn issue_reports_move_through_staff_review() -> Result<()> {
    let app = TestApp::new();
    let (_, citizen) = app.user("tam", Role::Citizen).await?;
    let (_, dispatcher) = app.user("dispatch", Role::Dispatcher).await?;

    let (_, address) = app
        .call("POST", "/api/v1/addresses", Some(&citizen), Some(json!({"line1": "3 Kirkgate", "city": "Leith"})))
        .await?;
    let (status, issue) = app
        .call(
            "POST",
            "/api/v1/issue-reports",
            Some(&citizen),
            Some(json!({"address_id": address["id"], "type": "MISSED_PICKUP", "description": "Bins still full"})),
        )
        .await?;
    assert_eq!(status, StatusCode::CREATED, "{issue}");
    assert_eq!(issue["status"], "OPEN");
    let change = format!("/api/v1/issue-reports/{}/change-status", issue["id"].as_str().unwrap_or_default());

    let (status, _) = app.call("POST", &change, Some(&citizen), Some(json!({"status": "RESOLVED"}))).await?;
    assert_eq!(status, StatusCode::FORBIDDEN);
    let (status, _) = app.call("POST", &change, Some(&dispatcher), Some(json!({"status": "IGNORED"}))).await?;
    assert_eq!(status, StatusCode::BAD_REQUEST);
    for next in ["ACKNOWLEDGED", "RESOLVED"] {
        let (status, updated) = app.call("POST", &change, Some(&dispatcher), Some(json!({"status": next}))).await?;
        assert_eq!(status, StatusCode::OK);
        assert_eq!(updated["status"], next);
    }

    // The report keeps its address alive
    let (status, _) = app
        .call("DELETE", &format!("/api/v1/addresses/{}", address["id"].as_str().unwrap_or_default()), Some(&citizen), None)
        .await?;
    assert_eq!(status, StatusCode::CONFLICT);
    Ok(())
}

#[tokio::test]
async fn referenced_zones_cannot_be_deleted() -> Result<()> {
    let app = TestApp::new();
    let (_, dispatcher) = app.user("dispatch", Role::Dispatcher).await?;

    let (status, zone) = app
        .call("POST", "/api/v1/zones", Some(&dispatcher), Some(json!({"name": "Portobello"})))
        .await?;
    assert_eq!(status, StatusCode::CREATED, "{zone}");
    let (status, route) = app
        .call("POST", "/api/v1/routes", Some(&dispatcher), Some(json!({"zone_id": zone["id"]})))
        .await?;
    assert_eq!(status, StatusCode::CREATED, "{route}");

    let zone_uri = format!("/api/v1/zones/{}", zone["id"].as_str().unwrap_or_default());
    let (status, _) = app.call("DELETE", &zone_uri, Some(&dispatcher), None).await?;
    assert_eq!(status, StatusCode::CONFLICT);

    let (status, _) = app
        .call("DELETE", &format!("/api/v1/routes/{}", route["id"].as_str().unwrap_or_default()), Some(&dispatcher), None)
        .await?;
    assert_eq!(status, StatusCode::NO_CONTENT);
    let (status, _) = app.call("DELETE", &zone_uri, Some(&dispatcher), None).await?;
    assert_eq!(status, StatusCode::NO_CONTENT);
    Ok(())
}
