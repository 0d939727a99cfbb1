use axum::{
    http::{header, Method},
    response::{IntoResponse, Json},
    routing::{get, post},
    Router,
};
use hyper::Server;
use std::net::SocketAddr;
use tower::ServiceBuilder;
use tower_http::cors::{Any, CorsLayer};
use tower_http::trace::TraceLayer;
use tracing::info;

use crate::constants::API_PREFIX;
use crate::handlers::{accounts, billing, fleet, locations, notifications, pickups, routing, tracking, waste};
use crate::state::AppState;

/// Health check endpoint
async fn health() -> impl IntoResponse {
    Json(serde_json::json!({
        "status": "healthy",
        "service": "waste-collection",
        "version": env!("CARGO_PKG_VERSION")
    }))
}

fn api_routes() -> Router<AppState> {
    Router::new()
        // Accounts
        .route("/auth/register", post(accounts::register))
        .route("/auth/token", post(accounts::token))
        .route("/auth/token/refresh", post(accounts::refresh))
        .route("/auth/me", get(accounts::me))
        .route("/users", get(accounts::list_users))
        .route("/users/:id/set-role", post(accounts::set_role))
        .route("/users/:id/deactivate", post(accounts::deactivate))
        // Locations
        .route("/addresses", get(locations::list_addresses).post(locations::create_address))
        .route("/addresses/by-zone", get(locations::addresses_by_zone))
        .route(
            "/addresses/:id",
            get(locations::get_address)
                .put(locations::update_address)
                .patch(locations::update_address)
                .delete(locations::delete_address),
        )
        .route("/zones", get(locations::list_zones).post(locations::create_zone))
        .route(
            "/zones/:id",
            get(locations::get_zone)
                .put(locations::update_zone)
                .patch(locations::update_zone)
                .delete(locations::delete_zone),
        )
        .route("/zones/:id/addresses", get(locations::zone_addresses))
        // Fleet
        .route("/vehicles", get(fleet::list_vehicles).post(fleet::create_vehicle))
        .route("/vehicles/available", get(fleet::available_vehicles))
        .route(
            "/vehicles/:id",
            get(fleet::get_vehicle)
                .put(fleet::update_vehicle)
                .patch(fleet::update_vehicle)
                .delete(fleet::delete_vehicle),
        )
        .route("/vehicles/:id/change-status", post(fleet::change_vehicle_status))
        .route("/drivers", get(fleet::list_drivers).post(fleet::create_driver))
        .route("/drivers/active", get(fleet::active_drivers))
        .route(
            "/drivers/:id",
            get(fleet::get_driver)
                .put(fleet::update_driver)
                .patch(fleet::update_driver)
                .delete(fleet::delete_driver),
        )
        .route("/drivers/:id/assign-vehicle", post(fleet::assign_vehicle))
        // Waste catalogue, requests, schedules and reports
        .route("/waste-types", get(waste::list_waste_types).post(waste::create_waste_type))
        .route(
            "/waste-types/:id",
            get(waste::get_waste_type)
                .put(waste::update_waste_type)
                .patch(waste::update_waste_type)
                .delete(waste::delete_waste_type),
        )
        .route("/pickups", get(pickups::list_pickups).post(pickups::create_pickup))
        .route(
            "/pickups/:id",
            get(pickups::get_pickup)
                .put(pickups::update_pickup)
                .patch(pickups::update_pickup)
                .delete(pickups::delete_pickup),
        )
        .route("/pickups/:id/change-status", post(pickups::change_status))
        .route("/pickups/:id/assign", post(pickups::assign))
        .route("/pickups/:id/cancel", post(pickups::cancel))
        .route(
            "/recurrence-schedules",
            get(waste::list_schedules).post(waste::create_schedule),
        )
        .route("/recurrence-schedules/generate", post(waste::generate_from_schedules))
        .route(
            "/recurrence-schedules/:id",
            get(waste::get_schedule)
                .put(waste::update_schedule)
                .patch(waste::update_schedule)
                .delete(waste::delete_schedule),
        )
        .route("/issue-reports", get(waste::list_issues).post(waste::create_issue))
        .route(
            "/issue-reports/:id",
            get(waste::get_issue)
                .put(waste::update_issue)
                .patch(waste::update_issue)
                .delete(waste::delete_issue),
        )
        .route("/issue-reports/:id/change-status", post(waste::change_issue_status))
        // Routing
        .route("/routes", get(routing::list_routes).post(routing::create_route))
        .route("/routes/create-from-requests", post(routing::create_from_requests))
        .route(
            "/routes/:id",
            get(routing::get_route)
                .put(routing::update_route)
                .patch(routing::update_route)
                .delete(routing::delete_route),
        )
        .route("/routes/:id/stops", get(routing::route_stops))
        .route("/routes/:id/optimize", post(routing::optimize))
        .route("/routes/:id/change-status", post(routing::change_route_status))
        .route("/route-stops", get(routing::list_stops))
        .route("/route-stops/:id", get(routing::get_stop))
        .route("/route-stops/:id/mark-completed", post(routing::mark_stop_completed))
        .route("/route-stops/:id/mark-skipped", post(routing::mark_stop_skipped))
        // Tracking
        .route("/tracking/active-routes", get(tracking::active_routes))
        .route("/tracking/vehicle-status", get(tracking::vehicle_status))
        .route("/tracking/pickup-status", get(tracking::pickup_status))
        .route("/tracking/vehicles/:id/location", post(tracking::update_location))
        .route("/tracking/routes/:id/gps-logs", get(tracking::route_gps_logs))
        .route("/tracking/driver-dashboard", get(tracking::driver_dashboard))
        // Notifications
        .route("/notifications", get(notifications::list_notifications))
        .route("/notifications/mark-all-read", post(notifications::mark_all_read))
        .route("/notifications/unread", get(notifications::unread))
        .route("/notifications/unread-count", get(notifications::unread_count))
        .route("/notifications/send-notification", post(notifications::send_notification))
        .route("/notifications/:id", get(notifications::get_notification))
        .route("/notifications/:id/mark-read", post(notifications::mark_read))
        // Billing
        .route("/invoices", get(billing::list_invoices).post(billing::create_invoice))
        .route("/invoices/generate-from-pickups", post(billing::generate_from_pickups))
        .route("/invoices/:id", get(billing::get_invoice))
        .route("/invoices/:id/mark-paid", post(billing::mark_paid))
        .route("/payments", get(billing::list_payments))
        .route("/payments/:id", get(billing::get_payment))
}

/// Create the HTTP application with every route mounted under the API prefix.
pub fn create_server(state: AppState) -> Router {
    let cors = CorsLayer::new()
        .allow_origin(Any)
        .allow_methods([Method::GET, Method::POST, Method::PUT, Method::PATCH, Method::DELETE])
        .allow_headers([header::AUTHORIZATION, header::CONTENT_TYPE]);

    Router::new()
        .route("/health", get(health))
        .nest(API_PREFIX, api_routes())
        .layer(ServiceBuilder::new().layer(TraceLayer::new_for_http()).layer(cors))
        .with_state(state)
}

/// Serve the application until Ctrl-C.
pub async fn start_server(state: AppState, addr: SocketAddr) -> anyhow::Result<()> {
    let app = create_server(state);

    info!("HTTP server running on http://{}", addr);
    info!("Health check: http://{}/health", addr);
    info!("API root: http://{}{}", addr, API_PREFIX);

    Server::bind(&addr)
        .serve(app.into_make_service())
        .with_graceful_shutdown(async {
            let _ = tokio::signal::ctrl_c().await;
            info!("Shutdown signal received");
        })
        .await?;

    Ok(())
}
