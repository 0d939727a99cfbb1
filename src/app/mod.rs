//! Use cases, one service per resource. Each service owns the permission
//! checks and validation for its resource; handlers only translate HTTP.

pub mod accounts;
pub mod billing;
pub mod fleet;
pub mod locations;
pub mod notifications;
pub mod pickups;
pub mod ports;
pub mod routing;
pub mod tracking;
pub mod waste;

pub use accounts::AccountService;
pub use billing::BillingService;
pub use fleet::FleetService;
pub use locations::LocationService;
pub use notifications::NotificationService;
pub use pickups::PickupService;
pub use routing::RoutingService;
pub use tracking::TrackingService;
pub use waste::WasteService;

use std::borrow::Cow;
use validator::ValidationError;

use crate::error::ApiError;

/// Turn a domain validation message into a 400.
pub(crate) fn invalid(message: String) -> ApiError {
    ApiError::BadRequest(message)
}

/// Validation error with a readable message, for custom and schema rules.
pub(crate) fn rule(code: &'static str, message: impl Into<String>) -> ValidationError {
    let mut error = ValidationError::new(code);
    error.message = Some(Cow::Owned(message.into()));
    error
}

/// Required text must contain more than whitespace.
pub(crate) fn not_blank(value: &str) -> Result<(), ValidationError> {
    if value.trim().is_empty() {
        Err(rule("blank", "may not be blank"))
    } else {
        Ok(())
    }
}
