//! Domain entities of the waste-collection service and the rules that belong
//! to them (status lifecycles, validation, pricing).

pub mod account;
pub mod billing;
pub mod fleet;
pub mod location;
pub mod notification;
pub mod request;
pub mod routing;
pub mod tracking;

pub use account::{Role, User, UserView};
pub use billing::{Invoice, InvoiceStatus, Payment, PaymentMethod};
pub use fleet::{Driver, Vehicle, VehicleStatus};
pub use location::{Address, Coordinates, Zone};
pub use notification::{Channel, Notification, NotificationType};
pub use request::{
    IssueReport, IssueStatus, IssueType, PickupRequest, RecurrenceSchedule, RequestStatus,
    WasteType,
};
pub use routing::{Route, RouteStatus, RouteStop, StopStatus};
pub use tracking::GpsLog;

use serde::de::DeserializeOwned;

/// Parse an enum from its wire name, reusing the type's serde renames.
///
/// Returns `None` for anything that is not a declared member, which callers
/// turn into a 400.
pub fn parse_choice<T: DeserializeOwned>(value: &str) -> Option<T> {
    serde_json::from_value(serde_json::Value::String(value.to_string())).ok()
}
