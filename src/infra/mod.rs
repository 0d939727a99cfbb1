pub mod log_notification_sink;

pub use log_notification_sink::LogNotificationSink;
