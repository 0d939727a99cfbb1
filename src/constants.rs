/// Defaults shared across the service. Most of these can be overridden from
/// `config.toml`; see `crate::config`.

// Routing
pub const API_PREFIX: &str = "/api/v1";

// Pagination
pub const DEFAULT_PAGE_SIZE: usize = 20;
pub const MAX_PAGE_SIZE: usize = 100;

// Token lifetimes
pub const ACCESS_TOKEN_MINUTES: i64 = 120;
pub const REFRESH_TOKEN_DAYS: i64 = 7;

// PBKDF2 iteration count for new password hashes
pub const PASSWORD_ROUNDS: u32 = 60_000;

// Billing: amounts are in cents
pub const PICKUP_BASE_FEE_CENTS: i64 = 1_000;
pub const PICKUP_PER_KG_CENTS: i64 = 500;
pub const INVOICE_DUE_DAYS: i64 = 30;

// Upper bound on a declared pickup weight
pub const MAX_ESTIMATED_WEIGHT_KG: f64 = 50_000.0;

// Server
pub const DEFAULT_HOST: &str = "0.0.0.0";
pub const DEFAULT_PORT: u16 = 8000;
pub const DEFAULT_CONFIG_PATH: &str = "config.toml";
pub const DEFAULT_LOG_DIR: &str = "logs";
pub const DEV_SECRET_KEY: &str = "dev-insecure-secret-change-me";
