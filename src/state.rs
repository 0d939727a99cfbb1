use std::sync::Arc;

use crate::app::ports::NotificationSink;
use crate::app::{
    AccountService, BillingService, FleetService, LocationService, NotificationService,
    PickupService, RoutingService, TrackingService, WasteService,
};
use crate::auth::TokenService;
use crate::config::Config;
use crate::storage::InMemoryStorage;

/// Shared state handed to every request handler.
#[derive(Clone)]
pub struct AppState {
    pub storage: Arc<InMemoryStorage>,
    pub tokens: Arc<TokenService>,
    pub config: Arc<Config>,
    pub notifier: Arc<dyn NotificationSink>,
}

impl AppState {
    pub fn new(config: Config, storage: InMemoryStorage, notifier: Arc<dyn NotificationSink>) -> Self {
        let tokens = TokenService::from_config(&config.auth);
        Self {
            storage: Arc::new(storage),
            tokens: Arc::new(tokens),
            config: Arc::new(config),
            notifier,
        }
    }

    pub fn accounts(&self) -> AccountService<'_> {
        AccountService::new(&self.storage, &self.tokens, &self.config.auth)
    }

    pub fn locations(&self) -> LocationService<'_> {
        LocationService::new(&self.storage)
    }

    pub fn fleet(&self) -> FleetService<'_> {
        FleetService::new(&self.storage)
    }

    pub fn waste(&self) -> WasteService<'_> {
        WasteService::new(&self.storage)
    }

    pub fn pickups(&self) -> PickupService<'_> {
        PickupService::new(&self.storage, self.notifications())
    }

    pub fn routing(&self) -> RoutingService<'_> {
        RoutingService::new(&self.storage, self.notifications())
    }

    pub fn tracking(&self) -> TrackingService<'_> {
        TrackingService::new(&self.storage)
    }

    pub fn notifications(&self) -> NotificationService<'_> {
        NotificationService::new(&self.storage, self.notifier.as_ref())
    }

    pub fn billing(&self) -> BillingService<'_> {
        BillingService::new(&self.storage, &self.config.billing)
    }
}
