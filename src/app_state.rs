// =============================================================================
// Central Application State
// =============================================================================
//
// The single `Arc<AppState>` handed to every HTTP/WS handler. Ingestion
// workers, the projector, and the liveness supervisor hold their own
// clones of the individual Arc fields they need rather than the whole
// struct — only the API layer needs the bundle.
// =============================================================================

use std::sync::Arc;

use crate::hub::registry::SubscriptionRegistry;
use crate::market_data::OrderbookCache;
use crate::store::Store;

/// Bundles everything the Query API (C10) needs to serve a request.
/// Ingestion, the projector, and the liveness supervisor are spawned
/// separately in `main` and communicate with this state only through the
/// store and the registry, never through a direct reference to `AppState`
/// itself.
pub struct AppState {
    pub store: Arc<Store>,
    pub registry: Arc<SubscriptionRegistry>,
    pub orderbook_cache: Arc<OrderbookCache>,
}

impl AppState {
    pub fn new(store: Arc<Store>, registry: Arc<SubscriptionRegistry>, orderbook_cache: Arc<OrderbookCache>) -> Arc<Self> {
        Arc::new(Self { store, registry, orderbook_cache })
    }
}
