use axum::{
    http::HeaderValue,
    middleware,
    routing::{get, post, put},
    Router,
};
use sqlx::PgPool;
use std::sync::Arc;
use std::time::Duration;
use tower_http::{
    compression::CompressionLayer,
    cors::{Any, CorsLayer},
    timeout::TimeoutLayer,
    trace::TraceLayer,
};

use crate::config::Config;
use crate::middleware::{metrics_handler, metrics_middleware, trace_id};
use crate::routes::{drivers, health, nearby, rides, ws};
use crate::services::broadcast::BroadcastFabric;
use crate::services::driver_state::DriverState;
use crate::services::lifecycle::RideLifecycle;
use crate::services::matcher::OfferMatcher;
use crate::services::offer_timers::OfferTimers;
use crate::services::presence::{PresenceConfig, PresenceIndex};
use crate::services::registry::SessionRegistry;

#[derive(Clone)]
pub struct AppState {
    pub pool: PgPool,
    pub config: Arc<Config>,
    pub presence: Arc<PresenceIndex>,
    pub registry: Arc<SessionRegistry>,
    pub fabric: Arc<BroadcastFabric>,
    pub timers: Arc<OfferTimers>,
    pub matcher: Arc<OfferMatcher>,
    pub lifecycle: Arc<RideLifecycle>,
    pub driver_state: Arc<DriverState>,
}

impl AppState {
    /// Wire the dispatch core: presence on the geo kernel, fabric on
    /// presence + sessions, matcher on store + presence + sessions +
    /// timers, lifecycle on store + matcher + sessions.
    pub fn build(config: Arc<Config>, pool: PgPool) -> Self {
        let dispatch = &config.dispatch;

        let presence = Arc::new(PresenceIndex::new(PresenceConfig {
            geohash_precision: dispatch.geohash_precision,
            min_update_distance_m: dispatch.min_update_distance_m,
            driver_ttl: dispatch.driver_presence_ttl(),
            subscription_ttl: dispatch.passenger_sub_ttl(),
        }));
        let registry = Arc::new(SessionRegistry::new());
        let fabric = Arc::new(BroadcastFabric::new(
            Arc::clone(&presence),
            Arc::clone(&registry),
            dispatch.min_broadcast_interval(),
        ));
        let timers = Arc::new(OfferTimers::new());
        let matcher = OfferMatcher::new(
            pool.clone(),
            Arc::clone(&presence),
            Arc::clone(&registry),
            Arc::clone(&timers),
            dispatch.offer_timeout(),
        );
        let lifecycle = Arc::new(RideLifecycle::new(
            pool.clone(),
            Arc::clone(&registry),
            Arc::clone(&matcher),
            Arc::clone(&timers),
            dispatch.default_broadcast_radius_m,
        ));
        let driver_state = Arc::new(DriverState::new(pool.clone(), Arc::clone(&fabric)));

        Self {
            pool,
            config,
            presence,
            registry,
            fabric,
            timers,
            matcher,
            lifecycle,
            driver_state,
        }
    }
}

pub fn create_app(state: AppState) -> Router {
    let cors = if state.config.security.cors_origins.is_empty() {
        CorsLayer::new()
            .allow_origin(Any)
            .allow_methods(Any)
            .allow_headers(Any)
    } else {
        let origins: Vec<HeaderValue> = state
            .config
            .security
            .cors_origins
            .iter()
            .filter_map(|origin| origin.parse().ok())
            .collect();
        CorsLayer::new()
            .allow_origin(origins)
            .allow_methods(Any)
            .allow_headers(Any)
    };

    let api = Router::new()
        .route("/rides", post(rides::create_ride))
        .route("/rides/current", get(rides::current_ride))
        .route("/rides/history", get(rides::ride_history))
        .route("/rides/:ride_id/cancel", post(rides::cancel_ride))
        .route("/rides/:ride_id/accept", post(rides::accept_ride))
        .route("/rides/:ride_id/reject", post(rides::reject_ride))
        .route("/rides/:ride_id/complete", post(rides::complete_ride))
        .route(
            "/driver/profile",
            get(drivers::get_profile).post(drivers::upsert_profile),
        )
        .route("/driver/status", put(drivers::update_status))
        .route("/driver/location", post(drivers::update_location))
        .route("/driver/ride", get(drivers::current_ride))
        .route("/driver/rides/history", get(drivers::ride_history))
        .route("/driver/rides/nearby", post(drivers::nearby_rides))
        .route("/drivers/nearby", get(nearby::nearby_drivers));

    Router::new()
        .route("/health", get(health::health_check))
        .route("/metrics", get(metrics_handler))
        .nest("/api/v1", api)
        .route("/ws/driver", get(ws::driver_ws))
        .route("/ws/passenger", get(ws::passenger_ws))
        .route("/ws/ride", get(ws::ride_ws))
        .layer(middleware::from_fn(metrics_middleware))
        .layer(middleware::from_fn(trace_id))
        .layer(TraceLayer::new_for_http())
        .layer(TimeoutLayer::new(Duration::from_secs(
            state.config.server.request_timeout_secs,
        )))
        .layer(CompressionLayer::new())
        .layer(cors)
        .with_state(state)
}
