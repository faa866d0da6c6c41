//! In-memory geospatial presence index.
//!
//! Holds the ephemeral side of the system: driver positions partitioned by
//! geohash tile, and passenger viewport subscriptions resolved to tile
//! sets. The durable store never sees this data on the hot path; drivers
//! re-ping within seconds, so losing the index is recoverable.
//!
//! Every operation is best-effort and infallible to callers: internal
//! anomalies degrade to neutral results instead of propagating.

use std::collections::{BTreeSet, HashMap, HashSet};
use std::sync::{RwLock, RwLockReadGuard, RwLockWriteGuard};
use std::time::{Duration, Instant};

use uuid::Uuid;

use domain::models::DriverStatus;
use shared::geo;

/// Tuning knobs for the index.
#[derive(Debug, Clone)]
pub struct PresenceConfig {
    pub geohash_precision: usize,
    pub min_update_distance_m: f64,
    pub driver_ttl: Duration,
    pub subscription_ttl: Duration,
}

impl Default for PresenceConfig {
    fn default() -> Self {
        Self {
            geohash_precision: 6,
            min_update_distance_m: 10.0,
            driver_ttl: Duration::from_secs(120),
            subscription_ttl: Duration::from_secs(300),
        }
    }
}

/// Display metadata carried with a driver's presence.
#[derive(Debug, Clone, Default)]
pub struct DriverMeta {
    pub username: Option<String>,
    pub vehicle_number: Option<String>,
}

/// Result of a driver position write.
#[derive(Debug, Clone)]
pub struct UpdateOutcome {
    pub tile: String,
    pub prev_tile: Option<String>,
    /// False iff displacement from the stored position is below the
    /// minimum update distance.
    pub moved: bool,
    pub tile_changed: bool,
}

/// A driver as returned by nearby queries, annotated with distance.
#[derive(Debug, Clone)]
pub struct NearbyDriver {
    pub driver_id: Uuid,
    pub latitude: f64,
    pub longitude: f64,
    pub username: Option<String>,
    pub vehicle_number: Option<String>,
    pub status: DriverStatus,
    pub distance_m: f64,
}

/// Point-in-time view of a single driver's presence.
#[derive(Debug, Clone)]
pub struct DriverSnapshot {
    pub driver_id: Uuid,
    pub latitude: f64,
    pub longitude: f64,
    pub tile: String,
    pub meta: DriverMeta,
    pub status: DriverStatus,
}

/// A passenger subscription as seen by tile fan-out.
#[derive(Debug, Clone)]
pub struct Subscriber {
    pub passenger_id: Uuid,
    pub channel: Uuid,
    pub latitude: f64,
    pub longitude: f64,
    pub radius_m: f64,
}

/// Result of a subscription write: the covered tiles plus the initial
/// nearby snapshot.
#[derive(Debug, Clone)]
pub struct SubscribeOutcome {
    pub tiles: Vec<String>,
    pub nearby: Vec<NearbyDriver>,
}

#[derive(Debug, Clone)]
struct DriverEntry {
    latitude: f64,
    longitude: f64,
    tile: String,
    meta: DriverMeta,
    status: DriverStatus,
    last_seen: Instant,
}

#[derive(Debug, Clone)]
struct SubscriptionEntry {
    channel: Uuid,
    latitude: f64,
    longitude: f64,
    radius_m: f64,
    tiles: BTreeSet<String>,
    last_seen: Instant,
}

#[derive(Default)]
struct Inner {
    drivers: HashMap<Uuid, DriverEntry>,
    tile_drivers: HashMap<String, HashSet<Uuid>>,
    subscriptions: HashMap<Uuid, SubscriptionEntry>,
    tile_subscribers: HashMap<String, HashSet<Uuid>>,
}

/// Geospatial store of driver positions with tile-partitioned passenger
/// subscriptions.
pub struct PresenceIndex {
    config: PresenceConfig,
    inner: RwLock<Inner>,
}

impl PresenceIndex {
    pub fn new(config: PresenceConfig) -> Self {
        Self {
            config,
            inner: RwLock::new(Inner::default()),
        }
    }

    pub fn config(&self) -> &PresenceConfig {
        &self.config
    }

    // A poisoned lock still guards valid presence data; recover the guard
    // instead of propagating the panic into hot-path callers.
    fn read(&self) -> RwLockReadGuard<'_, Inner> {
        self.inner.read().unwrap_or_else(|e| e.into_inner())
    }

    fn write(&self) -> RwLockWriteGuard<'_, Inner> {
        self.inner.write().unwrap_or_else(|e| e.into_inner())
    }

    /// Write a driver's position, metadata, and status.
    ///
    /// `moved` is false when the driver shifted less than the configured
    /// minimum distance; callers use it to suppress redundant fan-out.
    pub fn update_driver(
        &self,
        driver_id: Uuid,
        latitude: f64,
        longitude: f64,
        meta: DriverMeta,
        status: DriverStatus,
    ) -> UpdateOutcome {
        let tile = geo::encode_geohash(latitude, longitude, self.config.geohash_precision);
        let mut inner = self.write();

        let prev = inner.drivers.get(&driver_id).cloned();
        let (prev_tile, moved) = match &prev {
            Some(entry) => {
                let displacement =
                    geo::distance_m(entry.latitude, entry.longitude, latitude, longitude);
                (
                    Some(entry.tile.clone()),
                    displacement >= self.config.min_update_distance_m,
                )
            }
            None => (None, true),
        };

        let tile_changed = prev_tile.as_deref() != Some(tile.as_str());
        if tile_changed {
            if let Some(old_tile) = &prev_tile {
                if let Some(ids) = inner.tile_drivers.get_mut(old_tile) {
                    ids.remove(&driver_id);
                    if ids.is_empty() {
                        inner.tile_drivers.remove(old_tile);
                    }
                }
            }
            inner
                .tile_drivers
                .entry(tile.clone())
                .or_default()
                .insert(driver_id);
        }

        inner.drivers.insert(
            driver_id,
            DriverEntry {
                latitude,
                longitude,
                tile: tile.clone(),
                meta,
                status,
                last_seen: Instant::now(),
            },
        );

        UpdateOutcome {
            tile,
            prev_tile,
            moved,
            tile_changed,
        }
    }

    /// Delete a driver's position, metadata, and presence.
    pub fn remove_driver(&self, driver_id: Uuid) {
        let mut inner = self.write();
        if let Some(entry) = inner.drivers.remove(&driver_id) {
            if let Some(ids) = inner.tile_drivers.get_mut(&entry.tile) {
                ids.remove(&driver_id);
                if ids.is_empty() {
                    inner.tile_drivers.remove(&entry.tile);
                }
            }
        }
    }

    /// Point-in-time view of one driver, if present and fresh.
    pub fn get_driver(&self, driver_id: Uuid) -> Option<DriverSnapshot> {
        let inner = self.read();
        let entry = inner.drivers.get(&driver_id)?;
        if entry.last_seen.elapsed() > self.config.driver_ttl {
            return None;
        }
        Some(DriverSnapshot {
            driver_id,
            latitude: entry.latitude,
            longitude: entry.longitude,
            tile: entry.tile.clone(),
            meta: entry.meta.clone(),
            status: entry.status,
        })
    }

    /// Drivers within `radius_m` of a point, ascending by distance.
    ///
    /// Candidates come from the covering tile set, never a full scan; the
    /// exact haversine check then trims the tile over-approximation. The
    /// radius bound is inclusive.
    pub fn query_nearby(
        &self,
        latitude: f64,
        longitude: f64,
        radius_m: f64,
        limit: Option<usize>,
        status_filter: Option<DriverStatus>,
    ) -> Vec<NearbyDriver> {
        let tiles = geo::cover(
            latitude,
            longitude,
            radius_m,
            self.config.geohash_precision,
        );

        let inner = self.read();
        let mut seen: HashSet<Uuid> = HashSet::new();
        let mut results: Vec<NearbyDriver> = Vec::new();

        for tile in &tiles {
            let Some(ids) = inner.tile_drivers.get(tile) else {
                continue;
            };
            for driver_id in ids {
                if !seen.insert(*driver_id) {
                    continue;
                }
                let Some(entry) = inner.drivers.get(driver_id) else {
                    continue;
                };
                if entry.last_seen.elapsed() > self.config.driver_ttl {
                    continue;
                }
                if let Some(wanted) = status_filter {
                    if entry.status != wanted {
                        continue;
                    }
                }
                let distance =
                    geo::distance_m(latitude, longitude, entry.latitude, entry.longitude);
                if distance > radius_m {
                    continue;
                }
                results.push(NearbyDriver {
                    driver_id: *driver_id,
                    latitude: entry.latitude,
                    longitude: entry.longitude,
                    username: entry.meta.username.clone(),
                    vehicle_number: entry.meta.vehicle_number.clone(),
                    status: entry.status,
                    distance_m: distance,
                });
            }
        }

        results.sort_by(|a, b| {
            a.distance_m
                .partial_cmp(&b.distance_m)
                .unwrap_or(std::cmp::Ordering::Equal)
        });
        if let Some(limit) = limit {
            results.truncate(limit);
        }
        results
    }

    /// Store or refresh a passenger's viewport subscription and return the
    /// covered tiles plus an initial nearby-driver snapshot.
    pub fn subscribe_passenger(
        &self,
        passenger_id: Uuid,
        channel: Uuid,
        latitude: f64,
        longitude: f64,
        radius_m: f64,
    ) -> SubscribeOutcome {
        let tiles = geo::cover(
            latitude,
            longitude,
            radius_m,
            self.config.geohash_precision,
        );

        {
            let mut inner = self.write();
            if let Some(old) = inner.subscriptions.remove(&passenger_id) {
                for tile in &old.tiles {
                    if let Some(ids) = inner.tile_subscribers.get_mut(tile) {
                        ids.remove(&passenger_id);
                        if ids.is_empty() {
                            inner.tile_subscribers.remove(tile);
                        }
                    }
                }
            }
            for tile in &tiles {
                inner
                    .tile_subscribers
                    .entry(tile.clone())
                    .or_default()
                    .insert(passenger_id);
            }
            inner.subscriptions.insert(
                passenger_id,
                SubscriptionEntry {
                    channel,
                    latitude,
                    longitude,
                    radius_m,
                    tiles: tiles.clone(),
                    last_seen: Instant::now(),
                },
            );
        }

        let nearby = self.query_nearby(
            latitude,
            longitude,
            radius_m,
            None,
            Some(DriverStatus::Available),
        );

        SubscribeOutcome {
            tiles: tiles.into_iter().collect(),
            nearby,
        }
    }

    /// Drop a passenger's subscription.
    pub fn unsubscribe_passenger(&self, passenger_id: Uuid) {
        let mut inner = self.write();
        if let Some(old) = inner.subscriptions.remove(&passenger_id) {
            for tile in &old.tiles {
                if let Some(ids) = inner.tile_subscribers.get_mut(tile) {
                    ids.remove(&passenger_id);
                    if ids.is_empty() {
                        inner.tile_subscribers.remove(tile);
                    }
                }
            }
        }
    }

    /// Whether a passenger currently holds a subscription.
    pub fn has_subscription(&self, passenger_id: Uuid) -> bool {
        self.read().subscriptions.contains_key(&passenger_id)
    }

    /// Radius of a passenger's live subscription, if any.
    pub fn subscription_radius(&self, passenger_id: Uuid) -> Option<f64> {
        self.read()
            .subscriptions
            .get(&passenger_id)
            .map(|sub| sub.radius_m)
    }

    /// Subscribers whose tile set includes the given tile.
    pub fn passengers_in_tile(&self, tile: &str) -> Vec<Subscriber> {
        let inner = self.read();
        let Some(ids) = inner.tile_subscribers.get(tile) else {
            return Vec::new();
        };
        ids.iter()
            .filter_map(|passenger_id| {
                let sub = inner.subscriptions.get(passenger_id)?;
                if sub.last_seen.elapsed() > self.config.subscription_ttl {
                    return None;
                }
                Some(Subscriber {
                    passenger_id: *passenger_id,
                    channel: sub.channel,
                    latitude: sub.latitude,
                    longitude: sub.longitude,
                    radius_m: sub.radius_m,
                })
            })
            .collect()
    }

    /// Evict entries past their TTL. Returns (drivers, subscriptions)
    /// removed.
    pub fn evict_expired(&self) -> (usize, usize) {
        let mut inner = self.write();

        let stale_drivers: Vec<Uuid> = inner
            .drivers
            .iter()
            .filter(|(_, e)| e.last_seen.elapsed() > self.config.driver_ttl)
            .map(|(id, _)| *id)
            .collect();
        for driver_id in &stale_drivers {
            if let Some(entry) = inner.drivers.remove(driver_id) {
                if let Some(ids) = inner.tile_drivers.get_mut(&entry.tile) {
                    ids.remove(driver_id);
                    if ids.is_empty() {
                        inner.tile_drivers.remove(&entry.tile);
                    }
                }
            }
        }

        let stale_subs: Vec<Uuid> = inner
            .subscriptions
            .iter()
            .filter(|(_, e)| e.last_seen.elapsed() > self.config.subscription_ttl)
            .map(|(id, _)| *id)
            .collect();
        for passenger_id in &stale_subs {
            if let Some(old) = inner.subscriptions.remove(passenger_id) {
                for tile in &old.tiles {
                    if let Some(ids) = inner.tile_subscribers.get_mut(tile) {
                        ids.remove(passenger_id);
                        if ids.is_empty() {
                            inner.tile_subscribers.remove(tile);
                        }
                    }
                }
            }
        }

        (stale_drivers.len(), stale_subs.len())
    }

    /// Number of drivers currently present (tests and gauges).
    pub fn driver_count(&self) -> usize {
        self.read().drivers.len()
    }

    /// Number of live subscriptions (tests and gauges).
    pub fn subscription_count(&self) -> usize {
        self.read().subscriptions.len()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    const DELHI: (f64, f64) = (28.6139, 77.2090);

    fn index() -> PresenceIndex {
        PresenceIndex::new(PresenceConfig::default())
    }

    fn meta(name: &str) -> DriverMeta {
        DriverMeta {
            username: Some(name.to_string()),
            vehicle_number: Some(format!("DL-{name}")),
        }
    }

    #[test]
    fn test_first_update_counts_as_moved() {
        let index = index();
        let outcome = index.update_driver(
            Uuid::new_v4(),
            DELHI.0,
            DELHI.1,
            meta("a"),
            DriverStatus::Available,
        );
        assert!(outcome.moved);
        assert!(outcome.tile_changed);
        assert_eq!(outcome.prev_tile, None);
    }

    #[test]
    fn test_sub_threshold_displacement_is_not_moved() {
        let index = index();
        let driver = Uuid::new_v4();
        index.update_driver(driver, DELHI.0, DELHI.1, meta("a"), DriverStatus::Available);

        // ~1 m north: well under the 10 m threshold.
        let outcome = index.update_driver(
            driver,
            DELHI.0 + 0.00001,
            DELHI.1,
            meta("a"),
            DriverStatus::Available,
        );
        assert!(!outcome.moved);

        // ~550 m north: clearly over it.
        let outcome = index.update_driver(
            driver,
            DELHI.0 + 0.005,
            DELHI.1,
            meta("a"),
            DriverStatus::Available,
        );
        assert!(outcome.moved);
    }

    #[test]
    fn test_tile_membership_follows_moves() {
        let index = index();
        let driver = Uuid::new_v4();
        let first = index.update_driver(driver, 28.6200, 77.2100, meta("a"), DriverStatus::Available);
        // Move far enough to land in a different tile.
        let second = index.update_driver(driver, 28.6500, 77.2500, meta("a"), DriverStatus::Available);

        assert_ne!(first.tile, second.tile);
        assert!(second.tile_changed);
        assert_eq!(second.prev_tile.as_deref(), Some(first.tile.as_str()));

        // Only the new tile should list the driver.
        let found = index.query_nearby(28.6500, 77.2500, 200.0, None, None);
        assert_eq!(found.len(), 1);
        let gone = index.query_nearby(28.6200, 77.2100, 200.0, None, None);
        assert!(gone.is_empty());
    }

    #[test]
    fn test_query_nearby_sorts_and_annotates() {
        let index = index();
        let near = Uuid::new_v4();
        let far = Uuid::new_v4();
        index.update_driver(near, 28.6143, 77.2090, meta("near"), DriverStatus::Available);
        index.update_driver(far, 28.6200, 77.2090, meta("far"), DriverStatus::Available);

        let results = index.query_nearby(DELHI.0, DELHI.1, 1500.0, None, Some(DriverStatus::Available));
        assert_eq!(results.len(), 2);
        assert_eq!(results[0].driver_id, near);
        assert_eq!(results[1].driver_id, far);
        assert!(results[0].distance_m < results[1].distance_m);
        assert!(results[0].distance_m > 0.0);
    }

    #[test]
    fn test_query_nearby_radius_is_inclusive_and_filters_overshoot() {
        let index = index();
        let driver = Uuid::new_v4();
        index.update_driver(driver, 28.6200, 77.2090, meta("a"), DriverStatus::Available);
        let distance = geo::distance_m(DELHI.0, DELHI.1, 28.6200, 77.2090);

        // Exactly at the boundary: included.
        let at = index.query_nearby(DELHI.0, DELHI.1, distance, None, None);
        assert_eq!(at.len(), 1);

        // One meter short: excluded even though the tile cover reaches it.
        let short = index.query_nearby(DELHI.0, DELHI.1, distance - 1.0, None, None);
        assert!(short.is_empty());
    }

    #[test]
    fn test_query_nearby_status_filter_excludes_busy() {
        let index = index();
        let busy = Uuid::new_v4();
        let available = Uuid::new_v4();
        index.update_driver(busy, DELHI.0, DELHI.1, meta("busy"), DriverStatus::Busy);
        index.update_driver(
            available,
            28.6142,
            77.2093,
            meta("free"),
            DriverStatus::Available,
        );

        let results =
            index.query_nearby(DELHI.0, DELHI.1, 1000.0, None, Some(DriverStatus::Available));
        assert_eq!(results.len(), 1);
        assert_eq!(results[0].driver_id, available);
    }

    #[test]
    fn test_query_nearby_respects_limit() {
        let index = index();
        for i in 0..5 {
            index.update_driver(
                Uuid::new_v4(),
                DELHI.0 + f64::from(i) * 0.001,
                DELHI.1,
                meta(&format!("d{i}")),
                DriverStatus::Available,
            );
        }
        let results = index.query_nearby(DELHI.0, DELHI.1, 2000.0, Some(3), None);
        assert_eq!(results.len(), 3);
    }

    #[test]
    fn test_remove_driver_clears_everything() {
        let index = index();
        let driver = Uuid::new_v4();
        index.update_driver(driver, DELHI.0, DELHI.1, meta("a"), DriverStatus::Available);
        assert!(index.get_driver(driver).is_some());

        index.remove_driver(driver);
        assert!(index.get_driver(driver).is_none());
        assert_eq!(index.driver_count(), 0);
        assert!(index.query_nearby(DELHI.0, DELHI.1, 1000.0, None, None).is_empty());
    }

    #[test]
    fn test_subscription_snapshot_and_tile_fanout() {
        let index = index();
        let driver = Uuid::new_v4();
        index.update_driver(driver, 28.6150, 77.2100, meta("a"), DriverStatus::Available);

        let passenger = Uuid::new_v4();
        let channel = Uuid::new_v4();
        let outcome = index.subscribe_passenger(passenger, channel, DELHI.0, DELHI.1, 1500.0);

        assert!(!outcome.tiles.is_empty());
        assert_eq!(outcome.nearby.len(), 1);
        assert_eq!(outcome.nearby[0].driver_id, driver);

        // The driver's tile is covered, so fan-out finds the subscriber.
        let tile = geo::encode_geohash(28.6150, 77.2100, 6);
        let subscribers = index.passengers_in_tile(&tile);
        assert_eq!(subscribers.len(), 1);
        assert_eq!(subscribers[0].passenger_id, passenger);
        assert_eq!(subscribers[0].channel, channel);
    }

    #[test]
    fn test_resubscribe_replaces_tiles() {
        let index = index();
        let passenger = Uuid::new_v4();
        let channel = Uuid::new_v4();
        index.subscribe_passenger(passenger, channel, DELHI.0, DELHI.1, 1000.0);

        let old_tile = geo::encode_geohash(DELHI.0, DELHI.1, 6);
        assert_eq!(index.passengers_in_tile(&old_tile).len(), 1);

        // Move to a different part of the city.
        index.subscribe_passenger(passenger, channel, 28.7041, 77.1025, 1000.0);
        assert!(index.passengers_in_tile(&old_tile).is_empty());
        assert_eq!(index.subscription_count(), 1);
    }

    #[test]
    fn test_unsubscribe_clears_tiles() {
        let index = index();
        let passenger = Uuid::new_v4();
        index.subscribe_passenger(passenger, Uuid::new_v4(), DELHI.0, DELHI.1, 1000.0);
        assert!(index.has_subscription(passenger));

        index.unsubscribe_passenger(passenger);
        assert!(!index.has_subscription(passenger));
        let tile = geo::encode_geohash(DELHI.0, DELHI.1, 6);
        assert!(index.passengers_in_tile(&tile).is_empty());
    }

    #[test]
    fn test_ttl_eviction() {
        let index = PresenceIndex::new(PresenceConfig {
            driver_ttl: Duration::from_millis(10),
            subscription_ttl: Duration::from_millis(10),
            ..PresenceConfig::default()
        });
        index.update_driver(Uuid::new_v4(), DELHI.0, DELHI.1, meta("a"), DriverStatus::Available);
        index.subscribe_passenger(Uuid::new_v4(), Uuid::new_v4(), DELHI.0, DELHI.1, 1000.0);

        std::thread::sleep(Duration::from_millis(30));

        // Stale entries are invisible to reads even before eviction runs.
        assert!(index.query_nearby(DELHI.0, DELHI.1, 1000.0, None, None).is_empty());

        let (drivers, subs) = index.evict_expired();
        assert_eq!(drivers, 1);
        assert_eq!(subs, 1);
        assert_eq!(index.driver_count(), 0);
        assert_eq!(index.subscription_count(), 0);
    }
}
