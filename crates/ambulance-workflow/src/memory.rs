//! 内存实现
//!
//! 协作者接口的内存版本，用于测试、演示和单机运行。

use crate::collaborators::{BookingStore, Geosearch, NotificationTransport, UserDirectory};
use crate::notification::Recipient;
use ambulance_core::geo::haversine_km;
use ambulance_core::{
    Booking, BookingFilter, DispatchError, DriverCandidate, DriverLocation, DriverStatus,
    GeoPoint, Result, UserStatus, VehicleClass,
};
use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use std::collections::{HashMap, HashSet};
use std::sync::atomic::{AtomicUsize, Ordering};
use std::time::Duration;
use tokio::sync::RwLock;
use tracing::debug;
use uuid::Uuid;

/// 内存预约存储
#[derive(Debug, Default)]
pub struct InMemoryBookingStore {
    bookings: RwLock<HashMap<Uuid, Booking>>,
    writes: AtomicUsize,
}

impl InMemoryBookingStore {
    pub fn new() -> Self {
        Self::default()
    }

    /// 已执行的写操作次数（创建+更新）
    pub fn write_count(&self) -> usize {
        self.writes.load(Ordering::SeqCst)
    }

    pub async fn len(&self) -> usize {
        self.bookings.read().await.len()
    }
}

#[async_trait]
impl BookingStore for InMemoryBookingStore {
    async fn create(&self, booking: &Booking) -> Result<()> {
        let mut bookings = self.bookings.write().await;
        if bookings.contains_key(&booking.id) {
            return Err(DispatchError::Upstream(format!("booking {} already exists", booking.id)));
        }
        bookings.insert(booking.id, booking.clone());
        self.writes.fetch_add(1, Ordering::SeqCst);
        Ok(())
    }

    async fn find_by_id(&self, booking_id: Uuid) -> Result<Option<Booking>> {
        Ok(self.bookings.read().await.get(&booking_id).cloned())
    }

    async fn update(&self, booking: &Booking) -> Result<()> {
        let mut bookings = self.bookings.write().await;
        match bookings.get_mut(&booking.id) {
            Some(existing) => {
                *existing = booking.clone();
                self.writes.fetch_add(1, Ordering::SeqCst);
                Ok(())
            }
            None => Err(DispatchError::NotFound(format!("Booking {} not found", booking.id))),
        }
    }

    async fn find(&self, filter: &BookingFilter) -> Result<Vec<Booking>> {
        let bookings = self.bookings.read().await;
        let mut matched: Vec<Booking> = bookings
            .values()
            .filter(|booking| filter.matches(booking))
            .cloned()
            .collect();
        matched.sort_by(|a, b| b.created_at.cmp(&a.created_at));

        let offset = filter.offset.unwrap_or(0);
        let limit = filter.limit.unwrap_or(usize::MAX);
        Ok(matched.into_iter().skip(offset).take(limit).collect())
    }
}

/// 内存用户目录
#[derive(Debug, Default)]
pub struct InMemoryDirectory {
    users: RwLock<HashMap<Uuid, UserStatus>>,
}

impl InMemoryDirectory {
    pub fn new() -> Self {
        Self::default()
    }

    pub async fn add_user(&self, user_id: Uuid, status: UserStatus) {
        self.users.write().await.insert(user_id, status);
    }
}

#[async_trait]
impl UserDirectory for InMemoryDirectory {
    async fn resolve_user(&self, user_id: Uuid) -> Result<Option<UserStatus>> {
        Ok(self.users.read().await.get(&user_id).copied())
    }
}

/// 车队中的一辆车
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct FleetDriver {
    pub driver_id: Uuid,
    pub name: String,
    pub location: GeoPoint,
    pub vehicle_class: VehicleClass,
    pub status: DriverStatus,
    pub rating: Option<f64>,
    #[serde(default)]
    pub response_times_minutes: Vec<f64>,
}

/// 模拟检索故障
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum SearchFailure {
    #[default]
    None,
    /// 仅按车辆等级过滤的检索失败
    Filtered,
    /// 所有检索失败
    All,
}

/// 内存地理检索
#[derive(Debug, Default)]
pub struct InMemoryGeosearch {
    drivers: RwLock<HashMap<Uuid, FleetDriver>>,
    failure: RwLock<SearchFailure>,
    delay: RwLock<Option<Duration>>,
    searches: AtomicUsize,
}

impl InMemoryGeosearch {
    pub fn new() -> Self {
        Self::default()
    }

    pub async fn add_driver(&self, driver: FleetDriver) {
        self.drivers.write().await.insert(driver.driver_id, driver);
    }

    pub async fn set_driver_status(&self, driver_id: Uuid, status: DriverStatus) {
        if let Some(driver) = self.drivers.write().await.get_mut(&driver_id) {
            driver.status = status;
        }
    }

    pub async fn move_driver(&self, driver_id: Uuid, location: GeoPoint) {
        if let Some(driver) = self.drivers.write().await.get_mut(&driver_id) {
            driver.location = location;
        }
    }

    pub async fn driver(&self, driver_id: Uuid) -> Option<FleetDriver> {
        self.drivers.read().await.get(&driver_id).cloned()
    }

    pub async fn set_failure(&self, failure: SearchFailure) {
        *self.failure.write().await = failure;
    }

    pub async fn set_delay(&self, delay: Option<Duration>) {
        *self.delay.write().await = delay;
    }

    /// 已执行的检索次数
    pub fn search_count(&self) -> usize {
        self.searches.load(Ordering::SeqCst)
    }
}

#[async_trait]
impl Geosearch for InMemoryGeosearch {
    async fn nearest_drivers(
        &self,
        point: GeoPoint,
        radius_km: f64,
        max_results: usize,
        vehicle_class: Option<VehicleClass>,
    ) -> Result<Vec<DriverCandidate>> {
        self.searches.fetch_add(1, Ordering::SeqCst);

        let delay = *self.delay.read().await;
        if let Some(delay) = delay {
            tokio::time::sleep(delay).await;
        }

        let failure = *self.failure.read().await;
        if failure == SearchFailure::All || (failure == SearchFailure::Filtered && vehicle_class.is_some()) {
            return Err(DispatchError::Upstream("geosearch index unavailable".to_string()));
        }

        let drivers = self.drivers.read().await;
        let mut candidates: Vec<DriverCandidate> = drivers
            .values()
            .filter(|driver| driver.status != DriverStatus::Offline)
            .filter(|driver| vehicle_class.map_or(true, |class| driver.vehicle_class == class))
            .map(|driver| DriverCandidate {
                driver_id: driver.driver_id,
                location: driver.location,
                vehicle_class: driver.vehicle_class,
                distance_km: haversine_km(&point, &driver.location),
                available: driver.status == DriverStatus::Available,
                rating: driver.rating,
                response_times_minutes: driver.response_times_minutes.clone(),
            })
            .filter(|candidate| candidate.distance_km <= radius_km)
            .collect();

        candidates.sort_by(|a, b| a.distance_km.total_cmp(&b.distance_km));
        candidates.truncate(max_results);

        debug!("Geosearch found {} drivers within {} km", candidates.len(), radius_km);
        Ok(candidates)
    }

    async fn driver_location(&self, driver_id: Uuid) -> Result<Option<DriverLocation>> {
        Ok(self.drivers.read().await.get(&driver_id).map(|driver| DriverLocation {
            point: driver.location,
            status: driver.status,
        }))
    }

    async fn set_driver_availability(&self, driver_id: Uuid, available: bool) -> Result<()> {
        let mut drivers = self.drivers.write().await;
        match drivers.get_mut(&driver_id) {
            Some(driver) => {
                driver.status = if available { DriverStatus::Available } else { DriverStatus::Busy };
                Ok(())
            }
            None => Err(DispatchError::NotFound(format!("Driver {} not found", driver_id))),
        }
    }
}

/// 已投递的消息
#[derive(Debug, Clone)]
pub struct DeliveredMessage {
    pub recipient: Recipient,
    pub event: String,
    pub payload: serde_json::Value,
}

/// 记录型通知传输，可对指定接收者模拟投递失败
#[derive(Debug, Default)]
pub struct RecordingTransport {
    messages: RwLock<Vec<DeliveredMessage>>,
    unreachable: RwLock<HashSet<Recipient>>,
}

impl RecordingTransport {
    pub fn new() -> Self {
        Self::default()
    }

    /// 标记某接收者断线
    pub async fn disconnect(&self, recipient: Recipient) {
        self.unreachable.write().await.insert(recipient);
    }

    pub async fn messages(&self) -> Vec<DeliveredMessage> {
        self.messages.read().await.clone()
    }

    pub async fn messages_for(&self, recipient: &Recipient) -> Vec<DeliveredMessage> {
        self.messages
            .read()
            .await
            .iter()
            .filter(|m| &m.recipient == recipient)
            .cloned()
            .collect()
    }

    pub async fn clear(&self) {
        self.messages.write().await.clear();
    }

    async fn deliver(&self, recipient: Recipient, event: &str, payload: &serde_json::Value) -> Result<bool> {
        if self.unreachable.read().await.contains(&recipient) {
            return Ok(false);
        }
        self.messages.write().await.push(DeliveredMessage {
            recipient,
            event: event.to_string(),
            payload: payload.clone(),
        });
        Ok(true)
    }
}

#[async_trait]
impl NotificationTransport for RecordingTransport {
    async fn send_to_user(&self, user_id: Uuid, event: &str, payload: &serde_json::Value) -> Result<bool> {
        self.deliver(Recipient::User(user_id), event, payload).await
    }

    async fn send_to_caller(&self, phone: &str, event: &str, payload: &serde_json::Value) -> Result<bool> {
        self.deliver(Recipient::Caller(phone.to_string()), event, payload).await
    }

    async fn send_to_operator(&self, driver_id: Uuid, event: &str, payload: &serde_json::Value) -> Result<bool> {
        self.deliver(Recipient::Operator(driver_id), event, payload).await
    }

    async fn send_to_facility(&self, facility_id: Uuid, event: &str, payload: &serde_json::Value) -> Result<bool> {
        self.deliver(Recipient::Facility(facility_id), event, payload).await
    }

    async fn broadcast_to_supervisors(&self, event: &str, payload: &serde_json::Value) -> Result<bool> {
        self.deliver(Recipient::Supervisors, event, payload).await
    }

    async fn broadcast_to_all_operators(&self, event: &str, payload: &serde_json::Value) -> Result<bool> {
        self.deliver(Recipient::AllOperators, event, payload).await
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn driver(lat: f64, lng: f64, class: VehicleClass, status: DriverStatus) -> FleetDriver {
        FleetDriver {
            driver_id: Uuid::new_v4(),
            name: "Driver".to_string(),
            location: GeoPoint::new(lat, lng),
            vehicle_class: class,
            status,
            rating: Some(4.5),
            response_times_minutes: vec![],
        }
    }

    #[tokio::test]
    async fn test_nearest_drivers_sorted_and_filtered() {
        let geo = InMemoryGeosearch::new();
        let near = driver(28.632, 77.217, VehicleClass::Basic, DriverStatus::Available);
        let far = driver(28.70, 77.25, VehicleClass::Basic, DriverStatus::Busy);
        let offline = driver(28.631, 77.216, VehicleClass::Basic, DriverStatus::Offline);
        let out_of_range = driver(19.07, 72.87, VehicleClass::Basic, DriverStatus::Available);
        let near_id = near.driver_id;

        for d in [near, far, offline, out_of_range] {
            geo.add_driver(d).await;
        }

        let result = geo
            .nearest_drivers(GeoPoint::new(28.6315, 77.2167), 20.0, 10, None)
            .await
            .unwrap();
        assert_eq!(result.len(), 2);
        assert_eq!(result[0].driver_id, near_id);
        assert!(result[0].available);
        assert!(!result[1].available);

        let icu_only = geo
            .nearest_drivers(GeoPoint::new(28.6315, 77.2167), 20.0, 10, Some(VehicleClass::Icu))
            .await
            .unwrap();
        assert!(icu_only.is_empty());
    }

    #[tokio::test]
    async fn test_store_pagination() {
        let store = InMemoryBookingStore::new();
        assert_eq!(store.write_count(), 0);
        let filter = BookingFilter {
            limit: Some(1),
            ..Default::default()
        };
        assert!(store.find(&filter).await.unwrap().is_empty());
    }

    #[tokio::test]
    async fn test_transport_records_and_drops() {
        let transport = RecordingTransport::new();
        let user = Uuid::new_v4();
        let payload = serde_json::json!({"ok": true});

        assert!(transport.send_to_user(user, "booking.created", &payload).await.unwrap());
        transport.disconnect(Recipient::Supervisors).await;
        assert!(!transport.broadcast_to_supervisors("booking.created", &payload).await.unwrap());

        let messages = transport.messages().await;
        assert_eq!(messages.len(), 1);
        assert_eq!(messages[0].recipient, Recipient::User(user));
    }
}
