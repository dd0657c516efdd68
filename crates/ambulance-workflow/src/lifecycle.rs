//! 预约生命周期管理
//!
//! 预约的所有变更（状态更新、派车、取消）都经过这里。同一预约的变更
//! 通过按ID加锁串行执行，通知在提交后、释放锁之前发出，保证单个预约
//! 的事件顺序与时间线一致。

use crate::collaborators::{BookingStore, Geosearch, UserDirectory};
use crate::fare::FareCalculator;
use crate::notification::{BookingEventType, NotificationFanout};
use crate::state_machine::BookingStateMachine;
use crate::triage::default_requirements;
use ambulance_core::geo::{eta_between, haversine_km, validate_point, DEFAULT_AVG_SPEED_KMH};
use ambulance_core::utils::format_reference;
use ambulance_core::{
    Booking, BookingFilter, BookingStatus, CancellationRecord, DispatchError, DriverStatus,
    GeoPoint, NewBookingRequest, Payment, PaymentStatus, RefundStatus, RequestType, Requester,
    Result, TimelineEntry, Tracking, UserStatus,
};
use chrono::Utc;
use serde::{Deserialize, Serialize};
use serde_json::json;
use std::collections::HashMap;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::{Arc, Mutex};
use tokio::sync::OwnedMutexGuard;
use tracing::{error, info, warn};
use uuid::Uuid;

/// 生命周期配置
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct LifecycleSettings {
    /// 紧急预约创建后自动派车的延迟（毫秒）
    pub auto_dispatch_delay_ms: u64,
    /// 流水号前缀
    pub reference_prefix: String,
    /// ETA估算使用的平均车速
    pub average_speed_kmh: f64,
}

impl Default for LifecycleSettings {
    fn default() -> Self {
        Self {
            auto_dispatch_delay_ms: 2000,
            reference_prefix: "AMB".to_string(),
            average_speed_kmh: DEFAULT_AVG_SPEED_KMH,
        }
    }
}

/// 状态更新附带的上下文
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct StatusContext {
    pub location: Option<GeoPoint>,
    pub note: Option<String>,
}

impl StatusContext {
    pub fn at(location: GeoPoint) -> Self {
        Self {
            location: Some(location),
            note: None,
        }
    }

    pub fn with_note(mut self, note: impl Into<String>) -> Self {
        self.note = Some(note.into());
        self
    }
}

/// 协作者错误统一映射为上游错误
fn upstream(err: DispatchError) -> DispatchError {
    match err {
        DispatchError::Upstream(_) => err,
        other => DispatchError::Upstream(other.to_string()),
    }
}

/// 预约生命周期管理器
pub struct BookingLifecycleManager {
    store: Arc<dyn BookingStore>,
    directory: Arc<dyn UserDirectory>,
    geosearch: Arc<dyn Geosearch>,
    fanout: Arc<NotificationFanout>,
    state_machine: BookingStateMachine,
    fare: FareCalculator,
    settings: LifecycleSettings,
    sequence: AtomicU64,
    locks: LockRegistry,
}

type LockRegistry = Mutex<HashMap<Uuid, Arc<tokio::sync::Mutex<()>>>>;

/// 预约独占锁，释放时若无其他持有者则从登记表移除
struct BookingLock<'a> {
    registry: &'a LockRegistry,
    booking_id: Uuid,
    guard: Option<OwnedMutexGuard<()>>,
}

impl Drop for BookingLock<'_> {
    fn drop(&mut self) {
        // 先释放锁，登记表中的条目才可能成为唯一引用
        drop(self.guard.take());
        let mut locks = self.registry.lock().unwrap_or_else(|poisoned| poisoned.into_inner());
        let idle = locks
            .get(&self.booking_id)
            .is_some_and(|lock| Arc::strong_count(lock) == 1);
        if idle {
            locks.remove(&self.booking_id);
        }
    }
}

impl BookingLifecycleManager {
    pub fn new(
        store: Arc<dyn BookingStore>,
        directory: Arc<dyn UserDirectory>,
        geosearch: Arc<dyn Geosearch>,
        fanout: Arc<NotificationFanout>,
        fare: FareCalculator,
        settings: LifecycleSettings,
    ) -> Self {
        Self {
            store,
            directory,
            geosearch,
            fanout,
            state_machine: BookingStateMachine::new(),
            fare,
            settings,
            sequence: AtomicU64::new(0),
            locks: Mutex::new(HashMap::new()),
        }
    }

    pub fn settings(&self) -> &LifecycleSettings {
        &self.settings
    }

    pub fn fare_calculator(&self) -> &FareCalculator {
        &self.fare
    }

    pub fn fanout(&self) -> &Arc<NotificationFanout> {
        &self.fanout
    }

    /// 获取预约的独占锁
    async fn lock_booking(&self, booking_id: Uuid) -> BookingLock<'_> {
        let mut held = BookingLock {
            registry: &self.locks,
            booking_id,
            guard: None,
        };
        let lock = {
            let mut locks = self.locks.lock().unwrap_or_else(|poisoned| poisoned.into_inner());
            locks.entry(booking_id).or_default().clone()
        };
        held.guard = Some(lock.lock_owned().await);
        held
    }

    /// 当前登记的预约锁数量，只包含正在被持有或等待的预约
    pub fn tracked_locks(&self) -> usize {
        self.locks.lock().unwrap_or_else(|poisoned| poisoned.into_inner()).len()
    }

    async fn load(&self, booking_id: Uuid) -> Result<Booking> {
        self.store
            .find_by_id(booking_id)
            .await
            .map_err(upstream)?
            .ok_or_else(|| DispatchError::NotFound(format!("Booking {} not found", booking_id)))
    }

    async fn persist(&self, booking: &Booking) -> Result<()> {
        self.store.update(booking).await.map_err(|e| {
            error!("Failed to persist booking {}: {}", booking.id, e);
            upstream(e)
        })
    }

    /// 司机释放失败只记录日志，预约状态以存储为准
    async fn release_driver(&self, booking: &Booking) {
        if let Some(driver_id) = booking.assigned_driver {
            if let Err(e) = self.geosearch.set_driver_availability(driver_id, true).await {
                error!("Failed to release driver {} from booking {}: {}", driver_id, booking.id, e);
            }
        }
    }

    /// 按当前阶段重新计算ETA：接到患者前到上车点，之后到目的地
    fn refresh_tracking(&self, booking: &mut Booking, location: GeoPoint) {
        let speed = self.settings.average_speed_kmh;
        booking.tracking.driver_location = Some(location);
        booking.tracking.updated_at = Some(Utc::now());

        if booking.status.is_patient_onboard() {
            booking.tracking.eta_to_pickup_minutes = None;
            booking.tracking.eta_to_destination_minutes = booking
                .destination
                .as_ref()
                .map(|d| eta_between(&location, &d.coordinates, speed));
        } else {
            booking.tracking.eta_to_pickup_minutes =
                Some(eta_between(&location, &booking.pickup.coordinates, speed));
        }
    }

    async fn resolve_requester(&self, request: &NewBookingRequest) -> Result<()> {
        match &request.requester {
            Requester::Anonymous(caller) => {
                if request.request_type != RequestType::Emergency {
                    return Err(DispatchError::UnknownRequester(
                        "anonymous callers may only raise emergency requests".to_string(),
                    ));
                }
                if caller.phone.trim().is_empty() {
                    return Err(DispatchError::Validation("caller phone is required".to_string()));
                }
                Ok(())
            }
            Requester::Account { user_id } => {
                match self.directory.resolve_user(*user_id).await.map_err(upstream)? {
                    Some(UserStatus::Active) => Ok(()),
                    Some(UserStatus::Inactive) => Err(DispatchError::UnknownRequester(format!(
                        "user {} is inactive",
                        user_id
                    ))),
                    None => Err(DispatchError::UnknownRequester(format!("user {} not found", user_id))),
                }
            }
        }
    }

    /// 创建预约
    pub async fn create(&self, request: NewBookingRequest) -> Result<Booking> {
        validate_point(&request.pickup.coordinates, "pickup")?;
        if let Some(destination) = &request.destination {
            validate_point(&destination.coordinates, "destination")?;
        }
        self.resolve_requester(&request).await?;

        let distance_km = request
            .destination
            .as_ref()
            .map(|d| haversine_km(&request.pickup.coordinates, &d.coordinates))
            .unwrap_or(self.fare.policy().default_distance_km);

        let breakdown = self
            .fare
            .calculate(distance_km, request.request_type, request.priority);
        let requirements = request.requirements.clone().unwrap_or_else(|| {
            default_requirements(request.request_type, request.priority, &request.patient)
        });

        let now = Utc::now();
        let sequence = self.sequence.fetch_add(1, Ordering::SeqCst) + 1;
        let booking = Booking {
            id: Uuid::new_v4(),
            reference: format_reference(&self.settings.reference_prefix, now, sequence),
            request_type: request.request_type,
            priority: request.priority,
            requester: request.requester,
            assigned_driver: None,
            pickup: request.pickup,
            destination: request.destination,
            patient: request.patient,
            requirements,
            payment: Payment {
                amount: breakdown.total,
                currency: self.fare.policy().currency.clone(),
                status: PaymentStatus::Pending,
                breakdown,
            },
            distance_km,
            timeline: vec![TimelineEntry {
                status: BookingStatus::Requested,
                timestamp: now,
                location: None,
                note: None,
                reaffirmed: false,
            }],
            cancellation: None,
            tracking: Tracking::default(),
            status: BookingStatus::Requested,
            created_at: now,
            updated_at: now,
        };

        self.store.create(&booking).await.map_err(upstream)?;
        info!(
            "Created booking {} ({}), type {:?}, priority {}",
            booking.reference,
            booking.id,
            booking.request_type,
            booking.priority.as_str()
        );

        self.fanout.on_event(BookingEventType::Created, &booking, None).await;
        Ok(booking)
    }

    pub async fn get(&self, booking_id: Uuid) -> Result<Booking> {
        self.load(booking_id).await
    }

    /// 按条件查询预约，未指定时最多返回50条
    pub async fn list(&self, filter: &BookingFilter) -> Result<Vec<Booking>> {
        let mut filter = filter.clone();
        if filter.limit.is_none() {
            filter.limit = Some(50);
        }
        self.store.find(&filter).await.map_err(upstream)
    }

    /// 更新预约状态
    pub async fn update_status(
        &self,
        booking_id: Uuid,
        new_status: BookingStatus,
        context: StatusContext,
    ) -> Result<Booking> {
        let _guard = self.lock_booking(booking_id).await;
        let mut booking = self.load(booking_id).await?;

        if booking.status == new_status {
            return self.reaffirm(booking, context).await;
        }

        let from = booking.status;
        self.state_machine.transition(from, new_status)?;
        if new_status == BookingStatus::DriverAssigned && booking.assigned_driver.is_none() {
            return Err(DispatchError::Validation(
                "moving to DRIVER_ASSIGNED requires a driver; use assign_driver".to_string(),
            ));
        }

        booking.push_timeline(new_status, context.location, context.note, false);

        if let Some(location) = context.location {
            if matches!(new_status, BookingStatus::DriverEnroute | BookingStatus::PatientPicked) {
                self.refresh_tracking(&mut booking, location);
            }
        }
        if new_status == BookingStatus::Completed && booking.payment.status == PaymentStatus::Pending {
            booking.payment.status = PaymentStatus::Paid;
        }

        self.persist(&booking).await?;
        info!("Booking {} moved from {} to {}", booking.id, from, new_status);

        if new_status == BookingStatus::Completed {
            self.release_driver(&booking).await;
        }

        self.fanout
            .on_event(
                BookingEventType::StatusChanged,
                &booking,
                Some(json!({ "previous_status": from })),
            )
            .await;
        Ok(booking)
    }

    /// 重复提交当前状态：刷新时间戳，最多追加一条重申记录
    async fn reaffirm(&self, mut booking: Booking, context: StatusContext) -> Result<Booking> {
        let status = booking.status;
        let already_reaffirmed = booking
            .last_timeline_entry()
            .map(|entry| entry.reaffirmed && entry.status == status)
            .unwrap_or(false);

        if already_reaffirmed {
            booking.updated_at = Utc::now();
        } else {
            booking.push_timeline(status, context.location, context.note, true);
        }

        if let Some(location) = context.location {
            if matches!(status, BookingStatus::DriverEnroute | BookingStatus::PatientPicked) {
                self.refresh_tracking(&mut booking, location);
            }
        }

        self.persist(&booking).await?;
        info!("Booking {} reaffirmed status {}", booking.id, status);

        self.fanout
            .on_event(
                BookingEventType::StatusChanged,
                &booking,
                Some(json!({ "reaffirmed": true })),
            )
            .await;
        Ok(booking)
    }

    /// 派车：校验司机可用后标记为忙碌并记录ETA
    pub async fn assign_driver(
        &self,
        booking_id: Uuid,
        driver_id: Uuid,
        note: Option<String>,
    ) -> Result<Booking> {
        let _guard = self.lock_booking(booking_id).await;
        let mut booking = self.load(booking_id).await?;
        self.state_machine.check_assignment(booking.status)?;

        let location = self
            .geosearch
            .driver_location(driver_id)
            .await
            .map_err(upstream)?
            .ok_or_else(|| DispatchError::NotFound(format!("Driver {} not found", driver_id)))?;
        if location.status != DriverStatus::Available {
            return Err(DispatchError::DriverUnavailable(format!(
                "driver {} is {:?}",
                driver_id, location.status
            )));
        }

        self.geosearch
            .set_driver_availability(driver_id, false)
            .await
            .map_err(upstream)?;

        let eta = eta_between(
            &location.point,
            &booking.pickup.coordinates,
            self.settings.average_speed_kmh,
        );
        let from = booking.status;
        let note = note.unwrap_or_else(|| format!("Driver {} assigned, ETA {} min", driver_id, eta));

        booking.assigned_driver = Some(driver_id);
        booking.push_timeline(BookingStatus::DriverAssigned, Some(location.point), Some(note), false);
        booking.tracking.driver_location = Some(location.point);
        booking.tracking.eta_to_pickup_minutes = Some(eta);
        booking.tracking.updated_at = Some(Utc::now());

        if let Err(e) = self.persist(&booking).await {
            if let Err(release) = self.geosearch.set_driver_availability(driver_id, true).await {
                warn!("Failed to roll back availability for driver {}: {}", driver_id, release);
            }
            return Err(e);
        }
        info!(
            "Assigned driver {} to booking {} (from {}), ETA {} min",
            driver_id, booking.id, from, eta
        );

        let extra = json!({
            "driver_id": driver_id,
            "eta_minutes": eta,
            "previous_status": from,
        });
        self.fanout
            .on_event(BookingEventType::DriverAssigned, &booking, Some(extra.clone()))
            .await;
        self.fanout.notify_operator(driver_id, &booking, Some(extra)).await;
        Ok(booking)
    }

    /// 取消预约并按取消时状态计算退款
    pub async fn cancel(&self, booking_id: Uuid, actor: &str, reason: &str) -> Result<Booking> {
        let _guard = self.lock_booking(booking_id).await;
        let mut booking = self.load(booking_id).await?;
        if booking.status.is_terminal() {
            return Err(DispatchError::AlreadyTerminal(format!(
                "booking {} is already {}",
                booking.id, booking.status
            )));
        }

        let from = booking.status;
        let refund_amount = self.fare.calculate_refund(&booking.payment, from);
        let refund_status = if booking.payment.status == PaymentStatus::Paid && refund_amount > 0.0 {
            booking.payment.status = PaymentStatus::Refunded;
            RefundStatus::Refunded
        } else {
            RefundStatus::NotApplicable
        };

        booking.push_timeline(
            BookingStatus::Cancelled,
            None,
            Some(format!("Cancelled by {}: {}", actor, reason)),
            false,
        );
        booking.cancellation = Some(CancellationRecord {
            reason: reason.to_string(),
            cancelled_by: actor.to_string(),
            cancelled_at: booking.updated_at,
            refund_amount,
            refund_status,
        });

        self.persist(&booking).await?;
        info!(
            "Booking {} cancelled by {} from {}, refund {:.2}",
            booking.id, actor, from, refund_amount
        );

        self.release_driver(&booking).await;
        self.fanout
            .on_event(
                BookingEventType::Cancelled,
                &booking,
                Some(json!({
                    "previous_status": from,
                    "cancelled_by": actor,
                    "reason": reason,
                    "refund_amount": refund_amount,
                })),
            )
            .await;
        Ok(booking)
    }

    /// 确认收款；已支付时幂等
    pub async fn record_payment(&self, booking_id: Uuid) -> Result<Booking> {
        let _guard = self.lock_booking(booking_id).await;
        let mut booking = self.load(booking_id).await?;

        match booking.payment.status {
            PaymentStatus::Paid => return Ok(booking),
            PaymentStatus::Refunded => {
                return Err(DispatchError::Validation(format!(
                    "payment for booking {} was already refunded",
                    booking.id
                )))
            }
            PaymentStatus::Pending | PaymentStatus::Failed => {}
        }
        if booking.status == BookingStatus::Cancelled {
            return Err(DispatchError::AlreadyTerminal(format!(
                "booking {} is cancelled",
                booking.id
            )));
        }

        booking.payment.status = PaymentStatus::Paid;
        booking.updated_at = Utc::now();
        self.persist(&booking).await?;
        info!(
            "Recorded payment of {:.2} {} for booking {}",
            booking.payment.amount, booking.payment.currency, booking.id
        );
        Ok(booking)
    }

    /// 司机位置上报：不改变状态，只刷新ETA并通知
    pub async fn update_driver_location(&self, booking_id: Uuid, location: GeoPoint) -> Result<Booking> {
        validate_point(&location, "driver")?;
        let _guard = self.lock_booking(booking_id).await;
        let mut booking = self.load(booking_id).await?;

        if booking.status.is_terminal() {
            return Err(DispatchError::AlreadyTerminal(format!(
                "booking {} is already {}",
                booking.id, booking.status
            )));
        }
        if booking.assigned_driver.is_none() {
            return Err(DispatchError::Validation(format!(
                "booking {} has no assigned driver",
                booking.id
            )));
        }

        self.refresh_tracking(&mut booking, location);
        booking.updated_at = Utc::now();
        self.persist(&booking).await?;

        self.fanout
            .on_event(BookingEventType::LocationUpdated, &booking, None)
            .await;
        Ok(booking)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::memory::{FleetDriver, InMemoryBookingStore, InMemoryDirectory, InMemoryGeosearch, RecordingTransport};
    use crate::notification::{NotificationSettings, Recipient};
    use crate::test_support::sample_request;
    use ambulance_core::{CallerRecord, Priority, VehicleClass};

    struct Fixture {
        manager: BookingLifecycleManager,
        store: Arc<InMemoryBookingStore>,
        geosearch: Arc<InMemoryGeosearch>,
        transport: Arc<RecordingTransport>,
        user_id: Uuid,
    }

    async fn fixture() -> Fixture {
        let store = Arc::new(InMemoryBookingStore::new());
        let directory = Arc::new(InMemoryDirectory::new());
        let geosearch = Arc::new(InMemoryGeosearch::new());
        let transport = Arc::new(RecordingTransport::new());
        let user_id = Uuid::new_v4();
        directory.add_user(user_id, UserStatus::Active).await;

        let fanout = Arc::new(NotificationFanout::new(transport.clone(), NotificationSettings::default()));
        let manager = BookingLifecycleManager::new(
            store.clone(),
            directory,
            geosearch.clone(),
            fanout,
            FareCalculator::default(),
            LifecycleSettings::default(),
        );

        Fixture {
            manager,
            store,
            geosearch,
            transport,
            user_id,
        }
    }

    async fn add_driver(geosearch: &InMemoryGeosearch, status: DriverStatus) -> Uuid {
        let driver_id = Uuid::new_v4();
        geosearch
            .add_driver(FleetDriver {
                driver_id,
                name: "Suresh".to_string(),
                location: GeoPoint::new(28.6400, 77.2200),
                vehicle_class: VehicleClass::Advanced,
                status,
                rating: Some(4.6),
                response_times_minutes: vec![],
            })
            .await;
        driver_id
    }

    #[tokio::test]
    async fn test_create_emergency_booking() {
        let f = fixture().await;
        let request = sample_request(
            Requester::Account { user_id: f.user_id },
            RequestType::Emergency,
            Priority::Critical,
        );

        let booking = f.manager.create(request).await.unwrap();
        assert_eq!(booking.status, BookingStatus::Requested);
        assert_eq!(booking.timeline.len(), 1);
        assert!(booking.payment.breakdown.emergency_charge.unwrap() > 0.0);
        assert!(booking.requirements.equipment.oxygen);
        assert!(booking.requirements.equipment.stretcher);
        assert!(ambulance_core::utils::is_valid_reference(&booking.reference));
        assert!((booking.distance_km - 7.18).abs() < 0.1);
        assert!(!f.transport.messages_for(&Recipient::User(f.user_id)).await.is_empty());
    }

    #[tokio::test]
    async fn test_create_rejects_bad_input() {
        let f = fixture().await;

        let mut bad = sample_request(Requester::Account { user_id: f.user_id }, RequestType::Scheduled, Priority::Low);
        bad.pickup.coordinates = GeoPoint::new(91.0, 77.0);
        assert_eq!(f.manager.create(bad).await.unwrap_err().kind(), "invalid_location");

        let mut nan = sample_request(Requester::Account { user_id: f.user_id }, RequestType::Scheduled, Priority::Low);
        nan.destination.as_mut().unwrap().coordinates = GeoPoint::new(f64::NAN, 77.0);
        assert_eq!(f.manager.create(nan).await.unwrap_err().kind(), "invalid_location");

        let stranger = sample_request(Requester::Account { user_id: Uuid::new_v4() }, RequestType::Scheduled, Priority::Low);
        assert_eq!(f.manager.create(stranger).await.unwrap_err().kind(), "unknown_requester");

        let caller = Requester::Anonymous(CallerRecord {
            name: "Caller".to_string(),
            phone: "+91 90000 11111".to_string(),
            location: None,
        });
        let scheduled = sample_request(caller.clone(), RequestType::Scheduled, Priority::Low);
        assert_eq!(f.manager.create(scheduled).await.unwrap_err().kind(), "unknown_requester");

        let emergency = sample_request(caller, RequestType::Emergency, Priority::High);
        assert!(f.manager.create(emergency).await.is_ok());
        assert_eq!(f.store.len().await, 1);
    }

    #[tokio::test]
    async fn test_illegal_transition_leaves_booking_unchanged() {
        let f = fixture().await;
        let request = sample_request(Requester::Account { user_id: f.user_id }, RequestType::Scheduled, Priority::Low);
        let booking = f.manager.create(request).await.unwrap();

        let err = f
            .manager
            .update_status(booking.id, BookingStatus::Completed, StatusContext::default())
            .await
            .unwrap_err();
        assert_eq!(err.kind(), "illegal_transition");

        let stored = f.manager.get(booking.id).await.unwrap();
        assert_eq!(stored.status, BookingStatus::Requested);
        assert_eq!(stored.timeline.len(), 1);
    }

    #[tokio::test]
    async fn test_reaffirmation_appends_at_most_once() {
        let f = fixture().await;
        let request = sample_request(Requester::Account { user_id: f.user_id }, RequestType::Scheduled, Priority::Low);
        let booking = f.manager.create(request).await.unwrap();

        f.manager
            .update_status(booking.id, BookingStatus::Confirmed, StatusContext::default())
            .await
            .unwrap();
        for _ in 0..3 {
            f.manager
                .update_status(booking.id, BookingStatus::Confirmed, StatusContext::default())
                .await
                .unwrap();
        }

        let stored = f.manager.get(booking.id).await.unwrap();
        assert_eq!(stored.timeline.len(), 3);
        assert!(stored.timeline[2].reaffirmed);
        assert_eq!(stored.last_timeline_entry().unwrap().status, stored.status);
    }

    #[tokio::test]
    async fn test_assignment_and_completion() {
        let f = fixture().await;
        let driver = add_driver(&f.geosearch, DriverStatus::Available).await;
        let request = sample_request(Requester::Account { user_id: f.user_id }, RequestType::Scheduled, Priority::Medium);
        let booking = f.manager.create(request).await.unwrap();

        let assigned = f.manager.assign_driver(booking.id, driver, None).await.unwrap();
        assert_eq!(assigned.status, BookingStatus::DriverAssigned);
        assert_eq!(assigned.assigned_driver, Some(driver));
        assert!(assigned.tracking.eta_to_pickup_minutes.is_some());
        assert_eq!(f.geosearch.driver(driver).await.unwrap().status, DriverStatus::Busy);
        assert!(!f.transport.messages_for(&Recipient::Operator(driver)).await.is_empty());

        let pickup = GeoPoint::new(28.6315, 77.2167);
        for status in [
            BookingStatus::DriverEnroute,
            BookingStatus::DriverArrived,
            BookingStatus::PatientPicked,
            BookingStatus::InTransit,
            BookingStatus::ArrivedHospital,
            BookingStatus::Completed,
        ] {
            f.manager
                .update_status(booking.id, status, StatusContext::at(pickup))
                .await
                .unwrap();
        }

        let done = f.manager.get(booking.id).await.unwrap();
        assert_eq!(done.status, BookingStatus::Completed);
        assert_eq!(done.payment.status, PaymentStatus::Paid);
        assert_eq!(done.timeline.len(), 8);
        assert_eq!(f.geosearch.driver(driver).await.unwrap().status, DriverStatus::Available);
    }

    #[tokio::test]
    async fn test_assign_requires_available_driver() {
        let f = fixture().await;
        let busy = add_driver(&f.geosearch, DriverStatus::Busy).await;
        let request = sample_request(Requester::Account { user_id: f.user_id }, RequestType::Scheduled, Priority::Medium);
        let booking = f.manager.create(request).await.unwrap();
        let writes = f.store.write_count();

        let err = f.manager.assign_driver(booking.id, busy, None).await.unwrap_err();
        assert_eq!(err.kind(), "driver_unavailable");
        let err = f.manager.assign_driver(booking.id, Uuid::new_v4(), None).await.unwrap_err();
        assert_eq!(err.kind(), "not_found");

        assert_eq!(f.store.write_count(), writes);
        let stored = f.manager.get(booking.id).await.unwrap();
        assert!(stored.assigned_driver.is_none());
    }

    #[tokio::test]
    async fn test_cancel_paid_assigned_booking_refunds() {
        let f = fixture().await;
        let driver = add_driver(&f.geosearch, DriverStatus::Available).await;
        let request = sample_request(Requester::Account { user_id: f.user_id }, RequestType::Scheduled, Priority::Medium);
        let booking = f.manager.create(request).await.unwrap();
        f.manager.record_payment(booking.id).await.unwrap();
        f.manager.assign_driver(booking.id, driver, None).await.unwrap();

        let cancelled = f.manager.cancel(booking.id, "user", "family arranged transport").await.unwrap();
        let record = cancelled.cancellation.as_ref().unwrap();
        assert_eq!(cancelled.status, BookingStatus::Cancelled);
        assert_eq!(record.refund_status, RefundStatus::Refunded);
        assert!((record.refund_amount - cancelled.payment.amount * 0.8).abs() < 0.01);
        assert_eq!(cancelled.payment.status, PaymentStatus::Refunded);
        assert_eq!(f.geosearch.driver(driver).await.unwrap().status, DriverStatus::Available);

        let err = f.manager.cancel(booking.id, "user", "again").await.unwrap_err();
        assert_eq!(err.kind(), "already_terminal");
    }

    #[tokio::test]
    async fn test_location_update_recomputes_eta() {
        let f = fixture().await;
        let driver = add_driver(&f.geosearch, DriverStatus::Available).await;
        let request = sample_request(Requester::Account { user_id: f.user_id }, RequestType::Scheduled, Priority::Medium);
        let booking = f.manager.create(request).await.unwrap();

        let err = f
            .manager
            .update_driver_location(booking.id, GeoPoint::new(28.62, 77.21))
            .await
            .unwrap_err();
        assert_eq!(err.kind(), "validation");

        f.manager.assign_driver(booking.id, driver, None).await.unwrap();
        let updated = f
            .manager
            .update_driver_location(booking.id, GeoPoint::new(28.6316, 77.2168))
            .await
            .unwrap();
        assert_eq!(updated.tracking.eta_to_pickup_minutes, Some(1));
        assert_eq!(updated.status, BookingStatus::DriverAssigned);
    }

    #[tokio::test]
    async fn test_booking_locks_released_after_completion_and_cancel() {
        let f = fixture().await;
        let driver = add_driver(&f.geosearch, DriverStatus::Available).await;
        let request = sample_request(Requester::Account { user_id: f.user_id }, RequestType::Scheduled, Priority::Medium);
        let completed = f.manager.create(request).await.unwrap();
        let request = sample_request(Requester::Account { user_id: f.user_id }, RequestType::Scheduled, Priority::Low);
        let cancelled = f.manager.create(request).await.unwrap();

        let (first, second) = tokio::join!(
            f.manager.update_status(completed.id, BookingStatus::Confirmed, StatusContext::default()),
            f.manager.update_status(completed.id, BookingStatus::Confirmed, StatusContext::default()),
        );
        first.unwrap();
        second.unwrap();
        assert_eq!(f.manager.tracked_locks(), 0);

        f.manager.assign_driver(completed.id, driver, None).await.unwrap();
        for status in [
            BookingStatus::DriverEnroute,
            BookingStatus::DriverArrived,
            BookingStatus::PatientPicked,
            BookingStatus::InTransit,
            BookingStatus::ArrivedHospital,
            BookingStatus::Completed,
        ] {
            f.manager
                .update_status(completed.id, status, StatusContext::default())
                .await
                .unwrap();
        }
        f.manager.cancel(cancelled.id, "user", "no longer needed").await.unwrap();
        assert_eq!(f.manager.tracked_locks(), 0);

        // 失败的操作同样释放锁
        let err = f.manager.cancel(cancelled.id, "user", "again").await.unwrap_err();
        assert_eq!(err.kind(), "already_terminal");
        assert_eq!(f.manager.tracked_locks(), 0);
    }
}
