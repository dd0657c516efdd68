//! 实时通知扇出
//!
//! 根据预约当前状态决定接收者，并为每类接收者生成不同形状的消息：
//! - 请求者：状态说明与当前可执行操作
//! - 已派司机：导航目标、患者摘要与下一步操作
//! - 接收医院：ETA、患者摘要与优先级
//! - 调度主管：高/危重优先级或关键状态变化
//! - 全体在岗司机：危重预约的紧急告警
//!
//! 投递失败只记录日志，不会影响触发它的生命周期操作。

use crate::collaborators::NotificationTransport;
use ambulance_core::{Booking, BookingStatus, Priority, Requester};
use serde::{Deserialize, Serialize};
use serde_json::json;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;
use std::time::Duration;
use tracing::{debug, error, warn};
use uuid::Uuid;

/// 通知接收者
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum Recipient {
    User(Uuid),
    Caller(String), // 匿名来电者的临时通道（电话号码）
    Operator(Uuid),
    Facility(Uuid),
    Supervisors,
    AllOperators,
}

/// 预约事件类型
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum BookingEventType {
    Created,
    StatusChanged,
    DriverAssigned,
    Cancelled,
    LocationUpdated,
    DispatchFailed,
}

impl BookingEventType {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Created => "booking.created",
            Self::StatusChanged => "booking.status_changed",
            Self::DriverAssigned => "booking.driver_assigned",
            Self::Cancelled => "booking.cancelled",
            Self::LocationUpdated => "booking.location_updated",
            Self::DispatchFailed => "dispatch.failed",
        }
    }
}

/// 紧急告警事件名
pub const EMERGENCY_ALERT_EVENT: &str = "emergency.alert";

/// 投递结果
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub enum DeliveryStatus {
    Delivered,
    Undelivered, // 接收者不在线
    Failed,
    TimedOut,
}

/// 单条投递记录
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct DeliveryRecord {
    pub recipient: Recipient,
    pub event: String,
    pub status: DeliveryStatus,
    pub error: Option<String>,
}

/// 一次扇出的结果
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct FanoutReport {
    pub booking_id: Uuid,
    pub event: BookingEventType,
    pub deliveries: Vec<DeliveryRecord>,
}

impl FanoutReport {
    pub fn delivered_count(&self) -> usize {
        self.deliveries
            .iter()
            .filter(|d| d.status == DeliveryStatus::Delivered)
            .count()
    }

    pub fn failed_count(&self) -> usize {
        self.deliveries.len() - self.delivered_count()
    }

    pub fn recipients(&self) -> Vec<&Recipient> {
        self.deliveries.iter().map(|d| &d.recipient).collect()
    }
}

/// 通知配置
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct NotificationSettings {
    /// 单次投递超时（毫秒）
    pub delivery_timeout_ms: u64,
}

impl Default for NotificationSettings {
    fn default() -> Self {
        Self {
            delivery_timeout_ms: 2000,
        }
    }
}

/// 通知统计
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct NotificationStats {
    pub delivered: u64,
    pub failed: u64,
}

/// 通知扇出器
pub struct NotificationFanout {
    transport: Arc<dyn NotificationTransport>,
    settings: NotificationSettings,
    delivered: AtomicU64,
    failed: AtomicU64,
}

impl std::fmt::Debug for NotificationFanout {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("NotificationFanout")
            .field("settings", &self.settings)
            .field("delivered", &self.delivered.load(Ordering::Relaxed))
            .field("failed", &self.failed.load(Ordering::Relaxed))
            .finish()
    }
}

/// 请求者可见的状态说明
fn status_message(status: BookingStatus) -> &'static str {
    match status {
        BookingStatus::Requested => "Your request has been received. We are finding the nearest ambulance.",
        BookingStatus::Confirmed => "Your booking is confirmed. An ambulance will be assigned shortly.",
        BookingStatus::DriverAssigned => "An ambulance has been assigned to you.",
        BookingStatus::DriverEnroute => "The ambulance is on the way to the pickup location.",
        BookingStatus::DriverArrived => "The ambulance has arrived at the pickup location.",
        BookingStatus::PatientPicked => "The patient is on board.",
        BookingStatus::InTransit => "The ambulance is heading to the destination.",
        BookingStatus::ArrivedHospital => "The ambulance has arrived at the hospital.",
        BookingStatus::Completed => "The trip is complete. Wishing a speedy recovery.",
        BookingStatus::Cancelled => "The booking has been cancelled.",
    }
}

/// 请求者当前可执行的操作
fn requester_actions(status: BookingStatus) -> &'static [&'static str] {
    match status {
        BookingStatus::Requested | BookingStatus::Confirmed => &["cancel", "call_support"],
        BookingStatus::DriverAssigned | BookingStatus::DriverEnroute => &["cancel", "track", "call_driver"],
        BookingStatus::DriverArrived => &["cancel", "call_driver"],
        BookingStatus::PatientPicked | BookingStatus::InTransit => &["track", "call_driver"],
        BookingStatus::ArrivedHospital => &["call_support"],
        BookingStatus::Completed => &["rate", "download_receipt"],
        BookingStatus::Cancelled => &["book_again"],
    }
}

/// 司机操作指引及下一步预期操作
fn operator_instructions(status: BookingStatus) -> (&'static [&'static str], &'static str) {
    match status {
        BookingStatus::Requested | BookingStatus::Confirmed => {
            (&["Await assignment confirmation"], "await_assignment")
        }
        BookingStatus::DriverAssigned => (
            &["Acknowledge the assignment", "Check required equipment", "Start navigation to pickup"],
            "start_trip",
        ),
        BookingStatus::DriverEnroute => (
            &["Follow navigation to pickup", "Call the contact if the address is unclear"],
            "mark_arrived",
        ),
        BookingStatus::DriverArrived => (
            &["Locate the patient", "Assess condition and vitals", "Load patient safely"],
            "mark_patient_picked",
        ),
        BookingStatus::PatientPicked => (
            &["Monitor the patient", "Start navigation to destination"],
            "start_transit",
        ),
        BookingStatus::InTransit => (
            &["Monitor vitals en route", "Keep the receiving facility informed"],
            "mark_arrived_hospital",
        ),
        BookingStatus::ArrivedHospital => (
            &["Hand over the patient to facility staff", "Complete handover notes"],
            "complete_trip",
        ),
        BookingStatus::Completed => (&["Sanitize the vehicle", "Return to available status"], "go_available"),
        BookingStatus::Cancelled => (&["Stand down and return to available status"], "go_available"),
    }
}

/// 接收医院关心的阶段
fn facility_stage(status: BookingStatus) -> &'static str {
    match status {
        BookingStatus::Requested | BookingStatus::Confirmed => "incoming_request",
        BookingStatus::DriverAssigned | BookingStatus::DriverEnroute | BookingStatus::DriverArrived => {
            "ambulance_dispatched"
        }
        BookingStatus::PatientPicked | BookingStatus::InTransit => "patient_incoming",
        BookingStatus::ArrivedHospital => "patient_arrived",
        BookingStatus::Completed => "handover_complete",
        BookingStatus::Cancelled => "request_cancelled",
    }
}

/// 无论优先级都需通知主管的关键状态
fn is_critical_status(status: BookingStatus) -> bool {
    matches!(
        status,
        BookingStatus::PatientPicked | BookingStatus::ArrivedHospital | BookingStatus::Cancelled
    )
}

impl NotificationFanout {
    pub fn new(transport: Arc<dyn NotificationTransport>, settings: NotificationSettings) -> Self {
        Self {
            transport,
            settings,
            delivered: AtomicU64::new(0),
            failed: AtomicU64::new(0),
        }
    }

    /// 根据预约状态决定接收者
    pub fn audience(&self, event: BookingEventType, booking: &Booking) -> Vec<Recipient> {
        let mut recipients = vec![requester_recipient(&booking.requester)];

        if event == BookingEventType::LocationUpdated {
            if let Some(facility_id) = booking.facility_id() {
                recipients.push(Recipient::Facility(facility_id));
            }
            return recipients;
        }

        if let Some(driver_id) = booking.assigned_driver {
            recipients.push(Recipient::Operator(driver_id));
        }
        if let Some(facility_id) = booking.facility_id() {
            recipients.push(Recipient::Facility(facility_id));
        }

        let urgent = matches!(booking.priority, Priority::High | Priority::Critical);
        if urgent || is_critical_status(booking.status) || event == BookingEventType::DispatchFailed {
            recipients.push(Recipient::Supervisors);
        }
        if booking.priority == Priority::Critical {
            recipients.push(Recipient::AllOperators);
        }

        recipients
    }

    /// 处理一个预约事件并投递给全部接收者
    pub async fn on_event(
        &self,
        event: BookingEventType,
        booking: &Booking,
        extra: Option<serde_json::Value>,
    ) -> FanoutReport {
        let extra = extra.unwrap_or(serde_json::Value::Null);
        let mut deliveries = Vec::new();

        for recipient in self.audience(event, booking) {
            let (event_name, payload) = match &recipient {
                Recipient::User(_) | Recipient::Caller(_) => {
                    (event.as_str(), requester_payload(event, booking, &extra))
                }
                Recipient::Operator(_) => (event.as_str(), operator_payload(event, booking, &extra)),
                Recipient::Facility(_) => (event.as_str(), facility_payload(event, booking, &extra)),
                Recipient::Supervisors => (event.as_str(), supervisor_payload(event, booking, &extra)),
                Recipient::AllOperators => (EMERGENCY_ALERT_EVENT, emergency_alert_payload(event, booking)),
            };

            let record = self.deliver(recipient, event_name, &payload).await;
            deliveries.push(record);
        }

        let report = FanoutReport {
            booking_id: booking.id,
            event,
            deliveries,
        };
        debug!(
            "Fan-out {} for booking {}: {} delivered, {} failed",
            event.as_str(),
            booking.id,
            report.delivered_count(),
            report.failed_count()
        );
        report
    }

    /// 直接通知已派司机（派车时使用）
    pub async fn notify_operator(&self, driver_id: Uuid, booking: &Booking, extra: Option<serde_json::Value>) -> DeliveryRecord {
        let extra = extra.unwrap_or(serde_json::Value::Null);
        let payload = operator_payload(BookingEventType::DriverAssigned, booking, &extra);
        self.deliver(Recipient::Operator(driver_id), "operator.assignment", &payload).await
    }

    pub fn stats(&self) -> NotificationStats {
        NotificationStats {
            delivered: self.delivered.load(Ordering::Relaxed),
            failed: self.failed.load(Ordering::Relaxed),
        }
    }

    async fn deliver(&self, recipient: Recipient, event: &str, payload: &serde_json::Value) -> DeliveryRecord {
        let timeout = Duration::from_millis(self.settings.delivery_timeout_ms);
        let send = async {
            match &recipient {
                Recipient::User(id) => self.transport.send_to_user(*id, event, payload).await,
                Recipient::Caller(phone) => self.transport.send_to_caller(phone, event, payload).await,
                Recipient::Operator(id) => self.transport.send_to_operator(*id, event, payload).await,
                Recipient::Facility(id) => self.transport.send_to_facility(*id, event, payload).await,
                Recipient::Supervisors => self.transport.broadcast_to_supervisors(event, payload).await,
                Recipient::AllOperators => self.transport.broadcast_to_all_operators(event, payload).await,
            }
        };

        let (status, error) = match tokio::time::timeout(timeout, send).await {
            Ok(Ok(true)) => (DeliveryStatus::Delivered, None),
            Ok(Ok(false)) => {
                warn!("Recipient {:?} unreachable for {}", recipient, event);
                (DeliveryStatus::Undelivered, None)
            }
            Ok(Err(e)) => {
                error!("Failed to deliver {} to {:?}: {}", event, recipient, e);
                (DeliveryStatus::Failed, Some(e.to_string()))
            }
            Err(_) => {
                warn!("Delivery of {} to {:?} timed out", event, recipient);
                (DeliveryStatus::TimedOut, Some("delivery timed out".to_string()))
            }
        };

        if status == DeliveryStatus::Delivered {
            self.delivered.fetch_add(1, Ordering::Relaxed);
        } else {
            self.failed.fetch_add(1, Ordering::Relaxed);
        }

        DeliveryRecord {
            recipient,
            event: event.to_string(),
            status,
            error,
        }
    }
}

fn requester_recipient(requester: &Requester) -> Recipient {
    match requester {
        Requester::Account { user_id } => Recipient::User(*user_id),
        Requester::Anonymous(caller) => Recipient::Caller(caller.phone.clone()),
    }
}

fn eta_minutes(booking: &Booking) -> Option<u32> {
    if booking.status.is_patient_onboard() {
        booking.tracking.eta_to_destination_minutes
    } else {
        booking.tracking.eta_to_pickup_minutes
    }
}

fn patient_summary(booking: &Booking) -> serde_json::Value {
    let patient = &booking.patient;
    json!({
        "name": patient.name,
        "age": patient.age,
        "gender": patient.gender,
        "condition": patient.condition,
        "symptoms": patient.symptoms,
        "allergies": patient.allergies,
        "vitals": patient.vitals,
    })
}

fn requester_payload(event: BookingEventType, booking: &Booking, extra: &serde_json::Value) -> serde_json::Value {
    json!({
        "booking_id": booking.id,
        "reference": booking.reference,
        "event": event.as_str(),
        "status": booking.status,
        "message": status_message(booking.status),
        "actions": requester_actions(booking.status),
        "eta_minutes": eta_minutes(booking),
        "driver_location": booking.tracking.driver_location,
        "assigned_driver": booking.assigned_driver,
        "vehicle_class": booking.requirements.vehicle_class,
        "fare": {
            "amount": booking.payment.amount,
            "currency": booking.payment.currency,
            "status": booking.payment.status,
        },
        "extra": extra,
    })
}

fn operator_payload(event: BookingEventType, booking: &Booking, extra: &serde_json::Value) -> serde_json::Value {
    let (instructions, next_action) = operator_instructions(booking.status);
    let navigation = match (&booking.destination, booking.status.is_patient_onboard()) {
        (Some(destination), true) => json!({
            "target": "destination",
            "address": destination.address,
            "coordinates": destination.coordinates,
            "facility_name": destination.facility_name,
        }),
        _ => json!({
            "target": "pickup",
            "address": booking.pickup.address,
            "coordinates": booking.pickup.coordinates,
            "landmark": booking.pickup.landmark,
            "contact_phone": booking.pickup.contact_phone,
        }),
    };

    json!({
        "booking_id": booking.id,
        "reference": booking.reference,
        "event": event.as_str(),
        "status": booking.status,
        "priority": booking.priority,
        "navigation": navigation,
        "patient": patient_summary(booking),
        "requirements": booking.requirements,
        "instructions": instructions,
        "next_action": next_action,
        "extra": extra,
    })
}

fn facility_payload(event: BookingEventType, booking: &Booking, extra: &serde_json::Value) -> serde_json::Value {
    json!({
        "booking_id": booking.id,
        "reference": booking.reference,
        "event": event.as_str(),
        "status": booking.status,
        "stage": facility_stage(booking.status),
        "priority": booking.priority,
        "eta_minutes": booking.tracking.eta_to_destination_minutes,
        "patient": patient_summary(booking),
        "emergency_contact": booking.patient.emergency_contact,
        "requirements": booking.requirements,
        "extra": extra,
    })
}

fn supervisor_payload(event: BookingEventType, booking: &Booking, extra: &serde_json::Value) -> serde_json::Value {
    json!({
        "booking_id": booking.id,
        "reference": booking.reference,
        "event": event.as_str(),
        "status": booking.status,
        "priority": booking.priority,
        "request_type": booking.request_type,
        "critical_status": is_critical_status(booking.status),
        "assigned_driver": booking.assigned_driver,
        "pickup": booking.pickup.coordinates,
        "condition": booking.patient.condition,
        "extra": extra,
    })
}

fn emergency_alert_payload(event: BookingEventType, booking: &Booking) -> serde_json::Value {
    json!({
        "booking_id": booking.id,
        "reference": booking.reference,
        "trigger": event.as_str(),
        "status": booking.status,
        "priority": booking.priority,
        "pickup": {
            "address": booking.pickup.address,
            "coordinates": booking.pickup.coordinates,
        },
        "condition": booking.patient.condition,
        "required_vehicle": booking.requirements.vehicle_class,
        "assigned_driver": booking.assigned_driver,
    })
}
