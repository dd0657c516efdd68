//! 核心数据模型定义

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::fmt;
use uuid::Uuid;

/// 地理坐标
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct GeoPoint {
    pub latitude: f64,
    pub longitude: f64,
}

impl GeoPoint {
    pub fn new(latitude: f64, longitude: f64) -> Self {
        Self { latitude, longitude }
    }
}

/// 预约状态
#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq, Hash, PartialOrd, Ord)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum BookingStatus {
    Requested,       // 已提交
    Confirmed,       // 已确认
    DriverAssigned,  // 已派车
    DriverEnroute,   // 司机前往中
    DriverArrived,   // 司机已到达
    PatientPicked,   // 已接到患者
    InTransit,       // 转运中
    ArrivedHospital, // 已到达医院
    Completed,       // 已完成
    Cancelled,       // 已取消
}

impl BookingStatus {
    pub const ALL: [BookingStatus; 10] = [
        BookingStatus::Requested,
        BookingStatus::Confirmed,
        BookingStatus::DriverAssigned,
        BookingStatus::DriverEnroute,
        BookingStatus::DriverArrived,
        BookingStatus::PatientPicked,
        BookingStatus::InTransit,
        BookingStatus::ArrivedHospital,
        BookingStatus::Completed,
        BookingStatus::Cancelled,
    ];

    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Requested => "REQUESTED",
            Self::Confirmed => "CONFIRMED",
            Self::DriverAssigned => "DRIVER_ASSIGNED",
            Self::DriverEnroute => "DRIVER_ENROUTE",
            Self::DriverArrived => "DRIVER_ARRIVED",
            Self::PatientPicked => "PATIENT_PICKED",
            Self::InTransit => "IN_TRANSIT",
            Self::ArrivedHospital => "ARRIVED_HOSPITAL",
            Self::Completed => "COMPLETED",
            Self::Cancelled => "CANCELLED",
        }
    }

    /// 终止状态不再允许任何转换
    pub fn is_terminal(&self) -> bool {
        matches!(self, Self::Completed | Self::Cancelled)
    }

    /// 是否已进入派车及之后的阶段（不含取消）
    pub fn is_assigned_stage(&self) -> bool {
        matches!(
            self,
            Self::DriverAssigned
                | Self::DriverEnroute
                | Self::DriverArrived
                | Self::PatientPicked
                | Self::InTransit
                | Self::ArrivedHospital
                | Self::Completed
        )
    }

    /// 是否已接到患者
    pub fn is_patient_onboard(&self) -> bool {
        matches!(self, Self::PatientPicked | Self::InTransit | Self::ArrivedHospital)
    }
}

impl fmt::Display for BookingStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// 请求类型
#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq, Hash)]
#[serde(rename_all = "lowercase")]
pub enum RequestType {
    Emergency, // 紧急呼叫
    Scheduled, // 预约用车
    Transfer,  // 院间转运
}

/// 优先级
#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq, Hash, PartialOrd, Ord)]
#[serde(rename_all = "lowercase")]
pub enum Priority {
    Low,
    Medium,
    High,
    Critical,
}

impl Priority {
    pub const ALL: [Priority; 4] = [Priority::Critical, Priority::High, Priority::Medium, Priority::Low];

    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Low => "low",
            Self::Medium => "medium",
            Self::High => "high",
            Self::Critical => "critical",
        }
    }
}

/// 车辆等级
#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq, Hash)]
#[serde(rename_all = "lowercase")]
pub enum VehicleClass {
    Basic,    // 基础生命支持
    Advanced, // 高级生命支持
    Cardiac,  // 心脏专科
    Neonatal, // 新生儿专科
    Icu,      // ICU 重症监护
}

impl VehicleClass {
    /// 车辆救治能力等级，数值越大能力越强
    pub fn capability_rank(&self) -> u8 {
        match self {
            Self::Basic => 1,
            Self::Advanced => 2,
            Self::Cardiac | Self::Neonatal => 3,
            Self::Icu => 4,
        }
    }

    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Basic => "basic",
            Self::Advanced => "advanced",
            Self::Cardiac => "cardiac",
            Self::Neonatal => "neonatal",
            Self::Icu => "icu",
        }
    }
}

/// 设备需求
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct EquipmentRequirements {
    pub oxygen: bool,
    pub stretcher: bool,
    pub ventilator: bool,
    pub attendant_required: bool,
}

/// 车辆需求
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Requirements {
    pub vehicle_class: VehicleClass,
    pub equipment: EquipmentRequirements,
}

/// 匿名来电者（未登录的紧急呼叫）
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct CallerRecord {
    pub name: String,
    pub phone: String,
    pub location: Option<String>,
}

/// 请求者
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(tag = "kind", rename_all = "snake_case")]
pub enum Requester {
    Account { user_id: Uuid },
    Anonymous(CallerRecord),
}

impl Requester {
    pub fn user_id(&self) -> Option<Uuid> {
        match self {
            Self::Account { user_id } => Some(*user_id),
            Self::Anonymous(_) => None,
        }
    }
}

/// 上车地点
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct PickupPoint {
    pub address: String,
    pub coordinates: GeoPoint,
    pub landmark: Option<String>,
    pub contact_phone: Option<String>,
}

/// 目的地
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Destination {
    pub address: String,
    pub coordinates: GeoPoint,
    pub facility_name: Option<String>,
    pub facility_id: Option<Uuid>, // 接收医院，存在时通知医院
}

/// 性别
#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "lowercase")]
pub enum Gender {
    Male,
    Female,
    Other,
}

/// 生命体征
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct Vitals {
    pub heart_rate: Option<u32>,
    pub blood_pressure: Option<String>,
    pub oxygen_saturation: Option<u32>,
    pub temperature_c: Option<f64>,
}

/// 紧急联系人
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct EmergencyContact {
    pub name: String,
    pub phone: String,
    pub relation: String,
}

/// 患者信息
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct PatientInfo {
    pub name: String,
    pub age: u32,
    pub gender: Gender,
    pub condition: String,
    #[serde(default)]
    pub symptoms: Vec<String>,
    #[serde(default)]
    pub allergies: Vec<String>,
    #[serde(default)]
    pub medications: Vec<String>,
    pub vitals: Option<Vitals>,
    pub emergency_contact: EmergencyContact,
}

impl PatientInfo {
    /// 病情与症状合并文本，用于关键词匹配
    pub fn clinical_text(&self) -> String {
        let mut text = self.condition.to_lowercase();
        for symptom in &self.symptoms {
            text.push(' ');
            text.push_str(&symptom.to_lowercase());
        }
        text
    }
}

/// 支付状态
#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "lowercase")]
pub enum PaymentStatus {
    Pending,
    Paid,
    Refunded,
    Failed,
}

/// 费用明细
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct FareBreakdown {
    pub base_fare: f64,
    pub distance_charge: f64,
    pub time_charge: f64,
    pub emergency_charge: Option<f64>,
    pub tax: f64,
    pub total: f64,
}

/// 支付信息
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Payment {
    pub amount: f64,
    pub currency: String,
    pub status: PaymentStatus,
    pub breakdown: FareBreakdown,
}

/// 时间线条目，只追加不修改
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct TimelineEntry {
    pub status: BookingStatus,
    pub timestamp: DateTime<Utc>,
    pub location: Option<GeoPoint>,
    pub note: Option<String>,
    #[serde(default)]
    pub reaffirmed: bool,
}

/// 退款状态
#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "snake_case")]
pub enum RefundStatus {
    NotApplicable, // 未支付或无退款
    Refunded,
}

/// 取消记录
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct CancellationRecord {
    pub reason: String,
    pub cancelled_by: String,
    pub cancelled_at: DateTime<Utc>,
    pub refund_amount: f64,
    pub refund_status: RefundStatus,
}

/// 实时跟踪信息
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct Tracking {
    pub driver_location: Option<GeoPoint>,
    pub eta_to_pickup_minutes: Option<u32>,
    pub eta_to_destination_minutes: Option<u32>,
    pub updated_at: Option<DateTime<Utc>>,
}

/// 预约（核心实体）
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Booking {
    pub id: Uuid,
    pub reference: String, // 人类可读的流水号
    pub request_type: RequestType,
    pub priority: Priority,
    pub requester: Requester,
    pub assigned_driver: Option<Uuid>,
    pub pickup: PickupPoint,
    pub destination: Option<Destination>,
    pub patient: PatientInfo,
    pub requirements: Requirements,
    pub payment: Payment,
    pub distance_km: f64,
    pub timeline: Vec<TimelineEntry>,
    pub cancellation: Option<CancellationRecord>,
    pub tracking: Tracking,
    pub status: BookingStatus,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
}

impl Booking {
    /// 是否需要创建后立即自动派车
    pub fn needs_auto_dispatch(&self) -> bool {
        self.priority == Priority::Critical || self.request_type == RequestType::Emergency
    }

    /// 接收医院ID
    pub fn facility_id(&self) -> Option<Uuid> {
        self.destination.as_ref().and_then(|d| d.facility_id)
    }

    /// 最后一条时间线记录
    pub fn last_timeline_entry(&self) -> Option<&TimelineEntry> {
        self.timeline.last()
    }

    /// 追加时间线记录并同步当前状态
    pub fn push_timeline(
        &mut self,
        status: BookingStatus,
        location: Option<GeoPoint>,
        note: Option<String>,
        reaffirmed: bool,
    ) {
        let now = Utc::now();
        self.timeline.push(TimelineEntry {
            status,
            timestamp: now,
            location,
            note,
            reaffirmed,
        });
        self.status = status;
        self.updated_at = now;
    }
}

/// 创建预约请求
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct NewBookingRequest {
    pub request_type: RequestType,
    pub priority: Priority,
    pub requester: Requester,
    pub pickup: PickupPoint,
    pub destination: Option<Destination>,
    pub patient: PatientInfo,
    pub requirements: Option<Requirements>,
}

/// 预约列表过滤器
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct BookingFilter {
    pub status: Option<Vec<BookingStatus>>,
    pub priority: Option<Vec<Priority>>,
    pub request_type: Option<Vec<RequestType>>,
    pub created_from: Option<DateTime<Utc>>,
    pub created_to: Option<DateTime<Utc>>,
    pub limit: Option<usize>,
    pub offset: Option<usize>,
}

impl Default for BookingFilter {
    fn default() -> Self {
        Self {
            status: None,
            priority: None,
            request_type: None,
            created_from: None,
            created_to: None,
            limit: Some(50),
            offset: Some(0),
        }
    }
}

impl BookingFilter {
    /// 判断预约是否满足过滤条件（不含分页）
    pub fn matches(&self, booking: &Booking) -> bool {
        if let Some(statuses) = &self.status {
            if !statuses.contains(&booking.status) {
                return false;
            }
        }
        if let Some(priorities) = &self.priority {
            if !priorities.contains(&booking.priority) {
                return false;
            }
        }
        if let Some(types) = &self.request_type {
            if !types.contains(&booking.request_type) {
                return false;
            }
        }
        if let Some(from) = self.created_from {
            if booking.created_at < from {
                return false;
            }
        }
        if let Some(to) = self.created_to {
            if booking.created_at > to {
                return false;
            }
        }
        true
    }
}

/// 用户账户状态
#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "lowercase")]
pub enum UserStatus {
    Active,
    Inactive,
}

/// 司机状态
#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "lowercase")]
pub enum DriverStatus {
    Available,
    Busy,
    Offline,
}

/// 司机当前位置
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct DriverLocation {
    pub point: GeoPoint,
    pub status: DriverStatus,
}

/// 候选司机（每次派车时由地理检索生成，不持久化）
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct DriverCandidate {
    pub driver_id: Uuid,
    pub location: GeoPoint,
    pub vehicle_class: VehicleClass,
    pub distance_km: f64,
    pub available: bool,
    pub rating: Option<f64>, // 0-5 分
    #[serde(default)]
    pub response_times_minutes: Vec<f64>,
}
