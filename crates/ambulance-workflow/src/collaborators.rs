//! 外部协作者接口
//!
//! 用户目录、预约存储、地理检索和通知传输均通过这些特征注入，
//! 核心逻辑不依赖具体实现。

use ambulance_core::{
    Booking, BookingFilter, DriverCandidate, DriverLocation, GeoPoint, Result, UserStatus,
    VehicleClass,
};
use async_trait::async_trait;
use uuid::Uuid;

/// 用户目录
#[async_trait]
pub trait UserDirectory: Send + Sync {
    /// 查询用户状态，不存在时返回 `None`
    async fn resolve_user(&self, user_id: Uuid) -> Result<Option<UserStatus>>;
}

/// 预约存储
#[async_trait]
pub trait BookingStore: Send + Sync {
    /// 保存新预约
    async fn create(&self, booking: &Booking) -> Result<()>;

    /// 按ID查找预约
    async fn find_by_id(&self, booking_id: Uuid) -> Result<Option<Booking>>;

    /// 更新预约
    async fn update(&self, booking: &Booking) -> Result<()>;

    /// 按过滤条件查询，按创建时间倒序并分页
    async fn find(&self, filter: &BookingFilter) -> Result<Vec<Booking>>;
}

/// 地理检索服务
#[async_trait]
pub trait Geosearch: Send + Sync {
    /// 查询半径内最近的司机，按距离升序
    async fn nearest_drivers(
        &self,
        point: GeoPoint,
        radius_km: f64,
        max_results: usize,
        vehicle_class: Option<VehicleClass>,
    ) -> Result<Vec<DriverCandidate>>;

    /// 查询司机当前位置与状态
    async fn driver_location(&self, driver_id: Uuid) -> Result<Option<DriverLocation>>;

    /// 设置司机是否可接单
    async fn set_driver_availability(&self, driver_id: Uuid, available: bool) -> Result<()>;
}

/// 通知传输层
///
/// 返回值表示是否送达；`Err` 表示传输层故障，两者都由扇出层记录后跳过。
#[async_trait]
pub trait NotificationTransport: Send + Sync {
    /// 发送给注册用户
    async fn send_to_user(&self, user_id: Uuid, event: &str, payload: &serde_json::Value) -> Result<bool>;

    /// 发送给匿名来电者的临时通道
    async fn send_to_caller(&self, phone: &str, event: &str, payload: &serde_json::Value) -> Result<bool>;

    /// 发送给司机
    async fn send_to_operator(&self, driver_id: Uuid, event: &str, payload: &serde_json::Value) -> Result<bool>;

    /// 发送给接收医院
    async fn send_to_facility(&self, facility_id: Uuid, event: &str, payload: &serde_json::Value) -> Result<bool>;

    /// 广播给调度主管
    async fn broadcast_to_supervisors(&self, event: &str, payload: &serde_json::Value) -> Result<bool>;

    /// 广播给所有在岗司机
    async fn broadcast_to_all_operators(&self, event: &str, payload: &serde_json::Value) -> Result<bool>;
}
