//! # 救护车调度工作流模块
//!
//! 提供救护车预约从提交到完成的完整调度流程，包括：
//! - 预约状态机：管理预约的全部合法状态转换
//! - 生命周期管理：创建、状态更新、派车、取消与退款
//! - 派车引擎：候选司机检索、多因子评分与阈值判定
//! - 通知扇出：按预约状态向不同角色推送不同形状的消息
//! - 自动派车调度：紧急预约的可取消延迟派车

pub mod collaborators;
pub mod dispatch;
pub mod engine;
pub mod fare;
pub mod history;
pub mod lifecycle;
pub mod memory;
pub mod notification;
pub mod scheduler;
pub mod scoring;
pub mod state_machine;
pub mod triage;

#[cfg(test)]
mod test_support;

// 重新导出主要类型
pub use collaborators::{BookingStore, Geosearch, NotificationTransport, UserDirectory};
pub use dispatch::{DispatchConstraints, DispatchEngine, DispatchResult, DispatchSettings, RankedCandidate};
pub use engine::{CenterSettings, Collaborators, DispatchCenter, DispatchSystemOverview};
pub use fare::{FareCalculator, FarePolicy};
pub use history::{DispatchAnalytics, DispatchFailureReason, DispatchHistory, DispatchMethod, DispatchRecord};
pub use lifecycle::{BookingLifecycleManager, LifecycleSettings, StatusContext};
pub use memory::{
    FleetDriver, InMemoryBookingStore, InMemoryDirectory, InMemoryGeosearch, RecordingTransport,
    SearchFailure,
};
pub use notification::{
    BookingEventType, DeliveryStatus, FanoutReport, NotificationFanout, NotificationSettings,
    NotificationStats, Recipient,
};
pub use scheduler::AutoDispatchScheduler;
pub use scoring::{PriorityProfile, ScoreWeights, ScoringProfiles};
pub use state_machine::BookingStateMachine;
