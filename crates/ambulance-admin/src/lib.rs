//! # 救护车调度管理模块
//!
//! 提供配置管理、日志初始化和派车指标监控等运维功能

pub mod config;
pub mod logging;
pub mod monitoring;

use ambulance_workflow::{DispatchCenter, DispatchSystemOverview};
use anyhow::Result;
use std::sync::Arc;

pub use config::{AmbulanceConfig, ConfigManager, LogFormat, LoggingConfig};
pub use logging::init_tracing;
pub use monitoring::DispatchMonitor;

/// 系统管理器
///
/// 集成配置与监控的统一入口点
#[derive(Debug)]
pub struct SystemManager {
    /// 配置管理器
    config_manager: Arc<ConfigManager>,
    /// 派车监控器
    dispatch_monitor: Arc<DispatchMonitor>,
}

impl SystemManager {
    /// 创建新的系统管理器
    pub fn new(config_path: Option<&str>) -> Result<Self> {
        let config_manager = Arc::new(ConfigManager::new(config_path)?);
        let dispatch_monitor = Arc::new(DispatchMonitor::new()?);

        Ok(Self {
            config_manager,
            dispatch_monitor,
        })
    }

    /// 获取配置管理器
    pub fn config_manager(&self) -> &Arc<ConfigManager> {
        &self.config_manager
    }

    /// 获取派车监控器
    pub fn dispatch_monitor(&self) -> &Arc<DispatchMonitor> {
        &self.dispatch_monitor
    }

    /// 按配置初始化日志
    pub async fn init_logging(&self) -> Result<()> {
        let config = self.config_manager.get_config().await;
        init_tracing(&config.logging)
    }

    /// 生成系统状态报告并刷新指标
    pub async fn generate_status_report(&self, center: &DispatchCenter) -> Result<SystemStatusReport> {
        let overview = center.overview().await?;
        self.dispatch_monitor.record_overview(&overview);

        Ok(SystemStatusReport {
            timestamp: chrono::Utc::now(),
            overview,
            metrics: self.dispatch_monitor.get_prometheus_metrics()?,
        })
    }
}

/// 系统状态报告
#[derive(Debug, serde::Serialize, serde::Deserialize)]
pub struct SystemStatusReport {
    /// 报告生成时间
    pub timestamp: chrono::DateTime<chrono::Utc>,
    /// 调度概览
    pub overview: DispatchSystemOverview,
    /// Prometheus文本格式指标
    pub metrics: String,
}

#[cfg(test)]
mod tests {
    use super::*;
    use ambulance_workflow::{
        Collaborators, InMemoryBookingStore, InMemoryDirectory, InMemoryGeosearch, RecordingTransport,
    };

    #[tokio::test]
    async fn test_status_report_for_empty_center() {
        let manager = SystemManager::new(None).unwrap();
        let settings = manager.config_manager().center_settings().await;
        let center = DispatchCenter::new(
            Collaborators {
                store: Arc::new(InMemoryBookingStore::new()),
                directory: Arc::new(InMemoryDirectory::new()),
                geosearch: Arc::new(InMemoryGeosearch::new()),
                transport: Arc::new(RecordingTransport::new()),
            },
            settings,
        );

        let report = manager.generate_status_report(&center).await.unwrap();
        assert_eq!(report.overview.total_bookings, 0);
        assert!(report.metrics.contains("ambulance_bookings_active 0"));
    }
}
