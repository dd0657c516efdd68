//! 派车监控
//!
//! 将派车统计和通知统计导出为 Prometheus 指标

use ambulance_workflow::{DispatchAnalytics, DispatchSystemOverview, NotificationStats};
use anyhow::{Context, Result};
use prometheus::{Gauge, IntGauge, IntGaugeVec, Opts, Registry};
use tracing::debug;

/// 派车指标收集器
///
/// 派车历史是有界的滚动窗口，因此这里全部使用 Gauge，每次从快照整体刷新。
#[derive(Debug)]
pub struct DispatchMonitor {
    /// Prometheus指标注册表
    registry: Registry,
    /// 窗口内派车尝试次数
    dispatch_attempts: IntGauge,
    dispatch_successes: IntGauge,
    dispatch_failures: IntGauge,
    /// 人工改派次数
    manual_overrides: IntGauge,
    /// 成功派车的平均分数
    average_score: Gauge,
    /// 成功派车的平均ETA（分钟）
    average_eta_minutes: Gauge,
    /// 按原因统计的失败次数
    failures_by_reason: IntGaugeVec,
    /// 按状态统计的预约数
    bookings_by_status: IntGaugeVec,
    active_bookings: IntGauge,
    pending_auto_dispatch: IntGauge,
    notifications_delivered: IntGauge,
    notifications_failed: IntGauge,
}

impl DispatchMonitor {
    /// 创建新的派车监控器
    pub fn new() -> Result<Self> {
        let registry = Registry::new_custom(Some("ambulance".to_string()), None)
            .context("Failed to create metrics registry")?;

        let dispatch_attempts = IntGauge::with_opts(Opts::new(
            "dispatch_attempts",
            "Dispatch attempts in the rolling history window",
        ))?;
        let dispatch_successes = IntGauge::with_opts(Opts::new(
            "dispatch_successes",
            "Successful dispatches in the rolling history window",
        ))?;
        let dispatch_failures = IntGauge::with_opts(Opts::new(
            "dispatch_failures",
            "Failed dispatches in the rolling history window",
        ))?;
        let manual_overrides = IntGauge::with_opts(Opts::new(
            "dispatch_manual_overrides",
            "Manual override dispatches in the rolling history window",
        ))?;
        let average_score = Gauge::with_opts(Opts::new(
            "dispatch_average_score",
            "Average winning score of automatic dispatches",
        ))?;
        let average_eta_minutes = Gauge::with_opts(Opts::new(
            "dispatch_average_eta_minutes",
            "Average ETA to pickup of successful dispatches",
        ))?;
        let failures_by_reason = IntGaugeVec::new(
            Opts::new("dispatch_failures_by_reason", "Failed dispatches by reason"),
            &["reason"],
        )?;
        let bookings_by_status = IntGaugeVec::new(
            Opts::new("bookings", "Bookings by current status"),
            &["status"],
        )?;
        let active_bookings = IntGauge::with_opts(Opts::new("bookings_active", "Non-terminal bookings"))?;
        let pending_auto_dispatch = IntGauge::with_opts(Opts::new(
            "auto_dispatch_pending",
            "Scheduled auto-dispatch tasks not yet run",
        ))?;
        let notifications_delivered = IntGauge::with_opts(Opts::new(
            "notifications_delivered",
            "Notifications delivered since start",
        ))?;
        let notifications_failed = IntGauge::with_opts(Opts::new(
            "notifications_failed",
            "Notifications not delivered since start",
        ))?;

        registry.register(Box::new(dispatch_attempts.clone()))?;
        registry.register(Box::new(dispatch_successes.clone()))?;
        registry.register(Box::new(dispatch_failures.clone()))?;
        registry.register(Box::new(manual_overrides.clone()))?;
        registry.register(Box::new(average_score.clone()))?;
        registry.register(Box::new(average_eta_minutes.clone()))?;
        registry.register(Box::new(failures_by_reason.clone()))?;
        registry.register(Box::new(bookings_by_status.clone()))?;
        registry.register(Box::new(active_bookings.clone()))?;
        registry.register(Box::new(pending_auto_dispatch.clone()))?;
        registry.register(Box::new(notifications_delivered.clone()))?;
        registry.register(Box::new(notifications_failed.clone()))?;

        Ok(Self {
            registry,
            dispatch_attempts,
            dispatch_successes,
            dispatch_failures,
            manual_overrides,
            average_score,
            average_eta_minutes,
            failures_by_reason,
            bookings_by_status,
            active_bookings,
            pending_auto_dispatch,
            notifications_delivered,
            notifications_failed,
        })
    }

    /// 用派车统计快照刷新指标
    pub fn record_analytics(&self, analytics: &DispatchAnalytics) {
        self.dispatch_attempts.set(analytics.total_dispatches as i64);
        self.dispatch_successes.set(analytics.successful as i64);
        self.dispatch_failures.set(analytics.failed as i64);
        self.manual_overrides.set(analytics.manual_overrides as i64);
        self.average_score.set(analytics.average_score.unwrap_or(0.0));
        self.average_eta_minutes.set(analytics.average_eta_minutes.unwrap_or(0.0));

        self.failures_by_reason.reset();
        for (reason, count) in &analytics.failures_by_reason {
            self.failures_by_reason
                .with_label_values(&[reason.as_str()])
                .set(*count as i64);
        }
    }

    pub fn record_notifications(&self, stats: &NotificationStats) {
        self.notifications_delivered.set(stats.delivered as i64);
        self.notifications_failed.set(stats.failed as i64);
    }

    /// 用系统概览刷新全部指标
    pub fn record_overview(&self, overview: &DispatchSystemOverview) {
        self.record_analytics(&overview.analytics);
        self.record_notifications(&overview.notifications);
        self.active_bookings.set(overview.active_bookings as i64);
        self.pending_auto_dispatch.set(overview.pending_auto_dispatch as i64);

        self.bookings_by_status.reset();
        for (status, count) in &overview.bookings_by_status {
            self.bookings_by_status
                .with_label_values(&[status.as_str()])
                .set(*count as i64);
        }
        debug!("Dispatch metrics refreshed");
    }

    /// 获取Prometheus文本格式指标
    pub fn get_prometheus_metrics(&self) -> Result<String> {
        use prometheus::Encoder;

        let metric_families = self.registry.gather();
        let encoder = prometheus::TextEncoder::new();
        let mut buffer = Vec::new();
        encoder.encode(&metric_families, &mut buffer)?;

        String::from_utf8(buffer).context("Metrics output is not valid UTF-8")
    }

    pub fn registry(&self) -> &Registry {
        &self.registry
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::collections::HashMap;

    #[test]
    fn test_metrics_exposition() {
        let monitor = DispatchMonitor::new().unwrap();
        let analytics = DispatchAnalytics {
            total_dispatches: 4,
            successful: 3,
            failed: 1,
            success_rate: 0.75,
            manual_overrides: 1,
            average_score: Some(0.82),
            average_eta_minutes: Some(6.5),
            failures_by_reason: HashMap::from([("no_candidates".to_string(), 1)]),
            by_priority: HashMap::new(),
        };
        monitor.record_analytics(&analytics);
        monitor.record_notifications(&NotificationStats {
            delivered: 12,
            failed: 2,
        });

        let text = monitor.get_prometheus_metrics().unwrap();
        assert!(text.contains("ambulance_dispatch_attempts 4"));
        assert!(text.contains("ambulance_dispatch_manual_overrides 1"));
        assert!(text.contains("ambulance_dispatch_failures_by_reason{reason=\"no_candidates\"} 1"));
        assert!(text.contains("ambulance_notifications_failed 2"));
    }
}
