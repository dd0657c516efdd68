//! 派车历史
//!
//! 固定容量的环形缓冲区，只通过聚合查询对外暴露。

use ambulance_core::{Priority, VehicleClass};
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::collections::{HashMap, VecDeque};
use tokio::sync::RwLock;
use uuid::Uuid;

/// 派车方式
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum DispatchMethod {
    Automatic,
    ManualOverride,
}

/// 派车失败原因
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum DispatchFailureReason {
    NoCandidates,
    BelowThreshold,
    NoAvailableDriver,
    AssignmentRejected,
}

impl DispatchFailureReason {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::NoCandidates => "no_candidates",
            Self::BelowThreshold => "below_threshold",
            Self::NoAvailableDriver => "no_available_driver",
            Self::AssignmentRejected => "assignment_rejected",
        }
    }
}

/// 一次派车尝试
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct DispatchRecord {
    pub booking_id: Uuid,
    pub priority: Priority,
    pub method: DispatchMethod,
    pub driver_id: Option<Uuid>,
    pub vehicle_class: Option<VehicleClass>,
    pub score: Option<f64>,
    pub eta_minutes: Option<u32>,
    pub candidates_considered: usize,
    pub failure: Option<DispatchFailureReason>,
    pub note: Option<String>, // 人工改派理由或失败说明
    pub recorded_at: DateTime<Utc>,
}

impl DispatchRecord {
    pub fn succeeded(&self) -> bool {
        self.driver_id.is_some() && self.failure.is_none()
    }
}

/// 派车统计
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct DispatchAnalytics {
    pub total_dispatches: usize,
    pub successful: usize,
    pub failed: usize,
    pub success_rate: f64,
    pub manual_overrides: usize,
    pub average_score: Option<f64>,
    pub average_eta_minutes: Option<f64>,
    pub failures_by_reason: HashMap<String, usize>,
    pub by_priority: HashMap<String, usize>,
}

/// 派车历史环形缓冲
#[derive(Debug)]
pub struct DispatchHistory {
    capacity: usize,
    records: RwLock<VecDeque<DispatchRecord>>,
}

impl DispatchHistory {
    pub fn new(capacity: usize) -> Self {
        let capacity = capacity.max(1);
        Self {
            capacity,
            records: RwLock::new(VecDeque::with_capacity(capacity)),
        }
    }

    pub fn capacity(&self) -> usize {
        self.capacity
    }

    /// 记录一次尝试，超出容量时淘汰最旧记录
    pub async fn record(&self, record: DispatchRecord) {
        let mut records = self.records.write().await;
        while records.len() >= self.capacity {
            records.pop_front();
        }
        records.push_back(record);
    }

    pub async fn len(&self) -> usize {
        self.records.read().await.len()
    }

    /// 某司机在历史中成功派车的ETA样本
    pub async fn driver_etas(&self, driver_id: Uuid) -> Vec<f64> {
        self.records
            .read()
            .await
            .iter()
            .filter(|r| r.succeeded() && r.driver_id == Some(driver_id))
            .filter_map(|r| r.eta_minutes.map(f64::from))
            .collect()
    }

    /// 某预约最近一次派车记录
    pub async fn latest_for(&self, booking_id: Uuid) -> Option<DispatchRecord> {
        self.records
            .read()
            .await
            .iter()
            .rev()
            .find(|r| r.booking_id == booking_id)
            .cloned()
    }

    pub async fn analytics(&self) -> DispatchAnalytics {
        let records = self.records.read().await;
        let mut analytics = DispatchAnalytics {
            total_dispatches: records.len(),
            ..Default::default()
        };

        let mut score_sum = 0.0;
        let mut score_count = 0usize;
        let mut eta_sum = 0.0;
        let mut eta_count = 0usize;

        for record in records.iter() {
            *analytics
                .by_priority
                .entry(record.priority.as_str().to_string())
                .or_insert(0) += 1;

            if record.method == DispatchMethod::ManualOverride {
                analytics.manual_overrides += 1;
            }

            if record.succeeded() {
                analytics.successful += 1;
                if let Some(score) = record.score {
                    score_sum += score;
                    score_count += 1;
                }
                if let Some(eta) = record.eta_minutes {
                    eta_sum += f64::from(eta);
                    eta_count += 1;
                }
            } else {
                analytics.failed += 1;
                let reason = record
                    .failure
                    .map(|f| f.as_str())
                    .unwrap_or("unknown");
                *analytics.failures_by_reason.entry(reason.to_string()).or_insert(0) += 1;
            }
        }

        if analytics.total_dispatches > 0 {
            analytics.success_rate = analytics.successful as f64 / analytics.total_dispatches as f64;
        }
        if score_count > 0 {
            analytics.average_score = Some(score_sum / score_count as f64);
        }
        if eta_count > 0 {
            analytics.average_eta_minutes = Some(eta_sum / eta_count as f64);
        }

        analytics
    }
}

impl Default for DispatchHistory {
    fn default() -> Self {
        Self::new(100)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn record(driver: Option<Uuid>, eta: Option<u32>, failure: Option<DispatchFailureReason>) -> DispatchRecord {
        DispatchRecord {
            booking_id: Uuid::new_v4(),
            priority: Priority::High,
            method: DispatchMethod::Automatic,
            driver_id: driver,
            vehicle_class: Some(VehicleClass::Advanced),
            score: driver.map(|_| 0.8),
            eta_minutes: eta,
            candidates_considered: 3,
            failure,
            note: None,
            recorded_at: Utc::now(),
        }
    }

    #[tokio::test]
    async fn test_ring_buffer_evicts_oldest() {
        let history = DispatchHistory::new(3);
        let first = record(None, None, Some(DispatchFailureReason::NoCandidates));
        let first_id = first.booking_id;
        history.record(first).await;
        for _ in 0..3 {
            history.record(record(Some(Uuid::new_v4()), Some(5), None)).await;
        }

        assert_eq!(history.len().await, 3);
        assert!(history.latest_for(first_id).await.is_none());
    }

    #[tokio::test]
    async fn test_analytics_aggregates() {
        let history = DispatchHistory::new(10);
        let driver = Uuid::new_v4();
        history.record(record(Some(driver), Some(4), None)).await;
        history.record(record(Some(driver), Some(8), None)).await;
        history.record(record(None, None, Some(DispatchFailureReason::BelowThreshold))).await;
        let mut manual = record(Some(Uuid::new_v4()), Some(6), None);
        manual.method = DispatchMethod::ManualOverride;
        manual.score = None;
        history.record(manual).await;

        let analytics = history.analytics().await;
        assert_eq!(analytics.total_dispatches, 4);
        assert_eq!(analytics.successful, 3);
        assert_eq!(analytics.failed, 1);
        assert_eq!(analytics.manual_overrides, 1);
        assert_eq!(analytics.success_rate, 0.75);
        assert_eq!(analytics.average_eta_minutes, Some(6.0));
        assert_eq!(analytics.failures_by_reason.get("below_threshold"), Some(&1));
        assert_eq!(analytics.by_priority.get("high"), Some(&4));

        assert_eq!(history.driver_etas(driver).await, vec![4.0, 8.0]);
    }
}
