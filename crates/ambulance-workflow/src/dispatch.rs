//! 派车引擎
//!
//! 检索候选司机、多因子评分、按阈值决定是否派车。
//! 派车失败作为结果返回而不是错误：附近无车是预期内的业务结果。

use crate::collaborators::Geosearch;
use crate::history::{DispatchAnalytics, DispatchFailureReason, DispatchHistory, DispatchMethod, DispatchRecord};
use crate::lifecycle::BookingLifecycleManager;
use crate::notification::{BookingEventType, NotificationFanout};
use crate::scoring::{rank, score_candidate, CandidateScore, FactorScores, ScoringProfiles};
use crate::state_machine::BookingStateMachine;
use ambulance_core::geo::DEFAULT_AVG_SPEED_KMH;
use ambulance_core::{Booking, DispatchError, DriverCandidate, GeoPoint, Priority, Result, VehicleClass};
use chrono::Utc;
use serde::{Deserialize, Serialize};
use serde_json::json;
use std::sync::Arc;
use std::time::Duration;
use tracing::{debug, error, info, warn};
use uuid::Uuid;

/// 派车配置
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct DispatchSettings {
    /// 单次检索的最大候选数
    pub max_candidates: usize,
    /// 检索超时（毫秒），超时视为无候选
    pub search_timeout_ms: u64,
    /// 派车历史容量
    pub history_capacity: usize,
    /// 理想响应时间（分钟）
    pub ideal_response_minutes: f64,
    pub average_speed_kmh: f64,
    /// 失败时返回的备选数量
    pub max_alternatives: usize,
    pub profiles: ScoringProfiles,
}

impl Default for DispatchSettings {
    fn default() -> Self {
        Self {
            max_candidates: 10,
            search_timeout_ms: 5000,
            history_capacity: 100,
            ideal_response_minutes: 8.0,
            average_speed_kmh: DEFAULT_AVG_SPEED_KMH,
            max_alternatives: 3,
            profiles: ScoringProfiles::default(),
        }
    }
}

/// 派车约束
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct DispatchConstraints {
    /// 覆盖预约要求的车辆等级
    pub vehicle_class: Option<VehicleClass>,
    /// 覆盖按优先级确定的检索半径
    pub radius_km: Option<f64>,
    /// 排除的司机（例如已拒单）
    #[serde(default)]
    pub exclude_drivers: Vec<Uuid>,
}

/// 排名中的候选司机
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct RankedCandidate {
    pub driver_id: Uuid,
    pub vehicle_class: VehicleClass,
    pub distance_km: f64,
    pub available: bool,
    pub score: f64,
    pub factors: FactorScores,
}

impl From<&CandidateScore> for RankedCandidate {
    fn from(scored: &CandidateScore) -> Self {
        Self {
            driver_id: scored.candidate.driver_id,
            vehicle_class: scored.candidate.vehicle_class,
            distance_km: scored.candidate.distance_km,
            available: scored.candidate.available,
            score: scored.score,
            factors: scored.factors,
        }
    }
}

/// 派车结果
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct DispatchResult {
    pub booking_id: Uuid,
    pub success: bool,
    pub method: DispatchMethod,
    pub driver_id: Option<Uuid>,
    pub score: Option<f64>,
    pub eta_minutes: Option<u32>,
    pub failure: Option<DispatchFailureReason>,
    pub reason: Option<String>,
    pub alternatives: Vec<RankedCandidate>,
    pub candidates_considered: usize,
}

impl DispatchResult {
    fn failed(
        booking_id: Uuid,
        failure: DispatchFailureReason,
        reason: String,
        alternatives: Vec<RankedCandidate>,
        candidates_considered: usize,
    ) -> Self {
        Self {
            booking_id,
            success: false,
            method: DispatchMethod::Automatic,
            driver_id: None,
            score: None,
            eta_minutes: None,
            failure: Some(failure),
            reason: Some(reason),
            alternatives,
            candidates_considered,
        }
    }
}

/// 派车引擎
pub struct DispatchEngine {
    lifecycle: Arc<BookingLifecycleManager>,
    geosearch: Arc<dyn Geosearch>,
    fanout: Arc<NotificationFanout>,
    state_machine: BookingStateMachine,
    history: DispatchHistory,
    settings: DispatchSettings,
}

impl DispatchEngine {
    pub fn new(
        lifecycle: Arc<BookingLifecycleManager>,
        geosearch: Arc<dyn Geosearch>,
        fanout: Arc<NotificationFanout>,
        settings: DispatchSettings,
    ) -> Self {
        Self {
            lifecycle,
            geosearch,
            fanout,
            state_machine: BookingStateMachine::new(),
            history: DispatchHistory::new(settings.history_capacity),
            settings,
        }
    }

    pub fn settings(&self) -> &DispatchSettings {
        &self.settings
    }

    pub fn lifecycle(&self) -> &Arc<BookingLifecycleManager> {
        &self.lifecycle
    }

    pub fn history(&self) -> &DispatchHistory {
        &self.history
    }

    /// 带超时的检索；超时或出错都视为无结果
    async fn search_once(
        &self,
        point: GeoPoint,
        radius_km: f64,
        vehicle_class: Option<VehicleClass>,
    ) -> Result<Vec<DriverCandidate>> {
        let timeout = Duration::from_millis(self.settings.search_timeout_ms);
        let search = self
            .geosearch
            .nearest_drivers(point, radius_km, self.settings.max_candidates, vehicle_class);

        match tokio::time::timeout(timeout, search).await {
            Ok(result) => result,
            Err(_) => Err(DispatchError::Upstream(format!(
                "geosearch timed out after {} ms",
                self.settings.search_timeout_ms
            ))),
        }
    }

    /// 先按车辆等级检索，失败或为空时退化为不限等级检索
    async fn find_candidates(
        &self,
        point: GeoPoint,
        radius_km: f64,
        vehicle_class: VehicleClass,
    ) -> Vec<DriverCandidate> {
        match self.search_once(point, radius_km, Some(vehicle_class)).await {
            Ok(candidates) if !candidates.is_empty() => return candidates,
            Ok(_) => debug!("No {} vehicles within {} km, widening search", vehicle_class.as_str(), radius_km),
            Err(e) => warn!("Filtered driver search failed, falling back to unfiltered: {}", e),
        }

        match self.search_once(point, radius_km, None).await {
            Ok(candidates) => candidates,
            Err(e) => {
                error!("Driver search failed: {}", e);
                Vec::new()
            }
        }
    }

    /// 自动派车
    pub async fn dispatch(&self, booking_id: Uuid, constraints: DispatchConstraints) -> Result<DispatchResult> {
        let booking = self.lifecycle.get(booking_id).await?;
        self.state_machine.check_assignment(booking.status)?;

        let profile = *self.settings.profiles.for_priority(booking.priority);
        let radius_km = constraints.radius_km.unwrap_or(profile.search_radius_km);
        let vehicle_class = constraints
            .vehicle_class
            .unwrap_or(booking.requirements.vehicle_class);

        let mut candidates = self
            .find_candidates(booking.pickup.coordinates, radius_km, vehicle_class)
            .await;
        candidates.retain(|c| !constraints.exclude_drivers.contains(&c.driver_id));

        if candidates.is_empty() {
            let result = DispatchResult::failed(
                booking_id,
                DispatchFailureReason::NoCandidates,
                format!("No drivers in area within {} km", radius_km),
                Vec::new(),
                0,
            );
            return Ok(self.finish_failed(&booking, result).await);
        }

        let mut scores = Vec::with_capacity(candidates.len());
        for candidate in &candidates {
            let history_etas = self.history.driver_etas(candidate.driver_id).await;
            let scored = score_candidate(
                candidate,
                &booking,
                &profile,
                &history_etas,
                self.settings.ideal_response_minutes,
            );
            debug!(
                "Driver {} scored {:.3} ({:?})",
                scored.candidate.driver_id, scored.score, scored.factors
            );
            scores.push(scored);
        }
        rank(&mut scores);

        let considered = scores.len();
        let alternatives = |skip: usize| -> Vec<RankedCandidate> {
            scores
                .iter()
                .skip(skip)
                .take(self.settings.max_alternatives)
                .map(RankedCandidate::from)
                .collect()
        };

        let best = &scores[0];
        if !best.candidate.available {
            let result = DispatchResult::failed(
                booking_id,
                DispatchFailureReason::NoAvailableDriver,
                format!("All {} drivers in area are busy", considered),
                alternatives(0),
                considered,
            );
            return Ok(self.finish_failed(&booking, result).await);
        }
        if best.score <= profile.min_score {
            let result = DispatchResult::failed(
                booking_id,
                DispatchFailureReason::BelowThreshold,
                DispatchError::BelowThreshold {
                    best: best.score,
                    threshold: profile.min_score,
                }
                .to_string(),
                alternatives(0),
                considered,
            );
            return Ok(self.finish_failed(&booking, result).await);
        }

        // 依次尝试合格候选，处理检索后司机被其他预约占用的情况
        let qualified = scores
            .iter()
            .enumerate()
            .take_while(|(_, s)| s.candidate.available && s.score > profile.min_score);
        let mut last_error = None;

        for (index, scored) in qualified {
            let driver_id = scored.candidate.driver_id;
            let note = format!("Auto-dispatched, score {:.3}", scored.score);

            match self.lifecycle.assign_driver(booking_id, driver_id, Some(note)).await {
                Ok(assigned) => {
                    let eta = assigned.tracking.eta_to_pickup_minutes;
                    self.history
                        .record(DispatchRecord {
                            booking_id,
                            priority: booking.priority,
                            method: DispatchMethod::Automatic,
                            driver_id: Some(driver_id),
                            vehicle_class: Some(scored.candidate.vehicle_class),
                            score: Some(scored.score),
                            eta_minutes: eta,
                            candidates_considered: considered,
                            failure: None,
                            note: None,
                            recorded_at: Utc::now(),
                        })
                        .await;
                    info!(
                        "Dispatched driver {} to booking {} with score {:.3}",
                        driver_id, booking_id, scored.score
                    );
                    return Ok(DispatchResult {
                        booking_id,
                        success: true,
                        method: DispatchMethod::Automatic,
                        driver_id: Some(driver_id),
                        score: Some(scored.score),
                        eta_minutes: eta,
                        failure: None,
                        reason: None,
                        alternatives: alternatives(index + 1),
                        candidates_considered: considered,
                    });
                }
                Err(e @ (DispatchError::DriverUnavailable(_) | DispatchError::NotFound(_))) => {
                    warn!("Driver {} could not take booking {}: {}", driver_id, booking_id, e);
                    last_error = Some(e);
                }
                Err(e @ (DispatchError::AlreadyTerminal(_) | DispatchError::IllegalTransition { .. })) => {
                    // 检索期间预约已被取消或由其他途径派车，无需主管介入
                    info!("Booking {} changed during dispatch, stopping: {}", booking_id, e);
                    return Err(e);
                }
                Err(e) => {
                    last_error = Some(e);
                    break;
                }
            }
        }

        let reason = last_error
            .map(|e| e.to_string())
            .unwrap_or_else(|| "assignment rejected".to_string());
        let result = DispatchResult::failed(
            booking_id,
            DispatchFailureReason::AssignmentRejected,
            reason,
            alternatives(0),
            considered,
        );
        Ok(self.finish_failed(&booking, result).await)
    }

    /// 记录失败并通知主管人工介入
    async fn finish_failed(&self, booking: &Booking, result: DispatchResult) -> DispatchResult {
        let reason = result.reason.clone().unwrap_or_default();
        warn!("Dispatch failed for booking {}: {}", booking.id, reason);

        self.history
            .record(DispatchRecord {
                booking_id: booking.id,
                priority: booking.priority,
                method: DispatchMethod::Automatic,
                driver_id: None,
                vehicle_class: None,
                score: result.alternatives.first().map(|a| a.score),
                eta_minutes: None,
                candidates_considered: result.candidates_considered,
                failure: result.failure,
                note: Some(reason.clone()),
                recorded_at: Utc::now(),
            })
            .await;

        self.fanout
            .on_event(
                BookingEventType::DispatchFailed,
                booking,
                Some(json!({
                    "failure": result.failure,
                    "reason": reason,
                    "alternatives": result.alternatives,
                })),
            )
            .await;
        result
    }

    /// 人工改派：跳过评分，但仍校验司机可用
    pub async fn manual_override(&self, booking_id: Uuid, driver_id: Uuid, reason: &str) -> Result<DispatchResult> {
        if reason.trim().is_empty() {
            return Err(DispatchError::Validation(
                "manual override requires a justification".to_string(),
            ));
        }

        let note = format!("Manual override: {}", reason);
        let booking = match self.lifecycle.assign_driver(booking_id, driver_id, Some(note)).await {
            Ok(booking) => booking,
            Err(e) => {
                warn!("Manual override of booking {} to driver {} rejected: {}", booking_id, driver_id, e);
                if let Ok(booking) = self.lifecycle.get(booking_id).await {
                    self.history
                        .record(DispatchRecord {
                            booking_id,
                            priority: booking.priority,
                            method: DispatchMethod::ManualOverride,
                            driver_id: Some(driver_id),
                            vehicle_class: None,
                            score: None,
                            eta_minutes: None,
                            candidates_considered: 0,
                            failure: Some(DispatchFailureReason::AssignmentRejected),
                            note: Some(format!("{}: {}", reason, e)),
                            recorded_at: Utc::now(),
                        })
                        .await;
                }
                return Err(e);
            }
        };

        let eta = booking.tracking.eta_to_pickup_minutes;
        self.history
            .record(DispatchRecord {
                booking_id,
                priority: booking.priority,
                method: DispatchMethod::ManualOverride,
                driver_id: Some(driver_id),
                vehicle_class: None,
                score: None,
                eta_minutes: eta,
                candidates_considered: 0,
                failure: None,
                note: Some(reason.to_string()),
                recorded_at: Utc::now(),
            })
            .await;
        info!("Manual override assigned driver {} to booking {}: {}", driver_id, booking_id, reason);

        Ok(DispatchResult {
            booking_id,
            success: true,
            method: DispatchMethod::ManualOverride,
            driver_id: Some(driver_id),
            score: None,
            eta_minutes: eta,
            failure: None,
            reason: Some(reason.to_string()),
            alternatives: Vec::new(),
            candidates_considered: 0,
        })
    }

    pub async fn analytics(&self) -> DispatchAnalytics {
        self.history.analytics().await
    }

    /// 某优先级的最低接受分数
    pub fn threshold_for(&self, priority: Priority) -> f64 {
        self.settings.profiles.for_priority(priority).min_score
    }
}
