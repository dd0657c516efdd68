//! 候选司机多因子评分

use crate::triage::specialization_score;
use ambulance_core::{Booking, DriverCandidate, Priority, VehicleClass};
use serde::{Deserialize, Serialize};

/// 六项评分因子的权重，每行之和为1.0
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct ScoreWeights {
    pub distance: f64,
    pub availability: f64,
    pub rating: f64,
    pub vehicle_match: f64,
    pub response_time: f64,
    pub specialization: f64,
}

impl ScoreWeights {
    pub fn sum(&self) -> f64 {
        self.distance
            + self.availability
            + self.rating
            + self.vehicle_match
            + self.response_time
            + self.specialization
    }
}

/// 单个优先级的派车参数
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct PriorityProfile {
    /// 检索半径（公里）
    pub search_radius_km: f64,
    /// 最低接受分数，须严格大于该值
    pub min_score: f64,
    pub weights: ScoreWeights,
}

/// 各优先级的派车参数表
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ScoringProfiles {
    pub critical: PriorityProfile,
    pub high: PriorityProfile,
    pub medium: PriorityProfile,
    pub low: PriorityProfile,
}

impl Default for ScoringProfiles {
    fn default() -> Self {
        Self {
            critical: PriorityProfile {
                search_radius_km: 50.0,
                min_score: 0.3,
                weights: ScoreWeights {
                    distance: 0.35,
                    availability: 0.10,
                    rating: 0.05,
                    vehicle_match: 0.15,
                    response_time: 0.25,
                    specialization: 0.10,
                },
            },
            high: PriorityProfile {
                search_radius_km: 30.0,
                min_score: 0.4,
                weights: ScoreWeights {
                    distance: 0.30,
                    availability: 0.10,
                    rating: 0.10,
                    vehicle_match: 0.20,
                    response_time: 0.20,
                    specialization: 0.10,
                },
            },
            medium: PriorityProfile {
                search_radius_km: 20.0,
                min_score: 0.5,
                weights: ScoreWeights {
                    distance: 0.25,
                    availability: 0.10,
                    rating: 0.20,
                    vehicle_match: 0.20,
                    response_time: 0.15,
                    specialization: 0.10,
                },
            },
            low: PriorityProfile {
                search_radius_km: 15.0,
                min_score: 0.6,
                weights: ScoreWeights {
                    distance: 0.20,
                    availability: 0.10,
                    rating: 0.30,
                    vehicle_match: 0.20,
                    response_time: 0.10,
                    specialization: 0.10,
                },
            },
        }
    }
}

impl ScoringProfiles {
    pub fn for_priority(&self, priority: Priority) -> &PriorityProfile {
        match priority {
            Priority::Critical => &self.critical,
            Priority::High => &self.high,
            Priority::Medium => &self.medium,
            Priority::Low => &self.low,
        }
    }

    pub fn iter(&self) -> impl Iterator<Item = (Priority, &PriorityProfile)> {
        Priority::ALL.into_iter().map(move |p| (p, self.for_priority(p)))
    }
}

/// 各因子得分
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct FactorScores {
    pub distance: f64,
    pub availability: f64,
    pub rating: f64,
    pub vehicle_match: f64,
    pub response_time: f64,
    pub specialization: f64,
}

impl FactorScores {
    /// 加权求和并截断到 [0, 1]
    pub fn weighted(&self, weights: &ScoreWeights) -> f64 {
        let total = self.distance * weights.distance
            + self.availability * weights.availability
            + self.rating * weights.rating
            + self.vehicle_match * weights.vehicle_match
            + self.response_time * weights.response_time
            + self.specialization * weights.specialization;
        clamp_unit(total)
    }
}

/// 候选司机评分结果
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct CandidateScore {
    pub candidate: DriverCandidate,
    pub factors: FactorScores,
    pub score: f64,
}

/// NaN 视为0
fn clamp_unit(value: f64) -> f64 {
    if value.is_nan() {
        0.0
    } else {
        value.clamp(0.0, 1.0)
    }
}

pub fn distance_factor(distance_km: f64, radius_km: f64, priority: Priority) -> f64 {
    if radius_km <= 0.0 {
        return 0.0;
    }
    let linear = clamp_unit(1.0 - distance_km / radius_km);
    if priority == Priority::Critical {
        linear * linear
    } else {
        linear
    }
}

pub fn availability_factor(available: bool) -> f64 {
    if available {
        1.0
    } else {
        0.0
    }
}

/// 评分按0-5分制归一化
pub fn rating_factor(rating: Option<f64>) -> f64 {
    match rating {
        Some(r) if r.is_finite() => clamp_unit(r / 5.0),
        _ => 0.5,
    }
}

pub fn vehicle_match_factor(required: VehicleClass, offered: VehicleClass) -> f64 {
    if required == offered {
        1.0
    } else if offered.capability_rank() > required.capability_rank() {
        0.8
    } else {
        0.3
    }
}

/// 平均响应时间相对理想值的比例，无历史数据时为0.7
pub fn response_time_factor(samples: &[f64], ideal_minutes: f64) -> f64 {
    let valid: Vec<f64> = samples.iter().copied().filter(|s| s.is_finite() && *s >= 0.0).collect();
    if valid.is_empty() {
        return 0.7;
    }
    let average = valid.iter().sum::<f64>() / valid.len() as f64;
    if average <= 0.0 {
        return 1.0;
    }
    clamp_unit(ideal_minutes / average)
}

/// 为单个候选司机打分
pub fn score_candidate(
    candidate: &DriverCandidate,
    booking: &Booking,
    profile: &PriorityProfile,
    history_etas: &[f64],
    ideal_response_minutes: f64,
) -> CandidateScore {
    let mut samples = candidate.response_times_minutes.clone();
    samples.extend_from_slice(history_etas);

    let factors = FactorScores {
        distance: distance_factor(candidate.distance_km, profile.search_radius_km, booking.priority),
        availability: availability_factor(candidate.available),
        rating: rating_factor(candidate.rating),
        vehicle_match: vehicle_match_factor(booking.requirements.vehicle_class, candidate.vehicle_class),
        response_time: response_time_factor(&samples, ideal_response_minutes),
        specialization: specialization_score(&booking.patient.clinical_text(), candidate.vehicle_class),
    };

    CandidateScore {
        candidate: candidate.clone(),
        factors,
        score: factors.weighted(&profile.weights),
    }
}

/// 排序：可用司机在前，其次按分数降序，分数相同时距离近者优先
pub fn rank(scores: &mut [CandidateScore]) {
    scores.sort_by(|a, b| {
        b.candidate
            .available
            .cmp(&a.candidate.available)
            .then_with(|| b.score.total_cmp(&a.score))
            .then_with(|| a.candidate.distance_km.total_cmp(&b.candidate.distance_km))
    });
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::test_support::sample_booking;
    use ambulance_core::GeoPoint;
    use uuid::Uuid;

    fn candidate(distance_km: f64, available: bool, class: VehicleClass) -> DriverCandidate {
        DriverCandidate {
            driver_id: Uuid::new_v4(),
            location: GeoPoint::new(28.6, 77.2),
            vehicle_class: class,
            distance_km,
            available,
            rating: Some(4.0),
            response_times_minutes: vec![],
        }
    }

    #[test]
    fn test_weight_rows_sum_to_one() {
        for (_, profile) in ScoringProfiles::default().iter() {
            assert!((profile.weights.sum() - 1.0).abs() < 1e-9);
        }
    }

    #[test]
    fn test_distance_factor_sharper_for_critical() {
        assert_eq!(distance_factor(0.0, 20.0, Priority::Medium), 1.0);
        assert!((distance_factor(10.0, 20.0, Priority::Medium) - 0.5).abs() < 1e-9);
        assert!((distance_factor(25.0, 50.0, Priority::Critical) - 0.25).abs() < 1e-9);
        assert_eq!(distance_factor(80.0, 20.0, Priority::Low), 0.0);
    }

    #[test]
    fn test_vehicle_match() {
        assert_eq!(vehicle_match_factor(VehicleClass::Advanced, VehicleClass::Advanced), 1.0);
        assert_eq!(vehicle_match_factor(VehicleClass::Advanced, VehicleClass::Icu), 0.8);
        assert_eq!(vehicle_match_factor(VehicleClass::Icu, VehicleClass::Basic), 0.3);
        assert_eq!(vehicle_match_factor(VehicleClass::Cardiac, VehicleClass::Neonatal), 0.3);
    }

    #[test]
    fn test_response_and_rating_defaults() {
        assert_eq!(response_time_factor(&[], 8.0), 0.7);
        assert_eq!(response_time_factor(&[4.0, 6.0], 8.0), 1.0);
        assert!((response_time_factor(&[16.0], 8.0) - 0.5).abs() < 1e-9);
        assert_eq!(rating_factor(None), 0.5);
        assert_eq!(rating_factor(Some(5.0)), 1.0);
        assert_eq!(rating_factor(Some(9.0)), 1.0);
    }

    #[test]
    fn test_scores_are_clamped() {
        let booking = sample_booking(Priority::High);
        let profile = ScoringProfiles::default().high;

        let mut wild = candidate(-100.0, true, VehicleClass::Basic);
        wild.rating = Some(1e9);
        wild.response_times_minutes = vec![-5.0, f64::NAN];
        let score = score_candidate(&wild, &booking, &profile, &[], 8.0);
        assert!((0.0..=1.0).contains(&score.score));

        let heavy = PriorityProfile {
            weights: ScoreWeights {
                distance: 5.0,
                availability: 5.0,
                rating: 5.0,
                vehicle_match: 5.0,
                response_time: 5.0,
                specialization: 5.0,
            },
            ..profile
        };
        let score = score_candidate(&candidate(1.0, true, VehicleClass::Basic), &booking, &heavy, &[], 8.0);
        assert_eq!(score.score, 1.0);
    }

    #[test]
    fn test_unavailable_never_ranks_first() {
        let booking = sample_booking(Priority::Medium);
        let profile = ScoringProfiles::default().medium;

        let mut scores = vec![
            score_candidate(&candidate(0.1, false, VehicleClass::Basic), &booking, &profile, &[], 8.0),
            score_candidate(&candidate(15.0, true, VehicleClass::Basic), &booking, &profile, &[], 8.0),
        ];
        rank(&mut scores);
        assert!(scores[0].candidate.available);
        assert!(!scores[1].candidate.available);
    }
}
