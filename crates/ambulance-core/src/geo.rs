//! 地理计算工具
//!
//! 球面距离与线性ETA估算，无外部依赖。

use crate::error::{DispatchError, Result};
use crate::models::GeoPoint;

/// 地球平均半径（公里）
pub const EARTH_RADIUS_KM: f64 = 6371.0;

/// 默认平均车速（公里/小时）
pub const DEFAULT_AVG_SPEED_KMH: f64 = 40.0;

/// Haversine 球面距离（公里）
pub fn haversine_km(a: &GeoPoint, b: &GeoPoint) -> f64 {
    let (lat1, lon1) = (a.latitude.to_radians(), a.longitude.to_radians());
    let (lat2, lon2) = (b.latitude.to_radians(), b.longitude.to_radians());
    let dlat = lat2 - lat1;
    let dlon = lon2 - lon1;
    let sin_dlat = (dlat * 0.5).sin();
    let sin_dlon = (dlon * 0.5).sin();
    let h = sin_dlat * sin_dlat + lat1.cos() * lat2.cos() * sin_dlon * sin_dlon;
    let c = 2.0 * h.sqrt().atan2((1.0 - h).sqrt());
    EARTH_RADIUS_KM * c
}

/// 按平均车速估算到达时间（分钟，向上取整，至少1分钟）
pub fn estimate_eta_minutes(distance_km: f64, avg_speed_kmh: f64) -> u32 {
    if distance_km <= 0.0 || avg_speed_kmh <= 0.0 {
        return 1;
    }
    let minutes = (distance_km / avg_speed_kmh * 60.0).ceil();
    minutes.max(1.0) as u32
}

/// 两点间的ETA
pub fn eta_between(from: &GeoPoint, to: &GeoPoint, avg_speed_kmh: f64) -> u32 {
    estimate_eta_minutes(haversine_km(from, to), avg_speed_kmh)
}

/// 坐标是否合法：有限数值且在经纬度范围内
pub fn is_valid_point(point: &GeoPoint) -> bool {
    point.latitude.is_finite()
        && point.longitude.is_finite()
        && (-90.0..=90.0).contains(&point.latitude)
        && (-180.0..=180.0).contains(&point.longitude)
}

/// 校验坐标，失败时返回 `InvalidLocation`
pub fn validate_point(point: &GeoPoint, label: &str) -> Result<()> {
    if is_valid_point(point) {
        Ok(())
    } else {
        Err(DispatchError::InvalidLocation(format!(
            "{} coordinates out of range: ({}, {})",
            label, point.latitude, point.longitude
        )))
    }
}
