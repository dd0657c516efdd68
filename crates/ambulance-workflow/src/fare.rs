//! 费用计算
//!
//! 根据距离、请求类型、优先级计算费用明细，以及按取消时状态计算退款。
//! 纯函数式策略：相同输入总是得到相同输出。

use ambulance_core::utils::round_currency;
use ambulance_core::{BookingStatus, FareBreakdown, Payment, PaymentStatus, Priority, RequestType};
use serde::{Deserialize, Serialize};

/// 计费策略
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct FarePolicy {
    /// 货币代码
    pub currency: String,
    /// 货币最小单位位数
    pub minor_unit_digits: u32,
    /// 起步价
    pub base_fare: f64,
    /// 每公里费用
    pub per_km_rate: f64,
    /// 固定时间费
    pub time_charge: f64,
    /// 紧急/危重附加费比例（相对起步价）
    pub emergency_surcharge_rate: f64,
    /// 高优先级附加费比例（相对起步价）
    pub high_priority_surcharge_rate: f64,
    /// 税率
    pub tax_rate: f64,
    /// 无目的地时的默认距离
    pub default_distance_km: f64,
}

impl Default for FarePolicy {
    fn default() -> Self {
        Self {
            currency: "INR".to_string(),
            minor_unit_digits: 2,
            base_fare: 500.0,
            per_km_rate: 20.0,
            time_charge: 100.0,
            emergency_surcharge_rate: 0.5,
            high_priority_surcharge_rate: 0.25,
            tax_rate: 0.18,
            default_distance_km: 10.0,
        }
    }
}

/// 费用计算器
#[derive(Debug, Clone)]
pub struct FareCalculator {
    policy: FarePolicy,
}

impl FareCalculator {
    pub fn new(policy: FarePolicy) -> Self {
        Self { policy }
    }

    pub fn policy(&self) -> &FarePolicy {
        &self.policy
    }

    /// 计算费用明细，总额等于各明细项之和
    pub fn calculate(&self, distance_km: f64, request_type: RequestType, priority: Priority) -> FareBreakdown {
        let p = &self.policy;
        let round = |amount: f64| round_currency(amount, p.minor_unit_digits);
        let distance_km = if distance_km.is_finite() { distance_km.max(0.0) } else { 0.0 };

        let base_fare = round(p.base_fare);
        let distance_charge = round(distance_km * p.per_km_rate);
        let time_charge = round(p.time_charge);

        // 附加费叠加计算，不相乘
        let mut surge_rate = 0.0;
        if request_type == RequestType::Emergency || priority == Priority::Critical {
            surge_rate += p.emergency_surcharge_rate;
        }
        if priority == Priority::High {
            surge_rate += p.high_priority_surcharge_rate;
        }
        let emergency_charge = if surge_rate > 0.0 {
            Some(round(p.base_fare * surge_rate))
        } else {
            None
        };

        let subtotal = base_fare + distance_charge + time_charge + emergency_charge.unwrap_or(0.0);
        let tax = round(subtotal * p.tax_rate);
        let total = round(subtotal + tax);

        FareBreakdown {
            base_fare,
            distance_charge,
            time_charge,
            emergency_charge,
            tax,
            total,
        }
    }

    /// 取消时的退款比例
    pub fn refund_percentage(status: BookingStatus) -> f64 {
        match status {
            BookingStatus::Requested | BookingStatus::Confirmed => 0.95,
            BookingStatus::DriverAssigned => 0.80,
            BookingStatus::DriverEnroute => 0.50,
            _ => 0.0,
        }
    }

    /// 计算退款金额，未支付时为0
    pub fn calculate_refund(&self, payment: &Payment, status: BookingStatus) -> f64 {
        if payment.status != PaymentStatus::Paid {
            return 0.0;
        }
        round_currency(
            payment.amount * Self::refund_percentage(status),
            self.policy.minor_unit_digits,
        )
    }
}

impl Default for FareCalculator {
    fn default() -> Self {
        Self::new(FarePolicy::default())
    }
}
