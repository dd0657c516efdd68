//! 错误定义模块

use thiserror::Error;

/// 调度系统统一错误类型
#[derive(Error, Debug)]
pub enum DispatchError {
    #[error("无效位置: {0}")]
    InvalidLocation(String),

    #[error("未知请求者: {0}")]
    UnknownRequester(String),

    #[error("资源未找到: {0}")]
    NotFound(String),

    #[error("无效状态转换: 从 {from} 到 {to}")]
    IllegalTransition { from: String, to: String },

    #[error("司机不可用: {0}")]
    DriverUnavailable(String),

    #[error("预约已结束: {0}")]
    AlreadyTerminal(String),

    #[error("附近无可用司机: {0}")]
    NoCandidates(String),

    #[error("匹配分数低于阈值: 最佳 {best:.3}, 阈值 {threshold:.3}")]
    BelowThreshold { best: f64, threshold: f64 },

    #[error("上游服务错误: {0}")]
    Upstream(String),

    #[error("验证错误: {0}")]
    Validation(String),

    #[error("配置错误: {0}")]
    Config(String),

    #[error("序列化错误: {0}")]
    Serialization(#[from] serde_json::Error),

    #[error("系统内部错误: {0}")]
    Internal(String),
}

impl DispatchError {
    /// 稳定的错误类别标识，供调用方区分处理
    pub fn kind(&self) -> &'static str {
        match self {
            Self::InvalidLocation(_) => "invalid_location",
            Self::UnknownRequester(_) => "unknown_requester",
            Self::NotFound(_) => "not_found",
            Self::IllegalTransition { .. } => "illegal_transition",
            Self::DriverUnavailable(_) => "driver_unavailable",
            Self::AlreadyTerminal(_) => "already_terminal",
            Self::NoCandidates(_) => "no_candidates",
            Self::BelowThreshold { .. } => "below_threshold",
            Self::Upstream(_) => "upstream_failure",
            Self::Validation(_) => "validation",
            Self::Config(_) => "config",
            Self::Serialization(_) => "serialization",
            Self::Internal(_) => "internal",
        }
    }
}

/// 调度系统统一结果类型
pub type Result<T> = std::result::Result<T, DispatchError>;

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_error_kinds_are_stable() {
        let err = DispatchError::IllegalTransition {
            from: "REQUESTED".to_string(),
            to: "COMPLETED".to_string(),
        };
        assert_eq!(err.kind(), "illegal_transition");
        assert!(err.to_string().contains("REQUESTED"));
        assert!(err.to_string().contains("COMPLETED"));

        assert_eq!(DispatchError::Upstream("store".into()).kind(), "upstream_failure");
    }
}
