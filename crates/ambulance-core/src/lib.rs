//! # Ambulance Core
//!
//! 调度系统的核心模块，提供领域数据结构、错误定义、地理计算和通用工具。

pub mod error;
pub mod geo;
pub mod models;
pub mod utils;

pub use error::{DispatchError, Result};
pub use models::*;
