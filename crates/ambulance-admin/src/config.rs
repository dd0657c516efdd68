//! 配置管理
//!
//! 从TOML文件与环境变量加载调度系统配置，校验后按模块分发

use ambulance_workflow::{
    CenterSettings, DispatchSettings, FarePolicy, FleetDriver, LifecycleSettings, NotificationSettings,
};
use anyhow::{Context, Result};
use config::{Config, Environment, File};
use serde::{Deserialize, Serialize};
use std::sync::Arc;
use tokio::sync::RwLock;
use tracing::{debug, error, info};

/// 环境变量前缀，例如 `AMBULANCE__DISPATCH__MAX_CANDIDATES=5`
pub const ENV_PREFIX: &str = "AMBULANCE";

/// 配置管理器
#[derive(Debug)]
pub struct ConfigManager {
    /// 配置数据
    config: Arc<RwLock<AmbulanceConfig>>,
    /// 配置文件路径，未指定时只使用默认值与环境变量
    config_path: Option<String>,
    /// 配置验证器
    validator: ConfigValidator,
}

/// 调度系统完整配置
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct AmbulanceConfig {
    /// 计费策略
    #[serde(default)]
    pub fare: FarePolicy,
    /// 派车参数
    #[serde(default)]
    pub dispatch: DispatchSettings,
    /// 生命周期参数
    #[serde(default)]
    pub lifecycle: LifecycleSettings,
    /// 通知参数
    #[serde(default)]
    pub notification: NotificationSettings,
    /// 日志配置
    #[serde(default)]
    pub logging: LoggingConfig,
    /// 内存车队的初始车辆
    #[serde(default)]
    pub fleet: Vec<FleetDriver>,
}

impl AmbulanceConfig {
    /// 调度中心所需的配置
    pub fn center_settings(&self) -> CenterSettings {
        CenterSettings {
            fare: self.fare.clone(),
            dispatch: self.dispatch.clone(),
            lifecycle: self.lifecycle.clone(),
            notification: self.notification.clone(),
        }
    }
}

/// 日志输出格式
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum LogFormat {
    #[default]
    Full,
    Compact,
    Pretty,
}

/// 日志配置
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct LoggingConfig {
    /// 日志级别或过滤指令，`RUST_LOG` 优先
    pub level: String,
    /// 日志格式
    pub format: LogFormat,
    /// 是否输出模块路径
    pub with_target: bool,
}

impl Default for LoggingConfig {
    fn default() -> Self {
        Self {
            level: "info".to_string(),
            format: LogFormat::Full,
            with_target: true,
        }
    }
}

/// 配置验证器
#[derive(Debug)]
pub struct ConfigValidator {
    /// 验证规则
    validation_rules: Vec<ValidationRule>,
}

/// 验证规则
#[derive(Debug)]
struct ValidationRule {
    /// 字段路径
    field_path: &'static str,
    /// 验证函数
    validator: fn(&AmbulanceConfig) -> Result<()>,
}

impl ConfigManager {
    /// 加载配置文件（可选）与环境变量并校验
    pub fn new(config_path: Option<&str>) -> Result<Self> {
        let config = Self::load_config(config_path)?;
        Self::with_config(config, config_path.map(str::to_string))
    }

    /// 使用已有配置创建
    pub fn with_config(config: AmbulanceConfig, config_path: Option<String>) -> Result<Self> {
        let validator = ConfigValidator::new();
        validator.validate(&config)?;

        Ok(Self {
            config: Arc::new(RwLock::new(config)),
            config_path,
            validator,
        })
    }

    /// 默认值 < 配置文件 < 环境变量
    fn load_config(config_path: Option<&str>) -> Result<AmbulanceConfig> {
        let defaults = Config::try_from(&AmbulanceConfig::default())
            .context("Failed to build default configuration")?;

        let mut builder = Config::builder().add_source(defaults);
        if let Some(path) = config_path {
            builder = builder.add_source(File::with_name(path).required(true));
        }
        let settings = builder
            .add_source(
                Environment::with_prefix(ENV_PREFIX)
                    .separator("__")
                    .try_parsing(true),
            )
            .build()
            .context("Failed to load configuration sources")?;

        let config: AmbulanceConfig = settings
            .try_deserialize()
            .context("Failed to deserialize configuration")?;

        match config_path {
            Some(path) => info!("Configuration loaded from: {}", path),
            None => info!("Configuration loaded from defaults and environment"),
        }
        Ok(config)
    }

    /// 获取配置
    pub async fn get_config(&self) -> AmbulanceConfig {
        self.config.read().await.clone()
    }

    /// 获取调度中心配置
    pub async fn center_settings(&self) -> CenterSettings {
        self.config.read().await.center_settings()
    }

    /// 更新配置，若有配置文件则写回
    pub async fn update_config(&self, new_config: AmbulanceConfig) -> Result<()> {
        self.validator.validate(&new_config)?;

        {
            let mut config = self.config.write().await;
            *config = new_config;
        }

        if self.config_path.is_some() {
            self.save_config().await?;
        }

        info!("Configuration updated successfully");
        Ok(())
    }

    /// 保存配置到文件
    pub async fn save_config(&self) -> Result<()> {
        let path = self
            .config_path
            .as_deref()
            .context("No configuration file path to save to")?;

        let config_str = {
            let config = self.config.read().await;
            toml::to_string_pretty(&*config).context("Failed to serialize configuration")?
        };

        tokio::fs::write(path, config_str)
            .await
            .context("Failed to write configuration file")?;

        info!("Configuration saved to: {}", path);
        Ok(())
    }

    /// 重新加载配置
    pub async fn reload_config(&self) -> Result<()> {
        let new_config = Self::load_config(self.config_path.as_deref())?;
        self.validator.validate(&new_config)?;
        *self.config.write().await = new_config;
        info!("Configuration reloaded");
        Ok(())
    }

    /// 按点分路径读取配置值，例如 `dispatch.profiles.critical.min_score`
    pub async fn get_value<T>(&self, path: &str) -> Result<T>
    where
        T: for<'de> Deserialize<'de>,
    {
        let config_json = {
            let config = self.config.read().await;
            serde_json::to_value(&*config).context("Failed to serialize config to JSON")?
        };

        let value = extract_nested_value(&config_json, path)
            .with_context(|| format!("Configuration path not found: {}", path))?;

        serde_json::from_value(value.clone()).context("Failed to deserialize configuration value")
    }

    /// 按点分路径设置配置值，设置后重新校验，失败时不生效
    pub async fn set_value<T>(&self, path: &str, value: T) -> Result<()>
    where
        T: Serialize,
    {
        let value_json = serde_json::to_value(value).context("Failed to serialize value")?;

        let mut config = self.config.write().await;
        let mut config_json = serde_json::to_value(&*config).context("Failed to serialize config to JSON")?;

        let slot = extract_nested_value_mut(&mut config_json, path)
            .with_context(|| format!("Configuration path not found: {}", path))?;
        *slot = value_json;

        let updated: AmbulanceConfig =
            serde_json::from_value(config_json).context("Value does not fit configuration schema")?;
        self.validator.validate(&updated)?;
        *config = updated;

        info!("Configuration value updated: {}", path);
        Ok(())
    }

    /// 验证当前配置
    pub async fn validate_config(&self) -> Result<()> {
        let config = self.config.read().await;
        self.validator.validate(&config)
    }
}

fn extract_nested_value<'a>(root: &'a serde_json::Value, path: &str) -> Result<&'a serde_json::Value> {
    let mut current = root;
    for part in path.split('.') {
        current = match current {
            serde_json::Value::Object(map) => map
                .get(part)
                .ok_or_else(|| anyhow::anyhow!("Path segment not found: {}", part))?,
            _ => return Err(anyhow::anyhow!("Invalid path at segment: {}", part)),
        };
    }
    Ok(current)
}

fn extract_nested_value_mut<'a>(root: &'a mut serde_json::Value, path: &str) -> Result<&'a mut serde_json::Value> {
    let mut current = root;
    for part in path.split('.') {
        current = match current {
            serde_json::Value::Object(map) => map
                .get_mut(part)
                .ok_or_else(|| anyhow::anyhow!("Path segment not found: {}", part))?,
            _ => return Err(anyhow::anyhow!("Invalid path at segment: {}", part)),
        };
    }
    Ok(current)
}

/// 合法的日志级别
pub fn is_known_level(level: &str) -> bool {
    matches!(
        level.to_ascii_lowercase().as_str(),
        "trace" | "debug" | "info" | "warn" | "error" | "off"
    ) || level.contains('=')
}

impl ConfigValidator {
    /// 创建新的配置验证器
    pub fn new() -> Self {
        let validation_rules = vec![
            ValidationRule {
                field_path: "fare",
                validator: |config| {
                    let fare = &config.fare;
                    if fare.base_fare <= 0.0 || fare.per_km_rate <= 0.0 {
                        anyhow::bail!("base fare and per-km rate must be positive");
                    }
                    if fare.time_charge < 0.0
                        || fare.emergency_surcharge_rate < 0.0
                        || fare.high_priority_surcharge_rate < 0.0
                    {
                        anyhow::bail!("charges and surcharge rates cannot be negative");
                    }
                    if !(0.0..1.0).contains(&fare.tax_rate) {
                        anyhow::bail!("tax rate must be within [0, 1)");
                    }
                    if fare.currency.len() != 3 {
                        anyhow::bail!("currency must be a 3-letter code");
                    }
                    Ok(())
                },
            },
            ValidationRule {
                field_path: "dispatch.profiles",
                validator: |config| {
                    for (priority, profile) in config.dispatch.profiles.iter() {
                        let sum = profile.weights.sum();
                        if (sum - 1.0).abs() > 1e-6 {
                            anyhow::bail!("{} weights sum to {:.4}, expected 1.0", priority.as_str(), sum);
                        }
                        if !(0.0..=1.0).contains(&profile.min_score) {
                            anyhow::bail!("{} threshold must be within [0, 1]", priority.as_str());
                        }
                        if profile.search_radius_km <= 0.0 {
                            anyhow::bail!("{} search radius must be positive", priority.as_str());
                        }
                    }
                    Ok(())
                },
            },
            ValidationRule {
                field_path: "dispatch",
                validator: |config| {
                    let dispatch = &config.dispatch;
                    if dispatch.history_capacity == 0 {
                        anyhow::bail!("history capacity must be greater than 0");
                    }
                    if dispatch.max_candidates == 0 {
                        anyhow::bail!("max candidates must be greater than 0");
                    }
                    if dispatch.ideal_response_minutes <= 0.0 || dispatch.average_speed_kmh <= 0.0 {
                        anyhow::bail!("ideal response time and average speed must be positive");
                    }
                    Ok(())
                },
            },
            ValidationRule {
                field_path: "lifecycle",
                validator: |config| {
                    let prefix = &config.lifecycle.reference_prefix;
                    if prefix.is_empty() || !prefix.chars().all(|c| c.is_ascii_uppercase()) {
                        anyhow::bail!("reference prefix must be uppercase ASCII letters");
                    }
                    if config.lifecycle.average_speed_kmh <= 0.0 {
                        anyhow::bail!("average speed must be positive");
                    }
                    Ok(())
                },
            },
            ValidationRule {
                field_path: "logging.level",
                validator: |config| {
                    if is_known_level(&config.logging.level) {
                        Ok(())
                    } else {
                        anyhow::bail!("unknown log level '{}'", config.logging.level)
                    }
                },
            },
            ValidationRule {
                field_path: "fleet",
                validator: |config| {
                    for driver in &config.fleet {
                        ambulance_core::geo::validate_point(&driver.location, &driver.name)?;
                    }
                    Ok(())
                },
            },
        ];

        Self { validation_rules }
    }

    /// 验证配置
    pub fn validate(&self, config: &AmbulanceConfig) -> Result<()> {
        for rule in &self.validation_rules {
            if let Err(e) = (rule.validator)(config) {
                error!("Configuration validation failed for {}: {}", rule.field_path, e);
                return Err(anyhow::anyhow!("Invalid {}: {}", rule.field_path, e));
            }
        }

        debug!("Configuration validation passed");
        Ok(())
    }
}

impl Default for ConfigValidator {
    fn default() -> Self {
        Self::new()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn temp_path(name: &str) -> String {
        std::env::temp_dir()
            .join(format!("{}-{}.toml", name, uuid::Uuid::new_v4()))
            .to_string_lossy()
            .into_owned()
    }

    #[test]
    fn test_default_config_is_valid() {
        let config = AmbulanceConfig::default();
        assert!(ConfigValidator::new().validate(&config).is_ok());
        assert_eq!(config.center_settings().lifecycle.reference_prefix, "AMB");
    }

    #[test]
    fn test_rejects_unbalanced_weights() {
        let mut config = AmbulanceConfig::default();
        config.dispatch.profiles.low.weights.rating = 0.9;
        let err = ConfigValidator::new().validate(&config).unwrap_err();
        assert!(err.to_string().contains("dispatch.profiles"));

        let mut config = AmbulanceConfig::default();
        config.dispatch.history_capacity = 0;
        assert!(ConfigValidator::new().validate(&config).is_err());

        let mut config = AmbulanceConfig::default();
        config.logging.level = "loud".to_string();
        assert!(ConfigValidator::new().validate(&config).is_err());
    }

    #[tokio::test]
    async fn test_load_from_file_overrides_defaults() {
        let path = temp_path("ambulance-config");
        tokio::fs::write(
            &path,
            r#"
[fare]
base_fare = 750.0

[dispatch]
max_candidates = 5

[dispatch.profiles.critical]
search_radius_km = 60.0

[logging]
format = "compact"
"#,
        )
        .await
        .unwrap();

        let manager = ConfigManager::new(Some(&path)).unwrap();
        let config = manager.get_config().await;
        assert_eq!(config.fare.base_fare, 750.0);
        assert_eq!(config.fare.per_km_rate, 20.0);
        assert_eq!(config.dispatch.max_candidates, 5);
        assert_eq!(config.dispatch.profiles.critical.search_radius_km, 60.0);
        assert_eq!(config.dispatch.profiles.critical.min_score, 0.3);
        assert_eq!(config.logging.format, LogFormat::Compact);

        tokio::fs::remove_file(&path).await.unwrap();
    }

    #[tokio::test]
    async fn test_get_and_set_value() {
        let manager = ConfigManager::with_config(AmbulanceConfig::default(), None).unwrap();

        let threshold: f64 = manager.get_value("dispatch.profiles.high.min_score").await.unwrap();
        assert_eq!(threshold, 0.4);

        manager.set_value("notification.delivery_timeout_ms", 500u64).await.unwrap();
        assert_eq!(manager.get_config().await.notification.delivery_timeout_ms, 500);

        assert!(manager.set_value("dispatch.history_capacity", 0usize).await.is_err());
        assert_eq!(manager.get_config().await.dispatch.history_capacity, 100);
        assert!(manager.get_value::<f64>("dispatch.unknown").await.is_err());
    }

    #[tokio::test]
    async fn test_save_and_reload_round_trip() {
        let path = temp_path("ambulance-saved");
        let mut config = AmbulanceConfig::default();
        config.lifecycle.auto_dispatch_delay_ms = 750;

        let manager = ConfigManager::with_config(config, Some(path.clone())).unwrap();
        manager.save_config().await.unwrap();
        manager.reload_config().await.unwrap();
        assert_eq!(manager.get_config().await.lifecycle.auto_dispatch_delay_ms, 750);

        tokio::fs::remove_file(&path).await.unwrap();
    }
}
