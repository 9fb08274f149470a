use std::net::IpAddr;
use thiserror::Error;

/// 配置驗證錯誤
#[derive(Error, Debug, PartialEq)]
pub enum ValidationError {
    #[error("Missing required configuration: {0}")]
    MissingField(String),

    #[error("Invalid configuration value: {0}")]
    InvalidValue(String),

    #[error("Configuration out of range: {field} = {value}, expected {min}..={max}")]
    RangeError {
        field: String,
        value: String,
        min: String,
        max: String,
    },

    #[error("Configuration dependency error: {dependent} requires {dependency}")]
    DependencyError {
        dependent: String,
        dependency: String,
    },
}

/// 配置驗證器trait
pub trait Validator {
    /// 驗證配置
    fn validate(&self) -> Result<(), ValidationError>;
}

/// 驗證工具函數
pub struct ValidationUtils;

impl ValidationUtils {
    /// 數值須落在 `min..=max`
    pub fn in_range<T>(value: T, min: T, max: T, field_name: &str) -> Result<(), ValidationError>
    where
        T: PartialOrd + ToString,
    {
        if value < min || value > max {
            return Err(ValidationError::RangeError {
                field: field_name.to_string(),
                value: value.to_string(),
                min: min.to_string(),
                max: max.to_string(),
            });
        }
        Ok(())
    }

    /// 不分大小寫比對允許的選項
    pub fn one_of(value: &str, options: &[&str], field_name: &str) -> Result<(), ValidationError> {
        if options.iter().any(|o| o.eq_ignore_ascii_case(value)) {
            return Ok(());
        }
        Err(ValidationError::InvalidValue(format!(
            "{} = {} is not one of {:?}",
            field_name, value, options
        )))
    }

    /// 字串去除空白後不可為空
    pub fn not_empty(value: &str, field_name: &str) -> Result<(), ValidationError> {
        if value.trim().is_empty() {
            return Err(ValidationError::MissingField(field_name.to_string()));
        }
        Ok(())
    }

    /// 設定了 `dependent` 就必須同時設定 `dependency`
    pub fn check_dependency(
        has_dependent: bool,
        has_dependency: bool,
        dependent_name: &str,
        dependency_name: &str,
    ) -> Result<(), ValidationError> {
        if has_dependent && !has_dependency {
            return Err(ValidationError::DependencyError {
                dependent: dependent_name.to_string(),
                dependency: dependency_name.to_string(),
            });
        }
        Ok(())
    }

    /// 交換機與佇列名稱不可含路由萬用字元
    pub fn plain_name(value: &str, field_name: &str) -> Result<(), ValidationError> {
        Self::not_empty(value, field_name)?;
        if value.contains(['*', '#']) {
            return Err(ValidationError::InvalidValue(format!(
                "{} = {} must not contain routing wildcards",
                field_name, value
            )));
        }
        Ok(())
    }

    /// 必須是 IP 位址，伺服器直接以此綁定
    pub fn ip_address(value: &str, field_name: &str) -> Result<(), ValidationError> {
        value.parse::<IpAddr>().map(|_| ()).map_err(|_| {
            ValidationError::InvalidValue(format!("{} = {} is not an IP address", field_name, value))
        })
    }
}
