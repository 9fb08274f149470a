// exception.rs - 跨行程錯誤分類
//
// 定義 RPC 兩端共用的錯誤分類，以及由線路上的 `type` 字串重建錯誤時
// 使用的例外登錄表。登錄表於行程啟動時建立一次，之後注入編解碼器使用。

use serde_json::Value;
use std::collections::HashMap;
use std::fmt;
use thiserror::Error;

/// 驗證錯誤在線路上的名稱
pub const VALIDATION_ERROR: &str = "ValidationError";
/// 次要錯誤在線路上的名稱
pub const MINOR_EXCEPTION: &str = "MinorException";
/// 嚴重錯誤在線路上的名稱
pub const CRITICAL_EXCEPTION: &str = "CriticalException";
/// 內部錯誤在線路上的名稱
pub const INTERNAL_ERROR: &str = "InternalError";

/// 通訊層錯誤類型
#[derive(Error, Debug, Clone, PartialEq)]
pub enum Exception {
    /// 業務輸入驗證失敗，永遠是預期中的錯誤
    #[error("Validation error: {message}")]
    Validation {
        message: String,
        details: Option<Value>,
    },

    /// 可恢復的業務錯誤
    #[error("Minor exception: {message}")]
    Minor {
        message: String,
        details: Option<Value>,
    },

    /// 等待回應逾時
    #[error("Response waiting timeout after {waited_ms} ms")]
    Timeout { waited_ms: u64 },

    /// 非預期的失敗
    #[error("Critical exception: {message}")]
    Critical {
        message: String,
        details: Option<Value>,
    },

    /// 不透露任何細節的內部錯誤
    #[error("Internal error")]
    InternalError,
}

impl Exception {
    pub fn validation(message: impl Into<String>) -> Self {
        Exception::Validation {
            message: message.into(),
            details: None,
        }
    }

    pub fn minor(message: impl Into<String>) -> Self {
        Exception::Minor {
            message: message.into(),
            details: None,
        }
    }

    pub fn critical(message: impl Into<String>) -> Self {
        Exception::Critical {
            message: message.into(),
            details: None,
        }
    }

    /// 附加詳細資訊，對 `Timeout` 和 `InternalError` 無效
    pub fn with_details(mut self, value: Value) -> Self {
        match &mut self {
            Exception::Validation { details, .. }
            | Exception::Minor { details, .. }
            | Exception::Critical { details, .. } => *details = Some(value),
            Exception::Timeout { .. } | Exception::InternalError => {}
        }
        self
    }

    /// 取得錯誤分類
    pub fn kind(&self) -> ExceptionKind {
        match self {
            Exception::Validation { .. } => ExceptionKind::Validation,
            Exception::Minor { .. } | Exception::Timeout { .. } => ExceptionKind::Minor,
            Exception::Critical { .. } => ExceptionKind::Critical,
            Exception::InternalError => ExceptionKind::InternalError,
        }
    }

    /// 線路上傳遞的訊息
    pub fn message(&self) -> Option<String> {
        match self {
            Exception::Validation { message, .. }
            | Exception::Minor { message, .. }
            | Exception::Critical { message, .. } => Some(message.clone()),
            Exception::Timeout { .. } => Some(self.to_string()),
            Exception::InternalError => None,
        }
    }

    pub fn details(&self) -> Option<&Value> {
        match self {
            Exception::Validation { details, .. }
            | Exception::Minor { details, .. }
            | Exception::Critical { details, .. } => details.as_ref(),
            Exception::Timeout { .. } | Exception::InternalError => None,
        }
    }

    pub fn is_timeout(&self) -> bool {
        matches!(self, Exception::Timeout { .. })
    }

    /// 呼叫端收到此類錯誤時必須拒絕呼叫，而非回傳失敗回應
    pub fn is_fatal(&self) -> bool {
        matches!(
            self.kind(),
            ExceptionKind::Critical | ExceptionKind::InternalError
        )
    }

    /// 將任意錯誤包裝為嚴重錯誤，已經是 `Exception` 的錯誤原樣返回
    pub fn wrap<E>(error: E, context: &str) -> Self
    where
        E: Into<anyhow::Error>,
    {
        match error.into().downcast::<Exception>() {
            Ok(exception) => exception,
            Err(error) => Exception::critical(format!("{}: {}", context, error)),
        }
    }
}

impl From<lapin::Error> for Exception {
    fn from(error: lapin::Error) -> Self {
        Exception::critical(format!("Message broker error: {}", error))
    }
}

impl From<serde_json::Error> for Exception {
    fn from(error: serde_json::Error) -> Self {
        Exception::critical(format!("Serialization error: {}", error))
    }
}

impl From<reqwest::Error> for Exception {
    fn from(error: reqwest::Error) -> Self {
        Exception::critical(format!("HTTP error: {}", error))
    }
}

/// 通訊層結果類型
pub type RpcResult<T> = Result<T, Exception>;

/// 已知的錯誤分類
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum ExceptionKind {
    Validation,
    Minor,
    Critical,
    InternalError,
}

impl ExceptionKind {
    /// 線路上的 `type` 名稱
    pub fn as_str(&self) -> &'static str {
        match self {
            ExceptionKind::Validation => VALIDATION_ERROR,
            ExceptionKind::Minor => MINOR_EXCEPTION,
            ExceptionKind::Critical => CRITICAL_EXCEPTION,
            ExceptionKind::InternalError => INTERNAL_ERROR,
        }
    }

    /// 依分類建立錯誤實例
    pub fn build(&self, message: Option<String>, details: Option<Value>) -> Exception {
        let message = message.unwrap_or_default();
        match self {
            ExceptionKind::Validation => Exception::Validation { message, details },
            ExceptionKind::Minor => Exception::Minor { message, details },
            ExceptionKind::Critical => Exception::Critical { message, details },
            ExceptionKind::InternalError => Exception::InternalError,
        }
    }
}

impl fmt::Display for ExceptionKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.as_str())
    }
}

/// 例外登錄表，將線路上的 `type` 名稱對應到錯誤分類
#[derive(Debug, Clone, Default)]
pub struct ExceptionRegistry {
    kinds: HashMap<String, ExceptionKind>,
}

impl ExceptionRegistry {
    /// 建立空白登錄表
    pub fn empty() -> Self {
        Self::default()
    }

    /// 建立包含所有標準分類的登錄表
    pub fn standard() -> Self {
        Self::empty()
            .register(VALIDATION_ERROR, ExceptionKind::Validation)
            .register(MINOR_EXCEPTION, ExceptionKind::Minor)
            .register(CRITICAL_EXCEPTION, ExceptionKind::Critical)
            .register(INTERNAL_ERROR, ExceptionKind::InternalError)
    }

    /// 註冊名稱，可用於相容其他服務使用的別名
    pub fn register(mut self, name: &str, kind: ExceptionKind) -> Self {
        self.kinds.insert(name.to_string(), kind);
        self
    }

    pub fn lookup(&self, name: &str) -> Option<ExceptionKind> {
        self.kinds.get(name).copied()
    }

    pub fn len(&self) -> usize {
        self.kinds.len()
    }

    pub fn is_empty(&self) -> bool {
        self.kinds.is_empty()
    }
}
