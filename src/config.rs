/// 配置管理模組
///
/// 負責載入與驗證通訊層配置：服務名稱、日誌、訊息代理連線與 RPC 參數。
/// 支持從開發與生產兩種環境中加載不同的配置，環境變數可覆蓋文件中的值。
// 宣告子模組
pub mod loader;
pub mod types;
pub mod validation;

// 重新導出常用組件
pub use loader::{ConfigExt, ConfigLoader, Environment, ENV_PREFIX, ENV_VAR};
pub use types::*;
pub use validation::{ValidationError, ValidationUtils, Validator};
