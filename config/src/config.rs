/// agent.json設定ファイルの構造体定義
///
/// セットアップ処理が出力するエージェントID・エイリアスID・ロールARNと、
/// セッション実行時の設定（リージョン、タイムアウト等）を読み込みます。
use serde::{Deserialize, Serialize};
use std::path::PathBuf;
use std::time::Duration;

/// デフォルトのタイムアウト（秒）
const DEFAULT_TIMEOUT_SECS: u64 = 60;

/// 設定読み込みのエラー型
#[derive(thiserror::Error, Debug)]
pub enum ConfigError {
    #[error("Failed to read config file {}: {}", .path.display(), .source)]
    Io {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },

    #[error("Failed to parse config file {}: {}", .path.display(), .source)]
    Parse {
        path: PathBuf,
        #[source]
        source: serde_json::Error,
    },

    #[error("Missing required setting: {0}")]
    MissingField(&'static str),

    #[error("Invalid setting {field}: {reason}")]
    InvalidValue {
        field: &'static str,
        reason: &'static str,
    },
}

/// agent.jsonファイルのルート構造
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct AgentConfig {
    /// エージェントID
    #[serde(default)]
    pub agent_id: String,

    /// エージェントエイリアスID
    #[serde(default)]
    pub agent_alias_id: String,

    /// エージェントの実行ロールARN（参照用）
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub role_arn: Option<String>,

    /// エージェントに付与したポリシーARN（参照用）
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub policy_arn: Option<String>,

    /// 長期記憶のメモリID（オプション）
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub memory_id: Option<String>,

    /// リージョン（オプション）
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub region: Option<String>,

    /// AWSプロファイル名（オプション）
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub profile: Option<String>,

    /// 1回の呼び出しのタイムアウト（秒）
    #[serde(default = "default_timeout_secs")]
    pub timeout_secs: u64,

    /// トレース出力を有効にするか
    #[serde(default)]
    pub enable_trace: bool,
}

fn default_timeout_secs() -> u64 {
    DEFAULT_TIMEOUT_SECS
}

impl Default for AgentConfig {
    fn default() -> Self {
        Self {
            agent_id: String::new(),
            agent_alias_id: String::new(),
            role_arn: None,
            policy_arn: None,
            memory_id: None,
            region: None,
            profile: None,
            timeout_secs: DEFAULT_TIMEOUT_SECS,
            enable_trace: false,
        }
    }
}

impl AgentConfig {
    /// agent.jsonファイルを読み込む
    ///
    /// # Arguments
    /// * `path` - agent.jsonファイルのパス
    ///
    /// # Errors
    /// ファイルの読み込みやパースに失敗した場合
    pub fn load_from_file(path: impl Into<PathBuf>) -> Result<Self, ConfigError> {
        let path = path.into();
        let content = std::fs::read_to_string(&path).map_err(|source| ConfigError::Io {
            path: path.clone(),
            source,
        })?;
        let config: AgentConfig =
            serde_json::from_str(&content).map_err(|source| ConfigError::Parse {
                path: path.clone(),
                source,
            })?;
        tracing::debug!(path = %path.display(), "Loaded agent config");
        Ok(config)
    }

    /// デフォルトの設定ファイルパスを取得
    ///
    /// 以下の順序で検索：
    /// 1. `.bedrock/agent.json`
    /// 2. `agent.json`（カレントディレクトリ）
    pub fn default_path() -> Option<PathBuf> {
        [".bedrock/agent.json", "agent.json"]
            .into_iter()
            .map(PathBuf::from)
            .find(|path| path.exists())
    }

    /// デフォルトパスから設定を読み込む
    ///
    /// # Returns
    /// 設定が見つかった場合はSome(config)、見つからない場合はNone
    pub fn load_default() -> Result<Option<Self>, ConfigError> {
        match Self::default_path() {
            Some(path) => Ok(Some(Self::load_from_file(path)?)),
            None => Ok(None),
        }
    }

    /// 必須項目が揃っていて、値が有効かを検証する
    pub fn validate(&self) -> Result<(), ConfigError> {
        if self.agent_id.trim().is_empty() {
            return Err(ConfigError::MissingField("agent_id"));
        }
        if self.agent_alias_id.trim().is_empty() {
            return Err(ConfigError::MissingField("agent_alias_id"));
        }
        if self.timeout_secs == 0 {
            return Err(ConfigError::InvalidValue {
                field: "timeout_secs",
                reason: "must be at least 1 second",
            });
        }
        Ok(())
    }

    pub fn timeout(&self) -> Duration {
        Duration::from_secs(self.timeout_secs)
    }
}
