use crate::error::InvocationError;
use async_trait::async_trait;

/// エージェント呼び出しのリクエスト
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct InvokeRequest {
    pub agent_id: String,
    pub agent_alias_id: String,
    pub session_id: String,
    pub input_text: String,
    /// セッション終了の通知かどうか
    pub end_session: bool,
    pub enable_trace: bool,
    pub memory_id: Option<String>,
}

/// 正規化済みのレスポンスイベント
///
/// SDKが返す異種のストリームイベントは、この型に変換してから
/// セッションクライアントに渡される。
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ResponseEvent {
    /// UTF-8にデコード済みのテキストチャンク
    Chunk(String),
    /// トレース情報
    Trace(String),
    /// ガードレールによる介入
    GuardrailIntervened,
}

/// リモートのエージェントを呼び出すランタイム
///
/// 1回の `invoke` はリモートへの1回の呼び出しに対応する。
/// 失敗はすべて `InvocationError` のいずれかに分類して返すこと。
#[async_trait]
pub trait AgentRuntime: Send + Sync {
    /// エージェントを呼び出し、受信したイベントを到着順に返す
    async fn invoke(&self, request: InvokeRequest) -> Result<Vec<ResponseEvent>, InvocationError>;
}
