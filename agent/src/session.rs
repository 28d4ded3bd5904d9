use crate::agent::AgentReference;
use crate::error::InvocationError;
use crate::runtime::{InvokeRequest, ResponseEvent};
use std::future::Future;
use std::time::Duration;

/// 1回の呼び出しのデフォルトタイムアウト
pub const DEFAULT_TIMEOUT: Duration = Duration::from_secs(60);

/// サービスが受け付ける入力テキストの最大文字数
pub const MAX_INPUT_CHARS: usize = 25_000;

/// セッション終了時に送信するテキスト
const END_SESSION_TEXT: &str = "Goodbye";

/// セッションの状態
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SessionState {
    Open,
    Closed,
}

/// `send_cancellable` の結果
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum TurnOutcome {
    /// 呼び出しが完了した（成功または分類済みのエラー）
    Completed(Result<String, InvocationError>),
    /// 完了前にキャンセルされ、セッションは終了済み
    Cancelled,
}

/// セッションクライアント構造体
///
/// 1つの会話セッションについて、リモートのエージェントとの通信をすべて仲介する。
/// `send` は `&mut self` を取るため、同一セッションで同時に進行するターンは常に1つ。
/// 会話の記憶はリモート側が保持し、このクライアントは入出力のテキストのみを扱う。
pub struct SessionClient {
    agent: AgentReference,
    session_id: String,
    state: SessionState,
    timeout: Duration,
    enable_trace: bool,
    memory_id: Option<String>,
}

impl Drop for SessionClient {
    fn drop(&mut self) {
        // end()は非同期メソッドだが、Dropは同期的なため、
        // ここではリモートのセッションが残ることをログに記録するだけにする
        if self.state == SessionState::Open {
            tracing::warn!(
                session_id = %self.session_id,
                "SessionClient dropped while open. Consider calling end() before dropping."
            );
        }
    }
}

impl SessionClient {
    /// 新しいセッションを作成する
    ///
    /// セッションIDはランダムに生成する。リモートのセッションは最初の `send` で作成される。
    pub fn new(agent: AgentReference) -> Self {
        let session_id = uuid::Uuid::new_v4().to_string();
        Self::build(agent, session_id)
    }

    /// 指定したセッションIDでセッションを作成する
    ///
    /// # Errors
    /// セッションIDがサービスの制約（2〜100文字の `[0-9a-zA-Z._:-]`）を満たさない場合
    pub fn with_session_id(
        agent: AgentReference,
        session_id: impl Into<String>,
    ) -> Result<Self, InvocationError> {
        let session_id = session_id.into();
        validate_session_id(&session_id)?;
        Ok(Self::build(agent, session_id))
    }

    fn build(agent: AgentReference, session_id: String) -> Self {
        tracing::info!(
            session_id = %session_id,
            agent_id = %agent.agent_id(),
            agent_alias_id = %agent.agent_alias_id(),
            "Starting new session"
        );
        Self {
            agent,
            session_id,
            state: SessionState::Open,
            timeout: DEFAULT_TIMEOUT,
            enable_trace: false,
            memory_id: None,
        }
    }

    /// 1回の呼び出しのタイムアウトを設定する
    pub fn with_timeout(mut self, timeout: Duration) -> Self {
        self.timeout = timeout;
        self
    }

    /// 受信したトレース情報をログに出力する
    pub fn with_trace(mut self, enable_trace: bool) -> Self {
        self.enable_trace = enable_trace;
        self
    }

    /// 長期記憶のメモリIDを設定する
    pub fn with_memory_id(mut self, memory_id: impl Into<String>) -> Self {
        self.memory_id = Some(memory_id.into());
        self
    }

    pub fn session_id(&self) -> &str {
        &self.session_id
    }

    pub fn agent(&self) -> &AgentReference {
        &self.agent
    }

    pub fn state(&self) -> SessionState {
        self.state
    }

    pub fn is_open(&self) -> bool {
        self.state == SessionState::Open
    }

    /// ユーザーの発話を送信し、エージェントの応答テキストを返す
    ///
    /// # Arguments
    /// * `utterance` - ユーザーの入力テキスト
    ///
    /// # Returns
    /// * `Ok(String)` - 受信したチャンクを到着順に連結したテキスト（空の場合もある）
    /// * `Err(InvocationError)` - 分類済みのエラー
    ///
    /// # Note
    /// 終了済みのセッション・空の入力ではリモートへの呼び出しを行わない。
    /// 再試行は行わない。`Transient` の場合に再送するかは呼び出し元が判断する。
    pub async fn send(&mut self, utterance: &str) -> Result<String, InvocationError> {
        if self.state == SessionState::Closed {
            return Err(InvocationError::SessionClosed);
        }

        let input = utterance.trim();
        if input.is_empty() {
            return Err(InvocationError::InvalidInput(
                "utterance is empty".to_string(),
            ));
        }
        let chars = input.chars().count();
        if chars > MAX_INPUT_CHARS {
            return Err(InvocationError::InvalidInput(format!(
                "utterance is {} characters long (limit {})",
                chars, MAX_INPUT_CHARS
            )));
        }

        let request = self.request(input.to_string(), false);
        let events = self.invoke_with_timeout(request).await?;
        self.collect_response(events)
    }

    /// 発話を送信し、`cancel` が先に完了した場合は呼び出しを中断してセッションを終了する
    ///
    /// # Arguments
    /// * `utterance` - ユーザーの入力テキスト
    /// * `cancel` - 完了するとキャンセルとみなす Future（例: CTRL-C のシグナル待ち）
    pub async fn send_cancellable<F>(&mut self, utterance: &str, cancel: F) -> TurnOutcome
    where
        F: Future<Output = ()>,
    {
        let result = tokio::select! {
            result = self.send(utterance) => Some(result),
            _ = cancel => None,
        };

        match result {
            Some(result) => TurnOutcome::Completed(result),
            None => {
                tracing::info!(session_id = %self.session_id, "Turn cancelled by caller");
                self.end().await;
                TurnOutcome::Cancelled
            }
        }
    }

    /// セッションを終了する
    ///
    /// 冪等であり、終了済みの場合は何もしない。リモートへの終了通知は
    /// ベストエフォートで送信し、失敗してもログに記録するだけでエラーは返さない。
    pub async fn end(&mut self) {
        if self.state == SessionState::Closed {
            return;
        }
        self.state = SessionState::Closed;

        tracing::info!(session_id = %self.session_id, "Ending session");
        let request = self.request(END_SESSION_TEXT.to_string(), true);
        match self.invoke_with_timeout(request).await {
            Ok(_) => tracing::info!(session_id = %self.session_id, "Session ended successfully"),
            Err(e) => tracing::warn!(
                session_id = %self.session_id,
                error = %e,
                "Failed to properly end session"
            ),
        }
    }

    fn request(&self, input_text: String, end_session: bool) -> InvokeRequest {
        InvokeRequest {
            agent_id: self.agent.agent_id().to_string(),
            agent_alias_id: self.agent.agent_alias_id().to_string(),
            session_id: self.session_id.clone(),
            input_text,
            end_session,
            // ガードレールの介入はトレースイベントでのみ通知される
            enable_trace: true,
            memory_id: self.memory_id.clone(),
        }
    }

    async fn invoke_with_timeout(
        &self,
        request: InvokeRequest,
    ) -> Result<Vec<ResponseEvent>, InvocationError> {
        match tokio::time::timeout(self.timeout, self.agent.runtime().invoke(request)).await {
            Ok(result) => result,
            Err(_) => Err(InvocationError::Transient(format!(
                "no response from agent within {:?}",
                self.timeout
            ))),
        }
    }

    /// イベント列を1つの応答テキストにまとめる
    ///
    /// ガードレールが介入していた場合は、連結したテキストを拒否メッセージとして返す。
    fn collect_response(&self, events: Vec<ResponseEvent>) -> Result<String, InvocationError> {
        let mut text = String::new();
        let mut refused = false;

        for event in events {
            match event {
                ResponseEvent::Chunk(chunk) => text.push_str(&chunk),
                ResponseEvent::Trace(trace) => {
                    if self.enable_trace {
                        tracing::info!(session_id = %self.session_id, trace = %trace, "Trace event");
                    }
                }
                ResponseEvent::GuardrailIntervened => refused = true,
            }
        }

        if refused {
            tracing::info!(session_id = %self.session_id, "Guardrail intervened");
            return Err(InvocationError::RemoteRefusal(text));
        }
        Ok(text)
    }
}

/// セッションIDがサービスの制約を満たすか検証する
fn validate_session_id(session_id: &str) -> Result<(), InvocationError> {
    let len = session_id.len();
    let valid_chars = session_id
        .chars()
        .all(|c| c.is_ascii_alphanumeric() || matches!(c, '.' | '_' | ':' | '-'));

    if !(2..=100).contains(&len) || !valid_chars {
        return Err(InvocationError::Configuration(format!(
            "invalid session ID: {:?}",
            session_id
        )));
    }
    Ok(())
}
