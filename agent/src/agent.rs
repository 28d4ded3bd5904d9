use crate::error::{InvocationError, classify_sdk_error};
use crate::runtime::{AgentRuntime, InvokeRequest, ResponseEvent};
use async_trait::async_trait;
use aws_config::meta::region::RegionProviderChain;
use aws_config::{self, BehaviorVersion};
use aws_sdk_bedrockagentruntime::Client;
use aws_sdk_bedrockagentruntime::types::{GuardrailAction, ResponseStream, Trace};
use aws_smithy_types::error::display::DisplayErrorContext;
use std::fmt;
use std::sync::Arc;

/// プロファイル・リージョンが未指定の場合に使用するリージョン
const DEFAULT_REGION: &str = "us-east-1";

/// 呼び出し対象のエージェントへの参照
///
/// エージェントID・エイリアスIDと、認証情報・リージョンを保持するランタイムの組。
/// 生成後は読み取り専用で、複数のセッション間で共有してよい。
#[derive(Clone)]
pub struct AgentReference {
    agent_id: String,
    agent_alias_id: String,
    runtime: Arc<dyn AgentRuntime>,
}

impl fmt::Debug for AgentReference {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("AgentReference")
            .field("agent_id", &self.agent_id)
            .field("agent_alias_id", &self.agent_alias_id)
            .finish_non_exhaustive()
    }
}

impl AgentReference {
    /// 新しい AgentReference を作成する
    ///
    /// # Arguments
    /// * `agent_id` - エージェントID
    /// * `agent_alias_id` - エージェントエイリアスID
    /// * `runtime` - 呼び出しに使用するランタイム
    ///
    /// # Errors
    /// いずれかのIDが空の場合は `InvocationError::Configuration`
    pub fn new(
        agent_id: impl Into<String>,
        agent_alias_id: impl Into<String>,
        runtime: Arc<dyn AgentRuntime>,
    ) -> Result<Self, InvocationError> {
        let agent_id = agent_id.into().trim().to_string();
        let agent_alias_id = agent_alias_id.into().trim().to_string();

        if agent_id.is_empty() {
            return Err(InvocationError::Configuration(
                "agent ID is missing".to_string(),
            ));
        }
        if agent_alias_id.is_empty() {
            return Err(InvocationError::Configuration(
                "agent alias ID is missing".to_string(),
            ));
        }

        Ok(Self {
            agent_id,
            agent_alias_id,
            runtime,
        })
    }

    pub fn agent_id(&self) -> &str {
        &self.agent_id
    }

    pub fn agent_alias_id(&self) -> &str {
        &self.agent_alias_id
    }

    pub(crate) fn runtime(&self) -> &dyn AgentRuntime {
        self.runtime.as_ref()
    }
}

/// AWS Bedrock Agent Runtime を使用するランタイム
///
/// SDKクライアントを保持する。クライアントは内部で共有されるため、
/// `Arc` で包んで複数のセッションから利用できる。
pub struct BedrockAgentRuntime {
    client: Client,
}

impl BedrockAgentRuntime {
    /// 新しい BedrockAgentRuntime を作成する
    ///
    /// # Arguments
    /// * `profile` - 使用する AWS プロファイル名（オプション）
    /// * `region` - リージョン（オプション）。指定しない場合はデフォルトプロファイルの設定またはus-east-1を使用
    pub async fn new(profile: Option<String>, region: Option<String>) -> Self {
        let region_provider = RegionProviderChain::first_try(region.map(aws_config::Region::new))
            .or_default_provider()
            .or_else(aws_config::Region::new(DEFAULT_REGION));

        let mut loader = aws_config::defaults(BehaviorVersion::latest()).region(region_provider);
        if let Some(profile) = &profile {
            loader = loader.profile_name(profile);
        }
        let config = loader.load().await;

        tracing::debug!(
            profile = profile.as_deref().unwrap_or("default"),
            region = ?config.region(),
            "Created Bedrock agent runtime client"
        );

        Self {
            client: Client::new(&config),
        }
    }
}

#[async_trait]
impl AgentRuntime for BedrockAgentRuntime {
    async fn invoke(&self, request: InvokeRequest) -> Result<Vec<ResponseEvent>, InvocationError> {
        let output = self
            .client
            .invoke_agent()
            .agent_id(request.agent_id)
            .agent_alias_id(request.agent_alias_id)
            .session_id(request.session_id)
            .input_text(request.input_text)
            .end_session(request.end_session)
            .enable_trace(request.enable_trace)
            .set_memory_id(request.memory_id)
            .send()
            .await
            .map_err(|e| {
                tracing::debug!(error = %DisplayErrorContext(&e), "InvokeAgent call failed");
                classify_sdk_error(&e)
            })?;

        let mut stream = output.completion;
        let mut events = Vec::new();

        // ストリーム受信ループ
        loop {
            match stream.recv().await {
                Ok(Some(event)) => {
                    if let Some(event) = normalize_event(event) {
                        events.push(event);
                    }
                }
                Ok(None) => break,
                Err(e) => {
                    tracing::debug!(error = %DisplayErrorContext(&e), "Completion stream failed");
                    return Err(classify_sdk_error(&e));
                }
            }
        }

        Ok(events)
    }
}

/// SDKのストリームイベントを ResponseEvent に変換する
///
/// デコードできないチャンクや想定外のイベントはログに記録して読み飛ばす。
fn normalize_event(event: ResponseStream) -> Option<ResponseEvent> {
    match event {
        ResponseStream::Chunk(part) => {
            let Some(bytes) = part.bytes() else {
                tracing::warn!("Received chunk without bytes");
                return None;
            };
            match std::str::from_utf8(bytes.as_ref()) {
                Ok(text) => Some(ResponseEvent::Chunk(text.to_string())),
                Err(e) => {
                    tracing::error!(error = %e, "Failed to decode response bytes");
                    None
                }
            }
        }
        ResponseStream::Trace(part) => match part.trace() {
            Some(Trace::GuardrailTrace(guardrail))
                if matches!(guardrail.action(), Some(GuardrailAction::Intervened)) =>
            {
                Some(ResponseEvent::GuardrailIntervened)
            }
            Some(trace) => Some(ResponseEvent::Trace(format!("{:?}", trace))),
            None => None,
        },
        other => {
            tracing::warn!(event = ?other, "Unexpected event type");
            None
        }
    }
}
