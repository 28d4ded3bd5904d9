use aws_sdk_bedrockagentruntime::error::{ProvideErrorMetadata, SdkError};
use aws_smithy_types::error::display::DisplayErrorContext;

/// セッションクライアントのエラー型
///
/// リモート呼び出しで発生したすべての失敗は、呼び出し元に返す前に
/// このいずれかの種別に分類される。
#[derive(thiserror::Error, Debug, Clone, PartialEq, Eq)]
pub enum InvocationError {
    #[error("Invalid input: {0}")]
    InvalidInput(String),

    #[error("Session is already closed")]
    SessionClosed,

    #[error("Transient error: {0}")]
    Transient(String),

    #[error("Configuration error: {0}")]
    Configuration(String),

    #[error("Request refused by agent: {0}")]
    RemoteRefusal(String),
}

impl InvocationError {
    /// 同じ入力で再送してよいエラーかどうか
    pub fn is_retryable(&self) -> bool {
        matches!(self, Self::Transient(_))
    }

    /// セッションを継続できないエラーかどうか
    pub fn is_fatal(&self) -> bool {
        matches!(self, Self::Configuration(_))
    }
}

/// サービスのエラーコードから分類する
///
/// コードが未知の場合は再試行可能なエラーとして扱う。
pub fn classify_service_code(code: Option<&str>, message: &str) -> InvocationError {
    let detail = match code {
        Some(code) => format!("{}: {}", code, message),
        None => message.to_string(),
    };

    match code {
        Some(
            "ThrottlingException"
            | "ServiceQuotaExceededException"
            | "InternalServerException"
            | "BadGatewayException"
            | "DependencyFailedException"
            | "ServiceUnavailableException"
            | "ModelNotReadyException"
            | "ConflictException",
        ) => InvocationError::Transient(detail),
        Some(
            "AccessDeniedException"
            | "ResourceNotFoundException"
            | "ValidationException"
            | "UnrecognizedClientException"
            | "ExpiredTokenException"
            | "InvalidSignatureException"
            | "UnauthorizedException",
        ) => InvocationError::Configuration(detail),
        _ => InvocationError::Transient(detail),
    }
}

/// AWS SDKのエラーを分類する
///
/// `InvokeAgent` 呼び出し自体のエラーと、レスポンスストリーム受信中のエラーの
/// 両方に使用する。
pub(crate) fn classify_sdk_error<E, R>(err: &SdkError<E, R>) -> InvocationError
where
    E: ProvideErrorMetadata + std::error::Error + 'static,
    R: std::fmt::Debug,
{
    let detail = DisplayErrorContext(err).to_string();

    match err {
        SdkError::ServiceError(context) => {
            let service_err = context.err();
            classify_service_code(
                service_err.code(),
                service_err.message().unwrap_or("Unknown error"),
            )
        }
        SdkError::TimeoutError(_) => InvocationError::Transient(detail),
        SdkError::DispatchFailure(failure) if failure.is_timeout() || failure.is_io() => {
            InvocationError::Transient(detail)
        }
        SdkError::DispatchFailure(failure) if failure.is_user() => {
            InvocationError::Configuration(detail)
        }
        SdkError::ConstructionFailure(_) => InvocationError::Configuration(detail),
        _ if detail.to_lowercase().contains("credentials") => {
            InvocationError::Configuration(detail)
        }
        _ => InvocationError::Transient(detail),
    }
}
