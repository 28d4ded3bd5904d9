mod repl;

use agent::{AgentReference, BedrockAgentRuntime, SessionClient};
use clap::{Args, Parser, Subcommand};
use config::AgentConfig;
use repl::Repl;
use rustyline::DefaultEditor;
use std::future::Future;
use std::path::PathBuf;
use std::process::ExitCode;
use std::sync::Arc;
use tracing_subscriber::EnvFilter;

// CLIの引数構造体定義
#[derive(Parser)]
#[command(name = "agent-cli")]
#[command(about = "Chat with an AWS Bedrock Agent from the terminal", long_about = None)]
struct Cli {
    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// エージェントとの会話を開始します
    Run(RunArgs),
}

#[derive(Args, Default)]
struct RunArgs {
    /// 設定ファイルのパス (オプション: 省略時は .bedrock/agent.json, agent.json の順に検索)
    #[arg(long)]
    config: Option<PathBuf>,

    /// エージェントID
    #[arg(long, env = "BEDROCK_AGENT_ID")]
    agent_id: Option<String>,

    /// エージェントエイリアスID
    #[arg(long, env = "BEDROCK_AGENT_ALIAS_ID")]
    agent_alias_id: Option<String>,

    /// 使用するAWSプロファイル名
    #[arg(long)]
    aws_profile: Option<String>,

    /// リージョン (オプション: デフォルトはプロファイル設定またはus-east-1)
    #[arg(long)]
    region: Option<String>,

    /// 長期記憶のメモリID
    #[arg(long)]
    memory_id: Option<String>,

    /// セッションID (オプション: 省略時はランダムに生成)
    #[arg(long)]
    session_id: Option<String>,

    /// 1回の呼び出しのタイムアウト（秒）
    #[arg(long)]
    timeout_secs: Option<u64>,

    /// トレース情報をログに出力する
    #[arg(long)]
    trace: bool,
}

#[tokio::main]
async fn main() -> ExitCode {
    // 引数の解析
    let cli = Cli::parse();

    match cli.command {
        Commands::Run(args) => {
            // ログレベルは設定ファイルの enable_trace も反映してから決める
            let config = match resolve_config(&args) {
                Ok(config) => config,
                Err(e) => {
                    eprintln!("Error: {:#}", e.context("Agent configuration is incomplete"));
                    return ExitCode::FAILURE;
                }
            };
            init_tracing(log_level(&config));
            match run_agent_cli(args, config).await {
                Ok(exit) => exit,
                Err(e) => {
                    eprintln!("Error: {:#}", e);
                    ExitCode::FAILURE
                }
            }
        }
    }
}

/// ログ出力を初期化する
///
/// 対話の表示と混ざらないよう、ログは標準エラー出力に書き出す。
fn init_tracing(default_level: &str) {
    tracing_subscriber::fmt()
        .with_env_filter(
            EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new(default_level)),
        )
        .with_writer(std::io::stderr)
        .init();
}

/// トレース出力が有効な場合はトレースイベントが出力される info レベルにする
fn log_level(config: &AgentConfig) -> &'static str {
    if config.enable_trace {
        "info"
    } else {
        "warn"
    }
}

/// 設定ファイルを読み込み、コマンドライン引数で上書きする
fn resolve_config(args: &RunArgs) -> anyhow::Result<AgentConfig> {
    let config = match &args.config {
        Some(path) => AgentConfig::load_from_file(path)?,
        None => AgentConfig::load_default()?.unwrap_or_default(),
    };
    let config = apply_overrides(config, args);
    config.validate()?;
    Ok(config)
}

fn apply_overrides(mut config: AgentConfig, args: &RunArgs) -> AgentConfig {
    if let Some(agent_id) = &args.agent_id {
        config.agent_id = agent_id.clone();
    }
    if let Some(agent_alias_id) = &args.agent_alias_id {
        config.agent_alias_id = agent_alias_id.clone();
    }
    if args.aws_profile.is_some() {
        config.profile = args.aws_profile.clone();
    }
    if args.region.is_some() {
        config.region = args.region.clone();
    }
    if args.memory_id.is_some() {
        config.memory_id = args.memory_id.clone();
    }
    if let Some(timeout_secs) = args.timeout_secs {
        config.timeout_secs = timeout_secs;
    }
    config.enable_trace |= args.trace;
    config
}

/// CLI対話型エージェントを実行する
async fn run_agent_cli(args: RunArgs, config: AgentConfig) -> anyhow::Result<ExitCode> {
    println!(
        "Initializing Agent with profile: {}",
        config.profile.as_deref().unwrap_or("default")
    );

    let runtime =
        Arc::new(BedrockAgentRuntime::new(config.profile.clone(), config.region.clone()).await);
    let agent = AgentReference::new(&config.agent_id, &config.agent_alias_id, runtime)?;

    let session = match &args.session_id {
        Some(session_id) => SessionClient::with_session_id(agent, session_id.clone())?,
        None => SessionClient::new(agent),
    };
    let mut session = session
        .with_timeout(config.timeout())
        .with_trace(config.enable_trace);
    if let Some(memory_id) = &config.memory_id {
        session = session.with_memory_id(memory_id.clone());
    }

    // rustylineエディタの初期化（UI層）
    let editor = DefaultEditor::new()?;

    println!(
        "Using Agent: {} (alias {})",
        config.agent_id, config.agent_alias_id
    );
    println!("Session: {}", session.session_id());
    println!("+--------------------------------------------------+");
    println!("| AI Agent Started. Type 'exit' or 'quit' to stop. |");
    println!("+--------------------------------------------------+");

    let exit = Repl::new(editor, || interrupt_from(tokio::signal::ctrl_c()))
        .run(&mut session)
        .await?;

    Ok(exit.into())
}

/// シグナル待ちの Future を割り込みの通知に変換する
///
/// シグナルハンドラの登録に失敗した場合は割り込みが届かないものとして扱い、
/// 完了しない Future になる。
async fn interrupt_from<F>(signal: F)
where
    F: Future<Output = std::io::Result<()>>,
{
    if let Err(e) = signal.await {
        tracing::warn!(error = %e, "Failed to listen for CTRL-C");
        std::future::pending::<()>().await;
    }
}
