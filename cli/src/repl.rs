use agent::{InvocationError, SessionClient, TurnOutcome};
use rustyline::DefaultEditor;
use rustyline::error::ReadlineError;
use std::future::Future;
use std::io::Write;
use std::process::ExitCode;
use std::time::Duration;
use tokio::time::sleep;

// UI関連の設定
const USER_NAME: &str = "You";
const AGENT_NAME: &str = "Assistant";
const LOADING_ANIMATION_INTERVAL: u64 = 200;
const LOADING_ANIMATION_CHARACTER: &str = ".";
// ローディングアニメーションをクリアするためのスペース文字列
const CLEAR_LINE_SPACES: &str = "                                     "; // 37 spaces

/// 会話を終了する入力
const EXIT_COMMANDS: [&str; 3] = ["exit", "quit", "bye"];

/// 1行の読み込み結果
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ReadOutcome {
    Line(String),
    Interrupted,
    Eof,
}

/// ユーザー入力の読み込み元
pub trait LineSource {
    fn read_line(&mut self, prompt: &str) -> anyhow::Result<ReadOutcome>;

    fn add_history(&mut self, _line: &str) {}
}

impl LineSource for DefaultEditor {
    fn read_line(&mut self, prompt: &str) -> anyhow::Result<ReadOutcome> {
        match self.readline(prompt) {
            Ok(line) => Ok(ReadOutcome::Line(line)),
            Err(ReadlineError::Interrupted) => Ok(ReadOutcome::Interrupted),
            Err(ReadlineError::Eof) => Ok(ReadOutcome::Eof),
            Err(err) => Err(err.into()),
        }
    }

    fn add_history(&mut self, line: &str) {
        let _ = self.add_history_entry(line);
    }
}

/// REPLの終了状態
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ReplExit {
    /// 利用者の操作による通常終了
    Normal,
    /// 設定エラーなど継続できないエラーによる終了
    Fatal,
}

impl From<ReplExit> for ExitCode {
    fn from(exit: ReplExit) -> Self {
        match exit {
            ReplExit::Normal => ExitCode::SUCCESS,
            ReplExit::Fatal => ExitCode::FAILURE,
        }
    }
}

/// 対話ループ
///
/// ユーザー入力の受け付け、ローディング表示、応答とエラーの表示を担当する。
/// どの経路で終了した場合でも、戻る前にセッションを終了させる。
pub struct Repl<L, C> {
    lines: L,
    interrupt: C,
    loading_animation: bool,
}

impl<L, C, F> Repl<L, C>
where
    L: LineSource,
    C: FnMut() -> F,
    F: Future<Output = ()>,
{
    /// # Arguments
    /// * `lines` - ユーザー入力の読み込み元
    /// * `interrupt` - 応答待ちの間に完了すると中断とみなす Future を返す関数
    pub fn new(lines: L, interrupt: C) -> Self {
        Self {
            lines,
            interrupt,
            loading_animation: true,
        }
    }

    pub fn with_loading_animation(mut self, enabled: bool) -> Self {
        self.loading_animation = enabled;
        self
    }

    /// 対話ループを実行する
    ///
    /// 終了通知の応答待ちの間に割り込みがあった場合は、応答を待たずに戻る。
    pub async fn run(mut self, session: &mut SessionClient) -> anyhow::Result<ReplExit> {
        let result = self.drive(session).await;
        if session.is_open() {
            println!("Ending session...");
            tokio::select! {
                _ = session.end() => {}
                _ = (self.interrupt)() => {
                    println!("CTRL-C");
                    tracing::warn!(
                        session_id = %session.session_id(),
                        "Stopped waiting for the end-of-session response"
                    );
                }
            }
        }
        result
    }

    async fn drive(&mut self, session: &mut SessionClient) -> anyhow::Result<ReplExit> {
        loop {
            // ユーザー入力の受け付け
            let line = match self.lines.read_line(&format!("{} > ", USER_NAME))? {
                ReadOutcome::Line(line) => line,
                ReadOutcome::Interrupted => {
                    println!("CTRL-C");
                    return Ok(ReplExit::Normal);
                }
                ReadOutcome::Eof => {
                    println!("CTRL-D");
                    return Ok(ReplExit::Normal);
                }
            };

            let input = line.trim();

            // 終了コマンドの処理
            if is_exit_command(input) {
                return Ok(ReplExit::Normal);
            }

            if !input.is_empty() {
                self.lines.add_history(input);
            }

            // アシスタントの応答開始を表示
            print!("{} > ", AGENT_NAME);
            std::io::stdout().flush()?;

            let loading_task = self.loading_animation.then(|| {
                tokio::spawn(async {
                    loop {
                        sleep(Duration::from_millis(LOADING_ANIMATION_INTERVAL)).await;
                        print!("{}", LOADING_ANIMATION_CHARACTER);
                        if std::io::stdout().flush().is_err() {
                            break;
                        }
                    }
                })
            });

            let turn = session.send_cancellable(input, (self.interrupt)()).await;

            if let Some(task) = loading_task {
                task.abort();
                clear_loading_animation();
            }

            match turn {
                TurnOutcome::Cancelled => {
                    println!("CTRL-C");
                    return Ok(ReplExit::Normal);
                }
                TurnOutcome::Completed(Ok(text)) => println!("{}", text),
                TurnOutcome::Completed(Err(err)) => {
                    println!("{}", describe_error(&err));
                    if err.is_fatal() {
                        return Ok(ReplExit::Fatal);
                    }
                    if err == InvocationError::SessionClosed {
                        return Ok(ReplExit::Normal);
                    }
                }
            }
        }
    }
}

/// 終了コマンドかどうかを判定する
pub fn is_exit_command(input: &str) -> bool {
    EXIT_COMMANDS
        .iter()
        .any(|command| input.eq_ignore_ascii_case(command))
}

/// エラーを利用者向けの1行メッセージにする
pub fn describe_error(err: &InvocationError) -> String {
    match err {
        InvocationError::InvalidInput(_) => {
            "Please enter some text. Type 'exit' to end the conversation.".to_string()
        }
        InvocationError::SessionClosed => "[Error] The session has already ended.".to_string(),
        InvocationError::Transient(detail) => format!(
            "[Error] I'm having trouble processing your request right now. Please try again. ({})",
            detail
        ),
        InvocationError::Configuration(detail) => format!(
            "[Error] The agent cannot be reached with the current configuration: {}",
            detail
        ),
        InvocationError::RemoteRefusal(text) if text.is_empty() => {
            "[Refused] The agent declined to answer.".to_string()
        }
        InvocationError::RemoteRefusal(text) => format!("[Refused] {}", text),
    }
}

/// ローディングアニメーションをクリアしてカーソルを戻す
fn clear_loading_animation() {
    print!(
        "\r{} > {}\r{} > ",
        AGENT_NAME, CLEAR_LINE_SPACES, AGENT_NAME
    );
    let _ = std::io::stdout().flush();
}

#[cfg(test)]
mod tests {
    use super::*;
    use agent::{AgentReference, AgentRuntime, InvokeRequest, ResponseEvent};
    use async_trait::async_trait;
    use std::collections::VecDeque;
    use std::sync::{Arc, Mutex};

    /// 台本どおりに行を返す入力元
    struct ScriptedLines(VecDeque<ReadOutcome>);

    impl ScriptedLines {
        fn new(lines: &[&str]) -> Self {
            Self(
                lines
                    .iter()
                    .map(|line| ReadOutcome::Line(line.to_string()))
                    .collect(),
            )
        }

        fn then(mut self, outcome: ReadOutcome) -> Self {
            self.0.push_back(outcome);
            self
        }
    }

    impl LineSource for ScriptedLines {
        fn read_line(&mut self, _prompt: &str) -> anyhow::Result<ReadOutcome> {
            Ok(self.0.pop_front().unwrap_or(ReadOutcome::Eof))
        }
    }

    enum Reply {
        Text(&'static str),
        Fail(InvocationError),
        Hang,
    }

    struct RecordingRuntime {
        replies: Mutex<VecDeque<Reply>>,
        calls: Mutex<Vec<InvokeRequest>>,
    }

    impl RecordingRuntime {
        fn new(replies: Vec<Reply>) -> Arc<Self> {
            Arc::new(Self {
                replies: Mutex::new(replies.into()),
                calls: Mutex::new(Vec::new()),
            })
        }

        fn inputs(&self) -> Vec<(String, bool)> {
            self.calls
                .lock()
                .unwrap()
                .iter()
                .map(|call| (call.input_text.clone(), call.end_session))
                .collect()
        }
    }

    #[async_trait]
    impl AgentRuntime for RecordingRuntime {
        async fn invoke(
            &self,
            request: InvokeRequest,
        ) -> Result<Vec<ResponseEvent>, InvocationError> {
            self.calls.lock().unwrap().push(request);
            let reply = self.replies.lock().unwrap().pop_front();
            match reply {
                Some(Reply::Text(text)) => Ok(vec![ResponseEvent::Chunk(text.to_string())]),
                Some(Reply::Fail(err)) => Err(err),
                Some(Reply::Hang) => {
                    std::future::pending::<()>().await;
                    unreachable!()
                }
                None => Ok(Vec::new()),
            }
        }
    }

    fn session(runtime: &Arc<RecordingRuntime>) -> SessionClient {
        let agent = AgentReference::new("agent123", "alias123", runtime.clone()).unwrap();
        SessionClient::new(agent)
    }

    async fn run_repl(lines: ScriptedLines, runtime: &Arc<RecordingRuntime>) -> ReplExit {
        let mut session = session(runtime);
        let exit = Repl::new(lines, std::future::pending::<()>)
            .with_loading_animation(false)
            .run(&mut session)
            .await
            .unwrap();
        assert!(!session.is_open(), "REPL終了後はセッションが終了しているべき");
        exit
    }

    fn end_call() -> (String, bool) {
        ("Goodbye".to_string(), true)
    }

    #[test]
    fn test_exit_commands() {
        assert!(is_exit_command("exit"));
        assert!(is_exit_command("EXIT"));
        assert!(is_exit_command("quit"));
        assert!(is_exit_command("Bye"));
        assert!(!is_exit_command("exit now"));
        assert!(!is_exit_command(""));
    }

    #[test]
    fn test_describe_error_is_single_line() {
        for err in [
            InvocationError::InvalidInput("utterance is empty".to_string()),
            InvocationError::SessionClosed,
            InvocationError::Transient("ThrottlingException: Rate exceeded".to_string()),
            InvocationError::Configuration("AccessDeniedException: denied".to_string()),
            InvocationError::RemoteRefusal(String::new()),
            InvocationError::RemoteRefusal("No.".to_string()),
        ] {
            assert!(!describe_error(&err).contains('\n'));
        }
    }

    #[tokio::test]
    async fn test_exit_command_ends_session() {
        let runtime = RecordingRuntime::new(vec![Reply::Text("Hello!")]);

        let exit = run_repl(ScriptedLines::new(&["hello", "exit", "ignored"]), &runtime).await;

        assert_eq!(exit, ReplExit::Normal);
        assert_eq!(
            runtime.inputs(),
            vec![("hello".to_string(), false), end_call()]
        );
    }

    #[tokio::test]
    async fn test_blank_line_is_not_sent() {
        let runtime = RecordingRuntime::new(vec![Reply::Text("ok")]);

        let exit = run_repl(ScriptedLines::new(&["   ", "hi", "quit"]), &runtime).await;

        assert_eq!(exit, ReplExit::Normal);
        assert_eq!(runtime.inputs(), vec![("hi".to_string(), false), end_call()]);
    }

    #[tokio::test]
    async fn test_transient_error_continues_loop() {
        let runtime = RecordingRuntime::new(vec![
            Reply::Fail(InvocationError::Transient("timeout".to_string())),
            Reply::Text("recovered"),
        ]);

        let exit = run_repl(ScriptedLines::new(&["first", "second", "exit"]), &runtime).await;

        assert_eq!(exit, ReplExit::Normal);
        assert_eq!(
            runtime.inputs(),
            vec![
                ("first".to_string(), false),
                ("second".to_string(), false),
                end_call()
            ]
        );
    }

    #[tokio::test]
    async fn test_refusal_continues_loop() {
        let runtime = RecordingRuntime::new(vec![
            Reply::Fail(InvocationError::RemoteRefusal("No.".to_string())),
            Reply::Text("ok"),
        ]);

        let exit = run_repl(ScriptedLines::new(&["first", "second"]), &runtime).await;

        assert_eq!(exit, ReplExit::Normal);
        assert_eq!(runtime.inputs().len(), 3);
    }

    #[tokio::test]
    async fn test_configuration_error_is_fatal() {
        let runtime = RecordingRuntime::new(vec![Reply::Fail(agent::classify_service_code(
            Some("AccessDeniedException"),
            "denied",
        ))]);

        let exit = run_repl(ScriptedLines::new(&["hi", "never sent"]), &runtime).await;

        assert_eq!(exit, ReplExit::Fatal);
        assert_eq!(runtime.inputs(), vec![("hi".to_string(), false), end_call()]);
    }

    #[tokio::test]
    async fn test_interrupt_at_prompt_ends_session() {
        let runtime = RecordingRuntime::new(vec![]);

        let lines = ScriptedLines::new(&[]).then(ReadOutcome::Interrupted);
        let exit = run_repl(lines, &runtime).await;

        assert_eq!(exit, ReplExit::Normal);
        assert_eq!(runtime.inputs(), vec![end_call()]);
    }

    #[tokio::test]
    async fn test_eof_ends_session() {
        let runtime = RecordingRuntime::new(vec![]);

        let exit = run_repl(ScriptedLines::new(&[]), &runtime).await;

        assert_eq!(exit, ReplExit::Normal);
        assert_eq!(runtime.inputs(), vec![end_call()]);
    }

    #[tokio::test]
    async fn test_interrupt_during_turn_ends_session_once() {
        let runtime = RecordingRuntime::new(vec![Reply::Hang]);
        let mut session = session(&runtime);

        let exit = Repl::new(ScriptedLines::new(&["hi", "never read"]), || {
            sleep(Duration::from_millis(20))
        })
        .with_loading_animation(false)
        .run(&mut session)
        .await
        .unwrap();

        assert_eq!(exit, ReplExit::Normal);
        assert!(!session.is_open());
        assert_eq!(runtime.inputs(), vec![("hi".to_string(), false), end_call()]);
    }

    #[tokio::test]
    async fn test_interrupt_while_ending_session_returns_promptly() {
        let runtime = RecordingRuntime::new(vec![Reply::Hang]);
        let mut session = session(&runtime);

        let repl = Repl::new(ScriptedLines::new(&["exit"]), || {
            sleep(Duration::from_millis(20))
        })
        .with_loading_animation(false);
        let exit = tokio::time::timeout(Duration::from_secs(5), repl.run(&mut session))
            .await
            .expect("終了通知の待機は割り込みで打ち切られるべき")
            .unwrap();

        assert_eq!(exit, ReplExit::Normal);
        assert!(!session.is_open(), "割り込み後もセッションは終了状態であるべき");
        assert_eq!(runtime.inputs(), vec![end_call()]);
    }
}
