//! External command execution
//!
//! Every git invocation goes through [`CommandExecutor`], so the engine can be
//! driven by a scripted executor in tests without shelling out. The system
//! implementation captures all output, never inherits the terminal, and
//! bounds each invocation with a timeout.

use async_trait::async_trait;
use std::path::Path;
use std::process::Stdio;
use std::time::Duration;
use tokio::process::Command as AsyncCommand;
use tracing::{debug, warn};

use crate::error::SyncError;

/// Captured result of one finished process
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct CommandOutput {
    /// Exit code, `None` when the process was killed by a signal
    pub code: Option<i32>,
    pub stdout: String,
    pub stderr: String,
}

impl CommandOutput {
    pub fn success(&self) -> bool {
        self.code == Some(0)
    }

    /// stdout followed by stderr, for pattern matching
    pub fn combined(&self) -> String {
        format!("{}\n{}", self.stdout, self.stderr)
    }

    /// The most useful single line to show a user
    pub fn summary(&self) -> String {
        let pick = |text: &str| {
            text.lines()
                .map(str::trim)
                .filter(|line| !line.is_empty())
                .last()
                .map(str::to_string)
        };
        pick(&self.stderr)
            .or_else(|| pick(&self.stdout))
            .unwrap_or_else(|| format!("exit code {:?}", self.code))
    }
}

/// Capability to run an external program in a directory
#[async_trait]
pub trait CommandExecutor: Send + Sync {
    async fn run(&self, dir: &Path, program: &str, args: &[String]) -> Result<CommandOutput, SyncError>;
}

/// Runs real child processes with tokio
#[derive(Debug, Clone)]
pub struct SystemExecutor {
    timeout: Duration,
}

impl SystemExecutor {
    pub fn new(timeout: Duration) -> Self {
        Self { timeout }
    }
}

#[async_trait]
impl CommandExecutor for SystemExecutor {
    async fn run(&self, dir: &Path, program: &str, args: &[String]) -> Result<CommandOutput, SyncError> {
        let rendered = render(program, args);
        debug!("Running `{}` in {}", rendered, dir.display());

        let mut command = AsyncCommand::new(program);
        command
            .args(args)
            .current_dir(dir)
            .env("GIT_TERMINAL_PROMPT", "0")
            .stdin(Stdio::null())
            .stdout(Stdio::piped())
            .stderr(Stdio::piped())
            .kill_on_drop(true);
        suppress_console_window(&mut command);

        let child = command.spawn().map_err(|e| match e.kind() {
            std::io::ErrorKind::NotFound => SyncError::ToolUnavailable(format!("`{}` not found in PATH", program)),
            _ => SyncError::Io(e),
        })?;

        let output = match tokio::time::timeout(self.timeout, child.wait_with_output()).await {
            Ok(output) => output?,
            Err(_) => {
                warn!("`{}` timed out after {:?}", rendered, self.timeout);
                return Err(SyncError::Timeout {
                    command: rendered,
                    after: self.timeout,
                });
            }
        };

        Ok(CommandOutput {
            code: output.status.code(),
            stdout: String::from_utf8_lossy(&output.stdout).into_owned(),
            stderr: String::from_utf8_lossy(&output.stderr).into_owned(),
        })
    }
}

#[cfg(windows)]
fn suppress_console_window(command: &mut AsyncCommand) {
    const CREATE_NO_WINDOW: u32 = 0x0800_0000;
    command.creation_flags(CREATE_NO_WINDOW);
}

#[cfg(not(windows))]
fn suppress_console_window(_command: &mut AsyncCommand) {}

pub(crate) fn render(program: &str, args: &[String]) -> String {
    let mut rendered = program.to_string();
    for arg in args {
        rendered.push(' ');
        rendered.push_str(arg);
    }
    rendered
}

#[cfg(test)]
pub(crate) mod scripted {
    //! Executor that answers from a script instead of spawning processes

    use super::*;
    use std::collections::VecDeque;
    use std::sync::Mutex;
    use std::time::Duration;

    enum Reply {
        Output(CommandOutput),
        Missing,
        Timeout,
    }

    struct Rule {
        prefix: Vec<String>,
        reply: Reply,
    }

    #[derive(Default)]
    pub struct ScriptedExecutor {
        once: Mutex<VecDeque<Rule>>,
        always: Mutex<Vec<Rule>>,
        calls: Mutex<Vec<Vec<String>>>,
        raw_calls: Mutex<Vec<Vec<String>>>,
        delay: Mutex<Option<Duration>>,
    }

    pub fn ok(stdout: &str) -> CommandOutput {
        CommandOutput {
            code: Some(0),
            stdout: stdout.to_string(),
            stderr: String::new(),
        }
    }

    pub fn fail(code: i32, stdout: &str, stderr: &str) -> CommandOutput {
        CommandOutput {
            code: Some(code),
            stdout: stdout.to_string(),
            stderr: stderr.to_string(),
        }
    }

    fn words(prefix: &str) -> Vec<String> {
        prefix.split_whitespace().map(str::to_string).collect()
    }

    impl ScriptedExecutor {
        pub fn new() -> Self {
            Self::default()
        }

        /// Answer every matching call; later rules win over earlier ones
        pub fn on(&self, prefix: &str, output: CommandOutput) -> &Self {
            self.always.lock().unwrap().push(Rule {
                prefix: words(prefix),
                reply: Reply::Output(output),
            });
            self
        }

        /// Answer the next matching call only, ahead of persistent rules
        pub fn once(&self, prefix: &str, output: CommandOutput) -> &Self {
            self.once.lock().unwrap().push_back(Rule {
                prefix: words(prefix),
                reply: Reply::Output(output),
            });
            self
        }

        pub fn missing_tool(&self) -> &Self {
            self.always.lock().unwrap().push(Rule {
                prefix: Vec::new(),
                reply: Reply::Missing,
            });
            self
        }

        pub fn timeout_on(&self, prefix: &str) -> &Self {
            self.always.lock().unwrap().push(Rule {
                prefix: words(prefix),
                reply: Reply::Timeout,
            });
            self
        }

        /// Make every call take this long
        pub fn delay(&self, delay: Duration) -> &Self {
            *self.delay.lock().unwrap() = Some(delay);
            self
        }

        pub fn calls(&self) -> Vec<Vec<String>> {
            self.calls.lock().unwrap().clone()
        }

        /// Recorded calls as issued, `-c key=value` pairs included
        pub fn raw_calls(&self) -> Vec<Vec<String>> {
            self.raw_calls.lock().unwrap().clone()
        }

        /// Raw calls starting with `prefix` once `-c` pairs are ignored
        pub fn raw_calls_for(&self, prefix: &str) -> Vec<Vec<String>> {
            let prefix = words(prefix);
            self.raw_calls()
                .into_iter()
                .filter(|call| strip_config_options(call).starts_with(&prefix))
                .collect()
        }

        /// Number of recorded calls whose arguments start with `prefix`
        pub fn count(&self, prefix: &str) -> usize {
            let prefix = words(prefix);
            self.calls()
                .iter()
                .filter(|call| call.starts_with(&prefix))
                .count()
        }

        fn answer(&self, program: &str, args: &[String]) -> Result<CommandOutput, SyncError> {
            let args = strip_config_options(args);

            {
                let mut once = self.once.lock().unwrap();
                if let Some(index) = once.iter().position(|rule| args.starts_with(&rule.prefix)) {
                    let rule = once.remove(index).unwrap();
                    return reply(rule.reply, program, &args);
                }
            }

            let always = self.always.lock().unwrap();
            match always.iter().rev().find(|rule| args.starts_with(&rule.prefix)) {
                Some(Rule { reply: Reply::Output(out), .. }) => Ok(out.clone()),
                Some(Rule { reply: Reply::Missing, .. }) => {
                    Err(SyncError::ToolUnavailable(format!("`{}` not found in PATH", program)))
                }
                Some(Rule { reply: Reply::Timeout, .. }) => Err(SyncError::Timeout {
                    command: render(program, &args),
                    after: Duration::from_secs(1),
                }),
                None => Ok(ok("")),
            }
        }
    }

    // `-c key=value` pairs carry identity settings, not the git verb
    fn strip_config_options(args: &[String]) -> Vec<String> {
        let mut out = Vec::new();
        let mut iter = args.iter();
        while let Some(arg) = iter.next() {
            if arg == "-c" {
                iter.next();
                continue;
            }
            out.push(arg.clone());
        }
        out
    }

    fn reply(reply: Reply, program: &str, args: &[String]) -> Result<CommandOutput, SyncError> {
        match reply {
            Reply::Output(out) => Ok(out),
            Reply::Missing => Err(SyncError::ToolUnavailable(program.to_string())),
            Reply::Timeout => Err(SyncError::Timeout {
                command: render(program, args),
                after: Duration::from_secs(1),
            }),
        }
    }

    #[async_trait]
    impl CommandExecutor for ScriptedExecutor {
        async fn run(&self, _dir: &Path, program: &str, args: &[String]) -> Result<CommandOutput, SyncError> {
            let delay = *self.delay.lock().unwrap();
            if let Some(delay) = delay {
                tokio::time::sleep(delay).await;
            }
            let answer = self.answer(program, args);
            self.calls.lock().unwrap().push(strip_config_options(args));
            self.raw_calls.lock().unwrap().push(args.to_vec());
            answer
        }
    }
}
