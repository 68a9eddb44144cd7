//! Command interpreter: a tiny registry of commands plus the line-oriented
//! `sh` evaluator used both as "exec" and as the interactive shell. Mirrors
//! no real process execution whatsoever.

use std::collections::HashMap;
use std::sync::Arc;

/// One line of input, or `None` on end-of-stream.
#[async_trait::async_trait]
pub trait LineReader: Send {
    async fn read_line(&mut self) -> Option<String>;
}

/// Output sink a command writes to (stdout or stderr of the channel).
#[async_trait::async_trait]
pub trait Output: Send {
    async fn write(&mut self, data: &[u8]);
}

/// A registered command's implementation.
#[async_trait::async_trait]
pub trait Command: Send + Sync {
    async fn run(
        &self,
        args: &[String],
        stdin: &mut dyn LineReader,
        stdout: &mut dyn Output,
        stderr: &mut dyn Output,
        pty: bool,
        registry: &Registry,
    ) -> u32;
}

struct True;
#[async_trait::async_trait]
impl Command for True {
    async fn run(
        &self,
        _args: &[String],
        _stdin: &mut dyn LineReader,
        _stdout: &mut dyn Output,
        _stderr: &mut dyn Output,
        _pty: bool,
        _registry: &Registry,
    ) -> u32 {
        0
    }
}

struct False;
#[async_trait::async_trait]
impl Command for False {
    async fn run(
        &self,
        _args: &[String],
        _stdin: &mut dyn LineReader,
        _stdout: &mut dyn Output,
        _stderr: &mut dyn Output,
        _pty: bool,
        _registry: &Registry,
    ) -> u32 {
        1
    }
}

struct Echo;
#[async_trait::async_trait]
impl Command for Echo {
    async fn run(
        &self,
        args: &[String],
        _stdin: &mut dyn LineReader,
        stdout: &mut dyn Output,
        _stderr: &mut dyn Output,
        _pty: bool,
        _registry: &Registry,
    ) -> u32 {
        let mut line = args.join(" ");
        line.push('\n');
        stdout.write(line.as_bytes()).await;
        0
    }
}

/// `cat` does not distinguish argless invocation from one with arguments;
/// both just echo whatever the reader yields.
struct Cat;
#[async_trait::async_trait]
impl Command for Cat {
    async fn run(
        &self,
        _args: &[String],
        stdin: &mut dyn LineReader,
        stdout: &mut dyn Output,
        _stderr: &mut dyn Output,
        _pty: bool,
        _registry: &Registry,
    ) -> u32 {
        while let Some(line) = stdin.read_line().await {
            stdout.write(line.as_bytes()).await;
            stdout.write(b"\n").await;
        }
        0
    }
}

/// `sh`: reads one line at a time, splits on whitespace, dispatches the
/// first token through the registry. Unknown commands write `<name>: not
/// found` to stderr and record exit status 127 without aborting the REPL.
/// In PTY mode, prompts with `$ ` before each read.
struct Sh;
#[async_trait::async_trait]
impl Command for Sh {
    async fn run(
        &self,
        _args: &[String],
        stdin: &mut dyn LineReader,
        stdout: &mut dyn Output,
        stderr: &mut dyn Output,
        pty: bool,
        registry: &Registry,
    ) -> u32 {
        let mut last_status = 0;
        loop {
            if pty {
                stdout.write(b"$ ").await;
            }
            let Some(line) = stdin.read_line().await else {
                break;
            };
            let mut tokens = line.split_ascii_whitespace().map(str::to_string);
            let Some(name) = tokens.next() else {
                continue;
            };
            let args: Vec<String> = tokens.collect();
            last_status = match registry.get(&name) {
                Some(command) => {
                    command
                        .run(&args, stdin, stdout, stderr, pty, registry)
                        .await
                }
                None => {
                    stderr.write(format!("{name}: not found\n").as_bytes()).await;
                    127
                }
            };
        }
        last_status
    }
}

/// The closed set of commands this honeypot understands.
pub struct Registry {
    commands: HashMap<&'static str, Arc<dyn Command>>,
}

impl Registry {
    pub fn new() -> Self {
        let mut commands: HashMap<&'static str, Arc<dyn Command>> = HashMap::new();
        commands.insert("true", Arc::new(True));
        commands.insert("false", Arc::new(False));
        commands.insert("echo", Arc::new(Echo));
        commands.insert("cat", Arc::new(Cat));
        commands.insert("sh", Arc::new(Sh));
        Self { commands }
    }

    pub fn get(&self, name: &str) -> Option<Arc<dyn Command>> {
        self.commands.get(name).cloned()
    }

    /// Splits `line` on ASCII whitespace and dispatches the first token
    /// directly, without wrapping it in an `sh` REPL — this is what an
    /// `exec` request runs.
    pub async fn exec_line(
        &self,
        line: &str,
        stdin: &mut dyn LineReader,
        stdout: &mut dyn Output,
        stderr: &mut dyn Output,
        pty: bool,
    ) -> u32 {
        let mut tokens = line.split_ascii_whitespace().map(str::to_string);
        let Some(name) = tokens.next() else {
            return 0;
        };
        let args: Vec<String> = tokens.collect();
        match self.get(&name) {
            Some(command) => command.run(&args, stdin, stdout, stderr, pty, self).await,
            None => {
                stderr
                    .write(format!("{name}: not found\n").as_bytes())
                    .await;
                127
            }
        }
    }
}

impl Default for Registry {
    fn default() -> Self {
        Self::new()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::collections::VecDeque;

    struct VecLineReader(VecDeque<String>);
    #[async_trait::async_trait]
    impl LineReader for VecLineReader {
        async fn read_line(&mut self) -> Option<String> {
            self.0.pop_front()
        }
    }

    #[derive(Default)]
    struct BufOutput(Vec<u8>);
    #[async_trait::async_trait]
    impl Output for BufOutput {
        async fn write(&mut self, data: &[u8]) {
            self.0.extend_from_slice(data);
        }
    }

    #[tokio::test]
    async fn echo_joins_args_with_spaces() {
        let registry = Registry::new();
        let mut stdin = VecLineReader(VecDeque::new());
        let mut stdout = BufOutput::default();
        let mut stderr = BufOutput::default();
        let status = registry
            .exec_line("echo hello world", &mut stdin, &mut stdout, &mut stderr, false)
            .await;
        assert_eq!(status, 0);
        assert_eq!(stdout.0, b"hello world\n");
    }

    #[tokio::test]
    async fn cat_echoes_lines_until_eof() {
        let registry = Registry::new();
        let mut stdin = VecLineReader(VecDeque::from(["a".to_string(), "b".to_string()]));
        let mut stdout = BufOutput::default();
        let mut stderr = BufOutput::default();
        registry
            .exec_line("cat", &mut stdin, &mut stdout, &mut stderr, false)
            .await;
        assert_eq!(stdout.0, b"a\nb\n");
    }

    #[tokio::test]
    async fn sh_reports_last_status_and_unknown_commands() {
        let registry = Registry::new();
        let mut stdin = VecLineReader(VecDeque::from([
            "false".to_string(),
            "bogus".to_string(),
            "true".to_string(),
        ]));
        let mut stdout = BufOutput::default();
        let mut stderr = BufOutput::default();
        let status = registry
            .exec_line("sh", &mut stdin, &mut stdout, &mut stderr, false)
            .await;
        assert_eq!(status, 0); // last command run was `true`
        assert_eq!(stderr.0, b"bogus: not found\n");
    }

    #[tokio::test]
    async fn sh_prompts_in_pty_mode() {
        let registry = Registry::new();
        let mut stdin = VecLineReader(VecDeque::from(["true".to_string()]));
        let mut stdout = BufOutput::default();
        let mut stderr = BufOutput::default();
        registry
            .exec_line("sh", &mut stdin, &mut stdout, &mut stderr, true)
            .await;
        assert!(stdout.0.starts_with(b"$ "));
    }
}
