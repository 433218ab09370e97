//! Interactive commands read from stdin.
//!
//! `status` prints the task table, `stop` shuts the service down,
//! `activetime <window>` replaces the active time window and
//! `log <directive>` replaces the log filter.

use std::io::BufRead;
use std::sync::Arc;

use tokio::sync::mpsc;
use tokio_util::sync::CancellationToken;
use tracing::{debug, info};

use crate::active_time::ActiveTimeGate;
use crate::logging::LoggingConfig;
use crate::status::StatusRegistry;

const INPUT_BUFFER: usize = 16;

const HELP: &str = "commands: status | stop | activetime <HH:MM:SS-HH:MM:SS> | log <directive>";

/// What a console line asks for.
#[derive(Debug, Clone, PartialEq, Eq)]
enum Command<'a> {
    Status,
    Stop,
    ActiveTime(&'a str),
    Log(&'a str),
    Help,
    Unknown(&'a str),
}

impl<'a> Command<'a> {
    fn parse(line: &'a str) -> Option<Self> {
        let line = line.trim();
        if line.is_empty() {
            return None;
        }
        let (name, arg) = match line.split_once(char::is_whitespace) {
            Some((name, arg)) => (name, arg.trim()),
            None => (line, ""),
        };
        Some(match (name.to_ascii_lowercase().as_str(), arg) {
            ("status", _) => Self::Status,
            ("stop", _) => Self::Stop,
            ("help", _) => Self::Help,
            ("activetime", arg) if !arg.is_empty() => Self::ActiveTime(arg),
            ("log", arg) if !arg.is_empty() => Self::Log(arg),
            _ => Self::Unknown(line),
        })
    }
}

pub struct Console {
    registry: Arc<StatusRegistry>,
    gate: ActiveTimeGate,
    logging_config: Option<Arc<LoggingConfig>>,
    token: CancellationToken,
}

impl Console {
    /// `token` is cancelled by the `stop` command.
    pub fn new(
        registry: Arc<StatusRegistry>,
        gate: ActiveTimeGate,
        logging_config: Option<Arc<LoggingConfig>>,
        token: CancellationToken,
    ) -> Self {
        Self {
            registry,
            gate,
            logging_config,
            token,
        }
    }

    /// Run one command line and return the text to show, if any.
    pub fn execute(&self, line: &str) -> Option<String> {
        let command = Command::parse(line)?;
        debug!(?command, "Console command");

        let reply = match command {
            Command::Status => self.registry.render_table(),
            Command::Stop => {
                info!("Stop requested from console");
                self.token.cancel();
                "stopping".to_string()
            }
            Command::ActiveTime(window) => match self.gate.set_window(window) {
                Ok(window) => format!("active time set to {window}"),
                Err(e) => e.to_string(),
            },
            Command::Log(directive) => match &self.logging_config {
                Some(config) => match config.set_filter(directive) {
                    Ok(()) => format!("log filter set to {directive}"),
                    Err(e) => e.to_string(),
                },
                None => "logging configuration not available".to_string(),
            },
            Command::Help => HELP.to_string(),
            Command::Unknown(line) => format!("unknown command: {line}\n{HELP}"),
        };
        Some(reply)
    }

    /// Execute lines from `lines` until the sender goes away, `stop` is
    /// entered or the token is cancelled.
    pub async fn run(self, mut lines: mpsc::Receiver<String>) {
        loop {
            let line = tokio::select! {
                biased;
                _ = self.token.cancelled() => break,
                line = lines.recv() => line,
            };
            let Some(line) = line else {
                debug!("Console input closed");
                break;
            };
            if let Some(reply) = self.execute(&line) {
                println!("{}", reply.trim_end());
            }
        }
    }

    /// Spawn the console on the process stdin.
    ///
    /// Stdin is read on a detached thread that is never joined, so a
    /// blocked read does not hold up runtime shutdown.
    pub fn spawn_stdin(self) -> std::io::Result<tokio::task::JoinHandle<()>> {
        let (tx, rx) = mpsc::channel(INPUT_BUFFER);
        std::thread::Builder::new()
            .name("console-stdin".to_string())
            .spawn(move || read_lines(std::io::stdin().lock(), &tx))?;
        Ok(tokio::spawn(self.run(rx)))
    }
}

/// Forward lines from `reader` until it ends or the receiver is dropped.
fn read_lines(reader: impl BufRead, tx: &mpsc::Sender<String>) {
    for line in reader.lines() {
        let line = match line {
            Ok(line) => line,
            Err(e) => {
                debug!(error = %e, "Console input unreadable");
                return;
            }
        };
        if tx.blocking_send(line).is_err() {
            return;
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::active_time::ActiveTimeWindow;
    use crate::logging::DEFAULT_LOG_FILTER;
    use crate::status::StatusCode;

    fn console() -> Console {
        let token = CancellationToken::new();
        let logging = LoggingConfig::detached(DEFAULT_LOG_FILTER, "logs").unwrap();
        Console::new(
            Arc::new(StatusRegistry::new()),
            ActiveTimeGate::spawn(ActiveTimeWindow::disabled(), token.child_token()),
            Some(Arc::new(logging)),
            token,
        )
    }

    #[test]
    fn parses_commands() {
        assert_eq!(Command::parse("  "), None);
        assert_eq!(Command::parse("status"), Some(Command::Status));
        assert_eq!(Command::parse("STOP"), Some(Command::Stop));
        assert_eq!(
            Command::parse("activetime  01:00:00-02:00:00 "),
            Some(Command::ActiveTime("01:00:00-02:00:00"))
        );
        assert_eq!(
            Command::parse("log monitor_encoder=debug"),
            Some(Command::Log("monitor_encoder=debug"))
        );
        assert_eq!(Command::parse("activetime"), Some(Command::Unknown("activetime")));
        assert_eq!(Command::parse("dance"), Some(Command::Unknown("dance")));
    }

    #[tokio::test]
    async fn status_prints_table() {
        let console = console();
        console
            .registry
            .set_status("a.mkv", StatusCode::Misc, "handling audio task");
        let table = console.execute("status").unwrap();
        assert!(table.contains("a.mkv"));
        assert!(table.contains("handling audio task"));
    }

    #[tokio::test]
    async fn activetime_is_validated() {
        let console = console();
        let reply = console.execute("activetime 10:00:00-12:00:00").unwrap();
        assert_eq!(reply, "active time set to 10:00:00-12:00:00");
        assert_eq!(console.gate.window().to_string(), "10:00:00-12:00:00");

        let reply = console.execute("activetime 10:61:00-12:00:00").unwrap();
        assert!(reply.starts_with("invalid active time"));
        assert_eq!(console.gate.window().to_string(), "10:00:00-12:00:00");
    }

    #[tokio::test]
    async fn log_replaces_filter() {
        let console = console();
        let reply = console.execute("log monitor_encoder=trace").unwrap();
        assert_eq!(reply, "log filter set to monitor_encoder=trace");
        assert!(console.execute("log monitor_encoder=loud").is_some());
    }

    #[tokio::test]
    async fn unknown_command_is_reported() {
        let console = console();
        let reply = console.execute("restart now").unwrap();
        assert!(reply.starts_with("unknown command: restart now"));
    }

    #[tokio::test]
    async fn stop_cancels_and_ends_loop() {
        let console = console();
        let token = console.token.clone();
        let (tx, rx) = mpsc::channel(INPUT_BUFFER);
        let reader = std::thread::spawn(move || {
            read_lines(b"status\nstop\nstatus\n" as &[u8], &tx);
        });
        console.run(rx).await;
        assert!(token.is_cancelled());
        reader.join().unwrap();
    }

    #[tokio::test]
    async fn cancellation_ends_loop_while_input_stays_open() {
        let console = console();
        let token = console.token.clone();
        let (tx, rx) = mpsc::channel::<String>(INPUT_BUFFER);
        let run = tokio::spawn(console.run(rx));

        token.cancel();
        tokio::time::timeout(std::time::Duration::from_secs(5), run)
            .await
            .expect("console kept running after cancellation")
            .unwrap();
        assert!(tx.is_closed());
    }

    #[test]
    fn reader_stops_when_console_is_gone() {
        let (tx, rx) = mpsc::channel(1);
        drop(rx);
        read_lines(b"status\nstatus\n" as &[u8], &tx);
        assert!(tx.is_closed());
    }
}
