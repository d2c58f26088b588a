//! JSON command surface over the decision engine.

use crate::config::{Settings, SettingsUpdate};
use crate::engine::DecisionEngine;
use crate::models::AnalysisResult;
use crate::statistics::Stats;
use serde::{Deserialize, Serialize};
use tokio::io::{AsyncBufRead, AsyncBufReadExt, AsyncWrite, AsyncWriteExt};

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "SCREAMING_SNAKE_CASE")]
pub enum Command {
    AnalyzeUrl { url: String },
    UserOverride { url: String },
    UserBlock { url: String },
    GetStats,
    GetHistory,
    UpdateSettings { settings: SettingsUpdate },
    GetSettings,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "status", rename_all = "snake_case")]
pub enum Response {
    Result { result: AnalysisResult },
    Ack,
    Stats { stats: Stats },
    History { history: Vec<AnalysisResult> },
    Settings { settings: Settings },
    Error { message: String },
}

impl Response {
    /// Single-line JSON for the serve loop
    pub fn to_json_line(&self) -> String {
        serde_json::to_string(self).unwrap_or_else(|e| {
            format!(r#"{{"status":"error","message":"failed to encode response: {e}"}}"#)
        })
    }
}

pub async fn handle(engine: &DecisionEngine, command: Command) -> Response {
    match command {
        Command::AnalyzeUrl { url } => Response::Result {
            result: engine.analyze_url(&url).await,
        },
        Command::UserOverride { url } => {
            engine.user_override(&url).await;
            Response::Ack
        }
        Command::UserBlock { url } => {
            engine.user_block(&url).await;
            Response::Ack
        }
        Command::GetStats => Response::Stats {
            stats: engine.stats(),
        },
        Command::GetHistory => Response::History {
            history: engine.history(),
        },
        Command::UpdateSettings { settings } => {
            engine.update_settings(&settings).await;
            Response::Ack
        }
        Command::GetSettings => Response::Settings {
            settings: engine.settings(),
        },
    }
}

/// Parse and dispatch one line; malformed input becomes an `error` response
pub async fn handle_line(engine: &DecisionEngine, line: &str) -> Response {
    match serde_json::from_str::<Command>(line) {
        Ok(command) => {
            log::debug!("Command: {command:?}");
            handle(engine, command).await
        }
        Err(e) => {
            log::warn!("Rejected command line: {e}");
            Response::Error {
                message: format!("invalid command: {e}"),
            }
        }
    }
}

/// JSON-lines loop: one command per input line, one response per output line.
/// Returns at EOF, or with the first read, write or flush error.
pub async fn serve_lines<R, W>(
    engine: &DecisionEngine,
    reader: R,
    mut writer: W,
) -> std::io::Result<()>
where
    R: AsyncBufRead + Unpin,
    W: AsyncWrite + Unpin,
{
    let mut lines = reader.lines();
    while let Some(line) = lines.next_line().await? {
        if line.trim().is_empty() {
            continue;
        }

        let response = handle_line(engine, &line).await;
        let mut out = response.to_json_line();
        out.push('\n');
        writer.write_all(out.as_bytes()).await?;
        writer.flush().await?;
    }
    Ok(())
}
