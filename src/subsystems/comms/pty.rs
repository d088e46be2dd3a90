//! Console comms channel — reads lines from stdin, sends them to the agents
//! and prints the reply. Outbound notifications are printed as they arrive.
//!
//! Enabled with `-i` or `[comms.pty] enabled = true`. Runs until shutdown or
//! until stdin is closed.

use std::io::Write as _;
use std::sync::Arc;

use tokio::io::{AsyncBufReadExt, BufReader};
use tokio::sync::broadcast::error::RecvError;
use tokio_util::sync::CancellationToken;
use tracing::{debug, info, warn};

use super::state::{CommsEvent, CommsState};
use crate::error::AppError;
use crate::subsystems::runtime::{Component, ComponentFuture};

pub struct PtyChannel {
    channel_id: String,
    state: Arc<CommsState>,
}

impl PtyChannel {
    pub fn new(channel_id: impl Into<String>, state: Arc<CommsState>) -> Self {
        Self { channel_id: channel_id.into(), state }
    }
}

impl Component for PtyChannel {
    fn id(&self) -> &str {
        &self.channel_id
    }

    fn run(self: Box<Self>, shutdown: CancellationToken) -> ComponentFuture {
        Box::pin(run_pty(self.channel_id, self.state, shutdown))
    }
}

fn prompt() {
    print!("> ");
    let _ = std::io::stdout().flush();
}

async fn run_pty(channel_id: String, state: Arc<CommsState>, shutdown: CancellationToken) -> Result<(), AppError> {
    info!(%channel_id, "console channel started");
    println!("─────────────────────────────────────────");
    println!(" pmteam console  (/help for commands, Ctrl-C to quit)");
    println!("─────────────────────────────────────────");

    let mut lines = BufReader::new(tokio::io::stdin()).lines();
    let mut notifications = state.subscribe();
    prompt();

    loop {
        tokio::select! {
            biased;

            _ = shutdown.cancelled() => {
                println!("\n[console] shutting down");
                info!(%channel_id, "console channel shutting down");
                break;
            }

            note = notifications.recv() => match note {
                Ok(text) => {
                    println!("\n[notify] {text}");
                    prompt();
                }
                Err(RecvError::Lagged(n)) => warn!(%channel_id, skipped = n, "console missed notifications"),
                Err(RecvError::Closed) => {
                    debug!(%channel_id, "notification stream closed");
                    notifications = state.subscribe();
                }
            },

            line = lines.next_line() => match line {
                Err(e) => {
                    warn!(%channel_id, "stdin read error: {e}");
                    break;
                }
                Ok(None) => {
                    info!(%channel_id, "stdin closed");
                    break;
                }
                Ok(Some(input)) => {
                    let input = input.trim().to_string();
                    if input.is_empty() {
                        prompt();
                        continue;
                    }
                    debug!(%channel_id, %input, "console line");
                    match state.send_message(&channel_id, input).await {
                        Ok(reply) => println!("{reply}"),
                        Err(e) => println!("error: {e}"),
                    }
                    prompt();
                }
            },
        }
    }

    state.report_event(CommsEvent::ChannelShutdown { channel_id });
    Ok(())
}
