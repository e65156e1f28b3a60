//! Interactive driver: one in-process authority, any number of agents,
//! commands read line by line from stdin.

use std::collections::BTreeMap;
use std::sync::Arc;

use futures::future::join_all;
use thiserror::Error;
use tokio::io::{AsyncBufReadExt, BufReader};

use crate::authority::AuthorityHandle;
use crate::client::ClientAgent;
use crate::clock::Clock;
use crate::common::commands::HELP;
use crate::common::{ChatMessage, Channel, ClientEvent, Color, ConsoleCommand, Identity};
use crate::error::ChatError;

#[derive(Debug, Error)]
pub enum ConsoleError {
    #[error(transparent)]
    Chat(#[from] ChatError),
    #[error("no participant named `{0}`")]
    UnknownParticipant(String),
}

pub struct Console {
    authority: AuthorityHandle,
    clock: Arc<dyn Clock>,
    agents: BTreeMap<String, ClientAgent>,
}

impl Console {
    pub fn new(authority: AuthorityHandle, clock: Arc<dyn Clock>) -> Self {
        Self {
            authority,
            clock,
            agents: BTreeMap::new(),
        }
    }

    /// Runs one command and returns what should be printed, including any
    /// events it caused at the agents.
    pub async fn execute(&mut self, command: ConsoleCommand) -> Vec<String> {
        let mut lines = match self.apply(command).await {
            Ok(lines) => lines,
            Err(err) => vec![format!("error: {err}")],
        };

        // Requests are handled in order, so once this round-trip returns every
        // earlier request has been committed and fanned out.
        if self.authority.settings().await.is_ok() {
            lines.extend(self.collect_events());
        }
        lines
    }

    pub fn collect_events(&mut self) -> Vec<String> {
        let mut lines = Vec::new();
        for (name, agent) in self.agents.iter_mut() {
            for event in agent.drain() {
                lines.push(format!("[{name}] {}", describe(&event)));
            }
        }
        lines
    }

    /// Unregisters every agent.
    pub async fn shutdown(&mut self) {
        let agents = std::mem::take(&mut self.agents);
        let results = join_all(agents.into_values().map(ClientAgent::leave)).await;
        let failed = results.iter().filter(|result| result.is_err()).count();
        if failed > 0 {
            log::warn!("{failed} agent(s) could not unregister cleanly");
        }
    }

    async fn apply(&mut self, command: ConsoleCommand) -> Result<Vec<String>, ConsoleError> {
        match command {
            ConsoleCommand::Join { name } => {
                if self.agents.contains_key(&name) {
                    return Ok(vec![format!("{name} is already here")]);
                }
                let agent =
                    ClientAgent::join(&self.authority, Identity::new(), name.clone(), self.clock.clone())
                        .await?;
                let line = format!("{name} joined as {}", agent.identity());
                self.agents.insert(name, agent);
                Ok(vec![line])
            }
            ConsoleCommand::Leave { name } => match self.agents.remove(&name) {
                Some(agent) => {
                    agent.leave().await?;
                    Ok(vec![format!("{name} left")])
                }
                None => Err(ConsoleError::UnknownParticipant(name)),
            },
            ConsoleCommand::Say {
                name,
                channel,
                text,
            } => {
                let agent = self.agent_mut(&name)?;
                agent.send_message(text, channel).await?;
                Ok(Vec::new())
            }
            ConsoleCommand::Whisper { from, to, text } => {
                let target = self.identity_of(&to)?;
                self.agent_mut(&from)?.send_whisper(target, text).await?;
                Ok(Vec::new())
            }
            ConsoleCommand::Near { name, text } => {
                self.agent_mut(&name)?.send_proximity(text).await?;
                Ok(Vec::new())
            }
            ConsoleCommand::Position { name, position } => {
                let identity = self.identity_of(&name)?;
                self.authority
                    .update_position(identity, Some(position))
                    .await?;
                Ok(vec![format!(
                    "{name} moved to ({}, {}, {})",
                    position.x, position.y, position.z
                )])
            }
            ConsoleCommand::Mute { name, target } => {
                let target_id = self.identity_of(&target)?;
                let changed = self.agent_mut(&name)?.mute(target_id);
                Ok(vec![if changed {
                    format!("{name} muted {target}")
                } else {
                    format!("{name} did not mute {target}")
                }])
            }
            ConsoleCommand::Unmute { name, target } => {
                let target_id = self.identity_of(&target)?;
                let changed = self.agent_mut(&name)?.unmute(&target_id);
                Ok(vec![if changed {
                    format!("{name} unmuted {target}")
                } else {
                    format!("{name} had not muted {target}")
                }])
            }
            ConsoleCommand::System { text } => {
                self.authority.broadcast_system(text, Color::YELLOW).await?;
                Ok(Vec::new())
            }
            ConsoleCommand::History { count } => {
                let messages = self.authority.recent_messages(count.unwrap_or(0)).await?;
                if messages.is_empty() {
                    return Ok(vec!["(history is empty)".to_string()]);
                }
                Ok(messages.iter().map(format_message).collect())
            }
            ConsoleCommand::Settings => {
                let settings = self.authority.settings().await?;
                Ok(vec![format!("{settings:?}")])
            }
            ConsoleCommand::Cooldown { secs } => {
                let mut settings = self.authority.settings().await?;
                settings.message_cooldown_secs = secs;
                self.authority.set_settings(settings).await?;
                for agent in self.agents.values_mut() {
                    agent.refresh_settings().await?;
                }
                Ok(vec![format!("cooldown set to {secs}s")])
            }
            ConsoleCommand::Help => Ok(HELP.lines().map(str::to_string).collect()),
            ConsoleCommand::Quit => Ok(Vec::new()),
        }
    }

    fn agent_mut(&mut self, name: &str) -> Result<&mut ClientAgent, ConsoleError> {
        self.agents
            .get_mut(name)
            .ok_or_else(|| ConsoleError::UnknownParticipant(name.to_string()))
    }

    fn identity_of(&self, name: &str) -> Result<Identity, ConsoleError> {
        self.agents
            .get(name)
            .map(ClientAgent::identity)
            .ok_or_else(|| ConsoleError::UnknownParticipant(name.to_string()))
    }
}

/// Reads commands from stdin until `/quit` or end of input.
pub async fn run(mut console: Console) -> std::io::Result<()> {
    println!("chat console ready; /help lists commands");
    let mut lines = BufReader::new(tokio::io::stdin()).lines();

    while let Some(line) = lines.next_line().await? {
        if line.trim().is_empty() {
            continue;
        }
        let command = match ConsoleCommand::parse(&line) {
            Ok(command) => command,
            Err(err) => {
                println!("error: {err}");
                continue;
            }
        };
        let quit = command == ConsoleCommand::Quit;
        for output in console.execute(command).await {
            println!("{output}");
        }
        if quit {
            break;
        }
    }

    console.shutdown().await;
    Ok(())
}

pub fn format_message(message: &ChatMessage) -> String {
    let scope = match (message.channel, message.whisper_target) {
        (Channel::Whisper, Some(target)) => format!("whisper to {target}"),
        (channel, _) => channel.to_string(),
    };
    format!(
        "{} [{scope}] {}: {}",
        message.formatted_timestamp(),
        message.sender_name,
        message.content
    )
}

fn describe(event: &ClientEvent) -> String {
    match event {
        ClientEvent::MessageReceived(message) => format_message(message),
        ClientEvent::MessageFailed { reason } => format!("failed: {reason}"),
        ClientEvent::ParticipantJoined { display_name, .. } => format!("{display_name} joined"),
        ClientEvent::ParticipantLeft { display_name, .. } => format!("{display_name} left"),
        ClientEvent::MuteStatusChanged { identity, muted } => {
            format!("{identity} {}", if *muted { "muted" } else { "unmuted" })
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::authority::{AuthorityService, ChatAuthority, ServiceOptions};
    use crate::clock::SystemClock;
    use crate::common::ChatSettings;

    fn console() -> Console {
        let clock: Arc<dyn Clock> = Arc::new(SystemClock);
        let settings = ChatSettings {
            message_cooldown_secs: 0.0,
            ..ChatSettings::default()
        };
        let authority = ChatAuthority::new(settings, clock.clone()).unwrap();
        let (handle, _task) = AuthorityService::spawn(authority, ServiceOptions::default());
        Console::new(handle, clock)
    }

    async fn run_line(console: &mut Console, line: &str) -> Vec<String> {
        console.execute(ConsoleCommand::parse(line).unwrap()).await
    }

    #[tokio::test]
    async fn whisper_shows_up_for_both_ends_only() {
        let mut console = console();
        run_line(&mut console, "/join alice").await;
        run_line(&mut console, "/join bob").await;
        run_line(&mut console, "/join carol").await;

        let out = run_line(&mut console, "/whisper alice bob psst").await;
        assert_eq!(out.len(), 2);
        assert!(out.iter().any(|line| line.starts_with("[alice]") && line.ends_with("alice: psst")));
        assert!(out.iter().any(|line| line.starts_with("[bob]") && line.ends_with("alice: psst")));
    }

    #[tokio::test]
    async fn unknown_names_are_reported() {
        let mut console = console();
        let out = run_line(&mut console, "/say ghost boo").await;
        assert_eq!(out, vec!["error: no participant named `ghost`".to_string()]);
    }
}
