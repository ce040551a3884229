//! Line-oriented terminal front-end.

use crate::commands;
use crate::composer::InputDraft;
use crate::controller::{ChatEvent, SendPhase, APOLOGY};
use crate::dictation::{ChannelRecognizer, Dictation, DictationConfig, TranscriptEvent};
use crate::error::ChatError;
use crate::models::{Profile, Role, Session};
use crate::state::AppState;
use anyhow::Result;
use std::io::Write;
use std::path::PathBuf;
use tokio::io::{AsyncBufReadExt, BufReader};
use tokio::sync::broadcast;

const HELP: &str = "\
Commands:
  /new                 start a new chat
  /list                list chats (newest first)
  /select <n>          switch to chat number n from /list
  /delete              delete the current chat
  /clear               delete all chats
  /profile <p>         thorough | fast
  /image <path>        attach an image to the next message
  /noimage             drop the attached image
  /dictate             toggle dictation; lines typed meanwhile count as speech
  /send                send the pending draft
  /help                show this help
  /quit                exit
Any other line is sent as a message.";

#[derive(Debug, Clone, PartialEq)]
pub enum Command {
    New,
    List,
    Select(usize),
    Delete,
    Clear,
    Profile(Profile),
    Image(PathBuf),
    NoImage,
    Dictate,
    Send,
    Help,
    Quit,
    Text(String),
}

pub fn parse_command(line: &str) -> Result<Command, String> {
    let trimmed = line.trim();
    if !trimmed.starts_with('/') {
        return Ok(Command::Text(line.to_string()));
    }

    let (name, arg) = match trimmed.split_once(char::is_whitespace) {
        Some((name, arg)) => (name, arg.trim()),
        None => (trimmed, ""),
    };
    let require_arg = |usage: &str| {
        if arg.is_empty() {
            Err(format!("usage: {}", usage))
        } else {
            Ok(arg)
        }
    };

    match name {
        "/new" => Ok(Command::New),
        "/list" => Ok(Command::List),
        "/select" => require_arg("/select <n>")?
            .parse::<usize>()
            .ok()
            .filter(|n| *n > 0)
            .map(Command::Select)
            .ok_or_else(|| "chat number must be a positive integer".to_string()),
        "/delete" => Ok(Command::Delete),
        "/clear" => Ok(Command::Clear),
        "/profile" => require_arg("/profile <thorough|fast>")?
            .parse::<Profile>()
            .map(Command::Profile),
        "/image" => Ok(Command::Image(PathBuf::from(require_arg("/image <path>")?))),
        "/noimage" => Ok(Command::NoImage),
        "/dictate" => Ok(Command::Dictate),
        "/send" => Ok(Command::Send),
        "/help" => Ok(Command::Help),
        "/quit" | "/exit" => Ok(Command::Quit),
        other => Err(format!("unknown command {} (try /help)", other)),
    }
}

fn print_session(session: &Session) {
    println!("── {} [{}]", session.title, session.profile);
    for message in &session.messages {
        let who = match message.role {
            Role::User => "Du",
            Role::Assistant => "Xantium",
        };
        let image = if message.image.is_some() { " [Bild]" } else { "" };
        println!("{}{}: {}", who, image, message.text);
    }
}

/// Prints streamed fragments as they are committed.
async fn render_events(mut events: broadcast::Receiver<ChatEvent>) {
    loop {
        match events.recv().await {
            Ok(ChatEvent::PhaseChanged {
                phase: SendPhase::Streaming,
                ..
            }) => {
                print!("Xantium: ");
            }
            Ok(ChatEvent::Fragment { delta, .. }) => {
                print!("{}", delta);
            }
            Ok(ChatEvent::Finished { phase, .. }) => {
                if phase == SendPhase::Failed {
                    print!("\n{}", APOLOGY);
                }
                println!();
            }
            Ok(ChatEvent::PhaseChanged { .. }) => {}
            Err(broadcast::error::RecvError::Lagged(skipped)) => {
                log::warn!("Renderer skipped {} events", skipped);
            }
            Err(broadcast::error::RecvError::Closed) => break,
        }
        let _ = std::io::stdout().flush();
    }
}

struct Terminal {
    state: AppState,
    draft: InputDraft,
    dictation: Dictation<ChannelRecognizer>,
}

impl Terminal {
    fn new(state: AppState) -> Self {
        Self {
            state,
            draft: InputDraft::new(),
            dictation: Dictation::new(ChannelRecognizer::new(), DictationConfig::default()),
        }
    }

    async fn handle(&mut self, command: Command) -> Result<bool> {
        match command {
            Command::Quit => return Ok(false),
            Command::Help => println!("{}", HELP),
            Command::New => {
                let session = commands::create_session(&self.state).await?;
                println!("Neuer Chat angelegt ({})", session.id);
            }
            Command::List => {
                let active = commands::get_active_session(&self.state).await.map(|s| s.id);
                let sessions = commands::list_sessions(&self.state).await;
                if sessions.is_empty() {
                    println!("Keine Chats vorhanden. /new startet einen.");
                }
                for (i, session) in sessions.iter().enumerate() {
                    let marker = if active.as_deref() == Some(session.id.as_str()) { '*' } else { ' ' };
                    println!(
                        "{} {:>2}. {} [{}] ({} Nachrichten)",
                        marker,
                        i + 1,
                        session.title,
                        session.profile,
                        session.messages.len()
                    );
                }
            }
            Command::Select(n) => {
                let sessions = commands::list_sessions(&self.state).await;
                match sessions.get(n - 1) {
                    Some(target) => {
                        let session = commands::select_session(&self.state, &target.id).await?;
                        print_session(&session);
                    }
                    None => println!("Es gibt keinen Chat Nummer {}", n),
                }
            }
            Command::Delete => match commands::get_active_session(&self.state).await {
                Some(session) => match commands::delete_session(&self.state, &session.id).await? {
                    Some(next) => print_session(&next),
                    None => println!("Keine Chats mehr vorhanden."),
                },
                None => println!("Kein Chat ausgewählt."),
            },
            Command::Clear => {
                commands::clear_all_sessions(&self.state).await?;
                println!("Alle Chats gelöscht.");
            }
            Command::Profile(profile) => match commands::get_active_session(&self.state).await {
                Some(session) => {
                    commands::set_session_profile(&self.state, &session.id, profile).await?;
                    println!("Profil: {}", profile);
                }
                None => println!("Kein Chat ausgewählt."),
            },
            Command::Image(path) => {
                self.draft.attach_image(&path).await?;
                println!("Bild angehängt: {}", path.display());
            }
            Command::NoImage => self.draft.clear_image(),
            Command::Dictate => {
                if self.dictation.toggle()? {
                    println!("Diktat läuft. /dictate beendet, /send schickt ab.");
                } else {
                    self.dictation.pump(&mut self.draft);
                    println!("Diktat beendet. Entwurf: {}", self.draft.text());
                }
            }
            Command::Send => self.send().await?,
            Command::Text(text) => {
                if self.dictation.is_recording() {
                    if let Some(feeder) = self.dictation.recognizer().feeder() {
                        let _ = feeder
                            .send(TranscriptEvent::Result {
                                transcript: text,
                                is_final: true,
                            })
                            .await;
                    }
                    self.dictation.pump(&mut self.draft);
                } else {
                    self.draft.append_text(&text);
                    self.send().await?;
                }
            }
        }
        Ok(true)
    }

    async fn send(&mut self) -> Result<()> {
        if self.dictation.is_recording() {
            self.dictation.pump(&mut self.draft);
            self.dictation.stop();
        }
        if commands::get_active_session(&self.state).await.is_none() {
            commands::create_session(&self.state).await?;
        }
        let outgoing = self.draft.take();
        match commands::send_message(&self.state, outgoing).await {
            Ok(outcome) => {
                log::debug!("Send finished in phase {:?}", outcome.phase);
            }
            Err(ChatError::Validation(_)) => {}
            Err(e) => return Err(e.into()),
        }
        Ok(())
    }
}

/// Reads commands from stdin until `/quit` or end of input.
pub async fn run(state: AppState) -> Result<()> {
    let renderer = tokio::spawn(render_events(state.controller.subscribe()));

    if let Some(session) = commands::get_active_session(&state).await {
        print_session(&session);
    } else {
        println!("Willkommen bei Xantium AI. /help zeigt die Befehle.");
    }

    let mut terminal = Terminal::new(state);

    let mut lines = BufReader::new(tokio::io::stdin()).lines();
    while let Some(line) = lines.next_line().await? {
        if line.trim().is_empty() {
            continue;
        }
        let command = match parse_command(&line) {
            Ok(command) => command,
            Err(message) => {
                println!("{}", message);
                continue;
            }
        };
        match terminal.handle(command).await {
            Ok(true) => {}
            Ok(false) => break,
            Err(e) => {
                log::error!("Command failed: {:#}", e);
                println!("Fehler: {}", e);
            }
        }
    }

    renderer.abort();
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::AppConfig;
    use crate::mock::{MockProvider, MockResponse};
    use crate::storage::MemoryStore;
    use std::sync::Arc;

    #[test]
    fn plain_lines_are_messages() {
        assert_eq!(
            parse_command("Hallo Welt"),
            Ok(Command::Text("Hallo Welt".to_string()))
        );
    }

    #[test]
    fn commands_with_arguments() {
        assert_eq!(parse_command("/select 2"), Ok(Command::Select(2)));
        assert_eq!(parse_command("/profile fast"), Ok(Command::Profile(Profile::Fast)));
        assert_eq!(
            parse_command("/image  ./bilder/katze.png "),
            Ok(Command::Image(PathBuf::from("./bilder/katze.png")))
        );
        assert_eq!(parse_command("/quit"), Ok(Command::Quit));
    }

    #[test]
    fn bad_commands_are_reported() {
        assert!(parse_command("/select").is_err());
        assert!(parse_command("/select 0").is_err());
        assert!(parse_command("/profile slow").is_err());
        assert!(parse_command("/frobnicate").is_err());
    }

    #[tokio::test]
    async fn dictated_text_is_kept_when_typing_afterwards() {
        let provider = Arc::new(MockProvider::new(vec![MockResponse::text(&["Gut, danke!"])]));
        let state = AppState::new(AppConfig::default(), Arc::new(MemoryStore::new()), provider.clone())
            .await
            .unwrap();
        let mut terminal = Terminal::new(state);

        for line in ["/dictate", "Hallo", "/dictate"] {
            let command = parse_command(line).unwrap();
            assert!(terminal.handle(command).await.unwrap());
        }
        assert!(!terminal.dictation.is_recording());
        assert_eq!(terminal.draft.text(), "Hallo");

        let command = parse_command("wie geht's").unwrap();
        assert!(terminal.handle(command).await.unwrap());

        let calls = provider.calls();
        assert_eq!(calls.len(), 1);
        assert_eq!(calls[0].new_text, "Hallo wie geht's");
        assert!(terminal.draft.is_empty());
    }
}
