use std::collections::HashMap;
use std::io::Write;

use rhea_chat::client::{ChatClient, ClientCommand, ClientUpdate};
use rhea_chat::config::ClientConfig;
use rhea_chat::conversation::{Change, ConversationMachine};
use rhea_chat::models::{MessageId, MessageRole};
use tokio::io::{AsyncBufReadExt, BufReader};
use tokio::sync::mpsc;
use tracing::info;

const HELP: &str = "Commands: /fast, /status, /clear, /trim <percent>, /key <event>, /events, /quit";

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    // Load .env if present (development convenience)
    dotenvy::dotenv().ok();

    // Logs go to stderr so they never interleave with streamed replies
    tracing_subscriber::fmt()
        .with_writer(std::io::stderr)
        .with_env_filter(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| "rhea_chat=info".into()),
        )
        .init();

    let config = ClientConfig::from_env();
    info!("Connecting to {}", config.ws_url);
    println!("{HELP}");

    let (tx, rx) = mpsc::unbounded_channel();
    tokio::spawn(read_commands(tx));

    let mut printer = StreamPrinter::default();
    ChatClient::new(config)
        .run(rx, |conversation, update| printer.render(conversation, update))
        .await;
    Ok(())
}

/// Turns stdin lines into client commands until EOF or `/quit`.
async fn read_commands(tx: mpsc::UnboundedSender<ClientCommand>) -> anyhow::Result<()> {
    let mut lines = BufReader::new(tokio::io::stdin()).lines();

    while let Some(line) = lines.next_line().await? {
        let command = match parse_command(&line) {
            Some(command) => command,
            None => continue,
        };
        let quit = command == ClientCommand::Shutdown;
        if tx.send(command).is_err() || quit {
            return Ok(());
        }
    }
    let _ = tx.send(ClientCommand::Shutdown);
    Ok(())
}

fn parse_command(line: &str) -> Option<ClientCommand> {
    let line = line.trim();
    match line.split_once(' ').map_or((line, ""), |(head, rest)| (head, rest.trim())) {
        ("", _) => None,
        ("/quit" | "/exit", _) => Some(ClientCommand::Shutdown),
        ("/fast", _) => Some(ClientCommand::ToggleFastMode),
        ("/status", _) => Some(ClientCommand::RefreshStatus),
        ("/clear", _) => Some(ClientCommand::ClearContext),
        ("/trim", pct) => match pct.parse::<u8>() {
            Ok(pct) if pct <= 100 => Some(ClientCommand::TrimContext(pct)),
            _ => {
                eprintln!("Usage: /trim <0-100>");
                None
            }
        },
        ("/key", "") => {
            eprintln!("Usage: /key <event>");
            None
        }
        ("/key", event) => Some(ClientCommand::AddKeyEvent(event.to_string())),
        ("/events", _) => Some(ClientCommand::ListKeyEvents),
        (cmd, _) if cmd.starts_with('/') => {
            eprintln!("Unknown command {cmd}. {HELP}");
            None
        }
        _ => Some(ClientCommand::Submit(line.to_string())),
    }
}

/// Prints assistant text as it grows, remembering how much of each message
/// is already on screen.
#[derive(Default)]
struct StreamPrinter {
    printed: HashMap<MessageId, usize>,
}

impl StreamPrinter {
    fn render(&mut self, conversation: &ConversationMachine, update: &ClientUpdate) {
        match update {
            ClientUpdate::Conversation(effects) => {
                for change in &effects.changes {
                    match change {
                        Change::Cleared => {
                            self.printed.clear();
                            println!("-- context cleared --");
                        }
                        Change::Appended(id) | Change::Updated(id) => self.print_message(conversation, *id),
                    }
                }
            }
            ClientUpdate::Connection(state) => eprintln!("[connection {state}]"),
            ClientUpdate::Notice(notice) => println!("[{notice}]"),
            ClientUpdate::Status(status) => eprintln!("[context {}]", status.summary()),
            ClientUpdate::Trimmed(outcome) => println!(
                "[context trimmed: {} messages kept, {:.1}% used]",
                outcome.remaining_messages, outcome.current_usage_percentage
            ),
            ClientUpdate::KeyEvents(events) => {
                if let Some(message) = &events.message {
                    println!("[{message}]");
                }
                println!("Key events:\n{}", events.formatted());
            }
            ClientUpdate::Characters(pair) => {
                if let Some(name) = pair.assistant_name() {
                    eprintln!("[chatting with {name}]");
                }
            }
            ClientUpdate::Rejected(e) | ClientUpdate::AuxiliaryFailed(e) => eprintln!("[{e}]"),
        }
    }

    fn print_message(&mut self, conversation: &ConversationMachine, id: MessageId) {
        let Some(message) = conversation.conversation().get(id) else {
            return;
        };
        if message.role == MessageRole::User {
            return;
        }
        let printed = self.printed.entry(id).or_insert(0);
        if *printed == 0 && !message.content.is_empty() {
            print!("{}: ", message.display_name());
        }
        // Finalisation trims the content, so it can shrink below what was shown.
        if let Some(tail) = message.content.get(*printed..) {
            print!("{tail}");
            *printed = message.content.len();
        }
        if !message.is_open() {
            println!();
        }
        let _ = std::io::stdout().flush();
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn parses_commands_and_text() {
        assert_eq!(parse_command("hello there"), Some(ClientCommand::Submit("hello there".into())));
        assert_eq!(parse_command("/trim 40"), Some(ClientCommand::TrimContext(40)));
        assert_eq!(parse_command("/trim 400"), None);
        assert_eq!(parse_command("   "), None);
        assert_eq!(parse_command("/quit"), Some(ClientCommand::Shutdown));
        assert_eq!(parse_command("/nope"), None);
    }

    #[test]
    fn fast_toggle_carries_no_local_state() {
        // The client decides the next value, so repeated toggles look the same.
        assert_eq!(parse_command("/fast"), Some(ClientCommand::ToggleFastMode));
        assert_eq!(parse_command("/fast"), Some(ClientCommand::ToggleFastMode));
    }

    #[test]
    fn parses_key_event_commands() {
        assert_eq!(
            parse_command("/key  The bridge collapsed "),
            Some(ClientCommand::AddKeyEvent("The bridge collapsed".into()))
        );
        assert_eq!(parse_command("/key"), None);
        assert_eq!(parse_command("/events"), Some(ClientCommand::ListKeyEvents));
    }
}
