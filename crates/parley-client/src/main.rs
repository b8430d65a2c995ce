//! Parley command-line client.
//!
//! # Usage
//!
//! ```bash
//! # Create a conversation and hand its key to the peer
//! parley new "Alice"
//! parley key 1700000000000 generate
//! parley key 1700000000000 show
//!
//! # Talk
//! parley send 1700000000000 "hello"
//! parley watch 1700000000000
//! ```

use std::{
    io::{self, Write},
    path::PathBuf,
    time::Duration,
};

use clap::{Parser, Subcommand};
use parley_client::{
    ConversationSession, DEFAULT_SERVER_URL, HttpFeed, Messenger, MessengerConfig, SessionEvent,
    SystemEnv,
};
use parley_core::{ConversationId, DecryptStatus, Message, RedbStorage, Sender};
use tracing_subscriber::{EnvFilter, fmt, layer::SubscriberExt, util::SubscriberInitExt};

type Session = ConversationSession<RedbStorage, SystemEnv, HttpFeed>;

/// End-to-end encrypted two-party messenger
#[derive(Parser, Debug)]
#[command(name = "parley")]
#[command(about = "End-to-end encrypted messaging over an untrusted relay")]
#[command(version)]
struct Args {
    /// Path to the local database
    #[arg(short, long, default_value = "parley.redb")]
    data: PathBuf,

    /// Base URL of the message feed server
    #[arg(short, long, default_value = DEFAULT_SERVER_URL)]
    server: String,

    /// Seconds between feed polls while watching
    #[arg(long, default_value = "8")]
    poll_secs: u64,

    /// Log level (trace, debug, info, warn, error)
    #[arg(long, default_value = "info")]
    log_level: String,

    #[command(subcommand)]
    command: Command,
}

#[derive(Subcommand, Debug)]
enum Command {
    /// List conversations
    Chats,

    /// Create a conversation
    New {
        /// Display name
        name: String,
    },

    /// Delete a conversation with its key and messages
    Delete {
        /// Conversation id
        id: String,
    },

    /// Send a message
    Send {
        /// Conversation id
        id: String,
        /// Message text
        text: String,
    },

    /// Print the conversation and follow new messages until interrupted
    Watch {
        /// Conversation id
        id: String,
    },

    /// Manage the conversation key
    Key {
        /// Conversation id
        id: String,
        #[command(subcommand)]
        action: KeyAction,
    },
}

#[derive(Subcommand, Debug)]
enum KeyAction {
    /// Print status and the exported key
    Show,
    /// Replace the key with a random one
    Generate,
    /// Use a base64 key received from the peer
    Import {
        /// Base64 key
        key: String,
    },
    /// Derive the key from a passphrase shared with the peer
    Passphrase {
        /// At least 12 characters
        passphrase: String,
    },
    /// Forget the shared key and return to the insecure fallback
    Clear,
}

#[tokio::main]
async fn main() -> Result<(), Box<dyn std::error::Error>> {
    let args = Args::parse();
    let filter =
        EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new(&args.log_level));

    tracing_subscriber::registry().with(fmt::layer().with_writer(io::stderr)).with(filter).init();

    let storage = RedbStorage::open(&args.data)?;
    let config = MessengerConfig {
        poll_interval: Duration::from_secs(args.poll_secs.max(1)),
        ..Default::default()
    };
    let messenger = Messenger::new(storage, SystemEnv::new(), HttpFeed::new(args.server), config);

    let mut out = io::stdout().lock();
    match args.command {
        Command::Chats => {
            for conversation in messenger.conversations()? {
                let lock = if messenger.has_shared_key(&conversation.id)? { "🔒" } else { "  " };
                writeln!(out, "{lock} {}  {}", conversation.id, conversation.name)?;
            }
        },
        Command::New { name } => {
            let conversation = messenger.create_conversation(&name)?;
            writeln!(out, "{}", conversation.id)?;
        },
        Command::Delete { id } => {
            if !messenger.delete_conversation(&ConversationId::new(id)).await? {
                writeln!(out, "no such conversation")?;
            }
        },
        Command::Send { id, text } => {
            let session = messenger.open(&ConversationId::new(id)).await?;
            session.send(&text).await?;
            session.close();
        },
        Command::Watch { id } => {
            let id = ConversationId::new(id);
            let mut events = messenger.subscribe();
            let session = messenger.open(&id).await?;

            let mut shown = print_new(&mut out, &session, 0)?;
            loop {
                tokio::select! {
                    _ = tokio::signal::ctrl_c() => break,
                    event = events.recv() => match event {
                        Ok(SessionEvent::MessagesUpdated { conversation_id }) if conversation_id == id => {
                            shown = print_new(&mut out, &session, shown)?;
                        },
                        Ok(SessionEvent::ConversationDeleted { conversation_id }) if conversation_id == id => break,
                        Ok(_) | Err(tokio::sync::broadcast::error::RecvError::Lagged(_)) => {},
                        Err(tokio::sync::broadcast::error::RecvError::Closed) => break,
                    },
                }
            }
            session.close();
        },
        Command::Key { id, action } => {
            let session = messenger.open(&ConversationId::new(id)).await?;
            let status = match action {
                KeyAction::Show => session.key_status().await,
                KeyAction::Generate => session.generate_random_key().await?,
                KeyAction::Import { key } => session.import_key(&key).await?,
                KeyAction::Passphrase { passphrase } => {
                    session.derive_from_passphrase(&passphrase).await?
                },
                KeyAction::Clear => session.clear_key().await?,
            };

            writeln!(out, "status: {status:?}")?;
            if let Some(exported) = session.export_key().await {
                writeln!(out, "key:    {exported}")?;
            }
            session.close();
        },
    }

    Ok(())
}

/// Print messages past the first `shown`. Returns the new count.
fn print_new(out: &mut impl Write, session: &Session, shown: usize) -> io::Result<usize> {
    let messages = session.messages().map_err(io::Error::other)?;
    for message in messages.iter().skip(shown) {
        writeln!(out, "{}", render(message))?;
    }
    Ok(messages.len().max(shown))
}

fn render(message: &Message) -> String {
    let who = match message.sender {
        Sender::Me => "me  ",
        Sender::Peer => "peer",
    };
    let body = match (&message.decrypt_status, &message.plaintext) {
        (DecryptStatus::Ok, Some(text)) => text.as_str(),
        (DecryptStatus::Failed, _) => "[unable to decrypt]",
        _ => "[decrypting…]",
    };
    format!("[{}] {who}: {body}", message.timestamp_ms)
}
