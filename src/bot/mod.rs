//! Chat side of the bot: update ingestion, dispatch and command handlers.

pub mod app;
pub mod commands;
pub mod dispatcher;
pub mod queue;
pub mod speech;
pub mod transport;
pub mod update;


pub use app::{BotApp, Lifecycle, Mode};
pub use commands::{Handlers, HandlerError};
pub use queue::{EnqueueError, UpdateQueue};
pub use speech::{SpeechError, SpeechToText};
pub use transport::{ChatTransport, SendOptions, TelegramTransport, TransportError};
pub use update::Update;
