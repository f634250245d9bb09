//! Route table and per-intent handlers.

use std::sync::{Arc, LazyLock};

use regex::Regex;
use teloxide::utils::html;
use thiserror::Error;
use tracing::{error, info, warn};

use super::speech::{SpeechError, SpeechToText};
use super::transport::{ChatTransport, SendOptions, TransportError};
use super::update::{IncomingMessage, Sender, Update, UpdateKind};
use crate::backend::proxy::TRY_AGAIN_REPLY;
use crate::backend::{ChatBackend, ModelRegistry, RegistryError};
use crate::config::Config;
use crate::storage::{StorageError, UserRepository};

pub const WAIT_REPLY: &str = "The answer usually takes 10-15 seconds.\n\
     - Command list: /help\n\
     - Report a bug: /bug_report";
pub const VOICE_WAIT_REPLY: &str = "Please wait :)\nA three-minute recording takes about 30 seconds";
pub const VOICE_NOT_FOUND_REPLY: &str = "Voice message not found";
pub const VOICE_DISABLED_REPLY: &str = "Voice recognition is not configured";

static COMMAND_RE: LazyLock<Regex> =
    LazyLock::new(|| Regex::new(r"^/([A-Za-z0-9_]+)(?:@\w+)?(?:\s|$)").unwrap());

#[derive(Debug, Error)]
pub enum HandlerError {
    #[error(transparent)]
    Transport(#[from] TransportError),
    #[error(transparent)]
    Storage(#[from] StorageError),
    #[error(transparent)]
    Speech(#[from] SpeechError),
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Command {
    Start,
    Help,
    Website,
    BugReport,
}

impl Command {
    fn parse(name: &str) -> Option<Self> {
        match name {
            "start" => Some(Command::Start),
            "help" => Some(Command::Help),
            "website" => Some(Command::Website),
            "bug_report" => Some(Command::BugReport),
            _ => None,
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Intent {
    Start,
    Help,
    Website,
    BugReport,
    AboutMe,
    Github,
    AboutBot,
    AskQuestion,
    VoiceRecognize,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Trigger {
    Command(Command),
    Callback(&'static str),
    /// Plain text that is not a command.
    Text,
    /// Voice note or audio file.
    Voice,
}

#[derive(Debug, Clone)]
pub struct Route {
    pub trigger: Trigger,
    pub intent: Intent,
}

/// Ordered route table; the first matching route wins.
pub fn build_routes() -> Vec<Route> {
    let route = |trigger, intent| Route { trigger, intent };
    vec![
        route(Trigger::Command(Command::Help), Intent::Help),
        route(Trigger::Command(Command::Website), Intent::Website),
        route(Trigger::Command(Command::BugReport), Intent::BugReport),
        route(Trigger::Text, Intent::AskQuestion),
        route(Trigger::Voice, Intent::VoiceRecognize),
        route(Trigger::Command(Command::Start), Intent::Start),
        route(Trigger::Callback("about_me"), Intent::AboutMe),
        route(Trigger::Callback("website"), Intent::Website),
        route(Trigger::Callback("github"), Intent::Github),
        route(Trigger::Callback("about_bot"), Intent::AboutBot),
    ]
}

impl Trigger {
    fn matches(&self, update: &Update) -> bool {
        match (self, &update.kind) {
            (Trigger::Command(cmd), UpdateKind::Message(msg)) => parse_command(msg) == Some(*cmd),
            (Trigger::Text, UpdateKind::Message(msg)) => {
                msg.text.as_deref().is_some_and(|t| !COMMAND_RE.is_match(t))
            }
            (Trigger::Voice, UpdateKind::Message(msg)) => msg.voice_file_id.is_some(),
            (Trigger::Callback(name), UpdateKind::CallbackQuery(q)) => q.data.as_deref() == Some(*name),
            _ => false,
        }
    }
}

fn parse_command(msg: &IncomingMessage) -> Option<Command> {
    let text = msg.text.as_deref()?;
    let caps = COMMAND_RE.captures(text)?;
    Command::parse(&caps[1])
}

pub fn resolve(routes: &[Route], update: &Update) -> Option<Intent> {
    routes.iter().find(|r| r.trigger.matches(update)).map(|r| r.intent)
}

fn main_keyboard() -> Vec<Vec<(&'static str, &'static str)>> {
    vec![
        vec![("About me", "about_me"), ("Web version", "website")],
        vec![("GitHub", "github"), ("About the bot", "about_bot")],
    ]
}

/// Everything a handler needs, assembled once at startup.
pub struct Handlers {
    config: Arc<Config>,
    transport: Arc<dyn ChatTransport>,
    registry: ModelRegistry,
    backend: Arc<dyn ChatBackend>,
    users: UserRepository,
    speech: Option<Arc<SpeechToText>>,
    routes: Vec<Route>,
}

impl Handlers {
    pub fn new(
        config: Arc<Config>,
        transport: Arc<dyn ChatTransport>,
        registry: ModelRegistry,
        backend: Arc<dyn ChatBackend>,
        users: UserRepository,
        speech: Option<Arc<SpeechToText>>,
    ) -> Self {
        Self { config, transport, registry, backend, users, speech, routes: build_routes() }
    }

    /// Run the handler for one update. Updates matching no route are ignored.
    pub async fn handle(&self, update: Update) -> Result<(), HandlerError> {
        let Some(intent) = resolve(&self.routes, &update) else {
            return Ok(());
        };
        let Some(chat_id) = update.chat_id() else {
            warn!(update_id = update.id, "update without a chat, skipping");
            return Ok(());
        };

        match (intent, &update.kind) {
            (Intent::Start, _) => self.start(chat_id).await,
            (Intent::Help, _) => self.help(chat_id, update.sender()).await,
            (Intent::Website, _) => self.website(chat_id, update.sender()).await,
            (Intent::BugReport, _) => self.bug_report(chat_id, update.sender()).await,
            (Intent::AboutMe, _) => self.about_me(chat_id).await,
            (Intent::Github, _) => self.github(chat_id).await,
            (Intent::AboutBot, _) => self.about_bot(chat_id).await,
            (Intent::AskQuestion, UpdateKind::Message(msg)) => self.ask_question(msg).await,
            (Intent::VoiceRecognize, UpdateKind::Message(msg)) => self.voice_recognize(msg).await,
            (Intent::AskQuestion | Intent::VoiceRecognize, UpdateKind::CallbackQuery(_)) => Ok(()),
        }
    }

    async fn reply(&self, chat_id: i64, text: &str) -> Result<(), HandlerError> {
        self.transport.send_message(chat_id, text, SendOptions::default()).await?;
        Ok(())
    }

    /// Replies with the ban notice and returns false for banned senders.
    async fn ensure_not_banned(&self, chat_id: i64, sender: Option<&Sender>) -> Result<bool, HandlerError> {
        let Some(sender) = sender else {
            return Ok(true);
        };
        let status = self.users.ban_status(sender.id)?;
        if !status.is_banned {
            return Ok(true);
        }
        info!(user_id = sender.id, "refusing banned user");
        let reason = status.ban_reason.unwrap_or_default();
        self.reply(chat_id, &format!("You have been banned. Reason: {reason}")).await?;
        Ok(false)
    }

    async fn start(&self, chat_id: i64) -> Result<(), HandlerError> {
        let options = SendOptions::default().with_keyboard(main_keyboard());
        self.transport.send_message(chat_id, "Choose a command:", options).await?;
        self.reply(chat_id, "You can always get this list by typing /help").await
    }

    async fn help(&self, chat_id: i64, sender: Option<&Sender>) -> Result<(), HandlerError> {
        if !self.ensure_not_banned(chat_id, sender).await? {
            return Ok(());
        }
        let options = SendOptions::default().with_keyboard(main_keyboard()).silent();
        self.transport.send_message(chat_id, "List of main commands:", options).await?;
        Ok(())
    }

    async fn website(&self, chat_id: i64, sender: Option<&Sender>) -> Result<(), HandlerError> {
        if !self.ensure_not_banned(chat_id, sender).await? {
            return Ok(());
        }
        self.reply(chat_id, &format!("Web version: {}", self.config.website_url())).await
    }

    async fn bug_report(&self, chat_id: i64, sender: Option<&Sender>) -> Result<(), HandlerError> {
        if !self.ensure_not_banned(chat_id, sender).await? {
            return Ok(());
        }
        let Some(admin_chat_id) = self.config.admin_chat_id else {
            return Ok(());
        };
        let who = sender.map_or_else(|| "unknown".to_string(), |s| format!("{} (id {})", s.display_name(), s.id));
        self.reply(admin_chat_id, &format!("Bug report from user: {who}")).await?;
        self.reply(
            chat_id,
            "Thanks for the bug report.\nYou can try the web version /website and pick a different GPT model",
        )
        .await
    }

    async fn about_me(&self, chat_id: i64) -> Result<(), HandlerError> {
        let text = format!(
            "Bot author: <b>{}</b>\n\nTg nickname: <b>{}</b>",
            html::escape(&self.config.author_name),
            html::escape(&self.config.author_nickname)
        );
        self.transport.send_message(chat_id, &text, SendOptions::html()).await?;
        Ok(())
    }

    async fn github(&self, chat_id: i64) -> Result<(), HandlerError> {
        let text = format!("Project on <a href=\"{}\">GitHub</a>", html::escape(&self.config.github_url));
        self.transport.send_message(chat_id, &text, SendOptions::html()).await?;
        Ok(())
    }

    async fn about_bot(&self, chat_id: i64) -> Result<(), HandlerError> {
        let text = match self.registry.current() {
            Ok(model) => format!(
                "The bot uses the free model <b>{}</b> to answer questions.\nQuestions in different languages are accepted.",
                html::escape(&model)
            ),
            Err(e) => {
                warn!("No current model for about_bot: {e}");
                html::escape(TRY_AGAIN_REPLY)
            }
        };
        self.transport.send_message(chat_id, &text, SendOptions::html()).await?;
        Ok(())
    }

    async fn current_answer(&self, question: &str) -> String {
        match self.registry.current() {
            Ok(model) => self.backend.ask(question, &model).await.user_text().to_string(),
            Err(RegistryError::NoModelConfigured) => {
                warn!("question received but no chat model is configured");
                TRY_AGAIN_REPLY.to_string()
            }
            Err(e) => {
                error!("failed to resolve current chat model: {e}");
                TRY_AGAIN_REPLY.to_string()
            }
        }
    }

    async fn ask_question(&self, msg: &IncomingMessage) -> Result<(), HandlerError> {
        let Some(question) = msg.text.as_deref() else {
            return Ok(());
        };
        if !self.ensure_not_banned(msg.chat_id, msg.from.as_ref()).await? {
            return Ok(());
        }
        self.reply(msg.chat_id, WAIT_REPLY).await?;
        info!(chat_id = msg.chat_id, "question asked");

        let (answer, user) = tokio::join!(self.current_answer(question), async {
            msg.from.as_ref().map(|s| self.users.get_or_create(&s.to_new_user())).transpose()
        });

        let (sent, counted) = tokio::join!(self.reply(msg.chat_id, &answer), async {
            match user {
                Ok(Some(user)) => self.users.increment_question_count(user.id),
                Ok(None) => Ok(()),
                Err(e) => Err(e),
            }
        });
        sent?;
        counted?;
        Ok(())
    }

    async fn voice_recognize(&self, msg: &IncomingMessage) -> Result<(), HandlerError> {
        let Some(file_id) = msg.voice_file_id.as_deref() else {
            return self.reply(msg.chat_id, VOICE_NOT_FOUND_REPLY).await;
        };
        let Some(speech) = self.speech.as_ref() else {
            return self.reply(msg.chat_id, VOICE_DISABLED_REPLY).await;
        };
        self.reply(msg.chat_id, VOICE_WAIT_REPLY).await?;

        let audio = self.transport.download_file(file_id).await?;
        info!(chat_id = msg.chat_id, bytes = audio.len(), "voice note downloaded");
        for part in speech.transcribe(audio).await? {
            self.reply(msg.chat_id, &part).await?;
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::bot::update::CallbackQuery;
    use chrono::Utc;

    fn message(text: Option<&str>, voice: Option<&str>) -> Update {
        Update {
            id: 1,
            kind: UpdateKind::Message(IncomingMessage {
                message_id: 1,
                chat_id: 10,
                from: None,
                text: text.map(str::to_string),
                voice_file_id: voice.map(str::to_string),
                date: Utc::now(),
            }),
        }
    }

    fn callback(data: &str) -> Update {
        Update {
            id: 1,
            kind: UpdateKind::CallbackQuery(CallbackQuery {
                from: Sender { id: 1, username: None, first_name: "A".into(), last_name: None },
                chat_id: Some(10),
                data: Some(data.to_string()),
            }),
        }
    }

    #[test]
    fn test_commands_resolve() {
        let routes = build_routes();
        assert_eq!(resolve(&routes, &message(Some("/help"), None)), Some(Intent::Help));
        assert_eq!(resolve(&routes, &message(Some("/start"), None)), Some(Intent::Start));
        assert_eq!(resolve(&routes, &message(Some("/bug_report"), None)), Some(Intent::BugReport));
        assert_eq!(resolve(&routes, &message(Some("/website@GptBot"), None)), Some(Intent::Website));
    }

    #[test]
    fn test_unknown_command_is_not_a_question() {
        let routes = build_routes();
        assert_eq!(resolve(&routes, &message(Some("/unknown"), None)), None);
    }

    #[test]
    fn test_plain_text_asks_question() {
        let routes = build_routes();
        assert_eq!(resolve(&routes, &message(Some("what is rust?"), None)), Some(Intent::AskQuestion));
        assert_eq!(resolve(&routes, &message(Some("a/b"), None)), Some(Intent::AskQuestion));
    }

    #[test]
    fn test_voice_resolves() {
        let routes = build_routes();
        assert_eq!(resolve(&routes, &message(None, Some("file-1"))), Some(Intent::VoiceRecognize));
        assert_eq!(resolve(&routes, &message(None, None)), None);
    }

    #[test]
    fn test_callbacks_resolve() {
        let routes = build_routes();
        assert_eq!(resolve(&routes, &callback("about_me")), Some(Intent::AboutMe));
        assert_eq!(resolve(&routes, &callback("website")), Some(Intent::Website));
        assert_eq!(resolve(&routes, &callback("github")), Some(Intent::Github));
        assert_eq!(resolve(&routes, &callback("about_bot")), Some(Intent::AboutBot));
        assert_eq!(resolve(&routes, &callback("help")), None);
    }
}
