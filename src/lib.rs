pub mod commands;
pub mod data;
pub mod duration;
pub mod handlers;
pub mod logging;
pub mod moderation;
pub mod settings;

pub const BOT_NAME: &str = "raidguard";
pub const COMMAND_TARGET: &str = "raidguard::command";
pub const ERROR_TARGET: &str = "raidguard::error";
pub const EVENT_TARGET: &str = "raidguard::handlers";
pub const MODERATION_TARGET: &str = "raidguard::moderation";
pub const CONSOLE_TARGET: &str = "raidguard";

pub use data::{Data, DataInner};
pub use settings::Settings;

pub type Error = Box<dyn std::error::Error + Send + Sync>;
pub type Context<'a> = poise::Context<'a, Data, Error>;
