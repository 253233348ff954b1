pub(crate) mod command;
pub(crate) mod flash;

pub use self::command::{Args, Command, FlashArgs, LogLevel, OutputFormat};
