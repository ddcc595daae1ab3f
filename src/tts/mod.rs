//! Speech synthesis engine boundary.

pub mod command;
pub mod engine;

pub use command::{CommandExecutor, CommandSpeechEngine, SpeechSettings, SystemCommandExecutor};
pub use engine::{MockSpeechEngine, SilentSpeechEngine, SpeechEngine};
