pub mod commands;
pub mod events;
pub mod settings;
pub mod types;

pub use commands::ConsoleCommand;
pub use events::{ClientEvent, Inbound};
pub use settings::ChatSettings;
pub use types::{ChatMessage, Channel, Color, Identity, Position, Submission};
