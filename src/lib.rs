//! Authority-routed chat core.
//!
//! Clients submit through an [`AuthorityHandle`]; a single authority task
//! validates, rate-limits, archives and routes every message before any
//! [`ClientAgent`] sees it.

pub mod authority;
pub mod client;
pub mod clock;
pub mod common;
pub mod config;
pub mod console;
pub mod error;

pub use authority::{AuthorityHandle, AuthorityService, ChatAuthority, ServiceOptions};
pub use client::ClientAgent;
pub use clock::{Clock, ManualClock, SystemClock};
pub use common::{ChatMessage, ChatSettings, Channel, ClientEvent, Color, Identity, Position};
pub use error::{ChatError, ValidationError};
