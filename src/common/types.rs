use std::fmt;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use uuid::Uuid;

/// Stable key naming a participant.
///
/// Carries no connectivity or position state; those live in side tables on the
/// authority so an identity never dangles after a disconnect.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(transparent)]
pub struct Identity(Uuid);

impl Identity {
    pub fn new() -> Self {
        Self(Uuid::new_v4())
    }

    pub fn from_uuid(uuid: Uuid) -> Self {
        Self(uuid)
    }

    pub fn as_uuid(&self) -> &Uuid {
        &self.0
    }
}

impl Default for Identity {
    fn default() -> Self {
        Self::new()
    }
}

impl fmt::Display for Identity {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let simple = self.0.simple().to_string();
        f.write_str(&simple[..8])
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum Channel {
    Global,
    Team,
    Whisper,
    System,
    Proximity,
    Custom,
}

impl Channel {
    /// Display colour for the channel; `None` means the message picks its own.
    pub fn default_color(self) -> Option<Color> {
        match self {
            Channel::Global => Some(Color::WHITE),
            Channel::Team => Some(Color::rgb(0.0, 0.8, 1.0)),
            Channel::Whisper => Some(Color::rgb(1.0, 0.5, 1.0)),
            Channel::System => Some(Color::YELLOW),
            Channel::Proximity => Some(Color::rgb(0.5, 1.0, 0.5)),
            Channel::Custom => None,
        }
    }
}

impl fmt::Display for Channel {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let name = match self {
            Channel::Global => "global",
            Channel::Team => "team",
            Channel::Whisper => "whisper",
            Channel::System => "system",
            Channel::Proximity => "proximity",
            Channel::Custom => "custom",
        };
        f.write_str(name)
    }
}

/// Linear RGBA display hint.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct Color {
    pub r: f32,
    pub g: f32,
    pub b: f32,
    pub a: f32,
}

impl Color {
    pub const WHITE: Color = Color::rgb(1.0, 1.0, 1.0);
    pub const YELLOW: Color = Color::rgb(1.0, 1.0, 0.0);

    pub const fn rgb(r: f32, g: f32, b: f32) -> Self {
        Self { r, g, b, a: 1.0 }
    }
}

impl Default for Color {
    fn default() -> Self {
        Color::WHITE
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Default, Serialize, Deserialize)]
pub struct Position {
    pub x: f64,
    pub y: f64,
    pub z: f64,
}

impl Position {
    pub fn new(x: f64, y: f64, z: f64) -> Self {
        Self { x, y, z }
    }

    pub fn distance_squared(&self, other: &Position) -> f64 {
        let dx = self.x - other.x;
        let dy = self.y - other.y;
        let dz = self.z - other.z;
        dx * dx + dy * dy + dz * dz
    }
}

/// A committed chat message. Built and frozen by the authority; recipients get
/// their own copy.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ChatMessage {
    pub id: Uuid,
    /// `None` only for system messages.
    pub sender: Option<Identity>,
    /// Cached so the name survives the sender leaving.
    pub sender_name: String,
    pub content: String,
    pub channel: Channel,
    pub timestamp: DateTime<Utc>,
    pub color: Color,
    pub whisper_target: Option<Identity>,
}

impl ChatMessage {
    pub fn formatted_timestamp(&self) -> String {
        self.timestamp.format("%H:%M:%S").to_string()
    }

    pub fn display_color(&self) -> Color {
        self.channel.default_color().unwrap_or(self.color)
    }

    pub fn is_system(&self) -> bool {
        self.sender.is_none()
    }
}

/// What a client hands to the authority. The sender is never part of the
/// payload; the authority takes it from the caller bound to the handle.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Submission {
    pub content: String,
    pub channel: Channel,
    pub whisper_target: Option<Identity>,
}

impl Submission {
    pub fn new(content: impl Into<String>, channel: Channel) -> Self {
        Self {
            content: content.into(),
            channel,
            whisper_target: None,
        }
    }

    pub fn whisper(target: Identity, content: impl Into<String>) -> Self {
        Self {
            content: content.into(),
            channel: Channel::Whisper,
            whisper_target: Some(target),
        }
    }
}
