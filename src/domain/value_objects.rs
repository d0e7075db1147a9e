//! Value Objects - Immutable domain primitives
//!
//! Value objects are identified by their value rather than identity.
//! They are immutable and can be freely shared.

use serde::{Deserialize, Serialize};
use std::num::NonZeroU64;
use std::time::Duration;

/// Default lease for a sticky mapping when the caller passes a zero TTL.
pub const DEFAULT_STICKY_TTL: Duration = Duration::from_secs(60 * 60);

/// Key prefix for Claude Code channels (also the fallback namespace).
pub const KEY_PREFIX_CLAUDE_CODE: &str = "sticky_session:";
/// Key prefix for Gemini CLI channels.
pub const KEY_PREFIX_GEMINI_CLI: &str = "sticky_session_gemini:";
/// Key prefix for Codex channels.
pub const KEY_PREFIX_CODEX: &str = "sticky_session_codex:";

/// Kind of upstream channel a session is routed to.
///
/// Each channel type owns a disjoint key namespace, so the same session
/// fingerprint can be bound independently under every type.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ChannelType {
    ClaudeCode,
    GeminiCli,
    Codex,
    /// Any channel type without a dedicated namespace
    Other,
}

impl ChannelType {
    /// Parse a channel type from its name.
    ///
    /// Unknown names map to [`ChannelType::Other`].
    ///
    /// # Examples
    /// ```
    /// use sticky_affinity::ChannelType;
    ///
    /// assert_eq!(ChannelType::from_str("codex"), ChannelType::Codex);
    /// assert_eq!(ChannelType::from_str("openai"), ChannelType::Other); // fallback
    /// ```
    pub fn from_str(s: &str) -> Self {
        match s.to_lowercase().replace('-', "_").as_str() {
            "claude_code" | "claude" => Self::ClaudeCode,
            "gemini_cli" | "gemini" => Self::GeminiCli,
            "codex" => Self::Codex,
            _ => Self::Other,
        }
    }

    /// Convert to string representation.
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::ClaudeCode => "claude_code",
            Self::GeminiCli => "gemini_cli",
            Self::Codex => "codex",
            Self::Other => "other",
        }
    }

    /// Store key prefix for this channel type.
    ///
    /// Total and pure: types without their own namespace share the
    /// Claude Code prefix.
    pub fn key_prefix(&self) -> &'static str {
        match self {
            Self::ClaudeCode => KEY_PREFIX_CLAUDE_CODE,
            Self::GeminiCli => KEY_PREFIX_GEMINI_CLI,
            Self::Codex => KEY_PREFIX_CODEX,
            Self::Other => KEY_PREFIX_CLAUDE_CODE,
        }
    }
}

impl Default for ChannelType {
    fn default() -> Self {
        Self::ClaudeCode
    }
}

impl std::fmt::Display for ChannelType {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.as_str())
    }
}

/// Identifier of a backend channel.
///
/// Zero is reserved on the wire to mean "no mapping" and can never be
/// represented by this type.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
pub struct ChannelId(NonZeroU64);

impl ChannelId {
    /// Create a channel id, returning `None` for the reserved zero value.
    pub fn new(id: u64) -> Option<Self> {
        NonZeroU64::new(id).map(Self)
    }

    pub fn get(&self) -> u64 {
        self.0.get()
    }

    /// Decode the store representation (a base-10 integer string).
    ///
    /// Returns `Ok(None)` for the legacy `"0"` encoding of "no mapping".
    pub fn decode(raw: &str) -> Result<Option<Self>, std::num::ParseIntError> {
        raw.trim().parse::<u64>().map(Self::new)
    }

    /// Encode for the store.
    pub fn encode(&self) -> String {
        self.0.get().to_string()
    }
}

impl From<NonZeroU64> for ChannelId {
    fn from(id: NonZeroU64) -> Self {
        Self(id)
    }
}

impl std::fmt::Display for ChannelId {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.0)
    }
}

/// Remaining lifetime of a store key.
///
/// The two sentinels are distinct variants rather than magic durations.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum KeyTtl {
    /// No such key (never set, deleted or already expired)
    Absent,
    /// Key exists but has no expiry
    Persistent,
    /// Key exists and expires after this duration
    Expires(Duration),
}

impl KeyTtl {
    /// Decode a Redis `PTTL` reply.
    pub fn from_pttl(ms: i64) -> Self {
        match ms {
            -1 => Self::Persistent,
            ms if ms < 0 => Self::Absent,
            ms => Self::Expires(Duration::from_millis(ms as u64)),
        }
    }

    /// Remaining duration, if the key has a finite lease.
    pub fn remaining(&self) -> Option<Duration> {
        match self {
            Self::Expires(d) => Some(*d),
            _ => None,
        }
    }

    pub fn is_absent(&self) -> bool {
        matches!(self, Self::Absent)
    }
}

impl std::fmt::Display for KeyTtl {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::Absent => write!(f, "absent"),
            Self::Persistent => write!(f, "persistent"),
            Self::Expires(d) => write!(f, "{}ms", d.as_millis()),
        }
    }
}
