//! Data model for the AuroraWatch UK status API.
//!
//! All types here are immutable values. A refresh produces a new [`Status`] or
//! [`Activity`] which supersedes the previous one; nothing is updated in place.

use std::collections::BTreeMap;
use std::fmt;
use std::str::FromStr;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

/// The API only ever reports the current hour and the 23 before it.
pub const MAX_ACTIVITY_VALUES: usize = 24;

/// Geomagnetic alert level.
///
/// Levels are strictly ordered `green < yellow < amber < red`; the derived
/// `Ord` follows declaration order.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum AlertLevel {
    /// No significant activity.
    Green,
    /// Minor geomagnetic activity.
    Yellow,
    /// Amber alert: possible aurora.
    Amber,
    /// Red alert: aurora likely.
    Red,
}

impl AlertLevel {
    /// Every level, in ascending order.
    pub const ALL: [AlertLevel; 4] = [
        AlertLevel::Green,
        AlertLevel::Yellow,
        AlertLevel::Amber,
        AlertLevel::Red,
    ];

    /// The identifier used by the API (`status_id` attributes).
    pub fn as_str(&self) -> &'static str {
        match self {
            AlertLevel::Green => "green",
            AlertLevel::Yellow => "yellow",
            AlertLevel::Amber => "amber",
            AlertLevel::Red => "red",
        }
    }
}

impl fmt::Display for AlertLevel {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Returned when a string is not one of the four API level identifiers.
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
#[error("unrecognised alert level '{0}'")]
pub struct UnknownLevel(pub String);

impl FromStr for AlertLevel {
    type Err = UnknownLevel;

    /// Strict parse: only the exact API identifiers are accepted.
    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "green" => Ok(AlertLevel::Green),
            "yellow" => Ok(AlertLevel::Yellow),
            "amber" => Ok(AlertLevel::Amber),
            "red" => Ok(AlertLevel::Red),
            other => Err(UnknownLevel(other.to_string())),
        }
    }
}

/// The level reported by the convenience accessors.
///
/// `Unknown` is only produced when a client is configured not to raise errors
/// and the current status could not be obtained.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum StatusLevel {
    Known(AlertLevel),
    Unknown,
}

impl StatusLevel {
    pub fn as_str(&self) -> &'static str {
        match self {
            StatusLevel::Known(level) => level.as_str(),
            StatusLevel::Unknown => "unknown",
        }
    }

    /// The underlying level, if known.
    pub fn level(&self) -> Option<AlertLevel> {
        match self {
            StatusLevel::Known(level) => Some(*level),
            StatusLevel::Unknown => None,
        }
    }
}

impl From<AlertLevel> for StatusLevel {
    fn from(level: AlertLevel) -> Self {
        StatusLevel::Known(level)
    }
}

impl PartialEq<AlertLevel> for StatusLevel {
    fn eq(&self, other: &AlertLevel) -> bool {
        self.level() == Some(*other)
    }
}

impl fmt::Display for StatusLevel {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// The documents served by the API.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum ResourceKind {
    /// Lightweight current status.
    Status,
    /// Current status plus the last 24 hourly activity values.
    Activity,
    /// Color, meaning and description of each level.
    Descriptions,
}

impl ResourceKind {
    pub fn as_str(&self) -> &'static str {
        match self {
            ResourceKind::Status => "status",
            ResourceKind::Activity => "activity",
            ResourceKind::Descriptions => "descriptions",
        }
    }

    /// Location of the document relative to the API base URL.
    pub fn path(&self) -> &'static str {
        match self {
            ResourceKind::Status => "status/current-status.xml",
            ResourceKind::Activity => "status/alerting-site-activity.xml",
            ResourceKind::Descriptions => "status-descriptions.xml",
        }
    }
}

impl fmt::Display for ResourceKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Priority attached to a broadcast message.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum MessagePriority {
    /// An alerting notification may be appropriate.
    High,
    /// A silent notification may be appropriate.
    Low,
    /// Verification messages; never shown to users.
    Test,
    /// Any priority this client does not know about. Such messages are ignored.
    Other(String),
}

impl MessagePriority {
    pub fn from_attr(value: &str) -> Self {
        match value {
            "high" => MessagePriority::High,
            "low" => MessagePriority::Low,
            "test" => MessagePriority::Test,
            other => MessagePriority::Other(other.to_string()),
        }
    }

    pub fn as_str(&self) -> &str {
        match self {
            MessagePriority::High => "high",
            MessagePriority::Low => "low",
            MessagePriority::Test => "test",
            MessagePriority::Other(other) => other,
        }
    }

    /// Only high and low priority messages are meant for display.
    pub fn is_displayable(&self) -> bool {
        matches!(self, MessagePriority::High | MessagePriority::Low)
    }
}

/// A broadcast message from AuroraWatch UK.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Message {
    /// Unique identifier, usable to remember which messages a user has seen.
    pub id: String,

    /// Message text in the selected language.
    pub description: String,

    /// After this time the message should no longer be shown.
    pub expires: DateTime<Utc>,

    pub priority: MessagePriority,

    /// Optional link with more information.
    pub url: Option<String>,
}

impl Message {
    pub fn is_expired(&self, now: DateTime<Utc>) -> bool {
        now >= self.expires
    }
}

/// The current alert status.
///
/// Prefer this over [`Activity`] when activity values are not needed; the
/// status document is much smaller.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Status {
    pub level: AlertLevel,

    /// When the server last updated the status.
    pub updated: DateTime<Utc>,

    /// Expiry declared by the server's cache directive.
    pub expires: DateTime<Utc>,

    /// Active messages, in server order. May be empty.
    pub messages: Vec<Message>,
}

impl Status {
    /// Messages meant for display: test and unknown priorities are dropped.
    pub fn displayable_messages(&self) -> impl Iterator<Item = &Message> {
        displayable(&self.messages)
    }
}

fn displayable(messages: &[Message]) -> impl Iterator<Item = &Message> {
    messages.iter().filter(|m| m.priority.is_displayable())
}

/// One hourly activity sample.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ActivityValue {
    pub level: AlertLevel,

    /// Activity in nanotesla, unrounded.
    pub value: f64,

    /// Start of the hour this value covers.
    pub datetime: DateTime<Utc>,
}

impl ActivityValue {
    /// The value rounded to 0.1 nT for display.
    ///
    /// Never derive a level from this; use [`Thresholds::level_for`] on
    /// [`ActivityValue::value`].
    pub fn rounded_value(&self) -> f64 {
        (self.value * 10.0).round() / 10.0
    }
}

impl fmt::Display for ActivityValue {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(
            f,
            "{} {:.1} nT ({})",
            self.datetime.format("%Y-%m-%d %H:%M"),
            self.rounded_value(),
            self.level
        )
    }
}

/// Lower activity threshold of each level, ascending by level.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct Thresholds(BTreeMap<AlertLevel, f64>);

impl Thresholds {
    /// Build a threshold table. Values must rise strictly with level.
    pub fn new(thresholds: BTreeMap<AlertLevel, f64>) -> Result<Self, String> {
        let mut previous: Option<(AlertLevel, f64)> = None;
        for (&level, &value) in &thresholds {
            if !value.is_finite() {
                return Err(format!("threshold for {level} is not a finite number"));
            }
            if let Some((prev_level, prev_value)) = previous {
                if value <= prev_value {
                    return Err(format!(
                        "threshold for {level} ({value}) does not exceed {prev_level} ({prev_value})"
                    ));
                }
            }
            previous = Some((level, value));
        }
        Ok(Self(thresholds))
    }

    pub fn get(&self, level: AlertLevel) -> Option<f64> {
        self.0.get(&level).copied()
    }

    /// Levels and their lower thresholds, ascending.
    pub fn iter(&self) -> impl Iterator<Item = (AlertLevel, f64)> + '_ {
        self.0.iter().map(|(level, value)| (*level, *value))
    }

    pub fn len(&self) -> usize {
        self.0.len()
    }

    pub fn is_empty(&self) -> bool {
        self.0.is_empty()
    }

    /// The level an unrounded activity value falls into.
    ///
    /// A value must equal or exceed a level's lower threshold to reach it.
    /// Below every listed threshold the level is green.
    pub fn level_for(&self, value: f64) -> AlertLevel {
        self.0
            .iter()
            .rev()
            .find(|(_, threshold)| value >= **threshold)
            .map(|(level, _)| *level)
            .unwrap_or(AlertLevel::Green)
    }
}

/// Current and recent activity.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct Activity {
    /// When the server last updated the activity.
    pub updated: DateTime<Utc>,

    /// Expiry declared by the server's cache directive.
    pub expires: DateTime<Utc>,

    pub thresholds: Thresholds,

    /// Active messages, in server order. May be empty.
    pub messages: Vec<Message>,

    values: Vec<ActivityValue>,
}

impl Activity {
    /// Build an activity record.
    ///
    /// `values` must be non-empty and in chronological order as served.
    /// Anything beyond the most recent [`MAX_ACTIVITY_VALUES`] is dropped.
    pub fn new(
        updated: DateTime<Utc>,
        expires: DateTime<Utc>,
        thresholds: Thresholds,
        mut values: Vec<ActivityValue>,
        messages: Vec<Message>,
    ) -> Result<Self, String> {
        if values.is_empty() {
            return Err("no activity values".to_string());
        }
        if values.len() > MAX_ACTIVITY_VALUES {
            values.drain(..values.len() - MAX_ACTIVITY_VALUES);
        }
        Ok(Self {
            updated,
            expires,
            thresholds,
            messages,
            values,
        })
    }

    /// All hourly values, oldest first.
    pub fn all(&self) -> &[ActivityValue] {
        &self.values
    }

    /// The most recent hourly value.
    pub fn latest(&self) -> &ActivityValue {
        // Non-empty by construction.
        &self.values[self.values.len() - 1]
    }

    /// The level an unrounded activity value falls into.
    pub fn level_for(&self, value: f64) -> AlertLevel {
        self.thresholds.level_for(value)
    }

    pub fn displayable_messages(&self) -> impl Iterator<Item = &Message> {
        displayable(&self.messages)
    }
}

/// Color, meaning and description of one alert level.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct LevelDescription {
    /// `#RRGGBB`.
    pub color: String,

    /// What the level means, terminated with a full stop.
    pub meaning: String,

    /// Short description, not terminated with a full stop.
    pub description: String,
}

impl LevelDescription {
    /// The color as an RGB byte triple, if it is a well-formed `#RRGGBB` string.
    pub fn rgb(&self) -> Option<(u8, u8, u8)> {
        let hex = self.color.strip_prefix('#')?;
        if hex.len() != 6 || !hex.is_ascii() {
            return None;
        }
        let channel = |i: usize| u8::from_str_radix(&hex[i..i + 2], 16).ok();
        Some((channel(0)?, channel(2)?, channel(4)?))
    }
}

/// The descriptions table: one entry for every level, ascending by level.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct Descriptions(BTreeMap<AlertLevel, LevelDescription>);

impl Descriptions {
    /// Build a table. Every level must be described.
    pub fn new(entries: BTreeMap<AlertLevel, LevelDescription>) -> Result<Self, String> {
        if let Some(missing) = AlertLevel::ALL.iter().find(|l| !entries.contains_key(*l)) {
            return Err(format!("no description for level {missing}"));
        }
        Ok(Self(entries))
    }

    pub fn get(&self, level: AlertLevel) -> &LevelDescription {
        // Complete by construction.
        &self.0[&level]
    }

    pub fn iter(&self) -> impl Iterator<Item = (AlertLevel, &LevelDescription)> {
        self.0.iter().map(|(level, d)| (*level, d))
    }

    pub fn levels(&self) -> impl Iterator<Item = AlertLevel> + '_ {
        self.0.keys().copied()
    }
}
