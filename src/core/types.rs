use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::fmt;
use std::hash::{Hash, Hasher};
use std::str::FromStr;
use uuid::Uuid;

/// Platform identity of a participant.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(transparent)]
pub struct ParticipantId(pub u64);

impl fmt::Display for ParticipantId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.0)
    }
}

/// A participant as delivered by the platform: identity plus display name.
///
/// Equality and hashing only look at the identity, display names may change
/// between invocations.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Participant {
    pub id: ParticipantId,
    pub name: String,
}

impl Participant {
    pub fn new(id: u64, name: impl Into<String>) -> Self {
        Self {
            id: ParticipantId(id),
            name: name.into(),
        }
    }
}

impl PartialEq for Participant {
    fn eq(&self, other: &Self) -> bool {
        self.id == other.id
    }
}

impl Eq for Participant {}

impl Hash for Participant {
    fn hash<H: Hasher>(&self, state: &mut H) {
        self.id.hash(state);
    }
}

/// Stable identity of one run, survives ownership transfer.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(transparent)]
pub struct RunId(pub Uuid);

impl RunId {
    pub fn new() -> Self {
        Self(Uuid::new_v4())
    }
}

impl Default for RunId {
    fn default() -> Self {
        Self::new()
    }
}

impl fmt::Display for RunId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.0)
    }
}

// ============================================================================
// Classifiers
// ============================================================================

/// Ladder/hardcore split. Also selects the realm channel announcements go to.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum Category {
    #[serde(rename = "Non-Ladder")]
    NonLadder,
    #[serde(rename = "Ladder")]
    Ladder,
    #[serde(rename = "Non-Ladder Hardcore")]
    NonLadderHardcore,
    #[serde(rename = "Ladder Hardcore")]
    LadderHardcore,
}

impl Category {
    pub const ALL: [Category; 4] = [
        Category::NonLadder,
        Category::Ladder,
        Category::NonLadderHardcore,
        Category::LadderHardcore,
    ];

    pub fn as_str(&self) -> &'static str {
        match self {
            Category::NonLadder => "Non-Ladder",
            Category::Ladder => "Ladder",
            Category::NonLadderHardcore => "Non-Ladder Hardcore",
            Category::LadderHardcore => "Ladder Hardcore",
        }
    }
}

impl fmt::Display for Category {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for Category {
    type Err = String;

    fn from_str(s: &str) -> std::result::Result<Self, Self::Err> {
        Category::ALL
            .into_iter()
            .find(|c| c.as_str().eq_ignore_ascii_case(s.trim()))
            .ok_or_else(|| format!("Unknown category '{}'", s))
    }
}

/// What kind of run is being hosted.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum Activity {
    #[serde(rename = "Baal")]
    Baal,
    #[serde(rename = "Pre-Tele Baal")]
    PreTeleBaal,
    #[serde(rename = "Chaos-Full Clear")]
    ChaosFullClear,
    #[serde(rename = "Chaos-Seal Pop")]
    ChaosSealPop,
    #[serde(rename = "Cows")]
    Cows,
    #[serde(rename = "Tombs")]
    Tombs,
    #[serde(rename = "Split-Tombs")]
    SplitTombs,
    #[serde(rename = "TZ")]
    TerrorZone,
    #[serde(rename = "GRush")]
    GRush,
}

impl Activity {
    pub const ALL: [Activity; 9] = [
        Activity::Baal,
        Activity::PreTeleBaal,
        Activity::ChaosFullClear,
        Activity::ChaosSealPop,
        Activity::Cows,
        Activity::Tombs,
        Activity::SplitTombs,
        Activity::TerrorZone,
        Activity::GRush,
    ];

    pub fn as_str(&self) -> &'static str {
        match self {
            Activity::Baal => "Baal",
            Activity::PreTeleBaal => "Pre-Tele Baal",
            Activity::ChaosFullClear => "Chaos-Full Clear",
            Activity::ChaosSealPop => "Chaos-Seal Pop",
            Activity::Cows => "Cows",
            Activity::Tombs => "Tombs",
            Activity::SplitTombs => "Split-Tombs",
            Activity::TerrorZone => "TZ",
            Activity::GRush => "GRush",
        }
    }
}

impl fmt::Display for Activity {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for Activity {
    type Err = String;

    fn from_str(s: &str) -> std::result::Result<Self, Self::Err> {
        Activity::ALL
            .into_iter()
            .find(|a| a.as_str().eq_ignore_ascii_case(s.trim()))
            .ok_or_else(|| format!("Unknown activity '{}'", s))
    }
}

// ============================================================================
// Run Record
// ============================================================================

/// Mutable state of one open run.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct RunRecord {
    pub id: RunId,
    pub number: u16,
    pub host: Participant,
    pub category: Category,
    pub activity: Activity,
    pub display_name: String,
    pub secret: String,
    pub attendees: Vec<Participant>,
    pub started_at: DateTime<Utc>,
}

impl RunRecord {
    pub fn is_member(&self, id: ParticipantId) -> bool {
        self.host.id == id || self.has_attendee(id)
    }

    pub fn has_attendee(&self, id: ParticipantId) -> bool {
        self.attendees.iter().any(|a| a.id == id)
    }

    pub fn spots_left(&self, capacity: usize) -> usize {
        capacity.saturating_sub(self.attendees.len())
    }

    /// Attendee display names in join order, as stored in the history log.
    pub fn attendee_names(&self) -> Vec<String> {
        self.attendees.iter().map(|a| a.name.clone()).collect()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_participant_equality_ignores_name() {
        assert_eq!(Participant::new(1, "alice"), Participant::new(1, "Alice#2"));
        assert_ne!(Participant::new(1, "alice"), Participant::new(2, "alice"));
    }

    #[test]
    fn test_category_parse_and_display() {
        assert_eq!("ladder hardcore".parse::<Category>().unwrap(), Category::LadderHardcore);
        assert_eq!(Category::NonLadder.to_string(), "Non-Ladder");
        assert!("Season 9".parse::<Category>().is_err());
    }

    #[test]
    fn test_activity_serde_uses_display_names() {
        let json = serde_json::to_string(&Activity::PreTeleBaal).unwrap();
        assert_eq!(json, "\"Pre-Tele Baal\"");
        let back: Activity = serde_json::from_str("\"TZ\"").unwrap();
        assert_eq!(back, Activity::TerrorZone);
    }
}
