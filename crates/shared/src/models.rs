//! Shared data models for realm state and hub command payloads.
//!
//! Quest and encounter rules live on the server, so every model keeps the
//! fields this client reads and carries everything else through `extra`.

use std::collections::BTreeMap;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Deserializer, Serialize};
use serde_json::{Map, Value};

// --- Party ---

#[derive(Debug, Clone, Copy, Default, Serialize, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "camelCase")]
pub enum Role {
    #[default]
    Player,
    Observer,
    GameMaster,
    #[serde(other)]
    Unknown,
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
#[serde(rename_all = "camelCase")]
pub struct PartyMember {
    pub id: String,
    #[serde(default)]
    pub display_name: String,
    #[serde(default)]
    pub role: Role,
    #[serde(default)]
    pub online: bool,
    #[serde(flatten)]
    pub extra: Map<String, Value>,
}

// --- Quests ---

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
#[serde(rename_all = "camelCase")]
pub struct Quest {
    pub id: String,
    #[serde(default)]
    pub title: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub description: Option<String>,
    /// Sealed estimate, once the encounter for this quest has concluded
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub outcome: Option<String>,
    #[serde(flatten)]
    pub extra: Map<String, Value>,
}

// --- Encounter ---

#[derive(Debug, Clone, Copy, Default, Serialize, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "camelCase")]
pub enum EncounterPhase {
    #[default]
    Voting,
    Revealed,
    Sealed,
    #[serde(other)]
    Unknown,
}

#[derive(Debug, Clone, Default, Serialize, Deserialize, PartialEq)]
#[serde(rename_all = "camelCase")]
pub struct Encounter {
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub quest_id: Option<String>,
    #[serde(default)]
    pub phase: EncounterPhase,
    /// Votes keyed by member id. Values stay opaque: hidden votes arrive as
    /// placeholders until the encounter is revealed.
    #[serde(default)]
    pub votes: BTreeMap<String, Value>,
    #[serde(flatten)]
    pub extra: Map<String, Value>,
}

// --- Realm ---

#[derive(Debug, Clone, Default, Serialize, Deserialize, PartialEq)]
#[serde(rename_all = "camelCase")]
pub struct RealmSettings {
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub name: Option<String>,
    /// Card values offered during an encounter
    #[serde(default)]
    pub deck: Vec<String>,
    #[serde(flatten)]
    pub extra: Map<String, Value>,
}

/// Keys a snapshot may carry its revision under, in lookup order.
///
/// Older hubs used `version`/`rev`/`stateVersion` before settling on `revision`.
pub const REVISION_KEYS: [&str; 4] = ["revision", "version", "rev", "stateVersion"];

/// A complete copy of the realm state at one point in time.
///
/// Deserializing goes through [`Snapshot::from_value`] so the revision is read
/// from whichever synonym the hub used.
#[derive(Debug, Clone, Default, Serialize, PartialEq)]
#[serde(rename_all = "camelCase")]
pub struct Snapshot {
    pub settings: RealmSettings,
    pub party_roster: Vec<PartyMember>,
    pub quest_log: Vec<Quest>,
    pub encounter: Option<Encounter>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub revision: Option<u64>,
}

#[derive(Deserialize)]
#[serde(rename_all = "camelCase")]
struct SnapshotBody {
    #[serde(default)]
    settings: RealmSettings,
    #[serde(default, alias = "party", alias = "members")]
    party_roster: Vec<PartyMember>,
    #[serde(default, alias = "quests")]
    quest_log: Vec<Quest>,
    #[serde(default)]
    encounter: Option<Encounter>,
}

impl Snapshot {
    /// Decode a snapshot payload, reading the revision from any of
    /// [`REVISION_KEYS`].
    pub fn from_value(value: Value) -> Result<Self, serde_json::Error> {
        let revision = extract_revision(&value);
        let body: SnapshotBody = serde_json::from_value(value)?;
        Ok(Self {
            settings: body.settings,
            party_roster: body.party_roster,
            quest_log: body.quest_log,
            encounter: body.encounter,
            revision,
        })
    }
}

impl<'de> Deserialize<'de> for Snapshot {
    fn deserialize<D: Deserializer<'de>>(deserializer: D) -> Result<Self, D::Error> {
        let value = Value::deserialize(deserializer)?;
        Snapshot::from_value(value).map_err(serde::de::Error::custom)
    }
}

/// Read a revision marker from a snapshot-shaped JSON object.
///
/// Accepts non-negative integers, integral floats and numeric strings.
pub fn extract_revision(value: &Value) -> Option<u64> {
    let object = value.as_object()?;
    REVISION_KEYS
        .iter()
        .filter_map(|key| object.get(*key))
        .find_map(revision_from)
}

fn revision_from(value: &Value) -> Option<u64> {
    match value {
        Value::Number(n) => n.as_u64().or_else(|| {
            n.as_f64()
                .filter(|f| *f >= 0.0 && f.fract() == 0.0 && *f <= u64::MAX as f64)
                .map(|f| f as u64)
        }),
        Value::String(s) => s.trim().parse().ok(),
        _ => None,
    }
}

// --- Deltas ---

/// A partial update pushed by the hub. Deltas carry no revision of their own.
#[derive(Debug, Clone, PartialEq)]
pub enum DeltaEvent {
    /// Full-state wrapper, treated exactly like a snapshot
    StateUpdated(Snapshot),
    PresenceUpdated(Vec<PartyMember>),
    /// `None` means the encounter has ended
    EncounterUpdated(Option<Encounter>),
}

impl DeltaEvent {
    pub fn kind(&self) -> &'static str {
        match self {
            DeltaEvent::StateUpdated(_) => "stateUpdated",
            DeltaEvent::PresenceUpdated(_) => "presenceUpdated",
            DeltaEvent::EncounterUpdated(_) => "encounterUpdated",
        }
    }
}

/// Free-text broadcast from the hub
#[derive(Debug, Clone, Serialize, PartialEq)]
#[serde(rename_all = "camelCase")]
pub struct Notice {
    pub message: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub sent_at: Option<DateTime<Utc>>,
}

impl<'de> Deserialize<'de> for Notice {
    fn deserialize<D: Deserializer<'de>>(deserializer: D) -> Result<Self, D::Error> {
        #[derive(Deserialize)]
        #[serde(rename_all = "camelCase")]
        struct Body {
            #[serde(alias = "text")]
            message: String,
            #[serde(default)]
            sent_at: Option<DateTime<Utc>>,
        }

        #[derive(Deserialize)]
        #[serde(untagged)]
        enum Repr {
            Text(String),
            Body(Body),
        }

        Ok(match Repr::deserialize(deserializer)? {
            Repr::Text(message) => Notice {
                message,
                sent_at: None,
            },
            Repr::Body(body) => Notice {
                message: body.message,
                sent_at: body.sent_at,
            },
        })
    }
}

// --- Command payloads ---

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
#[serde(rename_all = "camelCase")]
pub struct JoinSessionRequest {
    pub session_code: String,
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
#[serde(rename_all = "camelCase")]
pub struct SetDisplayNameRequest {
    pub display_name: String,
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
#[serde(rename_all = "camelCase")]
pub struct SelectVoteRequest {
    pub value: String,
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
#[serde(rename_all = "camelCase")]
pub struct QuestRef {
    pub quest_id: String,
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
#[serde(rename_all = "camelCase")]
pub struct SealOutcomeRequest {
    pub outcome: String,
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
#[serde(rename_all = "camelCase")]
pub struct NewQuest {
    pub title: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub description: Option<String>,
}

#[derive(Debug, Clone, Default, Serialize, Deserialize, PartialEq)]
#[serde(rename_all = "camelCase")]
pub struct QuestPatch {
    pub quest_id: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub title: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub description: Option<String>,
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
#[serde(rename_all = "camelCase")]
pub struct ReorderQuestsRequest {
    pub quest_ids: Vec<String>,
}

// --- Credential issuing (HTTP) ---

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
#[serde(rename_all = "camelCase")]
pub struct JoinRealmRequest {
    pub display_name: String,
    pub role: Role,
    pub client_id: String,
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
#[serde(rename_all = "camelCase")]
pub struct JoinRealmResponse {
    #[serde(alias = "accessToken")]
    pub token: String,
}
