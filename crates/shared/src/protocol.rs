//! Realm hub wire protocol: frames, method names and host helpers.

use serde::{Deserialize, Serialize};
use serde_json::Value;

use crate::models::{DeltaEvent, Encounter, Notice, PartyMember, Snapshot};

/// Header names sent on the hub handshake
pub const HEADER_AUTHORIZATION: &str = "Authorization";
pub const HEADER_CLIENT_ID: &str = "X-Client-Id";

/// Path of the realm hub relative to the deployment host
pub const HUB_PATH: &str = "/hubs/realm";

/// Payload field carrying a command's idempotency token
pub const CORRELATION_FIELD: &str = "commandId";

/// Hub methods the client may invoke
pub mod methods {
    pub const JOIN_SESSION: &str = "JoinSession";
    pub const REQUEST_FULL_SNAPSHOT: &str = "RequestFullSnapshot";
    pub const SET_DISPLAY_NAME: &str = "SetDisplayName";
    pub const SELECT_VOTE: &str = "SelectVote";
    pub const START_ENCOUNTER: &str = "StartEncounter";
    pub const REVEAL_VOTES: &str = "RevealVotes";
    pub const REROLL_VOTES: &str = "RerollVotes";
    pub const SEAL_OUTCOME: &str = "SealOutcome";
    pub const ADD_QUEST: &str = "AddQuest";
    pub const UPDATE_QUEST: &str = "UpdateQuest";
    pub const DELETE_QUEST: &str = "DeleteQuest";
    pub const REORDER_QUESTS: &str = "ReorderQuests";
    pub const SET_ACTIVE_QUEST: &str = "SetActiveQuest";
    pub const JOIN_PRESENCE: &str = "JoinPresence";
    pub const LEAVE_PRESENCE: &str = "LeavePresence";
}

/// Targets the hub pushes payloads to
pub mod targets {
    pub const SNAPSHOT: &str = "snapshot";
    pub const STATE_UPDATED: &str = "stateUpdated";
    pub const PRESENCE_UPDATED: &str = "presenceUpdated";
    pub const ENCOUNTER_UPDATED: &str = "encounterUpdated";
    pub const NOTICE: &str = "notice";

    pub const ALL: [&str; 5] = [
        SNAPSHOT,
        STATE_UPDATED,
        PRESENCE_UPDATED,
        ENCOUNTER_UPDATED,
        NOTICE,
    ];
}

/// Error codes carried in completion frames
pub const HUB_ERROR_UNKNOWN_METHOD: &str = "unknown_method";
pub const HUB_ERROR_UNAUTHORIZED: &str = "unauthorized";

/// One JSON text frame on the hub socket
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
#[serde(tag = "type", rename_all = "camelCase", rename_all_fields = "camelCase")]
pub enum HubFrame {
    /// Client → hub call, or hub → client push when `invocation_id` is absent
    Invocation {
        #[serde(default, skip_serializing_if = "Option::is_none")]
        invocation_id: Option<String>,
        target: String,
        #[serde(default)]
        arguments: Vec<Value>,
    },
    /// Hub acknowledgement of an invocation
    Completion {
        invocation_id: String,
        #[serde(default, skip_serializing_if = "Option::is_none")]
        result: Option<Value>,
        #[serde(default, skip_serializing_if = "Option::is_none")]
        error: Option<HubError>,
    },
    Ping,
    /// Hub is closing the connection
    Close {
        #[serde(default, skip_serializing_if = "Option::is_none")]
        error: Option<String>,
    },
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
pub struct HubError {
    pub code: String,
    #[serde(default)]
    pub message: String,
}

/// Decoded server → client payload
#[derive(Debug, Clone, PartialEq)]
pub enum InboundPayload {
    Snapshot(Snapshot),
    Delta(DeltaEvent),
    Notice(Notice),
}

#[derive(Debug, thiserror::Error)]
pub enum DecodeError {
    #[error("unknown target `{0}`")]
    UnknownTarget(String),
    #[error("invalid `{target}` payload: {source}")]
    Payload {
        target: String,
        #[source]
        source: serde_json::Error,
    },
}

impl InboundPayload {
    /// Decode the first argument of a pushed invocation for `target`.
    pub fn decode(target: &str, arguments: Vec<Value>) -> Result<Self, DecodeError> {
        let payload = arguments.into_iter().next().unwrap_or(Value::Null);
        let wrap = |source| DecodeError::Payload {
            target: target.to_string(),
            source,
        };

        match target {
            targets::SNAPSHOT => Snapshot::from_value(payload)
                .map(InboundPayload::Snapshot)
                .map_err(wrap),
            targets::STATE_UPDATED => Snapshot::from_value(payload)
                .map(|s| InboundPayload::Delta(DeltaEvent::StateUpdated(s)))
                .map_err(wrap),
            targets::PRESENCE_UPDATED => decode_presence(payload)
                .map(|p| InboundPayload::Delta(DeltaEvent::PresenceUpdated(p)))
                .map_err(wrap),
            targets::ENCOUNTER_UPDATED => decode_encounter(payload)
                .map(|e| InboundPayload::Delta(DeltaEvent::EncounterUpdated(e)))
                .map_err(wrap),
            targets::NOTICE => serde_json::from_value(payload)
                .map(InboundPayload::Notice)
                .map_err(wrap),
            other => Err(DecodeError::UnknownTarget(other.to_string())),
        }
    }
}

/// Presence arrives either as a bare member list or wrapped in an object.
fn decode_presence(payload: Value) -> Result<Vec<PartyMember>, serde_json::Error> {
    #[derive(Deserialize)]
    #[serde(untagged)]
    enum Repr {
        List(Vec<PartyMember>),
        Wrapped {
            #[serde(alias = "partyRoster", alias = "party")]
            members: Vec<PartyMember>,
        },
    }

    Ok(match serde_json::from_value(payload)? {
        Repr::List(members) | Repr::Wrapped { members } => members,
    })
}

fn decode_encounter(payload: Value) -> Result<Option<Encounter>, serde_json::Error> {
    let inner = match payload {
        Value::Object(mut object) if object.contains_key("encounter") => object
            .remove("encounter")
            .unwrap_or(Value::Null),
        other => other,
    };
    serde_json::from_value(inner)
}

/// Normalize a host string for use as a key (strips protocol prefix)
pub fn normalize_host(host: &str) -> String {
    host.trim_start_matches("http://")
        .trim_start_matches("https://")
        .trim_start_matches("ws://")
        .trim_start_matches("wss://")
        .trim_end_matches('/')
        .to_string()
}

/// Check if a host is a local/development address.
pub fn is_local_address(host: &str) -> bool {
    let host_part = host.split(':').next().unwrap_or(host);
    host_part == "localhost"
        || host_part == "127.0.0.1"
        || host_part == "0.0.0.0"
        || host_part.starts_with("192.168.")
        || host_part.starts_with("10.")
}

/// Base HTTP URL for a bare host or an absolute URL
pub fn http_base_url(host: &str) -> String {
    if host.contains("://") {
        return host.trim_end_matches('/').to_string();
    }
    let host = normalize_host(host);
    if is_local_address(&host) {
        format!("http://{host}")
    } else {
        format!("https://{host}")
    }
}

/// Convert HTTP/HTTPS URL to WS/WSS
pub fn http_to_ws(url: &str) -> String {
    if url.starts_with("https://") {
        url.replacen("https://", "wss://", 1)
    } else if url.starts_with("http://") {
        url.replacen("http://", "ws://", 1)
    } else {
        url.to_string()
    }
}

/// Hub URL for a deployment host
pub fn hub_url_for_host(host: &str) -> String {
    format!("{}{}", http_to_ws(&http_base_url(host)), HUB_PATH)
}
