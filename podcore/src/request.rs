use rand::RngCore;
use std::fmt;
use std::str::FromStr;
use std::sync::Arc;
use std::sync::atomic::{AtomicU64, Ordering};
use thiserror::Error;

/// Which edge or anchor a history fetch extends.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum Direction {
    Top,
    Bottom,
    Offset,
    TimeRange,
}

impl Direction {
    pub const ALL: [Direction; 4] = [
        Direction::Top,
        Direction::Bottom,
        Direction::Offset,
        Direction::TimeRange,
    ];

    pub fn as_str(&self) -> &'static str {
        match self {
            Direction::Top => "top",
            Direction::Bottom => "bottom",
            Direction::Offset => "offset",
            Direction::TimeRange => "time-range",
        }
    }
}

impl fmt::Display for Direction {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// The fixed set of paging requests a conversation session can issue.
///
/// The scenario variants distinguish the first page loaded when a
/// conversation opens from later scroll-driven pages, so that a response
/// can be traced back to the exact code path that requested it.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum RequestKind {
    MoreTop,
    MoreBottom,
    MoreTopFirstScenario,
    MoreBottomFirstScenario,
    MoreTopSecondScenario,
    MoreBottomFifthScenario,
    ToTime,
    FromTime,
    FetchByOffset,
}

impl RequestKind {
    pub const ALL: [RequestKind; 9] = [
        RequestKind::MoreTop,
        RequestKind::MoreBottom,
        RequestKind::MoreTopFirstScenario,
        RequestKind::MoreBottomFirstScenario,
        RequestKind::MoreTopSecondScenario,
        RequestKind::MoreBottomFifthScenario,
        RequestKind::ToTime,
        RequestKind::FromTime,
        RequestKind::FetchByOffset,
    ];

    pub fn as_str(&self) -> &'static str {
        match self {
            RequestKind::MoreTop => "MORE_TOP",
            RequestKind::MoreBottom => "MORE_BOTTOM",
            RequestKind::MoreTopFirstScenario => "MORE_TOP_FIRST_SCENARIO",
            RequestKind::MoreBottomFirstScenario => "MORE_BOTTOM_FIRST_SCENARIO",
            RequestKind::MoreTopSecondScenario => "MORE_TOP_SECOND_SCENARIO",
            RequestKind::MoreBottomFifthScenario => "MORE_BOTTOM_FIFTH_SCENARIO",
            RequestKind::ToTime => "TO_TIME",
            RequestKind::FromTime => "FROM_TIME",
            RequestKind::FetchByOffset => "FETCH_BY_OFFSET",
        }
    }

    pub fn direction(&self) -> Direction {
        match self {
            RequestKind::MoreTop
            | RequestKind::MoreTopFirstScenario
            | RequestKind::MoreTopSecondScenario => Direction::Top,
            RequestKind::MoreBottom
            | RequestKind::MoreBottomFirstScenario
            | RequestKind::MoreBottomFifthScenario => Direction::Bottom,
            RequestKind::ToTime | RequestKind::FromTime => Direction::TimeRange,
            RequestKind::FetchByOffset => Direction::Offset,
        }
    }
}

impl fmt::Display for RequestKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for RequestKind {
    type Err = RequestKeyError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        RequestKind::ALL
            .into_iter()
            .find(|kind| kind.as_str() == s)
            .ok_or_else(|| RequestKeyError::UnknownKind(s.to_string()))
    }
}

#[derive(Debug, Error, PartialEq, Eq)]
pub enum RequestKeyError {
    #[error("unknown request kind '{0}'")]
    UnknownKind(String),
    #[error("malformed session id '{0}'")]
    MalformedSession(String),
    #[error("request key '{0}' has no session suffix")]
    MissingSession(String),
}

/// Identifies one conversation-viewing session.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct SessionId([u8; 16]);

impl SessionId {
    /// Generates a fresh 128-bit random session id.
    pub fn new() -> Self {
        let mut bytes = [0u8; 16];
        rand::rng().fill_bytes(&mut bytes);
        Self(bytes)
    }

    pub fn from_bytes(bytes: [u8; 16]) -> Self {
        Self(bytes)
    }

    pub fn as_bytes(&self) -> &[u8; 16] {
        &self.0
    }
}

impl Default for SessionId {
    fn default() -> Self {
        Self::new()
    }
}

impl fmt::Display for SessionId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&hex::encode(self.0))
    }
}

impl FromStr for SessionId {
    type Err = RequestKeyError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        let mut bytes = [0u8; 16];
        hex::decode_to_slice(s, &mut bytes)
            .map_err(|_| RequestKeyError::MalformedSession(s.to_string()))?;
        Ok(Self(bytes))
    }
}

/// Correlation key attached to a history fetch, formatted as
/// `<KIND>-<session hex>`.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct RequestKey(String);

impl RequestKey {
    pub fn as_str(&self) -> &str {
        &self.0
    }

    /// Splits a key back into the kind and session that produced it.
    pub fn parse(&self) -> Result<(RequestKind, SessionId), RequestKeyError> {
        let (kind, session) = self
            .0
            .rsplit_once('-')
            .ok_or_else(|| RequestKeyError::MissingSession(self.0.clone()))?;
        Ok((kind.parse()?, session.parse()?))
    }
}

impl From<String> for RequestKey {
    fn from(value: String) -> Self {
        Self(value)
    }
}

impl From<&str> for RequestKey {
    fn from(value: &str) -> Self {
        Self(value.to_string())
    }
}

impl fmt::Display for RequestKey {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

/// Derives request keys for a single session.
#[derive(Debug, Clone)]
pub struct RequestKeys {
    session: SessionId,
}

impl RequestKeys {
    pub fn new(session: SessionId) -> Self {
        Self { session }
    }

    pub fn session(&self) -> SessionId {
        self.session
    }

    pub fn key(&self, kind: RequestKind) -> RequestKey {
        RequestKey(format!("{}-{}", kind.as_str(), self.session))
    }

    /// Whether `key` was produced by this session.
    pub fn owns(&self, key: &RequestKey) -> bool {
        matches!(key.parse(), Ok((_, session)) if session == self.session)
    }
}

/// Sequential ids for one-shot requests such as thread flag changes.
#[derive(Debug, Clone)]
pub struct RequestIdGenerator {
    unique_id: SessionId,
    id_counter: Arc<AtomicU64>,
}

impl RequestIdGenerator {
    pub fn new(unique_id: SessionId) -> Self {
        Self {
            unique_id,
            id_counter: Arc::new(AtomicU64::new(0)),
        }
    }

    pub fn next_key(&self) -> RequestKey {
        let count = self.id_counter.fetch_add(1, Ordering::Relaxed);
        RequestKey(format!("{}.{count}", self.unique_id))
    }
}

impl Default for RequestIdGenerator {
    fn default() -> Self {
        Self::new(SessionId::new())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::collections::HashSet;

    #[test]
    fn keys_are_stable_within_a_session() {
        let keys = RequestKeys::new(SessionId::new());
        for kind in RequestKind::ALL {
            assert_eq!(keys.key(kind), keys.key(kind));
        }
    }

    #[test]
    fn keys_are_distinct_per_kind_and_session() {
        let a = RequestKeys::new(SessionId::new());
        let b = RequestKeys::new(SessionId::new());
        let mut seen = HashSet::new();
        for kind in RequestKind::ALL {
            assert!(seen.insert(a.key(kind)));
            assert!(seen.insert(b.key(kind)));
        }
        assert_eq!(seen.len(), 18);
    }

    #[test]
    fn parse_recovers_kind_and_session() {
        let session = SessionId::from_bytes([0xab; 16]);
        let keys = RequestKeys::new(session);
        let key = keys.key(RequestKind::MoreBottomFifthScenario);
        assert_eq!(
            key.as_str(),
            "MORE_BOTTOM_FIFTH_SCENARIO-abababababababababababababababab"
        );
        assert_eq!(
            key.parse().unwrap(),
            (RequestKind::MoreBottomFifthScenario, session)
        );
        assert!(keys.owns(&key));
        assert!(!RequestKeys::new(SessionId::new()).owns(&key));
    }

    #[test]
    fn parse_rejects_garbage() {
        assert!(RequestKey::from("nonsense").parse().is_err());
        assert!(RequestKey::from("MORE_TOP-zz").parse().is_err());
        assert!(
            RequestKey::from("SIDEWAYS-abababababababababababababababab")
                .parse()
                .is_err()
        );
    }

    #[test]
    fn generated_ids_are_sequential_and_unique() {
        let ids = RequestIdGenerator::new(SessionId::from_bytes([1; 16]));
        let shared = ids.clone();
        assert_eq!(ids.next_key().as_str(), "01010101010101010101010101010101.0");
        assert_eq!(shared.next_key().as_str(), "01010101010101010101010101010101.1");
        assert_ne!(RequestIdGenerator::default().next_key(), ids.next_key());
    }

    #[test]
    fn kinds_map_to_directions() {
        assert_eq!(RequestKind::MoreTopSecondScenario.direction(), Direction::Top);
        assert_eq!(
            RequestKind::MoreBottomFirstScenario.direction(),
            Direction::Bottom
        );
        assert_eq!(RequestKind::FromTime.direction(), Direction::TimeRange);
        assert_eq!(RequestKind::FetchByOffset.direction(), Direction::Offset);
    }
}
