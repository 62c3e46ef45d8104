//! STUN/TURN endpoint lists served at `/api/ice-servers`.

use serde::{Deserialize, Deserializer, Serialize};

/// One STUN or TURN endpoint group, in the shape browsers accept for
/// `RTCConfiguration.iceServers`.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct IceServer {
    /// Endpoint URLs. Providers send either one string or a list.
    #[serde(deserialize_with = "one_or_many")]
    pub urls: Vec<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub username: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub credential: Option<String>,
}

impl IceServer {
    /// Anonymous server group (STUN, typically).
    #[must_use]
    pub fn anonymous(urls: Vec<String>) -> Self {
        Self {
            urls,
            username: None,
            credential: None,
        }
    }
}

/// Body of the `/api/ice-servers` response.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct IceServersResponse {
    pub ice_servers: Vec<IceServer>,
}

#[derive(Deserialize)]
#[serde(untagged)]
enum OneOrMany<T> {
    One(T),
    Many(Vec<T>),
}

impl<T> From<OneOrMany<T>> for Vec<T> {
    fn from(value: OneOrMany<T>) -> Self {
        match value {
            OneOrMany::One(item) => vec![item],
            OneOrMany::Many(items) => items,
        }
    }
}

fn one_or_many<'de, D, T>(deserializer: D) -> Result<Vec<T>, D::Error>
where
    D: Deserializer<'de>,
    T: Deserialize<'de>,
{
    OneOrMany::<T>::deserialize(deserializer).map(Vec::from)
}

/// Deserialize a value that is either a single `IceServer` or a list of them.
///
/// # Errors
///
/// Returns the underlying deserializer error if the value is neither.
pub fn deserialize_servers<'de, D>(deserializer: D) -> Result<Vec<IceServer>, D::Error>
where
    D: Deserializer<'de>,
{
    one_or_many(deserializer)
}
