//! Job identifier.
//!
//! ULID ベースの ID を使用します。
//! - 時刻でソート可能（生成順序とほぼ一致）
//! - 調整なしで生成できる
//! - 一度削除された ID が再利用されることはない
//!
//! 文字列表現は `job-<ULID>` です。パース時はプレフィックス無しも受け付けます。

use std::fmt;
use std::str::FromStr;

use serde::{Deserialize, Deserializer, Serialize, Serializer};
use ulid::Ulid;

const PREFIX: &str = "job-";

/// Identifier of a Job (enqueue/get/cancel unit).
#[repr(transparent)]
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct JobId(Ulid);

impl JobId {
    pub fn from_ulid(ulid: Ulid) -> Self {
        Self(ulid)
    }

    pub fn as_ulid(&self) -> Ulid {
        self.0
    }
}

impl From<Ulid> for JobId {
    fn from(ulid: Ulid) -> Self {
        Self::from_ulid(ulid)
    }
}

impl fmt::Display for JobId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{PREFIX}{}", self.0)
    }
}

/// JobId のパースエラー
#[derive(Debug, thiserror::Error)]
#[error("invalid job id '{input}': {source}")]
pub struct ParseJobIdError {
    input: String,
    #[source]
    source: ulid::DecodeError,
}

impl FromStr for JobId {
    type Err = ParseJobIdError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        let raw = s.strip_prefix(PREFIX).unwrap_or(s);
        Ulid::from_string(raw)
            .map(JobId)
            .map_err(|source| ParseJobIdError {
                input: s.to_string(),
                source,
            })
    }
}

impl Serialize for JobId {
    fn serialize<S: Serializer>(&self, serializer: S) -> Result<S::Ok, S::Error> {
        serializer.collect_str(self)
    }
}

impl<'de> Deserialize<'de> for JobId {
    fn deserialize<D: Deserializer<'de>>(deserializer: D) -> Result<Self, D::Error> {
        let s = String::deserialize(deserializer)?;
        s.parse().map_err(serde::de::Error::custom)
    }
}
