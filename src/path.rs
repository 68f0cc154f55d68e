//! Hierarchical data-model paths such as `Device.WiFi.Radio.1.Channel`.
//!
//! A trailing `.` addresses an object (`Device.WiFi.Radio.1.`), no trailing dot
//! addresses a parameter of the enclosing object.

use serde::{Deserialize, Serialize};
use std::fmt;

const SEPARATOR: char = '.';
const ROOT: &str = "Device";

#[derive(Clone, Debug, Default, Deserialize, Eq, Hash, PartialEq, Serialize)]
#[serde(transparent)]
pub struct BusPath(String);

impl BusPath {
    pub fn new(path: impl Into<String>) -> Self {
        Self(path.into())
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }

    pub fn is_object(&self) -> bool {
        self.0.ends_with(SEPARATOR)
    }

    /// Non-empty segments in order
    pub fn segments(&self) -> impl Iterator<Item = &str> {
        self.0.split(SEPARATOR).filter(|s| !s.is_empty())
    }

    /// Last segment of a parameter path, `None` for object paths
    pub fn leaf(&self) -> Option<&str> {
        if self.is_object() {
            return None;
        }
        self.segments().last()
    }

    /// Segment-wise prefix match: `Device.WiFi.` is a prefix of
    /// `Device.WiFi.Radio.1.` but `Device.Wi` is not.
    pub fn starts_with(&self, prefix: &BusPath) -> bool {
        let mut own = self.segments();
        prefix
            .segments()
            .all(|segment| own.next().is_some_and(|s| s == segment))
    }

    pub fn join(&self, segment: &str) -> BusPath {
        let segment = segment.trim_start_matches(SEPARATOR);
        if self.0.is_empty() {
            BusPath(segment.to_string())
        } else if self.is_object() {
            BusPath(format!("{}{segment}", self.0))
        } else {
            BusPath(format!("{}{SEPARATOR}{segment}", self.0))
        }
    }

    /// Instance index following `key`, e.g. `Radio` in
    /// `Device.WiFi.DataElements.Network.Device.1.Radio.3.BSS.4` is `3`.
    ///
    /// A leading `Device` is the data-model root and never matches `key`.
    pub fn index_of(&self, key: &str) -> Option<&str> {
        let segments: Vec<&str> = self.0.split(SEPARATOR).collect();
        segments
            .iter()
            .enumerate()
            .filter(|(pos, segment)| **segment == key && !(*pos == 0 && key == ROOT))
            .find_map(|(pos, _)| segments.get(pos + 1).copied())
            .filter(|index| !index.is_empty())
    }
}

impl fmt::Display for BusPath {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

impl From<&str> for BusPath {
    fn from(path: &str) -> Self {
        Self::new(path)
    }
}

impl From<String> for BusPath {
    fn from(path: String) -> Self {
        Self(path)
    }
}

impl AsRef<str> for BusPath {
    fn as_ref(&self) -> &str {
        &self.0
    }
}
