//! Validated path parameters.
//!
//! Channel ids are interpolated into the upstream URL template as-is, so they
//! are restricted to `[A-Za-z0-9._-]`. Segment names come from upstream
//! playlists and may be any single path segment; they are percent-encoded
//! whenever they are placed in a URL.

use std::borrow::Cow;

use crate::error::{Error, Result};

const MAX_LEN: usize = 255;

fn is_safe_component(value: &str) -> bool {
    !value.is_empty()
        && value.len() <= MAX_LEN
        && value != "."
        && value != ".."
        && value
            .bytes()
            .all(|b| b.is_ascii_alphanumeric() || matches!(b, b'.' | b'_' | b'-'))
}

/// A decoded name that stays one path segment once encoded.
fn is_path_segment(value: &str) -> bool {
    !value.is_empty()
        && value.len() <= MAX_LEN
        && value != "."
        && value != ".."
        && !value
            .chars()
            .any(|c| c == '/' || c == '\\' || c.is_control())
}

/// Identifier of an upstream live channel (e.g. `stargoldhd`).
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct ChannelId(String);

impl ChannelId {
    /// Validate and wrap a channel identifier.
    pub fn parse(value: &str) -> Result<Self> {
        if is_safe_component(value) {
            Ok(Self(value.to_string()))
        } else {
            Err(Error::invalid_channel(value))
        }
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl std::fmt::Display for ChannelId {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(&self.0)
    }
}

impl AsRef<str> for ChannelId {
    fn as_ref(&self) -> &str {
        &self.0
    }
}

/// File name of a playlist or media segment inside a channel directory.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct SegmentName(String);

impl SegmentName {
    /// Validate and wrap a decoded file name.
    pub fn parse(value: &str) -> Result<Self> {
        if is_path_segment(value) {
            Ok(Self(value.to_string()))
        } else {
            Err(Error::invalid_file_name(value))
        }
    }

    /// Decode a percent-encoded URI path segment and validate the result.
    ///
    /// ```
    /// use hls_relay_common::SegmentName;
    ///
    /// let name = SegmentName::from_uri_component("seg%207.ts").unwrap();
    /// assert_eq!(name.as_str(), "seg 7.ts");
    /// assert!(SegmentName::from_uri_component("a%2Fb.ts").is_err());
    /// ```
    pub fn from_uri_component(raw: &str) -> Result<Self> {
        let decoded = urlencoding::decode(raw).map_err(|_| Error::invalid_file_name(raw))?;
        Self::parse(&decoded)
    }

    /// The name as a percent-encoded URI path segment.
    pub fn encoded(&self) -> Cow<'_, str> {
        urlencoding::encode(&self.0)
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl std::fmt::Display for SegmentName {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(&self.0)
    }
}

impl AsRef<str> for SegmentName {
    fn as_ref(&self) -> &str {
        &self.0
    }
}
