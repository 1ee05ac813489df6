//! Helpers for classifying and splitting HLS resource names.

/// Playlist file extension.
pub const PLAYLIST_EXTENSION: &str = ".m3u8";

/// Check if a file name refers to an HLS playlist.
///
/// # Examples
///
/// ```
/// use hls_relay_common::paths::is_playlist_name;
///
/// assert!(is_playlist_name("stream_0.m3u8"));
/// assert!(is_playlist_name("STREAM_0.M3U8"));
/// assert!(!is_playlist_name("seg001.ts"));
/// ```
pub fn is_playlist_name(name: &str) -> bool {
    name.to_ascii_lowercase().ends_with(PLAYLIST_EXTENSION)
}

/// Strip a trailing `.m3u8` from a name, if present.
///
/// # Examples
///
/// ```
/// use hls_relay_common::paths::strip_playlist_extension;
///
/// assert_eq!(strip_playlist_extension("stargoldhd.m3u8"), Some("stargoldhd"));
/// assert_eq!(strip_playlist_extension("stargoldhd"), None);
/// ```
pub fn strip_playlist_extension(name: &str) -> Option<&str> {
    if is_playlist_name(name) {
        Some(&name[..name.len() - PLAYLIST_EXTENSION.len()])
    } else {
        None
    }
}

/// Return the last `/`-separated component of a URI reference.
///
/// # Examples
///
/// ```
/// use hls_relay_common::paths::trailing_component;
///
/// assert_eq!(trailing_component("seg001.ts"), "seg001.ts");
/// assert_eq!(trailing_component("https://cdn.example/live/seg001.ts"), "seg001.ts");
/// ```
pub fn trailing_component(reference: &str) -> &str {
    reference.rsplit('/').next().unwrap_or(reference)
}
