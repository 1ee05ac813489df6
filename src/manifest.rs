//! HLS manifest rewriting.
//!
//! Redirects every media-segment line of a playlist to the relay's segment
//! route. Everything else in the playlist is passed through untouched.

use hls_relay_common::paths::trailing_component;
use hls_relay_common::SegmentName;

/// Path prefix of the relay's segment route.
pub const SEGMENT_ROUTE_PREFIX: &str = "/segment";

/// Decides which playlist lines are media-segment references.
///
/// A line is a segment when, after trimming, it is not a tag or comment and
/// ends with one of the configured extensions (ASCII case-insensitive).
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SegmentRule {
    extensions: Vec<String>,
}

impl SegmentRule {
    pub fn new<I, S>(extensions: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        Self {
            extensions: extensions
                .into_iter()
                .map(Into::into)
                .map(|ext| ext.trim().to_string())
                .filter(|ext| !ext.is_empty())
                .collect(),
        }
    }

    pub fn extensions(&self) -> &[String] {
        &self.extensions
    }

    pub fn is_segment(&self, line: &str) -> bool {
        let line = line.trim();
        if line.is_empty() || line.starts_with('#') {
            return false;
        }
        let bytes = line.as_bytes();
        self.extensions.iter().any(|ext| {
            let ext = ext.as_bytes();
            bytes.len() >= ext.len() && bytes[bytes.len() - ext.len()..].eq_ignore_ascii_case(ext)
        })
    }
}

impl Default for SegmentRule {
    fn default() -> Self {
        Self::new([".ts"])
    }
}

/// One line of a playlist, as seen by the rewriter.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum PlaylistLine<'a> {
    /// Tag, comment, blank or unrecognised line; emitted verbatim.
    PassThrough(&'a str),
    /// Segment reference, named by its decoded trailing path component.
    Segment(SegmentName),
}

/// Rewrites playlists for one relay instance.
#[derive(Debug, Clone, Default)]
pub struct ManifestRewriter {
    rule: SegmentRule,
}

impl ManifestRewriter {
    pub fn new(rule: SegmentRule) -> Self {
        Self { rule }
    }

    pub fn rule(&self) -> &SegmentRule {
        &self.rule
    }

    /// Classify a line. Segment references whose name the segment route
    /// would reject (an encoded `/`, control characters) pass through.
    pub fn classify<'a>(&self, line: &'a str) -> PlaylistLine<'a> {
        if !self.rule.is_segment(line) {
            return PlaylistLine::PassThrough(line);
        }
        match SegmentName::from_uri_component(trailing_component(line.trim())) {
            Ok(name) => PlaylistLine::Segment(name),
            Err(_) => PlaylistLine::PassThrough(line),
        }
    }

    /// Rewrite `manifest` so its segments point at `/segment/{channel}/{file}`.
    ///
    /// Lines are split on `\n` and rejoined with `\n`, so a trailing newline
    /// (or its absence) survives. Pass-through lines keep any `\r`.
    pub fn rewrite(&self, manifest: &str, channel: &str) -> String {
        let mut out = String::with_capacity(manifest.len() + 64);
        for (i, line) in manifest.split('\n').enumerate() {
            if i > 0 {
                out.push('\n');
            }
            match self.classify(line) {
                PlaylistLine::PassThrough(text) => out.push_str(text),
                PlaylistLine::Segment(name) => {
                    out.push_str(SEGMENT_ROUTE_PREFIX);
                    out.push('/');
                    out.push_str(channel);
                    out.push('/');
                    out.push_str(&name.encoded());
                }
            }
        }
        out
    }
}

/// Rewrite with the default `.ts` rule.
pub fn rewrite(manifest: &str, channel: &str) -> String {
    ManifestRewriter::default().rewrite(manifest, channel)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_rewrites_segment_lines_only() {
        let input = ["#EXTM3U", "#EXTINF:10,", "seg001.ts", "#EXT-X-ENDLIST"].join("\n");
        let output = rewrite(&input, "foo");
        let lines: Vec<&str> = output.split('\n').collect();
        assert_eq!(
            lines,
            ["#EXTM3U", "#EXTINF:10,", "/segment/foo/seg001.ts", "#EXT-X-ENDLIST"]
        );
    }

    #[test]
    fn test_manifest_without_segments_is_unchanged() {
        let input = "#EXTM3U\n#EXT-X-VERSION:3\n#EXT-X-STREAM-INF:BANDWIDTH=800000\nlow/index.m3u8\n";
        assert_eq!(rewrite(input, "foo"), input);
    }

    #[test]
    fn test_preserves_trailing_newline_and_crlf_on_passthrough() {
        let input = "#EXTM3U\r\n#EXTINF:6.0,\r\nseg_1.ts\r\n";
        let output = rewrite(input, "ch");
        assert_eq!(output, "#EXTM3U\r\n#EXTINF:6.0,\r\n/segment/ch/seg_1.ts\n");
    }

    #[test]
    fn test_segment_line_is_trimmed_and_encoded() {
        assert_eq!(rewrite("  seg 7.ts  ", "ch"), "/segment/ch/seg%207.ts");
    }

    #[test]
    fn test_names_are_decoded_then_reencoded() {
        let input = "seg~1.ts\nseg+2.ts\nseg%208.ts\nhttps://cdn.example.com/a/b%20c.ts";
        assert_eq!(
            rewrite(input, "ch"),
            "/segment/ch/seg~1.ts\n/segment/ch/seg%2B2.ts\n/segment/ch/seg%208.ts\n/segment/ch/b%20c.ts"
        );
    }

    #[test]
    fn test_unservable_names_pass_through() {
        let input = "#EXTM3U\nsub%2Fseg_1.ts\nbad%FF.ts\nseg_2.ts";
        assert_eq!(
            rewrite(input, "ch"),
            "#EXTM3U\nsub%2Fseg_1.ts\nbad%FF.ts\n/segment/ch/seg_2.ts"
        );
    }

    #[test]
    fn test_absolute_urls_use_trailing_component() {
        let input = "#EXTINF:4,\nhttps://cdn.example.com/live/ch/stream_0_42.ts";
        assert_eq!(rewrite(input, "ch"), "#EXTINF:4,\n/segment/ch/stream_0_42.ts");
    }

    #[test]
    fn test_tags_and_queries_are_not_segments() {
        let rule = SegmentRule::default();
        assert!(!rule.is_segment("#EXT-X-COMMENT:old.ts"));
        assert!(!rule.is_segment("seg.ts?token=abc"));
        assert!(!rule.is_segment(""));
        assert!(rule.is_segment("SEG.TS"));
    }

    #[test]
    fn test_custom_extensions() {
        let rewriter = ManifestRewriter::new(SegmentRule::new([".ts", ".aac"]));
        let output = rewriter.rewrite("#EXTM3U\naudio_1.aac\nvideo_1.ts\ninit.mp4", "x");
        assert_eq!(output, "#EXTM3U\n/segment/x/audio_1.aac\n/segment/x/video_1.ts\ninit.mp4");
    }

    #[test]
    fn test_classify() {
        let rewriter = ManifestRewriter::default();
        assert_eq!(
            rewriter.classify(" a/b/c.ts "),
            PlaylistLine::Segment(SegmentName::parse("c.ts").unwrap())
        );
        assert_eq!(rewriter.classify("#EXTM3U"), PlaylistLine::PassThrough("#EXTM3U"));
    }

    #[test]
    fn test_empty_input() {
        assert_eq!(rewrite("", "foo"), "");
        assert_eq!(rewrite("\n", "foo"), "\n");
    }
}
