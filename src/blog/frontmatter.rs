//! Front matter extraction
//!
//! A post starts with a YAML block fenced by `---` lines:
//!
//! ```text
//! ---
//! title: Hello
//! date: 2021-03-17
//! ---
//! Body text
//! ```

use chrono::{DateTime, NaiveDate, NaiveDateTime, NaiveTime, SecondsFormat, TimeZone, Utc};
use serde::{Deserialize, Deserializer, Serialize};

use super::error::BlogError;

const OPENING: &str = "---\n";
const DELIMITER: &str = "---";

/// Shortest content that can hold both delimiters
const MIN_CONTENT_LEN: usize = 8;

/// Metadata carried in a post's front matter
#[derive(Debug, Clone, PartialEq)]
pub struct FrontMatter {
    pub title: String,
    pub published: DateTime<Utc>,
}

#[derive(Deserialize)]
struct RawFrontMatter {
    title: String,
    #[serde(alias = "published", deserialize_with = "deserialize_date")]
    date: DateTime<Utc>,
}

fn deserialize_date<'de, D>(deserializer: D) -> Result<DateTime<Utc>, D::Error>
where
    D: Deserializer<'de>,
{
    let raw = String::deserialize(deserializer)?;
    parse_date(raw.trim())
        .ok_or_else(|| serde::de::Error::custom(format!("unrecognised date '{}'", raw)))
}

/// Accepts `2021-03-17`, `2021-03-17 10:00:00`, `2021-03-17T10:00:00`
/// and RFC 3339 with an offset
fn parse_date(raw: &str) -> Option<DateTime<Utc>> {
    if let Ok(date) = DateTime::parse_from_rfc3339(raw) {
        return Some(date.with_timezone(&Utc));
    }
    if let Ok(date) = DateTime::parse_from_str(raw, "%Y-%m-%d %H:%M:%S %z") {
        return Some(date.with_timezone(&Utc));
    }
    for format in ["%Y-%m-%d %H:%M:%S", "%Y-%m-%dT%H:%M:%S"] {
        if let Ok(naive) = NaiveDateTime::parse_from_str(raw, format) {
            return Some(Utc.from_utc_datetime(&naive));
        }
    }
    NaiveDate::parse_from_str(raw, "%Y-%m-%d")
        .ok()
        .map(|date| Utc.from_utc_datetime(&date.and_time(NaiveTime::MIN)))
}

/// Byte offset of the closing delimiter line within `block_and_body`
fn find_closing(block_and_body: &str) -> Option<usize> {
    block_and_body.match_indices(DELIMITER).map(|(idx, _)| idx).find(|&idx| {
        let at_line_start = idx == 0 || block_and_body.as_bytes()[idx - 1] == b'\n';
        let rest = &block_and_body[idx + DELIMITER.len()..];
        at_line_start && (rest.is_empty() || rest.starts_with('\n'))
    })
}

/// Parse the front matter of a post
///
/// Returns the metadata and the byte offset at which the body starts, just
/// past the newline ending the closing delimiter. The function is pure; the
/// same bytes always produce the same result.
pub fn parse(content: &[u8]) -> Result<(FrontMatter, usize), BlogError> {
    if content.len() < MIN_CONTENT_LEN {
        return Err(BlogError::MalformedMetadata(
            "content too short to include front matter".to_string(),
        ));
    }
    let text = std::str::from_utf8(content)
        .map_err(|e| BlogError::MalformedMetadata(format!("content is not UTF-8: {}", e)))?;

    let rest = text
        .strip_prefix(OPENING)
        .ok_or_else(|| BlogError::MalformedMetadata("missing opening delimiter".to_string()))?;
    let close = find_closing(rest)
        .ok_or_else(|| BlogError::MalformedMetadata("missing closing delimiter".to_string()))?;

    let raw: RawFrontMatter = serde_yaml::from_str(&rest[..close])
        .map_err(|e| BlogError::MalformedMetadata(e.to_string()))?;

    let mut body_start = OPENING.len() + close + DELIMITER.len();
    if text[body_start..].starts_with('\n') {
        body_start += 1;
    }

    Ok((
        FrontMatter {
            title: raw.title,
            published: raw.date,
        },
        body_start,
    ))
}

/// Body of a post given the offset returned by [`parse`], trimmed
pub fn body(content: &[u8], body_start: usize) -> String {
    String::from_utf8_lossy(content.get(body_start..).unwrap_or_default())
        .trim()
        .to_string()
}

#[derive(Serialize)]
struct RenderedFrontMatter<'a> {
    title: &'a str,
    date: String,
}

/// Render a post in the format [`parse`] reads
pub fn render(front: &FrontMatter, body: &str) -> Result<String, BlogError> {
    let block = serde_yaml::to_string(&RenderedFrontMatter {
        title: &front.title,
        date: front.published.to_rfc3339_opts(SecondsFormat::AutoSi, true),
    })
    .map_err(|e| BlogError::MalformedMetadata(e.to_string()))?;
    Ok(format!("{}{}{}\n{}", OPENING, block, DELIMITER, body))
}

#[cfg(test)]
mod tests {
    use super::*;

    fn malformed(content: &[u8]) -> String {
        match parse(content) {
            Err(BlogError::MalformedMetadata(reason)) => reason,
            other => panic!("expected MalformedMetadata, got {:?}", other),
        }
    }

    #[test]
    fn test_parses_date_only_front_matter() {
        let content = b"---\ndate: 2021-03-17\ntitle: Test\n---\n";
        let (front, start) = parse(content).unwrap();
        assert_eq!(front.title, "Test");
        assert_eq!(
            front.published,
            Utc.with_ymd_and_hms(2021, 3, 17, 0, 0, 0).unwrap()
        );
        assert_eq!(start, content.len());
        assert_eq!(start, 37);
        assert_eq!(body(content, start), "");
    }

    #[test]
    fn test_body_is_trimmed_remainder() {
        let content = b"---\ntitle: Hello\npublished: 2021-03-17 10:30:00\n---\n\n  Some *markdown*\n\n";
        let (front, start) = parse(content).unwrap();
        assert_eq!(
            front.published,
            Utc.with_ymd_and_hms(2021, 3, 17, 10, 30, 0).unwrap()
        );
        assert_eq!(body(content, start), "Some *markdown*");
    }

    #[test]
    fn test_rejects_short_content() {
        assert!(malformed(b"").contains("too short"));
        assert!(malformed(b"---\n---").contains("too short"));
    }

    #[test]
    fn test_rejects_missing_opening_delimiter() {
        assert!(malformed(b"title: x\n---\nbody").contains("opening"));
        assert!(malformed(
            b"---\r\npublished: 2006-01-02 15:04:05 +0000 UTC\r\ntitle: test\r\n---\r\n"
        )
        .contains("opening"));
    }

    #[test]
    fn test_rejects_missing_closing_delimiter() {
        assert!(malformed(b"---\ntitle: x\ndate: 2021-01-01\nbody").contains("closing"));
        // A dash run inside a line is not a delimiter.
        assert!(malformed(b"---\ntitle: a --- b\ndate: 2021-01-01\n").contains("closing"));
    }

    #[test]
    fn test_rejects_undecodable_block() {
        malformed(b"---\ntitle: [unclosed\n---\nbody");
        malformed(b"---\ntitle: No date\n---\nbody");
        malformed(b"---\ntitle: Bad date\ndate: yesterday\n---\nbody");
    }

    #[test]
    fn test_unknown_keys_are_ignored() {
        let content = b"---\ntitle: Tagged\ndate: 2021-03-17\ntags: [a, b]\n---\nbody";
        let (front, _) = parse(content).unwrap();
        assert_eq!(front.title, "Tagged");
    }

    #[test]
    fn test_render_round_trip() {
        let cases = [
            ("Plain title", "2021-03-17T00:00:00Z", "Body"),
            ("Colons: and \"quotes\"", "1999-12-31T23:59:59Z", "# Heading\n\ntext"),
            ("yes", "2024-02-29T12:00:00.250Z", "  padded body  \n"),
            ("Blåbærsyltetøy", "2010-06-01T08:00:00Z", "---\nnot front matter"),
            ("next\u{85}line", "2012-01-01T00:00:00Z", "Body"),
            ("del\u{7f}char", "2013-01-01T00:00:00Z", "Body"),
            ("tab\tand bell\u{7}", "2014-01-01T00:00:00Z", "Body"),
        ];
        for (title, published, text) in cases {
            let front = FrontMatter {
                title: title.to_string(),
                published: DateTime::parse_from_rfc3339(published)
                    .unwrap()
                    .with_timezone(&Utc),
            };
            let rendered = render(&front, text).unwrap();
            let (parsed, start) = parse(rendered.as_bytes()).unwrap();
            assert_eq!(parsed, front, "front matter for {:?}", title);
            assert_eq!(body(rendered.as_bytes(), start), text.trim());
            // Deterministic for identical input.
            assert_eq!(parse(rendered.as_bytes()).unwrap(), (parsed, start));
        }
    }
}
