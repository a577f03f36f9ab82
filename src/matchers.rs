/// Field matchers: turn one `Label: value` line into a typed scalar.
///
/// Every matcher looks at the end of the line (or the text after the first
/// colon), so callers can pass the whole trimmed line without stripping the
/// label first.
use regex::Regex;
use std::sync::LazyLock;

static TRAILING_INT: LazyLock<Regex> = LazyLock::new(|| Regex::new(r"\d+$").unwrap());
static TRAILING_PAGES: LazyLock<Regex> =
    LazyLock::new(|| Regex::new(r"(\d+)(?:\s*pages)?$").unwrap());
static TRAILING_SIZE: LazyLock<Regex> =
    LazyLock::new(|| Regex::new(r"^(.*)(?:\s|:)([\d.]+)\s*([TGMK])iB$").unwrap());
static AFTER_COLON: LazyLock<Regex> = LazyLock::new(|| Regex::new(r":\s*(\S.*)$").unwrap());

/// Which matcher rejected a line.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum MatchKind {
    Integer,
    Size,
    Pages,
    Boolean,
    Text,
}

impl std::fmt::Display for MatchKind {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let name = match self {
            MatchKind::Integer => "integer",
            MatchKind::Size => "size",
            MatchKind::Pages => "pages",
            MatchKind::Boolean => "boolean (Yes/No, On/Off)",
            MatchKind::Text => "text",
        };
        f.write_str(name)
    }
}

/// A line did not carry the value a matcher was looking for.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct NoMatch {
    pub kind: MatchKind,
    pub line: String,
}

impl NoMatch {
    fn new(kind: MatchKind, line: &str) -> Self {
        Self {
            kind,
            line: line.to_string(),
        }
    }
}

impl std::fmt::Display for NoMatch {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "no match for {} in {:?}", self.kind, self.line)
    }
}

impl std::error::Error for NoMatch {}

/// Trailing run of digits, e.g. `Replicas: 2`.
pub fn integer(line: &str) -> Result<i64, NoMatch> {
    TRAILING_INT
        .find(line)
        .and_then(|m| m.as_str().parse().ok())
        .ok_or_else(|| NoMatch::new(MatchKind::Integer, line))
}

/// Trailing binary size such as `64.0KiB` or `12.5 GiB`.
///
/// Returns the line with the size token removed (trimmed) together with the
/// size in bytes. The size token must be preceded by whitespace or a colon.
pub fn byte_size(line: &str) -> Result<(&str, i64), NoMatch> {
    let caps = TRAILING_SIZE
        .captures(line)
        .ok_or_else(|| NoMatch::new(MatchKind::Size, line))?;

    let value: f64 = caps[2]
        .parse()
        .map_err(|_| NoMatch::new(MatchKind::Size, line))?;

    let power = match &caps[3] {
        "T" => 4,
        "G" => 3,
        "M" => 2,
        _ => 1,
    };

    let rest = caps.get(1).map_or("", |m| m.as_str()).trim();
    Ok((rest, (value * 1024f64.powi(power)) as i64))
}

/// Page count, e.g. `Present pages: 1200 pages 75.0MiB`.
///
/// A trailing byte size is stripped first; the count is the last integer of
/// what remains, optionally followed by the word `pages`.
pub fn pages(line: &str) -> Result<i64, NoMatch> {
    let head = byte_size(line).map_or(line, |(rest, _)| rest);
    TRAILING_PAGES
        .captures(head)
        .and_then(|caps| caps[1].parse().ok())
        .ok_or_else(|| NoMatch::new(MatchKind::Pages, line))
}

/// `Yes`/`On` is true, `No`/`Off` is false.
pub fn boolean(line: &str) -> Result<bool, NoMatch> {
    if line.ends_with("Yes") || line.ends_with("On") {
        Ok(true)
    } else if line.ends_with("No") || line.ends_with("Off") {
        Ok(false)
    } else {
        Err(NoMatch::new(MatchKind::Boolean, line))
    }
}

/// Everything after the first colon, trimmed.
pub fn text(line: &str) -> Result<&str, NoMatch> {
    AFTER_COLON
        .captures(line)
        .and_then(|caps| caps.get(1))
        .map(|m| m.as_str().trim_end())
        .ok_or_else(|| NoMatch::new(MatchKind::Text, line))
}
