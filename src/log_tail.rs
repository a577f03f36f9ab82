/// Log tail extraction: read the last few KiB of the QStar syslog and split
/// it into timestamped entries.
///
/// Every entry starts with a fixed-width date prefix. Lines without one are
/// continuations (stack traces, wrapped messages) and are folded into the
/// entry above them.
use crate::config::ConfigError;
use crate::state::{self, State};
use chrono::{DateTime, NaiveDate, NaiveDateTime, Utc};
use serde::Serialize;
use std::fmt::Write as _;
use std::fs::File;
use std::io::{Read, Seek, SeekFrom};
use std::path::{Path, PathBuf};

/// `01/02/2006 15:04:05.999999` style prefixes.
pub const DEFAULT_LAYOUT: &str = "%m/%d/%Y %H:%M:%S%.6f";
pub const DEFAULT_PATH: &str = "/opt/QStar/log/syslog";
pub const DEFAULT_WINDOW: u64 = 8192;

/// Immutable settings of the log check, validated once at startup.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct LogConfig {
    layout: String,
    prefix_len: usize,
    path: PathBuf,
    window: u64,
}

impl LogConfig {
    /// Validate the layout by formatting and re-parsing a reference
    /// timestamp; the formatted width becomes the prefix length.
    pub fn new(
        layout: impl Into<String>,
        path: impl Into<PathBuf>,
        window: u64,
    ) -> Result<Self, ConfigError> {
        let layout = layout.into();
        if window == 0 {
            return Err(ConfigError::Invalid {
                var: "LOG_BUF_SIZE",
                value: window.to_string(),
                reason: "must be a positive integer".to_string(),
            });
        }
        let prefix_len = prefix_len_for(&layout)?;
        Ok(Self {
            layout,
            prefix_len,
            path: path.into(),
            window,
        })
    }

    pub fn layout(&self) -> &str {
        &self.layout
    }

    pub fn prefix_len(&self) -> usize {
        self.prefix_len
    }

    pub fn path(&self) -> &Path {
        &self.path
    }

    pub fn window(&self) -> u64 {
        self.window
    }

    /// Parse the date prefix of `line`.
    fn parse_prefix<'a>(&self, line: &'a str) -> Result<(&'a str, DateTime<Utc>), String> {
        let datestr = line
            .get(..self.prefix_len)
            .ok_or_else(|| "prefix is not on a character boundary".to_string())?;
        let dt = NaiveDateTime::parse_from_str(datestr, &self.layout).map_err(|e| e.to_string())?;
        Ok((datestr, dt.and_utc()))
    }
}

impl Default for LogConfig {
    fn default() -> Self {
        Self {
            layout: DEFAULT_LAYOUT.to_string(),
            prefix_len: "01/02/2006 15:04:05.999999".len(),
            path: PathBuf::from(DEFAULT_PATH),
            window: DEFAULT_WINDOW,
        }
    }
}

fn prefix_len_for(layout: &str) -> Result<usize, ConfigError> {
    let invalid = |reason: &str| ConfigError::Layout {
        layout: layout.to_string(),
        reason: reason.to_string(),
    };

    let reference = NaiveDate::from_ymd_opt(2006, 1, 2)
        .and_then(|d| d.and_hms_micro_opt(15, 4, 5, 999_999))
        .ok_or_else(|| invalid("reference time out of range"))?;

    let mut formatted = String::new();
    write!(formatted, "{}", reference.format(layout))
        .map_err(|_| invalid("unsupported format specifier"))?;

    NaiveDateTime::parse_from_str(&formatted, layout)
        .map_err(|e| invalid(&format!("cannot parse its own output {formatted:?}: {e}")))?;

    Ok(formatted.len())
}

/// One log entry, keyed by its timestamp.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct LogEntry {
    /// Nanoseconds since the epoch, as text.
    pub name: String,
    /// Seconds since the epoch (millisecond precision).
    pub timestamp: f64,
    pub datestr: String,
    pub message: String,
}

/// Entries read by one log check.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct LogState {
    pub log: Vec<LogEntry>,
}

impl LogState {
    pub fn into_state(self) -> Result<State, serde_json::Error> {
        let mut out = State::new();
        state::insert(&mut out, "log", &self.log)?;
        Ok(out)
    }
}

/// Errors produced by the log check.
#[derive(Debug)]
pub enum LogError {
    /// The log file could not be opened.
    Open {
        path: PathBuf,
        source: std::io::Error,
    },
    /// The tail of the log file could not be read.
    Read {
        path: PathBuf,
        source: std::io::Error,
    },
    /// No line in the window carried a parseable date.
    NoTimestamp {
        line: usize,
        datestr: String,
        layout: String,
        reason: String,
        failures: usize,
    },
}

impl std::fmt::Display for LogError {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            LogError::Open { path, source } => {
                write!(f, "failed to open log file {}: {}", path.display(), source)
            }
            LogError::Read { path, source } => {
                write!(f, "failed to read log file {}: {}", path.display(), source)
            }
            LogError::NoTimestamp {
                line,
                datestr,
                layout,
                reason,
                failures,
            } => write!(
                f,
                "failed to read date from line {line} (line: {datestr:?}, layout: {layout}): {reason} \
                 ({failures} line(s) without a date)"
            ),
        }
    }
}

impl std::error::Error for LogError {
    fn source(&self) -> Option<&(dyn std::error::Error + 'static)> {
        match self {
            LogError::Open { source, .. } | LogError::Read { source, .. } => Some(source),
            LogError::NoTimestamp { .. } => None,
        }
    }
}

/// Date parse failures within one window. Only the first is logged.
#[derive(Debug, Default)]
struct ParseFailures {
    first: Option<LogError>,
    count: usize,
}

impl ParseFailures {
    fn record(&mut self, line: usize, datestr: &str, layout: &str, reason: String) {
        self.count += 1;
        if self.first.is_some() {
            return;
        }
        tracing::warn!(line, datestr, layout, %reason, "failed to read date from log line");
        self.first = Some(LogError::NoTimestamp {
            line,
            datestr: datestr.to_string(),
            layout: layout.to_string(),
            reason,
            failures: 0,
        });
    }

    fn into_error(self) -> Option<LogError> {
        let count = self.count;
        self.first.map(|mut err| {
            if let LogError::NoTimestamp { failures, .. } = &mut err {
                *failures = count;
            }
            err
        })
    }
}

/// Read at most `window` bytes from the end of `path`.
///
/// Returns the bytes and the offset they start at.
pub fn read_tail(path: &Path, window: u64) -> Result<(Vec<u8>, u64), LogError> {
    let read_err = |source| LogError::Read {
        path: path.to_path_buf(),
        source,
    };

    let mut file = File::open(path).map_err(|source| LogError::Open {
        path: path.to_path_buf(),
        source,
    })?;
    let len = file.metadata().map_err(read_err)?.len();
    let start = len.saturating_sub(window);
    file.seek(SeekFrom::Start(start)).map_err(read_err)?;

    let mut buf = Vec::with_capacity(usize::try_from(window.min(len)).unwrap_or(0));
    file.take(window).read_to_end(&mut buf).map_err(read_err)?;
    Ok((buf, start))
}

/// Split a window of log text into entries.
///
/// `truncated` means the window does not start at the beginning of the file,
/// so its first line is probably partial and is skipped.
pub fn parse_window(
    config: &LogConfig,
    text: &str,
    truncated: bool,
) -> Result<Vec<LogEntry>, LogError> {
    let text = text.replace("\r\n", "\n");
    let mut entries: Vec<LogEntry> = Vec::new();
    let mut failures = ParseFailures::default();

    for (index, line) in text.split('\n').enumerate() {
        if (truncated && index == 0) || line.len() < config.prefix_len {
            continue;
        }

        let (datestr, dt) = match config.parse_prefix(line) {
            Ok(parsed) => parsed,
            Err(reason) => {
                match entries.last_mut() {
                    Some(entry) => append_continuation(entry, line.trim()),
                    None => {
                        let datestr = line.get(..config.prefix_len).unwrap_or(line);
                        failures.record(index, datestr, &config.layout, reason);
                    }
                }
                continue;
            }
        };

        let Some(nanos) = dt.timestamp_nanos_opt() else {
            match entries.last_mut() {
                Some(entry) => append_continuation(entry, line.trim()),
                None => failures.record(
                    index,
                    datestr,
                    &config.layout,
                    "timestamp out of range".to_string(),
                ),
            }
            continue;
        };

        let name = nanos.to_string();
        // Same timestamp as the entry above: already emitted.
        if entries.last().is_some_and(|prev| prev.name == name) {
            continue;
        }

        entries.push(LogEntry {
            name,
            timestamp: dt.timestamp_millis() as f64 / 1000.0,
            datestr: datestr.to_string(),
            message: line[config.prefix_len..].trim().to_string(),
        });
    }

    if failures.count > 1 {
        tracing::debug!(suppressed = failures.count - 1, "further date parse failures suppressed");
    }

    if entries.is_empty() {
        if let Some(err) = failures.into_error() {
            return Err(err);
        }
    }
    Ok(entries)
}

fn append_continuation(entry: &mut LogEntry, line: &str) {
    if line.is_empty() {
        return;
    }
    if !entry.message.is_empty() {
        entry.message.push('\n');
    }
    entry.message.push_str(line);
}

/// Run the log check.
pub fn check_log(config: &LogConfig) -> Result<LogState, LogError> {
    let (buf, start) = read_tail(config.path(), config.window())?;
    let text = String::from_utf8_lossy(&buf);
    let log = parse_window(config, &text, start != 0)?;
    Ok(LogState { log })
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::io::Write;
    use tempfile::TempDir;

    fn write_file(dir: &Path, name: &str, content: &str) -> PathBuf {
        let path = dir.join(name);
        let mut f = File::create(&path).unwrap();
        f.write_all(content.as_bytes()).unwrap();
        path
    }

    fn config() -> LogConfig {
        LogConfig::default()
    }

    #[test]
    fn default_layout_prefix_is_26_bytes() {
        let cfg = LogConfig::new(DEFAULT_LAYOUT, DEFAULT_PATH, DEFAULT_WINDOW).unwrap();
        assert_eq!(cfg.prefix_len(), 26);
        assert_eq!(cfg, LogConfig::default());
    }

    #[test]
    fn custom_layout_prefix_len() {
        let cfg = LogConfig::new("%Y-%m-%dT%H:%M:%S", "/tmp/x", 100).unwrap();
        assert_eq!(cfg.prefix_len(), "2006-01-02T15:04:05".len());
    }

    #[test]
    fn layout_without_date_is_rejected() {
        let err = LogConfig::new("%H:%M:%S", "/tmp/x", 100).unwrap_err();
        assert!(matches!(err, ConfigError::Layout { .. }));
    }

    #[test]
    fn layout_with_bad_specifier_is_rejected() {
        assert!(LogConfig::new("%Y-%m-%d %Q", "/tmp/x", 100).is_err());
    }

    #[test]
    fn zero_window_is_rejected() {
        let err = LogConfig::new(DEFAULT_LAYOUT, DEFAULT_PATH, 0).unwrap_err();
        assert!(matches!(err, ConfigError::Invalid { var: "LOG_BUF_SIZE", .. }));
    }

    #[test]
    fn parses_entry_fields() {
        let text = "03/01/2024 12:30:00.250000 mcfs: cache flushed\n";
        let entries = parse_window(&config(), text, false).unwrap();
        assert_eq!(entries.len(), 1);
        let e = &entries[0];
        assert_eq!(e.datestr, "03/01/2024 12:30:00.250000");
        assert_eq!(e.message, "mcfs: cache flushed");
        assert_eq!(e.name, "1709296200250000000");
        assert!((e.timestamp - 1709296200.25).abs() < 1e-9);
    }

    #[test]
    fn subsecond_entries_and_continuations() {
        let text = "\
03/01/2024 12:30:00.100000 first
03/01/2024 12:30:00.200000 second
03/01/2024 12:30:00.300000 third: stack follows
    at com.qstar.Migrator.run(Migrator.java:42)
    at com.qstar.Worker.loop(Worker.java:7)
";
        let entries = parse_window(&config(), text, false).unwrap();
        assert_eq!(entries.len(), 3);
        assert_eq!(entries[0].message, "first");
        assert_eq!(entries[1].message, "second");
        assert_eq!(
            entries[2].message,
            "third: stack follows\n\
             at com.qstar.Migrator.run(Migrator.java:42)\n\
             at com.qstar.Worker.loop(Worker.java:7)"
        );
    }

    #[test]
    fn identical_timestamps_produce_one_entry() {
        let text = "\
03/01/2024 12:30:00.100000 original
03/01/2024 12:30:00.100000 repeated
";
        let entries = parse_window(&config(), text, false).unwrap();
        assert_eq!(entries.len(), 1);
        assert_eq!(entries[0].message, "original");
    }

    #[test]
    fn duplicate_keeps_continuation_target() {
        let text = "\
03/01/2024 12:30:00.100000 original
03/01/2024 12:30:00.100000 repeated
this continuation line is long enough to be kept
";
        let entries = parse_window(&config(), text, false).unwrap();
        assert_eq!(entries.len(), 1);
        assert_eq!(
            entries[0].message,
            "original\nthis continuation line is long enough to be kept"
        );
    }

    #[test]
    fn dedup_only_compares_adjacent_entries() {
        let text = "\
03/01/2024 12:30:00.100000 a
03/01/2024 12:30:00.200000 b
03/01/2024 12:30:00.100000 a again
";
        let entries = parse_window(&config(), text, false).unwrap();
        assert_eq!(entries.len(), 3);
    }

    #[test]
    fn truncated_first_line_is_skipped() {
        // Window starting mid-line: the tail of an entry that happens to
        // start with something date-like must not become an entry.
        let text = "\
03/01/2024 12:29:59.000000 partial tail of an earlier line
03/01/2024 12:30:00.100000 whole
";
        let entries = parse_window(&config(), text, true).unwrap();
        assert_eq!(entries.len(), 1);
        assert_eq!(entries[0].message, "whole");

        let entries = parse_window(&config(), text, false).unwrap();
        assert_eq!(entries.len(), 2);
    }

    #[test]
    fn short_lines_are_dropped() {
        let text = "\
03/01/2024 12:30:00.100000 entry
short line
";
        let entries = parse_window(&config(), text, false).unwrap();
        assert_eq!(entries[0].message, "entry");
    }

    #[test]
    fn leading_garbage_is_masked_by_later_entries() {
        let text = "\
garbage line that is longer than the date prefix
more garbage that is longer than the date prefix
03/01/2024 12:30:00.100000 entry
";
        let entries = parse_window(&config(), text, false).unwrap();
        assert_eq!(entries.len(), 1);
    }

    #[test]
    fn only_garbage_surfaces_first_failure() {
        let text = "\
garbage line that is longer than the date prefix
more garbage that is longer than the date prefix
";
        let err = parse_window(&config(), text, false).unwrap_err();
        match err {
            LogError::NoTimestamp {
                line,
                datestr,
                failures,
                ..
            } => {
                assert_eq!(line, 0);
                assert_eq!(datestr, "garbage line that is longe");
                assert_eq!(failures, 2);
            }
            other => panic!("unexpected error: {other}"),
        }
    }

    #[test]
    fn empty_window_is_empty_result() {
        assert!(parse_window(&config(), "", false).unwrap().is_empty());
    }

    #[test]
    fn crlf_line_endings() {
        let text = "03/01/2024 12:30:00.100000 one\r\n03/01/2024 12:30:00.200000 two\r\n";
        let entries = parse_window(&config(), text, false).unwrap();
        assert_eq!(entries.len(), 2);
        assert_eq!(entries[0].message, "one");
    }

    #[test]
    fn multibyte_text_at_prefix_boundary_is_not_a_panic() {
        // byte 26 falls inside an 'é'
        let text = "xéééééééééééééééééééééééééé\n03/01/2024 12:30:00.100000 ok\n";
        let entries = parse_window(&config(), text, false).unwrap();
        assert_eq!(entries.len(), 1);
    }

    #[test]
    fn read_tail_of_short_file_reads_everything() {
        let dir = TempDir::new().unwrap();
        let path = write_file(dir.path(), "syslog", "hello\nworld\n");
        let (buf, start) = read_tail(&path, 8192).unwrap();
        assert_eq!(start, 0);
        assert_eq!(buf, b"hello\nworld\n");
    }

    #[test]
    fn read_tail_of_long_file_reads_window() {
        let dir = TempDir::new().unwrap();
        let path = write_file(dir.path(), "syslog", "0123456789abcdef");
        let (buf, start) = read_tail(&path, 6).unwrap();
        assert_eq!(start, 10);
        assert_eq!(buf, b"abcdef");
    }

    #[test]
    fn check_log_missing_file_is_error() {
        let cfg = LogConfig::new(DEFAULT_LAYOUT, "/nonexistent/syslog", 8192).unwrap();
        assert!(matches!(check_log(&cfg), Err(LogError::Open { .. })));
    }

    #[test]
    fn check_log_skips_partial_line_at_window_start() {
        let dir = TempDir::new().unwrap();
        let content = "\
03/01/2024 12:29:00.000000 old entry that falls outside the window
03/01/2024 12:30:00.100000 kept one
03/01/2024 12:30:00.200000 kept two
";
        let path = write_file(dir.path(), "syslog", content);
        // Window covers the last two lines plus the end of the first one.
        let window = (content.len() - 40) as u64;
        let cfg = LogConfig::new(DEFAULT_LAYOUT, &path, window).unwrap();

        let state = check_log(&cfg).unwrap();
        let messages: Vec<&str> = state.log.iter().map(|e| e.message.as_str()).collect();
        assert_eq!(messages, vec!["kept one", "kept two"]);
    }

    #[test]
    fn rereading_unchanged_file_gives_same_entries() {
        let dir = TempDir::new().unwrap();
        let path = write_file(
            dir.path(),
            "syslog",
            "03/01/2024 12:30:00.100000 one\n03/01/2024 12:30:00.200000 two\n",
        );
        let cfg = LogConfig::new(DEFAULT_LAYOUT, &path, 8192).unwrap();
        assert_eq!(check_log(&cfg).unwrap(), check_log(&cfg).unwrap());
    }

    #[test]
    fn log_state_serializes_entries() {
        let text = "03/01/2024 12:30:00.250000 hello\n";
        let log = parse_window(&config(), text, false).unwrap();
        let state = LogState { log }.into_state().unwrap();
        let item = &state["log"][0];
        assert_eq!(item["name"], "1709296200250000000");
        assert_eq!(item["message"], "hello");
        assert_eq!(item["datestr"], "03/01/2024 12:30:00.250000");
        assert_eq!(item["timestamp"].as_f64(), Some(1709296200.25));
    }
}
