//! Access log line tokenizer
//!
//! Lines follow the Apache combined format extended with timing, process,
//! and server fields:
//!
//! ```text
//! ip ident user [date tz] "request" status size elapsed cpu cpuchild "referer" "browser" pid keepalive uniq serverip tls [vhost-block vhost]
//! ```
//!
//! Quoted spans may contain arbitrary whitespace, so whitespace inside every
//! quoted span is frozen into a placeholder before the line is split, and
//! thawed again in the fields that are expected to hold it.

use once_cell::sync::Lazy;
use regex::{Captures, NoExpand, Regex};
use serde::Serialize;
use tracing::debug;

use crate::error::ParseError;

/// Fewest whitespace-separated fields a line must have to be usable
pub const MIN_FIELDS: usize = 17;

/// Top-level segment for a path that does not start with `/`
pub const ERROR_LEVEL: &str = "-error-";

const UNKNOWN_FIELD: &str = "(unknown)";
const DEFAULT_PROTOCOL: &str = "HTTP/0.9";
const BAD_METHOD: &str = "UNKNOWN";
const BAD_URI: &str = "baduri";
const BAD_PROTOCOL: &str = "UNKNOWN";

const SPACE_PLACEHOLDER: &str = "\u{1f}";
const QUOTE_PLACEHOLDER: &str = "\u{1e}";

static WHITESPACE: Lazy<Regex> = Lazy::new(|| Regex::new(r"\s+").unwrap());

// "" and "-" (and runs of dashes) carry no information
static DASH_QUOTES: Lazy<Regex> = Lazy::new(|| Regex::new(r#""-*""#).unwrap());

static QUOTED: Lazy<Regex> = Lazy::new(|| Regex::new(r#"".*?""#).unwrap());

static PATH_LEVELS: Lazy<Regex> =
    Lazy::new(|| Regex::new(r"^/+([^/]+)?(/+)?([^/]+)?").unwrap());

/// One parsed access log line
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct LogRecord {
    /// Client address or hostname as logged
    pub ip: String,
    pub ident: String,
    pub user: String,
    pub date: String,
    pub timezone: String,
    /// Full request line, quotes included
    pub request_line: String,
    pub method: String,
    pub uri: String,
    /// `uri` without its query string
    pub base_uri: String,
    /// First path segment; `None` when the path has no segment (e.g. `/`)
    pub top_level: Option<String>,
    pub second_level: Option<String>,
    pub protocol: String,
    pub status: String,
    /// Raw byte size; see [`LogRecord::bytes`]
    pub size: String,
    /// Raw elapsed time; see [`LogRecord::elapsed_secs`]
    pub elapsed: String,
    pub cpu: String,
    pub cpu_child: String,
    pub referer: String,
    pub browser: String,
    pub pid: String,
    pub keepalive: String,
    pub uniq: String,
    pub server_ip: String,
    pub tls: Option<String>,
    pub virtual_host: Option<String>,
}

impl LogRecord {
    /// Response size in bytes; `-` means zero
    pub fn bytes(&self) -> Result<i64, ParseError> {
        convert_bytes(&self.size)
    }

    /// Elapsed time in seconds
    pub fn elapsed_secs(&self) -> Result<f64, ParseError> {
        convert_elapsed(&self.elapsed)
    }
}

/// Convert a logged byte size. `-` is zero; anything else must be an integer.
pub fn convert_bytes(size: &str) -> Result<i64, ParseError> {
    if size == "-" {
        return Ok(0);
    }

    size.parse::<i64>()
        .map_err(|_| ParseError::InvalidSize(size.to_string()))
}

/// Convert a logged elapsed time to seconds.
///
/// Two forms are logged: `start:micros` where the part after the colon is a
/// duration in microseconds, and a plain float in seconds. `-` is zero.
pub fn convert_elapsed(elapsed: &str) -> Result<f64, ParseError> {
    let invalid = || ParseError::InvalidElapsed(elapsed.to_string());

    if let Some((_, micros)) = elapsed.split_once(':') {
        let micros = micros.parse::<f64>().map_err(|_| invalid())?;
        return Ok(micros / 1_000_000.0);
    }

    if elapsed == "-" {
        return Ok(0.0);
    }

    elapsed.parse::<f64>().map_err(|_| invalid())
}

/// Method, URI and protocol split out of a request line
#[derive(Debug, Clone, PartialEq, Eq)]
struct RequestParts {
    method: String,
    uri: String,
    protocol: String,
}

impl RequestParts {
    fn parse(line_number: u64, request_line: &str) -> Self {
        // No space at all means garbage was sent instead of a request
        if !request_line.contains(' ') {
            debug!(line_number, request_line, "Malformed request line");
            return Self {
                method: BAD_METHOD.to_string(),
                uri: BAD_URI.to_string(),
                protocol: BAD_PROTOCOL.to_string(),
            };
        }

        let inner = request_line.strip_prefix('"').unwrap_or(request_line);
        let inner = inner.strip_suffix('"').unwrap_or(inner);
        let mut parts = inner.split_whitespace();

        let method = parts.next().unwrap_or_else(|| {
            debug!(line_number, request_line, "Request line has no method");
            UNKNOWN_FIELD
        });
        let uri = parts.next().unwrap_or_else(|| {
            debug!(line_number, request_line, "Request line has no uri");
            UNKNOWN_FIELD
        });
        let protocol = parts.next().unwrap_or(DEFAULT_PROTOCOL);

        Self {
            method: method.to_string(),
            uri: uri.to_string(),
            protocol: protocol.to_string(),
        }
    }
}

fn freeze_quoted(line: &str) -> String {
    let escaped = line.replace(r#"\""#, QUOTE_PLACEHOLDER);
    let escaped = DASH_QUOTES.replace_all(&escaped, NoExpand("-"));

    QUOTED
        .replace_all(&escaped, |caps: &Captures| {
            WHITESPACE
                .replace_all(&caps[0], NoExpand(SPACE_PLACEHOLDER))
                .into_owned()
        })
        .into_owned()
}

fn thaw(field: &str) -> String {
    field
        .replace(SPACE_PLACEHOLDER, " ")
        .replace(QUOTE_PLACEHOLDER, r#"\""#)
}

/// Split a path into its top-level and second-level segments
fn path_levels(base_uri: &str) -> (Option<String>, Option<String>) {
    match PATH_LEVELS.captures(base_uri) {
        Some(caps) => (
            caps.get(1).map(|m| m.as_str().to_string()),
            caps.get(3).map(|m| m.as_str().to_string()),
        ),
        None => (Some(ERROR_LEVEL.to_string()), None),
    }
}

/// Tokenize one access log line.
///
/// # Arguments
/// * `line_number` - Position of the line in the input, used in diagnostics
/// * `line` - The raw line without its trailing newline
///
/// # Returns
/// The parsed record, or `ParseError::TooFewFields` when the line has fewer
/// than [`MIN_FIELDS`] fields after quote-aware splitting. A damaged request
/// line never fails the whole record; its parts fall back to placeholders.
pub fn parse_line(line_number: u64, line: &str) -> Result<LogRecord, ParseError> {
    let frozen = freeze_quoted(line);
    let fields: Vec<&str> = WHITESPACE.split(&frozen).collect();

    if fields.len() < MIN_FIELDS {
        return Err(ParseError::TooFewFields {
            line_number,
            found: fields.len(),
            required: MIN_FIELDS,
        });
    }

    let request_line = thaw(fields[5]);
    let request = RequestParts::parse(line_number, &request_line);

    let base_uri = match request.uri.split_once('?') {
        Some((base, _)) => base.to_string(),
        None => request.uri.clone(),
    };
    let (top_level, second_level) = path_levels(&base_uri);

    Ok(LogRecord {
        ip: fields[0].to_string(),
        ident: fields[1].to_string(),
        user: fields[2].to_string(),
        date: fields[3].to_string(),
        timezone: fields[4].to_string(),
        request_line,
        method: request.method,
        uri: request.uri,
        base_uri,
        top_level: top_level.filter(|level| !level.is_empty()),
        second_level,
        protocol: request.protocol,
        status: fields[6].to_string(),
        size: fields[7].to_string(),
        elapsed: fields[8].to_string(),
        cpu: fields[9].to_string(),
        cpu_child: fields[10].to_string(),
        referer: thaw(fields[11]),
        browser: thaw(fields[12]),
        pid: fields[13].to_string(),
        keepalive: fields[14].to_string(),
        uniq: fields[15].to_string(),
        server_ip: fields[16].to_string(),
        tls: fields.get(17).map(|s| s.to_string()),
        virtual_host: fields.get(19).map(|s| s.to_string()),
    })
}

#[cfg(test)]
mod tests {
    use super::*;

    const MAIN_LINE: &str = r#"67.249.231.2 - - [01/Sep/2017:00:00:08 -0400] "GET /met/wp-includes/js/wp-embed.min.js?ver=4.6.6 HTTP/1.1" 200 1403 0.007192 0.000000 0.000000 "http://www.bu.edu/met/programs/graduate/arts-administration/" "Mozilla/5.0 (Macintosh; Intel Mac OS X 10_9_5) AppleWebKit/537.36 (KHTML, like Gecko) Chrome/60.0.3112.113 Safari/537.36" 10673 + WajbSArxHDYAACmxCSUAAAVW 128.197.26.35 off:http"#;

    const W3V_LINE: &str = r#"101.50.113.106 - - [12/Oct/2017:04:04:33 -0400] "GET /bubadmin/style.css?ver=1 HTTP/1.1" 200 3485 10359:10360 0.000000 0.000000 "http://blogs.bu.edu/bubadmin/contact-us/" "Mozilla/5.0 (Windows NT 10.0; Win64; x64) AppleWebKit/537.36 (KHTML, like Gecko) Chrome/61.0.3163.100 Safari/537.36" 3104 + -ZFabgrnCRgAAAwgIzYAAABD 10.231.9.24 off:http wwwv.bu.edu blogs.bu.edu"#;

    const BROWSER: &str = r#""Mozilla/5.0 (Macintosh; Intel Mac OS X 10_9_5) AppleWebKit/537.36 (KHTML, like Gecko) Chrome/60.0.3112.113 Safari/537.36""#;

    #[test]
    fn test_parse_main_line() {
        let record = parse_line(1, MAIN_LINE).unwrap();

        assert_eq!(record.ip, "67.249.231.2");
        assert_eq!(record.date, "[01/Sep/2017:00:00:08");
        assert_eq!(record.timezone, "-0400]");
        assert_eq!(record.method, "GET");
        assert_eq!(record.uri, "/met/wp-includes/js/wp-embed.min.js?ver=4.6.6");
        assert_eq!(record.base_uri, "/met/wp-includes/js/wp-embed.min.js");
        assert_eq!(record.top_level.as_deref(), Some("met"));
        assert_eq!(record.second_level.as_deref(), Some("wp-includes"));
        assert_eq!(record.protocol, "HTTP/1.1");
        assert_eq!(record.status, "200");
        assert_eq!(record.browser, BROWSER);
        assert_eq!(record.pid, "10673");
        assert_eq!(record.server_ip, "128.197.26.35");
        assert_eq!(record.tls.as_deref(), Some("off:http"));
        assert_eq!(record.virtual_host, None);
        assert_eq!(record.bytes(), Ok(1403));
        assert_eq!(record.elapsed_secs(), Ok(0.007192));
    }

    #[test]
    fn test_parse_top_level_only() {
        let line = MAIN_LINE.replace("/met/wp-includes/js/wp-embed.min.js", "/met");
        let record = parse_line(1, &line).unwrap();

        assert_eq!(record.uri, "/met?ver=4.6.6");
        assert_eq!(record.base_uri, "/met");
        assert_eq!(record.top_level.as_deref(), Some("met"));
        assert_eq!(record.second_level, None);
    }

    #[test]
    fn test_parse_w3v_line_with_virtual_host() {
        let record = parse_line(1, W3V_LINE).unwrap();

        assert_eq!(record.ip, "101.50.113.106");
        assert_eq!(record.top_level.as_deref(), Some("bubadmin"));
        assert_eq!(record.base_uri, "/bubadmin/style.css");
        assert_eq!(record.uri, "/bubadmin/style.css?ver=1");
        assert_eq!(record.virtual_host.as_deref(), Some("blogs.bu.edu"));
        assert_eq!(record.elapsed_secs(), Ok(0.01036));
    }

    #[test]
    fn test_garbage_request_line() {
        let line = MAIN_LINE.replace(
            r#""GET /met/wp-includes/js/wp-embed.min.js?ver=4.6.6 HTTP/1.1""#,
            r#""\x16\x03\x01\x00""#,
        );
        let record = parse_line(7, &line).unwrap();

        assert_eq!(record.method, "UNKNOWN");
        assert_eq!(record.uri, "baduri");
        assert_eq!(record.base_uri, "baduri");
        assert_eq!(record.protocol, "UNKNOWN");
        assert_eq!(record.top_level.as_deref(), Some(ERROR_LEVEL));
    }

    #[test]
    fn test_dash_request_line() {
        let line = MAIN_LINE.replace(
            r#""GET /met/wp-includes/js/wp-embed.min.js?ver=4.6.6 HTTP/1.1""#,
            r#""-""#,
        );
        let record = parse_line(1, &line).unwrap();

        assert_eq!(record.request_line, "-");
        assert_eq!(record.method, "UNKNOWN");
        assert_eq!(record.uri, "baduri");
    }

    #[test]
    fn test_missing_protocol_defaults() {
        let line = MAIN_LINE.replace(
            r#""GET /met/wp-includes/js/wp-embed.min.js?ver=4.6.6 HTTP/1.1""#,
            r#""GET /index.html""#,
        );
        let record = parse_line(1, &line).unwrap();

        assert_eq!(record.method, "GET");
        assert_eq!(record.uri, "/index.html");
        assert_eq!(record.protocol, "HTTP/0.9");
        assert_eq!(record.top_level.as_deref(), Some("index.html"));
    }

    #[test]
    fn test_root_path_has_no_top_level() {
        let line = MAIN_LINE.replace("/met/wp-includes/js/wp-embed.min.js?ver=4.6.6", "/");
        let record = parse_line(1, &line).unwrap();

        assert_eq!(record.base_uri, "/");
        assert_eq!(record.top_level, None);
        assert_eq!(record.second_level, None);
    }

    #[test]
    fn test_escaped_quote_in_referer() {
        let line = MAIN_LINE.replace(
            r#""http://www.bu.edu/met/programs/graduate/arts-administration/""#,
            r#""http://x/?q=\"a b\"""#,
        );
        let record = parse_line(1, &line).unwrap();

        assert_eq!(record.referer, r#""http://x/?q=\"a b\"""#);
        assert_eq!(record.browser, BROWSER);
        assert_eq!(record.pid, "10673");
    }

    #[test]
    fn test_too_few_fields() {
        let err = parse_line(42, r#"1.2.3.4 - - [01/Sep/2017:00:00:08 -0400] "GET / HTTP/1.1" 200 5"#)
            .unwrap_err();

        assert!(matches!(
            err,
            ParseError::TooFewFields { line_number: 42, found: 8, required: MIN_FIELDS }
        ));
    }

    #[test]
    fn test_convert_bytes() {
        assert_eq!(convert_bytes("-"), Ok(0));
        assert_eq!(convert_bytes("1403"), Ok(1403));
        assert_eq!(
            convert_bytes("12k"),
            Err(ParseError::InvalidSize("12k".to_string()))
        );
    }

    #[test]
    fn test_convert_elapsed() {
        assert_eq!(convert_elapsed("-"), Ok(0.0));
        assert_eq!(convert_elapsed("0.5"), Ok(0.5));
        assert_eq!(convert_elapsed("10359:2000000"), Ok(2.0));
        assert!(convert_elapsed("soon").is_err());
    }
}
