//! Expansion of profiles into runnable tests, one per stage.

use crate::profile::{ProfileStore, Stage, StageInput};
use base64::Engine as _;
use base64::engine::general_purpose::STANDARD;
use std::fmt::Write as _;
use std::path::PathBuf;
use thiserror::Error;
use tracing::{debug, warn};
use wafcheck_engine::ExpectedOutput;

const DEFAULT_METHOD: &str = "GET";
const DEFAULT_URI: &str = "/";
const DEFAULT_VERSION: &str = "HTTP/1.1";
const DEFAULT_ADDR: &str = "127.0.0.1";
const DEFAULT_PORT: u16 = 80;
const FORM_CONTENT_TYPE: &str = "application/x-www-form-urlencoded";

/// Errors that drop a single stage.
#[derive(Debug, Error)]
pub enum MaterializeError {
    /// `encoded_request` is not valid base64.
    #[error("invalid encoded_request: {0}")]
    InvalidBase64(#[from] base64::DecodeError),

    /// A raw request could not be parsed as an HTTP/1.x message.
    #[error("malformed raw request: {0}")]
    MalformedRequest(String),
}

/// Where a test came from.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct TestOrigin {
    pub profile: usize,
    pub case: usize,
    pub stage: usize,
    pub profile_path: PathBuf,
}

/// The request handed to the engine.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SynthesizedRequest {
    pub method: String,
    pub uri: String,
    pub version: String,
    pub headers: Vec<(String, String)>,
    pub body: Vec<u8>,
}

impl SynthesizedRequest {
    /// Case-insensitive header lookup.
    pub fn header(&self, name: &str) -> Option<&str> {
        self.headers
            .iter()
            .find(|(k, _)| k.eq_ignore_ascii_case(name))
            .map(|(_, v)| v.as_str())
    }

    /// Renders the request as HTTP/1.x text.
    pub fn to_http(&self) -> String {
        let mut out = format!("{} {} {}\r\n", self.method, self.uri, self.version);
        for (name, value) in &self.headers {
            let _ = write!(out, "{name}: {value}\r\n");
        }
        out.push_str("\r\n");
        out.push_str(&String::from_utf8_lossy(&self.body));
        out
    }
}

/// The response handed to the engine.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SynthesizedResponse {
    pub status: u16,
    pub protocol: String,
    pub headers: Vec<(String, String)>,
    pub body: Vec<u8>,
}

/// One runnable test, built from a single stage.
#[derive(Debug, Clone)]
pub struct MaterializedTest {
    pub name: String,
    pub origin: TestOrigin,
    pub server_addr: String,
    pub server_port: u16,
    pub request: SynthesizedRequest,
    pub response: SynthesizedResponse,
    pub expected: ExpectedOutput,
}

/// A stage that could not be turned into a test.
#[derive(Debug)]
pub struct DroppedStage {
    pub name: String,
    pub error: MaterializeError,
}

/// Result of materializing a whole store.
#[derive(Debug, Default)]
pub struct Materialized {
    pub tests: Vec<MaterializedTest>,
    pub dropped: Vec<DroppedStage>,
}

/// Name of a stage's test: the bare title for single-stage cases, otherwise
/// the title with a 1-based `#n` suffix.
pub fn test_name(title: &str, stage_count: usize, stage_index: usize) -> String {
    if stage_count > 1 {
        format!("{title}#{}", stage_index + 1)
    } else {
        title.to_string()
    }
}

/// Produces one test per stage of every enabled profile, in store order.
///
/// Stages that fail to materialize are logged and returned as dropped.
pub fn materialize(store: &ProfileStore) -> Materialized {
    let mut out = Materialized::default();

    for (profile_idx, loaded) in store.profiles().iter().enumerate() {
        if !loaded.profile.meta.enabled {
            debug!("Profile {} is disabled", loaded.path.display());
            continue;
        }

        for (case_idx, case) in loaded.profile.tests.iter().enumerate() {
            let stage_count = case.stages.len();
            for (stage_idx, entry) in case.stages.iter().enumerate() {
                let name = test_name(&case.test_title, stage_count, stage_idx);
                let origin = TestOrigin {
                    profile: profile_idx,
                    case: case_idx,
                    stage: stage_idx,
                    profile_path: loaded.path.clone(),
                };
                match materialize_stage(name.clone(), origin, &entry.stage) {
                    Ok(test) => out.tests.push(test),
                    Err(error) => {
                        warn!("Dropping stage {}: {}", name, error);
                        out.dropped.push(DroppedStage { name, error });
                    }
                }
            }
        }
    }

    out
}

/// Builds the test for one stage.
pub fn materialize_stage(
    name: String,
    origin: TestOrigin,
    stage: &Stage,
) -> Result<MaterializedTest, MaterializeError> {
    let input = &stage.input;
    let request = synthesize_request(input)?;

    let response = SynthesizedResponse {
        status: 200,
        protocol: DEFAULT_VERSION.to_string(),
        headers: stage
            .output
            .headers
            .iter()
            .map(|(k, v)| (k.clone(), v.clone()))
            .collect(),
        body: stage
            .output
            .data
            .as_ref()
            .map(|d| d.to_bytes())
            .unwrap_or_default(),
    };

    Ok(MaterializedTest {
        name,
        origin,
        server_addr: input
            .dest_addr
            .clone()
            .unwrap_or_else(|| DEFAULT_ADDR.to_string()),
        server_port: input.port.unwrap_or(DEFAULT_PORT),
        request,
        response,
        expected: stage.output.clone(),
    })
}

fn synthesize_request(input: &StageInput) -> Result<SynthesizedRequest, MaterializeError> {
    // An empty raw or encoded request counts as absent.
    if let Some(raw) = input.raw_request.as_deref().filter(|s| !s.is_empty()) {
        return parse_raw_request(raw.as_bytes());
    }

    if let Some(encoded) = input.encoded_request.as_deref().filter(|s| !s.is_empty()) {
        // Block scalars wrap long payloads across lines.
        let joined: String = encoded.split_ascii_whitespace().collect();
        let bytes = STANDARD.decode(joined)?;
        return parse_raw_request(&bytes);
    }

    let mut request = SynthesizedRequest {
        method: input
            .method
            .clone()
            .unwrap_or_else(|| DEFAULT_METHOD.to_string()),
        uri: input.uri.clone().unwrap_or_else(|| DEFAULT_URI.to_string()),
        version: input
            .version
            .clone()
            .unwrap_or_else(|| DEFAULT_VERSION.to_string()),
        headers: input
            .headers
            .iter()
            .map(|(k, v)| (k.clone(), v.clone()))
            .collect(),
        body: input.data.as_ref().map(|d| d.to_bytes()).unwrap_or_default(),
    };

    if !input.stop_magic {
        apply_magic(&mut request);
    }
    Ok(request)
}

/// Fills in framing headers a client would normally send with a body.
fn apply_magic(request: &mut SynthesizedRequest) {
    if request.body.is_empty() {
        return;
    }
    if request.header("Content-Length").is_none() {
        request
            .headers
            .push(("Content-Length".to_string(), request.body.len().to_string()));
    }
    if request.header("Content-Type").is_none() {
        request
            .headers
            .push(("Content-Type".to_string(), FORM_CONTENT_TYPE.to_string()));
    }
}

/// Parses an HTTP/1.x request message. CRLF and bare LF line endings are
/// both accepted; everything after the first blank line is the body.
pub fn parse_raw_request(raw: &[u8]) -> Result<SynthesizedRequest, MaterializeError> {
    let (head, body) = split_head(raw);
    let head = String::from_utf8_lossy(head);
    let mut lines = head.split('\n').map(|l| l.strip_suffix('\r').unwrap_or(l));

    let request_line = lines
        .next()
        .filter(|l| !l.trim().is_empty())
        .ok_or_else(|| MaterializeError::MalformedRequest("missing request line".to_string()))?;
    let mut parts = request_line.split_whitespace();
    let (Some(method), Some(uri)) = (parts.next(), parts.next()) else {
        return Err(MaterializeError::MalformedRequest(format!(
            "invalid request line '{request_line}'"
        )));
    };
    let version = parts.next().unwrap_or(DEFAULT_VERSION);
    if parts.next().is_some() {
        return Err(MaterializeError::MalformedRequest(format!(
            "invalid request line '{request_line}'"
        )));
    }

    let mut headers = Vec::new();
    for line in lines.filter(|l| !l.is_empty()) {
        let (name, value) = line.split_once(':').ok_or_else(|| {
            MaterializeError::MalformedRequest(format!("invalid header line '{line}'"))
        })?;
        headers.push((name.trim().to_string(), value.trim().to_string()));
    }

    Ok(SynthesizedRequest {
        method: method.to_string(),
        uri: uri.to_string(),
        version: version.to_string(),
        headers,
        body: body.to_vec(),
    })
}

fn split_head(raw: &[u8]) -> (&[u8], &[u8]) {
    for (idx, window) in raw.windows(2).enumerate() {
        if window == b"\n\n" {
            return (&raw[..idx], &raw[idx + 2..]);
        }
        if window == b"\n\r" && raw.get(idx + 2) == Some(&b'\n') {
            return (&raw[..idx], &raw[idx + 3..]);
        }
    }
    (raw, &[])
}
