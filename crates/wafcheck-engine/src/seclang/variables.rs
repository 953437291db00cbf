//! Rule targets and the transaction data they resolve against.

use regex::Regex;

/// Collections a rule can target.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Collection {
    Args,
    ArgsGet,
    ArgsPost,
    ArgsNames,
    QueryString,
    RequestUri,
    RequestFilename,
    RequestMethod,
    RequestProtocol,
    RequestLine,
    RequestHeaders,
    RequestHeadersNames,
    RequestBody,
    ResponseStatus,
    ResponseProtocol,
    ResponseHeaders,
    ResponseBody,
    RemoteAddr,
    ServerName,
    ServerPort,
}

impl Collection {
    pub const ALL: [Collection; 20] = [
        Collection::Args,
        Collection::ArgsGet,
        Collection::ArgsPost,
        Collection::ArgsNames,
        Collection::QueryString,
        Collection::RequestUri,
        Collection::RequestFilename,
        Collection::RequestMethod,
        Collection::RequestProtocol,
        Collection::RequestLine,
        Collection::RequestHeaders,
        Collection::RequestHeadersNames,
        Collection::RequestBody,
        Collection::ResponseStatus,
        Collection::ResponseProtocol,
        Collection::ResponseHeaders,
        Collection::ResponseBody,
        Collection::RemoteAddr,
        Collection::ServerName,
        Collection::ServerPort,
    ];

    pub fn from_name(name: &str) -> Option<Self> {
        let upper = name.to_ascii_uppercase();
        Self::ALL.into_iter().find(|c| c.name() == upper)
    }

    pub fn name(self) -> &'static str {
        match self {
            Collection::Args => "ARGS",
            Collection::ArgsGet => "ARGS_GET",
            Collection::ArgsPost => "ARGS_POST",
            Collection::ArgsNames => "ARGS_NAMES",
            Collection::QueryString => "QUERY_STRING",
            Collection::RequestUri => "REQUEST_URI",
            Collection::RequestFilename => "REQUEST_FILENAME",
            Collection::RequestMethod => "REQUEST_METHOD",
            Collection::RequestProtocol => "REQUEST_PROTOCOL",
            Collection::RequestLine => "REQUEST_LINE",
            Collection::RequestHeaders => "REQUEST_HEADERS",
            Collection::RequestHeadersNames => "REQUEST_HEADERS_NAMES",
            Collection::RequestBody => "REQUEST_BODY",
            Collection::ResponseStatus => "RESPONSE_STATUS",
            Collection::ResponseProtocol => "RESPONSE_PROTOCOL",
            Collection::ResponseHeaders => "RESPONSE_HEADERS",
            Collection::ResponseBody => "RESPONSE_BODY",
            Collection::RemoteAddr => "REMOTE_ADDR",
            Collection::ServerName => "SERVER_NAME",
            Collection::ServerPort => "SERVER_PORT",
        }
    }
}

/// Narrows a keyed collection to some of its entries.
#[derive(Debug, Clone)]
pub enum KeySelector {
    Exact(String),
    Pattern(Regex),
}

impl KeySelector {
    fn matches(&self, key: &str) -> bool {
        match self {
            KeySelector::Exact(wanted) => wanted.eq_ignore_ascii_case(key),
            KeySelector::Pattern(re) => re.is_match(key),
        }
    }
}

/// One entry of a rule's `VARIABLES` list.
#[derive(Debug, Clone)]
pub struct VariableSelector {
    pub collection: Collection,
    pub key: Option<KeySelector>,
}

impl VariableSelector {
    /// Parses `NAME`, `NAME:key` or `NAME:/regex/`.
    pub fn parse(spec: &str) -> Result<Self, String> {
        if spec.starts_with('!') || spec.starts_with('&') {
            return Err(format!("unsupported variable modifier in '{spec}'"));
        }
        let (name, key) = match spec.split_once(':') {
            Some((name, key)) => (name, Some(key)),
            None => (spec, None),
        };
        let collection =
            Collection::from_name(name).ok_or_else(|| format!("unknown variable '{name}'"))?;
        let key = match key {
            None => None,
            Some(k) if k.len() >= 2 && k.starts_with('/') && k.ends_with('/') => {
                let re = Regex::new(&format!("(?i){}", &k[1..k.len() - 1]))
                    .map_err(|e| format!("invalid key pattern '{k}': {e}"))?;
                Some(KeySelector::Pattern(re))
            }
            Some(k) => Some(KeySelector::Exact(k.to_string())),
        };
        Ok(Self { collection, key })
    }
}

/// Everything the transaction knows about the exchange so far.
#[derive(Debug, Clone, Default)]
pub struct TransactionData {
    pub remote_addr: String,
    pub server_name: String,
    pub server_port: u16,
    pub method: String,
    pub uri: String,
    pub protocol: String,
    pub request_headers: Vec<(String, String)>,
    pub request_body: Vec<u8>,
    pub response_status: u16,
    pub response_protocol: String,
    pub response_headers: Vec<(String, String)>,
    pub response_body: Vec<u8>,
}

impl TransactionData {
    fn filename(&self) -> &str {
        self.uri.split_once('?').map_or(self.uri.as_str(), |(path, _)| path)
    }

    fn query(&self) -> &str {
        self.uri.split_once('?').map_or("", |(_, query)| query)
    }

    fn request_header(&self, name: &str) -> Option<&str> {
        self.request_headers
            .iter()
            .find(|(k, _)| k.eq_ignore_ascii_case(name))
            .map(|(_, v)| v.as_str())
    }

    fn args_get(&self) -> Vec<(String, String)> {
        parse_form(self.query())
    }

    fn args_post(&self) -> Vec<(String, String)> {
        let is_form = self
            .request_header("Content-Type")
            .is_some_and(|ct| ct.to_ascii_lowercase().contains("application/x-www-form-urlencoded"));
        if !is_form {
            return Vec::new();
        }
        parse_form(&String::from_utf8_lossy(&self.request_body))
    }

    /// Resolves one collection into `(key, value)` pairs; scalar collections
    /// use an empty key.
    pub fn entries(&self, collection: Collection) -> Vec<(String, String)> {
        let scalar = |value: String| vec![(String::new(), value)];
        match collection {
            Collection::Args => {
                let mut args = self.args_get();
                args.extend(self.args_post());
                args
            }
            Collection::ArgsGet => self.args_get(),
            Collection::ArgsPost => self.args_post(),
            Collection::ArgsNames => {
                let mut args = self.args_get();
                args.extend(self.args_post());
                args.into_iter().map(|(k, _)| (k.clone(), k)).collect()
            }
            Collection::QueryString => scalar(self.query().to_string()),
            Collection::RequestUri => scalar(self.uri.clone()),
            Collection::RequestFilename => scalar(self.filename().to_string()),
            Collection::RequestMethod => scalar(self.method.clone()),
            Collection::RequestProtocol => scalar(self.protocol.clone()),
            Collection::RequestLine => {
                scalar(format!("{} {} {}", self.method, self.uri, self.protocol))
            }
            Collection::RequestHeaders => self.request_headers.clone(),
            Collection::RequestHeadersNames => self
                .request_headers
                .iter()
                .map(|(k, _)| (k.clone(), k.clone()))
                .collect(),
            Collection::RequestBody => {
                scalar(String::from_utf8_lossy(&self.request_body).into_owned())
            }
            Collection::ResponseStatus => scalar(self.response_status.to_string()),
            Collection::ResponseProtocol => scalar(self.response_protocol.clone()),
            Collection::ResponseHeaders => self.response_headers.clone(),
            Collection::ResponseBody => {
                scalar(String::from_utf8_lossy(&self.response_body).into_owned())
            }
            Collection::RemoteAddr => scalar(self.remote_addr.clone()),
            Collection::ServerName => scalar(self.server_name.clone()),
            Collection::ServerPort => scalar(self.server_port.to_string()),
        }
    }

    /// Resolves a selector into `(display name, value)` pairs.
    pub fn resolve(&self, selector: &VariableSelector) -> Vec<(String, String)> {
        let name = selector.collection.name();
        self.entries(selector.collection)
            .into_iter()
            .filter(|(key, _)| selector.key.as_ref().is_none_or(|sel| sel.matches(key)))
            .map(|(key, value)| {
                let display = if key.is_empty() {
                    name.to_string()
                } else {
                    format!("{name}:{key}")
                };
                (display, value)
            })
            .collect()
    }
}

/// Splits an `a=b&c=d` string into decoded pairs.
pub fn parse_form(input: &str) -> Vec<(String, String)> {
    input
        .split('&')
        .filter(|part| !part.is_empty())
        .map(|part| {
            let (k, v) = part.split_once('=').unwrap_or((part, ""));
            (form_decode(k), form_decode(v))
        })
        .collect()
}

fn form_decode(raw: &str) -> String {
    let spaced = raw.replace('+', " ");
    String::from_utf8_lossy(&urlencoding::decode_binary(spaced.as_bytes())).into_owned()
}
