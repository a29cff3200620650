//! Blocking HTTP client for the BluConsole REST endpoint.
//!
//! - Blocking client using `ureq` (no async).
//! - The console exposes a single GET resource returning XML; which document
//!   comes back depends on the query parameters.
//! - Credentials travel as query parameters on every request. The client
//!   holds no session state, so callers pass credentials per call.
//! - One attempt per operation, fixed timeout, no retries. The console
//!   sometimes reports rejected credentials inside an HTTP 200 body, so the
//!   body is sniffed for that phrase on every fetch.

use std::time::Duration;

const DEVICES_PATH: &str = "/bluconsolerest/1.0/resources/devices";
/// Upper bound for any single console request, connect and read included.
const REQUEST_TIMEOUT: Duration = Duration::from_secs(20);
/// Phrase the console embeds in otherwise-successful bodies when the
/// supplied credentials are wrong. Matched case-insensitively, verbatim.
const BAD_CREDENTIALS_PHRASE: &str = "bad username or password";

#[derive(Debug)]
pub enum BluClientError {
    /// The console rejected the supplied credentials.
    Auth(String),
    Transport(String),
    Http { status: u16, message: String },
}

impl core::fmt::Display for BluClientError {
    fn fmt(&self, f: &mut core::fmt::Formatter<'_>) -> core::fmt::Result {
        match self {
            BluClientError::Auth(s) => write!(f, "auth error: {}", s),
            BluClientError::Transport(s) => write!(f, "transport error: {}", s),
            BluClientError::Http { status, message } => write!(f, "http {}: {}", status, message),
        }
    }
}

impl std::error::Error for BluClientError {}

/// Console account credentials, owned by the caller.
#[derive(Debug, Clone)]
pub struct BluCredentials {
    pub username: String,
    pub password: String,
}

pub struct BluClient {
    agent: ureq::Agent,
    base_url: String,
}

impl BluClient {
    pub fn new(base_url: impl Into<String>) -> Self {
        let agent = ureq::AgentBuilder::new().timeout(REQUEST_TIMEOUT).build();
        let base_url = base_url.into().trim_end_matches('/').to_string();
        BluClient { agent, base_url }
    }

    fn url(&self) -> String {
        format!("{}{}", self.base_url, DEVICES_PATH)
    }

    /// Perform one GET against the devices resource. Returns the status and
    /// body for both success and HTTP-error responses; only transport-level
    /// failures (DNS, connect, timeout, read) error here.
    fn fetch(
        &self,
        creds: &BluCredentials,
        query: &[(&str, String)],
    ) -> Result<(u16, String), BluClientError> {
        let url = self.url();
        let mut req = self
            .agent
            .get(&url)
            .query("uname", &creds.username)
            .query("upass", &creds.password);
        for (k, v) in query {
            req = req.query(k, v);
        }

        match req.call() {
            Ok(res) => {
                let status = res.status();
                let body =
                    res.into_string().map_err(|e| BluClientError::Transport(e.to_string()))?;
                Ok((status, body))
            }
            Err(ureq::Error::Status(status, res)) => {
                let body = res.into_string().unwrap_or_else(|_| String::from("<no body>"));
                Ok((status, body))
            }
            Err(ureq::Error::Transport(t)) => Err(BluClientError::Transport(t.to_string())),
        }
    }

    /// Accept a fetched response: embedded credential rejection wins over the
    /// status code, any other non-200 carries the status out.
    fn expect_ok(status: u16, body: String) -> Result<String, BluClientError> {
        if body_signals_bad_credentials(&body) {
            return Err(BluClientError::Auth(format!(
                "console rejected credentials (http {})",
                status
            )));
        }
        if status != 200 {
            return Err(BluClientError::Http { status, message: body });
        }
        Ok(body)
    }

    /// Probe the account by fetching the bare resource. Any non-200 here is
    /// an auth failure, matching how the console behaves at sign-in.
    pub fn login(&self, creds: &BluCredentials) -> Result<(), BluClientError> {
        let (status, body) = self.fetch(creds, &[])?;
        if status != 200 || body_signals_bad_credentials(&body) {
            return Err(BluClientError::Auth(format!(
                "console rejected credentials (http {})",
                status
            )));
        }
        Ok(())
    }

    /// Fetch the device-list document. `children` toggles recursion into
    /// sub-organisations; `None` leaves the console default in place.
    pub fn get_devices(
        &self,
        creds: &BluCredentials,
        children: Option<bool>,
    ) -> Result<String, BluClientError> {
        let (status, body) = self.fetch(creds, &device_query(children))?;
        Self::expect_ok(status, body)
    }

    /// Fetch a measurement document, optionally bounded to one device and an
    /// epoch-seconds window.
    pub fn get_measurements(
        &self,
        creds: &BluCredentials,
        device_id: Option<&str>,
        from_time: Option<i64>,
        to_time: Option<i64>,
        include_all: bool,
    ) -> Result<String, BluClientError> {
        let query = measurement_query(device_id, from_time, to_time, include_all);
        let (status, body) = self.fetch(creds, &query)?;
        Self::expect_ok(status, body)
    }
}

pub(crate) fn body_signals_bad_credentials(body: &str) -> bool {
    body.to_lowercase().contains(BAD_CREDENTIALS_PHRASE)
}

fn device_query(children: Option<bool>) -> Vec<(&'static str, String)> {
    let mut query = Vec::new();
    if let Some(children) = children {
        query.push(("children", children.to_string()));
    }
    query
}

fn measurement_query(
    device_id: Option<&str>,
    from_time: Option<i64>,
    to_time: Option<i64>,
    include_all: bool,
) -> Vec<(&'static str, String)> {
    let mut query = Vec::new();
    if let Some(id) = device_id {
        query.push(("id", id.to_string()));
    }
    if let Some(from) = from_time {
        query.push(("fromTime", from.to_string()));
    }
    if let Some(to) = to_time {
        query.push(("toTime", to.to_string()));
    }
    if include_all {
        query.push(("includeAll", String::from("true")));
    }
    query
}
