//! Control of the Charles intercepting proxy.
//!
//! Charles exposes a small control API on the virtual origin
//! `http://control.charles`, reachable only through the proxy listener
//! itself. [`ProxyControl`] issues blocking GETs against it to export and
//! clear the recorded session and to toggle map-local, throttling and
//! rewrite. It can also start and kill the proxy application.
//!
//! # Example
//!
//! ```no_run
//! use andromate_core::config::ProxyConfig;
//! use andromate_core::proxy::ProxyControl;
//!
//! let proxy = ProxyControl::new(ProxyConfig::default()).unwrap();
//! proxy.clear_session().unwrap();
//! // ... drive the app ...
//! let login = proxy.first_entry_in_session("/api/login", false).unwrap();
//! assert!(login.is_some());
//! ```

use std::path::Path;
use std::process::{Child, Command};
use std::sync::OnceLock;
use std::time::Duration;

use regex::Regex;
use reqwest::blocking::{Client, Response};
use reqwest::StatusCode;
use serde::{Deserialize, Serialize};
use serde_json::{Map, Value};
use thiserror::Error;
use tracing::{debug, info, warn};

use crate::config::ProxyConfig;

const SESSION_EXPORT_JSON: &str = "/session/export-json";
const SESSION_CLEAR: &str = "/session/clear";
const MAP_LOCAL_ENABLE: &str = "/tools/map-local/enable";
const MAP_LOCAL_DISABLE: &str = "/tools/map-local/disable";
const THROTTLING_ACTIVATE: &str = "/throttling/activate";
const THROTTLING_DEACTIVATE: &str = "/throttling/deactivate";
const REWRITE_DISABLE: &str = "/tools/rewrite/disable";

/// Errors from the proxy control channel.
#[derive(Error, Debug)]
pub enum ProxyError {
    /// The HTTP request could not be made.
    #[error("HTTP error: {0}")]
    Http(#[from] reqwest::Error),

    /// A control endpoint answered with something other than 200.
    #[error("{url} returned status {status}")]
    Status { url: String, status: u16 },

    /// The proxy answered with data that does not decode.
    #[error("Malformed response: {0}")]
    MalformedResponse(String),

    /// The requested throttling preset is not configured.
    #[error("Unknown throttling preset '{0}'")]
    UnknownPreset(String),

    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),
}

/// Body of a recorded request or response.
#[derive(Debug, Clone, PartialEq, Default, Serialize, Deserialize)]
pub struct Body {
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub text: Option<String>,
    #[serde(flatten)]
    pub extra: Map<String, Value>,
}

/// A recorded request or response.
#[derive(Debug, Clone, PartialEq, Default, Serialize, Deserialize)]
pub struct Message {
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub body: Option<Body>,
    #[serde(flatten)]
    pub extra: Map<String, Value>,
}

/// One exchange in the exported proxy session.
///
/// Only the fields automation relies on are typed; everything else Charles
/// exports is kept in `extra`.
#[derive(Debug, Clone, PartialEq, Default, Serialize, Deserialize)]
pub struct SessionEntry {
    #[serde(default)]
    pub host: String,
    #[serde(default)]
    pub path: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub method: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub scheme: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub request: Option<Message>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub response: Option<Message>,
    #[serde(flatten)]
    pub extra: Map<String, Value>,
}

impl SessionEntry {
    /// Request body text, if the entry recorded one.
    pub fn request_body(&self) -> Option<&str> {
        self.request
            .as_ref()
            .and_then(|m| m.body.as_ref())
            .and_then(|b| b.text.as_deref())
    }

    /// Request body decoded as JSON.
    pub fn request_json(&self) -> Result<Value, ProxyError> {
        let text = self.request_body().ok_or_else(|| {
            ProxyError::MalformedResponse(format!("entry {} has no request body", self.path))
        })?;
        serde_json::from_str(text).map_err(|e| {
            ProxyError::MalformedResponse(format!("request body of {} is not JSON: {}", self.path, e))
        })
    }
}

/// Parses an exported session. `null` entries are dropped.
pub fn parse_session(json: &str) -> Result<Vec<SessionEntry>, ProxyError> {
    let entries: Vec<Option<SessionEntry>> = serde_json::from_str(json)
        .map_err(|e| ProxyError::MalformedResponse(format!("session export: {}", e)))?;
    Ok(entries.into_iter().flatten().collect())
}

/// First entry whose path is exactly `path`.
pub fn first_entry<'a>(session: &'a [SessionEntry], path: &str) -> Option<&'a SessionEntry> {
    session.iter().find(|entry| entry.path == path)
}

/// Client for the proxy's HTTP control interface.
pub struct ProxyControl {
    client: Client,
    config: ProxyConfig,
}

impl ProxyControl {
    /// Builds a client that routes control requests through the configured
    /// listener.
    pub fn new(config: ProxyConfig) -> Result<Self, ProxyError> {
        let builder = Client::builder();
        let builder = match &config.listener {
            Some(listener) => builder.proxy(reqwest::Proxy::http(listener.as_str())?),
            None => builder.no_proxy(),
        };
        Ok(Self {
            client: builder.build()?,
            config,
        })
    }

    pub fn config(&self) -> &ProxyConfig {
        &self.config
    }

    fn url(&self, path: &str) -> String {
        format!("{}{}", self.config.control_origin.trim_end_matches('/'), path)
    }

    fn send(&self, path: &str, query: Option<(&str, &str)>) -> Result<Response, ProxyError> {
        let url = self.url(path);
        let mut request = self.client.get(&url);
        if let Some(pair) = query {
            request = request.query(&[pair]);
        }
        let response = request.send()?;
        debug!(url = %url, status = response.status().as_u16(), "proxy control");
        if response.status() != StatusCode::OK {
            return Err(ProxyError::Status {
                url,
                status: response.status().as_u16(),
            });
        }
        Ok(response)
    }

    fn call(&self, path: &str) -> Result<(), ProxyError> {
        self.send(path, None)?;
        Ok(())
    }

    /// The recorded session, oldest entry first.
    pub fn session(&self) -> Result<Vec<SessionEntry>, ProxyError> {
        let body = self.send(SESSION_EXPORT_JSON, None)?.text()?;
        parse_session(&body)
    }

    pub fn clear_session(&self) -> Result<(), ProxyError> {
        self.call(SESSION_CLEAR)
    }

    /// Turns on the map-local rules defined by the loaded configuration.
    pub fn enable_local_mapping(&self) -> Result<(), ProxyError> {
        self.call(MAP_LOCAL_ENABLE)
    }

    pub fn disable_local_mapping(&self) -> Result<(), ProxyError> {
        self.call(MAP_LOCAL_DISABLE)
    }

    /// Activates throttling with a configured preset, or re-activates the
    /// last used preset when `preset` is `None`.
    pub fn enable_throttling(&self, preset: Option<&str>) -> Result<(), ProxyError> {
        let name = match preset {
            Some(key) => self
                .config
                .throttling_presets
                .get(key)
                .ok_or_else(|| ProxyError::UnknownPreset(key.to_string()))?
                .as_str(),
            None => "",
        };
        self.send(THROTTLING_ACTIVATE, Some(("preset", name)))?;
        Ok(())
    }

    pub fn disable_throttling(&self) -> Result<(), ProxyError> {
        self.call(THROTTLING_DEACTIVATE)
    }

    /// Disables all configured rewrite rules.
    pub fn disable_rewrite(&self) -> Result<(), ProxyError> {
        self.call(REWRITE_DISABLE)
    }

    /// First entry of the current session with exactly `path`, searching
    /// newest first when `newest_first` is set.
    pub fn first_entry_in_session(
        &self,
        path: &str,
        newest_first: bool,
    ) -> Result<Option<SessionEntry>, ProxyError> {
        let mut session = self.session()?;
        if newest_first {
            session.reverse();
        }
        Ok(first_entry(&session, path).cloned())
    }

    /// Whether any request in the current session has a path containing `path`.
    pub fn has_request_to_path(&self, path: &str) -> Result<bool, ProxyError> {
        Ok(self.session()?.iter().any(|entry| entry.path.contains(path)))
    }

    /// Whether any request in the current session went to `host`.
    pub fn has_request_to_host(&self, host: &str) -> Result<bool, ProxyError> {
        Ok(self.session()?.iter().any(|entry| entry.host == host))
    }

    /// Kills any running instance and starts the proxy application, then
    /// resets map-local, throttling and rewrite once it has booted.
    pub fn launch(&self, config_file: Option<&Path>) -> Result<Child, ProxyError> {
        self.kill()?;

        let mut command = Command::new(&self.config.app_path);
        if let Some(file) = config_file {
            command.arg("--config").arg(file);
        }
        let mut child = command.spawn()?;
        info!(pid = child.id(), app = %self.config.app_path.display(), "proxy launched");

        std::thread::sleep(Duration::from_millis(self.config.boot_wait_ms));
        if let Err(e) = self.reset_tools() {
            warn!(pid = child.id(), error = %e, "proxy did not accept control requests, stopping it");
            if let Err(kill_err) = child.kill() {
                debug!(error = %kill_err, "proxy already exited");
            }
            child.wait()?;
            return Err(e);
        }
        Ok(child)
    }

    /// Turns off map-local, throttling and rewrite, pausing after each.
    fn reset_tools(&self) -> Result<(), ProxyError> {
        let settle = Duration::from_millis(self.config.control_settle_ms);
        self.disable_local_mapping()?;
        std::thread::sleep(settle);
        self.disable_throttling()?;
        std::thread::sleep(settle);
        self.disable_rewrite()?;
        std::thread::sleep(settle);
        Ok(())
    }

    /// Kills every running proxy instance. Having none running, or no
    /// `killall` on the host, is fine.
    pub fn kill(&self) -> Result<(), ProxyError> {
        let output = match Command::new("killall")
            .args(["-9", self.config.process_name.as_str()])
            .output()
        {
            Ok(output) => output,
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => {
                warn!("killall not found, skipping proxy kill");
                return Ok(());
            }
            Err(e) => return Err(e.into()),
        };
        if !output.status.success() {
            debug!(process = %self.config.process_name, "no running proxy to kill");
        }
        Ok(())
    }
}

fn dest_regex() -> &'static Regex {
    static DEST_RE: OnceLock<Regex> = OnceLock::new();
    DEST_RE.get_or_init(|| {
        Regex::new(r"<dest>(?:.*?/body_files_qa)/(.*?)</dest>").expect("dest regex is valid")
    })
}

/// Rewrites the first `<dest>.../body_files_qa/REST</dest>` of each line to
/// `<dest>NEW_ROOT/REST</dest>`.
pub fn rewrite_mapping_line(line: &str, new_root: &str) -> Option<String> {
    let re = dest_regex();
    if !re.is_match(line) {
        return None;
    }
    Some(
        re.replacen(line, 1, |caps: &regex::Captures<'_>| {
            format!("<dest>{}/{}</dest>", new_root, &caps[1])
        })
        .into_owned(),
    )
}

/// Points every map-local destination in the config files under `dir` at
/// `new_root`. Returns the number of lines changed.
pub fn rewrite_mapping_roots(dir: &Path, new_root: &str) -> Result<usize, ProxyError> {
    let mut changed = 0;
    for entry in std::fs::read_dir(dir)? {
        let path = entry?.path();
        if !path.is_file() {
            continue;
        }
        let content = std::fs::read_to_string(&path)?;
        let mut file_changed = 0;
        let rewritten: String = content
            .split_inclusive('\n')
            .map(|line| match rewrite_mapping_line(line, new_root) {
                Some(new_line) => {
                    file_changed += 1;
                    new_line
                }
                None => line.to_string(),
            })
            .collect();
        if file_changed > 0 {
            std::fs::write(&path, rewritten)?;
            debug!(path = %path.display(), lines = file_changed, "rewrote mapping roots");
            changed += file_changed;
        }
    }
    Ok(changed)
}
