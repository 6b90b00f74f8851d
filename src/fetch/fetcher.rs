// src/fetch/fetcher.rs
//! Transport seam for the source chain: HTTP/file fetcher plus a scripted double.

use std::collections::HashMap;
use std::sync::Mutex;
use std::time::Duration;

use anyhow::Context;
use async_trait::async_trait;
use chrono::{Days, NaiveDate, Utc};
use once_cell::sync::OnceCell;
use regex::{Captures, Regex};
use reqwest::header::ACCEPT;

use crate::error::AttemptError;
use crate::fetch::types::{Format, SourceSpec};

pub const DEFAULT_USER_AGENT: &str =
    "morning-briefing/0.1 (+https://github.com/morning-briefing/morning-briefing)";

/// Fetches the raw body for one source. Implementations must not retry;
/// the chain runner owns ordering and timeouts.
#[async_trait]
pub trait Fetcher: Send + Sync {
    async fn fetch(&self, source: &SourceSpec) -> Result<String, AttemptError>;
}

/// Expand `${ENV_VAR}`, `{today}` and `{today+N}` in a URL template.
pub fn expand_url(template: &str, today: NaiveDate) -> Result<String, AttemptError> {
    static RE_ENV: OnceCell<Regex> = OnceCell::new();
    static RE_DATE: OnceCell<Regex> = OnceCell::new();
    let re_env =
        RE_ENV.get_or_init(|| Regex::new(r"\$\{([A-Za-z0-9_]+)\}").expect("env placeholder regex"));
    let re_date = RE_DATE
        .get_or_init(|| Regex::new(r"\{today(?:\+(\d{1,3}))?\}").expect("date placeholder regex"));

    let mut missing: Option<String> = None;
    let with_env = re_env.replace_all(template, |caps: &Captures| {
        let var = &caps[1];
        match std::env::var(var) {
            Ok(v) if !v.is_empty() => v,
            _ => {
                missing.get_or_insert_with(|| var.to_string());
                String::new()
            }
        }
    });
    if let Some(var) = missing {
        return Err(AttemptError::MissingEnv(var));
    }

    let expanded = re_date.replace_all(&with_env, |caps: &Captures| {
        let offset = caps
            .get(1)
            .and_then(|m| m.as_str().parse::<u64>().ok())
            .unwrap_or(0);
        today
            .checked_add_days(Days::new(offset))
            .unwrap_or(today)
            .format("%Y-%m-%d")
            .to_string()
    });
    Ok(expanded.into_owned())
}

fn accept_for(format: Format) -> &'static str {
    match format {
        Format::Csv => "text/csv, text/plain;q=0.9, */*;q=0.5",
        Format::Json => "application/json, */*;q=0.5",
        Format::Rss => "application/rss+xml, application/xml;q=0.9, */*;q=0.5",
        Format::HtmlScrape => "text/html, */*;q=0.5",
    }
}

/// Production fetcher: `file://` paths are read from disk, everything else is an HTTP GET.
pub struct HttpFetcher {
    http: reqwest::Client,
}

impl HttpFetcher {
    pub fn new(user_agent: &str) -> anyhow::Result<Self> {
        let http = reqwest::Client::builder()
            .user_agent(user_agent)
            .connect_timeout(Duration::from_secs(4))
            .build()
            .context("building reqwest client")?;
        Ok(Self { http })
    }
}

#[async_trait]
impl Fetcher for HttpFetcher {
    async fn fetch(&self, source: &SourceSpec) -> Result<String, AttemptError> {
        let url = expand_url(&source.url, Utc::now().date_naive())?;

        if let Some(path) = url.strip_prefix("file://") {
            return tokio::fs::read_to_string(path)
                .await
                .map_err(|e| AttemptError::Io(e.to_string()));
        }

        let resp = self
            .http
            .get(&url)
            .timeout(source.timeout())
            .header(ACCEPT, accept_for(source.format))
            .send()
            .await
            .map_err(|e| AttemptError::from_reqwest(e.without_url(), source.timeout_ms))?;

        let status = resp.status();
        if !status.is_success() {
            return Err(AttemptError::Status(status.as_u16()));
        }
        resp.text()
            .await
            .map_err(|e| AttemptError::from_reqwest(e.without_url(), source.timeout_ms))
    }
}

/// Canned upstream behavior for [`ScriptedFetcher`].
#[derive(Debug, Clone)]
pub enum Scripted {
    Body(String),
    Status(u16),
    Transport(String),
    /// Wait, then behave like the inner step.
    Delay(Duration, Box<Scripted>),
}

impl Scripted {
    pub fn body(s: impl Into<String>) -> Self {
        Scripted::Body(s.into())
    }

    pub fn delayed(ms: u64, then: Scripted) -> Self {
        Scripted::Delay(Duration::from_millis(ms), Box::new(then))
    }
}

/// Deterministic fetcher keyed by URL template; records every call in order.
/// Unknown URLs fail as transport errors.
#[derive(Default)]
pub struct ScriptedFetcher {
    routes: HashMap<String, Scripted>,
    calls: Mutex<Vec<String>>,
}

impl ScriptedFetcher {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn route(mut self, url: impl Into<String>, step: Scripted) -> Self {
        self.routes.insert(url.into(), step);
        self
    }

    pub fn calls(&self) -> Vec<String> {
        self.calls.lock().expect("scripted calls mutex poisoned").clone()
    }
}

#[async_trait]
impl Fetcher for ScriptedFetcher {
    async fn fetch(&self, source: &SourceSpec) -> Result<String, AttemptError> {
        self.calls
            .lock()
            .expect("scripted calls mutex poisoned")
            .push(source.url.clone());

        let mut step = self.routes.get(&source.url).cloned();
        loop {
            match step {
                Some(Scripted::Delay(d, next)) => {
                    tokio::time::sleep(d).await;
                    step = Some(*next);
                }
                Some(Scripted::Body(b)) => return Ok(b),
                Some(Scripted::Status(code)) => return Err(AttemptError::Status(code)),
                Some(Scripted::Transport(msg)) => return Err(AttemptError::Transport(msg)),
                None => {
                    return Err(AttemptError::Transport(format!(
                        "no scripted route for {}",
                        source.url
                    )))
                }
            }
        }
    }
}
