//! Configuration types for the slotwatch service

use std::collections::{BTreeMap, HashSet};
use std::path::Path;
use std::time::Duration;

use chrono::{NaiveDate, Utc};
use serde::{Deserialize, Serialize};
use serde_json::json;

use crate::io::HttpMethod;
use crate::operation::{CandidateOperation, QueryWindow};
use crate::session::SessionContext;

/// Main configuration structure
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct Config {
    #[serde(default)]
    pub upstream: UpstreamConfig,
    #[serde(default)]
    pub probe: ProbeConfig,
    #[serde(default)]
    pub session: SessionConfig,
    #[serde(default)]
    pub notifiers: Vec<NotifierConfig>,
    #[serde(default)]
    pub monitors: Vec<MonitoringConfig>,
    #[serde(default)]
    pub dashboard: DashboardConfig,
}

/// The monitored service
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct UpstreamConfig {
    #[serde(default = "default_base_url")]
    pub base_url: String,
    #[serde(default = "default_headers")]
    pub headers: BTreeMap<String, String>,
}

impl Default for UpstreamConfig {
    fn default() -> Self {
        Self {
            base_url: default_base_url(),
            headers: default_headers(),
        }
    }
}

impl UpstreamConfig {
    pub fn header_pairs(&self) -> Vec<(String, String)> {
        self.headers
            .iter()
            .map(|(k, v)| (k.clone(), v.clone()))
            .collect()
    }
}

/// Endpoint discovery settings
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ProbeConfig {
    #[serde(default = "default_attempt_timeout")]
    pub attempt_timeout_seconds: u64,
    #[serde(default = "default_probe_budget")]
    pub budget_seconds: u64,
    #[serde(default = "default_target_working")]
    pub target_working: usize,
    #[serde(default = "default_candidates")]
    pub candidates: Vec<CandidateOperation>,
}

impl Default for ProbeConfig {
    fn default() -> Self {
        Self {
            attempt_timeout_seconds: default_attempt_timeout(),
            budget_seconds: default_probe_budget(),
            target_working: default_target_working(),
            candidates: default_candidates(),
        }
    }
}

/// Externally supplied session material
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct SessionConfig {
    #[serde(default)]
    pub cookie: Option<String>,
    #[serde(default)]
    pub headers: BTreeMap<String, String>,
    /// Declared validity from service start; unset means no declared window
    #[serde(default)]
    pub valid_for_seconds: Option<u64>,
    #[serde(default)]
    pub refresh: RefreshConfig,
}

impl SessionConfig {
    pub fn to_context(&self) -> SessionContext {
        let mut context = SessionContext::new(self.cookie.clone());
        for (name, value) in &self.headers {
            context = context.with_header(name, value);
        }
        if let Some(seconds) = self.valid_for_seconds {
            let lease = chrono::Duration::seconds(seconds as i64);
            context = context.with_valid_until(Utc::now() + lease);
        }
        context
    }
}

/// How the monitor tries to keep the session alive
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum RefreshConfig {
    #[default]
    None,
    KeepAlive {
        path: String,
        #[serde(default = "default_extend_by")]
        extend_by_seconds: u64,
    },
}

/// Notifier configuration with tagged enum for extensibility
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(tag = "type")]
pub enum NotifierConfig {
    #[serde(rename = "log")]
    Log,
    #[serde(rename = "pushover")]
    Pushover {
        api_token: String,
        user_key: String,
        #[serde(default = "default_pushover_title")]
        default_title: String,
        #[serde(default)]
        default_priority: i8,
        #[serde(default = "default_pushover_sound")]
        default_sound: String,
    },
    #[serde(rename = "webhook")]
    Webhook {
        url: String,
        #[serde(default)]
        headers: BTreeMap<String, String>,
        #[serde(default)]
        bearer_token: Option<String>,
    },
}

impl NotifierConfig {
    pub fn type_name(&self) -> &str {
        match self {
            NotifierConfig::Log => "log",
            NotifierConfig::Pushover { .. } => "pushover",
            NotifierConfig::Webhook { .. } => "webhook",
        }
    }
}

/// One monitoring session: what to watch and how often
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct MonitoringConfig {
    pub name: String,
    /// Location allow-list, matched against location id or name
    pub locations: Vec<String>,
    #[serde(default = "default_from_date")]
    pub from_date: NaiveDate,
    #[serde(default = "default_to_date")]
    pub to_date: NaiveDate,
    #[serde(default = "default_category")]
    pub category: String,
    #[serde(default = "default_poll_interval")]
    pub poll_interval_seconds: u64,
    #[serde(default = "default_query_timeout")]
    pub query_timeout_seconds: u64,
    #[serde(default)]
    pub notify_address: String,
    #[serde(default)]
    pub booking_url: Option<String>,
    #[serde(default = "default_seen_capacity")]
    pub seen_capacity: usize,
}

impl MonitoringConfig {
    pub fn new(name: &str, locations: &[&str], from_date: NaiveDate, to_date: NaiveDate) -> Self {
        Self {
            name: name.to_string(),
            locations: locations.iter().map(|l| l.to_string()).collect(),
            from_date,
            to_date,
            category: default_category(),
            poll_interval_seconds: default_poll_interval(),
            query_timeout_seconds: default_query_timeout(),
            notify_address: String::new(),
            booking_url: None,
            seen_capacity: default_seen_capacity(),
        }
    }

    pub fn poll_interval(&self) -> Duration {
        Duration::from_secs(self.poll_interval_seconds)
    }

    pub fn query_timeout(&self) -> Duration {
        Duration::from_secs(self.query_timeout_seconds)
    }

    pub fn window(&self) -> QueryWindow {
        QueryWindow {
            from_date: self.from_date,
            to_date: self.to_date,
            category: self.category.clone(),
        }
    }

    pub fn validate(&self) -> crate::Result<()> {
        let fail = |msg: String| Err(crate::SlotwatchError::Config(msg));
        if self.name.trim().is_empty() {
            return fail("monitor name must not be empty".to_string());
        }
        if self.locations.iter().all(|l| l.trim().is_empty()) {
            return fail(format!(
                "monitor '{}': location allow-list must not be empty",
                self.name
            ));
        }
        if self.from_date > self.to_date {
            return fail(format!(
                "monitor '{}': from_date {} is after to_date {}",
                self.name, self.from_date, self.to_date
            ));
        }
        if self.poll_interval_seconds == 0 {
            return fail(format!(
                "monitor '{}': poll_interval_seconds must be positive",
                self.name
            ));
        }
        if self.query_timeout_seconds == 0
            || self.query_timeout_seconds >= self.poll_interval_seconds
        {
            return fail(format!(
                "monitor '{}': query_timeout_seconds ({}) must be positive and shorter than poll_interval_seconds ({})",
                self.name, self.query_timeout_seconds, self.poll_interval_seconds
            ));
        }
        if self.seen_capacity == 0 {
            return fail(format!(
                "monitor '{}': seen_capacity must be positive",
                self.name
            ));
        }
        Ok(())
    }
}

/// Dashboard configuration
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct DashboardConfig {
    #[serde(default = "default_true")]
    pub enabled: bool,
    #[serde(default = "default_dashboard_port")]
    pub port: u16,
    #[serde(default = "default_history_size")]
    pub history_size: usize,
}

impl Default for DashboardConfig {
    fn default() -> Self {
        Self {
            enabled: true,
            port: default_dashboard_port(),
            history_size: default_history_size(),
        }
    }
}

impl Config {
    /// Replace `env:NAME` values with the named environment variable
    pub fn resolve_secrets(&mut self) -> crate::Result<()> {
        if let Some(cookie) = self.session.cookie.as_mut() {
            resolve_secret(cookie)?;
        }
        for value in self.session.headers.values_mut() {
            resolve_secret(value)?;
        }
        for notifier in &mut self.notifiers {
            match notifier {
                NotifierConfig::Log => {}
                NotifierConfig::Pushover {
                    api_token,
                    user_key,
                    ..
                } => {
                    resolve_secret(api_token)?;
                    resolve_secret(user_key)?;
                }
                NotifierConfig::Webhook {
                    url,
                    headers,
                    bearer_token,
                } => {
                    resolve_secret(url)?;
                    for value in headers.values_mut() {
                        resolve_secret(value)?;
                    }
                    if let Some(token) = bearer_token.as_mut() {
                        resolve_secret(token)?;
                    }
                }
            }
        }
        Ok(())
    }

    pub fn validate(&self) -> crate::Result<()> {
        if self.probe.candidates.is_empty() {
            return Err(crate::SlotwatchError::Config(
                "probe.candidates must not be empty".to_string(),
            ));
        }
        if self.probe.target_working == 0 {
            return Err(crate::SlotwatchError::Config(
                "probe.target_working must be positive".to_string(),
            ));
        }
        if self.probe.attempt_timeout_seconds == 0 || self.probe.budget_seconds == 0 {
            return Err(crate::SlotwatchError::Config(
                "probe timeouts must be positive".to_string(),
            ));
        }

        let mut names = HashSet::new();
        for monitor in &self.monitors {
            monitor.validate()?;
            if !names.insert(monitor.name.as_str()) {
                return Err(crate::SlotwatchError::Config(format!(
                    "duplicate monitor name '{}'",
                    monitor.name
                )));
            }
        }
        Ok(())
    }
}

fn resolve_secret(value: &mut String) -> crate::Result<()> {
    if let Some(var) = value.strip_prefix("env:") {
        *value = std::env::var(var).map_err(|_| {
            crate::SlotwatchError::Config(format!("environment variable {} is not set", var))
        })?;
    }
    Ok(())
}

/// The occasion queries known to have worked against the booking site, best first
pub fn default_candidates() -> Vec<CandidateOperation> {
    let search = json!({
        "licenceCategoryId": "{category}",
        "examTypeId": "{category}",
        "locationIds": "{locations}",
        "fromDate": "{from_date}",
        "toDate": "{to_date}"
    });
    let params = json!({
        "licenceCategory": "{category}",
        "examType": "{category}",
        "fromDate": "{from_date}",
        "toDate": "{to_date}"
    });

    vec![
        CandidateOperation::new(
            "occasions_search",
            HttpMethod::Post,
            "/Boka/api/occasions/search",
            0,
        )
        .with_payload(search),
        CandidateOperation::new("ng_occasions", HttpMethod::Get, "/Boka/ng/api/occasions", 1)
            .with_payload(params.clone()),
        CandidateOperation::new(
            "available_occasions",
            HttpMethod::Get,
            "/Boka/api/occasions/available",
            2,
        )
        .with_payload(params.clone()),
        CandidateOperation::new("boka_occasions", HttpMethod::Get, "/Boka/api/occasions", 3)
            .with_payload(params.clone()),
        CandidateOperation::new("api_occasions", HttpMethod::Get, "/api/occasions", 4)
            .with_payload(params.clone()),
        CandidateOperation::new("api_v1_occasions", HttpMethod::Get, "/api/v1/occasions", 5)
            .with_payload(params.clone()),
        CandidateOperation::new(
            "forarprov_occasions",
            HttpMethod::Get,
            "/forarprov/api/occasions",
            6,
        )
        .with_payload(params),
    ]
}

fn default_base_url() -> String {
    "https://fp.trafikverket.se".to_string()
}

fn default_headers() -> BTreeMap<String, String> {
    BTreeMap::from([
        (
            "Accept".to_string(),
            "application/json, text/plain, */*".to_string(),
        ),
        ("Accept-Language".to_string(), "sv-SE,sv;q=0.9,en;q=0.8".to_string()),
        ("Referer".to_string(), "https://fp.trafikverket.se/".to_string()),
    ])
}

fn default_attempt_timeout() -> u64 {
    15
}

fn default_probe_budget() -> u64 {
    120
}

fn default_target_working() -> usize {
    2
}

fn default_extend_by() -> u64 {
    600
}

fn default_pushover_title() -> String {
    "Slot Alert".to_string()
}

fn default_pushover_sound() -> String {
    "pushover".to_string()
}

fn default_from_date() -> NaiveDate {
    Utc::now().date_naive()
}

fn default_to_date() -> NaiveDate {
    Utc::now().date_naive() + chrono::Duration::days(30)
}

fn default_category() -> String {
    "5".to_string()
}

fn default_poll_interval() -> u64 {
    300
}

fn default_query_timeout() -> u64 {
    20
}

fn default_seen_capacity() -> usize {
    10_000
}

fn default_true() -> bool {
    true
}

fn default_dashboard_port() -> u16 {
    11120
}

fn default_history_size() -> usize {
    100
}

/// Load configuration from a JSON file
pub fn load_config(path: &Path) -> crate::Result<Config> {
    let content = std::fs::read_to_string(path).map_err(|e| {
        crate::SlotwatchError::Config(format!("Failed to read config file {:?}: {}", path, e))
    })?;
    let config: Config = serde_json::from_str(&content)?;
    Ok(config)
}
