use anyhow::{Context, Result};
use chrono::{DateTime, Duration, NaiveDateTime, Utc};
use serde_json::{Map, Value};
use std::collections::BTreeMap;
use std::path::{Path, PathBuf};
use tokio::fs;
use tracing::{debug, warn};

/// Keyword reuse and clip reuse share the mechanism but never the document.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum UsageNamespace {
    Keywords,
    VisualAssets,
}

impl UsageNamespace {
    fn document_key(self) -> &'static str {
        match self {
            UsageNamespace::Keywords => "keywords",
            UsageNamespace::VisualAssets => "clip_usage",
        }
    }
}

/// Persistent map of cooldown key -> last use (UTC). Loaded with
/// default-on-missing/corrupt, saved by full overwrite. Single writer only.
#[derive(Debug, Clone)]
pub struct UsageStore {
    path: PathBuf,
    namespace: UsageNamespace,
    cooldown: Duration,
    entries: BTreeMap<String, String>,
}

impl UsageStore {
    pub fn empty(path: impl Into<PathBuf>, namespace: UsageNamespace, cooldown_days: i64) -> Self {
        Self {
            path: path.into(),
            namespace,
            cooldown: Duration::days(cooldown_days.max(0)),
            entries: BTreeMap::new(),
        }
    }

    pub async fn load(path: impl Into<PathBuf>, namespace: UsageNamespace, cooldown_days: i64) -> Self {
        let mut store = Self::empty(path, namespace, cooldown_days);
        let raw = match fs::read_to_string(&store.path).await {
            Ok(raw) => raw,
            Err(_) => {
                debug!("usage store {} missing; starting empty", store.path.display());
                return store;
            }
        };

        match parse_document(&raw, namespace) {
            Some(entries) => store.entries = entries,
            None => warn!(
                "usage store {} is unreadable; treating as empty",
                store.path.display()
            ),
        }
        store
    }

    pub fn path(&self) -> &Path {
        &self.path
    }

    pub fn namespace(&self) -> UsageNamespace {
        self.namespace
    }

    pub fn len(&self) -> usize {
        self.entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }

    pub fn last_used(&self, key: &str) -> Option<DateTime<Utc>> {
        self.entries
            .get(&normalize_key(key))
            .and_then(|raw| parse_timestamp(raw))
    }

    /// Unparseable timestamps never block reuse.
    pub fn in_cooldown(&self, key: &str, now: DateTime<Utc>) -> bool {
        self.last_used(key)
            .is_some_and(|used| now.signed_duration_since(used) < self.cooldown)
    }

    pub fn mark(&mut self, key: &str, now: DateTime<Utc>) {
        let key = normalize_key(key);
        if key.is_empty() {
            return;
        }
        self.entries.insert(key, now.to_rfc3339());
    }

    pub fn mark_all<'a, I>(&mut self, keys: I, now: DateTime<Utc>)
    where
        I: IntoIterator<Item = &'a str>,
    {
        for key in keys {
            self.mark(key, now);
        }
    }

    pub fn filter_allowed(&self, keys: &[String], now: DateTime<Utc>) -> Vec<String> {
        keys.iter()
            .map(|k| normalize_key(k))
            .filter(|k| !k.is_empty() && !self.in_cooldown(k, now))
            .collect()
    }

    /// Overwrites the whole document; last writer wins.
    pub async fn save(&self) -> Result<()> {
        if let Some(parent) = self.path.parent() {
            if !parent.as_os_str().is_empty() {
                fs::create_dir_all(parent)
                    .await
                    .with_context(|| format!("Failed to create dir {}", parent.display()))?;
            }
        }

        let entries: Map<String, Value> = self
            .entries
            .iter()
            .map(|(k, v)| (k.clone(), Value::String(v.clone())))
            .collect();
        let mut root = Map::new();
        root.insert(self.namespace.document_key().to_string(), Value::Object(entries));

        let body = serde_json::to_string_pretty(&Value::Object(root))?;
        fs::write(&self.path, body)
            .await
            .with_context(|| format!("Failed to write usage store {}", self.path.display()))?;
        Ok(())
    }
}

fn normalize_key(key: &str) -> String {
    key.trim().to_lowercase()
}

fn parse_document(raw: &str, namespace: UsageNamespace) -> Option<BTreeMap<String, String>> {
    let root: Value = serde_json::from_str(raw).ok()?;
    let section = match root.get(namespace.document_key()) {
        Some(section) => section.as_object()?,
        None => return root.as_object().map(|_| BTreeMap::new()),
    };
    Some(
        section
            .iter()
            .filter_map(|(k, v)| v.as_str().map(|s| (normalize_key(k), s.to_string())))
            .collect(),
    )
}

fn parse_timestamp(raw: &str) -> Option<DateTime<Utc>> {
    if let Ok(ts) = DateTime::parse_from_rfc3339(raw) {
        return Some(ts.with_timezone(&Utc));
    }
    NaiveDateTime::parse_from_str(raw, "%Y-%m-%dT%H:%M:%S%.f")
        .ok()
        .map(|naive| naive.and_utc())
}
