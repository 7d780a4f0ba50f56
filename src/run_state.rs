use std::collections::{BTreeMap, HashSet};
use std::sync::Mutex;

use crate::logw;

/// State shared by every scene of one run. Passed by reference to the
/// synthesizer and the resolver; never global.
#[derive(Debug, Default)]
pub struct RunState {
    disabled: Mutex<BTreeMap<String, String>>,
    chosen: Mutex<HashSet<String>>,
    api_calls: Mutex<BTreeMap<String, u32>>,
}

impl RunState {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn is_disabled(&self, provider: &str) -> bool {
        self.disabled
            .lock()
            .unwrap_or_else(|e| e.into_inner())
            .contains_key(provider)
    }

    pub fn disable(&self, provider: &str, reason: impl Into<String>) {
        let reason = reason.into();
        let mut guard = self.disabled.lock().unwrap_or_else(|e| e.into_inner());
        if !guard.contains_key(provider) {
            logw(format!("Disabling {} for this run: {}", provider, reason));
            guard.insert(provider.to_string(), reason);
        }
    }

    pub fn disabled_providers(&self) -> Vec<String> {
        self.disabled
            .lock()
            .unwrap_or_else(|e| e.into_inner())
            .keys()
            .cloned()
            .collect()
    }

    pub fn is_chosen(&self, asset_id: &str) -> bool {
        self.chosen
            .lock()
            .unwrap_or_else(|e| e.into_inner())
            .contains(asset_id)
    }

    /// Check-and-insert under one lock. `false` means another scene got it first.
    pub fn claim(&self, asset_id: &str) -> bool {
        self.chosen
            .lock()
            .unwrap_or_else(|e| e.into_inner())
            .insert(asset_id.to_string())
    }

    pub fn count_call(&self, provider: &str) {
        *self
            .api_calls
            .lock()
            .unwrap_or_else(|e| e.into_inner())
            .entry(provider.to_string())
            .or_insert(0) += 1;
    }

    pub fn api_calls(&self) -> BTreeMap<String, u32> {
        self.api_calls
            .lock()
            .unwrap_or_else(|e| e.into_inner())
            .clone()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn claim_is_exclusive() {
        let state = RunState::new();
        assert!(state.claim("pexels:1"));
        assert!(!state.claim("pexels:1"));
        assert!(state.is_chosen("pexels:1"));
        assert!(!state.is_chosen("pexels:2"));
    }

    #[test]
    fn disable_keeps_first_reason() {
        let state = RunState::new();
        state.disable("elevenlabs", "timeout");
        state.disable("elevenlabs", "dns");
        assert!(state.is_disabled("elevenlabs"));
        assert_eq!(state.disabled_providers(), vec!["elevenlabs".to_string()]);
    }

    #[test]
    fn counts_calls_per_provider() {
        let state = RunState::new();
        state.count_call("pixabay");
        state.count_call("pixabay");
        state.count_call("pexels");
        let calls = state.api_calls();
        assert_eq!(calls["pixabay"], 2);
        assert_eq!(calls["pexels"], 1);
    }
}
