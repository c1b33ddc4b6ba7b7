use std::sync::Arc;

use arc_swap::ArcSwap;

/// Host capability for checking and (re)selecting the active credential.
pub trait CredentialHooks: Send + Sync {
    fn has_credential(&self) -> bool;

    /// Asks the host to let the user pick a credential. Fire-and-forget: callers proceed
    /// without waiting for an answer.
    fn prompt_for_credential(&self);
}

/// API key shared between settings and backend adapters.
///
/// Adapters read it on every call so a key replaced after re-selection is picked up by the
/// next request.
#[derive(Debug, Clone)]
pub struct SharedApiKey {
    inner: Arc<ArcSwap<String>>,
}

impl SharedApiKey {
    pub fn new(key: impl Into<String>) -> Self {
        Self {
            inner: Arc::new(ArcSwap::from_pointee(key.into().trim().to_string())),
        }
    }

    pub fn load(&self) -> Arc<String> {
        self.inner.load_full()
    }

    pub fn replace(&self, key: impl Into<String>) {
        self.inner.store(Arc::new(key.into().trim().to_string()));
    }

    pub fn is_present(&self) -> bool {
        !self.inner.load().is_empty()
    }
}

impl Default for SharedApiKey {
    fn default() -> Self {
        Self::new(String::new())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn replaced_key_is_visible_through_clones() {
        let key = SharedApiKey::default();
        let adapter_view = key.clone();
        assert!(!adapter_view.is_present());

        key.replace("  secret  ");

        assert!(adapter_view.is_present());
        assert_eq!(adapter_view.load().as_str(), "secret");
    }
}
