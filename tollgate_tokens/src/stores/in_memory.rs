use std::sync::Arc;

use arc_swap::ArcSwapOption;
use tollgate::{AccessToken, RefreshToken};

use crate::{TokenPair, TokenStore};

#[derive(Debug, Default)]
struct Held {
    access: Option<Arc<AccessToken>>,
    refresh: Option<Arc<RefreshToken>>,
}

/// A token store held in process memory
///
/// Both tokens are swapped together, so a reader never observes an access
/// token paired with a refresh token from a different issuance.
#[derive(Debug, Default)]
pub struct InMemoryTokenStore {
    held: ArcSwapOption<Held>,
}

impl InMemoryTokenStore {
    /// Constructs an empty store
    pub fn new() -> Self {
        Self::default()
    }

    /// Constructs a store holding `tokens`
    pub fn with_tokens(tokens: TokenPair) -> Self {
        let store = Self::new();
        store.set_tokens(tokens);
        store
    }

    /// The current pair, if both tokens are held
    pub fn tokens(&self) -> Option<TokenPair> {
        let held = self.held.load_full()?;
        Some(TokenPair {
            access_token: AccessToken::clone(held.access.as_deref()?),
            refresh_token: RefreshToken::clone(held.refresh.as_deref()?),
        })
    }
}

impl TokenStore for InMemoryTokenStore {
    fn access_token(&self) -> Option<Arc<AccessToken>> {
        self.held.load().as_ref().and_then(|h| h.access.clone())
    }

    fn refresh_token(&self) -> Option<Arc<RefreshToken>> {
        self.held.load().as_ref().and_then(|h| h.refresh.clone())
    }

    fn set_tokens(&self, tokens: TokenPair) {
        self.held.store(Some(Arc::new(Held {
            access: Some(Arc::new(tokens.access_token)),
            refresh: Some(Arc::new(tokens.refresh_token)),
        })));
        tracing::trace!("stored new token pair");
    }

    fn set_access_token(&self, token: AccessToken) {
        let access = Arc::new(token);
        self.held.rcu(|held| {
            Some(Arc::new(Held {
                access: Some(Arc::clone(&access)),
                refresh: held.as_ref().and_then(|h| h.refresh.clone()),
            }))
        });
    }

    fn clear(&self) {
        self.held.store(None);
        tracing::trace!("cleared tokens");
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn pair(n: u8) -> TokenPair {
        TokenPair {
            access_token: AccessToken::new(format!("access-{n}")),
            refresh_token: RefreshToken::new(format!("refresh-{n}")),
        }
    }

    #[test]
    fn empty_store_holds_nothing() {
        let store = InMemoryTokenStore::new();
        assert!(store.access_token().is_none());
        assert!(store.refresh_token().is_none());
        assert!(store.tokens().is_none());
    }

    #[test]
    fn replacing_the_access_token_keeps_the_refresh_token() {
        let store = InMemoryTokenStore::with_tokens(pair(1));

        store.set_access_token(AccessToken::from_static("access-2"));

        assert_eq!(store.access_token().unwrap().as_str(), "access-2");
        assert_eq!(store.refresh_token().unwrap().as_str(), "refresh-1");
    }

    #[test]
    fn setting_an_access_token_on_an_empty_store_leaves_no_refresh_token() {
        let store = InMemoryTokenStore::new();

        store.set_access_token(AccessToken::from_static("access"));

        assert!(store.access_token().is_some());
        assert!(store.refresh_token().is_none());
        assert!(store.tokens().is_none());
    }

    #[test]
    fn clear_forgets_both_tokens() {
        let store = InMemoryTokenStore::with_tokens(pair(1));

        store.clear();

        assert!(store.access_token().is_none());
        assert!(store.refresh_token().is_none());
    }

    #[test]
    fn tokens_returns_the_latest_pair() {
        let store = InMemoryTokenStore::with_tokens(pair(1));
        store.set_tokens(pair(2));

        assert_eq!(store.tokens(), Some(pair(2)));
    }
}
