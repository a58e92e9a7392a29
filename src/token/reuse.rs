//! Token caching wrapper

use async_trait::async_trait;
use chrono::Utc;
use tokio::sync::Mutex;
use tracing::trace;

use super::{Token, TokenError, TokenSource};

/// Hands out the last token until it expires, then asks the inner source.
///
/// Callers are serialized on the cache lock, so at most one inner call is in
/// flight. There is no safety margin: a token is reused while `expiry > now`.
pub struct ReuseTokenSource<S> {
    inner: S,
    cached: Mutex<Option<Token>>,
}

impl<S: TokenSource> ReuseTokenSource<S> {
    /// Wrap `inner` with an empty cache
    pub fn new(inner: S) -> Self {
        Self {
            inner,
            cached: Mutex::new(None),
        }
    }

    /// Wrap `inner`, seeding the cache with `token`
    pub fn with_token(inner: S, token: Token) -> Self {
        Self {
            inner,
            cached: Mutex::new(Some(token)),
        }
    }
}

#[async_trait]
impl<S: TokenSource> TokenSource for ReuseTokenSource<S> {
    async fn token(&self) -> Result<Token, TokenError> {
        let mut cached = self.cached.lock().await;

        if let Some(token) = cached.as_ref() {
            if !token.is_expired_at(Utc::now()) {
                trace!(expiry = %token.expiry, "reusing cached token");
                return Ok(token.clone());
            }
        }

        let fresh = self.inner.token().await?;
        *cached = Some(fresh.clone());
        Ok(fresh)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::{DateTime, Duration};
    use std::sync::atomic::{AtomicUsize, Ordering};
    use std::sync::Arc;

    /// Counts delegate calls and returns tokens with a fixed expiry
    struct Counting {
        calls: Arc<AtomicUsize>,
        expiry: DateTime<Utc>,
    }

    #[async_trait]
    impl TokenSource for Counting {
        async fn token(&self) -> Result<Token, TokenError> {
            let n = self.calls.fetch_add(1, Ordering::SeqCst) + 1;
            Ok(Token::new(format!("token-{n}"), self.expiry))
        }
    }

    fn counting(expiry: DateTime<Utc>) -> (Counting, Arc<AtomicUsize>) {
        let calls = Arc::new(AtomicUsize::new(0));
        (
            Counting {
                calls: calls.clone(),
                expiry,
            },
            calls,
        )
    }

    #[tokio::test]
    async fn empty_cache_delegates_once_then_reuses() {
        let (inner, calls) = counting(Utc::now() + Duration::hours(1));
        let source = ReuseTokenSource::new(inner);

        let first = source.token().await.unwrap();
        let second = source.token().await.unwrap();

        assert_eq!(calls.load(Ordering::SeqCst), 1);
        assert_eq!(first.secret(), "token-1");
        assert_eq!(second, first);
    }

    #[tokio::test]
    async fn valid_seed_is_served_without_delegating() {
        let (inner, calls) = counting(Utc::now() + Duration::hours(1));
        let seed = Token::new("seed", Utc::now() + Duration::minutes(5));
        let source = ReuseTokenSource::with_token(inner, seed.clone());

        assert_eq!(source.token().await.unwrap(), seed);
        assert_eq!(calls.load(Ordering::SeqCst), 0);
    }

    #[tokio::test]
    async fn expired_token_is_replaced_with_one_delegate_call() {
        let (inner, calls) = counting(Utc::now() + Duration::hours(1));
        let stale = Token::new("stale", Utc::now() - Duration::seconds(1));
        let source = ReuseTokenSource::with_token(inner, stale);

        let token = source.token().await.unwrap();
        assert_eq!(token.secret(), "token-1");
        assert_eq!(calls.load(Ordering::SeqCst), 1);

        source.token().await.unwrap();
        assert_eq!(calls.load(Ordering::SeqCst), 1);
    }

    #[tokio::test]
    async fn already_expired_inner_tokens_are_fetched_every_time() {
        let (inner, calls) = counting(Utc::now() - Duration::seconds(1));
        let source = ReuseTokenSource::new(inner);

        source.token().await.unwrap();
        source.token().await.unwrap();
        assert_eq!(calls.load(Ordering::SeqCst), 2);
    }

    #[tokio::test]
    async fn concurrent_callers_share_one_delegate_call() {
        let (inner, calls) = counting(Utc::now() + Duration::hours(1));
        let source = Arc::new(ReuseTokenSource::new(inner));

        let handles: Vec<_> = (0..8)
            .map(|_| {
                let source = source.clone();
                tokio::spawn(async move { source.token().await })
            })
            .collect();
        for handle in handles {
            assert_eq!(handle.await.unwrap().unwrap().secret(), "token-1");
        }
        assert_eq!(calls.load(Ordering::SeqCst), 1);
    }

    #[tokio::test]
    async fn errors_are_not_cached() {
        struct Failing;

        #[async_trait]
        impl TokenSource for Failing {
            async fn token(&self) -> Result<Token, TokenError> {
                Err(TokenError::impersonation("sa@p.iam.gserviceaccount.com", Some(403), "denied"))
            }
        }

        let source = ReuseTokenSource::new(Failing);
        assert!(source.token().await.is_err());
        assert!(source.token().await.is_err());
    }
}
