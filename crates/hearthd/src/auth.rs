//! Auth gate: authorization URL minting, code exchange, token cache.
//!
//! Tokens are opaque random strings with an expiry, cached in memory.
//! Pending authorization states expire after ten minutes and are swept
//! inline on the next `get_auth_url` call. Full OAuth2 against the
//! backend is out of scope; only the gate's interface is load-bearing.

use std::collections::HashMap;
use std::sync::Mutex;
use std::time::{Duration, Instant};

use axum::http::HeaderMap;
use percent_encoding::{utf8_percent_encode, AsciiSet, NON_ALPHANUMERIC};
use tracing::{info, warn};
use uuid::Uuid;

const CLIENT_ID: &str = "hearth_gateway";
const PENDING_TTL: Duration = Duration::from_secs(600);
const TOKEN_TTL: Duration = Duration::from_secs(3600);

struct PendingAuth {
    session_id: String,
    created_at: Instant,
}

struct CachedToken {
    session_id: String,
    expires_at: Instant,
}

/// Gatekeeper for upstream session credentials.
pub struct AuthGate {
    /// Backend base URL the client is sent to for authorization.
    authorize_base: String,
    redirect_uri: String,
    token_ttl: Duration,
    pending: Mutex<HashMap<String, PendingAuth>>,
    tokens: Mutex<HashMap<String, CachedToken>>,
}

impl AuthGate {
    pub fn new(authorize_base: impl Into<String>, redirect_uri: impl Into<String>) -> Self {
        Self {
            authorize_base: authorize_base.into(),
            redirect_uri: redirect_uri.into(),
            token_ttl: TOKEN_TTL,
            pending: Mutex::new(HashMap::new()),
            tokens: Mutex::new(HashMap::new()),
        }
    }

    /// Override the token lifetime. Intended for expiry tests.
    pub fn with_token_ttl(mut self, ttl: Duration) -> Self {
        self.token_ttl = ttl;
        self
    }

    /// Mint an authorization URL for a session, registering a pending
    /// state and sweeping stale ones.
    pub fn get_auth_url(&self, session_id: &str) -> String {
        let state = random_token();
        let now = Instant::now();

        let mut pending = self.pending.lock().expect("auth state lock poisoned");
        pending.retain(|_, entry| now.duration_since(entry.created_at) < PENDING_TTL);
        pending.insert(
            state.clone(),
            PendingAuth {
                session_id: session_id.to_string(),
                created_at: now,
            },
        );
        drop(pending);

        info!(session_id = %session_id, "generated auth url");
        format!(
            "{}/auth/authorize?client_id={}&redirect_uri={}&state={}&response_type=code",
            self.authorize_base,
            CLIENT_ID,
            percent_encode(&self.redirect_uri),
            state
        )
    }

    /// Exchange an authorization code for an access token.
    ///
    /// The state must match a pending authorization; the code itself is
    /// not verified against the backend (stub exchange).
    pub fn exchange_code(&self, _code: &str, state: &str) -> Option<String> {
        let entry = {
            let mut pending = self.pending.lock().expect("auth state lock poisoned");
            pending.remove(state)
        };

        let Some(entry) = entry else {
            warn!(state = %state, "auth callback with unknown state");
            return None;
        };

        let token = self.issue_token(&entry.session_id);
        info!(session_id = %entry.session_id, "token exchange successful");
        Some(token)
    }

    /// Issue a fresh opaque token bound to a session.
    pub fn issue_token(&self, session_id: &str) -> String {
        let token = random_token();
        let mut tokens = self.tokens.lock().expect("token cache lock poisoned");
        tokens.insert(
            token.clone(),
            CachedToken {
                session_id: session_id.to_string(),
                expires_at: Instant::now() + self.token_ttl,
            },
        );
        token
    }

    /// True if the token is cached and unexpired. Expired tokens are
    /// evicted on the way out.
    pub fn validate_token(&self, token: &str) -> bool {
        let mut tokens = self.tokens.lock().expect("token cache lock poisoned");
        match tokens.get(token) {
            Some(cached) if Instant::now() < cached.expires_at => true,
            Some(_) => {
                tokens.remove(token);
                false
            }
            None => false,
        }
    }

    /// Session a live token was issued for, if any.
    pub fn token_session(&self, token: &str) -> Option<String> {
        let tokens = self.tokens.lock().expect("token cache lock poisoned");
        tokens
            .get(token)
            .filter(|cached| Instant::now() < cached.expires_at)
            .map(|cached| cached.session_id.clone())
    }
}

/// Extract a bearer token from an Authorization header.
pub fn bearer_token(headers: &HeaderMap) -> Option<&str> {
    headers
        .get(axum::http::header::AUTHORIZATION)
        .and_then(|value| value.to_str().ok())
        .and_then(|value| value.strip_prefix("Bearer "))
        .filter(|token| !token.is_empty())
}

fn random_token() -> String {
    format!(
        "{}{}",
        Uuid::new_v4().simple(),
        Uuid::new_v4().simple()
    )
}

/// Everything outside the RFC 3986 unreserved set gets escaped.
const QUERY_VALUE: &AsciiSet = &NON_ALPHANUMERIC
    .remove(b'-')
    .remove(b'.')
    .remove(b'_')
    .remove(b'~');

/// Percent-encode a query-string value.
fn percent_encode(value: &str) -> String {
    utf8_percent_encode(value, QUERY_VALUE).to_string()
}
