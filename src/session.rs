//! Session tokens and their idle-based lifecycle.
//!
//! Sessions are created lazily for clients that arrive without a valid
//! token and are evicted lazily: a stale token is removed the moment a
//! lookup discovers it, and the whole table is swept every
//! `clean_sessions_every` creations.

use rand::distributions::Alphanumeric;
use rand::rngs::OsRng;
use rand::Rng;
use std::collections::HashMap;
use std::time::{Duration, Instant};
use tracing::debug;

const TOKEN_LENGTH: usize = 64;

/// A server-side record for one returning client.
#[derive(Debug, Clone)]
pub struct Session {
    token: String,
    last_poked: Instant,
}

impl Session {
    fn new(token: String) -> Self {
        Session {
            token,
            last_poked: Instant::now(),
        }
    }

    #[must_use]
    pub fn token(&self) -> &str {
        &self.token
    }

    /// Time since the session was last seen.
    #[must_use]
    pub fn idle_for(&self) -> Duration {
        self.last_poked.elapsed()
    }

    pub(crate) fn poke(&mut self) {
        self.last_poked = Instant::now();
    }
}

/// Callback invoked for every freshly created session. Hook failures are
/// fatal to the server; hooks run privileged.
pub type SessionHook = Box<dyn FnMut(&Session) -> anyhow::Result<()>>;

/// The process-wide session table.
pub struct SessionStore {
    sessions: HashMap<String, Session>,
    hooks: Vec<SessionHook>,
    counter: u32,
    max_idle: Duration,
    clean_every: u32,
}

impl SessionStore {
    #[must_use]
    pub fn new(max_idle: Duration, clean_every: u32) -> Self {
        SessionStore {
            sessions: HashMap::new(),
            hooks: Vec::new(),
            counter: 0,
            max_idle,
            clean_every,
        }
    }

    /// Mint a fresh session and run every new-session hook on it.
    ///
    /// Every `clean_every` creations the whole table is swept for idle
    /// sessions first. Returns the new token.
    pub fn new_session(&mut self) -> anyhow::Result<String> {
        self.counter += 1;
        if self.counter >= self.clean_every {
            self.counter = 0;
            self.clean();
        }
        let token = generate_token();
        self.sessions
            .insert(token.clone(), Session::new(token.clone()));
        debug!(sessions = self.sessions.len(), "session created");
        if let Some(session) = self.sessions.get(&token) {
            for hook in &mut self.hooks {
                hook(session)?;
            }
        }
        Ok(token)
    }

    /// Resolve a token. Unknown tokens return `None`; a token whose
    /// session idled out is removed on the spot and also returns `None`;
    /// otherwise the session is poked and handed back.
    pub fn get_session(&mut self, token: &str) -> Option<&mut Session> {
        let idling = match self.sessions.get(token) {
            None => return None,
            Some(session) => session.idle_for() > self.max_idle,
        };
        if idling {
            self.sessions.remove(token);
            debug!("idle session evicted on lookup");
            return None;
        }
        let session = self.sessions.get_mut(token)?;
        session.poke();
        Some(session)
    }

    /// Direct access without poking; used after a token has already been
    /// resolved or minted during the current request.
    pub(crate) fn session_mut(&mut self, token: &str) -> Option<&mut Session> {
        self.sessions.get_mut(token)
    }

    /// Drop every session past the idle window.
    pub fn clean(&mut self) {
        let max_idle = self.max_idle;
        let before = self.sessions.len();
        self.sessions.retain(|_, session| session.idle_for() <= max_idle);
        let removed = before - self.sessions.len();
        if removed > 0 {
            debug!(removed, remaining = self.sessions.len(), "idle sessions swept");
        }
    }

    pub fn add_hook(&mut self, hook: impl FnMut(&Session) -> anyhow::Result<()> + 'static) {
        self.hooks.push(Box::new(hook));
    }

    pub fn clear_hooks(&mut self) {
        self.hooks.clear();
    }

    #[must_use]
    pub fn len(&self) -> usize {
        self.sessions.len()
    }

    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.sessions.is_empty()
    }
}

/// A 64-character unguessable token from the OS entropy source.
fn generate_token() -> String {
    OsRng
        .sample_iter(&Alphanumeric)
        .take(TOKEN_LENGTH)
        .map(char::from)
        .collect()
}
