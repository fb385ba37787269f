//! Process-wide single-flight authentication.

use std::sync::Arc;
use std::sync::atomic::{AtomicU8, Ordering};

use geo_core::{AnalysisClient, Result};
use tokio::sync::OnceCell;
use tracing::{debug, info, instrument, warn};

/// Observable state of an [`AuthSession`].
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum AuthState {
    /// No handshake has succeeded yet, or the last one failed.
    Unauthenticated,
    /// A handshake is in flight.
    Authenticating,
    /// A handshake succeeded. Terminal for the life of the session.
    Authenticated,
}

impl AuthState {
    const fn from_u8(v: u8) -> Self {
        match v {
            1 => Self::Authenticating,
            2 => Self::Authenticated,
            _ => Self::Unauthenticated,
        }
    }

    const fn as_u8(self) -> u8 {
        match self {
            Self::Unauthenticated => 0,
            Self::Authenticating => 1,
            Self::Authenticated => 2,
        }
    }
}

/// Runs the client's authentication handshake at most once per process.
///
/// Concurrent first callers wait on a single in-flight handshake. A failed
/// handshake leaves the session unauthenticated so the next caller retries.
pub struct AuthSession {
    client: Arc<dyn AnalysisClient>,
    done: OnceCell<()>,
    state: AtomicU8,
}

impl std::fmt::Debug for AuthSession {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("AuthSession")
            .field("client", &self.client.name())
            .field("state", &self.state())
            .finish()
    }
}

impl AuthSession {
    /// Create a session for `client`.
    #[must_use]
    pub fn new(client: Arc<dyn AnalysisClient>) -> Self {
        Self {
            client,
            done: OnceCell::new(),
            state: AtomicU8::new(AuthState::Unauthenticated.as_u8()),
        }
    }

    /// Current state.
    #[must_use]
    pub fn state(&self) -> AuthState {
        AuthState::from_u8(self.state.load(Ordering::Acquire))
    }

    fn set_state(&self, state: AuthState) {
        self.state.store(state.as_u8(), Ordering::Release);
    }

    /// Completes the handshake if it has not succeeded yet.
    #[instrument(skip(self), fields(client = self.client.name()))]
    pub async fn ensure(&self) -> Result<()> {
        if self.done.initialized() {
            return Ok(());
        }
        self.done
            .get_or_try_init(|| async {
                self.set_state(AuthState::Authenticating);
                debug!("Starting authentication handshake");
                match self.client.authenticate().await {
                    Ok(()) => {
                        self.set_state(AuthState::Authenticated);
                        info!("Authenticated");
                        Ok(())
                    }
                    Err(e) => {
                        self.set_state(AuthState::Unauthenticated);
                        warn!(error = %e, "Authentication failed");
                        Err(e)
                    }
                }
            })
            .await
            .map(|_| ())
    }
}
