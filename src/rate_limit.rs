/// Rate Limiting System
///
/// Two request tiers guard the HTTP surface; a keyed quota caps how many
/// moderation requests each student may submit per minute.
use crate::config::RateLimitSettings;
use crate::error::{DeskError, DeskResult};
use axum::{
    extract::{Request, State},
    middleware::Next,
    response::Response,
};
use governor::{
    clock::DefaultClock,
    state::{keyed::DefaultKeyedStateStore, InMemoryState, NotKeyed},
    Quota, RateLimiter as GovernorLimiter,
};
use std::{num::NonZeroU32, sync::Arc, time::Duration};

type DirectLimiter = GovernorLimiter<NotKeyed, InMemoryState, DefaultClock>;
type KeyedLimiter = GovernorLimiter<String, DefaultKeyedStateStore<String>, DefaultClock>;

/// Tracked students above which idle quota state is dropped
const SUBMISSION_PRUNE_THRESHOLD: usize = 1024;

fn non_zero(value: u32) -> NonZeroU32 {
    NonZeroU32::new(value).unwrap_or(NonZeroU32::MIN)
}

fn exceeded(retry_after: Duration) -> DeskError {
    DeskError::RateLimited { retry_after }
}

/// Rate limiter manager
#[derive(Clone)]
pub struct RateLimiter {
    enabled: bool,
    authenticated: Arc<DirectLimiter>,
    unauthenticated: Arc<DirectLimiter>,
    submissions: Arc<KeyedLimiter>,
}

impl RateLimiter {
    pub fn new(settings: &RateLimitSettings) -> Self {
        let auth_quota = Quota::per_second(non_zero(settings.authenticated_rps))
            .allow_burst(non_zero(settings.burst_size));

        let unauth_quota = Quota::per_second(non_zero(settings.unauthenticated_rps))
            .allow_burst(non_zero(settings.burst_size / 5));

        let submission_quota = Quota::per_minute(non_zero(settings.submissions_per_minute));

        Self {
            enabled: settings.enabled,
            authenticated: Arc::new(GovernorLimiter::direct(auth_quota)),
            unauthenticated: Arc::new(GovernorLimiter::direct(unauth_quota)),
            submissions: Arc::new(GovernorLimiter::keyed(submission_quota)),
        }
    }

    /// Check rate limit for authenticated callers
    pub fn check_authenticated(&self) -> DeskResult<()> {
        if !self.enabled {
            return Ok(());
        }
        self.authenticated
            .check()
            .map_err(|_| exceeded(Duration::from_secs(1)))
    }

    /// Check rate limit for unauthenticated callers
    pub fn check_unauthenticated(&self) -> DeskResult<()> {
        if !self.enabled {
            return Ok(());
        }
        self.unauthenticated
            .check()
            .map_err(|_| exceeded(Duration::from_secs(1)))
    }

    /// Spend one unit of a student's submission quota
    ///
    /// Enforced even when the request tiers are disabled.
    pub fn check_submission(&self, student_id: &str) -> DeskResult<()> {
        if self.submissions.len() >= SUBMISSION_PRUNE_THRESHOLD {
            self.prune();
        }

        self.submissions
            .check_key(&student_id.to_string())
            .map_err(|_| exceeded(Duration::from_secs(60)))
    }

    /// Forget students whose quota has fully replenished
    pub fn prune(&self) {
        self.submissions.retain_recent();
        self.submissions.shrink_to_fit();
    }

    /// Number of students with quota state in memory
    pub fn tracked_students(&self) -> usize {
        self.submissions.len()
    }
}

/// Rate limiting middleware
pub async fn rate_limit_middleware(
    State(ctx): State<crate::context::AppContext>,
    request: Request,
    next: Next,
) -> Result<Response, DeskError> {
    let has_auth_header = request.headers().get("authorization").is_some();

    if has_auth_header {
        ctx.rate_limiter.check_authenticated()?;
    } else {
        ctx.rate_limiter.check_unauthenticated()?;
    }

    Ok(next.run(request).await)
}
