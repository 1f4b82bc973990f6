use std::collections::HashMap;
use std::net::{IpAddr, SocketAddr};
use std::sync::Mutex;
use std::time::{Duration, Instant};

use axum::extract::{ConnectInfo, Request, State};
use axum::middleware::Next;
use axum::response::Response;

use crate::error::ApiError;
use crate::handlers::AppState;

/// Tracked clients are pruned once the map grows past this.
const MAX_TRACKED: usize = 10_000;

/// Fixed-window per-IP counter. One window per client; the count resets when
/// the client's window rolls over.
pub struct FixedWindow {
    capacity: u32,
    window: Duration,
    hits: Mutex<HashMap<IpAddr, (Instant, u32)>>,
}

impl FixedWindow {
    pub fn new(capacity: u32, window: Duration) -> Self {
        Self {
            capacity,
            window,
            hits: Mutex::new(HashMap::new()),
        }
    }

    pub fn allow(&self, ip: IpAddr) -> bool {
        self.allow_at(ip, Instant::now())
    }

    fn allow_at(&self, ip: IpAddr, now: Instant) -> bool {
        // A poisoned map is still a usable map
        let mut hits = self.hits.lock().unwrap_or_else(|e| e.into_inner());

        if hits.len() > MAX_TRACKED {
            let window = self.window;
            hits.retain(|_, (start, _)| now.duration_since(*start) < window);
        }

        let entry = hits.entry(ip).or_insert((now, 0));
        if now.duration_since(entry.0) >= self.window {
            *entry = (now, 0);
        }
        if entry.1 >= self.capacity {
            return false;
        }
        entry.1 += 1;
        true
    }
}

/// Coarse per-IP throttle across the whole API surface.
pub async fn throttle_global(
    State(state): State<AppState>,
    ConnectInfo(addr): ConnectInfo<SocketAddr>,
    req: Request,
    next: Next,
) -> Result<Response, ApiError> {
    if !state.global_limiter.allow(addr.ip()) {
        return Err(ApiError::RateLimited);
    }
    Ok(next.run(req).await)
}

/// Tighter window for the registration endpoint.
pub async fn throttle_register(
    State(state): State<AppState>,
    ConnectInfo(addr): ConnectInfo<SocketAddr>,
    req: Request,
    next: Next,
) -> Result<Response, ApiError> {
    if !state.register_limiter.allow(addr.ip()) {
        return Err(ApiError::RateLimited);
    }
    Ok(next.run(req).await)
}
