//! Cooperative shutdown on Ctrl+C

use std::sync::Arc;
use std::sync::atomic::{AtomicBool, Ordering};

use log::{error, warn};

use crate::github::RateLimiter;

/// Set once an interrupt arrives; workers stop picking up new units.
#[derive(Debug, Clone, Default)]
pub struct ShutdownFlag(Arc<AtomicBool>);

impl ShutdownFlag {
    pub fn new() -> Self {
        Self::default()
    }

    #[inline]
    pub fn is_requested(&self) -> bool {
        self.0.load(Ordering::Acquire)
    }

    #[inline]
    pub fn request(&self) {
        self.0.store(true, Ordering::Release);
    }
}

/// First Ctrl+C requests shutdown and wakes any rate-limit sleep; the
/// second exits with status 130.
pub fn install_ctrl_c_handler(flag: ShutdownFlag, limiter: Option<RateLimiter>) {
    tokio::spawn(async move {
        if let Err(e) = tokio::signal::ctrl_c().await {
            error!("Failed to install Ctrl+C handler: {e}");
            return;
        }
        warn!("Received SIGINT, finishing in-flight work. Press Ctrl+C again to force quit.");
        flag.request();
        if let Some(limiter) = &limiter {
            limiter.interrupt();
        }

        if tokio::signal::ctrl_c().await.is_ok() {
            warn!("Force quit!");
            std::process::exit(130);
        }
    });
}
