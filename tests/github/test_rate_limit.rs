//! Tests for shared quota gating.

use std::time::Duration;

use chrono::Utc;
use ci_harvest::RateLimiter;
use tokio::time::Instant;

#[tokio::test(start_paused = true)]
async fn test_no_wait_above_floor() {
    let limiter = RateLimiter::new(10);
    limiter.update(11, Utc::now().timestamp() + 600).await;

    let started = Instant::now();
    limiter.wait_if_needed().await;
    assert!(started.elapsed() < Duration::from_secs(1));
}

#[tokio::test(start_paused = true)]
async fn test_waits_for_reset_below_floor() {
    let limiter = RateLimiter::new(10);
    limiter.update(3, Utc::now().timestamp() + 30).await;

    let started = Instant::now();
    limiter.wait_if_needed().await;
    assert!(started.elapsed() >= Duration::from_secs(30));
}

#[tokio::test(start_paused = true)]
async fn test_reset_in_the_past_does_not_wait() {
    let limiter = RateLimiter::new(10);
    limiter.update(0, Utc::now().timestamp() - 60).await;

    let started = Instant::now();
    limiter.wait_if_needed().await;
    assert!(started.elapsed() < Duration::from_secs(1));
}

#[tokio::test(start_paused = true)]
async fn test_clones_share_counters() {
    let limiter = RateLimiter::new(10);
    let clone = limiter.clone();
    clone.update(7, 1_900_000_000).await;
    assert_eq!(limiter.remaining().await, 7);
    assert_eq!(limiter.snapshot().await.reset_at, 1_900_000_000);
}

#[tokio::test(start_paused = true)]
async fn test_interrupt_wakes_sleeper() {
    let limiter = RateLimiter::new(10);
    limiter.update(0, Utc::now().timestamp() + 3600).await;

    let started = Instant::now();
    let waiter = {
        let limiter = limiter.clone();
        tokio::spawn(async move { limiter.wait_if_needed().await })
    };
    for _ in 0..5 {
        tokio::task::yield_now().await;
    }
    limiter.interrupt();
    waiter.await.unwrap();
    assert!(started.elapsed() < Duration::from_secs(3600));
}

#[tokio::test(start_paused = true)]
async fn test_interrupt_before_wait_is_not_lost() {
    let limiter = RateLimiter::new(10);
    limiter.interrupt();
    limiter.update(0, Utc::now().timestamp() + 3600).await;

    let started = Instant::now();
    limiter.clone().wait_if_needed().await;
    limiter.wait_if_needed().await;
    assert!(limiter.is_interrupted());
    assert!(started.elapsed() < Duration::from_secs(1));
}
