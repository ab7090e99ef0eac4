use flowgate::{
    Clock, InstantSleeper, ManualClock, ManualStatistics, RateLimiterController, ShapingLayer,
    TrackingSleeper, TrafficShapingController,
};
use futures::future::join_all;
use std::convert::Infallible;
use std::sync::Arc;
use std::time::Duration;
use tower::{service_fn, ServiceBuilder, ServiceExt};

const T0: u64 = 1_700_000_000_000;

#[tokio::test]
async fn burst_is_paced_into_queue_then_rejected() {
    let clock = ManualClock::new(T0);
    let limiter = Arc::new(
        RateLimiterController::new(500, 10.0).with_clock(clock.clone()).with_sleeper(InstantSleeper),
    );
    let stats = Arc::new(ManualStatistics::default());

    let tasks = (0..20).map(|_| {
        let limiter = limiter.clone();
        let stats = stats.clone();
        tokio::spawn(async move { limiter.can_pass(&*stats, 1, false).await })
    });
    let granted = join_all(tasks).await.into_iter().filter(|r| *r.as_ref().unwrap()).count();

    // One immediate grant plus five queued slots of 100ms each.
    assert_eq!(granted, 6);
    assert_eq!(limiter.latest_passed_time(), Some(T0 as i64 + 500));
}

#[tokio::test]
async fn waiting_callers_are_spaced_by_cost() {
    let clock = ManualClock::new(T0);
    let sleeper = TrackingSleeper::advancing(clock.clone());
    let limiter = RateLimiterController::new(1_000, 20.0).with_clock(clock.clone()).with_sleeper(sleeper.clone());
    let stats = ManualStatistics::default();

    for _ in 0..4 {
        assert!(limiter.can_pass(&stats, 1, false).await);
    }

    // Each sleep advances the clock, so every later caller waits one 50ms slot.
    assert_eq!(sleeper.calls(), vec![Duration::from_millis(50); 3]);
    assert_eq!(clock.now_millis(), T0 + 150);
}

#[tokio::test]
async fn idle_gap_resets_the_cursor() {
    let clock = ManualClock::new(T0);
    let sleeper = TrackingSleeper::new();
    let limiter = RateLimiterController::new(500, 10.0).with_clock(clock.clone()).with_sleeper(sleeper.clone());
    let stats = ManualStatistics::default();

    assert!(limiter.can_pass(&stats, 1, false).await);
    assert!(limiter.can_pass(&stats, 1, false).await);
    clock.advance(10_000);
    assert!(limiter.can_pass(&stats, 1, false).await);

    assert_eq!(sleeper.calls().len(), 1);
    assert_eq!(limiter.latest_passed_time(), Some(T0 as i64 + 10_000));
}

#[tokio::test(start_paused = true)]
async fn layer_delays_requests_instead_of_rejecting() {
    let limiter = Arc::new(RateLimiterController::new(1_000, 10.0));
    let layer = ShapingLayer::new("paced", limiter, Arc::new(ManualStatistics::default()));
    let svc = ServiceBuilder::new()
        .layer(layer)
        .service(service_fn(|req: u32| async move { Ok::<_, Infallible>(req) }));

    let start = tokio::time::Instant::now();
    for i in 0..3 {
        assert_eq!(svc.clone().oneshot(i).await.unwrap(), i);
    }

    // 100ms then 200ms of queueing on the paused runtime clock.
    assert!(start.elapsed() >= Duration::from_millis(250));
}
