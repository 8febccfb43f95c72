//! Job lifecycle tests against an in-memory fetcher
mod common;

use std::sync::Arc;
use std::time::Duration;

use common::{ScriptedFetcher, fast_defaults, product_page};
use scrapeflow_lib::domain::{
    DelayRange, FieldSpec, JobOverrides, JobState, JobTargets, PaginationConfig, Template,
};
use scrapeflow_lib::infrastructure::FetchError;
use scrapeflow_lib::{JobHandle, JobScheduler, JobSpec};

fn product_template() -> Template {
    Template::new("products").with_field(FieldSpec::text("name", "h1.name"))
}

fn urls(count: usize) -> Vec<String> {
    (0..count).map(|i| format!("https://shop.test/p/{i}")).collect()
}

fn catalogue(count: usize) -> ScriptedFetcher {
    urls(count)
        .iter()
        .enumerate()
        .fold(ScriptedFetcher::new(), |fetcher, (i, url)| {
            fetcher.page(url, &product_page(&format!("Product {i}")))
        })
}

async fn wait_for_items(handle: &JobHandle, items: u64) {
    for _ in 0..200 {
        if handle.status().await.items_scraped >= items {
            return;
        }
        tokio::time::sleep(Duration::from_millis(5)).await;
    }
    panic!("job never scraped {items} items");
}

#[tokio::test]
async fn batch_never_exceeds_the_concurrency_limit() {
    let fetcher = Arc::new(catalogue(8).default_delay(Duration::from_millis(30)));
    let scheduler = JobScheduler::with_limit(2, fast_defaults(1), fetcher.clone());

    let handle = scheduler
        .submit(JobSpec::new(product_template(), JobTargets::batch(urls(8))))
        .await;
    let status = handle.wait().await;

    assert_eq!(status.status, JobState::Completed);
    assert_eq!(status.items_scraped, 8);
    assert!(fetcher.peak() <= 2, "peak concurrency was {}", fetcher.peak());
    assert_eq!(scheduler.available_slots(), 2);
}

#[tokio::test]
async fn limit_is_shared_between_jobs() {
    let fetcher = Arc::new(catalogue(6).default_delay(Duration::from_millis(20)));
    let scheduler = JobScheduler::with_limit(3, fast_defaults(1), fetcher.clone());

    let first = scheduler
        .submit(JobSpec::new(product_template(), JobTargets::batch(urls(6))))
        .await;
    let second = scheduler
        .submit(JobSpec::new(product_template(), JobTargets::batch(urls(6))))
        .await;

    assert_eq!(first.wait().await.status, JobState::Completed);
    assert_eq!(second.wait().await.status, JobState::Completed);
    assert_eq!(fetcher.call_count(), 12);
    assert!(fetcher.peak() <= 3, "peak concurrency was {}", fetcher.peak());
}

#[tokio::test]
async fn per_job_concurrency_override_is_respected() {
    let fetcher = Arc::new(catalogue(5).default_delay(Duration::from_millis(20)));
    let scheduler = JobScheduler::with_limit(4, fast_defaults(1), fetcher.clone());

    let overrides = JobOverrides {
        concurrency: Some(1),
        ..JobOverrides::default()
    };
    let handle = scheduler
        .submit(JobSpec::new(product_template(), JobTargets::batch(urls(5))).with_overrides(overrides))
        .await;

    assert_eq!(handle.wait().await.items_scraped, 5);
    assert_eq!(fetcher.peak(), 1);
}

#[tokio::test]
async fn stop_keeps_partial_results_and_halts_fetching() {
    let fetcher = Arc::new(catalogue(10).default_delay(Duration::from_millis(25)));
    let scheduler = JobScheduler::with_limit(1, fast_defaults(1), fetcher.clone());
    let handle = scheduler
        .submit(JobSpec::new(product_template(), JobTargets::sequential(urls(10))))
        .await;

    wait_for_items(&handle, 2).await;
    assert_eq!(handle.stop().await.unwrap(), JobState::Stopped);

    tokio::time::sleep(Duration::from_millis(20)).await;
    let calls_after_stop = fetcher.call_count();
    let scraped = handle.results().await.records.len();
    tokio::time::sleep(Duration::from_millis(100)).await;

    let status = handle.status().await;
    assert_eq!(status.status, JobState::Stopped);
    assert!(status.finished_at.is_some());
    assert!((2..10).contains(&scraped));
    assert_eq!(handle.results().await.records.len(), scraped);
    assert_eq!(fetcher.call_count(), calls_after_stop);
    assert_eq!(scheduler.available_slots(), 1);
}

#[tokio::test]
async fn cancel_is_terminal_and_rejects_further_commands() {
    let fetcher = Arc::new(catalogue(10).default_delay(Duration::from_millis(25)));
    let scheduler = JobScheduler::with_limit(2, fast_defaults(1), fetcher);
    let handle = scheduler
        .submit(JobSpec::new(product_template(), JobTargets::sequential(urls(10))))
        .await;

    wait_for_items(&handle, 1).await;
    assert_eq!(scheduler.cancel(handle.id()).await.unwrap(), JobState::Cancelled);

    let status = handle.wait().await;
    assert_eq!(status.status, JobState::Cancelled);
    assert!(!handle.results().await.records.is_empty());
    assert!(handle.stop().await.is_err());
    assert_eq!(handle.state(), JobState::Cancelled);
}

#[tokio::test]
async fn exhausted_retries_fail_a_single_target_job() {
    let url = "https://shop.test/down";
    let fetcher = Arc::new(ScriptedFetcher::new().failing(
        url,
        FetchError::HttpStatus {
            status: 503,
            url: url.to_string(),
        },
    ));
    let scheduler = JobScheduler::with_limit(2, fast_defaults(3), fetcher.clone());

    let handle = scheduler
        .submit(JobSpec::new(product_template(), JobTargets::single(url)))
        .await;
    let status = handle.wait().await;

    assert_eq!(status.status, JobState::Failed);
    assert!(status.error.unwrap().contains("503"));
    assert_eq!(fetcher.call_count(), 3);

    let failures = handle.results().await.failed_urls;
    assert_eq!(failures.len(), 1);
    assert_eq!(failures[0].attempts, 3);
}

#[tokio::test]
async fn permanent_errors_are_not_retried() {
    let fetcher = Arc::new(ScriptedFetcher::new());
    let scheduler = JobScheduler::with_limit(1, fast_defaults(5), fetcher.clone());

    let handle = scheduler
        .submit(JobSpec::new(product_template(), JobTargets::single("https://shop.test/gone")))
        .await;

    assert_eq!(handle.wait().await.status, JobState::Failed);
    assert_eq!(fetcher.call_count(), 1);
}

#[tokio::test]
async fn batch_failures_are_isolated_per_url() {
    let fetcher = Arc::new(catalogue(3));
    let scheduler = JobScheduler::with_limit(3, fast_defaults(2), fetcher);
    let mut targets = urls(3);
    targets.insert(1, "https://shop.test/missing".to_string());

    let (handle, mut events) = scheduler
        .submit_batch(product_template(), targets, JobOverrides::default())
        .await;

    let mut received = Vec::new();
    while let Some(event) = events.recv().await {
        received.push(event);
    }
    let status = handle.wait().await;

    assert_eq!(status.status, JobState::Completed);
    assert_eq!(status.items_scraped, 3);
    assert_eq!(status.failed_urls, 1);
    assert_eq!(status.progress, 100.0);
    assert_eq!(received.len(), 4);

    let failed: Vec<_> = received.iter().filter(|e| e.error.is_some()).collect();
    assert_eq!(failed.len(), 1);
    assert_eq!(failed[0].index, 1);
    assert_eq!(failed[0].url, "https://shop.test/missing");
}

#[tokio::test]
async fn batch_events_arrive_in_completion_order() {
    let targets = urls(3);
    let fetcher = Arc::new(
        catalogue(3)
            .delay(&targets[0], Duration::from_millis(120))
            .delay(&targets[1], Duration::from_millis(10))
            .delay(&targets[2], Duration::from_millis(60)),
    );
    let scheduler = JobScheduler::with_limit(3, fast_defaults(1), fetcher);

    let (handle, mut events) = scheduler
        .submit_batch(product_template(), targets, JobOverrides::default())
        .await;

    let mut order = Vec::new();
    while let Some(event) = events.recv().await {
        assert_eq!(event.job_id, handle.id());
        order.push(event.index);
    }
    assert_eq!(order, vec![1, 2, 0]);
}

#[tokio::test]
async fn all_batch_targets_failing_fails_the_job() {
    let fetcher = Arc::new(ScriptedFetcher::new());
    let scheduler = JobScheduler::with_limit(2, fast_defaults(1), fetcher);

    let handle = scheduler
        .submit(JobSpec::new(product_template(), JobTargets::batch(urls(2))))
        .await;
    let status = handle.wait().await;

    assert_eq!(status.status, JobState::Failed);
    assert!(status.error.unwrap().contains("All 2 targets failed"));
}

#[tokio::test]
async fn pagination_follows_next_links_without_revisiting() {
    let first = "https://shop.test/list?page=1";
    let second = "https://shop.test/list?page=2";
    let fetcher = Arc::new(
        ScriptedFetcher::new()
            .page(first, &format!(r#"<h1 class="name">One</h1><a class="next" href="{second}">next</a>"#))
            .page(second, &format!(r#"<h1 class="name">Two</h1><a class="next" href="{first}">next</a>"#)),
    );
    let scheduler = JobScheduler::with_limit(1, fast_defaults(1), fetcher.clone());
    let template = product_template().with_pagination(PaginationConfig {
        enabled: true,
        next_selector: Some("a.next".into()),
        max_pages: 10,
    });

    let handle = scheduler
        .submit(JobSpec::new(template, JobTargets::single(first)))
        .await;
    let status = handle.wait().await;

    assert_eq!(status.status, JobState::Completed);
    assert_eq!(status.pages_processed, 2);
    assert_eq!(fetcher.calls(), vec![first.to_string(), second.to_string()]);
}

#[tokio::test]
async fn job_without_targets_completes_immediately() {
    let scheduler = JobScheduler::with_limit(1, fast_defaults(1), Arc::new(ScriptedFetcher::new()));
    let handle = scheduler
        .submit(JobSpec::new(product_template(), JobTargets::sequential(Vec::<String>::new())))
        .await;

    let status = handle.wait().await;
    assert_eq!(status.status, JobState::Completed);
    assert_eq!(status.progress, 100.0);
}

#[tokio::test(start_paused = true)]
async fn batch_fetches_are_spaced_by_the_job_delay() {
    let fetcher = Arc::new(catalogue(5));
    let scheduler = JobScheduler::with_limit(3, fast_defaults(1), fetcher.clone());
    let overrides = JobOverrides {
        delay_range_ms: Some(DelayRange::new(200, 200)),
        ..JobOverrides::default()
    };

    let handle = scheduler
        .submit(JobSpec::new(product_template(), JobTargets::batch(urls(5))).with_overrides(overrides))
        .await;
    assert_eq!(handle.wait().await.items_scraped, 5);

    let gaps = fetcher.gaps();
    assert_eq!(gaps.len(), 4);
    assert!(
        gaps.iter().all(|gap| *gap >= Duration::from_millis(200)),
        "gaps: {gaps:?}"
    );
}

#[tokio::test(start_paused = true)]
async fn sequential_fetches_are_spaced_by_the_job_delay() {
    let fetcher = Arc::new(catalogue(3));
    let scheduler = JobScheduler::with_limit(1, fast_defaults(1), fetcher.clone());
    let overrides = JobOverrides {
        delay_range_ms: Some(DelayRange::new(150, 150)),
        ..JobOverrides::default()
    };

    let handle = scheduler
        .submit(JobSpec::new(product_template(), JobTargets::sequential(urls(3))).with_overrides(overrides))
        .await;
    assert_eq!(handle.wait().await.status, JobState::Completed);
    assert!(fetcher.gaps().iter().all(|gap| *gap >= Duration::from_millis(150)));
}

#[tokio::test(start_paused = true)]
async fn retries_wait_for_backoff_only() {
    let url = "https://shop.test/flaky";
    let fetcher = Arc::new(ScriptedFetcher::new().failing(
        url,
        FetchError::Connection {
            url: url.to_string(),
            reason: "reset".into(),
        },
    ));
    let scheduler = JobScheduler::with_limit(1, fast_defaults(3), fetcher.clone());
    let overrides = JobOverrides {
        delay_range_ms: Some(DelayRange::new(500, 500)),
        ..JobOverrides::default()
    };

    let handle = scheduler
        .submit(JobSpec::new(product_template(), JobTargets::single(url)).with_overrides(overrides))
        .await;
    assert_eq!(handle.wait().await.status, JobState::Failed);
    assert_eq!(fetcher.call_count(), 3);
    assert!(fetcher.gaps().iter().all(|gap| *gap < Duration::from_millis(500)));
}

#[tokio::test(start_paused = true)]
async fn slow_fetch_times_out_and_is_retried() {
    let url = "https://shop.test/slow";
    let fetcher = Arc::new(
        ScriptedFetcher::new()
            .page(url, &product_page("Slow"))
            .delay(url, Duration::from_millis(1500)),
    );
    let scheduler = JobScheduler::with_limit(1, fast_defaults(2), fetcher.clone());
    let overrides = JobOverrides {
        timeout_seconds: Some(1),
        ..JobOverrides::default()
    };

    let handle = scheduler
        .submit(JobSpec::new(product_template(), JobTargets::single(url)).with_overrides(overrides))
        .await;
    let status = handle.wait().await;

    assert_eq!(status.status, JobState::Failed);
    assert!(status.error.unwrap().contains("timed out after 1000ms"));
    assert_eq!(fetcher.call_count(), 2);

    let failures = handle.results().await.failed_urls;
    assert_eq!(failures[0].attempts, 2);
    assert!(failures[0].error.contains("timed out"));
}

#[tokio::test]
async fn released_jobs_leave_the_registry() {
    let scheduler = JobScheduler::with_limit(1, fast_defaults(1), Arc::new(catalogue(1)));
    let handle = scheduler
        .submit(JobSpec::new(product_template(), JobTargets::sequential(urls(1))))
        .await;
    let id = handle.id();
    handle.wait().await;
    drop(handle);

    for _ in 0..100 {
        if scheduler.job(id).await.is_none() {
            break;
        }
        tokio::time::sleep(Duration::from_millis(5)).await;
    }
    assert!(scheduler.job(id).await.is_none());
    assert!(scheduler.statuses().await.is_empty());
}
