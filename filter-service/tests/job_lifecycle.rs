//! Job lifecycle tests against a running pipeline manager.
//!
//! Filters are swapped through the registry to make steps slow, failing or
//! observable.

mod common;

use std::sync::Arc;
use std::time::Duration;

use chrono::Utc;
use filter_service::domain::{FilterKind, FilterStep, JobId, JobState};
use filter_service::pipeline::{
    FilterRegistry, FnFilter, PipelineEvent, PipelineManager, PipelineManagerConfig, PurgeConfig,
    SHUTDOWN_REASON, WorkerPoolConfig,
};
use image::{DynamicImage, Rgba};
use parking_lot::Mutex;
use tokio::sync::broadcast;

use common::{Gate, build_manager, counts, submit_png, wait_for_terminal, wait_until};

fn step(kind: FilterKind) -> FilterStep {
    FilterStep::simple(kind).expect("valid step")
}

fn config_with_workers(max_workers: usize) -> PipelineManagerConfig {
    PipelineManagerConfig {
        worker_pool: WorkerPoolConfig {
            max_workers,
            poll_interval_ms: 10,
            ..Default::default()
        },
        ..Default::default()
    }
}

/// Collect events for `id` until it reaches a terminal state.
async fn events_until_terminal(
    rx: &mut broadcast::Receiver<PipelineEvent>,
    id: JobId,
) -> Vec<PipelineEvent> {
    let mut seen = Vec::new();
    let collect = async {
        loop {
            let event = rx.recv().await.expect("event stream closed");
            if event.job_id() != Some(id) {
                continue;
            }
            let done = matches!(
                event,
                PipelineEvent::JobCompleted { .. } | PipelineEvent::JobFailed { .. }
            );
            seen.push(event);
            if done {
                break;
            }
        }
    };
    tokio::time::timeout(Duration::from_secs(10), collect)
        .await
        .expect("job did not finish in time");
    seen
}

fn progress_values(events: &[PipelineEvent]) -> Vec<u8> {
    events
        .iter()
        .filter_map(|e| match e {
            PipelineEvent::JobProgress { progress, .. } => Some(*progress),
            _ => None,
        })
        .collect()
}

mod lifecycle_tests {
    use super::*;

    #[tokio::test]
    async fn test_single_grayscale_job_completes() {
        let tmp = tempfile::tempdir().unwrap();
        let manager = build_manager(
            tmp.path(),
            config_with_workers(2),
            FilterRegistry::with_defaults(),
        );
        manager.start();

        let id = submit_png(&manager, vec![step(FilterKind::Grayscale)]).await;
        let job = wait_for_terminal(&manager, id).await;

        assert_eq!(job.state, JobState::Completed);
        assert_eq!(job.progress, 100);
        assert!(job.failure_reason.is_none());
        assert!(job.started_at.is_some() && job.finished_at.is_some());

        let output = job.output_ref.clone().expect("completed job has output");
        let decoded = image::open(&output).expect("output decodes");
        assert_eq!((decoded.width(), decoded.height()), (10, 10));
        assert!(!output.with_extension("png.part").exists());

        manager.stop().await;
    }

    #[tokio::test]
    async fn test_events_follow_state_machine_and_progress_is_monotonic() {
        let tmp = tempfile::tempdir().unwrap();
        let manager = build_manager(
            tmp.path(),
            config_with_workers(1),
            FilterRegistry::with_defaults(),
        );
        let mut rx = manager.subscribe();
        manager.start();

        let id = submit_png(
            &manager,
            vec![
                step(FilterKind::Grayscale),
                step(FilterKind::Invert),
                step(FilterKind::FlipHorizontal),
            ],
        )
        .await;
        let events = events_until_terminal(&mut rx, id).await;

        assert!(matches!(events.first(), Some(PipelineEvent::JobEnqueued { .. })));
        assert!(matches!(events.get(1), Some(PipelineEvent::JobStarted { .. })));
        assert!(matches!(events.last(), Some(PipelineEvent::JobCompleted { .. })));

        let progress = progress_values(&events);
        assert_eq!(progress, vec![33, 67, 100]);
        assert!(progress.windows(2).all(|w| w[0] <= w[1]));

        manager.stop().await;
    }

    #[tokio::test]
    async fn test_failing_second_step_freezes_progress() {
        let tmp = tempfile::tempdir().unwrap();
        let mut registry = FilterRegistry::with_defaults();
        registry.register(
            FilterKind::Sepia,
            Arc::new(FnFilter::new("sepia", |_, _| Err("sepia exploded".into()))),
        );
        let manager = build_manager(tmp.path(), config_with_workers(1), registry);
        manager.start();

        let id = submit_png(
            &manager,
            vec![
                step(FilterKind::Grayscale),
                step(FilterKind::Sepia),
                step(FilterKind::Invert),
            ],
        )
        .await;
        let job = wait_for_terminal(&manager, id).await;

        assert_eq!(job.state, JobState::Failed);
        assert_eq!(job.progress, 33);
        let reason = job.failure_reason.clone().expect("failed job has a reason");
        assert!(reason.contains("sepia exploded"), "unexpected reason: {reason}");
        assert!(job.output_ref.is_none());
        assert!(!job.output_path().exists());

        manager.stop().await;
    }

    #[tokio::test]
    async fn test_steps_run_in_submitted_order() {
        let tmp = tempfile::tempdir().unwrap();
        let seen: Arc<Mutex<Vec<(u8, u8)>>> = Arc::new(Mutex::new(Vec::new()));

        // Each tagger records (its tag, the tag found in its input) and
        // stamps its own tag into pixel (0,0).
        let tagger = |tag: u8| {
            let seen = seen.clone();
            Arc::new(FnFilter::new(format!("tag-{tag}"), move |img: DynamicImage, _| {
                let mut buf = img.to_rgba8();
                seen.lock().push((tag, buf.get_pixel(0, 0)[0]));
                buf.put_pixel(0, 0, Rgba([tag, 0, 0, 255]));
                Ok(DynamicImage::ImageRgba8(buf))
            }))
        };

        let mut registry = FilterRegistry::with_defaults();
        registry
            .register(FilterKind::Grayscale, tagger(11))
            .register(FilterKind::Sepia, tagger(22))
            .register(FilterKind::Invert, tagger(33));
        let manager = build_manager(tmp.path(), config_with_workers(1), registry);
        manager.start();

        let id = submit_png(
            &manager,
            vec![
                step(FilterKind::Invert),
                step(FilterKind::Grayscale),
                step(FilterKind::Sepia),
            ],
        )
        .await;
        let job = wait_for_terminal(&manager, id).await;
        assert_eq!(job.state, JobState::Completed);

        assert_eq!(*seen.lock(), vec![(33, 0), (11, 33), (22, 11)]);

        let output = image::open(job.output_ref.expect("output")).expect("decodes");
        assert_eq!(output.to_rgba8().get_pixel(0, 0)[0], 22);

        manager.stop().await;
    }

    #[tokio::test]
    async fn test_terminal_job_is_stable() {
        let tmp = tempfile::tempdir().unwrap();
        let manager = build_manager(
            tmp.path(),
            config_with_workers(1),
            FilterRegistry::with_defaults(),
        );
        manager.start();

        let id = submit_png(&manager, vec![step(FilterKind::Invert)]).await;
        let first = wait_for_terminal(&manager, id).await;
        tokio::time::sleep(Duration::from_millis(50)).await;
        let second = manager.get_job(id).await.unwrap().unwrap();

        assert_eq!(
            serde_json::to_value(&first).unwrap(),
            serde_json::to_value(&second).unwrap()
        );

        manager.stop().await;
    }
}

mod concurrency_tests {
    use super::*;

    fn gated_registry(gate: Arc<Gate>) -> FilterRegistry {
        let mut registry = FilterRegistry::with_defaults();
        registry.register(
            FilterKind::Grayscale,
            Arc::new(FnFilter::new("gated", move |img: DynamicImage, _| {
                gate.wait();
                Ok(img.grayscale())
            })),
        );
        registry
    }

    #[tokio::test(flavor = "multi_thread", worker_threads = 4)]
    async fn test_fifteen_jobs_on_ten_workers() {
        let tmp = tempfile::tempdir().unwrap();
        let gate = Gate::new();
        let manager = build_manager(
            tmp.path(),
            config_with_workers(10),
            gated_registry(gate.clone()),
        );
        manager.start();

        let mut ids = Vec::new();
        for _ in 0..15 {
            ids.push(submit_png(&manager, vec![step(FilterKind::Grayscale)]).await);
        }

        let saturated = wait_until(Duration::from_secs(5), || {
            let manager = manager.clone();
            async move {
                let c = counts(&manager).await;
                (c.active == 10).then_some(c)
            }
        })
        .await
        .expect("pool never saturated");
        assert_eq!(saturated.queued, 5);

        // Stays saturated while the gate is closed.
        for _ in 0..10 {
            let c = counts(&manager).await;
            assert_eq!(c.active, 10);
            assert_eq!(c.queued, 5);
            assert!(manager.get_stats().await.unwrap().active_workers <= 10);
            tokio::time::sleep(Duration::from_millis(10)).await;
        }

        gate.open();
        for id in ids {
            let job = wait_for_terminal(&manager, id).await;
            assert_eq!(job.state, JobState::Completed);
        }

        let c = counts(&manager).await;
        assert_eq!(c.completed, 15);
        assert_eq!(manager.get_stats().await.unwrap().active_workers, 0);

        manager.stop().await;
    }

    #[tokio::test(flavor = "multi_thread", worker_threads = 4)]
    async fn test_active_never_exceeds_pool_size() {
        let tmp = tempfile::tempdir().unwrap();
        let mut registry = FilterRegistry::with_defaults();
        registry.register(
            FilterKind::Blur,
            Arc::new(FnFilter::new("slow", |img: DynamicImage, _| {
                std::thread::sleep(Duration::from_millis(20));
                Ok(img)
            })),
        );
        let manager = build_manager(tmp.path(), config_with_workers(3), registry);
        let mut rx = manager.subscribe();
        manager.start();

        let blur = FilterStep::new(FilterKind::Blur, Some(1.0)).unwrap();
        for _ in 0..12 {
            submit_png(&manager, vec![blur]).await;
        }

        let mut active = 0usize;
        let mut max_active = 0usize;
        let mut finished = 0;
        while finished < 12 {
            let event = tokio::time::timeout(Duration::from_secs(10), rx.recv())
                .await
                .expect("timed out waiting for events")
                .expect("event stream closed");
            match event {
                PipelineEvent::JobStarted { .. } => {
                    active += 1;
                    max_active = max_active.max(active);
                }
                PipelineEvent::JobCompleted { .. } | PipelineEvent::JobFailed { .. } => {
                    active -= 1;
                    finished += 1;
                }
                _ => {}
            }
        }

        assert!(max_active <= 3, "saw {max_active} active jobs");
        manager.stop().await;
    }
}

mod deadline_tests {
    use super::*;

    #[tokio::test(flavor = "multi_thread", worker_threads = 2)]
    async fn test_timeout_fails_job_and_frees_slot() {
        let tmp = tempfile::tempdir().unwrap();
        let mut registry = FilterRegistry::with_defaults();
        registry.register(
            FilterKind::Grayscale,
            Arc::new(FnFilter::new("stuck", |img: DynamicImage, _| {
                std::thread::sleep(Duration::from_millis(1500));
                Ok(img)
            })),
        );
        let config = PipelineManagerConfig {
            worker_pool: WorkerPoolConfig {
                max_workers: 1,
                job_timeout_secs: 1,
                poll_interval_ms: 10,
            },
            ..Default::default()
        };
        let manager = build_manager(tmp.path(), config, registry);
        manager.start();

        let stuck = submit_png(
            &manager,
            vec![step(FilterKind::Grayscale), step(FilterKind::Invert)],
        )
        .await;
        let next = submit_png(&manager, vec![step(FilterKind::Invert)]).await;

        let job = wait_for_terminal(&manager, stuck).await;
        assert_eq!(job.state, JobState::Failed);
        assert_eq!(job.failure_reason.as_deref(), Some("job timed out after 1s"));

        // The slot is released right away, so the next job runs.
        let next = wait_for_terminal(&manager, next).await;
        assert_eq!(next.state, JobState::Completed);

        // The abandoned step finishes later but leaves no artifact.
        tokio::time::sleep(Duration::from_millis(1000)).await;
        assert!(!job.output_path().exists());
        let job = manager.get_job(stuck).await.unwrap().unwrap();
        assert_eq!(job.state, JobState::Failed);

        manager.stop().await;
    }

    #[tokio::test(flavor = "multi_thread", worker_threads = 2)]
    async fn test_shutdown_fails_running_job() {
        let tmp = tempfile::tempdir().unwrap();
        let gate = Gate::new();
        let gate_in_filter = gate.clone();
        let mut registry = FilterRegistry::with_defaults();
        registry.register(
            FilterKind::Grayscale,
            Arc::new(FnFilter::new("gated", move |img: DynamicImage, _| {
                gate_in_filter.wait();
                Ok(img)
            })),
        );
        let manager = build_manager(tmp.path(), config_with_workers(1), registry);
        manager.start();

        let id = submit_png(&manager, vec![step(FilterKind::Grayscale)]).await;
        wait_until(Duration::from_secs(5), || {
            let manager = manager.clone();
            async move { (counts(&manager).await.active == 1).then_some(()) }
        })
        .await
        .expect("job never started");

        manager.stop().await;
        let job = manager.get_job(id).await.unwrap().unwrap();
        assert_eq!(job.state, JobState::Failed);
        assert_eq!(job.failure_reason.as_deref(), Some(SHUTDOWN_REASON));
        assert!(!manager.is_running());

        gate.open();
    }
}

mod purge_tests {
    use super::*;

    async fn finished_job(manager: &PipelineManager) -> JobId {
        let id = submit_png(manager, vec![step(FilterKind::Invert)]).await;
        let job = wait_for_terminal(manager, id).await;
        assert_eq!(job.state, JobState::Completed);
        id
    }

    #[tokio::test]
    async fn test_purge_releases_artifacts_then_records() {
        let tmp = tempfile::tempdir().unwrap();
        let config = PipelineManagerConfig {
            purge: PurgeConfig::new()
                .with_artifact_retention_secs(60)
                .with_record_retention_secs(3600),
            ..config_with_workers(1)
        };
        let manager = build_manager(tmp.path(), config, FilterRegistry::with_defaults());
        manager.start();

        let id = finished_job(&manager).await;
        let job = manager.get_job(id).await.unwrap().unwrap();
        let purge = manager.purge_service();

        // Nothing is old enough yet.
        let report = purge.run_purge().await.unwrap();
        assert!(report.is_empty());
        assert!(job.scratch_dir.exists());

        let report = purge
            .run_purge_at(Utc::now() + chrono::Duration::seconds(120))
            .await
            .unwrap();
        assert_eq!(report.artifacts_released, 1);
        assert_eq!(report.records_removed, 0);
        assert!(!job.scratch_dir.exists());

        // The record survives its artifacts.
        let after = manager.get_job(id).await.unwrap().unwrap();
        assert_eq!(after.state, JobState::Completed);

        let report = purge
            .run_purge_at(Utc::now() + chrono::Duration::seconds(7200))
            .await
            .unwrap();
        assert_eq!(report.records_removed, 1);
        assert!(manager.get_job(id).await.unwrap().is_none());

        manager.stop().await;
    }

    #[tokio::test]
    async fn test_purge_skips_unfinished_jobs() {
        let tmp = tempfile::tempdir().unwrap();
        let config = PipelineManagerConfig {
            purge: PurgeConfig::new()
                .with_artifact_retention_secs(1)
                .with_record_retention_secs(1),
            ..config_with_workers(1)
        };
        // Not started, so the job stays queued.
        let manager = build_manager(tmp.path(), config, FilterRegistry::with_defaults());

        let id = submit_png(&manager, vec![step(FilterKind::Invert)]).await;
        let report = manager
            .purge_service()
            .run_purge_at(Utc::now() + chrono::Duration::days(30))
            .await
            .unwrap();
        assert!(report.is_empty());

        let job = manager.get_job(id).await.unwrap().unwrap();
        assert_eq!(job.state, JobState::Queued);
        assert!(job.scratch_dir.exists());
    }
}
