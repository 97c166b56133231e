use std::sync::Arc;
use std::time::Duration;

use chrono::{DateTime, Utc};
use multicam_reid::reid::{AssignmentRecord, JsonlSink};
use multicam_reid::{
    CameraId, Decision, Detection, Frame, FrameImage, IdentityStatus, InMemoryStore,
    MultiCameraRuntime, Rect, ReidConfig, ReplaySource, RetryConfig,
};

const RED: [u8; 3] = [200, 30, 30];
const BLUE: [u8; 3] = [30, 30, 200];

fn frame(camera: &str, n: u64, at: DateTime<Utc>, people: &[([f32; 4], [u8; 3])]) -> Frame {
    let mut image = FrameImage::filled(640, 480, [15, 15, 15]);
    let mut detections = Vec::new();
    for (tlbr, colour) in people {
        image.fill_rect(&Rect::from_tlbr(tlbr[0], tlbr[1], tlbr[2], tlbr[3]), *colour);
        detections.push(Detection::new(camera, n, at, *tlbr, 0.85));
    }
    Frame {
        camera_id: CameraId::from(camera),
        frame_number: n,
        captured_at: at,
        detections,
        image: Some(Arc::new(image)),
    }
}

/// cam1 sees the red person; cam2 later sees the red and the blue person.
fn sources(base: DateTime<Utc>) -> (ReplaySource, ReplaySource) {
    let cam1 = (1..=3)
        .map(|n| {
            let at = base + chrono::Duration::milliseconds(n as i64 * 100);
            let x = 100.0 + n as f32 * 3.0;
            frame("cam1", n, at, &[([x, 80.0, x + 70.0, 320.0], RED)])
        })
        .collect();
    let cam2 = (1..=3)
        .map(|n| {
            let at = base + chrono::Duration::seconds(10) + chrono::Duration::milliseconds(n as i64 * 100);
            frame(
                "cam2",
                n,
                at,
                &[
                    ([50.0, 60.0, 120.0, 300.0], RED),
                    ([400.0, 60.0, 470.0, 300.0], BLUE),
                ],
            )
        })
        .collect();
    (
        ReplaySource::new("cam1", cam1),
        ReplaySource::new("cam2", cam2),
    )
}

fn init_tracing() {
    let _ = tracing_subscriber::fmt()
        .with_env_filter(tracing_subscriber::EnvFilter::from_default_env())
        .with_test_writer()
        .try_init();
}

fn fast_retry(max_retries: u32) -> RetryConfig {
    RetryConfig {
        max_retries,
        base_delay: Duration::from_millis(1),
        max_delay: Duration::from_millis(8),
    }
}

#[tokio::test(flavor = "multi_thread", worker_threads = 2)]
async fn test_two_cameras_end_to_end() {
    init_tracing();
    let dir = tempfile::tempdir().unwrap();
    let log_path = dir.path().join("reid_assignment_log.jsonl");
    let sink = Arc::new(JsonlSink::create(&log_path).unwrap());
    let store = Arc::new(InMemoryStore::new());

    let (cam1, cam2) = sources(Utc::now());
    let runtime = MultiCameraRuntime::builder(ReidConfig::default().with_persistence_retry(fast_retry(3)))
        .camera(cam1)
        .camera(cam2)
        .persistence(store.clone())
        .sink(sink.clone())
        .start()
        .unwrap();
    let resolver = runtime.resolver().clone();
    let health = runtime.persistence_health().cloned().unwrap();

    let mut reports = runtime.run_to_completion().await;
    reports.sort_by(|a, b| a.camera_id.cmp(&b.camera_id));
    assert_eq!(reports.len(), 2);
    assert_eq!(reports[0].frames, 3);
    assert_eq!(reports[0].resolved, 3);
    assert_eq!(reports[1].resolved, 6);
    assert_eq!(reports[1].tracks_ended, 2);

    // Red person is one identity across both cameras.
    let identities = resolver.identities();
    assert_eq!(identities.len(), 2);
    assert!(identities.iter().all(|i| i.status == IdentityStatus::Active));
    assert_eq!(resolver.stats().active_count, 2);

    // Every decided record reached the store.
    assert!(!health.alarm());
    assert_eq!(health.pending(), 0);
    assert_eq!(store.identities().len(), 2);
    assert_eq!(store.visits().len(), 2);
    for identity in &identities {
        assert_eq!(store.identity(identity.global_id).as_ref(), Some(identity));
    }

    sink.flush().unwrap();
    let contents = std::fs::read_to_string(&log_path).unwrap();
    let records: Vec<AssignmentRecord> = contents
        .lines()
        .map(|line| serde_json::from_str(line).unwrap())
        .collect();
    assert_eq!(records.len(), 9);
    let cross_camera = records
        .iter()
        .filter(|r| r.assignment_type == Decision::ReidMatch)
        .count();
    assert_eq!(cross_camera, 1);
}

#[tokio::test]
async fn test_store_outage_is_retried() {
    let store = Arc::new(InMemoryStore::new());
    store.fail_next(4);

    let (cam1, _) = sources(Utc::now());
    let runtime = MultiCameraRuntime::builder(ReidConfig::default().with_persistence_retry(fast_retry(5)))
        .camera(cam1)
        .persistence(store.clone())
        .start()
        .unwrap();
    let health = runtime.persistence_health().cloned().unwrap();
    runtime.run_to_completion().await;

    assert!(!health.alarm());
    assert_eq!(health.dropped(), 0);
    assert_eq!(store.identities().len(), 1);
    assert_eq!(store.visits().len(), 1);
}

#[tokio::test]
async fn test_persistent_outage_raises_alarm_without_blocking_resolution() {
    init_tracing();
    let store = Arc::new(InMemoryStore::new());
    store.set_unavailable(true);

    let (cam1, _) = sources(Utc::now());
    let runtime = MultiCameraRuntime::builder(ReidConfig::default().with_persistence_retry(fast_retry(1)))
        .camera(cam1)
        .persistence(store.clone())
        .start()
        .unwrap();
    let resolver = runtime.resolver().clone();
    let health = runtime.persistence_health().cloned().unwrap();
    let reports = runtime.run_to_completion().await;

    assert_eq!(reports[0].resolved, 3);
    assert_eq!(resolver.identities().len(), 1);
    assert!(health.alarm());
    assert!(health.dropped() > 0);
    assert!(store.identities().is_empty());
}

#[tokio::test]
async fn test_duplicate_camera_is_rejected() {
    let (cam1, _) = sources(Utc::now());
    let (again, _) = sources(Utc::now());
    let result = MultiCameraRuntime::builder(ReidConfig::default())
        .camera(cam1)
        .camera(again)
        .start();
    assert!(result.is_err());
}

#[tokio::test]
async fn test_shutdown_stops_workers() {
    let (cam1, cam2) = sources(Utc::now());
    let runtime = MultiCameraRuntime::builder(ReidConfig::default())
        .camera(cam1)
        .camera(cam2)
        .start()
        .unwrap();
    let reports = runtime.shutdown().await;
    assert_eq!(reports.len(), 2);
    assert!(reports.iter().all(|r| r.frames <= 3));
}
