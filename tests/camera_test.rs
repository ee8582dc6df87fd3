//! Integration tests for the camera front-end: lifecycle, exposures and
//! capabilities, driven through the simulated backend.

mod common;

use std::path::Path;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Arc;
use std::time::Duration;

use common::{camera_config, collection_with_cam1, connected_cam1, small_backend, Recorder};
use rust_camera::camera::{Camera, CameraDriver};
use rust_camera::exposure::{Exposure, ExposureRenderer, FitsRenderer};
use rust_camera::simulated::{SimulatedCamera, SimulatedFaults};
use rust_camera::{
    AddCameraOptions, Binning, CameraCollection, CameraError, CameraEvent, CameraQuery,
    Capability, Event, ExposeOptions, ImageArea, ImageType, Listener, Notifier, PixelData,
    SetPointOutcome, StackFunction,
};
use serde_json::{Map, Value};
use tracing_test::traced_test;

// =============================================================================
// Lifecycle
// =============================================================================

#[tokio::test]
async fn test_connect_twice_fails_unless_forced() {
    let dir = tempfile::tempdir().unwrap();
    let (collection, backend, _recorder) = collection_with_cam1(dir.path(), |_| {});
    let (camera, driver) = connected_cam1(&collection, &backend).await;

    let err = camera.connect(false, &Map::new()).await.unwrap_err();
    assert!(matches!(err, CameraError::Connection { .. }));
    assert_eq!(driver.connect_count().await, 1);

    camera.connect(true, &Map::new()).await.unwrap();
    assert_eq!(driver.connect_count().await, 2);
}

#[tokio::test]
async fn test_connect_failure_is_reported() {
    let dir = tempfile::tempdir().unwrap();
    let (collection, backend, recorder) =
        collection_with_cam1(dir.path(), |cam1| cam1.autoconnect = Some(false));
    let (camera, driver) = connected_cam1(&collection, &backend).await;

    driver.set_faults(SimulatedFaults {
        fail_connect: true,
        ..Default::default()
    });
    let err = camera.connect(false, &Map::new()).await.unwrap_err();
    assert!(err.to_string().contains("connection refused"));
    assert!(!camera.is_connected());

    recorder.wait_for_count(CameraEvent::CameraConnectFailed, 1).await;
    let failed = recorder.payloads(CameraEvent::CameraConnectFailed);
    assert!(failed[0].get_str("error").unwrap().contains("connection refused"));
}

#[tokio::test]
async fn test_disconnect_failure_keeps_connection() {
    let dir = tempfile::tempdir().unwrap();
    let (collection, backend, recorder) = collection_with_cam1(dir.path(), |_| {});
    let (camera, driver) = connected_cam1(&collection, &backend).await;

    driver.set_faults(SimulatedFaults {
        fail_disconnect: true,
        ..Default::default()
    });
    assert!(camera.disconnect().await.is_err());
    assert!(camera.is_connected());
    recorder
        .wait_for_count(CameraEvent::CameraDisconnectFailed, 1)
        .await;

    driver.set_faults(SimulatedFaults::default());
    camera.disconnect().await.unwrap();
    assert!(!camera.is_connected());
    recorder.wait_for_count(CameraEvent::CameraDisconnected, 1).await;
}

#[tokio::test]
async fn test_status_is_cached_until_updated() {
    let dir = tempfile::tempdir().unwrap();
    let (collection, backend, _recorder) = collection_with_cam1(dir.path(), |_| {});
    let (camera, _driver) = connected_cam1(&collection, &backend).await;

    let status = camera.get_status(false).await;
    assert_eq!(status["frames"], Value::from(0));
    assert_eq!(status["connected"], Value::from(true));

    camera.object(0.0).await.unwrap();
    assert_eq!(camera.get_status(false).await["frames"], Value::from(0));
    assert_eq!(camera.get_status(true).await["frames"], Value::from(1));
}

// =============================================================================
// Exposures
// =============================================================================

#[tokio::test]
async fn test_negative_exposure_time_rejected_before_capture() {
    let dir = tempfile::tempdir().unwrap();
    let (collection, backend, recorder) = collection_with_cam1(dir.path(), |_| {});
    let (camera, driver) = connected_cam1(&collection, &backend).await;

    let err = camera
        .expose(-0.1, ExposeOptions::default())
        .await
        .unwrap_err();
    assert!(matches!(err, CameraError::Capture { .. }));
    for exptime in [f64::NAN, f64::INFINITY, f64::NEG_INFINITY] {
        let err = camera
            .expose(exptime, ExposeOptions::default())
            .await
            .unwrap_err();
        assert!(matches!(err, CameraError::Capture { .. }), "{exptime}");
    }
    assert!(camera
        .expose(1.0, ExposeOptions::default().stack(0))
        .await
        .is_err());

    assert_eq!(driver.frame_count().await, 0);
    // Anything after the connect would have been dispatched by now.
    camera.bias().await.unwrap();
    recorder.wait_for_count(CameraEvent::ExposureDone, 1).await;
    assert_eq!(recorder.count(CameraEvent::ExposureIntegrating), 1);
    assert_eq!(recorder.count(CameraEvent::ExposureFailed), 0);
}

#[tokio::test]
#[traced_test]
async fn test_bias_forces_zero_exposure_time() {
    let dir = tempfile::tempdir().unwrap();
    let (collection, backend, _recorder) = collection_with_cam1(dir.path(), |_| {});
    let (camera, _driver) = connected_cam1(&collection, &backend).await;

    let exposure = camera
        .expose(1.0, ExposeOptions::default().image_type(ImageType::Bias))
        .await
        .unwrap();
    assert_eq!(exposure.exptime, 0.0);
    assert_eq!(exposure.image_type, ImageType::Bias);

    logs_assert(|lines: &[&str]| {
        match lines
            .iter()
            .filter(|line| line.contains("Setting exposure time for bias to 0 seconds"))
            .count()
        {
            1 => Ok(()),
            n => Err(format!("expected one bias warning, saw {n}")),
        }
    });
}

#[tokio::test]
async fn test_exposure_events_in_order() {
    let dir = tempfile::tempdir().unwrap();
    let (collection, backend, recorder) = collection_with_cam1(dir.path(), |_| {});
    let (camera, _driver) = connected_cam1(&collection, &backend).await;

    let exposure = camera
        .expose(0.01, ExposeOptions::default().postprocess(true))
        .await
        .unwrap();
    recorder
        .wait_for_count(CameraEvent::ExposurePostProcessDone, 1)
        .await;

    let phases: Vec<Event> = recorder
        .events()
        .into_iter()
        .filter(|event| matches!(event, Event::Camera(e) if *e != CameraEvent::CameraConnected))
        .collect();
    assert_eq!(
        phases,
        [
            CameraEvent::ExposureIntegrating,
            CameraEvent::ExposureFlushing,
            CameraEvent::ExposureReading,
            CameraEvent::ExposureDone,
            CameraEvent::ExposurePostProcessing,
            CameraEvent::ExposurePostProcessDone,
        ]
        .map(Event::from)
    );

    assert!(exposure.headers.iter().any(|card| card.keyword == "SIMPROC"));
    let done = recorder.payloads(CameraEvent::ExposureDone);
    assert_eq!(done[0].get_str("image_type"), Some("object"));
    assert!(done[0]
        .get_str("filename")
        .unwrap()
        .ends_with("cam1-0001.fits"));
}

#[tokio::test]
async fn test_stacked_exposure_median() {
    let dir = tempfile::tempdir().unwrap();
    let (collection, backend, recorder) = collection_with_cam1(dir.path(), |_| {});
    let (camera, _driver) = connected_cam1(&collection, &backend).await;

    let exposure = camera
        .expose(0.01, ExposeOptions::default().stack(2))
        .await
        .unwrap();

    assert_eq!(exposure.stack, 2);
    assert_eq!(exposure.stack_function, Some(StackFunction::Median));
    assert!((exposure.exptime - 0.01).abs() < 1e-12);
    assert!((exposure.exptime_total - 0.02).abs() < 1e-12);

    let Some(PixelData::F32(data)) = &exposure.data else {
        panic!("stacked data should be f32, got {:?}", exposure.data);
    };
    assert_eq!(data.dim(), (24, 32));
    // Frames 1 and 2 hold 100 + k and 200 + k.
    assert_eq!(data[[0, 0]], 150.0);
    assert_eq!(data[[0, 1]], 151.0);

    recorder.wait_for_count(CameraEvent::ExposureDone, 1).await;
    assert_eq!(recorder.count(CameraEvent::ExposureIntegrating), 2);
}

#[tokio::test]
async fn test_stacked_exposure_mean_and_max() {
    let dir = tempfile::tempdir().unwrap();
    let (collection, backend, _recorder) = collection_with_cam1(dir.path(), |_| {});
    let (camera, _driver) = connected_cam1(&collection, &backend).await;

    let mean = camera
        .expose(
            0.0,
            ExposeOptions::default()
                .stack(3)
                .stack_function(StackFunction::Mean),
        )
        .await
        .unwrap();
    let Some(PixelData::F32(data)) = &mean.data else {
        panic!("expected f32 data");
    };
    assert_eq!(data[[0, 0]], 200.0);

    // Frames 4 and 5.
    let max = camera
        .expose(
            0.0,
            ExposeOptions::default()
                .stack(2)
                .stack_function(StackFunction::Max),
        )
        .await
        .unwrap();
    let Some(PixelData::F32(data)) = &max.data else {
        panic!("expected f32 data");
    };
    assert_eq!(data[[0, 0]], 500.0);
}

#[tokio::test]
async fn test_single_frame_keeps_raw_pixels() {
    let dir = tempfile::tempdir().unwrap();
    let (collection, backend, _recorder) = collection_with_cam1(dir.path(), |_| {});
    let (camera, _driver) = connected_cam1(&collection, &backend).await;

    let exposure = camera.dark(0.0).await.unwrap();
    assert_eq!(exposure.stack_function, None);
    assert_eq!(exposure.image_type, ImageType::Dark);
    match &exposure.data {
        Some(PixelData::U16(data)) => assert_eq!(data[[2, 3]], 105),
        other => panic!("expected raw u16 data, got {other:?}"),
    }
}

#[tokio::test]
async fn test_capture_failures() {
    let dir = tempfile::tempdir().unwrap();
    let (collection, backend, recorder) = collection_with_cam1(dir.path(), |_| {});
    let (camera, driver) = connected_cam1(&collection, &backend).await;

    driver.set_faults(SimulatedFaults {
        fail_expose: true,
        ..Default::default()
    });
    let err = camera.object(0.0).await.unwrap_err();
    assert!(matches!(err, CameraError::Capture { .. }));
    assert!(err.to_string().contains("readout timed out"));

    driver.set_faults(SimulatedFaults {
        no_data: true,
        ..Default::default()
    });
    let err = camera.object(0.0).await.unwrap_err();
    assert!(err.to_string().contains("data was not taken"));

    recorder.wait_for_count(CameraEvent::ExposureFailed, 2).await;
    assert_eq!(recorder.count(CameraEvent::ExposureDone), 0);
}

#[tokio::test]
async fn test_expose_requires_connection() {
    let dir = tempfile::tempdir().unwrap();
    let (collection, backend, _recorder) =
        collection_with_cam1(dir.path(), |cam1| cam1.autoconnect = Some(false));
    let (camera, driver) = connected_cam1(&collection, &backend).await;

    let err = camera.object(0.0).await.unwrap_err();
    assert!(matches!(err, CameraError::Capture { .. }));
    assert_eq!(driver.frame_count().await, 0);
}

#[tokio::test]
async fn test_post_process_failure() {
    let dir = tempfile::tempdir().unwrap();
    let (collection, backend, recorder) = collection_with_cam1(dir.path(), |_| {});
    let (camera, driver) = connected_cam1(&collection, &backend).await;

    driver.set_faults(SimulatedFaults {
        fail_post_process: true,
        ..Default::default()
    });
    let err = camera
        .expose(0.0, ExposeOptions::default().postprocess(true).write(true))
        .await
        .unwrap_err();
    assert!(matches!(err, CameraError::Capture { .. }));

    recorder
        .wait_for_count(CameraEvent::ExposurePostProcessFailed, 1)
        .await;
    assert_eq!(recorder.count(CameraEvent::ExposurePostProcessing), 1);
    assert_eq!(recorder.count(CameraEvent::ExposurePostProcessDone), 0);
    assert_eq!(recorder.count(CameraEvent::ExposureWriting), 0);
    assert!(!dir.path().join("cam1-0001.fits").exists());
}

#[tokio::test]
async fn test_write_exposure_to_disk() {
    let dir = tempfile::tempdir().unwrap();
    let (collection, backend, recorder) = collection_with_cam1(dir.path(), |_| {});
    let (camera, _driver) = connected_cam1(&collection, &backend).await;

    let first = camera
        .expose(0.0, ExposeOptions::default().write(true))
        .await
        .unwrap();
    let path = first.path.clone().unwrap();
    assert_eq!(path, dir.path().join("cam1-0001.fits"));

    let bytes = std::fs::read(&path).unwrap();
    assert_eq!(bytes.len() % 2880, 0);
    assert!(bytes.starts_with(b"SIMPLE  ="));

    recorder.wait_for_count(CameraEvent::ExposureWritten, 1).await;
    let written = recorder.payloads(CameraEvent::ExposureWritten);
    assert_eq!(
        written[0].get_str("filename"),
        Some(path.display().to_string().as_str())
    );

    let second = camera
        .expose(0.0, ExposeOptions::default().write(true))
        .await
        .unwrap();
    assert_eq!(
        second.path.unwrap().file_name().unwrap(),
        "cam1-0002.fits"
    );
}

#[tokio::test]
async fn test_write_refuses_to_overwrite() {
    let dir = tempfile::tempdir().unwrap();
    let (collection, backend, recorder) = collection_with_cam1(dir.path(), |_| {});
    let (camera, _driver) = connected_cam1(&collection, &backend).await;

    let target = dir.path().join("taken.fits");
    std::fs::write(&target, b"keep me").unwrap();

    let err = camera
        .expose(
            0.0,
            ExposeOptions::default().output_path(&target).write(true),
        )
        .await
        .unwrap_err();
    assert!(matches!(err, CameraError::Write(_)));
    assert_eq!(std::fs::read(&target).unwrap(), b"keep me");

    recorder.wait_for_count(CameraEvent::ExposureFailed, 1).await;
    assert_eq!(recorder.count(CameraEvent::ExposureWritten), 0);
}

#[tokio::test]
async fn test_write_can_overwrite_when_configured() {
    let dir = tempfile::tempdir().unwrap();
    let (collection, backend, _recorder) =
        collection_with_cam1(dir.path(), |cam1| cam1.write.overwrite = true);
    let (camera, _driver) = connected_cam1(&collection, &backend).await;

    let target = dir.path().join("taken.fits");
    std::fs::write(&target, b"old").unwrap();

    camera
        .expose(
            0.0,
            ExposeOptions::default().output_path(&target).write(true),
        )
        .await
        .unwrap();
    assert!(std::fs::read(&target).unwrap().starts_with(b"SIMPLE"));
}

/// Leaves a truncated file behind on its first `failures` calls.
struct PartialWriteRenderer {
    failures: usize,
    calls: AtomicUsize,
}

impl ExposureRenderer for PartialWriteRenderer {
    fn write(&self, exposure: &Exposure, path: &Path, checksum: bool) -> anyhow::Result<()> {
        if self.calls.fetch_add(1, Ordering::SeqCst) < self.failures {
            std::fs::write(path, b"SIMPLE  =                    T")?;
            anyhow::bail!("disk full");
        }
        FitsRenderer.write(exposure, path, checksum)
    }
}

async fn camera_with_renderer(
    dir: &Path,
    renderer: Arc<PartialWriteRenderer>,
) -> (Arc<Camera>, Recorder) {
    let notifier = Arc::new(Notifier::new());
    let listener = Listener::new();
    notifier.register_listener(&listener).unwrap();
    let recorder = Recorder::attach(&listener);

    let driver: Arc<dyn CameraDriver> = Arc::new(SimulatedCamera::with_resolution("U1", 32, 24));
    let camera = Camera::builder(camera_config("cam1", "U1", dir), driver, notifier)
        .renderer(renderer)
        .build();
    camera.connect(false, &Map::new()).await.unwrap();
    (camera, recorder)
}

fn files_in(dir: &Path) -> Vec<String> {
    let mut names: Vec<String> = std::fs::read_dir(dir)
        .unwrap()
        .map(|entry| entry.unwrap().file_name().to_string_lossy().into_owned())
        .collect();
    names.sort();
    names
}

#[tokio::test]
async fn test_write_retry_after_partial_file() {
    let dir = tempfile::tempdir().unwrap();
    let renderer = Arc::new(PartialWriteRenderer {
        failures: 1,
        calls: AtomicUsize::new(0),
    });
    let (camera, recorder) = camera_with_renderer(dir.path(), renderer.clone()).await;

    let exposure = camera
        .expose(0.0, ExposeOptions::default().write(true))
        .await
        .unwrap();
    assert_eq!(renderer.calls.load(Ordering::SeqCst), 2);
    assert_eq!(exposure.path.unwrap(), dir.path().join("cam1-0001.fits"));
    assert_eq!(files_in(dir.path()), vec!["cam1-0001.fits"]);
    let bytes = std::fs::read(dir.path().join("cam1-0001.fits")).unwrap();
    assert_eq!(bytes.len() % 2880, 0);

    recorder.wait_for_count(CameraEvent::ExposureWritten, 1).await;
    assert_eq!(recorder.count(CameraEvent::ExposureFailed), 0);
}

#[tokio::test]
async fn test_write_fails_after_second_partial_file() {
    let dir = tempfile::tempdir().unwrap();
    let renderer = Arc::new(PartialWriteRenderer {
        failures: 2,
        calls: AtomicUsize::new(0),
    });
    let (camera, recorder) = camera_with_renderer(dir.path(), renderer.clone()).await;

    let err = camera
        .expose(0.0, ExposeOptions::default().write(true))
        .await
        .unwrap_err();
    assert!(matches!(err, CameraError::Write(_)));
    assert!(err.to_string().contains("disk full"));
    assert_eq!(renderer.calls.load(Ordering::SeqCst), 2);
    assert!(files_in(dir.path()).is_empty());

    recorder.wait_for_count(CameraEvent::ExposureFailed, 1).await;
    assert_eq!(recorder.count(CameraEvent::ExposureWritten), 0);

    // Nothing was left behind, so the next exposure reuses the same number.
    renderer.calls.store(2, Ordering::SeqCst);
    let exposure = camera
        .expose(0.0, ExposeOptions::default().write(true))
        .await
        .unwrap();
    assert_eq!(exposure.path.unwrap(), dir.path().join("cam1-0001.fits"));
}

// =============================================================================
// Capabilities
// =============================================================================

#[tokio::test]
async fn test_capability_discovery() {
    let dir = tempfile::tempdir().unwrap();
    let (collection, backend, _recorder) = collection_with_cam1(dir.path(), |_| {});
    let (camera, _driver) = connected_cam1(&collection, &backend).await;

    assert_eq!(
        camera.capabilities(),
        vec![Capability::Cooler, Capability::ImageArea]
    );
    assert!(!camera.has_capability(Capability::Shutter));
    let err = camera.open_shutter().await.unwrap_err();
    assert!(matches!(err, CameraError::Unsupported { .. }));
}

#[tokio::test]
async fn test_shutter_moves_only_when_needed() {
    let dir = tempfile::tempdir().unwrap();
    let (collection, backend, _recorder) =
        collection_with_cam1(dir.path(), |cam1| cam1.shutter = true);
    let (camera, driver) = connected_cam1(&collection, &backend).await;
    assert!(camera.has_capability(Capability::Shutter));

    assert!(camera.open_shutter().await.unwrap());
    assert!(camera.open_shutter().await.unwrap());
    assert_eq!(driver.shutter_moves().await, 1);

    camera.set_shutter(true, true).await.unwrap();
    assert_eq!(driver.shutter_moves().await, 2);

    assert!(!camera.close_shutter().await.unwrap());
    assert!(!camera.get_shutter().await.unwrap());
    assert_eq!(driver.shutter_moves().await, 3);
}

#[tokio::test]
async fn test_auto_shutter_for_illuminated_frames() {
    let dir = tempfile::tempdir().unwrap();
    let (collection, backend, _recorder) = collection_with_cam1(dir.path(), |cam1| {
        cam1.shutter = true;
        cam1.auto_shutter = true;
    });
    let (camera, driver) = connected_cam1(&collection, &backend).await;

    camera.dark(0.0).await.unwrap();
    assert_eq!(driver.shutter_moves().await, 0);

    camera.flat(0.0).await.unwrap();
    assert_eq!(driver.shutter_moves().await, 2);
    assert!(!camera.get_shutter().await.unwrap());
}

#[tokio::test]
async fn test_image_area_and_binning() {
    let dir = tempfile::tempdir().unwrap();
    let (collection, backend, _recorder) = collection_with_cam1(dir.path(), |_| {});
    let (camera, _driver) = connected_cam1(&collection, &backend).await;

    assert_eq!(camera.get_image_area().await.unwrap(), ImageArea::full(32, 24));
    assert_eq!(camera.get_binning().await.unwrap(), Binning::new(1, 1));

    camera
        .set_image_area(Some(ImageArea::new(1, 16, 1, 8)))
        .await
        .unwrap();
    let windowed = camera.object(0.0).await.unwrap();
    assert_eq!(windowed.data.unwrap().shape(), (8, 16));

    camera.set_binning(2, None).await.unwrap();
    assert_eq!(camera.get_binning().await.unwrap(), Binning::new(2, 2));
    let binned = camera.object(0.0).await.unwrap();
    assert_eq!(binned.data.unwrap().shape(), (4, 8));

    camera.set_image_area(None).await.unwrap();
    assert_eq!(camera.get_image_area().await.unwrap(), ImageArea::full(32, 24));

    let err = camera
        .set_image_area(Some(ImageArea::new(0, 10, 1, 10)))
        .await
        .unwrap_err();
    assert!(matches!(err, CameraError::Configuration(_)));

    let err = camera
        .set_image_area(Some(ImageArea::new(1, 64, 1, 10)))
        .await
        .unwrap_err();
    assert!(matches!(err, CameraError::Device { .. }));

    assert!(camera.set_binning(0, Some(1)).await.is_err());
}

#[tokio::test(start_paused = true)]
async fn test_set_temperature_reaches_set_point() {
    let backend = small_backend(["U1"]);
    let collection = CameraCollection::new(backend, None);
    let recorder = Recorder::attach(&collection.subscribe().unwrap());
    let camera = collection
        .add_camera(CameraQuery::uid("U1"), AddCameraOptions::default())
        .await
        .unwrap();

    let outcome = camera.set_temperature(-10.0).await.unwrap();
    assert_eq!(outcome, SetPointOutcome::Reached);
    assert_eq!(camera.get_temperature().await.unwrap(), -10.0);

    recorder.wait_for_count(CameraEvent::SetPointReached, 1).await;
    assert_eq!(recorder.count(CameraEvent::NewSetPoint), 1);
}

#[tokio::test(start_paused = true)]
async fn test_newer_set_point_supersedes_older() {
    let backend = small_backend(["U1"]);
    let collection = CameraCollection::new(backend, None);
    let recorder = Recorder::attach(&collection.subscribe().unwrap());
    let camera = collection
        .add_camera(CameraQuery::uid("U1"), AddCameraOptions::default())
        .await
        .unwrap();

    let first = {
        let camera = Arc::clone(&camera);
        tokio::spawn(async move { camera.set_temperature(-10.0).await })
    };
    tokio::time::sleep(Duration::from_millis(10)).await;

    let second = camera.set_temperature(-20.0).await.unwrap();
    assert_eq!(second, SetPointOutcome::Reached);
    assert_eq!(first.await.unwrap().unwrap(), SetPointOutcome::Superseded);

    recorder.wait_for_count(CameraEvent::SetPointReached, 1).await;
    tokio::time::sleep(Duration::from_secs(2)).await;

    let reached = recorder.payloads(CameraEvent::SetPointReached);
    assert_eq!(reached.len(), 1);
    assert_eq!(reached[0].get("temperature"), Some(&Value::from(-20.0)));
    assert_eq!(recorder.count(CameraEvent::NewSetPoint), 2);
}

#[tokio::test(start_paused = true)]
async fn test_disconnect_cancels_set_point_wait() {
    let backend = small_backend(["U1"]);
    let collection = CameraCollection::new(backend, None);
    let camera = collection
        .add_camera(CameraQuery::uid("U1"), AddCameraOptions::default())
        .await
        .unwrap();

    let pending = {
        let camera = Arc::clone(&camera);
        tokio::spawn(async move { camera.set_temperature(-30.0).await })
    };
    tokio::time::sleep(Duration::from_millis(10)).await;

    camera.disconnect().await.unwrap();
    assert_eq!(pending.await.unwrap().unwrap(), SetPointOutcome::Superseded);

    let err = camera.set_temperature(-30.0).await.unwrap_err();
    assert!(matches!(err, CameraError::Connection { .. }));
}
