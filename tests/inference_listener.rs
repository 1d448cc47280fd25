use std::sync::Arc;
use std::time::{Duration, Instant};

use crossbeam_channel::{unbounded, Receiver, Sender};
use image::RgbImage;

use nano_ha_bridge::detect::{Keypoint, Pose, StubBackend, StubResponse};
use nano_ha_bridge::{
    BoardInfo, BridgeError, Detection, DeviceContext, DeviceInfo, Dispatch, Frame,
    InferenceAdapter, InferenceBackend, InferenceListener, ListenerSettings, MemoryBus, ModelKind,
    ModelSpec, SnapshotEncoder, SnapshotFormat, TopicScheme, Worker, WorkerState,
};

const COMMAND_TOPIC: &str = "jetson/text/jetson_inference_porch/text/cmd";
const LABEL_TOPIC: &str = "jetson/text/jetson_inference_porch/text/state";
const PICTURE_TOPIC: &str = "jetson/camera/jetson_inference_camera_porch/camera";

fn context() -> DeviceContext {
    DeviceContext::new(
        DeviceInfo::from_board("nano", &BoardInfo::default()),
        TopicScheme::default(),
    )
}

fn jpeg_request() -> Vec<u8> {
    let image = RgbImage::from_fn(48, 32, |x, y| image::Rgb([x as u8 * 4, y as u8 * 6, 120]));
    SnapshotEncoder::default()
        .encode_rgb(&image, SnapshotFormat::Jpeg)
        .unwrap()
        .into_bytes()
}

fn listener(
    bus: Arc<MemoryBus>,
    kind: ModelKind,
    backend: Box<dyn InferenceBackend>,
    dispatch: Dispatch,
) -> InferenceListener {
    let spec = ModelSpec::new(kind, "stub-net");
    let adapter = InferenceAdapter::new(&spec, backend).unwrap();
    InferenceListener::new(
        ListenerSettings::new("porch", spec).with_dispatch(dispatch),
        bus,
        context(),
    )
    .with_adapter(adapter)
}

fn wait_until(what: &str, mut done: impl FnMut() -> bool) {
    let deadline = Instant::now() + Duration::from_secs(5);
    while !done() {
        assert!(Instant::now() < deadline, "timed out waiting for {}", what);
        std::thread::sleep(Duration::from_millis(5));
    }
}

/// Detector that blocks inside every call until released.
struct GatedBackend {
    entered: Sender<()>,
    release: Receiver<()>,
}

impl InferenceBackend for GatedBackend {
    fn name(&self) -> &'static str {
        "gated"
    }

    fn supports(&self, kind: ModelKind) -> bool {
        kind == ModelKind::Detector
    }

    fn detect(&mut self, _frame: &Frame, _threshold: f32) -> anyhow::Result<Vec<Detection>> {
        let _ = self.entered.send(());
        let _ = self.release.recv();
        Ok(Vec::new())
    }
}

#[test]
fn empty_detection_publishes_none_label_without_picture() {
    let bus = Arc::new(MemoryBus::new());
    let mut worker = listener(
        bus.clone(),
        ModelKind::Detector,
        Box::new(StubBackend::new()),
        Dispatch::default(),
    );
    worker.initialize().unwrap();
    worker.start().unwrap();
    assert_eq!(bus.subscriptions(), vec![COMMAND_TOPIC.to_string()]);

    assert_eq!(bus.inject(COMMAND_TOPIC, &jpeg_request()).unwrap(), 1);
    wait_until("label", || bus.last_payload(LABEL_TOPIC).is_some());
    assert_eq!(bus.last_payload(LABEL_TOPIC), Some(b"None".to_vec()));
    assert!(bus.published_to(PICTURE_TOPIC).is_empty());
    worker.close().unwrap();
}

#[test]
fn pose_reply_carries_count_and_annotated_picture() {
    let bus = Arc::new(MemoryBus::new());
    let backend = StubBackend::new();
    backend.script().push(StubResponse::Poses(vec![Pose {
        keypoints: vec![
            Keypoint { id: 0, x: 10.0, y: 8.0 },
            Keypoint { id: 1, x: 20.0, y: 24.0 },
        ],
        links: vec![(0, 1)],
    }]));
    let mut worker = listener(
        bus.clone(),
        ModelKind::PoseEstimator,
        Box::new(backend),
        Dispatch::Inline,
    );
    worker.initialize().unwrap();
    worker.start().unwrap();

    bus.inject(COMMAND_TOPIC, &jpeg_request()).unwrap();
    assert_eq!(bus.last_payload(LABEL_TOPIC), Some(b"1".to_vec()));
    assert_eq!(bus.published_to(PICTURE_TOPIC).len(), 1);
    worker.close().unwrap();
}

#[test]
fn full_queue_rejects_with_backpressure() {
    let bus = Arc::new(MemoryBus::new());
    let (entered_tx, entered_rx) = unbounded();
    let (release_tx, release_rx) = unbounded();
    let backend = GatedBackend {
        entered: entered_tx,
        release: release_rx,
    };
    let mut worker = listener(
        bus.clone(),
        ModelKind::Detector,
        Box::new(backend),
        Dispatch::Queued { capacity: 1 },
    );
    worker.initialize().unwrap();
    worker.start().unwrap();

    let request = jpeg_request();
    bus.inject(COMMAND_TOPIC, &request).unwrap();
    entered_rx.recv_timeout(Duration::from_secs(5)).unwrap();
    // One request in flight, one queued, the third is rejected.
    bus.inject(COMMAND_TOPIC, &request).unwrap();
    assert!(matches!(
        bus.inject(COMMAND_TOPIC, &request),
        Err(BridgeError::Backpressure(_))
    ));

    release_tx.send(()).unwrap();
    release_tx.send(()).unwrap();
    wait_until("both replies", || bus.published_to(LABEL_TOPIC).len() == 2);
    worker.stop().unwrap();
    assert_eq!(worker.state(), WorkerState::Stopped);
}

#[test]
fn no_requests_are_handled_after_stop() {
    let bus = Arc::new(MemoryBus::new());
    let mut worker = listener(
        bus.clone(),
        ModelKind::Detector,
        Box::new(StubBackend::new()),
        Dispatch::Inline,
    );
    worker.initialize().unwrap();
    worker.start().unwrap();
    worker.stop().unwrap();

    assert!(bus.subscriptions().is_empty());
    assert_eq!(bus.callback_count(), 0);
    assert_eq!(bus.inject(COMMAND_TOPIC, &jpeg_request()).unwrap(), 0);
    assert!(bus.published_to(LABEL_TOPIC).is_empty());
    assert!(matches!(worker.stop(), Err(BridgeError::NotRunning(_))));

    // Restart resubscribes.
    worker.start().unwrap();
    assert_eq!(bus.inject(COMMAND_TOPIC, &jpeg_request()).unwrap(), 1);
    assert_eq!(bus.last_payload(LABEL_TOPIC), Some(b"None".to_vec()));

    worker.close().unwrap();
    assert_eq!(worker.state(), WorkerState::Closed);
    assert!(bus
        .published_to("homeassistant/text/jetson_inference_porch/config")
        .last()
        .is_some_and(|m| m.payload.is_empty()));
}
