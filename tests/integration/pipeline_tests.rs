//! Pipeline integration tests.
//!
//! Tests for:
//! - Arrival order through several stages
//! - Backpressure from a slow store
//! - End-of-stream propagation, including empty acquisitions
//! - Cooperative stop keeping every image taken from the source
//! - Panicking processors and storage exhaustion

use std::sync::atomic::Ordering;
use std::sync::Arc;
use std::time::Duration;

use acq_pipeline::{
    Acquisition, Coordinate, FrameAverager, ImageStore, Mirror, PipelineError, PipelineOptions,
    Processor, ProcessorChain, RamStore, StoreError, TaggedImage, AVERAGED_FRAMES_TAG,
};

use super::test_utils::{grid, make_image, summary, GatedStore, ScriptedSource};

/// Guards every test against a deadlocked pipeline.
const DEADLINE: Duration = Duration::from_secs(10);

struct PassThrough(&'static str);

impl Processor for PassThrough {
    fn name(&self) -> &str {
        self.0
    }

    fn process(&mut self, image: TaggedImage) -> Result<Vec<TaggedImage>, PipelineError> {
        Ok(vec![image])
    }
}

struct PanicOnFrame(u32);

impl Processor for PanicOnFrame {
    fn name(&self) -> &str {
        "panic-on-frame"
    }

    fn process(&mut self, image: TaggedImage) -> Result<Vec<TaggedImage>, PipelineError> {
        if image.coords().frame == self.0 {
            panic!("cannot process frame {}", self.0);
        }
        Ok(vec![image])
    }
}

// =============================================================================
// Ordering
// =============================================================================

#[tokio::test]
async fn test_images_arrive_in_production_order() {
    let coords = grid(2, 2, 5, 1);
    let store = Arc::new(GatedStore::new(summary(2, 2, 5, 1)));
    store.open_gate();

    let chain = ProcessorChain::new()
        .with(PassThrough("first"))
        .with(PassThrough("second"))
        .with(PassThrough("third"));
    let acquisition = Acquisition::start(
        Box::new(ScriptedSource::from_coords(&coords)),
        chain,
        store.clone(),
        PipelineOptions::default(),
    );
    let report = tokio::time::timeout(DEADLINE, acquisition.wait())
        .await
        .unwrap()
        .unwrap();

    assert!(report.is_complete());
    assert_eq!(store.arrivals(), coords);
    for stage in &report.stages {
        assert_eq!(stage.received, coords.len() as u64);
        assert_eq!(stage.emitted, coords.len() as u64);
    }
}

// =============================================================================
// Backpressure
// =============================================================================

#[tokio::test]
async fn test_slow_store_blocks_producer() {
    let coords = grid(1, 1, 20, 1);
    let store = Arc::new(GatedStore::new(summary(1, 1, 20, 1)));
    let source = ScriptedSource::from_coords(&coords);
    let popped = source.popped();

    let acquisition = Acquisition::start(
        Box::new(source),
        ProcessorChain::new(),
        store.clone(),
        PipelineOptions {
            queue_capacity: 1,
            ..PipelineOptions::default()
        },
    );

    tokio::time::sleep(Duration::from_millis(200)).await;
    // One image held by the sink, one queued, one waiting in the producer.
    assert!(popped.load(Ordering::SeqCst) <= 3);
    assert!(store.arrivals().is_empty());

    store.open_gate();
    let report = tokio::time::timeout(DEADLINE, acquisition.wait())
        .await
        .unwrap()
        .unwrap();

    assert_eq!(report.producer.produced, 20);
    assert_eq!(report.sink.stored, 20);
    assert_eq!(store.arrivals(), coords);
}

// =============================================================================
// End of Stream
// =============================================================================

#[tokio::test]
async fn test_end_of_stream_reaches_sink_through_every_stage() {
    let coords = grid(1, 3, 1, 1);
    let store = Arc::new(RamStore::new(summary(1, 3, 1, 1)));
    let chain = ProcessorChain::new()
        .with(Mirror::new())
        .with(PassThrough("middle"))
        .with(Mirror::new());

    let report = tokio::time::timeout(
        DEADLINE,
        Acquisition::start(
            Box::new(ScriptedSource::from_coords(&coords)),
            chain,
            store.clone(),
            PipelineOptions::default(),
        )
        .wait(),
    )
    .await
    .unwrap()
    .unwrap();

    assert!(report.sink.end_of_stream);
    assert!(report.sink.finished);
    assert!(report.stages.iter().all(|s| !s.downstream_closed));

    // Two flips restore the original pixels.
    for c in &coords {
        let stored = store.get_image(c).unwrap().unwrap();
        assert_eq!(stored.pixels(), make_image(*c).pixels());
    }
}

#[tokio::test]
async fn test_empty_acquisition_still_finishes_store() {
    let store = Arc::new(RamStore::new(summary(1, 1, 1, 1)));
    let report = tokio::time::timeout(
        DEADLINE,
        Acquisition::start(
            Box::new(ScriptedSource::new(Vec::new())),
            ProcessorChain::new().with(Mirror::new()),
            store.clone(),
            PipelineOptions::default(),
        )
        .wait(),
    )
    .await
    .unwrap()
    .unwrap();

    assert_eq!(report.producer.produced, 0);
    assert_eq!(report.stages[0].received, 0);
    assert!(report.sink.end_of_stream);
    assert!(store.is_finished());
}

#[tokio::test]
async fn test_disabled_processor_is_skipped() {
    let coords = grid(1, 1, 3, 1);
    let store = Arc::new(RamStore::new(summary(1, 1, 3, 1)));
    let report = Acquisition::start(
        Box::new(ScriptedSource::from_coords(&coords)),
        ProcessorChain::new().with(Mirror::enabled(false)).with(PassThrough("only")),
        store.clone(),
        PipelineOptions::default(),
    )
    .wait()
    .await
    .unwrap();

    assert_eq!(report.stages.len(), 1);
    assert_eq!(report.stages[0].name, "only");
    let stored = store.get_image(&coords[0]).unwrap().unwrap();
    assert_eq!(stored.pixels(), make_image(coords[0]).pixels());
}

#[tokio::test]
async fn test_averager_flushes_partial_group_at_end_of_stream() {
    let coords = grid(1, 1, 5, 1);
    let store = Arc::new(RamStore::new(summary(1, 1, 3, 1)));
    let report = Acquisition::start(
        Box::new(ScriptedSource::from_coords(&coords)),
        ProcessorChain::new().with(FrameAverager::new(2)),
        store.clone(),
        PipelineOptions::default(),
    )
    .wait()
    .await
    .unwrap();

    assert_eq!(report.sink.stored, 3);
    let last = store.get_image(&Coordinate::new(0, 0, 2, 0)).unwrap().unwrap();
    assert_eq!(last.tags().get_i64(AVERAGED_FRAMES_TAG).unwrap(), 1);
    assert_eq!(last.pixels(), make_image(coords[4]).pixels());
}

// =============================================================================
// Cooperative Stop
// =============================================================================

#[tokio::test]
async fn test_stop_keeps_every_image_taken_from_source() {
    let coords = grid(1, 1, 10, 1);
    let store = Arc::new(RamStore::new(summary(1, 1, 10, 1)));
    let source = ScriptedSource::from_coords(&coords).with_delay(Duration::from_millis(200));
    let popped = source.popped();
    let options = PipelineOptions {
        poll_interval: Duration::from_millis(10),
        ..PipelineOptions::default()
    };

    let acquisition = Acquisition::start(
        Box::new(source),
        ProcessorChain::new().with(Mirror::new()).with(PassThrough("after")),
        store.clone(),
        options,
    );
    // The producer is inside the slow pop when the stop arrives.
    tokio::time::sleep(Duration::from_millis(300)).await;
    acquisition.stop();
    let report = tokio::time::timeout(DEADLINE, acquisition.wait())
        .await
        .unwrap()
        .unwrap();

    let popped = popped.load(Ordering::SeqCst) as u64;
    assert!(popped >= 2);
    assert!(popped < coords.len() as u64);
    assert!(report.producer.stopped);
    assert_eq!(report.producer.dropped, 0);
    assert_eq!(report.producer.produced, popped);
    assert!(report.stages.iter().all(|s| s.discarded == 0 && s.emitted == popped));
    assert_eq!(report.sink.stored, popped);
    assert_eq!(store.image_keys(), coords[..popped as usize].to_vec());
    assert!(store.is_finished());
}

// =============================================================================
// Failures
// =============================================================================

#[tokio::test]
async fn test_panicking_stage_stops_without_deadlock() {
    let coords = grid(1, 1, 10, 1);
    let store = Arc::new(RamStore::new(summary(1, 1, 10, 1)));

    let acquisition = Acquisition::start(
        Box::new(ScriptedSource::from_coords(&coords)),
        ProcessorChain::new().with(PanicOnFrame(3)).with(PassThrough("after")),
        store.clone(),
        PipelineOptions::default(),
    );
    let stop = acquisition.stop_flag();
    let report = tokio::time::timeout(DEADLINE, acquisition.wait())
        .await
        .unwrap()
        .unwrap();

    assert!(stop.is_stopped());
    assert!(report.stages[0].panicked);
    assert!(!report.stages[1].panicked);
    assert!(report.sink.end_of_stream);
    assert_eq!(report.sink.stored, 3);
    assert!(store.is_finished());
    assert!(!report.is_complete());
}

#[tokio::test]
async fn test_storage_full_stops_acquisition() {
    let coords = grid(1, 1, 10, 1);
    let bytes_per_image = summary(1, 1, 1, 1).bytes_per_image();
    let store = Arc::new(RamStore::new(summary(1, 1, 10, 1)).with_budget(bytes_per_image * 4));
    let source = ScriptedSource::from_coords(&coords);
    let popped = source.popped();

    let (tx, mut rx) = tokio::sync::mpsc::unbounded_channel();
    let acquisition = Acquisition::start_with(
        Box::new(source),
        ProcessorChain::new().with(PassThrough("stage")),
        store.clone(),
        PipelineOptions::default(),
        Some(Box::new(move |err: &StoreError| {
            let _ = tx.send(err.to_string());
        })),
    );
    let report = tokio::time::timeout(DEADLINE, acquisition.wait())
        .await
        .unwrap()
        .unwrap();

    assert!(report.sink.storage_full);
    assert_eq!(report.sink.stored, 4);
    assert!(rx.recv().await.is_some());
    assert!(rx.try_recv().is_err());
    assert!(popped.load(Ordering::SeqCst) < coords.len());
    assert_eq!(store.image_count(), 4);
    assert!(store.is_finished());
}
