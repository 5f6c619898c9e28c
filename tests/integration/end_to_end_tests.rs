//! End-to-end acquisition tests.
//!
//! A synthetic acquisition runs through a processor chain into each store
//! kind; the dataset is then reopened from disk and compared image by image.

use std::collections::HashSet;
use std::sync::Arc;

use acq_pipeline::{
    open_dataset, Acquisition, Coordinate, DiskStore, ImageCache, ImageSource, ImageStore, Mirror,
    MultipageOptions, MultipageStore, PipelineError, PipelineOptions, Processor, ProcessorChain,
    SyntheticSource, TaggedImage,
};

use super::test_utils::{assert_same_image, summary};

/// Adds a tag naming the stage, so the test can see both stages ran.
struct Stamp;

impl Processor for Stamp {
    fn name(&self) -> &str {
        "stamp"
    }

    fn process(&mut self, image: TaggedImage) -> Result<Vec<TaggedImage>, PipelineError> {
        let tags = image.tags().clone().with("Stamped", true);
        image
            .with_tags(tags)
            .map(|image| vec![image])
            .map_err(|e| PipelineError::StageFailed {
                stage: "stamp".to_string(),
                reason: e.to_string(),
            })
    }
}

/// What the two-stage chain turns a synthetic image into.
fn expected(source: &SyntheticSource, coords: Coordinate) -> TaggedImage {
    let raw = source.image(coords).unwrap();
    let mirrored = raw.with_pixels(Mirror::flip(&raw)).unwrap();
    let tags = mirrored.tags().clone().with("Stamped", true);
    mirrored.with_tags(tags).unwrap()
}

async fn acquire_into(store: Arc<dyn ImageStore>) -> (SyntheticSource, Vec<Coordinate>) {
    let summary = summary(2, 3, 1, 1);
    let reference = SyntheticSource::new(summary.clone());
    let mut coords = Vec::new();
    let mut expected_source = SyntheticSource::new(summary.clone());
    while let Some(image) = expected_source.pop_next().unwrap() {
        coords.push(image.coords());
    }

    let cache: Arc<dyn ImageStore> = Arc::new(ImageCache::new(store));
    let chain = ProcessorChain::new().with(Mirror::new()).with(Stamp);
    let report = Acquisition::start(
        Box::new(SyntheticSource::new(summary)),
        chain,
        cache.clone(),
        PipelineOptions::default(),
    )
    .wait()
    .await
    .unwrap();

    assert!(report.is_complete());
    assert_eq!(report.sink.stored, 6);
    assert!(cache.is_finished());
    cache.close().unwrap();
    (reference, coords)
}

fn assert_reopened(dataset: &dyn ImageStore, source: &SyntheticSource, coords: &[Coordinate]) {
    let keys = dataset.image_keys();
    assert_eq!(keys.len(), 6);
    let labels: HashSet<String> = keys.iter().map(|c| c.label()).collect();
    assert_eq!(labels.len(), 6);
    assert_eq!(keys, coords);

    for c in coords {
        let image = dataset.get_image(c).unwrap().unwrap();
        assert_same_image(&image, &expected(source, *c));
    }
}

#[tokio::test]
async fn test_two_by_three_into_multipage_container() {
    let dir = tempfile::tempdir().unwrap();
    let store = Arc::new(
        MultipageStore::create(dir.path(), summary(2, 3, 1, 1), MultipageOptions::default()).unwrap(),
    );
    let (source, coords) = acquire_into(store.clone()).await;
    assert_eq!(store.files().len(), 1);

    let reopened = MultipageStore::open(dir.path()).unwrap();
    assert_reopened(&reopened, &source, &coords);
}

#[tokio::test]
async fn test_two_by_three_into_disk_store() {
    let dir = tempfile::tempdir().unwrap();
    let store = Arc::new(DiskStore::create(dir.path(), summary(2, 3, 1, 1)).unwrap());
    let (source, coords) = acquire_into(store).await;

    let reopened = open_dataset(dir.path()).unwrap();
    assert_reopened(reopened.as_ref(), &source, &coords);
}
