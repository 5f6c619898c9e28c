//! # acq-pipeline
//!
//! Acquisition pipeline and storage for multi-dimensional microscope
//! datasets.
//!
//! Images are addressed by a (channel, slice, frame, position)
//! [`Coordinate`] and carry a free-form JSON tag set. They flow from a
//! hardware [`ImageSource`] through a chain of [`Processor`] stages into an
//! [`ImageStore`], without ever being dropped or blocking the thread that
//! drives the hardware.
//!
//! ## Architecture
//!
//! - [`image`] - Coordinates, tag sets, tagged images and dataset metadata
//! - [`io`] - Positioned byte-range reads and memory-mapped files
//! - [`mod@format`] - The multi-page container codec and single-image TIFFs
//! - [`store`] - RAM, disk-per-image and multi-page image stores
//! - [`cache`] - The image cache façade shared by the sink and the display
//! - [`pipeline`] - Queues, processor stages, the sink and acquisition wiring
//! - [`config`] - CLI and configuration types
//!
//! ## Example
//!
//! ```rust,no_run
//! use std::sync::Arc;
//! use acq_pipeline::{
//!     Acquisition, Mirror, MultipageOptions, MultipageStore, PipelineOptions, PixelType,
//!     ProcessorChain, SummaryMetadata, SyntheticSource,
//! };
//!
//! #[tokio::main]
//! async fn main() -> Result<(), Box<dyn std::error::Error>> {
//!     let summary = SummaryMetadata::new(512, 512, PixelType::Gray16).with_dimensions(2, 3, 1, 1);
//!     let store = Arc::new(MultipageStore::create("data", summary.clone(), MultipageOptions::default())?);
//!
//!     let report = Acquisition::start(
//!         Box::new(SyntheticSource::new(summary)),
//!         ProcessorChain::new().with(Mirror::new()),
//!         store,
//!         PipelineOptions::default(),
//!     )
//!     .wait()
//!     .await?;
//!
//!     println!("stored {} images", report.sink.stored);
//!     Ok(())
//! }
//! ```

pub mod cache;
pub mod config;
pub mod error;
pub mod format;
pub mod image;
pub mod io;
pub mod pipeline;
pub mod store;

// Re-export commonly used types
pub use cache::{ChangingKeys, ImageCache, RecentImages, StoreId, DEFAULT_RECENT_IMAGES};
pub use config::{AcquireConfig, Cli, Command, ConvertConfig, InspectConfig, RepairConfig, StoreKind};
pub use error::{ContainerError, IoError, MetadataError, PipelineError, StoreError};
pub use format::container::{repair_index_map, RepairReport};
pub use format::{ContainerReader, ContainerWriter, WriterOptions};
pub use image::{
    keys, AxisOrder, ChannelDisplay, Coordinate, DisplaySettings, PixelType, SummaryMetadata,
    TagSet, TaggedImage,
};
pub use io::{ByteOrder, MappedFile, RangeReader};
pub use pipeline::{
    run_producer, run_stage, sentinel_queue, Acquisition, AcquisitionReport, FrameAverager,
    ImageSource, Mirror, PipelineOptions, PipelineSink, Processor, ProcessorChain, ProducerReport,
    QueueItem, QueueReceiver, QueueSender, SinkReport, StageReport, StopFlag, StorageFullCallback,
    SyntheticSource, AVERAGED_FRAMES_TAG, DEFAULT_POLL_INTERVAL, DEFAULT_QUEUE_CAPACITY,
};
pub use store::{
    open_dataset, DiskStore, FrontCache, ImageStore, MultipageOptions, MultipageStore, RamStore,
    Sidecar, SidecarWriter,
};
