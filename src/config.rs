//! Command-line configuration.
//!
//! Every option can also be set through an environment variable with the
//! `ACQ_` prefix:
//!
//! - `ACQ_STORE` - Store kind for `acquire` and `convert` (default: multipage)
//! - `ACQ_OUTPUT` - Output directory
//! - `ACQ_CHANNELS`, `ACQ_SLICES`, `ACQ_FRAMES`, `ACQ_POSITIONS` - Grid size
//! - `ACQ_WIDTH`, `ACQ_HEIGHT`, `ACQ_PIXEL_TYPE` - Image geometry
//! - `ACQ_INTERVAL_MS` - Pause between synthetic frames (default: 0)
//! - `ACQ_QUEUE_CAPACITY` - Capacity of every pipeline queue (default: 1)
//! - `ACQ_MAX_FILE_SIZE` - Container rollover size in bytes (default: 4 GiB)
//! - `ACQ_RAM_BUDGET` - Byte budget of the RAM store (default: unlimited)

use std::path::PathBuf;

use clap::{Args, Parser, Subcommand, ValueEnum};

use crate::format::container::DEFAULT_MAX_FILE_SIZE;
use crate::image::PixelType;
use crate::io::ByteOrder;
use crate::pipeline::DEFAULT_QUEUE_CAPACITY;
use crate::store::DEFAULT_FRONT_CACHE_ENTRIES;

// =============================================================================
// Default Values
// =============================================================================

/// Default image width in pixels.
pub const DEFAULT_WIDTH: u32 = 512;

/// Default image height in pixels.
pub const DEFAULT_HEIGHT: u32 = 512;

/// Default dataset name prefix.
pub const DEFAULT_PREFIX: &str = "acq";

/// Default pause between synthetic frames in milliseconds.
pub const DEFAULT_INTERVAL_MS: u64 = 0;

/// Smallest accepted container size; anything smaller cannot hold a trailer.
pub const MIN_MAX_FILE_SIZE: u64 = 64 * 1024;

/// Largest accepted image edge.
pub const MAX_IMAGE_EDGE: u32 = 16384;

// =============================================================================
// Value Enums
// =============================================================================

/// Which image store to write into.
#[derive(Debug, Clone, Copy, PartialEq, Eq, ValueEnum)]
pub enum StoreKind {
    /// Everything in memory; nothing is persisted.
    Ram,
    /// One TIFF per image plus a metadata.txt sidecar.
    Disk,
    /// Multi-page containers with a trailer index.
    Multipage,
}

/// Pixel layout of synthetic images.
#[derive(Debug, Clone, Copy, PartialEq, Eq, ValueEnum)]
pub enum PixelTypeArg {
    Gray8,
    Gray16,
    Rgb32,
    Rgb64,
}

impl From<PixelTypeArg> for PixelType {
    fn from(arg: PixelTypeArg) -> Self {
        match arg {
            PixelTypeArg::Gray8 => PixelType::Gray8,
            PixelTypeArg::Gray16 => PixelType::Gray16,
            PixelTypeArg::Rgb32 => PixelType::Rgb32,
            PixelTypeArg::Rgb64 => PixelType::Rgb64,
        }
    }
}

/// Byte order of written containers.
#[derive(Debug, Clone, Copy, PartialEq, Eq, ValueEnum)]
pub enum ByteOrderArg {
    Native,
    Little,
    Big,
}

impl From<ByteOrderArg> for ByteOrder {
    fn from(arg: ByteOrderArg) -> Self {
        match arg {
            ByteOrderArg::Native => ByteOrder::native(),
            ByteOrderArg::Little => ByteOrder::LittleEndian,
            ByteOrderArg::Big => ByteOrder::BigEndian,
        }
    }
}

// =============================================================================
// CLI
// =============================================================================

/// Acquisition pipeline for multi-dimensional microscope datasets.
#[derive(Parser, Debug, Clone)]
#[command(name = "acq-pipeline")]
#[command(author, version, about, long_about = None)]
pub struct Cli {
    #[command(subcommand)]
    pub command: Command,
}

impl Cli {
    pub fn into_command(self) -> Command {
        self.command
    }
}

#[derive(Subcommand, Debug, Clone)]
pub enum Command {
    /// Run a synthetic acquisition through the full pipeline.
    Acquire(AcquireConfig),

    /// Print the summary and image list of a dataset.
    Inspect(InspectConfig),

    /// Copy a dataset into another store kind.
    Convert(ConvertConfig),

    /// Rebuild the index map of an interrupted container.
    Repair(RepairConfig),
}

// =============================================================================
// Shared Store Options
// =============================================================================

/// Options for the store written by `acquire` and `convert`.
#[derive(Args, Debug, Clone)]
pub struct StoreArgs {
    /// Kind of store to write.
    #[arg(long, value_enum, default_value_t = StoreKind::Multipage, env = "ACQ_STORE")]
    pub store: StoreKind,

    /// Output directory (ignored by the RAM store).
    #[arg(short, long, env = "ACQ_OUTPUT")]
    pub output: Option<PathBuf>,

    /// Write every position into one file series.
    #[arg(long, default_value_t = false)]
    pub single_series: bool,

    /// Also write a metadata.txt sidecar next to each container series.
    #[arg(long, default_value_t = false)]
    pub metadata_file: bool,

    /// Container size at which a new file is started.
    #[arg(long, default_value_t = DEFAULT_MAX_FILE_SIZE, env = "ACQ_MAX_FILE_SIZE")]
    pub max_file_size: u64,

    /// Byte order of written containers.
    #[arg(long, value_enum, default_value_t = ByteOrderArg::Native)]
    pub byte_order: ByteOrderArg,

    /// Byte budget of the RAM store; exceeding it stops the acquisition.
    #[arg(long, env = "ACQ_RAM_BUDGET")]
    pub ram_budget: Option<u64>,

    /// Entries in the RAM store's front cache.
    #[arg(long, default_value_t = DEFAULT_FRONT_CACHE_ENTRIES)]
    pub front_cache: usize,
}

impl StoreArgs {
    pub fn validate(&self) -> Result<(), String> {
        if self.store != StoreKind::Ram && self.output.is_none() {
            return Err("An output directory is required. Set --output or ACQ_OUTPUT".to_string());
        }
        if self.max_file_size < MIN_MAX_FILE_SIZE || self.max_file_size > DEFAULT_MAX_FILE_SIZE {
            return Err(format!(
                "max_file_size must be between {} and {} bytes",
                MIN_MAX_FILE_SIZE, DEFAULT_MAX_FILE_SIZE
            ));
        }
        if self.front_cache == 0 {
            return Err("front_cache must be greater than 0".to_string());
        }
        if self.ram_budget == Some(0) {
            return Err("ram_budget must be greater than 0".to_string());
        }
        Ok(())
    }
}

// =============================================================================
// Acquire
// =============================================================================

#[derive(Args, Debug, Clone)]
pub struct AcquireConfig {
    #[command(flatten)]
    pub store: StoreArgs,

    /// Dataset name prefix.
    #[arg(long, default_value = DEFAULT_PREFIX, env = "ACQ_PREFIX")]
    pub prefix: String,

    #[arg(long, default_value_t = 1, env = "ACQ_CHANNELS")]
    pub channels: u32,

    #[arg(long, default_value_t = 1, env = "ACQ_SLICES")]
    pub slices: u32,

    #[arg(long, default_value_t = 1, env = "ACQ_FRAMES")]
    pub frames: u32,

    #[arg(long, default_value_t = 1, env = "ACQ_POSITIONS")]
    pub positions: u32,

    #[arg(long, default_value_t = DEFAULT_WIDTH, env = "ACQ_WIDTH")]
    pub width: u32,

    #[arg(long, default_value_t = DEFAULT_HEIGHT, env = "ACQ_HEIGHT")]
    pub height: u32,

    #[arg(long, value_enum, default_value_t = PixelTypeArg::Gray16, env = "ACQ_PIXEL_TYPE")]
    pub pixel_type: PixelTypeArg,

    /// Store all slices of a channel before the next channel.
    #[arg(long, default_value_t = false)]
    pub slices_first: bool,

    /// Store all frames of a position before the next position.
    #[arg(long, default_value_t = false)]
    pub time_first: bool,

    /// Pause between synthetic frames in milliseconds.
    #[arg(long, default_value_t = DEFAULT_INTERVAL_MS, env = "ACQ_INTERVAL_MS")]
    pub interval_ms: u64,

    /// Capacity of every pipeline queue.
    #[arg(long, default_value_t = DEFAULT_QUEUE_CAPACITY, env = "ACQ_QUEUE_CAPACITY")]
    pub queue_capacity: usize,

    /// Flip every image horizontally.
    #[arg(long, default_value_t = false)]
    pub mirror: bool,

    /// Average every N frames into one.
    #[arg(long)]
    pub average: Option<usize>,

    /// Summary comment stored with the dataset.
    #[arg(long)]
    pub comment: Option<String>,

    /// Enable verbose logging (debug level).
    #[arg(short, long, default_value_t = false)]
    pub verbose: bool,
}

impl AcquireConfig {
    pub fn validate(&self) -> Result<(), String> {
        self.store.validate()?;
        if self.channels == 0 || self.slices == 0 || self.frames == 0 || self.positions == 0 {
            return Err("channels, slices, frames and positions must be greater than 0".to_string());
        }
        if self.width == 0 || self.height == 0 {
            return Err("width and height must be greater than 0".to_string());
        }
        if self.width > MAX_IMAGE_EDGE || self.height > MAX_IMAGE_EDGE {
            return Err(format!("width and height must be at most {}", MAX_IMAGE_EDGE));
        }
        if self.queue_capacity == 0 {
            return Err("queue_capacity must be greater than 0".to_string());
        }
        if let Some(frames) = self.average {
            if frames < 2 {
                return Err("average must be at least 2 frames".to_string());
            }
        }
        Ok(())
    }

    /// Total number of images the source will produce.
    pub fn image_count(&self) -> u64 {
        self.channels as u64 * self.slices as u64 * self.frames as u64 * self.positions as u64
    }
}

// =============================================================================
// Inspect
// =============================================================================

#[derive(Args, Debug, Clone)]
pub struct InspectConfig {
    /// Dataset directory or container file.
    pub path: PathBuf,

    /// List every image with its label.
    #[arg(long, default_value_t = false)]
    pub images: bool,

    /// Print the summary metadata as JSON.
    #[arg(long, default_value_t = false)]
    pub json: bool,

    #[arg(short, long, default_value_t = false)]
    pub verbose: bool,
}

// =============================================================================
// Convert
// =============================================================================

#[derive(Args, Debug, Clone)]
pub struct ConvertConfig {
    /// Dataset directory or container file to read.
    pub input: PathBuf,

    #[command(flatten)]
    pub store: StoreArgs,

    #[arg(short, long, default_value_t = false)]
    pub verbose: bool,
}

impl ConvertConfig {
    pub fn validate(&self) -> Result<(), String> {
        self.store.validate()?;
        if self.store.output.as_ref() == Some(&self.input) {
            return Err("output must differ from input".to_string());
        }
        Ok(())
    }
}

// =============================================================================
// Repair
// =============================================================================

#[derive(Args, Debug, Clone)]
pub struct RepairConfig {
    /// Container files to repair in place.
    #[arg(required = true)]
    pub files: Vec<PathBuf>,

    #[arg(short, long, default_value_t = false)]
    pub verbose: bool,
}

// =============================================================================
// Tests
// =============================================================================
