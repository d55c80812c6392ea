//! Lineage Environment Abstraction Layer
//!
//! This crate provides the seams between the correction engine in
//! `lineage_core` and the world it runs in:
//!
//! - **Label volumes**: the segmentation output, sampled read-only
//! - **Progress**: a fire-and-forget log/progress sink
//! - **Work**: a bounded worker pool with a best-effort completion timeout
//!
//! The engine never touches images, GUIs or threads directly; a host
//! (CLI, batch script, simulation harness) plugs concrete implementations in.
//!
//! # Example
//!
//! ```ignore
//! use lineage_env::{DenseLabelVolume, TracingProgress, WorkerPool};
//!
//! let mut volume = DenseLabelVolume::new([64, 64, 1], 10);
//! volume.paint_ellipse(0, [32.0, 32.0], [6.0, 3.0], 0.4, 7);
//! let pool = WorkerPool::with_available_parallelism();
//! let outcome = pool.execute_all("warmup", vec![|| ()]);
//! assert!(!outcome.timed_out);
//! ```

mod volume;
mod dense;
mod progress;
mod pool;
mod types;
mod error;

pub use volume::LabelVolume;
pub use dense::DenseLabelVolume;
pub use progress::{ProgressSink, TracingProgress, NullProgress};
pub use pool::{WorkerPool, PoolOutcome, DEFAULT_TIMEOUT};
pub use types::{Calibration, Voxel};
pub use error::EnvError;
