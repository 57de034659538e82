//! # Shared-Memory Ring Buffers
//!
//! Named, fixed-size circular buffers in shared memory, written by one
//! party and read by another, built for a hard-real-time side that must
//! never block, allocate or lock on the hot path.
//!
//! ## Features
//!
//! - **Three framing disciplines**: records, an unframed byte stream, and
//!   multiframe groups that become visible atomically
//! - **Lock-free SPSC**: `head`/`tail` counters on separate cache lines,
//!   published with release/acquire ordering
//! - **Zero-copy reads**: payloads are borrowed straight from the mapping
//! - **Named registry**: create, attach, delete, list and inspect rings
//!   stored as files on tmpfs
//! - **Advisory ownership**: reader and writer roles with dead-owner reaping
//! - **Opt-in blocking**: shared-memory mutexes for cooperating non-RT
//!   parties only
//!
//! ## Segment Layout
//!
//! ```text
//! ┌──────────────────────┬──────────────┬─────────────────────────────┐
//! │ RingHeader (384 B)   │ Scratchpad   │ Ring bytes (capacity)       │
//! │ magic, descriptor,   │ 64-aligned   │ frames / raw stream bytes   │
//! │ head │ tail │ owners │              │                             │
//! └──────────────────────┴──────────────┴─────────────────────────────┘
//! ```
//!
//! ## Usage Patterns
//!
//! ### Records
//!
//! ```rust,no_run
//! use ring_shm::{RecordRing, RingRegistry, RingSpec};
//! use ring_common::config::RegistryConfig;
//! use ring_common::ring::RingMode;
//!
//! # fn main() -> Result<(), Box<dyn std::error::Error>> {
//! let registry = RingRegistry::new(RegistryConfig::default());
//! let mut writer = RecordRing::new(registry.create("motion.cmd", &RingSpec::new(4096, RingMode::Record))?)?;
//! writer.write_record(b"G1 X10 Y20")?;
//!
//! let mut reader = RecordRing::new(registry.attach("motion.cmd")?)?;
//! if let Some(record) = reader.read_record() {
//!     println!("{} bytes", record.len());
//!     reader.shift_record();
//! }
//! # Ok(())
//! # }
//! ```
//!
//! ### Mode-independent access
//!
//! ```rust,no_run
//! use ring_shm::{FramedRing, RingChannel, RingRegistry};
//! use ring_common::config::RegistryConfig;
//!
//! # fn main() -> Result<(), Box<dyn std::error::Error>> {
//! let registry = RingRegistry::new(RegistryConfig::default());
//! let mut ring = FramedRing::from_ring(registry.attach("motion.feedback")?)?;
//! while let Some(chunk) = ring.read() {
//!     let span = chunk.span();
//!     ring.shift(span)?;
//! }
//! # Ok(())
//! # }
//! ```
//!
//! ## Error Handling
//!
//! All fallible operations return [`RingResult`]. Only
//! [`RingError::RingFull`] is transient:
//!
//! ```rust,no_run
//! use ring_shm::{RecordRing, RingError, RingRegistry};
//! use ring_common::config::RegistryConfig;
//!
//! # fn main() -> Result<(), Box<dyn std::error::Error>> {
//! let registry = RingRegistry::new(RegistryConfig::default());
//! let mut ring = RecordRing::new(registry.attach("motion.cmd")?)?;
//! match ring.write_record(b"payload") {
//!     Ok(()) => {}
//!     Err(e) if e.is_retryable() => { /* try again next cycle */ }
//!     Err(RingError::RecordTooLarge { size, max }) => {
//!         eprintln!("record of {size} bytes can never fit in {max}");
//!     }
//!     Err(e) => return Err(e.into()),
//! }
//! # Ok(())
//! # }
//! ```
//!
//! ## Thread Safety
//!
//! - **Ring handles**: `Send`, one handle per thread; the writer and the
//!   reader each own one
//! - **Multiple writers or readers**: only with `WRITER_MUTEX` /
//!   `READER_MUTEX`, which may block
//! - **RingRegistry**: `Send + Sync`; clones share only a temp-name counter

#![deny(missing_docs)]
#![warn(clippy::all)]

pub mod channel;
pub mod descriptor;
pub mod error;
pub mod frame;
pub mod layout;
mod lock;
pub mod multiframe;
pub mod owner;
pub mod platform;
pub mod record;
pub mod registry;
pub mod ring;
pub mod status;
pub mod stream;

pub use channel::{Availability, Chunk, Delivery, FramedRing, RingChannel};
pub use descriptor::{RingDescriptor, RingFlags, RingName, RingSpec};
pub use error::{RingError, RingResult};
pub use frame::{FRAME_HEADER_SIZE, FrameFlags, FrameHeader, FrameKind};
pub use multiframe::{Frame, FrameGroup, MultiframeRing};
pub use owner::{Owner, Role, current_owner_id};
pub use record::{RecordRing, Records};
pub use registry::RingRegistry;
pub use ring::{ByteView, RingBuffer};
pub use status::{RingStatus, render_report};
pub use stream::StreamRing;

/// Initialize tracing for ring tooling and tests
pub fn init_tracing() {
    use tracing_subscriber::{EnvFilter, fmt};

    let subscriber = fmt::Subscriber::builder()
        .with_env_filter(EnvFilter::from_default_env())
        .with_target(false)
        .with_thread_ids(true)
        .with_line_number(true)
        .finish();

    let _ = tracing::subscriber::set_global_default(subscriber);
}
