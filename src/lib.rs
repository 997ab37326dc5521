//! This crate implements a device memory suballocator based on the TLSF
//! (Two-Level Segregated Fit) dynamic memory allocation algorithm¹.
//!
//!  - **Allocation and deallocation operations are guaranteed to complete in
//!    constant time** with respect to the number of blocks in a pool.
//!
//!  - **Block headers are kept out of band.** The allocator never reads or
//!    writes the memory it manages, so it works for device memory that the
//!    host can't access.
//!
//!  - **Device memory is obtained in large pools** and sliced into aligned
//!    regions for buffers and images. Requests that don't fit in any existing
//!    pool cause a new pool to be allocated from the device.
//!
//!  - **The core supports `#![no_std]`.** [`Tlsf`] only needs `alloc`, and
//!    the device is accessed through the [`MemoryDevice`] trait. An
//!    implementation for [`ash`](https://crates.io/crates/ash) is provided by
//!    the `ash` feature.
//!
//! <sub>¹ M. Masmano, I. Ripoll, A. Crespo and J. Real, "TLSF: a new dynamic
//! memory allocator for real-time systems," *Proceedings. 16th Euromicro
//! Conference on Real-Time Systems*, 2004. ECRTS 2004., Catania, Italy, 2004,
//! pp. 79-88, doi: 10.1109/EMRTS.2004.1311009.</sub>
//!
//! # Examples
//!
//! Using the TLSF core directly:
//!
//! ```rust
//! use vlsf::Tlsf;
//!
//! // The maximum block size is (256 << FLLEN) - 256 bytes.
//! let mut tlsf: Tlsf<u16, u16, 12, 16> = Tlsf::new();
//! //                 ^^^  ^^^  ^^  ^^
//! //                  |    |    |  SLLEN
//! //                  |    |   FLLEN
//! //               FLBitmap SLBitmap
//! tlsf.insert_free_range(0..1 << 20);
//!
//! let a = tlsf.allocate(1000, 4096).unwrap();
//! let b = tlsf.allocate(300, 256).unwrap();
//! assert_eq!(a.offset % 4096, 0);
//! assert_eq!(a.size, 1024);
//! assert_eq!(b.size, 512);
//!
//! tlsf.coalesce(a.block);
//! tlsf.coalesce(b.block);
//! assert!(tlsf.is_unused());
//! ```
//!
//! See [`MemoryAllocator`] for the pool-managing layer.
#![no_std]
#![cfg_attr(feature = "doc_cfg", feature(doc_cfg))]

extern crate alloc;

#[cfg(any(test, feature = "std"))]
extern crate std;

pub mod int;
mod tlsf;
pub use self::tlsf::{BlockId, BlockInfo, Suballocation, Tlsf, GRANULARITY};

mod device;
pub use self::device::*;

mod error;
pub use self::error::AllocationError;

mod config;
pub use self::config::AllocatorConfig;

mod pool;
pub use self::pool::{MemoryPool, MAX_POOL_LOG2_SIZE, MIN_POOL_LOG2_SIZE};

mod allocation;
pub use self::allocation::Allocation;

mod allocator;
pub use self::allocator::{AllocatorStatistics, MemoryAllocator};

#[cfg(feature = "ash")]
mod vulkan;
