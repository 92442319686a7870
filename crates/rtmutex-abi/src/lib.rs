// Entry points null-check their own pointer arguments.
#![allow(clippy::missing_safety_doc)]
//! # rtmutex-abi
//!
//! `extern "C"` boundary for rtmutex. Builds a `cdylib` whose entry points
//! return 0 or an errno, operating on opaque heap-allocated mutex handles.
//!
//! ```text
//! C caller -> ABI entry (this crate) -> argument checks -> rtmutex-core -> errno
//! ```
//!
//! All handles share one process-wide kernel built from the host
//! collaborators. A thread that ends while holding a robust mutex is treated
//! as dead by the next locker.

mod kernel;
pub mod mutex_abi;

pub use kernel::process_kernel;
