//! Error numbers reported across the C boundary.
//!
//! Values follow the Linux generic errno table so that the ABI layer can hand
//! them straight to C callers.

/// Operation not permitted.
pub const EPERM: i32 = 1;
/// Interrupted system call.
pub const EINTR: i32 = 4;
/// Resource temporarily unavailable.
pub const EAGAIN: i32 = 11;
/// Device or resource busy.
pub const EBUSY: i32 = 16;
/// Invalid argument.
pub const EINVAL: i32 = 22;
/// Resource deadlock would occur.
pub const EDEADLK: i32 = 35;
/// Value too large for defined data type.
pub const EOVERFLOW: i32 = 75;
/// Connection timed out.
pub const ETIMEDOUT: i32 = 110;
/// Owner died.
pub const EOWNERDEAD: i32 = 130;
