/*!
 * Core primitives shared by the stores and collectors
 */

pub mod atomic;
pub mod retry;

pub use atomic::{write_atomic, write_json_atomic};
pub use retry::{with_retry, RetryPolicy};
