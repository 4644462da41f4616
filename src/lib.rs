//! `timed-out` enforces per-phase deadlines on an in-flight HTTP request.
//!
//! A coordinator is attached to a request before it is dispatched and
//! watches three independent deadlines:
//! - `connect`: until the socket is connected,
//! - `request`: until the response body has been received,
//! - `socket`: the longest silence allowed on a connected socket.
//!
//! When one expires the request is aborted and exactly one
//! [`TimeoutError`] is raised on it: `ETIMEDOUT` if the connection never
//! got established, `ESOCKETTIMEDOUT` if it did but the server went quiet.
//!
//! The request itself is supplied by the caller through [`RequestHandle`].
//!
//! ```no_run
//! # use std::sync::Arc;
//! # use timed_out::{RequestHandle, Timeouts};
//! # fn dispatch<H: RequestHandle>(request: Arc<H>) -> Result<(), timed_out::AttachError> {
//! let timeouts = Timeouts::default().with_connect(75).with_request(500);
//! let request = timed_out::attach(request, &timeouts)?;
//! # Ok(())
//! # }
//! ```

mod coordinator;
mod error;
mod options;
mod request;

pub use coordinator::attach;
pub use error::{AttachError, ConfigError, TimeoutError};
pub use options::{Phase, Timeouts};
pub use request::{Lifecycle, RequestEvent, RequestHandle};

pub type Result<T> = std::result::Result<T, TimeoutError>;
