//! Request dispatching, supervision and listeners for Resident
//!
//! A [`ResidentServer`] owns one worker pool, the supervisor loop that keeps
//! it healthy, and the listeners that turn inbound traffic into
//! [`Request`]s for the [`Dispatcher`].

pub mod dispatcher;
pub mod error;
pub mod listener;
pub mod request;
pub mod startup;
pub mod supervisor;

pub use dispatcher::Dispatcher;
pub use error::{DispatchError, ServerError};
pub use listener::{http::HttpListener, socket::SocketListener, Listener};
pub use request::{Request, Response};
pub use startup::{ResidentServer, ServerHandle};
pub use supervisor::{ShutdownReport, Supervisor, SupervisorError, SupervisorHandle};
