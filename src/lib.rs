//! Newsletter: rate-paced batch delivery of one message to many recipients.

pub mod config;
pub mod dispatch;
pub mod error;
pub mod events;
pub mod list;
pub mod message;
pub mod report;
pub mod runner;
pub mod transport;

pub use error::{Error, Result};
pub use events::{Event, EventStream};
pub use runner::Newsletter;
