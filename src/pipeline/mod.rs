//! Detection to alert decision pipeline.
//!
//! A [`Session`] paces frames from a [`FrameSource`](crate::camera::FrameSource) through a
//! [`Detector`](crate::impulse::Detector), turns the boxes of each frame into a [`Verdict`]
//! and hands positive verdicts to an [`AlertDispatcher`]. Each frame is judged on its own.
//! [`acquire`] gathers those resources before a session starts.

mod alert;
mod dispatch;
mod scheduler;
mod startup;
mod tally;
#[cfg(test)]
mod testing;

pub use alert::{Alert, AlertMessage};
pub use dispatch::AlertDispatcher;
pub use scheduler::{PipelineError, PipelineSettings, RunOutcome, Session};
pub use startup::{acquire, Startup};
pub use tally::{aggregate, evaluate, Verdict};
