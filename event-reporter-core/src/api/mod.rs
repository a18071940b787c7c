//! Cacophony API client
//!
//! The device authenticates with a password allocated at registration and
//! reports events with a short-lived token:
//!
//! - `POST /api/v1/devices` registers the device and returns a token
//! - `POST /authenticate_device` exchanges the password for a token
//! - `POST /api/v1/events` submits one event with all its occurrence times
//!
//! Responses to event submissions are classified so that the delivery loop
//! only drops an event once the server has accepted it or refused it for
//! good.

mod client;
mod report;

pub use client::{ApiClient, Session};
pub use report::{format_timestamp, Description, Report};
