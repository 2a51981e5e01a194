//! beautify-hw — Hardware abstraction for webcam capture.
//!
//! Provides V4L2-based camera access and conversion of the negotiated
//! pixel format (YUYV, RGB3 or GREY) to RGBA frames.

pub mod camera;
pub mod frame;

pub use camera::{Camera, CameraError, PixelFormat, POLL_TIMEOUT};
pub use frame::Frame;
