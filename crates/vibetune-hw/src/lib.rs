//! vibetune-hw — Capture hardware for the VibeTune CLI.
//!
//! V4L2 webcam stills for face analysis and cpal microphone recording for
//! voice analysis.

pub mod camera;
pub mod frame;
pub mod microphone;

pub use camera::{Camera, CameraError, DeviceInfo};
pub use frame::Frame;
pub use microphone::{MicrophoneError, Recording};
