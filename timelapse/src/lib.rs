pub mod camera_api;
pub mod config;
pub mod error;
pub mod timelapse;

pub use error::{Result, TimelapseError};
