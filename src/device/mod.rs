pub mod camera;

pub use camera::{CameraStats, PresentedFrame, VirtualCamera};
