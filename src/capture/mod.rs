pub mod frame;
pub mod synthetic;

pub use frame::{DepthFrame, EncodedFrame, FrameShape, PixelFormat};
pub use synthetic::SyntheticSensor;
