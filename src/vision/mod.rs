// Perception side of the bridge: capture device seam, the transform
// pipeline, the frame ring, and the concurrent frame buffer on top.

pub mod capture;
pub mod frame;
pub mod frame_buffer;
pub mod ring;
