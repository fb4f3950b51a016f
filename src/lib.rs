pub mod app;
pub mod completion;
pub mod pacing;
pub(crate) mod renderer;
pub mod stage;
pub mod transforms;
pub mod util;
pub mod vertex;

/// The maximum number of frames that the app is allowed to submit to the GPU
/// before it has to wait for the GPU to finish one. Also the number of slots
/// in the uniform ring.
pub const MAX_FRAMES_IN_FLIGHT: usize = 3;
