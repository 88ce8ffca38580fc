mod backend;
mod backends;
mod registry;
mod result;

pub use backend::{shared, DetectorBackend, SharedDetector};
pub use backends::{ScriptedBackend, StubBackend, SyntheticBackend};
pub use registry::BackendRegistry;
pub use result::{normalize, Detection, RawDetection};
