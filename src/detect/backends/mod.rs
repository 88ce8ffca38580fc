pub mod scripted;
pub mod stub;
pub mod synthetic;

pub use scripted::ScriptedBackend;
pub use stub::StubBackend;
pub use synthetic::SyntheticBackend;
