//! Content lifecycle engine.

pub mod activities;
pub mod directory;
pub mod engine;
pub mod logging;
pub mod persistence;
pub mod process;
pub mod retry;
pub mod state_machine;

pub use activities::*;
pub use directory::*;
pub use engine::*;
pub use persistence::*;
pub use process::*;
pub use retry::*;
pub use state_machine::*;

