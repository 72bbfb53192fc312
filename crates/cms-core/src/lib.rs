pub mod config;
pub mod events;
pub mod signal;
pub mod signal_auth;
pub mod state;
pub mod types;
pub mod validation;

pub use config::*;
pub use events::*;
pub use signal::*;
pub use signal_auth::*;
pub use state::*;
pub use types::*;
pub use validation::*;

