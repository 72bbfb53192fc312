pub mod error;
pub mod model;
pub mod routes;
pub mod server;
pub mod state;

pub use error::*;
pub use model::*;
pub use routes::*;
pub use server::*;
pub use state::*;

