pub mod auth;
pub mod metrics;
pub mod models;
pub mod routes;
pub mod store;

pub use auth::*;
pub use metrics::*;
pub use models::*;
pub use routes::*;
pub use store::*;
