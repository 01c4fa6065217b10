mod protocol;
mod routes;
mod server;
mod sse;
mod state;

pub use protocol::{ApiError, ApiResponse};
pub use server::{router, GatewayServer};
pub use state::AppState;
