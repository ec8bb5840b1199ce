mod defaults;
mod error;
mod protocol;
mod publisher;
mod routes;
mod server;
mod state;

pub use defaults::DefaultConfigStore;
pub use error::{ApiError, ApiResult};
pub use protocol::*;
pub use publisher::{EndpointPublisher, RouteHandler, DEPLOYED_PREFIX};
pub use server::{build_router, GatewayServer};
pub use state::AppState;
