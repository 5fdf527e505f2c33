pub mod config;
pub mod connection;
pub mod dispatcher;
pub mod handler;
pub mod registry;
pub mod server;
pub mod session;
pub mod shutdown;
mod socket;

pub use config::{load_config, load_config_with, ConfigError, DuplicateIdPolicy, RelayConfig};
pub use connection::{ClientConnection, ConnectionState, DeliveryError};
pub use dispatcher::{DeliveryReport, Dispatcher};
pub use handler::{ConnectionHandler, RelayContext};
pub use registry::{Departure, SessionRegistry};
pub use server::{build_router, start, AppState, ServerHandle};
pub use session::{Admission, Session, SessionSnapshot};
pub use shutdown::ShutdownCoordinator;
