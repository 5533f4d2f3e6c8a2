//! Gateway composition: routing, proxying, and the server lifecycle

pub mod proxy;
pub mod routes;
pub mod server;

pub use proxy::{USER_HEADER, Upstream};
pub use routes::{HostPattern, PathRoute, RouteTable};
pub use server::{Gateway, HEALTH_PATH};
