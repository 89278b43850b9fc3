pub mod adapters;
pub mod artifact;
pub mod artifact_builder;
pub mod control_plane;
pub mod error;
pub mod glob_resolver;
pub mod ids;
pub mod paths;
pub mod registrar;
pub mod retry;
pub mod session;
pub mod throttle;
pub mod transfer;
pub mod transport_cache;
pub mod util;

pub use reqwest;
pub use uuid;
