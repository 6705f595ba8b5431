pub mod version_client;

pub use version_client::{RemoteError, VersionClient};
