pub mod net;

// Re-exports for convenience
pub use net::{
    default_http_client, http_client_with_agent, Credentials, FetchOutcome, HttpRemoteStore,
    RemoteError, RemoteStore,
};
