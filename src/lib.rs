pub mod calls;
pub mod config;
pub mod http;
pub mod lease;
pub mod token;

#[cfg(test)]
pub mod test_utils;

pub use calls::{CallSession, SessionError, SessionEvent, SessionState, TeardownReason};
pub use config::SessionConfig;
pub use http::{HttpClient, UreqHttpClient};
pub use lease::{Lease, LeaseManager};
pub use token::{HttpTokenService, TokenService};
