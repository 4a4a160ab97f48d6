pub mod auth;
pub mod client;
pub mod error;
pub mod flow;
pub mod ids;

pub use auth::{Authenticator, ClientSecrets};
pub use client::{DEFAULT_API_URL, DriveClient};
pub use error::{AuthError, DriveError};
pub use flow::AuthorizationFlow;
pub use ids::extract_id;
