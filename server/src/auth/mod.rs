//! Authentication
//!
//! Bearer token validation for the export API. Tokens are issued by the
//! platform's identity service and signed with the shared `JWT_SECRET`.

mod error;
pub mod jwt;
mod middleware;

pub use error::{AuthError, AuthResult};
pub use middleware::{require_auth, AuthUser};
