//! Authentication: identity-provider access, claims synchronization, and
//! the observable session state.

mod error;
mod idp;
mod principal;
pub mod roles;
mod session;
mod state;
mod synchronizer;

pub use error::AuthError;
pub use idp::{ClaimSet, ClaimsFetch, Credential, HttpIdentityProvider, IdentityProvider};
pub use principal::Principal;
pub use session::{
    FileSessionStore, MemorySessionStore, SessionError, SessionSnapshot, SessionStore,
    SharedSessionStore,
};
pub use state::{ActiveSession, AuthState, SessionState};
pub use synchronizer::ClaimsSynchronizer;
