//! uspauth core - credential and session lifecycle engine.
//!
//! This crate provides:
//! - `AuthSession`: the facade UI and adapter layers call to log in, obtain a
//!   usable credential, and log out
//! - `RefreshCoordinator`: at most one in-flight refresh per session, shared
//!   by every concurrent caller
//! - `TokenValidator`: classification of credentials as valid, expiring soon,
//!   or expired
//! - `CredentialStore`, `NetworkAdapter`, `Clock`: the capabilities the engine
//!   depends on, with in-memory and file stores included
//!
//! Credentials refresh proactively once inside the lookahead window (10% of
//! lifetime, at least 5 minutes, by default).

pub mod clock;
pub mod config;
pub mod coordinator;
pub mod credential;
pub mod error;
pub mod network;
pub mod registry;
pub mod session;
pub mod state;
pub mod store;
pub mod user;
pub mod validator;

pub use clock::{Clock, ClockGuard, ManualClock, SystemClock};
pub use config::AuthConfig;
pub use coordinator::{RefreshCoordinator, RefreshOutcome};
pub use credential::{Credential, SessionId};
pub use error::{AuthError, StoreError};
pub use network::{AuthInput, NetworkAdapter, TokenStatus};
pub use registry::SessionRegistry;
pub use session::{AuthSession, AuthSessionBuilder};
pub use state::{SessionState, SessionStateMachine};
pub use store::{CredentialStore, FileCredentialStore, InMemoryCredentialStore, StoredCredential};
pub use user::{Affiliation, UserProfile};
pub use validator::{Classification, RefreshPolicy, TokenValidator};
