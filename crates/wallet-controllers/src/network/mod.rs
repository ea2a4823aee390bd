//! Network configuration, the active provider, and network identity.

pub mod controller;
pub mod switcher;
pub mod verifier;

pub use controller::NetworkController;
pub use switcher::NetworkSwitcher;
pub use verifier::NetworkIdentityVerifier;
