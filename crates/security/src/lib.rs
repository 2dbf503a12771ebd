//! Inbound-channel security: webhook signature verification, flood
//! detection, and message validation.

pub mod flood;
pub mod signature;
pub mod validate;

pub use flood::FloodDetector;
pub use signature::{sign, verify_signature};
pub use validate::{MessageValidator, Violation};
