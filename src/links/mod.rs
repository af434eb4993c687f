//! Short code generation and link lifecycle

pub mod error;
pub mod generator;
pub mod service;

pub use error::LinkError;
pub use generator::{CodeGenerator, MIN_CODE_LENGTH, RESERVED_CODES};
pub use service::{validate_destination, LinkService};
