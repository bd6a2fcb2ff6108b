//! ghostvc library
//!
//! Verification-condition engine for Go-like programs with ghost code,
//! permissions and set/multiset specifications.

pub mod ast;
pub mod config;
pub mod contract;
pub mod driver;
pub mod error;
pub mod lexer;
pub mod loader;
pub mod logic;
pub mod oracle;
pub mod parser;
pub mod report;
pub mod resolver;
pub mod symbols;
pub mod theory;
pub mod types;
pub mod util;
pub mod vcgen;

pub use ast::Span;
pub use config::VerifierConfig;
pub use driver::{AbortHandle, Verifier};
pub use error::{Result, VerifyError};
pub use report::VerificationReport;
