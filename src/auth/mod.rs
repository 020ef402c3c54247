//! # Auth Module
//!
//! Turns a bearer token into a [`Principal`]. Permission resolution lives in
//! [`crate::permissions`]; this module only answers "who is calling".

pub mod errors;
pub mod jwt;
pub mod principal;

pub use errors::{AuthError, AuthResult};
pub use jwt::{JwtClaims, JwtConfig, JwtManager};
pub use principal::Principal;
