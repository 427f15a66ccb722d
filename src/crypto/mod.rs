//! Credential encryption.

pub mod token;

pub use token::{decrypt_token, encrypt_token, TokenError};
