// SPDX-License-Identifier: MIT OR Apache-2.0
#![deny(unsafe_code)]
#![warn(missing_docs)]

//! Minting and validation of approval, delegation, and say capability
//! tokens (§4.G).
//!
//! Every token shares a common envelope (`schema_id`, `schema_version`,
//! `token_id`, `created_at`, `expires_at`, type-specific claims, a trailing
//! optional `signature`). `token_id` is derived deterministically from the
//! token's immutable claims and `expires_at`, so minting the same claims
//! twice with the same lifetime yields the same id.

mod mint;
mod model;
mod validate;

pub use mint::{
    ApprovalTokenRequest, DelegationTokenRequest, SayTokenRequest, mint_approval_token,
    mint_delegation_token, mint_say_token,
};
pub use model::{ApprovalToken, DelegationToken, SayToken};
pub use validate::{
    ApprovalCheck, SayCheck, validate_approval_token, validate_delegation_token, validate_say_token,
};
