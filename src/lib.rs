//! # Chiavi (Identity & Session Core)
//!
//! `chiavi` is the authentication and session engine of a multi-tenant
//! service-booking platform. It verifies credentials, issues and rotates
//! signed session tokens, and runs the one-time-password and TOTP
//! second-factor lifecycles. Transport, booking, and catalog concerns live
//! in their own services and call in through [`session::SessionService`].
//!
//! ## Principals
//!
//! - **Staff** authenticate with a password and, when enrolled, a TOTP second
//!   factor. Their access tokens embed shop, role, and permission claims.
//! - **Customers** are passwordless: a 6-digit code is delivered out-of-band
//!   and verified against a salted hash stored on the customer record.
//!   Everything about a customer is scoped to `(shop, email)`.
//!
//! ## Tokens
//!
//! Three token kinds (access, refresh, and a temporary 2FA handoff) sign
//! with independent secrets and lifetimes, so compromising one secret cannot
//! forge the others. Access and 2FA tokens are stateless. Refresh tokens are
//! additionally tracked in the [`ledger::RefreshTokenLedger`] and are strictly
//! single-use: rotation removes the old record before the new pair is minted.
//!
//! ## Abuse resistance
//!
//! OTP requests are limited to 3 per `(shop, email)` in any rolling 60-second
//! window, and verification locks out after 5 failed attempts per issued
//! code. The shipped [`otp::MemoryOtpChallenges`] is process-local; deploying
//! multiple instances behind a balancer weakens throttling to per-instance
//! unless the [`otp::OtpChallengeStore`] trait is backed by a shared cache.

pub mod config;
pub mod error;
pub mod hash;
pub mod identity;
pub mod ledger;
pub mod memory;
pub mod notify;
pub mod otp;
pub mod session;
pub mod storage;
pub mod token;
pub mod totp;

pub use config::AuthConfig;
pub use error::{AuthError, Result};
pub use session::SessionService;
