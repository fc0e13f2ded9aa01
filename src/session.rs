// SPDX-License-Identifier: Apache-2.0
// Copyright 2025 U.S. Federal Government (in countries where recognized)

//! Logged-in session guard.
//!
//! [`AuthenticatedSession`] owns a module session after a successful login.
//! Login state belongs to the token, so guards on the same token share it:
//! the last guard to drop logs out, and only if a guard made the login.
//! Logout failures at that point are logged and swallowed.

use crate::error::Result;
use crate::hsm::ModuleSession;
use std::ops::Deref;
use tracing::{debug, info};

/// A session with the normal user logged in.
///
/// Dereferences to the underlying session, so object searches and signing go
/// through it directly.
#[derive(Debug)]
pub struct AuthenticatedSession<S: ModuleSession> {
    session: S,
}

impl<S: ModuleSession> AuthenticatedSession<S> {
    /// Log in on `session` and take ownership of it.
    ///
    /// `None` logs in through the protected authentication path (PIN pad,
    /// biometric reader). When another guard already holds the token's login
    /// no new login is made. On failure the session is dropped, which closes
    /// it.
    pub fn login(session: S, pin: Option<&str>) -> Result<Self> {
        if session.logins().acquire(|| session.login(pin))? {
            info!("Logged in to token");
        } else {
            debug!("Token already logged in");
        }
        Ok(Self { session })
    }
}

impl<S: ModuleSession> Deref for AuthenticatedSession<S> {
    type Target = S;

    fn deref(&self) -> &S {
        &self.session
    }
}

impl<S: ModuleSession> Drop for AuthenticatedSession<S> {
    fn drop(&mut self) {
        let session = &self.session;
        match session.logins().release(|| session.logout()) {
            Ok(true) => debug!("Logged out of token"),
            Ok(false) => {}
            Err(e) => debug!("Ignoring logout failure: {}", e),
        }
    }
}
