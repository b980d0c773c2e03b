use std::fmt::{self, Debug};

/// The signed-in user on whose behalf the session runs.
///
/// Obtaining and validating the credential is up to the identity
/// provider. The session only requires that one exists before it starts.
#[derive(Clone, PartialEq, Eq, Hash)]
pub struct Identity {
    user_id: String,
    access_token: String,
}

impl Identity {
    /// Creates an identity from an already validated credential.
    ///
    /// Returns `None` if either part is blank, in which case the caller
    /// should treat the user as signed out.
    pub fn new<S1: Into<String>, S2: Into<String>>(
        user_id: S1,
        access_token: S2,
    ) -> Option<Self> {
        let user_id = user_id.into();
        let access_token = access_token.into();
        if user_id.trim().is_empty() || access_token.trim().is_empty() {
            return None;
        }
        Some(Self {
            user_id,
            access_token,
        })
    }

    /// Returns the user id sent with every outbound turn.
    #[inline]
    pub fn user_id(&self) -> &str {
        &self.user_id
    }

    /// Returns the bearer credential.
    #[inline]
    pub fn access_token(&self) -> &str {
        &self.access_token
    }
}

impl Debug for Identity {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Identity")
            .field("user_id", &self.user_id)
            .field("access_token", &"<deducted>")
            .finish()
    }
}
