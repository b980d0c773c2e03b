use std::fmt::Debug;

/// Builder for [`HistoryConfig`].
#[derive(Clone, PartialEq, Eq, Hash)]
pub struct HistoryConfigBuilder {
    base_url: String,
    access_token: Option<String>,
}

impl HistoryConfigBuilder {
    /// Creates a builder for the history endpoint at `base_url`.
    #[inline]
    pub fn with_base_url<S: Into<String>>(base_url: S) -> Self {
        Self {
            base_url: base_url.into(),
            access_token: None,
        }
    }

    /// Sets the bearer token sent with the request.
    #[inline]
    pub fn with_access_token<S: Into<String>>(mut self, token: S) -> Self {
        self.access_token = Some(token.into());
        self
    }

    /// Builds the configuration.
    #[inline]
    pub fn build(self) -> HistoryConfig {
        HistoryConfig {
            base_url: self.base_url,
            access_token: self.access_token.filter(|token| !token.is_empty()),
        }
    }
}

impl Debug for HistoryConfigBuilder {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("HistoryConfigBuilder")
            .field("base_url", &self.base_url)
            .field(
                "access_token",
                &self.access_token.as_ref().map(|_| "<deducted>"),
            )
            .finish()
    }
}

/// Configuration for the history endpoint.
#[derive(Clone, PartialEq, Eq, Hash)]
pub struct HistoryConfig {
    pub(crate) base_url: String,
    pub(crate) access_token: Option<String>,
}

impl HistoryConfig {
    /// Returns the endpoint URL, without query.
    #[inline]
    pub fn base_url(&self) -> &str {
        &self.base_url
    }
}

impl Debug for HistoryConfig {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("HistoryConfig")
            .field("base_url", &self.base_url)
            .field(
                "access_token",
                &self.access_token.as_ref().map(|_| "<deducted>"),
            )
            .finish()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_token_is_not_printed() {
        let config = HistoryConfigBuilder::with_base_url("https://history")
            .with_access_token("s3cr3t")
            .build();
        let printed = format!("{config:?}");
        assert!(printed.contains("https://history"));
        assert!(!printed.contains("s3cr3t"));
    }

    #[test]
    fn test_empty_token_is_dropped() {
        let config = HistoryConfigBuilder::with_base_url("https://history")
            .with_access_token("")
            .build();
        assert!(config.access_token.is_none());
    }
}
