use async_trait::async_trait;

/// Source of bearer tokens for the storage API.
///
/// `interactive` allows the provider to prompt the user; the upload engine
/// only ever asks non-interactively. `None` means no token is available and
/// the current operation fails with an auth error.
#[async_trait]
pub trait TokenProvider: Send + Sync {
    async fn get_token(&self, interactive: bool) -> Option<String>;
}

/// 固定 token
#[derive(Clone, Default)]
pub struct StaticToken(Option<String>);

impl StaticToken {
    pub fn new(token: impl Into<String>) -> Self {
        let token = token.into();
        Self((!token.is_empty()).then_some(token))
    }

    pub fn none() -> Self {
        Self(None)
    }
}

impl std::fmt::Debug for StaticToken {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let shown = if self.0.is_some() { "<redacted>" } else { "<none>" };
        f.debug_tuple("StaticToken").field(&shown).finish()
    }
}

#[async_trait]
impl TokenProvider for StaticToken {
    async fn get_token(&self, _interactive: bool) -> Option<String> {
        self.0.clone()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn test_static_token() {
        assert_eq!(StaticToken::new("abc").get_token(false).await.as_deref(), Some("abc"));
        assert_eq!(StaticToken::new("").get_token(true).await, None);
        assert_eq!(StaticToken::none().get_token(false).await, None);
    }

    #[test]
    fn test_debug_hides_token() {
        let debug = format!("{:?}", StaticToken::new("secret"));
        assert!(!debug.contains("secret"));
    }
}
