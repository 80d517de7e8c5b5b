use tokio_util::sync::CancellationToken;

/// Cooperative stop signal shared between the manager and one running
/// transfer. Pause and cancel both stop the transfer at the next chunk
/// boundary; the manager knows which of the two it asked for.
#[derive(Debug, Clone, Default)]
pub struct TransferControl {
    token: CancellationToken,
}

impl TransferControl {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn stop(&self) {
        self.token.cancel();
    }

    pub fn is_stopped(&self) -> bool {
        self.token.is_cancelled()
    }

    pub(crate) fn token(&self) -> &CancellationToken {
        &self.token
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_clones_share_the_signal() {
        let control = TransferControl::new();
        let observer = control.clone();
        assert!(!observer.is_stopped());

        control.stop();
        assert!(observer.is_stopped());
    }
}
