//! Cooperative cancellation shared by every long-running operation.

use crate::{KthuluError, Result};

pub use tokio_util::sync::CancellationToken;

/// Fails with `Cancelled` once the token has fired. `None` never cancels.
pub fn ensure_active(token: Option<&CancellationToken>) -> Result<()> {
    match token {
        Some(t) if t.is_cancelled() => Err(KthuluError::Cancelled),
        _ => Ok(()),
    }
}
