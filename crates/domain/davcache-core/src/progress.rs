/// Bytes received so far for one transfer.
///
/// `total` is `None` when the server did not send a content length; no
/// percentage can be derived then and displays should go indeterminate.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub struct TransferProgress {
    pub received: u64,
    pub total: Option<u64>,
}

impl TransferProgress {
    pub fn new(received: u64, total: Option<u64>) -> Self {
        Self { received, total }
    }

    /// `received / total`, clamped to `[0, 1]`.
    pub fn fraction(&self) -> Option<f64> {
        match self.total {
            Some(total) if total > 0 => Some((self.received as f64 / total as f64).clamp(0.0, 1.0)),
            _ => None,
        }
    }

    pub fn is_indeterminate(&self) -> bool {
        self.fraction().is_none()
    }
}
