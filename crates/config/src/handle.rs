use crate::error::Result;
use crate::settings::ReaderSettings;
use std::sync::Arc;
use tokio::sync::watch;
use tracing::info;

/// Shared, observable settings.
///
/// Clones share the same underlying channel. Readers either take a snapshot
/// with [`current`](Self::current) each time they need a value, or
/// [`subscribe`](Self::subscribe) to react to changes.
#[derive(Clone, Debug)]
pub struct SettingsHandle {
    tx: Arc<watch::Sender<ReaderSettings>>,
}

impl Default for SettingsHandle {
    fn default() -> Self {
        Self::new(ReaderSettings::default())
    }
}

impl SettingsHandle {
    pub fn new(settings: ReaderSettings) -> Self {
        Self { tx: Arc::new(watch::Sender::new(settings)) }
    }

    pub fn current(&self) -> ReaderSettings {
        self.tx.borrow().clone()
    }

    pub fn preload_page_amount(&self) -> usize {
        self.tx.borrow().preload_page_amount
    }

    pub fn subscribe(&self) -> watch::Receiver<ReaderSettings> {
        self.tx.subscribe()
    }

    /// Apply `change` to a copy of the settings and publish it if valid.
    ///
    /// Subscribers are only woken when something actually changed.
    pub fn update(&self, change: impl FnOnce(&mut ReaderSettings)) -> Result<()> {
        let mut candidate = self.current();
        change(&mut candidate);
        candidate.validate()?;
        let changed = self.tx.send_if_modified(|settings| {
            if *settings == candidate {
                return false;
            }
            *settings = candidate;
            true
        });
        if changed {
            info!(preload = self.preload_page_amount(), "reader settings updated");
        }
        Ok(())
    }

    pub fn set_preload_page_amount(&self, amount: usize) -> Result<()> {
        self.update(|settings| settings.preload_page_amount = amount)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::error::ErrorKind;

    #[tokio::test]
    async fn test_update_notifies_subscribers() {
        let handle = SettingsHandle::default();
        let mut rx = handle.subscribe();
        handle.set_preload_page_amount(10).unwrap();
        rx.changed().await.unwrap();
        assert_eq!(rx.borrow_and_update().preload_page_amount, 10);
        assert_eq!(handle.clone().preload_page_amount(), 10);
    }

    #[test]
    fn test_unchanged_update_is_silent() {
        let handle = SettingsHandle::default();
        let rx = handle.subscribe();
        handle.set_preload_page_amount(6).unwrap();
        assert!(!rx.has_changed().unwrap());
    }

    #[test]
    fn test_invalid_update_is_rejected() {
        let handle = SettingsHandle::default();
        let err = handle.set_preload_page_amount(100).unwrap_err();
        assert!(matches!(&*err, ErrorKind::Invalid(..)));
        assert_eq!(handle.preload_page_amount(), 6);
    }
}
