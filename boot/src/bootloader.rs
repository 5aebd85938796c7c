//! Boot state machine and upgrade orchestration.

use log::{debug, info};
use spin::Mutex;
use storage::AppStorage;

use crate::descriptor::{locate_app_descriptor, AppInfo};
use crate::download::{DownloadSink, Downloader};
use crate::{Clock, Error, Result};

/// Lifecycle state of the bootloader.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum State {
    /// Storage holds no valid application image.
    NoAppToBoot,
    /// A valid image exists; booting once the delay elapses unless cancelled.
    BootDelay,
    /// Cleared for boot.  The actual jump to the application happens outside
    /// this crate.
    ReadyToBoot,
    /// An automatic boot was cancelled; waiting for a command.
    BootCancelled,
    /// An upgrade transaction is in flight.
    AppUpgradeInProgress,
}

/// Everything the serialization guard protects: the backend and the state
/// machine fields.
struct Inner<B> {
    backend: B,
    state: State,
    boot_delay_started_at_ms: u64,
}

impl<B: AppStorage> Inner<B> {
    /// Re-run the locator and land in `BootDelay` or `NoAppToBoot`.
    fn verify_app_and_update_state(&mut self, now_ms: u64) {
        match locate_app_descriptor(&mut self.backend) {
            Some(desc) => {
                info!(
                    "app found; version {}.{}.{:x}, {} bytes",
                    desc.app_info.major_version,
                    desc.app_info.minor_version,
                    desc.app_info.vcs_commit,
                    desc.app_info.image_size
                );
                self.state = State::BootDelay;
                self.boot_delay_started_at_ms = now_ms;
            }
            None => {
                info!("app not found");
                self.state = State::NoAppToBoot;
            }
        }
    }
}

/// The bootloader core: owns the storage backend and the boot state, and
/// serializes every operation behind one mutex.
///
/// All methods take `&self`; the type is intended to be shared between the
/// threads or tasks that query state, issue boot commands and run upgrades.
pub struct Bootloader<B, C> {
    inner: Mutex<Inner<B>>,
    clock: C,
    boot_delay_ms: u64,
}

impl<B: AppStorage, C: Clock> Bootloader<B, C> {
    /// Construct over `backend`, immediately validating whatever image is
    /// currently in storage.  `boot_delay_ms` is how long `BootDelay` lasts
    /// before a state query reports `ReadyToBoot`.
    pub fn new(backend: B, clock: C, boot_delay_ms: u64) -> Bootloader<B, C> {
        let mut inner = Inner {
            backend,
            state: State::NoAppToBoot,
            boot_delay_started_at_ms: 0,
        };
        let now = clock.now_ms();
        inner.verify_app_and_update_state(now);

        Bootloader {
            inner: Mutex::new(inner),
            clock,
            boot_delay_ms,
        }
    }

    /// Current state.  The `BootDelay` to `ReadyToBoot` transition happens
    /// lazily here, when a query observes that the delay has elapsed; nothing
    /// runs in the background.
    pub fn state(&self) -> State {
        let mut inner = self.inner.lock();

        if inner.state == State::BootDelay
            && self.clock.now_ms().wrapping_sub(inner.boot_delay_started_at_ms) >= self.boot_delay_ms
        {
            debug!("boot delay expired");
            inner.state = State::ReadyToBoot;
        }

        inner.state
    }

    /// Info block of the application currently in storage, if a valid image
    /// is present.  Re-runs the locator on every call.
    pub fn app_info(&self) -> Option<AppInfo> {
        let mut inner = self.inner.lock();
        locate_app_descriptor(&mut inner.backend).map(|desc| desc.app_info)
    }

    /// Hold off an automatic boot.  Meaningful from `BootDelay` and
    /// `ReadyToBoot`; a no-op from every other state.
    pub fn cancel_boot(&self) {
        let mut inner = self.inner.lock();

        match inner.state {
            State::BootDelay | State::ReadyToBoot => {
                inner.state = State::BootCancelled;
                debug!("boot cancelled");
            }
            State::NoAppToBoot | State::BootCancelled | State::AppUpgradeInProgress => {}
        }
    }

    /// Boot now, overriding any remaining delay or a previous cancel.  A
    /// no-op from every other state.
    pub fn request_boot(&self) {
        let mut inner = self.inner.lock();

        match inner.state {
            State::BootDelay | State::BootCancelled => {
                inner.state = State::ReadyToBoot;
                debug!("boot requested");
            }
            State::NoAppToBoot | State::ReadyToBoot | State::AppUpgradeInProgress => {}
        }
    }

    /// Replace the application image with one delivered by `downloader`.
    ///
    /// Admitted from `BootDelay`, `BootCancelled` and `NoAppToBoot` only.
    /// Exactly one `end_upgrade` is issued per admitted attempt, success or
    /// not.  A returned `Ok` means the upgrade mechanics completed; whether
    /// the freshly written image is bootable is a separate question, answered
    /// by the next state query.
    pub fn upgrade_app(&self, downloader: &mut dyn Downloader) -> Result<()> {
        // Admission.
        {
            let mut inner = self.inner.lock();

            match inner.state {
                State::BootDelay | State::BootCancelled | State::NoAppToBoot => {
                    inner.state = State::AppUpgradeInProgress;
                }
                State::ReadyToBoot | State::AppUpgradeInProgress => {
                    return Err(Error::InvalidState);
                }
            }

            inner.backend.begin_upgrade()?;
        }

        info!("starting app upgrade");

        // Streaming.  The guard is taken per chunk, not for the whole
        // transfer, so state queries stay responsive while the image is
        // delivered.
        let mut sink = Sink {
            inner: &self.inner,
            offset: 0,
        };
        let res = downloader.download(&mut sink);
        debug!("app download finished: {:?}", res);

        // Finalization.
        let mut inner = self.inner.lock();
        inner.state = State::NoAppToBoot; // Until proven otherwise.

        if let Err(e) = res {
            // Release the backend regardless; the transfer error takes
            // precedence over whatever the cleanup reports.
            let _ = inner.backend.end_upgrade(false);
            return Err(e);
        }

        if let Err(e) = inner.backend.end_upgrade(true) {
            info!("app storage finalization failed: {:?}", e);
            return Err(e.into());
        }

        inner.verify_app_and_update_state(self.clock.now_ms());
        Ok(())
    }
}

/// Write proxy handed to the downloader.  Each chunk write is its own
/// critical section.
struct Sink<'a, B> {
    inner: &'a Mutex<Inner<B>>,
    offset: usize,
}

impl<B: AppStorage> DownloadSink for Sink<'_, B> {
    fn handle_chunk(&mut self, chunk: &[u8]) -> Result<()> {
        let mut inner = self.inner.lock();
        let res = inner.backend.write(self.offset, chunk);
        // The offset advances past a failed write as well.
        self.offset += chunk.len();
        res.map(|_| ()).map_err(Error::from)
    }
}
