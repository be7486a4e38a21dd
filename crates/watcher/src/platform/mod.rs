//! Native watcher engines and host selection

#[cfg(target_os = "macos")]
pub mod macos;

#[cfg(target_os = "linux")]
pub mod linux;

use crate::backend::Backend;
use fswatch_core::Config;

/// The best engine this host offers
pub(crate) fn native(config: &Config) -> Backend {
    #[cfg(target_os = "linux")]
    {
        let _ = config;
        Backend::Inotify(linux::InotifyBackend::new())
    }
    #[cfg(target_os = "macos")]
    {
        Backend::FsEvents(macos::FsEventsBackend::new(config))
    }
    #[cfg(not(any(target_os = "linux", target_os = "macos")))]
    {
        Backend::Poll(crate::poll::PollBackend::new(config))
    }
}
