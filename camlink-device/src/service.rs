//! Uplink service core logic.
//!
//! Assembles the streaming pipeline from the persisted configuration and
//! runs it until cancelled or until the controller asks for a restart.

use thiserror::Error;
use tokio_util::sync::CancellationToken;
use tracing::{info, warn};

use camlink_core::{
    Controller, DirectorySource, FrameSource, HttpMultipartTransport, LoopbackTransport,
    PatternSource, RunOutcome, Transport, TracingSink, UplinkError,
};

use crate::config::{ConfigStore, SourceKind, StoreError};

/// Errors that keep the service from running.
#[derive(Debug, Error)]
pub enum ServiceError {
    #[error(transparent)]
    Store(#[from] StoreError),

    #[error(transparent)]
    Uplink(#[from] UplinkError),
}

/// How the service ended. Mapped to the process exit status so the
/// supervisor knows what to do next.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ServiceExit {
    /// Stopped on request.
    Stopped,
    /// Escalated after repeated connect failures; restart the process.
    Restart,
    /// The recovery flag is set; hand over to the recovery workflow.
    Recovery,
}

impl ServiceExit {
    pub const EXIT_RESTART: u8 = 3;
    pub const EXIT_RECOVERY: u8 = 4;

    pub fn code(self) -> u8 {
        match self {
            Self::Stopped => 0,
            Self::Restart => Self::EXIT_RESTART,
            Self::Recovery => Self::EXIT_RECOVERY,
        }
    }
}

// ── UplinkService ────────────────────────────────────────────────

/// The top-level uplink service.
///
/// Owns the configuration store, which doubles as the controller's
/// recovery store.
pub struct UplinkService {
    store: ConfigStore,
    dry_run: bool,
}

impl UplinkService {
    pub fn new(store: ConfigStore) -> Self {
        Self {
            store,
            dry_run: false,
        }
    }

    /// Stream into a discarding in-memory transport instead of the network.
    pub fn dry_run(mut self, dry_run: bool) -> Self {
        self.dry_run = dry_run;
        self
    }

    pub fn store(&self) -> &ConfigStore {
        &self.store
    }

    /// Run the service until stopped.
    ///
    /// 1. Validates the configuration.
    /// 2. Refuses to stream while the recovery flag is set.
    /// 3. Builds the frame source and transport.
    /// 4. Runs the controller until cancelled or escalated.
    pub async fn run(&mut self, cancel: CancellationToken) -> Result<ServiceExit, ServiceError> {
        self.store.validate()?;
        if self.store.force_recovery() {
            warn!("force recovery flag is set; not streaming");
            return Ok(ServiceExit::Recovery);
        }

        let config = self.store.config().clone();
        let source = self.build_source()?;
        let transport = self.build_transport();
        let url = config.stream_url();
        info!(
            "uplink to {url}: {} source, {} at quality {}",
            match config.camera.source {
                SourceKind::Pattern => "pattern",
                SourceKind::Directory => "directory",
            },
            config.camera.frame_size,
            config.camera.jpeg_quality
        );

        let sink = TracingSink;
        let mut controller = Controller::new(
            config.stream.clone(),
            url,
            source,
            transport,
            &sink,
            &mut self.store,
        )
        .with_indicator(config.indicator_output());

        let exit = match controller.run(cancel).await? {
            RunOutcome::Stopped => ServiceExit::Stopped,
            RunOutcome::Restart => ServiceExit::Restart,
        };
        info!("uplink service exiting: {exit:?}");
        Ok(exit)
    }

    fn build_source(&self) -> Result<FrameSource, UplinkError> {
        let config = self.store.config();
        let params = config.capture_params()?;
        Ok(match config.camera.source {
            SourceKind::Pattern => FrameSource::Pattern(PatternSource::new(params)),
            SourceKind::Directory => {
                let src = DirectorySource::open(&config.camera.directory, params)?;
                info!(
                    "replaying {} jpeg files from {}",
                    src.len(),
                    config.camera.directory.display()
                );
                FrameSource::Directory(src)
            }
        })
    }

    fn build_transport(&self) -> Transport {
        if self.dry_run {
            info!("dry run: frames are discarded");
            Transport::Loopback(LoopbackTransport::discarding())
        } else {
            Transport::HttpMultipart(HttpMultipartTransport::new(
                self.store.config().stream.clone(),
            ))
        }
    }
}
