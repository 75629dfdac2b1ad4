//! Browser backends and subprocess handle tracking
//!
//! A session owns one backend: either a live Chromium (launched through
//! `browser_setup`) or the offline stub. Backends hand out per-tab drivers
//! and expose every OS-level handle they hold (child process, event-loop
//! task) so termination can close each one explicitly, guarding the
//! pipe-teardown race where the runtime shuts down before the driver's
//! subprocess channel drains.

use std::path::PathBuf;
use std::sync::Arc;
use std::sync::atomic::{AtomicBool, Ordering};

use anyhow::{Context, Result};
use async_trait::async_trait;
use chromiumoxide::browser::Browser;
use chromiumoxide::cdp::browser_protocol::emulation::SetDeviceMetricsOverrideParams;
use tokio::sync::Mutex;
use tokio::task::JoinHandle;
use tracing::{debug, info, warn};
use uuid::Uuid;

use crate::config::SessionConfig;
use crate::driver::{ChromiumDriver, DomDriver, StubDriver};
use crate::events::{CorrelationId, EventBus};

/// One OS-level resource a session must release on termination.
#[async_trait]
pub trait SubprocessHandle: Send + Sync {
    fn describe(&self) -> String;

    /// Whether `close` has completed (successfully or not) at least once.
    fn is_closed(&self) -> bool;

    /// Release the resource. Implementations tolerate being called after
    /// the underlying pipe is already gone.
    async fn close(&self) -> Result<()>;
}

/// Backend owning the browser-side of one session.
#[async_trait]
pub trait BrowserBackend: Send + Sync {
    /// Open a new tab and wrap it in a driver.
    async fn new_tab(
        &self,
        session_id: Uuid,
        context_id: String,
        correlation: CorrelationId,
        events: EventBus,
    ) -> Result<Arc<dyn DomDriver>>;

    /// Graceful driver shutdown (close pages, close browser connection).
    async fn close(&self) -> Result<()>;

    /// Every handle the session tracks for explicit cleanup.
    fn subprocess_handles(&self) -> Vec<Arc<dyn SubprocessHandle>>;

    /// Marker string identifying the browser child process on the host
    /// (the unique profile directory passed on its command line); the
    /// resource monitor resolves it to a pid.
    fn profile_marker(&self) -> Option<String>;
}

/// Launches backends for new sessions.
#[async_trait]
pub trait DriverFactory: Send + Sync {
    async fn launch(
        &self,
        config: &SessionConfig,
        events: &EventBus,
        correlation: &CorrelationId,
    ) -> Result<Box<dyn BrowserBackend>>;
}

// =============================================================================
// Chromium backend
// =============================================================================

const WEBDRIVER_MASK_JS: &str = r"
    Object.defineProperty(navigator, 'webdriver', {
        get: () => false
    });
";

struct BrowserProcessHandle {
    browser: Arc<Mutex<Option<Browser>>>,
    closed: AtomicBool,
}

#[async_trait]
impl SubprocessHandle for BrowserProcessHandle {
    fn describe(&self) -> String {
        "browser-process".to_string()
    }

    fn is_closed(&self) -> bool {
        self.closed.load(Ordering::SeqCst)
    }

    async fn close(&self) -> Result<()> {
        self.closed.store(true, Ordering::SeqCst);
        let Some(mut browser) = self.browser.lock().await.take() else {
            debug!("browser process already taken, nothing to close");
            return Ok(());
        };
        browser.close().await.context("browser close command")?;
        let _ = browser.wait().await;
        Ok(())
    }
}

struct HandlerTaskHandle {
    task: Mutex<Option<JoinHandle<()>>>,
    closed: AtomicBool,
}

#[async_trait]
impl SubprocessHandle for HandlerTaskHandle {
    fn describe(&self) -> String {
        "cdp-handler-task".to_string()
    }

    fn is_closed(&self) -> bool {
        self.closed.load(Ordering::SeqCst)
    }

    async fn close(&self) -> Result<()> {
        self.closed.store(true, Ordering::SeqCst);
        if let Some(task) = self.task.lock().await.take() {
            task.abort();
        }
        Ok(())
    }
}

/// Live Chromium behind the session.
pub struct ChromiumBackend {
    browser: Arc<Mutex<Option<Browser>>>,
    handles: Vec<Arc<dyn SubprocessHandle>>,
    user_data_dir: PathBuf,
    config: SessionConfig,
}

impl ChromiumBackend {
    pub(crate) fn new(
        browser: Browser,
        handler_task: JoinHandle<()>,
        user_data_dir: PathBuf,
        config: SessionConfig,
    ) -> Self {
        let browser = Arc::new(Mutex::new(Some(browser)));
        let handles: Vec<Arc<dyn SubprocessHandle>> = vec![
            Arc::new(BrowserProcessHandle {
                browser: Arc::clone(&browser),
                closed: AtomicBool::new(false),
            }),
            Arc::new(HandlerTaskHandle {
                task: Mutex::new(Some(handler_task)),
                closed: AtomicBool::new(false),
            }),
        ];
        Self {
            browser,
            handles,
            user_data_dir,
            config,
        }
    }
}

#[async_trait]
impl BrowserBackend for ChromiumBackend {
    async fn new_tab(
        &self,
        session_id: Uuid,
        context_id: String,
        correlation: CorrelationId,
        events: EventBus,
    ) -> Result<Arc<dyn DomDriver>> {
        let guard = self.browser.lock().await;
        let browser = guard.as_ref().context("browser already closed")?;
        let page = browser
            .new_page("about:blank")
            .await
            .context("open new tab")?;

        let viewport = &self.config.viewport;
        page.execute(
            SetDeviceMetricsOverrideParams::builder()
                .width(i64::from(viewport.width))
                .height(i64::from(viewport.height))
                .device_scale_factor(viewport.device_scale_factor)
                .mobile(viewport.mobile)
                .build()
                .map_err(anyhow::Error::msg)?,
        )
        .await
        .context("apply viewport")?;

        if self.config.stealth.enabled && self.config.stealth.mask_webdriver {
            if let Err(e) = page.evaluate_on_new_document(WEBDRIVER_MASK_JS).await {
                warn!("webdriver mask injection failed: {e}");
            }
        }

        Ok(Arc::new(ChromiumDriver::new(
            page,
            events,
            correlation,
            session_id,
            context_id,
        )))
    }

    async fn close(&self) -> Result<()> {
        // The process handle performs the actual close; here we only close
        // pages still attached to the connection.
        let guard = self.browser.lock().await;
        if let Some(browser) = guard.as_ref() {
            match browser.pages().await {
                Ok(pages) => {
                    for page in pages {
                        if let Err(e) = page.close().await {
                            debug!("page close during backend shutdown: {e}");
                        }
                    }
                }
                Err(e) => debug!("listing pages during backend shutdown: {e}"),
            }
        }
        Ok(())
    }

    fn subprocess_handles(&self) -> Vec<Arc<dyn SubprocessHandle>> {
        self.handles.clone()
    }

    fn profile_marker(&self) -> Option<String> {
        Some(self.user_data_dir.display().to_string())
    }
}

impl Drop for ChromiumBackend {
    fn drop(&mut self) {
        let dir = self.user_data_dir.clone();
        if dir.exists() {
            info!("removing session profile directory {}", dir.display());
            if let Err(e) = std::fs::remove_dir_all(&dir) {
                warn!("failed to remove profile directory {}: {e}", dir.display());
            }
        }
    }
}

/// Factory launching real Chromium sessions via `browser_setup`.
#[derive(Debug, Default)]
pub struct ChromiumFactory;

#[async_trait]
impl DriverFactory for ChromiumFactory {
    async fn launch(
        &self,
        config: &SessionConfig,
        _events: &EventBus,
        _correlation: &CorrelationId,
    ) -> Result<Box<dyn BrowserBackend>> {
        let profile = crate::browser_profile::create_unique_profile()
            .context("create session profile directory")?;
        let user_data_dir = profile.into_path();
        let (browser, handler_task, user_data_dir) =
            crate::browser_setup::launch_browser(config, Some(user_data_dir))
                .await
                .context("launch browser for session")?;
        Ok(Box::new(ChromiumBackend::new(
            browser,
            handler_task,
            user_data_dir,
            config.clone(),
        )))
    }
}

// =============================================================================
// Stub backend
// =============================================================================

struct StubSubprocessHandle {
    closed: AtomicBool,
}

#[async_trait]
impl SubprocessHandle for StubSubprocessHandle {
    fn describe(&self) -> String {
        "stub-subprocess".to_string()
    }

    fn is_closed(&self) -> bool {
        self.closed.load(Ordering::SeqCst)
    }

    async fn close(&self) -> Result<()> {
        self.closed.store(true, Ordering::SeqCst);
        Ok(())
    }
}

/// A handle that fails its first close the way a half-torn-down pipe does.
/// Used to exercise the cleanup race guard.
pub struct BrokenPipeHandle {
    closed: AtomicBool,
}

impl BrokenPipeHandle {
    #[must_use]
    pub fn new() -> Arc<Self> {
        Arc::new(Self {
            closed: AtomicBool::new(false),
        })
    }
}

#[async_trait]
impl SubprocessHandle for BrokenPipeHandle {
    fn describe(&self) -> String {
        "broken-pipe".to_string()
    }

    fn is_closed(&self) -> bool {
        self.closed.load(Ordering::SeqCst)
    }

    async fn close(&self) -> Result<()> {
        self.closed.store(true, Ordering::SeqCst);
        Err(anyhow::anyhow!("broken pipe: channel already closed"))
    }
}

/// Offline backend serving stub-driver tabs.
pub struct StubBackend {
    handles: parking_lot::Mutex<Vec<Arc<dyn SubprocessHandle>>>,
    drivers: parking_lot::Mutex<Vec<Arc<StubDriver>>>,
}

impl StubBackend {
    #[must_use]
    pub fn new() -> Self {
        Self {
            handles: parking_lot::Mutex::new(vec![Arc::new(StubSubprocessHandle {
                closed: AtomicBool::new(false),
            })]),
            drivers: parking_lot::Mutex::new(Vec::new()),
        }
    }

    /// Attach an extra tracked handle (tests use this to stage teardown
    /// races).
    pub fn track_handle(&self, handle: Arc<dyn SubprocessHandle>) {
        self.handles.lock().push(handle);
    }

    /// Drivers created so far, for direct test manipulation.
    #[must_use]
    pub fn drivers(&self) -> Vec<Arc<StubDriver>> {
        self.drivers.lock().clone()
    }
}

impl Default for StubBackend {
    fn default() -> Self {
        Self::new()
    }
}

#[async_trait]
impl BrowserBackend for StubBackend {
    async fn new_tab(
        &self,
        session_id: Uuid,
        context_id: String,
        correlation: CorrelationId,
        events: EventBus,
    ) -> Result<Arc<dyn DomDriver>> {
        let driver = Arc::new(StubDriver::new(events, correlation, session_id, context_id));
        self.drivers.lock().push(Arc::clone(&driver));
        Ok(driver)
    }

    async fn close(&self) -> Result<()> {
        Ok(())
    }

    fn subprocess_handles(&self) -> Vec<Arc<dyn SubprocessHandle>> {
        self.handles.lock().clone()
    }

    fn profile_marker(&self) -> Option<String> {
        None
    }
}

/// Factory producing offline stub backends; the default in tests.
#[derive(Debug, Default)]
pub struct StubFactory;

#[async_trait]
impl DriverFactory for StubFactory {
    async fn launch(
        &self,
        _config: &SessionConfig,
        _events: &EventBus,
        _correlation: &CorrelationId,
    ) -> Result<Box<dyn BrowserBackend>> {
        Ok(Box::new(StubBackend::new()))
    }
}
