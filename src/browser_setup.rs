//! Browser discovery and launch
//!
//! Finds a local Chrome/Chromium (env override, per-platform search paths,
//! `which` fallback), downloads a managed build when nothing is installed,
//! and launches it configured from a session's settings. The CDP event
//! loop runs in a supervised task that filters the protocol's known benign
//! deserialization noise.

use anyhow::{Context, Result};
use chromiumoxide::browser::{Browser, BrowserConfigBuilder, HeadlessMode};
use chromiumoxide::fetcher::{BrowserFetcher, BrowserFetcherOptions};
use futures::StreamExt;
use std::path::PathBuf;
use std::process::Command;
use std::time::Duration;
use tokio::task::{self, JoinHandle};
use tracing::{error, info, trace, warn};

use crate::config::SessionConfig;

const DEFAULT_USER_AGENT: &str = "Mozilla/5.0 (X11; Linux x86_64) AppleWebKit/537.36 \
     (KHTML, like Gecko) Chrome/124.0.0.0 Safari/537.36";

/// Find a Chrome/Chromium executable on this host.
///
/// `CHROMIUM_PATH` overrides everything; otherwise the usual install
/// locations are probed, then `which` on Unix.
pub async fn find_browser_executable() -> Result<PathBuf> {
    if let Ok(path) = std::env::var("CHROMIUM_PATH") {
        let path = PathBuf::from(path);
        if path.exists() {
            info!("using browser from CHROMIUM_PATH: {}", path.display());
            return Ok(path);
        }
        warn!(
            "CHROMIUM_PATH points at a non-existent file: {}",
            path.display()
        );
    }

    let candidates: Vec<PathBuf> = if cfg!(target_os = "windows") {
        [
            r"C:\Program Files\Google\Chrome\Application\chrome.exe",
            r"C:\Program Files (x86)\Google\Chrome\Application\chrome.exe",
            r"C:\Program Files\Chromium\Application\chrome.exe",
        ]
        .iter()
        .map(PathBuf::from)
        .collect()
    } else if cfg!(target_os = "macos") {
        [
            "/Applications/Google Chrome.app/Contents/MacOS/Google Chrome",
            "/Applications/Chromium.app/Contents/MacOS/Chromium",
            "/opt/homebrew/bin/chromium",
        ]
        .iter()
        .map(PathBuf::from)
        .collect()
    } else {
        [
            "/usr/bin/google-chrome",
            "/usr/bin/google-chrome-stable",
            "/usr/bin/chromium",
            "/usr/bin/chromium-browser",
            "/snap/bin/chromium",
            "/usr/local/bin/chromium",
            "/opt/google/chrome/chrome",
        ]
        .iter()
        .map(PathBuf::from)
        .collect()
    };

    for path in candidates {
        if path.exists() {
            info!("found browser at {}", path.display());
            return Ok(path);
        }
    }

    if !cfg!(target_os = "windows") {
        for cmd in &["chromium", "chromium-browser", "google-chrome", "chrome"] {
            if let Ok(output) = Command::new("which").arg(cmd).output()
                && output.status.success()
            {
                let found = String::from_utf8_lossy(&output.stdout).trim().to_string();
                if !found.is_empty() {
                    let path = PathBuf::from(found);
                    info!("found browser via `which {cmd}`: {}", path.display());
                    return Ok(path);
                }
            }
        }
    }

    Err(anyhow::anyhow!("no Chrome/Chromium executable found"))
}

/// Download a managed Chromium into the cache directory and return its
/// executable path.
pub async fn download_managed_browser() -> Result<PathBuf> {
    let cache_dir = dirs::cache_dir()
        .unwrap_or_else(std::env::temp_dir)
        .join("pagescout")
        .join("chromium");
    std::fs::create_dir_all(&cache_dir).context("create browser cache directory")?;

    info!("downloading managed Chromium into {}", cache_dir.display());
    let fetcher = BrowserFetcher::new(
        BrowserFetcherOptions::builder()
            .with_path(&cache_dir)
            .build()
            .context("build fetcher options")?,
    );
    let revision = fetcher.fetch().await.context("fetch managed browser")?;
    info!("downloaded Chromium to {}", revision.folder_path.display());
    Ok(revision.executable_path)
}

/// Launch a browser configured from a session's settings.
///
/// Returns the browser, the supervised CDP handler task, and the profile
/// directory actually used.
pub async fn launch_browser(
    config: &SessionConfig,
    user_data_dir: Option<PathBuf>,
) -> Result<(Browser, JoinHandle<()>, PathBuf)> {
    let chrome_path = match find_browser_executable().await {
        Ok(path) => path,
        Err(_) => download_managed_browser().await?,
    };

    let user_data_dir = user_data_dir.unwrap_or_else(|| {
        std::env::temp_dir().join(format!("pagescout_profile_{}", std::process::id()))
    });
    std::fs::create_dir_all(&user_data_dir).context("create user data directory")?;

    let viewport = &config.viewport;
    let mut builder = BrowserConfigBuilder::default()
        .request_timeout(Duration::from_secs(30))
        .window_size(viewport.width, viewport.height)
        .user_data_dir(user_data_dir.clone())
        .chrome_executable(chrome_path);

    builder = if config.headless {
        builder.headless_mode(HeadlessMode::default())
    } else {
        builder.with_head()
    };

    builder = builder
        .arg("--no-first-run")
        .arg("--no-default-browser-check")
        .arg("--no-sandbox")
        .arg("--disable-setuid-sandbox")
        .arg("--disable-background-networking")
        .arg("--disable-background-timer-throttling")
        .arg("--disable-breakpad")
        .arg("--disable-hang-monitor")
        .arg("--disable-prompt-on-repost")
        .arg("--metrics-recording-only")
        .arg("--password-store=basic")
        .arg("--use-mock-keychain")
        .arg("--mute-audio");

    if config.stealth.enabled {
        let user_agent = config
            .stealth
            .user_agent
            .as_deref()
            .unwrap_or(DEFAULT_USER_AGENT);
        builder = builder
            .arg(format!("--user-agent={user_agent}"))
            .arg("--disable-blink-features=AutomationControlled")
            .arg("--disable-infobars")
            .arg("--disable-notifications")
            .arg("--disable-extensions")
            .arg("--disable-popup-blocking")
            .arg("--hide-scrollbars");
    }

    if let Some(proxy) = &config.proxy {
        builder = builder.arg(format!("--proxy-server={}", proxy.server));
        if let Some(bypass) = &proxy.bypass_list {
            builder = builder.arg(format!("--proxy-bypass-list={bypass}"));
        }
    }

    let browser_config = builder
        .build()
        .map_err(|e| anyhow::anyhow!("build browser config: {e}"))?;

    info!(headless = config.headless, "launching browser");
    let (browser, mut handler) = Browser::launch(browser_config)
        .await
        .context("launch browser")?;

    let handler_task = task::spawn(async move {
        while let Some(h) = handler.next().await {
            if let Err(e) = h {
                let message = e.to_string();
                // Chrome emits CDP events chromiumoxide doesn't model;
                // those deserialization failures are noise, not faults.
                let benign = message
                    .contains("data did not match any variant of untagged enum Message")
                    || message.contains("Failed to deserialize WS response");
                if benign {
                    trace!("suppressed benign CDP deserialization error: {message}");
                } else {
                    error!("browser handler error: {e:?}");
                }
            }
        }
        info!("browser handler task completed");
    });

    Ok((browser, handler_task, user_data_dir))
}
