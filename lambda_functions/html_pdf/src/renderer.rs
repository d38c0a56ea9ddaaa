//! HTML to PDF rendering through a throwaway headless Chrome.

use std::ffi::OsStr;

use async_trait::async_trait;
use headless_chrome::protocol::cdp::Page;
use headless_chrome::types::PrintToPdfOptions;
use headless_chrome::{Browser, LaunchOptions};
use thiserror::Error;
use tracing::{debug, error, info};

use crate::config::ChromeConfig;

#[derive(Error, Debug)]
pub enum RenderError {
    #[error("Failed to launch browser: {0}")]
    Launch(String),
    #[error("Failed to open a browser tab: {0}")]
    Tab(String),
    #[error("Failed to load HTML content: {0}")]
    Load(String),
    #[error("Failed to print PDF: {0}")]
    Print(String),
    #[error("Browser returned an empty PDF")]
    EmptyOutput,
    #[error("Render task aborted: {0}")]
    Aborted(String),
}

#[async_trait]
pub trait PdfRenderer: Send + Sync {
    /// Renders `html` into PDF bytes. A successful result is never empty.
    async fn render(&self, html: &str) -> Result<Vec<u8>, RenderError>;
}

/// Launches a fresh Chrome for every call and tears it down afterwards.
#[derive(Debug, Clone)]
pub struct ChromeRenderer {
    config: ChromeConfig,
}

impl ChromeRenderer {
    pub fn new(config: ChromeConfig) -> Self {
        Self { config }
    }
}

#[async_trait]
impl PdfRenderer for ChromeRenderer {
    async fn render(&self, html: &str) -> Result<Vec<u8>, RenderError> {
        let config = self.config.clone();
        let html = html.to_string();

        // headless_chrome drives CDP over blocking calls
        let result = tokio::task::spawn_blocking(move || render_blocking(&config, &html))
            .await
            .map_err(|e| RenderError::Aborted(e.to_string()))
            .and_then(|rendered| rendered);

        match &result {
            Ok(pdf) => info!(bytes = pdf.len(), "rendered PDF"),
            Err(e) => error!(error = %e, "Chromium error"),
        }
        result
    }
}

fn render_blocking(config: &ChromeConfig, html: &str) -> Result<Vec<u8>, RenderError> {
    let session = BrowserSession::launch(config)?;
    let pdf = session.print_html(html)?;
    if pdf.is_empty() {
        return Err(RenderError::EmptyOutput);
    }
    Ok(pdf)
}

/// The document replaced by the rendered HTML. It has no base URL, so relative
/// links and assets in the HTML do not resolve.
const BLANK_PAGE: &str = "about:blank";

/// Resolves once the injected document and its subresources have loaded.
const WAIT_FOR_LOAD: &str = r#"new Promise((resolve) => {
    if (document.readyState === "complete") {
        resolve(true);
    } else {
        window.addEventListener("load", () => resolve(true), { once: true });
    }
})"#;

/// Owns one Chrome process. Dropping the session kills the process, so every
/// exit path out of a render (errors and panics included) releases it.
struct BrowserSession {
    browser: Browser,
}

impl BrowserSession {
    fn launch(config: &ChromeConfig) -> Result<Self, RenderError> {
        let args: Vec<&OsStr> = config.args.iter().map(OsStr::new).collect();
        let options = LaunchOptions::default_builder()
            .headless(true)
            .sandbox(false)
            .path(config.path.clone())
            .args(args)
            .build()
            .map_err(|e| RenderError::Launch(e.to_string()))?;

        debug!(path = ?config.path, "launching browser");
        let browser = Browser::new(options).map_err(|e| RenderError::Launch(format!("{e:#}")))?;
        debug!("browser launched");

        Ok(Self { browser })
    }

    fn print_html(&self, html: &str) -> Result<Vec<u8>, RenderError> {
        let tab = self
            .browser
            .new_tab()
            .map_err(|e| RenderError::Tab(format!("{e:#}")))?;

        tab.navigate_to(BLANK_PAGE)
            .and_then(|tab| tab.wait_until_navigated())
            .map_err(|e| RenderError::Load(format!("{e:#}")))?;

        let frame_tree = tab
            .call_method(Page::GetFrameTree(None))
            .map_err(|e| RenderError::Load(format!("{e:#}")))?;
        tab.call_method(Page::SetDocumentContent {
            frame_id: frame_tree.frame_tree.frame.id,
            html: html.to_string(),
        })
        .map_err(|e| RenderError::Load(format!("{e:#}")))?;

        tab.evaluate(WAIT_FOR_LOAD, true)
            .map_err(|e| RenderError::Load(format!("{e:#}")))?;

        let options = PrintToPdfOptions {
            print_background: Some(true),
            ..Default::default()
        };
        tab.print_to_pdf(Some(options))
            .map_err(|e| RenderError::Print(format!("{e:#}")))
    }
}

impl Drop for BrowserSession {
    fn drop(&mut self) {
        debug!("closing browser");
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::path::PathBuf;

    #[tokio::test]
    async fn missing_browser_binary_is_a_launch_error() {
        let renderer = ChromeRenderer::new(ChromeConfig {
            path: Some(PathBuf::from("/nonexistent/chromium")),
            ..ChromeConfig::default()
        });

        let err = renderer.render("<h1>Hi</h1>").await.unwrap_err();
        assert!(matches!(err, RenderError::Launch(_)), "got {err:?}");
    }

    #[tokio::test]
    #[ignore] // Requires Chrome to be installed
    async fn renders_pdf_with_real_chrome() {
        let renderer = ChromeRenderer::new(ChromeConfig::default());
        let pdf = renderer
            .render("<html><body style=\"background:#c00\"><h1>Hi</h1></body></html>")
            .await
            .expect("render");
        assert!(pdf.starts_with(b"%PDF-"));
    }

    #[tokio::test]
    #[ignore] // Requires Chrome to be installed
    async fn renders_html_larger_than_chrome_url_limit() {
        // Chrome refuses URLs over 2 MiB; the content must not travel as one
        let row = "<tr><td>line item</td><td style=\"background:#eee\">42.00</td></tr>\n";
        let mut html = String::from("<html><body><table>");
        while html.len() < 3 * 1024 * 1024 {
            html.push_str(row);
        }
        html.push_str("</table></body></html>");

        let renderer = ChromeRenderer::new(ChromeConfig::default());
        let pdf = renderer.render(&html).await.expect("render");
        assert!(pdf.starts_with(b"%PDF-"));
    }
}
