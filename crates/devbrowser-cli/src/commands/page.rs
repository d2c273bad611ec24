//! Page-scoped tool invocation from the CLI.
//!
//! Ensures the page exists via the daemon, then drives it over a direct CDP
//! connection and dispatches through the shared tool runner.

use serde_json::Value;

use devbrowser_cdp::{CdpClient, PageDriver};
use devbrowser_client as client;
use devbrowser_diagnose::tools::run_tool;

use crate::commands::{Globals, EXIT_OK};
use crate::output::write_output;

/// Open a driver on the named page (starting the daemon if needed).
pub async fn open_driver(
    globals: &Globals,
    page_name: &str,
) -> anyhow::Result<(PageDriver, String)> {
    let endpoint = client::ensure_page(&globals.profile, globals.headless, page_name).await?;
    let cdp = CdpClient::connect(&endpoint.ws_endpoint).await?;
    let session = cdp.attach_page(&endpoint.target_id).await?;
    let driver = PageDriver::new(session).await?;
    Ok((driver, endpoint.base_url))
}

/// Run one tool against a page and print its result.
pub async fn run_with_page(
    globals: &Globals,
    page_name: &str,
    tool: &str,
    args: &Value,
) -> anyhow::Result<u8> {
    let (mut driver, _base) = open_driver(globals, page_name).await?;
    let artifact_root = globals.artifact_root()?;

    let result = run_tool(&mut driver, tool, args, &artifact_root).await;
    let _ = driver.detach().await;
    let value = result?;

    let out = write_output(&artifact_root, &globals.output, &value, &globals.out_path)?;
    println!("{out}");
    Ok(EXIT_OK)
}
