//! Daemon lifecycle commands: status, start, stop, list-pages, close-page.

use std::time::Duration;

use anyhow::Context;

use devbrowser_client as client;

use crate::commands::{Globals, EXIT_OK};
use crate::output::write_output;

pub async fn status(globals: &Globals) -> anyhow::Result<u8> {
    if client::is_daemon_healthy(&globals.profile).await {
        let base = client::daemon_base_url(&globals.profile).unwrap_or_default();
        println!("ok profile={} url={}", globals.profile, base);
    } else {
        println!("not running profile={}", globals.profile);
    }
    Ok(EXIT_OK)
}

pub async fn start(globals: &Globals) -> anyhow::Result<u8> {
    client::start_daemon(&globals.profile, globals.headless)
        .await
        .context("starting daemon")?;
    let base = client::daemon_base_url(&globals.profile).unwrap_or_default();
    println!("started profile={} url={}", globals.profile, base);
    Ok(EXIT_OK)
}

pub async fn stop(globals: &Globals) -> anyhow::Result<u8> {
    if client::stop_daemon(&globals.profile).await? {
        println!("stopped profile={}", globals.profile);
    } else {
        println!("not running profile={}", globals.profile);
    }
    Ok(EXIT_OK)
}

pub async fn list_pages(globals: &Globals) -> anyhow::Result<u8> {
    client::start_daemon(&globals.profile, globals.headless).await?;
    let base = client::daemon_base_url(&globals.profile)
        .context("daemon state missing after start")?;
    let data = client::http_json(
        "GET",
        &format!("{base}/pages"),
        None,
        Duration::from_secs(3),
    )
    .await?;
    client::expect_ok(&data)?;

    let value = serde_json::json!({ "pages": data.get("pages").cloned() });
    let out = write_output(
        &globals.artifact_root()?,
        &globals.output,
        &value,
        &globals.out_path,
    )?;
    println!("{out}");
    Ok(EXIT_OK)
}

pub async fn close_page(globals: &Globals, name: &str) -> anyhow::Result<u8> {
    client::start_daemon(&globals.profile, globals.headless).await?;
    let base = client::daemon_base_url(&globals.profile)
        .context("daemon state missing after start")?;
    let url = format!("{base}/pages/{}", client::urlencode(name));
    let data = client::http_json("DELETE", &url, None, Duration::from_secs(5)).await?;
    client::expect_ok(&data).context("close failed")?;

    let value = serde_json::json!({ "page": name, "closed": true });
    let out = write_output(
        &globals.artifact_root()?,
        &globals.output,
        &value,
        &globals.out_path,
    )?;
    println!("{out}");
    Ok(EXIT_OK)
}
