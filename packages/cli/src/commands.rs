use std::path::Path;
use std::sync::Arc;
use std::time::Duration;

use anyhow::{Context, bail};
use api::{Instance, PushConfigOptions};
use common::cid::Cid;
use common::job::{Job, JobId, JobStatus};
use common::tiers::HotStorage;
use tokio::fs;
use tokio::sync::mpsc;
use tokio_util::sync::CancellationToken;
use tracing::debug;

use crate::node::Node;

/// How long `store` waits for its job to settle.
pub const STORE_TIMEOUT: Duration = Duration::from_secs(60);

async fn instance(node: &Node, token: &str) -> anyhow::Result<Arc<Instance>> {
    node.manager
        .get_by_token(token)
        .await
        .context("Failed to authenticate token")
}

fn parse_cid(cid: &str) -> anyhow::Result<Cid> {
    cid.parse()
        .with_context(|| format!("Invalid cid '{cid}'"))
}

pub async fn create(node: &Node) -> anyhow::Result<()> {
    let (id, token) = node
        .manager
        .create()
        .await
        .context("Failed to create instance")?;
    println!("Instance created with id {id} and token {token}.");
    Ok(())
}

pub async fn add(node: &Node, token: &str, file: &Path) -> anyhow::Result<()> {
    instance(node, token).await?;
    let reader = fs::File::open(file)
        .await
        .with_context(|| format!("Failed to open {}", file.display()))?;
    let cid = node
        .hot
        .add(Box::new(reader))
        .await
        .with_context(|| format!("Failed to import {}", file.display()))?;
    println!("{cid}");
    Ok(())
}

pub async fn store(node: &Node, token: &str, cid: &str, override_config: bool) -> anyhow::Result<()> {
    let instance = instance(node, token).await?;
    let cid = parse_cid(cid)?;

    let jid = instance
        .push_config(cid, PushConfigOptions::new().with_override(override_config))
        .await
        .with_context(|| format!("Failed to push config for {cid}"))?;
    println!("Job {jid} queued for {cid}");

    let job = tokio::time::timeout(STORE_TIMEOUT, wait_final(&instance, &jid))
        .await
        .with_context(|| format!("Timed out waiting for job {jid}"))??;
    if job.status != JobStatus::Success {
        let cause = job.error_cause.as_deref().unwrap_or("no cause recorded");
        bail!("Job {} ended as {}: {cause}", job.id, job.status);
    }
    println!("Job {} finished successfully", job.id);
    Ok(())
}

async fn wait_final(instance: &Instance, jid: &JobId) -> anyhow::Result<Job> {
    let (tx, mut rx) = mpsc::channel(8);
    let cancel = CancellationToken::new();
    let watch = instance.watch_jobs(cancel.clone(), tx, std::slice::from_ref(jid));

    let follow = async {
        while let Some(job) = rx.recv().await {
            debug!(job_id = %job.id, status = %job.status, "Job update");
            if job.status.is_final() {
                cancel.cancel();
                return Some(job);
            }
        }
        None
    };

    let (watched, job) = tokio::join!(watch, follow);
    watched.context("Failed to watch job")?;
    job.with_context(|| format!("Job {jid} updates ended before it finished"))
}

pub async fn get(
    node: &Node,
    token: &str,
    cid: &str,
    out: &Path,
    from_cold: bool,
) -> anyhow::Result<()> {
    let instance = instance(node, token).await?;
    let cid = parse_cid(cid)?;

    let mut reader = if from_cold {
        instance.get_from_cold(&cid).await
    } else {
        instance.get(&cid).await
    }
    .with_context(|| format!("Failed to retrieve {cid}"))?;

    if let Some(dir) = out.parent().filter(|d| !d.as_os_str().is_empty()) {
        fs::create_dir_all(dir)
            .await
            .with_context(|| format!("Failed to create {}", dir.display()))?;
    }
    let mut file = fs::File::create(out)
        .await
        .with_context(|| format!("Failed to create {}", out.display()))?;
    let written = tokio::io::copy(&mut reader, &mut file)
        .await
        .with_context(|| format!("Failed to write {}", out.display()))?;
    println!("Wrote {written} bytes to {}", out.display());
    Ok(())
}

pub async fn show(node: &Node, token: &str, cid: &str) -> anyhow::Result<()> {
    let instance = instance(node, token).await?;
    let cid = parse_cid(cid)?;
    let info = instance
        .show(&cid)
        .await
        .with_context(|| format!("Failed to show {cid}"))?;
    println!("{}", serde_json::to_string_pretty(&info)?);
    Ok(())
}

pub async fn info(node: &Node, token: &str) -> anyhow::Result<()> {
    let instance = instance(node, token).await?;
    let info = instance
        .info()
        .await
        .context("Failed to get instance info")?;
    println!("{}", serde_json::to_string_pretty(&info)?);
    Ok(())
}

pub async fn remove(node: &Node, token: &str, cid: &str) -> anyhow::Result<()> {
    let instance = instance(node, token).await?;
    let cid = parse_cid(cid)?;
    instance
        .remove(&cid)
        .await
        .with_context(|| format!("Failed to remove {cid}"))?;
    println!("Removed {cid}");
    Ok(())
}
