use std::sync::Arc;

use chrono::Utc;
use civic_core::config::{ClientConfig, SyncSettings};
use civic_core::{CitizenId, ComplaintId, SyncHandle};

use crate::commands::common::{connect, format_snapshot_lines};
use crate::error::CliError;

pub async fn run_watch(
    config: &ClientConfig,
    citizen: &str,
    select: Option<&str>,
) -> Result<(), CliError> {
    let citizen_id: CitizenId = citizen.parse()?;
    let selection = select.map(str::parse::<ComplaintId>).transpose()?;

    let settings = SyncSettings::default();
    let backend = Arc::new(connect(config, &settings)?);
    let handle = SyncHandle::start(backend, citizen_id, settings).await?;

    let result = follow(&handle, selection).await;
    handle.teardown().await;
    result
}

async fn follow(handle: &SyncHandle, selection: Option<ComplaintId>) -> Result<(), CliError> {
    let mut changes = handle.changes();
    handle.load().await?;
    if let Some(complaint_id) = selection {
        handle.select(complaint_id).await?;
    }
    print_view(handle).await;
    changes.borrow_and_update();

    loop {
        tokio::select! {
            signal = tokio::signal::ctrl_c() => {
                signal?;
                println!("Stopping live view");
                return Ok(());
            }
            changed = changes.changed() => {
                if changed.is_err() {
                    return Ok(());
                }
                print_view(handle).await;
            }
        }
    }
}

async fn print_view(handle: &SyncHandle) {
    let snapshot = handle.snapshot().await;
    println!();
    for line in format_snapshot_lines(&snapshot, Utc::now()) {
        println!("{line}");
    }
}
