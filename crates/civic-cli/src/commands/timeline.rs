use civic_core::backend::Backend;
use civic_core::config::{ClientConfig, SyncSettings};
use civic_core::ComplaintId;

use crate::commands::common::{
    connect, format_timeline_lines, update_to_timeline_item, TimelineItem,
};
use crate::error::CliError;

pub async fn run_timeline(
    config: &ClientConfig,
    complaint_id: &str,
    as_json: bool,
) -> Result<(), CliError> {
    let complaint_id: ComplaintId = complaint_id.parse()?;
    let backend = connect(config, &SyncSettings::default())?;
    let updates = backend.fetch_timeline(&complaint_id).await?;

    if as_json {
        let json_items = updates
            .iter()
            .map(update_to_timeline_item)
            .collect::<Vec<TimelineItem>>();
        println!("{}", serde_json::to_string_pretty(&json_items)?);
        return Ok(());
    }

    if updates.is_empty() {
        println!("No updates yet.");
        return Ok(());
    }

    for line in format_timeline_lines(&updates) {
        println!("{line}");
    }
    Ok(())
}
