use chrono::Utc;
use civic_core::backend::Backend;
use civic_core::config::{ClientConfig, SyncSettings};
use civic_core::CitizenId;

use crate::commands::common::{
    complaint_to_list_item, connect, format_complaint_lines, ComplaintListItem,
};
use crate::error::CliError;

pub async fn run_complaints(
    config: &ClientConfig,
    citizen: &str,
    as_json: bool,
) -> Result<(), CliError> {
    let citizen_id: CitizenId = citizen.parse()?;
    let backend = connect(config, &SyncSettings::default())?;
    let complaints = backend.fetch_complaints(&citizen_id).await?;

    if as_json {
        let now = Utc::now();
        let json_items = complaints
            .iter()
            .map(|complaint| complaint_to_list_item(complaint, now))
            .collect::<Vec<ComplaintListItem>>();
        println!("{}", serde_json::to_string_pretty(&json_items)?);
        return Ok(());
    }

    if complaints.is_empty() {
        println!("No complaints filed yet.");
        return Ok(());
    }

    for line in format_complaint_lines(&complaints) {
        println!("{line}");
    }
    Ok(())
}
