//! Effective configuration: `orderdesk config`.

use anyhow::Result;
use orderdesk::config::Settings;

pub fn cmd_config(settings: &Settings) -> Result<()> {
    let d = &settings.dashboard;
    println!();
    println!("Order desk configuration");
    println!("========================");
    println!();
    println!("[inputs]");
    println!("  document_type = {:?}", d.inputs.document_type);
    for (country, code) in &d.inputs.country_code {
        println!("  country_code.{} = \"{}\"", country, code);
    }
    println!("  admin_id = \"{}\"", d.admin_id());
    println!();
    println!("[database]");
    println!("  db_name = \"{}\"", d.database.db_name);
    println!("  collection = \"{}\"", d.database.collection);
    println!();
    println!("[agent]");
    println!("  endpoint = \"{}\"", d.agent.endpoint);
    println!("  search_timeout_secs = {}", d.agent.search_timeout_secs);
    println!("  validation_timeout_secs = {}", d.agent.validation_timeout_secs);
    println!("  poll_interval_secs = {}", d.agent.poll_interval_secs);
    println!("  research_timeout_secs = {}", d.agent.research_timeout_secs);
    println!();
    if !d.kyc.nations.is_empty() {
        println!("[kyc]");
        for (nation, documents) in &d.kyc.nations {
            println!("  nations.{} = {:?}", nation, documents);
        }
        println!("  possible_doc_type = {:?}", d.kyc.possible_doc_type);
        println!();
    }
    println!("Effective values (with env overrides):");
    println!("  store = {}", settings.db_path.display());
    match &settings.blob {
        Some(blob) => println!("  blobs = azure, container \"{}\"", blob.container),
        None => println!("  blobs = local, {}", settings.blob_dir.display()),
    }
    println!();
    Ok(())
}
