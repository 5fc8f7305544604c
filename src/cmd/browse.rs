//! Read-only browsing: `orderdesk search` and `orderdesk events`.

use anyhow::Result;
use orderdesk::config::Settings;
use orderdesk::events::EventQuery;
use orderdesk::orders::split_ids;
use orderdesk::query::QueryBuilder;
use orderdesk::store::text_filter;

use super::print_json;

pub async fn cmd_search(settings: &Settings, collection: &str, term: &str) -> Result<()> {
    let state = super::open_state(settings)?;
    let store = state.db.collection(collection);
    let filter = text_filter(store.as_ref(), &QueryBuilder::new(), term).await?;
    tracing::debug!(filter = %filter.to_json(), "collection search");
    let docs = store.find(&filter).await?;
    eprintln!("{} match(es) in {}", docs.len(), collection);
    print_json(&docs)
}

pub async fn cmd_events(
    settings: &Settings,
    text: Option<String>,
    order_id: Option<String>,
    types: Option<&str>,
) -> Result<()> {
    let state = super::open_state(settings)?;
    let query = EventQuery {
        text,
        order_id,
        event_types: types.map(split_ids).unwrap_or_default(),
    };
    for e in state.events.search(&query).await? {
        println!(
            "{}  {:<12} {:<12} {}",
            e.created_label, e.event_type, e.order_id, e.activity
        );
    }
    Ok(())
}
