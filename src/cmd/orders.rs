//! Order commands: `orderdesk orders ...`.

use anyhow::Result;
use orderdesk::config::Settings;
use orderdesk::orders::NewOrder;
use serde_json::json;

use super::super::OrdersCommands;
use super::print_json;

pub async fn cmd_orders(settings: &Settings, command: OrdersCommands) -> Result<()> {
    let state = super::open_state(settings)?;
    let orders = &state.orders;

    match command {
        OrdersCommands::Add {
            order,
            email,
            country,
            phone,
            documents,
            due,
        } => {
            let new = NewOrder {
                order,
                email,
                country,
                phone,
                documents,
                due,
            };
            let ids = orders.place(&new).await?;
            println!("Order {} placed with {} document(s).", new.order, ids.len());
        }
        OrdersCommands::Delete { ids } => {
            let deleted = orders.delete(&ids).await?;
            println!("Deleted {} record(s).", deleted);
        }
        OrdersCommands::List { ids } => print_json(&orders.list(ids.as_deref()).await?)?,
        OrdersCommands::Stats => {
            let stats = orders.statistics().await?;
            let progress = orders.progress().await?;
            print_json(&json!({"stats": stats, "progress": progress}))?;
        }
        OrdersCommands::Missing { order } => {
            let missing = orders.missing_documents(&order).await?;
            if missing.is_empty() {
                println!("Order {} has no outstanding documents.", order);
            } else {
                for m in &missing {
                    println!("{}", m.document);
                }
            }
        }
    }
    Ok(())
}
