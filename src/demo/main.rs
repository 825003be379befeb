/**
 * Contact Sync Demo
 *
 * Runs a `ContactSync` against the in-memory store and walks through the
 * moving parts: initial load, writes from another client, a dropped change
 * feed with re-seed, and a local create.
 */

#[cfg(feature = "demo")]
#[tokio::main]
async fn main() -> Result<(), Box<dyn std::error::Error>> {
    use contact_sync::{
        ContactFilter, ContactInput, ContactPatch, ContactSync, ContactType, InMemoryContactStore,
        SyncConfig,
    };
    use std::sync::Arc;
    use std::time::Duration;

    // Load environment variables from .env file if present
    dotenv::dotenv().ok();

    let env_filter = std::env::var("RUST_LOG").unwrap_or_else(|_| "info".to_string());
    tracing_subscriber::fmt()
        .with_env_filter(tracing_subscriber::EnvFilter::new(&env_filter))
        .init();

    let config = SyncConfig::from_env()?;
    let store = Arc::new(InMemoryContactStore::new(config.table.clone()));

    for (contact_type, name) in [
        (ContactType::Lead, "Ada Lovelace"),
        (ContactType::Lead, "Alan Turing"),
        (ContactType::Client, "Grace Hopper"),
    ] {
        store.remote_insert(ContactInput::new(contact_type, name)).await?;
    }

    let leads = ContactFilter::builder().contact_type(ContactType::Lead).build()?;
    let sync = ContactSync::open(store.clone(), store.clone(), config, leads).await;
    log_view("after initial load", &sync);

    // Another client adds a lead and converts an existing one into a client.
    let newcomer = store
        .remote_insert(ContactInput::new(ContactType::Lead, "Katherine Johnson"))
        .await?;
    if let Some(first) = sync.current_view().first() {
        store
            .remote_update(&first.id, ContactPatch::default().contact_type(ContactType::Client))
            .await?;
    }
    tokio::time::sleep(Duration::from_millis(50)).await;
    log_view("after remote writes", &sync);

    // Cut the feed; writes made during the gap come back through the re-seed.
    store.drop_connections();
    store
        .remote_update(&newcomer.id, ContactPatch::default().status("qualified"))
        .await?;
    tokio::time::sleep(Duration::from_secs(1)).await;
    log_view("after reconnect", &sync);

    let created = sync
        .create(ContactInput::new(ContactType::Lead, "Margaret Hamilton"))
        .await?;
    tracing::info!("[Demo] Created {} ({})", created.display_name(), created.id);
    log_view("after local create", &sync);

    let state = sync.state();
    tracing::info!(
        "[Demo] realtime={} subscription={:?} error={:?}",
        state.realtime_enabled,
        state.subscription_state,
        state.error
    );

    sync.shutdown().await;
    Ok(())
}

#[cfg(feature = "demo")]
fn log_view(label: &str, sync: &contact_sync::ContactSync) {
    let view = sync.current_view();
    tracing::info!("[Demo] {}: {} contact(s)", label, view.len());
    for contact in view.iter() {
        tracing::info!(
            "[Demo]   {:<3} {:<20} {:<8} {}",
            contact.initials(),
            contact.display_name(),
            contact.contact_type,
            contact.status
        );
    }
}

#[cfg(not(feature = "demo"))]
fn main() {
    eprintln!("The demo requires the 'demo' feature to be enabled.");
    eprintln!("Run with: cargo run --bin contact-sync-demo --features demo");
    std::process::exit(1);
}
