//! adwatchd - Active Directory change-data-capture daemon
//!
//! Usage:
//!   # capture loop against a domain controller
//!   adwatchd --base-dn DC=corp,DC=example \
//!     --controller-fqdn dc01.corp.example \
//!     --username svc-adwatch --password ... \
//!     --dsn postgres://adwatch:pw@localhost/adwatch \
//!     run --init-schema
//!
//!   # inspect what the parser sees for a filter
//!   adwatchd ... dump "(objectClass=group)"
//!
//! All options also read ADWATCH_* environment variables.

use std::sync::Arc;

use anyhow::Context;
use clap::Parser;
use tokio::sync::broadcast;
use tracing::info;
use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt};

use adwatch_directory::{
    Directory, EntryParser, HeaderSdParser, LdapDirectoryClient, SchemaRegistry,
};
use adwatch_store::{
    AttributeSchemaRecord, DomainRecord, PgStore, VersionStore, VersioningService,
};
use adwatchd::{Cli, Command, Orchestrator, OrchestratorConfig};

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    let cli = Cli::parse();

    tracing_subscriber::registry()
        .with(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| cli.log_level.clone().into()),
        )
        .with(tracing_subscriber::fmt::layer())
        .init();

    if let Err(e) = cli.validate() {
        eprintln!("Configuration error: {e}");
        std::process::exit(1);
    }

    match cli.command.clone().unwrap_or(Command::Run { init_schema: false }) {
        Command::Run { init_schema } => run_capture(&cli, init_schema).await,
        Command::Dump { filter } => dump(&cli, &filter).await,
        Command::ResetDb => reset_db(&cli).await,
    }
}

/// Bind, load the schema, bootstrap the domain row and run the loop.
async fn run_capture(cli: &Cli, init_schema: bool) -> anyhow::Result<()> {
    let (directory, registry) = connect_directory(cli).await?;

    let dsn = cli.dsn.as_deref().context("--dsn is required")?;
    let store = Arc::new(PgStore::connect(dsn)?);
    if init_schema {
        store.apply_schema().await?;
    }

    let domain_id = directory.domain_guid().await?;
    let highest = directory.highest_committed_usn().await?;
    info!(%domain_id, highest_usn = highest, "domain resolved");

    store
        .init_domain(&DomainRecord {
            domain_id,
            base_dn: cli.base_dn.clone(),
            controller_fqdn: cli.controller_fqdn.clone(),
            highest_usn: highest,
            last_processed_usn: 0,
        })
        .await?;

    // The directory schema wins over whatever a previous run stored.
    for schema in registry.attribute_schemas() {
        store
            .upsert_attribute_schema(
                domain_id,
                &AttributeSchemaRecord {
                    schema_object_guid: schema.schema_object_guid,
                    ldap_display_name: schema.ldap_display_name.clone(),
                    attribute_name: schema.attribute_name.clone(),
                    attribute_id: schema.attribute_id.clone(),
                    syntax_oid: schema.syntax_oid.clone(),
                    om_syntax: schema.om_syntax.clone(),
                    is_single_valued: schema.is_single_valued,
                },
            )
            .await?;
    }

    let initial_watermark = store
        .domain(domain_id)
        .await?
        .map(|d| d.last_processed_usn)
        .unwrap_or(0);

    let parser = EntryParser::new(registry.clone(), Arc::new(HeaderSdParser));
    let store_dyn: Arc<dyn VersionStore> = store.clone();
    let versioning = VersioningService::new(store_dyn.clone(), registry, domain_id);

    let mut orchestrator = Orchestrator::new(
        directory,
        parser,
        versioning,
        store_dyn,
        domain_id,
        OrchestratorConfig {
            poll_interval: std::time::Duration::from_millis(cli.poll_interval_ms),
            batch_timeout: std::time::Duration::from_secs(cli.batch_timeout_secs),
            initial_watermark,
        },
    );

    let (shutdown_tx, shutdown_rx) = broadcast::channel::<()>(1);
    tokio::spawn(async move {
        let _ = tokio::signal::ctrl_c().await;
        info!("shutdown signal received");
        let _ = shutdown_tx.send(());
    });

    orchestrator.run(shutdown_rx).await;
    Ok(())
}

/// Fetch entries matching a filter and print their decoded attributes.
async fn dump(cli: &Cli, filter: &str) -> anyhow::Result<()> {
    let (directory, registry) = connect_directory(cli).await?;
    let parser = EntryParser::new(registry, Arc::new(HeaderSdParser));

    let entries = directory.collect_changes(filter).await?;
    for result in parser.parse_entries(&entries) {
        let object = match result {
            Ok(object) => object,
            Err(e) => {
                eprintln!("skipping entry: {e}");
                continue;
            }
        };

        println!("{}", "─".repeat(80));
        println!("DN: {}", object.dn);
        println!("objectGUID: {}", object.object_guid);
        println!("objectClass: {}", object.primary_object_class);
        println!("{}", "─".repeat(80));

        let mut names: Vec<&String> = object.attributes.keys().collect();
        names.sort();
        for name in names {
            let attr = &object.attributes[name];
            println!(
                "  {} ({}):",
                attr.name, attr.schema.field_type.syntax_name
            );
            if attr.normalized.is_empty() {
                println!("    [no values]");
            }
            for value in &attr.normalized {
                println!("    {value}");
            }
        }
    }
    Ok(())
}

/// Drop and recreate the capture database, then apply the schema.
async fn reset_db(cli: &Cli) -> anyhow::Result<()> {
    let dsn = cli.dsn.as_deref().context("--dsn is required")?;
    let management_dsn = cli
        .management_dsn
        .as_deref()
        .context("--management-dsn is required")?;

    let config: tokio_postgres::Config = dsn.parse().context("invalid --dsn")?;
    let database = config
        .get_dbname()
        .context("--dsn must name a database")?
        .to_string();

    adwatch_store::postgres::recreate_database(management_dsn, &database).await?;

    let store = PgStore::connect(dsn)?;
    store.apply_schema().await?;
    info!(database, "reset complete");
    Ok(())
}

/// Dial, bind and load the attribute schema.
async fn connect_directory(cli: &Cli) -> anyhow::Result<(Directory, Arc<SchemaRegistry>)> {
    let client = LdapDirectoryClient::connect(&cli.ldap_url(), &cli.username, &cli.password)
        .await
        .context("failed to connect to the domain controller")?;

    let directory = Directory::new(Arc::new(client), &cli.base_dn, cli.page_size);

    let mut registry = SchemaRegistry::new(Arc::new(HeaderSdParser));
    let loaded = directory
        .load_schema(&mut registry)
        .await
        .context("schema load failed")?;
    info!(attributes = loaded, "attribute schema loaded");

    Ok((directory, Arc::new(registry)))
}
