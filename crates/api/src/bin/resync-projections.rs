#![cfg_attr(test, allow(clippy::unwrap_used))]

//! Profile projection re-sync
//!
//! Recomputes `active_plan_id` / `subscription_status` on seller profiles from
//! the `seller_subscriptions` rows. Use after a projection write failed or
//! after fixing rows by hand.
//!
//! Usage:
//!   cargo run --bin resync-projections
//!   cargo run --bin resync-projections -- --dry-run
//!   cargo run --bin resync-projections -- --seller 1b4e28ba-2fa1-11d2-883f-0016d3cca427
//!
//! Environment:
//! - DATABASE_URL: PostgreSQL connection string

use std::env;
use std::sync::Arc;

use anyhow::{bail, Context};
use bazaar_billing::{PgBillingStore, StateProjector};
use bazaar_shared::SellerId;
use uuid::Uuid;

#[derive(Debug, Default)]
struct Args {
    seller: Option<SellerId>,
    dry_run: bool,
}

fn parse_args(args: impl IntoIterator<Item = String>) -> anyhow::Result<Args> {
    let mut parsed = Args::default();
    let mut args = args.into_iter();

    while let Some(arg) = args.next() {
        match arg.as_str() {
            "--dry-run" => parsed.dry_run = true,
            "--seller" => {
                let raw = args.next().context("--seller requires a UUID")?;
                let id = Uuid::parse_str(&raw)
                    .with_context(|| format!("invalid seller id: {}", raw))?;
                parsed.seller = Some(SellerId(id));
            }
            other => bail!("unknown argument: {}", other),
        }
    }

    Ok(parsed)
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    dotenvy::dotenv().ok();
    bazaar_api::init_tracing(bazaar_api::LogFormat::Pretty);

    let args = parse_args(env::args().skip(1))?;

    let database_url = env::var("DATABASE_URL").context("DATABASE_URL must be set")?;
    let pool = bazaar_shared::create_pool(&database_url, 2)
        .await
        .context("failed to connect to database")?;

    let projector = StateProjector::new(Arc::new(PgBillingStore::new(pool)));

    if args.dry_run {
        println!("DRY RUN - projections are computed but not written\n");
    }

    if let Some(seller_id) = args.seller {
        let projection = if args.dry_run {
            projector.compute(seller_id).await?
        } else {
            projector.project(seller_id).await?
        };
        println!(
            "{}  plan={}  status={}",
            seller_id,
            projection.active_plan_id,
            projection
                .subscription_status
                .map(|s| s.to_string())
                .unwrap_or_else(|| "-".to_string())
        );
        return Ok(());
    }

    let report = projector.project_all(args.dry_run).await?;

    for (seller_id, projection) in &report.projected {
        println!(
            "{}  plan={}  status={}",
            seller_id,
            projection.active_plan_id,
            projection
                .subscription_status
                .map(|s| s.to_string())
                .unwrap_or_else(|| "-".to_string())
        );
    }
    for (seller_id, error) in &report.failed {
        eprintln!("{}  FAILED: {}", seller_id, error);
    }

    println!(
        "\n{} projected, {} failed",
        report.projected.len(),
        report.failed.len()
    );

    if !report.failed.is_empty() {
        bail!("{} sellers could not be re-synced", report.failed.len());
    }

    Ok(())
}
