use anyhow::{Context, Result};
use chrono::Utc;
use hermes_client::{HermesClient, Identifier};
use tracing_subscriber::EnvFilter;

fn main() -> Result<()> {
    // RUST_LOG=hermes_client=debug shows every request.
    tracing_subscriber::fmt()
        .with_env_filter(EnvFilter::from_default_env())
        .init();

    // Configure the service via HERMES_URL or a `.hermesrc` file.
    let client = HermesClient::from_env()?;

    let mut args = std::env::args().skip(1);
    let series = args
        .next()
        .context("usage: latest_forecast_rates <forecastseries> [project]")?;
    let project = args.next().map(Identifier::from);

    let series = client.forecastseries(series, project)?;
    let Some(forecast) = series.get_forecast_by_time(Utc::now(), "previous")? else {
        println!("{:?} has no completed forecast yet", series);
        return Ok(());
    };
    println!("{:?}", forecast);

    for run in forecast.model_runs() {
        println!("  {:?}", run);
        for grid in run.results()? {
            let events: f64 = grid
                .rows
                .iter()
                .filter_map(|r| r.number("number_events"))
                .sum();
            println!(
                "    {} .. {}: {} cells, {:.3} expected events",
                grid.starttime,
                grid.endtime,
                grid.len(),
                events
            );
        }
    }
    Ok(())
}
