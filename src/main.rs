use std::path::PathBuf;

use anyhow::{bail, Context, Result};
use chrono::NaiveDate;
use clap::{Parser, Subcommand};
use taxi_ingest::config::{
    IngestConfig, LoadMode, PipelineConfig, SeriesConfig, DEFAULT_BATCH_SIZE,
};
use taxi_ingest::decode::SourceFormat;
use taxi_ingest::fetch::series::Service;
use taxi_ingest::query::{ColumnDetection, DateRange, QueryRunner, PICKUP_DATETIME_CANDIDATES};
use taxi_ingest::{DuckDestination, Ingestor, TableName};
use tracing::{info, warn};
use tracing_subscriber::{fmt, EnvFilter};

const DEFAULT_DB: &str = "taxi_rides_ny.duckdb";

#[derive(Parser)]
#[command(name = "taxi-ingest", about = "Load NYC taxi trip data into DuckDB and query it")]
struct Cli {
    #[command(subcommand)]
    command: Command,
}

#[derive(Subcommand)]
enum Command {
    /// Download one file and load it into a table.
    Ingest {
        #[arg(long)]
        url: String,
        #[arg(long)]
        table: String,
        #[arg(long, default_value = DEFAULT_DB)]
        db: String,
        #[arg(long, default_value_t = DEFAULT_BATCH_SIZE)]
        batch_size: usize,
        #[arg(long, value_enum, default_value_t = LoadMode::ReplaceThenAppend)]
        mode: LoadMode,
        #[arg(long, value_enum)]
        format: Option<SourceFormat>,
        #[arg(long)]
        temp_dir: Option<PathBuf>,
    },
    /// Run every job in a YAML file, or in $TAXI_INGEST_CONFIG when no file is given.
    Run {
        #[arg(long)]
        config: Option<PathBuf>,
    },
    /// Load a monthly trip series (one file per month) into a single table.
    Series {
        #[arg(long, value_enum)]
        service: Service,
        #[arg(long = "year", required = true, num_args = 1..)]
        years: Vec<i32>,
        #[arg(long = "month", num_args = 1..)]
        months: Vec<u32>,
        #[arg(long)]
        table: String,
        #[arg(long, default_value = DEFAULT_DB)]
        db: String,
        #[arg(long)]
        base_url: Option<String>,
        #[arg(long, default_value_t = DEFAULT_BATCH_SIZE)]
        batch_size: usize,
        #[arg(long, value_enum)]
        format: Option<SourceFormat>,
        #[arg(long)]
        temp_dir: Option<PathBuf>,
    },
    /// Print the trip report for one month.
    Report {
        #[arg(long, default_value = DEFAULT_DB)]
        db: String,
        #[arg(long, default_value = "green_taxi_trips")]
        table: String,
        #[arg(long, default_value = "zones")]
        zones: String,
        /// YYYY-MM
        #[arg(long, default_value = "2025-11")]
        month: String,
        /// YYYY-MM-DD
        #[arg(long, default_value = "2025-11-18")]
        day: String,
        #[arg(long, default_value = "East Harlem North")]
        pickup_zone: String,
        /// Drop-off zones to consider for the tip question; all when empty.
        #[arg(long = "candidate")]
        candidates: Vec<String>,
        /// Monthly zone revenue table to rank, e.g. prod.fct_monthly_zone_revenue.
        #[arg(long)]
        revenue: Option<String>,
        #[arg(long, default_value = "Green")]
        service_type: String,
        #[arg(long, default_value_t = 2020)]
        revenue_year: i32,
        /// Staged FHV trip table to count, e.g. prod.stg_fhv_tripdata.
        #[arg(long)]
        fhv_table: Option<String>,
    },
}

#[tokio::main(flavor = "current_thread")]
async fn main() -> Result<()> {
    let env = EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info"));
    fmt::Subscriber::builder()
        .with_env_filter(env)
        .with_span_events(fmt::format::FmtSpan::CLOSE)
        .init();

    match Cli::parse().command {
        Command::Ingest {
            url,
            table,
            db,
            batch_size,
            mode,
            format,
            temp_dir,
        } => {
            let mut config = IngestConfig::new(url, table)
                .with_batch_size(batch_size)
                .with_mode(mode)
                .with_format(format);
            if let Some(dir) = temp_dir {
                config = config.with_temp_dir(dir);
            }
            let dest = open_db(&db)?;
            let mut ingestor = Ingestor::new(config, dest)?;
            let report = ingestor.ingest().await?;
            println!("{}: {} rows into {}", report.url, report.rows, report.table);
        }
        Command::Run { config } => {
            let pipeline = match config {
                Some(path) => PipelineConfig::from_file(&path)?,
                None => PipelineConfig::from_env()?,
            };
            pipeline.validate()?;
            run_pipeline(pipeline).await?;
        }
        Command::Series {
            service,
            years,
            months,
            table,
            db,
            base_url,
            batch_size,
            format,
            temp_dir,
        } => {
            let mut series = SeriesConfig::new(service, years, table);
            series.months = (!months.is_empty()).then_some(months);
            series.base_url = base_url;
            series.batch_size = batch_size;
            series.format = format;
            series.temp_dir = temp_dir;
            series.validate()?;
            let mut dest = open_db(&db)?;
            dest = run_series(&series, dest).await?;
            let table = TableName::parse(&series.table_name)?;
            let rows = QueryRunner::new(dest.connection()).row_count(&table)?;
            println!("{}: {} rows", table, rows);
        }
        Command::Report {
            db,
            table,
            zones,
            month,
            day,
            pickup_zone,
            candidates,
            revenue,
            service_type,
            revenue_year,
            fhv_table,
        } => {
            let dest = open_db(&db)?;
            let runner = QueryRunner::new(dest.connection());
            let trips = TableName::parse(&table)?;
            let zones = TableName::parse(&zones)?;

            let month_range = parse_month(&month)?;
            let day = NaiveDate::parse_from_str(&day, "%Y-%m-%d")
                .with_context(|| format!("--day {day} is not YYYY-MM-DD"))?;
            let day_range = DateRange::day(day).context("--day is out of range")?;

            runner.require_table(&trips)?;
            let dt_col = match runner.detect_column(&trips, PICKUP_DATETIME_CANDIDATES)? {
                ColumnDetection::Found(column) => column,
                ColumnDetection::NotFound => bail!(
                    "table {} has none of the pickup datetime columns {:?}",
                    trips,
                    PICKUP_DATETIME_CANDIDATES
                ),
            };
            info!(table = %trips, column = %dt_col, "using pickup datetime column");

            let short = runner.count_short_trips(&trips, &dt_col, month_range, 1.0)?;
            println!("Trips in {month} with trip_distance <= 1: {short}");

            match runner.longest_trip_day(&trips, &dt_col, month_range)? {
                Some(d) => println!("Day with the longest trip: {} ({} miles)", d.day, d.max_distance),
                None => println!("Day with the longest trip: no trips"),
            }

            runner.require_table(&zones)?;
            match runner.top_pickup_zone_by_total(&trips, &zones, &dt_col, day_range)? {
                Some(z) => println!("Top pickup zone by total_amount on {day}: {} ({:.2})", z.zone, z.total),
                None => println!("Top pickup zone by total_amount on {day}: no trips"),
            }

            let candidates: Vec<&str> = candidates.iter().map(String::as_str).collect();
            match runner.top_dropoff_zone_by_tip(
                &trips,
                &zones,
                &dt_col,
                month_range,
                &pickup_zone,
                &candidates,
            )? {
                Some(z) => println!(
                    "Top drop-off zone by tip for pickups in {pickup_zone}: {} ({:.2})",
                    z.zone, z.total
                ),
                None => println!("Top drop-off zone by tip for pickups in {pickup_zone}: no trips"),
            }

            if let Some(fhv) = fhv_table {
                let fhv = TableName::parse(&fhv)?;
                println!("Rows in {}: {}", fhv, runner.row_count(&fhv)?);
            }

            if let Some(revenue) = revenue {
                let revenue = TableName::parse(&revenue)?;
                runner.require_table(&revenue)?;
                println!("Rows in {}: {}", revenue, runner.row_count(&revenue)?);

                let year = DateRange::year(revenue_year).context("--revenue-year is out of range")?;
                let ranking =
                    runner.zone_revenue_ranking(&revenue, Some(service_type.as_str()), year, 5)?;
                println!("Top {service_type} zones by revenue in {revenue_year}:");
                for zone in &ranking {
                    println!("  {}: {:.2}", zone.zone, zone.total);
                }

                let trips_total =
                    runner.monthly_trip_total(&revenue, &service_type, month_range.start)?;
                println!("{service_type} trips in {month}: {trips_total}");
            }
        }
    }

    Ok(())
}

async fn run_pipeline(pipeline: PipelineConfig) -> Result<()> {
    let mut dest = open_db(&pipeline.database)?;
    for job in pipeline.jobs {
        let mut ingestor = Ingestor::new(job, dest)?;
        let report = ingestor.ingest().await?;
        println!("{}: {} rows into {}", report.url, report.rows, report.table);
        dest = ingestor.into_destination();
    }
    for series in &pipeline.series {
        dest = run_series(series, dest).await?;
    }
    Ok(())
}

async fn run_series(series: &SeriesConfig, dest: DuckDestination) -> Result<DuckDestination> {
    let urls = series.series().urls();
    if urls.is_empty() {
        warn!(table = %series.table_name, "series has no months; nothing to do");
        return Ok(dest);
    }
    let mut ingestor = Ingestor::new(series.ingest_config(), dest)?;
    let reports = ingestor.ingest_all(&urls).await?;
    for report in &reports {
        println!("{}: {} rows into {}", report.url, report.rows, report.table);
    }
    Ok(ingestor.into_destination())
}

fn open_db(path: &str) -> Result<DuckDestination> {
    DuckDestination::open(path).with_context(|| format!("failed to open database {path}"))
}

fn parse_month(month: &str) -> Result<DateRange> {
    let first = NaiveDate::parse_from_str(&format!("{month}-01"), "%Y-%m-%d")
        .with_context(|| format!("--month {month} is not YYYY-MM"))?;
    DateRange::month_of(first).context("--month is out of range")
}
