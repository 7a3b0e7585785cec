//! Fixed analytical questions over the loaded trip tables.
//!
//! Datetime filters are half-open ranges `[start, end)`. Column and table
//! names are spliced into the SQL; every value is bound as a parameter.

use chrono::{Datelike, Days, Months, NaiveDate};
use duckdb::{params, params_from_iter};

use super::{quote_ident, QueryRunner};
use crate::error::QueryError;
use crate::load::TableName;

/// Label for trips whose zone is missing from the lookup or recorded as NULL.
pub const UNKNOWN_ZONE: &str = "Unknown";

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct DateRange {
    pub start: NaiveDate,
    pub end: NaiveDate,
}

impl DateRange {
    pub fn new(start: NaiveDate, end: NaiveDate) -> Self {
        Self { start, end }
    }

    pub fn day(day: NaiveDate) -> Option<Self> {
        Some(Self::new(day, day.checked_add_days(Days::new(1))?))
    }

    pub fn month(year: i32, month: u32) -> Option<Self> {
        let start = NaiveDate::from_ymd_opt(year, month, 1)?;
        Some(Self::new(start, start.checked_add_months(Months::new(1))?))
    }

    pub fn year(year: i32) -> Option<Self> {
        Some(Self::new(
            NaiveDate::from_ymd_opt(year, 1, 1)?,
            NaiveDate::from_ymd_opt(year + 1, 1, 1)?,
        ))
    }

    /// The month containing `date`.
    pub fn month_of(date: NaiveDate) -> Option<Self> {
        Self::month(date.year(), date.month())
    }

    fn bounds(&self) -> (String, String) {
        (
            self.start.format("%Y-%m-%d").to_string(),
            self.end.format("%Y-%m-%d").to_string(),
        )
    }
}

/// A pickup day and the longest trip distance recorded on it.
#[derive(Debug, Clone, PartialEq)]
pub struct TripDay {
    pub day: String,
    pub max_distance: f64,
}

/// A zone and a summed amount attributed to it.
#[derive(Debug, Clone, PartialEq)]
pub struct ZoneTotal {
    pub zone: String,
    pub total: f64,
}

impl QueryRunner<'_> {
    /// Trips picked up in `range` with `trip_distance <= max_distance`.
    pub fn count_short_trips(
        &self,
        trips: &TableName,
        datetime_column: &str,
        range: DateRange,
        max_distance: f64,
    ) -> Result<u64, QueryError> {
        let col = quote_ident(datetime_column);
        let (start, end) = range.bounds();
        let sql = format!(
            "SELECT COUNT(*) FROM {trips} \
             WHERE {col} >= ?::TIMESTAMP AND {col} < ?::TIMESTAMP \
               AND trip_distance <= ?",
            trips = trips.quoted(),
        );
        let count: i64 = self.query_one(
            "count_short_trips",
            &sql,
            params![start, end, max_distance],
            |row| row.get(0),
        )?;
        Ok(count as u64)
    }

    /// The pickup day in `range` with the longest trip under 100 miles.
    pub fn longest_trip_day(
        &self,
        trips: &TableName,
        datetime_column: &str,
        range: DateRange,
    ) -> Result<Option<TripDay>, QueryError> {
        let col = quote_ident(datetime_column);
        let (start, end) = range.bounds();
        let sql = format!(
            "SELECT CAST(CAST(date_trunc('day', {col}) AS DATE) AS VARCHAR) AS day, \
                    CAST(MAX(trip_distance) AS DOUBLE) AS max_dist \
             FROM {trips} \
             WHERE trip_distance < 100 \
               AND {col} >= ?::TIMESTAMP AND {col} < ?::TIMESTAMP \
             GROUP BY day \
             ORDER BY max_dist DESC \
             LIMIT 1",
            trips = trips.quoted(),
        );
        let rows = self.query_all("longest_trip_day", &sql, params![start, end], |row| {
            Ok(TripDay {
                day: row.get(0)?,
                max_distance: row.get(1)?,
            })
        })?;
        Ok(rows.into_iter().next())
    }

    /// Pickup zone with the largest `total_amount` sum in `range`.
    pub fn top_pickup_zone_by_total(
        &self,
        trips: &TableName,
        zones: &TableName,
        datetime_column: &str,
        range: DateRange,
    ) -> Result<Option<ZoneTotal>, QueryError> {
        let col = quote_ident(datetime_column);
        let (start, end) = range.bounds();
        let sql = format!(
            "SELECT COALESCE(z.\"Zone\", '{UNKNOWN_ZONE}') AS pickup_zone_name, \
                    CAST(COALESCE(SUM(g.total_amount), 0) AS DOUBLE) AS total_sum \
             FROM {trips} g \
             JOIN {zones} z ON g.\"PULocationID\" = z.\"LocationID\" \
             WHERE g.{col} >= ?::TIMESTAMP AND g.{col} < ?::TIMESTAMP \
             GROUP BY pickup_zone_name \
             ORDER BY total_sum DESC \
             LIMIT 1",
            trips = trips.quoted(),
            zones = zones.quoted(),
        );
        let rows = self.query_all("top_pickup_zone_by_total", &sql, params![start, end], zone_total)?;
        Ok(rows.into_iter().next())
    }

    /// Drop-off zone with the largest tip sum for trips picked up in
    /// `pickup_zone` during `range`. A non-empty `candidates` list restricts
    /// the drop-off zones considered.
    pub fn top_dropoff_zone_by_tip(
        &self,
        trips: &TableName,
        zones: &TableName,
        datetime_column: &str,
        range: DateRange,
        pickup_zone: &str,
        candidates: &[&str],
    ) -> Result<Option<ZoneTotal>, QueryError> {
        let col = quote_ident(datetime_column);
        let (start, end) = range.bounds();
        let restriction = if candidates.is_empty() {
            String::new()
        } else {
            let placeholders = vec!["?"; candidates.len()].join(", ");
            format!("AND z2.\"Zone\" IN ({placeholders})")
        };
        let sql = format!(
            "SELECT COALESCE(z2.\"Zone\", '{UNKNOWN_ZONE}') AS drop_zone, \
                    CAST(COALESCE(SUM(g.tip_amount), 0) AS DOUBLE) AS tip_sum \
             FROM {trips} g \
             JOIN {zones} z1 ON g.\"PULocationID\" = z1.\"LocationID\" \
             JOIN {zones} z2 ON g.\"DOLocationID\" = z2.\"LocationID\" \
             WHERE z1.\"Zone\" = ? \
               AND g.{col} >= ?::TIMESTAMP AND g.{col} < ?::TIMESTAMP \
               {restriction} \
             GROUP BY drop_zone \
             ORDER BY tip_sum DESC \
             LIMIT 1",
            trips = trips.quoted(),
            zones = zones.quoted(),
        );

        let mut values = vec![pickup_zone.to_string(), start, end];
        values.extend(candidates.iter().map(|c| c.to_string()));
        let rows = self.query_all(
            "top_dropoff_zone_by_tip",
            &sql,
            params_from_iter(values),
            zone_total,
        )?;
        Ok(rows.into_iter().next())
    }

    /// Pickup zones ranked by summed `revenue_monthly_total_amount` over the
    /// revenue months in `months`, highest first.
    pub fn zone_revenue_ranking(
        &self,
        revenue: &TableName,
        service_type: Option<&str>,
        months: DateRange,
        limit: usize,
    ) -> Result<Vec<ZoneTotal>, QueryError> {
        let (start, end) = months.bounds();
        let service_filter = if service_type.is_some() {
            "AND service_type = ?"
        } else {
            ""
        };
        let sql = format!(
            "SELECT COALESCE(pickup_zone, '{UNKNOWN_ZONE}') AS zone_name, \
                    CAST(COALESCE(SUM(revenue_monthly_total_amount), 0) AS DOUBLE) AS total_revenue \
             FROM {revenue} \
             WHERE revenue_month >= ?::DATE AND revenue_month < ?::DATE \
               {service_filter} \
             GROUP BY zone_name \
             ORDER BY total_revenue DESC, zone_name \
             LIMIT {limit}",
            revenue = revenue.quoted(),
        );

        let mut values = vec![start, end];
        values.extend(service_type.map(str::to_string));
        self.query_all("zone_revenue_ranking", &sql, params_from_iter(values), zone_total)
    }

    /// Total trips recorded for `service_type` in the revenue month starting
    /// on `month`. Zero when the month has no rows.
    pub fn monthly_trip_total(
        &self,
        revenue: &TableName,
        service_type: &str,
        month: NaiveDate,
    ) -> Result<u64, QueryError> {
        let sql = format!(
            "SELECT CAST(COALESCE(SUM(total_monthly_trips), 0) AS BIGINT) \
             FROM {revenue} \
             WHERE service_type = ? AND revenue_month = ?::DATE",
            revenue = revenue.quoted(),
        );
        let total: i64 = self.query_one(
            "monthly_trip_total",
            &sql,
            params![service_type, month.format("%Y-%m-%d").to_string()],
            |row| row.get(0),
        )?;
        Ok(total as u64)
    }
}

fn zone_total(row: &duckdb::Row<'_>) -> duckdb::Result<ZoneTotal> {
    Ok(ZoneTotal {
        zone: row.get(0)?,
        total: row.get(1)?,
    })
}
