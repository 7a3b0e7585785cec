use serde::{Deserialize, Serialize};

pub const DEFAULT_BASE_URL: &str = "https://github.com/DataTalksClub/nyc-tlc-data/releases/download";

/// TLC trip record feeds published as monthly `.csv.gz` files.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Deserialize, Serialize, clap::ValueEnum)]
#[serde(rename_all = "snake_case")]
pub enum Service {
    Yellow,
    Green,
    Fhv,
}

impl Service {
    pub fn as_str(&self) -> &'static str {
        match self {
            Service::Yellow => "yellow",
            Service::Green => "green",
            Service::Fhv => "fhv",
        }
    }
}

impl std::fmt::Display for Service {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

/// A run of monthly files for one service.
#[derive(Debug, Clone)]
pub struct TripSeries {
    service: Service,
    years: Vec<i32>,
    months: Vec<u32>,
    base_url: String,
}

impl TripSeries {
    pub fn new(service: Service, years: Vec<i32>) -> Self {
        Self {
            service,
            years,
            months: (1..=12).collect(),
            base_url: DEFAULT_BASE_URL.to_string(),
        }
    }

    pub fn with_months(mut self, months: Vec<u32>) -> Self {
        self.months = months;
        self
    }

    pub fn with_base_url(mut self, base_url: impl Into<String>) -> Self {
        self.base_url = base_url.into();
        self
    }

    /// File name for one month, e.g. `green_tripdata_2019-01.csv.gz`.
    pub fn file_name(&self, year: i32, month: u32) -> String {
        format!("{}_tripdata_{}-{:02}.csv.gz", self.service, year, month)
    }

    /// All URLs, years outer and months inner, in the order given.
    pub fn urls(&self) -> Vec<String> {
        let base = self.base_url.trim_end_matches('/');
        self.years
            .iter()
            .flat_map(|&year| {
                self.months.iter().map(move |&month| {
                    format!("{}/{}/{}", base, self.service, self.file_name(year, month))
                })
            })
            .collect()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn urls_are_ordered_and_zero_padded() {
        let urls = TripSeries::new(Service::Green, vec![2019, 2020])
            .with_months(vec![1, 10])
            .urls();
        assert_eq!(
            urls,
            vec![
                format!("{}/green/green_tripdata_2019-01.csv.gz", DEFAULT_BASE_URL),
                format!("{}/green/green_tripdata_2019-10.csv.gz", DEFAULT_BASE_URL),
                format!("{}/green/green_tripdata_2020-01.csv.gz", DEFAULT_BASE_URL),
                format!("{}/green/green_tripdata_2020-10.csv.gz", DEFAULT_BASE_URL),
            ]
        );
    }

    #[test]
    fn full_year_by_default() {
        let urls = TripSeries::new(Service::Fhv, vec![2019]).urls();
        assert_eq!(urls.len(), 12);
        assert!(urls[11].ends_with("/fhv/fhv_tripdata_2019-12.csv.gz"));
    }

    #[test]
    fn base_url_trailing_slash_is_ignored() {
        let urls = TripSeries::new(Service::Yellow, vec![2020])
            .with_months(vec![3])
            .with_base_url("http://localhost:8080/data/")
            .urls();
        assert_eq!(
            urls,
            vec!["http://localhost:8080/data/yellow/yellow_tripdata_2020-03.csv.gz"]
        );
    }
}
