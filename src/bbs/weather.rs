//! Weather lookups for the weather flow.
//!
//! Fetches current conditions from OpenWeatherMap by ZIP code. Responses are
//! cached per ZIP for the configured TTL so a chatty mesh doesn't hammer the
//! API, and a stale cache entry (up to two hours) is served when the API is
//! unreachable.

use anyhow::{anyhow, Result};
use log::{debug, warn};
use serde::Deserialize;
use std::time::{Duration, Instant};
use tokio::time::timeout;

use crate::config::WeatherConfig;

/// OpenWeatherMap API response structures
#[derive(Debug, Deserialize)]
pub struct WeatherResponse {
    pub name: String,
    pub main: WeatherMain,
    pub weather: Vec<WeatherCondition>,
}

#[derive(Debug, Deserialize)]
pub struct WeatherMain {
    pub temp: f64,
    pub feels_like: f64,
    pub humidity: i32,
}

#[derive(Debug, Deserialize)]
pub struct WeatherCondition {
    pub description: String,
}

#[derive(Debug, Clone)]
struct CacheEntry {
    fetched_at: Instant,
    data: String,
    zip: String,
}

/// Weather service for fetching current conditions
pub struct WeatherService {
    config: WeatherConfig,
    cache: Option<CacheEntry>,
    client: reqwest::Client,
}

impl WeatherService {
    pub fn new(config: WeatherConfig) -> Self {
        Self {
            config,
            cache: None,
            client: reqwest::Client::new(),
        }
    }

    /// Fetch a formatted report for a ZIP code. Always returns something
    /// sendable; API failures degrade to a cached or apologetic reply.
    pub async fn fetch_for_zip(&mut self, zip: &str) -> String {
        if !self.config.enabled {
            debug!("Weather service is disabled");
            return "Weather service is disabled.".to_string();
        }
        if self.config.api_key.is_empty() {
            warn!("OpenWeatherMap API key not configured");
            return "Weather: API key not configured.".to_string();
        }

        if let Some(ref cache) = self.cache {
            if cache.zip == zip {
                let ttl = Duration::from_secs(self.config.cache_ttl_minutes as u64 * 60);
                if cache.fetched_at.elapsed() < ttl {
                    debug!("Returning cached weather for {}", zip);
                    return cache.data.clone();
                }
            }
        }

        match self.fetch_from_api(zip).await {
            Ok(response) => {
                let formatted = format_report(&response);
                self.cache = Some(CacheEntry {
                    fetched_at: Instant::now(),
                    data: formatted.clone(),
                    zip: zip.to_string(),
                });
                formatted
            }
            Err(e) => {
                warn!("Failed to fetch weather for {}: {}", zip, e);
                if let Some(ref cache) = self.cache {
                    if cache.zip == zip && cache.fetched_at.elapsed() < Duration::from_secs(2 * 60 * 60)
                    {
                        return format!("{} (cached)", cache.data);
                    }
                }
                "Weather service unavailable.".to_string()
            }
        }
    }

    async fn fetch_from_api(&self, zip: &str) -> Result<WeatherResponse> {
        let url = self.build_api_url(zip);
        let timeout_duration = Duration::from_secs(self.config.timeout_seconds as u64);

        let response = timeout(timeout_duration, self.client.get(&url).send())
            .await
            .map_err(|_| anyhow!("Request timeout after {}s", self.config.timeout_seconds))?
            .map_err(|e| anyhow!("HTTP request failed: {}", e))?;

        if response.status().as_u16() == 404 {
            return Err(anyhow!("ZIP code not found"));
        }
        if !response.status().is_success() {
            return Err(anyhow!("API returned status: {}", response.status()));
        }

        let weather: WeatherResponse = response
            .json()
            .await
            .map_err(|e| anyhow!("Failed to parse JSON response: {}", e))?;
        Ok(weather)
    }

    fn build_api_url(&self, zip: &str) -> String {
        format!(
            "https://api.openweathermap.org/data/2.5/weather?zip={},{}&appid={}&units=imperial",
            zip,
            self.config.country_code.to_lowercase(),
            self.config.api_key
        )
    }
}

fn format_report(response: &WeatherResponse) -> String {
    let conditions = response
        .weather
        .first()
        .map(|c| title_case(&c.description))
        .unwrap_or_else(|| "Unknown".to_string());
    format!(
        "☁️ {} Weather ☁️\n\nTemp: {:.0}°F (feels {:.0}°F)\nConditions: {}\nHumidity: {}%",
        response.name,
        response.main.temp,
        response.main.feels_like,
        conditions,
        response.main.humidity
    )
}

fn title_case(s: &str) -> String {
    s.split_whitespace()
        .map(|word| {
            let mut chars = word.chars();
            match chars.next() {
                None => String::new(),
                Some(first) => first.to_uppercase().collect::<String>() + chars.as_str(),
            }
        })
        .collect::<Vec<_>>()
        .join(" ")
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn report_formatting() {
        let response = WeatherResponse {
            name: "Austin".into(),
            main: WeatherMain {
                temp: 99.6,
                feels_like: 104.2,
                humidity: 48,
            },
            weather: vec![WeatherCondition {
                description: "scattered clouds".into(),
            }],
        };
        let report = format_report(&response);
        assert!(report.contains("Austin"));
        assert!(report.contains("Temp: 100°F (feels 104°F)"));
        assert!(report.contains("Scattered Clouds"));
        assert!(report.contains("Humidity: 48%"));
    }

    #[tokio::test]
    async fn disabled_service_short_circuits() {
        let mut service = WeatherService::new(WeatherConfig::default());
        let reply = service.fetch_for_zip("78701").await;
        assert_eq!(reply, "Weather service is disabled.");
    }

    #[tokio::test]
    async fn missing_key_short_circuits() {
        let mut config = WeatherConfig::default();
        config.enabled = true;
        let mut service = WeatherService::new(config);
        let reply = service.fetch_for_zip("78701").await;
        assert_eq!(reply, "Weather: API key not configured.");
    }
}
