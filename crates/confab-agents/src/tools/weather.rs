use async_trait::async_trait;
use confab_common::{Error, Result};
use reqwest::Client;
use serde::Deserialize;
use serde_json::json;

use crate::tools::{Tool, ToolContext, ToolOutput};

const WEATHERSTACK_API_BASE: &str = "http://api.weatherstack.com";

#[derive(Debug, Deserialize)]
struct WeatherstackResponse {
    location: Option<WeatherstackLocation>,
    current: Option<WeatherstackCurrent>,
    error: Option<WeatherstackError>,
}

#[derive(Debug, Deserialize)]
struct WeatherstackLocation {
    name: Option<String>,
    country: Option<String>,
}

#[derive(Debug, Deserialize)]
struct WeatherstackCurrent {
    temperature: Option<f64>,
    humidity: Option<f64>,
    weather_descriptions: Option<Vec<String>>,
}

#[derive(Debug, Deserialize)]
struct WeatherstackError {
    info: Option<String>,
}

/// Current-weather lookup against the Weatherstack API.
///
/// The credential is optional at construction time and checked at the first
/// invocation, so a deployment without the weather tool configured still
/// starts; invoking the tool without a key fails the turn with a
/// configuration error before any network call.
pub struct WeatherTool {
    api_key: Option<String>,
    client: Client,
    base_url: String,
}

impl WeatherTool {
    pub fn new(api_key: Option<String>) -> Self {
        Self {
            api_key,
            client: Client::new(),
            base_url: WEATHERSTACK_API_BASE.to_string(),
        }
    }

    pub fn from_env() -> Self {
        Self::new(std::env::var("WEATHER_API_KEY").ok())
    }

    pub fn with_base_url(mut self, base_url: String) -> Self {
        self.base_url = base_url;
        self
    }
}

#[async_trait]
impl Tool for WeatherTool {
    fn name(&self) -> &'static str {
        "get_weather"
    }

    fn description(&self) -> &'static str {
        "Fetches the current weather for a place: temperature, humidity and conditions."
    }

    fn input_schema(&self) -> serde_json::Value {
        json!({
            "type": "object",
            "properties": {
                "place": {
                    "type": "string",
                    "description": "City or location name, e.g. 'Lisbon' or 'New Delhi'."
                }
            },
            "required": ["place"]
        })
    }

    async fn execute(&self, _context: &ToolContext, args: serde_json::Value) -> Result<ToolOutput> {
        let api_key = self
            .api_key
            .as_deref()
            .ok_or_else(|| Error::Config("WEATHER_API_KEY not set".to_string()))?;

        let Some(place) = args["place"].as_str() else {
            return Ok(ToolOutput::error("missing or invalid 'place'"));
        };

        let url = format!("{}/current", self.base_url);
        let response = self
            .client
            .get(url)
            .query(&[("access_key", api_key), ("query", place)])
            .send()
            .await
            .map_err(|e| Error::Agent(format!("weather request failed: {e}")))?;

        if !response.status().is_success() {
            let status = response.status();
            return Ok(ToolOutput::error(format!(
                "weather service returned HTTP {status}"
            )));
        }

        let data: WeatherstackResponse = response
            .json()
            .await
            .map_err(|e| Error::Agent(format!("invalid weather response: {e}")))?;

        // Weatherstack reports failures with a 200 status and an error body.
        if let Some(error) = data.error {
            return Ok(ToolOutput::error(
                error.info.unwrap_or_else(|| "weather lookup failed".to_string()),
            ));
        }

        let location = data.location.unwrap_or(WeatherstackLocation {
            name: None,
            country: None,
        });
        let current = data.current.unwrap_or(WeatherstackCurrent {
            temperature: None,
            humidity: None,
            weather_descriptions: None,
        });

        Ok(ToolOutput::ok(json!({
            "location": location.name,
            "country": location.country,
            "temperature": current.temperature,
            "humidity": current.humidity,
            "description": current.weather_descriptions.unwrap_or_default(),
        })))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn missing_credential_is_a_config_error() {
        let tool = WeatherTool::new(None);
        let context = ToolContext {
            thread_id: "t1".to_string(),
        };

        let result = tool
            .execute(&context, json!({"place": "Lisbon"}))
            .await;
        assert!(matches!(result, Err(Error::Config(_))));
    }
}
