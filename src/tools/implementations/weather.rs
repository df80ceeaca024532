// Weather tool - canned forecast used by the agent routes

use crate::errors::ToolError;
use crate::tools::registry::Tool;
use crate::tools::types::ToolInputSchema;
use async_trait::async_trait;
use serde_json::Value;

pub struct WeatherTool;

impl WeatherTool {
    pub const NAME: &'static str = "get_weather";
}

#[async_trait]
impl Tool for WeatherTool {
    fn name(&self) -> &str {
        Self::NAME
    }

    fn description(&self) -> &str {
        "Get weather for a given city."
    }

    fn input_schema(&self) -> ToolInputSchema {
        ToolInputSchema::simple(vec![("city", "Name of the city")])
    }

    async fn execute(&self, input: Value) -> Result<String, ToolError> {
        let city = input["city"]
            .as_str()
            .ok_or_else(|| ToolError::InvalidArguments {
                tool: Self::NAME.to_string(),
                reason: "missing 'city' parameter".to_string(),
            })?;

        Ok(format!("It's always sunny in {}!", city))
    }
}
