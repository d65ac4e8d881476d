//! Output formatting

pub mod json;
pub mod yaml;

use serde_json::Value as Json;

use crate::cli::OutputFormat;
use crate::core::error::Result;

pub fn to_string(data: &Json, format: OutputFormat, pretty_print: bool) -> Result<String> {
    match format {
        OutputFormat::Yaml => yaml::format(data),
        OutputFormat::Json => json::format(data, pretty_print),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn test_dispatch() {
        let data = json!({"a": 1});
        assert!(to_string(&data, OutputFormat::Yaml, false)
            .unwrap()
            .contains("a: 1"));
        assert_eq!(
            to_string(&data, OutputFormat::Json, false).unwrap(),
            "{\"a\":1}"
        );
    }
}
