//! JSON output formatting

use serde_json::Value as Json;

use crate::core::error::Result;

pub fn format(data: &Json, pretty_print: bool) -> Result<String> {
    let out = if pretty_print {
        serde_json::to_string_pretty(data)?
    } else {
        serde_json::to_string(data)?
    };
    Ok(out)
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn test_compact_and_pretty() {
        let data = json!({"a": [1, 2]});
        assert_eq!(format(&data, false).unwrap(), "{\"a\":[1,2]}");
        let pretty = format(&data, true).unwrap();
        assert!(pretty.contains("\n"));
        assert!(pretty.contains("  \"a\""));
    }
}
