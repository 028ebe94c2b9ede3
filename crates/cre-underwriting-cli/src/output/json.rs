use serde_json::Value;

/// Pretty-print JSON to stdout. Failures go to stderr so a partial document
/// never reaches a pipe.
pub fn print_json(value: &Value) {
    match serde_json::to_string_pretty(value) {
        Ok(s) => println!("{}", s),
        Err(e) => log::error!("JSON serialization error: {}", e),
    }
}
