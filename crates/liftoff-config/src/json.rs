//! Reads option documents supplied either as a file path or inline JSON.

use std::fs;

use serde_json::Value;
use tracing::{debug, warn};

use crate::CONFIG_TARGET;

/// JSON object carried by option documents and workload configuration.
pub type JsonObject = serde_json::Map<String, Value>;

/// Reads a JSON object from a file path or, failing that, parses the value as
/// inline JSON.
///
/// Returns `None` when no value was supplied or when neither interpretation
/// yields a JSON object; the latter case is logged as a warning naming the
/// option.
pub fn read_json_file_or_string(option: &str, value: Option<&str>) -> Option<JsonObject> {
    let source = value?;

    match fs::read(source) {
        Ok(bytes) => match serde_json::from_slice::<Value>(&bytes) {
            Ok(Value::Object(object)) => return Some(object),
            Ok(_) => debug!(target: CONFIG_TARGET, option, path = source, "file is not a JSON object"),
            Err(error) => debug!(target: CONFIG_TARGET, option, path = source, %error, "file is not valid JSON"),
        },
        Err(error) => debug!(target: CONFIG_TARGET, option, %error, "value is not a readable file"),
    }

    if let Ok(Value::Object(object)) = serde_json::from_str::<Value>(source) {
        return Some(object);
    }

    warn!(
        target: CONFIG_TARGET,
        option,
        "the {option} option does not point to a valid JSON file or is not a valid JSON object"
    );
    None
}

#[cfg(test)]
mod tests {
    use std::io::Write;

    use rstest::rstest;
    use serde_json::json;
    use tempfile::NamedTempFile;

    use super::*;

    #[test]
    fn absent_value_yields_none() {
        assert!(read_json_file_or_string("options", None).is_none());
    }

    #[test]
    fn reads_object_from_file() {
        let mut file = NamedTempFile::new().expect("create temp file");
        write!(file, r#"{{"instances": 4}}"#).expect("write json");
        let path = file.path().to_str().expect("utf-8 temp path").to_owned();

        let object = read_json_file_or_string("deployment-options", Some(&path))
            .expect("file should parse");
        assert_eq!(object.get("instances"), Some(&json!(4)));
    }

    #[test]
    fn falls_back_to_inline_json() {
        let object = read_json_file_or_string("conf", Some(r#"{"time": 345667}"#))
            .expect("inline json should parse");
        assert_eq!(object.get("time"), Some(&json!(345_667)));
    }

    #[rstest]
    #[case("not json at all")]
    #[case("[1, 2, 3]")]
    #[case("/definitely/not/a/file.json")]
    fn rejects_non_objects(#[case] value: &str) {
        assert!(read_json_file_or_string("options", Some(value)).is_none());
    }
}
