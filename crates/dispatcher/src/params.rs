use chrono::NaiveDate;
use engine_core::{EngineError, EngineResult};
use serde_json::Value;
use std::collections::BTreeMap;

/// Declared type of one capability parameter.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ParamType {
    Int,
    Float,
    Bool,
    Str,
    Date,
    /// Comma-separated string or JSON array of ticker symbols.
    TickerList,
    /// Opaque JSON passed through unvalidated (component signals, grids).
    Json,
}

/// A coerced parameter value.
#[derive(Debug, Clone, PartialEq)]
pub enum ParamValue {
    Int(i64),
    Float(f64),
    Bool(bool),
    Str(String),
    Date(NaiveDate),
    TickerList(Vec<String>),
    Json(Value),
}

/// Declaration of one parameter: name, type, and default when optional.
#[derive(Debug, Clone)]
pub struct ParamSpec {
    pub name: &'static str,
    pub ty: ParamType,
    pub required: bool,
    pub default: Option<ParamValue>,
}

impl ParamSpec {
    pub fn required(name: &'static str, ty: ParamType) -> Self {
        Self {
            name,
            ty,
            required: true,
            default: None,
        }
    }

    pub fn optional(name: &'static str, ty: ParamType) -> Self {
        Self {
            name,
            ty,
            required: false,
            default: None,
        }
    }

    pub fn with_default(name: &'static str, ty: ParamType, default: ParamValue) -> Self {
        Self {
            name,
            ty,
            required: false,
            default: Some(default),
        }
    }
}

/// Coerced parameters with typed accessors. Accessor misuse (asking for a
/// type the schema did not declare) is an internal error, not a user one.
#[derive(Debug, Clone, Default)]
pub struct ParamValues(pub BTreeMap<String, ParamValue>);

impl ParamValues {
    pub fn get(&self, name: &str) -> Option<&ParamValue> {
        self.0.get(name)
    }

    pub fn str(&self, name: &str) -> EngineResult<&str> {
        match self.get(name) {
            Some(ParamValue::Str(s)) => Ok(s),
            _ => Err(EngineError::Internal(format!("param {name} not a string"))),
        }
    }

    pub fn str_opt(&self, name: &str) -> Option<&str> {
        match self.get(name) {
            Some(ParamValue::Str(s)) => Some(s),
            _ => None,
        }
    }

    pub fn int(&self, name: &str) -> EngineResult<i64> {
        match self.get(name) {
            Some(ParamValue::Int(v)) => Ok(*v),
            _ => Err(EngineError::Internal(format!("param {name} not an int"))),
        }
    }

    pub fn int_opt(&self, name: &str) -> Option<i64> {
        match self.get(name) {
            Some(ParamValue::Int(v)) => Some(*v),
            _ => None,
        }
    }

    pub fn float(&self, name: &str) -> EngineResult<f64> {
        match self.get(name) {
            Some(ParamValue::Float(v)) => Ok(*v),
            Some(ParamValue::Int(v)) => Ok(*v as f64),
            _ => Err(EngineError::Internal(format!("param {name} not a float"))),
        }
    }

    pub fn float_opt(&self, name: &str) -> Option<f64> {
        match self.get(name) {
            Some(ParamValue::Float(v)) => Some(*v),
            Some(ParamValue::Int(v)) => Some(*v as f64),
            _ => None,
        }
    }

    pub fn bool_opt(&self, name: &str) -> Option<bool> {
        match self.get(name) {
            Some(ParamValue::Bool(v)) => Some(*v),
            _ => None,
        }
    }

    pub fn date_opt(&self, name: &str) -> Option<NaiveDate> {
        match self.get(name) {
            Some(ParamValue::Date(d)) => Some(*d),
            _ => None,
        }
    }

    pub fn tickers(&self, name: &str) -> EngineResult<&[String]> {
        match self.get(name) {
            Some(ParamValue::TickerList(list)) => Ok(list),
            _ => Err(EngineError::Internal(format!("param {name} not a ticker list"))),
        }
    }

    pub fn json_opt(&self, name: &str) -> Option<&Value> {
        match self.get(name) {
            Some(ParamValue::Json(v)) => Some(v),
            _ => None,
        }
    }
}

/// Coerce raw JSON arguments against the declared specs. Unknown keys and
/// uncoercible values reject with `InvalidArgument` naming the offender;
/// declared defaults fill in absent optionals.
pub fn coerce(specs: &[ParamSpec], raw: &serde_json::Map<String, Value>) -> EngineResult<ParamValues> {
    for key in raw.keys() {
        if !specs.iter().any(|s| s.name == key) {
            return Err(EngineError::InvalidArgument(format!(
                "unknown parameter {key}"
            )));
        }
    }

    let mut out = BTreeMap::new();
    for spec in specs {
        match raw.get(spec.name) {
            Some(value) => {
                out.insert(spec.name.to_string(), coerce_one(spec, value)?);
            }
            None if spec.required => {
                return Err(EngineError::InvalidArgument(format!(
                    "missing required parameter {}",
                    spec.name
                )));
            }
            None => {
                if let Some(default) = &spec.default {
                    out.insert(spec.name.to_string(), default.clone());
                }
            }
        }
    }
    Ok(ParamValues(out))
}

fn coerce_one(spec: &ParamSpec, value: &Value) -> EngineResult<ParamValue> {
    let fail = |why: &str| {
        EngineError::InvalidArgument(format!("parameter {}: {why} (got {value})", spec.name))
    };
    match spec.ty {
        ParamType::Int => match value {
            Value::Number(n) => n
                .as_i64()
                .map(ParamValue::Int)
                .ok_or_else(|| fail("expected an integer")),
            Value::String(s) => s
                .trim()
                .parse::<i64>()
                .map(ParamValue::Int)
                .map_err(|_| fail("expected an integer")),
            _ => Err(fail("expected an integer")),
        },
        ParamType::Float => match value {
            Value::Number(n) => n
                .as_f64()
                .map(ParamValue::Float)
                .ok_or_else(|| fail("expected a number")),
            Value::String(s) => s
                .trim()
                .parse::<f64>()
                .map(ParamValue::Float)
                .map_err(|_| fail("expected a number")),
            _ => Err(fail("expected a number")),
        },
        ParamType::Bool => match value {
            Value::Bool(b) => Ok(ParamValue::Bool(*b)),
            Value::String(s) => match s.trim() {
                "true" => Ok(ParamValue::Bool(true)),
                "false" => Ok(ParamValue::Bool(false)),
                _ => Err(fail("expected true or false")),
            },
            _ => Err(fail("expected true or false")),
        },
        ParamType::Str => match value {
            Value::String(s) => Ok(ParamValue::Str(s.clone())),
            _ => Err(fail("expected a string")),
        },
        ParamType::Date => match value {
            Value::String(s) => NaiveDate::parse_from_str(s.trim(), "%Y-%m-%d")
                .map(ParamValue::Date)
                .map_err(|_| fail("expected an ISO date (YYYY-MM-DD)")),
            _ => Err(fail("expected an ISO date string")),
        },
        ParamType::TickerList => match value {
            Value::String(s) => {
                let list: Vec<String> = s
                    .split(',')
                    .map(|t| t.trim().to_uppercase())
                    .filter(|t| !t.is_empty())
                    .collect();
                if list.is_empty() {
                    Err(fail("expected at least one ticker"))
                } else {
                    Ok(ParamValue::TickerList(list))
                }
            }
            Value::Array(items) => {
                let mut list = Vec::with_capacity(items.len());
                for item in items {
                    match item {
                        Value::String(s) if !s.trim().is_empty() => {
                            list.push(s.trim().to_uppercase())
                        }
                        _ => return Err(fail("expected an array of ticker strings")),
                    }
                }
                if list.is_empty() {
                    Err(fail("expected at least one ticker"))
                } else {
                    Ok(ParamValue::TickerList(list))
                }
            }
            _ => Err(fail("expected a ticker list")),
        },
        ParamType::Json => Ok(ParamValue::Json(value.clone())),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    fn raw(value: Value) -> serde_json::Map<String, Value> {
        value.as_object().cloned().unwrap_or_default()
    }

    #[test]
    fn unknown_key_rejects() {
        let specs = [ParamSpec::required("ticker", ParamType::Str)];
        let err = coerce(&specs, &raw(json!({"ticker": "AAPL", "bogus": 1}))).unwrap_err();
        assert_eq!(err.kind(), "InvalidArgument");
        assert!(err.to_string().contains("bogus"));
    }

    #[test]
    fn missing_required_rejects_with_name() {
        let specs = [ParamSpec::required("ticker", ParamType::Str)];
        let err = coerce(&specs, &raw(json!({}))).unwrap_err();
        assert!(err.to_string().contains("ticker"));
    }

    #[test]
    fn strings_coerce_to_declared_types() {
        let specs = [
            ParamSpec::required("paths", ParamType::Int),
            ParamSpec::required("weight", ParamType::Float),
            ParamSpec::required("as_of", ParamType::Date),
        ];
        let values = coerce(
            &specs,
            &raw(json!({"paths": "5000", "weight": "0.5", "as_of": "2024-06-30"})),
        )
        .unwrap();
        assert_eq!(values.int("paths").unwrap(), 5000);
        assert_eq!(values.float("weight").unwrap(), 0.5);
        assert_eq!(
            values.date_opt("as_of"),
            NaiveDate::from_ymd_opt(2024, 6, 30)
        );
    }

    #[test]
    fn bad_coercion_names_the_parameter() {
        let specs = [ParamSpec::required("paths", ParamType::Int)];
        let err = coerce(&specs, &raw(json!({"paths": "many"}))).unwrap_err();
        assert!(err.to_string().contains("paths"));
    }

    #[test]
    fn ticker_list_accepts_csv_and_array() {
        let specs = [ParamSpec::required("tickers", ParamType::TickerList)];
        let a = coerce(&specs, &raw(json!({"tickers": "spy, tlt ,gld"}))).unwrap();
        assert_eq!(
            a.tickers("tickers").unwrap(),
            &["SPY".to_string(), "TLT".to_string(), "GLD".to_string()]
        );
        let b = coerce(&specs, &raw(json!({"tickers": ["qqq", "iwm"]}))).unwrap();
        assert_eq!(b.tickers("tickers").unwrap().len(), 2);
    }

    #[test]
    fn defaults_fill_absent_optionals() {
        let specs = [ParamSpec::with_default(
            "paths",
            ParamType::Int,
            ParamValue::Int(10_000),
        )];
        let values = coerce(&specs, &raw(json!({}))).unwrap();
        assert_eq!(values.int("paths").unwrap(), 10_000);
    }
}
