//! Requested structured output and its JSON Schema validation.

use regex::Regex;
use serde_json::{Map, Value, json};

use crate::errors::DecodeError;

/// Wire field wrapping array output.
pub const ELEMENTS_FIELD: &str = "elements";
/// Wire field wrapping enum output.
pub const RESULT_FIELD: &str = "result";

/// Shape of the requested output, which selects the decoding strategy.
#[derive(Clone, Debug, PartialEq)]
pub enum OutputShape {
    Object,
    Array,
    Enum(Vec<String>),
}

/// Structured output requested from the model.
///
/// Holds a JSON Schema (possibly `None` for "any JSON value"). The shape is
/// derived from the schema: `type: array` decodes as an array, a string enum
/// decodes as an enum, everything else as an object.
#[derive(Clone, Debug, PartialEq)]
pub struct OutputSchema {
    schema: Option<Value>,
}

impl OutputSchema {
    /// Uses a raw JSON Schema.
    pub fn new(schema: Value) -> Self {
        Self {
            schema: Some(schema),
        }
    }

    /// Requests a JSON object without schema validation.
    pub fn any_object() -> Self {
        Self { schema: None }
    }

    /// Derives the schema from a Rust type.
    pub fn from_type<T: schemars::JsonSchema>() -> Self {
        Self::new(schemars::schema_for!(T).to_value())
    }

    /// Requests an array whose elements follow the schema of `T`.
    pub fn array_of<T: schemars::JsonSchema>() -> Self {
        Self::from_type::<Vec<T>>()
    }

    /// Requests one of a fixed set of strings.
    pub fn enumeration<I, S>(values: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        let values: Vec<String> = values.into_iter().map(Into::into).collect();
        Self::new(json!({ "type": "string", "enum": values }))
    }

    pub fn schema(&self) -> Option<&Value> {
        self.schema.as_ref()
    }

    pub fn shape(&self) -> OutputShape {
        let Some(schema) = &self.schema else {
            return OutputShape::Object;
        };
        if schema.get("type").and_then(Value::as_str) == Some("array") {
            return OutputShape::Array;
        }
        match enum_values(schema) {
            Some(values) => OutputShape::Enum(values),
            None => OutputShape::Object,
        }
    }

    /// Schema to send to the provider. Arrays and enums are wrapped in an
    /// object because models generate top-level objects more reliably.
    pub fn wire_schema(&self) -> Value {
        let inner = self.schema.clone().unwrap_or_else(|| json!({}));
        let (field, defs) = match self.shape() {
            OutputShape::Object => return inner,
            OutputShape::Array => (ELEMENTS_FIELD, take_defs(&inner)),
            OutputShape::Enum(_) => (RESULT_FIELD, take_defs(&inner)),
        };
        let mut property = inner;
        if let Value::Object(map) = &mut property {
            map.remove("$schema");
            map.remove("$defs");
            map.remove("definitions");
        }
        let mut wrapped = json!({
            "type": "object",
            "properties": { field: property },
            "required": [field],
            "additionalProperties": false,
        });
        if let (Some(defs), Value::Object(map)) = (defs, &mut wrapped) {
            map.insert("$defs".to_string(), defs);
        }
        wrapped
    }

    /// Validates `value` strictly against the schema.
    pub fn validate(&self, value: &Value) -> Result<(), DecodeError> {
        let Some(schema) = &self.schema else {
            return Ok(());
        };
        let mut errors = Vec::new();
        check(schema, schema, value, "", &mut errors);
        if errors.is_empty() {
            Ok(())
        } else {
            Err(DecodeError::SchemaMismatch { errors })
        }
    }

    pub(crate) fn has_items(&self) -> bool {
        self.schema
            .as_ref()
            .is_some_and(|schema| schema.get("items").is_some())
    }
}

fn take_defs(schema: &Value) -> Option<Value> {
    schema
        .get("$defs")
        .or_else(|| schema.get("definitions"))
        .cloned()
}

/// String values of an enum schema, from `enum` or from `oneOf`/`anyOf` consts.
fn enum_values(schema: &Value) -> Option<Vec<String>> {
    if let Some(values) = schema.get("enum").and_then(Value::as_array) {
        return values
            .iter()
            .map(|v| v.as_str().map(ToOwned::to_owned))
            .collect();
    }
    let variants = schema
        .get("oneOf")
        .or_else(|| schema.get("anyOf"))
        .and_then(Value::as_array)?;
    let mut out = Vec::with_capacity(variants.len());
    for variant in variants {
        if let Some(value) = variant.get("const").and_then(Value::as_str) {
            out.push(value.to_string());
        } else if let Some(values) = enum_values(variant) {
            out.extend(values);
        } else {
            return None;
        }
    }
    Some(out)
}

fn resolve<'a>(root: &'a Value, reference: &str) -> Option<&'a Value> {
    let pointer = reference.strip_prefix('#')?;
    if pointer.is_empty() {
        return Some(root);
    }
    root.pointer(pointer)
}

fn type_matches(expected: &str, value: &Value) -> bool {
    match expected {
        "object" => value.is_object(),
        "array" => value.is_array(),
        "string" => value.is_string(),
        "boolean" => value.is_boolean(),
        "null" => value.is_null(),
        "number" => value.is_number(),
        "integer" => match value {
            Value::Number(n) => n.is_i64() || n.is_u64() || n.as_f64().is_some_and(|f| f.fract() == 0.0),
            _ => false,
        },
        _ => true,
    }
}

fn at(path: &str) -> &str {
    if path.is_empty() { "/" } else { path }
}

fn check(root: &Value, schema: &Value, value: &Value, path: &str, errors: &mut Vec<String>) {
    let schema = match schema {
        Value::Bool(true) => return,
        Value::Bool(false) => {
            errors.push(format!("{}: no value is allowed", at(path)));
            return;
        }
        Value::Object(map) => map,
        _ => return,
    };

    if let Some(reference) = schema.get("$ref").and_then(Value::as_str) {
        match resolve(root, reference) {
            Some(target) => check(root, target, value, path, errors),
            None => errors.push(format!("{}: unresolved reference {reference}", at(path))),
        }
    }

    if let Some(expected) = schema.get("type") {
        let ok = match expected {
            Value::String(t) => type_matches(t, value),
            Value::Array(types) => types
                .iter()
                .filter_map(Value::as_str)
                .any(|t| type_matches(t, value)),
            _ => true,
        };
        if !ok {
            errors.push(format!("{}: expected type {expected}, got {value}", at(path)));
            return;
        }
    }

    if let Some(allowed) = schema.get("enum").and_then(Value::as_array)
        && !allowed.iter().any(|candidate| same_value(candidate, value))
    {
        errors.push(format!("{}: {value} is not an allowed value", at(path)));
    }
    if let Some(expected) = schema.get("const")
        && !same_value(expected, value)
    {
        errors.push(format!("{}: expected {expected}", at(path)));
    }

    check_combinators(root, schema, value, path, errors);

    match value {
        Value::Object(object) => check_object(root, schema, object, path, errors),
        Value::Array(items) => check_array(root, schema, items, path, errors),
        Value::String(text) => check_string(schema, text, path, errors),
        Value::Number(number) => {
            if let Some(number) = number.as_f64() {
                check_number(schema, number, path, errors);
            }
        }
        _ => {}
    }
}

/// JSON equality: numbers compare by value, so `1` equals `1.0`.
fn same_value(a: &Value, b: &Value) -> bool {
    match (a, b) {
        (Value::Number(x), Value::Number(y)) => match (x.as_i64(), y.as_i64()) {
            (Some(x), Some(y)) => x == y,
            _ => x.as_f64() == y.as_f64(),
        },
        (Value::Array(xs), Value::Array(ys)) => {
            xs.len() == ys.len() && xs.iter().zip(ys).all(|(x, y)| same_value(x, y))
        }
        (Value::Object(xs), Value::Object(ys)) => {
            xs.len() == ys.len()
                && xs
                    .iter()
                    .all(|(key, x)| ys.get(key).is_some_and(|y| same_value(x, y)))
        }
        _ => a == b,
    }
}

fn passes(root: &Value, schema: &Value, value: &Value, path: &str) -> bool {
    let mut scratch = Vec::new();
    check(root, schema, value, path, &mut scratch);
    scratch.is_empty()
}

fn compile(pattern: &str, path: &str, errors: &mut Vec<String>) -> Option<Regex> {
    match Regex::new(pattern) {
        Ok(regex) => Some(regex),
        Err(err) => {
            errors.push(format!("{}: invalid pattern {pattern:?}: {err}", at(path)));
            None
        }
    }
}

fn check_combinators(
    root: &Value,
    schema: &Map<String, Value>,
    value: &Value,
    path: &str,
    errors: &mut Vec<String>,
) {
    if let Some(all) = schema.get("allOf").and_then(Value::as_array) {
        for sub in all {
            check(root, sub, value, path, errors);
        }
    }
    if let Some(any) = schema.get("anyOf").and_then(Value::as_array)
        && !any.iter().any(|sub| passes(root, sub, value, path))
    {
        errors.push(format!("{}: does not match any allowed schema", at(path)));
    }
    if let Some(one) = schema.get("oneOf").and_then(Value::as_array) {
        let matched = one.iter().filter(|sub| passes(root, sub, value, path)).count();
        if matched != 1 {
            errors.push(format!(
                "{}: must match exactly one schema, matched {matched}",
                at(path)
            ));
        }
    }
    if let Some(not) = schema.get("not")
        && passes(root, not, value, path)
    {
        errors.push(format!("{}: matches a disallowed schema", at(path)));
    }
    if let Some(condition) = schema.get("if") {
        let branch = if passes(root, condition, value, path) {
            schema.get("then")
        } else {
            schema.get("else")
        };
        if let Some(branch) = branch {
            check(root, branch, value, path, errors);
        }
    }
}

fn check_object(
    root: &Value,
    schema: &Map<String, Value>,
    object: &Map<String, Value>,
    path: &str,
    errors: &mut Vec<String>,
) {
    if let Some(required) = schema.get("required").and_then(Value::as_array) {
        for key in required.iter().filter_map(Value::as_str) {
            if !object.contains_key(key) {
                errors.push(format!("{path}/{key}: required property is missing"));
            }
        }
    }
    let count = object.len() as u64;
    if let Some(min) = schema.get("minProperties").and_then(Value::as_u64)
        && count < min
    {
        errors.push(format!("{}: expected at least {min} properties", at(path)));
    }
    if let Some(max) = schema.get("maxProperties").and_then(Value::as_u64)
        && count > max
    {
        errors.push(format!("{}: expected at most {max} properties", at(path)));
    }
    if let Some(dependent) = schema.get("dependentRequired").and_then(Value::as_object) {
        for (trigger, needed) in dependent {
            if !object.contains_key(trigger) {
                continue;
            }
            for key in needed.as_array().into_iter().flatten().filter_map(Value::as_str) {
                if !object.contains_key(key) {
                    errors.push(format!("{path}/{key}: required when {trigger} is present"));
                }
            }
        }
    }
    if let Some(dependent) = schema.get("dependentSchemas").and_then(Value::as_object) {
        for (trigger, sub) in dependent {
            if object.contains_key(trigger) {
                check(root, sub, &Value::Object(object.clone()), path, errors);
            }
        }
    }

    let patterns: Vec<(Regex, &Value)> = schema
        .get("patternProperties")
        .and_then(Value::as_object)
        .into_iter()
        .flatten()
        .filter_map(|(pattern, sub)| Some((compile(pattern, path, errors)?, sub)))
        .collect();
    let properties = schema.get("properties").and_then(Value::as_object);
    for (key, item) in object {
        let child = format!("{path}/{key}");
        if let Some(names) = schema.get("propertyNames") {
            check(root, names, &Value::String(key.clone()), &child, errors);
        }
        let mut matched = false;
        if let Some(sub) = properties.and_then(|p| p.get(key)) {
            matched = true;
            check(root, sub, item, &child, errors);
        }
        for (regex, sub) in &patterns {
            if regex.is_match(key) {
                matched = true;
                check(root, sub, item, &child, errors);
            }
        }
        if matched {
            continue;
        }
        match schema.get("additionalProperties") {
            Some(Value::Bool(false)) => {
                errors.push(format!("{child}: additional property is not allowed"));
            }
            Some(extra @ Value::Object(_)) => check(root, extra, item, &child, errors),
            _ => {}
        }
    }
}

fn check_array(
    root: &Value,
    schema: &Map<String, Value>,
    items: &[Value],
    path: &str,
    errors: &mut Vec<String>,
) {
    // `prefixItems` (or a tuple-form `items`) covers the leading positions;
    // `items` (or `additionalItems`) covers the rest.
    let (prefix, rest) = match (schema.get("prefixItems"), schema.get("items")) {
        (Some(Value::Array(prefix)), rest) => (prefix.as_slice(), rest),
        (_, Some(Value::Array(tuple))) => (tuple.as_slice(), schema.get("additionalItems")),
        (_, rest) => (&[] as &[Value], rest),
    };
    for (index, item) in items.iter().enumerate() {
        let child = format!("{path}/{index}");
        match prefix.get(index).or(rest) {
            Some(Value::Bool(false)) if index >= prefix.len() => {
                errors.push(format!("{child}: additional item is not allowed"));
            }
            Some(sub) => check(root, sub, item, &child, errors),
            None => {}
        }
    }

    let len = items.len() as u64;
    if let Some(min) = schema.get("minItems").and_then(Value::as_u64)
        && len < min
    {
        errors.push(format!("{}: expected at least {min} items", at(path)));
    }
    if let Some(max) = schema.get("maxItems").and_then(Value::as_u64)
        && len > max
    {
        errors.push(format!("{}: expected at most {max} items", at(path)));
    }
    if schema.get("uniqueItems").and_then(Value::as_bool) == Some(true) {
        let duplicate = items
            .iter()
            .enumerate()
            .any(|(i, a)| items[i + 1..].iter().any(|b| same_value(a, b)));
        if duplicate {
            errors.push(format!("{}: items must be unique", at(path)));
        }
    }
    if let Some(contains) = schema.get("contains") {
        let found = items
            .iter()
            .enumerate()
            .filter(|(index, item)| passes(root, contains, item, &format!("{path}/{index}")))
            .count() as u64;
        let min = schema.get("minContains").and_then(Value::as_u64).unwrap_or(1);
        if found < min {
            errors.push(format!(
                "{}: expected at least {min} matching items, found {found}",
                at(path)
            ));
        }
        if let Some(max) = schema.get("maxContains").and_then(Value::as_u64)
            && found > max
        {
            errors.push(format!(
                "{}: expected at most {max} matching items, found {found}",
                at(path)
            ));
        }
    }
}

fn check_string(schema: &Map<String, Value>, text: &str, path: &str, errors: &mut Vec<String>) {
    let len = text.chars().count() as u64;
    if let Some(min) = schema.get("minLength").and_then(Value::as_u64)
        && len < min
    {
        errors.push(format!("{}: shorter than {min} characters", at(path)));
    }
    if let Some(max) = schema.get("maxLength").and_then(Value::as_u64)
        && len > max
    {
        errors.push(format!("{}: longer than {max} characters", at(path)));
    }
    if let Some(pattern) = schema.get("pattern").and_then(Value::as_str)
        && let Some(regex) = compile(pattern, path, errors)
        && !regex.is_match(text)
    {
        errors.push(format!("{}: does not match pattern {pattern:?}", at(path)));
    }
    if let Some(format) = schema.get("format").and_then(Value::as_str)
        && !format_matches(format, text)
    {
        errors.push(format!("{}: not a valid {format}", at(path)));
    }
}

/// Assertion check for well-known string formats. Unknown formats, such as
/// the numeric annotations `schemars` emits, are accepted.
fn format_matches(format: &str, text: &str) -> bool {
    match format {
        "date-time" => chrono::DateTime::parse_from_rfc3339(text).is_ok(),
        "date" => chrono::NaiveDate::parse_from_str(text, "%Y-%m-%d").is_ok(),
        "time" => chrono::DateTime::parse_from_rfc3339(&format!("1970-01-01T{text}")).is_ok(),
        "email" => text.split_once('@').is_some_and(|(local, domain)| {
            !local.is_empty() && domain.contains('.') && !domain.contains('@')
        }),
        "uuid" => uuid::Uuid::parse_str(text).is_ok(),
        "ipv4" => text.parse::<std::net::Ipv4Addr>().is_ok(),
        "ipv6" => text.parse::<std::net::Ipv6Addr>().is_ok(),
        "uri" => text.split_once(':').is_some_and(|(scheme, _)| {
            scheme.starts_with(|c: char| c.is_ascii_alphabetic())
                && scheme
                    .chars()
                    .all(|c| c.is_ascii_alphanumeric() || matches!(c, '+' | '-' | '.'))
        }),
        _ => true,
    }
}

fn check_number(schema: &Map<String, Value>, number: f64, path: &str, errors: &mut Vec<String>) {
    let bound = |key: &str| schema.get(key).and_then(Value::as_f64);
    if let Some(min) = bound("minimum") {
        let exclusive = schema.get("exclusiveMinimum").and_then(Value::as_bool) == Some(true);
        if number < min || (exclusive && number == min) {
            errors.push(format!("{}: below minimum {min}", at(path)));
        }
    }
    if let Some(max) = bound("maximum") {
        let exclusive = schema.get("exclusiveMaximum").and_then(Value::as_bool) == Some(true);
        if number > max || (exclusive && number == max) {
            errors.push(format!("{}: above maximum {max}", at(path)));
        }
    }
    if let Some(min) = bound("exclusiveMinimum")
        && number <= min
    {
        errors.push(format!("{}: must be greater than {min}", at(path)));
    }
    if let Some(max) = bound("exclusiveMaximum")
        && number >= max
    {
        errors.push(format!("{}: must be less than {max}", at(path)));
    }
    if let Some(divisor) = bound("multipleOf")
        && divisor > 0.0
    {
        let quotient = number / divisor;
        if (quotient - quotient.round()).abs() > 1e-9 {
            errors.push(format!("{}: not a multiple of {divisor}", at(path)));
        }
    }
}
