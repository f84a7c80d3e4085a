use serde_json::Value;
use std::collections::HashMap;
use std::rc::Rc;

use crate::error::HttpError;
use crate::server::request::{last_value, url_decode};

/// Convert a raw (already URL-decoded) string into a typed value.
///
/// The environment holds every parameter bound so far, so conversions for
/// higher-priority types can resolve against earlier bindings.
pub type ConvertFn = Rc<dyn Fn(&str, &ParamEnv) -> anyhow::Result<Value>>;

/// Check a converted value; `false` fails the request with a 400.
pub type AssertFn = Rc<dyn Fn(&Value) -> bool>;

/// A handler-declared check over the environment of bound parameters.
pub type PredicateFn = Rc<dyn Fn(&ParamEnv) -> bool>;

/// A named parameter type: a priority plus optional conversion and
/// assertion. A missing conversion means the decoded string is taken
/// as-is.
#[derive(Clone)]
pub struct HttpType {
    pub priority: i32,
    convert: Option<ConvertFn>,
    assert: Option<AssertFn>,
}

/// Process-wide table of parameter types, keyed by lowercase name.
pub struct TypeRegistry {
    types: HashMap<String, HttpType>,
}

impl Default for TypeRegistry {
    fn default() -> Self {
        Self::with_builtins()
    }
}

impl TypeRegistry {
    /// An empty registry with no types at all.
    #[must_use]
    pub fn new() -> Self {
        TypeRegistry {
            types: HashMap::new(),
        }
    }

    /// A registry preloaded with the built-in types:
    ///
    /// | name              | conversion                               | assertion          |
    /// |-------------------|------------------------------------------|--------------------|
    /// | `string`          | identity                                 | -                  |
    /// | `integer`         | leading signed decimal, junk allowed     | value is a number  |
    /// | `json`            | JSON parse                               | -                  |
    /// | `keyword`         | lowercased string                        | -                  |
    /// | `list-of-keyword` | JSON array of strings, each lowercased   | -                  |
    /// | `list-of-integer` | JSON array                               | all elements numbers |
    #[must_use]
    pub fn with_builtins() -> Self {
        let mut registry = TypeRegistry::new();
        registry.define("string", 0, None, None);
        registry.define(
            "integer",
            0,
            Some(Rc::new(|raw, _| parse_leading_integer(raw).map(Value::from))),
            Some(Rc::new(Value::is_number)),
        );
        registry.define(
            "json",
            0,
            Some(Rc::new(|raw, _| Ok(serde_json::from_str(raw)?))),
            None,
        );
        registry.define(
            "keyword",
            0,
            Some(Rc::new(|raw, _| Ok(Value::String(raw.to_lowercase())))),
            None,
        );
        registry.define(
            "list-of-keyword",
            0,
            Some(Rc::new(|raw, _| {
                let parsed: Value = serde_json::from_str(raw)?;
                let Value::Array(items) = parsed else {
                    anyhow::bail!("{raw:?} is not a JSON array");
                };
                let keywords = items
                    .into_iter()
                    .map(|item| match item {
                        Value::String(s) => Ok(Value::String(s.to_lowercase())),
                        other => anyhow::bail!("{other} is not a string"),
                    })
                    .collect::<anyhow::Result<Vec<_>>>()?;
                Ok(Value::Array(keywords))
            })),
            None,
        );
        registry.define(
            "list-of-integer",
            0,
            Some(Rc::new(|raw, _| {
                let parsed: Value = serde_json::from_str(raw)?;
                anyhow::ensure!(parsed.is_array(), "{raw:?} is not a JSON array");
                Ok(parsed)
            })),
            Some(Rc::new(|value| {
                value
                    .as_array()
                    .map_or(false, |items| items.iter().all(Value::is_number))
            })),
        );
        registry
    }

    /// Install (or replace) a type under `name`.
    pub fn define(
        &mut self,
        name: &str,
        priority: i32,
        convert: Option<ConvertFn>,
        assert: Option<AssertFn>,
    ) {
        self.types.insert(
            name.to_lowercase(),
            HttpType {
                priority,
                convert,
                assert,
            },
        );
    }

    #[must_use]
    pub fn get(&self, name: &str) -> Option<&HttpType> {
        self.types.get(name)
    }

    /// Binding priority for a declared type name. Untyped parameters and
    /// unknown names sort at 0; unknown names then fail during binding.
    #[must_use]
    pub fn priority_of(&self, type_name: Option<&str>) -> i32 {
        type_name
            .and_then(|name| self.types.get(name))
            .map_or(0, |ty| ty.priority)
    }
}

/// One declared handler parameter.
pub struct ParamSpec {
    pub name: String,
    pub type_name: Option<String>,
    predicates: Vec<PredicateFn>,
}

impl ParamSpec {
    /// A bare parameter: required, URL-decoded, kept as a string.
    #[must_use]
    pub fn untyped(name: &str) -> Self {
        ParamSpec {
            name: name.to_lowercase(),
            type_name: None,
            predicates: Vec::new(),
        }
    }

    /// A parameter converted through the named registry type.
    #[must_use]
    pub fn typed(name: &str, type_name: &str) -> Self {
        ParamSpec {
            name: name.to_lowercase(),
            type_name: Some(type_name.to_lowercase()),
            predicates: Vec::new(),
        }
    }

    /// Attach a predicate; it runs after this parameter binds and can see
    /// every parameter bound so far.
    #[must_use]
    pub fn check(mut self, predicate: impl Fn(&ParamEnv) -> bool + 'static) -> Self {
        self.predicates.push(Rc::new(predicate));
        self
    }
}

/// The ordered environment of bound parameter values.
#[derive(Clone, Debug, Default)]
pub struct ParamEnv {
    bindings: Vec<(String, Value)>,
}

impl ParamEnv {
    /// Look up a bound value; the most recent binding wins.
    #[must_use]
    pub fn get(&self, name: &str) -> Option<&Value> {
        self.bindings
            .iter()
            .rfind(|(k, _)| k == name)
            .map(|(_, v)| v)
    }

    #[must_use]
    pub fn string(&self, name: &str) -> Option<&str> {
        self.get(name).and_then(Value::as_str)
    }

    #[must_use]
    pub fn integer(&self, name: &str) -> Option<i64> {
        self.get(name).and_then(Value::as_i64)
    }

    pub fn iter(&self) -> impl Iterator<Item = (&str, &Value)> {
        self.bindings.iter().map(|(k, v)| (k.as_str(), v))
    }

    #[must_use]
    pub fn len(&self) -> usize {
        self.bindings.len()
    }

    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.bindings.is_empty()
    }

    fn bind(&mut self, name: String, value: Value) {
        self.bindings.push((name, value));
    }
}

/// Run the parameter pipeline for a handler's declared parameters.
///
/// Parameters are processed in ascending type priority (stable, so equal
/// priorities keep declaration order). For each one: the raw value is
/// looked up (absent fails), URL-decoded, converted, asserted, bound, and
/// then its predicates run against the environment built so far. Any
/// failure maps to [`HttpError::TypeAssertion`].
pub fn bind_params(
    types: &TypeRegistry,
    specs: &[ParamSpec],
    parameters: &[(String, String)],
) -> Result<ParamEnv, HttpError> {
    let mut ordered: Vec<&ParamSpec> = specs.iter().collect();
    ordered.sort_by_key(|spec| types.priority_of(spec.type_name.as_deref()));

    let mut env = ParamEnv::default();
    for spec in ordered {
        let raw = last_value(parameters, &spec.name).ok_or_else(|| {
            HttpError::TypeAssertion(format!("missing parameter {:?}", spec.name))
        })?;
        let decoded = url_decode(raw)?;

        let ty = match spec.type_name.as_deref() {
            Some(name) => Some(resolve_type(types, name)?),
            None => None,
        };

        let value = match ty.and_then(|t| t.convert.as_ref()) {
            Some(convert) => convert(&decoded, &env).map_err(|err| {
                HttpError::TypeAssertion(format!(
                    "cannot convert {:?} for {:?}: {err}",
                    decoded, spec.name
                ))
            })?,
            None => Value::String(decoded),
        };

        if let Some(assert) = ty.and_then(|t| t.assert.as_ref()) {
            if !assert(&value) {
                return Err(HttpError::TypeAssertion(format!(
                    "{value} fails the {} assertion",
                    spec.type_name.as_deref().unwrap_or("declared"),
                )));
            }
        }

        env.bind(spec.name.clone(), value);

        for predicate in &spec.predicates {
            if !predicate(&env) {
                return Err(HttpError::TypeAssertion(format!(
                    "predicate rejected {:?}",
                    spec.name
                )));
            }
        }
    }
    Ok(env)
}

fn resolve_type<'a>(types: &'a TypeRegistry, name: &str) -> Result<&'a HttpType, HttpError> {
    types
        .get(name)
        .ok_or_else(|| HttpError::TypeAssertion(format!("unknown parameter type {name:?}")))
}

/// Parse the leading signed decimal integer of `raw`, ignoring trailing
/// junk. Fails when no digits lead the string.
fn parse_leading_integer(raw: &str) -> anyhow::Result<i64> {
    let s = raw.trim_start();
    let (negative, rest) = match s.strip_prefix('-') {
        Some(rest) => (true, rest),
        None => (false, s.strip_prefix('+').unwrap_or(s)),
    };
    let digits: &str = {
        let end = rest
            .char_indices()
            .find(|(_, c)| !c.is_ascii_digit())
            .map_or(rest.len(), |(i, _)| i);
        &rest[..end]
    };
    anyhow::ensure!(!digits.is_empty(), "no digits in {raw:?}");
    let magnitude: i64 = digits.parse()?;
    Ok(if negative { -magnitude } else { magnitude })
}

#[cfg(test)]
mod tests {
    use super::*;

    fn params(pairs: &[(&str, &str)]) -> Vec<(String, String)> {
        pairs
            .iter()
            .map(|(k, v)| (k.to_string(), v.to_string()))
            .collect()
    }

    #[test]
    fn test_parse_leading_integer() {
        assert_eq!(parse_leading_integer("42").unwrap(), 42);
        assert_eq!(parse_leading_integer("-7").unwrap(), -7);
        assert_eq!(parse_leading_integer("+3").unwrap(), 3);
        assert_eq!(parse_leading_integer("12abc").unwrap(), 12);
        assert!(parse_leading_integer("abc").is_err());
        assert!(parse_leading_integer("").is_err());
    }

    #[test]
    fn test_untyped_param_binds_decoded_string() {
        let types = TypeRegistry::with_builtins();
        let specs = vec![ParamSpec::untyped("greeting")];
        let env = bind_params(&types, &specs, &params(&[("greeting", "hello%20there")])).unwrap();
        assert_eq!(env.string("greeting"), Some("hello there"));
    }

    #[test]
    fn test_missing_param_fails() {
        let types = TypeRegistry::with_builtins();
        let specs = vec![ParamSpec::untyped("needed")];
        assert!(bind_params(&types, &specs, &params(&[])).is_err());
    }

    #[test]
    fn test_integer_conversion_and_assertion() {
        let types = TypeRegistry::with_builtins();
        let specs = vec![ParamSpec::typed("n", "integer")];
        let env = bind_params(&types, &specs, &params(&[("n", "17cm")])).unwrap();
        assert_eq!(env.integer("n"), Some(17));
        assert!(bind_params(&types, &specs, &params(&[("n", "tall")])).is_err());
    }

    #[test]
    fn test_json_type() {
        let types = TypeRegistry::with_builtins();
        let specs = vec![ParamSpec::typed("payload", "json")];
        let env = bind_params(
            &types,
            &specs,
            &params(&[("payload", "%7B%22a%22%3A1%7D")]),
        )
        .unwrap();
        assert_eq!(env.get("payload"), Some(&serde_json::json!({"a": 1})));
    }

    #[test]
    fn test_keyword_type_lowercases() {
        let types = TypeRegistry::with_builtins();
        let specs = vec![ParamSpec::typed("tag", "keyword")];
        let env = bind_params(&types, &specs, &params(&[("tag", "URGENT")])).unwrap();
        assert_eq!(env.string("tag"), Some("urgent"));
    }

    #[test]
    fn test_list_of_keyword_requires_strings() {
        let types = TypeRegistry::with_builtins();
        let specs = vec![ParamSpec::typed("tags", "list-of-keyword")];
        let env = bind_params(
            &types,
            &specs,
            &params(&[("tags", "%5B%22A%22%2C%22b%22%5D")]),
        )
        .unwrap();
        assert_eq!(env.get("tags"), Some(&serde_json::json!(["a", "b"])));
        assert!(bind_params(&types, &specs, &params(&[("tags", "%5B1%2C2%5D")])).is_err());
    }

    #[test]
    fn test_list_of_integer_asserts_elementwise() {
        let types = TypeRegistry::with_builtins();
        let specs = vec![ParamSpec::typed("ids", "list-of-integer")];
        let env = bind_params(&types, &specs, &params(&[("ids", "%5B1%2C2%5D")])).unwrap();
        assert_eq!(env.get("ids"), Some(&serde_json::json!([1, 2])));
        assert!(
            bind_params(&types, &specs, &params(&[("ids", "%5B1%2C%22x%22%5D")])).is_err()
        );
    }

    #[test]
    fn test_predicate_sees_current_binding() {
        let types = TypeRegistry::with_builtins();
        let specs = vec![ParamSpec::typed("n", "integer")
            .check(|env| env.integer("n").map_or(false, |n| (2..=64).contains(&n)))
            .check(|env| env.integer("n").map_or(false, |n| n % 2 == 0))];
        assert!(bind_params(&types, &specs, &params(&[("n", "8")])).is_ok());
        // in range but odd
        assert!(bind_params(&types, &specs, &params(&[("n", "3")])).is_err());
        // even but out of range
        assert!(bind_params(&types, &specs, &params(&[("n", "66")])).is_err());
    }

    #[test]
    fn test_priority_orders_binding_regardless_of_declaration() {
        let mut types = TypeRegistry::with_builtins();
        types.define(
            "user",
            1,
            Some(Rc::new(|raw, _| {
                anyhow::ensure!(["alice", "bob"].contains(&raw), "unknown user {raw:?}");
                Ok(Value::String(raw.to_string()))
            })),
            None,
        );
        types.define(
            "game",
            2,
            Some(Rc::new(|raw, env| {
                let owner = env
                    .string("u")
                    .ok_or_else(|| anyhow::anyhow!("no user bound"))?;
                anyhow::ensure!(
                    owner == "alice" && raw == "chess",
                    "{owner:?} has no game {raw:?}"
                );
                Ok(serde_json::json!({ "owner": owner, "name": raw }))
            })),
            None,
        );

        let request = params(&[("g", "chess"), ("u", "alice")]);

        // game declared first; user must still bind first
        let specs = vec![ParamSpec::typed("g", "game"), ParamSpec::typed("u", "user")];
        let env = bind_params(&types, &specs, &request).unwrap();
        assert_eq!(env.get("g").unwrap()["owner"], "alice");

        // declaration order flipped; behavior identical
        let specs = vec![ParamSpec::typed("u", "user"), ParamSpec::typed("g", "game")];
        let env = bind_params(&types, &specs, &request).unwrap();
        assert_eq!(env.get("g").unwrap()["name"], "chess");

        let bad = params(&[("g", "chess"), ("u", "mallory")]);
        let specs = vec![ParamSpec::typed("g", "game"), ParamSpec::typed("u", "user")];
        assert!(bind_params(&types, &specs, &bad).is_err());
    }

    #[test]
    fn test_equal_priority_keeps_declaration_order() {
        let types = TypeRegistry::with_builtins();
        let specs = vec![
            ParamSpec::untyped("first"),
            ParamSpec::typed("second", "integer")
                .check(|env| env.string("first").is_some()),
        ];
        let request = params(&[("first", "here"), ("second", "1")]);
        assert!(bind_params(&types, &specs, &request).is_ok());
    }

    #[test]
    fn test_unknown_type_fails_binding() {
        let types = TypeRegistry::with_builtins();
        let specs = vec![ParamSpec::typed("x", "no-such-type")];
        assert!(bind_params(&types, &specs, &params(&[("x", "1")])).is_err());
    }
}
