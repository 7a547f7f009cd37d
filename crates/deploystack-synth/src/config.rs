//! Layered configuration resolution
//!
//! Config keys address an attribute at a tier: `replicasForDefault` is the
//! `replicas` attribute at the default tier, `replicasForWeb` the same
//! attribute scoped to the `web` category, `replicasForOrders` scoped to
//! the `orders` app. Resolution walks default keys, then the app's
//! category key list, then its app key list; each more specific key
//! retires the less specific siblings of the same attribute.
//!
//! The suffix convention lives entirely in [`ParsedKey::parse`]; nothing
//! else in the codebase splits key strings.

use std::collections::BTreeMap;

use deploystack_common::crd::DeployStackSpec;
use deploystack_common::{Error, Result};
use serde_json::Value;

/// The tier a config key addresses
#[derive(Clone, Debug, PartialEq, Eq)]
pub enum Tier {
    /// Applies to every app unless shadowed
    Default,
    /// Scoped to a named category, app, or key family (e.g. port protocols)
    Scoped(String),
}

impl Tier {
    /// Lowercased tier name, `"default"` for the default tier
    pub fn name_lower(&self) -> String {
        match self {
            Tier::Default => "default".to_string(),
            Tier::Scoped(name) => name.to_lowercase(),
        }
    }
}

/// A config key split into attribute and tier
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct ParsedKey {
    /// The attribute the key configures (e.g. `replicas`)
    pub attribute: String,
    /// The tier the key addresses
    pub tier: Tier,
}

impl ParsedKey {
    /// Parse a config key by splitting on its last `"For"`
    ///
    /// Keys without `"For"` (and degenerate keys where either half would
    /// be empty) parse as the whole key at the default tier.
    pub fn parse(key: &str) -> Self {
        let key = key.trim();
        if let Some(idx) = key.rfind("For") {
            let attribute = &key[..idx];
            let suffix = &key[idx + 3..];
            if !attribute.is_empty() && !suffix.is_empty() {
                let tier = if suffix.eq_ignore_ascii_case("default") {
                    Tier::Default
                } else {
                    Tier::Scoped(suffix.to_string())
                };
                return Self {
                    attribute: attribute.to_string(),
                    tier,
                };
            }
        }
        Self {
            attribute: key.to_string(),
            tier: Tier::Default,
        }
    }
}

/// Shadowing precedence of a tier for a given app: higher retires lower
///
/// Tiers that name neither the category nor the app (port protocols,
/// volume suffixes) do not participate in shadowing.
fn shadow_rank(tier: &Tier, app: &str, category: &str) -> Option<u8> {
    match tier {
        Tier::Default => Some(0),
        Tier::Scoped(name) if name.eq_ignore_ascii_case(app) => Some(2),
        Tier::Scoped(name) if name.eq_ignore_ascii_case(category) => Some(1),
        Tier::Scoped(_) => None,
    }
}

/// Flat per-app configuration after layer resolution
#[derive(Clone, Debug, PartialEq)]
pub struct ResolvedConfig {
    /// The app this config was resolved for
    pub app: String,
    /// The single category the app belongs to
    pub category: String,
    /// Whether the app runs as a StatefulSet
    pub stateful: bool,
    /// Surviving key/value entries
    pub entries: BTreeMap<String, Value>,
}

/// Resolve the effective configuration for one app
pub fn resolve(app: &str, spec: &DeployStackSpec) -> Result<ResolvedConfig> {
    if spec.default_config_keys.is_empty() {
        return Err(Error::config_for(app, "default config key list is empty"));
    }
    if spec.categories.is_empty() {
        return Err(Error::config_for(app, "no categories declared"));
    }

    let memberships: Vec<_> = spec
        .categories
        .iter()
        .filter(|(_, c)| c.contains(app))
        .collect();
    let (category_name, category) = match memberships.as_slice() {
        [] => {
            return Err(Error::config_for(
                app,
                "app is not a member of any category",
            ))
        }
        [one] => *one,
        many => {
            let names: Vec<&str> = many.iter().map(|(n, _)| n.as_str()).collect();
            return Err(Error::config_for(
                app,
                format!("app belongs to more than one category: {}", names.join(", ")),
            ));
        }
    };

    let mut entries: BTreeMap<String, Value> = BTreeMap::new();

    // Default tier: absent keys are skipped, not errors
    for key in &spec.default_config_keys {
        if let Some(value) = spec.values.get(key) {
            entries.insert(key.clone(), value.clone());
        }
    }

    // Category and app tiers: a declared override with no value is an error
    let app_keys = category.apps.get(app).cloned().unwrap_or_default();
    for key in category.keys.iter().chain(app_keys.iter()) {
        let value = spec.values.get(key).ok_or_else(|| {
            Error::config_for_key(app, key, "declared override key has no value")
        })?;
        insert_shadowing(&mut entries, key, value.clone(), app, category_name);
    }

    Ok(ResolvedConfig {
        app: app.to_string(),
        category: category_name.clone(),
        stateful: category.stateful,
        entries,
    })
}

/// Insert a key, retiring less specific siblings of the same attribute
fn insert_shadowing(
    entries: &mut BTreeMap<String, Value>,
    key: &str,
    value: Value,
    app: &str,
    category: &str,
) {
    let parsed = ParsedKey::parse(key);
    if let Some(rank) = shadow_rank(&parsed.tier, app, category) {
        entries.retain(|existing, _| {
            let other = ParsedKey::parse(existing);
            if other.attribute != parsed.attribute {
                return true;
            }
            match shadow_rank(&other.tier, app, category) {
                Some(other_rank) => other_rank >= rank,
                None => true,
            }
        });
    }
    entries.insert(key.to_string(), value);
}

impl ResolvedConfig {
    fn matching(&self, attribute: &str) -> Vec<(&String, &Value)> {
        self.entries
            .iter()
            .filter(|(key, _)| ParsedKey::parse(key).attribute == attribute)
            .collect()
    }

    /// The single surviving entry for an attribute, if any
    ///
    /// Two surviving keys for one attribute means the shadowing layers
    /// were misdeclared (e.g. two sibling categories claiming the app),
    /// which is reported rather than silently picking one.
    fn single(&self, attribute: &str) -> Result<Option<(&String, &Value)>> {
        let matches = self.matching(attribute);
        match matches.as_slice() {
            [] => Ok(None),
            [one] => Ok(Some(*one)),
            many => {
                let keys: Vec<&str> = many.iter().map(|(k, _)| k.as_str()).collect();
                Err(Error::config_for_key(
                    &self.app,
                    keys.join(", "),
                    format!("multiple surviving keys for attribute {attribute}"),
                ))
            }
        }
    }

    /// All surviving entries for an attribute, as (lowercased tier, value)
    ///
    /// Used for key families like `portForGrpc`/`portForHttp` where every
    /// tier is meaningful and nothing shadows.
    pub fn entries_with_attribute(&self, attribute: &str) -> Vec<(String, &Value)> {
        self.matching(attribute)
            .into_iter()
            .map(|(key, value)| (ParsedKey::parse(key).tier.name_lower(), value))
            .collect()
    }

    /// Required string attribute
    pub fn attribute_str(&self, attribute: &str) -> Result<&str> {
        self.try_attribute_str(attribute)?.ok_or_else(|| {
            Error::config_for_key(&self.app, attribute, "required string attribute is missing")
        })
    }

    /// Optional string attribute; present but mistyped is still an error
    pub fn try_attribute_str(&self, attribute: &str) -> Result<Option<&str>> {
        match self.single(attribute)? {
            None => Ok(None),
            Some((_, Value::String(s))) => Ok(Some(s.as_str())),
            Some((key, other)) => Err(Error::config_for_key(
                &self.app,
                key,
                format!("expected a string, got {other}"),
            )),
        }
    }

    /// Required integer attribute
    ///
    /// Accepts a JSON number or a numeric string; anything else is an
    /// error.
    pub fn attribute_i32(&self, attribute: &str) -> Result<i32> {
        self.try_attribute_i32(attribute)?.ok_or_else(|| {
            Error::config_for_key(
                &self.app,
                attribute,
                "required integer attribute is missing",
            )
        })
    }

    /// Optional integer attribute; present but non-numeric is an error
    pub fn try_attribute_i32(&self, attribute: &str) -> Result<Option<i32>> {
        match self.single(attribute)? {
            None => Ok(None),
            Some((key, value)) => coerce_i32(&self.app, key, value).map(Some),
        }
    }

    /// Optional boolean attribute
    ///
    /// Accepts a JSON boolean or the strings "true"/"false".
    pub fn try_attribute_bool(&self, attribute: &str) -> Result<Option<bool>> {
        match self.single(attribute)? {
            None => Ok(None),
            Some((_, Value::Bool(b))) => Ok(Some(*b)),
            Some((key, Value::String(s))) => s.trim().parse::<bool>().map(Some).map_err(|_| {
                Error::config_for_key(
                    &self.app,
                    key,
                    format!("expected a boolean, got string {s:?}"),
                )
            }),
            Some((key, other)) => Err(Error::config_for_key(
                &self.app,
                key,
                format!("expected a boolean, got {other}"),
            )),
        }
    }
}

/// Coerce a config value into an i32, erroring on anything non-numeric
pub(crate) fn coerce_i32(app: &str, key: &str, value: &Value) -> Result<i32> {
    match value {
        Value::Number(n) => n
            .as_i64()
            .and_then(|v| i32::try_from(v).ok())
            .ok_or_else(|| {
                Error::config_for_key(app, key, format!("integer out of range: {n}"))
            }),
        Value::String(s) => s.trim().parse::<i32>().map_err(|_| {
            Error::config_for_key(app, key, format!("expected an integer, got string {s:?}"))
        }),
        other => Err(Error::config_for_key(
            app,
            key,
            format!("expected an integer, got {other}"),
        )),
    }
}
