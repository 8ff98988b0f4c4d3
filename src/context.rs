use serde_json::{Map, Value};

/// Source of the application metadata merged into every flushed record.
///
/// The target asks the provider once per flush, so all records written in
/// the same flush share one snapshot.
pub trait ContextProvider: Send + Sync {
    /// Identifier of the running application.
    fn application(&self) -> String;

    /// Identifier of the active user.
    ///
    /// Returns `None` when there is no user subsystem; the `userId` key is
    /// then omitted entirely instead of being written as `null`.
    fn user_id(&self) -> Option<Value> {
        None
    }

    /// Process-wide variables the allow-list is applied to.
    fn variables(&self) -> Map<String, Value> {
        Map::new()
    }
}

/// Provider with fixed values.
#[derive(Debug, Clone, Default)]
pub struct StaticContext {
    application: String,
    user_id: Option<Value>,
    variables: Map<String, Value>,
}

impl StaticContext {
    pub fn new(application: impl Into<String>) -> Self {
        Self {
            application: application.into(),
            ..Self::default()
        }
    }

    pub fn with_user_id(mut self, user_id: impl Into<Value>) -> Self {
        self.user_id = Some(user_id.into());
        self
    }

    pub fn with_variable(mut self, name: impl Into<String>, value: impl Into<Value>) -> Self {
        self.variables.insert(name.into(), value.into());
        self
    }
}

impl ContextProvider for StaticContext {
    fn application(&self) -> String {
        self.application.clone()
    }

    fn user_id(&self) -> Option<Value> {
        self.user_id.clone()
    }

    fn variables(&self) -> Map<String, Value> {
        self.variables.clone()
    }
}

/// Provider exposing the process environment under the `env` variable,
/// so an allow-list entry like `env.HOSTNAME` picks a single variable.
#[derive(Debug, Clone)]
pub struct EnvironmentContext {
    application: String,
}

impl EnvironmentContext {
    pub fn new(application: impl Into<String>) -> Self {
        Self { application: application.into() }
    }
}

impl ContextProvider for EnvironmentContext {
    fn application(&self) -> String {
        self.application.clone()
    }

    fn variables(&self) -> Map<String, Value> {
        // Non-unicode variables are skipped.
        let env: Map<String, Value> = std::env::vars_os()
            .filter_map(|(k, v)| Some((k.into_string().ok()?, Value::String(v.into_string().ok()?))))
            .collect();
        let mut vars = Map::new();
        vars.insert("env".to_string(), Value::Object(env));
        vars
    }
}

/// Snapshot of the provider taken at the start of a flush.
#[derive(Debug, Clone, PartialEq)]
pub struct Context {
    pub application: String,
    pub user_id: Option<Value>,
    pub variables: Map<String, Value>,
}

impl Context {
    pub fn capture(provider: &dyn ContextProvider, allow_list: &[String]) -> Self {
        Self {
            application: provider.application(),
            user_id: provider.user_id(),
            variables: filter_variables(&provider.variables(), allow_list),
        }
    }

    /// Fields merged into each record: `application`, `userId` when a user
    /// is known, and `context`.
    pub fn to_map(&self) -> Map<String, Value> {
        let mut map = Map::new();
        map.insert("application".to_string(), Value::String(self.application.clone()));
        if let Some(user_id) = &self.user_id {
            map.insert("userId".to_string(), user_id.clone());
        }
        map.insert("context".to_string(), Value::Object(self.variables.clone()));
        map
    }
}

/// Pick the dotted paths named in `allow_list` out of `vars`.
///
/// Entries starting with `!` remove that path from the result instead.
/// Paths that do not exist are skipped.
pub fn filter_variables(vars: &Map<String, Value>, allow_list: &[String]) -> Map<String, Value> {
    let mut result = Map::new();
    let mut excluded = Vec::new();

    for entry in allow_list {
        if let Some(path) = entry.strip_prefix('!') {
            excluded.push(path);
            continue;
        }
        let parts: Vec<&str> = entry.split('.').collect();
        if let Some(value) = lookup(vars, &parts) {
            insert_path(&mut result, &parts, value.clone());
        }
    }

    for path in excluded {
        let parts: Vec<&str> = path.split('.').collect();
        remove_path(&mut result, &parts);
    }

    result
}

fn lookup<'a>(map: &'a Map<String, Value>, path: &[&str]) -> Option<&'a Value> {
    let (first, rest) = path.split_first()?;
    let value = map.get(*first)?;
    if rest.is_empty() {
        return Some(value);
    }
    match value {
        Value::Object(inner) => lookup(inner, rest),
        _ => None,
    }
}

fn insert_path(map: &mut Map<String, Value>, path: &[&str], value: Value) {
    let Some((first, rest)) = path.split_first() else {
        return;
    };
    if rest.is_empty() {
        map.insert(first.to_string(), value);
        return;
    }
    let slot = map
        .entry(first.to_string())
        .or_insert_with(|| Value::Object(Map::new()));
    if !slot.is_object() {
        *slot = Value::Object(Map::new());
    }
    if let Value::Object(inner) = slot {
        insert_path(inner, rest, value);
    }
}

fn remove_path(map: &mut Map<String, Value>, path: &[&str]) {
    let Some((first, rest)) = path.split_first() else {
        return;
    };
    if rest.is_empty() {
        map.remove(*first);
        return;
    }
    if let Some(Value::Object(inner)) = map.get_mut(*first) {
        remove_path(inner, rest);
    }
}
