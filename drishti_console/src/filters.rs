//! Filter state store
//!
//! For each declared filter this keeps the triple (field value as edited,
//! external value in the query location, active/invalid flag) consistent,
//! debounces edits before they hit the query location, and publishes
//! [`Event::FiltersChanged`] for every accepted change.
//!
//! Feedback loops are avoided with a generation counter: every write the
//! store itself performs records the location's new generation, and
//! [`external_changed`](FilterStateStore::external_changed) ignores
//! notifications carrying that generation.

use crate::bus::{Event, EventBus};
use crate::debounce::Debouncer;
use std::collections::BTreeMap;
use std::panic::{catch_unwind, AssertUnwindSafe};
use std::sync::{Arc, Mutex};
use std::time::Duration;

/// Quiet period before an edited filter value is written externally
pub const EDIT_DEBOUNCE: Duration = Duration::from_millis(500);

/// Changed filter names mapped to their new values; `None` means cleared
pub type FilterUpdate = BTreeMap<String, Option<FilterValue>>;

/// A filter's value: one string for text filters, a set of strings for
/// multi-value filters stored as repeated query keys
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum FilterValue {
    Single(String),
    Many(Vec<String>),
}

impl FilterValue {
    pub fn single(value: impl Into<String>) -> Self {
        Self::Single(value.into())
    }

    pub fn many<I, S>(values: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        Self::Many(values.into_iter().map(Into::into).collect())
    }

    pub fn as_single(&self) -> Option<&str> {
        match self {
            Self::Single(v) => Some(v),
            Self::Many(_) => None,
        }
    }

    pub fn as_many(&self) -> Option<&[String]> {
        match self {
            Self::Single(_) => None,
            Self::Many(v) => Some(v),
        }
    }
}

/// Declaration of one filter: its name and optional transforms.
///
/// `replace` normalizes the edited text and must be idempotent; `encode`
/// and `decode` convert between field and external representation and must
/// round-trip (`decode(encode(v)) == v`) for every value `validate` accepts.
#[derive(Clone)]
pub struct FilterSpec {
    pub name: &'static str,
    pub multi: bool,
    pub replace: Option<fn(&str) -> String>,
    pub validate: Option<fn(&str) -> bool>,
    pub encode: Option<fn(&str) -> String>,
    pub decode: Option<fn(&str) -> String>,
}

impl FilterSpec {
    pub fn text(name: &'static str) -> Self {
        Self {
            name,
            multi: false,
            replace: None,
            validate: None,
            encode: None,
            decode: None,
        }
    }

    pub fn multi(name: &'static str) -> Self {
        Self {
            multi: true,
            ..Self::text(name)
        }
    }

    pub fn with_replace(mut self, f: fn(&str) -> String) -> Self {
        self.replace = Some(f);
        self
    }

    pub fn with_validate(mut self, f: fn(&str) -> bool) -> Self {
        self.validate = Some(f);
        self
    }

    pub fn with_codec(mut self, encode: fn(&str) -> String, decode: fn(&str) -> String) -> Self {
        self.encode = Some(encode);
        self.decode = Some(decode);
        self
    }

    fn apply_replace(&self, value: &str) -> String {
        match self.replace {
            Some(f) => f(value),
            None => value.to_string(),
        }
    }

    /// A panicking validator counts as validation failure, never an error
    fn is_valid(&self, value: &str) -> bool {
        match self.validate {
            Some(f) => catch_unwind(AssertUnwindSafe(|| f(value))).unwrap_or(false),
            None => true,
        }
    }

    fn encode_value(&self, value: &str) -> String {
        match self.encode {
            Some(f) => f(value),
            None => value.to_string(),
        }
    }

    fn decode_value(&self, value: &str) -> String {
        match self.decode {
            Some(f) => f(value),
            None => value.to_string(),
        }
    }
}

/// Strip everything but digits; idempotent
pub fn clean_number(value: &str) -> String {
    value.chars().filter(|c| c.is_ascii_digit()).collect()
}

pub fn validate_port(value: &str) -> bool {
    value.parse::<u32>().is_ok_and(|port| port <= 65535)
}

pub fn validate_ip_address(value: &str) -> bool {
    value.parse::<std::net::IpAddr>().is_ok()
}

pub fn validate_non_negative(value: &str) -> bool {
    value.parse::<i64>().is_ok_and(|n| n >= 0)
}

pub fn validate_boolean(value: &str) -> bool {
    value == "true" || value == "false"
}

/// The console's filter set
pub fn default_filters() -> Vec<FilterSpec> {
    vec![
        FilterSpec::text("service_port")
            .with_replace(clean_number)
            .with_validate(validate_port),
        FilterSpec::multi("matched_rules"),
        FilterSpec::text("client_address").with_validate(validate_ip_address),
        FilterSpec::text("client_port")
            .with_replace(clean_number)
            .with_validate(validate_port),
        FilterSpec::text("min_duration")
            .with_replace(clean_number)
            .with_validate(validate_non_negative),
        FilterSpec::text("max_duration").with_replace(clean_number),
        FilterSpec::text("min_bytes")
            .with_replace(clean_number)
            .with_validate(validate_non_negative),
        FilterSpec::text("max_bytes").with_replace(clean_number),
        FilterSpec::text("contains_string"),
        FilterSpec::text("marked").with_validate(validate_boolean),
    ]
}

/// External key-value surface the filters persist into (the address bar in
/// the original console). Repeated keys represent multi-value filters.
///
/// Every mutation returns the location's new generation number, used to
/// tell the store's own writes apart from independent changes.
pub trait QueryLocation: Send + Sync + 'static {
    /// First value under `key`, if present
    fn get(&self, key: &str) -> Option<String>;

    /// All values under `key`, in insertion order
    fn get_all(&self, key: &str) -> Vec<String>;

    /// Replace all values under `key`
    fn set(&self, key: &str, values: &[String]) -> u64;

    /// Remove `key` entirely
    fn remove(&self, key: &str) -> u64;

    fn generation(&self) -> u64;

    /// All pairs in order, the query parameters for backend requests
    fn entries(&self) -> Vec<(String, String)>;
}

struct LocationInner {
    pairs: Vec<(String, String)>,
    generation: u64,
}

/// In-memory [`QueryLocation`]
pub struct MemoryLocation {
    inner: Mutex<LocationInner>,
}

impl MemoryLocation {
    pub fn new() -> Self {
        Self {
            inner: Mutex::new(LocationInner {
                pairs: Vec::new(),
                generation: 0,
            }),
        }
    }

    /// Seed from existing pairs, e.g. parsed from a navigated-to address
    pub fn from_pairs<I, K, V>(pairs: I) -> Self
    where
        I: IntoIterator<Item = (K, V)>,
        K: Into<String>,
        V: Into<String>,
    {
        Self {
            inner: Mutex::new(LocationInner {
                pairs: pairs
                    .into_iter()
                    .map(|(k, v)| (k.into(), v.into()))
                    .collect(),
                generation: 0,
            }),
        }
    }
}

impl Default for MemoryLocation {
    fn default() -> Self {
        Self::new()
    }
}

impl QueryLocation for MemoryLocation {
    fn get(&self, key: &str) -> Option<String> {
        let inner = self.inner.lock().unwrap();
        inner
            .pairs
            .iter()
            .find(|(k, _)| k == key)
            .map(|(_, v)| v.clone())
    }

    fn get_all(&self, key: &str) -> Vec<String> {
        let inner = self.inner.lock().unwrap();
        inner
            .pairs
            .iter()
            .filter(|(k, _)| k == key)
            .map(|(_, v)| v.clone())
            .collect()
    }

    fn set(&self, key: &str, values: &[String]) -> u64 {
        let mut inner = self.inner.lock().unwrap();
        inner.pairs.retain(|(k, _)| k != key);
        inner
            .pairs
            .extend(values.iter().map(|v| (key.to_string(), v.clone())));
        inner.generation += 1;
        inner.generation
    }

    fn remove(&self, key: &str) -> u64 {
        let mut inner = self.inner.lock().unwrap();
        inner.pairs.retain(|(k, _)| k != key);
        inner.generation += 1;
        inner.generation
    }

    fn generation(&self) -> u64 {
        self.inner.lock().unwrap().generation
    }

    fn entries(&self) -> Vec<(String, String)> {
        self.inner.lock().unwrap().pairs.clone()
    }
}

/// Render location entries as a query string, for logs and navigation
pub fn to_query_string(entries: &[(String, String)]) -> String {
    fn escape(s: &str) -> String {
        let mut out = String::with_capacity(s.len());
        for c in s.chars() {
            match c {
                '&' => out.push_str("%26"),
                '=' => out.push_str("%3D"),
                '%' => out.push_str("%25"),
                ' ' => out.push_str("%20"),
                _ => out.push(c),
            }
        }
        out
    }

    entries
        .iter()
        .map(|(k, v)| format!("{}={}", escape(k), escape(v)))
        .collect::<Vec<_>>()
        .join("&")
}

/// Per-filter activation state
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum FilterStatus {
    Inactive,
    Active,
    /// The edited or navigated-to value failed validation; the raw value is
    /// still shown so the user sees what is wrong instead of losing input
    Invalid,
}

/// Snapshot of one filter's state
#[derive(Debug, Clone)]
pub struct FilterState {
    pub field_value: FilterValue,
    pub external: Option<FilterValue>,
    pub status: FilterStatus,
}

impl FilterState {
    fn inactive(multi: bool) -> Self {
        Self {
            field_value: if multi {
                FilterValue::Many(Vec::new())
            } else {
                FilterValue::Single(String::new())
            },
            external: None,
            status: FilterStatus::Inactive,
        }
    }
}

struct StoreInner {
    specs: Vec<FilterSpec>,
    states: BTreeMap<String, FilterState>,
    /// Generation of this store's own last location write
    last_own_write: u64,
}

impl StoreInner {
    fn spec(&self, name: &str) -> Option<&FilterSpec> {
        self.specs.iter().find(|s| s.name == name)
    }
}

/// Canonical owner of the console's filter values
pub struct FilterStateStore<L: QueryLocation> {
    bus: Arc<EventBus>,
    location: Arc<L>,
    debouncer: Debouncer,
    inner: Arc<Mutex<StoreInner>>,
}

impl<L: QueryLocation> FilterStateStore<L> {
    pub fn new(specs: Vec<FilterSpec>, location: Arc<L>, bus: Arc<EventBus>) -> Self {
        let states = specs
            .iter()
            .map(|s| (s.name.to_string(), FilterState::inactive(s.multi)))
            .collect();
        Self {
            bus,
            location,
            debouncer: Debouncer::new(),
            inner: Arc::new(Mutex::new(StoreInner {
                specs,
                states,
                last_own_write: 0,
            })),
        }
    }

    /// Derive every filter's state from the query location, as done on
    /// mount. Does not publish.
    pub fn init_from_external(&self) {
        let mut inner = self.inner.lock().unwrap();
        let derived: Vec<(String, FilterState)> = inner
            .specs
            .iter()
            .map(|spec| (spec.name.to_string(), self.derive_state(spec)))
            .collect();
        for (name, state) in derived {
            inner.states.insert(name, state);
        }
    }

    fn derive_state(&self, spec: &FilterSpec) -> FilterState {
        if spec.multi {
            let values = self.location.get_all(spec.name);
            if values.is_empty() {
                return FilterState::inactive(true);
            }
            let decoded: Vec<String> =
                values.iter().map(|v| spec.decode_value(v)).collect();
            return FilterState {
                field_value: FilterValue::Many(decoded),
                external: Some(FilterValue::Many(values)),
                status: FilterStatus::Active,
            };
        }

        match self.location.get(spec.name) {
            None => FilterState::inactive(false),
            Some(external) => {
                let field = spec.apply_replace(&spec.decode_value(&external));
                if spec.is_valid(&field) {
                    FilterState {
                        field_value: FilterValue::Single(field),
                        external: Some(FilterValue::Single(external)),
                        status: FilterStatus::Active,
                    }
                } else {
                    FilterState {
                        field_value: FilterValue::Single(field),
                        external: Some(FilterValue::Single(external)),
                        status: FilterStatus::Invalid,
                    }
                }
            }
        }
    }

    /// Handle a user edit of a text filter.
    ///
    /// An empty result (after `replace`) clears the filter immediately.
    /// Anything else schedules a debounced external write — also when the
    /// value is invalid, so navigation reflects the edited string; the
    /// invalid flag is set right away either way.
    pub fn edit(&self, name: &str, raw: &str) {
        let (field, valid) = {
            let mut inner = self.inner.lock().unwrap();
            let Some(spec) = inner.spec(name).cloned() else {
                tracing::debug!(filter = name, "edit for undeclared filter ignored");
                return;
            };
            if spec.multi {
                tracing::debug!(filter = name, "text edit for multi-value filter ignored");
                return;
            }

            let field = spec.apply_replace(raw);
            if field.is_empty() {
                self.debouncer.cancel(name);
                let generation = self.location.remove(name);
                inner.last_own_write = generation;
                inner
                    .states
                    .insert(name.to_string(), FilterState::inactive(false));
                drop(inner);
                self.publish_one(name, None);
                return;
            }

            let valid = spec.is_valid(&field);
            let state = inner
                .states
                .entry(name.to_string())
                .or_insert_with(|| FilterState::inactive(false));
            state.field_value = FilterValue::Single(field.clone());
            state.status = if valid {
                FilterStatus::Active
            } else {
                FilterStatus::Invalid
            };
            let encoded = spec.encode_value(&field);
            (encoded, valid)
        };

        if !valid {
            tracing::debug!(filter = name, value = %field, "invalid filter value");
        }

        let name = name.to_string();
        let location = self.location.clone();
        let inner = self.inner.clone();
        let bus = self.bus.clone();
        let key = name.clone();
        self.debouncer.schedule(&key, EDIT_DEBOUNCE, async move {
            let generation = location.set(&name, std::slice::from_ref(&field));
            {
                let mut inner = inner.lock().unwrap();
                inner.last_own_write = generation;
                if let Some(state) = inner.states.get_mut(&name) {
                    state.external = Some(FilterValue::Single(field.clone()));
                }
            }
            let mut update = FilterUpdate::new();
            update.insert(name, Some(FilterValue::Single(field)));
            bus.dispatch(Event::FiltersChanged(update));
        });
    }

    /// Replace a multi-value filter's values; no-op when the set is
    /// unchanged (order-insensitive). Writes through immediately.
    pub fn set_many(&self, name: &str, values: Vec<String>) {
        {
            let mut inner = self.inner.lock().unwrap();
            let Some(spec) = inner.spec(name) else {
                tracing::debug!(filter = name, "update for undeclared filter ignored");
                return;
            };
            if !spec.multi {
                tracing::debug!(filter = name, "set_many for text filter ignored");
                return;
            }

            let current = inner
                .states
                .get(name)
                .and_then(|s| s.field_value.as_many())
                .map(<[String]>::to_vec)
                .unwrap_or_default();
            let mut sorted_new = values.clone();
            sorted_new.sort();
            let mut sorted_current = current;
            sorted_current.sort();
            if sorted_new == sorted_current {
                return;
            }

            let generation = if values.is_empty() {
                self.location.remove(name)
            } else {
                self.location.set(name, &values)
            };
            inner.last_own_write = generation;
            inner.states.insert(
                name.to_string(),
                if values.is_empty() {
                    FilterState::inactive(true)
                } else {
                    FilterState {
                        field_value: FilterValue::Many(values.clone()),
                        external: Some(FilterValue::Many(values.clone())),
                        status: FilterStatus::Active,
                    }
                },
            );
        }

        let value = {
            let inner = self.inner.lock().unwrap();
            inner.states.get(name).and_then(|s| s.external.clone())
        };
        self.publish_one(name, value);
    }

    /// Apply filter changes made by another component, writing through to
    /// the location immediately (no debounce) and publishing the result.
    /// `None` clears the named filter.
    pub fn apply_update(&self, update: FilterUpdate) {
        for (name, value) in update {
            match value {
                Some(FilterValue::Many(values)) => self.set_many(&name, values),
                Some(FilterValue::Single(raw)) => self.set_single(&name, &raw),
                None => self.clear(&name),
            }
        }
    }

    /// Write a text filter's value through immediately.
    ///
    /// Unlike [`edit`](Self::edit) there is no debounce and no `replace`
    /// pass: the caller supplies a final value, not keystrokes.
    fn set_single(&self, name: &str, raw: &str) {
        {
            let mut inner = self.inner.lock().unwrap();
            let Some(spec) = inner.spec(name).cloned() else {
                tracing::debug!(filter = name, "update for undeclared filter ignored");
                return;
            };
            if spec.multi {
                tracing::debug!(filter = name, "single-value update for multi filter ignored");
                return;
            }

            self.debouncer.cancel(name);
            let encoded = spec.encode_value(raw);
            let generation = self.location.set(name, std::slice::from_ref(&encoded));
            inner.last_own_write = generation;
            inner.states.insert(
                name.to_string(),
                FilterState {
                    field_value: FilterValue::Single(raw.to_string()),
                    external: Some(FilterValue::Single(encoded)),
                    status: if spec.is_valid(raw) {
                        FilterStatus::Active
                    } else {
                        FilterStatus::Invalid
                    },
                },
            );
        }

        let value = {
            let inner = self.inner.lock().unwrap();
            inner.states.get(name).and_then(|s| s.external.clone())
        };
        self.publish_one(name, value);
    }

    /// Remove a filter, whatever its kind
    fn clear(&self, name: &str) {
        {
            let mut inner = self.inner.lock().unwrap();
            let Some(spec) = inner.spec(name) else {
                return;
            };
            let multi = spec.multi;
            if inner
                .states
                .get(name)
                .is_some_and(|s| s.status == FilterStatus::Inactive)
            {
                return;
            }
            self.debouncer.cancel(name);
            let generation = self.location.remove(name);
            inner.last_own_write = generation;
            inner
                .states
                .insert(name.to_string(), FilterState::inactive(multi));
        }
        self.publish_one(name, None);
    }

    /// Handle a query-location change that may not have been caused by this
    /// store. `generation` is the location's generation after the change;
    /// if it matches the store's own last write the change is ignored,
    /// breaking the write → notify → re-derive feedback loop.
    pub fn external_changed(&self, generation: u64) {
        let changed: FilterUpdate = {
            let mut inner = self.inner.lock().unwrap();
            if generation == inner.last_own_write {
                tracing::debug!(generation, "location change caused by own write, ignored");
                return;
            }

            let derived: Vec<(String, FilterState)> = inner
                .specs
                .iter()
                .map(|spec| (spec.name.to_string(), self.derive_state(spec)))
                .collect();

            let mut changed = FilterUpdate::new();
            for (name, state) in derived {
                let previous = inner.states.get(&name).and_then(|s| s.external.clone());
                if previous != state.external {
                    changed.insert(name.clone(), state.external.clone());
                }
                inner.states.insert(name, state);
            }
            changed
        };

        if !changed.is_empty() {
            tracing::debug!(filters = changed.len(), "filters re-derived from location");
            self.bus.dispatch(Event::FiltersChanged(changed));
        }
    }

    /// Snapshot of one filter's state
    pub fn state(&self, name: &str) -> Option<FilterState> {
        self.inner.lock().unwrap().states.get(name).cloned()
    }

    pub fn status(&self, name: &str) -> Option<FilterStatus> {
        self.state(name).map(|s| s.status)
    }

    /// Current query parameters for backend requests, exactly as persisted
    pub fn query_params(&self) -> Vec<(String, String)> {
        self.location.entries()
    }

    fn publish_one(&self, name: &str, value: Option<FilterValue>) {
        let mut update = FilterUpdate::new();
        update.insert(name.to_string(), value);
        self.bus.dispatch(Event::FiltersChanged(update));
    }
}
