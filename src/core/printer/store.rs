use serde::Serialize;
use serde_json::{Map, Value};
use std::collections::{BTreeMap, HashMap};
use std::sync::RwLock;
use tokio::sync::watch;

/// Last known value of one controller object
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct ObjectEntry {
    pub value: Value,
    /// Controller eventtime of the value
    pub timestamp: f64,
}

/// Point-in-time copy of a store
#[derive(Debug, Clone, Default, PartialEq, Serialize)]
pub struct PrinterSnapshot {
    pub objects: BTreeMap<String, ObjectEntry>,
    pub version: u64,
}

impl PrinterSnapshot {
    pub fn get(&self, name: &str) -> Option<&Value> {
        self.objects.get(name).map(|entry| &entry.value)
    }
}

/// Per-session cache of controller objects.
///
/// Written only by the session's notification dispatcher; every successful
/// write bumps a version published on a `watch` channel so renderers can wake
/// up without polling.
#[derive(Debug)]
pub struct PrinterStateStore {
    objects: RwLock<HashMap<String, ObjectEntry>>,
    version: watch::Sender<u64>,
}

impl PrinterStateStore {
    pub fn new() -> Self {
        let (version, _) = watch::channel(0);
        Self {
            objects: RwLock::new(HashMap::new()),
            version,
        }
    }

    /// Apply a value for `name` observed at `timestamp`.
    ///
    /// A timestamp older than the stored one is a no-op and returns `false`.
    /// Object values are merged field by field into the stored object, since
    /// controllers only send the fields that changed; other values replace
    /// the stored value.
    pub fn update(&self, name: &str, value: Value, timestamp: f64) -> bool {
        if timestamp.is_nan() {
            return false;
        }

        {
            let mut objects = self.objects.write().unwrap_or_else(|e| e.into_inner());
            match objects.get_mut(name) {
                Some(entry) if timestamp < entry.timestamp => return false,
                Some(entry) => {
                    merge(&mut entry.value, value);
                    entry.timestamp = timestamp;
                }
                None => {
                    objects.insert(name.to_string(), ObjectEntry { value, timestamp });
                }
            }
        }

        self.bump();
        true
    }

    /// Forget every object. Called when a new link is attached, since a
    /// restarted host counts eventtime from zero again.
    pub fn clear(&self) {
        {
            let mut objects = self.objects.write().unwrap_or_else(|e| e.into_inner());
            if objects.is_empty() {
                return;
            }
            objects.clear();
        }
        self.bump();
    }

    /// Apply a subscription snapshot object by object.
    ///
    /// Each object goes through [`PrinterStateStore::update`], so one that a
    /// newer notification already reported is left alone. Returns how many
    /// objects were applied.
    pub fn apply_snapshot(&self, status: Map<String, Value>, timestamp: f64) -> usize {
        status
            .into_iter()
            .filter(|(name, value)| self.update(name, value.clone(), timestamp))
            .count()
    }

    /// Latest value for `name`
    pub fn read(&self, name: &str) -> Option<Value> {
        self.entry(name).map(|entry| entry.value)
    }

    pub fn entry(&self, name: &str) -> Option<ObjectEntry> {
        let objects = self.objects.read().unwrap_or_else(|e| e.into_inner());
        objects.get(name).cloned()
    }

    /// Known object names, sorted
    pub fn names(&self) -> Vec<String> {
        let objects = self.objects.read().unwrap_or_else(|e| e.into_inner());
        let mut names: Vec<String> = objects.keys().cloned().collect();
        names.sort();
        names
    }

    /// Newest timestamp held by any entry
    pub fn latest_timestamp(&self) -> Option<f64> {
        let objects = self.objects.read().unwrap_or_else(|e| e.into_inner());
        objects
            .values()
            .map(|entry| entry.timestamp)
            .fold(None, |acc: Option<f64>, ts| Some(acc.map_or(ts, |a| a.max(ts))))
    }

    pub fn snapshot(&self) -> PrinterSnapshot {
        let objects = self.objects.read().unwrap_or_else(|e| e.into_inner());
        PrinterSnapshot {
            objects: objects
                .iter()
                .map(|(name, entry)| (name.clone(), entry.clone()))
                .collect(),
            version: *self.version.borrow(),
        }
    }

    pub fn version(&self) -> u64 {
        *self.version.borrow()
    }

    /// Receiver that changes whenever the store does
    pub fn subscribe(&self) -> watch::Receiver<u64> {
        self.version.subscribe()
    }

    fn bump(&self) {
        self.version.send_modify(|version| *version += 1);
    }
}

impl Default for PrinterStateStore {
    fn default() -> Self {
        Self::new()
    }
}

fn merge(stored: &mut Value, incoming: Value) {
    match (stored, incoming) {
        (Value::Object(stored), Value::Object(incoming)) => {
            for (key, value) in incoming {
                stored.insert(key, value);
            }
        }
        (stored, incoming) => *stored = incoming,
    }
}
