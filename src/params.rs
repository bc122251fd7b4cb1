//! Parameters and flags shared between a simulation and its controller.
//!
//! Both are internally synchronized: the controller may edit them at any time,
//! and the simulation sees the changes at its next read, typically right
//! after a boundary.

use std::collections::BTreeSet;
use std::fmt;
use std::sync::{Mutex, MutexGuard, RwLock, RwLockReadGuard, RwLockWriteGuard};

use serde::Serialize;

use crate::error::{JobError, Result};

/// A parameter value. The kind is fixed when the parameter is added.
#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(untagged)]
pub enum ParamValue {
    Int(i64),
    Double(f64),
    Text(String),
}

impl ParamValue {
    /// Parse `raw` as a value of the same kind as `self`.
    fn parse_same_kind(&self, raw: &str) -> Option<ParamValue> {
        let raw = raw.trim();
        match self {
            ParamValue::Int(_) => raw.parse().ok().map(ParamValue::Int),
            ParamValue::Double(_) => raw.parse().ok().map(ParamValue::Double),
            ParamValue::Text(_) => Some(ParamValue::Text(raw.to_string())),
        }
    }
}

impl fmt::Display for ParamValue {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            ParamValue::Int(v) => write!(f, "{}", v),
            ParamValue::Double(v) => write!(f, "{}", v),
            ParamValue::Text(v) => write!(f, "{}", v),
        }
    }
}

impl From<i64> for ParamValue {
    fn from(v: i64) -> Self {
        ParamValue::Int(v)
    }
}

impl From<i32> for ParamValue {
    fn from(v: i32) -> Self {
        ParamValue::Int(v.into())
    }
}

impl From<f64> for ParamValue {
    fn from(v: f64) -> Self {
        ParamValue::Double(v)
    }
}

impl From<&str> for ParamValue {
    fn from(v: &str) -> Self {
        ParamValue::Text(v.to_string())
    }
}

impl From<String> for ParamValue {
    fn from(v: String) -> Self {
        ParamValue::Text(v)
    }
}

#[derive(Debug, Clone)]
struct Param {
    key: String,
    value: ParamValue,
    default: ParamValue,
    lockable: bool,
}

#[derive(Debug, Default)]
struct ParamTable {
    entries: Vec<Param>,
    locked: bool,
}

impl ParamTable {
    fn find(&self, key: &str) -> Result<&Param> {
        self.entries
            .iter()
            .find(|p| p.key == key)
            .ok_or_else(|| JobError::ParamNotFound(key.to_string()))
    }

    fn find_mut(&mut self, key: &str) -> Result<&mut Param> {
        self.entries
            .iter_mut()
            .find(|p| p.key == key)
            .ok_or_else(|| JobError::ParamNotFound(key.to_string()))
    }
}

/// Ordered set of named parameters.
#[derive(Debug, Default)]
pub struct Parameters {
    table: RwLock<ParamTable>,
}

impl Parameters {
    pub fn new() -> Self {
        Self::default()
    }

    /// Add a parameter that is locked while the job runs.
    /// Re-adding a key replaces its value and default.
    pub fn add(&self, key: &str, value: impl Into<ParamValue>) {
        self.insert(key, value.into(), true);
    }

    /// Add a parameter that stays editable while the job runs.
    pub fn add_unlocked(&self, key: &str, value: impl Into<ParamValue>) {
        self.insert(key, value.into(), false);
    }

    fn insert(&self, key: &str, value: ParamValue, lockable: bool) {
        let mut table = self.write();
        let param = Param {
            key: key.to_string(),
            default: value.clone(),
            value,
            lockable,
        };
        match table.entries.iter_mut().find(|p| p.key == key) {
            Some(existing) => *existing = param,
            None => table.entries.push(param),
        }
    }

    /// Set a value from code. Ignores the lock; the simulation may always
    /// publish values through its own parameters.
    pub fn set(&self, key: &str, raw: &str) -> Result<()> {
        let mut table = self.write();
        let param = table.find_mut(key)?;
        param.value = Self::parse(param, raw)?;
        Ok(())
    }

    /// Apply an edit coming from the controller. Refused for lockable
    /// parameters while the parameters are locked.
    pub fn edit(&self, key: &str, raw: &str) -> Result<()> {
        let mut table = self.write();
        let locked = table.locked;
        let param = table.find_mut(key)?;
        if locked && param.lockable {
            return Err(JobError::ParamLocked(key.to_string()));
        }
        param.value = Self::parse(param, raw)?;
        tracing::debug!(key, value = %param.value, "Parameter edited");
        Ok(())
    }

    fn parse(param: &Param, raw: &str) -> Result<ParamValue> {
        param
            .value
            .parse_same_kind(raw)
            .ok_or_else(|| JobError::InvalidParam {
                key: param.key.clone(),
                value: raw.to_string(),
            })
    }

    pub fn get(&self, key: &str) -> Result<ParamValue> {
        Ok(self.read().find(key)?.value.clone())
    }

    /// Read a parameter as a floating point number.
    pub fn fget(&self, key: &str) -> Result<f64> {
        match self.get(key)? {
            ParamValue::Double(v) => Ok(v),
            ParamValue::Int(v) => Ok(v as f64),
            ParamValue::Text(s) => s.trim().parse().map_err(|_| JobError::InvalidParam {
                key: key.to_string(),
                value: s,
            }),
        }
    }

    /// Like [`fget`](Self::fget), falling back to `default` for unknown keys.
    pub fn fget_or(&self, key: &str, default: f64) -> Result<f64> {
        match self.fget(key) {
            Err(JobError::ParamNotFound(_)) => Ok(default),
            other => other,
        }
    }

    /// Read a parameter as an integer.
    pub fn iget(&self, key: &str) -> Result<i64> {
        match self.get(key)? {
            ParamValue::Int(v) => Ok(v),
            other => other
                .to_string()
                .trim()
                .parse()
                .map_err(|_| JobError::InvalidParam {
                    key: key.to_string(),
                    value: other.to_string(),
                }),
        }
    }

    pub fn sget(&self, key: &str) -> Result<String> {
        Ok(self.get(key)?.to_string())
    }

    /// Restore every parameter to the value it was added with.
    pub fn reset_values(&self) {
        let mut table = self.write();
        for param in &mut table.entries {
            param.value = param.default.clone();
        }
    }

    pub fn set_locked(&self, locked: bool) {
        self.write().locked = locked;
    }

    pub fn is_locked(&self) -> bool {
        self.read().locked
    }

    pub fn keys(&self) -> Vec<String> {
        self.read().entries.iter().map(|p| p.key.clone()).collect()
    }

    /// Current values in insertion order
    pub fn values(&self) -> Vec<(String, ParamValue)> {
        self.read()
            .entries
            .iter()
            .map(|p| (p.key.clone(), p.value.clone()))
            .collect()
    }

    fn read(&self) -> RwLockReadGuard<'_, ParamTable> {
        self.table.read().unwrap_or_else(|e| e.into_inner())
    }

    fn write(&self) -> RwLockWriteGuard<'_, ParamTable> {
        self.table.write().unwrap_or_else(|e| e.into_inner())
    }
}

impl fmt::Display for Parameters {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        for param in &self.read().entries {
            writeln!(f, "{} = {}", param.key, param.value)?;
        }
        Ok(())
    }
}

#[derive(Debug, Default)]
struct FlagState {
    declared: BTreeSet<String>,
    raised: BTreeSet<String>,
}

/// Named one-shot signals from the controller to the simulation.
///
/// The simulation declares the flags it responds to when it loads; pressing
/// the matching button raises the flag, and the simulation consumes it with
/// [`take`](Flags::take).
#[derive(Debug, Default)]
pub struct Flags {
    state: Mutex<FlagState>,
}

impl Flags {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn declare(&self, name: &str) {
        self.lock().declared.insert(name.to_string());
    }

    pub fn declared(&self) -> Vec<String> {
        self.lock().declared.iter().cloned().collect()
    }

    /// Raise a declared flag. Returns false for flags never declared.
    pub fn raise(&self, name: &str) -> bool {
        let mut state = self.lock();
        if !state.declared.contains(name) {
            return false;
        }
        state.raised.insert(name.to_string());
        true
    }

    /// Consume a raised flag. Returns whether it was raised.
    pub fn take(&self, name: &str) -> bool {
        self.lock().raised.remove(name)
    }

    pub fn is_raised(&self, name: &str) -> bool {
        self.lock().raised.contains(name)
    }

    pub fn clear(&self) {
        self.lock().raised.clear();
    }

    fn lock(&self) -> MutexGuard<'_, FlagState> {
        self.state.lock().unwrap_or_else(|e| e.into_inner())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn sample() -> Parameters {
        let params = Parameters::new();
        params.add("steps", 100);
        params.add("dt", 0.01);
        params.add("name", "lattice");
        params.add_unlocked("speed", 1.5);
        params
    }

    #[test]
    fn keys_keep_insertion_order() {
        let params = sample();
        assert_eq!(params.keys(), vec!["steps", "dt", "name", "speed"]);
    }

    #[test]
    fn typed_getters() {
        let params = sample();
        assert_eq!(params.iget("steps").unwrap(), 100);
        assert_eq!(params.fget("steps").unwrap(), 100.0);
        assert_eq!(params.fget("dt").unwrap(), 0.01);
        assert_eq!(params.sget("name").unwrap(), "lattice");
        assert!(matches!(
            params.fget("name"),
            Err(JobError::InvalidParam { .. })
        ));
        assert!(matches!(params.iget("nope"), Err(JobError::ParamNotFound(_))));
    }

    #[test]
    fn fget_or_falls_back_only_for_missing_keys() {
        let params = sample();
        assert_eq!(params.fget_or("missing", 2.5).unwrap(), 2.5);
        assert_eq!(params.fget_or("dt", 2.5).unwrap(), 0.01);
        assert!(params.fget_or("name", 2.5).is_err());
    }

    #[test]
    fn set_validates_against_kind() {
        let params = sample();
        params.set("steps", " 250 ").unwrap();
        assert_eq!(params.iget("steps").unwrap(), 250);

        let err = params.set("steps", "1.5").unwrap_err();
        assert_eq!(err.to_string(), "Parameter 'steps' is incompatible with 1.5");
        assert_eq!(params.iget("steps").unwrap(), 250);
    }

    #[test]
    fn edit_respects_lock_but_set_does_not() {
        let params = sample();
        params.set_locked(true);
        assert!(params.is_locked());

        assert!(matches!(
            params.edit("dt", "0.5"),
            Err(JobError::ParamLocked(_))
        ));
        params.edit("speed", "3").unwrap();
        assert_eq!(params.fget("speed").unwrap(), 3.0);

        params.set("dt", "0.5").unwrap();
        assert_eq!(params.fget("dt").unwrap(), 0.5);

        params.set_locked(false);
        params.edit("dt", "0.25").unwrap();
        assert_eq!(params.fget("dt").unwrap(), 0.25);
    }

    #[test]
    fn reset_values_restores_defaults() {
        let params = sample();
        params.set("steps", "7").unwrap();
        params.set("name", "other").unwrap();
        params.reset_values();
        assert_eq!(params.iget("steps").unwrap(), 100);
        assert_eq!(params.sget("name").unwrap(), "lattice");
    }

    #[test]
    fn display_lists_key_value_lines() {
        let params = Parameters::new();
        params.add("n", 3);
        params.add("label", "a b");
        assert_eq!(params.to_string(), "n = 3\nlabel = a b\n");
    }

    #[test]
    fn flags_must_be_declared_before_raising() {
        let flags = Flags::new();
        assert!(!flags.raise("Reset Lattice"));

        flags.declare("Reset Lattice");
        assert!(flags.raise("Reset Lattice"));
        assert!(flags.is_raised("Reset Lattice"));
        assert!(flags.take("Reset Lattice"));
        assert!(!flags.take("Reset Lattice"));
        assert_eq!(flags.declared(), vec!["Reset Lattice"]);
    }
}
