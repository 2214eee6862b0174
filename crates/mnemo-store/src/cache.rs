use async_trait::async_trait;
use dashmap::DashMap;
use dashmap::mapref::entry::Entry;
use mnemo_core::{Cache, MnemoError, Result};
use std::collections::VecDeque;
use std::time::{Duration, Instant};

#[derive(Debug, Clone)]
enum Value {
    Str(String),
    List(VecDeque<String>),
}

#[derive(Debug, Clone)]
struct Slot {
    value: Value,
    expires_at: Option<Instant>,
}

impl Slot {
    fn new(value: Value, ttl: Option<Duration>) -> Self {
        Self {
            value,
            expires_at: ttl.map(|t| Instant::now() + t),
        }
    }

    fn is_expired(&self) -> bool {
        self.expires_at.is_some_and(|at| at <= Instant::now())
    }
}

/// In-process key/value cache with string and list values and per-key expiry.
///
/// Operations on a single key are atomic: each one holds the shard lock for
/// that key while it reads and writes. Expired keys are dropped lazily on
/// access.
#[derive(Debug, Default)]
pub struct MemoryCache {
    slots: DashMap<String, Slot>,
}

fn wrong_type(key: &str) -> MnemoError {
    MnemoError::storage("cache", format!("WRONGTYPE operation against key '{key}'"))
}

/// Resolve Redis-style inclusive indices (negative counts from the end)
/// against a list of `len` elements. `None` when the range is empty.
fn resolve_range(len: usize, start: isize, stop: isize) -> Option<(usize, usize)> {
    let len = len as isize;
    let start = if start < 0 { (len + start).max(0) } else { start };
    let stop = if stop < 0 { len + stop } else { stop.min(len - 1) };
    if len == 0 || start > stop || start >= len || stop < 0 {
        return None;
    }
    Some((start as usize, stop as usize))
}

impl MemoryCache {
    pub fn new() -> Self {
        Self::default()
    }

    /// Drop the key if it has expired.
    fn purge_expired(&self, key: &str) {
        self.slots.remove_if(key, |_, slot| slot.is_expired());
    }

    /// Live key count, for diagnostics.
    pub fn len(&self) -> usize {
        self.slots.iter().filter(|s| !s.is_expired()).count()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }
}

#[async_trait]
impl Cache for MemoryCache {
    async fn get(&self, key: &str) -> Result<Option<String>> {
        self.purge_expired(key);
        match self.slots.get(key) {
            None => Ok(None),
            Some(slot) => match &slot.value {
                Value::Str(s) => Ok(Some(s.clone())),
                Value::List(_) => Err(wrong_type(key)),
            },
        }
    }

    async fn set(&self, key: &str, value: &str, ttl: Option<Duration>) -> Result<()> {
        self.slots
            .insert(key.to_string(), Slot::new(Value::Str(value.to_string()), ttl));
        Ok(())
    }

    async fn set_if_absent(&self, key: &str, value: &str, ttl: Option<Duration>) -> Result<bool> {
        match self.slots.entry(key.to_string()) {
            Entry::Occupied(mut e) => {
                if e.get().is_expired() {
                    e.insert(Slot::new(Value::Str(value.to_string()), ttl));
                    Ok(true)
                } else {
                    Ok(false)
                }
            }
            Entry::Vacant(e) => {
                e.insert(Slot::new(Value::Str(value.to_string()), ttl));
                Ok(true)
            }
        }
    }

    async fn del(&self, key: &str) -> Result<bool> {
        Ok(self
            .slots
            .remove(key)
            .is_some_and(|(_, slot)| !slot.is_expired()))
    }

    async fn exists(&self, key: &str) -> Result<bool> {
        self.purge_expired(key);
        Ok(self.slots.contains_key(key))
    }

    async fn incr_by(&self, key: &str, delta: i64) -> Result<i64> {
        let mut entry = self
            .slots
            .entry(key.to_string())
            .or_insert_with(|| Slot::new(Value::Str("0".into()), None));
        if entry.is_expired() {
            *entry = Slot::new(Value::Str("0".into()), None);
        }
        let current = match &entry.value {
            Value::Str(s) => s
                .parse::<i64>()
                .map_err(|_| MnemoError::storage("cache", format!("value at '{key}' is not an integer")))?,
            Value::List(_) => return Err(wrong_type(key)),
        };
        let next = current.saturating_add(delta);
        entry.value = Value::Str(next.to_string());
        Ok(next)
    }

    async fn rpush(&self, key: &str, value: &str) -> Result<usize> {
        let mut entry = self
            .slots
            .entry(key.to_string())
            .or_insert_with(|| Slot::new(Value::List(VecDeque::new()), None));
        if entry.is_expired() {
            *entry = Slot::new(Value::List(VecDeque::new()), None);
        }
        match &mut entry.value {
            Value::List(list) => {
                list.push_back(value.to_string());
                Ok(list.len())
            }
            Value::Str(_) => Err(wrong_type(key)),
        }
    }

    async fn ltrim(&self, key: &str, start: isize, stop: isize) -> Result<()> {
        self.purge_expired(key);
        let emptied = {
            let Some(mut slot) = self.slots.get_mut(key) else {
                return Ok(());
            };
            let Value::List(list) = &mut slot.value else {
                return Err(wrong_type(key));
            };
            match resolve_range(list.len(), start, stop) {
                Some((from, to)) => {
                    list.truncate(to + 1);
                    list.drain(..from);
                    false
                }
                None => true,
            }
        };
        if emptied {
            self.slots.remove(key);
        }
        Ok(())
    }

    async fn lrange(&self, key: &str, start: isize, stop: isize) -> Result<Vec<String>> {
        self.purge_expired(key);
        let Some(slot) = self.slots.get(key) else {
            return Ok(vec![]);
        };
        let Value::List(list) = &slot.value else {
            return Err(wrong_type(key));
        };
        Ok(match resolve_range(list.len(), start, stop) {
            Some((from, to)) => list.range(from..=to).cloned().collect(),
            None => vec![],
        })
    }

    async fn llen(&self, key: &str) -> Result<usize> {
        self.purge_expired(key);
        match self.slots.get(key) {
            None => Ok(0),
            Some(slot) => match &slot.value {
                Value::List(list) => Ok(list.len()),
                Value::Str(_) => Err(wrong_type(key)),
            },
        }
    }

    async fn expire(&self, key: &str, ttl: Duration) -> Result<bool> {
        self.purge_expired(key);
        match self.slots.get_mut(key) {
            Some(mut slot) => {
                slot.expires_at = Some(Instant::now() + ttl);
                Ok(true)
            }
            None => Ok(false),
        }
    }

    async fn ttl(&self, key: &str) -> Result<Option<Duration>> {
        self.purge_expired(key);
        Ok(self
            .slots
            .get(key)
            .and_then(|slot| slot.expires_at)
            .map(|at| at.saturating_duration_since(Instant::now())))
    }

    async fn keys(&self, prefix: &str) -> Result<Vec<String>> {
        let mut keys: Vec<String> = self
            .slots
            .iter()
            .filter(|s| !s.is_expired() && s.key().starts_with(prefix))
            .map(|s| s.key().clone())
            .collect();
        keys.sort();
        Ok(keys)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_resolve_range() {
        assert_eq!(resolve_range(5, 0, -1), Some((0, 4)));
        assert_eq!(resolve_range(5, -3, -1), Some((2, 4)));
        assert_eq!(resolve_range(5, -10, 1), Some((0, 1)));
        assert_eq!(resolve_range(5, 3, 100), Some((3, 4)));
        assert_eq!(resolve_range(5, 4, 2), None);
        assert_eq!(resolve_range(0, 0, -1), None);
    }
}
