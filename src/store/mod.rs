//! Sharded in-memory store: data shards and user shards (spec.md §4.3).

pub mod conditions;

pub use conditions::GetWhenOutcome;

use conditions::notify_if_present;
use parking_lot::{Mutex, RwLock};
use std::collections::hash_map::DefaultHasher;
use std::collections::{BTreeMap, HashMap};
use std::hash::{Hash, Hasher};

struct DataShard {
    data: HashMap<String, Vec<u8>>,
    conditions: HashMap<String, conditions::ConditionSlot>,
}

impl DataShard {
    fn new() -> Self {
        Self {
            data: HashMap::new(),
            conditions: HashMap::new(),
        }
    }
}

/// Plaintext password store, as specified (spec.md §9: "a known
/// deficiency", not in scope to fix — no hashing, no TLS).
struct UserShard {
    users: HashMap<String, String>,
}

impl UserShard {
    fn new() -> Self {
        Self {
            users: HashMap::new(),
        }
    }
}

pub struct Store {
    data_shards: Vec<RwLock<DataShard>>,
    user_shards: Vec<Mutex<UserShard>>,
}

/// `abs(hash(key)) mod count` from spec.md §4.3. `DefaultHasher`'s `u64`
/// output is never negative, so no `abs()` is needed to get the same
/// behavior (DESIGN.md Open Question 4).
fn shard_index(key: &str, count: usize) -> usize {
    let mut hasher = DefaultHasher::new();
    key.hash(&mut hasher);
    (hasher.finish() % count as u64) as usize
}

impl Store {
    pub fn new(database_shards: usize, user_shards: usize) -> Self {
        Self {
            data_shards: (0..database_shards.max(1))
                .map(|_| RwLock::new(DataShard::new()))
                .collect(),
            user_shards: (0..user_shards.max(1))
                .map(|_| Mutex::new(UserShard::new()))
                .collect(),
        }
    }

    fn data_shard_for(&self, key: &str) -> usize {
        shard_index(key, self.data_shards.len())
    }

    fn user_shard_for(&self, user: &str) -> usize {
        shard_index(user, self.user_shards.len())
    }

    /// spec.md §4.3: write, then `notify_if_present` under the same lock.
    pub fn put(&self, key: &str, value: Vec<u8>) {
        let idx = self.data_shard_for(key);
        let mut shard = self.data_shards[idx].write();
        shard.data.insert(key.to_string(), value);
        notify_if_present(&mut shard, key);
    }

    pub fn get(&self, key: &str) -> Option<Vec<u8>> {
        let idx = self.data_shard_for(key);
        self.data_shards[idx].read().data.get(key).cloned()
    }

    /// Groups by shard, acquires write locks in ascending shard-index
    /// order, writes each group, and releases it before moving to the
    /// next (per-shard atomicity only — spec.md §4.3, §9).
    pub fn multi_put(&self, pairs: Vec<(String, Vec<u8>)>) {
        let mut groups: BTreeMap<usize, Vec<(String, Vec<u8>)>> = BTreeMap::new();
        for (k, v) in pairs {
            let idx = self.data_shard_for(&k);
            groups.entry(idx).or_default().push((k, v));
        }
        for (idx, group) in groups {
            let mut shard = self.data_shards[idx].write();
            for (k, v) in group {
                shard.data.insert(k.clone(), v);
                notify_if_present(&mut shard, &k);
            }
        }
    }

    /// Groups by shard, acquires read locks in ascending shard-index
    /// order; missing keys map to `None`.
    pub fn multi_get(&self, keys: Vec<String>) -> HashMap<String, Option<Vec<u8>>> {
        let mut groups: BTreeMap<usize, Vec<String>> = BTreeMap::new();
        for k in keys {
            let idx = self.data_shard_for(&k);
            groups.entry(idx).or_default().push(k);
        }
        let mut result = HashMap::new();
        for (idx, group) in groups {
            let shard = self.data_shards[idx].read();
            for k in group {
                let v = shard.data.get(&k).cloned();
                result.insert(k, v);
            }
        }
        result
    }

    /// `true` iff the user exists and the password matches.
    pub fn auth(&self, user: &str, password: &str) -> bool {
        let idx = self.user_shard_for(user);
        let shard = self.user_shards[idx].lock();
        shard.users.get(user).map(|p| p.as_str()) == Some(password)
    }

    /// `false` if the user already exists, else inserts and returns `true`.
    pub fn register(&self, user: &str, password: &str) -> bool {
        let idx = self.user_shard_for(user);
        let mut shard = self.user_shards[idx].lock();
        if shard.users.contains_key(user) {
            false
        } else {
            shard.users.insert(user.to_string(), password.to_string());
            true
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn put_then_get_round_trips() {
        let store = Store::new(4, 2);
        store.put("x", b"abc".to_vec());
        assert_eq!(store.get("x"), Some(b"abc".to_vec()));
        assert_eq!(store.get("y"), None);
    }

    #[test]
    fn register_then_register_again_fails() {
        let store = Store::new(2, 2);
        assert!(store.register("ada", "pw"));
        assert!(!store.register("ada", "pw2"));
    }

    #[test]
    fn register_then_auth_succeeds_and_wrong_password_fails() {
        let store = Store::new(2, 2);
        store.register("ada", "pw");
        assert!(store.auth("ada", "pw"));
        assert!(!store.auth("ada", "wrong"));
        assert!(!store.auth("nobody", "pw"));
    }

    #[test]
    fn multi_put_then_multi_get_returns_exactly_what_was_written() {
        let store = Store::new(4, 1);
        store.multi_put(vec![
            ("a".to_string(), b"A".to_vec()),
            ("b".to_string(), b"B".to_vec()),
        ]);
        let got = store.multi_get(vec!["a".to_string(), "b".to_string(), "c".to_string()]);
        assert_eq!(got.get("a").unwrap(), &Some(b"A".to_vec()));
        assert_eq!(got.get("b").unwrap(), &Some(b"B".to_vec()));
        assert_eq!(got.get("c").unwrap(), &None);
    }

    #[test]
    fn shard_routing_is_deterministic_within_a_run() {
        assert_eq!(shard_index("hello", 7), shard_index("hello", 7));
    }
}
