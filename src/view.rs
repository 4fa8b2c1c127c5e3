//! 配置树视图。
//!
//! - [`TrackedView`]：读取复合子节点时递归包裹为同类视图，标量直接透出；
//!   任意深度的写入先落到底层树，再同步调用同一个共享钩子。不做差异比较，
//!   相同值的写入、形状之外的新键同样触发。
//! - [`ReadOnlyView`]：读取同样递归包裹（包裹的是被访问的子节点），写入静默丢弃。
//! - [`ConfigView`]：存储对外交出的统一视图，二者之一。
use serde::Serialize;
use serde_json::Value;

use crate::error::{ConfStoreError, Result};

/// 写入发生后的回调；由存储提供，所有层级的视图共享同一个实例。
pub trait MutationHook {
    fn mutated(&self);
}

impl<F: Fn()> MutationHook for F {
    fn mutated(&self) {
        self()
    }
}

/// Address of a child inside an object (`Field`) or an array (`Index`).
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub enum Key {
    Field(String),
    Index(usize),
}

impl From<&str> for Key {
    fn from(s: &str) -> Self {
        Key::Field(s.to_string())
    }
}
impl From<String> for Key {
    fn from(s: String) -> Self {
        Key::Field(s)
    }
}
impl From<&String> for Key {
    fn from(s: &String) -> Self {
        Key::Field(s.clone())
    }
}
impl From<usize> for Key {
    fn from(i: usize) -> Self {
        Key::Index(i)
    }
}

/// 读取结果：复合节点（对象/数组）被包裹成视图 `V`，标量原样透出。
#[derive(Debug)]
pub enum Entry<'a, V> {
    Node(V),
    Scalar(&'a Value),
}

impl<'a, V> Entry<'a, V> {
    pub fn node(self) -> Option<V> {
        match self {
            Entry::Node(v) => Some(v),
            Entry::Scalar(_) => None,
        }
    }
    pub fn scalar(self) -> Option<&'a Value> {
        match self {
            Entry::Scalar(v) => Some(v),
            Entry::Node(_) => None,
        }
    }
    fn map_node<W>(self, f: impl FnOnce(V) -> W) -> Entry<'a, W> {
        match self {
            Entry::Node(v) => Entry::Node(f(v)),
            Entry::Scalar(v) => Entry::Scalar(v),
        }
    }
}

/// Largest number of slots (the write included) an index write may append to an array.
pub const MAX_ARRAY_PADDING: usize = 1024;

// 键在具体节点上的落点：对象字段、数组下标，或无处可落（写入不留痕）
enum Slot {
    Field(String),
    Index(usize),
    Detached,
}

// 只有规范十进制（无前导零）的字段名才视为数组下标
fn canonical_index(s: &str) -> Option<usize> {
    s.parse::<usize>().ok().filter(|i| i.to_string() == s)
}

fn resolve(node: &Value, key: Key) -> Slot {
    match (node, key) {
        (Value::Object(_), Key::Field(f)) => Slot::Field(f),
        (Value::Object(_), Key::Index(i)) => Slot::Field(i.to_string()),
        (Value::Array(_), Key::Index(i)) => Slot::Index(i),
        (Value::Array(_), Key::Field(f)) => canonical_index(&f).map_or(Slot::Detached, Slot::Index),
        _ => Slot::Detached,
    }
}

fn lookup(node: &Value, key: Key) -> Option<&Value> {
    match resolve(node, key) {
        Slot::Field(f) => node.as_object()?.get(&f),
        Slot::Index(i) => node.as_array()?.get(i),
        Slot::Detached => None,
    }
}

fn lookup_mut(node: &mut Value, key: Key) -> Option<&mut Value> {
    match resolve(node, key) {
        Slot::Field(f) => node.as_object_mut()?.get_mut(&f),
        Slot::Index(i) => node.as_array_mut()?.get_mut(i),
        Slot::Detached => None,
    }
}

fn assign(node: &mut Value, key: Key, value: Value) {
    match resolve(node, key) {
        Slot::Field(f) => {
            if let Some(map) = node.as_object_mut() {
                map.insert(f, value);
            }
        }
        Slot::Index(i) => {
            if let Some(arr) = node.as_array_mut() {
                if i < arr.len() {
                    arr[i] = value;
                    return;
                }
                // JSON 数组没有空洞：越界写入用 null 填补，填补量超出上限的写入不留痕
                let padded = i
                    .checked_add(1)
                    .filter(|&n| n - arr.len() <= MAX_ARRAY_PADDING);
                match padded {
                    Some(n) => {
                        arr.resize(n, Value::Null);
                        arr[i] = value;
                    }
                    None => tracing::debug!(index = i, len = arr.len(), "array write too far past the end; discarded"),
                }
            }
        }
        Slot::Detached => {}
    }
}

fn delete(node: &mut Value, key: Key) -> Option<Value> {
    match resolve(node, key) {
        Slot::Field(f) => node.as_object_mut()?.remove(&f),
        Slot::Index(i) => {
            let arr = node.as_array_mut()?;
            (i < arr.len()).then(|| arr.remove(i))
        }
        Slot::Detached => None,
    }
}

fn is_composite(v: &Value) -> bool {
    matches!(v, Value::Object(_) | Value::Array(_))
}

fn encode<S: Serialize + ?Sized>(value: &S) -> Result<Value> {
    serde_json::to_value(value).map_err(ConfStoreError::Encode)
}

/// Mutation-tracking view over a composite node.
pub struct TrackedView<'a> {
    node: &'a mut Value,
    hook: &'a dyn MutationHook,
}

impl<'a> TrackedView<'a> {
    pub fn new(node: &'a mut Value, hook: &'a dyn MutationHook) -> Self {
        Self { node, hook }
    }

    pub fn value(&self) -> &Value {
        &*self.node
    }

    pub fn get(&mut self, key: impl Into<Key>) -> Option<Entry<'_, TrackedView<'_>>> {
        let hook = self.hook;
        let child = lookup_mut(self.node, key.into())?;
        Some(if is_composite(child) {
            Entry::Node(TrackedView { node: child, hook })
        } else {
            Entry::Scalar(&*child)
        })
    }

    pub fn child(&mut self, key: impl Into<Key>) -> Option<TrackedView<'_>> {
        self.get(key)?.node()
    }

    /// 沿路径逐级下钻；任一级缺失或终点不是复合节点时返回 None
    pub fn at<K: Into<Key>>(&mut self, path: impl IntoIterator<Item = K>) -> Option<TrackedView<'_>> {
        let hook = self.hook;
        let mut node: &mut Value = &mut *self.node;
        for k in path {
            node = lookup_mut(node, k.into())?;
        }
        is_composite(node).then(|| TrackedView { node, hook })
    }

    pub fn set(&mut self, key: impl Into<Key>, value: impl Into<Value>) {
        assign(self.node, key.into(), value.into());
        self.hook.mutated();
    }

    pub fn set_serialized<S: Serialize + ?Sized>(&mut self, key: impl Into<Key>, value: &S) -> Result<()> {
        let value = encode(value)?;
        self.set(key, value);
        Ok(())
    }

    /// Removes a field, or an array element (later elements shift down).
    pub fn remove(&mut self, key: impl Into<Key>) -> Option<Value> {
        let old = delete(self.node, key.into());
        self.hook.mutated();
        old
    }
}

/// Read-only view; writes succeed without effect.
#[derive(Clone, Copy)]
pub struct ReadOnlyView<'a> {
    node: &'a Value,
}

impl<'a> ReadOnlyView<'a> {
    pub fn new(node: &'a Value) -> Self {
        Self { node }
    }

    pub fn value(&self) -> &'a Value {
        self.node
    }

    pub fn get(&self, key: impl Into<Key>) -> Option<Entry<'a, ReadOnlyView<'a>>> {
        let child = lookup(self.node, key.into())?;
        Some(if is_composite(child) {
            Entry::Node(ReadOnlyView { node: child })
        } else {
            Entry::Scalar(child)
        })
    }

    pub fn child(&self, key: impl Into<Key>) -> Option<ReadOnlyView<'a>> {
        self.get(key)?.node()
    }

    pub fn at<K: Into<Key>>(&self, path: impl IntoIterator<Item = K>) -> Option<ReadOnlyView<'a>> {
        let mut node = self.node;
        for k in path {
            node = lookup(node, k.into())?;
        }
        is_composite(node).then_some(ReadOnlyView { node })
    }

    pub fn set(&mut self, key: impl Into<Key>, _value: impl Into<Value>) {
        let key: Key = key.into();
        tracing::trace!(key = ?key, "write to read-only config view discarded");
    }

    pub fn remove(&mut self, key: impl Into<Key>) -> Option<Value> {
        let key: Key = key.into();
        tracing::trace!(key = ?key, "remove on read-only config view discarded");
        None
    }
}

/// The view handed out by [`ConfigStore::config`](crate::store::ConfigStore::config):
/// tracking once loaded, read-only over the defaults before that.
pub enum ConfigView<'a> {
    Tracked(TrackedView<'a>),
    ReadOnly(ReadOnlyView<'a>),
}

impl<'a> ConfigView<'a> {
    pub fn is_read_only(&self) -> bool {
        matches!(self, ConfigView::ReadOnly(_))
    }

    pub fn value(&self) -> &Value {
        match self {
            ConfigView::Tracked(t) => t.value(),
            ConfigView::ReadOnly(r) => r.value(),
        }
    }

    pub fn get(&mut self, key: impl Into<Key>) -> Option<Entry<'_, ConfigView<'_>>> {
        match self {
            ConfigView::Tracked(t) => t.get(key).map(|e| e.map_node(ConfigView::Tracked)),
            ConfigView::ReadOnly(r) => r.get(key).map(|e| e.map_node(ConfigView::ReadOnly)),
        }
    }

    pub fn child(&mut self, key: impl Into<Key>) -> Option<ConfigView<'_>> {
        self.get(key)?.node()
    }

    pub fn at<K: Into<Key>>(&mut self, path: impl IntoIterator<Item = K>) -> Option<ConfigView<'_>> {
        match self {
            ConfigView::Tracked(t) => t.at(path).map(ConfigView::Tracked),
            ConfigView::ReadOnly(r) => r.at(path).map(ConfigView::ReadOnly),
        }
    }

    pub fn set(&mut self, key: impl Into<Key>, value: impl Into<Value>) {
        match self {
            ConfigView::Tracked(t) => t.set(key, value),
            ConfigView::ReadOnly(r) => r.set(key, value),
        }
    }

    pub fn set_serialized<S: Serialize + ?Sized>(&mut self, key: impl Into<Key>, value: &S) -> Result<()> {
        match self {
            ConfigView::Tracked(t) => t.set_serialized(key, value),
            // 只读视图同样先编码，保证两种视图对不可序列化值的报错一致
            ConfigView::ReadOnly(r) => {
                let value = encode(value)?;
                r.set(key, value);
                Ok(())
            }
        }
    }

    pub fn remove(&mut self, key: impl Into<Key>) -> Option<Value> {
        match self {
            ConfigView::Tracked(t) => t.remove(key),
            ConfigView::ReadOnly(r) => r.remove(key),
        }
    }
}
