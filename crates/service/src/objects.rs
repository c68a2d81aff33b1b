//! Dynamic host object model.
//!
//! The gateway manipulates host values without knowing their concrete
//! types. Plain values travel as [`HostValue`] variants; everything else
//! is an [`ObjectRef`] behind the [`HostObject`] trait, which exposes
//! optional capability accessors the classifier and the container
//! commands probe in a fixed order.

use std::{any::Any, collections::VecDeque, sync::Arc};

use ahash::AHashMap;
use parking_lot::Mutex;

use crate::BridgeError;

pub type ObjectRef = Arc<dyn HostObject>;

#[derive(Clone)]
pub enum HostValue {
    Null,
    /// Distinguished sentinel for methods that return nothing.
    Void,
    Bool(bool),
    Int(i32),
    Long(i64),
    Double(f64),
    Char(char),
    Str(String),
    Bytes(Vec<u8>),
    Decimal(String),
    Object(ObjectRef),
}

impl std::fmt::Debug for HostValue {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::Null => write!(f, "Null"),
            Self::Void => write!(f, "Void"),
            Self::Bool(value) => write!(f, "Bool({})", value),
            Self::Int(value) => write!(f, "Int({})", value),
            Self::Long(value) => write!(f, "Long({})", value),
            Self::Double(value) => write!(f, "Double({})", value),
            Self::Char(value) => write!(f, "Char({:?})", value),
            Self::Str(value) => write!(f, "Str({:?})", value),
            Self::Bytes(value) => write!(f, "Bytes({} bytes)", value.len()),
            Self::Decimal(value) => write!(f, "Decimal({})", value),
            Self::Object(object) => write!(f, "Object({})", object.type_name()),
        }
    }
}

impl PartialEq for HostValue {
    /// Structural equality for plain values, pointer identity for
    /// objects. Int and Long compare across the two widths.
    fn eq(&self, other: &Self) -> bool {
        match (self, other) {
            (Self::Null, Self::Null) | (Self::Void, Self::Void) => true,
            (Self::Bool(a), Self::Bool(b)) => a == b,
            (Self::Int(a), Self::Int(b)) => a == b,
            (Self::Long(a), Self::Long(b)) => a == b,
            (Self::Int(a), Self::Long(b)) | (Self::Long(b), Self::Int(a)) => i64::from(*a) == *b,
            (Self::Double(a), Self::Double(b)) => a == b,
            (Self::Char(a), Self::Char(b)) => a == b,
            (Self::Str(a), Self::Str(b)) => a == b,
            (Self::Bytes(a), Self::Bytes(b)) => a == b,
            (Self::Decimal(a), Self::Decimal(b)) => a == b,
            (Self::Object(a), Self::Object(b)) => Arc::ptr_eq(a, b),
            _ => false,
        }
    }
}

impl HostValue {
    pub fn object(object: impl HostObject + 'static) -> Self {
        Self::Object(Arc::new(object))
    }

    pub fn is_primitive(&self) -> bool {
        !matches!(self, Self::Null | Self::Void | Self::Object(_))
    }
}

impl From<bool> for HostValue {
    fn from(value: bool) -> Self {
        Self::Bool(value)
    }
}

impl From<i32> for HostValue {
    fn from(value: i32) -> Self {
        Self::Int(value)
    }
}

impl From<i64> for HostValue {
    fn from(value: i64) -> Self {
        Self::Long(value)
    }
}

impl From<f64> for HostValue {
    fn from(value: f64) -> Self {
        Self::Double(value)
    }
}

impl From<&str> for HostValue {
    fn from(value: &str) -> Self {
        Self::Str(value.to_string())
    }
}

impl From<String> for HostValue {
    fn from(value: String) -> Self {
        Self::Str(value)
    }
}

/// A live host object the peer can hold by id.
///
/// The capability accessors drive classification and the element-wise
/// container commands; the default implementations expose nothing.
/// [`HostObject::invoke`] lets an object answer method calls itself,
/// bypassing the class registry, which is how views, bound errors and
/// peer proxies respond.
pub trait HostObject: Send + Sync {
    /// Fully qualified type name, used to find the class binding of an
    /// instance.
    fn type_name(&self) -> &str;

    fn as_any(&self) -> &dyn Any;

    fn as_list(&self) -> Option<&dyn ListOps> {
        None
    }

    fn as_map(&self) -> Option<&dyn MapOps> {
        None
    }

    fn as_set(&self) -> Option<&dyn SetOps> {
        None
    }

    fn as_array(&self) -> Option<&dyn ArrayOps> {
        None
    }

    fn as_iterator(&self) -> Option<&dyn IteratorOps> {
        None
    }

    fn as_blob(&self) -> Option<&dyn BlobOps> {
        None
    }

    fn as_proxy(&self) -> Option<&PeerProxy> {
        None
    }

    /// Self dispatched method call. `None` defers to the class registry.
    #[allow(unused_variables)]
    fn invoke(&self, name: &str, args: &[HostValue]) -> Option<Result<HostValue, BridgeError>> {
        None
    }
}

/// Ordered sequence with cheap cardinality.
pub trait ListOps: Send + Sync {
    fn len(&self) -> usize;
    fn get(&self, index: usize) -> Option<HostValue>;
    fn set(&self, index: usize, value: HostValue) -> bool;
    fn append(&self, value: HostValue);
    fn remove(&self, index: usize) -> Option<HostValue>;
    fn contains(&self, value: &HostValue) -> bool;
    fn slice(&self, from: usize, to: usize) -> Option<Vec<HostValue>>;
}

/// Keyed mapping.
pub trait MapOps: Send + Sync {
    fn len(&self) -> usize;
    fn get(&self, key: &HostValue) -> Option<HostValue>;
    fn put(&self, key: HostValue, value: HostValue) -> Option<HostValue>;
    fn remove(&self, key: &HostValue) -> Option<HostValue>;
    fn contains_key(&self, key: &HostValue) -> bool;
    fn keys(&self) -> Vec<HostValue>;
}

/// Unordered unique-element collection.
pub trait SetOps: Send + Sync {
    fn len(&self) -> usize;
    fn add(&self, value: HostValue) -> bool;
    fn remove(&self, value: &HostValue) -> bool;
    fn contains(&self, value: &HostValue) -> bool;
}

/// Fixed-length indexable storage.
pub trait ArrayOps: Send + Sync {
    fn len(&self) -> usize;
    fn get(&self, index: usize) -> Option<HostValue>;
    fn set(&self, index: usize, value: HostValue) -> bool;
    fn slice(&self, from: usize, to: usize) -> Option<Vec<HostValue>>;
}

/// Lazy single-pass producer. Computing a size would consume it, so it
/// never reports one.
pub trait IteratorOps: Send + Sync {
    fn next(&self) -> Option<HostValue>;
}

/// Raw byte source/sink for the stream command.
pub trait BlobOps: Send + Sync {
    fn read(&self, max: usize) -> Vec<u8>;
    fn write(&self, data: &[u8]);
}

/// Hashable projection of a [`HostValue`] used as a map key. Doubles are
/// keyed by bit pattern, objects by pointer identity.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub enum MapKey {
    Null,
    Bool(bool),
    Int(i64),
    Bits(u64),
    Char(char),
    Str(String),
    Bytes(Vec<u8>),
    Decimal(String),
    Ptr(usize),
}

impl MapKey {
    pub fn of(value: &HostValue) -> Self {
        match value {
            HostValue::Null | HostValue::Void => Self::Null,
            HostValue::Bool(value) => Self::Bool(*value),
            HostValue::Int(value) => Self::Int(i64::from(*value)),
            HostValue::Long(value) => Self::Int(*value),
            HostValue::Double(value) => Self::Bits(value.to_bits()),
            HostValue::Char(value) => Self::Char(*value),
            HostValue::Str(value) => Self::Str(value.clone()),
            HostValue::Bytes(value) => Self::Bytes(value.clone()),
            HostValue::Decimal(value) => Self::Decimal(value.clone()),
            HostValue::Object(object) => Self::Ptr(Arc::as_ptr(object) as *const () as usize),
        }
    }
}

pub const LIST_TYPE: &str = "bridge.List";
pub const MAP_TYPE: &str = "bridge.Map";
pub const SET_TYPE: &str = "bridge.Set";
pub const ARRAY_TYPE: &str = "bridge.Array";
pub const ITERATOR_TYPE: &str = "bridge.Iterator";
pub const BLOB_TYPE: &str = "bridge.Blob";
pub const PROXY_TYPE: &str = "bridge.Proxy";
pub const ERROR_TYPE: &str = "bridge.Error";

#[derive(Default)]
pub struct HostList(Mutex<Vec<HostValue>>);

impl HostList {
    pub fn new(items: Vec<HostValue>) -> Self {
        Self(Mutex::new(items))
    }
}

impl HostObject for HostList {
    fn type_name(&self) -> &str {
        LIST_TYPE
    }

    fn as_any(&self) -> &dyn Any {
        self
    }

    fn as_list(&self) -> Option<&dyn ListOps> {
        Some(self)
    }
}

impl ListOps for HostList {
    fn len(&self) -> usize {
        self.0.lock().len()
    }

    fn get(&self, index: usize) -> Option<HostValue> {
        self.0.lock().get(index).cloned()
    }

    fn set(&self, index: usize, value: HostValue) -> bool {
        let mut items = self.0.lock();
        match items.get_mut(index) {
            Some(slot) => {
                *slot = value;
                true
            }
            None => false,
        }
    }

    fn append(&self, value: HostValue) {
        self.0.lock().push(value);
    }

    fn remove(&self, index: usize) -> Option<HostValue> {
        let mut items = self.0.lock();
        if index < items.len() {
            Some(items.remove(index))
        } else {
            None
        }
    }

    fn contains(&self, value: &HostValue) -> bool {
        self.0.lock().iter().any(|item| item == value)
    }

    fn slice(&self, from: usize, to: usize) -> Option<Vec<HostValue>> {
        let items = self.0.lock();
        items.get(from..to).map(|window| window.to_vec())
    }
}

pub struct HostMap(Mutex<AHashMap<MapKey, (HostValue, HostValue)>>);

impl Default for HostMap {
    fn default() -> Self {
        Self(Mutex::new(AHashMap::new()))
    }
}

impl HostMap {
    pub fn new(entries: Vec<(HostValue, HostValue)>) -> Self {
        let map = entries
            .into_iter()
            .map(|(key, value)| (MapKey::of(&key), (key, value)))
            .collect();
        Self(Mutex::new(map))
    }
}

impl HostObject for HostMap {
    fn type_name(&self) -> &str {
        MAP_TYPE
    }

    fn as_any(&self) -> &dyn Any {
        self
    }

    fn as_map(&self) -> Option<&dyn MapOps> {
        Some(self)
    }
}

impl MapOps for HostMap {
    fn len(&self) -> usize {
        self.0.lock().len()
    }

    fn get(&self, key: &HostValue) -> Option<HostValue> {
        self.0
            .lock()
            .get(&MapKey::of(key))
            .map(|(_, value)| value.clone())
    }

    fn put(&self, key: HostValue, value: HostValue) -> Option<HostValue> {
        self.0
            .lock()
            .insert(MapKey::of(&key), (key, value))
            .map(|(_, previous)| previous)
    }

    fn remove(&self, key: &HostValue) -> Option<HostValue> {
        self.0
            .lock()
            .remove(&MapKey::of(key))
            .map(|(_, value)| value)
    }

    fn contains_key(&self, key: &HostValue) -> bool {
        self.0.lock().contains_key(&MapKey::of(key))
    }

    fn keys(&self) -> Vec<HostValue> {
        self.0.lock().values().map(|(key, _)| key.clone()).collect()
    }
}

pub struct HostSet(Mutex<AHashMap<MapKey, HostValue>>);

impl Default for HostSet {
    fn default() -> Self {
        Self(Mutex::new(AHashMap::new()))
    }
}

impl HostSet {
    pub fn new(items: Vec<HostValue>) -> Self {
        let set = items
            .into_iter()
            .map(|item| (MapKey::of(&item), item))
            .collect();
        Self(Mutex::new(set))
    }
}

impl HostObject for HostSet {
    fn type_name(&self) -> &str {
        SET_TYPE
    }

    fn as_any(&self) -> &dyn Any {
        self
    }

    fn as_set(&self) -> Option<&dyn SetOps> {
        Some(self)
    }
}

impl SetOps for HostSet {
    fn len(&self) -> usize {
        self.0.lock().len()
    }

    fn add(&self, value: HostValue) -> bool {
        self.0.lock().insert(MapKey::of(&value), value).is_none()
    }

    fn remove(&self, value: &HostValue) -> bool {
        self.0.lock().remove(&MapKey::of(value)).is_some()
    }

    fn contains(&self, value: &HostValue) -> bool {
        self.0.lock().contains_key(&MapKey::of(value))
    }
}

/// Fixed length at construction; `set` replaces, nothing grows it.
pub struct HostArray(Mutex<Vec<HostValue>>);

impl HostArray {
    pub fn new(items: Vec<HostValue>) -> Self {
        Self(Mutex::new(items))
    }

    pub fn filled(length: usize) -> Self {
        Self(Mutex::new(vec![HostValue::Null; length]))
    }
}

impl HostObject for HostArray {
    fn type_name(&self) -> &str {
        ARRAY_TYPE
    }

    fn as_any(&self) -> &dyn Any {
        self
    }

    fn as_array(&self) -> Option<&dyn ArrayOps> {
        Some(self)
    }
}

impl ArrayOps for HostArray {
    fn len(&self) -> usize {
        self.0.lock().len()
    }

    fn get(&self, index: usize) -> Option<HostValue> {
        self.0.lock().get(index).cloned()
    }

    fn set(&self, index: usize, value: HostValue) -> bool {
        let mut items = self.0.lock();
        match items.get_mut(index) {
            Some(slot) => {
                *slot = value;
                true
            }
            None => false,
        }
    }

    fn slice(&self, from: usize, to: usize) -> Option<Vec<HostValue>> {
        let items = self.0.lock();
        items.get(from..to).map(|window| window.to_vec())
    }
}

pub struct HostIterator(Mutex<Box<dyn Iterator<Item = HostValue> + Send>>);

impl HostIterator {
    pub fn new(iterator: impl Iterator<Item = HostValue> + Send + 'static) -> Self {
        Self(Mutex::new(Box::new(iterator)))
    }

    pub fn from_values(items: Vec<HostValue>) -> Self {
        Self::new(items.into_iter())
    }
}

impl HostObject for HostIterator {
    fn type_name(&self) -> &str {
        ITERATOR_TYPE
    }

    fn as_any(&self) -> &dyn Any {
        self
    }

    fn as_iterator(&self) -> Option<&dyn IteratorOps> {
        Some(self)
    }
}

impl IteratorOps for HostIterator {
    fn next(&self) -> Option<HostValue> {
        self.0.lock().next()
    }
}

/// In-memory byte queue, reads drain from the front.
#[derive(Default)]
pub struct HostBlob(Mutex<VecDeque<u8>>);

impl HostBlob {
    pub fn new(data: Vec<u8>) -> Self {
        Self(Mutex::new(data.into()))
    }
}

impl HostObject for HostBlob {
    fn type_name(&self) -> &str {
        BLOB_TYPE
    }

    fn as_any(&self) -> &dyn Any {
        self
    }

    fn as_blob(&self) -> Option<&dyn BlobOps> {
        Some(self)
    }
}

impl BlobOps for HostBlob {
    fn read(&self, max: usize) -> Vec<u8> {
        let mut data = self.0.lock();
        let count = max.min(data.len());
        data.drain(..count).collect()
    }

    fn write(&self, data: &[u8]) {
        self.0.lock().extend(data);
    }
}

/// An object owned by the peer. The gateway holds only the peer-side id;
/// invoking it routes a call command back over the originating
/// connection.
pub struct PeerProxy {
    pub id: String,
}

impl PeerProxy {
    pub fn new(id: impl Into<String>) -> Self {
        Self { id: id.into() }
    }
}

impl HostObject for PeerProxy {
    fn type_name(&self) -> &str {
        PROXY_TYPE
    }

    fn as_any(&self) -> &dyn Any {
        self
    }

    fn as_proxy(&self) -> Option<&PeerProxy> {
        Some(self)
    }
}

/// A host failure bound in the registry so the peer can inspect it after
/// receiving the error envelope that carries its id.
pub struct BoundError {
    kind: &'static str,
    message: String,
}

impl BoundError {
    pub fn new(kind: &'static str, message: impl Into<String>) -> Self {
        Self {
            kind,
            message: message.into(),
        }
    }

    pub fn message(&self) -> &str {
        &self.message
    }
}

impl HostObject for BoundError {
    fn type_name(&self) -> &str {
        ERROR_TYPE
    }

    fn as_any(&self) -> &dyn Any {
        self
    }

    fn invoke(&self, name: &str, _args: &[HostValue]) -> Option<Result<HostValue, BridgeError>> {
        match name {
            "getMessage" => Some(Ok(HostValue::Str(self.message.clone()))),
            "kind" => Some(Ok(HostValue::Str(self.kind.to_string()))),
            "toString" => Some(Ok(HostValue::Str(format!(
                "{}: {}",
                self.kind, self.message
            )))),
            _ => None,
        }
    }
}
