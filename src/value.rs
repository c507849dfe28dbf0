//! Runtime values that assertions operate on.
//!
//! Primitives (`undefined`, `null`, booleans, numbers, strings) are held inline.
//! Everything else lives behind an [`Obj`], a shared, mutable reference with identity:
//! two objects built from the same literal are distinct, and an object may contain
//! itself. Equivalence, dumping and property copying are all written to terminate on
//! such cyclic graphs.
//!
//! ```rust
//! use proctor::value::Value;
//! let node = Value::record([("name", Value::from("root"))]);
//! node.set_prop("self", node.clone());
//! assert!(node.get_prop("self").unwrap().strict_equals(&node));
//! ```

use std::cell::{Ref, RefCell, RefMut};
use std::collections::BTreeMap;
use std::fmt;
use std::rc::Rc;

use chrono::{DateTime, TimeZone, Utc};
use serde::{Serialize, Serializer};

mod coerce;
mod dump;

pub(crate) use coerce::format_number;
pub use dump::dump;

// ============================================================================
// CORE TYPES
// ============================================================================

/// A dynamically typed value.
#[derive(Debug, Clone, Default)]
pub enum Value {
    #[default]
    Undefined,
    Null,
    Bool(bool),
    Number(f64),
    String(String),
    Object(Obj),
}

/// Shared reference to a heap object. Clones alias the same object.
#[derive(Clone)]
pub struct Obj(Rc<RefCell<Object>>);

/// Heap object payloads.
#[derive(Debug, Clone)]
pub enum Object {
    /// Keyed record: a plain object, a null-prototype object or a class instance.
    Record {
        proto: Proto,
        props: BTreeMap<String, Value>,
    },
    Array(Vec<Value>),
    /// Insertion-ordered, deduplicated by same-value-zero.
    Set(Vec<Value>),
    /// Insertion-ordered entries, keys deduplicated by same-value-zero.
    Map(Vec<(Value, Value)>),
    Date(DateTime<Utc>),
    RegExp { source: String, flags: String },
    /// A primitive wrapped in an object (`new Number(1)`).
    Boxed(Primitive),
    Function(Function),
}

/// The primitives that can be boxed.
#[derive(Debug, Clone, PartialEq)]
pub enum Primitive {
    Bool(bool),
    Number(f64),
    String(String),
}

/// Prototype of a record, used for constructor comparison.
#[derive(Debug, Clone)]
pub enum Proto {
    /// Plain object literal.
    Object,
    /// Object created without a prototype.
    Null,
    /// Instance of a user class.
    Class(Class),
}

/// A user class. Identity is by reference: two classes with the same name differ.
#[derive(Clone)]
pub struct Class(Rc<ClassInfo>);

#[derive(Debug)]
struct ClassInfo {
    name: String,
}

/// A function value: compared by identity, but its source text is kept so that
/// method-valued properties can be matched by source.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Function {
    pub name: String,
    pub source: String,
}

/// Type classification used by the equivalence engine. Boxed primitives share the tag
/// of the primitive they wrap, and NaN (boxed or not) has a tag of its own.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum TypeTag {
    Undefined,
    Null,
    Boolean,
    Number,
    NaN,
    String,
    Array,
    Set,
    Map,
    Date,
    RegExp,
    Function,
    Object,
}

impl TypeTag {
    pub fn as_str(&self) -> &'static str {
        match self {
            TypeTag::Undefined => "undefined",
            TypeTag::Null => "null",
            TypeTag::Boolean => "boolean",
            TypeTag::Number => "number",
            TypeTag::NaN => "nan",
            TypeTag::String => "string",
            TypeTag::Array => "array",
            TypeTag::Set => "set",
            TypeTag::Map => "map",
            TypeTag::Date => "date",
            TypeTag::RegExp => "regexp",
            TypeTag::Function => "function",
            TypeTag::Object => "object",
        }
    }

    /// Containers are compared by queueing their children rather than recursing.
    pub fn is_container(&self) -> bool {
        matches!(
            self,
            TypeTag::Object | TypeTag::Array | TypeTag::Set | TypeTag::Map
        )
    }
}

impl fmt::Display for TypeTag {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

// ============================================================================
// OBJ / CLASS
// ============================================================================

impl Obj {
    pub fn new(object: Object) -> Self {
        Obj(Rc::new(RefCell::new(object)))
    }

    pub fn borrow(&self) -> Ref<'_, Object> {
        self.0.borrow()
    }

    pub fn borrow_mut(&self) -> RefMut<'_, Object> {
        self.0.borrow_mut()
    }

    /// Reference identity.
    pub fn ptr_eq(&self, other: &Obj) -> bool {
        Rc::ptr_eq(&self.0, &other.0)
    }

    /// Address of the shared allocation, usable as an identity key.
    pub fn addr(&self) -> usize {
        Rc::as_ptr(&self.0) as *const () as usize
    }
}

impl fmt::Debug for Obj {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        // Contents are not printed: objects may be cyclic.
        match self.0.try_borrow() {
            Ok(object) => write!(f, "Obj<{}>@{:#x}", object.kind_name(), self.addr()),
            Err(_) => write!(f, "Obj<borrowed>@{:#x}", self.addr()),
        }
    }
}

impl Class {
    pub fn new(name: impl Into<String>) -> Self {
        Class(Rc::new(ClassInfo { name: name.into() }))
    }

    pub fn name(&self) -> &str {
        &self.0.name
    }

    pub fn ptr_eq(&self, other: &Class) -> bool {
        Rc::ptr_eq(&self.0, &other.0)
    }
}

impl fmt::Debug for Class {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "Class({})", self.0.name)
    }
}

impl Object {
    /// Name used in `[object X]` renderings.
    pub fn kind_name(&self) -> &'static str {
        match self {
            Object::Record { .. } => "Object",
            Object::Array(_) => "Array",
            Object::Set(_) => "Set",
            Object::Map(_) => "Map",
            Object::Date(_) => "Date",
            Object::RegExp { .. } => "RegExp",
            Object::Boxed(Primitive::Bool(_)) => "Boolean",
            Object::Boxed(Primitive::Number(_)) => "Number",
            Object::Boxed(Primitive::String(_)) => "String",
            Object::Function(_) => "Function",
        }
    }
}

impl Primitive {
    pub fn to_value(&self) -> Value {
        match self {
            Primitive::Bool(b) => Value::Bool(*b),
            Primitive::Number(n) => Value::Number(*n),
            Primitive::String(s) => Value::String(s.clone()),
        }
    }
}

// ============================================================================
// CONSTRUCTORS
// ============================================================================

impl Value {
    pub fn object(object: Object) -> Self {
        Value::Object(Obj::new(object))
    }

    /// Plain object literal.
    pub fn record<K, V, I>(props: I) -> Self
    where
        K: Into<String>,
        V: Into<Value>,
        I: IntoIterator<Item = (K, V)>,
    {
        Self::record_with(Proto::Object, props)
    }

    /// Object with a null prototype.
    pub fn null_proto_record<K, V, I>(props: I) -> Self
    where
        K: Into<String>,
        V: Into<Value>,
        I: IntoIterator<Item = (K, V)>,
    {
        Self::record_with(Proto::Null, props)
    }

    /// Instance of `class`.
    pub fn instance<K, V, I>(class: &Class, props: I) -> Self
    where
        K: Into<String>,
        V: Into<Value>,
        I: IntoIterator<Item = (K, V)>,
    {
        Self::record_with(Proto::Class(class.clone()), props)
    }

    fn record_with<K, V, I>(proto: Proto, props: I) -> Self
    where
        K: Into<String>,
        V: Into<Value>,
        I: IntoIterator<Item = (K, V)>,
    {
        let props = props
            .into_iter()
            .map(|(k, v)| (k.into(), v.into()))
            .collect();
        Value::object(Object::Record { proto, props })
    }

    pub fn array<V, I>(items: I) -> Self
    where
        V: Into<Value>,
        I: IntoIterator<Item = V>,
    {
        Value::object(Object::Array(items.into_iter().map(Into::into).collect()))
    }

    /// Builds a set, dropping values already present (same-value-zero).
    pub fn set<V, I>(items: I) -> Self
    where
        V: Into<Value>,
        I: IntoIterator<Item = V>,
    {
        let mut unique: Vec<Value> = Vec::new();
        for item in items.into_iter().map(Into::into) {
            if !unique.iter().any(|seen| seen.same_value_zero(&item)) {
                unique.push(item);
            }
        }
        Value::object(Object::Set(unique))
    }

    /// Builds a map; a repeated key overwrites the earlier entry in place.
    pub fn map<K, V, I>(entries: I) -> Self
    where
        K: Into<Value>,
        V: Into<Value>,
        I: IntoIterator<Item = (K, V)>,
    {
        let mut unique: Vec<(Value, Value)> = Vec::new();
        for (key, value) in entries.into_iter().map(|(k, v)| (k.into(), v.into())) {
            match unique.iter_mut().find(|(seen, _)| seen.same_value_zero(&key)) {
                Some(slot) => slot.1 = value,
                None => unique.push((key, value)),
            }
        }
        Value::object(Object::Map(unique))
    }

    pub fn date(at: DateTime<Utc>) -> Self {
        Value::object(Object::Date(at))
    }

    /// Date from milliseconds since the Unix epoch; out-of-range input clamps to the epoch.
    pub fn date_millis(millis: i64) -> Self {
        let at = Utc
            .timestamp_millis_opt(millis)
            .single()
            .unwrap_or_else(|| Utc.timestamp_nanos(0));
        Self::date(at)
    }

    pub fn regexp(source: impl Into<String>, flags: impl Into<String>) -> Self {
        Value::object(Object::RegExp {
            source: source.into(),
            flags: flags.into(),
        })
    }

    pub fn boxed(primitive: Primitive) -> Self {
        Value::object(Object::Boxed(primitive))
    }

    pub fn function(name: impl Into<String>, source: impl Into<String>) -> Self {
        Value::object(Object::Function(Function {
            name: name.into(),
            source: source.into(),
        }))
    }
}

// ============================================================================
// INSPECTION AND MUTATION
// ============================================================================

impl Value {
    /// Classification used by the equivalence engine.
    pub fn type_tag(&self) -> TypeTag {
        match self {
            Value::Undefined => TypeTag::Undefined,
            Value::Null => TypeTag::Null,
            Value::Bool(_) => TypeTag::Boolean,
            Value::Number(n) if n.is_nan() => TypeTag::NaN,
            Value::Number(_) => TypeTag::Number,
            Value::String(_) => TypeTag::String,
            Value::Object(obj) => match &*obj.borrow() {
                Object::Record { .. } => TypeTag::Object,
                Object::Array(_) => TypeTag::Array,
                Object::Set(_) => TypeTag::Set,
                Object::Map(_) => TypeTag::Map,
                Object::Date(_) => TypeTag::Date,
                Object::RegExp { .. } => TypeTag::RegExp,
                Object::Boxed(Primitive::Bool(_)) => TypeTag::Boolean,
                Object::Boxed(Primitive::Number(n)) if n.is_nan() => TypeTag::NaN,
                Object::Boxed(Primitive::Number(_)) => TypeTag::Number,
                Object::Boxed(Primitive::String(_)) => TypeTag::String,
                Object::Function(_) => TypeTag::Function,
            },
        }
    }

    pub fn is_undefined(&self) -> bool {
        matches!(self, Value::Undefined)
    }

    pub fn as_bool(&self) -> Option<bool> {
        match self {
            Value::Bool(b) => Some(*b),
            _ => None,
        }
    }

    pub fn as_number(&self) -> Option<f64> {
        match self {
            Value::Number(n) => Some(*n),
            _ => None,
        }
    }

    pub fn as_str(&self) -> Option<&str> {
        match self {
            Value::String(s) => Some(s),
            _ => None,
        }
    }

    pub fn as_obj(&self) -> Option<&Obj> {
        match self {
            Value::Object(obj) => Some(obj),
            _ => None,
        }
    }

    /// Strict equality (`===`): primitives by value with `NaN !== NaN`, objects by identity.
    pub fn strict_equals(&self, other: &Value) -> bool {
        match (self, other) {
            (Value::Undefined, Value::Undefined) | (Value::Null, Value::Null) => true,
            (Value::Bool(a), Value::Bool(b)) => a == b,
            (Value::Number(a), Value::Number(b)) => a == b,
            (Value::String(a), Value::String(b)) => a == b,
            (Value::Object(a), Value::Object(b)) => a.ptr_eq(b),
            _ => false,
        }
    }

    /// Like [`Value::strict_equals`] but treating NaN as equal to itself.
    pub fn same_value_zero(&self, other: &Value) -> bool {
        match (self, other) {
            (Value::Number(a), Value::Number(b)) if a.is_nan() && b.is_nan() => true,
            _ => self.strict_equals(other),
        }
    }

    /// Unwraps boxed primitives and dates (to epoch milliseconds); other values are
    /// returned as-is.
    pub fn value_of(&self) -> Value {
        let Value::Object(obj) = self else {
            return self.clone();
        };
        match &*obj.borrow() {
            Object::Boxed(primitive) => primitive.to_value(),
            Object::Date(at) => Value::Number(at.timestamp_millis() as f64),
            _ => self.clone(),
        }
    }

    /// Reads a record property.
    pub fn get_prop(&self, key: &str) -> Option<Value> {
        let obj = self.as_obj()?;
        let object = obj.borrow();
        match &*object {
            Object::Record { props, .. } => props.get(key).cloned(),
            _ => None,
        }
    }

    /// Writes a record property. Returns `false` when the value is not a record.
    pub fn set_prop(&self, key: impl Into<String>, value: impl Into<Value>) -> bool {
        let Some(obj) = self.as_obj() else {
            return false;
        };
        let mut object = obj.borrow_mut();
        match &mut *object {
            Object::Record { props, .. } => {
                props.insert(key.into(), value.into());
                true
            }
            _ => false,
        }
    }

    /// Removes a record property, returning its previous value.
    pub fn delete_prop(&self, key: &str) -> Option<Value> {
        let obj = self.as_obj()?;
        let mut object = obj.borrow_mut();
        match &mut *object {
            Object::Record { props, .. } => props.remove(key),
            _ => None,
        }
    }

    /// Appends to an array. Returns `false` when the value is not an array.
    pub fn push(&self, item: impl Into<Value>) -> bool {
        let Some(obj) = self.as_obj() else {
            return false;
        };
        let mut object = obj.borrow_mut();
        match &mut *object {
            Object::Array(items) => {
                items.push(item.into());
                true
            }
            _ => false,
        }
    }

    /// Element count of arrays, sets and maps, or property count of records.
    pub fn len(&self) -> Option<usize> {
        let obj = self.as_obj()?;
        let object = obj.borrow();
        match &*object {
            Object::Record { props, .. } => Some(props.len()),
            Object::Array(items) | Object::Set(items) => Some(items.len()),
            Object::Map(entries) => Some(entries.len()),
            _ => None,
        }
    }

    pub fn is_empty(&self) -> Option<bool> {
        self.len().map(|len| len == 0)
    }
}

// ============================================================================
// CONVERSIONS
// ============================================================================

impl From<bool> for Value {
    fn from(b: bool) -> Self {
        Value::Bool(b)
    }
}

impl From<f64> for Value {
    fn from(n: f64) -> Self {
        Value::Number(n)
    }
}

impl From<f32> for Value {
    fn from(n: f32) -> Self {
        Value::Number(f64::from(n))
    }
}

impl From<i32> for Value {
    fn from(n: i32) -> Self {
        Value::Number(f64::from(n))
    }
}

impl From<u32> for Value {
    fn from(n: u32) -> Self {
        Value::Number(f64::from(n))
    }
}

impl From<i64> for Value {
    fn from(n: i64) -> Self {
        Value::Number(n as f64)
    }
}

impl From<u64> for Value {
    fn from(n: u64) -> Self {
        Value::Number(n as f64)
    }
}

impl From<usize> for Value {
    fn from(n: usize) -> Self {
        Value::Number(n as f64)
    }
}

impl From<&str> for Value {
    fn from(s: &str) -> Self {
        Value::String(s.to_string())
    }
}

impl From<String> for Value {
    fn from(s: String) -> Self {
        Value::String(s)
    }
}

impl From<&String> for Value {
    fn from(s: &String) -> Self {
        Value::String(s.clone())
    }
}

impl From<()> for Value {
    fn from(_: ()) -> Self {
        Value::Undefined
    }
}

impl From<Obj> for Value {
    fn from(obj: Obj) -> Self {
        Value::Object(obj)
    }
}

impl From<&Value> for Value {
    fn from(value: &Value) -> Self {
        value.clone()
    }
}

impl<T: Into<Value>> From<Vec<T>> for Value {
    fn from(items: Vec<T>) -> Self {
        Value::array(items)
    }
}

impl<T: Into<Value>> From<Option<T>> for Value {
    fn from(value: Option<T>) -> Self {
        value.map_or(Value::Null, Into::into)
    }
}

impl From<Primitive> for Value {
    fn from(primitive: Primitive) -> Self {
        primitive.to_value()
    }
}

impl fmt::Display for Value {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&dump(self))
    }
}

impl Serialize for Value {
    fn serialize<S: Serializer>(&self, serializer: S) -> Result<S::Ok, S::Error> {
        serializer.serialize_str(&dump(self))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_type_tags() {
        assert_eq!(Value::Undefined.type_tag(), TypeTag::Undefined);
        assert_eq!(Value::from(f64::NAN).type_tag(), TypeTag::NaN);
        assert_eq!(Value::boxed(Primitive::Number(1.0)).type_tag(), TypeTag::Number);
        assert_eq!(Value::boxed(Primitive::Number(f64::NAN)).type_tag(), TypeTag::NaN);
        assert_eq!(Value::boxed(Primitive::String("a".into())).type_tag(), TypeTag::String);
        assert_eq!(Value::array([1, 2]).type_tag(), TypeTag::Array);
        assert_eq!(Value::record([("a", 1)]).type_tag(), TypeTag::Object);
        assert_eq!(Value::function("f", "function f() {}").type_tag(), TypeTag::Function);
    }

    #[test]
    fn test_strict_equality_is_identity_for_objects() {
        let a = Value::array([1]);
        let b = Value::array([1]);
        assert!(a.strict_equals(&a.clone()));
        assert!(!a.strict_equals(&b));
        assert!(!Value::from(f64::NAN).strict_equals(&Value::from(f64::NAN)));
        assert!(Value::from(f64::NAN).same_value_zero(&Value::from(f64::NAN)));
    }

    #[test]
    fn test_set_and_map_deduplicate() {
        let set = Value::set([Value::from(1), Value::from(1), Value::from(f64::NAN), Value::from(f64::NAN)]);
        assert_eq!(set.len(), Some(2));
        let map = Value::map([("a", 1), ("a", 2)]);
        assert_eq!(map.len(), Some(1));
        let obj = map.as_obj().unwrap().borrow();
        let Object::Map(entries) = &*obj else { panic!("not a map") };
        assert_eq!(entries[0].1.as_number(), Some(2.0));
    }

    #[test]
    fn test_self_reference() {
        let node = Value::record([("id", 1)]);
        assert!(node.set_prop("self", node.clone()));
        let inner = node.get_prop("self").unwrap();
        assert!(inner.strict_equals(&node));
        assert!(!Value::from(1).set_prop("x", 1));
    }

    #[test]
    fn test_value_of_unwraps_boxes_and_dates() {
        let boxed = Value::boxed(Primitive::String("x".into()));
        assert_eq!(boxed.value_of().as_str(), Some("x"));
        assert_eq!(Value::date_millis(1_000).value_of().as_number(), Some(1000.0));
    }

    #[test]
    fn test_classes_compare_by_reference() {
        let a = Class::new("Point");
        let b = Class::new("Point");
        assert!(a.ptr_eq(&a.clone()));
        assert!(!a.ptr_eq(&b));
        assert_eq!(a.name(), "Point");
    }
}
