//! Own-property copies used by the `prop_*` assertions.
//!
//! Both copies drop prototypes, so a class instance compares equal to a plain record
//! with the same properties. Cycles are followed once.

use crate::value::{Object, Primitive, Value};

/// Recursive copy of `value` with every object flattened to a plain record.
///
/// Arrays stay arrays when `allow_array` is set. Objects without own properties
/// (dates, functions, sets...) become empty records.
pub(crate) fn object_values(value: &Value, allow_array: bool) -> Value {
    copy(value, allow_array, &mut Vec::new())
}

fn copy(value: &Value, allow_array: bool, memo: &mut Vec<(usize, Value)>) -> Value {
    let Value::Object(obj) = value else {
        return value.clone();
    };
    if let Some((_, done)) = memo.iter().find(|(addr, _)| *addr == obj.addr()) {
        return done.clone();
    }

    let as_array = allow_array && matches!(&*obj.borrow(), Object::Array(_));
    let target = if as_array {
        Value::array(Vec::<Value>::new())
    } else {
        Value::record(Vec::<(String, Value)>::new())
    };
    memo.push((obj.addr(), target.clone()));

    for (key, child) in own_entries(value) {
        let copied = copy(&child, allow_array, memo);
        if as_array {
            target.push(copied);
        } else {
            target.set_prop(key, copied);
        }
    }
    target
}

/// The part of `value` that `model` describes: a plain record holding only the keys
/// of `model` that `value` also has, recursively. Primitives are returned as-is.
pub(crate) fn object_values_subset(value: &Value, model: &Value) -> Value {
    subset(value, model, &mut Vec::new())
}

fn subset(value: &Value, model: &Value, stack: &mut Vec<(usize, usize)>) -> Value {
    let Value::Object(obj) = value else {
        return value.clone();
    };
    let pair = (obj.addr(), model.as_obj().map_or(0, |m| m.addr()));
    if stack.contains(&pair) {
        return value.clone();
    }
    stack.push(pair);

    let own = own_entries(value);
    let out = Value::record(Vec::<(String, Value)>::new());
    for (key, wanted) in own_entries(model) {
        if let Some((_, child)) = own.iter().find(|(name, _)| *name == key) {
            let copied = subset(child, &wanted, stack);
            out.set_prop(key, copied);
        }
    }

    stack.pop();
    out
}

/// Enumerable own properties: record props, array indices, string characters.
fn own_entries(value: &Value) -> Vec<(String, Value)> {
    let Some(obj) = value.as_obj() else {
        return Vec::new();
    };
    let object = obj.borrow();
    match &*object {
        Object::Record { props, .. } => props
            .iter()
            .map(|(k, v)| (k.clone(), v.clone()))
            .collect(),
        Object::Array(items) => items
            .iter()
            .enumerate()
            .map(|(i, v)| (i.to_string(), v.clone()))
            .collect(),
        Object::Boxed(Primitive::String(s)) => s
            .chars()
            .enumerate()
            .map(|(i, c)| (i.to_string(), Value::String(c.to_string())))
            .collect(),
        _ => Vec::new(),
    }
}
