//! Deep equivalence of values.
//!
//! Comparison walks both graphs breadth-first. The top-level pair seeds a queue of
//! pairs; comparing a container checks its shape and enqueues each pair of children
//! that are themselves containers, while non-container children are compared on the
//! spot. A pair that is already in the queue is not enqueued again, which both avoids
//! re-comparing shared substructure and makes cyclic graphs terminate: a pair that
//! refers back to a pair in flight is treated as equal.
//!
//! Sets and maps are compared by matching each element against *some* element of the
//! other side, in both directions. Repetition is not counted, so
//! `Set { [1], [1], [2] }` and `Set { [1], [2], [2] }` are equivalent. This is
//! long-standing behavior that suites rely on and is kept deliberately.

use crate::value::{Object, Proto, TypeTag, Value};

/// Returns whether every adjacent pair of `values` is equivalent.
///
/// Zero or one value is trivially equivalent.
///
/// # Examples
///
/// ```rust
/// use proctor::equiv::equiv;
/// use proctor::value::Value;
/// let a = Value::array([1, 2]);
/// let b = Value::array([1, 2]);
/// assert!(equiv(&[a, b]));
/// assert!(equiv(&[]));
/// ```
pub fn equiv(values: &[Value]) -> bool {
    values.windows(2).all(|pair| equivalent(&pair[0], &pair[1]))
}

/// Returns whether `a` and `b` are equivalent.
pub fn equivalent(a: &Value, b: &Value) -> bool {
    Equivalence::default().compare(a, b)
}

/// Scratch state for one top-level comparison.
#[derive(Default)]
struct Equivalence {
    /// Pairs queued for comparison; also the record of pairs already in flight.
    pairs: Vec<(Value, Value)>,
}

impl Equivalence {
    fn compare(&mut self, a: &Value, b: &Value) -> bool {
        self.pairs.clear();
        self.pairs.push((a.clone(), b.clone()));
        let mut i = 0;
        while i < self.pairs.len() {
            let (left, right) = self.pairs[i].clone();
            if !left.strict_equals(&right) && !self.type_equiv(&left, &right) {
                self.pairs.clear();
                return false;
            }
            i += 1;
        }
        self.pairs.clear();
        true
    }

    /// Compares a nested pair with a fresh queue, restoring the caller's queue after.
    fn compare_isolated(&mut self, a: &Value, b: &Value) -> bool {
        let parent = std::mem::take(&mut self.pairs);
        let result = self.compare(a, b);
        self.pairs = parent;
        result
    }

    /// Compares two children of containers being compared.
    fn compare_child(&mut self, a: &Value, b: &Value) -> bool {
        if a.strict_equals(b) {
            return true;
        }
        if !a.type_tag().is_container() {
            return self.type_equiv(a, b);
        }
        let queued = self
            .pairs
            .iter()
            .any(|(left, right)| left.strict_equals(a) && right.strict_equals(b));
        if !queued {
            self.pairs.push((a.clone(), b.clone()));
        }
        true
    }

    fn type_equiv(&mut self, a: &Value, b: &Value) -> bool {
        let tag = a.type_tag();
        if tag != b.type_tag() {
            return false;
        }
        match tag {
            TypeTag::Undefined | TypeTag::Null => true,
            TypeTag::Boolean | TypeTag::Number | TypeTag::String | TypeTag::Date => {
                a.value_of().strict_equals(&b.value_of())
            }
            TypeTag::NaN => true,
            TypeTag::RegExp => regexps_equal(a, b),
            TypeTag::Function => false,
            TypeTag::Array => self.arrays_equal(a, b),
            TypeTag::Set => self.sets_equal(a, b),
            TypeTag::Map => self.maps_equal(a, b),
            TypeTag::Object => self.records_equal(a, b),
        }
    }

    fn arrays_equal(&mut self, a: &Value, b: &Value) -> bool {
        let (Some(left), Some(right)) = (children(a), children(b)) else {
            return false;
        };
        if left.len() != right.len() {
            return false;
        }
        left.iter()
            .zip(right.iter())
            .all(|(x, y)| self.compare_child(x, y))
    }

    fn sets_equal(&mut self, a: &Value, b: &Value) -> bool {
        let (Some(left), Some(right)) = (children(a), children(b)) else {
            return false;
        };
        if left.len() != right.len() {
            return false;
        }
        self.each_has_match(&left, &right) && self.each_has_match(&right, &left)
    }

    fn each_has_match(&mut self, from: &[Value], to: &[Value]) -> bool {
        from.iter()
            .all(|x| to.iter().any(|y| self.compare_isolated(y, x)))
    }

    fn maps_equal(&mut self, a: &Value, b: &Value) -> bool {
        let (Some(left), Some(right)) = (entries(a), entries(b)) else {
            return false;
        };
        if left.len() != right.len() {
            return false;
        }
        self.each_entry_has_match(&left, &right) && self.each_entry_has_match(&right, &left)
    }

    fn each_entry_has_match(&mut self, from: &[(Value, Value)], to: &[(Value, Value)]) -> bool {
        from.iter().all(|(from_key, from_value)| {
            let wanted = Value::array([from_value.clone(), from_key.clone()]);
            to.iter().any(|(to_key, to_value)| {
                let candidate = Value::array([to_value.clone(), to_key.clone()]);
                self.compare_isolated(&candidate, &wanted)
            })
        })
    }

    fn records_equal(&mut self, a: &Value, b: &Value) -> bool {
        let (Some((proto_a, props_a)), Some((proto_b, props_b))) = (record(a), record(b)) else {
            return false;
        };
        if !constructors_match(&proto_a, &proto_b) {
            return false;
        }
        let is_instance = matches!(proto_a, Proto::Class(_));
        for (key, value_a) in &props_a {
            let value_b = props_b
                .iter()
                .find(|(k, _)| k == key)
                .map(|(_, v)| v.clone())
                .unwrap_or_default();
            if is_instance && same_method_source(value_a, &value_b) {
                continue;
            }
            if !self.compare_child(value_a, &value_b) {
                return false;
            }
        }
        // Records keep keys sorted, so key sets compare positionally.
        props_a.len() == props_b.len()
            && props_a.iter().zip(props_b.iter()).all(|((k1, _), (k2, _))| k1 == k2)
    }
}

// ============================================================================
// HELPERS
// ============================================================================

/// Snapshot of an array's or set's elements, so no borrow is held while comparing.
fn children(value: &Value) -> Option<Vec<Value>> {
    let obj = value.as_obj()?;
    let object = obj.borrow();
    match &*object {
        Object::Array(items) | Object::Set(items) => Some(items.clone()),
        _ => None,
    }
}

fn entries(value: &Value) -> Option<Vec<(Value, Value)>> {
    let obj = value.as_obj()?;
    let object = obj.borrow();
    match &*object {
        Object::Map(entries) => Some(entries.clone()),
        _ => None,
    }
}

fn record(value: &Value) -> Option<(Proto, Vec<(String, Value)>)> {
    let obj = value.as_obj()?;
    let object = obj.borrow();
    match &*object {
        Object::Record { proto, props } => Some((
            proto.clone(),
            props.iter().map(|(k, v)| (k.clone(), v.clone())).collect(),
        )),
        _ => None,
    }
}

fn regexps_equal(a: &Value, b: &Value) -> bool {
    let parts = |value: &Value| -> Option<(String, String)> {
        let obj = value.as_obj()?;
        let object = obj.borrow();
        match &*object {
            Object::RegExp { source, flags } => {
                let mut flags: Vec<char> = flags.chars().collect();
                flags.sort_unstable();
                flags.dedup();
                Some((source.clone(), flags.into_iter().collect()))
            }
            _ => None,
        }
    };
    matches!((parts(a), parts(b)), (Some(x), Some(y)) if x == y)
}

/// A null-prototype record is interchangeable with a plain one; class instances must
/// share the same class.
fn constructors_match(a: &Proto, b: &Proto) -> bool {
    match (a, b) {
        (Proto::Object | Proto::Null, Proto::Object | Proto::Null) => true,
        (Proto::Class(x), Proto::Class(y)) => x.ptr_eq(y),
        _ => false,
    }
}

fn same_method_source(a: &Value, b: &Value) -> bool {
    let source = |value: &Value| -> Option<String> {
        let obj = value.as_obj()?;
        let object = obj.borrow();
        match &*object {
            Object::Function(function) => Some(function.source.clone()),
            _ => None,
        }
    };
    matches!((source(a), source(b)), (Some(x), Some(y)) if x == y)
}
