//! Own-property storage on heap objects.
//!
//! Every stored value owns one reference. Writers release the displaced value
//! only after the payload borrow is dropped, since releasing it may free the
//! object being written.

use crate::jsvalue::{JS_UNDEFINED, JSValue};
use crate::object::{ObjectData, Property};
use crate::refcount::object_ref;
use crate::runtime::{JSRuntime, RuntimeError};
use core::mem::size_of;

fn array_index(key: &str) -> Option<usize> {
    if key.len() > 1 && key.starts_with('0') {
        return None;
    }
    key.parse().ok()
}

/// Writes `val` into `data`, returning the displaced value and the number of
/// bytes the payload grew by, or `None` when `key` cannot be stored.
fn store(data: &mut ObjectData, key: &str, val: JSValue) -> Option<(Option<JSValue>, usize)> {
    if let ObjectData::Array { items, .. } = data {
        return match array_index(key)? {
            idx if idx < items.len() => Some((Some(core::mem::replace(&mut items[idx], val)), 0)),
            idx if idx == items.len() => {
                items.push(val);
                Some((None, size_of::<JSValue>()))
            }
            _ => None,
        };
    }
    let props = data.props_mut()?;
    if let Some(prop) = props.iter_mut().find(|p| &*p.key == key) {
        return Some((Some(core::mem::replace(&mut prop.value, val)), 0));
    }
    props.push(Property {
        key: key.into(),
        value: val,
    });
    Some((None, size_of::<Property>() + key.len()))
}

impl JSRuntime {
    /// Stores `val` under `key`, consuming the caller's reference on `val`.
    ///
    /// Arrays accept index keys up to their length; a key equal to the
    /// length appends. On error `val` is released.
    pub fn set_property(&mut self, obj: JSValue, key: &str, val: JSValue) -> Result<(), RuntimeError> {
        let Some(target) = object_ref(obj) else {
            self.free_value(val);
            return Err(RuntimeError::NotAnObject);
        };
        let stored = store(&mut target.data_mut(), key, val);
        let Some((old, growth)) = stored else {
            self.free_value(val);
            return Err(RuntimeError::NotAnObject);
        };
        self.note_growth(growth);
        if let Some(old) = old {
            self.free_value(old);
        }
        Ok(())
    }

    /// New reference to the own property `key`, or `undefined`.
    pub fn get_property(&self, obj: JSValue, key: &str) -> JSValue {
        let Some(target) = object_ref(obj) else {
            return JS_UNDEFINED;
        };
        let found = match &*target.data() {
            ObjectData::Array { items, .. } => {
                if key == "length" {
                    return JSValue::new_short_int(items.len() as i32);
                }
                array_index(key).and_then(|idx| items.get(idx).copied())
            }
            data => data
                .props()
                .iter()
                .find(|p| &*p.key == key)
                .map(|p| p.value),
        };
        found.map_or(JS_UNDEFINED, |val| self.dup_value(val))
    }

    /// Removes the own property `key`, releasing its value. Array elements
    /// cannot be deleted.
    pub fn delete_property(&mut self, obj: JSValue, key: &str) -> bool {
        let Some(target) = object_ref(obj) else {
            return false;
        };
        let mut data = target.data_mut();
        let Some(props) = data.props_mut() else {
            return false;
        };
        let Some(pos) = props.iter().position(|p| &*p.key == key) else {
            return false;
        };
        let prop = props.remove(pos);
        drop(data);
        self.note_shrink(size_of::<Property>() + prop.key.len());
        self.free_value(prop.value);
        true
    }

    /// Appends `val` to an array, consuming the caller's reference.
    pub fn array_push(&mut self, arr: JSValue, val: JSValue) -> Result<(), RuntimeError> {
        let pushed = match object_ref(arr) {
            Some(target) => match &mut *target.data_mut() {
                ObjectData::Array { items, .. } => {
                    items.push(val);
                    true
                }
                _ => false,
            },
            None => false,
        };
        if !pushed {
            self.free_value(val);
            return Err(RuntimeError::NotAnObject);
        }
        self.note_growth(size_of::<JSValue>());
        Ok(())
    }

    /// Prototype of `obj`, borrowed. The caller does not own the result.
    pub fn get_proto(&self, obj: JSValue) -> JSValue {
        object_ref(obj).map_or(crate::jsvalue::JS_NULL, |target| target.data().proto())
    }

    /// Own enumerable keys in insertion order; array indices come first.
    pub fn own_property_keys(&self, obj: JSValue) -> Vec<String> {
        let Some(target) = object_ref(obj) else {
            return Vec::new();
        };
        match &*target.data() {
            ObjectData::Array { items, .. } => (0..items.len()).map(|i| i.to_string()).collect(),
            data => data.props().iter().map(|p| p.key.to_string()).collect(),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::jsvalue::JS_NULL;

    #[test]
    fn overwrite_releases_previous_value() {
        let mut rt = JSRuntime::default();
        let obj = rt.new_plain_object(JS_NULL).expect("alloc");
        let first = rt.new_string("first").expect("alloc");
        rt.set_property(obj, "k", rt.dup_value(first)).expect("set");
        assert_eq!(rt.read_count(first), 2);
        rt.set_property(obj, "k", JSValue::new_short_int(1)).expect("set");
        assert_eq!(rt.read_count(first), 1);
        assert_eq!(rt.get_property(obj, "k"), JSValue::new_short_int(1));
        rt.free_value(first);
        rt.free_value(obj);
        assert_eq!(rt.malloc_size(), 0);
    }

    #[test]
    fn failed_store_releases_value() {
        let mut rt = JSRuntime::default();
        let target = rt.new_string("not an object").expect("alloc");
        let val = rt.new_string("v").expect("alloc");
        assert_eq!(
            rt.set_property(target, "k", val),
            Err(RuntimeError::NotAnObject)
        );
        assert!(!rt.is_live_object(val));
        rt.free_value(target);
    }

    #[test]
    fn array_indices_and_length() {
        let mut rt = JSRuntime::default();
        let arr = rt.new_array_from(JS_NULL, Vec::new()).expect("alloc");
        rt.array_push(arr, JSValue::new_short_int(7)).expect("push");
        rt.set_property(arr, "1", JSValue::new_short_int(8)).expect("append");
        assert!(rt.set_property(arr, "5", JS_UNDEFINED).is_err());
        assert_eq!(rt.get_property(arr, "length"), JSValue::new_short_int(2));
        assert_eq!(rt.get_property(arr, "0"), JSValue::new_short_int(7));
        assert_eq!(rt.own_property_keys(arr), vec!["0".to_string(), "1".to_string()]);
        rt.free_value(arr);
    }

    #[test]
    fn delete_frees_sole_reference() {
        let mut rt = JSRuntime::default();
        let obj = rt.new_plain_object(JS_NULL).expect("alloc");
        let child = rt.new_plain_object(JS_NULL).expect("alloc");
        rt.set_property(obj, "child", child).expect("set");
        assert!(rt.delete_property(obj, "child"));
        assert!(!rt.is_live_object(child));
        assert!(!rt.delete_property(obj, "child"));
        rt.free_value(obj);
    }

    #[test]
    fn releasing_stored_self_reference_frees_owner() {
        let mut rt = JSRuntime::default();
        let obj = rt.new_plain_object(JS_NULL).expect("alloc");
        rt.set_property(obj, "me", obj).expect("set");
        // the property now holds the only reference
        rt.set_property(obj, "me", JS_UNDEFINED).expect("set");
        assert_eq!(rt.live_objects(), 0);
    }
}
