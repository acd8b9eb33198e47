//! C ABI for compiled-block executors.
//!
//! C++ blocks talk to the host through opaque `u64` handles into a
//! process-wide table. All entry points are thread-safe: the table sits
//! behind a mutex and handles are plain integers. Struct values are
//! queried and constructed by name, matching the host struct model (ordered
//! fields, field-name lookup).

use std::{
    collections::HashMap,
    ffi::{c_char, CStr},
    sync::Mutex,
    sync::OnceLock,
};

use crate::marshal::WireValue;

/// Value tags shared with the C side. The numeric values are part of the
/// ABI and must not change.
#[repr(C)]
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum NaabValueType {
    Null = 0,
    Int = 1,
    Double = 2,
    Bool = 3,
    String = 4,
    Array = 5,
    Dict = 6,
    Block = 7,
    Function = 8,
    ForeignObject = 9,
    Struct = 10,
}

enum AbiValue {
    Wire(WireValue),
    Struct {
        type_name: String,
        fields: Vec<(String, u64)>,
    },
}

struct HandleTable {
    next: u64,
    entries: HashMap<u64, AbiValue>,
}

static TABLE: OnceLock<Mutex<HandleTable>> = OnceLock::new();

fn table() -> &'static Mutex<HandleTable> {
    TABLE.get_or_init(|| {
        Mutex::new(HandleTable {
            next: 1,
            entries: HashMap::new(),
        })
    })
}

fn insert(value: AbiValue) -> u64 {
    let mut table = table().lock().expect("ABI handle table poisoned");
    let handle = table.next;
    table.next += 1;
    table.entries.insert(handle, value);
    handle
}

/// Registers a wire value and returns its handle. Dicts and lists stay in
/// wire form; executors that need structs register them field-by-field via
/// `create_struct`.
pub fn wire_to_handle(value: WireValue) -> u64 {
    insert(AbiValue::Wire(value))
}

/// Resolves a handle back into wire form. Struct handles flatten to dicts
/// keyed by field name; dangling field handles resolve to null.
pub fn handle_to_wire(handle: u64) -> Option<WireValue> {
    let table = table().lock().expect("ABI handle table poisoned");
    resolve(&table, handle)
}

fn resolve(table: &HandleTable, handle: u64) -> Option<WireValue> {
    match table.entries.get(&handle)? {
        AbiValue::Wire(wire) => Some(wire.clone()),
        AbiValue::Struct { fields, .. } => {
            let mut entries = indexmap::IndexMap::new();
            for (name, field_handle) in fields {
                entries.insert(
                    name.clone(),
                    resolve(table, *field_handle).unwrap_or(WireValue::Null),
                );
            }
            Some(WireValue::Dict(entries))
        }
    }
}

/// Copies `text` into `buf` with a trailing nul, returning the number of
/// bytes written without the nul, or -1 when the buffer is too small.
fn copy_out(text: &str, buf: *mut c_char, cap: usize) -> isize {
    if buf.is_null() || cap <= text.len() {
        return -1;
    }
    // SAFETY: the caller guarantees `buf` points at at least `cap` writable
    // bytes, and we checked text.len() + 1 <= cap above.
    unsafe {
        std::ptr::copy_nonoverlapping(text.as_ptr(), buf.cast::<u8>(), text.len());
        *buf.add(text.len()) = 0;
    }
    text.len() as isize
}

/// # Safety
/// `name` must be a valid nul-terminated C string.
unsafe fn cstr<'a>(name: *const c_char) -> Option<&'a str> {
    if name.is_null() {
        return None;
    }
    // SAFETY: non-null and nul-terminated per the caller contract.
    unsafe { CStr::from_ptr(name) }.to_str().ok()
}

/// Tag of the value behind `handle`.
#[no_mangle]
pub extern "C" fn naab_value_type(handle: u64) -> NaabValueType {
    let table = table().lock().expect("ABI handle table poisoned");
    match table.entries.get(&handle) {
        None | Some(AbiValue::Wire(WireValue::Null)) => NaabValueType::Null,
        Some(AbiValue::Wire(WireValue::Int(_))) => NaabValueType::Int,
        Some(AbiValue::Wire(WireValue::Float(_))) => NaabValueType::Double,
        Some(AbiValue::Wire(WireValue::Bool(_))) => NaabValueType::Bool,
        Some(AbiValue::Wire(WireValue::Str(_))) => NaabValueType::String,
        Some(AbiValue::Wire(WireValue::List(_))) => NaabValueType::Array,
        Some(AbiValue::Wire(WireValue::Dict(_))) => NaabValueType::Dict,
        Some(AbiValue::Wire(WireValue::Foreign { .. })) => NaabValueType::ForeignObject,
        Some(AbiValue::Struct { .. }) => NaabValueType::Struct,
    }
}

#[no_mangle]
pub extern "C" fn naab_create_int(value: i64) -> u64 {
    insert(AbiValue::Wire(WireValue::Int(value)))
}

#[no_mangle]
pub extern "C" fn naab_create_double(value: f64) -> u64 {
    insert(AbiValue::Wire(WireValue::Float(value)))
}

#[no_mangle]
pub extern "C" fn naab_create_bool(value: bool) -> u64 {
    insert(AbiValue::Wire(WireValue::Bool(value)))
}

/// # Safety
/// `text` must be a valid nul-terminated C string.
#[no_mangle]
pub unsafe extern "C" fn naab_create_string(text: *const c_char) -> u64 {
    // SAFETY: forwarded caller contract.
    match unsafe { cstr(text) } {
        Some(text) => insert(AbiValue::Wire(WireValue::Str(text.to_owned()))),
        None => 0,
    }
}

#[no_mangle]
pub extern "C" fn naab_get_int(handle: u64) -> i64 {
    match handle_to_wire(handle) {
        Some(WireValue::Int(v)) => v,
        Some(WireValue::Bool(v)) => i64::from(v),
        _ => 0,
    }
}

#[no_mangle]
pub extern "C" fn naab_get_double(handle: u64) -> f64 {
    match handle_to_wire(handle) {
        Some(WireValue::Float(v)) => v,
        Some(WireValue::Int(v)) => v as f64,
        _ => 0.0,
    }
}

/// Drops a handle. Struct fields referenced by the dropped handle stay
/// alive under their own handles.
#[no_mangle]
pub extern "C" fn naab_release(handle: u64) {
    let mut table = table().lock().expect("ABI handle table poisoned");
    table.entries.remove(&handle);
}

/// # Safety
/// `type_name` and every entry of `field_names` must be valid
/// nul-terminated C strings; `field_names` must point at `field_count`
/// entries.
#[no_mangle]
pub unsafe extern "C" fn create_struct(
    type_name: *const c_char,
    field_names: *const *const c_char,
    field_count: usize,
) -> u64 {
    // SAFETY: forwarded caller contract.
    let Some(type_name) = (unsafe { cstr(type_name) }) else {
        return 0;
    };
    let mut fields = Vec::with_capacity(field_count);
    for index in 0..field_count {
        // SAFETY: `field_names` has `field_count` entries per the contract.
        let entry = unsafe { *field_names.add(index) };
        // SAFETY: each entry is a valid C string per the contract.
        let Some(name) = (unsafe { cstr(entry) }) else {
            return 0;
        };
        let null_handle = insert(AbiValue::Wire(WireValue::Null));
        fields.push((name.to_owned(), null_handle));
    }
    insert(AbiValue::Struct {
        type_name: type_name.to_owned(),
        fields,
    })
}

#[no_mangle]
pub extern "C" fn get_struct_type_name(handle: u64, buf: *mut c_char, cap: usize) -> isize {
    let table = table().lock().expect("ABI handle table poisoned");
    match table.entries.get(&handle) {
        Some(AbiValue::Struct { type_name, .. }) => copy_out(type_name, buf, cap),
        _ => -1,
    }
}

#[no_mangle]
pub extern "C" fn get_struct_field_count(handle: u64) -> isize {
    let table = table().lock().expect("ABI handle table poisoned");
    match table.entries.get(&handle) {
        Some(AbiValue::Struct { fields, .. }) => fields.len() as isize,
        _ => -1,
    }
}

#[no_mangle]
pub extern "C" fn get_struct_field_name(
    handle: u64,
    index: usize,
    buf: *mut c_char,
    cap: usize,
) -> isize {
    let table = table().lock().expect("ABI handle table poisoned");
    match table.entries.get(&handle) {
        Some(AbiValue::Struct { fields, .. }) => match fields.get(index) {
            Some((name, _)) => copy_out(name, buf, cap),
            None => -1,
        },
        _ => -1,
    }
}

/// # Safety
/// `field_name` must be a valid nul-terminated C string.
#[no_mangle]
pub unsafe extern "C" fn get_struct_field(handle: u64, field_name: *const c_char) -> u64 {
    // SAFETY: forwarded caller contract.
    let Some(field_name) = (unsafe { cstr(field_name) }) else {
        return 0;
    };
    let table = table().lock().expect("ABI handle table poisoned");
    match table.entries.get(&handle) {
        Some(AbiValue::Struct { fields, .. }) => fields
            .iter()
            .find(|(name, _)| name == field_name)
            .map(|(_, field_handle)| *field_handle)
            .unwrap_or(0),
        _ => 0,
    }
}

/// # Safety
/// `field_name` must be a valid nul-terminated C string.
#[no_mangle]
pub unsafe extern "C" fn set_struct_field(
    handle: u64,
    field_name: *const c_char,
    value: u64,
) -> bool {
    // SAFETY: forwarded caller contract.
    let Some(field_name) = (unsafe { cstr(field_name) }) else {
        return false;
    };
    let mut table = table().lock().expect("ABI handle table poisoned");
    match table.entries.get_mut(&handle) {
        Some(AbiValue::Struct { fields, .. }) => {
            match fields.iter_mut().find(|(name, _)| name == field_name) {
                Some((_, slot)) => {
                    *slot = value;
                    true
                }
                None => false,
            }
        }
        _ => false,
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::ffi::CString;

    #[test]
    fn struct_round_trip_by_name() {
        let type_name = CString::new("Point").unwrap();
        let x = CString::new("x").unwrap();
        let y = CString::new("y").unwrap();
        let names = [x.as_ptr(), y.as_ptr()];
        // SAFETY: all pointers are valid nul-terminated strings with the
        // declared count.
        let handle = unsafe { create_struct(type_name.as_ptr(), names.as_ptr(), 2) };
        assert_ne!(handle, 0);
        assert_eq!(naab_value_type(handle), NaabValueType::Struct);
        assert_eq!(get_struct_field_count(handle), 2);

        let value = naab_create_int(7);
        // SAFETY: `x` is a valid C string.
        assert!(unsafe { set_struct_field(handle, x.as_ptr(), value) });
        // SAFETY: `x` is a valid C string.
        let fetched = unsafe { get_struct_field(handle, x.as_ptr()) };
        assert_eq!(naab_get_int(fetched), 7);

        let mut buf = [0i8; 16];
        let written = get_struct_type_name(handle, buf.as_mut_ptr().cast(), buf.len());
        assert_eq!(written, 5);

        let wire = handle_to_wire(handle).unwrap();
        let WireValue::Dict(entries) = wire else {
            panic!("expected dict form");
        };
        assert_eq!(entries["x"], WireValue::Int(7));
        assert_eq!(entries["y"], WireValue::Null);
    }

    #[test]
    fn invalid_handles_degrade_gracefully() {
        assert_eq!(naab_value_type(u64::MAX), NaabValueType::Null);
        assert_eq!(get_struct_field_count(u64::MAX), -1);
        assert_eq!(naab_get_int(u64::MAX), 0);
    }
}
