//! Canonical boxed numbers.
//!
//! Boxing hot numeric values returns a shared canonical object instead of a
//! fresh allocation; loop counters and small constants then cost nothing.
//! Cached boxes live on the default heap so a scoped-allocator reset can
//! never invalidate them.

use once_cell::sync::Lazy;

use crate::runtime::value::{allocate_on_heap, ObjRef, Object};

/// Lowest cached integer. Matches the JVM's lower bound; small negatives are
/// common as sentinels and decrements.
pub const INTEGER_CACHE_LOW: i64 = -128;
/// Highest cached integer; raised above the JVM's 127 to cover common loop
/// iteration counts.
pub const INTEGER_CACHE_HIGH: i64 = 1024;

/// Lowest cached integer-valued real.
pub const REAL_CACHE_LOW: i64 = -10;
/// Highest cached integer-valued real.
pub const REAL_CACHE_HIGH: i64 = 100;

static INTEGER_CACHE: Lazy<Vec<ObjRef>> = Lazy::new(|| {
    (INTEGER_CACHE_LOW..=INTEGER_CACHE_HIGH)
        .map(|value| allocate_on_heap(Object::Integer(value)))
        .collect()
});

static REAL_INT_CACHE: Lazy<Vec<ObjRef>> = Lazy::new(|| {
    (REAL_CACHE_LOW..=REAL_CACHE_HIGH)
        .map(|value| allocate_on_heap(Object::Real(value as f64)))
        .collect()
});

static REAL_HALF: Lazy<ObjRef> = Lazy::new(|| allocate_on_heap(Object::Real(0.5)));
static REAL_NEG_HALF: Lazy<ObjRef> = Lazy::new(|| allocate_on_heap(Object::Real(-0.5)));
static REAL_PI: Lazy<ObjRef> = Lazy::new(|| allocate_on_heap(Object::Real(std::f64::consts::PI)));
static REAL_E: Lazy<ObjRef> = Lazy::new(|| allocate_on_heap(Object::Real(std::f64::consts::E)));

/// Whether an integer falls in the cached range.
pub const fn integer_in_range(value: i64) -> bool {
    value >= INTEGER_CACHE_LOW && value <= INTEGER_CACHE_HIGH
}

/// Canonical box for `value`, when it is in the cached range.
pub fn cached_integer(value: i64) -> Option<ObjRef> {
    if integer_in_range(value) {
        let index = (value - INTEGER_CACHE_LOW) as usize;
        Some(INTEGER_CACHE[index])
    } else {
        None
    }
}

fn is_exact_integer(value: f64) -> bool {
    value.floor() == value && value.is_finite()
}

/// Canonical box for `value`, when it is a cached real.
///
/// Covers integer-valued reals in the cache range plus 0.5 and -0.5, which
/// are exactly representable and safe to compare bit-for-bit. Pi and e are
/// kept as canonical constants but never matched by equality.
pub fn cached_real(value: f64) -> Option<ObjRef> {
    if is_exact_integer(value)
        && value >= REAL_CACHE_LOW as f64
        && value <= REAL_CACHE_HIGH as f64
    {
        let index = (value as i64 - REAL_CACHE_LOW) as usize;
        return Some(REAL_INT_CACHE[index]);
    }
    if value == 0.5 {
        return Some(*REAL_HALF);
    }
    if value == -0.5 {
        return Some(*REAL_NEG_HALF);
    }
    None
}

/// Canonical pi.
pub fn real_pi() -> ObjRef {
    *REAL_PI
}

/// Canonical e.
pub fn real_e() -> ObjRef {
    *REAL_E
}
