//! Signature bands (spec.md §4.5): a signature is a Utf8 "form" plus the
//! ordered `Class` references slotted into each `L...;` marker the form
//! contains. The crate keeps a side map from erased Utf8 spelling to
//! signature entry so the class-local CP comparator (§4.7) can treat a
//! `Signature` and the plain `Utf8` it erases to as interchangeable.

/// Counts the number of `L...;` class-reference slots a descriptor or
/// signature form contains — one per `L` that is not part of a primitive
/// or array marker, i.e. every `L` up to its terminating `;`.
pub fn count_class_slots(form: &str) -> usize {
    form.bytes().filter(|&b| b == b'L').count()
}
