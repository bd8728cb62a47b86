//! Canonical resource-form computation.

/// Produces the canonical form of a resource set: the members sorted and
/// comma-joined. Two resource sets name "the same resources" iff their
/// canonical forms are byte-equal.
pub fn canonical_form<R: AsRef<str>>(resources: &[R]) -> String {
    let mut sorted: Vec<&str> = resources.iter().map(|r| r.as_ref()).collect();
    sorted.sort_unstable();
    sorted.join(",")
}

/// Builds the store key for a resource under a lock name: `"{name}:{resource}"`.
pub fn store_key(lock_name: &str, resource: &str) -> String {
    format!("{lock_name}:{resource}")
}
