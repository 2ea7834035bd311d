use std::collections::HashSet;
use std::sync::{Mutex, OnceLock};

/// Process-wide registry of levels already owned by some `Leaseboard`.
/// Modeled as a single shared mutex-protected set constructed lazily at
/// first use, rather than a true global singleton type — see spec.md §9,
/// "Global mutable state".
fn registry() -> &'static Mutex<HashSet<u32>> {
    static REGISTRY: OnceLock<Mutex<HashSet<u32>>> = OnceLock::new();
    REGISTRY.get_or_init(|| Mutex::new(HashSet::new()))
}

/// Claim `levels` for this `Leaseboard`. Fails if any level is already
/// owned by another instance.
pub(crate) fn claim(levels: &[u32]) -> Result<(), u32> {
    let mut owned = registry().lock().unwrap();
    if let Some(&collision) = levels.iter().find(|l| owned.contains(l)) {
        return Err(collision);
    }
    owned.extend(levels.iter().copied());
    Ok(())
}

/// Release `levels` previously claimed by [`claim`].
pub(crate) fn release(levels: &[u32]) {
    let mut owned = registry().lock().unwrap();
    for level in levels {
        owned.remove(level);
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    // Tests in this module share the process-wide registry, so each uses a
    // level range nobody else in the suite touches.
    #[test]
    fn claim_then_release_frees_the_level() {
        claim(&[70_001]).unwrap();
        release(&[70_001]);
        claim(&[70_001]).unwrap();
        release(&[70_001]);
    }

    #[test]
    fn overlapping_claim_is_rejected() {
        claim(&[70_010, 70_011]).unwrap();
        assert_eq!(claim(&[70_011, 70_012]), Err(70_011));
        release(&[70_010, 70_011]);
    }
}
