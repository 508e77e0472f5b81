//! Shallow property diffing.
//!
//! `serde_json::Value` equality is structural, so a reconstructed `style`
//! object that matches the previous one compares equal and is not resent.
//! Keys missing from the new props are left alone; updates only ever add or
//! overwrite keys.

use bridge_core::Props;
use serde_json::Value;

/// Keys of `next` whose value differs from `previous`.
pub fn diff_props(previous: &Props, next: &Props) -> Props {
    diff_with(|key| previous.get(key), next)
}

/// Diffs `next` against the value a view will have once pending updates land:
/// the staged value where one exists, else the cached one.
pub fn diff_against_effective(
    cached: Option<&Props>,
    pending: Option<&Props>,
    next: &Props,
) -> Props {
    diff_with(
        |key| {
            pending
                .and_then(|pending| pending.get(key))
                .or_else(|| cached.and_then(|cached| cached.get(key)))
        },
        next,
    )
}

/// Overwrites `target` with every key of `diff`.
pub fn merge_props(target: &mut Props, diff: &Props) {
    for (key, value) in diff {
        target.insert(key.clone(), value.clone());
    }
}

fn diff_with<'a>(lookup: impl Fn(&str) -> Option<&'a Value>, next: &Props) -> Props {
    next.iter()
        .filter(|(key, value)| lookup(key.as_str()) != Some(*value))
        .map(|(key, value)| (key.clone(), value.clone()))
        .collect()
}
