//! Style shorthand flattening with a content-addressed cache.

use bridge_core::hash::{hash_one, HashMap};
use bridge_core::Props;
use serde_json::Value;

const BOX_PROPERTIES: [&str; 2] = ["margin", "padding"];
const SIDES: [(&str, &str); 4] = [
    ("Top", "Vertical"),
    ("Right", "Horizontal"),
    ("Bottom", "Vertical"),
    ("Left", "Horizontal"),
];
const CORNERS: [&str; 4] = [
    "borderTopLeftRadius",
    "borderTopRightRadius",
    "borderBottomLeftRadius",
    "borderBottomRightRadius",
];

/// Expands shorthand style keys into their directional forms.
///
/// `margin`/`padding` and their `Horizontal`/`Vertical` variants become
/// `Top`/`Right`/`Bottom`/`Left` keys, and `borderRadius` becomes the four
/// corner keys. A more specific key always wins over a shorthand.
pub fn flatten_style(style: &Props) -> Props {
    let mut out = Props::new();
    for (key, value) in style {
        if !is_shorthand(key) {
            out.insert(key.clone(), value.clone());
        }
    }
    for property in BOX_PROPERTIES {
        for (side, axis) in SIDES {
            let resolved = style
                .get(&format!("{property}{side}"))
                .or_else(|| style.get(&format!("{property}{axis}")))
                .or_else(|| style.get(property));
            if let Some(value) = resolved {
                out.insert(format!("{property}{side}"), value.clone());
            }
        }
    }
    for corner in CORNERS {
        if let Some(value) = style.get(corner).or_else(|| style.get("borderRadius")) {
            out.insert(corner.to_string(), value.clone());
        }
    }
    out
}

fn is_shorthand(key: &str) -> bool {
    key == "borderRadius"
        || BOX_PROPERTIES.iter().any(|property| {
            key.strip_prefix(property)
                .is_some_and(|rest| matches!(rest, "" | "Horizontal" | "Vertical"))
        })
}

#[derive(Clone, Copy, Debug, Default, PartialEq, Eq)]
pub struct StyleCacheStats {
    pub hits: u64,
    pub misses: u64,
    pub entries: usize,
}

/// Remembers flattened styles keyed by their canonical JSON text, so an
/// identical style object is flattened at most once while cached.
#[derive(Debug)]
pub struct StyleCache {
    capacity: usize,
    entries: HashMap<u64, (String, Props)>,
    hits: u64,
    misses: u64,
}

impl StyleCache {
    pub fn new(capacity: usize) -> Self {
        Self {
            capacity,
            entries: HashMap::new(),
            hits: 0,
            misses: 0,
        }
    }

    pub fn flatten(&mut self, style: &Props) -> Props {
        let canonical = match serde_json::to_string(style) {
            Ok(canonical) => canonical,
            Err(err) => {
                log::warn!("style is not serializable, skipping cache: {err}");
                return flatten_style(style);
            }
        };
        let key = hash_one(&canonical);
        if let Some((source, flattened)) = self.entries.get(&key) {
            if *source == canonical {
                self.hits += 1;
                return flattened.clone();
            }
        }
        self.misses += 1;
        let flattened = flatten_style(style);
        if self.capacity > 0 {
            // Full cache starts over rather than tracking recency.
            if self.entries.len() >= self.capacity {
                self.entries.clear();
            }
            self.entries.insert(key, (canonical, flattened.clone()));
        }
        flattened
    }

    pub fn stats(&self) -> StyleCacheStats {
        StyleCacheStats {
            hits: self.hits,
            misses: self.misses,
            entries: self.entries.len(),
        }
    }

    pub fn clear(&mut self) {
        self.entries.clear();
    }
}

/// Wraps a flattened style as the `style` prop of an update.
pub fn style_props(flattened: Props) -> Props {
    let mut props = Props::new();
    props.insert("style".to_string(), Value::Object(flattened));
    props
}

#[cfg(test)]
mod tests {
    use serde_json::{json, Value};

    use super::{flatten_style, StyleCache};
    use bridge_core::Props;

    fn props(value: Value) -> Props {
        match value {
            Value::Object(map) => map,
            other => panic!("expected object, got {other}"),
        }
    }

    #[test]
    fn uniform_padding_expands_to_four_sides() {
        let flattened = flatten_style(&props(json!({"padding": 4, "color": "red"})));
        assert_eq!(
            flattened,
            props(json!({
                "color": "red",
                "paddingTop": 4,
                "paddingRight": 4,
                "paddingBottom": 4,
                "paddingLeft": 4,
            }))
        );
    }

    #[test]
    fn specific_keys_beat_axis_keys_beat_shorthand() {
        let flattened = flatten_style(&props(json!({
            "margin": 1,
            "marginHorizontal": 2,
            "marginLeft": 3,
        })));
        assert_eq!(
            flattened,
            props(json!({
                "marginTop": 1,
                "marginRight": 2,
                "marginBottom": 1,
                "marginLeft": 3,
            }))
        );
    }

    #[test]
    fn border_radius_expands_to_corners() {
        let flattened = flatten_style(&props(json!({
            "borderRadius": 6,
            "borderTopLeftRadius": 0,
        })));
        assert_eq!(flattened["borderTopLeftRadius"], json!(0));
        assert_eq!(flattened["borderBottomRightRadius"], json!(6));
        assert!(!flattened.contains_key("borderRadius"));
    }

    #[test]
    fn cache_flattens_identical_styles_once() {
        let mut cache = StyleCache::new(4);
        let style = props(json!({"padding": 8}));
        let first = cache.flatten(&style);
        let second = cache.flatten(&props(json!({"padding": 8})));

        assert_eq!(first, second);
        let stats = cache.stats();
        assert_eq!(stats.misses, 1);
        assert_eq!(stats.hits, 1);
        assert_eq!(stats.entries, 1);
    }

    #[test]
    fn full_cache_starts_over() {
        let mut cache = StyleCache::new(2);
        for n in 0..3 {
            cache.flatten(&props(json!({"margin": n})));
        }
        assert_eq!(cache.stats().entries, 1);
        assert_eq!(cache.stats().misses, 3);
    }
}
