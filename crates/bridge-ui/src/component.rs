use bridge_core::{BridgeError, BridgeResult, Props, ViewType};
use indexmap::IndexMap;
use serde_json::Value;

/// How a component kind maps onto a native view.
#[derive(Clone, Debug, PartialEq)]
pub struct ComponentSpec {
    pub kind: String,
    pub view_type: ViewType,
    /// `(component prop, native prop)` renames applied before creation.
    pub prop_aliases: Vec<(String, String)>,
    pub default_props: Props,
}

impl ComponentSpec {
    pub fn new(kind: impl Into<String>, view_type: ViewType) -> Self {
        Self {
            kind: kind.into(),
            view_type,
            prop_aliases: Vec::new(),
            default_props: Props::new(),
        }
    }

    pub fn with_alias(mut self, from: impl Into<String>, to: impl Into<String>) -> Self {
        self.prop_aliases.push((from.into(), to.into()));
        self
    }

    pub fn with_default(mut self, key: impl Into<String>, value: Value) -> Self {
        self.default_props.insert(key.into(), value);
        self
    }

    /// Defaults first, then the caller's props with aliases renamed.
    pub fn native_props(&self, props: Props) -> Props {
        let mut out = self.default_props.clone();
        for (key, value) in props {
            let key = self
                .prop_aliases
                .iter()
                .find(|(from, _)| *from == key)
                .map(|(_, to)| to.clone())
                .unwrap_or(key);
            out.insert(key, value);
        }
        out
    }
}

/// Registry of component kinds the renderer can instantiate by name.
#[derive(Clone, Debug, Default)]
pub struct ComponentTable {
    specs: IndexMap<String, ComponentSpec>,
}

impl ComponentTable {
    pub fn new() -> Self {
        Self::default()
    }

    /// Table preloaded with one kind per built-in view type.
    pub fn with_builtins() -> Self {
        let mut table = Self::new();
        table.register(ComponentSpec::new("view", ViewType::View));
        table.register(ComponentSpec::new("text", ViewType::Text).with_alias("children", "text"));
        table.register(ComponentSpec::new("image", ViewType::Image).with_alias("source", "uri"));
        table.register(ComponentSpec::new("button", ViewType::Button).with_alias("title", "text"));
        table.register(
            ComponentSpec::new("textInput", ViewType::TextInput).with_alias("value", "text"),
        );
        table.register(ComponentSpec::new("scrollView", ViewType::ScrollView));
        table.register(ComponentSpec::new("list", ViewType::List));
        table
    }

    /// Adds or replaces the spec for `spec.kind`.
    pub fn register(&mut self, spec: ComponentSpec) {
        self.specs.insert(spec.kind.clone(), spec);
    }

    pub fn get(&self, kind: &str) -> Option<&ComponentSpec> {
        self.specs.get(kind)
    }

    pub fn kinds(&self) -> impl Iterator<Item = &str> {
        self.specs.keys().map(String::as_str)
    }

    pub fn resolve(&self, kind: &str, props: Props) -> BridgeResult<(ViewType, Props)> {
        let spec = self
            .get(kind)
            .ok_or_else(|| BridgeError::UnknownComponent(kind.to_string()))?;
        Ok((spec.view_type.clone(), spec.native_props(props)))
    }
}
