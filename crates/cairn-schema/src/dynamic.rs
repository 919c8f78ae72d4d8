//! A data-driven [`PersistableObject`].
//!
//! [`DynamicObject`] keeps its fields in a declaration-ordered list instead of
//! compiled struct members. Hosts whose entities are assembled from data
//! (scripted actors, prototypes loaded from files) can use it directly; the
//! test suites use it to describe "the class as it was" and "the class as it
//! is now" side by side.

use cairn_archive::codec::{ReadExt, WriteExt};

use crate::custom::{CustomDataReader, CustomDataWriter};
use crate::kind::DataKind;
use crate::model::{FieldInfo, FieldKind, PersistCallbacks, PersistableObject};
use crate::value::FieldValue;
use crate::Result;

#[derive(Debug, Clone)]
enum Slot {
    Value(FieldKind, FieldValue),
    Struct(Option<DynamicObject>),
    Object {
        current: Option<Box<DynamicObject>>,
        /// Instances `prepare_nested` may switch to, by class name.
        templates: Vec<DynamicObject>,
    },
}

impl PartialEq for Slot {
    fn eq(&self, other: &Self) -> bool {
        match (self, other) {
            (Slot::Value(ka, a), Slot::Value(kb, b)) => ka == kb && a == b,
            (Slot::Struct(a), Slot::Struct(b)) => a == b,
            (Slot::Object { current: a, .. }, Slot::Object { current: b, .. }) => a == b,
            _ => false,
        }
    }
}

/// Object whose field list is data.
///
/// Equality compares class, field values and custom data. Hook logs and
/// nested-object templates are ignored.
#[derive(Debug, Clone)]
pub struct DynamicObject {
    class: String,
    fields: Vec<(String, Slot)>,
    shared_asset: bool,
    custom: Vec<u8>,
    hooks: Vec<String>,
}

impl PartialEq for DynamicObject {
    fn eq(&self, other: &Self) -> bool {
        self.class == other.class
            && self.fields == other.fields
            && self.shared_asset == other.shared_asset
            && self.custom == other.custom
    }
}

impl DynamicObject {
    pub fn new(class: impl Into<String>) -> Self {
        Self {
            class: class.into(),
            fields: Vec::new(),
            shared_asset: false,
            custom: Vec::new(),
            hooks: Vec::new(),
        }
    }

    // -- builders -------------------------------------------------------------

    /// Append a single-value field whose kind is the value's own. An array
    /// value declares an array of its first element's kind (`U8` when empty).
    pub fn with_value(self, name: impl Into<String>, value: FieldValue) -> Self {
        match value {
            FieldValue::Array(items) => {
                let kind = items.first().and_then(FieldValue::kind).unwrap_or(DataKind::U8);
                self.with_array(name, kind, items)
            }
            value => {
                let kind = value.kind().unwrap_or(DataKind::U8);
                self.push(name, Slot::Value(FieldKind::Value(kind), value))
            }
        }
    }

    pub fn with_array(self, name: impl Into<String>, kind: DataKind, items: Vec<FieldValue>) -> Self {
        self.push(name, Slot::Value(FieldKind::Array(kind), FieldValue::Array(items)))
    }

    /// Append a nested value aggregate. Only its fields are stored; its class
    /// name is ignored.
    pub fn with_struct(self, name: impl Into<String>, inner: DynamicObject) -> Self {
        self.push(name, Slot::Struct(Some(inner)))
    }

    /// Append an aggregate that a given instance may not carry. An absent
    /// aggregate stores nothing beneath its marker.
    pub fn with_optional_struct(self, name: impl Into<String>, inner: Option<DynamicObject>) -> Self {
        self.push(name, Slot::Struct(inner))
    }

    /// Append a polymorphic nested object slot. A present object also serves
    /// as a template for its own class.
    pub fn with_object(self, name: impl Into<String>, current: Option<DynamicObject>) -> Self {
        let templates = current.iter().cloned().collect();
        self.push(
            name,
            Slot::Object {
                current: current.map(Box::new),
                templates,
            },
        )
    }

    /// Register another class the nested object slot `name` can hold.
    pub fn with_template(mut self, name: &str, template: DynamicObject) -> Self {
        if let Some(Slot::Object { templates, .. }) = self.slot_mut(name) {
            templates.push(template);
        }
        self
    }

    /// Mark as a shared read-only asset.
    pub fn shared_asset(mut self) -> Self {
        self.shared_asset = true;
        self
    }

    pub fn with_custom(mut self, custom: Vec<u8>) -> Self {
        self.custom = custom;
        self
    }

    fn push(mut self, name: impl Into<String>, slot: Slot) -> Self {
        self.fields.push((name.into(), slot));
        self
    }

    // -- accessors ----------------------------------------------------------

    pub fn class(&self) -> &str {
        &self.class
    }

    fn slot(&self, name: &str) -> Option<&Slot> {
        self.fields.iter().find(|(n, _)| n == name).map(|(_, s)| s)
    }

    fn slot_mut(&mut self, name: &str) -> Option<&mut Slot> {
        self.fields.iter_mut().find(|(n, _)| n == name).map(|(_, s)| s)
    }

    /// Value of a single-value or array field.
    pub fn get(&self, name: &str) -> Option<&FieldValue> {
        match self.slot(name)? {
            Slot::Value(_, value) => Some(value),
            _ => None,
        }
    }

    /// Assign a value field, respecting its declared kind.
    pub fn set(&mut self, name: &str, value: FieldValue) -> bool {
        match self.slot_mut(name) {
            Some(Slot::Value(kind, slot)) if accepts(*kind, &value) => {
                *slot = value;
                true
            }
            _ => false,
        }
    }

    /// The aggregate or nested object behind `name`.
    pub fn nested_by_name(&self, name: &str) -> Option<&DynamicObject> {
        match self.slot(name)? {
            Slot::Struct(inner) => inner.as_ref(),
            Slot::Object { current, .. } => current.as_deref(),
            Slot::Value(..) => None,
        }
    }

    pub fn nested_by_name_mut(&mut self, name: &str) -> Option<&mut DynamicObject> {
        match self.slot_mut(name)? {
            Slot::Struct(inner) => inner.as_mut(),
            Slot::Object { current, .. } => current.as_deref_mut(),
            Slot::Value(..) => None,
        }
    }

    pub fn custom(&self) -> &[u8] {
        &self.custom
    }

    pub fn set_custom(&mut self, custom: Vec<u8>) {
        self.custom = custom;
    }

    /// Restore hooks received so far, oldest first.
    pub fn hook_log(&self) -> &[String] {
        &self.hooks
    }

    #[cfg(test)]
    pub(crate) fn force_value(&mut self, name: &str, value: FieldValue) {
        if let Some(Slot::Value(_, slot)) = self.slot_mut(name) {
            *slot = value;
        }
    }
}

fn accepts(kind: FieldKind, value: &FieldValue) -> bool {
    match (kind, value) {
        (FieldKind::Array(kind), FieldValue::Array(_)) => value.is_kind(kind),
        (FieldKind::Value(kind), value) => value.kind() == Some(kind),
        _ => false,
    }
}

// ---------------------------------------------------------------------------
// PersistableObject
// ---------------------------------------------------------------------------

impl PersistableObject for DynamicObject {
    fn class_name(&self) -> &str {
        &self.class
    }

    fn persistent_fields(&self) -> Vec<FieldInfo> {
        self.fields
            .iter()
            .map(|(name, slot)| {
                let kind = match slot {
                    Slot::Value(kind, _) => *kind,
                    Slot::Struct(_) => FieldKind::Struct,
                    Slot::Object { .. } => FieldKind::Object,
                };
                FieldInfo::new(name.clone(), kind)
            })
            .collect()
    }

    fn read_field(&self, index: usize) -> Option<FieldValue> {
        match &self.fields.get(index)?.1 {
            Slot::Value(_, value) => Some(value.clone()),
            _ => None,
        }
    }

    fn write_field(&mut self, index: usize, value: FieldValue) -> bool {
        match self.fields.get_mut(index) {
            Some((_, Slot::Value(kind, slot))) if accepts(*kind, &value) => {
                *slot = value;
                true
            }
            _ => false,
        }
    }

    fn nested(&self, index: usize) -> Option<&dyn PersistableObject> {
        match &self.fields.get(index)?.1 {
            Slot::Struct(inner) => inner.as_ref().map(|o| o as &dyn PersistableObject),
            Slot::Object { current, .. } => current.as_deref().map(|o| o as &dyn PersistableObject),
            Slot::Value(..) => None,
        }
    }

    fn nested_mut(&mut self, index: usize) -> Option<&mut dyn PersistableObject> {
        match &mut self.fields.get_mut(index)?.1 {
            Slot::Struct(inner) => inner.as_mut().map(|o| o as &mut dyn PersistableObject),
            Slot::Object { current, .. } => current
                .as_deref_mut()
                .map(|o| o as &mut dyn PersistableObject),
            Slot::Value(..) => None,
        }
    }

    fn prepare_nested(&mut self, index: usize, class: Option<&str>) -> bool {
        let Some((_, Slot::Object { current, templates })) = self.fields.get_mut(index) else {
            return false;
        };
        let Some(class) = class else {
            *current = None;
            return true;
        };
        if current.as_ref().is_some_and(|c| c.class == class) {
            return true;
        }
        match templates.iter().find(|t| t.class == class) {
            Some(template) => {
                *current = Some(Box::new(template.clone()));
                true
            }
            None => false,
        }
    }

    fn is_shared_asset(&self) -> bool {
        self.shared_asset
    }

    fn callbacks(&self) -> Option<&dyn PersistCallbacks> {
        Some(self)
    }

    fn callbacks_mut(&mut self) -> Option<&mut dyn PersistCallbacks> {
        Some(self)
    }
}

impl PersistCallbacks for DynamicObject {
    fn store_custom_data(&self, out: &mut CustomDataWriter) -> Result<()> {
        if !self.custom.is_empty() {
            out.put_blob(&self.custom)?;
        }
        Ok(())
    }

    fn pre_restore(&mut self) {
        self.hooks.push("pre_restore".into());
    }

    fn restore_custom_data(&mut self, input: &mut CustomDataReader<'_>) -> Result<()> {
        if input.remaining() > 0 {
            self.custom = input.get_blob()?;
        }
        Ok(())
    }

    fn post_restore(&mut self) {
        self.hooks.push("post_restore".into());
    }

    fn pre_restore_upgrade(&mut self, stored_version: u32, current_version: u32) {
        self.hooks
            .push(format!("pre_upgrade {stored_version}->{current_version}"));
    }

    fn post_restore_upgrade(&mut self, stored_version: u32, current_version: u32) {
        self.hooks
            .push(format!("post_upgrade {stored_version}->{current_version}"));
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn set_rejects_the_wrong_kind() {
        let mut obj = DynamicObject::new("Lamp").with_value("power", FieldValue::U32(60));
        assert!(!obj.set("power", FieldValue::I32(5)));
        assert!(obj.set("power", FieldValue::U32(75)));
        assert_eq!(obj.get("power"), Some(&FieldValue::U32(75)));
        assert!(!obj.set("missing", FieldValue::U32(1)));
    }

    #[test]
    fn prepare_nested_switches_between_templates() {
        let mut obj = DynamicObject::new("Npc")
            .with_object("brain", Some(DynamicObject::new("CalmBrain")))
            .with_template("brain", DynamicObject::new("AngryBrain"));

        assert!(obj.prepare_nested(0, Some("AngryBrain")));
        assert_eq!(obj.nested_by_name("brain").map(|b| b.class()), Some("AngryBrain"));
        assert!(!obj.prepare_nested(0, Some("SleepyBrain")));
        assert!(obj.prepare_nested(0, None));
        assert!(obj.nested_by_name("brain").is_none());
    }

    #[test]
    fn hook_log_does_not_affect_equality() {
        let a = DynamicObject::new("Lamp").with_value("lit", FieldValue::Bool(true));
        let mut b = a.clone();
        b.pre_restore();
        assert_eq!(a, b);
        assert_eq!(b.hook_log(), ["pre_restore"]);
    }

    #[test]
    fn array_values_declare_their_element_kind() {
        let obj = DynamicObject::new("Bag")
            .with_value("coins", FieldValue::Array(vec![FieldValue::U16(1)]));
        assert_eq!(
            obj.persistent_fields()[0].kind,
            FieldKind::Array(DataKind::U16)
        );
    }
}
