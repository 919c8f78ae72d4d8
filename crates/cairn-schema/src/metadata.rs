//! Class metadata registry.
//!
//! One [`ClassMetadata`] describes one data scope (a scene, or the global
//! scope). It interns class and field names to small integers, keeps one
//! [`ClassDef`] per class with the ordered list of stored fields, and owns the
//! prefix tree that gives every nested aggregate its own naming scope.
//!
//! IDs are only meaningful inside the registry that issued them. Names are the
//! portable identity, which is why renames rewrite names and definitions
//! rather than touching any instance bytes.
//!
//! Field order inside a [`ClassDef`] is append-only: it is the implicit binary
//! layout of every instance stored against it.

use std::collections::HashMap;
use std::fmt;
use std::io::{Read, Seek, Write};
use std::sync::OnceLock;

use cairn_archive::chunk::{ChunkReader, ChunkWriter, Magic};
use cairn_archive::codec::{ReadExt, WriteExt};

use crate::kind::KindTag;
use crate::{Result, SchemaError};

pub const META: Magic = Magic::new(*b"META");
const CLASS_NAMES: Magic = Magic::new(*b"CLSN");
const FIELD_NAMES: Magic = Magic::new(*b"FLDN");
const PREFIXES: Magic = Magic::new(*b"PFXT");
const CLASS_DEFS: Magic = Magic::new(*b"CDEF");

// ---------------------------------------------------------------------------
// Identifiers
// ---------------------------------------------------------------------------

/// Interned class name.
#[derive(Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct ClassId(pub(crate) u32);

impl ClassId {
    /// Stored in place of a class reference that is empty.
    pub const NONE: ClassId = ClassId(u32::MAX);

    #[inline]
    pub fn raw(self) -> u32 {
        self.0
    }

    #[inline]
    pub fn from_raw(raw: u32) -> Self {
        Self(raw)
    }
}

impl fmt::Debug for ClassId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "ClassId({})", self.0)
    }
}

/// Interned field name, shared by every class in the registry.
#[derive(Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct FieldId(pub(crate) u32);

impl fmt::Debug for FieldId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "FieldId({})", self.0)
    }
}

/// Nesting scope. [`PrefixId::ROOT`] is the top level of an object.
#[derive(Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct PrefixId(pub(crate) u32);

impl PrefixId {
    pub const ROOT: PrefixId = PrefixId(0);

    #[inline]
    pub fn raw(self) -> u32 {
        self.0
    }
}

impl fmt::Debug for PrefixId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "PrefixId({})", self.0)
    }
}

// ---------------------------------------------------------------------------
// NameTable
// ---------------------------------------------------------------------------

/// Bidirectional name <-> index table.
#[derive(Debug, Clone, Default)]
pub struct NameTable {
    names: Vec<String>,
    by_name: HashMap<String, u32>,
}

impl NameTable {
    pub fn find_or_add(&mut self, name: &str) -> u32 {
        if let Some(&id) = self.by_name.get(name) {
            return id;
        }
        let id = self.names.len() as u32;
        self.names.push(name.to_owned());
        self.by_name.insert(name.to_owned(), id);
        id
    }

    pub fn get(&self, name: &str) -> Option<u32> {
        self.by_name.get(name).copied()
    }

    pub fn name(&self, id: u32) -> Option<&str> {
        self.names.get(id as usize).map(String::as_str)
    }

    /// Rename in place, keeping the index. Fails if `old` is unknown or `new`
    /// is already taken.
    pub fn rename(&mut self, old: &str, new: &str) -> bool {
        if self.by_name.contains_key(new) {
            return false;
        }
        let Some(id) = self.by_name.remove(old) else {
            return false;
        };
        self.names[id as usize] = new.to_owned();
        self.by_name.insert(new.to_owned(), id);
        true
    }

    pub fn len(&self) -> usize {
        self.names.len()
    }

    pub fn is_empty(&self) -> bool {
        self.names.is_empty()
    }

    /// Names in index order.
    pub fn names(&self) -> impl Iterator<Item = &str> {
        self.names.iter().map(String::as_str)
    }

    fn write_to(&self, out: &mut impl Write) -> Result<()> {
        out.put_u32(self.names.len() as u32)?;
        for name in &self.names {
            out.put_str(name)?;
        }
        Ok(())
    }

    fn read_from(input: &mut impl Read) -> Result<Self> {
        let count = input.get_u32()?;
        let mut table = NameTable::default();
        for _ in 0..count {
            let name = input.get_string()?;
            if table.by_name.contains_key(&name) {
                return Err(SchemaError::CorruptMetadata {
                    details: format!("name '{name}' appears twice in a name table"),
                });
            }
            table.find_or_add(&name);
        }
        Ok(table)
    }
}

// ---------------------------------------------------------------------------
// PrefixTree
// ---------------------------------------------------------------------------

/// Maps `(parent prefix, field)` to the prefix of that field's nested scope.
#[derive(Debug, Clone)]
pub struct PrefixTree {
    children: HashMap<(PrefixId, FieldId), PrefixId>,
    next: u32,
}

impl Default for PrefixTree {
    fn default() -> Self {
        Self {
            children: HashMap::new(),
            next: 1,
        }
    }
}

impl PrefixTree {
    pub fn find_or_add(&mut self, parent: PrefixId, field: FieldId) -> PrefixId {
        if let Some(&child) = self.children.get(&(parent, field)) {
            return child;
        }
        let child = PrefixId(self.next);
        self.next += 1;
        self.children.insert((parent, field), child);
        child
    }

    pub fn get(&self, parent: PrefixId, field: FieldId) -> Option<PrefixId> {
        self.children.get(&(parent, field)).copied()
    }

    /// Make `(parent, field)` lead to an existing scope, unless it already
    /// leads somewhere.
    fn alias(&mut self, parent: PrefixId, field: FieldId, existing: PrefixId) {
        self.children.entry((parent, field)).or_insert(existing);
    }

    pub fn len(&self) -> usize {
        self.children.len()
    }

    pub fn is_empty(&self) -> bool {
        self.children.is_empty()
    }

    fn write_to(&self, out: &mut impl Write) -> Result<()> {
        let mut entries: Vec<_> = self.children.iter().collect();
        entries.sort();
        out.put_u32(entries.len() as u32)?;
        for (&(parent, field), &child) in entries {
            out.put_u32(parent.0)?;
            out.put_u32(field.0)?;
            out.put_u32(child.0)?;
        }
        Ok(())
    }

    fn read_from(input: &mut impl Read) -> Result<Self> {
        let count = input.get_u32()?;
        let mut tree = PrefixTree::default();
        for _ in 0..count {
            let parent = PrefixId(input.get_u32()?);
            let field = FieldId(input.get_u32()?);
            let child = PrefixId(input.get_u32()?);
            tree.children.insert((parent, field), child);
            tree.next = tree.next.max(child.0.saturating_add(1));
        }
        Ok(tree)
    }
}

// ---------------------------------------------------------------------------
// FieldDef / ClassDef
// ---------------------------------------------------------------------------

/// One stored field of a class.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct FieldDef {
    pub field: FieldId,
    pub prefix: PrefixId,
    pub tag: KindTag,
}

#[derive(Debug, Clone, Copy)]
struct RuntimeMatch {
    prefix: PrefixId,
    matches: bool,
}

type FieldIndex = HashMap<PrefixId, HashMap<FieldId, usize>>;

/// Stored layout of one class.
#[derive(Debug, Clone)]
pub struct ClassDef {
    id: ClassId,
    fields: Vec<FieldDef>,
    /// Slow-path lookup, built on first use.
    index: OnceLock<FieldIndex>,
    /// Whether the runtime class still lays out exactly as `fields`.
    runtime_match: OnceLock<RuntimeMatch>,
}

impl ClassDef {
    fn new(id: ClassId) -> Self {
        Self {
            id,
            fields: Vec::new(),
            index: OnceLock::new(),
            runtime_match: OnceLock::new(),
        }
    }

    pub fn id(&self) -> ClassId {
        self.id
    }

    pub fn fields(&self) -> &[FieldDef] {
        &self.fields
    }

    fn index(&self) -> &FieldIndex {
        self.index.get_or_init(|| {
            let mut index = FieldIndex::new();
            // Later entries win: a retyped field is appended, and the newest
            // definition is the live one.
            for (i, def) in self.fields.iter().enumerate() {
                index.entry(def.prefix).or_default().insert(def.field, i);
            }
            index
        })
    }

    /// Position of `(prefix, field)` in [`fields`](Self::fields).
    pub fn field_index(&self, prefix: PrefixId, field: FieldId) -> Option<usize> {
        self.index().get(&prefix)?.get(&field).copied()
    }

    /// Cached fast-path decision for objects restored at `prefix`.
    pub fn cached_match(&self, prefix: PrefixId) -> Option<bool> {
        self.runtime_match
            .get()
            .filter(|m| m.prefix == prefix)
            .map(|m| m.matches)
    }

    /// Remember a fast-path decision. Only the first prefix a class is
    /// restored at is cached; the rare class nested at several prefixes is
    /// re-checked at the others.
    pub fn remember_match(&self, prefix: PrefixId, matches: bool) {
        let _ = self.runtime_match.set(RuntimeMatch { prefix, matches });
    }

    fn find_or_add(&mut self, field: FieldId, prefix: PrefixId, tag: KindTag) -> usize {
        if let Some(i) = self.field_index(prefix, field) {
            if self.fields[i].tag == tag {
                return i;
            }
            tracing::debug!(
                class_id = ?self.id,
                ?field,
                ?prefix,
                old = ?self.fields[i].tag,
                new = ?tag,
                "field changed type -- appending a new definition"
            );
        }
        let i = self.fields.len();
        self.fields.push(FieldDef { field, prefix, tag });
        if let Some(index) = self.index.get_mut() {
            index.entry(prefix).or_default().insert(field, i);
        }
        self.runtime_match = OnceLock::new();
        i
    }

    fn invalidate(&mut self) {
        self.index = OnceLock::new();
        self.runtime_match = OnceLock::new();
    }
}

// ---------------------------------------------------------------------------
// ClassMetadata
// ---------------------------------------------------------------------------

/// All class and field metadata for one data scope.
#[derive(Debug, Clone, Default)]
pub struct ClassMetadata {
    classes: NameTable,
    fields: NameTable,
    prefixes: PrefixTree,
    /// Indexed by `ClassId.0`.
    defs: Vec<ClassDef>,
    user_data_model_version: u32,
}

impl ClassMetadata {
    pub fn new() -> Self {
        Self::default()
    }

    /// User data-model version the scope was last stored with.
    pub fn user_data_model_version(&self) -> u32 {
        self.user_data_model_version
    }

    pub fn set_user_data_model_version(&mut self, version: u32) {
        self.user_data_model_version = version;
    }

    pub fn is_empty(&self) -> bool {
        self.classes.is_empty()
    }

    // -- classes ------------------------------------------------------------

    /// Intern a class, creating an empty definition on first sight.
    pub fn find_or_add_class(&mut self, name: &str) -> ClassId {
        let id = ClassId(self.classes.find_or_add(name));
        while self.defs.len() <= id.0 as usize {
            let next = ClassId(self.defs.len() as u32);
            self.defs.push(ClassDef::new(next));
        }
        id
    }

    /// Look up a class without creating it.
    pub fn get_class(&self, name: &str) -> Option<ClassId> {
        self.classes.get(name).map(ClassId)
    }

    pub fn class_name(&self, id: ClassId) -> Option<&str> {
        self.classes.name(id.0)
    }

    pub fn class_def(&self, id: ClassId) -> Option<&ClassDef> {
        self.defs.get(id.0 as usize)
    }

    /// Class names in ClassId order.
    pub fn class_names(&self) -> impl Iterator<Item = &str> {
        self.classes.names()
    }

    /// Rename a class in place. Instance data references classes by ID, so no
    /// bytes move. Fails if `old` is unknown or `new` is already present.
    pub fn rename_class(&mut self, old: &str, new: &str) -> bool {
        self.classes.rename(old, new)
    }

    // -- fields and prefixes ------------------------------------------------

    /// Intern a field name. Store-side only.
    pub fn find_or_add_field(&mut self, name: &str) -> FieldId {
        FieldId(self.fields.find_or_add(name))
    }

    /// Look up a field name without creating it. Restore-side.
    pub fn get_field(&self, name: &str) -> Option<FieldId> {
        self.fields.get(name).map(FieldId)
    }

    pub fn field_name(&self, id: FieldId) -> Option<&str> {
        self.fields.name(id.0)
    }

    /// Scope for the fields nested under `field` at `parent`. Store-side only.
    pub fn find_or_add_prefix(&mut self, parent: PrefixId, field: FieldId) -> PrefixId {
        self.prefixes.find_or_add(parent, field)
    }

    /// Scope lookup that never creates. Restore-side.
    pub fn get_prefix(&self, parent: PrefixId, field: FieldId) -> Option<PrefixId> {
        self.prefixes.get(parent, field)
    }

    /// Resolve a `/`-separated path of field names (`""` is the root).
    pub fn resolve_prefix_path(&self, path: &str) -> Option<PrefixId> {
        let mut prefix = PrefixId::ROOT;
        for segment in path.split('/').filter(|s| !s.is_empty()) {
            let field = self.get_field(segment)?;
            prefix = self.get_prefix(prefix, field)?;
        }
        Some(prefix)
    }

    fn find_or_add_prefix_path(&mut self, path: &str) -> PrefixId {
        let mut prefix = PrefixId::ROOT;
        for segment in path.split('/').filter(|s| !s.is_empty()) {
            let field = self.find_or_add_field(segment);
            prefix = self.find_or_add_prefix(prefix, field);
        }
        prefix
    }

    /// Find or append the definition of `(field, prefix)` in `class`,
    /// returning its index. Store-side only.
    pub fn register_field(
        &mut self,
        class: ClassId,
        field: FieldId,
        prefix: PrefixId,
        tag: KindTag,
    ) -> Result<usize> {
        let def = self
            .defs
            .get_mut(class.0 as usize)
            .ok_or(SchemaError::UnknownClassId { id: class.0 })?;
        Ok(def.find_or_add(field, prefix, tag))
    }

    /// Rename a field of one class.
    ///
    /// The name table entry for `old` is left alone because other classes may
    /// share it. Instead the target `(FieldId, PrefixId)` is resolved or
    /// created and only this class's matching definitions are pointed at it.
    /// Nested scopes below a renamed aggregate field are aliased under the
    /// new name. Returns `true` if anything changed; repeating a rename is a
    /// no-op.
    pub fn rename_field(
        &mut self,
        class: &str,
        old: &str,
        new: &str,
        old_prefix_path: &str,
        new_prefix_path: &str,
    ) -> bool {
        let Some(class_id) = self.get_class(class) else {
            return false;
        };
        let Some(old_field) = self.get_field(old) else {
            return false;
        };
        let Some(old_prefix) = self.resolve_prefix_path(old_prefix_path) else {
            return false;
        };

        let targets: Vec<usize> = self.defs[class_id.0 as usize]
            .fields
            .iter()
            .enumerate()
            .filter(|(_, d)| d.field == old_field && d.prefix == old_prefix)
            .map(|(i, _)| i)
            .collect();
        if targets.is_empty() {
            return false;
        }

        let new_field = self.find_or_add_field(new);
        let new_prefix = self.find_or_add_prefix_path(new_prefix_path);
        if (new_field, new_prefix) == (old_field, old_prefix) {
            return false;
        }
        if self.defs[class_id.0 as usize]
            .fields
            .iter()
            .any(|d| d.field == new_field && d.prefix == new_prefix)
        {
            tracing::warn!(
                class,
                old,
                new,
                "rename target already exists in class -- leaving definitions untouched"
            );
            return false;
        }

        if let Some(child) = self.prefixes.get(old_prefix, old_field) {
            self.prefixes.alias(new_prefix, new_field, child);
        }
        let def = &mut self.defs[class_id.0 as usize];
        for i in targets {
            def.fields[i].field = new_field;
            def.fields[i].prefix = new_prefix;
        }
        def.invalidate();
        true
    }

    // -- serialization ------------------------------------------------------

    pub fn write_to<W: Write + Seek>(&self, w: &mut ChunkWriter<W>) -> Result<()> {
        w.chunk(META, |w| -> Result<()> {
            w.put_u32(self.user_data_model_version)?;
            w.chunk(CLASS_NAMES, |w| self.classes.write_to(w))?;
            w.chunk(FIELD_NAMES, |w| self.fields.write_to(w))?;
            w.chunk(PREFIXES, |w| self.prefixes.write_to(w))?;
            w.chunk(CLASS_DEFS, |w| -> Result<()> {
                w.put_u32(self.defs.len() as u32)?;
                for def in &self.defs {
                    w.put_u32(def.id.0)?;
                    w.put_u32(def.fields.len() as u32)?;
                    for f in &def.fields {
                        w.put_u32(f.field.0)?;
                        w.put_u32(f.prefix.0)?;
                        w.put_u16(f.tag.to_raw())?;
                    }
                }
                Ok(())
            })
        })
    }

    pub fn read_from<R: Read + Seek>(r: &mut ChunkReader<R>) -> Result<Self> {
        r.chunk(META, |r| -> Result<Self> {
            let user_data_model_version = r.get_u32()?;
            let classes = r.chunk(CLASS_NAMES, |r| NameTable::read_from(r))?;
            let fields = r.chunk(FIELD_NAMES, |r| NameTable::read_from(r))?;
            let prefixes = r.chunk(PREFIXES, |r| PrefixTree::read_from(r))?;
            let defs = r.chunk(CLASS_DEFS, |r| read_class_defs(r, &classes, &fields))?;
            Ok(Self {
                classes,
                fields,
                prefixes,
                defs,
                user_data_model_version,
            })
        })
    }
}

fn read_class_defs(
    input: &mut impl Read,
    classes: &NameTable,
    fields: &NameTable,
) -> Result<Vec<ClassDef>> {
    let mut defs: Vec<ClassDef> = (0..classes.len() as u32)
        .map(|i| ClassDef::new(ClassId(i)))
        .collect();
    let count = input.get_u32()?;
    for _ in 0..count {
        let id = input.get_u32()?;
        let field_count = input.get_u32()?;
        let def = defs
            .get_mut(id as usize)
            .ok_or_else(|| SchemaError::CorruptMetadata {
                details: format!("class definition {id} has no class name"),
            })?;
        for _ in 0..field_count {
            let field = FieldId(input.get_u32()?);
            let prefix = PrefixId(input.get_u32()?);
            let raw = input.get_u16()?;
            let tag = KindTag::from_raw(raw).ok_or(SchemaError::UnknownKindTag { raw })?;
            if field.0 as usize >= fields.len() {
                return Err(SchemaError::CorruptMetadata {
                    details: format!("class {id} references unknown field {}", field.0),
                });
            }
            def.fields.push(FieldDef { field, prefix, tag });
        }
    }
    Ok(defs)
}
