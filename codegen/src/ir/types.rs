//! The type graph and entities.
//!
//! Types describe the layout of values in memory: primitives wrap a mode, pointers reference a
//! pointee, arrays and structs compose, classes add inheritance, and method types carry
//! signatures. Entities are the persistent symbols of a compilation unit: functions, fields,
//! globals, and the slots of a procedure's stack frame. A frame is an ordinary struct type whose
//! members are slots, so frame layout reuses struct layout.
//!
//! A `TypeStore` owns both tables. Hosts that process graphs on several threads share one store
//! behind their own mutual-exclusion boundary; the store itself is a plain value.

use crate::init;
use crate::ir::entities::{Entity, TypeRef};
use crate::ir::ident::Ident;
use crate::ir::modes::Mode;
use seagraph_entity::packed_option::PackedOption;
use seagraph_entity::PrimaryMap;

/// The contents of a type.
#[derive(Clone, Debug, PartialEq)]
pub enum TypeData {
    /// A primitive value type.
    Primitive {
        /// The mode of values of this type.
        mode: Mode,
    },
    /// A pointer type.
    Pointer {
        /// The referenced type.
        points_to: TypeRef,
    },
    /// A fixed-length array.
    Array {
        /// Element type.
        element: TypeRef,
        /// Number of elements.
        length: u32,
    },
    /// A compound type with fields laid out sequentially.
    Struct {
        /// The struct's name.
        name: Ident,
        /// Member entities, in declaration order until laid out.
        members: Vec<Entity>,
        /// Total size in bytes once laid out.
        size: u32,
        /// Alignment in bytes once laid out.
        align: u32,
    },
    /// A compound type that may inherit members from supertypes.
    Class {
        /// The class's name.
        name: Ident,
        /// Member entities.
        members: Vec<Entity>,
        /// Direct supertypes.
        supertypes: Vec<TypeRef>,
    },
    /// A function signature.
    Method {
        /// Parameter types.
        params: Vec<TypeRef>,
        /// Result types.
        results: Vec<TypeRef>,
    },
}

/// An entity: a named, typed symbol.
#[derive(Clone, Debug)]
pub struct EntityData {
    /// The entity's source-level name.
    pub name: Ident,
    /// The entity's type.
    pub ty: TypeRef,
    /// The compound type this entity is a member of, if any. Frame slots are members of the
    /// graph's frame type.
    pub owner: PackedOption<TypeRef>,
    /// Byte offset within the owner, or -1 before layout.
    pub offset: i32,
    /// The name used by the linker. Defaults to the source-level name.
    pub ld_name: Ident,
    /// For functions: whether calls depend only on their arguments and readable memory, with no
    /// observable side effects. Analyses may then treat call results as recomputable.
    pub pure: bool,
}

impl EntityData {
    /// Create an unplaced entity.
    pub fn new(name: Ident, ty: TypeRef, owner: Option<TypeRef>) -> Self {
        Self {
            name,
            ty,
            owner: owner.into(),
            offset: -1,
            ld_name: name,
            pure: false,
        }
    }
}

/// Owns all types and entities of a compilation unit.
pub struct TypeStore {
    types: PrimaryMap<TypeRef, TypeData>,
    entities: PrimaryMap<Entity, EntityData>,
}

impl TypeStore {
    /// Create an empty store.
    pub fn new() -> Self {
        Self {
            types: PrimaryMap::new(),
            entities: PrimaryMap::new(),
        }
    }

    /// Get the data of a type.
    pub fn ty(&self, ty: TypeRef) -> &TypeData {
        &self.types[ty]
    }

    /// Get the data of an entity.
    pub fn entity(&self, ent: Entity) -> &EntityData {
        &self.entities[ent]
    }

    /// Get the data of an entity, mutable version.
    pub fn entity_mut(&mut self, ent: Entity) -> &mut EntityData {
        &mut self.entities[ent]
    }

    /// Create a primitive type.
    pub fn new_primitive(&mut self, mode: Mode) -> TypeRef {
        self.types.push(TypeData::Primitive { mode })
    }

    /// Create a pointer type.
    pub fn new_pointer(&mut self, points_to: TypeRef) -> TypeRef {
        self.types.push(TypeData::Pointer { points_to })
    }

    /// Create an array type.
    pub fn new_array(&mut self, element: TypeRef, length: u32) -> TypeRef {
        self.types.push(TypeData::Array { element, length })
    }

    /// Create an empty struct type. Members are added with [`add_member`](Self::add_member) and
    /// offsets assigned by [`layout_struct`](Self::layout_struct).
    pub fn new_struct(&mut self, name: Ident) -> TypeRef {
        self.types.push(TypeData::Struct {
            name,
            members: Vec::new(),
            size: 0,
            align: 1,
        })
    }

    /// Create an empty class type.
    pub fn new_class(&mut self, name: Ident) -> TypeRef {
        self.types.push(TypeData::Class {
            name,
            members: Vec::new(),
            supertypes: Vec::new(),
        })
    }

    /// Create a method type.
    pub fn new_method(&mut self, params: Vec<TypeRef>, results: Vec<TypeRef>) -> TypeRef {
        self.types.push(TypeData::Method { params, results })
    }

    /// Create a fresh frame type for a procedure: a struct named after nothing in the source.
    pub fn new_frame_type(&mut self) -> TypeRef {
        self.new_struct(Ident::intern("$frame"))
    }

    /// Create a free-standing entity (function or global).
    pub fn new_entity(&mut self, name: Ident, ty: TypeRef) -> Entity {
        self.entities.push(EntityData::new(name, ty, None))
    }

    /// Create an entity as a member of a compound type.
    pub fn add_member(&mut self, owner: TypeRef, name: Ident, ty: TypeRef) -> Entity {
        let ent = self.entities.push(EntityData::new(name, ty, Some(owner)));
        match &mut self.types[owner] {
            TypeData::Struct { members, .. } | TypeData::Class { members, .. } => {
                members.push(ent)
            }
            _ => crate::diag::fatal(&format!("entity owner {} is not a compound type", owner)),
        }
        ent
    }

    /// The members of a compound type.
    pub fn members(&self, ty: TypeRef) -> &[Entity] {
        match &self.types[ty] {
            TypeData::Struct { members, .. } | TypeData::Class { members, .. } => members,
            _ => &[],
        }
    }

    /// Size of a type in bytes.
    pub fn size_of(&self, ty: TypeRef) -> u32 {
        match &self.types[ty] {
            TypeData::Primitive { mode } => mode.bytes(),
            TypeData::Pointer { .. } => u32::from(init::params().pointer_bits) / 8,
            TypeData::Array { element, length } => self.size_of(*element) * length,
            TypeData::Struct { size, .. } => *size,
            TypeData::Class { members, .. } => members
                .iter()
                .map(|&m| self.size_of(self.entities[m].ty))
                .sum(),
            TypeData::Method { .. } => 0,
        }
    }

    /// Alignment of a type in bytes.
    pub fn align_of(&self, ty: TypeRef) -> u32 {
        match &self.types[ty] {
            TypeData::Primitive { mode } => mode.bytes().max(1),
            TypeData::Pointer { .. } => u32::from(init::params().pointer_bits) / 8,
            TypeData::Array { element, .. } => self.align_of(*element),
            TypeData::Struct { align, .. } => *align,
            TypeData::Class { members, .. } => members
                .iter()
                .map(|&m| self.align_of(self.entities[m].ty))
                .max()
                .unwrap_or(1),
            TypeData::Method { .. } => 1,
        }
    }

    /// Assign offsets to the members of a struct in member order, with natural alignment, and
    /// record the struct's total size and alignment.
    pub fn layout_struct(&mut self, ty: TypeRef) {
        let members = self.members(ty).to_vec();
        let mut offset = 0u32;
        let mut max_align = 1u32;
        for m in &members {
            let mty = self.entities[*m].ty;
            let align = self.align_of(mty);
            let size = self.size_of(mty);
            offset = (offset + align - 1) & !(align - 1);
            self.entities[*m].offset = offset as i32;
            offset += size;
            max_align = max_align.max(align);
        }
        let size = (offset + max_align - 1) & !(max_align - 1);
        match &mut self.types[ty] {
            TypeData::Struct {
                size: s, align: a, ..
            } => {
                *s = size;
                *a = max_align;
            }
            _ => crate::diag::fatal(&format!("{} is not a struct type", ty)),
        }
    }

    /// Lay out a frame type: members are first sorted by ascending alignment so small slots pack
    /// tightly near the stack pointer, then offsets are assigned as in `layout_struct`.
    pub fn layout_frame(&mut self, ty: TypeRef) {
        let mut members = self.members(ty).to_vec();
        members.sort_by_key(|&m| self.align_of(self.entities[m].ty));
        match &mut self.types[ty] {
            TypeData::Struct { members: ms, .. } => *ms = members,
            _ => panic!("{} is not a struct type", ty),
        }
        self.layout_struct(ty);
    }

    /// The mode values of this type have when held in a register.
    pub fn mode_of(&self, ty: TypeRef) -> Mode {
        match &self.types[ty] {
            TypeData::Primitive { mode } => *mode,
            TypeData::Pointer { .. } | TypeData::Method { .. } => Mode::P,
            _ => Mode::P,
        }
    }

    /// Parameter and result types of a method type.
    pub fn signature(&self, ty: TypeRef) -> (&[TypeRef], &[TypeRef]) {
        match &self.types[ty] {
            TypeData::Method { params, results } => (params, results),
            _ => panic!("{} is not a method type", ty),
        }
    }
}

impl Default for TypeStore {
    fn default() -> Self {
        Self::new()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn struct_layout() {
        let mut store = TypeStore::new();
        let i8t = store.new_primitive(Mode::IS8);
        let i32t = store.new_primitive(Mode::IS32);
        let s = store.new_struct(Ident::intern("pair"));
        let a = store.add_member(s, Ident::intern("a"), i8t);
        let b = store.add_member(s, Ident::intern("b"), i32t);
        store.layout_struct(s);

        assert_eq!(store.entity(a).offset, 0);
        assert_eq!(store.entity(b).offset, 4);
        assert_eq!(store.size_of(s), 8);
        assert_eq!(store.align_of(s), 4);
    }

    #[test]
    fn frame_layout_sorts_by_alignment() {
        let mut store = TypeStore::new();
        let i64t = store.new_primitive(Mode::IS64);
        let i8t = store.new_primitive(Mode::IS8);
        let frame = store.new_frame_type();
        let big = store.add_member(frame, Ident::intern("big"), i64t);
        let small = store.add_member(frame, Ident::intern("small"), i8t);
        store.layout_frame(frame);

        // The byte-aligned slot comes first after sorting.
        assert_eq!(store.entity(small).offset, 0);
        assert_eq!(store.entity(big).offset, 8);
        assert_eq!(store.size_of(frame), 16);
    }

    #[test]
    fn array_size() {
        let mut store = TypeStore::new();
        let i32t = store.new_primitive(Mode::IS32);
        let arr = store.new_array(i32t, 10);
        assert_eq!(store.size_of(arr), 40);
        assert_eq!(store.align_of(arr), 4);
    }
}
