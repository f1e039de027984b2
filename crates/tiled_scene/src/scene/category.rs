//! Category registry
//!
//! Category tags are interned into dense [`CategoryId`]s once, at
//! registration. Every per-category table in the scene is a `Vec` indexed by
//! the id.

use std::collections::HashMap;

use bytemuck::{Pod, Zeroable};

/// Maximum number of materials a category can carry
pub const MAX_MATERIALS_PER_CATEGORY: usize = 32;

/// Interned category tag
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct CategoryId(pub(crate) u32);

impl CategoryId {
    /// Dense index of the category
    pub fn index(self) -> usize {
        self.0 as usize
    }
}

/// GPU material record (std140)
#[repr(C)]
#[derive(Debug, Clone, Copy, PartialEq, Default)]
pub struct MaterialRecord {
    /// Diffuse color
    pub diffuse: [f32; 4],
    /// Ambient color
    pub ambient: [f32; 4],
    /// Specular color
    pub specular: [f32; 4],
    /// Specular exponent
    pub shininess: f32,
    /// Padding to 16 bytes
    pub _pad: [f32; 3],
}

unsafe impl Pod for MaterialRecord {}
unsafe impl Zeroable for MaterialRecord {}

impl MaterialRecord {
    /// Create a material record
    pub fn new(diffuse: [f32; 4], ambient: [f32; 4], specular: [f32; 4], shininess: f32) -> Self {
        Self { diffuse, ambient, specular, shininess, _pad: [0.0; 3] }
    }
}

/// Registration parameters of a category
#[derive(Debug, Clone, PartialEq, Default)]
pub struct CategoryDesc {
    /// Categories sharing a group are drawn next to each other; lower groups first
    pub pipeline_group: u32,
    /// Materials indexed by an object's material base (at most 32)
    pub materials: Vec<MaterialRecord>,
}

impl CategoryDesc {
    /// Builder-style pipeline group
    pub fn with_pipeline_group(mut self, group: u32) -> Self {
        self.pipeline_group = group;
        self
    }

    /// Builder-style material table
    pub fn with_materials(mut self, materials: Vec<MaterialRecord>) -> Self {
        self.materials = materials;
        self
    }
}

#[derive(Debug, Clone)]
struct CategoryEntry {
    name: String,
    desc: CategoryDesc,
}

/// Name to id table plus per-category descriptions
#[derive(Debug, Clone, Default)]
pub struct CategoryRegistry {
    entries: Vec<CategoryEntry>,
    lookup: HashMap<String, CategoryId>,
    draw_order: Vec<CategoryId>,
}

impl CategoryRegistry {
    /// Create an empty registry
    pub fn new() -> Self {
        Self::default()
    }

    /// Register `name`, or return its existing id
    pub fn register(&mut self, name: &str, mut desc: CategoryDesc) -> CategoryId {
        if let Some(&id) = self.lookup.get(name) {
            if self.entries[id.index()].desc != desc {
                log::warn!("Category '{}' already registered; keeping its first description", name);
            }
            return id;
        }

        if desc.materials.len() > MAX_MATERIALS_PER_CATEGORY {
            log::warn!(
                "Category '{}' has {} materials, only the first {} are used",
                name, desc.materials.len(), MAX_MATERIALS_PER_CATEGORY
            );
            desc.materials.truncate(MAX_MATERIALS_PER_CATEGORY);
        }

        let id = CategoryId(self.entries.len() as u32);
        self.entries.push(CategoryEntry { name: name.to_string(), desc });
        self.lookup.insert(name.to_string(), id);
        self.rebuild_draw_order();
        log::debug!("Registered category '{}' as {:?}", name, id);
        id
    }

    /// Look up a registered category
    pub fn get(&self, name: &str) -> Option<CategoryId> {
        self.lookup.get(name).copied()
    }

    /// Name of a category
    pub fn name(&self, id: CategoryId) -> &str {
        &self.entries[id.index()].name
    }

    /// Description of a category
    pub fn desc(&self, id: CategoryId) -> &CategoryDesc {
        &self.entries[id.index()].desc
    }

    /// Number of registered categories
    pub fn len(&self) -> usize {
        self.entries.len()
    }

    /// True when nothing is registered
    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }

    /// All ids in registration order
    pub fn ids(&self) -> impl Iterator<Item = CategoryId> {
        (0..self.entries.len() as u32).map(CategoryId)
    }

    /// Ids sorted by (pipeline group, id)
    pub fn draw_order(&self) -> &[CategoryId] {
        &self.draw_order
    }

    fn rebuild_draw_order(&mut self) {
        let mut order: Vec<CategoryId> = self.ids().collect();
        order.sort_by_key(|id| (self.entries[id.index()].desc.pipeline_group, *id));
        self.draw_order = order;
    }
}
