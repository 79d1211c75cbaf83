//! Rebuilding protobuf nesting from a flat pool and reference edges.
//!
//! Front ends that recover descriptors from decompiled sources report
//! every message and enum as a top-level record, with a side table of
//! "field F of R references T" edges. This module decides which records
//! become nested children, which stay top-level, and how the survivors
//! are split into files, in four phases:
//!
//! 1. direct merge: a target with exactly one distinct referrer in its
//!    own package nests into that referrer (group targets always nest)
//! 2. forced merge: deferred targets nest anyway when staying top-level
//!    would create a mutual file import, or when two package-level
//!    enums collide on a value name
//! 3. finalize: remaining records become top-level types, with names
//!    normalized and disambiguated against their package
//! 4. assembly: one [`FileSchema`] per surviving top-level root
//!
//! The pool's insertion order drives every tie-break, so resolution is
//! fully deterministic. Phase 2 runs to a fixed point with a hard
//! iteration bound; exceeding it aborts with
//! [`Error::UnresolvedConflict`] instead of looping.

use std::collections::HashMap;

use indexmap::{IndexMap, IndexSet};
use tracing::{debug, warn};

use crate::error::{Error, Result};
use crate::pool::{
    file_path_of, package_of, DescriptorBody, DescriptorPool, DescriptorRecord, FieldType,
    FileSchema, ProtoSyntax, ReferrerEdge, ReferrerTable, NESTED_SEPARATOR,
};
use crate::render::ProtoRenderer;

/// Nests a flat descriptor pool into per-file schema trees.
#[derive(Debug)]
pub struct Resolver {
    pool: DescriptorPool,
    table: ReferrerTable,
    /// Merged path -> its top-level root. Insertion order is the merge
    /// order, reused for the per-file coverage listings.
    topmost: IndexMap<String, String>,
    /// Pool path -> current dotted display location.
    new_location: HashMap<String, String>,
    /// Display location -> pool path that owns it.
    location_owner: HashMap<String, String>,
    /// Path -> pool paths its tree references (with duplicates).
    imports: HashMap<String, Vec<String>>,
}

/// Output of a resolution run: the final pool plus one schema per file.
#[derive(Debug)]
pub struct ResolvedSet {
    /// Pool with all renames and reparenting applied
    pub pool: DescriptorPool,
    /// Schemas in deterministic output order
    pub files: Vec<FileSchema>,
    covered: Vec<Vec<String>>,
}

impl ResolvedSet {
    /// Returns the pool paths covered by the file at `index`, the file's
    /// top-level roots followed by everything merged under them.
    pub fn covered_paths(&self, index: usize) -> &[String] {
        self.covered.get(index).map(Vec::as_slice).unwrap_or(&[])
    }

    /// Renders every file, prefixed with a comment listing the original
    /// pool paths it covers.
    ///
    /// Returns `(file name, source text)` pairs in output order.
    pub fn render_all(&self, renderer: &ProtoRenderer) -> Result<Vec<(String, String)>> {
        let mut outputs = Vec::with_capacity(self.files.len());
        for (file, covered) in self.files.iter().zip(&self.covered) {
            let mut text = String::from("/**\n * Messages defined in this file:\n *\n");
            for path in covered {
                text.push_str(&format!(" * {}\n", path));
            }
            text.push_str(" */\n\n");
            text.push_str(&renderer.render_file(file, &self.pool)?);
            outputs.push((file.name.clone(), text));
        }
        Ok(outputs)
    }
}

impl Resolver {
    /// Creates a resolver over a pool and its reference table.
    pub fn new(pool: DescriptorPool, table: ReferrerTable) -> Self {
        Self {
            pool,
            table,
            topmost: IndexMap::new(),
            new_location: HashMap::new(),
            location_owner: HashMap::new(),
            imports: HashMap::new(),
        }
    }

    /// Runs all four phases and returns the assembled files.
    pub fn resolve(mut self) -> Result<ResolvedSet> {
        self.demote_dangling();
        let order = self.merge_order();
        let mut mergeable = self.direct_merge_pass(&order)?;
        let mut collisions = self.collect_enum_collisions(&order);
        self.forced_merge_fixed_point(&mut mergeable, &mut collisions)?;
        self.finalize_top_level()?;
        Ok(self.assemble())
    }

    /// Drops edges whose target never made it into the pool and demotes
    /// the referencing fields to opaque bytes. Edges with live targets
    /// seed the import tracking instead.
    fn demote_dangling(&mut self) {
        let targets: Vec<String> = self.table.targets().map(str::to_string).collect();
        for target in targets {
            if self.pool.contains(&target) {
                let edges = self.table.get(&target).map(|e| e.to_vec()).unwrap_or_default();
                for edge in edges {
                    self.imports.entry(edge.referrer).or_default().push(target.clone());
                }
            } else {
                warn!(target = %target, "dropping reference to missing descriptor");
                let edges = self.table.remove(&target).unwrap_or_default();
                for edge in &edges {
                    let Some(message) = self
                        .pool
                        .get_mut(&edge.referrer)
                        .and_then(|r| r.as_message_mut())
                    else {
                        continue;
                    };
                    if let Some(field) = message.fields.iter_mut().find(|f| f.name == edge.field) {
                        field.field_type = FieldType::Bytes;
                        field.type_ref = None;
                    }
                }
            }
        }
    }

    /// Target processing order: group targets first, then table order.
    fn merge_order(&self) -> Vec<String> {
        let mut order: Vec<String> = self.table.targets().map(str::to_string).collect();
        order.sort_by_key(|target| {
            let is_group = self
                .table
                .get(target)
                .and_then(|edges| edges.first())
                .map(|edge| edge.is_group)
                .unwrap_or(false);
            !is_group
        });
        order
    }

    /// Edges structurally able to host `target`: the referrer exists, is
    /// not a descendant of the target, is not a map entry, and shares
    /// the target's source-level nesting root.
    fn candidate_edges(&self, target: &str) -> Vec<ReferrerEdge> {
        let Some(edges) = self.table.get(target) else {
            return Vec::new();
        };
        edges
            .iter()
            .filter(|edge| {
                self.pool.contains(&edge.referrer)
                    && self.current_top(&edge.referrer) != target
                    && !self.pool.get(&edge.referrer).is_some_and(|r| r.is_map_entry())
                    && nested_root_matches(target, &edge.referrer)
            })
            .cloned()
            .collect()
    }

    fn current_top<'a>(&'a self, path: &'a str) -> &'a str {
        self.topmost.get(path).map(String::as_str).unwrap_or(path)
    }

    fn current_location<'a>(&'a self, path: &'a str) -> &'a str {
        self.new_location.get(path).map(String::as_str).unwrap_or(path)
    }

    /// Phase 1. Targets that cannot merge directly but still have viable
    /// candidates are returned as the deferred set for phase 2.
    fn direct_merge_pass(
        &mut self,
        order: &[String],
    ) -> Result<IndexMap<String, Vec<ReferrerEdge>>> {
        let mut mergeable: IndexMap<String, Vec<ReferrerEdge>> = IndexMap::new();

        for target in order {
            let edges: Vec<ReferrerEdge> = match self.table.get(target) {
                Some(edges) => edges.to_vec(),
                None => continue,
            };
            let Some(first) = edges.first() else { continue };
            let package = package_of(target).to_string();

            if first.is_group {
                if first.referrer == *target || self.current_top(&first.referrer) == target.as_str() {
                    continue;
                }
                let referrer = first.referrer.clone();
                self.merge_into(target, &referrer, &package, true)?;
                continue;
            }

            let candidates = self.candidate_edges(target);
            let distinct: IndexSet<&str> = edges.iter().map(|e| e.referrer.as_str()).collect();
            let in_package = candidates
                .iter()
                .find(|edge| package.is_empty() || package_of(&edge.referrer) == package)
                .map(|edge| edge.referrer.clone());

            match in_package {
                Some(referrer) if distinct.len() == 1 => {
                    self.merge_into(target, &referrer, &package, false)?;
                }
                _ => {
                    if !candidates.is_empty() {
                        mergeable.insert(target.clone(), candidates);
                    }
                }
            }
        }
        Ok(mergeable)
    }

    /// Indexes enum value names by their package scope to find proto2
    /// namespace collisions among referenced enums.
    fn collect_enum_collisions(&self, order: &[String]) -> EnumCollisions {
        let mut collisions = EnumCollisions::default();

        for target in order {
            let Some(record) = self.pool.get(target) else { continue };
            let DescriptorBody::Enum(enumeration) = &record.body else {
                continue;
            };
            let package = package_of(self.current_location(target)).to_string();

            for value in &enumeration.values {
                let scoped = format!("{}.{}", package, value.name);
                let colliding: Vec<String> = {
                    let holders = collisions.holders.entry(scoped.clone()).or_default();
                    holders.insert(target.to_string());
                    if holders.len() > 1 {
                        holders.iter().cloned().collect()
                    } else {
                        Vec::new()
                    }
                };
                for holder in colliding {
                    collisions
                        .dup_names
                        .entry(holder)
                        .or_default()
                        .insert(scoped.clone());
                }
            }
        }
        collisions
    }

    /// Phase 2. Scans the deferred set until a full pass merges nothing.
    ///
    /// A deferred target is forced into a candidate (shallowest current
    /// location first) when leaving it top-level would keep a mutual
    /// import between two files, or when it is an enum with colliding
    /// value names. Each merge retires the target's collisions, which
    /// can release the other holder from its own forced merge.
    fn forced_merge_fixed_point(
        &mut self,
        mergeable: &mut IndexMap<String, Vec<ReferrerEdge>>,
        collisions: &mut EnumCollisions,
    ) -> Result<()> {
        let max_passes = mergeable.len() + 1;
        let mut passes = 0usize;
        let mut progressed = !mergeable.is_empty();

        while progressed {
            progressed = false;
            passes += 1;
            if passes > max_passes {
                return Err(Error::unresolved_conflict(mergeable.keys().cloned()));
            }

            let targets: Vec<String> = mergeable.keys().cloned().collect();
            for target in targets {
                let mut candidates = match mergeable.get(&target) {
                    Some(candidates) => candidates.clone(),
                    None => continue,
                };
                candidates.sort_by_key(|edge| {
                    self.current_location(&edge.referrer).matches('.').count()
                });

                let duplicates: Vec<String> = collisions
                    .dup_names
                    .get(&target)
                    .map(|set| set.iter().cloned().collect())
                    .unwrap_or_default();

                let mut merged = false;
                for edge in &candidates {
                    let top_referrer = self.current_top(&edge.referrer).to_string();
                    let mutual = top_referrer != target
                        && self
                            .imports
                            .get(&top_referrer)
                            .is_some_and(|list| list.contains(&target))
                        && self
                            .imports
                            .get(&target)
                            .is_some_and(|list| list.contains(&top_referrer));

                    if mutual || !duplicates.is_empty() {
                        let package = package_of(&target).to_string();
                        let referrer = edge.referrer.clone();
                        self.merge_into(&target, &referrer, &package, false)?;
                        mergeable.shift_remove(&target);
                        progressed = true;
                        merged = true;
                        break;
                    }
                }

                if merged {
                    for scoped in &duplicates {
                        let Some(holders) = collisions.holders.get_mut(scoped) else {
                            continue;
                        };
                        holders.shift_remove(&target);
                        if holders.len() == 1 {
                            if let Some(last) = holders.iter().next().cloned() {
                                if let Some(set) = collisions.dup_names.get_mut(&last) {
                                    set.shift_remove(scoped);
                                }
                            }
                        }
                    }
                }
            }
        }
        Ok(())
    }

    /// Phase 3. Normalizes every surviving top-level record's name and
    /// registers its final location, rewriting references on the way.
    fn finalize_top_level(&mut self) -> Result<()> {
        let paths: Vec<String> = self.pool.paths().map(str::to_string).collect();
        for path in paths {
            if self.topmost.contains_key(&path) {
                continue;
            }
            let display = self
                .pool
                .get(&path)
                .map(|r| r.name.clone())
                .unwrap_or_default();
            let mut name = normalize_name(&display);
            let package = package_of(&path);
            let prefix = if package.is_empty() {
                String::new()
            } else {
                format!("{}.", package)
            };

            let bound = self.pool.len() + 2;
            let mut attempts = 0usize;
            loop {
                let candidate = format!("{}{}", prefix, name);
                let owner = self
                    .location_owner
                    .get(&candidate)
                    .map(String::as_str)
                    .unwrap_or(&candidate);
                if owner == path || !self.pool.contains(owner) {
                    break;
                }
                name.push('_');
                attempts += 1;
                if attempts > bound {
                    return Err(Error::unresolved_conflict([path]));
                }
            }

            if let Some(record) = self.pool.get_mut(&path) {
                record.name.clone_from(&name);
            }
            let location = format!("{}{}", prefix, name);
            self.fix_naming(&path, &location, &path);
        }
        Ok(())
    }

    /// Nests `target` under `referrer` with a collision-free name.
    fn merge_into(
        &mut self,
        target: &str,
        referrer: &str,
        package: &str,
        is_group: bool,
    ) -> Result<()> {
        let prefix = if package.is_empty() {
            String::new()
        } else {
            format!("{}.", package)
        };
        let top_path = self.current_top(referrer).to_string();

        let display = self
            .pool
            .get(target)
            .map(|r| r.name.clone())
            .unwrap_or_default();
        let mut name = normalize_name(&display);

        let sibling_names: Vec<String> = {
            let referrer_record = self
                .pool
                .get(referrer)
                .ok_or_else(|| Error::missing_record(referrer))?;
            match referrer_record.as_message() {
                Some(message) => {
                    let mut names: Vec<String> = message
                        .fields
                        .iter()
                        .filter(|f| f.field_type != FieldType::Group)
                        .map(|f| f.name.clone())
                        .collect();
                    for child in &message.nested {
                        if let Some(record) = self.pool.get(child) {
                            names.push(record.name.clone());
                        }
                    }
                    names
                }
                None => Vec::new(),
            }
        };
        let top_imports: Vec<String> = self.imports.get(&top_path).cloned().unwrap_or_default();

        let bound = sibling_names.len() + top_imports.len() + 2;
        let mut attempts = 0usize;
        loop {
            // a nested child must not shadow a same-named top-level type
            // that the enclosing file imports
            let collides = sibling_names.iter().any(|n| *n == name)
                || (is_group && sibling_names.iter().any(|n| *n == name.to_lowercase()))
                || {
                    let qualified = format!("{}{}", prefix, name);
                    qualified != target
                        && top_imports.contains(&qualified)
                        && !self.topmost.contains_key(&qualified)
                };
            if !collides {
                break;
            }
            name.push('_');
            attempts += 1;
            if attempts > bound {
                return Err(Error::unresolved_conflict([target]));
            }
        }

        debug!(target = %target, referrer = %referrer, name = %name, "nesting descriptor");

        if let Some(record) = self.pool.get_mut(target) {
            record.name.clone_from(&name);
        }
        if let Some(message) = self.pool.get_mut(referrer).and_then(|r| r.as_message_mut()) {
            message.nested.push(target.to_string());
        }

        let new_path = format!("{}.{}", self.current_location(referrer), name);
        let target_imports = self.imports.get(target).cloned().unwrap_or_default();
        self.imports
            .entry(top_path.clone())
            .or_default()
            .extend(target_imports);

        self.fix_naming(target, &new_path, &top_path);
        Ok(())
    }

    /// Registers the new display location of `orig_path`, rewrites all
    /// references to it, and recurses into already-attached children so
    /// their locations follow the move.
    fn fix_naming(&mut self, orig_path: &str, new_path: &str, top_path: &str) {
        self.location_owner
            .insert(new_path.to_string(), orig_path.to_string());
        if orig_path != top_path {
            self.topmost
                .insert(orig_path.to_string(), top_path.to_string());
        }
        self.new_location
            .insert(orig_path.to_string(), new_path.to_string());

        let edges: Vec<ReferrerEdge> = self
            .table
            .get(orig_path)
            .map(|e| e.to_vec())
            .unwrap_or_default();
        for edge in edges {
            if let Some(message) = self
                .pool
                .get_mut(&edge.referrer)
                .and_then(|r| r.as_message_mut())
            {
                if let Some(field) = message.fields.iter_mut().find(|f| f.name == edge.field) {
                    field.type_ref = Some(new_path.to_string());
                }
            }
            let referrer_top = self.current_top(&edge.referrer).to_string();
            self.imports
                .entry(referrer_top)
                .or_default()
                .push(top_path.to_string());
        }

        let children: Vec<String> = self
            .pool
            .get(orig_path)
            .and_then(DescriptorRecord::as_message)
            .map(|m| m.nested.clone())
            .unwrap_or_default();
        for child in children {
            let child_name = self
                .pool
                .get(&child)
                .map(|r| r.name.clone())
                .unwrap_or_default();
            let child_location = format!("{}.{}", new_path, child_name);
            self.fix_naming(&child, &child_location, top_path);
        }
    }

    /// Phase 4. Groups top-level records into one schema per file path.
    fn assemble(self) -> ResolvedSet {
        let mut files: IndexMap<String, FileSchema> = IndexMap::new();
        let mut covered: IndexMap<String, Vec<String>> = IndexMap::new();
        let map_marker = format!("{}map", NESTED_SEPARATOR);

        for (path, _) in self.pool.iter() {
            if self.topmost.contains_key(path) {
                continue;
            }
            let file_path = file_path_of(path);
            let schema = files.entry(file_path.clone()).or_insert_with(|| {
                let mut file = FileSchema::new(file_path.clone(), ProtoSyntax::Proto2);
                file.package = package_of(path).to_string();
                file
            });

            if let Some(imports) = self.imports.get(path) {
                for imported in imports {
                    let import_path = file_path_of(imported);
                    if import_path != file_path
                        && !self.topmost.contains_key(imported)
                        && !schema.dependencies.contains(&import_path)
                    {
                        schema.dependencies.push(import_path);
                    }
                }
            }

            schema.top_level.push(path.to_string());

            let listing = covered.entry(file_path).or_default();
            listing.push(path.to_string());
            for (merged, top) in &self.topmost {
                if top.as_str() == path && !merged.contains(&map_marker) {
                    listing.push(merged.clone());
                }
            }
        }

        let covered: Vec<Vec<String>> = files
            .keys()
            .map(|key| covered.get(key).cloned().unwrap_or_default())
            .collect();
        ResolvedSet {
            pool: self.pool,
            files: files.into_values().collect(),
            covered,
        }
    }
}

/// Enum value names occupying the same package scope, proto2-style.
#[derive(Debug, Default)]
struct EnumCollisions {
    /// Scoped value name -> enum paths declaring it.
    holders: IndexMap<String, IndexSet<String>>,
    /// Enum path -> scoped value names it collides on.
    dup_names: IndexMap<String, IndexSet<String>>,
}

/// Strips source-level nesting tokens and uppercases the first letter.
fn normalize_name(name: &str) -> String {
    let base = name.rsplit(NESTED_SEPARATOR).next().unwrap_or(name);
    let mut chars = base.chars();
    match chars.next() {
        Some(first) => first.to_uppercase().collect::<String>() + chars.as_str(),
        None => String::new(),
    }
}

/// A target nested by its producer (`pkg.Outer$Inner`) may only merge
/// into referrers rooted in the same source-level container.
fn nested_root_matches(target: &str, referrer: &str) -> bool {
    if !target.contains(NESTED_SEPARATOR) {
        return true;
    }
    source_root(target) == source_root(referrer)
}

fn source_root(path: &str) -> &str {
    let last = path.rsplit('.').next().unwrap_or(path);
    last.split(NESTED_SEPARATOR).next().unwrap_or(last)
}
