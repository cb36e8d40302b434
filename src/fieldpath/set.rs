//! Field path sets.

use super::path::{Path, PathElement};
use std::cmp::Ordering;
use std::collections::BTreeMap;

/// PathElementSet is a sorted, deduplicated set of PathElements.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct PathElementSet {
    members: Vec<PathElement>,
}

/// Which sides of a sorted merge to keep.
#[derive(Clone, Copy)]
enum Keep {
    Union,
    Intersection,
    Difference,
}

impl PathElementSet {
    pub fn new() -> Self {
        PathElementSet {
            members: Vec::new(),
        }
    }

    pub fn from_vec(mut elements: Vec<PathElement>) -> Self {
        elements.sort();
        elements.dedup();
        PathElementSet { members: elements }
    }

    pub fn len(&self) -> usize {
        self.members.len()
    }

    pub fn is_empty(&self) -> bool {
        self.members.is_empty()
    }

    pub fn contains(&self, element: &PathElement) -> bool {
        self.members.binary_search(element).is_ok()
    }

    pub fn insert(&mut self, element: PathElement) {
        if let Err(pos) = self.members.binary_search(&element) {
            self.members.insert(pos, element);
        }
    }

    pub fn remove(&mut self, element: &PathElement) -> bool {
        match self.members.binary_search(element) {
            Ok(pos) => {
                self.members.remove(pos);
                true
            }
            Err(_) => false,
        }
    }

    pub fn iter(&self) -> impl Iterator<Item = &PathElement> {
        self.members.iter()
    }

    pub fn union(&self, other: &PathElementSet) -> PathElementSet {
        self.merge(other, Keep::Union)
    }

    pub fn intersection(&self, other: &PathElementSet) -> PathElementSet {
        self.merge(other, Keep::Intersection)
    }

    pub fn difference(&self, other: &PathElementSet) -> PathElementSet {
        self.merge(other, Keep::Difference)
    }

    /// Single pass over both sorted vectors.
    fn merge(&self, other: &PathElementSet, keep: Keep) -> PathElementSet {
        let (a, b) = (&self.members, &other.members);
        let mut result = Vec::with_capacity(a.len() + b.len());
        let (mut i, mut j) = (0, 0);

        while i < a.len() && j < b.len() {
            match a[i].cmp(&b[j]) {
                Ordering::Less => {
                    if matches!(keep, Keep::Union | Keep::Difference) {
                        result.push(a[i].clone());
                    }
                    i += 1;
                }
                Ordering::Greater => {
                    if matches!(keep, Keep::Union) {
                        result.push(b[j].clone());
                    }
                    j += 1;
                }
                Ordering::Equal => {
                    if matches!(keep, Keep::Union | Keep::Intersection) {
                        result.push(a[i].clone());
                    }
                    i += 1;
                    j += 1;
                }
            }
        }

        if matches!(keep, Keep::Union | Keep::Difference) {
            result.extend(a[i..].iter().cloned());
        }
        if matches!(keep, Keep::Union) {
            result.extend(b[j..].iter().cloned());
        }

        PathElementSet { members: result }
    }
}

/// SetNodeMap maps a path element to the set of paths nested beneath it.
pub type SetNodeMap = BTreeMap<PathElement, Set>;

/// Set is a deduplicated collection of paths, stored as a prefix tree.
///
/// `members` holds the paths that end at this level; `children` holds the
/// paths that continue past it. A segment may be both a member and a child
/// when a path and some extension of it were both recorded.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct Set {
    pub members: PathElementSet,
    pub children: SetNodeMap,
    root_in_set: bool,
}

impl Set {
    pub fn new() -> Self {
        Set::default()
    }

    /// Builds a set from a list of paths.
    pub fn from_paths<'a>(paths: impl IntoIterator<Item = &'a Path>) -> Self {
        let mut set = Set::new();
        for path in paths {
            set.insert(path);
        }
        set
    }

    pub fn is_empty(&self) -> bool {
        !self.root_in_set && self.members.is_empty() && self.children.is_empty()
    }

    /// Returns true if the empty path is part of the set.
    pub fn contains_root(&self) -> bool {
        self.root_in_set
    }

    /// Returns the subset of paths below `element`, relative to it.
    pub fn child(&self, element: &PathElement) -> Option<&Set> {
        self.children.get(element)
    }

    /// Returns true if the set contains exactly this path.
    pub fn has(&self, path: &Path) -> bool {
        let elements = path.as_slice();
        match elements.split_last() {
            None => self.root_in_set,
            Some((last, parents)) => {
                let mut node = self;
                for pe in parents {
                    match node.children.get(pe) {
                        Some(child) => node = child,
                        None => return false,
                    }
                }
                node.members.contains(last)
            }
        }
    }

    /// Returns true if the set contains `path` or any path beneath it.
    pub fn has_prefix(&self, path: &Path) -> bool {
        let elements = path.as_slice();
        match elements.split_last() {
            None => !self.is_empty(),
            Some((last, parents)) => {
                let mut node = self;
                for pe in parents {
                    match node.children.get(pe) {
                        Some(child) => node = child,
                        None => return false,
                    }
                }
                node.members.contains(last) || node.children.contains_key(last)
            }
        }
    }

    pub fn insert(&mut self, path: &Path) {
        let elements = path.as_slice();
        match elements.split_last() {
            None => self.root_in_set = true,
            Some((last, parents)) => {
                let mut node = self;
                for pe in parents {
                    node = node.children.entry(pe.clone()).or_default();
                }
                node.members.insert(last.clone());
            }
        }
    }

    /// Set union. Associative, commutative and idempotent.
    pub fn union(&self, other: &Set) -> Set {
        let mut result = self.clone();
        result.union_into(other);
        result
    }

    fn union_into(&mut self, other: &Set) {
        self.root_in_set |= other.root_in_set;
        self.members = self.members.union(&other.members);

        for (key, other_child) in &other.children {
            match self.children.get_mut(key) {
                Some(self_child) => self_child.union_into(other_child),
                None => {
                    self.children.insert(key.clone(), other_child.clone());
                }
            }
        }
    }

    pub fn intersection(&self, other: &Set) -> Set {
        let mut children = BTreeMap::new();
        for (key, self_child) in &self.children {
            if let Some(other_child) = other.children.get(key) {
                let child = self_child.intersection(other_child);
                if !child.is_empty() {
                    children.insert(key.clone(), child);
                }
            }
        }

        Set {
            members: self.members.intersection(&other.members),
            children,
            root_in_set: self.root_in_set && other.root_in_set,
        }
    }

    /// Paths in `self` that are not in `other`.
    pub fn difference(&self, other: &Set) -> Set {
        let mut children = BTreeMap::new();
        for (key, self_child) in &self.children {
            let child = match other.children.get(key) {
                Some(other_child) => self_child.difference(other_child),
                None => self_child.clone(),
            };
            if !child.is_empty() {
                children.insert(key.clone(), child);
            }
        }

        Set {
            members: self.members.difference(&other.members),
            children,
            root_in_set: self.root_in_set && !other.root_in_set,
        }
    }

    /// Returns the paths that are not a strict prefix of any other path in
    /// the set.
    pub fn leaves(&self) -> Set {
        let members = self
            .members
            .iter()
            .filter(|m| !self.children.contains_key(*m))
            .cloned()
            .collect();

        let children = self
            .children
            .iter()
            .map(|(key, child)| (key.clone(), child.leaves()))
            .filter(|(_, child)| !child.is_empty())
            .collect();

        Set {
            members: PathElementSet::from_vec(members),
            children,
            root_in_set: self.root_in_set && self.members.is_empty() && self.children.is_empty(),
        }
    }

    /// Number of paths in the set.
    pub fn len(&self) -> usize {
        let mut count = 0;
        self.iterate(|_| count += 1);
        count
    }

    pub fn leaf_count(&self) -> usize {
        self.leaves().len()
    }

    /// Visits every path in the set, in sorted order per level.
    pub fn iterate<F>(&self, mut f: F)
    where
        F: FnMut(&Path),
    {
        if self.root_in_set {
            f(&Path::new());
        }
        self.iterate_with_path(&mut Path::new(), &mut f);
    }

    fn iterate_with_path<F>(&self, current_path: &mut Path, f: &mut F)
    where
        F: FnMut(&Path),
    {
        for member in self.members.iter() {
            current_path.push(member.clone());
            f(current_path);
            current_path.pop();
        }

        for (key, child) in &self.children {
            current_path.push(key.clone());
            child.iterate_with_path(current_path, f);
            current_path.pop();
        }
    }

    /// Collects every path in the set.
    pub fn paths(&self) -> Vec<Path> {
        let mut paths = Vec::new();
        self.iterate(|p| paths.push(p.clone()));
        paths
    }
}

impl FromIterator<Path> for Set {
    fn from_iter<T: IntoIterator<Item = Path>>(iter: T) -> Self {
        let mut set = Set::new();
        for path in iter {
            set.insert(&path);
        }
        set
    }
}
