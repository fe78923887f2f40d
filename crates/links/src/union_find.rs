//! Disjoint sets over identity strings.
//!
//! # Invariants
//!
//! 1. **Roots own membership:** `members[r]` is the full class for a root `r`
//!    and empty for every non-root.
//! 2. **Union by size:** the smaller class is always attached under the
//!    larger, so trees stay logarithmic even without compression.
//! 3. **No removal:** splitting a class means rebuilding from scratch.

use rustc_hash::FxHashMap;

#[derive(Debug, Default, Clone)]
pub struct UnionFind {
    index: FxHashMap<String, usize>,
    names: Vec<String>,
    parent: Vec<usize>,
    members: Vec<Vec<usize>>,
}

impl UnionFind {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn clear(&mut self) {
        self.index.clear();
        self.names.clear();
        self.parent.clear();
        self.members.clear();
    }

    fn intern(&mut self, id: &str) -> usize {
        if let Some(&ix) = self.index.get(id) {
            return ix;
        }
        let ix = self.names.len();
        self.names.push(id.to_string());
        self.parent.push(ix);
        self.members.push(vec![ix]);
        self.index.insert(id.to_string(), ix);
        ix
    }

    /// Root with path compression.
    fn find(&mut self, mut x: usize) -> usize {
        let mut root = x;
        while self.parent[root] != root {
            root = self.parent[root];
        }
        while self.parent[x] != root {
            let next = self.parent[x];
            self.parent[x] = root;
            x = next;
        }
        root
    }

    /// Root without mutation, for read paths.
    fn root(&self, mut x: usize) -> usize {
        while self.parent[x] != x {
            x = self.parent[x];
        }
        x
    }

    /// Joins the classes of `a` and `b`. Returns false if they were already
    /// joined.
    pub fn union(&mut self, a: &str, b: &str) -> bool {
        let (ia, ib) = (self.intern(a), self.intern(b));
        let (ra, rb) = (self.find(ia), self.find(ib));
        if ra == rb {
            return false;
        }
        let (big, small) = if self.members[ra].len() >= self.members[rb].len() { (ra, rb) } else { (rb, ra) };
        self.parent[small] = big;
        let moved = std::mem::take(&mut self.members[small]);
        self.members[big].extend(moved);
        true
    }

    pub fn same_class(&self, a: &str, b: &str) -> bool {
        if a == b {
            return true;
        }
        match (self.index.get(a), self.index.get(b)) {
            (Some(&ia), Some(&ib)) => self.root(ia) == self.root(ib),
            _ => false,
        }
    }

    /// Representative of `id`'s class. Unknown ids represent themselves.
    pub fn representative<'a>(&'a self, id: &'a str) -> &'a str {
        match self.index.get(id) {
            Some(&ix) => &self.names[self.root(ix)],
            None => id,
        }
    }

    /// Every member of `id`'s class, `id` included, sorted.
    pub fn class_of(&self, id: &str) -> Vec<String> {
        let Some(&ix) = self.index.get(id) else {
            return vec![id.to_string()];
        };
        let mut class: Vec<String> =
            self.members[self.root(ix)].iter().map(|&m| self.names[m].clone()).collect();
        class.sort();
        class
    }

    /// All classes with more than one member, each sorted, ordered by first
    /// member.
    pub fn classes(&self) -> Vec<Vec<String>> {
        let mut classes: Vec<Vec<String>> = self
            .members
            .iter()
            .filter(|m| m.len() > 1)
            .map(|m| {
                let mut class: Vec<String> = m.iter().map(|&ix| self.names[ix].clone()).collect();
                class.sort();
                class
            })
            .collect();
        classes.sort();
        classes
    }
}
