//! Longest-prefix lookup over mount points.

use std::collections::BTreeMap;
use std::ops::Bound;

use super::node::VfsNode;
use super::path::SEPARATOR;

/// All mount nodes, keyed by canonical virtual path.
#[derive(Debug, Default)]
pub struct VfsTree {
    nodes: BTreeMap<String, VfsNode>,
}

impl VfsTree {
    pub fn new() -> Self {
        Self::default()
    }

    /// Insert a node, replacing any node with the same virtual path.
    pub fn insert(&mut self, node: VfsNode) -> Option<VfsNode> {
        self.nodes.insert(node.vpath().to_string(), node)
    }

    pub fn get(&self, vpath: &str) -> Option<&VfsNode> {
        self.nodes.get(vpath)
    }

    pub fn get_mut(&mut self, vpath: &str) -> Option<&mut VfsNode> {
        self.nodes.get_mut(vpath)
    }

    pub fn remove(&mut self, vpath: &str) -> Option<VfsNode> {
        self.nodes.remove(vpath)
    }

    pub fn iter(&self) -> impl Iterator<Item = &VfsNode> {
        self.nodes.values()
    }

    pub fn len(&self) -> usize {
        self.nodes.len()
    }

    pub fn is_empty(&self) -> bool {
        self.nodes.is_empty()
    }

    /// Find the node with the longest virtual path that prefixes `path`, and
    /// the remainder of `path` below it.
    ///
    /// Node paths end with `/`, so only prefixes ending at a separator are
    /// candidates; they are tried from longest to shortest.
    pub fn resolve<'p>(&self, path: &'p str) -> Option<(&VfsNode, &'p str)> {
        path.rmatch_indices(SEPARATOR).find_map(|(i, _)| {
            let (prefix, suffix) = path.split_at(i + 1);
            self.nodes.get(prefix).map(|node| (node, suffix))
        })
    }

    /// Virtual directories one level below `dir` that lead to mounted nodes,
    /// each with a trailing `/`.
    pub fn child_dirs(&self, dir: &str) -> Vec<String> {
        let mut children: Vec<String> = self
            .nodes
            .range::<str, _>((Bound::Included(dir), Bound::Unbounded))
            .take_while(|(vpath, _)| vpath.starts_with(dir))
            .filter_map(|(vpath, _)| {
                let rest = &vpath[dir.len()..];
                let end = rest.find(SEPARATOR)?;
                Some(format!("{dir}{}", &rest[..=end]))
            })
            .collect();
        children.dedup();
        children
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn tree(paths: &[&str]) -> VfsTree {
        let mut tree = VfsTree::new();
        for p in paths {
            tree.insert(VfsNode::new(p.to_string(), *p));
        }
        tree
    }

    #[test]
    fn longest_prefix_wins() {
        let tree = tree(&["/", "/data/", "/data/maps/", "/database/"]);

        let (node, suffix) = tree.resolve("/data/maps/level1.map").unwrap();
        assert_eq!((node.vpath(), suffix), ("/data/maps/", "level1.map"));

        let (node, suffix) = tree.resolve("/data/mapsx/a").unwrap();
        assert_eq!((node.vpath(), suffix), ("/data/", "mapsx/a"));

        let (node, suffix) = tree.resolve("/database/x").unwrap();
        assert_eq!((node.vpath(), suffix), ("/database/", "x"));

        let (node, suffix) = tree.resolve("/other").unwrap();
        assert_eq!((node.vpath(), suffix), ("/", "other"));
    }

    #[test]
    fn exact_node_path_has_empty_suffix() {
        let tree = tree(&["/data/"]);
        let (node, suffix) = tree.resolve("/data/").unwrap();
        assert_eq!(node.vpath(), "/data/");
        assert_eq!(suffix, "");
        assert!(tree.resolve("/data").is_none());
        assert!(tree.resolve("/elsewhere/x").is_none());
    }

    #[test]
    fn child_dirs_are_one_level_deep() {
        let tree = tree(&["/a/", "/a/b/", "/a/b/c/", "/a/d/", "/ab/"]);
        assert_eq!(tree.child_dirs("/"), ["/a/", "/ab/"]);
        assert_eq!(tree.child_dirs("/a/"), ["/a/b/", "/a/d/"]);
        assert!(tree.child_dirs("/a/d/").is_empty());
    }
}
