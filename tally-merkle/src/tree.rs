use serde::{Deserialize, Serialize};
use tally_crypto::{poseidon, Fe};

use crate::{Error, NodeStore};

/// Inclusion proof for one leaf.
///
/// `index` packs the left/right directions of the authentication path, one
/// bit per entry of `siblings` (bit set means the leaf-side node is the
/// right child at that step). Levels where the node was promoted without a
/// sibling contribute neither a sibling nor a bit, so the proof is
/// self-contained and verifiable without knowing the tree size.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct MerkleProof {
    pub root: Fe,
    pub leaf: Fe,
    pub index: u64,
    pub siblings: Vec<Fe>,
}

impl MerkleProof {
    pub fn verify(&self) -> bool {
        verify_proof(&self.root, &self.leaf, self.index, &self.siblings)
    }
}

/// Recompute the root from a leaf and its authentication path.
pub fn verify_proof(root: &Fe, leaf: &Fe, index: u64, siblings: &[Fe]) -> bool {
    let mut node = *leaf;

    for (i, sibling) in siblings.iter().enumerate() {
        let pair = if (index >> i) & 1 == 1 {
            [*sibling, node]
        } else {
            [node, *sibling]
        };

        node = match poseidon::hash(&pair) {
            Ok(digest) => digest,
            Err(_) => return false,
        };
    }

    node == *root
}

/// An append-only Merkle tree over a [`NodeStore`].
///
/// All interior nodes are materialized in the store, including promoted
/// copies along the right spine; an insert or update only touches the
/// ancestors of the affected leaf.
pub struct LeanTree<S> {
    store: S,
}

fn depth_for(size: u64) -> u32 {
    if size <= 1 {
        0
    } else {
        64 - (size - 1).leading_zeros()
    }
}

fn width_at(size: u64, level: u32) -> u64 {
    (size + (1 << level) - 1) >> level
}

impl<S: NodeStore> LeanTree<S> {
    pub fn new(store: S) -> Self {
        Self { store }
    }

    pub fn size(&self) -> u64 {
        self.store.leaves()
    }

    pub fn is_empty(&self) -> bool {
        self.size() == 0
    }

    pub fn depth(&self) -> u32 {
        depth_for(self.size())
    }

    pub fn store(&self) -> &S {
        &self.store
    }

    pub fn store_mut(&mut self) -> &mut S {
        &mut self.store
    }

    pub fn into_store(self) -> S {
        self.store
    }

    /// Current root; `None` while the tree is empty.
    pub fn root(&self) -> Result<Option<Fe>, Error> {
        let size = self.size();
        if size == 0 {
            return Ok(None);
        }

        let depth = depth_for(size);
        let root = self
            .store
            .get(depth, 0)?
            .ok_or(Error::MissingNode(depth, 0))?;

        Ok(Some(root))
    }

    pub fn leaf(&self, index: u64) -> Result<Option<Fe>, Error> {
        if index >= self.size() {
            return Ok(None);
        }
        self.store.get(0, index)
    }

    /// Append a leaf and return its index.
    pub fn insert(&mut self, leaf: Fe) -> Result<u64, Error> {
        let index = self.size();
        self.store.put(0, index, leaf)?;
        self.store.set_leaves(index + 1)?;
        self.recompute_path(index)?;
        Ok(index)
    }

    /// Overwrite the leaf at `index`.
    pub fn update(&mut self, index: u64, leaf: Fe) -> Result<(), Error> {
        let size = self.size();
        if index >= size {
            return Err(Error::IndexOutOfBounds(index, size));
        }

        self.store.put(0, index, leaf)?;
        self.recompute_path(index)
    }

    /// Inclusion proof for the leaf at `index`.
    pub fn proof(&self, index: u64) -> Result<MerkleProof, Error> {
        let size = self.size();
        if index >= size {
            return Err(Error::IndexOutOfBounds(index, size));
        }

        let leaf = self
            .store
            .get(0, index)?
            .ok_or(Error::MissingNode(0, index))?;

        let depth = depth_for(size);
        let mut siblings = Vec::with_capacity(depth as usize);
        let mut path = 0u64;
        let mut node_index = index;

        for level in 0..depth {
            let sibling_index = node_index ^ 1;
            if sibling_index < width_at(size, level) {
                let sibling = self
                    .store
                    .get(level, sibling_index)?
                    .ok_or(Error::MissingNode(level, sibling_index))?;

                path |= (node_index & 1) << siblings.len();
                siblings.push(sibling);
            }
            node_index >>= 1;
        }

        let root = self.root()?.ok_or(Error::Empty)?;

        Ok(MerkleProof {
            root,
            leaf,
            index: path,
            siblings,
        })
    }

    fn recompute_path(&mut self, index: u64) -> Result<(), Error> {
        let size = self.size();
        let depth = depth_for(size);
        let mut node_index = index;

        for level in 0..depth {
            let left_index = node_index & !1;
            let left = self
                .store
                .get(level, left_index)?
                .ok_or(Error::MissingNode(level, left_index))?;

            let parent = if left_index + 1 < width_at(size, level) {
                let right = self
                    .store
                    .get(level, left_index + 1)?
                    .ok_or(Error::MissingNode(level, left_index + 1))?;
                poseidon::hash(&[left, right])?
            } else {
                left
            };

            node_index >>= 1;
            self.store.put(level + 1, node_index, parent)?;
        }

        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::MemStore;

    fn h(a: Fe, b: Fe) -> Fe {
        poseidon::hash(&[a, b]).unwrap()
    }

    fn tree_with(leaves: &[u64]) -> LeanTree<MemStore> {
        let mut tree = LeanTree::new(MemStore::new());
        for leaf in leaves {
            tree.insert(Fe::from(*leaf)).unwrap();
        }
        tree
    }

    #[test]
    fn empty_tree_has_no_root() {
        let tree = LeanTree::new(MemStore::new());
        assert!(tree.root().unwrap().is_none());
        assert_eq!(tree.size(), 0);
    }

    #[test]
    fn single_leaf_root_is_the_leaf() {
        let tree = tree_with(&[7]);
        assert_eq!(tree.root().unwrap(), Some(Fe::from(7)));
    }

    #[test]
    fn pair_hashes_left_right() {
        let tree = tree_with(&[1, 2]);
        assert_eq!(tree.root().unwrap().unwrap(), h(Fe::from(1), Fe::from(2)));
    }

    #[test]
    fn odd_node_is_promoted() {
        let tree = tree_with(&[1, 2, 3]);
        let expected = h(h(Fe::from(1), Fe::from(2)), Fe::from(3));
        assert_eq!(tree.root().unwrap().unwrap(), expected);
    }

    #[test]
    fn five_leaves_promote_across_two_levels() {
        let tree = tree_with(&[1, 2, 3, 4, 5]);
        let left = h(h(Fe::from(1), Fe::from(2)), h(Fe::from(3), Fe::from(4)));
        assert_eq!(tree.root().unwrap().unwrap(), h(left, Fe::from(5)));
    }

    #[test]
    fn six_leaves_pair_the_tail() {
        let tree = tree_with(&[1, 2, 3, 4, 5, 6]);
        let left = h(h(Fe::from(1), Fe::from(2)), h(Fe::from(3), Fe::from(4)));
        let right = h(Fe::from(5), Fe::from(6));
        assert_eq!(tree.root().unwrap().unwrap(), h(left, right));
    }

    #[test]
    fn proofs_verify_at_every_size() {
        for size in 1..=10u64 {
            let leaves: Vec<u64> = (1..=size).collect();
            let tree = tree_with(&leaves);

            for index in 0..size {
                let proof = tree.proof(index).unwrap();
                assert!(proof.verify(), "size {size}, index {index}");
            }
        }
    }

    #[test]
    fn tampered_proof_fails() {
        let tree = tree_with(&[1, 2, 3, 4, 5]);
        let mut proof = tree.proof(2).unwrap();
        assert!(proof.verify());

        proof.leaf = Fe::from(99);
        assert!(!proof.verify());
    }

    #[test]
    fn update_moves_the_root() {
        let mut tree = tree_with(&[1, 2, 3]);
        let before = tree.root().unwrap().unwrap();

        tree.update(1, Fe::from(20)).unwrap();
        let after = tree.root().unwrap().unwrap();
        assert_ne!(before, after);
        assert_eq!(after, h(h(Fe::from(1), Fe::from(20)), Fe::from(3)));

        let proof = tree.proof(1).unwrap();
        assert_eq!(proof.leaf, Fe::from(20));
        assert!(proof.verify());
    }

    #[test]
    fn update_out_of_bounds_fails() {
        let mut tree = tree_with(&[1]);
        assert!(matches!(
            tree.update(1, Fe::from(9)),
            Err(Error::IndexOutOfBounds(1, 1))
        ));
    }
}
