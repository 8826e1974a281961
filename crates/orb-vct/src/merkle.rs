//! RFC 6962 Merkle tree hashing
//!
//! Leaves are hashed as `SHA-256(0x00 || data)` and interior nodes as
//! `SHA-256(0x01 || left || right)`. [`CompactRange`] folds a stream of
//! leaf hashes into the tree root using `O(log n)` memory, which is how a
//! monitor recomputes the root of a log it has never seen before.

use ring::digest::{digest, Context, SHA256};

use crate::error::{Result, VctError};

// ============================================================================
// Hashing
// ============================================================================

/// SHA-256 digest
pub type Hash = [u8; 32];

const LEAF_PREFIX: u8 = 0x00;
const NODE_PREFIX: u8 = 0x01;

fn finish(ctx: Context) -> Hash {
    let mut out = [0u8; 32];
    out.copy_from_slice(ctx.finish().as_ref());
    out
}

/// Root of the empty tree: `SHA-256("")`
pub fn empty_root() -> Hash {
    let mut out = [0u8; 32];
    out.copy_from_slice(digest(&SHA256, &[]).as_ref());
    out
}

pub fn leaf_hash(data: &[u8]) -> Hash {
    let mut ctx = Context::new(&SHA256);
    ctx.update(&[LEAF_PREFIX]);
    ctx.update(data);
    finish(ctx)
}

pub fn node_hash(left: &Hash, right: &Hash) -> Hash {
    let mut ctx = Context::new(&SHA256);
    ctx.update(&[NODE_PREFIX]);
    ctx.update(left);
    ctx.update(right);
    finish(ctx)
}

// ============================================================================
// Compact Range
// ============================================================================

/// Incremental root computation over appended leaves.
///
/// The stack holds the roots of the perfect subtrees covering the leaves
/// seen so far, largest (leftmost) first.
#[derive(Clone, Debug, Default)]
pub struct CompactRange {
    size: u64,
    stack: Vec<(u64, Hash)>,
}

impl CompactRange {
    pub fn new() -> Self {
        Self::default()
    }

    /// Number of leaves appended
    pub fn size(&self) -> u64 {
        self.size
    }

    /// Append a leaf hash
    pub fn append(&mut self, leaf: Hash) {
        self.size += 1;
        self.stack.push((1, leaf));

        while self.stack.len() >= 2 {
            let n = self.stack.len();
            if self.stack[n - 2].0 != self.stack[n - 1].0 {
                break;
            }

            if let (Some((size, right)), Some((_, left))) = (self.stack.pop(), self.stack.pop()) {
                self.stack.push((size * 2, node_hash(&left, &right)));
            }
        }
    }

    /// Tree root over every appended leaf
    pub fn root(&self) -> Hash {
        let mut iter = self.stack.iter().rev();

        let Some((_, last)) = iter.next() else {
            return empty_root();
        };

        iter.fold(*last, |acc, (_, left)| node_hash(left, &acc))
    }
}

/// Root of the tree with the given leaf hashes
pub fn root_from_leaf_hashes(leaves: &[Hash]) -> Hash {
    let mut range = CompactRange::new();
    for leaf in leaves {
        range.append(*leaf);
    }
    range.root()
}

// ============================================================================
// Consistency Proofs
// ============================================================================

/// Build the consistency proof between the first `first` leaves and the whole
/// tree (RFC 6962 section 2.1.2).
pub fn consistency_proof(leaves: &[Hash], first: usize) -> Vec<Hash> {
    if first == 0 || first >= leaves.len() {
        return Vec::new();
    }

    let mut proof = Vec::new();
    subproof(first, leaves, true, &mut proof);
    proof
}

fn subproof(m: usize, leaves: &[Hash], complete: bool, proof: &mut Vec<Hash>) {
    let n = leaves.len();

    if m == n {
        if !complete {
            proof.push(root_from_leaf_hashes(leaves));
        }
        return;
    }

    let k = largest_power_of_two_below(n);
    if m <= k {
        subproof(m, &leaves[..k], complete, proof);
        proof.push(root_from_leaf_hashes(&leaves[k..]));
    } else {
        subproof(m - k, &leaves[k..], false, proof);
        proof.push(root_from_leaf_hashes(&leaves[..k]));
    }
}

fn largest_power_of_two_below(n: usize) -> usize {
    let mut k = 1;
    while k << 1 < n {
        k <<= 1;
    }
    k
}

/// Verify that the tree of size `second` with root `second_root` is an
/// append-only extension of the tree of size `first` with root `first_root`
/// (RFC 9162 section 2.1.4.2).
pub fn verify_consistency(
    first: u64,
    second: u64,
    first_root: &Hash,
    second_root: &Hash,
    proof: &[Hash],
) -> Result<()> {
    if first > second {
        return Err(VctError::Consistency(format!(
            "first tree size {first} exceeds second tree size {second}"
        )));
    }

    if first == second {
        if !proof.is_empty() {
            return Err(VctError::Consistency("non-empty proof for equal tree sizes".into()));
        }
        if first_root != second_root {
            return Err(VctError::Consistency("root mismatch for equal tree sizes".into()));
        }
        return Ok(());
    }

    if first == 0 {
        // Every tree extends the empty tree
        return Ok(());
    }

    if proof.is_empty() {
        return Err(VctError::Consistency("empty consistency proof".into()));
    }

    let mut path: Vec<Hash> = Vec::with_capacity(proof.len() + 1);
    if first.is_power_of_two() {
        path.push(*first_root);
    }
    path.extend_from_slice(proof);

    let mut fn_ = first - 1;
    let mut sn = second - 1;

    while fn_ & 1 == 1 {
        fn_ >>= 1;
        sn >>= 1;
    }

    let mut fr = path[0];
    let mut sr = path[0];

    for c in &path[1..] {
        if sn == 0 {
            return Err(VctError::Consistency("proof too long".into()));
        }

        if fn_ & 1 == 1 || fn_ == sn {
            fr = node_hash(c, &fr);
            sr = node_hash(c, &sr);

            while fn_ & 1 == 0 && fn_ != 0 {
                fn_ >>= 1;
                sn >>= 1;
            }
        } else {
            sr = node_hash(&sr, c);
        }

        fn_ >>= 1;
        sn >>= 1;
    }

    if sn != 0 {
        return Err(VctError::Consistency("proof too short".into()));
    }
    if &fr != first_root {
        return Err(VctError::Consistency(format!(
            "computed first root {} does not match {}",
            hex::encode(fr),
            hex::encode(first_root)
        )));
    }
    if &sr != second_root {
        return Err(VctError::Consistency(format!(
            "computed second root {} does not match {}",
            hex::encode(sr),
            hex::encode(second_root)
        )));
    }

    Ok(())
}
