//! The proof runtime: decoding and running Merkle proof operators.
//!
//! A proof arrives as a list of [`ProofOp`]s, innermost first. Each
//! operator consumes one key-path segment and folds the running value into
//! the next root, so a two-op chain proves `value` under a substore and
//! the substore root under the application hash.
//!
//! Two operators are registered by default: the value (inclusion) proof
//! and the absence proof. Both sides of the wire must register the same
//! string codes for proofs to decode.

use std::collections::HashMap;

use serde::{Deserialize, Serialize};

use lantern_core::{hash, leaf_hash, Hash, Proof};

use crate::error::{Result, RpcError};
use crate::path::KeyPath;

/// String code of the value (inclusion) proof operator.
pub const PROOF_OP_VALUE: &str = "lantern:v";
/// String code of the absence proof operator.
pub const PROOF_OP_ABSENCE: &str = "lantern:a";

/// A single encoded proof operator.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ProofOp {
    /// Operator code, dispatching the decoder.
    pub op_type: String,
    /// The key this operator consumes from the key path.
    pub key: Vec<u8>,
    /// Operator-specific payload.
    pub data: Vec<u8>,
}

/// An ordered list of proof operators, innermost first.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ProofOps {
    /// The operators.
    pub ops: Vec<ProofOp>,
}

/// A decoded, runnable proof operator.
pub trait ProofOperator: Send + Sync {
    /// Fold the argument values into this operator's root.
    ///
    /// Value proofs take `[value]` and return `[root]`; absence proofs
    /// take `[]` and return `[root]`.
    fn run(&self, args: Vec<Vec<u8>>) -> Result<Vec<Vec<u8>>>;

    /// The key-path segment this operator consumes.
    fn key(&self) -> &[u8];
}

/// Decodes a [`ProofOp`] into a runnable operator.
pub type OpDecoder = fn(&ProofOp) -> Result<Box<dyn ProofOperator>>;

/// Registry of proof operator decoders.
pub struct ProofRuntime {
    decoders: HashMap<String, OpDecoder>,
}

impl ProofRuntime {
    /// An empty runtime with no registered operators.
    pub fn new() -> Self {
        Self {
            decoders: HashMap::new(),
        }
    }

    /// The runtime with the value and absence operators registered.
    pub fn default_runtime() -> Self {
        let mut rt = Self::new();
        rt.register_op_decoder(PROOF_OP_VALUE, decode_value_op);
        rt.register_op_decoder(PROOF_OP_ABSENCE, decode_absence_op);
        rt
    }

    /// Register a decoder for an operator code.
    pub fn register_op_decoder(&mut self, op_type: impl Into<String>, decoder: OpDecoder) {
        self.decoders.insert(op_type.into(), decoder);
    }

    /// Verify that `value` exists at `keypath` under `root`.
    pub fn verify_value(
        &self,
        ops: &ProofOps,
        root: &Hash,
        keypath: &str,
        value: &[u8],
    ) -> Result<()> {
        self.verify(ops, root, keypath, vec![value.to_vec()])
    }

    /// Verify that no value exists at `keypath` under `root`.
    pub fn verify_absence(&self, ops: &ProofOps, root: &Hash, keypath: &str) -> Result<()> {
        self.verify(ops, root, keypath, Vec::new())
    }

    fn verify(
        &self,
        ops: &ProofOps,
        root: &Hash,
        keypath: &str,
        args: Vec<Vec<u8>>,
    ) -> Result<()> {
        let mut keys = KeyPath::parse(keypath)?.into_keys();
        let mut args = args;

        for op in &ops.ops {
            let decoder = self.decoders.get(&op.op_type).ok_or_else(|| {
                RpcError::MerkleProofFailed(format!("unregistered proof op {}", op.op_type))
            })?;
            let operator = decoder(op)?;

            // Operators consume the key path from the innermost segment out.
            let expected = keys.pop().ok_or_else(|| {
                RpcError::MerkleProofFailed("proof has more ops than key path segments".into())
            })?;
            if operator.key() != expected.as_slice() {
                return Err(RpcError::MerkleProofFailed(format!(
                    "op key {} does not match key path segment {}",
                    hex::encode(operator.key()),
                    hex::encode(&expected)
                )));
            }

            args = operator.run(args)?;
        }

        if !keys.is_empty() {
            return Err(RpcError::MerkleProofFailed(
                "key path segments left unconsumed".into(),
            ));
        }
        match args.as_slice() {
            [computed] if computed.as_slice() == root.as_bytes() => Ok(()),
            [computed] => Err(RpcError::MerkleProofFailed(format!(
                "computed root {} does not match trusted root {}",
                hex::encode(computed),
                root
            ))),
            _ => Err(RpcError::MerkleProofFailed(
                "proof did not reduce to a single root".into(),
            )),
        }
    }
}

impl Default for ProofRuntime {
    fn default() -> Self {
        Self::default_runtime()
    }
}

/// Canonical leaf encoding of a key/value pair: the value enters the tree
/// by hash, never by content.
fn kv_leaf_bytes(key: &[u8], value: &[u8]) -> Vec<u8> {
    bincode::serialize(&(key, hash(value).as_bytes())).expect("kv leaf serialization cannot fail")
}

/// Inclusion proof for one key/value pair.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ValueOp {
    /// The proven key.
    pub key: Vec<u8>,
    /// Merkle proof of the key/value leaf.
    pub proof: Proof,
}

impl ValueOp {
    /// Encode as a wire [`ProofOp`].
    pub fn into_proof_op(self) -> ProofOp {
        ProofOp {
            op_type: PROOF_OP_VALUE.to_string(),
            key: self.key.clone(),
            data: bincode::serialize(&self.proof).expect("proof serialization cannot fail"),
        }
    }
}

impl ProofOperator for ValueOp {
    fn run(&self, args: Vec<Vec<u8>>) -> Result<Vec<Vec<u8>>> {
        let [value] = args.as_slice() else {
            return Err(RpcError::MerkleProofFailed(
                "value op expects exactly one argument".into(),
            ));
        };
        let leaf = kv_leaf_bytes(&self.key, value);
        if self.proof.leaf_hash != leaf_hash(&leaf) {
            return Err(RpcError::MerkleProofFailed(
                "leaf does not commit the claimed key/value".into(),
            ));
        }
        let root = self
            .proof
            .compute_root()
            .map_err(|e| RpcError::MerkleProofFailed(e.to_string()))?;
        Ok(vec![root.as_bytes().to_vec()])
    }

    fn key(&self) -> &[u8] {
        &self.key
    }
}

fn decode_value_op(op: &ProofOp) -> Result<Box<dyn ProofOperator>> {
    let proof: Proof = bincode::deserialize(&op.data)
        .map_err(|e| RpcError::MerkleProofFailed(format!("undecodable value op: {}", e)))?;
    Ok(Box::new(ValueOp {
        key: op.key.clone(),
        proof,
    }))
}

/// A neighbouring leaf cited by an absence proof.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Neighbor {
    /// The neighbour's key.
    pub key: Vec<u8>,
    /// Hash of the neighbour's value.
    pub value_hash: Hash,
    /// Inclusion proof of the neighbour.
    pub proof: Proof,
}

/// Absence proof: the two leaves that would surround the key are adjacent.
///
/// With leaves sorted by key, a missing key is proven by exhibiting its
/// would-be neighbours at consecutive indices (or one neighbour at the
/// tree's edge).
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct AbsenceOp {
    /// The absent key.
    pub key: Vec<u8>,
    /// Greatest leaf below the key, if any.
    pub left: Option<Neighbor>,
    /// Smallest leaf above the key, if any.
    pub right: Option<Neighbor>,
}

impl AbsenceOp {
    /// Encode as a wire [`ProofOp`].
    pub fn into_proof_op(self) -> ProofOp {
        ProofOp {
            op_type: PROOF_OP_ABSENCE.to_string(),
            key: self.key.clone(),
            data: bincode::serialize(&(&self.left, &self.right))
                .expect("proof serialization cannot fail"),
        }
    }

    fn neighbor_root(&self, neighbor: &Neighbor) -> Result<Hash> {
        let leaf = bincode::serialize(&(&neighbor.key, neighbor.value_hash.as_bytes()))
            .expect("kv leaf serialization cannot fail");
        if neighbor.proof.leaf_hash != leaf_hash(&leaf) {
            return Err(RpcError::MerkleProofFailed(
                "neighbour leaf does not commit its key/value".into(),
            ));
        }
        neighbor
            .proof
            .compute_root()
            .map_err(|e| RpcError::MerkleProofFailed(e.to_string()))
    }
}

impl ProofOperator for AbsenceOp {
    fn run(&self, args: Vec<Vec<u8>>) -> Result<Vec<Vec<u8>>> {
        if !args.is_empty() {
            return Err(RpcError::MerkleProofFailed(
                "absence op takes no arguments".into(),
            ));
        }

        let root = match (&self.left, &self.right) {
            (Some(left), Some(right)) => {
                if !(left.key.as_slice() < self.key.as_slice()
                    && self.key.as_slice() < right.key.as_slice())
                {
                    return Err(RpcError::MerkleProofFailed(
                        "neighbours do not surround the absent key".into(),
                    ));
                }
                if right.proof.index != left.proof.index + 1 {
                    return Err(RpcError::MerkleProofFailed(
                        "neighbours are not adjacent leaves".into(),
                    ));
                }
                let left_root = self.neighbor_root(left)?;
                let right_root = self.neighbor_root(right)?;
                if left_root != right_root {
                    return Err(RpcError::MerkleProofFailed(
                        "neighbour proofs disagree on the root".into(),
                    ));
                }
                left_root
            }
            (None, Some(right)) => {
                if right.key.as_slice() <= self.key.as_slice() || right.proof.index != 0 {
                    return Err(RpcError::MerkleProofFailed(
                        "right neighbour is not the first leaf above the key".into(),
                    ));
                }
                self.neighbor_root(right)?
            }
            (Some(left), None) => {
                if left.key.as_slice() >= self.key.as_slice()
                    || left.proof.index + 1 != left.proof.total
                {
                    return Err(RpcError::MerkleProofFailed(
                        "left neighbour is not the last leaf below the key".into(),
                    ));
                }
                self.neighbor_root(left)?
            }
            (None, None) => {
                return Err(RpcError::MerkleProofFailed(
                    "absence proof cites no neighbours".into(),
                ))
            }
        };

        Ok(vec![root.as_bytes().to_vec()])
    }

    fn key(&self) -> &[u8] {
        &self.key
    }
}

fn decode_absence_op(op: &ProofOp) -> Result<Box<dyn ProofOperator>> {
    let (left, right): (Option<Neighbor>, Option<Neighbor>) = bincode::deserialize(&op.data)
        .map_err(|e| RpcError::MerkleProofFailed(format!("undecodable absence op: {}", e)))?;
    Ok(Box::new(AbsenceOp {
        key: op.key.clone(),
        left,
        right,
    }))
}

/// A sorted key/value Merkle tree, as an application store would build it.
///
/// Servers use this to construct proofs; the facade only ever verifies
/// them. The mock transport in the tests is such a server.
pub struct KvTree {
    entries: Vec<(Vec<u8>, Vec<u8>)>,
}

impl KvTree {
    /// Build a tree over the given entries, sorting by key.
    pub fn new(mut entries: Vec<(Vec<u8>, Vec<u8>)>) -> Self {
        entries.sort_by(|a, b| a.0.cmp(&b.0));
        entries.dedup_by(|a, b| a.0 == b.0);
        Self { entries }
    }

    /// The tree root.
    pub fn root(&self) -> Hash {
        lantern_core::root_from_byte_slices(&self.leaves())
    }

    /// Look up a value.
    pub fn get(&self, key: &[u8]) -> Option<&[u8]> {
        self.entries
            .iter()
            .find(|(k, _)| k.as_slice() == key)
            .map(|(_, v)| v.as_slice())
    }

    /// Inclusion proof for a present key.
    pub fn prove_value(&self, key: &[u8]) -> Option<ValueOp> {
        let index = self.entries.iter().position(|(k, _)| k.as_slice() == key)?;
        let (_, proofs) = lantern_core::proofs_from_byte_slices(&self.leaves());
        Some(ValueOp {
            key: key.to_vec(),
            proof: proofs[index].clone(),
        })
    }

    /// Absence proof for a missing key.
    pub fn prove_absence(&self, key: &[u8]) -> Option<AbsenceOp> {
        if self.get(key).is_some() || self.entries.is_empty() {
            return None;
        }
        let (_, proofs) = lantern_core::proofs_from_byte_slices(&self.leaves());
        let split = self
            .entries
            .iter()
            .position(|(k, _)| k.as_slice() > key)
            .unwrap_or(self.entries.len());

        let neighbor = |i: usize| Neighbor {
            key: self.entries[i].0.clone(),
            value_hash: hash(&self.entries[i].1),
            proof: proofs[i].clone(),
        };

        Some(AbsenceOp {
            key: key.to_vec(),
            left: split.checked_sub(1).map(|i| neighbor(i)),
            right: (split < self.entries.len()).then(|| neighbor(split)),
        })
    }

    fn leaves(&self) -> Vec<Vec<u8>> {
        self.entries
            .iter()
            .map(|(k, v)| kv_leaf_bytes(k, v))
            .collect()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::path::KeyPath;

    fn store_tree() -> KvTree {
        KvTree::new(vec![
            (b"balance/alice".to_vec(), b"100".to_vec()),
            (b"balance/bob".to_vec(), b"250".to_vec()),
            (b"nonce/alice".to_vec(), b"7".to_vec()),
        ])
    }

    /// App tree committing a single substore named "acc".
    fn app_tree(substore_root: Hash) -> KvTree {
        KvTree::new(vec![(b"acc".to_vec(), substore_root.as_bytes().to_vec())])
    }

    fn chained_ops(store: &KvTree, key: &[u8]) -> (ProofOps, Hash) {
        let app = app_tree(store.root());
        let inner = store.prove_value(key).unwrap().into_proof_op();
        let outer = app.prove_value(b"acc").unwrap().into_proof_op();
        (
            ProofOps {
                ops: vec![inner, outer],
            },
            app.root(),
        )
    }

    #[test]
    fn test_value_proof_verifies() {
        let store = store_tree();
        let (ops, app_root) = chained_ops(&store, b"balance/alice");
        let keypath = KeyPath::new()
            .append(b"acc")
            .append(b"balance/alice")
            .to_string();

        let rt = ProofRuntime::default_runtime();
        rt.verify_value(&ops, &app_root, &keypath, b"100").unwrap();
    }

    #[test]
    fn test_value_proof_rejects_wrong_value() {
        let store = store_tree();
        let (ops, app_root) = chained_ops(&store, b"balance/alice");
        let keypath = KeyPath::new()
            .append(b"acc")
            .append(b"balance/alice")
            .to_string();

        let rt = ProofRuntime::default_runtime();
        let err = rt
            .verify_value(&ops, &app_root, &keypath, b"999")
            .unwrap_err();
        assert!(matches!(err, RpcError::MerkleProofFailed(_)));
    }

    #[test]
    fn test_value_proof_rejects_tampered_ops() {
        let store = store_tree();
        let (mut ops, app_root) = chained_ops(&store, b"balance/alice");
        // Swap in a proof for a different key under the same type code.
        ops.ops[0] = store
            .prove_value(b"balance/bob")
            .unwrap()
            .into_proof_op();
        let keypath = KeyPath::new()
            .append(b"acc")
            .append(b"balance/alice")
            .to_string();

        let rt = ProofRuntime::default_runtime();
        assert!(rt.verify_value(&ops, &app_root, &keypath, b"100").is_err());
    }

    #[test]
    fn test_absence_proof_verifies() {
        let store = store_tree();
        let op = store.prove_absence(b"balance/carol").unwrap();
        let root = store.root();

        let ops = ProofOps {
            ops: vec![op.into_proof_op()],
        };
        let keypath = KeyPath::new().append(b"balance/carol").to_string();

        let rt = ProofRuntime::default_runtime();
        rt.verify_absence(&ops, &root, &keypath).unwrap();
    }

    #[test]
    fn test_absence_at_edges() {
        let store = store_tree();
        let root = store.root();
        let rt = ProofRuntime::default_runtime();

        // Below the first key: only a right neighbour exists.
        let op = store.prove_absence(b"aaa").unwrap();
        assert!(op.left.is_none());
        let keypath = KeyPath::new().append(b"aaa").to_string();
        rt.verify_absence(
            &ProofOps {
                ops: vec![op.into_proof_op()],
            },
            &root,
            &keypath,
        )
        .unwrap();

        // Above the last key: only a left neighbour exists.
        let op = store.prove_absence(b"zzz").unwrap();
        assert!(op.right.is_none());
        let keypath = KeyPath::new().append(b"zzz").to_string();
        rt.verify_absence(
            &ProofOps {
                ops: vec![op.into_proof_op()],
            },
            &root,
            &keypath,
        )
        .unwrap();
    }

    #[test]
    fn test_absence_rejected_for_present_key() {
        let store = store_tree();
        assert!(store.prove_absence(b"balance/bob").is_none());
    }

    #[test]
    fn test_unregistered_op_type() {
        let store = store_tree();
        let mut op = store.prove_value(b"balance/alice").unwrap().into_proof_op();
        op.op_type = "unknown:x".to_string();
        let keypath = KeyPath::new().append(b"balance/alice").to_string();

        let rt = ProofRuntime::default_runtime();
        let err = rt
            .verify_value(&ProofOps { ops: vec![op] }, &store.root(), &keypath, b"100")
            .unwrap_err();
        assert!(matches!(err, RpcError::MerkleProofFailed(_)));
    }

    #[test]
    fn test_key_path_mismatch() {
        let store = store_tree();
        let op = store.prove_value(b"balance/alice").unwrap().into_proof_op();
        let keypath = KeyPath::new().append(b"balance/bob").to_string();

        let rt = ProofRuntime::default_runtime();
        assert!(rt
            .verify_value(&ProofOps { ops: vec![op] }, &store.root(), &keypath, b"100")
            .is_err());
    }
}
