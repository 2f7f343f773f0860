use serde::{Deserialize, Serialize};
use tally_crypto::Fe;

/// Operation codes, `(fnc0, fnc1)` as the circuit reads them.
pub const FNC_NOP: (u8, u8) = (0, 0);
pub const FNC_UPDATE: (u8, u8) = (0, 1);
pub const FNC_INSERT: (u8, u8) = (1, 0);
pub const FNC_DELETE: (u8, u8) = (1, 1);

/// Witness of a single tree mutation: the roots around it, the sibling
/// path of the touched leaf and the before/after key-value pair.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct StateTransition {
    pub old_root: Fe,
    pub new_root: Fe,
    pub siblings: Vec<Fe>,
    pub old_key: Fe,
    pub old_value: Fe,
    pub new_key: Fe,
    pub new_value: Fe,
    /// The touched slot held no leaf before the operation.
    pub is_old0: bool,
    pub fnc0: u8,
    pub fnc1: u8,
}

impl StateTransition {
    /// A transition that leaves the tree untouched; batch slots without a
    /// vote emit these so the witness stream keeps its fixed shape.
    pub fn noop(root: Fe) -> Self {
        Self {
            old_root: root,
            new_root: root,
            siblings: Vec::new(),
            old_key: Fe::zero(),
            old_value: Fe::zero(),
            new_key: Fe::zero(),
            new_value: Fe::zero(),
            is_old0: false,
            fnc0: FNC_NOP.0,
            fnc1: FNC_NOP.1,
        }
    }

    pub fn fnc(&self) -> (u8, u8) {
        (self.fnc0, self.fnc1)
    }

    pub fn is_noop(&self) -> bool {
        self.fnc() == FNC_NOP && self.old_root == self.new_root
    }
}
