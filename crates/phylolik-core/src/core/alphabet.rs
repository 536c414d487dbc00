use phf::{Map, phf_map};
use serde::Deserialize;
use std::fmt;

/// IUPAC nucleotide codes mapped to the bitmask of compatible states
/// (bit 0 = A, bit 1 = C, bit 2 = G, bit 3 = T/U).
///
/// Gaps and unknown characters are compatible with every state.
static NUCLEOTIDE_CODES: Map<char, u8> = phf_map! {
    'A' => 0b0001,
    'C' => 0b0010,
    'G' => 0b0100,
    'T' => 0b1000,
    'U' => 0b1000,
    'M' => 0b0011,
    'R' => 0b0101,
    'W' => 0b1001,
    'S' => 0b0110,
    'Y' => 0b1010,
    'K' => 0b1100,
    'V' => 0b0111,
    'H' => 0b1011,
    'D' => 0b1101,
    'B' => 0b1110,
    'N' => 0b1111,
    'X' => 0b1111,
    'O' => 0b1111,
    '?' => 0b1111,
    '-' => 0b1111,
    '.' => 0b1111,
};

const NUCLEOTIDE_STATES: usize = 4;

/// Set of resolved states a sequence character is compatible with.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct StateSet(u8);

impl StateSet {
    /// The set holding exactly one resolved state.
    pub fn single(state: usize) -> Self {
        StateSet(1 << state)
    }

    pub fn mask(self) -> u8 {
        self.0
    }

    pub fn contains(self, state: usize) -> bool {
        state < 8 && self.0 & (1 << state) != 0
    }

    pub fn count(self) -> usize {
        self.0.count_ones() as usize
    }

    /// Resolved states in increasing order.
    pub fn states(self) -> impl Iterator<Item = usize> {
        (0..8).filter(move |&s| self.0 & (1 << s) != 0)
    }
}

/// The state space sequences are written in.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Alphabet {
    Dna,
    Rna,
}

impl Alphabet {
    /// Number of resolved states.
    pub fn size(&self) -> usize {
        NUCLEOTIDE_STATES
    }

    /// Canonical letter of each resolved state.
    pub fn letters(&self) -> [char; NUCLEOTIDE_STATES] {
        match self {
            Alphabet::Dna => ['A', 'C', 'G', 'T'],
            Alphabet::Rna => ['A', 'C', 'G', 'U'],
        }
    }

    pub fn letter(&self, state: usize) -> Option<char> {
        self.letters().get(state).copied()
    }

    /// Parses one character, case-insensitively.
    ///
    /// Returns `None` for characters outside the alphabet.
    pub fn state_set(&self, c: char) -> Option<StateSet> {
        NUCLEOTIDE_CODES
            .get(&c.to_ascii_uppercase())
            .map(|&mask| StateSet(mask))
    }

    /// The set compatible with every resolved state (gap or unknown).
    pub fn unknown(&self) -> StateSet {
        StateSet((1u8 << self.size()) - 1)
    }

    /// True for gaps and fully ambiguous characters.
    pub fn is_unknown(&self, set: StateSet) -> bool {
        set == self.unknown()
    }
}

impl fmt::Display for Alphabet {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Alphabet::Dna => write!(f, "DNA"),
            Alphabet::Rna => write!(f, "RNA"),
        }
    }
}
