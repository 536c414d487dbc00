use super::DataError;
use crate::core::alphabet::{Alphabet, StateSet};

#[derive(Debug, Clone, PartialEq)]
struct Sequence {
    name: String,
    text: String,
    states: Vec<StateSet>,
}

/// A set of aligned, named sequences over one alphabet.
#[derive(Debug, Clone, PartialEq)]
pub struct Alignment {
    alphabet: Alphabet,
    sequences: Vec<Sequence>,
}

impl Alignment {
    pub fn new(alphabet: Alphabet) -> Self {
        Self {
            alphabet,
            sequences: Vec::new(),
        }
    }

    /// Builds an alignment from `(name, sequence)` pairs.
    pub fn from_pairs<N, S>(
        alphabet: Alphabet,
        pairs: impl IntoIterator<Item = (N, S)>,
    ) -> Result<Self, DataError>
    where
        N: Into<String>,
        S: AsRef<str>,
    {
        let mut alignment = Self::new(alphabet);
        for (name, seq) in pairs {
            alignment.add_sequence(name, seq.as_ref())?;
        }
        Ok(alignment)
    }

    /// Appends a sequence.
    ///
    /// # Errors
    ///
    /// Fails on a duplicated name, on a length different from the sequences
    /// already present, or on a character outside the alphabet.
    pub fn add_sequence(&mut self, name: impl Into<String>, text: &str) -> Result<(), DataError> {
        let name = name.into();
        if self.sequences.iter().any(|s| s.name == name) {
            return Err(DataError::DuplicateName { name });
        }
        let text: String = text.chars().filter(|c| !c.is_whitespace()).collect();
        if let Some(first) = self.sequences.first() {
            if first.states.len() != text.chars().count() {
                return Err(DataError::LengthMismatch {
                    name,
                    expected: first.states.len(),
                    found: text.chars().count(),
                });
            }
        }
        let mut states = Vec::with_capacity(text.len());
        for (position, c) in text.chars().enumerate() {
            let set = self
                .alphabet
                .state_set(c)
                .ok_or_else(|| DataError::InvalidCharacter {
                    name: name.clone(),
                    character: c,
                    position,
                })?;
            states.push(set);
        }
        self.sequences.push(Sequence { name, text, states });
        Ok(())
    }

    pub fn alphabet(&self) -> Alphabet {
        self.alphabet
    }

    pub fn number_of_sequences(&self) -> usize {
        self.sequences.len()
    }

    pub fn number_of_sites(&self) -> usize {
        self.sequences.first().map_or(0, |s| s.states.len())
    }

    pub fn names(&self) -> Vec<String> {
        self.sequences.iter().map(|s| s.name.clone()).collect()
    }

    pub fn contains(&self, name: &str) -> bool {
        self.sequences.iter().any(|s| s.name == name)
    }

    /// Parsed states of the sequence called `name`.
    pub fn states(&self, name: &str) -> Option<&[StateSet]> {
        self.sequences
            .iter()
            .find(|s| s.name == name)
            .map(|s| s.states.as_slice())
    }

    /// Raw text of the sequence called `name`.
    pub fn text(&self, name: &str) -> Option<&str> {
        self.sequences
            .iter()
            .find(|s| s.name == name)
            .map(|s| s.text.as_str())
    }

    /// Restricts the alignment to the sequences called `names`, in that order.
    pub fn subset<S: AsRef<str>>(&self, names: &[S]) -> Result<Alignment, DataError> {
        let mut sub = Alignment::new(self.alphabet);
        for name in names {
            let name = name.as_ref();
            let seq = self
                .sequences
                .iter()
                .find(|s| s.name == name)
                .ok_or_else(|| DataError::MissingSequence {
                    name: name.to_string(),
                })?;
            sub.sequences.push(seq.clone());
        }
        Ok(sub)
    }

    /// Writes the alignment in FASTA format, 60 characters per line.
    pub fn to_fasta(&self) -> String {
        let mut out = String::new();
        for seq in &self.sequences {
            out.push('>');
            out.push_str(&seq.name);
            out.push('\n');
            let chars: Vec<char> = seq.text.chars().collect();
            for line in chars.chunks(60) {
                out.extend(line.iter());
                out.push('\n');
            }
        }
        out
    }
}
