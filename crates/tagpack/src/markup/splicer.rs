//! Deferred cut/insert edits against one text snapshot.
//!
//! Callers plan every edit in the coordinate space of the original text. [`StringSplicer::execute`]
//! applies them from the highest offset down, so no applied edit shifts an offset that is still
//! pending.

use std::cmp::Reverse;

#[derive(Debug, Clone, PartialEq, Eq)]
enum Instruction {
    Cut { index: usize, length: usize },
    Insert { index: usize, text: String },
}

/// Collects edits and applies them in a single pass.
#[derive(Debug, Clone)]
pub struct StringSplicer {
    base: String,
    instructions: Vec<Instruction>,
}

impl StringSplicer {
    pub fn new(base: impl Into<String>) -> Self {
        Self {
            base: base.into(),
            instructions: Vec::new(),
        }
    }

    /// Remove `length` bytes starting at `index`.
    pub fn add_cut(&mut self, index: usize, length: usize) {
        if length > 0 {
            self.instructions.push(Instruction::Cut { index, length });
        }
    }

    /// Insert `text` at `index`. Several inserts at one index appear in the order they were added.
    pub fn add_insert(&mut self, index: usize, text: impl Into<String>) {
        let text = text.into();
        if !text.is_empty() {
            self.instructions.push(Instruction::Insert { index, text });
        }
    }

    pub fn is_empty(&self) -> bool {
        self.instructions.is_empty()
    }

    /// Apply every instruction and return the edited text.
    ///
    /// Overlapping cuts are merged. An insert that falls strictly inside a cut lands at the cut's
    /// start. Cuts run before inserts at the same offset, so text inserted at a cut boundary
    /// survives.
    pub fn execute(self) -> String {
        let cuts = merge_cuts(&self.instructions);
        let mut ordered: Vec<(usize, u8, Reverse<usize>, Instruction)> = Vec::new();

        for &(start, end) in &cuts {
            ordered.push((
                start,
                0,
                Reverse(0),
                Instruction::Cut {
                    index: start,
                    length: end - start,
                },
            ));
        }

        for (sequence, instruction) in self.instructions.into_iter().enumerate() {
            if let Instruction::Insert { index, text } = instruction {
                let index = cuts
                    .iter()
                    .find(|&&(start, end)| index > start && index < end)
                    .map_or(index, |&(start, _)| start);
                ordered.push((
                    index,
                    1,
                    Reverse(sequence),
                    Instruction::Insert { index, text },
                ));
            }
        }

        // Descending offset; at equal offsets cuts first, then the latest insert first so the
        // earliest ends up leftmost.
        ordered.sort_by(|a, b| b.0.cmp(&a.0).then(a.1.cmp(&b.1)).then(a.2.cmp(&b.2)));

        let mut result = self.base;
        for (_, _, _, instruction) in ordered {
            match instruction {
                Instruction::Cut { index, length } => {
                    let end = (index + length).min(result.len());
                    let start = index.min(end);
                    result.replace_range(start..end, "");
                }
                Instruction::Insert { index, text } => {
                    let index = index.min(result.len());
                    result.insert_str(index, &text);
                }
            }
        }
        result
    }
}

fn merge_cuts(instructions: &[Instruction]) -> Vec<(usize, usize)> {
    let mut cuts: Vec<(usize, usize)> = instructions
        .iter()
        .filter_map(|instruction| match instruction {
            Instruction::Cut { index, length } => Some((*index, index + length)),
            Instruction::Insert { .. } => None,
        })
        .collect();
    cuts.sort_unstable();

    let mut merged: Vec<(usize, usize)> = Vec::with_capacity(cuts.len());
    for (start, end) in cuts {
        match merged.last_mut() {
            Some(last) if start < last.1 => last.1 = last.1.max(end),
            _ => merged.push((start, end)),
        }
    }
    merged
}
